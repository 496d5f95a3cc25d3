//! Shared Key request signing and service SAS generation.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use sha2::Sha256;
use url::Url;

use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// REST API version sent with every request and used for SAS tokens.
pub(crate) const API_VERSION: &str = "2021-08-06";

/// Standard headers that take part in the Shared Key string-to-sign, in order.
const SIGNED_HEADERS: &[&str] = &[
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

fn hmac_base64(key: &[u8], message: &str) -> StorageResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StorageError::config_error(format!("Invalid Azure account key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// RFC 1123 timestamp for `x-ms-date`.
pub(crate) fn ms_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the Shared Key string-to-sign for a blob service request.
pub(crate) fn string_to_sign(method: &str, headers: &HeaderMap, url: &Url, account: &str) -> String {
    let mut out = String::new();
    out.push_str(method);
    out.push('\n');

    for name in SIGNED_HEADERS {
        let value = headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        // A zero Content-Length is signed as empty.
        if *name == "content-length" && value == "0" {
            out.push('\n');
            continue;
        }
        out.push_str(value);
        out.push('\n');
    }

    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.trim())))
        .collect();
    ms_headers.sort_by(|a, b| a.0.cmp(b.0));
    for (name, value) in ms_headers {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push('/');
    out.push_str(account);
    out.push_str(url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (key, mut values) in params {
        values.sort();
        out.push('\n');
        out.push_str(&key);
        out.push(':');
        out.push_str(&values.join(","));
    }

    out
}

/// Sign a request with the account key.
///
/// `x-ms-date` and `x-ms-version` must already be set.
pub(crate) fn sign_request(
    request: &mut reqwest::Request,
    account: &str,
    key: &[u8],
) -> StorageResult<()> {
    let to_sign = string_to_sign(
        request.method().as_str(),
        request.headers(),
        request.url(),
        account,
    );
    let signature = hmac_base64(key, &to_sign)?;

    let value = HeaderValue::from_str(&format!("SharedKey {}:{}", account, signature))
        .map_err(|e| StorageError::config_error(format!("Invalid authorization header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Parameters of a blob-scoped service SAS.
#[derive(Debug, Clone)]
pub(crate) struct BlobSas<'a> {
    pub account: &'a str,
    pub container: &'a str,
    pub blob: &'a str,
    /// Permission letters in canonical order, e.g. "r" or "cw"
    pub permissions: &'a str,
    pub expiry: DateTime<Utc>,
    pub https_only: bool,
}

impl BlobSas<'_> {
    fn string_to_sign(&self, expiry: &str) -> String {
        let resource = format!("/blob/{}/{}/{}", self.account, self.container, self.blob);
        let protocol = if self.https_only { "https" } else { "" };

        [
            self.permissions,
            "",
            expiry,
            &resource,
            "",
            "",
            protocol,
            API_VERSION,
            "b",
            "",
            "",
            "",
            "",
            "",
            "",
            "",
        ]
        .join("\n")
    }

    /// Signed query string, without a leading '?'.
    pub fn to_query(&self, key: &[u8]) -> StorageResult<String> {
        let expiry = self.expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let signature = hmac_base64(key, &self.string_to_sign(&expiry))?;

        let mut query = format!(
            "sv={}&sr=b&sp={}&se={}",
            API_VERSION,
            self.permissions,
            urlencoding::encode(&expiry)
        );
        if self.https_only {
            query.push_str("&spr=https");
        }
        query.push_str("&sig=");
        query.push_str(&urlencoding::encode(&signature));
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            "x-ms-date",
            HeaderValue::from_static("Mon, 06 Jan 2025 10:00:00 GMT"),
        );
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));
        headers.insert("content-length", HeaderValue::from_static("11"));
        headers
    }

    #[test]
    fn test_ms_date_format() {
        let now = Utc.with_ymd_and_hms(2025, 1, 6, 10, 0, 0).unwrap();
        assert_eq!(ms_date(now), "Mon, 06 Jan 2025 10:00:00 GMT");
    }

    #[test]
    fn test_string_to_sign_layout() {
        let url = Url::parse("https://acct.blob.core.windows.net/recordings/rec/a.webm").unwrap();
        let to_sign = string_to_sign("PUT", &sample_headers(), &url, "acct");

        assert_eq!(
            to_sign,
            "PUT\n\n\n11\n\n\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Mon, 06 Jan 2025 10:00:00 GMT\n\
             x-ms-version:2021-08-06\n\
             /acct/recordings/rec/a.webm"
        );
    }

    #[test]
    fn test_string_to_sign_sorts_query_parameters() {
        let url = Url::parse(
            "https://acct.blob.core.windows.net/recordings?restype=container&comp=list&prefix=rec%2F",
        )
        .unwrap();
        let to_sign = string_to_sign("GET", &HeaderMap::new(), &url, "acct");

        assert!(to_sign.ends_with("/acct/recordings\ncomp:list\nprefix:rec/\nrestype:container"));
    }

    #[test]
    fn test_zero_content_length_is_empty() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("0"));
        let url = Url::parse("https://acct.blob.core.windows.net/c/b").unwrap();

        assert!(string_to_sign("DELETE", &headers, &url, "acct").starts_with("DELETE\n\n\n\n"));
    }

    #[test]
    fn test_sign_request_sets_shared_key_authorization() {
        let url = Url::parse("https://acct.blob.core.windows.net/recordings/rec/a.webm").unwrap();
        let mut request = reqwest::Request::new(reqwest::Method::PUT, url);
        *request.headers_mut() = sample_headers();

        sign_request(&mut request, "acct", b"secret").unwrap();

        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "SharedKey acct:aFQYqFCW1ER3lvxW3p0R3yBpqlD8rcEdAjFoq07I8q4="
        );
    }

    #[test]
    fn test_blob_sas_query() {
        let sas = BlobSas {
            account: "acct",
            container: "recordings",
            blob: "rec/a.webm",
            permissions: "r",
            expiry: Utc.with_ymd_and_hms(2025, 1, 6, 11, 0, 0).unwrap(),
            https_only: true,
        };

        assert_eq!(
            sas.to_query(b"secret").unwrap(),
            "sv=2021-08-06&sr=b&sp=r&se=2025-01-06T11%3A00%3A00Z&spr=https\
             &sig=RbGz9VZZV3OSn6Qd6AA6u8N63P5Hy5TkzstABYQjfek%3D"
        );
    }
}
