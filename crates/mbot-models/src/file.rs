//! Cloud file records.

use serde::{Deserialize, Serialize};

/// A recording stored in the cloud, as returned when an upload is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFile {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_file_parses_files_api_record() {
        let json = r#"{
            "_id": "f-1",
            "type": "File",
            "name": "Zoom Recording 3:04pm Jan 02 2025",
            "size": 1024,
            "providerKey": "teams/t/f-1.webm",
            "provider": "S3"
        }"#;

        let file: RecordedFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "f-1");
        assert_eq!(file.size, Some(1024));
        assert_eq!(file.provider_key.as_deref(), Some("teams/t/f-1.webm"));
        assert_eq!(file.url, None);
    }
}
