//! Job descriptors carried on the queue and accepted from API callers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::provider::MeetingProvider;

/// Correlation identifier attached to every log line of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to join a meeting and record it.
///
/// This is the serialized form pushed to the job queue by the scheduling
/// backend, so field names follow its camelCase JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Token used to authenticate against the files API
    pub bearer_token: String,
    /// Meeting URL
    pub url: String,
    /// Display name of the bot in the meeting
    pub name: String,
    /// Team that owns the recording
    pub team_id: String,
    /// IANA timezone (or fixed offset) of the team
    pub timezone: String,
    /// User that scheduled the recording
    pub user_id: String,
    /// Video conferencing provider
    pub provider: MeetingProvider,
    /// Calendar event ID, if scheduled from a calendar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Bot ID, if created through the bot API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
}

impl JoinRequest {
    /// Parse a queue message.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Serialize for the queue.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The entity this recording belongs to: the bot, else the calendar event.
    pub fn entity_id(&self) -> &str {
        self.bot_id
            .as_deref()
            .or(self.event_id.as_deref())
            .unwrap_or_default()
    }

    /// Staging file ID for a given attempt.
    pub fn temp_file_id(&self, attempt: u32) -> TempFileId {
        TempFileId::derive(&self.user_id, self.entity_id(), attempt)
    }

    /// Recording name prefix for this request's provider.
    pub fn recording_name_prefix(&self) -> &'static str {
        self.provider.recording_name_prefix()
    }
}

/// Filename-safe identifier of a staging file.
///
/// Derived from user, entity and attempt so that two attempts of the same job
/// never write to the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempFileId(String);

impl TempFileId {
    /// Derive the ID for `user_id` + `entity_id` + `attempt`.
    pub fn derive(user_id: &str, entity_id: &str, attempt: u32) -> Self {
        let raw = format!("{}{}{}", user_id, entity_id, attempt);
        Self(URL_SAFE_NO_PAD.encode(raw.as_bytes()))
    }

    /// Wrap an already-encoded ID.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> JoinRequest {
        JoinRequest {
            bearer_token: "token".to_string(),
            url: "https://meet.google.com/abc-defg-hij".to_string(),
            name: "Notetaker".to_string(),
            team_id: "team-1".to_string(),
            timezone: "Europe/Berlin".to_string(),
            user_id: "user-1".to_string(),
            provider: MeetingProvider::Google,
            event_id: Some("event-9".to_string()),
            bot_id: None,
        }
    }

    #[test]
    fn test_join_request_parses_camel_case() {
        let payload = r#"{
            "bearerToken": "t",
            "url": "https://zoom.us/j/1",
            "name": "Bot",
            "teamId": "team",
            "timezone": "UTC",
            "userId": "user",
            "provider": "zoom",
            "botId": "bot-7"
        }"#;

        let request = JoinRequest::from_json(payload).unwrap();
        assert_eq!(request.provider, MeetingProvider::Zoom);
        assert_eq!(request.bot_id.as_deref(), Some("bot-7"));
        assert_eq!(request.event_id, None);
        assert_eq!(request.entity_id(), "bot-7");
    }

    #[test]
    fn test_join_request_rejects_unknown_provider() {
        let payload = r#"{"bearerToken":"t","url":"u","name":"n","teamId":"t",
            "timezone":"UTC","userId":"u","provider":"webex"}"#;
        assert!(JoinRequest::from_json(payload).is_err());
    }

    #[test]
    fn test_entity_id_prefers_bot_over_event() {
        let mut request = sample_request();
        assert_eq!(request.entity_id(), "event-9");

        request.bot_id = Some("bot-1".to_string());
        assert_eq!(request.entity_id(), "bot-1");

        request.bot_id = None;
        request.event_id = None;
        assert_eq!(request.entity_id(), "");
    }

    #[test]
    fn test_temp_file_id_is_filename_safe_and_unique_per_attempt() {
        let request = sample_request();
        let first = request.temp_file_id(0);
        let second = request.temp_file_id(1);

        assert_ne!(first, second);
        assert_eq!(first, request.temp_file_id(0));
        assert!(first
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_temp_file_id_encoding() {
        // "user-1event-90" in URL-safe base64 without padding
        let id = TempFileId::derive("user-1", "event-9", 0);
        assert_eq!(id.as_str(), "dXNlci0xZXZlbnQtOTA");
    }
}
