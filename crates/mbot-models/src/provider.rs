//! Video conferencing providers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Video conferencing provider a bot joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingProvider {
    Google,
    Microsoft,
    Zoom,
}

impl MeetingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingProvider::Google => "google",
            MeetingProvider::Microsoft => "microsoft",
            MeetingProvider::Zoom => "zoom",
        }
    }

    /// Prefix used when naming the finished recording.
    pub fn recording_name_prefix(&self) -> &'static str {
        match self {
            MeetingProvider::Google => "Google Meet Recording",
            MeetingProvider::Microsoft => "Microsoft Teams Recording",
            MeetingProvider::Zoom => "Zoom Recording",
        }
    }
}

impl fmt::Display for MeetingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_name_prefix() {
        assert_eq!(
            MeetingProvider::Google.recording_name_prefix(),
            "Google Meet Recording"
        );
        assert_eq!(
            MeetingProvider::Microsoft.recording_name_prefix(),
            "Microsoft Teams Recording"
        );
        assert_eq!(MeetingProvider::Zoom.recording_name_prefix(), "Zoom Recording");
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&MeetingProvider::Microsoft).unwrap();
        assert_eq!(json, "\"microsoft\"");
    }
}
