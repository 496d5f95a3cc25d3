//! Recording media types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content type of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContentType {
    #[default]
    #[serde(rename = "video/webm")]
    VideoWebm,
    #[serde(rename = "video/mp4")]
    VideoMp4,
}

impl ContentType {
    /// MIME type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::VideoWebm => "video/webm",
            ContentType::VideoMp4 => "video/mp4",
        }
    }

    /// File extension used for staging files.
    pub fn extension(&self) -> &'static str {
        match self {
            ContentType::VideoWebm => "webm",
            ContentType::VideoMp4 => "mp4",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "video/webm" | "webm" => Ok(ContentType::VideoWebm),
            "video/mp4" | "mp4" => Ok(ContentType::VideoMp4),
            other => Err(format!("unsupported content type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_webm() {
        assert_eq!(ContentType::default().as_str(), "video/webm");
        assert_eq!(ContentType::default().extension(), "webm");
    }

    #[test]
    fn test_from_str() {
        assert_eq!("mp4".parse::<ContentType>(), Ok(ContentType::VideoMp4));
        assert_eq!("Video/WebM".parse::<ContentType>(), Ok(ContentType::VideoWebm));
        assert!("audio/wav".parse::<ContentType>().is_err());
    }
}
