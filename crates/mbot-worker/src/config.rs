//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use mbot_storage::DEFAULT_PART_SIZE;

/// Where finished recordings are uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadBackendKind {
    /// The recording platform's multipart files API
    #[default]
    FilesApi,
    /// Directly to the configured storage provider
    Storage,
}

impl FromStr for UploadBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "files_api" | "files-api" | "api" => Ok(Self::FilesApi),
            "storage" | "provider" => Ok(Self::Storage),
            other => Err(format!("unknown upload backend '{}'", other)),
        }
    }
}

/// Attempts per job, the first included, whatever the error allows.
pub const MAX_JOB_ATTEMPTS: u32 = 3;

/// Settings for the JobStore retry loop.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Linear backoff unit: the n-th retry sleeps n × this
    pub retry_backoff: Duration,
    /// Attempts per job, the first included; capped at [`MAX_JOB_ATTEMPTS`]
    pub max_attempts: u32,
}

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_secs(30),
            max_attempts: MAX_JOB_ATTEMPTS,
        }
    }
}

impl JobStoreConfig {
    /// `max_attempts` held within `1..=MAX_JOB_ATTEMPTS`.
    pub fn attempt_limit(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_JOB_ATTEMPTS)
    }
}

/// External recorder settings.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Executable that writes the recording to stdout
    pub command: String,
    /// Arguments passed to the command
    pub args: Vec<String>,
    /// The recorder is killed after this long
    pub max_duration: Duration,
    /// Exit code meaning "do not retry" (meeting not found, denied entry)
    pub permanent_exit_code: i32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            command: "meeting-recorder".to_string(),
            args: Vec::new(),
            max_duration: Duration::from_secs(180 * 60),
            permanent_exit_code: 3,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root of the per-user staging folders
    pub staging_dir: PathBuf,
    pub job_store: JobStoreConfig,
    pub upload_backend: UploadBackendKind,
    /// Bytes per multipart part
    pub upload_part_size: u64,
    /// Object key prefix for direct storage uploads
    pub storage_key_prefix: String,
    pub recorder: RecorderConfig,
    /// Prometheus exporter port; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("/tmp/mbot/recordings"),
            job_store: JobStoreConfig::default(),
            upload_backend: UploadBackendKind::default(),
            upload_part_size: DEFAULT_PART_SIZE,
            storage_key_prefix: "meeting-bot".to_string(),
            recorder: RecorderConfig::default(),
            metrics_port: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let recorder = RecorderConfig {
            command: std::env::var("RECORDER_COMMAND").unwrap_or(defaults.recorder.command),
            args: std::env::var("RECORDER_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            max_duration: Duration::from_secs(
                env_parse::<u64>("MAX_RECORDING_DURATION_MINUTES").unwrap_or(180) * 60,
            ),
            permanent_exit_code: env_parse("RECORDER_EXIT_PERMANENT")
                .unwrap_or(defaults.recorder.permanent_exit_code),
        };

        Self {
            staging_dir: std::env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            job_store: JobStoreConfig {
                retry_backoff: Duration::from_secs(env_parse("JOB_RETRY_BACKOFF_SECS").unwrap_or(30)),
                max_attempts: env_parse::<u32>("JOB_MAX_ATTEMPTS")
                    .unwrap_or(MAX_JOB_ATTEMPTS)
                    .clamp(1, MAX_JOB_ATTEMPTS),
            },
            upload_backend: env_parse("UPLOAD_BACKEND").unwrap_or_default(),
            upload_part_size: env_parse("UPLOAD_PART_SIZE_BYTES").unwrap_or(DEFAULT_PART_SIZE),
            storage_key_prefix: std::env::var("STORAGE_KEY_PREFIX")
                .unwrap_or(defaults.storage_key_prefix),
            recorder,
            metrics_port: env_parse("METRICS_PORT"),
        }
    }
}
