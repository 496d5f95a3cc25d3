//! Where recording bytes come from.

use std::process::Stdio;

use async_trait::async_trait;
use bytes::BytesMut;
use mbot_models::JoinRequest;
use mbot_recording::DiskUploader;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::RecorderConfig;
use crate::error::{WorkerError, WorkerResult};

/// Read size for recorder output.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Attempts allowed for a recorder crash.
const RECORDER_CRASH_RETRIES: u32 = 3;

/// Joins a meeting and streams the recording into the staging writer.
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Record until the meeting ends. Chunks go to `sink` as they arrive.
    async fn record(&self, request: &JoinRequest, sink: &DiskUploader) -> WorkerResult<()>;
}

/// Runs an external recorder that writes the recording to stdout.
///
/// Meeting parameters are passed through the environment:
/// `MEETING_URL`, `MEETING_PROVIDER`, `BOT_NAME`, `TEAM_ID`, `USER_ID`,
/// `TIMEZONE`, plus `BOT_ID` / `EVENT_ID` when present.
pub struct CommandSource {
    config: RecorderConfig,
}

impl CommandSource {
    pub fn new(config: RecorderConfig) -> Self {
        Self { config }
    }

    fn command(&self, request: &JoinRequest) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env("MEETING_URL", &request.url)
            .env("MEETING_PROVIDER", request.provider.to_string())
            .env("BOT_NAME", &request.name)
            .env("TEAM_ID", &request.team_id)
            .env("USER_ID", &request.user_id)
            .env("TIMEZONE", &request.timezone)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(bot_id) = &request.bot_id {
            command.env("BOT_ID", bot_id);
        }
        if let Some(event_id) = &request.event_id {
            command.env("EVENT_ID", event_id);
        }
        command
    }

    fn map_exit(&self, code: Option<i32>) -> WorkerResult<()> {
        match code {
            Some(0) => Ok(()),
            Some(code) if code == self.config.permanent_exit_code => Err(WorkerError::permanent(
                format!("Recorder gave up on the meeting (exit code {})", code),
            )),
            Some(code) => Err(WorkerError::retryable(
                format!("Recorder exited with code {}", code),
                RECORDER_CRASH_RETRIES,
            )),
            None => Err(WorkerError::retryable(
                "Recorder was terminated by a signal",
                RECORDER_CRASH_RETRIES,
            )),
        }
    }
}

#[async_trait]
impl RecordingSource for CommandSource {
    async fn record(&self, request: &JoinRequest, sink: &DiskUploader) -> WorkerResult<()> {
        let mut child = self.command(request).spawn().map_err(|e| {
            WorkerError::config_error(format!(
                "Failed to start recorder '{}': {}",
                self.config.command, e
            ))
        })?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::source_failed("Recorder stdout not captured"))?;

        info!(command = %self.config.command, "Recorder started");

        let outcome = tokio::time::timeout(self.config.max_duration, async {
            let bytes = pump(&mut stdout, sink).await?;
            let status = child.wait().await?;
            Ok::<_, WorkerError>((bytes, status))
        })
        .await;

        match outcome {
            Ok(Ok((bytes, status))) => {
                info!(bytes, status = %status, "Recorder finished");
                self.map_exit(status.code())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    max_minutes = self.config.max_duration.as_secs() / 60,
                    "Maximum recording duration reached, stopping recorder"
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}

/// Forward `reader` into `sink` until EOF. Returns the bytes read.
async fn pump<R>(reader: &mut R, sink: &DiskUploader) -> WorkerResult<u64>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0u64;
    let mut refused = false;
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);

    loop {
        buf.reserve(READ_CHUNK_SIZE);
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;

        if !sink.save_chunk(buf.split().freeze()) && !refused {
            refused = true;
            warn!("Staging writer refused a chunk, recording will be incomplete");
        }
    }
}
