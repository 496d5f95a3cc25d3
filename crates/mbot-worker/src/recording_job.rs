//! Turning a join request into a job.

use std::sync::Arc;

use mbot_models::{ContentType, JoinRequest};
use mbot_recording::{
    ChunkWriterConfig, DiskUploader, RecordingUploader, StagingArea, UploadConfig, UploadTarget,
    DEFAULT_FOLDER_ID,
};
use mbot_storage::{FilesApiBackend, FilesApiConfig, MultipartBackend};

use crate::error::WorkerResult;
use crate::job_store::Job;
use crate::logging::JobLogger;
use crate::source::RecordingSource;

/// Where a job's finished recording is uploaded.
#[derive(Clone)]
pub enum UploadRoute {
    /// The files API, authenticated with the request's bearer token
    FilesApi(FilesApiConfig),
    /// A shared provider-backed multipart backend
    Storage(Arc<dyn MultipartBackend>),
}

impl UploadRoute {
    fn backend_for(&self, request: &JoinRequest) -> WorkerResult<Arc<dyn MultipartBackend>> {
        match self {
            UploadRoute::FilesApi(config) => {
                Ok(Arc::new(FilesApiBackend::new(config, &request.bearer_token)?))
            }
            UploadRoute::Storage(backend) => Ok(Arc::clone(backend)),
        }
    }
}

/// Builds jobs from queue messages.
pub trait JobFactory: Send + Sync {
    fn build(&self, request: JoinRequest) -> Job;
}

/// Records a meeting to a staging file, then uploads it.
#[derive(Clone)]
pub struct RecordingJob {
    staging: StagingArea,
    source: Arc<dyn RecordingSource>,
    route: UploadRoute,
    upload: UploadConfig,
    writer: ChunkWriterConfig,
    key_prefix: String,
}

impl RecordingJob {
    pub fn new(
        staging: StagingArea,
        source: Arc<dyn RecordingSource>,
        route: UploadRoute,
        upload: UploadConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            staging,
            source,
            route,
            upload,
            writer: ChunkWriterConfig::default(),
            key_prefix: key_prefix.into(),
        }
    }

    pub fn with_writer_config(mut self, writer: ChunkWriterConfig) -> Self {
        self.writer = writer;
        self
    }

    fn target(&self, request: &JoinRequest, attempt: u32) -> UploadTarget {
        let temp_file_id = request.temp_file_id(attempt);
        let content_type = ContentType::default();
        let object_key = format!(
            "{}/{}/{}/{}.{}",
            self.key_prefix,
            request.team_id,
            request.user_id,
            temp_file_id,
            content_type.extension()
        );

        UploadTarget {
            user_id: request.user_id.clone(),
            team_id: request.team_id.clone(),
            folder_id: DEFAULT_FOLDER_ID.to_string(),
            temp_file_id,
            content_type,
            object_key,
            name_prefix: request.recording_name_prefix().to_string(),
            timezone: request.timezone.clone(),
            bot_id: request.bot_id.clone(),
        }
    }

    /// One attempt: record, then upload.
    ///
    /// Upload failures are logged and leave the staging file in place; they
    /// never fail the attempt, so a finished meeting is not joined again.
    pub async fn run_attempt(
        &self,
        request: &JoinRequest,
        attempt: u32,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let backend = self.route.backend_for(request)?;
        let uploader = RecordingUploader::new(backend, self.upload.clone());
        let disk = DiskUploader::initialize(
            &self.staging,
            self.target(request, attempt),
            uploader,
            self.writer.clone(),
        )
        .await?;

        logger.log_progress(&format!("joining {}", request.url));
        self.source.record(request, &disk).await?;

        logger.log_progress("meeting ended, uploading recording");
        if disk.upload_recording().await {
            logger.log_progress("recording uploaded");
        } else {
            logger.log_warning(&format!(
                "upload failed, staging file retained at {}",
                disk.file_path().display()
            ));
        }
        Ok(())
    }
}

impl JobFactory for RecordingJob {
    fn build(&self, request: JoinRequest) -> Job {
        let logger = JobLogger::for_request(&request);
        let recording = self.clone();
        let request = Arc::new(request);
        let attempt_logger = logger.clone();

        Job::new(logger, move |attempt| {
            let recording = recording.clone();
            let request = Arc::clone(&request);
            let logger = attempt_logger.clone();
            async move { recording.run_attempt(&request, attempt, &logger).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::source::CommandSource;
    use crate::testing::{join_request, MemoryBackend, StaticSource};
    use std::time::Duration;

    fn recording_job(root: &std::path::Path, source: Arc<dyn RecordingSource>, backend: Arc<MemoryBackend>) -> RecordingJob {
        RecordingJob::new(
            StagingArea::new(root),
            source,
            UploadRoute::Storage(backend),
            UploadConfig {
                part_size: 1024,
                ..UploadConfig::default()
            },
            "meeting-bot",
        )
    }

    #[test]
    fn test_target_layout() {
        let dir = tempfile::tempdir().unwrap();
        let job = recording_job(
            dir.path(),
            Arc::new(StaticSource::default()),
            Arc::new(MemoryBackend::default()),
        );
        let request = join_request();
        let target = job.target(&request, 1);

        assert_eq!(target.temp_file_id, request.temp_file_id(1));
        assert_eq!(
            target.object_key,
            format!("meeting-bot/team-1/user-1/{}.webm", target.temp_file_id)
        );
        assert_eq!(target.folder_id, "private");
        assert_eq!(target.name_prefix, "Google Meet Recording");
    }

    #[tokio::test]
    async fn test_attempt_records_and_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::default());
        let source = Arc::new(StaticSource::new(vec![b"abc".to_vec(), b"def".to_vec()]));
        let job = recording_job(dir.path(), source, backend.clone());
        let request = join_request();
        let logger = JobLogger::for_request(&request);

        job.run_attempt(&request, 0, &logger).await.unwrap();

        assert_eq!(backend.uploaded(), vec![b"abcdef".to_vec()]);
        let staged = dir.path().join("user-1");
        assert_eq!(std::fs::read_dir(staged).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_does_not_fail_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::failing());
        let source = Arc::new(StaticSource::new(vec![b"abc".to_vec()]));
        let job = recording_job(dir.path(), source, backend);
        let request = join_request();
        let logger = JobLogger::for_request(&request);

        job.run_attempt(&request, 0, &logger).await.unwrap();

        let staged = dir.path().join("user-1");
        assert_eq!(std::fs::read_dir(staged).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_command_source_streams_into_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::default());
        let source = Arc::new(CommandSource::new(RecorderConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf 'meeting-bytes'".to_string()],
            max_duration: Duration::from_secs(30),
            permanent_exit_code: 3,
        }));
        let job = recording_job(dir.path(), source, backend.clone());
        let request = join_request();

        job.run_attempt(&request, 0, &JobLogger::for_request(&request))
            .await
            .unwrap();

        assert_eq!(backend.uploaded(), vec![b"meeting-bytes".to_vec()]);
    }

    #[tokio::test]
    async fn test_command_source_permanent_exit_fails_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CommandSource::new(RecorderConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "exit 3".to_string()],
            max_duration: Duration::from_secs(30),
            permanent_exit_code: 3,
        }));
        let job = recording_job(dir.path(), source, Arc::new(MemoryBackend::default()));
        let request = join_request();

        let err = job
            .run_attempt(&request, 0, &JobLogger::for_request(&request))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_command_source_stops_at_max_duration() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackend::default());
        let source = Arc::new(CommandSource::new(RecorderConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "printf 'partial'; exec sleep 30".to_string()],
            max_duration: Duration::from_millis(500),
            permanent_exit_code: 3,
        }));
        let job = recording_job(dir.path(), source, backend.clone());
        let request = join_request();

        job.run_attempt(&request, 0, &JobLogger::for_request(&request))
            .await
            .unwrap();

        assert_eq!(backend.uploaded(), vec![b"partial".to_vec()]);
    }
}
