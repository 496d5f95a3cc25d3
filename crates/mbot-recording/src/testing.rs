//! In-memory multipart backend for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use mbot_models::RecordedFile;
use mbot_storage::{
    FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
    StorageError, StorageResult,
};

#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    Transient,
    SessionLost,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    pub sessions: Vec<String>,
    /// (upload id, part number, bytes) of every successful part PUT
    pub parts: Vec<(String, u32, Bytes)>,
    /// (upload id, part numbers) of every commit
    pub finalized: Vec<(String, Vec<u32>)>,
    /// Upload ids released through `abort`
    pub aborted: Vec<String>,
    pub part_attempts: u32,
    failures: Vec<(u32, FailureKind)>,
    finalize_failure: Option<FailureKind>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    pub state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Fail the next upload of `part_number` with `kind`. Stacks.
    pub fn fail_part(&self, part_number: u32, kind: FailureKind) {
        self.state.lock().unwrap().failures.push((part_number, kind));
    }

    /// Fail the next commit with `kind`.
    pub fn fail_finalize(&self, kind: FailureKind) {
        self.state.lock().unwrap().finalize_failure = Some(kind);
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl MultipartBackend for MemoryBackend {
    async fn initialize(&self, _request: &MultipartRequest) -> StorageResult<MultipartHandle> {
        let mut state = self.state.lock().unwrap();
        let upload_id = format!("upload-{}", state.sessions.len() + 1);
        state.sessions.push(upload_id.clone());
        Ok(MultipartHandle {
            file_id: "file-1".to_string(),
            upload_id,
        })
    }

    async fn part_upload_url(
        &self,
        _request: &MultipartRequest,
        handle: &MultipartHandle,
        part_number: u32,
    ) -> StorageResult<String> {
        Ok(format!("mem://{}/{}", handle.upload_id, part_number))
    }

    async fn upload_part(
        &self,
        _request: &MultipartRequest,
        url: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartReceipt> {
        let mut state = self.state.lock().unwrap();
        state.part_attempts += 1;

        if let Some(index) = state.failures.iter().position(|(p, _)| *p == part_number) {
            let (_, kind) = state.failures.remove(index);
            return Err(failure(kind));
        }

        let upload_id = url
            .trim_start_matches("mem://")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        state.parts.push((upload_id, part_number, data));
        Ok(PartReceipt {
            part_number,
            etag: Some(format!("etag-{}", part_number)),
        })
    }

    async fn finalize(
        &self,
        _request: &MultipartRequest,
        handle: &MultipartHandle,
        parts: &[PartReceipt],
        details: &FinalizeDetails,
    ) -> StorageResult<RecordedFile> {
        let mut state = self.state.lock().unwrap();
        if let Some(kind) = state.finalize_failure.take() {
            return Err(failure(kind));
        }
        state.finalized.push((
            handle.upload_id.clone(),
            parts.iter().map(|p| p.part_number).collect(),
        ));
        Ok(RecordedFile {
            id: handle.file_id.clone(),
            name: details.name.clone(),
            size: None,
            provider_key: None,
            url: None,
        })
    }

    async fn abort(&self, _request: &MultipartRequest, handle: &MultipartHandle) -> StorageResult<()> {
        self.state.lock().unwrap().aborted.push(handle.upload_id.clone());
        Ok(())
    }
}

fn failure(kind: FailureKind) -> StorageError {
    match kind {
        FailureKind::Transient => StorageError::from_http_status(503, "unavailable"),
        FailureKind::SessionLost => {
            StorageError::from_http_status(404, "<Error><Code>NoSuchUpload</Code></Error>")
        }
    }
}
