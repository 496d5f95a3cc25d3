//! Test doubles shared by the worker's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mbot_models::{JoinRequest, MeetingProvider, RecordedFile};
use mbot_queue::{MessageQueue, QueueError, QueueResult};
use mbot_recording::DiskUploader;
use mbot_storage::{
    FinalizeDetails, MultipartBackend, MultipartHandle, MultipartRequest, PartReceipt,
    StorageError, StorageResult,
};

use crate::error::WorkerResult;
use crate::source::RecordingSource;

pub fn join_request() -> JoinRequest {
    JoinRequest {
        bearer_token: "token".to_string(),
        url: "https://meet.google.com/abc-defg-hij".to_string(),
        name: "Notetaker".to_string(),
        team_id: "team-1".to_string(),
        timezone: "UTC".to_string(),
        user_id: "user-1".to_string(),
        provider: MeetingProvider::Google,
        event_id: None,
        bot_id: Some("bot-1".to_string()),
    }
}

/// Multipart backend that keeps parts in memory.
#[derive(Default)]
pub struct MemoryBackend {
    fail: bool,
    parts: Mutex<HashMap<String, Vec<(u32, Bytes)>>>,
    uploaded: Mutex<Vec<Vec<u8>>>,
}

impl MemoryBackend {
    /// A backend whose sessions can never be opened.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Contents of every finalized object, in order.
    pub fn uploaded(&self) -> Vec<Vec<u8>> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl MultipartBackend for MemoryBackend {
    async fn initialize(&self, _request: &MultipartRequest) -> StorageResult<MultipartHandle> {
        if self.fail {
            return Err(StorageError::upload_failed("storage unavailable"));
        }
        let mut parts = self.parts.lock().unwrap();
        let upload_id = format!("upload-{}", parts.len() + 1);
        parts.insert(upload_id.clone(), Vec::new());
        Ok(MultipartHandle {
            file_id: "file-1".to_string(),
            upload_id,
        })
    }

    async fn part_upload_url(
        &self,
        _request: &MultipartRequest,
        handle: &MultipartHandle,
        _part_number: u32,
    ) -> StorageResult<String> {
        Ok(handle.upload_id.clone())
    }

    async fn upload_part(
        &self,
        _request: &MultipartRequest,
        url: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<PartReceipt> {
        self.parts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push((part_number, data));
        Ok(PartReceipt {
            part_number,
            etag: None,
        })
    }

    async fn finalize(
        &self,
        _request: &MultipartRequest,
        handle: &MultipartHandle,
        _parts: &[PartReceipt],
        details: &FinalizeDetails,
    ) -> StorageResult<RecordedFile> {
        let parts = self
            .parts
            .lock()
            .unwrap()
            .remove(&handle.upload_id)
            .unwrap_or_default();
        let object = parts.iter().flat_map(|(_, data)| data.iter().copied()).collect();
        self.uploaded.lock().unwrap().push(object);

        Ok(RecordedFile {
            id: handle.file_id.clone(),
            name: details.name.clone(),
            size: None,
            provider_key: None,
            url: None,
        })
    }
}

/// Source that emits fixed chunks.
#[derive(Default)]
pub struct StaticSource {
    chunks: Vec<Vec<u8>>,
}

impl StaticSource {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }
}

#[async_trait]
impl RecordingSource for StaticSource {
    async fn record(&self, _request: &JoinRequest, sink: &DiskUploader) -> WorkerResult<()> {
        for chunk in &self.chunks {
            sink.save_chunk(Bytes::from(chunk.clone()));
        }
        Ok(())
    }
}

/// In-memory FIFO standing in for the Redis list.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<String>>,
    closed: Mutex<bool>,
    /// Transport errors to return before serving messages
    errors: Mutex<u32>,
}

impl MemoryQueue {
    pub fn with_messages<I: IntoIterator<Item = &'static str>>(messages: I) -> Self {
        Self {
            messages: Mutex::new(messages.into_iter().map(str::to_string).collect()),
            ..Self::default()
        }
    }

    pub fn fail_next(&self, count: u32) {
        *self.errors.lock().unwrap() = count;
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().iter().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn dequeue_with_timeout(&self, timeout: Duration) -> QueueResult<Option<String>> {
        {
            let mut errors = self.errors.lock().unwrap();
            if *errors > 0 {
                *errors -= 1;
                return Err(QueueError::DequeueFailed("connection reset".to_string()));
            }
        }
        let message = self.messages.lock().unwrap().pop_front();
        if message.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(message)
    }

    async fn requeue_to_head(&self, message: &str) -> QueueResult<()> {
        self.messages.lock().unwrap().push_front(message.to_string());
        Ok(())
    }

    async fn close(&self) -> QueueResult<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}
