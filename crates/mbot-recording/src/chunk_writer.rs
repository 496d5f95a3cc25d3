//! Ordered, retrying persistence of streamed recording chunks.
//!
//! Chunks are appended to the staging file in exactly the order they were
//! saved. A single background loop per writer drains the queue; a chunk that
//! cannot be written goes back to the head of the queue so that order is kept.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::log_aggregator::LogAggregator;
use crate::metrics;
use crate::retry::FailureTracker;

/// Destination of chunk appends.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn append(&self, data: &[u8]) -> std::io::Result<()>;
}

/// Appends to a file, creating it on first write.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ChunkSink for FileSink {
    async fn append(&self, data: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let committed = file.metadata().await?.len();

        // tokio defers write errors to the next flush.
        let written = async {
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(e) = written {
            // Cut off a partial append so the retry does not duplicate bytes.
            if let Err(trim) = file.set_len(committed).await {
                warn!(
                    "Could not roll back partial write to {}: {}",
                    self.path.display(),
                    trim
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Chunk writer settings.
#[derive(Debug, Clone)]
pub struct ChunkWriterConfig {
    /// Retries per chunk after the first attempt
    pub max_retries: u32,
    /// Linear backoff unit: retry `n` waits `n × retry_delay`
    pub retry_delay: Duration,
    /// Consecutive failed chunks after which the writer gives up
    pub max_consecutive_failures: u32,
}

impl Default for ChunkWriterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(250),
            max_consecutive_failures: 5,
        }
    }
}

struct WriterState {
    queue: VecDeque<Bytes>,
    writing: bool,
    abandoned: bool,
    failures: FailureTracker,
    written: LogAggregator,
}

struct Inner {
    sink: Arc<dyn ChunkSink>,
    config: ChunkWriterConfig,
    label: String,
    state: Mutex<WriterState>,
    /// `true` while no drain loop is running
    idle: watch::Sender<bool>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the writing flag if the drain loop unwinds.
struct DrainGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.lock();
            state.writing = false;
            self.inner.idle.send_replace(true);
        }
    }
}

/// Queue-backed writer for one staging file.
#[derive(Clone)]
pub struct ChunkWriter {
    inner: Arc<Inner>,
}

impl ChunkWriter {
    pub fn new(sink: Arc<dyn ChunkSink>, config: ChunkWriterConfig, label: impl Into<String>) -> Self {
        let label = label.into();
        let (idle, _) = watch::channel(true);
        let max_failures = config.max_consecutive_failures;

        Self {
            inner: Arc::new(Inner {
                sink,
                config,
                state: Mutex::new(WriterState {
                    queue: VecDeque::new(),
                    writing: false,
                    abandoned: false,
                    failures: FailureTracker::new(max_failures),
                    written: LogAggregator::new(format!("Wrote staging chunk to disk for {}", label)),
                }),
                label,
                idle,
            }),
        }
    }

    /// Writer appending to a file.
    pub fn for_file(path: impl Into<PathBuf>, config: ChunkWriterConfig, label: impl Into<String>) -> Self {
        Self::new(Arc::new(FileSink::new(path)), config, label)
    }

    /// Queue a chunk for writing. Never blocks and never fails loudly.
    ///
    /// Returns `false` if the writer was abandoned or there is no runtime to
    /// drain the queue.
    pub fn save_chunk(&self, data: Bytes) -> bool {
        let mut state = self.inner.lock();
        if state.abandoned {
            warn!(label = %self.inner.label, "Dropping chunk, staging writer was abandoned");
            return false;
        }

        state.queue.push_back(data);
        if state.writing {
            return true;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                state.queue.pop_back();
                error!(label = %self.inner.label, "Unable to save chunk, no async runtime: {}", e);
                return false;
            }
        };

        state.writing = true;
        self.inner.idle.send_replace(false);
        drop(state);

        let inner = self.inner.clone();
        handle.spawn(async move { drain(&inner).await });
        true
    }

    /// Wait for the queue to drain and report whether every chunk landed.
    pub async fn finalize(&self) -> bool {
        let mut idle = self.inner.idle.subscribe();
        if !*idle.borrow() {
            info!(label = %self.inner.label, "Waiting on staging file writes");
        }
        // The sender lives in `inner`, so this only ends once idle.
        let _ = idle.wait_for(|idle| *idle).await;

        let run_again = {
            let mut state = self.inner.lock();
            if state.abandoned {
                return false;
            }
            if state.queue.is_empty() || state.writing {
                false
            } else {
                state.writing = true;
                self.inner.idle.send_replace(false);
                true
            }
        };
        if run_again {
            drain(&self.inner).await;
        }

        let state = self.inner.lock();
        let complete = !state.abandoned && state.queue.is_empty();
        if complete {
            info!(label = %self.inner.label, "Finished staging file writes");
        } else {
            error!(
                label = %self.inner.label,
                pending = state.queue.len(),
                "Staging file writes did not complete"
            );
        }
        complete
    }

    /// Log the aggregated write summary now.
    pub fn flush_logs(&self) {
        self.inner.lock().written.flush();
    }

    pub fn is_abandoned(&self) -> bool {
        self.inner.lock().abandoned
    }

    pub fn pending_chunks(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

async fn drain(inner: &Inner) {
    let mut guard = DrainGuard { inner, armed: true };

    loop {
        let chunk = {
            let mut state = inner.lock();
            match state.queue.pop_front() {
                Some(chunk) => chunk,
                None => {
                    state.writing = false;
                    state.written.flush();
                    inner.idle.send_replace(true);
                    guard.armed = false;
                    return;
                }
            }
        };

        match write_with_retries(inner, &chunk).await {
            Ok(()) => {
                let mut state = inner.lock();
                state.failures.record_success();
                state.written.record(chunk.len());
            }
            Err(e) => {
                metrics::record_chunk_write_failure();
                let mut state = inner.lock();
                state.queue.push_front(chunk);

                if state.failures.record_failure() {
                    let dropped = state.queue.len();
                    let dropped_bytes: usize = state.queue.iter().map(Bytes::len).sum();
                    state.queue.clear();
                    state.abandoned = true;
                    state.writing = false;
                    inner.idle.send_replace(true);
                    guard.armed = false;

                    metrics::record_writer_abandoned();
                    error!(
                        label = %inner.label,
                        failures = state.failures.failure_count(),
                        dropped,
                        dropped_bytes,
                        "Abandoning staging writes: {}", e
                    );
                    return;
                }

                info!(
                    label = %inner.label,
                    failures = state.failures.failure_count(),
                    "Temporarily stopped writing chunk, will retry: {}", e
                );
            }
        }
    }
}

async fn write_with_retries(inner: &Inner, chunk: &[u8]) -> std::io::Result<()> {
    let mut attempt = 0u32;
    loop {
        match inner.sink.append(chunk).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < inner.config.max_retries => {
                attempt += 1;
                error!(
                    label = %inner.label,
                    "Chunk write failed, retry {} of {}: {}", attempt, inner.config.max_retries, e
                );
                tokio::time::sleep(inner.config.retry_delay * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records appends in memory, failing the first `fail_first` calls.
    struct FlakySink {
        data: Mutex<Vec<u8>>,
        calls: AtomicU32,
        fail_first: u32,
    }

    impl FlakySink {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                data: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
                fail_first,
            })
        }

        fn contents(&self) -> Vec<u8> {
            self.data.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkSink for FlakySink {
        async fn append(&self, data: &[u8]) -> std::io::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(std::io::Error::other("disk busy"));
            }
            self.data.lock().unwrap().extend_from_slice(data);
            Ok(())
        }
    }

    fn fast_config() -> ChunkWriterConfig {
        ChunkWriterConfig {
            retry_delay: Duration::from_millis(1),
            ..ChunkWriterConfig::default()
        }
    }

    #[tokio::test]
    async fn test_chunks_are_written_in_order() {
        let sink = FlakySink::new(0);
        let writer = ChunkWriter::new(sink.clone(), fast_config(), "user-1");

        for chunk in [&b"one "[..], b"two ", b"three"] {
            assert!(writer.save_chunk(Bytes::copy_from_slice(chunk)));
        }

        assert!(writer.finalize().await);
        assert_eq!(sink.contents(), b"one two three");
    }

    #[tokio::test]
    async fn test_transient_failures_keep_order() {
        // Fails the first chunk's four attempts and the retry's first attempt.
        let sink = FlakySink::new(5);
        let writer = ChunkWriter::new(sink.clone(), fast_config(), "user-1");

        writer.save_chunk(Bytes::from_static(b"a"));
        writer.save_chunk(Bytes::from_static(b"b"));
        writer.save_chunk(Bytes::from_static(b"c"));

        assert!(writer.finalize().await);
        assert_eq!(sink.contents(), b"abc");
        assert!(!writer.is_abandoned());
    }

    #[tokio::test]
    async fn test_writer_is_abandoned_at_ceiling() {
        let sink = FlakySink::new(u32::MAX);
        let writer = ChunkWriter::new(sink.clone(), fast_config(), "user-1");

        writer.save_chunk(Bytes::from_static(b"a"));
        writer.save_chunk(Bytes::from_static(b"b"));

        assert!(!writer.finalize().await);
        assert!(writer.is_abandoned());
        assert_eq!(writer.pending_chunks(), 0);
        // 5 chunk failures × 4 attempts each
        assert_eq!(sink.calls.load(Ordering::SeqCst), 20);
        assert!(!writer.save_chunk(Bytes::from_static(b"late")));
    }

    #[tokio::test]
    async fn test_finalize_without_chunks() {
        let writer = ChunkWriter::new(FlakySink::new(0), fast_config(), "user-1");
        assert!(writer.finalize().await);
    }

    #[test]
    fn test_save_chunk_without_runtime() {
        let writer = ChunkWriter::new(FlakySink::new(0), fast_config(), "user-1");
        assert!(!writer.save_chunk(Bytes::from_static(b"a")));
        assert_eq!(writer.pending_chunks(), 0);
    }

    #[tokio::test]
    async fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.webm");
        let writer = ChunkWriter::for_file(&path, fast_config(), "user-1");

        writer.save_chunk(Bytes::from_static(b"hello "));
        writer.save_chunk(Bytes::from_static(b"world"));
        assert!(writer.finalize().await);

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    // Every write to /dev/full fails with ENOSPC once flushed.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_file_sink_reports_failed_write() {
        let sink = FileSink::new("/dev/full");
        assert!(sink.append(b"0123456789").await.is_err());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_full_disk_is_never_reported_complete() {
        let writer = ChunkWriter::for_file("/dev/full", fast_config(), "user-1");

        assert!(writer.save_chunk(Bytes::from_static(b"hello")));
        assert!(!writer.finalize().await);
        assert!(writer.is_abandoned());
    }
}
