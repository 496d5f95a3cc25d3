//! Single-flight job execution.
//!
//! The store runs at most one job at a time. Admission is a synchronous
//! check-and-set; the admitted job runs on a detached task with linear
//! backoff between attempts.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use mbot_models::Admission;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

use crate::config::JobStoreConfig;
use crate::error::{ErrorClass, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

type JobFn = dyn Fn(u32) -> BoxFuture<'static, WorkerResult<()>> + Send + Sync;

/// A unit of work: called once per attempt with the zero-based retry count.
pub struct Job {
    logger: JobLogger,
    run: Box<JobFn>,
}

impl Job {
    pub fn new<F, Fut>(logger: JobLogger, run: F) -> Self
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = WorkerResult<()>> + Send + 'static,
    {
        Self {
            logger,
            run: Box::new(move |attempt| run(attempt).boxed()),
        }
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }
}

struct Inner {
    running: watch::Sender<bool>,
    shutdown_requested: AtomicBool,
    config: JobStoreConfig,
}

/// Clears the running flag on every exit path of a job task, unwinding included.
struct RunningGuard(Arc<Inner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.send_replace(false);
        metrics::set_busy(false);
    }
}

/// Handle to the process-wide job slot. Clones share the slot.
#[derive(Clone)]
pub struct JobStore {
    inner: Arc<Inner>,
}

impl JobStore {
    pub fn new(config: JobStoreConfig) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                running,
                shutdown_requested: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Try to start `job`. Returns at once; the job runs in the background.
    pub fn admit(&self, job: Job) -> Admission {
        self.admit_with_retry(job, 0)
    }

    /// As [`Self::admit`], for a job that already used `retry_count` attempts.
    /// The first attempt runs with that count and the budget counts from it.
    pub fn admit_with_retry(&self, job: Job, retry_count: u32) -> Admission {
        let admission = self.try_admit(job, retry_count);
        metrics::record_admission(admission.accepted);
        admission
    }

    fn try_admit(&self, job: Job, retry_count: u32) -> Admission {
        if self.is_shutdown_requested() {
            info!("Rejecting job, shutdown requested");
            return Admission::rejected();
        }

        let claimed = self.inner.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !claimed {
            info!("Rejecting job, another job is running");
            return Admission::rejected();
        }

        // A shutdown may have landed between the check and the claim.
        if self.is_shutdown_requested() {
            self.inner.running.send_replace(false);
            return Admission::rejected();
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("Rejecting job, no async runtime to run it on");
                self.inner.running.send_replace(false);
                return Admission::rejected();
            }
        };

        metrics::set_busy(true);
        let guard = RunningGuard(Arc::clone(&self.inner));
        let span = job.logger().create_span();
        handle.spawn(
            async move {
                let guard = guard;
                execute_with_retry(&guard.0.config, job, retry_count).await;
            }
            .instrument(span),
        );

        Admission::accepted()
    }

    pub fn is_busy(&self) -> bool {
        *self.inner.running.borrow()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.inner.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs. The running job, if any, is left to finish.
    pub fn request_shutdown(&self) {
        if !self.inner.shutdown_requested.swap(true, Ordering::SeqCst) {
            info!(busy = self.is_busy(), "Job store shutdown requested");
        }
    }

    /// Resolve once no job is running.
    pub async fn wait_for_completion(&self) {
        let mut running = self.inner.running.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = running.wait_for(|running| !*running).await;
    }
}

/// Run attempts until success, a terminal error, or the attempt ceiling.
async fn execute_with_retry(config: &JobStoreConfig, job: Job, mut retry_count: u32) {
    let logger = job.logger.clone();
    let max_attempts = config.attempt_limit();

    loop {
        logger.log_start(&format!("attempt {}", retry_count + 1));

        let err = match (job.run)(retry_count).await {
            Ok(()) => {
                logger.log_completion(&format!("after {} attempt(s)", retry_count + 1));
                metrics::record_job_completed();
                return;
            }
            Err(e) => e,
        };

        let attempts = retry_count + 1;
        let terminal = match err.classify() {
            ErrorClass::NonRetryable => Some("non_retryable"),
            ErrorClass::Retryable { max_retries } if attempts >= max_retries => Some("budget_exhausted"),
            _ if attempts >= max_attempts => Some("max_attempts"),
            _ => None,
        };

        if let Some(reason) = terminal {
            logger.log_error(&format!(
                "failed after {} attempt(s) ({}): {}",
                attempts, reason, err
            ));
            metrics::record_job_failed(reason);
            return;
        }

        retry_count += 1;
        let delay = config.retry_backoff * retry_count;
        warn!(
            correlation_id = %logger.correlation_id(),
            retry = retry_count,
            delay_secs = delay.as_secs_f64(),
            "Job attempt failed, retrying: {}", err
        );
        metrics::record_job_retry();
        tokio::time::sleep(delay).await;
    }
}
