//! Bridge from the job queue to the JobStore.

use std::sync::Arc;
use std::time::Duration;

use mbot_models::JoinRequest;
use mbot_queue::MessageQueue;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::job_store::JobStore;
use crate::metrics;
use crate::recording_job::JobFactory;

/// Pause after a transport error.
const TRANSPORT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// What happened to one dequeued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Admitted,
    /// Pushed back to the head of the queue
    Requeued,
    /// Unparseable, dropped
    Dropped,
}

/// Pops join requests and admits them one at a time.
pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    store: JobStore,
    factory: Arc<dyn JobFactory>,
    poll_timeout: Duration,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        store: JobStore,
        factory: Arc<dyn JobFactory>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            factory,
            poll_timeout,
        }
    }

    /// Consume until `shutdown` flips to true, then drain: stop accepting,
    /// wait for the running job and close the transport.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_timeout_secs = self.poll_timeout.as_secs(), "Queue consumer started");

        while !*shutdown.borrow() {
            if self.store.is_busy() {
                tokio::select! {
                    _ = self.store.wait_for_completion() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            // Not raced against shutdown: a popped message must reach admit or requeue.
            match self.queue.dequeue_with_timeout(self.poll_timeout).await {
                Ok(Some(message)) => {
                    self.handle_message(&message).await;
                }
                Ok(None) => debug!("No join request within poll timeout"),
                Err(e) => {
                    error!("Failed to dequeue join request: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(TRANSPORT_ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Parse, build and admit one message.
    pub async fn handle_message(&self, message: &str) -> Delivery {
        let request = match JoinRequest::from_json(message) {
            Ok(request) => request,
            Err(e) => {
                warn!(bytes = message.len(), "Dropping malformed join request: {}", e);
                metrics::record_malformed_message();
                return Delivery::Dropped;
            }
        };

        let user_id = request.user_id.clone();
        let admission = self.store.admit(self.factory.build(request));
        if admission.accepted {
            info!(user_id = %user_id, "Join request admitted");
            return Delivery::Admitted;
        }

        if let Err(e) = self.queue.requeue_to_head(message).await {
            error!(user_id = %user_id, "Failed to requeue rejected join request: {}", e);
        } else {
            debug!(user_id = %user_id, "Join request requeued");
        }
        Delivery::Requeued
    }

    async fn shutdown(&self) {
        info!("Queue consumer stopping");
        self.store.request_shutdown();
        self.store.wait_for_completion().await;
        if let Err(e) = self.queue.close().await {
            warn!("Failed to close queue transport: {}", e);
        }
        info!("Queue consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobStoreConfig;
    use crate::job_store::Job;
    use crate::logging::JobLogger;
    use crate::testing::{join_request, MemoryQueue};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Factory whose jobs wait on a gate and report the user they ran for.
    #[derive(Default)]
    struct GatedFactory {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        ran: Arc<Mutex<Vec<String>>>,
    }

    impl JobFactory for GatedFactory {
        fn build(&self, request: JoinRequest) -> Job {
            let gate = Mutex::new(self.gate.lock().unwrap().take());
            let ran = Arc::clone(&self.ran);
            let user_id = request.user_id.clone();
            Job::new(JobLogger::for_request(&request), move |_| {
                let gate = gate.lock().unwrap().take();
                let ran = Arc::clone(&ran);
                let user_id = user_id.clone();
                async move {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    ran.lock().unwrap().push(user_id);
                    Ok(())
                }
            })
        }
    }

    fn message(user_id: &str) -> String {
        let mut request = join_request();
        request.user_id = user_id.to_string();
        request.to_json().unwrap()
    }

    fn consumer(queue: Arc<MemoryQueue>, store: JobStore, factory: Arc<GatedFactory>) -> QueueConsumer {
        QueueConsumer::new(queue, store, factory, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let queue = Arc::new(MemoryQueue::default());
        let store = JobStore::new(JobStoreConfig::default());
        let consumer = consumer(queue.clone(), store.clone(), Arc::new(GatedFactory::default()));

        assert_eq!(consumer.handle_message("{not json").await, Delivery::Dropped);
        assert!(queue.messages().is_empty());
        assert!(!store.is_busy());
    }

    #[tokio::test]
    async fn test_rejected_message_returns_to_head() {
        let queue = Arc::new(MemoryQueue::default());
        queue.requeue_to_head(&message("next")).await.unwrap();
        let store = JobStore::new(JobStoreConfig::default());
        let (release, gate) = oneshot::channel();
        let factory = Arc::new(GatedFactory {
            gate: Mutex::new(Some(gate)),
            ..GatedFactory::default()
        });
        let consumer = consumer(queue.clone(), store.clone(), factory.clone());

        assert_eq!(consumer.handle_message(&message("first")).await, Delivery::Admitted);
        assert_eq!(consumer.handle_message(&message("second")).await, Delivery::Requeued);
        assert_eq!(queue.messages(), vec![message("second"), message("next")]);

        release.send(()).unwrap();
        store.wait_for_completion().await;
        assert_eq!(*factory.ran.lock().unwrap(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_and_requeues() {
        let queue = Arc::new(MemoryQueue::default());
        let store = JobStore::new(JobStoreConfig::default());
        let consumer = consumer(queue.clone(), store.clone(), Arc::new(GatedFactory::default()));

        store.request_shutdown();
        assert_eq!(consumer.handle_message(&message("late")).await, Delivery::Requeued);
        assert_eq!(queue.messages(), vec![message("late")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_processes_queue_in_order_then_drains_on_shutdown() {
        let queue = Arc::new(MemoryQueue::default());
        for user in ["a", "b", "c"] {
            queue.requeue_to_head(&message(user)).await.unwrap();
        }
        let store = JobStore::new(JobStoreConfig::default());
        let factory = Arc::new(GatedFactory::default());
        let consumer = Arc::new(consumer(queue.clone(), store.clone(), factory.clone()));
        let (stop, shutdown) = watch::channel(false);

        let task = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        while factory.ran.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(*factory.ran.lock().unwrap(), vec!["c", "b", "a"]);
        assert!(queue.is_closed());
        assert!(store.is_shutdown_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_backs_off() {
        let queue = Arc::new(MemoryQueue::default());
        queue.fail_next(1);
        queue.requeue_to_head(&message("a")).await.unwrap();
        let store = JobStore::new(JobStoreConfig::default());
        let factory = Arc::new(GatedFactory::default());
        let consumer = Arc::new(consumer(queue.clone(), store, factory.clone()));
        let (stop, shutdown) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let task = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.run(shutdown).await })
        };

        while factory.ran.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(started.elapsed() >= TRANSPORT_ERROR_BACKOFF);

        stop.send(true).unwrap();
        task.await.unwrap();
    }
}
