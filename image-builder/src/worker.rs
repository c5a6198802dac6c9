//! Consumer side: the build worker poll loop.
//!
//! The worker polls the build queue one message at a time, runs the build
//! routine to completion and only then polls again. There is no internal
//! parallelism; the queue absorbs bursts.
//!
//! Failure handling in steady state never stops the loop:
//! - consume errors are logged and retried with exponential backoff
//! - malformed bodies are logged and dropped (no dead-lettering)
//! - a panicking build routine is logged and the next message is polled

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::build::{BuildId, BuildRequest};
use crate::queue::MessageConsumer;

/// The long-running build step invoked for every request.
///
/// Outcomes are not reported back to the submitter.
#[async_trait]
pub trait BuildRoutine: Send + Sync {
    async fn process(&self, request: BuildRequest);
}

/// Stand-in for image generation: logs and sleeps.
#[derive(Debug, Clone)]
pub struct StubBuildRoutine {
    duration: Duration,
}

impl StubBuildRoutine {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl BuildRoutine for StubBuildRoutine {
    async fn process(&self, request: BuildRequest) {
        let image_id = request.image_id().map(BuildId::to_string).unwrap_or_default();

        info!(
            image_id = %image_id,
            duration_ms = self.duration.as_millis() as u64,
            "image_generation_started"
        );

        sleep(self.duration).await;

        info!(image_id = %image_id, "image_generation_finished");
    }
}

/// Timing knobs for [`BuildWorker`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub queue: String,
    /// Pause after polling an empty queue.
    pub poll_interval: Duration,
    /// Upper bound for the pause after consecutive consume errors.
    pub backoff_max: Duration,
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Queue was empty.
    Idle,
    /// A request was handed to the build routine.
    Built(Option<BuildId>),
    /// A message arrived but could not be parsed; it is gone.
    Dropped,
    /// The consume itself failed.
    Failed,
}

pub struct BuildWorker {
    consumer: Arc<dyn MessageConsumer>,
    routine: Arc<dyn BuildRoutine>,
    settings: WorkerSettings,
}

impl BuildWorker {
    pub fn new(
        consumer: Arc<dyn MessageConsumer>,
        routine: Arc<dyn BuildRoutine>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            consumer,
            routine,
            settings,
        }
    }

    /// Poll the queue once and run the build routine if a request arrived.
    pub async fn poll_once(&self) -> PollOutcome {
        let queue = self.settings.queue.as_str();

        let message = match self.consumer.consume_one(queue).await {
            Ok(Some(message)) => message,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                error!(queue = queue, error = %e, "build_queue_consume_failed");
                return PollOutcome::Failed;
            }
        };

        info!(
            queue = queue,
            delivery_tag = message.delivery_tag,
            body_length = message.body.len(),
            "build_request_received"
        );

        let request = match BuildRequest::from_body(&message.body) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    queue = queue,
                    delivery_tag = message.delivery_tag,
                    error = %e,
                    body_preview = %message.preview(500),
                    "build_request_parse_failed"
                );
                return PollOutcome::Dropped;
            }
        };

        let image_id = request.image_id().cloned();
        let routine = Arc::clone(&self.routine);

        // Own task so a panic in the routine surfaces as a JoinError here.
        let build = tokio::spawn(async move { routine.process(request).await });

        if let Err(e) = build.await {
            error!(
                image_id = ?image_id,
                error = %e,
                "build_routine_panicked"
            );
        } else {
            info!(image_id = ?image_id, "build_request_completed");
        }

        PollOutcome::Built(image_id)
    }

    /// Poll until `shutdown` becomes `true` or its sender is dropped.
    ///
    /// A build in progress is always allowed to finish; the signal is
    /// observed between polls and while sleeping.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.settings.queue, "build_worker_started");

        let mut backoff = Backoff::new(self.settings.poll_interval, self.settings.backoff_max);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.poll_once().await {
                PollOutcome::Built(_) | PollOutcome::Dropped => {
                    backoff.reset();
                    None
                }
                PollOutcome::Idle => {
                    backoff.reset();
                    Some(self.settings.poll_interval)
                }
                PollOutcome::Failed => Some(backoff.next_delay()),
            };

            if let Some(pause) = pause {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(pause) => {}
                }
            }
        }

        info!(queue = %self.settings.queue, "build_worker_stopped");
    }
}

/// Doubling delay, starting at `initial` and capped at `max`.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::queue::{ConsumeError, MemoryBroker, Message, MessagePublisher, Topology};

    #[derive(Default)]
    struct RecordingRoutine {
        seen: Mutex<Vec<BuildRequest>>,
    }

    impl RecordingRoutine {
        fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BuildRoutine for RecordingRoutine {
        async fn process(&self, request: BuildRequest) {
            self.seen.lock().unwrap().push(request);
        }
    }

    struct PanickingRoutine;

    #[async_trait]
    impl BuildRoutine for PanickingRoutine {
        async fn process(&self, _request: BuildRequest) {
            panic!("generator crashed");
        }
    }

    struct FlakyConsumer;

    #[async_trait]
    impl MessageConsumer for FlakyConsumer {
        async fn consume_one(&self, _queue: &str) -> Result<Option<Message>, ConsumeError> {
            Err(ConsumeError::Unavailable("connection reset".to_string()))
        }

        async fn consume_all(&self, _queue: &str) -> Result<Vec<Vec<u8>>, ConsumeError> {
            Err(ConsumeError::Unavailable("connection reset".to_string()))
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            queue: "buildQueue".to_string(),
            poll_interval: Duration::from_millis(5),
            backoff_max: Duration::from_millis(20),
        }
    }

    fn worker(consumer: Arc<dyn MessageConsumer>, routine: Arc<dyn BuildRoutine>) -> BuildWorker {
        BuildWorker::new(consumer, routine, settings())
    }

    #[tokio::test]
    async fn test_empty_queue_polls_are_idle() {
        let broker = MemoryBroker::with_topology(&Topology::default());
        let routine = Arc::new(RecordingRoutine::default());
        let worker = worker(Arc::new(broker), routine.clone());

        for _ in 0..100 {
            assert_eq!(worker.poll_once().await, PollOutcome::Idle);
        }
        assert_eq!(routine.count(), 0);
    }

    #[tokio::test]
    async fn test_valid_request_reaches_routine() {
        let broker = MemoryBroker::with_topology(&Topology::default());
        broker
            .publish_to_queue(br#"{"architecture":"x86_64","imageId":"a1b2c3"}"#, "buildQueue")
            .await
            .unwrap();
        let routine = Arc::new(RecordingRoutine::default());
        let worker = worker(Arc::new(broker), routine.clone());

        let outcome = worker.poll_once().await;

        assert_eq!(outcome, PollOutcome::Built(Some(BuildId::new("a1b2c3"))));
        let seen = routine.seen.lock().unwrap();
        assert_eq!(seen[0].config()["architecture"], "x86_64");
    }

    #[tokio::test]
    async fn test_malformed_body_is_dropped() {
        let broker = MemoryBroker::with_topology(&Topology::default());
        broker.publish_to_queue(b"{not json", "buildQueue").await.unwrap();
        let routine = Arc::new(RecordingRoutine::default());
        let worker = worker(Arc::new(broker.clone()), routine.clone());

        assert_eq!(worker.poll_once().await, PollOutcome::Dropped);
        assert_eq!(routine.count(), 0);
        assert_eq!(broker.queue_len("buildQueue"), Some(0));
    }

    #[tokio::test]
    async fn test_consume_error_is_not_fatal() {
        let routine = Arc::new(RecordingRoutine::default());
        let worker = worker(Arc::new(FlakyConsumer), routine.clone());

        for _ in 0..3 {
            assert_eq!(worker.poll_once().await, PollOutcome::Failed);
        }
        assert_eq!(routine.count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_routine_does_not_kill_worker() {
        let broker = MemoryBroker::with_topology(&Topology::default());
        broker.publish_to_queue(b"{}", "buildQueue").await.unwrap();
        let worker = worker(Arc::new(broker), Arc::new(PanickingRoutine));

        assert_eq!(worker.poll_once().await, PollOutcome::Built(None));
        assert_eq!(worker.poll_once().await, PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let broker = MemoryBroker::with_topology(&Topology::default());
        let routine = Arc::new(RecordingRoutine::default());
        let worker = Arc::new(worker(Arc::new(broker.clone()), routine.clone()));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run(rx).await }
        });

        broker.publish_to_queue(b"{\"imageId\":\"zzzzzz\"}", "buildQueue").await.unwrap();

        for _ in 0..200 {
            if routine.count() == 1 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(routine.count(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let worker = worker(Arc::new(FlakyConsumer), Arc::new(RecordingRoutine::default()));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), worker.run(rx))
            .await
            .expect("worker did not stop");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));

        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
