//! End-to-end pipeline tests over the in-memory broker.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use imagebuilder::build::SequenceIdGenerator;
use imagebuilder::worker::PollOutcome;
use imagebuilder::{
    BuildId, BuildRequest, BuildRoutine, BuildWorker, MemoryBroker, MessageConsumer,
    MessagePublisher, SubmissionService, Topology, WorkerSettings,
};

#[derive(Default)]
struct RecordingRoutine {
    seen: Mutex<Vec<BuildRequest>>,
}

#[async_trait]
impl BuildRoutine for RecordingRoutine {
    async fn process(&self, request: BuildRequest) {
        self.seen.lock().unwrap().push(request);
    }
}

fn request(value: Value) -> BuildRequest {
    match value {
        Value::Object(map) => BuildRequest::from_config(map),
        _ => panic!("Expected object"),
    }
}

fn pipeline() -> (MemoryBroker, SubmissionService, BuildWorker, Arc<RecordingRoutine>) {
    let broker = MemoryBroker::with_topology(&Topology::default());
    let service = SubmissionService::new(
        Arc::new(broker.clone()),
        Arc::new(SequenceIdGenerator::new()),
        "buildQueue",
    );
    let routine = Arc::new(RecordingRoutine::default());
    let worker = BuildWorker::new(
        Arc::new(broker.clone()),
        routine.clone(),
        WorkerSettings {
            queue: "buildQueue".to_string(),
            poll_interval: std::time::Duration::from_millis(5),
            backoff_max: std::time::Duration::from_millis(50),
        },
    );
    (broker, service, worker, routine)
}

#[tokio::test]
async fn submit_enqueues_exactly_one_message() {
    let (broker, service, _worker, _routine) = pipeline();

    let id = service
        .submit(request(json!({"architecture": "aarch64-uefi"})))
        .await
        .unwrap();

    assert!(!id.as_str().is_empty());
    let queued = broker.peek("buildQueue");
    assert_eq!(queued.len(), 1);

    let body: Value = serde_json::from_slice(&queued[0]).unwrap();
    assert_eq!(body["architecture"], "aarch64-uefi");
    assert_eq!(body["imageId"], id.as_str());
}

#[tokio::test]
async fn submitted_id_reaches_the_build_routine() {
    let (_broker, service, worker, routine) = pipeline();

    let id = service
        .submit(request(json!({"architecture": "x86_64", "desktop": "kde"})))
        .await
        .unwrap();

    assert_eq!(worker.poll_once().await, PollOutcome::Built(Some(id.clone())));

    let seen = routine.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].image_id(), Some(&id));
    assert_eq!(seen[0].config()["desktop"], "kde");
}

#[tokio::test]
async fn ids_are_unique_across_many_submissions() {
    let (broker, service, _worker, _routine) = pipeline();

    let mut ids = std::collections::HashSet::<BuildId>::new();
    for _ in 0..500 {
        let id = service.submit(request(json!({"architecture": "x86_64"}))).await.unwrap();
        assert!(ids.insert(id));
    }
    assert_eq!(broker.queue_len("buildQueue"), Some(500));
}

#[tokio::test]
async fn idle_worker_never_invokes_routine() {
    let (_broker, _service, worker, routine) = pipeline();

    for _ in 0..100 {
        assert_eq!(worker.poll_once().await, PollOutcome::Idle);
    }
    assert!(routine.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn consume_all_returns_available_batch_once() {
    let (broker, service, _worker, _routine) = pipeline();

    for arch in ["x86_64", "aarch64-uefi", "ppc64le"] {
        service.submit(request(json!({"architecture": arch}))).await.unwrap();
    }

    let batch = broker.consume_all("buildQueue").await.unwrap();
    assert_eq!(batch.len(), 3);
    for body in &batch {
        assert!(BuildRequest::from_body(body).unwrap().image_id().is_some());
    }

    assert!(broker.consume_all("buildQueue").await.unwrap().is_empty());
}

#[tokio::test]
async fn status_exchange_routes_to_bound_queue() {
    let (broker, _service, _worker, _routine) = pipeline();
    broker
        .create_and_bind("status.a1b2c3", "status", "a1b2c3")
        .unwrap();

    broker
        .publish_to_exchange(br#"{"imageId":"a1b2c3","state":"done"}"#, "status", "a1b2c3")
        .await
        .unwrap();

    let message = broker.consume_one("status.a1b2c3").await.unwrap().unwrap();
    let body: Value = serde_json::from_slice(&message.body).unwrap();
    assert_eq!(body["state"], "done");
    assert!(broker.consume_one("status.a1b2c3").await.unwrap().is_none());
}
