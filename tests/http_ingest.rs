//! Integration tests for the HTTP ingest routes.
//!
//! Each test spins up an Axum server on a random port backed by a real
//! coordinator whose combine tasks go to a recording queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::timeout;

use assist_relay::coordinator::{DebounceCoordinator, PendingBuffer};
use assist_relay::error::JobError;
use assist_relay::store::{InMemoryAbortBus, InMemoryListStore};
use assist_relay::transport::ingest_routes;
use assist_relay::worker::{DelayedTaskQueue, ScheduledTask};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingQueue {
    tasks: Mutex<Vec<ScheduledTask>>,
}

#[async_trait]
impl DelayedTaskQueue for RecordingQueue {
    async fn schedule(&self, task: ScheduledTask) -> Result<(), JobError> {
        self.tasks.lock().await.push(task);
        Ok(())
    }
}

/// Start the ingest router on a random port, return (base url, buffer, queue).
async fn start_server() -> (String, PendingBuffer, Arc<RecordingQueue>) {
    let buffer = PendingBuffer::new(Arc::new(InMemoryListStore::new()));
    let queue = Arc::new(RecordingQueue::default());
    let coordinator = Arc::new(DebounceCoordinator::new(
        buffer.clone(),
        Arc::new(InMemoryAbortBus::new()),
        queue.clone(),
        Duration::from_millis(250),
    ));
    let app = ingest_routes(coordinator);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), buffer, queue)
}

#[tokio::test]
async fn health_returns_ok() {
    timeout(TEST_TIMEOUT, async {
        let (base, _, _) = start_server().await;
        let body = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn post_message_buffers_and_arms_combine_task() {
    timeout(TEST_TIMEOUT, async {
        let (base, buffer, queue) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/messages"))
            .json(&serde_json::json!({
                "user_id": "u1",
                "text": "hello over http",
                "message_id": "h-1",
                "source": "Webhook"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["accepted"], true);
        assert_eq!(body["message_id"], "h-1");

        let pending = buffer.drain("u1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "hello over http");
        assert_eq!(pending[0].source_label, "Webhook");

        let tasks = queue.tasks.lock().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].dedup_id, "combine:u1");
        assert_eq!(tasks[0].payload["chat_id"], "u1");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn missing_message_id_is_generated() {
    timeout(TEST_TIMEOUT, async {
        let (base, buffer, _) = start_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/messages"))
            .json(&serde_json::json!({ "user_id": "u2", "chat_id": "room", "text": "hi" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = resp.json().await.unwrap();
        let id = body["message_id"].as_str().unwrap();
        assert!(!id.is_empty());

        let pending = buffer.drain("u2").await.unwrap();
        assert_eq!(pending[0].source_message_id, id);
        assert_eq!(pending[0].source_label, "HTTP");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn blank_text_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let (base, buffer, queue) = start_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/api/messages"))
            .json(&serde_json::json!({ "user_id": "u3", "text": "   " }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert!(buffer.drain("u3").await.unwrap().is_empty());
        assert!(queue.tasks.lock().await.is_empty());
    })
    .await
    .expect("test timed out");
}
