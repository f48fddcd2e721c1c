//! Shared helpers for the API integration tests.
//!
//! Builds the real router on top of the in-memory adapters so the tests need
//! no database or delivery gateway.

#![allow(dead_code)]

use std::sync::Arc;

use api_lib::config::Config;
use api_lib::web::{router, AppState};
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use chrono::{Duration, NaiveTime, Utc};
use engagement_core::detector::TriggerDetector;
use engagement_core::domain::{ClientProfile, ClientReminderSettings};
use engagement_core::memory::{MemoryClients, MemoryStore, RecordingSender};
use engagement_core::ports::ReminderStore;
use engagement_core::scheduler::{ReminderScheduler, SchedulerConfig};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub clients: Arc<MemoryClients>,
    pub sender: Arc<RecordingSender>,
}

/// Build the application router over fresh in-memory state.
pub fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clients = Arc::new(MemoryClients::new());
    let sender = Arc::new(RecordingSender::new());

    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        clients.clone(),
        clients.clone(),
        sender.clone(),
        TriggerDetector::default(),
        SchedulerConfig::default(),
    ));
    let state = Arc::new(AppState {
        store: store.clone(),
        directory: clients.clone(),
        scheduler,
        config: Arc::new(Config::default()),
    });

    TestApp {
        router: router(state),
        store,
        clients,
        sender,
    }
}

impl TestApp {
    /// Registers a client who has logged nothing for ten days.
    pub async fn add_idle_client(&self) -> Uuid {
        self.register_client(Uuid::new_v4()).await
    }

    /// Like [`add_idle_client`](Self::add_idle_client), with default settings
    /// except that quiet hours are switched off so results do not depend on
    /// the wall clock.
    pub async fn add_idle_client_with_settings(&self) -> Uuid {
        let coach_id = Uuid::new_v4();
        let id = self.register_client(coach_id).await;
        let mut settings = ClientReminderSettings::with_defaults(id, coach_id, Utc::now());
        settings.quiet_hours_start = NaiveTime::MIN;
        settings.quiet_hours_end = NaiveTime::MIN;
        self.store.save_settings(&settings).await.unwrap();
        id
    }

    async fn register_client(&self, coach_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.clients
            .add_client(ClientProfile {
                id,
                coach_id,
                display_name: Some("Jordan Reyes".to_string()),
                utc_offset_minutes: 0,
                created_at: Utc::now() - Duration::days(10),
            })
            .await;
        id
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        send(self.router.clone(), Method::GET, uri, Body::empty()).await
    }

    pub async fn post_json(&self, uri: &str, json: serde_json::Value) -> Response<Body> {
        send(
            self.router.clone(),
            Method::POST,
            uri,
            Body::from(json.to_string()),
        )
        .await
    }

    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        send(self.router.clone(), Method::POST, uri, Body::empty()).await
    }

    pub async fn patch_json(&self, uri: &str, json: serde_json::Value) -> Response<Body> {
        send(
            self.router.clone(),
            Method::PATCH,
            uri,
            Body::from(json.to_string()),
        )
        .await
    }
}

async fn send(app: Router, method: Method, uri: &str, body: Body) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Assert the status and return the parsed body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> serde_json::Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}
