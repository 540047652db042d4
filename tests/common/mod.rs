//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use rfid_ledger::infra::{LedgerHandles, NotifyError, SqliteScanLedger, StatusPublisher};
use rfid_ledger::server::AppState;
use rfid_ledger::TagCode;

/// Tag registered by most fixtures
pub const REGISTERED_TAG: &str = "22C19E7A";

/// Tag that is never registered
pub const UNKNOWN_TAG: &str = "ZZZZ0000";

pub fn tag(raw: &str) -> TagCode {
    TagCode::parse(raw).unwrap()
}

/// Fresh, migrated in-memory ledger
pub async fn memory_ledger() -> SqliteScanLedger {
    SqliteScanLedger::in_memory().await.unwrap()
}

/// Publisher that remembers every (topic, payload) it was asked to send
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn payloads(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), NotifyError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Publisher simulating a broker outage
pub struct FailingPublisher;

#[async_trait]
impl StatusPublisher for FailingPublisher {
    async fn publish(&self, _topic: &str, _payload: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Publish("connection refused".to_string()))
    }
}

/// App state over a fresh in-memory ledger with `REGISTERED_TAG` registered
pub async fn registered_state(publisher: Arc<dyn StatusPublisher>) -> AppState {
    let handles = LedgerHandles::from_ledger(memory_ledger().await);
    handles.admin.register(&tag(REGISTERED_TAG)).await.unwrap();
    AppState::new(handles, publisher)
}
