//! `NetworkClient` (spec §6): the out-of-scope anonymizing transport, named
//! here as a trait plus an in-memory mock for tests and `dev` tooling —
//! grounded on the teacher's `Commands::Dev` mock-data subcommands
//! (`cli/src/main.rs`).

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::WotError;

pub type SubscriptionHandle = u64;

/// One decoded event from a fast-downloader subscription (spec §4.5).
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub edition: u64,
    pub raw_document: Vec<u8>,
}

#[async_trait]
pub trait NetworkClient: Send + Sync {
    async fn subscribe(&self, request_key: &str) -> Result<SubscriptionHandle, WotError>;
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), WotError>;
    async fn poll_subscription(&self, handle: SubscriptionHandle) -> Result<Option<FetchEvent>, WotError>;
    async fn fetch(&self, request_key: &str, edition: u64) -> Result<Vec<u8>, WotError>;
    async fn insert(&self, insert_key: &str, edition: u64, bytes: &[u8]) -> Result<(), WotError>;
}

/// Deterministic in-memory transport used by tests and by the CLI's `dev`
/// subcommands; never touches the real anonymizing network.
#[derive(Default)]
pub struct MockNetworkClient {
    next_handle: Mutex<SubscriptionHandle>,
    subscriptions: Mutex<HashMap<SubscriptionHandle, String>>,
    documents: Mutex<HashMap<(String, u64), Vec<u8>>>,
    pending_events: Mutex<HashMap<SubscriptionHandle, Vec<FetchEvent>>>,
}

impl MockNetworkClient {
    pub fn new() -> Self {
        MockNetworkClient::default()
    }

    /// Test helper: make `fetch`/subscription polling return this document.
    pub fn seed_document(&self, request_key: &str, edition: u64, bytes: Vec<u8>) {
        self.documents
            .lock()
            .expect("mock client mutex poisoned")
            .insert((request_key.to_string(), edition), bytes.clone());
        let mut pending = self.pending_events.lock().expect("mock client mutex poisoned");
        for (handle, key) in self.subscriptions.lock().expect("mock client mutex poisoned").iter() {
            if key == request_key {
                pending.entry(*handle).or_default().push(FetchEvent {
                    edition,
                    raw_document: bytes.clone(),
                });
            }
        }
    }
}

#[async_trait]
impl NetworkClient for MockNetworkClient {
    async fn subscribe(&self, request_key: &str) -> Result<SubscriptionHandle, WotError> {
        let mut next = self.next_handle.lock().expect("mock client mutex poisoned");
        *next += 1;
        let handle = *next;
        self.subscriptions
            .lock()
            .expect("mock client mutex poisoned")
            .insert(handle, request_key.to_string());
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), WotError> {
        self.subscriptions
            .lock()
            .expect("mock client mutex poisoned")
            .remove(&handle);
        self.pending_events
            .lock()
            .expect("mock client mutex poisoned")
            .remove(&handle);
        Ok(())
    }

    async fn poll_subscription(&self, handle: SubscriptionHandle) -> Result<Option<FetchEvent>, WotError> {
        let mut pending = self.pending_events.lock().expect("mock client mutex poisoned");
        Ok(pending.get_mut(&handle).and_then(|queue| {
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        }))
    }

    async fn fetch(&self, request_key: &str, edition: u64) -> Result<Vec<u8>, WotError> {
        self.documents
            .lock()
            .expect("mock client mutex poisoned")
            .get(&(request_key.to_string(), edition))
            .cloned()
            .ok_or_else(|| WotError::TransportFailure(format!("no document for {request_key}@{edition}")))
    }

    async fn insert(&self, insert_key: &str, edition: u64, bytes: &[u8]) -> Result<(), WotError> {
        self.documents
            .lock()
            .expect("mock client mutex poisoned")
            .insert((insert_key.to_string(), edition), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_document_is_fetchable() {
        let client = MockNetworkClient::new();
        client.seed_document("USK@.../a/0", 3, b"hello".to_vec());
        let bytes = client.fetch("USK@.../a/0", 3).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn subscription_receives_seeded_event() {
        let client = MockNetworkClient::new();
        let handle = client.subscribe("USK@.../a/0").await.unwrap();
        client.seed_document("USK@.../a/0", 5, b"doc".to_vec());
        let event = client.poll_subscription(handle).await.unwrap().unwrap();
        assert_eq!(event.edition, 5);
    }
}
