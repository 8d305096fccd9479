//! Fast Downloader (C5, spec §4.5): continuous subscriptions for identities
//! in the Fast partition — direct trustees of some `OwnIdentity`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::identity_file::IdentityFileCodec;
use crate::ids::IdentityId;
use crate::net::{NetworkClient, SubscriptionHandle};
use crate::store::GraphStore;
use crate::trust_graph::TrustGraph;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Maintains one live subscription per managed identity; on each event,
/// hands the parsed file to C2 in a fresh transaction. Transport failures
/// retry indefinitely (spec §4.5, §7 `TransportFailure`).
pub struct FastDownloader {
    store: Arc<GraphStore>,
    transport: Arc<dyn NetworkClient>,
    codec: Arc<dyn IdentityFileCodec>,
    trust_graph: Arc<TrustGraph>,
    subscriptions: AsyncMutex<HashMap<IdentityId, SubscriptionHandle>>,
}

impl FastDownloader {
    pub fn new(
        store: Arc<GraphStore>,
        transport: Arc<dyn NetworkClient>,
        codec: Arc<dyn IdentityFileCodec>,
        trust_graph: Arc<TrustGraph>,
    ) -> Self {
        FastDownloader {
            store,
            transport,
            codec,
            trust_graph,
            subscriptions: AsyncMutex::new(HashMap::new()),
        }
    }

    /// spec §4.4: `startFetch(x)` when `x` enters the Fast partition.
    pub async fn start_fetch(&self, id: &IdentityId, request_key: &str) {
        let mut subs = self.subscriptions.lock().await;
        if subs.contains_key(id) {
            return;
        }
        loop {
            match self.transport.subscribe(request_key).await {
                Ok(handle) => {
                    subs.insert(id.clone(), handle);
                    info!(identity = %id, "fast downloader subscribed");
                    return;
                }
                Err(e) => {
                    warn!(identity = %id, error = %e, "subscribe failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
            }
        }
    }

    /// spec §4.4: `abortFetch(x)` when `x` leaves the Fast partition.
    pub async fn abort_fetch(&self, id: &IdentityId) {
        let mut subs = self.subscriptions.lock().await;
        if let Some(handle) = subs.remove(id) {
            let _ = self.transport.unsubscribe(handle).await;
        }
    }

    /// Drains one pending event for `id`, if its subscription has one, and
    /// applies it via C2. Intended to be called from a poll loop; retries on
    /// transport failure are the caller's responsibility (indefinite retry
    /// per spec §7, driven by the maintenance loop's tick).
    pub async fn poll_once(&self, id: &IdentityId) {
        let handle = {
            let subs = self.subscriptions.lock().await;
            match subs.get(id) {
                Some(h) => *h,
                None => return,
            }
        };

        let event = match self.transport.poll_subscription(handle).await {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!(identity = %id, error = %e, "fast downloader transport failure, will retry");
                return;
            }
        };

        match self.codec.parse(&event.raw_document) {
            Ok(file) => {
                if let Err(e) = self.trust_graph.apply_parsed_identity_file(&self.store, &file) {
                    warn!(identity = %id, error = %e, "failed to apply parsed identity file");
                }
            }
            Err(e) => {
                warn!(identity = %id, error = %e, "fast downloader parse failure");
                let _ = self
                    .trust_graph
                    .on_fetched_and_parsing_failed(&self.store, id, event.edition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity_file::NullIdentityFileCodec;
    use crate::net::MockNetworkClient;

    #[tokio::test]
    async fn start_then_abort_fetch_clears_subscription() {
        let store = Arc::new(GraphStore::new(std::env::temp_dir().join("wotd-fast-test")));
        let transport: Arc<dyn NetworkClient> = Arc::new(MockNetworkClient::new());
        let codec: Arc<dyn IdentityFileCodec> = Arc::new(NullIdentityFileCodec);
        let trust_graph = Arc::new(TrustGraph::new(false));
        let downloader = FastDownloader::new(store, transport, codec, trust_graph);

        let id = IdentityId::from_public_bytes(b"fast-target");
        downloader.start_fetch(&id, "USK@.../a/0").await;
        assert!(downloader.subscriptions.lock().await.contains_key(&id));
        downloader.abort_fetch(&id).await;
        assert!(!downloader.subscriptions.lock().await.contains_key(&id));
    }
}
