//! Slow Downloader + Hint Queue (C6, spec §4.6): priority-ordered, one-shot
//! fetches of indirectly trusted identities using received edition hints.

use std::sync::Arc;
use tracing::{debug, info, warn};

use chrono::NaiveDate;

use crate::download_policy::should_fetch_identity;
use crate::identity_file::IdentityFileCodec;
use crate::ids::IdentityId;
use crate::model::edition_hint::EditionHint;
use crate::net::NetworkClient;
use crate::store::GraphStore;
use crate::trust_graph::TrustGraph;

/// `storeNewEditionHint` (spec §4.6 steps 1-4). Returns `Ok(true)` if the
/// hint was stored, `Ok(false)` if it was rejected for a domain reason
/// (obsolete, ineligible, too low capacity, or superseded by an existing
/// hint) — none of those are errors.
pub fn store_new_edition_hint(
    store: &GraphStore,
    source_id: IdentityId,
    subject_id: IdentityId,
    edition: u64,
    date: NaiveDate,
    source_capacity: u32,
    source_score_sign: i8,
    min_source_capacity: u32,
    obfuscation_pad: &[u8],
) -> Result<bool, crate::error::WotError> {
    let mut tx = store.begin();
    let data = tx.data();

    let subject = data
        .identity(&subject_id)
        .ok_or_else(|| crate::error::WotError::UnknownIdentity(subject_id.clone()))?;

    // Step 1: reject if obsolete.
    if subject.current_edition >= edition {
        return Ok(false);
    }
    // Step 2/invariant 7: both endpoints must currently be fetchable.
    if !should_fetch_identity(data, &subject_id) || !should_fetch_identity(data, &source_id) {
        return Ok(false);
    }
    // Step 3: source capacity floor.
    if source_capacity < min_source_capacity {
        return Ok(false);
    }
    // Step 4: supersede-or-discard against any existing hint for the pair.
    if let Some(existing) = data.hint(&source_id, &subject_id) {
        if edition <= existing.edition {
            return Ok(false);
        }
    }

    let hint = EditionHint::new(
        source_id.clone(),
        subject_id.clone(),
        edition,
        date,
        source_capacity,
        source_score_sign,
        obfuscation_pad,
    );
    tx.data_mut().remove_hint(&source_id, &subject_id);
    tx.data_mut().insert_hint(hint);
    tx.commit();
    Ok(true)
}

/// spec §4.6 `abortFetch(x)`: deletes every hint whose `subject == x`.
pub fn abort_fetch(store: &GraphStore, subject: &IdentityId) {
    let mut tx = store.begin();
    tx.data_mut().remove_hints_for_subject(subject);
    tx.commit();
}

pub struct SlowDownloader {
    store: Arc<GraphStore>,
    transport: Arc<dyn NetworkClient>,
    codec: Arc<dyn IdentityFileCodec>,
    trust_graph: Arc<TrustGraph>,
    max_concurrent: usize,
}

impl SlowDownloader {
    pub fn new(
        store: Arc<GraphStore>,
        transport: Arc<dyn NetworkClient>,
        codec: Arc<dyn IdentityFileCodec>,
        trust_graph: Arc<TrustGraph>,
        max_concurrent: usize,
    ) -> Self {
        SlowDownloader {
            store,
            transport,
            codec,
            trust_graph,
            max_concurrent,
        }
    }

    /// One fetch wave: claims up to `max_concurrent` highest-priority hints
    /// and resolves each to a terminal outcome (spec §4.6: "do not retry the
    /// same hint — another peer will supply a better one").
    pub async fn tick(&self, request_key_of: impl Fn(&IdentityId) -> Option<String>) {
        let batch = self.store.snapshot().best_hints(self.max_concurrent);
        if batch.is_empty() {
            return;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for hint in batch {
            let Some(request_key) = request_key_of(&hint.subject_id) else {
                continue;
            };
            let store = Arc::clone(&self.store);
            let transport = Arc::clone(&self.transport);
            let codec = Arc::clone(&self.codec);
            let trust_graph = Arc::clone(&self.trust_graph);
            handles.push(tokio::spawn(async move {
                resolve_one(store, transport, codec, trust_graph, hint, request_key).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn resolve_one(
    store: Arc<GraphStore>,
    transport: Arc<dyn NetworkClient>,
    codec: Arc<dyn IdentityFileCodec>,
    trust_graph: Arc<TrustGraph>,
    hint: EditionHint,
    request_key: String,
) {
    let outcome = transport.fetch(&request_key, hint.edition).await;
    match outcome {
        Ok(bytes) => match codec.parse(&bytes) {
            Ok(file) => {
                if let Err(e) = trust_graph.apply_parsed_identity_file(&store, &file) {
                    warn!(subject = %hint.subject_id, error = %e, "slow downloader failed to apply fetched file");
                }
            }
            Err(e) => {
                debug!(subject = %hint.subject_id, error = %e, "slow downloader parse failure");
                let _ = trust_graph.on_fetched_and_parsing_failed(&store, &hint.subject_id, hint.edition);
            }
        },
        Err(e) => {
            debug!(subject = %hint.subject_id, error = %e, "slow downloader transport failure, moving on");
        }
    }
    // Terminal outcome either way: the hint for this (source, subject) is
    // always removed — another peer's hint wins next time (spec §4.6).
    let mut tx = store.begin();
    tx.data_mut().remove_hint(&hint.source_id, &hint.subject_id);
    tx.commit();
    info!(subject = %hint.subject_id, source = %hint.source_id, "slow downloader resolved hint");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::identity::Identity;
    use crate::score_engine;
    use crate::store::GraphData;
    use chrono::Utc;

    fn id(seed: &str) -> IdentityId {
        IdentityId::from_public_bytes(seed.as_bytes())
    }

    fn own_identity(seed: &str) -> Identity {
        let mut identity =
            Identity::new_remote(id(seed), format!("USK@.../{seed}/0"), None, Utc::now()).unwrap();
        identity.kind = crate::model::identity::IdentityKind::Own {
            insert_key: format!("SSK@.../{seed}/0"),
            last_inserted_edition: 0,
        };
        identity
    }

    fn remote_identity(seed: &str) -> Identity {
        Identity::new_remote(id(seed), format!("USK@.../{seed}/0"), None, Utc::now()).unwrap()
    }

    fn store_with_reachable_pair() -> GraphStore {
        let store = GraphStore::new(std::env::temp_dir().join("wotd-slow-test"));
        let mut tx = store.begin();
        tx.data_mut().insert_identity(own_identity("owner")).unwrap();
        tx.data_mut().insert_identity(remote_identity("src")).unwrap();
        tx.data_mut().insert_identity(remote_identity("subject")).unwrap();
        tx.data_mut().upsert_trust(
            crate::model::trust::Trust::new(id("owner"), id("src"), 100, String::new(), 0, Utc::now())
                .unwrap(),
        );
        score_engine::recompute_all_scores(tx.data_mut());
        tx.commit();
        store
    }

    #[test]
    fn rejects_obsolete_hint() {
        let store = store_with_reachable_pair();
        {
            let mut tx = store.begin();
            tx.data_mut()
                .identity_mut(&id("subject"))
                .unwrap()
                .current_edition = 10;
            tx.commit();
        }
        let stored = store_new_edition_hint(
            &store,
            id("src"),
            id("subject"),
            5,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            40,
            1,
            1,
            b"pad",
        )
        .unwrap();
        assert!(!stored);
    }

    #[test]
    fn accepts_and_then_supersedes_newer_edition() {
        let store = store_with_reachable_pair();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let first = store_new_edition_hint(&store, id("src"), id("subject"), 5, date, 40, 1, 1, b"pad").unwrap();
        assert!(first);
        let stale = store_new_edition_hint(&store, id("src"), id("subject"), 4, date, 40, 1, 1, b"pad").unwrap();
        assert!(!stale);
        let newer = store_new_edition_hint(&store, id("src"), id("subject"), 9, date, 40, 1, 1, b"pad").unwrap();
        assert!(newer);
        assert_eq!(store.snapshot().hint(&id("src"), &id("subject")).unwrap().edition, 9);
    }

    #[test]
    fn rejects_capacity_below_floor() {
        let store = store_with_reachable_pair();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let stored = store_new_edition_hint(&store, id("src"), id("subject"), 5, date, 0, 1, 1, b"pad").unwrap();
        assert!(!stored);
    }

    #[test]
    fn abort_fetch_clears_all_hints_for_subject() {
        let store = store_with_reachable_pair();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        store_new_edition_hint(&store, id("src"), id("subject"), 5, date, 40, 1, 1, b"pad").unwrap();
        abort_fetch(&store, &id("subject"));
        assert_eq!(store.snapshot().hint_count(), 0);
    }

    fn _silence_unused(data: &GraphData) -> usize {
        data.hint_count()
    }
}
