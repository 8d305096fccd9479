//! Graph Store (C1, spec §4.1): an in-process arena with secondary indexes,
//! single-writer transactions and a JSON snapshot persistence format.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::WotError;
use crate::ids::IdentityId;
use crate::model::{EditionHint, Identity, Score, Trust};

type TrustKey = (IdentityId, IdentityId);
type ScoreKey = (IdentityId, IdentityId);
type HintKey = (IdentityId, IdentityId);

/// Everything the store holds, snapshot-able as one unit (spec §6 "a single
/// embedded object store per node").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    identities: HashMap<IdentityId, Identity>,
    own_identities: HashSet<IdentityId>,
    trusts: HashMap<TrustKey, Trust>,
    trusts_by_truster: HashMap<IdentityId, HashSet<IdentityId>>,
    trusts_by_trustee: HashMap<IdentityId, HashSet<IdentityId>>,
    scores: HashMap<ScoreKey, Score>,
    scores_by_owner: HashMap<IdentityId, HashSet<IdentityId>>,
    scores_by_subject: HashMap<IdentityId, HashSet<IdentityId>>,
    hints: HashMap<HintKey, EditionHint>,
    hints_by_subject: HashMap<IdentityId, HashSet<IdentityId>>,
    /// priority string -> (source, subject), ordered (spec §4.1 required index).
    hints_by_priority: BTreeMap<String, HintKey>,
}

/// Sidecar metadata persisted alongside the snapshot (spec §6, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub last_full_verification_at: Option<DateTime<Utc>>,
    pub last_defrag_at: Option<DateTime<Utc>>,
}

impl Default for StoreMeta {
    fn default() -> Self {
        StoreMeta {
            last_full_verification_at: None,
            last_defrag_at: None,
        }
    }
}

impl GraphData {
    pub fn identity(&self, id: &IdentityId) -> Option<&Identity> {
        self.identities.get(id)
    }

    pub fn identity_mut(&mut self, id: &IdentityId) -> Option<&mut Identity> {
        self.identities.get_mut(id)
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn own_identity_ids(&self) -> impl Iterator<Item = &IdentityId> {
        self.own_identities.iter()
    }

    pub fn is_own(&self, id: &IdentityId) -> bool {
        self.own_identities.contains(id)
    }

    pub fn insert_identity(&mut self, identity: Identity) -> Result<(), WotError> {
        if self.identities.contains_key(&identity.id) {
            return Err(WotError::DuplicateObject(format!(
                "identity {} already exists",
                identity.id
            )));
        }
        if identity.is_own() {
            self.own_identities.insert(identity.id.clone());
        }
        self.identities.insert(identity.id.clone(), identity);
        Ok(())
    }

    /// Removes the identity record itself; callers must have already
    /// removed its trusts, scores and hints (spec §4.2 `deleteIdentity`).
    pub fn delete_identity_record(&mut self, id: &IdentityId) -> Option<Identity> {
        self.own_identities.remove(id);
        self.identities.remove(id)
    }

    pub fn mark_own(&mut self, id: &IdentityId) {
        self.own_identities.insert(id.clone());
    }

    pub fn unmark_own(&mut self, id: &IdentityId) {
        self.own_identities.remove(id);
    }

    pub fn trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Option<&Trust> {
        self.trusts.get(&(truster.clone(), trustee.clone()))
    }

    pub fn trusts_from(&self, truster: &IdentityId) -> impl Iterator<Item = &Trust> {
        self.trusts_by_truster
            .get(truster)
            .into_iter()
            .flatten()
            .filter_map(move |trustee| self.trust(truster, trustee))
    }

    pub fn trusts_to(&self, trustee: &IdentityId) -> impl Iterator<Item = &Trust> {
        self.trusts_by_trustee
            .get(trustee)
            .into_iter()
            .flatten()
            .filter_map(move |truster| self.trust(truster, trustee))
    }

    pub fn upsert_trust(&mut self, trust: Trust) {
        let key = trust.key();
        self.trusts_by_truster
            .entry(key.0.clone())
            .or_default()
            .insert(key.1.clone());
        self.trusts_by_trustee
            .entry(key.1.clone())
            .or_default()
            .insert(key.0.clone());
        self.trusts.insert(key, trust);
    }

    pub fn remove_trust(&mut self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust> {
        let key = (truster.clone(), trustee.clone());
        if let Some(set) = self.trusts_by_truster.get_mut(truster) {
            set.remove(trustee);
        }
        if let Some(set) = self.trusts_by_trustee.get_mut(trustee) {
            set.remove(truster);
        }
        self.trusts.remove(&key)
    }

    pub fn score(&self, owner: &IdentityId, subject: &IdentityId) -> Option<&Score> {
        self.scores.get(&(owner.clone(), subject.clone()))
    }

    pub fn scores_for_owner(&self, owner: &IdentityId) -> impl Iterator<Item = (&IdentityId, &Score)> {
        self.scores_by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(move |subject| self.score(owner, subject).map(|s| (subject, s)))
    }

    pub fn scores_for_subject(&self, subject: &IdentityId) -> impl Iterator<Item = (&IdentityId, &Score)> {
        self.scores_by_subject
            .get(subject)
            .into_iter()
            .flatten()
            .filter_map(move |owner| self.score(owner, subject).map(|s| (owner, s)))
    }

    pub fn set_score(&mut self, owner: &IdentityId, subject: &IdentityId, score: Score) {
        self.scores_by_owner
            .entry(owner.clone())
            .or_default()
            .insert(subject.clone());
        self.scores_by_subject
            .entry(subject.clone())
            .or_default()
            .insert(owner.clone());
        self.scores.insert((owner.clone(), subject.clone()), score);
    }

    pub fn remove_score(&mut self, owner: &IdentityId, subject: &IdentityId) -> Option<Score> {
        if let Some(set) = self.scores_by_owner.get_mut(owner) {
            set.remove(subject);
        }
        if let Some(set) = self.scores_by_subject.get_mut(subject) {
            set.remove(owner);
        }
        self.scores.remove(&(owner.clone(), subject.clone()))
    }

    pub fn remove_scores_for_owner(&mut self, owner: &IdentityId) -> Vec<(IdentityId, Score)> {
        let subjects: Vec<IdentityId> = self
            .scores_by_owner
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        subjects
            .into_iter()
            .filter_map(|subject| {
                self.remove_score(owner, &subject)
                    .map(|score| (subject, score))
            })
            .collect()
    }

    pub fn hint(&self, source: &IdentityId, subject: &IdentityId) -> Option<&EditionHint> {
        self.hints.get(&(source.clone(), subject.clone()))
    }

    pub fn hints_for_subject(&self, subject: &IdentityId) -> impl Iterator<Item = &EditionHint> {
        self.hints_by_subject
            .get(subject)
            .into_iter()
            .flatten()
            .filter_map(move |source| self.hint(source, subject))
    }

    pub fn insert_hint(&mut self, hint: EditionHint) {
        let key = hint.key();
        self.hints_by_subject
            .entry(key.1.clone())
            .or_default()
            .insert(key.0.clone());
        self.hints_by_priority.insert(hint.priority.clone(), key.clone());
        self.hints.insert(key, hint);
    }

    pub fn remove_hint(&mut self, source: &IdentityId, subject: &IdentityId) -> Option<EditionHint> {
        let key = (source.clone(), subject.clone());
        if let Some(set) = self.hints_by_subject.get_mut(subject) {
            set.remove(source);
        }
        let removed = self.hints.remove(&key);
        if let Some(hint) = &removed {
            self.hints_by_priority.remove(&hint.priority);
        }
        removed
    }

    pub fn remove_hints_for_subject(&mut self, subject: &IdentityId) -> Vec<EditionHint> {
        let sources: Vec<IdentityId> = self
            .hints_by_subject
            .get(subject)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        sources
            .into_iter()
            .filter_map(|source| self.remove_hint(&source, subject))
            .collect()
    }

    /// Highest-priority hint (spec §4.6: "the store can serve the highest-priority
    /// hint with one indexed query").
    pub fn best_hint(&self) -> Option<&EditionHint> {
        self.hints_by_priority
            .values()
            .next()
            .and_then(|key| self.hint(&key.0, &key.1))
    }

    pub fn hint_count(&self) -> usize {
        self.hints.len()
    }

    /// The `limit` highest-priority hints, in priority order (spec §4.6:
    /// "the store can serve the highest-priority hint with one indexed
    /// query" — generalized here to the next `limit` for batched fetching).
    pub fn best_hints(&self, limit: usize) -> Vec<EditionHint> {
        self.hints_by_priority
            .values()
            .take(limit)
            .filter_map(|key| self.hint(&key.0, &key.1).cloned())
            .collect()
    }
}

/// Enforces "one open transaction at a time, all-or-nothing commit" (spec
/// §4.1, §5.2) via a copy-on-write working set over a held lock: `begin`
/// acquires the store's mutex and keeps it for the transaction's entire
/// lifetime, so a second `begin()` from any thread blocks until this one
/// commits or drops. Mutations apply to a private clone; `commit` swaps it
/// back through the still-held guard. Dropping without committing discards
/// the clone and releases the lock, leaving the store untouched.
pub struct Transaction<'a> {
    guard: MutexGuard<'a, GraphData>,
    working: GraphData,
    committed: bool,
}

impl<'a> Transaction<'a> {
    pub fn data(&self) -> &GraphData {
        &self.working
    }

    pub fn data_mut(&mut self) -> &mut GraphData {
        &mut self.working
    }

    pub fn commit(mut self) {
        *self.guard = std::mem::take(&mut self.working);
        self.committed = true;
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        // Uncommitted drop: the cloned working set is discarded and the
        // mutex guard releases, unblocking the next `begin()`.
        let _ = self.committed;
    }
}

pub struct GraphStore {
    data: Mutex<GraphData>,
    meta: Mutex<StoreMeta>,
    snapshot_path: PathBuf,
    meta_path: PathBuf,
}

impl GraphStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        GraphStore {
            data: Mutex::new(GraphData::default()),
            meta: Mutex::new(StoreMeta::default()),
            snapshot_path: data_dir.join("graph.json"),
            meta_path: data_dir.join("meta.json"),
        }
    }

    /// Opens the store's single writer transaction (spec §5.1 lock
    /// hierarchy): the returned `Transaction` holds the store's mutex for
    /// its entire lifetime, so overlapping `begin()` calls serialize rather
    /// than last-write-wins each other.
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.data.lock().expect("graph store mutex poisoned");
        let working = guard.clone();
        Transaction {
            guard,
            working,
            committed: false,
        }
    }

    pub fn snapshot(&self) -> GraphData {
        self.data.lock().expect("graph store mutex poisoned").clone()
    }

    pub fn meta(&self) -> StoreMeta {
        self.meta.lock().expect("store meta mutex poisoned").clone()
    }

    pub fn set_last_full_verification(&self, at: DateTime<Utc>) {
        self.meta.lock().expect("store meta mutex poisoned").last_full_verification_at = Some(at);
    }

    pub fn set_last_defrag(&self, at: DateTime<Utc>) {
        self.meta.lock().expect("store meta mutex poisoned").last_defrag_at = Some(at);
    }

    pub fn persist(&self) -> Result<(), WotError> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WotError::Unavailable(format!("creating data dir: {e}")))?;
        }
        let data = self.snapshot();
        let rendered = serde_json::to_vec_pretty(&data)
            .map_err(|e| WotError::Unavailable(format!("serializing snapshot: {e}")))?;
        fs::write(&self.snapshot_path, rendered)
            .map_err(|e| WotError::Unavailable(format!("writing snapshot: {e}")))?;

        let meta = self.meta();
        let rendered_meta = serde_json::to_vec_pretty(&meta)
            .map_err(|e| WotError::Unavailable(format!("serializing meta: {e}")))?;
        fs::write(&self.meta_path, rendered_meta)
            .map_err(|e| WotError::Unavailable(format!("writing meta: {e}")))
    }

    pub fn load(data_dir: impl AsRef<Path>) -> Result<Self, WotError> {
        let data_dir = data_dir.as_ref();
        let snapshot_path = data_dir.join("graph.json");
        let meta_path = data_dir.join("meta.json");

        let data = if snapshot_path.exists() {
            let raw = fs::read(&snapshot_path)
                .map_err(|e| WotError::Unavailable(format!("reading snapshot: {e}")))?;
            serde_json::from_slice(&raw)
                .map_err(|e| WotError::Unavailable(format!("parsing snapshot: {e}")))?
        } else {
            GraphData::default()
        };

        let meta = if meta_path.exists() {
            let raw = fs::read(&meta_path)
                .map_err(|e| WotError::Unavailable(format!("reading meta: {e}")))?;
            serde_json::from_slice(&raw)
                .map_err(|e| WotError::Unavailable(format!("parsing meta: {e}")))?
        } else {
            StoreMeta::default()
        };

        Ok(GraphStore {
            data: Mutex::new(data),
            meta: Mutex::new(meta),
            snapshot_path,
            meta_path,
        })
    }
}
