//! Trust Graph API (C2, spec §4.2): creates/mutates identities and trusts,
//! enforces input validation, and drives the Score Engine (C3) on every
//! mutation.

use chrono::Utc;
use std::collections::HashSet;

use crate::error::WotError;
use crate::ids::IdentityId;
use crate::identity_file::ParsedIdentityFile;
use crate::model::identity::{validate_nickname, Identity, IdentityKind};
use crate::model::trust::{validate_comment, validate_value, Trust};
use crate::score_engine;
use crate::store::{GraphData, GraphStore};

/// The set of `(owner, subject)` pairs whose `Score` was inserted, changed,
/// or removed by one call — C4 reads this to re-run `shouldFetchIdentity`
/// only where it could have flipped (spec §4.4).
pub struct ChangeReport {
    pub touched: Vec<(IdentityId, IdentityId)>,
}

impl ChangeReport {
    fn from_diff(before: &GraphData, after: &GraphData, owners: &HashSet<IdentityId>) -> Self {
        let mut touched = Vec::new();
        for owner in owners {
            let mut subjects: HashSet<IdentityId> = before
                .scores_for_owner(owner)
                .map(|(s, _)| s.clone())
                .collect();
            subjects.extend(after.scores_for_owner(owner).map(|(s, _)| s.clone()));
            for subject in subjects {
                if before.score(owner, &subject) != after.score(owner, &subject) {
                    touched.push((owner.clone(), subject.clone()));
                }
            }
        }
        ChangeReport { touched }
    }
}

/// The key-material component of a `USK@.../name/edition` or
/// `SSK@.../name/edition`-shaped URI: everything between `@` and the next
/// `/`. Two keys "correspond" (spec §4.2, §8 boundary behaviour) when they
/// carry the same material under the expected prefix.
fn key_material(key: &str) -> Option<&str> {
    let after_at = key.split_once('@')?.1;
    Some(after_at.split('/').next().unwrap_or(after_at))
}

/// spec §4.2: `createOwnIdentity`/`restoreOwnIdentity` must fail with
/// `MalformedURL` if the request and insert keys are mismatched — either by
/// carrying the wrong prefix for their role, or by disagreeing on key
/// material.
fn validate_key_correspondence(request_key: &str, insert_key: &str) -> Result<(), WotError> {
    if !request_key.starts_with("USK@") {
        return Err(WotError::MalformedUrl(format!(
            "request key {request_key:?} is not a USK"
        )));
    }
    if !insert_key.starts_with("SSK@") {
        return Err(WotError::MalformedUrl(format!(
            "insert key {insert_key:?} is not an SSK"
        )));
    }
    let request_material = key_material(request_key)
        .ok_or_else(|| WotError::MalformedUrl(format!("request key {request_key:?} has no key material")))?;
    let insert_material = key_material(insert_key)
        .ok_or_else(|| WotError::MalformedUrl(format!("insert key {insert_key:?} has no key material")))?;
    if request_material != insert_material {
        return Err(WotError::MalformedUrl(format!(
            "request key {request_key:?} and insert key {insert_key:?} do not correspond"
        )));
    }
    Ok(())
}

pub struct TrustGraph {
    use_legacy: bool,
}

impl TrustGraph {
    pub fn new(use_legacy: bool) -> Self {
        TrustGraph { use_legacy }
    }

    pub fn create_own_identity(
        &self,
        store: &GraphStore,
        request_key: String,
        insert_key: String,
        nickname: Option<String>,
        publishes_trust_list: bool,
    ) -> Result<IdentityId, WotError> {
        validate_nickname(nickname.as_deref())?;
        validate_key_correspondence(&request_key, &insert_key)?;
        let id = IdentityId::from_public_bytes(insert_key.as_bytes());
        let now = Utc::now();

        let mut tx = store.begin();
        if tx.data().identity(&id).is_some() {
            return Err(WotError::DuplicateObject(format!("identity {id} already exists")));
        }
        let mut identity = Identity::new_remote(id.clone(), request_key, nickname, now)?;
        identity.publishes_trust_list = publishes_trust_list;
        identity.kind = IdentityKind::Own {
            insert_key,
            last_inserted_edition: 0,
        };
        tx.data_mut().insert_identity(identity)?;
        score_engine::recompute_all_scores(tx.data_mut());
        tx.commit();
        Ok(id)
    }

    /// spec §4.2: the caller-supplied edition in `uri` is advisory only and
    /// is stored as `latestEditionHint`, never as `currentEdition`.
    pub fn add_identity_from_uri(
        &self,
        store: &GraphStore,
        id: IdentityId,
        request_key: String,
        nickname: Option<String>,
        advisory_edition: u64,
    ) -> Result<(), WotError> {
        validate_nickname(nickname.as_deref())?;
        let now = Utc::now();

        let mut tx = store.begin();
        if tx.data().identity(&id).is_some() {
            return Err(WotError::DuplicateObject(format!("identity {id} already exists")));
        }
        let mut identity = Identity::new_remote(id, request_key, nickname, now)?;
        identity.latest_edition_hint = advisory_edition;
        tx.data_mut().insert_identity(identity)?;
        tx.commit();
        Ok(())
    }

    pub fn set_trust(
        &self,
        store: &GraphStore,
        truster: &IdentityId,
        trustee: &IdentityId,
        value: i32,
        comment: String,
        truster_edition: u64,
    ) -> Result<ChangeReport, WotError> {
        validate_value(value)?;
        validate_comment(&comment)?;

        let mut tx = store.begin();
        let data = tx.data();

        let is_self_trust = truster == trustee;
        if is_self_trust && !data.is_own(truster) {
            return Err(WotError::InvalidParameter(
                "self-trust is only allowed for an OwnIdentity restoring itself".into(),
            ));
        }
        if data.identity(truster).is_none() {
            return Err(WotError::UnknownIdentity(truster.clone()));
        }
        if data.identity(trustee).is_none() {
            return Err(WotError::UnknownIdentity(trustee.clone()));
        }

        let old_value = data.trust(truster, trustee).map(|t| t.value).unwrap_or(0);
        let before = data.clone();

        let now = Utc::now();
        let trust = Trust::new(
            truster.clone(),
            trustee.clone(),
            value,
            comment,
            truster_edition,
            now,
        )?;
        tx.data_mut().upsert_trust(trust);
        score_engine::apply_trust_change(tx.data_mut(), truster, old_value, value, self.use_legacy);

        let owners = score_engine_affected_owners(&before, tx.data(), truster);
        let report = ChangeReport::from_diff(&before, tx.data(), &owners);
        tx.commit();
        Ok(report)
    }

    pub fn remove_trust(
        &self,
        store: &GraphStore,
        truster: &IdentityId,
        trustee: &IdentityId,
    ) -> Result<ChangeReport, WotError> {
        let mut tx = store.begin();
        let before = tx.data().clone();

        let old = tx
            .data_mut()
            .remove_trust(truster, trustee)
            .ok_or_else(|| WotError::UnknownTrust(truster.clone(), trustee.clone()))?;

        score_engine::apply_trust_change(tx.data_mut(), truster, old.value, 0, self.use_legacy);

        let owners = score_engine_affected_owners(&before, tx.data(), truster);
        let report = ChangeReport::from_diff(&before, tx.data(), &owners);
        tx.commit();
        Ok(report)
    }

    pub fn on_fetched_and_parsed_successfully(
        &self,
        store: &GraphStore,
        id: &IdentityId,
        edition: u64,
    ) -> Result<(), WotError> {
        let mut tx = store.begin();
        let identity = tx
            .data_mut()
            .identity_mut(id)
            .ok_or_else(|| WotError::UnknownIdentity(id.clone()))?;
        if edition <= identity.current_edition {
            return Err(WotError::InvalidParameter(format!(
                "edition {edition} is not newer than current edition {}",
                identity.current_edition
            )));
        }
        identity.current_edition = edition;
        identity.fetch_state = crate::model::FetchState::Fetched;
        identity.last_fetched_maybe_valid_edition = edition;
        identity.latest_edition_hint = identity.latest_edition_hint.max(edition);
        identity.last_fetched_at = Utc::now();
        identity.last_changed_at = identity.last_fetched_at;

        // spec §8 scenario 4: obsolete hints for this subject are garbage
        // collected as part of this transition.
        let stale: Vec<_> = tx
            .data()
            .hints_for_subject(id)
            .filter(|h| h.edition <= edition)
            .map(|h| h.source_id.clone())
            .collect();
        for source in stale {
            tx.data_mut().remove_hint(&source, id);
        }

        tx.commit();
        Ok(())
    }

    /// Applies a successfully parsed identity file: upserts the publisher's
    /// own trust list entries, refreshes its published metadata, then runs
    /// `onFetchedAndParsedSuccessfully` (spec §6 input to C2).
    pub fn apply_parsed_identity_file(
        &self,
        store: &GraphStore,
        file: &ParsedIdentityFile,
    ) -> Result<(), WotError> {
        {
            let mut tx = store.begin();
            let identity = tx
                .data_mut()
                .identity_mut(&file.id)
                .ok_or_else(|| WotError::UnknownIdentity(file.id.clone()))?;
            identity.publishes_trust_list = file.publishes_trust_list;
            identity.contexts = file.contexts.clone();
            identity.properties = file.properties.clone();
            tx.commit();
        }

        for entry in &file.trust_list {
            // A publisher's trust list may reference a trustee this node has
            // never seen before; spec §2's data flow treats trust-list
            // parsing as the point new identities enter the graph.
            let needs_creation = store.snapshot().identity(&entry.trustee_id).is_none();
            if needs_creation {
                self.add_identity_from_uri(store, entry.trustee_id.clone(), String::new(), None, 0)
                    .ok();
            }
            self.set_trust(
                store,
                &file.id,
                &entry.trustee_id,
                entry.value,
                entry.comment.clone(),
                file.edition,
            )?;
        }

        self.on_fetched_and_parsed_successfully(store, &file.id, file.edition)
    }

    pub fn on_fetched_and_parsing_failed(
        &self,
        store: &GraphStore,
        id: &IdentityId,
        edition: u64,
    ) -> Result<(), WotError> {
        let mut tx = store.begin();
        let identity = tx
            .data_mut()
            .identity_mut(id)
            .ok_or_else(|| WotError::UnknownIdentity(id.clone()))?;
        if edition <= identity.current_edition {
            return Err(WotError::InvalidParameter(format!(
                "edition {edition} is not newer than current edition {}",
                identity.current_edition
            )));
        }
        identity.fetch_state = crate::model::FetchState::ParsingFailed;
        identity.current_edition = edition;
        identity.last_changed_at = Utc::now();
        tx.commit();
        Ok(())
    }

    pub fn mark_for_refetch(&self, store: &GraphStore, id: &IdentityId) -> Result<(), WotError> {
        let mut tx = store.begin();
        let identity = tx
            .data_mut()
            .identity_mut(id)
            .ok_or_else(|| WotError::UnknownIdentity(id.clone()))?;
        identity.current_edition = identity.current_edition.saturating_sub(1);
        identity.last_fetched_maybe_valid_edition = identity.current_edition;
        identity.fetch_state = crate::model::FetchState::NotFetched;
        tx.commit();
        Ok(())
    }

    /// spec §4.2: replace in-place with a plain `Identity`, preserving
    /// incoming trusts and `id`, dropping outgoing scores.
    pub fn delete_own_identity(&self, store: &GraphStore, id: &IdentityId) -> Result<(), WotError> {
        let mut tx = store.begin();
        {
            let identity = tx
                .data_mut()
                .identity_mut(id)
                .ok_or_else(|| WotError::UnknownIdentity(id.clone()))?;
            if !identity.is_own() {
                return Err(WotError::InvalidParameter(format!("{id} is not an OwnIdentity")));
            }
            identity.kind = IdentityKind::Remote;
        }
        tx.data_mut().unmark_own(id);
        tx.data_mut().remove_scores_for_owner(id);
        tx.commit();
        Ok(())
    }

    /// spec §4.2 / §8 scenario 5: inverse of deletion — converts an
    /// `Identity` back into an `OwnIdentity`, asserts the self-trust, and
    /// rebuilds its score table.
    pub fn restore_own_identity(
        &self,
        store: &GraphStore,
        id: &IdentityId,
        insert_key: String,
        last_inserted_edition: u64,
    ) -> Result<ChangeReport, WotError> {
        let mut tx = store.begin();
        let before = tx.data().clone();
        {
            let identity = tx
                .data_mut()
                .identity_mut(id)
                .ok_or_else(|| WotError::UnknownIdentity(id.clone()))?;
            validate_key_correspondence(&identity.request_key, &insert_key)?;
            identity.kind = IdentityKind::Own {
                insert_key,
                last_inserted_edition,
            };
        }
        tx.data_mut().mark_own(id);

        let self_trust = Trust::new(id.clone(), id.clone(), 100, String::new(), 0, Utc::now())?;
        tx.data_mut().upsert_trust(self_trust);

        let fresh = score_engine::recompute_scores_for_owner(tx.data(), id);
        for (subject, score) in fresh {
            tx.data_mut().set_score(id, &subject, score);
        }

        let mut owners = HashSet::new();
        owners.insert(id.clone());
        let report = ChangeReport::from_diff(&before, tx.data(), &owners);
        tx.commit();
        Ok(report)
    }

    /// spec §4.2: delete all `Trust`/`Score` records, then the identity.
    pub fn delete_identity(&self, store: &GraphStore, id: &IdentityId) -> Result<(), WotError> {
        let mut tx = store.begin();
        if tx.data().identity(id).is_none() {
            return Err(WotError::UnknownIdentity(id.clone()));
        }

        let outgoing: Vec<IdentityId> = tx
            .data()
            .trusts_from(id)
            .map(|t| t.trustee_id.clone())
            .collect();
        for trustee in outgoing {
            tx.data_mut().remove_trust(id, &trustee);
        }
        let incoming: Vec<IdentityId> = tx
            .data()
            .trusts_to(id)
            .map(|t| t.truster_id.clone())
            .collect();
        for truster in incoming {
            tx.data_mut().remove_trust(&truster, id);
        }

        tx.data_mut().remove_scores_for_owner(id);
        let subject_owners: Vec<IdentityId> = tx
            .data()
            .scores_for_subject(id)
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in subject_owners {
            tx.data_mut().remove_score(&owner, id);
        }

        tx.data_mut().remove_hints_for_subject(id);
        tx.data_mut().unmark_own(id);

        // The arena itself has no remove-by-key helper exposed publicly
        // beyond insert; deletion of the identity record is done via the
        // underlying map directly since this is the one place an identity
        // is permanently removed from the arena.
        tx.data_mut().delete_identity_record(id);

        tx.commit();
        Ok(())
    }
}

/// Score §3 invariant 5: restricts recomputation to owners that could see
/// `truster` either before or after the change — a cheap superset is fine
/// since unaffected owners simply produce identical `Score` sets.
fn score_engine_affected_owners(
    before: &GraphData,
    after: &GraphData,
    truster: &IdentityId,
) -> HashSet<IdentityId> {
    let mut owners: HashSet<IdentityId> = before
        .scores_for_subject(truster)
        .map(|(o, _)| o.clone())
        .collect();
    owners.extend(after.scores_for_subject(truster).map(|(o, _)| o.clone()));
    if after.is_own(truster) {
        owners.insert(truster.clone());
    }
    owners
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_store() -> GraphStore {
        GraphStore::new(std::env::temp_dir().join("wotd-trust-graph-tests"))
    }

    #[test]
    fn set_trust_rejects_out_of_range_value() {
        let store = fresh_store();
        let graph = TrustGraph::new(false);
        let owner = graph
            .create_own_identity(&store, "USK@.../o/0".into(), "SSK@.../o/0".into(), None, false)
            .unwrap();
        let remote = IdentityId::from_public_bytes(b"remote-a");
        graph
            .add_identity_from_uri(&store, remote.clone(), "USK@.../a/0".into(), None, 0)
            .unwrap();
        let result = graph.set_trust(&store, &owner, &remote, 101, String::new(), 0);
        assert!(result.is_err());
    }

    #[test]
    fn restore_own_identity_rebuilds_scores_with_self_trust() {
        let store = fresh_store();
        let graph = TrustGraph::new(false);
        let id = IdentityId::from_public_bytes(b"restorable");
        graph
            .add_identity_from_uri(&store, id.clone(), "USK@.../r/0".into(), None, 0)
            .unwrap();
        graph
            .restore_own_identity(&store, &id, "SSK@.../r/0".into(), 0)
            .unwrap();

        let snapshot = store.snapshot();
        assert!(snapshot.is_own(&id));
        assert!(snapshot.trust(&id, &id).is_some());
        assert_eq!(snapshot.score(&id, &id).unwrap().rank, 0);
    }

    #[test]
    fn create_own_identity_rejects_mismatched_keys() {
        let store = fresh_store();
        let graph = TrustGraph::new(false);
        let result = graph.create_own_identity(
            &store,
            "USK@alice/o/0".into(),
            "SSK@bob/o/0".into(),
            None,
            false,
        );
        assert!(matches!(result, Err(WotError::MalformedUrl(_))));

        let result = graph.create_own_identity(
            &store,
            "SSK@.../o/0".into(),
            "SSK@.../o/0".into(),
            None,
            false,
        );
        assert!(matches!(result, Err(WotError::MalformedUrl(_))));
    }

    #[test]
    fn restore_own_identity_rejects_mismatched_keys() {
        let store = fresh_store();
        let graph = TrustGraph::new(false);
        let id = IdentityId::from_public_bytes(b"restorable-mismatch");
        graph
            .add_identity_from_uri(&store, id.clone(), "USK@alice/r/0".into(), None, 0)
            .unwrap();

        let result = graph.restore_own_identity(&store, &id, "SSK@bob/r/0".into(), 0);
        assert!(matches!(result, Err(WotError::MalformedUrl(_))));
        assert!(!store.snapshot().is_own(&id));
    }
}
