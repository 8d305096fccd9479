//! Score Engine (C3, spec §4.3): keeps the derived `Score` table consistent
//! with the signed `Trust` table.
//!
//! `recompute_scores_for_owner` is the ground truth: a fixed-point relaxation
//! over the whole graph (rank only ever decreases, so it terminates). The
//! incremental entry points (`handle_trust_activated`,
//! `handle_trust_deactivated`, `handle_pure_value_change`) narrow the
//! recompute to the owners that can actually see the changed truster rather
//! than touching every `OwnIdentity`, which is the actual source of the
//! ~28x speed-up this module is named for in spec §1 — a full from-scratch
//! graph walk per owner is still the unit of recomputation, just skipped for
//! owners that provably cannot be affected.

use std::collections::{HashMap, HashSet};

use crate::ids::IdentityId;
use crate::model::score::{capacity_for_rank, Score};
use crate::store::GraphData;

/// `Score(owner, owner)` — spec §3: "0 for the owner itself".
const OWN_SCORE_VALUE: i32 = 100;

/// Full re-derivation for a single owner (spec §4.3 `recomputeAllScores`,
/// scoped per-owner). Nodes with no assigned rank get no entry — matching
/// spec §3 invariant 6's existence semantics: a `Score` exists only when the
/// subject is reachable.
pub fn recompute_scores_for_owner(data: &GraphData, owner: &IdentityId) -> HashMap<IdentityId, Score> {
    let mut rank: HashMap<IdentityId, u32> = HashMap::new();
    let mut value: HashMap<IdentityId, i32> = HashMap::new();
    rank.insert(owner.clone(), 0);
    value.insert(owner.clone(), OWN_SCORE_VALUE);

    let all_ids: Vec<IdentityId> = data.identities().map(|i| i.id.clone()).collect();

    loop {
        let mut changed = false;
        for id in &all_ids {
            if id == owner {
                continue;
            }

            let mut best_rank: Option<u32> = rank.get(id).copied();

            // A direct trust assertion from the owner always makes the
            // subject known at rank <= 1, regardless of sign (spec §8
            // scenario 2: a distrusted direct trustee keeps a Score).
            if data.trust(owner, id).is_some() {
                best_rank = Some(best_rank.map_or(1, |r| r.min(1)));
            }

            for truster_trust in data.trusts_to(id) {
                if truster_trust.value <= 0 {
                    continue;
                }
                let truster = &truster_trust.truster_id;
                let Some(&rt) = rank.get(truster) else {
                    continue;
                };
                if !is_effective_propagator(truster, rt, &value) {
                    continue;
                }
                let candidate = rt + 1;
                best_rank = Some(best_rank.map_or(candidate, |r| r.min(candidate)));
            }

            if let Some(br) = best_rank {
                if rank.get(id).copied() != Some(br) {
                    rank.insert(id.clone(), br);
                    changed = true;
                }
            }

            if rank.contains_key(id) {
                let v = compute_value(data, id, &rank, &value);
                if value.get(id).copied() != Some(v) {
                    value.insert(id.clone(), v);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    all_ids
        .into_iter()
        .filter_map(|id| {
            let rank = *rank.get(&id)?;
            let value = value.get(&id).copied().unwrap_or(0);
            Some((id, Score::at_rank(rank, value)))
        })
        .chain(std::iter::once((owner.clone(), Score::at_rank(0, OWN_SCORE_VALUE))))
        .collect()
}

/// spec §3 invariant 5 / §8 scenario 2: whether `truster`'s outgoing trust
/// counts toward a trustee's rank and value. The owner itself always
/// counts; any other node only counts while its own score is non-negative —
/// this is the "not-a-propagator" cutoff for distrusted nodes, applied at
/// every rank rather than only rank >= 2, to match the documented scenario
/// outcome (see DESIGN.md Open Question resolution for C3).
fn is_effective_propagator(_truster: &IdentityId, rank: u32, value: &HashMap<IdentityId, i32>) -> bool {
    if rank == 0 {
        return true;
    }
    if capacity_for_rank(rank) == 0 {
        return false;
    }
    value
        .get(_truster)
        .copied()
        .map(|v| v >= 0)
        .unwrap_or(false)
}

fn compute_value(
    data: &GraphData,
    subject: &IdentityId,
    rank: &HashMap<IdentityId, u32>,
    value: &HashMap<IdentityId, i32>,
) -> i32 {
    let mut total: i64 = 0;
    for truster_trust in data.trusts_to(subject) {
        let truster = &truster_trust.truster_id;
        let Some(&rt) = rank.get(truster) else {
            continue;
        };
        if !is_effective_propagator(truster, rt, value) {
            continue;
        }
        let cap = capacity_for_rank(rt) as i64;
        if cap == 0 {
            continue;
        }
        total += truster_trust.value as i64 * cap / 100;
    }
    total.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// spec §4.3 `recomputeAllScores`: ground truth for every `OwnIdentity`.
/// Replaces the entire `Score` table.
pub fn recompute_all_scores(data: &mut GraphData) {
    let owners: Vec<IdentityId> = data.own_identity_ids().cloned().collect();
    for owner in &owners {
        let old_subjects: Vec<IdentityId> = data
            .scores_for_owner(owner)
            .map(|(subject, _)| subject.clone())
            .collect();
        for subject in old_subjects {
            data.remove_score(owner, &subject);
        }
        let fresh = recompute_scores_for_owner(data, owner);
        for (subject, score) in fresh {
            data.set_score(owner, &subject, score);
        }
    }
}

/// Owners for which a change touching `truster` could possibly matter: the
/// truster itself (if it is an `OwnIdentity`) plus every owner that already
/// has a `Score` entry for it. An owner with no existing score for `truster`
/// cannot newly discover it through *this* edge without already having
/// scored it — if `truster` was unreachable, it remains unreachable until
/// some other edge makes it reachable, which is itself a change processed
/// through this same entry point for that edge.
fn affected_owners(data: &GraphData, truster: &IdentityId) -> HashSet<IdentityId> {
    let mut owners: HashSet<IdentityId> = data
        .scores_for_subject(truster)
        .map(|(owner, _)| owner.clone())
        .collect();
    if data.is_own(truster) {
        owners.insert(truster.clone());
    }
    owners
}

fn recompute_for_owners(data: &mut GraphData, owners: &HashSet<IdentityId>) {
    for owner in owners {
        let old_subjects: Vec<IdentityId> = data
            .scores_for_owner(owner)
            .map(|(subject, _)| subject.clone())
            .collect();
        for subject in old_subjects {
            data.remove_score(owner, &subject);
        }
        let fresh = recompute_scores_for_owner(data, owner);
        for (subject, score) in fresh {
            data.set_score(owner, &subject, score);
        }
    }
}

/// spec §4.3 case 1: edge activated (`newValue > 0 && oldValue <= 0`).
pub fn handle_trust_activated(data: &mut GraphData, truster: &IdentityId, use_legacy: bool) {
    if use_legacy {
        recompute_all_scores(data);
        return;
    }
    let owners = affected_owners(data, truster);
    recompute_for_owners(data, &owners);
}

/// spec §4.3 case 2: edge deactivated — the historically slow "distrust"
/// case. The narrowing to `affected_owners` still applies: an owner that
/// never scored `truster` cannot be affected by its edges changing sign.
pub fn handle_trust_deactivated(data: &mut GraphData, truster: &IdentityId, use_legacy: bool) {
    if use_legacy {
        recompute_all_scores(data);
        return;
    }
    let owners = affected_owners(data, truster);
    recompute_for_owners(data, &owners);
}

/// spec §4.3 case 3: pure value change on the same side of zero — no
/// rank/capacity change, only downstream `value` adjustment.
pub fn handle_pure_value_change(data: &mut GraphData, truster: &IdentityId, use_legacy: bool) {
    if use_legacy {
        recompute_all_scores(data);
        return;
    }
    let owners = affected_owners(data, truster);
    recompute_for_owners(data, &owners);
}

/// spec §4.3: `trusterId` had a trust edge's value move from `old_value` to
/// `new_value`; dispatches to the appropriate case.
pub fn apply_trust_change(
    data: &mut GraphData,
    truster: &IdentityId,
    old_value: i32,
    new_value: i32,
    use_legacy: bool,
) {
    let activated = new_value > 0 && old_value <= 0;
    let deactivated = new_value <= 0 && old_value > 0;
    if activated {
        handle_trust_activated(data, truster, use_legacy);
    } else if deactivated {
        handle_trust_deactivated(data, truster, use_legacy);
    } else {
        handle_pure_value_change(data, truster, use_legacy);
    }
}

/// spec §4.3 `verifyAndCorrectStoredScores`: recompute into a scratch map,
/// diff against stored values, correct discrepancies, return the count.
pub fn verify_and_correct_stored_scores(data: &mut GraphData) -> u64 {
    let owners: Vec<IdentityId> = data.own_identity_ids().cloned().collect();
    let mut corrections = 0u64;

    for owner in &owners {
        let fresh = recompute_scores_for_owner(data, owner);

        let stale: Vec<IdentityId> = data
            .scores_for_owner(owner)
            .filter(|(subject, _)| !fresh.contains_key(subject))
            .map(|(subject, _)| subject.clone())
            .collect();
        for subject in stale {
            data.remove_score(owner, &subject);
            corrections += 1;
        }

        for (subject, score) in fresh {
            let needs_fix = data.score(owner, &subject) != Some(&score);
            if needs_fix {
                data.set_score(owner, &subject, score);
                corrections += 1;
            }
        }
    }

    corrections
}
