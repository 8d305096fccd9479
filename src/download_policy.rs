//! Download Policy (C4, spec §4.4): the `shouldFetchIdentity` predicate and
//! the Fast/Slow partition, plus the coordinator that turns Score changes
//! into `startFetch`/`abortFetch` signals for C5/C6.

use std::collections::HashSet;

use crate::ids::IdentityId;
use crate::store::GraphData;
use crate::trust_graph::ChangeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Fast,
    Slow,
}

/// spec §4.4: true iff some `OwnIdentity` has `capacity > 0`, or a finite
/// rank with `value >= 0`. An `OwnIdentity` is always fetchable by itself.
pub fn should_fetch_identity(data: &GraphData, subject: &IdentityId) -> bool {
    if data.is_own(subject) {
        return true;
    }
    data.scores_for_subject(subject).any(|(_, score)| score.allows_fetch())
}

/// spec §4.4: `rank <= 1` from some owner (a direct trust, any sign, since
/// rank 1 is assigned regardless of sign — see score_engine) puts the
/// identity under the Fast Downloader; otherwise the Slow Downloader.
pub fn partition_for(data: &GraphData, subject: &IdentityId) -> Partition {
    let directly_trusted = data
        .scores_for_subject(subject)
        .any(|(_, score)| score.rank <= 1);
    if directly_trusted {
        Partition::Fast
    } else {
        Partition::Slow
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTransition {
    StartFast(IdentityId),
    AbortFast(IdentityId),
    StartSlow(IdentityId),
    AbortSlow(IdentityId),
}

/// Tracks which downloader currently manages which identity, so repeated
/// calls to `reconcile` only emit transitions on an actual flip (spec §4.4:
/// "Whenever any Score(O,x) is inserted, updated or deleted ... if it
/// flipped, calls startFetch(x) or abortFetch(x)").
#[derive(Debug, Default)]
pub struct DownloadCoordinator {
    fast: HashSet<IdentityId>,
    slow: HashSet<IdentityId>,
}

impl DownloadCoordinator {
    pub fn new() -> Self {
        DownloadCoordinator::default()
    }

    pub fn is_fast_managed(&self, id: &IdentityId) -> bool {
        self.fast.contains(id)
    }

    pub fn is_slow_managed(&self, id: &IdentityId) -> bool {
        self.slow.contains(id)
    }

    /// Re-evaluates every subject touched by `report` and returns the
    /// transitions needed to bring C5/C6 in sync — spec §4.4: "transitions
    /// across this boundary are signalled as abortFetch on one side
    /// followed by startFetch on the other, in a single transaction."
    pub fn reconcile(&mut self, data: &GraphData, report: &ChangeReport) -> Vec<FetchTransition> {
        let mut subjects: HashSet<IdentityId> = HashSet::new();
        for (_, subject) in &report.touched {
            subjects.insert(subject.clone());
        }

        let mut transitions = Vec::new();
        for subject in subjects {
            let wants_fetch = should_fetch_identity(data, &subject);
            let wanted_partition = if wants_fetch {
                Some(partition_for(data, &subject))
            } else {
                None
            };

            let currently_fast = self.fast.contains(&subject);
            let currently_slow = self.slow.contains(&subject);

            match wanted_partition {
                Some(Partition::Fast) => {
                    if currently_slow {
                        self.slow.remove(&subject);
                        transitions.push(FetchTransition::AbortSlow(subject.clone()));
                    }
                    if !currently_fast {
                        self.fast.insert(subject.clone());
                        transitions.push(FetchTransition::StartFast(subject.clone()));
                    }
                }
                Some(Partition::Slow) => {
                    if currently_fast {
                        self.fast.remove(&subject);
                        transitions.push(FetchTransition::AbortFast(subject.clone()));
                    }
                    if !currently_slow {
                        self.slow.insert(subject.clone());
                        transitions.push(FetchTransition::StartSlow(subject.clone()));
                    }
                }
                None => {
                    if currently_fast {
                        self.fast.remove(&subject);
                        transitions.push(FetchTransition::AbortFast(subject.clone()));
                    }
                    if currently_slow {
                        self.slow.remove(&subject);
                        transitions.push(FetchTransition::AbortSlow(subject.clone()));
                    }
                }
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::identity::{Identity, IdentityKind};
    use crate::model::trust::Trust;
    use crate::score_engine;
    use chrono::Utc;

    fn id(seed: &str) -> IdentityId {
        IdentityId::from_public_bytes(seed.as_bytes())
    }

    fn own_identity(seed: &str) -> Identity {
        let mut identity =
            Identity::new_remote(id(seed), format!("USK@.../{seed}/0"), None, Utc::now()).unwrap();
        identity.kind = IdentityKind::Own {
            insert_key: format!("SSK@.../{seed}/0"),
            last_inserted_edition: 0,
        };
        identity
    }

    fn remote_identity(seed: &str) -> Identity {
        Identity::new_remote(id(seed), format!("USK@.../{seed}/0"), None, Utc::now()).unwrap()
    }

    #[test]
    fn direct_trustee_is_fast_transitive_is_slow() {
        let mut data = crate::store::GraphData::default();
        data.insert_identity(own_identity("owner")).unwrap();
        data.insert_identity(remote_identity("a")).unwrap();
        data.insert_identity(remote_identity("b")).unwrap();
        data.upsert_trust(Trust::new(id("owner"), id("a"), 100, String::new(), 0, Utc::now()).unwrap());
        data.upsert_trust(Trust::new(id("a"), id("b"), 100, String::new(), 0, Utc::now()).unwrap());
        score_engine::recompute_all_scores(&mut data);

        assert!(should_fetch_identity(&data, &id("a")));
        assert!(should_fetch_identity(&data, &id("b")));
        assert_eq!(partition_for(&data, &id("a")), Partition::Fast);
        assert_eq!(partition_for(&data, &id("b")), Partition::Slow);
    }

    #[test]
    fn coordinator_emits_abort_on_unreachable_flip() {
        let mut data = crate::store::GraphData::default();
        data.insert_identity(own_identity("owner")).unwrap();
        data.insert_identity(remote_identity("a")).unwrap();
        data.insert_identity(remote_identity("b")).unwrap();
        data.upsert_trust(Trust::new(id("owner"), id("a"), 100, String::new(), 0, Utc::now()).unwrap());
        data.upsert_trust(Trust::new(id("a"), id("b"), 100, String::new(), 0, Utc::now()).unwrap());
        score_engine::recompute_all_scores(&mut data);

        let mut coordinator = DownloadCoordinator::new();
        let initial_report = ChangeReport {
            touched: vec![(id("owner"), id("a")), (id("owner"), id("b"))],
        };
        coordinator.reconcile(&data, &initial_report);
        assert!(coordinator.is_fast_managed(&id("a")));
        assert!(coordinator.is_slow_managed(&id("b")));

        data.upsert_trust(Trust::new(id("owner"), id("a"), -1, String::new(), 0, Utc::now()).unwrap());
        score_engine::apply_trust_change(&mut data, &id("owner"), 100, -1, false);

        let follow_up = ChangeReport {
            touched: vec![(id("owner"), id("b"))],
        };
        let transitions = coordinator.reconcile(&data, &follow_up);
        assert!(transitions.contains(&FetchTransition::AbortSlow(id("b"))));
        assert!(!coordinator.is_slow_managed(&id("b")));
    }
}
