//! End-to-end scenarios, matching the literal worked examples used to derive
//! this engine's fixed-point relaxation algorithm.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;

use wotd::download_policy::{partition_for, should_fetch_identity, Partition};
use wotd::downloader::slow::{abort_fetch, store_new_edition_hint};
use wotd::maintenance::DelayedBackgroundJob;
use wotd::score_engine;
use wotd::{GraphStore, IdentityId, TrustGraph};

fn remote(id: &str) -> IdentityId {
    IdentityId::from_public_bytes(id.as_bytes())
}

fn fresh_store(name: &str) -> GraphStore {
    GraphStore::new(std::env::temp_dir().join(format!("wotd-scenarios-{name}")))
}

#[test]
fn scenario_1_simple_chain() {
    let store = fresh_store("chain");
    let graph = TrustGraph::new(false);

    let owner = graph
        .create_own_identity(&store, "USK@.../o/0".into(), "SSK@.../o/0".into(), None, false)
        .unwrap();
    let a = remote("a");
    let b = remote("b");
    graph.add_identity_from_uri(&store, a.clone(), "USK@.../a/0".into(), None, 0).unwrap();
    graph.add_identity_from_uri(&store, b.clone(), "USK@.../b/0".into(), None, 0).unwrap();

    graph.set_trust(&store, &owner, &a, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &a, &b, 100, String::new(), 0).unwrap();

    let snapshot = store.snapshot();
    let score_a = snapshot.score(&owner, &a).unwrap();
    assert_eq!((score_a.rank, score_a.capacity, score_a.value), (1, 40, 100));

    let score_b = snapshot.score(&owner, &b).unwrap();
    assert_eq!((score_b.rank, score_b.capacity, score_b.value), (2, 16, 40));

    assert!(should_fetch_identity(&snapshot, &a));
    assert!(should_fetch_identity(&snapshot, &b));
    assert_eq!(partition_for(&snapshot, &a), Partition::Fast);
    assert_eq!(partition_for(&snapshot, &b), Partition::Slow);
}

#[test]
fn scenario_2_distrust_pruning() {
    let store = fresh_store("distrust");
    let graph = TrustGraph::new(false);

    let owner = graph
        .create_own_identity(&store, "USK@.../o/0".into(), "SSK@.../o/0".into(), None, false)
        .unwrap();
    let a = remote("a");
    let b = remote("b");
    graph.add_identity_from_uri(&store, a.clone(), "USK@.../a/0".into(), None, 0).unwrap();
    graph.add_identity_from_uri(&store, b.clone(), "USK@.../b/0".into(), None, 0).unwrap();
    graph.set_trust(&store, &owner, &a, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &a, &b, 100, String::new(), 0).unwrap();

    let report = graph.set_trust(&store, &owner, &a, -1, String::new(), 0).unwrap();

    let snapshot = store.snapshot();
    let score_a = snapshot.score(&owner, &a).unwrap();
    assert_eq!(score_a.value, -1);
    assert_eq!(score_a.rank, 1);
    assert_eq!(score_a.capacity, 0);

    assert!(snapshot.score(&owner, &b).is_none());
    assert!(!should_fetch_identity(&snapshot, &b));
    assert!(report.touched.iter().any(|(o, s)| o == &owner && s == &b));
}

#[test]
fn scenario_3_edition_hint_priority() {
    let store = fresh_store("hint-priority");
    let graph = TrustGraph::new(false);

    let owner = graph
        .create_own_identity(&store, "USK@.../o/0".into(), "SSK@.../o/0".into(), None, false)
        .unwrap();
    let a = remote("a");
    let c = remote("c");
    let x = remote("x");
    graph.add_identity_from_uri(&store, a.clone(), "USK@.../a/0".into(), None, 0).unwrap();
    graph.add_identity_from_uri(&store, c.clone(), "USK@.../c/0".into(), None, 0).unwrap();
    graph.add_identity_from_uri(&store, x.clone(), "USK@.../x/0".into(), None, 0).unwrap();
    graph.set_trust(&store, &owner, &a, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &owner, &c, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &a, &x, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &c, &x, 100, String::new(), 0).unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let pad = b"priority-pad";
    store_new_edition_hint(&store, a.clone(), x.clone(), 5, date, 40, 1, 1, pad).unwrap();
    store_new_edition_hint(&store, c.clone(), x.clone(), 99, date, 16, 1, 1, pad).unwrap();

    let best = store.snapshot().best_hint().unwrap().clone();
    assert_eq!(best.source_id, a);
    assert_eq!(best.edition, 5);
}

#[test]
fn scenario_4_hint_obsoletion() {
    let store = fresh_store("hint-obsolete");
    let graph = TrustGraph::new(false);

    let owner = graph
        .create_own_identity(&store, "USK@.../o/0".into(), "SSK@.../o/0".into(), None, false)
        .unwrap();
    let a = remote("a");
    let x = remote("x");
    graph.add_identity_from_uri(&store, a.clone(), "USK@.../a/0".into(), None, 0).unwrap();
    graph.add_identity_from_uri(&store, x.clone(), "USK@.../x/0".into(), None, 0).unwrap();
    graph.set_trust(&store, &owner, &a, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &a, &x, 100, String::new(), 0).unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let pad = b"obsolete-pad";
    let stored = store_new_edition_hint(&store, a.clone(), x.clone(), 7, date, 40, 1, 1, pad).unwrap();
    assert!(stored);

    graph.on_fetched_and_parsed_successfully(&store, &x, 7).unwrap();
    assert!(store.snapshot().hint(&a, &x).is_none());

    let rejected = store_new_edition_hint(&store, a.clone(), x.clone(), 6, date, 40, 1, 1, pad).unwrap();
    assert!(!rejected);
}

#[test]
fn scenario_5_restore_own_identity() {
    let store = fresh_store("restore");
    let graph = TrustGraph::new(false);

    let restorable = remote("restorable");
    graph
        .add_identity_from_uri(&store, restorable.clone(), "USK@.../r/0".into(), None, 0)
        .unwrap();

    for i in 0..100 {
        let truster = remote(&format!("truster-{i}"));
        graph
            .create_own_identity(
                &store,
                format!("USK@.../t{i}/0"),
                format!("SSK@.../t{i}/0"),
                None,
                false,
            )
            .unwrap();
        graph
            .set_trust(&store, &truster, &restorable, 100, String::new(), 0)
            .unwrap();
    }

    let incoming_before: usize = store.snapshot().trusts_to(&restorable).count();
    assert_eq!(incoming_before, 100);

    graph
        .restore_own_identity(&store, &restorable, "SSK@.../r/0".into(), 0)
        .unwrap();

    let snapshot = store.snapshot();
    assert!(snapshot.is_own(&restorable));
    // 100 preserved incoming trusts plus the freshly asserted self-trust.
    assert_eq!(snapshot.trusts_to(&restorable).count(), 101);
    assert!(snapshot.trust(&restorable, &restorable).is_some());
    assert_eq!(snapshot.score(&restorable, &restorable).unwrap().rank, 0);
    assert_eq!(partition_for(&snapshot, &restorable), Partition::Fast);

    abort_fetch(&store, &restorable);
}

#[test]
fn scenario_6_delayed_job_coalescing() {
    let counter = Arc::new(AtomicUsize::new(0));
    let worker_counter = Arc::clone(&counter);
    let job = Arc::new(DelayedBackgroundJob::new(
        "coalesce-scenario",
        Duration::from_millis(50),
        move |_interrupt| {
            worker_counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(10));
        },
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let job = Arc::clone(&job);
        handles.push(thread::spawn(move || {
            job.trigger_execution(Duration::from_millis(50));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    thread::sleep(Duration::from_millis(300));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    job.terminate();
    assert!(job.wait_for_termination(Duration::from_secs(1)));
}

#[test]
fn verify_after_full_scenario_finds_no_corrections() {
    let store = fresh_store("verify-clean");
    let graph = TrustGraph::new(false);

    let owner = graph
        .create_own_identity(&store, "USK@.../o/0".into(), "SSK@.../o/0".into(), None, false)
        .unwrap();
    let a = remote("a");
    let b = remote("b");
    graph.add_identity_from_uri(&store, a.clone(), "USK@.../a/0".into(), None, 0).unwrap();
    graph.add_identity_from_uri(&store, b.clone(), "USK@.../b/0".into(), None, 0).unwrap();
    graph.set_trust(&store, &owner, &a, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &a, &b, 100, String::new(), 0).unwrap();
    graph.set_trust(&store, &owner, &a, -1, String::new(), 0).unwrap();

    let mut tx = store.begin();
    let corrections = score_engine::verify_and_correct_stored_scores(tx.data_mut());
    tx.commit();
    assert_eq!(corrections, 0);
}
