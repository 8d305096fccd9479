//! Maintenance Scheduler (C7, spec §4.7, §5) — periodic full score
//! verification, store defragmentation, and the `DelayedBackgroundJob`
//! primitive they (and C5/C6) share.
//!
//! Grounded on the teacher's synchronous daemon idiom: a worker thread plus
//! a `Duration` sleep/wake loop (`cli/src/nonosctl/daemon.rs`,
//! `capsule_runtime.rs`'s restart-backoff monitor thread) rather than an
//! async task scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::score_engine;
use crate::store::GraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Waiting,
    Running,
    Terminating,
    Terminated,
}

struct Shared {
    state: Mutex<StateData>,
    cv: Condvar,
    interrupted: Arc<AtomicBool>,
}

/// Handle the running `work` closure polls at its own suspension points to
/// notice a `terminate()` called mid-run (spec §5: "the job's run loop must
/// observe it at every suspension point").
#[derive(Clone)]
pub struct Interrupted(Arc<AtomicBool>);

impl Interrupted {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct StateData {
    state: JobState,
    wake_at: Option<Instant>,
    rerun_requested: bool,
    default_delay: Duration,
}

/// spec §5: `IDLE -> WAITING -> RUNNING -> IDLE`, coalescing concurrent
/// `triggerExecution` calls into at most one pending run per delay window.
pub struct DelayedBackgroundJob {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl DelayedBackgroundJob {
    pub fn new<F>(name: &'static str, default_delay: Duration, work: F) -> Self
    where
        F: Fn(&Interrupted) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(StateData {
                state: JobState::Idle,
                wake_at: None,
                rerun_requested: false,
                default_delay,
            }),
            cv: Condvar::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("wotd-job-{name}"))
            .spawn(move || run_loop(worker_shared, work, name))
            .expect("failed to spawn background job thread");

        DelayedBackgroundJob {
            shared,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> JobState {
        self.shared.state.lock().expect("job mutex poisoned").state
    }

    /// `triggerExecution(delayMs)`: schedules a run after `delay`,
    /// coalescing with any pending wait and shortening (never lengthening)
    /// an existing one; one follow-up run is queued if currently running.
    pub fn trigger_execution(&self, delay: Duration) {
        let mut data = self.shared.state.lock().expect("job mutex poisoned");
        match data.state {
            JobState::Idle => {
                data.state = JobState::Waiting;
                data.wake_at = Some(Instant::now() + delay);
                self.shared.cv.notify_all();
            }
            JobState::Waiting => {
                let candidate = Instant::now() + delay;
                data.wake_at = Some(match data.wake_at {
                    Some(existing) if existing <= candidate => existing,
                    _ => candidate,
                });
                self.shared.cv.notify_all();
            }
            JobState::Running => {
                data.rerun_requested = true;
            }
            JobState::Terminating | JobState::Terminated => {}
        }
    }

    pub fn trigger_now(&self) {
        self.trigger_execution(Duration::from_millis(0));
    }

    /// Idempotent; from `Idle`/`Waiting` completes immediately, from
    /// `Running` flips the interrupt flag and waits for the worker to reach
    /// `Terminated`.
    pub fn terminate(&self) {
        let mut data = self.shared.state.lock().expect("job mutex poisoned");
        match data.state {
            JobState::Idle | JobState::Waiting => {
                data.state = JobState::Terminated;
                self.shared.cv.notify_all();
            }
            JobState::Running => {
                data.state = JobState::Terminating;
                self.shared.interrupted.store(true, Ordering::SeqCst);
                self.shared.cv.notify_all();
            }
            JobState::Terminating | JobState::Terminated => {}
        }
    }

    /// Wall-clock bounded; returns whether `Terminated` was actually
    /// reached within the budget.
    pub fn wait_for_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout.mul_f32(1.1);
        let mut data = self.shared.state.lock().expect("job mutex poisoned");
        while data.state != JobState::Terminated {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return data.state == JobState::Terminated;
            }
            let (guard, _) = self
                .shared
                .cv
                .wait_timeout(data, remaining)
                .expect("job mutex poisoned");
            data = guard;
        }
        true
    }
}

impl Drop for DelayedBackgroundJob {
    fn drop(&mut self) {
        self.terminate();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<F>(shared: Arc<Shared>, work: F, name: &'static str)
where
    F: Fn(&Interrupted),
{
    let interrupted = Interrupted(Arc::clone(&shared.interrupted));
    loop {
        let mut data = shared.state.lock().expect("job mutex poisoned");
        loop {
            match data.state {
                JobState::Terminating => {
                    data.state = JobState::Terminated;
                    shared.cv.notify_all();
                    return;
                }
                JobState::Idle => {
                    data = shared.cv.wait(data).expect("job mutex poisoned");
                }
                JobState::Waiting => {
                    // Re-read the wake time each pass: `trigger_execution`
                    // may have shortened it while we were parked.
                    let wake_at = data.wake_at.expect("waiting job has a wake time");
                    let now = Instant::now();
                    if now >= wake_at {
                        data.state = JobState::Running;
                        break;
                    }
                    let (guard, _) = shared
                        .cv
                        .wait_timeout(data, wake_at - now)
                        .expect("job mutex poisoned");
                    data = guard;
                }
                JobState::Running | JobState::Terminated => unreachable!(
                    "run_loop only parks in Idle/Waiting; Running/Terminated belong to the worker or are final"
                ),
            }
        }
        drop(data);

        debug!(job = name, "background job starting run");
        work(&interrupted);
        debug!(job = name, "background job finished run");

        let mut data = shared.state.lock().expect("job mutex poisoned");
        shared.interrupted.store(false, Ordering::SeqCst);
        if data.state == JobState::Terminating {
            data.state = JobState::Terminated;
            shared.cv.notify_all();
            return;
        }
        if data.rerun_requested {
            data.rerun_requested = false;
            data.state = JobState::Waiting;
            data.wake_at = Some(Instant::now() + data.default_delay);
        } else {
            data.state = JobState::Idle;
        }
        shared.cv.notify_all();
    }
}

/// Wires the three periodic jobs spec §4.7 describes — full verification,
/// defragmentation, and (stubbed, out of scope here) puzzle housekeeping —
/// onto the shared `DelayedBackgroundJob` primitive.
pub struct MaintenanceScheduler {
    verification_job: DelayedBackgroundJob,
    defrag_job: DelayedBackgroundJob,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<GraphStore>, config: &Config) -> Self {
        let verification_delay = Duration::from_secs(config.full_verification_interval_days * 86_400);
        let defrag_delay = Duration::from_secs(config.defrag_interval_days * 86_400);

        let verification_store = Arc::clone(&store);
        let verification_job = DelayedBackgroundJob::new("full-verification", verification_delay, move |_interrupt| {
            let mut tx = verification_store.begin();
            let corrections = score_engine::verify_and_correct_stored_scores(tx.data_mut());
            tx.commit();
            verification_store.set_last_full_verification(Utc::now());
            if corrections > 0 {
                warn!(corrections, "full verification corrected stored scores");
            } else {
                info!("full verification found no discrepancies");
            }
        });

        let defrag_store = Arc::clone(&store);
        let defrag_job = DelayedBackgroundJob::new("defrag", defrag_delay, move |_interrupt| {
            if let Err(e) = defrag_store.persist() {
                warn!(error = %e, "store defragmentation pass failed to persist");
            }
            defrag_store.set_last_defrag(Utc::now());
        });

        MaintenanceScheduler {
            verification_job,
            defrag_job,
        }
    }

    pub fn trigger_verification(&self, delay: Duration) {
        self.verification_job.trigger_execution(delay);
    }

    pub fn trigger_defrag(&self, delay: Duration) {
        self.defrag_job.trigger_execution(delay);
    }

    /// spec §4.7: both jobs must run promptly after an `OwnIdentity`
    /// deletion, to evict leaked data.
    pub fn on_own_identity_deleted(&self) {
        self.verification_job.trigger_now();
        self.defrag_job.trigger_now();
    }

    pub fn terminate_all(&self) {
        self.verification_job.terminate();
        self.defrag_job.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn coalesces_triggers_into_one_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);
        let job = DelayedBackgroundJob::new("test", Duration::from_millis(30), move |_interrupt| {
            worker_counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..10 {
            job.trigger_execution(Duration::from_millis(30));
        }

        thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        job.terminate();
        assert!(job.wait_for_termination(Duration::from_secs(1)));
    }

    #[test]
    fn trigger_while_running_queues_exactly_one_followup() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);
        let job = DelayedBackgroundJob::new("test2", Duration::from_millis(10), move |_interrupt| {
            worker_counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
        });

        job.trigger_execution(Duration::from_millis(0));
        thread::sleep(Duration::from_millis(20));
        job.trigger_execution(Duration::from_millis(0));
        job.trigger_execution(Duration::from_millis(0));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        job.terminate();
    }

    #[test]
    fn terminate_from_idle_is_immediate() {
        let job = DelayedBackgroundJob::new("test3", Duration::from_secs(1), |_interrupt| {});
        job.terminate();
        assert!(job.wait_for_termination(Duration::from_millis(500)));
    }

    #[test]
    fn terminate_during_running_observes_interrupt_flag() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker_counter = Arc::clone(&counter);
        let job = Arc::new(DelayedBackgroundJob::new(
            "test4",
            Duration::from_millis(10),
            move |interrupt| {
                for _ in 0..500 {
                    if interrupt.is_set() {
                        return;
                    }
                    worker_counter.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                }
            },
        ));

        job.trigger_execution(Duration::from_millis(0));
        thread::sleep(Duration::from_millis(50));
        job.terminate();
        assert!(job.wait_for_termination(Duration::from_secs(2)));

        let iterations = counter.load(Ordering::SeqCst);
        assert!(
            iterations < 500,
            "job should have observed the interrupt and stopped early, ran {iterations} iterations"
        );
    }
}
