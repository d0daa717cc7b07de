//! Time-triggered campaign jobs.
//!
//! Jobs implement [`BatchJob`] and are registered on a [`JobScheduler`] with
//! a cron schedule. A single driver thread polls for due jobs and runs each
//! on its own worker thread; a single-flight guard per job id keeps two runs
//! of the same job from overlapping, since overlapping runs could double-send
//! before idempotency flags are committed. Tests bypass the clock entirely by
//! calling [`BatchJob::run`] with a fixed `now`.

mod aftercare;
mod recall;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::{error, info, warn};

use crate::store::StoreError;

pub use aftercare::{AftercareJob, AFTERCARE_WINDOW_END_HOURS, AFTERCARE_WINDOW_START_HOURS};
pub use recall::{RecallJob, RECALL_BATCH_LIMIT, RECALL_DORMANT_DAYS};

/// Counters reported by one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOutcome {
    /// Units examined (visits for aftercare, tenants for recall).
    pub processed: usize,
    /// Recipients a provider call succeeded for.
    pub sent: usize,
    /// Units skipped for configuration gaps or ineligibility.
    pub skipped: usize,
    /// Units where the provider call failed.
    pub failed: usize,
}

pub trait BatchJob: Send + Sync {
    fn id(&self) -> &'static str;

    /// One full pass over all tenants, evaluated against `now`. Faults in a
    /// single unit are handled inside the run and never abort the siblings;
    /// only a failure of the initial selection query surfaces here.
    fn run(&self, now: DateTime<Utc>) -> Result<JobOutcome, StoreError>;
}

/// Per-job-id single-flight guard shared by the driver and worker threads.
#[derive(Default)]
struct SingleFlight {
    running: Mutex<HashSet<&'static str>>,
}

impl SingleFlight {
    fn try_begin(&self, id: &'static str) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|poison| poison.into_inner());
        running.insert(id)
    }

    fn finish(&self, id: &'static str) {
        let mut running = self.running.lock().unwrap_or_else(|poison| poison.into_inner());
        running.remove(id);
    }
}

struct RegisteredJob {
    schedule: Schedule,
    job: Arc<dyn BatchJob>,
    next_fire: Option<DateTime<Utc>>,
}

pub struct JobScheduler {
    jobs: Vec<RegisteredJob>,
    poll_interval: Duration,
    running: Arc<SingleFlight>,
}

impl JobScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            jobs: Vec::new(),
            poll_interval,
            running: Arc::new(SingleFlight::default()),
        }
    }

    pub fn register(&mut self, schedule: Schedule, job: Arc<dyn BatchJob>) {
        info!(
            "registered job {} (next fire {:?})",
            job.id(),
            schedule.after(&Utc::now()).next()
        );
        self.jobs.push(RegisteredJob {
            schedule,
            job,
            next_fire: None,
        });
    }

    /// Run one registered job immediately on the current thread, honoring the
    /// single-flight guard. Used by tests and operational triggers.
    pub fn run_now(&self, id: &str, now: DateTime<Utc>) -> Option<Result<JobOutcome, StoreError>> {
        let registered = self.jobs.iter().find(|entry| entry.job.id() == id)?;
        if !self.running.try_begin(registered.job.id()) {
            warn!("job {} already running; manual trigger skipped", id);
            return None;
        }
        let result = registered.job.run(now);
        self.running.finish(registered.job.id());
        Some(result)
    }

    /// Start the driver thread. The returned control stops and joins it.
    pub fn start(mut self) -> JobControl {
        let stop = Arc::new(AtomicBool::new(false));
        let driver_stop = stop.clone();
        let poll_interval = self.poll_interval;

        let handle = thread::spawn(move || {
            let now = Utc::now();
            for entry in &mut self.jobs {
                entry.next_fire = entry.schedule.after(&now).next();
            }

            while !driver_stop.load(Ordering::Relaxed) {
                let now = Utc::now();
                for entry in &mut self.jobs {
                    let Some(due) = entry.next_fire else { continue };
                    if due > now {
                        continue;
                    }
                    entry.next_fire = entry.schedule.after(&now).next();

                    if !self.running.try_begin(entry.job.id()) {
                        warn!(
                            "job {} still running; skipping fire scheduled for {}",
                            entry.job.id(),
                            due
                        );
                        continue;
                    }

                    let job = entry.job.clone();
                    let running = self.running.clone();
                    thread::spawn(move || {
                        let started = Utc::now();
                        match job.run(started) {
                            Ok(outcome) => info!(
                                "job {} complete: processed={} sent={} skipped={} failed={}",
                                job.id(),
                                outcome.processed,
                                outcome.sent,
                                outcome.skipped,
                                outcome.failed
                            ),
                            Err(err) => error!("job {} failed: {}", job.id(), err),
                        }
                        running.finish(job.id());
                    });
                }
                thread::sleep(poll_interval);
            }
        });

        JobControl {
            stop,
            handles: vec![handle],
        }
    }
}

pub struct JobControl {
    stop: Arc<AtomicBool>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl JobControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn stop_and_join(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
