pub mod jobs;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::interfaces::scheduler::ScheduledJob;

/// Runs each registered job on its own interval until `stop` is called.
/// A late tick is dropped rather than replayed.
pub struct Scheduler {
    jobs: Vec<Arc<dyn ScheduledJob>>,
    handles: Vec<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            handles: Vec::new(),
            stop_tx: None,
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn ScheduledJob>) {
        self.jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.iter().map(|job| job.name().to_string()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    pub fn start(&mut self) {
        if self.is_running() {
            warn!("scheduler already started");
            return;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        for job in &self.jobs {
            let job = job.clone();
            let mut stop_rx = stop_rx.clone();
            self.handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(job.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(job = job.name(), interval = ?job.interval(), "job started");
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            debug!(job = job.name(), "tick");
                            if let Err(err) = job.run().await {
                                warn!(job = job.name(), error = %err, "job run failed");
                            }
                        }
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                info!(job = job.name(), "job stopped");
            }));
        }
        self.stop_tx = Some(stop_tx);
    }

    /// Signals every job and waits for its current run to finish.
    pub async fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
    }
}
