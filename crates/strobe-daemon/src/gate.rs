//! Single-flight admission gate for render jobs.
//!
//! The [`JobGate`] holds one semaphore permit. Admission takes it without
//! waiting, so a second submission while a job runs is rejected rather than
//! queued. The permit travels into the worker task and is returned when the
//! worker finishes, however it finishes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The job was admitted and its worker started.
    Accepted,
    /// Another job is running; nothing was created. Retry later.
    Busy,
}

/// Proof of admission. Dropping it reopens the gate.
#[derive(Debug)]
pub struct JobSlot {
    job_id: String,
    _permit: OwnedSemaphorePermit,
}

impl JobSlot {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// Admission control: at most one job executes at a time.
#[derive(Debug)]
pub struct JobGate {
    slot: Arc<Semaphore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for JobGate {
    fn default() -> Self {
        Self::new()
    }
}

impl JobGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            worker: Mutex::new(None),
        }
    }

    /// Take the single slot if it is free.
    ///
    /// Returns `None` immediately when a job already holds it.
    pub fn try_admit(&self, job_id: &str) -> Option<JobSlot> {
        if let Ok(permit) = Arc::clone(&self.slot).try_acquire_owned() {
            debug!(job_id, "Job admitted");
            Some(JobSlot {
                job_id: job_id.to_string(),
                _permit: permit,
            })
        } else {
            info!(job_id, "Render already in progress, rejecting job");
            None
        }
    }

    /// Run `work` on its own task while holding `slot`.
    pub async fn launch<F>(&self, slot: JobSlot, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job_id = slot.job_id.clone();
        let handle = tokio::spawn(async move {
            let _slot = slot;
            work.await;
        });
        info!(job_id, "Render worker started");
        *self.worker.lock().await = Some(handle);
    }

    /// Admit and launch in one step.
    pub async fn submit<F>(&self, job_id: &str, work: F) -> Admission
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.try_admit(job_id) {
            Some(slot) => {
                self.launch(slot, work).await;
                Admission::Accepted
            }
            None => Admission::Busy,
        }
    }

    /// Whether a job currently holds the slot.
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Wait for the most recently launched worker to finish.
    pub async fn wait_idle(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!(error = %e, "Render worker terminated abnormally");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn second_submission_is_rejected_while_first_runs() {
        let gate = JobGate::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = gate
            .submit("a", async move {
                let _ = release_rx.await;
            })
            .await;
        assert_eq!(first, Admission::Accepted);
        assert!(gate.is_busy());

        assert_eq!(gate.submit("b", async {}).await, Admission::Busy);

        release_tx.send(()).unwrap();
        gate.wait_idle().await;
        assert!(!gate.is_busy());
        assert_eq!(gate.submit("b", async {}).await, Admission::Accepted);
        gate.wait_idle().await;
    }

    #[tokio::test]
    async fn rejected_work_never_runs() {
        let gate = JobGate::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        gate.submit("a", async move {
            let _ = release_rx.await;
        })
        .await;

        let (ran_tx, mut ran_rx) = oneshot::channel::<()>();
        let outcome = gate
            .submit("b", async move {
                let _ = ran_tx.send(());
            })
            .await;
        assert_eq!(outcome, Admission::Busy);

        release_tx.send(()).unwrap();
        gate.wait_idle().await;
        assert!(ran_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_submissions_admit_exactly_one() {
        let gate = Arc::new(JobGate::new());
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let gate = Arc::clone(&gate);
            let mut rx = release_rx.clone();
            tasks.push(tokio::spawn(async move {
                gate.submit(&format!("job-{i}"), async move {
                    let _ = rx.wait_for(|released| *released).await;
                })
                .await
            }));
        }

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() == Admission::Accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        release_tx.send(true).unwrap();
        gate.wait_idle().await;
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn panicking_worker_releases_the_slot() {
        let gate = JobGate::new();
        #[allow(clippy::panic)]
        let outcome = gate.submit("a", async { panic!("worker blew up") }).await;
        assert_eq!(outcome, Admission::Accepted);
        gate.wait_idle().await;
        assert!(!gate.is_busy());
    }
}
