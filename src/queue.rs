//! Background job queue.
//!
//! In-process stand-in for the deployment's job broker: a map of shared
//! job records plus one tokio task per submitted job, bounded by a
//! low-priority semaphore. Deduplication happens on the job id, which is
//! derived from the task id, so at most one live job can exist per task.
//!
//! The job record is the only mutable state shared between the enqueuing
//! caller, the worker, and status-polling callers. Progress and the
//! cancellation flag are two fields of one atomically-replaced value
//! behind a single lock, never independent mutations, and every party
//! reads through the same `Arc` so reads always observe prior writes.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::config::QueueConfig;
use crate::metrics;

/// Job id for a task's annotation run. One task, one slot.
pub fn job_id_for_task(tid: i64) -> String {
    format!("annotation.create/{}", tid)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Queued,
    Started,
    Finished,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Finished | JobPhase::Failed)
    }
}

/// Snapshot of one job's shared state.
#[derive(Debug, Clone)]
pub struct JobState {
    pub phase: JobPhase,
    /// Percent of frames checkpointed, 0-100.
    pub progress: u8,
    /// Set by a cancel request, cleared by the worker when observed.
    pub cancel_requested: bool,
}

/// Shared mutable record of one job. All transitions replace the state
/// value under one write lock; terminal phases are absorbing.
pub struct JobRecord {
    state: RwLock<JobState>,
    /// Unix timestamp (milliseconds) when the job was enqueued.
    created_at: i64,
}

impl JobRecord {
    fn queued() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(JobState {
                phase: JobPhase::Queued,
                progress: 0,
                cancel_requested: false,
            }),
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Age of the job since enqueueing, in milliseconds.
    pub fn age_ms(&self) -> u64 {
        (chrono::Utc::now().timestamp_millis() - self.created_at).max(0) as u64
    }

    pub fn snapshot(&self) -> JobState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mark_started(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.phase == JobPhase::Queued {
            state.phase = JobPhase::Started;
            state.progress = 0;
            metrics::JOBS_RUNNING.inc();
        }
    }

    pub fn set_progress(&self, progress: u8) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.phase.is_terminal() {
            state.progress = progress;
        }
    }

    /// Idempotent: re-requesting cancellation of the same run is a no-op.
    pub fn request_cancel(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.phase.is_terminal() && !state.cancel_requested {
            state.cancel_requested = true;
        }
    }

    pub fn clear_cancel(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.cancel_requested = false;
    }

    /// Transition into a terminal phase. Returns false (and changes
    /// nothing) if the record is already terminal.
    pub fn finish(&self, phase: JobPhase) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.phase.is_terminal() {
            return false;
        }
        if state.phase == JobPhase::Started {
            metrics::JOBS_RUNNING.dec();
        }
        state.phase = phase;
        true
    }
}

/// The queue itself: shared records plus bounded execution.
pub struct JobQueue {
    jobs: DashMap<String, Arc<JobRecord>>,
    slots: Arc<Semaphore>,
    job_timeout: Duration,
}

impl JobQueue {
    pub fn new(config: &QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            jobs: DashMap::new(),
            slots: Arc::new(Semaphore::new(config.concurrency.max(1))),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
        })
    }

    /// Submit a job under `job_id`. Returns `None` when a non-terminal
    /// record already holds the slot; a terminal leftover is replaced.
    ///
    /// The job body owns its terminal transition; the queue only steps in
    /// when the body times out or dies without recording one.
    pub fn submit<F, Fut>(self: &Arc<Self>, job_id: String, make: F) -> Option<Arc<JobRecord>>
    where
        F: FnOnce(Arc<JobRecord>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let record = match self.jobs.entry(job_id.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().snapshot().phase.is_terminal() {
                    return None;
                }
                let record = JobRecord::queued();
                entry.insert(Arc::clone(&record));
                record
            }
            Entry::Vacant(entry) => {
                let record = JobRecord::queued();
                entry.insert(Arc::clone(&record));
                record
            }
        };

        metrics::JOBS_ENQUEUED.inc();

        let queue = Arc::clone(self);
        let run_record = Arc::clone(&record);
        let watch_record = Arc::clone(&record);
        let watch_id = job_id.clone();

        let worker = tokio::spawn(async move {
            let _permit = match queue.slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    if run_record.finish(JobPhase::Failed) {
                        metrics::JOBS_FAILED.inc();
                    }
                    return;
                }
            };

            if tokio::time::timeout(queue.job_timeout, make(Arc::clone(&run_record)))
                .await
                .is_err()
            {
                warn!(job_id = %job_id, "job exceeded the queue timeout");
                if run_record.finish(JobPhase::Failed) {
                    metrics::JOBS_FAILED.inc();
                }
            }
        });

        // A job body that dies without reaching its own terminal
        // transition still must leave a terminal record behind.
        tokio::spawn(async move {
            if worker.await.is_err() {
                error!(job_id = %watch_id, "job worker aborted abnormally");
                if watch_record.finish(JobPhase::Failed) {
                    metrics::JOBS_FAILED.inc();
                }
            }
        });

        Some(record)
    }

    pub fn fetch(&self, job_id: &str) -> Option<Arc<JobRecord>> {
        self.jobs.get(job_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the record, reopening the task's slot.
    pub fn delete(&self, job_id: &str) {
        self.jobs.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> Arc<JobQueue> {
        JobQueue::new(&QueueConfig {
            concurrency: 1,
            job_timeout_secs: 60,
        })
    }

    #[tokio::test]
    async fn test_submit_dedupes_live_jobs() {
        let queue = test_queue();

        let first = queue.submit("annotation.create/1".to_string(), |record| async move {
            // Hold the slot open until the test is done observing.
            tokio::time::sleep(Duration::from_millis(200)).await;
            record.finish(JobPhase::Finished);
        });
        assert!(first.is_some());

        let second = queue.submit("annotation.create/1".to_string(), |record| async move {
            record.finish(JobPhase::Finished);
        });
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_terminal_record_is_replaced_on_resubmit() {
        let queue = test_queue();

        let record = queue
            .submit("annotation.create/2".to_string(), |record| async move {
                record.finish(JobPhase::Finished);
            })
            .unwrap();

        // Wait for the body to reach its terminal state.
        for _ in 0..50 {
            if record.snapshot().phase.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(record.snapshot().phase.is_terminal());

        let resubmit = queue.submit("annotation.create/2".to_string(), |record| async move {
            record.finish(JobPhase::Finished);
        });
        assert!(resubmit.is_some());
    }

    #[tokio::test]
    async fn test_terminal_phases_are_absorbing() {
        let record = JobRecord::queued();
        record.mark_started();
        assert!(record.finish(JobPhase::Failed));
        assert!(!record.finish(JobPhase::Finished));
        assert_eq!(record.snapshot().phase, JobPhase::Failed);
    }

    #[tokio::test]
    async fn test_cancel_flag_is_idempotent() {
        let record = JobRecord::queued();
        record.request_cancel();
        record.request_cancel();
        assert!(record.snapshot().cancel_requested);

        record.clear_cancel();
        assert!(!record.snapshot().cancel_requested);
    }
}
