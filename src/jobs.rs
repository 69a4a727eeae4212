//! Job Lifecycle Manager
//!
//! Owns the background execution of annotation jobs: single-flight
//! enqueueing per task, the worker body with its per-frame
//! progress/cancellation checkpoint, status reporting, and cancellation.
//!
//! Lifecycle: absent -> queued -> started -> finished | failed. Terminal
//! records are deleted when their status is read, reopening the task's
//! slot. A canceled run is reported as finished - the caller asked for
//! nothing to happen and nothing happened; that is success from the
//! outside.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::DetectorConfig;
use crate::convert::{convert_detections, LabeledBoxes};
use crate::detector::{self, Backend, Checkpoint};
use crate::error::{AnnotationError, Result};
use crate::frames;
use crate::metrics;
use crate::queue::{job_id_for_task, JobPhase, JobQueue, JobRecord};
use crate::store::{AnnotationStore, Task, TaskStore};
use crate::vocabulary::resolve_label_mapping;

/// Minimum confidence for a detection to become an annotation.
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Caller-visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusKind {
    Unknown,
    Queued,
    Started,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobStatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

/// Bulk status entry for one task with a known job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub active: bool,
    pub success: bool,
}

/// Builds the detection backend for a run. Injectable so tests can swap
/// in scripted backends without model artifacts.
pub type BackendFactory = Arc<dyn Fn(&DetectorConfig) -> Result<Box<dyn Backend>> + Send + Sync>;

pub struct AnnotationManager {
    queue: Arc<JobQueue>,
    tasks: Arc<dyn TaskStore>,
    annotations: Arc<dyn AnnotationStore>,
    detector_config: DetectorConfig,
    backend_factory: BackendFactory,
}

impl AnnotationManager {
    pub fn new(
        queue: Arc<JobQueue>,
        tasks: Arc<dyn TaskStore>,
        annotations: Arc<dyn AnnotationStore>,
        detector_config: DetectorConfig,
    ) -> Self {
        Self::with_backend_factory(
            queue,
            tasks,
            annotations,
            detector_config,
            Arc::new(detector::create_backend),
        )
    }

    pub fn with_backend_factory(
        queue: Arc<JobQueue>,
        tasks: Arc<dyn TaskStore>,
        annotations: Arc<dyn AnnotationStore>,
        detector_config: DetectorConfig,
        backend_factory: BackendFactory,
    ) -> Self {
        Self {
            queue,
            tasks,
            annotations,
            detector_config,
            backend_factory,
        }
    }

    /// Queue an annotation job for a task.
    ///
    /// Rejects synchronously when a live job already holds the task's
    /// slot, when the task shares no labels with the detector vocabulary,
    /// or when the detector deployment is broken - in all three cases no
    /// job record is created.
    pub fn enqueue(&self, tid: i64) -> Result<()> {
        let job_id = job_id_for_task(tid);
        if let Some(record) = self.queue.fetch(&job_id) {
            if !record.snapshot().phase.is_terminal() {
                return Err(AnnotationError::AlreadyRunning(tid));
            }
        }

        let task = self.tasks.get_task(tid)?;
        let mapping = resolve_label_mapping(&task.labels)?;
        self.detector_config.validate()?;

        let annotations = Arc::clone(&self.annotations);
        let detector_config = self.detector_config.clone();
        let backend_factory = Arc::clone(&self.backend_factory);
        let mapping_for_log = mapping.clone();

        self.queue
            .submit(job_id, move |record| {
                run_annotation(record, task, mapping, detector_config, backend_factory, annotations)
            })
            .ok_or(AnnotationError::AlreadyRunning(tid))?;

        info!(task_id = tid, mapping = ?mapping_for_log, "annotation job enqueued");
        Ok(())
    }

    /// Report the job status for a task. Terminal records are deleted
    /// after being reported, so the next call returns `unknown` and the
    /// slot is open again. A pending, not-yet-observed cancellation
    /// reports as `finished`: from the outside the cancel has already
    /// succeeded.
    pub fn status(&self, tid: i64) -> StatusReport {
        let job_id = job_id_for_task(tid);
        let record = match self.queue.fetch(&job_id) {
            Some(record) => record,
            None => {
                return StatusReport {
                    status: JobStatusKind::Unknown,
                    progress: None,
                }
            }
        };

        let state = record.snapshot();
        if state.cancel_requested {
            return StatusReport {
                status: JobStatusKind::Finished,
                progress: None,
            };
        }

        match state.phase {
            JobPhase::Queued => StatusReport {
                status: JobStatusKind::Queued,
                progress: None,
            },
            JobPhase::Started => StatusReport {
                status: JobStatusKind::Started,
                progress: Some(state.progress),
            },
            JobPhase::Finished => {
                self.queue.delete(&job_id);
                StatusReport {
                    status: JobStatusKind::Finished,
                    progress: None,
                }
            }
            JobPhase::Failed => {
                self.queue.delete(&job_id);
                StatusReport {
                    status: JobStatusKind::Failed,
                    progress: None,
                }
            }
        }
    }

    /// Request cooperative cancellation of a live job. The worker observes
    /// the flag at its next frame boundary; nothing is interrupted
    /// mid-inference.
    pub fn request_cancel(&self, tid: i64) -> Result<()> {
        let job_id = job_id_for_task(tid);
        let record = self
            .queue
            .fetch(&job_id)
            .ok_or(AnnotationError::NotRunning(tid))?;

        if record.snapshot().phase.is_terminal() {
            return Err(AnnotationError::NotRunning(tid));
        }

        record.request_cancel();
        info!(task_id = tid, "annotation cancellation requested");
        Ok(())
    }

    /// Status summary for a batch of tasks; ids without a job record are
    /// omitted.
    pub fn bulk_status(&self, tids: &[i64]) -> BTreeMap<i64, JobMeta> {
        let mut result = BTreeMap::new();
        for &tid in tids {
            if let Some(record) = self.queue.fetch(&job_id_for_task(tid)) {
                let state = record.snapshot();
                result.insert(
                    tid,
                    JobMeta {
                        active: matches!(state.phase, JobPhase::Queued | JobPhase::Started),
                        success: state.phase != JobPhase::Failed,
                    },
                );
            }
        }
        result
    }
}

/// Worker body for one annotation run.
///
/// Every outcome - completion, cancellation, any failure - records a
/// terminal state; nothing escapes this boundary. Failures are logged
/// here exactly once, with task context, and surface to callers only as
/// the `failed` status.
async fn run_annotation(
    record: Arc<JobRecord>,
    task: Task,
    mapping: BTreeMap<u32, i64>,
    detector_config: DetectorConfig,
    backend_factory: BackendFactory,
    annotations: Arc<dyn AnnotationStore>,
) {
    let tid = task.tid;
    record.mark_started();
    info!(task_id = tid, "annotation job started");

    match detect_and_save(&record, task, mapping, detector_config, backend_factory, annotations)
        .await
    {
        Ok(Some(count)) => {
            record.finish(JobPhase::Finished);
            metrics::JOBS_COMPLETED.inc();
            info!(
                task_id = tid,
                boxes = count,
                elapsed_ms = record.age_ms(),
                "annotation job done"
            );
        }
        Ok(None) => {
            // Cancellation: all partial work is discarded and the run
            // counts as finished.
            record.finish(JobPhase::Finished);
            metrics::JOBS_CANCELED.inc();
            info!(task_id = tid, "annotation job canceled by user");
        }
        Err(e) => {
            record.finish(JobPhase::Failed);
            metrics::JOBS_FAILED.inc();
            error!(task_id = tid, error = %e, "annotation job failed");
        }
    }
}

/// Run detection over the task's frames and persist the converted
/// document. `Ok(None)` means the run observed a cancellation request and
/// wrote nothing.
async fn detect_and_save(
    record: &Arc<JobRecord>,
    task: Task,
    mapping: BTreeMap<u32, i64>,
    detector_config: DetectorConfig,
    backend_factory: BackendFactory,
    annotations: Arc<dyn AnnotationStore>,
) -> Result<Option<usize>> {
    let tid = task.tid;
    let images = frames::make_image_list(&task.image_dir)?;
    info!(task_id = tid, frames = images.len(), "image list built");

    let checkpoint_record = Arc::clone(record);
    let detections: Option<LabeledBoxes> = tokio::task::spawn_blocking(move || {
        // Backend (and engine handles) live and die inside this scope,
        // whichever way it exits.
        let mut backend = backend_factory(&detector_config)?;

        let mut checkpoint = |done: usize, total: usize| -> Result<Checkpoint> {
            let state = checkpoint_record.snapshot();
            if state.cancel_requested {
                checkpoint_record.clear_cancel();
                return Ok(Checkpoint::Cancel);
            }
            let progress = if total == 0 {
                0
            } else {
                (done * 100 / total) as u8
            };
            checkpoint_record.set_progress(progress);
            metrics::FRAMES_PROCESSED.inc();
            Ok(Checkpoint::Continue)
        };

        backend.run_detection(&images, &mapping, CONFIDENCE_THRESHOLD, &mut checkpoint)
    })
    .await
    .map_err(|e| AnnotationError::Inference(format!("detection worker died: {}", e)))??;

    let detections = match detections {
        Some(detections) => detections,
        None => return Ok(None),
    };

    let document = convert_detections(&detections);
    let count = document.create.boxes.len();
    annotations.save_annotations(tid, &document)?;
    Ok(Some(count))
}
