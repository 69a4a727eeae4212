pub mod api;
pub mod config;
pub mod convert;
pub mod detector;
pub mod engine;
pub mod error;
pub mod frames;
pub mod jobs;
pub mod metrics;
pub mod queue;
pub mod store;
pub mod vocabulary;

// Re-export commonly used types for easier testing
pub use crate::config::{BackendKind, Config, DetectorConfig, QueueConfig};
pub use crate::convert::{convert_detections, AnnotationDocument, BoxShape, LabeledBoxes};
pub use crate::detector::{create_backend, Backend, Checkpoint};
pub use crate::engine::{DetectEngine, OnnxEngine, RawDetection};
pub use crate::error::{AnnotationError, Result};
pub use crate::frames::make_image_list;
pub use crate::jobs::{AnnotationManager, JobMeta, JobStatusKind, StatusReport, CONFIDENCE_THRESHOLD};
pub use crate::queue::{job_id_for_task, JobPhase, JobQueue, JobRecord, JobState};
pub use crate::store::{AnnotationStore, Label, SledStore, Task, TaskStore};
pub use crate::vocabulary::{resolve_label_mapping, VOCABULARY};
