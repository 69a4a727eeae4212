//! Shared fixtures and test doubles for the integration tests.
//!
//! Mirrors the production wiring in `main.rs` - stores, queue, lifecycle
//! manager - with the detection backend replaced by a scripted double so
//! runs are deterministic and need no model artifacts.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use autolabel_node::config::{BackendKind, DetectorConfig, QueueConfig};
use autolabel_node::convert::{AnnotationDocument, LabeledBoxes};
use autolabel_node::detector::{Backend, Checkpoint, CheckpointFn};
use autolabel_node::error::{AnnotationError, Result};
use autolabel_node::jobs::{AnnotationManager, BackendFactory, StatusReport};
use autolabel_node::queue::JobQueue;
use autolabel_node::store::{AnnotationStore, Label, Task, TaskStore};

pub struct InMemoryTaskStore {
    pub tasks: HashMap<i64, Task>,
}

impl TaskStore for InMemoryTaskStore {
    fn get_task(&self, tid: i64) -> Result<Task> {
        self.tasks
            .get(&tid)
            .cloned()
            .ok_or_else(|| AnnotationError::Storage(format!("task {} not found", tid)))
    }
}

#[derive(Default)]
pub struct RecordingAnnotationStore {
    saved: Mutex<Vec<(i64, AnnotationDocument)>>,
}

impl RecordingAnnotationStore {
    pub fn saved(&self) -> Vec<(i64, AnnotationDocument)> {
        self.saved.lock().unwrap().clone()
    }
}

impl AnnotationStore for RecordingAnnotationStore {
    fn save_annotations(&self, tid: i64, document: &AnnotationDocument) -> Result<()> {
        self.saved.lock().unwrap().push((tid, document.clone()));
        Ok(())
    }
}

/// Backend double emitting the same detection rows for every frame,
/// honoring the per-frame checkpoint protocol.
pub struct ScriptedBackend {
    pub detections: Vec<(u32, f32, [i64; 4])>,
    pub frame_delay: Duration,
}

impl Backend for ScriptedBackend {
    fn run_detection(
        &mut self,
        images: &[PathBuf],
        mapping: &BTreeMap<u32, i64>,
        threshold: f32,
        checkpoint: CheckpointFn<'_>,
    ) -> Result<Option<LabeledBoxes>> {
        let mut result = LabeledBoxes::new();
        for (image_num, _path) in images.iter().enumerate() {
            if checkpoint(image_num, images.len())? == Checkpoint::Cancel {
                return Ok(None);
            }
            std::thread::sleep(self.frame_delay);
            for &(class_id, score, corners) in &self.detections {
                if score < threshold {
                    continue;
                }
                if let Some(&label_id) = mapping.get(&class_id) {
                    result.entry(label_id).or_default().push([
                        image_num as i64,
                        corners[0],
                        corners[1],
                        corners[2],
                        corners[3],
                    ]);
                }
            }
        }
        Ok(Some(result))
    }
}

pub struct Fixture {
    pub manager: Arc<AnnotationManager>,
    pub annotations: Arc<RecordingAnnotationStore>,
    pub model_dir: TempDir,
    _image_dir: TempDir,
}

/// Build a manager around one task (tid 1) with `frame_count` frames and
/// a scripted backend.
pub fn fixture(
    frame_count: usize,
    labels: Vec<Label>,
    detections: Vec<(u32, f32, [i64; 4])>,
    frame_delay: Duration,
) -> Fixture {
    let image_dir = TempDir::new().unwrap();
    for i in 0..frame_count {
        File::create(image_dir.path().join(format!("{}.jpg", i))).unwrap();
    }

    let model_dir = TempDir::new().unwrap();
    let model_path = model_dir.path().join("detector.onnx");
    File::create(&model_path).unwrap();

    let task = Task {
        tid: 1,
        name: "test task".to_string(),
        image_dir: image_dir.path().to_path_buf(),
        labels,
    };

    let tasks = Arc::new(InMemoryTaskStore {
        tasks: HashMap::from([(1, task)]),
    });
    let annotations = Arc::new(RecordingAnnotationStore::default());

    let factory: BackendFactory = Arc::new(move |_config| {
        Ok(Box::new(ScriptedBackend {
            detections: detections.clone(),
            frame_delay,
        }) as Box<dyn Backend>)
    });

    let queue = JobQueue::new(&QueueConfig {
        concurrency: 1,
        job_timeout_secs: 60,
    });

    let manager = Arc::new(AnnotationManager::with_backend_factory(
        queue,
        tasks,
        annotations.clone(),
        DetectorConfig {
            backend: BackendKind::Standard,
            model_path,
            plugins_dir: None,
        },
        factory,
    ));

    Fixture {
        manager,
        annotations,
        model_dir,
        _image_dir: image_dir,
    }
}

pub fn car_label() -> Vec<Label> {
    vec![Label {
        id: 99,
        name: "car".to_string(),
    }]
}

pub async fn wait_until(
    manager: &AnnotationManager,
    tid: i64,
    pred: impl Fn(&StatusReport) -> bool,
    timeout_ms: u64,
) -> StatusReport {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        let report = manager.status(tid);
        if pred(&report) {
            return report;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for status, last = {:?}", report);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
