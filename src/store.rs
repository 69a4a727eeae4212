//! Task and annotation storage.
//!
//! Tasks (with their labels and image directory) and finished annotation
//! documents live outside this subsystem; the job pipeline only consumes
//! them through the [`TaskStore`] and [`AnnotationStore`] seams. The
//! production implementation is a Sled-backed document store with
//! serde_json payloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::Db as SledDb;

use crate::convert::AnnotationDocument;
use crate::error::{AnnotationError, Result};

/// A user-defined label of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Label {
    pub id: i64,
    pub name: String,
}

/// An annotation task: an ordered image sequence plus its label set.
/// Read-only to this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub tid: i64,
    pub name: String,
    /// Root of the task's frame images on disk.
    pub image_dir: PathBuf,
    pub labels: Vec<Label>,
}

/// Read access to task definitions.
pub trait TaskStore: Send + Sync {
    fn get_task(&self, tid: i64) -> Result<Task>;
}

/// Write access for finished annotation documents.
pub trait AnnotationStore: Send + Sync {
    /// Persist the document for a task. All-or-nothing: a partially
    /// annotated run must never reach this point.
    fn save_annotations(&self, tid: i64, document: &AnnotationDocument) -> Result<()>;
}

/// Sled-backed document store holding task definitions and annotation
/// documents as serde_json payloads.
pub struct SledStore {
    db: SledDb,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let db = sled::Config::new().path(path).use_compression(true).open()?;
        Ok(Arc::new(Self { db }))
    }

    fn task_key(tid: i64) -> String {
        format!("task/{}", tid)
    }

    fn annotation_key(tid: i64) -> String {
        format!("annotation/{}", tid)
    }

    /// Insert or replace a task definition. Used by deployment tooling and
    /// test fixtures; the job pipeline itself never writes tasks.
    pub fn put_task(&self, task: &Task) -> Result<()> {
        let payload = serde_json::to_vec(task)?;
        self.db.insert(Self::task_key(task.tid).as_bytes(), payload)?;
        self.db.flush()?;
        Ok(())
    }

    /// Fetch a stored annotation document, if any.
    pub fn get_annotations(&self, tid: i64) -> Result<Option<AnnotationDocument>> {
        match self.db.get(Self::annotation_key(tid).as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }
}

impl TaskStore for SledStore {
    fn get_task(&self, tid: i64) -> Result<Task> {
        let raw = self
            .db
            .get(Self::task_key(tid).as_bytes())?
            .ok_or_else(|| AnnotationError::Storage(format!("task {} not found", tid)))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

impl AnnotationStore for SledStore {
    fn save_annotations(&self, tid: i64, document: &AnnotationDocument) -> Result<()> {
        let payload = serde_json::to_vec(document)?;
        self.db.insert(Self::annotation_key(tid).as_bytes(), payload)?;
        self.db.flush()?;
        Ok(())
    }
}
