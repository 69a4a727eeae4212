use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AnnotationError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub data_dir: PathBuf,
    pub detector_config: DetectorConfig,
    pub queue_config: QueueConfig,
}

/// Which detection backend variant a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// GPU/standard execution.
    Standard,
    /// CPU execution with an instruction-set-specific extension library.
    Accelerated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub backend: BackendKind,
    /// Path to the detection model artifact (.onnx).
    pub model_path: PathBuf,
    /// Directory holding accelerated CPU extension libraries. Required for
    /// the accelerated backend.
    pub plugins_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrent low-priority annotation jobs.
    pub concurrency: usize,
    /// Outer bound on one job run. Generous: large image sequences take days.
    pub job_timeout_secs: u64,
}

impl DetectorConfig {
    /// Check that the configured model artifact is present and readable.
    /// Run before a job is queued so a broken deployment rejects requests
    /// synchronously instead of producing failed jobs.
    pub fn validate(&self) -> Result<()> {
        if !self.model_path.is_file() {
            return Err(AnnotationError::Configuration(format!(
                "detector model not found at {}",
                self.model_path.display()
            )));
        }
        if self.backend == BackendKind::Accelerated && self.plugins_dir.is_none() {
            return Err(AnnotationError::Configuration(
                "ACCEL_PLUGINS_DIR must be set for the accelerated backend".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let api_port = env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        // Backend selection: CUDA-capable hosts (or hosts without the
        // accelerated toolkit) run the standard backend, everything else
        // runs the CPU-accelerated one.
        let cuda_support = env::var("CUDA_SUPPORT").map(|v| v == "yes").unwrap_or(false);
        let accel_toolkit = env::var("ACCEL_TOOLKIT").map(|v| v == "yes").unwrap_or(false);
        let backend = if cuda_support || !accel_toolkit {
            BackendKind::Standard
        } else {
            BackendKind::Accelerated
        };

        let model_path = env::var("DETECTOR_MODEL_PATH").map(PathBuf::from).map_err(|_| {
            AnnotationError::Configuration(
                "DETECTOR_MODEL_PATH env not found in the system".to_string(),
            )
        })?;

        let plugins_dir = env::var("ACCEL_PLUGINS_DIR").ok().map(PathBuf::from);
        if backend == BackendKind::Accelerated && plugins_dir.is_none() {
            return Err(AnnotationError::Configuration(
                "ACCEL_PLUGINS_DIR env not found in the system".to_string(),
            ));
        }

        let concurrency = env::var("QUEUE_CONCURRENCY")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .unwrap_or(1);

        // 7 days, matching the low-priority queue class this job runs on.
        let job_timeout_secs = env::var("JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "604800".to_string())
            .parse()
            .unwrap_or(604_800);

        Ok(Self {
            api_host,
            api_port,
            data_dir,
            detector_config: DetectorConfig {
                backend,
                model_path,
                plugins_dir,
            },
            queue_config: QueueConfig {
                concurrency,
                job_timeout_secs,
            },
        })
    }
}
