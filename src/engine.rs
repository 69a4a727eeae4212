//! Raw detection capability.
//!
//! The neural network behind a backend is opaque to the rest of the
//! pipeline: the only thing a backend adapter consumes is "give me the
//! detections for this image". [`DetectEngine`] is that seam, and
//! [`OnnxEngine`] is the production implementation executing an ONNX
//! detection graph with tract.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tract_onnx::prelude::*;

use crate::error::{AnnotationError, Result};

/// One detected object instance in one image, in backend-native
/// coordinate space. Interpretation of `box_` (axis order, reference
/// frame) is the consuming adapter's contract with its model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub score: f32,
    pub box_: [f32; 4],
}

/// The detect capability a backend adapter runs on.
pub trait DetectEngine: Send {
    /// Run detection over a single prepared image.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// ONNX graph executor. Detection models emit a `[1, 1, N, 7]` tensor of
/// `(image_id, class, score, x1, y1, x2, y2)` rows; rows with class 0 are
/// padding and dropped here.
pub struct OnnxEngine {
    model_path: PathBuf,
    /// Execution plans keyed by input size. Plans are shape-specialized,
    /// and the standard backend feeds images of varying size.
    plans: HashMap<(u32, u32), TypedSimplePlan<TypedModel>>,
}

impl OnnxEngine {
    /// Open an engine over the model artifact at `model_path`. The graph
    /// itself is loaded lazily per input shape; only artifact presence is
    /// verified here.
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.is_file() {
            return Err(AnnotationError::Configuration(format!(
                "detector model not found at {}",
                model_path.display()
            )));
        }
        Ok(Self {
            model_path: model_path.to_path_buf(),
            plans: HashMap::new(),
        })
    }

    fn plan_for(&mut self, width: u32, height: u32) -> Result<&TypedSimplePlan<TypedModel>> {
        if !self.plans.contains_key(&(width, height)) {
            let plan = tract_onnx::onnx()
                .model_for_path(&self.model_path)
                .and_then(|m| {
                    m.with_input_fact(
                        0,
                        f32::fact([1, 3, height as usize, width as usize]).into(),
                    )
                })
                .and_then(|m| m.into_optimized())
                .and_then(|m| m.into_runnable())
                .map_err(|e| {
                    AnnotationError::Inference(format!(
                        "cannot build execution plan for {}: {}",
                        self.model_path.display(),
                        e
                    ))
                })?;
            self.plans.insert((width, height), plan);
        }
        Ok(&self.plans[&(width, height)])
    }
}

impl DetectEngine for OnnxEngine {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let (width, height) = image.dimensions();
        let plan = self.plan_for(width, height)?;

        let input: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width as usize),
            |(_, c, y, x)| image[(x as u32, y as u32)][c] as f32 / 255.0,
        )
        .into();

        let outputs = plan
            .run(tvec!(input.into()))
            .map_err(|e| AnnotationError::Inference(format!("inference call failed: {}", e)))?;

        let view = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| AnnotationError::Inference(format!("unexpected output tensor: {}", e)))?;

        let flat: Vec<f32> = view.iter().copied().collect();
        let detections = flat
            .chunks_exact(7)
            .filter(|row| row[1] as u32 != 0)
            .map(|row| RawDetection {
                class_id: row[1] as u32,
                score: row[2],
                box_: [row[3], row[4], row[5], row[6]],
            })
            .collect();

        Ok(detections)
    }
}
