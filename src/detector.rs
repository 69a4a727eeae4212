//! Inference Backend Adapter
//!
//! One polymorphic detection capability over two interchangeable backend
//! variants:
//! - `standard`: GPU/standard execution, downscales oversized frames by
//!   half, boxes arrive normalized to the source image.
//! - `accelerated`: CPU execution with an instruction-set-specific
//!   extension library, thumbnails frames into a fixed square and tracks
//!   per-axis scale factors.
//!
//! Both run the same per-image protocol: checkpoint, load, downscale,
//! detect, map boxes back to source pixels, filter by mapping and score.
//! The cooperative cancellation/progress checkpoint fires once per image;
//! a single-image inference call is atomic.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::config::{BackendKind, DetectorConfig};
use crate::convert::LabeledBoxes;
use crate::engine::{DetectEngine, OnnxEngine};
use crate::error::{AnnotationError, Result};

pub use accelerated::AcceleratedBackend;
pub use standard::StandardBackend;

// ============================================================================
// Adapter Surface
// ============================================================================

/// Outcome of the per-frame cooperative checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    /// Cancellation observed: abandon the run, discarding all detections.
    Cancel,
}

/// Per-frame checkpoint callback: `(frames_done, total_frames)`.
pub type CheckpointFn<'a> = &'a mut dyn FnMut(usize, usize) -> Result<Checkpoint>;

/// A detection backend bound to its engine. Engine handles live inside
/// the backend value, so every exit path - completion, cancellation,
/// error - releases them when the backend is dropped.
pub trait Backend: Send {
    /// Run detection over an ordered image list.
    ///
    /// Returns `Ok(None)` when the checkpoint requested cancellation;
    /// otherwise the per-label `[frame, xmin, ymin, xmax, ymax]` rows.
    /// Only detections whose class id is a non-zero key of `mapping` and
    /// whose score reaches `threshold` are kept.
    fn run_detection(
        &mut self,
        images: &[PathBuf],
        mapping: &BTreeMap<u32, i64>,
        threshold: f32,
        checkpoint: CheckpointFn<'_>,
    ) -> Result<Option<LabeledBoxes>>;
}

/// Build the backend selected by runtime configuration.
pub fn create_backend(config: &DetectorConfig) -> Result<Box<dyn Backend>> {
    match config.backend {
        BackendKind::Standard => {
            info!(model = %config.model_path.display(), "using standard detection backend");
            let engine = OnnxEngine::load(&config.model_path)?;
            Ok(Box::new(StandardBackend::new(engine)))
        }
        BackendKind::Accelerated => {
            let plugins_dir = config.plugins_dir.as_deref().ok_or_else(|| {
                AnnotationError::Configuration(
                    "accelerated backend requires a plugins directory".to_string(),
                )
            })?;
            let extension = accelerated::resolve_cpu_extension(plugins_dir)?;
            info!(
                model = %config.model_path.display(),
                extension = %extension.display(),
                "using accelerated detection backend"
            );
            let engine = OnnxEngine::load(&config.model_path)?;
            Ok(Box::new(AcceleratedBackend::new(engine, extension)))
        }
    }
}

/// Shared tail of the per-image protocol: keep the detection only when its
/// class maps to a task label and its confidence is sufficient, then file
/// the pixel-space row under the resolved label id.
fn file_detection(
    result: &mut LabeledBoxes,
    mapping: &BTreeMap<u32, i64>,
    threshold: f32,
    class_id: u32,
    score: f32,
    frame: usize,
    corners: [i64; 4],
) {
    if class_id == 0 || score < threshold {
        return;
    }
    if let Some(&label_id) = mapping.get(&class_id) {
        result.entry(label_id).or_default().push([
            frame as i64,
            corners[0],
            corners[1],
            corners[2],
            corners[3],
        ]);
    }
}

// ============================================================================
// Standard Backend
// ============================================================================

pub mod standard {
    use super::*;
    use crate::metrics::{self, Timer};
    use image::imageops::FilterType;
    use image::GenericImageView;

    /// Frames larger than this are halved before inference to bound
    /// compute cost. Boxes are normalized to the source image, so the
    /// downscale does not enter the coordinate math.
    const MAX_WIDTH: u32 = 1920;
    const MAX_HEIGHT: u32 = 1080;

    /// GPU/standard execution variant. Raw boxes are
    /// `[ymin, xmin, ymax, xmax]` fractions of the source image.
    pub struct StandardBackend<E: DetectEngine> {
        engine: E,
    }

    impl<E: DetectEngine> StandardBackend<E> {
        pub fn new(engine: E) -> Self {
            Self { engine }
        }
    }

    impl<E: DetectEngine> Backend for StandardBackend<E> {
        fn run_detection(
            &mut self,
            images: &[PathBuf],
            mapping: &BTreeMap<u32, i64>,
            threshold: f32,
            checkpoint: CheckpointFn<'_>,
        ) -> Result<Option<LabeledBoxes>> {
            let mut result = LabeledBoxes::new();

            for (image_num, path) in images.iter().enumerate() {
                if checkpoint(image_num, images.len())? == Checkpoint::Cancel {
                    return Ok(None);
                }

                let image = image::open(path).map_err(|e| {
                    AnnotationError::Inference(format!("cannot load {}: {}", path.display(), e))
                })?;
                let (width, height) = image.dimensions();

                let working = if width > MAX_WIDTH || height > MAX_HEIGHT {
                    image.resize_exact(width / 2, height / 2, FilterType::Triangle)
                } else {
                    image
                };

                let timer = Timer::new();
                let detections = self.engine.detect(&working.to_rgb8())?;
                timer.observe_duration_seconds(&metrics::INFERENCE_LATENCY);

                for det in detections {
                    let corners = normalize_box(det.box_, width, height);
                    file_detection(
                        &mut result,
                        mapping,
                        threshold,
                        det.class_id,
                        det.score,
                        image_num,
                        corners,
                    );
                }
            }

            Ok(Some(result))
        }
    }

    /// Map a `[ymin, xmin, ymax, xmax]` fractional box to pixel corners
    /// `[xmin, ymin, xmax, ymax]`, clamped to the image bounds.
    fn normalize_box(box_: [f32; 4], width: u32, height: u32) -> [i64; 4] {
        let w = width as f32;
        let h = height as f32;
        let xmin = (box_[1] * w).clamp(0.0, w) as i64;
        let ymin = (box_[0] * h).clamp(0.0, h) as i64;
        let xmax = (box_[3] * w).clamp(0.0, w) as i64;
        let ymax = (box_[2] * h).clamp(0.0, h) as i64;
        [xmin, ymin, xmax, ymax]
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_normalize_box_scales_and_swaps_axes() {
            let corners = normalize_box([0.1, 0.2, 0.5, 0.6], 1000, 500);
            assert_eq!(corners, [200, 50, 600, 250]);
        }

        #[test]
        fn test_normalize_box_clamps_to_bounds() {
            let corners = normalize_box([-0.1, -0.2, 1.2, 1.5], 1000, 500);
            assert_eq!(corners, [0, 0, 1000, 500]);
        }
    }
}

// ============================================================================
// Accelerated Backend
// ============================================================================

pub mod accelerated {
    use super::*;
    use crate::metrics::{self, Timer};
    use image::{GenericImageView, RgbImage};
    use std::path::Path;

    /// Fixed square input side for the accelerated model.
    const INPUT_SIDE: u32 = 600;

    /// Extension libraries by required CPU feature, in preference order.
    const CPU_EXTENSIONS: &[(&str, &str)] = &[
        ("avx2", "libcpu_extension_avx2.so"),
        ("sse4", "libcpu_extension_sse4.so"),
    ];

    /// Locate the accelerated extension library matching the host CPU,
    /// falling through the fixed preference order.
    pub fn resolve_cpu_extension(plugins_dir: &Path) -> Result<PathBuf> {
        for (feature, library) in CPU_EXTENSIONS {
            if cpu_supports(feature) {
                let path = plugins_dir.join(library);
                if !path.is_file() {
                    return Err(AnnotationError::Configuration(format!(
                        "cpu extension {} not found in {}",
                        library,
                        plugins_dir.display()
                    )));
                }
                return Ok(path);
            }
        }
        Err(AnnotationError::UnsupportedHardware(
            "accelerated detection requires a CPU supporting avx2 or sse4".to_string(),
        ))
    }

    fn cpu_supports(feature: &str) -> bool {
        #[cfg(target_arch = "x86_64")]
        {
            match feature {
                "avx2" => std::arch::is_x86_feature_detected!("avx2"),
                "sse4" => std::arch::is_x86_feature_detected!("sse4.1"),
                _ => false,
            }
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = feature;
            false
        }
    }

    /// CPU execution variant. Frames are thumbnailed into a fixed
    /// 600x600 square; raw boxes are `[xmin, ymin, xmax, ymax]` fractions
    /// of that square, mapped back through the per-axis scale factors.
    pub struct AcceleratedBackend<E: DetectEngine> {
        engine: E,
        /// Resolved extension library; loading it is the engine's concern.
        _extension: PathBuf,
    }

    impl<E: DetectEngine> AcceleratedBackend<E> {
        pub fn new(engine: E, extension: PathBuf) -> Self {
            Self {
                engine,
                _extension: extension,
            }
        }
    }

    impl<E: DetectEngine> Backend for AcceleratedBackend<E> {
        fn run_detection(
            &mut self,
            images: &[PathBuf],
            mapping: &BTreeMap<u32, i64>,
            threshold: f32,
            checkpoint: CheckpointFn<'_>,
        ) -> Result<Option<LabeledBoxes>> {
            let mut result = LabeledBoxes::new();

            for (image_num, path) in images.iter().enumerate() {
                if checkpoint(image_num, images.len())? == Checkpoint::Cancel {
                    return Ok(None);
                }

                let image = image::open(path).map_err(|e| {
                    AnnotationError::Inference(format!("cannot load {}: {}", path.display(), e))
                })?;
                let (width, height) = image.dimensions();

                let thumb = image.thumbnail(INPUT_SIDE, INPUT_SIDE);
                let (thumb_w, thumb_h) = thumb.dimensions();
                let dw = INPUT_SIDE as f32 / thumb_w as f32;
                let dh = INPUT_SIDE as f32 / thumb_h as f32;

                // The model wants an exact square; pad the short axis.
                let mut square = RgbImage::new(INPUT_SIDE, INPUT_SIDE);
                image::imageops::replace(&mut square, &thumb.to_rgb8(), 0, 0);

                let timer = Timer::new();
                let detections = self.engine.detect(&square)?;
                timer.observe_duration_seconds(&metrics::INFERENCE_LATENCY);

                for det in detections {
                    let corners = normalize_box(det.box_, width, height, dw, dh);
                    file_detection(
                        &mut result,
                        mapping,
                        threshold,
                        det.class_id,
                        det.score,
                        image_num,
                        corners,
                    );
                }
            }

            Ok(Some(result))
        }
    }

    /// Map a `[xmin, ymin, xmax, ymax]` fractional box in square space
    /// back to source pixel corners through the per-axis scale factors,
    /// clamped to the image bounds.
    fn normalize_box(box_: [f32; 4], width: u32, height: u32, dw: f32, dh: f32) -> [i64; 4] {
        let w = width as f32;
        let h = height as f32;
        let xmin = (box_[0] * dw * w).clamp(0.0, w) as i64;
        let ymin = (box_[1] * dh * h).clamp(0.0, h) as i64;
        let xmax = (box_[2] * dw * w).clamp(0.0, w) as i64;
        let ymax = (box_[3] * dh * h).clamp(0.0, h) as i64;
        [xmin, ymin, xmax, ymax]
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RawDetection;
    use image::RgbImage;

    /// Engine double emitting a fixed script of detections per image.
    pub struct ScriptedEngine {
        pub per_image: Vec<Vec<RawDetection>>,
        pub calls: usize,
    }

    impl DetectEngine for ScriptedEngine {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>> {
            let out = self.per_image.get(self.calls).cloned().unwrap_or_default();
            self.calls += 1;
            Ok(out)
        }
    }

    fn write_frames(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("{}.jpg", i));
                RgbImage::new(64, 48).save(&path).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_standard_backend_filters_and_maps() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_frames(dir.path(), 2);

        let engine = ScriptedEngine {
            per_image: vec![
                vec![
                    // Mapped, confident: kept.
                    RawDetection {
                        class_id: 3,
                        score: 0.9,
                        box_: [0.0, 0.0, 0.5, 0.5],
                    },
                    // Below threshold: dropped.
                    RawDetection {
                        class_id: 3,
                        score: 0.2,
                        box_: [0.0, 0.0, 1.0, 1.0],
                    },
                    // Not in the mapping: dropped.
                    RawDetection {
                        class_id: 7,
                        score: 0.9,
                        box_: [0.0, 0.0, 1.0, 1.0],
                    },
                ],
                vec![RawDetection {
                    class_id: 3,
                    score: 0.6,
                    box_: [0.25, 0.25, 0.75, 0.75],
                }],
            ],
            calls: 0,
        };

        let mut mapping = BTreeMap::new();
        mapping.insert(3u32, 42i64);

        let mut backend = StandardBackend::new(engine);
        let mut checkpoint = |_done: usize, _total: usize| Ok(Checkpoint::Continue);
        let result = backend
            .run_detection(&images, &mapping, 0.5, &mut checkpoint)
            .unwrap()
            .unwrap();

        let boxes = &result[&42];
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0], [0, 0, 0, 32, 24]);
        assert_eq!(boxes[1], [1, 16, 12, 48, 36]);
    }

    #[test]
    fn test_cancellation_stops_before_inference() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_frames(dir.path(), 3);

        let engine = ScriptedEngine {
            per_image: vec![],
            calls: 0,
        };
        let mut backend = StandardBackend::new(engine);

        let mapping = BTreeMap::from([(3u32, 1i64)]);
        let mut checkpoint = |done: usize, _total: usize| {
            if done == 1 {
                Ok(Checkpoint::Cancel)
            } else {
                Ok(Checkpoint::Continue)
            }
        };

        let result = backend
            .run_detection(&images, &mapping, 0.5, &mut checkpoint)
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_checkpoint_sees_every_frame_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let images = write_frames(dir.path(), 4);

        let engine = ScriptedEngine {
            per_image: vec![],
            calls: 0,
        };
        let mut backend = StandardBackend::new(engine);
        let mapping = BTreeMap::from([(3u32, 1i64)]);

        let mut seen = Vec::new();
        let mut checkpoint = |done: usize, total: usize| {
            seen.push((done, total));
            Ok(Checkpoint::Continue)
        };
        backend
            .run_detection(&images, &mapping, 0.5, &mut checkpoint)
            .unwrap();

        assert_eq!(seen, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }
}
