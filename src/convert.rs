//! Detection-to-annotation conversion.
//!
//! Turns the per-label detection mapping produced by a backend run into the
//! annotation document the annotation store consumes. Deterministic and
//! side-effect-free: identical input yields an identical document, down to
//! client id assignment and serialization order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `[frame_index, xmin, ymin, xmax, ymax]` rows per task label id, in
/// detection emission order.
pub type LabeledBoxes = BTreeMap<i64, Vec<[i64; 5]>>;

/// One proposed bounding box annotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoxShape {
    pub label_id: i64,
    pub frame: i64,
    pub xtl: i64,
    pub ytl: i64,
    pub xbr: i64,
    pub ybr: i64,
    pub z_order: i64,
    pub group_id: i64,
    pub occluded: bool,
    pub attributes: Vec<serde_json::Value>,
    /// Client-side id, unique within one conversion run.
    pub id: i64,
}

/// One bucket of typed shape collections. Auto-annotation only ever fills
/// `boxes`; the other collections stay empty but must be present so the
/// consumer always sees the full document shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationContainer {
    pub boxes: Vec<BoxShape>,
    pub polygons: Vec<serde_json::Value>,
    pub polylines: Vec<serde_json::Value>,
    pub points: Vec<serde_json::Value>,
    pub box_paths: Vec<serde_json::Value>,
    pub polygon_paths: Vec<serde_json::Value>,
    pub polyline_paths: Vec<serde_json::Value>,
    pub points_paths: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnnotationDocument {
    pub create: AnnotationContainer,
    pub update: AnnotationContainer,
    pub delete: AnnotationContainer,
}

/// Assemble the annotation document for a finished detection run.
///
/// Shapes land in `create.boxes` with client ids assigned from 0 in
/// emission order across all labels, not per label.
pub fn convert_detections(detections: &LabeledBoxes) -> AnnotationDocument {
    let mut document = AnnotationDocument::default();

    let mut client_idx = 0;
    for (label_id, boxes) in detections {
        for b in boxes {
            document.create.boxes.push(BoxShape {
                label_id: *label_id,
                frame: b[0],
                xtl: b[1],
                ytl: b[2],
                xbr: b[3],
                ybr: b[4],
                z_order: 0,
                group_id: 0,
                occluded: false,
                attributes: Vec::new(),
                id: client_idx,
            });
            client_idx += 1;
        }
    }

    document
}
