//! Detector vocabulary and label reconciliation.
//!
//! The detection backend is trained on a fixed vocabulary of common object
//! categories. A task's user-defined labels are matched against it by name;
//! only labels present on both sides take part in a job, and detections for
//! anything else are dropped.

use std::collections::BTreeMap;

use crate::error::{AnnotationError, Result};
use crate::store::Label;

/// Backend vocabulary: category name to backend class id. The class ids
/// are fixed by the model's training set and contain gaps.
pub const VOCABULARY: &[(&str, u32)] = &[
    ("person", 1),
    ("bicycle", 2),
    ("car", 3),
    ("motorcycle", 4),
    ("airplane", 5),
    ("bus", 6),
    ("train", 7),
    ("truck", 8),
    ("boat", 9),
    ("traffic_light", 10),
    ("fire_hydrant", 11),
    ("stop_sign", 13),
    ("parking_meter", 14),
    ("bench", 15),
    ("bird", 16),
    ("cat", 17),
    ("dog", 18),
    ("horse", 19),
    ("sheep", 20),
    ("cow", 21),
    ("elephant", 22),
    ("bear", 23),
    ("zebra", 24),
    ("giraffe", 25),
    ("backpack", 27),
    ("umbrella", 28),
    ("handbag", 31),
    ("tie", 32),
    ("suitcase", 33),
    ("frisbee", 34),
    ("skis", 35),
    ("snowboard", 36),
    ("sports_ball", 37),
    ("kite", 38),
    ("baseball_bat", 39),
    ("baseball_glove", 40),
    ("skateboard", 41),
    ("surfboard", 42),
    ("tennis_racket", 43),
    ("bottle", 44),
    ("wine_glass", 46),
    ("cup", 47),
    ("fork", 48),
    ("knife", 49),
    ("spoon", 50),
    ("bowl", 51),
    ("banana", 52),
    ("apple", 53),
    ("sandwich", 54),
    ("orange", 55),
    ("broccoli", 56),
    ("carrot", 57),
    ("hot_dog", 58),
    ("pizza", 59),
    ("donut", 60),
    ("cake", 61),
    ("chair", 62),
    ("couch", 63),
    ("potted_plant", 64),
    ("bed", 65),
    ("dining_table", 67),
    ("toilet", 70),
    ("tv", 72),
    ("laptop", 73),
    ("mouse", 74),
    ("remote", 75),
    ("keyboard", 76),
    ("cell_phone", 77),
    ("microwave", 78),
    ("oven", 79),
    ("toaster", 80),
    ("sink", 81),
    ("refrigerator", 83),
    ("book", 84),
    ("clock", 85),
    ("vase", 86),
    ("scissors", 87),
    ("teddy_bear", 88),
    ("hair_drier", 89),
    ("toothbrush", 90),
];

/// Resolve the mapping from backend class id to task label id.
///
/// Pure: the result depends only on the task's labels and the static
/// vocabulary. An empty intersection is an error - a job without any
/// matching label would never produce an annotation and must not be
/// enqueued.
pub fn resolve_label_mapping(labels: &[Label]) -> Result<BTreeMap<u32, i64>> {
    let mut mapping = BTreeMap::new();
    for label in labels {
        if let Some(&(_, class_id)) = VOCABULARY.iter().find(|(name, _)| *name == label.name) {
            mapping.insert(class_id, label.id);
        }
    }

    if mapping.is_empty() {
        return Err(AnnotationError::NoLabelsMatched);
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: i64, name: &str) -> Label {
        Label {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_resolves_overlapping_labels_only() {
        let labels = vec![label(11, "car"), label(12, "pedestrian"), label(13, "dog")];
        let mapping = resolve_label_mapping(&labels).unwrap();

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping.get(&3), Some(&11));
        assert_eq!(mapping.get(&18), Some(&13));
    }

    #[test]
    fn test_no_overlap_is_an_error() {
        let labels = vec![label(1, "pedestrian"), label(2, "cyclist")];
        let err = resolve_label_mapping(&labels).unwrap_err();
        assert!(matches!(err, AnnotationError::NoLabelsMatched));
    }

    #[test]
    fn test_vocabulary_class_ids_are_unique() {
        let mut ids: Vec<u32> = VOCABULARY.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), VOCABULARY.len());
    }
}
