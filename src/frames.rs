//! Frame discovery for annotation tasks.
//!
//! A task's image directory holds one `.jpg` per frame, named by its
//! integer frame index. Detection runs walk the frames in index order,
//! which is not the order the filesystem enumerates them in.

use std::path::{Path, PathBuf};

use crate::error::{AnnotationError, Result};

/// Recursively collect the frame images under `image_dir`, ordered
/// ascending by the frame index encoded in each file stem.
///
/// Any stem that does not parse as a base-10 integer aborts the listing
/// with the underlying parse failure attached.
pub fn make_image_list(image_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/**/*.jpg", image_dir.display());
    let entries = glob::glob(&pattern)
        .map_err(|e| AnnotationError::Configuration(format!("bad frame pattern: {}", e)))?;

    let mut frames: Vec<(i64, PathBuf)> = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| AnnotationError::Configuration(format!("cannot read frame entry: {}", e)))?;
        let index = frame_index(&path)?;
        frames.push((index, path));
    }

    frames.sort_by_key(|(index, _)| *index);
    Ok(frames.into_iter().map(|(_, path)| path).collect())
}

/// Parse the integer frame index out of an image path's file stem.
fn frame_index(path: &Path) -> Result<i64> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AnnotationError::Configuration(format!(
            "frame file {} has no readable stem",
            path.display()
        )))?;

    stem.parse::<i64>().map_err(|source| AnnotationError::FrameIndex {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_parses_stem() {
        assert_eq!(frame_index(Path::new("/data/42.jpg")).unwrap(), 42);
        assert_eq!(frame_index(Path::new("7.jpg")).unwrap(), 7);
    }

    #[test]
    fn test_frame_index_rejects_non_numeric_stem() {
        let err = frame_index(Path::new("/data/frame_01.jpg")).unwrap_err();
        assert!(matches!(err, AnnotationError::FrameIndex { .. }));
    }
}
