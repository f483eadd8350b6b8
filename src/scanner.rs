//! Discovery of image resources on disk.
//!
//! Walks a root directory, groups images by their parent directory (each directory counted
//! once) and picks the directory holding the most images.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Configuration for the directory scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum directory depth (0 = unlimited).
    pub max_depth: usize,
    /// Whether to follow symbolic links.
    pub follow_symlinks: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_depth: 0, // unlimited
            follow_symlinks: false,
        }
    }
}

/// A directory and the images found directly inside it, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDirectory {
    pub path: PathBuf,
    pub images: Vec<PathBuf>,
}

impl ImageDirectory {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Image paths as resource identifiers.
    pub fn resource_ids(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

/// Check whether a path names a JPEG or PNG file.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// All directories under `root` that contain images, most images first.
pub fn find_image_directories(root: &Path, config: &ScanConfig) -> Result<Vec<ImageDirectory>> {
    ensure!(root.is_dir(), "Not a directory: {:?}", root);

    let mut walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    if config.max_depth > 0 {
        walker = walker.max_depth(config.max_depth);
    }

    let mut by_parent: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for entry in walker.into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_image_path(entry.path()) {
            continue;
        }
        if let Some(parent) = entry.path().parent() {
            by_parent
                .entry(parent.to_path_buf())
                .or_default()
                .push(entry.path().to_path_buf());
        }
    }

    let mut directories: Vec<ImageDirectory> = by_parent
        .into_iter()
        .map(|(path, mut images)| {
            images.sort();
            ImageDirectory { path, images }
        })
        .collect();
    directories.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.path.cmp(&b.path)));

    debug!(?root, directories = directories.len(), "Scanned for images");
    Ok(directories)
}

/// The directory under `root` with the most images, if any.
pub fn densest_directory(root: &Path, config: &ScanConfig) -> Result<Option<ImageDirectory>> {
    Ok(find_image_directories(root, config)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn test_is_image_path() {
        assert!(is_image_path(Path::new("a.jpg")));
        assert!(is_image_path(Path::new("a.JPEG")));
        assert!(is_image_path(Path::new("a.png")));
        assert!(!is_image_path(Path::new("a.gif")));
        assert!(!is_image_path(Path::new("jpg")));
    }

    #[test]
    fn test_missing_root_is_error() {
        let dir = tempdir().unwrap();
        assert!(find_image_directories(&dir.path().join("nope"), &ScanConfig::default()).is_err());
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(densest_directory(dir.path(), &ScanConfig::default()).unwrap(), None);
    }

    #[test]
    fn test_picks_directory_with_most_images() {
        let dir = tempdir().unwrap();
        let camera = dir.path().join("camera");
        let screenshots = dir.path().join("screenshots");
        fs::create_dir(&camera).unwrap();
        fs::create_dir(&screenshots).unwrap();

        for name in ["c.jpg", "a.jpg", "b.png"] {
            File::create(camera.join(name)).unwrap();
        }
        File::create(camera.join("notes.txt")).unwrap();
        File::create(screenshots.join("s.png")).unwrap();
        File::create(dir.path().join("root.jpg")).unwrap();

        let best = densest_directory(dir.path(), &ScanConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(best.path, camera);
        assert_eq!(
            best.images,
            vec![camera.join("a.jpg"), camera.join("b.png"), camera.join("c.jpg")]
        );

        let all = find_image_directories(dir.path(), &ScanConfig::default()).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_max_depth() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        File::create(nested.join("deep.jpg")).unwrap();

        let config = ScanConfig {
            max_depth: 1,
            ..ScanConfig::default()
        };
        assert!(densest_directory(dir.path(), &config).unwrap().is_none());
    }
}
