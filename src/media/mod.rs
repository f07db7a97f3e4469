// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Media discovery and preparation

pub mod prepare;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::{Result, SortError};

pub use prepare::{ImagePreparer, MediaPreparer, PreparedMedia};

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "ico", "heic", "heif",
];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "wmv", "flv", "mkv", "webm", "m4v", "mpeg", "mpg", "3gp", "ogv",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Kind by extension, case-insensitive
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else {
            None
        }
    }
}

/// Where in a video to grab frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoFrameMode {
    First,
    #[default]
    Middle,
    Last,
    /// Evenly spaced over the whole clip
    Spread,
}

/// A candidate file with its kind tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub kind: MediaKind,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        MediaKind::from_path(&path).map(|kind| Self { path, kind })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub recursive: bool,
    pub include_images: bool,
    pub include_videos: bool,
    /// Directory names never descended into (e.g. the error-export folder)
    pub skip_dir_names: Vec<String>,
    /// Directories never descended into (e.g. a target inside the source)
    pub skip_paths: Vec<PathBuf>,
}

/// Skip hidden files, partial downloads and OS droppings
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    if filename.starts_with('.') {
        return false;
    }

    let temp_suffixes = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_suffixes.iter().any(|s| filename.ends_with(s)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

/// Enumerate media under `root`: images first, then videos, each sorted by path
pub fn scan_directory(root: &Path, options: &ScanOptions) -> Result<Vec<MediaFile>> {
    if !root.is_dir() {
        return Err(SortError::Scan(format!("{} is not a directory", root.display())));
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .max_depth(if options.recursive { usize::MAX } else { 1 });

    let mut images = Vec::new();
    let mut videos = Vec::new();

    let entries = walker
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || keep_entry(entry, options));
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(SortError::Scan(format!("cannot read {}: {}", root.display(), e)))
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        match MediaFile::new(entry.into_path()) {
            Some(file) if file.kind == MediaKind::Image && options.include_images => images.push(file),
            Some(file) if file.kind == MediaKind::Video && options.include_videos => videos.push(file),
            _ => {}
        }
    }

    images.sort_by(|a, b| a.path.cmp(&b.path));
    videos.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Scanned {:?}: {} images, {} videos", root, images.len(), videos.len());

    images.extend(videos);
    Ok(images)
}

fn keep_entry(entry: &DirEntry, options: &ScanOptions) -> bool {
    if !should_process(entry.path()) {
        return false;
    }
    if entry.file_type().is_dir() {
        let name = entry.file_name().to_string_lossy();
        if options.skip_dir_names.iter().any(|n| *n == name) {
            return false;
        }
        if options.skip_paths.iter().any(|p| entry.path().starts_with(p)) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn all(recursive: bool) -> ScanOptions {
        ScanOptions {
            recursive,
            include_images: true,
            include_videos: true,
            ..ScanOptions::default()
        }
    }

    fn names(files: &[MediaFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_kind_by_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/B.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("clip.MkV")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_scan_orders_images_before_videos() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.mp4"));
        touch(&dir.path().join("z.png"));
        touch(&dir.path().join("a.jpg"));
        touch(&dir.path().join("readme.md"));
        touch(&dir.path().join(".hidden.jpg"));
        touch(&dir.path().join("half.jpg.part"));

        let files = scan_directory(dir.path(), &all(false)).unwrap();
        assert_eq!(names(&files), vec!["a.jpg", "z.png", "b.mp4"]);
    }

    #[test]
    fn test_recursive_toggle_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("top.jpg"));
        touch(&dir.path().join("sub/deep.mov"));
        touch(&dir.path().join("error_files/failed.jpg"));
        touch(&dir.path().join(".cache/thumb.jpg"));

        assert_eq!(names(&scan_directory(dir.path(), &all(false)).unwrap()), vec!["top.jpg"]);

        let mut options = all(true);
        options.skip_dir_names = vec!["error_files".to_string()];
        assert_eq!(
            names(&scan_directory(dir.path(), &options).unwrap()),
            vec!["top.jpg", "deep.mov"]
        );

        options.include_videos = false;
        options.skip_paths = vec![dir.path().join("sub")];
        assert_eq!(names(&scan_directory(dir.path(), &options).unwrap()), vec!["top.jpg"]);
    }

    #[test]
    fn test_missing_root_is_scan_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan_directory(&dir.path().join("nope"), &all(true)).unwrap_err();
        assert!(matches!(err, SortError::Scan(_)));
    }

    #[test]
    fn test_should_process() {
        assert!(should_process(Path::new("photo.jpg")));
        assert!(!should_process(Path::new(".DS_Store")));
        assert!(!should_process(Path::new("Thumbs.db")));
        assert!(!should_process(Path::new("video.mp4.crdownload")));
    }
}
