// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Category/date destination layout and collision-safe copy or move
//!
//! Destination names are claimed with `create_new`, so two workers racing for
//! `photo.jpg` in the same folder end up with `photo.jpg` and `photo_1.jpg`
//! instead of one overwriting the other.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::config::OrganizeConfig;
use crate::{Result, SortError};

/// Give up probing after this many taken names
const MAX_NAME_PROBES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Copy,
    #[default]
    Move,
}

/// Which file timestamp decides the year/month bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeSource {
    Creation,
    Modify,
    Access,
    #[default]
    Earliest,
    Latest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FolderStructure {
    /// `root/category/year/month`
    #[default]
    CategoryTime,
    /// `root/year/month/category`
    TimeCategory,
}

/// Optional date suffix for renamed files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateToken {
    #[default]
    None,
    /// The timestamp picked by the time source
    FileTime,
    /// Date of the run
    Today,
}

/// How to build a new file name from an AI description
#[derive(Debug, Clone)]
pub struct RenameInfo {
    pub description: String,
    pub include_original: bool,
    pub date_token: DateToken,
    pub date_format: String,
}

/// Where a file is going, before anything touches the disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganizePlan {
    pub dest_dir: PathBuf,
    pub file_name: String,
    pub operation: Operation,
}

#[derive(Debug, Clone)]
pub struct FileOrganizer {
    root: PathBuf,
    operation: Operation,
    time_source: TimeSource,
    folder_structure: FolderStructure,
    year_format: String,
    month_format: String,
}

impl FileOrganizer {
    pub fn new(root: impl Into<PathBuf>, config: &OrganizeConfig) -> Self {
        Self {
            root: root.into(),
            operation: config.operation,
            time_source: config.time_source,
            folder_structure: config.folder_structure,
            year_format: config.year_format.clone(),
            month_format: config.month_format.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Work out the destination without creating anything
    pub fn plan(&self, src: &Path, category: &str, rename: Option<&RenameInfo>) -> OrganizePlan {
        let time = file_time(src, self.time_source);
        let year = time.format(&self.year_format).to_string();
        let month = time.format(&self.month_format).to_string();
        let category = path_component(category);

        let dest_dir = match self.folder_structure {
            FolderStructure::CategoryTime => self.root.join(category).join(year).join(month),
            FolderStructure::TimeCategory => self.root.join(year).join(month).join(category),
        };

        OrganizePlan {
            dest_dir,
            file_name: build_file_name(src, &time, rename),
            operation: self.operation,
        }
    }

    /// Copy or move `src` into its bucket and return the final path
    ///
    /// After a failed move the source may or may not still exist.
    pub fn organize(&self, src: &Path, category: &str, rename: Option<&RenameInfo>) -> Result<PathBuf> {
        if !src.is_file() {
            return Err(SortError::NotFound(src.display().to_string()));
        }

        let plan = self.plan(src, category, rename);
        fs::create_dir_all(&plan.dest_dir).map_err(|e| {
            SortError::OrganizeFailed(format!("cannot create {}: {}", plan.dest_dir.display(), e))
        })?;

        let dest = match plan.operation {
            Operation::Copy => copy_into_unique(src, &plan.dest_dir, &plan.file_name)?,
            Operation::Move => move_into_unique(src, &plan.dest_dir, &plan.file_name)?,
        };

        info!("{:?} {:?} -> {:?}", plan.operation, src, dest);
        Ok(dest)
    }
}

/// Pick the timestamp for bucketing; unreadable metadata means "now"
///
/// `Earliest`/`Latest` compare creation (when the platform has it) and
/// modification time. A missing creation time for `Creation` falls back to
/// the earliest available one.
pub fn file_time(path: &Path, source: TimeSource) -> DateTime<Local> {
    let meta = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!("No metadata for {:?} ({}), using current time", path, e);
            return Local::now();
        }
    };

    let created = meta.created().ok();
    let modified = meta.modified().ok();
    let candidates: Vec<SystemTime> = created.into_iter().chain(modified).collect();

    let chosen = match source {
        TimeSource::Creation => created.or_else(|| candidates.iter().min().copied()),
        TimeSource::Modify => modified,
        TimeSource::Access => meta.accessed().ok().or(modified),
        TimeSource::Earliest => candidates.iter().min().copied(),
        TimeSource::Latest => candidates.iter().max().copied(),
    };

    chosen.map(DateTime::<Local>::from).unwrap_or_else(Local::now)
}

/// Original name, or `description[_stem][_date].ext` when a description exists
pub fn build_file_name(src: &Path, time: &DateTime<Local>, rename: Option<&RenameInfo>) -> String {
    let original = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let info = match rename {
        Some(info) if !info.description.trim().is_empty() => info,
        _ => return original,
    };

    let stem = src.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let mut parts = vec![info.description.clone()];
    if info.include_original && !stem.is_empty() {
        parts.push(stem);
    }
    match info.date_token {
        DateToken::None => {}
        DateToken::FileTime => parts.push(time.format(&info.date_format).to_string()),
        DateToken::Today => parts.push(Local::now().format(&info.date_format).to_string()),
    }

    let name: String = parts
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if name.is_empty() {
        return original;
    }

    match src.extension() {
        Some(ext) => format!("{}.{}", name, ext.to_string_lossy()),
        None => name,
    }
}

/// `name`, `name_1`, `name_2`, ... keeping the extension
fn candidate_name(file_name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, attempt, ext.to_string_lossy()),
        None => format!("{}_{}", stem, attempt),
    }
}

/// Atomically create the first free candidate name in `dir`
fn claim_unique(dir: &Path, file_name: &str) -> Result<(PathBuf, File)> {
    for attempt in 0..MAX_NAME_PROBES {
        let path = dir.join(candidate_name(file_name, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(SortError::OrganizeFailed(format!(
                    "cannot create {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    Err(SortError::OrganizeFailed(format!(
        "no free name for {} in {}",
        file_name,
        dir.display()
    )))
}

/// Copy `src` to a freshly claimed name, carrying permissions and timestamps
pub(crate) fn copy_into_unique(src: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    let (dest, mut out) = claim_unique(dir, file_name)?;
    if let Err(e) = copy_contents(src, &dest, &mut out) {
        drop(out);
        let _ = fs::remove_file(&dest);
        return Err(SortError::OrganizeFailed(format!(
            "copy {} -> {}: {}",
            src.display(),
            dest.display(),
            e
        )));
    }
    Ok(dest)
}

fn copy_contents(src: &Path, dest: &Path, out: &mut File) -> io::Result<()> {
    let mut input = File::open(src)?;
    io::copy(&mut input, out)?;
    out.sync_all()?;

    let meta = input.metadata()?;
    fs::set_permissions(dest, meta.permissions())?;
    let atime = filetime::FileTime::from_last_access_time(&meta);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dest, atime, mtime)?;
    Ok(())
}

/// Rename over a claimed placeholder; copy + delete when rename can't cross devices
fn move_into_unique(src: &Path, dir: &Path, file_name: &str) -> Result<PathBuf> {
    let (dest, placeholder) = claim_unique(dir, file_name)?;
    drop(placeholder);

    match fs::rename(src, &dest) {
        Ok(()) => Ok(dest),
        Err(rename_err) => {
            debug!("rename {:?} -> {:?} failed ({}), copying instead", src, dest, rename_err);
            let copied = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&dest)
                .and_then(|mut out| copy_contents(src, &dest, &mut out));
            if let Err(e) = copied {
                let _ = fs::remove_file(&dest);
                return Err(SortError::OrganizeFailed(format!(
                    "move {} -> {}: {}",
                    src.display(),
                    dest.display(),
                    e
                )));
            }
            if let Err(e) = fs::remove_file(src) {
                warn!("Copied {:?} but could not remove the source: {}", src, e);
            }
            Ok(dest)
        }
    }
}

/// Keep a category usable as a single directory name
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use filetime::FileTime;
    use std::sync::Arc;

    fn fixed_time() -> FileTime {
        let when = Local.with_ymd_and_hms(2023, 7, 14, 12, 0, 0).unwrap();
        FileTime::from_unix_time(when.timestamp(), 0)
    }

    fn write_dated(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
        filetime::set_file_times(path, fixed_time(), fixed_time()).unwrap();
    }

    fn organizer(root: &Path, operation: Operation, structure: FolderStructure) -> FileOrganizer {
        let config = OrganizeConfig {
            operation,
            time_source: TimeSource::Modify,
            folder_structure: structure,
            ..OrganizeConfig::default()
        };
        FileOrganizer::new(root, &config)
    }

    #[test]
    fn test_category_time_layout_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in/IMG_0001.jpg");
        write_dated(&src, b"jpeg");
        let root = dir.path().join("out");

        let dest = organizer(&root, Operation::Move, FolderStructure::CategoryTime)
            .organize(&src, "pets", None)
            .unwrap();

        assert_eq!(dest, root.join("pets/2023/07/IMG_0001.jpg"));
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"jpeg");
    }

    #[test]
    fn test_time_category_layout_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in/clip.mp4");
        write_dated(&src, b"video");
        let root = dir.path().join("out");

        let dest = organizer(&root, Operation::Copy, FolderStructure::TimeCategory)
            .organize(&src, "people", None)
            .unwrap();

        assert_eq!(dest, root.join("2023/07/people/clip.mp4"));
        assert!(src.exists());
        let copied = fs::metadata(&dest).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&copied), fixed_time());
    }

    #[test]
    fn test_same_name_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a/IMG_0001.jpg");
        let b = dir.path().join("b/IMG_0001.jpg");
        write_dated(&a, b"first");
        write_dated(&b, b"second");
        let org = organizer(&dir.path().join("out"), Operation::Copy, FolderStructure::CategoryTime);

        let first = org.organize(&a, "food", None).unwrap();
        let second = org.organize(&b, "food", None).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.file_name().unwrap(), "IMG_0001.jpg");
        assert_eq!(second.file_name().unwrap(), "IMG_0001_1.jpg");
        assert_eq!(fs::read(&first).unwrap(), b"first");
        assert_eq!(fs::read(&second).unwrap(), b"second");
    }

    #[test]
    fn test_concurrent_organize_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let org = Arc::new(organizer(&dir.path().join("out"), Operation::Move, FolderStructure::CategoryTime));
        let mut sources = Vec::new();
        for i in 0..8 {
            let src = dir.path().join(format!("src{}/same.png", i));
            write_dated(&src, format!("payload {}", i).as_bytes());
            sources.push(src);
        }

        let handles: Vec<_> = sources
            .into_iter()
            .map(|src| {
                let org = org.clone();
                std::thread::spawn(move || org.organize(&src, "other", None).unwrap())
            })
            .collect();
        let mut dests: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        dests.sort();
        dests.dedup();
        assert_eq!(dests.len(), 8);

        let mut payloads: Vec<Vec<u8>> = dests.iter().map(|d| fs::read(d).unwrap()).collect();
        payloads.sort();
        payloads.dedup();
        assert_eq!(payloads.len(), 8);
    }

    #[test]
    fn test_rename_from_description() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in/DSC 0042.JPG");
        write_dated(&src, b"x");
        let org = organizer(&dir.path().join("out"), Operation::Copy, FolderStructure::CategoryTime);
        let info = RenameInfo {
            description: "sunset_over_sea".to_string(),
            include_original: true,
            date_token: DateToken::FileTime,
            date_format: "%Y%m%d".to_string(),
        };

        let dest = org.organize(&src, "landscape", Some(&info)).unwrap();
        assert_eq!(dest.file_name().unwrap(), "sunset_over_sea_DSC0042_20230714.JPG");
    }

    #[test]
    fn test_empty_description_keeps_original_name() {
        let src = Path::new("/photos/holiday.jpg");
        let info = RenameInfo {
            description: "  ".to_string(),
            include_original: false,
            date_token: DateToken::None,
            date_format: "%Y".to_string(),
        };
        assert_eq!(build_file_name(src, &Local::now(), Some(&info)), "holiday.jpg");
        assert_eq!(build_file_name(src, &Local::now(), None), "holiday.jpg");
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let org = organizer(dir.path(), Operation::Move, FolderStructure::CategoryTime);
        let err = org.organize(&dir.path().join("ghost.jpg"), "other", None).unwrap_err();
        assert!(matches!(err, SortError::NotFound(_)));
    }

    #[test]
    fn test_earliest_not_after_latest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("t.jpg");
        fs::write(&file, b"t").unwrap();
        assert!(file_time(&file, TimeSource::Earliest) <= file_time(&file, TimeSource::Latest));
        // Creation may be unsupported; it must still produce a time.
        let _ = file_time(&file, TimeSource::Creation);
    }

    #[test]
    fn test_candidate_names_and_category_component() {
        assert_eq!(candidate_name("a.tar.gz", 2), "a.tar_2.gz");
        assert_eq!(candidate_name("README", 1), "README_1");
        assert_eq!(path_component("../etc"), ".._etc");
        assert_eq!(path_component(".."), "_");
    }
}
