// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Copy failing files aside with a running error log

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::ErrorExportConfig;
use crate::organizer::copy_into_unique;
use crate::{Result, SortError};

pub const ERROR_LOG_NAME: &str = "error_log.txt";

#[derive(Debug, Clone)]
pub struct ErrorExporter {
    enabled: bool,
    folder: PathBuf,
}

impl ErrorExporter {
    pub fn new(config: &ErrorExportConfig) -> Self {
        Self {
            enabled: config.enabled,
            folder: PathBuf::from(&config.folder),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether this failure kind is worth keeping a copy of
    ///
    /// Backend and credential failures say nothing about the file itself.
    pub fn should_export(error: &SortError) -> bool {
        matches!(
            error,
            SortError::OrganizeFailed(_) | SortError::MediaPrepFailed(_) | SortError::Parse(_)
        )
    }

    /// Folder that receives exports for `file`
    pub fn folder_for(&self, file: &Path) -> PathBuf {
        if self.folder.is_absolute() {
            self.folder.clone()
        } else {
            file.parent().unwrap_or_else(|| Path::new(".")).join(&self.folder)
        }
    }

    /// Directory name to keep out of scans, if exports land inside the source tree
    pub fn relative_folder_name(&self) -> Option<&str> {
        if self.folder.is_absolute() {
            None
        } else {
            self.folder.file_name().and_then(|n| n.to_str())
        }
    }

    /// Copy `file` into the error folder and append a log entry
    ///
    /// Returns the copy's path, or `None` when exporting is off or the file is gone.
    pub fn export(&self, file: &Path, message: &str, kind: &str) -> Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }

        let folder = self.folder_for(file);
        fs::create_dir_all(&folder)?;

        let copy = if file.is_file() {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unnamed".to_string());
            Some(copy_into_unique(file, &folder, &name)?)
        } else {
            warn!("{:?} no longer exists, logging the error only", file);
            None
        };

        let entry = format!(
            "[{}]\nfile: {}\nerror: {} ({})\n{}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            file.display(),
            message,
            kind,
            "-".repeat(50)
        );
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(folder.join(ERROR_LOG_NAME))?;
        // One write per entry keeps concurrent appends from interleaving.
        log.write_all(entry.as_bytes())?;

        debug!("Exported {:?} to {:?}", file, folder);
        Ok(copy)
    }
}
