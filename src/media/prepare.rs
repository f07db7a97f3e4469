// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Turn images and video keyframes into a JPEG payload for vision models

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use std::path::Path;
use std::process::Command;
use tracing::debug;

use super::{MediaFile, MediaKind, VideoFrameMode};
use crate::config::MediaConfig;
use crate::{Result, SortError};

/// Columns in the keyframe grid
const GRID_COLUMNS: u32 = 2;

/// Spacing between neighbouring frames in `first`/`middle`/`last` mode, seconds
const CLUSTER_STEP_SECS: f64 = 0.5;

/// JPEG bytes and their base64 form
#[derive(Debug, Clone)]
pub struct PreparedMedia {
    pub jpeg: Vec<u8>,
    pub base64: String,
}

impl PreparedMedia {
    fn from_jpeg(jpeg: Vec<u8>) -> Self {
        let base64 = general_purpose::STANDARD.encode(&jpeg);
        Self { jpeg, base64 }
    }
}

/// Produces the payload sent with a classification request
#[async_trait]
pub trait MediaPreparer: Send + Sync {
    /// Failures surface as [`SortError::MediaPrepFailed`]
    async fn prepare(&self, file: &MediaFile) -> Result<PreparedMedia>;
}

/// `image` for stills, `ffmpeg`/`ffprobe` for video keyframes
#[derive(Debug, Clone)]
pub struct ImagePreparer {
    max_size: u32,
    frame_count: u32,
    frame_mode: VideoFrameMode,
}

impl ImagePreparer {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            max_size: config.max_image_size.max(1),
            frame_count: config.video_frame_count.max(1),
            frame_mode: config.video_frame_mode,
        }
    }

    fn prepare_blocking(&self, file: &MediaFile) -> Result<PreparedMedia> {
        let img = match file.kind {
            MediaKind::Image => image::open(&file.path)?,
            MediaKind::Video => self.keyframe_grid(&file.path)?,
        };
        let jpeg = encode_jpeg(&shrink(img, self.max_size))?;
        Ok(PreparedMedia::from_jpeg(jpeg))
    }

    fn keyframe_grid(&self, path: &Path) -> Result<DynamicImage> {
        let duration = probe_duration(path).unwrap_or(0.0);
        let frames: Vec<DynamicImage> = frame_timestamps(self.frame_mode, self.frame_count, duration)
            .into_iter()
            .filter_map(|ts| match extract_frame(path, ts) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    debug!("No frame at {:.2}s in {:?}: {}", ts, path, e);
                    None
                }
            })
            .collect();

        compose_grid(&frames).ok_or_else(|| {
            SortError::MediaPrepFailed(format!("no frames could be extracted from {}", path.display()))
        })
    }
}

#[async_trait]
impl MediaPreparer for ImagePreparer {
    async fn prepare(&self, file: &MediaFile) -> Result<PreparedMedia> {
        let preparer = self.clone();
        let file = file.clone();
        let path = file.path.clone();

        tokio::task::spawn_blocking(move || preparer.prepare_blocking(&file))
            .await
            .map_err(|e| SortError::MediaPrepFailed(format!("{}: worker failed: {}", path.display(), e)))?
            .map_err(|e| match e {
                SortError::MediaPrepFailed(_) => e,
                other => SortError::MediaPrepFailed(format!("{}: {}", path.display(), other)),
            })
    }
}

/// Shrink so the longest side is at most `max_size`; never upscale
pub fn shrink(img: DynamicImage, max_size: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w <= max_size && h <= max_size {
        img
    } else {
        img.resize(max_size, max_size, FilterType::Triangle)
    }
}

pub fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Vec::new();
    rgb.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)?;
    Ok(buffer)
}

/// Seek positions in seconds for `count` frames of a `duration`-second clip
///
/// An unknown duration (0) yields frames from the start.
pub fn frame_timestamps(mode: VideoFrameMode, count: u32, duration: f64) -> Vec<f64> {
    let count = count.max(1);
    let n = count as f64;
    let end = (duration - 0.1).max(0.0);
    let clamp = |t: f64| t.clamp(0.0, end);

    let mut stamps: Vec<f64> = match mode {
        VideoFrameMode::First => (0..count).map(|i| clamp(i as f64 * CLUSTER_STEP_SECS)).collect(),
        VideoFrameMode::Last => (0..count).map(|i| clamp(end - i as f64 * CLUSTER_STEP_SECS)).collect(),
        VideoFrameMode::Middle => (0..count)
            .map(|i| clamp(duration / 2.0 + (i as f64 - (n - 1.0) / 2.0) * CLUSTER_STEP_SECS))
            .collect(),
        VideoFrameMode::Spread => (0..count).map(|i| clamp(duration * (i as f64 + 1.0) / (n + 1.0))).collect(),
    };

    stamps.sort_by(|a, b| a.total_cmp(b));
    stamps.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    stamps
}

/// Lay frames out two per row, scaled to the first frame's size
pub fn compose_grid(frames: &[DynamicImage]) -> Option<DynamicImage> {
    let first = frames.first()?;
    if frames.len() == 1 {
        return Some(first.clone());
    }

    let (w, h) = first.dimensions();
    let count = frames.len() as u32;
    let cols = GRID_COLUMNS.min(count);
    let rows = count.div_ceil(cols);
    let mut grid = RgbImage::new(w * cols, h * rows);

    for (i, frame) in frames.iter().enumerate() {
        let i = i as u32;
        let tile = if frame.dimensions() == (w, h) {
            frame.to_rgb8()
        } else {
            frame.resize_exact(w, h, FilterType::Triangle).to_rgb8()
        };
        image::imageops::replace(&mut grid, &tile, ((i % cols) * w) as i64, ((i / cols) * h) as i64);
    }

    Some(DynamicImage::ImageRgb8(grid))
}

fn probe_duration(path: &Path) -> Option<f64> {
    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    json.get("format")?
        .get("duration")?
        .as_str()?
        .parse::<f64>()
        .ok()
}

fn extract_frame(path: &Path, timestamp: f64) -> Result<DynamicImage> {
    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{:.2}", timestamp), "-i"])
        .arg(path)
        .args(["-frames:v", "1", "-f", "image2pipe", "-c:v", "mjpeg", "-q:v", "2", "pipe:1"])
        .output()
        .map_err(|e| SortError::MediaPrepFailed(format!("cannot run ffmpeg: {}", e)))?;

    if !output.status.success() || output.stdout.is_empty() {
        return Err(SortError::MediaPrepFailed(format!(
            "ffmpeg failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(image::load_from_memory(&output.stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MediaConfig;

    fn preparer(max: u32) -> ImagePreparer {
        ImagePreparer::new(&MediaConfig {
            max_image_size: max,
            ..MediaConfig::default()
        })
    }

    #[tokio::test]
    async fn test_large_image_is_shrunk_to_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbImage::from_pixel(3000, 1000, image::Rgb([200, 10, 10])).save(&path).unwrap();

        let file = MediaFile::new(&path).unwrap();
        let prepared = preparer(1920).prepare(&file).await.unwrap();

        let decoded = general_purpose::STANDARD.decode(&prepared.base64).unwrap();
        assert_eq!(decoded, prepared.jpeg);
        let img = image::load_from_memory(&prepared.jpeg).unwrap();
        assert_eq!(img.dimensions(), (1920, 640));
        assert_eq!(image::guess_format(&prepared.jpeg).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_small_image_keeps_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        image::RgbaImage::from_pixel(64, 32, image::Rgba([0, 0, 0, 128])).save(&path).unwrap();

        let prepared = preparer(1920).prepare(&MediaFile::new(&path).unwrap()).await.unwrap();
        let img = image::load_from_memory(&prepared.jpeg).unwrap();
        assert_eq!(img.dimensions(), (64, 32));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_media_prep_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();

        let err = preparer(1920).prepare(&MediaFile::new(&path).unwrap()).await.unwrap_err();
        assert!(matches!(err, SortError::MediaPrepFailed(_)));
    }

    #[test]
    fn test_frame_timestamps() {
        assert_eq!(frame_timestamps(VideoFrameMode::Middle, 1, 10.0), vec![5.0]);
        assert_eq!(frame_timestamps(VideoFrameMode::First, 2, 10.0), vec![0.0, 0.5]);
        assert_eq!(frame_timestamps(VideoFrameMode::Spread, 3, 8.0), vec![2.0, 4.0, 6.0]);

        let last = frame_timestamps(VideoFrameMode::Last, 2, 10.0);
        assert_eq!(last.len(), 2);
        assert!(last.iter().all(|t| *t <= 9.9 && *t >= 9.3));

        // Unknown duration collapses onto the first frame.
        assert_eq!(frame_timestamps(VideoFrameMode::Spread, 4, 0.0), vec![0.0]);
    }

    #[test]
    fn test_compose_grid_two_columns() {
        let tile = |v: u8| DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 6, image::Rgb([v, v, v])));
        let grid = compose_grid(&[tile(0), tile(80), tile(160)]).unwrap();
        assert_eq!(grid.dimensions(), (20, 12));

        let grid = grid.to_rgb8();
        assert_eq!(grid.get_pixel(15, 2)[0], 80);
        assert_eq!(grid.get_pixel(5, 8)[0], 160);
        assert_eq!(grid.get_pixel(15, 8)[0], 0);

        assert!(compose_grid(&[]).is_none());
        assert_eq!(compose_grid(&[tile(1)]).unwrap().dimensions(), (10, 6));
    }
}
