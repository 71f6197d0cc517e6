//! Layer 2: frame extraction and similarity analysis.

pub mod classify;
pub mod ssim;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::models::{CorrelatedLogEntry, FlickerEvent, LogEntry, RegionDiff};
use crate::utils::round_to;

pub use classify::classify_flickers;
pub use ssim::{compute_ssim_pair, SsimJob, DEFAULT_BLOCK_SIZE, RESIZE_WIDTH};

pub const DEFAULT_SCENE_THRESHOLD: f64 = 0.08;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_REGION_GRID: u32 = 4;
pub const DEFAULT_CORRELATION_WINDOW_S: f64 = 0.5;

const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_EVENT_LOG_ENTRIES: usize = 20;
const MAX_LOG_MESSAGE_CHARS: usize = 200;

pub struct FrameAnalyzer {
    ffmpeg_path: String,
    output_dir: PathBuf,
}

impl FrameAnalyzer {
    pub fn new(ffmpeg_path: impl Into<String>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("failed to create frames dir {}", output_dir.display()))?;
        Ok(Self {
            ffmpeg_path: ffmpeg_path.into(),
            output_dir,
        })
    }

    /// Extract still frames from the recording.
    ///
    /// The scene filter samples only at visual-change boundaries, which is
    /// what we want for flicker hunting, but it produces zero frames on
    /// short or mostly static recordings. In that case extraction re-runs
    /// on the same video at a fixed interval with any partial output
    /// cleared first.
    pub async fn extract_frames(
        &self,
        video_path: &Path,
        fps: u32,
        scene_threshold: f64,
        use_scene_filter: bool,
    ) -> Result<Vec<PathBuf>> {
        let mut frames = Vec::new();

        if use_scene_filter {
            let filter = format!("select='gt(scene,{scene_threshold})',fps={fps}");
            let ok = self
                .run_ffmpeg(&["-vf", &filter, "-vsync", "0"], video_path)
                .await;
            if ok {
                frames = self.collect_frames();
            }
        }

        if frames.is_empty() {
            info!("scene filter produced 0 frames, falling back to fixed-interval extraction");
            self.clear_frames();
            let filter = format!("fps={fps}");
            if self.run_ffmpeg(&["-vf", &filter], video_path).await {
                frames = self.collect_frames();
            }
        }

        Ok(frames)
    }

    async fn run_ffmpeg(&self, filter_args: &[&str], video_path: &Path) -> bool {
        let pattern = self.output_dir.join("frame_%05d.jpg");

        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-i").arg(video_path);
        cmd.args(filter_args);
        // yuvj420p is required by the ffmpeg 8.x MJPEG encoder.
        cmd.args(["-pix_fmt", "yuvj420p", "-q:v", "5"]);
        cmd.arg(&pattern);
        cmd.arg("-y");
        cmd.kill_on_drop(true);

        match tokio::time::timeout(EXTRACTION_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "ffmpeg extraction failed: {}",
                    stderr.chars().take(300).collect::<String>()
                );
                false
            }
            Ok(Err(err)) => {
                warn!("failed to spawn {}: {err}", self.ffmpeg_path);
                false
            }
            Err(_) => {
                warn!("ffmpeg extraction timed out");
                false
            }
        }
    }

    fn clear_frames(&self) {
        for path in self.collect_frames() {
            let _ = std::fs::remove_file(path);
        }
    }

    /// Sorted frame paths; lexicographic order of `frame_%05d.jpg` names is
    /// the temporal order of capture.
    fn collect_frames(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.output_dir) else {
            return Vec::new();
        };
        let mut frames: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("frame_") && name.ends_with(".jpg"))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();
        frames
    }

    /// Compute similarity for every adjacent frame pair on a bounded pool
    /// of blocking workers.
    ///
    /// Each worker runs the pure `compute_ssim_pair` kernel with no shared
    /// state; join handles are awaited in spawn order so the score at index
    /// i always belongs to the pair (frame[i], frame[i+1]) no matter how
    /// workers interleave.
    pub async fn compute_similarities(
        &self,
        frames: &[PathBuf],
        workers: usize,
        block_size: u32,
    ) -> Result<Vec<f64>> {
        if frames.len() < 2 {
            return Ok(Vec::new());
        }

        let pool = Arc::new(Semaphore::new(workers.max(1)));
        let mut handles = Vec::with_capacity(frames.len() - 1);

        for (pair_index, pair) in frames.windows(2).enumerate() {
            let permit = Arc::clone(&pool)
                .acquire_owned()
                .await
                .context("similarity pool closed")?;
            let job = SsimJob {
                pair_index,
                frame_a: pair[0].clone(),
                frame_b: pair[1].clone(),
                block_size,
            };
            handles.push(tokio::task::spawn_blocking(move || {
                let score = compute_ssim_pair(&job);
                drop(permit);
                score
            }));
        }

        let mut scores = Vec::with_capacity(handles.len());
        for handle in handles {
            let score = handle.await.context("similarity worker panicked")?;
            scores.push(round_to(score, 6));
        }
        Ok(scores)
    }

    /// Threshold below which a score counts as a flicker candidate.
    ///
    /// `max(0.70, median - 2*stddev)`; the floor keeps pathologically noisy
    /// recordings from burying every event. With fewer than 10 scores the
    /// statistics are meaningless and a fixed 0.92 applies.
    pub fn adaptive_threshold(scores: &[f64]) -> f64 {
        if scores.len() < 10 {
            return 0.92;
        }

        let median = median(scores);
        let std = stddev(scores);
        (median - 2.0 * std).max(0.70)
    }

    /// Attach log entries whose offset falls inside each event's window,
    /// capped to keep the report bounded.
    pub fn correlate_with_log(events: &mut [FlickerEvent], entries: &[LogEntry], window_s: f64) {
        for event in events.iter_mut() {
            event.log_entries = entries
                .iter()
                .filter(|entry| {
                    entry.seconds_since_start >= event.start_time - window_s
                        && entry.seconds_since_start <= event.end_time + window_s
                })
                .take(MAX_EVENT_LOG_ENTRIES)
                .map(|entry| CorrelatedLogEntry {
                    timestamp: entry.timestamp.clone(),
                    tag: entry.tag.clone(),
                    level: entry.level.clone(),
                    message: entry.message.chars().take(MAX_LOG_MESSAGE_CHARS).collect(),
                })
                .collect();
        }
    }

    /// Per-cell mean absolute luminance difference over an NxN grid,
    /// locating where in the frame the change happened.
    pub fn region_diff(frame_a: &Path, frame_b: &Path, grid: u32) -> Result<RegionDiff> {
        let grid = grid.clamp(1, RESIZE_WIDTH);
        let plane_a = ssim::load_exact(frame_a, RESIZE_WIDTH, RESIZE_WIDTH)?;
        let plane_b = ssim::load_exact(frame_b, RESIZE_WIDTH, RESIZE_WIDTH)?;

        let cell_h = plane_a.height / grid as usize;
        let cell_w = plane_a.width / grid as usize;

        let mut regions = std::collections::BTreeMap::new();
        let mut max_region = String::new();
        let mut max_value = f64::MIN;
        let mut total = 0.0;

        for (&a, &b) in plane_a.data.iter().zip(&plane_b.data) {
            total += (a - b).abs();
        }
        let mean_change = total / plane_a.data.len() as f64;

        for row in 0..grid as usize {
            for col in 0..grid as usize {
                let mut sum = 0.0;
                for y in row * cell_h..(row + 1) * cell_h {
                    for x in col * cell_w..(col + 1) * cell_w {
                        let idx = y * plane_a.width + x;
                        sum += (plane_a.data[idx] - plane_b.data[idx]).abs();
                    }
                }
                let mean = round_to(sum / (cell_h * cell_w) as f64, 2);
                let key = format!("r{row}_c{col}");
                if mean > max_value {
                    max_value = mean;
                    max_region = key.clone();
                }
                regions.insert(key, mean);
            }
        }

        Ok(RegionDiff {
            grid_size: grid,
            regions,
            max_change_region: max_region,
            max_change_value: max_value,
            mean_change: round_to(mean_change, 2),
        })
    }
}

fn median(scores: &[f64]) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn stddev(scores: &[f64]) -> f64 {
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let variance = scores
        .iter()
        .map(|score| {
            let d = score - mean;
            d * d
        })
        .sum::<f64>()
        / scores.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_falls_back_below_ten_scores() {
        assert_eq!(FrameAnalyzer::adaptive_threshold(&[0.95, 0.96, 0.97]), 0.92);
        assert_eq!(FrameAnalyzer::adaptive_threshold(&[]), 0.92);
    }

    #[test]
    fn threshold_tracks_stable_scores() {
        let scores = [
            0.98, 0.97, 0.99, 0.98, 0.97, 0.98, 0.99, 0.97, 0.98, 0.99, 0.98, 0.97, 0.99, 0.98,
            0.97,
        ];
        let threshold = FrameAnalyzer::adaptive_threshold(&scores);
        assert!(threshold > 0.90 && threshold < 1.0, "got {threshold}");
    }

    #[test]
    fn threshold_floors_at_070_for_noisy_scores() {
        let scores = [0.1, 0.9, 0.1, 0.9, 0.1, 0.9, 0.1, 0.9, 0.1, 0.9, 0.1, 0.9];
        assert_eq!(FrameAnalyzer::adaptive_threshold(&scores), 0.70);
    }

    #[test]
    fn median_of_even_list_averages_middle_pair() {
        assert!((median(&[0.1, 0.2, 0.3, 0.4]) - 0.25).abs() < 1e-12);
        assert!((median(&[0.4, 0.1, 0.3]) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn correlation_attaches_entries_in_window() {
        use crate::models::{FlickerPattern, Severity};

        let mut events = vec![FlickerEvent {
            start_frame: 15,
            end_frame: 15,
            start_time: 1.0,
            end_time: 1.067,
            duration_ms: 66.7,
            pattern: FlickerPattern::SingleGlitch,
            scores: vec![0.6],
            severity: Severity::Medium,
            frame_paths: Vec::new(),
            log_entries: Vec::new(),
            semantic_verdict: None,
            region_diff: None,
        }];

        let entry = |secs: f64| LogEntry {
            timestamp: "03-14 10:00:00.000".into(),
            seconds_since_start: secs,
            tag: "Choreographer".into(),
            level: "I".into(),
            message: "Skipped frames".into(),
        };
        let entries = vec![entry(0.2), entry(0.7), entry(1.3), entry(2.5)];

        FrameAnalyzer::correlate_with_log(&mut events, &entries, 0.5);
        let attached = &events[0].log_entries;
        assert_eq!(attached.len(), 2);
    }
}
