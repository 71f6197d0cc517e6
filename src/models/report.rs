use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FlickerEvent;

/// SurfaceFlinger frame counters at a point in time.
/// Unparseable fields stay at zero; the raw dump is kept (truncated) for debugging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceStatsSnapshot {
    pub total_frames: u64,
    pub janky_frames: u64,
    pub jank_pct: f64,
    #[serde(default)]
    pub raw: String,
}

/// Read-only view over a before/after snapshot pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SurfaceStatsDelta {
    pub frames_before: u64,
    pub frames_after: u64,
    pub frames_during_test: i64,
    pub janky_before: u64,
    pub janky_after: u64,
    pub janky_during_test: i64,
    pub jank_pct_during_test: f64,
}

/// One parsed logcat line, filtered to the relevant tag set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    /// Seconds since the first kept entry; entry[0] is always 0.0.
    pub seconds_since_start: f64,
    pub tag: String,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSummary {
    pub total_entries: usize,
    pub tags_seen: Vec<String>,
    pub duration_span_s: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model: String,
    pub sdk_version: String,
    pub display: String,
}

/// Aggregate root for one detection session.
///
/// Created at session start, filled in by each layer as it completes, and
/// persisted exactly once at the end of orchestration regardless of outcome.
/// Callers should inspect `error` rather than expecting a failure code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub session_id: String,
    pub device_id: String,
    pub recording_duration: u32,
    #[serde(default)]
    pub video_path: Option<PathBuf>,
    #[serde(default)]
    pub frames_dir: Option<PathBuf>,
    #[serde(default)]
    pub device_info: Option<DeviceInfo>,
    #[serde(default)]
    pub total_frames_analyzed: usize,
    #[serde(default)]
    pub total_flickers_detected: usize,
    #[serde(default)]
    pub analysis_time_seconds: f64,
    #[serde(default)]
    pub similarity_scores: Vec<f64>,
    #[serde(default = "default_threshold")]
    pub adaptive_threshold: f64,
    #[serde(default)]
    pub timeline_path: Option<PathBuf>,
    #[serde(default)]
    pub comparison_images: Vec<PathBuf>,
    #[serde(default)]
    pub stats_before: Option<SurfaceStatsSnapshot>,
    #[serde(default)]
    pub stats_after: Option<SurfaceStatsSnapshot>,
    #[serde(default)]
    pub surface_delta: Option<SurfaceStatsDelta>,
    #[serde(default)]
    pub flicker_events: Vec<FlickerEvent>,
    #[serde(default)]
    pub log_summary: Option<LogSummary>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_threshold() -> f64 {
    0.92
}

impl DetectionReport {
    pub fn new(session_id: String, device_id: String, recording_duration: u32) -> Self {
        Self {
            session_id,
            device_id,
            recording_duration,
            video_path: None,
            frames_dir: None,
            device_info: None,
            total_frames_analyzed: 0,
            total_flickers_detected: 0,
            analysis_time_seconds: 0.0,
            similarity_scores: Vec::new(),
            adaptive_threshold: default_threshold(),
            timeline_path: None,
            comparison_images: Vec::new(),
            stats_before: None,
            stats_after: None,
            surface_delta: None,
            flicker_events: Vec::new(),
            log_summary: None,
            error: None,
        }
    }
}
