use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlickerPattern {
    SingleGlitch,
    SustainedChange,
    RapidOscillation,
}

impl FlickerPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlickerPattern::SingleGlitch => "single_glitch",
            FlickerPattern::SustainedChange => "sustained_change",
            FlickerPattern::RapidOscillation => "rapid_oscillation",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

/// Log line attached to a flicker event during correlation.
/// Messages are truncated to keep the report bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedLogEntry {
    pub timestamp: String,
    pub tag: String,
    pub level: String,
    pub message: String,
}

/// Per-cell luminance difference map between the first two frames of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionDiff {
    pub grid_size: u32,
    pub regions: BTreeMap<String, f64>,
    pub max_change_region: String,
    pub max_change_value: f64,
    pub mean_change: f64,
}

/// A maximal run of consecutive below-threshold similarity scores.
///
/// Immutable once classified, except for the two enrichment fields
/// (`semantic_verdict`, `region_diff`) filled by later pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlickerEvent {
    pub start_frame: usize,
    pub end_frame: usize,
    /// Seconds since recording start.
    pub start_time: f64,
    pub end_time: f64,
    pub duration_ms: f64,
    pub pattern: FlickerPattern,
    pub scores: Vec<f64>,
    pub severity: Severity,
    /// At most 4 frames kept for comparison rendering.
    #[serde(default)]
    pub frame_paths: Vec<PathBuf>,
    #[serde(default)]
    pub log_entries: Vec<CorrelatedLogEntry>,
    #[serde(default)]
    pub semantic_verdict: Option<String>,
    #[serde(default)]
    pub region_diff: Option<RegionDiff>,
}

impl FlickerEvent {
    pub fn min_score(&self) -> f64 {
        self.scores.iter().copied().fold(f64::INFINITY, f64::min)
    }
}
