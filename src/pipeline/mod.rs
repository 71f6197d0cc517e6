//! Detection orchestrator: sequences layers 0-3 into one persisted report.
//!
//! Transition policy is fail-soft. A recording failure aborts the rest of
//! the pipeline because there is nothing to analyze, and insufficient
//! frames abort the analysis stages, but in every case the report is
//! persisted exactly once with whatever was gathered and the error text
//! attached. Callers inspect `report.error` instead of catching failures.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::{error, info, warn};
use uuid::Uuid;

use crate::analysis::{self, FrameAnalyzer};
use crate::device::DeviceTool;
use crate::models::{DetectionReport, LogSummary};
use crate::recorder::ScreenRecorder;
use crate::semantic::SemanticVerifier;
use crate::settings::Settings;
use crate::telemetry::{TelemetryCapture, DEFAULT_LOG_TAGS};
use crate::utils::round_to;
use crate::visualize;

const MAX_COMPARISON_IMAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    TelemetryBefore,
    Recording,
    TelemetryAfter,
    Extraction,
    Similarity,
    Classification,
    Correlation,
    SemanticVerification,
    Visualization,
    Persist,
    Done,
    /// Absorption state: reachable from any stage, always followed by persist.
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::TelemetryBefore => "telemetry_before",
            Stage::Recording => "recording",
            Stage::TelemetryAfter => "telemetry_after",
            Stage::Extraction => "extraction",
            Stage::Similarity => "similarity",
            Stage::Classification => "classification",
            Stage::Correlation => "correlation",
            Stage::SemanticVerification => "semantic_verification",
            Stage::Visualization => "visualization",
            Stage::Persist => "persist",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }
}

fn enter(stage: Stage) {
    info!("pipeline stage: {}", stage.as_str());
}

#[derive(Debug, Clone)]
pub struct DetectionOptions {
    pub duration_s: u32,
    pub package: Option<String>,
    pub device_id: String,
    pub fps: u32,
    pub record_size: String,
    pub bitrate: String,
    pub use_scene_filter: bool,
    pub scene_threshold: f64,
    pub semantic_verify: bool,
    pub cleanup_frames: bool,
    pub similarity_workers: usize,
    pub block_size: u32,
    pub region_grid: u32,
    pub correlation_window_s: f64,
}

impl DetectionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            duration_s: settings.default_duration_s,
            package: None,
            device_id: String::new(),
            fps: settings.default_fps,
            record_size: settings.default_record_size.clone(),
            bitrate: settings.default_bitrate.clone(),
            use_scene_filter: true,
            scene_threshold: analysis::DEFAULT_SCENE_THRESHOLD,
            semantic_verify: false,
            cleanup_frames: false,
            similarity_workers: analysis::DEFAULT_WORKERS,
            block_size: analysis::DEFAULT_BLOCK_SIZE,
            region_grid: analysis::DEFAULT_REGION_GRID,
            correlation_window_s: analysis::DEFAULT_CORRELATION_WINDOW_S,
        }
    }
}

/// Run one end-to-end detection session.
///
/// Always returns a report; the report is also serialized to
/// `<session_dir>/report.json` before this function returns, success or
/// failure.
pub async fn run_detection(settings: &Settings, opts: DetectionOptions) -> DetectionReport {
    let session_id = format!("flicker_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let session_dir = settings.output_base_dir.join(&session_id);
    let frames_dir = session_dir.join("frames");

    let started = Instant::now();
    let device_label = if opts.device_id.is_empty() {
        "default".to_string()
    } else {
        opts.device_id.clone()
    };
    let mut report = DetectionReport::new(session_id.clone(), device_label, opts.duration_s);
    report.frames_dir = Some(frames_dir.clone());

    if let Err(err) = std::fs::create_dir_all(&frames_dir) {
        report.error = Some(format!("failed to create session dir: {err}"));
    } else if let Err(err) = run_stages(settings, &opts, &session_dir, &frames_dir, &mut report).await {
        error!("detection pipeline failed: {err:#}");
        report.error.get_or_insert(format!("{err:#}"));
    }
    if report.error.is_some() {
        enter(Stage::Error);
    }

    report.analysis_time_seconds = round_to(started.elapsed().as_secs_f64(), 2);

    enter(Stage::Persist);
    persist_report(&session_dir, &report);

    if opts.cleanup_frames && frames_dir.is_dir() {
        if let Err(err) = std::fs::remove_dir_all(&frames_dir) {
            warn!("failed to clean up frames dir: {err}");
        }
    }

    enter(Stage::Done);
    info!(
        "detection complete: {} flickers in {} frames ({}s)",
        report.total_flickers_detected, report.total_frames_analyzed, report.analysis_time_seconds
    );

    report
}

async fn run_stages(
    settings: &Settings,
    opts: &DetectionOptions,
    session_dir: &Path,
    frames_dir: &Path,
    report: &mut DetectionReport,
) -> Result<()> {
    enter(Stage::Init);
    let device = DeviceTool::new(&settings.adb_path, &opts.device_id);
    let telemetry = TelemetryCapture::new(device.clone());
    let recorder = ScreenRecorder::new(device, &settings.ffprobe_path, session_dir);

    enter(Stage::TelemetryBefore);
    let stats_before = telemetry.capture_stats(opts.package.as_deref()).await;
    report.device_info = Some(telemetry.device_info().await);
    report.stats_before = Some(stats_before.clone());
    // Empty the log buffer now so the post-recording dump only holds
    // entries from the test window.
    telemetry.clear_log().await;

    enter(Stage::Recording);
    let recording = match recorder
        .record(opts.duration_s, &opts.record_size, &opts.bitrate)
        .await
    {
        Ok(result) => result,
        Err(err) => {
            // Nothing to analyze; telemetry already in the report survives.
            report.error = Some(err.to_string());
            return Ok(());
        }
    };
    report.video_path = Some(recording.video_path.clone());

    enter(Stage::TelemetryAfter);
    let stats_after = telemetry.capture_stats(opts.package.as_deref()).await;
    report.surface_delta = Some(TelemetryCapture::compute_delta(&stats_before, &stats_after));
    report.stats_after = Some(stats_after);

    let (log_entries, _raw) = telemetry.capture_log(opts.duration_s, &DEFAULT_LOG_TAGS).await;
    report.log_summary = Some(LogSummary {
        total_entries: log_entries.len(),
        tags_seen: {
            let mut tags: Vec<String> =
                log_entries.iter().map(|entry| entry.tag.clone()).collect();
            tags.sort();
            tags.dedup();
            tags
        },
        duration_span_s: log_entries
            .last()
            .map(|entry| round_to(entry.seconds_since_start, 2))
            .unwrap_or(0.0),
    });

    enter(Stage::Extraction);
    let analyzer = FrameAnalyzer::new(&settings.ffmpeg_path, frames_dir)?;
    let frames = analyzer
        .extract_frames(
            &recording.video_path,
            opts.fps,
            opts.scene_threshold,
            opts.use_scene_filter,
        )
        .await
        .context("frame extraction failed")?;
    report.total_frames_analyzed = frames.len();

    if frames.len() < 2 {
        warn!("only {} frames extracted, not enough for similarity analysis", frames.len());
        report.error = Some(format!(
            "only {} frames extracted, need at least 2",
            frames.len()
        ));
        return Ok(());
    }

    enter(Stage::Similarity);
    let scores = analyzer
        .compute_similarities(&frames, opts.similarity_workers, opts.block_size)
        .await?;
    let threshold = FrameAnalyzer::adaptive_threshold(&scores);
    report.similarity_scores = scores.clone();
    report.adaptive_threshold = threshold;

    enter(Stage::Classification);
    let mut events = analysis::classify_flickers(&scores, threshold, &frames, opts.fps);

    enter(Stage::Correlation);
    FrameAnalyzer::correlate_with_log(&mut events, &log_entries, opts.correlation_window_s);
    for event in events.iter_mut() {
        if event.frame_paths.len() >= 2 {
            match FrameAnalyzer::region_diff(&event.frame_paths[0], &event.frame_paths[1], opts.region_grid) {
                Ok(diff) => event.region_diff = Some(diff),
                Err(err) => warn!("region diff failed for frame {}: {err:#}", event.start_frame),
            }
        }
    }

    if opts.semantic_verify {
        if let Some(api_url) = &settings.vision_api_url {
            enter(Stage::SemanticVerification);
            let verifier = SemanticVerifier::new(api_url);
            for event in events.iter_mut() {
                let verdict = verifier.verify(event).await;
                event.semantic_verdict = verdict;
            }
        } else {
            warn!("semantic verification requested but VISION_API_URL is not set");
        }
    }

    enter(Stage::Visualization);
    let timeline_path = session_dir.join("similarity_timeline.png");
    match visualize::render_timeline(&scores, threshold, &events, &timeline_path) {
        Ok(path) => report.timeline_path = Some(path),
        Err(err) => warn!("timeline rendering failed: {err:#}"),
    }
    for (i, event) in events.iter().take(MAX_COMPARISON_IMAGES).enumerate() {
        let comparison_path = session_dir.join(format!("comparison_{i:02}.jpg"));
        match visualize::render_comparison(event, &comparison_path) {
            Ok(Some(path)) => report.comparison_images.push(path),
            Ok(None) => {}
            Err(err) => warn!("comparison rendering failed for event {i}: {err:#}"),
        }
    }

    report.total_flickers_detected = events.len();
    report.flicker_events = events;

    Ok(())
}

fn persist_report(session_dir: &Path, report: &DetectionReport) {
    let path = report_path(session_dir);
    match serde_json::to_string_pretty(report) {
        Ok(json) => {
            if let Err(err) = std::fs::write(&path, json) {
                error!("failed to persist report to {}: {err}", path.display());
            }
        }
        Err(err) => error!("failed to serialize report: {err}"),
    }
}

pub fn report_path(session_dir: &Path) -> PathBuf {
    session_dir.join("report.json")
}
