//! Layer 1: triggered on-device screen recording.
//!
//! `screenrecord` runs synchronously on the device; the pull back to the
//! host is retried because transfer is flaky, especially on emulators.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::device::DeviceTool;
use crate::utils::round_to;

/// Hard ceiling imposed by the Android screenrecord tool.
pub const MAX_RECORD_DURATION_S: u32 = 180;

const DEVICE_RECORDING_PATH: &str = "/sdcard/flicker_recording.mp4";
const PULL_ATTEMPTS: u32 = 3;
const PULL_TIMEOUT: Duration = Duration::from_secs(60);
const PULL_RETRY_DELAY: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Recording failed in a way that leaves nothing to analyze.
#[derive(Debug, Clone)]
pub struct RecordingError {
    pub message: String,
    pub device_path: String,
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RecordingError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    pub valid: bool,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub format_name: String,
    #[serde(default)]
    pub codec: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Raw rational string from ffprobe, e.g. "60/1".
    #[serde(default)]
    pub fps: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingResult {
    pub video_path: PathBuf,
    pub device_path: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub actual_duration_s: f64,
    pub requested_duration_s: u32,
    pub file_size_bytes: u64,
    pub validation: ProbeResult,
}

pub struct ScreenRecorder {
    device: DeviceTool,
    ffprobe_path: String,
    output_dir: PathBuf,
}

impl ScreenRecorder {
    pub fn new(device: DeviceTool, ffprobe_path: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            ffprobe_path: ffprobe_path.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Record the screen and pull the artifact back to the host.
    ///
    /// A device-side timeout is not fatal: whatever was captured is still
    /// pulled. Only failure to retrieve any artifact returns an error.
    pub async fn record(
        &self,
        duration_s: u32,
        size: &str,
        bitrate: &str,
    ) -> Result<RecordingResult, RecordingError> {
        let duration_s = duration_s.min(MAX_RECORD_DURATION_S);
        let local_path = self.output_dir.join("recording.mp4");
        let duration_arg = duration_s.to_string();

        let started_at = Utc::now();
        let started = Instant::now();
        let record_timeout = Duration::from_secs(u64::from(duration_s) + 30);
        let record = self
            .device
            .run(
                &[
                    "shell",
                    "screenrecord",
                    "--size",
                    size,
                    "--bit-rate",
                    bitrate,
                    "--time-limit",
                    duration_arg.as_str(),
                    DEVICE_RECORDING_PATH,
                ],
                record_timeout,
            )
            .await;
        if let Err(err) = record {
            warn!("screenrecord did not finish cleanly, pulling whatever was captured: {err:#}");
        }
        let ended_at = Utc::now();
        // Duration of the recording itself, not the flaky pull that follows.
        let recording_elapsed = started.elapsed();

        if !self.pull_with_retry(&local_path).await {
            return Err(RecordingError {
                message: format!("failed to pull recording from device after {PULL_ATTEMPTS} attempts"),
                device_path: DEVICE_RECORDING_PATH.to_string(),
            });
        }

        // Remote copy is no longer needed once retrieval succeeded.
        let _ = self
            .device
            .run(&["shell", "rm", "-f", DEVICE_RECORDING_PATH], Duration::from_secs(10))
            .await;

        let file_size_bytes = std::fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
        let validation = self.probe(&local_path).await;
        info!(
            "recording pulled: {} bytes, valid={}, codec={}",
            file_size_bytes, validation.valid, validation.codec
        );

        Ok(RecordingResult {
            video_path: local_path,
            device_path: DEVICE_RECORDING_PATH.to_string(),
            started_at,
            ended_at,
            actual_duration_s: round_to(recording_elapsed.as_secs_f64(), 2),
            requested_duration_s: duration_s,
            file_size_bytes,
            validation,
        })
    }

    async fn pull_with_retry(&self, local_path: &Path) -> bool {
        let local = local_path.to_string_lossy().into_owned();
        for attempt in 1..=PULL_ATTEMPTS {
            match self
                .device
                .run(&["pull", DEVICE_RECORDING_PATH, local.as_str()], PULL_TIMEOUT)
                .await
            {
                Ok(_) => {
                    let size = std::fs::metadata(local_path).map(|m| m.len()).unwrap_or(0);
                    if size > 0 {
                        return true;
                    }
                    warn!("adb pull attempt {attempt}/{PULL_ATTEMPTS} produced an empty file");
                }
                Err(err) => {
                    warn!("adb pull attempt {attempt}/{PULL_ATTEMPTS} failed: {err:#}");
                }
            }
            tokio::time::sleep(PULL_RETRY_DELAY).await;
        }
        false
    }

    /// Inspect the local artifact with ffprobe. An unreadable or zero-byte
    /// file yields `valid: false` rather than an error.
    pub async fn probe(&self, path: &Path) -> ProbeResult {
        if !path.exists() {
            return ProbeResult {
                valid: false,
                error: Some("file not found".into()),
                ..Default::default()
            };
        }

        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args(["-v", "error", "-show_format", "-show_streams", "-print_format", "json"])
            .arg(path)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return ProbeResult {
                    valid: false,
                    error: Some(format!("failed to spawn {}: {err}", self.ffprobe_path)),
                    ..Default::default()
                }
            }
            Err(_) => {
                return ProbeResult {
                    valid: false,
                    error: Some("ffprobe timed out".into()),
                    ..Default::default()
                }
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return ProbeResult {
                valid: false,
                error: Some(stderr.chars().take(500).collect()),
                ..Default::default()
            };
        }

        match serde_json::from_slice::<serde_json::Value>(&output.stdout) {
            Ok(info) => parse_probe_json(&info),
            Err(err) => ProbeResult {
                valid: false,
                error: Some(format!("unparseable ffprobe output: {err}")),
                ..Default::default()
            },
        }
    }
}

fn parse_probe_json(info: &serde_json::Value) -> ProbeResult {
    let format = &info["format"];
    let video_stream = info["streams"]
        .as_array()
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s["codec_type"].as_str() == Some("video"))
        })
        .cloned()
        .unwrap_or_default();

    ProbeResult {
        valid: true,
        duration: format["duration"]
            .as_str()
            .and_then(|d| d.parse().ok())
            .unwrap_or(0.0),
        size_bytes: format["size"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
        format_name: format["format_name"].as_str().unwrap_or("").to_string(),
        codec: video_stream["codec_name"].as_str().unwrap_or("").to_string(),
        width: video_stream["width"].as_u64().unwrap_or(0) as u32,
        height: video_stream["height"].as_u64().unwrap_or(0) as u32,
        fps: video_stream["r_frame_rate"].as_str().unwrap_or("").to_string(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_json_extracts_video_stream() {
        let info: serde_json::Value = serde_json::from_str(
            r#"{
                "format": {"duration": "9.97", "size": "1048576", "format_name": "mov,mp4,m4a"},
                "streams": [
                    {"codec_type": "audio", "codec_name": "aac"},
                    {"codec_type": "video", "codec_name": "h264", "width": 720, "height": 1280, "r_frame_rate": "60/1"}
                ]
            }"#,
        )
        .unwrap();

        let probe = parse_probe_json(&info);
        assert!(probe.valid);
        assert!((probe.duration - 9.97).abs() < 1e-9);
        assert_eq!(probe.size_bytes, 1048576);
        assert_eq!(probe.codec, "h264");
        assert_eq!((probe.width, probe.height), (720, 1280));
        assert_eq!(probe.fps, "60/1");
    }

    #[test]
    fn probe_json_without_video_stream_keeps_defaults() {
        let info: serde_json::Value =
            serde_json::from_str(r#"{"format": {}, "streams": []}"#).unwrap();
        let probe = parse_probe_json(&info);
        assert!(probe.valid);
        assert_eq!(probe.codec, "");
        assert_eq!(probe.width, 0);
    }
}
