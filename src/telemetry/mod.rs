//! Layer 0: always-on SurfaceFlinger counters and filtered logcat.
//!
//! Everything here parses free-text tool output. Unparseable fields default
//! to zero and a failed adb call yields empty data; this layer never aborts
//! the session.

use std::sync::OnceLock;
use std::time::Duration;

use log::info;
use regex::Regex;

use crate::device::{DeviceTool, SHORT_TIMEOUT};
use crate::models::{DeviceInfo, LogEntry, SurfaceStatsDelta, SurfaceStatsSnapshot};
use crate::utils::round_to;

pub const DEFAULT_LOG_TAGS: [&str; 5] = [
    "Choreographer",
    "SurfaceFlinger",
    "WindowManager",
    "ActivityManager",
    "InputDispatcher",
];

const RAW_STATS_LIMIT: usize = 2000;
const RAW_LOG_LIMIT: usize = 5000;

fn logcat_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // threadtime format: MM-DD HH:MM:SS.mmm PID TID LEVEL TAG: message
        Regex::new(r"^(\d{2})-(\d{2})\s+(\d{2}):(\d{2}):(\d{2})\.(\d{3})\s+\d+\s+\d+\s+([VDIWEF])\s+(\S+?)\s*:\s*(.*)$")
            .unwrap()
    })
}

fn janky_frames_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Janky frames:\s*(\d+)\s*\(([0-9.]+)%\)").unwrap())
}

pub struct TelemetryCapture {
    device: DeviceTool,
}

impl TelemetryCapture {
    pub fn new(device: DeviceTool) -> Self {
        Self { device }
    }

    /// Snapshot frame counters, either per-package (gfxinfo) or global
    /// (SurfaceFlinger latency dump).
    pub async fn capture_stats(&self, package: Option<&str>) -> SurfaceStatsSnapshot {
        let raw = match package {
            Some(pkg) => {
                self.device
                    .run_lossy(&["shell", "dumpsys", "gfxinfo", pkg, "framestats"], SHORT_TIMEOUT)
                    .await
            }
            None => {
                self.device
                    .run_lossy(&["shell", "dumpsys", "SurfaceFlinger", "--latency"], SHORT_TIMEOUT)
                    .await
            }
        };

        parse_surface_stats(&raw)
    }

    /// Delta between two snapshots, guarded against empty test windows.
    pub fn compute_delta(before: &SurfaceStatsSnapshot, after: &SurfaceStatsSnapshot) -> SurfaceStatsDelta {
        let frames_during = after.total_frames as i64 - before.total_frames as i64;
        let janky_during = after.janky_frames as i64 - before.janky_frames as i64;
        let jank_pct = if frames_during > 0 {
            janky_during as f64 / frames_during as f64 * 100.0
        } else {
            0.0
        };

        SurfaceStatsDelta {
            frames_before: before.total_frames,
            frames_after: after.total_frames,
            frames_during_test: frames_during,
            janky_before: before.janky_frames,
            janky_after: after.janky_frames,
            janky_during_test: janky_during,
            jank_pct_during_test: round_to(jank_pct, 2),
        }
    }

    /// Clear the device log buffer. Called right before the test window so
    /// the subsequent dump only contains entries from the current test.
    pub async fn clear_log(&self) {
        let _ = self.device.run_lossy(&["logcat", "-c"], SHORT_TIMEOUT).await;
    }

    /// Dump the buffered log and keep lines whose tag matches the allow-list.
    /// Timestamps are rebased to seconds since the first kept entry.
    pub async fn capture_log(&self, window_s: u32, tags: &[&str]) -> (Vec<LogEntry>, String) {
        let timeout = Duration::from_secs(u64::from(window_s) + 5);
        let raw = self
            .device
            .run_lossy(&["logcat", "-d", "-v", "threadtime"], timeout)
            .await;

        let entries = parse_logcat(&raw, tags);
        info!("captured {} log entries across {} tags", entries.len(), tags.len());

        (entries, truncate(&raw, RAW_LOG_LIMIT))
    }

    pub async fn device_info(&self) -> DeviceInfo {
        let model = self
            .device
            .run_lossy(&["shell", "getprop", "ro.product.model"], SHORT_TIMEOUT)
            .await;
        let sdk = self
            .device
            .run_lossy(&["shell", "getprop", "ro.build.version.sdk"], SHORT_TIMEOUT)
            .await;
        let display = self
            .device
            .run_lossy(&["shell", "wm", "size"], SHORT_TIMEOUT)
            .await;

        DeviceInfo {
            model: or_unknown(model.trim()),
            sdk_version: or_unknown(sdk.trim()),
            display: or_unknown(display.trim()),
        }
    }
}

fn or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

pub fn parse_surface_stats(raw: &str) -> SurfaceStatsSnapshot {
    let mut stats = SurfaceStatsSnapshot {
        raw: truncate(raw, RAW_STATS_LIMIT),
        ..Default::default()
    };

    for line in raw.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Total frames rendered:") {
            if let Ok(count) = rest.trim().parse() {
                stats.total_frames = count;
            }
        } else if line.starts_with("Janky frames:") {
            if let Some(caps) = janky_frames_re().captures(line) {
                stats.janky_frames = caps[1].parse().unwrap_or(0);
                stats.jank_pct = caps[2].parse().unwrap_or(0.0);
            }
        }
    }

    stats
}

pub fn parse_logcat(raw: &str, tags: &[&str]) -> Vec<LogEntry> {
    let mut entries = Vec::new();
    let mut first_ts: Option<f64> = None;

    for line in raw.lines() {
        let Some(caps) = logcat_line_re().captures(line) else {
            continue;
        };

        let tag = &caps[8];
        if !tags.iter().any(|wanted| tag.contains(wanted)) {
            continue;
        }

        let ts = line_timestamp_secs(&caps);
        let first = *first_ts.get_or_insert(ts);

        entries.push(LogEntry {
            timestamp: format!(
                "{}-{} {}:{}:{}.{}",
                &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6]
            ),
            seconds_since_start: round_to(ts - first, 3),
            tag: tag.to_string(),
            level: caps[7].to_string(),
            message: caps[9].trim().to_string(),
        });
    }

    entries
}

/// Offset-friendly seconds value for a threadtime timestamp. The absolute
/// value is meaningless; only differences within one capture window are used.
fn line_timestamp_secs(caps: &regex::Captures<'_>) -> f64 {
    let month: f64 = caps[1].parse().unwrap_or(0.0);
    let day: f64 = caps[2].parse().unwrap_or(0.0);
    let hour: f64 = caps[3].parse().unwrap_or(0.0);
    let minute: f64 = caps[4].parse().unwrap_or(0.0);
    let second: f64 = caps[5].parse().unwrap_or(0.0);
    let millis: f64 = caps[6].parse().unwrap_or(0.0);

    (((month * 31.0 + day) * 24.0 + hour) * 60.0 + minute) * 60.0 + second + millis / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gfxinfo_counters() {
        let raw = "Stats since: 1234\nTotal frames rendered: 5120\nJanky frames: 123 (2.40%)\n";
        let stats = parse_surface_stats(raw);
        assert_eq!(stats.total_frames, 5120);
        assert_eq!(stats.janky_frames, 123);
        assert!((stats.jank_pct - 2.40).abs() < 1e-9);
    }

    #[test]
    fn unparseable_stats_default_to_zero() {
        let stats = parse_surface_stats("garbage output\nno counters here\n");
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.janky_frames, 0);
        assert_eq!(stats.jank_pct, 0.0);
    }

    #[test]
    fn delta_with_no_frames_has_zero_jank_pct() {
        let before = SurfaceStatsSnapshot {
            total_frames: 100,
            janky_frames: 10,
            ..Default::default()
        };
        let after = before.clone();
        let delta = TelemetryCapture::compute_delta(&before, &after);
        assert_eq!(delta.frames_during_test, 0);
        assert_eq!(delta.jank_pct_during_test, 0.0);
    }

    #[test]
    fn delta_computes_window_jank_pct() {
        let before = SurfaceStatsSnapshot {
            total_frames: 100,
            janky_frames: 10,
            ..Default::default()
        };
        let after = SurfaceStatsSnapshot {
            total_frames: 300,
            janky_frames: 60,
            ..Default::default()
        };
        let delta = TelemetryCapture::compute_delta(&before, &after);
        assert_eq!(delta.frames_during_test, 200);
        assert_eq!(delta.janky_during_test, 50);
        assert!((delta.jank_pct_during_test - 25.0).abs() < 1e-9);
    }

    #[test]
    fn logcat_entries_are_filtered_and_rebased() {
        let raw = "\
03-14 10:00:01.000  1000  1000 I Choreographer: Skipped 30 frames!
03-14 10:00:01.500  1000  1001 D irrelevant_tag: noise
03-14 10:00:02.250  1000  1002 W SurfaceFlinger: buffer queue stall
not a logcat line at all
";
        let entries = parse_logcat(raw, &DEFAULT_LOG_TAGS);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seconds_since_start, 0.0);
        assert_eq!(entries[0].tag, "Choreographer");
        assert_eq!(entries[0].level, "I");
        assert!((entries[1].seconds_since_start - 1.25).abs() < 1e-9);
        assert_eq!(entries[1].message, "buffer queue stall");
    }
}
