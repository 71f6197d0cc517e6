//! Flicker event classification over a similarity timeline.

use std::path::PathBuf;

use crate::models::{FlickerEvent, FlickerPattern, Severity};
use crate::utils::round_to;

/// Frames kept per event for comparison rendering.
const MAX_EVENT_FRAMES: usize = 4;

/// Group maximal runs of below-threshold scores into events.
///
/// Score index i covers the transition between frame i and frame i+1, so an
/// event over scores [start, end] involves frames start through end+1.
pub fn classify_flickers(
    scores: &[f64],
    threshold: f64,
    frame_paths: &[PathBuf],
    fps: u32,
) -> Vec<FlickerEvent> {
    let fps = fps.max(1) as f64;
    let mut events = Vec::new();
    let mut i = 0;

    while i < scores.len() {
        if scores[i] >= threshold {
            i += 1;
            continue;
        }

        let start = i;
        while i < scores.len() && scores[i] < threshold {
            i += 1;
        }
        let end = i - 1;

        let event_scores = scores[start..=end].to_vec();
        let start_time = start as f64 / fps;
        let end_time = (end + 1) as f64 / fps;
        let duration_ms = (end_time - start_time) * 1000.0;

        let pattern = if end == start {
            FlickerPattern::SingleGlitch
        } else if is_oscillation(scores, start, end, threshold) {
            FlickerPattern::RapidOscillation
        } else {
            FlickerPattern::SustainedChange
        };

        let min_score = event_scores.iter().copied().fold(f64::INFINITY, f64::min);
        let severity = severity_for(min_score, duration_ms);

        let frame_end = (end + 2).min(frame_paths.len());
        let frames: Vec<PathBuf> = frame_paths[start.min(frame_paths.len())..frame_end]
            .iter()
            .take(MAX_EVENT_FRAMES)
            .cloned()
            .collect();

        events.push(FlickerEvent {
            start_frame: start,
            end_frame: end,
            start_time: round_to(start_time, 3),
            end_time: round_to(end_time, 3),
            duration_ms: round_to(duration_ms, 1),
            pattern,
            scores: event_scores,
            severity,
            frame_paths: frames,
            log_entries: Vec::new(),
            semantic_verdict: None,
            region_diff: None,
        });
    }

    events
}

/// Oscillation tie-break: the signal crosses the threshold at least 3 times
/// within the run's slightly widened neighborhood. The exact neighborhood
/// boundary is a calibration candidate, not a contract.
/// TODO: calibrate the widened window against a corpus of real recordings.
fn is_oscillation(scores: &[f64], start: usize, end: usize, threshold: f64) -> bool {
    if end - start < 2 {
        return false;
    }

    let mut crossings = 0;
    let mut above = scores[start] >= threshold;
    for &score in &scores[start + 1..(end + 3).min(scores.len())] {
        let current_above = score >= threshold;
        if current_above != above {
            crossings += 1;
            above = current_above;
        }
    }

    crossings >= 3
}

fn severity_for(min_score: f64, duration_ms: f64) -> Severity {
    if min_score < 0.5 || duration_ms > 1000.0 {
        Severity::High
    } else if min_score < 0.7 || duration_ms > 500.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_frames(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("frame_{i:05}.jpg"))).collect()
    }

    #[test]
    fn isolated_drop_is_a_single_glitch() {
        let scores = [0.98, 0.98, 0.60, 0.98, 0.98];
        let events = classify_flickers(&scores, 0.92, &fake_frames(6), 15);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pattern, FlickerPattern::SingleGlitch);
        assert_eq!(events[0].severity, Severity::Medium);
        assert_eq!((events[0].start_frame, events[0].end_frame), (2, 2));
    }

    #[test]
    fn deep_drop_is_high_severity() {
        let scores = [0.98, 0.30, 0.98];
        let events = classify_flickers(&scores, 0.92, &fake_frames(4), 15);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[test]
    fn consecutive_drops_form_one_sustained_event() {
        let scores = [0.98, 0.60, 0.55, 0.50, 0.98];
        let events = classify_flickers(&scores, 0.92, &fake_frames(6), 15);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pattern, FlickerPattern::SustainedChange);
        assert_eq!((events[0].start_frame, events[0].end_frame), (1, 3));
        assert_eq!(events[0].scores, vec![0.60, 0.55, 0.50]);
    }

    #[test]
    fn all_scores_above_threshold_yield_no_events() {
        let scores = [0.98, 0.97, 0.99, 0.98];
        assert!(classify_flickers(&scores, 0.92, &fake_frames(5), 15).is_empty());
    }

    #[test]
    fn long_run_duration_escalates_severity() {
        // 20 below-threshold scores at 15 fps is ~1333 ms > 1 s.
        let scores: Vec<f64> = std::iter::once(0.98)
            .chain(std::iter::repeat(0.85).take(20))
            .chain(std::iter::once(0.98))
            .collect();
        let events = classify_flickers(&scores, 0.92, &fake_frames(23), 15);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::High);
        assert!(events[0].duration_ms > 1000.0);
    }

    #[test]
    fn event_keeps_at_most_four_frames() {
        let scores: Vec<f64> = std::iter::repeat(0.5).take(8).collect();
        let events = classify_flickers(&scores, 0.92, &fake_frames(9), 15);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame_paths.len(), 4);
        assert_eq!(events[0].frame_paths[0], PathBuf::from("frame_00000.jpg"));
    }

    #[test]
    fn duration_follows_frame_indices_and_fps() {
        let scores = [0.98, 0.60, 0.55, 0.98];
        let events = classify_flickers(&scores, 0.92, &fake_frames(5), 10);
        assert_eq!(events.len(), 1);
        // Run covers score indices 1..=2 at 10 fps: (3 - 1) / 10 * 1000.
        assert!((events[0].duration_ms - 200.0).abs() < 1e-9);
        assert!((events[0].start_time - 0.1).abs() < 1e-9);
        assert!((events[0].end_time - 0.3).abs() < 1e-9);
    }
}
