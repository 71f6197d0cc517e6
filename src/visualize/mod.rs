//! Presentation-only rendering of a finished analysis: a similarity
//! timeline chart and side-by-side comparison images per event.
//!
//! Everything is drawn with plain pixel operations from the `image` crate;
//! the chart carries no text labels, only geometry.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};

use crate::models::{FlickerEvent, Severity};

const CHART_W: u32 = 1200;
const CHART_H: u32 = 400;
const MARGIN_L: u32 = 60;
const MARGIN_R: u32 = 30;
const MARGIN_T: u32 = 30;
const MARGIN_B: u32 = 50;
const PLOT_W: u32 = CHART_W - MARGIN_L - MARGIN_R;
const PLOT_H: u32 = CHART_H - MARGIN_T - MARGIN_B;

const BG: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([230, 230, 230]);
const AXIS: Rgb<u8> = Rgb([100, 100, 100]);
const SCORE_LINE: Rgb<u8> = Rgb([41, 128, 185]);
const THRESHOLD_LINE: Rgb<u8> = Rgb([231, 76, 60]);
const FLICKER_BAND: Rgb<u8> = Rgb([255, 165, 0]);
const FLICKER_BAND_ALPHA: u8 = 80;

const COMPARISON_FRAME_WIDTH: u32 = 300;
const COMPARISON_PADDING: u32 = 10;
const COMPARISON_STRIP_H: u32 = 40;

/// Render the similarity timeline: X is the pair index over time, Y is the
/// score in [0, 1], with the adaptive threshold dashed and event spans
/// banded.
pub fn render_timeline(
    scores: &[f64],
    threshold: f64,
    events: &[FlickerEvent],
    output_path: &Path,
) -> Result<PathBuf> {
    anyhow::ensure!(!scores.is_empty(), "no scores to render");

    let mut img = RgbImage::from_pixel(CHART_W, CHART_H, BG);
    let n = scores.len() as u32;

    // Horizontal grid every 0.1 of score.
    for i in 0..=10u32 {
        let y = MARGIN_T + (i * PLOT_H) / 10;
        hline(&mut img, MARGIN_L, CHART_W - MARGIN_R, y, GRID, 1);
    }

    // Event bands behind the polyline.
    for event in events {
        let x1 = MARGIN_L + ((event.start_frame as u32).min(n) * PLOT_W) / n;
        let x2 = MARGIN_L + (((event.end_frame + 1) as u32).min(n) * PLOT_W) / n;
        blend_rect(&mut img, x1, MARGIN_T, x2.max(x1 + 1), MARGIN_T + PLOT_H, FLICKER_BAND, FLICKER_BAND_ALPHA);
    }

    // Dashed threshold line.
    let y_threshold = score_to_y(threshold);
    let mut x = MARGIN_L;
    while x < CHART_W - MARGIN_R {
        let end = (x + 10).min(CHART_W - MARGIN_R);
        hline(&mut img, x, end, y_threshold, THRESHOLD_LINE, 2);
        x += 20;
    }

    // Score polyline.
    let denominator = (n - 1).max(1);
    let points: Vec<(i64, i64)> = scores
        .iter()
        .enumerate()
        .map(|(i, score)| {
            let x = MARGIN_L + (i as u32 * PLOT_W) / denominator;
            (i64::from(x), i64::from(score_to_y(score.clamp(0.0, 1.0))))
        })
        .collect();
    for pair in points.windows(2) {
        line(&mut img, pair[0], pair[1], SCORE_LINE, 2);
    }

    // Axes drawn last so bands never cover them.
    vline(&mut img, MARGIN_L, MARGIN_T, CHART_H - MARGIN_B, AXIS, 2);
    hline(&mut img, MARGIN_L, CHART_W - MARGIN_R, CHART_H - MARGIN_B, AXIS, 2);
    for i in 0..=10u32 {
        let x = MARGIN_L + (i * PLOT_W) / 10;
        vline(&mut img, x, CHART_H - MARGIN_B, CHART_H - MARGIN_B + 5, AXIS, 1);
    }

    img.save(output_path)
        .with_context(|| format!("failed to save timeline chart {}", output_path.display()))?;
    Ok(output_path.to_path_buf())
}

/// Render up to four event frames side by side on a dark canvas with a
/// severity-colored strip along the bottom. Returns `None` when fewer than
/// two frames could be loaded.
pub fn render_comparison(event: &FlickerEvent, output_path: &Path) -> Result<Option<PathBuf>> {
    let mut frames = Vec::new();
    for path in &event.frame_paths {
        let Ok(img) = image::open(path) else {
            continue;
        };
        let img = img.to_rgb8();
        let (w, h) = img.dimensions();
        let height = ((h as f64) * f64::from(COMPARISON_FRAME_WIDTH) / (w as f64)).round().max(1.0) as u32;
        frames.push(image::imageops::resize(
            &img,
            COMPARISON_FRAME_WIDTH,
            height,
            FilterType::Lanczos3,
        ));
    }

    if frames.len() < 2 {
        return Ok(None);
    }

    let max_h = frames.iter().map(|f| f.height()).max().unwrap_or(1);
    let total_w: u32 =
        frames.iter().map(|f| f.width()).sum::<u32>() + COMPARISON_PADDING * (frames.len() as u32 + 1);
    let total_h = max_h + COMPARISON_STRIP_H + COMPARISON_PADDING * 2;

    let mut canvas = RgbImage::from_pixel(total_w, total_h, Rgb([40, 40, 40]));

    let mut x_offset = COMPARISON_PADDING;
    for frame in &frames {
        image::imageops::overlay(&mut canvas, frame, i64::from(x_offset), i64::from(COMPARISON_PADDING));
        x_offset += frame.width() + COMPARISON_PADDING;
    }

    let strip_color = severity_color(event.severity);
    blend_rect(
        &mut canvas,
        COMPARISON_PADDING,
        total_h - COMPARISON_STRIP_H,
        total_w - COMPARISON_PADDING,
        total_h - COMPARISON_PADDING,
        strip_color,
        255,
    );

    canvas
        .save(output_path)
        .with_context(|| format!("failed to save comparison image {}", output_path.display()))?;
    Ok(Some(output_path.to_path_buf()))
}

fn severity_color(severity: Severity) -> Rgb<u8> {
    match severity {
        Severity::High => Rgb([220, 53, 69]),
        Severity::Medium => Rgb([255, 165, 0]),
        Severity::Low => Rgb([240, 200, 60]),
    }
}

fn score_to_y(score: f64) -> u32 {
    MARGIN_T + ((1.0 - score) * f64::from(PLOT_H)) as u32
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn hline(img: &mut RgbImage, x1: u32, x2: u32, y: u32, color: Rgb<u8>, width: u32) {
    for x in x1..x2 {
        for dy in 0..width {
            put(img, i64::from(x), i64::from(y + dy), color);
        }
    }
}

fn vline(img: &mut RgbImage, x: u32, y1: u32, y2: u32, color: Rgb<u8>, width: u32) {
    for y in y1..y2 {
        for dx in 0..width {
            put(img, i64::from(x + dx), i64::from(y), color);
        }
    }
}

/// Bresenham segment with a square brush.
fn line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>, width: i64) {
    let (mut x, mut y) = from;
    let dx = (to.0 - from.0).abs();
    let dy = -(to.1 - from.1).abs();
    let sx = if from.0 < to.0 { 1 } else { -1 };
    let sy = if from.1 < to.1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for bx in 0..width {
            for by in 0..width {
                put(img, x + bx, y + by, color);
            }
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn blend_rect(img: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Rgb<u8>, alpha: u8) {
    let a = u32::from(alpha);
    for y in y1..y2.min(img.height()) {
        for x in x1..x2.min(img.width()) {
            let old = img.get_pixel(x, y);
            let blended = Rgb([
                ((u32::from(old[0]) * (255 - a) + u32::from(color[0]) * a) / 255) as u8,
                ((u32::from(old[1]) * (255 - a) + u32::from(color[1]) * a) / 255) as u8,
                ((u32::from(old[2]) * (255 - a) + u32::from(color[2]) * a) / 255) as u8,
            ]);
            img.put_pixel(x, y, blended);
        }
    }
}
