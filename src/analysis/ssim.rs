//! Block-based structural similarity between two frames.
//!
//! `compute_ssim_pair` is a pure, self-contained unit of work: it closes
//! over nothing and communicates only through its job input and score
//! output, so it can be dispatched to any worker in the pool.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use log::error;

// Standard SSIM stabilizing constants for 8-bit luminance.
pub const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
pub const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Frames are downscaled to this width before comparison. Accuracy loss is
/// negligible and the comparison cost drops by an order of magnitude.
pub const RESIZE_WIDTH: u32 = 360;

pub const DEFAULT_BLOCK_SIZE: u32 = 8;

/// One unit of similarity work: compare the pair at `pair_index`.
#[derive(Debug, Clone)]
pub struct SsimJob {
    pub pair_index: usize,
    pub frame_a: PathBuf,
    pub frame_b: PathBuf,
    pub block_size: u32,
}

/// Grayscale frame as a row-major f64 plane.
pub struct LumaPlane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl LumaPlane {
    fn pixel(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }
}

/// Load a frame as grayscale and resize preserving aspect ratio.
pub fn load_scaled(path: &Path, target_width: u32) -> Result<LumaPlane> {
    let img = image::open(path)
        .with_context(|| format!("failed to open frame {}", path.display()))?
        .to_luma8();
    let (w, h) = img.dimensions();
    let target_height = ((h as f64) * (target_width as f64) / (w as f64)).round().max(1.0) as u32;
    Ok(to_plane(&image::imageops::resize(
        &img,
        target_width,
        target_height,
        FilterType::Lanczos3,
    )))
}

/// Load a frame as grayscale and force exact dimensions (used by the
/// region-diff grid, which needs a square plane).
pub fn load_exact(path: &Path, width: u32, height: u32) -> Result<LumaPlane> {
    let img = image::open(path)
        .with_context(|| format!("failed to open frame {}", path.display()))?
        .to_luma8();
    if img.dimensions() == (width, height) {
        return Ok(to_plane(&img));
    }
    Ok(to_plane(&image::imageops::resize(
        &img,
        width,
        height,
        FilterType::Lanczos3,
    )))
}

fn to_plane(img: &image::GrayImage) -> LumaPlane {
    LumaPlane {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.pixels().map(|p| f64::from(p[0])).collect(),
    }
}

/// Compute the mean block SSIM for one frame pair.
///
/// Never raises: an unreadable frame scores 1.0 (visually identical), so a
/// corrupt frame cannot fabricate a flicker event.
pub fn compute_ssim_pair(job: &SsimJob) -> f64 {
    match try_compute(job) {
        Ok(score) => score,
        Err(err) => {
            error!(
                "SSIM failed for pair {} ({} vs {}): {err:#}",
                job.pair_index,
                job.frame_a.display(),
                job.frame_b.display()
            );
            1.0
        }
    }
}

fn try_compute(job: &SsimJob) -> Result<f64> {
    let plane_a = load_scaled(&job.frame_a, RESIZE_WIDTH)?;
    // Force the second frame onto the first frame's grid so mixed
    // resolutions still compare block-for-block.
    let plane_b = load_exact(&job.frame_b, plane_a.width as u32, plane_a.height as u32)?;
    Ok(block_ssim(&plane_a, &plane_b, job.block_size as usize))
}

pub fn block_ssim(a: &LumaPlane, b: &LumaPlane, block: usize) -> f64 {
    if block == 0 || a.width < block || a.height < block {
        return 1.0;
    }

    let mut total = 0.0;
    let mut count = 0usize;

    let mut row = 0;
    while row + block <= a.height {
        let mut col = 0;
        while col + block <= a.width {
            total += block_score(a, b, col, row, block);
            count += 1;
            col += block;
        }
        row += block;
    }

    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

fn block_score(a: &LumaPlane, b: &LumaPlane, x0: usize, y0: usize, block: usize) -> f64 {
    let n = (block * block) as f64;

    let mut sum_a = 0.0;
    let mut sum_b = 0.0;
    for y in y0..y0 + block {
        for x in x0..x0 + block {
            sum_a += a.pixel(x, y);
            sum_b += b.pixel(x, y);
        }
    }
    let mu_a = sum_a / n;
    let mu_b = sum_b / n;

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut cov = 0.0;
    for y in y0..y0 + block {
        for x in x0..x0 + block {
            let da = a.pixel(x, y) - mu_a;
            let db = b.pixel(x, y) - mu_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    let numerator = (2.0 * mu_a * mu_b + C1) * (2.0 * cov + C2);
    let denominator = (mu_a * mu_a + mu_b * mu_b + C1) * (var_a + var_b + C2);

    if denominator > 0.0 {
        numerator / denominator
    } else {
        1.0
    }
}
