use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Write a solid grayscale frame to `dir` and return its path.
pub fn solid_frame(dir: &Path, name: &str, width: u32, height: u32, level: u8) -> PathBuf {
    let img = GrayImage::from_pixel(width, height, Luma([level]));
    let path = dir.join(name);
    img.save(&path).expect("failed to write test frame");
    path
}

/// Write a frame of `level` plus seeded gaussian-ish noise. PNG keeps the
/// noise intact so similarity numbers are deterministic.
pub fn noisy_frame(dir: &Path, name: &str, width: u32, height: u32, level: u8, amplitude: i16, seed: u64) -> PathBuf {
    let mut rng = StdRng::seed_from_u64(seed);
    let img = GrayImage::from_fn(width, height, |_, _| {
        let noise: i16 = rng.gen_range(-amplitude..=amplitude);
        Luma([(i16::from(level) + noise).clamp(0, 255) as u8])
    });
    let path = dir.join(name);
    img.save(&path).expect("failed to write test frame");
    path
}
