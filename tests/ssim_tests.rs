mod common;

use common::{noisy_frame, solid_frame};
use flickerscope::analysis::ssim::{compute_ssim_pair, SsimJob};
use flickerscope::analysis::FrameAnalyzer;
use tempfile::TempDir;

fn job(a: &std::path::Path, b: &std::path::Path) -> SsimJob {
    SsimJob {
        pair_index: 0,
        frame_a: a.to_path_buf(),
        frame_b: b.to_path_buf(),
        block_size: 8,
    }
}

#[test]
fn identical_frames_score_near_one() {
    let dir = TempDir::new().unwrap();
    let frame = solid_frame(dir.path(), "frame.png", 360, 640, 128);
    let score = compute_ssim_pair(&job(&frame, &frame));
    assert!(score > 0.99, "identical frames should score > 0.99, got {score}");
}

#[test]
fn opposite_luminance_scores_low() {
    let dir = TempDir::new().unwrap();
    let dark = solid_frame(dir.path(), "dark.png", 360, 640, 30);
    let bright = solid_frame(dir.path(), "bright.png", 360, 640, 220);
    let score = compute_ssim_pair(&job(&dark, &bright));
    assert!(score < 0.5, "near-black vs near-white should score < 0.5, got {score}");
}

#[test]
fn lightly_perturbed_frames_score_high() {
    let dir = TempDir::new().unwrap();
    let a = noisy_frame(dir.path(), "a.png", 360, 640, 128, 5, 7);
    // Same seed reproduces the same noise; the level offset keeps the
    // frames slightly different instead of byte-identical.
    let b = noisy_frame(dir.path(), "b.png", 360, 640, 130, 5, 7);
    let score = compute_ssim_pair(&job(&a, &b));
    assert!(score > 0.7, "near-identical frames should score > 0.7, got {score}");
}

#[test]
fn unreadable_frame_scores_one() {
    let dir = TempDir::new().unwrap();
    let real = solid_frame(dir.path(), "real.png", 360, 640, 128);
    let missing = dir.path().join("missing.png");
    let score = compute_ssim_pair(&job(&real, &missing));
    assert_eq!(score, 1.0);
}

#[tokio::test]
async fn parallel_similarity_preserves_pair_order() {
    let dir = TempDir::new().unwrap();
    // Bright/dark pattern gives a recognizable score sequence:
    // pairs (0,1) and (3,4) are identical, all others differ sharply.
    let levels: [u8; 6] = [200, 200, 40, 200, 200, 40];
    let frames: Vec<_> = levels
        .iter()
        .enumerate()
        .map(|(i, &level)| solid_frame(dir.path(), &format!("frame_{i:05}.png"), 180, 320, level))
        .collect();

    let analyzer = FrameAnalyzer::new("ffmpeg", dir.path().join("out")).unwrap();

    for workers in [1usize, 2, 3, 5] {
        let scores = analyzer
            .compute_similarities(&frames, workers, 8)
            .await
            .unwrap();
        assert_eq!(scores.len(), frames.len() - 1, "workers={workers}");
        assert!(scores[0] > 0.9, "workers={workers}, scores={scores:?}");
        assert!(scores[1] < 0.6, "workers={workers}, scores={scores:?}");
        assert!(scores[2] < 0.6, "workers={workers}, scores={scores:?}");
        assert!(scores[3] > 0.9, "workers={workers}, scores={scores:?}");
        assert!(scores[4] < 0.6, "workers={workers}, scores={scores:?}");
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }
}

#[tokio::test]
async fn similarity_needs_two_frames() {
    let dir = TempDir::new().unwrap();
    let analyzer = FrameAnalyzer::new("ffmpeg", dir.path().join("out")).unwrap();

    let empty: Vec<std::path::PathBuf> = Vec::new();
    assert!(analyzer.compute_similarities(&empty, 4, 8).await.unwrap().is_empty());

    let single = vec![solid_frame(dir.path(), "only.png", 180, 320, 128)];
    assert!(analyzer.compute_similarities(&single, 4, 8).await.unwrap().is_empty());
}

#[test]
fn region_diff_locates_the_changed_cell() {
    use image::{GrayImage, Luma};

    let dir = TempDir::new().unwrap();

    let base = GrayImage::from_pixel(360, 360, Luma([100]));
    let base_path = dir.path().join("base.png");
    base.save(&base_path).unwrap();

    // Brighten only the top-left quadrant of the 4x4 grid.
    let changed = GrayImage::from_fn(360, 360, |x, y| {
        if x < 90 && y < 90 {
            Luma([240])
        } else {
            Luma([100])
        }
    });
    let changed_path = dir.path().join("changed.png");
    changed.save(&changed_path).unwrap();

    let diff = FrameAnalyzer::region_diff(&base_path, &changed_path, 4).unwrap();
    assert_eq!(diff.grid_size, 4);
    assert_eq!(diff.regions.len(), 16);
    assert_eq!(diff.max_change_region, "r0_c0");
    assert!(diff.max_change_value > 100.0, "got {}", diff.max_change_value);
    assert!(diff.mean_change < diff.max_change_value);
    assert!(diff.regions["r3_c3"] < 5.0);
}
