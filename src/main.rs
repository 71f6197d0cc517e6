use flickerscope::{pipeline, DetectionOptions, Settings};

#[tokio::main]
async fn main() {
    // Reads RUST_LOG for verbosity overrides.
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let settings = Settings::from_env();
    log::info!(
        "flickerscope starting: adb={}, ffmpeg={}, output={}",
        settings.adb_path,
        settings.ffmpeg_path,
        settings.output_base_dir.display()
    );

    let opts = DetectionOptions::from_settings(&settings);
    let report = pipeline::run_detection(&settings, opts).await;

    match &report.error {
        Some(error) => log::warn!("session {} finished with error: {error}", report.session_id),
        None => log::info!(
            "session {} finished: {} flicker events, threshold {:.3}",
            report.session_id,
            report.total_flickers_detected,
            report.adaptive_threshold
        ),
    }
}
