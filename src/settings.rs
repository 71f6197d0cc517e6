use std::env;
use std::path::PathBuf;

/// External tool locations and analysis defaults.
///
/// Read once from the environment at startup; every component receives the
/// pieces it needs by value instead of consulting globals.
#[derive(Debug, Clone)]
pub struct Settings {
    pub adb_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub output_base_dir: PathBuf,
    pub vision_api_url: Option<String>,

    pub default_duration_s: u32,
    pub default_fps: u32,
    pub default_record_size: String,
    pub default_bitrate: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            adb_path: "adb".into(),
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            output_base_dir: PathBuf::from("/tmp/flickerscope"),
            vision_api_url: None,
            default_duration_s: 10,
            default_fps: 15,
            default_record_size: "720x1280".into(),
            default_bitrate: "8000000".into(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            adb_path: env::var("ADB_PATH").unwrap_or(defaults.adb_path),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            output_base_dir: env::var("FLICKERSCOPE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_base_dir),
            vision_api_url: env::var("VISION_API_URL").ok().filter(|url| !url.is_empty()),
            default_duration_s: parse_env("FLICKERSCOPE_DURATION_S", defaults.default_duration_s),
            default_fps: parse_env("FLICKERSCOPE_FPS", defaults.default_fps),
            default_record_size: env::var("FLICKERSCOPE_RECORD_SIZE")
                .unwrap_or(defaults.default_record_size),
            default_bitrate: env::var("FLICKERSCOPE_BITRATE").unwrap_or(defaults.default_bitrate),
        }
    }
}

fn parse_env(key: &str, fallback: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback)
}
