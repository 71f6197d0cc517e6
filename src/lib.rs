pub mod analysis;
pub mod device;
pub mod models;
pub mod pipeline;
pub mod recorder;
pub mod semantic;
pub mod settings;
pub mod telemetry;
pub mod utils;
pub mod visualize;

pub use models::{DetectionReport, FlickerEvent, FlickerPattern, Severity};
pub use pipeline::{run_detection, DetectionOptions};
pub use settings::Settings;
