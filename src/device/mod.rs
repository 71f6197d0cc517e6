use std::process::Output;
use std::time::Duration;

use anyhow::{Context, Result};
use log::warn;
use tokio::process::Command;

/// Thin wrapper over the adb binary. Every invocation is a bounded
/// subprocess call; a missing binary or a timeout surfaces as an error the
/// caller downgrades to partial data, never a crash.
#[derive(Debug, Clone)]
pub struct DeviceTool {
    adb_path: String,
    device_id: String,
}

pub const SHORT_TIMEOUT: Duration = Duration::from_secs(10);

impl DeviceTool {
    pub fn new(adb_path: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        if !self.device_id.is_empty() {
            cmd.arg("-s").arg(&self.device_id);
        }
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run an adb command, returning stdout as text. Failures and timeouts
    /// are logged and mapped to an empty string so telemetry never aborts
    /// the session.
    pub async fn run_lossy(&self, args: &[&str], timeout: Duration) -> String {
        match self.run(args, timeout).await {
            Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Err(err) => {
                warn!("adb {:?} failed: {err:#}", args.first().unwrap_or(&""));
                String::new()
            }
        }
    }

    /// Run an adb command, propagating failure to the caller.
    pub async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        let mut cmd = self.command(args);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .with_context(|| format!("adb {} timed out after {timeout:?}", args.join(" ")))?
            .with_context(|| format!("failed to spawn {}", self.adb_path))?;
        Ok(output)
    }
}
