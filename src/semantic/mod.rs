//! Layer 3: optional semantic verification of flicker events.
//!
//! Expensive, so gated three ways: an explicit enable flag, HIGH/MEDIUM
//! severity only, and at least two frames to show the endpoint. Network
//! failures downgrade to "no verdict"; they never fail the pipeline.

use std::time::Duration;

use base64::Engine;
use log::warn;
use serde_json::json;

use crate::models::{FlickerEvent, Severity};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FRAMES_PER_REQUEST: usize = 4;

pub struct SemanticVerifier {
    api_url: String,
    client: reqwest::Client,
}

impl SemanticVerifier {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Ask the vision endpoint whether the event looks like a rendering bug
    /// or an intentional animation. Returns `None` when the event is gated
    /// out or the endpoint is unavailable.
    pub async fn verify(&self, event: &FlickerEvent) -> Option<String> {
        if !matches!(event.severity, Severity::High | Severity::Medium) {
            return None;
        }
        if event.frame_paths.len() < 2 {
            return None;
        }

        let mut frames_b64 = Vec::new();
        for path in event.frame_paths.iter().take(MAX_FRAMES_PER_REQUEST) {
            match std::fs::read(path) {
                Ok(bytes) => frames_b64.push(base64::engine::general_purpose::STANDARD.encode(bytes)),
                Err(err) => {
                    warn!("skipping unreadable frame {}: {err}", path.display());
                }
            }
        }
        if frames_b64.len() < 2 {
            return None;
        }

        let prompt = format!(
            "Analyze these {} consecutive screen frames from an Android UI test. \
             Pattern detected: {}. Similarity scores: {:?}. Duration: {}ms. \
             Is this a visual BUG (flicker, glitch, rendering artifact) \
             or an intentional ANIMATION (transition, fade, slide)? \
             Explain your reasoning briefly.",
            frames_b64.len(),
            event.pattern.as_str(),
            event.scores,
            event.duration_ms,
        );

        let body = json!({
            "prompt": prompt,
            "images": frames_b64,
            "max_tokens": 300,
        });

        let response = self
            .client
            .post(&self.api_url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                match response.json::<serde_json::Value>().await {
                    Ok(data) => Some(extract_verdict(&data)),
                    Err(err) => {
                        warn!("semantic verification returned unparseable body: {err}");
                        None
                    }
                }
            }
            Ok(response) => {
                warn!("semantic verification returned status {}", response.status());
                None
            }
            Err(err) => {
                warn!("semantic verification failed: {err}");
                None
            }
        }
    }
}

fn extract_verdict(data: &serde_json::Value) -> String {
    data["analysis"]
        .as_str()
        .or_else(|| data["text"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_prefers_analysis_then_text() {
        let with_analysis = serde_json::json!({"analysis": "BUG", "text": "other"});
        assert_eq!(extract_verdict(&with_analysis), "BUG");

        let with_text = serde_json::json!({"text": "ANIMATION"});
        assert_eq!(extract_verdict(&with_text), "ANIMATION");

        let bare = serde_json::json!({"other": 1});
        assert!(extract_verdict(&bare).contains("other"));
    }
}
