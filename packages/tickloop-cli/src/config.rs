use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tickloop_scheduler::manual::DEFAULT_REFRESH_INTERVAL_MS;
use tickloop_scheduler::{LoopConfig, Timing};

/// Everything the demo runner needs; loaded from JSON, then overridden by flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    #[serde(rename = "loop")]
    pub loop_config: LoopConfig,
    pub timing: Timing,
    /// Frames to run before the payload exits the loop.
    pub frames: u32,
    pub blockers: u32,
    pub uncounted_blockers: u32,
    pub blocker_cost_ms: f64,
    pub frame_cost_ms: f64,
    pub refresh_interval_ms: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            loop_config: LoopConfig::default(),
            timing: Timing::default(),
            frames: 60,
            blockers: 3,
            uncounted_blockers: 1,
            blocker_cost_ms: 20.0,
            frame_cost_ms: 2.0,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
        }
    }
}

impl DemoConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickloop_scheduler::TimingMode;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: DemoConfig = serde_json::from_str(
            r#"{
                "loop": { "status_message": "Booting" },
                "timing": { "mode": "fixed_delay", "value": 33 },
                "frames": 10
            }"#,
        )
        .unwrap();

        assert_eq!(config.loop_config.status_message, "Booting");
        assert_eq!(config.timing.mode, TimingMode::FixedDelay);
        assert_eq!(config.timing.value, 33.0);
        assert_eq!(config.frames, 10);
        assert_eq!(config.blockers, DemoConfig::default().blockers);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = DemoConfig::load(Some(Path::new("/nonexistent/tickloop.json"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
