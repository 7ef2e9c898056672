use crate::status::DEFAULT_STATUS_MESSAGE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Prefix of every status line reported while blockers drain.
    pub status_message: String,
    /// Delay requested after draining a blocker, before the next tick.
    pub blocker_delay_ms: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            status_message: DEFAULT_STATUS_MESSAGE.to_string(),
            blocker_delay_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: LoopConfig = serde_json::from_str(r#"{"status_message":"Loading"}"#).unwrap();
        assert_eq!(config.status_message, "Loading");
        assert_eq!(config.blocker_delay_ms, 0.0);

        let config: LoopConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LoopConfig::default());
    }
}
