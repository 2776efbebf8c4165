use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VoiceConfig {
    /// Wait for Ready after a fresh join.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Wait for Ready during a reconnect attempt.
    #[serde(default = "default_reconnect_ready_timeout_ms")]
    pub reconnect_ready_timeout_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Backoff schedule indexed by attempt count, clamped to the last entry.
    #[serde(default = "default_reconnect_delays_ms")]
    pub reconnect_delays_ms: Vec<u64>,
    /// The connection is dropped after this much silence.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            reconnect_ready_timeout_ms: default_reconnect_ready_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_delays_ms: default_reconnect_delays_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

fn default_ready_timeout_ms() -> u64 {
    20000
}

fn default_reconnect_ready_timeout_ms() -> u64 {
    30000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delays_ms() -> Vec<u64> {
    vec![1000, 2000, 5000, 10000, 30000]
}

fn default_idle_timeout_ms() -> u64 {
    60000
}
