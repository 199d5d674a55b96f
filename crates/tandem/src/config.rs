use std::time::Duration;

use crate::clock::DEFAULT_WINDOW_CAPACITY;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bind_addr: String,
    pub prediction_rate: u32,
    pub probe_rate: u32,
    pub offset_window: usize,
    pub connection_timeout_secs: f32,
    pub liveness_check_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".to_string(),
            prediction_rate: 20,
            probe_rate: 100,
            offset_window: DEFAULT_WINDOW_CAPACITY,
            connection_timeout_secs: 5.0,
            liveness_check_ms: 250,
        }
    }
}

impl SessionConfig {
    pub fn prediction_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.prediction_rate.max(1) as f64)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.probe_rate.max(1) as f64)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.connection_timeout_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms.max(1))
    }
}
