use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_clients: usize,
    pub client_timeout_secs: f32,
    pub sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            client_timeout_secs: 5.0,
            sweep_interval_ms: 500,
        }
    }
}

impl ServerConfig {
    pub fn client_timeout(&self) -> Duration {
        Duration::try_from_secs_f32(self.client_timeout_secs.max(0.0))
            .unwrap_or(Duration::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
