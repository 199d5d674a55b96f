#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub offset_ms: f64,
    pub srtt_ms: f64,
    pub rtt_variance_ms: f64,
    pub offset_samples: u64,
    pub unverified_updates: usize,
    pub pending_actions: usize,
    pub roster_size: usize,
    pub ticks: u64,
    pub confirmations: u64,
    pub supersessions: u64,
    pub send_failures: u64,
}
