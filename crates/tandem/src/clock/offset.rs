use super::median::SlidingMedian;

/// Offset reported before the first round trip has been measured.
pub const DEFAULT_OFFSET_MS: f64 = 0.0;

/// Estimates `remote_clock - local_clock` from ping/pong round trips.
///
/// Each reply is assumed to have been produced halfway through its round
/// trip. The median of recent samples is used so that a few slow replies do
/// not drag the estimate around.
#[derive(Debug)]
pub struct ClockOffsetTracker {
    samples: SlidingMedian,
    offset_ms: f64,
    srtt_ms: Option<f64>,
    rtt_var_ms: f64,
    sample_count: u64,
}

impl ClockOffsetTracker {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            samples: SlidingMedian::new(window_capacity),
            offset_ms: DEFAULT_OFFSET_MS,
            srtt_ms: None,
            rtt_var_ms: 0.0,
            sample_count: 0,
        }
    }

    /// Feeds one probe exchange. All times are wall-clock milliseconds.
    /// Returns `false` if the exchange was unusable (negative or non-finite RTT).
    pub fn record_round_trip(
        &mut self,
        local_send_ms: f64,
        local_receive_ms: f64,
        remote_at_reply_ms: f64,
    ) -> bool {
        let rtt = local_receive_ms - local_send_ms;
        if !rtt.is_finite() || rtt < 0.0 {
            log::debug!(
                "Discarding round trip with RTT {} ms (sent {}, received {})",
                rtt,
                local_send_ms,
                local_receive_ms
            );
            return false;
        }

        let sample = remote_at_reply_ms + rtt / 2.0 - local_receive_ms;
        if !self.samples.push(sample) {
            return false;
        }

        self.offset_ms = self.samples.median().unwrap_or(DEFAULT_OFFSET_MS);
        self.sample_count += 1;
        self.update_rtt(rtt);
        true
    }

    fn update_rtt(&mut self, rtt: f64) {
        const ALPHA: f64 = 0.125;
        const BETA: f64 = 0.25;

        match self.srtt_ms {
            None => {
                self.srtt_ms = Some(rtt);
                self.rtt_var_ms = rtt / 2.0;
            }
            Some(srtt) => {
                let diff = (rtt - srtt).abs();
                self.rtt_var_ms = (1.0 - BETA) * self.rtt_var_ms + BETA * diff;
                self.srtt_ms = Some((1.0 - ALPHA) * srtt + ALPHA * rtt);
            }
        }
    }

    pub fn offset_ms(&self) -> f64 {
        self.offset_ms
    }

    pub fn estimated_remote_time(&self, local_now_ms: f64) -> f64 {
        local_now_ms + self.offset_ms
    }

    pub fn srtt_ms(&self) -> Option<f64> {
        self.srtt_ms
    }

    pub fn rtt_var_ms(&self) -> f64 {
        self.rtt_var_ms
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn window_len(&self) -> usize {
        self.samples.len()
    }

    pub fn reset(&mut self) {
        self.samples.reset();
        self.offset_ms = DEFAULT_OFFSET_MS;
        self.srtt_ms = None;
        self.rtt_var_ms = 0.0;
        self.sample_count = 0;
    }
}
