//! Client-side clock synchronization
//!
//! PING/PONG probes estimate round-trip time and the offset between the
//! local wall clock and the server's, so input timestamps are expressed in
//! server time.

use std::collections::VecDeque;
use std::time::Duration;

/// EWMA-smoothed RTT and clock offset
#[derive(Debug, Clone)]
pub struct ClockSync {
    /// Recent RTT samples (ms)
    samples: VecDeque<f64>,
    max_samples: usize,
    /// EWMA smoothing factor
    alpha: f64,
    probe_interval: Duration,

    rtt_ms: Option<f64>,
    /// server_time - local_time (ms)
    offset_ms: f64,
    last_probe_ms: Option<u64>,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 0.125)
    }
}

impl ClockSync {
    pub fn new(probe_interval: Duration, alpha: f64) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: 16,
            alpha: alpha.clamp(0.0, 1.0),
            probe_interval,
            rtt_ms: None,
            offset_ms: 0.0,
            last_probe_ms: None,
        }
    }

    /// Coarse offset from the JOINED server time, before any probe returns
    pub fn seed(&mut self, server_time_ms: u64, local_now_ms: u64) {
        if self.rtt_ms.is_none() {
            self.offset_ms = server_time_ms as f64 - local_now_ms as f64;
        }
    }

    pub fn should_probe(&self, local_now_ms: u64) -> bool {
        match self.last_probe_ms {
            None => true,
            Some(last) => local_now_ms.saturating_sub(last) >= self.probe_interval.as_millis() as u64,
        }
    }

    /// Mark a probe as sent; returns the client time to put in the PING
    pub fn ping(&mut self, local_now_ms: u64) -> u64 {
        self.last_probe_ms = Some(local_now_ms);
        local_now_ms
    }

    /// Fold a PONG into the estimates
    pub fn on_pong(&mut self, client_time_ms: u64, server_time_ms: u64, local_now_ms: u64) {
        if local_now_ms < client_time_ms {
            return;
        }
        let rtt = (local_now_ms - client_time_ms) as f64;

        self.samples.push_back(rtt);
        if self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }

        // Server stamped the pong roughly half an RTT before we received it
        let offset = server_time_ms as f64 + rtt / 2.0 - local_now_ms as f64;

        match self.rtt_ms {
            None => {
                self.rtt_ms = Some(rtt);
                self.offset_ms = offset;
            }
            Some(prev) => {
                self.rtt_ms = Some(self.alpha * rtt + (1.0 - self.alpha) * prev);
                self.offset_ms = self.alpha * offset + (1.0 - self.alpha) * self.offset_ms;
            }
        }
    }

    /// Estimated server time for a local wall-clock reading
    pub fn server_time(&self, local_now_ms: u64) -> u64 {
        (local_now_ms as f64 + self.offset_ms).max(0.0).round() as u64
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt_ms
    }

    /// One-way latency estimate
    pub fn latency_ms(&self) -> Option<f64> {
        self.rtt_ms.map(|rtt| rtt / 2.0)
    }

    pub fn median_rtt_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(sorted[sorted.len() / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pong_sets_rtt_and_offset() {
        let mut clock = ClockSync::default();
        let sent = clock.ping(1_000);
        // Server is 5000ms ahead, 100ms round trip
        clock.on_pong(sent, 6_050, 1_100);

        assert_eq!(clock.rtt_ms(), Some(100.0));
        assert_eq!(clock.latency_ms(), Some(50.0));
        assert_eq!(clock.server_time(2_000), 7_000);
    }

    #[test]
    fn rtt_is_smoothed() {
        let mut clock = ClockSync::default();
        clock.on_pong(0, 50, 100);
        clock.on_pong(1_000, 1_050, 1_300);

        let rtt = clock.rtt_ms().unwrap();
        assert!((rtt - 125.0).abs() < 1e-9, "rtt = {rtt}");
        assert_eq!(clock.median_rtt_ms(), Some(300.0));
    }

    #[test]
    fn probes_are_spaced_by_interval() {
        let mut clock = ClockSync::default();
        assert!(clock.should_probe(0));
        clock.ping(0);
        assert!(!clock.should_probe(999));
        assert!(clock.should_probe(1_000));
    }

    #[test]
    fn seed_only_applies_before_first_pong() {
        let mut clock = ClockSync::default();
        clock.seed(10_000, 1_000);
        assert_eq!(clock.server_time(1_000), 10_000);

        clock.on_pong(1_000, 10_010, 1_020);
        clock.seed(0, 1_000);
        assert_eq!(clock.server_time(1_020), 10_020);
    }
}
