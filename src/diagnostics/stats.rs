use serde::Serialize;
use std::time::{Duration, Instant};

/// Collects delivery statistics for one capture on a session's frame slot.
pub struct DeliveryStats {
    delivered_count: u32,
    rejected_count: u32,
    failed_count: u32,
    total_bytes: u64,
    armed_at: Instant,
    first_delivery: Option<Duration>,
    last_sample_time: Option<f64>,
}

/// Snapshot of delivery stats for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySnapshot {
    pub delivered_count: u32,
    pub rejected_count: u32,
    pub failed_count: u32,
    pub total_bytes: u64,
    /// Time from arming the slot to the first delivered sample.
    pub first_delivery_ms: Option<f64>,
    /// Sample time reported by the device for the last delivery, in seconds.
    pub last_sample_time: Option<f64>,
}

impl DeliveryStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            delivered_count: 0,
            rejected_count: 0,
            failed_count: 0,
            total_bytes: 0,
            armed_at: Instant::now(),
            first_delivery: None,
            last_sample_time: None,
        }
    }

    /// Record a sample copied into the buffer.
    pub fn record_delivery(&mut self, bytes: usize, sample_time: f64) {
        self.delivered_count += 1;
        self.total_bytes += bytes as u64;
        self.last_sample_time = Some(sample_time);
        if self.first_delivery.is_none() {
            self.first_delivery = Some(self.armed_at.elapsed());
        }
    }

    /// Record a sample refused before touching the buffer (null pointer).
    pub fn record_rejected(&mut self) {
        self.rejected_count += 1;
    }

    /// Record a sample lost to an allocation failure.
    pub fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    pub fn delivered_count(&self) -> u32 {
        self.delivered_count
    }

    /// Reset all counters and restart the latency clock.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            delivered_count: self.delivered_count,
            rejected_count: self.rejected_count,
            failed_count: self.failed_count,
            total_bytes: self.total_bytes,
            first_delivery_ms: self.first_delivery.map(|d| d.as_secs_f64() * 1000.0),
            last_sample_time: self.last_sample_time,
        }
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}
