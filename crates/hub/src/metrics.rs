//! Rolling averages shown next to each sensor: last 10, last 50, all-time.

use serde::Serialize;
use std::collections::VecDeque;

const SHORT_WINDOW: usize = 10;
const LONG_WINDOW: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorMetrics {
    pub last_10_avg: Option<f64>,
    pub last_50_avg: Option<f64>,
    pub all_time_avg: Option<f64>,
    pub count: u64,
}

/// O(1) per sample: a 50-slot ring for the recent means and a running
/// sum for the all-time mean.
#[derive(Debug, Clone, Default)]
pub struct RollingMetrics {
    recent: VecDeque<f64>,
    sum: f64,
    count: u64,
}

impl RollingMetrics {
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(LONG_WINDOW),
            sum: 0.0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.recent.len() == LONG_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
        self.sum += value;
        self.count += 1;
    }

    pub fn snapshot(&self) -> SensorMetrics {
        SensorMetrics {
            last_10_avg: self.tail_mean(SHORT_WINDOW),
            last_50_avg: self.tail_mean(LONG_WINDOW),
            all_time_avg: (self.count > 0).then(|| self.sum / self.count as f64),
            count: self.count,
        }
    }

    fn tail_mean(&self, n: usize) -> Option<f64> {
        let take = n.min(self.recent.len());
        if take == 0 {
            return None;
        }
        let sum: f64 = self.recent.iter().rev().take(take).sum();
        Some(sum / take as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_has_no_means() {
        let m = RollingMetrics::new().snapshot();
        assert_eq!(m.last_10_avg, None);
        assert_eq!(m.last_50_avg, None);
        assert_eq!(m.all_time_avg, None);
        assert_eq!(m.count, 0);
    }

    #[test]
    fn fewer_than_window_uses_what_is_there() {
        let mut m = RollingMetrics::new();
        for v in [10.0, 20.0, 30.0] {
            m.push(v);
        }
        let s = m.snapshot();
        assert_eq!(s.last_10_avg, Some(20.0));
        assert_eq!(s.last_50_avg, Some(20.0));
        assert_eq!(s.all_time_avg, Some(20.0));
    }

    #[test]
    fn windows_track_recent_values() {
        let mut m = RollingMetrics::new();
        for i in 1..=100 {
            m.push(i as f64);
        }
        let s = m.snapshot();
        // 91..=100
        assert_eq!(s.last_10_avg, Some(95.5));
        // 51..=100
        assert_eq!(s.last_50_avg, Some(75.5));
        assert_eq!(s.all_time_avg, Some(50.5));
        assert_eq!(s.count, 100);
    }
}
