//! Per-provider request and retry statistics

use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Requests that needed at least one retry before resolving
    pub retried_requests: u64,
    /// Individual retry attempts across all requests
    pub total_retries: u64,
    /// Requests rejected by an open circuit without reaching the adapter
    pub circuit_rejections: u64,
    /// Total time spent sleeping between attempts
    pub accumulated_delay: Duration,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    pub fn average_retry_delay(&self) -> Duration {
        if self.total_retries == 0 {
            return Duration::ZERO;
        }
        self.accumulated_delay / self.total_retries as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut stats = RetryStats::default();
        assert_eq!(stats.success_rate(), 0.0);

        stats.total_requests = 4;
        stats.successful_requests = 3;
        assert!((stats.success_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_average_retry_delay() {
        let mut stats = RetryStats::default();
        assert_eq!(stats.average_retry_delay(), Duration::ZERO);

        stats.total_retries = 2;
        stats.accumulated_delay = Duration::from_secs(3);
        assert_eq!(stats.average_retry_delay(), Duration::from_millis(1500));
    }
}
