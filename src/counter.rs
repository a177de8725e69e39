//! Per-connection throughput bookkeeping.
//!
//! Used by piece selection (rarity + slow-connection tie-break, spec.md
//! §4.3.5), preemption (§4.3.6, "throughput falls under a floor") and
//! capacity eviction scoring (§4.3.7, "score = downloaded-bytes-per-second
//! x rarity-contribution").

use std::time::{Duration, Instant};

use crate::avg::SlidingAvg;

/// Tracks bytes transferred and a short moving-average rate estimate for one
/// connection.
#[derive(Debug)]
pub struct ThruputCounters {
    downloaded: u64,
    uploaded: u64,
    download_rate: SlidingAvg,
    upload_rate: SlidingAvg,
    last_sample: Instant,
}

impl ThruputCounters {
    pub fn new() -> Self {
        ThruputCounters {
            downloaded: 0,
            uploaded: 0,
            download_rate: SlidingAvg::default(),
            upload_rate: SlidingAvg::default(),
            last_sample: Instant::now(),
        }
    }

    /// Registers `n` downloaded bytes since the last sample and folds the
    /// implied rate (bytes/sec) into the moving average.
    pub fn record_download(&mut self, n: u64) {
        self.downloaded += n;
        self.fold_rate(n, true);
    }

    /// Registers `n` uploaded (served) bytes since the last sample.
    pub fn record_upload(&mut self, n: u64) {
        self.uploaded += n;
        self.fold_rate(n, false);
    }

    fn fold_rate(&mut self, n: u64, is_download: bool) {
        let elapsed = self.last_sample.elapsed();
        self.last_sample = Instant::now();
        let secs = elapsed.as_secs_f64().max(0.001);
        let rate = (n as f64 / secs) as i64;
        if is_download {
            self.download_rate.update(rate);
        } else {
            self.upload_rate.update(rate);
        }
    }

    pub fn total_downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn total_uploaded(&self) -> u64 {
        self.uploaded
    }

    /// Smoothed download rate, bytes/sec.
    pub fn download_rate(&self) -> i64 {
        self.download_rate.mean()
    }

    /// Smoothed upload rate, bytes/sec.
    pub fn upload_rate(&self) -> i64 {
        self.upload_rate.mean()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_sample.elapsed()
    }
}

impl Default for ThruputCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_totals() {
        let mut c = ThruputCounters::new();
        c.record_download(100);
        c.record_download(200);
        assert_eq!(c.total_downloaded(), 300);
        assert_eq!(c.total_uploaded(), 0);
    }

    #[test]
    fn rate_is_nonnegative_after_samples() {
        let mut c = ThruputCounters::new();
        c.record_upload(1024);
        assert!(c.upload_rate() >= 0);
    }
}
