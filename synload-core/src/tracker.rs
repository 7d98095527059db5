//! Rolling latency percentile over a trailing time window
//!
//! [`LatencyWindowTracker`] keeps the samples of the last window in a bounded
//! ring and, once per window, writes the configured percentile of those
//! samples to a file. The file always holds the latest value as plain text, so
//! an external controller can poll it.
//!
//! The tracker is driven entirely by incoming samples: with no traffic, nothing
//! is evicted and nothing is written.

use crate::config::TrackerConfig;
use crate::timing::wall_clock_ms;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use synload_common::BoundedQueue;

/// One latency sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub latency_ns: u64,
    /// Wall-clock milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

/// Sliding-window percentile tracker with a file sink
pub struct LatencyWindowTracker {
    percentile: f64,
    window_ms: u64,
    output: PathBuf,
    samples: BoundedQueue<Measurement>,
    /// None until the first sample arrives
    last_flush_ms: Option<u64>,
    current: Option<u64>,
    /// Reused sort buffer
    sorted: Vec<u64>,
}

impl LatencyWindowTracker {
    /// Tracker with the default 100ms window and 200000-sample capacity
    pub fn new(percentile: f64, output: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(TrackerConfig::new(percentile, output))
    }

    pub fn with_config(config: TrackerConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.percentile) {
            return Err(Error::InvalidPercentile(config.percentile));
        }
        let window_ms = config.window.as_millis() as u64;
        if window_ms == 0 {
            return Err(Error::Config("Tracker window must be at least 1ms".to_string()));
        }
        if config.capacity == 0 {
            return Err(Error::Config("Tracker capacity must be > 0".to_string()));
        }

        Ok(Self {
            percentile: config.percentile,
            window_ms,
            output: config.output,
            samples: BoundedQueue::new(config.capacity),
            last_flush_ms: None,
            current: None,
            sorted: Vec::new(),
        })
    }

    /// Record a latency observed now
    pub fn add_measurement(&mut self, latency_ns: u64) -> Result<()> {
        self.add_measurement_at(latency_ns, wall_clock_ms())
    }

    /// Record a latency observed at `now_ms`
    ///
    /// Samples older than one window are evicted first. The first sample only
    /// starts the flush clock; after that, the percentile is recomputed and
    /// written whenever a full window has passed since the last write.
    pub fn add_measurement_at(&mut self, latency_ns: u64, now_ms: u64) -> Result<()> {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(oldest) = self.samples.front() {
            if oldest.timestamp_ms >= cutoff {
                break;
            }
            self.samples.pop()?;
        }

        self.samples.push(Measurement { latency_ns, timestamp_ms: now_ms })?;

        match self.last_flush_ms {
            None => self.last_flush_ms = Some(now_ms),
            Some(last) if now_ms >= last.saturating_add(self.window_ms) => {
                self.flush(now_ms)?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn flush(&mut self, now_ms: u64) -> Result<()> {
        let value = self.compute_percentile()?;
        std::fs::write(&self.output, value.to_string())?;

        tracing::debug!(
            "Wrote p{} = {} ns over {} samples to {} at {}",
            self.percentile * 100.0,
            value,
            self.samples.len(),
            self.output.display(),
            now_ms
        );
        self.current = Some(value);
        self.last_flush_ms = Some(now_ms);
        Ok(())
    }

    /// Nearest-rank percentile of the retained samples: sorted index `floor(p * n)`
    ///
    /// For `p = 1.0` the index is one past the last sample, which is reported
    /// as [`Error::PercentileOutOfRange`].
    pub fn compute_percentile(&mut self) -> Result<u64> {
        self.sorted.clear();
        self.sorted.extend(self.samples.iter().map(|m| m.latency_ns));
        self.sorted.sort_unstable();

        let n = self.sorted.len();
        let index = (self.percentile * n as f64).floor() as usize;
        self.sorted
            .get(index)
            .copied()
            .ok_or(Error::PercentileOutOfRange { percentile: self.percentile, samples: n })
    }

    /// Value written by the last flush
    pub fn current_percentile(&self) -> Option<u64> {
        self.current
    }

    pub fn last_flush_ms(&self) -> Option<u64> {
        self.last_flush_ms
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}
