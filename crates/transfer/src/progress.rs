use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Sliding-window transfer rate, safe to feed from concurrent workers.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<Sample>,
    max_samples: usize,
    window: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a calculator.
    ///
    /// - `window`: time span considered (default 5 s).
    /// - `max_samples`: retained samples cap (default 100).
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100).max(2),
                window: window.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` completed now.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    /// Records `bytes` completed at `at`.
    pub fn add_sample_at(&self, bytes: u64, at: Instant) {
        let mut s = lock(&self.inner);
        s.samples.push(Sample { bytes, at });

        let newest = s.samples.iter().map(|x| x.at).max().unwrap_or(at);
        if let Some(cutoff) = newest.checked_sub(s.window) {
            s.samples.retain(|x| x.at >= cutoff);
        }
        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average rate in bytes/second over the retained samples.
    ///
    /// Returns 0.0 with fewer than two samples or zero elapsed time.
    pub fn bytes_per_second(&self) -> f64 {
        let s = lock(&self.inner);
        let (Some(first), Some(last)) = (
            s.samples.iter().map(|x| x.at).min(),
            s.samples.iter().map(|x| x.at).max(),
        ) else {
            return 0.0;
        };
        let elapsed = last.duration_since(first);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = s.samples.iter().map(|x| x.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes`; `None` while the rate is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }

    /// Drops all samples.
    pub fn reset(&self) {
        lock(&self.inner).samples.clear();
    }
}

// Samples stay valid after a panicking writer.
fn lock(m: &Mutex<SpeedInner>) -> std::sync::MutexGuard<'_, SpeedInner> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
