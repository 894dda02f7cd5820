use std::time::Instant;

/// Per-run accounting: tokens produced, per-fragment time reported by the
/// backend, and the wall-clock start of the run.
///
/// Rates never divide by zero: a zero (or negative) span yields `0.0`.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    start: Instant,
    token_count: usize,
    accumulated_seconds: f64,
    frozen_rate: Option<f64>,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::start()
    }
}

impl RunMetrics {
    /// Begin a run now.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            token_count: 0,
            accumulated_seconds: 0.0,
            frozen_rate: None,
        }
    }

    /// Restart the clock and zero all counters.
    pub fn reset(&mut self) {
        *self = Self::start();
    }

    /// Count one fragment that took `elapsed` seconds to produce.
    pub fn record(&mut self, elapsed: f64) {
        self.token_count += 1;
        if elapsed.is_finite() && elapsed > 0.0 {
            self.accumulated_seconds += elapsed;
        }
    }

    /// Zero the token counter without touching the clock or the frozen rate.
    pub fn clear_tokens(&mut self) {
        self.token_count = 0;
    }

    #[inline]
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    #[inline]
    pub fn accumulated_seconds(&self) -> f64 {
        self.accumulated_seconds
    }

    /// Streaming rate from the backend-reported fragment times.
    pub fn tokens_per_second(&self) -> f64 {
        rate(self.token_count, self.accumulated_seconds)
    }

    /// Seconds since the run started.
    pub fn elapsed_wall_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Tokens so far divided by an externally measured span.
    pub fn rate_over(&self, seconds: f64) -> f64 {
        rate(self.token_count, seconds)
    }

    /// Remember the rate reported at an explicit stop. A frozen rate takes
    /// precedence over any later recomputation in the same run.
    pub fn freeze(&mut self, rate: f64) {
        self.frozen_rate = Some(rate);
    }

    #[inline]
    pub fn frozen_rate(&self) -> Option<f64> {
        self.frozen_rate
    }
}

#[inline]
pub fn rate(tokens: usize, seconds: f64) -> f64 {
    if seconds > 0.0 && seconds.is_finite() {
        tokens as f64 / seconds
    } else {
        0.0
    }
}
