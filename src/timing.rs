//! Build timing utilities.

use std::time::{Duration, Instant};

use tracing::info;

/// Measures one build phase and reports it through `tracing`.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    /// Start a new timer with the given phase name.
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish the timer and log the elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        let secs = elapsed.as_secs_f64();
        if secs >= 60.0 {
            info!(phase = %self.name, "done in {:.1}m", secs / 60.0);
        } else {
            info!(phase = %self.name, "done in {:.1}s", secs);
        }
        elapsed
    }
}
