use std::time::Instant;
use tracing::trace;

// No exporter in a batch run: counters and timings are `trace` events on
// `lbc.metrics`, picked up with `RUST_LOG=lbc.metrics=trace`.

pub fn count_outcome(label: &'static str) {
    trace!(target = "lbc.metrics", outcome = label, count = 1u64, "listing_outcomes_total");
}

/// Reports how long a stage ran when it goes out of scope, early returns
/// included.
#[must_use = "the timer reports when dropped"]
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            stage,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        trace!(
            target = "lbc.metrics",
            stage = self.stage,
            elapsed_ms = self.elapsed_ms(),
            "stage_duration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn timer_measures_from_start() {
        let timer = StageTimer::start("images");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
    }
}
