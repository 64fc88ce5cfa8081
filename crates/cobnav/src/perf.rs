// perf.rs - Timing instrumentation for cobnav
//
// Opt-in timing logs for declaration lookups and expander runs. Controlled
// via the COBNAV_PERF environment variable.
//
// Usage:
//   COBNAV_PERF=1 cobnav --stdio        # Enable basic timing logs
//   COBNAV_PERF=verbose cobnav --stdio  # Add threshold warnings

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static PERF_ENABLED: OnceLock<bool> = OnceLock::new();

static PERF_VERBOSE: OnceLock<bool> = OnceLock::new();

/// Check if performance timing is enabled
pub fn is_enabled() -> bool {
    *PERF_ENABLED.get_or_init(|| {
        std::env::var("COBNAV_PERF")
            .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
            .unwrap_or(false)
    })
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    *PERF_VERBOSE.get_or_init(|| {
        std::env::var("COBNAV_PERF")
            .map(|v| v.to_lowercase() == "verbose")
            .unwrap_or(false)
    })
}

/// RAII timing guard that logs duration on drop
///
/// ```
/// use cobnav::perf::TimingGuard;
///
/// let _guard = TimingGuard::new("goto_definition");
/// // ... do work ...
/// // Duration logged when _guard goes out of scope
/// ```
pub struct TimingGuard {
    start: Instant,
    name: &'static str,
    threshold_warn_ms: Option<u64>,
    enabled: bool,
}

impl TimingGuard {
    /// Duration will be logged at INFO level when the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: None,
            enabled: is_enabled(),
        }
    }

    /// Like [`TimingGuard::new`], warning in verbose mode when the scope
    /// takes longer than `threshold_ms`.
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            name,
            threshold_warn_ms: Some(threshold_ms),
            enabled: is_enabled(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }

        let elapsed = self.start.elapsed();
        log::info!("[PERF] {} completed in {:?}", self.name, elapsed);

        if let Some(threshold) = self.threshold_warn_ms {
            if elapsed.as_millis() > threshold as u128 && is_verbose() {
                log::warn!(
                    "[PERF] {} exceeded threshold ({}ms > {}ms)",
                    self.name,
                    elapsed.as_millis(),
                    threshold
                );
            }
        }
    }
}

/// Number of expander subprocesses spawned
static EXPANDER_RUNS: AtomicUsize = AtomicUsize::new(0);

pub fn increment_expander_runs() {
    EXPANDER_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub fn get_expander_runs() -> usize {
    EXPANDER_RUNS.load(Ordering::Relaxed)
}
