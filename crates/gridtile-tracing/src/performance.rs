//! Timing guards for planning and reservation hot paths.
//!
//! ```rust
//! use gridtile_tracing::performance::PerformanceSpan;
//!
//! let span = PerformanceSpan::new("plan_matmul", Some(50));
//! // ... search ...
//! drop(span); // reported only when it took at least 50us
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::Level;

/// `u64::MAX` stands for "no threshold".
const NO_THRESHOLD: u64 = u64::MAX;

static PERFORMANCE_TRACING: AtomicBool = AtomicBool::new(true);
static DEFAULT_THRESHOLD_US: AtomicU64 = AtomicU64::new(NO_THRESHOLD);

/// Process-wide switch and default threshold for performance spans.
///
/// [`crate::init_global_tracing`] applies the values from its
/// [`crate::TracingConfig`]; until then spans report unconditionally.
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    PERFORMANCE_TRACING.store(enabled, Ordering::Relaxed);
    DEFAULT_THRESHOLD_US.store(threshold_us.unwrap_or(NO_THRESHOLD), Ordering::Relaxed);
}

pub fn performance_tracing_enabled() -> bool {
    PERFORMANCE_TRACING.load(Ordering::Relaxed)
}

/// Threshold used by [`PerformanceSpan::configured`] and `perf_span!`.
pub fn default_threshold_us() -> Option<u64> {
    match DEFAULT_THRESHOLD_US.load(Ordering::Relaxed) {
        NO_THRESHOLD => None,
        threshold => Some(threshold),
    }
}

/// RAII guard that times a region and reports it on drop.
///
/// Nothing is reported while performance tracing is switched off.
pub struct PerformanceSpan {
    enabled: bool,
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Debug-level span; `threshold_us = None` always reports.
    pub fn new(span_name: impl AsRef<str>, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, span_name, threshold_us)
    }

    /// Debug-level span using the configured default threshold.
    pub fn configured(span_name: impl AsRef<str>) -> Self {
        Self::new(span_name, default_threshold_us())
    }

    /// Span at an explicit level.
    pub fn with_level(level: Level, span_name: impl AsRef<str>, threshold_us: Option<u64>) -> Self {
        let name = span_name.as_ref();
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %name),
            Level::DEBUG => tracing::debug_span!("perf", name = %name),
            Level::INFO => tracing::info_span!("perf", name = %name),
            Level::WARN => tracing::warn_span!("perf", name = %name),
            Level::ERROR => tracing::error_span!("perf", name = %name),
        };

        Self {
            enabled: performance_tracing_enabled(),
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    /// Whether a region lasting `elapsed_us` gets reported on drop.
    pub fn reports(&self, elapsed_us: u64) -> bool {
        self.enabled && self.threshold_us.map_or(true, |threshold| elapsed_us >= threshold)
    }

    /// Enter the span so nested events are attributed to it.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.reports(elapsed_us) {
            let _entered = self.span.enter();
            tracing::debug!(duration_us = elapsed_us, "performance_span_complete");
        }
    }
}

/// Record a circular-buffer reservation.
pub fn record_reservation(slot: u8, size_bytes: u32, address: u32, num_cores: usize) {
    tracing::debug!(
        slot = slot,
        size_bytes = size_bytes,
        address = address,
        num_cores = num_cores,
        total_bytes = size_bytes as u64 * num_cores as u64,
        "circular_buffer_reserved"
    );
}

/// Record a planner outcome.
pub fn record_plan(operation: &str, num_cores: usize, duration_us: u64) {
    tracing::debug!(
        operation = operation,
        num_cores = num_cores,
        duration_us = duration_us,
        "program_planned"
    );
}

/// Serializes tests that touch the process-wide settings.
#[cfg(test)]
pub(crate) static SETTINGS_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
