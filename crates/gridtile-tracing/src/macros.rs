//! Convenience macros over [`crate::performance`].

/// Start a [`crate::performance::PerformanceSpan`] with the configured
/// threshold, optionally with fields.
///
/// ```rust
/// use gridtile_tracing::perf_span;
///
/// {
///     let _span = perf_span!("reserve", slot = 16, cores = 64);
/// }
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {{
        $crate::performance::PerformanceSpan::configured($name)
    }};
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {{
        if $crate::performance::performance_tracing_enabled() {
            $crate::debug!(span = $name, $($field = $value),+, "perf_span_start");
        }
        $crate::performance::PerformanceSpan::configured($name)
    }};
}

/// Emit a debug event tagged with an event name.
///
/// ```rust
/// use gridtile_tracing::perf_event;
///
/// perf_event!("subblock_selected", rows = 4, cols = 2);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:tt = $value:expr),+ $(,)?) => {
        $crate::debug!(event = $name, $($field = $value),+);
    };
}

/// Time a block, returning `(result, duration_us)`.
///
/// ```rust
/// use gridtile_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<u32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        $crate::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
