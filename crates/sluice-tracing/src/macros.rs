//! Instrumentation shorthands used across the workspace.

/// Start a [`crate::performance::PerformanceSpan`], optionally with extra
/// fields recorded on an enclosing debug span.
///
/// ```rust
/// use sluice_tracing::perf_span;
///
/// let _span = perf_span!("dispatch", elements = 1024);
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {
        $crate::performance::PerformanceSpan::new($name, None)
    };
    ($name:expr, threshold_us = $threshold:expr) => {
        $crate::performance::PerformanceSpan::new($name, Some($threshold))
    };
    ($name:expr, $($field:ident = $value:expr),+ $(,)?) => {{
        let _fields = ::tracing::debug_span!("perf_fields", name = $name, $($field = $value),+).entered();
        $crate::performance::PerformanceSpan::new($name, None)
    }};
}

/// Emit a debug event tagged with `event = $name`.
///
/// ```rust
/// use sluice_tracing::perf_event;
///
/// perf_event!("staging_skipped", space = "host", bytes = 64);
/// ```
#[macro_export]
macro_rules! perf_event {
    ($name:expr, $($field:ident = $value:expr),+ $(,)?) => {
        ::tracing::debug!(event = $name, $($field = $value),+)
    };
}

/// Evaluate a block, returning `(value, elapsed_us)` and logging the timing.
///
/// ```rust
/// use sluice_tracing::timed_block;
///
/// let (sum, _us) = timed_block!("sum", { (1..=10).sum::<u32>() });
/// assert_eq!(sum, 55);
/// ```
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $block:block) => {{
        let start = ::std::time::Instant::now();
        let result = $block;
        let duration_us = start.elapsed().as_micros() as u64;
        ::tracing::debug!(operation = $name, duration_us = duration_us, "timed_block_complete");
        (result, duration_us)
    }};
}
