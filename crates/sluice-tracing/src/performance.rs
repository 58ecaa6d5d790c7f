//! Timing spans and standard events for allocation, transfer and dispatch.
//!
//! ```rust
//! use sluice_tracing::performance::{record_transfer, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("stage_inputs", Some(100));
//! record_transfer("host", "discrete", 4096, 12);
//! drop(span);
//! ```

use std::fmt;
use std::time::Instant;

use tracing::Level;

/// RAII timer. Logs `performance_span_complete` on drop when the elapsed
/// time reaches the threshold (or always, without one).
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Debug-level span named `span_name`.
    pub fn new(span_name: &str, threshold_us: Option<u64>) -> Self {
        Self::with_level(Level::DEBUG, span_name, threshold_us)
    }

    pub fn with_level(level: Level, span_name: &str, threshold_us: Option<u64>) -> Self {
        let span = match level {
            Level::TRACE => tracing::trace_span!("perf", name = %span_name),
            Level::DEBUG => tracing::debug_span!("perf", name = %span_name),
            Level::INFO => tracing::info_span!("perf", name = %span_name),
            Level::WARN => tracing::warn_span!("perf", name = %span_name),
            Level::ERROR => tracing::error_span!("perf", name = %span_name),
        };

        Self {
            threshold_us,
            start_time: Instant::now(),
            span,
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    fn should_log(&self, elapsed_us: u64) -> bool {
        self.threshold_us.is_none_or(|t| elapsed_us >= t)
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.should_log(elapsed_us) {
            let _entered = self.span.enter();
            tracing::debug!(
                duration_us = elapsed_us,
                duration_ms = elapsed_us as f64 / 1000.0,
                "performance_span_complete"
            );
        }
    }
}

/// Bytes per second, 0 when no time elapsed.
pub fn bandwidth_bytes_per_sec(bytes: usize, duration_us: u64) -> f64 {
    if duration_us == 0 {
        0.0
    } else {
        bytes as f64 / (duration_us as f64 / 1_000_000.0)
    }
}

/// A memory manager allocated `size_bytes` in `space`.
pub fn record_allocation(space: impl fmt::Display, size_bytes: usize, duration_us: u64) {
    tracing::debug!(
        event = "allocation",
        space = %space,
        size_bytes = size_bytes,
        size_kb = size_bytes as f64 / 1024.0,
        duration_us = duration_us,
        "memory_allocation"
    );
}

/// A buffer copy moved `bytes` from one memory space to another.
pub fn record_transfer(from: impl fmt::Display, to: impl fmt::Display, bytes: usize, duration_us: u64) {
    let bandwidth_mb_s = bandwidth_bytes_per_sec(bytes, duration_us) / 1_000_000.0;
    tracing::debug!(
        event = "transfer",
        from = %from,
        to = %to,
        bytes = bytes,
        duration_us = duration_us,
        bandwidth_mb_s = bandwidth_mb_s,
        "memory_transfer"
    );
}

/// A worklet or algorithm ran over `elements` indices on `device`.
pub fn record_dispatch(device: impl fmt::Display, elements: usize, duration_us: u64) {
    let elements_per_sec = if duration_us > 0 {
        (elements as f64 / duration_us as f64) * 1_000_000.0
    } else {
        0.0
    };
    tracing::debug!(
        event = "dispatch",
        device = %device,
        elements = elements,
        duration_us = duration_us,
        elements_per_sec = elements_per_sec,
        "dispatch_complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn span_measures_elapsed_time() {
        let span = PerformanceSpan::new("sleep", None);
        thread::sleep(Duration::from_millis(5));
        assert!(span.elapsed_us() >= 5_000);
    }

    #[test]
    fn threshold_controls_logging() {
        let span = PerformanceSpan::new("quick", Some(1_000_000));
        assert!(!span.should_log(10));
        assert!(span.should_log(1_000_000));

        let always = PerformanceSpan::with_level(Level::INFO, "always", None);
        assert!(always.should_log(0));
    }

    #[test]
    fn bandwidth_handles_zero_duration() {
        assert_eq!(bandwidth_bytes_per_sec(4096, 0), 0.0);
        assert_eq!(bandwidth_bytes_per_sec(1_000_000, 1_000_000), 1_000_000.0);
    }

    #[test]
    fn recorders_accept_display_labels() {
        record_allocation("host", 1024, 3);
        record_transfer("host", "discrete", 4096, 0);
        record_dispatch("threaded", 1 << 20, 250);
    }
}
