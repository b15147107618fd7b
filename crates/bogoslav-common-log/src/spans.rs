//! Span helpers shared by the engine and the CLI.

use tracing::{info_span, Span};

/// Span covering the handling of one watched file.
pub fn file_span(path: &std::path::Path) -> Span {
    info_span!("file", path = %path.display())
}

/// Span covering one model request for a directive.
pub fn request_span(request: &str, directive: &str) -> Span {
    info_span!("request", id = %request, directive = %directive)
}

/// Timing utility for operations.
pub struct Timer {
    start: std::time::Instant,
    operation: &'static str,
}

impl Timer {
    /// Start a new timer.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Complete the timer and record duration.
    pub fn finish(self) {
        tracing::debug!(
            operation = %self.operation,
            duration_ms = %self.start.elapsed().as_millis(),
            "operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_finish_does_not_panic_without_subscriber() {
        let timer = Timer::start("parse");
        timer.finish();
    }

    #[test]
    fn test_spans_can_be_entered() {
        let span = request_span("req_1", "dir_1");
        let _guard = span.enter();
        let inner = file_span(std::path::Path::new("notes.md"));
        let _inner = inner.enter();
    }
}
