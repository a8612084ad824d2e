//! Diagnostic reporting.
//!
//! Structural oddities that do not abort an operation (unknown labels,
//! dangling weak references, misplaced primers) are reported through a
//! [`DiagnosticSink`] passed into the partition and cursor APIs, so
//! callers and tests can observe them without scraping log output.

/// Receiver for non-fatal diagnostics raised during parse or write.
pub trait DiagnosticSink {
    /// Report a recoverable structural oddity.
    fn warning(&mut self, message: String);

    /// Report a failure that the caller will also see as an error value.
    fn error(&mut self, message: String);
}

/// Sink that forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn warning(&mut self, message: String) {
        log::warn!("{}", message);
    }

    fn error(&mut self, message: String) {
        log::error!("{}", message);
    }
}

/// Sink that collects diagnostics for inspection.
#[derive(Debug, Default)]
pub struct CollectSink {
    /// Warnings in emission order.
    pub warnings: Vec<String>,
    /// Errors in emission order.
    pub errors: Vec<String>,
}

impl CollectSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticSink for CollectSink {
    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn error(&mut self, message: String) {
        self.errors.push(message);
    }
}
