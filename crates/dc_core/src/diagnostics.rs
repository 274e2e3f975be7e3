//! Injectable diagnostics sink.
//!
//! Tree builds, cache fallbacks and batch runs report through a `&dyn Diagnostics`
//! handed in by the caller, so a host application can route messages to its own
//! log window. [`LogDiagnostics`] forwards to the `log` facade.

use std::sync::Mutex;

/// Receiver for user-facing progress and warning messages.
pub trait Diagnostics: Send + Sync {
    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    /// Called after each finished unit of a long-running job.
    fn progress(&self, _done: usize, _total: usize) {}
}

/// Forwards every message to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn info(&self, message: &str) {
        log::info!("{message}");
    }

    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }

    fn progress(&self, done: usize, total: usize) {
        log::debug!("progress {done}/{total}");
    }
}

/// Keeps every message in memory, for hosts that display them later.
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    messages: Mutex<Vec<String>>,
    last_progress: Mutex<Option<(usize, usize)>>,
}

impl CollectedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far, warnings prefixed with `warning: `.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn last_progress(&self) -> Option<(usize, usize)> {
        self.last_progress.lock().ok().and_then(|p| *p)
    }

    fn push(&self, message: String) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

impl Diagnostics for CollectedDiagnostics {
    fn info(&self, message: &str) {
        self.push(message.to_string());
    }

    fn warn(&self, message: &str) {
        self.push(format!("warning: {message}"));
    }

    fn progress(&self, done: usize, total: usize) {
        if let Ok(mut last) = self.last_progress.lock() {
            *last = Some((done, total));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collected_diagnostics() {
        let diagnostics = CollectedDiagnostics::new();
        let sink: &dyn Diagnostics = &diagnostics;
        sink.info("building tree");
        sink.warn("cache missing");
        sink.progress(3, 10);

        assert_eq!(
            diagnostics.messages(),
            vec!["building tree".to_string(), "warning: cache missing".to_string()]
        );
        assert_eq!(diagnostics.last_progress(), Some((3, 10)));
    }

    #[test]
    fn test_log_diagnostics_is_object_safe() {
        let _ = env_logger::builder().is_test(true).try_init();
        let sink: Box<dyn Diagnostics> = Box::new(LogDiagnostics);
        sink.info("hello");
        sink.progress(1, 1);
    }

    #[test]
    fn test_progress_defaults_to_nothing() {
        struct Quiet;
        impl Diagnostics for Quiet {
            fn info(&self, _message: &str) {}
            fn warn(&self, _message: &str) {}
        }
        let sink: &dyn Diagnostics = &Quiet;
        sink.progress(5, 10);
    }
}
