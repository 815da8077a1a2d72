//! A single process-wide pluggable log handler slot.
//!
//! The core itself always logs through `tracing`, the way the teacher
//! instruments `frame.rs`/`codec.rs` with `#[tracing::instrument]` and
//! `tracing::warn!`. This module adds a handler-registration surface on
//! top, for embedders that want to route Epoxy's events through
//! something other than a `tracing` subscriber. With no handler
//! installed, `log` is a no-op beyond the `tracing` emission.

use std::sync::{Mutex, OnceLock};

/// Severity ordering is `Debug < Information < Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Information,
    Warning,
    Error,
    Fatal,
}

/// A single function-typed log handler.
pub type LogHandler = Box<dyn Fn(Severity, &str) + Send + Sync + 'static>;

fn slot() -> &'static Mutex<Option<LogHandler>> {
    static SLOT: OnceLock<Mutex<Option<LogHandler>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// Install the process-wide handler. Fails with `InvalidOperation` if a
/// handler is already registered.
pub fn set_handler(handler: LogHandler) -> crate::error::Result<()> {
    let mut guard = slot().lock().unwrap();
    if guard.is_some() {
        return Err(crate::error::Error::invalid_operation(
            "a log handler is already registered",
        ));
    }
    *guard = Some(handler);
    Ok(())
}

/// Remove the process-wide handler, if any. Idempotent.
pub fn remove_handler() {
    *slot().lock().unwrap() = None;
}

/// Emit an event through `tracing` and, if one is registered, through
/// the embedder's handler. A handler's own panic is caught and
/// suppressed: logging must never crash the transport.
pub fn log(severity: Severity, message: &str) {
    match severity {
        Severity::Debug => tracing::debug!("{message}"),
        Severity::Information => tracing::info!("{message}"),
        Severity::Warning => tracing::warn!("{message}"),
        Severity::Error | Severity::Fatal => tracing::error!("{message}"),
    }

    let guard = slot().lock().unwrap();
    if let Some(handler) = guard.as_ref() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler(severity, message);
        }));
        if result.is_err() {
            tracing::warn!("registered log handler panicked; suppressing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // These tests share the process-wide slot, so they run serially via
    // a single test that exercises the full sequence rather than
    // relying on `cargo test`'s parallelism to not interleave them.
    #[test]
    fn handler_lifecycle() {
        remove_handler();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        set_handler(Box::new(move |_sev, _msg| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        log(Severity::Information, "hello");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = set_handler(Box::new(|_sev, _msg| {}));
        assert!(matches!(
            second,
            Err(crate::error::Error::InvalidOperation(_))
        ));

        remove_handler();
        log(Severity::Warning, "no handler now");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Debug < Severity::Information);
        assert!(Severity::Information < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }
}
