//! Panic recovery utilities.
//!
//! Every handler, callback, timer and work item runs inside a recovery
//! boundary: a panic is captured, logged, and converted to
//! [`Error::Fault`]. The thread (and the module loop on it) keeps serving.
//!
//! Trace capture is process-wide and opt-in via [`capture_traces`].

use crate::types::{Error, Result};
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

static TRACE_LIMIT: AtomicUsize = AtomicUsize::new(0);
static HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

thread_local! {
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Attach up to `max_bytes` of backtrace to faults raised inside a boundary.
///
/// Installs a panic hook on first use. Panics outside any boundary still go
/// to the previously installed hook. `max_bytes == 0` turns capture off
/// again without removing the hook.
pub fn capture_traces(max_bytes: usize) {
    TRACE_LIMIT.store(max_bytes, Ordering::Relaxed);
    HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(|depth| depth.get()) == 0 {
                previous(info);
                return;
            }
            let limit = TRACE_LIMIT.load(Ordering::Relaxed);
            if limit == 0 {
                return;
            }
            let trace = truncate(Backtrace::force_capture().to_string(), limit);
            LAST_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
        }));
    });
}

/// Run `operation` inside a recovery boundary.
///
/// Returns `Err(Error::Fault)` if it panicked; no logging.
pub fn catch<F, T>(operation: F) -> Result<T>
where
    F: FnOnce() -> T,
{
    BOUNDARY_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let outcome = catch_unwind(AssertUnwindSafe(operation));
    BOUNDARY_DEPTH.with(|depth| depth.set(depth.get() - 1));

    outcome.map_err(|payload| {
        let trace = LAST_TRACE.with(|slot| slot.borrow_mut().take());
        Error::fault(extract_panic_message(payload.as_ref()), trace)
    })
}

/// Execute a fallible function with panic recovery.
///
/// If the function panics, the panic is captured, logged, and converted
/// to an error.
pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch(operation) {
        Ok(result) => result,
        Err(fault) => {
            tracing::error!(
                operation = operation_name,
                trace = fault.trace().unwrap_or(""),
                "panic_recovered: {}",
                fault
            );
            Err(fault)
        }
    }
}

/// Extract panic message from panic payload.
pub(crate) fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (no message)".to_string()
    }
}

fn truncate(mut trace: String, limit: usize) -> String {
    if trace.len() > limit {
        let mut end = limit;
        while !trace.is_char_boundary(end) {
            end -= 1;
        }
        trace.truncate(end);
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[test]
    fn test_with_recovery_success() {
        let result = with_recovery(|| Ok(42), "test_operation");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_recovery_error_passes_through() {
        let result: Result<()> =
            with_recovery(|| Err(Error::validation("specific validation error")), "test_operation");
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("specific validation error"));
    }

    #[test]
    fn test_with_recovery_panic_str() {
        let result: Result<()> = with_recovery(
            || {
                panic!("test panic");
            },
            "test_operation",
        );

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.to_string(), "handler fault: test panic");
    }

    #[test]
    fn test_catch_panic_string() {
        let result = catch(|| -> u32 { panic!("{}", "dynamic panic message") });
        assert!(result.unwrap_err().to_string().contains("dynamic panic message"));
    }

    #[test]
    fn test_boundary_depth_restored_after_panic() {
        let _ = catch(|| panic!("first"));
        assert_eq!(BOUNDARY_DEPTH.with(|depth| depth.get()), 0);
        assert_eq!(catch(|| 5).unwrap(), 5);
    }

    #[test]
    fn test_capture_traces_attaches_trace() {
        capture_traces(64);
        let err = catch(|| panic!("traced")).unwrap_err();
        let trace = err.trace().expect("trace captured");
        assert!(trace.len() <= 64);
    }

    #[test]
    fn test_extract_panic_message_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(
            extract_panic_message(payload.as_ref()),
            "Unknown panic (no message)"
        );
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "ab\u{00e9}cd".to_string();
        assert_eq!(truncate(s, 3), "ab");
    }
}
