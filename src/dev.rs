//! Advisory diagnostics - the "currently processing" hook.
//!
//! While a queue is being folded, a thread-local marker records its
//! identity. If the enqueue path then targets that same queue - meaning a
//! reducer scheduled more work on the very node it is computing state for -
//! a warning goes to the registered sink. Purely advisory; it has no
//! bearing on correctness and is a no-op when no sink is registered.
//!
//! # Example
//!
//! ```ignore
//! use spark_updates::dev;
//!
//! let cleanup = dev::set_diagnostic_sink(|message| eprintln!("warn: {message}"));
//! // ... run renders ...
//! cleanup();
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::queue::QueueRef;
use crate::types::NodeTag;

thread_local! {
    /// Identity of the queue being folded, if any.
    static CURRENTLY_PROCESSING: Cell<Option<*const ()>> = const { Cell::new(None) };

    /// Where warnings go. No sink, no warning.
    static DIAGNOSTIC_SINK: RefCell<Option<Box<dyn Fn(&str)>>> = RefCell::new(None);
}

// =============================================================================
// Diagnostic sink
// =============================================================================

/// Register a sink for advisory warnings.
/// Returns a cleanup function to unregister.
pub fn set_diagnostic_sink(sink: impl Fn(&str) + 'static) -> impl FnOnce() {
    DIAGNOSTIC_SINK.with(|slot| {
        *slot.borrow_mut() = Some(Box::new(sink));
    });
    || {
        DIAGNOSTIC_SINK.with(|slot| {
            *slot.borrow_mut() = None;
        });
    }
}

/// Reset all diagnostic state (for testing).
pub fn reset_diagnostics() {
    CURRENTLY_PROCESSING.with(|slot| slot.set(None));
    DIAGNOSTIC_SINK.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

// =============================================================================
// Currently-processing marker
// =============================================================================

/// Marks a queue as "being folded" for the duration of a processing pass.
///
/// Dropping the guard restores the previous marker on every exit path,
/// including reducer errors.
pub(crate) struct ProcessingGuard {
    previous: Option<*const ()>,
}

pub(crate) fn begin_processing<I>(queue: &QueueRef<I>) -> ProcessingGuard {
    let previous =
        CURRENTLY_PROCESSING.with(|slot| slot.replace(Some(queue_identity(queue))));
    ProcessingGuard { previous }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        CURRENTLY_PROCESSING.with(|slot| slot.set(self.previous));
    }
}

/// Warn when a stateful node schedules more work on the queue that is being
/// folded right now. Called by the enqueue path with both sides' headers.
pub(crate) fn warn_on_reentrant_enqueue<I>(
    tag: NodeTag,
    queue1: &QueueRef<I>,
    queue2: Option<&QueueRef<I>>,
) {
    if tag != NodeTag::Stateful {
        return;
    }
    let Some(processing) = CURRENTLY_PROCESSING.with(|slot| slot.get()) else {
        return;
    };
    let hit = queue_identity(queue1) == processing
        || queue2.is_some_and(|queue| queue_identity(queue) == processing);
    if hit {
        DIAGNOSTIC_SINK.with(|slot| {
            if let Some(sink) = &*slot.borrow() {
                sink(
                    "an update was scheduled from inside a state reducer; \
                     reducers must be pure functions of previous state and props",
                );
            }
        });
    }
}

fn queue_identity<I>(queue: &QueueRef<I>) -> *const () {
    Rc::as_ptr(queue) as *const ()
}
