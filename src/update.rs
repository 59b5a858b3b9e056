//! Update records - single requested mutations of a node's state.
//!
//! An update carries a payload (a state fragment or a reducer), a tag that
//! decides how the payload folds into the previous state, a priority, and an
//! optional commit callback. Records are linked into one persistent
//! insertion chain shared by the committed and work-in-progress queue
//! headers, plus a per-pass effects chain.
//!
//! # Example
//!
//! ```ignore
//! use spark_updates::{enqueue_update, ExpirationTime, Update};
//! use serde_json::json;
//!
//! let update = Update::new(ExpirationTime::new(2));
//! update.set_partial(json!({"count": 1}));
//! update.set_callback(|instance: &MyHost| Ok(instance.notify()));
//! enqueue_update(&node, update);
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

use crate::types::{ExpirationTime, HostError};

// =============================================================================
// Shared handles and closure types
// =============================================================================

/// Shared handle to an update record.
pub type UpdateRef<I> = Rc<Update<I>>;

/// Reducer payload: `(instance, prev_state, next_props) -> fragment`.
pub type Reducer<I> = Box<dyn Fn(&I, &Value, &Value) -> Result<Value, HostError>>;

/// Commit callback, invoked at most once with the host instance.
pub type Callback<I> = Box<dyn FnOnce(&I) -> Result<(), HostError>>;

// =============================================================================
// Tag and payload
// =============================================================================

/// What an update does to the state it folds into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTag {
    /// Shallow-merge a partial fragment into the previous state.
    UpdateState,
    /// Replace the previous state outright.
    ReplaceState,
    /// Leave state untouched; flags the owner to re-render unconditionally.
    ForceUpdate,
    /// Error-boundary recovery data. Folds like `UpdateState` and flips the
    /// capture flags on the node.
    CaptureUpdate,
}

/// Payload carried by an update record.
pub enum Payload<I> {
    /// No state change (`ForceUpdate`, or a record not yet staged).
    None,
    /// An opaque state fragment.
    Partial(Value),
    /// A function of the previous state and next props.
    Reducer(Reducer<I>),
}

/// Build the root payload `{ "element": ... }` carrying a new tree.
pub fn element_payload(element: Value) -> Value {
    serde_json::json!({ "element": element })
}

// =============================================================================
// Update record
// =============================================================================

/// A single requested mutation.
///
/// Records are shared between the committed and work-in-progress headers,
/// so every field the design mutates after creation sits behind interior
/// mutability: `tag`, `payload`, and `callback` are staged before enqueue,
/// `next` is written once on append, `callback` is cleared when it fires,
/// and `next_effect` is rebuilt on every processing pass.
pub struct Update<I> {
    /// Expiration time at which this update should be applied.
    pub priority: ExpirationTime,
    /// Fold semantics; defaults to `UpdateState`.
    pub tag: Cell<UpdateTag>,
    /// State fragment or reducer.
    pub payload: RefCell<Payload<I>>,
    /// Fired once after commit, then cleared.
    pub callback: RefCell<Option<Callback<I>>>,
    /// Forward link in the insertion chain (persistent).
    pub next: RefCell<Option<UpdateRef<I>>>,
    /// Forward link in the effects chain (per-pass).
    pub next_effect: RefCell<Option<UpdateRef<I>>>,
}

impl<I> Update<I> {
    /// Create a fresh record at the given priority.
    ///
    /// The only constructor. Callers stage `payload`, `callback`, and `tag`
    /// before enqueueing.
    pub fn new(priority: ExpirationTime) -> UpdateRef<I> {
        Rc::new(Self {
            priority,
            tag: Cell::new(UpdateTag::UpdateState),
            payload: RefCell::new(Payload::None),
            callback: RefCell::new(None),
            next: RefCell::new(None),
            next_effect: RefCell::new(None),
        })
    }

    /// Stage a partial-state fragment payload.
    pub fn set_partial(&self, fragment: Value) {
        *self.payload.borrow_mut() = Payload::Partial(fragment);
    }

    /// Stage a reducer payload.
    pub fn set_reducer(
        &self,
        reducer: impl Fn(&I, &Value, &Value) -> Result<Value, HostError> + 'static,
    ) {
        *self.payload.borrow_mut() = Payload::Reducer(Box::new(reducer));
    }

    /// Stage a commit callback.
    pub fn set_callback(&self, callback: impl FnOnce(&I) -> Result<(), HostError> + 'static) {
        *self.callback.borrow_mut() = Some(Box::new(callback));
    }
}
