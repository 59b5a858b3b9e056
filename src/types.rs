//! Core types for spark-updates.
//!
//! These types define the foundation that everything builds on: priorities,
//! node kinds, commit-phase effect flags, state values, and the errors that
//! cross the host boundary.

use std::error::Error;

use serde_json::Value;

// =============================================================================
// ExpirationTime - scheduler-assigned priority
// =============================================================================

/// A scheduler-assigned priority ordinal.
///
/// Opaque to the queue: only equality and the total order matter.
/// Higher values mean higher priority. An update is applied during a render
/// pass when `update.priority >= render_priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ExpirationTime(pub u32);

impl ExpirationTime {
    /// Sentinel for "no remaining work".
    pub const NO_WORK: Self = Self(0);

    /// Wrap a raw scheduler ordinal.
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Whether this value is the no-work sentinel.
    pub fn is_no_work(self) -> bool {
        self == Self::NO_WORK
    }
}

// =============================================================================
// NodeTag - node kinds
// =============================================================================

/// Kind of tree node that owns a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTag {
    /// The root of the tree. Its updates carry `{ "element": ... }` payloads.
    Root,
    /// A stateful (class-style) node. The only kind that participates in
    /// the reentrant-enqueue warning.
    Stateful,
    /// A host-layer node.
    Host,
}

// =============================================================================
// Effect Flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Commit-phase flags set on a node during processing.
    ///
    /// Combine with bitwise OR: `EffectFlags::CALLBACK | EffectFlags::DID_CAPTURE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EffectFlags: u8 {
        const NONE = 0;
        /// At least one processed update carries a commit callback, or
        /// captured work is pending.
        const CALLBACK = 1 << 0;
        /// Error-boundary machinery asked this node to capture.
        const SHOULD_CAPTURE = 1 << 1;
        /// A capture update was folded during the last pass.
        const DID_CAPTURE = 1 << 2;
    }
}

// =============================================================================
// State values
// =============================================================================

/// Shallow-merge a state fragment into the previous state.
///
/// - A `Null` fragment leaves the previous state unchanged.
/// - An object fragment merged into an object state yields the union of
///   keys, the fragment winning on overlap.
/// - Any other combination replaces the previous state with the fragment,
///   which is what lets non-object states (e.g. strings built by reducers)
///   fold correctly.
pub fn merge_state(prev: &Value, fragment: &Value) -> Value {
    match (prev, fragment) {
        (_, Value::Null) => prev.clone(),
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => fragment.clone(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error surfaced by host-supplied reducers and commit callbacks.
pub type HostError = Box<dyn Error>;

/// Errors the processing and commit paths propagate back to the scheduler.
///
/// Nothing is retried inside the core. Nothing is swallowed.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A reducer payload failed while folding an update. The committed side
    /// is untouched; the partially-folded work-in-progress queue is the
    /// caller's to discard.
    #[error("state reducer failed: {0}")]
    Reducer(#[source] HostError),

    /// A commit callback failed. The callback was cleared before it ran, and
    /// the remaining effects stay reachable for a host-driven retry.
    #[error("commit callback failed: {0}")]
    Callback(#[source] HostError),
}
