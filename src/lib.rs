//! # spark-updates
//!
//! Priority-aware update queue for a reconciling UI runtime.
//!
//! Accepts state mutations for nodes in a tree of stateful nodes and, on
//! demand, folds them against a baseline state to compute a new state,
//! respecting per-update priorities and preserving insertion order.
//!
//! ## Architecture
//!
//! Update records form one persistent singly-linked chain, viewed through
//! two queue headers per node - the committed view and the work-in-progress
//! view - which share the chain's tail by structural sharing:
//!
//! ```text
//! enqueue → shared chain → process (fold vs. render priority) → memoized state
//!                                  └ effect chains ───────────→ commit callbacks
//! ```
//!
//! Renders are interruptible: a processing pass writes only to the
//! work-in-progress clone, so the host discards a pass by dropping that
//! side and re-cloning from current. Skipped low-priority updates stay in
//! the chain together with everything enqueued after them, freezing the
//! base state, so a later pass replays the full tail and the final state is
//! the same no matter which priority levels ran first.
//!
//! ## Modules
//!
//! - [`types`] - Priorities, node kinds, effect flags, state merge, errors
//! - [`update`] - Update records (payloads, tags, callbacks) and the factory
//! - [`queue`] - Queue headers, O(1) clone, the enqueue path
//! - [`node`] - Per-node double buffering (committed / work-in-progress)
//! - [`process`] - The processor: fold a queue against a render priority
//! - [`commit`] - Splice captured updates, fire effect callbacks
//! - [`dev`] - Advisory reentrant-enqueue diagnostics

pub mod commit;
pub mod dev;
pub mod node;
pub mod process;
pub mod queue;
pub mod types;
pub mod update;

// Re-export commonly used items
pub use types::{merge_state, EffectFlags, ExpirationTime, HostError, NodeTag, QueueError};

pub use update::{element_payload, Callback, Payload, Reducer, Update, UpdateRef, UpdateTag};

pub use queue::{
    enqueue_captured_update, enqueue_update, ensure_queue_is_clone, QueueRef, UpdateQueue,
};

pub use node::{create_work_in_progress, NodeRef, StateNode};

pub use process::{process_queue, UpdateContext};

pub use commit::commit_queue;

pub use dev::{reset_diagnostics, set_diagnostic_sink};
