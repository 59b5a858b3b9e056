//! Per-node double buffering - committed and work-in-progress views.
//!
//! Each tree node has a committed side and, lazily, a work-in-progress
//! alternate. Each side carries at most one queue header; both headers
//! alias the same chain of update records by structural sharing. Render
//! work happens on the work-in-progress side only, so a pass can be
//! abandoned by dropping that side and re-cloning from current with zero
//! effect on committed state. Commit swaps which side is "current"; that
//! swap belongs to the host reconciler, not this crate.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::queue::QueueRef;
use crate::types::{EffectFlags, ExpirationTime, NodeTag};

// =============================================================================
// StateNode
// =============================================================================

/// Shared handle to a tree node.
pub type NodeRef<I> = Rc<RefCell<StateNode<I>>>;

/// A stateful tree node, as seen by the update queue.
pub struct StateNode<I> {
    /// Node kind. Only `Stateful` nodes participate in the dev warning.
    pub tag: NodeTag,
    /// State produced by the most recent completed fold.
    pub memoized_state: Value,
    /// Queue header for this side, created lazily on first enqueue.
    pub queue: Option<QueueRef<I>>,
    /// Highest priority still pending in the queue after the last fold.
    pub residual_priority: ExpirationTime,
    /// Commit-phase effect flags.
    pub effect_flags: EffectFlags,
    /// The paired node. Weak: the host tree owns both sides, and the pair
    /// must not keep itself alive.
    alternate: Weak<RefCell<StateNode<I>>>,
}

impl<I> StateNode<I> {
    /// Create an unpaired node with the given committed state.
    pub fn new(tag: NodeTag, memoized_state: Value) -> NodeRef<I> {
        Rc::new(RefCell::new(Self {
            tag,
            memoized_state,
            queue: None,
            residual_priority: ExpirationTime::NO_WORK,
            effect_flags: EffectFlags::NONE,
            alternate: Weak::new(),
        }))
    }

    /// The other side of the double buffer, if it exists.
    pub fn alternate(&self) -> Option<NodeRef<I>> {
        self.alternate.upgrade()
    }
}

// =============================================================================
// Work-in-progress creation
// =============================================================================

/// Build (or refresh) the work-in-progress side for `current`.
///
/// On first call the alternate is created and the two sides are linked;
/// later calls reuse it. Either way the work-in-progress side starts from
/// the committed `memoized_state` and *shares* the committed queue header
/// object. Divergence happens lazily through `ensure_queue_is_clone` once
/// the pass needs to write.
pub fn create_work_in_progress<I>(current: &NodeRef<I>) -> NodeRef<I> {
    if let Some(work_in_progress) = current.borrow().alternate() {
        {
            let cur = current.borrow();
            let mut wip = work_in_progress.borrow_mut();
            wip.memoized_state = cur.memoized_state.clone();
            wip.queue = cur.queue.clone();
            wip.residual_priority = cur.residual_priority;
            wip.effect_flags = EffectFlags::NONE;
        }
        return work_in_progress;
    }

    let work_in_progress = {
        let cur = current.borrow();
        Rc::new(RefCell::new(StateNode {
            tag: cur.tag,
            memoized_state: cur.memoized_state.clone(),
            queue: cur.queue.clone(),
            residual_priority: cur.residual_priority,
            effect_flags: EffectFlags::NONE,
            alternate: Rc::downgrade(current),
        }))
    };
    current.borrow_mut().alternate = Rc::downgrade(&work_in_progress);
    work_in_progress
}
