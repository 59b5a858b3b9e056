//! Queue headers and the enqueue path.
//!
//! A queue header is a viewport over a shared singly-linked chain of update
//! records: a base state, head/tail pointers for the normal and captured
//! insertion chains, and head/tail pointers for the effect chains assembled
//! by the most recent processing pass.
//!
//! The committed and work-in-progress sides of a node each hold at most one
//! header. Both alias the same insertion chain: from some record onward the
//! `next` links are the very same objects. The enqueue path is the only
//! place the chain grows, and it is responsible for keeping both sides'
//! tail pointers consistent.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;

use crate::dev;
use crate::node::NodeRef;
use crate::update::UpdateRef;

// =============================================================================
// Queue header
// =============================================================================

/// Shared handle to a queue header.
///
/// Headers are handles rather than plain values so the two sides of the
/// double buffer can hold the *same* header object, and identity can be
/// tested with `Rc::ptr_eq`.
pub type QueueRef<I> = Rc<RefCell<UpdateQueue<I>>>;

/// Paired head/tail viewport over the shared update chain.
pub struct UpdateQueue<I> {
    /// State the first remaining update applies against.
    pub base_state: Value,

    /// Normal insertion chain.
    pub first_update: Option<UpdateRef<I>>,
    pub last_update: Option<UpdateRef<I>>,

    /// Captured (error-boundary) chain. Populated only on the
    /// work-in-progress side.
    pub first_captured_update: Option<UpdateRef<I>>,
    pub last_captured_update: Option<UpdateRef<I>>,

    /// Effect chain from the most recent processing pass.
    pub first_effect: Option<UpdateRef<I>>,
    pub last_effect: Option<UpdateRef<I>>,

    /// Captured effect chain from the most recent processing pass.
    pub first_captured_effect: Option<UpdateRef<I>>,
    pub last_captured_effect: Option<UpdateRef<I>>,
}

impl<I> UpdateQueue<I> {
    /// Create a header with the given base state and empty chains.
    pub fn new(base_state: Value) -> QueueRef<I> {
        Rc::new(RefCell::new(Self {
            base_state,
            first_update: None,
            last_update: None,
            first_captured_update: None,
            last_captured_update: None,
            first_effect: None,
            last_effect: None,
            first_captured_effect: None,
            last_captured_effect: None,
        }))
    }

    /// Clone a header into a new viewport over the same chain.
    ///
    /// O(1): shares the normal chain by reference and never copies records.
    /// Captured and effect fields start empty so work-in-progress state
    /// cannot leak into the committed view.
    pub fn clone_from(queue: &QueueRef<I>) -> QueueRef<I> {
        let q = queue.borrow();
        Rc::new(RefCell::new(Self {
            base_state: q.base_state.clone(),
            first_update: q.first_update.clone(),
            last_update: q.last_update.clone(),
            first_captured_update: None,
            last_captured_update: None,
            first_effect: None,
            last_effect: None,
            first_captured_effect: None,
            last_captured_effect: None,
        }))
    }

    /// Append a record to the tail of the normal chain.
    pub fn append_update(&mut self, update: UpdateRef<I>) {
        match self.last_update.take() {
            None => {
                self.first_update = Some(update.clone());
                self.last_update = Some(update);
            }
            Some(last) => {
                *last.next.borrow_mut() = Some(update.clone());
                self.last_update = Some(update);
            }
        }
    }

    /// Append a record to the tail of the captured chain.
    pub fn append_captured_update(&mut self, update: UpdateRef<I>) {
        match self.last_captured_update.take() {
            None => {
                self.first_captured_update = Some(update.clone());
                self.last_captured_update = Some(update);
            }
            Some(last) => {
                *last.next.borrow_mut() = Some(update.clone());
                self.last_captured_update = Some(update);
            }
        }
    }
}

// =============================================================================
// Enqueue path
// =============================================================================

/// Attach an update to both sides of a node's double buffer.
///
/// The committed side must see every update so a discarded render can
/// restart from current without losing anything; the work-in-progress side
/// must see every update so a commit doesn't silently drop anything.
/// Appends stay O(1) because non-empty chains already share their tail
/// record: append to one chain and repoint the other side's `last_update`.
/// Appending to both would make the new record its own `next`.
pub fn enqueue_update<I>(node: &NodeRef<I>, update: UpdateRef<I>) {
    let tag = node.borrow().tag;
    let alternate = node.borrow().alternate();

    let (queue1, queue2) = match &alternate {
        None => (ensure_queue(node), None),
        Some(alternate) => {
            let q1 = node.borrow().queue.clone();
            let q2 = alternate.borrow().queue.clone();
            match (q1, q2) {
                // Neither side has a queue yet: create both from their own
                // memoized state.
                (None, None) => (ensure_queue(node), Some(ensure_queue(alternate))),
                // Exactly one exists: clone it for the bare side. The clone
                // has empty captured/effect fields.
                (None, Some(q2)) => {
                    let clone = UpdateQueue::clone_from(&q2);
                    node.borrow_mut().queue = Some(clone.clone());
                    (clone, Some(q2))
                }
                (Some(q1), None) => {
                    let clone = UpdateQueue::clone_from(&q1);
                    alternate.borrow_mut().queue = Some(clone.clone());
                    (q1, Some(clone))
                }
                (Some(q1), Some(q2)) => (q1, Some(q2)),
            }
        }
    };

    match &queue2 {
        // Single view over the chain: one append covers everything.
        None => queue1.borrow_mut().append_update(update),
        Some(queue2) if Rc::ptr_eq(&queue1, queue2) => {
            queue1.borrow_mut().append_update(update);
        }
        Some(queue2) => {
            let either_empty = queue1.borrow().last_update.is_none()
                || queue2.borrow().last_update.is_none();
            if either_empty {
                // At least one chain is empty; each side needs the record as
                // its own head and tail.
                queue1.borrow_mut().append_update(update.clone());
                queue2.borrow_mut().append_update(update);
            } else {
                // Both chains are non-empty, so they share their tail record.
                queue1.borrow_mut().append_update(update.clone());
                queue2.borrow_mut().last_update = Some(update);
            }
        }
    }

    dev::warn_on_reentrant_enqueue(tag, &queue1, queue2.as_ref());
}

/// Append an error-boundary update to the work-in-progress side only.
///
/// The queue is force-cloned first, so captured updates never become
/// visible through the committed view.
pub fn enqueue_captured_update<I>(work_in_progress: &NodeRef<I>, update: UpdateRef<I>) {
    let queue = ensure_queue(work_in_progress);
    let queue = ensure_queue_is_clone(work_in_progress, queue);
    queue.borrow_mut().append_captured_update(update);
}

/// Make sure the work-in-progress queue is not object-identical to the
/// committed queue, cloning it if it is. Returns the (possibly new) header.
pub fn ensure_queue_is_clone<I>(work_in_progress: &NodeRef<I>, queue: QueueRef<I>) -> QueueRef<I> {
    let current = work_in_progress.borrow().alternate();
    if let Some(current) = current {
        let shared = current
            .borrow()
            .queue
            .as_ref()
            .is_some_and(|current_queue| Rc::ptr_eq(current_queue, &queue));
        if shared {
            let clone = UpdateQueue::clone_from(&queue);
            work_in_progress.borrow_mut().queue = Some(clone.clone());
            return clone;
        }
    }
    queue
}

/// Get a node's queue, creating it from the node's memoized state on first
/// use.
fn ensure_queue<I>(node: &NodeRef<I>) -> QueueRef<I> {
    let mut n = node.borrow_mut();
    if let Some(queue) = &n.queue {
        return queue.clone();
    }
    let queue = UpdateQueue::new(n.memoized_state.clone());
    n.queue = Some(queue.clone());
    queue
}
