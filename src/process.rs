//! The processor - folds a queue against a render priority.
//!
//! Walks the normal and captured chains in insertion order. Updates with
//! sufficient priority fold into the running state; the rest stay in the
//! chain, freeze the base state at the first skip, and raise the node's
//! residual priority to the highest skipped value. Because skipped updates
//! *and everything after them* remain in the chain, a later pass at a lower
//! priority replays the complete tail on top of the frozen base state, so
//! the final state is insertion-order-equivalent no matter which priority
//! levels ran first.
//!
//! The processor writes only to the work-in-progress clone of the queue.
//! Abandoning a pass is just dropping the work-in-progress side.

use serde_json::Value;

use crate::dev;
use crate::node::NodeRef;
use crate::queue::{ensure_queue_is_clone, QueueRef};
use crate::types::{merge_state, EffectFlags, ExpirationTime, QueueError};
use crate::update::{Payload, UpdateRef, UpdateTag};

// =============================================================================
// Fold context
// =============================================================================

/// Per-host fold context.
///
/// Owns the force-update flag, so independent hosts on one thread never
/// observe each other's passes.
#[derive(Debug, Default)]
pub struct UpdateContext {
    has_force_update: bool,
}

impl UpdateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the force-update flag. The processor also does this in its
    /// preamble.
    pub fn reset_has_force_update(&mut self) {
        self.has_force_update = false;
    }

    /// Whether the most recent pass folded at least one `ForceUpdate`.
    /// Clears the flag.
    pub fn consume_has_force_update(&mut self) -> bool {
        std::mem::take(&mut self.has_force_update)
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Fold the work-in-progress node's queue against `render_priority`.
///
/// Produces the node's new `memoized_state` and `residual_priority`, the
/// queue's new `base_state` and residual chains, and the effect chains the
/// commit path fires. Committed records are never mutated: the queue is
/// force-cloned away from the committed side before anything is written.
///
/// A reducer error aborts the pass; the committed side is untouched and the
/// partially-folded work-in-progress queue is the caller's to discard.
pub fn process_queue<I>(
    work_in_progress: &NodeRef<I>,
    props: &Value,
    instance: &I,
    render_priority: ExpirationTime,
    ctx: &mut UpdateContext,
) -> Result<(), QueueError> {
    ctx.reset_has_force_update();

    let Some(queue) = work_in_progress.borrow().queue.clone() else {
        // Nothing was ever enqueued.
        return Ok(());
    };
    let queue = ensure_queue_is_clone(work_in_progress, queue);

    let _guard = dev::begin_processing(&queue);

    // The effect chains describe one pass only; start from scratch.
    let (base_state, first_update, first_captured_update) = {
        let mut q = queue.borrow_mut();
        q.first_effect = None;
        q.last_effect = None;
        q.first_captured_effect = None;
        q.last_captured_effect = None;
        (
            q.base_state.clone(),
            q.first_update.clone(),
            q.first_captured_update.clone(),
        )
    };

    let mut result_state = base_state.clone();
    let mut new_base_state = base_state;
    let mut new_first_update: Option<UpdateRef<I>> = None;
    let mut new_first_captured_update: Option<UpdateRef<I>> = None;
    let mut new_residual_priority = ExpirationTime::NO_WORK;

    // Normal chain.
    let mut cursor = first_update;
    while let Some(update) = cursor {
        if update.priority < render_priority {
            // Insufficient priority; the record stays in the queue. The
            // base state freezes at the first skip.
            if new_first_update.is_none() {
                new_first_update = Some(update.clone());
                new_base_state = result_state.clone();
            }
            if update.priority > new_residual_priority {
                new_residual_priority = update.priority;
            }
        } else {
            result_state =
                apply_update(&update, result_state, props, instance, work_in_progress, ctx)?;
            if update.callback.borrow().is_some() {
                work_in_progress.borrow_mut().effect_flags |= EffectFlags::CALLBACK;
                *update.next_effect.borrow_mut() = None;
                append_effect(&queue, &update, EffectChain::Normal);
            }
        }
        cursor = update.next.borrow().clone();
    }

    // Captured chain. Same walk, but skips freeze the base state only if
    // the normal chain didn't already, and effects land on the captured
    // chain.
    let mut cursor = first_captured_update;
    while let Some(update) = cursor {
        if update.priority < render_priority {
            if new_first_captured_update.is_none() {
                new_first_captured_update = Some(update.clone());
                if new_first_update.is_none() {
                    new_base_state = result_state.clone();
                }
            }
            if update.priority > new_residual_priority {
                new_residual_priority = update.priority;
            }
        } else {
            result_state =
                apply_update(&update, result_state, props, instance, work_in_progress, ctx)?;
            if update.callback.borrow().is_some() {
                work_in_progress.borrow_mut().effect_flags |= EffectFlags::CALLBACK;
                *update.next_effect.borrow_mut() = None;
                append_effect(&queue, &update, EffectChain::Captured);
            }
        }
        cursor = update.next.borrow().clone();
    }

    // Finalization.
    {
        let mut q = queue.borrow_mut();
        if new_first_update.is_none() {
            q.last_update = None;
        }
        if new_first_captured_update.is_none() {
            q.last_captured_update = None;
        }
        if new_first_update.is_none() && new_first_captured_update.is_none() {
            // Neither loop skipped: the queue is fully drained.
            new_base_state = result_state.clone();
        }
        let captured_pending =
            new_first_captured_update.is_some() || q.first_captured_effect.is_some();
        q.base_state = new_base_state;
        q.first_update = new_first_update;
        q.first_captured_update = new_first_captured_update;
        if captured_pending {
            drop(q);
            work_in_progress.borrow_mut().effect_flags |= EffectFlags::CALLBACK;
        }
    }

    {
        let mut node = work_in_progress.borrow_mut();
        node.residual_priority = new_residual_priority;
        node.memoized_state = result_state;
    }

    Ok(())
}

// =============================================================================
// Applying a single update
// =============================================================================

/// Fold one record into `prev_state`.
fn apply_update<I>(
    update: &UpdateRef<I>,
    prev_state: Value,
    props: &Value,
    instance: &I,
    work_in_progress: &NodeRef<I>,
    ctx: &mut UpdateContext,
) -> Result<Value, QueueError> {
    match update.tag.get() {
        UpdateTag::ReplaceState => {
            let payload = update.payload.borrow();
            match &*payload {
                Payload::Reducer(reducer) => {
                    reducer(instance, &prev_state, props).map_err(QueueError::Reducer)
                }
                Payload::Partial(fragment) => Ok(fragment.clone()),
                Payload::None => Ok(Value::Null),
            }
        }
        UpdateTag::CaptureUpdate => {
            {
                let mut node = work_in_progress.borrow_mut();
                node.effect_flags.remove(EffectFlags::SHOULD_CAPTURE);
                node.effect_flags.insert(EffectFlags::DID_CAPTURE);
            }
            apply_partial(update, prev_state, props, instance)
        }
        UpdateTag::UpdateState => apply_partial(update, prev_state, props, instance),
        UpdateTag::ForceUpdate => {
            ctx.has_force_update = true;
            Ok(prev_state)
        }
    }
}

/// `UpdateState` semantics: obtain a partial fragment and shallow-merge it.
fn apply_partial<I>(
    update: &UpdateRef<I>,
    prev_state: Value,
    props: &Value,
    instance: &I,
) -> Result<Value, QueueError> {
    let payload = update.payload.borrow();
    let fragment = match &*payload {
        Payload::Reducer(reducer) => {
            reducer(instance, &prev_state, props).map_err(QueueError::Reducer)?
        }
        Payload::Partial(fragment) => fragment.clone(),
        Payload::None => Value::Null,
    };
    Ok(merge_state(&prev_state, &fragment))
}

// =============================================================================
// Effect chains
// =============================================================================

enum EffectChain {
    Normal,
    Captured,
}

fn append_effect<I>(queue: &QueueRef<I>, update: &UpdateRef<I>, chain: EffectChain) {
    let mut guard = queue.borrow_mut();
    let q = &mut *guard;
    let (first, last) = match chain {
        EffectChain::Normal => (&mut q.first_effect, &mut q.last_effect),
        EffectChain::Captured => (&mut q.first_captured_effect, &mut q.last_captured_effect),
    };
    match last.take() {
        None => {
            *first = Some(update.clone());
            *last = Some(update.clone());
        }
        Some(tail) => {
            *tail.next_effect.borrow_mut() = Some(update.clone());
            *last = Some(update.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;

    use crate::node::{create_work_in_progress, NodeRef, StateNode};
    use crate::queue::{enqueue_captured_update, enqueue_update};
    use crate::types::NodeTag;
    use crate::update::Update;

    const HI: ExpirationTime = ExpirationTime(2);
    const LO: ExpirationTime = ExpirationTime(1);

    fn stateful(state: Value) -> NodeRef<()> {
        StateNode::new(NodeTag::Stateful, state)
    }

    fn enqueue_partial(node: &NodeRef<()>, priority: ExpirationTime, fragment: Value) {
        let update = Update::new(priority);
        update.set_partial(fragment);
        enqueue_update(node, update);
    }

    fn process(
        node: &NodeRef<()>,
        priority: ExpirationTime,
        ctx: &mut UpdateContext,
    ) -> Result<(), QueueError> {
        process_queue(node, &json!({}), &(), priority, ctx)
    }

    fn chain_priorities(node: &NodeRef<()>) -> Vec<u32> {
        let queue = node.borrow().queue.clone().unwrap();
        let mut out = Vec::new();
        let mut cursor = queue.borrow().first_update.clone();
        while let Some(update) = cursor {
            out.push(update.priority.0);
            cursor = update.next.borrow().clone();
        }
        out
    }

    #[test]
    fn test_merge_two_partials() {
        let node = stateful(json!({}));
        enqueue_partial(&node, HI, json!({"a": 1}));
        enqueue_partial(&node, HI, json!({"b": 2}));

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        assert_eq!(node.borrow().memoized_state, json!({"a": 1, "b": 2}));
        let queue = node.borrow().queue.clone().unwrap();
        assert_eq!(queue.borrow().base_state, json!({"a": 1, "b": 2}));
        assert!(queue.borrow().first_update.is_none());
        assert!(queue.borrow().last_update.is_none());
    }

    #[test]
    fn test_replace_discards_previous_state() {
        let node = stateful(json!({}));
        enqueue_partial(&node, HI, json!({"a": 1}));
        let replace = Update::new(HI);
        replace.tag.set(UpdateTag::ReplaceState);
        replace.set_partial(json!({"b": 2}));
        enqueue_update(&node, replace);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        assert_eq!(node.borrow().memoized_state, json!({"b": 2}));
    }

    #[test]
    fn test_replace_with_reducer_receives_prev_state() {
        let node = stateful(json!({"count": 1}));
        let replace = Update::new(HI);
        replace.tag.set(UpdateTag::ReplaceState);
        replace.set_reducer(|_, prev, _| {
            let count = prev["count"].as_i64().unwrap();
            Ok(json!({"count": count * 10}))
        });
        enqueue_update(&node, replace);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();
        assert_eq!(node.borrow().memoized_state, json!({"count": 10}));
    }

    #[test]
    fn test_null_partial_leaves_state_unchanged() {
        let node = stateful(json!({"a": 1}));
        let update = Update::new(HI);
        update.set_reducer(|_, _, _| Ok(Value::Null));
        enqueue_update(&node, update);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();
        assert_eq!(node.borrow().memoized_state, json!({"a": 1}));
    }

    #[test]
    fn test_skip_freezes_base_state_and_raises_residual() {
        let node = stateful(json!({}));
        enqueue_partial(&node, HI, json!({"a": 1}));
        enqueue_partial(&node, LO, json!({"b": 2}));
        enqueue_partial(&node, HI, json!({"c": 3}));

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        // Both high-priority updates applied; the skipped one froze the
        // base state at the point it was encountered.
        assert_eq!(node.borrow().memoized_state, json!({"a": 1, "c": 3}));
        assert_eq!(node.borrow().residual_priority, LO);

        let queue = node.borrow().queue.clone().unwrap();
        assert_eq!(queue.borrow().base_state, json!({"a": 1}));
        // The chain keeps the skipped update and everything after it.
        assert_eq!(chain_priorities(&node), vec![LO.0, HI.0]);
    }

    #[test]
    fn test_residual_priority_is_max_skipped() {
        let node = stateful(json!({}));
        enqueue_partial(&node, ExpirationTime(1), json!({"a": 1}));
        enqueue_partial(&node, ExpirationTime(2), json!({"b": 2}));

        let mut ctx = UpdateContext::new();
        process(&node, ExpirationTime(3), &mut ctx).unwrap();

        assert_eq!(node.borrow().residual_priority, ExpirationTime(2));
        assert_eq!(node.borrow().memoized_state, json!({}));
        let queue = node.borrow().queue.clone().unwrap();
        assert_eq!(queue.borrow().base_state, json!({}));
    }

    #[test]
    fn test_force_update_sets_flag_and_keeps_state() {
        let node = stateful(json!({"a": 1}));
        let force = Update::new(HI);
        force.tag.set(UpdateTag::ForceUpdate);
        enqueue_update(&node, force);

        let mut ctx = UpdateContext::new();
        assert!(!ctx.consume_has_force_update());
        process(&node, HI, &mut ctx).unwrap();

        assert_eq!(node.borrow().memoized_state, json!({"a": 1}));
        assert!(ctx.consume_has_force_update());
        // Consumed: a second read reports no force update.
        assert!(!ctx.consume_has_force_update());
    }

    #[test]
    fn test_force_update_flag_resets_each_pass() {
        let node = stateful(json!({}));
        let force = Update::new(HI);
        force.tag.set(UpdateTag::ForceUpdate);
        enqueue_update(&node, force);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();
        assert!(ctx.consume_has_force_update());

        enqueue_partial(&node, HI, json!({"a": 1}));
        process(&node, HI, &mut ctx).unwrap();
        assert!(!ctx.consume_has_force_update());
    }

    #[test]
    fn test_callback_updates_build_effect_chain() {
        let node = stateful(json!({}));
        let with_callback = Update::new(HI);
        with_callback.set_partial(json!({"a": 1}));
        with_callback.set_callback(|_: &()| Ok(()));
        let plain = Update::new(HI);
        plain.set_partial(json!({"b": 2}));
        enqueue_update(&node, with_callback.clone());
        enqueue_update(&node, plain);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        assert!(node.borrow().effect_flags.contains(EffectFlags::CALLBACK));
        let queue = node.borrow().queue.clone().unwrap();
        let q = queue.borrow();
        assert!(Rc::ptr_eq(q.first_effect.as_ref().unwrap(), &with_callback));
        assert!(Rc::ptr_eq(q.last_effect.as_ref().unwrap(), &with_callback));
    }

    #[test]
    fn test_effect_chain_rebuilt_each_pass() {
        let node = stateful(json!({}));
        let first = Update::new(HI);
        first.set_partial(json!({"a": 1}));
        first.set_callback(|_: &()| Ok(()));
        enqueue_update(&node, first.clone());

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        // A second pass with nothing applied leaves no stale effects.
        process(&node, HI, &mut ctx).unwrap();
        let queue = node.borrow().queue.clone().unwrap();
        assert!(queue.borrow().first_effect.is_none());
        assert!(queue.borrow().last_effect.is_none());
    }

    #[test]
    fn test_capture_update_flips_flags_and_merges() {
        let node = stateful(json!({"a": 1}));
        node.borrow_mut().effect_flags |= EffectFlags::SHOULD_CAPTURE;

        let capture = Update::new(HI);
        capture.tag.set(UpdateTag::CaptureUpdate);
        capture.set_partial(json!({"err": true}));
        enqueue_captured_update(&node, capture);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        let flags = node.borrow().effect_flags;
        assert!(!flags.contains(EffectFlags::SHOULD_CAPTURE));
        assert!(flags.contains(EffectFlags::DID_CAPTURE));
        assert_eq!(node.borrow().memoized_state, json!({"a": 1, "err": true}));
    }

    #[test]
    fn test_captured_only_skip_freezes_pre_captured_state() {
        let node = stateful(json!({}));
        enqueue_partial(&node, HI, json!({"a": 1}));

        let captured = Update::new(LO);
        captured.tag.set(UpdateTag::CaptureUpdate);
        captured.set_partial(json!({"err": true}));
        enqueue_captured_update(&node, captured);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        // Normal loop drained; captured loop skipped. Base state freezes at
        // the pre-captured result, not the final result.
        assert_eq!(node.borrow().memoized_state, json!({"a": 1}));
        let queue = node.borrow().queue.clone().unwrap();
        assert_eq!(queue.borrow().base_state, json!({"a": 1}));
        assert!(queue.borrow().first_captured_update.is_some());
        assert_eq!(node.borrow().residual_priority, LO);
        // Pending captured work marks the node.
        assert!(node.borrow().effect_flags.contains(EffectFlags::CALLBACK));
    }

    #[test]
    fn test_drained_queue_base_state_equals_memoized_state() {
        let node = stateful(json!({}));
        enqueue_partial(&node, HI, json!({"a": 1}));

        let captured = Update::new(HI);
        captured.tag.set(UpdateTag::CaptureUpdate);
        captured.set_partial(json!({"err": true}));
        enqueue_captured_update(&node, captured);

        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();

        let queue = node.borrow().queue.clone().unwrap();
        let q = queue.borrow();
        assert_eq!(q.base_state, json!({"a": 1, "err": true}));
        assert_eq!(q.base_state, node.borrow().memoized_state);
        assert!(q.first_update.is_none());
        assert!(q.first_captured_update.is_none());
        assert!(q.last_captured_update.is_none());
    }

    #[test]
    fn test_reducer_error_propagates_and_preserves_committed_state() {
        let current = stateful(json!({"a": 1}));
        enqueue_partial(&current, HI, json!({"b": 2}));
        let failing = Update::new(HI);
        failing.set_reducer(|_, _, _| Err("boom".into()));
        enqueue_update(&current, failing);

        let wip = create_work_in_progress(&current);
        let mut ctx = UpdateContext::new();
        let err = process(&wip, HI, &mut ctx).unwrap_err();
        assert!(matches!(err, QueueError::Reducer(_)));

        // The committed side never saw the partial fold.
        assert_eq!(current.borrow().memoized_state, json!({"a": 1}));
        let current_queue = current.borrow().queue.clone().unwrap();
        assert_eq!(current_queue.borrow().base_state, json!({"a": 1}));
        assert!(current_queue.borrow().first_update.is_some());
    }

    #[test]
    fn test_processing_without_queue_is_a_no_op() {
        let node = stateful(json!({"a": 1}));
        let mut ctx = UpdateContext::new();
        process(&node, HI, &mut ctx).unwrap();
        assert_eq!(node.borrow().memoized_state, json!({"a": 1}));
        assert!(node.borrow().queue.is_none());
    }

    #[test]
    fn test_processor_clones_shared_queue_before_writing() {
        let current = stateful(json!({}));
        enqueue_partial(&current, HI, json!({"a": 1}));
        let wip = create_work_in_progress(&current);

        let shared = current.borrow().queue.clone().unwrap();
        assert!(Rc::ptr_eq(&shared, &wip.borrow().queue.clone().unwrap()));

        let mut ctx = UpdateContext::new();
        process(&wip, HI, &mut ctx).unwrap();

        // The work-in-progress side diverged and drained; the committed
        // side still holds the full chain.
        let wip_queue = wip.borrow().queue.clone().unwrap();
        assert!(!Rc::ptr_eq(&shared, &wip_queue));
        assert!(wip_queue.borrow().first_update.is_none());
        assert!(shared.borrow().first_update.is_some());
        assert_eq!(current.borrow().memoized_state, json!({}));
        assert_eq!(wip.borrow().memoized_state, json!({"a": 1}));
    }
}
