//! Commit path - splice captured updates and fire effect callbacks.
//!
//! Runs after the host has accepted a finished work-in-progress node.
//! Captured updates move onto the tail of the normal chain so that
//! lower-priority re-renders rebase over them, then the pass's callbacks
//! fire in processed order, normal effects before captured effects.

use crate::node::NodeRef;
use crate::queue::QueueRef;
use crate::types::QueueError;

/// Commit a finished node's queue.
///
/// Every callback is cleared *before* it is invoked, so no retry can fire
/// it twice. If a callback fails, the error propagates immediately, but the
/// effect chain head stays in place: a host that chooses to retry
/// `commit_queue` resumes with the remaining effects.
pub fn commit_queue<I>(finished_node: &NodeRef<I>, instance: &I) -> Result<(), QueueError> {
    let Some(queue) = finished_node.borrow().queue.clone() else {
        return Ok(());
    };

    // Splice the captured chain onto the tail of the normal chain.
    {
        let mut q = queue.borrow_mut();
        if q.first_captured_update.is_some() {
            match q.last_update.take() {
                Some(last) => {
                    *last.next.borrow_mut() = q.first_captured_update.clone();
                    q.last_update = q.last_captured_update.clone();
                }
                None => {
                    // Empty normal chain: the captured chain becomes it.
                    q.first_update = q.first_captured_update.clone();
                    q.last_update = q.last_captured_update.clone();
                }
            }
            q.first_captured_update = None;
            q.last_captured_update = None;
        }
    }

    fire_effects(&queue, instance, EffectKind::Normal)?;
    fire_effects(&queue, instance, EffectKind::Captured)?;
    Ok(())
}

enum EffectKind {
    Normal,
    Captured,
}

fn fire_effects<I>(
    queue: &QueueRef<I>,
    instance: &I,
    kind: EffectKind,
) -> Result<(), QueueError> {
    let head = {
        let q = queue.borrow();
        match kind {
            EffectKind::Normal => q.first_effect.clone(),
            EffectKind::Captured => q.first_captured_effect.clone(),
        }
    };

    // No borrow is held while host code runs; a callback may re-enter the
    // enqueue path.
    let mut cursor = head;
    while let Some(effect) = cursor {
        let callback = effect.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback(instance).map_err(QueueError::Callback)?;
        }
        cursor = effect.next_effect.borrow().clone();
    }

    // Walk completed; drop the chain.
    let mut q = queue.borrow_mut();
    match kind {
        EffectKind::Normal => {
            q.first_effect = None;
            q.last_effect = None;
        }
        EffectKind::Captured => {
            q.first_captured_effect = None;
            q.last_captured_effect = None;
        }
    }
    Ok(())
}
