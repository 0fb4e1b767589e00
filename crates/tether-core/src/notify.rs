//! Property-change notification queue.
//!
//! Each object lazily carries one [`NotifyQueue`] behind a mutex. While the
//! freeze count is nonzero, change notifications accumulate in the queue
//! instead of dispatching; a property is queued at most once per thaw cycle
//! (deduplicated by spec identity). When the count returns to zero the queue
//! is detached and its entries dispatched, most recently queued first. The
//! dispatch order across distinct properties is not part of the contract.
//!
//! The object core freezes around dispose so that notifications raised by
//! teardown code never fire on a half-destroyed object.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::logging::targets;
use crate::param::ParamSpec;

/// Highest representable freeze depth. Freezing beyond this saturates.
const MAX_FREEZE: u16 = u16::MAX;

pub(crate) struct NotifyQueue {
    freeze_count: u16,
    pending: Vec<Arc<ParamSpec>>,
}

/// The per-object queue slot. `None` while no freeze is in effect.
pub(crate) type QueueSlot = Mutex<Option<Box<NotifyQueue>>>;

/// Increment the freeze count, creating the queue on first freeze.
pub(crate) fn freeze(slot: &QueueSlot) {
    let mut guard = slot.lock();
    let queue = guard.get_or_insert_with(|| Box::new(NotifyQueue { freeze_count: 0, pending: Vec::new() }));
    if queue.freeze_count == MAX_FREEZE {
        error!(
            target: targets::NOTIFY,
            "freeze count overflow ({MAX_FREEZE}); further freezes are ignored"
        );
        return;
    }
    queue.freeze_count += 1;
}

/// Queue a pending notification for `pspec`.
///
/// Callers freeze first, so the queue always exists here. Duplicate specs
/// (by pointer identity) collapse into one entry.
pub(crate) fn add(slot: &QueueSlot, pspec: &Arc<ParamSpec>) {
    let mut guard = slot.lock();
    let Some(queue) = guard.as_mut() else {
        warn!(target: targets::NOTIFY, property = pspec.name(), "notification queued without freeze");
        return;
    };
    if !queue.pending.iter().any(|p| Arc::ptr_eq(p, pspec)) {
        queue.pending.push(Arc::clone(pspec));
    }
}

/// Decrement the freeze count.
///
/// Returns the pending notifications to dispatch when the count reaches
/// zero, already ordered for dispatch; returns `None` while still frozen.
/// The queue slot is emptied before returning so that notifications raised
/// by the dispatched handlers start a fresh cycle.
pub(crate) fn thaw(slot: &QueueSlot) -> Option<Vec<Arc<ParamSpec>>> {
    let mut guard = slot.lock();
    let Some(queue) = guard.as_mut() else {
        warn!(target: targets::NOTIFY, "thaw without matching freeze");
        return None;
    };
    if queue.freeze_count == 0 {
        warn!(target: targets::NOTIFY, "thaw without matching freeze");
        return None;
    }
    queue.freeze_count -= 1;
    if queue.freeze_count > 0 {
        return None;
    }
    let mut pending = guard.take().map(|q| q.pending).unwrap_or_default();
    pending.reverse();
    Some(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::ParamFlags;

    fn slot() -> QueueSlot {
        Mutex::new(None)
    }

    #[test]
    fn test_thaw_returns_pending_once() {
        let slot = slot();
        let a = ParamSpec::boolean("a", false, ParamFlags::READWRITE);
        let b = ParamSpec::boolean("b", false, ParamFlags::READWRITE);

        freeze(&slot);
        add(&slot, &a);
        add(&slot, &b);
        let pending = thaw(&slot).unwrap();
        assert_eq!(pending.len(), 2);
        // Most recently queued dispatches first.
        assert!(Arc::ptr_eq(&pending[0], &b));
        assert!(Arc::ptr_eq(&pending[1], &a));

        // The slot is empty again.
        assert!(slot.lock().is_none());
    }

    #[test]
    fn test_dedup_by_identity() {
        let slot = slot();
        let a = ParamSpec::boolean("a", false, ParamFlags::READWRITE);
        let a_twin = ParamSpec::boolean("a", false, ParamFlags::READWRITE);

        freeze(&slot);
        add(&slot, &a);
        add(&slot, &a);
        add(&slot, &a_twin);
        let pending = thaw(&slot).unwrap();
        // Same Arc collapses; a distinct spec with the same name does not.
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_nested_freeze() {
        let slot = slot();
        let a = ParamSpec::boolean("a", false, ParamFlags::READWRITE);

        freeze(&slot);
        freeze(&slot);
        add(&slot, &a);
        assert!(thaw(&slot).is_none());
        let pending = thaw(&slot).unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_unbalanced_thaw_is_harmless() {
        let slot = slot();
        assert!(thaw(&slot).is_none());
        freeze(&slot);
        assert_eq!(thaw(&slot).unwrap().len(), 0);
        assert!(thaw(&slot).is_none());
    }
}
