//! Re-settable weak reference cells.
//!
//! A [`WeakCell`] tracks one object without owning it: `get` upgrades to a
//! strong [`ObjectRef`] while the object is alive and returns `None` after
//! destruction begins. Cells never dangle.
//!
//! All cell mutation is serialized by one process-wide `RwLock`. An object
//! entering destruction takes the writer lock, re-checks that no concurrent
//! upgrade revived it, and empties every cell pointing at it before the
//! strong count can reach zero. `get` therefore only needs the reader lock:
//! any pointer read under it belongs to an object whose count is still at
//! least one, so a plain increment is a valid upgrade.
//!
//! Lock order: the global cell lock is always taken before any per-object
//! mutex, never after.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::trace;

use crate::logging::targets;
use crate::object::{Object, ObjectRef};

static CELL_LOCK: RwLock<()> = RwLock::new(());

/// Take the global cell writer lock.
///
/// The object destruction path holds this across its count re-check and
/// cell sweep.
pub(crate) fn write_guard() -> RwLockWriteGuard<'static, ()> {
    CELL_LOCK.write()
}

/// Shared slot between a [`WeakCell`] and the object's registry.
///
/// The pointer is only ever read or written under `CELL_LOCK`, so relaxed
/// atomics suffice; the lock provides the ordering.
pub(crate) struct WeakSlot {
    ptr: AtomicPtr<Object>,
}

impl WeakSlot {
    pub(crate) fn load(&self) -> *mut Object {
        self.ptr.load(Ordering::Relaxed)
    }

    pub(crate) fn clear(&self) {
        self.ptr.store(ptr::null_mut(), Ordering::Relaxed);
    }
}

/// A weak reference to an object.
///
/// The cell can be re-pointed with [`set`](WeakCell::set) and upgraded with
/// [`get`](WeakCell::get). Dropping the cell detaches it. `WeakCell` is not
/// `Clone`; each cell is registered with its pointee individually.
pub struct WeakCell {
    slot: Arc<WeakSlot>,
}

impl WeakCell {
    /// An empty cell.
    pub fn new() -> Self {
        Self { slot: Arc::new(WeakSlot { ptr: AtomicPtr::new(ptr::null_mut()) }) }
    }

    /// A cell already pointing at `object`.
    pub fn for_object(object: &Object) -> Self {
        let cell = Self::new();
        cell.set(Some(object));
        cell
    }

    /// Point the cell at `object`, or empty it with `None`.
    ///
    /// The previous pointee (if any, and if still alive) is unregistered.
    pub fn set(&self, object: Option<&Object>) {
        let _guard = CELL_LOCK.write();
        let old = self.slot.load();
        let new = object.map_or(ptr::null_mut(), |o| ptr::from_ref(o).cast_mut());
        if old == new {
            return;
        }
        if !old.is_null() {
            // SAFETY: a non-null slot pointer is kept valid by the pointee,
            // which cannot finish destruction without first taking the
            // writer lock we hold and clearing this slot.
            unsafe { &*old }.unregister_weak_slot(&self.slot);
        }
        self.slot.ptr.store(new, Ordering::Relaxed);
        if let Some(object) = object {
            object.register_weak_slot(Arc::clone(&self.slot));
            trace!(
                target: targets::WEAK,
                object = object.class().type_name(),
                "weak cell set"
            );
        }
    }

    /// Upgrade to a strong reference, or `None` if the pointee is gone.
    pub fn get(&self) -> Option<ObjectRef> {
        let _guard = CELL_LOCK.read();
        let p = self.slot.load();
        if p.is_null() {
            return None;
        }
        // SAFETY: under the reader lock a non-null slot pointer refers to an
        // object whose strong count is at least one (destruction clears all
        // slots under the writer lock before the count can drop to zero), so
        // incrementing it here is a valid upgrade.
        Some(unsafe { &*p }.to_ref())
    }

    /// Whether the cell currently points at `object`.
    ///
    /// Cheaper than `get` when no strong reference is needed.
    pub fn points_to(&self, object: &Object) -> bool {
        let _guard = CELL_LOCK.read();
        ptr::eq(self.slot.load(), object)
    }

    /// Whether the cell is empty. A `false` answer is already stale by the
    /// time the caller sees it; use `get` to act on the pointee.
    pub fn is_empty(&self) -> bool {
        let _guard = CELL_LOCK.read();
        self.slot.load().is_null()
    }
}

impl Default for WeakCell {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WeakCell {
    fn drop(&mut self) {
        self.set(None);
    }
}

impl std::fmt::Debug for WeakCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let empty = self.is_empty();
        f.debug_struct("WeakCell").field("empty", &empty).finish()
    }
}

// SAFETY: the slot pointer is only dereferenced under CELL_LOCK, which also
// guarantees the pointee is alive; the Arc'd slot itself is Sync.
unsafe impl Send for WeakCell {}
unsafe impl Sync for WeakCell {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Object, ObjectClass, ObjectImpl};
    use crate::param::ParamSpec;
    use crate::value::Value;
    use std::sync::OnceLock;

    struct Plain;

    impl ObjectImpl for Plain {
        fn class(&self) -> &Arc<ObjectClass> {
            static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
            CLASS.get_or_init(|| ObjectClass::builder::<Plain>("Plain").build())
        }

        fn property(&self, _obj: &Object, pspec: &Arc<ParamSpec>) -> Value {
            pspec.default_value().clone()
        }

        fn set_property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>, _value: &Value) {}
    }

    #[test]
    fn test_upgrade_while_alive() {
        let obj = Object::new(Plain);
        let cell = WeakCell::for_object(&obj);
        let strong = cell.get().unwrap();
        assert!(ObjectRef::ptr_eq(&strong, &obj));
    }

    #[test]
    fn test_empty_after_destruction() {
        let cell = WeakCell::new();
        {
            let obj = Object::new(Plain);
            cell.set(Some(&obj));
            assert!(!cell.is_empty());
        }
        assert!(cell.is_empty());
        assert!(cell.get().is_none());
    }

    #[test]
    fn test_reset_to_other_object() {
        let a = Object::new(Plain);
        let b = Object::new(Plain);
        let cell = WeakCell::for_object(&a);
        cell.set(Some(&b));
        assert!(ObjectRef::ptr_eq(&cell.get().unwrap(), &b));
        drop(a);
        assert!(ObjectRef::ptr_eq(&cell.get().unwrap(), &b));
    }

    #[test]
    fn test_set_none_detaches() {
        let obj = Object::new(Plain);
        let cell = WeakCell::for_object(&obj);
        cell.set(None);
        assert!(cell.get().is_none());
        // Destroying the object afterwards must not touch the detached cell.
        drop(obj);
    }

    #[test]
    fn test_concurrent_get_and_drop() {
        for _ in 0..64 {
            let obj = Object::new(Plain);
            let cell = Arc::new(WeakCell::for_object(&obj));

            let reader = {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    // Either a valid strong ref or None, never a dangle.
                    for _ in 0..16 {
                        if let Some(strong) = cell.get() {
                            let _ = strong.class().type_name();
                        }
                    }
                })
            };
            drop(obj);
            reader.join().unwrap();
            assert!(cell.get().is_none());
        }
    }
}
