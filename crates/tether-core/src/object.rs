//! The object core.
//!
//! An [`Object`] is a heap allocation owned by an atomic strong count and
//! freed when that count reaches zero. [`ObjectRef`] is the strong handle;
//! cloning increments, dropping decrements. On top of the plain count the
//! core layers:
//!
//! - **floating references** ([`FloatingRef`]): a provisional initial count
//!   that a container can adopt with [`Object::ref_sink`], so factory
//!   functions can hand out objects without forcing every caller to manage
//!   an extra reference;
//! - **toggle references** ([`Object::add_toggle_ref`]): a strong reference
//!   that wants to know when it becomes the only one left, used to break
//!   strong cycles with an external object registry;
//! - **weak notifications** ([`Object::weak_ref`]): one-shot callbacks run
//!   during destruction, after dispose;
//! - **keyed data**: a per-object string-keyed bag of `Any` values.
//!
//! Destruction is two-phase. When the last reference drops, the object first
//! runs `dispose` with the allocation still intact; dispose may take new
//! strong references ("resurrection"), which aborts destruction. Only when
//! the count is still one after dispose does the object clear its signal
//! handlers, run weak notifications, empty every [`WeakCell`] pointing at
//! it, and free the allocation.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use tracing::{debug, error, trace, warn};

use crate::error::{ObjectError, ObjectResult};
use crate::logging::targets;
use crate::notify;
use crate::param::ParamSpec;
use crate::signal::{parse_detailed_signal, HandlerId, HandlerKind, NotifyDispatch, SignalTable};
use crate::value::Value;
use crate::weak::{self, WeakCell, WeakSlot};

/// The initial reference is provisional and unowned until sunk.
const FLAG_FLOATING: u32 = 1 << 0;
/// At least one toggle reference is registered.
const FLAG_HAS_TOGGLE_REFS: u32 = 1 << 1;
/// At least one weak cell has ever pointed here; destruction must sweep.
const FLAG_HAS_WEAK_LOCATIONS: u32 = 1 << 2;

/// Identifies one weak-notification registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WeakNotifyId(u64);

/// Callback for toggle references. The flag is `true` when the toggle
/// reference just became the last strong reference, `false` when another
/// strong reference appeared.
pub type ToggleNotify = Arc<dyn Fn(&Object, bool) + Send + Sync>;

type WeakNotify = Box<dyn FnOnce(&Object) + Send>;

struct ObjectShared {
    weak_notifies: Vec<(WeakNotifyId, WeakNotify)>,
    next_weak_id: u64,
    toggle_refs: Vec<ToggleNotify>,
}

impl Default for ObjectShared {
    fn default() -> Self {
        Self { weak_notifies: Vec::new(), next_weak_id: 1, toggle_refs: Vec::new() }
    }
}

/// Behavior plugged into an [`Object`] by the type that defines it.
///
/// Implementations hold the object's actual state (typically in mutexes or
/// atomics, since objects are shared across threads) and mediate property
/// access for the specs their class declares.
pub trait ObjectImpl: Any + Send + Sync {
    /// The class shared by all instances of this type.
    fn class(&self) -> &Arc<ObjectClass>;

    /// Read the property described by `pspec`.
    fn property(&self, obj: &Object, pspec: &Arc<ParamSpec>) -> Value;

    /// Write the property described by `pspec`. The value has already been
    /// type-checked and clamped against the spec.
    fn set_property(&self, obj: &Object, pspec: &Arc<ParamSpec>, value: &Value);

    /// Release references to other objects. May run more than once; must be
    /// idempotent. The allocation is still fully usable during this call.
    fn dispose(&self, obj: &Object) {
        let _ = obj;
    }
}

/// Introspection data shared by all instances of one object type.
pub struct ObjectClass {
    type_name: &'static str,
    type_id: TypeId,
    properties: Vec<Arc<ParamSpec>>,
    signals: Vec<&'static str>,
}

impl ObjectClass {
    /// Start building the class for implementation type `T`.
    pub fn builder<T: ObjectImpl>(type_name: &'static str) -> ClassBuilder {
        ClassBuilder {
            type_name,
            type_id: TypeId::of::<T>(),
            properties: Vec::new(),
            signals: Vec::new(),
        }
    }

    /// The type name given at build time.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The `TypeId` of the implementation type.
    ///
    /// Deliberately not named `type_id`: with `std::any::Any` in scope that
    /// name resolves to the blanket `Any::type_id` on the `Arc` handle
    /// before auto-deref reaches this inherent method.
    pub fn impl_type_id(&self) -> TypeId {
        self.type_id
    }

    /// Look up a property spec by name.
    pub fn find_property(&self, name: &str) -> Option<&Arc<ParamSpec>> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// All declared property specs.
    pub fn properties(&self) -> &[Arc<ParamSpec>] {
        &self.properties
    }

    /// Whether `name` is a declared signal. Every class implicitly declares
    /// "notify".
    pub fn has_signal(&self, name: &str) -> bool {
        name == "notify" || self.signals.iter().any(|s| *s == name)
    }

    /// All explicitly declared signal names.
    pub fn signals(&self) -> &[&'static str] {
        &self.signals
    }
}

impl fmt::Debug for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectClass").field("type_name", &self.type_name).finish_non_exhaustive()
    }
}

/// Builder for [`ObjectClass`].
pub struct ClassBuilder {
    type_name: &'static str,
    type_id: TypeId,
    properties: Vec<Arc<ParamSpec>>,
    signals: Vec<&'static str>,
}

impl ClassBuilder {
    /// Declare a property. A duplicate name is rejected with an error log.
    pub fn property(mut self, spec: Arc<ParamSpec>) -> Self {
        if self.properties.iter().any(|p| p.name() == spec.name()) {
            error!(
                target: targets::OBJECT,
                type_name = self.type_name,
                property = spec.name(),
                "duplicate property declaration ignored"
            );
            return self;
        }
        self.properties.push(spec);
        self
    }

    /// Declare a signal. A duplicate name is rejected with an error log.
    pub fn signal(mut self, name: &'static str) -> Self {
        if name == "notify" || self.signals.contains(&name) {
            error!(
                target: targets::OBJECT,
                type_name = self.type_name,
                signal = name,
                "duplicate signal declaration ignored"
            );
            return self;
        }
        self.signals.push(name);
        self
    }

    pub fn build(self) -> Arc<ObjectClass> {
        Arc::new(ObjectClass {
            type_name: self.type_name,
            type_id: self.type_id,
            properties: self.properties,
            signals: self.signals,
        })
    }
}

/// A reference-counted object.
///
/// `Object` is only ever handled through [`ObjectRef`], [`FloatingRef`] or a
/// borrowed `&Object`; the allocation is owned by the strong count.
pub struct Object {
    strong: AtomicUsize,
    flags: AtomicU32,
    shared: Mutex<ObjectShared>,
    data: Mutex<HashMap<String, Box<dyn Any + Send + Sync>>>,
    notify_queue: notify::QueueSlot,
    signals: Mutex<SignalTable>,
    weak_locations: Mutex<Vec<Arc<WeakSlot>>>,
    imp: Box<dyn ObjectImpl>,
}

impl Object {
    fn alloc(imp: impl ObjectImpl, flags: u32) -> NonNull<Object> {
        let obj = Box::new(Object {
            strong: AtomicUsize::new(1),
            flags: AtomicU32::new(flags),
            shared: Mutex::new(ObjectShared::default()),
            data: Mutex::new(HashMap::new()),
            notify_queue: Mutex::new(None),
            signals: Mutex::new(SignalTable::default()),
            weak_locations: Mutex::new(Vec::new()),
            imp: Box::new(imp),
        });
        debug_assert_eq!(
            obj.class().impl_type_id(),
            (&*obj.imp as &dyn Any).type_id(),
            "class was built for a different implementation type"
        );
        trace!(target: targets::OBJECT, object = obj.class().type_name(), "created");
        NonNull::from(Box::leak(obj))
    }

    /// Create an object with one owned strong reference.
    pub fn new(imp: impl ObjectImpl) -> ObjectRef {
        ObjectRef { ptr: Self::alloc(imp, 0) }
    }

    /// Create an object whose initial reference is floating.
    pub fn new_floating(imp: impl ObjectImpl) -> FloatingRef {
        FloatingRef { ptr: Self::alloc(imp, FLAG_FLOATING) }
    }

    /// The object's class.
    pub fn class(&self) -> &Arc<ObjectClass> {
        self.imp.class()
    }

    /// Whether the implementation type is `T`.
    pub fn is_a<T: ObjectImpl>(&self) -> bool {
        self.class().impl_type_id() == TypeId::of::<T>()
    }

    /// Borrow the implementation as its concrete type.
    pub fn downcast_impl<T: ObjectImpl>(&self) -> Option<&T> {
        (&*self.imp as &dyn Any).downcast_ref::<T>()
    }

    /// The current strong count. Only a snapshot; useful for assertions and
    /// diagnostics, not for control flow.
    pub fn ref_count(&self) -> usize {
        self.strong.load(Ordering::Acquire)
    }

    /// Take a new strong reference.
    pub fn to_ref(&self) -> ObjectRef {
        let old = self.strong.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old > 0);
        if old == 1 && self.has_flag(FLAG_HAS_TOGGLE_REFS) {
            self.toggle_refs_notify(false);
        }
        ObjectRef { ptr: NonNull::from(self) }
    }

    /// A new weak cell pointing at this object.
    pub fn downgrade(&self) -> WeakCell {
        WeakCell::for_object(self)
    }

    fn has_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Relaxed) & flag != 0
    }

    fn set_flag(&self, flag: u32) {
        self.flags.fetch_or(flag, Ordering::Relaxed);
    }

    /// Clear `flag`, returning whether it was previously set.
    fn clear_flag(&self, flag: u32) -> bool {
        self.flags.fetch_and(!flag, Ordering::Relaxed) & flag != 0
    }

    // --- floating references ------------------------------------------------

    /// Whether the initial reference is still floating.
    pub fn is_floating(&self) -> bool {
        self.has_flag(FLAG_FLOATING)
    }

    /// Take a strong reference, adopting the floating reference if one is
    /// still pending.
    ///
    /// When the object was floating, the provisional count transfers to the
    /// returned reference and the overall count does not change; otherwise
    /// this is a plain [`to_ref`](Self::to_ref).
    pub fn ref_sink(&self) -> ObjectRef {
        let strong = self.to_ref();
        if self.clear_flag(FLAG_FLOATING) {
            // Adopted the provisional count; give back the one taken above.
            // SAFETY: `strong` still holds a count, so this cannot destroy.
            unsafe { object_unref(NonNull::from(self)) };
        }
        strong
    }

    // --- toggle references --------------------------------------------------

    /// Register a toggle reference.
    ///
    /// Holds a strong reference until [`remove_toggle_ref`]
    /// (Self::remove_toggle_ref). While exactly one toggle reference is
    /// registered, `notify` fires with `true` when it becomes the last
    /// strong reference and `false` when a second one appears. With two or
    /// more registered, notifications are suppressed entirely.
    pub fn add_toggle_ref(&self, notify: ToggleNotify) {
        std::mem::forget(self.to_ref());
        let mut shared = self.shared.lock();
        shared.toggle_refs.push(notify);
        if shared.toggle_refs.len() == 1 {
            self.set_flag(FLAG_HAS_TOGGLE_REFS);
        } else {
            warn!(
                target: targets::OBJECT,
                object = self.class().type_name(),
                count = shared.toggle_refs.len(),
                "multiple toggle references registered; notifications are suppressed"
            );
        }
    }

    /// Unregister a toggle reference, releasing the strong reference it
    /// held. The callback is matched by `Arc` identity.
    pub fn remove_toggle_ref(&self, notify: &ToggleNotify) {
        let found = {
            let mut shared = self.shared.lock();
            let pos = shared.toggle_refs.iter().position(|t| Arc::ptr_eq(t, notify));
            let removed = pos.map(|i| shared.toggle_refs.remove(i));
            if removed.is_some() && shared.toggle_refs.is_empty() {
                self.clear_flag(FLAG_HAS_TOGGLE_REFS);
            }
            removed
        };
        match found {
            Some(_cb) => {
                // SAFETY: releases the count taken by add_toggle_ref.
                unsafe { object_unref(NonNull::from(self)) };
            }
            None => warn!(
                target: targets::OBJECT,
                object = self.class().type_name(),
                "remove_toggle_ref: no matching toggle reference"
            ),
        }
    }

    fn toggle_refs_notify(&self, is_last_ref: bool) {
        let cb = {
            let shared = self.shared.lock();
            match shared.toggle_refs.as_slice() {
                [only] => Some(Arc::clone(only)),
                _ => None,
            }
        };
        if let Some(cb) = cb {
            cb(self, is_last_ref);
        }
    }

    // --- weak notifications -------------------------------------------------

    /// Register a one-shot callback run while the object is being destroyed,
    /// after dispose. Callbacks run in registration order.
    pub fn weak_ref(&self, notify: impl FnOnce(&Object) + Send + 'static) -> WeakNotifyId {
        let mut shared = self.shared.lock();
        let id = WeakNotifyId(shared.next_weak_id);
        shared.next_weak_id += 1;
        shared.weak_notifies.push((id, Box::new(notify)));
        id
    }

    /// Cancel a weak notification. Returns `false` when the registration no
    /// longer exists, which includes the case where it already fired.
    pub fn weak_unref(&self, id: WeakNotifyId) -> bool {
        let removed = {
            let mut shared = self.shared.lock();
            shared
                .weak_notifies
                .iter()
                .position(|(i, _)| *i == id)
                .map(|idx| shared.weak_notifies.remove(idx))
        };
        removed.is_some()
    }

    // --- weak cell registry (called from weak.rs under the global lock) -----

    pub(crate) fn register_weak_slot(&self, slot: Arc<WeakSlot>) {
        self.weak_locations.lock().push(slot);
        self.set_flag(FLAG_HAS_WEAK_LOCATIONS);
    }

    pub(crate) fn unregister_weak_slot(&self, slot: &Arc<WeakSlot>) {
        self.weak_locations.lock().retain(|s| !Arc::ptr_eq(s, slot));
    }

    /// Empty every weak cell pointing here. Caller holds the global cell
    /// writer lock.
    fn clear_weak_locations(&self) {
        let mut slots = self.weak_locations.lock();
        for slot in slots.drain(..) {
            slot.clear();
        }
    }

    // --- keyed data -----------------------------------------------------------

    /// Associate `value` with `key`, replacing any previous value.
    pub fn set_data<T: Any + Send + Sync>(&self, key: &str, value: T) {
        let old = self.data.lock().insert(key.to_string(), Box::new(value));
        drop(old);
    }

    /// Borrow the value under `key` as `T`.
    pub fn with_data<T: Any, R>(&self, key: &str, f: impl FnOnce(&T) -> R) -> Option<R> {
        let map = self.data.lock();
        map.get(key)?.downcast_ref::<T>().map(f)
    }

    /// Clone the value under `key` out of the bag.
    pub fn dup_data<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.data.lock().get(key)?.downcast_ref::<T>().cloned()
    }

    /// Remove and return the value under `key`.
    ///
    /// A value of a different type is left in place and `None` is returned.
    pub fn steal_data<T: Any>(&self, key: &str) -> Option<T> {
        let boxed = self.data.lock().remove(key)?;
        match boxed.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(boxed) => {
                self.data.lock().insert(key.to_string(), boxed);
                None
            }
        }
    }

    /// Remove the value under `key`, dropping it. Returns whether a value
    /// existed.
    pub fn remove_data(&self, key: &str) -> bool {
        let old = self.data.lock().remove(key);
        old.is_some()
    }

    /// Compare-and-swap on the bag: replace the value under `key` with
    /// `new` only if the current value equals `expected` (`None` meaning
    /// absent, or present with a different type). Returns whether the swap
    /// happened.
    pub fn replace_data<T: Any + Send + Sync + PartialEq>(
        &self,
        key: &str,
        expected: Option<&T>,
        new: Option<T>,
    ) -> bool {
        let mut replaced = None;
        let swapped = {
            let mut map = self.data.lock();
            let current = map.get(key).and_then(|b| b.downcast_ref::<T>());
            if current != expected {
                false
            } else {
                replaced = match new {
                    Some(v) => map.insert(key.to_string(), Box::new(v)),
                    None => map.remove(key),
                };
                true
            }
        };
        drop(replaced);
        swapped
    }

    // --- properties -----------------------------------------------------------

    /// Read a property by name.
    pub fn property(&self, name: &str) -> ObjectResult<Value> {
        let pspec = self
            .class()
            .find_property(name)
            .cloned()
            .ok_or_else(|| ObjectError::PropertyNotFound { name: name.to_string() })?;
        if !pspec.flags().readable {
            return Err(ObjectError::PropertyNotReadable { name: name.to_string() });
        }
        Ok(self.imp.property(self, &pspec))
    }

    /// Write a property by name.
    ///
    /// The value is converted to the property's type when possible and
    /// clamped into its bounds. Unless the spec opts into explicit
    /// notification, a change notification is queued and dispatched (or held
    /// if the object is frozen).
    pub fn set_property(&self, name: &str, value: Value) -> ObjectResult<()> {
        let pspec = self
            .class()
            .find_property(name)
            .cloned()
            .ok_or_else(|| ObjectError::PropertyNotFound { name: name.to_string() })?;
        if !pspec.flags().writable {
            return Err(ObjectError::PropertyNotWritable { name: name.to_string() });
        }
        let mut value = if value.value_type() == pspec.value_type() {
            value
        } else {
            let got = value.value_type().name();
            value.transform(pspec.value_type()).ok_or(ObjectError::PropertyTypeMismatch {
                name: name.to_string(),
                expected: pspec.value_type().name(),
                got,
            })?
        };
        if !pspec.validate(&mut value) {
            debug!(
                target: targets::OBJECT,
                object = self.class().type_name(),
                property = name,
                "value clamped to property bounds"
            );
        }

        notify::freeze(&self.notify_queue);
        self.imp.set_property(self, &pspec, &value);
        if !pspec.flags().explicit_notify {
            notify::add(&self.notify_queue, &pspec);
        }
        self.thaw_and_dispatch();
        Ok(())
    }

    /// Queue a change notification for the named property.
    pub fn notify(&self, name: &str) {
        match self.class().find_property(name).cloned() {
            Some(pspec) => self.notify_by_pspec(&pspec),
            None => warn!(
                target: targets::NOTIFY,
                object = self.class().type_name(),
                property = name,
                "notify for unknown property"
            ),
        }
    }

    /// Queue a change notification for `pspec`. Dispatches immediately
    /// unless notifications are frozen.
    pub fn notify_by_pspec(&self, pspec: &Arc<ParamSpec>) {
        notify::freeze(&self.notify_queue);
        notify::add(&self.notify_queue, pspec);
        self.thaw_and_dispatch();
    }

    /// Hold back change notifications until the matching
    /// [`thaw_notify`](Self::thaw_notify). Nests.
    pub fn freeze_notify(&self) {
        notify::freeze(&self.notify_queue);
    }

    /// Release one freeze. When the last freeze is released, held
    /// notifications dispatch, deduplicated per property.
    pub fn thaw_notify(&self) {
        self.thaw_and_dispatch();
    }

    fn thaw_and_dispatch(&self) {
        if let Some(pending) = notify::thaw(&self.notify_queue) {
            self.dispatch_notifications(pending);
        }
    }

    fn dispatch_notifications(&self, pending: Vec<Arc<ParamSpec>>) {
        for pspec in pending {
            let matched = self.signals.lock().collect_notify(&pspec);
            for dispatch in matched {
                match dispatch {
                    NotifyDispatch::Notify(cb) => cb(self, &pspec),
                    NotifyDispatch::Signal(cb) => {
                        cb(self, &[Value::Str(pspec.name().to_string())]);
                    }
                }
            }
        }
    }

    // --- signals ----------------------------------------------------------------

    /// Connect a handler to a signal, by plain name or detailed form
    /// `"name::detail"`. The signal must be declared on the class.
    pub fn connect(
        &self,
        detailed: &str,
        callback: impl Fn(&Object, &[Value]) + Send + Sync + 'static,
    ) -> ObjectResult<HandlerId> {
        self.connect_full(detailed, false, callback)
    }

    /// Like [`connect`](Self::connect), but the handler runs after all
    /// normally connected handlers.
    pub fn connect_after(
        &self,
        detailed: &str,
        callback: impl Fn(&Object, &[Value]) + Send + Sync + 'static,
    ) -> ObjectResult<HandlerId> {
        self.connect_full(detailed, true, callback)
    }

    pub fn connect_full(
        &self,
        detailed: &str,
        after: bool,
        callback: impl Fn(&Object, &[Value]) + Send + Sync + 'static,
    ) -> ObjectResult<HandlerId> {
        let (name, detail) = parse_detailed_signal(detailed)?;
        if !self.class().has_signal(name) {
            return Err(ObjectError::SignalNotFound { name: name.to_string() });
        }
        let id = self.signals.lock().insert(
            name.to_string(),
            detail.map(str::to_string),
            after,
            HandlerKind::Signal(Arc::new(callback)),
        );
        Ok(id)
    }

    /// Connect a property-change handler, optionally filtered to one
    /// property.
    pub fn connect_notify(
        &self,
        property: Option<&str>,
        callback: impl Fn(&Object, &Arc<ParamSpec>) + Send + Sync + 'static,
    ) -> HandlerId {
        if let Some(name) = property {
            if self.class().find_property(name).is_none() {
                warn!(
                    target: targets::SIGNAL,
                    object = self.class().type_name(),
                    property = name,
                    "connect_notify for unknown property"
                );
            }
        }
        self.signals.lock().insert(
            "notify".to_string(),
            property.map(str::to_string),
            false,
            HandlerKind::Notify(Arc::new(callback)),
        )
    }

    /// Emit a signal. Handlers run on the calling thread, in connection
    /// order with "after" handlers last, with no table lock held.
    pub fn emit(&self, signal: &str, args: &[Value]) -> ObjectResult<()> {
        self.emit_internal(signal, None, args)
    }

    /// Emit a signal with a detail; handlers connected with a different
    /// detail are skipped.
    pub fn emit_with_detail(&self, signal: &str, detail: &str, args: &[Value]) -> ObjectResult<()> {
        self.emit_internal(signal, Some(detail), args)
    }

    fn emit_internal(&self, signal: &str, detail: Option<&str>, args: &[Value]) -> ObjectResult<()> {
        if !self.class().has_signal(signal) {
            return Err(ObjectError::SignalNotFound { name: signal.to_string() });
        }
        let handlers = self.signals.lock().collect_signal(signal, detail);
        for cb in handlers {
            cb(self, args);
        }
        Ok(())
    }

    /// Disconnect a handler. Returns whether it was still connected.
    pub fn disconnect(&self, id: HandlerId) -> bool {
        let removed = self.signals.lock().remove(id);
        removed.is_some()
    }

    /// Block a handler; blocked handlers are skipped by emission. Blocks
    /// nest.
    pub fn handler_block(&self, id: HandlerId) {
        if !self.signals.lock().block(id) {
            warn!(target: targets::SIGNAL, "handler_block: unknown handler");
        }
    }

    /// Undo one [`handler_block`](Self::handler_block).
    pub fn handler_unblock(&self, id: HandlerId) {
        if !self.signals.lock().unblock(id) {
            warn!(target: targets::SIGNAL, "handler_unblock: handler not blocked");
        }
    }

    pub fn handler_is_connected(&self, id: HandlerId) -> bool {
        self.signals.lock().contains(id)
    }

    // --- teardown ----------------------------------------------------------------

    /// Run dispose without releasing any reference, to break reference
    /// cycles on demand. Notifications are frozen across the call.
    pub fn run_dispose(&self) {
        let _guard = self.to_ref();
        notify::freeze(&self.notify_queue);
        self.imp.dispose(self);
        self.thaw_and_dispatch();
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("type_name", &self.class().type_name())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// Release one strong count, destroying the object when it was the last.
///
/// # Safety
///
/// The caller must own one strong count on the pointee.
unsafe fn object_unref(ptr: NonNull<Object>) {
    let obj = unsafe { ptr.as_ref() };
    loop {
        let mut count = obj.strong.load(Ordering::Acquire);

        // Fast path: not the last reference.
        while count > 1 {
            match obj.strong.compare_exchange_weak(
                count,
                count - 1,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if count == 2 && obj.has_flag(FLAG_HAS_TOGGLE_REFS) {
                        obj.toggle_refs_notify(true);
                    }
                    return;
                }
                Err(actual) => count = actual,
            }
        }
        if count == 0 {
            error!(target: targets::OBJECT, "unref of an already destroyed object");
            return;
        }

        // Last reference. Weak cells must be emptied before the count can
        // drop, and a concurrent upgrade may still revive the object; the
        // writer lock serializes against every upgrade.
        if obj.has_flag(FLAG_HAS_WEAK_LOCATIONS) {
            let guard = weak::write_guard();
            if obj.strong.load(Ordering::Acquire) != 1 {
                drop(guard);
                continue;
            }
            obj.clear_weak_locations();
            drop(guard);
        }

        notify::freeze(&obj.notify_queue);
        trace!(target: targets::OBJECT, object = obj.class().type_name(), "dispose");
        obj.imp.dispose(obj);

        // Dispose may have taken new strong references.
        if obj.strong.load(Ordering::Acquire) != 1 {
            trace!(
                target: targets::OBJECT,
                object = obj.class().type_name(),
                "object survived dispose"
            );
            if let Some(pending) = notify::thaw(&obj.notify_queue) {
                obj.dispatch_notifications(pending);
            }
            continue;
        }

        // Point of no return for user code: drop all signal handlers, then
        // run the one-shot weak notifications.
        let handlers = obj.signals.lock().clear_all();
        drop(handlers);

        let notifies: Vec<(WeakNotifyId, WeakNotify)> =
            std::mem::take(&mut obj.shared.lock().weak_notifies);
        for (_, cb) in notifies {
            cb(obj);
        }

        // Cells pointed here during dispose or the callbacks above still
        // see the object; sweep them too.
        if obj.has_flag(FLAG_HAS_WEAK_LOCATIONS) {
            let guard = weak::write_guard();
            if obj.strong.load(Ordering::Acquire) != 1 {
                drop(guard);
                if let Some(pending) = notify::thaw(&obj.notify_queue) {
                    obj.dispatch_notifications(pending);
                }
                continue;
            }
            obj.clear_weak_locations();
            drop(guard);
        }

        let old = obj.strong.fetch_sub(1, Ordering::Release);
        if old == 1 {
            fence(Ordering::Acquire);
            trace!(target: targets::OBJECT, object = obj.class().type_name(), "finalize");
            // SAFETY: the count reached zero; no strong handle remains and
            // every weak cell was emptied under the writer lock.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
        } else {
            error!(
                target: targets::OBJECT,
                "object revived during weak notification; this is a bug in the caller"
            );
            if let Some(pending) = notify::thaw(&obj.notify_queue) {
                obj.dispatch_notifications(pending);
            }
        }
        return;
    }
}

/// An owned strong reference to an [`Object`].
pub struct ObjectRef {
    ptr: NonNull<Object>,
}

impl ObjectRef {
    /// Whether two references point at the same object.
    pub fn ptr_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
        a.ptr == b.ptr
    }

    /// Convert this reference into a floating one.
    ///
    /// The owned count becomes the provisional count of the returned
    /// [`FloatingRef`]; the next [`Object::ref_sink`] adopts it.
    pub fn force_floating(self) -> FloatingRef {
        self.set_flag(FLAG_FLOATING);
        let ptr = self.ptr;
        std::mem::forget(self);
        FloatingRef { ptr }
    }
}

impl Deref for ObjectRef {
    type Target = Object;

    fn deref(&self) -> &Object {
        // SAFETY: the strong count owned by this handle keeps the
        // allocation alive.
        unsafe { self.ptr.as_ref() }
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        self.deref().to_ref()
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        // SAFETY: this handle owns one strong count.
        unsafe { object_unref(self.ptr) }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.deref(), f)
    }
}

// SAFETY: Object is Send + Sync (asserted below); the raw pointer is only a
// lifetime-erased strong handle.
unsafe impl Send for ObjectRef {}
unsafe impl Sync for ObjectRef {}

/// An object whose initial reference has not been claimed yet.
///
/// Dropping a `FloatingRef` destroys the object unless someone called
/// [`Object::ref_sink`] in the meantime; whoever sinks first adopts the
/// provisional count.
pub struct FloatingRef {
    ptr: NonNull<Object>,
}

impl FloatingRef {
    /// Claim the provisional count as an owned strong reference.
    ///
    /// Falls back to a plain new reference when another party already sank
    /// the floating reference.
    pub fn into_strong(self) -> ObjectRef {
        let sank = self.clear_flag(FLAG_FLOATING);
        let strong = if sank { ObjectRef { ptr: self.ptr } } else { self.to_ref() };
        std::mem::forget(self);
        strong
    }
}

impl Deref for FloatingRef {
    type Target = Object;

    fn deref(&self) -> &Object {
        // SAFETY: the provisional count keeps the allocation alive until
        // this handle is consumed or dropped.
        unsafe { self.ptr.as_ref() }
    }
}

impl Drop for FloatingRef {
    fn drop(&mut self) {
        if self.clear_flag(FLAG_FLOATING) {
            // Nobody sank the reference; the provisional count is ours.
            // SAFETY: this handle owns the provisional strong count.
            unsafe { object_unref(self.ptr) }
        }
    }
}

impl fmt::Debug for FloatingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.deref(), f)
    }
}

// SAFETY: same reasoning as ObjectRef.
unsafe impl Send for FloatingRef {}
unsafe impl Sync for FloatingRef {}

assert_impl_all!(Object: Send, Sync);
assert_impl_all!(ObjectRef: Send, Sync);
