//! Signal groups.
//!
//! A [`SignalGroup`] bundles a set of signal-handler registrations that
//! connect to whichever object is currently the group's target. Retargeting
//! disconnects everything from the old target and reconnects to the new one;
//! blocking the group blocks every handler at once, and the block depth
//! carries across retargets.
//!
//! All registrations must be made before the first target is set; connecting
//! afterwards is a caller bug and is rejected with an error log.

use std::any::TypeId;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, trace};

use crate::logging::targets;
use crate::object::{Object, ObjectImpl, ObjectRef, WeakNotifyId};
use crate::signal::HandlerId;
use crate::value::Value;
use crate::weak::WeakCell;

enum GroupClosure {
    /// Invoked with the emitting object and the emission arguments.
    Plain(Arc<dyn Fn(&Object, &[Value]) + Send + Sync>),
    /// Invoked with the arguments only.
    Swapped(Arc<dyn Fn(&[Value]) + Send + Sync>),
    /// Invoked with the watched object first; skipped once it is gone.
    Watched {
        callback: Arc<dyn Fn(&ObjectRef, &Object, &[Value]) + Send + Sync>,
        watch: Arc<WeakCell>,
    },
}

impl GroupClosure {
    /// Whether the registration is still worth keeping. Only a dead watch
    /// retires a registration.
    fn is_live(&self) -> bool {
        match self {
            Self::Watched { watch, .. } => !watch.is_empty(),
            _ => true,
        }
    }
}

struct Registration {
    signal: String,
    detail: Option<String>,
    after: bool,
    closure: GroupClosure,
    handler: Option<HandlerId>,
}

struct GroupState {
    target: WeakCell,
    target_weak: Option<WeakNotifyId>,
    /// Bumped on every retarget; a death notification carrying an older
    /// value is stale and must not touch the state.
    epoch: u64,
    registrations: Vec<Registration>,
    block_count: usize,
    has_bound: bool,
    bind_handlers: Vec<Arc<dyn Fn(&ObjectRef) + Send + Sync>>,
    unbind_handlers: Vec<Arc<dyn Fn() + Send + Sync>>,
}

struct SignalGroupInner {
    target_type: TypeId,
    type_name: &'static str,
    state: Mutex<GroupState>,
}

/// A retargetable bundle of signal handlers.
#[derive(Clone)]
pub struct SignalGroup {
    inner: Arc<SignalGroupInner>,
}

impl SignalGroup {
    /// A group whose targets must be instances of `T`.
    pub fn new<T: ObjectImpl>() -> Self {
        Self {
            inner: Arc::new(SignalGroupInner {
                target_type: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                state: Mutex::new(GroupState {
                    target: WeakCell::new(),
                    target_weak: None,
                    epoch: 0,
                    registrations: Vec::new(),
                    block_count: 0,
                    has_bound: false,
                    bind_handlers: Vec::new(),
                    unbind_handlers: Vec::new(),
                }),
            }),
        }
    }

    /// The current target, while it is alive.
    pub fn target(&self) -> Option<ObjectRef> {
        self.inner.state.lock().target.get()
    }

    /// Connect a handler to a (possibly detailed) signal on future targets.
    pub fn connect(
        &self,
        detailed: &str,
        callback: impl Fn(&Object, &[Value]) + Send + Sync + 'static,
    ) {
        self.register(detailed, false, GroupClosure::Plain(Arc::new(callback)));
    }

    /// Like [`connect`](Self::connect), running after normal handlers.
    pub fn connect_after(
        &self,
        detailed: &str,
        callback: impl Fn(&Object, &[Value]) + Send + Sync + 'static,
    ) {
        self.register(detailed, true, GroupClosure::Plain(Arc::new(callback)));
    }

    /// Connect a handler that only receives the emission arguments.
    pub fn connect_swapped(
        &self,
        detailed: &str,
        callback: impl Fn(&[Value]) + Send + Sync + 'static,
    ) {
        self.register(detailed, false, GroupClosure::Swapped(Arc::new(callback)));
    }

    /// Connect a handler bound to the lifetime of `object`: the callback
    /// receives `object` first and stops firing once it is destroyed.
    pub fn connect_object(
        &self,
        detailed: &str,
        object: &Object,
        callback: impl Fn(&ObjectRef, &Object, &[Value]) + Send + Sync + 'static,
    ) {
        self.register(
            detailed,
            false,
            GroupClosure::Watched {
                callback: Arc::new(callback),
                watch: Arc::new(WeakCell::for_object(object)),
            },
        );
    }

    fn register(&self, detailed: &str, after: bool, closure: GroupClosure) {
        let (name, detail) = match crate::signal::parse_detailed_signal(detailed) {
            Ok(parts) => parts,
            Err(err) => {
                error!(target: targets::SIGNAL_GROUP, %err, "connect rejected");
                return;
            }
        };
        let mut state = self.inner.state.lock();
        if state.has_bound {
            error!(
                target: targets::SIGNAL_GROUP,
                signal = detailed,
                "cannot add signals after the first target has been set"
            );
            return;
        }
        state.registrations.retain(|r| r.closure.is_live());
        state.registrations.push(Registration {
            signal: name.to_string(),
            detail: detail.map(str::to_string),
            after,
            closure,
            handler: None,
        });
    }

    /// Run `callback` with each new target right after the group's handlers
    /// are connected to it.
    pub fn connect_bind(&self, callback: impl Fn(&ObjectRef) + Send + Sync + 'static) {
        self.inner.state.lock().bind_handlers.push(Arc::new(callback));
    }

    /// Run `callback` whenever the group loses its target, either through
    /// retargeting or because the target was destroyed.
    pub fn connect_unbind(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner.state.lock().unbind_handlers.push(Arc::new(callback));
    }

    /// Retarget the group.
    ///
    /// A target of the wrong type is treated as `None` after an error log.
    /// Setting the current target again is a no-op.
    pub fn set_target(&self, target: Option<&Object>) {
        let target = match target {
            Some(t) if t.class().impl_type_id() != self.inner.target_type => {
                error!(
                    target: targets::SIGNAL_GROUP,
                    expected = self.inner.type_name,
                    got = t.class().type_name(),
                    "target has the wrong type"
                );
                None
            }
            other => other,
        };

        let (unbind, bind) = {
            let mut state = self.inner.state.lock();
            match target {
                Some(t) if state.target.points_to(t) => return,
                None if !state.has_bound => return,
                None if state.target.is_empty() && state.target_weak.is_none() => return,
                _ => {}
            }

            state.epoch += 1;
            let epoch = state.epoch;
            let unbind = self.detach_locked(&mut state);
            state.target.set(target);

            let bind = target.map(|t| {
                let weak_inner = Arc::downgrade(&self.inner);
                state.target_weak = Some(t.weak_ref(move |_| target_died(&weak_inner, epoch)));
                state.has_bound = true;
                self.attach_locked(&mut state, t);
                (state.bind_handlers.clone(), t.to_ref())
            });
            (unbind, bind)
        };

        // User callbacks run with the state lock released.
        if let Some(handlers) = unbind {
            for cb in handlers {
                cb();
            }
        }
        if let Some((handlers, strong)) = bind {
            trace!(
                target: targets::SIGNAL_GROUP,
                target_type = self.inner.type_name,
                "target bound"
            );
            for cb in handlers {
                cb(&strong);
            }
        }
    }

    /// Disconnect from the current target, returning the unbind callbacks
    /// to fire if there was one.
    fn detach_locked(&self, state: &mut GroupState) -> Option<Vec<Arc<dyn Fn() + Send + Sync>>> {
        let had_target = state.target_weak.is_some();
        if let Some(old) = state.target.get() {
            if let Some(id) = state.target_weak.take() {
                old.weak_unref(id);
            }
            for reg in &mut state.registrations {
                if let Some(id) = reg.handler.take() {
                    old.disconnect(id);
                }
            }
        } else {
            state.target_weak = None;
            for reg in &mut state.registrations {
                reg.handler = None;
            }
        }
        had_target.then(|| state.unbind_handlers.clone())
    }

    /// Connect every registration to `target`, reapplying the block depth.
    fn attach_locked(&self, state: &mut GroupState, target: &Object) {
        state.registrations.retain(|r| r.closure.is_live());
        let block_count = state.block_count;
        for reg in &mut state.registrations {
            let callback: Arc<dyn Fn(&Object, &[Value]) + Send + Sync> = match &reg.closure {
                GroupClosure::Plain(cb) => Arc::clone(cb),
                GroupClosure::Swapped(cb) => {
                    let cb = Arc::clone(cb);
                    Arc::new(move |_, args| cb(args))
                }
                GroupClosure::Watched { callback, watch } => {
                    let cb = Arc::clone(callback);
                    let watch = Arc::clone(watch);
                    Arc::new(move |obj, args| {
                        if let Some(watched) = watch.get() {
                            cb(&watched, obj, args);
                        }
                    })
                }
            };
            let detailed = match &reg.detail {
                Some(detail) => format!("{}::{}", reg.signal, detail),
                None => reg.signal.clone(),
            };
            match target.connect_full(&detailed, reg.after, move |obj, args| callback(obj, args)) {
                Ok(id) => {
                    for _ in 0..block_count {
                        target.handler_block(id);
                    }
                    reg.handler = Some(id);
                }
                Err(err) => {
                    error!(
                        target: targets::SIGNAL_GROUP,
                        signal = detailed,
                        %err,
                        "signal not available on target"
                    );
                }
            }
        }
    }

    /// Block every handler in the group. Blocks nest and survive retargets.
    pub fn block(&self) {
        let mut state = self.inner.state.lock();
        state.block_count += 1;
        if let Some(target) = state.target.get() {
            for reg in &state.registrations {
                if let Some(id) = reg.handler {
                    target.handler_block(id);
                }
            }
        }
    }

    /// Undo one [`block`](Self::block).
    pub fn unblock(&self) {
        let mut state = self.inner.state.lock();
        if state.block_count == 0 {
            error!(target: targets::SIGNAL_GROUP, "unblock without matching block");
            return;
        }
        state.block_count -= 1;
        if let Some(target) = state.target.get() {
            for reg in &state.registrations {
                if let Some(id) = reg.handler {
                    target.handler_unblock(id);
                }
            }
        }
    }
}

/// Death hook for the target bound at `epoch`. The target's handler table is
/// already gone; only the group's book-keeping needs resetting.
///
/// A retarget from the dying object's dispose advances the epoch, so this
/// notification arrives stale and must leave the fresh binding alone.
fn target_died(weak_inner: &Weak<SignalGroupInner>, epoch: u64) {
    let Some(inner) = weak_inner.upgrade() else { return };
    let unbind = {
        let mut state = inner.state.lock();
        if state.epoch != epoch {
            return;
        }
        state.target_weak = None;
        state.target.set(None);
        for reg in &mut state.registrations {
            reg.handler = None;
        }
        state.unbind_handlers.clone()
    };
    trace!(target: targets::SIGNAL_GROUP, "target destroyed");
    for cb in unbind {
        cb();
    }
}

impl std::fmt::Debug for SignalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SignalGroup")
            .field("target_type", &self.inner.type_name)
            .field("has_target", &!state.target.is_empty())
            .field("handlers", &state.registrations.len())
            .finish()
    }
}

impl Drop for SignalGroupInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(target) = state.target.get() {
            if let Some(id) = state.target_weak.take() {
                target.weak_unref(id);
            }
            for reg in &mut state.registrations {
                if let Some(id) = reg.handler.take() {
                    target.disconnect(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectClass;
    use crate::param::ParamSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    struct Player;

    impl Player {
        fn new() -> ObjectRef {
            Object::new(Self)
        }
    }

    impl ObjectImpl for Player {
        fn class(&self) -> &Arc<ObjectClass> {
            static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
            CLASS.get_or_init(|| {
                ObjectClass::builder::<Player>("Player")
                    .signal("started")
                    .signal("stopped")
                    .build()
            })
        }

        fn property(&self, _obj: &Object, pspec: &Arc<ParamSpec>) -> Value {
            pspec.default_value().clone()
        }

        fn set_property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>, _value: &Value) {}
    }

    struct Other;

    impl ObjectImpl for Other {
        fn class(&self) -> &Arc<ObjectClass> {
            static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
            CLASS.get_or_init(|| ObjectClass::builder::<Other>("Other").build())
        }

        fn property(&self, _obj: &Object, pspec: &Arc<ParamSpec>) -> Value {
            pspec.default_value().clone()
        }

        fn set_property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>, _value: &Value) {}
    }

    fn counting_group() -> (SignalGroup, Arc<AtomicUsize>) {
        let group = SignalGroup::new::<Player>();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            group.connect("started", move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        (group, hits)
    }

    #[test]
    fn test_handlers_follow_the_target() {
        let (group, hits) = counting_group();
        let p1 = Player::new();
        let p2 = Player::new();

        group.set_target(Some(&p1));
        p1.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        group.set_target(Some(&p2));
        // The old target is disconnected.
        p1.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        p2.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_block_survives_retarget() {
        let (group, hits) = counting_group();
        let p1 = Player::new();
        group.set_target(Some(&p1));

        group.block();
        p1.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // The block depth carries over to the new target.
        let p2 = Player::new();
        group.set_target(Some(&p2));
        p2.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        group.unblock();
        p2.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Unblocking past zero is rejected, not wrapped.
        group.unblock();
        group.unblock();
        p2.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bind_and_unbind_callbacks() {
        let group = SignalGroup::new::<Player>();
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            group.connect_bind(move |_| events.lock().push("bind"));
        }
        {
            let events = Arc::clone(&events);
            group.connect_unbind(move || events.lock().push("unbind"));
        }

        let p1 = Player::new();
        group.set_target(Some(&p1));
        assert_eq!(*events.lock(), vec!["bind"]);

        let p2 = Player::new();
        group.set_target(Some(&p2));
        assert_eq!(*events.lock(), vec!["bind", "unbind", "bind"]);

        group.set_target(None);
        assert_eq!(*events.lock(), vec!["bind", "unbind", "bind", "unbind"]);
    }

    #[test]
    fn test_target_death_unbinds() {
        let (group, hits) = counting_group();
        let unbound = Arc::new(AtomicUsize::new(0));
        {
            let unbound = Arc::clone(&unbound);
            group.connect_unbind(move || {
                unbound.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let p = Player::new();
            group.set_target(Some(&p));
            p.emit("started", &[]).unwrap();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(unbound.load(Ordering::SeqCst), 1);
        assert!(group.target().is_none());
    }

    #[test]
    fn test_wrong_type_is_treated_as_none() {
        let (group, hits) = counting_group();
        let p = Player::new();
        group.set_target(Some(&p));

        let other = Object::new(Other);
        group.set_target(Some(&other));
        assert!(group.target().is_none());

        p.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connect_after_bind_is_rejected() {
        let (group, _) = counting_group();
        let p = Player::new();
        group.set_target(Some(&p));

        let late = Arc::new(AtomicUsize::new(0));
        {
            let late = Arc::clone(&late);
            group.connect("stopped", move |_, _| {
                late.fetch_add(1, Ordering::SeqCst);
            });
        }
        p.emit("stopped", &[]).unwrap();
        assert_eq!(late.load(Ordering::SeqCst), 0);

        // Still rejected after the target has been cleared.
        group.set_target(None);
        let p2 = Player::new();
        group.set_target(Some(&p2));
        p2.emit("stopped", &[]).unwrap();
        assert_eq!(late.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connect_object_stops_with_watched_object() {
        let group = SignalGroup::new::<Player>();
        let hits = Arc::new(AtomicUsize::new(0));
        let watched = Player::new();
        {
            let hits = Arc::clone(&hits);
            group.connect_object("started", &watched, move |_, _, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let p = Player::new();
        group.set_target(Some(&p));
        p.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(watched);
        p.emit("started", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retarget_from_dispose_survives_stale_death_notification() {
        struct Handoff {
            group: Mutex<Option<SignalGroup>>,
            replacement: Mutex<Option<ObjectRef>>,
        }

        impl ObjectImpl for Handoff {
            fn class(&self) -> &Arc<ObjectClass> {
                static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
                CLASS.get_or_init(|| {
                    ObjectClass::builder::<Handoff>("Handoff").signal("ping").build()
                })
            }

            fn property(&self, _obj: &Object, pspec: &Arc<ParamSpec>) -> Value {
                pspec.default_value().clone()
            }

            fn set_property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>, _value: &Value) {}

            fn dispose(&self, _obj: &Object) {
                if let (Some(group), Some(next)) =
                    (self.group.lock().take(), self.replacement.lock().take())
                {
                    group.set_target(Some(&next));
                }
            }
        }

        let group = SignalGroup::new::<Handoff>();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            group.connect("ping", move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let replacement = Object::new(Handoff {
            group: Mutex::new(None),
            replacement: Mutex::new(None),
        });
        let dying = Object::new(Handoff {
            group: Mutex::new(Some(group.clone())),
            replacement: Mutex::new(Some(replacement.clone())),
        });

        group.set_target(Some(&dying));
        // Destruction retargets from dispose; the dying object's own death
        // notification arrives later and must leave the fresh binding alone.
        drop(dying);

        assert!(group.target().is_some_and(|t| ObjectRef::ptr_eq(&t, &replacement)));
        replacement.emit("ping", &[]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_swapped_handler() {
        let group = SignalGroup::new::<Player>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            group.connect_swapped("started", move |args| {
                seen.lock().push(args.to_vec());
            });
        }
        let p = Player::new();
        group.set_target(Some(&p));
        p.emit("started", &[Value::I64(3)]).unwrap();
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0], vec![Value::I64(3)]);
    }
}
