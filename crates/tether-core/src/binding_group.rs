//! Binding groups.
//!
//! A [`BindingGroup`] manages a set of property bindings that all share one
//! source object. Bindings are declared up front with [`bind`]
//! (BindingGroup::bind); they come alive when a source is set and are torn
//! down and re-created whenever the source changes. The group holds its
//! source and targets weakly.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::binding::{bind_property_full, Binding, BindingFlags, TransformFn};
use crate::logging::targets;
use crate::object::{Object, ObjectRef, WeakNotifyId};
use crate::weak::WeakCell;

struct LazyBinding {
    id: u64,
    source_property: String,
    target: WeakCell,
    target_property: String,
    flags: BindingFlags,
    transform_to: Option<TransformFn>,
    transform_from: Option<TransformFn>,
    binding: Option<Binding>,
}

struct GroupState {
    source: WeakCell,
    source_weak: Option<WeakNotifyId>,
    /// Bumped on every source change; a death notification carrying an
    /// older value is stale and must not touch the state.
    epoch: u64,
    lazy: Vec<LazyBinding>,
    next_id: u64,
}

struct BindingGroupInner {
    state: Mutex<GroupState>,
}

/// A retargetable set of property bindings sharing one source.
#[derive(Clone)]
pub struct BindingGroup {
    inner: Arc<BindingGroupInner>,
}

/// Everything needed to create one binding once the lock is released.
struct BindPlan {
    id: u64,
    source_property: String,
    target: ObjectRef,
    target_property: String,
    flags: BindingFlags,
    transform_to: Option<TransformFn>,
    transform_from: Option<TransformFn>,
}

impl BindingGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BindingGroupInner {
                state: Mutex::new(GroupState {
                    source: WeakCell::new(),
                    source_weak: None,
                    epoch: 0,
                    lazy: Vec::new(),
                    next_id: 0,
                }),
            }),
        }
    }

    /// The current source object, while it is alive.
    pub fn source(&self) -> Option<ObjectRef> {
        self.inner.state.lock().source.get()
    }

    /// Declare a binding from `source_property` on the group's source to
    /// `target_property` on `target`.
    ///
    /// The binding follows the group's source from now on. Binding errors
    /// (unknown property, access mismatch) surface when a source is set,
    /// as an error log; the declaration itself cannot fail.
    pub fn bind(
        &self,
        source_property: &str,
        target: &Object,
        target_property: &str,
        flags: BindingFlags,
    ) {
        self.bind_full(source_property, target, target_property, flags, None, None);
    }

    /// Like [`bind`](Self::bind), with custom value transforms.
    pub fn bind_full(
        &self,
        source_property: &str,
        target: &Object,
        target_property: &str,
        flags: BindingFlags,
        transform_to: Option<TransformFn>,
        transform_from: Option<TransformFn>,
    ) {
        let plan = {
            let mut state = self.inner.state.lock();
            state.lazy.retain(|l| l.binding.is_some() || !l.target.is_empty());
            let id = state.next_id;
            state.next_id += 1;
            state.lazy.push(LazyBinding {
                id,
                source_property: source_property.to_string(),
                target: WeakCell::for_object(target),
                target_property: target_property.to_string(),
                flags,
                transform_to: transform_to.clone(),
                transform_from: transform_from.clone(),
                binding: None,
            });
            state.source.get().map(|source| BindPlan {
                id,
                source_property: source_property.to_string(),
                target: target.to_ref(),
                target_property: target_property.to_string(),
                flags,
                transform_to,
                transform_from,
            })
        };
        if let Some(plan) = plan {
            self.realize(vec![plan]);
        }
    }

    /// Point every declared binding at a new source.
    ///
    /// Setting the current source again is a no-op. Existing bindings are
    /// unbound first; declarations whose target has died are dropped.
    pub fn set_source(&self, source: Option<&Object>) {
        let mut to_unbind = Vec::new();
        let plans = {
            let mut state = self.inner.state.lock();
            match source {
                Some(s) if state.source.points_to(s) => return,
                None if state.source.is_empty() && state.source_weak.is_none() => return,
                _ => {}
            }

            state.epoch += 1;
            let epoch = state.epoch;
            if let Some(id) = state.source_weak.take() {
                if let Some(old) = state.source.get() {
                    old.weak_unref(id);
                }
            }
            for lazy in &mut state.lazy {
                if let Some(b) = lazy.binding.take() {
                    to_unbind.push(b);
                }
            }
            state.lazy.retain(|l| !l.target.is_empty());

            state.source.set(source);
            if let Some(s) = source {
                let weak_inner = Arc::downgrade(&self.inner);
                state.source_weak = Some(s.weak_ref(move |_| {
                    if let Some(inner) = weak_inner.upgrade() {
                        source_died(&inner, epoch);
                    }
                }));
            }

            source.map_or_else(Vec::new, |_| {
                state
                    .lazy
                    .iter()
                    .filter_map(|l| {
                        let target = l.target.get()?;
                        Some(BindPlan {
                            id: l.id,
                            source_property: l.source_property.clone(),
                            target,
                            target_property: l.target_property.clone(),
                            flags: l.flags,
                            transform_to: l.transform_to.clone(),
                            transform_from: l.transform_from.clone(),
                        })
                    })
                    .collect()
            })
        };

        for binding in to_unbind {
            binding.unbind();
        }
        if !plans.is_empty() {
            trace!(target: targets::BINDING_GROUP, bindings = plans.len(), "group retargeted");
            self.realize(plans);
        }
    }

    /// Create the planned bindings outside the group lock (binding creation
    /// can run user notify handlers via SYNC_CREATE), then store them back
    /// if the group still wants them.
    fn realize(&self, plans: Vec<BindPlan>) {
        for plan in plans {
            let source = {
                let state = self.inner.state.lock();
                state.source.get()
            };
            let Some(source) = source else { return };

            let binding = match bind_property_full(
                &source,
                &plan.source_property,
                &plan.target,
                &plan.target_property,
                plan.flags,
                plan.transform_to,
                plan.transform_from,
            ) {
                Ok(b) => b,
                // bind_property_full already logged the rejection.
                Err(_) => continue,
            };

            let stale = {
                let mut state = self.inner.state.lock();
                if state.source.points_to(&source) {
                    match state.lazy.iter_mut().find(|l| l.id == plan.id) {
                        Some(lazy) => {
                            lazy.binding = Some(binding);
                            None
                        }
                        None => Some(binding),
                    }
                } else {
                    Some(binding)
                }
            };
            // The group moved on while we were binding.
            if let Some(binding) = stale {
                binding.unbind();
            }
        }
    }
}

/// Death hook for the source bound at `epoch`. A retarget from the dying
/// source's dispose advances the epoch, so a stale notification must leave
/// the fresh bindings alone.
fn source_died(inner: &Arc<BindingGroupInner>, epoch: u64) {
    let mut state = inner.state.lock();
    if state.epoch != epoch {
        return;
    }
    state.source_weak = None;
    state.source.set(None);
    // The bindings tore themselves down through their own death hooks; only
    // the stale handles remain.
    for lazy in &mut state.lazy {
        lazy.binding = None;
    }
    trace!(target: targets::BINDING_GROUP, "source destroyed");
}

impl Default for BindingGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BindingGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("BindingGroup")
            .field("has_source", &!state.source.is_empty())
            .field("bindings", &state.lazy.len())
            .finish()
    }
}

impl Drop for BindingGroupInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(id) = state.source_weak.take() {
            if let Some(source) = state.source.get() {
                source.weak_unref(id);
            }
        }
        for lazy in &mut state.lazy {
            if let Some(binding) = lazy.binding.take() {
                binding.unbind();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectClass, ObjectImpl};
    use crate::param::{ParamFlags, ParamSpec};
    use crate::value::Value;
    use std::sync::OnceLock;

    struct Dial {
        level: Mutex<i64>,
    }

    impl Dial {
        fn new() -> ObjectRef {
            Object::new(Self { level: Mutex::new(0) })
        }

        fn with_level(level: i64) -> ObjectRef {
            Object::new(Self { level: Mutex::new(level) })
        }
    }

    impl ObjectImpl for Dial {
        fn class(&self) -> &Arc<ObjectClass> {
            static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
            CLASS.get_or_init(|| {
                ObjectClass::builder::<Dial>("Dial")
                    .property(ParamSpec::int("level", 0, 1000, 0, ParamFlags::READWRITE))
                    .build()
            })
        }

        fn property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>) -> Value {
            Value::I64(*self.level.lock())
        }

        fn set_property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>, value: &Value) {
            *self.level.lock() = value.as_i64().unwrap();
        }
    }

    #[test]
    fn test_bindings_follow_the_source() {
        let group = BindingGroup::new();
        let t1 = Dial::new();
        let t2 = Dial::new();
        group.bind("level", &t1, "level", BindingFlags::SYNC_CREATE);
        group.bind("level", &t2, "level", BindingFlags::SYNC_CREATE);

        let s1 = Dial::with_level(10);
        group.set_source(Some(&s1));
        assert_eq!(t1.property("level").unwrap(), Value::I64(10));
        assert_eq!(t2.property("level").unwrap(), Value::I64(10));

        s1.set_property("level", Value::I64(20)).unwrap();
        assert_eq!(t1.property("level").unwrap(), Value::I64(20));

        let s2 = Dial::with_level(77);
        group.set_source(Some(&s2));
        assert_eq!(t1.property("level").unwrap(), Value::I64(77));

        // The old source is fully detached.
        s1.set_property("level", Value::I64(1)).unwrap();
        assert_eq!(t1.property("level").unwrap(), Value::I64(77));
    }

    #[test]
    fn test_bind_after_source_is_live_immediately() {
        let group = BindingGroup::new();
        let source = Dial::with_level(5);
        group.set_source(Some(&source));

        let target = Dial::new();
        group.bind("level", &target, "level", BindingFlags::SYNC_CREATE);
        assert_eq!(target.property("level").unwrap(), Value::I64(5));
    }

    #[test]
    fn test_clearing_the_source_detaches() {
        let group = BindingGroup::new();
        let source = Dial::new();
        let target = Dial::new();
        group.bind("level", &target, "level", BindingFlags::DEFAULT);
        group.set_source(Some(&source));

        group.set_source(None);
        source.set_property("level", Value::I64(9)).unwrap();
        assert_eq!(target.property("level").unwrap(), Value::I64(0));
        assert!(group.source().is_none());
    }

    #[test]
    fn test_same_source_is_a_no_op() {
        let group = BindingGroup::new();
        let source = Dial::with_level(3);
        let target = Dial::new();
        group.bind("level", &target, "level", BindingFlags::SYNC_CREATE);
        group.set_source(Some(&source));

        target.set_property("level", Value::I64(99)).unwrap();
        // Re-setting the same source must not re-run SYNC_CREATE.
        group.set_source(Some(&source));
        assert_eq!(target.property("level").unwrap(), Value::I64(99));
    }

    #[test]
    fn test_source_death_clears_group() {
        let group = BindingGroup::new();
        let target = Dial::new();
        group.bind("level", &target, "level", BindingFlags::DEFAULT);
        {
            let source = Dial::new();
            group.set_source(Some(&source));
            source.set_property("level", Value::I64(4)).unwrap();
            assert_eq!(target.property("level").unwrap(), Value::I64(4));
        }
        assert!(group.source().is_none());

        // A new source binds cleanly after the old one died.
        let source = Dial::with_level(8);
        group.set_source(Some(&source));
        source.set_property("level", Value::I64(12)).unwrap();
        assert_eq!(target.property("level").unwrap(), Value::I64(12));
    }

    #[test]
    fn test_dead_target_declaration_is_dropped() {
        let group = BindingGroup::new();
        {
            let target = Dial::new();
            group.bind("level", &target, "level", BindingFlags::DEFAULT);
        }
        let source = Dial::with_level(2);
        // Must not panic or bind anything.
        group.set_source(Some(&source));
        source.set_property("level", Value::I64(3)).unwrap();
    }

    #[test]
    fn test_reswap_from_dispose_survives_stale_death_notification() {
        struct Relay {
            level: Mutex<i64>,
            group: Mutex<Option<BindingGroup>>,
            replacement: Mutex<Option<ObjectRef>>,
        }

        impl ObjectImpl for Relay {
            fn class(&self) -> &Arc<ObjectClass> {
                static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
                CLASS.get_or_init(|| {
                    ObjectClass::builder::<Relay>("Relay")
                        .property(ParamSpec::int("level", 0, 1000, 0, ParamFlags::READWRITE))
                        .build()
                })
            }

            fn property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>) -> Value {
                Value::I64(*self.level.lock())
            }

            fn set_property(&self, _obj: &Object, _pspec: &Arc<ParamSpec>, value: &Value) {
                *self.level.lock() = value.as_i64().unwrap();
            }

            fn dispose(&self, _obj: &Object) {
                if let (Some(group), Some(next)) =
                    (self.group.lock().take(), self.replacement.lock().take())
                {
                    group.set_source(Some(&next));
                }
            }
        }

        let group = BindingGroup::new();
        let target = Dial::new();
        group.bind("level", &target, "level", BindingFlags::SYNC_CREATE);

        let replacement = Object::new(Relay {
            level: Mutex::new(9),
            group: Mutex::new(None),
            replacement: Mutex::new(None),
        });
        let dying = Object::new(Relay {
            level: Mutex::new(5),
            group: Mutex::new(Some(group.clone())),
            replacement: Mutex::new(Some(replacement.clone())),
        });

        group.set_source(Some(&dying));
        assert_eq!(target.property("level").unwrap(), Value::I64(5));

        // Destruction re-points the group from dispose; the dying source's
        // own death notification arrives later and must leave the fresh
        // bindings alone.
        drop(dying);
        assert!(group.source().is_some_and(|s| ObjectRef::ptr_eq(&s, &replacement)));
        assert_eq!(target.property("level").unwrap(), Value::I64(9));

        replacement.set_property("level", Value::I64(12)).unwrap();
        assert_eq!(target.property("level").unwrap(), Value::I64(12));
    }

    #[test]
    fn test_group_drop_unbinds() {
        let source = Dial::new();
        let target = Dial::new();
        {
            let group = BindingGroup::new();
            group.bind("level", &target, "level", BindingFlags::DEFAULT);
            group.set_source(Some(&source));
            source.set_property("level", Value::I64(6)).unwrap();
            assert_eq!(target.property("level").unwrap(), Value::I64(6));
        }
        source.set_property("level", Value::I64(30)).unwrap();
        assert_eq!(target.property("level").unwrap(), Value::I64(6));
    }
}
