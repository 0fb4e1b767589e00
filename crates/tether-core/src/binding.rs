//! Property bindings.
//!
//! A [`Binding`] keeps a target property synchronized with a source
//! property: whenever the source notifies a change, the value is read,
//! optionally transformed, and written to the target.
//!
//! The binding holds only weak references to its endpoints. It stays active
//! until [`Binding::unbind`] is called or either endpoint is destroyed,
//! whichever comes first; teardown runs exactly once no matter how many of
//! those race. Dropping the [`Binding`] handle itself does nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, trace, warn};

use crate::error::BindingError;
use crate::logging::targets;
use crate::object::{Object, ObjectRef, WeakNotifyId};
use crate::param::ParamSpec;
use crate::signal::HandlerId;
use crate::value::{Value, ValueType};
use crate::weak::WeakCell;

/// Behavior flags for [`bind_property`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingFlags(u32);

impl BindingFlags {
    /// One-way source-to-target synchronization.
    pub const DEFAULT: Self = Self(0);
    /// Also propagate target changes back to the source.
    pub const BIDIRECTIONAL: Self = Self(1 << 0);
    /// Push the source value to the target when the binding is created.
    pub const SYNC_CREATE: Self = Self(1 << 1);
    /// Negate the value in both directions. Both properties must be boolean
    /// and no custom transforms may be given.
    pub const INVERT_BOOLEAN: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BindingFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A value transform plugged into a binding. Returning `None` vetoes one
/// propagation; the binding itself stays active.
pub type TransformFn = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct Transforms {
    forward: Option<TransformFn>,
    backward: Option<TransformFn>,
}

struct BindingState {
    /// `Some` while bound. Taken exactly once by whichever teardown path
    /// wins; everything after the take runs single-flight.
    transforms: Option<Arc<Transforms>>,
    source_notify: Option<HandlerId>,
    target_notify: Option<HandlerId>,
    source_weak: Option<WeakNotifyId>,
    target_weak: Option<WeakNotifyId>,
}

struct BindingInner {
    source: WeakCell,
    target: WeakCell,
    source_pspec: Arc<ParamSpec>,
    target_pspec: Arc<ParamSpec>,
    flags: BindingFlags,
    /// Set while this binding is writing an endpoint, so the notification
    /// that write raises does not echo back through the binding.
    is_frozen: AtomicBool,
    state: Mutex<BindingState>,
}

/// A live property binding. Cloning yields another handle to the same
/// binding.
#[derive(Clone)]
pub struct Binding {
    inner: Arc<BindingInner>,
}

impl Binding {
    /// The source object, while it is alive.
    pub fn source(&self) -> Option<ObjectRef> {
        self.inner.source.get()
    }

    /// The target object, while it is alive.
    pub fn target(&self) -> Option<ObjectRef> {
        self.inner.target.get()
    }

    pub fn source_property(&self) -> &str {
        self.inner.source_pspec.name()
    }

    pub fn target_property(&self) -> &str {
        self.inner.target_pspec.name()
    }

    pub fn flags(&self) -> BindingFlags {
        self.inner.flags
    }

    /// Whether the binding is still active.
    pub fn is_bound(&self) -> bool {
        self.inner.state.lock().transforms.is_some()
    }

    /// Tear the binding down: disconnect its handlers and release its weak
    /// registrations. Idempotent, and safe to race with endpoint
    /// destruction.
    pub fn unbind(&self) {
        teardown(&self.inner);
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("source_property", &self.source_property())
            .field("target_property", &self.target_property())
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Bind `source_property` on `source` to `target_property` on `target`.
pub fn bind_property(
    source: &Object,
    source_property: &str,
    target: &Object,
    target_property: &str,
    flags: BindingFlags,
) -> Result<Binding, BindingError> {
    bind_property_full(source, source_property, target, target_property, flags, None, None)
}

/// Like [`bind_property`], with custom value transforms.
///
/// `transform_to` maps source values to target values; `transform_from`
/// maps the other way and only applies to bidirectional bindings. Without a
/// transform, values convert through [`Value::transform`].
pub fn bind_property_full(
    source: &Object,
    source_property: &str,
    target: &Object,
    target_property: &str,
    flags: BindingFlags,
    transform_to: Option<TransformFn>,
    transform_from: Option<TransformFn>,
) -> Result<Binding, BindingError> {
    let bidirectional = flags.contains(BindingFlags::BIDIRECTIONAL);

    let result = validate(
        source,
        source_property,
        target,
        target_property,
        flags,
        transform_to.is_some() || transform_from.is_some(),
    );
    let (source_pspec, target_pspec) = match result {
        Ok(specs) => specs,
        Err(err) => {
            error!(
                target: targets::BINDING,
                source = source.class().type_name(),
                source_property,
                target = target.class().type_name(),
                target_property,
                %err,
                "binding rejected"
            );
            return Err(err);
        }
    };

    let transforms = if flags.contains(BindingFlags::INVERT_BOOLEAN) {
        let invert: TransformFn =
            Arc::new(|v| v.as_bool().map(|b| Value::Bool(!b)));
        Transforms { forward: Some(Arc::clone(&invert)), backward: Some(invert) }
    } else {
        Transforms { forward: transform_to, backward: transform_from }
    };

    let inner = Arc::new(BindingInner {
        source: WeakCell::for_object(source),
        target: WeakCell::for_object(target),
        source_pspec,
        target_pspec,
        flags,
        is_frozen: AtomicBool::new(false),
        state: Mutex::new(BindingState {
            transforms: Some(Arc::new(transforms)),
            source_notify: None,
            target_notify: None,
            source_weak: None,
            target_weak: None,
        }),
    });

    let source_notify = {
        let inner = Arc::clone(&inner);
        source.connect_notify(Some(source_property), move |_, _| sync(&inner, true))
    };
    let target_notify = bidirectional.then(|| {
        let inner = Arc::clone(&inner);
        target.connect_notify(Some(target_property), move |_, _| sync(&inner, false))
    });

    let source_weak = {
        let inner = Arc::clone(&inner);
        source.weak_ref(move |_| teardown(&inner))
    };
    let target_weak = {
        let inner = Arc::clone(&inner);
        target.weak_ref(move |_| teardown(&inner))
    };

    {
        let mut state = inner.state.lock();
        state.source_notify = Some(source_notify);
        state.target_notify = target_notify;
        state.source_weak = Some(source_weak);
        state.target_weak = Some(target_weak);
    }

    trace!(
        target: targets::BINDING,
        source = source.class().type_name(),
        source_property,
        target = target.class().type_name(),
        target_property,
        "bound"
    );

    if flags.contains(BindingFlags::SYNC_CREATE) {
        sync(&inner, true);
    }

    Ok(Binding { inner })
}

fn validate(
    source: &Object,
    source_property: &str,
    target: &Object,
    target_property: &str,
    flags: BindingFlags,
    has_custom_transforms: bool,
) -> Result<(Arc<ParamSpec>, Arc<ParamSpec>), BindingError> {
    if std::ptr::eq(source, target) && source_property == target_property {
        return Err(BindingError::SelfBinding);
    }

    let source_pspec = source.class().find_property(source_property).cloned().ok_or_else(|| {
        BindingError::NoSuchProperty {
            object_type: source.class().type_name(),
            property: source_property.to_string(),
        }
    })?;
    let target_pspec = target.class().find_property(target_property).cloned().ok_or_else(|| {
        BindingError::NoSuchProperty {
            object_type: target.class().type_name(),
            property: target_property.to_string(),
        }
    })?;

    if !source_pspec.flags().readable {
        return Err(BindingError::PropertyNotReadable {
            object_type: source.class().type_name(),
            property: source_property.to_string(),
        });
    }
    if !target_pspec.flags().writable {
        return Err(BindingError::PropertyNotWritable {
            object_type: target.class().type_name(),
            property: target_property.to_string(),
        });
    }
    if flags.contains(BindingFlags::BIDIRECTIONAL) {
        if !source_pspec.flags().writable {
            return Err(BindingError::PropertyNotWritable {
                object_type: source.class().type_name(),
                property: source_property.to_string(),
            });
        }
        if !target_pspec.flags().readable {
            return Err(BindingError::PropertyNotReadable {
                object_type: target.class().type_name(),
                property: target_property.to_string(),
            });
        }
    }
    if flags.contains(BindingFlags::INVERT_BOOLEAN)
        && (has_custom_transforms
            || source_pspec.value_type() != ValueType::Bool
            || target_pspec.value_type() != ValueType::Bool)
    {
        return Err(BindingError::InvalidInvertBoolean);
    }

    Ok((source_pspec, target_pspec))
}

/// Propagate one change through the binding. `forward` reads the source and
/// writes the target; `false` is the bidirectional back-channel.
fn sync(inner: &Arc<BindingInner>, forward: bool) {
    if inner.is_frozen.load(Ordering::Acquire) {
        return;
    }
    // Clone the transforms out so a racing unbind cannot drop them under us.
    let Some(transforms) = inner.state.lock().transforms.clone() else {
        return;
    };
    let (from_cell, to_cell, from_pspec, to_pspec, transform) = if forward {
        (&inner.source, &inner.target, &inner.source_pspec, &inner.target_pspec, &transforms.forward)
    } else {
        (&inner.target, &inner.source, &inner.target_pspec, &inner.source_pspec, &transforms.backward)
    };
    let (Some(from_obj), Some(to_obj)) = (from_cell.get(), to_cell.get()) else {
        return;
    };

    let value = match from_obj.property(from_pspec.name()) {
        Ok(v) => v,
        Err(err) => {
            warn!(target: targets::BINDING, %err, "binding source read failed");
            return;
        }
    };
    let value = match transform {
        Some(t) => match t(&value) {
            Some(v) => v,
            None => return, // vetoed this propagation
        },
        None => match value.transform(to_pspec.value_type()) {
            Some(v) => v,
            None => {
                warn!(
                    target: targets::BINDING,
                    from = from_pspec.name(),
                    to = to_pspec.name(),
                    from_type = %value.value_type(),
                    to_type = %to_pspec.value_type(),
                    "no conversion between bound property types; change skipped"
                );
                return;
            }
        },
    };

    inner.is_frozen.store(true, Ordering::Release);
    let result = to_obj.set_property(to_pspec.name(), value);
    inner.is_frozen.store(false, Ordering::Release);
    if let Err(err) = result {
        warn!(target: targets::BINDING, %err, "binding write failed; change skipped");
    }
}

/// Single-flight teardown, shared by unbind and both endpoint death paths.
///
/// A dying endpoint has already cleared its handler table and emptied the
/// weak cells pointing at it, so its ids resolve to nothing here; only the
/// surviving endpoint is touched.
fn teardown(inner: &Arc<BindingInner>) {
    let (source_notify, target_notify, source_weak, target_weak) = {
        let mut state = inner.state.lock();
        if state.transforms.take().is_none() {
            return;
        }
        (
            state.source_notify.take(),
            state.target_notify.take(),
            state.source_weak.take(),
            state.target_weak.take(),
        )
    };

    if let Some(source) = inner.source.get() {
        if let Some(id) = source_notify {
            source.disconnect(id);
        }
        if let Some(id) = source_weak {
            source.weak_unref(id);
        }
    }
    if let Some(target) = inner.target.get() {
        if let Some(id) = target_notify {
            target.disconnect(id);
        }
        if let Some(id) = target_weak {
            target.weak_unref(id);
        }
    }
    inner.source.set(None);
    inner.target.set(None);
    trace!(target: targets::BINDING, "unbound");
}
