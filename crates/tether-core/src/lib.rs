//! Core systems for Tether.
//!
//! This crate provides the foundational components of the Tether object
//! runtime:
//!
//! - **Object Core**: Atomic reference counting with floating and toggle
//!   references, weak notifications, keyed data, and two-phase teardown
//! - **Weak Cells**: Re-settable weak references that empty themselves when
//!   the pointee is destroyed
//! - **Property System**: Class-declared properties with typed specs,
//!   validation, and batched change notification
//! - **Signals**: Per-object handler tables with detailed signals, blocking,
//!   and ordered emission
//! - **Bindings**: One- and two-way property synchronization with pluggable
//!   transforms, plus binding groups that retarget as a unit
//! - **Signal Groups**: Bundles of handlers that follow a changing target
//!
//! # Binding Example
//!
//! ```
//! use tether_core::{bind_property, BindingFlags, Value};
//! # use tether_core::{Object, ObjectClass, ObjectImpl, ObjectRef, ParamFlags, ParamSpec};
//! # use std::sync::{Arc, OnceLock};
//! # use parking_lot::Mutex;
//! # struct Gauge { level: Mutex<i64> }
//! # impl ObjectImpl for Gauge {
//! #     fn class(&self) -> &Arc<ObjectClass> {
//! #         static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
//! #         CLASS.get_or_init(|| ObjectClass::builder::<Gauge>("Gauge")
//! #             .property(ParamSpec::int("level", 0, 100, 0, ParamFlags::READWRITE))
//! #             .build())
//! #     }
//! #     fn property(&self, _: &Object, _: &Arc<ParamSpec>) -> Value {
//! #         Value::I64(*self.level.lock())
//! #     }
//! #     fn set_property(&self, _: &Object, _: &Arc<ParamSpec>, value: &Value) {
//! #         *self.level.lock() = value.as_i64().unwrap();
//! #     }
//! # }
//!
//! let source = Object::new(Gauge { level: Mutex::new(0) });
//! let target = Object::new(Gauge { level: Mutex::new(0) });
//!
//! let binding = bind_property(
//!     &source, "level",
//!     &target, "level",
//!     BindingFlags::SYNC_CREATE,
//! ).unwrap();
//!
//! source.set_property("level", Value::I64(42)).unwrap();
//! assert_eq!(target.property("level").unwrap(), Value::I64(42));
//!
//! binding.unbind();
//! ```
//!
//! # Weak Cell Example
//!
//! ```
//! # use tether_core::{Object, ObjectClass, ObjectImpl, ObjectRef, ParamSpec, Value};
//! # use std::sync::{Arc, OnceLock};
//! # struct Plain;
//! # impl ObjectImpl for Plain {
//! #     fn class(&self) -> &Arc<ObjectClass> {
//! #         static CLASS: OnceLock<Arc<ObjectClass>> = OnceLock::new();
//! #         CLASS.get_or_init(|| ObjectClass::builder::<Plain>("Plain").build())
//! #     }
//! #     fn property(&self, _: &Object, pspec: &Arc<ParamSpec>) -> Value {
//! #         pspec.default_value().clone()
//! #     }
//! #     fn set_property(&self, _: &Object, _: &Arc<ParamSpec>, _: &Value) {}
//! # }
//! let object = Object::new(Plain);
//! let weak = object.downgrade();
//!
//! assert!(weak.get().is_some());
//! drop(object);
//! assert!(weak.get().is_none());
//! ```

pub mod binding;
pub mod binding_group;
mod error;
pub mod logging;
mod notify;
pub mod object;
pub mod param;
pub mod signal;
pub mod signal_group;
pub mod value;
pub mod weak;

pub use binding::{bind_property, bind_property_full, Binding, BindingFlags, TransformFn};
pub use binding_group::BindingGroup;
pub use error::{BindingError, ObjectError, ObjectResult, Result, TetherError};
pub use object::{
    ClassBuilder, FloatingRef, Object, ObjectClass, ObjectImpl, ObjectRef, ToggleNotify,
    WeakNotifyId,
};
pub use param::{ParamFlags, ParamSpec};
pub use signal::HandlerId;
pub use signal_group::SignalGroup;
pub use value::{Value, ValueType};
pub use weak::WeakCell;
