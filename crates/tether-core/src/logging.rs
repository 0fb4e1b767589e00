//! Logging facilities for Tether.
//!
//! Tether uses the `tracing` crate for instrumentation. To see logs, install
//! a tracing subscriber in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Lifecycle transitions (creation, dispose, finalize, bind, unbind) are
//! emitted at `trace` level. Recoverable skips (a binding transform failing
//! for one change) are `warn`. Contract violations (unref of a destroyed
//! object, connecting to a signal group that has already bound) are `error`
//! and indicate the calling code must be fixed.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "tether_core";
    /// Object lifecycle target.
    pub const OBJECT: &str = "tether_core::object";
    /// Weak-cell target.
    pub const WEAK: &str = "tether_core::weak";
    /// Notify-queue target.
    pub const NOTIFY: &str = "tether_core::notify";
    /// Per-object signal table target.
    pub const SIGNAL: &str = "tether_core::signal";
    /// Property binding target.
    pub const BINDING: &str = "tether_core::binding";
    /// Binding group target.
    pub const BINDING_GROUP: &str = "tether_core::binding_group";
    /// Signal group target.
    pub const SIGNAL_GROUP: &str = "tether_core::signal_group";
}
