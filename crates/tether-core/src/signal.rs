//! Per-object signal handler table.
//!
//! Every object carries a [`SignalTable`] behind a mutex. Handlers are stored
//! in a slotmap so a [`HandlerId`] stays valid across unrelated disconnects,
//! and each handler carries a monotonically increasing sequence number so
//! emission can replay connection order ("after" handlers sort behind normal
//! ones regardless of when they were connected).
//!
//! Emission never runs user code under the table lock: matching closures are
//! collected first, the lock is dropped, then they run. A handler connected
//! during emission is therefore not seen by that emission, and a handler
//! disconnected during emission may still run once.

use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::error::ObjectError;
use crate::object::Object;
use crate::param::ParamSpec;
use crate::value::Value;

new_key_type! {
    /// Identifies one signal-handler connection on one object.
    pub struct HandlerId;
}

/// Closure shape of a connected handler.
pub(crate) enum HandlerKind {
    /// A plain signal handler, invoked with the emission arguments.
    Signal(Arc<dyn Fn(&Object, &[Value]) + Send + Sync>),
    /// A property-change handler, invoked with the changed property's spec.
    Notify(Arc<dyn Fn(&Object, &Arc<ParamSpec>) + Send + Sync>),
}

pub(crate) struct Handler {
    pub(crate) signal: String,
    /// For `Signal` kind: the detail this handler was connected with.
    /// For `Notify` kind: the property name filter.
    pub(crate) detail: Option<String>,
    pub(crate) after: bool,
    pub(crate) block_count: usize,
    seq: u64,
    pub(crate) kind: HandlerKind,
}

#[derive(Default)]
pub(crate) struct SignalTable {
    handlers: SlotMap<HandlerId, Handler>,
    next_seq: u64,
}

impl SignalTable {
    pub(crate) fn insert(
        &mut self,
        signal: String,
        detail: Option<String>,
        after: bool,
        kind: HandlerKind,
    ) -> HandlerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.handlers.insert(Handler { signal, detail, after, block_count: 0, seq, kind })
    }

    pub(crate) fn remove(&mut self, id: HandlerId) -> Option<Handler> {
        self.handlers.remove(id)
    }

    pub(crate) fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(id)
    }

    pub(crate) fn block(&mut self, id: HandlerId) -> bool {
        match self.handlers.get_mut(id) {
            Some(h) => {
                h.block_count += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn unblock(&mut self, id: HandlerId) -> bool {
        match self.handlers.get_mut(id) {
            Some(h) if h.block_count > 0 => {
                h.block_count -= 1;
                true
            }
            _ => false,
        }
    }

    /// Collect the unblocked handlers matching a signal emission, in
    /// connection order with "after" handlers last.
    ///
    /// A handler connected with a detail only matches emissions carrying the
    /// same detail; a handler connected without one matches every emission of
    /// its signal.
    pub(crate) fn collect_signal(
        &self,
        signal: &str,
        detail: Option<&str>,
    ) -> Vec<Arc<dyn Fn(&Object, &[Value]) + Send + Sync>> {
        let mut matched: Vec<(bool, u64, Arc<dyn Fn(&Object, &[Value]) + Send + Sync>)> = self
            .handlers
            .values()
            .filter(|h| h.block_count == 0 && h.signal == signal)
            .filter(|h| match (&h.detail, detail) {
                (None, _) => true,
                (Some(want), Some(got)) => want == got,
                (Some(_), None) => false,
            })
            .filter_map(|h| match &h.kind {
                HandlerKind::Signal(cb) => Some((h.after, h.seq, Arc::clone(cb))),
                HandlerKind::Notify(_) => None,
            })
            .collect();
        matched.sort_by_key(|(after, seq, _)| (*after, *seq));
        matched.into_iter().map(|(_, _, cb)| cb).collect()
    }

    /// Collect the unblocked handlers matching a property-change
    /// notification for `pspec`.
    ///
    /// This covers `Notify`-kind handlers whose filter is absent or equal to
    /// the property name, plus `Signal`-kind handlers connected to the
    /// "notify" signal (optionally detailed on the property name).
    pub(crate) fn collect_notify(&self, pspec: &Arc<ParamSpec>) -> Vec<NotifyDispatch> {
        let mut matched: Vec<(bool, u64, NotifyDispatch)> = self
            .handlers
            .values()
            .filter(|h| h.block_count == 0 && h.signal == "notify")
            .filter(|h| match &h.detail {
                None => true,
                Some(want) => want == pspec.name(),
            })
            .map(|h| {
                let dispatch = match &h.kind {
                    HandlerKind::Notify(cb) => NotifyDispatch::Notify(Arc::clone(cb)),
                    HandlerKind::Signal(cb) => NotifyDispatch::Signal(Arc::clone(cb)),
                };
                (h.after, h.seq, dispatch)
            })
            .collect();
        matched.sort_by_key(|(after, seq, _)| (*after, *seq));
        matched.into_iter().map(|(_, _, d)| d).collect()
    }

    /// Remove every handler, returning them so the caller can drop the
    /// closures outside the table lock.
    pub(crate) fn clear_all(&mut self) -> Vec<Handler> {
        let mut drained = Vec::with_capacity(self.handlers.len());
        let ids: Vec<HandlerId> = self.handlers.keys().collect();
        for id in ids {
            if let Some(h) = self.handlers.remove(id) {
                drained.push(h);
            }
        }
        drained
    }
}

/// A matched handler for one property-change notification.
pub(crate) enum NotifyDispatch {
    Notify(Arc<dyn Fn(&Object, &Arc<ParamSpec>) + Send + Sync>),
    Signal(Arc<dyn Fn(&Object, &[Value]) + Send + Sync>),
}

/// Split a detailed-signal string `"name::detail"` into its parts.
///
/// A bare `"name"` yields no detail. An empty name or empty detail is
/// rejected.
pub(crate) fn parse_detailed_signal(detailed: &str) -> Result<(&str, Option<&str>), ObjectError> {
    let (name, detail) = match detailed.split_once("::") {
        Some((name, detail)) => (name, Some(detail)),
        None => (detailed, None),
    };
    if name.is_empty() || detail == Some("") {
        return Err(ObjectError::InvalidDetailedSignal { detailed: detailed.to_string() });
    }
    Ok((name, detail))
}
