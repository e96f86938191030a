//! Handler modules and the keys used to reach them.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::dictionary::Dictionary;

/// Numeric key selecting the module that handles an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationId(u32);

impl DestinationId {
    /// Wraps a raw destination value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw destination value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for DestinationId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// An event raised outside the device link and routed by action name.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalEvent {
    action: String,
    extras: Map<String, Value>,
}

impl ExternalEvent {
    /// Builds an event without extras.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            extras: Map::new(),
        }
    }

    /// Builds an event carrying the supplied extras.
    #[must_use]
    pub fn with_extras(action: impl Into<String>, extras: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            extras,
        }
    }

    /// Adds or replaces a single extra.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// Action name the event is routed by.
    #[must_use]
    pub fn action(&self) -> &str {
        self.action.as_str()
    }

    /// Looks up a single extra.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    /// All extras attached to the event.
    #[must_use]
    pub fn extras(&self) -> &Map<String, Value> {
        &self.extras
    }
}

/// A unit of business logic reachable by destination id or action name.
///
/// Both entry points run synchronously on the dispatch thread. The dispatch
/// loop does not move on to the next stimulus until the call returns, so
/// implementations must finish quickly and hand long-running work elsewhere.
pub trait HandlerModule: Send + Sync {
    /// Handles a packet the device addressed to this module.
    fn receive_packet(&self, content: &Dictionary);

    /// Handles an event registered under one of this module's action names.
    fn receive_external_event(&self, event: &ExternalEvent);
}

impl<T> HandlerModule for Arc<T>
where
    T: HandlerModule + ?Sized,
{
    fn receive_packet(&self, content: &Dictionary) {
        (**self).receive_packet(content);
    }

    fn receive_external_event(&self, event: &ExternalEvent) {
        (**self).receive_external_event(event);
    }
}
