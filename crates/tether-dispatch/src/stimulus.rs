//! Inputs consumed by the dispatch loop.
//!
//! The host delivers everything as an [`Intent`]: an action name plus a bag
//! of JSON extras. Three reserved actions carry device traffic; any other
//! action is an external event routed by name.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::correlator::TransactionId;
use crate::module::ExternalEvent;

pub(crate) const STIMULUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stimulus");

/// Action carrying a packet from the device in its `packet` extra.
pub const PACKET_ACTION: &str = "PebblePacket";
/// Action carrying a device acknowledgement.
pub const ACK_ACTION: &str = "PebbleAck";
/// Action carrying a device rejection.
pub const NACK_ACTION: &str = "PebbleNack";
/// Extra holding the serialized packet.
pub const PACKET_EXTRA: &str = "packet";
/// Extra holding the settled transaction id.
pub const TRANSACTION_ID_EXTRA: &str = "transactionId";

/// Closure executed on the dispatch thread.
pub struct DispatchTask(Box<dyn FnOnce() + Send + 'static>);

impl DispatchTask {
    /// Wraps a closure.
    pub fn new(task: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(task))
    }

    /// Consumes and runs the closure.
    pub fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for DispatchTask {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("DispatchTask(..)")
    }
}

/// One unit of work for the dispatch loop.
#[derive(Debug)]
pub enum Stimulus {
    /// Raw packet text received from the device.
    DevicePacket(String),
    /// The device confirmed a transaction.
    Acknowledge(TransactionId),
    /// The device refused a transaction.
    Reject(TransactionId),
    /// An event raised outside the device link.
    External(ExternalEvent),
    /// Work posted to run on the dispatch thread.
    Task(DispatchTask),
}

impl Stimulus {
    /// Short label used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DevicePacket(_) => "device_packet",
            Self::Acknowledge(_) => "acknowledge",
            Self::Reject(_) => "reject",
            Self::External(_) => "external",
            Self::Task(_) => "task",
        }
    }

    /// Translates a host intent into a stimulus.
    ///
    /// Returns `None` when the intent has no action, when a packet intent has
    /// no packet, or when an ack or nack names a transaction id that can never
    /// be pending (missing, negative or out of range).
    #[must_use]
    pub fn from_intent(intent: Intent) -> Option<Self> {
        let Intent { action, mut extras } = intent;
        let Some(action) = action else {
            trace!(target: STIMULUS_TARGET, "ignoring intent without action");
            return None;
        };
        match action.as_str() {
            PACKET_ACTION => match extras.remove(PACKET_EXTRA) {
                Some(Value::String(packet)) => Some(Self::DevicePacket(packet)),
                Some(Value::Array(tuples)) => Some(Self::DevicePacket(
                    Value::Array(tuples).to_string(),
                )),
                _ => {
                    debug!(target: STIMULUS_TARGET, "ignoring packet intent without packet");
                    None
                }
            },
            ACK_ACTION => transaction_id(&extras).map(Self::Acknowledge),
            NACK_ACTION => transaction_id(&extras).map(Self::Reject),
            _ => Some(Self::External(ExternalEvent::with_extras(action, extras))),
        }
    }
}

fn transaction_id(extras: &Map<String, Value>) -> Option<TransactionId> {
    let raw = extras
        .get(TRANSACTION_ID_EXTRA)
        .and_then(Value::as_i64)
        .unwrap_or(-1);
    match u32::try_from(raw) {
        Ok(id) => Some(TransactionId::new(id)),
        Err(_) => {
            debug!(
                target: STIMULUS_TARGET,
                transaction = raw,
                "ignoring signal for a transaction id that cannot be pending"
            );
            None
        }
    }
}

/// A message delivered by the host: an action name plus extras.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Intent {
    /// Action name; intents without one are ignored.
    #[serde(default)]
    pub action: Option<String>,
    /// Arbitrary action-specific data.
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl Intent {
    /// Builds an intent with an action and no extras.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            extras: Map::new(),
        }
    }

    /// Adds or replaces an extra.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}
