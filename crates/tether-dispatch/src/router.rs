//! Routing of stimuli to handler modules and the correlator.
//!
//! The router is the only code the dispatch loop calls. It never propagates a
//! failure: undecodable packets and unknown destinations are logged and
//! discarded, and the result of every call is reported as a
//! [`DispatchOutcome`] so callers can observe what happened.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::codec::PacketCodec;
use crate::correlator::{Resolution, TransactionCorrelator, TransactionId, TransactionState};
use crate::module::{DestinationId, ExternalEvent};
use crate::registry::HandlerRegistry;
use crate::stimulus::Stimulus;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Why a stimulus was dropped without reaching a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    /// The packet could not be decoded.
    Malformed,
    /// No module is registered for the packet's destination.
    UnknownDestination(DestinationId),
    /// No module is registered for the event's action.
    UnknownAction(String),
}

/// What a single dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A module received the stimulus.
    Delivered,
    /// A pending transaction was settled.
    Resolved(TransactionState),
    /// The signal named a transaction that was not pending.
    Stale,
    /// The stimulus was dropped.
    Discarded(DiscardReason),
    /// A posted task ran.
    TaskRun,
}

impl From<Resolution> for DispatchOutcome {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Resolved(state) => Self::Resolved(state),
            Resolution::Stale => Self::Stale,
        }
    }
}

/// Routes stimuli to the registry or the correlator.
#[derive(Clone)]
pub struct DispatchRouter {
    registry: Arc<HandlerRegistry>,
    correlator: TransactionCorrelator,
    codec: Arc<dyn PacketCodec>,
}

impl DispatchRouter {
    /// Creates a router over a frozen registry.
    #[must_use]
    pub fn new(
        registry: Arc<HandlerRegistry>,
        correlator: TransactionCorrelator,
        codec: Arc<dyn PacketCodec>,
    ) -> Self {
        Self {
            registry,
            correlator,
            codec,
        }
    }

    /// Registry consulted for every lookup.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Routes one stimulus.
    pub fn dispatch(&self, stimulus: Stimulus) -> DispatchOutcome {
        trace!(target: DISPATCH_TARGET, kind = stimulus.kind(), "dispatching stimulus");
        match stimulus {
            Stimulus::DevicePacket(raw) => self.on_device_packet(&raw),
            Stimulus::Acknowledge(id) => self.on_acknowledge(id),
            Stimulus::Reject(id) => self.on_reject(id),
            Stimulus::External(event) => self.on_external_event(&event),
            Stimulus::Task(task) => {
                task.run();
                DispatchOutcome::TaskRun
            }
        }
    }

    /// Decodes a device packet and hands it to the module bound to its
    /// destination.
    pub fn on_device_packet(&self, raw: &str) -> DispatchOutcome {
        let packet = match self.codec.decode(raw) {
            Ok(packet) => packet,
            Err(decode_error) => {
                error!(
                    target: DISPATCH_TARGET,
                    error = %decode_error,
                    "discarding undecodable packet"
                );
                return DispatchOutcome::Discarded(DiscardReason::Malformed);
            }
        };

        let Some(module) = self.registry.module(packet.destination) else {
            warn!(
                target: DISPATCH_TARGET,
                destination = %packet.destination,
                "discarding packet for unregistered destination"
            );
            return DispatchOutcome::Discarded(DiscardReason::UnknownDestination(
                packet.destination,
            ));
        };

        debug!(
            target: DISPATCH_TARGET,
            destination = %packet.destination,
            content = %packet.content,
            "delivering packet"
        );
        module.receive_packet(&packet.content);
        DispatchOutcome::Delivered
    }

    /// Settles a transaction the device confirmed.
    pub fn on_acknowledge(&self, id: TransactionId) -> DispatchOutcome {
        self.correlator.acknowledge(id).into()
    }

    /// Settles a transaction the device refused.
    pub fn on_reject(&self, id: TransactionId) -> DispatchOutcome {
        self.correlator.reject(id).into()
    }

    /// Hands an external event to the module bound to its action.
    ///
    /// Events nobody registered for are common and dropped quietly.
    pub fn on_external_event(&self, event: &ExternalEvent) -> DispatchOutcome {
        let Some(module) = self.registry.action(event.action()) else {
            trace!(
                target: DISPATCH_TARGET,
                action = event.action(),
                "no module registered for action"
            );
            return DispatchOutcome::Discarded(DiscardReason::UnknownAction(
                event.action().to_owned(),
            ));
        };
        debug!(target: DISPATCH_TARGET, action = event.action(), "delivering event");
        module.receive_external_event(event);
        DispatchOutcome::Delivered
    }
}
