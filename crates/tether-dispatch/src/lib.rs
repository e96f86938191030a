//! Message-dispatch core for a host application paired with a wearable device.
//!
//! Packets arrive from the device as keyed dictionaries whose key `0` names
//! the handler module they are addressed to. The [`DispatchRouter`] decodes
//! each packet, looks the destination up in the [`HandlerRegistry`] and hands
//! the content to the module. Events raised elsewhere in the host are routed
//! the same way by action name.
//!
//! Requests sent to the device through the [`DeviceLink`] open a transaction
//! in the [`TransactionCorrelator`]. The device settles each transaction with
//! an acknowledgement or a rejection; one that hears nothing within the
//! configured window times out. Whichever signal arrives first wins and every
//! later signal is ignored.
//!
//! All routing happens on a single dispatch thread fed by a bounded queue, so
//! modules never run concurrently with each other. Timeouts fire on a
//! separate timer thread and meet dispatch-thread signals only inside the
//! correlator's lock.
//!
//! [`bootstrap_with`] assembles the pieces from a layered
//! [`tether_config::Config`], installs structured telemetry and returns a
//! running [`Tether`].

mod bootstrap;
mod codec;
mod correlator;
mod dictionary;
mod dispatch_loop;
mod health;
mod link;
mod module;
mod registry;
mod router;
mod stimulus;
pub mod telemetry;
mod timer;

pub use bootstrap::{
    BootstrapError, CONNECTED_EXTRA, CONNECTION_STATE_ACTION, ConfigLoader, ModuleRegistrar,
    ShutdownError, SystemConfigLoader, Tether, bootstrap, bootstrap_with,
};
pub use codec::{CodecError, InboundPacket, JsonDictionaryCodec, PacketCodec};
pub use correlator::{
    CompletedTransaction, Resolution, TransactionCorrelator, TransactionFailure, TransactionId,
    TransactionListener, TransactionState,
};
pub use dictionary::{DESTINATION_KEY, Dictionary, IntWidth, TupleValue};
pub use dispatch_loop::{DispatchHandle, DispatchLoop, DispatchLoopError, DispatchQueue};
pub use health::{LifecycleReporter, StructuredLifecycleReporter};
pub use link::{ConnectionError, DeviceConnection, DeviceLink, LinkError};
pub use module::{DestinationId, ExternalEvent, HandlerModule};
pub use registry::HandlerRegistry;
pub use router::{DiscardReason, DispatchOutcome, DispatchRouter};
pub use stimulus::{
    ACK_ACTION, DispatchTask, Intent, NACK_ACTION, PACKET_ACTION, PACKET_EXTRA, Stimulus,
    TRANSACTION_ID_EXTRA,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
#[cfg(any(test, feature = "test-support"))]
pub use timer::ManualTimer;
pub use timer::{ThreadTimer, TimeoutCallback, TimeoutScheduler, TimerError, TimerHandle};

#[cfg(test)]
mod tests;
