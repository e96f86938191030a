//! Composition root for the dispatch core.
//!
//! [`bootstrap_with`] wires the configuration, telemetry, timer, correlator,
//! link, registry and dispatch loop together, hands the caller a
//! [`ModuleRegistrar`] to bind its handler modules, then freezes the registry
//! and starts the loop.

use std::sync::Arc;

use ortho_config::OrthoError;
use thiserror::Error;

use tether_config::{Config, ConfigValidationError};

use crate::codec::{JsonDictionaryCodec, PacketCodec};
use crate::correlator::TransactionCorrelator;
use crate::dispatch_loop::{DispatchHandle, DispatchLoop, DispatchLoopError};
use crate::health::{LifecycleReporter, StructuredLifecycleReporter};
use crate::link::{DeviceConnection, DeviceLink};
use crate::module::{DestinationId, ExternalEvent, HandlerModule};
use crate::registry::HandlerRegistry;
use crate::router::DispatchRouter;
use crate::stimulus::Intent;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::timer::{ThreadTimer, TimerError};

/// Action of the event broadcast when the device connects or disconnects.
pub const CONNECTION_STATE_ACTION: &str = "connection_state";
/// Extra carrying the new connection state as a boolean.
pub const CONNECTED_EXTRA: &str = "connected";

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration loaded but holds unusable values.
    #[error("invalid configuration: {source}")]
    InvalidConfiguration {
        /// Validation failure.
        #[source]
        source: ConfigValidationError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The timer thread failed to start.
    #[error("failed to start timer: {source}")]
    Timer {
        /// Underlying timer error.
        #[source]
        source: TimerError,
    },
    /// The dispatch thread failed to start.
    #[error("failed to start dispatch loop: {source}")]
    DispatchLoop {
        /// Underlying loop error.
        #[source]
        source: DispatchLoopError,
    },
}

/// Errors surfaced while stopping a running core.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The dispatch thread did not stop cleanly.
    #[error("dispatch loop failed during shutdown: {0}")]
    DispatchLoop(#[source] DispatchLoopError),
    /// The timer thread did not stop cleanly.
    #[error("timer failed during shutdown: {0}")]
    Timer(#[source] TimerError),
}

/// Registration surface handed to the caller during bootstrap.
///
/// Modules usually need the link to send requests and the dispatch handle to
/// post work, so both are available while the registry is still mutable.
pub struct ModuleRegistrar<'a> {
    registry: &'a mut HandlerRegistry,
    link: &'a Arc<DeviceLink>,
    handle: &'a DispatchHandle,
    config: &'a Config,
}

impl ModuleRegistrar<'_> {
    /// Binds `module` to a destination id.
    pub fn add_module(&mut self, module: Arc<dyn HandlerModule>, id: impl Into<DestinationId>) {
        self.registry.add_module(module, id);
    }

    /// Binds `module` to an external action name.
    pub fn register_action(&mut self, action: impl Into<String>, module: Arc<dyn HandlerModule>) {
        self.registry.register_action(action, module);
    }

    /// Outbound link modules send through.
    #[must_use]
    pub fn link(&self) -> Arc<DeviceLink> {
        Arc::clone(self.link)
    }

    /// Handle for posting work to the dispatch thread.
    #[must_use]
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.config
    }
}

/// Running dispatch core.
pub struct Tether {
    config: Config,
    telemetry: TelemetryHandle,
    registry: Arc<HandlerRegistry>,
    link: Arc<DeviceLink>,
    handle: DispatchHandle,
    dispatch: DispatchLoop,
    timer: Arc<ThreadTimer>,
}

impl Tether {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Producer handle for the dispatch loop.
    #[must_use]
    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Outbound link to the device.
    #[must_use]
    pub fn link(&self) -> &Arc<DeviceLink> {
        &self.link
    }

    /// Frozen handler registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Number of transactions awaiting a device signal.
    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.link.correlator().pending_count()
    }

    /// Translates a host intent and queues it for dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::Closed`] once the loop has stopped.
    pub fn deliver_intent(&self, intent: Intent) -> Result<bool, DispatchLoopError> {
        self.handle.deliver_intent(intent)
    }

    /// Tells every module bound to a destination id that the device
    /// connected or disconnected.
    ///
    /// Delivery happens on the dispatch thread, after the stimuli already
    /// queued.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError`] when the notification cannot be queued.
    pub fn broadcast_connection_state(&self, connected: bool) -> Result<(), DispatchLoopError> {
        let registry = Arc::clone(&self.registry);
        self.handle.post(move || {
            let event =
                ExternalEvent::new(CONNECTION_STATE_ACTION).with_extra(CONNECTED_EXTRA, connected);
            registry.broadcast(|module| module.receive_external_event(&event));
        })
    }

    /// Drains the dispatch queue, closes the connection and stops the timer.
    ///
    /// Transactions still pending are dropped without notifying listeners.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when a background thread panicked.
    pub fn shutdown(self) -> Result<(), ShutdownError> {
        let Self {
            dispatch,
            link,
            timer,
            ..
        } = self;
        let drained = dispatch.shutdown().map_err(ShutdownError::DispatchLoop);
        link.close();
        let stopped = timer.shutdown().map_err(ShutdownError::Timer);
        drained.and(stopped)
    }
}

/// Bootstraps the core with the system loader, structured reporter and JSON
/// codec.
///
/// # Errors
///
/// See [`bootstrap_with`].
pub fn bootstrap(
    connection: Box<dyn DeviceConnection>,
    register: impl FnOnce(&mut ModuleRegistrar<'_>),
) -> Result<Tether, BootstrapError> {
    bootstrap_with(
        &SystemConfigLoader,
        Arc::new(StructuredLifecycleReporter::new()),
        connection,
        Arc::new(JsonDictionaryCodec::new()),
        register,
    )
}

/// Bootstraps the core using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry or either
/// background thread fails. The reporter sees every failure.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn LifecycleReporter>,
    connection: Box<dyn DeviceConnection>,
    codec: Arc<dyn PacketCodec>,
    register: impl FnOnce(&mut ModuleRegistrar<'_>),
) -> Result<Tether, BootstrapError> {
    reporter.bootstrap_starting();
    let fail = |error: BootstrapError| {
        reporter.bootstrap_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(BootstrapError::Configuration { source }))?;
    config
        .validate()
        .map_err(|source| fail(BootstrapError::InvalidConfiguration { source }))?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| fail(BootstrapError::Telemetry { source }))?;
    let timer = ThreadTimer::start()
        .map(Arc::new)
        .map_err(|source| fail(BootstrapError::Timer { source }))?;

    let correlator = TransactionCorrelator::new(timer.clone(), config.transaction_timeout());
    let link = Arc::new(DeviceLink::new(
        connection,
        correlator.clone(),
        Arc::clone(&reporter),
    ));
    let (handle, queue) = DispatchLoop::channel(config.dispatch_queue_capacity(), timer.clone());

    let mut registry = HandlerRegistry::new();
    register(&mut ModuleRegistrar {
        registry: &mut registry,
        link: &link,
        handle: &handle,
        config: &config,
    });
    let registry = Arc::new(registry);

    let router = DispatchRouter::new(Arc::clone(&registry), correlator, codec);
    let dispatch = match queue.start(router) {
        Ok(dispatch) => dispatch,
        Err(source) => {
            // Best effort: the timer has nothing scheduled yet.
            let _ = timer.shutdown();
            return Err(fail(BootstrapError::DispatchLoop { source }));
        }
    };

    reporter.bootstrap_succeeded(&config);
    Ok(Tether {
        config,
        telemetry,
        registry,
        link,
        handle,
        dispatch,
        timer,
    })
}
