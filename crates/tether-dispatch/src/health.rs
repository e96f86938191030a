//! Structured reporting of bootstrap and connection lifecycle events.

use std::sync::Arc;

use tether_config::Config;

use crate::bootstrap::BootstrapError;
use crate::link::ConnectionError;

const HEALTH_TARGET: &str = "tether::health";

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked once the dispatch loop is running.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before the device connection is opened.
    fn connection_opening(&self);

    /// Invoked after the device connection opens.
    fn connection_ready(&self);

    /// Invoked when the device connection cannot be opened.
    fn connection_failed(&self, error: &ConnectionError);

    /// Invoked after an open connection is closed.
    fn connection_closed(&self);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn connection_opening(&self) {
        (**self).connection_opening();
    }

    fn connection_ready(&self) {
        (**self).connection_ready();
    }

    fn connection_failed(&self, error: &ConnectionError) {
        (**self).connection_failed(error);
    }

    fn connection_closed(&self) {
        (**self).connection_closed();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting dispatch core"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            transaction_timeout_ms = config.transaction_timeout().as_millis(),
            queue_capacity = config.dispatch_queue_capacity(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "dispatch core ready"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "dispatch core failed to start"
        );
    }

    fn connection_opening(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_opening",
            "opening device connection"
        );
    }

    fn connection_ready(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_ready",
            "device connection open"
        );
    }

    fn connection_failed(&self, error: &ConnectionError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "connection_failed",
            message = %error.message(),
            error = ?error,
            "device connection failed to open"
        );
    }

    fn connection_closed(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_closed",
            "device connection closed"
        );
    }
}
