//! Shared configuration for the Tether dispatch core.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults are
//! overridden by a `tether.toml` file, then by `TETHER_*` environment
//! variables, then by command-line flags. The resolved [`Config`] carries the
//! transaction expiry window, the dispatch queue bound, and the logging
//! settings consumed by the telemetry layer.

mod defaults;
mod logging;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_DISPATCH_QUEUE_CAPACITY, DEFAULT_LOG_FILTER, DEFAULT_TRANSACTION_TIMEOUT_MS,
    default_dispatch_queue_capacity, default_log_filter, default_log_filter_string,
    default_log_format, default_transaction_timeout_ms,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved configuration for the dispatch core.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "TETHER")]
pub struct Config {
    /// Milliseconds a transaction may stay pending before it times out.
    #[ortho_config(default = defaults::DEFAULT_TRANSACTION_TIMEOUT_MS)]
    pub transaction_timeout_ms: u64,
    /// Number of stimuli the dispatch queue buffers before senders block.
    #[ortho_config(default = defaults::DEFAULT_DISPATCH_QUEUE_CAPACITY)]
    pub dispatch_queue_capacity: usize,
    /// Tracing filter expression applied to the subscriber.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: default_transaction_timeout_ms(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, `tether.toml`, `TETHER_*`
    /// environment variables and the process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`OrthoError`] when a layer cannot be read or parsed.
    pub fn load() -> Result<Self, Arc<OrthoError>> {
        <Self as OrthoConfig>::load()
    }

    /// Loads the configuration using `args` in place of the process
    /// arguments. The first item is the program name.
    ///
    /// # Errors
    ///
    /// Returns [`OrthoError`] when a layer cannot be read or parsed.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, Arc<OrthoError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as OrthoConfig>::load_from_iter(args)
    }

    /// Window after which an unresolved transaction expires.
    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// Bound of the dispatch stimulus queue.
    #[must_use]
    pub fn dispatch_queue_capacity(&self) -> usize {
        self.dispatch_queue_capacity
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Structured log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Rejects values the dispatch core cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigValidationError`] when the transaction timeout or the
    /// queue capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.transaction_timeout_ms == 0 {
            return Err(ConfigValidationError::ZeroTransactionTimeout);
        }
        if self.dispatch_queue_capacity == 0 {
            return Err(ConfigValidationError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

/// Semantic errors in an otherwise well-formed configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Transactions would expire the instant they were created.
    #[error("transaction_timeout_ms must be greater than zero")]
    ZeroTransactionTimeout,
    /// The dispatch queue could never accept a stimulus.
    #[error("dispatch_queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
}
