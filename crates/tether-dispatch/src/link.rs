//! Outbound path to the device.
//!
//! The connection itself is a collaborator behind [`DeviceConnection`]. The
//! [`DeviceLink`] opens it lazily on first use, reopens it after it drops and
//! ties every transmission to a transaction in the correlator.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::debug;

use crate::correlator::{TransactionCorrelator, TransactionId, TransactionListener};
use crate::dictionary::Dictionary;
use crate::health::LifecycleReporter;

pub(crate) const LINK_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::link");

/// Failure reported by a [`DeviceConnection`].
#[derive(Debug, Error)]
#[error("device connection failed: {message}")]
pub struct ConnectionError {
    message: String,
    /// Optional source error reported by the connection implementation.
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConnectionError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error that wraps an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable message describing the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Errors returned by [`DeviceLink::send`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connection could not be opened.
    #[error("device is not reachable: {0}")]
    Unavailable(#[source] ConnectionError),
    /// The connection accepted the transaction but failed to transmit it.
    #[error("failed to transmit transaction {id}: {source}")]
    Transmit {
        /// Transaction that was abandoned.
        id: TransactionId,
        /// Connection failure.
        #[source]
        source: ConnectionError,
    },
}

/// Channel to the device, owned by the link.
///
/// Byte encoding and the transport are the implementation's concern; the
/// link only needs to open, transmit and close.
pub trait DeviceConnection: Send {
    /// Returns `true` while the channel can transmit.
    fn is_open(&self) -> bool;

    /// Opens the channel.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the device cannot be reached.
    fn open(&mut self) -> Result<(), ConnectionError>;

    /// Sends `content` tagged with `id` so the device can acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the transmission fails.
    fn transmit(&mut self, id: TransactionId, content: &Dictionary) -> Result<(), ConnectionError>;

    /// Closes the channel. Closing a closed channel does nothing.
    fn close(&mut self);
}

/// Lazily connected, transaction-tracked path to the device.
pub struct DeviceLink {
    connection: Mutex<Box<dyn DeviceConnection>>,
    correlator: TransactionCorrelator,
    reporter: Arc<dyn LifecycleReporter>,
}

impl DeviceLink {
    /// Wraps a connection; nothing is opened until first use.
    #[must_use]
    pub fn new(
        connection: Box<dyn DeviceConnection>,
        correlator: TransactionCorrelator,
        reporter: Arc<dyn LifecycleReporter>,
    ) -> Self {
        Self {
            connection: Mutex::new(connection),
            correlator,
            reporter,
        }
    }

    /// Returns `true` while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().is_open()
    }

    /// Opens the connection unless it is already open.
    ///
    /// Once open, later calls return immediately. A failed attempt leaves the
    /// connection closed so the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the connection cannot be opened.
    pub fn ensure_connected(&self) -> Result<(), ConnectionError> {
        let mut connection = self.lock();
        self.open_if_closed(&mut **connection)
    }

    /// Sends `content` to the device and tracks it until it settles.
    ///
    /// `listener` receives the outcome once the device acknowledges or
    /// rejects the transaction, or once it times out.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unavailable`] when the connection cannot be
    /// opened and [`LinkError::Transmit`] when transmission fails. In both
    /// cases no transaction remains pending and the listener is not called.
    pub fn send(
        &self,
        content: Dictionary,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<TransactionId, LinkError> {
        let mut connection = self.lock();
        self.open_if_closed(&mut **connection)
            .map_err(LinkError::Unavailable)?;

        let id = self.correlator.begin_transaction(content.clone(), listener);
        if let Err(source) = connection.transmit(id, &content) {
            self.correlator.abandon(id);
            return Err(LinkError::Transmit { id, source });
        }
        debug!(target: LINK_TARGET, transaction = %id, content = %content, "transmitted");
        Ok(id)
    }

    /// Closes the connection if it is open.
    pub fn close(&self) {
        let mut connection = self.lock();
        if connection.is_open() {
            connection.close();
            self.reporter.connection_closed();
        }
    }

    /// Correlator tracking this link's transactions.
    #[must_use]
    pub fn correlator(&self) -> &TransactionCorrelator {
        &self.correlator
    }

    fn open_if_closed(&self, connection: &mut dyn DeviceConnection) -> Result<(), ConnectionError> {
        if connection.is_open() {
            return Ok(());
        }
        self.reporter.connection_opening();
        match connection.open() {
            Ok(()) => {
                self.reporter.connection_ready();
                Ok(())
            }
            Err(error) => {
                self.reporter.connection_failed(&error);
                Err(error)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn DeviceConnection>> {
        self.connection
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl fmt::Debug for DeviceLink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DeviceLink")
            .field("connected", &self.is_connected())
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}
