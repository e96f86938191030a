/// Default expiry window for pending transactions, in milliseconds.
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 10_000;

/// Default bound of the dispatch stimulus queue.
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 256;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default expiry window for pending transactions, in milliseconds.
#[must_use]
pub fn default_transaction_timeout_ms() -> u64 {
    DEFAULT_TRANSACTION_TIMEOUT_MS
}

/// Default bound of the dispatch stimulus queue.
#[must_use]
pub fn default_dispatch_queue_capacity() -> usize {
    DEFAULT_DISPATCH_QUEUE_CAPACITY
}

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
