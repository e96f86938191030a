//! Test doubles shared by the unit and behavioural suites.

use std::ffi::OsString;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use ortho_config::OrthoError;
use serde_json::{Value, json};

use tether_config::Config;

use crate::bootstrap::{BootstrapError, ConfigLoader};
use crate::correlator::{CompletedTransaction, TransactionId, TransactionListener};
use crate::dictionary::Dictionary;
use crate::health::LifecycleReporter;
use crate::link::{ConnectionError, DeviceConnection};
use crate::module::{ExternalEvent, HandlerModule};

/// Module that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingModule {
    name: String,
    packets: Mutex<Vec<Dictionary>>,
    events: Mutex<Vec<ExternalEvent>>,
    threads: Mutex<Vec<Option<String>>>,
}

impl RecordingModule {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            ..Self::default()
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn packets(&self) -> Vec<Dictionary> {
        self.packets.lock().expect("packets mutex poisoned").clone()
    }

    pub fn events(&self) -> Vec<ExternalEvent> {
        self.events.lock().expect("events mutex poisoned").clone()
    }

    pub fn packet_count(&self) -> usize {
        self.packets.lock().expect("packets mutex poisoned").len()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().expect("events mutex poisoned").len()
    }

    /// Names of the threads each delivery ran on.
    pub fn threads(&self) -> Vec<Option<String>> {
        self.threads.lock().expect("threads mutex poisoned").clone()
    }

    fn record_thread(&self) {
        let name = thread::current().name().map(str::to_owned);
        self.threads.lock().expect("threads mutex poisoned").push(name);
    }
}

impl HandlerModule for RecordingModule {
    fn receive_packet(&self, content: &Dictionary) {
        self.record_thread();
        self.packets
            .lock()
            .expect("packets mutex poisoned")
            .push(content.clone());
    }

    fn receive_external_event(&self, event: &ExternalEvent) {
        self.record_thread();
        self.events
            .lock()
            .expect("events mutex poisoned")
            .push(event.clone());
    }
}

/// Listener that records every completed transaction.
#[derive(Debug, Default)]
pub struct RecordingListener {
    completions: Mutex<Vec<CompletedTransaction>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn completions(&self) -> Vec<CompletedTransaction> {
        self.completions
            .lock()
            .expect("listener mutex poisoned")
            .clone()
    }

    pub fn count(&self) -> usize {
        self.completions.lock().expect("listener mutex poisoned").len()
    }
}

impl TransactionListener for RecordingListener {
    fn transaction_completed(&self, completed: &CompletedTransaction) {
        self.completions
            .lock()
            .expect("listener mutex poisoned")
            .push(completed.clone());
    }
}

/// Lifecycle events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// Connection open attempted.
    ConnectionOpening,
    /// Connection opened.
    ConnectionReady,
    /// Connection failed to open with a message.
    ConnectionFailed(String),
    /// Connection closed.
    ConnectionClosed,
}

/// Records lifecycle events for assertions.
#[derive(Debug, Default)]
pub struct RecordingLifecycleReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingLifecycleReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .expect("lifecycle reporter mutex poisoned")
            .push(event);
    }
}

impl LifecycleReporter for RecordingLifecycleReporter {
    fn bootstrap_starting(&self) {
        self.record(LifecycleEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(LifecycleEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(LifecycleEvent::BootstrapFailed(error.to_string()));
    }

    fn connection_opening(&self) {
        self.record(LifecycleEvent::ConnectionOpening);
    }

    fn connection_ready(&self) {
        self.record(LifecycleEvent::ConnectionReady);
    }

    fn connection_failed(&self, error: &ConnectionError) {
        self.record(LifecycleEvent::ConnectionFailed(error.message().to_owned()));
    }

    fn connection_closed(&self) {
        self.record(LifecycleEvent::ConnectionClosed);
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    open: bool,
    opens: usize,
    refuse_opens: usize,
    transmitted: Vec<(TransactionId, Dictionary)>,
}

/// In-memory connection whose state stays observable after it is boxed.
#[derive(Debug, Clone, Default)]
pub struct StubConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl StubConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` open attempts fail.
    pub fn refuse_opens(&self, count: usize) {
        self.lock().refuse_opens = count;
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn transmitted(&self) -> Vec<(TransactionId, Dictionary)> {
        self.lock().transmitted.clone()
    }

    pub fn is_open_now(&self) -> bool {
        self.lock().open
    }

    /// Simulates the device dropping the connection.
    pub fn drop_connection(&self) {
        self.lock().open = false;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().expect("connection mutex poisoned")
    }
}

impl DeviceConnection for StubConnection {
    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn open(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        state.opens += 1;
        if state.refuse_opens > 0 {
            state.refuse_opens -= 1;
            return Err(ConnectionError::new("device unreachable"));
        }
        state.open = true;
        Ok(())
    }

    fn transmit(&mut self, id: TransactionId, content: &Dictionary) -> Result<(), ConnectionError> {
        self.lock().transmitted.push((id, content.clone()));
        Ok(())
    }

    fn close(&mut self) {
        self.lock().open = false;
    }
}

/// Loader returning a fixed configuration.
pub struct TestConfigLoader {
    config: Config,
}

impl TestConfigLoader {
    pub fn new() -> Self {
        Self {
            config: Config {
                log_filter: String::from("warn"),
                ..Config::default()
            },
        }
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let mut loader = Self::new();
        loader.config.transaction_timeout_ms =
            u64::try_from(timeout.as_millis()).expect("timeout fits in u64");
        loader
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Loader that intentionally fails by passing an unknown log format.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("tether"),
            OsString::from("--log-format"),
            OsString::from("yaml"),
        ];
        Config::load_from_iter(args)
    }
}

/// Builds the JSON tuple form of a packet addressed to `destination`.
pub fn packet_json(destination: u32, strings: &[(u32, &str)]) -> String {
    let mut tuples = vec![json!({
        "key": 0,
        "type": "uint",
        "length": 4,
        "value": destination,
    })];
    tuples.extend(strings.iter().map(|(key, value)| {
        json!({
            "key": key,
            "type": "string",
            "length": value.len(),
            "value": value,
        })
    }));
    Value::Array(tuples).to_string()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
