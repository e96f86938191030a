//! Behavioural tests for bootstrap and the lazy device connection.

use std::sync::Arc;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

use crate::bootstrap::{BootstrapError, ConfigLoader, Tether, bootstrap_with};
use crate::codec::JsonDictionaryCodec;
use crate::dictionary::Dictionary;
use crate::link::LinkError;

use super::support::{
    FailingConfigLoader, LifecycleEvent, RecordingLifecycleReporter, StubConnection,
    TestConfigLoader,
};

struct BootstrapWorld {
    loader: Option<Box<dyn ConfigLoader>>,
    connection: StubConnection,
    reporter: Arc<RecordingLifecycleReporter>,
    tether: Option<Tether>,
    error: Option<BootstrapError>,
    sends: Vec<Result<(), LinkError>>,
}

impl BootstrapWorld {
    fn tether(&self) -> &Tether {
        self.tether.as_ref().expect("core is not running")
    }
}

impl Drop for BootstrapWorld {
    fn drop(&mut self) {
        if let Some(tether) = self.tether.take() {
            let _ = tether.shutdown();
        }
    }
}

#[fixture]
fn world() -> BootstrapWorld {
    BootstrapWorld {
        loader: None,
        connection: StubConnection::new(),
        reporter: RecordingLifecycleReporter::new(),
        tether: None,
        error: None,
        sends: Vec::new(),
    }
}

#[given("a usable configuration")]
fn given_usable_configuration(world: &mut BootstrapWorld) {
    world.loader = Some(Box::new(TestConfigLoader::new()));
}

#[given("a configuration that fails to load")]
fn given_failing_configuration(world: &mut BootstrapWorld) {
    world.loader = Some(Box::new(FailingConfigLoader));
}

#[given("a device that refuses the first connection")]
fn given_refusing_device(world: &mut BootstrapWorld) {
    world.connection.refuse_opens(1);
}

#[when("the core boots")]
fn when_core_boots(world: &mut BootstrapWorld) {
    let loader = world.loader.take().expect("no configuration chosen");
    match bootstrap_with(
        loader.as_ref(),
        world.reporter.clone(),
        Box::new(world.connection.clone()),
        Arc::new(JsonDictionaryCodec::new()),
        |_| {},
    ) {
        Ok(tether) => world.tether = Some(tether),
        Err(error) => world.error = Some(error),
    }
}

#[when("a request is sent to the device")]
fn when_request_sent(world: &mut BootstrapWorld) {
    let mut content = Dictionary::new();
    content.insert_u8(0, 3);
    let result = world.tether().link().send(content, None).map(|_| ());
    world.sends.push(result);
}

#[then("bootstrap succeeded")]
fn then_bootstrap_succeeded(world: &mut BootstrapWorld) {
    assert!(world.error.is_none(), "unexpected error: {:?}", world.error);
    assert!(world.tether.is_some());
}

#[then("bootstrap failed while loading configuration")]
fn then_bootstrap_failed(world: &mut BootstrapWorld) {
    assert!(world.tether.is_none());
    assert!(matches!(
        world.error,
        Some(BootstrapError::Configuration { .. })
    ));
}

#[then("the reporter saw bootstrap start and succeed")]
fn then_reporter_saw_success(world: &mut BootstrapWorld) {
    assert_eq!(
        world.reporter.events(),
        vec![
            LifecycleEvent::BootstrapStarting,
            LifecycleEvent::BootstrapSucceeded,
        ]
    );
}

#[then("the reporter saw bootstrap fail")]
fn then_reporter_saw_failure(world: &mut BootstrapWorld) {
    let events = world.reporter.events();
    assert_eq!(events.first(), Some(&LifecycleEvent::BootstrapStarting));
    assert!(matches!(
        events.last(),
        Some(LifecycleEvent::BootstrapFailed(_))
    ));
    assert!(!events.contains(&LifecycleEvent::BootstrapSucceeded));
}

#[then("the connection was opened {count} time(s)")]
fn then_open_count(world: &mut BootstrapWorld, count: usize) {
    assert_eq!(world.connection.opens(), count);
}

#[then("the request was transmitted")]
fn then_request_transmitted(world: &mut BootstrapWorld) {
    assert!(matches!(world.sends.last(), Some(Ok(()))));
    assert_eq!(world.connection.transmitted().len(), 1);
}

#[then("the reporter saw the connection become ready")]
fn then_connection_ready(world: &mut BootstrapWorld) {
    let events = world.reporter.events();
    let opening = events
        .iter()
        .position(|event| *event == LifecycleEvent::ConnectionOpening);
    let ready = events
        .iter()
        .position(|event| *event == LifecycleEvent::ConnectionReady);
    assert!(opening.is_some() && opening < ready, "events: {events:?}");
}

#[then("the reporter saw the connection fail with {message}")]
fn then_connection_failed(world: &mut BootstrapWorld, message: String) {
    assert!(matches!(
        world.sends.first(),
        Some(Err(LinkError::Unavailable(_)))
    ));
    assert!(
        world
            .reporter
            .events()
            .contains(&LifecycleEvent::ConnectionFailed(message))
    );
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "A healthy bootstrap leaves the connection closed"
)]
fn healthy_bootstrap(world: BootstrapWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "An unreadable configuration aborts bootstrap"
)]
fn unreadable_configuration(world: BootstrapWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "The first request opens the connection"
)]
fn first_request_opens_connection(world: BootstrapWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/bootstrap.feature",
    name = "A refused connection is reported and retried"
)]
fn refused_connection_is_retried(world: BootstrapWorld) {
    let _ = world;
}
