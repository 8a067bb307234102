//! Message pump lifecycle, settlement, shutdown and circuit breaking

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use servicebus_transport::client::in_memory::DEAD_LETTER_REASON;
use servicebus_transport::client::{AccessRight, AdministrationClient, InMemoryNamespace, QueueProperties};
use servicebus_transport::receiving::handler_fn;
use servicebus_transport::resilience::CircuitState;
use servicebus_transport::{
    ErrorHandleResult, HostSettings, MessageContext, MessageHandler, PumpState, TransportConfig,
    TransportError,
};
use tokio::time::Instant;

fn counting_handler(
    completed: Arc<AtomicUsize>,
    work: Duration,
) -> Arc<dyn MessageHandler> {
    handler_fn(move |_context| {
        let completed = completed.clone();
        async move {
            tokio::time::sleep(work).await;
            completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

async fn five_slow_handlers_in_flight(namespace: &InMemoryNamespace, completed: Arc<AtomicUsize>) -> servicebus_transport::MessagePump {
    create_queue(namespace, "Sales").await;
    send_raw(namespace, "Sales", numbered_messages(5)).await;

    let pump = pump(
        namespace,
        "Sales",
        receive_settings("Sales").with_max_concurrency(5),
        fast_config(),
        HostSettings::new("Sales"),
    );
    pump.start(counting_handler(completed, Duration::from_secs(2)))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || pump.stats().in_flight == 5).await);
    pump
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_in_flight_handlers_finish_within_grace() {
    let namespace = InMemoryNamespace::new();
    let completed = Arc::new(AtomicUsize::new(0));
    let pump = five_slow_handlers_in_flight(&namespace, completed.clone()).await;

    let started = Instant::now();
    pump.stop_with_grace(Duration::from_secs(5)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_secs(5), "stop took {elapsed:?}");
    assert_eq!(completed.load(Ordering::SeqCst), 5);

    let stats = pump.stats();
    assert_eq!(stats.messages_completed, 5);
    assert_eq!(stats.messages_abandoned, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.state, PumpState::Stopped);
    assert_eq!(namespace.message_count("Sales"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_unfinished_messages_after_grace() {
    let namespace = InMemoryNamespace::new();
    let completed = Arc::new(AtomicUsize::new(0));
    let pump = five_slow_handlers_in_flight(&namespace, completed.clone()).await;

    let started = Instant::now();
    pump.stop_with_grace(Duration::from_secs(1)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(1), "stop took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "stop took {elapsed:?}");
    assert_eq!(completed.load(Ordering::SeqCst), 0);

    let stats = pump.stats();
    assert_eq!(stats.messages_completed, 0);
    assert_eq!(stats.messages_abandoned, 5);
    assert_eq!(namespace.message_count("Sales"), 5);
    assert_eq!(namespace.locked_message_count("Sales"), 0);

    // Released messages come back as redeliveries
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let seen = deliveries.clone();
    pump.start(handler_fn(move |context: MessageContext| {
        let seen = seen.clone();
        async move {
            seen.lock().push(context.delivery_count);
            Ok(())
        }
    }))
    .await
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || deliveries.lock().len() == 5).await);
    assert!(deliveries.lock().iter().all(|count| *count == 2));
    pump.stop().await.unwrap();
    assert_eq!(namespace.message_count("Sales"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_threshold_and_recovers_on_successful_probe() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    namespace.fail_receives(
        TransportError::transport("Sales", "receive", "service unavailable"),
        None,
    );

    let config = TransportConfig {
        circuit_breaker: breaker(3, Duration::from_secs(5)),
        ..fast_config()
    };
    let pump = pump(&namespace, "Sales", receive_settings("Sales"), config, HostSettings::new("Sales"));
    pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pump.state(), PumpState::CircuitOpen);
    assert_eq!(namespace.receive_attempts().len(), 3);
    assert_eq!(pump.stats().consecutive_receive_failures, 3);
    assert_eq!(pump.stats().receive_failures, 3);
    let circuit = pump.stats().circuit;
    assert_eq!(circuit.current_state, CircuitState::Open);
    assert_eq!(circuit.times_opened, 1);
    assert_eq!(circuit.failure_count, 3);

    // No receive while the circuit is open
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(namespace.receive_attempts().len(), 3);

    namespace.clear_receive_failures();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(pump.state(), PumpState::Running);
    assert_eq!(pump.stats().consecutive_receive_failures, 0);
    let circuit = pump.stats().circuit;
    assert_eq!(circuit.current_state, CircuitState::Closed);
    assert_eq!(circuit.times_opened, 1);
    assert!(circuit.success_count >= 1);
    let attempts = namespace.receive_attempts();
    assert!(attempts.len() > 3);
    assert!(attempts[3] - attempts[2] >= Duration::from_secs(5));

    pump.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_critical_error_raised_once_when_circuit_stays_open() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    namespace.fail_receives(TransportError::timeout("receive", 60_000), None);

    let raised = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = raised.clone();
    let host = HostSettings::new("Sales").with_critical_error_action(move |message, _error| {
        sink.lock().push(message.to_string());
    });
    let config = TransportConfig {
        circuit_breaker: breaker(3, Duration::from_secs(2)),
        time_to_wait_before_triggering_circuit_breaker_seconds: 10,
        ..fast_config()
    };
    let pump = pump(&namespace, "Sales", receive_settings("Sales"), config, host);
    pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(raised.lock().is_empty());
    assert_eq!(pump.state(), PumpState::CircuitOpen);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(raised.lock().len(), 1);
    assert!(raised.lock()[0].contains("Sales"));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(raised.lock().len(), 1);
    assert_eq!(pump.stats().critical_errors_raised, 1);

    pump.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_missing_listen_right_trips_the_circuit() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    namespace.deny(AccessRight::Listen);

    let config = TransportConfig {
        circuit_breaker: breaker(2, Duration::from_secs(30)),
        ..fast_config()
    };
    let pump = pump(&namespace, "Sales", receive_settings("Sales"), config, HostSettings::new("Sales"));
    pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pump.state(), PumpState::CircuitOpen);
    assert_eq!(namespace.receive_attempts().len(), 2);
    pump.stop().await.unwrap();
}

struct RetryOnceThenHandled {
    attempts: AtomicUsize,
}

#[async_trait]
impl MessageHandler for RetryOnceThenHandled {
    async fn handle(&self, context: &MessageContext) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("cannot process {}", context.message_id)
    }

    async fn on_error(&self, context: &MessageContext, _error: &anyhow::Error) -> ErrorHandleResult {
        if context.delivery_count >= 2 {
            ErrorHandleResult::Handled
        } else {
            ErrorHandleResult::RetryRequired
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_on_error_decides_between_redelivery_and_completion() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    send_raw(&namespace, "Sales", numbered_messages(1)).await;

    let handler = Arc::new(RetryOnceThenHandled {
        attempts: AtomicUsize::new(0),
    });
    let pump = pump(&namespace, "Sales", receive_settings("Sales"), fast_config(), HostSettings::new("Sales"));
    pump.start(handler.clone()).await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || pump.stats().messages_completed == 1).await);
    pump.stop().await.unwrap();

    let stats = pump.stats();
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.handler_failures, 2);
    assert_eq!(stats.messages_abandoned, 1);
    assert_eq!(namespace.message_count("Sales"), 0);
    assert_eq!(namespace.dead_letter_count("Sales"), 0);
}

/// Fails every delivery; its error hook panics on the first one
struct PanickingErrorHook;

#[async_trait]
impl MessageHandler for PanickingErrorHook {
    async fn handle(&self, context: &MessageContext) -> anyhow::Result<()> {
        anyhow::bail!("cannot process {}", context.message_id)
    }

    async fn on_error(&self, context: &MessageContext, _error: &anyhow::Error) -> ErrorHandleResult {
        if context.delivery_count < 2 {
            panic!("error hook blew up");
        }
        ErrorHandleResult::Handled
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_error_hook_releases_message_for_redelivery() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    send_raw(&namespace, "Sales", numbered_messages(1)).await;

    let pump = pump(&namespace, "Sales", receive_settings("Sales"), fast_config(), HostSettings::new("Sales"));
    pump.start(Arc::new(PanickingErrorHook)).await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || pump.stats().messages_completed == 1).await);
    pump.stop().await.unwrap();

    let stats = pump.stats();
    assert_eq!(stats.handler_failures, 2);
    assert_eq!(stats.messages_abandoned, 1);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(namespace.locked_message_count("Sales"), 0);
    assert_eq!(namespace.message_count("Sales"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_entity_dead_letters_after_max_delivery_count() {
    let namespace = InMemoryNamespace::new();
    namespace
        .create_queue(&QueueProperties {
            max_delivery_count: 2,
            ..QueueProperties::new("Sales")
        })
        .await
        .unwrap();
    send_raw(&namespace, "Sales", numbered_messages(1)).await;

    let pump = pump(&namespace, "Sales", receive_settings("Sales"), fast_config(), HostSettings::new("Sales"));
    pump.start(handler_fn(|_| async { anyhow::bail!("poison message") }))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || namespace.dead_letter_count("Sales") == 1).await);
    pump.stop().await.unwrap();

    assert_eq!(pump.stats().handler_failures, 2);
    let dead = namespace.peek_dead_letters("Sales");
    assert_eq!(
        dead[0].application_properties.get(DEAD_LETTER_REASON).map(String::as_str),
        Some("MaxDeliveryCountExceeded")
    );
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_handlers_never_exceed_concurrency() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    send_raw(&namespace, "Sales", numbered_messages(6)).await;

    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));
    let (current_in, peak_in, done_in) = (current.clone(), peak.clone(), done.clone());

    let pump = pump(
        &namespace,
        "Sales",
        receive_settings("Sales").with_max_concurrency(2),
        fast_config(),
        HostSettings::new("Sales"),
    );
    pump.start(handler_fn(move |_| {
        let (current, peak, done) = (current_in.clone(), peak_in.clone(), done_in.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }))
    .await
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 6).await);
    pump.stop().await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(pump.stats().messages_completed, 6);
}

#[tokio::test]
async fn test_receiver_prefetch_override_wins() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    let config = TransportConfig {
        prefetch_count: Some(50),
        ..fast_config()
    };

    let pump = pump(
        &namespace,
        "Sales",
        receive_settings("Sales").with_prefetch_count(7),
        config.clone(),
        HostSettings::new("Sales"),
    );
    pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();
    assert_eq!(namespace.receiver_options("Sales").map(|o| o.prefetch_count), Some(7));
    assert_eq!(pump.stats().prefetch_count, 7);
    pump.stop().await.unwrap();

    let transport_wide = servicebus_transport::MessagePump::new(
        receive_settings("Sales"),
        "Sales".to_string(),
        Arc::new(namespace.clone()),
        permissions(&namespace),
        config,
        HostSettings::new("Sales"),
        None,
    );
    assert_eq!(transport_wide.prefetch_count_for(4), 50);
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let namespace = InMemoryNamespace::new();
    create_queue(&namespace, "Sales").await;
    let pump = pump(&namespace, "Sales", receive_settings("Sales"), fast_config(), HostSettings::new("Sales"));
    let mut states = pump.subscribe_state();
    assert_eq!(*states.borrow_and_update(), PumpState::Stopped);

    pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();
    assert_eq!(*states.borrow_and_update(), PumpState::Running);
    assert!(pump.state().is_active());

    let result = pump.start(handler_fn(|_| async { Ok(()) })).await;
    assert!(matches!(result, Err(TransportError::Internal { .. })));

    pump.stop().await.unwrap();
    assert_eq!(*states.borrow_and_update(), PumpState::Stopped);
    assert!(matches!(
        pump.stop().await,
        Err(TransportError::AlreadyStopped { .. })
    ));
}
