//! # Message Pump
//!
//! Long-running receive loop for one receive endpoint.
//!
//! ## Architecture
//!
//! ```text
//! receive loop → [Semaphore] → handler task → complete / abandon
//!      │                            │
//!      └─→ CircuitBreaker           └─→ bounded to `concurrency` in flight
//! ```
//!
//! The loop only asks for as many messages as it has free handler slots.
//! Receive failures (not handler failures) feed the circuit breaker; while
//! the circuit is open the loop sleeps until the next probe instead of
//! polling. If the circuit stays open longer than the configured wait, the
//! host's critical error action is raised once for that episode.
//!
//! ## Shutdown
//!
//! `stop` stops pulling at once, then waits for in-flight handlers up to the
//! grace period. Handlers still running after that see their cancellation
//! token fire and their messages are abandoned for redelivery. A message
//! is never completed unless its handler succeeded or `on_error` reported
//! it handled.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{ErrorHandleResult, MessageContext, MessageHandler};
use super::state::{PumpCounters, PumpState, PumpStats};
use crate::client::{MessageReceiver, ReceiverOptions, TransportClient};
use crate::config::{HostSettings, ReceiveSettings, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::message::ReceivedMessage;
use crate::provisioning::{NamespacePermissions, SubscriptionManager};
use crate::resilience::{CircuitBreaker, CircuitBreakerError, CircuitState};

struct RunningPump {
    handler: Arc<dyn MessageHandler>,
    receiver: Arc<dyn MessageReceiver>,
    stop: CancellationToken,
    processing: CancellationToken,
    loop_task: JoinHandle<JoinSet<()>>,
}

/// Receive pump for one receive endpoint
pub struct MessagePump {
    settings: ReceiveSettings,
    receive_address: String,
    client: Arc<dyn TransportClient>,
    permissions: Arc<NamespacePermissions>,
    config: TransportConfig,
    host: HostSettings,
    subscriptions: Option<SubscriptionManager>,
    state: Arc<watch::Sender<PumpState>>,
    counters: Arc<PumpCounters>,
    concurrency: AtomicUsize,
    prefetch_count: AtomicU32,
    running: tokio::sync::Mutex<Option<RunningPump>>,
}

impl std::fmt::Debug for MessagePump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePump")
            .field("receiver_id", &self.settings.id)
            .field("receive_address", &self.receive_address)
            .field("state", &self.state())
            .field("has_subscription_manager", &self.subscriptions.is_some())
            .finish()
    }
}

impl MessagePump {
    pub fn new(
        settings: ReceiveSettings,
        receive_address: String,
        client: Arc<dyn TransportClient>,
        permissions: Arc<NamespacePermissions>,
        config: TransportConfig,
        host: HostSettings,
        subscriptions: Option<SubscriptionManager>,
    ) -> Self {
        let concurrency = settings
            .max_concurrency
            .unwrap_or(config.default_max_concurrency)
            .max(1);
        let (state, _) = watch::channel(PumpState::Stopped);

        Self {
            settings,
            receive_address,
            client,
            permissions,
            config,
            host,
            subscriptions,
            state: Arc::new(state),
            counters: Arc::new(PumpCounters::default()),
            concurrency: AtomicUsize::new(concurrency),
            prefetch_count: AtomicU32::new(0),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    /// Physical entity this pump receives from
    pub fn receive_address(&self) -> &str {
        &self.receive_address
    }

    pub fn settings(&self) -> &ReceiveSettings {
        &self.settings
    }

    /// Subscription manager, present when the receiver takes part in publish/subscribe
    pub fn subscriptions(&self) -> Option<&SubscriptionManager> {
        self.subscriptions.as_ref()
    }

    pub fn state(&self) -> PumpState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<PumpState> {
        self.state.subscribe()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Acquire)
    }

    /// Prefetch count for a given concurrency: receiver override, then
    /// transport override, then multiplier × concurrency
    pub fn prefetch_count_for(&self, concurrency: usize) -> u32 {
        self.settings
            .prefetch_count
            .unwrap_or_else(|| self.config.prefetch_count_for(concurrency))
    }

    pub fn stats(&self) -> PumpStats {
        self.counters.snapshot(
            self.state(),
            self.concurrency(),
            self.prefetch_count.load(Ordering::Acquire),
        )
    }

    /// Start receiving and dispatching messages to `handler`
    ///
    /// Requires receive rights from the namespace permission probe. The probe
    /// result is cached for the process, and a probe that failed transiently
    /// is cached as "no rights", so `start` then keeps failing with
    /// `Unauthorized { operation: "receive" }` even after the namespace
    /// recovers. Check the startup logs for the probe failure when that
    /// error appears on an entity the credentials can read.
    pub async fn start(&self, handler: Arc<dyn MessageHandler>) -> TransportResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::internal(format!(
                "message pump '{}' is already running",
                self.settings.id
            )));
        }

        *running = Some(self.launch(handler).await?);
        Ok(())
    }

    async fn launch(&self, handler: Arc<dyn MessageHandler>) -> TransportResult<RunningPump> {
        set_state(&self.state, &self.settings.id, PumpState::Starting);

        let (receiver, concurrency, prefetch_count) = match self.open_receiver().await {
            Ok(opened) => opened,
            Err(e) => {
                set_state(&self.state, &self.settings.id, PumpState::Stopped);
                return Err(e);
            }
        };

        let stop = CancellationToken::new();
        let processing = CancellationToken::new();

        set_state(&self.state, &self.settings.id, PumpState::Running);

        let receive_loop = ReceiveLoop {
            receiver_id: self.settings.id.clone(),
            receive_address: self.receive_address.clone(),
            receiver: receiver.clone(),
            handler: handler.clone(),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            stop: stop.clone(),
            processing: processing.clone(),
            breaker: CircuitBreaker::new(
                format!("receiver:{}", self.settings.id),
                self.config.circuit_breaker.to_resilience_config(),
            ),
            batch_wait: self.config.receive_batch_wait(),
            time_to_wait_before_triggering: self
                .config
                .time_to_wait_before_triggering_circuit_breaker(),
            host: self.host.clone(),
            state: self.state.clone(),
            counters: self.counters.clone(),
        };

        info!(
            receiver_id = %self.settings.id,
            receive_address = %self.receive_address,
            concurrency = concurrency,
            prefetch_count = prefetch_count,
            "🚀 Message pump started"
        );

        Ok(RunningPump {
            handler,
            receiver,
            stop,
            processing,
            loop_task: tokio::spawn(receive_loop.run()),
        })
    }

    async fn open_receiver(&self) -> TransportResult<(Arc<dyn MessageReceiver>, usize, u32)> {
        if !self.permissions.can_receive().await? {
            return Err(TransportError::unauthorized(&self.receive_address, "receive"));
        }

        let concurrency = self.concurrency();
        let prefetch_count = self.prefetch_count_for(concurrency);
        let receiver = self
            .client
            .create_receiver(
                &self.receive_address,
                ReceiverOptions {
                    identifier: self.settings.id.clone(),
                    prefetch_count,
                },
            )
            .await?;

        self.prefetch_count.store(prefetch_count, Ordering::Release);
        Ok((receiver, concurrency, prefetch_count))
    }

    /// Stop using the configured shutdown grace period
    pub async fn stop(&self) -> TransportResult<()> {
        self.stop_with_grace(self.config.shutdown_grace_period()).await
    }

    /// Stop pulling, wait up to `grace` for in-flight handlers, then release
    /// whatever is still running for redelivery
    pub async fn stop_with_grace(&self, grace: Duration) -> TransportResult<()> {
        let mut running = self.running.lock().await;
        let pump = running.take().ok_or_else(|| self.already_stopped())?;
        self.shut_down(pump, grace).await;
        Ok(())
    }

    async fn shut_down(&self, pump: RunningPump, grace: Duration) {
        set_state(&self.state, &self.settings.id, PumpState::Stopping);
        pump.stop.cancel();

        let mut in_flight = match pump.loop_task.await {
            Ok(in_flight) => in_flight,
            Err(e) => {
                error!(receiver_id = %self.settings.id, error = %e, "Receive loop terminated abnormally");
                JoinSet::new()
            }
        };

        debug!(
            receiver_id = %self.settings.id,
            in_flight = in_flight.len(),
            grace_ms = grace.as_millis() as u64,
            "Waiting for in-flight messages"
        );

        if tokio::time::timeout(grace, drain(&mut in_flight, &self.settings.id))
            .await
            .is_err()
        {
            warn!(
                receiver_id = %self.settings.id,
                remaining = in_flight.len(),
                "⏱️ Shutdown grace period expired, releasing in-flight messages for redelivery"
            );
            pump.processing.cancel();
            drain(&mut in_flight, &self.settings.id).await;
        }

        if let Err(e) = pump.receiver.close().await {
            warn!(receiver_id = %self.settings.id, error = %e, "Failed to close receiver");
        }

        set_state(&self.state, &self.settings.id, PumpState::Stopped);
        info!(receiver_id = %self.settings.id, "🛑 Message pump stopped");
    }

    fn already_stopped(&self) -> TransportError {
        TransportError::already_stopped(format!("message pump '{}'", self.settings.id))
    }

    /// Restart the pump with a new concurrency limit
    ///
    /// Holds the pump for the whole stop and restart, so a concurrent
    /// `start` or `stop` waits and then sees the restarted pump.
    pub async fn change_concurrency(&self, limit: usize) -> TransportResult<()> {
        if limit == 0 {
            return Err(TransportError::configuration(
                "max_concurrency",
                "must be greater than 0",
            ));
        }

        let mut running = self.running.lock().await;
        let pump = running.take().ok_or_else(|| self.already_stopped())?;
        let handler = pump.handler.clone();

        info!(
            receiver_id = %self.settings.id,
            from = self.concurrency(),
            to = limit,
            "🔧 Changing concurrency"
        );

        self.shut_down(pump, self.config.shutdown_grace_period()).await;
        self.concurrency.store(limit, Ordering::Release);
        *running = Some(self.launch(handler).await?);
        Ok(())
    }
}

fn set_state(state: &watch::Sender<PumpState>, receiver_id: &str, next: PumpState) {
    let previous = state.send_replace(next);
    if previous != next {
        debug!(receiver_id = %receiver_id, from = %previous, to = %next, "Pump state changed");
    }
}

async fn drain(in_flight: &mut JoinSet<()>, receiver_id: &str) {
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(receiver_id = %receiver_id, error = %e, "Message task failed");
        }
    }
}

/// State owned by the spawned receive loop
struct ReceiveLoop {
    receiver_id: String,
    receive_address: String,
    receiver: Arc<dyn MessageReceiver>,
    handler: Arc<dyn MessageHandler>,
    semaphore: Arc<Semaphore>,
    stop: CancellationToken,
    processing: CancellationToken,
    breaker: CircuitBreaker,
    batch_wait: Duration,
    time_to_wait_before_triggering: Duration,
    host: HostSettings,
    state: Arc<watch::Sender<PumpState>>,
    counters: Arc<PumpCounters>,
}

impl ReceiveLoop {
    /// Runs until stopped; returns the tasks still processing messages
    async fn run(mut self) -> JoinSet<()> {
        let mut in_flight = JoinSet::new();
        let mut last_error: Option<TransportError> = None;
        let mut critical_raised = false;

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(receiver_id = %self.receiver_id, error = %e, "Message task failed");
                }
            }

            if let Some(retry_in) = self.breaker.retry_in() {
                self.set_state(PumpState::CircuitOpen);
                let wait = match self.until_critical(critical_raised) {
                    Some(until_critical) => retry_in.min(until_critical),
                    None => retry_in,
                };
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                self.raise_critical_if_due(&mut critical_raised, last_error.as_ref());
                continue;
            }

            let first = tokio::select! {
                _ = self.stop.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let mut permits = vec![first];
            while let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                permits.push(permit);
            }

            let receiver = self.receiver.clone();
            let max_messages = permits.len();
            let batch_wait = self.batch_wait;
            let result = tokio::select! {
                _ = self.stop.cancelled() => break,
                result = self.breaker.call(|| receiver.receive_messages(max_messages, batch_wait)) => result,
            };
            self.counters.record_circuit(self.breaker.metrics());

            match result {
                Ok(messages) => {
                    if last_error.take().is_some() {
                        info!(receiver_id = %self.receiver_id, "🟢 Receiving recovered");
                    }
                    critical_raised = false;
                    self.set_state(PumpState::Running);

                    for message in messages {
                        self.spawn_message_task(&mut in_flight, message, permits.pop());
                    }
                }
                Err(CircuitBreakerError::OperationFailed(e)) => {
                    PumpCounters::increment(&self.counters.receive_failures);
                    warn!(
                        receiver_id = %self.receiver_id,
                        receive_address = %self.receive_address,
                        consecutive_failures = self.breaker.consecutive_failures(),
                        error = %e,
                        "Receive failed"
                    );
                    last_error = Some(e);
                    if self.breaker.state() == CircuitState::Open {
                        self.set_state(PumpState::CircuitOpen);
                    }
                    self.raise_critical_if_due(&mut critical_raised, last_error.as_ref());
                }
                Err(CircuitBreakerError::CircuitOpen { .. }) => {}
            }
        }

        debug!(receiver_id = %self.receiver_id, "Receive loop stopped");
        in_flight
    }

    fn set_state(&self, next: PumpState) {
        set_state(&self.state, &self.receiver_id, next);
    }

    fn until_critical(&self, critical_raised: bool) -> Option<Duration> {
        if critical_raised {
            return None;
        }
        self.breaker
            .open_for()
            .map(|open_for| self.time_to_wait_before_triggering.saturating_sub(open_for))
    }

    fn raise_critical_if_due(&self, critical_raised: &mut bool, last_error: Option<&TransportError>) {
        if *critical_raised {
            return;
        }
        let Some(open_for) = self.breaker.open_for() else {
            return;
        };
        if open_for < self.time_to_wait_before_triggering {
            return;
        }

        *critical_raised = true;
        PumpCounters::increment(&self.counters.critical_errors_raised);

        let error = last_error
            .cloned()
            .unwrap_or_else(|| TransportError::internal("receive circuit open"));
        error!(
            receiver_id = %self.receiver_id,
            open_for_ms = open_for.as_millis() as u64,
            "🚨 Receive circuit open too long, raising critical error"
        );
        self.host.raise_critical_error(
            &format!(
                "Failed to receive messages from {} for {}s",
                self.receive_address,
                open_for.as_secs()
            ),
            &error,
        );
    }

    fn spawn_message_task(
        &self,
        in_flight: &mut JoinSet<()>,
        message: ReceivedMessage,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let task = MessageTask {
            receiver_id: self.receiver_id.clone(),
            receiver: self.receiver.clone(),
            handler: self.handler.clone(),
            processing: self.processing.clone(),
            counters: self.counters.clone(),
        };

        in_flight.spawn(async move {
            task.process(message).await;
            drop(permit);
        });
    }
}

enum Settlement {
    Complete,
    Abandon,
}

struct MessageTask {
    receiver_id: String,
    receiver: Arc<dyn MessageReceiver>,
    handler: Arc<dyn MessageHandler>,
    processing: CancellationToken,
    counters: Arc<PumpCounters>,
}

impl MessageTask {
    async fn process(self, message: ReceivedMessage) {
        PumpCounters::increment(&self.counters.messages_received);
        let _in_flight = InFlightGuard::new(&self.counters);

        let context = MessageContext::new(&message, &self.receiver_id, self.processing.clone());

        let outcome = tokio::select! {
            biased;
            result = AssertUnwindSafe(self.handler.handle(&context)).catch_unwind() => Some(result),
            _ = self.processing.cancelled() => None,
        };

        let settlement = match outcome {
            Some(Ok(Ok(()))) => Settlement::Complete,
            Some(Ok(Err(error))) => self.on_failure(&context, &error).await,
            Some(Err(panic)) => {
                let error = anyhow::anyhow!("message handler panicked: {}", panic_message(&*panic));
                self.on_failure(&context, &error).await
            }
            None => {
                debug!(
                    receiver_id = %self.receiver_id,
                    message_id = %message.message_id,
                    "Processing cancelled by shutdown"
                );
                Settlement::Abandon
            }
        };

        self.settle(&message, settlement).await;
    }

    async fn on_failure(&self, context: &MessageContext, error: &anyhow::Error) -> Settlement {
        PumpCounters::increment(&self.counters.handler_failures);
        warn!(
            receiver_id = %self.receiver_id,
            message_id = %context.message_id,
            delivery_count = context.delivery_count,
            error = %error,
            "Message handler failed"
        );

        match AssertUnwindSafe(self.handler.on_error(context, error))
            .catch_unwind()
            .await
        {
            Ok(ErrorHandleResult::Handled) => Settlement::Complete,
            Ok(ErrorHandleResult::RetryRequired) => Settlement::Abandon,
            Err(panic) => {
                error!(
                    receiver_id = %self.receiver_id,
                    message_id = %context.message_id,
                    panic = %panic_message(&*panic),
                    "Error handler panicked, releasing message for redelivery"
                );
                Settlement::Abandon
            }
        }
    }

    async fn settle(&self, message: &ReceivedMessage, settlement: Settlement) {
        let result = match settlement {
            Settlement::Complete => {
                let result = self.receiver.complete_message(message).await;
                if result.is_ok() {
                    PumpCounters::increment(&self.counters.messages_completed);
                }
                result
            }
            Settlement::Abandon => {
                let result = self.receiver.abandon_message(message).await;
                if result.is_ok() {
                    PumpCounters::increment(&self.counters.messages_abandoned);
                }
                result
            }
        };

        // A lost lock means the entity redelivers the message on its own
        if let Err(e) = result {
            warn!(
                receiver_id = %self.receiver_id,
                message_id = %message.message_id,
                error = %e,
                "Failed to settle message"
            );
        }
    }
}

/// Keeps `in_flight` accurate even if a task unwinds
struct InFlightGuard<'a> {
    counters: &'a PumpCounters,
}

impl<'a> InFlightGuard<'a> {
    fn new(counters: &'a PumpCounters) -> Self {
        counters.in_flight.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        AccessDirection, AccessRight, AdministrationClient, InMemoryNamespace, QueueProperties,
    };
    use crate::message::NativeMessage;
    use crate::receiving::handler_fn;

    async fn pump_for(namespace: &InMemoryNamespace, config: TransportConfig) -> MessagePump {
        namespace
            .create_queue(&QueueProperties::new("Sales"))
            .await
            .unwrap();
        let admin: Arc<dyn AdministrationClient> = Arc::new(namespace.clone());
        MessagePump::new(
            ReceiveSettings::new("main", "Sales".into()).with_max_concurrency(4),
            "Sales".to_string(),
            Arc::new(namespace.clone()),
            Arc::new(NamespacePermissions::new(admin)),
            config,
            HostSettings::new("Sales"),
            None,
        )
    }

    #[tokio::test]
    async fn test_prefetch_defaults_to_multiplier_times_concurrency() {
        let namespace = InMemoryNamespace::new();
        let pump = pump_for(
            &namespace,
            TransportConfig {
                prefetch_multiplier: 5,
                ..Default::default()
            },
        )
        .await;

        pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();
        assert_eq!(
            namespace.receiver_options("Sales").map(|o| o.prefetch_count),
            Some(20)
        );
        assert_eq!(pump.state(), PumpState::Running);

        pump.stop().await.unwrap();
        assert_eq!(pump.state(), PumpState::Stopped);
        assert!(matches!(
            pump.stop().await,
            Err(TransportError::AlreadyStopped { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_fails_fast_without_receive_permission() {
        let namespace = InMemoryNamespace::new();
        let pump = pump_for(&namespace, TransportConfig::default()).await;
        namespace.deny(AccessRight::Manage);

        let result = pump.start(handler_fn(|_| async { Ok(()) })).await;
        assert!(matches!(result, Err(TransportError::Unauthorized { .. })));
        assert_eq!(pump.state(), PumpState::Stopped);
        assert!(namespace.receiver_options("Sales").is_none());
    }

    #[tokio::test]
    async fn test_transient_probe_failure_keeps_start_unauthorized() {
        let namespace = InMemoryNamespace::new();
        let pump = pump_for(&namespace, TransportConfig::default()).await;
        namespace.fail_probe(
            AccessDirection::Receive,
            TransportError::timeout("check manage rights", 5_000),
        );

        let first = pump.start(handler_fn(|_| async { Ok(()) })).await;
        assert!(matches!(first, Err(TransportError::Unauthorized { .. })));

        namespace.clear_probe_failure(AccessDirection::Receive);
        let after_recovery = pump.start(handler_fn(|_| async { Ok(()) })).await;
        assert!(matches!(after_recovery, Err(TransportError::Unauthorized { .. })));
        assert_eq!(namespace.probe_calls(AccessDirection::Receive), 1);
        assert_eq!(pump.state(), PumpState::Stopped);
    }

    #[tokio::test]
    async fn test_panicking_handler_releases_message() {
        let namespace = InMemoryNamespace::new();
        let pump = pump_for(
            &namespace,
            TransportConfig {
                receive_batch_wait_ms: 20,
                ..Default::default()
            },
        )
        .await;

        let sender = namespace.create_sender("Sales").await.unwrap();
        sender
            .send_messages(vec![NativeMessage::new("m1", Vec::new())])
            .await
            .unwrap();

        pump.start(handler_fn(|_| async { panic!("boom") }))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while pump.stats().handler_failures == 0 || pump.stats().in_flight > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pump.stop_with_grace(Duration::from_secs(1)).await.unwrap();

        let stats = pump.stats();
        assert!(stats.messages_abandoned >= 1);
        assert_eq!(stats.messages_completed, 0);
        // Redelivered until stopped, possibly into the dead-letter queue
        assert_eq!(
            namespace.message_count("Sales") + namespace.dead_letter_count("Sales"),
            1
        );
    }

    #[tokio::test]
    async fn test_change_concurrency_restarts_with_new_limit() {
        let namespace = InMemoryNamespace::new();
        let pump = pump_for(&namespace, TransportConfig::default()).await;

        assert!(matches!(
            pump.change_concurrency(2).await,
            Err(TransportError::AlreadyStopped { .. })
        ));

        pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();
        pump.change_concurrency(8).await.unwrap();

        assert_eq!(pump.concurrency(), 8);
        assert_eq!(pump.state(), PumpState::Running);
        assert_eq!(
            namespace.receiver_options("Sales").map(|o| o.prefetch_count),
            Some(80)
        );
        pump.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_during_change_concurrency_sees_restarted_pump() {
        let namespace = InMemoryNamespace::new();
        let pump = pump_for(&namespace, TransportConfig::default()).await;
        pump.start(handler_fn(|_| async { Ok(()) })).await.unwrap();

        let (changed, started) = tokio::join!(
            pump.change_concurrency(8),
            pump.start(handler_fn(|_| async { Ok(()) }))
        );

        changed.unwrap();
        assert!(matches!(started, Err(TransportError::Internal { .. })));
        assert_eq!(pump.concurrency(), 8);
        assert_eq!(pump.state(), PumpState::Running);
        pump.stop().await.unwrap();
    }
}
