//! # In-Memory Namespace
//!
//! Thread-safe in-memory namespace implementing the full client interface,
//! for tests, demos and local development.
//!
//! ## Features
//!
//! - **Entities**: queues, topics, subscriptions and rules with the same
//!   existence and conflict behavior as a real namespace
//! - **Peek-lock**: received messages are locked for the entity's lock
//!   duration and become visible again when abandoned or when the lock expires
//! - **Dead-lettering**: a message whose delivery count exceeds the entity's
//!   `max_delivery_count` moves to the dead-letter sub-queue
//! - **Scheduling and expiry**: scheduled enqueue time and time-to-live are honored
//! - **Forwarding**: subscriptions may forward matched messages to a queue
//! - **Fault injection**: per-right authorization switches, probe failures
//!   and receive failures
//!
//! Lock and expiry timing follows `tokio::time`, so paused-clock tests can
//! drive it deterministically.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::traits::{AdministrationClient, MessageReceiver, MessageSender, TransportClient};
use super::types::{
    subscription_path, AccessDirection, ClientOptions, QueueProperties, ReceiverOptions,
    RuleProperties, SubscriptionProperties, TopicProperties, MAX_RULE_NAME_LENGTH,
    MAX_SUBSCRIPTION_NAME_LENGTH,
};
use crate::error::{TransportError, TransportResult};
use crate::message::{NativeMessage, ReceivedMessage};

/// Application property set on dead-lettered messages
pub const DEAD_LETTER_REASON: &str = "DeadLetterReason";

const SUBSCRIPTIONS_SEGMENT: &str = "/Subscriptions/";

/// Upper bound on how long a waiting receive sleeps before re-checking
/// scheduled messages and expired locks
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Claims a caller may be denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRight {
    Manage,
    Send,
    Listen,
}

#[derive(Debug, Clone)]
struct MessageLock {
    token: String,
    locked_until: Instant,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    sequence_number: u64,
    message: NativeMessage,
    enqueued_at: DateTime<Utc>,
    enqueued_instant: Instant,
    delivery_count: u32,
    lock: Option<MessageLock>,
}

impl StoredMessage {
    fn is_expired(&self, now: Instant) -> bool {
        self.message
            .time_to_live
            .is_some_and(|ttl| self.enqueued_instant + ttl <= now)
    }

    fn is_available(&self, now: Instant, now_utc: DateTime<Utc>) -> bool {
        let unlocked = self.lock.as_ref().map_or(true, |lock| lock.locked_until <= now);
        let due = self
            .message
            .scheduled_enqueue_time
            .map_or(true, |at| at <= now_utc);
        unlocked && due
    }

    fn holds_lock(&self, token: &str) -> bool {
        self.lock.as_ref().is_some_and(|lock| lock.token == token)
    }

    fn to_received(&self, entity_path: &str, lock_token: String) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message.message_id.clone(),
            body: self.message.body.clone(),
            headers: self.message.application_properties.clone(),
            lock_token,
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
            entity_path: entity_path.to_string(),
        }
    }
}

/// Active and dead-lettered messages of one queue or subscription
#[derive(Debug, Default)]
struct MessageStore {
    active: VecDeque<StoredMessage>,
    dead_letters: Vec<StoredMessage>,
}

impl MessageStore {
    fn lock_available(
        &mut self,
        entity_path: &str,
        max_messages: usize,
        max_delivery_count: u32,
        lock_duration: Duration,
    ) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let now_utc = Utc::now();

        self.active.retain(|message| !message.is_expired(now));

        let mut received = Vec::new();
        let mut index = 0;
        while index < self.active.len() && received.len() < max_messages {
            let message = &mut self.active[index];
            if !message.is_available(now, now_utc) {
                index += 1;
                continue;
            }

            message.delivery_count += 1;
            if message.delivery_count > max_delivery_count {
                if let Some(mut expired) = self.active.remove(index) {
                    debug!(
                        entity_path = %entity_path,
                        message_id = %expired.message.message_id,
                        delivery_count = expired.delivery_count,
                        "☠️ Max delivery count exceeded, dead-lettering"
                    );
                    expired.lock = None;
                    expired.message.application_properties.insert(
                        DEAD_LETTER_REASON.to_string(),
                        "MaxDeliveryCountExceeded".to_string(),
                    );
                    self.dead_letters.push(expired);
                }
                continue;
            }

            let token = Uuid::new_v4().to_string();
            message.lock = Some(MessageLock {
                token: token.clone(),
                locked_until: now + lock_duration,
            });
            received.push(message.to_received(entity_path, token));
            index += 1;
        }

        received
    }

    /// Position of the message holding a live lock with this token
    fn locked_position(&self, lock_token: &str) -> TransportResult<usize> {
        let now = Instant::now();
        self.active
            .iter()
            .position(|message| {
                message.holds_lock(lock_token)
                    && message
                        .lock
                        .as_ref()
                        .is_some_and(|lock| lock.locked_until > now)
            })
            .ok_or_else(|| TransportError::message_lock_lost(lock_token))
    }

    fn complete(&mut self, lock_token: &str) -> TransportResult<()> {
        let position = self.locked_position(lock_token)?;
        self.active.remove(position);
        Ok(())
    }

    fn abandon(&mut self, lock_token: &str) -> TransportResult<()> {
        let position = self.locked_position(lock_token)?;
        self.active[position].lock = None;
        Ok(())
    }
}

#[derive(Debug)]
struct QueueEntity {
    properties: QueueProperties,
    store: MessageStore,
}

#[derive(Debug)]
struct SubscriptionEntity {
    properties: SubscriptionProperties,
    rules: BTreeMap<String, RuleProperties>,
    store: MessageStore,
}

impl SubscriptionEntity {
    fn matches(&self, message: &NativeMessage) -> bool {
        self.rules
            .values()
            .any(|rule| rule.filter.matches(&message.application_properties))
    }
}

#[derive(Debug)]
struct TopicEntity {
    properties: TopicProperties,
    subscriptions: BTreeMap<String, SubscriptionEntity>,
}

#[derive(Debug)]
struct ReceiveFault {
    error: TransportError,
    /// Failures left to inject; `None` fails until cleared
    remaining: Option<u32>,
}

enum FanOutTarget {
    Queue(String),
    Subscription(String),
}

#[derive(Debug, Default)]
struct NamespaceState {
    queues: HashMap<String, QueueEntity>,
    topics: HashMap<String, TopicEntity>,
    next_sequence: u64,
    denied_rights: HashSet<AccessRight>,
    probe_failures: HashMap<AccessDirection, TransportError>,
    probe_calls: HashMap<AccessDirection, usize>,
    receive_fault: Option<ReceiveFault>,
    receive_attempts: Vec<Instant>,
    senders_created: HashMap<String, usize>,
    senders_closed: usize,
    receivers_opened: HashMap<String, ReceiverOptions>,
    sender_creation_delay: Duration,
    closed: bool,
}

impl NamespaceState {
    fn require(&self, right: AccessRight, entity_path: &str, operation: &str) -> TransportResult<()> {
        if self.denied_rights.contains(&right) {
            return Err(TransportError::unauthorized(entity_path, operation));
        }
        Ok(())
    }

    fn entity_store(&mut self, entity_path: &str) -> TransportResult<(&mut MessageStore, u32, Duration)> {
        if let Some((topic, subscription)) = entity_path.split_once(SUBSCRIPTIONS_SEGMENT) {
            let entity = self
                .topics
                .get_mut(topic)
                .and_then(|topic| topic.subscriptions.get_mut(subscription))
                .ok_or_else(|| TransportError::entity_not_found(entity_path))?;
            return Ok((
                &mut entity.store,
                entity.properties.max_delivery_count,
                entity.properties.lock_duration,
            ));
        }

        let queue = self
            .queues
            .get_mut(entity_path)
            .ok_or_else(|| TransportError::entity_not_found(entity_path))?;
        Ok((
            &mut queue.store,
            queue.properties.max_delivery_count,
            queue.properties.lock_duration,
        ))
    }

    fn entity_store_ref(&self, entity_path: &str) -> Option<&MessageStore> {
        match entity_path.split_once(SUBSCRIPTIONS_SEGMENT) {
            Some((topic, subscription)) => self
                .topics
                .get(topic)
                .and_then(|topic| topic.subscriptions.get(subscription))
                .map(|entity| &entity.store),
            None => self.queues.get(entity_path).map(|queue| &queue.store),
        }
    }

    fn stored(&mut self, message: NativeMessage) -> StoredMessage {
        self.next_sequence += 1;
        StoredMessage {
            sequence_number: self.next_sequence,
            message,
            enqueued_at: Utc::now(),
            enqueued_instant: Instant::now(),
            delivery_count: 0,
            lock: None,
        }
    }

    fn enqueue(&mut self, queue_name: &str, message: NativeMessage) -> TransportResult<()> {
        let stored = self.stored(message);
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| TransportError::entity_not_found(queue_name))?;
        queue.store.active.push_back(stored);
        Ok(())
    }

    fn deliver(&mut self, entity_path: &str, message: NativeMessage) -> TransportResult<()> {
        if self.queues.contains_key(entity_path) {
            return self.enqueue(entity_path, message);
        }

        let topic = self
            .topics
            .get(entity_path)
            .ok_or_else(|| TransportError::entity_not_found(entity_path))?;

        let targets: Vec<FanOutTarget> = topic
            .subscriptions
            .values()
            .filter(|subscription| subscription.matches(&message))
            .map(|subscription| match &subscription.properties.forward_to {
                Some(queue) => FanOutTarget::Queue(queue.clone()),
                None => FanOutTarget::Subscription(subscription.properties.subscription_name.clone()),
            })
            .collect();

        debug!(
            topic = %entity_path,
            message_id = %message.message_id,
            matched_subscriptions = targets.len(),
            "📤 Fanning out published message"
        );

        for target in targets {
            match target {
                FanOutTarget::Queue(queue) => {
                    if let Err(e) = self.enqueue(&queue, message.clone()) {
                        warn!(topic = %entity_path, forward_to = %queue, error = %e, "Forwarding target missing, message dropped");
                    }
                }
                FanOutTarget::Subscription(name) => {
                    let stored = self.stored(message.clone());
                    if let Some(subscription) = self
                        .topics
                        .get_mut(entity_path)
                        .and_then(|topic| topic.subscriptions.get_mut(&name))
                    {
                        subscription.store.active.push_back(stored);
                    }
                }
            }
        }

        Ok(())
    }

    fn subscription_mut(
        &mut self,
        topic: &str,
        subscription: &str,
    ) -> TransportResult<&mut SubscriptionEntity> {
        self.topics
            .get_mut(topic)
            .ok_or_else(|| TransportError::entity_not_found(topic))?
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| {
                TransportError::entity_not_found(subscription_path(topic, subscription))
            })
    }

    fn subscription_ref(&self, topic: &str, subscription: &str) -> TransportResult<&SubscriptionEntity> {
        self.topics
            .get(topic)
            .ok_or_else(|| TransportError::entity_not_found(topic))?
            .subscriptions
            .get(subscription)
            .ok_or_else(|| {
                TransportError::entity_not_found(subscription_path(topic, subscription))
            })
    }
}

#[derive(Debug)]
struct NamespaceInner {
    state: Mutex<NamespaceState>,
    message_available: Notify,
    options: ClientOptions,
}

/// In-memory namespace acting as both the data-plane and administration client
///
/// Cloning yields another handle to the same namespace.
///
/// # Example
///
/// ```rust
/// use servicebus_transport::client::in_memory::InMemoryNamespace;
/// use servicebus_transport::client::{AdministrationClient, QueueProperties, TransportClient};
/// use servicebus_transport::message::NativeMessage;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let namespace = InMemoryNamespace::new();
/// namespace.create_queue(&QueueProperties::new("Sales")).await?;
///
/// let sender = namespace.create_sender("Sales").await?;
/// sender.send_messages(vec![NativeMessage::new("1", b"hello".to_vec())]).await?;
///
/// assert_eq!(namespace.message_count("Sales"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryNamespace {
    inner: Arc<NamespaceInner>,
}

impl Default for InMemoryNamespace {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNamespace {
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                state: Mutex::new(NamespaceState::default()),
                message_available: Notify::new(),
                options,
            }),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut NamespaceState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    /// Deny a right to every caller until `allow` is called
    pub fn deny(&self, right: AccessRight) {
        self.with_state(|state| state.denied_rights.insert(right));
    }

    pub fn allow(&self, right: AccessRight) {
        self.with_state(|state| state.denied_rights.remove(&right));
    }

    /// Make management probes for `direction` fail with `error`
    pub fn fail_probe(&self, direction: AccessDirection, error: TransportError) {
        self.with_state(|state| state.probe_failures.insert(direction, error));
    }

    pub fn clear_probe_failure(&self, direction: AccessDirection) {
        self.with_state(|state| state.probe_failures.remove(&direction));
    }

    pub fn probe_calls(&self, direction: AccessDirection) -> usize {
        self.with_state(|state| state.probe_calls.get(&direction).copied().unwrap_or(0))
    }

    /// Fail receive calls with `error`, `count` times or until cleared
    pub fn fail_receives(&self, error: TransportError, count: Option<u32>) {
        self.with_state(|state| {
            state.receive_fault = Some(ReceiveFault {
                error,
                remaining: count,
            })
        });
    }

    pub fn clear_receive_failures(&self) {
        self.with_state(|state| state.receive_fault = None);
    }

    /// Instants at which receive calls were made, in order
    pub fn receive_attempts(&self) -> Vec<Instant> {
        self.with_state(|state| state.receive_attempts.clone())
    }

    /// Delay every sender creation, widening creation races in tests
    pub fn set_sender_creation_delay(&self, delay: Duration) {
        self.with_state(|state| state.sender_creation_delay = delay);
    }

    pub fn senders_created(&self, entity_path: &str) -> usize {
        self.with_state(|state| state.senders_created.get(entity_path).copied().unwrap_or(0))
    }

    pub fn senders_closed(&self) -> usize {
        self.with_state(|state| state.senders_closed)
    }

    /// Options the last receiver opened on `entity_path` was created with
    pub fn receiver_options(&self, entity_path: &str) -> Option<ReceiverOptions> {
        self.with_state(|state| state.receivers_opened.get(entity_path).cloned())
    }

    pub fn is_closed(&self) -> bool {
        self.with_state(|state| state.closed)
    }

    /// Active messages on a queue or subscription, locked ones included
    pub fn message_count(&self, entity_path: &str) -> usize {
        self.with_state(|state| {
            state
                .entity_store_ref(entity_path)
                .map_or(0, |store| store.active.len())
        })
    }

    /// Messages currently held under a live lock
    pub fn locked_message_count(&self, entity_path: &str) -> usize {
        let now = Instant::now();
        self.with_state(|state| {
            state.entity_store_ref(entity_path).map_or(0, |store| {
                store
                    .active
                    .iter()
                    .filter(|m| m.lock.as_ref().is_some_and(|lock| lock.locked_until > now))
                    .count()
            })
        })
    }

    pub fn dead_letter_count(&self, entity_path: &str) -> usize {
        self.with_state(|state| {
            state
                .entity_store_ref(entity_path)
                .map_or(0, |store| store.dead_letters.len())
        })
    }

    /// Active messages without locking them, in sequence order
    pub fn peek_messages(&self, entity_path: &str) -> Vec<NativeMessage> {
        self.with_state(|state| {
            let mut stored: Vec<&StoredMessage> = state
                .entity_store_ref(entity_path)
                .map(|store| store.active.iter().collect())
                .unwrap_or_default();
            stored.sort_by_key(|m| m.sequence_number);
            stored.into_iter().map(|m| m.message.clone()).collect()
        })
    }

    pub fn peek_dead_letters(&self, entity_path: &str) -> Vec<NativeMessage> {
        self.with_state(|state| {
            state
                .entity_store_ref(entity_path)
                .map(|store| store.dead_letters.iter().map(|m| m.message.clone()).collect())
                .unwrap_or_default()
        })
    }

    fn notify_message_available(&self) {
        self.inner.message_available.notify_waiters();
    }
}

/// Sender bound to one entity of an in-memory namespace
#[derive(Debug)]
pub struct InMemorySender {
    entity_path: String,
    namespace: InMemoryNamespace,
    closed: AtomicBool,
}

#[async_trait]
impl MessageSender for InMemorySender {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn send_messages(&self, messages: Vec<NativeMessage>) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::already_stopped(format!(
                "sender for {}",
                self.entity_path
            )));
        }

        let count = messages.len();
        self.namespace.with_state(|state| {
            state.require(AccessRight::Send, &self.entity_path, "send")?;
            messages
                .into_iter()
                .try_for_each(|message| state.deliver(&self.entity_path, message))
        })?;

        debug!(entity_path = %self.entity_path, count = count, "📤 Messages sent");
        self.namespace.notify_message_available();
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.namespace.with_state(|state| state.senders_closed += 1);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Peek-lock receiver on one queue or subscription
#[derive(Debug)]
pub struct InMemoryReceiver {
    entity_path: String,
    namespace: InMemoryNamespace,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::already_stopped(format!(
                "receiver for {}",
                self.entity_path
            )));
        }
        Ok(())
    }

    /// Record the attempt and apply injected faults
    fn begin_receive(&self) -> TransportResult<()> {
        self.namespace.with_state(|state| {
            state.receive_attempts.push(Instant::now());

            if let Some(fault) = state.receive_fault.as_mut() {
                let error = fault.error.clone();
                let exhausted = match fault.remaining.as_mut() {
                    Some(remaining) => {
                        *remaining = remaining.saturating_sub(1);
                        *remaining == 0
                    }
                    None => false,
                };
                if exhausted {
                    state.receive_fault = None;
                }
                return Err(error);
            }

            state.require(AccessRight::Listen, &self.entity_path, "receive")?;
            state.entity_store(&self.entity_path).map(|_| ())
        })
    }

    fn settle<F>(&self, operation: F) -> TransportResult<()>
    where
        F: FnOnce(&mut MessageStore) -> TransportResult<()>,
    {
        self.ensure_open()?;
        self.namespace.with_state(|state| {
            let (store, _, _) = state.entity_store(&self.entity_path)?;
            operation(store)
        })
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> TransportResult<Vec<ReceivedMessage>> {
        self.ensure_open()?;
        self.begin_receive()?;

        if max_messages == 0 {
            return Ok(Vec::new());
        }

        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.namespace.inner.message_available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.namespace.with_state(|state| {
                let (store, max_delivery_count, lock_duration) =
                    state.entity_store(&self.entity_path)?;
                Ok::<_, TransportError>(store.lock_available(
                    &self.entity_path,
                    max_messages,
                    max_delivery_count,
                    lock_duration,
                ))
            })?;

            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }

            let wake_at = deadline.min(now + POLL_INTERVAL);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn complete_message(&self, message: &ReceivedMessage) -> TransportResult<()> {
        self.settle(|store| store.complete(&message.lock_token))
    }

    async fn abandon_message(&self, message: &ReceivedMessage) -> TransportResult<()> {
        self.settle(|store| store.abandon(&message.lock_token))?;
        self.namespace.notify_message_available();
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl TransportClient for InMemoryNamespace {
    async fn create_sender(&self, entity_path: &str) -> TransportResult<Arc<dyn MessageSender>> {
        let delay = self.with_state(|state| {
            if state.closed {
                return Err(TransportError::already_stopped("transport client"));
            }
            Ok(state.sender_creation_delay)
        })?;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.with_state(|state| {
            *state
                .senders_created
                .entry(entity_path.to_string())
                .or_insert(0) += 1;
        });

        Ok(Arc::new(InMemorySender {
            entity_path: entity_path.to_string(),
            namespace: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn create_receiver(
        &self,
        entity_path: &str,
        options: ReceiverOptions,
    ) -> TransportResult<Arc<dyn MessageReceiver>> {
        self.with_state(|state| {
            if state.closed {
                return Err(TransportError::already_stopped("transport client"));
            }
            state
                .receivers_opened
                .insert(entity_path.to_string(), options);
            Ok(())
        })?;

        Ok(Arc::new(InMemoryReceiver {
            entity_path: entity_path.to_string(),
            namespace: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> TransportResult<()> {
        self.with_state(|state| state.closed = true);
        self.notify_message_available();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[async_trait]
impl AdministrationClient for InMemoryNamespace {
    async fn check_manage_rights(&self, direction: AccessDirection) -> TransportResult<()> {
        self.with_state(|state| {
            *state.probe_calls.entry(direction).or_insert(0) += 1;
            if let Some(error) = state.probe_failures.get(&direction) {
                return Err(error.clone());
            }
            state.require(AccessRight::Manage, "$namespace", &format!("manage ({direction})"))
        })
    }

    async fn get_queue(&self, name: &str) -> TransportResult<Option<QueueProperties>> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, name, "get queue")?;
            Ok(state.queues.get(name).map(|queue| queue.properties.clone()))
        })
    }

    async fn create_queue(&self, properties: &QueueProperties) -> TransportResult<()> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, &properties.name, "create queue")?;
            if state.queues.contains_key(&properties.name) || state.topics.contains_key(&properties.name) {
                return Err(TransportError::entity_already_exists(&properties.name));
            }
            state.queues.insert(
                properties.name.clone(),
                QueueEntity {
                    properties: properties.clone(),
                    store: MessageStore::default(),
                },
            );
            Ok(())
        })
    }

    async fn get_topic(&self, name: &str) -> TransportResult<Option<TopicProperties>> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, name, "get topic")?;
            Ok(state.topics.get(name).map(|topic| topic.properties.clone()))
        })
    }

    async fn create_topic(&self, properties: &TopicProperties) -> TransportResult<()> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, &properties.name, "create topic")?;
            if state.topics.contains_key(&properties.name) || state.queues.contains_key(&properties.name) {
                return Err(TransportError::entity_already_exists(&properties.name));
            }
            state.topics.insert(
                properties.name.clone(),
                TopicEntity {
                    properties: properties.clone(),
                    subscriptions: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }

    async fn get_subscription(
        &self,
        topic: &str,
        subscription: &str,
    ) -> TransportResult<Option<SubscriptionProperties>> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, topic, "get subscription")?;
            Ok(state
                .topics
                .get(topic)
                .and_then(|topic| topic.subscriptions.get(subscription))
                .map(|entity| entity.properties.clone()))
        })
    }

    async fn create_subscription(
        &self,
        properties: &SubscriptionProperties,
        default_rule: &RuleProperties,
    ) -> TransportResult<()> {
        let path = subscription_path(&properties.topic_name, &properties.subscription_name);
        self.with_state(|state| {
            state.require(AccessRight::Manage, &path, "create subscription")?;

            if properties.subscription_name.chars().count() > MAX_SUBSCRIPTION_NAME_LENGTH {
                return Err(TransportError::configuration(
                    "subscription",
                    format!(
                        "subscription name '{}' exceeds {MAX_SUBSCRIPTION_NAME_LENGTH} characters",
                        properties.subscription_name
                    ),
                ));
            }
            if let Some(forward_to) = &properties.forward_to {
                if !state.queues.contains_key(forward_to) {
                    return Err(TransportError::entity_not_found(forward_to));
                }
            }

            let topic = state
                .topics
                .get_mut(&properties.topic_name)
                .ok_or_else(|| TransportError::entity_not_found(&properties.topic_name))?;
            if topic.subscriptions.contains_key(&properties.subscription_name) {
                return Err(TransportError::entity_already_exists(&path));
            }

            let mut rules = BTreeMap::new();
            rules.insert(default_rule.name.clone(), default_rule.clone());
            topic.subscriptions.insert(
                properties.subscription_name.clone(),
                SubscriptionEntity {
                    properties: properties.clone(),
                    rules,
                    store: MessageStore::default(),
                },
            );
            Ok(())
        })
    }

    async fn get_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &str,
    ) -> TransportResult<Option<RuleProperties>> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, topic, "get rule")?;
            Ok(state.subscription_ref(topic, subscription)?.rules.get(rule).cloned())
        })
    }

    async fn create_rule(
        &self,
        topic: &str,
        subscription: &str,
        rule: &RuleProperties,
    ) -> TransportResult<()> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, topic, "create rule")?;

            if rule.name.chars().count() > MAX_RULE_NAME_LENGTH {
                return Err(TransportError::configuration(
                    "rule",
                    format!("rule name '{}' exceeds {MAX_RULE_NAME_LENGTH} characters", rule.name),
                ));
            }

            let entity = state.subscription_mut(topic, subscription)?;
            if entity.rules.contains_key(&rule.name) {
                return Err(TransportError::entity_already_exists(format!(
                    "{}/Rules/{}",
                    subscription_path(topic, subscription),
                    rule.name
                )));
            }
            entity.rules.insert(rule.name.clone(), rule.clone());
            Ok(())
        })
    }

    async fn delete_rule(&self, topic: &str, subscription: &str, rule: &str) -> TransportResult<()> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, topic, "delete rule")?;
            state
                .subscription_mut(topic, subscription)?
                .rules
                .remove(rule)
                .map(|_| ())
                .ok_or_else(|| {
                    TransportError::entity_not_found(format!(
                        "{}/Rules/{rule}",
                        subscription_path(topic, subscription)
                    ))
                })
        })
    }

    async fn list_rules(
        &self,
        topic: &str,
        subscription: &str,
    ) -> TransportResult<Vec<RuleProperties>> {
        self.with_state(|state| {
            state.require(AccessRight::Manage, topic, "list rules")?;
            Ok(state
                .subscription_ref(topic, subscription)?
                .rules
                .values()
                .cloned()
                .collect())
        })
    }
}
