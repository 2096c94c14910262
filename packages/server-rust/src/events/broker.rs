//! In-process topic broker.
//!
//! Exchanges route published messages to every queue whose binding pattern
//! matches the routing key. Each queue is drained by its own
//! [`BackgroundWorker`]; consumers registered on the same queue compete for
//! messages (round-robin), so a message reaches exactly one of them.
//!
//! Delivery is at-least-once: a consumer returning
//! [`ConsumerError::Retryable`] gets the message redelivered (to the next
//! consumer in rotation) until `max_deliveries` is reached, after which the
//! message is dead-lettered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::{ConsumerError, PublishError, TopologyError};
use super::pattern::topic_matches;
use crate::service::worker::{BackgroundRunnable, BackgroundWorker, SubmitError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Broker tuning knobs.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Per-queue channel capacity between publishers and the dispatcher.
    pub queue_capacity: usize,
    /// Total delivery attempts for one message before it is dead-lettered.
    pub max_deliveries: u32,
    /// Interval of the dispatcher housekeeping tick in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_deliveries: 3,
            tick_interval_ms: 30_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One message as seen by a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned id, shared by every queue copy of the same publish.
    pub message_id: u64,
    pub exchange: String,
    pub routing_key: String,
    pub body: Bytes,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

impl Delivery {
    #[must_use]
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// A message the broker gave up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub queue: String,
    pub delivery: Delivery,
    pub reason: String,
}

/// A consumer registered on a queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Processes one delivery. `Ok` acknowledges it.
    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumerError>;
}

// ---------------------------------------------------------------------------
// MessageBroker trait
// ---------------------------------------------------------------------------

/// Topic-exchange broker seam.
///
/// Publishing is fire-and-forget: it returns as soon as every matching
/// queue has accepted the message, without waiting for consumers.
pub trait MessageBroker: Send + Sync {
    /// Declares a topic exchange. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::BrokerClosed`] after shutdown.
    fn declare_exchange(&self, exchange: &str) -> Result<(), TopologyError>;

    /// Declares a durable queue. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError::BrokerClosed`] after shutdown.
    fn declare_queue(&self, queue: &str) -> Result<(), TopologyError>;

    /// Binds `queue` to `exchange` for routing keys matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange or queue has not been declared.
    fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), TopologyError>;

    /// Registers a competing consumer on `queue`.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue has not been declared.
    fn subscribe(&self, queue: &str, handler: Arc<dyn MessageHandler>)
        -> Result<(), TopologyError>;

    /// Routes `body` to every queue bound to `exchange` with a matching
    /// pattern. Returns the number of queues that accepted a copy, which is
    /// less than the number matched when some queue was full.
    ///
    /// # Errors
    ///
    /// See [`PublishError`]. Queue-level rejections are only an error when
    /// every matching queue rejected the message.
    fn publish(&self, exchange: &str, routing_key: &str, body: Bytes)
        -> Result<usize, PublishError>;
}

// ---------------------------------------------------------------------------
// Queue dispatcher
// ---------------------------------------------------------------------------

enum QueueTask {
    Deliver(Delivery),
    ConsumerAdded,
    Barrier(oneshot::Sender<()>),
}

type ConsumerList = Arc<RwLock<Vec<Arc<dyn MessageHandler>>>>;

struct QueueDispatcher {
    queue: String,
    consumers: ConsumerList,
    next_consumer: usize,
    pending: VecDeque<Delivery>,
    max_deliveries: u32,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl QueueDispatcher {
    fn pick_consumer(&mut self) -> Option<Arc<dyn MessageHandler>> {
        let consumers = self.consumers.read();
        if consumers.is_empty() {
            return None;
        }
        let consumer = Arc::clone(&consumers[self.next_consumer % consumers.len()]);
        self.next_consumer = self.next_consumer.wrapping_add(1);
        Some(consumer)
    }

    async fn dispatch_pending(&mut self) {
        while let Some(delivery) = self.pending.pop_front() {
            if let Err(parked) = self.deliver(delivery).await {
                // No consumer yet: keep the backlog in order until one subscribes.
                self.pending.push_front(parked);
                break;
            }
        }
    }

    /// Delivers until acknowledged or dead-lettered. Hands the message back
    /// if the queue has no consumers.
    async fn deliver(&mut self, mut delivery: Delivery) -> Result<(), Delivery> {
        loop {
            let Some(consumer) = self.pick_consumer() else {
                return Err(delivery);
            };
            match consumer.handle(&delivery).await {
                Ok(()) => return Ok(()),
                Err(ConsumerError::Retryable(reason)) if delivery.attempt < self.max_deliveries => {
                    debug!(
                        queue = %self.queue,
                        consumer = consumer.name(),
                        message_id = delivery.message_id,
                        attempt = delivery.attempt,
                        reason = %reason,
                        "redelivering message"
                    );
                    metrics::counter!("events_redelivered_total", "queue" => self.queue.clone())
                        .increment(1);
                    delivery.attempt += 1;
                }
                Err(err) => {
                    self.dead_letter(delivery, consumer.name(), &err);
                    return Ok(());
                }
            }
        }
    }

    fn dead_letter(&self, delivery: Delivery, consumer: &str, err: &ConsumerError) {
        warn!(
            queue = %self.queue,
            consumer,
            message_id = delivery.message_id,
            attempt = delivery.attempt,
            error = %err,
            "dead-lettering message"
        );
        metrics::counter!("events_dead_lettered_total", "queue" => self.queue.clone())
            .increment(1);
        self.dead_letters.lock().push(DeadLetter {
            queue: self.queue.clone(),
            delivery,
            reason: err.to_string(),
        });
    }
}

#[async_trait]
impl BackgroundRunnable for QueueDispatcher {
    type Task = QueueTask;

    async fn run(&mut self, task: QueueTask) {
        match task {
            QueueTask::Deliver(delivery) => {
                self.pending.push_back(delivery);
                self.dispatch_pending().await;
            }
            QueueTask::ConsumerAdded => self.dispatch_pending().await,
            QueueTask::Barrier(done) => {
                self.dispatch_pending().await;
                let _ = done.send(());
            }
        }
    }

    async fn on_tick(&mut self) {
        if !self.pending.is_empty() {
            debug!(queue = %self.queue, backlog = self.pending.len(), "queue has no consumers");
        }
    }

    async fn shutdown(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                queue = %self.queue,
                dropped = self.pending.len(),
                "queue stopped with undelivered messages"
            );
        }
    }
}

struct QueueHandle {
    worker: BackgroundWorker<QueueDispatcher>,
    consumers: ConsumerList,
}

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    pattern: String,
}

// ---------------------------------------------------------------------------
// InMemoryBroker
// ---------------------------------------------------------------------------

/// Tokio-backed [`MessageBroker`]. Must be used from within a tokio runtime.
pub struct InMemoryBroker {
    config: BrokerConfig,
    exchanges: DashMap<String, Vec<Binding>>,
    queues: DashMap<String, QueueHandle>,
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
    next_message_id: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            exchanges: DashMap::new(),
            queues: DashMap::new(),
            dead_letters: Arc::new(Mutex::new(Vec::new())),
            next_message_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of consumers registered on `queue`, or `None` if undeclared.
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.consumers.read().len())
    }

    /// Snapshot of every dead-lettered message so far.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    /// Waits until every message accepted before this call has been
    /// delivered (or dead-lettered) on every queue that has consumers.
    pub async fn drain(&self) {
        let senders: Vec<_> = self
            .queues
            .iter()
            .filter_map(|q| q.worker.sender())
            .collect();
        for tx in senders {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(QueueTask::Barrier(done_tx)).await.is_ok() {
                let _ = done_rx.await;
            }
        }
    }

    /// Drains outstanding deliveries, then stops every queue worker.
    /// Subsequent publishes fail with [`PublishError::BrokerClosed`].
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.drain().await;
        let names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        for name in names {
            if let Some((_, mut handle)) = self.queues.remove(&name) {
                handle.worker.stop().await;
            }
        }
    }

    fn ensure_open(&self) -> Result<(), TopologyError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TopologyError::BrokerClosed)
        } else {
            Ok(())
        }
    }
}

impl MessageBroker for InMemoryBroker {
    fn declare_exchange(&self, exchange: &str) -> Result<(), TopologyError> {
        self.ensure_open()?;
        self.exchanges.entry(exchange.to_string()).or_default();
        Ok(())
    }

    fn declare_queue(&self, queue: &str) -> Result<(), TopologyError> {
        self.ensure_open()?;
        self.queues.entry(queue.to_string()).or_insert_with(|| {
            let consumers: ConsumerList = Arc::new(RwLock::new(Vec::new()));
            let dispatcher = QueueDispatcher {
                queue: queue.to_string(),
                consumers: Arc::clone(&consumers),
                next_consumer: 0,
                pending: VecDeque::new(),
                max_deliveries: self.config.max_deliveries.max(1),
                dead_letters: Arc::clone(&self.dead_letters),
            };
            QueueHandle {
                worker: BackgroundWorker::start_with_capacity(
                    dispatcher,
                    self.config.tick_interval_ms,
                    self.config.queue_capacity,
                ),
                consumers,
            }
        });
        Ok(())
    }

    fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<(), TopologyError> {
        self.ensure_open()?;
        if !self.queues.contains_key(queue) {
            return Err(TopologyError::UnknownQueue(queue.to_string()));
        }
        let mut bindings = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| TopologyError::UnknownExchange(exchange.to_string()))?;
        let exists = bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern == pattern);
        if !exists {
            bindings.push(Binding {
                queue: queue.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Ok(())
    }

    fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TopologyError> {
        self.ensure_open()?;
        let handle = self
            .queues
            .get(queue)
            .ok_or_else(|| TopologyError::UnknownQueue(queue.to_string()))?;
        handle.consumers.write().push(handler);
        // Best effort: a full channel means deliveries are already queued and
        // will flush the backlog when processed.
        let _ = handle.worker.try_submit(QueueTask::ConsumerAdded);
        Ok(())
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Bytes,
    ) -> Result<usize, PublishError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PublishError::BrokerClosed);
        }
        let mut targets: Vec<String> = {
            let bindings = self
                .exchanges
                .get(exchange)
                .ok_or_else(|| PublishError::UnknownExchange(exchange.to_string()))?;
            bindings
                .iter()
                .filter(|b| topic_matches(&b.pattern, routing_key))
                .map(|b| b.queue.clone())
                .collect()
        };
        // A queue matched by several of its bindings still receives one copy.
        targets.sort();
        targets.dedup();

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let routed = targets.len();
        let mut accepted = 0;
        let mut first_failure = None;
        for queue in targets {
            let Some(handle) = self.queues.get(&queue) else {
                continue;
            };
            let delivery = Delivery {
                message_id,
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: body.clone(),
                attempt: 1,
            };
            let rejected = match handle.worker.try_submit(QueueTask::Deliver(delivery)) {
                Ok(()) => {
                    accepted += 1;
                    continue;
                }
                Err(SubmitError::Full) => PublishError::QueueFull(queue.clone()),
                Err(SubmitError::Closed) => PublishError::BrokerClosed,
            };
            warn!(queue = %queue, routing_key, message_id, error = %rejected, "queue rejected message");
            metrics::counter!("broker_queue_rejections_total", "queue" => queue).increment(1);
            first_failure.get_or_insert(rejected);
        }
        // Only a publish that reached none of its queues is a failure; a
        // partial fan-out is reported through the per-queue counter.
        match first_failure {
            Some(err) if accepted == 0 => Err(err),
            _ => {
                if accepted < routed {
                    debug!(routing_key, accepted, routed, "partial fan-out");
                }
                Ok(accepted)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
