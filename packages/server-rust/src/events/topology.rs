//! Exchange, queue and binding declarations for collection events.

use std::sync::Arc;

use cardvault_core::{EventKind, CARD_EVENTS_EXCHANGE};
use tracing::{info, warn};

use super::broker::MessageBroker;
use super::consumer::{EventConsumer, EventHandler, DEFAULT_DEDUP_CAPACITY};
use super::error::TopologyError;

/// Queue name used by the shared-queue layout.
pub const SHARED_QUEUE: &str = "card.events.queue";

/// Pattern binding the shared queue to every card-event category.
pub const SHARED_QUEUE_PATTERN: &str = "card.events.*";

/// How handlers are mapped onto queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLayout {
    /// Each handler owns a queue bound to the routing keys of the kinds it
    /// accepts. Every handler sees every event it is interested in.
    PerHandler,
    /// All handlers compete on one queue bound to every category. Each
    /// message reaches exactly one handler, whichever is next in rotation.
    SharedQueue,
}

/// Declarative broker wiring for the card-event exchange.
#[derive(Debug, Clone)]
pub struct Topology {
    exchange: String,
    layout: QueueLayout,
    dedup_capacity: usize,
}

impl Default for Topology {
    fn default() -> Self {
        Self::per_handler()
    }
}

impl Topology {
    /// One queue per handler on [`CARD_EVENTS_EXCHANGE`].
    #[must_use]
    pub fn per_handler() -> Self {
        Self {
            exchange: CARD_EVENTS_EXCHANGE.to_string(),
            layout: QueueLayout::PerHandler,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }

    /// Every handler registered on [`SHARED_QUEUE`] as a competing consumer.
    ///
    /// Handlers silently miss the events delivered to their competitors, so
    /// this layout is only useful to observe that behaviour.
    #[must_use]
    pub fn legacy_shared_queue() -> Self {
        Self {
            layout: QueueLayout::SharedQueue,
            ..Self::per_handler()
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    #[must_use]
    pub fn layout(&self) -> QueueLayout {
        self.layout
    }

    /// Queue a handler is registered on under this layout.
    #[must_use]
    pub fn queue_for(&self, handler: &dyn EventHandler) -> String {
        match self.layout {
            QueueLayout::PerHandler => format!("card.events.{}.queue", handler.name()),
            QueueLayout::SharedQueue => SHARED_QUEUE.to_string(),
        }
    }

    /// Declares the exchange, queues and bindings, and subscribes one
    /// [`EventConsumer`] per handler. Returns the consumers in handler order.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker rejects any declaration.
    pub fn apply(
        &self,
        broker: &dyn MessageBroker,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) -> Result<Vec<Arc<EventConsumer>>, TopologyError> {
        broker.declare_exchange(&self.exchange)?;

        if self.layout == QueueLayout::SharedQueue {
            warn!(
                queue = SHARED_QUEUE,
                handlers = handlers.len(),
                "handlers share one queue; each event reaches only one of them"
            );
            broker.declare_queue(SHARED_QUEUE)?;
            broker.bind_queue(SHARED_QUEUE, &self.exchange, SHARED_QUEUE_PATTERN)?;
        }

        let mut consumers = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let queue = self.queue_for(handler.as_ref());
            if self.layout == QueueLayout::PerHandler {
                broker.declare_queue(&queue)?;
                for kind in EventKind::ALL.into_iter().filter(|k| handler.accepts(*k)) {
                    broker.bind_queue(&queue, &self.exchange, kind.routing_key())?;
                }
            }
            let consumer = Arc::new(EventConsumer::with_dedup_capacity(
                Arc::clone(&handler),
                self.dedup_capacity,
            ));
            broker.subscribe(&queue, consumer.clone())?;
            info!(handler = handler.name(), queue = %queue, "event consumer registered");
            consumers.push(consumer);
        }
        Ok(consumers)
    }
}
