//! Collection-event fan-out.
//!
//! 1. **Broker** (`broker`): topic exchanges, queues, competing consumers,
//!    retry and dead-lettering
//! 2. **Publisher** (`publisher`): envelope encoding and publish metrics
//! 3. **Consumers** (`consumer`, `handlers`): discriminant-first decoding,
//!    redelivery dedup, per-kind effects
//! 4. **Topology** (`topology`): queue layout and bindings

pub mod broker;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod pattern;
pub mod publisher;
pub mod topology;

pub use broker::{BrokerConfig, DeadLetter, Delivery, InMemoryBroker, MessageBroker, MessageHandler};
pub use consumer::{EventConsumer, EventHandler};
pub use error::{ConsumerError, PublishError, TopologyError};
pub use handlers::{ActivityLogHandler, CardPopularityHandler};
pub use publisher::EventPublisher;
pub use topology::{QueueLayout, Topology};
