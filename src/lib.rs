//! streamrelay - event stream relay
//!
//! Bridges a durable event stream to live WebSocket subscribers and re-injects
//! externally submitted messages into the stream.
//!
//! ```text
//! POST /api/messages -> IngestionGateway -> MessageStore -> StreamProducer -> broker
//! broker -> StreamConsumer -> RecordCodec -> SubscriberRegistry -> /ws subscribers
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod producer;
pub mod registry;
pub mod storage;
pub mod utils;
