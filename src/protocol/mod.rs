//! High-level components of the link protocol: frame codec, slot queues,
//! peer table, the sliding-window engine, the serial byte pump, frame
//! logging, and the channel-based service layer.
pub mod engine;
pub mod frame;
pub mod link;
pub mod logger;
pub mod peer;
pub mod queue;
pub mod service;
pub mod traits;
