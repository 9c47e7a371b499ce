//! Contracts between the protocol engine and its environment: application
//! callbacks, the byte transport, and timing.
pub mod link_handler;
pub mod link_timer;
pub mod serial_port;
