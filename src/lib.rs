//! `linkfd` library: a full-duplex, connection-oriented HDLC link engine for
//! `no_std` environments. The crate exposes the byte-level infrastructure
//! (CRC, flag/escape framing), the protocol core (sliding window, go-back-N
//! retransmission, ABM/NRM station management), and an asynchronous service
//! layer driven through user-supplied transport traits.
#![no_std]
/// Domain errors (configuration, payload submission, framing, and related issues).
pub mod error;
/// Byte-level infrastructure: checksums and the flag/escape frame codec.
pub mod infra;
/// HDLC protocol implementation: frame codec, queues, peer table, engine,
/// byte pump and the channel-based service layer.
pub mod protocol;
