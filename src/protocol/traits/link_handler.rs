//! Application-facing callbacks invoked by the engine as traffic moves.
//! The engine holds no lock of any kind while calling into the handler, so
//! implementations are free to call back into the link.
use crate::protocol::logger::FrameLog;

/// Receives payloads, delivery confirmations and connection events.
///
/// `address` is the remote station number: the peer's number on a primary
/// station, the primary's number (0) on a secondary.
pub trait LinkHandler {
    /// An in-order payload arrived from `address`.
    fn on_received(&mut self, address: u8, payload: &[u8]);

    /// The peer acknowledged the payload previously submitted for `address`.
    /// Confirmations arrive in submission order.
    fn on_sent(&mut self, address: u8, payload: &[u8]);

    /// The connection to `address` was established or dropped.
    fn on_connect(&mut self, address: u8, connected: bool) {
        let _ = (address, connected);
    }

    /// Every frame moved in either direction, decoded for diagnostics.
    fn on_frame(&mut self, frame: &FrameLog<'_>) {
        let _ = frame;
    }
}
