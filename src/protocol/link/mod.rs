//! Byte pump tying the sans-IO engine to a serial byte stream: received
//! bytes flow through the deframer into the engine, scheduled frames flow
//! through the framer out to the caller's buffer.
//!
//! `BUF` bounds one frame on the wire and must cover the MTU plus the
//! two-byte header and the checksum field.
use crate::error::LinkError;
use crate::infra::framing::{Deframer, Framer, RxOutcome};
use crate::protocol::engine::{DuplexEngine, TxPoll, TxToken};
use crate::protocol::frame::PRIMARY_STATION;
use crate::protocol::traits::link_handler::LinkHandler;

pub use crate::protocol::engine::{LinkConfig, LinkMode};

/// Header plus the widest checksum field.
const FRAME_OVERHEAD: usize = 2 + 4;

/// A full-duplex link over a byte stream.
///
/// `PEERS` is the peer-slot count, `MTU` the payload bytes per I-frame,
/// `WINDOW` the I-frame pool depth (2–7), and `BUF` the codec buffer size.
#[derive(Debug)]
pub struct SerialLink<
    H: LinkHandler,
    const PEERS: usize,
    const MTU: usize,
    const WINDOW: usize,
    const BUF: usize,
> {
    engine: DuplexEngine<H, PEERS, MTU, WINDOW>,
    deframer: Deframer<BUF>,
    framer: Framer<BUF>,
    scratch: [u8; BUF],
    pending: Option<TxToken>,
}

impl<H: LinkHandler, const PEERS: usize, const MTU: usize, const WINDOW: usize, const BUF: usize>
    SerialLink<H, PEERS, MTU, WINDOW, BUF>
{
    pub fn new(config: &LinkConfig, handler: H) -> Result<Self, LinkError> {
        if BUF < MTU + FRAME_OVERHEAD {
            return Err(LinkError::OutOfMemory);
        }
        Ok(Self {
            engine: DuplexEngine::new(config, handler)?,
            deframer: Deframer::new(config.crc),
            framer: Framer::new(config.crc),
            scratch: [0; BUF],
            pending: None,
        })
    }

    /// Feed bytes received from the channel. Complete frames are dispatched
    /// to the engine; checksum failures are logged and skipped.
    pub fn on_rx_data(&mut self, now_ms: u32, data: &[u8]) {
        let mut offset = 0;
        while offset < data.len() {
            let (used, outcome) = self.deframer.consume(&data[offset..]);
            offset += used;
            match outcome {
                RxOutcome::Frame(_) => {
                    self.engine.accept_frame(now_ms, self.deframer.frame());
                }
                RxOutcome::BadCrc => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("checksum mismatch, frame dropped");
                }
                RxOutcome::Oversize => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("oversize frame dropped");
                }
                RxOutcome::Pending => {}
            }
        }
    }

    /// Fill `out` with bytes to transmit. Scheduling, timeouts and
    /// retransmissions all run from here, so drivers should call it
    /// regularly even when idle. Returns the number of bytes produced.
    pub fn get_tx_data(&mut self, now_ms: u32, out: &mut [u8]) -> Result<usize, LinkError> {
        let peer = self.engine.current_peer();
        let mut written = 0;
        let mut repeat = true;
        while written < out.len() {
            let produced;
            if self.pending.is_some() {
                produced = self.framer.run_tx(&mut out[written..]);
                if !self.framer.is_sending() {
                    if let Some(token) = self.pending.take() {
                        self.engine.frame_sent(token);
                    }
                }
            } else {
                match self.engine.poll_transmit(now_ms, peer, &mut self.scratch) {
                    TxPoll::UnknownPeer => {
                        if written == 0 {
                            return Err(LinkError::UnknownPeer);
                        }
                        break;
                    }
                    TxPoll::Frame { len, token } => {
                        // The framer is idle whenever `pending` is empty and
                        // scratch never exceeds the codec buffer.
                        let _ = self.framer.put(&self.scratch[..len]);
                        self.pending = Some(token);
                        continue;
                    }
                    TxPoll::Idle => produced = 0,
                }
            }
            written += produced;
            if produced == 0 {
                if !repeat {
                    break;
                }
                repeat = false;
            } else {
                repeat = true;
            }
        }
        Ok(written)
    }

    /// Read up to four bytes from `read` and run RX processing on them.
    /// Returns how many bytes the callback produced.
    pub fn pump_rx<F: FnMut(&mut [u8]) -> usize>(&mut self, now_ms: u32, read: &mut F) -> usize {
        let mut staging = [0u8; 4];
        let len = read(&mut staging);
        if len > 0 {
            self.on_rx_data(now_ms, &staging[..len]);
        }
        len
    }

    /// Generate up to four bytes of TX data and push them through `write`.
    /// Returns how many bytes were generated.
    pub fn pump_tx<F: FnMut(&[u8]) -> usize>(
        &mut self,
        now_ms: u32,
        write: &mut F,
    ) -> Result<usize, LinkError> {
        let mut staging = [0u8; 4];
        let len = self.get_tx_data(now_ms, &mut staging)?;
        let mut offset = 0;
        while offset < len {
            let moved = write(&staging[offset..len]);
            if moved == 0 {
                break;
            }
            offset += moved;
        }
        Ok(len)
    }

    /// Queue one payload of at most MTU bytes for `address`.
    /// [`LinkError::Busy`] means the window or the pool is full right now.
    pub fn send_packet_to(&mut self, address: u8, data: &[u8]) -> Result<(), LinkError> {
        self.engine.enqueue_packet(address, data)
    }

    /// Queue one payload for the primary station.
    pub fn send_packet(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.send_packet_to(PRIMARY_STATION, data)
    }

    /// Fragment `data` into MTU-sized packets for `address`.
    /// Returns the number of bytes that could not be queued.
    pub fn send_to(&mut self, address: u8, data: &[u8]) -> usize {
        let mtu = self.engine.mtu();
        let mut offset = 0;
        while offset < data.len() {
            let size = (data.len() - offset).min(mtu);
            if self
                .engine
                .enqueue_packet(address, &data[offset..offset + size])
                .is_err()
            {
                break;
            }
            offset += size;
        }
        data.len() - offset
    }

    /// Fragment `data` for the primary station.
    pub fn send(&mut self, data: &[u8]) -> usize {
        self.send_to(PRIMARY_STATION, data)
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        self.engine.disconnect()
    }

    pub fn register_peer(&mut self, now_ms: u32, station: u8) -> Result<(), LinkError> {
        self.engine.register_peer(now_ms, station)
    }

    pub const fn mtu(&self) -> usize {
        MTU
    }

    pub fn set_keep_alive_timeout(&mut self, millis: u32) {
        self.engine.set_keep_alive_timeout(millis);
    }

    /// RAM consumed by this instance, for storage budgeting.
    pub const fn ram_usage() -> usize {
        core::mem::size_of::<Self>()
    }

    pub fn handler(&self) -> &H {
        self.engine.handler()
    }

    pub fn handler_mut(&mut self) -> &mut H {
        self.engine.handler_mut()
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
