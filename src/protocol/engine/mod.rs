//! The full-duplex link engine: connection state machine, sliding-window
//! bookkeeping, RX dispatch and TX scheduling.
//!
//! The engine is sans-IO. It consumes complete frames stamped with a
//! monotonic millisecond clock and produces complete frames to transmit;
//! the byte pump in [`crate::protocol::link`] owns the flag/escape codec and
//! drives this state machine. Because the engine is exclusively owned by its
//! driver, handler callbacks run without any lock held and may re-enter the
//! link from the outside.
use crate::error::LinkError;
use crate::infra::crc::CrcMode;
use crate::protocol::frame::{
    encode_address, i_control, s_control, seq_next, seq_prev, station_of, u_control,
    FrameHeader, SFrameKind, UFrameKind, CR_BIT, E_BIT, I_FRAME_BITS, I_FRAME_MASK, PF_BIT,
    PRIMARY_STATION, SEQ_MASK, S_FRAME_BITS, S_FRAME_MASK, S_TYPE_MASK, UNUSED_ADDRESS,
    U_FRAME_BITS, U_FRAME_MASK, U_TYPE_MASK,
};
use crate::protocol::logger::{self, FrameDirection};
use crate::protocol::peer::{Events, PeerSlot, PeerState};
use crate::protocol::queue::{FrameQueue, SlotTag};
use crate::protocol::traits::link_handler::LinkHandler;

/// Depth of the supervisory/unnumbered frame pool.
pub const SERVICE_QUEUE_DEPTH: usize = 4;
/// Extra bytes a service frame may carry (the FRMR error report).
const SERVICE_SLOT_CAP: usize = 2;
/// Keep-alive period until overridden with `set_keep_alive_timeout`.
const DEFAULT_KA_TIMEOUT_MS: u32 = 5000;

/// Link operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Asynchronous Balanced Mode: both stations may transmit at any time.
    Abm,
    /// Normal Response Mode: the primary passes a transmission marker to one
    /// secondary at a time.
    Nrm,
}

/// Engine configuration. Storage capacities (peer slots, MTU, window) are
/// const generics on [`DuplexEngine`]; everything else lives here.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub mode: LinkMode,
    /// Local station number: 0 for the primary, 1–62 for secondaries.
    pub address: u8,
    /// Number of active peer slots (NRM primaries may talk to several
    /// secondaries). Zero behaves as one.
    pub peers_count: usize,
    /// Default deadline for blocking submissions in the service layer.
    pub send_timeout: u32,
    /// Acknowledgment timeout before a window retransmit. Zero derives
    /// `send_timeout / (retries + 1)`.
    pub retry_timeout: u32,
    /// Window retransmissions before the peer is declared dead.
    pub retries: u8,
    /// Frame checksum both stations agreed on.
    pub crc: CrcMode,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Abm,
            address: PRIMARY_STATION,
            peers_count: 1,
            send_timeout: 1000,
            retry_timeout: 0,
            retries: 2,
            crc: CrcMode::Crc16,
        }
    }
}

/// Identity of a frame handed to the byte framer, reported back to the
/// engine once the last byte left the station.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TxToken {
    /// Service-queue slot to release on completion; `None` for I-frames,
    /// which stay queued until the peer acknowledges them.
    pub service_slot: Option<usize>,
    pub control: u8,
}

/// Outcome of a transmit poll.
#[derive(Debug)]
pub(crate) enum TxPoll {
    /// Nothing to transmit right now.
    Idle,
    /// A frame was staged into the output buffer.
    Frame { len: usize, token: TxToken },
    /// The serviced peer slot is unused (no secondary registered).
    UnknownPeer,
}

/// Sliding-window link engine over `PEERS` peer slots, an I-frame pool of
/// `WINDOW` slots carrying up to `MTU` bytes each, and a small service pool.
#[derive(Debug)]
pub struct DuplexEngine<H: LinkHandler, const PEERS: usize, const MTU: usize, const WINDOW: usize>
{
    handler: H,
    i_queue: FrameQueue<WINDOW, MTU>,
    service_queue: FrameQueue<SERVICE_QUEUE_DEPTH, SERVICE_SLOT_CAP>,
    peers: [PeerSlot; PEERS],
    peers_count: usize,
    local_address: u8,
    mode: LinkMode,
    next_peer: usize,
    last_marker_ts: u32,
    events: Events,
    retry_timeout: u32,
    ka_timeout: u32,
    retries: u8,
}

impl<H: LinkHandler, const PEERS: usize, const MTU: usize, const WINDOW: usize>
    DuplexEngine<H, PEERS, MTU, WINDOW>
{
    pub fn new(config: &LinkConfig, handler: H) -> Result<Self, LinkError> {
        // One window slot is reserved by the modulo-8 arithmetic, so fewer
        // than two slots cannot move data at all.
        if !(2..=7).contains(&WINDOW) || MTU == 0 {
            return Err(LinkError::InvalidData);
        }
        if config.address > 62 {
            return Err(LinkError::InvalidData);
        }
        if config.retry_timeout == 0 && config.send_timeout == 0 {
            return Err(LinkError::InvalidData);
        }
        let peers_count = config.peers_count.max(1);
        if peers_count > PEERS {
            return Err(LinkError::OutOfMemory);
        }
        let local_address = encode_address(config.address);
        let retry_timeout = if config.retry_timeout != 0 {
            config.retry_timeout
        } else {
            config.send_timeout / (config.retries as u32 + 1)
        };

        let mut engine = Self {
            handler,
            i_queue: FrameQueue::new(),
            service_queue: FrameQueue::new(),
            peers: [PeerSlot::UNUSED; PEERS],
            peers_count,
            local_address,
            mode: config.mode,
            next_peer: 0,
            last_marker_ts: 0,
            events: Events::default(),
            retry_timeout,
            ka_timeout: DEFAULT_KA_TIMEOUT_MS,
            retries: config.retries,
        };
        for peer in 0..peers_count {
            engine.peers[peer].retries = config.retries;
            // A secondary always answers with its own address, and in ABM
            // both stations frame their traffic with the same address.
            if engine.is_secondary() || engine.mode == LinkMode::Abm {
                engine.peers[peer].address = local_address;
            }
        }
        engine.events.insert(Events::QUEUE_HAS_FREE_SLOTS);
        if engine.is_primary() {
            engine.events.insert(Events::HAS_MARKER);
        }
        Ok(engine)
    }

    //==============================================================================Station helpers

    pub fn is_primary(&self) -> bool {
        self.local_address == encode_address(PRIMARY_STATION)
    }

    pub fn is_secondary(&self) -> bool {
        !self.is_primary()
    }

    pub const fn mtu(&self) -> usize {
        MTU
    }

    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    pub fn events(&self) -> Events {
        self.events
    }

    pub fn set_keep_alive_timeout(&mut self, millis: u32) {
        self.ka_timeout = millis;
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Translate an incoming address field into a peer slot.
    fn address_to_peer(&self, field: u8) -> Option<usize> {
        // The command/response bit never participates in the comparison.
        let address = field & !CR_BIT;
        if address & E_BIT == 0 {
            // Multi-byte address formats are not supported.
            return None;
        }
        if self.is_secondary() || self.mode == LinkMode::Abm {
            return (address == self.local_address).then_some(0);
        }
        self.peers[..self.peers_count]
            .iter()
            .position(|peer| peer.address == address)
    }

    fn peer_address(&self, peer: usize) -> u8 {
        self.peers[peer].address & !CR_BIT
    }

    /// The station number reported to the application for this peer.
    fn report_address(&self, peer: usize) -> u8 {
        if self.is_primary() {
            station_of(self.peer_address(peer))
        } else {
            PRIMARY_STATION
        }
    }

    fn connect_control(&self) -> u8 {
        u_control(if self.mode == LinkMode::Nrm {
            UFrameKind::Snrm
        } else {
            UFrameKind::Sabm
        })
    }

    //==============================================================================State transitions

    fn switch_to_connected(&mut self, now: u32, peer: usize) {
        if self.peers[peer].state == PeerState::Connected {
            return;
        }
        let address = self.peer_address(peer);
        self.peers[peer].state = PeerState::Connected;
        self.peers[peer].reset_window();
        self.i_queue.reset_for(address);
        // Stamp the arrival clock so a fresh connection does not instantly
        // trip the keep-alive timeout.
        self.peers[peer].last_ka_ts = now;
        self.peers[peer].events.insert(Events::CAN_ACCEPT_I_FRAMES);
        self.events.insert(Events::TX_DATA_AVAILABLE);
        if self.i_queue.has_free_slots() {
            self.events.insert(Events::QUEUE_HAS_FREE_SLOTS);
        }
        #[cfg(feature = "defmt")]
        defmt::info!("connection established with station {}", station_of(address));
        let report = self.report_address(peer);
        self.handler.on_connect(report, true);
    }

    fn switch_to_disconnected(&mut self, peer: usize) {
        if self.peers[peer].state == PeerState::Disconnected {
            return;
        }
        let address = self.peer_address(peer);
        self.peers[peer].state = PeerState::Disconnected;
        self.peers[peer].reset_window();
        self.i_queue.reset_for(address);
        self.peers[peer].events.remove(Events::CAN_ACCEPT_I_FRAMES);
        if self.i_queue.has_free_slots() {
            self.events.insert(Events::QUEUE_HAS_FREE_SLOTS);
        }
        #[cfg(feature = "defmt")]
        defmt::info!("disconnected from station {}", station_of(address));
        let report = self.report_address(peer);
        self.handler.on_connect(report, false);
    }

    fn enqueue_service(&mut self, tag: SlotTag, header: FrameHeader, extra: &[u8]) -> bool {
        match self.service_queue.allocate(tag, extra) {
            Some(index) => {
                self.service_queue.slot_mut(index).header = header;
                self.events.insert(Events::TX_DATA_AVAILABLE);
                true
            }
            None => {
                // The peer will repeat its request; retransmissions cover us.
                #[cfg(feature = "defmt")]
                defmt::warn!("service queue full, response dropped");
                false
            }
        }
    }

    //==============================================================================RX dispatch

    /// Process one complete received frame (header + payload, checksum
    /// already stripped by the codec).
    pub fn accept_frame(&mut self, now: u32, data: &[u8]) {
        if data.len() < 2 {
            #[cfg(feature = "defmt")]
            defmt::warn!("received frame is too short");
            return;
        }
        let Some(peer) = self.address_to_peer(data[0]) else {
            // Not our traffic.
            return;
        };
        logger::emit(&mut self.handler, FrameDirection::In, data);
        self.peers[peer].last_ka_ts = now;
        self.peers[peer].ka_confirmed = true;
        let control = data[1];
        if control & U_FRAME_MASK == U_FRAME_BITS {
            self.on_u_frame(now, peer, data);
        } else if !matches!(
            self.peers[peer].state,
            PeerState::Connected | PeerState::Disconnecting
        ) {
            // Numbered traffic without a connection: ask the peer to set up
            // a fresh link instead of guessing at its window state.
            #[cfg(feature = "defmt")]
            defmt::info!("stray data while disconnected, connecting");
            let header = FrameHeader::new(self.peer_address(peer) | CR_BIT, self.connect_control());
            self.enqueue_service(SlotTag::Unnumbered, header, &[]);
            self.peers[peer].state = PeerState::Connecting;
        } else if control & I_FRAME_MASK == I_FRAME_BITS {
            self.on_i_frame(peer, data);
        } else if control & S_FRAME_MASK == S_FRAME_BITS {
            self.on_s_frame(peer, data);
        }
        if control & PF_BIT != 0 {
            // The peer passed us the transmission marker.
            self.events.insert(Events::HAS_MARKER);
        }
    }

    fn on_u_frame(&mut self, now: u32, peer: usize, data: &[u8]) {
        const SABM: u8 = UFrameKind::Sabm as u8;
        const SNRM: u8 = UFrameKind::Snrm as u8;
        const DISC: u8 = UFrameKind::Disc as u8;
        const UA: u8 = UFrameKind::Ua as u8;
        const FRMR: u8 = UFrameKind::Frmr as u8;
        const RSET: u8 = UFrameKind::Rset as u8;

        match data[1] & U_TYPE_MASK {
            SABM | SNRM => {
                let header = FrameHeader::new(self.peer_address(peer), u_control(UFrameKind::Ua));
                self.enqueue_service(SlotTag::Unnumbered, header, &[]);
                // A connect request on a live link resets the window; the
                // application observes a disconnect/connect pair.
                if !matches!(
                    self.peers[peer].state,
                    PeerState::Disconnected | PeerState::Connecting
                ) {
                    self.switch_to_disconnected(peer);
                }
                self.switch_to_connected(now, peer);
            }
            DISC => {
                let header = FrameHeader::new(self.peer_address(peer), u_control(UFrameKind::Ua));
                self.enqueue_service(SlotTag::Unnumbered, header, &[]);
                self.switch_to_disconnected(peer);
            }
            UA => match self.peers[peer].state {
                PeerState::Connecting => self.switch_to_connected(now, peer),
                PeerState::Disconnecting => self.switch_to_disconnected(peer),
                _ => {}
            },
            RSET => {
                // Sequence reset is not negotiated; the retry machinery
                // recovers the link instead.
                #[cfg(feature = "defmt")]
                defmt::warn!("RSET ignored");
            }
            FRMR => {
                #[cfg(feature = "defmt")]
                defmt::warn!("peer reported a frame reject");
            }
            _ => {
                #[cfg(feature = "defmt")]
                defmt::warn!("unknown U-frame dropped");
            }
        }
    }

    fn on_i_frame(&mut self, peer: usize, data: &[u8]) {
        let control = data[1];
        let nr = control >> 5;
        let ns = (control >> 1) & SEQ_MASK;
        let in_order = self.check_received_frame(peer, ns);
        // N(R) piggybacked on the I-frame acknowledges our outgoing window.
        self.confirm_sent_frames(peer, nr);
        if in_order {
            let report = self.report_address(peer);
            self.handler.on_received(report, &data[2..]);
            // If nothing outbound will carry the acknowledgment soon, send
            // it separately.
            let peer_slot = &self.peers[peer];
            if peer_slot.all_frames_are_sent() && peer_slot.sent_nr != peer_slot.next_nr {
                let header = FrameHeader::new(
                    self.peer_address(peer),
                    s_control(SFrameKind::ReceiveReady, peer_slot.next_nr),
                );
                self.enqueue_service(SlotTag::Supervisory, header, &[]);
            }
        }
    }

    /// Sequence check for an arriving I-frame. Exactly one REJ is emitted
    /// per gap; it is re-armed once the expected frame arrives.
    fn check_received_frame(&mut self, peer: usize, ns: u8) -> bool {
        if ns == self.peers[peer].next_nr {
            self.peers[peer].next_nr = seq_next(self.peers[peer].next_nr);
            self.peers[peer].sent_reject = false;
            return true;
        }
        #[cfg(feature = "defmt")]
        defmt::warn!("out of order I-frame ns={}", ns);
        if !self.peers[peer].sent_reject {
            self.peers[peer].sent_reject = true;
            let header = FrameHeader::new(
                self.peer_address(peer) | CR_BIT,
                s_control(SFrameKind::Reject, self.peers[peer].next_nr),
            );
            self.enqueue_service(SlotTag::Supervisory, header, &[]);
        }
        false
    }

    fn on_s_frame(&mut self, peer: usize, data: &[u8]) {
        let address = data[0];
        let control = data[1];
        let nr = control >> 5;
        match control & S_TYPE_MASK {
            bits if bits == SFrameKind::Reject as u8 => {
                self.confirm_sent_frames(peer, nr);
                self.resend_all_unconfirmed_frames(peer, control, nr);
            }
            bits if bits == SFrameKind::ReceiveReady as u8 => {
                self.confirm_sent_frames(peer, nr);
                if address & CR_BIT != 0 {
                    // The peer polled us; answer unless data will do it.
                    if self.peers[peer].next_ns == self.peers[peer].last_ns {
                        let header = FrameHeader::new(
                            self.peer_address(peer),
                            s_control(SFrameKind::ReceiveReady, self.peers[peer].next_nr),
                        );
                        self.enqueue_service(SlotTag::Supervisory, header, &[]);
                    }
                }
            }
            _ => {
                #[cfg(feature = "defmt")]
                defmt::warn!("unknown S-frame dropped");
            }
        }
    }

    //==============================================================================Acknowledgments

    /// Release every sent I-frame up to the cumulative N(R), confirming each
    /// payload to the application in submission order.
    fn confirm_sent_frames(&mut self, peer: usize, nr: u8) {
        while nr != self.peers[peer].confirm_ns {
            if self.peers[peer].confirm_ns == self.peers[peer].last_ns {
                // The peer acknowledged something we never sent.
                #[cfg(feature = "defmt")]
                defmt::error!("confirmation carries wrong N(R), remote out of sync");
                break;
            }
            let address = self.peer_address(peer);
            let confirm_ns = self.peers[peer].confirm_ns;
            if let Some(index) = self.i_queue.next_information(address, confirm_ns) {
                let report = self.report_address(peer);
                self.handler.on_sent(report, self.i_queue.slot(index).payload());
                self.i_queue.free(index);
                if self.i_queue.has_free_slots() {
                    self.events.insert(Events::QUEUE_HAS_FREE_SLOTS);
                }
            } else {
                #[cfg(feature = "defmt")]
                defmt::error!("confirmed frame {} is not queued", confirm_ns);
            }
            self.peers[peer].confirm_ns = seq_next(confirm_ns);
            self.peers[peer].retries = self.retries;
        }
        if self.peers[peer].can_accept_i_frames() {
            self.peers[peer].events.insert(Events::CAN_ACCEPT_I_FRAMES);
        }
    }

    /// Go-back-N: rewind the transmit sequence to the peer's N(R) so the
    /// whole outstanding window is replayed. An N(R) outside the window gets
    /// an FRMR report instead.
    fn resend_all_unconfirmed_frames(&mut self, peer: usize, control: u8, nr: u8) {
        while self.peers[peer].next_ns != nr {
            if self.peers[peer].confirm_ns == self.peers[peer].next_ns {
                #[cfg(feature = "defmt")]
                defmt::error!("peer N(R) outside our window, reporting FRMR");
                let report = [
                    control,
                    (self.peers[peer].next_nr << 5) | (self.peers[peer].next_ns << 1),
                ];
                let header =
                    FrameHeader::new(self.peer_address(peer) | CR_BIT, u_control(UFrameKind::Frmr));
                self.enqueue_service(SlotTag::Unnumbered, header, &report);
                break;
            }
            self.peers[peer].next_ns = seq_prev(self.peers[peer].next_ns);
        }
        self.events.insert(Events::TX_DATA_AVAILABLE);
    }

    //==============================================================================TX scheduling

    pub(crate) fn current_peer(&self) -> usize {
        self.next_peer
    }

    /// Pick the next frame for the serviced peer, staging it into `out`.
    /// Runs the timeout bookkeeping for the peer first, exactly once per
    /// call, so a driver that polls regularly needs no separate timer API.
    pub(crate) fn poll_transmit(&mut self, now: u32, peer: usize, out: &mut [u8]) -> TxPoll {
        if self.peers[peer].address == UNUSED_ADDRESS {
            return TxPoll::UnknownPeer;
        }
        if matches!(
            self.peers[peer].state,
            PeerState::Connected | PeerState::Disconnecting
        ) {
            self.check_connected_timeouts(now, peer);
        } else {
            self.check_disconnected_timeouts(now, peer);
        }
        if self.events.contains(Events::HAS_MARKER) {
            let had_data = self.events.take(Events::TX_DATA_AVAILABLE);
            if had_data || self.mode == LinkMode::Nrm {
                if let Some((len, token)) = self.select_frame(now, peer, out) {
                    // Recheck for more data on the next poll.
                    self.events
                        .insert(Events::TX_DATA_AVAILABLE | Events::TX_SENDING);
                    return TxPoll::Frame { len, token };
                }
            }
            TxPoll::Idle
        } else if self.is_primary()
            && now.wrapping_sub(self.last_marker_ts) >= self.retry_timeout
        {
            // The secondary never answered; take the marker back rather than
            // deadlock the whole ring.
            #[cfg(feature = "defmt")]
            defmt::warn!("marker reclaimed from silent station");
            self.events.insert(Events::HAS_MARKER);
            TxPoll::Idle
        } else {
            TxPoll::Idle
        }
    }

    fn select_frame(&mut self, now: u32, peer: usize, out: &mut [u8]) -> Option<(usize, TxToken)> {
        let address = self.peer_address(peer);
        if let Some(index) = self.service_queue.next_service(address) {
            return Some(self.stage_service_frame(now, peer, index, out));
        }
        if matches!(
            self.peers[peer].state,
            PeerState::Connected | PeerState::Disconnecting
        ) {
            if let Some(index) = self
                .i_queue
                .next_information(address, self.peers[peer].next_ns)
            {
                return Some(self.stage_i_frame(now, peer, index, out));
            }
        }
        if self.mode == LinkMode::Nrm {
            // Nothing queued, but the marker must keep moving: synthesize a
            // frame to pass it.
            if self.is_primary()
                && matches!(
                    self.peers[peer].state,
                    PeerState::Disconnected | PeerState::Connecting
                )
            {
                let header = FrameHeader::new(address, u_control(UFrameKind::Snrm));
                self.enqueue_service(SlotTag::Unnumbered, header, &[]);
            } else {
                let header = FrameHeader::new(
                    address,
                    s_control(SFrameKind::ReceiveReady, self.peers[peer].next_nr),
                );
                self.enqueue_service(SlotTag::Supervisory, header, &[]);
            }
            if let Some(index) = self.service_queue.next_service(address) {
                return Some(self.stage_service_frame(now, peer, index, out));
            }
        }
        None
    }

    fn stage_service_frame(
        &mut self,
        now: u32,
        peer: usize,
        index: usize,
        out: &mut [u8],
    ) -> (usize, TxToken) {
        self.service_queue.slot_mut(index).header.control |= PF_BIT;
        let slot = self.service_queue.slot(index);
        let control = slot.header.control;
        let payload = slot.payload();
        out[0] = slot.header.address;
        out[1] = control;
        out[2..2 + payload.len()].copy_from_slice(payload);
        let len = 2 + payload.len();
        if control & S_FRAME_MASK == S_FRAME_BITS {
            self.peers[peer].sent_nr = control >> 5;
        }
        self.last_marker_ts = now;
        self.peers[peer].last_ka_ts = now;
        logger::emit(&mut self.handler, FrameDirection::Out, &out[..len]);
        (
            len,
            TxToken {
                service_slot: Some(index),
                control,
            },
        )
    }

    fn stage_i_frame(
        &mut self,
        now: u32,
        peer: usize,
        index: usize,
        out: &mut [u8],
    ) -> (usize, TxToken) {
        let next_nr = self.peers[peer].next_nr;
        {
            let header = &mut self.i_queue.slot_mut(index).header;
            // Keep N(S), refresh N(R), and carry the poll bit.
            header.control &= 0x0F;
            header.control |= (next_nr << 5) | PF_BIT;
        }
        let slot = self.i_queue.slot(index);
        let control = slot.header.control;
        let payload = slot.payload();
        out[0] = slot.header.address;
        out[1] = control;
        out[2..2 + payload.len()].copy_from_slice(payload);
        let len = 2 + payload.len();
        self.peers[peer].next_ns = seq_next(self.peers[peer].next_ns);
        self.peers[peer].sent_nr = next_nr;
        self.peers[peer].last_i_ts = now;
        self.last_marker_ts = now;
        self.peers[peer].last_ka_ts = now;
        logger::emit(&mut self.handler, FrameDirection::Out, &out[..len]);
        (
            len,
            TxToken {
                service_slot: None,
                control,
            },
        )
    }

    /// The framer finished draining a frame. I-frames stay queued until the
    /// peer acknowledges them; service frames are released here. Sending the
    /// final bit in NRM releases the marker and, on a primary, moves the
    /// round-robin to the next registered peer.
    pub(crate) fn frame_sent(&mut self, token: TxToken) {
        if let Some(index) = token.service_slot {
            self.service_queue.free(index);
        }
        if token.control & PF_BIT != 0 && self.mode == LinkMode::Nrm {
            if self.is_primary() {
                self.switch_to_next_peer();
            }
            self.events.remove(Events::HAS_MARKER);
        }
        self.events.remove(Events::TX_SENDING);
    }

    fn switch_to_next_peer(&mut self) -> bool {
        let start = self.next_peer;
        loop {
            self.next_peer += 1;
            if self.next_peer >= self.peers_count {
                self.next_peer = 0;
            }
            if self.peers[self.next_peer].address != UNUSED_ADDRESS {
                break;
            }
            if self.next_peer == start {
                break;
            }
        }
        start != self.next_peer
    }

    //==============================================================================Timeouts

    fn check_connected_timeouts(&mut self, now: u32, peer: usize) {
        let unacked_window_on_wire = self.peers[peer].has_unconfirmed_frames()
            && self.peers[peer].all_frames_are_sent();
        if unacked_window_on_wire
            && now.wrapping_sub(self.peers[peer].last_i_ts) >= self.retry_timeout
        {
            if self.peers[peer].retries > 0 {
                #[cfg(feature = "defmt")]
                defmt::warn!("ack timeout, resending unconfirmed window");
                self.peers[peer].retries -= 1;
                let confirm_ns = self.peers[peer].confirm_ns;
                self.resend_all_unconfirmed_frames(peer, 0, confirm_ns);
            } else {
                #[cfg(feature = "defmt")]
                defmt::error!("remote not responding, flushing I-frames");
                self.switch_to_disconnected(peer);
            }
        } else if now.wrapping_sub(self.peers[peer].last_ka_ts) > self.ka_timeout {
            if !self.peers[peer].ka_confirmed {
                #[cfg(feature = "defmt")]
                defmt::error!("no keep-alive traffic, dropping connection");
                self.switch_to_disconnected(peer);
            } else {
                self.peers[peer].ka_confirmed = false;
                let header = FrameHeader::new(
                    self.peer_address(peer),
                    s_control(SFrameKind::ReceiveReady, self.peers[peer].next_nr),
                );
                self.enqueue_service(SlotTag::Supervisory, header, &[]);
            }
            self.peers[peer].last_ka_ts = now;
        }
    }

    fn check_disconnected_timeouts(&mut self, now: u32, peer: usize) {
        if now.wrapping_sub(self.peers[peer].last_ka_ts) < self.retry_timeout {
            return;
        }
        // Only the primary station opens connections.
        if self.is_primary() {
            let header = FrameHeader::new(self.peer_address(peer) | CR_BIT, self.connect_control());
            self.enqueue_service(SlotTag::Unnumbered, header, &[]);
            self.peers[peer].state = PeerState::Connecting;
            self.peers[peer].last_ka_ts = now;
        }
    }

    //==============================================================================Facade operations

    /// Queue one payload (at most MTU bytes) for `address`. Non-blocking:
    /// a closed window or a full pool reports [`LinkError::Busy`] and the
    /// caller decides how to wait.
    pub fn enqueue_packet(&mut self, address: u8, data: &[u8]) -> Result<(), LinkError> {
        // A secondary always talks to its primary; the payload travels under
        // the secondary's own address field.
        let station = if self.is_secondary() && address == PRIMARY_STATION {
            station_of(self.local_address)
        } else {
            address
        };
        let peer = self
            .address_to_peer(encode_address(station))
            .ok_or(LinkError::UnknownPeer)?;
        if data.len() > MTU {
            return Err(LinkError::DataTooLarge);
        }
        if !self.peers[peer].events.contains(Events::CAN_ACCEPT_I_FRAMES)
            || !self.events.contains(Events::QUEUE_HAS_FREE_SLOTS)
        {
            return Err(LinkError::Busy);
        }
        let Some(index) = self.i_queue.allocate(SlotTag::Information, data) else {
            return Err(LinkError::Busy);
        };
        let address_field = self.peer_address(peer);
        let last_ns = self.peers[peer].last_ns;
        let slot = self.i_queue.slot_mut(index);
        slot.header = FrameHeader::new(address_field, i_control(last_ns, 0));
        self.peers[peer].last_ns = seq_next(last_ns);
        self.events.insert(Events::TX_DATA_AVAILABLE);
        let queue_open = self.i_queue.has_free_slots();
        self.events.set_to(Events::QUEUE_HAS_FREE_SLOTS, queue_open);
        let window_open = self.peers[peer].can_accept_i_frames();
        self.peers[peer]
            .events
            .set_to(Events::CAN_ACCEPT_I_FRAMES, window_open);
        Ok(())
    }

    /// Ask the remote side to close the link. The DISC command is queued;
    /// the state flips once the peer answers with UA.
    pub fn disconnect(&mut self) -> Result<(), LinkError> {
        let header = FrameHeader::new(self.peer_address(0) | CR_BIT, u_control(UFrameKind::Disc));
        if self.enqueue_service(SlotTag::Unnumbered, header, &[]) {
            self.peers[0].state = PeerState::Disconnecting;
            Ok(())
        } else {
            Err(LinkError::Failed)
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.peers[0].state,
            PeerState::Connected | PeerState::Disconnecting
        )
    }

    /// Register a secondary station (NRM primary only). The keep-alive clock
    /// is back-dated so the next TX poll opens the connection immediately.
    pub fn register_peer(&mut self, now: u32, station: u8) -> Result<(), LinkError> {
        if station == PRIMARY_STATION || station > 62 {
            return Err(LinkError::Failed);
        }
        let address = encode_address(station);
        if self.address_to_peer(address).is_some() {
            return Err(LinkError::Failed);
        }
        for peer in 0..self.peers_count {
            if self.peers[peer].address == UNUSED_ADDRESS {
                self.peers[peer].address = address;
                self.peers[peer].last_ka_ts = now.wrapping_sub(self.retry_timeout);
                return Ok(());
            }
        }
        Err(LinkError::Failed)
    }
}
