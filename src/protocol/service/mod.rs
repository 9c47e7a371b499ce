//! Channel-based service layer on top of [`SerialLink`].
//!
//! It keeps the link state machine alive and optionally offers:
//!
//! * a transmission handle ([`LinkHandle`]) to queue payloads from producer
//!   tasks;
//! * a delivery receiver ([`LinkInbox`]) to pull in-order payloads;
//! * a notification receiver ([`LinkEvents`]) for connection state changes.
//!
//! Firmware decides which features it needs by providing pre-allocated
//! [`embassy_sync::channel::Channel`] instances. No allocation is performed
//! by the library and there is no dependency on a particular BSP. Producer
//! backpressure is the command channel itself: it fills up exactly when the
//! transmit window or the frame pool is exhausted.
use core::fmt::Debug;

use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex,
    channel::{Channel, Receiver, Sender},
};
use futures_util::{future::select, future::Either, pin_mut};

use crate::error::LinkError;
use crate::protocol::frame::PRIMARY_STATION;
use crate::protocol::link::{LinkConfig, SerialLink};
use crate::protocol::traits::{
    link_handler::LinkHandler, link_timer::LinkTimer, serial_port::SerialPort,
};

/// Depth of the connection-notification channel.
const NOTIFY_DEPTH: usize = 8;
/// Runner poll period while the channel is silent; keeps retransmission and
/// keep-alive timers moving.
const IDLE_POLL_MS: u32 = 5;

/// One in-order payload delivered by the remote station.
#[derive(Debug, Clone)]
pub struct Delivery<const MTU: usize> {
    pub address: u8,
    pub len: usize,
    pub payload: [u8; MTU],
}

impl<const MTU: usize> Delivery<MTU> {
    pub fn bytes(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

/// Connection status change observed on the link.
#[derive(Debug, Clone, Copy)]
pub struct LinkNotification {
    pub address: u8,
    pub connected: bool,
}

/// Commands queued by producer tasks.
#[derive(Debug, Clone)]
pub enum LinkCommand<const MTU: usize> {
    Send {
        address: u8,
        len: usize,
        payload: [u8; MTU],
    },
    Disconnect,
}

/// Producer-side command channel.
pub type CommandChannel<const MTU: usize, const CAP: usize> =
    Channel<CriticalSectionRawMutex, LinkCommand<MTU>, CAP>;
/// Application-side delivery channel.
pub type DeliveryChannel<const MTU: usize, const CAP: usize> =
    Channel<CriticalSectionRawMutex, Delivery<MTU>, CAP>;
/// Connection notification channel.
pub type NotificationChannel = Channel<CriticalSectionRawMutex, LinkNotification, NOTIFY_DEPTH>;

//==================================================================================Handler

/// Engine handler forwarding callbacks into the service channels.
pub struct ChannelHandler<'a, const MTU: usize, const RX_CAP: usize> {
    deliveries: Option<&'a DeliveryChannel<MTU, RX_CAP>>,
    notifications: Option<&'a NotificationChannel>,
}

impl<const MTU: usize, const RX_CAP: usize> LinkHandler for ChannelHandler<'_, MTU, RX_CAP> {
    fn on_received(&mut self, address: u8, payload: &[u8]) {
        if let Some(channel) = self.deliveries {
            let mut delivery = Delivery {
                address,
                len: payload.len(),
                payload: [0; MTU],
            };
            delivery.payload[..payload.len()].copy_from_slice(payload);
            // The window bounds in-flight frames, so size RX_CAP to at least
            // the window or a stalled consumer loses deliveries.
            let _ = channel.try_send(delivery);
        }
    }

    fn on_sent(&mut self, _address: u8, _payload: &[u8]) {}

    fn on_connect(&mut self, address: u8, connected: bool) {
        if let Some(channel) = self.notifications {
            let _ = channel.try_send(LinkNotification { address, connected });
        }
    }
}

//==================================================================================Service

/// Service assembling the supervisor components around one serial port.
pub struct LinkService<
    'a,
    P: SerialPort,
    T: LinkTimer,
    const PEERS: usize,
    const MTU: usize,
    const WINDOW: usize,
    const BUF: usize,
    const CMD_CAP: usize,
    const RX_CAP: usize,
> where
    P::Error: Debug,
{
    link: SerialLink<ChannelHandler<'a, MTU, RX_CAP>, PEERS, MTU, WINDOW, BUF>,
    port: P,
    timer: T,
    commands: Option<&'a CommandChannel<MTU, CMD_CAP>>,
    deliveries: Option<&'a DeliveryChannel<MTU, RX_CAP>>,
    notifications: Option<&'a NotificationChannel>,
    send_timeout: u32,
}

impl<
        'a,
        P: SerialPort,
        T: LinkTimer,
        const PEERS: usize,
        const MTU: usize,
        const WINDOW: usize,
        const BUF: usize,
        const CMD_CAP: usize,
        const RX_CAP: usize,
    > LinkService<'a, P, T, PEERS, MTU, WINDOW, BUF, CMD_CAP, RX_CAP>
where
    P::Error: Debug,
{
    pub fn new(
        config: &LinkConfig,
        port: P,
        timer: T,
        commands: Option<&'a CommandChannel<MTU, CMD_CAP>>,
        deliveries: Option<&'a DeliveryChannel<MTU, RX_CAP>>,
        notifications: Option<&'a NotificationChannel>,
    ) -> Result<Self, LinkError> {
        let handler = ChannelHandler {
            deliveries,
            notifications,
        };
        Ok(Self {
            link: SerialLink::new(config, handler)?,
            port,
            timer,
            commands,
            deliveries,
            notifications,
            send_timeout: config.send_timeout,
        })
    }

    /// Register a secondary station before driving (NRM primary only).
    pub fn register_peer(&mut self, station: u8) -> Result<(), LinkError> {
        let now = self.timer.now_ms();
        self.link.register_peer(now, station)
    }

    /// Split into handle/inbox/events/runner components.
    pub fn into_parts(
        self,
    ) -> LinkServiceParts<'a, P, T, PEERS, MTU, WINDOW, BUF, CMD_CAP, RX_CAP> {
        let handle = self.commands.map(|channel| LinkHandle {
            sender: channel.sender(),
            send_timeout: self.send_timeout,
        });
        let inbox = self.deliveries.map(|channel| LinkInbox {
            receiver: channel.receiver(),
        });
        let events = self.notifications.map(|channel| LinkEvents {
            receiver: channel.receiver(),
        });
        LinkServiceParts {
            handle,
            inbox,
            events,
            runner: LinkRunner {
                link: self.link,
                port: self.port,
                timer: self.timer,
                commands: self.commands,
                pending: None,
            },
        }
    }
}

/// Bundle returned by [`LinkService::into_parts`].
pub struct LinkServiceParts<
    'a,
    P: SerialPort,
    T: LinkTimer,
    const PEERS: usize,
    const MTU: usize,
    const WINDOW: usize,
    const BUF: usize,
    const CMD_CAP: usize,
    const RX_CAP: usize,
> where
    P::Error: Debug,
{
    pub handle: Option<LinkHandle<'a, MTU, CMD_CAP>>,
    pub inbox: Option<LinkInbox<'a, MTU, RX_CAP>>,
    pub events: Option<LinkEvents<'a>>,
    pub runner: LinkRunner<'a, P, T, PEERS, MTU, WINDOW, BUF, CMD_CAP, RX_CAP>,
}

//==================================================================================Runner

/// Runner that drives the link over the serial port.
pub struct LinkRunner<
    'a,
    P: SerialPort,
    T: LinkTimer,
    const PEERS: usize,
    const MTU: usize,
    const WINDOW: usize,
    const BUF: usize,
    const CMD_CAP: usize,
    const RX_CAP: usize,
> where
    P::Error: Debug,
{
    link: SerialLink<ChannelHandler<'a, MTU, RX_CAP>, PEERS, MTU, WINDOW, BUF>,
    port: P,
    timer: T,
    commands: Option<&'a CommandChannel<MTU, CMD_CAP>>,
    pending: Option<LinkCommand<MTU>>,
}

impl<
        P: SerialPort,
        T: LinkTimer,
        const PEERS: usize,
        const MTU: usize,
        const WINDOW: usize,
        const BUF: usize,
        const CMD_CAP: usize,
        const RX_CAP: usize,
    > LinkRunner<'_, P, T, PEERS, MTU, WINDOW, BUF, CMD_CAP, RX_CAP>
where
    P::Error: Debug,
{
    /// Drive RX, TX, timers and producer commands until the port fails.
    pub async fn drive(mut self) -> Result<(), P::Error> {
        let mut rx_staging = [0u8; 32];
        let mut tx_staging = [0u8; 32];
        loop {
            // Apply a deferred command before fetching new ones; a command
            // stays deferred while the window is closed.
            if let Some(command) = self.pending.take() {
                self.pending = self.apply_command(command);
            }
            if self.pending.is_none() {
                if let Some(commands) = self.commands {
                    while let Ok(command) = commands.try_receive() {
                        self.pending = self.apply_command(command);
                        if self.pending.is_some() {
                            break;
                        }
                    }
                }
            }

            // Flush everything the scheduler has to say.
            loop {
                let now = self.timer.now_ms();
                match self.link.get_tx_data(now, &mut tx_staging) {
                    Ok(0) => break,
                    Ok(len) => self.port.send(&tx_staging[..len]).await?,
                    // No registered peer yet; nothing to transmit.
                    Err(_) => break,
                }
            }

            // Sleep until bytes arrive or the next timer poll is due.
            let received = {
                let recv_future = self.port.recv(&mut rx_staging);
                let delay_future = self.timer.delay_ms(IDLE_POLL_MS);
                pin_mut!(recv_future);
                pin_mut!(delay_future);
                match select(recv_future, delay_future).await {
                    Either::Left((result, _)) => Some(result),
                    Either::Right(((), _)) => None,
                }
            };
            if let Some(result) = received {
                let len = result?;
                let now = self.timer.now_ms();
                self.link.on_rx_data(now, &rx_staging[..len]);
            }
        }
    }

    /// Try to hand one command to the link; give it back when the link
    /// cannot take it yet.
    fn apply_command(&mut self, command: LinkCommand<MTU>) -> Option<LinkCommand<MTU>> {
        match command {
            LinkCommand::Send {
                address,
                len,
                payload,
            } => match self.link.send_packet_to(address, &payload[..len]) {
                Ok(()) => None,
                Err(LinkError::Busy) => Some(LinkCommand::Send {
                    address,
                    len,
                    payload,
                }),
                // Unknown peer or oversize payload: nothing a retry can fix.
                Err(_) => None,
            },
            LinkCommand::Disconnect => {
                let _ = self.link.disconnect();
                None
            }
        }
    }
}

//==================================================================================Handle

/// Transmission handle held by producer tasks.
pub struct LinkHandle<'a, const MTU: usize, const CMD_CAP: usize> {
    sender: Sender<'a, CriticalSectionRawMutex, LinkCommand<MTU>, CMD_CAP>,
    send_timeout: u32,
}

impl<const MTU: usize, const CMD_CAP: usize> LinkHandle<'_, MTU, CMD_CAP> {
    /// Fragment `data` into MTU-sized packets for `address`. Each fragment
    /// must enter the command queue within `timeout_ms`.
    pub async fn send_to<T: LinkTimer>(
        &self,
        timer: &mut T,
        address: u8,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<(), LinkError> {
        for chunk in data.chunks(MTU) {
            let mut payload = [0u8; MTU];
            payload[..chunk.len()].copy_from_slice(chunk);
            let command = LinkCommand::Send {
                address,
                len: chunk.len(),
                payload,
            };
            let send_future = self.sender.send(command);
            let delay_future = timer.delay_ms(timeout_ms);
            pin_mut!(send_future);
            pin_mut!(delay_future);
            match select(send_future, delay_future).await {
                Either::Left(((), _)) => {}
                Either::Right(((), _)) => return Err(LinkError::Timeout),
            }
        }
        Ok(())
    }

    /// Send to the primary station with the configured default timeout.
    pub async fn send<T: LinkTimer>(&self, timer: &mut T, data: &[u8]) -> Result<(), LinkError> {
        let timeout = self.send_timeout;
        self.send_to(timer, PRIMARY_STATION, data, timeout).await
    }

    /// Non-blocking submission of a single packet (at most MTU bytes).
    pub fn try_send_to(&self, address: u8, data: &[u8]) -> Result<(), LinkError> {
        if data.len() > MTU {
            return Err(LinkError::DataTooLarge);
        }
        let mut payload = [0u8; MTU];
        payload[..data.len()].copy_from_slice(data);
        let command = LinkCommand::Send {
            address,
            len: data.len(),
            payload,
        };
        self.sender.try_send(command).map_err(|_| LinkError::Busy)
    }

    /// Queue an orderly disconnect of the link.
    pub async fn disconnect(&self) {
        self.sender.send(LinkCommand::Disconnect).await;
    }
}

//==================================================================================Receivers

/// Receiver returning in-order payloads delivered by the peer.
pub struct LinkInbox<'a, const MTU: usize, const RX_CAP: usize> {
    receiver: Receiver<'a, CriticalSectionRawMutex, Delivery<MTU>, RX_CAP>,
}

impl<const MTU: usize, const RX_CAP: usize> LinkInbox<'_, MTU, RX_CAP> {
    pub async fn recv(&mut self) -> Delivery<MTU> {
        self.receiver.receive().await
    }

    pub fn try_recv(&mut self) -> Option<Delivery<MTU>> {
        self.receiver.try_receive().ok()
    }
}

/// Receiver for connection state notifications.
pub struct LinkEvents<'a> {
    receiver: Receiver<'a, CriticalSectionRawMutex, LinkNotification, NOTIFY_DEPTH>,
}

impl LinkEvents<'_> {
    pub async fn recv(&mut self) -> LinkNotification {
        self.receiver.receive().await
    }
}
