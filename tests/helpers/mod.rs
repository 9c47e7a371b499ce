/// Test doubles to simulate the serial channel and timer during integration
/// tests, plus a recording handler capturing everything the engine reports.
use linkfd::protocol::logger::{FrameDirection, FrameLog};
use linkfd::protocol::traits::link_handler::LinkHandler;
use linkfd::protocol::traits::link_timer::LinkTimer;
use linkfd::protocol::traits::serial_port::SerialPort;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Duration};

#[derive(Default)]
#[allow(dead_code)]
/// Handler recording deliveries, confirmations and connection events.
pub struct Recorder {
    pub received: Vec<(u8, Vec<u8>)>,
    pub sent: Vec<(u8, Vec<u8>)>,
    pub events: Vec<(u8, bool)>,
    pub frames_in: usize,
    pub frames_out: usize,
}

impl LinkHandler for Recorder {
    fn on_received(&mut self, address: u8, payload: &[u8]) {
        self.received.push((address, payload.to_vec()));
    }

    fn on_sent(&mut self, address: u8, payload: &[u8]) {
        self.sent.push((address, payload.to_vec()));
    }

    fn on_connect(&mut self, address: u8, connected: bool) {
        self.events.push((address, connected));
    }

    fn on_frame(&mut self, frame: &FrameLog<'_>) {
        match frame.direction {
            FrameDirection::In => self.frames_in += 1,
            FrameDirection::Out => self.frames_out += 1,
        }
    }
}

#[derive(Clone)]
#[allow(dead_code)]
/// In-memory serial channel reproducing the `SerialPort` trait behavior.
pub struct MockSerialPort {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    carry: Arc<Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl MockSerialPort {
    /// Construct a pair of interconnected ports (station ↔ station).
    pub fn create_pair() -> (Self, Self) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();

        let left = Self {
            tx: left_tx,
            rx: Arc::new(Mutex::new(left_rx)),
            carry: Arc::new(Mutex::new(Vec::new())),
        };

        let right = Self {
            tx: right_tx,
            rx: Arc::new(Mutex::new(right_rx)),
            carry: Arc::new(Mutex::new(Vec::new())),
        };

        (left, right)
    }
}

impl SerialPort for MockSerialPort {
    type Error = ();

    async fn send<'a>(&'a mut self, data: &'a [u8]) -> Result<(), Self::Error> {
        self.tx.send(data.to_vec()).map_err(|_| ())
    }

    async fn recv<'a>(&'a mut self, buf: &'a mut [u8]) -> Result<usize, Self::Error> {
        let mut carry = self.carry.lock().await;
        if carry.is_empty() {
            let mut rx = self.rx.lock().await;
            *carry = rx.recv().await.ok_or(())?;
        }
        let moved = carry.len().min(buf.len());
        buf[..moved].copy_from_slice(&carry[..moved]);
        carry.drain(..moved);
        Ok(moved)
    }
}

#[allow(dead_code)]
/// Timer based on `tokio::time::sleep` with a real monotonic clock.
pub struct MockTimer {
    start: Instant,
}

#[allow(dead_code)]
impl MockTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl LinkTimer for MockTimer {
    async fn delay_ms<'a>(&'a mut self, millis: u32) {
        sleep(Duration::from_millis(millis as u64)).await;
    }

    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

#[allow(dead_code)]
/// Split a flag-framed byte stream into individual frames, flags restored.
/// Only valid for streams without escaped bytes.
pub fn split_frames(stream: &[u8]) -> Vec<Vec<u8>> {
    stream
        .split(|&byte| byte == 0x7E)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let mut frame = vec![0x7E];
            frame.extend_from_slice(segment);
            frame.push(0x7E);
            frame
        })
        .collect()
}
