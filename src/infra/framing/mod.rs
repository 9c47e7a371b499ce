//! Flag/escape codec delimiting frames on a byte stream.
//!
//! Frames are wrapped in `0x7E` flags; `0x7E` and `0x7D` inside the body are
//! escaped as `0x7D, byte ^ 0x20`. A checksum selected by [`CrcMode`] is
//! appended little-endian before the closing flag. Both directions operate
//! incrementally so a driver can move as few bytes at a time as its channel
//! allows.
use crate::error::FramingError;
use crate::infra::crc::CrcMode;

/// Frame boundary marker.
pub const FLAG: u8 = 0x7E;
/// Escape prefix for in-body flag and escape bytes.
pub const ESCAPE: u8 = 0x7D;
/// XOR mask applied to an escaped byte.
pub const ESCAPE_BIT: u8 = 0x20;
/// Idle-line fill byte, ignored between frames.
pub const FILL: u8 = 0xFF;

const fn needs_escape(byte: u8) -> bool {
    byte == FLAG || byte == ESCAPE
}

//==================================================================================Deframer

/// Result of feeding received bytes into the [`Deframer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// All input consumed, no complete frame yet.
    Pending,
    /// A complete frame of the given length is available via [`Deframer::frame`].
    Frame(usize),
    /// A frame terminated but its checksum did not match. Frame dropped.
    BadCrc,
    /// A frame exceeded the codec buffer. Frame dropped.
    Oversize,
}

/// Possible decoder positions between bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Waiting for an opening flag; noise and fill bytes are skipped.
    Hunt,
    /// Accumulating unescaped frame bytes until the closing flag.
    Collect,
}

/// Incremental frame decoder with a fixed internal buffer.
#[derive(Debug)]
pub struct Deframer<const CAP: usize> {
    buf: [u8; CAP],
    len: usize,
    frame_len: usize,
    state: RxState,
    escape: bool,
    overflow: bool,
    crc: CrcMode,
}

impl<const CAP: usize> Deframer<CAP> {
    pub const fn new(crc: CrcMode) -> Self {
        Self {
            buf: [0; CAP],
            len: 0,
            frame_len: 0,
            state: RxState::Hunt,
            escape: false,
            overflow: false,
            crc,
        }
    }

    /// Drop any partial frame and hunt for the next opening flag.
    pub fn reset(&mut self) {
        self.state = RxState::Hunt;
        self.len = 0;
        self.escape = false;
        self.overflow = false;
    }

    /// Process `data` until one frame terminates or the input runs out.
    /// Returns how many bytes were consumed together with the outcome;
    /// callers loop over the remainder to pick up back-to-back frames.
    pub fn consume(&mut self, data: &[u8]) -> (usize, RxOutcome) {
        let mut used = 0;
        for &byte in data {
            used += 1;
            match self.state {
                RxState::Hunt => {
                    if byte == FLAG {
                        self.state = RxState::Collect;
                        self.len = 0;
                        self.escape = false;
                        self.overflow = false;
                    }
                }
                RxState::Collect => {
                    if byte == FLAG {
                        if self.len == 0 && !self.overflow {
                            // Opening flag repeated; keep collecting.
                            continue;
                        }
                        return (used, self.finish());
                    }
                    if byte == ESCAPE {
                        self.escape = true;
                        continue;
                    }
                    let value = if self.escape {
                        self.escape = false;
                        byte ^ ESCAPE_BIT
                    } else {
                        byte
                    };
                    if self.len < CAP {
                        self.buf[self.len] = value;
                        self.len += 1;
                    } else {
                        self.overflow = true;
                    }
                }
            }
        }
        (used, RxOutcome::Pending)
    }

    /// The last complete frame, checksum stripped.
    /// Valid after [`RxOutcome::Frame`] until the next call to `consume`.
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.frame_len]
    }

    fn finish(&mut self) -> RxOutcome {
        let len = self.len;
        let overflowed = self.overflow;
        self.len = 0;
        self.escape = false;
        self.overflow = false;
        self.state = RxState::Hunt;
        if overflowed {
            return RxOutcome::Oversize;
        }
        let crc_len = self.crc.field_size();
        if len < crc_len {
            return RxOutcome::BadCrc;
        }
        if crc_len > 0 {
            let mut received: u32 = 0;
            for i in 0..crc_len {
                received |= (self.buf[len - crc_len + i] as u32) << (8 * i);
            }
            if self.crc.compute(&self.buf[..len - crc_len]) != received {
                return RxOutcome::BadCrc;
            }
        }
        self.frame_len = len - crc_len;
        RxOutcome::Frame(self.frame_len)
    }
}

//==================================================================================Framer

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStage {
    Idle,
    OpenFlag,
    Body,
    CloseFlag,
}

/// Incremental frame encoder. One frame is staged at a time with [`put`] and
/// drained through [`run_tx`] in as many pieces as the channel requires.
///
/// [`put`]: Framer::put
/// [`run_tx`]: Framer::run_tx
#[derive(Debug)]
pub struct Framer<const CAP: usize> {
    buf: [u8; CAP],
    len: usize,
    pos: usize,
    stage: TxStage,
    escape: bool,
    crc: CrcMode,
}

impl<const CAP: usize> Framer<CAP> {
    pub const fn new(crc: CrcMode) -> Self {
        Self {
            buf: [0; CAP],
            len: 0,
            pos: 0,
            stage: TxStage::Idle,
            escape: false,
            crc,
        }
    }

    /// Stage `frame` (header + payload) for transmission, appending the
    /// checksum. Fails with [`FramingError::Busy`] while a previous frame is
    /// still being drained.
    pub fn put(&mut self, frame: &[u8]) -> Result<(), FramingError> {
        if self.stage != TxStage::Idle {
            return Err(FramingError::Busy);
        }
        let crc_len = self.crc.field_size();
        if frame.len() + crc_len > CAP {
            return Err(FramingError::Oversize);
        }
        self.buf[..frame.len()].copy_from_slice(frame);
        let checksum = self.crc.compute(frame);
        for i in 0..crc_len {
            self.buf[frame.len() + i] = (checksum >> (8 * i)) as u8;
        }
        self.len = frame.len() + crc_len;
        self.pos = 0;
        self.escape = false;
        self.stage = TxStage::OpenFlag;
        Ok(())
    }

    /// True while the staged frame has not been fully drained.
    pub fn is_sending(&self) -> bool {
        self.stage != TxStage::Idle
    }

    /// Abort the in-flight frame, if any.
    pub fn reset(&mut self) {
        self.stage = TxStage::Idle;
        self.escape = false;
    }

    /// Move as many encoded bytes as fit into `out`. Returns the number of
    /// bytes produced; zero once the frame (including its closing flag) has
    /// been emitted.
    pub fn run_tx(&mut self, out: &mut [u8]) -> usize {
        let mut produced = 0;
        while produced < out.len() {
            match self.stage {
                TxStage::Idle => break,
                TxStage::OpenFlag => {
                    out[produced] = FLAG;
                    produced += 1;
                    self.stage = TxStage::Body;
                }
                TxStage::Body => {
                    if self.pos == self.len {
                        self.stage = TxStage::CloseFlag;
                        continue;
                    }
                    let byte = self.buf[self.pos];
                    if needs_escape(byte) {
                        if self.escape {
                            out[produced] = byte ^ ESCAPE_BIT;
                            self.escape = false;
                            self.pos += 1;
                        } else {
                            out[produced] = ESCAPE;
                            self.escape = true;
                        }
                    } else {
                        out[produced] = byte;
                        self.pos += 1;
                    }
                    produced += 1;
                }
                TxStage::CloseFlag => {
                    out[produced] = FLAG;
                    produced += 1;
                    self.stage = TxStage::Idle;
                }
            }
        }
        produced
    }
}
