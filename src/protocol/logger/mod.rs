//! Structured frame logging: decodes the control byte of every frame moved
//! by the engine into a compact record handed to the application handler.
use crate::protocol::frame::{FrameHeader, FrameKind, PF_BIT, S_TYPE_MASK, U_TYPE_MASK};
use crate::protocol::traits::link_handler::LinkHandler;

/// Whether a logged frame was received or transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    In,
    Out,
}

/// Decoded frame subtype for logging purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Data,
    ReceiveReady,
    Reject,
    Ua,
    Frmr,
    Rset,
    Sabm,
    Snrm,
    Disc,
    Unknown,
}

impl FrameTag {
    pub const fn as_str(self) -> &'static str {
        match self {
            FrameTag::Data => "DATA",
            FrameTag::ReceiveReady => "RR",
            FrameTag::Reject => "REJ",
            FrameTag::Ua => "UA",
            FrameTag::Frmr => "FRMR",
            FrameTag::Rset => "RSET",
            FrameTag::Sabm => "SABM",
            FrameTag::Snrm => "SNRM",
            FrameTag::Disc => "DISC",
            FrameTag::Unknown => "UNK",
        }
    }
}

/// One logged frame: classification plus the raw bytes (header included).
#[derive(Debug, Clone, Copy)]
pub struct FrameLog<'a> {
    pub direction: FrameDirection,
    pub kind: FrameKind,
    pub tag: FrameTag,
    pub ns: u8,
    pub nr: u8,
    pub poll: bool,
    pub bytes: &'a [u8],
}

/// Classify a control byte into its loggable subtype.
pub const fn frame_tag(control: u8) -> FrameTag {
    match FrameKind::of(control) {
        FrameKind::Information => FrameTag::Data,
        FrameKind::Supervisory => match control & S_TYPE_MASK {
            0x00 => FrameTag::ReceiveReady,
            0x08 => FrameTag::Reject,
            _ => FrameTag::Unknown,
        },
        FrameKind::Unnumbered => match control & U_TYPE_MASK {
            0x60 => FrameTag::Ua,
            0x84 => FrameTag::Frmr,
            0x8C => FrameTag::Rset,
            0x2C => FrameTag::Sabm,
            0x80 => FrameTag::Snrm,
            0x40 => FrameTag::Disc,
            _ => FrameTag::Unknown,
        },
    }
}

/// Build a log record from raw frame bytes and hand it to the handler.
pub(crate) fn emit<H: LinkHandler>(handler: &mut H, direction: FrameDirection, bytes: &[u8]) {
    if bytes.len() < 2 {
        return;
    }
    let header = FrameHeader::new(bytes[0], bytes[1]);
    let record = FrameLog {
        direction,
        kind: header.kind(),
        tag: frame_tag(header.control),
        ns: header.ns(),
        nr: header.nr(),
        poll: header.control & PF_BIT != 0,
        bytes,
    };
    #[cfg(feature = "defmt")]
    defmt::trace!(
        "frame in={} tag={} ns={} nr={} addr={}",
        record.direction == FrameDirection::In,
        record.tag.as_str(),
        record.ns,
        record.nr,
        header.address,
    );
    handler.on_frame(&record);
}
