//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (configuration, payload
//! submission, byte-level framing, and related issues).
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors reported by the link engine and its byte pump.
pub enum LinkError {
    /// The operation did not complete within the allowed time.
    #[error("Timed out")]
    Timeout,
    /// Configuration or input data violates protocol constraints.
    #[error("Invalid data")]
    InvalidData,
    /// The destination address maps to no known peer station.
    #[error("Unknown peer")]
    UnknownPeer,
    /// Payload exceeds the negotiated MTU.
    #[error("Data is larger than MTU")]
    DataTooLarge,
    /// The configured storage cannot hold the requested layout.
    #[error("Out of memory")]
    OutOfMemory,
    /// A received frame failed its checksum.
    #[error("Wrong CRC")]
    WrongCrc,
    /// The engine cannot accept the request right now (window or queue full).
    #[error("Busy")]
    Busy,
    /// Generic failure (service queue full, disconnected state, etc.).
    #[error("Operation failed")]
    Failed,
}

//================================================================================FRAMING

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Failures at the flag/escape framing level.
pub enum FramingError {
    /// A frame is already being encoded; finish pumping it first.
    #[error("Transmission already in progress")]
    Busy,
    /// The frame does not fit the codec buffer.
    #[error("Frame is too large for the codec buffer")]
    Oversize,
    /// Checksum of the received frame does not match its contents.
    #[error("Wrong CRC")]
    WrongCrc,
}

impl From<FramingError> for LinkError {
    fn from(err: FramingError) -> Self {
        match err {
            FramingError::Busy => LinkError::Busy,
            FramingError::Oversize => LinkError::DataTooLarge,
            FramingError::WrongCrc => LinkError::WrongCrc,
        }
    }
}
