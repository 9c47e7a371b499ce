//! Byte-level infrastructure shared by the protocol layers: frame checksums
//! and the flag/escape codec that delimits frames on the wire.
pub mod crc;
pub mod framing;
