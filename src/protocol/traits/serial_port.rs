//! Minimal abstraction for an asynchronous byte channel. Allows the library
//! to plug into various implementations (UART driver, TCP socket, in-memory
//! test pair, etc.).
use futures_util::Future;

/// Contract to move raw bytes in both directions asynchronously.
pub trait SerialPort {
    type Error: core::fmt::Debug;
    /// Write the whole buffer to the channel. Asynchronous to accommodate
    /// non-blocking drivers.
    fn send<'a>(
        &'a mut self,
        data: &'a [u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + 'a;
    /// Read whatever is available into `buf`, waiting for at least one byte.
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = Result<usize, Self::Error>> + 'a;
}
