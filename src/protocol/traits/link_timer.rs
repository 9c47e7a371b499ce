//! Asynchronous timer abstraction providing the timing primitives required
//! by retry, keep-alive, and marker-reclaim logic.

/// Timer trait abstraction; must remain thread-safe when applicable.
pub trait LinkTimer {
    /// Asynchronously wait for `millis` milliseconds.
    fn delay_ms<'a>(
        &'a mut self,
        millis: u32,
    ) -> impl core::future::Future<Output = ()> + 'a;
    /// Monotonic millisecond clock stamped onto frames and timeouts.
    /// Wrapping is fine; the engine only works with differences.
    fn now_ms(&self) -> u32;
}
