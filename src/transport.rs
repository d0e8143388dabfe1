use core::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Data phase of a chunk transfer
#[derive(Debug)]
pub enum Direction<'a> {
    /// Host to device
    Download(&'a [u8]),
    /// Device to host, fills the buffer
    Upload(&'a mut [u8]),
}

/// Device I/O used by the command layer.
///
/// A transport is owned by exactly one [`crate::Programmer`] for the duration of
/// a call, so frames always reach the device in order.
pub trait Transport {
    type Error: Debug;

    /// Send a command frame, `offset` is the DFU block number
    fn send_command(&mut self, offset: u32, frame: &[u8]) -> Result<(), Self::Error>;

    /// Move one data chunk, returning the number of bytes transferred
    fn transfer_chunk(&mut self, offset: u32, direction: Direction) -> Result<usize, Self::Error>;

    /// Largest data chunk accepted per transfer
    fn max_transfer_size(&self) -> u32;

    /// Whether an error means the device has left the bus
    fn is_disconnect(&self, _err: &Self::Error) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn send_command(&mut self, offset: u32, frame: &[u8]) -> Result<(), Self::Error> {
        (**self).send_command(offset, frame)
    }

    fn transfer_chunk(&mut self, offset: u32, direction: Direction) -> Result<usize, Self::Error> {
        (**self).transfer_chunk(offset, direction)
    }

    fn max_transfer_size(&self) -> u32 {
        (**self).max_transfer_size()
    }

    fn is_disconnect(&self, err: &Self::Error) -> bool {
        (**self).is_disconnect(err)
    }
}

/// Cooperative cancellation token, checked between chunks.
///
/// Clones share state, so a token can be handed to another thread and
/// cancelled from there.
#[derive(Clone, Debug, Default)]
pub struct Cancellable(Arc<AtomicBool>);

impl Cancellable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared() {
        let c = Cancellable::new();
        let c2 = c.clone();
        assert!(!c.is_cancelled());

        std::thread::spawn(move || c2.cancel()).join().unwrap();
        assert!(c.is_cancelled());
    }
}
