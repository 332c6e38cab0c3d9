//! Receive queue and tick-based timed reads.
//!
//! Inbound bytes are delivered asynchronously by the transport (a reader
//! thread on native platforms) while the protocol driver consumes them with
//! size-bounded, deadline-bounded reads. The queue is the explicit meeting
//! point: the transport holds a cloneable [`RxPusher`], the driver holds the
//! only [`RxQueue`] consumer handle.
//!
//! All protocol deadlines are expressed in ticks against [`RxQueue::await_bytes`].
//! One tick is one poll of the queue; [`SystemTicker`] makes a tick one
//! millisecond, so the default budget of 1000 ticks is roughly one second
//! per exchange.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};

/// Default deadline for a single command/response exchange.
pub const DEFAULT_TIMEOUT_TICKS: u32 = 1000;

/// Extended deadline for the chip-erase exchange, which is a slow
/// whole-chip operation on this bootloader.
pub const ERASE_TIMEOUT_TICKS: u32 = 6000;

/// Clock abstraction for the poll loop.
///
/// Production code sleeps one millisecond per tick; tests inject a no-op
/// ticker so deadline expiry is immediate.
pub trait Ticker {
    /// Block for one logical tick.
    fn tick(&self);
}

/// Real-time ticker: one tick is one millisecond.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
    fn tick(&self) {
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Producer handle for the receive queue.
///
/// Held by the transport; every inbound chunk is appended in arrival order.
#[derive(Debug, Clone)]
pub struct RxPusher {
    inner: Arc<Mutex<VecDeque<u8>>>,
}

impl RxPusher {
    /// Append a chunk of inbound bytes to the tail of the queue.
    pub fn push(&self, bytes: &[u8]) {
        #[allow(clippy::unwrap_used)] // Mutex poisoning would mean a panicked pusher already
        let mut queue = self.inner.lock().unwrap();
        queue.extend(bytes.iter().copied());
    }
}

/// Consumer handle for the receive queue.
///
/// Created empty when a session opens and dropped when it closes. Bytes are
/// consumed strictly in order; a timed read either removes exactly the
/// requested count or leaves the queue untouched.
#[derive(Debug)]
pub struct RxQueue {
    inner: Arc<Mutex<VecDeque<u8>>>,
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RxQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Get a producer handle for the transport side.
    pub fn pusher(&self) -> RxPusher {
        RxPusher {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of pending bytes.
    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let queue = self.inner.lock().unwrap();
        queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard all pending bytes.
    ///
    /// Used before a bulk write phase so stale response bytes cannot be
    /// mistaken for write acknowledgments.
    pub fn clear(&self) {
        #[allow(clippy::unwrap_used)]
        let mut queue = self.inner.lock().unwrap();
        if !queue.is_empty() {
            trace!("Discarding {} stale rx bytes", queue.len());
            queue.clear();
        }
    }

    /// Wait until `size` bytes are pending and remove them from the head.
    ///
    /// Polls once per tick. If the bytes have not accumulated within
    /// `timeout_ticks` ticks the call fails with [`Error::Timeout`] and no
    /// bytes are consumed.
    pub fn await_bytes<T: Ticker>(
        &self,
        size: usize,
        timeout_ticks: u32,
        ticker: &T,
    ) -> Result<Vec<u8>> {
        let mut elapsed = 0;
        while self.len() < size && elapsed < timeout_ticks {
            ticker.tick();
            elapsed += 1;
        }

        #[allow(clippy::unwrap_used)]
        let mut queue = self.inner.lock().unwrap();
        if queue.len() < size {
            return Err(Error::Timeout(format!(
                "waited {timeout_ticks} ticks for {size} bytes, {} pending",
                queue.len()
            )));
        }

        let bytes: Vec<u8> = queue.drain(..size).collect();
        trace!("rx {size} bytes: {bytes:02x?}");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ticker that returns immediately, so timeouts expire without real delay.
    struct NoWait;

    impl Ticker for NoWait {
        fn tick(&self) {}
    }

    #[test]
    fn test_await_consumes_in_order() {
        let queue = RxQueue::new();
        let pusher = queue.pusher();
        pusher.push(&[1, 2, 3]);
        pusher.push(&[4, 5]);

        let head = queue.await_bytes(2, 10, &NoWait).unwrap();
        assert_eq!(head, vec![1, 2]);
        let rest = queue.await_bytes(3, 10, &NoWait).unwrap();
        assert_eq!(rest, vec![3, 4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_timeout_leaves_partial_bytes_pending() {
        let queue = RxQueue::new();
        queue.pusher().push(&[0xAA, 0xBB]);

        let err = queue.await_bytes(5, 3, &NoWait).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // The two buffered bytes must still be readable afterwards.
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.await_bytes(2, 1, &NoWait).unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_zero_wait_when_bytes_already_pending() {
        struct Panicking;
        impl Ticker for Panicking {
            fn tick(&self) {
                panic!("must not poll when bytes are already pending");
            }
        }

        let queue = RxQueue::new();
        queue.pusher().push(&[7, 8, 9]);
        assert_eq!(queue.await_bytes(3, 1000, &Panicking).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn test_clear_discards_stale_bytes() {
        let queue = RxQueue::new();
        queue.pusher().push(&[1, 2, 3]);
        queue.clear();
        assert!(queue.is_empty());
    }
}
