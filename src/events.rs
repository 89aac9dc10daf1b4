//! Bounded event queues and timed waits.
//!
//! Every hand-off between threads in this crate goes through an
//! [`EventQueue`]: the update engine's event queue, the job worker's
//! request queue, the lifecycle command queue and the simulated agent's
//! command queue. Producers never block (`send` fails when full); the
//! single consumer blocks with a bounded timeout.
//!
//! ```text
//! ┌──────────────────┐            ┌──────────────┐            ┌──────────────┐
//! │ transport thread │──send()──▶│              │            │              │
//! │ job worker       │──send()──▶│  EventQueue  │──receive──▶│  consumer    │
//! │ lifecycle loop   │──send()──▶│  (bounded)   │  _timeout  │  thread      │
//! └──────────────────┘            └──────────────┘            └──────────────┘
//! ```
//!
//! Queues are owned by the object that consumes them and shared through
//! `Arc`; there are no static queues.

use core::future::Future;
use core::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};

/// Block the calling thread on `fut` for at most `timeout`.
///
/// Returns `None` if the timer fires first. The future is dropped on
/// timeout.
pub fn wait_timeout<F: Future>(fut: F, timeout: Duration) -> Option<F::Output> {
    futures_lite::future::block_on(futures_lite::future::or(
        async { Some(fut.await) },
        async {
            async_io_mini::Timer::after(timeout).await;
            None
        },
    ))
}

/// Multi-producer, single-consumer bounded queue.
pub struct EventQueue<T, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> EventQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue without blocking. Hands the event back when the queue is full.
    pub fn send(&self, event: T) -> Result<(), T> {
        self.channel.try_send(event).map_err(|TrySendError::Full(e)| e)
    }

    /// Enqueue, waiting up to `timeout` for room. The event is dropped on
    /// timeout.
    pub fn send_timeout(&self, event: T, timeout: Duration) -> bool {
        match self.channel.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) if timeout.is_zero() => false,
            Err(TrySendError::Full(event)) => {
                wait_timeout(self.channel.send(event), timeout).is_some()
            }
        }
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Dequeue, blocking the calling thread for at most `timeout`.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        if let Some(event) = self.try_receive() {
            return Some(event);
        }
        wait_timeout(self.channel.receive(), timeout)
    }

    /// Async dequeue for consumers running on an executor.
    pub async fn receive(&self) -> T {
        self.channel.receive().await
    }

    /// Remove every queued event, handing each one to `f`.
    pub fn drain(&self, mut f: impl FnMut(T)) {
        while let Some(event) = self.try_receive() {
            f(event);
        }
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for EventQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
