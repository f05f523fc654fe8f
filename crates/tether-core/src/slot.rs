//! One-shot response slot.
//!
//! A [`ResponseSlot`] hands exactly one value from the callback path to the
//! parked requester. It is a rendezvous, not a queue:
//!
//! ```text
//! Open ──send──► Fulfilled ──receive──► Consumed
//!   │                │                     │
//!   └──────close─────┴────────close────────┴──► Closed
//! ```
//!
//! Handles are cheap clones over one shared core; the registry keeps one,
//! the dispatcher keeps another. `receive` is a future so a requester on the
//! designated context yields instead of blocking it; threads that are not
//! running an executor can use [`ResponseSlot::receive_blocking`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::SlotError;

/// Lifecycle state of a [`ResponseSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Created, no value yet.
    Open,
    /// Value sent, not yet received.
    Fulfilled,
    /// Value handed to the receiver.
    Consumed,
    /// Abandoned; any buffered value was discarded.
    Closed,
}

impl SlotState {
    /// Whether the slot can still produce a value for its receiver.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Open | Self::Fulfilled)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Fulfilled => f.write_str("fulfilled"),
            Self::Consumed => f.write_str("consumed"),
            Self::Closed => f.write_str("closed"),
        }
    }
}

struct Core<T> {
    state: SlotState,
    value: Option<T>,
    waker: Option<Waker>,
}

/// Single-producer/single-consumer handoff of one `T`.
pub struct ResponseSlot<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Clone for ResponseSlot<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Default for ResponseSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ResponseSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("state", &self.state())
            .finish()
    }
}

impl<T> ResponseSlot<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(Mutex::new(Core {
                state: SlotState::Open,
                value: None,
                waker: None,
            })),
        }
    }

    #[must_use]
    pub fn state(&self) -> SlotState {
        self.core.lock().state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == SlotState::Closed
    }

    /// True if both handles share one core.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Deliver the value. Valid exactly once, and only while `Open`.
    pub fn send(&self, value: T) -> Result<(), SlotError> {
        let waker = {
            let mut core = self.core.lock();
            if core.state != SlotState::Open {
                return Err(SlotError::InvalidState { state: core.state });
            }
            core.value = Some(value);
            core.state = SlotState::Fulfilled;
            core.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Abandon the slot. Wakes a parked receiver with [`SlotError::Closed`].
    /// Idempotent.
    pub fn close(&self) {
        let waker = {
            let mut core = self.core.lock();
            core.state = SlotState::Closed;
            core.value = None;
            core.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Wait for the value.
    ///
    /// Resolves with the sent value, with [`SlotError::Closed`] if the slot
    /// is closed first (before or during the wait), or with
    /// [`SlotError::InvalidState`] if the value was already consumed.
    pub fn receive(&self) -> Receive<T> {
        Receive {
            core: Arc::clone(&self.core),
        }
    }

    /// Block the calling thread until [`ResponseSlot::receive`] resolves.
    ///
    /// Never call this on the designated context: the send that would wake
    /// it is queued there.
    pub fn receive_blocking(&self) -> Result<T, SlotError> {
        async_io::block_on(self.receive())
    }
}

/// Future returned by [`ResponseSlot::receive`].
#[must_use = "futures do nothing unless polled"]
pub struct Receive<T> {
    core: Arc<Mutex<Core<T>>>,
}

impl<T> fmt::Debug for Receive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receive").finish_non_exhaustive()
    }
}

impl<T> Future for Receive<T> {
    type Output = Result<T, SlotError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut core = self.core.lock();
        match core.state {
            SlotState::Fulfilled => {
                core.state = SlotState::Consumed;
                match core.value.take() {
                    Some(value) => Poll::Ready(Ok(value)),
                    None => Poll::Ready(Err(SlotError::InvalidState {
                        state: SlotState::Consumed,
                    })),
                }
            }
            SlotState::Open => {
                core.waker.replace(cx.waker().clone());
                Poll::Pending
            }
            SlotState::Closed => Poll::Ready(Err(SlotError::Closed)),
            SlotState::Consumed => Poll::Ready(Err(SlotError::InvalidState {
                state: SlotState::Consumed,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::time::Duration;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn poll_once<T>(fut: &mut Receive<T>, waker: &Waker) -> Poll<Result<T, SlotError>> {
        let mut cx = Context::from_waker(waker);
        Pin::new(fut).poll(&mut cx)
    }

    // ── send / receive ─────────────────────────────────────────

    #[test]
    fn new_slot_is_open() {
        let slot: ResponseSlot<i32> = ResponseSlot::new();
        assert_eq!(slot.state(), SlotState::Open);
        assert!(slot.state().is_pending());
    }

    #[test]
    fn send_then_receive_yields_value() {
        let slot = ResponseSlot::new();
        slot.send(42).unwrap();
        assert_eq!(slot.state(), SlotState::Fulfilled);
        assert_eq!(slot.receive_blocking(), Ok(42));
        assert_eq!(slot.state(), SlotState::Consumed);
    }

    #[test]
    fn second_send_is_invalid_state() {
        let slot = ResponseSlot::new();
        slot.send("first").unwrap();
        assert_eq!(
            slot.send("second"),
            Err(SlotError::InvalidState {
                state: SlotState::Fulfilled
            })
        );
        assert_eq!(slot.receive_blocking(), Ok("first"));
    }

    #[test]
    fn send_after_close_is_invalid_state() {
        let slot = ResponseSlot::new();
        slot.close();
        assert_eq!(
            slot.send(1),
            Err(SlotError::InvalidState {
                state: SlotState::Closed
            })
        );
    }

    #[test]
    fn receive_after_consume_is_invalid_state() {
        let slot = ResponseSlot::new();
        slot.send(5).unwrap();
        assert_eq!(slot.receive_blocking(), Ok(5));
        assert_eq!(
            slot.receive_blocking(),
            Err(SlotError::InvalidState {
                state: SlotState::Consumed
            })
        );
    }

    // ── close ──────────────────────────────────────────────────

    #[test]
    fn close_before_receive_yields_closed() {
        let slot: ResponseSlot<i32> = ResponseSlot::new();
        slot.close();
        assert_eq!(slot.receive_blocking(), Err(SlotError::Closed));
    }

    #[test]
    fn close_discards_buffered_value() {
        let slot = ResponseSlot::new();
        slot.send(3).unwrap();
        slot.close();
        assert_eq!(slot.receive_blocking(), Err(SlotError::Closed));
    }

    #[test]
    fn close_is_idempotent() {
        let slot: ResponseSlot<()> = ResponseSlot::new();
        slot.close();
        slot.close();
        assert!(slot.is_closed());
    }

    #[test]
    fn close_wakes_parked_receiver() {
        let slot: ResponseSlot<i32> = ResponseSlot::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut fut = slot.receive();

        assert!(poll_once(&mut fut, &waker).is_pending());
        slot.close();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(matches!(
            poll_once(&mut fut, &waker),
            Poll::Ready(Err(SlotError::Closed))
        ));
    }

    // ── wake-ups ───────────────────────────────────────────────

    #[test]
    fn send_wakes_parked_receiver_once() {
        let slot = ResponseSlot::new();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut fut = slot.receive();

        assert!(poll_once(&mut fut, &waker).is_pending());
        slot.send(10).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(matches!(poll_once(&mut fut, &waker), Poll::Ready(Ok(10))));
    }

    #[test]
    fn send_without_receiver_does_not_wake() {
        let slot = ResponseSlot::new();
        slot.send(1).unwrap();
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counter));
        let mut fut = slot.receive();
        assert!(matches!(poll_once(&mut fut, &waker), Poll::Ready(Ok(1))));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clones_share_state() {
        let slot = ResponseSlot::new();
        let other = slot.clone();
        assert!(slot.same_slot(&other));
        other.send(9).unwrap();
        assert_eq!(slot.state(), SlotState::Fulfilled);
        assert!(!slot.same_slot(&ResponseSlot::new()));
    }

    // ── cross-thread ───────────────────────────────────────────

    #[test]
    fn send_from_another_thread_unblocks_receiver() {
        let slot = ResponseSlot::new();
        let producer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.send(String::from("late")).unwrap();
        });
        assert_eq!(slot.receive_blocking().unwrap(), "late");
        handle.join().unwrap();
    }

    #[test]
    fn close_from_another_thread_unblocks_receiver() {
        let slot: ResponseSlot<u8> = ResponseSlot::new();
        let closer = slot.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            closer.close();
        });
        assert_eq!(slot.receive_blocking(), Err(SlotError::Closed));
        handle.join().unwrap();
    }

    #[test]
    fn state_display_and_serde() {
        assert_eq!(SlotState::Fulfilled.to_string(), "fulfilled");
        let json = serde_json::to_string(&SlotState::Closed).unwrap();
        assert_eq!(json, r#""closed""#);
    }
}
