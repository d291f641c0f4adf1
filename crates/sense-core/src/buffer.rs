// ── Bounded realtime message buffer ──
//
// Filled by the background reader, emptied by `Session::drain_cached`.
// Oldest messages are evicted once the capacity is reached; evictions are
// counted so a slow consumer can tell it missed data.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use sense_api::RealtimeMessage;

#[derive(Debug, Default)]
struct State {
    messages: VecDeque<RealtimeMessage>,
    dropped: u64,
}

/// Mutex-guarded FIFO of realtime messages with a fixed capacity.
///
/// The lock is held only to append-and-trim or to swap out the contents,
/// never across I/O.
#[derive(Debug)]
pub struct MessageBuffer {
    capacity: usize,
    state: Mutex<State>,
}

impl MessageBuffer {
    /// A buffer holding at most `capacity` messages (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                messages: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `message`, evicting the oldest entries past capacity.
    ///
    /// Returns how many messages were evicted by this push.
    pub fn push(&self, message: RealtimeMessage) -> usize {
        let mut state = self.lock();
        state.messages.push_back(message);

        let excess = state.messages.len().saturating_sub(self.capacity);
        if excess > 0 {
            state.messages.drain(..excess);
            state.dropped += u64::try_from(excess).unwrap_or(u64::MAX);
        }
        excess
    }

    /// Take everything buffered, oldest first, leaving the buffer empty.
    pub fn drain(&self) -> Vec<RealtimeMessage> {
        let mut state = self.lock();
        std::mem::take(&mut state.messages).into()
    }

    /// Messages currently waiting to be drained.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    /// Total messages evicted since the buffer was created.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
