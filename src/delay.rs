//! Output-side delay for the Serial stream.

use crate::{
    Error,
    Result,
    consts::{
        DELAY_BUFFER_SIZE,
        MAX_TOUCH_RESPONSE_DELAY_MS,
    },
    state::SerialState,
};

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    state: SerialState,
    timestamp_us: u64,
}

/// Ring of timestamped Serial states. Producer and consumer are the same
/// scan loop; nothing else touches it.
pub struct DelayBuffer {
    entries: [Entry; DELAY_BUFFER_SIZE],
    /// Next write position.
    head: usize,
    count: usize,
    delay_ms: u8,
}

impl Default for DelayBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayBuffer {
    pub const fn new() -> Self {
        Self {
            entries: [Entry { state: SerialState::EMPTY, timestamp_us: 0 }; DELAY_BUFFER_SIZE],
            head: 0,
            count: 0,
            delay_ms: 0,
        }
    }

    pub const fn delay_ms(&self) -> u8 {
        self.delay_ms
    }

    /// Changes the delay and forgets everything recorded so far.
    pub fn set_delay(&mut self, delay_ms: u8) -> Result<()> {
        if delay_ms > MAX_TOUCH_RESPONSE_DELAY_MS {
            return Err(Error::OutOfRange);
        }
        self.delay_ms = delay_ms;
        self.clear();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    pub const fn len(&self) -> usize {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Records the state computed at `now_us`; overwrites the oldest entry
    /// when full.
    pub fn push(&mut self, state: SerialState, now_us: u64) {
        self.entries[self.head] = Entry { state, timestamp_us: now_us };
        self.head = (self.head + 1) % DELAY_BUFFER_SIZE;
        if self.count < DELAY_BUFFER_SIZE {
            self.count += 1;
        }
    }

    /// Newest recorded state not younger than the delay, or empty if none
    /// qualifies yet.
    pub fn select(&self, now_us: u64) -> SerialState {
        let Some(cutoff) = now_us.checked_sub(u64::from(self.delay_ms) * 1000) else {
            return SerialState::EMPTY;
        };
        // timestamps are monotonic from oldest to newest; binary search for
        // the first entry past the cutoff
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).timestamp_us <= cutoff {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        match lo {
            0 => SerialState::EMPTY,
            n => self.entry(n - 1).state,
        }
    }

    /// `i`-th entry counting from the oldest.
    fn entry(&self, i: usize) -> &Entry {
        let oldest = (self.head + DELAY_BUFFER_SIZE - self.count) % DELAY_BUFFER_SIZE;
        &self.entries[(oldest + i) % DELAY_BUFFER_SIZE]
    }

    /// Records `state` and returns what should go out now.
    pub fn process(&mut self, state: SerialState, now_us: u64) -> SerialState {
        if self.delay_ms == 0 {
            return state;
        }
        self.push(state, now_us);
        self.select(now_us)
    }
}
