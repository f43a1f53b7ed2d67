//! Sliding-window parser for inbound command frames.

use heapless::Deque;

use super::frame::{
    COMMAND_END,
    COMMAND_FRAME_LEN,
    COMMAND_START,
    CommandFrame,
};

/// Window size: four frames, so a burst split across reads still resyncs.
pub const WINDOW_LEN: usize = COMMAND_FRAME_LEN * 4;

#[derive(Default)]
pub struct CommandParser {
    window: Deque<u8, WINDOW_LEN>,
    dropped: u32,
}

impl CommandParser {
    pub const fn new() -> Self {
        Self { window: Deque::new(), dropped: 0 }
    }

    /// Bytes discarded while hunting for a frame start.
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Appends one byte; the oldest byte falls out if the window is full.
    pub fn push(&mut self, byte: u8) {
        if self.window.is_full() {
            self.window.pop_front();
            self.dropped = self.dropped.wrapping_add(1);
        }
        // cannot fail after the pop above
        let _ = self.window.push_back(byte);
    }

    /// Next complete frame, or `None` once the window needs more bytes.
    pub fn next_frame(&mut self) -> Option<CommandFrame> {
        loop {
            let &first = self.window.front()?;
            if first != COMMAND_START {
                self.discard();
                continue;
            }
            if self.window.len() < COMMAND_FRAME_LEN {
                return None;
            }
            let mut raw = [0u8; COMMAND_FRAME_LEN];
            for (dst, src) in raw.iter_mut().zip(self.window.iter()) {
                *dst = *src;
            }
            if raw[COMMAND_FRAME_LEN - 1] != COMMAND_END {
                // not a frame; resync on the next start byte
                self.discard();
                continue;
            }
            for _ in 0..COMMAND_FRAME_LEN {
                self.window.pop_front();
            }
            return CommandFrame::parse(&raw);
        }
    }

    /// Feeds `bytes` and hands every completed frame to `on_frame`.
    pub fn feed(&mut self, bytes: &[u8], mut on_frame: impl FnMut(CommandFrame)) {
        for &b in bytes {
            self.push(b);
            while let Some(frame) = self.next_frame() {
                on_frame(frame);
            }
        }
    }

    fn discard(&mut self) {
        self.window.pop_front();
        self.dropped = self.dropped.wrapping_add(1);
    }
}
