//! Fan-in channel with many writers and a single token-holding reader.
//!
//! Each writer thread gets its own private [`RawChannel`] slot; the
//! reader round-robins across the slot array, skipping writers whose
//! "tick" hints show no new activity since the last poll, so an idle
//! writer costs the reader nothing beyond a single counter comparison.

use crate::channel::spsc::{RawChannel, WriteOutcome};
use crate::memory::RelativePtr;
use crate::token::{current_thread_id, Token, MAX_THREAD};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A fan-in channel: up to `MAX_THREAD + 1` writers, one reader.
pub struct MultiWriterChannel {
    slots: Vec<RawChannel>,
    write_tick: Vec<AtomicU64>,
    read_tick: Vec<AtomicU64>,
    current: std::sync::atomic::AtomicUsize,
    pub reader_token: Arc<Token>,
}

impl MultiWriterChannel {
    pub fn new(reader_token: Arc<Token>) -> Self {
        let slot_count = MAX_THREAD + 1;
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, RawChannel::new);
        let mut write_tick = Vec::with_capacity(slot_count);
        write_tick.resize_with(slot_count, || AtomicU64::new(0));
        let mut read_tick = Vec::with_capacity(slot_count);
        read_tick.resize_with(slot_count, || AtomicU64::new(0));

        Self {
            slots,
            write_tick,
            read_tick,
            current: std::sync::atomic::AtomicUsize::new(0),
            reader_token,
        }
    }

    /// Write from the calling thread's own slot. The caller's logical
    /// thread id (see [`crate::token::current_thread_id`]) selects the
    /// slot, so no two threads ever write the same `RawChannel`.
    pub fn write(&self, payload: RelativePtr<u8>) -> WriteOutcome {
        let tid = current_thread_id() as usize % self.slots.len();
        let outcome = unsafe { self.slots[tid].write(payload) };
        self.write_tick[tid].fetch_add(1, Ordering::Release);
        outcome
    }

    pub fn flush(&self) {
        let tid = current_thread_id() as usize % self.slots.len();
        unsafe {
            self.slots[tid].flush();
        }
    }

    /// Reader side: round-robin across writer slots, returning the first
    /// payload found. Slots whose write tick has not advanced since this
    /// slot was last visited are skipped without touching their channel.
    pub fn read(&self) -> Option<RelativePtr<u8>> {
        if !self.reader_token.check() {
            self.reader_token.acquire_uncontended();
        }

        let slot_count = self.slots.len();
        let start = self.current.load(Ordering::Relaxed);
        for step in 0..slot_count {
            let idx = (start + step) % slot_count;
            let last_seen = self.read_tick[idx].load(Ordering::Relaxed);
            let current_tick = self.write_tick[idx].load(Ordering::Acquire);
            if current_tick == last_seen {
                continue;
            }
            if let Some(payload) = unsafe { self.slots[idx].read() } {
                self.read_tick[idx].store(current_tick, Ordering::Relaxed);
                self.current.store((idx + 1) % slot_count, Ordering::Relaxed);
                return Some(payload);
            }
            self.read_tick[idx].store(current_tick, Ordering::Relaxed);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::set_current_thread_id;

    fn ptr(v: u64) -> RelativePtr<u8> {
        unsafe { RelativePtr::from_ptr(v as *mut u8) }
    }

    #[test]
    fn writes_from_different_threads_land_in_distinct_slots() {
        set_current_thread_id(0);
        let mwc = MultiWriterChannel::new(Arc::new(Token::new(1)));

        set_current_thread_id(3);
        mwc.write(ptr(42));
        mwc.flush();

        set_current_thread_id(0);
        assert_eq!(mwc.read(), Some(ptr(42)));
        assert_eq!(mwc.read(), None);
    }

    #[test]
    fn idle_slots_are_skipped_without_blocking_active_ones() {
        set_current_thread_id(0);
        let mwc = MultiWriterChannel::new(Arc::new(Token::new(1)));

        set_current_thread_id(7);
        mwc.write(ptr(7));
        mwc.flush();

        set_current_thread_id(0);
        assert_eq!(mwc.read(), Some(ptr(7)));
    }
}
