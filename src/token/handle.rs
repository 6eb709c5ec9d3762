//! The token's hot-path fields, laid out for shared-memory placement.

use crate::token::{current_thread_id, MAX_THREAD};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A single-holder cooperative ownership token.
///
/// `owner_thread_id` is `0` when the token is free. `returning` is set by
/// the control plane when a waiter is queued, asking the current holder to
/// give the token up at its next convenient point; `need_return` lets the
/// control plane target the request at one specific thread instead of
/// broadcasting.
pub struct Token {
    pub(crate) id: u64,
    owner_thread_id: AtomicU64,
    returning: AtomicBool,
    need_return: Vec<AtomicBool>,
}

impl Token {
    pub fn new(id: u64) -> Self {
        let mut need_return = Vec::with_capacity(MAX_THREAD + 1);
        need_return.resize_with(MAX_THREAD + 1, || AtomicBool::new(false));
        Self {
            id,
            owner_thread_id: AtomicU64::new(0),
            returning: AtomicBool::new(false),
            need_return,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> u64 {
        self.owner_thread_id.load(Ordering::Acquire)
    }

    /// Fast-path ownership check for the calling thread. A positive
    /// result means the caller may proceed through its critical section
    /// this tick.
    pub fn check(&self) -> bool {
        let me = current_thread_id();
        if self.owner_thread_id.load(Ordering::Acquire) != me {
            return false;
        }
        if self.need_return_flag(me) {
            self.release();
            return false;
        }
        true
    }

    /// Attempt to acquire the token if not already held by this thread.
    /// Returns `true` if the caller now holds it. This only performs the
    /// uncontended fast path (token is currently free); contended
    /// acquisition goes through [`super::TokenControlPlane::acquire`].
    pub fn acquire_uncontended(&self) -> bool {
        if self.check() {
            return true;
        }
        let me = current_thread_id();
        self.owner_thread_id
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark that the given thread should return the token at its next
    /// `check()`. Used by the control plane to service a waiter.
    pub(crate) fn request_return(&self, thread_id: u64) {
        self.returning.store(true, Ordering::Release);
        if let Some(flag) = self.need_return.get(thread_id as usize) {
            flag.store(true, Ordering::Release);
        }
    }

    fn need_return_flag(&self, thread_id: u64) -> bool {
        self.need_return
            .get(thread_id as usize)
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Release ownership, clearing the calling thread's `need_return` bit.
    pub(crate) fn release(&self) {
        let me = current_thread_id();
        if let Some(flag) = self.need_return.get(me as usize) {
            flag.store(false, Ordering::Release);
        }
        self.returning.store(false, Ordering::Release);
        self.owner_thread_id.store(0, Ordering::Release);
    }

    pub(crate) fn assign(&self, thread_id: u64) {
        self.owner_thread_id.store(thread_id, Ordering::Release);
        self.returning.store(false, Ordering::Release);
    }

    pub fn is_returning(&self) -> bool {
        self.returning.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::set_current_thread_id;

    #[test]
    fn free_token_is_uncontended_acquirable() {
        set_current_thread_id(1);
        let token = Token::new(1);
        assert!(token.acquire_uncontended());
        assert!(token.check());
    }

    #[test]
    fn other_thread_cannot_check_held_token() {
        set_current_thread_id(1);
        let token = Token::new(1);
        assert!(token.acquire_uncontended());

        set_current_thread_id(2);
        assert!(!token.check());
        assert!(!token.acquire_uncontended());
    }

    #[test]
    fn requested_return_causes_holder_to_release_on_next_check() {
        set_current_thread_id(1);
        let token = Token::new(1);
        token.acquire_uncontended();
        token.request_return(1);
        assert!(!token.check());
        assert_eq!(token.owner(), 0);
    }
}
