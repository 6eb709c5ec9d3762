//! Cooperative single-holder ownership tokens.
//!
//! A [`Token`] has at most one holder thread at a time. The holder checks
//! ownership on every hot-path access with [`Token::check`]; a thread that
//! wants to acquire a token it does not hold asks the
//! [`control_plane::TokenControlPlane`] to hand it over cooperatively,
//! never by force while the current holder is still inside the critical
//! section.

pub mod control_plane;
pub mod handle;

pub use control_plane::TokenControlPlane;
pub use handle::Token;

/// The largest thread id a token's `need_return` bitmap tracks.
pub const MAX_THREAD: usize = 128;

thread_local! {
    static CURRENT_THREAD_ID: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
}

/// Assign this OS thread's logical thread id for token bookkeeping. Must
/// be called once per thread before any token is acquired or checked.
pub fn set_current_thread_id(id: u64) {
    CURRENT_THREAD_ID.with(|c| c.set(id));
}

pub fn current_thread_id() -> u64 {
    CURRENT_THREAD_ID.with(|c| c.get())
}
