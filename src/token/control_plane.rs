//! Token control plane: token creation, FIFO-fair acquisition, and the
//! Unix-domain socket RPC surface peers use to request a token they do not
//! already hold.
//!
//! Acquisition is cooperative: the control plane never snatches a token
//! from its holder. It instead flags the holder's `need_return` bit so the
//! holder gives it up at its own next `check()`, and queues the requester
//! FIFO behind any other waiters. If the holder does not yield within
//! [`FORCE_REASSIGN_TIMEOUT`], the control plane reassigns the token to the
//! head of the queue anyway, on the assumption that the holder thread has
//! stalled or died.

use crate::error::{OmniError, OmniResult};
use crate::memory::platform::token_control_socket_path;
use crate::token::handle::Token;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Default time a holder has to honor a return request before the control
/// plane force-reassigns the token to the next waiter.
pub const FORCE_REASSIGN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub thread_id: u64,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestKind {
    CreateToken,
    DestroyToken { token_id: u64 },
    Acquire { token_id: u64 },
    Return { token_id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    UnknownToken,
    Granted,
    Queued,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub status: Status,
    pub token_id: Option<u64>,
}

struct TokenEntry {
    token: Arc<Token>,
    waiters: VecDeque<u64>,
    requested_at: Option<Instant>,
}

pub struct TokenControlPlane {
    id: u32,
    next_token_id: AtomicU64,
    tokens: Mutex<HashMap<u64, TokenEntry>>,
    stop: Arc<AtomicBool>,
    reaper_signal: Arc<(Mutex<bool>, Condvar)>,
}

impl TokenControlPlane {
    pub fn start(control_plane_id: u32) -> OmniResult<Arc<Self>> {
        let cp = Arc::new(Self {
            id: control_plane_id,
            next_token_id: AtomicU64::new(1),
            tokens: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
            reaper_signal: Arc::new((Mutex::new(false), Condvar::new())),
        });

        cp.clone().spawn_reaper();
        cp.clone().spawn_listener()?;
        Ok(cp)
    }

    fn spawn_reaper(self: Arc<Self>) {
        let stop = self.stop.clone();
        thread::Builder::new()
            .name(format!("omnistack-tokencp-reaper-{}", self.id))
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(50));
                    self.reap_overdue();
                }
            })
            .expect("spawn token reaper thread");
    }

    fn spawn_listener(self: Arc<Self>) -> OmniResult<()> {
        let socket_path = token_control_socket_path(self.id);
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        let stop = self.stop.clone();
        let cp = self;
        thread::Builder::new()
            .name(format!("omnistack-tokencp-{}", cp.id))
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let cp = cp.clone();
                            thread::spawn(move || cp.serve_connection(stream));
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(5));
                        }
                        Err(_) => break,
                    }
                }
            })?;
        Ok(())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = std::fs::remove_file(token_control_socket_path(self.id));
    }

    fn serve_connection(&self, stream: UnixStream) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone unix stream"));
        let mut writer = stream;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let Ok(req) = serde_json::from_str::<Request>(&line) else {
                continue;
            };
            let resp = self.handle_request(&req);
            let Ok(mut payload) = serde_json::to_string(&resp) else {
                continue;
            };
            payload.push('\n');
            if writer.write_all(payload.as_bytes()).is_err() {
                break;
            }
        }
    }

    fn handle_request(&self, req: &Request) -> Response {
        match &req.kind {
            RequestKind::CreateToken => {
                let id = self.create_token();
                Response {
                    request_id: req.request_id,
                    status: Status::Success,
                    token_id: Some(id),
                }
            }
            RequestKind::DestroyToken { token_id } => {
                self.destroy_token(*token_id);
                Response {
                    request_id: req.request_id,
                    status: Status::Success,
                    token_id: Some(*token_id),
                }
            }
            RequestKind::Acquire { token_id } => {
                let status = match self.request_acquire(*token_id, req.thread_id) {
                    Some(true) => Status::Granted,
                    Some(false) => Status::Queued,
                    None => Status::UnknownToken,
                };
                Response {
                    request_id: req.request_id,
                    status,
                    token_id: Some(*token_id),
                }
            }
            RequestKind::Return { token_id } => {
                self.handle_return(*token_id);
                Response {
                    request_id: req.request_id,
                    status: Status::Success,
                    token_id: Some(*token_id),
                }
            }
        }
    }

    /// Create a new, initially-free token.
    pub fn create_token(&self) -> u64 {
        let id = self.next_token_id.fetch_add(1, Ordering::Relaxed);
        self.tokens.lock().unwrap().insert(
            id,
            TokenEntry {
                token: Arc::new(Token::new(id)),
                waiters: VecDeque::new(),
                requested_at: None,
            },
        );
        id
    }

    pub fn token(&self, token_id: u64) -> Option<Arc<Token>> {
        self.tokens.lock().unwrap().get(&token_id).map(|e| e.token.clone())
    }

    pub fn destroy_token(&self, token_id: u64) {
        self.tokens.lock().unwrap().remove(&token_id);
    }

    /// Request `thread_id` be granted `token_id`. Returns `Some(true)` if
    /// granted immediately (token was free), `Some(false)` if queued
    /// behind the current holder, or `None` if the token is unknown.
    pub fn request_acquire(&self, token_id: u64, thread_id: u64) -> Option<bool> {
        let mut tokens = self.tokens.lock().unwrap();
        let entry = tokens.get_mut(&token_id)?;

        if entry.token.owner() == 0 {
            entry.token.assign(thread_id);
            return Some(true);
        }
        if entry.token.owner() == thread_id {
            return Some(true);
        }

        entry.waiters.push_back(thread_id);
        if entry.requested_at.is_none() {
            entry.requested_at = Some(Instant::now());
        }
        entry.token.request_return(entry.token.owner());
        Some(false)
    }

    /// A holder voluntarily returns its token. Grants it to the next FIFO
    /// waiter, if any.
    pub fn handle_return(&self, token_id: u64) {
        let mut tokens = self.tokens.lock().unwrap();
        let Some(entry) = tokens.get_mut(&token_id) else {
            return;
        };
        entry.token.release();
        Self::grant_next(entry);
    }

    fn grant_next(entry: &mut TokenEntry) {
        if let Some(next) = entry.waiters.pop_front() {
            entry.token.assign(next);
            entry.requested_at = if entry.waiters.is_empty() {
                None
            } else {
                Some(Instant::now())
            };
            if !entry.waiters.is_empty() {
                entry.token.request_return(next);
            }
        }
    }

    /// Force-reassign any token whose holder has ignored a return request
    /// past [`FORCE_REASSIGN_TIMEOUT`].
    fn reap_overdue(&self) {
        let mut tokens = self.tokens.lock().unwrap();
        for entry in tokens.values_mut() {
            let Some(requested_at) = entry.requested_at else {
                continue;
            };
            if requested_at.elapsed() >= FORCE_REASSIGN_TIMEOUT && entry.token.is_returning() {
                entry.token.release();
                Self::grant_next(entry);
            }
        }
    }
}
