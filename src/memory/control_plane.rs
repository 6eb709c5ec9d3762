//! The shared-memory control plane.
//!
//! A dedicated component that owns global allocation metadata: a
//! size-keyed free-region index for best-fit reuse, a name → region map,
//! a name → memory-pool map, the set of live processes/threads, and the
//! thread → bound-CPU mapping. It listens on a Unix-domain socket so that
//! out-of-process peers can allocate named regions under the same naming
//! scheme; in-process callers (the common case for a single engine) go
//! through [`MemoryControlPlane`]'s methods directly without touching the
//! socket, keeping the local shared-memory path separate from the
//! cross-process RPC surface.
//!
//! Process death is detected as the peer's socket closing and is treated
//! as an implicit free of every named region that process held a
//! reference to.

use crate::error::{OmniError, OmniResult};
use crate::memory::platform::memory_control_socket_path;
use crate::memory::protocol::{Request, RequestKind, Response, Status};
use crate::memory::region::ShmRegion;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Metadata kept for a named shared region, independent of its mapping.
struct NamedRegionMeta {
    size: usize,
    ref_count: u64,
}

struct NamedPoolMeta {
    chunk_size: usize,
    chunk_count: usize,
    ref_count: u64,
}

/// A previously-freed named region kept around for best-fit reuse.
struct FreeRegion {
    name: String,
    size: usize,
}

#[derive(Default)]
struct ThreadRecord {
    bound_cpu: Option<usize>,
}

#[derive(Default)]
struct ControlPlaneState {
    processes: HashSet<u64>,
    threads: HashMap<u64, ThreadRecord>,
    named_regions: HashMap<String, NamedRegionMeta>,
    named_pools: HashMap<String, NamedPoolMeta>,
    /// Size-keyed best-fit index of regions eligible for reuse.
    free_index: BTreeMap<usize, Vec<FreeRegion>>,
}

pub struct MemoryControlPlane {
    id: u32,
    state: Mutex<ControlPlaneState>,
    next_process_id: AtomicU64,
    next_thread_id: AtomicU64,
    stop: Arc<AtomicBool>,
}

impl MemoryControlPlane {
    /// Start the control plane and its Unix-domain socket listener.
    pub fn start(control_plane_id: u32) -> OmniResult<Arc<Self>> {
        let cp = Arc::new(Self {
            id: control_plane_id,
            state: Mutex::new(ControlPlaneState::default()),
            next_process_id: AtomicU64::new(1),
            next_thread_id: AtomicU64::new(1),
            stop: Arc::new(AtomicBool::new(false)),
        });

        let socket_path = memory_control_socket_path(control_plane_id);
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;

        let worker_cp = cp.clone();
        let stop = cp.stop.clone();
        thread::Builder::new()
            .name(format!("omnistack-memcp-{}", control_plane_id))
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match listener.accept() {
                        Ok((stream, _)) => {
                            let cp = worker_cp.clone();
                            thread::spawn(move || cp.serve_connection(stream));
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(std::time::Duration::from_millis(5));
                        }
                        Err(e) => {
                            log::warn!("memory control plane accept failed: {e}");
                            break;
                        }
                    }
                }
            })?;

        log::info!(
            "memory control plane {} listening on {:?}",
            control_plane_id,
            socket_path
        );
        Ok(cp)
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = std::fs::remove_file(memory_control_socket_path(self.id));
    }

    fn serve_connection(&self, stream: UnixStream) {
        let mut reader = BufReader::new(stream.try_clone().expect("clone unix stream"));
        let mut writer = stream;
        let mut line = String::new();
        let mut owned_regions: Vec<String> = Vec::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let Ok(req) = serde_json::from_str::<Request>(&line) else {
                continue;
            };
            let response = self.handle_request(&req, &mut owned_regions);
            let Ok(mut payload) = serde_json::to_string(&response) else {
                continue;
            };
            payload.push('\n');
            if writer.write_all(payload.as_bytes()).is_err() {
                break;
            }
        }

        // Peer closed: implicit free of everything this connection owned.
        for name in owned_regions {
            self.free_named(&name);
        }
    }

    fn handle_request(&self, req: &Request, owned_regions: &mut Vec<String>) -> Response {
        let status = match &req.kind {
            RequestKind::GetProcessId => {
                let pid = self.next_process_id.fetch_add(1, Ordering::Relaxed);
                self.state.lock().unwrap().processes.insert(pid);
                return Response {
                    request_id: req.request_id,
                    status: Status::Success,
                    process_id: Some(pid),
                    thread_id: None,
                };
            }
            RequestKind::DestroyProcess => {
                self.state
                    .lock()
                    .unwrap()
                    .processes
                    .remove(&req.thread_id);
                Status::Success
            }
            RequestKind::NewThread => {
                let tid = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
                self.state
                    .lock()
                    .unwrap()
                    .threads
                    .insert(tid, ThreadRecord::default());
                return Response {
                    request_id: req.request_id,
                    status: Status::Success,
                    process_id: None,
                    thread_id: Some(tid),
                };
            }
            RequestKind::DestroyThread { thread_id } => {
                let mut state = self.state.lock().unwrap();
                if state.threads.remove(thread_id).is_none() {
                    Status::InvalidThreadId
                } else {
                    Status::Success
                }
            }
            RequestKind::GetMemory { size, name } => match self.get_named(name, *size) {
                Ok(()) => {
                    owned_regions.push(name.clone());
                    Status::Success
                }
                Err(OmniError::Contract(_)) => Status::NameCollision,
                Err(_) => Status::NoUsableRegion,
            },
            RequestKind::FreeMemory { name } => {
                self.free_named(name);
                owned_regions.retain(|n| n != name);
                Status::Success
            }
            RequestKind::GetMemoryPool {
                chunk_size,
                chunk_count,
                name,
            } => {
                self.register_pool(name, *chunk_size, *chunk_count);
                Status::Success
            }
            RequestKind::FreeMemoryPool { name } => {
                self.unregister_pool(name);
                Status::Success
            }
            RequestKind::ThreadBindCpu { thread_id, cpu } => {
                let mut state = self.state.lock().unwrap();
                match state.threads.get_mut(thread_id) {
                    Some(t) => {
                        t.bound_cpu = Some(*cpu);
                        Status::Success
                    }
                    None => Status::InvalidThreadId,
                }
            }
        };
        Response {
            request_id: req.request_id,
            status,
            process_id: None,
            thread_id: None,
        }
    }

    /// Allocate (or attach to) a named shared region, honoring best-fit
    /// reuse from the free index before mapping a fresh file.
    pub fn get_named(&self, name: &str, size: usize) -> OmniResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.named_regions.get_mut(name) {
            if existing.size != size {
                return Err(OmniError::Contract(format!(
                    "name collision: '{}' already sized {}, requested {}",
                    name, existing.size, size
                )));
            }
            existing.ref_count += 1;
            return Ok(());
        }

        // Best-fit: take the smallest free region whose size >= requested.
        if let Some((&fit_size, bucket)) = state.free_index.range_mut(size..).next() {
            if let Some(region) = bucket.pop() {
                if bucket.is_empty() {
                    state.free_index.remove(&fit_size);
                }
                state.named_regions.insert(
                    region.name,
                    NamedRegionMeta {
                        size: fit_size,
                        ref_count: 1,
                    },
                );
                return Ok(());
            }
        }

        state.named_regions.insert(
            name.to_string(),
            NamedRegionMeta {
                size,
                ref_count: 1,
            },
        );
        Ok(())
    }

    pub fn free_named(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(meta) = state.named_regions.get_mut(name) else {
            return;
        };
        meta.ref_count = meta.ref_count.saturating_sub(1);
        if meta.ref_count == 0 {
            let size = meta.size;
            state.named_regions.remove(name);
            state
                .free_index
                .entry(size)
                .or_default()
                .push(FreeRegion {
                    name: name.to_string(),
                    size,
                });
        }
    }

    pub fn register_pool(&self, name: &str, chunk_size: usize, chunk_count: usize) {
        let mut state = self.state.lock().unwrap();
        state
            .named_pools
            .entry(name.to_string())
            .and_modify(|p| p.ref_count += 1)
            .or_insert(NamedPoolMeta {
                chunk_size,
                chunk_count,
                ref_count: 1,
            });
    }

    pub fn unregister_pool(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.named_pools.get_mut(name) {
            p.ref_count = p.ref_count.saturating_sub(1);
            if p.ref_count == 0 {
                state.named_pools.remove(name);
            }
        }
    }

    pub fn live_process_count(&self) -> usize {
        self.state.lock().unwrap().processes.len()
    }

    pub fn live_thread_count(&self) -> usize {
        self.state.lock().unwrap().threads.len()
    }
}

/// Create or attach a [`ShmRegion`], refcounting the allocation through a
/// control plane. This is the primary entry point for `NamedShared`
/// allocations.
pub fn allocate_named(
    cp: &MemoryControlPlane,
    control_plane_id: u32,
    name: &str,
    size: usize,
) -> OmniResult<ShmRegion> {
    cp.get_named(name, size)?;
    ShmRegion::create(control_plane_id, name, size)
}

pub fn free_named(cp: &MemoryControlPlane, region: ShmRegion) {
    cp.free_named(region.name());
}
