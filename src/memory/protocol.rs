//! Wire frames for the memory control plane. Frames are newline-delimited
//! JSON, each tagged with a request id, over the Unix-domain stream socket
//! at `/tmp/omnistack_memory_sock{control_plane_id}.socket`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub thread_id: u64,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestKind {
    GetProcessId,
    DestroyProcess,
    NewThread,
    DestroyThread { thread_id: u64 },
    GetMemory { size: usize, name: String },
    FreeMemory { name: String },
    GetMemoryPool { chunk_size: usize, chunk_count: usize, name: String },
    FreeMemoryPool { name: String },
    ThreadBindCpu { thread_id: u64, cpu: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    UnknownProcess,
    UnknownType,
    InvalidThreadId,
    NameCollision,
    NoUsableRegion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub status: Status,
    pub process_id: Option<u64>,
    pub thread_id: Option<u64>,
}
