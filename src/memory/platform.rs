//! Filesystem conventions for the shared-memory subsystem.
//!
//! Named regions live as tmpfs-backed files under `/dev/shm/omnistack`; the
//! control plane listens on a Unix-domain socket. Only the Linux mechanism
//! (tmpfs via `/dev/shm`) is implemented — cross-platform portability is
//! out of scope.

use std::path::PathBuf;

/// Base directory for all OmniStack named shared-memory regions.
pub fn shm_base_dir() -> PathBuf {
    PathBuf::from("/dev/shm/omnistack")
}

/// Directory holding named regions for a given control-plane id.
pub fn shm_regions_dir(control_plane_id: u32) -> PathBuf {
    shm_base_dir().join(format!("cp{}", control_plane_id))
}

/// Unix-domain socket path for the memory control plane.
pub fn memory_control_socket_path(control_plane_id: u32) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/omnistack_memory_sock{}.socket",
        control_plane_id
    ))
}

/// Unix-domain socket path for the token control plane.
pub fn token_control_socket_path(control_plane_id: u32) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/omnistack_token_sock{}.socket",
        control_plane_id
    ))
}

/// Unix-domain socket path for the channel control plane.
pub fn channel_control_socket_path(control_plane_id: u32) -> PathBuf {
    PathBuf::from(format!(
        "/tmp/omnistack_channel_sock{}.socket",
        control_plane_id
    ))
}

/// Check whether a process with the given pid is still alive.
pub fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
