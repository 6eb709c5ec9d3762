//! Shared-memory region backing for the `NamedShared` allocation class.
//!
//! A region is a tmpfs-backed file under `/dev/shm/omnistack`, memory-mapped
//! by every process that opens it by name. The control plane
//! ([`super::control_plane`]) owns the reference count and naming; this
//! type only owns the mapping itself.

use crate::error::{OmniError, OmniResult};
use crate::memory::platform::shm_regions_dir;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;

#[derive(Debug)]
pub struct ShmRegion {
    mmap: MmapMut,
    _file: File,
    path: PathBuf,
    size: usize,
    name: String,
    owner: bool,
}

impl ShmRegion {
    /// Create (or attach to, if another process already did) a named
    /// region of at least `size` bytes.
    pub fn create(control_plane_id: u32, name: &str, size: usize) -> OmniResult<Self> {
        let dir = shm_regions_dir(control_plane_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(name);

        let (file, owner) = if path.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            if file.metadata()?.len() < size as u64 {
                file.set_len(size as u64)?;
            }
            (file, false)
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            file.set_len(size as u64)?;
            (file, true)
        };

        let mut mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        if owner {
            mmap.fill(0);
        }

        log::debug!(
            "memory: mapped named region '{}' ({} bytes, owner={})",
            name,
            size,
            owner
        );

        Ok(Self {
            mmap,
            _file: file,
            path,
            size,
            name: name.to_string(),
            owner,
        })
    }

    /// Attach to an existing named region without creating it.
    pub fn open(control_plane_id: u32, name: &str) -> OmniResult<Self> {
        let path = shm_regions_dir(control_plane_id).join(name);
        if !path.exists() {
            return Err(OmniError::Contract(format!(
                "shared region '{}' does not exist",
                name
            )));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len() as usize;
        let mmap = unsafe { MmapOptions::new().len(size).map_mut(&file)? };
        Ok(Self {
            mmap,
            _file: file,
            path,
            size,
            name: name.to_string(),
            owner: false,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if self.owner {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_sees_same_bytes() {
        let name = format!("test-region-{}", std::process::id());
        let mut a = ShmRegion::create(9999, &name, 4096).unwrap();
        unsafe { a.as_mut_ptr().write(0xAB) };

        let b = ShmRegion::open(9999, &name).unwrap();
        assert_eq!(unsafe { *b.as_ptr() }, 0xAB);
    }
}
