//! Cross-process "relative pointer" abstraction.
//!
//! Two backends are supported by contract:
//!
//! - [`AddressingBackend::Offset`]: one process-wide shared region is
//!   mapped at a per-process base address; a [`RelativePtr`] carries a
//!   64-bit offset from that base.
//! - [`AddressingBackend::Direct`]: allocations are pointer-identical
//!   across processes; a [`RelativePtr`] carries the pointer value
//!   verbatim.
//!
//! All persistent cross-process data structures (channels, tokens, the
//! hashtable, packet `next_packet` links) use `RelativePtr<T>` exclusively
//! instead of a raw `*mut T`, so the same struct layout works under either
//! backend. The backend choice is a process-wide runtime setting rather
//! than a compile-time feature, keeping both reachable from a single
//! build (a DPDK-vs-native backend switch is left to the NIC adapter
//! boundary, out of scope here).

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// Process-wide choice of how [`RelativePtr`] values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingBackend {
    /// Offsets from a per-process base address.
    Offset,
    /// Raw pointers, identical across processes.
    Direct,
}

static BACKEND: AtomicU8 = AtomicU8::new(1); // Direct by default (single-process engine)

/// Per-process base address used to resolve [`RelativePtr`] values under
/// the `Offset` backend. Set once at process start by the memory
/// subsystem when it maps the shared arena.
static mut OFFSET_BASE: usize = 0;

/// Select the addressing backend for this process. Must be called before
/// any [`RelativePtr`] is dereferenced under a different backend than the
/// default.
pub fn set_backend(backend: AddressingBackend) {
    BACKEND.store(backend as u8, Ordering::SeqCst);
}

pub fn current_backend() -> AddressingBackend {
    match BACKEND.load(Ordering::SeqCst) {
        0 => AddressingBackend::Offset,
        _ => AddressingBackend::Direct,
    }
}

/// Set the base address that `Offset`-backend pointers are relative to.
///
/// # Safety
/// Must be called once, before any offset-backend region is mapped, and
/// must match the base address the shared arena is actually mapped at in
/// this process.
pub unsafe fn set_offset_base(base: usize) {
    OFFSET_BASE = base;
}

fn offset_base() -> usize {
    unsafe { OFFSET_BASE }
}

/// A pointer that can be stored in shared memory and dereferenced
/// correctly regardless of which process maps it, or of which virtual
/// address that process happened to map the arena at.
#[repr(transparent)]
pub struct RelativePtr<T> {
    raw: u64,
    _marker: PhantomData<*mut T>,
}

impl<T> Clone for RelativePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for RelativePtr<T> {}

unsafe impl<T> Send for RelativePtr<T> {}
unsafe impl<T> Sync for RelativePtr<T> {}

impl<T> Default for RelativePtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> std::fmt::Debug for RelativePtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RelativePtr({:#x})", self.raw)
    }
}

impl<T> PartialEq for RelativePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for RelativePtr<T> {}

impl<T> RelativePtr<T> {
    pub const fn null() -> Self {
        Self {
            raw: 0,
            _marker: PhantomData,
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw == 0
    }

    /// Store an arbitrary 64-bit value verbatim, bypassing the addressing
    /// backend entirely. Used for channels that carry small integers
    /// rather than pointers (e.g. [`crate::node::EventNode`]'s node-id
    /// payloads).
    pub const fn from_raw_u64(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Inverse of [`Self::from_raw_u64`].
    pub const fn to_raw_u64(&self) -> u64 {
        self.raw
    }

    /// Build a relative pointer from a live pointer in this process,
    /// encoding it per the current addressing backend.
    ///
    /// # Safety
    /// `ptr` must stay valid for as long as the resulting `RelativePtr` is
    /// dereferenced from any process.
    pub unsafe fn from_ptr(ptr: *mut T) -> Self {
        let raw = match current_backend() {
            AddressingBackend::Direct => ptr as u64,
            AddressingBackend::Offset => (ptr as usize).wrapping_sub(offset_base()) as u64,
        };
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Resolve back to a raw pointer in the calling process.
    ///
    /// # Safety
    /// The pointee must actually be mapped in the calling process at the
    /// address this resolves to, and `T`'s layout must match what was
    /// stored.
    pub unsafe fn as_ptr(&self) -> *mut T {
        if self.is_null() {
            return std::ptr::null_mut();
        }
        match current_backend() {
            AddressingBackend::Direct => self.raw as *mut T,
            AddressingBackend::Offset => (offset_base() + self.raw as usize) as *mut T,
        }
    }

    /// # Safety
    /// Same requirements as [`Self::as_ptr`], plus the pointee must be
    /// initialized.
    pub unsafe fn as_ref<'a>(&self) -> Option<&'a T> {
        let ptr = self.as_ptr();
        ptr.as_ref()
    }

    /// # Safety
    /// Same requirements as [`Self::as_ref`], plus no other live reference
    /// to the pointee may exist.
    pub unsafe fn as_mut<'a>(&self) -> Option<&'a mut T> {
        let ptr = self.as_ptr();
        ptr.as_mut()
    }
}
