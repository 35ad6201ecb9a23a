/// Physical memory for device DMA.
///
/// Limine maps all physical memory at `phys + hhdm_offset` (the HHDM).
/// The RTL8139 only speaks 32-bit bus addresses, so DMA memory comes from a
/// small page pool carved out of usable RAM below 4 GiB at boot.
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

pub mod pool;
#[cfg(not(test))]
mod dma;

pub use pool::{AllocError, PagePool, DMA_POOL, PAGE_SIZE};
#[cfg(not(test))]
pub use dma::DmaBuf;

/// Higher-Half Direct Map offset, set once at boot from Limine's HHDM response.
static HHDM_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Set the HHDM offset. Must be called before any `PhysAddr::as_ptr()`.
pub fn set_hhdm_offset(offset: u64) {
    HHDM_OFFSET.store(offset, Ordering::Relaxed);
}

/// A physical address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    /// Virtual pointer through the HHDM.
    pub fn as_ptr<T>(self) -> *mut T {
        let offset = HHDM_OFFSET.load(Ordering::Relaxed);
        (self.0 + offset) as *mut T
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}
