/// DMA-safe buffer allocated from the DMA page pool.
///
/// Guarantees:
/// - Physically contiguous, page aligned (so 4-byte aligned for the NIC)
/// - Below 4 GiB (32-bit bus address)
/// - Zeroed on allocation, returned to the pool on drop
///
/// x86 keeps DMA cache-coherent, so no explicit flush/invalidate is needed
/// around NIC transfers.
use core::ptr;

use super::pool::{AllocError, DMA_POOL, PAGE_SIZE};
use super::PhysAddr;

pub struct DmaBuf {
    phys: PhysAddr,
    len: usize,
    page_count: usize,
}

impl DmaBuf {
    /// Allocate a DMA buffer of at least `size` bytes.
    pub fn alloc(size: usize) -> Result<Self, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }

        let page_count = size.div_ceil(PAGE_SIZE);
        let phys = DMA_POOL.lock().alloc(page_count)?;

        unsafe {
            ptr::write_bytes(phys.as_ptr::<u8>(), 0, page_count * PAGE_SIZE);
        }

        Ok(Self { phys, len: size, page_count })
    }

    #[inline]
    pub fn phys_addr(&self) -> PhysAddr {
        self.phys
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy `src` into the buffer at `offset`.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "write exceeds DMA buffer bounds");
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.phys.as_ptr::<u8>().add(offset), src.len());
        }
    }

    /// Copy from the buffer at `offset` into `dst`.
    ///
    /// Volatile because the device writes this memory behind the compiler's back.
    pub fn read_at(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.len, "read exceeds DMA buffer bounds");
        let src = self.phys.as_ptr::<u8>();
        for (i, byte) in dst.iter_mut().enumerate() {
            *byte = unsafe { ptr::read_volatile(src.add(offset + i)) };
        }
    }

    /// Zero the whole buffer.
    pub fn zero(&mut self) {
        unsafe {
            ptr::write_bytes(self.phys.as_ptr::<u8>(), 0, self.len);
        }
    }
}

impl Drop for DmaBuf {
    fn drop(&mut self) {
        DMA_POOL.lock().free(self.phys, self.page_count);
    }
}

// Single owner at a time: the driver, or the device while a transfer is in flight.
unsafe impl Send for DmaBuf {}
