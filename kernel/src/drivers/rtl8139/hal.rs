/// Hardware seams of the driver: register window and DMA memory.
///
/// The driver logic only talks to these traits. On the kernel target they
/// are backed by port I/O and the DMA page pool; tests plug in a simulated
/// device instead.
use crate::mem::AllocError;

/// Byte-addressed register window (offsets from the I/O base).
pub trait RegisterIo {
    fn read8(&mut self, reg: u16) -> u8;
    fn read16(&mut self, reg: u16) -> u16;
    fn read32(&mut self, reg: u16) -> u32;
    fn write8(&mut self, reg: u16, val: u8);
    fn write16(&mut self, reg: u16, val: u16);
    fn write32(&mut self, reg: u16, val: u32);
}

/// Memory the device can reach by bus address.
pub trait DmaRegion {
    /// 32-bit bus address of byte 0.
    fn bus_addr(&self) -> u32;
    fn len(&self) -> usize;
    fn read_at(&self, offset: usize, dst: &mut [u8]);
    fn write_at(&mut self, offset: usize, src: &[u8]);
    fn zero(&mut self);
}

/// Source of DMA regions: zeroed, physically contiguous, at least 4-byte
/// aligned, below 4 GiB. Dropping a region frees it.
pub trait DmaAllocator {
    type Region: DmaRegion;

    fn alloc(&mut self, len: usize) -> Result<Self::Region, AllocError>;
}

/// Port I/O register window.
#[cfg(not(test))]
pub struct PortRegisters {
    base: u16,
}

#[cfg(not(test))]
impl PortRegisters {
    /// # Safety
    /// `base` must be the I/O BAR of an RTL8139, and nothing else may drive
    /// those ports while this value exists.
    pub unsafe fn new(base: u16) -> Self {
        Self { base }
    }
}

#[cfg(not(test))]
impl RegisterIo for PortRegisters {
    fn read8(&mut self, reg: u16) -> u8 {
        crate::arch::x86_64::inb(self.base + reg)
    }

    fn read16(&mut self, reg: u16) -> u16 {
        crate::arch::x86_64::inw(self.base + reg)
    }

    fn read32(&mut self, reg: u16) -> u32 {
        crate::arch::x86_64::inl(self.base + reg)
    }

    fn write8(&mut self, reg: u16, val: u8) {
        crate::arch::x86_64::outb(self.base + reg, val)
    }

    fn write16(&mut self, reg: u16, val: u16) {
        crate::arch::x86_64::outw(self.base + reg, val)
    }

    fn write32(&mut self, reg: u16, val: u32) {
        crate::arch::x86_64::outl(self.base + reg, val)
    }
}

/// DMA regions from the kernel page pool.
#[cfg(not(test))]
pub struct KernelDma;

#[cfg(not(test))]
impl DmaAllocator for KernelDma {
    type Region = crate::mem::DmaBuf;

    fn alloc(&mut self, len: usize) -> Result<Self::Region, AllocError> {
        crate::mem::DmaBuf::alloc(len)
    }
}

#[cfg(not(test))]
impl DmaRegion for crate::mem::DmaBuf {
    fn bus_addr(&self) -> u32 {
        // The pool only hands out pages below 4 GiB.
        self.phys_addr().as_u64() as u32
    }

    fn len(&self) -> usize {
        crate::mem::DmaBuf::len(self)
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        crate::mem::DmaBuf::read_at(self, offset, dst)
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) {
        crate::mem::DmaBuf::write_at(self, offset, src)
    }

    fn zero(&mut self) {
        crate::mem::DmaBuf::zero(self)
    }
}
