/// DMA page pool: a bitmap over a fixed window of physical pages.
///
/// The NIC needs a handful of buffers (the receive ring plus one transmit
/// scratch page at a time), so one 64-bit word tracks the whole pool.
/// Bit set = page in use.
use core::fmt;
use spin::Mutex;

use super::PhysAddr;

pub const PAGE_SIZE: usize = 4096;

/// Pages managed by the pool.
pub const POOL_PAGES: usize = 64;

/// Highest address (exclusive) the RTL8139 can reach.
pub const DMA32_LIMIT: u64 = 1 << 32;

/// Lowest address considered for the pool (keep clear of real-mode memory).
const LOW_MEMORY_END: u64 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    OutOfMemory,
    InvalidSize,
    NotInitialized,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "DMA pool exhausted"),
            AllocError::InvalidSize => write!(f, "invalid DMA allocation size"),
            AllocError::NotInitialized => write!(f, "DMA pool not initialized"),
        }
    }
}

pub struct PagePool {
    base: Option<PhysAddr>,
    used: u64,
}

impl PagePool {
    pub const fn empty() -> Self {
        Self { base: None, used: 0 }
    }

    /// Hand the pool its window. `base` must be page aligned and the
    /// `POOL_PAGES` pages after it usable RAM below `DMA32_LIMIT`.
    pub fn init(&mut self, base: PhysAddr) {
        self.base = Some(base);
        self.used = 0;
    }

    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// Allocate `count` contiguous pages (first fit).
    pub fn alloc(&mut self, count: usize) -> Result<PhysAddr, AllocError> {
        let base = self.base.ok_or(AllocError::NotInitialized)?;
        if count == 0 || count > POOL_PAGES {
            return Err(AllocError::InvalidSize);
        }

        let mask = run_mask(count);
        for first in 0..=(POOL_PAGES - count) {
            let run = mask << first;
            if self.used & run == 0 {
                self.used |= run;
                return Ok(base.add((first * PAGE_SIZE) as u64));
            }
        }
        Err(AllocError::OutOfMemory)
    }

    /// Return `count` pages starting at `addr`. Pages outside the window or
    /// already free are ignored.
    pub fn free(&mut self, addr: PhysAddr, count: usize) {
        let Some(base) = self.base else { return };
        if addr < base || count == 0 {
            return;
        }
        let first = ((addr.as_u64() - base.as_u64()) as usize) / PAGE_SIZE;
        if first + count > POOL_PAGES {
            return;
        }
        self.used &= !(run_mask(count) << first);
    }

    pub fn free_count(&self) -> usize {
        if self.base.is_none() {
            return 0;
        }
        POOL_PAGES - self.used.count_ones() as usize
    }
}

fn run_mask(count: usize) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

/// Pick a pool window from the usable-memory map: the first page-aligned run
/// of `POOL_PAGES` pages that sits above 1 MiB and ends below 4 GiB.
pub fn pick_window(regions: &[(u64, u64)]) -> Option<PhysAddr> {
    let pool_bytes = (POOL_PAGES * PAGE_SIZE) as u64;
    regions.iter().find_map(|&(base, len)| {
        let start = align_up(base.max(LOW_MEMORY_END), PAGE_SIZE as u64);
        let end = (base + len).min(DMA32_LIMIT);
        (start + pool_bytes <= end).then_some(PhysAddr::new(start))
    })
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Global DMA pool, filled in during boot.
pub static DMA_POOL: Mutex<PagePool> = Mutex::new(PagePool::empty());
