//! opnet kernel entry point.
//!
//! Booted by the Limine bootloader. Limine sets up long mode, page tables
//! (kernel in upper 2 GiB + HHDM for all physical memory), and jumps to kmain.
//! The kernel brings up the RTL8139, optionally pings the gateway, then
//! services ARP/ICMP forever.
#![no_std]
#![no_main]

use limine::BaseRevision;
use limine::memory_map::EntryType;
use limine::request::{
    HhdmRequest, MemoryMapRequest,
    RequestsEndMarker, RequestsStartMarker,
};

use opnet_kernel::arch::x86_64::{self, cpu, serial, timer};
use opnet_kernel::mem::{self, pool, DMA_POOL};
use opnet_kernel::net;
use opnet_kernel::serial_println;

use core::panic::PanicInfo;

// ---- Limine requests ----
// Must be #[used] and in .requests section for Limine to discover them.

#[used]
#[link_section = ".requests"]
static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[link_section = ".requests"]
static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[link_section = ".requests"]
static MEMMAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[link_section = ".requests_start_marker"]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();

#[used]
#[link_section = ".requests_end_marker"]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

/// Upper bound on usable regions taken from the memory map.
const MAX_REGIONS: usize = 64;

/// Kernel entry point, called by Limine after setting up long mode,
/// page tables (HHDM + kernel higher-half), and a stack.
#[no_mangle]
pub extern "C" fn kmain() -> ! {
    // 1. Serial console first, then route `log` through it
    serial::SERIAL.lock().init();
    serial::init_logger(log::LevelFilter::Info);
    serial_println!("opnet v0.1.0 booting...");

    // 2. Verify Limine boot protocol
    assert!(BASE_REVISION.is_supported(), "Limine base revision not supported");

    // 3. HHDM offset: every PhysAddr::as_ptr() goes through it
    let Some(hhdm) = HHDM_REQUEST.get_response() else {
        panic!("Limine HHDM response missing");
    };
    mem::set_hhdm_offset(hhdm.offset());
    serial_println!("[boot] HHDM offset: {:#x}", hhdm.offset());

    // 4. Carve the DMA pool out of usable memory below 4 GiB
    let Some(memmap) = MEMMAP_REQUEST.get_response() else {
        panic!("Limine memory map response missing");
    };

    let mut usable = [(0u64, 0u64); MAX_REGIONS];
    let mut count = 0usize;
    for entry in memmap.entries() {
        if entry.entry_type == EntryType::USABLE && count < usable.len() {
            usable[count] = (entry.base, entry.length);
            count += 1;
        }
    }

    match pool::pick_window(&usable[..count]) {
        Some(base) => {
            DMA_POOL.lock().init(base);
            serial_println!("[mem] DMA pool at {:#x}, {} pages",
                base.as_u64(), DMA_POOL.lock().free_count());
        }
        None => serial_println!("[mem] no usable window below 4 GiB for DMA"),
    }

    // 5. Tick source for the poll loops
    timer::calibrate_tsc();
    serial_println!("[cpu] TSC: {} cycles/ms (invariant: {})",
        timer::tsc_per_ms(), cpu::has_invariant_tsc());

    // 6. Bring up the NIC
    if let Err(e) = net::net_init() {
        serial_println!("[net] init failed: {} (code {})", e, e.code());
    }

    #[cfg(feature = "boot-ping")]
    if net::net_is_initialized() {
        let gateway = net::config::GATEWAY_IP;
        match net::net_ping(gateway) {
            0 => serial_println!("[net] gateway {} is alive", gateway),
            code => serial_println!("[net] ping {} failed ({})", gateway, code),
        }
    }

    serial_println!("opnet boot complete.");

    loop {
        if net::net_poll() == 0 {
            core::hint::spin_loop();
        }
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("!!! KERNEL PANIC !!!");
    serial_println!("{}", info);
    loop {
        x86_64::cli();
        x86_64::hlt();
    }
}
