/// PCI configuration space access and device discovery.
///
/// Configuration mechanism #1: write the target address to 0xCF8, then
/// read/write the dword at 0xCFC. Access goes through the `ConfigSpace`
/// trait so discovery can run against a fake bus in tests.
use core::fmt;

/// Configuration register offsets (type 0 header).
mod regs {
    pub const VENDOR_DEVICE: u8 = 0x00;
    pub const COMMAND: u8 = 0x04;
    pub const HEADER_TYPE: u8 = 0x0C; // byte 2 of this dword
    pub const BAR0: u8 = 0x10;
    pub const INTERRUPT_LINE: u8 = 0x3C;
}

/// Command register bits.
const CMD_IO_SPACE: u32 = 1 << 0;
const CMD_BUS_MASTER: u32 = 1 << 2;

const BAR_COUNT: u8 = 6;
const MULTI_FUNCTION: u32 = 0x80 << 16;

/// Bus/device/function triple.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self { bus, device, function }
    }

    /// Value written to CONFIG_ADDRESS for `offset`.
    pub fn config_address(self, offset: u8) -> u32 {
        0x8000_0000
            | ((self.bus as u32) << 16)
            | ((self.device as u32) << 11)
            | ((self.function as u32) << 8)
            | ((offset as u32) & 0xFC)
    }
}

impl fmt::Debug for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// Raw 32-bit configuration space access.
pub trait ConfigSpace {
    fn read32(&mut self, addr: PciAddress, offset: u8) -> u32;
    fn write32(&mut self, addr: PciAddress, offset: u8, val: u32);
}

/// Port I/O implementation (0xCF8/0xCFC).
#[cfg(not(test))]
pub struct PortConfigSpace;

#[cfg(not(test))]
impl ConfigSpace for PortConfigSpace {
    fn read32(&mut self, addr: PciAddress, offset: u8) -> u32 {
        use crate::arch::x86_64::{inl, outl};
        outl(0xCF8, addr.config_address(offset));
        inl(0xCFC)
    }

    fn write32(&mut self, addr: PciAddress, offset: u8, val: u32) {
        use crate::arch::x86_64::outl;
        outl(0xCF8, addr.config_address(offset));
        outl(0xCFC, val);
    }
}

/// A discovered device, already enabled for I/O and bus mastering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    pub address: PciAddress,
    pub vendor_id: u16,
    pub device_id: u16,
    /// Base of the first I/O-space BAR.
    pub io_base: u16,
    pub irq_line: u8,
}

/// Scan every bus/device/function for `vendor_id:device_id`.
///
/// On the first match with an I/O BAR, enables I/O space decoding and bus
/// mastering and returns the device. `None` after a full scan; callers do
/// not rescan.
pub fn find_device<C: ConfigSpace>(cfg: &mut C, vendor_id: u16, device_id: u16) -> Option<PciDevice> {
    for bus in 0..=255u8 {
        for device in 0..32u8 {
            let func0 = PciAddress::new(bus, device, 0);
            let id = cfg.read32(func0, regs::VENDOR_DEVICE);
            if id & 0xFFFF == 0xFFFF {
                continue;
            }

            let header = cfg.read32(func0, regs::HEADER_TYPE);
            let functions = if header & MULTI_FUNCTION != 0 { 8 } else { 1 };

            for function in 0..functions {
                let addr = PciAddress::new(bus, device, function);
                let id = if function == 0 { id } else { cfg.read32(addr, regs::VENDOR_DEVICE) };
                if (id & 0xFFFF) as u16 != vendor_id || (id >> 16) as u16 != device_id {
                    continue;
                }

                let Some(io_base) = io_bar(cfg, addr) else {
                    log::warn!("{:?} {:04x}:{:04x} has no I/O BAR, skipping", addr, vendor_id, device_id);
                    continue;
                };

                enable_io_and_bus_master(cfg, addr);
                let irq_line = (cfg.read32(addr, regs::INTERRUPT_LINE) & 0xFF) as u8;

                log::info!("found {:04x}:{:04x} at {:?}, I/O base {:#x}", vendor_id, device_id, addr, io_base);
                return Some(PciDevice { address: addr, vendor_id, device_id, io_base, irq_line });
            }
        }
    }

    None
}

/// First I/O-space BAR (bit 0 set), masked to its port base.
fn io_bar<C: ConfigSpace>(cfg: &mut C, addr: PciAddress) -> Option<u16> {
    (0..BAR_COUNT)
        .map(|i| cfg.read32(addr, regs::BAR0 + i * 4))
        .find(|bar| bar & 1 == 1)
        .map(|bar| (bar & !0x3) as u16)
}

/// Set I/O space + bus master. Only the low half is written back so the
/// write-1-to-clear status bits in the upper half are left alone.
fn enable_io_and_bus_master<C: ConfigSpace>(cfg: &mut C, addr: PciAddress) {
    let cmd = cfg.read32(addr, regs::COMMAND) & 0xFFFF;
    cfg.write32(addr, regs::COMMAND, cmd | CMD_IO_SPACE | CMD_BUS_MASTER);
}
