/// Network subsystem: RTL8139 below, ARP + IPv4/ICMP above.
///
/// Architecture:
///   net_* API (this module, one global stack behind a spin lock)
///       ↓ ↑
///   NetStack (ARP cache, resolve, ping, inbound handlers)
///       ↓ ↑
///   NetDevice (whole Ethernet frames)
///       ↓ ↑
///   Rtl8139 driver (polling, port I/O + DMA)
pub mod arp;
pub mod checksum;
pub mod config;
mod device;
pub mod stack;
pub mod wire;


use core::fmt;

use crate::drivers::rtl8139::NicError;

pub use device::NetDevice;
pub use stack::{EchoReply, NetStack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    NotInitialized,
    Device(NicError),
    ResolveTimeout,
    PingTimeout,
}

impl NetError {
    /// Negative status code for the `net_*` entry points.
    pub fn code(&self) -> i32 {
        match self {
            NetError::NotInitialized => -1,
            NetError::Device(e) => match e {
                NicError::DeviceNotFound => -2,
                NicError::ResetTimeout => -3,
                NicError::OutOfMemory(_) => -4,
                NicError::EmptyFrame | NicError::FrameTooLarge(_) => -5,
                NicError::NoFreeSlot => -6,
                NicError::TxUnderrun | NicError::TxAborted | NicError::TxCarrierLost => -7,
                NicError::TxTimeout => -8,
                NicError::RxCorrupt(_) | NicError::RxBadLength(_) => -9,
                NicError::BufferTooSmall { .. } => -10,
                NicError::RxReset => -11,
            },
            NetError::ResolveTimeout => -12,
            NetError::PingTimeout => -13,
        }
    }
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::NotInitialized => write!(f, "network not initialized"),
            NetError::Device(e) => write!(f, "nic: {}", e),
            NetError::ResolveTimeout => write!(f, "address resolution timed out"),
            NetError::PingTimeout => write!(f, "no echo reply"),
        }
    }
}

impl From<NicError> for NetError {
    fn from(e: NicError) -> Self {
        NetError::Device(e)
    }
}

/// Internet checksum of `bytes`.
pub fn net_checksum(bytes: &[u8]) -> u16 {
    checksum::checksum(bytes)
}

#[cfg(not(test))]
pub use self::kernel_api::*;

/// Global instance and the C-style entry points the rest of the kernel
/// calls. Failures come back as negative codes, never panics.
#[cfg(not(test))]
mod kernel_api {
    use log::{error, info};
    use smoltcp::wire::Ipv4Address;
    use spin::Mutex;

    use super::{NetError, NetStack};
    use crate::drivers::pci::PortConfigSpace;
    use crate::drivers::rtl8139::{self, KernelDma, PortRegisters, Rtl8139};
    use crate::time::SystemClock;

    type KernelNic = Rtl8139<PortRegisters, KernelDma>;

    pub static NET: Mutex<Option<NetStack<KernelNic, SystemClock>>> = Mutex::new(None);

    /// Find the NIC, bring it up and install the global stack. No-op if
    /// already up.
    pub fn net_init() -> Result<(), NetError> {
        let mut net = NET.lock();
        if net.is_some() {
            return Ok(());
        }

        let device = rtl8139::probe(&mut PortConfigSpace).map_err(|e| {
            error!("{}", e);
            NetError::from(e)
        })?;

        // SAFETY: the BAR belongs to the NIC we just enabled, and the
        // driver instance below is its only user.
        let regs = unsafe { PortRegisters::new(device.io_base) };
        let nic = Rtl8139::init(regs, KernelDma)?;

        let stack = NetStack::new(nic, SystemClock);
        info!("up: {} at {}", stack.ip(), stack.mac());
        *net = Some(stack);
        Ok(())
    }

    pub fn net_is_initialized() -> bool {
        NET.lock().is_some()
    }

    /// Send a raw frame. Bytes sent, or a negative code.
    pub fn net_send(frame: &[u8]) -> isize {
        match with_stack(|stack| stack.send(frame)) {
            Ok(n) => n as isize,
            Err(e) => e.code() as isize,
        }
    }

    /// Receive a raw frame. 0 when nothing is pending (including right
    /// after the receiver recovered from an error), otherwise the length
    /// or a negative code.
    pub fn net_receive(buf: &mut [u8]) -> isize {
        match with_stack(|stack| stack.receive(buf)) {
            Ok(n) => n as isize,
            Err(NetError::Device(e)) if e.is_transient() => 0,
            Err(e) => e.code() as isize,
        }
    }

    /// 0 on reply, negative code otherwise.
    pub fn net_ping(dest: Ipv4Address) -> i32 {
        match with_stack(|stack| stack.ping(dest)) {
            Ok(_) => 0,
            Err(e) => e.code(),
        }
    }

    /// Service inbound ARP/ICMP without waiting.
    pub fn net_poll() -> usize {
        with_stack(|stack| Ok(stack.poll())).unwrap_or(0)
    }

    fn with_stack<T>(
        f: impl FnOnce(&mut NetStack<KernelNic, SystemClock>) -> Result<T, NetError>,
    ) -> Result<T, NetError> {
        let mut net = NET.lock();
        let stack = net.as_mut().ok_or(NetError::NotInitialized)?;
        f(stack)
    }
}
