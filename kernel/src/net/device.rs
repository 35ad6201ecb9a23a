/// Frame-level device seam between the stack and the NIC driver.
use crate::drivers::rtl8139::{DmaAllocator, NicError, RegisterIo, Rtl8139};

/// Something that moves whole Ethernet frames.
pub trait NetDevice {
    /// Transmit one frame; returns the bytes accepted.
    fn send(&mut self, frame: &[u8]) -> Result<usize, NicError>;

    /// Poll for one frame. `Ok(0)` when nothing is pending.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NicError>;

    fn mac(&self) -> [u8; 6];
}

impl<R: RegisterIo, D: DmaAllocator> NetDevice for Rtl8139<R, D> {
    fn send(&mut self, frame: &[u8]) -> Result<usize, NicError> {
        Rtl8139::send(self, frame)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NicError> {
        Rtl8139::receive(self, buf)
    }

    fn mac(&self) -> [u8; 6] {
        Rtl8139::mac(self)
    }
}
