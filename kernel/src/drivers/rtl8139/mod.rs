/// Realtek RTL8139 driver: polling mode, port I/O.
///
/// The device is discovered over PCI, reset, and then driven purely by
/// polling ISR/CR/TSD; no interrupt handler is ever installed.
///
/// Receive: one contiguous DMA ring the device fills back to back
/// (see `ring`). Transmit: four descriptor slots used round robin. While a
/// slot belongs to the device its scratch buffer is parked in
/// `tx_inflight[slot]`; it is dropped (returned to the DMA pool) only once
/// TSD.OWN says the device is done reading it.
mod hal;
pub mod regs;
mod ring;

#[cfg(test)]
pub(crate) mod sim;

use core::fmt;

use log::{debug, info, warn};

use crate::drivers::pci::{self, ConfigSpace, PciDevice};
use crate::mem::AllocError;
use regs::{Command, Interrupt, RxStatus, TxStatus};
use ring::RxRing;

pub use hal::{DmaAllocator, DmaRegion, RegisterIo};
#[cfg(not(test))]
pub use hal::{KernelDma, PortRegisters};
pub use ring::{RING_ALLOC, RING_LEN};

pub const VENDOR_ID: u16 = 0x10EC;
pub const DEVICE_ID: u16 = 0x8139;

/// Transmit descriptor slots.
pub const TX_SLOTS: usize = 4;

/// Largest frame `send` accepts (without CRC).
pub const MAX_FRAME_LEN: usize = 1792;

/// Ethernet minimum without CRC. The RTL8139 does not pad on its own.
pub const MIN_FRAME_LEN: usize = 60;

/// Trailing CRC the device counts in the receive length field.
pub const CRC_LEN: usize = 4;

/// Smallest valid length field: minimum frame plus CRC.
pub const MIN_WIRE_LEN: usize = MIN_FRAME_LEN + CRC_LEN;

/// Poll budgets, in register reads.
const RESET_SPINS: u32 = 100_000;
const TX_RECLAIM_SPINS: u32 = 100;
const TX_COMPLETE_SPINS: u32 = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NicError {
    DeviceNotFound,
    ResetTimeout,
    OutOfMemory(AllocError),
    EmptyFrame,
    FrameTooLarge(usize),
    NoFreeSlot,
    TxUnderrun,
    TxAborted,
    TxCarrierLost,
    TxTimeout,
    /// Header status without ROK or with error bits.
    RxCorrupt(u16),
    /// Header length outside `[MIN_WIRE_LEN, MAX_FRAME_LEN + CRC_LEN]`.
    RxBadLength(usize),
    /// Frame dropped: caller's buffer too small.
    BufferTooSmall { frame: usize, buffer: usize },
    /// Receiver was reset after an overflow/error; poll again later.
    RxReset,
}

impl NicError {
    /// Errors the caller should treat as "nothing received yet".
    pub fn is_transient(&self) -> bool {
        matches!(self, NicError::RxReset)
    }
}

impl fmt::Display for NicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NicError::DeviceNotFound => write!(f, "rtl8139 not found on PCI bus"),
            NicError::ResetTimeout => write!(f, "software reset did not complete"),
            NicError::OutOfMemory(e) => write!(f, "DMA allocation failed: {}", e),
            NicError::EmptyFrame => write!(f, "empty frame"),
            NicError::FrameTooLarge(len) => write!(f, "frame of {} bytes exceeds {} byte MTU", len, MAX_FRAME_LEN),
            NicError::NoFreeSlot => write!(f, "all transmit slots owned by the device"),
            NicError::TxUnderrun => write!(f, "transmit FIFO underrun"),
            NicError::TxAborted => write!(f, "transmit aborted (excessive collisions)"),
            NicError::TxCarrierLost => write!(f, "carrier lost during transmit"),
            NicError::TxTimeout => write!(f, "transmit completion timeout"),
            NicError::RxCorrupt(status) => write!(f, "corrupt frame (rx status {:#06x})", status),
            NicError::RxBadLength(len) => write!(f, "invalid frame length {}", len),
            NicError::BufferTooSmall { frame, buffer } => {
                write!(f, "{} byte frame does not fit {} byte buffer", frame, buffer)
            }
            NicError::RxReset => write!(f, "receiver reset, retry later"),
        }
    }
}

impl From<AllocError> for NicError {
    fn from(e: AllocError) -> Self {
        NicError::OutOfMemory(e)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NicStats {
    pub tx_frames: u64,
    pub tx_errors: u64,
    pub rx_frames: u64,
    pub rx_errors: u64,
    pub rx_resets: u64,
}

/// Locate the NIC on the PCI bus (bus mastering + I/O decoding enabled).
pub fn probe<C: ConfigSpace>(cfg: &mut C) -> Result<PciDevice, NicError> {
    pci::find_device(cfg, VENDOR_ID, DEVICE_ID).ok_or(NicError::DeviceNotFound)
}

pub struct Rtl8139<R: RegisterIo, D: DmaAllocator> {
    io: R,
    dma: D,
    mac: [u8; 6],
    ring: RxRing<D::Region>,
    /// Next slot to try.
    tx_slot: usize,
    /// Scratch buffers the device may still be reading.
    tx_inflight: [Option<D::Region>; TX_SLOTS],
    stats: NicStats,
}

impl<R: RegisterIo, D: DmaAllocator> Rtl8139<R, D> {
    /// Reset and configure the controller. Returns a ready device.
    pub fn init(mut io: R, mut dma: D) -> Result<Self, NicError> {
        // Power on: LWAKE and LWPTN low.
        io.write8(regs::CONFIG1, 0x00);

        Self::software_reset(&mut io)?;

        let mut mac = [0u8; 6];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = io.read8(regs::IDR0 + i as u16);
        }
        if mac == [0; 6] {
            warn!("IDR reads all zeros, using the configured MAC");
            mac = crate::net::config::FALLBACK_MAC;
        }

        let ring = RxRing::new(dma.alloc(RING_ALLOC)?);

        io.write32(regs::RBSTART, ring.bus_addr());
        // TCR/RCR only latch once the corresponding engine is enabled.
        io.write8(regs::CR, (Command::RE | Command::TE).bits());
        io.write32(regs::TCR, regs::TCR_NORMAL.bits());
        io.write32(regs::RCR, regs::RCR_NORMAL.bits());

        // Empty descriptors, owned by the host.
        for slot in 0..TX_SLOTS {
            io.write32(regs::tsad(slot), 0);
            io.write32(regs::tsd(slot), TxStatus::OWN.bits());
        }

        io.write16(regs::CAPR, ring.capr());
        io.write16(regs::IMR, regs::IMR_NORMAL.bits());
        io.write16(regs::ISR, 0xFFFF);

        info!(
            "ready, MAC {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}, rx ring at {:#x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5], ring.bus_addr()
        );

        Ok(Self {
            io,
            dma,
            mac,
            ring,
            tx_slot: 0,
            tx_inflight: core::array::from_fn(|_| None),
            stats: NicStats::default(),
        })
    }

    /// Set CR.RST and wait for the chip to clear it.
    fn software_reset(io: &mut R) -> Result<(), NicError> {
        io.write8(regs::CR, Command::RST.bits());
        for _ in 0..RESET_SPINS {
            if !Command::from_bits_retain(io.read8(regs::CR)).contains(Command::RST) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        warn!("reset timeout");
        Err(NicError::ResetTimeout)
    }

    /// Station address from IDR0..5.
    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn stats(&self) -> NicStats {
        self.stats
    }

    pub fn tx_slot(&self) -> usize {
        self.tx_slot
    }

    pub fn rx_cursor(&self) -> usize {
        self.ring.cursor()
    }

    // ---- Transmit ----

    /// Transmit one frame and wait for the device to report the outcome.
    ///
    /// Frames shorter than 60 bytes are zero padded on the wire. Returns
    /// the caller's frame length.
    pub fn send(&mut self, frame: &[u8]) -> Result<usize, NicError> {
        if frame.is_empty() {
            return Err(NicError::EmptyFrame);
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(NicError::FrameTooLarge(frame.len()));
        }

        let slot = self.claim_slot()?;

        let wire_len = frame.len().max(MIN_FRAME_LEN);
        let mut scratch = self.dma.alloc(wire_len)?;
        scratch.write_at(0, frame);
        debug_assert_eq!(scratch.bus_addr() & 3, 0, "TSAD must be dword aligned");

        debug!("tx {} bytes on slot {}", frame.len(), slot);
        self.io.write32(regs::tsad(slot), scratch.bus_addr());
        // Size with OWN clear: the descriptor now belongs to the device.
        self.io.write32(regs::tsd(slot), wire_len as u32 & regs::TX_SIZE_MASK);
        self.tx_inflight[slot] = Some(scratch);

        let outcome = self.wait_tx_done(slot);
        self.tx_slot = (slot + 1) % TX_SLOTS;

        match outcome {
            Ok(()) => {
                self.stats.tx_frames += 1;
                Ok(frame.len())
            }
            Err(e) => {
                self.stats.tx_errors += 1;
                warn!("tx on slot {} failed: {}", slot, e);
                Err(e)
            }
        }
    }

    /// Find a slot the host owns, starting at `tx_slot`. Each slot is
    /// tried once.
    fn claim_slot(&mut self) -> Result<usize, NicError> {
        for step in 0..TX_SLOTS {
            let slot = (self.tx_slot + step) % TX_SLOTS;
            if self.reclaim(slot) {
                self.tx_slot = slot;
                return Ok(slot);
            }
            warn!("tx slot {} still owned by the device, trying next", slot);
        }
        Err(NicError::NoFreeSlot)
    }

    /// Make sure the host owns `slot`, dropping any buffer parked there.
    fn reclaim(&mut self, slot: usize) -> bool {
        if self.host_owns(slot) {
            self.tx_inflight[slot] = None;
            return true;
        }

        // Acknowledge stale completion bits and give the device a moment.
        self.io.write16(regs::ISR, Interrupt::TX_DONE.bits());
        for _ in 0..TX_RECLAIM_SPINS {
            if self.host_owns(slot) {
                self.tx_inflight[slot] = None;
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }

    fn host_owns(&mut self, slot: usize) -> bool {
        TxStatus::from_bits_retain(self.io.read32(regs::tsd(slot))).contains(TxStatus::OWN)
    }

    /// Poll TSD until the frame is sent or failed.
    fn wait_tx_done(&mut self, slot: usize) -> Result<(), NicError> {
        let terminal = TxStatus::TOK | TxStatus::TUN | TxStatus::TABT | TxStatus::CRS;

        for _ in 0..TX_COMPLETE_SPINS {
            let status = TxStatus::from_bits_retain(self.io.read32(regs::tsd(slot)));

            if status.contains(TxStatus::OWN) {
                // DMA finished; the device no longer reads the buffer.
                self.tx_inflight[slot] = None;
            }
            if status.intersects(terminal) {
                self.io.write16(regs::ISR, Interrupt::TX_DONE.bits());
                return classify_tx(status);
            }
            core::hint::spin_loop();
        }

        // The buffer stays parked until the slot is reclaimed.
        Err(NicError::TxTimeout)
    }

    // ---- Receive ----

    /// Poll for one frame. `Ok(0)` means the ring is empty.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, NicError> {
        let isr = Interrupt::from_bits_retain(self.io.read16(regs::ISR));

        if isr.intersects(Interrupt::RX_ERRORS) {
            warn!(
                "rx error:{}{}{}",
                if isr.contains(Interrupt::RER) { " general" } else { "" },
                if isr.contains(Interrupt::RXOVW) { " ring-overflow" } else { "" },
                if isr.contains(Interrupt::FOVW) { " fifo-overflow" } else { "" },
            );
            self.io.write16(regs::ISR, (isr & Interrupt::RX_ERRORS).bits());
            self.reset_receiver();
            return Err(NicError::RxReset);
        }

        if isr.contains(Interrupt::ROK) {
            self.io.write16(regs::ISR, Interrupt::ROK.bits());
        }
        if Command::from_bits_retain(self.io.read8(regs::CR)).contains(Command::BUFE) {
            return Ok(0);
        }

        let (status, length) = self.ring.header();

        if !status.contains(RxStatus::ROK) || status.intersects(RxStatus::ERRORS) {
            warn!("bad rx status {:#06x} at offset {}", status.bits(), self.ring.cursor());
            self.stats.rx_errors += 1;
            self.reset_receiver();
            return Err(NicError::RxCorrupt(status.bits()));
        }
        if !(MIN_WIRE_LEN..=ring::MAX_WIRE_LEN).contains(&length) {
            warn!("bad rx length {} at offset {}", length, self.ring.cursor());
            self.stats.rx_errors += 1;
            self.reset_receiver();
            return Err(NicError::RxBadLength(length));
        }

        let frame_len = length - CRC_LEN;
        if frame_len > buf.len() {
            self.consume(length);
            self.stats.rx_errors += 1;
            return Err(NicError::BufferTooSmall { frame: frame_len, buffer: buf.len() });
        }

        self.ring.copy_frame(&mut buf[..frame_len]);
        self.consume(length);
        self.stats.rx_frames += 1;
        debug!("rx {} bytes", frame_len);
        Ok(frame_len)
    }

    /// Step over the frame at the cursor and tell the device.
    fn consume(&mut self, length: usize) {
        self.ring.advance(length);
        self.io.write16(regs::CAPR, self.ring.capr());
    }

    /// Disable RE, reprogram the ring, rewind the cursor, enable RE.
    fn reset_receiver(&mut self) {
        let cmd = Command::from_bits_retain(self.io.read8(regs::CR)) & (Command::TE | Command::RE);
        self.io.write8(regs::CR, (cmd - Command::RE).bits());
        self.io.write32(regs::RBSTART, self.ring.bus_addr());
        self.io.write32(regs::RCR, regs::RCR_NORMAL.bits());
        self.ring.reset();
        self.io.write16(regs::CAPR, self.ring.capr());
        self.io.write8(regs::CR, (cmd | Command::RE).bits());
        self.stats.rx_resets += 1;
    }
}

/// Outcome of a finished transmit. Success wins over error bits.
fn classify_tx(status: TxStatus) -> Result<(), NicError> {
    if status.contains(TxStatus::TOK) {
        Ok(())
    } else if status.intersects(TxStatus::TABT | TxStatus::OWC) {
        Err(NicError::TxAborted)
    } else if status.contains(TxStatus::TUN) {
        Err(NicError::TxUnderrun)
    } else {
        Err(NicError::TxCarrierLost)
    }
}
