/// RTL8139 register map (I/O space offsets) and bit definitions.
use bitflags::bitflags;

pub const IDR0: u16 = 0x00;     // MAC address, 6 bytes
pub const TSD0: u16 = 0x10;     // Transmit status of descriptor 0..3 (32-bit each)
pub const TSAD0: u16 = 0x20;    // Transmit start address of descriptor 0..3
pub const RBSTART: u16 = 0x30;  // Receive buffer start (physical)
pub const CR: u16 = 0x37;       // Command
pub const CAPR: u16 = 0x38;     // Current address of packet read
pub const CBR: u16 = 0x3A;      // Current buffer address (device write pointer)
pub const IMR: u16 = 0x3C;      // Interrupt mask
pub const ISR: u16 = 0x3E;      // Interrupt status (write 1 to clear)
pub const TCR: u16 = 0x40;      // Transmit configuration
pub const RCR: u16 = 0x44;      // Receive configuration
pub const CONFIG1: u16 = 0x52;

/// Status register of transmit descriptor `slot`.
pub const fn tsd(slot: usize) -> u16 {
    TSD0 + 4 * slot as u16
}

/// Start-address register of transmit descriptor `slot`.
pub const fn tsad(slot: usize) -> u16 {
    TSAD0 + 4 * slot as u16
}

bitflags! {
    /// CR (0x37).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Command: u8 {
        /// Receive ring empty.
        const BUFE = 0x01;
        const TE = 0x04;
        const RE = 0x08;
        const RST = 0x10;
    }
}

bitflags! {
    /// ISR/IMR (0x3E/0x3C).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupt: u16 {
        const ROK = 0x0001;
        const RER = 0x0002;
        const TOK = 0x0004;
        const TER = 0x0008;
        /// Receive ring overflow.
        const RXOVW = 0x0010;
        const LINK_CHG = 0x0020;
        /// Receive FIFO overflow.
        const FOVW = 0x0040;
        const LEN_CHG = 0x2000;
        const TIMEOUT = 0x4000;
        const SERR = 0x8000;

        const RX_ERRORS = Self::RER.bits() | Self::RXOVW.bits() | Self::FOVW.bits();
        const TX_DONE = Self::TOK.bits() | Self::TER.bits();
    }
}

bitflags! {
    /// TSD0..3. The low 13 bits carry the frame size.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxStatus: u32 {
        /// Set by the device once DMA from the buffer is done: the host owns
        /// the descriptor again. Writing a size with OWN clear hands it over.
        const OWN = 1 << 13;
        const TUN = 1 << 14;
        const TOK = 1 << 15;
        const OWC = 1 << 29;
        const TABT = 1 << 30;
        const CRS = 1 << 31;

        const ERRORS = Self::TUN.bits() | Self::OWC.bits() | Self::TABT.bits() | Self::CRS.bits();
    }
}

pub const TX_SIZE_MASK: u32 = 0x1FFF;

bitflags! {
    /// Status half of the 4-byte header the device writes before each frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxStatus: u16 {
        const ROK = 0x0001;
        const FAE = 0x0002;
        const CRC = 0x0004;
        const LONG = 0x0008;
        const RUNT = 0x0010;
        const ISE = 0x0020;
        const BAR = 0x2000;
        const PAM = 0x4000;
        const MAR = 0x8000;

        const ERRORS = Self::FAE.bits() | Self::CRC.bits() | Self::LONG.bits()
            | Self::RUNT.bits() | Self::ISE.bits();
    }
}

bitflags! {
    /// TCR (0x40).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxConfig: u32 {
        /// Clear abort: retransmit after a TABT.
        const CLRABT = 1 << 0;
        /// Retry count 16 + 16 * 8.
        const TXRR_8 = 8 << 4;
        const MXDMA_1024 = 6 << 8;
        /// Suppress CRC append. Left clear.
        const NOCRC = 1 << 16;
        const IFG_96 = 3 << 24;
    }
}

bitflags! {
    /// RCR (0x44).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxConfig: u32 {
        const AAP = 1 << 0;
        const APM = 1 << 1;
        const AM = 1 << 2;
        const AB = 1 << 3;
        /// Let a frame run past the ring end instead of splitting it.
        const WRAP = 1 << 7;
        const MXDMA_UNLIMITED = 7 << 8;
        // RBLEN = 00: 8K + 16 ring.
        const RXFTH_NONE = 7 << 13;
    }
}

/// TCR value programmed at init.
pub const TCR_NORMAL: TxConfig = TxConfig::IFG_96
    .union(TxConfig::MXDMA_1024)
    .union(TxConfig::TXRR_8);

/// RCR value programmed at init.
pub const RCR_NORMAL: RxConfig = RxConfig::AAP
    .union(RxConfig::APM)
    .union(RxConfig::AM)
    .union(RxConfig::AB)
    .union(RxConfig::WRAP)
    .union(RxConfig::MXDMA_UNLIMITED)
    .union(RxConfig::RXFTH_NONE);

/// IMR value. Nothing services the interrupt line; this only selects which
/// ISR bits the device asserts, and the driver polls ISR itself.
pub const IMR_NORMAL: Interrupt = Interrupt::ROK
    .union(Interrupt::TOK)
    .union(Interrupt::RER)
    .union(Interrupt::TER)
    .union(Interrupt::RXOVW)
    .union(Interrupt::FOVW)
    .union(Interrupt::LINK_CHG);
