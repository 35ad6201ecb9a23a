/// Simulated RTL8139 for host tests.
///
/// Models the register file, DMA memory and the receive/transmit engines
/// closely enough to drive the real driver code: RST self-clears, ISR is
/// write-1-to-clear, CR.BUFE tracks the ring, CAPR moves the read pointer,
/// and a TSD write with OWN clear "transmits" the frame out of simulated
/// DMA memory.
use std::cell::RefCell;
use std::rc::Rc;
use std::vec::Vec;

use super::hal::{DmaAllocator, DmaRegion, RegisterIo};
use super::regs::{self, Command, Interrupt, RxStatus, TxStatus};
use super::ring::{self, HEADER_LEN, RING_LEN};
use super::{CRC_LEN, MIN_FRAME_LEN, TX_SLOTS};
use crate::mem::AllocError;

/// Bus address of byte 0 of simulated DMA memory.
pub const SIM_BUS_BASE: u32 = 0x0010_0000;

const SIM_MEM_LEN: usize = 256 * 1024;

/// Bytes the simulated MAC appends in place of a real CRC.
const FAKE_CRC: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];

/// How the transmit engine finishes a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Complete,
    Underrun,
    Abort,
    CarrierLost,
    /// Never completes: the slot stays device-owned.
    Hang,
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>>>;

struct SimState {
    mem: Vec<u8>,
    next_free: usize,
    live_regions: usize,
    fail_alloc: bool,

    mac: [u8; 6],
    cmd: Command,
    /// CR reads before RST clears; `None` means it never does.
    reset_delay: Option<u32>,
    reset_left: Option<u32>,
    isr: Interrupt,
    imr: u16,
    tcr: u32,
    rcr: u32,
    config1: u8,
    rbstart: u32,
    capr: u16,
    capr_writes: Vec<u16>,
    rx_write: usize,
    rx_unread: usize,
    tsd: [u32; TX_SLOTS],
    tsad: [u32; TX_SLOTS],

    tx_mode: TxMode,
    loopback: bool,
    responder: Option<Responder>,
    transmitted: Vec<Vec<u8>>,
    dropped: usize,
}

impl SimState {
    fn new(mac: [u8; 6]) -> Self {
        Self {
            mem: vec![0xA5; SIM_MEM_LEN],
            next_free: 0,
            live_regions: 0,
            fail_alloc: false,
            mac,
            cmd: Command::empty(),
            reset_delay: Some(3),
            reset_left: None,
            isr: Interrupt::empty(),
            imr: 0,
            tcr: 0,
            rcr: 0,
            config1: 0x60,
            rbstart: 0,
            capr: 0xFFF0,
            capr_writes: Vec::new(),
            rx_write: 0,
            rx_unread: 0,
            tsd: [0; TX_SLOTS],
            tsad: [0; TX_SLOTS],
            tx_mode: TxMode::Complete,
            loopback: false,
            responder: None,
            transmitted: Vec::new(),
            dropped: 0,
        }
    }

    // ---- DMA memory ----

    fn alloc(&mut self, len: usize) -> Result<(usize, usize), AllocError> {
        if len == 0 {
            return Err(AllocError::InvalidSize);
        }
        if self.fail_alloc {
            return Err(AllocError::OutOfMemory);
        }
        let span = (len + 15) & !15;
        if self.next_free + span > self.mem.len() {
            return Err(AllocError::OutOfMemory);
        }
        let offset = self.next_free;
        self.next_free += span;
        self.live_regions += 1;
        // Allocations are handed out zeroed.
        self.mem[offset..offset + span].fill(0);
        Ok((offset, span))
    }

    fn release(&mut self, offset: usize, span: usize) {
        self.live_regions -= 1;
        // Bump allocator: only the most recent allocation is rolled back.
        if offset + span == self.next_free {
            self.next_free = offset;
        }
    }

    fn phys_offset(&self, bus: u32) -> usize {
        (bus - SIM_BUS_BASE) as usize
    }

    // ---- Registers ----

    fn software_reset(&mut self) {
        self.cmd = Command::RST;
        self.reset_left = self.reset_delay;
        self.isr = Interrupt::empty();
        self.imr = 0;
        self.capr = 0xFFF0;
        self.rx_write = 0;
        self.rx_unread = 0;
        self.tsd = [TxStatus::OWN.bits(); TX_SLOTS];
        self.tsad = [0; TX_SLOTS];
    }

    fn read8(&mut self, reg: u16) -> u8 {
        match reg {
            r if r < regs::IDR0 + 6 => self.mac[(r - regs::IDR0) as usize],
            regs::CR => {
                if self.cmd.contains(Command::RST) {
                    match self.reset_left {
                        Some(0) => self.cmd.remove(Command::RST),
                        Some(n) => self.reset_left = Some(n - 1),
                        None => {}
                    }
                }
                let mut cr = self.cmd;
                if self.rx_unread == 0 {
                    cr |= Command::BUFE;
                }
                cr.bits()
            }
            regs::CONFIG1 => self.config1,
            _ => 0,
        }
    }

    fn write8(&mut self, reg: u16, val: u8) {
        match reg {
            regs::CR => {
                let cmd = Command::from_bits_retain(val);
                if cmd.contains(Command::RST) {
                    self.software_reset();
                    return;
                }
                let next = cmd & (Command::TE | Command::RE);
                if !self.cmd.contains(Command::RE) && next.contains(Command::RE) {
                    // Enabling the receiver restarts it at the ring base.
                    self.rx_write = 0;
                    self.rx_unread = 0;
                }
                self.cmd = next;
            }
            regs::CONFIG1 => self.config1 = val,
            _ => {}
        }
    }

    fn read16(&mut self, reg: u16) -> u16 {
        match reg {
            regs::ISR => self.isr.bits(),
            regs::IMR => self.imr,
            regs::CAPR => self.capr,
            regs::CBR => self.rx_write as u16,
            _ => 0,
        }
    }

    fn write16(&mut self, reg: u16, val: u16) {
        match reg {
            regs::ISR => self.isr &= !Interrupt::from_bits_retain(val),
            regs::IMR => self.imr = val,
            regs::CAPR => {
                self.capr = val;
                self.capr_writes.push(val);
                let read = val.wrapping_add(16) as usize % RING_LEN;
                self.rx_unread = (self.rx_write + RING_LEN - read) % RING_LEN;
            }
            _ => {}
        }
    }

    fn read32(&mut self, reg: u16) -> u32 {
        match reg {
            regs::RBSTART => self.rbstart,
            regs::TCR => self.tcr,
            regs::RCR => self.rcr,
            r if (regs::TSD0..regs::TSD0 + 16).contains(&r) => self.tsd[((r - regs::TSD0) / 4) as usize],
            r if (regs::TSAD0..regs::TSAD0 + 16).contains(&r) => self.tsad[((r - regs::TSAD0) / 4) as usize],
            _ => 0,
        }
    }

    fn write32(&mut self, reg: u16, val: u32) {
        match reg {
            regs::RBSTART => self.rbstart = val,
            regs::TCR => self.tcr = val,
            regs::RCR => self.rcr = val,
            r if (regs::TSD0..regs::TSD0 + 16).contains(&r) => {
                self.write_tsd(((r - regs::TSD0) / 4) as usize, val)
            }
            r if (regs::TSAD0..regs::TSAD0 + 16).contains(&r) => {
                self.tsad[((r - regs::TSAD0) / 4) as usize] = val
            }
            _ => {}
        }
    }

    // ---- Transmit engine ----

    fn write_tsd(&mut self, slot: usize, val: u32) {
        if TxStatus::from_bits_retain(val).contains(TxStatus::OWN) {
            // Host keeps the descriptor; nothing to send.
            self.tsd[slot] = val & (TxStatus::OWN.bits() | regs::TX_SIZE_MASK);
            return;
        }

        let size = val & regs::TX_SIZE_MASK;
        self.tsd[slot] = size;
        if !self.cmd.contains(Command::TE) || self.tx_mode == TxMode::Hang {
            return;
        }

        let start = self.phys_offset(self.tsad[slot]);
        let frame = self.mem[start..start + size as usize].to_vec();
        self.transmitted.push(frame.clone());

        let (status, isr) = match self.tx_mode {
            TxMode::Complete => (TxStatus::OWN | TxStatus::TOK, Interrupt::TOK),
            TxMode::Underrun => (TxStatus::OWN | TxStatus::TUN, Interrupt::TER),
            TxMode::Abort => (TxStatus::OWN | TxStatus::TABT, Interrupt::TER),
            TxMode::CarrierLost => (TxStatus::OWN | TxStatus::CRS, Interrupt::TER),
            TxMode::Hang => unreachable!(),
        };
        self.tsd[slot] = size | status.bits();
        self.isr |= isr;

        if self.tx_mode != TxMode::Complete {
            return;
        }
        if self.loopback {
            self.deliver(&frame);
        }
        if let Some(mut respond) = self.responder.take() {
            for reply in respond(&frame) {
                self.deliver(&reply);
            }
            self.responder = Some(respond);
        }
    }

    // ---- Receive engine ----

    fn deliver(&mut self, frame: &[u8]) -> bool {
        // Senders pad runts before they reach the wire.
        let mut padded = [0u8; MIN_FRAME_LEN];
        let frame = if frame.len() < MIN_FRAME_LEN {
            padded[..frame.len()].copy_from_slice(frame);
            &padded[..]
        } else {
            frame
        };

        if !self.cmd.contains(Command::RE) {
            self.dropped += 1;
            return false;
        }
        let length = frame.len() + CRC_LEN;
        let span = (HEADER_LEN + length + 3) & !3;
        if self.rx_unread + span >= RING_LEN {
            self.isr |= Interrupt::RXOVW;
            self.dropped += 1;
            return false;
        }

        let mut entry = Vec::with_capacity(HEADER_LEN + length);
        entry.extend_from_slice(&RxStatus::ROK.bits().to_le_bytes());
        entry.extend_from_slice(&(length as u16).to_le_bytes());
        entry.extend_from_slice(frame);
        entry.extend_from_slice(&FAKE_CRC);
        self.write_ring(&entry);

        self.rx_write = ring::next_cursor(self.rx_write, length);
        self.rx_unread += span;
        self.isr |= Interrupt::ROK;
        true
    }

    /// Write at the device write pointer. With WRAP the bytes simply run on
    /// past the ring end into the margin.
    fn write_ring(&mut self, bytes: &[u8]) {
        let start = self.phys_offset(self.rbstart) + self.rx_write;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

type Shared = Rc<RefCell<SimState>>;

/// Test-side handle onto the simulated device.
#[derive(Clone)]
pub struct SimNic {
    dev: Shared,
}

impl SimNic {
    pub fn new(mac: [u8; 6]) -> Self {
        Self { dev: Rc::new(RefCell::new(SimState::new(mac))) }
    }

    pub fn registers(&self) -> SimRegisters {
        SimRegisters { dev: self.dev.clone() }
    }

    pub fn dma(&self) -> SimDma {
        SimDma { dev: self.dev.clone() }
    }

    /// Every frame sent out as a TX DMA read (padding included).
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.dev.borrow().transmitted.clone()
    }

    pub fn clear_transmitted(&self) {
        self.dev.borrow_mut().transmitted.clear();
    }

    pub fn set_tx_mode(&self, mode: TxMode) {
        self.dev.borrow_mut().tx_mode = mode;
    }

    /// Echo every transmitted frame back into the receive ring.
    pub fn set_loopback(&self, on: bool) {
        self.dev.borrow_mut().loopback = on;
    }

    /// Frames the closure returns are delivered after each transmit.
    pub fn set_responder(&self, respond: impl FnMut(&[u8]) -> Vec<Vec<u8>> + 'static) {
        self.dev.borrow_mut().responder = Some(Box::new(respond));
    }

    pub fn set_reset_delay(&self, reads: Option<u32>) {
        self.dev.borrow_mut().reset_delay = reads;
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.dev.borrow_mut().fail_alloc = fail;
    }

    /// Put a frame on the wire towards us, padded to the Ethernet minimum.
    pub fn inject(&self, frame: &[u8]) -> bool {
        self.dev.borrow_mut().deliver(frame)
    }

    /// Write a raw header at the device write pointer.
    pub fn inject_header(&self, status: u16, length: u16) {
        let mut dev = self.dev.borrow_mut();
        let mut raw = [0u8; HEADER_LEN];
        raw[..2].copy_from_slice(&status.to_le_bytes());
        raw[2..].copy_from_slice(&length.to_le_bytes());
        dev.write_ring(&raw);
        dev.rx_write += HEADER_LEN;
        dev.rx_unread += HEADER_LEN;
        dev.isr |= Interrupt::ROK;
    }

    pub fn raise(&self, bits: Interrupt) {
        self.dev.borrow_mut().isr |= bits;
    }

    pub fn isr(&self) -> Interrupt {
        self.dev.borrow().isr
    }

    pub fn imr(&self) -> u16 {
        self.dev.borrow().imr
    }

    pub fn set_imr(&self, val: u16) {
        self.dev.borrow_mut().imr = val;
    }

    pub fn command(&self) -> Command {
        self.dev.borrow().cmd
    }

    pub fn tcr(&self) -> u32 {
        self.dev.borrow().tcr
    }

    pub fn rcr(&self) -> u32 {
        self.dev.borrow().rcr
    }

    pub fn rbstart(&self) -> u32 {
        self.dev.borrow().rbstart
    }

    pub fn capr_writes(&self) -> Vec<u16> {
        self.dev.borrow().capr_writes.clone()
    }

    pub fn tsd(&self, slot: usize) -> u32 {
        self.dev.borrow().tsd[slot]
    }

    /// Force a slot's descriptor to a given value (e.g. device-owned).
    pub fn set_tsd(&self, slot: usize, val: u32) {
        self.dev.borrow_mut().tsd[slot] = val;
    }

    pub fn write_pointer(&self) -> usize {
        self.dev.borrow().rx_write
    }

    /// Move the device write pointer without writing a frame.
    pub fn set_write_pointer(&self, offset: usize) {
        let mut dev = self.dev.borrow_mut();
        dev.rx_write = offset;
    }

    pub fn unread(&self) -> usize {
        self.dev.borrow().rx_unread
    }

    pub fn dropped(&self) -> usize {
        self.dev.borrow().dropped
    }

    pub fn live_regions(&self) -> usize {
        self.dev.borrow().live_regions
    }
}

pub struct SimRegisters {
    dev: Shared,
}

impl RegisterIo for SimRegisters {
    fn read8(&mut self, reg: u16) -> u8 {
        self.dev.borrow_mut().read8(reg)
    }

    fn read16(&mut self, reg: u16) -> u16 {
        self.dev.borrow_mut().read16(reg)
    }

    fn read32(&mut self, reg: u16) -> u32 {
        self.dev.borrow_mut().read32(reg)
    }

    fn write8(&mut self, reg: u16, val: u8) {
        self.dev.borrow_mut().write8(reg, val)
    }

    fn write16(&mut self, reg: u16, val: u16) {
        self.dev.borrow_mut().write16(reg, val)
    }

    fn write32(&mut self, reg: u16, val: u32) {
        self.dev.borrow_mut().write32(reg, val)
    }
}

pub struct SimDma {
    dev: Shared,
}

impl DmaAllocator for SimDma {
    type Region = SimRegion;

    fn alloc(&mut self, len: usize) -> Result<SimRegion, AllocError> {
        let (offset, span) = self.dev.borrow_mut().alloc(len)?;
        Ok(SimRegion { dev: self.dev.clone(), offset, span, len })
    }
}

pub struct SimRegion {
    dev: Shared,
    offset: usize,
    span: usize,
    len: usize,
}

impl DmaRegion for SimRegion {
    fn bus_addr(&self) -> u32 {
        SIM_BUS_BASE + self.offset as u32
    }

    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.len, "read exceeds DMA region");
        let start = self.offset + offset;
        dst.copy_from_slice(&self.dev.borrow().mem[start..start + dst.len()]);
    }

    fn write_at(&mut self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "write exceeds DMA region");
        let start = self.offset + offset;
        self.dev.borrow_mut().mem[start..start + src.len()].copy_from_slice(src);
    }

    fn zero(&mut self) {
        let start = self.offset;
        self.dev.borrow_mut().mem[start..start + self.len].fill(0);
    }
}

impl Drop for SimRegion {
    fn drop(&mut self) {
        self.dev.borrow_mut().release(self.offset, self.span);
    }
}
