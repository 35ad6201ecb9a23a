/// Receive ring bookkeeping.
///
/// The device DMAs frames back to back into one contiguous buffer, each
/// preceded by a 4-byte header (status u16, length u16, little endian; the
/// length counts the trailing 4-byte CRC). With RCR.WRAP set a frame that
/// starts near the end runs on into the overflow margin instead of being
/// split, so every frame is contiguous in memory.
use super::hal::DmaRegion;
use super::regs::RxStatus;
use super::{CRC_LEN, MAX_FRAME_LEN};

/// Ring size as programmed in RCR.RBLEN (8K + 16).
pub const RING_LEN: usize = 8192;

/// Header written before each frame.
pub const HEADER_LEN: usize = 4;

/// Largest length field we accept: max frame plus CRC.
pub const MAX_WIRE_LEN: usize = MAX_FRAME_LEN + CRC_LEN;

/// Allocation: ring + 16 bytes the RBLEN encoding adds + room for a
/// maximum frame starting at the last aligned offset.
pub const RING_ALLOC: usize = RING_LEN + 16 + 2048;

static_assertions::const_assert!(RING_LEN - 4 + HEADER_LEN + MAX_WIRE_LEN <= RING_ALLOC);

/// Cursor after consuming a frame whose header says `length`: skip header
/// and frame, align to a dword, wrap into `[0, RING_LEN)`.
pub fn next_cursor(cursor: usize, length: usize) -> usize {
    let next = (cursor + HEADER_LEN + length + 3) & !3;
    if next >= RING_LEN {
        next - RING_LEN
    } else {
        next
    }
}

/// CAPR value for `cursor`. The device expects the read pointer 16 bytes
/// behind the real one.
pub fn capr_for(cursor: usize) -> u16 {
    (cursor as u16).wrapping_sub(16)
}

pub struct RxRing<R> {
    buf: R,
    cursor: usize,
}

impl<R: DmaRegion> RxRing<R> {
    pub fn new(mut buf: R) -> Self {
        debug_assert!(buf.len() >= RING_ALLOC);
        buf.zero();
        Self { buf, cursor: 0 }
    }

    pub fn bus_addr(&self) -> u32 {
        self.buf.bus_addr()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Header of the frame at the cursor.
    pub fn header(&self) -> (RxStatus, usize) {
        let mut raw = [0u8; HEADER_LEN];
        self.buf.read_at(self.cursor, &mut raw);
        let status = RxStatus::from_bits_retain(u16::from_le_bytes([raw[0], raw[1]]));
        let length = u16::from_le_bytes([raw[2], raw[3]]) as usize;
        (status, length)
    }

    /// Copy the first `dst.len()` bytes of the frame at the cursor.
    pub fn copy_frame(&self, dst: &mut [u8]) {
        self.buf.read_at(self.cursor + HEADER_LEN, dst);
    }

    /// Step past the frame at the cursor.
    pub fn advance(&mut self, length: usize) {
        self.cursor = next_cursor(self.cursor, length);
    }

    pub fn capr(&self) -> u16 {
        capr_for(self.cursor)
    }

    /// Back to offset 0 after a receiver reset.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
