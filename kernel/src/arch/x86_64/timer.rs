/// Tick source: PIT-calibrated TSC.
///
/// The network poll loops count time in ticks (see `crate::time`). There is
/// no timer interrupt wired up, so ticks are derived from the TSC:
///   1. Gate PIT channel 2 for a ~10 ms one-shot countdown (no IRQ needed)
///   2. Measure how many TSC cycles elapse meanwhile
///   3. ticks = (rdtsc - boot_tsc) / cycles_per_tick
use core::sync::atomic::{AtomicU64, Ordering};

use super::{outb, inb};
use super::cpu::rdtsc;
use crate::time::TICK_MS;

/// TSC cycles per millisecond. Default assumes a 2 GHz TSC until calibrated.
static TSC_PER_MS: AtomicU64 = AtomicU64::new(2_000_000);

/// TSC value captured at the end of calibration.
static BOOT_TSC: AtomicU64 = AtomicU64::new(0);

const PIT_CH2_DATA: u16 = 0x42;
const PIT_CMD: u16 = 0x43;
const PIT_GATE: u16 = 0x61;

/// PIT oscillator frequency: 1,193,182 Hz.
const PIT_FREQ: u64 = 1_193_182;

/// PIT reload for a ~10 ms window.
const CALIBRATION_COUNT: u16 = 11_932;

/// Calibrate the TSC against PIT channel 2 in one-shot mode.
///
/// Must be called once during boot with interrupts disabled.
pub fn calibrate_tsc() {
    let window_us = (CALIBRATION_COUNT as u64 * 1_000_000) / PIT_FREQ;

    // Gate low, speaker off.
    let gate = inb(PIT_GATE);
    outb(PIT_GATE, (gate & !0x02) | 0x01);

    // Channel 2, lobyte/hibyte, mode 0, binary.
    outb(PIT_CMD, 0xB0);
    outb(PIT_CH2_DATA, (CALIBRATION_COUNT & 0xFF) as u8);
    outb(PIT_CH2_DATA, (CALIBRATION_COUNT >> 8) as u8);

    // Rising edge on the gate starts the countdown.
    let gate = inb(PIT_GATE);
    outb(PIT_GATE, gate & !0x01);
    outb(PIT_GATE, gate | 0x01);

    let start = rdtsc();
    while inb(PIT_GATE) & 0x20 == 0 {
        core::hint::spin_loop();
    }
    let end = rdtsc();

    let per_ms = ((end - start) * 1000) / window_us.max(1);
    if per_ms != 0 {
        TSC_PER_MS.store(per_ms, Ordering::Release);
    }
    BOOT_TSC.store(end, Ordering::Release);
}

/// Calibrated TSC cycles per millisecond.
pub fn tsc_per_ms() -> u64 {
    TSC_PER_MS.load(Ordering::Acquire)
}

/// Milliseconds since calibration.
pub fn monotonic_ms() -> u64 {
    let boot = BOOT_TSC.load(Ordering::Acquire);
    let per_ms = TSC_PER_MS.load(Ordering::Acquire);
    rdtsc().saturating_sub(boot) / per_ms
}

/// Ticks since calibration.
pub fn ticks() -> u64 {
    monotonic_ms() / TICK_MS
}

/// Busy-wait for `n` ticks.
pub fn delay_ticks(n: u64) {
    let target = rdtsc() + n * TICK_MS * tsc_per_ms();
    while rdtsc() < target {
        core::hint::spin_loop();
    }
}
