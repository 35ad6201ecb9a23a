/// Tick-based time for the network poll loops.
///
/// One tick is `TICK_MS` milliseconds. Cache expiry and retry spacing are
/// expressed in ticks, never wall-clock time.

/// Length of one tick in milliseconds.
pub const TICK_MS: u64 = 100;

/// Monotonic tick counter plus a busy-wait.
pub trait Clock {
    /// Current tick count.
    fn now(&self) -> u64;

    /// Busy-wait for `ticks` ticks.
    fn delay(&self, ticks: u64);
}

/// Clock backed by the calibrated TSC.
#[cfg(not(test))]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[cfg(not(test))]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        crate::arch::x86_64::timer::ticks()
    }

    fn delay(&self, ticks: u64) {
        crate::arch::x86_64::timer::delay_ticks(ticks)
    }
}

/// Test clock: time only moves when someone waits.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeClock {
    now: core::cell::Cell<u64>,
    delays: core::cell::Cell<u32>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump forward without counting a delay.
    pub fn advance(&self, ticks: u64) {
        self.now.set(self.now.get() + ticks);
    }

    /// Number of `delay` calls so far.
    pub fn delay_count(&self) -> u32 {
        self.delays.get()
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.now.get()
    }

    fn delay(&self, ticks: u64) {
        self.delays.set(self.delays.get() + 1);
        self.advance(ticks);
    }
}

#[cfg(test)]
impl Clock for &FakeClock {
    fn now(&self) -> u64 {
        (**self).now()
    }

    fn delay(&self, ticks: u64) {
        (**self).delay(ticks)
    }
}
