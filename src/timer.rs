//! Timers driven by an injected monotonic tick source.
//!
//! Each ISO-TP timing class (N_Ax, N_Bx, N_Cx) gets its own [`Timer`]. All of
//! them read the same [`Clock`], which knows how to turn ticks into time.

/// A free-running tick counter, e.g. a SysTick or LPIT register.
pub trait TickSource {
    fn ticks(&self) -> u32;
}

impl<F> TickSource for F
where
    F: Fn() -> u32,
{
    fn ticks(&self) -> u32 {
        self()
    }
}

/// Whether the tick source counts up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CountDirection {
    #[default]
    Up,
    Down,
}

/// A tick source together with its counting direction and scale.
#[derive(Debug, Clone)]
pub struct Clock<S> {
    source: S,
    direction: CountDirection,
    ticks_per_ms: u32,
}

impl<S: TickSource> Clock<S> {
    /// Creates an up-counting clock with one tick per millisecond.
    pub fn new(source: S) -> Self {
        Self {
            source,
            direction: CountDirection::Up,
            ticks_per_ms: 1,
        }
    }

    pub fn with_direction(mut self, direction: CountDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets how many ticks make one millisecond (e.g. 8 for a 1/8 ms tick).
    /// Zero is treated as one.
    pub fn with_ticks_per_ms(mut self, ticks_per_ms: u32) -> Self {
        self.ticks_per_ms = ticks_per_ms.max(1);
        self
    }

    pub fn direction(&self) -> CountDirection {
        self.direction
    }

    pub fn ticks_per_ms(&self) -> u32 {
        self.ticks_per_ms
    }

    pub fn now(&self) -> u32 {
        self.source.ticks()
    }

    /// Ticks elapsed since `mark`, tolerant of one counter wraparound.
    fn elapsed_ticks(&self, mark: u32) -> u32 {
        let now = self.now();
        match self.direction {
            CountDirection::Up => now.wrapping_sub(mark),
            CountDirection::Down => mark.wrapping_sub(now),
        }
    }

    /// Number of ticks covering at least `period_us` microseconds, capped at
    /// the longest span a `u32` counter can measure.
    fn period_ticks(&self, period_us: u64) -> u32 {
        let ticks = period_us
            .saturating_mul(self.ticks_per_ms as u64)
            .div_ceil(1000);
        ticks.min(u32::MAX as u64) as u32
    }

    /// Busy-waits until `period_us` microseconds have elapsed.
    pub fn delay_us(&self, period_us: u32)
    where
        S: Clone,
    {
        if period_us == 0 {
            return;
        }

        let mut gap = Timer::new(self.clone());
        gap.arm();
        while !gap.has_overflowed_us(period_us as u64) {
            core::hint::spin_loop();
        }
    }
}

/// An arm/refresh/expire timer. A disarmed timer never reports overflow.
#[derive(Debug, Clone)]
pub struct Timer<S> {
    clock: Clock<S>,
    armed: bool,
    fired: bool,
    mark: u32,
}

impl<S: TickSource> Timer<S> {
    pub fn new(clock: Clock<S>) -> Self {
        Self {
            clock,
            armed: false,
            fired: false,
            mark: 0,
        }
    }

    /// Enables the timer and records the current tick.
    pub fn arm(&mut self) {
        self.armed = true;
        self.fired = false;
        self.mark = self.clock.now();
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Restarts the period from now. Does nothing on a disarmed timer.
    pub fn refresh(&mut self) {
        if self.armed {
            self.mark = self.clock.now();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Latched result of the last overflow check.
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// True iff armed and at least `period_ms` have elapsed since arm/refresh.
    pub fn has_overflowed(&mut self, period_ms: u32) -> bool {
        self.has_overflowed_us(period_ms as u64 * 1000)
    }

    pub fn has_overflowed_us(&mut self, period_us: u64) -> bool {
        self.fired =
            self.armed && self.clock.elapsed_ticks(self.mark) >= self.clock.period_ticks(period_us);
        self.fired
    }

    /// Milliseconds since arm/refresh, 0 when disarmed.
    pub fn interval_ms(&self) -> u32 {
        if !self.armed {
            return 0;
        }
        self.clock.elapsed_ticks(self.mark) / self.clock.ticks_per_ms
    }
}
