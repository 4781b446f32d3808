//! Master-clock time base and raster beam arithmetic.
//!
//! All timing in the core is expressed in master clock cycles. One DMA cycle
//! (chip bus slot) is 2 master cycles, one CPU cycle is 4, one CIA cycle is
//! 40. A PAL rasterline is 227.5 DMA cycles = 455 master cycles; the last
//! horizontal position ($E2) absorbs the odd half cycle, which keeps the
//! beam/cycle conversion a bijection on valid beam positions.

use serde::Serialize;

/// Master clock cycle count since power-on.
pub type Cycle = i64;

/// Sentinel trigger cycle: no event scheduled.
pub const NEVER: Cycle = Cycle::MAX;

pub const MASTER_PER_DMA: Cycle = 2;
pub const MASTER_PER_CPU: Cycle = 4;
pub const MASTER_PER_CIA: Cycle = 40;
pub const MASTER_PER_LINE: Cycle = 455;

/// PAL master clock rate (7.09379 MHz).
pub const MASTER_HZ: Cycle = 7_093_790;

/// Milliseconds expressed in master cycles.
#[must_use]
pub const fn msec(n: i64) -> Cycle {
    MASTER_HZ * n / 1000
}

#[must_use]
pub const fn dma_cycles(n: i64) -> Cycle {
    n * MASTER_PER_DMA
}

#[must_use]
pub const fn cpu_cycles(n: i64) -> Cycle {
    n * MASTER_PER_CPU
}

#[must_use]
pub const fn cia_cycles(n: i64) -> Cycle {
    n * MASTER_PER_CIA
}

/// Number of horizontal beam positions per line ($00-$E2).
pub const HPOS_CNT: i16 = 0xE3;
/// Last horizontal beam position.
pub const HPOS_MAX: i16 = 0xE2;
/// `HPOS_CNT` as an array length.
pub const HPOS_CNT_USIZE: usize = 0xE3;

/// Lines in a PAL long frame.
pub const VPOS_CNT_LONG: i16 = 313;
/// Lines in a PAL short frame.
pub const VPOS_CNT_SHORT: i16 = 312;

/// A raster beam position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Beam {
    pub v: i16,
    pub h: i16,
}

impl Beam {
    #[must_use]
    pub const fn new(v: i16, h: i16) -> Self {
        Self { v, h }
    }
}

/// One video frame: its sequence number, length class, and start cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub nr: i64,
    /// Long frames have 313 lines, short frames 312.
    pub long: bool,
    /// Master cycle at which line 0, position 0 of this frame begins.
    pub start: Cycle,
}

impl Frame {
    #[must_use]
    pub const fn first(start: Cycle) -> Self {
        Self {
            nr: 0,
            long: true,
            start,
        }
    }

    #[must_use]
    pub const fn lines(&self) -> i16 {
        if self.long { VPOS_CNT_LONG } else { VPOS_CNT_SHORT }
    }

    #[must_use]
    pub const fn master_cycles(&self) -> Cycle {
        self.lines() as Cycle * MASTER_PER_LINE
    }

    /// Absolute cycle of a beam position within this frame.
    #[must_use]
    pub fn cycle_at(&self, beam: Beam) -> Cycle {
        debug_assert!(beam.v >= 0 && beam.v < self.lines());
        debug_assert!(beam.h >= 0 && beam.h < HPOS_CNT);
        self.start + Cycle::from(beam.v) * MASTER_PER_LINE + dma_cycles(beam.h.into())
    }

    /// Beam position at an absolute cycle within this frame.
    #[must_use]
    pub fn beam_at(&self, cycle: Cycle) -> Beam {
        debug_assert!(cycle >= self.start);
        let delta = cycle - self.start;
        let v = (delta / MASTER_PER_LINE) as i16;
        let h = (((delta % MASTER_PER_LINE) / MASTER_PER_DMA) as i16).min(HPOS_MAX);
        Beam { v, h }
    }
}
