//! MOS 8520 Complex Interface Adapters.
//!
//! Two instances live in the machine: CIA-A (keyboard, drive status, PORTS
//! interrupt) and CIA-B (serial/parallel control, drive control lines, EXTER
//! interrupt). Each chip provides two I/O ports, two 16-bit countdown
//! timers, a 24-bit time-of-day counter with alarm, a serial register, and
//! an interrupt controller.
//!
//! A CIA cycle is 40 master cycles. Instead of ticking every cycle, a chip
//! whose timers cannot produce an observable effect for a while goes to
//! sleep: its `CiaExecute` event is replaced by a `CiaWakeup` at the next
//! underflow (or never), and the counters are fast-forwarded on wake.

use crate::amiga::Amiga;
use crate::beam::{Cycle, MASTER_PER_CIA, NEVER, cia_cycles};
use crate::paula::IrqSource;
use crate::scheduler::{EventId, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiaKind {
    A,
    B,
}

impl CiaKind {
    #[must_use]
    pub fn slot(self) -> Slot {
        match self {
            CiaKind::A => Slot::CiaA,
            CiaKind::B => Slot::CiaB,
        }
    }

    /// The interrupt source this chip's IRQ line is wired to.
    #[must_use]
    pub fn irq_source(self) -> IrqSource {
        match self {
            CiaKind::A => IrqSource::Ports,
            CiaKind::B => IrqSource::Exter,
        }
    }
}

/// One 16-bit countdown timer with its latch and read/strobe plumbing.
#[derive(Debug, Clone, Copy)]
struct Timer {
    counter: u16,
    latch: u16,
    running: bool,
    oneshot: bool,
    force_load: bool,
    read_hi_latch: u8,
    read_hi_latched: bool,
}

impl Timer {
    const fn new() -> Self {
        Self {
            counter: 0xFFFF,
            latch: 0xFFFF,
            running: false,
            oneshot: false,
            force_load: false,
            read_hi_latch: 0xFF,
            read_hi_latched: false,
        }
    }

    /// Advance one CIA cycle. `count` gates the decrement (phi2 or a chained
    /// source). Returns true on underflow.
    fn tick(&mut self, count: bool) -> bool {
        if self.force_load {
            self.counter = self.latch;
            self.force_load = false;
        }
        if !self.running || !count {
            return false;
        }
        if self.counter == 0 {
            self.counter = self.latch;
            if self.oneshot {
                self.running = false;
            }
            true
        } else {
            self.counter -= 1;
            false
        }
    }

    fn read_lo(&mut self) -> u8 {
        self.read_hi_latch = (self.counter >> 8) as u8;
        self.read_hi_latched = true;
        self.counter as u8
    }

    fn read_hi(&mut self) -> u8 {
        let hi = if self.read_hi_latched {
            self.read_hi_latch
        } else {
            (self.counter >> 8) as u8
        };
        self.read_hi_latched = false;
        hi
    }

    fn write_lo(&mut self, value: u8) {
        self.latch = (self.latch & 0xFF00) | u16::from(value);
    }

    /// Writing the high byte loads a stopped timer, and in one-shot mode
    /// starts it regardless of the control register's start bit.
    /// Returns true when the timer auto-started.
    fn write_hi(&mut self, value: u8) -> bool {
        self.latch = (self.latch & 0x00FF) | (u16::from(value) << 8);
        if !self.running {
            self.counter = self.latch;
            if self.oneshot {
                self.running = true;
                return true;
            }
        }
        false
    }
}

pub struct Cia {
    pub kind: CiaKind,

    port_a: u8,
    port_b: u8,
    ddr_a: u8,
    ddr_b: u8,
    /// Input levels seen on pins that are configured as inputs.
    pub external_a: u8,
    pub external_b: u8,

    timer_a: Timer,
    timer_b: Timer,

    icr_status: u8,
    icr_mask: u8,
    cra: u8,
    crb: u8,
    sdr: u8,

    tod_counter: u32,
    tod_alarm: u32,
    tod_latch: u32,
    tod_latched: bool,
    tod_halted: bool,

    /// Level of the chip's IRQ output, tracked to detect rising edges.
    pub irq_line: bool,

    pub sleeping: bool,
    pub sleep_cycle: Cycle,
    sleep_horizon: u64,
}

impl Cia {
    #[must_use]
    pub fn new(kind: CiaKind) -> Self {
        Self {
            kind,
            port_a: 0xFF,
            port_b: 0xFF,
            ddr_a: 0,
            ddr_b: 0,
            external_a: 0xFF,
            external_b: 0xFF,
            timer_a: Timer::new(),
            timer_b: Timer::new(),
            icr_status: 0,
            icr_mask: 0,
            cra: 0,
            crb: 0,
            sdr: 0,
            tod_counter: 0,
            tod_alarm: 0,
            tod_latch: 0,
            tod_latched: false,
            tod_halted: false,
            irq_line: false,
            sleeping: false,
            sleep_cycle: 0,
            sleep_horizon: 0,
        }
    }

    /// Hardware reset. The TOD counter and alarm survive, as on the chip.
    pub fn reset(&mut self) {
        let tod_counter = self.tod_counter;
        let tod_alarm = self.tod_alarm;
        let external_a = self.external_a;
        let external_b = self.external_b;
        *self = Self::new(self.kind);
        self.tod_counter = tod_counter;
        self.tod_alarm = tod_alarm;
        self.external_a = external_a;
        self.external_b = external_b;
    }

    /// Advance one CIA cycle (40 master cycles).
    pub fn tick(&mut self) {
        // Timer A counts phi2 unless switched to the CNT pin
        let a_counts = self.cra & 0x20 == 0;
        let a_underflow = self.timer_a.tick(a_counts);
        if a_underflow {
            self.icr_status |= 0x01;
            if self.timer_a.oneshot {
                self.cra &= !0x01;
            }
        }

        let b_counts = match (self.crb >> 5) & 0x03 {
            0x00 => true,
            0x02 | 0x03 => a_underflow,
            _ => false, // CNT-driven; no edges are generated internally
        };
        if self.timer_b.tick(b_counts) {
            self.icr_status |= 0x02;
            if self.timer_b.oneshot {
                self.crb &= !0x01;
            }
        }
    }

    /// CIA cycles until the next observable timer effect, if the chip may
    /// sleep through them. `u64::MAX` means nothing will ever happen without
    /// outside help.
    #[must_use]
    pub fn ticks_until_wakeup(&self) -> Option<u64> {
        if self.timer_a.force_load || self.timer_b.force_load {
            return None;
        }
        let mut horizon = u64::MAX;
        if self.timer_a.running && self.cra & 0x20 == 0 {
            horizon = horizon.min(u64::from(self.timer_a.counter) + 1);
        }
        if self.timer_b.running && (self.crb >> 5) & 0x03 == 0 {
            horizon = horizon.min(u64::from(self.timer_b.counter) + 1);
        }
        Some(horizon)
    }

    /// Skip `ticks` CIA cycles during which nothing observable happened.
    pub fn fast_forward(&mut self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        let ticks = ticks as u16;
        if self.timer_a.running && self.cra & 0x20 == 0 {
            debug_assert!(ticks <= self.timer_a.counter);
            self.timer_a.counter -= ticks;
        }
        if self.timer_b.running && (self.crb >> 5) & 0x03 == 0 {
            debug_assert!(ticks <= self.timer_b.counter);
            self.timer_b.counter -= ticks;
        }
    }

    #[must_use]
    pub fn irq_active(&self) -> bool {
        self.icr_status & self.icr_mask & 0x1F != 0
    }

    pub fn read(&mut self, reg: u8) -> u8 {
        match reg & 0x0F {
            0x00 => self.port_a_output(),
            0x01 => self.port_b_output(),
            0x02 => self.ddr_a,
            0x03 => self.ddr_b,
            0x04 => self.timer_a.read_lo(),
            0x05 => self.timer_a.read_hi(),
            0x06 => self.timer_b.read_lo(),
            0x07 => self.timer_b.read_hi(),
            // Reading the TOD MSB freezes a snapshot; reading the LSB
            // releases it.
            0x08 => {
                let value = if self.tod_latched {
                    self.tod_latch
                } else {
                    self.tod_counter
                };
                self.tod_latched = false;
                value as u8
            }
            0x09 => {
                let value = if self.tod_latched {
                    self.tod_latch
                } else {
                    self.tod_counter
                };
                (value >> 8) as u8
            }
            0x0A => {
                if !self.tod_latched {
                    self.tod_latch = self.tod_counter;
                    self.tod_latched = true;
                }
                (self.tod_latch >> 16) as u8
            }
            0x0C => self.sdr,
            0x0D => self.read_icr_and_clear(),
            0x0E => self.cra,
            0x0F => self.crb,
            _ => 0xFF,
        }
    }

    pub fn read_icr_and_clear(&mut self) -> u8 {
        let any = if self.irq_active() { 0x80 } else { 0x00 };
        let result = self.icr_status | any;
        self.icr_status = 0;
        result
    }

    pub fn write(&mut self, reg: u8, value: u8) {
        match reg & 0x0F {
            0x00 => self.port_a = value,
            0x01 => self.port_b = value,
            0x02 => self.ddr_a = value,
            0x03 => self.ddr_b = value,
            0x04 => self.timer_a.write_lo(value),
            0x05 => {
                self.timer_a.oneshot = self.cra & 0x08 != 0;
                if self.timer_a.write_hi(value) {
                    self.cra |= 0x01;
                }
            }
            0x06 => self.timer_b.write_lo(value),
            0x07 => {
                self.timer_b.oneshot = self.crb & 0x08 != 0;
                if self.timer_b.write_hi(value) {
                    self.crb |= 0x01;
                }
            }
            // Writing the TOD MSB halts the counter; writing the LSB
            // restarts it, so multi-byte updates are atomic.
            0x08 => {
                self.write_tod_byte(0, value);
                self.tod_halted = false;
            }
            0x09 => self.write_tod_byte(1, value),
            0x0A => {
                self.write_tod_byte(2, value);
                self.tod_halted = true;
            }
            0x0C => self.sdr = value,
            0x0D => {
                if value & 0x80 != 0 {
                    self.icr_mask |= value & 0x1F;
                } else {
                    self.icr_mask &= !(value & 0x1F);
                }
            }
            0x0E => {
                // LOAD (bit 4) is a strobe and never reads back
                self.cra = value & !0x10;
                self.timer_a.running = value & 0x01 != 0;
                self.timer_a.oneshot = value & 0x08 != 0;
                if value & 0x10 != 0 {
                    self.timer_a.force_load = true;
                }
            }
            0x0F => {
                self.crb = value & !0x10;
                self.timer_b.running = value & 0x01 != 0;
                self.timer_b.oneshot = value & 0x08 != 0;
                if value & 0x10 != 0 {
                    self.timer_b.force_load = true;
                }
            }
            _ => {}
        }
    }

    fn write_tod_byte(&mut self, byte: u8, value: u8) {
        let shift = u32::from(byte) * 8;
        let mask = !(0xFFu32 << shift);
        if self.crb & 0x80 != 0 {
            self.tod_alarm = ((self.tod_alarm & mask) | (u32::from(value) << shift)) & 0xFF_FFFF;
        } else {
            self.tod_counter = ((self.tod_counter & mask) | (u32::from(value) << shift)) & 0xFF_FFFF;
        }
    }

    /// External TOD pulse: VSYNC for CIA-A, HSYNC for CIA-B.
    pub fn tod_pulse(&mut self) {
        if self.tod_halted {
            return;
        }
        self.tod_counter = self.tod_counter.wrapping_add(1) & 0xFF_FFFF;
        if self.tod_counter == self.tod_alarm {
            self.icr_status |= 0x04;
        }
    }

    /// Inject a complete serial byte (e.g. a keyboard scancode).
    pub fn receive_serial_byte(&mut self, byte: u8) {
        self.sdr = byte;
        self.icr_status |= 0x08;
    }

    #[must_use]
    pub fn port_a_output(&self) -> u8 {
        (self.port_a & self.ddr_a) | (self.external_a & !self.ddr_a)
    }

    #[must_use]
    pub fn port_b_output(&self) -> u8 {
        (self.port_b & self.ddr_b) | (self.external_b & !self.ddr_b)
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.u8(self.port_a);
        w.u8(self.port_b);
        w.u8(self.ddr_a);
        w.u8(self.ddr_b);
        w.u8(self.external_a);
        w.u8(self.external_b);
        for timer in [&self.timer_a, &self.timer_b] {
            w.u16(timer.counter);
            w.u16(timer.latch);
            w.bool(timer.running);
            w.bool(timer.oneshot);
            w.bool(timer.force_load);
            w.u8(timer.read_hi_latch);
            w.bool(timer.read_hi_latched);
        }
        w.u8(self.icr_status);
        w.u8(self.icr_mask);
        w.u8(self.cra);
        w.u8(self.crb);
        w.u8(self.sdr);
        w.u32(self.tod_counter);
        w.u32(self.tod_alarm);
        w.u32(self.tod_latch);
        w.bool(self.tod_latched);
        w.bool(self.tod_halted);
        w.bool(self.irq_line);
        w.bool(self.sleeping);
        w.i64(self.sleep_cycle);
        w.u64(self.sleep_horizon);
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.port_a = r.u8()?;
        self.port_b = r.u8()?;
        self.ddr_a = r.u8()?;
        self.ddr_b = r.u8()?;
        self.external_a = r.u8()?;
        self.external_b = r.u8()?;
        for timer in [&mut self.timer_a, &mut self.timer_b] {
            timer.counter = r.u16()?;
            timer.latch = r.u16()?;
            timer.running = r.bool()?;
            timer.oneshot = r.bool()?;
            timer.force_load = r.bool()?;
            timer.read_hi_latch = r.u8()?;
            timer.read_hi_latched = r.bool()?;
        }
        self.icr_status = r.u8()?;
        self.icr_mask = r.u8()?;
        self.cra = r.u8()?;
        self.crb = r.u8()?;
        self.sdr = r.u8()?;
        self.tod_counter = r.u32()?;
        self.tod_alarm = r.u32()?;
        self.tod_latch = r.u32()?;
        self.tod_latched = r.bool()?;
        self.tod_halted = r.bool()?;
        self.irq_line = r.bool()?;
        self.sleeping = r.bool()?;
        self.sleep_cycle = r.i64()?;
        self.sleep_horizon = r.u64()?;
        Ok(())
    }

    // Inspection accessors
    #[must_use]
    pub fn timer_a_counter(&self) -> u16 {
        self.timer_a.counter
    }
    #[must_use]
    pub fn timer_b_counter(&self) -> u16 {
        self.timer_b.counter
    }
    #[must_use]
    pub fn timer_a_running(&self) -> bool {
        self.timer_a.running
    }
    #[must_use]
    pub fn timer_b_running(&self) -> bool {
        self.timer_b.running
    }
    #[must_use]
    pub fn icr_status(&self) -> u8 {
        self.icr_status
    }
    #[must_use]
    pub fn icr_mask(&self) -> u8 {
        self.icr_mask
    }
    #[must_use]
    pub fn tod_counter(&self) -> u32 {
        self.tod_counter
    }
}

impl Amiga {
    fn cia_mut(&mut self, kind: CiaKind) -> &mut Cia {
        match kind {
            CiaKind::A => &mut self.cia_a,
            CiaKind::B => &mut self.cia_b,
        }
    }

    pub(crate) fn service_cia_event(&mut self, kind: CiaKind, id: EventId) {
        match id {
            EventId::CiaExecute => {
                self.cia_mut(kind).tick();
                self.sync_cia_irq(kind);
                self.schedule_cia_next(kind);
            }
            EventId::CiaWakeup => {
                let cia = self.cia_mut(kind);
                debug_assert!(cia.sleeping);
                let skipped = cia.sleep_horizon.saturating_sub(1);
                cia.fast_forward(skipped);
                cia.sleeping = false;
                // The wakeup cycle itself is the due CIA cycle
                self.cia_mut(kind).tick();
                self.sync_cia_irq(kind);
                self.schedule_cia_next(kind);
            }
            _ => unreachable!("not a CIA event: {id:?}"),
        }
    }

    /// Keep running per-cycle, or put the chip to sleep until its next
    /// observable effect.
    fn schedule_cia_next(&mut self, kind: CiaKind) {
        let now = self.sched.clock;
        let slot = kind.slot();
        match self.cia_mut(kind).ticks_until_wakeup() {
            Some(horizon) if horizon > 1 => {
                let cia = self.cia_mut(kind);
                cia.sleeping = true;
                cia.sleep_cycle = now;
                cia.sleep_horizon = horizon;
                let wake = if horizon == u64::MAX {
                    NEVER
                } else {
                    now + cia_cycles(horizon as i64)
                };
                self.sched.schedule_abs(slot, wake, EventId::CiaWakeup);
            }
            _ => {
                self.sched
                    .schedule_abs(slot, now + cia_cycles(1), EventId::CiaExecute);
            }
        }
    }

    /// Wake a sleeping chip early (a register access or port activity).
    /// Elapsed whole CIA cycles are skipped; execution resumes on the next
    /// cycle boundary.
    pub(crate) fn wake_cia(&mut self, kind: CiaKind) {
        let now = self.sched.clock;
        let slot = kind.slot();
        let cia = self.cia_mut(kind);
        if !cia.sleeping {
            return;
        }
        let elapsed = ((now - cia.sleep_cycle) / MASTER_PER_CIA) as u64;
        let skipped = elapsed.min(cia.sleep_horizon.saturating_sub(1));
        cia.fast_forward(skipped);
        cia.sleeping = false;
        let resume = cia.sleep_cycle + cia_cycles(skipped as i64 + 1);
        self.sched
            .schedule_abs(slot, resume.max(now + 1), EventId::CiaExecute);
    }

    /// Propagate a rising IRQ edge to the chip's interrupt source.
    pub(crate) fn sync_cia_irq(&mut self, kind: CiaKind) {
        let cia = self.cia_mut(kind);
        let line = cia.irq_active();
        let was = cia.irq_line;
        cia.irq_line = line;
        if line && !was {
            self.raise_irq(kind.irq_source());
        }
    }

    /// CPU/RTC-facing CIA register access: wakes the chip first so the
    /// registers reflect elapsed time.
    pub fn peek_cia(&mut self, kind: CiaKind, reg: u8) -> u8 {
        self.wake_cia(kind);
        let value = self.cia_mut(kind).read(reg);
        self.sync_cia_irq(kind);
        value
    }

    pub fn poke_cia(&mut self, kind: CiaKind, reg: u8, value: u8) {
        self.wake_cia(kind);
        let old_prb = self.cia_b.port_b_output();
        self.cia_mut(kind).write(reg, value);
        self.sync_cia_irq(kind);

        // CIA-B port B carries the drive control lines
        if kind == CiaKind::B && matches!(reg & 0x0F, 0x01 | 0x03) {
            let new_prb = self.cia_b.port_b_output();
            if new_prb != old_prb {
                self.prb_did_change(old_prb, new_prb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_low_read_latches_high_until_high_read() {
        let mut cia = Cia::new(CiaKind::A);
        cia.timer_a.counter = 0x1234;
        cia.timer_a.running = true;
        cia.cra = 0x01;

        assert_eq!(cia.read(0x04), 0x34);
        cia.tick();
        assert_eq!(cia.timer_a.counter, 0x1233);
        assert_eq!(cia.read(0x05), 0x12, "latched by the low-byte read");

        cia.timer_a.counter = 0xABCD;
        assert_eq!(cia.read(0x05), 0xAB, "latch consumed");
    }

    #[test]
    fn load_strobe_does_not_read_back() {
        let mut cia = Cia::new(CiaKind::A);
        cia.write(0x04, 0x34);
        cia.write(0x05, 0x12);
        cia.write(0x0E, 0x10);
        assert_eq!(cia.read(0x0E) & 0x10, 0);
        cia.tick();
        assert_eq!(cia.timer_a.counter, 0x1234);
    }

    #[test]
    fn oneshot_high_byte_write_autostarts() {
        let mut cia = Cia::new(CiaKind::A);
        cia.write(0x0E, 0x08); // one-shot, stopped
        cia.write(0x04, 0x02);
        cia.write(0x05, 0x00);
        assert!(cia.timer_a.running);
        assert_ne!(cia.read(0x0E) & 0x01, 0);

        cia.tick();
        cia.tick();
        cia.tick(); // underflow, reload, stop
        assert!(!cia.timer_a.running);
        assert_eq!(cia.read(0x0E) & 0x01, 0);
        assert_ne!(cia.icr_status() & 0x01, 0);
    }

    #[test]
    fn timer_b_counts_timer_a_underflows_when_chained() {
        let mut cia = Cia::new(CiaKind::A);
        cia.timer_a.counter = 0x0001;
        cia.timer_a.latch = 0x0001;
        cia.timer_a.running = true;
        cia.cra = 0x01;
        cia.timer_b.counter = 0x0001;
        cia.timer_b.latch = 0x0001;
        cia.timer_b.running = true;
        cia.crb = 0x41;

        cia.tick(); // TA 1 -> 0
        assert_eq!(cia.timer_b.counter, 0x0001);
        cia.tick(); // TA underflow -> TB 1 -> 0
        assert_eq!(cia.timer_b.counter, 0x0000);
        cia.tick(); // TA 1 -> 0
        cia.tick(); // TA underflow -> TB underflow
        assert_ne!(cia.icr_status() & 0x02, 0);
    }

    #[test]
    fn icr_read_reports_and_clears() {
        let mut cia = Cia::new(CiaKind::A);
        cia.receive_serial_byte(0xA5);
        assert!(!cia.irq_active(), "masked off");

        let first = cia.read_icr_and_clear();
        assert_eq!(first & 0x88, 0x08);
        assert_eq!(cia.icr_status(), 0);

        cia.write(0x0D, 0x88);
        cia.receive_serial_byte(0x5A);
        assert!(cia.irq_active());
        let second = cia.read_icr_and_clear();
        assert_eq!(second & 0x88, 0x88);
        assert!(!cia.irq_active());
    }

    #[test]
    fn tod_read_latch_freezes_a_snapshot() {
        let mut cia = Cia::new(CiaKind::A);
        cia.tod_counter = 0x012345;
        assert_eq!(cia.read(0x0A), 0x01); // latches
        cia.tod_pulse();
        assert_eq!(cia.read(0x09), 0x23);
        assert_eq!(cia.read(0x08), 0x45); // releases
        assert_eq!(cia.read(0x08), 0x46);
    }

    #[test]
    fn tod_alarm_raises_icr_bit() {
        let mut cia = Cia::new(CiaKind::B);
        cia.crb = 0x80;
        cia.write(0x08, 0x05); // alarm = 5
        cia.crb = 0;
        cia.tod_counter = 4;
        cia.tod_pulse();
        assert_ne!(cia.icr_status() & 0x04, 0);
    }

    #[test]
    fn idle_chip_sleeps_forever() {
        let cia = Cia::new(CiaKind::A);
        assert_eq!(cia.ticks_until_wakeup(), Some(u64::MAX));
    }

    #[test]
    fn running_timer_bounds_the_sleep() {
        let mut cia = Cia::new(CiaKind::A);
        cia.write(0x04, 0x10);
        cia.write(0x05, 0x00);
        cia.write(0x0E, 0x01); // start, continuous
        assert_eq!(cia.ticks_until_wakeup(), Some(0x11));
    }

    #[test]
    fn pending_force_load_blocks_sleeping() {
        let mut cia = Cia::new(CiaKind::A);
        cia.write(0x0E, 0x10);
        assert_eq!(cia.ticks_until_wakeup(), None);
    }

    #[test]
    fn fast_forward_matches_ticking() {
        let mut slow = Cia::new(CiaKind::A);
        slow.write(0x04, 0x40);
        slow.write(0x05, 0x00);
        slow.write(0x0E, 0x01);
        let mut fast = Cia::new(CiaKind::A);
        fast.write(0x04, 0x40);
        fast.write(0x05, 0x00);
        fast.write(0x0E, 0x01);

        for _ in 0..0x20 {
            slow.tick();
        }
        fast.fast_forward(0x20);
        assert_eq!(slow.timer_a.counter, fast.timer_a.counter);
    }
}
