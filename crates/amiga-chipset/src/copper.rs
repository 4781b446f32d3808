//! Copper: the beam-synchronized coprocessor.
//!
//! The Copper walks an instruction list in chip RAM through the bus arbiter,
//! one scheduled event per state. MOVE writes a custom register, WAIT parks
//! until the beam passes a masked position, SKIP conditionally steps over
//! the next instruction. The program counter is reloaded from COP1LC at
//! every vertical blank and from COPxLC by the COPJMP strobes.

use crate::amiga::Amiga;
use crate::beam::{Beam, Cycle, HPOS_MAX, dma_cycles};
use crate::scheduler::{EventId, Slot};

pub struct Copper {
    pub cop1lc: u32,
    pub cop2lc: u32,
    pub pc: u32,
    /// First and second instruction word of the current instruction.
    pub ir1: u16,
    pub ir2: u16,
    /// COPCON bit 1: allow MOVEs to $040-$07E.
    pub cdang: bool,
}

impl Copper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cop1lc: 0,
            cop2lc: 0,
            pc: 0,
            ir1: 0,
            ir2: 0,
            cdang: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    fn wait_vp(&self) -> u16 {
        self.ir1 >> 8
    }

    #[must_use]
    fn wait_hp(&self) -> u16 {
        self.ir1 & 0xFE
    }

    /// Vertical compare mask; V7 is always compared.
    #[must_use]
    fn vmask(&self) -> u16 {
        ((self.ir2 >> 8) & 0x7F) | 0x80
    }

    #[must_use]
    fn hmask(&self) -> u16 {
        self.ir2 & 0xFE
    }

    /// Blitter-finished-disable: when clear, WAIT and SKIP also wait for the
    /// Blitter to go idle.
    #[must_use]
    fn bfd(&self) -> bool {
        self.ir2 & 0x8000 != 0
    }

    /// The masked beam comparison of WAIT and SKIP.
    ///
    /// Only the low 8 bits of the vertical counter take part, which is what
    /// makes the $FFFF,$FFFE end-of-list idiom wait forever.
    #[must_use]
    pub fn comparison(&self, beam: Beam) -> bool {
        let cur_v = (beam.v as u16) & 0xFF & self.vmask();
        let cur_h = (beam.h as u16) & self.hmask();
        let tgt_v = self.wait_vp() & self.vmask();
        let tgt_h = self.wait_hp() & self.hmask();
        (cur_v << 8 | cur_h) >= (tgt_v << 8 | tgt_h)
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.u32(self.cop1lc);
        w.u32(self.cop2lc);
        w.u32(self.pc);
        w.u16(self.ir1);
        w.u16(self.ir2);
        w.bool(self.cdang);
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.cop1lc = r.u32()?;
        self.cop2lc = r.u32()?;
        self.pc = r.u32()?;
        self.ir1 = r.u16()?;
        self.ir2 = r.u16()?;
        self.cdang = r.bool()?;
        Ok(())
    }

    /// MOVE target registers below $40 are never writable; $40-$7E require
    /// the danger bit.
    #[must_use]
    pub fn can_write(&self, reg: u16) -> bool {
        reg >= 0x80 || (reg >= 0x40 && self.cdang)
    }
}

impl Default for Copper {
    fn default() -> Self {
        Self::new()
    }
}

impl Amiga {
    /// Restart the Copper from COP1LC (vertical blank).
    pub(crate) fn copper_vblank(&mut self) {
        self.copper.pc = self.copper.cop1lc;
        self.sched
            .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopRequestDma);
    }

    /// COPJMP strobe: abort the current state and reload from COPxLC after
    /// the two-slot jump latency.
    pub(crate) fn copper_jump(&mut self, list: i64) {
        self.sched
            .schedule_rel_data(Slot::Cop, dma_cycles(2), EventId::CopJmp1, list);
    }

    pub(crate) fn service_cop_event(&mut self, id: EventId, data: i64) {
        match id {
            EventId::CopRequestDma => {
                if !self.agnus.copdma() {
                    self.sched.disable(Slot::Cop);
                } else if self.agnus.bus_is_free(crate::agnus::bus::BusOwner::Copper) {
                    self.sched
                        .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopFetch);
                } else {
                    self.sched.reschedule_rel(Slot::Cop, dma_cycles(2));
                }
            }

            EventId::CopFetch => {
                if !self.agnus.copdma() {
                    self.sched.disable(Slot::Cop);
                    return;
                }
                if !self.agnus.bus_is_free(crate::agnus::bus::BusOwner::Copper) {
                    self.sched.reschedule_rel(Slot::Cop, dma_cycles(2));
                    return;
                }
                self.copper.ir1 = self.agnus.do_copper_dma(&self.memory, self.copper.pc);
                self.copper.pc = self.copper.pc.wrapping_add(2);
                let next = if self.copper.ir1 & 1 == 0 {
                    EventId::CopMove
                } else {
                    EventId::CopWaitOrSkip
                };
                self.sched.schedule_rel(Slot::Cop, dma_cycles(2), next);
            }

            EventId::CopMove => {
                if !self.agnus.copdma() {
                    self.sched.disable(Slot::Cop);
                    return;
                }
                if !self.agnus.bus_is_free(crate::agnus::bus::BusOwner::Copper) {
                    self.sched.reschedule_rel(Slot::Cop, dma_cycles(2));
                    return;
                }
                self.copper.ir2 = self.agnus.do_copper_dma(&self.memory, self.copper.pc);
                self.copper.pc = self.copper.pc.wrapping_add(2);

                let reg = self.copper.ir1 & 0x1FE;
                if !self.copper.can_write(reg) {
                    // An illegal MOVE halts the Copper until the next vblank
                    self.sched.cancel(Slot::Cop);
                    return;
                }
                self.poke_custom16(reg, self.copper.ir2);
                self.sched
                    .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopFetch);
            }

            EventId::CopWaitOrSkip => {
                if !self.agnus.copdma() {
                    self.sched.disable(Slot::Cop);
                    return;
                }
                if !self.agnus.bus_is_free(crate::agnus::bus::BusOwner::Copper) {
                    self.sched.reschedule_rel(Slot::Cop, dma_cycles(2));
                    return;
                }
                self.copper.ir2 = self.agnus.do_copper_dma(&self.memory, self.copper.pc);
                self.copper.pc = self.copper.pc.wrapping_add(2);

                if self.copper.ir2 & 1 == 0 {
                    self.copper_begin_wait();
                } else {
                    self.sched
                        .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopSkip);
                }
            }

            EventId::CopWait => {
                if !self.agnus.copdma() {
                    self.sched.disable(Slot::Cop);
                } else if self.copper_condition_met() {
                    self.sched
                        .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopFetch);
                } else {
                    self.sched.reschedule_rel(Slot::Cop, dma_cycles(2));
                }
            }

            EventId::CopSkip => {
                if self.copper_condition_met() {
                    self.copper.pc = self.copper.pc.wrapping_add(4);
                }
                self.sched
                    .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopFetch);
            }

            EventId::CopJmp1 => {
                self.sched
                    .schedule_rel_data(Slot::Cop, dma_cycles(2), EventId::CopJmp2, data);
            }

            EventId::CopJmp2 => {
                self.copper.pc = if data == 1 {
                    self.copper.cop1lc
                } else {
                    self.copper.cop2lc
                };
                self.sched
                    .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopFetch);
            }

            _ => unreachable!("not a Copper event: {id:?}"),
        }
    }

    fn copper_condition_met(&self) -> bool {
        self.copper.comparison(self.agnus.pos) && (self.copper.bfd() || !self.blitter.running)
    }

    /// Enter the WAIT state: wake exactly at the target when the masks allow
    /// computing it, otherwise poll every other cycle.
    fn copper_begin_wait(&mut self) {
        if self.copper_condition_met() {
            self.sched
                .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopFetch);
            return;
        }

        // The $FFFF,$FFFE end-of-list idiom can never match; park until the
        // vblank restart.
        if self.copper.ir1 == 0xFFFF && self.copper.ir2 == 0xFFFE {
            self.sched
                .schedule_abs(Slot::Cop, crate::beam::NEVER, EventId::CopWait);
            return;
        }

        let full_mask = self.copper.vmask() == 0xFF && self.copper.hmask() == 0xFE;
        if full_mask && let Some(cycle) = self.copper_wait_cycle() {
            self.sched.schedule_abs(Slot::Cop, cycle, EventId::CopWait);
            return;
        }
        self.sched
            .schedule_rel(Slot::Cop, dma_cycles(2), EventId::CopWait);
    }

    /// Absolute cycle of the literal wait position within the current frame,
    /// if it lies ahead of the beam.
    fn copper_wait_cycle(&self) -> Option<Cycle> {
        let pos = self.agnus.pos;
        let page = pos.v & !0xFF;

        let (mut v, h) = if self.copper.wait_hp() > HPOS_MAX as u16 {
            (page + self.copper.wait_vp() as i16 + 1, 0)
        } else {
            (
                page + self.copper.wait_vp() as i16,
                self.copper.wait_hp() as i16,
            )
        };
        if v < pos.v || (v == pos.v && h <= pos.h) {
            v += 0x100; // the compare value wrapped; wait for the next page
        }
        if v >= self.agnus.frame.lines() {
            return None; // beyond this frame; the vblank restart takes over
        }
        let cycle = self.agnus.frame.cycle_at(Beam::new(v, h));
        (cycle > self.sched.clock).then_some(cycle)
    }
}
