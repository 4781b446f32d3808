//! Priority-ordered event scheduler.
//!
//! Every state machine in the chipset owns one slot in a primary or a
//! secondary event table, and each slot holds exactly one pending event.
//! The slot number doubles as the dispatch priority: when two events trigger
//! on the same master cycle, the smaller slot is served first. The secondary
//! table holds infrequent events (interrupts, disk housekeeping); it is
//! reached through the `Sec` slot of the primary table, which is always kept
//! due no later than the earliest secondary event.
//!
//! The tables cache their minimum trigger cycle. Every mutation keeps the
//! cache exact, so the hot path of `execute_until` is a single comparison.

use crate::beam::{Beam, Cycle, Frame, NEVER};
use serde::Serialize;

/// Primary event slots, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Slot {
    CiaA = 0,
    CiaB,
    /// Disk, audio, sprite, and bitplane DMA (driven by the slot tables).
    Dma,
    Cop,
    Blt,
    /// Raster line boundaries.
    Ras,
    /// Indirection to the secondary table.
    Sec,
}

pub const SLOT_COUNT: usize = 7;

impl Slot {
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::CiaA,
        Slot::CiaB,
        Slot::Dma,
        Slot::Cop,
        Slot::Blt,
        Slot::Ras,
        Slot::Sec,
    ];
}

/// Secondary event slots, in dispatch priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecSlot {
    Hsync = 0,
    TbeIrq,
    DskblkIrq,
    SoftIrq,
    PortsIrq,
    CoprIrq,
    VertbIrq,
    BlitIrq,
    Aud0Irq,
    Aud1Irq,
    Aud2Irq,
    Aud3Irq,
    RbfIrq,
    DsksynIrq,
    ExterIrq,
    /// Drive rotation (`DskRotate` every 56 DMA cycles while a motor spins).
    Dsk,
    /// Disk change (insert/eject with a settling delay).
    Dch,
}

pub const SEC_SLOT_COUNT: usize = 17;

impl SecSlot {
    pub const ALL: [SecSlot; SEC_SLOT_COUNT] = [
        SecSlot::Hsync,
        SecSlot::TbeIrq,
        SecSlot::DskblkIrq,
        SecSlot::SoftIrq,
        SecSlot::PortsIrq,
        SecSlot::CoprIrq,
        SecSlot::VertbIrq,
        SecSlot::BlitIrq,
        SecSlot::Aud0Irq,
        SecSlot::Aud1Irq,
        SecSlot::Aud2Irq,
        SecSlot::Aud3Irq,
        SecSlot::RbfIrq,
        SecSlot::DsksynIrq,
        SecSlot::ExterIrq,
        SecSlot::Dsk,
        SecSlot::Dch,
    ];
}

/// What a pending event means to its owning component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EventId {
    /// Inactive slot.
    #[default]
    None,

    // CIA slots
    CiaExecute,
    CiaWakeup,

    // DMA slot: the payload is the raw slot-table code at the pending
    // horizontal position (drawing flags included for bitplane codes)
    Bpl(u8),
    Das(u8),

    // Copper slot
    CopRequestDma,
    CopFetch,
    CopMove,
    CopWaitOrSkip,
    CopWait,
    CopSkip,
    CopJmp1,
    CopJmp2,

    // Blitter slot
    BltInit,
    BltExecute,

    // Raster slot
    RasHsync,

    // Sec slot
    SecTrigger,

    // Secondary table
    IrqSet,
    IrqClear,
    HsyncEol,
    DskRotate,
    DchInsert,
    DchEject,
}

impl EventId {
    /// Wire code for snapshots: a tag byte and a payload byte.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            EventId::None => 0,
            EventId::CiaExecute => 1 << 8,
            EventId::CiaWakeup => 2 << 8,
            EventId::Bpl(code) => (3 << 8) | u16::from(code),
            EventId::Das(code) => (4 << 8) | u16::from(code),
            EventId::CopRequestDma => 5 << 8,
            EventId::CopFetch => 6 << 8,
            EventId::CopMove => 7 << 8,
            EventId::CopWaitOrSkip => 8 << 8,
            EventId::CopWait => 9 << 8,
            EventId::CopSkip => 10 << 8,
            EventId::CopJmp1 => 11 << 8,
            EventId::CopJmp2 => 12 << 8,
            EventId::BltInit => 13 << 8,
            EventId::BltExecute => 14 << 8,
            EventId::RasHsync => 15 << 8,
            EventId::SecTrigger => 16 << 8,
            EventId::IrqSet => 17 << 8,
            EventId::IrqClear => 18 << 8,
            EventId::HsyncEol => 19 << 8,
            EventId::DskRotate => 20 << 8,
            EventId::DchInsert => 21 << 8,
            EventId::DchEject => 22 << 8,
        }
    }

    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        let payload = code as u8;
        Some(match code >> 8 {
            0 => EventId::None,
            1 => EventId::CiaExecute,
            2 => EventId::CiaWakeup,
            3 => EventId::Bpl(payload),
            4 => EventId::Das(payload),
            5 => EventId::CopRequestDma,
            6 => EventId::CopFetch,
            7 => EventId::CopMove,
            8 => EventId::CopWaitOrSkip,
            9 => EventId::CopWait,
            10 => EventId::CopSkip,
            11 => EventId::CopJmp1,
            12 => EventId::CopJmp2,
            13 => EventId::BltInit,
            14 => EventId::BltExecute,
            15 => EventId::RasHsync,
            16 => EventId::SecTrigger,
            17 => EventId::IrqSet,
            18 => EventId::IrqClear,
            19 => EventId::HsyncEol,
            20 => EventId::DskRotate,
            21 => EventId::DchInsert,
            22 => EventId::DchEject,
            _ => return None,
        })
    }
}

/// One scheduled event. A slot with `id == None` is inactive; a slot with
/// `trigger == NEVER` is disabled but keeps its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Event {
    pub trigger: Cycle,
    pub id: EventId,
    pub data: i64,
}

impl Event {
    const IDLE: Event = Event {
        trigger: NEVER,
        id: EventId::None,
        data: 0,
    };

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.trigger != NEVER
    }

    #[must_use]
    pub fn has_id(&self) -> bool {
        self.id != EventId::None
    }
}

pub struct EventScheduler {
    /// Current master clock. Advanced only by the dispatch loop.
    pub clock: Cycle,
    slots: [Event; SLOT_COUNT],
    sec_slots: [Event; SEC_SLOT_COUNT],
    next_trigger: Cycle,
    next_sec_trigger: Cycle,
}

impl EventScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: 0,
            slots: [Event::IDLE; SLOT_COUNT],
            sec_slots: [Event::IDLE; SEC_SLOT_COUNT],
            next_trigger: NEVER,
            next_sec_trigger: NEVER,
        }
    }

    /// Drop every pending event. The clock keeps its value.
    pub fn reset(&mut self) {
        self.slots = [Event::IDLE; SLOT_COUNT];
        self.sec_slots = [Event::IDLE; SEC_SLOT_COUNT];
        self.next_trigger = NEVER;
        self.next_sec_trigger = NEVER;
    }

    #[must_use]
    pub fn slot(&self, s: Slot) -> Event {
        self.slots[s as usize]
    }

    #[must_use]
    pub fn sec_slot(&self, s: SecSlot) -> Event {
        self.sec_slots[s as usize]
    }

    #[must_use]
    pub fn next_trigger(&self) -> Cycle {
        self.next_trigger
    }

    #[must_use]
    pub fn next_sec_trigger(&self) -> Cycle {
        self.next_sec_trigger
    }

    #[must_use]
    pub fn has_event(&self, s: Slot) -> bool {
        self.slots[s as usize].has_id()
    }

    #[must_use]
    pub fn is_pending(&self, s: Slot) -> bool {
        self.slots[s as usize].is_pending()
    }

    #[must_use]
    pub fn has_sec_event(&self, s: SecSlot) -> bool {
        self.sec_slots[s as usize].has_id()
    }

    fn refresh_primary(&mut self) {
        self.next_trigger = self.slots.iter().map(|e| e.trigger).min().unwrap_or(NEVER);
    }

    /// Recompute the secondary minimum and mirror it into the `Sec` slot so
    /// that no secondary event can become due without the primary table
    /// noticing.
    fn refresh_secondary(&mut self) {
        self.next_sec_trigger = self
            .sec_slots
            .iter()
            .map(|e| e.trigger)
            .min()
            .unwrap_or(NEVER);
        self.slots[Slot::Sec as usize] = Event {
            trigger: self.next_sec_trigger,
            id: EventId::SecTrigger,
            data: 0,
        };
        self.refresh_primary();
    }

    pub fn schedule_abs(&mut self, s: Slot, cycle: Cycle, id: EventId) {
        self.schedule_abs_data(s, cycle, id, 0);
    }

    pub fn schedule_abs_data(&mut self, s: Slot, cycle: Cycle, id: EventId, data: i64) {
        assert!(s != Slot::Sec, "the Sec slot is managed by the scheduler");
        self.slots[s as usize] = Event {
            trigger: cycle,
            id,
            data,
        };
        self.refresh_primary();
    }

    pub fn schedule_rel(&mut self, s: Slot, delta: Cycle, id: EventId) {
        self.schedule_abs(s, self.clock + delta, id);
    }

    pub fn schedule_rel_data(&mut self, s: Slot, delta: Cycle, id: EventId, data: i64) {
        self.schedule_abs_data(s, self.clock + delta, id, data);
    }

    /// Schedule at a beam position of the given frame.
    pub fn schedule_pos(&mut self, frame: &Frame, s: Slot, v: i16, h: i16, id: EventId) {
        self.schedule_abs(s, frame.cycle_at(Beam::new(v, h)), id);
    }

    pub fn schedule_pos_data(
        &mut self,
        frame: &Frame,
        s: Slot,
        v: i16,
        h: i16,
        id: EventId,
        data: i64,
    ) {
        self.schedule_abs_data(s, frame.cycle_at(Beam::new(v, h)), id, data);
    }

    /// Change the trigger cycle of an existing event; id and data persist.
    pub fn reschedule_abs(&mut self, s: Slot, cycle: Cycle) {
        debug_assert!(self.slots[s as usize].has_id());
        self.slots[s as usize].trigger = cycle;
        self.refresh_primary();
    }

    pub fn reschedule_rel(&mut self, s: Slot, delta: Cycle) {
        self.reschedule_abs(s, self.clock + delta);
    }

    /// Deactivate the slot entirely.
    pub fn cancel(&mut self, s: Slot) {
        self.slots[s as usize] = Event::IDLE;
        self.refresh_primary();
    }

    /// Park the event: keep its id, never trigger.
    pub fn disable(&mut self, s: Slot) {
        self.slots[s as usize].trigger = NEVER;
        self.refresh_primary();
    }

    pub fn schedule_sec_abs(&mut self, s: SecSlot, cycle: Cycle, id: EventId, data: i64) {
        self.sec_slots[s as usize] = Event {
            trigger: cycle,
            id,
            data,
        };
        self.refresh_secondary();
    }

    pub fn schedule_sec_rel(&mut self, s: SecSlot, delta: Cycle, id: EventId, data: i64) {
        self.schedule_sec_abs(s, self.clock + delta, id, data);
    }

    pub fn cancel_sec(&mut self, s: SecSlot) {
        self.sec_slots[s as usize] = Event::IDLE;
        self.refresh_secondary();
    }

    pub fn disable_sec(&mut self, s: SecSlot) {
        self.sec_slots[s as usize].trigger = NEVER;
        self.refresh_secondary();
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.i64(self.clock);
        for event in self.slots.iter().chain(self.sec_slots.iter()) {
            w.i64(event.trigger);
            w.u16(event.id.code());
            w.i64(event.data);
        }
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.clock = r.i64()?;
        for i in 0..SLOT_COUNT + SEC_SLOT_COUNT {
            let trigger = r.i64()?;
            let code = r.u16()?;
            let id = EventId::from_code(code).ok_or_else(|| {
                crate::error::Error::IncompatibleSnapshot(format!("unknown event id {code:#x}"))
            })?;
            let data = r.i64()?;
            let event = Event { trigger, id, data };
            if i < SLOT_COUNT {
                self.slots[i] = event;
            } else {
                self.sec_slots[i - SLOT_COUNT] = event;
            }
        }
        self.refresh_secondary();
        Ok(())
    }

    /// Debug check: the cached minimums match the tables, and the `Sec` slot
    /// covers the secondary table.
    pub fn verify(&self) {
        let min = self.slots.iter().map(|e| e.trigger).min().unwrap_or(NEVER);
        assert_eq!(self.next_trigger, min, "primary trigger cache out of date");
        let sec_min = self
            .sec_slots
            .iter()
            .map(|e| e.trigger)
            .min()
            .unwrap_or(NEVER);
        assert_eq!(
            self.next_sec_trigger, sec_min,
            "secondary trigger cache out of date"
        );
        assert!(
            self.slots[Slot::Sec as usize].trigger <= sec_min,
            "secondary events must be covered by the Sec slot"
        );
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_minimum_tracks_mutations() {
        let mut sched = EventScheduler::new();
        assert_eq!(sched.next_trigger(), NEVER);

        sched.schedule_abs(Slot::CiaA, 1000, EventId::CiaExecute);
        sched.schedule_abs(Slot::Blt, 400, EventId::BltExecute);
        assert_eq!(sched.next_trigger(), 400);

        sched.reschedule_abs(Slot::Blt, 2000);
        assert_eq!(sched.next_trigger(), 1000);

        sched.cancel(Slot::CiaA);
        assert_eq!(sched.next_trigger(), 2000);
        sched.verify();
    }

    #[test]
    fn schedule_then_cancel_restores_the_slot() {
        let mut sched = EventScheduler::new();
        let before = sched.slot(Slot::Cop);
        sched.schedule_abs(Slot::Cop, 123, EventId::CopFetch);
        sched.cancel(Slot::Cop);
        assert_eq!(sched.slot(Slot::Cop), before);
        assert_eq!(sched.next_trigger(), NEVER);
    }

    #[test]
    fn disable_keeps_the_id() {
        let mut sched = EventScheduler::new();
        sched.schedule_abs(Slot::Cop, 500, EventId::CopWait);
        sched.disable(Slot::Cop);
        let event = sched.slot(Slot::Cop);
        assert_eq!(event.id, EventId::CopWait);
        assert_eq!(event.trigger, NEVER);
    }

    #[test]
    fn secondary_event_pulls_the_sec_slot_forward() {
        let mut sched = EventScheduler::new();
        sched.schedule_sec_abs(SecSlot::VertbIrq, 750, EventId::IrqSet, 5);
        assert_eq!(sched.next_sec_trigger(), 750);
        assert_eq!(sched.slot(Slot::Sec).trigger, 750);
        assert_eq!(sched.slot(Slot::Sec).id, EventId::SecTrigger);
        sched.verify();

        sched.schedule_sec_abs(SecSlot::Dsk, 600, EventId::DskRotate, 0);
        assert_eq!(sched.slot(Slot::Sec).trigger, 600);

        sched.cancel_sec(SecSlot::Dsk);
        assert_eq!(sched.slot(Slot::Sec).trigger, 750);
        sched.verify();
    }

    #[test]
    fn relative_scheduling_uses_the_clock() {
        let mut sched = EventScheduler::new();
        sched.clock = 10_000;
        sched.schedule_rel(Slot::Ras, 455, EventId::RasHsync);
        assert_eq!(sched.slot(Slot::Ras).trigger, 10_455);
    }

    #[test]
    fn schedule_pos_converts_through_the_frame() {
        let mut sched = EventScheduler::new();
        let frame = Frame::first(0);
        sched.schedule_pos(&frame, Slot::Ras, 1, 0x10, EventId::RasHsync);
        assert_eq!(sched.slot(Slot::Ras).trigger, 455 + 0x20);
    }
}
