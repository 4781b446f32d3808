//! The machine: component ownership and the dispatch loop.
//!
//! Every component lives by value inside [`Amiga`]; cross-component logic is
//! expressed as methods on the machine, so the borrow story stays trivial
//! and no component needs a back-pointer to its peers.
//!
//! Time advances only through [`Amiga::execute_until`]: the loop pops the
//! earliest due register change or event, jumps the clock there, and
//! dispatches primary slots in fixed priority order. An external CPU calls
//! `execute_until` with its own cycle before touching a custom register, so
//! deferred effects always land first.

use crate::agnus::dma_tables::{
    BPL_EOL, DAS_A0, DAS_A3, DAS_D0, DAS_D1, DAS_D2, DAS_REFRESH, DAS_S0_1, DAS_S7_2, DAS_SDMA,
    DRAW_EVEN, DRAW_MASK, DRAW_ODD, EVT_NONE, bpl_plane,
};
use crate::agnus::{Agnus, BLTEN, COPEN, DMAEN, DSKEN, HSYNC_UPDATE_BPL_TABLE,
    HSYNC_UPDATE_DAS_TABLE, SPREN};
use crate::beam::{Beam, Cycle, HPOS_CNT, HPOS_MAX, MASTER_PER_LINE, cia_cycles, dma_cycles};
use crate::blitter::Blitter;
use crate::cia::{Cia, CiaKind};
use crate::config::AmigaConfig;
use crate::copper::Copper;
use crate::error::Error;
use crate::inspect::{
    AgnusInfo, CopperInfo, DiskControllerInfo, Inspector, MachineInfo, PaulaInfo, SchedulerInfo,
};
use crate::memory::Memory;
use crate::messages::{Message, MessageQueue};
use crate::paula::{IrqSource, Paula};
use crate::regs::{ChangeRecorder, ChipReg};
use crate::scheduler::{EventId, EventScheduler, SecSlot, Slot};
use crate::snapshot::{SnapshotReader, SnapshotWriter};
use drive_amiga_floppy::FloppyDrive;

pub struct Amiga {
    pub config: AmigaConfig,

    pub sched: EventScheduler,
    pub changes: ChangeRecorder,
    pub memory: Memory,
    pub agnus: Agnus,
    pub copper: Copper,
    pub blitter: Blitter,
    pub paula: Paula,
    pub cia_a: Cia,
    pub cia_b: Cia,
    pub drives: [FloppyDrive; 4],

    pub messages: MessageQueue,
    pub inspector: Inspector,
    pub thumbnail: Vec<u8>,

    /// Cycle and position of the most recent DMA-slot dispatch, used to
    /// rectify the pending slot event without re-firing it.
    dma_served: (Cycle, i16),
    powered: bool,
}

impl Amiga {
    pub fn new(config: AmigaConfig) -> Result<Self, Error> {
        config.validate()?;

        let memory = Memory::new(
            config.chip_ram_kb as usize * 1024,
            config.slow_ram_kb as usize * 1024,
            config.slow_ram_mirror,
        );
        let mut drives = [
            FloppyDrive::new(0),
            FloppyDrive::new(1),
            FloppyDrive::new(2),
            FloppyDrive::new(3),
        ];
        for (nr, drive) in drives.iter_mut().enumerate() {
            drive.speed = config.drives[nr].speed;
            drive.set_turbo(config.drives[nr].turbo);
        }

        let mut amiga = Self {
            sched: EventScheduler::new(),
            changes: ChangeRecorder::new(),
            memory,
            agnus: Agnus::new(),
            copper: Copper::new(),
            blitter: Blitter::new(),
            paula: Paula::new(),
            cia_a: Cia::new(CiaKind::A),
            cia_b: Cia::new(CiaKind::B),
            drives,
            messages: MessageQueue::new(),
            inspector: Inspector::new(),
            thumbnail: Vec::new(),
            dma_served: (i64::MIN, -1),
            powered: false,
            config,
        };
        amiga.paula.disk.connected = [
            amiga.config.drives[0].connected,
            amiga.config.drives[1].connected,
            amiga.config.drives[2].connected,
            amiga.config.drives[3].connected,
        ];
        amiga.paula.disk.use_fifo = amiga.config.fifo_buffering;
        amiga.reset();
        Ok(amiga)
    }

    pub fn power_on(&mut self) {
        if self.powered {
            return;
        }
        self.powered = true;
        self.memory.clear();
        self.reset();
        for nr in 0..4u8 {
            self.messages.put(if self.paula.disk.connected[nr as usize] {
                Message::DriveConnect { drive: nr }
            } else {
                Message::DriveDisconnect { drive: nr }
            });
        }
        self.messages.put(Message::PowerOn);
    }

    pub fn power_off(&mut self) {
        if !self.powered {
            return;
        }
        self.powered = false;
        self.messages.put(Message::PowerOff);
    }

    #[must_use]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Reset the chipset: all events cleared, FIFOs zeroed, pointer
    /// registers reinitialized. RAM survives.
    pub fn reset(&mut self) {
        let clock = self.sched.clock;
        self.sched.reset();
        self.changes.clear();
        self.agnus.reset(clock);
        self.copper.reset();
        self.blitter.reset();
        self.paula.reset();
        self.paula.disk.use_fifo = self.config.fifo_buffering;
        self.paula.disk.connected = [
            self.config.drives[0].connected,
            self.config.drives[1].connected,
            self.config.drives[2].connected,
            self.config.drives[3].connected,
        ];
        self.cia_a.reset();
        self.cia_b.reset();
        for drive in &mut self.drives {
            drive.reset();
        }
        self.dma_served = (i64::MIN, -1);
        self.update_drive_status();
        self.init_events();
        self.messages.put(Message::Reset);
    }

    /// Arm the permanent state machines after a reset.
    fn init_events(&mut self) {
        let clock = self.sched.clock;
        self.sched
            .schedule_abs(Slot::CiaA, clock + cia_cycles(1), EventId::CiaExecute);
        self.sched
            .schedule_abs(Slot::CiaB, clock + cia_cycles(1), EventId::CiaExecute);

        self.agnus.latch_bpl_dma_line();
        self.agnus.update_bpl_events_from(0);
        self.agnus.update_das_events_from(0);
        self.schedule_next_dma_event(0);

        let frame = self.agnus.frame;
        self.sched
            .schedule_pos(&frame, Slot::Ras, self.agnus.pos.v, HPOS_MAX, EventId::RasHsync);
    }

    // -----------------------------------------------------------------
    // The dispatch loop
    // -----------------------------------------------------------------

    /// Process all register changes and events due at or before `target`,
    /// advancing the master clock to `target`.
    pub fn execute_until(&mut self, target: Cycle) {
        loop {
            let next_event = self.sched.next_trigger();
            let next_change = self.changes.next_trigger();
            let next = next_event.min(next_change);
            if next > target {
                break;
            }

            self.sched.clock = next;
            self.agnus.update_pos(next);

            // Deferred register writes land before any event of their cycle
            if next_change <= next_event {
                let change = self.changes.pop();
                self.apply_reg_change(change.reg, change.value);
                continue;
            }

            for slot in Slot::ALL {
                let event = self.sched.slot(slot);
                if event.trigger <= next {
                    assert!(event.has_id(), "dispatch on an inactive slot: {slot:?}");
                    self.dispatch(slot, event.id, event.data);
                    debug_assert!(
                        self.sched.slot(slot).trigger > next,
                        "service routine left {slot:?} due"
                    );
                }
            }
        }

        if target > self.sched.clock {
            self.sched.clock = target;
            self.agnus.update_pos(target);
        }
    }

    /// Run one full video frame.
    pub fn run_frame(&mut self) {
        let end = self.agnus.frame.start + self.agnus.frame.master_cycles();
        self.execute_until(end);
    }

    fn dispatch(&mut self, slot: Slot, id: EventId, data: i64) {
        match slot {
            Slot::CiaA => self.service_cia_event(CiaKind::A, id),
            Slot::CiaB => self.service_cia_event(CiaKind::B, id),
            Slot::Dma => self.service_dma_event(id, data),
            Slot::Cop => self.service_cop_event(id, data),
            Slot::Blt => self.service_blt_event(id),
            Slot::Ras => {
                debug_assert_eq!(id, EventId::RasHsync);
                self.hsync_handler();
            }
            Slot::Sec => self.service_sec_events(),
        }
    }

    /// Drain the secondary table up to the current cycle, smallest slot
    /// first within equal cycles.
    fn service_sec_events(&mut self) {
        let clock = self.sched.clock;
        while self.sched.next_sec_trigger() <= clock {
            for slot in SecSlot::ALL {
                let event = self.sched.sec_slot(slot);
                if event.trigger > clock {
                    continue;
                }
                assert!(event.has_id(), "dispatch on an inactive slot: {slot:?}");
                match slot {
                    SecSlot::Hsync => self.service_hsync_eol(),
                    SecSlot::Dsk => self.service_disk_event(),
                    SecSlot::Dch => self.service_disk_change_event(event.id, event.data),
                    _ => self.service_irq_event(slot, event.id, event.data),
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Raster line boundaries
    // -----------------------------------------------------------------

    fn hsync_handler(&mut self) {
        self.agnus.clear_bus_line();
        self.agnus.line_start += MASTER_PER_LINE;

        let mut v = self.agnus.pos.v + 1;
        if v >= self.agnus.frame.lines() {
            v = 0;
            self.agnus.frame.nr += 1;
            if self.agnus.lace() {
                self.agnus.frame.long = !self.agnus.frame.long;
            }
            self.agnus.frame.start = self.agnus.line_start;
        }
        self.agnus.pos = Beam::new(v, 0);

        // TOD inputs: HSYNC clocks CIA-B, VSYNC clocks CIA-A
        self.cia_b.tod_pulse();
        self.sync_cia_irq(CiaKind::B);
        if v == 0 {
            self.cia_a.tod_pulse();
            self.sync_cia_irq(CiaKind::A);
            self.raise_irq(IrqSource::Vertb);
            self.copper_vblank();
        }

        // Refresh the per-line DMA decisions and arm the slot
        self.agnus.latch_bpl_dma_line();
        self.agnus.update_bpl_events_from(0);
        self.schedule_next_dma_event(0);

        let frame = self.agnus.frame;
        self.sched
            .schedule_pos(&frame, Slot::Ras, v, HPOS_MAX, EventId::RasHsync);
    }

    /// Deferred table rebuilds latched by DMACON and bitplane writes.
    fn service_hsync_eol(&mut self) {
        if self.agnus.hsync_actions & HSYNC_UPDATE_BPL_TABLE != 0 {
            self.agnus.update_bpl_events_from(0);
        }
        if self.agnus.hsync_actions & HSYNC_UPDATE_DAS_TABLE != 0 {
            self.agnus.update_das_events_from(0);
        }
        self.agnus.hsync_actions = 0;
        self.sched.cancel_sec(SecSlot::Hsync);
        self.rectify_dma_event();
    }

    // -----------------------------------------------------------------
    // The DMA slot
    // -----------------------------------------------------------------

    /// Schedule the DMA slot at the earliest populated position at or after
    /// `from` on the current line.
    fn schedule_next_dma_event(&mut self, from: i16) {
        match self.agnus.next_dma_h(from) {
            Some(h) => {
                let das = self.agnus.das_event[h as usize];
                let id = if das != EVT_NONE {
                    EventId::Das(das)
                } else {
                    EventId::Bpl(self.agnus.bpl_event[h as usize])
                };
                let frame = self.agnus.frame;
                let v = self.agnus.pos.v;
                self.sched
                    .schedule_pos_data(&frame, Slot::Dma, v, h, id, i64::from(h));
            }
            None => self.sched.cancel(Slot::Dma),
        }
    }

    /// Reschedule the DMA slot after a table mutation, skipping a position
    /// that was already served this cycle.
    fn rectify_dma_event(&mut self) {
        let h = self.agnus.pos.h;
        let from = if self.dma_served.0 == self.sched.clock {
            (self.dma_served.1 + 1).max(h)
        } else {
            h
        };
        self.schedule_next_dma_event(from);
    }

    fn service_dma_event(&mut self, _id: EventId, data: i64) {
        let h = self.agnus.pos.h;
        debug_assert_eq!(
            i64::from(h),
            data,
            "DMA event fired off its beam position"
        );
        self.dma_served = (self.sched.clock, h);

        let das = self.agnus.das_event[h as usize];
        if das != EVT_NONE {
            self.serve_das_event(das);
        }
        let bpl = self.agnus.bpl_event[h as usize];
        if bpl != EVT_NONE {
            self.serve_bpl_event(bpl);
        }

        self.schedule_next_dma_event(h + 1);
    }

    fn serve_das_event(&mut self, code: u8) {
        match code {
            DAS_REFRESH => self.agnus.do_refresh(),
            // The drive delivers about four bytes per line, so the FIFO
            // path drains on every disk slot. Simple mode transfers its
            // whole per-line batch on the first slot.
            DAS_D0 => {
                if self.paula.disk.use_fifo {
                    self.perform_dma();
                } else {
                    self.perform_simple_dma();
                }
            }
            DAS_D1 | DAS_D2 => {
                if self.paula.disk.use_fifo {
                    self.perform_dma();
                }
            }
            code if (DAS_A0..=DAS_A3).contains(&code) => {
                self.service_das_audio(usize::from(code - DAS_A0));
            }
            code if (DAS_S0_1..=DAS_S7_2).contains(&code) => {
                let index = usize::from(code - DAS_S0_1);
                self.service_das_sprite(index / 2, index % 2 == 0);
            }
            DAS_SDMA => self.update_sprite_dma_states(),
            _ => unreachable!("unknown DAS event {code:#x}"),
        }
    }

    fn serve_bpl_event(&mut self, code: u8) {
        let kind = code & !DRAW_MASK;
        if kind == BPL_EOL {
            self.serve_bpl_eol();
            return;
        }
        if let Some(plane) = bpl_plane(code) {
            let word = self.agnus.do_bitplane_dma(&self.memory, plane);
            self.agnus.bpldat[plane] = word;
        }
        if code & DRAW_ODD != 0 {
            self.agnus.odd_shift_loads += 1;
        }
        if code & DRAW_EVEN != 0 {
            self.agnus.even_shift_loads += 1;
        }
    }

    /// End of the fetch line: apply the bitplane modulos.
    fn serve_bpl_eol(&mut self) {
        if !self.agnus.bpl_dma_line {
            return;
        }
        for plane in 0..self.agnus.bpu() {
            let modulo = if plane % 2 == 0 {
                self.agnus.bpl1mod
            } else {
                self.agnus.bpl2mod
            };
            self.agnus.bplpt[plane] = self.agnus.bplpt[plane]
                .wrapping_add(i64::from(modulo) as u32)
                & crate::memory::PTR_MASK;
        }
    }

    // -----------------------------------------------------------------
    // Sprites
    // -----------------------------------------------------------------

    /// A sprite slot: control words while idle, data words while active.
    fn service_das_sprite(&mut self, sprite: usize, first: bool) {
        let word = self.agnus.do_sprite_dma(&self.memory, sprite);
        if self.agnus.spr_dma_active[sprite] {
            // DATA/DATB would feed Denise's sprite serializers
            return;
        }
        if first {
            self.poke_sprpos(sprite, word);
        } else {
            self.poke_sprctl(sprite, word);
        }
    }

    /// The housekeeping marker at $DF: resolve each sprite's DMA state for
    /// the upcoming line.
    fn update_sprite_dma_states(&mut self) {
        let v_next = self.agnus.pos.v + 1;
        for sprite in 0..8 {
            if self.agnus.spr_vstrt[sprite] == v_next {
                self.agnus.spr_dma_active[sprite] = true;
            }
            if self.agnus.spr_vstop[sprite] == v_next {
                self.agnus.spr_dma_active[sprite] = false;
            }
        }
    }

    /// The vertical counter value a sprite register write compares against.
    fn sprite_compare_v(&self) -> i16 {
        if self.agnus.pos.h < 0xDF {
            self.agnus.pos.v
        } else {
            self.agnus.pos.v + 1
        }
    }

    fn poke_sprpos(&mut self, sprite: usize, value: u16) {
        let v = self.sprite_compare_v();
        self.agnus.spr_vstrt[sprite] =
            ((value >> 8) as i16) | (self.agnus.spr_vstrt[sprite] & 0x100);
        if self.agnus.spr_vstrt[sprite] == v {
            self.agnus.spr_dma_active[sprite] = true;
        }
        if self.agnus.spr_vstop[sprite] == v {
            self.agnus.spr_dma_active[sprite] = false;
        }
    }

    fn poke_sprctl(&mut self, sprite: usize, value: u16) {
        let v = self.sprite_compare_v();
        self.agnus.spr_vstrt[sprite] =
            (((value & 0x04) as i16) << 6) | (self.agnus.spr_vstrt[sprite] & 0x0FF);
        self.agnus.spr_vstop[sprite] = (((value & 0x02) as i16) << 7) | ((value >> 8) as i16);
        if self.agnus.spr_vstrt[sprite] == v {
            self.agnus.spr_dma_active[sprite] = true;
        }
        if self.agnus.spr_vstop[sprite] == v {
            self.agnus.spr_dma_active[sprite] = false;
        }
    }

    // -----------------------------------------------------------------
    // Deferred register changes
    // -----------------------------------------------------------------

    fn apply_reg_change(&mut self, reg: ChipReg, value: u16) {
        match reg {
            ChipReg::Dmacon => self.set_dmacon(value),
            ChipReg::Intena => self.paula.write_intena(value),
            ChipReg::Intreq => self.paula.write_intreq(value),
            ChipReg::Adkcon => self.paula.write_adkcon(value),
            ChipReg::Diwstrt => self.agnus.diwstrt = value,
            ChipReg::Diwstop => self.agnus.diwstop = value,
            ChipReg::Ddfstrt => {
                self.agnus.ddfstrt = value;
                self.patch_bpl_line();
            }
            ChipReg::Ddfstop => {
                self.agnus.ddfstop = value;
                self.patch_bpl_line();
            }
            ChipReg::Bplcon0 => {
                self.agnus.bplcon0 = value;
                self.patch_bpl_line();
            }
            ChipReg::Bpl1Mod => self.agnus.bpl1mod = (value & 0xFFFE) as i16,
            ChipReg::Bpl2Mod => self.agnus.bpl2mod = (value & 0xFFFE) as i16,
            ChipReg::BplPtH(plane) => {
                let plane = usize::from(plane);
                self.agnus.bplpt[plane] =
                    (self.agnus.bplpt[plane] & 0xFFFF) | (u32::from(value) << 16);
            }
            ChipReg::BplPtL(plane) => {
                let plane = usize::from(plane);
                self.agnus.bplpt[plane] =
                    (self.agnus.bplpt[plane] & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
        }
    }

    /// Bitplane-related writes take effect on the current line from the
    /// beam position onward, plus a full rebuild at the line boundary.
    fn patch_bpl_line(&mut self) {
        let h = self.agnus.pos.h as usize;
        self.agnus.update_bpl_events_from(h);
        self.agnus.hsync_actions |= HSYNC_UPDATE_BPL_TABLE;
        let next_line = self.agnus.line_start + MASTER_PER_LINE;
        self.sched
            .schedule_sec_abs(SecSlot::Hsync, next_line, EventId::HsyncEol, 0);
        self.rectify_dma_event();
    }

    fn set_dmacon(&mut self, value: u16) {
        let old = self.agnus.dmacon;
        let new = if value & 0x8000 != 0 {
            (old | value) & 0x07FF
        } else {
            (old & !value) & 0x07FF
        };
        if new == old {
            return;
        }
        self.agnus.dmacon = new;
        self.sync_audio_dma_enables();

        let old_bpl = old & DMAEN != 0 && old & BPLEN_BIT != 0;
        let new_bpl = new & DMAEN != 0 && new & BPLEN_BIT != 0;
        if old_bpl != new_bpl {
            self.agnus.latch_bpl_dma_line();
            let from = (self.agnus.pos.h + 2).min(HPOS_CNT - 1) as usize;
            self.agnus.update_bpl_events_from(from);
        }

        let toggled = old ^ new;
        if toggled & (DSKEN | SPREN | DMAEN) != 0 {
            let h = self.agnus.pos.h as usize;
            self.agnus.update_das_events_from(h);
        }

        self.agnus.hsync_actions |= HSYNC_UPDATE_BPL_TABLE | HSYNC_UPDATE_DAS_TABLE;
        let next_line = self.agnus.line_start + MASTER_PER_LINE;
        self.sched
            .schedule_sec_abs(SecSlot::Hsync, next_line, EventId::HsyncEol, 0);
        self.rectify_dma_event();

        // Wake parked bus engines when their enable returns
        let copper_on = new & DMAEN != 0 && new & COPEN != 0;
        let copper_was_on = old & DMAEN != 0 && old & COPEN != 0;
        if copper_on && !copper_was_on {
            let slot = self.sched.slot(Slot::Cop);
            if slot.has_id() && !slot.is_pending() {
                self.sched.reschedule_rel(Slot::Cop, dma_cycles(2));
            }
        }
        let blitter_on = new & DMAEN != 0 && new & BLTEN != 0;
        let blitter_was_on = old & DMAEN != 0 && old & BLTEN != 0;
        if blitter_on && !blitter_was_on && self.blitter.running {
            let slot = self.sched.slot(Slot::Blt);
            if slot.has_id() && !slot.is_pending() {
                self.sched.reschedule_rel(Slot::Blt, dma_cycles(1));
            }
        }
    }

    // -----------------------------------------------------------------
    // Custom register file
    // -----------------------------------------------------------------

    /// A write will be dropped when a fetch for this plane sits one cycle
    /// ahead and the following cycle carries no DMA.
    fn bplpt_write_lost(&self, plane: usize) -> bool {
        let h = self.agnus.pos.h as usize;
        if h + 2 >= crate::beam::HPOS_CNT_USIZE {
            return false;
        }
        bpl_plane(self.agnus.bpl_event[h + 1]) == Some(plane)
            && self.agnus.bpl_event[h + 2] == EVT_NONE
    }

    fn record(&mut self, reg: ChipReg, value: u16) {
        self.changes.record(self.sched.clock + reg.delay(), reg, value);
    }

    /// Write a custom chip register. Callers are expected to have advanced
    /// the clock to the write's bus cycle first.
    pub fn poke_custom16(&mut self, offset: u16, value: u16) {
        match offset & 0x1FE {
            // Disk
            0x020 => self.agnus.dskpt = (self.agnus.dskpt & 0xFFFF) | (u32::from(value) << 16),
            0x022 => {
                self.agnus.dskpt = (self.agnus.dskpt & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x024 => self.poke_dsklen(value),
            0x026 => {} // DSKDAT is a strobe the CPU cannot use
            0x07E => self.paula.disk.dsksync = value,

            // Copper
            0x02E => self.copper.cdang = value & 0x02 != 0,
            0x080 => {
                self.copper.cop1lc = (self.copper.cop1lc & 0xFFFF) | (u32::from(value) << 16);
            }
            0x082 => {
                self.copper.cop1lc = (self.copper.cop1lc & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x084 => {
                self.copper.cop2lc = (self.copper.cop2lc & 0xFFFF) | (u32::from(value) << 16);
            }
            0x086 => {
                self.copper.cop2lc = (self.copper.cop2lc & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x088 => self.copper_jump(1),
            0x08A => self.copper_jump(2),

            // Blitter
            0x040 => self.blitter.bltcon0 = value,
            0x042 => self.blitter.bltcon1 = value,
            0x044 => self.blitter.afwm = value,
            0x046 => self.blitter.alwm = value,
            0x048 => self.blitter.cpt = (self.blitter.cpt & 0xFFFF) | (u32::from(value) << 16),
            0x04A => self.blitter.cpt = (self.blitter.cpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            0x04C => self.blitter.bpt = (self.blitter.bpt & 0xFFFF) | (u32::from(value) << 16),
            0x04E => self.blitter.bpt = (self.blitter.bpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            0x050 => self.blitter.apt = (self.blitter.apt & 0xFFFF) | (u32::from(value) << 16),
            0x052 => self.blitter.apt = (self.blitter.apt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            0x054 => self.blitter.dpt = (self.blitter.dpt & 0xFFFF) | (u32::from(value) << 16),
            0x056 => self.blitter.dpt = (self.blitter.dpt & 0xFFFF_0000) | u32::from(value & 0xFFFE),
            0x058 => self.blitter_start(value),
            0x060 => self.blitter.cmod = (value & 0xFFFE) as i16,
            0x062 => self.blitter.bmod = (value & 0xFFFE) as i16,
            0x064 => self.blitter.amod = (value & 0xFFFE) as i16,
            0x066 => self.blitter.dmod = (value & 0xFFFE) as i16,
            0x070 => self.blitter.cdat = value,
            0x072 => self.blitter.bdat = value,
            0x074 => self.blitter.adat = value,

            // Display window and DMA control (deferred)
            0x08E => self.record(ChipReg::Diwstrt, value),
            0x090 => self.record(ChipReg::Diwstop, value),
            0x092 => self.record(ChipReg::Ddfstrt, value),
            0x094 => self.record(ChipReg::Ddfstop, value),
            0x096 => self.record(ChipReg::Dmacon, value),
            0x09A => self.record(ChipReg::Intena, value),
            0x09C => self.record(ChipReg::Intreq, value),
            0x09E => self.record(ChipReg::Adkcon, value),

            // Audio
            offset @ 0x0A0..=0x0DE => self.poke_audio_reg(offset, value),

            // Bitplanes
            offset @ 0x0E0..=0x0F6 => {
                let plane = usize::from((offset - 0x0E0) / 4);
                if self.bplpt_write_lost(plane) {
                    return;
                }
                if offset & 0x2 == 0 {
                    self.record(ChipReg::BplPtH(plane as u8), value);
                } else {
                    self.record(ChipReg::BplPtL(plane as u8), value);
                }
            }
            0x100 => self.record(ChipReg::Bplcon0, value),
            // BPLCON1 scroll applies immediately
            0x102 => {
                self.agnus.bplcon1 = value;
                let h = self.agnus.pos.h as usize;
                self.agnus.update_bpl_events_from(h);
                self.rectify_dma_event();
            }
            0x108 => self.record(ChipReg::Bpl1Mod, value),
            0x10A => self.record(ChipReg::Bpl2Mod, value),

            // Sprites
            offset @ 0x120..=0x13E => {
                let sprite = usize::from((offset - 0x120) / 4);
                if offset & 0x2 == 0 {
                    self.agnus.sprpt[sprite] =
                        (self.agnus.sprpt[sprite] & 0xFFFF) | (u32::from(value) << 16);
                } else {
                    self.agnus.sprpt[sprite] =
                        (self.agnus.sprpt[sprite] & 0xFFFF_0000) | u32::from(value & 0xFFFE);
                }
            }
            offset @ 0x140..=0x17E => {
                let sprite = usize::from((offset - 0x140) / 8);
                match offset & 0x6 {
                    0x0 => self.poke_sprpos(sprite, value),
                    0x2 => self.poke_sprctl(sprite, value),
                    _ => {} // SPRxDATA/DATB feed Denise
                }
            }

            _ => {}
        }
    }

    /// Read a custom chip register.
    #[must_use]
    pub fn peek_custom16(&mut self, offset: u16) -> u16 {
        match offset & 0x1FE {
            0x002 => {
                let mut result = self.agnus.dmacon;
                if self.blitter.running {
                    result |= 1 << 14;
                }
                if self.blitter.zero {
                    result |= 1 << 13;
                }
                result
            }
            0x004 => {
                let mut result = (self.agnus.pos.v as u16 >> 8) & 0x01;
                if self.agnus.frame.long {
                    result |= 0x8000;
                }
                result
            }
            0x006 => ((self.agnus.pos.v as u16 & 0xFF) << 8) | (self.agnus.pos.h as u16 & 0xFF),
            0x008 => 0, // DSKDATR is a strobe the CPU cannot use
            0x010 => self.paula.adkcon,
            0x01A => self.peek_dskbytr(),
            0x01C => self.paula.intena,
            0x01E => self.paula.intreq,
            _ => 0xFFFF,
        }
    }

    /// The interrupt priority level the external CPU polls.
    #[must_use]
    pub fn int_level(&self) -> u8 {
        self.paula.int_level()
    }

    /// CPU bus-stall line: asserted while the processor waits for a chip
    /// bus grant, giving it precedence over a non-priority Blitter.
    pub fn set_bls(&mut self, bls: bool) {
        self.agnus.bls = bls;
    }

    /// Next queued message for the host, if any.
    pub fn message(&mut self) -> Option<Message> {
        self.messages.get()
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    /// Build a state snapshot for the hosting thread and publish it through
    /// the inspector's mutex.
    pub fn inspect(&self) -> MachineInfo {
        let info = MachineInfo {
            scheduler: SchedulerInfo {
                clock: self.sched.clock,
                next_trigger: self.sched.next_trigger(),
                next_sec_trigger: self.sched.next_sec_trigger(),
                primary: Slot::ALL.iter().map(|&s| self.sched.slot(s)).collect(),
                secondary: SecSlot::ALL
                    .iter()
                    .map(|&s| self.sched.sec_slot(s))
                    .collect(),
            },
            agnus: AgnusInfo {
                frame: self.agnus.frame,
                pos: self.agnus.pos,
                dmacon: self.agnus.dmacon,
                bplcon0: self.agnus.bplcon0,
                ddfstrt: self.agnus.ddfstrt,
                ddfstop: self.agnus.ddfstop,
                dskpt: self.agnus.dskpt,
                bplpt: self.agnus.bplpt,
                bus_stats: self.agnus.stats,
            },
            disk: DiskControllerInfo {
                state: self.paula.disk.state,
                fifo: self.paula.disk.fifo_bytes(),
                fifo_count: self.paula.disk.fifo_count(),
                dsklen: self.paula.disk.dsklen,
                dsksync: self.paula.disk.dsksync,
                prb: self.paula.disk.prb,
                selected: self.paula.disk.selected.map(|nr| nr as u8),
                sync_flag: self.paula.disk.sync_flag,
            },
            paula: PaulaInfo {
                intreq: self.paula.intreq,
                intena: self.paula.intena,
                adkcon: self.paula.adkcon,
                int_level: self.paula.int_level(),
            },
            copper: CopperInfo {
                pc: self.copper.pc,
                cop1lc: self.copper.cop1lc,
                cop2lc: self.copper.cop2lc,
                cdang: self.copper.cdang,
            },
        };
        self.inspector.record(info.clone());
        info
    }

    /// Human-readable state summary for debugging frontends.
    #[must_use]
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "clock: {}  frame: {} ({})  beam: ({}, {:#04x})",
            self.sched.clock,
            self.agnus.frame.nr,
            if self.agnus.frame.long { "long" } else { "short" },
            self.agnus.pos.v,
            self.agnus.pos.h,
        );
        let _ = writeln!(
            out,
            "dmacon: {:#06x}  intena: {:#06x}  intreq: {:#06x}  ipl: {}",
            self.agnus.dmacon,
            self.paula.intena,
            self.paula.intreq,
            self.paula.int_level(),
        );
        let _ = writeln!(
            out,
            "disk: {:?}  fifo: {}  dsklen: {:#06x}  dskpt: {:#07x}",
            self.paula.disk.state,
            self.paula.disk.fifo_count(),
            self.paula.disk.dsklen,
            self.agnus.dskpt,
        );
        let _ = writeln!(
            out,
            "copper: pc {:#07x}  blitter: {}",
            self.copper.pc,
            if self.blitter.running { "busy" } else { "idle" },
        );
        for slot in Slot::ALL {
            let event = self.sched.slot(slot);
            if event.has_id() {
                let _ = writeln!(
                    out,
                    "  {slot:?}: {:?} at {}",
                    event.id,
                    if event.is_pending() {
                        event.trigger.to_string()
                    } else {
                        "never".into()
                    },
                );
            }
        }
        out
    }

    // -----------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------

    pub fn snapshot(&mut self) -> Vec<u8> {
        let mut w = SnapshotWriter::new();
        w.blob(&self.thumbnail);
        w.bool(self.powered);
        self.sched.serialize(&mut w);
        self.changes.serialize(&mut w);
        self.memory.serialize(&mut w);
        self.agnus.serialize(&mut w);
        self.copper.serialize(&mut w);
        self.blitter.serialize(&mut w);
        self.paula.serialize(&mut w);
        self.cia_a.serialize(&mut w);
        self.cia_b.serialize(&mut w);
        for drive in &mut self.drives {
            let state = drive.save_state();
            w.blob(&state);
        }
        w.finish()
    }

    pub fn restore(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut r = SnapshotReader::open(data)?;
        self.thumbnail = r.blob()?;
        self.powered = r.bool()?;
        self.sched.deserialize(&mut r)?;
        self.changes.deserialize(&mut r)?;
        self.memory.deserialize(&mut r)?;
        self.agnus.deserialize(&mut r)?;
        self.copper.deserialize(&mut r)?;
        self.blitter.deserialize(&mut r)?;
        self.paula.deserialize(&mut r)?;
        self.cia_a.deserialize(&mut r)?;
        self.cia_b.deserialize(&mut r)?;
        for drive in &mut self.drives {
            let blob = r.blob()?;
            drive
                .restore_state(&blob)
                .ok_or_else(|| Error::IncompatibleSnapshot("corrupt drive state".into()))?;
        }
        self.dma_served = (i64::MIN, -1);
        Ok(())
    }
}

// DMACON bit 8 under its own name to keep the toggle logic readable
const BPLEN_BIT: u16 = crate::agnus::BPLEN;
