//! Agnus: DMA engine, raster beam, and chip bus owner.
//!
//! Agnus holds the master clock's beam interpretation, the per-line DMA
//! slot-allocation tables, the bus-owner vector, DMACON, and every DMA
//! pointer register. The event service routines that tie Agnus to the other
//! chips live on the [`Amiga`](crate::amiga::Amiga) machine; this module
//! keeps the state and the self-contained table mechanics.

pub mod bus;
pub mod dma_tables;

use crate::beam::{Beam, Cycle, Frame, HPOS_CNT, HPOS_CNT_USIZE, HPOS_MAX, MASTER_PER_DMA};
use bus::{BusOwner, BusStats};
use dma_tables::{
    BPL_EOL, BplTable, DRAW_EVEN, DRAW_MASK, DRAW_ODD, DasTable, EVT_NONE, NO_EVENT, TableEvent,
    build_bpl_table, build_das_table, update_jump_table,
};

// DMACON bits
pub const DMAEN: u16 = 0x0200;
pub const BPLEN: u16 = 0x0100;
pub const COPEN: u16 = 0x0080;
pub const BLTEN: u16 = 0x0040;
pub const SPREN: u16 = 0x0020;
pub const DSKEN: u16 = 0x0010;
pub const AUDEN: [u16; 4] = [0x0001, 0x0002, 0x0004, 0x0008];
pub const BLTPRI: u16 = 0x0400;

// BPLCON0 bits
pub const HIRES: u16 = 0x8000;
pub const LACE: u16 = 0x0004;

/// Deferred end-of-line actions, latched by register writes.
pub const HSYNC_UPDATE_BPL_TABLE: u8 = 0x01;
pub const HSYNC_UPDATE_DAS_TABLE: u8 = 0x02;

pub struct Agnus {
    // Beam state
    pub frame: Frame,
    pub pos: Beam,
    /// Master cycle at which the current rasterline began.
    pub line_start: Cycle,

    // Registers
    pub dmacon: u16,
    pub bplcon0: u16,
    pub bplcon1: u16,
    pub diwstrt: u16,
    pub diwstop: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,
    pub bpl1mod: i16,
    pub bpl2mod: i16,

    // Pointer registers
    pub dskpt: u32,
    pub bplpt: [u32; 6],
    pub audlc: [u32; 4],
    pub audpt: [u32; 4],
    pub sprpt: [u32; 8],

    // Bitplane data latches and shift-register load accounting
    pub bpldat: [u16; 6],
    pub odd_shift_loads: u64,
    pub even_shift_loads: u64,

    // Sprite vertical control
    pub spr_vstrt: [i16; 8],
    pub spr_vstop: [i16; 8],
    pub spr_dma_active: [bool; 8],

    // Static lookup tables
    bpl_dma: Box<BplTable>,
    das_dma: Box<DasTable>,

    // Per-line working tables
    pub bpl_event: [TableEvent; HPOS_CNT_USIZE],
    pub das_event: [TableEvent; HPOS_CNT_USIZE],
    pub next_bpl_event: [u8; HPOS_CNT_USIZE],
    pub next_das_event: [u8; HPOS_CNT_USIZE],

    /// Table rebuilds postponed to the next line boundary.
    pub hsync_actions: u8,

    /// Bitplane DMA enable for the current line, latched at line start.
    pub bpl_dma_line: bool,

    // Bus state
    pub bus_owner: [BusOwner; HPOS_CNT_USIZE],
    pub bus_value: [u16; HPOS_CNT_USIZE],
    pub stats: BusStats,
    /// Bus-stall signal asserted by the CPU while it waits for the chip bus.
    pub bls: bool,
}

impl Agnus {
    #[must_use]
    pub fn new() -> Self {
        let mut agnus = Self {
            frame: Frame::first(0),
            pos: Beam::default(),
            line_start: 0,
            dmacon: 0,
            bplcon0: 0,
            bplcon1: 0,
            diwstrt: 0,
            diwstop: 0,
            ddfstrt: 0,
            ddfstop: 0,
            bpl1mod: 0,
            bpl2mod: 0,
            dskpt: 0,
            bplpt: [0; 6],
            audlc: [0; 4],
            audpt: [0; 4],
            sprpt: [0; 8],
            bpldat: [0; 6],
            odd_shift_loads: 0,
            even_shift_loads: 0,
            spr_vstrt: [0; 8],
            spr_vstop: [0; 8],
            spr_dma_active: [false; 8],
            bpl_dma: build_bpl_table(),
            das_dma: build_das_table(),
            bpl_event: [EVT_NONE; HPOS_CNT_USIZE],
            das_event: [EVT_NONE; HPOS_CNT_USIZE],
            next_bpl_event: [NO_EVENT; HPOS_CNT_USIZE],
            next_das_event: [NO_EVENT; HPOS_CNT_USIZE],
            hsync_actions: 0,
            bpl_dma_line: false,
            bus_owner: [BusOwner::None; HPOS_CNT_USIZE],
            bus_value: [0; HPOS_CNT_USIZE],
            stats: BusStats::default(),
            bls: false,
        };
        agnus.update_bpl_events_from(0);
        agnus.update_das_events_from(0);
        agnus
    }

    pub fn reset(&mut self, clock: Cycle) {
        let stats = self.stats;
        *self = Self::new();
        self.stats = stats;
        self.frame = Frame::first(clock);
        self.line_start = clock;
    }

    /// Derive the horizontal beam position from the master clock.
    ///
    /// Right at a line boundary the clock may still sit on the final cycle
    /// of the previous line; the position then reads as the new line's
    /// start.
    pub fn update_pos(&mut self, clock: Cycle) {
        if clock < self.line_start {
            self.pos.h = 0;
            return;
        }
        self.pos.h = (((clock - self.line_start) / MASTER_PER_DMA) as i16).min(HPOS_MAX);
    }

    // DMA enable checks (all gated by the DMACON master enable)

    #[must_use]
    pub fn dma_enabled(&self, bit: u16) -> bool {
        self.dmacon & DMAEN != 0 && self.dmacon & bit != 0
    }

    #[must_use]
    pub fn bpldma(&self) -> bool {
        self.dma_enabled(BPLEN)
    }

    #[must_use]
    pub fn copdma(&self) -> bool {
        self.dma_enabled(COPEN)
    }

    #[must_use]
    pub fn bltdma(&self) -> bool {
        self.dma_enabled(BLTEN)
    }

    #[must_use]
    pub fn auddma(&self, channel: usize) -> bool {
        self.dma_enabled(AUDEN[channel])
    }

    #[must_use]
    pub fn bltpri(&self) -> bool {
        self.dmacon & BLTPRI != 0
    }

    /// Number of bitplanes in use (0-6).
    #[must_use]
    pub fn bpu(&self) -> usize {
        (((self.bplcon0 >> 12) & 0x7) as usize).min(6)
    }

    #[must_use]
    pub fn hires(&self) -> bool {
        self.bplcon0 & HIRES != 0
    }

    #[must_use]
    pub fn lace(&self) -> bool {
        self.bplcon0 & LACE != 0
    }

    /// First display line from DIWSTRT.
    #[must_use]
    pub fn diw_vstrt(&self) -> i16 {
        (self.diwstrt >> 8) as i16
    }

    /// Last display line (exclusive) from DIWSTOP; V8 is the complement of
    /// the written MSB.
    #[must_use]
    pub fn diw_vstop(&self) -> i16 {
        let mut v = (self.diwstop >> 8) as i16;
        if self.diwstop & 0x8000 == 0 {
            v |= 0x100;
        }
        v
    }

    /// Does bitplane DMA run in the given line?
    #[must_use]
    pub fn in_bpl_dma_line(&self, v: i16) -> bool {
        self.bpldma() && self.bpu() > 0 && v >= self.diw_vstrt() && v < self.diw_vstop()
    }

    /// Latch the per-line bitplane DMA decision (called at line start).
    pub fn latch_bpl_dma_line(&mut self) {
        self.bpl_dma_line = self.in_bpl_dma_line(self.pos.v);
    }

    /// DAS lookup row selected by the current DMACON value.
    #[must_use]
    pub fn das_index(&self) -> usize {
        if self.dmacon & DMAEN != 0 {
            (self.dmacon & 0x3F) as usize
        } else {
            0
        }
    }

    /// Shift-register load position for odd planes within a fetch unit.
    #[must_use]
    pub fn scroll_odd(&self) -> usize {
        let stride = if self.hires() { 4 } else { 8 };
        ((self.bplcon1 & 0x0F) as usize >> 1) & (stride - 1)
    }

    /// Shift-register load position for even planes within a fetch unit.
    #[must_use]
    pub fn scroll_even(&self) -> usize {
        let stride = if self.hires() { 4 } else { 8 };
        (((self.bplcon1 >> 4) & 0x0F) as usize >> 1) & (stride - 1)
    }

    /// Is the fetch window open at position `h`?
    ///
    /// The data fetch runs from DDFSTRT to DDFSTOP plus the tail of the last
    /// fetch unit.
    #[must_use]
    fn in_fetch_window(&self, h: usize) -> bool {
        let strt = (self.ddfstrt & 0xFC) as usize;
        let stop = (self.ddfstop & 0xFC) as usize;
        h >= strt && h <= stop + 7
    }

    /// Rebuild the bitplane event array from position `first` to the end of
    /// the line, then renew the jump table.
    pub fn update_bpl_events_from(&mut self, first: usize) {
        let channels = if self.bpl_dma_line { self.bpu() } else { 0 };
        let res = usize::from(self.hires());
        let row = &self.bpl_dma[res][channels];

        for h in first..HPOS_CNT_USIZE {
            self.bpl_event[h] = if self.in_fetch_window(h) {
                row[h]
            } else {
                EVT_NONE
            };
        }
        self.bpl_event[HPOS_MAX as usize] = BPL_EOL;

        self.apply_drawing_flags(first);
        update_jump_table(&self.bpl_event, &mut self.next_bpl_event);
    }

    /// Superimpose the shift-register load flags on populated entries.
    fn apply_drawing_flags(&mut self, first: usize) {
        let stride = if self.hires() { 4 } else { 8 };
        let odd = self.scroll_odd();
        let even = self.scroll_even();

        for h in first..HPOS_CNT_USIZE {
            let code = self.bpl_event[h] & !DRAW_MASK;
            if code == EVT_NONE || code == BPL_EOL {
                self.bpl_event[h] = code;
                continue;
            }
            let mut flags = 0;
            if h % stride == odd {
                flags |= DRAW_ODD;
            }
            if h % stride == even {
                flags |= DRAW_EVEN;
            }
            self.bpl_event[h] = code | flags;
        }
    }

    /// Rebuild the DAS event array from position `first`, then renew the
    /// jump table.
    pub fn update_das_events_from(&mut self, first: usize) {
        let row = &self.das_dma[self.das_index()];
        self.das_event[first..HPOS_CNT_USIZE].copy_from_slice(&row[first..HPOS_CNT_USIZE]);
        update_jump_table(&self.das_event, &mut self.next_das_event);
    }

    /// Earliest position `h >= from` holding any DMA event on this line.
    #[must_use]
    pub fn next_dma_h(&self, from: i16) -> Option<i16> {
        if from < 0 || from >= HPOS_CNT {
            return None;
        }
        let from = from as usize;
        let h = self.next_bpl_event[from].min(self.next_das_event[from]);
        (h != NO_EVENT).then_some(h as i16)
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.i64(self.frame.nr);
        w.bool(self.frame.long);
        w.i64(self.frame.start);
        w.i16(self.pos.v);
        w.i16(self.pos.h);
        w.i64(self.line_start);

        w.u16(self.dmacon);
        w.u16(self.bplcon0);
        w.u16(self.bplcon1);
        w.u16(self.diwstrt);
        w.u16(self.diwstop);
        w.u16(self.ddfstrt);
        w.u16(self.ddfstop);
        w.i16(self.bpl1mod);
        w.i16(self.bpl2mod);

        w.u32(self.dskpt);
        for pt in self.bplpt {
            w.u32(pt);
        }
        for lc in self.audlc {
            w.u32(lc);
        }
        for pt in self.audpt {
            w.u32(pt);
        }
        for pt in self.sprpt {
            w.u32(pt);
        }
        for dat in self.bpldat {
            w.u16(dat);
        }
        w.u64(self.odd_shift_loads);
        w.u64(self.even_shift_loads);
        for i in 0..8 {
            w.i16(self.spr_vstrt[i]);
            w.i16(self.spr_vstop[i]);
            w.bool(self.spr_dma_active[i]);
        }

        w.bytes(&self.bpl_event);
        w.bytes(&self.das_event);
        w.u8(self.hsync_actions);
        w.bool(self.bpl_dma_line);
        w.bool(self.bls);

        for owner in self.bus_owner {
            w.u8(owner as u8);
        }
        for value in self.bus_value {
            w.u16(value);
        }
        for count in self.stats.accesses {
            w.u64(count);
        }
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.frame.nr = r.i64()?;
        self.frame.long = r.bool()?;
        self.frame.start = r.i64()?;
        self.pos.v = r.i16()?;
        self.pos.h = r.i16()?;
        self.line_start = r.i64()?;

        self.dmacon = r.u16()?;
        self.bplcon0 = r.u16()?;
        self.bplcon1 = r.u16()?;
        self.diwstrt = r.u16()?;
        self.diwstop = r.u16()?;
        self.ddfstrt = r.u16()?;
        self.ddfstop = r.u16()?;
        self.bpl1mod = r.i16()?;
        self.bpl2mod = r.i16()?;

        self.dskpt = r.u32()?;
        for pt in &mut self.bplpt {
            *pt = r.u32()?;
        }
        for lc in &mut self.audlc {
            *lc = r.u32()?;
        }
        for pt in &mut self.audpt {
            *pt = r.u32()?;
        }
        for pt in &mut self.sprpt {
            *pt = r.u32()?;
        }
        for dat in &mut self.bpldat {
            *dat = r.u16()?;
        }
        self.odd_shift_loads = r.u64()?;
        self.even_shift_loads = r.u64()?;
        for i in 0..8 {
            self.spr_vstrt[i] = r.i16()?;
            self.spr_vstop[i] = r.i16()?;
            self.spr_dma_active[i] = r.bool()?;
        }

        r.bytes(&mut self.bpl_event)?;
        r.bytes(&mut self.das_event)?;
        self.hsync_actions = r.u8()?;
        self.bpl_dma_line = r.bool()?;
        self.bls = r.bool()?;

        for owner in &mut self.bus_owner {
            *owner = bus::BusOwner::from_u8(r.u8()?).ok_or_else(|| {
                crate::error::Error::IncompatibleSnapshot("unknown bus owner".into())
            })?;
        }
        for value in &mut self.bus_value {
            *value = r.u16()?;
        }
        for count in &mut self.stats.accesses {
            *count = r.u64()?;
        }

        // Derived state: the jump tables follow from the event arrays
        update_jump_table(&self.bpl_event, &mut self.next_bpl_event);
        update_jump_table(&self.das_event, &mut self.next_das_event);
        Ok(())
    }

    /// Debug check for the jump-table/event-array correspondence.
    pub fn verify_jump_tables(&self) {
        for (events, next) in [
            (&self.bpl_event, &self.next_bpl_event),
            (&self.das_event, &self.next_das_event),
        ] {
            for i in 0..HPOS_CNT_USIZE {
                let expected = if events[i] != EVT_NONE {
                    i as u8
                } else if i + 1 < HPOS_CNT_USIZE {
                    next[i + 1]
                } else {
                    NO_EVENT
                };
                assert_eq!(next[i], expected, "jump table stale at {i:#x}");
            }
        }
    }
}

impl Default for Agnus {
    fn default() -> Self {
        Self::new()
    }
}
