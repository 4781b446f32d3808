//! Deferred custom-register writes.
//!
//! Pokes to most chipset registers take effect two DMA cycles after the bus
//! access, which matters when a Copper MOVE or CPU write races a DMA fetch.
//! Instead of threading callbacks through every poke, changes are parked in
//! a small sorted queue and applied by the dispatch loop before any event at
//! or after their effective cycle.

use crate::beam::{Cycle, NEVER, dma_cycles};

/// Registers whose writes are routed through the change recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipReg {
    Dmacon,
    Intena,
    Intreq,
    Adkcon,
    Diwstrt,
    Diwstop,
    Ddfstrt,
    Ddfstop,
    Bplcon0,
    Bpl1Mod,
    Bpl2Mod,
    /// Bitplane pointer halves; the payload is the plane index (0-5).
    BplPtH(u8),
    BplPtL(u8),
}

impl ChipReg {
    /// Master cycles between the bus write and the register taking effect.
    ///
    /// The delays are empirically derived per register; keeping them here in
    /// one table avoids scattering magic constants through the poke paths.
    #[must_use]
    pub fn delay(self) -> Cycle {
        match self {
            ChipReg::Dmacon
            | ChipReg::Intena
            | ChipReg::Intreq
            | ChipReg::Adkcon
            | ChipReg::Diwstrt
            | ChipReg::Diwstop
            | ChipReg::Ddfstrt
            | ChipReg::Ddfstop
            | ChipReg::Bplcon0
            | ChipReg::Bpl1Mod
            | ChipReg::Bpl2Mod
            | ChipReg::BplPtH(_)
            | ChipReg::BplPtL(_) => dma_cycles(2),
        }
    }
}

impl ChipReg {
    /// Wire code for snapshots.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            ChipReg::Dmacon => 0,
            ChipReg::Intena => 1,
            ChipReg::Intreq => 2,
            ChipReg::Adkcon => 3,
            ChipReg::Diwstrt => 4,
            ChipReg::Diwstop => 5,
            ChipReg::Ddfstrt => 6,
            ChipReg::Ddfstop => 7,
            ChipReg::Bplcon0 => 8,
            ChipReg::Bpl1Mod => 9,
            ChipReg::Bpl2Mod => 10,
            ChipReg::BplPtH(plane) => 0x100 | u16::from(plane),
            ChipReg::BplPtL(plane) => 0x200 | u16::from(plane),
        }
    }

    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => ChipReg::Dmacon,
            1 => ChipReg::Intena,
            2 => ChipReg::Intreq,
            3 => ChipReg::Adkcon,
            4 => ChipReg::Diwstrt,
            5 => ChipReg::Diwstop,
            6 => ChipReg::Ddfstrt,
            7 => ChipReg::Ddfstop,
            8 => ChipReg::Bplcon0,
            9 => ChipReg::Bpl1Mod,
            10 => ChipReg::Bpl2Mod,
            0x100..=0x105 => ChipReg::BplPtH(code as u8),
            0x200..=0x205 => ChipReg::BplPtL(code as u8),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegChange {
    pub cycle: Cycle,
    pub reg: ChipReg,
    pub value: u16,
}

const CAPACITY: usize = 64;

/// Fixed-capacity queue of pending register changes, ordered by effective
/// cycle. Insertion order is preserved among equal cycles.
pub struct ChangeRecorder {
    items: Vec<RegChange>,
}

impl ChangeRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::with_capacity(CAPACITY),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Cycle of the earliest pending change, or `NEVER`.
    #[must_use]
    pub fn next_trigger(&self) -> Cycle {
        self.items.first().map_or(NEVER, |c| c.cycle)
    }

    pub fn record(&mut self, cycle: Cycle, reg: ChipReg, value: u16) {
        assert!(self.items.len() < CAPACITY, "register change queue overflow");
        // Insert behind any change with the same cycle to keep write order
        let at = self.items.partition_point(|c| c.cycle <= cycle);
        self.items.insert(at, RegChange { cycle, reg, value });
    }

    /// Remove and return the earliest pending change.
    pub fn pop(&mut self) -> RegChange {
        self.items.remove(0)
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.u32(self.items.len() as u32);
        for change in &self.items {
            w.i64(change.cycle);
            w.u16(change.reg.code());
            w.u16(change.value);
        }
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.items.clear();
        let len = r.u32()? as usize;
        for _ in 0..len {
            let cycle = r.i64()?;
            let code = r.u16()?;
            let reg = ChipReg::from_code(code).ok_or_else(|| {
                crate::error::Error::IncompatibleSnapshot(format!("unknown register {code:#x}"))
            })?;
            let value = r.u16()?;
            self.items.push(RegChange { cycle, reg, value });
        }
        Ok(())
    }
}

impl Default for ChangeRecorder {
    fn default() -> Self {
        Self::new()
    }
}
