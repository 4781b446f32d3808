//! Floppy disk controller.
//!
//! The controller sits between the drive mechanism and chip RAM. Bytes
//! travel through a 6-byte FIFO held in a 48-bit shift register: the
//! `DskRotate` event feeds it at drive speed, and the per-line DMA transfer
//! empties (or fills) it word by word through the Agnus disk pointer.
//!
//! Three transfer modes exist. FIFO mode is the accurate one. Simple mode
//! skips the byte FIFO and moves whole words per rasterline. Turbo mode
//! (for turbo drives) transfers the entire block the moment DSKLEN arms.

use crate::amiga::Amiga;
use crate::beam::{Cycle, dma_cycles, msec};
use crate::messages::Message;
use crate::paula::IrqSource;
use crate::scheduler::{EventId, SecSlot};
use format_adf::Adf;
use serde::Serialize;

/// Drive rotation cadence: one byte every 56 DMA cycles.
pub const ROTATION_PERIOD: Cycle = dma_cycles(56);

/// Minimum settle time between ejecting and inserting a disk; shorter and
/// the guest OS misses the change.
pub const DISK_CHANGE_DELAY: Cycle = msec(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriveDmaState {
    Off,
    /// Reading armed, waiting for a sync word.
    Wait,
    Read,
    Write,
    /// Write DMA complete, draining the FIFO.
    Flush,
}

pub struct DiskController {
    pub state: DriveDmaState,

    /// 48-bit shift register holding up to six bytes.
    fifo: u64,
    fifo_count: u8,

    pub dsklen: u16,
    pub dsksync: u16,
    /// Last byte read from the drive, with its arrival time (for DSKBYTR).
    pub incoming: u8,
    pub incoming_cycle: Cycle,
    /// Mirror of CIA-B PRB.
    pub prb: u8,
    pub selected: Option<usize>,
    pub sync_flag: bool,
    pub use_fifo: bool,

    pub connected: [bool; 4],
    pub disk_to_insert: Option<Adf>,
}

impl DiskController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DriveDmaState::Off,
            fifo: 0,
            fifo_count: 0,
            dsklen: 0,
            dsksync: 0x4489,
            incoming: 0,
            incoming_cycle: 0,
            prb: 0xFF,
            selected: None,
            sync_flag: false,
            use_fifo: true,
            connected: [true, false, false, false],
            disk_to_insert: None,
        }
    }

    pub fn reset(&mut self) {
        let connected = self.connected;
        let use_fifo = self.use_fifo;
        *self = Self::new();
        self.connected = connected;
        self.use_fifo = use_fifo;
    }

    pub fn clear_fifo(&mut self) {
        self.fifo = 0;
        self.fifo_count = 0;
    }

    #[must_use]
    pub fn fifo_count(&self) -> u8 {
        self.fifo_count
    }

    #[must_use]
    pub fn fifo_is_empty(&self) -> bool {
        self.fifo_count == 0
    }

    #[must_use]
    pub fn fifo_has_word(&self) -> bool {
        self.fifo_count >= 2
    }

    #[must_use]
    pub fn fifo_can_store_word(&self) -> bool {
        self.fifo_count <= 4
    }

    /// Append a byte; a full FIFO drops its oldest word (hardware overrun).
    pub fn write_fifo(&mut self, byte: u8) {
        debug_assert!(self.fifo_count <= 6);
        if self.fifo_count == 6 {
            self.fifo_count -= 2;
        }
        self.fifo = (self.fifo << 8) | u64::from(byte);
        self.fifo_count += 1;
    }

    /// Remove the oldest byte.
    pub fn read_fifo(&mut self) -> u8 {
        debug_assert!(self.fifo_count > 0);
        self.fifo_count -= 1;
        (self.fifo >> (8 * self.fifo_count)) as u8
    }

    /// Remove the oldest word.
    pub fn read_fifo16(&mut self) -> u16 {
        debug_assert!(self.fifo_has_word());
        self.fifo_count -= 2;
        (self.fifo >> (8 * self.fifo_count)) as u16
    }

    /// Do the most recent two bytes match `word`?
    #[must_use]
    pub fn compare_fifo(&self, word: u16) -> bool {
        self.fifo_has_word() && (self.fifo & 0xFFFF) as u16 == word
    }

    /// The 14-bit word counter of DSKLEN.
    #[must_use]
    pub fn word_count(&self) -> u16 {
        self.dsklen & 0x3FFF
    }

    /// FIFO contents, oldest byte first (for inspection).
    #[must_use]
    pub fn fifo_bytes(&self) -> [u8; 6] {
        let mut bytes = [0; 6];
        for (i, byte) in bytes.iter_mut().enumerate().take(self.fifo_count as usize) {
            *byte = (self.fifo >> (8 * (self.fifo_count as usize - 1 - i))) as u8;
        }
        bytes
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.u8(match self.state {
            DriveDmaState::Off => 0,
            DriveDmaState::Wait => 1,
            DriveDmaState::Read => 2,
            DriveDmaState::Write => 3,
            DriveDmaState::Flush => 4,
        });
        w.u64(self.fifo);
        w.u8(self.fifo_count);
        w.u16(self.dsklen);
        w.u16(self.dsksync);
        w.u8(self.incoming);
        w.i64(self.incoming_cycle);
        w.u8(self.prb);
        w.u8(self.selected.map_or(0xFF, |nr| nr as u8));
        w.bool(self.sync_flag);
        w.bool(self.use_fifo);
        for connected in self.connected {
            w.bool(connected);
        }
        match &self.disk_to_insert {
            Some(adf) => {
                w.bool(true);
                w.blob(adf.data());
            }
            None => w.bool(false),
        }
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.state = match r.u8()? {
            0 => DriveDmaState::Off,
            1 => DriveDmaState::Wait,
            2 => DriveDmaState::Read,
            3 => DriveDmaState::Write,
            4 => DriveDmaState::Flush,
            other => {
                return Err(crate::error::Error::IncompatibleSnapshot(format!(
                    "unknown disk state {other}"
                )));
            }
        };
        self.fifo = r.u64()?;
        self.fifo_count = r.u8()?;
        self.dsklen = r.u16()?;
        self.dsksync = r.u16()?;
        self.incoming = r.u8()?;
        self.incoming_cycle = r.i64()?;
        self.prb = r.u8()?;
        self.selected = match r.u8()? {
            0xFF => None,
            nr => Some(nr as usize),
        };
        self.sync_flag = r.bool()?;
        self.use_fifo = r.bool()?;
        for connected in &mut self.connected {
            *connected = r.bool()?;
        }
        self.disk_to_insert = if r.bool()? {
            Some(Adf::from_bytes(r.blob()?).map_err(crate::error::Error::FileFormat)?)
        } else {
            None
        };
        Ok(())
    }
}

impl Default for DiskController {
    fn default() -> Self {
        Self::new()
    }
}

impl Amiga {
    /// Is any connected drive motor running?
    #[must_use]
    pub fn drives_spinning(&self) -> bool {
        (0..4).any(|nr| self.paula.disk.connected[nr] && self.drives[nr].motor())
    }

    pub(crate) fn set_disk_state(&mut self, state: DriveDmaState) {
        let old = self.paula.disk.state;
        if old == state {
            return;
        }
        self.paula.disk.state = state;

        let was_writing = old == DriveDmaState::Write;
        let is_writing = state == DriveDmaState::Write;
        if was_writing != is_writing && let Some(nr) = self.paula.disk.selected {
            self.messages.put(if is_writing {
                Message::DriveWrite { drive: nr as u8 }
            } else {
                Message::DriveRead { drive: nr as u8 }
            });
        }
    }

    /// DSKLEN write. DMA arms only on the second consecutive write with the
    /// enable bit set; a write with bit 15 clear always disarms.
    pub(crate) fn poke_dsklen(&mut self, value: u16) {
        let old = self.paula.disk.dsklen;
        self.paula.disk.dsklen = value;
        self.paula.disk.use_fifo = self.config.fifo_buffering;

        if value & 0x8000 == 0 {
            self.set_disk_state(DriveDmaState::Off);
            self.paula.disk.clear_fifo();
        } else if old & value & 0x8000 != 0 {
            if old & value & 0x4000 != 0 {
                self.set_disk_state(DriveDmaState::Write);
            } else if self.paula.wordsync() {
                self.set_disk_state(DriveDmaState::Wait);
            } else {
                self.set_disk_state(DriveDmaState::Read);
            }
            self.paula.disk.clear_fifo();
        }

        if let Some(nr) = self.paula.disk.selected
            && self.drives[nr].is_turbo()
        {
            self.perform_turbo_dma(nr);
        }
    }

    /// DSKBYTR: the byte-level read-back register.
    #[must_use]
    pub fn peek_dskbytr(&self) -> u16 {
        let disk = &self.paula.disk;
        let mut result = u16::from(disk.incoming);
        // DSKBYT: the byte is fresh for 7 master cycles
        if self.sched.clock - disk.incoming_cycle <= 7 {
            result |= 0x8000;
        }
        if self.agnus.dma_enabled(crate::agnus::DSKEN) && disk.state != DriveDmaState::Off {
            result |= 0x4000;
        }
        if disk.dsklen & 0x4000 != 0 {
            result |= 0x2000;
        }
        if disk.sync_flag {
            result |= 0x1000;
        }
        result
    }

    /// CIA-B PRB changed: forward the control lines to every connected
    /// drive, re-resolve the selection, and keep the rotation event running
    /// exactly while a motor spins.
    pub(crate) fn prb_did_change(&mut self, old: u8, new: u8) {
        self.paula.disk.prb = new;

        let old_selected = self.paula.disk.selected;
        self.paula.disk.selected = None;
        for nr in 0..4 {
            if !self.paula.disk.connected[nr] {
                continue;
            }
            self.drives[nr].prb_did_change(old, new);
            if self.drives[nr].is_selected() {
                self.paula.disk.selected = Some(nr);
            }
        }

        if !self.drives_spinning() {
            self.sched.cancel_sec(SecSlot::Dsk);
        } else if !self.sched.has_sec_event(SecSlot::Dsk) {
            self.sched
                .schedule_sec_rel(SecSlot::Dsk, ROTATION_PERIOD, EventId::DskRotate, 0);
        }

        self.update_drive_status();

        if old_selected != self.paula.disk.selected {
            self.messages.put(Message::DriveSelect {
                drive: self.paula.disk.selected.map(|nr| nr as u8),
            });
        }
    }

    /// Mirror the selected drives' status lines into CIA-A port A.
    pub(crate) fn update_drive_status(&mut self) {
        let mut combined = 0xFFu8;
        for nr in 0..4 {
            if self.paula.disk.connected[nr] {
                combined &= self.drives[nr].drive_status_flags();
            }
        }
        // Bits 5-2 are drive lines; fire buttons and port outputs stay high
        self.cia_a.external_a = (combined & 0x3C) | 0xC3;
    }

    /// The `DskRotate` event: one drive byte worth of time has passed.
    pub(crate) fn service_disk_event(&mut self) {
        if self.paula.disk.use_fifo {
            self.execute_fifo();
        } else if let Some(nr) = self.paula.disk.selected {
            // Simple mode moves data per rasterline; the event only keeps
            // the platter turning.
            self.drives[nr].rotate();
        }
        self.sched
            .schedule_sec_rel(SecSlot::Dsk, ROTATION_PERIOD, EventId::DskRotate, 0);
    }

    /// Move one byte between the selected drive head and the FIFO.
    pub(crate) fn execute_fifo(&mut self) {
        let Some(nr) = self.paula.disk.selected else {
            return;
        };

        match self.paula.disk.state {
            DriveDmaState::Off => {
                self.drives[nr].rotate();
            }

            DriveDmaState::Wait | DriveDmaState::Read => {
                let byte = self.drives[nr].read_head();
                self.paula.disk.incoming = byte;
                self.paula.disk.incoming_cycle = self.sched.clock;
                self.paula.disk.write_fifo(byte);

                let sync = self.paula.disk.compare_fifo(self.paula.disk.dsksync);
                self.paula.disk.sync_flag = sync;
                if sync {
                    self.raise_irq(IrqSource::Dsksyn);
                    if self.paula.disk.state == DriveDmaState::Wait {
                        self.set_disk_state(DriveDmaState::Read);
                        self.paula.disk.clear_fifo();
                    }
                }
            }

            DriveDmaState::Write | DriveDmaState::Flush => {
                if self.paula.disk.fifo_is_empty() {
                    if self.paula.disk.state == DriveDmaState::Flush {
                        self.set_disk_state(DriveDmaState::Off);
                    }
                } else {
                    let byte = self.paula.disk.read_fifo();
                    self.drives[nr].write_head(byte);
                }
            }
        }
    }

    /// Word transfer between FIFO and chip RAM, invoked from the disk slots
    /// of each rasterline. Moves up to `drive.speed` words per call.
    pub(crate) fn perform_dma(&mut self) {
        if self.paula.disk.word_count() == 0 {
            return;
        }
        let state = self.paula.disk.state;
        if state != DriveDmaState::Read && state != DriveDmaState::Write {
            return;
        }
        let Some(nr) = self.paula.disk.selected else {
            return;
        };
        let count = self.drives[nr].speed;

        match state {
            DriveDmaState::Read => self.perform_dma_read(count),
            DriveDmaState::Write => self.perform_dma_write(nr, count),
            _ => unreachable!(),
        }
    }

    fn perform_dma_read(&mut self, mut remaining: u32) {
        if !self.paula.disk.fifo_has_word() {
            return;
        }

        loop {
            let word = self.paula.disk.read_fifo16();
            self.agnus.do_disk_dma_write(&mut self.memory, word);

            self.paula.disk.dsklen = self.paula.disk.dsklen.wrapping_sub(1);
            if self.paula.disk.word_count() == 0 {
                self.raise_irq(IrqSource::Dskblk);
                self.set_disk_state(DriveDmaState::Off);
                return;
            }

            remaining -= 1;
            if remaining == 0 {
                return;
            }

            // Keep byte-level drive timing consistent with the word transfer
            self.execute_fifo();
            self.execute_fifo();
            if !self.paula.disk.fifo_has_word() {
                return;
            }
        }
    }

    fn perform_dma_write(&mut self, nr: usize, mut remaining: u32) {
        if !self.paula.disk.fifo_can_store_word() {
            return;
        }

        loop {
            let word = self.agnus.do_disk_dma_read(&self.memory);
            self.paula.disk.write_fifo((word >> 8) as u8);
            self.paula.disk.write_fifo(word as u8);

            self.paula.disk.dsklen = self.paula.disk.dsklen.wrapping_sub(1);
            if self.paula.disk.word_count() == 0 {
                self.raise_irq(IrqSource::Dskblk);

                // Drain the FIFO right away instead of modeling the Flush
                // state; the interrupt would otherwise precede the last
                // byte reaching the disk.
                while !self.paula.disk.fifo_is_empty() {
                    let byte = self.paula.disk.read_fifo();
                    self.drives[nr].write_head(byte);
                }
                self.set_disk_state(DriveDmaState::Off);
                return;
            }

            remaining -= 1;
            if remaining == 0 {
                return;
            }

            self.execute_fifo();
            self.execute_fifo();
            if !self.paula.disk.fifo_can_store_word() {
                return;
            }
        }
    }

    /// Word-granular transfer without FIFO emulation.
    pub(crate) fn perform_simple_dma(&mut self) {
        let Some(nr) = self.paula.disk.selected else {
            return;
        };
        if self.paula.disk.word_count() == 0 {
            return;
        }
        let count = self.drives[nr].speed;

        match self.paula.disk.state {
            DriveDmaState::Wait => {
                for _ in 0..count {
                    let word = self.drives[nr].read_head16();
                    if word == self.paula.disk.dsksync {
                        self.paula.disk.sync_flag = true;
                        self.raise_irq(IrqSource::Dsksyn);
                        self.set_disk_state(DriveDmaState::Read);
                        return;
                    }
                }
            }
            DriveDmaState::Read => {
                for _ in 0..count {
                    let word = self.drives[nr].read_head16();
                    self.agnus.do_disk_dma_write(&mut self.memory, word);
                    self.paula.disk.dsklen = self.paula.disk.dsklen.wrapping_sub(1);
                    if self.paula.disk.word_count() == 0 {
                        self.raise_irq(IrqSource::Dskblk);
                        self.set_disk_state(DriveDmaState::Off);
                        return;
                    }
                }
            }
            DriveDmaState::Write => {
                for _ in 0..count {
                    let word = self.agnus.do_disk_dma_read(&self.memory);
                    self.drives[nr].write_head16(word);
                    self.paula.disk.dsklen = self.paula.disk.dsklen.wrapping_sub(1);
                    if self.paula.disk.word_count() == 0 {
                        self.raise_irq(IrqSource::Dskblk);
                        self.set_disk_state(DriveDmaState::Off);
                        return;
                    }
                }
            }
            _ => {}
        }
    }

    /// Connect or disconnect a drive. df0 is built in and stays.
    pub fn set_drive_connected(&mut self, nr: usize, connected: bool) {
        assert!(nr < 4);
        if nr == 0 && !connected {
            return;
        }
        if self.paula.disk.connected[nr] == connected {
            return;
        }
        self.paula.disk.connected[nr] = connected;
        self.config.drives[nr].connected = connected;
        self.messages.put(if connected {
            Message::DriveConnect { drive: nr as u8 }
        } else {
            Message::DriveDisconnect { drive: nr as u8 }
        });
        self.messages.put(Message::Config);
        self.update_drive_status();
    }

    /// Switch between accurate FIFO emulation and simple word transfers.
    /// Takes effect the next time DSKLEN arms a transfer.
    pub fn set_fifo_buffering(&mut self, value: bool) {
        if self.config.fifo_buffering == value {
            return;
        }
        self.config.fifo_buffering = value;
        self.messages.put(Message::Config);
    }

    /// Turbo drives transfer the whole block at once; the completion
    /// interrupt follows after a plausible delay. Audio is muted for the
    /// duration, as the host would otherwise hear the time warp.
    pub(crate) fn perform_turbo_dma(&mut self, nr: usize) {
        if self.paula.disk.word_count() == 0 {
            return;
        }
        let state = self.paula.disk.state;
        if !matches!(
            state,
            DriveDmaState::Wait | DriveDmaState::Read | DriveDmaState::Write
        ) {
            return;
        }

        self.messages.put(Message::MuteOn);
        match state {
            DriveDmaState::Wait | DriveDmaState::Read => {
                if state == DriveDmaState::Wait {
                    self.drives[nr].find_sync_mark();
                }
                for _ in 0..self.paula.disk.word_count() {
                    let word = self.drives[nr].read_head16();
                    let dskpt = self.agnus.dskpt;
                    self.agnus.poke(&mut self.memory, dskpt, word);
                    self.agnus.dskpt = (dskpt + 2) & crate::memory::PTR_MASK;
                }
            }
            DriveDmaState::Write => {
                for _ in 0..self.paula.disk.word_count() {
                    let dskpt = self.agnus.dskpt;
                    let word = self.agnus.peek(&self.memory, dskpt);
                    self.agnus.dskpt = (dskpt + 2) & crate::memory::PTR_MASK;
                    self.drives[nr].write_head16(word);
                }
            }
            _ => unreachable!(),
        }
        self.messages.put(Message::MuteOff);

        self.schedule_irq_rel(IrqSource::Dskblk, dma_cycles(512));
        self.set_disk_state(DriveDmaState::Off);
    }

    /// Queue a disk insertion. An occupied drive is ejected first and the
    /// insertion is delayed so the change is observable.
    pub fn insert_disk(&mut self, nr: usize, adf: Adf, delay: Cycle) {
        assert!(nr < 4);
        let mut delay = delay;
        if self.drives[nr].has_disk() {
            self.drives[nr].eject_disk();
            delay = delay.max(DISK_CHANGE_DELAY);
        }
        self.paula.disk.disk_to_insert = Some(adf);
        self.sched
            .schedule_sec_rel(SecSlot::Dch, delay, EventId::DchInsert, nr as i64);
    }

    pub fn eject_disk(&mut self, nr: usize, delay: Cycle) {
        assert!(nr < 4);
        self.sched
            .schedule_sec_rel(SecSlot::Dch, delay, EventId::DchEject, nr as i64);
    }

    pub(crate) fn service_disk_change_event(&mut self, id: EventId, data: i64) {
        let nr = data as usize;
        match id {
            EventId::DchInsert => {
                if let Some(adf) = self.paula.disk.disk_to_insert.take() {
                    self.drives[nr].insert_disk(adf);
                }
            }
            EventId::DchEject => {
                self.drives[nr].eject_disk();
            }
            _ => unreachable!("not a disk change event: {id:?}"),
        }
        self.sched.cancel_sec(SecSlot::Dch);
        self.update_drive_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_counts_and_word_views() {
        let mut disk = DiskController::new();
        assert!(disk.fifo_is_empty());
        assert!(!disk.fifo_has_word());
        assert!(disk.fifo_can_store_word());

        disk.write_fifo(0x11);
        assert!(!disk.fifo_has_word());
        disk.write_fifo(0x22);
        assert!(disk.fifo_has_word());
        assert_eq!(disk.read_fifo16(), 0x1122);
        assert!(disk.fifo_is_empty());
    }

    #[test]
    fn fifo_overrun_drops_the_oldest_word() {
        let mut disk = DiskController::new();
        for byte in 1..=6 {
            disk.write_fifo(byte);
        }
        assert_eq!(disk.fifo_count(), 6);

        disk.write_fifo(7);
        assert_eq!(disk.fifo_count(), 5);
        // Bytes 1 and 2 are gone
        assert_eq!(disk.read_fifo(), 3);
    }

    #[test]
    fn fifo_read_returns_oldest_first() {
        let mut disk = DiskController::new();
        disk.write_fifo(0xAA);
        disk.write_fifo(0xBB);
        disk.write_fifo(0xCC);
        assert_eq!(disk.read_fifo(), 0xAA);
        assert_eq!(disk.read_fifo(), 0xBB);
        assert_eq!(disk.read_fifo(), 0xCC);
    }

    #[test]
    fn compare_matches_the_latest_word() {
        let mut disk = DiskController::new();
        disk.write_fifo(0x44);
        assert!(!disk.compare_fifo(0x4489), "needs a full word");
        disk.write_fifo(0x89);
        assert!(disk.compare_fifo(0x4489));
        disk.write_fifo(0xAA);
        assert!(!disk.compare_fifo(0x4489));
    }

    #[test]
    fn word_count_is_the_low_fourteen_bits() {
        let mut disk = DiskController::new();
        disk.dsklen = 0x8000 | 0x1234;
        assert_eq!(disk.word_count(), 0x1234);
    }
}
