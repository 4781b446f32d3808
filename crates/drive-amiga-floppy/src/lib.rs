//! Amiga floppy drive mechanism.
//!
//! Emulates the physical drive: head positioning, motor control with
//! spin-up, disk-change detection, and a byte-granular view of the current
//! track's MFM stream. Control signals arrive from CIA-B port B; status
//! signals feed back into CIA-A port A.
//!
//! The drive keeps the currently selected track as raw MFM in memory. The
//! head reads and writes individual bytes of that buffer; a track touched by
//! a write is decoded back into the disk image when the head leaves it.

pub mod mfm;

use format_adf::Adf;

/// CIA-B PRB control lines (all active low).
pub const PRB_STEP: u8 = 0x01;
pub const PRB_DIR: u8 = 0x02;
pub const PRB_SIDE: u8 = 0x04;
pub const PRB_SEL0: u8 = 0x08;
pub const PRB_MTR: u8 = 0x80;

/// Full head rotations before the motor reports ready.
const SPINUP_ROTATIONS: u32 = 1;

/// Head position: cylinder, side, and byte offset into the MFM track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Head {
    pub cylinder: u8,
    pub side: u8,
    pub offset: usize,
}

/// Drive status lines for CIA-A PRA (active low: bit clear = asserted).
#[derive(Debug, Clone, Copy)]
pub struct DriveStatus {
    /// PA2: /DSKCHANGE — a disk has been removed since the last step.
    pub disk_change: bool,
    /// PA3: /DSKPROT — the disk is write-protected.
    pub write_protect: bool,
    /// PA4: /DSKTRACK0 — the head sits at cylinder 0.
    pub track0: bool,
    /// PA5: /DSKRDY — the motor is at speed.
    pub ready: bool,
}

pub struct FloppyDrive {
    /// Drive number (0-3); selects the /SELx line this drive listens to.
    pub nr: u8,
    /// Words transferred per rasterline during DMA (1 = standard, up to 4).
    pub speed: u32,
    /// Turbo drives bypass slot timing and transfer whole blocks at once.
    turbo: bool,

    disk: Option<Adf>,
    track: Vec<u8>,
    track_dirty: bool,

    head: Head,
    motor: bool,
    spinup_rotations_left: u32,

    selected: bool,
    disk_changed: bool,
    write_protected: bool,
    prev_step: bool,
}

impl FloppyDrive {
    #[must_use]
    pub fn new(nr: u8) -> Self {
        Self {
            nr,
            speed: 1,
            turbo: false,
            disk: None,
            track: Vec::new(),
            track_dirty: false,
            head: Head::default(),
            motor: false,
            spinup_rotations_left: 0,
            selected: false,
            disk_changed: true, // no disk at power-on
            prev_step: true,    // active low: idle = high
            write_protected: false,
        }
    }

    pub fn reset(&mut self) {
        self.head = Head::default();
        self.motor = false;
        self.spinup_rotations_left = 0;
        self.selected = false;
        self.prev_step = true;
        self.load_track();
    }

    #[must_use]
    pub fn motor(&self) -> bool {
        self.motor
    }

    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    #[must_use]
    pub fn is_turbo(&self) -> bool {
        self.turbo
    }

    pub fn set_turbo(&mut self, turbo: bool) {
        self.turbo = turbo;
    }

    #[must_use]
    pub fn has_disk(&self) -> bool {
        self.disk.is_some()
    }

    #[must_use]
    pub fn head(&self) -> Head {
        self.head
    }

    pub fn set_write_protection(&mut self, value: bool) {
        self.write_protected = value;
    }

    pub fn insert_disk(&mut self, adf: Adf) {
        self.disk = Some(adf);
        self.disk_changed = false;
        self.load_track();
    }

    pub fn eject_disk(&mut self) -> Option<Adf> {
        self.flush_track();
        self.track.clear();
        self.disk_changed = true;
        self.disk.take()
    }

    /// Process a CIA-B PRB transition.
    ///
    /// The motor line is latched on the falling edge of this drive's select
    /// line; step pulses are falling edges of /STEP while selected.
    pub fn prb_did_change(&mut self, old: u8, new: u8) {
        let sel_mask = PRB_SEL0 << self.nr;
        let was_selected = old & sel_mask == 0;
        self.selected = new & sel_mask == 0;

        // Motor latch: the MTR value is sampled when the drive gets selected
        if self.selected && !was_selected {
            self.set_motor(new & PRB_MTR == 0);
        }

        if !self.selected {
            self.prev_step = new & PRB_STEP != 0;
            return;
        }

        let side = u8::from(new & PRB_SIDE == 0);
        if side != self.head.side {
            self.flush_track();
            self.head.side = side;
            self.load_track();
        }

        // Step on the falling edge of /STEP
        let step_high = new & PRB_STEP != 0;
        let step_edge = self.prev_step && !step_high;
        self.prev_step = step_high;
        if step_edge {
            self.step(new & PRB_DIR == 0);
        }
    }

    fn set_motor(&mut self, on: bool) {
        if on && !self.motor {
            self.spinup_rotations_left = SPINUP_ROTATIONS;
        }
        self.motor = on;
        if !on {
            self.spinup_rotations_left = 0;
        }
    }

    fn step(&mut self, inward: bool) {
        self.flush_track();
        if inward {
            if usize::from(self.head.cylinder) + 1 < format_adf::CYLINDERS {
                self.head.cylinder += 1;
            }
        } else if self.head.cylinder > 0 {
            self.head.cylinder -= 1;
        }
        // Any step pulse acknowledges a disk change when a disk is present
        if self.disk.is_some() {
            self.disk_changed = false;
        }
        self.load_track();
    }

    /// Current status lines for CIA-A PRA, active low.
    ///
    /// Returns all-ones when the drive is not selected (lines not driven).
    #[must_use]
    pub fn drive_status_flags(&self) -> u8 {
        if !self.selected {
            return 0xFF;
        }
        let mut flags = 0xFF;
        let status = self.status();
        if status.disk_change {
            flags &= !0x04;
        }
        if status.write_protect {
            flags &= !0x08;
        }
        if status.track0 {
            flags &= !0x10;
        }
        if status.ready {
            flags &= !0x20;
        }
        flags
    }

    #[must_use]
    pub fn status(&self) -> DriveStatus {
        DriveStatus {
            disk_change: self.disk_changed,
            write_protect: self.write_protected,
            track0: self.head.cylinder == 0,
            ready: self.motor && self.spinup_rotations_left == 0,
        }
    }

    /// Advance the head by one byte without transferring data.
    pub fn rotate(&mut self) {
        if self.track.is_empty() {
            return;
        }
        self.head.offset += 1;
        if self.head.offset >= self.track.len() {
            self.head.offset = 0;
            if self.spinup_rotations_left > 0 {
                self.spinup_rotations_left -= 1;
            }
        }
    }

    /// Read the byte under the head and advance.
    pub fn read_head(&mut self) -> u8 {
        let byte = self.track.get(self.head.offset).copied().unwrap_or(0);
        self.rotate();
        byte
    }

    pub fn read_head16(&mut self) -> u16 {
        let hi = self.read_head();
        let lo = self.read_head();
        (u16::from(hi) << 8) | u16::from(lo)
    }

    /// Write a byte under the head and advance.
    pub fn write_head(&mut self, value: u8) {
        if let Some(slot) = self.track.get_mut(self.head.offset) {
            *slot = value;
            self.track_dirty = true;
        }
        self.rotate();
    }

    pub fn write_head16(&mut self, value: u16) {
        self.write_head((value >> 8) as u8);
        self.write_head(value as u8);
    }

    /// Spin until the head sits just past the next sync mark.
    ///
    /// Gives up after one full rotation on a track without sync marks.
    pub fn find_sync_mark(&mut self) {
        let len = self.track.len();
        if len < 2 {
            return;
        }
        let sync = mfm::SYNC_WORD.to_be_bytes();
        for _ in 0..len {
            let a = self.track[self.head.offset];
            let b = self.track[(self.head.offset + 1) % len];
            if [a, b] == sync {
                self.rotate();
                self.rotate();
                return;
            }
            self.rotate();
        }
    }

    /// Load the MFM image of the track under the head.
    fn load_track(&mut self) {
        self.flush_track();
        self.track.clear();
        if let Some(disk) = &self.disk {
            let cyl = usize::from(self.head.cylinder);
            let side = usize::from(self.head.side);
            let track_nr = (cyl * 2 + side) as u8;
            let count = disk.sectors_per_track();
            self.track = mfm::encode_track(disk.track(cyl, side), track_nr, count);
        }
        if self.head.offset >= self.track.len() {
            self.head.offset = 0;
        }
    }

    /// Write a modified track buffer back into the disk image.
    fn flush_track(&mut self) {
        if !self.track_dirty {
            return;
        }
        self.track_dirty = false;
        if let Some(disk) = &mut self.disk {
            let count = disk.sectors_per_track();
            if let Some(sectors) = mfm::decode_track(&self.track, count) {
                let cyl = usize::from(self.head.cylinder);
                let side = usize::from(self.head.side);
                disk.track_mut(cyl, side).copy_from_slice(&sectors);
            }
            // An undecodable track stays in the buffer only; the image keeps
            // its previous contents.
        }
    }

    /// Take the disk image including any pending track write-back.
    pub fn export_disk(&mut self) -> Option<Adf> {
        self.flush_track();
        self.disk.clone()
    }

    /// Serialize the mechanism state and disk contents (big-endian fields).
    pub fn save_state(&mut self) -> Vec<u8> {
        self.flush_track();
        let mut out = Vec::new();
        out.push(self.nr);
        out.extend_from_slice(&self.speed.to_be_bytes());
        out.push(u8::from(self.turbo));
        out.push(self.head.cylinder);
        out.push(self.head.side);
        out.extend_from_slice(&(self.head.offset as u32).to_be_bytes());
        out.push(u8::from(self.motor));
        out.extend_from_slice(&self.spinup_rotations_left.to_be_bytes());
        out.push(u8::from(self.selected));
        out.push(u8::from(self.disk_changed));
        out.push(u8::from(self.write_protected));
        out.push(u8::from(self.prev_step));
        match &self.disk {
            Some(disk) => {
                out.push(1);
                out.extend_from_slice(&(disk.data().len() as u32).to_be_bytes());
                out.extend_from_slice(disk.data());
            }
            None => out.push(0),
        }
        out
    }

    /// Restore a state produced by [`save_state`](Self::save_state).
    pub fn restore_state(&mut self, data: &[u8]) -> Option<()> {
        let mut at = 0usize;
        let u8_at = |at: &mut usize| -> Option<u8> {
            let b = *data.get(*at)?;
            *at += 1;
            Some(b)
        };
        let u32_at = |at: &mut usize| -> Option<u32> {
            let b = data.get(*at..*at + 4)?;
            *at += 4;
            Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };

        self.nr = u8_at(&mut at)?;
        self.speed = u32_at(&mut at)?;
        self.turbo = u8_at(&mut at)? != 0;
        self.head.cylinder = u8_at(&mut at)?;
        self.head.side = u8_at(&mut at)?;
        let offset = u32_at(&mut at)? as usize;
        self.motor = u8_at(&mut at)? != 0;
        self.spinup_rotations_left = u32_at(&mut at)?;
        self.selected = u8_at(&mut at)? != 0;
        self.disk_changed = u8_at(&mut at)? != 0;
        self.write_protected = u8_at(&mut at)? != 0;
        self.prev_step = u8_at(&mut at)? != 0;

        self.track_dirty = false;
        if u8_at(&mut at)? != 0 {
            let len = u32_at(&mut at)? as usize;
            let bytes = data.get(at..at + len)?.to_vec();
            self.disk = Some(Adf::from_bytes(bytes).ok()?);
        } else {
            self.disk = None;
        }
        self.load_track();
        if offset < self.track.len() {
            self.head.offset = offset;
        }
        Some(())
    }
}
