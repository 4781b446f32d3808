//! Chip RAM and Slow RAM.
//!
//! Chip RAM is the one bus-contended resource in the machine; everything the
//! custom chips fetch comes through here. Slow RAM ("ranger" memory) is not
//! DMA-capable on a real machine, but some Agnus revisions mirror it into
//! the upper half of the 1 MB DMA window, which the disk and bitplane DMA
//! paths honor when the mirror is configured.

/// Width of the Agnus DMA address window (1 MB).
pub const PTR_MASK: u32 = 0x0F_FFFF;

/// Chip addresses at or above this boundary hit the Slow RAM mirror.
pub const SLOW_RAM_BASE: u32 = 0x8_0000;

pub struct Memory {
    chip: Vec<u8>,
    chip_mask: u32,
    slow: Vec<u8>,
    slow_mask: u32,
    /// Route DMA accesses >= `SLOW_RAM_BASE` into Slow RAM.
    pub slow_mirror: bool,
}

impl Memory {
    #[must_use]
    pub fn new(chip_ram_size: usize, slow_ram_size: usize, slow_mirror: bool) -> Self {
        assert!(chip_ram_size.is_power_of_two());
        assert!(slow_ram_size == 0 || slow_ram_size.is_power_of_two());
        Self {
            chip: vec![0; chip_ram_size],
            chip_mask: chip_ram_size as u32 - 1,
            slow: vec![0; slow_ram_size],
            slow_mask: (slow_ram_size as u32).wrapping_sub(1),
            slow_mirror,
        }
    }

    #[must_use]
    pub fn chip_ram_size(&self) -> usize {
        self.chip.len()
    }

    #[must_use]
    pub fn slow_ram_size(&self) -> usize {
        self.slow.len()
    }

    pub fn clear(&mut self) {
        self.chip.fill(0);
        self.slow.fill(0);
    }

    #[must_use]
    pub fn peek8(&self, addr: u32) -> u8 {
        self.chip[(addr & self.chip_mask) as usize]
    }

    #[must_use]
    pub fn peek16(&self, addr: u32) -> u16 {
        let at = (addr & self.chip_mask & !1) as usize;
        (u16::from(self.chip[at]) << 8) | u16::from(self.chip[at + 1])
    }

    pub fn poke8(&mut self, addr: u32, value: u8) {
        self.chip[(addr & self.chip_mask) as usize] = value;
    }

    pub fn poke16(&mut self, addr: u32, value: u16) {
        let at = (addr & self.chip_mask & !1) as usize;
        self.chip[at] = (value >> 8) as u8;
        self.chip[at + 1] = value as u8;
    }

    #[must_use]
    pub fn peek_slow16(&self, addr: u32) -> u16 {
        if self.slow.is_empty() {
            return 0xFFFF; // open bus
        }
        let at = (addr & self.slow_mask & !1) as usize;
        (u16::from(self.slow[at]) << 8) | u16::from(self.slow[at + 1])
    }

    pub fn poke_slow16(&mut self, addr: u32, value: u16) {
        if self.slow.is_empty() {
            return;
        }
        let at = (addr & self.slow_mask & !1) as usize;
        self.slow[at] = (value >> 8) as u8;
        self.slow[at + 1] = value as u8;
    }

    /// Side-effect-free read for inspectors and snapshots.
    #[must_use]
    pub fn spypeek16(&self, addr: u32) -> u16 {
        self.peek16(addr)
    }

    #[must_use]
    pub fn chip_data(&self) -> &[u8] {
        &self.chip
    }

    pub fn chip_data_mut(&mut self) -> &mut [u8] {
        &mut self.chip
    }

    #[must_use]
    pub fn slow_data(&self) -> &[u8] {
        &self.slow
    }

    pub fn slow_data_mut(&mut self) -> &mut [u8] {
        &mut self.slow
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.blob(&self.chip);
        w.blob(&self.slow);
        w.bool(self.slow_mirror);
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        let chip = r.blob()?;
        let slow = r.blob()?;
        if !chip.len().is_power_of_two() || (!slow.is_empty() && !slow.len().is_power_of_two()) {
            return Err(crate::error::Error::IncompatibleSnapshot(
                "bad RAM geometry".into(),
            ));
        }
        self.chip_mask = chip.len() as u32 - 1;
        self.slow_mask = (slow.len() as u32).wrapping_sub(1);
        self.chip = chip;
        self.slow = slow;
        self.slow_mirror = r.bool()?;
        Ok(())
    }
}
