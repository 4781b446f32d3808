//! Machine configuration.

use crate::error::Error;

/// Fastest supported drive gear (words per rasterline).
pub const MAX_DRIVE_SPEED: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveConfig {
    pub connected: bool,
    /// Words transferred per rasterline (1 = standard mechanism).
    pub speed: u32,
    /// Turbo drives transfer whole blocks outside slot timing.
    pub turbo: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            connected: false,
            speed: 1,
            turbo: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AmigaConfig {
    /// Chip RAM size in KB; must be a power of two between 256 and 2048.
    pub chip_ram_kb: u32,
    /// Slow RAM size in KB; 0 disables, otherwise a power of two up to 1024.
    pub slow_ram_kb: u32,
    /// Mirror Slow RAM into the Agnus DMA window at $80000.
    pub slow_ram_mirror: bool,
    /// Emulate the disk controller's byte FIFO (accurate mode). When off,
    /// the controller transfers whole words directly from the drive head.
    pub fifo_buffering: bool,
    pub drives: [DriveConfig; 4],
}

impl Default for AmigaConfig {
    fn default() -> Self {
        let mut drives = [DriveConfig::default(); 4];
        drives[0].connected = true; // df0 is built in
        Self {
            chip_ram_kb: 512,
            slow_ram_kb: 512,
            slow_ram_mirror: false,
            fifo_buffering: true,
            drives,
        }
    }
}

impl AmigaConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.chip_ram_kb.is_power_of_two() || !(256..=2048).contains(&self.chip_ram_kb) {
            return Err(Error::InvalidOption(format!(
                "chip RAM size {} KB (expected a power of two in 256..=2048)",
                self.chip_ram_kb
            )));
        }
        if self.slow_ram_kb != 0
            && (!self.slow_ram_kb.is_power_of_two() || self.slow_ram_kb > 1024)
        {
            return Err(Error::InvalidOption(format!(
                "slow RAM size {} KB (expected 0 or a power of two up to 1024)",
                self.slow_ram_kb
            )));
        }
        if self.slow_ram_mirror && self.slow_ram_kb == 0 {
            return Err(Error::InvalidOption(
                "slow RAM mirroring requires slow RAM".into(),
            ));
        }
        if !self.drives[0].connected {
            return Err(Error::InvalidOption("df0 cannot be disconnected".into()));
        }
        for (nr, drive) in self.drives.iter().enumerate() {
            if drive.speed == 0 || drive.speed > MAX_DRIVE_SPEED {
                return Err(Error::InvalidOption(format!(
                    "df{nr} speed {} (expected 1..={MAX_DRIVE_SPEED})",
                    drive.speed
                )));
            }
        }
        Ok(())
    }
}
