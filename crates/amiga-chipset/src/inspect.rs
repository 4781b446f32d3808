//! Host-facing state inspection.
//!
//! The hosting thread reads statistics and component state through a cached
//! snapshot guarded by a mutex — the single lock in the core. The core never
//! blocks on it during emulation; it refreshes the cache when asked.

use crate::agnus::bus::BusStats;
use crate::beam::{Beam, Cycle, Frame};
use crate::paula::disk::DriveDmaState;
use crate::scheduler::Event;
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerInfo {
    pub clock: Cycle,
    pub next_trigger: Cycle,
    pub next_sec_trigger: Cycle,
    pub primary: Vec<Event>,
    pub secondary: Vec<Event>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AgnusInfo {
    pub frame: Frame,
    pub pos: Beam,
    pub dmacon: u16,
    pub bplcon0: u16,
    pub ddfstrt: u16,
    pub ddfstop: u16,
    pub dskpt: u32,
    pub bplpt: [u32; 6],
    pub bus_stats: BusStats,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiskControllerInfo {
    pub state: DriveDmaState,
    pub fifo: [u8; 6],
    pub fifo_count: u8,
    pub dsklen: u16,
    pub dsksync: u16,
    pub prb: u8,
    pub selected: Option<u8>,
    pub sync_flag: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PaulaInfo {
    pub intreq: u16,
    pub intena: u16,
    pub adkcon: u16,
    pub int_level: u8,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CopperInfo {
    pub pc: u32,
    pub cop1lc: u32,
    pub cop2lc: u32,
    pub cdang: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineInfo {
    pub scheduler: SchedulerInfo,
    pub agnus: AgnusInfo,
    pub disk: DiskControllerInfo,
    pub paula: PaulaInfo,
    pub copper: CopperInfo,
}

/// The cache the hosting thread reads from.
pub struct Inspector {
    cache: Mutex<Option<MachineInfo>>,
}

impl Inspector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(None),
        }
    }

    pub fn record(&self, info: MachineInfo) {
        *self.cache.lock().unwrap() = Some(info);
    }

    /// The most recent snapshot, if any was recorded.
    #[must_use]
    pub fn read(&self) -> Option<MachineInfo> {
        self.cache.lock().unwrap().clone()
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}
