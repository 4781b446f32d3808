//! Paula: interrupt controller, audio DMA state machines, disk controller.
//!
//! Audio mixing and host output are not part of the core; the audio
//! machinery here is the DMA side only — pointer/length bookkeeping, the
//! per-channel data latch, and block interrupts. The disk controller lives
//! in [`disk`].

pub mod disk;

use crate::amiga::Amiga;
use crate::beam::Cycle;
use crate::scheduler::{EventId, SecSlot};
use disk::DiskController;
use serde::Serialize;

/// The 14 interrupt sources, ordered by their INTREQ bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IrqSource {
    Tbe = 0,
    Dskblk,
    Soft,
    Ports,
    Coper,
    Vertb,
    Blit,
    Aud0,
    Aud1,
    Aud2,
    Aud3,
    Rbf,
    Dsksyn,
    Exter,
}

impl IrqSource {
    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// The secondary event slot dedicated to this source.
    #[must_use]
    pub fn sec_slot(self) -> SecSlot {
        match self {
            IrqSource::Tbe => SecSlot::TbeIrq,
            IrqSource::Dskblk => SecSlot::DskblkIrq,
            IrqSource::Soft => SecSlot::SoftIrq,
            IrqSource::Ports => SecSlot::PortsIrq,
            IrqSource::Coper => SecSlot::CoprIrq,
            IrqSource::Vertb => SecSlot::VertbIrq,
            IrqSource::Blit => SecSlot::BlitIrq,
            IrqSource::Aud0 => SecSlot::Aud0Irq,
            IrqSource::Aud1 => SecSlot::Aud1Irq,
            IrqSource::Aud2 => SecSlot::Aud2Irq,
            IrqSource::Aud3 => SecSlot::Aud3Irq,
            IrqSource::Rbf => SecSlot::RbfIrq,
            IrqSource::Dsksyn => SecSlot::DsksynIrq,
            IrqSource::Exter => SecSlot::ExterIrq,
        }
    }

    pub const AUDIO: [IrqSource; 4] = [
        IrqSource::Aud0,
        IrqSource::Aud1,
        IrqSource::Aud2,
        IrqSource::Aud3,
    ];
}

/// One audio channel's DMA bookkeeping. The location and fetch pointers are
/// Agnus registers; Paula owns length, period, volume, and the data latch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioChannel {
    pub len: u16,
    pub per: u16,
    pub vol: u16,
    pub dat: u16,
    /// Words left in the current block.
    pub len_counter: u32,
    pub dma_on: bool,
}

impl AudioChannel {
    /// AUDxLEN = 0 plays the maximum block length.
    #[must_use]
    pub fn programmed_length(&self) -> u32 {
        if self.len == 0 { 0x1_0000 } else { u32::from(self.len) }
    }
}

pub struct Paula {
    pub intreq: u16,
    pub intena: u16,
    pub adkcon: u16,
    pub audio: [AudioChannel; 4],
    pub disk: DiskController,
}

// ADKCON bit 10: start disk reads only after a sync match.
pub const ADK_WORDSYNC: u16 = 0x0400;

impl Paula {
    #[must_use]
    pub fn new() -> Self {
        Self {
            intreq: 0,
            intena: 0,
            adkcon: 0,
            audio: [AudioChannel::default(); 4],
            disk: DiskController::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
        self.disk.reset();
    }

    pub fn write_intena(&mut self, value: u16) {
        if value & 0x8000 != 0 {
            self.intena |= value & 0x7FFF;
        } else {
            self.intena &= !(value & 0x7FFF);
        }
    }

    pub fn write_intreq(&mut self, value: u16) {
        if value & 0x8000 != 0 {
            self.intreq |= value & 0x7FFF;
        } else {
            self.intreq &= !(value & 0x7FFF);
        }
    }

    pub fn write_adkcon(&mut self, value: u16) {
        if value & 0x8000 != 0 {
            self.adkcon |= value & 0x7FFF;
        } else {
            self.adkcon &= !(value & 0x7FFF);
        }
    }

    #[must_use]
    pub fn wordsync(&self) -> bool {
        self.adkcon & ADK_WORDSYNC != 0
    }

    pub fn serialize(&self, w: &mut crate::snapshot::SnapshotWriter) {
        w.u16(self.intreq);
        w.u16(self.intena);
        w.u16(self.adkcon);
        for ch in &self.audio {
            w.u16(ch.len);
            w.u16(ch.per);
            w.u16(ch.vol);
            w.u16(ch.dat);
            w.u32(ch.len_counter);
            w.bool(ch.dma_on);
        }
        self.disk.serialize(w);
    }

    pub fn deserialize(
        &mut self,
        r: &mut crate::snapshot::SnapshotReader<'_>,
    ) -> Result<(), crate::error::Error> {
        self.intreq = r.u16()?;
        self.intena = r.u16()?;
        self.adkcon = r.u16()?;
        for ch in &mut self.audio {
            ch.len = r.u16()?;
            ch.per = r.u16()?;
            ch.vol = r.u16()?;
            ch.dat = r.u16()?;
            ch.len_counter = r.u32()?;
            ch.dma_on = r.bool()?;
        }
        self.disk.deserialize(r)
    }

    /// The 68k interrupt priority level encoded by INTREQ and INTENA.
    #[must_use]
    pub fn int_level(&self) -> u8 {
        if self.intena & 0x4000 == 0 {
            return 0;
        }
        let pending = self.intreq & self.intena & 0x3FFF;
        if pending == 0 {
            return 0;
        }
        if pending & IrqSource::Exter.bit() != 0 {
            6
        } else if pending & (IrqSource::Rbf.bit() | IrqSource::Dsksyn.bit()) != 0 {
            5
        } else if pending & 0x0780 != 0 {
            4 // one of the audio channels
        } else if pending
            & (IrqSource::Coper.bit() | IrqSource::Vertb.bit() | IrqSource::Blit.bit())
            != 0
        {
            3
        } else if pending & IrqSource::Ports.bit() != 0 {
            2
        } else {
            1
        }
    }
}

impl Default for Paula {
    fn default() -> Self {
        Self::new()
    }
}

impl Amiga {
    /// Request an interrupt: schedule `IrqSet` on the source's slot. The
    /// event fires within the current cycle's dispatch sweep.
    pub fn raise_irq(&mut self, source: IrqSource) {
        self.schedule_irq_rel(source, 0);
    }

    /// Request an interrupt after a delay, modeling the latency between a
    /// device finishing and the line asserting.
    pub fn schedule_irq_rel(&mut self, source: IrqSource, delay: Cycle) {
        self.sched.schedule_sec_rel(
            source.sec_slot(),
            delay,
            EventId::IrqSet,
            i64::from(source.bit()),
        );
    }

    /// Retract a pending source after a delay.
    pub fn schedule_irq_clear_rel(&mut self, source: IrqSource, delay: Cycle) {
        self.sched.schedule_sec_rel(
            source.sec_slot(),
            delay,
            EventId::IrqClear,
            i64::from(source.bit()),
        );
    }

    pub(crate) fn service_irq_event(&mut self, slot: SecSlot, id: EventId, data: i64) {
        let bit = data as u16;
        match id {
            EventId::IrqSet => self.paula.intreq |= bit,
            EventId::IrqClear => self.paula.intreq &= !bit,
            _ => unreachable!("not an interrupt event: {id:?}"),
        }
        self.sched.cancel_sec(slot);
    }

    /// An audio slot came up in the DAS table. The slot is always allocated;
    /// the channel decides here whether it actually fetches.
    pub(crate) fn service_das_audio(&mut self, channel: usize) {
        if !self.paula.audio[channel].dma_on {
            return;
        }
        let word = self.agnus.do_audio_dma(&self.memory, channel);
        let ch = &mut self.paula.audio[channel];
        ch.dat = word;

        ch.len_counter = ch.len_counter.saturating_sub(1);
        if ch.len_counter == 0 {
            // Block done: rewind to the location register and interrupt
            ch.len_counter = ch.programmed_length();
            self.agnus.audpt[channel] = self.agnus.audlc[channel];
            self.raise_irq(IrqSource::AUDIO[channel]);
        }
    }

    /// Track DMACON audio-enable edges: a rising edge restarts the block.
    pub(crate) fn sync_audio_dma_enables(&mut self) {
        for channel in 0..4 {
            let enabled = self.agnus.auddma(channel);
            let ch = &mut self.paula.audio[channel];
            if enabled && !ch.dma_on {
                ch.len_counter = ch.programmed_length();
                self.agnus.audpt[channel] = self.agnus.audlc[channel];
            }
            self.paula.audio[channel].dma_on = enabled;
        }
    }

    pub(crate) fn poke_audio_reg(&mut self, offset: u16, value: u16) {
        let channel = usize::from((offset - 0x0A0) / 0x10);
        match offset & 0x0F {
            0x00 => {
                self.agnus.audlc[channel] =
                    (self.agnus.audlc[channel] & 0xFFFF) | (u32::from(value) << 16);
            }
            0x02 => {
                self.agnus.audlc[channel] =
                    (self.agnus.audlc[channel] & 0xFFFF_0000) | u32::from(value & 0xFFFE);
            }
            0x04 => self.paula.audio[channel].len = value,
            0x06 => self.paula.audio[channel].per = value,
            0x08 => self.paula.audio[channel].vol = value & 0x7F,
            0x0A => self.paula.audio[channel].dat = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intena_intreq_set_clear_semantics() {
        let mut paula = Paula::new();
        paula.write_intena(0x8000 | 0x4000 | IrqSource::Vertb.bit());
        assert_eq!(paula.intena, 0x4000 | IrqSource::Vertb.bit());

        paula.write_intreq(0x8000 | IrqSource::Vertb.bit());
        assert_eq!(paula.intreq, IrqSource::Vertb.bit());

        paula.write_intreq(IrqSource::Vertb.bit());
        assert_eq!(paula.intreq, 0);
    }

    #[test]
    fn int_level_requires_the_master_enable() {
        let mut paula = Paula::new();
        paula.intreq = IrqSource::Vertb.bit();
        paula.intena = IrqSource::Vertb.bit();
        assert_eq!(paula.int_level(), 0);

        paula.intena |= 0x4000;
        assert_eq!(paula.int_level(), 3);
    }

    #[test]
    fn int_level_priorities() {
        let mut paula = Paula::new();
        paula.intena = 0x4000 | 0x3FFF;

        paula.intreq = IrqSource::Tbe.bit();
        assert_eq!(paula.int_level(), 1);
        paula.intreq |= IrqSource::Ports.bit();
        assert_eq!(paula.int_level(), 2);
        paula.intreq |= IrqSource::Blit.bit();
        assert_eq!(paula.int_level(), 3);
        paula.intreq |= IrqSource::Aud2.bit();
        assert_eq!(paula.int_level(), 4);
        paula.intreq |= IrqSource::Dsksyn.bit();
        assert_eq!(paula.int_level(), 5);
        paula.intreq |= IrqSource::Exter.bit();
        assert_eq!(paula.int_level(), 6);
    }

    #[test]
    fn audio_length_zero_plays_the_maximum_block() {
        let mut ch = AudioChannel::default();
        assert_eq!(ch.programmed_length(), 0x1_0000);
        ch.len = 3;
        assert_eq!(ch.programmed_length(), 3);
    }
}
