//! Scheduler-level properties of the running machine: slot priorities,
//! trigger caches, and table consistency across arbitrary stopping points.

use amiga_chipset::beam::MASTER_PER_LINE;
use amiga_chipset::scheduler::{EventId, SecSlot, Slot};
use amiga_chipset::{Amiga, AmigaConfig, NEVER};

fn machine() -> Amiga {
    Amiga::new(AmigaConfig::default()).expect("default config")
}

#[test]
fn primary_slots_are_declared_in_priority_order() {
    assert_eq!(
        Slot::ALL,
        [
            Slot::CiaA,
            Slot::CiaB,
            Slot::Dma,
            Slot::Cop,
            Slot::Blt,
            Slot::Ras,
            Slot::Sec,
        ]
    );
}

#[test]
fn no_active_event_stays_due_after_execute_until() {
    let mut amiga = machine();
    for target in [1, 455, 10_000, 123_457, 313 * MASTER_PER_LINE + 17] {
        amiga.execute_until(target);
        amiga.sched.verify();
        for slot in Slot::ALL {
            let event = amiga.sched.slot(slot);
            if event.has_id() && event.trigger != NEVER {
                assert!(
                    event.trigger > target,
                    "{slot:?} still due at {target}: {event:?}"
                );
            }
        }
    }
}

#[test]
fn secondary_events_are_covered_by_the_sec_slot() {
    let mut amiga = machine();
    amiga.execute_until(1_000);

    amiga.sched.schedule_sec_abs(
        SecSlot::SoftIrq,
        5_000,
        EventId::IrqSet,
        i64::from(1u16 << 2),
    );
    let sec = amiga.sched.slot(Slot::Sec);
    assert!(sec.trigger <= 5_000, "Sec slot must be due no later");
    amiga.sched.verify();

    amiga.execute_until(5_000);
    assert_ne!(amiga.paula.intreq & (1 << 2), 0, "SOFT interrupt delivered");
    assert_eq!(amiga.sched.sec_slot(SecSlot::SoftIrq).trigger, NEVER);
}

#[test]
fn jump_tables_stay_consistent_across_register_writes() {
    let mut amiga = machine();
    amiga.execute_until(2_000);
    amiga.poke_custom16(0x096, 0x8000 | 0x0200 | 0x0100 | 0x0020 | 0x0010);
    amiga.poke_custom16(0x092, 0x0038); // DDFSTRT
    amiga.poke_custom16(0x094, 0x00D0); // DDFSTOP
    amiga.poke_custom16(0x100, 0x4000); // BPLCON0: 4 bitplanes
    amiga.execute_until(3 * MASTER_PER_LINE);
    amiga.agnus.verify_jump_tables();

    amiga.poke_custom16(0x096, 0x0100); // BPLEN off
    amiga.execute_until(5 * MASTER_PER_LINE);
    amiga.agnus.verify_jump_tables();
}

#[test]
fn dispatched_slots_are_serviced_and_rearmed_or_parked() {
    let mut amiga = machine();
    amiga.execute_until(1_000);

    // A blitter event with blitter DMA disabled parks the slot, id intact
    amiga
        .sched
        .schedule_abs(Slot::Blt, 1_100, EventId::BltExecute);
    amiga.execute_until(1_200);
    let blt = amiga.sched.slot(Slot::Blt);
    assert_eq!(blt.id, EventId::BltExecute);
    assert_eq!(blt.trigger, NEVER);

    // The raster slot rearms itself once per line, forever
    let ras = amiga.sched.slot(Slot::Ras);
    assert_eq!(ras.id, EventId::RasHsync);
    assert!(ras.trigger > 1_200);
    assert!(ras.trigger <= 1_200 + MASTER_PER_LINE);
}

#[test]
fn beam_position_and_clock_stay_in_lockstep() {
    let mut amiga = machine();
    for line in 0..320i64 {
        let target = line * MASTER_PER_LINE + 100;
        amiga.execute_until(target);
        let beam = amiga.agnus.frame.beam_at(target);
        assert_eq!(amiga.agnus.pos, beam, "at cycle {target}");
    }
}
