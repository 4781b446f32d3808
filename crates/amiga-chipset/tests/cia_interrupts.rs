//! CIA timers and their interrupt wiring: PORTS/EXTER delivery, the
//! execute/wakeup event pair, and the frame-locked TOD counters.

use amiga_chipset::beam::{MASTER_PER_CIA, MASTER_PER_LINE};
use amiga_chipset::cia::CiaKind;
use amiga_chipset::paula::IrqSource;
use amiga_chipset::scheduler::{EventId, Slot};
use amiga_chipset::{Amiga, AmigaConfig, NEVER};

const REG_INTENA: u16 = 0x09A;

fn machine() -> Amiga {
    let mut amiga = Amiga::new(AmigaConfig::default()).expect("default config");
    // Master enable plus both CIA sources
    amiga.poke_custom16(
        REG_INTENA,
        0x8000 | 0x4000 | IrqSource::Ports.bit() | IrqSource::Exter.bit(),
    );
    amiga.execute_until(100);
    amiga
}

#[test]
fn idle_cias_sleep_with_a_parked_wakeup() {
    let mut amiga = machine();
    amiga.execute_until(10_000);

    for slot in [Slot::CiaA, Slot::CiaB] {
        let event = amiga.sched.slot(slot);
        assert_eq!(event.id, EventId::CiaWakeup, "{slot:?} should sleep");
        assert_eq!(event.trigger, NEVER);
    }
}

#[test]
fn timer_underflow_raises_ports_interrupt() {
    let mut amiga = machine();
    amiga.execute_until(10_000);

    // Timer A: 100 cycles, continuous, interrupt enabled
    amiga.poke_cia(CiaKind::A, 0x0D, 0x81);
    amiga.poke_cia(CiaKind::A, 0x04, 100);
    amiga.poke_cia(CiaKind::A, 0x05, 0);
    amiga.poke_cia(CiaKind::A, 0x0E, 0x01);

    let armed = amiga.sched.slot(Slot::CiaA);
    assert!(
        armed.trigger != NEVER,
        "a running timer keeps the chip scheduled"
    );

    // The underflow needs 101 timer ticks; give it a bit of slack for the
    // cycle boundary the chip resumes on.
    let low = amiga.sched.clock + 99 * MASTER_PER_CIA;
    let high = amiga.sched.clock + 103 * MASTER_PER_CIA;
    amiga.execute_until(low);
    assert_eq!(
        amiga.paula.intreq & IrqSource::Ports.bit(),
        0,
        "too early for the underflow"
    );
    amiga.execute_until(high);
    assert_ne!(amiga.paula.intreq & IrqSource::Ports.bit(), 0);
    assert_eq!(amiga.int_level(), 2);
}

#[test]
fn cia_b_interrupts_arrive_as_exter() {
    let mut amiga = machine();
    amiga.execute_until(10_000);

    amiga.poke_cia(CiaKind::B, 0x0D, 0x81);
    amiga.poke_cia(CiaKind::B, 0x04, 10);
    amiga.poke_cia(CiaKind::B, 0x05, 0);
    amiga.poke_cia(CiaKind::B, 0x0E, 0x01);

    amiga.execute_until(amiga.sched.clock + 20 * MASTER_PER_CIA);
    assert_ne!(amiga.paula.intreq & IrqSource::Exter.bit(), 0);
    assert_eq!(amiga.int_level(), 6, "EXTER is the highest level");
}

#[test]
fn sleeping_chip_keeps_correct_time_across_register_reads() {
    let mut amiga = machine();
    amiga.execute_until(10_000);

    amiga.poke_cia(CiaKind::A, 0x04, 0xFF);
    amiga.poke_cia(CiaKind::A, 0x05, 0x7F); // 0x7FFF cycles
    amiga.poke_cia(CiaKind::A, 0x0E, 0x01);
    let start = amiga.sched.clock;

    // Let a known amount of time pass while the chip sleeps, then read the
    // counter through the register interface
    amiga.execute_until(start + 1000 * MASTER_PER_CIA);
    let lo = amiga.peek_cia(CiaKind::A, 0x04);
    let hi = amiga.peek_cia(CiaKind::A, 0x05);
    let counter = (u16::from(hi) << 8) | u16::from(lo);

    let elapsed = 0x7FFF - counter;
    assert!(
        (998..=1002).contains(&elapsed),
        "counter should track wall time while sleeping, elapsed {elapsed}"
    );
}

#[test]
fn tod_counters_follow_the_raster() {
    let mut amiga = machine();
    let a_before = amiga.cia_a.tod_counter();
    let b_before = amiga.cia_b.tod_counter();

    // CIA-B TOD counts rasterlines
    amiga.execute_until(amiga.sched.clock + 10 * MASTER_PER_LINE);
    assert!(amiga.cia_b.tod_counter() >= b_before + 9);

    // CIA-A TOD counts frames
    for _ in 0..3 {
        amiga.run_frame();
    }
    assert_eq!(amiga.cia_a.tod_counter(), a_before + 3);
}

#[test]
fn tod_alarm_interrupts_through_ports() {
    let mut amiga = machine();
    // Alarm three frames ahead (write alarm with CRB bit 7 set)
    let target = (amiga.cia_a.tod_counter() + 3) & 0xFF_FFFF;
    amiga.poke_cia(CiaKind::A, 0x0D, 0x84); // enable alarm interrupt
    amiga.poke_cia(CiaKind::A, 0x0F, 0x80);
    amiga.poke_cia(CiaKind::A, 0x0A, (target >> 16) as u8);
    amiga.poke_cia(CiaKind::A, 0x09, (target >> 8) as u8);
    amiga.poke_cia(CiaKind::A, 0x08, target as u8);
    amiga.poke_cia(CiaKind::A, 0x0F, 0x00);

    for _ in 0..2 {
        amiga.run_frame();
    }
    assert_eq!(amiga.paula.intreq & IrqSource::Ports.bit(), 0);
    amiga.run_frame();
    amiga.run_frame();
    assert_ne!(amiga.paula.intreq & IrqSource::Ports.bit(), 0);
}
