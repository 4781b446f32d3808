//! Bitplane DMA over full display lines: fetch counts, modulos at the end
//! of line, and the vertical display window gate.

use amiga_chipset::beam::MASTER_PER_LINE;
use amiga_chipset::{Amiga, AmigaConfig};

const REG_DIWSTRT: u16 = 0x08E;
const REG_DIWSTOP: u16 = 0x090;
const REG_DDFSTRT: u16 = 0x092;
const REG_DDFSTOP: u16 = 0x094;
const REG_DMACON: u16 = 0x096;
const REG_BPLCON0: u16 = 0x100;
const REG_BPL1MOD: u16 = 0x108;
const REG_BPL2MOD: u16 = 0x10A;

const DMACON_SET: u16 = 0x8000;
const DMACON_DMAEN: u16 = 0x0200;
const DMACON_BPLEN: u16 = 0x0100;

const DISPLAY_FIRST_LINE: i64 = 0x2C;

/// Standard 320-pixel display: DDF $38-$D0 is 20 lores fetch units.
const FETCH_UNITS: u32 = 20;

fn display_machine(bpu: u16) -> Amiga {
    let mut amiga = Amiga::new(AmigaConfig::default()).expect("default config");
    amiga.poke_custom16(REG_DIWSTRT, 0x2C81);
    amiga.poke_custom16(REG_DIWSTOP, 0x2CC1);
    amiga.poke_custom16(REG_DDFSTRT, 0x0038);
    amiga.poke_custom16(REG_DDFSTOP, 0x00D0);
    amiga.poke_custom16(REG_BPLCON0, bpu << 12);
    amiga.poke_custom16(REG_DMACON, DMACON_SET | DMACON_DMAEN | DMACON_BPLEN);
    amiga.execute_until(100);
    amiga
}

fn run_display_line(amiga: &mut Amiga, line: i64) -> [u32; 6] {
    let start = amiga.agnus.frame.start + line * MASTER_PER_LINE;
    amiga.execute_until(start);
    let before = amiga.agnus.bplpt;
    amiga.execute_until(start + MASTER_PER_LINE);
    let after = amiga.agnus.bplpt;
    let mut delta = [0u32; 6];
    for plane in 0..6 {
        delta[plane] = after[plane].wrapping_sub(before[plane]);
    }
    delta
}

#[test]
fn display_line_fetches_one_word_per_unit_and_plane() {
    let mut amiga = display_machine(2);
    let delta = run_display_line(&mut amiga, DISPLAY_FIRST_LINE);
    assert_eq!(delta[0], FETCH_UNITS * 2, "plane 1 bytes per line");
    assert_eq!(delta[1], FETCH_UNITS * 2, "plane 2 bytes per line");
    assert_eq!(delta[2], 0, "plane 3 disabled at BPU=2");
}

#[test]
fn no_fetches_outside_the_vertical_window() {
    let mut amiga = display_machine(2);
    let delta = run_display_line(&mut amiga, DISPLAY_FIRST_LINE - 4);
    assert_eq!(delta[0], 0);
    assert_eq!(delta[1], 0);
}

#[test]
fn modulos_are_added_at_the_end_of_line() {
    let mut amiga = display_machine(2);
    amiga.poke_custom16(REG_BPL1MOD, 4);
    amiga.poke_custom16(REG_BPL2MOD, 8);
    amiga.execute_until(200);

    let delta = run_display_line(&mut amiga, DISPLAY_FIRST_LINE + 1);
    assert_eq!(delta[0], FETCH_UNITS * 2 + 4, "odd planes use BPL1MOD");
    assert_eq!(delta[1], FETCH_UNITS * 2 + 8, "even planes use BPL2MOD");
}

#[test]
fn hires_fetches_twice_per_unit() {
    let mut amiga = display_machine(2);
    amiga.poke_custom16(REG_BPLCON0, 0x8000 | (2 << 12));
    amiga.execute_until(200);

    let delta = run_display_line(&mut amiga, DISPLAY_FIRST_LINE);
    assert_eq!(delta[0], FETCH_UNITS * 4, "hires doubles the fetch rate");
}

#[test]
fn disabling_bitplane_dma_stops_the_fetches() {
    let mut amiga = display_machine(2);
    run_display_line(&mut amiga, DISPLAY_FIRST_LINE);

    amiga.poke_custom16(REG_DMACON, DMACON_BPLEN); // clear
    amiga.execute_until(amiga.sched.clock + MASTER_PER_LINE);
    let delta = run_display_line(&mut amiga, DISPLAY_FIRST_LINE + 4);
    assert_eq!(delta[0], 0);
    assert_eq!(delta[1], 0);
}
