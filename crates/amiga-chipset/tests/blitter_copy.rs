//! Blitter transfers through the bus arbiter: plain copies, minterm
//! combination, descending mode, and the CPU precedence rule.

use amiga_chipset::paula::IrqSource;
use amiga_chipset::{Amiga, AmigaConfig};

const REG_BLTCON0: u16 = 0x040;
const REG_BLTCON1: u16 = 0x042;
const REG_BLTAFWM: u16 = 0x044;
const REG_BLTALWM: u16 = 0x046;
const REG_BLTCPTH: u16 = 0x048;
const REG_BLTCPTL: u16 = 0x04A;
const REG_BLTAPTH: u16 = 0x050;
const REG_BLTAPTL: u16 = 0x052;
const REG_BLTDPTH: u16 = 0x054;
const REG_BLTDPTL: u16 = 0x056;
const REG_BLTSIZE: u16 = 0x058;
const REG_BLTAMOD: u16 = 0x064;
const REG_BLTDMOD: u16 = 0x066;
const REG_DMACON: u16 = 0x096;

const DMACON_SET: u16 = 0x8000;
const DMACON_DMAEN: u16 = 0x0200;
const DMACON_BLTEN: u16 = 0x0040;
const DMACON_BLTPRI: u16 = 0x0400;

const USE_A: u16 = 0x0800;
const USE_C: u16 = 0x0200;
const USE_D: u16 = 0x0100;
const LF_A: u16 = 0x00F0;
const LF_A_OR_C: u16 = 0x00FA;

fn machine() -> Amiga {
    let mut amiga = Amiga::new(AmigaConfig::default()).expect("default config");
    amiga.poke_custom16(REG_DMACON, DMACON_SET | DMACON_DMAEN | DMACON_BLTEN);
    amiga.execute_until(100);
    amiga
}

fn write_ptr(amiga: &mut Amiga, hi_reg: u16, lo_reg: u16, addr: u32) {
    amiga.poke_custom16(hi_reg, (addr >> 16) as u16);
    amiga.poke_custom16(lo_reg, addr as u16);
}

fn run_blit(amiga: &mut Amiga) {
    let mut guard = 0;
    while amiga.blitter.running && guard < 100_000 {
        amiga.execute_until(amiga.sched.clock + 64);
        guard += 1;
    }
    assert!(!amiga.blitter.running, "blit never finished");
}

#[test]
fn copy_blit_moves_a_rectangle() {
    let mut amiga = machine();
    let src = 0x2000u32;
    let dst = 0x3000u32;

    for i in 0..16u32 {
        amiga.memory.poke16(src + i * 2, (0x1100 + i) as u16);
    }

    amiga.poke_custom16(REG_BLTCON0, USE_A | USE_D | LF_A);
    amiga.poke_custom16(REG_BLTCON1, 0);
    amiga.poke_custom16(REG_BLTAFWM, 0xFFFF);
    amiga.poke_custom16(REG_BLTALWM, 0xFFFF);
    write_ptr(&mut amiga, REG_BLTAPTH, REG_BLTAPTL, src);
    write_ptr(&mut amiga, REG_BLTDPTH, REG_BLTDPTL, dst);
    amiga.poke_custom16(REG_BLTAMOD, 0);
    amiga.poke_custom16(REG_BLTDMOD, 0);

    amiga.paula.intreq = 0;
    amiga.poke_custom16(REG_BLTSIZE, (4 << 6) | 4); // 4 rows of 4 words
    assert!(amiga.blitter.running);
    assert_ne!(amiga.peek_custom16(0x002) & 0x4000, 0, "DMACONR busy bit");

    run_blit(&mut amiga);

    for i in 0..16u32 {
        assert_eq!(
            amiga.memory.peek16(dst + i * 2),
            (0x1100 + i) as u16,
            "word {i}"
        );
    }
    assert_ne!(
        amiga.paula.intreq & IrqSource::Blit.bit(),
        0,
        "completion raises the blitter interrupt"
    );
    assert_eq!(amiga.peek_custom16(0x002) & 0x4000, 0, "busy bit clears");
    assert!(!amiga.blitter.zero, "nonzero data clears BZERO");
}

#[test]
fn minterm_combines_a_and_c_into_d() {
    let mut amiga = machine();
    let a = 0x2000u32;
    let c = 0x2800u32;
    let d = 0x3000u32;

    amiga.memory.poke16(a, 0xF000);
    amiga.memory.poke16(c, 0x000F);

    amiga.poke_custom16(REG_BLTCON0, USE_A | USE_C | USE_D | LF_A_OR_C);
    amiga.poke_custom16(REG_BLTAFWM, 0xFFFF);
    amiga.poke_custom16(REG_BLTALWM, 0xFFFF);
    write_ptr(&mut amiga, REG_BLTAPTH, REG_BLTAPTL, a);
    write_ptr(&mut amiga, REG_BLTCPTH, REG_BLTCPTL, c);
    write_ptr(&mut amiga, REG_BLTDPTH, REG_BLTDPTL, d);
    amiga.poke_custom16(REG_BLTSIZE, (1 << 6) | 1);

    run_blit(&mut amiga);
    assert_eq!(amiga.memory.peek16(d), 0xF00F);
}

#[test]
fn modulos_skip_bytes_between_rows() {
    let mut amiga = machine();
    let src = 0x2000u32;
    let dst = 0x3000u32;

    // Source rows are 3 words wide but we copy 2, skipping one per row
    for i in 0..6u32 {
        amiga.memory.poke16(src + i * 2, 0xA0 + i as u16);
    }

    amiga.poke_custom16(REG_BLTCON0, USE_A | USE_D | LF_A);
    amiga.poke_custom16(REG_BLTAFWM, 0xFFFF);
    amiga.poke_custom16(REG_BLTALWM, 0xFFFF);
    write_ptr(&mut amiga, REG_BLTAPTH, REG_BLTAPTL, src);
    write_ptr(&mut amiga, REG_BLTDPTH, REG_BLTDPTL, dst);
    amiga.poke_custom16(REG_BLTAMOD, 2);
    amiga.poke_custom16(REG_BLTDMOD, 0);
    amiga.poke_custom16(REG_BLTSIZE, (2 << 6) | 2);

    run_blit(&mut amiga);
    assert_eq!(amiga.memory.peek16(dst), 0xA0);
    assert_eq!(amiga.memory.peek16(dst + 2), 0xA1);
    assert_eq!(amiga.memory.peek16(dst + 4), 0xA3, "modulo skipped a word");
    assert_eq!(amiga.memory.peek16(dst + 6), 0xA4);
}

#[test]
fn blitter_defers_to_the_cpu_without_priority() {
    let mut amiga = machine();
    let src = 0x2000u32;
    let dst = 0x3000u32;
    amiga.memory.poke16(src, 0x5555);

    amiga.poke_custom16(REG_BLTCON0, USE_A | USE_D | LF_A);
    amiga.poke_custom16(REG_BLTAFWM, 0xFFFF);
    amiga.poke_custom16(REG_BLTALWM, 0xFFFF);
    write_ptr(&mut amiga, REG_BLTAPTH, REG_BLTAPTL, src);
    write_ptr(&mut amiga, REG_BLTDPTH, REG_BLTDPTL, dst);

    // The CPU holds the bus-stall line and BLTPRI is clear
    amiga.set_bls(true);
    amiga.poke_custom16(REG_BLTSIZE, (1 << 6) | 1);
    amiga.execute_until(amiga.sched.clock + 10_000);
    assert!(amiga.blitter.running, "no grants while the CPU has precedence");
    assert_eq!(amiga.memory.peek16(dst), 0);

    // Raising BLTPRI lets the blit through immediately
    amiga.poke_custom16(REG_DMACON, DMACON_SET | DMACON_BLTPRI);
    run_blit(&mut amiga);
    assert_eq!(amiga.memory.peek16(dst), 0x5555);

    // Releasing the stall line works as well
    amiga.poke_custom16(REG_DMACON, DMACON_BLTPRI); // clear again
    amiga.memory.poke16(src, 0xAAAA);
    write_ptr(&mut amiga, REG_BLTAPTH, REG_BLTAPTL, src);
    write_ptr(&mut amiga, REG_BLTDPTH, REG_BLTDPTL, dst);
    amiga.poke_custom16(REG_BLTSIZE, (1 << 6) | 1);
    amiga.execute_until(amiga.sched.clock + 10_000);
    assert!(amiga.blitter.running);

    amiga.set_bls(false);
    run_blit(&mut amiga);
    assert_eq!(amiga.memory.peek16(dst), 0xAAAA);
}

#[test]
fn descending_copy_walks_addresses_downward() {
    let mut amiga = machine();
    let src = 0x2000u32;
    let dst = 0x3000u32;
    amiga.memory.poke16(src, 0x0001);
    amiga.memory.poke16(src + 2, 0x0002);

    amiga.poke_custom16(REG_BLTCON0, USE_A | USE_D | LF_A);
    amiga.poke_custom16(REG_BLTCON1, 0x0002); // DESC
    amiga.poke_custom16(REG_BLTAFWM, 0xFFFF);
    amiga.poke_custom16(REG_BLTALWM, 0xFFFF);
    // Descending blits start at the highest word
    write_ptr(&mut amiga, REG_BLTAPTH, REG_BLTAPTL, src + 2);
    write_ptr(&mut amiga, REG_BLTDPTH, REG_BLTDPTL, dst + 2);
    amiga.poke_custom16(REG_BLTSIZE, (1 << 6) | 2);

    run_blit(&mut amiga);
    assert_eq!(amiga.memory.peek16(dst + 2), 0x0002);
    assert_eq!(amiga.memory.peek16(dst), 0x0001);
}
