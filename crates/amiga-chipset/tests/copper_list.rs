//! Copper program execution against the beam: WAIT/MOVE lists, SKIP, the
//! COPJMP strobes, and the register write protection.

use amiga_chipset::beam::MASTER_PER_LINE;
use amiga_chipset::{Amiga, AmigaConfig};

const REG_COP1LCH: u16 = 0x080;
const REG_COP1LCL: u16 = 0x082;
const REG_COP2LCH: u16 = 0x084;
const REG_COP2LCL: u16 = 0x086;
const REG_COPJMP2: u16 = 0x08A;
const REG_COPCON: u16 = 0x02E;
const REG_DMACON: u16 = 0x096;

const DMACON_SET: u16 = 0x8000;
const DMACON_DMAEN: u16 = 0x0200;
const DMACON_COPEN: u16 = 0x0080;

fn machine() -> Amiga {
    Amiga::new(AmigaConfig::default()).expect("default config")
}

fn write_list(amiga: &mut Amiga, base: u32, words: &[u16]) {
    for (i, &word) in words.iter().enumerate() {
        amiga.memory.poke16(base + i as u32 * 2, word);
    }
}

fn start_copper(amiga: &mut Amiga, list: u32) {
    amiga.poke_custom16(REG_COP1LCH, (list >> 16) as u16);
    amiga.poke_custom16(REG_COP1LCL, list as u16);
    amiga.poke_custom16(REG_DMACON, DMACON_SET | DMACON_DMAEN | DMACON_COPEN);
}

/// MOVE <value> into <reg>.
fn mov(reg: u16, value: u16) -> [u16; 2] {
    [reg & 0x1FE, value]
}

/// WAIT for (vp, hp), all bits compared, blitter ignored.
fn wait(vp: u8, hp: u8) -> [u16; 2] {
    [(u16::from(vp) << 8) | u16::from(hp & 0xFE) | 1, 0xFFFE]
}

const END: [u16; 2] = [0xFFFF, 0xFFFE];

#[test]
fn wait_then_move_lands_after_the_beam_position() {
    let mut amiga = machine();
    let list = 0x1000;
    let mut program = Vec::new();
    program.extend(wait(2, 0x30));
    program.extend(mov(0x0E0, 0x0005)); // BPL1PTH
    program.extend(END);
    write_list(&mut amiga, list, &program);
    start_copper(&mut amiga, list);

    // The list is picked up at the next vertical blank
    amiga.run_frame();
    assert_eq!(amiga.agnus.bplpt[0], 0, "nothing before the frame starts");

    // Up to line 2 the copper is parked in WAIT
    amiga.execute_until(amiga.agnus.frame.start + 2 * MASTER_PER_LINE);
    assert_eq!(amiga.agnus.bplpt[0], 0, "WAIT must hold the MOVE back");

    amiga.execute_until(amiga.agnus.frame.start + 4 * MASTER_PER_LINE);
    assert_eq!(amiga.agnus.bplpt[0] >> 16, 0x0005, "MOVE after the WAIT");
}

#[test]
fn copper_does_not_run_without_dma_enable() {
    let mut amiga = machine();
    let list = 0x1200;
    let mut program = Vec::new();
    program.extend(mov(0x0E0, 0x0007));
    program.extend(END);
    write_list(&mut amiga, list, &program);
    amiga.poke_custom16(REG_COP1LCH, 0);
    amiga.poke_custom16(REG_COP1LCL, list as u16);
    // COPEN stays off
    amiga.poke_custom16(REG_DMACON, DMACON_SET | DMACON_DMAEN);

    amiga.run_frame();
    amiga.run_frame();
    assert_eq!(amiga.agnus.bplpt[0], 0);
}

#[test]
fn skip_steps_over_exactly_one_instruction() {
    let mut amiga = machine();
    let list = 0x1400;
    let mut program = Vec::new();
    // SKIP with an always-true comparison
    program.extend([0x0001, 0xFFFF]);
    program.extend(mov(0x0E0, 0x0BAD)); // skipped
    program.extend(mov(0x0E8, 0x0022)); // BPL3PTH, executed
    program.extend(END);
    write_list(&mut amiga, list, &program);
    start_copper(&mut amiga, list);

    amiga.run_frame();
    amiga.execute_until(amiga.agnus.frame.start + 2 * MASTER_PER_LINE);

    assert_eq!(amiga.agnus.bplpt[0], 0, "the first MOVE is skipped");
    assert_eq!(amiga.agnus.bplpt[1], 0, "plane 2 untouched");
    assert_eq!(amiga.agnus.bplpt[2] >> 16, 0x0022);
}

#[test]
fn illegal_move_halts_the_copper_until_vblank() {
    let mut amiga = machine();
    let list = 0x1600;
    let mut program = Vec::new();
    program.extend(mov(0x02E, 0x0002)); // COPCON: below $40, never legal
    program.extend(mov(0x0E0, 0x0009)); // must not execute
    program.extend(END);
    write_list(&mut amiga, list, &program);
    start_copper(&mut amiga, list);

    amiga.run_frame();
    amiga.run_frame();
    assert_eq!(amiga.agnus.bplpt[0], 0, "the copper halted on the bad MOVE");
}

#[test]
fn cdang_unlocks_the_lower_register_range() {
    let mut amiga = machine();
    let list = 0x1800;
    let mut program = Vec::new();
    program.extend(mov(0x048, 0x0003)); // BLTCPTH: needs CDANG
    program.extend(END);
    write_list(&mut amiga, list, &program);
    amiga.poke_custom16(REG_COPCON, 0x0002);
    start_copper(&mut amiga, list);

    amiga.run_frame();
    amiga.execute_until(amiga.agnus.frame.start + MASTER_PER_LINE);
    assert_eq!(amiga.blitter.cpt >> 16, 0x0003);
}

#[test]
fn copjmp2_strobe_reloads_the_program_counter() {
    let mut amiga = machine();
    let list1 = 0x2000;
    let list2 = 0x2100;

    let mut program1 = Vec::new();
    program1.extend(END); // park immediately
    write_list(&mut amiga, list1, &program1);

    let mut program2 = Vec::new();
    program2.extend(mov(0x0F0, 0x0033)); // BPL5PTH
    program2.extend(END);
    write_list(&mut amiga, list2, &program2);

    amiga.poke_custom16(REG_COP2LCH, 0);
    amiga.poke_custom16(REG_COP2LCL, list2 as u16);
    start_copper(&mut amiga, list1);

    amiga.run_frame();
    amiga.execute_until(amiga.agnus.frame.start + 2 * MASTER_PER_LINE);
    assert_eq!(amiga.agnus.bplpt[4], 0, "list 1 parks without writing");

    amiga.poke_custom16(REG_COPJMP2, 0);
    amiga.execute_until(amiga.sched.clock + MASTER_PER_LINE);
    assert_eq!(amiga.agnus.bplpt[4] >> 16, 0x0033, "list 2 runs after the jump");
}
