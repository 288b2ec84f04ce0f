//! Page translation.
//!
//! All 1024 slots of a guest page are translated in order, each starting at its own label.
//! Pass one emits code and records every jump as a fixup against a slot, the exit stub or a
//! guest address outside the page. Pass two emits the exit stub plus one jump wrapper per
//! outside address, then patches every displacement.
//!
//! Register use inside a block: RBX holds the `Core`, R12 the cycle count. R12 is written
//! back before every helper call and on exit.

use std::collections::BTreeMap;
use std::mem::offset_of;

use common::util::sign_extend32;

use super::emitter::{Alu, Cond, Shift, X64Emitter, R12, RAX, RBX, RCX, RDI, RDX, RSI};
use super::helpers;
use crate::instructions::{decode, Instruction, Opcode};
use crate::regfile::RegFile;
use crate::Core;

pub const PAGE_SLOTS: usize = 1024;

const fn field(offset: usize) -> i32 {
    (offset_of!(Core, regs) + offset) as i32
}

const GPR: i32 = field(offset_of!(RegFile, gpr));
const HI: i32 = field(offset_of!(RegFile, hi));
const LO: i32 = field(offset_of!(RegFile, lo));
const PC: i32 = field(offset_of!(RegFile, pc));
const COUNT: i32 = field(offset_of!(RegFile, count));
const SLICE_END: i32 = field(offset_of!(RegFile, slice_end));
const JUMP_TARGET: i32 = field(offset_of!(RegFile, jump_target));
const BRANCH_TAKEN: i32 = field(offset_of!(RegFile, branch_taken));
const EXIT_REQUEST: i32 = field(offset_of!(RegFile, exit_request));
const INTERP_REQUEST: i32 = field(offset_of!(RegFile, interp_request));

fn gpr(reg: usize) -> i32 {
    GPR + 8 * reg as i32
}

/// Where an emitted jump goes, resolved in pass two
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Slot(usize),
    /// Leave with the PC already set
    Exit,
    /// Set the PC and leave
    Leave(u32),
    /// Set the PC and leave, asking the dispatcher to interpret one unit
    Interpret(u32),
}

struct Fixup {
    at: usize,
    target: Target,
}

/// How a translated branch picks its destination
enum Resolution {
    Always(u32),
    Conditional(u32),
    /// JR/JALR, target stored in `jump_target`
    Register,
}

pub struct Compiled {
    pub code: Vec<u8>,
    /// Native offset of each slot
    pub entries: Vec<u32>,
}

struct Compiler<'a> {
    em: X64Emitter,
    words: &'a [Option<u32>],
    vbase: u32,
    per_op: i32,
    fixups: Vec<Fixup>,
}

/// Translate one page. `words[i]` is the instruction at `vbase + 4 * i`, `None` where the
/// page isn't backed by memory.
pub fn compile_page(words: &[Option<u32>], vbase: u32, per_op: i32) -> Compiled {
    debug_assert_eq!(words.len(), PAGE_SLOTS);
    let mut c = Compiler {
        em: X64Emitter::new(),
        words,
        vbase,
        per_op,
        fixups: Vec::new(),
    };
    c.prologue();

    let mut entries = Vec::with_capacity(PAGE_SLOTS);
    for (i, word) in words.iter().enumerate() {
        entries.push(c.em.pos() as u32);
        let pc = vbase.wrapping_add(4 * i as u32);
        let Some(word) = *word else {
            c.jump(Target::Interpret(pc));
            continue;
        };
        let inst = decode(word);
        if inst.is_branch() {
            c.branch(i, inst, pc);
        } else {
            c.body(inst, pc, false);
            c.retire(1, pc.wrapping_add(4));
            if i == PAGE_SLOTS - 1 {
                c.jump(Target::Leave(pc.wrapping_add(4)));
            }
        }
    }

    let code = c.link(&entries);
    Compiled { code, entries }
}

impl<'a> Compiler<'a> {
    /// `extern "C" fn(core: *mut Core, entry: *const u8)`: jumps to the slot at `entry`
    fn prologue(&mut self) {
        let em = &mut self.em;
        em.push_r64(RBX);
        em.push_r64(R12);
        // keep the stack 16 byte aligned at helper calls
        em.sub_rsp_imm8(8);
        em.mov_r64_r64(RBX, RDI);
        em.mov_r64_m64(R12, RBX, COUNT);
        em.jmp_r64(RSI);
    }

    fn epilogue(&mut self) {
        let em = &mut self.em;
        em.mov_m64_r64(RBX, COUNT, R12);
        em.add_rsp_imm8(8);
        em.pop_r64(R12);
        em.pop_r64(RBX);
        em.ret();
    }

    fn jump(&mut self, target: Target) {
        let at = self.em.jmp_rel32();
        self.fixups.push(Fixup { at, target });
    }

    fn jump_if(&mut self, cc: Cond, target: Target) {
        let at = self.em.jcc_rel32(cc);
        self.fixups.push(Fixup { at, target });
    }

    /// Continue at `vaddr`, inside the block when it's on this page
    fn goto(&mut self, vaddr: u32) {
        let offset = vaddr.wrapping_sub(self.vbase);
        if offset < 0x1000 && vaddr & 3 == 0 {
            self.jump(Target::Slot((offset >> 2) as usize));
        } else {
            self.jump(Target::Leave(vaddr));
        }
    }

    /// Count `slots` retired instructions, then leave for the dispatcher if code was
    /// overwritten or the slice is used up.
    fn retire(&mut self, slots: i32, next: u32) {
        self.em.alu_r_imm32(Alu::Add, true, R12, slots * self.per_op);
        self.em.cmp_m8_imm8(RBX, EXIT_REQUEST, 0);
        self.jump_if(Cond::NE, Target::Leave(next));
        self.em.cmp_r64_m64(R12, RBX, SLICE_END);
        self.jump_if(Cond::AE, Target::Leave(next));
    }

    fn load64(&mut self, host: u8, reg: usize) {
        self.em.mov_r64_m64(host, RBX, gpr(reg));
    }

    fn load32(&mut self, host: u8, reg: usize) {
        self.em.mov_r32_m32(host, RBX, gpr(reg));
    }

    /// Write RAX to `reg`, discarded for r0
    fn store64(&mut self, reg: usize) {
        if reg != 0 {
            self.em.mov_m64_r64(RBX, gpr(reg), RAX);
        }
    }

    /// Sign extend EAX and write it to `reg`
    fn store32(&mut self, reg: usize) {
        self.em.movsxd_r64_r32(RAX, RAX);
        self.store64(reg);
    }

    fn set_flag(&mut self, cc: Cond, reg: usize) {
        self.em.setcc_al(cc);
        self.em.movzx_r64_r8(RAX, RAX);
        self.store64(reg);
    }

    fn write_link(&mut self, reg: usize, pc: u32) {
        if reg != 0 {
            self.em.mov_r64_imm64(RAX, sign_extend32(pc.wrapping_add(8) as u64));
            self.store64(reg);
        }
    }

    /// One instruction that doesn't own a delay slot
    fn body(&mut self, inst: Instruction, pc: u32, delay_slot: bool) {
        if !self.native(inst) {
            let helper = if delay_slot { helpers::exec_delay } else { helpers::exec };
            self.call_exec(helper as *const () as usize as u64, pc, inst.word);
        }
    }

    fn call_exec(&mut self, helper: u64, pc: u32, word: u32) {
        let em = &mut self.em;
        em.mov_m64_r64(RBX, COUNT, R12);
        em.mov_r64_r64(RDI, RBX);
        em.mov_r32_imm32(RSI, pc);
        em.mov_r32_imm32(RDX, word);
        em.mov_r64_imm64(RAX, helper);
        em.call_rax();
        em.mov_r64_m64(R12, RBX, COUNT);
        em.alu_r_imm32(Alu::Cmp, false, RAX, helpers::CONTINUE as i32);
        self.jump_if(Cond::NE, Target::Exit);
    }

    /// Hand the whole unit at `pc` to the interpreter and leave
    fn call_unit(&mut self, pc: u32) {
        let em = &mut self.em;
        em.mov_m32_imm32(RBX, PC, pc);
        em.mov_m64_r64(RBX, COUNT, R12);
        em.mov_r64_r64(RDI, RBX);
        em.mov_r64_imm64(RAX, helpers::unit as *const () as usize as u64);
        em.call_rax();
        em.mov_r64_m64(R12, RBX, COUNT);
        self.jump(Target::Exit);
    }

    /// Integer ops with no side effects besides their destination. False if `inst` needs
    /// a helper.
    fn native(&mut self, inst: Instruction) -> bool {
        use Opcode::*;
        let (rs, rt, rd) = (inst.rs(), inst.rt(), inst.rd());
        let sa = inst.sa() as u8;
        let simm = inst.simm() as i32;
        let uimm = inst.imm() as i32;

        match inst.op {
            Addi | Addiu => {
                self.load32(RAX, rs);
                self.em.alu_r_imm32(Alu::Add, false, RAX, simm);
                self.store32(rt);
            }
            Daddi | Daddiu => {
                self.load64(RAX, rs);
                self.em.alu_r_imm32(Alu::Add, true, RAX, simm);
                self.store64(rt);
            }
            Slti | Sltiu => {
                self.load64(RAX, rs);
                self.em.alu_r_imm32(Alu::Cmp, true, RAX, simm);
                self.set_flag(if inst.op == Slti { Cond::L } else { Cond::B }, rt);
            }
            Andi | Ori | Xori => {
                let op = match inst.op {
                    Andi => Alu::And,
                    Ori => Alu::Or,
                    _ => Alu::Xor,
                };
                self.load64(RAX, rs);
                self.em.alu_r_imm32(op, true, RAX, uimm);
                self.store64(rt);
            }
            Lui => {
                self.em.mov_r64_imm64(RAX, sign_extend32((uimm as u64) << 16));
                self.store64(rt);
            }

            Sll | Srl | Sra => {
                self.load32(RAX, rt);
                self.em.shift_imm8(shift_kind(inst.op), false, RAX, sa);
                self.store32(rd);
            }
            Sllv | Srlv | Srav => {
                self.load32(RAX, rt);
                self.load32(RCX, rs);
                self.em.shift_cl(shift_kind(inst.op), false, RAX);
                self.store32(rd);
            }
            Dsll | Dsrl | Dsra | Dsll32 | Dsrl32 | Dsra32 => {
                let sa = if matches!(inst.op, Dsll32 | Dsrl32 | Dsra32) { sa + 32 } else { sa };
                self.load64(RAX, rt);
                self.em.shift_imm8(shift_kind(inst.op), true, RAX, sa);
                self.store64(rd);
            }
            Dsllv | Dsrlv | Dsrav => {
                self.load64(RAX, rt);
                self.load32(RCX, rs);
                self.em.shift_cl(shift_kind(inst.op), true, RAX);
                self.store64(rd);
            }

            Add | Addu | Sub | Subu => {
                let op = if matches!(inst.op, Add | Addu) { Alu::Add } else { Alu::Sub };
                self.load32(RAX, rs);
                self.load32(RCX, rt);
                self.em.alu_r_r(op, false, RAX, RCX);
                self.store32(rd);
            }
            Dadd | Daddu | Dsub | Dsubu | And | Or | Xor | Nor => {
                let op = match inst.op {
                    Dadd | Daddu => Alu::Add,
                    Dsub | Dsubu => Alu::Sub,
                    And => Alu::And,
                    Xor => Alu::Xor,
                    _ => Alu::Or,
                };
                self.load64(RAX, rs);
                self.load64(RCX, rt);
                self.em.alu_r_r(op, true, RAX, RCX);
                if inst.op == Nor {
                    self.em.not_r64(RAX);
                }
                self.store64(rd);
            }
            Slt | Sltu => {
                self.load64(RAX, rs);
                self.em.cmp_r64_m64(RAX, RBX, gpr(rt));
                self.set_flag(if inst.op == Slt { Cond::L } else { Cond::B }, rd);
            }

            Mfhi | Mflo => {
                self.em.mov_r64_m64(RAX, RBX, if inst.op == Mfhi { HI } else { LO });
                self.store64(rd);
            }
            Mthi | Mtlo => {
                self.load64(RAX, rs);
                self.em.mov_m64_r64(RBX, if inst.op == Mthi { HI } else { LO }, RAX);
            }
            Sync | Cache => {}
            _ => return false,
        }
        true
    }

    /// Evaluate the condition and write the link register, before the delay slot runs
    fn resolve(&mut self, inst: Instruction, pc: u32) -> Resolution {
        use Opcode::*;
        let (rs, rt) = (inst.rs(), inst.rt());
        let target = inst.branch_target(pc).unwrap_or(0);

        let cc = match inst.op {
            J => return Resolution::Always(target),
            Jal => {
                self.write_link(31, pc);
                return Resolution::Always(target);
            }
            Jr | Jalr => {
                self.load32(RAX, rs);
                self.em.mov_m32_r32(RBX, JUMP_TARGET, RAX);
                if inst.op == Jalr {
                    self.write_link(inst.rd(), pc);
                }
                return Resolution::Register;
            }
            Beq | Beql | Bne | Bnel => {
                self.load64(RAX, rs);
                self.em.cmp_r64_m64(RAX, RBX, gpr(rt));
                if matches!(inst.op, Beq | Beql) { Cond::E } else { Cond::NE }
            }
            _ => {
                self.load64(RAX, rs);
                self.em.alu_r_imm32(Alu::Cmp, true, RAX, 0);
                match inst.op {
                    Blez | Blezl => Cond::LE,
                    Bgtz | Bgtzl => Cond::G,
                    Bltz | Bltzl | Bltzal | Bltzall => Cond::L,
                    _ => Cond::GE,
                }
            }
        };
        self.em.setcc_al(cc);
        self.em.mov_m8_r8(RBX, BRANCH_TAKEN, RAX);
        if matches!(inst.op, Bltzal | Bltzall | Bgezal | Bgezall) {
            self.write_link(31, pc);
        }
        Resolution::Conditional(target)
    }

    /// A branch at slot `i` together with its delay slot
    fn branch(&mut self, i: usize, inst: Instruction, pc: u32) {
        use Opcode::*;
        let delay_word = self.words.get(i + 1).copied().flatten();
        let Some(delay_word) = delay_word else {
            // the delay slot is on the next page or not backed
            self.jump(Target::Interpret(pc));
            return;
        };
        let delay = decode(delay_word);
        let idle_candidate = delay_word == 0 && inst.branch_target(pc) == Some(pc);
        if delay.is_branch() || idle_candidate || matches!(inst.op, Bc1f | Bc1t | Bc1fl | Bc1tl) {
            self.call_unit(pc);
            return;
        }

        let resolution = self.resolve(inst, pc);
        let skip = if inst.is_likely() {
            self.em.cmp_m8_imm8(RBX, BRANCH_TAKEN, 0);
            Some(self.em.jcc_rel32(Cond::E))
        } else {
            None
        };

        let slot_pc = pc.wrapping_add(4);
        let fallthrough = pc.wrapping_add(8);
        self.body(delay, slot_pc, true);

        match resolution {
            Resolution::Register => {
                self.em.alu_r_imm32(Alu::Add, true, R12, 2 * self.per_op);
                self.em.mov_r32_m32(RAX, RBX, JUMP_TARGET);
                self.em.mov_m32_r32(RBX, PC, RAX);
                self.jump(Target::Exit);
            }
            Resolution::Always(target) => {
                self.retire(2, target);
                self.goto(target);
            }
            Resolution::Conditional(target) if inst.is_likely() => {
                self.retire(2, target);
                self.goto(target);
            }
            Resolution::Conditional(target) => {
                self.em.cmp_m8_imm8(RBX, BRANCH_TAKEN, 0);
                let not_taken = self.em.jcc_rel32(Cond::E);
                self.retire(2, target);
                self.goto(target);
                let here = self.em.pos();
                self.em.patch_rel32(not_taken, here);
                self.retire(2, fallthrough);
                self.goto(fallthrough);
            }
        }

        if let Some(skip) = skip {
            // branch likely not taken: the delay slot is nullified
            let here = self.em.pos();
            self.em.patch_rel32(skip, here);
            self.retire(2, fallthrough);
            self.goto(fallthrough);
        }
    }

    /// Pass two: exit stub, jump wrappers, displacements
    fn link(mut self, entries: &[u32]) -> Vec<u8> {
        let exit = self.em.pos();
        self.epilogue();

        let mut leave: BTreeMap<u32, usize> = BTreeMap::new();
        let mut interpret: BTreeMap<u32, usize> = BTreeMap::new();
        let fixups = std::mem::take(&mut self.fixups);
        for fixup in fixups {
            let em = &mut self.em;
            let dest = match fixup.target {
                Target::Slot(slot) => entries[slot] as usize,
                Target::Exit => exit,
                Target::Leave(pc) => *leave.entry(pc).or_insert_with(|| {
                    let wrapper = em.pos();
                    em.mov_m32_imm32(RBX, PC, pc);
                    let at = em.jmp_rel32();
                    em.patch_rel32(at, exit);
                    wrapper
                }),
                Target::Interpret(pc) => *interpret.entry(pc).or_insert_with(|| {
                    let wrapper = em.pos();
                    em.mov_m32_imm32(RBX, PC, pc);
                    em.mov_m8_imm8(RBX, INTERP_REQUEST, 1);
                    let at = em.jmp_rel32();
                    em.patch_rel32(at, exit);
                    wrapper
                }),
            };
            em.patch_rel32(fixup.at, dest);
        }
        log::trace!(
            "page {:08x}: {} bytes, {} jump wrappers",
            self.vbase,
            self.em.pos(),
            leave.len() + interpret.len()
        );
        self.em.finish()
    }
}

fn shift_kind(op: Opcode) -> Shift {
    use Opcode::*;
    match op {
        Sll | Sllv | Dsll | Dsll32 | Dsllv => Shift::Shl,
        Srl | Srlv | Dsrl | Dsrl32 | Dsrlv => Shift::Shr,
        _ => Shift::Sar,
    }
}
