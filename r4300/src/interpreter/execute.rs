use common::util::sign_extend32;

use super::{Branch, Flow};
use crate::exception::{Exception, Fault};
use crate::instructions::{Instruction, Opcode};
use crate::regfile::fcr31;
use crate::{Core, CoreError, UndefinedInstruction};

/// 64x64 bit multiply built from four 32x32 partial products. Returns (hi, lo).
pub(crate) fn multiply64(a: u64, b: u64, signed: bool) -> (u64, u64) {
    let (a_lo, a_hi) = (a & 0xffff_ffff, a >> 32);
    let (b_lo, b_hi) = (b & 0xffff_ffff, b >> 32);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 32) + (lh & 0xffff_ffff) + (hl & 0xffff_ffff);
    let lo = (ll & 0xffff_ffff) | (mid << 32);
    let mut hi = hh + (lh >> 32) + (hl >> 32) + (mid >> 32);

    if signed {
        // two's complement correction of the unsigned product
        if (a as i64) < 0 {
            hi = hi.wrapping_sub(b);
        }
        if (b as i64) < 0 {
            hi = hi.wrapping_sub(a);
        }
    }
    (hi, lo)
}

/// DIV/DIVU/DDIV/DDIVU. Returns (hi, lo).
///
/// Division by zero is undefined in the manual; the VR4300 leaves the dividend in HI and
/// all ones (or +1 for a negative signed dividend) in LO.
pub(crate) fn divide(a: u64, b: u64, signed: bool, wide: bool) -> (u64, u64) {
    match (signed, wide) {
        (true, false) => {
            let (a, b) = (a as i32, b as i32);
            if b == 0 {
                log::debug!("DIV by zero");
                return (a as u64, if a < 0 { 1 } else { u64::MAX });
            }
            (a.wrapping_rem(b) as u64, a.wrapping_div(b) as u64)
        }
        (false, false) => {
            let (a, b) = (a as u32, b as u32);
            if b == 0 {
                log::debug!("DIVU by zero");
                return (sign_extend32(a as u64), u64::MAX);
            }
            (sign_extend32((a % b) as u64), sign_extend32((a / b) as u64))
        }
        (true, true) => {
            let (a, b) = (a as i64, b as i64);
            if b == 0 {
                log::debug!("DDIV by zero");
                return (a as u64, if a < 0 { 1 } else { u64::MAX });
            }
            (a.wrapping_rem(b) as u64, a.wrapping_div(b) as u64)
        }
        (false, true) => {
            if b == 0 {
                log::debug!("DDIVU by zero");
                return (a, u64::MAX);
            }
            (a % b, a / b)
        }
    }
}

impl Core {
    fn trap_if(&self, condition: bool) -> Result<(), Fault> {
        if condition {
            Err(Exception::Trap.into())
        } else {
            Ok(())
        }
    }

    fn undefined(&self, inst: Instruction, pc: u32) -> Fault {
        match self.config.undefined_instruction {
            UndefinedInstruction::Exception => {
                log::warn!("reserved instruction {:08x} at {:08x}", inst.word, pc);
                Exception::ReservedInstruction.into()
            }
            UndefinedInstruction::Abort => {
                log::error!("undefined instruction {:08x} at {:08x}", inst.word, pc);
                CoreError::UndefinedInstruction { pc, word: inst.word }.into()
            }
        }
    }

    /// Execute any instruction that doesn't own a delay slot.
    ///
    /// A branch reaching this point sits in a delay slot and is ignored.
    pub(crate) fn execute(&mut self, inst: Instruction, pc: u32) -> Result<Flow, Fault> {
        use Opcode::*;

        let rs = self.regs.gpr(inst.rs());
        let rt = self.regs.gpr(inst.rt());
        let simm = inst.simm() as u64;
        let uimm = inst.imm() as u64;
        let sa = inst.sa();
        let (rd_idx, rt_idx) = (inst.rd(), inst.rt());
        let regs = &mut self.regs;

        match inst.op {
            Addi | Addiu => regs.set_gpr32(rt_idx, (rs as u32).wrapping_add(simm as u32)),
            Daddi | Daddiu => regs.set_gpr(rt_idx, rs.wrapping_add(simm)),
            Slti => regs.set_gpr(rt_idx, ((rs as i64) < (simm as i64)) as u64),
            Sltiu => regs.set_gpr(rt_idx, (rs < simm) as u64),
            Andi => regs.set_gpr(rt_idx, rs & uimm),
            Ori => regs.set_gpr(rt_idx, rs | uimm),
            Xori => regs.set_gpr(rt_idx, rs ^ uimm),
            Lui => regs.set_gpr32(rt_idx, (uimm as u32) << 16),

            Sll => regs.set_gpr32(rd_idx, (rt as u32).wrapping_shl(sa)),
            Srl => regs.set_gpr32(rd_idx, (rt as u32).wrapping_shr(sa)),
            Sra => regs.set_gpr32(rd_idx, (rt as i32).wrapping_shr(sa) as u32),
            Sllv => regs.set_gpr32(rd_idx, (rt as u32).wrapping_shl(rs as u32 & 31)),
            Srlv => regs.set_gpr32(rd_idx, (rt as u32).wrapping_shr(rs as u32 & 31)),
            Srav => regs.set_gpr32(rd_idx, (rt as i32).wrapping_shr(rs as u32 & 31) as u32),
            Dsll => regs.set_gpr(rd_idx, rt << sa),
            Dsrl => regs.set_gpr(rd_idx, rt >> sa),
            Dsra => regs.set_gpr(rd_idx, ((rt as i64) >> sa) as u64),
            Dsll32 => regs.set_gpr(rd_idx, rt << (sa + 32)),
            Dsrl32 => regs.set_gpr(rd_idx, rt >> (sa + 32)),
            Dsra32 => regs.set_gpr(rd_idx, ((rt as i64) >> (sa + 32)) as u64),
            Dsllv => regs.set_gpr(rd_idx, rt << (rs & 63)),
            Dsrlv => regs.set_gpr(rd_idx, rt >> (rs & 63)),
            Dsrav => regs.set_gpr(rd_idx, ((rt as i64) >> (rs & 63)) as u64),

            Mfhi => regs.set_gpr(rd_idx, regs.hi),
            Mflo => regs.set_gpr(rd_idx, regs.lo),
            Mthi => regs.hi = rs,
            Mtlo => regs.lo = rs,
            Mult => {
                let product = (rs as i32 as i64).wrapping_mul(rt as i32 as i64) as u64;
                regs.hi = sign_extend32(product >> 32);
                regs.lo = sign_extend32(product);
            }
            Multu => {
                let product = (rs as u32 as u64) * (rt as u32 as u64);
                regs.hi = sign_extend32(product >> 32);
                regs.lo = sign_extend32(product);
            }
            Dmult | Dmultu => {
                (regs.hi, regs.lo) = multiply64(rs, rt, inst.op == Dmult);
            }
            Div => (regs.hi, regs.lo) = divide(rs, rt, true, false),
            Divu => (regs.hi, regs.lo) = divide(rs, rt, false, false),
            Ddiv => (regs.hi, regs.lo) = divide(rs, rt, true, true),
            Ddivu => (regs.hi, regs.lo) = divide(rs, rt, false, true),

            // overflow never traps
            Add | Addu => regs.set_gpr32(rd_idx, (rs as u32).wrapping_add(rt as u32)),
            Sub | Subu => regs.set_gpr32(rd_idx, (rs as u32).wrapping_sub(rt as u32)),
            Dadd | Daddu => regs.set_gpr(rd_idx, rs.wrapping_add(rt)),
            Dsub | Dsubu => regs.set_gpr(rd_idx, rs.wrapping_sub(rt)),
            And => regs.set_gpr(rd_idx, rs & rt),
            Or => regs.set_gpr(rd_idx, rs | rt),
            Xor => regs.set_gpr(rd_idx, rs ^ rt),
            Nor => regs.set_gpr(rd_idx, !(rs | rt)),
            Slt => regs.set_gpr(rd_idx, ((rs as i64) < (rt as i64)) as u64),
            Sltu => regs.set_gpr(rd_idx, (rs < rt) as u64),

            Tge => self.trap_if(rs as i64 >= rt as i64)?,
            Tgeu => self.trap_if(rs >= rt)?,
            Tlt => self.trap_if((rs as i64) < rt as i64)?,
            Tltu => self.trap_if(rs < rt)?,
            Teq => self.trap_if(rs == rt)?,
            Tne => self.trap_if(rs != rt)?,
            Tgei => self.trap_if(rs as i64 >= simm as i64)?,
            Tgeiu => self.trap_if(rs >= simm)?,
            Tlti => self.trap_if((rs as i64) < simm as i64)?,
            Tltiu => self.trap_if(rs < simm)?,
            Teqi => self.trap_if(rs == simm)?,
            Tnei => self.trap_if(rs != simm)?,
            Syscall => return Err(Exception::Syscall.into()),
            Break => return Err(Exception::Breakpoint.into()),
            Sync | Cache => {}

            Lb | Lbu | Lh | Lhu | Lw | Lwu | Ld | Lwl | Lwr | Ldl | Ldr | Ll | Lld
            | Sb | Sh | Sw | Sd | Swl | Swr | Sdl | Sdr | Sc | Scd
            | Lwc1 | Ldc1 | Swc1 | Sdc1 => self.memory_op(inst)?,

            Mfc0 | Dmfc0 => {
                let val = self.read_cop0(rd_idx);
                self.regs.set_gpr32(rt_idx, val);
            }
            Mtc0 | Dmtc0 => self.write_cop0(rd_idx, rt as u32),
            Tlbr => self.tlb_read(),
            Tlbwi => self.tlb_write_index(),
            Tlbwr => self.tlb_write_random(),
            Tlbp => self.tlb_probe(),
            Eret => {
                self.eret();
                return Ok(Flow::Redirect);
            }

            Mfc1 | Dmfc1 | Cfc1 | Mtc1 | Dmtc1 | Ctc1
            | FAdd(_) | FSub(_) | FMul(_) | FDiv(_) | FSqrt(_) | FAbs(_) | FMov(_) | FNeg(_)
            | RoundL(_) | TruncL(_) | CeilL(_) | FloorL(_)
            | RoundW(_) | TruncW(_) | CeilW(_) | FloorW(_)
            | CvtS(_) | CvtD(_) | CvtW(_) | CvtL(_) | FCompare(..) => self.execute_cop1(inst)?,

            J | Jal | Jr | Jalr | Beq | Bne | Blez | Bgtz | Beql | Bnel | Blezl | Bgtzl
            | Bltz | Bgez | Bltzl | Bgezl | Bltzal | Bgezal | Bltzall | Bgezall
            | Bc1f | Bc1t | Bc1fl | Bc1tl => {
                // link registers are written, the transfer itself is dropped
                self.evaluate_branch(inst, pc)?;
                log::warn!("{} in delay slot at {:08x} ignored", inst.name(), pc);
            }

            Reserved => return Err(self.undefined(inst, pc)),
        }
        Ok(Flow::Continue)
    }

    /// Resolve a branch or jump: decide whether it is taken and write its link register.
    pub(crate) fn evaluate_branch(&mut self, inst: Instruction, pc: u32) -> Result<Branch, Fault> {
        use Opcode::*;

        let rs = self.regs.gpr(inst.rs()) as i64;
        let rt = self.regs.gpr(inst.rt()) as i64;
        let link = sign_extend32(pc.wrapping_add(8) as u64);
        let target = inst.branch_target(pc).unwrap_or(0);

        let taken = match inst.op {
            J => true,
            Jal => {
                self.regs.set_gpr(31, link);
                true
            }
            Jr => {
                return Ok(Branch { taken: true, target: rs as u32 });
            }
            Jalr => {
                // the target is read before the link is written, rd may equal rs
                self.regs.set_gpr(inst.rd(), link);
                return Ok(Branch { taken: true, target: rs as u32 });
            }
            Beq | Beql => rs == rt,
            Bne | Bnel => rs != rt,
            Blez | Blezl => rs <= 0,
            Bgtz | Bgtzl => rs > 0,
            Bltz | Bltzl => rs < 0,
            Bgez | Bgezl => rs >= 0,
            Bltzal | Bltzall => {
                self.regs.set_gpr(31, link);
                rs < 0
            }
            Bgezal | Bgezall => {
                self.regs.set_gpr(31, link);
                rs >= 0
            }
            Bc1f | Bc1t | Bc1fl | Bc1tl => {
                self.cop1_usable()?;
                let condition = self.regs.fcr31 & fcr31::CONDITION != 0;
                match inst.op {
                    Bc1t | Bc1tl => condition,
                    _ => !condition,
                }
            }
            _ => {
                log::warn!("{} evaluated as a branch", inst.name());
                false
            }
        };
        Ok(Branch { taken, target })
    }
}
