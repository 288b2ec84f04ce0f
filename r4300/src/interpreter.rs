//! Reference interpreter.
//!
//! The unit of execution is either a single instruction, or a branch together with its delay
//! slot. Counting, interrupt delivery and debugger suspension all happen between units, so
//! a branch and its delay slot are never separated.

mod execute;
mod memory_ops;

pub(crate) use execute::{divide, multiply64};

use crate::exception::Fault;
use crate::instructions::{decode, Instruction};
use crate::{Core, CoreError, CoreRunResult, Reason};

/// What an instruction did to the program counter
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Flow {
    /// fall through to the next instruction
    Continue,
    /// the instruction set the PC itself (ERET)
    Redirect,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Branch {
    pub taken: bool,
    pub target: u32,
}

/// A fault, tagged with where it happened
struct Trapped {
    fault: Fault,
    pc: u32,
    delay_slot: bool,
}

impl Core {
    fn fetch_decode(&mut self, pc: u32) -> Result<Instruction, Fault> {
        let word = self.fetch(pc)?;
        let inst = decode(word);
        log::trace!("{:08x}: {:08x}  {}", pc, word, inst.disassemble(pc));
        Ok(inst)
    }

    /// Zero-word delay slot, a static target equal to the branch, and something to wait for.
    /// Register jumps never count, whatever they hold.
    fn idle_skip(&mut self, inst: Instruction, pc: u32, branch: Branch) -> bool {
        if !branch.taken || inst.branch_target(pc) != Some(pc) || !self.events.has_pending() {
            return false;
        }
        match self.fetch(pc.wrapping_add(4)) {
            Ok(0) => {}
            _ => return false,
        }
        let skip = self.events.peek_next_trigger().saturating_sub(self.regs.count);
        if skip > 3 {
            log::trace!("idle loop at {:08x}, skipping {} cycles", pc, skip & !3);
            self.regs.count += skip & !3;
            true
        } else {
            false
        }
    }

    /// Execute one unit. Returns the number of instruction slots retired.
    fn execute_unit(&mut self) -> Result<u64, Trapped> {
        let pc = self.regs.pc;
        let at_branch = |fault| Trapped { fault, pc, delay_slot: false };

        let inst = self.fetch_decode(pc).map_err(at_branch)?;
        if !inst.is_branch() {
            if let Flow::Continue = self.execute(inst, pc).map_err(at_branch)? {
                self.regs.pc = pc.wrapping_add(4);
            }
            return Ok(1);
        }

        let branch = self.evaluate_branch(inst, pc).map_err(at_branch)?;
        if self.idle_skip(inst, pc, branch) {
            return Ok(0);
        }
        if !branch.taken && inst.is_likely() {
            // the delay slot is nullified
            self.regs.pc = pc.wrapping_add(8);
            return Ok(2);
        }

        let slot_pc = pc.wrapping_add(4);
        let in_slot = |fault| Trapped { fault, pc: slot_pc, delay_slot: true };
        let slot = self.fetch_decode(slot_pc).map_err(in_slot)?;
        if let Flow::Redirect = self.execute(slot, slot_pc).map_err(in_slot)? {
            return Ok(2);
        }
        self.regs.pc = if branch.taken { branch.target } else { pc.wrapping_add(8) };
        Ok(2)
    }

    /// Run one unit, count it and deliver any exception it raised.
    pub(crate) fn run_unit(&mut self) -> Result<(), CoreError> {
        let per_op = self.config.count_per_op;
        match self.execute_unit() {
            Ok(slots) => {
                self.regs.count += slots * per_op;
                Ok(())
            }
            Err(Trapped { fault: Fault::Exception(e), pc, delay_slot }) => {
                self.regs.count += if delay_slot { 2 * per_op } else { per_op };
                self.take_exception(e, pc, delay_slot);
                Ok(())
            }
            Err(Trapped { fault: Fault::Halt(err), pc, .. }) => {
                log::error!("core halted at {:08x}: {}", pc, err);
                self.regs.pc = pc;
                Err(err)
            }
        }
    }

    /// Execute one unit (an instruction, or a branch and its delay slot), then deliver any
    /// events that came due.
    pub fn step(&mut self) -> Result<(), CoreError> {
        self.run_unit()?;
        if self.regs.count >= self.events.peek_next_trigger() {
            self.gen_interrupt();
        }
        Ok(())
    }

    /// Interpret until `limit` cycles have passed, the controller stops us, or a fatal
    /// error occurs.
    pub fn run_interpreter(&mut self, limit: u64) -> CoreRunResult {
        self.begin_run(limit);
        let reason = loop {
            if self.regs.count >= self.budget_end {
                break Reason::Limited;
            }
            if !self.wait_resumed() {
                break Reason::Stopped;
            }
            if let Err(err) = self.step() {
                break Reason::Halted(err);
            }
        };
        self.finish_run(reason)
    }
}
