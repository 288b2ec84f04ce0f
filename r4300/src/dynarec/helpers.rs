//! Entry points called from translated code.
//!
//! Each one runs the interpreter semantics for one instruction, or for a whole unit, on
//! the `Core` the block was entered with. A non-zero return makes the block leave; the
//! helper has already set the PC and the cycle count by then.

use crate::exception::Fault;
use crate::instructions::decode;
use crate::interpreter::Flow;
use crate::Core;

pub const CONTINUE: u32 = 0;
pub const LEAVE: u32 = 1;

impl Core {
    fn execute_slot(&mut self, pc: u32, word: u32, delay_slot: bool) -> u32 {
        let inst = decode(word);
        log::trace!("{:08x}: {:08x}  {} (helper)", pc, word, inst.disassemble(pc));
        let slots = if delay_slot { 2 } else { 1 };
        let retired = slots * self.config.count_per_op;
        match self.execute(inst, pc) {
            Ok(Flow::Continue) => CONTINUE,
            Ok(Flow::Redirect) => {
                self.regs.count += retired;
                LEAVE
            }
            Err(Fault::Exception(e)) => {
                self.regs.count += retired;
                self.take_exception(e, pc, delay_slot);
                LEAVE
            }
            Err(Fault::Halt(err)) => {
                log::error!("core halted at {:08x}: {}", pc, err);
                self.regs.pc = pc;
                self.pending_error = Some(err);
                LEAVE
            }
        }
    }
}

/// One instruction outside a delay slot. The block counts it on `CONTINUE`.
///
/// # Safety
/// `core` must be the live `Core` the running block was entered with.
pub unsafe extern "C" fn exec(core: *mut Core, pc: u32, word: u32) -> u32 {
    let core = unsafe { &mut *core };
    core.execute_slot(pc, word, false)
}

/// The delay slot of a translated branch
///
/// # Safety
/// Same as `exec`.
pub unsafe extern "C" fn exec_delay(core: *mut Core, pc: u32, word: u32) -> u32 {
    let core = unsafe { &mut *core };
    core.execute_slot(pc, word, true)
}

/// Interpret the unit at `regs.pc`, counting included. The block always leaves afterwards.
///
/// # Safety
/// Same as `exec`.
pub unsafe extern "C" fn unit(core: *mut Core) -> u32 {
    let core = unsafe { &mut *core };
    if let Err(err) = core.run_unit() {
        core.pending_error = Some(err);
    }
    LEAVE
}
