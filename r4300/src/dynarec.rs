//! Dynamic recompiler for x86-64 System V hosts.
//!
//! Guest code is translated a 4 KB page at a time. Blocks are entered at the slot holding
//! the PC and leave when the slice ends (next event or end of the run), after an
//! exception, when code they depend on was overwritten, or when control moves to another
//! page. Everything between two blocks happens here: interrupt delivery, debugger
//! suspension and dropping stale translations.

mod cache;
mod compiler;
mod emitter;
mod helpers;

use cache::{Block, BlockCache, BlockId};
use compiler::{compile_page, PAGE_SLOTS};

use crate::tlb::Access;
use crate::{Core, CoreError, CoreRunResult, Reason, Resume};

/// Prologue at offset 0 of every block: `fn(core, entry)` jumps straight to `entry`
type BlockFn = unsafe extern "C" fn(core: *mut Core, entry: *const u8);

#[derive(Default)]
pub struct Dynarec {
    cache: BlockCache,
    /// Cycles per instruction the cached blocks were translated with
    per_op: Option<i32>,
    /// Executable memory is unavailable, interpret everything
    disabled: bool,
}

impl Dynarec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of translated pages
    pub fn blocks(&self) -> usize {
        self.cache.len()
    }

    pub fn run(&mut self, core: &mut Core, limit: u64) -> CoreRunResult {
        self.prepare(core);
        // writes made while stopped (loaders, debugger) still count
        self.collect_invalid(core);
        core.begin_run(limit);
        let reason = loop {
            if core.regs.count >= core.budget_end {
                break Reason::Limited;
            }
            let result = match core.block_boundary() {
                Resume::Stop => break Reason::Stopped,
                Resume::Single => core.step(),
                Resume::Run => self.execute(core),
            };
            self.collect_invalid(core);
            if let Err(err) = result {
                break Reason::Halted(err);
            }
        };
        core.finish_run(reason)
    }

    /// Translations bake in the cycle cost per instruction
    fn prepare(&mut self, core: &mut Core) {
        let per_op = i32::try_from(core.config.count_per_op)
            .ok()
            .filter(|&p| p <= i32::MAX / 2);
        if per_op != self.per_op {
            self.cache.clear(&mut core.code_pages);
            self.per_op = per_op;
            if per_op.is_none() {
                log::warn!("count_per_op {} too large to translate, interpreting", core.config.count_per_op);
            }
        }
    }

    /// Run one block (or one interpreted unit), then deliver due events
    fn execute(&mut self, core: &mut Core) -> Result<(), CoreError> {
        if core.regs.interp_request != 0 {
            core.regs.interp_request = 0;
            core.run_unit()?;
        } else {
            match self.block_for(core) {
                Some(id) => self.enter(id, core)?,
                None => core.run_unit()?,
            }
        }
        if core.regs.count >= core.events.peek_next_trigger() {
            core.gen_interrupt();
        }
        Ok(())
    }

    fn enter(&mut self, id: BlockId, core: &mut Core) -> Result<(), CoreError> {
        let Some(block) = self.cache.get(id) else {
            return core.run_unit();
        };
        let entry = block.entry(core.regs.pc);
        // SAFETY: offset 0 of every block is the prologue emitted by `compile_page`, which
        // follows the System V calling convention for `BlockFn`.
        let function = unsafe { std::mem::transmute::<*const u8, BlockFn>(block.function()) };

        core.regs.exit_request = 0;
        core.refresh_slice_end();
        // SAFETY: the block only touches `core` through the offsets of `RegFile` fields and
        // through the helpers, and the mapping outlives the call since blocks are only
        // dropped between calls.
        unsafe { function(core as *mut Core, entry) };

        match core.pending_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Translation for the page holding the PC, if one exists or can be made
    fn block_for(&mut self, core: &mut Core) -> Option<BlockId> {
        if self.disabled {
            return None;
        }
        let pc = core.regs.pc;
        if pc & 3 != 0 {
            return None;
        }
        let ppage = core.tlb.translate(pc, Access::Fetch).ok()? >> 12;
        let vpage = pc >> 12;
        if let Some(id) = self.cache.lookup(vpage) {
            let current = self.cache.get(id).map(|block| block.ppage);
            if current == Some(ppage) {
                return Some(id);
            }
            // remapped since translation
            self.cache.remove(id, &mut core.code_pages);
        }
        self.compile(core, vpage, ppage)
    }

    fn compile(&mut self, core: &mut Core, vpage: u32, ppage: u32) -> Option<BlockId> {
        let per_op = self.per_op?;
        let words: Vec<Option<u32>> = (0..PAGE_SLOTS as u32)
            .map(|slot| core.memory.fetch((ppage << 12) | (slot << 2)))
            .collect();
        let compiled = compile_page(&words, vpage << 12, per_op);
        match Block::new(vpage, ppage, &compiled.code, compiled.entries) {
            Ok(block) => {
                log::debug!(
                    "translated {:08x} (physical {:08x}): {} bytes",
                    vpage << 12,
                    ppage << 12,
                    block.code_size()
                );
                Some(self.cache.insert(block, &mut core.code_pages))
            }
            Err(err) => {
                log::warn!("{}, falling back to the interpreter", err);
                self.disabled = true;
                None
            }
        }
    }

    /// Drop translations of pages written or remapped since the last check
    fn collect_invalid(&mut self, core: &mut Core) {
        if !core.code_pages.has_dirty() {
            return;
        }
        let mut dropped = 0;
        for ppage in std::mem::take(&mut core.code_pages.dirty) {
            dropped += self.cache.invalidate_physical(ppage, &mut core.code_pages);
        }
        for (start, end) in std::mem::take(&mut core.code_pages.dirty_virtual) {
            dropped += self.cache.invalidate_virtual(start, end, &mut core.code_pages);
        }
        if dropped > 0 {
            log::debug!("invalidated {} translated pages", dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::encode::*;
    use crate::regfile::{cause, cp0, status};
    use crate::{CoreConfig, EventKind, Strategy as Backend};
    use proptest::prelude::*;

    const BASE: u32 = 0x8000_1000;

    fn core_with(program: &[u32], strategy: Backend) -> Core {
        let mut core = Core::new(CoreConfig { strategy, ..CoreConfig::default() });
        let bytes: Vec<u8> = program.iter().flat_map(|w| w.to_be_bytes()).collect();
        core.load_rdram(0x1000, &bytes);
        core.regs.pc = BASE;
        core
    }

    fn assert_same(a: &Core, b: &Core) {
        assert_eq!(a.regs.gpr, b.regs.gpr);
        assert_eq!((a.regs.hi, a.regs.lo), (b.regs.hi, b.regs.lo));
        assert_eq!(a.regs.pc, b.regs.pc);
        assert_eq!(a.regs.count, b.regs.count);
        assert_eq!(a.regs.cop0, b.regs.cop0);
        assert_eq!(a.regs.fgr, b.regs.fgr);
        assert_eq!(a.regs.fcr31, b.regs.fcr31);
        assert_eq!(a.regs.llbit, b.regs.llbit);
        assert_eq!(a.memory.rdram[..0x4000], b.memory.rdram[..0x4000]);
        assert_eq!(a.events.iter().collect::<Vec<_>>(), b.events.iter().collect::<Vec<_>>());
    }

    /// Run `program` under both strategies and compare the results
    fn equivalent(program: &[u32], setup: impl Fn(&mut Core), cycles: u64) -> (Core, Core) {
        let mut interp = core_with(program, Backend::Interpreter);
        let mut jit = core_with(program, Backend::Dynarec);
        setup(&mut interp);
        setup(&mut jit);
        let a = interp.run(cycles);
        let b = jit.run(cycles);
        assert_eq!(a, b);
        assert_same(&interp, &jit);
        (interp, jit)
    }

    #[test]
    fn alu_and_branches_match_the_interpreter() {
        let program = [
            lui(1, 0x8000),
            ori(1, 1, 0x7fff),
            addiu(2, 1, 0x7fff),        // 32 bit overflow, sign extended
            daddiu(3, 1, -1),
            sra(4, 2, 4),
            srl(5, 2, 4),
            dsll32(6, 1, 3),
            dsra32(7, 6, 1),
            srav(8, 2, 3),
            dsllv(9, 1, 3),
            nor(10, 1, 2),
            slt(11, 2, 1),
            sltu(12, 2, 1),
            slti(13, 2, -5),
            sltiu(14, 2, -5),
            andi(15, 2, 0xf0f0),
            xori(16, 2, 0xffff),
            mult(2, 1),                 // helper
            mflo(17),
            mfhi(18),
            mthi(1),
            addiu(19, 0, 3),
            addiu(19, 19, -1),          // loop: 3 iterations
            bne(19, 0, -2),
            addiu(20, 20, 1),           // delay slot runs every time
            beql(19, 1, 2),             // not taken: slot nullified
            addiu(21, 0, 1),
            bgezal(0, 2),
            addiu(22, 31, 0),           // sees the link register
            NOP,
            blez(19, 1),
            daddu(23, 22, 20),
            dsubu(24, 23, 2),
            and(25, 24, 1),
            xor(26, 25, 2),
            j_to(BASE + 4 * 40),
            sltu(27, 0, 1),
            NOP, NOP, NOP,
            beq(0, 0, -1),
            NOP,
        ];
        let (interp, _) = equivalent(&program, |_| {}, 400);
        assert_eq!(interp.regs.gpr(20), 3);
        assert_eq!(interp.regs.gpr(21), 0);
        assert_eq!(interp.regs.gpr(22), (BASE + 4 * 29) as i32 as i64 as u64);
        assert_eq!(interp.regs.pc, BASE + 4 * 40);
    }

    #[test]
    fn calls_returns_and_memory() {
        let program = [
            lui(29, 0x8000),
            ori(29, 29, 0x3000),
            jal(BASE + 4 * 8),
            addiu(4, 0, 21),
            sw(2, 29, 0),
            lw(5, 29, 0),
            beq(0, 0, -1),
            NOP,
            // v0 = a0 * 2
            addu(2, 4, 4),
            jalr(30, 31),
            NOP,
        ];
        let (interp, jit) = equivalent(&program, |_| {}, 200);
        assert_eq!(interp.regs.gpr(5), 42);
        assert_eq!(jit.regs.gpr(30), (BASE + 4 * 11) as i32 as i64 as u64);
    }

    /// Skips the faulting instruction: EPC += 4, ERET
    const HANDLER: [u32; 5] = [mfc0(26, cp0::EPC), addiu(26, 26, 4), mtc0(26, cp0::EPC), NOP, ERET];

    #[test]
    fn exceptions_and_interrupts_match() {
        let program = [
            addiu(1, 0, 5),
            SYSCALL,
            addiu(2, 0, 7),
            beq(0, 0, 2),
            SYSCALL,                    // in a delay slot
            NOP,
            addiu(3, 3, 1),
            beq(0, 0, -2),
            NOP,
        ];
        let (interp, _) = equivalent(
            &program,
            |core| {
                let handler: Vec<u8> = HANDLER.iter().flat_map(|w| w.to_be_bytes()).collect();
                core.load_rdram(0x180, &handler);
                core.regs.cop0[cp0::STATUS] = status::IE | 0x8000;
                core.write_cop0(cp0::COMPARE, 30);
                core.schedule_interrupt(EventKind::Vi, 50);
            },
            300,
        );
        assert_ne!(interp.regs.cop0[cp0::CAUSE] & cause::IP7, 0);
        assert_eq!(interp.regs.gpr(2), 7);
    }

    #[test]
    fn links_in_delay_slots_match() {
        let program = [
            addiu(4, 0, 0x40),
            beq(0, 0, 3),
            jal(0x8000_2000),           // link only
            NOP,
            NOP,
            bne(4, 0, 3),
            jalr(6, 4),
            NOP,
            NOP,
            bgezal(0, 2),
            bltzal(0, 5),
            NOP,
            beq(0, 0, -1),
            NOP,
        ];
        let (interp, _) = equivalent(&program, |_| {}, 100);
        assert_eq!(interp.regs.gpr(6), (BASE + 4 * 8) as i32 as i64 as u64);
        assert_eq!(interp.regs.gpr(31), (BASE + 4 * 12) as i32 as i64 as u64);
        assert_eq!(interp.regs.pc, BASE + 4 * 12);
    }

    #[test]
    fn idle_loops_skip_identically() {
        let program = [addiu(1, 0, 1), beq(0, 0, -1), NOP];
        let (interp, _) = equivalent(&program, |core| core.schedule_interrupt(EventKind::Vi, 1001), 2000);
        assert_ne!(interp.mi_intr, 0);
    }

    #[test]
    fn register_self_jumps_are_not_idle_in_either() {
        let program = [lui(4, 0x8000), ori(4, 4, 0x1008), jr(4), NOP];
        let (interp, jit) = equivalent(&program, |core| core.schedule_interrupt(EventKind::Vi, 1001), 600);
        assert_eq!(interp.regs.pc, BASE + 8);
        assert_eq!(jit.regs.count, interp.regs.count);
        assert_eq!(interp.mi_intr, 0);
    }

    #[test]
    fn stores_into_the_running_page_take_effect() {
        let new_word = addiu(5, 0, 77);
        let program = [
            lui(8, 0x8000),
            ori(8, 8, 0x1000),
            lui(9, (new_word >> 16) as u16),
            ori(9, 9, new_word as u16),
            sw(9, 8, 0x20),
            NOP, NOP, NOP,
            addiu(5, 0, 1),             // overwritten before it runs
            beq(0, 0, -1),
            NOP,
        ];
        let (interp, jit) = equivalent(&program, |_| {}, 100);
        assert_eq!(interp.regs.gpr(5), 77);
        assert_eq!(jit.regs.gpr(5), 77);
    }

    #[test]
    fn stale_blocks_are_regenerated() {
        let mut core = core_with(&[addiu(5, 0, 1), beq(0, 0, -1), NOP], Backend::Dynarec);
        core.run(20);
        assert_eq!(core.regs.gpr(5), 1);
        assert_eq!(core.dynarec.as_ref().map(|d| d.blocks()), Some(1));

        core.load_rdram(0x1000, &addiu(5, 0, 2).to_be_bytes());
        core.regs.pc = BASE;
        core.run(20);
        assert_eq!(core.regs.gpr(5), 2);
    }

    #[test]
    fn tlb_remap_invalidates() {
        // map virtual 0x0000_0000 (even page) to physical 0x1000 and run from there
        let program = [addiu(5, 5, 1), beq(0, 0, -1), NOP];
        let mut core = core_with(&program, Backend::Dynarec);
        let other: Vec<u8> = [addiu(5, 5, 100), beq(0, 0, -1), NOP].iter().flat_map(|w| w.to_be_bytes()).collect();
        core.load_rdram(0x2000, &other);
        core.regs.cop0[cp0::INDEX] = 0;
        core.regs.cop0[cp0::PAGE_MASK] = 0;
        core.regs.cop0[cp0::ENTRY_HI] = 0;
        core.regs.cop0[cp0::ENTRY_LO0] = (1 << 6) | 0b110; // pfn 1, dirty, valid
        core.regs.cop0[cp0::ENTRY_LO1] = 0;
        core.tlb_write_index();
        core.regs.pc = 0;
        core.run(10);
        assert_eq!(core.regs.gpr(5), 1);

        core.regs.cop0[cp0::ENTRY_LO0] = (2 << 6) | 0b110;
        core.tlb_write_index();
        core.regs.pc = 0;
        core.run(10);
        assert_eq!(core.regs.gpr(5), 101);
    }

    #[test]
    fn run_limits_and_halts() {
        let mut core = core_with(&[NOP; 32], Backend::Dynarec);
        let result = core.run(10);
        assert_eq!(result, CoreRunResult { cycles: 10, reason: Reason::Limited });
        assert_eq!(core.regs.pc, BASE + 20);

        let mut core = core_with(&[NOP, 0xfc00_0000], Backend::Dynarec);
        core.config.undefined_instruction = crate::UndefinedInstruction::Abort;
        let result = core.run(100);
        assert_eq!(
            result.reason,
            Reason::Halted(CoreError::UndefinedInstruction { pc: BASE + 4, word: 0xfc00_0000 })
        );
        assert_eq!(core.regs.pc, BASE + 4);
    }

    #[test]
    fn controller_is_honored_between_blocks() {
        let mut core = core_with(&[NOP; 32], Backend::Dynarec);
        let (handle, controller) = common::control_channel(true);
        core.attach_controller(controller);
        handle.step().unwrap();
        handle.step().unwrap();
        drop(handle);
        let result = core.run(1000);
        assert_eq!(result.reason, Reason::Stopped);
        assert_eq!(result.cycles, 4);
    }

    fn alu_op() -> impl Strategy<Value = u32> {
        let reg = || 1usize..8;
        prop_oneof![
            (reg(), reg(), any::<i16>()).prop_map(|(t, s, i)| addiu(t, s, i)),
            (reg(), reg(), any::<i16>()).prop_map(|(t, s, i)| daddiu(t, s, i)),
            (reg(), reg(), any::<u16>()).prop_map(|(t, s, i)| ori(t, s, i)),
            (reg(), any::<u16>()).prop_map(|(t, i)| lui(t, i)),
            (reg(), reg(), reg()).prop_map(|(d, s, t)| addu(d, s, t)),
            (reg(), reg(), reg()).prop_map(|(d, s, t)| subu(d, s, t)),
            (reg(), reg(), reg()).prop_map(|(d, s, t)| dsubu(d, s, t)),
            (reg(), reg(), reg()).prop_map(|(d, s, t)| slt(d, s, t)),
            (reg(), reg(), reg()).prop_map(|(d, s, t)| xor(d, s, t)),
            (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| sra(d, t, sa)),
            (reg(), reg(), 0u32..32).prop_map(|(d, t, sa)| dsll32(d, t, sa)),
            (reg(), reg(), reg()).prop_map(|(d, t, s)| srav(d, t, s)),
            (reg(), reg()).prop_map(|(s, t)| mult(s, t)),
            reg().prop_map(mflo),
            (reg(), reg(), 1i16..4).prop_map(|(s, t, off)| bne(s, t, off)),
            (reg(), reg(), 1i16..4).prop_map(|(s, t, off)| beql(s, t, off)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn random_programs_match(body in proptest::collection::vec(alu_op(), 1..40), seed: [u32; 7]) {
            let mut program = body;
            program.extend_from_slice(&[NOP, NOP, NOP, NOP, beq(0, 0, -1), NOP]);
            equivalent(&program, |core| {
                for (reg, &value) in seed.iter().enumerate() {
                    core.regs.set_gpr(reg + 1, value as i32 as u64);
                }
            }, 300);
        }
    }
}
