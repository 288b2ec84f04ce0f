//! The VR4300 is the main CPU of the Nintendo 64, a 64-bit MIPS R4300 implementation.
//!
//! `Core` owns everything the processor can observe: registers, TLB, physical memory, the
//! event queue and the interrupt lines. It runs either through the reference interpreter or,
//! on x86-64 hosts, through the dynamic recompiler. Both produce identical state.

use common::{Status, StepController};
use thiserror::Error;

use events::EventQueue;
use memory::{CodePages, Memory, Mmio, OpenBus};
use regfile::RegFile;
use tlb::{Access, Tlb};

pub mod cop0;
#[cfg(all(target_arch = "x86_64", unix))]
pub mod dynarec;
pub mod events;
pub mod exception;
pub mod fpu;
pub mod instructions;
pub mod interpreter;
pub mod memory;
pub mod regfile;
pub mod tlb;

pub use events::EventKind;
pub use exception::Exception;

pub const RDRAM_SIZE: usize = 0x40_0000;
pub const RDRAM_SIZE_EXPANDED: usize = 0x80_0000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Interpreter,
    Dynarec,
}

/// What to do with an encoding the decoder doesn't know
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum UndefinedInstruction {
    /// Raise the reserved instruction exception, like the hardware
    #[default]
    Exception,
    /// Stop the core with `CoreError::UndefinedInstruction`
    Abort,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub strategy: Strategy,
    /// Cycles added to Count per retired instruction
    pub count_per_op: u64,
    /// Check FPU operands and results, raising FloatingPoint when enabled in FCR31
    pub float_traps: bool,
    pub undefined_instruction: UndefinedInstruction,
    pub rdram_size: usize,
    /// CVT.S.D always truncates, matching the Wii Virtual Console
    pub wii_vc: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            strategy: Strategy::Interpreter,
            count_per_op: 2,
            float_traps: false,
            undefined_instruction: UndefinedInstruction::Exception,
            rdram_size: RDRAM_SIZE_EXPANDED,
            wii_vc: false,
        }
    }
}

/// Conditions that stop the core. Guest exceptions are never errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("undefined instruction {word:08x} at {pc:08x}")]
    UndefinedInstruction { pc: u32, word: u32 },
    #[error("instruction fetch from unbacked physical address {paddr:08x} (pc {pc:08x})")]
    UnmappedFetch { pc: u32, paddr: u32 },
    #[error("unable to map executable memory: {0}")]
    ExecutableMemory(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Ran for the requested number of cycles
    Limited,
    /// The attached controller asked us to stop
    Stopped,
    Halted(CoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreRunResult {
    pub cycles: u64,
    pub reason: Reason,
}

/// Decision taken by the dynarec at a block boundary
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Resume {
    Run,
    /// Paused with a step request: run exactly one unit through the interpreter
    Single,
    Stop,
}

pub struct Core {
    pub regs: RegFile,
    pub tlb: Tlb,
    pub memory: Memory,
    pub events: EventQueue,
    /// Pending MI interrupt lines
    pub mi_intr: u32,
    pub mi_mask: u32,
    pub config: CoreConfig,
    pub(crate) code_pages: CodePages,
    /// Fatal error raised inside translated code, picked up by the dispatcher
    pub(crate) pending_error: Option<CoreError>,
    pub(crate) run_start: u64,
    pub(crate) budget_end: u64,
    controller: Option<StepController>,
    #[cfg(all(target_arch = "x86_64", unix))]
    dynarec: Option<Box<dynarec::Dynarec>>,
}

impl Core {
    pub fn new(config: CoreConfig) -> Core {
        Core::with_mmio(config, Box::new(OpenBus))
    }

    /// Create a core with device registers handled by `mmio`
    pub fn with_mmio(config: CoreConfig, mmio: Box<dyn Mmio>) -> Core {
        Core {
            regs: RegFile::default(),
            tlb: Tlb::new(),
            memory: Memory::new(config.rdram_size, mmio),
            events: EventQueue::new(),
            mi_intr: 0,
            mi_mask: 0,
            config,
            code_pages: CodePages::default(),
            pending_error: None,
            run_start: 0,
            budget_end: u64::MAX,
            controller: None,
            #[cfg(all(target_arch = "x86_64", unix))]
            dynarec: None,
        }
    }

    pub fn attach_controller(&mut self, controller: StepController) {
        self.controller = Some(controller);
    }

    pub fn detach_controller(&mut self) -> Option<StepController> {
        self.controller.take()
    }

    /// Translated code runs until the next event or the end of the run budget
    pub(crate) fn refresh_slice_end(&mut self) {
        self.regs.slice_end = self.events.peek_next_trigger().min(self.budget_end);
    }

    pub(crate) fn begin_run(&mut self, limit: u64) {
        self.run_start = self.regs.count;
        self.budget_end = self.regs.count.saturating_add(limit);
        self.refresh_slice_end();
    }

    pub(crate) fn finish_run(&mut self, reason: Reason) -> CoreRunResult {
        let cycles = self.regs.count.wrapping_sub(self.run_start);
        self.budget_end = u64::MAX;
        self.refresh_slice_end();
        self.regs.sync_count();
        CoreRunResult { cycles, reason }
    }

    /// Blocks while the controller has us paused. False once a stop was requested.
    pub(crate) fn wait_resumed(&mut self) -> bool {
        match &mut self.controller {
            Some(controller) => controller.wait_resumed(),
            None => true,
        }
    }

    #[cfg_attr(not(all(target_arch = "x86_64", unix)), allow(dead_code))]
    pub(crate) fn block_boundary(&mut self) -> Resume {
        let Some(controller) = self.controller.as_mut() else {
            return Resume::Run;
        };
        if controller.stop_requested() {
            return Resume::Stop;
        }
        if controller.status() == Status::Running {
            return Resume::Run;
        }
        if !controller.wait_resumed() {
            Resume::Stop
        } else if controller.status() == Status::Running {
            Resume::Run
        } else {
            Resume::Single
        }
    }

    /// Run for `limit` cycles with the configured strategy
    pub fn run(&mut self, limit: u64) -> CoreRunResult {
        match self.config.strategy {
            Strategy::Interpreter => self.run_interpreter(limit),
            Strategy::Dynarec => self.run_dynarec(limit),
        }
    }

    #[cfg(all(target_arch = "x86_64", unix))]
    fn run_dynarec(&mut self, limit: u64) -> CoreRunResult {
        let mut dynarec = self.dynarec.take().unwrap_or_default();
        let result = dynarec.run(self, limit);
        self.dynarec = Some(dynarec);
        result
    }

    #[cfg(not(all(target_arch = "x86_64", unix)))]
    fn run_dynarec(&mut self, limit: u64) -> CoreRunResult {
        log::warn!("no native code generator for this host, interpreting");
        self.run_interpreter(limit)
    }

    /// Translate without side effects. `None` when the access would raise a TLB exception.
    pub fn virtual_to_physical_address(&self, vaddr: u32, access: Access) -> Option<u32> {
        self.tlb.translate(vaddr, access).ok()
    }

    /// Write into physical memory from outside the CPU, dropping any translated code it
    /// overwrites. Returns the number of bytes that landed in writable memory.
    pub fn dma_write(&mut self, paddr: u32, data: &[u8]) -> usize {
        let written = self.memory.load(paddr, data);
        let start = (paddr & !0xfff) as u64;
        let end = (paddr as u64 + data.len() as u64).min(1 << 32);
        for page in (start..end).step_by(0x1000) {
            if self.code_pages.touch(page as u32) {
                self.regs.exit_request = 1;
            }
        }
        written
    }

    pub fn load_rdram(&mut self, paddr: u32, data: &[u8]) -> usize {
        self.dma_write(paddr, data)
    }

    /// Replace the cartridge image
    pub fn load_rom(&mut self, rom: Vec<u8>) {
        log::debug!("cartridge ROM: {} bytes", rom.len());
        self.memory.rom = rom;
    }

    pub fn load_pif_rom(&mut self, data: &[u8]) {
        let len = data.len().min(self.memory.pif_rom.len());
        self.memory.pif_rom[..len].copy_from_slice(&data[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_cores_are_independent() {
        let mut a = Core::new(CoreConfig::default());
        let b = Core::new(CoreConfig { rdram_size: RDRAM_SIZE, ..CoreConfig::default() });
        a.regs.set_gpr(1, 5);
        a.schedule_interrupt(EventKind::Vi, 10);
        assert_eq!(b.regs.gpr(1), 0);
        assert!(b.events.is_empty());
        assert_eq!(b.memory.rdram.len(), RDRAM_SIZE);
    }

    #[test]
    fn address_translation_entry_point() {
        let core = Core::new(CoreConfig::default());
        assert_eq!(core.virtual_to_physical_address(0x8000_1234, Access::Read), Some(0x1234));
        assert_eq!(core.virtual_to_physical_address(0xbfc0_0000, Access::Fetch), Some(0x1fc0_0000));
        assert_eq!(core.virtual_to_physical_address(0x0000_1000, Access::Write), None);
    }

    #[test]
    fn slice_end_tracks_events_and_budget() {
        let mut core = Core::new(CoreConfig::default());
        core.begin_run(100);
        assert_eq!(core.regs.slice_end, 100);
        core.schedule_interrupt(EventKind::Si, 40);
        assert_eq!(core.regs.slice_end, 40);
        core.remove_interrupt(EventKind::Si);
        assert_eq!(core.regs.slice_end, 100);
        let result = core.finish_run(Reason::Limited);
        assert_eq!(result.cycles, 0);
        assert_eq!(core.regs.slice_end, u64::MAX);
    }

    #[test]
    fn loads_and_dma() {
        let mut core = Core::new(CoreConfig::default());
        assert_eq!(core.load_rdram(0x10, &[1, 2, 3]), 3);
        assert_eq!(&core.memory.rdram[0x10..0x13], &[1, 2, 3]);
        core.load_rom(vec![0x80, 0x37, 0x12, 0x40]);
        assert_eq!(core.memory.fetch(0x1000_0000), Some(0x8037_1240));
        core.load_pif_rom(&[0x3c, 0x09, 0xa4, 0x00]);
        assert_eq!(core.memory.fetch(0x1fc0_0000), Some(0x3c09_a400));
    }

    #[test]
    fn dma_marks_every_page_it_covers() {
        let mut core = Core::new(CoreConfig::default());
        core.code_pages.insert(1);
        core.code_pages.insert(2);
        core.code_pages.insert(0);
        assert_eq!(core.dma_write(0x1ff0, &[0xaa; 32]), 32);
        assert_eq!(core.code_pages.dirty, vec![1, 2]);
        assert_eq!(core.regs.exit_request, 1);

        // top of the address space: nothing lands, nothing wraps
        core.code_pages.dirty.clear();
        assert_eq!(core.dma_write(0xffff_f000, &[0; 16]), 0);
        assert_eq!(core.dma_write(0xffff_fff0, &[0; 64]), 0);
        assert!(core.code_pages.dirty.is_empty());
        assert_eq!(core.memory.rdram[0], 0);
    }
}
