//! System control coprocessor: register moves, TLB maintenance and ERET.

use crate::regfile::{cause, cp0, status, COP0_REG_NAMES};
use crate::tlb::TLB_ENTRIES;
use crate::Core;

impl Core {
    /// Live value of Random, derived from the cycle counter
    fn random(&self) -> u32 {
        let wired = self.regs.cop0[cp0::WIRED] & 0x3f;
        if wired >= TLB_ENTRIES as u32 {
            return TLB_ENTRIES as u32 - 1;
        }
        ((self.regs.count as u32) / 2 % (TLB_ENTRIES as u32 - wired)) + wired
    }

    pub fn read_cop0(&self, reg: usize) -> u32 {
        match reg {
            cp0::RANDOM => self.random(),
            cp0::COUNT => self.regs.count as u32,
            _ => self.regs.cop0[reg & 0x1f],
        }
    }

    /// MTC0 semantics, including the side effects on timers and interrupts.
    pub fn write_cop0(&mut self, reg: usize, value: u32) {
        let cop0 = &mut self.regs.cop0;
        match reg {
            cp0::INDEX => cop0[cp0::INDEX] = value & 0x8000_003f,
            cp0::RANDOM | cp0::BAD_VADDR | cp0::PRID | cp0::CACHE_ERR => {
                log::trace!("write to read-only {} ignored", COP0_REG_NAMES[reg]);
            }
            cp0::ENTRY_LO0 | cp0::ENTRY_LO1 => cop0[reg] = value & 0x3fff_ffff,
            cp0::CONTEXT => {
                cop0[cp0::CONTEXT] = (value & 0xff80_0000) | (cop0[cp0::CONTEXT] & 0x007f_fff0);
            }
            cp0::PAGE_MASK => cop0[cp0::PAGE_MASK] = value & 0x01ff_e000,
            cp0::WIRED => {
                cop0[cp0::WIRED] = value;
                cop0[cp0::RANDOM] = 31;
            }
            cp0::COUNT => self.set_count(value),
            cp0::ENTRY_HI => cop0[cp0::ENTRY_HI] = value & 0xffff_e0ff,
            cp0::COMPARE => {
                cop0[cp0::COMPARE] = value;
                cop0[cp0::CAUSE] &= !cause::IP7;
                self.schedule_compare();
                self.refresh_slice_end();
            }
            cp0::STATUS => {
                if (value ^ cop0[cp0::STATUS]) & status::FR != 0 {
                    log::debug!("FR changed to {}", value & status::FR != 0);
                }
                cop0[cp0::STATUS] = value;
                self.check_interrupt();
            }
            cp0::CAUSE => {
                // only the software interrupt bits are writable
                cop0[cp0::CAUSE] = (cop0[cp0::CAUSE] & !cause::IP0_IP1) | (value & cause::IP0_IP1);
                self.check_interrupt();
            }
            cp0::EPC | cp0::CONFIG | cp0::LL_ADDR | cp0::WATCH_LO | cp0::WATCH_HI | cp0::ERROR_EPC => {
                cop0[reg] = value;
            }
            cp0::TAG_LO => cop0[cp0::TAG_LO] = value & 0x0fff_ffc0,
            cp0::TAG_HI => cop0[cp0::TAG_HI] = 0,
            _ => {
                log::warn!("write to unknown COP0 register {} ({}) = {:08x}", reg, COP0_REG_NAMES[reg & 0x1f], value);
                cop0[reg & 0x1f] = value;
            }
        }
    }

    /// Rewrite the low half of the cycle counter, keeping every queued event at the same
    /// distance from it.
    fn set_count(&mut self, value: u32) {
        let old = self.regs.count;
        let new = (old & !0xffff_ffff) | value as u64;
        self.events.translate(old, new);
        self.run_start = self.run_start.wrapping_add(new.wrapping_sub(old));
        if self.budget_end != u64::MAX {
            self.budget_end = self.budget_end.wrapping_add(new.wrapping_sub(old));
        }
        self.regs.count = new;
        self.regs.cop0[cp0::COUNT] = value;
        self.schedule_compare();
        self.refresh_slice_end();
    }

    pub(crate) fn tlb_read(&mut self) {
        let index = (self.regs.cop0[cp0::INDEX] & 0x1f) as usize;
        self.tlb.read_entry(index, &mut self.regs.cop0);
    }

    pub(crate) fn tlb_write_index(&mut self) {
        let index = (self.regs.cop0[cp0::INDEX] & 0x1f) as usize;
        self.tlb_write(index);
    }

    pub(crate) fn tlb_write_random(&mut self) {
        let index = self.random();
        self.regs.cop0[cp0::RANDOM] = index;
        self.tlb_write(index as usize);
    }

    fn tlb_write(&mut self, index: usize) {
        let ranges = self.tlb.write_entry(index, &self.regs.cop0);
        for range in ranges {
            if self.code_pages.touch_virtual(range) {
                self.regs.exit_request = 1;
            }
        }
    }

    pub(crate) fn tlb_probe(&mut self) {
        self.tlb.probe(&mut self.regs.cop0);
    }

    /// Return from exception. Sets the PC itself.
    pub(crate) fn eret(&mut self) {
        let cop0 = &mut self.regs.cop0;
        if cop0[cp0::STATUS] & status::ERL != 0 {
            self.regs.pc = cop0[cp0::ERROR_EPC];
            cop0[cp0::STATUS] &= !status::ERL;
        } else {
            self.regs.pc = cop0[cp0::EPC];
            cop0[cp0::STATUS] &= !status::EXL;
        }
        self.regs.llbit = 0;
        self.check_interrupt();
    }
}
