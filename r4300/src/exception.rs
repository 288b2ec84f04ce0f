use crate::events::EventKind;
use crate::regfile::{cause, cp0, status};
use crate::{Core, CoreError};

/// Guest visible exceptions.
///
/// Address and TLB faults carry the offending virtual address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    Interrupt,
    TlbModification(u32),
    TlbLoad(u32),
    TlbStore(u32),
    AddressLoad(u32),
    AddressStore(u32),
    Syscall,
    Breakpoint,
    ReservedInstruction,
    CopUnusable(u8),
    Trap,
    FloatingPoint,
}

impl Exception {
    /// Cause.ExcCode
    pub fn code(&self) -> u32 {
        match self {
            Exception::Interrupt => 0,
            Exception::TlbModification(_) => 1,
            Exception::TlbLoad(_) => 2,
            Exception::TlbStore(_) => 3,
            Exception::AddressLoad(_) => 4,
            Exception::AddressStore(_) => 5,
            Exception::Syscall => 8,
            Exception::Breakpoint => 9,
            Exception::ReservedInstruction => 10,
            Exception::CopUnusable(_) => 11,
            Exception::Trap => 13,
            Exception::FloatingPoint => 15,
        }
    }

    pub fn bad_vaddr(&self) -> Option<u32> {
        match *self {
            Exception::TlbModification(vaddr)
            | Exception::TlbLoad(vaddr)
            | Exception::TlbStore(vaddr)
            | Exception::AddressLoad(vaddr)
            | Exception::AddressStore(vaddr) => Some(vaddr),
            _ => None,
        }
    }
}

/// Anything that stops an instruction from completing
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fault {
    Exception(Exception),
    Halt(CoreError),
}

impl From<Exception> for Fault {
    fn from(e: Exception) -> Self {
        Fault::Exception(e)
    }
}

impl From<CoreError> for Fault {
    fn from(e: CoreError) -> Self {
        Fault::Halt(e)
    }
}

const VECTOR_BASE: u32 = 0x8000_0000;
const BOOT_VECTOR_BASE: u32 = 0xbfc0_0200;
const GENERAL_OFFSET: u32 = 0x180;

impl Core {
    /// Enter the exception handler.
    ///
    /// `pc` is the address of the faulting instruction; for a fault in a delay slot EPC points
    /// at the branch instead and Cause.BD is set.
    pub(crate) fn take_exception(&mut self, exception: Exception, pc: u32, delay_slot: bool) {
        let cop0 = &mut self.regs.cop0;
        let exl = cop0[cp0::STATUS] & status::EXL != 0;

        if exception != Exception::Interrupt {
            log::debug!("{:?} at {:08x}{}", exception, pc, if delay_slot { " (delay slot)" } else { "" });
        } else {
            log::trace!("interrupt at {:08x}, cause {:08x}", pc, cop0[cp0::CAUSE]);
        }

        if let Some(vaddr) = exception.bad_vaddr() {
            cop0[cp0::BAD_VADDR] = vaddr;
            cop0[cp0::CONTEXT] = (cop0[cp0::CONTEXT] & 0xff80_000f) | ((vaddr >> 9) & 0x007f_fff0);
            cop0[cp0::ENTRY_HI] = (vaddr & 0xffff_e000) | (cop0[cp0::ENTRY_HI] & 0xff);
        }

        let mut cause_reg = cop0[cp0::CAUSE] & !(cause::EXC_CODE | cause::CE);
        cause_reg |= exception.code() << 2;
        if let Exception::CopUnusable(n) = exception {
            cause_reg |= (n as u32 & 3) << 28;
        }

        if !exl {
            if delay_slot {
                cop0[cp0::EPC] = pc.wrapping_sub(4);
                cause_reg |= cause::BD;
            } else {
                cop0[cp0::EPC] = pc;
                cause_reg &= !cause::BD;
            }
            cop0[cp0::STATUS] |= status::EXL;
        }
        cop0[cp0::CAUSE] = cause_reg;

        let base = if cop0[cp0::STATUS] & status::BEV != 0 { BOOT_VECTOR_BASE } else { VECTOR_BASE };
        let asid = cop0[cp0::ENTRY_HI] as u8;
        let refill = match exception {
            Exception::TlbLoad(vaddr) | Exception::TlbStore(vaddr) => {
                !exl && self.tlb.find(vaddr, asid).is_none()
            }
            _ => false,
        };

        self.regs.pc = base + if refill { 0 } else { GENERAL_OFFSET };
    }

    /// Reflect the MI lines into Cause.IP2
    pub(crate) fn update_ip2(&mut self) {
        if self.mi_intr & self.mi_mask != 0 {
            self.regs.cop0[cp0::CAUSE] |= cause::IP2;
        } else {
            self.regs.cop0[cp0::CAUSE] &= !cause::IP2;
        }
    }

    /// IE set, EXL and ERL clear, and an unmasked line pending
    pub fn interrupt_pending(&self) -> bool {
        let status_reg = self.regs.cop0[cp0::STATUS];
        (status_reg & (status::IE | status::EXL | status::ERL)) == status::IE
            && (status_reg & self.regs.cop0[cp0::CAUSE] & 0xff00) != 0
    }

    /// Ask for an interrupt check at the next unit boundary.
    pub(crate) fn check_interrupt(&mut self) {
        self.events.cancel(EventKind::Check);
        self.events.schedule_at(EventKind::Check, self.regs.count);
        self.refresh_slice_end();
    }

    /// (Re)schedule the Compare event at the next cycle whose low half equals Compare.
    pub(crate) fn schedule_compare(&mut self) {
        let compare = self.regs.cop0[cp0::COMPARE];
        let distance = compare.wrapping_sub(self.regs.count as u32) as u64;
        self.events.cancel(EventKind::Compare);
        self.events.schedule_at(EventKind::Compare, self.regs.count + distance);
    }

    /// Process every due event, then take the interrupt exception if one is pending.
    pub fn gen_interrupt(&mut self) {
        while let Some(event) = self.events.pop_due(self.regs.count) {
            log::trace!("event {} (due {}, now {})", event.kind, event.trigger, self.regs.count);
            match event.kind {
                EventKind::Compare => {
                    self.regs.cop0[cp0::CAUSE] |= cause::IP7;
                    self.events.schedule_at(EventKind::Compare, event.trigger + (1 << 32));
                }
                EventKind::Check => {}
                kind => {
                    if let Some(line) = kind.mi_line() {
                        self.mi_intr |= line;
                    }
                }
            }
        }
        self.update_ip2();
        if self.interrupt_pending() {
            let pc = self.regs.pc;
            self.take_exception(Exception::Interrupt, pc, false);
        }
    }

    /// Raise MI interrupt lines (see `events::mi`)
    pub fn raise_mi(&mut self, lines: u32) {
        self.mi_intr |= lines;
        self.update_ip2();
        self.check_interrupt();
    }

    pub fn clear_mi(&mut self, lines: u32) {
        self.mi_intr &= !lines;
        self.update_ip2();
        self.check_interrupt();
    }

    pub fn set_mi_mask(&mut self, mask: u32) {
        self.mi_mask = mask & 0x3f;
        self.update_ip2();
        self.check_interrupt();
    }

    /// Schedule a device event `delay` cycles from now
    pub fn schedule_interrupt(&mut self, kind: EventKind, delay: u64) {
        self.events.schedule(kind, self.regs.count, delay);
        self.refresh_slice_end();
    }

    pub fn remove_interrupt(&mut self, kind: EventKind) {
        self.events.cancel(kind);
        self.refresh_slice_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::mi;
    use crate::CoreConfig;

    fn core() -> Core {
        let mut core = Core::new(CoreConfig::default());
        core.regs.cop0[cp0::STATUS] = 0;
        core
    }

    #[test]
    fn syscall_sets_epc_and_vector() {
        let mut core = core();
        core.take_exception(Exception::Syscall, 0x8000_1000, false);
        assert_eq!(core.regs.pc, 0x8000_0180);
        assert_eq!(core.regs.cop0[cp0::EPC], 0x8000_1000);
        assert_eq!(core.regs.cop0[cp0::CAUSE] & cause::EXC_CODE, 8 << 2);
        assert_ne!(core.regs.cop0[cp0::STATUS] & status::EXL, 0);
    }

    #[test]
    fn delay_slot_fault_points_at_branch() {
        let mut core = core();
        core.take_exception(Exception::Breakpoint, 0x8000_1004, true);
        assert_eq!(core.regs.cop0[cp0::EPC], 0x8000_1000);
        assert_ne!(core.regs.cop0[cp0::CAUSE] & cause::BD, 0);
    }

    #[test]
    fn nested_exception_keeps_epc() {
        let mut core = core();
        core.take_exception(Exception::Syscall, 0x8000_1000, false);
        core.take_exception(Exception::Trap, 0x8000_0200, false);
        assert_eq!(core.regs.cop0[cp0::EPC], 0x8000_1000);
        assert_eq!(core.regs.cop0[cp0::CAUSE] & cause::EXC_CODE, 13 << 2);
    }

    #[test]
    fn tlb_refill_uses_offset_zero() {
        let mut core = core();
        core.regs.cop0[cp0::CONTEXT] = 0x0080_0000;
        core.take_exception(Exception::TlbLoad(0x0040_3000), 0x8000_0100, false);
        assert_eq!(core.regs.pc, 0x8000_0000);
        assert_eq!(core.regs.cop0[cp0::BAD_VADDR], 0x0040_3000);
        assert_eq!(core.regs.cop0[cp0::CONTEXT], 0x0080_0000 | ((0x0040_3000 >> 9) & 0x007f_fff0));
        assert_eq!(core.regs.cop0[cp0::ENTRY_HI] & 0xffff_e000, 0x0040_2000);

        // with EXL already set the general vector is used
        core.take_exception(Exception::TlbStore(0x0040_3000), 0x8000_0000, false);
        assert_eq!(core.regs.pc, 0x8000_0180);
    }

    #[test]
    fn boot_vectors_and_cop_unusable() {
        let mut core = core();
        core.regs.cop0[cp0::STATUS] = status::BEV;
        core.take_exception(Exception::CopUnusable(1), 0xbfc0_0010, false);
        assert_eq!(core.regs.pc, 0xbfc0_0380);
        assert_eq!(core.regs.cop0[cp0::CAUSE] & cause::CE, 1 << 28);
    }

    #[test]
    fn mi_lines_drive_ip2() {
        let mut core = core();
        core.regs.cop0[cp0::STATUS] = status::IE | cause::IP2;
        core.set_mi_mask(mi::VI);
        core.raise_mi(mi::SP);
        core.gen_interrupt();
        assert_eq!(core.regs.cop0[cp0::CAUSE] & cause::IP2, 0);
        assert_eq!(core.regs.pc, crate::regfile::RESET_PC);

        core.raise_mi(mi::VI);
        let pc = core.regs.pc;
        core.gen_interrupt();
        assert_ne!(core.regs.cop0[cp0::CAUSE] & cause::IP2, 0);
        assert_eq!(core.regs.cop0[cp0::EPC], pc);
        assert_eq!(core.regs.pc, 0x8000_0180);
        assert_eq!(core.regs.cop0[cp0::CAUSE] & cause::EXC_CODE, 0);
    }

    #[test]
    fn mi_changes_end_the_slice() {
        let mut core = core();
        core.begin_run(1000);
        assert_eq!(core.regs.slice_end, 1000);
        core.set_mi_mask(0x3f);
        assert_eq!(core.regs.slice_end, 0);
        core.gen_interrupt();
        core.regs.count = 40;
        core.raise_mi(mi::SP);
        assert_eq!(core.regs.slice_end, 40);
        core.gen_interrupt();
        core.regs.count = 80;
        core.clear_mi(mi::SP);
        assert_eq!(core.regs.slice_end, 80);
    }

    #[test]
    fn device_events_raise_lines() {
        let mut core = core();
        core.schedule_interrupt(EventKind::Ai, 10);
        core.regs.count = 9;
        core.gen_interrupt();
        assert_eq!(core.mi_intr, 0);
        core.regs.count = 10;
        core.gen_interrupt();
        assert_eq!(core.mi_intr, mi::AI);
        // masked, so nothing was taken
        assert_eq!(core.regs.pc, crate::regfile::RESET_PC);
    }

    #[test]
    fn compare_fires_and_reschedules() {
        let mut core = core();
        core.regs.cop0[cp0::COMPARE] = 100;
        core.schedule_compare();
        assert_eq!(core.events.trigger_of(EventKind::Compare), Some(100));
        core.regs.count = 102;
        core.gen_interrupt();
        assert_ne!(core.regs.cop0[cp0::CAUSE] & cause::IP7, 0);
        assert_eq!(core.events.trigger_of(EventKind::Compare), Some(100 + (1 << 32)));
    }
}
