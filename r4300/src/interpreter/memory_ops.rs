use common::util::{sign_extend32, ByteMask8};

use crate::exception::{Exception, Fault};
use crate::instructions::{Instruction, Opcode};
use crate::regfile::cp0;
use crate::tlb::{Access, Miss};
use crate::{Core, CoreError};

impl Core {
    pub(crate) fn translate_or_fault(&self, vaddr: u32, access: Access) -> Result<u32, Exception> {
        self.tlb.translate(vaddr, access).map_err(|miss| match (miss, access) {
            (Miss::Modification, _) => Exception::TlbModification(vaddr),
            (Miss::Invalid, Access::Write) => Exception::TlbStore(vaddr),
            (Miss::Invalid, _) => Exception::TlbLoad(vaddr),
        })
    }

    /// Instruction fetch through the TLB. Fetching from an address with nothing behind it
    /// is fatal.
    pub(crate) fn fetch(&self, pc: u32) -> Result<u32, Fault> {
        if pc & 3 != 0 {
            return Err(Exception::AddressLoad(pc).into());
        }
        let paddr = self.translate_or_fault(pc, Access::Fetch)?;
        self.memory.fetch(paddr)
            .ok_or_else(|| CoreError::UnmappedFetch { pc, paddr }.into())
    }

    fn data_address(&self, vaddr: u32, size: u32, access: Access) -> Result<u32, Exception> {
        if vaddr & (size - 1) != 0 {
            return Err(match access {
                Access::Write => Exception::AddressStore(vaddr),
                _ => Exception::AddressLoad(vaddr),
            });
        }
        self.translate_or_fault(vaddr, access)
    }

    fn load(&mut self, vaddr: u32, size: u32) -> Result<u64, Exception> {
        let paddr = self.data_address(vaddr, size, Access::Read)?;
        Ok(self.memory.read(paddr, size as usize))
    }

    fn store(&mut self, vaddr: u32, size: u32, value: u64) -> Result<(), Exception> {
        let paddr = self.data_address(vaddr, size, Access::Write)?;
        self.store_physical(paddr, size, value);
        Ok(())
    }

    fn store_physical(&mut self, paddr: u32, size: u32, value: u64) {
        self.memory.write(paddr, size as usize, value);
        if self.code_pages.touch(paddr) {
            log::trace!("store to translated code at {:08x}", paddr);
            self.regs.exit_request = 1;
        }
    }

    /// Read-modify-write of the aligned unit around `vaddr`, for the unaligned stores
    fn store_merged(&mut self, vaddr: u32, size: u32, merge: impl FnOnce(u64) -> u64) -> Result<(), Exception> {
        let paddr = self.data_address(vaddr & !(size - 1), size, Access::Write)?;
        let old = self.memory.read(paddr, size as usize);
        self.store_physical(paddr, size, merge(old));
        Ok(())
    }

    /// Loads and stores, including the COP1 transfers. The address is always the low 32 bits
    /// of rs plus the sign extended offset.
    pub(crate) fn memory_op(&mut self, inst: Instruction) -> Result<(), Fault> {
        use Opcode::*;

        let vaddr = (self.regs.gpr(inst.rs()) as u32).wrapping_add(inst.simm() as u32);
        let rt = inst.rt();
        let rt_val = self.regs.gpr(rt);
        // lane offset within the aligned word or doubleword
        let a = vaddr & 3;
        let a8 = vaddr & 7;

        match inst.op {
            Lb => {
                let val = self.load(vaddr, 1)?;
                self.regs.set_gpr(rt, val as u8 as i8 as u64);
            }
            Lbu => {
                let val = self.load(vaddr, 1)?;
                self.regs.set_gpr(rt, val);
            }
            Lh => {
                let val = self.load(vaddr, 2)?;
                self.regs.set_gpr(rt, val as u16 as i16 as u64);
            }
            Lhu => {
                let val = self.load(vaddr, 2)?;
                self.regs.set_gpr(rt, val);
            }
            Lw => {
                let val = self.load(vaddr, 4)?;
                self.regs.set_gpr32(rt, val as u32);
            }
            Lwu => {
                let val = self.load(vaddr, 4)?;
                self.regs.set_gpr(rt, val);
            }
            Ld => {
                let val = self.load(vaddr, 8)?;
                self.regs.set_gpr(rt, val);
            }
            Lwl => {
                let word = self.load(vaddr & !3, 4)?;
                let mask = ByteMask8::new(4 - a, 0u32);
                let merged = mask.merge(rt_val << 32, (word << 32) << (8 * a));
                self.regs.set_gpr32(rt, (merged >> 32) as u32);
            }
            Lwr => {
                let word = self.load(vaddr & !3, 4)?;
                let mask = ByteMask8::new(a + 1, 3 - a);
                let merged = ((mask.merge(rt_val << 32, (word << 32) >> (8 * (3 - a)))) >> 32) as u32;
                if a == 3 {
                    self.regs.set_gpr32(rt, merged);
                } else {
                    // the upper half of rt survives a partial LWR
                    self.regs.set_gpr(rt, (rt_val & !0xffff_ffff) | merged as u64);
                }
            }
            Ldl => {
                let dword = self.load(vaddr & !7, 8)?;
                let mask = ByteMask8::high(8 - a8);
                self.regs.set_gpr(rt, mask.merge(rt_val, dword << (8 * a8)));
            }
            Ldr => {
                let dword = self.load(vaddr & !7, 8)?;
                let mask = ByteMask8::low(a8 + 1);
                self.regs.set_gpr(rt, mask.merge(rt_val, dword >> (8 * (7 - a8))));
            }
            Ll | Lld => {
                let size = if inst.op == Ll { 4 } else { 8 };
                let paddr = self.data_address(vaddr, size, Access::Read)?;
                let val = self.memory.read(paddr, size as usize);
                self.regs.set_gpr(rt, if size == 4 { sign_extend32(val) } else { val });
                self.regs.llbit = 1;
                self.regs.cop0[cp0::LL_ADDR] = paddr >> 4;
            }
            Sb => self.store(vaddr, 1, rt_val)?,
            Sh => self.store(vaddr, 2, rt_val)?,
            Sw => self.store(vaddr, 4, rt_val)?,
            Sd => self.store(vaddr, 8, rt_val)?,
            Swl => {
                let mask = ByteMask8::new(4 - a, a);
                let value = ((rt_val as u32 as u64) << 32) >> (8 * a);
                self.store_merged(vaddr, 4, |old| mask.merge(old << 32, value) >> 32)?;
            }
            Swr => {
                let mask = ByteMask8::new(a + 1, 0u32);
                let value = ((rt_val as u32 as u64) << 32) << (8 * (3 - a));
                self.store_merged(vaddr, 4, |old| mask.merge(old << 32, value) >> 32)?;
            }
            Sdl => {
                let mask = ByteMask8::low(8 - a8);
                let value = rt_val >> (8 * a8);
                self.store_merged(vaddr, 8, |old| mask.merge(old, value))?;
            }
            Sdr => {
                let mask = ByteMask8::high(a8 + 1);
                let value = rt_val << (8 * (7 - a8));
                self.store_merged(vaddr, 8, |old| mask.merge(old, value))?;
            }
            Sc | Scd => {
                let size = if inst.op == Sc { 4 } else { 8 };
                if self.regs.llbit != 0 {
                    self.store(vaddr, size, rt_val)?;
                    self.regs.set_gpr(rt, 1);
                } else {
                    self.regs.set_gpr(rt, 0);
                }
                self.regs.llbit = 0;
            }
            Lwc1 => {
                self.cop1_usable()?;
                let val = self.load(vaddr, 4)?;
                self.regs.set_fpr_s(inst.ft(), val as u32);
            }
            Ldc1 => {
                self.cop1_usable()?;
                let val = self.load(vaddr, 8)?;
                self.regs.set_fpr_d(inst.ft(), val);
            }
            Swc1 => {
                self.cop1_usable()?;
                let val = self.regs.fpr_s(inst.ft());
                self.store(vaddr, 4, val as u64)?;
            }
            Sdc1 => {
                self.cop1_usable()?;
                let val = self.regs.fpr_d(inst.ft());
                self.store(vaddr, 8, val)?;
            }
            _ => {
                log::warn!("{} is not a memory operation", inst.name());
                return Err(Exception::ReservedInstruction.into());
            }
        }
        Ok(())
    }
}
