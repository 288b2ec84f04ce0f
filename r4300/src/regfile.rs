use common::util::sign_extend32;

use crate::instructions::MIPS_REG_NAMES;

pub const COP0_REG_NAMES: [&'static str; 32] = [
    "Index",
    "Random",
    "EntryLo0",
    "EntryLo1",
    "Context",
    "PageMask",
    "Wired",
    "unk7",
    "BadVAddr",
    "Count",
    "EntryHi",
    "Compare",
    "Status",
    "Cause",
    "EPC", // Exception Program Counter
    "PRId", // Processor ID
    "Config",
    "LLAddr",
    "WatchLo",
    "WatchHi",
    "XContext",
    "unk21",
    "unk22",
    "unk23",
    "unk24",
    "unk25",
    "Parity Error",
    "Cache Error",
    "TagLo",
    "TagHi",
    "ErrorEPC",
    "unk31"
];

/// COP0 register numbers
pub mod cp0 {
    pub const INDEX: usize = 0;
    pub const RANDOM: usize = 1;
    pub const ENTRY_LO0: usize = 2;
    pub const ENTRY_LO1: usize = 3;
    pub const CONTEXT: usize = 4;
    pub const PAGE_MASK: usize = 5;
    pub const WIRED: usize = 6;
    pub const BAD_VADDR: usize = 8;
    pub const COUNT: usize = 9;
    pub const ENTRY_HI: usize = 10;
    pub const COMPARE: usize = 11;
    pub const STATUS: usize = 12;
    pub const CAUSE: usize = 13;
    pub const EPC: usize = 14;
    pub const PRID: usize = 15;
    pub const CONFIG: usize = 16;
    pub const LL_ADDR: usize = 17;
    pub const WATCH_LO: usize = 18;
    pub const WATCH_HI: usize = 19;
    pub const CACHE_ERR: usize = 27;
    pub const TAG_LO: usize = 28;
    pub const TAG_HI: usize = 29;
    pub const ERROR_EPC: usize = 30;
}

pub mod status {
    pub const IE: u32 = 1 << 0;
    pub const EXL: u32 = 1 << 1;
    pub const ERL: u32 = 1 << 2;
    pub const BEV: u32 = 1 << 22;
    pub const FR: u32 = 1 << 26;
    pub const CU1: u32 = 1 << 29;
}

pub mod cause {
    pub const EXC_CODE: u32 = 0x7c;
    pub const IP0_IP1: u32 = 0x300;
    pub const IP2: u32 = 0x400;
    pub const IP7: u32 = 0x8000;
    pub const CE: u32 = 0x3000_0000;
    pub const BD: u32 = 0x8000_0000;
}

/// FCR31 fields
pub mod fcr31 {
    pub const ROUNDING_MODE: u32 = 0x3;
    pub const CONDITION: u32 = 1 << 23;

    pub const UNDERFLOW: u32 = 1 << 1;
    pub const OVERFLOW: u32 = 1 << 2;
    pub const INVALID: u32 = 1 << 4;

    pub const FLAG_SHIFT: u32 = 2;
    pub const ENABLE_SHIFT: u32 = 7;
    pub const CAUSE_SHIFT: u32 = 12;
    pub const CAUSE_MASK: u32 = 0x3f << CAUSE_SHIFT;
}

/// The architectural state of the processor.
///
/// Field order is the snapshot layout. Everything after `count` is bookkeeping shared with
/// translated code, which addresses these fields by offset.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegFile {
    pub llbit: u32,
    pub gpr: [u64; 32],
    pub cop0: [u32; 32],
    pub lo: u64,
    pub hi: u64,
    pub fgr: [u64; 32],
    pub fcr0: u32,
    pub fcr31: u32,
    pub pc: u32,
    /// Free running cycle counter, COP0 Count is the low half
    pub count: u64,

    pub slice_end: u64,
    pub jump_target: u32,
    pub branch_taken: u8,
    pub exit_request: u8,
    pub interp_request: u8,
}

pub const RESET_PC: u32 = 0xbfc0_0000;

impl Default for RegFile {
    fn default() -> Self {
        let mut cop0 = [0; 32];
        cop0[cp0::RANDOM] = 31;
        cop0[cp0::STATUS] = status::CU1 | (1 << 28) | status::FR;
        cop0[cp0::PRID] = 0x0b22;
        cop0[cp0::CONFIG] = 0x0006_e463;
        RegFile {
            llbit: 0,
            gpr: [0; 32],
            cop0,
            lo: 0,
            hi: 0,
            fgr: [0; 32],
            fcr0: 0x511,
            fcr31: 0,
            pc: RESET_PC,
            count: 0,
            slice_end: u64::MAX,
            jump_target: 0,
            branch_taken: 0,
            exit_request: 0,
            interp_request: 0,
        }
    }
}

impl RegFile {
    #[inline(always)]
    pub fn gpr(&self, reg: usize) -> u64 {
        self.gpr[reg]
    }

    #[inline(always)]
    pub fn set_gpr(&mut self, reg: usize, val: u64) {
        if reg != 0 {
            self.gpr[reg] = val;
        }
    }

    /// Commit a logically 32 bit result
    #[inline(always)]
    pub fn set_gpr32(&mut self, reg: usize, val: u32) {
        self.set_gpr(reg, sign_extend32(val as u64));
    }

    #[inline(always)]
    fn fr(&self) -> bool {
        self.cop0[cp0::STATUS] & status::FR != 0
    }

    /// Single precision view of an FPR
    pub fn fpr_s(&self, n: usize) -> u32 {
        if self.fr() {
            self.fgr[n] as u32
        } else {
            (self.fgr[n & !1] >> ((n & 1) * 32)) as u32
        }
    }

    pub fn set_fpr_s(&mut self, n: usize, val: u32) {
        if self.fr() {
            self.fgr[n] = (self.fgr[n] & !0xffff_ffff) | val as u64;
        } else {
            let shift = (n & 1) * 32;
            let slot = &mut self.fgr[n & !1];
            *slot = (*slot & !(0xffff_ffff << shift)) | ((val as u64) << shift);
        }
    }

    /// Double precision (or 64 bit integer) view of an FPR
    pub fn fpr_d(&self, n: usize) -> u64 {
        if self.fr() {
            self.fgr[n]
        } else {
            self.fgr[n & !1]
        }
    }

    pub fn set_fpr_d(&mut self, n: usize, val: u64) {
        if self.fr() {
            self.fgr[n] = val;
        } else {
            self.fgr[n & !1] = val;
        }
    }

    /// Copy the low half of the counter into the COP0 array, for snapshots
    pub fn sync_count(&mut self) {
        self.cop0[cp0::COUNT] = self.count as u32;
    }

    /// Multi-line register dump, used by the runner
    pub fn dump(&self) -> String {
        let mut out = format!("pc: {:08x}  count: {}  hi: {:016x}  lo: {:016x}\n",
            self.pc, self.count, self.hi, self.lo);
        for (i, chunk) in self.gpr.chunks(4).enumerate() {
            for (j, val) in chunk.iter().enumerate() {
                out += &format!("{:>5}: {:016x}  ", MIPS_REG_NAMES[i * 4 + j], val);
            }
            out.push('\n');
        }
        for reg in [cp0::STATUS, cp0::CAUSE, cp0::EPC, cp0::BAD_VADDR] {
            out += &format!("{}: {:08x}  ", COP0_REG_NAMES[reg], self.cop0[reg]);
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_discards_writes() {
        let mut regs = RegFile::default();
        regs.set_gpr(0, 0x1234);
        regs.set_gpr32(1, 0x8000_0000);
        assert_eq!(regs.gpr(0), 0);
        assert_eq!(regs.gpr(1), 0xffff_ffff_8000_0000);
        regs.set_gpr32(2, 0x7fff_ffff);
        assert_eq!(regs.gpr(2), 0x7fff_ffff);
    }

    #[test]
    fn fpr_views_without_fr() {
        let mut regs = RegFile::default();
        regs.cop0[cp0::STATUS] &= !status::FR;
        regs.set_fpr_s(2, 0x1111_1111);
        regs.set_fpr_s(3, 0x2222_2222);
        assert_eq!(regs.fgr[2], 0x2222_2222_1111_1111);
        assert_eq!(regs.fpr_d(3), 0x2222_2222_1111_1111);
        assert_eq!(regs.fpr_s(3), 0x2222_2222);
        regs.set_fpr_d(4, 0xdead_beef_0000_0001);
        assert_eq!(regs.fpr_s(5), 0xdead_beef);
    }

    #[test]
    fn fpr_views_with_fr() {
        let mut regs = RegFile::default();
        regs.cop0[cp0::STATUS] |= status::FR;
        regs.set_fpr_s(3, 0x2222_2222);
        assert_eq!(regs.fgr[3], 0x2222_2222);
        assert_eq!(regs.fgr[2], 0);
        regs.set_fpr_d(3, 7);
        assert_eq!(regs.fpr_d(3), 7);
    }

    #[test]
    fn snapshot_layout_starts_with_llbit() {
        assert_eq!(std::mem::offset_of!(RegFile, llbit), 0);
        assert_eq!(std::mem::offset_of!(RegFile, gpr), 8);
        assert!(std::mem::offset_of!(RegFile, cop0) < std::mem::offset_of!(RegFile, lo));
        assert!(std::mem::offset_of!(RegFile, pc) < std::mem::offset_of!(RegFile, count));
    }
}
