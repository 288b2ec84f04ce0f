use std::fmt;

use modular_bitfield::{bitfield, specifiers::*};
use crate::regfile::COP0_REG_NAMES;

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct IType {
    pub imm: B16,
    pub rt: B5,
    pub rs: B5,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct JType {
    pub target: B26,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct RType {
    pub funct: B6,
    pub sa: B5,
    pub rd: B5,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

/// COP1 arithmetic layout, the same bits as RType under FPU names
#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct FType {
    pub funct: B6,
    pub fd: B5,
    pub fs: B5,
    pub ft: B5,
    pub fmt: B5,
    #[skip]
    op: B6,
}

impl From<u32> for RType {
    fn from(word: u32) -> Self {
        RType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for IType {
    fn from(word: u32) -> Self {
        IType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for JType {
    fn from(word: u32) -> Self {
        JType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for FType {
    fn from(word: u32) -> Self {
        FType::from_bytes(word.to_le_bytes())
    }
}

impl From<RType> for u32 {
    fn from(r: RType) -> u32 {
        u32::from_le_bytes(r.into_bytes())
    }
}
impl From<IType> for u32 {
    fn from(i: IType) -> u32 {
        u32::from_le_bytes(i.into_bytes())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FloatFmt {
    S,
    D,
    W,
    L,
}

impl FloatFmt {
    fn suffix(self) -> &'static str {
        match self {
            FloatFmt::S => "S",
            FloatFmt::D => "D",
            FloatFmt::W => "W",
            FloatFmt::L => "L",
        }
    }
}

/// Every operation the core knows how to execute.
///
/// `Reserved` is the sentinel for encodings with no meaning on this processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Opcode {
    // primary
    J, Jal, Beq, Bne, Blez, Bgtz,
    Addi, Addiu, Slti, Sltiu, Andi, Ori, Xori, Lui,
    Beql, Bnel, Blezl, Bgtzl, Daddi, Daddiu, Ldl, Ldr,
    Lb, Lh, Lwl, Lw, Lbu, Lhu, Lwr, Lwu,
    Sb, Sh, Swl, Sw, Sdl, Sdr, Swr, Cache,
    Ll, Lwc1, Lld, Ldc1, Ld, Sc, Swc1, Scd, Sdc1, Sd,
    // SPECIAL
    Sll, Srl, Sra, Sllv, Srlv, Srav, Jr, Jalr, Syscall, Break, Sync,
    Mfhi, Mthi, Mflo, Mtlo, Dsllv, Dsrlv, Dsrav,
    Mult, Multu, Div, Divu, Dmult, Dmultu, Ddiv, Ddivu,
    Add, Addu, Sub, Subu, And, Or, Xor, Nor, Slt, Sltu,
    Dadd, Daddu, Dsub, Dsubu,
    Tge, Tgeu, Tlt, Tltu, Teq, Tne,
    Dsll, Dsrl, Dsra, Dsll32, Dsrl32, Dsra32,
    // REGIMM
    Bltz, Bgez, Bltzl, Bgezl,
    Tgei, Tgeiu, Tlti, Tltiu, Teqi, Tnei,
    Bltzal, Bgezal, Bltzall, Bgezall,
    // COP0
    Mfc0, Dmfc0, Mtc0, Dmtc0, Tlbr, Tlbwi, Tlbwr, Tlbp, Eret,
    // COP1
    Mfc1, Dmfc1, Cfc1, Mtc1, Dmtc1, Ctc1,
    Bc1f, Bc1t, Bc1fl, Bc1tl,
    FAdd(FloatFmt), FSub(FloatFmt), FMul(FloatFmt), FDiv(FloatFmt),
    FSqrt(FloatFmt), FAbs(FloatFmt), FMov(FloatFmt), FNeg(FloatFmt),
    RoundL(FloatFmt), TruncL(FloatFmt), CeilL(FloatFmt), FloorL(FloatFmt),
    RoundW(FloatFmt), TruncW(FloatFmt), CeilW(FloatFmt), FloorW(FloatFmt),
    CvtS(FloatFmt), CvtD(FloatFmt), CvtW(FloatFmt), CvtL(FloatFmt),
    /// C.cond.fmt, with the 4 bit condition from the function field
    FCompare(FloatFmt, u8),

    Reserved,
}

/// Addressing mode of a decoded instruction
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Form {
    /// rs/rt with a 16 bit immediate: ALU immediates, loads, stores, branches
    Immediate,
    /// 26 bit absolute jump
    Jump,
    /// rs/rt/rd/sa, also COP moves and FPU arithmetic
    Register,
    FloatLoadStore,
    FloatCompare,
}

pub const MIPS_REG_NAMES: [&'static str; 32] = [
    "$zero", // Always 0
    "$at",   // r1 - Reserved for assembler
    "$v0", "$v1", // r2-r3 - Function return values
    "$a0", "$a1", "$a2", "$a3", // r4-r7 - function arguments
    "$t0", "$t1", "$t2", "$t3", "$t4", "$t5", "$t6",
    "$t7", // r8-r15 - Temporaries (Caller saved)
    "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7", // r16-r23 - Saved  (Callee saved)
    "$t8", "$t9", // r24-r25 - Caller-saved temporaries
    "$k0", "$k1", // Reserved for OS kernel
    "$gp", // r28 - Global pointer
    "$sp", // r29 - Stack pointer
    "$fp", // r30 - Frame pointer
    "$ra", // r31 - Return address
];

pub const FPU_COND_NAMES: [&'static str; 16] = [
    "F", "UN", "EQ", "UEQ", "OLT", "ULT", "OLE", "ULE",
    "SF", "NGLE", "SEQ", "NGL", "LT", "NGE", "LE", "NGT",
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub word: u32,
    pub op: Opcode,
    pub form: Form,
    name: &'static str,
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline(always)]
    pub fn rs(&self) -> usize {
        RType::from(self.word).rs() as usize
    }
    #[inline(always)]
    pub fn rt(&self) -> usize {
        RType::from(self.word).rt() as usize
    }
    #[inline(always)]
    pub fn rd(&self) -> usize {
        RType::from(self.word).rd() as usize
    }
    #[inline(always)]
    pub fn sa(&self) -> u32 {
        RType::from(self.word).sa() as u32
    }
    #[inline(always)]
    pub fn funct(&self) -> u8 {
        RType::from(self.word).funct()
    }
    /// Raw 16 bit immediate (zero extended)
    #[inline(always)]
    pub fn imm(&self) -> u16 {
        IType::from(self.word).imm()
    }
    /// Sign extended 16 bit immediate
    #[inline(always)]
    pub fn simm(&self) -> i64 {
        self.imm() as i16 as i64
    }
    #[inline(always)]
    pub fn target(&self) -> u32 {
        JType::from(self.word).target()
    }
    #[inline(always)]
    pub fn fs(&self) -> usize {
        FType::from(self.word).fs() as usize
    }
    #[inline(always)]
    pub fn ft(&self) -> usize {
        FType::from(self.word).ft() as usize
    }
    #[inline(always)]
    pub fn fd(&self) -> usize {
        FType::from(self.word).fd() as usize
    }
    /// Raw COP1 format field (16 = S, 17 = D, 20 = W, 21 = L)
    #[inline(always)]
    pub fn fmt(&self) -> u8 {
        FType::from(self.word).fmt()
    }
    /// Compare condition of C.cond.fmt, the low 4 bits of funct
    #[inline(always)]
    pub fn cond(&self) -> u8 {
        self.funct() & 0xf
    }

    /// True for every instruction that owns a delay slot
    pub fn is_branch(&self) -> bool {
        use Opcode::*;
        matches!(self.op,
            J | Jal | Jr | Jalr
            | Beq | Bne | Blez | Bgtz | Beql | Bnel | Blezl | Bgtzl
            | Bltz | Bgez | Bltzl | Bgezl | Bltzal | Bgezal | Bltzall | Bgezall
            | Bc1f | Bc1t | Bc1fl | Bc1tl)
    }

    pub fn is_likely(&self) -> bool {
        use Opcode::*;
        matches!(self.op, Beql | Bnel | Blezl | Bgtzl | Bltzl | Bgezl | Bltzall | Bgezall | Bc1fl | Bc1tl)
    }

    /// Statically known destination of a branch or absolute jump at `pc`
    pub fn branch_target(&self, pc: u32) -> Option<u32> {
        use Opcode::*;
        match self.op {
            J | Jal => Some((pc.wrapping_add(4) & 0xf000_0000) | (self.target() << 2)),
            Jr | Jalr => None,
            _ if self.is_branch() => {
                Some(pc.wrapping_add(4).wrapping_add((self.simm() << 2) as u32))
            }
            _ => None,
        }
    }

    /// Provides a string representation of the instruction (as disassembly)
    pub fn disassemble(&self, pc: u32) -> String {
        use Opcode::*;
        let gpr = |r: usize| MIPS_REG_NAMES[r];
        let r = RType::from(self.word);
        let (rs, rt, rd) = (gpr(r.rs() as usize), gpr(r.rt() as usize), gpr(r.rd() as usize));
        let args = match self.op {
            Reserved => return format!("{:<7} {:#010x}", "???", self.word),
            Syscall | Break | Sync | Eret | Tlbr | Tlbwi | Tlbwr | Tlbp => String::new(),
            J | Jal => format!("{:#010x}", self.branch_target(pc).unwrap_or_default()),
            Jr => rs.to_owned(),
            Jalr => format!("{}, {}", rd, rs),
            Beq | Bne | Beql | Bnel => {
                format!("{}, {}, {:#010x}", rs, rt, self.branch_target(pc).unwrap_or_default())
            }
            Bc1f | Bc1t | Bc1fl | Bc1tl => {
                format!("{:#010x}", self.branch_target(pc).unwrap_or_default())
            }
            _ if self.is_branch() => {
                format!("{}, {:#010x}", rs, self.branch_target(pc).unwrap_or_default())
            }
            Lui => format!("{}, {:#x}", rt, self.imm()),
            Andi | Ori | Xori => format!("{}, {}, {:#x}", rt, rs, self.imm()),
            Addi | Addiu | Slti | Sltiu | Daddi | Daddiu => {
                format!("{}, {}, {}", rt, rs, self.simm())
            }
            Tgei | Tgeiu | Tlti | Tltiu | Teqi | Tnei => format!("{}, {}", rs, self.simm()),
            Lwc1 | Ldc1 | Swc1 | Sdc1 => format!("f{}, {}({})", r.rt(), self.simm(), rs),
            Cache => format!("{:#04x}, {}({})", r.rt(), self.simm(), rs),
            _ if self.form == Form::Immediate => format!("{}, {}({})", rt, self.simm(), rs),
            Sll | Srl | Sra | Dsll | Dsrl | Dsra | Dsll32 | Dsrl32 | Dsra32 => {
                format!("{}, {}, {}", rd, rt, r.sa())
            }
            Sllv | Srlv | Srav | Dsllv | Dsrlv | Dsrav => format!("{}, {}, {}", rd, rt, rs),
            Mfhi | Mflo => rd.to_owned(),
            Mthi | Mtlo => rs.to_owned(),
            Mult | Multu | Div | Divu | Dmult | Dmultu | Ddiv | Ddivu
            | Tge | Tgeu | Tlt | Tltu | Teq | Tne => format!("{}, {}", rs, rt),
            Mfc0 | Dmfc0 | Mtc0 | Dmtc0 => format!("{}, {}", rt, COP0_REG_NAMES[r.rd() as usize]),
            Mfc1 | Dmfc1 | Mtc1 | Dmtc1 => format!("{}, f{}", rt, r.rd()),
            Cfc1 | Ctc1 => format!("{}, fcr{}", rt, r.rd()),
            FCompare(fmt, cond) => {
                return format!("C.{}.{:<3} f{}, f{}",
                    FPU_COND_NAMES[cond as usize], fmt.suffix(), self.fs(), self.ft());
            }
            FAdd(fmt) | FSub(fmt) | FMul(fmt) | FDiv(fmt) => {
                return format!("{:<7} f{}, f{}, f{}",
                    format!("{}.{}", self.name, fmt.suffix()), self.fd(), self.fs(), self.ft());
            }
            FSqrt(fmt) | FAbs(fmt) | FMov(fmt) | FNeg(fmt)
            | RoundL(fmt) | TruncL(fmt) | CeilL(fmt) | FloorL(fmt)
            | RoundW(fmt) | TruncW(fmt) | CeilW(fmt) | FloorW(fmt)
            | CvtS(fmt) | CvtD(fmt) | CvtW(fmt) | CvtL(fmt) => {
                return format!("{:<7} f{}, f{}",
                    format!("{}.{}", self.name, fmt.suffix()), self.fd(), self.fs());
            }
            _ => format!("{}, {}, {}", rd, rs, rt),
        };
        if args.is_empty() {
            self.name.to_owned()
        } else {
            format!("{:<7} {}", self.name, args)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble(0))
    }
}

#[derive(Debug, Clone, Copy)]
enum InstructionInfo {
    Reserved,
    Special,
    RegImm,
    Cop0,
    Cop0Fn,
    Cop1,
    Cop1Bc,
    Cop1Fmt(FloatFmt),
    Op(&'static str, Opcode, Form),
}

/// Decode a single instruction word. Never fails; unknown encodings come back as
/// `Opcode::Reserved`.
pub fn decode(word: u32) -> Instruction {
    // we pre-decode to R-Type, as it's the only type decode logic uses
    let inst = RType::from(word);

    let mut info = &PRIMARY_TABLE[inst.op() as usize];
    loop {
        match info {
            InstructionInfo::Special => {
                info = &SPECIAL_TABLE[inst.funct() as usize];
            }
            InstructionInfo::RegImm => {
                info = &REGIMM_TABLE[inst.rt() as usize];
            }
            InstructionInfo::Cop0 => {
                if inst.rs() < 16 {
                    info = &COP0_TABLE[inst.rs() as usize];
                } else {
                    info = &COP0_FN_TABLE[inst.funct() as usize];
                }
            }
            InstructionInfo::Cop0Fn => {
                info = &COP0_FN_TABLE[inst.funct() as usize];
            }
            InstructionInfo::Cop1 => {
                info = &COP1_TABLE[inst.rs() as usize];
            }
            InstructionInfo::Cop1Bc => {
                info = &COP1_BC_TABLE[(inst.rt() & 3) as usize];
            }
            InstructionInfo::Cop1Fmt(fmt) => {
                let table = match fmt {
                    FloatFmt::S => &COP1_S_TABLE,
                    FloatFmt::D => &COP1_D_TABLE,
                    FloatFmt::W => &COP1_W_TABLE,
                    FloatFmt::L => &COP1_L_TABLE,
                };
                info = &table[inst.funct() as usize];
            }
            InstructionInfo::Op(name, op, form) => {
                return Instruction { word, op: *op, form: *form, name: *name };
            }
            InstructionInfo::Reserved => {
                return Instruction { word, op: Opcode::Reserved, form: Form::Register, name: "Reserved" };
            }
        }
    }
}

const fn build_primary_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use Opcode::*;
    use Form::*;

    // Almost everything in the primary table is IType.
    // The exceptions are the:
    //  - the two subtables. All RegImm are IType, all Special are RType
    //  - the COP ops, which are a mix of IType and RType
    //  = J and JAL which are JType.

    [
        Special,
        RegImm,
        Op("J", J, Jump),
        Op("JAL", Jal, Jump),
        Op("BEQ", Beq, Immediate),
        Op("BNE", Bne, Immediate),
        Op("BLEZ", Blez, Immediate),
        Op("BGTZ", Bgtz, Immediate),
        // 1
        Op("ADDI", Addi, Immediate),
        Op("ADDIU", Addiu, Immediate),
        Op("SLTI", Slti, Immediate),
        Op("SLTIU", Sltiu, Immediate),
        Op("ANDI", Andi, Immediate),
        Op("ORI", Ori, Immediate),
        Op("XORI", Xori, Immediate),
        Op("LUI", Lui, Immediate),
        // 2
        Cop0,
        Cop1,
        InstructionInfo::Reserved, // COP2 is not present
        InstructionInfo::Reserved,
        Op("BEQL", Beql, Immediate),
        Op("BNEL", Bnel, Immediate),
        Op("BLEZL", Blezl, Immediate),
        Op("BGTZL", Bgtzl, Immediate),
        // 3
        Op("DADDI", Daddi, Immediate),
        Op("DADDIU", Daddiu, Immediate),
        Op("LDL", Ldl, Immediate),
        Op("LDR", Ldr, Immediate),
        InstructionInfo::Reserved,
        InstructionInfo::Reserved,
        InstructionInfo::Reserved,
        InstructionInfo::Reserved,
        // 4
        Op("LB", Lb, Immediate),
        Op("LH", Lh, Immediate),
        Op("LWL", Lwl, Immediate),
        Op("LW", Lw, Immediate),
        Op("LBU", Lbu, Immediate),
        Op("LHU", Lhu, Immediate),
        Op("LWR", Lwr, Immediate),
        Op("LWU", Lwu, Immediate),
        // 5
        Op("SB", Sb, Immediate),
        Op("SH", Sh, Immediate),
        Op("SWL", Swl, Immediate),
        Op("SW", Sw, Immediate),
        Op("SDL", Sdl, Immediate),
        Op("SDR", Sdr, Immediate),
        Op("SWR", Swr, Immediate),
        Op("CACHE", Cache, Immediate),
        // 6
        Op("LL", Ll, Immediate),
        Op("LWC1", Lwc1, FloatLoadStore),
        InstructionInfo::Reserved,
        InstructionInfo::Reserved,
        Op("LLD", Lld, Immediate),
        Op("LDC1", Ldc1, FloatLoadStore),
        InstructionInfo::Reserved,
        Op("LD", Ld, Immediate),
        // 7
        Op("SC", Sc, Immediate),
        Op("SWC1", Swc1, FloatLoadStore),
        InstructionInfo::Reserved,
        InstructionInfo::Reserved,
        Op("SCD", Scd, Immediate),
        Op("SDC1", Sdc1, FloatLoadStore),
        InstructionInfo::Reserved,
        Op("SD", Sd, Immediate),
    ]
}

const fn build_special_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use Opcode::*;
    use Form::*;
    const R: InstructionInfo = InstructionInfo::Reserved;

    [
        // 0
        Op("SLL", Sll, Register),
        R,
        Op("SRL", Srl, Register),
        Op("SRA", Sra, Register),
        Op("SLLV", Sllv, Register),
        R,
        Op("SRLV", Srlv, Register),
        Op("SRAV", Srav, Register),
        // 1
        Op("JR", Jr, Register),
        Op("JALR", Jalr, Register),
        R,
        R,
        Op("SYSCALL", Syscall, Register),
        Op("BREAK", Break, Register),
        R,
        Op("SYNC", Sync, Register),
        // 2
        Op("MFHI", Mfhi, Register),
        Op("MTHI", Mthi, Register),
        Op("MFLO", Mflo, Register),
        Op("MTLO", Mtlo, Register),
        Op("DSLLV", Dsllv, Register),
        R,
        Op("DSRLV", Dsrlv, Register),
        Op("DSRAV", Dsrav, Register),
        // 3
        Op("MULT", Mult, Register),
        Op("MULTU", Multu, Register),
        Op("DIV", Div, Register),
        Op("DIVU", Divu, Register),
        Op("DMULT", Dmult, Register),
        Op("DMULTU", Dmultu, Register),
        Op("DDIV", Ddiv, Register),
        Op("DDIVU", Ddivu, Register),
        // 4
        Op("ADD", Add, Register),
        Op("ADDU", Addu, Register),
        Op("SUB", Sub, Register),
        Op("SUBU", Subu, Register),
        Op("AND", And, Register),
        Op("OR", Or, Register),
        Op("XOR", Xor, Register),
        Op("NOR", Nor, Register),
        // 5
        R,
        R,
        Op("SLT", Slt, Register),
        Op("SLTU", Sltu, Register),
        Op("DADD", Dadd, Register),
        Op("DADDU", Daddu, Register),
        Op("DSUB", Dsub, Register),
        Op("DSUBU", Dsubu, Register),
        // 6
        Op("TGE", Tge, Register),
        Op("TGEU", Tgeu, Register),
        Op("TLT", Tlt, Register),
        Op("TLTU", Tltu, Register),
        Op("TEQ", Teq, Register),
        R,
        Op("TNE", Tne, Register),
        R,
        // 7
        Op("DSLL", Dsll, Register),
        R,
        Op("DSRL", Dsrl, Register),
        Op("DSRA", Dsra, Register),
        Op("DSLL32", Dsll32, Register),
        R,
        Op("DSRL32", Dsrl32, Register),
        Op("DSRA32", Dsra32, Register),
    ]
}

const fn build_regimm_table() -> [InstructionInfo; 32] {
    use InstructionInfo::*;
    use Opcode::*;
    use Form::*;

    let mut table = [InstructionInfo::Reserved; 32];
    table[0x00] = Op("BLTZ", Bltz, Immediate);
    table[0x01] = Op("BGEZ", Bgez, Immediate);
    table[0x02] = Op("BLTZL", Bltzl, Immediate);
    table[0x03] = Op("BGEZL", Bgezl, Immediate);
    table[0x08] = Op("TGEI", Tgei, Immediate);
    table[0x09] = Op("TGEIU", Tgeiu, Immediate);
    table[0x0a] = Op("TLTI", Tlti, Immediate);
    table[0x0b] = Op("TLTIU", Tltiu, Immediate);
    table[0x0c] = Op("TEQI", Teqi, Immediate);
    table[0x0e] = Op("TNEI", Tnei, Immediate);
    table[0x10] = Op("BLTZAL", Bltzal, Immediate);
    table[0x11] = Op("BGEZAL", Bgezal, Immediate);
    table[0x12] = Op("BLTZALL", Bltzall, Immediate);
    table[0x13] = Op("BGEZALL", Bgezall, Immediate);
    table
}

const fn build_cop0_table() -> [InstructionInfo; 16] {
    use InstructionInfo::*;
    use Opcode::*;

    let mut table = [InstructionInfo::Reserved; 16];
    table[0x0] = Op("MFC0", Mfc0, Form::Register);
    table[0x1] = Op("DMFC0", Dmfc0, Form::Register);
    table[0x4] = Op("MTC0", Mtc0, Form::Register);
    table[0x5] = Op("DMTC0", Dmtc0, Form::Register);
    table
}

const fn build_cop0_fn_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use Opcode::*;

    let mut table = [InstructionInfo::Reserved; 64];
    table[0x1] = Op("TLBR", Tlbr, Form::Register);
    table[0x2] = Op("TLBWI", Tlbwi, Form::Register);
    table[0x6] = Op("TLBWR", Tlbwr, Form::Register);
    table[0x8] = Op("TLBP", Tlbp, Form::Register);
    table[0x18] = Op("ERET", Eret, Form::Register);
    table
}

const fn build_cop1_table() -> [InstructionInfo; 32] {
    use InstructionInfo::*;
    use Opcode::*;

    let mut table = [InstructionInfo::Reserved; 32];
    table[0x0] = Op("MFC1", Mfc1, Form::Register);
    table[0x1] = Op("DMFC1", Dmfc1, Form::Register);
    table[0x2] = Op("CFC1", Cfc1, Form::Register);
    table[0x4] = Op("MTC1", Mtc1, Form::Register);
    table[0x5] = Op("DMTC1", Dmtc1, Form::Register);
    table[0x6] = Op("CTC1", Ctc1, Form::Register);
    table[0x8] = Cop1Bc;
    table[0x10] = Cop1Fmt(FloatFmt::S);
    table[0x11] = Cop1Fmt(FloatFmt::D);
    table[0x14] = Cop1Fmt(FloatFmt::W);
    table[0x15] = Cop1Fmt(FloatFmt::L);
    table
}

const fn build_cop1_bc_table() -> [InstructionInfo; 4] {
    use InstructionInfo::*;
    use Opcode::*;
    use Form::*;

    [
        Op("BC1F", Bc1f, Immediate),
        Op("BC1T", Bc1t, Immediate),
        Op("BC1FL", Bc1fl, Immediate),
        Op("BC1TL", Bc1tl, Immediate),
    ]
}

const fn build_cop1_fn_table(fmt: FloatFmt) -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use Opcode::*;
    use Form::*;

    let mut table = [InstructionInfo::Reserved; 64];
    match fmt {
        FloatFmt::S | FloatFmt::D => {
            table[0x00] = Op("ADD", FAdd(fmt), Register);
            table[0x01] = Op("SUB", FSub(fmt), Register);
            table[0x02] = Op("MUL", FMul(fmt), Register);
            table[0x03] = Op("DIV", FDiv(fmt), Register);
            table[0x04] = Op("SQRT", FSqrt(fmt), Register);
            table[0x05] = Op("ABS", FAbs(fmt), Register);
            table[0x06] = Op("MOV", FMov(fmt), Register);
            table[0x07] = Op("NEG", FNeg(fmt), Register);
            table[0x08] = Op("ROUND.L", RoundL(fmt), Register);
            table[0x09] = Op("TRUNC.L", TruncL(fmt), Register);
            table[0x0a] = Op("CEIL.L", CeilL(fmt), Register);
            table[0x0b] = Op("FLOOR.L", FloorL(fmt), Register);
            table[0x0c] = Op("ROUND.W", RoundW(fmt), Register);
            table[0x0d] = Op("TRUNC.W", TruncW(fmt), Register);
            table[0x0e] = Op("CEIL.W", CeilW(fmt), Register);
            table[0x0f] = Op("FLOOR.W", FloorW(fmt), Register);
            if let FloatFmt::D = fmt {
                table[0x20] = Op("CVT.S", CvtS(fmt), Register);
            } else {
                table[0x21] = Op("CVT.D", CvtD(fmt), Register);
            }
            table[0x24] = Op("CVT.W", CvtW(fmt), Register);
            table[0x25] = Op("CVT.L", CvtL(fmt), Register);
            let mut cond = 0;
            while cond < 16 {
                table[0x30 + cond] = Op("C", FCompare(fmt, cond as u8), FloatCompare);
                cond += 1;
            }
        }
        FloatFmt::W | FloatFmt::L => {
            table[0x20] = Op("CVT.S", CvtS(fmt), Register);
            table[0x21] = Op("CVT.D", CvtD(fmt), Register);
        }
    }
    table
}

static PRIMARY_TABLE: [InstructionInfo; 64] = build_primary_table();
static SPECIAL_TABLE: [InstructionInfo; 64] = build_special_table();
static REGIMM_TABLE: [InstructionInfo; 32] = build_regimm_table();
static COP0_TABLE: [InstructionInfo; 16] = build_cop0_table();
static COP0_FN_TABLE: [InstructionInfo; 64] = build_cop0_fn_table();
static COP1_TABLE: [InstructionInfo; 32] = build_cop1_table();
static COP1_BC_TABLE: [InstructionInfo; 4] = build_cop1_bc_table();
static COP1_S_TABLE: [InstructionInfo; 64] = build_cop1_fn_table(FloatFmt::S);
static COP1_D_TABLE: [InstructionInfo; 64] = build_cop1_fn_table(FloatFmt::D);
static COP1_W_TABLE: [InstructionInfo; 64] = build_cop1_fn_table(FloatFmt::W);
static COP1_L_TABLE: [InstructionInfo; 64] = build_cop1_fn_table(FloatFmt::L);

/// Instruction word encoders, used by tests and the runner's self checks
pub mod encode {
    pub const fn r(op: u32, rs: usize, rt: usize, rd: usize, sa: u32, funct: u32) -> u32 {
        (op << 26) | ((rs as u32) << 21) | ((rt as u32) << 16) | ((rd as u32) << 11) | (sa << 6) | funct
    }
    pub const fn i(op: u32, rs: usize, rt: usize, imm: u16) -> u32 {
        (op << 26) | ((rs as u32) << 21) | ((rt as u32) << 16) | imm as u32
    }
    pub const fn j(op: u32, target: u32) -> u32 {
        (op << 26) | ((target >> 2) & 0x03ff_ffff)
    }
    pub const fn special(rs: usize, rt: usize, rd: usize, sa: u32, funct: u32) -> u32 {
        r(0, rs, rt, rd, sa, funct)
    }
    pub const fn cop1(fmt: u32, ft: usize, fs: usize, fd: usize, funct: u32) -> u32 {
        r(0x11, fmt as usize, ft, fs, fd as u32, funct)
    }

    pub const NOP: u32 = 0;
    pub const fn addiu(rt: usize, rs: usize, imm: i16) -> u32 { i(0x09, rs, rt, imm as u16) }
    pub const fn addi(rt: usize, rs: usize, imm: i16) -> u32 { i(0x08, rs, rt, imm as u16) }
    pub const fn daddiu(rt: usize, rs: usize, imm: i16) -> u32 { i(0x19, rs, rt, imm as u16) }
    pub const fn ori(rt: usize, rs: usize, imm: u16) -> u32 { i(0x0d, rs, rt, imm) }
    pub const fn lui(rt: usize, imm: u16) -> u32 { i(0x0f, 0, rt, imm) }
    pub const fn addu(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x21) }
    pub const fn add(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x20) }
    pub const fn subu(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x23) }
    pub const fn or(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x25) }
    pub const fn sll(rd: usize, rt: usize, sa: u32) -> u32 { special(0, rt, rd, sa, 0x00) }
    pub const fn beq(rs: usize, rt: usize, offset: i16) -> u32 { i(0x04, rs, rt, offset as u16) }
    pub const fn bne(rs: usize, rt: usize, offset: i16) -> u32 { i(0x05, rs, rt, offset as u16) }
    pub const fn beql(rs: usize, rt: usize, offset: i16) -> u32 { i(0x14, rs, rt, offset as u16) }
    pub const fn bnel(rs: usize, rt: usize, offset: i16) -> u32 { i(0x15, rs, rt, offset as u16) }
    pub const fn jr(rs: usize) -> u32 { special(rs, 0, 0, 0, 0x08) }
    pub const fn jal(target: u32) -> u32 { j(0x03, target) }
    pub const fn lw(rt: usize, base: usize, offset: i16) -> u32 { i(0x23, base, rt, offset as u16) }
    pub const fn sw(rt: usize, base: usize, offset: i16) -> u32 { i(0x2b, base, rt, offset as u16) }
    pub const fn ld(rt: usize, base: usize, offset: i16) -> u32 { i(0x37, base, rt, offset as u16) }
    pub const fn sd(rt: usize, base: usize, offset: i16) -> u32 { i(0x3f, base, rt, offset as u16) }
    pub const fn mtc0(rt: usize, rd: usize) -> u32 { r(0x10, 4, rt, rd, 0, 0) }
    pub const fn mfc0(rt: usize, rd: usize) -> u32 { r(0x10, 0, rt, rd, 0, 0) }
    pub const TLBWI: u32 = r(0x10, 16, 0, 0, 0, 0x02);
    pub const TLBP: u32 = r(0x10, 16, 0, 0, 0, 0x08);
    pub const TLBR: u32 = r(0x10, 16, 0, 0, 0, 0x01);
    pub const ERET: u32 = r(0x10, 16, 0, 0, 0, 0x18);
    pub const SYSCALL: u32 = special(0, 0, 0, 0, 0x0c);

    pub const fn and(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x24) }
    pub const fn xor(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x26) }
    pub const fn nor(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x27) }
    pub const fn slt(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x2a) }
    pub const fn sltu(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x2b) }
    pub const fn daddu(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x2d) }
    pub const fn dsubu(rd: usize, rs: usize, rt: usize) -> u32 { special(rs, rt, rd, 0, 0x2f) }
    pub const fn srl(rd: usize, rt: usize, sa: u32) -> u32 { special(0, rt, rd, sa, 0x02) }
    pub const fn sra(rd: usize, rt: usize, sa: u32) -> u32 { special(0, rt, rd, sa, 0x03) }
    pub const fn sllv(rd: usize, rt: usize, rs: usize) -> u32 { special(rs, rt, rd, 0, 0x04) }
    pub const fn srav(rd: usize, rt: usize, rs: usize) -> u32 { special(rs, rt, rd, 0, 0x07) }
    pub const fn dsllv(rd: usize, rt: usize, rs: usize) -> u32 { special(rs, rt, rd, 0, 0x14) }
    pub const fn dsll32(rd: usize, rt: usize, sa: u32) -> u32 { special(0, rt, rd, sa, 0x3c) }
    pub const fn dsra32(rd: usize, rt: usize, sa: u32) -> u32 { special(0, rt, rd, sa, 0x3f) }
    pub const fn mult(rs: usize, rt: usize) -> u32 { special(rs, rt, 0, 0, 0x18) }
    pub const fn mfhi(rd: usize) -> u32 { special(0, 0, rd, 0, 0x10) }
    pub const fn mflo(rd: usize) -> u32 { special(0, 0, rd, 0, 0x12) }
    pub const fn mthi(rs: usize) -> u32 { special(rs, 0, 0, 0, 0x11) }
    pub const fn jalr(rd: usize, rs: usize) -> u32 { special(rs, 0, rd, 0, 0x09) }
    pub const fn slti(rt: usize, rs: usize, imm: i16) -> u32 { i(0x0a, rs, rt, imm as u16) }
    pub const fn sltiu(rt: usize, rs: usize, imm: i16) -> u32 { i(0x0b, rs, rt, imm as u16) }
    pub const fn andi(rt: usize, rs: usize, imm: u16) -> u32 { i(0x0c, rs, rt, imm) }
    pub const fn xori(rt: usize, rs: usize, imm: u16) -> u32 { i(0x0e, rs, rt, imm) }
    pub const fn blez(rs: usize, offset: i16) -> u32 { i(0x06, rs, 0, offset as u16) }
    pub const fn bgtz(rs: usize, offset: i16) -> u32 { i(0x07, rs, 0, offset as u16) }
    pub const fn bltz(rs: usize, offset: i16) -> u32 { i(0x01, rs, 0x00, offset as u16) }
    pub const fn bltzal(rs: usize, offset: i16) -> u32 { i(0x01, rs, 0x10, offset as u16) }
    pub const fn bgezal(rs: usize, offset: i16) -> u32 { i(0x01, rs, 0x11, offset as u16) }
    pub const fn j_to(target: u32) -> u32 { j(0x02, target) }
}
