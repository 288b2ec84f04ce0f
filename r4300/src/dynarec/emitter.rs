//! x86-64 machine code emitter. Every method appends exactly one instruction.
//!
//! Memory operands are always `[base + disp32]`; translated code only ever addresses the
//! `Core` it was handed, so that is all we need.

pub const RAX: u8 = 0;
pub const RCX: u8 = 1;
pub const RDX: u8 = 2;
pub const RBX: u8 = 3;
pub const RSP: u8 = 4;
pub const RSI: u8 = 6;
pub const RDI: u8 = 7;
pub const R12: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cond {
    B = 0x2,
    AE = 0x3,
    E = 0x4,
    NE = 0x5,
    L = 0xc,
    GE = 0xd,
    LE = 0xe,
    G = 0xf,
}

/// Two operand integer ops, as (r/m, reg opcode, /digit of the 0x81 immediate group)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alu {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

impl Alu {
    fn opcode(self) -> u8 {
        match self {
            Alu::Add => 0x01,
            Alu::Or => 0x09,
            Alu::And => 0x21,
            Alu::Sub => 0x29,
            Alu::Xor => 0x31,
            Alu::Cmp => 0x39,
        }
    }

    fn digit(self) -> u8 {
        match self {
            Alu::Add => 0,
            Alu::Or => 1,
            Alu::And => 4,
            Alu::Sub => 5,
            Alu::Xor => 6,
            Alu::Cmp => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Shift {
    Shl = 4,
    Shr = 5,
    Sar = 7,
}

#[derive(Default)]
pub struct X64Emitter {
    bytes: Vec<u8>,
}

impl X64Emitter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(16 * 1024),
        }
    }

    /// Current offset, the address of the next instruction
    #[inline]
    pub fn pos(&self) -> usize {
        self.bytes.len()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    #[inline]
    fn emit_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    #[inline]
    fn emit_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    fn emit_rex(&mut self, w: bool, r: u8, x: u8, b: u8) {
        let rex = 0x40
            | ((w as u8) << 3)
            | (((r >> 3) & 1) << 2)
            | (((x >> 3) & 1) << 1)
            | ((b >> 3) & 1);
        if rex != 0x40 {
            self.emit_u8(rex);
        }
    }

    #[inline]
    fn emit_modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.emit_u8(((mode & 0x3) << 6) | ((reg & 0x7) << 3) | (rm & 0x7));
    }

    fn emit_mem_disp32(&mut self, reg_field: u8, base: u8, disp: i32) {
        if (base & 0x7) == 0x4 {
            self.emit_modrm(0b10, reg_field, 0x4);
            // SIB: no index, base
            self.emit_u8(0x20 | (base & 0x7));
        } else {
            self.emit_modrm(0b10, reg_field, base & 0x7);
        }
        self.emit_u32(disp as u32);
    }

    pub fn push_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit_u8(0x41);
        }
        self.emit_u8(0x50 + (reg & 0x7));
    }

    pub fn pop_r64(&mut self, reg: u8) {
        if reg >= 8 {
            self.emit_u8(0x41);
        }
        self.emit_u8(0x58 + (reg & 0x7));
    }

    pub fn sub_rsp_imm8(&mut self, imm: u8) {
        self.emit_rex(true, 0, 0, RSP);
        self.emit_u8(0x83);
        self.emit_modrm(0b11, 5, RSP);
        self.emit_u8(imm);
    }

    pub fn add_rsp_imm8(&mut self, imm: u8) {
        self.emit_rex(true, 0, 0, RSP);
        self.emit_u8(0x83);
        self.emit_modrm(0b11, 0, RSP);
        self.emit_u8(imm);
    }

    pub fn mov_r64_r64(&mut self, dst: u8, src: u8) {
        self.emit_rex(true, src, 0, dst);
        self.emit_u8(0x89);
        self.emit_modrm(0b11, src, dst);
    }

    pub fn mov_r64_imm64(&mut self, dst: u8, imm: u64) {
        self.emit_rex(true, 0, 0, dst);
        self.emit_u8(0xb8 + (dst & 0x7));
        self.emit_u64(imm);
    }

    /// Zero extends into the full register
    pub fn mov_r32_imm32(&mut self, dst: u8, imm: u32) {
        self.emit_rex(false, 0, 0, dst);
        self.emit_u8(0xb8 + (dst & 0x7));
        self.emit_u32(imm);
    }

    pub fn mov_r64_m64(&mut self, dst: u8, base: u8, disp: i32) {
        self.emit_rex(true, dst, 0, base);
        self.emit_u8(0x8b);
        self.emit_mem_disp32(dst, base, disp);
    }

    pub fn mov_m64_r64(&mut self, base: u8, disp: i32, src: u8) {
        self.emit_rex(true, src, 0, base);
        self.emit_u8(0x89);
        self.emit_mem_disp32(src, base, disp);
    }

    pub fn mov_r32_m32(&mut self, dst: u8, base: u8, disp: i32) {
        self.emit_rex(false, dst, 0, base);
        self.emit_u8(0x8b);
        self.emit_mem_disp32(dst, base, disp);
    }

    pub fn mov_m32_r32(&mut self, base: u8, disp: i32, src: u8) {
        self.emit_rex(false, src, 0, base);
        self.emit_u8(0x89);
        self.emit_mem_disp32(src, base, disp);
    }

    pub fn mov_m32_imm32(&mut self, base: u8, disp: i32, imm: u32) {
        self.emit_rex(false, 0, 0, base);
        self.emit_u8(0xc7);
        self.emit_mem_disp32(0, base, disp);
        self.emit_u32(imm);
    }

    /// Store the low byte of RAX, RCX, RDX or RBX
    pub fn mov_m8_r8(&mut self, base: u8, disp: i32, src: u8) {
        debug_assert!(src < 4);
        self.emit_rex(false, src, 0, base);
        self.emit_u8(0x88);
        self.emit_mem_disp32(src, base, disp);
    }

    pub fn mov_m8_imm8(&mut self, base: u8, disp: i32, imm: u8) {
        self.emit_rex(false, 0, 0, base);
        self.emit_u8(0xc6);
        self.emit_mem_disp32(0, base, disp);
        self.emit_u8(imm);
    }

    pub fn cmp_m8_imm8(&mut self, base: u8, disp: i32, imm: u8) {
        self.emit_rex(false, 0, 0, base);
        self.emit_u8(0x80);
        self.emit_mem_disp32(7, base, disp);
        self.emit_u8(imm);
    }

    pub fn cmp_r64_m64(&mut self, lhs: u8, base: u8, disp: i32) {
        self.emit_rex(true, lhs, 0, base);
        self.emit_u8(0x3b);
        self.emit_mem_disp32(lhs, base, disp);
    }

    /// `dst op= src`, 64 bit when `wide`
    pub fn alu_r_r(&mut self, op: Alu, wide: bool, dst: u8, src: u8) {
        self.emit_rex(wide, src, 0, dst);
        self.emit_u8(op.opcode());
        self.emit_modrm(0b11, src, dst);
    }

    /// `dst op= imm`, the immediate sign extended to the operand size
    pub fn alu_r_imm32(&mut self, op: Alu, wide: bool, dst: u8, imm: i32) {
        self.emit_rex(wide, 0, 0, dst);
        self.emit_u8(0x81);
        self.emit_modrm(0b11, op.digit(), dst);
        self.emit_u32(imm as u32);
    }

    pub fn shift_imm8(&mut self, kind: Shift, wide: bool, reg: u8, imm: u8) {
        self.emit_rex(wide, 0, 0, reg);
        self.emit_u8(0xc1);
        self.emit_modrm(0b11, kind as u8, reg);
        self.emit_u8(imm);
    }

    /// Shift by CL, masked by the CPU to 5 or 6 bits
    pub fn shift_cl(&mut self, kind: Shift, wide: bool, reg: u8) {
        self.emit_rex(wide, 0, 0, reg);
        self.emit_u8(0xd3);
        self.emit_modrm(0b11, kind as u8, reg);
    }

    pub fn not_r64(&mut self, reg: u8) {
        self.emit_rex(true, 0, 0, reg);
        self.emit_u8(0xf7);
        self.emit_modrm(0b11, 2, reg);
    }

    pub fn movsxd_r64_r32(&mut self, dst: u8, src: u8) {
        self.emit_rex(true, dst, 0, src);
        self.emit_u8(0x63);
        self.emit_modrm(0b11, dst, src);
    }

    pub fn setcc_al(&mut self, cc: Cond) {
        self.emit_u8(0x0f);
        self.emit_u8(0x90 + (cc as u8));
        self.emit_u8(0xc0);
    }

    pub fn movzx_r64_r8(&mut self, dst: u8, src: u8) {
        self.emit_rex(true, dst, 0, src);
        self.emit_u8(0x0f);
        self.emit_u8(0xb6);
        self.emit_modrm(0b11, dst, src);
    }

    pub fn call_rax(&mut self) {
        self.emit_u8(0xff);
        self.emit_u8(0xd0);
    }

    pub fn jmp_r64(&mut self, reg: u8) {
        self.emit_rex(false, 0, 0, reg);
        self.emit_u8(0xff);
        self.emit_modrm(0b11, 4, reg);
    }

    pub fn ret(&mut self) {
        self.emit_u8(0xc3);
    }

    /// Jump with a zero displacement. Returns the offset of the rel32 field for `patch_rel32`.
    pub fn jmp_rel32(&mut self) -> usize {
        self.emit_u8(0xe9);
        let at = self.pos();
        self.emit_u32(0);
        at
    }

    pub fn jcc_rel32(&mut self, cc: Cond) -> usize {
        self.emit_u8(0x0f);
        self.emit_u8(0x80 + (cc as u8));
        let at = self.pos();
        self.emit_u32(0);
        at
    }

    /// Point the rel32 field at `at` to `target`
    pub fn patch_rel32(&mut self, at: usize, target: usize) {
        let rel = target as i64 - (at as i64 + 4);
        self.bytes[at..at + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }
}
