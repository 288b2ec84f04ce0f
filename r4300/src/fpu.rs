//! Coprocessor 1: register moves, arithmetic, conversions and compares.

pub mod rounding;

use std::cmp::Ordering;
use std::num::FpCategory;

use crate::exception::Exception;
use crate::instructions::{FloatFmt, Instruction, Opcode};
use crate::regfile::{cp0, fcr31, status};
use crate::Core;
use rounding::{double, single, RoundingMode};

#[derive(Debug, Copy, Clone)]
enum Binary {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Copy, Clone)]
enum Unary {
    Sqrt,
    Abs,
    Mov,
    Neg,
}

/// Operand of a float operation, read through the FR dependent register view
#[derive(Debug, Copy, Clone)]
enum Value {
    Single(f32),
    Double(f64),
}

impl Value {
    fn category(self) -> FpCategory {
        match self {
            Value::Single(v) => v.classify(),
            Value::Double(v) => v.classify(),
        }
    }

    /// Exact widening, used by the integer conversions
    fn as_f64(self) -> f64 {
        match self {
            Value::Single(v) => v as f64,
            Value::Double(v) => v,
        }
    }
}

fn compare<T: PartialOrd>(a: T, b: T) -> (bool, bool, bool) {
    match a.partial_cmp(&b) {
        None => (true, false, false),
        Some(Ordering::Less) => (false, true, false),
        Some(Ordering::Equal) => (false, false, true),
        Some(Ordering::Greater) => (false, false, false),
    }
}

impl Core {
    pub(crate) fn cop1_usable(&self) -> Result<(), Exception> {
        if self.regs.cop0[cp0::STATUS] & status::CU1 == 0 {
            Err(Exception::CopUnusable(1))
        } else {
            Ok(())
        }
    }

    /// Execute one COP1 instruction other than the loads, stores and BC1 branches.
    pub(crate) fn execute_cop1(&mut self, inst: Instruction) -> Result<(), Exception> {
        use Opcode::*;
        use RoundingMode::*;

        self.cop1_usable()?;
        let mode = RoundingMode::from_fcr31(self.regs.fcr31);
        match inst.op {
            Mfc1 => {
                let val = self.regs.fpr_s(inst.fs());
                self.regs.set_gpr32(inst.rt(), val);
            }
            Dmfc1 => {
                let val = self.regs.fpr_d(inst.fs());
                self.regs.set_gpr(inst.rt(), val);
            }
            Cfc1 => {
                let val = match inst.fs() {
                    0 => self.regs.fcr0,
                    31 => self.regs.fcr31,
                    _ => 0,
                };
                self.regs.set_gpr32(inst.rt(), val);
            }
            Mtc1 => {
                let val = self.regs.gpr(inst.rt()) as u32;
                self.regs.set_fpr_s(inst.fs(), val);
            }
            Dmtc1 => {
                let val = self.regs.gpr(inst.rt());
                self.regs.set_fpr_d(inst.fs(), val);
            }
            Ctc1 => {
                if inst.fs() == 31 {
                    self.regs.fcr31 = self.regs.gpr(inst.rt()) as u32;
                } else {
                    log::debug!("CTC1 to read-only fcr{} ignored", inst.fs());
                }
            }
            FAdd(fmt) => self.binary(Binary::Add, fmt, inst, mode)?,
            FSub(fmt) => self.binary(Binary::Sub, fmt, inst, mode)?,
            FMul(fmt) => self.binary(Binary::Mul, fmt, inst, mode)?,
            FDiv(fmt) => self.binary(Binary::Div, fmt, inst, mode)?,
            FSqrt(fmt) => self.unary(Unary::Sqrt, fmt, inst, mode)?,
            FAbs(fmt) => self.unary(Unary::Abs, fmt, inst, mode)?,
            FMov(fmt) => self.unary(Unary::Mov, fmt, inst, mode)?,
            FNeg(fmt) => self.unary(Unary::Neg, fmt, inst, mode)?,
            RoundL(fmt) => self.to_integer(fmt, inst, Nearest, true)?,
            TruncL(fmt) => self.to_integer(fmt, inst, Truncate, true)?,
            CeilL(fmt) => self.to_integer(fmt, inst, Ceil, true)?,
            FloorL(fmt) => self.to_integer(fmt, inst, Floor, true)?,
            RoundW(fmt) => self.to_integer(fmt, inst, Nearest, false)?,
            TruncW(fmt) => self.to_integer(fmt, inst, Truncate, false)?,
            CeilW(fmt) => self.to_integer(fmt, inst, Ceil, false)?,
            FloorW(fmt) => self.to_integer(fmt, inst, Floor, false)?,
            CvtL(fmt) => self.to_integer(fmt, inst, mode, true)?,
            CvtW(fmt) => self.to_integer(fmt, inst, mode, false)?,
            CvtS(fmt) => self.convert_single(fmt, inst, mode)?,
            CvtD(fmt) => self.convert_double(fmt, inst, mode)?,
            FCompare(fmt, cond) => self.compare(fmt, cond, inst)?,
            _ => {
                log::warn!("{} is not a COP1 operation", inst.name());
                return Err(Exception::ReservedInstruction);
            }
        }
        Ok(())
    }

    /// Record a floating point exception condition. Raises the exception when it is enabled,
    /// otherwise sets the sticky flag.
    fn float_exception(&mut self, bit: u32) -> Result<(), Exception> {
        self.regs.fcr31 |= bit << fcr31::CAUSE_SHIFT;
        if self.regs.fcr31 & (bit << fcr31::ENABLE_SHIFT) != 0 {
            log::debug!("floating point exception, fcr31 {:08x}", self.regs.fcr31);
            return Err(Exception::FloatingPoint);
        }
        self.regs.fcr31 |= bit << fcr31::FLAG_SHIFT;
        Ok(())
    }

    fn begin_float_op(&mut self) {
        if self.config.float_traps {
            self.regs.fcr31 &= !fcr31::CAUSE_MASK;
        }
    }

    fn check_input(&mut self, value: Value) -> Result<(), Exception> {
        if !self.config.float_traps {
            return Ok(());
        }
        match value.category() {
            FpCategory::Nan | FpCategory::Subnormal => self.float_exception(fcr31::INVALID),
            _ => Ok(()),
        }
    }

    fn check_output(&mut self, value: Value) -> Result<(), Exception> {
        if !self.config.float_traps {
            return Ok(());
        }
        match value.category() {
            FpCategory::Nan => self.float_exception(fcr31::INVALID),
            FpCategory::Infinite => self.float_exception(fcr31::OVERFLOW),
            FpCategory::Subnormal => self.float_exception(fcr31::UNDERFLOW),
            _ => Ok(()),
        }
    }

    fn read_float(&self, fmt: FloatFmt, reg: usize) -> Result<Value, Exception> {
        match fmt {
            FloatFmt::S => Ok(Value::Single(f32::from_bits(self.regs.fpr_s(reg)))),
            FloatFmt::D => Ok(Value::Double(f64::from_bits(self.regs.fpr_d(reg)))),
            FloatFmt::W | FloatFmt::L => Err(Exception::ReservedInstruction),
        }
    }

    fn write_float(&mut self, reg: usize, value: Value) {
        match value {
            Value::Single(v) => self.regs.set_fpr_s(reg, v.to_bits()),
            Value::Double(v) => self.regs.set_fpr_d(reg, v.to_bits()),
        }
    }

    fn binary(&mut self, op: Binary, fmt: FloatFmt, inst: Instruction, mode: RoundingMode)
        -> Result<(), Exception>
    {
        self.begin_float_op();
        let a = self.read_float(fmt, inst.fs())?;
        let b = self.read_float(fmt, inst.ft())?;
        self.check_input(a)?;
        self.check_input(b)?;
        let result = match (a, b) {
            (Value::Single(a), Value::Single(b)) => Value::Single(match op {
                Binary::Add => single::add(a, b, mode),
                Binary::Sub => single::sub(a, b, mode),
                Binary::Mul => single::mul(a, b, mode),
                Binary::Div => single::div(a, b, mode),
            }),
            (Value::Double(a), Value::Double(b)) => Value::Double(match op {
                Binary::Add => double::add(a, b, mode),
                Binary::Sub => double::sub(a, b, mode),
                Binary::Mul => double::mul(a, b, mode),
                Binary::Div => double::div(a, b, mode),
            }),
            _ => return Err(Exception::ReservedInstruction),
        };
        self.check_output(result)?;
        self.write_float(inst.fd(), result);
        Ok(())
    }

    fn unary(&mut self, op: Unary, fmt: FloatFmt, inst: Instruction, mode: RoundingMode)
        -> Result<(), Exception>
    {
        let a = self.read_float(fmt, inst.fs())?;
        if let Unary::Mov = op {
            self.write_float(inst.fd(), a);
            return Ok(());
        }
        self.begin_float_op();
        self.check_input(a)?;
        let result = match a {
            Value::Single(a) => Value::Single(match op {
                Unary::Sqrt => single::sqrt(a, mode),
                Unary::Abs => a.abs(),
                Unary::Neg => -a,
                Unary::Mov => a,
            }),
            Value::Double(a) => Value::Double(match op {
                Unary::Sqrt => double::sqrt(a, mode),
                Unary::Abs => a.abs(),
                Unary::Neg => -a,
                Unary::Mov => a,
            }),
        };
        self.check_output(result)?;
        self.write_float(inst.fd(), result);
        Ok(())
    }

    /// ROUND/TRUNC/CEIL/FLOOR/CVT to W or L. Unrepresentable results become the integer
    /// indefinite value.
    fn to_integer(&mut self, fmt: FloatFmt, inst: Instruction, mode: RoundingMode, long: bool)
        -> Result<(), Exception>
    {
        self.begin_float_op();
        let value = self.read_float(fmt, inst.fs())?;
        self.check_input(value)?;
        let x = value.as_f64();
        if long {
            let result = match rounding::to_i64(x, mode) {
                Some(v) => v,
                None => {
                    log::debug!("{} of {} out of range", inst.name(), x);
                    if self.config.float_traps {
                        self.float_exception(fcr31::INVALID)?;
                    }
                    i64::MIN
                }
            };
            self.regs.set_fpr_d(inst.fd(), result as u64);
        } else {
            let result = match rounding::to_i32(x, mode) {
                Some(v) => v,
                None => {
                    log::debug!("{} of {} out of range", inst.name(), x);
                    if self.config.float_traps {
                        self.float_exception(fcr31::INVALID)?;
                    }
                    i32::MIN
                }
            };
            self.regs.set_fpr_s(inst.fd(), result as u32);
        }
        Ok(())
    }

    fn convert_single(&mut self, fmt: FloatFmt, inst: Instruction, mode: RoundingMode)
        -> Result<(), Exception>
    {
        self.begin_float_op();
        let result = match fmt {
            FloatFmt::D => {
                let d = f64::from_bits(self.regs.fpr_d(inst.fs()));
                self.check_input(Value::Double(d))?;
                let mode = if self.config.wii_vc { RoundingMode::Truncate } else { mode };
                rounding::f64_to_f32(d, mode)
            }
            FloatFmt::W => rounding::i64_to_f32(self.regs.fpr_s(inst.fs()) as i32 as i64, mode),
            FloatFmt::L => rounding::i64_to_f32(self.regs.fpr_d(inst.fs()) as i64, mode),
            FloatFmt::S => return Err(Exception::ReservedInstruction),
        };
        self.check_output(Value::Single(result))?;
        self.regs.set_fpr_s(inst.fd(), result.to_bits());
        Ok(())
    }

    fn convert_double(&mut self, fmt: FloatFmt, inst: Instruction, mode: RoundingMode)
        -> Result<(), Exception>
    {
        self.begin_float_op();
        let result = match fmt {
            FloatFmt::S => {
                let s = f32::from_bits(self.regs.fpr_s(inst.fs()));
                self.check_input(Value::Single(s))?;
                s as f64
            }
            FloatFmt::W => self.regs.fpr_s(inst.fs()) as i32 as f64,
            FloatFmt::L => rounding::i64_to_f64(self.regs.fpr_d(inst.fs()) as i64, mode),
            FloatFmt::D => return Err(Exception::ReservedInstruction),
        };
        self.check_output(Value::Double(result))?;
        self.regs.set_fpr_d(inst.fd(), result.to_bits());
        Ok(())
    }

    /// C.cond.fmt. Bit 0 of the condition selects unordered, bit 1 equal, bit 2 less than and
    /// bit 3 makes the compare signaling.
    fn compare(&mut self, fmt: FloatFmt, cond: u8, inst: Instruction) -> Result<(), Exception> {
        self.begin_float_op();
        let (unordered, less, equal) = match (self.read_float(fmt, inst.fs())?, self.read_float(fmt, inst.ft())?) {
            (Value::Single(a), Value::Single(b)) => compare(a, b),
            (Value::Double(a), Value::Double(b)) => compare(a, b),
            _ => return Err(Exception::ReservedInstruction),
        };
        if unordered && cond & 8 != 0 {
            self.float_exception(fcr31::INVALID)?;
        }
        let result = (cond & 1 != 0 && unordered) || (cond & 2 != 0 && equal) || (cond & 4 != 0 && less);
        if result {
            self.regs.fcr31 |= fcr31::CONDITION;
        } else {
            self.regs.fcr31 &= !fcr31::CONDITION;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::decode;
    use crate::instructions::encode::{cop1, r};
    use crate::CoreConfig;

    const S: u32 = 0x10;
    const D: u32 = 0x11;
    const W: u32 = 0x14;
    const L: u32 = 0x15;

    fn core() -> Core {
        Core::new(CoreConfig::default())
    }

    fn run(core: &mut Core, word: u32) -> Result<(), Exception> {
        core.execute_cop1(decode(word))
    }

    fn set_d(core: &mut Core, reg: usize, v: f64) {
        core.regs.set_fpr_d(reg, v.to_bits());
    }

    fn get_d(core: &Core, reg: usize) -> f64 {
        f64::from_bits(core.regs.fpr_d(reg))
    }

    #[test]
    fn unusable_without_cu1() {
        let mut core = core();
        core.regs.cop0[cp0::STATUS] &= !status::CU1;
        assert_eq!(run(&mut core, cop1(D, 4, 2, 0, 0x00)), Err(Exception::CopUnusable(1)));
    }

    #[test]
    fn moves_and_control_registers() {
        let mut core = core();
        core.regs.set_gpr(2, 0x8000_0001);
        run(&mut core, r(0x11, 4, 2, 6, 0, 0)).unwrap(); // MTC1 $v0, f6
        run(&mut core, r(0x11, 0, 3, 6, 0, 0)).unwrap(); // MFC1 $v1, f6
        assert_eq!(core.regs.gpr(3), 0xffff_ffff_8000_0001);

        core.regs.set_gpr(2, 0x0100_0003);
        run(&mut core, r(0x11, 6, 2, 31, 0, 0)).unwrap(); // CTC1 $v0, fcr31
        assert_eq!(core.regs.fcr31, 0x0100_0003);
        run(&mut core, r(0x11, 6, 2, 0, 0, 0)).unwrap(); // CTC1 to fcr0 is ignored
        assert_eq!(core.regs.fcr0, 0x511);
        run(&mut core, r(0x11, 2, 4, 0, 0, 0)).unwrap(); // CFC1 $a0, fcr0
        assert_eq!(core.regs.gpr(4), 0x511);
    }

    #[test]
    fn arithmetic_follows_fcr31_rounding() {
        let mut core = core();
        set_d(&mut core, 2, 1.0);
        set_d(&mut core, 4, 3.0);
        run(&mut core, cop1(D, 4, 2, 6, 0x03)).unwrap(); // DIV.D f6, f2, f4
        let nearest = get_d(&core, 6);
        assert_eq!(nearest, 1.0 / 3.0);

        core.regs.fcr31 = 2;
        run(&mut core, cop1(D, 4, 2, 6, 0x03)).unwrap();
        let up = get_d(&core, 6);
        core.regs.fcr31 = 3;
        run(&mut core, cop1(D, 4, 2, 6, 0x03)).unwrap();
        let down = get_d(&core, 6);
        assert!(down < up);
        assert!(down == nearest || up == nearest);

        core.regs.set_fpr_s(8, 2.0f32.to_bits());
        run(&mut core, cop1(S, 0, 8, 10, 0x04)).unwrap(); // SQRT.S f10, f8 rounding down
        assert_eq!(f32::from_bits(core.regs.fpr_s(10)), std::f32::consts::SQRT_2);
    }

    #[test]
    fn conversions() {
        let mut core = core();
        set_d(&mut core, 2, -2.5);
        run(&mut core, cop1(D, 0, 2, 4, 0x0c)).unwrap(); // ROUND.W.D
        assert_eq!(core.regs.fpr_s(4) as i32, -2);
        run(&mut core, cop1(D, 0, 2, 4, 0x0f)).unwrap(); // FLOOR.W.D
        assert_eq!(core.regs.fpr_s(4) as i32, -3);
        run(&mut core, cop1(D, 0, 2, 4, 0x0a)).unwrap(); // CEIL.L.D
        assert_eq!(core.regs.fpr_d(4) as i64, -2);

        set_d(&mut core, 2, f64::NAN);
        run(&mut core, cop1(D, 0, 2, 4, 0x24)).unwrap(); // CVT.W.D
        assert_eq!(core.regs.fpr_s(4), 0x8000_0000);
        set_d(&mut core, 2, 1e30);
        run(&mut core, cop1(D, 0, 2, 4, 0x25)).unwrap(); // CVT.L.D
        assert_eq!(core.regs.fpr_d(4), 0x8000_0000_0000_0000);

        core.regs.set_fpr_s(6, (-7i32) as u32);
        run(&mut core, cop1(W, 0, 6, 8, 0x21)).unwrap(); // CVT.D.W
        assert_eq!(get_d(&core, 8), -7.0);
        core.regs.set_fpr_d(6, (1u64 << 53) + 1);
        core.regs.fcr31 = 1;
        run(&mut core, cop1(L, 0, 6, 8, 0x21)).unwrap(); // CVT.D.L truncating
        assert_eq!(get_d(&core, 8), (1u64 << 53) as f64);
    }

    #[test]
    fn wii_vc_truncates_narrowing() {
        let value = 1.0 + f32::EPSILON as f64 * 0.75;
        let mut core = core();
        set_d(&mut core, 2, value);
        run(&mut core, cop1(D, 0, 2, 4, 0x20)).unwrap(); // CVT.S.D
        let nearest = f32::from_bits(core.regs.fpr_s(4));

        let mut core = Core::new(CoreConfig { wii_vc: true, ..CoreConfig::default() });
        set_d(&mut core, 2, value);
        run(&mut core, cop1(D, 0, 2, 4, 0x20)).unwrap();
        let truncated = f32::from_bits(core.regs.fpr_s(4));
        assert_eq!(truncated, 1.0);
        assert_eq!(nearest, 1.0 + f32::EPSILON);
    }

    #[test]
    fn nan_compares() {
        let mut core = core();
        set_d(&mut core, 2, f64::NAN);
        set_d(&mut core, 4, 1.0);

        run(&mut core, cop1(D, 4, 2, 0, 0x32)).unwrap(); // C.EQ.D
        assert_eq!(core.regs.fcr31 & fcr31::CONDITION, 0);
        run(&mut core, cop1(D, 4, 2, 0, 0x31)).unwrap(); // C.UN.D
        assert_ne!(core.regs.fcr31 & fcr31::CONDITION, 0);
        assert_eq!(core.regs.fcr31 & (fcr31::INVALID << fcr31::FLAG_SHIFT), 0);

        run(&mut core, cop1(D, 4, 2, 0, 0x3a)).unwrap(); // C.SEQ.D records invalid
        assert_eq!(core.regs.fcr31 & fcr31::CONDITION, 0);
        assert_ne!(core.regs.fcr31 & (fcr31::INVALID << fcr31::FLAG_SHIFT), 0);

        core.regs.fcr31 |= fcr31::INVALID << fcr31::ENABLE_SHIFT;
        assert_eq!(run(&mut core, cop1(D, 4, 2, 0, 0x3c)), Err(Exception::FloatingPoint));
        // the quiet half never traps
        assert_eq!(run(&mut core, cop1(D, 4, 2, 0, 0x34)), Ok(()));

        set_d(&mut core, 2, 0.5);
        run(&mut core, cop1(D, 4, 2, 0, 0x3c)).unwrap(); // C.LT.D 0.5 < 1.0
        assert_ne!(core.regs.fcr31 & fcr31::CONDITION, 0);
    }

    #[test]
    fn every_compare_condition() {
        // C bit for (less, equal, greater, unordered) operands
        const TABLE: [(&str, [bool; 4]); 16] = [
            ("F", [false, false, false, false]),
            ("UN", [false, false, false, true]),
            ("EQ", [false, true, false, false]),
            ("UEQ", [false, true, false, true]),
            ("OLT", [true, false, false, false]),
            ("ULT", [true, false, false, true]),
            ("OLE", [true, true, false, false]),
            ("ULE", [true, true, false, true]),
            ("SF", [false, false, false, false]),
            ("NGLE", [false, false, false, true]),
            ("SEQ", [false, true, false, false]),
            ("NGL", [false, true, false, true]),
            ("LT", [true, false, false, false]),
            ("NGE", [true, false, false, true]),
            ("LE", [true, true, false, false]),
            ("NGT", [true, true, false, true]),
        ];
        let operands = [(1.0, 2.0), (2.0, 2.0), (2.0, 1.0), (f64::NAN, 1.0)];
        let invalid = fcr31::INVALID << fcr31::CAUSE_SHIFT;

        for (cond, (name, expected)) in TABLE.iter().enumerate() {
            for (&(a, b), &want) in operands.iter().zip(expected) {
                let signals = cond >= 8 && a.is_nan();
                for fmt in [S, D] {
                    let mut core = Core::new(CoreConfig { float_traps: true, ..CoreConfig::default() });
                    if fmt == S {
                        core.regs.set_fpr_s(2, (a as f32).to_bits());
                        core.regs.set_fpr_s(4, (b as f32).to_bits());
                    } else {
                        set_d(&mut core, 2, a);
                        set_d(&mut core, 4, b);
                    }
                    // start from the opposite C so a stale bit can't pass
                    core.regs.fcr31 = if want { 0 } else { fcr31::CONDITION };
                    run(&mut core, cop1(fmt, 4, 2, 0, 0x30 | cond as u32)).unwrap();
                    let what = format!("C.{name} fmt {fmt:x} with {a}, {b}");
                    assert_eq!(core.regs.fcr31 & fcr31::CONDITION != 0, want, "{what}");
                    assert_eq!(core.regs.fcr31 & invalid != 0, signals, "{what}");

                    core.regs.fcr31 = fcr31::INVALID << fcr31::ENABLE_SHIFT;
                    let trapped = run(&mut core, cop1(fmt, 4, 2, 0, 0x30 | cond as u32));
                    let expect = if signals { Err(Exception::FloatingPoint) } else { Ok(()) };
                    assert_eq!(trapped, expect, "{what} with invalid enabled");
                }
            }
        }
    }

    #[test]
    fn traps_check_inputs_and_outputs() {
        let mut core = Core::new(CoreConfig { float_traps: true, ..CoreConfig::default() });
        set_d(&mut core, 2, f64::MAX);
        set_d(&mut core, 4, 2.0);
        set_d(&mut core, 6, 123.0);

        run(&mut core, cop1(D, 4, 2, 6, 0x02)).unwrap(); // MUL.D overflows, not enabled
        assert_eq!(get_d(&core, 6), f64::INFINITY);
        assert_ne!(core.regs.fcr31 & (fcr31::OVERFLOW << fcr31::CAUSE_SHIFT), 0);
        assert_ne!(core.regs.fcr31 & (fcr31::OVERFLOW << fcr31::FLAG_SHIFT), 0);

        set_d(&mut core, 6, 123.0);
        core.regs.fcr31 |= fcr31::OVERFLOW << fcr31::ENABLE_SHIFT;
        assert_eq!(run(&mut core, cop1(D, 4, 2, 6, 0x02)), Err(Exception::FloatingPoint));
        assert_eq!(get_d(&core, 6), 123.0);

        // cause bits are per operation
        set_d(&mut core, 2, 1.0);
        run(&mut core, cop1(D, 4, 2, 6, 0x00)).unwrap();
        assert_eq!(core.regs.fcr31 & fcr31::CAUSE_MASK, 0);
        assert_eq!(get_d(&core, 6), 3.0);

        set_d(&mut core, 2, f64::MIN_POSITIVE / 2.0);
        run(&mut core, cop1(D, 4, 2, 6, 0x00)).unwrap();
        assert_ne!(core.regs.fcr31 & (fcr31::INVALID << fcr31::CAUSE_SHIFT), 0);
    }
}
