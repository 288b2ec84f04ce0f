//! IEEE arithmetic under a selectable rounding mode.
//!
//! Every operation is computed with the host's round-to-nearest and then corrected. The sign of
//! the rounding error comes from an error-free transform (TwoSum for addition, a fused
//! multiply-add residual for multiplication, division and square root), and a directed mode steps
//! the nearest result by one ulp when it landed on the wrong side of the exact value.

use std::cmp::Ordering;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoundingMode {
    Nearest,
    Truncate,
    Ceil,
    Floor,
}

impl RoundingMode {
    pub fn from_fcr31(fcr31: u32) -> Self {
        match fcr31 & crate::regfile::fcr31::ROUNDING_MODE {
            0 => RoundingMode::Nearest,
            1 => RoundingMode::Truncate,
            2 => RoundingMode::Ceil,
            _ => RoundingMode::Floor,
        }
    }
}

macro_rules! rounded_ops {
    ($module:ident, $t:ident) => {
        pub mod $module {
            use super::RoundingMode;
            use std::cmp::Ordering;

            /// Next representable value towards +inf
            pub fn step_up(x: $t) -> $t {
                if x.is_nan() || x == $t::INFINITY {
                    x
                } else if x == 0.0 {
                    $t::from_bits(1)
                } else if x > 0.0 {
                    $t::from_bits(x.to_bits() + 1)
                } else {
                    $t::from_bits(x.to_bits() - 1)
                }
            }

            /// Next representable value towards -inf
            pub fn step_down(x: $t) -> $t {
                -step_up(-x)
            }

            fn sign(err: $t) -> Ordering {
                err.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
            }

            /// Correct a round-to-nearest result `r`, given the sign of `exact - r`.
            pub fn adjust(r: $t, err: Ordering, mode: RoundingMode) -> $t {
                match (mode, err) {
                    (RoundingMode::Nearest, _) | (_, Ordering::Equal) => r,
                    (RoundingMode::Ceil, Ordering::Greater) => step_up(r),
                    (RoundingMode::Floor, Ordering::Less) => step_down(r),
                    (RoundingMode::Truncate, Ordering::Greater) if r < 0.0 => step_up(r),
                    (RoundingMode::Truncate, Ordering::Less) if r > 0.0 => step_down(r),
                    _ => r,
                }
            }

            /// Result for a finite operation whose exact value is beyond the format's range
            fn overflow(r: $t, mode: RoundingMode) -> $t {
                let positive = r > 0.0;
                match mode {
                    RoundingMode::Nearest => r,
                    RoundingMode::Truncate => if positive { $t::MAX } else { $t::MIN },
                    RoundingMode::Ceil => if positive { r } else { $t::MIN },
                    RoundingMode::Floor => if positive { $t::MAX } else { r },
                }
            }

            pub fn add(a: $t, b: $t, mode: RoundingMode) -> $t {
                let r = a + b;
                if r.is_infinite() && a.is_finite() && b.is_finite() {
                    return overflow(r, mode);
                }
                if !r.is_finite() {
                    return r;
                }
                if r == 0.0 && mode == RoundingMode::Floor && a.is_sign_negative() != b.is_sign_negative() {
                    // exact zero sum of opposite signs is -0 when rounding down
                    return -0.0;
                }
                let bb = r - a;
                let err = (a - (r - bb)) + (b - bb);
                adjust(r, sign(err), mode)
            }

            pub fn sub(a: $t, b: $t, mode: RoundingMode) -> $t {
                add(a, -b, mode)
            }

            pub fn mul(a: $t, b: $t, mode: RoundingMode) -> $t {
                let r = a * b;
                if r.is_infinite() && a.is_finite() && b.is_finite() {
                    return overflow(r, mode);
                }
                if !r.is_finite() {
                    return r;
                }
                let err = a.mul_add(b, -r);
                adjust(r, sign(err), mode)
            }

            pub fn div(a: $t, b: $t, mode: RoundingMode) -> $t {
                let r = a / b;
                if r.is_infinite() && a.is_finite() && b.is_finite() && b != 0.0 {
                    return overflow(r, mode);
                }
                if !r.is_finite() || b == 0.0 {
                    return r;
                }
                // a - r*b carries the sign of (q - r) * b
                let residual = (-r).mul_add(b, a);
                let err = if b < 0.0 { -residual } else { residual };
                adjust(r, sign(err), mode)
            }

            pub fn sqrt(a: $t, mode: RoundingMode) -> $t {
                let r = a.sqrt();
                if !r.is_finite() || r == 0.0 {
                    return r;
                }
                let residual = (-r).mul_add(r, a);
                adjust(r, sign(residual), mode)
            }
        }
    };
}

rounded_ops!(single, f32);
rounded_ops!(double, f64);

/// Round to an integral value in `mode`
pub fn round_integral(x: f64, mode: RoundingMode) -> f64 {
    match mode {
        RoundingMode::Nearest => x.round_ties_even(),
        RoundingMode::Truncate => x.trunc(),
        RoundingMode::Ceil => x.ceil(),
        RoundingMode::Floor => x.floor(),
    }
}

/// Float to 32 bit integer. `None` for NaN and out of range values.
pub fn to_i32(x: f64, mode: RoundingMode) -> Option<i32> {
    let r = round_integral(x, mode);
    if r.is_nan() || r < i32::MIN as f64 || r > i32::MAX as f64 {
        None
    } else {
        Some(r as i32)
    }
}

/// Float to 64 bit integer. `None` for NaN and out of range values.
pub fn to_i64(x: f64, mode: RoundingMode) -> Option<i64> {
    let r = round_integral(x, mode);
    // 2^63 is exactly representable, i64::MAX is not
    if r.is_nan() || r < -9_223_372_036_854_775_808.0 || r >= 9_223_372_036_854_775_808.0 {
        None
    } else {
        Some(r as i64)
    }
}

pub fn i64_to_f64(v: i64, mode: RoundingMode) -> f64 {
    let r = v as f64;
    let err = (v as i128).cmp(&(r as i128));
    double::adjust(r, err, mode)
}

pub fn i64_to_f32(v: i64, mode: RoundingMode) -> f32 {
    let r = v as f32;
    let err = (v as i128).cmp(&(r as i128));
    single::adjust(r, err, mode)
}

/// Narrow a double to single precision
pub fn f64_to_f32(d: f64, mode: RoundingMode) -> f32 {
    let r = d as f32;
    if d.is_nan() {
        return r;
    }
    if r.is_infinite() && d.is_finite() {
        let positive = d > 0.0;
        return match mode {
            RoundingMode::Nearest => r,
            RoundingMode::Truncate => if positive { f32::MAX } else { f32::MIN },
            RoundingMode::Ceil => if positive { r } else { f32::MIN },
            RoundingMode::Floor => if positive { f32::MAX } else { r },
        };
    }
    let err = d.partial_cmp(&(r as f64)).unwrap_or(Ordering::Equal);
    single::adjust(r, err, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use RoundingMode::*;

    #[test]
    fn one_third() {
        let third_down = double::div(1.0, 3.0, Floor);
        let third_up = double::div(1.0, 3.0, Ceil);
        assert_eq!(double::div(1.0, 3.0, Nearest), 1.0 / 3.0);
        assert_eq!(double::step_up(third_down), third_up);
        assert!(third_down < third_up);
        assert_eq!(double::div(1.0, 3.0, Truncate), third_down);
        assert_eq!(double::div(-1.0, 3.0, Truncate), -third_down);
        assert_eq!(double::div(-1.0, 3.0, Floor), -third_up);
    }

    #[test]
    fn exact_results_are_untouched() {
        for mode in [Nearest, Truncate, Ceil, Floor] {
            assert_eq!(double::add(1.5, 2.25, mode), 3.75);
            assert_eq!(single::mul(3.0, 0.5, mode), 1.5);
            assert_eq!(double::sqrt(16.0, mode), 4.0);
            assert_eq!(single::div(1.0, 4.0, mode), 0.25);
        }
    }

    #[test]
    fn add_ulp_boundaries() {
        let tiny = f64::EPSILON / 4.0;
        assert_eq!(double::add(1.0, tiny, Nearest), 1.0);
        assert_eq!(double::add(1.0, tiny, Ceil), 1.0 + f64::EPSILON);
        assert_eq!(double::add(1.0, tiny, Floor), 1.0);
        assert_eq!(double::add(1.0, -tiny, Floor), 1.0 - f64::EPSILON / 2.0);
        assert_eq!(double::add(1.0, -tiny, Truncate), 1.0 - f64::EPSILON / 2.0);
        assert_eq!(double::add(-1.0, -tiny, Truncate), -1.0);
        assert_eq!(single::add(1.0, 1e-10, Ceil), 1.0 + f32::EPSILON);
    }

    #[test]
    fn signed_zero_sums() {
        assert!(double::sub(2.0, 2.0, Floor).is_sign_negative());
        assert!(double::sub(2.0, 2.0, Nearest).is_sign_positive());
    }

    #[test]
    fn overflow_by_mode() {
        assert_eq!(double::mul(f64::MAX, 2.0, Nearest), f64::INFINITY);
        assert_eq!(double::mul(f64::MAX, 2.0, Truncate), f64::MAX);
        assert_eq!(double::mul(f64::MAX, 2.0, Floor), f64::MAX);
        assert_eq!(double::mul(f64::MAX, -2.0, Ceil), f64::MIN);
        assert_eq!(single::add(f32::MAX, f32::MAX, Ceil), f32::INFINITY);
        assert_eq!(double::div(1.0, 0.0, Truncate), f64::INFINITY);
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(to_i32(2.5, Nearest), Some(2));
        assert_eq!(to_i32(3.5, Nearest), Some(4));
        assert_eq!(to_i32(-2.5, Truncate), Some(-2));
        assert_eq!(to_i32(-2.5, Floor), Some(-3));
        assert_eq!(to_i32(2.1, Ceil), Some(3));
        assert_eq!(to_i32(f64::NAN, Nearest), None);
        assert_eq!(to_i32(2147483648.0, Truncate), None);
        assert_eq!(to_i32(-2147483648.4, Truncate), Some(i32::MIN));
        assert_eq!(to_i64(9.3e18, Nearest), None);
        assert_eq!(to_i64(-9_223_372_036_854_775_808.0, Nearest), Some(i64::MIN));
    }

    #[test]
    fn wide_integers_to_float() {
        let v = (1i64 << 53) + 1;
        assert_eq!(i64_to_f64(v, Nearest), (1u64 << 53) as f64);
        assert_eq!(i64_to_f64(v, Ceil), ((1u64 << 53) + 2) as f64);
        assert_eq!(i64_to_f64(-v, Truncate), -((1u64 << 53) as f64));
        assert_eq!(i64_to_f32(16_777_217, Floor), 16_777_216.0);
        assert_eq!(i64_to_f32(16_777_217, Ceil), 16_777_218.0);
        assert_eq!(i64_to_f64(i64::MAX, Truncate), double::step_down(9_223_372_036_854_775_808.0));
    }

    #[test]
    fn narrowing() {
        let d = 1.0 + f64::EPSILON;
        assert_eq!(f64_to_f32(d, Nearest), 1.0);
        assert_eq!(f64_to_f32(d, Ceil), 1.0 + f32::EPSILON);
        assert_eq!(f64_to_f32(-d, Truncate), -1.0);
        assert_eq!(f64_to_f32(1e300, Truncate), f32::MAX);
        assert!(f64_to_f32(f64::NAN, Floor).is_nan());
    }

    proptest! {
        #[test]
        fn directed_modes_bracket_nearest(a in -1e6f64..1e6, b in 1e-3f64..1e6) {
            for r in [
                [double::div(a, b, Floor), double::div(a, b, Nearest), double::div(a, b, Ceil)],
                [double::mul(a, b, Floor), double::mul(a, b, Nearest), double::mul(a, b, Ceil)],
                [double::add(a, b, Floor), double::add(a, b, Nearest), double::add(a, b, Ceil)],
            ] {
                prop_assert!(r[0] <= r[1] && r[1] <= r[2]);
                prop_assert!(r[2] == r[0] || double::step_up(r[0]) == r[2]);
            }
        }
    }
}
