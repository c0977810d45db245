use crate::output::Scalar;
use num_traits::{
    PrimInt, Signed, WrappingAdd, WrappingMul, WrappingNeg, WrappingShl, WrappingShr, WrappingSub,
};
use std::fmt;

/// Machine cell: the data-stack element and bytecode word. The two concrete
/// widths are `i32` and `i64`, chosen when the machine is instantiated.
pub trait Cell:
    PrimInt
    + Signed
    + WrappingAdd
    + WrappingSub
    + WrappingMul
    + WrappingNeg
    + WrappingShl
    + WrappingShr
    + fmt::Display
    + fmt::Debug
    + 'static
{
    fn from_i64(v: i64) -> Self;
    fn from_u64(v: u64) -> Self;
    fn from_f64(v: f64) -> Self;
    fn to_i64(self) -> i64;

    /// The dialect's truth values: -1 for true, 0 for false.
    fn truth(t: bool) -> Self {
        if t {
            Self::from_i64(-1)
        } else {
            Self::zero()
        }
    }

    fn from_scalar(s: Scalar) -> Self {
        match s {
            Scalar::Bool(b) => Self::from_i64(b as i64),
            Scalar::Int(v) => Self::from_i64(v),
            Scalar::UInt(v) => Self::from_u64(v),
            Scalar::Float(v) => Self::from_f64(v),
        }
    }
}

macro_rules! impl_cell {
    ($ty:ty) => {
        impl Cell for $ty {
            fn from_i64(v: i64) -> Self {
                v as $ty
            }
            fn from_u64(v: u64) -> Self {
                v as $ty
            }
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
            fn to_i64(self) -> i64 {
                self as i64
            }
        }
    };
}

impl_cell!(i32);
impl_cell!(i64);

/// Floored quotient (rounds toward negative infinity). The divisor must be
/// nonzero; callers report `division_by_zero` themselves.
pub fn floored_div<T: Cell>(a: T, b: T) -> T {
    if b == T::truth(true) {
        return a.wrapping_neg();
    }
    let t = a / b;
    if t * b == a {
        t
    } else {
        t - T::from_i64(((a < T::zero()) != (b < T::zero())) as i64)
    }
}

/// Remainder matching `floored_div`; its sign follows the divisor.
pub fn floored_mod<T: Cell>(a: T, b: T) -> T {
    if b == T::truth(true) || b == T::one() {
        return T::zero();
    }
    let r = a % b;
    if r == T::zero() || (r < T::zero()) == (b < T::zero()) {
        r
    } else {
        r + b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floored_div() {
        assert_eq!(3, floored_div(7i64, 2));
        assert_eq!(-4, floored_div(-7i64, 2));
        assert_eq!(-4, floored_div(7i64, -2));
        assert_eq!(3, floored_div(-7i64, -2));
        assert_eq!(-1073741824, floored_div(i32::MIN + 1, 2));
    }

    #[test]
    fn test_floored_mod() {
        assert_eq!(1, floored_mod(7i64, 2));
        assert_eq!(1, floored_mod(-7i64, 2));
        assert_eq!(-1, floored_mod(7i64, -2));
        assert_eq!(-1, floored_mod(-7i64, -2));
        assert_eq!(0, floored_mod(5i64, 1));
    }

    #[test]
    fn test_extreme_operands() {
        assert_eq!(i64::MIN, floored_div(i64::MIN, -1));
        assert_eq!(0, floored_mod(i64::MIN, -1));
        assert_eq!(i32::MIN, floored_div(i32::MIN, 1));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(-1i32, Cell::from_i64(0xffff_ffff));
        assert_eq!(-1i64, Cell::from_u64(u64::MAX));
        assert_eq!(3i64, Cell::from_f64(3.9));
        assert_eq!(-1i32, i32::truth(true));
        assert_eq!(0i32, i32::truth(false));
    }
}
