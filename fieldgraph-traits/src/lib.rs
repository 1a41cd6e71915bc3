use nalgebra::RealField;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

pub use nalgebra;

pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

/// The scalar capability required of every value stored in a field.
///
/// A field scalar is either a plain real number or a forward-mode dual number carrying
/// a value together with partial derivatives. Evaluators are written once against this trait
/// and the chain rule is propagated by the arithmetic of the concrete type.
///
/// Values with an empty derivative vector are constants. Plain reals always report an empty
/// derivative vector.
pub trait FieldScalar:
    Clone
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + From<f64>
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + AddAssign<f64>
    + MulAssign<f64>
{
    /// The plain value.
    fn val(&self) -> f64;

    /// The partial derivatives. Empty for constants.
    fn derivatives(&self) -> &[f64];

    /// Constructs a scalar from its value and derivatives.
    ///
    /// Types without derivative storage discard the derivatives.
    fn from_parts(value: f64, derivatives: &[f64]) -> Self;

    /// Constructs a scalar with `num_derivatives` zeroed slots, except for `slot`, which holds `seed`.
    fn seeded(value: f64, num_derivatives: usize, slot: usize, seed: f64) -> Self;

    fn num_derivatives(&self) -> usize {
        self.derivatives().len()
    }

    /// The derivative in the given slot, or zero if the slot is not stored.
    fn dx(&self, slot: usize) -> f64 {
        self.derivatives().get(slot).copied().unwrap_or(0.0)
    }

    /// Converts a scalar of another (weaker or equal) type into this type.
    fn promote_from<S: FieldScalar>(other: &S) -> Self {
        Self::from_parts(other.val(), other.derivatives())
    }

    fn sqrt(&self) -> Self;
    fn exp(&self) -> Self;
    fn ln(&self) -> Self;
    fn powf(&self, exponent: f64) -> Self;
    fn pow(&self, exponent: &Self) -> Self;
    fn abs(&self) -> Self;

    /// The smaller of the two values. Ties select `self`, including its derivatives.
    fn min(&self, other: &Self) -> Self;

    /// The larger of the two values. Ties select `self`, including its derivatives.
    fn max(&self, other: &Self) -> Self;

    /// Whether the value and all derivatives are finite.
    fn is_finite(&self) -> bool {
        self.val().is_finite() && self.derivatives().iter().all(|d| d.is_finite())
    }
}

impl FieldScalar for f64 {
    #[inline]
    fn val(&self) -> f64 {
        *self
    }

    #[inline]
    fn derivatives(&self) -> &[f64] {
        &[]
    }

    #[inline]
    fn from_parts(value: f64, derivatives: &[f64]) -> Self {
        debug_assert!(
            derivatives.iter().all(|d| *d == 0.0),
            "Non-zero derivatives would be lost in conversion to f64"
        );
        value
    }

    #[inline]
    fn seeded(value: f64, _num_derivatives: usize, _slot: usize, _seed: f64) -> Self {
        value
    }

    fn sqrt(&self) -> Self {
        f64::sqrt(*self)
    }

    fn exp(&self) -> Self {
        f64::exp(*self)
    }

    fn ln(&self) -> Self {
        f64::ln(*self)
    }

    fn powf(&self, exponent: f64) -> Self {
        f64::powf(*self, exponent)
    }

    fn pow(&self, exponent: &Self) -> Self {
        f64::powf(*self, *exponent)
    }

    fn abs(&self) -> Self {
        f64::abs(*self)
    }

    fn min(&self, other: &Self) -> Self {
        if *self <= *other {
            *self
        } else {
            *other
        }
    }

    fn max(&self, other: &Self) -> Self {
        if *self >= *other {
            *self
        } else {
            *other
        }
    }
}
