//! Forward-mode automatic differentiation with a dynamic number of derivative slots.
//!
//! [`Fad`] pairs a value with a vector of partial derivatives. Every arithmetic operation
//! applies the chain rule to the derivative vector, so code written against
//! [`FieldScalar`](fieldgraph_traits::FieldScalar) computes derivatives alongside values.
//!
//! A `Fad` with an empty derivative vector is a constant. Combining a constant with an
//! `n`-slot number yields an `n`-slot number, which means that constants never need to be
//! resized before use.
use fieldgraph_traits::{FieldScalar, Real};
use num::{One, Zero};
use std::fmt;
use std::fmt::Display;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// A forward-mode dual number.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fad<T> {
    val: T,
    dx: Vec<T>,
}

impl<T: Real> Fad<T> {
    /// A constant with no derivative slots.
    pub fn constant(val: T) -> Self {
        Self { val, dx: Vec::new() }
    }

    /// A number with `num_derivatives` zeroed slots, except `slot` which is one.
    pub fn variable(val: T, num_derivatives: usize, slot: usize) -> Self {
        Self::seeded(val, num_derivatives, slot, T::one())
    }

    /// A number with `num_derivatives` zeroed slots, except `slot` which holds `seed`.
    pub fn seeded(val: T, num_derivatives: usize, slot: usize, seed: T) -> Self {
        assert!(slot < num_derivatives, "Seed slot must be in bounds.");
        let mut dx = vec![T::zero(); num_derivatives];
        dx[slot] = seed;
        Self { val, dx }
    }

    pub fn from_value_and_derivatives(val: T, dx: Vec<T>) -> Self {
        Self { val, dx }
    }

    pub fn value(&self) -> T {
        self.val
    }

    pub fn set_value(&mut self, val: T) {
        self.val = val;
    }

    pub fn dx(&self) -> &[T] {
        &self.dx
    }

    pub fn dx_mut(&mut self) -> &mut Vec<T> {
        &mut self.dx
    }

    /// The derivative in the given slot, or zero for slots that are not stored.
    pub fn partial(&self, slot: usize) -> T {
        self.dx.get(slot).copied().unwrap_or_else(T::zero)
    }

    pub fn num_derivatives(&self) -> usize {
        self.dx.len()
    }

    pub fn is_constant(&self) -> bool {
        self.dx.is_empty()
    }

    /// Resizes the derivative vector, zero-filling new slots.
    pub fn resize(&mut self, num_derivatives: usize) {
        self.dx.resize(num_derivatives, T::zero());
    }

    /// Applies a scalar function with value `f` and derivative `df` at the current value.
    fn chain(&self, f: T, df: T) -> Self {
        Self {
            val: f,
            dx: self.dx.iter().map(|d| df * *d).collect(),
        }
    }

    pub fn sqrt(&self) -> Self {
        let v = self.val.sqrt();
        self.chain(v, T::one() / (v + v))
    }

    pub fn exp(&self) -> Self {
        let v = self.val.exp();
        self.chain(v, v)
    }

    pub fn ln(&self) -> Self {
        self.chain(self.val.ln(), T::one() / self.val)
    }

    pub fn abs(&self) -> Self {
        if self.val < T::zero() {
            -self.clone()
        } else {
            self.clone()
        }
    }

    pub fn powf(&self, exponent: T) -> Self {
        if exponent == T::zero() {
            return self.chain(T::one(), T::zero());
        }
        let v = self.val.powf(exponent);
        self.chain(v, exponent * self.val.powf(exponent - T::one()))
    }

    /// `self` raised to a dual-number exponent.
    ///
    /// The `ln(self)` contribution is only formed when the exponent carries derivatives,
    /// so constant exponents remain valid for non-positive bases.
    pub fn pow(&self, exponent: &Self) -> Self {
        if exponent.is_constant() {
            return self.powf(exponent.val);
        }
        let v = self.val.powf(exponent.val);
        let da = if exponent.val == T::zero() {
            T::zero()
        } else {
            exponent.val * self.val.powf(exponent.val - T::one())
        };
        let db = v * self.val.ln();
        Self {
            val: v,
            dx: combine(&self.dx, da, &exponent.dx, db),
        }
    }

    pub fn min(&self, other: &Self) -> Self {
        if self.val <= other.val {
            self.clone()
        } else {
            other.clone()
        }
    }

    pub fn max(&self, other: &Self) -> Self {
        if self.val >= other.val {
            self.clone()
        } else {
            other.clone()
        }
    }
}

/// Computes `ca * a + cb * b`, treating empty slices as zero vectors of matching length.
fn combine<T: Real>(a: &[T], ca: T, b: &[T], cb: T) -> Vec<T> {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Vec::new(),
        (false, true) => a.iter().map(|x| ca * *x).collect(),
        (true, false) => b.iter().map(|x| cb * *x).collect(),
        (false, false) => {
            debug_assert_eq!(a.len(), b.len(), "Derivative dimensions must agree");
            a.iter().zip(b).map(|(x, y)| ca * *x + cb * *y).collect()
        }
    }
}

/// Computes `dst <- ca * dst + cb * src` in place, treating empty slices as zero vectors.
fn combine_into<T: Real>(dst: &mut Vec<T>, ca: T, src: &[T], cb: T) {
    if src.is_empty() {
        dst.iter_mut().for_each(|x| *x *= ca);
    } else if dst.is_empty() {
        dst.extend(src.iter().map(|y| cb * *y));
    } else {
        debug_assert_eq!(dst.len(), src.len(), "Derivative dimensions must agree");
        for (x, y) in dst.iter_mut().zip(src) {
            *x = ca * *x + cb * *y;
        }
    }
}

impl<T: Real> From<T> for Fad<T> {
    fn from(val: T) -> Self {
        Self::constant(val)
    }
}

impl<T: Real + Display> Display for Fad<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.val)?;
        for (i, d) in self.dx.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl<'b, T: Real> AddAssign<&'b Fad<T>> for Fad<T> {
    fn add_assign(&mut self, rhs: &'b Fad<T>) {
        self.val += rhs.val;
        combine_into(&mut self.dx, T::one(), &rhs.dx, T::one());
    }
}

impl<'b, T: Real> SubAssign<&'b Fad<T>> for Fad<T> {
    fn sub_assign(&mut self, rhs: &'b Fad<T>) {
        self.val -= rhs.val;
        combine_into(&mut self.dx, T::one(), &rhs.dx, -T::one());
    }
}

impl<'b, T: Real> MulAssign<&'b Fad<T>> for Fad<T> {
    fn mul_assign(&mut self, rhs: &'b Fad<T>) {
        let a = self.val;
        combine_into(&mut self.dx, rhs.val, &rhs.dx, a);
        self.val = a * rhs.val;
    }
}

impl<'b, T: Real> DivAssign<&'b Fad<T>> for Fad<T> {
    fn div_assign(&mut self, rhs: &'b Fad<T>) {
        let v = self.val / rhs.val;
        let inv = T::one() / rhs.val;
        combine_into(&mut self.dx, inv, &rhs.dx, -v * inv);
        self.val = v;
    }
}

macro_rules! impl_binary_ops {
    ($op_trait:ident, $op_fn:ident, $assign_trait:ident, $assign_fn:ident) => {
        impl<T: Real> $assign_trait<Fad<T>> for Fad<T> {
            fn $assign_fn(&mut self, rhs: Fad<T>) {
                $assign_trait::$assign_fn(self, &rhs);
            }
        }

        impl<T: Real> $op_trait<Fad<T>> for Fad<T> {
            type Output = Fad<T>;
            fn $op_fn(mut self, rhs: Fad<T>) -> Fad<T> {
                $assign_trait::$assign_fn(&mut self, &rhs);
                self
            }
        }

        impl<'b, T: Real> $op_trait<&'b Fad<T>> for Fad<T> {
            type Output = Fad<T>;
            fn $op_fn(mut self, rhs: &'b Fad<T>) -> Fad<T> {
                $assign_trait::$assign_fn(&mut self, rhs);
                self
            }
        }

        impl<'a, 'b, T: Real> $op_trait<&'b Fad<T>> for &'a Fad<T> {
            type Output = Fad<T>;
            fn $op_fn(self, rhs: &'b Fad<T>) -> Fad<T> {
                let mut result = self.clone();
                $assign_trait::$assign_fn(&mut result, rhs);
                result
            }
        }

        impl<'a, T: Real> $op_trait<Fad<T>> for &'a Fad<T> {
            type Output = Fad<T>;
            fn $op_fn(self, rhs: Fad<T>) -> Fad<T> {
                let mut result = self.clone();
                $assign_trait::$assign_fn(&mut result, &rhs);
                result
            }
        }
    };
}

impl_binary_ops!(Add, add, AddAssign, add_assign);
impl_binary_ops!(Sub, sub, SubAssign, sub_assign);
impl_binary_ops!(Mul, mul, MulAssign, mul_assign);
impl_binary_ops!(Div, div, DivAssign, div_assign);

impl<T: Real> Neg for Fad<T> {
    type Output = Fad<T>;

    fn neg(mut self) -> Fad<T> {
        self.val = -self.val;
        self.dx.iter_mut().for_each(|d| *d = -*d);
        self
    }
}

impl<'a, T: Real> Neg for &'a Fad<T> {
    type Output = Fad<T>;

    fn neg(self) -> Fad<T> {
        -self.clone()
    }
}

// Mixed operations with plain scalars are implemented for concrete float types.
macro_rules! impl_scalar_ops {
    ($t:ty) => {
        impl AddAssign<$t> for Fad<$t> {
            fn add_assign(&mut self, rhs: $t) {
                self.val += rhs;
            }
        }

        impl SubAssign<$t> for Fad<$t> {
            fn sub_assign(&mut self, rhs: $t) {
                self.val -= rhs;
            }
        }

        impl MulAssign<$t> for Fad<$t> {
            fn mul_assign(&mut self, rhs: $t) {
                self.val *= rhs;
                self.dx.iter_mut().for_each(|d| *d *= rhs);
            }
        }

        impl DivAssign<$t> for Fad<$t> {
            fn div_assign(&mut self, rhs: $t) {
                self.val /= rhs;
                self.dx.iter_mut().for_each(|d| *d /= rhs);
            }
        }

        impl Add<$t> for Fad<$t> {
            type Output = Fad<$t>;
            fn add(mut self, rhs: $t) -> Fad<$t> {
                self += rhs;
                self
            }
        }

        impl Sub<$t> for Fad<$t> {
            type Output = Fad<$t>;
            fn sub(mut self, rhs: $t) -> Fad<$t> {
                self -= rhs;
                self
            }
        }

        impl Mul<$t> for Fad<$t> {
            type Output = Fad<$t>;
            fn mul(mut self, rhs: $t) -> Fad<$t> {
                self *= rhs;
                self
            }
        }

        impl Div<$t> for Fad<$t> {
            type Output = Fad<$t>;
            fn div(mut self, rhs: $t) -> Fad<$t> {
                self /= rhs;
                self
            }
        }

        impl Add<Fad<$t>> for $t {
            type Output = Fad<$t>;
            fn add(self, rhs: Fad<$t>) -> Fad<$t> {
                rhs + self
            }
        }

        impl Sub<Fad<$t>> for $t {
            type Output = Fad<$t>;
            fn sub(self, rhs: Fad<$t>) -> Fad<$t> {
                -rhs + self
            }
        }

        impl Mul<Fad<$t>> for $t {
            type Output = Fad<$t>;
            fn mul(self, rhs: Fad<$t>) -> Fad<$t> {
                rhs * self
            }
        }

        impl Div<Fad<$t>> for $t {
            type Output = Fad<$t>;
            fn div(self, rhs: Fad<$t>) -> Fad<$t> {
                Fad::constant(self) / rhs
            }
        }
    };
}

impl_scalar_ops!(f64);
impl_scalar_ops!(f32);

impl<T: Real> Zero for Fad<T> {
    fn zero() -> Self {
        Self::constant(T::zero())
    }

    fn is_zero(&self) -> bool {
        self.val.is_zero() && self.dx.iter().all(|d| d.is_zero())
    }
}

impl<T: Real> One for Fad<T> {
    fn one() -> Self {
        Self::constant(T::one())
    }
}

impl<T: Real> Sum for Fad<T> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, x| acc + x)
    }
}

impl FieldScalar for Fad<f64> {
    #[inline]
    fn val(&self) -> f64 {
        self.val
    }

    #[inline]
    fn derivatives(&self) -> &[f64] {
        &self.dx
    }

    fn from_parts(value: f64, derivatives: &[f64]) -> Self {
        Self::from_value_and_derivatives(value, derivatives.to_vec())
    }

    fn seeded(value: f64, num_derivatives: usize, slot: usize, seed: f64) -> Self {
        Fad::seeded(value, num_derivatives, slot, seed)
    }

    fn sqrt(&self) -> Self {
        Fad::sqrt(self)
    }

    fn exp(&self) -> Self {
        Fad::exp(self)
    }

    fn ln(&self) -> Self {
        Fad::ln(self)
    }

    fn powf(&self, exponent: f64) -> Self {
        Fad::powf(self, exponent)
    }

    fn pow(&self, exponent: &Self) -> Self {
        Fad::pow(self, exponent)
    }

    fn abs(&self) -> Self {
        Fad::abs(self)
    }

    fn min(&self, other: &Self) -> Self {
        Fad::min(self, other)
    }

    fn max(&self, other: &Self) -> Self {
        Fad::max(self, other)
    }
}
