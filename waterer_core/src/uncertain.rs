//! Value with a standard error, propagated to first order.
//!
//! Operands are treated as independent. For `z = f(x, y)`:
//!
//! - `x ± y`: `σz = √(σx² + σy²)`
//! - `x · y`: `σz = √((σx·y)² + (x·σy)²)`
//! - `x / y`: `σz = √((σx/y)² + (x·σy/y²)²)`
//!
//! Calibration (offset, slope), raw statistics and physical weights all use
//! this one type so the formulas exist in exactly one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Uncertain {
    pub value: f64,
    pub stderr: f64,
}

impl Uncertain {
    #[inline]
    pub const fn new(value: f64, stderr: f64) -> Self {
        Self { value, stderr }
    }

    /// A value known without error.
    #[inline]
    pub const fn exact(value: f64) -> Self {
        Self { value, stderr: 0.0 }
    }

    pub fn is_finite(&self) -> bool {
        self.value.is_finite() && self.stderr.is_finite()
    }
}

impl fmt::Display for Uncertain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match f.precision() {
            Some(p) => write!(f, "{:.p$} ± {:.p$}", self.value, self.stderr),
            None => write!(f, "{} ± {}", self.value, self.stderr),
        }
    }
}

impl From<f64> for Uncertain {
    fn from(value: f64) -> Self {
        Self::exact(value)
    }
}

impl Neg for Uncertain {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.value, self.stderr)
    }
}

impl Add for Uncertain {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.value + rhs.value, self.stderr.hypot(rhs.stderr))
    }
}

impl Sub for Uncertain {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.value - rhs.value, self.stderr.hypot(rhs.stderr))
    }
}

impl Mul for Uncertain {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        let err = (self.stderr * rhs.value).hypot(self.value * rhs.stderr);
        Self::new(self.value * rhs.value, err)
    }
}

impl Div for Uncertain {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let a = self.stderr / rhs.value;
        let b = self.value * rhs.stderr / (rhs.value * rhs.value);
        Self::new(self.value / rhs.value, a.hypot(b))
    }
}

impl Mul<f64> for Uncertain {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        self * Self::exact(rhs)
    }
}

impl Div<f64> for Uncertain {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        self / Self::exact(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn add_and_sub_combine_in_quadrature() {
        let a = Uncertain::new(5.0, 3.0);
        let b = Uncertain::new(2.0, 4.0);
        assert_eq!(a + b, Uncertain::new(7.0, 5.0));
        assert_eq!(a - b, Uncertain::new(3.0, 5.0));
    }

    #[test]
    fn mul_propagates_relative_errors() {
        let z = Uncertain::new(2.0, 0.1) * Uncertain::new(3.0, 0.2);
        assert!(close(z.value, 6.0));
        assert!(close(z.stderr, (0.3f64.powi(2) + 0.4f64.powi(2)).sqrt()));
    }

    #[test]
    fn div_matches_reference_formula() {
        let (x, sx, y, sy) = (20.0, 0.5, 4.0, 0.1);
        let z = Uncertain::new(x, sx) / Uncertain::new(y, sy);
        let reference = ((sx / y).powi(2) + (x * sy / (y * y)).powi(2)).sqrt();
        assert!(close(z.value, 5.0));
        assert!(close(z.stderr, reference));
    }

    #[test]
    fn exact_scalars_do_not_add_error() {
        let z = Uncertain::new(10.0, 0.2) / 2.0;
        assert_eq!(z, Uncertain::new(5.0, 0.1));
    }

    #[test]
    fn display_honours_precision() {
        assert_eq!(format!("{:.1}", Uncertain::new(1.25, 0.05)), "1.2 ± 0.1");
    }
}
