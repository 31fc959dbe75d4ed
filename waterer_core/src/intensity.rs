//! Pump ramps driven by a channel's intensity level.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Clamped linear ramp: `initial_value` for levels below
/// `n_steps_not_incrementing`, `final_value` from `n_steps` on, linear in
/// between (truncated toward zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntensityConfig {
    initial_value: i64,
    final_value: i64,
    n_steps: u32,
    n_steps_not_incrementing: u32,
}

impl IntensityConfig {
    pub fn new(
        initial_value: i64,
        final_value: i64,
        n_steps: u32,
        n_steps_not_incrementing: u32,
    ) -> Result<Self, BuildError> {
        if final_value < initial_value {
            return Err(BuildError::InvalidConfig(format!(
                "ramp final_value {final_value} is below initial_value {initial_value}"
            )));
        }
        if n_steps < n_steps_not_incrementing {
            return Err(BuildError::InvalidConfig(format!(
                "ramp n_steps {n_steps} is below n_steps_not_incrementing {n_steps_not_incrementing}"
            )));
        }
        Ok(Self {
            initial_value,
            final_value,
            n_steps,
            n_steps_not_incrementing,
        })
    }

    /// A ramp that always yields `value`.
    pub const fn constant(value: i64) -> Self {
        Self {
            initial_value: value,
            final_value: value,
            n_steps: 0,
            n_steps_not_incrementing: 0,
        }
    }

    pub fn initial_value(&self) -> i64 {
        self.initial_value
    }

    pub fn final_value(&self) -> i64 {
        self.final_value
    }

    pub fn eval(&self, level: u32) -> i64 {
        if level < self.n_steps_not_incrementing {
            return self.initial_value;
        }
        if level >= self.n_steps {
            return self.final_value;
        }
        let x_range = f64::from(self.n_steps - self.n_steps_not_incrementing);
        let y_range = (self.final_value - self.initial_value) as f64;
        let t = f64::from(level - self.n_steps_not_incrementing) / x_range;
        // n_steps > level >= n_steps_not_incrementing, so x_range > 0
        let v = (t * y_range) as i64 + self.initial_value;
        v.clamp(self.initial_value, self.final_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1000)]
    #[case(1, 1000)]
    #[case(2, 1000)]
    #[case(3, 1250)]
    #[case(4, 1500)]
    #[case(5, 1750)]
    #[case(6, 2000)]
    #[case(60, 2000)]
    fn ramp_holds_then_interpolates(#[case] level: u32, #[case] expected: i64) {
        let r = IntensityConfig::new(1000, 2000, 6, 2).unwrap();
        assert_eq!(r.eval(level), expected);
    }

    #[test]
    fn fractional_steps_truncate() {
        let r = IntensityConfig::new(0, 10, 3, 0).unwrap();
        assert_eq!(r.eval(1), 3);
        assert_eq!(r.eval(2), 6);
    }

    #[test]
    fn degenerate_ramp_has_no_slope() {
        let r = IntensityConfig::new(40, 80, 5, 5).unwrap();
        assert_eq!(r.eval(4), 40);
        assert_eq!(r.eval(5), 80);
        assert_eq!(IntensityConfig::constant(7).eval(100), 7);
    }

    #[rstest]
    #[case(10, 5, 4, 0)]
    #[case(0, 5, 2, 3)]
    fn rejects_inverted_ramps(
        #[case] initial: i64,
        #[case] fin: i64,
        #[case] n: u32,
        #[case] flat: u32,
    ) {
        assert!(IntensityConfig::new(initial, fin, n, flat).is_err());
    }
}
