//! Natural cubic spline on a uniform grid.
//!
//! Used to resample solver trajectories at a finer step. The spline is C²,
//! so velocities and accelerations come from its derivatives.

use crate::error::{DmpcError, Result};

/// Natural cubic spline through samples spaced `h` apart, starting at `t = 0`.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    h: f64,
    values: Vec<f64>,
    /// Second derivative at every knot; zero at both ends.
    second: Vec<f64>,
}

impl CubicSpline {
    pub fn natural(values: &[f64], h: f64) -> Result<Self> {
        if values.len() < 2 {
            return Err(DmpcError::configuration(
                "cubic spline needs at least two samples",
            ));
        }
        if !(h > 0.0) {
            return Err(DmpcError::configuration(format!(
                "cubic spline spacing must be positive, got {h}"
            )));
        }

        let n = values.len();
        let mut second = vec![0.0; n];
        let interior = n - 2;
        if interior > 0 {
            // M[i-1] + 4 M[i] + M[i+1] = 6 (y[i+1] - 2 y[i] + y[i-1]) / h²
            let rhs: Vec<f64> = (1..n - 1)
                .map(|i| 6.0 * (values[i + 1] - 2.0 * values[i] + values[i - 1]) / (h * h))
                .collect();
            let solved = solve_tridiagonal(1.0, 4.0, 1.0, &rhs);
            second[1..n - 1].copy_from_slice(&solved);
        }

        Ok(CubicSpline {
            h,
            values: values.to_vec(),
            second,
        })
    }

    pub fn duration(&self) -> f64 {
        self.h * (self.values.len() - 1) as f64
    }

    /// Value, first and second derivative at `t`, clamped to the sampled span.
    pub fn eval(&self, t: f64) -> (f64, f64, f64) {
        let h = self.h;
        let t = t.clamp(0.0, self.duration());
        let last = self.values.len() - 2;
        let i = ((t / h).floor() as usize).min(last);

        let s = t - i as f64 * h;
        let a = h - s;
        let (m0, m1) = (self.second[i], self.second[i + 1]);
        let c0 = self.values[i] / h - m0 * h / 6.0;
        let c1 = self.values[i + 1] / h - m1 * h / 6.0;

        let value = m0 * a.powi(3) / (6.0 * h) + m1 * s.powi(3) / (6.0 * h) + c0 * a + c1 * s;
        let slope = -m0 * a * a / (2.0 * h) + m1 * s * s / (2.0 * h) - c0 + c1;
        let curvature = m0 * a / h + m1 * s / h;
        (value, slope, curvature)
    }
}

/// Thomas algorithm for a constant-coefficient tridiagonal system.
fn solve_tridiagonal(lower: f64, diag: f64, upper: f64, rhs: &[f64]) -> Vec<f64> {
    let n = rhs.len();
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];

    c[0] = upper / diag;
    d[0] = rhs[0] / diag;
    for i in 1..n {
        let denom = diag - lower * c[i - 1];
        c[i] = upper / denom;
        d[i] = (rhs[i] - lower * d[i - 1]) / denom;
    }

    let mut x = vec![0.0; n];
    x[n - 1] = d[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d[i] - c[i] * x[i + 1];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_passes_through_knots() {
        let values = [0.0, 1.0, 0.5, -0.25, 2.0];
        let spline = CubicSpline::natural(&values, 0.2).unwrap();
        for (i, &v) in values.iter().enumerate() {
            assert_relative_eq!(spline.eval(0.2 * i as f64).0, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_linear_data_stays_linear() {
        let values: Vec<f64> = (0..6).map(|i| 1.0 + 0.5 * i as f64).collect();
        let spline = CubicSpline::natural(&values, 0.5).unwrap();
        let (value, slope, curvature) = spline.eval(1.3);
        assert_relative_eq!(value, 1.0 + 1.3, epsilon = 1e-12);
        assert_relative_eq!(slope, 1.0, epsilon = 1e-12);
        assert_relative_eq!(curvature, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_two_samples_interpolate_linearly() {
        let spline = CubicSpline::natural(&[2.0, 4.0], 1.0).unwrap();
        let (value, slope, _) = spline.eval(0.25);
        assert_relative_eq!(value, 2.5, epsilon = 1e-12);
        assert_relative_eq!(slope, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_smooth_across_knots() {
        let values = [0.0, 0.3, 1.1, 0.4, 0.9, 0.0];
        let spline = CubicSpline::natural(&values, 0.2).unwrap();
        for knot in 1..values.len() - 1 {
            let t = 0.2 * knot as f64;
            let before = spline.eval(t - 1e-9);
            let after = spline.eval(t + 1e-9);
            assert_relative_eq!(before.1, after.1, epsilon = 1e-5);
            assert_relative_eq!(before.2, after.2, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_natural_end_conditions() {
        let spline = CubicSpline::natural(&[0.0, 1.0, 0.0, 1.0], 0.1).unwrap();
        assert_relative_eq!(spline.eval(0.0).2, 0.0, epsilon = 1e-12);
        assert_relative_eq!(spline.eval(0.3).2, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(CubicSpline::natural(&[1.0], 0.1).is_err());
        assert!(CubicSpline::natural(&[1.0, 2.0], 0.0).is_err());
    }
}
