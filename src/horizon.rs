//! # Horizon Matrices
//!
//! Time-invariant matrices that propagate the discretized double integrator
//! over a horizon of `K` steps. The state is `(p, v)`, the input is the
//! acceleration `a`, and one step of length `h` is
//!
//! ```text
//! p+ = p + h v + h²/2 a
//! v+ = v + h a
//! ```
//!
//! With `u = [a_0, ..., a_{K-1}]` stacked into a `3K` vector, the predicted
//! positions are `lambda * u + a0 * x0` and the predicted velocities are
//! `a_v * u + [v0; ...; v0]`.

use nalgebra::{DMatrix, Matrix3, Matrix6, Matrix6x3};

/// Propagation matrices for one horizon length and timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonMatrices {
    pub horizon: usize,
    pub h: f64,
    /// `3K x 3K`: inputs to positions at steps 1..K.
    pub lambda: DMatrix<f64>,
    /// `3K x 3K`: inputs to velocities at steps 1..K.
    pub a_v: DMatrix<f64>,
    /// `3K x 3K`: first differences of consecutive inputs.
    pub delta: DMatrix<f64>,
    /// `3K x 6`: uncontrolled propagation of `(p, v)` to positions at steps 1..K.
    pub a0: DMatrix<f64>,
}

/// State transition and input matrices of one step.
pub fn step_model(h: f64) -> (Matrix6<f64>, Matrix6x3<f64>) {
    let eye = Matrix3::<f64>::identity();
    let mut a = Matrix6::<f64>::identity();
    a.fixed_view_mut::<3, 3>(0, 3).copy_from(&(eye * h));
    let mut b = Matrix6x3::<f64>::zeros();
    b.fixed_view_mut::<3, 3>(0, 0).copy_from(&(eye * (h * h / 2.0)));
    b.fixed_view_mut::<3, 3>(3, 0).copy_from(&(eye * h));
    (a, b)
}

impl HorizonMatrices {
    pub fn new(horizon: usize, h: f64) -> Self {
        let (a, b) = step_model(h);
        let n = 3 * horizon;

        // impulse[d] = A^d * b: effect of an input applied d steps earlier
        let mut impulse = Vec::with_capacity(horizon);
        let mut phi = b;
        for _ in 0..horizon {
            impulse.push(phi);
            phi = a * phi;
        }

        let mut lambda = DMatrix::zeros(n, n);
        let mut a_v = DMatrix::zeros(n, n);
        for i in 0..horizon {
            for j in 0..=i {
                let block = &impulse[i - j];
                lambda
                    .fixed_view_mut::<3, 3>(3 * i, 3 * j)
                    .copy_from(&block.fixed_view::<3, 3>(0, 0));
                a_v.fixed_view_mut::<3, 3>(3 * i, 3 * j)
                    .copy_from(&block.fixed_view::<3, 3>(3, 0));
            }
        }

        let mut delta = DMatrix::identity(n, n);
        for i in 1..horizon {
            delta
                .fixed_view_mut::<3, 3>(3 * i, 3 * (i - 1))
                .copy_from(&(-Matrix3::<f64>::identity()));
        }

        let mut a0 = DMatrix::zeros(n, 6);
        let mut power = a;
        for i in 0..horizon {
            a0.fixed_view_mut::<3, 6>(3 * i, 0)
                .copy_from(&power.fixed_view::<3, 6>(0, 0));
            power = a * power;
        }

        HorizonMatrices {
            horizon,
            h,
            lambda,
            a_v,
            delta,
            a0,
        }
    }

    pub fn n_vars(&self) -> usize {
        3 * self.horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{DVector, Vector3, Vector6};

    fn simulate(h: f64, p: Vector3<f64>, v: Vector3<f64>, inputs: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        let (a, b) = step_model(h);
        let mut x = Vector6::new(p.x, p.y, p.z, v.x, v.y, v.z);
        let mut positions = Vec::new();
        for u in inputs {
            x = a * x + b * u;
            positions.push(Vector3::new(x[0], x[1], x[2]));
        }
        positions
    }

    #[test]
    fn test_matrix_shapes() {
        let m = HorizonMatrices::new(4, 0.2);
        assert_eq!(m.lambda.shape(), (12, 12));
        assert_eq!(m.a_v.shape(), (12, 12));
        assert_eq!(m.delta.shape(), (12, 12));
        assert_eq!(m.a0.shape(), (12, 6));
    }

    #[test]
    fn test_builder_is_pure() {
        let first = HorizonMatrices::new(15, 0.2);
        let second = HorizonMatrices::new(15, 0.2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_lambda_matches_step_by_step_simulation() {
        let h = 0.2;
        let k = 6;
        let m = HorizonMatrices::new(k, h);
        let p0 = Vector3::new(1.0, -2.0, 0.5);
        let v0 = Vector3::new(0.3, 0.1, -0.2);
        let inputs: Vec<Vector3<f64>> = (0..k)
            .map(|i| Vector3::new(0.1 * i as f64, -0.05, 0.2 - 0.03 * i as f64))
            .collect();

        let u = DVector::from_iterator(3 * k, inputs.iter().flat_map(|a| a.iter().copied()));
        let x0 = DVector::from_vec(vec![p0.x, p0.y, p0.z, v0.x, v0.y, v0.z]);
        let stacked = &m.lambda * &u + &m.a0 * &x0;

        for (i, expected) in simulate(h, p0, v0, &inputs).iter().enumerate() {
            for axis in 0..3 {
                assert_relative_eq!(stacked[3 * i + axis], expected[axis], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_velocity_matrix_accumulates_inputs() {
        let m = HorizonMatrices::new(3, 0.5);
        let u = DVector::from_vec(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0, -2.0, 0.0, 0.0]);
        let velocities = &m.a_v * &u;
        assert_relative_eq!(velocities[0], 0.5);
        assert_relative_eq!(velocities[3], 1.0);
        assert_relative_eq!(velocities[6], 0.0);
    }

    #[test]
    fn test_delta_is_banded_difference() {
        let m = HorizonMatrices::new(3, 0.2);
        let u = DVector::from_vec(vec![1.0, 2.0, 3.0, 1.5, 2.0, 2.0, 0.0, 0.0, 0.0]);
        let diff = &m.delta * &u;
        assert_relative_eq!(diff[0], 1.0);
        assert_relative_eq!(diff[3], 0.5);
        assert_relative_eq!(diff[5], -1.0);
        assert_relative_eq!(diff[6], -1.5);
    }

    #[test]
    fn test_a0_uncontrolled_drift() {
        let m = HorizonMatrices::new(5, 0.2);
        let x0 = DVector::from_vec(vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        let drift = &m.a0 * &x0;
        assert_relative_eq!(drift[12], 1.0, epsilon = 1e-12);
        assert_relative_eq!(drift[14], 1.0, epsilon = 1e-12);
    }
}
