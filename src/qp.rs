//! # Per-Agent Step QP
//!
//! Formulates the horizon optimization of one agent as a QP over its stacked
//! accelerations `u` and solves it with OSQP:
//!
//! ```text
//! min  q |lambda u + a0 x0 - P_ref|² + s |delta u - d0|² + r |u|²
//! s.t. pmin <= lambda u + a0 x0 <= pmax        (workspace, every step)
//!      -alim <= u <= alim                      (per axis, every step)
//!      A_coll u >= b_coll                      (linearized separation)
//! ```
//!
//! `P_ref` repeats the goal over the horizon and `d0` carries the previously
//! applied acceleration into the first input-variation term. The Hessian only
//! depends on the horizon and weights, so it is built once per solver.
//!
//! When OSQP cannot return a usable solution the agent keeps its velocity and
//! applies no control for that step. A failed step never stops the run.

use crate::config::DmpcConfig;
use crate::horizon::HorizonMatrices;
use crate::structs::{AgentState, Constraint, Point3};
use nalgebra::{DMatrix, DVector, Vector3};
use osqp::{CscMatrix, Problem, Settings};
use std::borrow::Cow;

/// Result of advancing one agent by one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub state: AgentState,
    /// Predicted positions for the next `k_hor` steps, starting one step ahead.
    pub prediction: Vec<Point3>,
    /// False when the QP failed and the fallback was applied.
    pub solved: bool,
}

pub struct StepSolver {
    config: DmpcConfig,
    matrices: HorizonMatrices,
    hessian: DMatrix<f64>,
    delta_t: DMatrix<f64>,
}

impl StepSolver {
    pub fn new(config: &DmpcConfig, matrices: HorizonMatrices) -> Self {
        let n = matrices.n_vars();
        let w = &config.weights;
        let hessian = (matrices.lambda.transpose() * &matrices.lambda * w.tracking
            + matrices.delta.transpose() * &matrices.delta * w.variation
            + DMatrix::<f64>::identity(n, n) * w.effort)
            * 2.0;
        let delta_t = matrices.delta.transpose();
        StepSolver {
            config: config.clone(),
            matrices,
            hessian,
            delta_t,
        }
    }

    pub fn matrices(&self) -> &HorizonMatrices {
        &self.matrices
    }

    /// Current `(p, v)` as the stacked initial state of the horizon matrices.
    pub fn initial_state(state: &AgentState) -> DVector<f64> {
        let p = state.position;
        let v = state.velocity;
        DVector::from_vec(vec![p.x, p.y, p.z, v.x, v.y, v.z])
    }

    /// Solves the step QP and advances the agent by one step.
    pub fn solve_qp(&self, state: &AgentState, goal: &Point3, collisions: &Constraint) -> StepOutcome {
        match self.optimize(state, goal, collisions) {
            Some(inputs) => self.apply(state, &inputs),
            None => self.hold(state),
        }
    }

    fn optimize(&self, state: &AgentState, goal: &Point3, collisions: &Constraint) -> Option<DVector<f64>> {
        let m = &self.matrices;
        let k = m.horizon;
        let n = m.n_vars();
        let w = &self.config.weights;

        let x0 = Self::initial_state(state);
        let drift = &m.a0 * &x0;
        let reference = DVector::from_fn(n, |i, _| goal[i % 3]);

        let mut previous = DVector::<f64>::zeros(n);
        previous.rows_mut(0, 3).copy_from(&state.acceleration);

        let linear = (m.lambda.transpose() * (&drift - &reference) * w.tracking
            - &self.delta_t * previous * w.variation)
            * 2.0;

        // l <= A u <= u with rows [workspace; acceleration box; collisions]
        let rows = 2 * n + collisions.rows();
        let mut a = DMatrix::<f64>::zeros(rows, n);
        a.view_mut((0, 0), (n, n)).copy_from(&m.lambda);
        a.view_mut((n, 0), (n, n)).fill_with_identity();
        if !collisions.is_empty() {
            a.view_mut((2 * n, 0), (collisions.rows(), n)).copy_from(&collisions.a);
        }

        let pmin = self.config.workspace_min();
        let pmax = self.config.workspace_max();
        let mut lower = Vec::with_capacity(rows);
        let mut upper = Vec::with_capacity(rows);
        for step in 0..k {
            for axis in 0..3 {
                let d = drift[3 * step + axis];
                lower.push(pmin[axis] - d);
                upper.push(pmax[axis] - d);
            }
        }
        for _ in 0..n {
            lower.push(-self.config.alim);
            upper.push(self.config.alim);
        }
        for row in 0..collisions.rows() {
            lower.push(collisions.b[row]);
            upper.push(f64::INFINITY);
        }

        let settings = Settings::default()
            .verbose(false)
            .eps_abs(self.config.solver.eps_abs)
            .eps_rel(self.config.solver.eps_rel)
            .max_iter(self.config.solver.max_iter)
            .polishing(self.config.solver.polishing);

        let mut problem = match Problem::new(
            csc_from_dense(&self.hessian, true),
            linear.as_slice(),
            csc_from_dense(&a, false),
            &lower,
            &upper,
            &settings,
        ) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("OSQP setup failed: {e:?}");
                return None;
            }
        };

        let result = problem.solve();
        match &result {
            osqp::Status::Solved(sol) | osqp::Status::SolvedInaccurate(sol) => {
                let x = sol.x();
                if x.iter().all(|v| v.is_finite()) {
                    Some(DVector::from_column_slice(x))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn apply(&self, state: &AgentState, inputs: &DVector<f64>) -> StepOutcome {
        let h = self.matrices.h;
        let a = Vector3::new(inputs[0], inputs[1], inputs[2]);
        let next = AgentState {
            position: state.position + state.velocity * h + a * (h * h / 2.0),
            velocity: state.velocity + a * h,
            acceleration: a,
        };

        let stacked = &self.matrices.lambda * inputs + &self.matrices.a0 * Self::initial_state(state);
        let prediction = (0..self.matrices.horizon)
            .map(|i| Vector3::new(stacked[3 * i], stacked[3 * i + 1], stacked[3 * i + 2]))
            .collect();

        StepOutcome {
            state: next,
            prediction,
            solved: true,
        }
    }

    /// Fallback: keep the previous velocity, apply zero acceleration.
    ///
    /// The position is kept inside the workspace; the velocity component
    /// pointing out of a wall the agent reached is dropped.
    fn hold(&self, state: &AgentState) -> StepOutcome {
        let h = self.matrices.h;
        let pmin = self.config.workspace_min();
        let pmax = self.config.workspace_max();
        let mut position = state.position + state.velocity * h;
        let mut velocity = state.velocity;
        for axis in 0..3 {
            if position[axis] <= pmin[axis] {
                position[axis] = pmin[axis];
                velocity[axis] = velocity[axis].max(0.0);
            } else if position[axis] >= pmax[axis] {
                position[axis] = pmax[axis];
                velocity[axis] = velocity[axis].min(0.0);
            }
        }
        let next = AgentState {
            position,
            velocity,
            acceleration: Vector3::zeros(),
        };
        let prediction = (0..self.matrices.horizon)
            .map(|i| next.position + next.velocity * (h * i as f64))
            .collect();

        StepOutcome {
            state: next,
            prediction,
            solved: false,
        }
    }
}

/// Converts a dense matrix to OSQP's column-compressed format, keeping only
/// the upper triangle when `upper_only` is set.
fn csc_from_dense(matrix: &DMatrix<f64>, upper_only: bool) -> CscMatrix<'static> {
    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = vec![0];

    for col in 0..matrix.ncols() {
        for row in 0..matrix.nrows() {
            if upper_only && row > col {
                break;
            }
            let value = matrix[(row, col)];
            if value != 0.0 {
                data.push(value);
                indices.push(row);
            }
        }
        indptr.push(data.len());
    }

    CscMatrix {
        nrows: matrix.nrows(),
        ncols: matrix.ncols(),
        indptr: Cow::Owned(indptr),
        indices: Cow::Owned(indices),
        data: Cow::Owned(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn solver() -> StepSolver {
        let config = DmpcConfig::default();
        let matrices = HorizonMatrices::new(config.k_hor, config.h);
        StepSolver::new(&config, matrices)
    }

    #[test]
    fn test_csc_upper_triangle() {
        let dense = DMatrix::from_row_slice(3, 3, &[2.0, 1.0, 0.0, 1.0, 3.0, 4.0, 0.0, 4.0, 5.0]);
        let csc = csc_from_dense(&dense, true);
        assert_eq!(csc.indptr.to_vec(), vec![0, 1, 3, 5]);
        assert_eq!(csc.indices.to_vec(), vec![0, 0, 1, 1, 2]);
        assert_eq!(csc.data.to_vec(), vec![2.0, 1.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_csc_full_skips_zeros() {
        let dense = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 2.0, 0.0]);
        let csc = csc_from_dense(&dense, false);
        assert_eq!(csc.indptr.to_vec(), vec![0, 1, 2]);
        assert_eq!(csc.indices.to_vec(), vec![1, 0]);
        assert_eq!(csc.data.to_vec(), vec![2.0, 1.0]);
    }

    #[test]
    fn test_step_moves_toward_goal_within_limits() {
        let solver = solver();
        let state = AgentState::at_rest(Point3::new(0.0, 0.0, 1.0));
        let goal = Point3::new(2.0, 0.0, 1.0);
        let outcome = solver.solve_qp(&state, &goal, &Constraint::empty(45));

        assert!(outcome.solved);
        assert!(outcome.state.position.x > 0.0);
        assert!(outcome.state.acceleration.x <= 0.5 + 1e-4);
        assert!(outcome.state.acceleration.y.abs() < 1e-4);
        assert_eq!(outcome.prediction.len(), 15);
        assert_relative_eq!(outcome.prediction[0], outcome.state.position, epsilon = 1e-9);
    }

    #[test]
    fn test_step_at_goal_stays_put() {
        let solver = solver();
        let goal = Point3::new(1.0, -1.0, 1.5);
        let outcome = solver.solve_qp(&AgentState::at_rest(goal), &goal, &Constraint::empty(45));
        assert!(outcome.solved);
        assert!((outcome.state.position - goal).norm() < 1e-4);
    }

    #[test]
    fn test_infeasible_constraint_falls_back() {
        let solver = solver();
        let state = AgentState {
            position: Point3::new(0.0, 0.0, 1.0),
            velocity: Point3::new(0.3, 0.0, 0.0),
            acceleration: Point3::new(0.1, 0.0, 0.0),
        };
        // contradictory rows: u_0 >= 1 and -u_0 >= 1
        let mut a = DMatrix::zeros(2, 45);
        a[(0, 0)] = 1.0;
        a[(1, 0)] = -1.0;
        let constraint = Constraint {
            a,
            b: DVector::from_vec(vec![1.0, 1.0]),
        };
        let outcome = solver.solve_qp(&state, &Point3::new(2.0, 0.0, 1.0), &constraint);

        assert!(!outcome.solved);
        assert_relative_eq!(outcome.state.velocity, state.velocity);
        assert_relative_eq!(outcome.state.acceleration, Point3::zeros());
        assert_relative_eq!(outcome.state.position.x, 0.06, epsilon = 1e-12);
        assert_relative_eq!(outcome.prediction[1].x, 0.12, epsilon = 1e-12);
    }

    #[test]
    fn test_fallback_stops_at_workspace_wall() {
        let solver = solver();
        let state = AgentState {
            position: Point3::new(4.95, 0.0, 1.0),
            velocity: Point3::new(0.5, 0.2, 0.0),
            acceleration: Point3::zeros(),
        };
        let mut a = DMatrix::zeros(2, 45);
        a[(0, 1)] = 1.0;
        a[(1, 1)] = -1.0;
        let constraint = Constraint {
            a,
            b: DVector::from_vec(vec![1.0, 1.0]),
        };
        let outcome = solver.solve_qp(&state, &Point3::new(5.0, 0.0, 1.0), &constraint);

        assert!(!outcome.solved);
        assert_relative_eq!(outcome.state.position.x, 5.0);
        assert_relative_eq!(outcome.state.velocity.x, 0.0);
        assert_relative_eq!(outcome.state.velocity.y, 0.2);
        for p in &outcome.prediction {
            assert!(p.x <= 5.0);
        }
    }

    #[test]
    fn test_collision_row_is_respected() {
        let solver = solver();
        let state = AgentState::at_rest(Point3::new(0.0, 0.0, 1.0));
        // keep the first-step x position at or below the start: -p1.x >= 0
        let m = solver.matrices();
        let mut a = DMatrix::zeros(1, 45);
        a.row_mut(0).copy_from(&(-m.lambda.row(0)));
        let constraint = Constraint {
            a,
            b: DVector::from_vec(vec![0.0]),
        };
        let outcome = solver.solve_qp(&state, &Point3::new(2.0, 0.0, 1.0), &constraint);
        assert!(outcome.solved);
        assert!(outcome.state.position.x <= 1e-4);
    }
}
