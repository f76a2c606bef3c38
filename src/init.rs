//! Reference trajectory for one agent, ignoring every other agent.
//!
//! Solves the unconstrained minimum-effort transfer over the full nominal
//! horizon in closed form:
//!
//! ```text
//! min  w_p |p_K - goal|² + w_v |v_K|² + |u|²
//! ```
//!
//! The result seeds the agent's first prediction before any collision
//! constraint exists.

use crate::config::DmpcConfig;
use crate::error::{DmpcError, Result};
use crate::horizon::HorizonMatrices;
use crate::structs::{AgentState, Point3, Trajectory};
use nalgebra::{DMatrix, DVector, Vector3};

pub fn init_dmpc(
    config: &DmpcConfig,
    matrices: &HorizonMatrices,
    start: &Point3,
    goal: &Point3,
) -> Result<Trajectory> {
    let k = matrices.horizon;
    let n = matrices.n_vars();
    let last = 3 * (k - 1);

    let lambda_k = matrices.lambda.rows(last, 3);
    let a_v_k = matrices.a_v.rows(last, 3);
    let a0_k = matrices.a0.rows(last, 3);

    let x0 = DVector::from_vec(vec![start.x, start.y, start.z, 0.0, 0.0, 0.0]);
    let drift = &a0_k * &x0;
    let position_gap = DVector::from_column_slice(goal.as_slice()) - drift;

    let w_p = config.weights.init_position;
    let w_v = config.weights.init_velocity;

    let normal: DMatrix<f64> = lambda_k.transpose() * &lambda_k * w_p
        + a_v_k.transpose() * &a_v_k * w_v
        + DMatrix::<f64>::identity(n, n);
    let rhs = lambda_k.transpose() * position_gap * w_p;

    let inputs = normal
        .cholesky()
        .ok_or_else(|| DmpcError::linalg("initializer normal equations are not positive definite"))?
        .solve(&rhs);

    let (a, b) = crate::horizon::step_model(matrices.h);
    let mut trajectory = Trajectory::with_capacity(k + 1);
    let mut state = AgentState::at_rest(*start);
    trajectory.push(&state);

    let mut x = nalgebra::Vector6::new(start.x, start.y, start.z, 0.0, 0.0, 0.0);
    for step in 0..k {
        let u = Vector3::new(inputs[3 * step], inputs[3 * step + 1], inputs[3 * step + 2]);
        x = a * x + b * u;
        state = AgentState {
            position: Vector3::new(x[0], x[1], x[2]),
            velocity: Vector3::new(x[3], x[4], x[5]),
            acceleration: u,
        };
        trajectory.push(&state);
    }

    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (DmpcConfig, HorizonMatrices) {
        let config = DmpcConfig::default();
        let matrices = HorizonMatrices::new(config.total_steps(), config.h);
        (config, matrices)
    }

    #[test]
    fn test_initial_trajectory_starts_at_rest() {
        let (config, matrices) = setup();
        let start = Point3::new(-1.0, 0.5, 1.0);
        let goal = Point3::new(2.0, -0.5, 1.5);
        let trajectory = init_dmpc(&config, &matrices, &start, &goal).unwrap();

        assert_eq!(trajectory.len(), config.total_steps() + 1);
        assert_eq!(trajectory.position(0), start);
        assert_eq!(trajectory.vel[0], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_initial_trajectory_reaches_goal() {
        let (config, matrices) = setup();
        let start = Point3::new(-1.0, 0.5, 1.0);
        let goal = Point3::new(2.0, -0.5, 1.5);
        let trajectory = init_dmpc(&config, &matrices, &start, &goal).unwrap();

        let end = trajectory.last_state().unwrap();
        assert!((end.position - goal).norm() < 0.05, "ended at {:?}", end.position);
        assert!(end.velocity.norm() < 0.05);
        assert!(trajectory.arrival_step(&goal, 0.05).is_some());
    }

    #[test]
    fn test_initial_trajectory_stays_on_segment() {
        let (config, matrices) = setup();
        let start = Point3::new(0.0, 0.0, 1.0);
        let goal = Point3::new(3.0, 0.0, 1.0);
        let trajectory = init_dmpc(&config, &matrices, &start, &goal).unwrap();

        for k in 0..trajectory.len() {
            let p = trajectory.position(k);
            assert!(p.y.abs() < 1e-9);
            assert!((p.z - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_start_equal_goal_stays_put() {
        let (config, matrices) = setup();
        let start = Point3::new(1.0, 1.0, 1.0);
        let trajectory = init_dmpc(&config, &matrices, &start, &start).unwrap();
        for k in 0..trajectory.len() {
            assert!((trajectory.position(k) - start).norm() < 1e-9);
        }
    }
}
