//! # Post-Processing
//!
//! Checks run on a finished solve: goal arrival, convergence time and an
//! audit of the true pairwise separation. The driver never guarantees
//! separation, so callers are expected to audit with
//! [`collision_violations`] before using the trajectories.

use crate::collision::EllipsoidMetric;
use crate::config::DmpcConfig;
use crate::error::{DmpcError, Result};
use crate::interp::CubicSpline;
use crate::structs::{CollisionResidual, Point3, Trajectory};
use log::warn;
use ordered_float::OrderedFloat;

/// Whether every agent's final position is within `tolerance` of its goal.
pub fn reached_goal(trajectories: &[Trajectory], goals: &[Point3], tolerance: f64) -> bool {
    trajectories.len() == goals.len()
        && trajectories.iter().zip(goals).all(|(trajectory, goal)| {
            trajectory
                .last_state()
                .is_some_and(|last| (last.position - goal).norm() <= tolerance)
        })
}

/// First step at which every agent is within `tolerance` of its goal.
pub fn convergence_step(trajectories: &[Trajectory], goals: &[Point3], tolerance: f64) -> Option<usize> {
    if trajectories.is_empty() || trajectories.len() != goals.len() {
        return None;
    }
    let steps = trajectories.iter().map(Trajectory::len).min().unwrap_or(0);
    (0..steps).find(|&k| {
        trajectories
            .iter()
            .zip(goals)
            .all(|(trajectory, goal)| (trajectory.position(k) - goal).norm() <= tolerance)
    })
}

/// Time of first convergence, or `t_max` when the agents never converged.
///
/// The returned time always maps back to the convergence step with
/// `floor(t / h)`.
pub fn trajectory_time(trajectories: &[Trajectory], goals: &[Point3], config: &DmpcConfig) -> f64 {
    convergence_step(trajectories, goals, config.goal_tolerance)
        .map_or(config.t_max, |step| step_time(step, config.h))
}

/// `step * h`, nudged up by whole ulps until `floor(t / h) == step`.
fn step_time(step: usize, h: f64) -> f64 {
    let mut t = step as f64 * h;
    while ((t / h).floor() as usize) < step {
        t = f64::from_bits(t.to_bits() + 1);
    }
    t
}

/// Every (pair, step) whose true scaled distance is below 1.
pub fn collision_violations(trajectories: &[Trajectory], metric: &EllipsoidMetric) -> Vec<CollisionResidual> {
    let residuals: Vec<CollisionResidual> = pairwise_distances(trajectories, metric)
        .filter(|residual| residual.scaled_distance < 1.0)
        .collect();
    if let Some(worst) = residuals
        .iter()
        .min_by_key(|residual| OrderedFloat(residual.scaled_distance))
    {
        warn!(
            "{} collision residuals; worst between agents {} and {} at step {} (distance {:.3})",
            residuals.len(),
            worst.agent_a,
            worst.agent_b,
            worst.step,
            worst.scaled_distance
        );
    }
    residuals
}

/// The closest approach over all pairs and steps, `None` with fewer than two agents.
pub fn min_scaled_separation(trajectories: &[Trajectory], metric: &EllipsoidMetric) -> Option<CollisionResidual> {
    pairwise_distances(trajectories, metric).min_by_key(|residual| OrderedFloat(residual.scaled_distance))
}

fn pairwise_distances<'a>(
    trajectories: &'a [Trajectory],
    metric: &'a EllipsoidMetric,
) -> impl Iterator<Item = CollisionResidual> + 'a {
    let steps = trajectories.iter().map(Trajectory::len).min().unwrap_or(0);
    let n = trajectories.len();
    (0..steps).flat_map(move |step| {
        (0..n).flat_map(move |a| {
            (a + 1..n).map(move |b| CollisionResidual {
                agent_a: a,
                agent_b: b,
                step,
                scaled_distance: metric.distance(&trajectories[a].position(step), &trajectories[b].position(step)),
            })
        })
    })
}

/// Resamples every trajectory at `step_size` with a natural cubic spline per
/// axis. Velocities and accelerations are the spline derivatives.
pub fn interp_trajectory(trajectories: &[Trajectory], h: f64, step_size: f64) -> Result<Vec<Trajectory>> {
    if !(step_size > 0.0) || step_size > h {
        return Err(DmpcError::configuration(format!(
            "interpolation step {step_size} must be in (0, {h}]"
        )));
    }

    trajectories
        .iter()
        .map(|trajectory| {
            let splines = (0..3)
                .map(|axis| {
                    let samples: Vec<f64> = trajectory.pos.iter().map(|p| p[axis]).collect();
                    CubicSpline::natural(&samples, h)
                })
                .collect::<Result<Vec<_>>>()?;

            let duration = splines[0].duration();
            let samples = (duration / step_size + 1e-9).floor() as usize + 1;
            let mut resampled = Trajectory::with_capacity(samples);
            for i in 0..samples {
                let t = i as f64 * step_size;
                let mut pos = [0.0; 3];
                let mut vel = [0.0; 3];
                let mut acc = [0.0; 3];
                for (axis, spline) in splines.iter().enumerate() {
                    (pos[axis], vel[axis], acc[axis]) = spline.eval(t);
                }
                resampled.pos.push(pos);
                resampled.vel.push(vel);
                resampled.acc.push(acc);
            }
            Ok(resampled)
        })
        .collect()
}
