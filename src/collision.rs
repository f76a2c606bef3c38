//! # Collision Constraints
//!
//! Separation between two agents is measured with an anisotropic ellipsoid
//! metric: the offset is scaled by `rmin * (1, 1, c)` and measured with an
//! `order`-norm, so two agents conflict when the scaled distance `ξ < 1`.
//!
//! The constraint `ξ(p) >= 1` is nonconvex. Every step it is replaced by the
//! tangent half-space of `ξ` at the previous predicted position (the previous
//! iterate), which is convex and, because `ξ` is a norm, lies entirely
//! outside the ellipsoid.
//!
//! ## Symmetry Breaking
//!
//! Two agents approaching head-on produce tangent planes orthogonal to their
//! path, and both would brake instead of passing. The linearization point is
//! shifted sideways by a small fraction of the offset, always to the same
//! side relative to the offset direction, so each agent of the pair tilts
//! its plane to its own right and they pass complementarily. Any
//! linearization point keeps the half-space outside the ellipsoid.
//!
//! ## Reciprocity
//!
//! Against a neighbor that has not re-planned yet in the current step, an
//! agent closes half of the linearized gap; the neighbor closes the rest
//! when its turn comes. Against a neighbor that already re-planned this step
//! the agent closes the whole gap.

use crate::config::DmpcConfig;
use crate::horizon::HorizonMatrices;
use crate::structs::{Constraint, Point3, Prediction};
use nalgebra::{DMatrix, DVector, Vector3};

const EPSILON: f64 = 1e-9;
/// Sideways displacement of the linearization point, relative to the scaled offset.
const PERTURBATION_EPSILON: f64 = 0.1;
/// Share of the gap closed against a neighbor that will still re-plan this step.
const RECIPROCAL_SHARE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EllipsoidMetric {
    scale: Vector3<f64>,
    order: u32,
}

impl EllipsoidMetric {
    pub fn new(rmin: f64, c: f64, order: u32) -> Self {
        EllipsoidMetric {
            scale: Vector3::new(rmin, rmin, rmin * c),
            order,
        }
    }

    pub fn from_config(config: &DmpcConfig) -> Self {
        EllipsoidMetric::new(config.rmin, config.c, config.order)
    }

    pub fn scaled_offset(&self, p: &Point3, q: &Point3) -> Vector3<f64> {
        (p - q).component_div(&self.scale)
    }

    pub fn norm(&self, e: &Vector3<f64>) -> f64 {
        if self.order == 2 {
            return e.norm();
        }
        let n = self.order as i32;
        e.iter()
            .map(|x| x.abs().powi(n))
            .sum::<f64>()
            .powf(1.0 / self.order as f64)
    }

    /// Scaled distance between two positions.
    pub fn distance(&self, p: &Point3, q: &Point3) -> f64 {
        self.norm(&self.scaled_offset(p, q))
    }

    /// Gradient of the scaled distance with respect to `p`, at scaled offset `e`.
    fn gradient(&self, e: &Vector3<f64>, xi: f64) -> Vector3<f64> {
        let n = self.order as i32;
        let factor = xi.powi(1 - n);
        Vector3::from_fn(|i, _| e[i].signum() * e[i].abs().powi(n - 1) * factor / self.scale[i])
    }
}

/// Another agent's prediction seen as a moving obstacle.
#[derive(Debug, Clone, Copy)]
pub struct Obstacle<'a> {
    pub agent: usize,
    pub prediction: &'a Prediction,
    /// The obstacle already re-planned in the current step.
    pub replanned: bool,
}

/// A neighbor whose prediction violates the separation at one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conflict {
    pub agent: usize,
    pub position: Point3,
    pub scaled_distance: f64,
    /// Fraction of the linearized gap this agent must close.
    pub share: f64,
}

/// Tangent half-space `normal · p >= offset` in position space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfSpace {
    pub normal: Vector3<f64>,
    pub offset: f64,
}

/// Neighbors whose predicted position at absolute `step` is closer than the
/// minimum separation to `prev_p`, the agent's own prediction at that step.
pub fn check_collisions(
    metric: &EllipsoidMetric,
    prev_p: &Point3,
    obstacles: &[Obstacle<'_>],
    step: usize,
) -> Vec<Conflict> {
    obstacles
        .iter()
        .filter_map(|obstacle| {
            let position = obstacle.prediction.position_at(step);
            let scaled_distance = metric.distance(prev_p, &position);
            if scaled_distance < 1.0 {
                Some(Conflict {
                    agent: obstacle.agent,
                    position,
                    scaled_distance,
                    share: if obstacle.replanned { 1.0 } else { RECIPROCAL_SHARE },
                })
            } else {
                None
            }
        })
        .collect()
}

/// Linearizes the separation from one conflicting neighbor at `prev_p`.
///
/// `current_p` orients the plane when the two predictions coincide.
pub fn linearize(
    metric: &EllipsoidMetric,
    prev_p: &Point3,
    current_p: &Point3,
    conflict: &Conflict,
) -> HalfSpace {
    let q = conflict.position;
    let mut e = metric.scaled_offset(prev_p, &q);
    if e.norm() < EPSILON {
        e = metric.scaled_offset(current_p, &q);
    }
    if e.norm() < EPSILON {
        e = Vector3::x() * EPSILON.sqrt();
    }

    let mut lateral = Vector3::new(-e.y, e.x, 0.0);
    if lateral.norm() < EPSILON {
        lateral = Vector3::y();
    }
    let shifted = e + lateral.normalize() * (PERTURBATION_EPSILON * e.norm());

    let anchor = q + shifted.component_mul(&metric.scale);
    let xi = metric.norm(&shifted);
    let normal = metric.gradient(&shifted, xi);

    // value of the linearization at the unshifted previous iterate
    let at_prev = xi + normal.dot(&(prev_p - anchor));
    let target = at_prev + conflict.share * (1.0 - at_prev);

    HalfSpace {
        normal,
        offset: target - xi + normal.dot(&anchor),
    }
}

/// Stacks one input-space row per conflict at horizon step `k` (1-based).
///
/// `x0` is the agent's current `(p, v)`; predicted positions at step `k` are
/// `lambda_k * u + a0_k * x0`.
pub fn build_collconstraint(
    metric: &EllipsoidMetric,
    matrices: &HorizonMatrices,
    k: usize,
    prev_p: &Point3,
    x0: &DVector<f64>,
    conflicts: &[Conflict],
) -> Constraint {
    let n = matrices.n_vars();
    let lambda_k = matrices.lambda.rows(3 * (k - 1), 3);
    let drift = matrices.a0.rows(3 * (k - 1), 3) * x0;
    let current_p = Point3::new(x0[0], x0[1], x0[2]);

    let mut a = DMatrix::zeros(conflicts.len(), n);
    let mut b = DVector::zeros(conflicts.len());
    for (row, conflict) in conflicts.iter().enumerate() {
        let half_space = linearize(metric, prev_p, &current_p, conflict);
        let normal = DVector::from_column_slice(half_space.normal.as_slice());
        a.row_mut(row).copy_from(&(normal.transpose() * &lambda_k));
        b[row] = half_space.offset - normal.dot(&drift);
    }

    Constraint { a, b }
}
