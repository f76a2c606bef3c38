//! # Core Data Structures
//!
//! This module defines the data types shared by the solver components:
//!
//! - **AgentState**: position, velocity and acceleration of one agent at one step
//! - **Trajectory**: per-step states of one agent
//! - **GoalSet**: validated start/goal positions, one row per agent
//! - **Priority**: explicit re-planning order of the agents
//! - **Prediction**: an agent's latest predicted positions, anchored in absolute steps
//! - **Constraint**: stacked linear inequalities `A u >= b` for one QP
//! - **FailureSite / CollisionResidual / DriverState / SolveReport**: solve outcome

use crate::error::{DmpcError, Result};
use nalgebra::{DMatrix, DVector, Vector3};
use serde::{Deserialize, Serialize};

pub type Point3 = Vector3<f64>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentState {
    pub position: Point3,
    pub velocity: Point3,
    pub acceleration: Point3,
}

impl AgentState {
    pub fn at_rest(position: Point3) -> Self {
        AgentState {
            position,
            velocity: Point3::zeros(),
            acceleration: Point3::zeros(),
        }
    }
}

/// Per-step positions, velocities and accelerations of one agent.
///
/// `acc[k]` is the acceleration applied over the interval that ends at step `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub pos: Vec<[f64; 3]>,
    pub vel: Vec<[f64; 3]>,
    pub acc: Vec<[f64; 3]>,
}

impl Trajectory {
    pub fn new(start: &AgentState) -> Self {
        let mut trajectory = Trajectory::with_capacity(1);
        trajectory.push(start);
        trajectory
    }

    pub fn with_capacity(steps: usize) -> Self {
        Trajectory {
            pos: Vec::with_capacity(steps),
            vel: Vec::with_capacity(steps),
            acc: Vec::with_capacity(steps),
        }
    }

    pub fn push(&mut self, state: &AgentState) {
        self.pos.push(state.position.into());
        self.vel.push(state.velocity.into());
        self.acc.push(state.acceleration.into());
    }

    pub fn len(&self) -> usize {
        self.pos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    pub fn position(&self, step: usize) -> Point3 {
        Point3::from(self.pos[step])
    }

    pub fn state(&self, step: usize) -> AgentState {
        AgentState {
            position: Point3::from(self.pos[step]),
            velocity: Point3::from(self.vel[step]),
            acceleration: Point3::from(self.acc[step]),
        }
    }

    pub fn last_state(&self) -> Option<AgentState> {
        if self.is_empty() {
            None
        } else {
            Some(self.state(self.len() - 1))
        }
    }

    /// First step at which the agent is within `tolerance` of `goal`.
    pub fn arrival_step(&self, goal: &Point3, tolerance: f64) -> Option<usize> {
        (0..self.len()).find(|&k| (self.position(k) - goal).norm() <= tolerance)
    }

    /// Extends the trajectory to `steps` samples by holding the final position at rest.
    ///
    /// Padded samples have zero velocity and acceleration even when the last
    /// recorded sample still moves, so the step into the padding is a
    /// velocity discontinuity. Splines fitted with
    /// [`interp_trajectory`](crate::post::interp_trajectory) see it as a kink
    /// in position only.
    pub fn pad_to(&mut self, steps: usize) {
        if let Some(last) = self.last_state() {
            let hold = AgentState::at_rest(last.position);
            while self.len() < steps {
                self.push(&hold);
            }
        }
    }
}

/// Start and goal positions of every agent. Row `i` is agent `i` throughout.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalSet {
    starts: Vec<Point3>,
    goals: Vec<Point3>,
}

impl GoalSet {
    pub fn new(starts: Vec<Point3>, goals: Vec<Point3>) -> Result<Self> {
        if starts.len() != goals.len() || starts.is_empty() {
            return Err(DmpcError::dimension_mismatch(starts.len(), goals.len()));
        }
        Ok(GoalSet { starts, goals })
    }

    pub fn from_arrays(starts: &[[f64; 3]], goals: &[[f64; 3]]) -> Result<Self> {
        GoalSet::new(
            starts.iter().map(|p| Point3::from(*p)).collect(),
            goals.iter().map(|p| Point3::from(*p)).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn starts(&self) -> &[Point3] {
        &self.starts
    }

    pub fn goals(&self) -> &[Point3] {
        &self.goals
    }
}

/// Order in which agents re-plan inside one step. Agents later in the order
/// see the predictions that earlier agents produced in the same step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Priority {
    order: Vec<usize>,
}

impl Priority {
    pub fn identity(n: usize) -> Self {
        Priority {
            order: (0..n).collect(),
        }
    }

    pub fn new(order: Vec<usize>) -> Result<Self> {
        let mut seen = vec![false; order.len()];
        for &agent in &order {
            if agent >= order.len() || seen[agent] {
                return Err(DmpcError::InvalidPriority(format!(
                    "{order:?} is not a permutation of 0..{}",
                    order.len()
                )));
            }
            seen[agent] = true;
        }
        Ok(Priority { order })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// `ranks()[agent]` is the agent's position in the order.
    pub fn ranks(&self) -> Vec<usize> {
        let mut ranks = vec![0; self.order.len()];
        for (rank, &agent) in self.order.iter().enumerate() {
            ranks[agent] = rank;
        }
        ranks
    }
}

/// An agent's most recent predicted positions.
///
/// `positions[0]` is the prediction for absolute step `start_step`. Lookups
/// outside the stored window clamp to the nearest end.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub start_step: usize,
    pub positions: Vec<Point3>,
    /// Step at which this prediction was planned; `None` for the initial seed.
    pub planned_at: Option<usize>,
}

impl Prediction {
    pub fn position_at(&self, step: usize) -> Point3 {
        let last = self.positions.len().saturating_sub(1);
        let index = step.saturating_sub(self.start_step).min(last);
        self.positions[index]
    }

    pub fn planned_in(&self, step: usize) -> bool {
        self.planned_at == Some(step)
    }
}

/// Linear inequalities `a * u >= b` over one agent's stacked horizon inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub a: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl Constraint {
    pub fn empty(n_vars: usize) -> Self {
        Constraint {
            a: DMatrix::zeros(0, n_vars),
            b: DVector::zeros(0),
        }
    }

    pub fn rows(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// Stacks the rows of every part into one constraint set.
    pub fn stack(n_vars: usize, parts: &[Constraint]) -> Self {
        let rows: usize = parts.iter().map(Constraint::rows).sum();
        let mut a = DMatrix::zeros(rows, n_vars);
        let mut b = DVector::zeros(rows);
        let mut offset = 0;
        for part in parts {
            let r = part.rows();
            a.view_mut((offset, 0), (r, n_vars)).copy_from(&part.a);
            b.rows_mut(offset, r).copy_from(&part.b);
            offset += r;
        }
        Constraint { a, b }
    }
}

/// An (agent, step) whose QP had no usable solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailureSite {
    pub agent: usize,
    pub step: usize,
}

/// A pair of agents whose true scaled distance fell below 1 at some step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionResidual {
    pub agent_a: usize,
    pub agent_b: usize,
    pub step: usize,
    pub scaled_distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    /// Every agent reached its goal at `step`.
    Done { step: usize },
    /// The step budget ran out before convergence.
    Timeout,
}

impl DriverState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DriverState::Running)
    }
}

/// Result of one solve call.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub trajectories: Vec<Trajectory>,
    pub failures: Vec<FailureSite>,
    pub state: DriverState,
}

impl SolveReport {
    pub fn fail_count(&self) -> usize {
        self.failures.len()
    }

    pub fn last_failure(&self) -> Option<FailureSite> {
        self.failures.last().copied()
    }

    pub fn converged(&self) -> bool {
        matches!(self.state, DriverState::Done { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== GoalSet Tests ====================

    #[test]
    fn test_goal_set_rejects_mismatch() {
        let result = GoalSet::from_arrays(&[[0.0, 0.0, 1.0]], &[]);
        assert!(matches!(
            result,
            Err(DmpcError::DimensionMismatch { starts: 1, goals: 0 })
        ));
    }

    #[test]
    fn test_goal_set_rejects_empty() {
        assert!(GoalSet::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_goal_set_keeps_rows() {
        let set = GoalSet::from_arrays(
            &[[0.0, 0.0, 1.0], [1.0, 0.0, 1.0]],
            &[[1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.starts()[1], Point3::new(1.0, 0.0, 1.0));
        assert_eq!(set.goals()[1], Point3::new(0.0, 0.0, 1.0));
    }

    // ==================== Priority Tests ====================

    #[test]
    fn test_priority_ranks() {
        let priority = Priority::new(vec![2, 0, 1]).unwrap();
        assert_eq!(priority.ranks(), vec![1, 2, 0]);
    }

    #[test]
    fn test_priority_rejects_duplicates() {
        assert!(Priority::new(vec![0, 0, 1]).is_err());
        assert!(Priority::new(vec![0, 3, 1]).is_err());
    }

    // ==================== Prediction Tests ====================

    #[test]
    fn test_prediction_clamps_lookups() {
        let prediction = Prediction {
            start_step: 5,
            positions: vec![
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(3.0, 0.0, 0.0),
            ],
            planned_at: Some(4),
        };
        assert_eq!(prediction.position_at(0).x, 1.0);
        assert_eq!(prediction.position_at(6).x, 2.0);
        assert_eq!(prediction.position_at(40).x, 3.0);
        assert!(prediction.planned_in(4));
        assert!(!prediction.planned_in(5));
    }

    // ==================== Trajectory Tests ====================

    #[test]
    fn test_trajectory_pad_holds_position() {
        let mut trajectory = Trajectory::new(&AgentState::at_rest(Point3::new(1.0, 2.0, 1.0)));
        trajectory.push(&AgentState {
            position: Point3::new(1.5, 2.0, 1.0),
            velocity: Point3::new(0.1, 0.0, 0.0),
            acceleration: Point3::new(0.2, 0.0, 0.0),
        });
        trajectory.pad_to(5);
        assert_eq!(trajectory.len(), 5);
        assert_eq!(trajectory.pos[4], [1.5, 2.0, 1.0]);
        assert_eq!(trajectory.vel[4], [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_trajectory_arrival_step() {
        let mut trajectory = Trajectory::new(&AgentState::at_rest(Point3::zeros()));
        for x in [0.5, 0.9, 0.99, 1.0] {
            trajectory.push(&AgentState::at_rest(Point3::new(x, 0.0, 0.0)));
        }
        let goal = Point3::new(1.0, 0.0, 0.0);
        assert_eq!(trajectory.arrival_step(&goal, 0.05), Some(3));
        assert_eq!(trajectory.arrival_step(&Point3::new(5.0, 0.0, 0.0), 0.05), None);
    }

    // ==================== Constraint Tests ====================

    #[test]
    fn test_constraint_stack() {
        let first = Constraint {
            a: DMatrix::from_row_slice(1, 2, &[1.0, 0.0]),
            b: DVector::from_vec(vec![0.5]),
        };
        let second = Constraint {
            a: DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 1.0]),
            b: DVector::from_vec(vec![1.0, 2.0]),
        };
        let stacked = Constraint::stack(2, &[first, Constraint::empty(2), second]);
        assert_eq!(stacked.rows(), 3);
        assert_eq!(stacked.a[(2, 0)], 1.0);
        assert_eq!(stacked.b[2], 2.0);
    }

    #[test]
    fn test_driver_state_terminal() {
        assert!(!DriverState::Running.is_terminal());
        assert!(DriverState::Done { step: 3 }.is_terminal());
        assert!(DriverState::Timeout.is_terminal());
    }
}
