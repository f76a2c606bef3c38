//! # Receding Horizon Driver
//!
//! [`Dmpc`] owns the validated configuration and the precomputed horizon
//! matrices of a solve session, and runs the sequential DMPC loop:
//!
//! 1. Every agent starts from an unconstrained reference trajectory, which
//!    seeds its first prediction.
//! 2. At each global step, agents re-plan one after another in the order
//!    given by a [`Priority`]. Each agent treats the other agents' latest
//!    predictions as moving obstacles, so agents later in the order see what
//!    earlier agents planned in the same step.
//! 3. After every agent moved, the run ends when all agents are within the
//!    goal tolerance (`Done`) or when the step budget is spent (`Timeout`).
//!
//! The run always produces trajectories; quality is judged afterwards with
//! the checks in [`post`](crate::post).

use crate::collision::{build_collconstraint, check_collisions, EllipsoidMetric, Obstacle};
use crate::config::DmpcConfig;
use crate::error::{DmpcError, Result};
use crate::horizon::HorizonMatrices;
use crate::init::init_dmpc;
use crate::qp::{StepOutcome, StepSolver};
use crate::structs::{
    AgentState, Constraint, DriverState, FailureSite, GoalSet, Point3, Prediction, Priority,
    SolveReport, Trajectory,
};
use log::{debug, info, warn};

pub struct Dmpc {
    config: DmpcConfig,
    metric: EllipsoidMetric,
    step_solver: StepSolver,
    init_matrices: HorizonMatrices,
}

impl Dmpc {
    pub fn new(config: DmpcConfig) -> Result<Self> {
        config.validate()?;
        let metric = EllipsoidMetric::from_config(&config);
        let step_solver = StepSolver::new(&config, HorizonMatrices::new(config.k_hor, config.h));
        let init_matrices = HorizonMatrices::new(config.total_steps(), config.h);
        Ok(Dmpc {
            config,
            metric,
            step_solver,
            init_matrices,
        })
    }

    pub fn config(&self) -> &DmpcConfig {
        &self.config
    }

    pub fn metric(&self) -> &EllipsoidMetric {
        &self.metric
    }

    /// Sequential solve with agents re-planning in index order.
    pub fn solve(&self, starts: &[Point3], goals: &[Point3]) -> Result<SolveReport> {
        self.solve_with_priority(starts, goals, &Priority::identity(starts.len()))
    }

    pub fn solve_with_priority(
        &self,
        starts: &[Point3],
        goals: &[Point3],
        priority: &Priority,
    ) -> Result<SolveReport> {
        let mut session = self.prepare(starts, goals, priority)?;
        let total = self.config.total_steps();
        info!(
            "Sequential DMPC: {} agents, {} steps of {:.3} s",
            session.goals.len(),
            total,
            self.config.h
        );

        let mut step = 0;
        while !session.state.is_terminal() {
            for &agent in priority.order() {
                let outcome = {
                    let obstacles = session.obstacles_for(agent, step);
                    self.step_agent(
                        step,
                        &session.states[agent],
                        &session.goals.goals()[agent],
                        &session.registry[agent],
                        &obstacles,
                    )
                };
                session.record(agent, step, outcome);
            }
            step += 1;
            session.evaluate(step, total, self.config.goal_tolerance);
            debug!("Step {}: {:?}", step, session.state);
        }

        Ok(session.finish(total))
    }

    /// Validates the inputs and seeds every agent's trajectory and prediction.
    pub(crate) fn prepare(
        &self,
        starts: &[Point3],
        goals: &[Point3],
        priority: &Priority,
    ) -> Result<Session> {
        let goal_set = GoalSet::new(starts.to_vec(), goals.to_vec())?;
        if priority.len() != goal_set.len() {
            return Err(DmpcError::InvalidPriority(format!(
                "ordering covers {} agents, goal set has {}",
                priority.len(),
                goal_set.len()
            )));
        }
        for (agent, (start, goal)) in starts.iter().zip(goals).enumerate() {
            for (which, position) in [("start", start), ("goal", goal)] {
                if !self.config.in_workspace(position) {
                    return Err(DmpcError::OutsideWorkspace {
                        agent,
                        which,
                        position: (*position).into(),
                    });
                }
            }
        }

        let mut registry = Vec::with_capacity(goal_set.len());
        for (start, goal) in starts.iter().zip(goals) {
            let reference = init_dmpc(&self.config, &self.init_matrices, start, goal)?;
            registry.push(Prediction {
                start_step: 0,
                positions: reference.pos.iter().map(|p| Point3::from(*p)).collect(),
                planned_at: None,
            });
        }

        let states: Vec<AgentState> = starts.iter().map(|p| AgentState::at_rest(*p)).collect();
        let total = self.config.total_steps();
        let trajectories = states
            .iter()
            .map(|s| {
                let mut trajectory = Trajectory::with_capacity(total + 1);
                trajectory.push(s);
                trajectory
            })
            .collect();

        let mut session = Session {
            goals: goal_set,
            states,
            registry,
            trajectories,
            failures: Vec::new(),
            state: DriverState::Running,
        };
        if session.converged(self.config.goal_tolerance) {
            session.state = DriverState::Done { step: 0 };
        }
        Ok(session)
    }

    /// Re-plans one agent for `step`: linearizes every predicted conflict over
    /// the horizon, then solves its QP and moves it one step.
    pub(crate) fn step_agent(
        &self,
        step: usize,
        state: &AgentState,
        goal: &Point3,
        own: &Prediction,
        obstacles: &[Obstacle<'_>],
    ) -> StepOutcome {
        let matrices = self.step_solver.matrices();
        let x0 = StepSolver::initial_state(state);

        let mut parts = Vec::new();
        for k in 1..=matrices.horizon {
            let target_step = step + k;
            let prev_p = own.position_at(target_step);
            let conflicts = check_collisions(&self.metric, &prev_p, obstacles, target_step);
            if !conflicts.is_empty() {
                parts.push(build_collconstraint(
                    &self.metric,
                    matrices,
                    k,
                    &prev_p,
                    &x0,
                    &conflicts,
                ));
            }
        }

        let collisions = Constraint::stack(matrices.n_vars(), &parts);
        self.step_solver.solve_qp(state, goal, &collisions)
    }
}

/// Mutable state of one solve call.
pub(crate) struct Session {
    pub goals: GoalSet,
    pub states: Vec<AgentState>,
    pub registry: Vec<Prediction>,
    pub trajectories: Vec<Trajectory>,
    pub failures: Vec<FailureSite>,
    pub state: DriverState,
}

impl Session {
    /// Every other agent's latest prediction as an obstacle for `agent`.
    pub fn obstacles_for(&self, agent: usize, step: usize) -> Vec<Obstacle<'_>> {
        self.registry
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != agent)
            .map(|(other, prediction)| Obstacle {
                agent: other,
                prediction,
                replanned: prediction.planned_in(step),
            })
            .collect()
    }

    pub fn record(&mut self, agent: usize, step: usize, outcome: StepOutcome) {
        if !outcome.solved {
            warn!("QP for agent {} failed at step {}; holding velocity", agent, step);
            self.failures.push(FailureSite { agent, step });
        }
        self.states[agent] = outcome.state;
        self.trajectories[agent].push(&outcome.state);
        self.registry[agent] = Prediction {
            start_step: step + 1,
            positions: outcome.prediction,
            planned_at: Some(step),
        };
    }

    pub fn converged(&self, tolerance: f64) -> bool {
        self.states
            .iter()
            .zip(self.goals.goals())
            .all(|(state, goal)| (state.position - goal).norm() <= tolerance)
    }

    /// Updates the driver state once every agent has reached `step`.
    pub fn evaluate(&mut self, step: usize, total: usize, tolerance: f64) {
        self.state = if self.converged(tolerance) {
            DriverState::Done { step }
        } else if step >= total {
            DriverState::Timeout
        } else {
            DriverState::Running
        };
    }

    pub fn finish(mut self, total: usize) -> SolveReport {
        for trajectory in &mut self.trajectories {
            trajectory.pad_to(total + 1);
        }
        match self.state {
            DriverState::Done { step } => info!(
                "DMPC converged at step {} with {} failed QPs",
                step,
                self.failures.len()
            ),
            _ => info!(
                "DMPC stopped without convergence ({} failed QPs)",
                self.failures.len()
            ),
        }
        SolveReport {
            trajectories: self.trajectories,
            failures: self.failures,
            state: self.state,
        }
    }
}
