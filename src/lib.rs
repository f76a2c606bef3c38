//! # DMPC Core
//!
//! Collision-free trajectories for a swarm of point-mass agents in 3D, using
//! Distributed Model Predictive Control with on-demand collision avoidance.
//!
//! ## Algorithm
//!
//! Every agent is a double integrator with box-limited acceleration. At each
//! timestep every agent solves a short-horizon QP (OSQP) that tracks its goal,
//! treating the other agents' latest predicted positions as moving obstacles.
//! Predicted conflicts under an ellipsoidal separation metric become
//! linearized half-space constraints. Only the first step of each plan is
//! executed before re-planning.
//!
//! ## Usage
//!
//! ```no_run
//! use dmpc_core::{post, Dmpc, DmpcConfig, Point3};
//!
//! let dmpc = Dmpc::new(DmpcConfig::default())?;
//! let starts = [Point3::new(-1.0, 0.0, 1.0), Point3::new(1.0, 0.0, 1.0)];
//! let goals = [Point3::new(1.0, 0.0, 1.0), Point3::new(-1.0, 0.0, 1.0)];
//! let report = dmpc.solve(&starts, &goals)?;
//! let residuals = post::collision_violations(&report.trajectories, dmpc.metric());
//! println!("converged: {}, residuals: {}", report.converged(), residuals.len());
//! # Ok::<(), dmpc_core::DmpcError>(())
//! ```
//!
//! With the `python` feature the crate also builds as a Python extension
//! exposing `solve_dmpc_py` and `solve_parallel_dmpc_py`.

pub mod cluster;
pub mod collision;
pub mod config;
pub mod driver;
pub mod error;
pub mod horizon;
pub mod init;
pub mod interp;
pub mod io;
pub mod post;
pub mod qp;
pub mod scenario;
pub mod structs;

#[cfg(feature = "python")]
mod python;

pub use collision::EllipsoidMetric;
pub use config::{CostWeights, DmpcConfig, SolverSettings};
pub use driver::Dmpc;
pub use error::{DmpcError, Result};
pub use structs::{
    AgentState, CollisionResidual, DriverState, FailureSite, GoalSet, Point3, Prediction, Priority,
    SolveReport, Trajectory,
};
