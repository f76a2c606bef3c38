//! Solver configuration.
//!
//! [`DmpcConfig`] holds every tunable of a solve session. It is validated once
//! when a [`Dmpc`](crate::Dmpc) is built and never changes afterwards.
//!
//! ```
//! use dmpc_core::DmpcConfig;
//!
//! let config = DmpcConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.total_steps(), 100);
//! ```

use crate::error::{DmpcError, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Weights of the per-step QP objective and of the initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Penalty on the distance between each predicted position and the goal.
    pub tracking: f64,
    /// Penalty on consecutive acceleration differences.
    pub variation: f64,
    /// Penalty on acceleration magnitude.
    pub effort: f64,
    /// Initializer penalty on the final position error.
    pub init_position: f64,
    /// Initializer penalty on the final velocity.
    pub init_velocity: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            tracking: 10.0,
            variation: 1.0,
            effort: 0.01,
            init_position: 1000.0,
            init_velocity: 1000.0,
        }
    }
}

/// OSQP settings used for every step solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub eps_abs: f64,
    pub eps_rel: f64,
    pub max_iter: u32,
    pub polishing: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            max_iter: 4000,
            polishing: true,
        }
    }
}

/// Configuration of a DMPC solve session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DmpcConfig {
    /// Time step in seconds.
    pub h: f64,
    /// Maximum time to complete the transition, in seconds.
    pub t_max: f64,
    /// Length of the prediction horizon in steps.
    pub k_hor: usize,
    /// Order of the ellipsoid norm used for the collision constraint.
    pub order: u32,
    /// Multiplier of the separation along the vertical axis.
    pub c: f64,
    /// Minimum horizontal separation between agents.
    pub rmin: f64,
    /// Per-axis acceleration limit.
    pub alim: f64,
    /// Distance to the goal under which an agent counts as arrived.
    pub goal_tolerance: f64,
    /// Lower workspace corner.
    pub pmin: [f64; 3],
    /// Upper workspace corner.
    pub pmax: [f64; 3],
    pub weights: CostWeights,
    /// Agents closer than this share a cluster in the parallel driver.
    pub coupling_distance: f64,
    /// Threads in the clustered driver's pool; 0 lets rayon decide.
    pub max_workers: usize,
    pub solver: SolverSettings,
}

impl Default for DmpcConfig {
    fn default() -> Self {
        Self {
            h: 0.2,
            t_max: 20.0,
            k_hor: 15,
            order: 2,
            c: 1.5,
            rmin: 0.5,
            alim: 0.5,
            goal_tolerance: 0.05,
            pmin: [-5.0, -5.0, 0.2],
            pmax: [5.0, 5.0, 2.2],
            weights: CostWeights::default(),
            coupling_distance: 4.0,
            max_workers: 0,
            solver: SolverSettings::default(),
        }
    }
}

impl DmpcConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Number of discrete steps in the full transition (`t_max / h`).
    pub fn total_steps(&self) -> usize {
        (self.t_max / self.h).round() as usize
    }

    pub fn workspace_min(&self) -> Vector3<f64> {
        Vector3::from(self.pmin)
    }

    pub fn workspace_max(&self) -> Vector3<f64> {
        Vector3::from(self.pmax)
    }

    pub fn in_workspace(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.pmin[i] && p[i] <= self.pmax[i])
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("h", self.h),
            ("t_max", self.t_max),
            ("c", self.c),
            ("rmin", self.rmin),
            ("alim", self.alim),
            ("goal_tolerance", self.goal_tolerance),
            ("coupling_distance", self.coupling_distance),
            ("weights.tracking", self.weights.tracking),
            ("solver.eps_abs", self.solver.eps_abs),
            ("solver.eps_rel", self.solver.eps_rel),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DmpcError::configuration(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        let non_negative = [
            ("weights.variation", self.weights.variation),
            ("weights.effort", self.weights.effort),
            ("weights.init_position", self.weights.init_position),
            ("weights.init_velocity", self.weights.init_velocity),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(DmpcError::configuration(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }

        if self.order < 1 {
            return Err(DmpcError::configuration("order must be at least 1"));
        }
        if self.k_hor == 0 {
            return Err(DmpcError::configuration("k_hor must be positive"));
        }
        if self.k_hor > self.total_steps() {
            return Err(DmpcError::configuration(format!(
                "k_hor ({}) exceeds the number of steps in t_max/h ({})",
                self.k_hor,
                self.total_steps()
            )));
        }
        let separation = self.rmin * self.c.max(1.0);
        if self.coupling_distance < separation {
            return Err(DmpcError::configuration(format!(
                "coupling_distance ({}) is below the minimum separation extent ({separation})",
                self.coupling_distance
            )));
        }
        if self.solver.max_iter == 0 {
            return Err(DmpcError::configuration("solver.max_iter must be positive"));
        }
        for i in 0..3 {
            if !(self.pmin[i] < self.pmax[i]) {
                return Err(DmpcError::configuration(format!(
                    "workspace axis {i} is empty: pmin {} >= pmax {}",
                    self.pmin[i], self.pmax[i]
                )));
            }
        }
        Ok(())
    }
}
