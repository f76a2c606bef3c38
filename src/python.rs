//! Python bindings, built with the `python` feature.

use crate::config::DmpcConfig;
use crate::driver::Dmpc;
use crate::error::DmpcError;
use crate::post::convergence_step;
use crate::scenario::{gen_rand_perm, gen_rand_pts};
use crate::structs::{Point3, SolveReport};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

impl From<DmpcError> for PyErr {
    fn from(err: DmpcError) -> PyErr {
        PyValueError::new_err(err.to_string())
    }
}

/// Trajectories of one solve, indexed `[agent][step][axis]`.
#[pyclass]
#[derive(Clone, Debug)]
pub struct DmpcResult {
    #[pyo3(get)]
    pub pos: Vec<Vec<[f64; 3]>>,
    #[pyo3(get)]
    pub vel: Vec<Vec<[f64; 3]>>,
    #[pyo3(get)]
    pub acc: Vec<Vec<[f64; 3]>>,
    #[pyo3(get)]
    pub fail_count: usize,
    #[pyo3(get)]
    pub converged: bool,
    /// First step with every agent at its goal.
    #[pyo3(get)]
    pub convergence_step: Option<usize>,
}

#[pymethods]
impl DmpcResult {
    fn __repr__(&self) -> String {
        format!(
            "DmpcResult(agents={}, converged={}, fail_count={})",
            self.pos.len(),
            self.converged,
            self.fail_count
        )
    }
}

impl DmpcResult {
    fn from_report(report: SolveReport, goals: &[Point3], tolerance: f64) -> Self {
        let convergence_step = convergence_step(&report.trajectories, goals, tolerance);
        let fail_count = report.fail_count();
        let converged = report.converged();
        let (mut pos, mut vel, mut acc) = (Vec::new(), Vec::new(), Vec::new());
        for trajectory in report.trajectories {
            pos.push(trajectory.pos);
            vel.push(trajectory.vel);
            acc.push(trajectory.acc);
        }
        DmpcResult {
            pos,
            vel,
            acc,
            fail_count,
            converged,
            convergence_step,
        }
    }
}

fn load_config(config_json: Option<&str>) -> PyResult<DmpcConfig> {
    Ok(match config_json {
        Some(json) => DmpcConfig::from_json_str(json)?,
        None => DmpcConfig::default(),
    })
}

fn to_points(rows: &[[f64; 3]]) -> Vec<Point3> {
    rows.iter().map(|p| Point3::from(*p)).collect()
}

fn run(
    py: Python<'_>,
    starts: Vec<[f64; 3]>,
    goals: Vec<[f64; 3]>,
    config_json: Option<&str>,
    parallel: bool,
) -> PyResult<DmpcResult> {
    let config = load_config(config_json)?;
    let tolerance = config.goal_tolerance;
    let dmpc = Dmpc::new(config)?;
    let starts = to_points(&starts);
    let goals = to_points(&goals);

    let report = py.allow_threads(|| {
        if parallel {
            dmpc.solve_parallel(&starts, &goals)
        } else {
            dmpc.solve(&starts, &goals)
        }
    })?;
    Ok(DmpcResult::from_report(report, &goals, tolerance))
}

#[pyfunction]
#[pyo3(signature = (starts, goals, config_json=None))]
fn solve_dmpc_py(
    py: Python<'_>,
    starts: Vec<[f64; 3]>,
    goals: Vec<[f64; 3]>,
    config_json: Option<&str>,
) -> PyResult<DmpcResult> {
    run(py, starts, goals, config_json, false)
}

#[pyfunction]
#[pyo3(signature = (starts, goals, config_json=None))]
fn solve_parallel_dmpc_py(
    py: Python<'_>,
    starts: Vec<[f64; 3]>,
    goals: Vec<[f64; 3]>,
    config_json: Option<&str>,
) -> PyResult<DmpcResult> {
    run(py, starts, goals, config_json, true)
}

/// Random separated starts inside the workspace and a permutation of them as goals.
#[pyfunction]
#[pyo3(signature = (n, seed=42, config_json=None))]
fn gen_rand_scenario_py(
    n: usize,
    seed: u64,
    config_json: Option<&str>,
) -> PyResult<(Vec<[f64; 3]>, Vec<[f64; 3]>)> {
    let config = load_config(config_json)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let starts = gen_rand_pts(
        n,
        &config.workspace_min(),
        &config.workspace_max(),
        config.rmin * config.c.max(1.0),
        &mut rng,
    )?;
    let goals = gen_rand_perm(&starts, &mut rng);
    let rows = |points: &[Point3]| -> Vec<[f64; 3]> { points.iter().map(|p| [p.x, p.y, p.z]).collect() };
    Ok((rows(&starts), rows(&goals)))
}

#[pymodule]
fn dmpc_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<DmpcResult>()?;

    m.add_function(wrap_pyfunction!(solve_dmpc_py, m)?)?;
    m.add_function(wrap_pyfunction!(solve_parallel_dmpc_py, m)?)?;
    m.add_function(wrap_pyfunction!(gen_rand_scenario_py, m)?)?;

    Ok(())
}
