//! # Clustered Parallel Driver
//!
//! Same receding-horizon loop as the sequential driver, but every step the
//! agents are first split into clusters: connected components of the graph
//! linking agents closer than `coupling_distance`. Each cluster re-plans as
//! one task on a bounded rayon pool, with its own agents in priority order.
//!
//! A task only reads the registry frozen at the end of the previous step for
//! agents outside its cluster. The merge into the registry happens on the
//! calling thread after every task joined, and only then is the next
//! proximity graph built.

use crate::collision::Obstacle;
use crate::driver::{Dmpc, Session};
use crate::error::Result;
use crate::qp::StepOutcome;
use crate::structs::{Point3, Prediction, Priority, SolveReport};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::VecDeque;

/// Connected components of the proximity graph.
///
/// Members of a cluster are sorted by their rank in the priority order and
/// clusters by the rank of their first member.
pub fn proximity_clusters(positions: &[Point3], threshold: f64, ranks: &[usize]) -> Vec<Vec<usize>> {
    let n = positions.len();
    let mut assigned = vec![false; n];
    let mut clusters = Vec::new();

    for seed in 0..n {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut cluster = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            for other in 0..n {
                if !assigned[other] && (positions[current] - positions[other]).norm() < threshold {
                    assigned[other] = true;
                    cluster.push(other);
                    queue.push_back(other);
                }
            }
        }
        cluster.sort_by_key(|&agent| ranks[agent]);
        clusters.push(cluster);
    }

    clusters.sort_by_key(|cluster| ranks[cluster[0]]);
    clusters
}

impl Dmpc {
    /// Clustered solve with agents re-planning in index order.
    pub fn solve_parallel(&self, starts: &[Point3], goals: &[Point3]) -> Result<SolveReport> {
        self.solve_parallel_with_priority(starts, goals, &Priority::identity(starts.len()))
    }

    pub fn solve_parallel_with_priority(
        &self,
        starts: &[Point3],
        goals: &[Point3],
        priority: &Priority,
    ) -> Result<SolveReport> {
        let mut session = self.prepare(starts, goals, priority)?;
        let config = self.config();
        let total = config.total_steps();
        let ranks = priority.ranks();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_workers)
            .build()?;
        info!(
            "Clustered DMPC: {} agents, {} steps, {} workers",
            session.goals.len(),
            total,
            pool.current_num_threads()
        );

        let mut step = 0;
        while !session.state.is_terminal() {
            let positions: Vec<Point3> = session.states.iter().map(|s| s.position).collect();
            let clusters = proximity_clusters(&positions, config.coupling_distance, &ranks);
            debug!("Step {}: {} clusters", step, clusters.len());

            let results: Vec<Vec<(usize, StepOutcome)>> = {
                let frozen = &session;
                pool.install(|| {
                    clusters
                        .par_iter()
                        .map(|cluster| self.solve_cluster(frozen, cluster, step))
                        .collect()
                })
            };

            for (agent, outcome) in results.into_iter().flatten() {
                session.record(agent, step, outcome);
            }
            step += 1;
            session.evaluate(step, total, config.goal_tolerance);
        }

        Ok(session.finish(total))
    }

    /// Re-plans the agents of one cluster for `step` against the frozen registry.
    fn solve_cluster(&self, frozen: &Session, cluster: &[usize], step: usize) -> Vec<(usize, StepOutcome)> {
        let n = frozen.registry.len();
        let mut replanned: Vec<(usize, Prediction)> = Vec::with_capacity(cluster.len());
        let mut outcomes = Vec::with_capacity(cluster.len());

        for &agent in cluster {
            let outcome = {
                let obstacles: Vec<Obstacle<'_>> = (0..n)
                    .filter(|&other| other != agent)
                    .map(|other| match replanned.iter().find(|(id, _)| *id == other) {
                        Some((_, prediction)) => Obstacle {
                            agent: other,
                            prediction,
                            replanned: true,
                        },
                        None => Obstacle {
                            agent: other,
                            prediction: &frozen.registry[other],
                            replanned: false,
                        },
                    })
                    .collect();
                self.step_agent(
                    step,
                    &frozen.states[agent],
                    &frozen.goals.goals()[agent],
                    &frozen.registry[agent],
                    &obstacles,
                )
            };
            replanned.push((
                agent,
                Prediction {
                    start_step: step + 1,
                    positions: outcome.prediction.clone(),
                    planned_at: Some(step),
                },
            ));
            outcomes.push((agent, outcome));
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DmpcConfig;

    fn p(x: f64, y: f64, z: f64) -> Point3 {
        Point3::new(x, y, z)
    }

    #[test]
    fn test_far_agents_form_separate_clusters() {
        let positions = [p(0.0, 0.0, 1.0), p(10.0, 0.0, 1.0), p(0.5, 0.0, 1.0)];
        let clusters = proximity_clusters(&positions, 2.0, &[0, 1, 2]);
        assert_eq!(clusters, vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_chain_is_one_cluster() {
        let positions = [p(0.0, 0.0, 1.0), p(1.5, 0.0, 1.0), p(3.0, 0.0, 1.0), p(4.5, 0.0, 1.0)];
        let clusters = proximity_clusters(&positions, 2.0, &[0, 1, 2, 3]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_clusters_follow_priority() {
        let positions = [p(0.0, 0.0, 1.0), p(0.5, 0.0, 1.0), p(8.0, 0.0, 1.0)];
        let priority = Priority::new(vec![2, 1, 0]).unwrap();
        let clusters = proximity_clusters(&positions, 2.0, &priority.ranks());
        assert_eq!(clusters, vec![vec![2], vec![1, 0]]);
    }

    #[test]
    fn test_every_agent_in_exactly_one_cluster() {
        let positions: Vec<Point3> = (0..7).map(|i| p(1.7 * i as f64, (i % 2) as f64, 1.0)).collect();
        let clusters = proximity_clusters(&positions, 1.0, &(0..7).collect::<Vec<_>>());
        let mut members: Vec<usize> = clusters.into_iter().flatten().collect();
        members.sort_unstable();
        assert_eq!(members, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_parallel_matches_sequential_for_separate_pairs() {
        let config = DmpcConfig {
            pmin: [-10.0, -10.0, 0.2],
            pmax: [10.0, 10.0, 2.2],
            max_workers: 2,
            ..DmpcConfig::default()
        };
        let dmpc = Dmpc::new(config).unwrap();
        let starts = [p(-7.0, 0.0, 1.0), p(-5.0, 0.5, 1.0), p(5.0, 0.0, 1.0), p(7.0, -0.5, 1.0)];
        let goals = [p(-5.0, 0.0, 1.0), p(-7.0, 0.5, 1.0), p(7.0, 0.0, 1.0), p(5.0, -0.5, 1.0)];

        let sequential = dmpc.solve(&starts, &goals).unwrap();
        let parallel = dmpc.solve_parallel(&starts, &goals).unwrap();

        assert_eq!(sequential.state, parallel.state);
        assert_eq!(sequential.fail_count(), parallel.fail_count());
        for (a, b) in sequential.trajectories.iter().zip(&parallel.trajectories) {
            assert_eq!(a.len(), b.len());
            for k in 0..a.len() {
                assert!((a.position(k) - b.position(k)).norm() < 1e-9);
            }
        }
    }
}
