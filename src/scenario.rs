//! Random test scenarios: separated start positions and permuted goals.

use crate::error::{DmpcError, Result};
use crate::structs::Point3;
use rand::seq::SliceRandom;
use rand::Rng;

/// Samples tried for one point before giving up.
const MAX_ATTEMPTS: usize = 10_000;

/// Draws `n` points uniformly inside the box `[pmin, pmax]`, every pair at
/// least `rmin` apart.
pub fn gen_rand_pts<R: Rng>(
    n: usize,
    pmin: &Point3,
    pmax: &Point3,
    rmin: f64,
    rng: &mut R,
) -> Result<Vec<Point3>> {
    if (0..3).any(|axis| !(pmin[axis] < pmax[axis])) {
        return Err(DmpcError::Scenario(format!(
            "empty sampling box {:?} .. {:?}",
            pmin.as_slice(),
            pmax.as_slice()
        )));
    }

    let mut points: Vec<Point3> = Vec::with_capacity(n);
    while points.len() < n {
        let candidate = (0..MAX_ATTEMPTS)
            .map(|_| {
                Point3::new(
                    rng.gen_range(pmin.x..pmax.x),
                    rng.gen_range(pmin.y..pmax.y),
                    rng.gen_range(pmin.z..pmax.z),
                )
            })
            .find(|p| points.iter().all(|q| (p - q).norm() >= rmin))
            .ok_or_else(|| {
                DmpcError::Scenario(format!(
                    "could not place point {} of {} with separation {rmin}",
                    points.len() + 1,
                    n
                ))
            })?;
        points.push(candidate);
    }
    Ok(points)
}

/// A random permutation of `points`, used to turn start positions into goals.
pub fn gen_rand_perm<R: Rng>(points: &[Point3], rng: &mut R) -> Vec<Point3> {
    let mut shuffled = points.to_vec();
    shuffled.shuffle(rng);
    shuffled
}
