//! Trajectory files.
//!
//! The text format holds one block per agent. Each block is a header line
//! followed by `pos`, `vel` and `acc` sections of three rows (x, y, z) with
//! one whitespace-separated column per step. The JSON format is the serde
//! encoding of `Vec<Trajectory>`.

use crate::error::Result;
use crate::structs::Trajectory;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub fn write_trajectories(path: impl AsRef<Path>, trajectories: &[Trajectory]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    format_trajectories(&mut out, trajectories)?;
    out.flush()?;
    Ok(())
}

pub fn format_trajectories<W: Write>(out: &mut W, trajectories: &[Trajectory]) -> Result<()> {
    for (agent, trajectory) in trajectories.iter().enumerate() {
        writeln!(out, "agent {agent} steps {}", trajectory.len())?;
        for (label, rows) in [("pos", &trajectory.pos), ("vel", &trajectory.vel), ("acc", &trajectory.acc)] {
            writeln!(out, "{label}")?;
            for axis in 0..3 {
                let row: Vec<String> = rows.iter().map(|sample| format!("{:.6}", sample[axis])).collect();
                writeln!(out, "{}", row.join(" "))?;
            }
        }
    }
    Ok(())
}

pub fn write_trajectories_json(path: impl AsRef<Path>, trajectories: &[Trajectory]) -> Result<()> {
    let out = BufWriter::new(File::create(path)?);
    serde_json::to_writer(out, trajectories)?;
    Ok(())
}

pub fn read_trajectories_json(path: impl AsRef<Path>) -> Result<Vec<Trajectory>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
