//! Serial batch mining: scan seeds until enough solvable ones are found.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use spiderbot::analysis::analyze_seed;
use spiderbot::solver::{SearchLimits, SolveStatus};

#[derive(Debug, Clone)]
pub struct MineConfig {
    pub suits: u8,
    pub start_seed: u64,
    pub count: u64,
    pub limits: SearchLimits,
    pub target_solved: usize,
    pub single_stage: bool,
    pub jsonl: Option<PathBuf>,
}

fn colored_status(status: SolveStatus) -> colored::ColoredString {
    match status {
        SolveStatus::Solved => status.as_str().green(),
        SolveStatus::ProvenUnsolvable => status.as_str().red(),
        SolveStatus::Unknown => status.as_str().yellow(),
    }
}

pub fn run_mine(cfg: &MineConfig) -> Result<()> {
    let mut solved = 0usize;
    let mut unknown = 0usize;
    let mut proven_unsolvable = 0usize;
    let started = Instant::now();

    for i in 0..cfg.count {
        let seed = cfg.start_seed + i;
        let t0 = Instant::now();
        let result = analyze_seed(seed, cfg.suits, &cfg.limits, !cfg.single_stage)?;
        let wall_ms = t0.elapsed().as_secs_f64() * 1000.0;

        if let Some(path) = &cfg.jsonl {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut payload = serde_json::to_value(&result)?;
            payload["wall_ms"] = json!((wall_ms * 1000.0).round() / 1000.0);
            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("open {}", path.display()))?;
            writeln!(file, "{payload}")?;
        }

        match result.status {
            SolveStatus::Solved => solved += 1,
            SolveStatus::ProvenUnsolvable => proven_unsolvable += 1,
            SolveStatus::Unknown => unknown += 1,
        }

        println!(
            "seed={seed} status={} reason={} wall_ms={wall_ms:.1} solver_ms={} expanded={} unique={} score={}",
            colored_status(result.status),
            result
                .metrics
                .reason
                .map_or_else(|| "-".to_string(), |r| r.to_string()),
            result.metrics.elapsed_ms,
            result.metrics.expanded_nodes,
            result.metrics.unique_states,
            result
                .difficulty_score
                .map_or_else(|| "-".to_string(), |s| s.to_string()),
        );

        if solved >= cfg.target_solved {
            break;
        }
    }

    let total_ms = started.elapsed().as_secs_f64() * 1000.0;
    println!(
        "summary suits={} scanned={} solved={} unknown={} proven_unsolvable={} total_ms={total_ms:.1}",
        cfg.suits,
        solved + unknown + proven_unsolvable,
        solved,
        unknown,
        proven_unsolvable,
    );
    Ok(())
}
