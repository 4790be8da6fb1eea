//! Staged widening search and difficulty estimation.
//!
//! A seed is first searched under the strict human-like policy, then under
//! progressively wider ones; the resulting telemetry is folded into a
//! difficulty score whose coefficients are empirical constants shared with
//! the existing seed pools and must not be re-derived.

use core::fmt;
use core::str::FromStr;

use serde::Serialize;

use crate::engine::legal_action_count;
use crate::pruning::SearchPolicy;
use crate::shuffler::{build_initial_state, ConfigError, GameConfig};
use crate::solver::{solve, SearchLimits, SolveResult, SolveStatus, StopReason};
use crate::state::Spider;

#[derive(Debug, Clone, Copy)]
pub struct SearchStage {
    pub name: &'static str,
    pub policy: SearchPolicy,
    pub time_share: f64,
    pub node_share: f64,
    pub frontier_share: f64,
}

impl SearchStage {
    const fn new(name: &'static str, policy: SearchPolicy, time_share: f64, node_share: f64) -> Self {
        Self {
            name,
            policy,
            time_share,
            node_share,
            frontier_share: 1.0,
        }
    }
}

/// Stage plan per suit count: easy decks get two stages, harder ones trade
/// strict-stage budget for the complete wide stage.
#[must_use]
pub fn stage_plan(suits: Option<u8>) -> Vec<SearchStage> {
    let strict = SearchPolicy::default();
    let balanced = SearchPolicy::balanced();
    let wide = SearchPolicy::wide();

    match suits {
        Some(1) => vec![
            SearchStage::new("strict", strict, 0.55, 0.50),
            SearchStage::new("balanced", balanced, 0.45, 0.50),
        ],
        Some(2) => vec![
            SearchStage::new("strict", strict, 0.40, 0.35),
            SearchStage::new("balanced", balanced, 0.35, 0.35),
            SearchStage::new("wide", wide, 0.25, 0.30),
        ],
        _ => vec![
            SearchStage::new("strict", strict, 0.30, 0.25),
            SearchStage::new("balanced", balanced, 0.35, 0.35),
            SearchStage::new("wide", wide, 0.35, 0.40),
        ],
    }
}

fn allocate_stage_limits(base: &SearchLimits, stage: &SearchStage) -> SearchLimits {
    SearchLimits {
        max_nodes: 2_000.max((base.max_nodes as f64 * stage.node_share) as usize),
        max_seconds: (base.max_seconds * stage.time_share).max(0.05),
        max_frontier: 10_000.max((base.max_frontier as f64 * stage.frontier_share) as usize),
    }
}

/// Telemetry snapshot of one executed stage, kept in the metrics payload.
#[derive(Debug, Clone, Serialize)]
pub struct StageMetrics {
    pub name: &'static str,
    pub status: SolveStatus,
    pub reason: StopReason,
    pub elapsed_ms: f64,
    pub expanded_nodes: usize,
    pub generated_nodes: usize,
    pub unique_states: usize,
    pub duplicates: usize,
    pub max_frontier: usize,
}

impl StageMetrics {
    fn from_result(name: &'static str, result: &SolveResult) -> Self {
        Self {
            name,
            status: result.status,
            reason: result.stop_reason,
            elapsed_ms: round_to(result.elapsed_ms, 3),
            expanded_nodes: result.expanded_nodes,
            generated_nodes: result.generated_nodes,
            unique_states: result.unique_states,
            duplicates: result.duplicate_states_skipped,
            max_frontier: result.max_frontier,
        }
    }
}

/// Run the stage plan sequentially under partitioned budgets, stopping at
/// the first decisive stage; counters are summed, extrema maxed, and
/// branching weighted by expanded nodes.
fn run_staged(
    initial: &Spider,
    limits: &SearchLimits,
    suits: Option<u8>,
) -> (SolveResult, Vec<StageMetrics>, &'static str) {
    let stages = stage_plan(suits);
    let mut details = Vec::with_capacity(stages.len());

    let mut expanded = 0usize;
    let mut generated = 0usize;
    let mut unique = 0usize;
    let mut dead_end = 0usize;
    let mut duplicates = 0usize;
    let mut elapsed_ms = 0.0f64;
    let mut max_frontier = 0usize;
    let mut max_depth = 0usize;
    let mut branching_num = 0.0f64;
    let mut branching_den = 0usize;

    let mut final_result = None;
    let mut final_stage = stages[stages.len() - 1].name;

    for stage in &stages {
        let stage_limits = allocate_stage_limits(limits, stage);
        let result = solve(initial, &stage_limits, &stage.policy);
        details.push(StageMetrics::from_result(stage.name, &result));

        expanded += result.expanded_nodes;
        generated += result.generated_nodes;
        unique += result.unique_states;
        dead_end += result.dead_end_nodes;
        duplicates += result.duplicate_states_skipped;
        elapsed_ms += result.elapsed_ms;
        max_frontier = max_frontier.max(result.max_frontier);
        max_depth = max_depth.max(result.max_depth);
        branching_num += result.avg_branching * result.expanded_nodes.max(1) as f64;
        branching_den += result.expanded_nodes.max(1);

        let decisive = matches!(
            result.status,
            SolveStatus::Solved | SolveStatus::ProvenUnsolvable
        );
        final_stage = stage.name;
        final_result = Some(result);
        if decisive {
            break;
        }
    }

    let last = final_result.unwrap_or_else(|| solve(initial, limits, &SearchPolicy::default()));
    let merged = SolveResult {
        status: last.status,
        stop_reason: last.stop_reason,
        solution: last.solution,
        solution_states: last.solution_states,
        expanded_nodes: expanded,
        generated_nodes: generated,
        unique_states: unique,
        max_frontier,
        dead_end_nodes: dead_end,
        duplicate_states_skipped: duplicates,
        avg_branching: branching_num / branching_den.max(1) as f64,
        elapsed_ms,
        max_depth,
        solution_revealed: last.solution_revealed,
        solution_freed: last.solution_freed,
        solution_deals: last.solution_deals,
    };
    (merged, details, final_stage)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DifficultyBand {
    Easy,
    Medium,
    Hard,
    Unsolvable,
}

impl DifficultyBand {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "Easy",
            Self::Medium => "Medium",
            Self::Hard => "Hard",
            Self::Unsolvable => "Unsolvable",
        }
    }
}

impl fmt::Display for DifficultyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DifficultyBand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Easy" => Ok(Self::Easy),
            "Medium" => Ok(Self::Medium),
            "Hard" => Ok(Self::Hard),
            "Unsolvable" => Ok(Self::Unsolvable),
            _ => Err(()),
        }
    }
}

const BAND_EASY_BELOW: f64 = 80_000.0;
const BAND_MEDIUM_BELOW: f64 = 220_000.0;

#[must_use]
pub fn difficulty_band(score: f64) -> DifficultyBand {
    if score < BAND_EASY_BELOW {
        DifficultyBand::Easy
    } else if score < BAND_MEDIUM_BELOW {
        DifficultyBand::Medium
    } else {
        DifficultyBand::Hard
    }
}

/// The raw inputs of the difficulty score, reported for transparency.
#[derive(Debug, Clone, Serialize)]
pub struct DifficultyComponents {
    pub expanded_nodes: f64,
    pub solution_len: f64,
    pub deal_count: f64,
    pub avg_branching: f64,
    pub forced_pct: f64,
    pub dead_pct: f64,
    pub pressure_pct: f64,
    pub suit_factor: f64,
}

// Empirical weights shared with every previously mined seed pool; changing
// them would shift existing bucket boundaries.
const W_SOLUTION_LEN: f64 = 420.0;
const W_DEAL_COUNT: f64 = 9_000.0;
const W_BRANCHING: f64 = 1_600.0;
const W_FORCED_PCT: f64 = 2_600.0;
const W_DEAD_PCT: f64 = 1_800.0;
const W_PRESSURE_PCT: f64 = 1_200.0;
const W_SUIT_FACTOR: f64 = 15_000.0;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeMetrics {
    pub expanded_nodes: usize,
    pub generated_nodes: usize,
    pub unique_states: usize,
    pub duplicate_states_skipped: usize,
    pub max_frontier: usize,
    pub dead_end_nodes: usize,
    pub avg_branching: f64,
    pub elapsed_ms: f64,
    pub max_depth: usize,
    pub final_stage: &'static str,
    pub stages: Vec<StageMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_revealed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_freed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution_deals: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_legal_on_path: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_end_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_components: Option<DifficultyComponents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort_score: Option<f64>,
}

impl AnalyzeMetrics {
    fn from_result(result: &SolveResult, final_stage: &'static str, stages: Vec<StageMetrics>) -> Self {
        Self {
            expanded_nodes: result.expanded_nodes,
            generated_nodes: result.generated_nodes,
            unique_states: result.unique_states,
            duplicate_states_skipped: result.duplicate_states_skipped,
            max_frontier: result.max_frontier,
            dead_end_nodes: result.dead_end_nodes,
            avg_branching: round_to(result.avg_branching, 4),
            elapsed_ms: round_to(result.elapsed_ms, 3),
            max_depth: result.max_depth,
            final_stage,
            stages,
            reason: None,
            solution_len: None,
            solution_revealed: None,
            solution_freed: None,
            solution_deals: None,
            avg_legal_on_path: None,
            forced_ratio: None,
            dead_end_ratio: None,
            difficulty_components: None,
            effort_score: None,
        }
    }
}

/// Solvability verdict, difficulty estimate, and telemetry for one deal.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResult {
    pub seed: Option<u64>,
    pub suits: Option<u8>,
    pub status: SolveStatus,
    pub solvable: Option<bool>,
    pub proven: bool,
    pub difficulty_score: Option<f64>,
    pub difficulty_band: Option<DifficultyBand>,
    pub metrics: AnalyzeMetrics,
    pub solution: Vec<String>,
}

fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// Run the solver (staged unless told otherwise) and estimate difficulty
/// from the search telemetry and the solution path.
#[must_use]
pub fn analyze_state(
    initial: &Spider,
    suits: Option<u8>,
    seed: Option<u64>,
    limits: &SearchLimits,
    policy: &SearchPolicy,
    staged: bool,
) -> AnalyzeResult {
    let (solved, stages, final_stage) = if staged {
        run_staged(initial, limits, suits)
    } else {
        let result = solve(initial, limits, policy);
        let details = vec![StageMetrics::from_result("single", &result)];
        (result, details, "single")
    };

    let mut metrics = AnalyzeMetrics::from_result(&solved, final_stage, stages);

    match solved.status {
        SolveStatus::Solved => {
            let path = &solved.solution_states[..solved.solution_states.len().saturating_sub(1)];
            let legal_counts: Vec<usize> = path.iter().map(legal_action_count).collect();
            let (avg_legal, forced_ratio) = if legal_counts.is_empty() {
                (0.0, 1.0)
            } else {
                let avg = legal_counts.iter().sum::<usize>() as f64 / legal_counts.len() as f64;
                let forced = legal_counts.iter().filter(|&&n| n == 1).count() as f64
                    / legal_counts.len() as f64;
                (avg, forced)
            };

            let dead_ratio =
                solved.dead_end_nodes as f64 / solved.expanded_nodes.max(1) as f64;
            let pressure = 1.0 / avg_legal.max(1.0);
            let suit_factor = f64::from(suits.unwrap_or(1).max(1) - 1);

            let components = DifficultyComponents {
                expanded_nodes: round_to(solved.expanded_nodes as f64, 3),
                solution_len: round_to(solved.solution.len() as f64, 3),
                deal_count: round_to(solved.solution_deals as f64, 3),
                avg_branching: round_to(solved.avg_branching, 4),
                forced_pct: round_to(forced_ratio * 100.0, 4),
                dead_pct: round_to(dead_ratio * 100.0, 4),
                pressure_pct: round_to(pressure * 100.0, 4),
                suit_factor: round_to(suit_factor, 4),
            };

            let score = (solved.expanded_nodes as f64
                + W_SOLUTION_LEN * solved.solution.len() as f64
                + W_DEAL_COUNT * solved.solution_deals as f64
                + W_BRANCHING * solved.avg_branching
                + W_FORCED_PCT * forced_ratio * 100.0
                + W_DEAD_PCT * dead_ratio * 100.0
                + W_PRESSURE_PCT * pressure * 100.0
                + W_SUIT_FACTOR * suit_factor)
                .max(0.0);

            metrics.solution_len = Some(solved.solution.len());
            metrics.solution_revealed = Some(solved.solution_revealed);
            metrics.solution_freed = Some(solved.solution_freed);
            metrics.solution_deals = Some(solved.solution_deals);
            metrics.avg_legal_on_path = Some(round_to(avg_legal, 4));
            metrics.forced_ratio = Some(round_to(forced_ratio, 4));
            metrics.dead_end_ratio = Some(round_to(dead_ratio, 4));
            metrics.difficulty_components = Some(components);

            AnalyzeResult {
                seed,
                suits,
                status: SolveStatus::Solved,
                solvable: Some(true),
                proven: false,
                difficulty_score: Some(round_to(score, 3)),
                difficulty_band: Some(difficulty_band(score)),
                metrics,
                solution: solved.solution.iter().map(ToString::to_string).collect(),
            }
        }
        SolveStatus::ProvenUnsolvable => {
            metrics.reason = Some(solved.stop_reason);
            AnalyzeResult {
                seed,
                suits,
                status: SolveStatus::ProvenUnsolvable,
                solvable: Some(false),
                proven: true,
                difficulty_score: Some(100.0),
                difficulty_band: Some(DifficultyBand::Unsolvable),
                metrics,
                solution: Vec::new(),
            }
        }
        SolveStatus::Unknown => {
            metrics.reason = Some(solved.stop_reason);
            let node_term = (solved.expanded_nodes as f64).ln_1p()
                / (limits.max_nodes.max(2_000) as f64).ln_1p();
            let time_term = solved.elapsed_ms / (limits.max_seconds * 1000.0).max(1.0);
            let effort =
                (100.0 * (0.70 * node_term.min(1.0) + 0.30 * time_term.min(1.0))).min(100.0);
            metrics.effort_score = Some(round_to(effort, 3));

            AnalyzeResult {
                seed,
                suits,
                status: SolveStatus::Unknown,
                solvable: None,
                proven: false,
                difficulty_score: None,
                difficulty_band: None,
                metrics,
                solution: Vec::new(),
            }
        }
    }
}

/// Deal the seed deterministically and analyze it.
pub fn analyze_seed(
    seed: u64,
    suits: u8,
    limits: &SearchLimits,
    staged: bool,
) -> Result<AnalyzeResult, ConfigError> {
    let config = GameConfig::with_seed(suits, seed);
    let initial = build_initial_state(&config)?;
    Ok(analyze_state(
        &initial,
        Some(suits),
        Some(seed),
        limits,
        &SearchPolicy::default(),
        staged,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Card;

    fn card(suit: u8, rank: u8) -> Card {
        Card::new(suit, rank)
    }

    fn one_move_win() -> Spider {
        let below_ace: Vec<Card> = (0..12).map(|i| card(0, 12 - i)).collect();
        let mut stacks = vec![below_ace, vec![card(0, 0)]];
        stacks.extend(std::iter::repeat_with(Vec::new).take(8));
        Spider::with_all_visible(Vec::new(), stacks)
    }

    #[test]
    fn test_stage_plan_shapes() {
        let one = stage_plan(Some(1));
        assert_eq!(
            one.iter().map(|s| s.name).collect::<Vec<_>>(),
            vec!["strict", "balanced"]
        );
        let two = stage_plan(Some(2));
        assert_eq!(
            two.iter().map(|s| s.name).collect::<Vec<_>>(),
            vec!["strict", "balanced", "wide"]
        );
        assert!(two[2].policy.is_complete());
        let four = stage_plan(Some(4));
        assert_eq!(four.len(), 3);
        assert!((four[0].time_share - 0.30).abs() < 1e-12);
        assert!((four[2].node_share - 0.40).abs() < 1e-12);
    }

    #[test]
    fn test_stage_limits_floor() {
        let tiny = SearchLimits {
            max_nodes: 100,
            max_seconds: 0.01,
            max_frontier: 100,
        };
        let stage = &stage_plan(Some(4))[0];
        let allocated = allocate_stage_limits(&tiny, stage);
        assert_eq!(allocated.max_nodes, 2_000);
        assert!((allocated.max_seconds - 0.05).abs() < 1e-12);
        assert_eq!(allocated.max_frontier, 10_000);
    }

    #[test]
    fn test_analyze_solved_state() {
        let result = analyze_state(
            &one_move_win(),
            Some(1),
            Some(123),
            &SearchLimits {
                max_nodes: 5_000,
                max_seconds: 1.0,
                max_frontier: 20_000,
            },
            &SearchPolicy::default(),
            true,
        );
        assert_eq!(result.status, SolveStatus::Solved);
        assert_eq!(result.solvable, Some(true));
        assert!(!result.proven);
        assert_eq!(result.metrics.solution_len, Some(1));
        assert_eq!(result.solution, vec!["MOVE(S1:0->S0,len=1)".to_string()]);
        assert_eq!(result.difficulty_band, Some(DifficultyBand::Easy));

        // The reported score must match its own component breakdown.
        let score = result.difficulty_score.unwrap();
        let c = result.metrics.difficulty_components.as_ref().unwrap();
        let recomputed = c.expanded_nodes
            + 420.0 * c.solution_len
            + 9_000.0 * c.deal_count
            + 1_600.0 * c.avg_branching
            + 2_600.0 * c.forced_pct
            + 1_800.0 * c.dead_pct
            + 1_200.0 * c.pressure_pct
            + 15_000.0 * c.suit_factor;
        assert!((score - recomputed).abs() < 1.0);
    }

    #[test]
    fn test_analyze_unknown_reports_effort() {
        let initial = crate::shuffler::build_initial_state(&GameConfig::with_seed(4, 77)).unwrap();
        let limits = SearchLimits {
            max_nodes: 10,
            max_seconds: 0.5,
            max_frontier: 5_000,
        };
        let result = analyze_state(
            &initial,
            Some(4),
            Some(77),
            &limits,
            &SearchPolicy::default(),
            false,
        );
        assert_eq!(result.status, SolveStatus::Unknown);
        assert_eq!(result.solvable, None);
        assert_eq!(result.difficulty_score, None);
        assert_eq!(result.difficulty_band, None);
        assert_eq!(result.metrics.final_stage, "single");
        assert_eq!(result.metrics.reason, Some(StopReason::LimitsReached));
        let effort = result.metrics.effort_score.unwrap();
        assert!(effort > 0.0 && effort <= 100.0);
    }

    #[test]
    fn test_staged_proves_unsolvable() {
        // Two lone aces: finite reachability with no goal. Only the wide
        // stage may escalate to a proof.
        let state =
            Spider::with_all_visible(Vec::new(), vec![vec![card(0, 0)], vec![card(1, 0)]]);
        let result = analyze_state(
            &state,
            Some(4),
            None,
            &SearchLimits::default(),
            &SearchPolicy::default(),
            true,
        );
        assert_eq!(result.status, SolveStatus::ProvenUnsolvable);
        assert_eq!(result.solvable, Some(false));
        assert!(result.proven);
        assert_eq!(result.difficulty_band, Some(DifficultyBand::Unsolvable));
        assert_eq!(result.difficulty_score, Some(100.0));
        assert_eq!(result.metrics.final_stage, "wide");
        assert_eq!(result.metrics.stages.len(), 3);
        assert_eq!(result.metrics.stages[0].status, SolveStatus::Unknown);
        assert_eq!(
            result.metrics.stages[0].reason,
            StopReason::PolicySpaceExhausted
        );
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(difficulty_band(0.0), DifficultyBand::Easy);
        assert_eq!(difficulty_band(79_999.9), DifficultyBand::Easy);
        assert_eq!(difficulty_band(80_000.0), DifficultyBand::Medium);
        assert_eq!(difficulty_band(219_999.9), DifficultyBand::Medium);
        assert_eq!(difficulty_band(220_000.0), DifficultyBand::Hard);
    }

    #[test]
    fn test_analyze_seed_round_trips_config() {
        let result = analyze_seed(
            20260210,
            1,
            &SearchLimits {
                max_nodes: 1_500,
                max_seconds: 0.1,
                max_frontier: 5_000,
            },
            true,
        )
        .unwrap();
        assert_eq!(result.seed, Some(20260210));
        assert_eq!(result.suits, Some(1));
        assert!(matches!(
            result.status,
            SolveStatus::Solved | SolveStatus::Unknown | SolveStatus::ProvenUnsolvable
        ));
        assert!(analyze_seed(1, 9, &SearchLimits::default(), true).is_err());
    }
}
