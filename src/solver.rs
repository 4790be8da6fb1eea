use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;
use std::collections::BinaryHeap;
use std::time::Instant;

use hashbrown::HashSet;
use serde::Serialize;

use crate::engine::{transitions, Action, Transition};
use crate::pruning::SearchPolicy;
use crate::state::{Spider, StateKey};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchLimits {
    pub max_nodes: usize,
    pub max_seconds: f64,
    pub max_frontier: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            max_nodes: 200_000,
            max_seconds: 2.0,
            max_frontier: 500_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Solved,
    Unknown,
    ProvenUnsolvable,
}

impl SolveStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Solved => "solved",
            Self::Unknown => "unknown",
            Self::ProvenUnsolvable => "proven_unsolvable",
        }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolveStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "solved" => Ok(Self::Solved),
            "unknown" => Ok(Self::Unknown),
            "proven_unsolvable" => Ok(Self::ProvenUnsolvable),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    GoalReached,
    LimitsReached,
    SearchSpaceExhausted,
    PolicySpaceExhausted,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GoalReached => "goal_reached",
            Self::LimitsReached => "limits_reached",
            Self::SearchSpaceExhausted => "search_space_exhausted",
            Self::PolicySpaceExhausted => "policy_space_exhausted",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one search run, including its full telemetry. Abnormal
/// termination is always expressed here; `solve` never panics or errors.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub stop_reason: StopReason,
    pub solution: Vec<Action>,
    pub solution_states: Vec<Spider>,
    pub expanded_nodes: usize,
    pub generated_nodes: usize,
    pub unique_states: usize,
    pub max_frontier: usize,
    pub dead_end_nodes: usize,
    pub duplicate_states_skipped: usize,
    pub avg_branching: f64,
    pub elapsed_ms: f64,
    pub max_depth: usize,
    pub solution_revealed: usize,
    pub solution_freed: usize,
    pub solution_deals: usize,
}

/// Column-structure heuristic: finished piles dominate, undealt cards and
/// broken columns penalize, ordered links and empty columns reward.
#[must_use]
pub fn potential(state: &Spider) -> i32 {
    let mut empty_cols = 0i32;
    let mut same_suit_links = 0i32;
    let mut any_suit_links = 0i32;
    let mut breakpoints = 0i32;

    for stack in state.stacks() {
        if stack.is_empty() {
            empty_cols += 1;
            continue;
        }
        let mut any = 0i32;
        for i in 1..stack.len() {
            if stack[i - 1].follows(stack[i]) {
                any += 1;
                if stack[i - 1].suit() == stack[i].suit() {
                    same_suit_links += 1;
                }
            }
        }
        any_suit_links += any;
        breakpoints += stack.len() as i32 - 1 - any;
    }

    i32::from(state.finished_count()) * 400 - state.base().len() as i32 * 5
        + empty_cols * 12
        + same_suit_links * 5
        + any_suit_links * 2
        - breakpoints
}

struct Node {
    state: Spider,
    parent: Option<u32>,
    action: Option<Action>,
    revealed: u8,
    freed: u8,
}

/// Frontier entry ordered as a min-heap on `(f, counter)`: the counter
/// breaks ties FIFO so popped order is a total order and results are stable
/// across runs.
struct Entry {
    f: i64,
    counter: u64,
    depth: usize,
    node: u32,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.counter == other.counter
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.counter.cmp(&self.counter))
    }
}

fn reconstruct(nodes: &[Node], goal: u32) -> (Vec<Action>, Vec<Spider>, usize, usize, usize) {
    let mut actions = Vec::new();
    let mut states = Vec::new();
    let mut revealed = 0;
    let mut freed = 0;
    let mut deals = 0;

    let mut cur = goal as usize;
    loop {
        let node = &nodes[cur];
        states.push(node.state.clone());
        let (Some(parent), Some(action)) = (node.parent, node.action) else {
            break;
        };
        actions.push(action);
        revealed += node.revealed as usize;
        freed += node.freed as usize;
        if matches!(action, Action::Deal { .. }) {
            deals += 1;
        }
        cur = parent as usize;
    }

    actions.reverse();
    states.reverse();
    (actions, states, revealed, freed, deals)
}

/// Best-first search with strict canonical deduplication.
///
/// The frontier is keyed by `f = 4·depth − potential − transition priority`;
/// limits are checked at every pop, and a drained frontier is only proof of
/// unsolvability under a complete policy.
#[must_use]
pub fn solve(initial: &Spider, limits: &SearchLimits, policy: &SearchPolicy) -> SolveResult {
    let start = Instant::now();

    if initial.is_goal() {
        return SolveResult {
            status: SolveStatus::Solved,
            stop_reason: StopReason::GoalReached,
            solution: Vec::new(),
            solution_states: vec![initial.clone()],
            expanded_nodes: 0,
            generated_nodes: 1,
            unique_states: 1,
            max_frontier: 1,
            dead_end_nodes: 0,
            duplicate_states_skipped: 0,
            avg_branching: 0.0,
            elapsed_ms: 0.0,
            max_depth: 0,
            solution_revealed: 0,
            solution_freed: 0,
            solution_deals: 0,
        };
    }

    let mut nodes = vec![Node {
        state: initial.clone(),
        parent: None,
        action: None,
        revealed: 0,
        freed: 0,
    }];
    let mut seen: HashSet<StateKey> = HashSet::new();
    seen.insert(initial.canonical_key());

    let mut frontier = BinaryHeap::new();
    let mut counter = 0u64;
    frontier.push(Entry {
        f: -i64::from(potential(initial)),
        counter,
        depth: 0,
        node: 0,
    });

    let mut expanded = 0usize;
    let mut generated = 1usize;
    let mut max_frontier = 1usize;
    let mut dead_end = 0usize;
    let mut duplicates = 0usize;
    let mut max_depth = 0usize;
    let mut total_branching = 0usize;
    let mut hit_limits = false;

    loop {
        if frontier.is_empty() {
            break;
        }
        if expanded >= limits.max_nodes
            || start.elapsed().as_secs_f64() >= limits.max_seconds
            || frontier.len() > limits.max_frontier
        {
            hit_limits = true;
            break;
        }
        let Some(entry) = frontier.pop() else { break };

        if nodes[entry.node as usize].state.is_goal() {
            let (solution, solution_states, revealed, freed, deals) =
                reconstruct(&nodes, entry.node);
            return SolveResult {
                status: SolveStatus::Solved,
                stop_reason: StopReason::GoalReached,
                solution,
                solution_states,
                expanded_nodes: expanded,
                generated_nodes: generated,
                unique_states: seen.len(),
                max_frontier,
                dead_end_nodes: dead_end,
                duplicate_states_skipped: duplicates,
                avg_branching: if expanded > 0 {
                    total_branching as f64 / expanded as f64
                } else {
                    0.0
                },
                elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
                max_depth,
                solution_revealed: revealed,
                solution_freed: freed,
                solution_deals: deals,
            };
        }

        let incoming = nodes[entry.node as usize].action;
        let trs = transitions(&nodes[entry.node as usize].state, policy, incoming);
        expanded += 1;
        total_branching += trs.len();

        if trs.is_empty() {
            dead_end += 1;
            continue;
        }

        for tr in trs {
            let Transition {
                action,
                state,
                revealed,
                freed,
                priority,
                key,
                ..
            } = tr;
            if seen.contains(&key) {
                duplicates += 1;
                continue;
            }
            seen.insert(key);

            let next_depth = entry.depth + 1;
            max_depth = max_depth.max(next_depth);
            counter += 1;
            let f = next_depth as i64 * 4 - i64::from(potential(&state)) - i64::from(priority);
            nodes.push(Node {
                state,
                parent: Some(entry.node),
                action: Some(action),
                revealed,
                freed,
            });
            frontier.push(Entry {
                f,
                counter,
                depth: next_depth,
                node: (nodes.len() - 1) as u32,
            });
            generated += 1;
        }

        max_frontier = max_frontier.max(frontier.len());
    }

    let (status, stop_reason) = if hit_limits {
        (SolveStatus::Unknown, StopReason::LimitsReached)
    } else if policy.is_complete() {
        (SolveStatus::ProvenUnsolvable, StopReason::SearchSpaceExhausted)
    } else {
        (SolveStatus::Unknown, StopReason::PolicySpaceExhausted)
    };

    SolveResult {
        status,
        stop_reason,
        solution: Vec::new(),
        solution_states: Vec::new(),
        expanded_nodes: expanded,
        generated_nodes: generated,
        unique_states: seen.len(),
        max_frontier,
        dead_end_nodes: dead_end,
        duplicate_states_skipped: duplicates,
        avg_branching: if expanded > 0 {
            total_branching as f64 / expanded as f64
        } else {
            0.0
        },
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        max_depth,
        solution_revealed: 0,
        solution_freed: 0,
        solution_deals: 0,
    }
}
