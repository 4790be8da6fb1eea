use crate::card::Card;
use crate::engine::Action;
use crate::state::Spider;

/// Human-plausibility pruning switches plus macro-chaining thresholds.
///
/// The default is the strict profile. Only a *complete* policy (one with
/// every heuristic-preference switch off) may conclude that a position is
/// unsolvable when the frontier drains; symmetry and tabu pruning never
/// remove reachable canonical states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchPolicy {
    /// Reject moves whose start index splits an existing same-suit run.
    pub lock_same_suit_runs: bool,
    /// If any legal destination has a same-suit top, drop the others.
    pub require_same_suit_destination_when_available: bool,
    /// Keep empty columns for future mobility when moving short runs.
    pub avoid_empty_for_short_moves: bool,
    pub min_len_for_empty_move: u8,
    /// Do not deal while meaningful moves still exist.
    pub defer_deal_until_no_moves: bool,
    /// Empty columns are interchangeable; keep at most one per move start.
    pub limit_empty_destinations_per_move: bool,
    /// Greedily chain near-forced follow-up moves into one transition.
    pub macro_chain_enabled: bool,
    pub macro_max_steps: u8,
    pub macro_empty_restore_enabled: bool,
    pub macro_empty_restore_min_len: u8,
    /// Reject the exact reverse of the move that produced this state.
    pub taboo_immediate_reverse: bool,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            lock_same_suit_runs: true,
            require_same_suit_destination_when_available: true,
            avoid_empty_for_short_moves: true,
            min_len_for_empty_move: 3,
            defer_deal_until_no_moves: true,
            limit_empty_destinations_per_move: true,
            macro_chain_enabled: true,
            macro_max_steps: 4,
            macro_empty_restore_enabled: true,
            macro_empty_restore_min_len: 5,
            taboo_immediate_reverse: true,
        }
    }
}

impl SearchPolicy {
    /// Strict profile without run locking and with a shorter macro chain.
    #[must_use]
    pub fn balanced() -> Self {
        Self {
            lock_same_suit_runs: false,
            macro_max_steps: 3,
            ..Self::default()
        }
    }

    /// Complete profile: only symmetry pruning remains active, so an
    /// exhausted frontier proves unsolvability.
    #[must_use]
    pub fn wide() -> Self {
        Self {
            lock_same_suit_runs: false,
            require_same_suit_destination_when_available: false,
            avoid_empty_for_short_moves: false,
            defer_deal_until_no_moves: false,
            macro_chain_enabled: false,
            taboo_immediate_reverse: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !(self.lock_same_suit_runs
            || self.require_same_suit_destination_when_available
            || self.avoid_empty_for_short_moves
            || self.defer_deal_until_no_moves)
    }
}

/// Starting a move at `idx` would break a same-suit link to the face-up
/// card below it.
#[must_use]
pub fn splits_same_suit_run(stack: &[Card], hidden_prefix: u8, idx: usize) -> bool {
    if idx == 0 || idx - 1 < hidden_prefix as usize {
        return false;
    }
    stack[idx - 1].follows_in_suit(stack[idx])
}

/// The candidate exactly undoes the move that led to `state`: mirrored
/// source/destination, equal length, and a start index matching what the
/// reverse would produce.
#[must_use]
pub fn is_immediate_reverse(
    state: &Spider,
    last_action: Option<Action>,
    src_stack: usize,
    src_idx: usize,
    dest_stack: usize,
    moved_len: usize,
) -> bool {
    let Some(Action::Move {
        src_stack: last_src,
        dest_stack: last_dest,
        moved_len: last_len,
        ..
    }) = last_action
    else {
        return false;
    };
    if src_stack != last_dest as usize || dest_stack != last_src as usize {
        return false;
    }
    if moved_len != last_len as usize {
        return false;
    }
    src_idx == state.stacks()[src_stack].len() - moved_len
}

/// Legal destinations for the run starting at `(src_stack, src_idx)`:
/// empty columns and columns whose top is one rank above the moved card.
#[must_use]
pub fn legal_destinations(state: &Spider, src_stack: usize, src_idx: usize) -> Vec<usize> {
    let stacks = state.stacks();
    let src_card = stacks[src_stack][src_idx];
    (0..stacks.len())
        .filter(|&d| {
            d != src_stack
                && (stacks[d].is_empty() || stacks[d][stacks[d].len() - 1].follows(src_card))
        })
        .collect()
}

/// Apply the destination-preference switches: same-suit tops when any
/// exist, and non-empty columns for short moves.
pub fn filter_destinations(
    state: &Spider,
    src_stack: usize,
    src_idx: usize,
    dests: &mut Vec<usize>,
    moved_len: usize,
    policy: &SearchPolicy,
) {
    if dests.is_empty() {
        return;
    }
    let src_card = state.stacks()[src_stack][src_idx];

    if policy.require_same_suit_destination_when_available
        && dests.iter().any(|&d| {
            let dst = &state.stacks()[d];
            !dst.is_empty() && dst[dst.len() - 1].suit() == src_card.suit()
        })
    {
        dests.retain(|&d| {
            let dst = &state.stacks()[d];
            !dst.is_empty() && dst[dst.len() - 1].suit() == src_card.suit()
        });
    }

    if policy.avoid_empty_for_short_moves
        && moved_len < policy.min_len_for_empty_move as usize
        && dests.iter().any(|&d| !state.stacks()[d].is_empty())
    {
        dests.retain(|&d| !state.stacks()[d].is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Card;

    #[test]
    fn test_completeness() {
        assert!(!SearchPolicy::default().is_complete());
        assert!(!SearchPolicy::balanced().is_complete());
        assert!(SearchPolicy::wide().is_complete());
    }

    #[test]
    fn test_splits_same_suit_run() {
        let stack = vec![Card::new(0, 5), Card::new(0, 4), Card::new(1, 3)];
        assert!(splits_same_suit_run(&stack, 0, 1));
        assert!(!splits_same_suit_run(&stack, 0, 2));
        assert!(!splits_same_suit_run(&stack, 0, 0));
        // A hidden card below the start index is not a movable-run split.
        assert!(!splits_same_suit_run(&stack, 1, 1));
    }

    #[test]
    fn test_same_suit_destination_preference() {
        let state = Spider::with_all_visible(
            Vec::new(),
            vec![
                vec![Card::new(0, 3)],
                vec![Card::new(0, 4)],
                vec![Card::new(1, 4)],
                Vec::new(),
            ],
        );
        let mut dests = legal_destinations(&state, 0, 0);
        assert_eq!(dests, vec![1, 2, 3]);
        filter_destinations(&state, 0, 0, &mut dests, 1, &SearchPolicy::default());
        assert_eq!(dests, vec![1]);

        let mut wide_dests = legal_destinations(&state, 0, 0);
        filter_destinations(&state, 0, 0, &mut wide_dests, 1, &SearchPolicy::wide());
        assert_eq!(wide_dests, vec![1, 2, 3]);
    }

    #[test]
    fn test_avoid_empty_for_short_moves() {
        let state = Spider::with_all_visible(
            Vec::new(),
            vec![vec![Card::new(1, 3)], vec![Card::new(0, 4)], Vec::new()],
        );
        let mut dests = legal_destinations(&state, 0, 0);
        assert_eq!(dests, vec![1, 2]);
        filter_destinations(&state, 0, 0, &mut dests, 1, &SearchPolicy::default());
        assert_eq!(dests, vec![1]);
    }
}
