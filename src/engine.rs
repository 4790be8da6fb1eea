use core::fmt;
use core::str::FromStr;

use crate::card::{is_full_suit_top, valid_move_starts, Card, N_RANKS};
use crate::pruning::{
    filter_destinations, is_immediate_reverse, legal_destinations, splits_same_suit_run,
    SearchPolicy,
};
use crate::state::{Spider, StateKey};

/// A single player action in solver notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move {
        src_stack: u8,
        src_idx: u8,
        dest_stack: u8,
        moved_len: u8,
    },
    Deal {
        draw_count: u8,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Move {
                src_stack,
                src_idx,
                dest_stack,
                moved_len,
            } => write!(f, "MOVE(S{src_stack}:{src_idx}->S{dest_stack},len={moved_len})"),
            Self::Deal { draw_count } => write!(f, "DEAL({draw_count})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseActionError;

impl fmt::Display for ParseActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed action notation")
    }
}

impl std::error::Error for ParseActionError {}

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("DEAL(") {
            let draw_count = rest
                .strip_suffix(')')
                .and_then(|n| n.parse().ok())
                .ok_or(ParseActionError)?;
            return Ok(Self::Deal { draw_count });
        }

        let rest = s
            .strip_prefix("MOVE(S")
            .and_then(|r| r.strip_suffix(')'))
            .ok_or(ParseActionError)?;
        let (src_stack, rest) = rest.split_once(':').ok_or(ParseActionError)?;
        let (src_idx, rest) = rest.split_once("->S").ok_or(ParseActionError)?;
        let (dest_stack, moved_len) = rest.split_once(",len=").ok_or(ParseActionError)?;
        Ok(Self::Move {
            src_stack: src_stack.parse().map_err(|_| ParseActionError)?,
            src_idx: src_idx.parse().map_err(|_| ParseActionError)?,
            dest_stack: dest_stack.parse().map_err(|_| ParseActionError)?,
            moved_len: moved_len.parse().map_err(|_| ParseActionError)?,
        })
    }
}

/// One edge of the search graph: the action, the resulting state after
/// auto-frees and macro follow-ups, and its ordering priority.
#[derive(Debug, Clone)]
pub struct Transition {
    pub action: Action,
    pub state: Spider,
    pub revealed: u8,
    pub freed: u8,
    pub priority: i32,
    pub macro_steps: u8,
    pub key: StateKey,
}

/// Remove one complete A..K pile from the top of `stack` if legal, clamping
/// the hidden prefix and reporting whether a card was revealed.
fn free_once(stack: &mut Vec<Card>, hidden: &mut u8) -> Option<u8> {
    if !is_full_suit_top(stack, *hidden) {
        return None;
    }
    stack.truncate(stack.len() - N_RANKS as usize);
    *hidden = (*hidden).min(stack.len() as u8);
    if !stack.is_empty() && *hidden as usize >= stack.len() {
        *hidden = (stack.len() - 1) as u8;
        Some(1)
    } else {
        Some(0)
    }
}

/// Auto-free cascade over every stack until stable. Terminates because each
/// free strictly shrinks the total card count.
fn auto_free_all(stacks: &mut [Vec<Card>], hidden: &mut [u8], finished: &mut u8) -> (u8, u8) {
    let mut freed = 0;
    let mut revealed = 0;
    let mut changed = true;
    while changed {
        changed = false;
        for idx in 0..stacks.len() {
            if let Some(r) = free_once(&mut stacks[idx], &mut hidden[idx]) {
                changed = true;
                freed += 1;
                *finished += 1;
                revealed += r;
            }
        }
    }
    (freed, revealed)
}

/// Heuristic ordering score for a move, computed against the pre-move state.
fn move_priority(
    state: &Spider,
    src_stack: usize,
    src_idx: usize,
    dest_stack: usize,
    moved_len: usize,
    freed: u8,
) -> i32 {
    let src = &state.stacks()[src_stack];
    let dst = &state.stacks()[dest_stack];
    let src_card = src[src_idx];

    let mut score = 40 + moved_len as i32 * 3 + i32::from(freed) * 150;

    if dst.is_empty() {
        score -= 18;
        if moved_len <= 2 {
            score -= 10;
        }
    } else if dst[dst.len() - 1].suit() == src_card.suit() {
        score += 14;
    }

    if src_idx > 0 && src[src_idx - 1].follows_in_suit(src_card) {
        score -= 12;
    }

    if moved_len >= 6 {
        score += 10;
    }

    if src_idx == 0 {
        score += 6;
    }

    score
}

/// Move the run starting at `(src_stack, src_idx)` onto `dest_stack`,
/// applying the source clamp-and-reveal rule and the auto-free cascade on
/// the destination (the only column that can newly complete).
#[must_use]
pub fn apply_move(state: &Spider, src_stack: usize, src_idx: usize, dest_stack: usize) -> Transition {
    let mut stacks = state.stacks().to_vec();
    let mut hidden = state.hidden().to_vec();
    let mut finished = state.finished_count();

    let moving = stacks[src_stack].split_off(src_idx);
    let moved_len = moving.len();

    let mut revealed = 0;
    let src_len = stacks[src_stack].len();
    hidden[src_stack] = hidden[src_stack].min(src_len as u8);
    if src_len > 0 && hidden[src_stack] as usize >= src_len {
        hidden[src_stack] = (src_len - 1) as u8;
        revealed = 1;
    }

    stacks[dest_stack].extend(moving);
    hidden[dest_stack] = hidden[dest_stack].min(stacks[dest_stack].len() as u8);

    let mut freed = 0;
    while let Some(r) = free_once(&mut stacks[dest_stack], &mut hidden[dest_stack]) {
        freed += 1;
        finished += 1;
        revealed += r;
    }

    let priority = move_priority(state, src_stack, src_idx, dest_stack, moved_len, freed);
    let out = Spider::new(state.base().to_vec(), stacks, hidden, finished);
    let key = out.canonical_key();
    Transition {
        action: Action::Move {
            src_stack: src_stack as u8,
            src_idx: src_idx as u8,
            dest_stack: dest_stack as u8,
            moved_len: moved_len as u8,
        },
        state: out,
        revealed,
        freed,
        priority,
        macro_steps: 0,
        key,
    }
}

/// Deal `min(stack_count, base_len)` cards round-robin from the top of the
/// base starting at stack 0, then run the auto-free cascade.
#[must_use]
pub fn apply_deal(state: &Spider) -> Option<Transition> {
    let stack_count = state.stacks().len();
    let draw_count = stack_count.min(state.base().len());
    if draw_count == 0 {
        return None;
    }

    let mut base = state.base().to_vec();
    let mut stacks = state.stacks().to_vec();
    let mut hidden = state.hidden().to_vec();
    let mut finished = state.finished_count();

    let mut dest = 0;
    for _ in 0..draw_count {
        let Some(card) = base.pop() else { break };
        stacks[dest].push(card);
        hidden[dest] = hidden[dest].min((stacks[dest].len() - 1) as u8);
        dest = (dest + 1) % stack_count;
    }

    let (freed, revealed) = auto_free_all(&mut stacks, &mut hidden, &mut finished);

    let out = Spider::new(base, stacks, hidden, finished);
    let key = out.canonical_key();
    Some(Transition {
        action: Action::Deal {
            draw_count: draw_count as u8,
        },
        state: out,
        revealed,
        freed,
        priority: -15 + i32::from(freed) * 140,
        macro_steps: 0,
        key,
    })
}

/// Best follow-up move for macro chaining, in two preference tiers:
/// a non-empty same-suit destination, or (failing that) parking a long run
/// onto an empty column when the policy allows restoring empties.
fn pick_macro_follow_up(
    state: &Spider,
    policy: &SearchPolicy,
    last_action: Option<Action>,
) -> Option<Transition> {
    let hidden = state.hidden();
    let mut best: Option<Transition> = None;

    for (s_idx, stack) in state.stacks().iter().enumerate() {
        for &idx in &valid_move_starts(stack, hidden[s_idx]) {
            let idx = idx as usize;
            if policy.lock_same_suit_runs && splits_same_suit_run(stack, hidden[s_idx], idx) {
                continue;
            }
            let moved_len = stack.len() - idx;
            let src_card = stack[idx];
            for d_idx in legal_destinations(state, s_idx, idx) {
                let dst = &state.stacks()[d_idx];
                if dst.is_empty() || dst[dst.len() - 1].suit() != src_card.suit() {
                    continue;
                }
                if policy.taboo_immediate_reverse
                    && is_immediate_reverse(state, last_action, s_idx, idx, d_idx, moved_len)
                {
                    continue;
                }
                let mut tr = apply_move(state, s_idx, idx, d_idx);
                tr.priority += 20;
                if best.as_ref().map_or(true, |b| tr.priority > b.priority) {
                    best = Some(tr);
                }
            }
        }
    }

    if best.is_some() || !policy.macro_empty_restore_enabled {
        return best;
    }

    for (s_idx, stack) in state.stacks().iter().enumerate() {
        for &idx in &valid_move_starts(stack, hidden[s_idx]) {
            let idx = idx as usize;
            let moved_len = stack.len() - idx;
            if moved_len < policy.macro_empty_restore_min_len as usize {
                continue;
            }
            for d_idx in legal_destinations(state, s_idx, idx) {
                if !state.stacks()[d_idx].is_empty() {
                    continue;
                }
                if policy.taboo_immediate_reverse
                    && is_immediate_reverse(state, last_action, s_idx, idx, d_idx, moved_len)
                {
                    continue;
                }
                let mut tr = apply_move(state, s_idx, idx, d_idx);
                tr.priority -= 10;
                if best.as_ref().map_or(true, |b| tr.priority > b.priority) {
                    best = Some(tr);
                }
            }
        }
    }
    best
}

/// Greedily chain follow-up moves after a base transition, guarding against
/// cycles with a local seen-set. Returns the final state together with the
/// freed count and number of applied steps.
fn macro_chain(
    state: Spider,
    start_key: &StateKey,
    policy: &SearchPolicy,
    seed_action: Action,
) -> (Spider, u8, u8) {
    let mut seen = vec![start_key.clone()];
    let mut cur = state;
    let mut last_action = seed_action;
    let mut freed_total = 0;
    let mut steps = 0;

    while steps < policy.macro_max_steps {
        let Some(tr) = pick_macro_follow_up(&cur, policy, Some(last_action)) else {
            break;
        };
        if seen.contains(&tr.key) {
            break;
        }
        seen.push(tr.key.clone());
        cur = tr.state;
        freed_total += tr.freed;
        steps += 1;
        last_action = tr.action;
    }

    (cur, freed_total, steps)
}

/// Extend a base transition with its macro chain, adjusting freed counts
/// and priority and recomputing the canonical key.
fn compose_macro(tr: Transition, policy: &SearchPolicy) -> Transition {
    if !policy.macro_chain_enabled || policy.macro_max_steps == 0 {
        return tr;
    }
    let Transition {
        action,
        state,
        revealed,
        freed,
        priority,
        key,
        ..
    } = tr;
    let (state, macro_freed, macro_steps) = macro_chain(state, &key, policy, action);
    if macro_steps == 0 {
        return Transition {
            action,
            state,
            revealed,
            freed,
            priority,
            macro_steps: 0,
            key,
        };
    }
    let key = state.canonical_key();
    Transition {
        action,
        state,
        revealed,
        freed: freed + macro_freed,
        priority: priority + i32::from(macro_steps) * 18 + i32::from(macro_freed) * 80,
        macro_steps,
        key,
    }
}

/// Keep at most one transition per resulting canonical state, preferring
/// the higher priority. Insertion order is retained so that equal-priority
/// orderings stay deterministic; expansions are small.
fn upsert(out: &mut Vec<Transition>, tr: Transition) {
    if let Some(existing) = out.iter_mut().find(|t| t.key == tr.key) {
        if tr.priority > existing.priority {
            *existing = tr;
        }
    } else {
        out.push(tr);
    }
}

/// Enumerate candidate transitions from `state` under `policy`, dedup by
/// resulting canonical state, and order by descending priority.
#[must_use]
pub fn transitions(
    state: &Spider,
    policy: &SearchPolicy,
    last_action: Option<Action>,
) -> Vec<Transition> {
    let hidden = state.hidden();
    let mut out: Vec<Transition> = Vec::new();
    let mut generated_moves = 0usize;

    for (s_idx, stack) in state.stacks().iter().enumerate() {
        for &idx in &valid_move_starts(stack, hidden[s_idx]) {
            let idx = idx as usize;
            if policy.lock_same_suit_runs && splits_same_suit_run(stack, hidden[s_idx], idx) {
                continue;
            }
            let moved_len = stack.len() - idx;
            let mut dests = legal_destinations(state, s_idx, idx);
            filter_destinations(state, s_idx, idx, &mut dests, moved_len, policy);

            let mut used_empty_dest = false;
            for d_idx in dests {
                if policy.taboo_immediate_reverse
                    && is_immediate_reverse(state, last_action, s_idx, idx, d_idx, moved_len)
                {
                    continue;
                }
                if policy.limit_empty_destinations_per_move && state.stacks()[d_idx].is_empty() {
                    if used_empty_dest {
                        continue;
                    }
                    used_empty_dest = true;
                }
                let tr = compose_macro(apply_move(state, s_idx, idx, d_idx), policy);
                generated_moves += 1;
                upsert(&mut out, tr);
            }
        }
    }

    let allow_deal = !(policy.defer_deal_until_no_moves && generated_moves > 0);
    if allow_deal {
        if let Some(deal) = apply_deal(state) {
            upsert(&mut out, compose_macro(deal, policy));
        }
    }

    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}

/// Unfiltered legal action count (+1 for a non-empty base), used by the
/// difficulty analyzer to measure choice pressure along a solution path.
#[must_use]
pub fn legal_action_count(state: &Spider) -> usize {
    let stacks = state.stacks();
    let hidden = state.hidden();
    let mut total = 0;
    for (s_idx, stack) in stacks.iter().enumerate() {
        for &idx in &valid_move_starts(stack, hidden[s_idx]) {
            let src_card = stack[idx as usize];
            for (d_idx, dest) in stacks.iter().enumerate() {
                if d_idx == s_idx {
                    continue;
                }
                if dest.is_empty() || dest[dest.len() - 1].follows(src_card) {
                    total += 1;
                }
            }
        }
    }
    if !state.base().is_empty() {
        total += 1;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Card;

    fn card(suit: u8, rank: u8) -> Card {
        Card::new(suit, rank)
    }

    fn descending(suit: u8, top_rank: u8, len: u8) -> Vec<Card> {
        (0..len)
            .map(|i| card(suit, top_rank + len - 1 - i))
            .collect()
    }

    #[test]
    fn test_notation_round_trip() {
        for notation in ["MOVE(S1:0->S0,len=1)", "MOVE(S9:12->S3,len=6)", "DEAL(10)", "DEAL(4)"] {
            let action: Action = notation.parse().unwrap();
            assert_eq!(action.to_string(), notation);
        }
        assert!("MOVE(1->2)".parse::<Action>().is_err());
        assert!("DEAL()".parse::<Action>().is_err());
    }

    #[test]
    fn test_apply_move_reveals_source() {
        // Hidden card under a single face-up card: moving it must flip.
        let state = Spider::new(
            Vec::new(),
            vec![vec![card(1, 7), card(0, 3)], vec![card(0, 4)]],
            vec![1, 0],
            0,
        );
        let tr = apply_move(&state, 0, 1, 1);
        assert_eq!(tr.revealed, 1);
        assert_eq!(tr.state.hidden()[0], 0);
        assert_eq!(tr.state.stacks()[0], vec![card(1, 7)]);
        assert_eq!(tr.state.stacks()[1], vec![card(0, 4), card(0, 3)]);
    }

    #[test]
    fn test_apply_move_auto_frees_destination() {
        // Moving the ace onto K..2 completes a pile and frees it.
        let state = Spider::with_all_visible(
            Vec::new(),
            vec![vec![card(0, 0)], descending(0, 1, 12)],
        );
        let tr = apply_move(&state, 0, 0, 1);
        assert_eq!(tr.freed, 1);
        assert_eq!(tr.state.finished_count(), 1);
        assert!(tr.state.stacks().iter().all(Vec::is_empty));
        assert!(tr.state.is_goal());
    }

    #[test]
    fn test_move_does_not_free_through_hidden_cut() {
        // The ace completes a 13-card run whose king is still face-down:
        // the block would include a hidden card, so no free.
        let state = Spider::new(
            Vec::new(),
            vec![vec![card(0, 0)], descending(0, 1, 12)],
            vec![0, 1],
            0,
        );
        let tr = apply_move(&state, 0, 0, 1);
        assert_eq!(tr.freed, 0);
        assert_eq!(tr.state.stacks()[1].len(), 13);
        assert_eq!(tr.state.hidden()[1], 1);
    }

    #[test]
    fn test_free_reveals_card_below_block() {
        // A face-down card strictly below the completed block: the free
        // goes through and flips it.
        let mut dest = vec![card(1, 9)];
        dest.extend(descending(0, 1, 12));
        let state = Spider::new(
            Vec::new(),
            vec![vec![card(0, 0)], dest],
            vec![0, 1],
            0,
        );
        let tr = apply_move(&state, 0, 0, 1);
        assert_eq!(tr.freed, 1);
        assert_eq!(tr.revealed, 1);
        assert_eq!(tr.state.stacks()[1], vec![card(1, 9)]);
        assert_eq!(tr.state.hidden()[1], 0);
        assert_eq!(tr.state.finished_count(), 1);
    }

    #[test]
    fn test_apply_deal_round_robin() {
        let base: Vec<Card> = (0..5).map(|i| card(0, i)).collect();
        let state = Spider::with_all_visible(
            base,
            vec![vec![card(1, 12)], vec![card(2, 12)], vec![card(3, 12)]],
        );
        let tr = apply_deal(&state).unwrap();
        assert_eq!(tr.action, Action::Deal { draw_count: 3 });
        assert_eq!(tr.state.base(), &[card(0, 0), card(0, 1)]);
        // top of base (rank 4) lands on stack 0, then 3, then 2
        assert_eq!(tr.state.stacks()[0], vec![card(1, 12), card(0, 4)]);
        assert_eq!(tr.state.stacks()[1], vec![card(2, 12), card(0, 3)]);
        assert_eq!(tr.state.stacks()[2], vec![card(3, 12), card(0, 2)]);
    }

    #[test]
    fn test_deal_deferred_until_no_moves() {
        // A same-suit move exists and the base is non-empty.
        let state = Spider::with_all_visible(
            vec![card(3, 0); 4],
            vec![vec![card(0, 3)], vec![card(0, 4)]],
        );
        let strict = transitions(&state, &SearchPolicy::default(), None);
        assert!(strict
            .iter()
            .all(|t| !matches!(t.action, Action::Deal { .. })));

        let wide = transitions(&state, &SearchPolicy::wide(), None);
        let deals = wide
            .iter()
            .filter(|t| matches!(t.action, Action::Deal { .. }))
            .count();
        assert_eq!(deals, 1);
    }

    #[test]
    fn test_single_empty_destination_kept() {
        // Three empty columns are symmetric; each run start keeps exactly
        // one of them, and it is always the first.
        let state = Spider::with_all_visible(
            Vec::new(),
            vec![
                descending(0, 3, 5),
                Vec::new(),
                Vec::new(),
                Vec::new(),
            ],
        );
        let trs = transitions(&state, &SearchPolicy::wide(), None);
        assert_eq!(trs.len(), 5);
        for start in 0u8..5 {
            let per_start = trs
                .iter()
                .filter(|t| {
                    matches!(t.action, Action::Move { src_idx, dest_stack, .. }
                        if src_idx == start && dest_stack == 1)
                })
                .count();
            assert_eq!(per_start, 1);
        }
    }

    #[test]
    fn test_immediate_reverse_rejected() {
        let state = Spider::with_all_visible(
            vec![card(3, 0)],
            vec![vec![card(1, 4), card(0, 3)], vec![card(0, 4)]],
        );
        let last = Action::Move {
            src_stack: 1,
            src_idx: 1,
            dest_stack: 0,
            moved_len: 1,
        };
        let policy = SearchPolicy {
            macro_chain_enabled: false,
            ..SearchPolicy::default()
        };
        let trs = transitions(&state, &policy, Some(last));
        assert!(!trs.iter().any(|t| t.action
            == Action::Move {
                src_stack: 0,
                src_idx: 1,
                dest_stack: 1,
                moved_len: 1,
            }));

        // Without the tabu flag the reverse is generated again.
        let no_tabu = SearchPolicy {
            taboo_immediate_reverse: false,
            macro_chain_enabled: false,
            ..SearchPolicy::default()
        };
        let trs = transitions(&state, &no_tabu, Some(last));
        assert!(trs.iter().any(|t| t.action
            == Action::Move {
                src_stack: 0,
                src_idx: 1,
                dest_stack: 1,
                moved_len: 1,
            }));
    }

    #[test]
    fn test_macro_chain_composes_follow_ups() {
        // After 4♣ moves onto 5♣, the freshly exposed 6♣ pulls the 5♣4♣ run
        // as a same-suit follow-up.
        let state = Spider::with_all_visible(
            Vec::new(),
            vec![
                vec![card(2, 3)],
                vec![card(2, 4)],
                vec![card(2, 5)],
                vec![card(1, 6)],
            ],
        );
        let trs = transitions(&state, &SearchPolicy::default(), None);
        let best = &trs[0];
        assert!(best.macro_steps > 0);
        // The composed edge still reports the base action only.
        assert!(matches!(best.action, Action::Move { moved_len: 1, .. }));
    }

    #[test]
    fn test_legal_action_count() {
        let state = Spider::with_all_visible(
            vec![card(3, 0)],
            vec![vec![card(0, 3)], vec![card(0, 4)], Vec::new()],
        );
        // S0 run -> S1 and S2; S1 run -> S2; plus the deal.
        assert_eq!(legal_action_count(&state), 4);
    }
}
