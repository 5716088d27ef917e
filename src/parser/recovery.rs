use crate::parser::grammar::TermSymId;
use crate::parser::lhtable::{LhId, LhTable, MegaId, SkipNode, SyncEntry, Transition};
use crate::util::strongly_connected;
use std::collections::HashMap;

/// Fill the error-recovery side of a finished table: for every state the minimum cost
/// of completing the parse by synthesizing input (`sync_skip`), and per lookahead token
/// the cheapest insertion sequence that reaches a configuration consuming it (`sync`).
///
/// Both quantities are propagated over the state graph one strongly connected component
/// at a time, successors first, iterating inside each component until no entry
/// tightens.
pub fn compute(table: &mut LhTable) {
    fill_edges(table);

    let list = table.list.clone();
    let mut pos: HashMap<LhId, usize> = HashMap::new();
    for (idx, &state) in list.iter().enumerate() {
        pos.insert(state, idx);
    }
    let mut edges: Vec<Vec<usize>> = Vec::with_capacity(list.len());
    for &state in &list {
        edges.push(
            table.arena[state.0]
                .target_states
                .iter()
                .filter_map(|target| pos.get(target).copied())
                .collect(),
        );
    }

    for scc in strongly_connected(list.len(), |n| edges[n].clone()) {
        let states: Vec<LhId> = scc.into_iter().map(|local| list[local]).collect();
        compute_scc(table, &states);
    }
}

fn fill_edges(table: &mut LhTable) {
    for &state in &table.list.clone() {
        let mut targets: Vec<LhId> = Vec::new();
        if let Some(transition) = &table.arena[state.0].etransition {
            targets.extend(transition.stack.iter().copied());
        }
        for (_, transition) in &table.arena[state.0].transitions {
            targets.extend(transition.stack.iter().copied());
        }
        table.arena[state.0].target_states.extend(targets);
    }
}

/// One transition's contribution to a state's skip cost: synthesize the shifted token
/// if any, run the megaaction, then complete every pushed state. Returns true when it
/// tightened the bound.
fn compute_skip(
    table: &mut LhTable,
    state: LhId,
    term: Option<TermSymId>,
    action: MegaId,
    skips: &[LhId],
) -> bool {
    let mut cost: u64 = 0;
    let mut acc: Vec<SkipNode> = Vec::new();
    if let Some(term) = term {
        cost += 1;
        acc.push(SkipNode::Term(term));
    }
    acc.push(SkipNode::Mega(action));
    for &target in skips {
        match &table.arena[target.0].sync_skip {
            None => return false,
            Some((target_cost, target_seq)) => {
                cost += target_cost;
                acc.extend(target_seq.iter().cloned());
            }
        }
    }
    let better = match &table.arena[state.0].sync_skip {
        None => true,
        Some((current, _)) => *current > cost,
    };
    if better {
        table.arena[state.0].sync_skip = Some((cost, acc));
    }
    better
}

/// One transition's contribution to a state's sync table: walk the pushed states left
/// to right, combining each target's own sync entries with the cost of skipping
/// everything before it. Returns true when any entry tightened.
fn compute_advance(
    table: &mut LhTable,
    state: LhId,
    term: Option<TermSymId>,
    action: MegaId,
    skips: &[LhId],
) -> bool {
    let mut cost: u64 = 0;
    let mut acc: Vec<SkipNode> = Vec::new();
    if let Some(term) = term {
        cost += 1;
        acc.push(SkipNode::Term(term));
    }
    acc.push(SkipNode::Mega(action));

    let mut flag = false;
    for (idx, &target) in skips.iter().enumerate() {
        let entries: Vec<(TermSymId, SyncEntry)> = table.arena[target.0]
            .sync
            .iter()
            .map(|(term, entry)| (*term, entry.clone()))
            .collect();
        for (sync_term, entry) in entries {
            let candidate_cost = cost + entry.cost;
            let better = match table.arena[state.0].sync.get(&sync_term) {
                None => true,
                Some(existing) => existing.cost > candidate_cost,
            };
            if better {
                let mut actions = acc.clone();
                actions.extend(entry.actions.iter().cloned());
                let mut states = entry.states.clone();
                states.extend(skips[idx + 1..].iter().copied());
                table.arena[state.0].sync.insert(
                    sync_term,
                    SyncEntry {
                        cost: candidate_cost,
                        actions,
                        states,
                    },
                );
                flag = true;
            }
        }
        match &table.arena[target.0].sync_skip {
            Some((target_cost, target_seq)) => {
                cost += target_cost;
                acc.extend(target_seq.iter().cloned());
            }
            // A target that can never complete cannot be skipped past; later pushed
            // states are unreachable for this transition.
            None => break,
        }
    }
    flag
}

fn transitions_of(table: &LhTable, state: LhId) -> Vec<(Option<TermSymId>, Transition)> {
    let mut out: Vec<(Option<TermSymId>, Transition)> = Vec::new();
    for (term, transition) in &table.arena[state.0].transitions {
        out.push((Some(*term), transition.clone()));
    }
    if let Some(transition) = &table.arena[state.0].etransition {
        out.push((None, transition.clone()));
    }
    out
}

fn compute_scc(table: &mut LhTable, states: &[LhId]) {
    let mut flag = true;
    while flag {
        flag = false;
        for &state in states {
            for (term, transition) in transitions_of(table, state) {
                let skip_term = match (term, transition.shift) {
                    (Some(term), true) => Some(term),
                    _ => None,
                };
                if compute_skip(table, state, skip_term, transition.action, &transition.stack) {
                    flag = true;
                }
            }
        }
    }

    for &state in states {
        let terms: Vec<TermSymId> = table.arena[state.0].transitions.keys().copied().collect();
        for term in terms {
            table.arena[state.0].sync.insert(
                term,
                SyncEntry {
                    cost: 0,
                    actions: Vec::new(),
                    states: vec![state],
                },
            );
        }
    }

    let mut flag = true;
    while flag {
        flag = false;
        for &state in states {
            for (term, transition) in transitions_of(table, state) {
                let skip_term = match (term, transition.shift) {
                    (Some(term), true) => Some(term),
                    _ => None,
                };
                if compute_advance(table, state, skip_term, transition.action, &transition.stack) {
                    flag = true;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One observable step of a recovering parse, used to assert recovery behavior.
pub enum RecoveryStep {
    Mega(MegaId),
    SyncSkip(TermSymId),
    SyncInsert(TermSymId),
}

/// Run the table like [LhTable::simulate], but recover from errors: prefer the sync
/// entry for the failing lookahead, and fall back to skipping the token.
pub fn simulate_with_recovery(
    table: &LhTable,
    entry: LhId,
    input: &[TermSymId],
) -> Result<Vec<RecoveryStep>, String> {
    let mut stack: Vec<LhId> = vec![entry];
    let mut output: Vec<RecoveryStep> = Vec::new();
    let mut pos = 0;
    let mut fuel = 100_000;

    while let Some(state) = stack.pop() {
        fuel -= 1;
        if fuel == 0 {
            return Err("recovering parse did not terminate".to_string());
        }
        let tok = match input.get(pos) {
            Some(tok) => *tok,
            None => return Err(format!("recovering parse ran past the input at {}", pos)),
        };

        let transition = table.arena[state.0]
            .transitions
            .get(&tok)
            .or(table.arena[state.0].etransition.as_ref());
        if let Some(transition) = transition {
            if transition.shift {
                pos += 1;
            }
            if !table.megaactions[transition.action.0].nodes.is_empty() {
                output.push(RecoveryStep::Mega(transition.action));
            }
            for target in transition.stack.iter().rev() {
                stack.push(*target);
            }
            continue;
        }

        // Search the whole configuration for a state that can sync on the lookahead;
        // everything above it is completed synthetically through its skip sequence.
        let mut candidates: Vec<LhId> = vec![state];
        candidates.extend(stack.iter().rev().copied());
        let found = candidates
            .iter()
            .position(|candidate| table.arena[candidate.0].sync.contains_key(&tok));
        if let Some(depth) = found {
            let mut emit_nodes = |output: &mut Vec<RecoveryStep>, nodes: &[SkipNode]| {
                for node in nodes {
                    match node {
                        SkipNode::Term(term) => output.push(RecoveryStep::SyncInsert(*term)),
                        SkipNode::Mega(mega) => {
                            if !table.megaactions[mega.0].nodes.is_empty() {
                                output.push(RecoveryStep::Mega(*mega));
                            }
                        }
                    }
                }
            };
            for completed in &candidates[..depth] {
                let (_, skip_seq) = table.arena[completed.0]
                    .sync_skip
                    .as_ref()
                    .ok_or_else(|| format!("recovering parse stuck at {}", pos))?;
                emit_nodes(&mut output, skip_seq);
            }
            for _ in 1..depth {
                stack.pop();
            }
            let candidate = candidates[depth];
            let entry = table.arena[candidate.0].sync[&tok].clone();
            if depth > 0 {
                stack.pop();
            }
            emit_nodes(&mut output, &entry.actions);
            for target in entry.states.iter().rev() {
                stack.push(*target);
            }
            continue;
        }

        if pos + 1 >= input.len() {
            return Err(format!("recovering parse stuck at {}", pos));
        }
        output.push(RecoveryStep::SyncSkip(tok));
        pos += 1;
        stack.push(state);
    }
    Ok(output)
}
