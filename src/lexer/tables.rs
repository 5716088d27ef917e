use crate::lexer::dfa::{Dfa, DfaId};
use crate::lexer::nfa::{NfaRule, RuleId};
use crate::project::SharedGrammar;
use std::collections::HashMap;

/// Bit marking a transition that leaves the current token: the scanner emits the
/// state's accept and restarts from the initial state's move on the same byte.
pub const ACCEPT_BIT: u32 = 1;

/// The finished scanner tables handed to the code emitter.
///
/// Transition targets are state indices shifted left by one bit with [ACCEPT_BIT] in the
/// low bit; `eq_classes` maps a byte to its column class offset, pre-scaled by
/// `class_stride` so the generated scanner can add it straight to a state value.
#[derive(Debug)]
pub struct LexerTables {
    pub prefix: String,
    pub namespace: String,
    pub eq_classes: Vec<u32>,
    pub class_stride: u32,
    pub class_count: usize,
    pub state_count: usize,
    pub trans: Vec<u32>,
    pub accepts: Vec<i64>,
    pub fin_trans: Vec<u32>,
    /// `(implementation name, value, display name)` per terminal, in declaration order.
    pub terminals: Vec<(String, i64, String)>,
}

/// Complete the automaton so that scanning never gets stuck: every non-accepting state
/// except the initial one accepts the error rule, and the initial state's blank moves
/// are routed through a fresh error state that loops on those same bytes.
pub fn inject_error_state(dfa: &mut Dfa, error_rule: RuleId) {
    let initial = dfa.initial;
    for state in dfa.visit(initial) {
        if dfa.states[state.0].accept.is_none() && state != initial {
            dfa.states[state.0].accept = Some(error_rule);
        }
    }

    let error_state = dfa.add_state();
    dfa.states[error_state.0].accept = Some(error_rule);

    let mut bad_bytes: Vec<usize> = Vec::new();
    for byte in 0..256 {
        if dfa.states[initial.0].trans[byte].is_none() {
            bad_bytes.push(byte);
            dfa.states[initial.0].trans[byte] = Some(error_state);
        }
    }
    for byte in bad_bytes {
        dfa.states[error_state.0].trans[byte] = Some(error_state);
    }
}

/// Partition the byte alphabet into column equivalence classes: two bytes share a class
/// when every state moves to the same target under both. Classes are numbered in the
/// order refinement discovers them, which only depends on state numbering.
fn build_classes(dfa: &Dfa, all_states: &[DfaId]) -> Vec<Vec<u8>> {
    let mut classes: Vec<Vec<u8>> = vec![(0..=255u8).collect()];
    let mut unique_refines: std::collections::HashSet<Vec<u8>> = std::collections::HashSet::new();

    let mut refine = |classes: &mut Vec<Vec<u8>>, partition: Vec<u8>| {
        if !unique_refines.insert(partition.clone()) {
            return;
        }
        let n = classes.len();
        for idx in 0..n {
            let inter: Vec<u8> = classes[idx]
                .iter()
                .copied()
                .filter(|b| partition.binary_search(b).is_ok())
                .collect();
            if inter.len() == classes[idx].len() || inter.is_empty() {
                continue;
            }
            classes[idx].retain(|b| partition.binary_search(b).is_err());
            classes.push(inter);
        }
    };

    for &state in all_states {
        let mut group_of: HashMap<Option<DfaId>, usize> = HashMap::new();
        let mut groups: Vec<Vec<u8>> = Vec::new();
        for byte in 0..=255u8 {
            let target = dfa.states[state.0].trans[byte as usize];
            match group_of.get(&target) {
                Some(&index) => groups[index].push(byte),
                None => {
                    group_of.insert(target, groups.len());
                    groups.push(vec![byte]);
                }
            }
        }
        for group in groups {
            refine(&mut classes, group);
        }
    }

    classes
}

impl LexerTables {
    pub fn build(
        dfa: &Dfa,
        rules: &[NfaRule],
        shared: &SharedGrammar,
        prefix: &str,
        namespace: &str,
    ) -> Self {
        let all_states = dfa.visit(dfa.initial);
        let mut state_idx: Vec<usize> = vec![0; dfa.states.len()];
        for (idx, state) in all_states.iter().enumerate() {
            state_idx[state.0] = idx;
        }
        let state_to_value = |state: DfaId| (state_idx[state.0] as u32) * 2;

        let classes = build_classes(dfa, &all_states);

        let mut eq_classes: Vec<u32> = vec![0; 256];
        for (idx, class) in classes.iter().enumerate() {
            for &byte in class {
                eq_classes[byte as usize] = idx as u32 * 2 * all_states.len() as u32;
            }
        }

        let mut trans: Vec<u32> = Vec::with_capacity(classes.len() * all_states.len());
        for class in &classes {
            let class_repr = *class.iter().min().expect("INTERNAL ERROR: empty byte class");
            for &state in &all_states {
                let val = match dfa.states[state.0].trans[class_repr as usize] {
                    Some(target) => state_to_value(target),
                    None => {
                        let initial_trans = dfa.states[dfa.initial.0].trans[class_repr as usize]
                            .expect("INTERNAL ERROR: initial state is not total");
                        state_to_value(initial_trans) | ACCEPT_BIT
                    }
                };
                trans.push(val);
            }
        }

        let accepts: Vec<i64> = all_states
            .iter()
            .map(|state| match dfa.states[state.0].accept {
                Some(rule) => shared.terminal(rules[rule.0].terminal).value.unwrap_or(0),
                None => 0,
            })
            .collect();

        let fin_trans: Vec<u32> = all_states
            .iter()
            .map(|state| {
                if dfa.states[state.0].accept.is_some() {
                    ACCEPT_BIT
                } else {
                    0
                }
            })
            .collect();

        let terminals: Vec<(String, i64, String)> = shared
            .terminals()
            .map(|terminal| {
                (
                    terminal.impl_name.clone(),
                    terminal.value.unwrap_or(0),
                    terminal.name.clone(),
                )
            })
            .collect();

        LexerTables {
            prefix: prefix.to_string(),
            namespace: namespace.to_string(),
            eq_classes,
            class_stride: all_states.len() as u32 * 2,
            class_count: classes.len(),
            state_count: all_states.len(),
            trans,
            accepts,
            fin_trans,
            terminals,
        }
    }
}
