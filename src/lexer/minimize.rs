use crate::lexer::dfa::{Dfa, DfaId};
use crate::lexer::nfa::{NfaRule, RuleId};

/// Partition-refinement DFA minimization.
///
/// States start in blocks keyed by their accept class (no accept, or the accept rule's
/// terminal), and blocks are split until any two states left together transition into
/// the same block for every byte. The result is a freshly built automaton with one state
/// per block; the input automaton is left untouched.
pub fn minimize(dfa: &Dfa, rules: &[NfaRule]) -> Dfa {
    let states = dfa.visit(dfa.initial);

    // repr[s] is the first state of the block currently containing s.
    let mut repr: Vec<DfaId> = vec![dfa.initial; dfa.states.len()];
    let mut equivalences: Vec<Vec<DfaId>> = vec![states];

    let assign_repr = |equivalences: &Vec<Vec<DfaId>>, repr: &mut Vec<DfaId>| {
        for sublist in equivalences {
            for state in sublist {
                repr[state.0] = sublist[0];
            }
        }
    };

    let compare_accepts = |accept1: Option<RuleId>, accept2: Option<RuleId>| -> bool {
        match (accept1, accept2) {
            (None, None) => true,
            (Some(rule1), Some(rule2)) => {
                rule1 == rule2 || rules[rule1.0].terminal == rules[rule2.0].terminal
            }
            _ => false,
        }
    };

    let is_same_class = |repr: &Vec<DfaId>, state1: Option<DfaId>, state2: Option<DfaId>| -> bool {
        match (state1, state2) {
            (None, None) => true,
            (Some(state1), Some(state2)) => {
                state1 == state2 || repr[state1.0] == repr[state2.0]
            }
            _ => false,
        }
    };

    let refine_all = |equivalences: &mut Vec<Vec<DfaId>>,
                      repr: &mut Vec<DfaId>,
                      refiner: &dyn Fn(&Vec<DfaId>, DfaId, DfaId) -> bool|
     -> bool {
        let mut new_equivalences: Vec<Vec<DfaId>> = Vec::new();
        let mut any_progress = false;
        for sublist in equivalences.drain(..) {
            if sublist.len() > 1 {
                let mut out: Vec<Vec<DfaId>> = Vec::new();
                for state in sublist {
                    match out.iter_mut().find(|out_list| refiner(repr, out_list[0], state)) {
                        Some(out_list) => out_list.push(state),
                        None => out.push(vec![state]),
                    }
                }
                if out.len() > 1 {
                    any_progress = true;
                }
                new_equivalences.extend(out);
            } else {
                new_equivalences.push(sublist);
            }
        }
        *equivalences = new_equivalences;
        assign_repr(equivalences, repr);
        any_progress
    };

    assign_repr(&equivalences, &mut repr);

    let refiner_accept = |_repr: &Vec<DfaId>, state1: DfaId, state2: DfaId| -> bool {
        compare_accepts(dfa.states[state1.0].accept, dfa.states[state2.0].accept)
    };
    refine_all(&mut equivalences, &mut repr, &refiner_accept);

    let refiner_trans = |repr: &Vec<DfaId>, state1: DfaId, state2: DfaId| -> bool {
        (0..256).all(|i| {
            is_same_class(repr, dfa.states[state1.0].trans[i], dfa.states[state2.0].trans[i])
        })
    };
    while refine_all(&mut equivalences, &mut repr, &refiner_trans) {}

    // Materialize one state per block, numbered by first-visit order from the initial
    // block, with transitions remapped through the representatives.
    let mut out = Dfa {
        states: Vec::new(),
        initial: DfaId(0),
    };
    let mut new_of: Vec<Option<DfaId>> = vec![None; dfa.states.len()];
    let mut order: Vec<DfaId> = Vec::new();
    let mut stack: Vec<DfaId> = vec![repr[dfa.initial.0]];
    while let Some(block) = stack.pop() {
        if new_of[block.0].is_some() {
            continue;
        }
        new_of[block.0] = Some(out.add_state());
        order.push(block);
        for target in dfa.states[block.0].trans.iter().rev().flatten() {
            let target_block = repr[target.0];
            if new_of[target_block.0].is_none() {
                stack.push(target_block);
            }
        }
    }

    for &block in &order {
        let new_id = new_of[block.0].unwrap();
        out.states[new_id.0].accept = dfa.states[block.0].accept;
        for i in 0..256 {
            out.states[new_id.0].trans[i] = dfa.states[block.0].trans[i]
                .map(|target| new_of[repr[target.0].0].expect("INTERNAL ERROR: unmapped block"));
        }
    }

    out.initial = new_of[repr[dfa.initial.0].0].unwrap();
    out
}
