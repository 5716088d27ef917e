use crate::lexer::nfa::{NfaBuilder, NfaId, RuleId};
use crate::Log;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a state inside a [Dfa] arena.
pub struct DfaId(pub usize);

/// A deterministic scanner state: one optional successor per byte value plus an
/// optional accept rule.
#[derive(Debug)]
pub struct DfaState {
    pub trans: [Option<DfaId>; 256],
    pub accept: Option<RuleId>,
}

impl DfaState {
    pub fn new() -> Self {
        Self {
            trans: [None; 256],
            accept: None,
        }
    }
}

/// The deterministic automaton produced by subset construction, and later rewritten in
/// place by minimization output, keyword resolution and error-state injection.
#[derive(Debug)]
pub struct Dfa {
    pub states: Vec<DfaState>,
    pub initial: DfaId,
}

impl Dfa {
    pub fn add_state(&mut self) -> DfaId {
        let id = DfaId(self.states.len());
        self.states.push(DfaState::new());
        id
    }

    /// All states reachable from `from`, in first-visit depth-first order with byte
    /// transitions explored in increasing byte order. This order is what assigns the
    /// emitted state indices.
    pub fn visit(&self, from: DfaId) -> Vec<DfaId> {
        let mut visited: Vec<bool> = vec![false; self.states.len()];
        let mut order: Vec<DfaId> = Vec::new();
        let mut stack: Vec<DfaId> = vec![from];
        while let Some(state) = stack.pop() {
            if visited[state.0] {
                continue;
            }
            visited[state.0] = true;
            order.push(state);
            for target in self.states[state.0].trans.iter().rev().flatten() {
                if !visited[target.0] {
                    stack.push(*target);
                }
            }
        }
        order
    }

    /// Whether the automaton accepts `input` when started from the initial state,
    /// ignoring rule identity. Only used by tests and diagnostics.
    pub fn accepts(&self, input: &[u8]) -> bool {
        let mut state = self.initial;
        for byte in input {
            match self.states[state.0].trans[*byte as usize] {
                Some(target) => state = target,
                None => return false,
            }
        }
        self.states[state.0].accept.is_some()
    }

    /// The accept rule produced for `input`, if the whole input is matched.
    pub fn accept_rule(&self, input: &[u8]) -> Option<RuleId> {
        let mut state = self.initial;
        for byte in input {
            state = self.states[state.0].trans[*byte as usize]?;
        }
        self.states[state.0].accept
    }
}

/// A lexer rule promoted to keyword status together with every literal string that
/// reaches one of its accepting states.
#[derive(Debug)]
pub struct Keyword {
    pub rule: RuleId,
    pub strings: Vec<String>,
}

/// Everything the subset construction pass hands downstream.
pub struct DfaOutput {
    pub dfa: Dfa,
    /// Accept rules present in each state's closure, best first.
    pub accept_lists: BTreeMap<DfaId, Vec<RuleId>>,
    pub keywords: BTreeMap<RuleId, Keyword>,
}

/// Subset construction over strongly-connected-component closures.
///
/// The epsilon closure is not computed per NFA state but once per SCC of the epsilon
/// graph: a component's closure is itself plus the closures of the components reached by
/// one epsilon edge, so subset construction manipulates small sets of component indices
/// and shares the frozen closure vectors between equal results.
pub struct DfaBuilder<'n> {
    nfa: &'n NfaBuilder,
    error_rule: RuleId,
    keyword_threshold: u64,
    log: Log,

    /// Reachable NFA states; positions in this list are the local indices.
    locals: Vec<NfaId>,
    local_of: Vec<usize>,
    scc_of: Vec<usize>,
    scc_states: Vec<Vec<usize>>,
    closures: Vec<Rc<Vec<usize>>>,

    dfa: Dfa,
    powerset: HashMap<Vec<usize>, DfaId>,
    worklist: Vec<(Vec<usize>, DfaId)>,
    accept_lists: BTreeMap<DfaId, Vec<RuleId>>,
    keywords: BTreeMap<RuleId, Keyword>,
}

const NO_LOCAL: usize = usize::MAX;

impl<'n> DfaBuilder<'n> {
    pub fn new(nfa: &'n NfaBuilder, error_rule: RuleId, keyword_threshold: u64, log: Log) -> Self {
        Self {
            nfa,
            error_rule,
            keyword_threshold,
            log,
            locals: Vec::new(),
            local_of: Vec::new(),
            scc_of: Vec::new(),
            scc_states: Vec::new(),
            closures: Vec::new(),
            dfa: Dfa {
                states: Vec::new(),
                initial: DfaId(0),
            },
            powerset: HashMap::new(),
            worklist: Vec::new(),
            accept_lists: BTreeMap::new(),
            keywords: BTreeMap::new(),
        }
    }

    pub fn build(mut self, initial: NfaId) -> DfaOutput {
        self.locals = self.nfa.reachable(initial);
        self.local_of = vec![NO_LOCAL; self.nfa.states.len()];
        for (local, state) in self.locals.iter().enumerate() {
            self.local_of[state.0] = local;
        }

        self.find_scc();

        let initial_closure = self.closures[self.scc_of[self.local_of[initial.0]]].clone();
        let initial_dfa = self.get_dfa_for_subset(initial_closure.as_ref().clone());
        self.dfa.initial = initial_dfa;
        self.process();
        self.find_keywords();
        self.resolve_accepts_from_keywords();

        DfaOutput {
            dfa: self.dfa,
            accept_lists: self.accept_lists,
            keywords: self.keywords,
        }
    }

    /// Epsilon-graph SCCs and their closures. Components come out of the Tarjan walk
    /// children first, so each closure only needs the already-frozen closures of the
    /// components one epsilon edge away.
    fn find_scc(&mut self) {
        let locals = &self.locals;
        let local_of = &self.local_of;
        let nfa = self.nfa;
        let sccs = crate::util::strongly_connected(locals.len(), |local| {
            nfa.states[locals[local].0]
                .etrans
                .iter()
                .map(|t| local_of[t.0])
                .collect()
        });

        self.scc_of = vec![0; self.locals.len()];
        for (scc_index, scc) in sccs.iter().enumerate() {
            for &local in scc {
                self.scc_of[local] = scc_index;
            }
        }
        self.scc_states = sccs;

        let mut shared: HashMap<Vec<usize>, Rc<Vec<usize>>> = HashMap::new();
        for scc_index in 0..self.scc_states.len() {
            let mut closure: BTreeSet<usize> = BTreeSet::new();
            closure.insert(scc_index);
            for &local in &self.scc_states[scc_index] {
                for target in &self.nfa.states[self.locals[local].0].etrans {
                    let target_scc = self.scc_of[self.local_of[target.0]];
                    if target_scc == scc_index {
                        continue;
                    }
                    closure.extend(self.closures[target_scc].iter().copied());
                }
            }
            let frozen: Vec<usize> = closure.into_iter().collect();
            let rc = shared
                .entry(frozen.clone())
                .or_insert_with(|| Rc::new(frozen))
                .clone();
            self.closures.push(rc);
        }
    }

    fn get_dfa_for_subset(&mut self, subset: Vec<usize>) -> DfaId {
        if let Some(existing) = self.powerset.get(&subset) {
            return *existing;
        }
        let id = self.dfa.add_state();
        self.powerset.insert(subset.clone(), id);
        self.worklist.push((subset, id));
        id
    }

    fn process(&mut self) {
        let mut i = 0;
        while i < self.worklist.len() {
            let (subset, dfa_state) = self.worklist[i].clone();
            self.process_dfa_state(&subset, dfa_state);
            i += 1;
        }
    }

    fn process_dfa_state(&mut self, subset: &[usize], dfa_state: DfaId) {
        let mut transitions: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); 256];
        let mut accepts: BTreeSet<RuleId> = BTreeSet::new();

        for &scc in subset {
            for state_index in 0..self.scc_states[scc].len() {
                let local = self.scc_states[scc][state_index];
                let nfa_state = &self.nfa.states[self.locals[local].0];
                if let Some(rule) = nfa_state.rule {
                    accepts.insert(rule);
                }
                for (chars, target) in &nfa_state.trans {
                    let target_scc = self.scc_of[self.local_of[target.0]];
                    let closure = self.closures[target_scc].clone();
                    for byte in chars.iter() {
                        transitions[byte as usize].extend(closure.iter().copied());
                    }
                }
            }
        }

        for (byte, subset) in transitions.into_iter().enumerate() {
            if subset.is_empty() {
                continue;
            }
            let target = self.get_dfa_for_subset(subset.into_iter().collect());
            self.dfa.states[dfa_state.0].trans[byte] = Some(target);
        }

        if !accepts.is_empty() {
            let mut accept_list: Vec<RuleId> = accepts.into_iter().collect();
            accept_list.sort_by_key(|rule| (self.nfa.rules[rule.0].order, *rule));
            self.dfa.states[dfa_state.0].accept = Some(accept_list[0]);
            self.accept_lists.insert(dfa_state, accept_list);
        }
    }

    /// Count the distinct input paths into every state, promote rules whose bounded
    /// path total stays within the threshold, and enumerate their literal strings.
    /// Rules that no reachable state accepts are reported as useless.
    fn find_keywords(&mut self) {
        let initial = self.dfa.initial;
        self.dfa.states[initial.0].accept = None;

        let all_states = self.dfa.visit(initial);
        let mut in_edges: HashMap<DfaId, Vec<(u8, DfaId)>> = HashMap::new();
        let mut ins: HashMap<DfaId, usize> = HashMap::new();
        for &state in &all_states {
            for (idx, target) in self.dfa.states[state.0].trans.iter().enumerate() {
                if let Some(target) = target {
                    *ins.entry(*target).or_insert(0) += 1;
                    in_edges
                        .entry(*target)
                        .or_insert_with(Vec::new)
                        .push((idx as u8, state));
                }
            }
        }

        let mut paths: Vec<Option<u64>> = vec![Some(0); self.dfa.states.len()];
        paths[initial.0] = Some(1);

        let mut worklist: Vec<DfaId> = Vec::new();
        if !ins.contains_key(&initial) {
            worklist.push(initial);
        }
        let mut i = 0;
        while i < worklist.len() {
            let state = worklist[i];
            for byte in 0..256 {
                if let Some(target) = self.dfa.states[state.0].trans[byte] {
                    let count = ins.get_mut(&target).expect("INTERNAL ERROR: missing in-degree");
                    *count -= 1;
                    if *count == 0 {
                        worklist.push(target);
                    }
                    let add = paths[state.0];
                    paths[target.0] = match (paths[target.0], add) {
                        (Some(total), Some(add)) => Some(total + add),
                        _ => None,
                    };
                }
            }
            i += 1;
        }
        for (state, count) in &ins {
            if *count > 0 {
                paths[state.0] = None;
            }
        }

        let mut count_per_rule: BTreeMap<RuleId, Option<u64>> = BTreeMap::new();
        for &state in &all_states {
            if let Some(accept) = self.dfa.states[state.0].accept {
                let entry = count_per_rule.entry(accept).or_insert(Some(0));
                *entry = match (*entry, paths[state.0]) {
                    (Some(total), Some(add)) => Some(total + add),
                    _ => None,
                };
            }
        }

        for (&rule, &count) in &count_per_rule {
            if let Some(count) = count {
                if count <= self.keyword_threshold {
                    self.keywords.insert(
                        rule,
                        Keyword {
                            rule,
                            strings: Vec::new(),
                        },
                    );
                }
            }
        }

        for &state in &all_states {
            if let Some(accept) = self.dfa.states[state.0].accept {
                if self.keywords.contains_key(&accept) {
                    let mut path: Vec<u8> = Vec::new();
                    let mut strings: Vec<String> = Vec::new();
                    self.enumerate_paths(&in_edges, state, &mut path, &mut strings);
                    self.keywords.get_mut(&accept).unwrap().strings.extend(strings);
                }
            }
        }

        for (index, rule) in self.nfa.rules.iter().enumerate() {
            if rule.order < 0 {
                continue;
            }
            let count = count_per_rule.get(&RuleId(index)).copied().unwrap_or(Some(0));
            if count == Some(0) {
                eprintln!("Lexer rule at {} is useless", rule.loc);
            }
        }

        self.log.trace(&format!(
            "DFA states: {}, keywords: {}",
            all_states.len(),
            self.keywords.len()
        ));
    }

    /// Walk the reversed transition graph from an accepting state down to the initial
    /// state, yielding each byte path reversed into a literal string.
    fn enumerate_paths(
        &self,
        in_edges: &HashMap<DfaId, Vec<(u8, DfaId)>>,
        state: DfaId,
        path: &mut Vec<u8>,
        strings: &mut Vec<String>,
    ) {
        match in_edges.get(&state) {
            None => {
                strings.push(path.iter().rev().map(|b| *b as char).collect());
            }
            Some(edges) => {
                for (byte, from) in edges {
                    path.push(*byte);
                    self.enumerate_paths(in_edges, *from, path, strings);
                    path.pop();
                }
            }
        }
    }

    /// Keyword accepting states are rewritten so that matching continues past the
    /// keyword: their accept becomes the nearest reachable non-keyword accept, or the
    /// error rule when there is none.
    fn resolve_accepts_from_keywords(&mut self) {
        let all_states = self.dfa.visit(self.dfa.initial);
        for &state in &all_states {
            let accept = self.dfa.states[state.0].accept;
            if let Some(accept) = accept {
                if self.keywords.contains_key(&accept) {
                    let replacement = self
                        .find_nonkeyword_accept(state)
                        .unwrap_or(self.error_rule);
                    self.dfa.states[state.0].accept = Some(replacement);
                }
            }
        }
    }

    fn find_nonkeyword_accept(&self, state: DfaId) -> Option<RuleId> {
        for candidate in self.dfa.visit(state) {
            if let Some(accept) = self.dfa.states[candidate.0].accept {
                if !self.keywords.contains_key(&accept) {
                    return Some(accept);
                }
            }
        }
        None
    }
}
