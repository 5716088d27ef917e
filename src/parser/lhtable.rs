use crate::parser::grammar::{ActionId, NtId, ParserGrammar, TermSymId};
use crate::parser::ll::{LlBuilder, LlId, LlItem};
use crate::{GenResult, Log};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a state inside the [LhTable] arena.
pub struct LhId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of an interned megaaction.
pub struct MegaId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// One step of a megaaction: run a semantic action or consume the dispatched token.
pub enum MegaNode {
    Shift,
    Action(ActionId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A content-interned sequence of actions and shift sentinels executed atomically on a
/// transition.
pub struct MegaAction {
    pub nodes: Vec<MegaNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// A table transition: whether the dispatched token is consumed, the megaaction to run,
/// and the states pushed (stored in production order, pushed right to left).
pub struct Transition {
    pub shift: bool,
    pub action: MegaId,
    pub stack: Vec<LhId>,
}

#[derive(Debug, Clone)]
/// One element of a recovery action sequence: a synthesized token or a megaaction.
pub enum SkipNode {
    Term(TermSymId),
    Mega(MegaId),
}

#[derive(Debug, Clone)]
/// The cheapest way to reach a configuration that consumes a given token from a state:
/// total cost, the insertion/action sequence, and the replacement state stack.
pub struct SyncEntry {
    pub cost: u64,
    pub actions: Vec<SkipNode>,
    pub states: Vec<LhId>,
}

/// A table state: per-token dispatch, an optional epsilon fallback, and the recovery
/// data filled in by the recovery pass.
pub struct LhState {
    pub order: usize,
    pub transitions: BTreeMap<TermSymId, Transition>,
    pub etransition: Option<Transition>,
    pub target_states: BTreeSet<LhId>,
    pub sync_skip: Option<(u64, Vec<SkipNode>)>,
    pub sync: BTreeMap<TermSymId, SyncEntry>,
}

/// The finished parser table: an initial state per export, the reachable states in
/// emission order, and the interned megaactions.
pub struct LhTable {
    pub arena: Vec<LhState>,
    pub list: Vec<LhId>,
    pub entries: Vec<(NtId, LhId)>,
    pub megaactions: Vec<MegaAction>,
    pub null_action: MegaId,
}

impl LhTable {
    pub fn state(&self, id: LhId) -> &LhState {
        &self.arena[id.0]
    }

    pub fn megaaction(&self, id: MegaId) -> &MegaAction {
        &self.megaactions[id.0]
    }

    /// Run the table over a token sequence from one entry state, returning the
    /// megaactions executed. Fails on the first token with no transition.
    pub fn simulate(&self, entry: LhId, input: &[TermSymId]) -> Result<Vec<MegaId>, String> {
        let mut stack: Vec<LhId> = vec![entry];
        let mut output: Vec<MegaId> = Vec::new();
        let mut pos = 0;

        while let Some(state) = stack.pop() {
            let tok = match input.get(pos) {
                Some(tok) => *tok,
                None => return Err(format!("simulated parse ran past the input at {}", pos)),
            };
            let transition = match self.arena[state.0].transitions.get(&tok) {
                Some(transition) => transition,
                None => match &self.arena[state.0].etransition {
                    Some(transition) => transition,
                    None => return Err(format!("simulated parse error around {}", pos)),
                },
            };
            if transition.shift {
                pos += 1;
            }
            if !self.megaactions[transition.action.0].nodes.is_empty() {
                output.push(transition.action);
            }
            for state in transition.stack.iter().rev() {
                stack.push(*state);
            }
        }
        Ok(output)
    }
}

/// Lowers refactored LL states into the LH table.
///
/// Each production is scanned for its decision point: the first terminal becomes a
/// shifting transition, the first state an epsilon transition selected by that state's
/// FIRST set; everything before it collapses into a megaaction and everything after it
/// becomes the pushed state stack. Epsilon transitions are then inlined until every
/// dispatch shifts, and stacks deeper than four entries are split through hash-consed
/// tail states.
pub struct LhTableBuilder<'g> {
    grammar: &'g ParserGrammar,
    log: Log,
    arena: Vec<LhState>,
    entries: Vec<(NtId, LhId)>,
    state_map: HashMap<LlId, LhId>,
    terminal_map: HashMap<TermSymId, LhId>,
    action_map: HashMap<ActionId, LhId>,
    long_transition_map: HashMap<Vec<LhId>, LhId>,
    megaactions: Vec<MegaAction>,
    megaaction_map: HashMap<Vec<MegaNode>, MegaId>,
}

impl<'g> LhTableBuilder<'g> {
    pub fn new(grammar: &'g ParserGrammar, log: Log) -> Self {
        Self {
            grammar,
            log,
            arena: Vec::new(),
            entries: Vec::new(),
            state_map: HashMap::new(),
            terminal_map: HashMap::new(),
            action_map: HashMap::new(),
            long_transition_map: HashMap::new(),
            megaactions: Vec::new(),
            megaaction_map: HashMap::new(),
        }
    }

    pub fn build(mut self) -> GenResult<LhTable> {
        let mut ll_builder = LlBuilder::new(self.grammar, self.log);
        ll_builder.build()?;

        for (nt, ll_state) in ll_builder.entries.clone() {
            let lh = self.convert_state(&ll_builder, ll_state);
            self.entries.push((nt, lh));
        }

        self.inline_states();
        let list = self.filter_states();
        self.split_long_states(&list);
        let list = self.filter_states();

        let null_action = self.get_megaaction(Vec::new());
        Ok(LhTable {
            arena: self.arena,
            list,
            entries: self.entries,
            megaactions: self.megaactions,
            null_action,
        })
    }

    fn new_state(&mut self) -> LhId {
        let id = LhId(self.arena.len());
        self.arena.push(LhState {
            order: id.0,
            transitions: BTreeMap::new(),
            etransition: None,
            target_states: BTreeSet::new(),
            sync_skip: None,
            sync: BTreeMap::new(),
        });
        id
    }

    fn get_megaaction(&mut self, nodes: Vec<MegaNode>) -> MegaId {
        if let Some(&id) = self.megaaction_map.get(&nodes) {
            return id;
        }
        let id = MegaId(self.megaactions.len());
        self.megaactions.push(MegaAction {
            nodes: nodes.clone(),
        });
        self.megaaction_map.insert(nodes, id);
        id
    }

    /// A state that runs one action and pops, shared per action.
    fn convert_action(&mut self, action: ActionId) -> LhId {
        if let Some(&id) = self.action_map.get(&action) {
            return id;
        }
        let lh = self.new_state();
        let mega = self.get_megaaction(vec![MegaNode::Action(action)]);
        self.arena[lh.0].etransition = Some(Transition {
            shift: false,
            action: mega,
            stack: Vec::new(),
        });
        self.action_map.insert(action, lh);
        lh
    }

    /// A state that shifts one terminal and pops, shared per terminal.
    fn convert_terminal(&mut self, terminal: TermSymId) -> LhId {
        if let Some(&id) = self.terminal_map.get(&terminal) {
            return id;
        }
        let lh = self.new_state();
        let mega = self.get_megaaction(vec![MegaNode::Shift]);
        self.arena[lh.0].transitions.insert(
            terminal,
            Transition {
                shift: true,
                action: mega,
                stack: Vec::new(),
            },
        );
        self.terminal_map.insert(terminal, lh);
        lh
    }

    fn convert_state(&mut self, ll_builder: &LlBuilder<'_>, ll: LlId) -> LhId {
        if let Some(&id) = self.state_map.get(&ll) {
            return id;
        }
        let lh = self.new_state();
        self.state_map.insert(ll, lh);

        for production in ll_builder.state(ll).prods.clone() {
            let items = production.items;
            let mut action_collection: Vec<MegaNode> = Vec::new();
            let mut terminals: BTreeSet<TermSymId> = BTreeSet::new();
            let mut targets: Vec<LhId> = Vec::new();
            let mut shift = false;

            let n = items.len();
            let mut idx = 0;
            while idx < n {
                match items[idx] {
                    LlItem::Action(action) => {
                        action_collection.push(MegaNode::Action(action));
                    }
                    LlItem::Term(term) => {
                        terminals.insert(term);
                        action_collection.push(MegaNode::Shift);
                        idx += 1;
                        while idx < n {
                            if let LlItem::Action(action) = items[idx] {
                                action_collection.push(MegaNode::Action(action));
                                idx += 1;
                            } else {
                                break;
                            }
                        }
                        shift = true;
                        break;
                    }
                    LlItem::State(target) => {
                        terminals.extend(ll_builder.state(target).first.iter().copied());
                        break;
                    }
                }
                idx += 1;
            }
            while idx < n {
                match items[idx] {
                    LlItem::Action(action) => {
                        let target = self.convert_action(action);
                        targets.push(target);
                    }
                    LlItem::Term(term) => {
                        let target = self.convert_terminal(term);
                        targets.push(target);
                    }
                    LlItem::State(target) => {
                        let target = self.convert_state(ll_builder, target);
                        targets.push(target);
                    }
                }
                idx += 1;
            }

            let transition = Transition {
                shift,
                action: self.get_megaaction(action_collection),
                stack: targets,
            };
            if terminals.is_empty() {
                self.arena[lh.0].etransition = Some(transition);
            } else {
                for terminal in terminals {
                    self.arena[lh.0].transitions.insert(terminal, transition.clone());
                }
            }
        }
        lh
    }

    /// Remove the need for epsilon closure at run time: for every non-shifting
    /// dispatch, walk into the target under the same lookahead, concatenating actions
    /// and stacks, until a shift surfaces or the stack drains.
    fn inline_states(&mut self) {
        for state_idx in 0..self.arena.len() {
            let terms: Vec<TermSymId> = self.arena[state_idx].transitions.keys().copied().collect();
            for term in terms {
                let transition = self.arena[state_idx].transitions[&term].clone();
                if transition.shift {
                    continue;
                }
                let mut shift = transition.shift;
                let mut stack: Vec<LhId> = transition.stack.iter().rev().copied().collect();
                let mut actions: Vec<MegaNode> =
                    self.megaactions[transition.action.0].nodes.clone();
                while let Some(their_state) = stack.pop() {
                    let their_transition =
                        match self.arena[their_state.0].transitions.get(&term) {
                            Some(transition) => transition,
                            None => self.arena[their_state.0]
                                .etransition
                                .as_ref()
                                .expect("INTERNAL ERROR: inlining hit a state with no dispatch"),
                        }
                        .clone();
                    actions.extend(self.megaactions[their_transition.action.0].nodes.iter());
                    stack.extend(their_transition.stack.iter().rev());
                    shift = their_transition.shift;
                    if shift {
                        break;
                    }
                }
                let action = self.get_megaaction(actions);
                let stack: Vec<LhId> = stack.into_iter().rev().collect();
                self.arena[state_idx].transitions.insert(
                    term,
                    Transition {
                        shift,
                        action,
                        stack,
                    },
                );
            }
        }
    }

    /// A chain state carrying a too-deep remainder; shared per remainder.
    fn convert_long_transition(&mut self, states: Vec<LhId>) -> LhId {
        if let Some(&id) = self.long_transition_map.get(&states) {
            return id;
        }
        let lh = self.new_state();
        self.long_transition_map.insert(states.clone(), lh);
        let null_action = self.get_megaaction(Vec::new());
        let etransition = self.create_long_transition(false, null_action, states);
        self.arena[lh.0].etransition = Some(etransition);
        lh
    }

    fn create_long_transition(
        &mut self,
        shift: bool,
        action: MegaId,
        states: Vec<LhId>,
    ) -> Transition {
        if states.len() <= 4 {
            return Transition {
                shift,
                action,
                stack: states,
            };
        }
        let tail = self.convert_long_transition(states[3..].to_vec());
        let mut stack: Vec<LhId> = states[..3].to_vec();
        stack.push(tail);
        Transition {
            shift,
            action,
            stack,
        }
    }

    /// Bound every transition's stack depth at four by chaining the excess through
    /// dedicated tail states.
    fn split_long_states(&mut self, list: &[LhId]) {
        for &state in list {
            let terms: Vec<TermSymId> = self.arena[state.0].transitions.keys().copied().collect();
            for term in terms {
                let transition = self.arena[state.0].transitions[&term].clone();
                if transition.stack.len() > 4 {
                    let split = self.create_long_transition(
                        transition.shift,
                        transition.action,
                        transition.stack,
                    );
                    self.arena[state.0].transitions.insert(term, split);
                }
            }
            if let Some(transition) = self.arena[state.0].etransition.clone() {
                if transition.stack.len() > 4 {
                    let split = self.create_long_transition(
                        transition.shift,
                        transition.action,
                        transition.stack,
                    );
                    self.arena[state.0].etransition = Some(split);
                }
            }
        }
    }

    /// Renumber the states reachable from the entries in first-visit order.
    fn filter_states(&mut self) -> Vec<LhId> {
        let mut visited: Vec<bool> = vec![false; self.arena.len()];
        let mut order: Vec<LhId> = Vec::new();
        let mut stack: Vec<LhId> = Vec::new();

        for (_, state) in self.entries.iter().rev() {
            stack.push(*state);
        }
        while let Some(state) = stack.pop() {
            if visited[state.0] {
                continue;
            }
            visited[state.0] = true;
            order.push(state);

            let node = &self.arena[state.0];
            let mut children: Vec<LhId> = Vec::new();
            for (_, transition) in &node.transitions {
                children.extend(transition.stack.iter().copied());
            }
            if let Some(transition) = &node.etransition {
                children.extend(transition.stack.iter().copied());
            }
            for child in children.into_iter().rev() {
                if !visited[child.0] {
                    stack.push(child);
                }
            }
        }

        for (position, &state) in order.iter().enumerate() {
            self.arena[state.0].order = position;
        }
        order
    }
}
