use crate::parser::grammar::{ActionId, NtId, ParserGrammar, Symbol, TermSymId};
use crate::util::strongly_connected;
use crate::{GenResult, GrammarError, Log};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a state inside the [LlBuilder] arena.
pub struct LlId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// One position of an LL production body: a state invocation, a shifted terminal or a
/// semantic action.
pub enum LlItem {
    State(LlId),
    Term(TermSymId),
    Action(ActionId),
}

#[derive(Debug, Clone)]
pub struct LlProduction {
    pub items: Vec<LlItem>,
    /// Count of items that are not actions; maintained only inside nullable discovery.
    nonnulls: usize,
}

impl LlProduction {
    fn new(items: Vec<LlItem>) -> Self {
        Self { items, nonnulls: 0 }
    }
}

/// A grammar state during LL refactoring.
///
/// `nullable` holds the witness action sequence executed when the state derives the
/// empty string, or `None` when it cannot. `order` is the topological position assigned
/// by the latest sort.
pub struct LlState {
    pub name: String,
    pub prods: Vec<LlProduction>,
    pub nullable: Option<Vec<ActionId>>,
    pub first: BTreeSet<TermSymId>,
    pub follow: BTreeSet<TermSymId>,
    pub order: i64,
}

/// The first state invocation of a production, skipping leading actions: the position
/// where substitution and left-recursion checks look.
fn extract_reachable(items: &[LlItem]) -> (Option<LlId>, usize) {
    for (idx, item) in items.iter().enumerate() {
        match item {
            LlItem::State(state) => return (Some(*state), idx),
            LlItem::Action(_) => {}
            LlItem::Term(_) => return (None, idx),
        }
    }
    (None, items.len())
}

/// The LL(1) refactoring pipeline.
///
/// Starting from states that mirror the grammar nonterminals one to one, the builder
/// eliminates nullable states, removes left recursion, factors common prefixes into
/// hash-consed tail states, inlines unit and singleton states, and merges states with
/// identical shape. The surviving states carry the FIRST sets the table construction
/// dispatches on.
pub struct LlBuilder<'g> {
    pub grammar: &'g ParserGrammar,
    arena: Vec<LlState>,
    /// The live states in their current working order.
    pub list: Vec<LlId>,
    pub entries: Vec<(NtId, LlId)>,
    ranks: HashMap<LlId, usize>,
    log: Log,
}

impl<'g> LlBuilder<'g> {
    pub fn new(grammar: &'g ParserGrammar, log: Log) -> Self {
        Self {
            grammar,
            arena: Vec::new(),
            list: Vec::new(),
            entries: Vec::new(),
            ranks: HashMap::new(),
            log,
        }
    }

    pub fn state(&self, id: LlId) -> &LlState {
        &self.arena[id.0]
    }

    fn new_state(&mut self, name: String) -> LlId {
        let id = LlId(self.arena.len());
        self.arena.push(LlState {
            name,
            prods: Vec::new(),
            nullable: None,
            first: BTreeSet::new(),
            follow: BTreeSet::new(),
            order: -1,
        });
        id
    }

    fn add_production(&mut self, state: LlId, items: Vec<LlItem>) {
        if self.arena[state.0].prods.iter().any(|p| p.items == items) {
            return;
        }
        self.arena[state.0].prods.push(LlProduction::new(items));
    }

    pub fn build(&mut self) -> GenResult<()> {
        self.construct_initial_states();
        self.eliminate_nullables()?;
        self.eliminate_left_recursion()?;

        // The nullable, factoring and merging rewrites feed each other; the schedule
        // below runs them to convergence on the grammars this generator targets.
        self.eliminate_nullables()?;
        self.left_factor()?;
        self.eliminate_nullables()?;
        self.filter_states();
        self.eliminate_units();
        self.eliminate_singletons();
        self.merge_states();
        self.filter_states();

        self.eliminate_nullables()?;
        self.left_factor()?;
        self.eliminate_nullables()?;
        self.eliminate_units();
        self.merge_states();
        self.filter_states();

        self.eliminate_nullables()?;
        self.left_factor()?;
        self.compute_first_sets();

        self.filter_states();
        self.log.note(&format!("LL states: {}", self.list.len()));
        Ok(())
    }

    fn item_label(&self, item: &LlItem) -> String {
        match item {
            LlItem::State(state) => format!(
                "{}({})",
                self.arena[state.0].name,
                self.arena[state.0].prods.len()
            ),
            LlItem::Term(term) => serde_json::to_string(self.grammar.terminal_name(*term))
                .unwrap_or_else(|_| self.grammar.terminal_name(*term).to_string()),
            LlItem::Action(action) => {
                format!("{{{}}}", self.grammar.actions[action.0].source.trim())
            }
        }
    }

    fn production_label(&self, items: &[LlItem]) -> String {
        items
            .iter()
            .map(|item| self.item_label(item))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Dump every live state and its productions to stderr. Used when refactoring
    /// cannot make progress.
    pub fn dump_states(&self) {
        eprintln!("---");
        let mut sorted: Vec<LlId> = self.list.clone();
        sorted.sort_by(|a, b| self.arena[a.0].name.cmp(&self.arena[b.0].name));
        for state in sorted {
            eprintln!("State {}", self.arena[state.0].name);
            for production in &self.arena[state.0].prods {
                eprintln!("  {}", self.production_label(&production.items));
            }
        }
        eprintln!("TOTAL STATES: {}", self.list.len());
        eprintln!("===");
    }

    fn construct_initial_states(&mut self) {
        let mut nt_to_state: Vec<LlId> = Vec::with_capacity(self.grammar.nonterminals.len());
        for nt in &self.grammar.nonterminals {
            let state = self.new_state(nt.name.clone());
            self.list.push(state);
            nt_to_state.push(state);
        }

        for &nt in &self.grammar.keep {
            self.entries.push((nt, nt_to_state[nt.0]));
        }

        for (nt_idx, nt) in self.grammar.nonterminals.iter().enumerate() {
            let state = nt_to_state[nt_idx];
            for prod in &nt.prods {
                let mut items: Vec<LlItem> = Vec::new();
                for symbol in &prod.symbols {
                    match symbol {
                        Symbol::Terminal(term) => items.push(LlItem::Term(*term)),
                        Symbol::Nonterminal(target) => {
                            items.push(LlItem::State(nt_to_state[target.0]))
                        }
                    }
                }
                if let Some(action) = prod.action {
                    items.push(LlItem::Action(action));
                }
                self.add_production(state, items);
            }
        }
    }

    /// Recompute every state's nullable witness by propagating productions whose
    /// non-action items have all become nullable. A state whose productions would
    /// produce two different witness sequences cannot be refactored.
    fn find_nullables(&mut self) -> GenResult<()> {
        let live = self.list.clone();
        let mut state_to_productions: HashMap<LlId, Vec<(LlId, usize)>> = HashMap::new();
        let mut worklist: Vec<LlId> = Vec::new();

        for &state in &live {
            self.arena[state.0].nullable = None;
            for prod_idx in 0..self.arena[state.0].prods.len() {
                let nonnulls = self.arena[state.0].prods[prod_idx]
                    .items
                    .iter()
                    .filter(|item| !matches!(item, LlItem::Action(_)))
                    .count();
                self.arena[state.0].prods[prod_idx].nonnulls = nonnulls;
            }
        }

        fn discover_nullable(
            arena: &mut Vec<LlState>,
            worklist: &mut Vec<LlId>,
            state: LlId,
            prod_idx: usize,
        ) {
            if arena[state.0].nullable.is_some() {
                return;
            }
            let items = arena[state.0].prods[prod_idx].items.clone();
            let mut nullable: Vec<ActionId> = Vec::new();
            for item in items {
                match item {
                    LlItem::State(target) => {
                        let witness = arena[target.0]
                            .nullable
                            .as_ref()
                            .expect("INTERNAL ERROR: nullable propagation out of order");
                        nullable.extend(witness.iter().copied());
                    }
                    LlItem::Action(action) => nullable.push(action),
                    LlItem::Term(_) => {
                        panic!("INTERNAL ERROR: terminal in a nullable production")
                    }
                }
            }
            arena[state.0].nullable = Some(nullable);
            worklist.push(state);
        }

        for &state in &live {
            for prod_idx in 0..self.arena[state.0].prods.len() {
                let items = self.arena[state.0].prods[prod_idx].items.clone();
                for item in &items {
                    if let LlItem::State(target) = item {
                        state_to_productions
                            .entry(*target)
                            .or_insert_with(Vec::new)
                            .push((state, prod_idx));
                    }
                }
                if self.arena[state.0].prods[prod_idx].nonnulls == 0 {
                    discover_nullable(&mut self.arena, &mut worklist, state, prod_idx);
                }
            }
        }

        let mut i = 0;
        while i < worklist.len() {
            let state = worklist[i];
            if let Some(uses) = state_to_productions.get(&state).cloned() {
                for (owner, prod_idx) in uses {
                    self.arena[owner.0].prods[prod_idx].nonnulls -= 1;
                    if self.arena[owner.0].prods[prod_idx].nonnulls == 0 {
                        discover_nullable(&mut self.arena, &mut worklist, owner, prod_idx);
                    }
                }
            }
            i += 1;
        }

        for &state in &live {
            if self.arena[state.0].nullable.is_none() {
                continue;
            }
            for prod_idx in 0..self.arena[state.0].prods.len() {
                if self.arena[state.0].prods[prod_idx].nonnulls != 0 {
                    continue;
                }
                let items = self.arena[state.0].prods[prod_idx].items.clone();
                let mut candidate: Vec<ActionId> = Vec::new();
                for item in items {
                    match item {
                        LlItem::Action(action) => candidate.push(action),
                        LlItem::State(target) => candidate.extend(
                            self.arena[target.0].nullable.as_ref().unwrap().iter().copied(),
                        ),
                        LlItem::Term(_) => {}
                    }
                }
                if self.arena[state.0].nullable.as_ref() != Some(&candidate) {
                    eprintln!(
                        "Different nullable sequence was inferred for {}",
                        self.arena[state.0].name
                    );
                    return Err(GrammarError::bare(format!(
                        "nullable elimination failed for '{}'",
                        self.arena[state.0].name
                    )));
                }
            }
        }
        Ok(())
    }

    fn eliminate_nullables(&mut self) -> GenResult<()> {
        self.find_nullables()?;
        self.factor_in_nullables();
        Ok(())
    }

    /// Expand every production around its nullable invocations, drop the action-only
    /// leftovers and kill states that end up with no productions at all.
    fn factor_in_nullables(&mut self) {
        let live = self.list.clone();
        let mut states_to_kill: HashSet<LlId> = HashSet::new();
        for &state in &live {
            let mut i = 0;
            while i < self.arena[state.0].prods.len() {
                let items = self.arena[state.0].prods[i].items.clone();
                for (idx, item) in items.iter().enumerate() {
                    if let LlItem::State(target) = item {
                        if let Some(witness) = self.arena[target.0].nullable.clone() {
                            let mut new_items: Vec<LlItem> = Vec::new();
                            new_items.extend_from_slice(&items[..idx]);
                            new_items.extend(witness.into_iter().map(LlItem::Action));
                            new_items.extend_from_slice(&items[idx + 1..]);
                            self.add_production(state, new_items);
                        }
                    }
                }
                i += 1;
            }
            self.arena[state.0]
                .prods
                .retain(|p| !p.items.iter().all(|item| matches!(item, LlItem::Action(_))));
            if self.arena[state.0].prods.is_empty() {
                states_to_kill.insert(state);
            }
        }
        self.remove_states(&states_to_kill);
        for &state in &self.list.clone() {
            self.arena[state.0].nullable = None;
        }
    }

    fn remove_states(&mut self, states: &HashSet<LlId>) {
        if states.is_empty() {
            return;
        }
        for &state in &self.list.clone() {
            self.arena[state.0].prods.retain(|p| {
                !p.items.iter().any(|item| match item {
                    LlItem::State(target) => states.contains(target),
                    _ => false,
                })
            });
        }
        self.list.retain(|state| !states.contains(state));
    }

    fn eliminate_left_recursion(&mut self) -> GenResult<()> {
        self.semisort();
        self.prevent_left_recursion()?;
        self.eliminate_nullables()
    }

    /// Topologically order the live states by their head invocations. States inside a
    /// cycle stay adjacent; substitution then only ever reaches backwards.
    fn semisort(&mut self) {
        let live = self.list.clone();
        let mut pos: HashMap<LlId, usize> = HashMap::new();
        for (idx, &state) in live.iter().enumerate() {
            pos.insert(state, idx);
        }

        let mut reachables: Vec<Vec<usize>> = vec![Vec::new(); live.len()];
        for (idx, &state) in live.iter().enumerate() {
            let mut targets: BTreeSet<usize> = BTreeSet::new();
            for production in &self.arena[state.0].prods {
                let (reachable, _) = extract_reachable(&production.items);
                if let Some(reachable) = reachable {
                    if let Some(&target) = pos.get(&reachable) {
                        targets.insert(target);
                    }
                }
            }
            reachables[idx] = targets.into_iter().collect();
        }

        let sccs = strongly_connected(live.len(), |n| reachables[n].clone());
        let mut ordered: Vec<LlId> = Vec::with_capacity(live.len());
        for scc in sccs {
            for local in scc {
                ordered.push(live[local]);
            }
        }
        ordered.reverse();

        for (idx, &state) in ordered.iter().enumerate() {
            self.arena[state.0].order = idx as i64;
        }
        self.list = ordered;
    }

    fn prevent_left_recursion(&mut self) -> GenResult<()> {
        for &state in &self.list.clone() {
            if self.arena[state.0].order < 0 {
                continue;
            }
            let mut extra_productions: Vec<Vec<LlItem>> = Vec::new();
            let mut remove_productions: Vec<usize> = Vec::new();
            for prod_idx in 0..self.arena[state.0].prods.len() {
                let items = self.arena[state.0].prods[prod_idx].items.clone();
                let (reachable, idx) = extract_reachable(&items);
                if let Some(reachable) = reachable {
                    if self.arena[reachable.0].order < self.arena[state.0].order {
                        remove_productions.push(prod_idx);
                        let their_prods: Vec<Vec<LlItem>> = self.arena[reachable.0]
                            .prods
                            .iter()
                            .map(|p| p.items.clone())
                            .collect();
                        for their_items in their_prods {
                            let mut new_items: Vec<LlItem> = Vec::new();
                            new_items.extend_from_slice(&items[..idx]);
                            new_items.extend(their_items);
                            new_items.extend_from_slice(&items[idx + 1..]);
                            extra_productions.push(new_items);
                        }
                    }
                }
            }
            if !remove_productions.is_empty() || !extra_productions.is_empty() {
                let mut keep_idx = 0;
                let removed: HashSet<usize> = remove_productions.into_iter().collect();
                self.arena[state.0].prods.retain(|_| {
                    let keep = !removed.contains(&keep_idx);
                    keep_idx += 1;
                    keep
                });
                for items in extra_productions {
                    self.arena[state.0].prods.push(LlProduction::new(items));
                }
            }
            self.eliminate_direct_left_recursion(state)?;
        }
        Ok(())
    }

    /// Split `A -> A alpha | beta` into `A -> beta A'` and `A' -> alpha A' | empty`.
    fn eliminate_direct_left_recursion(&mut self, state: LlId) -> GenResult<()> {
        let mut has_recursion = false;
        for production in &self.arena[state.0].prods {
            let (reachable, _) = extract_reachable(&production.items);
            if reachable == Some(state) {
                has_recursion = true;
                break;
            }
        }
        if !has_recursion {
            return Ok(());
        }

        let mut lhs: Vec<Vec<LlItem>> = Vec::new();
        let mut rhs: Vec<Vec<LlItem>> = Vec::new();
        for prod_idx in 0..self.arena[state.0].prods.len() {
            let items = self.arena[state.0].prods[prod_idx].items.clone();
            let (reachable, idx) = extract_reachable(&items);
            if reachable != Some(state) {
                lhs.push(items);
            } else {
                if idx != 0 {
                    eprintln!(
                        "Left recursion elimination failed: state {} has self-recurring prefix {}",
                        self.arena[state.0].name,
                        self.production_label(&items[..idx + 1])
                    );
                    return Err(GrammarError::bare(format!(
                        "left recursion elimination failed for '{}'",
                        self.arena[state.0].name
                    )));
                }
                rhs.push(items[idx + 1..].to_vec());
            }
        }

        let rhs_state = self.new_state(format!("{}'rhs", self.arena[state.0].name));
        self.arena[rhs_state.0].nullable = Some(Vec::new());
        for items in rhs {
            let has_nonnull = items.iter().any(|item| match item {
                LlItem::Term(_) => true,
                LlItem::State(target) => self.arena[target.0].nullable.is_none(),
                LlItem::Action(_) => false,
            });
            if !has_nonnull {
                eprintln!(
                    "Left recursion elimination failed: state {} has self-recurring suffix {}",
                    self.arena[state.0].name,
                    self.production_label(&items)
                );
                return Err(GrammarError::bare(format!(
                    "left recursion elimination failed for '{}'",
                    self.arena[state.0].name
                )));
            }
            let mut new_items = items;
            new_items.push(LlItem::State(rhs_state));
            self.add_production(rhs_state, new_items);
        }
        self.add_production(rhs_state, Vec::new());
        self.list.push(rhs_state);

        self.arena[state.0].prods.clear();
        for items in lhs {
            let mut new_items = items;
            new_items.push(LlItem::State(rhs_state));
            self.add_production(state, new_items);
        }
        Ok(())
    }

    /// FIRST sets by worklist propagation along nullable prefixes. Sets only grow;
    /// states created later start empty and pick up what their productions expose.
    pub fn compute_first_sets(&mut self) {
        let live = self.list.clone();
        let mut edges: HashMap<LlId, Vec<LlId>> = HashMap::new();

        for &state in &live {
            for production in &self.arena[state.0].prods {
                for item in &production.items {
                    match item {
                        LlItem::State(target) => {
                            edges.entry(*target).or_insert_with(Vec::new).push(state);
                            if self.arena[target.0].nullable.is_none() {
                                break;
                            }
                        }
                        LlItem::Term(_) => break,
                        LlItem::Action(_) => {}
                    }
                }
            }
        }

        let mut worklist: Vec<(LlId, TermSymId)> = Vec::new();
        for &state in &live {
            for prod_idx in 0..self.arena[state.0].prods.len() {
                let items = self.arena[state.0].prods[prod_idx].items.clone();
                for item in items {
                    match item {
                        LlItem::Term(term) => {
                            worklist.push((state, term));
                            break;
                        }
                        LlItem::State(target) => {
                            if self.arena[target.0].nullable.is_none() {
                                break;
                            }
                        }
                        LlItem::Action(_) => {}
                    }
                }
            }
        }
        while let Some((state, term)) = worklist.pop() {
            if self.arena[state.0].first.insert(term) {
                if let Some(targets) = edges.get(&state) {
                    for &target in targets {
                        worklist.push((target, term));
                    }
                }
            }
        }
    }

    /// FOLLOW sets for the live states. Not consumed by the refactoring itself but part
    /// of the state model and exercised by diagnostics and tests.
    pub fn compute_follow_sets(&mut self) {
        let live = self.list.clone();
        let mut edges: HashMap<LlId, Vec<LlId>> = HashMap::new();

        for &state in &live {
            for prod_idx in 0..self.arena[state.0].prods.len() {
                let items = self.arena[state.0].prods[prod_idx].items.clone();
                let mut prevs: Vec<LlId> = Vec::new();
                for item in items {
                    match item {
                        LlItem::Term(term) => {
                            for &prev in &prevs {
                                self.arena[prev.0].follow.insert(term);
                            }
                            prevs.clear();
                        }
                        LlItem::State(target) => {
                            let first = self.arena[target.0].first.clone();
                            for &prev in &prevs {
                                self.arena[prev.0].follow.extend(first.iter().copied());
                            }
                            if self.arena[target.0].nullable.is_none() {
                                prevs.clear();
                            }
                            prevs.push(target);
                        }
                        LlItem::Action(_) => {}
                    }
                }
                for prev in prevs {
                    edges.entry(state).or_insert_with(Vec::new).push(prev);
                }
            }
        }

        let mut worklist: Vec<LlId> = live.clone();
        while let Some(state) = worklist.pop() {
            let follow = self.arena[state.0].follow.clone();
            if let Some(targets) = edges.get(&state).cloned() {
                for target in targets {
                    let before = self.arena[target.0].follow.len();
                    self.arena[target.0].follow.extend(follow.iter().copied());
                    if self.arena[target.0].follow.len() != before {
                        worklist.push(target);
                    }
                }
            }
        }
    }

    fn left_factor(&mut self) -> GenResult<()> {
        self.compute_first_sets();
        self.eliminate_common_prefix()
    }

    fn get_production_first_set(&self, items: &[LlItem]) -> BTreeSet<TermSymId> {
        for item in items {
            match item {
                LlItem::Term(term) => {
                    let mut set = BTreeSet::new();
                    set.insert(*term);
                    return set;
                }
                LlItem::State(target) => return self.arena[target.0].first.clone(),
                LlItem::Action(_) => {}
            }
        }
        BTreeSet::new()
    }

    fn eliminate_common_prefix(&mut self) -> GenResult<()> {
        self.compute_ranks();
        for &state in &self.list.clone() {
            let mut expanded_rules: HashMap<LlId, u32> = HashMap::new();
            self.left_factor_state(&mut expanded_rules, state)?;
        }
        Ok(())
    }

    fn get_production_rank(&self, items: &[LlItem]) -> usize {
        for item in items {
            match item {
                LlItem::Term(_) => return 0,
                LlItem::State(target) => return self.ranks.get(target).copied().unwrap_or(0),
                LlItem::Action(_) => {}
            }
        }
        0
    }

    /// Expansion depth per state: how many substitution rounds a production headed by
    /// it may still need before a terminal can surface.
    fn compute_ranks(&mut self) {
        self.semisort();
        for &state in self.list.clone().iter().rev() {
            let mut rank = 1;
            for production in &self.arena[state.0].prods {
                rank = rank.max(self.get_production_rank(&production.items) + 1);
            }
            self.ranks.insert(state, rank);
        }
    }

    fn left_factor_state(
        &mut self,
        expanded_rules: &mut HashMap<LlId, u32>,
        state: LlId,
    ) -> GenResult<()> {
        let prods = self.arena[state.0].prods.clone();
        let mut new_productions: Vec<LlProduction> = Vec::new();
        self.reprocess_bucket(expanded_rules, state, prods, &mut new_productions)?;

        let mut seen: HashSet<Vec<LlItem>> = HashSet::new();
        let mut uniques: Vec<LlProduction> = Vec::new();
        for production in new_productions {
            if seen.insert(production.items.clone()) {
                uniques.push(production);
            }
        }
        self.arena[state.0].prods = uniques;
        Ok(())
    }

    /// Group productions into buckets of overlapping FIRST sets and factor each
    /// multi-production bucket.
    fn reprocess_bucket(
        &mut self,
        expanded_rules: &mut HashMap<LlId, u32>,
        state: LlId,
        list: Vec<LlProduction>,
        output: &mut Vec<LlProduction>,
    ) -> GenResult<()> {
        let mut buckets: Vec<(BTreeSet<TermSymId>, Vec<LlProduction>)> = Vec::new();
        for production in list {
            let my_set = self.get_production_first_set(&production.items);
            match buckets
                .iter_mut()
                .find(|bucket| !bucket.0.is_disjoint(&my_set))
            {
                Some(bucket) => {
                    bucket.0.extend(my_set);
                    bucket.1.push(production);
                }
                None => buckets.push((my_set, vec![production])),
            }
        }

        for (_, bucket) in buckets {
            if bucket.len() > 1 {
                self.left_factor_bucket(expanded_rules, state, bucket, output)?;
            } else {
                output.extend(bucket);
            }
        }
        Ok(())
    }

    /// An existing live state with the exact same productions, or the candidate itself
    /// added to the live list. This is what hash-conses factored tails.
    fn insert_unique_state(&mut self, state: LlId) -> LlId {
        for &other in &self.list {
            if self.arena[other.0].prods.len() != self.arena[state.0].prods.len() {
                continue;
            }
            let equal = self.arena[other.0]
                .prods
                .iter()
                .zip(self.arena[state.0].prods.iter())
                .all(|(a, b)| a.items == b.items);
            if equal {
                return other;
            }
        }
        self.list.push(state);
        state
    }

    fn left_factor_bucket(
        &mut self,
        expanded_rules: &mut HashMap<LlId, u32>,
        state: LlId,
        mut bucket: Vec<LlProduction>,
        output: &mut Vec<LlProduction>,
    ) -> GenResult<()> {
        let mut common_sequence: Vec<LlItem> = bucket[0].items.clone();
        for production in &bucket[1..] {
            let n = common_sequence.len().min(production.items.len());
            let mut idx = 0;
            while idx < n && common_sequence[idx] == production.items[idx] {
                idx += 1;
            }
            common_sequence.truncate(idx);
        }

        if common_sequence.is_empty() {
            let max_rank = bucket
                .iter()
                .map(|p| self.get_production_rank(&p.items))
                .max()
                .unwrap_or(0);
            if !self.reduce_ranks(expanded_rules, state, max_rank, &mut bucket) {
                eprintln!(
                    "Left factoring failed: state {} invokes recursive expansion:",
                    self.arena[state.0].name
                );
                for production in &bucket {
                    eprintln!("  {}", self.production_label(&production.items));
                }
                self.dump_states();
                return Err(GrammarError::bare(format!(
                    "left factoring failed for '{}'",
                    self.arena[state.0].name
                )));
            }
            return self.reprocess_bucket(expanded_rules, state, bucket, output);
        }

        let name = format!(
            "{}[{}]",
            self.arena[state.0].name,
            self.production_label(&common_sequence)
        );
        let follow = self.arena[state.0].follow.clone();
        let rhs_state = self.new_state(name);
        self.arena[rhs_state.0].follow = follow;
        for production in &bucket {
            let rhs_items = production.items[common_sequence.len()..].to_vec();
            let first = self.get_production_first_set(&rhs_items);
            self.add_production(rhs_state, rhs_items);
            self.arena[rhs_state.0].first.extend(first);
        }

        let unique = self.insert_unique_state(rhs_state);
        if unique == rhs_state {
            let mut rules_copy = expanded_rules.clone();
            self.left_factor_state(&mut rules_copy, rhs_state)?;
        }

        let mut factored = common_sequence;
        factored.push(LlItem::State(unique));
        output.push(LlProduction::new(factored));
        Ok(())
    }

    /// Substitute the head invocation of every production at the given rank, charging
    /// each substituted state against the per-walk expansion budget. Returns false when
    /// a state would be expanded a second time, which signals non-termination.
    fn reduce_ranks(
        &mut self,
        expanded_rules: &mut HashMap<LlId, u32>,
        _state: LlId,
        rank: usize,
        list: &mut Vec<LlProduction>,
    ) -> bool {
        let mut new_productions: Vec<LlProduction> = Vec::new();
        let mut new_expansions: BTreeSet<LlId> = BTreeSet::new();
        for production in list.iter() {
            if self.get_production_rank(&production.items) == rank {
                for (idx, item) in production.items.iter().enumerate() {
                    if let LlItem::State(target) = item {
                        new_expansions.insert(*target);
                        if expanded_rules.get(target).copied().unwrap_or(0) >= 1 {
                            return false;
                        }
                        for their in &self.arena[target.0].prods {
                            let mut new_items: Vec<LlItem> = Vec::new();
                            new_items.extend_from_slice(&production.items[..idx]);
                            new_items.extend(their.items.iter().copied());
                            new_items.extend_from_slice(&production.items[idx + 1..]);
                            new_productions.push(LlProduction::new(new_items));
                        }
                        break;
                    }
                }
            } else {
                new_productions.push(production.clone());
            }
        }
        *list = new_productions;
        for expansion in new_expansions {
            *expanded_rules.entry(expansion).or_insert(0) += 1;
        }
        true
    }

    /// Replace references to states that consist of a single unit production with the
    /// invoked state.
    fn eliminate_units(&mut self) {
        self.semisort();
        let mut derivable: HashMap<LlId, LlId> = HashMap::new();
        for &state in &self.list {
            if self.arena[state.0].prods.len() != 1 {
                continue;
            }
            let production = &self.arena[state.0].prods[0];
            if production.items.len() == 1 {
                if let LlItem::State(target) = production.items[0] {
                    derivable.insert(state, target);
                }
            }
        }

        for &state in self.list.clone().iter().rev() {
            for prod_idx in 0..self.arena[state.0].prods.len() {
                for item_idx in 0..self.arena[state.0].prods[prod_idx].items.len() {
                    if let LlItem::State(target) =
                        self.arena[state.0].prods[prod_idx].items[item_idx]
                    {
                        if let Some(&replacement) = derivable.get(&target) {
                            self.arena[state.0].prods[prod_idx].items[item_idx] =
                                LlItem::State(replacement);
                        }
                    }
                }
            }
        }
    }

    /// Inline every state invoked as the sole item of a production into the invoking
    /// state, dropping the forwarding productions.
    fn eliminate_singletons(&mut self) {
        self.semisort();
        let mut derivable: HashMap<LlId, BTreeSet<LlId>> = HashMap::new();
        for &state in &self.list {
            for production in &self.arena[state.0].prods {
                if production.items.len() == 1 {
                    if let LlItem::State(target) = production.items[0] {
                        derivable
                            .entry(state)
                            .or_insert_with(BTreeSet::new)
                            .insert(target);
                    }
                }
            }
        }

        for &state in self.list.clone().iter().rev() {
            self.arena[state.0].prods.retain(|production| {
                !(production.items.len() == 1
                    && matches!(production.items[0], LlItem::State(_)))
            });
            if let Some(targets) = derivable.get(&state).cloned() {
                for target in targets {
                    let their_prods: Vec<Vec<LlItem>> = self.arena[target.0]
                        .prods
                        .iter()
                        .map(|p| p.items.clone())
                        .collect();
                    for items in their_prods {
                        self.add_production(state, items);
                    }
                }
            }
        }
    }

    /// Merge states whose production structure is indistinguishable, by iterating a
    /// shape refinement over production item sequences until the partition stops
    /// growing, then retargeting every reference to one representative per shape.
    fn merge_states(&mut self) {
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        enum KeyItem {
            Shape(usize),
            Term(TermSymId),
            Action(ActionId),
        }

        let live = self.list.clone();
        let mut shapes: HashMap<LlId, usize> = HashMap::new();
        for &state in &live {
            shapes.insert(state, 0);
        }

        let construct_state_key = |arena: &Vec<LlState>,
                                   shapes: &HashMap<LlId, usize>,
                                   state: LlId|
         -> Vec<Vec<KeyItem>> {
            let mut key_list: Vec<Vec<KeyItem>> = Vec::new();
            for production in &arena[state.0].prods {
                let mut key_sublist: Vec<KeyItem> = Vec::new();
                for item in &production.items {
                    key_sublist.push(match item {
                        LlItem::State(target) => {
                            KeyItem::Shape(shapes.get(target).copied().unwrap_or(0))
                        }
                        LlItem::Term(term) => KeyItem::Term(*term),
                        LlItem::Action(action) => KeyItem::Action(*action),
                    });
                }
                key_list.push(key_sublist);
            }
            key_list.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            key_list
        };

        let mut old_len = 0;
        loop {
            let mut key_to_shape: HashMap<Vec<Vec<KeyItem>>, usize> = HashMap::new();
            let mut keys: Vec<(LlId, Vec<Vec<KeyItem>>)> = Vec::new();
            for &state in &live {
                let key = construct_state_key(&self.arena, &shapes, state);
                let next = key_to_shape.len();
                key_to_shape.entry(key.clone()).or_insert(next);
                keys.push((state, key));
            }
            for (state, key) in keys {
                shapes.insert(state, key_to_shape[&key]);
            }
            if old_len == key_to_shape.len() {
                break;
            }
            old_len = key_to_shape.len();
        }

        let mut shape_repr: HashMap<usize, LlId> = HashMap::new();
        for &state in &live {
            shape_repr.entry(shapes[&state]).or_insert(state);
        }

        for &state in &live {
            for prod_idx in 0..self.arena[state.0].prods.len() {
                for item_idx in 0..self.arena[state.0].prods[prod_idx].items.len() {
                    if let LlItem::State(target) =
                        self.arena[state.0].prods[prod_idx].items[item_idx]
                    {
                        self.arena[state.0].prods[prod_idx].items[item_idx] =
                            LlItem::State(shape_repr[&shapes[&target]]);
                    }
                }
            }
        }
    }

    /// Keep only the states reachable from the entry set, in first-visit order.
    fn filter_states(&mut self) {
        let mut visited: HashSet<LlId> = HashSet::new();
        let mut order: Vec<LlId> = Vec::new();
        let mut stack: Vec<LlId> = Vec::new();
        for (_, state) in self.entries.iter().rev() {
            stack.push(*state);
        }
        while let Some(state) = stack.pop() {
            if !visited.insert(state) {
                continue;
            }
            order.push(state);
            for production in self.arena[state.0].prods.iter().rev() {
                for item in production.items.iter().rev() {
                    if let LlItem::State(target) = item {
                        if !visited.contains(target) {
                            stack.push(*target);
                        }
                    }
                }
            }
        }
        self.list = order;
    }
}
