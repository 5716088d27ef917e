use crate::lexer::regexp::{ByteSet, Re};
use crate::project::TermId;
use crate::{GenResult, GrammarError, SrcLoc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a state inside the [NfaBuilder] arena.
pub struct NfaId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of an accept rule inside the [NfaBuilder] arena.
pub struct RuleId(pub usize);

#[derive(Debug, Clone)]
/// One lexer rule as seen by the automata passes: its declaration order decides accept
/// precedence when several rules match the same string.
pub struct NfaRule {
    pub order: i64,
    pub loc: SrcLoc,
    pub terminal: TermId,
}

/// A Thompson NFA state: epsilon edges, byte-set edges and an optional accept rule.
#[derive(Debug)]
pub struct NfaState {
    pub etrans: Vec<NfaId>,
    pub trans: Vec<(ByteSet, NfaId)>,
    pub rule: Option<RuleId>,
}

#[derive(Debug)]
enum FragmentBody {
    Pending(Re),
    Building,
    Ready(NfaId, NfaId),
}

#[derive(Debug)]
struct Fragment {
    loc: SrcLoc,
    body: FragmentBody,
}

/// Arena holding the single NFA graph built for a lexer, together with its accept rules
/// and the named fragments lexer rules may splice in.
///
/// Fragments are lowered lazily on first use and their subgraph is cached; every later
/// use receives a deep copy so that the uses stay independent. A fragment that refers to
/// itself while it is being lowered is rejected.
#[derive(Debug)]
pub struct NfaBuilder {
    pub states: Vec<NfaState>,
    pub rules: Vec<NfaRule>,
    fragments: HashMap<String, Fragment>,
}

impl NfaBuilder {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            rules: Vec::new(),
            fragments: HashMap::new(),
        }
    }

    pub fn state(&mut self) -> NfaId {
        let id = NfaId(self.states.len());
        self.states.push(NfaState {
            etrans: Vec::new(),
            trans: Vec::new(),
            rule: None,
        });
        id
    }

    pub fn add_etrans(&mut self, from: NfaId, to: NfaId) {
        self.states[from.0].etrans.push(to);
    }

    pub fn add_trans(&mut self, from: NfaId, chars: ByteSet, to: NfaId) {
        self.states[from.0].trans.push((chars, to));
    }

    pub fn add_rule(&mut self, order: i64, loc: SrcLoc, terminal: TermId) -> RuleId {
        let id = RuleId(self.rules.len());
        self.rules.push(NfaRule {
            order,
            loc,
            terminal,
        });
        id
    }

    pub fn set_accept(&mut self, state: NfaId, rule: RuleId) {
        self.states[state.0].rule = Some(rule);
    }

    pub fn add_fragment(&mut self, loc: SrcLoc, name: String, re: Re) -> GenResult<()> {
        if let Some(existing) = self.fragments.get(&name) {
            return Err(GrammarError::new(
                loc,
                format!(
                    "duplicate fragment '{}', previous definition at {}",
                    name, existing.loc
                ),
            ));
        }
        self.fragments.insert(
            name,
            Fragment {
                loc,
                body: FragmentBody::Pending(re),
            },
        );
        Ok(())
    }

    /// The cached `(begin, end)` pair of a fragment, lowering it first if necessary.
    pub fn fragment_nfa(&mut self, loc: &SrcLoc, name: &str) -> GenResult<(NfaId, NfaId)> {
        let body = match self.fragments.get_mut(name) {
            None => {
                return Err(GrammarError::new(
                    loc.clone(),
                    format!("fragment '{}' not found", name),
                ))
            }
            Some(fragment) => {
                std::mem::replace(&mut fragment.body, FragmentBody::Building)
            }
        };
        match body {
            FragmentBody::Ready(begin, end) => {
                self.fragments.get_mut(name).unwrap().body = FragmentBody::Ready(begin, end);
                Ok((begin, end))
            }
            FragmentBody::Building => Err(GrammarError::new(
                loc.clone(),
                format!("fragment '{}' refers to itself", name),
            )),
            FragmentBody::Pending(re) => {
                let begin = self.state();
                let end = self.state();
                re.build(self, begin, end)?;
                self.fragments.get_mut(name).unwrap().body = FragmentBody::Ready(begin, end);
                Ok((begin, end))
            }
        }
    }

    /// Deep-copy the subgraph reachable from `begin`, returning the copies of `begin`
    /// and `end`. An `end` unreachable from `begin` maps to a fresh isolated state.
    pub fn clone_part(&mut self, begin: NfaId, end: NfaId) -> (NfaId, NfaId) {
        let mut remap: HashMap<NfaId, NfaId> = HashMap::new();
        let mut worklist: Vec<NfaId> = vec![begin];
        remap.insert(begin, self.state());

        while let Some(source) = worklist.pop() {
            let targets: Vec<NfaId> = self.states[source.0]
                .etrans
                .iter()
                .copied()
                .chain(self.states[source.0].trans.iter().map(|(_, t)| *t))
                .collect();
            for target in targets {
                if !remap.contains_key(&target) {
                    let copy = self.state();
                    remap.insert(target, copy);
                    worklist.push(target);
                }
            }
        }

        for (source, copy) in remap.clone() {
            let etrans: Vec<NfaId> = self.states[source.0]
                .etrans
                .iter()
                .map(|t| remap[t])
                .collect();
            let trans: Vec<(ByteSet, NfaId)> = self.states[source.0]
                .trans
                .iter()
                .map(|(chars, t)| (*chars, remap[t]))
                .collect();
            self.states[copy.0].etrans = etrans;
            self.states[copy.0].trans = trans;
        }

        let end_copy = match remap.get(&end) {
            Some(copy) => *copy,
            None => self.state(),
        };
        (remap[&begin], end_copy)
    }

    /// All states reachable from `from` over epsilon and byte edges, in first-visit
    /// depth-first order.
    pub fn reachable(&self, from: NfaId) -> Vec<NfaId> {
        let mut visited: Vec<bool> = vec![false; self.states.len()];
        let mut order: Vec<NfaId> = Vec::new();
        let mut stack: Vec<NfaId> = vec![from];
        while let Some(state) = stack.pop() {
            if visited[state.0] {
                continue;
            }
            visited[state.0] = true;
            order.push(state);
            let node = &self.states[state.0];
            for target in node
                .trans
                .iter()
                .map(|(_, t)| *t)
                .rev()
                .chain(node.etrans.iter().copied().rev())
            {
                if !visited[target.0] {
                    stack.push(target);
                }
            }
        }
        order
    }
}
