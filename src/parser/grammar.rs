use crate::parser::types::{TypeArena, TypeId};
use crate::project::{CodeBlock, TermId};
use crate::SrcLoc;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a terminal symbol inside the [ParserGrammar].
pub struct TermSymId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a nonterminal inside the [ParserGrammar].
pub struct NtId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a semantic action inside the [ParserGrammar] arena.
pub struct ActionId(pub usize);

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// One position of a production body.
pub enum Symbol {
    Terminal(TermSymId),
    Nonterminal(NtId),
}

/// A terminal as the parser grammar sees it. Name and value are captured at
/// construction time, after the orchestrator has assigned terminal values.
pub struct SymbolTerminal {
    pub terminal: TermId,
    pub name: String,
    pub value: i64,
}

/// A semantic action attached to a production: typed argument captures, a result type
/// and the raw source text spliced into the generated parser.
pub struct Action {
    pub loc: SrcLoc,
    pub args: Vec<(Option<String>, TypeId)>,
    pub result: TypeId,
    pub source: String,
    /// Emission index once the action survives simplification.
    pub idx: Option<usize>,
}

pub struct Production {
    pub symbols: Vec<Symbol>,
    pub action: Option<ActionId>,
}

pub struct Nonterminal {
    pub name: String,
    pub prods: Vec<Production>,
    pub exported: bool,
}

impl Nonterminal {
    pub fn add_rule(&mut self, symbols: Vec<Symbol>, action: Option<ActionId>) {
        self.prods.push(Production { symbols, action });
    }
}

/// A named action snippet from `[parser.vm_actions]`, spliced verbatim by the emitter.
pub struct VmAction {
    pub loc: SrcLoc,
    pub body_loc: SrcLoc,
    pub body: String,
}

/// The instantiated parser grammar: concrete nonterminals with their productions, the
/// action arena, exports and the user code the emitter forwards.
pub struct ParserGrammar {
    pub terminals: Vec<SymbolTerminal>,
    term_by_name: HashMap<String, TermSymId>,
    pub nonterminals: Vec<Nonterminal>,
    pub actions: Vec<Action>,
    /// Deduplicated actions in emission order.
    pub registered: Vec<ActionId>,
    pub exports: Vec<(String, NtId)>,
    pub keep: BTreeSet<NtId>,
    pub terminal_type: TypeId,
    pub eof: Option<TermSymId>,
    pub parser_header: Option<CodeBlock>,
    pub parser_source: Option<CodeBlock>,
    pub vm_args: Vec<(SrcLoc, String, String)>,
    pub vm_actions: HashMap<String, VmAction>,
}

impl ParserGrammar {
    pub fn new(types: &mut TypeArena) -> Self {
        Self {
            terminals: Vec::new(),
            term_by_name: HashMap::new(),
            nonterminals: Vec::new(),
            actions: Vec::new(),
            registered: Vec::new(),
            exports: Vec::new(),
            keep: BTreeSet::new(),
            terminal_type: types.fresh_var(Some("terminal")),
            eof: None,
            parser_header: None,
            parser_source: None,
            vm_args: Vec::new(),
            vm_actions: HashMap::new(),
        }
    }

    pub fn add_terminal(&mut self, name: String, terminal: TermId, value: i64) -> TermSymId {
        let id = TermSymId(self.terminals.len());
        self.terminals.push(SymbolTerminal {
            terminal,
            name: name.clone(),
            value,
        });
        self.term_by_name.insert(name, id);
        id
    }

    pub fn find_terminal(&self, name: &str) -> Option<TermSymId> {
        self.term_by_name.get(name).copied()
    }

    pub fn add_nonterminal(&mut self, name: String) -> NtId {
        let id = NtId(self.nonterminals.len());
        self.nonterminals.push(Nonterminal {
            name,
            prods: Vec::new(),
            exported: false,
        });
        id
    }

    pub fn add_action(
        &mut self,
        loc: SrcLoc,
        args: Vec<(Option<String>, TypeId)>,
        result: TypeId,
        source: String,
    ) -> ActionId {
        let id = ActionId(self.actions.len());
        self.actions.push(Action {
            loc,
            args,
            result,
            source,
            idx: None,
        });
        id
    }

    /// Give a surviving action its emission index.
    pub fn register_action(&mut self, action: ActionId) {
        self.actions[action.0].idx = Some(self.registered.len());
        self.registered.push(action);
    }

    pub fn terminal_name(&self, term: TermSymId) -> &str {
        &self.terminals[term.0].name
    }

    pub fn terminal_value(&self, term: TermSymId) -> i64 {
        self.terminals[term.0].value
    }
}
