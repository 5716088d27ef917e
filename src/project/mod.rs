//! The project layer: shared terminal declarations, the grammar-description parser and
//! the orchestrator that dispatches the lexer and parser pipelines.

mod parser;

#[cfg(test)]
mod __tests__;

pub use parser::parse_project;

use crate::lexer::{LexerGenerator, LexerOutput};
use crate::parser::{ParserGenerator, ParserOutput};
use crate::source::SourceText;
use crate::{GenResult, GrammarError, Log, SrcLoc};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a terminal inside the [SharedGrammar].
pub struct TermId(pub usize);

#[derive(Debug, Clone)]
/// A lexical token kind shared between the lexer and parser pipelines.
///
/// `name` is the user-visible spelling used inside the grammar, `impl_name` the
/// identifier the emitter writes into generated code. The integer `value` is either
/// pinned by a `value = N` tag or assigned lazily from the smallest free values.
pub struct Terminal {
    pub loc: SrcLoc,
    pub name: String,
    pub impl_name: String,
    pub value: Option<i64>,
    pub skip: bool,
    pub is_error: bool,
    pub is_eof: bool,
}

#[derive(Debug, Clone)]
/// A verbatim user code section copied into the generated parser.
pub struct CodeBlock {
    pub loc: SrcLoc,
    pub contents: String,
}

/// Terminal declarations and global options visible to both pipelines.
#[derive(Debug)]
pub struct SharedGrammar {
    terminals: Vec<Terminal>,
    by_name: HashMap<String, TermId>,
    pub term_error: Option<TermId>,
    pub term_eof: Option<TermId>,
    pub base_dir: String,
}

impl SharedGrammar {
    pub fn new() -> Self {
        Self {
            terminals: Vec::new(),
            by_name: HashMap::new(),
            term_error: None,
            term_eof: None,
            base_dir: String::new(),
        }
    }

    pub fn add_terminal(
        &mut self,
        loc: SrcLoc,
        name: String,
        impl_name: String,
        tags: Vec<(String, Option<i64>)>,
    ) -> GenResult<TermId> {
        if let Some(existing) = self.by_name.get(&name) {
            return Err(GrammarError::new(
                loc,
                format!(
                    "terminal '{}' already defined at {}",
                    name,
                    self.terminals[existing.0].loc
                ),
            ));
        }
        let id = TermId(self.terminals.len());
        let mut terminal = Terminal {
            loc: loc.clone(),
            name: name.clone(),
            impl_name,
            value: None,
            skip: false,
            is_error: false,
            is_eof: false,
        };
        for (tag, tag_value) in tags {
            match tag.as_str() {
                "skip" => terminal.skip = true,
                "error" => {
                    if let Some(prev) = self.term_error {
                        return Err(GrammarError::new(
                            loc,
                            format!(
                                "error terminal {} already defined at {}",
                                self.terminals[prev.0].name, self.terminals[prev.0].loc
                            ),
                        ));
                    }
                    terminal.is_error = true;
                    self.term_error = Some(id);
                }
                "eof" => {
                    if let Some(prev) = self.term_eof {
                        return Err(GrammarError::new(
                            loc,
                            format!(
                                "eof terminal {} already defined at {}",
                                self.terminals[prev.0].name, self.terminals[prev.0].loc
                            ),
                        ));
                    }
                    terminal.is_eof = true;
                    self.term_eof = Some(id);
                }
                "value" => match tag_value {
                    Some(value) => terminal.value = Some(value),
                    None => {
                        return Err(GrammarError::new(loc, "value tag needs a number".to_string()))
                    }
                },
                _ => return Err(GrammarError::new(loc, format!("invalid tag {}", tag))),
            }
        }
        self.by_name.insert(name, id);
        self.terminals.push(terminal);
        Ok(id)
    }

    pub fn find_terminal(&self, name: &str) -> Option<TermId> {
        self.by_name.get(name).copied()
    }

    pub fn terminal(&self, id: TermId) -> &Terminal {
        &self.terminals[id.0]
    }

    pub fn terminals(&self) -> impl Iterator<Item = &Terminal> {
        self.terminals.iter()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Fill the unassigned terminal values with the smallest non-negative integers not
    /// taken by an explicit `value = N` tag, in declaration order.
    fn assign_terminal_values(&mut self) {
        let taken: BTreeSet<i64> = self
            .terminals
            .iter()
            .filter_map(|terminal| terminal.value)
            .collect();
        let mut idx: i64 = 0;
        for terminal in self.terminals.iter_mut() {
            if terminal.value.is_none() {
                while taken.contains(&idx) {
                    idx += 1;
                }
                terminal.value = Some(idx);
                idx += 1;
            }
        }
    }
}

/// Sole owner of all generator state for one grammar file.
///
/// The lifecycle is `parse` (load the description), [process](Project::process)
/// (assign terminal values and lower both grammars), then
/// [build_lexer](Project::build_lexer) and [build_parser](Project::build_parser) as
/// requested by the caller.
#[derive(Debug)]
pub struct Project {
    pub shared: SharedGrammar,
    pub lexer: LexerGenerator,
    pub parser: ParserGenerator,
    pub log: Log,
}

impl Project {
    pub fn new() -> Self {
        Self {
            shared: SharedGrammar::new(),
            lexer: LexerGenerator::new(),
            parser: ParserGenerator::new(),
            log: Log::None,
        }
    }

    pub fn parse(source: &SourceText) -> GenResult<Project> {
        parse_project(source)
    }

    /// Assign terminal values and lower both grammar halves into their pipelines'
    /// working form. Must run before either `build_*` call.
    pub fn process(&mut self) -> GenResult<()> {
        self.shared.assign_terminal_values();
        self.lexer.construct(&self.shared)?;
        self.parser.construct(&self.shared)?;
        Ok(())
    }

    pub fn build_lexer(&mut self) -> GenResult<LexerOutput> {
        self.lexer.run(&self.shared, self.log)
    }

    pub fn build_parser(&mut self) -> GenResult<ParserOutput> {
        self.parser.run(self.log)
    }
}
