//! The lexer pipeline: regular expressions are lowered to a Thompson NFA, determinized
//! over SCC closures, scrubbed for keywords, minimized, completed with an error state
//! and compressed into column-equivalence-class tables.

pub mod dfa;
pub mod minimize;
pub mod nfa;
pub mod regexp;
pub mod tables;

#[cfg(test)]
mod __tests__;

use crate::lexer::dfa::{Dfa, DfaBuilder, Keyword};
use crate::lexer::nfa::{NfaBuilder, NfaId, RuleId};
use crate::lexer::regexp::Re;
use crate::lexer::tables::{inject_error_state, LexerTables};
use crate::project::SharedGrammar;
use crate::{GenResult, GrammarError, Log, SrcLoc};
use std::collections::BTreeMap;

/// Emitter-facing options of the lexer pipeline.
#[derive(Debug)]
pub struct LexerConfig {
    pub prefix: String,
    pub namespace: String,
    pub header_path: Option<String>,
    pub source_path: Option<String>,
    /// Accept rules reachable over at most this many distinct paths are promoted to
    /// keywords. Zero disables promotion.
    pub keyword_threshold: u64,
}

impl Default for LexerConfig {
    fn default() -> Self {
        Self {
            prefix: "LL".to_string(),
            namespace: "ll".to_string(),
            header_path: None,
            source_path: None,
            keyword_threshold: 0,
        }
    }
}

/// The finished lexer side of a project.
#[derive(Debug)]
pub struct LexerOutput {
    pub dfa: Dfa,
    pub keywords: BTreeMap<RuleId, Keyword>,
    pub tables: LexerTables,
}

/// Owner of the lexer half of a grammar: fragments, rules and the NFA arena they are
/// lowered into, plus the pipeline driver.
#[derive(Debug)]
pub struct LexerGenerator {
    pub config: LexerConfig,
    nfa: NfaBuilder,
    nfa_init: NfaId,
    rules: Vec<(SrcLoc, String, Re)>,
}

impl LexerGenerator {
    pub fn new() -> Self {
        let mut nfa = NfaBuilder::new();
        let nfa_init = nfa.state();
        Self {
            config: LexerConfig::default(),
            nfa,
            nfa_init,
            rules: Vec::new(),
        }
    }

    pub fn add_fragment(&mut self, loc: SrcLoc, name: String, re: Re) -> GenResult<()> {
        self.nfa.add_fragment(loc, name, re)
    }

    pub fn add_rule(&mut self, loc: SrcLoc, name: String, re: Re) {
        self.rules.push((loc, name, re));
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Lower every declared rule into the shared NFA, verifying that each one names a
    /// known terminal. Rule order becomes accept precedence.
    pub fn construct(&mut self, shared: &SharedGrammar) -> GenResult<()> {
        let rules = std::mem::take(&mut self.rules);
        for (idx, (loc, name, re)) in rules.iter().enumerate() {
            let term = match shared.find_terminal(name) {
                Some(term) => term,
                None => {
                    return Err(GrammarError::new(
                        loc.clone(),
                        format!("terminal '{}' not found", name),
                    ))
                }
            };
            let rule = self.nfa.add_rule(idx as i64, loc.clone(), term);
            let end_state = self.nfa.state();
            self.nfa.set_accept(end_state, rule);
            re.build(&mut self.nfa, self.nfa_init, end_state)?;
        }
        self.rules = rules;
        Ok(())
    }

    /// Run the whole pipeline and produce emitter-ready tables.
    pub fn run(&mut self, shared: &SharedGrammar, log: Log) -> GenResult<LexerOutput> {
        let term_error = match shared.term_error {
            Some(term) => term,
            None => return Err(GrammarError::bare("no {error} terminal found".to_string())),
        };
        let error_loc = shared.terminal(term_error).loc.clone();
        let error_rule = self.nfa.add_rule(-1, error_loc, term_error);

        log.note("Constructing lexer");
        if log.order() >= Log::Verbose.order() {
            for (loc, name, re) in &self.rules {
                println!("rule {} at {}:", name, loc);
                re.print().ok();
            }
        }
        let builder = DfaBuilder::new(
            &self.nfa,
            error_rule,
            self.config.keyword_threshold,
            log,
        );
        let output = builder.build(self.nfa_init);
        let keywords = output.keywords;

        let mut min_dfa = minimize::minimize(&output.dfa, &self.nfa.rules);
        log.trace(&format!(
            "DFA minimized: {} -> {} states",
            output.dfa.states.len(),
            min_dfa.visit(min_dfa.initial).len()
        ));

        inject_error_state(&mut min_dfa, error_rule);

        let tables = LexerTables::build(
            &min_dfa,
            &self.nfa.rules,
            shared,
            &self.config.prefix,
            &self.config.namespace,
        );
        log.note("Lexer done");

        Ok(LexerOutput {
            dfa: min_dfa,
            keywords,
            tables,
        })
    }

    pub fn nfa(&self) -> &NfaBuilder {
        &self.nfa
    }

    pub fn nfa_initial(&self) -> NfaId {
        self.nfa_init
    }
}
