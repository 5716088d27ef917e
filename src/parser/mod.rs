//! The parser pipeline: template nonterminals are instantiated into a concrete grammar,
//! action types are solved by unification, the grammar is refactored into LL(1) shape
//! and lowered into a token-dispatched table with recovery costs.

pub mod grammar;
pub mod lhtable;
pub mod ll;
pub mod recovery;
pub mod template;
pub mod types;

#[cfg(test)]
mod __tests__;

use crate::parser::grammar::{ActionId, NtId, ParserGrammar, Symbol, VmAction};
use crate::parser::lhtable::{LhTable, LhTableBuilder};
use crate::parser::template::{
    TemplateAction, TemplateExpr, TemplateRule, TemplateSet, TemplateSymbol, TmplId,
    TypeConstraint,
};
use crate::parser::types::{TypeArena, TypeId};
use crate::project::{CodeBlock, SharedGrammar};
use crate::{GenResult, GrammarError, Log, SrcLoc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static CAPTURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([a-zA-Z_0-9]+)").expect("capture pattern"));
static SIMPLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("name pattern"));

/// Safety valve for runaway template recursion such as `T[n]: T[n + 1]`.
const INSTANCE_BUDGET: usize = 65536;

/// Emitter-facing options of the parser pipeline.
#[derive(Debug)]
pub struct ParserConfig {
    pub prefix: String,
    pub namespace: String,
    pub header_path: Option<String>,
    pub source_path: Option<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            prefix: "PP".to_string(),
            namespace: "pp".to_string(),
            header_path: None,
            source_path: None,
        }
    }
}

/// One raw rule from `[parser.grammar]`, before template resolution.
#[derive(Debug)]
pub struct ParserRule {
    pub loc: SrcLoc,
    pub name: String,
    pub param_names: Vec<String>,
    pub condition: Option<TemplateExpr>,
    pub symbols: Vec<TemplateSymbol>,
    pub action: Option<TemplateAction>,
}

/// The finished parser side of a project.
pub struct ParserOutput {
    pub table: LhTable,
}

/// Owner of the parser half of a grammar and driver of its pipeline.
#[derive(Debug)]
pub struct ParserGenerator {
    pub config: ParserConfig,
    pub types: TypeArena,
    pub grammar: ParserGrammar,
    pub templates: TemplateSet,
    parser_rules: Vec<ParserRule>,
    type_decls: Vec<(SrcLoc, String, String)>,
    type_values: HashMap<String, TypeId>,
    exposed: Vec<(SrcLoc, String)>,
    instance_count: usize,
}

impl ParserGenerator {
    pub fn new() -> Self {
        let mut types = TypeArena::new();
        let grammar = ParserGrammar::new(&mut types);
        Self {
            config: ParserConfig::default(),
            types,
            grammar,
            templates: TemplateSet::new(),
            parser_rules: Vec::new(),
            type_decls: Vec::new(),
            type_values: HashMap::new(),
            exposed: Vec::new(),
            instance_count: 0,
        }
    }

    pub fn add_rule(&mut self, rule: ParserRule) {
        self.parser_rules.push(rule);
    }

    pub fn add_type(&mut self, loc: SrcLoc, name: String, type_name: String) {
        self.type_decls.push((loc, name, type_name));
    }

    pub fn add_vm_arg(&mut self, loc: SrcLoc, name: String, type_name: String) {
        self.grammar.vm_args.push((loc, name, type_name));
    }

    pub fn add_expose(&mut self, loc: SrcLoc, name: String) {
        self.exposed.push((loc, name));
    }

    pub fn register_vm_action(
        &mut self,
        loc: SrcLoc,
        name: String,
        body_loc: SrcLoc,
        body: String,
    ) -> GenResult<()> {
        if let Some(existing) = self.grammar.vm_actions.get(&name) {
            return Err(GrammarError::new(
                loc,
                format!("{} vm action already defined at {}", name, existing.loc),
            ));
        }
        self.grammar.vm_actions.insert(
            name,
            VmAction {
                loc,
                body_loc,
                body,
            },
        );
        Ok(())
    }

    pub fn set_parser_header(&mut self, loc: SrcLoc, contents: String) -> GenResult<()> {
        if let Some(existing) = &self.grammar.parser_header {
            return Err(GrammarError::new(
                loc,
                format!("parser.header block already defined at {}", existing.loc),
            ));
        }
        self.grammar.parser_header = Some(CodeBlock { loc, contents });
        Ok(())
    }

    pub fn set_parser_source(&mut self, loc: SrcLoc, contents: String) -> GenResult<()> {
        if let Some(existing) = &self.grammar.parser_source {
            return Err(GrammarError::new(
                loc,
                format!("parser.source block already defined at {}", existing.loc),
            ));
        }
        self.grammar.parser_source = Some(CodeBlock { loc, contents });
        Ok(())
    }

    /// Lower the raw rules into templates, resolve declared types, instantiate every
    /// exported nonterminal, solve the type constraints and simplify actions.
    pub fn construct(&mut self, shared: &SharedGrammar) -> GenResult<()> {
        self.construct_terminals(shared)?;
        self.construct_nonterminals(shared)?;
        self.apply_types()?;
        self.populate_parser()?;
        self.typecheck_parser()?;
        self.simplify_actions();
        Ok(())
    }

    fn construct_terminals(&mut self, shared: &SharedGrammar) -> GenResult<()> {
        for (index, terminal) in shared.terminals().enumerate() {
            self.grammar.add_terminal(
                terminal.name.clone(),
                crate::project::TermId(index),
                terminal.value.unwrap_or(0),
            );
        }
        let eof = match shared.term_eof {
            Some(eof) => eof,
            None => {
                return Err(GrammarError::bare(
                    "no terminal designated for {eof}".to_string(),
                ))
            }
        };
        self.grammar.eof = self.grammar.find_terminal(&shared.terminal(eof).name);
        Ok(())
    }

    fn get_template(
        &mut self,
        shared: &SharedGrammar,
        loc: &SrcLoc,
        name: &str,
        param_count: usize,
    ) -> GenResult<TmplId> {
        if let Some(term) = self.grammar.find_terminal(name) {
            let term_loc = &shared.terminal(self.grammar.terminals[term.0].terminal).loc;
            return Err(GrammarError::new(
                loc.clone(),
                format!(
                    "name '{}' is already assigned to a terminal at {}",
                    name, term_loc
                ),
            ));
        }
        match self.templates.find_template(name) {
            Some(tmpl) => Ok(tmpl),
            None => {
                let ty = self.types.fresh_var(Some(name));
                Ok(self
                    .templates
                    .add_template(loc.clone(), name.to_string(), param_count, ty))
            }
        }
    }

    fn construct_nonterminals(&mut self, shared: &SharedGrammar) -> GenResult<()> {
        let rules = std::mem::take(&mut self.parser_rules);
        for rule in &rules {
            let tmpl = self.get_template(shared, &rule.loc, &rule.name, rule.param_names.len())?;
            if self.templates.templates[tmpl.0].param_count != rule.param_names.len() {
                return Err(GrammarError::new(
                    rule.loc.clone(),
                    format!(
                        "nonterminal '{}' has conflicting definitions, first definition at {}",
                        rule.name, self.templates.templates[tmpl.0].loc
                    ),
                ));
            }

            let mut forced: Vec<(String, SrcLoc)> = Vec::new();
            let mut unforced: HashMap<String, u32> = HashMap::new();
            let mut implicit: HashSet<String> = HashSet::new();
            let mut used: HashSet<String> = HashSet::new();
            for symbol in &rule.symbols {
                if let Some(capture) = &symbol.capture {
                    if let Some((_, prev)) = forced.iter().find(|(name, _)| name == capture) {
                        return Err(GrammarError::new(
                            symbol.loc.clone(),
                            format!("capture '{}' already made at {}", capture, prev),
                        ));
                    }
                    forced.push((capture.clone(), symbol.loc.clone()));
                    *unforced.entry(symbol.name.clone()).or_insert(0) += 1;
                } else if SIMPLE_NAME_RE.is_match(&symbol.name) {
                    *unforced.entry(symbol.name.clone()).or_insert(0) += 1;
                }
            }
            if let Some(action) = &rule.action {
                for group in CAPTURE_RE.captures_iter(&action.text) {
                    let capture = group.get(1).unwrap().as_str();
                    if forced.iter().any(|(name, _)| name == capture) {
                        used.insert(capture.to_string());
                    } else if let Some(&count) = unforced.get(capture) {
                        if count > 1 {
                            return Err(GrammarError::new(
                                action.loc.clone(),
                                format!("ambiguous capture '${}'", capture),
                            ));
                        }
                        implicit.insert(capture.to_string());
                    } else {
                        return Err(GrammarError::new(
                            action.loc.clone(),
                            format!("undefined capture '${}'", capture),
                        ));
                    }
                }
            }
            for (capture, capture_loc) in &forced {
                if !used.contains(capture) {
                    return Err(GrammarError::new(
                        capture_loc.clone(),
                        format!("capture '${}' is not used", capture),
                    ));
                }
            }

            let mut new_symbols: Vec<TemplateSymbol> = Vec::new();
            for symbol in &rule.symbols {
                let capture = match &symbol.capture {
                    Some(capture) => Some(capture.clone()),
                    None if implicit.contains(&symbol.name) => Some(symbol.name.clone()),
                    None => None,
                };
                new_symbols.push(TemplateSymbol {
                    loc: symbol.loc.clone(),
                    name: symbol.name.clone(),
                    params: symbol.params.clone(),
                    capture,
                });
            }
            self.templates.templates[tmpl.0].rules.push(TemplateRule {
                loc: rule.loc.clone(),
                param_names: rule.param_names.clone(),
                condition: rule.condition.clone(),
                symbols: new_symbols,
                action: rule.action.clone(),
            });
        }
        self.parser_rules = rules;
        Ok(())
    }

    fn get_type(&mut self, name: &str) -> TypeId {
        if name.is_empty() {
            return self.types.void();
        }
        if let Some(&ty) = self.type_values.get(name) {
            return ty;
        }
        let ty = self.types.constant(name.to_string());
        self.type_values.insert(name.to_string(), ty);
        ty
    }

    fn apply_types(&mut self) -> GenResult<()> {
        let decls = std::mem::take(&mut self.type_decls);
        let mut type_locs: HashMap<String, SrcLoc> = HashMap::new();
        for (loc, name, type_name) in &decls {
            let ty = self.get_type(type_name);
            if let Some(prev) = type_locs.get(name) {
                return Err(GrammarError::new(
                    loc.clone(),
                    format!("'{}' type already assigned at {}", name, prev),
                ));
            }
            if name == "terminal" {
                let terminal_type = self.grammar.terminal_type;
                self.types.unify(loc, terminal_type, ty)?;
            } else {
                match self.templates.find_template(name) {
                    Some(tmpl) => {
                        let tmpl_ty = self.templates.templates[tmpl.0].ty;
                        self.types.unify(loc, tmpl_ty, ty)?;
                    }
                    None => {
                        return Err(GrammarError::new(
                            loc.clone(),
                            format!("nonterminal '{}' not found", name),
                        ))
                    }
                }
            }
            type_locs.insert(name.clone(), loc.clone());
        }
        self.type_decls = decls;
        Ok(())
    }

    fn populate_parser(&mut self) -> GenResult<()> {
        let exposed = std::mem::take(&mut self.exposed);
        for (loc, name) in &exposed {
            let tmpl = match self.templates.find_template(name) {
                Some(tmpl) => tmpl,
                None => {
                    return Err(GrammarError::new(
                        loc.clone(),
                        format!("nonterminal '{}' not found", name),
                    ))
                }
            };
            let instance = self.instantiate(loc, tmpl, Vec::new())?;
            let export = self.grammar.add_nonterminal(name.clone());
            self.grammar.nonterminals[export.0].exported = true;
            self.grammar.nonterminals[export.0]
                .add_rule(vec![Symbol::Nonterminal(instance)], None);
            self.grammar.exports.push((name.clone(), export));
            self.grammar.keep.insert(export);
        }
        self.exposed = exposed;
        Ok(())
    }

    /// The concrete nonterminal for `template[values]`, creating and populating it on
    /// first use. Registration happens before the rules are expanded so that recursive
    /// references resolve to the instance being built.
    fn instantiate(&mut self, loc: &SrcLoc, tmpl: TmplId, values: Vec<i64>) -> GenResult<NtId> {
        if let Some(&instance) = self.templates.templates[tmpl.0].instances.get(&values) {
            return Ok(instance);
        }
        let param_count = self.templates.templates[tmpl.0].param_count;
        if values.len() != param_count {
            return Err(GrammarError::new(
                loc.clone(),
                format!(
                    "mismatch number of template arguments for {}: got {}, expected {}",
                    self.templates.templates[tmpl.0].name,
                    values.len(),
                    param_count
                ),
            ));
        }

        let mut name = self.templates.templates[tmpl.0].name.clone();
        if !values.is_empty() {
            let args: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            name = format!("{}[{}]", name, args.join(","));
        }
        let nt = self.grammar.add_nonterminal(name);
        self.templates.templates[tmpl.0]
            .instances
            .insert(values.clone(), nt);
        self.instance_count += 1;
        if self.instance_count > INSTANCE_BUDGET {
            return Err(GrammarError::new(
                loc.clone(),
                format!(
                    "template instantiation limit exceeded while expanding '{}'",
                    self.templates.templates[tmpl.0].name
                ),
            ));
        }

        let parent_ty = self.templates.templates[tmpl.0].ty;
        let rules = self.templates.templates[tmpl.0].rules.clone();
        for rule in &rules {
            if let Some((symbols, action)) = self.instantiate_rule(rule, nt, parent_ty, &values)? {
                self.grammar.nonterminals[nt.0].add_rule(symbols, action);
            }
        }
        Ok(nt)
    }

    fn instantiate_rule(
        &mut self,
        rule: &TemplateRule,
        nt: NtId,
        parent_ty: TypeId,
        values: &[i64],
    ) -> GenResult<Option<(Vec<Symbol>, Option<ActionId>)>> {
        let mut vars: HashMap<String, i64> = HashMap::new();
        for (name, value) in rule.param_names.iter().zip(values.iter()) {
            vars.insert(name.clone(), *value);
        }
        if let Some(condition) = &rule.condition {
            if condition.eval(&vars)? == 0 {
                return Ok(None);
            }
        }

        let mut type_stack: Vec<(Option<String>, TypeId)> = Vec::new();
        let mut symbols: Vec<Symbol> = Vec::new();
        for symbol in &rule.symbols {
            self.instantiate_symbol(symbol, &vars, &mut type_stack, &mut symbols)?;
        }

        let mut action_id = None;
        if let Some(action) = &rule.action {
            action_id = Some(self.instantiate_action(action, &mut type_stack)?);
        }

        self.templates.constraints.push(TypeConstraint {
            loc: rule.loc.clone(),
            nt,
            ty: parent_ty,
            params: type_stack,
        });
        Ok(Some((symbols, action_id)))
    }

    fn instantiate_symbol(
        &mut self,
        symbol: &TemplateSymbol,
        vars: &HashMap<String, i64>,
        type_stack: &mut Vec<(Option<String>, TypeId)>,
        symbols: &mut Vec<Symbol>,
    ) -> GenResult<()> {
        if let Some(tmpl) = self.templates.find_template(&symbol.name) {
            let mut vals: Vec<i64> = Vec::new();
            if let Some(params) = &symbol.params {
                for expr in params {
                    vals.push(expr.eval(vars)?);
                }
            }
            let instance = self.instantiate(&symbol.loc, tmpl, vals)?;
            symbols.push(Symbol::Nonterminal(instance));
            type_stack.push((symbol.capture.clone(), self.templates.templates[tmpl.0].ty));
        } else {
            let terminal = match self.grammar.find_terminal(&symbol.name) {
                Some(terminal) => terminal,
                None => {
                    return Err(GrammarError::new(
                        symbol.loc.clone(),
                        format!("unresolved name '{}'", symbol.name),
                    ))
                }
            };
            if symbol.params.is_some() {
                return Err(GrammarError::new(
                    symbol.loc.clone(),
                    format!(
                        "terminal '{}' doesn't expect template arguments",
                        symbol.name
                    ),
                ));
            }
            symbols.push(Symbol::Terminal(terminal));
            type_stack.push((symbol.capture.clone(), self.grammar.terminal_type));
        }
        Ok(())
    }

    fn instantiate_action(
        &mut self,
        action: &TemplateAction,
        type_stack: &mut Vec<(Option<String>, TypeId)>,
    ) -> GenResult<ActionId> {
        let trimmed = action.text.trim().to_string();
        let result = self.types.fresh_var(None);
        let action_id = self.grammar.add_action(
            action.loc.clone(),
            type_stack.clone(),
            result,
            action.text.clone(),
        );

        let mut param_names: HashSet<String> = HashSet::new();
        for (name, ty) in type_stack.iter() {
            if let Some(name) = name {
                param_names.insert(name.clone());
                if trimmed == format!("${}", name) {
                    self.types.unify(&action.loc, result, *ty)?;
                }
            }
        }
        for group in CAPTURE_RE.captures_iter(&trimmed) {
            let capture = group.get(1).unwrap().as_str();
            if !param_names.contains(capture) {
                return Err(GrammarError::new(
                    action.loc.clone(),
                    format!("unresolved reference '{}'", capture),
                ));
            }
        }

        type_stack.clear();
        type_stack.push((None, result));
        Ok(action_id)
    }

    /// Fixed-point constraint solving: a constraint is consumed once its non-void
    /// argument list has shrunk to zero entries (the instance produces nothing) or one
    /// (the instance passes that value through).
    fn typecheck_parser(&mut self) -> GenResult<()> {
        loop {
            let mut progress = false;
            let constraints = std::mem::take(&mut self.templates.constraints);
            let mut remaining: Vec<TypeConstraint> = Vec::new();
            for constraint in constraints {
                let nonnull: Vec<TypeId> = constraint
                    .params
                    .iter()
                    .map(|(_, ty)| *ty)
                    .filter(|ty| !self.types.is_void(*ty))
                    .collect();
                let consumed = match nonnull.len() {
                    0 => {
                        let void = self.types.void();
                        self.types.unify(&constraint.loc, constraint.ty, void)?;
                        true
                    }
                    1 => {
                        self.types.unify(&constraint.loc, constraint.ty, nonnull[0])?;
                        true
                    }
                    _ => false,
                };
                if consumed {
                    progress = true;
                } else {
                    remaining.push(constraint);
                }
            }
            self.templates.constraints = remaining;
            if !progress {
                break;
            }
        }
        for template in &self.templates.templates {
            if self.types.is_variable(template.ty) {
                return Err(GrammarError::new(
                    template.loc.clone(),
                    format!("cannot infer type for '{}'", template.name),
                ));
            }
        }
        Ok(())
    }

    /// Drop identity and null actions, then deduplicate the survivors by content and
    /// assign their emission indices.
    fn simplify_actions(&mut self) {
        let mut action_reprs: HashMap<(TypeId, Vec<(Option<String>, TypeId)>, String), ActionId> =
            HashMap::new();

        for nt in 0..self.grammar.nonterminals.len() {
            for prod in 0..self.grammar.nonterminals[nt].prods.len() {
                let action_id = match self.grammar.nonterminals[nt].prods[prod].action {
                    Some(action_id) => action_id,
                    None => continue,
                };
                let simplified = self.simplify_action(&mut action_reprs, action_id);
                self.grammar.nonterminals[nt].prods[prod].action = simplified;
            }
        }
    }

    fn simplify_action(
        &mut self,
        action_reprs: &mut HashMap<(TypeId, Vec<(Option<String>, TypeId)>, String), ActionId>,
        action_id: ActionId,
    ) -> Option<ActionId> {
        let result = self.types.repr(self.grammar.actions[action_id.0].result);
        self.grammar.actions[action_id.0].result = result;
        let args: Vec<(Option<String>, TypeId)> = self.grammar.actions[action_id.0]
            .args
            .iter()
            .map(|(name, ty)| (name.clone(), self.types.repr(*ty)))
            .collect();
        self.grammar.actions[action_id.0].args = args.clone();

        let mut nonnulls: Vec<(Option<String>, TypeId)> = Vec::new();
        let mut captures: HashSet<String> = HashSet::new();
        for (name, ty) in &args {
            if !self.types.is_void(*ty) {
                nonnulls.push((name.clone(), *ty));
                if let Some(name) = name {
                    captures.insert(format!("${}", name));
                }
            }
        }

        let trimmed = self.grammar.actions[action_id.0].source.trim().to_string();

        if nonnulls.len() == 1 {
            if let Some(name) = &nonnulls[0].0 {
                if trimmed == format!("${}", name) {
                    return None;
                }
            }
        }
        if nonnulls.is_empty() && (trimmed.is_empty() || captures.contains(&trimmed)) {
            return None;
        }

        let key = (
            result,
            args,
            self.grammar.actions[action_id.0].source.clone(),
        );
        if let Some(&existing) = action_reprs.get(&key) {
            return Some(existing);
        }
        action_reprs.insert(key, action_id);
        self.grammar.register_action(action_id);
        Some(action_id)
    }

    /// Run the refactoring and table pipeline over the constructed grammar.
    pub fn run(&mut self, log: Log) -> GenResult<ParserOutput> {
        log.note("Constructing parser");
        let mut table = LhTableBuilder::new(&self.grammar, log).build()?;
        log.note("Computing recovery");
        recovery::compute(&mut table);
        log.note("Parser done");
        Ok(ParserOutput { table })
    }
}
