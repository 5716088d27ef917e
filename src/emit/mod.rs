//! The code emitter: assembles the parser-side emission tables and writes both table
//! sets out as C-style source. The table *contents* are the contract with the runtime
//! skeleton; the textual shape is kept deliberately plain.

mod printer;

pub use printer::CodePrinter;

use crate::lexer::tables::LexerTables;
use crate::parser::grammar::{ParserGrammar, TermSymId};
use crate::parser::lhtable::{LhId, LhTable, MegaId, MegaNode, SkipNode, Transition};
use crate::parser::types::TypeArena;
use crate::project::CodeBlock;
use crate::util::chunked;
use crate::SrcLoc;
use std::collections::HashMap;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// One step of an emitted megaaction.
pub enum EmitNode {
    Shift,
    /// Index into [ParserTables::actions].
    Action(usize),
}

#[derive(Debug, Clone)]
/// A registered semantic action, resolved for emission.
pub struct EmitAction {
    pub loc: SrcLoc,
    pub source: String,
    pub result: String,
    pub args: Vec<(Option<String>, String)>,
}

#[derive(Debug, Clone)]
/// One dispatch entry: consume flag, stack depth minus one, megaaction id and up to
/// four pushed states in pop order.
pub struct EntryData {
    pub shift: bool,
    pub depth: i64,
    pub action: u32,
    pub states: [u32; 4],
}

/// The parser-side tables handed to the code emitter, assembled from a finished
/// [LhTable].
pub struct ParserTables {
    pub prefix: String,
    pub namespace: String,
    pub state_count: usize,
    pub token_count: usize,
    pub base: Vec<u32>,
    /// Per-state rows of per-token-value transition offsets (255 = no dispatch), plus
    /// one all-255 sentinel row.
    pub dispatch: Vec<Vec<u32>>,
    pub table: Vec<u32>,
    pub entries: Vec<EntryData>,
    pub entry_states: Vec<(String, u32)>,
    pub megaactions: Vec<Vec<EmitNode>>,
    pub actions: Vec<EmitAction>,
    pub action_panic_skip: u32,
    pub action_panic_insert: u32,
    pub action_lec_insert: u32,
    pub action_lec_remove: u32,
    pub action_lec_replace: u32,
    pub action_sentinel: u32,
    /// Per-token-value rows of per-state sync entry offsets (255 = none).
    pub sync_dispatch: Vec<Vec<u32>>,
    pub sync_base: Vec<u32>,
    pub sync_entries: Vec<(u32, u32)>,
    pub sync_actions: Vec<i64>,
    pub sync_states: Vec<u32>,
    pub sync_skip_cost: Vec<u64>,
    pub sync_skip_ref: Vec<u32>,
    pub token_skip_cost: Vec<u32>,
    pub token_insert_cost: Vec<u32>,
    pub token_sync_cost: Vec<u32>,
    pub terminal_type: String,
    pub vm_args: Vec<(String, String)>,
    pub vm_actions: HashMap<String, (SrcLoc, String)>,
    pub parser_header: Option<CodeBlock>,
    pub parser_source: Option<CodeBlock>,
}

struct ParserTablesBuilder<'a> {
    grammar: &'a ParserGrammar,
    table: &'a LhTable,
    state_index: HashMap<LhId, u32>,
    action_to_index: HashMap<MegaId, u32>,
    megaactions: Vec<MegaId>,
    table_data: Vec<u32>,
    entry_map: HashMap<Transition, u32>,
    entry_data: Vec<Transition>,
    sync_entries: Vec<(u32, u32)>,
    sync_actions: Vec<i64>,
    sync_states: Vec<u32>,
    actions_ref: HashMap<Vec<(i64, i64)>, u32>,
    states_ref: HashMap<Vec<LhId>, u32>,
}

impl ParserTables {
    pub fn build(
        grammar: &ParserGrammar,
        types: &TypeArena,
        table: &LhTable,
        prefix: &str,
        namespace: &str,
    ) -> ParserTables {
        let mut state_index: HashMap<LhId, u32> = HashMap::new();
        for (position, &state) in table.list.iter().enumerate() {
            state_index.insert(state, position as u32);
        }

        let mut builder = ParserTablesBuilder {
            grammar,
            table,
            state_index,
            action_to_index: HashMap::new(),
            megaactions: Vec::new(),
            table_data: Vec::new(),
            entry_map: HashMap::new(),
            entry_data: Vec::new(),
            sync_entries: Vec::new(),
            sync_actions: Vec::new(),
            sync_states: Vec::new(),
            actions_ref: HashMap::new(),
            states_ref: HashMap::new(),
        };
        builder.run(types, prefix, namespace)
    }
}

impl<'a> ParserTablesBuilder<'a> {
    fn run(&mut self, types: &TypeArena, prefix: &str, namespace: &str) -> ParserTables {
        // Token axis: one column per terminal value, gaps included.
        let max_value = self
            .grammar
            .terminals
            .iter()
            .map(|terminal| terminal.value)
            .max()
            .unwrap_or(0);
        let token_count = (max_value + 1) as usize;
        let mut all_terminals: Vec<Option<TermSymId>> = vec![None; token_count];
        for (index, terminal) in self.grammar.terminals.iter().enumerate() {
            all_terminals[terminal.value as usize] = Some(TermSymId(index));
        }

        self.visit_action(self.table.null_action);

        // Per-state transition rows, sharing entries between states by content.
        let mut base: Vec<u32> = Vec::new();
        let mut row_maps: Vec<HashMap<Transition, u32>> = Vec::new();
        for &state in &self.table.list {
            base.push(self.table_data.len() as u32);
            let mut row_map: HashMap<Transition, u32> = HashMap::new();
            let mut ordered: Vec<(Option<i64>, Transition)> = Vec::new();
            if let Some(transition) = &self.table.state(state).etransition {
                ordered.push((None, transition.clone()));
            }
            let mut by_value: Vec<(i64, Transition)> = self
                .table
                .state(state)
                .transitions
                .iter()
                .map(|(term, transition)| {
                    (self.grammar.terminal_value(*term), transition.clone())
                })
                .collect();
            by_value.sort_by_key(|(value, _)| *value);
            ordered.extend(by_value.into_iter().map(|(value, t)| (Some(value), t)));

            for (_, transition) in ordered {
                if !row_map.contains_key(&transition) {
                    let offset = row_map.len() as u32;
                    row_map.insert(transition.clone(), offset);
                    let entry = self.get_transition_index(&transition);
                    self.table_data.push(entry);
                }
                self.visit_action(transition.action);
            }
            row_maps.push(row_map);
        }

        // Dispatch rows plus the trailing sentinel row.
        let mut dispatch: Vec<Vec<u32>> = Vec::new();
        for (position, &state) in self.table.list.iter().enumerate() {
            let row_map = &row_maps[position];
            let mut row: Vec<u32> = Vec::with_capacity(token_count);
            for slot in &all_terminals {
                let offset = match slot {
                    None => 0xff,
                    Some(term) => match self.table.state(state).transitions.get(term) {
                        Some(transition) => row_map[transition],
                        None => match &self.table.state(state).etransition {
                            Some(transition) => row_map[transition],
                            None => 0xff,
                        },
                    },
                };
                row.push(offset);
            }
            dispatch.push(row);
        }
        dispatch.push(vec![255; token_count]);

        let entries: Vec<EntryData> = self
            .entry_data
            .iter()
            .map(|transition| {
                let mut states = [0u32; 4];
                let n = transition.stack.len();
                for i in 0..n.min(4) {
                    states[i] = self.state_index[&transition.stack[n - i - 1]];
                }
                EntryData {
                    shift: transition.shift,
                    depth: n as i64 - 1,
                    action: self.action_to_index[&transition.action],
                    states,
                }
            })
            .collect();

        let mut entry_states: Vec<(String, u32)> = Vec::new();
        let entry_of: HashMap<_, _> = self.table.entries.iter().cloned().collect();
        for (name, nt) in &self.grammar.exports {
            let state = entry_of
                .get(nt)
                .expect("INTERNAL ERROR: export without an entry state");
            entry_states.push((name.clone(), self.state_index[state]));
        }

        // Recovery opcodes follow the megaaction ids.
        let actions_count = self.megaactions.len() as u32;
        let action_panic_skip = actions_count;
        let action_panic_insert = actions_count + 1;
        let action_lec_insert = actions_count + 2;
        let action_lec_remove = actions_count + 3;
        let action_lec_replace = actions_count + 4;
        let action_sentinel = actions_count + 5;

        let mut sync_base: Vec<u32> = Vec::new();
        let mut sync_skip_cost: Vec<u64> = Vec::new();
        let mut sync_skip_ref: Vec<u32> = Vec::new();
        let mut sync_rows: Vec<HashMap<TermSymId, u32>> = Vec::new();
        for &state in &self.table.list {
            sync_base.push(self.sync_entries.len() as u32);
            let mut row_entries: HashMap<(u32, u32), u32> = HashMap::new();
            let mut term_dispatch: HashMap<TermSymId, u32> = HashMap::new();

            let mut ordered: Vec<(i64, TermSymId)> = self
                .table
                .state(state)
                .sync
                .keys()
                .map(|term| (self.grammar.terminal_value(*term), *term))
                .collect();
            ordered.sort();
            for (_, term) in ordered {
                let entry = self.table.state(state).sync[&term].clone();
                let key = (
                    self.add_action_sequence(action_panic_insert, entry.cost, &entry.actions),
                    self.add_state_sequence(&entry.states),
                );
                let offset = match row_entries.get(&key) {
                    Some(&offset) => offset,
                    None => {
                        let offset = row_entries.len() as u32;
                        row_entries.insert(key, offset);
                        self.sync_entries.push(key);
                        offset
                    }
                };
                term_dispatch.insert(term, offset);
            }

            let (skip_cost, skip_seq) = self
                .table
                .state(state)
                .sync_skip
                .clone()
                .expect("INTERNAL ERROR: state has no skip cost");
            let skip_ref = self.add_action_sequence(action_panic_insert, skip_cost, &skip_seq);
            sync_skip_cost.push(skip_cost);
            sync_skip_ref.push(skip_ref);
            sync_rows.push(term_dispatch);
        }

        let mut sync_dispatch: Vec<Vec<u32>> = Vec::new();
        for slot in &all_terminals {
            let mut row: Vec<u32> = Vec::with_capacity(self.table.list.len());
            for term_dispatch in &sync_rows {
                let offset = match slot {
                    Some(term) => term_dispatch.get(term).copied().unwrap_or(0xff),
                    None => 0xff,
                };
                row.push(offset);
            }
            sync_dispatch.push(row);
        }

        let actions: Vec<EmitAction> = self
            .grammar
            .registered
            .iter()
            .map(|action_id| {
                let action = &self.grammar.actions[action_id.0];
                EmitAction {
                    loc: action.loc.clone(),
                    source: action.source.clone(),
                    result: types.display(action.result),
                    args: action
                        .args
                        .iter()
                        .map(|(name, ty)| (name.clone(), types.display(*ty)))
                        .collect(),
                }
            })
            .collect();

        let megaactions: Vec<Vec<EmitNode>> = self
            .megaactions
            .iter()
            .map(|mega| {
                self.table
                    .megaaction(*mega)
                    .nodes
                    .iter()
                    .map(|node| match node {
                        MegaNode::Shift => EmitNode::Shift,
                        MegaNode::Action(action) => EmitNode::Action(
                            self.grammar.actions[action.0]
                                .idx
                                .expect("INTERNAL ERROR: unregistered action emitted"),
                        ),
                    })
                    .collect()
            })
            .collect();

        ParserTables {
            prefix: prefix.to_string(),
            namespace: namespace.to_string(),
            state_count: self.table.list.len(),
            token_count,
            base,
            dispatch,
            table: self.table_data.clone(),
            entries,
            entry_states,
            megaactions,
            actions,
            action_panic_skip,
            action_panic_insert,
            action_lec_insert,
            action_lec_remove,
            action_lec_replace,
            action_sentinel,
            sync_dispatch,
            sync_base,
            sync_entries: self.sync_entries.clone(),
            sync_actions: self.sync_actions.clone(),
            sync_states: self.sync_states.clone(),
            sync_skip_cost,
            sync_skip_ref,
            token_skip_cost: vec![1; token_count],
            token_insert_cost: vec![1; token_count],
            token_sync_cost: vec![1; token_count],
            terminal_type: types.display(self.grammar.terminal_type),
            vm_args: self
                .grammar
                .vm_args
                .iter()
                .map(|(_, name, ty)| (name.clone(), ty.clone()))
                .collect(),
            vm_actions: self
                .grammar
                .vm_actions
                .iter()
                .map(|(name, action)| {
                    (name.clone(), (action.body_loc.clone(), action.body.clone()))
                })
                .collect(),
            parser_header: self.grammar.parser_header.clone(),
            parser_source: self.grammar.parser_source.clone(),
        }
    }

    fn visit_action(&mut self, mega: MegaId) {
        if !self.action_to_index.contains_key(&mega) {
            self.action_to_index
                .insert(mega, self.megaactions.len() as u32);
            self.megaactions.push(mega);
        }
    }

    fn get_transition_index(&mut self, transition: &Transition) -> u32 {
        if let Some(&index) = self.entry_map.get(transition) {
            return index;
        }
        let index = self.entry_data.len() as u32;
        self.entry_map.insert(transition.clone(), index);
        self.entry_data.push(transition.clone());
        index
    }

    /// Intern a recovery action sequence: cost, length, opcodes, then the values of
    /// the inserted tokens.
    fn add_action_sequence(&mut self, insert_opcode: u32, cost: u64, actions: &[SkipNode]) -> u32 {
        let key: Vec<(i64, i64)> = actions
            .iter()
            .map(|node| match node {
                SkipNode::Term(term) => (0, self.grammar.terminal_value(*term)),
                SkipNode::Mega(mega) => (1, mega.0 as i64),
            })
            .collect();
        if let Some(&pos) = self.actions_ref.get(&key) {
            return pos;
        }
        let pos = self.sync_actions.len() as u32;
        self.sync_actions.push(cost as i64);
        self.sync_actions.push(actions.len() as i64);
        for node in actions {
            match node {
                SkipNode::Term(_) => self.sync_actions.push(insert_opcode as i64),
                SkipNode::Mega(mega) => {
                    self.sync_actions.push(self.action_to_index[mega] as i64)
                }
            }
        }
        for node in actions {
            if let SkipNode::Term(term) = node {
                self.sync_actions.push(self.grammar.terminal_value(*term));
            }
        }
        self.actions_ref.insert(key, pos);
        pos
    }

    /// Intern a recovery state stack: length, then the state indices in pop order.
    fn add_state_sequence(&mut self, states: &[LhId]) -> u32 {
        if let Some(&pos) = self.states_ref.get(states) {
            return pos;
        }
        let pos = self.sync_states.len() as u32;
        self.sync_states.push(states.len() as u32);
        for state in states.iter().rev() {
            self.sync_states.push(self.state_index[state]);
        }
        self.states_ref.insert(states.to_vec(), pos);
        pos
    }
}

fn open_output(path: &Path) -> io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::File::create(path)
}

fn write_u32_rows(printer: &mut CodePrinter<'_>, items: &[u32], per_line: usize) -> io::Result<()> {
    for chunk in chunked(items.iter(), per_line) {
        let line: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
        printer.writeln(&format!("{},", line.join(",")))?;
    }
    Ok(())
}

/// Write the generated lexer header and/or source.
pub fn emit_lexer(
    tables: &LexerTables,
    header_path: Option<&Path>,
    source_path: Option<&Path>,
) -> io::Result<()> {
    if let Some(path) = header_path {
        let mut file = open_output(path)?;
        let mut printer = CodePrinter::new(&mut file);
        write_lexer_header(tables, &mut printer)?;
    }
    if let Some(path) = source_path {
        let mut file = open_output(path)?;
        let mut printer = CodePrinter::new(&mut file);
        write_lexer_source(tables, &mut printer)?;
    }
    Ok(())
}

fn write_lexer_header(tables: &LexerTables, printer: &mut CodePrinter<'_>) -> io::Result<()> {
    printer.writeln("// Generated lexer tables. Do not edit.")?;
    printer.writeln("#pragma once")?;
    printer.writeln("")?;
    printer.writeln(&format!("#define {}_TOKENS(X) \\", tables.prefix))?;
    printer.push_indent("\t");
    for (impl_name, value, name) in &tables.terminals {
        let quoted = serde_json::to_string(name).unwrap_or_else(|_| format!("\"{}\"", name));
        printer.writeln(&format!("X({}, {}, {}) \\", impl_name, value, quoted))?;
    }
    printer.pop_indent();
    printer.writeln("")?;
    printer.writeln(&format!("namespace {} {{", tables.namespace))?;
    printer.writeln("")?;
    printer.writeln(&format!(
        "constexpr unsigned {}_STATE_COUNT = {};",
        tables.prefix, tables.state_count
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_CLASS_COUNT = {};",
        tables.prefix, tables.class_count
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_CLASS_STRIDE = {};",
        tables.prefix, tables.class_stride
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_UNROLL_COUNT = 8;",
        tables.prefix
    ))?;
    printer.writeln("")?;
    printer.writeln("extern const unsigned equiv_table[256];")?;
    printer.writeln(&format!(
        "extern const unsigned trans_table[{}];",
        tables.trans.len()
    ))?;
    printer.writeln(&format!(
        "extern const unsigned accept_table[{}];",
        tables.accepts.len()
    ))?;
    printer.writeln(&format!(
        "extern const unsigned fin_trans_table[{}];",
        tables.fin_trans.len()
    ))?;
    printer.writeln("")?;
    printer.writeln("}")?;
    Ok(())
}

fn write_lexer_source(tables: &LexerTables, printer: &mut CodePrinter<'_>) -> io::Result<()> {
    printer.writeln("// Generated lexer tables. Do not edit.")?;
    printer.writeln("")?;
    printer.writeln(&format!("namespace {} {{", tables.namespace))?;
    printer.writeln("")?;
    printer.writeln("const unsigned equiv_table[256] = {")?;
    write_u32_rows(printer, &tables.eq_classes, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;
    printer.writeln(&format!(
        "const unsigned trans_table[{}] = {{",
        tables.trans.len()
    ))?;
    write_u32_rows(printer, &tables.trans, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;
    printer.writeln(&format!(
        "const unsigned accept_table[{}] = {{",
        tables.accepts.len()
    ))?;
    for chunk in chunked(tables.accepts.iter(), 16) {
        let line: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
        printer.writeln(&format!("{},", line.join(",")))?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;
    printer.writeln(&format!(
        "const unsigned fin_trans_table[{}] = {{",
        tables.fin_trans.len()
    ))?;
    write_u32_rows(printer, &tables.fin_trans, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;
    printer.writeln("}")?;
    Ok(())
}

/// Write the generated parser header and/or source.
pub fn emit_parser(
    tables: &ParserTables,
    header_path: Option<&Path>,
    source_path: Option<&Path>,
) -> io::Result<()> {
    if let Some(path) = header_path {
        let mut file = open_output(path)?;
        let mut printer = CodePrinter::new(&mut file);
        write_parser_header(tables, &mut printer)?;
    }
    if let Some(path) = source_path {
        let mut file = open_output(path)?;
        let mut printer = CodePrinter::new(&mut file);
        write_parser_source(tables, &mut printer)?;
    }
    Ok(())
}

fn write_parser_header(tables: &ParserTables, printer: &mut CodePrinter<'_>) -> io::Result<()> {
    printer.writeln("// Generated parser tables. Do not edit.")?;
    printer.writeln("#pragma once")?;
    printer.writeln("")?;
    printer.writeln(&format!("namespace {} {{", tables.namespace))?;
    printer.writeln("")?;
    printer.writeln(&format!(
        "constexpr unsigned {}_STATE_COUNT = {};",
        tables.prefix, tables.state_count
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_TOKEN_COUNT = {};",
        tables.prefix, tables.token_count
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_SENTINEL_STATE = {};",
        tables.prefix, tables.state_count
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_ACTION_PANIC_SKIP = {};",
        tables.prefix, tables.action_panic_skip
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_ACTION_PANIC_INSERT = {};",
        tables.prefix, tables.action_panic_insert
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_ACTION_LEC_INSERT = {};",
        tables.prefix, tables.action_lec_insert
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_ACTION_LEC_REMOVE = {};",
        tables.prefix, tables.action_lec_remove
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_ACTION_LEC_REPLACE = {};",
        tables.prefix, tables.action_lec_replace
    ))?;
    printer.writeln(&format!(
        "constexpr unsigned {}_ACTION_SENTINEL = {};",
        tables.prefix, tables.action_sentinel
    ))?;
    printer.writeln("")?;
    printer.writeln("enum class Entry : unsigned {")?;
    printer.push_indent("\t");
    for (name, state) in &tables.entry_states {
        printer.writeln(&format!("{} = {},", name, state))?;
    }
    printer.pop_indent();
    printer.writeln("};")?;
    printer.writeln("")?;
    if !tables.vm_args.is_empty() {
        printer.writeln("struct VmArgs {")?;
        printer.push_indent("\t");
        for (name, ty) in &tables.vm_args {
            printer.writeln(&format!("{} {};", ty, name))?;
        }
        printer.pop_indent();
        printer.writeln("};")?;
        printer.writeln("")?;
    }
    if let Some(block) = &tables.parser_header {
        printer.include(&block.loc, &block.contents)?;
    }
    printer.writeln("}")?;
    Ok(())
}

fn write_parser_source(tables: &ParserTables, printer: &mut CodePrinter<'_>) -> io::Result<()> {
    printer.writeln("// Generated parser tables. Do not edit.")?;
    printer.writeln("")?;
    printer.writeln(&format!("namespace {} {{", tables.namespace))?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned base_data[{}] = {{",
        tables.base.len()
    ))?;
    write_u32_rows(printer, &tables.base, 10)?;
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned char dispatch_data[{}][{}] = {{",
        tables.dispatch.len(),
        tables.token_count
    ))?;
    for row in &tables.dispatch {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        printer.writeln(&format!("{{{}}},", line.join(",")))?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned table_data[{}] = {{",
        tables.table.len()
    ))?;
    write_u32_rows(printer, &tables.table, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const {}Entry entries_data[{}] = {{",
        tables.prefix,
        tables.entries.len()
    ))?;
    for chunk in chunked(tables.entries.iter(), 6) {
        let mut line = String::new();
        for entry in chunk {
            line.push_str(&format!(
                "{{{},{},{},{{{},{},{},{}}}}},",
                if entry.shift { 1 } else { 0 },
                entry.depth,
                entry.action,
                entry.states[0],
                entry.states[1],
                entry.states[2],
                entry.states[3],
            ));
        }
        printer.writeln(&line)?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned char sync_dispatch_data[{}][{}] = {{",
        tables.sync_dispatch.len(),
        tables.state_count
    ))?;
    for row in &tables.sync_dispatch {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        printer.writeln(&format!("{{{}}},", line.join(",")))?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned sync_base_data[{}] = {{",
        tables.sync_base.len()
    ))?;
    write_u32_rows(printer, &tables.sync_base, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned sync_entries_data[{}][2] = {{",
        tables.sync_entries.len()
    ))?;
    for chunk in chunked(tables.sync_entries.iter(), 10) {
        let mut line = String::new();
        for (actions, states) in chunk {
            line.push_str(&format!("{{{}, {}}},", actions, states));
        }
        printer.writeln(&line)?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const int sync_actions_data[{}] = {{",
        tables.sync_actions.len()
    ))?;
    for chunk in chunked(tables.sync_actions.iter(), 16) {
        let line: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
        printer.writeln(&format!("{},", line.join(",")))?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned sync_states_data[{}] = {{",
        tables.sync_states.len()
    ))?;
    write_u32_rows(printer, &tables.sync_states, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned sync_state_skip_cost_data[{}] = {{",
        tables.sync_skip_cost.len()
    ))?;
    for chunk in chunked(tables.sync_skip_cost.iter(), 16) {
        let line: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
        printer.writeln(&format!("{},", line.join(",")))?;
    }
    printer.writeln("};")?;
    printer.writeln("")?;

    printer.writeln(&format!(
        "const unsigned sync_state_skip_ref_data[{}] = {{",
        tables.sync_skip_ref.len()
    ))?;
    write_u32_rows(printer, &tables.sync_skip_ref, 16)?;
    printer.writeln("};")?;
    printer.writeln("")?;

    for (name, values) in [
        ("sync_token_skip_cost_data", &tables.token_skip_cost),
        ("sync_token_insert_cost_data", &tables.token_insert_cost),
        ("sync_token_sync_cost_data", &tables.token_sync_cost),
    ] {
        printer.writeln(&format!("const unsigned {}[{}] = {{", name, values.len()))?;
        write_u32_rows(printer, values, 16)?;
        printer.writeln("};")?;
        printer.writeln("")?;
    }

    write_dispatch_switch(tables, printer)?;

    if let Some(block) = &tables.parser_source {
        printer.include(&block.loc, &block.contents)?;
    }
    printer.writeln("}")?;
    Ok(())
}

/// The megaaction dispatch switch: one case per interned megaaction, splicing the user
/// action sources (and the `shift` vm action for shift sentinels) in execution order.
fn write_dispatch_switch(tables: &ParserTables, printer: &mut CodePrinter<'_>) -> io::Result<()> {
    printer.writeln(&format!(
        "// Megaaction dispatch; value type of terminals is '{}'.",
        tables.terminal_type
    ))?;
    for (action_id, megaaction) in tables.megaactions.iter().enumerate() {
        printer.writeln(&format!("case {}: {{", action_id))?;
        printer.push_indent("\t");
        for node in megaaction {
            match node {
                EmitNode::Shift => {
                    if let Some((loc, body)) = tables.vm_actions.get("shift") {
                        printer.include(loc, body)?;
                    } else {
                        printer.writeln("// shift")?;
                    }
                }
                EmitNode::Action(index) => {
                    let action = &tables.actions[*index];
                    printer.include(&action.loc, &action.source)?;
                }
            }
        }
        printer.pop_indent();
        printer.writeln("break; }")?;
    }
    for (name, opcode) in [
        ("sync_skip", tables.action_panic_skip),
        ("sync_insert", tables.action_panic_insert),
        ("correction_insert", tables.action_lec_insert),
        ("correction_remove", tables.action_lec_remove),
        ("correction_replace", tables.action_lec_replace),
    ] {
        if let Some((loc, body)) = tables.vm_actions.get(name) {
            printer.writeln(&format!("case {}: {{", opcode))?;
            printer.push_indent("\t");
            printer.include(loc, body)?;
            printer.pop_indent();
            printer.writeln("break; }")?;
        }
    }
    printer.writeln("")?;
    Ok(())
}
