use crate::lexer::regexp::{ByteSet, Re};
use crate::parser::template::{BinOp, TemplateAction, TemplateExpr, TemplateSymbol};
use crate::parser::ParserRule;
use crate::project::Project;
use crate::source::{is_id_char, is_id_start, is_linebreak, is_quote, SourceText, TextReader};
use crate::{GenResult, SrcLoc};

const PREC_MODIFIER: u8 = 30;
const PREC_CONCAT: u8 = 20;
const PREC_CHOICE: u8 = 10;
const PREC_MIN: u8 = 0;

const PREC_ADD: u8 = 40;
const PREC_COMPARISON: u8 = 30;
const PREC_AND: u8 = 20;
const PREC_OR: u8 = 10;

/// Operators of template expressions, loosest binding first so that longer spellings
/// like `<=` are tried before their prefixes.
const OPERATORS: &[(u8, &str, BinOp)] = &[
    (PREC_OR, "or", BinOp::Or),
    (PREC_AND, "and", BinOp::And),
    (PREC_COMPARISON, "==", BinOp::Eq),
    (PREC_COMPARISON, "!=", BinOp::Ne),
    (PREC_COMPARISON, "<=", BinOp::Le),
    (PREC_COMPARISON, ">=", BinOp::Ge),
    (PREC_COMPARISON, "<", BinOp::Lt),
    (PREC_COMPARISON, ">", BinOp::Gt),
    (PREC_ADD, "+", BinOp::Add),
    (PREC_ADD, "-", BinOp::Sub),
];

fn is_section_char(ch: char) -> bool {
    is_id_char(ch) || ch == '.'
}

fn is_group_char(ch: char) -> bool {
    (' '..='~').contains(&ch) && !"^-\\[]".contains(ch)
}

fn is_re_plain_char(ch: char) -> bool {
    ('!'..='~').contains(&ch) && !";$^~{}[]+*.?<>()\\\"|".contains(ch)
}

/// Load a grammar description into a fresh [Project].
pub fn parse_project(source: &SourceText) -> GenResult<Project> {
    let mut parser = GrammarParser {
        reader: TextReader::new(source),
        project: Project::new(),
    };
    parser.parse_sections()?;
    Ok(parser.project)
}

/// Recursive descent over the line-oriented grammar description, dispatching on the
/// `[section.name]` headers.
struct GrammarParser<'s> {
    reader: TextReader<'s>,
    project: Project,
}

impl<'s> GrammarParser<'s> {
    fn parse_sections(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let ch = match self.reader.peek() {
                None => break,
                Some(ch) => ch,
            };
            if ch != '[' {
                return Err(self.reader.report("expected section"));
            }
            self.reader.advance();
            self.reader.skip_inline_ws();
            let section_loc = self.reader.loc();
            let section_name = self.reader.collect(is_section_char);
            self.reader.skip_inline_ws();
            self.reader.expect(']')?;
            self.reader.skip_empty_line()?;
            match section_name.as_str() {
                "lexer.fragments" => self.section_lexer_fragments()?,
                "lexer.grammar" => self.section_lexer_grammar()?,
                "parser.types" => self.section_parser_types()?,
                "parser.vm_args" => self.section_parser_vm_args()?,
                "parser.vm_actions" => self.section_parser_vm_actions()?,
                "parser.grammar" => self.section_parser_grammar()?,
                "parser.expose" => self.section_parser_expose()?,
                "parser.header" => {
                    let loc = self.reader.loc();
                    let contents = self.section_code();
                    self.project.parser.set_parser_header(loc, contents)?;
                }
                "parser.source" => {
                    let loc = self.reader.loc();
                    let contents = self.section_code();
                    self.project.parser.set_parser_source(loc, contents)?;
                }
                "terminals" => self.section_terminals()?,
                _ => {
                    return Err(crate::GrammarError::new(
                        section_loc,
                        format!("unknown section {}", section_name),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Verbatim text until the next `[` that starts a line.
    fn section_code(&mut self) -> String {
        let mut s = String::new();
        let mut line_is_clear = true;
        while let Some(ch) = self.reader.peek() {
            if ch == '[' && line_is_clear {
                break;
            }
            if is_linebreak(ch) {
                line_is_clear = true;
            } else if !ch.is_ascii_whitespace() {
                line_is_clear = false;
            }
            s.push(ch);
            self.reader.advance();
        }
        s
    }

    fn section_parser_types(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            self.colon()?;
            let type_name = self.parse_name()?;
            self.semi()?;
            self.project.parser.add_type(loc, name, type_name);
        }
        Ok(())
    }

    fn section_parser_vm_args(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            self.colon()?;
            let type_name = self.parse_name()?;
            self.semi()?;
            self.project.parser.add_vm_arg(loc, name, type_name);
        }
        Ok(())
    }

    fn section_parser_expose(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            self.semi()?;
            self.project.parser.add_expose(loc, name);
        }
        Ok(())
    }

    fn section_parser_vm_actions(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            self.colon()?;
            let action = match self.try_action()? {
                Some(action) => action,
                None => return Err(self.reader.report("expected action")),
            };
            self.semi()?;
            self.project
                .parser
                .register_vm_action(loc, name, action.0, action.1)?;
        }
        Ok(())
    }

    fn section_parser_grammar(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            let (param_names, condition) = self.parse_template_params()?;
            self.colon()?;
            let symbols = self.parse_nt_symbols()?;
            let action = self
                .try_action()?
                .map(|(loc, text)| TemplateAction { loc, text });
            self.semi()?;
            self.project.parser.add_rule(ParserRule {
                loc,
                name,
                param_names,
                condition,
                symbols,
                action,
            });
        }
        Ok(())
    }

    /// A balanced-brace action block: the closing run must repeat `}` as many times as
    /// the block was opened with `{`.
    fn try_action(&mut self) -> GenResult<Option<(SrcLoc, String)>> {
        self.reader.skip_ws();
        if self.reader.peek() != Some('{') {
            return Ok(None);
        }
        let mut counter = 0;
        while self.reader.peek() == Some('{') {
            counter += 1;
            self.reader.advance();
        }
        self.reader.skip_ws();
        let loc = self.reader.loc();
        let mut text = String::new();
        loop {
            match self.reader.peek() {
                None => return Err(self.reader.report("action is not terminated")),
                Some('}') => {
                    let mut n = 0;
                    let mut closed = false;
                    while self.reader.peek() == Some('}') {
                        self.reader.advance();
                        n += 1;
                        if n == counter {
                            closed = true;
                            break;
                        }
                    }
                    if closed {
                        break;
                    }
                    for _ in 0..n {
                        text.push('}');
                    }
                }
                Some(ch) => {
                    self.reader.advance();
                    text.push(ch);
                }
            }
        }
        Ok(Some((loc, text.trim().to_string())))
    }

    fn parse_nt_symbols(&mut self) -> GenResult<Vec<TemplateSymbol>> {
        let mut acc: Vec<TemplateSymbol> = Vec::new();
        let mut forced_captures: Vec<(String, SrcLoc)> = Vec::new();
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let mut name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            let mut capture = None;
            self.reader.skip_ws();
            if self.reader.peek() == Some('=') {
                self.reader.advance();
                capture = Some(name);
                name = match self.try_name()? {
                    Some(name) => name,
                    None => return Err(self.reader.report("expected symbol name")),
                };
                self.reader.skip_ws();
                let capture_name = capture.as_ref().unwrap();
                if let Some((_, prev)) = forced_captures.iter().find(|(c, _)| c == capture_name) {
                    return Err(self.reader.report(&format!(
                        "capture {} already used at {}",
                        capture_name, prev
                    )));
                }
                forced_captures.push((capture_name.clone(), loc.clone()));
            }
            let params = self.parse_template_list()?;
            acc.push(TemplateSymbol {
                loc,
                name,
                params,
                capture,
            });
        }
        Ok(acc)
    }

    fn parse_template_list(&mut self) -> GenResult<Option<Vec<TemplateExpr>>> {
        if self.reader.peek() != Some('[') {
            return Ok(None);
        }
        self.reader.advance();
        let mut params = Vec::new();
        loop {
            let expr = self.parse_expr(PREC_MIN)?;
            params.push(expr);
            self.reader.skip_ws();
            if self.reader.peek() == Some(',') {
                self.reader.advance();
            } else {
                break;
            }
        }
        self.reader.expect(']')?;
        Ok(Some(params))
    }

    /// Template parameter list plus combined filter condition. Arguments that are not
    /// fresh simple identifiers become anonymous positional parameters whose equality
    /// constraint joins the `where` clause.
    fn parse_template_params(&mut self) -> GenResult<(Vec<String>, Option<TemplateExpr>)> {
        let loc = self.reader.loc();
        let base_params = match self.parse_template_list()? {
            None => return Ok((Vec::new(), None)),
            Some(params) => params,
        };
        self.reader.skip_ws();
        let mut cond = None;
        if self.reader.lookahead("where") {
            cond = Some(self.parse_expr(PREC_MIN)?);
            self.reader.skip_ws();
        }

        let mut param_names: Vec<String> = Vec::new();
        let mut used_names: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut conds: Vec<TemplateExpr> = Vec::new();
        let mut next_id = 1;
        for param in base_params {
            match &param {
                TemplateExpr::Var(_, name) if !used_names.contains(name) => {
                    param_names.push(name.clone());
                    used_names.insert(name.clone());
                }
                _ => {
                    let placeholder_name = format!("@{}", next_id);
                    param_names.push(placeholder_name.clone());
                    conds.push(TemplateExpr::BinOp(
                        param.loc().clone(),
                        BinOp::Eq,
                        Box::new(TemplateExpr::Var(param.loc().clone(), placeholder_name)),
                        Box::new(param),
                    ));
                    next_id += 1;
                }
            }
        }
        if let Some(cond) = cond {
            conds.push(cond);
        }
        let mut filter: Option<TemplateExpr> = None;
        for cond in conds {
            filter = match filter {
                None => Some(cond),
                Some(prev) => Some(TemplateExpr::BinOp(
                    loc.clone(),
                    BinOp::And,
                    Box::new(prev),
                    Box::new(cond),
                )),
            };
        }
        Ok((param_names, filter))
    }

    fn section_terminals(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            self.colon()?;
            let impl_name = self.parse_name()?;
            self.reader.skip_ws();
            let tags = if self.reader.peek() == Some('{') {
                self.reader.advance();
                self.reader.skip_ws();
                let tags = self.parse_tags()?;
                self.reader.expect('}')?;
                tags
            } else {
                Vec::new()
            };
            self.semi()?;
            self.project.shared.add_terminal(loc, name, impl_name, tags)?;
        }
        Ok(())
    }

    fn parse_tags(&mut self) -> GenResult<Vec<(String, Option<i64>)>> {
        let mut vals: Vec<(String, Option<i64>)> = Vec::new();
        loop {
            self.reader.skip_ws();
            let name = self.reader.parse_id()?;
            self.reader.skip_ws();
            let val = if self.reader.peek() == Some('=') {
                self.reader.advance();
                self.reader.skip_ws();
                Some(self.reader.parse_int()?)
            } else {
                None
            };
            vals.push((name, val));
            if self.reader.peek() == Some(',') {
                self.reader.advance();
            } else {
                break;
            }
        }
        Ok(vals)
    }

    fn section_lexer_fragments(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            match self.reader.peek() {
                Some(ch) if is_id_start(ch) => {
                    let loc = self.reader.loc();
                    let name = self.reader.parse_id()?;
                    self.colon()?;
                    self.reader.skip_ws();
                    let re = self.parse_re()?;
                    self.semi()?;
                    self.project.lexer.add_fragment(loc, name, re)?;
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn section_lexer_grammar(&mut self) -> GenResult<()> {
        loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = match self.try_name()? {
                None => break,
                Some(name) => name,
            };
            self.reader.skip_ws();
            let re = if self.reader.peek() == Some(':') {
                self.colon()?;
                self.reader.skip_ws();
                self.parse_re()?
            } else {
                Re::literal(&name)
            };
            self.semi()?;
            self.project.lexer.add_rule(loc, name, re);
        }
        Ok(())
    }

    fn parse_name(&mut self) -> GenResult<String> {
        match self.try_name()? {
            Some(name) => Ok(name),
            None => Err(self.reader.report("expected identifier or string")),
        }
    }

    fn try_name(&mut self) -> GenResult<Option<String>> {
        self.reader.skip_ws();
        match self.reader.peek() {
            Some(ch) if is_id_start(ch) => Ok(Some(self.reader.parse_id()?)),
            Some(ch) if is_quote(ch) => Ok(Some(self.reader.parse_string()?)),
            _ => Ok(None),
        }
    }

    fn parse_re(&mut self) -> GenResult<Re> {
        match self.try_re_at(PREC_MIN)? {
            Some(re) => Ok(re),
            None => Err(self.reader.report("expected regular expression")),
        }
    }

    fn try_re_at(&mut self, prec: u8) -> GenResult<Option<Re>> {
        let mut lhs = match self.try_re_prim()? {
            None => return Ok(None),
            Some(re) => re,
        };

        loop {
            self.reader.skip_ws();
            let ch = self.reader.peek();
            if prec <= PREC_MODIFIER && ch == Some('?') {
                self.reader.advance();
                lhs = Re::choice(lhs, Re::Empty);
            } else if prec <= PREC_MODIFIER && ch == Some('+') {
                self.reader.advance();
                lhs = Re::concat(lhs.clone(), Re::star(lhs));
            } else if prec <= PREC_MODIFIER && ch == Some('*') {
                self.reader.advance();
                lhs = Re::star(lhs);
            } else if prec <= PREC_MODIFIER && ch == Some('{') {
                self.reader.advance();
                self.reader.skip_ws();
                let min_count = self.reader.parse_int()?;
                self.reader.skip_ws();
                let max_count = if self.reader.peek() == Some(',') {
                    self.reader.advance();
                    self.reader.skip_ws();
                    let max_count = self.reader.parse_int()?;
                    self.reader.skip_ws();
                    max_count
                } else {
                    min_count
                };
                self.reader.expect('}')?;
                if max_count < min_count {
                    return Err(self
                        .reader
                        .report("max count must be greater than or equal to min count"));
                }
                let mut max_count = max_count;
                let mut min_count = min_count;
                let mut tail = Re::Empty;
                while max_count > min_count {
                    tail = Re::choice(Re::concat(lhs.clone(), tail), Re::Empty);
                    max_count -= 1;
                }
                while min_count > 0 {
                    tail = Re::concat(lhs.clone(), tail);
                    min_count -= 1;
                }
                lhs = tail;
            } else if prec <= PREC_CHOICE && ch == Some('|') {
                self.reader.advance();
                let rhs = self.try_re_at(PREC_CHOICE + 1)?.unwrap_or(Re::Empty);
                lhs = Re::choice(lhs, rhs);
            } else if prec <= PREC_CONCAT {
                match self.try_re_at(PREC_CONCAT + 1)? {
                    Some(rhs) => lhs = Re::concat(lhs, rhs),
                    None => break,
                }
            } else {
                break;
            }
        }

        Ok(Some(lhs))
    }

    fn try_re_prim(&mut self) -> GenResult<Option<Re>> {
        self.reader.skip_ws();
        let ch = match self.reader.peek() {
            None => return Ok(None),
            Some(ch) => ch,
        };
        if is_quote(ch) {
            let s = self.reader.parse_string()?;
            Ok(Some(Re::literal(&s)))
        } else if ch == '\\' {
            self.reader.advance();
            let esc = self.reader.parse_esc()?;
            Ok(Some(Re::literal(&esc.to_string())))
        } else if ch == '.' {
            self.reader.advance();
            Ok(Some(Re::Char(ByteSet::full())))
        } else if ch == '(' {
            self.reader.advance();
            let re = self.try_re_at(PREC_MIN)?.unwrap_or(Re::Empty);
            self.reader.skip_ws();
            self.reader.expect(')')?;
            Ok(Some(re))
        } else if ch == '<' {
            self.reader.advance();
            self.reader.skip_ws();
            let loc = self.reader.loc();
            let name = self.reader.parse_id()?;
            self.reader.skip_ws();
            self.reader.expect('>')?;
            Ok(Some(Re::Ref(loc, name)))
        } else if ch == '[' {
            self.reader.advance();
            let re = self.parse_group()?;
            self.reader.expect(']')?;
            Ok(Some(re))
        } else if is_re_plain_char(ch) {
            self.reader.advance();
            Ok(Some(Re::literal(&ch.to_string())))
        } else {
            Ok(None)
        }
    }

    fn parse_group(&mut self) -> GenResult<Re> {
        let mut invert = false;
        if self.reader.peek() == Some('^') {
            self.reader.advance();
            invert = true;
        }

        let mut group = ByteSet::empty();
        loop {
            let ch = match self.parse_group_char()? {
                None => break,
                Some(ch) => ch,
            };
            if self.reader.peek() == Some('-') {
                self.reader.advance();
                let ch2 = match self.parse_group_char()? {
                    Some(ch2) => ch2,
                    None => return Err(self.reader.report("expected second range character")),
                };
                if ch2 < ch {
                    return Err(self.reader.report("invalid range"));
                }
                group.insert_range(ch, ch2);
            } else {
                group.insert(ch);
            }
        }

        if invert {
            group.invert();
        }
        Ok(Re::Char(group))
    }

    fn parse_group_char(&mut self) -> GenResult<Option<u8>> {
        match self.reader.peek() {
            Some('\\') => {
                self.reader.advance();
                let val = self.reader.parse_esc()? as u32;
                if val > 255 {
                    return Err(self
                        .reader
                        .report("escape sequence does not encode single byte"));
                }
                Ok(Some(val as u8))
            }
            Some(']') => Ok(None),
            Some(ch) if is_group_char(ch) => {
                self.reader.advance();
                Ok(Some(ch as u8))
            }
            _ => Err(self.reader.report("invalid group character")),
        }
    }

    fn semi(&mut self) -> GenResult<()> {
        self.reader.skip_ws();
        self.reader.expect(';')
    }

    fn colon(&mut self) -> GenResult<()> {
        self.reader.skip_ws();
        self.reader.expect(':')
    }

    fn parse_expr(&mut self, prec: u8) -> GenResult<TemplateExpr> {
        match self.try_parse_expr(prec)? {
            Some(expr) => Ok(expr),
            None => Err(self.reader.report("expected expression")),
        }
    }

    fn try_parse_expr(&mut self, prec: u8) -> GenResult<Option<TemplateExpr>> {
        let mut lhs = match self.try_parse_prim()? {
            None => return Ok(None),
            Some(expr) => expr,
        };
        'outer: loop {
            self.reader.skip_ws();
            let loc = self.reader.loc();
            for (op_prec, token, op) in OPERATORS {
                if prec <= *op_prec && self.reader.lookahead(token) {
                    let rhs = self.parse_expr(prec + 1)?;
                    lhs = TemplateExpr::BinOp(loc, *op, Box::new(lhs), Box::new(rhs));
                    continue 'outer;
                }
            }
            break;
        }
        Ok(Some(lhs))
    }

    fn try_parse_prim(&mut self) -> GenResult<Option<TemplateExpr>> {
        self.reader.skip_ws();
        let loc = self.reader.loc();
        match self.reader.peek() {
            Some(ch) if is_id_start(ch) => {
                let id = self.reader.parse_id()?;
                Ok(Some(TemplateExpr::Var(loc, id)))
            }
            Some(ch) if ch.is_ascii_digit() => {
                let num = self.reader.parse_int()?;
                Ok(Some(TemplateExpr::Const(loc, num)))
            }
            Some('(') => {
                self.reader.advance();
                let expr = self.parse_expr(PREC_MIN)?;
                self.reader.skip_ws();
                self.reader.expect(')')?;
                Ok(Some(expr))
            }
            _ => Ok(None),
        }
    }
}
