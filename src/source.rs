use crate::{GenResult, GrammarError, SrcLoc};
use once_cell::unsync::OnceCell;
use std::rc::Rc;

/// A grammar file held in memory with lines information.
///
/// Positions are tracked as plain byte offsets while reading; the line break table is
/// computed lazily the first time a [SrcLoc] is materialized for a diagnostic.
pub struct SourceText {
    path: Rc<str>,
    text: String,
    line_breaks: OnceCell<Vec<usize>>,
}

impl SourceText {
    pub fn new(path: &str, text: String) -> Self {
        Self {
            path: Rc::from(path),
            text,
            line_breaks: OnceCell::new(),
        }
    }

    pub fn read(path: &str) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::new(path, text))
    }

    pub fn path(&self) -> Rc<str> {
        self.path.clone()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn obtain_line_breaks(&self) -> &Vec<usize> {
        self.line_breaks.get_or_init(|| {
            let bytes = self.text.as_bytes();
            let mut breaks = Vec::new();
            for (index, b) in bytes.iter().enumerate() {
                if *b == b'\n' {
                    breaks.push(index);
                } else if *b == b'\r' && bytes.get(index + 1) != Some(&b'\n') {
                    breaks.push(index);
                }
            }
            breaks
        })
    }

    /// The line and column of a byte offset, both zero based. Columns count characters.
    pub fn obtain_loc(&self, pointer: usize) -> SrcLoc {
        let line_breaks = self.obtain_line_breaks();
        let index = match line_breaks.binary_search(&pointer) {
            Ok(index) | Err(index) => index,
        };
        let line_start = if index == 0 {
            0
        } else {
            line_breaks[index - 1] + 1
        };
        let col = self.text[line_start..pointer].chars().count();
        SrcLoc::new(self.path.clone(), index as u32, col as u32)
    }
}

pub fn is_id_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

pub fn is_id_char(ch: char) -> bool {
    is_id_start(ch) || ch.is_ascii_digit()
}

pub fn is_inline_ws(ch: char) -> bool {
    ch == ' ' || ch == '\t'
}

pub fn is_linebreak(ch: char) -> bool {
    ch == '\r' || ch == '\n'
}

pub fn is_quote(ch: char) -> bool {
    ch == '\'' || ch == '"'
}

fn is_self_escape(ch: char) -> bool {
    ch.is_ascii_punctuation()
}

/// A cursor over a [SourceText] with the primitive recognizers shared by every
/// line-oriented section of the grammar description: identifiers, quoted strings with
/// C-style and `\x`/`\u`/`\U` escapes, signed integers and comment-aware whitespace
/// skipping.
///
/// The reader is cheap to [save](TextReader::save) and [restore](TextReader::restore),
/// which is how multi-character lookahead is implemented.
pub struct TextReader<'s> {
    source: &'s SourceText,
    pos: usize,
}

impl<'s> TextReader<'s> {
    pub fn new(source: &'s SourceText) -> Self {
        Self { source, pos: 0 }
    }

    pub fn peek(&self) -> Option<char> {
        self.source.text[self.pos..].chars().next()
    }

    pub fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    pub fn save(&self) -> usize {
        self.pos
    }

    pub fn restore(&mut self, state: usize) {
        self.pos = state;
    }

    pub fn loc(&self) -> SrcLoc {
        self.source.obtain_loc(self.pos)
    }

    pub fn report(&self, message: &str) -> GrammarError {
        GrammarError::new(self.loc(), message.to_string())
    }

    pub fn expect(&mut self, ch: char) -> GenResult<()> {
        if self.peek() != Some(ch) {
            return Err(self.report(&format!("expected '{}'", ch)));
        }
        self.advance();
        Ok(())
    }

    /// Consume `token` if the upcoming characters spell it out, leaving the reader
    /// untouched otherwise.
    pub fn lookahead(&mut self, token: &str) -> bool {
        let savepoint = self.save();
        for expected in token.chars() {
            if self.peek() == Some(expected) {
                self.advance();
            } else {
                self.restore(savepoint);
                return false;
            }
        }
        true
    }

    pub fn skip_line(&mut self) {
        while let Some(ch) = self.peek() {
            if is_linebreak(ch) {
                self.skip_nl();
                break;
            }
            self.advance();
        }
    }

    pub fn skip_empty_line(&mut self) -> GenResult<()> {
        while let Some(ch) = self.peek() {
            if is_linebreak(ch) {
                self.skip_nl();
                break;
            } else if is_inline_ws(ch) {
                self.advance();
            } else if ch == '#' {
                self.skip_line();
                break;
            } else {
                return Err(self.report("expected empty line"));
            }
        }
        Ok(())
    }

    pub fn skip_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '#' {
                self.advance();
                self.skip_line();
            } else if ch.is_ascii_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    pub fn skip_inline_ws(&mut self) {
        while let Some(ch) = self.peek() {
            if is_inline_ws(ch) {
                self.advance();
            } else {
                break;
            }
        }
    }

    pub fn skip_nl(&mut self) {
        if self.peek() == Some('\r') {
            self.advance();
        }
        if self.peek() == Some('\n') {
            self.advance();
        }
    }

    pub fn parse_int(&mut self) -> GenResult<i64> {
        let mut sign = 1;
        if self.peek() == Some('-') {
            sign = -1;
            self.advance();
        }
        if self.peek() == Some('0') {
            self.advance();
            return Ok(0);
        }
        match self.peek() {
            Some(ch) if ch.is_ascii_digit() => {}
            _ => return Err(self.report("expected integer")),
        }
        let mut acc: i64 = 0;
        while let Some(ch) = self.peek() {
            if let Some(digit) = ch.to_digit(10) {
                acc = acc * 10 + digit as i64;
                self.advance();
            } else {
                break;
            }
        }
        Ok(acc * sign)
    }

    fn parse_hexdig(&mut self) -> GenResult<u32> {
        match self.peek().and_then(|ch| ch.to_digit(16)) {
            Some(digit) => {
                self.advance();
                Ok(digit)
            }
            None => Err(self.report("expected hex digit")),
        }
    }

    fn parse_hexcode(&mut self, digits: u32) -> GenResult<char> {
        let mut acc: u32 = 0;
        for _ in 0..digits {
            acc = acc * 16 + self.parse_hexdig()?;
        }
        char::from_u32(acc).ok_or_else(|| self.report("escape sequence is not a character"))
    }

    /// The character following a backslash: punctuation escapes itself, `n`/`r`/`t`/`0`
    /// name a control character, and `\xHH`, `\uHHHH`, `\UHHHHHHHH` encode code points.
    pub fn parse_esc(&mut self) -> GenResult<char> {
        let ch = match self.peek() {
            Some(ch) => ch,
            None => return Err(self.report("invalid escape sequence")),
        };
        if is_self_escape(ch) {
            self.advance();
            return Ok(ch);
        }
        match ch {
            'n' => {
                self.advance();
                Ok('\n')
            }
            'r' => {
                self.advance();
                Ok('\r')
            }
            't' => {
                self.advance();
                Ok('\t')
            }
            '0' => {
                self.advance();
                Ok('\0')
            }
            'x' => {
                self.advance();
                self.parse_hexcode(2)
            }
            'u' => {
                self.advance();
                self.parse_hexcode(4)
            }
            'U' => {
                self.advance();
                self.parse_hexcode(8)
            }
            _ => Err(self.report("invalid escape sequence")),
        }
    }

    pub fn parse_string(&mut self) -> GenResult<String> {
        let open_ch = match self.peek() {
            Some(ch) if is_quote(ch) => ch,
            _ => return Err(self.report("expected string")),
        };
        self.advance();
        let mut s = String::new();
        loop {
            match self.peek() {
                None => break,
                Some(ch) if ch == open_ch => break,
                Some('\\') => {
                    self.advance();
                    s.push(self.parse_esc()?);
                }
                Some(ch) if ch.is_ascii_control() => {
                    return Err(self.report("unexpected character inside string literal"));
                }
                Some(ch) => {
                    s.push(ch);
                    self.advance();
                }
            }
        }
        self.expect(open_ch)?;
        Ok(s)
    }

    pub fn parse_id(&mut self) -> GenResult<String> {
        let mut s = String::new();
        match self.peek() {
            Some(ch) if is_id_start(ch) => {
                s.push(ch);
                self.advance();
            }
            _ => return Err(self.report("expected identifier")),
        }
        while let Some(ch) = self.peek() {
            if is_id_char(ch) {
                s.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(s)
    }

    pub fn collect(&mut self, accept: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while let Some(ch) = self.peek() {
            if accept(ch) {
                s.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        s
    }
}
