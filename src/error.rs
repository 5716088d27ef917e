use crate::{GrammarError, SrcLoc};
use std::fmt::{Display, Formatter};

impl SrcLoc {
    pub fn new(file: std::rc::Rc<str>, line: u32, col: u32) -> Self {
        Self { file, line, col }
    }
}

impl Display for SrcLoc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}, {})", self.file, self.line + 1, self.col + 1)
    }
}

impl GrammarError {
    pub fn new(loc: SrcLoc, message: String) -> Self {
        Self {
            loc: Some(loc),
            message,
        }
    }

    /// An error that is not tied to a single character, such as a missing `{eof}` terminal.
    pub fn bare(message: String) -> Self {
        Self { loc: None, message }
    }
}

impl Display for GrammarError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.loc {
            Some(loc) => write!(f, "{}: {}", loc, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for GrammarError {}
