use crate::parser::grammar::NtId;
use crate::parser::types::TypeId;
use crate::{GenResult, GrammarError, SrcLoc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Binary operators of template argument expressions, listed loosest first.
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Add,
    Sub,
}

#[derive(Debug, Clone)]
/// A compile-time integer expression inside `[...]` template arguments or a `where`
/// clause. Comparisons and logic yield 0 or 1; `and`/`or` short-circuit on zero.
pub enum TemplateExpr {
    Const(SrcLoc, i64),
    Var(SrcLoc, String),
    BinOp(SrcLoc, BinOp, Box<TemplateExpr>, Box<TemplateExpr>),
}

impl TemplateExpr {
    pub fn loc(&self) -> &SrcLoc {
        match self {
            TemplateExpr::Const(loc, _) => loc,
            TemplateExpr::Var(loc, _) => loc,
            TemplateExpr::BinOp(loc, _, _, _) => loc,
        }
    }

    pub fn eval(&self, vars: &HashMap<String, i64>) -> GenResult<i64> {
        match self {
            TemplateExpr::Const(_, value) => Ok(*value),
            TemplateExpr::Var(loc, name) => vars.get(name).copied().ok_or_else(|| {
                GrammarError::new(loc.clone(), format!("unknown template parameter '{}'", name))
            }),
            TemplateExpr::BinOp(_, op, lhs, rhs) => {
                let l = lhs.eval(vars)?;
                match op {
                    BinOp::And => {
                        if l == 0 {
                            Ok(l)
                        } else {
                            rhs.eval(vars)
                        }
                    }
                    BinOp::Or => {
                        if l != 0 {
                            Ok(l)
                        } else {
                            rhs.eval(vars)
                        }
                    }
                    _ => {
                        let r = rhs.eval(vars)?;
                        Ok(match op {
                            BinOp::Eq => (l == r) as i64,
                            BinOp::Ne => (l != r) as i64,
                            BinOp::Le => (l <= r) as i64,
                            BinOp::Ge => (l >= r) as i64,
                            BinOp::Lt => (l < r) as i64,
                            BinOp::Gt => (l > r) as i64,
                            BinOp::Add => l + r,
                            BinOp::Sub => l - r,
                            BinOp::And | BinOp::Or => unreachable!(),
                        })
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
/// One symbol occurrence in a template rule body, possibly captured and possibly
/// carrying template arguments of its own.
pub struct TemplateSymbol {
    pub loc: SrcLoc,
    pub name: String,
    pub params: Option<Vec<TemplateExpr>>,
    pub capture: Option<String>,
}

#[derive(Debug, Clone)]
/// The raw action block of a template rule.
pub struct TemplateAction {
    pub loc: SrcLoc,
    pub text: String,
}

#[derive(Debug, Clone)]
/// A parameterized production of a template nonterminal; `condition` is the combined
/// `where` clause that decides whether an instantiation keeps this rule.
pub struct TemplateRule {
    pub loc: SrcLoc,
    pub param_names: Vec<String>,
    pub condition: Option<TemplateExpr>,
    pub symbols: Vec<TemplateSymbol>,
    pub action: Option<TemplateAction>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a template nonterminal inside the [TemplateSet].
pub struct TmplId(pub usize);

/// A nonterminal with compile-time integer parameters. Concrete instances are memoized
/// per argument tuple.
pub struct TemplateNonTerminal {
    pub loc: SrcLoc,
    pub name: String,
    pub param_count: usize,
    pub rules: Vec<TemplateRule>,
    pub ty: TypeId,
    pub instances: HashMap<Vec<i64>, NtId>,
}

/// One rule instantiation's contribution to type inference: the instance's type must
/// reconcile with the non-void types flowing out of the rule body.
pub struct TypeConstraint {
    pub loc: SrcLoc,
    pub nt: NtId,
    pub ty: TypeId,
    pub params: Vec<(Option<String>, TypeId)>,
}

/// All template nonterminals of a grammar plus the constraints their instantiations
/// have emitted so far.
pub struct TemplateSet {
    pub templates: Vec<TemplateNonTerminal>,
    by_name: HashMap<String, TmplId>,
    pub constraints: Vec<TypeConstraint>,
}

impl TemplateSet {
    pub fn new() -> Self {
        Self {
            templates: Vec::new(),
            by_name: HashMap::new(),
            constraints: Vec::new(),
        }
    }

    pub fn add_template(
        &mut self,
        loc: SrcLoc,
        name: String,
        param_count: usize,
        ty: TypeId,
    ) -> TmplId {
        let id = TmplId(self.templates.len());
        self.templates.push(TemplateNonTerminal {
            loc,
            name: name.clone(),
            param_count,
            rules: Vec::new(),
            ty,
            instances: HashMap::new(),
        });
        self.by_name.insert(name, id);
        id
    }

    pub fn find_template(&self, name: &str) -> Option<TmplId> {
        self.by_name.get(name).copied()
    }
}
