use crate::{GenResult, GrammarError, SrcLoc};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
/// Index of a type inside the [TypeArena].
pub struct TypeId(pub usize);

#[derive(Debug, Clone)]
enum TypeNode {
    Void,
    Constant {
        name: String,
    },
    Variable {
        name: String,
        parent: Option<TypeId>,
        merge_loc: Option<SrcLoc>,
    },
}

/// Union-find arena over semantic value types.
///
/// A `Variable` unifies with anything by pointing its parent at the other
/// representative; `Void` unifies only with `Void` and variables; two distinct
/// constants refuse to unify. After solving, every variable chain ends in `Void` or a
/// constant, and the location recorded at each merge supports diagnostics.
#[derive(Debug)]
pub struct TypeArena {
    nodes: Vec<TypeNode>,
    void: TypeId,
    next_var: u32,
}

impl TypeArena {
    pub fn new() -> Self {
        Self {
            nodes: vec![TypeNode::Void],
            void: TypeId(0),
            next_var: 1,
        }
    }

    pub fn void(&self) -> TypeId {
        self.void
    }

    pub fn constant(&mut self, name: String) -> TypeId {
        let id = TypeId(self.nodes.len());
        self.nodes.push(TypeNode::Constant { name });
        id
    }

    pub fn fresh_var(&mut self, name: Option<&str>) -> TypeId {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let name = self.next_var.to_string();
                self.next_var += 1;
                name
            }
        };
        let id = TypeId(self.nodes.len());
        self.nodes.push(TypeNode::Variable {
            name,
            parent: None,
            merge_loc: None,
        });
        id
    }

    /// The representative at the end of the parent chain.
    pub fn repr(&self, ty: TypeId) -> TypeId {
        let mut current = ty;
        loop {
            match &self.nodes[current.0] {
                TypeNode::Variable {
                    parent: Some(parent),
                    ..
                } => current = *parent,
                _ => return current,
            }
        }
    }

    pub fn is_void(&self, ty: TypeId) -> bool {
        self.repr(ty) == self.void
    }

    pub fn is_variable(&self, ty: TypeId) -> bool {
        matches!(
            self.nodes[self.repr(ty).0],
            TypeNode::Variable { parent: None, .. }
        )
    }

    /// The location of the merge that pinned a variable chain down, used to point at
    /// the other side of a unification conflict.
    pub fn origin(&self, ty: TypeId) -> Option<SrcLoc> {
        match &self.nodes[ty.0] {
            TypeNode::Variable {
                parent: Some(parent),
                merge_loc,
                ..
            } => self.origin(*parent).or_else(|| merge_loc.clone()),
            _ => None,
        }
    }

    pub fn display(&self, ty: TypeId) -> String {
        match &self.nodes[self.repr(ty).0] {
            TypeNode::Void => "void".to_string(),
            TypeNode::Constant { name } => name.clone(),
            TypeNode::Variable { name, .. } => format!("%{}", name),
        }
    }

    pub fn unify(&mut self, loc: &SrcLoc, ty1: TypeId, ty2: TypeId) -> GenResult<()> {
        let rty1 = self.repr(ty1);
        let rty2 = self.repr(ty2);
        if rty1 == rty2 {
            return Ok(());
        }
        let merge = |arena: &mut Self, var: TypeId, other: TypeId| {
            match &mut arena.nodes[var.0] {
                TypeNode::Variable {
                    parent, merge_loc, ..
                } => {
                    *parent = Some(other);
                    *merge_loc = Some(loc.clone());
                }
                _ => panic!("INTERNAL ERROR: merge target is not a variable"),
            }
        };
        if matches!(self.nodes[rty1.0], TypeNode::Variable { .. }) {
            merge(self, rty1, rty2);
            Ok(())
        } else if matches!(self.nodes[rty2.0], TypeNode::Variable { .. }) {
            merge(self, rty2, rty1);
            Ok(())
        } else {
            let origin_str = match self.origin(ty2) {
                Some(origin) => format!(" (from {})", origin),
                None => String::new(),
            };
            Err(GrammarError::new(
                loc.clone(),
                format!(
                    "cannot unify type '{}' with '{}'{}",
                    self.display(rty1),
                    self.display(rty2),
                    origin_str
                ),
            ))
        }
    }
}
