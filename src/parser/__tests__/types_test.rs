use crate::parser::types::TypeArena;
use crate::SrcLoc;
use std::rc::Rc;

fn loc() -> SrcLoc {
    SrcLoc::new(Rc::from("test.grammar"), 0, 0)
}

#[test]
fn variables_unify_with_anything() {
    let mut types = TypeArena::new();
    let var = types.fresh_var(None);
    let node = types.constant("Node".to_string());

    types.unify(&loc(), var, node).unwrap();
    assert_eq!(types.repr(var), node);
    assert_eq!(types.display(var), "Node");
    assert!(!types.is_variable(var));

    let var2 = types.fresh_var(None);
    let void = types.void();
    types.unify(&loc(), void, var2).unwrap();
    assert!(types.is_void(var2));
}

#[test]
fn variable_chains_collapse_to_one_representative() {
    let mut types = TypeArena::new();
    let a = types.fresh_var(Some("a"));
    let b = types.fresh_var(Some("b"));
    let c = types.fresh_var(Some("c"));
    types.unify(&loc(), a, b).unwrap();
    types.unify(&loc(), b, c).unwrap();

    let node = types.constant("Node".to_string());
    types.unify(&loc(), a, node).unwrap();
    assert_eq!(types.repr(a), node);
    assert_eq!(types.repr(b), node);
    assert_eq!(types.repr(c), node);
}

#[test]
fn distinct_constants_refuse_to_unify() {
    let mut types = TypeArena::new();
    let a = types.constant("A".to_string());
    let b = types.constant("B".to_string());
    let err = types.unify(&loc(), a, b).unwrap_err();
    assert!(err.message.contains("cannot unify type 'A' with 'B'"), "{}", err);

    let void = types.void();
    let err = types.unify(&loc(), a, void).unwrap_err();
    assert!(err.message.contains("cannot unify"), "{}", err);
}

#[test]
fn unification_is_idempotent() {
    let mut types = TypeArena::new();
    let var = types.fresh_var(None);
    let node = types.constant("Node".to_string());
    types.unify(&loc(), var, node).unwrap();
    // Re-unifying already-unified types must be a no-op.
    types.unify(&loc(), var, node).unwrap();
    types.unify(&loc(), node, var).unwrap();
    assert_eq!(types.repr(var), node);

    let void = types.void();
    types.unify(&loc(), void, void).unwrap();
}
