use crate::parser::grammar::TermSymId;
use crate::parser::lhtable::{MegaId, MegaNode};
use crate::parser::ll::{LlBuilder, LlItem};
use crate::parser::ParserOutput;
use crate::{Log, Project, SourceText};

fn build(grammar: &str) -> (Project, ParserOutput) {
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).expect("grammar should load");
    project.process().expect("grammar should process");
    let output = project.build_parser().expect("parser should build");
    (project, output)
}

fn try_build(grammar: &str) -> Result<(), String> {
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).map_err(|e| e.to_string())?;
    project.process().map_err(|e| e.to_string())?;
    project.build_parser().map_err(|e| e.to_string())?;
    Ok(())
}

fn term(project: &Project, name: &str) -> TermSymId {
    project
        .parser
        .grammar
        .find_terminal(name)
        .unwrap_or_else(|| panic!("terminal '{}' should exist", name))
}

fn tokens(project: &Project, names: &[&str]) -> Vec<TermSymId> {
    let mut out: Vec<TermSymId> = names.iter().map(|name| term(project, name)).collect();
    out.push(term(project, "eof"));
    out
}

/// Flatten executed megaactions into the action source texts, dropping shifts.
fn action_sources(project: &Project, output: &ParserOutput, megas: &[MegaId]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for mega in megas {
        for node in &output.table.megaaction(*mega).nodes {
            if let MegaNode::Action(action) = node {
                out.push(project.parser.grammar.actions[action.0].source.trim().to_string());
            }
        }
    }
    out
}

#[test]
fn nullable_chain_runs_witness_actions_once_in_order() {
    let grammar = r#"
[terminals]
    x : TX ;
    y : TY ;
    end : TEnd ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;
    optx : "" ;
    opty : "" ;
    prog : "" ;

[parser.grammar]
    optx : {{ f }} ;
    optx : x {{ fx }} ;
    opty : {{ g }} ;
    opty : y {{ gy }} ;
    prog : optx opty end {{ h }} ;

[parser.expose]
    prog ;
"#;
    let (project, output) = build(grammar);
    let entry = output.table.entries[0].1;

    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["end"]))
        .expect("empty optionals should parse");
    assert_eq!(action_sources(&project, &output, &megas), vec!["f", "g", "h"]);

    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["x", "end"]))
        .expect("single optional should parse");
    assert_eq!(action_sources(&project, &output, &megas), vec!["fx", "g", "h"]);

    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["x", "y", "end"]))
        .expect("both optionals should parse");
    assert_eq!(
        action_sources(&project, &output, &megas),
        vec!["fx", "gy", "h"]
    );
}

#[test]
fn left_recursion_builds_left_associative_actions() {
    let grammar = r#"
[terminals]
    num : TNum ;
    plus : TPlus ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;
    expr : "Node" ;

[parser.grammar]
    expr : expr plus num {{ add }} ;
    expr : num {{ lit }} ;

[parser.expose]
    expr ;
"#;
    let (project, output) = build(grammar);
    let entry = output.table.entries[0].1;

    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["num", "plus", "num", "plus", "num"]))
        .expect("1+2+3 should parse");
    // ((1+2)+3): the first reduction fires right after the second operand.
    assert_eq!(
        action_sources(&project, &output, &megas),
        vec!["lit", "add", "add"]
    );

    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["num"]))
        .expect("a bare number should parse");
    assert_eq!(action_sources(&project, &output, &megas), vec!["lit"]);

    assert!(output
        .table
        .simulate(entry, &tokens(&project, &["plus"]))
        .is_err());
}

#[test]
fn left_factoring_leaves_one_dispatch_per_token() {
    let grammar = r#"
[terminals]
    x : TX ;
    y : TY ;
    z : TZ ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    a : x b ;
    a : x c ;
    b : y ;
    c : z ;

[parser.expose]
    a ;
"#;
    let (project, output) = build(grammar);
    let entry = output.table.entries[0].1;

    let entry_state = output.table.state(entry);
    assert_eq!(
        entry_state.transitions.len(),
        1,
        "the factored state dispatches once on 'x'"
    );
    assert!(entry_state.transitions.contains_key(&term(&project, "x")));
    assert!(entry_state.etransition.is_none());

    output
        .table
        .simulate(entry, &tokens(&project, &["x", "y"]))
        .expect("x y should parse");
    output
        .table
        .simulate(entry, &tokens(&project, &["x", "z"]))
        .expect("x z should parse");
    assert!(output
        .table
        .simulate(entry, &tokens(&project, &["y"]))
        .is_err());
}

#[test]
fn states_with_identical_shape_are_merged() {
    let grammar = r#"
[terminals]
    x : TX ;
    y : TY ;
    z : TZ ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    a : x b ;
    a : z c ;
    b : y ;
    c : y ;

[parser.expose]
    a ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    project.process().unwrap();

    let mut builder = LlBuilder::new(&project.parser.grammar, Log::None);
    builder.build().unwrap();

    let y = project.parser.grammar.find_terminal("y").unwrap();
    let shift_y_states = builder
        .list
        .iter()
        .filter(|&&state| {
            let state = builder.state(state);
            state.prods.len() == 1 && state.prods[0].items == vec![LlItem::Term(y)]
        })
        .count();
    assert_eq!(shift_y_states, 1, "b and c must share one merged state");
}

#[test]
fn long_productions_split_into_bounded_stacks() {
    let grammar = r#"
[terminals]
    t1 : T1 ;
    t2 : T2 ;
    t3 : T3 ;
    t4 : T4 ;
    t5 : T5 ;
    t6 : T6 ;
    t7 : T7 ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    s : t1 t2 t3 t4 t5 t6 t7 ;

[parser.expose]
    s ;
"#;
    let (project, output) = build(grammar);

    for &state in &output.table.list {
        for (_, transition) in &output.table.state(state).transitions {
            assert!(transition.stack.len() <= 4, "stack depth must stay bounded");
        }
        if let Some(transition) = &output.table.state(state).etransition {
            assert!(transition.stack.len() <= 4, "stack depth must stay bounded");
        }
    }

    let entry = output.table.entries[0].1;
    output
        .table
        .simulate(
            entry,
            &tokens(&project, &["t1", "t2", "t3", "t4", "t5", "t6", "t7"]),
        )
        .expect("the full sequence should parse");
    assert!(output
        .table
        .simulate(entry, &tokens(&project, &["t1", "t2", "t3"]))
        .is_err());
}

#[test]
fn templates_instantiate_with_where_conditions() {
    let grammar = r#"
[terminals]
    item : TItem ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    rep[n] where n > 0 : item rep[n - 1] ;
    rep[n] where n == 0 : ;
    list : rep[3] ;

[parser.expose]
    list ;
"#;
    let (project, output) = build(grammar);
    let entry = output.table.entries[0].1;

    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["item", "item", "item"]))
        .expect("exactly three items should parse");
    assert_eq!(megas.len(), 3, "three shifts expected");

    assert!(output
        .table
        .simulate(entry, &tokens(&project, &["item", "item"]))
        .is_err());

    // The exported nonterminal consumes exactly three items; the rest of the input is
    // left to the caller.
    let megas = output
        .table
        .simulate(entry, &tokens(&project, &["item", "item", "item", "item"]))
        .expect("the entry parses a three-item prefix");
    assert_eq!(megas.len(), 3);
}

#[test]
fn template_arity_mismatch_is_rejected() {
    let grammar = r#"
[terminals]
    item : TItem ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    rep[n] where n > 0 : item rep[n - 1] ;
    rep[n] where n == 0 : ;
    list : rep[1, 2] ;

[parser.expose]
    list ;
"#;
    let err = try_build(grammar).unwrap_err();
    assert!(err.contains("mismatch number of template arguments"), "{}", err);
}

#[test]
fn captures_are_checked_at_declaration() {
    let ambiguous = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "Tok" ;

[parser.grammar]
    s : x x {{ $x }} ;

[parser.expose]
    s ;
"#;
    let err = try_build(ambiguous).unwrap_err();
    assert!(err.contains("ambiguous capture '$x'"), "{}", err);

    let undefined = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "Tok" ;

[parser.grammar]
    s : x {{ $y }} ;

[parser.expose]
    s ;
"#;
    let err = try_build(undefined).unwrap_err();
    assert!(err.contains("undefined capture '$y'"), "{}", err);

    let unused = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "Tok" ;

[parser.grammar]
    s : c=x ;

[parser.expose]
    s ;
"#;
    let err = try_build(unused).unwrap_err();
    assert!(err.contains("capture '$c' is not used"), "{}", err);
}

#[test]
fn identity_actions_are_simplified_away() {
    let grammar = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "Tok" ;

[parser.grammar]
    s : c=x {{ $c }} ;

[parser.expose]
    s ;
"#;
    let (project, _) = build(grammar);
    assert!(
        project.parser.grammar.registered.is_empty(),
        "an identity action must not be registered"
    );
}

#[test]
fn type_conflicts_are_reported() {
    let grammar = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "Tok" ;
    s : "Other" ;

[parser.grammar]
    s : c=x {{ $c }} ;

[parser.expose]
    s ;
"#;
    let err = try_build(grammar).unwrap_err();
    assert!(err.contains("cannot unify type"), "{}", err);
}

#[test]
fn uninferable_types_are_reported() {
    let grammar = r#"
[terminals]
    num : TNum ;
    plus : TPlus ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.grammar]
    sum : num ;
    sum : sum plus num ;

[parser.expose]
    sum ;
"#;
    // Without a terminal type every argument stays a free variable.
    let err = try_build(grammar).unwrap_err();
    assert!(err.contains("cannot infer type"), "{}", err);
}

#[test]
fn follow_sets_collect_successor_tokens() {
    let grammar = r#"
[terminals]
    x : TX ;
    y : TY ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    s : inner y ;
    inner : x ;

[parser.expose]
    s ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    project.process().unwrap();

    let mut builder = LlBuilder::new(&project.parser.grammar, Log::None);
    builder.build().unwrap();
    builder.compute_first_sets();
    builder.compute_follow_sets();

    let y = project.parser.grammar.find_terminal("y").unwrap();
    let followed_by_y = builder
        .list
        .iter()
        .any(|&state| builder.state(state).follow.contains(&y));
    assert!(followed_by_y, "some state must be followed by 'y'");
}
