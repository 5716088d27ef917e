use crate::parser::grammar::TermSymId;
use crate::parser::recovery::{simulate_with_recovery, RecoveryStep};
use crate::parser::ParserOutput;
use crate::{Project, SourceText};

fn build(grammar: &str) -> (Project, ParserOutput) {
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).expect("grammar should load");
    project.process().expect("grammar should process");
    let output = project.build_parser().expect("parser should build");
    (project, output)
}

fn term(project: &Project, name: &str) -> TermSymId {
    project.parser.grammar.find_terminal(name).unwrap()
}

fn tokens(project: &Project, names: &[&str]) -> Vec<TermSymId> {
    let mut out: Vec<TermSymId> = names.iter().map(|name| term(project, name)).collect();
    out.push(term(project, "eof"));
    out
}

const ABC_GRAMMAR: &str = r#"
[terminals]
    a : TA ;
    b : TB ;
    c : TC ;
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;

[parser.grammar]
    s : a b c ;

[parser.expose]
    s ;
"#;

#[test]
fn skip_costs_are_finite_for_every_state() {
    let (_, output) = build(ABC_GRAMMAR);
    for &state in &output.table.list {
        let sync_skip = output.table.state(state).sync_skip.as_ref();
        let (cost, _) = sync_skip.expect("every reachable state can complete");
        assert!(*cost <= output.table.list.len() as u64 * 4);
    }
}

#[test]
fn sync_entries_reach_every_dispatched_token() {
    let (_, output) = build(ABC_GRAMMAR);
    for &state in &output.table.list {
        let state = output.table.state(state);
        for term in state.transitions.keys() {
            let entry = state
                .sync
                .get(term)
                .expect("a dispatched token must have a sync entry");
            assert_eq!(entry.cost, 0, "dispatching the token itself is free");
        }
    }
}

#[test]
fn bad_token_is_skipped_and_missing_token_inserted() {
    let (project, output) = build(ABC_GRAMMAR);
    let entry = output.table.entries[0].1;

    let steps = simulate_with_recovery(&output.table, entry, &tokens(&project, &["a", "x", "c"]))
        .expect("recovery should complete the parse");

    let skips: Vec<&RecoveryStep> = steps
        .iter()
        .filter(|step| matches!(step, RecoveryStep::SyncSkip(_)))
        .collect();
    assert_eq!(skips.len(), 1, "exactly one token is skipped");
    assert!(matches!(skips[0], RecoveryStep::SyncSkip(term_id) if *term_id == term(&project, "x")));

    let inserts: Vec<&RecoveryStep> = steps
        .iter()
        .filter(|step| matches!(step, RecoveryStep::SyncInsert(_)))
        .collect();
    assert_eq!(inserts.len(), 1, "the missing 'b' is synthesized");
    assert!(
        matches!(inserts[0], RecoveryStep::SyncInsert(term_id) if *term_id == term(&project, "b"))
    );
}

#[test]
fn clean_input_needs_no_recovery() {
    let (project, output) = build(ABC_GRAMMAR);
    let entry = output.table.entries[0].1;

    let steps = simulate_with_recovery(&output.table, entry, &tokens(&project, &["a", "b", "c"]))
        .expect("a clean parse should not fail");
    assert!(steps
        .iter()
        .all(|step| matches!(step, RecoveryStep::Mega(_))));
}

#[test]
fn missing_leading_token_is_inserted() {
    let (project, output) = build(ABC_GRAMMAR);
    let entry = output.table.entries[0].1;

    // Dropping 'a' forces a sync insertion before 'b' can be consumed.
    let steps = simulate_with_recovery(&output.table, entry, &tokens(&project, &["b", "c"]))
        .expect("recovery should complete the parse");
    let inserts: Vec<&RecoveryStep> = steps
        .iter()
        .filter(|step| matches!(step, RecoveryStep::SyncInsert(_)))
        .collect();
    assert_eq!(inserts.len(), 1);
    assert!(
        matches!(inserts[0], RecoveryStep::SyncInsert(term_id) if *term_id == term(&project, "a"))
    );
}
