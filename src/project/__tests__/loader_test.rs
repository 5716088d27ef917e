use crate::emit::{self, ParserTables};
use crate::{Project, SourceText};

fn parse(grammar: &str) -> Result<Project, String> {
    let source = SourceText::new("test.grammar", grammar.to_string());
    Project::parse(&source).map_err(|err| err.to_string())
}

#[test]
fn every_section_loads_into_the_model() {
    let grammar = r#"
# A grammar exercising every section.
[terminals]
    num : TNum ;
    plus : TPlus ;
    ws : TWs { skip } ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.fragments]
    digit : [0-9] ;

[lexer.grammar]
    num : <digit>+ ;
    plus : "+" ;
    ws : " "+ ;

[parser.types]
    terminal : "" ;
    sum : "" ;

[parser.vm_args]
    arena : Arena ;

[parser.vm_actions]
    shift : {{ push(token); }} ;
    sync_skip : {{ note_skip(); }} ;
    sync_insert : {{ note_insert(); }} ;

[parser.grammar]
    sum : num ;
    sum : sum plus num ;

[parser.expose]
    sum ;

[parser.header]
struct Extra;

[parser.source]
static int counter = 0;
"#;
    let mut project = parse(grammar).unwrap();
    project.process().unwrap();

    assert_eq!(project.shared.terminal_count(), 5);
    assert!(project.shared.find_terminal("num").is_some());
    let ws = project.shared.terminal(project.shared.find_terminal("ws").unwrap());
    assert!(ws.skip);

    let grammar = &project.parser.grammar;
    assert_eq!(grammar.vm_args.len(), 1);
    assert!(grammar.vm_actions.contains_key("shift"));
    assert!(grammar.vm_actions.contains_key("sync_skip"));
    assert!(grammar
        .parser_header
        .as_ref()
        .unwrap()
        .contents
        .contains("struct Extra"));
    assert!(grammar
        .parser_source
        .as_ref()
        .unwrap()
        .contents
        .contains("counter"));
    assert_eq!(grammar.exports.len(), 1);

    project.build_lexer().unwrap();
    project.build_parser().unwrap();
}

#[test]
fn string_escapes_resolve_in_names() {
    let grammar = r#"
[terminals]
    "wh\x41t" : TWhat ;
    "nl\n" : TNl ;
    bad : TBad { error } ;
    eof : TEof { eof } ;
"#;
    let project = parse(grammar).unwrap();
    assert!(project.shared.find_terminal("whAt").is_some());
    assert!(project.shared.find_terminal("nl\n").is_some());
}

#[test]
fn terminal_errors_carry_positions() {
    let err = parse("\n[unknown.section]\n").unwrap_err();
    assert!(err.starts_with("test.grammar(2, "), "{}", err);
    assert!(err.contains("unknown section"), "{}", err);

    let err = parse(
        r#"
[terminals]
    num : TNum ;
    num : TNum2 ;
"#,
    )
    .unwrap_err();
    assert!(err.contains("terminal 'num' already defined"), "{}", err);

    let err = parse(
        r#"
[terminals]
    num : TNum { shiny } ;
"#,
    )
    .unwrap_err();
    assert!(err.contains("invalid tag shiny"), "{}", err);

    let err = parse(
        r#"
[terminals]
    e1 : TE1 { error } ;
    e2 : TE2 { error } ;
"#,
    )
    .unwrap_err();
    assert!(err.contains("error terminal e1 already defined"), "{}", err);
}

#[test]
fn terminal_values_respect_explicit_assignments() {
    let grammar = r#"
[terminals]
    a : TA ;
    b : TB { value = 2 } ;
    c : TC ;
    bad : TBad { error } ;
    eof : TEof { eof } ;
"#;
    let mut project = parse(grammar).unwrap();
    project.shared.base_dir = ".".to_string();
    project.process().unwrap();

    let value_of = |name: &str| {
        project
            .shared
            .terminal(project.shared.find_terminal(name).unwrap())
            .value
            .unwrap()
    };
    assert_eq!(value_of("a"), 0);
    assert_eq!(value_of("b"), 2);
    assert_eq!(value_of("c"), 1);
    assert_eq!(value_of("bad"), 3);
    assert_eq!(value_of("eof"), 4);
}

#[test]
fn missing_eof_terminal_is_rejected() {
    let grammar = r#"
[terminals]
    num : TNum ;
    bad : TBad { error } ;
"#;
    let mut project = parse(grammar).unwrap();
    let err = project.process().unwrap_err();
    assert!(err.message.contains("no terminal designated for {eof}"), "{}", err);
}

#[test]
fn action_blocks_balance_their_braces() {
    let grammar = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.types]
    terminal : "" ;
    s : "Code" ;

[parser.grammar]
    s : x {{{ if (a) { b } }}} ;

[parser.expose]
    s ;
"#;
    let mut project = parse(grammar).unwrap();
    project.process().unwrap();
    let sources: Vec<&str> = project
        .parser
        .grammar
        .registered
        .iter()
        .map(|action| project.parser.grammar.actions[action.0].source.as_str())
        .collect();
    assert_eq!(sources, vec!["if (a) { b }"]);
}

#[test]
fn unterminated_action_is_rejected() {
    let grammar = r#"
[terminals]
    x : TX ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[parser.grammar]
    s : x {{ never closed } ;
"#;
    let err = parse(grammar).unwrap_err();
    assert!(err.contains("action is not terminated"), "{}", err);
}

#[test]
fn tables_emit_deterministically() {
    let grammar = r#"
[terminals]
    num : TNum ;
    plus : TPlus ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    num : [0-9]+ ;
    plus : "+" ;

[parser.types]
    terminal : "" ;
    sum : "" ;

[parser.grammar]
    sum : num ;
    sum : sum plus num ;

[parser.expose]
    sum ;
"#;
    let build = || {
        let source = SourceText::new("test.grammar", grammar.to_string());
        let mut project = Project::parse(&source).unwrap();
        project.process().unwrap();
        let lexer = project.build_lexer().unwrap();
        let parser = project.build_parser().unwrap();
        let tables = ParserTables::build(
            &project.parser.grammar,
            &project.parser.types,
            &parser.table,
            "PP",
            "pp",
        );
        (lexer, tables)
    };

    let (lexer1, parser1) = build();
    let (lexer2, parser2) = build();
    assert_eq!(lexer1.tables.trans, lexer2.tables.trans);
    assert_eq!(lexer1.tables.eq_classes, lexer2.tables.eq_classes);
    assert_eq!(lexer1.tables.accepts, lexer2.tables.accepts);
    assert_eq!(parser1.base, parser2.base);
    assert_eq!(parser1.table, parser2.table);
    assert_eq!(parser1.dispatch, parser2.dispatch);
    assert_eq!(parser1.sync_actions, parser2.sync_actions);
    assert_eq!(parser1.sync_states, parser2.sync_states);

    // End to end through the emitter.
    let dir = std::env::temp_dir().join(format!("lang_gen_emit_{}", std::process::id()));
    let header = dir.join("lexer.h");
    let source_file = dir.join("lexer.cpp");
    emit::emit_lexer(&lexer1.tables, Some(&header), Some(&source_file)).unwrap();
    let header_text = std::fs::read_to_string(&header).unwrap();
    assert!(header_text.contains("LL_TOKENS"));
    let source_text = std::fs::read_to_string(&source_file).unwrap();
    assert!(source_text.contains("trans_table"));

    let parser_header = dir.join("parser.h");
    let parser_source = dir.join("parser.cpp");
    emit::emit_parser(&parser1, Some(&parser_header), Some(&parser_source)).unwrap();
    let header_text = std::fs::read_to_string(&parser_header).unwrap();
    assert!(header_text.contains("PP_STATE_COUNT"));
    let source_text = std::fs::read_to_string(&parser_source).unwrap();
    assert!(source_text.contains("dispatch_data"));

    std::fs::remove_dir_all(&dir).ok();
}
