use crate::lexer::dfa::DfaBuilder;
use crate::lexer::minimize::minimize;
use crate::lexer::nfa::{NfaBuilder, NfaId, RuleId};
use crate::lexer::LexerOutput;
use crate::{Log, Project, SourceText};
use std::collections::HashSet;

fn build(grammar: &str) -> (Project, LexerOutput) {
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).expect("grammar should load");
    project.process().expect("grammar should process");
    let output = project.build_lexer().expect("lexer should build");
    (project, output)
}

fn accept_name(project: &Project, output: &LexerOutput, input: &[u8]) -> Option<String> {
    output.dfa.accept_rule(input).map(|rule| {
        let term = project.lexer.nfa().rules[rule.0].terminal;
        project.shared.terminal(term).name.clone()
    })
}

/// Direct NFA interpretation, used to cross-check subset construction.
fn nfa_accepts(nfa: &NfaBuilder, init: NfaId, input: &[u8]) -> bool {
    fn closure(nfa: &NfaBuilder, set: &mut HashSet<NfaId>) {
        let mut worklist: Vec<NfaId> = set.iter().copied().collect();
        while let Some(state) = worklist.pop() {
            for target in &nfa.states[state.0].etrans {
                if set.insert(*target) {
                    worklist.push(*target);
                }
            }
        }
    }

    let mut current: HashSet<NfaId> = HashSet::new();
    current.insert(init);
    closure(nfa, &mut current);
    for byte in input {
        let mut next: HashSet<NfaId> = HashSet::new();
        for state in &current {
            for (chars, target) in &nfa.states[state.0].trans {
                if chars.contains(*byte) {
                    next.insert(*target);
                }
            }
        }
        closure(nfa, &mut next);
        current = next;
        if current.is_empty() {
            return false;
        }
    }
    current.iter().any(|state| nfa.states[state.0].rule.is_some())
}

const NUM_GRAMMAR: &str = r#"
[terminals]
    num : TNum ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    num : [0-9]+ ;
"#;

#[test]
fn unit_regex_lexes_numbers() {
    let (project, output) = build(NUM_GRAMMAR);
    assert_eq!(accept_name(&project, &output, b"42"), Some("num".to_string()));
    assert_eq!(accept_name(&project, &output, b"7"), Some("num".to_string()));
    // A bad character lands in the injected error state and surfaces the error token.
    assert_eq!(accept_name(&project, &output, b"a"), Some("bad".to_string()));
}

#[test]
fn overlapping_accepts_prefer_declaration_order() {
    let grammar = r#"
[terminals]
    kw_if : TIf ;
    ident : TIdent ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    kw_if : "if" ;
    ident : [a-z]+ ;
"#;
    let (project, output) = build(grammar);
    assert_eq!(accept_name(&project, &output, b"if"), Some("kw_if".to_string()));
    assert_eq!(
        accept_name(&project, &output, b"ifx"),
        Some("ident".to_string())
    );
    assert_eq!(accept_name(&project, &output, b"i"), Some("ident".to_string()));
}

#[test]
fn dfa_matches_nfa_language() {
    let grammar = r#"
[terminals]
    word : TWord ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.fragments]
    alpha : [a-c] ;

[lexer.grammar]
    word : <alpha> (<alpha> | [0-1])* ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    project.process().unwrap();

    // Rebuild the raw subset DFA so the comparison is not affected by the error state.
    let nfa = project.lexer.nfa();
    // The error rule is only dereferenced when keywords are promoted; none are here.
    let error_rule = RuleId(nfa.rules.len());
    let builder = DfaBuilder::new(nfa, error_rule, 0, Log::None);
    let dfa_output = builder.build(project.lexer.nfa_initial());

    let samples: &[&[u8]] = &[
        b"a", b"b", b"c", b"ab", b"a0", b"a01bc", b"0", b"0a", b"", b"abcabc1",
    ];
    for sample in samples {
        assert_eq!(
            dfa_output.dfa.accepts(sample),
            nfa_accepts(nfa, project.lexer.nfa_initial(), sample),
            "language mismatch on {:?}",
            String::from_utf8_lossy(sample)
        );
    }
}

#[test]
fn minimization_is_idempotent_and_preserves_language() {
    let grammar = r#"
[terminals]
    word : TWord ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    word : (ab | ac)+ ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    project.process().unwrap();

    let nfa = project.lexer.nfa();
    let error_rule = RuleId(nfa.rules.len());
    let builder = DfaBuilder::new(nfa, error_rule, 0, Log::None);
    let dfa_output = builder.build(project.lexer.nfa_initial());

    let min1 = minimize(&dfa_output.dfa, &nfa.rules);
    let min2 = minimize(&min1, &nfa.rules);

    assert!(min1.visit(min1.initial).len() <= dfa_output.dfa.visit(dfa_output.dfa.initial).len());
    assert_eq!(
        min1.visit(min1.initial).len(),
        min2.visit(min2.initial).len(),
        "second minimization must be a no-op"
    );

    let samples: &[&[u8]] = &[b"ab", b"ac", b"abac", b"a", b"abab", b"b", b""];
    for sample in samples {
        assert_eq!(dfa_output.dfa.accepts(sample), min1.accepts(sample));
        assert_eq!(min1.accepts(sample), min2.accepts(sample));
    }
}

#[test]
fn keywords_are_extracted_and_rewritten() {
    let grammar = r#"
[terminals]
    kw_if : TIf ;
    ident : TIdent ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    kw_if : "if" ;
    ident : [a-z]+ ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    project.process().unwrap();
    project.lexer.config.keyword_threshold = 2;
    let output = project.build_lexer().unwrap();

    let keyword_rules: Vec<String> = output
        .keywords
        .values()
        .map(|keyword| {
            let term = project.lexer.nfa().rules[keyword.rule.0].terminal;
            project.shared.terminal(term).name.clone()
        })
        .collect();
    assert_eq!(keyword_rules, vec!["kw_if".to_string()]);
    let keyword = output.keywords.values().next().unwrap();
    assert_eq!(keyword.strings, vec!["if".to_string()]);

    // The keyword state now continues as an identifier.
    assert_eq!(accept_name(&project, &output, b"if"), Some("ident".to_string()));
}

#[test]
fn fragments_expand_and_reject_cycles() {
    let grammar = r#"
[terminals]
    hex : THex ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.fragments]
    digit : [0-9a-f] ;

[lexer.grammar]
    hex : "0x" <digit>+ ;
"#;
    let (project, output) = build(grammar);
    assert_eq!(accept_name(&project, &output, b"0x1f"), Some("hex".to_string()));

    let cyclic = r#"
[terminals]
    t : TT ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.fragments]
    a : <b> ;
    b : <a> ;

[lexer.grammar]
    t : <a> ;
"#;
    let source = SourceText::new("test.grammar", cyclic.to_string());
    let mut project = Project::parse(&source).unwrap();
    let err = project.process().unwrap_err();
    assert!(err.message.contains("refers to itself"), "{}", err);
}

#[test]
fn shadowed_rules_are_useless_but_not_fatal() {
    // `dup` accepts exactly the strings `num` already claims with higher priority, so
    // no state ever produces it; the generator reports it on stderr and carries on.
    let grammar = r#"
[terminals]
    num : TNum ;
    dup : TDup ;
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    num : [0-9]+ ;
    dup : [0-9]+ ;
"#;
    let (project, output) = build(grammar);
    assert_eq!(accept_name(&project, &output, b"7"), Some("num".to_string()));
    let dup = project.shared.find_terminal("dup").unwrap();
    let produced = output.dfa.visit(output.dfa.initial).iter().any(|state| {
        output.dfa.states[state.0]
            .accept
            .map(|rule| project.lexer.nfa().rules[rule.0].terminal == dup)
            .unwrap_or(false)
    });
    assert!(!produced, "a shadowed rule must never surface");
}

#[test]
fn unknown_terminal_in_lexer_rule_is_rejected() {
    let grammar = r#"
[terminals]
    bad : TBad { error } ;
    eof : TEof { eof } ;

[lexer.grammar]
    mystery : [0-9] ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    let err = project.process().unwrap_err();
    assert!(err.message.contains("terminal 'mystery' not found"), "{}", err);
}

#[test]
fn missing_error_terminal_is_rejected() {
    let grammar = r#"
[terminals]
    num : TNum ;
    eof : TEof { eof } ;

[lexer.grammar]
    num : [0-9]+ ;
"#;
    let source = SourceText::new("test.grammar", grammar.to_string());
    let mut project = Project::parse(&source).unwrap();
    project.process().unwrap();
    let err = project.build_lexer().unwrap_err();
    assert!(err.message.contains("no {error} terminal found"), "{}", err);
}
