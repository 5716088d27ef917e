use clap::{arg, value_parser, Command};
use lang_gen::emit::{self, ParserTables};
use lang_gen::{Log, Project, SourceText};
use std::path::PathBuf;

fn command() -> Command {
    Command::new("lang-gen")
        .about("Generate lexer and parser tables from a formal grammar description")
        .arg(
            arg!(--"lexer-header" <PATH> "path to the generated lexer header")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"lexer-source" <PATH> "path to the generated lexer source")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"parser-header" <PATH> "path to the generated parser header")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"parser-source" <PATH> "path to the generated parser source")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"base-dir" <PATH> "base location for generated line directives")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(arg!(--"lexer-ns" <NAME> "namespace of the generated lexer").default_value("ll"))
        .arg(arg!(--"lexer-prefix" <NAME> "macro prefix of the generated lexer").default_value("LL"))
        .arg(arg!(--"parser-ns" <NAME> "namespace of the generated parser").default_value("pp"))
        .arg(
            arg!(--"parser-prefix" <NAME> "macro prefix of the generated parser")
                .default_value("PP"),
        )
        .arg(arg!(--verbose "print pipeline progress").required(false))
        .arg(arg!(<input> "grammar file"))
}

fn run() -> Result<(), String> {
    let matches = command().get_matches();

    let input = matches.get_one::<String>("input").expect("required arg");
    let source = SourceText::read(input).map_err(|err| format!("{}: {}", input, err))?;

    let mut project = Project::parse(&source).map_err(|err| err.to_string())?;
    project.log = if matches.get_flag("verbose") {
        Log::Verbose
    } else {
        Log::Default
    };
    project.process().map_err(|err| err.to_string())?;

    project.shared.base_dir = match matches.get_one::<PathBuf>("base-dir") {
        Some(base_dir) => base_dir.display().to_string(),
        None => std::env::current_dir()
            .map(|cwd| cwd.display().to_string())
            .unwrap_or_default(),
    };

    let lexer_header = matches.get_one::<PathBuf>("lexer-header");
    let lexer_source = matches.get_one::<PathBuf>("lexer-source");
    let parser_header = matches.get_one::<PathBuf>("parser-header");
    let parser_source = matches.get_one::<PathBuf>("parser-source");

    project.lexer.config.prefix = matches
        .get_one::<String>("lexer-prefix")
        .expect("defaulted")
        .clone();
    project.lexer.config.namespace = matches
        .get_one::<String>("lexer-ns")
        .expect("defaulted")
        .clone();
    project.parser.config.prefix = matches
        .get_one::<String>("parser-prefix")
        .expect("defaulted")
        .clone();
    project.parser.config.namespace = matches
        .get_one::<String>("parser-ns")
        .expect("defaulted")
        .clone();

    // Both pipelines always run; the emit flags only decide what gets written.
    let lexer_output = project.build_lexer().map_err(|err| err.to_string())?;
    let parser_output = project.build_parser().map_err(|err| err.to_string())?;

    let mut dry_run = true;

    if lexer_header.is_some() || lexer_source.is_some() {
        dry_run = false;
        emit::emit_lexer(
            &lexer_output.tables,
            lexer_header.map(|p| p.as_path()),
            lexer_source.map(|p| p.as_path()),
        )
        .map_err(|err| err.to_string())?;
    }

    if parser_header.is_some() || parser_source.is_some() {
        dry_run = false;
        let tables = ParserTables::build(
            &project.parser.grammar,
            &project.parser.types,
            &parser_output.table,
            &project.parser.config.prefix,
            &project.parser.config.namespace,
        );
        emit::emit_parser(
            &tables,
            parser_header.map(|p| p.as_path()),
            parser_source.map(|p| p.as_path()),
        )
        .map_err(|err| err.to_string())?;
    }

    if dry_run {
        println!("Dry run: no files generated");
    }
    Ok(())
}

fn main() {
    if let Err(message) = run() {
        eprintln!("{}", message);
        std::process::exit(1);
    }
}
