//! The cedilla command-line interface.
//!
//! Drives the pipeline: tokenize, validate, evaluate, resolve, write, and
//! optionally build. The process exits 0 iff the error count is 0.

pub mod args;

use clap::Parser;

use crate::cli::args::CedillaArgs;
use crate::errors::{print_error_report, TranspileError};
use crate::evaluator::EvaluatorEnvironment;
use crate::generators::import_fundamental_generators;
use crate::modules::ModuleManager;
use crate::syntax::TokenKind;

/// Run the CLI. Returns the process exit code.
pub fn run() -> i32 {
    let args = CedillaArgs::parse();

    if args.list_generators {
        list_generators();
        return 0;
    }

    let file = args
        .file
        .as_ref()
        .expect("clap requires a file unless --list-generators");
    let filename = file.display().to_string();

    let mut manager = ModuleManager::new(&args.output_dir);

    if args.tokens {
        return match manager.module_load_tokenize_validate(&filename) {
            Ok(tokens) => {
                print_tokens(&tokens);
                0
            }
            Err(error) => {
                report(error, args.pretty);
                1
            }
        };
    }

    if let Err(error) = manager.add_evaluate_file(&filename) {
        report(error, args.pretty);
        return 1;
    }
    if manager.has_errors() {
        drain_errors(&mut manager, args.pretty);
        return 1;
    }

    if !manager.evaluate_resolve_references() {
        drain_errors(&mut manager, args.pretty);
        return 1;
    }

    let written = match manager.write_generated_output() {
        Ok(written) => written,
        Err(error) => {
            report(error, args.pretty);
            return 1;
        }
    };
    for output in &written {
        println!(
            "{} -> {}, {}",
            filename,
            output.source_filename.display(),
            output.header_filename.display()
        );
    }

    if args.build {
        let mut built_outputs = Vec::new();
        if !manager.build(&mut built_outputs) {
            drain_errors(&mut manager, args.pretty);
            return 1;
        }
        for output in &built_outputs {
            println!("built {}", output.display());
        }
    }

    0
}

fn report(error: TranspileError, pretty: bool) {
    if pretty {
        print_error_report(error);
    } else {
        eprintln!("{error}");
    }
}

fn drain_errors(manager: &mut ModuleManager, pretty: bool) {
    for error in manager.environment.errors.drain(..) {
        if pretty {
            print_error_report(error);
        } else {
            eprintln!("{error}");
        }
    }
}

fn list_generators() {
    let mut environment = EvaluatorEnvironment::new();
    import_fundamental_generators(&mut environment);
    let mut names: Vec<&String> = environment.generators.keys().collect();
    names.sort();
    for name in names {
        println!("{name}");
    }
}

fn print_tokens(tokens: &[crate::syntax::Token]) {
    let mut nesting_depth = 0usize;
    for token in tokens {
        if token.kind == TokenKind::CloseParen {
            nesting_depth = nesting_depth.saturating_sub(1);
        }
        let indent = "  ".repeat(nesting_depth);
        match token.kind {
            TokenKind::OpenParen | TokenKind::CloseParen => {
                println!(
                    "{indent}{:<18} line {}, columns {}-{}",
                    token.kind.describe(),
                    token.line,
                    token.column_start,
                    token.column_end
                );
            }
            _ => {
                println!(
                    "{indent}{:<18} line {}, columns {}-{}\t{}",
                    token.kind.describe(),
                    token.line,
                    token.column_start,
                    token.column_end,
                    token.contents
                );
            }
        }
        if token.kind == TokenKind::OpenParen {
            nesting_depth += 1;
        }
    }
}
