use std::{fs, path::PathBuf, process};

use clap::{Parser, Subcommand};
use colored::Colorize;

use sable::options::{ClassSpec, EvalOptions};
use sable::reader::Source;
use sable::repl::Repl;
use sable::runtime::Runtime;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "sable")]
#[command(version = VERSION)]
#[command(about = "A small sandboxed Lisp interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Allow every host class (the sandbox denies them by default)
    #[arg(long, global = true)]
    allow_all_classes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive REPL
    Repl,

    /// Execute a source file
    Run {
        /// Path to the source file
        file: PathBuf,
    },

    /// Evaluate an expression and print the result
    Eval {
        /// The expression to evaluate
        expr: String,
    },
}

fn options_from(cli: &Cli) -> EvalOptions {
    EvalOptions {
        classes: if cli.allow_all_classes {
            ClassSpec::AllowAll
        } else {
            ClassSpec::Deny
        },
        ..EvalOptions::default()
    }
}

fn main() {
    let cli = Cli::parse();
    let runtime = Runtime::with_options(options_from(&cli));

    let result = match &cli.command {
        Some(Commands::Repl) | None => {
            Repl::new(runtime).run();
            Ok(())
        }
        Some(Commands::Run { file }) => match fs::read_to_string(file) {
            Ok(source) => runtime
                .eval_string(&source, Source::File(file.clone()))
                .map(|value| println!("{}", value.pr_str())),
            Err(err) => {
                eprintln!(
                    "{} failed to read {}: {}",
                    "error:".red().bold(),
                    file.display(),
                    err
                );
                process::exit(1);
            }
        },
        Some(Commands::Eval { expr }) => runtime
            .eval_string(expr, Source::Repl)
            .map(|value| println!("{}", value.pr_str())),
    };

    if let Err(diag) = result {
        eprintln!("{}", "error".red().bold());
        eprintln!("{}", diag.format());
        process::exit(1);
    }
}
