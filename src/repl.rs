//! Interactive REPL on top of rustyline.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::reader::Source;
use crate::runtime::RuntimeRef;

pub struct Repl {
    runtime: RuntimeRef,
}

impl Repl {
    pub fn new(runtime: RuntimeRef) -> Self {
        Self { runtime }
    }

    pub fn run(&self) {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(err) => {
                eprintln!("{} {}", "error:".red().bold(), err);
                return;
            }
        };

        println!("sable {} — :quit or Ctrl-D to exit", env!("CARGO_PKG_VERSION"));
        loop {
            match editor.readline("sable> ") {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    if input == ":quit" {
                        break;
                    }
                    let _ = editor.add_history_entry(input);
                    match self.runtime.eval_string(input, Source::Repl) {
                        Ok(value) => println!("{}", value.pr_str()),
                        Err(diag) => {
                            eprintln!("{}", "error".red().bold());
                            eprintln!("{}", diag.format());
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("{} {}", "error:".red().bold(), err);
                    break;
                }
            }
        }
    }
}
