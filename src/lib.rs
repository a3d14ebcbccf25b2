//! sable: a small, sandboxed interpreter for a Clojure-family Lisp.
//!
//! The core is a tree-walking evaluator over analyzed nodes: the reader
//! produces spanned forms, the analyzer resolves operators and tags nodes,
//! and the interpreter dispatches on the node discriminant while tracking
//! namespaces, vars, dynamic bindings and the host interop sandbox.

pub mod analyzer;
pub mod collections;
pub mod core;
pub mod env;
pub mod error;
pub mod eval;
pub mod host;
pub mod interner;
pub mod lazy;
pub mod macros;
pub mod natives;
pub mod options;
pub mod reader;
pub mod repl;
pub mod runtime;
pub mod value;

pub use env::Ctx;
pub use error::{Diagnostic, Error, SpannedError};
pub use options::EvalOptions;
pub use runtime::Runtime;
pub use value::Value;
