//! The top-level driver: owns the evaluation context and turns source
//! strings into values or diagnostics.

use std::sync::Arc;

use crate::env::Ctx;
use crate::error::Diagnostic;
use crate::eval;
use crate::options::{self, EvalOptions};
use crate::reader::Source;
use crate::value::Value;

pub type RuntimeRef = Arc<Runtime>;

#[derive(Debug)]
pub struct Runtime {
    ctx: Ctx,
}

impl Runtime {
    pub fn new() -> RuntimeRef {
        Self::with_options(EvalOptions::default())
    }

    pub fn with_options(opts: EvalOptions) -> RuntimeRef {
        Arc::new(Self { ctx: options::init_ctx(opts) })
    }

    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    /// Evaluates every form in the input and returns the last value (nil
    /// for empty input). Errors come back joined with the source text so
    /// they can render with line/column locations.
    pub fn eval_string(
        &self,
        src: &str,
        file: Source,
    ) -> Result<Value, Diagnostic> {
        eval::eval_source(&self.ctx, src)
            .map_err(|err| Diagnostic::new(err, src, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_nil() {
        let rt = Runtime::new();
        let value = rt.eval_string("", Source::Repl).unwrap();
        assert_eq!(value, Value::nil());
    }

    #[test]
    fn last_form_wins() {
        let rt = Runtime::new();
        let value = rt.eval_string("1 2 3", Source::Repl).unwrap();
        assert_eq!(value, Value::int(3));
    }

    #[test]
    fn top_level_do_defs_take_effect_progressively() {
        let rt = Runtime::new();
        let value = rt
            .eval_string("(do (def x 10) (def y (inc x)) y)", Source::Repl)
            .unwrap();
        assert_eq!(value, Value::int(11));
    }
}
