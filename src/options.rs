//! Evaluation options and the context initialiser.

use std::sync::{Arc, RwLock};

use crate::env::{Ctx, CtxOpts, GlobalEnv, LoadFn, PublicClassFn};
use crate::host::{self, ClassAllowList};
use crate::interner;
use crate::natives;
use crate::value::{Bindings, Value};

/// Which host classes the sandbox exposes.
#[derive(Debug, Clone, Default)]
pub enum ClassSpec {
    /// Nothing is allowed (the default).
    #[default]
    Deny,
    /// Every class is allowed.
    AllowAll,
    /// Only the named classes are allowed.
    Allow(Vec<String>),
}

/// Options recognised by the context initialiser. Each is independent.
#[derive(Default)]
pub struct EvalOptions {
    /// Preloaded namespaces: name to (var name, value) pairs.
    pub namespaces: Vec<(String, Vec<(String, Value)>)>,
    /// The initial lexical frame.
    pub bindings: Vec<(String, Value)>,
    pub classes: ClassSpec,
    pub load_fn: Option<LoadFn>,
    pub realize_max: Option<usize>,
    pub dry_run: bool,
    pub public_class: Option<PublicClassFn>,
}

/// Builds the evaluation context: global env with the core library
/// installed, the `user` namespace current, preloads applied, and the
/// sandbox options frozen.
pub fn init_ctx(opts: EvalOptions) -> Ctx {
    let mut env = GlobalEnv::new();
    natives::install_core(&mut env);

    for (ns_name, vars) in &opts.namespaces {
        let ns_id = interner::intern_ns(ns_name);
        let ns = env.find_or_create_ns(ns_id);
        for (var_name, value) in vars {
            let var = ns.intern(interner::intern_sym(var_name));
            var.bind_root(value.clone());
        }
    }

    env.set_current_ns(interner::intern_ns("user"));

    let classes = match &opts.classes {
        ClassSpec::Deny => ClassAllowList::none(),
        ClassSpec::AllowAll => ClassAllowList::all(),
        ClassSpec::Allow(names) => {
            let mut list = ClassAllowList::none();
            for name in names {
                if let Some(class) = host::find_class(name) {
                    list.allow(class);
                }
            }
            list
        }
    };

    let ctx_opts = CtxOpts {
        classes,
        load_fn: opts.load_fn.clone(),
        realize_max: opts.realize_max,
        dry_run: opts.dry_run,
        public_class: opts.public_class.clone(),
    };

    let ctx = Ctx::new(Arc::new(RwLock::new(env)), Arc::new(ctx_opts));
    let mut bindings = Bindings::new();
    for (name, value) in &opts.bindings {
        bindings.insert(interner::intern_sym(name), value.clone());
    }
    ctx.with_bindings(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_starts_in_user() {
        let ctx = init_ctx(EvalOptions::default());
        assert_eq!(ctx.current_ns(), interner::intern_ns("user"));
    }

    #[test]
    fn preloaded_namespaces_resolve() {
        let opts = EvalOptions {
            namespaces: vec![(
                "tools".to_string(),
                vec![("answer".to_string(), Value::int(42))],
            )],
            ..EvalOptions::default()
        };
        let ctx = init_ctx(opts);
        let env = ctx.env.read().unwrap();
        let var = env
            .resolve_qualified(
                env.current_ns,
                "tools",
                interner::intern_sym("answer"),
            )
            .expect("preloaded var");
        assert_eq!(var.deref(), Some(Value::int(42)));
    }

    #[test]
    fn initial_bindings_form_the_frame() {
        let opts = EvalOptions {
            bindings: vec![("seed".to_string(), Value::int(9))],
            ..EvalOptions::default()
        };
        let ctx = init_ctx(opts);
        assert_eq!(
            ctx.lookup(interner::intern_sym("seed")),
            Some(&Value::int(9))
        );
    }
}
