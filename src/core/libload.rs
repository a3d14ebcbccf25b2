//! The `require` driver: libspec parsing, library loading through the
//! context's `load-fn`, alias/refer wiring, and rollback of failed loads.
//!
//! Loading runs with the `*file*` dynamic var bound to the library's file
//! and restores the prior current namespace through a drop guard, so every
//! exit path (including errors) leaves the caller's namespace intact.

use std::sync::{Arc, RwLock};

use crate::core::bindings;
use crate::env::{Ctx, GlobalEnv};
use crate::error::{Error, SpannedError};
use crate::eval;
use crate::interner::{self, NsId, SymId};
use crate::reader::Span;
use crate::value::{Bindings, Value};

struct Libspec {
    name: String,
    ns: NsId,
    alias: Option<SymId>,
    refers: Vec<SymId>,
    reload: bool,
}

/// Evaluates `(require spec ...)` over already-evaluated libspec values.
pub fn eval_require(
    ctx: &Ctx,
    span: &Span,
    specs: &[Value],
) -> eval::EvalResult {
    for spec in specs {
        let libspec = parse_libspec(span, spec)?;
        require_one(ctx, span, &libspec)?;
    }
    Ok(Value::nil())
}

fn parse_libspec(span: &Span, spec: &Value) -> Result<Libspec, SpannedError> {
    let items: Vec<Value> = match spec {
        Value::Symbol { .. } => vec![spec.clone()],
        Value::List { value, .. } => value.iter().cloned().collect(),
        Value::Vector { value, .. } => value.iter().cloned().collect(),
        other => {
            return Err(SpannedError::new(
                Error::Type(format!(
                    "Libspec must be a symbol or a sequence, got {}",
                    other.kind_name()
                )),
                span.clone(),
            ))
        }
    };

    let Some((Value::Symbol { name, .. }, opts)) = items.split_first() else {
        return Err(SpannedError::new(
            Error::Type("Libspec must start with a library symbol".to_string()),
            span.clone(),
        ));
    };
    let lib_name = interner::sym_name(*name);

    let mut libspec = Libspec {
        ns: interner::intern_ns(&lib_name),
        name: lib_name,
        alias: None,
        refers: Vec::new(),
        reload: false,
    };

    let mut iter = opts.iter();
    while let Some(opt) = iter.next() {
        match opt {
            Value::Keyword { ns: None, name, .. } => {
                match interner::kw_name(*name).as_str() {
                    "as" => match iter.next() {
                        Some(Value::Symbol { name, .. }) => {
                            libspec.alias = Some(*name);
                        }
                        _ => {
                            return Err(SpannedError::new(
                                Error::Type(
                                    ":as requires a symbol".to_string(),
                                ),
                                span.clone(),
                            ))
                        }
                    },
                    "refer" => {
                        let refers = iter.next().ok_or_else(|| {
                            refer_not_sequential(span)
                        })?;
                        libspec.refers = refer_symbols(span, refers)?;
                    }
                    "reload" | "reload-all" | "verbose" => {
                        libspec.reload = true;
                    }
                    other => {
                        return Err(SpannedError::new(
                            Error::Type(format!(
                                "Unknown require option: :{}",
                                other
                            )),
                            span.clone(),
                        ))
                    }
                }
            }
            other => {
                return Err(SpannedError::new(
                    Error::Type(format!(
                        "Expected a require option keyword, got {}",
                        other.kind_name()
                    )),
                    span.clone(),
                ))
            }
        }
    }

    Ok(libspec)
}

fn refer_not_sequential(span: &Span) -> SpannedError {
    SpannedError::new(
        Error::Type(
            ":refer value must be a sequential collection of symbols"
                .to_string(),
        ),
        span.clone(),
    )
}

fn refer_symbols(span: &Span, value: &Value) -> Result<Vec<SymId>, SpannedError> {
    let items: Vec<Value> = match value {
        Value::Vector { value, .. } => value.iter().cloned().collect(),
        Value::List { value, .. } => value.iter().cloned().collect(),
        _ => return Err(refer_not_sequential(span)),
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Symbol { name, .. } => Ok(name),
            _ => Err(refer_not_sequential(span)),
        })
        .collect()
}

fn require_one(
    ctx: &Ctx,
    span: &Span,
    libspec: &Libspec,
) -> Result<(), SpannedError> {
    let already_loaded = ctx
        .env
        .read()
        .unwrap()
        .namespaces
        .contains_key(&libspec.ns);

    if already_loaded && !libspec.reload {
        return apply_alias_and_refers(ctx, span, libspec);
    }

    let loaded = ctx
        .opts
        .load_fn
        .as_ref()
        .and_then(|load_fn| load_fn(&libspec.name));

    match loaded {
        Some(lib) => {
            load_source(ctx, libspec, &lib.file, &lib.source)?;
            apply_alias_and_refers(ctx, span, libspec)
        }
        None if already_loaded => apply_alias_and_refers(ctx, span, libspec),
        None => Err(SpannedError::new(
            Error::Resolution(format!("Could not require {}.", libspec.name)),
            span.clone(),
        )),
    }
}

fn load_source(
    ctx: &Ctx,
    libspec: &Libspec,
    file: &Option<String>,
    source: &str,
) -> Result<(), SpannedError> {
    let file_var = ctx.env.read().unwrap().file_var.clone();
    let file_value = match file {
        Some(file) => Value::string(file.clone()),
        None => Value::nil(),
    };

    // both guards release on every exit path
    let _file_guard = bindings::push(&[(file_var, file_value)]);
    let _ns_guard = CurrentNsGuard::new(&ctx.env);

    let fresh = ctx.with_bindings(Bindings::new());
    match eval::eval_source(&fresh, source) {
        Ok(_) => {
            // make sure the namespace exists even if the source never
            // declared it, so alias/refer have a target
            ctx.env.write().unwrap().find_or_create_ns(libspec.ns);
            Ok(())
        }
        Err(err) => {
            // rollback: a failed load leaves no partial namespace behind
            ctx.env.write().unwrap().namespaces.remove(&libspec.ns);
            Err(err)
        }
    }
}

fn apply_alias_and_refers(
    ctx: &Ctx,
    span: &Span,
    libspec: &Libspec,
) -> Result<(), SpannedError> {
    let mut env = ctx.env.write().unwrap();

    if let Some(alias) = libspec.alias {
        let current = env.current_ns;
        if let Some(ns) = env.namespace_mut(current) {
            ns.add_alias(alias, libspec.ns);
        }
    }

    let mut resolved = Vec::with_capacity(libspec.refers.len());
    for sym in &libspec.refers {
        let var = env
            .namespace(libspec.ns)
            .and_then(|ns| ns.mappings.get(sym).cloned())
            .ok_or_else(|| {
                SpannedError::new(
                    Error::Resolution(format!(
                        "{} does not exist",
                        interner::sym_name(*sym)
                    )),
                    span.clone(),
                )
            })?;
        resolved.push((*sym, var));
    }
    for (sym, var) in resolved {
        env.current_mut().add_refer(sym, var);
    }
    Ok(())
}

/// Restores the current namespace when dropped.
struct CurrentNsGuard {
    env: Arc<RwLock<GlobalEnv>>,
    prev: NsId,
}

impl CurrentNsGuard {
    fn new(env: &Arc<RwLock<GlobalEnv>>) -> Self {
        let prev = env.read().unwrap().current_ns;
        Self { env: env.clone(), prev }
    }
}

impl Drop for CurrentNsGuard {
    fn drop(&mut self) {
        self.env.write().unwrap().current_ns = self.prev;
    }
}
