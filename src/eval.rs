//! The tree-walking interpreter: one dispatch over the analyzed node's
//! discriminant, special-form evaluation, and the function call path with
//! its recur trampoline.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::analyzer::{self, Expr};
use crate::collections::{List, Map, Set, Vector};
use crate::core::{bindings, libload, Var};
use crate::env::Ctx;
use crate::error::{Error, SpannedError};
use crate::host;
use crate::interner;
use crate::macros;
use crate::reader::{Reader, Span};
use crate::value::{Closure, Value};

pub type EvalResult = Result<Value, SpannedError>;

/// Evaluates one analyzed node. Collection-shaped results pass the
/// realize-max guard before they are returned.
pub fn eval(ctx: &Ctx, expr: &Expr) -> EvalResult {
    let value = eval_inner(ctx, expr)?;
    guard_realized(ctx, &expr.span(), &value)?;
    Ok(value)
}

fn eval_inner(ctx: &Ctx, expr: &Expr) -> EvalResult {
    match expr {
        Expr::Const(value) => match value {
            // a bare var value derefs; taking a macro's value is an error
            Value::Var { span, value: var } => deref_var(span, var),
            other => Ok(other.clone()),
        },
        Expr::VecLit { span, items } => {
            let mut out = Vector::new();
            for item in items {
                out.push_back(eval(ctx, item)?);
            }
            Ok(Value::Vector { span: span.clone(), value: out, meta: None })
        }
        Expr::SetLit { span, items } => {
            let mut out = Set::new();
            for item in items {
                out.insert(eval(ctx, item)?);
            }
            Ok(Value::Set { span: span.clone(), value: out, meta: None })
        }
        Expr::MapLit { span, pairs } => {
            let mut out = Map::new();
            for (k, v) in pairs {
                let key = eval(ctx, k)?;
                let value = eval(ctx, v)?;
                // duplicate keys resolve to the last writer
                out.insert(key, value);
            }
            Ok(Value::Map { span: span.clone(), value: out, meta: None })
        }
        Expr::LocalRef { span, sym } => {
            ctx.lookup(*sym).cloned().ok_or_else(|| {
                SpannedError::new(
                    Error::Resolution(format!(
                        "Could not resolve symbol: {}",
                        interner::sym_name(*sym)
                    )),
                    span.clone(),
                )
            })
        }
        Expr::VarRef { span, var } => {
            Ok(Value::Var { span: span.clone(), value: var.clone() })
        }
        Expr::DerefOp { span, expr } => {
            let value = eval(ctx, expr)?;
            match value {
                Value::Var { value: var, .. } => {
                    var.deref().ok_or_else(|| unbound_err(span, &var))
                }
                Value::Lazy { seq, offset, .. } => {
                    let realized = seq.realize_from(ctx, span, offset)?;
                    Ok(Value::List {
                        span: span.clone(),
                        value: Arc::new(realized.into_iter().collect()),
                        meta: None,
                    })
                }
                other => Ok(other),
            }
        }
        // the calling convention already passes the context to callables
        Expr::NeedsCtx { expr, .. } => eval(ctx, expr),
        Expr::StaticAccess { span, class, member } => {
            host::static_field(ctx, span, *class, &interner::sym_name(*member))
        }
        Expr::Call { span, target, args } => {
            let f = eval(ctx, target)?;
            let mut argv: SmallVec<[Value; 8]> = SmallVec::new();
            for arg in args {
                // strictly left-to-right, one at a time
                argv.push(eval(ctx, arg)?);
            }
            call_value(ctx, span, &f, &argv).map_err(|e| e.at_call_site(span))
        }
        Expr::StaticCall { span, class, method, args } => {
            let mut argv: SmallVec<[Value; 8]> = SmallVec::new();
            for arg in args {
                argv.push(eval(ctx, arg)?);
            }
            host::call_static(ctx, span, *class, &interner::sym_name(*method), &argv)
        }
        Expr::InstanceCall { span, target, method, args, tag } => {
            let target = eval(ctx, target)?;
            let mut argv: SmallVec<[Value; 8]> = SmallVec::new();
            for arg in args {
                argv.push(eval(ctx, arg)?);
            }
            host::call_instance(
                ctx,
                span,
                &target,
                &interner::sym_name(*method),
                &argv,
                *tag,
            )
        }
        Expr::New { span, class, args } => {
            let mut argv: SmallVec<[Value; 8]> = SmallVec::new();
            for arg in args {
                argv.push(eval(ctx, arg)?);
            }
            host::construct(ctx, span, *class, &argv)
        }
        Expr::If { test, then, els, .. } => {
            if eval(ctx, test)?.is_truthy() {
                eval(ctx, then)
            } else {
                match els {
                    Some(els) => eval(ctx, els),
                    None => Ok(Value::nil()),
                }
            }
        }
        Expr::Do { body, .. } => eval_body(ctx, body),
        Expr::And { items, .. } => {
            if items.is_empty() {
                return Ok(Value::bool(true));
            }
            let mut last = Value::nil();
            for item in items {
                last = eval(ctx, item)?;
                if !last.is_truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::Or { items, .. } => {
            if items.is_empty() {
                return Ok(Value::nil());
            }
            let mut last = Value::nil();
            for item in items {
                last = eval(ctx, item)?;
                if last.is_truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Expr::Let { bindings, body, .. } => {
            let mut local = ctx.clone();
            for (sym, init) in bindings {
                let value = eval(&local, init)?;
                local = local.bind(*sym, value);
            }
            eval_body(&local, body)
        }
        Expr::Loop { bindings, body, .. } => {
            let mut local = ctx.clone();
            for (sym, init) in bindings {
                let value = eval(&local, init)?;
                local = local.bind(*sym, value);
            }
            loop {
                match eval_body(&local, body)? {
                    Value::Recur { args, .. } => {
                        let mut frame = local.bindings.clone();
                        for ((sym, _), value) in bindings.iter().zip(args.iter())
                        {
                            frame.insert(*sym, value.clone());
                        }
                        local = local.with_bindings(frame);
                    }
                    value => return Ok(value),
                }
            }
        }
        Expr::Def { span, var, meta, init, is_macro, dynamic } => {
            if let Some(init) = init {
                let value = eval(ctx, init)?;
                var.bind_root(value);
            }
            if *is_macro {
                var.set_macro(true);
            }
            if *dynamic {
                var.set_dynamic(true);
            }
            if let Some(meta) = meta {
                var.alter_meta(meta);
            }
            Ok(Value::Var { span: span.clone(), value: var.clone() })
        }
        Expr::Case { span, expr, table, branches, default } => {
            let value = eval(ctx, expr)?;
            match table.get(&value) {
                Some(idx) => eval(ctx, &branches[*idx]),
                None => match default {
                    Some(default) => eval(ctx, default),
                    None => Err(SpannedError::new(
                        Error::NoMatchingClause(value.to_string()),
                        span.clone(),
                    )),
                },
            }
        }
        Expr::Try { span, body, catches, finally } => {
            let result = eval_try(ctx, span, body, catches);
            if let Some(finally) = finally {
                // a finally never replaces the result, but its own error
                // supplants it
                eval_body(ctx, finally)?;
            }
            result
        }
        Expr::Throw { span, expr } => {
            let value = eval(ctx, expr)?;
            match value {
                Value::Error { value, .. } => {
                    Err(SpannedError::new(Error::Thrown(value), span.clone()))
                }
                other => Err(SpannedError::new(
                    Error::Type(format!(
                        "Cannot throw {}: not a host error value",
                        other.kind_name()
                    )),
                    span.clone(),
                )),
            }
        }
        Expr::Recur { span, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(ctx, arg)?);
            }
            Ok(Value::Recur { span: span.clone(), args: Arc::new(values) })
        }
        Expr::FnDecl { span, def } => Ok(Value::Fn {
            span: span.clone(),
            value: Arc::new(Closure {
                def: def.clone(),
                captured: ctx.bindings.clone(),
            }),
            meta: None,
        }),
        Expr::InNs { span, expr } => {
            let value = eval(ctx, expr)?;
            match value {
                Value::Symbol { name, .. } => {
                    let ns = interner::intern_ns(&interner::sym_name(name));
                    ctx.env.write().unwrap().set_current_ns(ns);
                    Ok(Value::nil())
                }
                other => Err(SpannedError::new(
                    Error::Type(format!(
                        "in-ns requires a symbol, got {}",
                        other.kind_name()
                    )),
                    span.clone(),
                )),
            }
        }
        Expr::SetBang { span, target, value } => {
            let target = eval(ctx, target)?;
            match target {
                Value::Var { value: var, .. } => {
                    let new_value = eval(ctx, value)?;
                    var.set_val(new_value.clone());
                    Ok(new_value)
                }
                other => Err(SpannedError::new(
                    Error::Type(format!("Cannot set {}", other)),
                    span.clone(),
                )),
            }
        }
        Expr::Refer { span, args } => eval_refer(ctx, span, args),
        Expr::ResolveOp { span, expr } => {
            let value = eval(ctx, expr)?;
            match value {
                Value::Symbol { ns, name, .. } => {
                    let env = ctx.env.read().unwrap();
                    let resolved = match ns {
                        None => env.resolve_bare(env.current_ns, name),
                        Some(ns_part) => env.resolve_qualified(
                            env.current_ns,
                            &interner::ns_name(ns_part),
                            name,
                        ),
                    };
                    Ok(match resolved {
                        Some(var) => {
                            Value::Var { span: span.clone(), value: var }
                        }
                        None => Value::nil(),
                    })
                }
                other => Err(SpannedError::new(
                    Error::Type(format!(
                        "resolve requires a symbol, got {}",
                        other.kind_name()
                    )),
                    span.clone(),
                )),
            }
        }
        Expr::MacroexpandOp { once, expr, .. } => {
            let form = eval(ctx, expr)?;
            if *once {
                macros::macroexpand_1(ctx, &form)
            } else {
                macros::macroexpand(ctx, &form)
            }
        }
        Expr::Require { span, args } => {
            let mut specs = Vec::with_capacity(args.len());
            for arg in args {
                specs.push(eval(ctx, arg)?);
            }
            libload::eval_require(ctx, span, &specs)
        }
        Expr::Binding { span, bindings: pairs, body } => {
            let mut bound = Vec::with_capacity(pairs.len());
            for (var, init) in pairs {
                if !var.is_dynamic() {
                    return Err(SpannedError::new(
                        Error::Type(format!(
                            "Can't dynamically bind non-dynamic var: {}/{}",
                            interner::ns_name(var.ns),
                            interner::sym_name(var.sym)
                        )),
                        span.clone(),
                    ));
                }
                bound.push((var.clone(), eval(ctx, init)?));
            }
            let _guard = bindings::push(&bound);
            eval_body(ctx, body)
        }
    }
}

/// Evaluates a body as `do`: every form in order, the last one's value.
pub fn eval_body(ctx: &Ctx, body: &[Expr]) -> EvalResult {
    let Some((last, init)) = body.split_last() else {
        return Ok(Value::nil());
    };
    for expr in init {
        eval(ctx, expr)?;
    }
    eval(ctx, last)
}

fn eval_try(
    ctx: &Ctx,
    span: &Span,
    body: &[Expr],
    catches: &[analyzer::CatchClause],
) -> EvalResult {
    let mut try_ctx = ctx.clone();
    try_ctx.in_try = true;
    match eval_body(&try_ctx, body) {
        Ok(value) => Ok(value),
        Err(err) => {
            let raised = err.to_host_error();
            match catches
                .iter()
                .find(|clause| host::is_instance(raised.class, clause.class))
            {
                Some(clause) => {
                    let bound = Value::Error {
                        span: err.span.clone(),
                        value: raised,
                    };
                    let catch_ctx = ctx.bind(clause.binding, bound);
                    eval_body(&catch_ctx, &clause.body)
                }
                // no match: re-raise carrying the body's location
                None => Err(err.at_call_site(span)),
            }
        }
    }
}

fn eval_refer(ctx: &Ctx, span: &Span, args: &[Expr]) -> EvalResult {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(ctx, arg)?);
    }
    let Some((target, opts)) = values.split_first() else {
        return Err(SpannedError::new(
            Error::Analysis("refer requires a namespace symbol".to_string()),
            span.clone(),
        ));
    };
    let Value::Symbol { name, .. } = target else {
        return Err(SpannedError::new(
            Error::Type(format!(
                "refer requires a symbol, got {}",
                target.kind_name()
            )),
            span.clone(),
        ));
    };
    let source_ns = interner::intern_ns(&interner::sym_name(*name));

    let exclude_kw = Value::keyword(None, interner::intern_kw("exclude"));
    let mut iter = opts.iter();
    while let Some(opt) = iter.next() {
        if *opt == exclude_kw {
            let syms = iter.next().ok_or_else(|| {
                SpannedError::new(
                    Error::Analysis(":exclude requires a collection".to_string()),
                    span.clone(),
                )
            })?;
            let excluded = symbol_seq(span, syms)?;
            let mut env = ctx.env.write().unwrap();
            env.current_mut().add_refer_excludes(source_ns, excluded);
        } else {
            // other refer options are tolerated; skip their value
            iter.next();
        }
    }
    Ok(Value::nil())
}

fn symbol_seq(span: &Span, value: &Value) -> Result<Vec<crate::interner::SymId>, SpannedError> {
    let items: Vec<Value> = match value {
        Value::Vector { value, .. } => value.iter().cloned().collect(),
        Value::List { value, .. } => value.iter().cloned().collect(),
        other => {
            return Err(SpannedError::new(
                Error::Type(format!(
                    "Expected a sequential collection of symbols, got {}",
                    other.kind_name()
                )),
                span.clone(),
            ))
        }
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Symbol { name, .. } => Ok(name),
            other => Err(SpannedError::new(
                Error::Type(format!(
                    "Expected a symbol, got {}",
                    other.kind_name()
                )),
                span.clone(),
            )),
        })
        .collect()
}

fn deref_var(span: &Span, var: &Arc<Var>) -> EvalResult {
    if var.is_macro() {
        return Err(SpannedError::new(
            Error::Type(format!(
                "Can't take value of a macro: #'{}/{}",
                interner::ns_name(var.ns),
                interner::sym_name(var.sym)
            )),
            span.clone(),
        ));
    }
    var.deref().ok_or_else(|| unbound_err(span, var))
}

fn unbound_err(span: &Span, var: &Arc<Var>) -> SpannedError {
    SpannedError::new(
        Error::Resolution(format!(
            "Var {}/{} is unbound",
            interner::ns_name(var.ns),
            interner::sym_name(var.sym)
        )),
        span.clone(),
    )
}

//===----------------------------------------------------------------------===//
// Calls
//===----------------------------------------------------------------------===//

/// Invokes any callable value with already-evaluated arguments.
pub fn call_value(
    ctx: &Ctx,
    span: &Span,
    f: &Value,
    args: &[Value],
) -> EvalResult {
    match f {
        Value::Fn { value: closure, .. } => {
            call_closure(ctx, span, f, closure, args)
        }
        Value::Native { f, .. } => f(ctx, span, args),
        Value::Keyword { .. } => match args {
            [Value::Map { value, .. }] => {
                Ok(value.get(f).cloned().unwrap_or_else(Value::nil))
            }
            [Value::Map { value, .. }, default] => {
                Ok(value.get(f).cloned().unwrap_or_else(|| default.clone()))
            }
            [Value::Set { value, .. }] => Ok(if value.contains(f) {
                f.clone()
            } else {
                Value::nil()
            }),
            [Value::Nil { .. }] | [Value::Nil { .. }, _] => Ok(match args {
                [_, default] => default.clone(),
                _ => Value::nil(),
            }),
            _ => Err(SpannedError::new(
                Error::Arity(format!(
                    "Wrong number of args ({}) passed to: keyword",
                    args.len()
                )),
                span.clone(),
            )),
        },
        Value::Map { value, .. } => match args {
            [key] => Ok(value.get(key).cloned().unwrap_or_else(Value::nil)),
            [key, default] => {
                Ok(value.get(key).cloned().unwrap_or_else(|| default.clone()))
            }
            _ => Err(SpannedError::new(
                Error::Arity(format!(
                    "Wrong number of args ({}) passed to: map",
                    args.len()
                )),
                span.clone(),
            )),
        },
        Value::Set { value, .. } => match args {
            [item] => Ok(if value.contains(item) {
                item.clone()
            } else {
                Value::nil()
            }),
            _ => Err(SpannedError::new(
                Error::Arity(format!(
                    "Wrong number of args ({}) passed to: set",
                    args.len()
                )),
                span.clone(),
            )),
        },
        Value::Vector { value, .. } => match args {
            [Value::Int { value: idx, .. }] => {
                let idx = *idx;
                if idx >= 0 {
                    if let Some(item) = value.get(idx as usize) {
                        return Ok(item.clone());
                    }
                }
                Err(SpannedError::new(
                    Error::Thrown(Arc::new(host::HostError::new(
                        host::EXCEPTION,
                        format!("Index out of bounds: {}", idx),
                    ))),
                    span.clone(),
                ))
            }
            _ => Err(SpannedError::new(
                Error::Type("Vectors expect one integer argument".to_string()),
                span.clone(),
            )),
        },
        Value::Var { value: var, .. } => {
            let derefed = deref_var(span, var)?;
            call_value(ctx, span, &derefed, args)
        }
        other => Err(SpannedError::new(
            Error::Type(format!("Cannot call {} as a function", other)),
            span.clone(),
        )),
    }
}

fn call_closure(
    ctx: &Ctx,
    span: &Span,
    fn_value: &Value,
    closure: &Closure,
    args: &[Value],
) -> EvalResult {
    let arity = closure.def.select_arity(args.len()).ok_or_else(|| {
        let name = closure
            .def
            .name
            .map(interner::sym_name)
            .unwrap_or_else(|| "fn".to_string());
        SpannedError::new(
            Error::Arity(format!(
                "Wrong number of args ({}) passed to: {}",
                args.len(),
                name
            )),
            span.clone(),
        )
    })?;

    let mut frame = closure.captured.clone();
    if let Some(name) = closure.def.name {
        frame.insert(name, fn_value.clone());
    }
    for (param, value) in arity.params.iter().zip(args.iter()) {
        frame.insert(*param, value.clone());
    }
    if let Some(rest) = arity.rest {
        let surplus = &args[arity.params.len()..];
        let rest_value = if surplus.is_empty() {
            Value::nil()
        } else {
            Value::List {
                span: span.clone(),
                value: Arc::new(surplus.iter().cloned().collect::<List<Value>>()),
                meta: None,
            }
        };
        frame.insert(rest, rest_value);
    }

    // the trampoline: a recur marker re-binds the parameters and re-enters
    // the body without growing the Rust stack
    let mut local = ctx.with_bindings(frame);
    loop {
        match eval_body(&local, &arity.body)? {
            Value::Recur { args: new_args, .. } => {
                let expected =
                    arity.params.len() + usize::from(arity.rest.is_some());
                if new_args.len() != expected {
                    return Err(SpannedError::new(
                        Error::Arity(format!(
                            "Mismatched argument count to recur, expected: {} args, got: {}",
                            expected,
                            new_args.len()
                        )),
                        span.clone(),
                    ));
                }
                let mut frame = local.bindings.clone();
                let mut values = new_args.iter();
                for param in &arity.params {
                    if let Some(value) = values.next() {
                        frame.insert(*param, value.clone());
                    }
                }
                if let Some(rest) = arity.rest {
                    if let Some(value) = values.next() {
                        frame.insert(rest, value.clone());
                    }
                }
                local = local.with_bindings(frame);
            }
            value => return Ok(value),
        }
    }
}

//===----------------------------------------------------------------------===//
// Top-level driver helpers
//===----------------------------------------------------------------------===//

/// Evaluates every form in a source string, returning the last value (nil
/// for empty input).
pub fn eval_source(ctx: &Ctx, src: &str) -> EvalResult {
    let mut reader = Reader::new(src)?;
    let mut last = Value::nil();
    while let Some(form) = reader.next_form()? {
        last = eval_top_form(ctx, &form)?;
    }
    Ok(last)
}

/// Evaluates one top-level form. A top-level `do` evaluates its children as
/// top-level forms, so `def`s inside it take effect progressively.
pub fn eval_top_form(ctx: &Ctx, form: &Value) -> EvalResult {
    if let Value::List { value, .. } = form {
        if let Some(Value::Symbol { name, .. }) = value.head() {
            if interner::sym_name(*name) == "do" {
                let mut last = Value::nil();
                for child in value.tail().unwrap_or_default().iter() {
                    last = eval_top_form(ctx, child)?;
                }
                return Ok(last);
            }
        }
    }
    let expr = analyzer::analyze(ctx, form)?;
    eval(ctx, &expr)
}

fn guard_realized(
    ctx: &Ctx,
    span: &Span,
    value: &Value,
) -> Result<(), SpannedError> {
    let Some(max) = ctx.opts.realize_max else {
        return Ok(());
    };
    let len = match value {
        Value::List { value, .. } => value.len(),
        Value::Vector { value, .. } => value.len(),
        Value::Set { value, .. } => value.len(),
        Value::Map { value, .. } => value.len(),
        _ => return Ok(()),
    };
    if len > max {
        return Err(SpannedError::new(Error::SizeExceeded(max), span.clone()));
    }
    Ok(())
}
