//! The static analyzer: walks a read form and produces a tree of tagged
//! nodes, with operator resolution, macro expansion, `case` tables and
//! `catch` classes precomputed so the interpreter's dispatch is a plain
//! match on the discriminant.

use std::sync::Arc;

use crate::collections::Map;
use crate::core::Var;
use crate::env::Ctx;
use crate::error::{Error, SpannedError};
use crate::host::{self, ClassId};
use crate::interner::{self, NsId, SymId};
use crate::macros;
use crate::reader::Span;
use crate::value::{FnArity, FnDef, Metadata, Value};

//===----------------------------------------------------------------------===//
// Analyzed nodes
//===----------------------------------------------------------------------===//

#[derive(Debug)]
pub struct CatchClause {
    pub class: ClassId,
    pub binding: SymId,
    pub body: Vec<Expr>,
}

#[derive(Debug)]
pub enum Expr {
    /// Untagged: a self-evaluating value (literals, quoted data, resolved
    /// vars and classes).
    Const(Value),
    VecLit { span: Span, items: Vec<Expr> },
    SetLit { span: Span, items: Vec<Expr> },
    MapLit { span: Span, pairs: Vec<(Expr, Expr)> },
    /// A symbol bound in the lexical frame, looked up at eval time.
    LocalRef { span: Span, sym: SymId },
    /// The var object itself (`(var x)` / `#'x` / `set!` targets).
    VarRef { span: Span, var: Arc<Var> },
    /// `deref`: var deref, lazy-seq forcing.
    DerefOp { span: Span, expr: Box<Expr> },
    /// A callable embedded directly in a form; invoked with the evaluation
    /// context by calling convention.
    NeedsCtx { span: Span, expr: Box<Expr> },
    StaticAccess { span: Span, class: ClassId, member: SymId },
    Call { span: Span, target: Box<Expr>, args: Vec<Expr> },
    StaticCall { span: Span, class: ClassId, method: SymId, args: Vec<Expr> },
    InstanceCall {
        span: Span,
        target: Box<Expr>,
        method: SymId,
        args: Vec<Expr>,
        tag: Option<ClassId>,
    },
    New { span: Span, class: ClassId, args: Vec<Expr> },
    If { span: Span, test: Box<Expr>, then: Box<Expr>, els: Option<Box<Expr>> },
    Do { span: Span, body: Vec<Expr> },
    And { span: Span, items: Vec<Expr> },
    Or { span: Span, items: Vec<Expr> },
    Let { span: Span, bindings: Vec<(SymId, Expr)>, body: Vec<Expr> },
    Loop { span: Span, bindings: Vec<(SymId, Expr)>, body: Arc<[Expr]> },
    Def {
        span: Span,
        var: Arc<Var>,
        meta: Option<Arc<Metadata>>,
        init: Option<Box<Expr>>,
        is_macro: bool,
        dynamic: bool,
    },
    Case {
        span: Span,
        expr: Box<Expr>,
        table: Map<Value, usize>,
        branches: Vec<Expr>,
        default: Option<Box<Expr>>,
    },
    Try {
        span: Span,
        body: Vec<Expr>,
        catches: Vec<CatchClause>,
        finally: Option<Vec<Expr>>,
    },
    Throw { span: Span, expr: Box<Expr> },
    Recur { span: Span, args: Vec<Expr> },
    FnDecl { span: Span, def: Arc<FnDef> },
    InNs { span: Span, expr: Box<Expr> },
    SetBang { span: Span, target: Box<Expr>, value: Box<Expr> },
    Refer { span: Span, args: Vec<Expr> },
    ResolveOp { span: Span, expr: Box<Expr> },
    MacroexpandOp { span: Span, once: bool, expr: Box<Expr> },
    Require { span: Span, args: Vec<Expr> },
    Binding { span: Span, bindings: Vec<(Arc<Var>, Expr)>, body: Vec<Expr> },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Const(v) => v.span(),
            Expr::VecLit { span, .. }
            | Expr::SetLit { span, .. }
            | Expr::MapLit { span, .. }
            | Expr::LocalRef { span, .. }
            | Expr::VarRef { span, .. }
            | Expr::DerefOp { span, .. }
            | Expr::NeedsCtx { span, .. }
            | Expr::StaticAccess { span, .. }
            | Expr::Call { span, .. }
            | Expr::StaticCall { span, .. }
            | Expr::InstanceCall { span, .. }
            | Expr::New { span, .. }
            | Expr::If { span, .. }
            | Expr::Do { span, .. }
            | Expr::And { span, .. }
            | Expr::Or { span, .. }
            | Expr::Let { span, .. }
            | Expr::Loop { span, .. }
            | Expr::Def { span, .. }
            | Expr::Case { span, .. }
            | Expr::Try { span, .. }
            | Expr::Throw { span, .. }
            | Expr::Recur { span, .. }
            | Expr::FnDecl { span, .. }
            | Expr::InNs { span, .. }
            | Expr::SetBang { span, .. }
            | Expr::Refer { span, .. }
            | Expr::ResolveOp { span, .. }
            | Expr::MacroexpandOp { span, .. }
            | Expr::Require { span, .. }
            | Expr::Binding { span, .. } => span.clone(),
        }
    }
}

//===----------------------------------------------------------------------===//
// Scope
//===----------------------------------------------------------------------===//

/// Lexical information threaded through analysis: local symbols with their
/// optional `:tag` classes, and the parameter count of the innermost recur
/// target.
#[derive(Clone)]
struct Scope {
    locals: im::HashMap<SymId, Option<ClassId>>,
    recur_arity: Option<usize>,
}

impl Scope {
    fn from_ctx(ctx: &Ctx) -> Self {
        let mut locals = im::HashMap::new();
        for sym in ctx.bindings.keys() {
            locals.insert(*sym, None);
        }
        Self { locals, recur_arity: None }
    }

    fn with_local(&self, sym: SymId, tag: Option<ClassId>) -> Self {
        let mut out = self.clone();
        out.locals.insert(sym, tag);
        out
    }

    fn tag_of(&self, sym: SymId) -> Option<ClassId> {
        self.locals.get(&sym).copied().flatten()
    }
}

//===----------------------------------------------------------------------===//
// Entry point
//===----------------------------------------------------------------------===//

pub fn analyze(ctx: &Ctx, form: &Value) -> Result<Expr, SpannedError> {
    let scope = Scope::from_ctx(ctx);
    analyze_form(ctx, &scope, form, false)
}

fn err(span: &Span, msg: impl Into<String>) -> SpannedError {
    SpannedError::new(Error::Analysis(msg.into()), span.clone())
}

fn resolution_err(span: &Span, msg: impl Into<String>) -> SpannedError {
    SpannedError::new(Error::Resolution(msg.into()), span.clone())
}

fn analyze_form(
    ctx: &Ctx,
    scope: &Scope,
    form: &Value,
    tail: bool,
) -> Result<Expr, SpannedError> {
    match form {
        Value::Symbol { span, ns, name, .. } => {
            analyze_symbol(ctx, scope, span, *ns, *name)
        }
        Value::List { span, value, .. } => {
            if value.is_empty() {
                Ok(Expr::Const(form.clone()))
            } else {
                analyze_list(ctx, scope, span, form, tail)
            }
        }
        Value::Vector { span, value, .. } => Ok(Expr::VecLit {
            span: span.clone(),
            items: value
                .iter()
                .map(|item| analyze_form(ctx, scope, item, false))
                .collect::<Result<_, _>>()?,
        }),
        Value::Set { span, value, .. } => Ok(Expr::SetLit {
            span: span.clone(),
            items: value
                .iter()
                .map(|item| analyze_form(ctx, scope, item, false))
                .collect::<Result<_, _>>()?,
        }),
        Value::Map { span, value, .. } => Ok(Expr::MapLit {
            span: span.clone(),
            pairs: value
                .iter()
                .map(|(k, v)| {
                    Ok((
                        analyze_form(ctx, scope, k, false)?,
                        analyze_form(ctx, scope, v, false)?,
                    ))
                })
                .collect::<Result<_, _>>()?,
        }),
        // programmatically injected callables receive the context by
        // calling convention
        Value::Fn { span, .. } | Value::Native { span, .. } => Ok(Expr::NeedsCtx {
            span: span.clone(),
            expr: Box::new(Expr::Const(form.clone())),
        }),
        other => Ok(Expr::Const(other.clone())),
    }
}

fn analyze_symbol(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    ns: Option<NsId>,
    name: SymId,
) -> Result<Expr, SpannedError> {
    if ns.is_none() && scope.locals.contains_key(&name) {
        return Ok(Expr::LocalRef { span: span.clone(), sym: name });
    }

    let env = ctx.env.read().unwrap();
    match ns {
        None => {
            if let Some(var) = env.resolve_bare(env.current_ns, name) {
                return Ok(Expr::Const(Value::Var {
                    span: span.clone(),
                    value: var,
                }));
            }
            let text = interner::sym_name(name);
            if let Some(class) = host::find_class(&text) {
                return Ok(Expr::Const(Value::Class {
                    span: span.clone(),
                    value: class,
                }));
            }
            Err(resolution_err(
                span,
                format!("Could not resolve symbol: {}", text),
            ))
        }
        Some(ns_part) => {
            let ns_text = interner::ns_name(ns_part);
            if let Some(var) = env.resolve_qualified(env.current_ns, &ns_text, name)
            {
                return Ok(Expr::Const(Value::Var {
                    span: span.clone(),
                    value: var,
                }));
            }
            if let Some(class) = host::find_class(&ns_text) {
                return Ok(Expr::StaticAccess {
                    span: span.clone(),
                    class,
                    member: name,
                });
            }
            Err(resolution_err(
                span,
                format!(
                    "Could not resolve symbol: {}/{}",
                    ns_text,
                    interner::sym_name(name)
                ),
            ))
        }
    }
}

//===----------------------------------------------------------------------===//
// Lists
//===----------------------------------------------------------------------===//

fn analyze_list(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    form: &Value,
    tail: bool,
) -> Result<Expr, SpannedError> {
    let Value::List { value: list, .. } = form else { unreachable!() };
    let head = list.head().expect("non-empty list");
    let args: Vec<Value> = list.tail().unwrap_or_default().iter().cloned().collect();

    if let Value::Symbol { ns: head_ns, name: head_name, .. } = head {
        let name_text = interner::sym_name(*head_name);
        let shadowed = head_ns.is_none() && scope.locals.contains_key(head_name);

        // special forms match on the name with any namespace prefix stripped
        if macros::is_special_form(&name_text) {
            return analyze_special(ctx, scope, span, &name_text, &args, tail);
        }

        if !shadowed {
            // instance-method sugar: (.method target args...)
            if head_ns.is_none() && name_text.len() > 1 && name_text.starts_with('.')
            {
                return analyze_instance_call(
                    ctx,
                    scope,
                    span,
                    &name_text[1..],
                    &args,
                );
            }

            // the `for` comprehension expands through the analyzer
            if head_ns.is_none() && name_text == "for" {
                let expansion = macros::expand_for(span, form)?;
                return analyze_form(ctx, scope, &expansion, tail);
            }

            // macro call?
            let resolved = {
                let env = ctx.env.read().unwrap();
                match head_ns {
                    None => env.resolve_bare(env.current_ns, *head_name),
                    Some(ns_part) => env.resolve_qualified(
                        env.current_ns,
                        &interner::ns_name(*ns_part),
                        *head_name,
                    ),
                }
            };
            if let Some(var) = &resolved {
                if var.is_macro() {
                    let expansion =
                        macros::call_macro(ctx, span, var, form, &args)?;
                    return analyze_form(ctx, scope, &expansion, tail);
                }
            }

            // static-method call: (Math/abs x)
            if let Some(ns_part) = head_ns {
                if resolved.is_none() {
                    let ns_text = interner::ns_name(*ns_part);
                    let is_alias = {
                        let env = ctx.env.read().unwrap();
                        env.resolve_ns_part(env.current_ns, &ns_text).is_some()
                    };
                    if !is_alias {
                        if let Some(class) = host::find_class(&ns_text) {
                            return Ok(Expr::StaticCall {
                                span: span.clone(),
                                class,
                                method: *head_name,
                                args: analyze_args(ctx, scope, &args)?,
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(Expr::Call {
        span: span.clone(),
        target: Box::new(analyze_form(ctx, scope, head, false)?),
        args: analyze_args(ctx, scope, &args)?,
    })
}

fn analyze_args(
    ctx: &Ctx,
    scope: &Scope,
    args: &[Value],
) -> Result<Vec<Expr>, SpannedError> {
    args.iter()
        .map(|arg| analyze_form(ctx, scope, arg, false))
        .collect()
}

fn analyze_body(
    ctx: &Ctx,
    scope: &Scope,
    body: &[Value],
    tail: bool,
) -> Result<Vec<Expr>, SpannedError> {
    let mut out = Vec::with_capacity(body.len());
    for (idx, form) in body.iter().enumerate() {
        let is_last = idx + 1 == body.len();
        out.push(analyze_form(ctx, scope, form, tail && is_last)?);
    }
    Ok(out)
}

fn analyze_instance_call(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    method: &str,
    args: &[Value],
) -> Result<Expr, SpannedError> {
    let Some((target_form, rest)) = args.split_first() else {
        return Err(err(span, format!(".{} requires a target", method)));
    };
    let tag = tag_of_form(scope, target_form);
    Ok(Expr::InstanceCall {
        span: span.clone(),
        target: Box::new(analyze_form(ctx, scope, target_form, false)?),
        method: interner::intern_sym(method),
        args: analyze_args(ctx, scope, rest)?,
        tag,
    })
}

/// The `:tag` class of a form, from its metadata or from the tag recorded
/// for a local.
fn tag_of_form(scope: &Scope, form: &Value) -> Option<ClassId> {
    if let Some(class) = meta_tag(form.meta().map(|m| m.as_ref())) {
        return Some(class);
    }
    if let Value::Symbol { ns: None, name, .. } = form {
        return scope.tag_of(*name);
    }
    None
}

fn meta_tag(meta: Option<&Metadata>) -> Option<ClassId> {
    let meta = meta?;
    let tag_key = Value::keyword(None, interner::intern_kw("tag"));
    match meta.get(&tag_key)? {
        Value::Symbol { name, .. } => host::find_class(&interner::sym_name(*name)),
        _ => None,
    }
}

//===----------------------------------------------------------------------===//
// Special forms
//===----------------------------------------------------------------------===//

fn analyze_special(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    name: &str,
    args: &[Value],
    tail: bool,
) -> Result<Expr, SpannedError> {
    match name {
        "quote" => match args {
            [form] => Ok(Expr::Const(form.clone())),
            _ => Err(err(span, "quote requires exactly 1 argument")),
        },
        "syntax-quote" => match args {
            [form] => {
                let expansion = macros::syntax_quote(form);
                analyze_form(ctx, scope, &expansion, tail)
            }
            _ => Err(err(span, "syntax-quote requires exactly 1 argument")),
        },
        "unquote" | "unquote-splicing" => {
            Err(err(span, format!("{} outside of syntax-quote", name)))
        }
        "do" => Ok(Expr::Do {
            span: span.clone(),
            body: analyze_body(ctx, scope, args, tail)?,
        }),
        "if" => analyze_if(ctx, scope, span, args, tail),
        "and" => Ok(Expr::And {
            span: span.clone(),
            items: analyze_args(ctx, scope, args)?,
        }),
        "or" => Ok(Expr::Or {
            span: span.clone(),
            items: analyze_args(ctx, scope, args)?,
        }),
        "let" | "let*" => analyze_let(ctx, scope, span, args, tail, false),
        "loop" => analyze_let(ctx, scope, span, args, tail, true),
        "fn" | "fn*" => {
            let def = analyze_fn(ctx, scope, span, args)?;
            Ok(Expr::FnDecl { span: span.clone(), def })
        }
        "def" => analyze_def(ctx, scope, span, args, false),
        "defmacro" => analyze_def(ctx, scope, span, args, true),
        "case" => analyze_case(ctx, scope, span, args, tail),
        "try" => analyze_try(ctx, scope, span, args),
        "catch" | "finally" => {
            Err(err(span, format!("{} outside of try", name)))
        }
        "throw" => match args {
            [form] => Ok(Expr::Throw {
                span: span.clone(),
                expr: Box::new(analyze_form(ctx, scope, form, false)?),
            }),
            _ => Err(err(span, "throw requires exactly 1 argument")),
        },
        "recur" => analyze_recur(ctx, scope, span, args, tail),
        "new" => analyze_new(ctx, scope, span, args),
        "." => analyze_dot(ctx, scope, span, args),
        "in-ns" => match args {
            [form] => Ok(Expr::InNs {
                span: span.clone(),
                expr: Box::new(analyze_form(ctx, scope, form, false)?),
            }),
            _ => Err(err(span, "in-ns requires exactly 1 argument")),
        },
        "set!" => analyze_set_bang(ctx, scope, span, args),
        "refer" => Ok(Expr::Refer {
            span: span.clone(),
            args: analyze_args(ctx, scope, args)?,
        }),
        "resolve" => match args {
            [form] => Ok(Expr::ResolveOp {
                span: span.clone(),
                expr: Box::new(analyze_form(ctx, scope, form, false)?),
            }),
            _ => Err(err(span, "resolve requires exactly 1 argument")),
        },
        "macroexpand-1" | "macroexpand" => match args {
            [form] => Ok(Expr::MacroexpandOp {
                span: span.clone(),
                once: name == "macroexpand-1",
                expr: Box::new(analyze_form(ctx, scope, form, false)?),
            }),
            _ => Err(err(span, format!("{} requires exactly 1 argument", name))),
        },
        "require" => Ok(Expr::Require {
            span: span.clone(),
            args: analyze_args(ctx, scope, args)?,
        }),
        "binding" => analyze_binding(ctx, scope, span, args),
        "var" => match args {
            [Value::Symbol { ns, name, span: sym_span, .. }] => {
                let var = resolve_var(ctx, sym_span, *ns, *name)?;
                Ok(Expr::VarRef { span: span.clone(), var })
            }
            _ => Err(err(span, "var requires a symbol argument")),
        },
        "deref" => match args {
            [form] => Ok(Expr::DerefOp {
                span: span.clone(),
                expr: Box::new(analyze_form(ctx, scope, form, false)?),
            }),
            _ => Err(err(span, "deref requires exactly 1 argument")),
        },
        "ns" => {
            let expansion = expand_ns(span, args)?;
            analyze_form(ctx, scope, &expansion, tail)
        }
        other => Err(err(span, format!("Unknown special form: {}", other))),
    }
}

fn analyze_if(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
    tail: bool,
) -> Result<Expr, SpannedError> {
    match args {
        [test, then] => Ok(Expr::If {
            span: span.clone(),
            test: Box::new(analyze_form(ctx, scope, test, false)?),
            then: Box::new(analyze_form(ctx, scope, then, tail)?),
            els: None,
        }),
        [test, then, els] => Ok(Expr::If {
            span: span.clone(),
            test: Box::new(analyze_form(ctx, scope, test, false)?),
            then: Box::new(analyze_form(ctx, scope, then, tail)?),
            els: Some(Box::new(analyze_form(ctx, scope, els, tail)?)),
        }),
        _ => Err(err(span, "Wrong number of arguments to if, expecting 2 or 3")),
    }
}

fn analyze_let(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
    tail: bool,
    is_loop: bool,
) -> Result<Expr, SpannedError> {
    let form_name = if is_loop { "loop" } else { "let" };
    let Some((bindings_form, body)) = args.split_first() else {
        return Err(err(span, format!("{} requires a binding vector", form_name)));
    };
    let Value::Vector { value: bindings_vec, .. } = bindings_form else {
        return Err(err(
            span,
            format!("First argument to {} must be a vector", form_name),
        ));
    };
    if bindings_vec.len() % 2 == 1 {
        return Err(err(
            span,
            format!(
                "{} binding vector requires an even number of forms",
                form_name
            ),
        ));
    }

    let mut inner = scope.clone();
    let mut bindings = Vec::with_capacity(bindings_vec.len() / 2);
    let mut iter = bindings_vec.iter();
    while let (Some(binding), Some(init_form)) = (iter.next(), iter.next()) {
        let Value::Symbol { name, meta, .. } = binding else {
            return Err(err(
                span,
                format!("{} binding names must be symbols", form_name),
            ));
        };
        let init = analyze_form(ctx, &inner, init_form, false)?;
        // :tag flows from the binding symbol or from the init form
        let tag = meta_tag(meta.as_deref())
            .or_else(|| tag_of_form(&inner, init_form));
        inner = inner.with_local(*name, tag);
        bindings.push((*name, init));
    }

    if is_loop {
        inner.recur_arity = Some(bindings.len());
        let body = analyze_body(ctx, &inner, body, true)?;
        Ok(Expr::Loop {
            span: span.clone(),
            bindings,
            body: Arc::from(body),
        })
    } else {
        let body = analyze_body(ctx, &inner, body, tail)?;
        Ok(Expr::Let { span: span.clone(), bindings, body })
    }
}

fn analyze_fn(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
) -> Result<Arc<FnDef>, SpannedError> {
    let mut rest = args;
    let name = match rest.first() {
        Some(Value::Symbol { name, .. }) => {
            rest = &rest[1..];
            Some(*name)
        }
        _ => None,
    };

    let mut arities: Vec<FnArity> = Vec::new();
    let mut variadic: Option<FnArity> = None;

    let bodies: Vec<(&Value, Vec<Value>)> = match rest.first() {
        Some(Value::Vector { .. }) => {
            vec![(&rest[0], rest[1..].to_vec())]
        }
        Some(Value::List { .. }) => rest
            .iter()
            .map(|clause| match clause {
                Value::List { value, .. } => {
                    let mut items = value.iter();
                    let params = items.next().ok_or_else(|| {
                        err(span, "fn arity clause requires a parameter vector")
                    })?;
                    Ok((params, items.cloned().collect()))
                }
                _ => Err(err(span, "fn arity clauses must be lists")),
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(err(span, "fn requires a parameter vector")),
    };

    for (params_form, body_forms) in bodies {
        let Value::Vector { value: params_vec, .. } = params_form else {
            return Err(err(span, "fn parameters must be a vector"));
        };
        let mut params = Vec::new();
        let mut rest_param = None;
        let mut scope_body = scope.clone();
        if let Some(name) = name {
            scope_body = scope_body.with_local(name, None);
        }

        let amp = interner::intern_sym("&");
        let mut items = params_vec.iter().peekable();
        while let Some(param) = items.next() {
            let Value::Symbol { name: param_name, meta, .. } = param else {
                return Err(err(span, "fn parameters must be symbols"));
            };
            if *param_name == amp {
                match items.next() {
                    Some(Value::Symbol { name: rest_name, .. }) => {
                        if items.peek().is_some() {
                            return Err(err(
                                span,
                                "only one parameter may follow &",
                            ));
                        }
                        rest_param = Some(*rest_name);
                        scope_body = scope_body.with_local(*rest_name, None);
                    }
                    _ => {
                        return Err(err(span, "& must be followed by a symbol"))
                    }
                }
                break;
            }
            scope_body =
                scope_body.with_local(*param_name, meta_tag(meta.as_deref()));
            params.push(*param_name);
        }

        scope_body.recur_arity =
            Some(params.len() + usize::from(rest_param.is_some()));
        let body = analyze_body(ctx, &scope_body, &body_forms, true)?;
        let arity = FnArity {
            params,
            rest: rest_param,
            body: Arc::from(body),
        };
        if arity.rest.is_some() {
            if variadic.is_some() {
                return Err(err(span, "fn can have only one variadic arity"));
            }
            variadic = Some(arity);
        } else {
            if arities.iter().any(|a| a.params.len() == arity.params.len()) {
                return Err(err(span, "fn has duplicate arity"));
            }
            arities.push(arity);
        }
    }

    Ok(Arc::new(FnDef { name, arities, variadic }))
}

fn analyze_def(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
    is_macro: bool,
) -> Result<Expr, SpannedError> {
    let form_name = if is_macro { "defmacro" } else { "def" };
    let Some((name_form, rest)) = args.split_first() else {
        return Err(err(span, format!("{} requires a symbol", form_name)));
    };
    let Value::Symbol { name: sym, meta: sym_meta, .. } = name_form else {
        return Err(err(
            span,
            format!("First argument to {} must be a symbol", form_name),
        ));
    };

    let mut meta = sym_meta.as_deref().cloned().unwrap_or_default();

    // the target namespace comes from :ns metadata, defaulting to current
    let ns_key = Value::keyword(None, interner::intern_kw("ns"));
    let target_ns = match meta.get(&ns_key) {
        Some(Value::Symbol { name, .. }) => {
            interner::intern_ns(&interner::sym_name(*name))
        }
        _ => ctx.current_ns(),
    };

    // intern the var before touching the init, so the init can refer to it
    let var = {
        let mut env = ctx.env.write().unwrap();
        env.find_or_create_ns(target_ns).intern(*sym)
    };

    // (def name), (def name init), (def name docstring init);
    // defmacro takes a fn tail instead.
    let (doc, init_form): (Option<&Value>, Option<Expr>) = if is_macro {
        let mut fn_args = rest;
        let doc = match fn_args.first() {
            Some(doc @ Value::String { .. }) => {
                fn_args = &fn_args[1..];
                Some(doc)
            }
            _ => None,
        };
        // macros receive the whole form and the caller's bindings as
        // implicit leading parameters
        let fn_args = prepend_macro_params(span, fn_args)?;
        let def = analyze_fn(ctx, scope, span, &fn_args)?;
        (doc, Some(Expr::FnDecl { span: span.clone(), def }))
    } else {
        match rest {
            [] => (None, None),
            [init] => (None, Some(analyze_form(ctx, scope, init, false)?)),
            [doc @ Value::String { .. }, init] => {
                (Some(doc), Some(analyze_form(ctx, scope, init, false)?))
            }
            [other, _] => {
                return Err(err(
                    span,
                    format!(
                        "Docstring must be a string, got {}",
                        other.kind_name()
                    ),
                ))
            }
            _ => {
                return Err(err(
                    span,
                    format!("Too many arguments to {}", form_name),
                ))
            }
        }
    };
    if let Some(doc) = doc {
        meta.insert(
            Value::keyword(None, interner::intern_kw("doc")),
            doc.clone(),
        );
    }

    let dynamic_key = Value::keyword(None, interner::intern_kw("dynamic"));
    let dynamic = meta
        .get(&dynamic_key)
        .map(|v| v.is_truthy())
        .unwrap_or(false);

    Ok(Expr::Def {
        span: span.clone(),
        var,
        meta: (!meta.is_empty()).then(|| Arc::new(meta)),
        init: init_form.map(Box::new),
        is_macro,
        dynamic,
    })
}

/// Rewrites a `defmacro` fn tail so every arity takes `&form` and `&env`
/// ahead of the declared parameters.
fn prepend_macro_params(
    span: &Span,
    fn_args: &[Value],
) -> Result<Vec<Value>, SpannedError> {
    let implicit = [
        Value::symbol(None, interner::intern_sym("&form")),
        Value::symbol(None, interner::intern_sym("&env")),
    ];
    let prepend = |params: &Value| -> Result<Value, SpannedError> {
        let Value::Vector { value, span: params_span, .. } = params else {
            return Err(err(span, "defmacro requires a parameter vector"));
        };
        let mut out: crate::collections::Vector<Value> =
            implicit.iter().cloned().collect();
        for param in value.iter() {
            out.push_back(param.clone());
        }
        Ok(Value::Vector { span: params_span.clone(), value: out, meta: None })
    };

    match fn_args.first() {
        Some(params @ Value::Vector { .. }) => {
            let mut out = vec![prepend(params)?];
            out.extend(fn_args[1..].iter().cloned());
            Ok(out)
        }
        Some(Value::List { .. }) => fn_args
            .iter()
            .map(|clause| match clause {
                Value::List { value, span: clause_span, .. } => {
                    let mut items = value.iter();
                    let params = items.next().ok_or_else(|| {
                        err(span, "defmacro arity clause requires parameters")
                    })?;
                    let mut rebuilt = vec![prepend(params)?];
                    rebuilt.extend(items.cloned());
                    Ok(Value::List {
                        span: clause_span.clone(),
                        value: Arc::new(rebuilt.into_iter().collect()),
                        meta: None,
                    })
                }
                other => Err(err(
                    span,
                    format!(
                        "defmacro arity clauses must be lists, got {}",
                        other.kind_name()
                    ),
                )),
            })
            .collect(),
        _ => Err(err(span, "defmacro requires a parameter vector")),
    }
}

fn analyze_case(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
    tail: bool,
) -> Result<Expr, SpannedError> {
    let Some((scrutinee, clauses)) = args.split_first() else {
        return Err(err(span, "case requires an expression"));
    };
    let mut table: Map<Value, usize> = Map::new();
    let mut branches = Vec::new();
    let mut default = None;

    let mut iter = clauses.chunks_exact(2);
    for pair in iter.by_ref() {
        let key = pair[0].clone();
        let branch = analyze_form(ctx, scope, &pair[1], tail)?;
        table.insert(key, branches.len());
        branches.push(branch);
    }
    if let [default_form] = iter.remainder() {
        default = Some(Box::new(analyze_form(ctx, scope, default_form, tail)?));
    }

    Ok(Expr::Case {
        span: span.clone(),
        expr: Box::new(analyze_form(ctx, scope, scrutinee, false)?),
        table,
        branches,
        default,
    })
}

fn analyze_try(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
) -> Result<Expr, SpannedError> {
    let mut body = Vec::new();
    let mut catches = Vec::new();
    let mut finally = None;

    for form in args {
        if is_clause(form, "catch") {
            let Value::List { value, span: clause_span, .. } = form else {
                unreachable!()
            };
            let items: Vec<Value> = value.iter().cloned().collect();
            let [_, class_form, binding_form, catch_body @ ..] = items.as_slice()
            else {
                return Err(err(
                    clause_span,
                    "catch requires a class and a binding symbol",
                ));
            };
            let class = resolve_class(clause_span, class_form)?;
            let Value::Symbol { name: binding, .. } = binding_form else {
                return Err(err(clause_span, "catch binding must be a symbol"));
            };
            let catch_scope = scope.with_local(*binding, None);
            catches.push(CatchClause {
                class,
                binding: *binding,
                body: analyze_body(ctx, &catch_scope, catch_body, false)?,
            });
        } else if is_clause(form, "finally") {
            let Value::List { value, span: clause_span, .. } = form else {
                unreachable!()
            };
            if finally.is_some() {
                return Err(err(clause_span, "try allows only one finally"));
            }
            let items: Vec<Value> = value.iter().skip(1).cloned().collect();
            finally = Some(analyze_body(ctx, scope, &items, false)?);
        } else {
            if !catches.is_empty() || finally.is_some() {
                return Err(err(
                    &form.span(),
                    "try body forms must precede catch and finally",
                ));
            }
            body.push(analyze_form(ctx, scope, form, false)?);
        }
    }

    Ok(Expr::Try { span: span.clone(), body, catches, finally })
}

fn is_clause(form: &Value, name: &str) -> bool {
    if let Value::List { value, .. } = form {
        if let Some(Value::Symbol { ns: None, name: head, .. }) = value.head() {
            return interner::sym_name(*head) == name;
        }
    }
    false
}

fn resolve_class(span: &Span, form: &Value) -> Result<ClassId, SpannedError> {
    match form {
        Value::Symbol { ns: None, name, .. } => {
            let text = interner::sym_name(*name);
            host::find_class(&text).ok_or_else(|| {
                resolution_err(span, format!("Could not resolve class: {}", text))
            })
        }
        other => Err(err(
            span,
            format!("Expected a class symbol, got {}", other.kind_name()),
        )),
    }
}

fn analyze_recur(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
    tail: bool,
) -> Result<Expr, SpannedError> {
    let Some(expected) = scope.recur_arity else {
        return Err(err(span, "recur can only be used inside fn or loop"));
    };
    if !tail {
        return Err(err(span, "Can only recur from tail position"));
    }
    if args.len() != expected {
        return Err(err(
            span,
            format!(
                "Mismatched argument count to recur, expected: {} args, got: {}",
                expected,
                args.len()
            ),
        ));
    }
    Ok(Expr::Recur {
        span: span.clone(),
        args: analyze_args(ctx, scope, args)?,
    })
}

fn analyze_new(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
) -> Result<Expr, SpannedError> {
    let Some((class_form, ctor_args)) = args.split_first() else {
        return Err(err(span, "new requires a class"));
    };
    let class = resolve_class(span, class_form)?;
    Ok(Expr::New {
        span: span.clone(),
        class,
        args: analyze_args(ctx, scope, ctor_args)?,
    })
}

/// `(. target method args...)` and `(. target (method args...))`.
fn analyze_dot(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
) -> Result<Expr, SpannedError> {
    let Some((target, rest)) = args.split_first() else {
        return Err(err(span, ". requires a target and a member"));
    };
    match rest {
        [Value::Symbol { name, .. }, method_args @ ..] => {
            let tag = tag_of_form(scope, target);
            Ok(Expr::InstanceCall {
                span: span.clone(),
                target: Box::new(analyze_form(ctx, scope, target, false)?),
                method: *name,
                args: analyze_args(ctx, scope, method_args)?,
                tag,
            })
        }
        [Value::List { value, .. }] => {
            let items: Vec<Value> = value.iter().cloned().collect();
            let [Value::Symbol { name, .. }, method_args @ ..] = items.as_slice()
            else {
                return Err(err(span, ". member list must start with a symbol"));
            };
            let tag = tag_of_form(scope, target);
            Ok(Expr::InstanceCall {
                span: span.clone(),
                target: Box::new(analyze_form(ctx, scope, target, false)?),
                method: *name,
                args: analyze_args(ctx, scope, method_args)?,
                tag,
            })
        }
        _ => Err(err(span, ". requires a member symbol")),
    }
}

fn analyze_set_bang(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
) -> Result<Expr, SpannedError> {
    let [target_form, value_form] = args else {
        return Err(err(span, "set! requires a target and a value"));
    };
    // a symbol target resolves to the var itself, not its value
    let target = match target_form {
        Value::Symbol { ns, name, span: sym_span, .. }
            if ns.is_some() || !scope.locals.contains_key(name) =>
        {
            let var = resolve_var(ctx, sym_span, *ns, *name)?;
            Expr::VarRef { span: sym_span.clone(), var }
        }
        other => analyze_form(ctx, scope, other, false)?,
    };
    Ok(Expr::SetBang {
        span: span.clone(),
        target: Box::new(target),
        value: Box::new(analyze_form(ctx, scope, value_form, false)?),
    })
}

fn analyze_binding(
    ctx: &Ctx,
    scope: &Scope,
    span: &Span,
    args: &[Value],
) -> Result<Expr, SpannedError> {
    let Some((bindings_form, body)) = args.split_first() else {
        return Err(err(span, "binding requires a binding vector"));
    };
    let Value::Vector { value: bindings_vec, .. } = bindings_form else {
        return Err(err(span, "First argument to binding must be a vector"));
    };
    if bindings_vec.len() % 2 == 1 {
        return Err(err(
            span,
            "binding vector requires an even number of forms",
        ));
    }

    let mut bindings = Vec::with_capacity(bindings_vec.len() / 2);
    let mut iter = bindings_vec.iter();
    while let (Some(binding), Some(init_form)) = (iter.next(), iter.next()) {
        let Value::Symbol { ns, name, span: sym_span, .. } = binding else {
            return Err(err(span, "binding names must be symbols"));
        };
        let var = resolve_var(ctx, sym_span, *ns, *name)?;
        bindings.push((var, analyze_form(ctx, scope, init_form, false)?));
    }

    Ok(Expr::Binding {
        span: span.clone(),
        bindings,
        body: analyze_body(ctx, scope, body, false)?,
    })
}

fn resolve_var(
    ctx: &Ctx,
    span: &Span,
    ns: Option<NsId>,
    name: SymId,
) -> Result<Arc<Var>, SpannedError> {
    let env = ctx.env.read().unwrap();
    let resolved = match ns {
        None => env.resolve_bare(env.current_ns, name),
        Some(ns_part) => env.resolve_qualified(
            env.current_ns,
            &interner::ns_name(ns_part),
            name,
        ),
    };
    resolved.ok_or_else(|| {
        resolution_err(
            span,
            format!("Could not resolve var: {}", interner::sym_name(name)),
        )
    })
}

/// Rewrites `(ns name (:require spec...) ...)` into
/// `(do (in-ns 'name) (require 'spec ...) ... nil)`.
fn expand_ns(span: &Span, args: &[Value]) -> Result<Value, SpannedError> {
    let Some((name_form, clauses)) = args.split_first() else {
        return Err(err(span, "ns requires a name symbol"));
    };
    if !matches!(name_form, Value::Symbol { .. }) {
        return Err(err(span, "ns name must be a symbol"));
    }

    let quote = |form: &Value| {
        Value::list(
            crate::collections::List::new()
                .prepend(form.clone())
                .prepend(Value::symbol(None, interner::intern_sym("quote"))),
        )
    };

    let mut body = vec![Value::list(
        crate::collections::List::new()
            .prepend(quote(name_form))
            .prepend(Value::symbol(None, interner::intern_sym("in-ns"))),
    )];

    for clause in clauses {
        let Value::List { value, .. } = clause else {
            return Err(err(&clause.span(), "ns clauses must be lists"));
        };
        let mut items = value.iter();
        match items.next() {
            Some(Value::Keyword { name, .. })
                if interner::kw_name(*name) == "require" =>
            {
                let mut require_items =
                    vec![Value::symbol(None, interner::intern_sym("require"))];
                require_items.extend(items.map(|spec| quote(spec)));
                body.push(Value::list(
                    require_items.into_iter().rev().fold(
                        crate::collections::List::new(),
                        |acc, item| acc.prepend(item),
                    ),
                ));
            }
            _ => {
                return Err(err(
                    &clause.span(),
                    "Unsupported ns clause (only :require is recognized)",
                ))
            }
        }
    }
    body.push(Value::nil());

    let mut do_items = vec![Value::symbol(None, interner::intern_sym("do"))];
    do_items.extend(body);
    Ok(Value::List {
        span: span.clone(),
        value: Arc::new(do_items.into_iter().collect()),
        meta: None,
    })
}
