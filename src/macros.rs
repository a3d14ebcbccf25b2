//! The macro engine: single-step and fixed-point expansion, the `for`
//! comprehension expander, and syntax-quote rewriting.
//!
//! A macro is an ordinary var flagged as such; its function is called with
//! the whole original form, a map of the caller's lexical bindings, and the
//! unevaluated argument forms.

use std::sync::Arc;

use crate::collections::{List, Map};
use crate::core::Var;
use crate::env::Ctx;
use crate::error::{Error, SpannedError};
use crate::eval;
use crate::interner::{self, SymId};
use crate::reader::Span;
use crate::value::Value;

/// Names the analyzer treats as special forms; these never macroexpand.
pub fn is_special_form(name: &str) -> bool {
    matches!(
        name,
        "do" | "if"
            | "and"
            | "or"
            | "let"
            | "let*"
            | "fn"
            | "fn*"
            | "def"
            | "defmacro"
            | "loop"
            | "recur"
            | "quote"
            | "syntax-quote"
            | "unquote"
            | "unquote-splicing"
            | "case"
            | "try"
            | "catch"
            | "finally"
            | "throw"
            | "new"
            | "."
            | "in-ns"
            | "set!"
            | "refer"
            | "resolve"
            | "macroexpand-1"
            | "macroexpand"
            | "require"
            | "binding"
            | "var"
            | "deref"
            | "ns"
    )
}

fn make_list(span: &Span, items: Vec<Value>) -> Value {
    Value::List {
        span: span.clone(),
        value: Arc::new(items.into_iter().collect::<List<Value>>()),
        meta: None,
    }
}

fn sym(span: &Span, name: &str) -> Value {
    Value::Symbol {
        span: span.clone(),
        ns: None,
        name: interner::intern_sym(name),
        meta: None,
    }
}

fn head_symbol_name(form: &Value) -> Option<(Option<()>, SymId)> {
    if let Value::List { value, .. } = form {
        if let Some(Value::Symbol { ns, name, .. }) = value.head() {
            return Some((ns.map(|_| ()), *name));
        }
    }
    None
}

fn is_call_to(form: &Value, name: &str) -> bool {
    match head_symbol_name(form) {
        Some((None, sym)) => interner::sym_name(sym) == name,
        _ => false,
    }
}

/// Calls a macro var's function with `(form, bindings, ...args)`.
pub fn call_macro(
    ctx: &Ctx,
    span: &Span,
    var: &Arc<Var>,
    form: &Value,
    args: &[Value],
) -> Result<Value, SpannedError> {
    let f = var.deref().ok_or_else(|| {
        SpannedError::new(
            Error::Resolution(format!(
                "Macro {}/{} is unbound",
                interner::ns_name(var.ns),
                interner::sym_name(var.sym)
            )),
            span.clone(),
        )
    })?;

    let mut call_args = Vec::with_capacity(args.len() + 2);
    call_args.push(form.clone());
    call_args.push(bindings_map(ctx));
    call_args.extend(args.iter().cloned());
    eval::call_value(ctx, span, &f, &call_args)
}

fn bindings_map(ctx: &Ctx) -> Value {
    let mut map: Map<Value, Value> = Map::new();
    for (sym, value) in ctx.bindings.iter() {
        map.insert(Value::symbol(None, *sym), value.clone());
    }
    Value::map(map)
}

/// One expansion step. Non-lists, non-symbol heads, special forms and
/// non-macro operators come back unchanged.
pub fn macroexpand_1(ctx: &Ctx, form: &Value) -> Result<Value, SpannedError> {
    let Value::List { value: list, span, .. } = form else {
        return Ok(form.clone());
    };
    let Some(head) = list.head() else {
        return Ok(form.clone());
    };
    let Value::Symbol { ns, name, .. } = head else {
        return Ok(form.clone());
    };

    let name_text = interner::sym_name(*name);
    if ns.is_none() && is_special_form(&name_text) {
        return Ok(form.clone());
    }
    if ns.is_none() && name_text == "for" {
        return expand_for(span, form);
    }

    let resolved = {
        let env = ctx.env.read().unwrap();
        match ns {
            None => env.resolve_bare(env.current_ns, *name),
            Some(ns_part) => env.resolve_qualified(
                env.current_ns,
                &interner::ns_name(*ns_part),
                *name,
            ),
        }
    };
    if let Some(var) = resolved {
        if var.is_macro() {
            let args: Vec<Value> =
                list.tail().unwrap_or_default().iter().cloned().collect();
            return call_macro(ctx, span, &var, form, &args);
        }
    }
    Ok(form.clone())
}

/// Expands to a structural fixed point.
pub fn macroexpand(ctx: &Ctx, form: &Value) -> Result<Value, SpannedError> {
    let mut current = form.clone();
    loop {
        let next = macroexpand_1(ctx, &current)?;
        if next == current {
            return Ok(next);
        }
        current = next;
    }
}

//===----------------------------------------------------------------------===//
// for comprehension
//===----------------------------------------------------------------------===//

/// Expands `(for [sym coll (:when test)? ...] body)` into nested lazy
/// `mapcat`/`map` calls, with `:when` guards becoming `filter` on the level
/// they follow.
pub fn expand_for(span: &Span, form: &Value) -> Result<Value, SpannedError> {
    let Value::List { value: list, .. } = form else {
        return Err(bad_for(span));
    };
    let mut iter = list.iter();
    iter.next(); // the `for` symbol
    let bindings = match iter.next() {
        Some(Value::Vector { value, .. }) => value.clone(),
        _ => return Err(bad_for(span)),
    };
    let body: Vec<Value> = iter.cloned().collect();
    if body.is_empty() {
        return Err(bad_for(span));
    }
    let body = if body.len() == 1 {
        body.into_iter().next().expect("one body form")
    } else {
        let mut items = vec![sym(span, "do")];
        items.extend(body);
        make_list(span, items)
    };

    // collect (sym, coll, when?) levels
    let mut levels: Vec<(Value, Value, Option<Value>)> = Vec::new();
    let mut items = bindings.iter().peekable();
    while let Some(binding) = items.next() {
        let kw_when = Value::keyword(None, interner::intern_kw("when"));
        if *binding == kw_when {
            let test = items.next().ok_or_else(|| bad_for(span))?.clone();
            match levels.last_mut() {
                Some(level) => level.2 = Some(test),
                None => return Err(bad_for(span)),
            }
            continue;
        }
        if !matches!(binding, Value::Symbol { .. }) {
            return Err(bad_for(span));
        }
        let coll = items.next().ok_or_else(|| bad_for(span))?.clone();
        levels.push((binding.clone(), coll, None));
    }
    if levels.is_empty() {
        return Err(bad_for(span));
    }

    // build inside-out: the innermost level maps, outer levels mapcat
    let mut expansion = body;
    let last_idx = levels.len() - 1;
    for (idx, (binding, coll, when)) in levels.into_iter().enumerate().rev() {
        let source = match when {
            Some(test) => make_list(
                span,
                vec![
                    sym(span, "filter"),
                    make_list(
                        span,
                        vec![
                            sym(span, "fn"),
                            Value::Vector {
                                span: span.clone(),
                                value: std::iter::once(binding.clone()).collect(),
                                meta: None,
                            },
                            test,
                        ],
                    ),
                    coll,
                ],
            ),
            None => coll,
        };
        let mapper = make_list(
            span,
            vec![
                sym(span, "fn"),
                Value::Vector {
                    span: span.clone(),
                    value: std::iter::once(binding).collect(),
                    meta: None,
                },
                expansion,
            ],
        );
        let op = if idx == last_idx { "map" } else { "mapcat" };
        expansion = make_list(span, vec![sym(span, op), mapper, source]);
    }
    Ok(expansion)
}

fn bad_for(span: &Span) -> SpannedError {
    SpannedError::new(
        Error::Analysis(
            "for requires a binding vector of [sym coll ...] pairs and a body"
                .to_string(),
        ),
        span.clone(),
    )
}

//===----------------------------------------------------------------------===//
// syntax-quote
//===----------------------------------------------------------------------===//

/// Rewrites a syntax-quoted form into calls that rebuild it, honoring
/// `unquote` and `unquote-splicing`. Symbols stay unqualified.
pub fn syntax_quote(form: &Value) -> Value {
    let span = form.span();
    match form {
        Value::List { value, .. } => {
            if is_call_to(form, "unquote") {
                return value
                    .tail()
                    .and_then(|t| t.head().cloned())
                    .unwrap_or_else(Value::nil);
            }
            let segs = splice_segments(&span, value.iter());
            make_list(
                &span,
                vec![
                    sym(&span, "apply"),
                    sym(&span, "list"),
                    make_concat(&span, segs),
                ],
            )
        }
        Value::Vector { value, .. } => {
            let segs = splice_segments(&span, value.iter());
            make_list(&span, vec![sym(&span, "vec"), make_concat(&span, segs)])
        }
        Value::Set { value, .. } => {
            let segs = splice_segments(&span, value.iter());
            make_list(
                &span,
                vec![
                    sym(&span, "apply"),
                    sym(&span, "hash-set"),
                    make_concat(&span, segs),
                ],
            )
        }
        Value::Map { value, .. } => {
            let flat: Vec<Value> = value
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect();
            let segs = splice_segments(&span, flat.iter());
            make_list(
                &span,
                vec![
                    sym(&span, "apply"),
                    sym(&span, "hash-map"),
                    make_concat(&span, segs),
                ],
            )
        }
        Value::Symbol { .. } => {
            make_list(&span, vec![sym(&span, "quote"), form.clone()])
        }
        other => other.clone(),
    }
}

fn make_concat(span: &Span, segs: Vec<Value>) -> Value {
    let mut items = vec![sym(span, "concat")];
    items.extend(segs);
    make_list(span, items)
}

fn splice_segments<'a, I>(span: &Span, items: I) -> Vec<Value>
where
    I: Iterator<Item = &'a Value>,
{
    items
        .map(|item| {
            if is_call_to(item, "unquote-splicing") {
                if let Value::List { value, .. } = item {
                    return value
                        .tail()
                        .and_then(|t| t.head().cloned())
                        .unwrap_or_else(Value::nil);
                }
                Value::nil()
            } else {
                make_list(span, vec![sym(span, "list"), syntax_quote(item)])
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn read_one(src: &str) -> Value {
        Reader::read_all(src).expect("read").remove(0)
    }

    #[test]
    fn for_expands_to_map() {
        let form = read_one("(for [x xs] (inc x))");
        let expanded = expand_for(&form.span(), &form).expect("expand");
        assert!(expanded.to_string().starts_with("(map (fn [x]"));
    }

    #[test]
    fn for_when_becomes_filter() {
        let form = read_one("(for [x xs :when (pos? x)] x)");
        let expanded = expand_for(&form.span(), &form).expect("expand");
        let text = expanded.to_string();
        assert!(text.contains("(filter (fn [x] (pos? x)) xs)"), "{}", text);
    }

    #[test]
    fn syntax_quote_symbol_quotes() {
        let expanded = syntax_quote(&read_one("x"));
        assert_eq!(expanded.to_string(), "(quote x)");
    }

    #[test]
    fn syntax_quote_splices() {
        let expanded = syntax_quote(&read_one("(a ~b ~@cs)"));
        let text = expanded.to_string();
        assert!(text.contains("(list (quote a))"), "{}", text);
        assert!(text.contains("(list b)"), "{}", text);
        assert!(text.contains("cs"), "{}", text);
    }
}
