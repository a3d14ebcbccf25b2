//! The native core library. Every function here is bound to a var in the
//! `sable.core` namespace; new namespaces refer these vars automatically.
//! `defn` and `when` are native macros: vars flagged as macros whose value
//! receives the raw forms.

use std::collections::VecDeque;
use std::sync::Arc;

use itertools::Itertools;

use crate::collections::{List, Map, Set, Vector};
use crate::core::Namespace;
use crate::env::{Ctx, GlobalEnv, CORE_NS_NAME};
use crate::error::{Error, SpannedError};
use crate::eval;
use crate::host::{self, HostError};
use crate::interner;
use crate::lazy::{
    ConcatEngine, FilterEngine, LazyShared, MapEngine, MapcatEngine, RangeEngine,
    SeqCursor, TakeEngine,
};
use crate::reader::{synthetic_span, Span};
use crate::value::{Metadata, NativeImpl, Value};

/// Installs the core library into `sable.core` and leaves the current
/// namespace untouched.
pub fn install_core(env: &mut GlobalEnv) {
    let core = interner::intern_ns(CORE_NS_NAME);
    let ns = env.find_or_create_ns(core);

    add(ns, "+", native_add);
    add(ns, "-", native_sub);
    add(ns, "*", native_mul);
    add(ns, "/", native_div);
    add(ns, "inc", native_inc);
    add(ns, "dec", native_dec);
    add(ns, "<", native_lt);
    add(ns, "<=", native_le);
    add(ns, ">", native_gt);
    add(ns, ">=", native_ge);
    add(ns, "=", native_eq);
    add(ns, "not=", native_neq);
    add(ns, "not", native_not);
    add(ns, "nil?", native_nil_p);
    add(ns, "zero?", native_zero_p);
    add(ns, "pos?", native_pos_p);
    add(ns, "neg?", native_neg_p);
    add(ns, "empty?", native_empty_p);
    add(ns, "identity", native_identity);
    add(ns, "count", native_count);
    add(ns, "first", native_first);
    add(ns, "second", native_second);
    add(ns, "rest", native_rest);
    add(ns, "next", native_next);
    add(ns, "seq", native_seq);
    add(ns, "cons", native_cons);
    add(ns, "conj", native_conj);
    add(ns, "list", native_list);
    add(ns, "vector", native_vector);
    add(ns, "vec", native_vec);
    add(ns, "set", native_set);
    add(ns, "hash-set", native_hash_set);
    add(ns, "hash-map", native_hash_map);
    add(ns, "assoc", native_assoc);
    add(ns, "dissoc", native_dissoc);
    add(ns, "get", native_get);
    add(ns, "contains?", native_contains_p);
    add(ns, "nth", native_nth);
    add(ns, "map", native_map);
    add(ns, "filter", native_filter);
    add(ns, "mapcat", native_mapcat);
    add(ns, "concat", native_concat);
    add(ns, "range", native_range);
    add(ns, "take", native_take);
    add(ns, "reduce", native_reduce);
    add(ns, "apply", native_apply);
    add(ns, "str", native_str);
    add(ns, "pr-str", native_pr_str);
    add(ns, "print", native_print);
    add(ns, "println", native_println);
    add(ns, "ex-info", native_ex_info);
    add(ns, "ex-message", native_ex_message);
    add(ns, "ex-data", native_ex_data);
    add(ns, "meta", native_meta);
    add(ns, "with-meta", native_with_meta);
    add(ns, "alter-meta!", native_alter_meta);
    add(ns, "name", native_name);
    add(ns, "namespace", native_namespace);
    add(ns, "keyword", native_keyword);
    add(ns, "symbol", native_symbol);
    add(ns, "deref", native_deref);
    add(ns, "instance?", native_instance_p);
    add(ns, "class", native_class);

    add_macro(ns, "defn", macro_defn);
    add_macro(ns, "when", macro_when);
    add_macro(ns, "when-not", macro_when_not);
}

fn add(ns: &mut Namespace, name: &str, f: NativeImpl) {
    let sym = interner::intern_sym(name);
    let var = ns.intern(sym);
    var.bind_root(Value::Native { span: synthetic_span(), name: sym, f });
}

fn add_macro(ns: &mut Namespace, name: &str, f: NativeImpl) {
    let sym = interner::intern_sym(name);
    let var = ns.intern(sym);
    var.bind_root(Value::Native { span: synthetic_span(), name: sym, f });
    var.set_macro(true);
}

//===----------------------------------------------------------------------===//
// Helpers
//===----------------------------------------------------------------------===//

fn type_err(span: &Span, msg: impl Into<String>) -> SpannedError {
    SpannedError::new(Error::Type(msg.into()), span.clone())
}

fn arity_err(span: &Span, name: &str, got: usize) -> SpannedError {
    SpannedError::new(
        Error::Arity(format!("Wrong number of args ({}) passed to: {}", got, name)),
        span.clone(),
    )
}

#[derive(Copy, Clone)]
enum Num {
    Int(i64),
    Float(f64),
}

fn as_number(span: &Span, v: &Value) -> Result<Num, SpannedError> {
    match v {
        Value::Int { value, .. } => Ok(Num::Int(*value)),
        Value::Float { value, .. } => Ok(Num::Float(*value)),
        other => Err(type_err(
            span,
            format!("Expected a number, got {}", other.kind_name()),
        )),
    }
}

fn num_value(n: Num) -> Value {
    match n {
        Num::Int(i) => Value::int(i),
        Num::Float(f) => Value::float(f),
    }
}

fn num_add(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_add(y)),
        (x, y) => Num::Float(to_f64(x) + to_f64(y)),
    }
}

fn num_sub(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_sub(y)),
        (x, y) => Num::Float(to_f64(x) - to_f64(y)),
    }
}

fn num_mul(a: Num, b: Num) -> Num {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Num::Int(x.wrapping_mul(y)),
        (x, y) => Num::Float(to_f64(x) * to_f64(y)),
    }
}

fn to_f64(n: Num) -> f64 {
    match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    }
}

fn num_cmp(a: Num, b: Num) -> std::cmp::Ordering {
    to_f64(a)
        .partial_cmp(&to_f64(b))
        .unwrap_or(std::cmp::Ordering::Equal)
}

/// Realizes any seqable value into a vector of elements.
fn realize(ctx: &Ctx, span: &Span, value: &Value) -> Result<Vec<Value>, SpannedError> {
    let mut cursor = SeqCursor::new(span, value)?;
    let mut out = Vec::new();
    while let Some(item) = cursor.next(ctx, span)? {
        out.push(item);
    }
    Ok(out)
}

/// Forces lazy handles so `=` compares contents, not identities.
fn normalized_for_eq(
    ctx: &Ctx,
    span: &Span,
    value: &Value,
) -> Result<Value, SpannedError> {
    match value {
        Value::Lazy { .. } => {
            let items = realize(ctx, span, value)?;
            Ok(Value::List {
                span: span.clone(),
                value: Arc::new(items.into_iter().collect::<List<Value>>()),
                meta: None,
            })
        }
        other => Ok(other.clone()),
    }
}

//===----------------------------------------------------------------------===//
// Arithmetic & comparison
//===----------------------------------------------------------------------===//

fn native_add(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let mut acc = Num::Int(0);
    for arg in args {
        acc = num_add(acc, as_number(span, arg)?);
    }
    Ok(num_value(acc))
}

fn native_sub(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [] => Err(arity_err(span, "-", 0)),
        [only] => Ok(num_value(num_sub(Num::Int(0), as_number(span, only)?))),
        [first, rest @ ..] => {
            let mut acc = as_number(span, first)?;
            for arg in rest {
                acc = num_sub(acc, as_number(span, arg)?);
            }
            Ok(num_value(acc))
        }
    }
}

fn native_mul(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let mut acc = Num::Int(1);
    for arg in args {
        acc = num_mul(acc, as_number(span, arg)?);
    }
    Ok(num_value(acc))
}

fn native_div(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [first, rest @ ..] = args else {
        return Err(arity_err(span, "/", 0));
    };
    let mut acc = as_number(span, first)?;
    let divisors: Vec<Num> = if rest.is_empty() {
        let one = acc;
        acc = Num::Int(1);
        vec![one]
    } else {
        rest.iter()
            .map(|arg| as_number(span, arg))
            .collect::<Result<_, _>>()?
    };
    for divisor in divisors {
        acc = match (acc, divisor) {
            (Num::Int(_), Num::Int(0)) => {
                return Err(SpannedError::new(
                    Error::Thrown(Arc::new(HostError::new(
                        host::ARITHMETIC_EXCEPTION,
                        "Divide by zero",
                    ))),
                    span.clone(),
                ))
            }
            (Num::Int(x), Num::Int(y)) if x % y == 0 => Num::Int(x / y),
            (x, y) => Num::Float(to_f64(x) / to_f64(y)),
        };
    }
    Ok(num_value(acc))
}

fn native_inc(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(num_value(num_add(as_number(span, v)?, Num::Int(1)))),
        _ => Err(arity_err(span, "inc", args.len())),
    }
}

fn native_dec(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(num_value(num_sub(as_number(span, v)?, Num::Int(1)))),
        _ => Err(arity_err(span, "dec", args.len())),
    }
}

fn compare_chain(
    span: &Span,
    args: &[Value],
    keep: fn(std::cmp::Ordering) -> bool,
) -> eval::EvalResult {
    if args.is_empty() {
        return Err(arity_err(span, "comparison", 0));
    }
    for pair in args.windows(2) {
        let a = as_number(span, &pair[0])?;
        let b = as_number(span, &pair[1])?;
        if !keep(num_cmp(a, b)) {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

fn native_lt(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    compare_chain(span, args, |o| o == std::cmp::Ordering::Less)
}

fn native_le(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    compare_chain(span, args, |o| o != std::cmp::Ordering::Greater)
}

fn native_gt(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    compare_chain(span, args, |o| o == std::cmp::Ordering::Greater)
}

fn native_ge(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    compare_chain(span, args, |o| o != std::cmp::Ordering::Less)
}

fn native_eq(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    if args.is_empty() {
        return Err(arity_err(span, "=", 0));
    }
    let first = normalized_for_eq(ctx, span, &args[0])?;
    for arg in &args[1..] {
        if normalized_for_eq(ctx, span, arg)? != first {
            return Ok(Value::bool(false));
        }
    }
    Ok(Value::bool(true))
}

fn native_neq(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match native_eq(ctx, span, args)? {
        Value::Bool { value, .. } => Ok(Value::bool(!value)),
        _ => unreachable!("= returns a boolean"),
    }
}

fn native_not(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::bool(!v.is_truthy())),
        _ => Err(arity_err(span, "not", args.len())),
    }
}

fn native_nil_p(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::bool(v.is_nil())),
        _ => Err(arity_err(span, "nil?", args.len())),
    }
}

fn native_zero_p(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::bool(to_f64(as_number(span, v)?) == 0.0)),
        _ => Err(arity_err(span, "zero?", args.len())),
    }
}

fn native_pos_p(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::bool(to_f64(as_number(span, v)?) > 0.0)),
        _ => Err(arity_err(span, "pos?", args.len())),
    }
}

fn native_neg_p(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::bool(to_f64(as_number(span, v)?) < 0.0)),
        _ => Err(arity_err(span, "neg?", args.len())),
    }
}

fn native_identity(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(v.clone()),
        _ => Err(arity_err(span, "identity", args.len())),
    }
}

//===----------------------------------------------------------------------===//
// Collections
//===----------------------------------------------------------------------===//

fn native_count(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => {
            let count = match v {
                Value::Nil { .. } => 0,
                Value::List { value, .. } => value.len(),
                Value::Vector { value, .. } => value.len(),
                Value::Set { value, .. } => value.len(),
                Value::Map { value, .. } => value.len(),
                Value::String { value, .. } => value.chars().count(),
                Value::Lazy { .. } => realize(ctx, span, v)?.len(),
                other => {
                    return Err(type_err(
                        span,
                        format!("count not supported on {}", other.kind_name()),
                    ))
                }
            };
            Ok(Value::int(count as i64))
        }
        _ => Err(arity_err(span, "count", args.len())),
    }
}

fn native_empty_p(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => {
            let first = first_of(ctx, span, v)?;
            Ok(Value::bool(first.is_none()))
        }
        _ => Err(arity_err(span, "empty?", args.len())),
    }
}

fn first_of(
    ctx: &Ctx,
    span: &Span,
    value: &Value,
) -> Result<Option<Value>, SpannedError> {
    let mut cursor = SeqCursor::new(span, value)?;
    cursor.next(ctx, span)
}

fn native_first(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(first_of(ctx, span, v)?.unwrap_or_else(Value::nil)),
        _ => Err(arity_err(span, "first", args.len())),
    }
}

fn native_second(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => {
            let mut cursor = SeqCursor::new(span, v)?;
            cursor.next(ctx, span)?;
            Ok(cursor.next(ctx, span)?.unwrap_or_else(Value::nil))
        }
        _ => Err(arity_err(span, "second", args.len())),
    }
}

fn rest_of(ctx: &Ctx, span: &Span, value: &Value) -> eval::EvalResult {
    match value {
        // lazy rest shares the memoized prefix through the offset
        Value::Lazy { seq, offset, .. } => Ok(Value::Lazy {
            span: span.clone(),
            seq: seq.clone(),
            offset: offset + 1,
        }),
        Value::List { value, .. } => Ok(Value::List {
            span: span.clone(),
            value: Arc::new(value.tail().unwrap_or_default()),
            meta: None,
        }),
        other => {
            let mut items = realize(ctx, span, other)?;
            if !items.is_empty() {
                items.remove(0);
            }
            Ok(Value::List {
                span: span.clone(),
                value: Arc::new(items.into_iter().collect::<List<Value>>()),
                meta: None,
            })
        }
    }
}

fn native_rest(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => rest_of(ctx, span, v),
        _ => Err(arity_err(span, "rest", args.len())),
    }
}

fn native_next(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => {
            let rest = rest_of(ctx, span, v)?;
            if first_of(ctx, span, &rest)?.is_none() {
                Ok(Value::nil())
            } else {
                Ok(rest)
            }
        }
        _ => Err(arity_err(span, "next", args.len())),
    }
}

fn native_seq(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => {
            let items = realize(ctx, span, v)?;
            if items.is_empty() {
                Ok(Value::nil())
            } else {
                Ok(Value::List {
                    span: span.clone(),
                    value: Arc::new(items.into_iter().collect::<List<Value>>()),
                    meta: None,
                })
            }
        }
        _ => Err(arity_err(span, "seq", args.len())),
    }
}

fn native_cons(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [item, coll] => match coll {
            Value::List { value, .. } => Ok(Value::List {
                span: span.clone(),
                value: Arc::new(value.prepend(item.clone())),
                meta: None,
            }),
            Value::Nil { .. } => Ok(Value::List {
                span: span.clone(),
                value: Arc::new(List::new().prepend(item.clone())),
                meta: None,
            }),
            other => {
                let head = SeqCursor::Items(VecDeque::from(vec![item.clone()]));
                let tail = SeqCursor::new(span, other)?;
                Ok(LazyShared::value(
                    Box::new(ConcatEngine {
                        sources: VecDeque::from(vec![head, tail]),
                        span: span.clone(),
                    }),
                    span.clone(),
                ))
            }
        },
        _ => Err(arity_err(span, "cons", args.len())),
    }
}

fn native_conj(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [coll, items @ ..] = args else {
        return Err(arity_err(span, "conj", 0));
    };
    let mut out = match coll {
        Value::Nil { .. } => Value::List {
            span: span.clone(),
            value: Arc::new(List::new()),
            meta: None,
        },
        other => other.clone(),
    };
    for item in items {
        out = match out {
            Value::List { value, .. } => Value::List {
                span: span.clone(),
                value: Arc::new(value.prepend(item.clone())),
                meta: None,
            },
            Value::Vector { mut value, .. } => {
                value.push_back(item.clone());
                Value::Vector { span: span.clone(), value, meta: None }
            }
            Value::Set { mut value, .. } => {
                value.insert(item.clone());
                Value::Set { span: span.clone(), value, meta: None }
            }
            Value::Map { mut value, .. } => {
                let pair = realize(ctx, span, item)?;
                let [k, v] = pair.as_slice() else {
                    return Err(type_err(
                        span,
                        "conj on a map requires [key value] entries",
                    ));
                };
                value.insert(k.clone(), v.clone());
                Value::Map { span: span.clone(), value, meta: None }
            }
            other => {
                return Err(type_err(
                    span,
                    format!("conj not supported on {}", other.kind_name()),
                ))
            }
        };
    }
    Ok(out)
}

fn native_list(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    Ok(Value::List {
        span: span.clone(),
        value: Arc::new(args.iter().cloned().collect::<List<Value>>()),
        meta: None,
    })
}

fn native_vector(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    Ok(Value::Vector {
        span: span.clone(),
        value: args.iter().cloned().collect::<Vector<Value>>(),
        meta: None,
    })
}

fn native_vec(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::Vector {
            span: span.clone(),
            value: realize(ctx, span, v)?.into_iter().collect(),
            meta: None,
        }),
        _ => Err(arity_err(span, "vec", args.len())),
    }
}

fn native_set(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::Set {
            span: span.clone(),
            value: realize(ctx, span, v)?.into_iter().collect(),
            meta: None,
        }),
        _ => Err(arity_err(span, "set", args.len())),
    }
}

fn native_hash_set(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    Ok(Value::Set {
        span: span.clone(),
        value: args.iter().cloned().collect::<Set<Value>>(),
        meta: None,
    })
}

fn native_hash_map(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    if args.len() % 2 == 1 {
        return Err(type_err(span, "hash-map requires an even number of args"));
    }
    let mut map = Map::new();
    for pair in args.chunks_exact(2) {
        map.insert(pair[0].clone(), pair[1].clone());
    }
    Ok(Value::Map { span: span.clone(), value: map, meta: None })
}

fn native_assoc(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [coll, kvs @ ..] = args else {
        return Err(arity_err(span, "assoc", 0));
    };
    if kvs.is_empty() || kvs.len() % 2 == 1 {
        return Err(type_err(span, "assoc requires key/value pairs"));
    }
    match coll {
        Value::Map { .. } | Value::Nil { .. } => {
            let mut map = match coll {
                Value::Map { value, .. } => value.clone(),
                _ => Map::new(),
            };
            for pair in kvs.chunks_exact(2) {
                map.insert(pair[0].clone(), pair[1].clone());
            }
            Ok(Value::Map { span: span.clone(), value: map, meta: None })
        }
        Value::Vector { value, .. } => {
            let mut vec = value.clone();
            for pair in kvs.chunks_exact(2) {
                let Value::Int { value: idx, .. } = pair[0] else {
                    return Err(type_err(span, "assoc on a vector requires integer keys"));
                };
                if idx < 0 || idx as usize > vec.len() {
                    return Err(type_err(span, format!("Index out of bounds: {}", idx)));
                }
                if (idx as usize) == vec.len() {
                    vec.push_back(pair[1].clone());
                } else {
                    vec.set(idx as usize, pair[1].clone());
                }
            }
            Ok(Value::Vector { span: span.clone(), value: vec, meta: None })
        }
        other => Err(type_err(
            span,
            format!("assoc not supported on {}", other.kind_name()),
        )),
    }
}

fn native_dissoc(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [coll, keys @ ..] = args else {
        return Err(arity_err(span, "dissoc", 0));
    };
    match coll {
        Value::Map { value, .. } => {
            let mut map = value.clone();
            for key in keys {
                map.remove(key);
            }
            Ok(Value::Map { span: span.clone(), value: map, meta: None })
        }
        Value::Nil { .. } => Ok(Value::nil()),
        other => Err(type_err(
            span,
            format!("dissoc not supported on {}", other.kind_name()),
        )),
    }
}

fn native_get(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let (coll, key, default) = match args {
        [coll, key] => (coll, key, None),
        [coll, key, default] => (coll, key, Some(default)),
        _ => return Err(arity_err(span, "get", args.len())),
    };
    let found = match coll {
        Value::Map { value, .. } => value.get(key).cloned(),
        Value::Set { value, .. } => value.contains(key).then(|| key.clone()),
        Value::Vector { value, .. } => match key {
            Value::Int { value: idx, .. } if *idx >= 0 => {
                value.get(*idx as usize).cloned()
            }
            _ => None,
        },
        Value::Nil { .. } => None,
        _ => None,
    };
    Ok(found.unwrap_or_else(|| {
        default.cloned().unwrap_or_else(Value::nil)
    }))
}

fn native_contains_p(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [coll, key] => {
            let contained = match coll {
                Value::Map { value, .. } => value.contains_key(key),
                Value::Set { value, .. } => value.contains(key),
                Value::Vector { value, .. } => match key {
                    Value::Int { value: idx, .. } => {
                        *idx >= 0 && (*idx as usize) < value.len()
                    }
                    _ => false,
                },
                Value::Nil { .. } => false,
                other => {
                    return Err(type_err(
                        span,
                        format!(
                            "contains? not supported on {}",
                            other.kind_name()
                        ),
                    ))
                }
            };
            Ok(Value::bool(contained))
        }
        _ => Err(arity_err(span, "contains?", args.len())),
    }
}

fn native_nth(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let (coll, idx, default) = match args {
        [coll, idx] => (coll, idx, None),
        [coll, idx, default] => (coll, idx, Some(default)),
        _ => return Err(arity_err(span, "nth", args.len())),
    };
    let Value::Int { value: idx, .. } = idx else {
        return Err(type_err(span, "nth requires an integer index"));
    };
    let found = if *idx < 0 {
        None
    } else {
        match coll {
            Value::Vector { value, .. } => value.get(*idx as usize).cloned(),
            Value::Lazy { seq, offset, .. } => {
                seq.get(ctx, span, offset + *idx as usize)?
            }
            other => realize(ctx, span, other)?.get(*idx as usize).cloned(),
        }
    };
    match (found, default) {
        (Some(v), _) => Ok(v),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(SpannedError::new(
            Error::Thrown(Arc::new(HostError::new(
                host::EXCEPTION,
                format!("Index out of bounds: {}", idx),
            ))),
            span.clone(),
        )),
    }
}

//===----------------------------------------------------------------------===//
// Lazy sequence operations
//===----------------------------------------------------------------------===//

fn native_map(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [f, coll] => Ok(LazyShared::value(
            Box::new(MapEngine {
                f: f.clone(),
                source: SeqCursor::new(span, coll)?,
                span: span.clone(),
            }),
            span.clone(),
        )),
        _ => Err(arity_err(span, "map", args.len())),
    }
}

fn native_filter(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [f, coll] => Ok(LazyShared::value(
            Box::new(FilterEngine {
                f: f.clone(),
                source: SeqCursor::new(span, coll)?,
                span: span.clone(),
            }),
            span.clone(),
        )),
        _ => Err(arity_err(span, "filter", args.len())),
    }
}

fn native_mapcat(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [f, coll] => Ok(LazyShared::value(
            Box::new(MapcatEngine {
                f: f.clone(),
                source: SeqCursor::new(span, coll)?,
                pending: None,
                span: span.clone(),
            }),
            span.clone(),
        )),
        _ => Err(arity_err(span, "mapcat", args.len())),
    }
}

fn native_concat(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let sources = args
        .iter()
        .map(|coll| SeqCursor::new(span, coll))
        .collect::<Result<VecDeque<_>, _>>()?;
    Ok(LazyShared::value(
        Box::new(ConcatEngine { sources, span: span.clone() }),
        span.clone(),
    ))
}

fn native_range(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let engine = match args {
        [] => RangeEngine { next: 0, end: None, step: 1 },
        [Value::Int { value: end, .. }] => {
            RangeEngine { next: 0, end: Some(*end), step: 1 }
        }
        [Value::Int { value: start, .. }, Value::Int { value: end, .. }] => {
            RangeEngine { next: *start, end: Some(*end), step: 1 }
        }
        [Value::Int { value: start, .. }, Value::Int { value: end, .. }, Value::Int { value: step, .. }] => {
            RangeEngine { next: *start, end: Some(*end), step: *step }
        }
        _ => return Err(type_err(span, "range requires integer arguments")),
    };
    Ok(LazyShared::value(Box::new(engine), span.clone()))
}

fn native_take(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Int { value: n, .. }, coll] => Ok(LazyShared::value(
            Box::new(TakeEngine {
                remaining: (*n).max(0) as usize,
                source: SeqCursor::new(span, coll)?,
                span: span.clone(),
            }),
            span.clone(),
        )),
        _ => Err(type_err(span, "take requires an integer and a collection")),
    }
}

fn native_reduce(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let (f, init, coll) = match args {
        [f, coll] => (f, None, coll),
        [f, init, coll] => (f, Some(init.clone()), coll),
        _ => return Err(arity_err(span, "reduce", args.len())),
    };
    let mut cursor = SeqCursor::new(span, coll)?;
    let mut acc = match init {
        Some(init) => init,
        None => match cursor.next(ctx, span)? {
            Some(first) => first,
            None => return eval::call_value(ctx, span, f, &[]),
        },
    };
    while let Some(item) = cursor.next(ctx, span)? {
        acc = eval::call_value(ctx, span, f, &[acc, item])?;
    }
    Ok(acc)
}

fn native_apply(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [f, middle @ .., last] = args else {
        return Err(arity_err(span, "apply", args.len()));
    };
    let mut call_args: Vec<Value> = middle.to_vec();
    call_args.extend(realize(ctx, span, last)?);
    eval::call_value(ctx, span, f, &call_args)
}

//===----------------------------------------------------------------------===//
// Strings & printing
//===----------------------------------------------------------------------===//

fn native_str(_ctx: &Ctx, _span: &Span, args: &[Value]) -> eval::EvalResult {
    let mut out = String::new();
    for arg in args {
        if !arg.is_nil() {
            out.push_str(&arg.to_string());
        }
    }
    Ok(Value::string(out))
}

fn native_pr_str(_ctx: &Ctx, _span: &Span, args: &[Value]) -> eval::EvalResult {
    Ok(Value::string(args.iter().map(Value::pr_str).join(" ")))
}

fn native_print(_ctx: &Ctx, _span: &Span, args: &[Value]) -> eval::EvalResult {
    print!("{}", args.iter().map(Value::to_string).join(" "));
    Ok(Value::nil())
}

fn native_println(_ctx: &Ctx, _span: &Span, args: &[Value]) -> eval::EvalResult {
    println!("{}", args.iter().map(Value::to_string).join(" "));
    Ok(Value::nil())
}

//===----------------------------------------------------------------------===//
// Errors
//===----------------------------------------------------------------------===//

fn native_ex_info(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let (msg, data, cause) = match args {
        [msg, data] => (msg, data, None),
        [msg, data, cause] => (msg, data, Some(cause)),
        _ => return Err(arity_err(span, "ex-info", args.len())),
    };
    let Value::String { value: msg, .. } = msg else {
        return Err(type_err(span, "ex-info message must be a string"));
    };
    let Value::Map { value: data, .. } = data else {
        return Err(type_err(span, "ex-info data must be a map"));
    };
    let cause = match cause {
        Some(Value::Error { value, .. }) => Some(value.clone()),
        Some(other) => {
            return Err(type_err(
                span,
                format!("ex-info cause must be an error, got {}", other.kind_name()),
            ))
        }
        None => None,
    };
    Ok(Value::Error {
        span: span.clone(),
        value: Arc::new(HostError {
            class: host::EXCEPTION_INFO,
            message: Some(msg.clone()),
            data: data.clone(),
            cause,
        }),
    })
}

fn native_ex_message(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Error { value, .. }] => Ok(match &value.message {
            Some(msg) => Value::string(msg.clone()),
            None => Value::nil(),
        }),
        [_] => Ok(Value::nil()),
        _ => Err(arity_err(span, "ex-message", args.len())),
    }
}

fn native_ex_data(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Error { value, .. }] if value.class == host::EXCEPTION_INFO => {
            Ok(Value::map(value.data.clone()))
        }
        [_] => Ok(Value::nil()),
        _ => Err(arity_err(span, "ex-data", args.len())),
    }
}

//===----------------------------------------------------------------------===//
// Metadata & names
//===----------------------------------------------------------------------===//

fn native_meta(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Var { value, .. }] => Ok(match value.meta() {
            Some(meta) => Value::map((*meta).clone()),
            None => Value::nil(),
        }),
        [v] => Ok(match v.meta() {
            Some(meta) => Value::map((**meta).clone()),
            None => Value::nil(),
        }),
        _ => Err(arity_err(span, "meta", args.len())),
    }
}

fn native_with_meta(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v, Value::Map { value: meta, .. }] => {
            Ok(v.with_meta(Some(Arc::new(meta.clone()))))
        }
        [v, Value::Nil { .. }] => Ok(v.with_meta(None)),
        [_, other] => Err(type_err(
            span,
            format!("with-meta requires a map, got {}", other.kind_name()),
        )),
        _ => Err(arity_err(span, "with-meta", args.len())),
    }
}

fn native_alter_meta(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Var { value: var, .. }, Value::Map { value: meta, .. }] => {
            let update: Metadata = meta.clone();
            var.alter_meta(&update);
            Ok(match var.meta() {
                Some(meta) => Value::map((*meta).clone()),
                None => Value::nil(),
            })
        }
        _ => Err(type_err(span, "alter-meta! requires a var and a map")),
    }
}

fn native_name(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Keyword { name, .. }] => {
            Ok(Value::string(interner::kw_name(*name)))
        }
        [Value::Symbol { name, .. }] => {
            Ok(Value::string(interner::sym_name(*name)))
        }
        [Value::String { value, .. }] => Ok(Value::string(value.clone())),
        [other] => Err(type_err(
            span,
            format!("name not supported on {}", other.kind_name()),
        )),
        _ => Err(arity_err(span, "name", args.len())),
    }
}

fn native_namespace(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Keyword { ns, .. }] | [Value::Symbol { ns, .. }] => {
            Ok(match ns {
                Some(ns) => Value::string(interner::ns_name(*ns)),
                None => Value::nil(),
            })
        }
        [other] => Err(type_err(
            span,
            format!("namespace not supported on {}", other.kind_name()),
        )),
        _ => Err(arity_err(span, "namespace", args.len())),
    }
}

fn native_keyword(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::String { value, .. }] => {
            Ok(Value::keyword(None, interner::intern_kw(value)))
        }
        [Value::Keyword { .. }] => Ok(args[0].clone()),
        [Value::String { value: ns, .. }, Value::String { value: name, .. }] => {
            Ok(Value::keyword(
                Some(interner::intern_ns(ns)),
                interner::intern_kw(name),
            ))
        }
        _ => Err(type_err(span, "keyword requires string arguments")),
    }
}

fn native_symbol(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::String { value, .. }] => {
            Ok(Value::symbol(None, interner::intern_sym(value)))
        }
        [Value::Symbol { .. }] => Ok(args[0].clone()),
        [Value::String { value: ns, .. }, Value::String { value: name, .. }] => {
            Ok(Value::symbol(
                Some(interner::intern_ns(ns)),
                interner::intern_sym(name),
            ))
        }
        _ => Err(type_err(span, "symbol requires string arguments")),
    }
}

fn native_deref(ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Var { value: var, .. }] => var.deref().ok_or_else(|| {
            SpannedError::new(
                Error::Resolution(format!(
                    "Var {}/{} is unbound",
                    interner::ns_name(var.ns),
                    interner::sym_name(var.sym)
                )),
                span.clone(),
            )
        }),
        [v @ Value::Lazy { .. }] => {
            let items = realize(ctx, span, v)?;
            Ok(Value::List {
                span: span.clone(),
                value: Arc::new(items.into_iter().collect::<List<Value>>()),
                meta: None,
            })
        }
        [v] => Ok(v.clone()),
        _ => Err(arity_err(span, "deref", args.len())),
    }
}

fn native_instance_p(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [Value::Class { value: class, .. }, v] => {
            Ok(Value::bool(host::is_instance(host::class_of(v), *class)))
        }
        _ => Err(type_err(span, "instance? requires a class and a value")),
    }
}

fn native_class(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    match args {
        [v] => Ok(Value::Class { span: span.clone(), value: host::class_of(v) }),
        _ => Err(arity_err(span, "class", args.len())),
    }
}

//===----------------------------------------------------------------------===//
// Native macros
//===----------------------------------------------------------------------===//

fn make_list(span: &Span, items: Vec<Value>) -> Value {
    Value::List {
        span: span.clone(),
        value: Arc::new(items.into_iter().collect::<List<Value>>()),
        meta: None,
    }
}

fn macro_sym(span: &Span, name: &str) -> Value {
    Value::Symbol {
        span: span.clone(),
        ns: None,
        name: interner::intern_sym(name),
        meta: None,
    }
}

/// `(defn name doc? [params] body...)` expands to
/// `(def name doc? (fn name [params] body...))`.
fn macro_defn(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    // args: form, caller bindings, then the macro arguments
    let [_form, _bindings, name, rest @ ..] = args else {
        return Err(type_err(span, "defn requires a name"));
    };
    if !matches!(name, Value::Symbol { .. }) {
        return Err(type_err(span, "defn name must be a symbol"));
    }
    let (doc, fn_tail) = match rest {
        [doc @ Value::String { .. }, tail @ ..] => (Some(doc.clone()), tail),
        tail => (None, tail),
    };
    if fn_tail.is_empty() {
        return Err(type_err(span, "defn requires a parameter vector"));
    }

    let mut fn_items = vec![macro_sym(span, "fn"), name.clone()];
    fn_items.extend(fn_tail.iter().cloned());
    let fn_form = make_list(span, fn_items);

    let mut def_items = vec![macro_sym(span, "def"), name.clone()];
    if let Some(doc) = doc {
        def_items.push(doc);
    }
    def_items.push(fn_form);
    Ok(make_list(span, def_items))
}

/// `(when test body...)` expands to `(if test (do body...) nil)`.
fn macro_when(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [_form, _bindings, test, body @ ..] = args else {
        return Err(type_err(span, "when requires a test"));
    };
    let mut do_items = vec![macro_sym(span, "do")];
    do_items.extend(body.iter().cloned());
    Ok(make_list(
        span,
        vec![
            macro_sym(span, "if"),
            test.clone(),
            make_list(span, do_items),
            Value::nil(),
        ],
    ))
}

/// `(when-not test body...)` expands to `(if test nil (do body...))`.
fn macro_when_not(_ctx: &Ctx, span: &Span, args: &[Value]) -> eval::EvalResult {
    let [_form, _bindings, test, body @ ..] = args else {
        return Err(type_err(span, "when-not requires a test"));
    };
    let mut do_items = vec![macro_sym(span, "do")];
    do_items.extend(body.iter().cloned());
    Ok(make_list(
        span,
        vec![
            macro_sym(span, "if"),
            test.clone(),
            Value::nil(),
            make_list(span, do_items),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::CtxOpts;
    use std::sync::RwLock;

    fn test_ctx() -> Ctx {
        let mut env = GlobalEnv::new();
        install_core(&mut env);
        Ctx::new(Arc::new(RwLock::new(env)), Arc::new(CtxOpts::default()))
    }

    #[test]
    fn arithmetic_contagion() {
        let ctx = test_ctx();
        let span = synthetic_span();
        assert_eq!(
            native_add(&ctx, &span, &[Value::int(1), Value::int(2)]).unwrap(),
            Value::int(3)
        );
        assert_eq!(
            native_add(&ctx, &span, &[Value::int(1), Value::float(0.5)]).unwrap(),
            Value::float(1.5)
        );
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let ctx = test_ctx();
        let span = synthetic_span();
        let err =
            native_div(&ctx, &span, &[Value::int(1), Value::int(0)]).unwrap_err();
        match err.error {
            Error::Thrown(e) => assert_eq!(e.class, host::ARITHMETIC_EXCEPTION),
            other => panic!("expected thrown error, got {:?}", other),
        }
    }

    #[test]
    fn ex_info_round_trip() {
        let ctx = test_ctx();
        let span = synthetic_span();
        let err = native_ex_info(
            &ctx,
            &span,
            &[Value::string("boom"), Value::map(Map::new())],
        )
        .unwrap();
        assert_eq!(
            native_ex_message(&ctx, &span, &[err.clone()]).unwrap(),
            Value::string("boom")
        );
        assert_eq!(
            native_ex_data(&ctx, &span, &[err]).unwrap(),
            Value::map(Map::new())
        );
    }

    #[test]
    fn str_skips_nil() {
        let ctx = test_ctx();
        let span = synthetic_span();
        let out = native_str(
            &ctx,
            &span,
            &[Value::string("a"), Value::nil(), Value::int(1)],
        )
        .unwrap();
        assert_eq!(out, Value::string("a1"));
    }
}
