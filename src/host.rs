//! Host interop gateway.
//!
//! The "host platform" is an in-crate class registry: a fixed table of
//! classes with single-parent subclassing, static fields, static methods,
//! instance methods and constructors. Dispatch is only ever reached from
//! tagged AST paths, and method/constructor dispatch is gated by the
//! context's class allow-list.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::collections::Map;
use crate::env::Ctx;
use crate::error::{Error, SpannedError};
use crate::interner;
use crate::reader::Span;
use crate::value::Value;

//===----------------------------------------------------------------------===//
// Classes
//===----------------------------------------------------------------------===//

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(u8);

struct ClassDef {
    name: &'static str,
    parent: Option<ClassId>,
}

pub const OBJECT: ClassId = ClassId(0);
pub const EXCEPTION: ClassId = ClassId(1);
pub const EXCEPTION_INFO: ClassId = ClassId(2);
pub const ARITHMETIC_EXCEPTION: ClassId = ClassId(3);
pub const STRING: ClassId = ClassId(4);
pub const LONG: ClassId = ClassId(5);
pub const DOUBLE: ClassId = ClassId(6);
pub const BOOLEAN: ClassId = ClassId(7);
pub const CHARACTER: ClassId = ClassId(8);
pub const KEYWORD: ClassId = ClassId(9);
pub const SYMBOL: ClassId = ClassId(10);
pub const MATH: ClassId = ClassId(11);

static CLASSES: &[ClassDef] = &[
    ClassDef { name: "Object", parent: None },
    ClassDef { name: "Exception", parent: Some(OBJECT) },
    ClassDef { name: "ExceptionInfo", parent: Some(EXCEPTION) },
    ClassDef { name: "ArithmeticException", parent: Some(EXCEPTION) },
    ClassDef { name: "String", parent: Some(OBJECT) },
    ClassDef { name: "Long", parent: Some(OBJECT) },
    ClassDef { name: "Double", parent: Some(OBJECT) },
    ClassDef { name: "Boolean", parent: Some(OBJECT) },
    ClassDef { name: "Character", parent: Some(OBJECT) },
    ClassDef { name: "Keyword", parent: Some(OBJECT) },
    ClassDef { name: "Symbol", parent: Some(OBJECT) },
    ClassDef { name: "Math", parent: Some(OBJECT) },
];

impl ClassId {
    pub fn name(self) -> &'static str {
        CLASSES[self.0 as usize].name
    }

    pub fn parent(self) -> Option<ClassId> {
        CLASSES[self.0 as usize].parent
    }
}

pub fn find_class(name: &str) -> Option<ClassId> {
    CLASSES
        .iter()
        .position(|c| c.name == name)
        .map(|i| ClassId(i as u8))
}

/// Is `class` the same as or a subclass of `ancestor`?
pub fn is_instance(class: ClassId, ancestor: ClassId) -> bool {
    let mut cur = Some(class);
    while let Some(c) = cur {
        if c == ancestor {
            return true;
        }
        cur = c.parent();
    }
    false
}

/// The runtime class of a value, for policy checks and `catch` matching.
pub fn class_of(value: &Value) -> ClassId {
    match value {
        Value::String { .. } => STRING,
        Value::Int { .. } => LONG,
        Value::Float { .. } => DOUBLE,
        Value::Bool { .. } => BOOLEAN,
        Value::Char { .. } => CHARACTER,
        Value::Keyword { .. } => KEYWORD,
        Value::Symbol { .. } => SYMBOL,
        Value::Error { value, .. } => value.class,
        _ => OBJECT,
    }
}

//===----------------------------------------------------------------------===//
// Host errors
//===----------------------------------------------------------------------===//

/// The host's throwable: a class, an optional message, attached data (for
/// `ex-info`) and an optional cause.
#[derive(Debug)]
pub struct HostError {
    pub class: ClassId,
    pub message: Option<Arc<str>>,
    pub data: Map<Value, Value>,
    pub cause: Option<Arc<HostError>>,
}

impl HostError {
    pub fn new(class: ClassId, message: impl Into<Arc<str>>) -> Self {
        Self {
            class,
            message: Some(message.into()),
            data: Map::new(),
            cause: None,
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.class.name(), msg),
            None => write!(f, "{}", self.class.name()),
        }
    }
}

//===----------------------------------------------------------------------===//
// Allow-list policy
//===----------------------------------------------------------------------===//

/// The per-context allow-list for host classes: either everything, or an
/// explicit set of class entries.
#[derive(Debug, Clone, Default)]
pub struct ClassAllowList {
    allow_all: bool,
    entries: FxHashSet<ClassId>,
}

impl ClassAllowList {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self { allow_all: true, entries: FxHashSet::default() }
    }

    pub fn allow(&mut self, class: ClassId) {
        self.entries.insert(class);
    }

    pub fn permits(&self, class: ClassId) -> bool {
        self.allow_all || self.entries.contains(&class)
    }
}

fn check_method(
    ctx: &Ctx,
    span: &Span,
    class: ClassId,
    method: &str,
) -> Result<(), SpannedError> {
    if ctx.opts.classes.permits(class) {
        Ok(())
    } else {
        Err(SpannedError::new(
            Error::NotAllowed(format!(
                "Method {} on {} not allowed!",
                method,
                class.name()
            )),
            span.clone(),
        ))
    }
}

/// The class used for the instance-method policy check, in priority order:
/// the `:tag` resolved at analysis, the user-supplied classifier, then the
/// runtime class of the target.
pub fn policy_class(ctx: &Ctx, target: &Value, tag: Option<ClassId>) -> ClassId {
    if let Some(tag) = tag {
        return tag;
    }
    if let Some(classify) = &ctx.opts.public_class {
        if let Some(class) = classify(target) {
            return class;
        }
    }
    class_of(target)
}

//===----------------------------------------------------------------------===//
// Dispatch
//===----------------------------------------------------------------------===//

fn unknown_member(span: &Span, class: ClassId, member: &str) -> SpannedError {
    SpannedError::new(
        Error::Resolution(format!(
            "No matching member {} on {}",
            member,
            class.name()
        )),
        span.clone(),
    )
}

fn type_err(span: &Span, msg: impl Into<String>) -> SpannedError {
    SpannedError::new(Error::Type(msg.into()), span.clone())
}

fn as_str<'a>(span: &Span, v: &'a Value) -> Result<&'a str, SpannedError> {
    match v {
        Value::String { value, .. } => Ok(value),
        other => Err(type_err(span, format!("Expected string, got {}", other.kind_name()))),
    }
}

fn as_int(span: &Span, v: &Value) -> Result<i64, SpannedError> {
    match v {
        Value::Int { value, .. } => Ok(*value),
        other => Err(type_err(span, format!("Expected integer, got {}", other.kind_name()))),
    }
}

fn as_num(span: &Span, v: &Value) -> Result<f64, SpannedError> {
    match v {
        Value::Int { value, .. } => Ok(*value as f64),
        Value::Float { value, .. } => Ok(*value),
        other => Err(type_err(span, format!("Expected number, got {}", other.kind_name()))),
    }
}

fn arity_err(span: &Span, what: &str) -> SpannedError {
    SpannedError::new(
        Error::Arity(format!("Wrong number of arguments to {}", what)),
        span.clone(),
    )
}

/// Static field read. No side effects, so `dry-run` does not suppress it,
/// but the class must still be allowed.
pub fn static_field(
    ctx: &Ctx,
    span: &Span,
    class: ClassId,
    field: &str,
) -> Result<Value, SpannedError> {
    check_method(ctx, span, class, field)?;
    let value = match (class, field) {
        (LONG, "MAX_VALUE") => Value::int(i64::MAX),
        (LONG, "MIN_VALUE") => Value::int(i64::MIN),
        (MATH, "PI") => Value::float(std::f64::consts::PI),
        (MATH, "E") => Value::float(std::f64::consts::E),
        _ => return Err(unknown_member(span, class, field)),
    };
    Ok(value)
}

/// Does the class expose this name as a static field?
pub fn has_static_field(class: ClassId, field: &str) -> bool {
    matches!(
        (class, field),
        (LONG, "MAX_VALUE") | (LONG, "MIN_VALUE") | (MATH, "PI") | (MATH, "E")
    )
}

/// Static method call, suppressed under `dry-run`.
pub fn call_static(
    ctx: &Ctx,
    span: &Span,
    class: ClassId,
    method: &str,
    args: &[Value],
) -> Result<Value, SpannedError> {
    check_method(ctx, span, class, method)?;
    if ctx.opts.dry_run {
        return Ok(Value::nil());
    }
    match (class, method) {
        (MATH, "abs") => match args {
            [Value::Int { value, .. }] => Ok(Value::int(value.wrapping_abs())),
            [v] => Ok(Value::float(as_num(span, v)?.abs())),
            _ => Err(arity_err(span, "Math/abs")),
        },
        (MATH, "floor") => match args {
            [v] => Ok(Value::float(as_num(span, v)?.floor())),
            _ => Err(arity_err(span, "Math/floor")),
        },
        (MATH, "ceil") => match args {
            [v] => Ok(Value::float(as_num(span, v)?.ceil())),
            _ => Err(arity_err(span, "Math/ceil")),
        },
        (MATH, "sqrt") => match args {
            [v] => Ok(Value::float(as_num(span, v)?.sqrt())),
            _ => Err(arity_err(span, "Math/sqrt")),
        },
        (MATH, "pow") => match args {
            [a, b] => Ok(Value::float(as_num(span, a)?.powf(as_num(span, b)?))),
            _ => Err(arity_err(span, "Math/pow")),
        },
        (MATH, "max") => match args {
            [a, b] => Ok(Value::float(as_num(span, a)?.max(as_num(span, b)?))),
            _ => Err(arity_err(span, "Math/max")),
        },
        (MATH, "min") => match args {
            [a, b] => Ok(Value::float(as_num(span, a)?.min(as_num(span, b)?))),
            _ => Err(arity_err(span, "Math/min")),
        },
        (LONG, "parseLong") => match args {
            [v] => {
                let text = as_str(span, v)?;
                text.trim().parse::<i64>().map(Value::int).map_err(|_| {
                    SpannedError::new(
                        Error::Thrown(Arc::new(HostError::new(
                            EXCEPTION,
                            format!("For input string: \"{}\"", text),
                        ))),
                        span.clone(),
                    )
                })
            }
            _ => Err(arity_err(span, "Long/parseLong")),
        },
        (STRING, "valueOf") => match args {
            [v] => Ok(Value::string(v.to_string())),
            _ => Err(arity_err(span, "String/valueOf")),
        },
        _ => Err(unknown_member(span, class, method)),
    }
}

/// Instance method call, suppressed under `dry-run`. The policy check uses
/// `policy_class`; dispatch itself uses the runtime class.
pub fn call_instance(
    ctx: &Ctx,
    span: &Span,
    target: &Value,
    method: &str,
    args: &[Value],
    tag: Option<ClassId>,
) -> Result<Value, SpannedError> {
    let class = policy_class(ctx, target, tag);
    check_method(ctx, span, class, method)?;
    if ctx.opts.dry_run {
        return Ok(Value::nil());
    }
    match target {
        Value::String { value: s, .. } => string_method(span, s, method, args),
        Value::Int { value, .. } => match (method, args) {
            ("toString", []) => Ok(Value::string(value.to_string())),
            ("doubleValue", []) => Ok(Value::float(*value as f64)),
            ("intValue", []) => Ok(Value::int(*value)),
            _ => object_method(span, target, method, args),
        },
        Value::Float { value, .. } => match (method, args) {
            ("toString", []) => Ok(Value::string(value.to_string())),
            ("longValue", []) => Ok(Value::int(*value as i64)),
            _ => object_method(span, target, method, args),
        },
        Value::Keyword { ns, name, .. } => match (method, args) {
            ("getName", []) => Ok(Value::string(interner::kw_name(*name))),
            ("getNamespace", []) => Ok(match ns {
                Some(ns) => Value::string(interner::ns_name(*ns)),
                None => Value::nil(),
            }),
            _ => object_method(span, target, method, args),
        },
        Value::Symbol { ns, name, .. } => match (method, args) {
            ("getName", []) => Ok(Value::string(interner::sym_name(*name))),
            ("getNamespace", []) => Ok(match ns {
                Some(ns) => Value::string(interner::ns_name(*ns)),
                None => Value::nil(),
            }),
            _ => object_method(span, target, method, args),
        },
        Value::Error { value, .. } => match (method, args) {
            ("getMessage", []) => Ok(match &value.message {
                Some(msg) => Value::string(msg.clone()),
                None => Value::nil(),
            }),
            _ => object_method(span, target, method, args),
        },
        other => object_method(span, other, method, args),
    }
}

fn object_method(
    span: &Span,
    target: &Value,
    method: &str,
    args: &[Value],
) -> Result<Value, SpannedError> {
    match (method, args) {
        ("toString", []) => Ok(Value::string(target.to_string())),
        _ => Err(unknown_member(span, class_of(target), method)),
    }
}

fn string_method(
    span: &Span,
    s: &str,
    method: &str,
    args: &[Value],
) -> Result<Value, SpannedError> {
    match (method, args) {
        ("length", []) => Ok(Value::int(s.chars().count() as i64)),
        ("isEmpty", []) => Ok(Value::bool(s.is_empty())),
        ("toUpperCase", []) => Ok(Value::string(s.to_uppercase())),
        ("toLowerCase", []) => Ok(Value::string(s.to_lowercase())),
        ("trim", []) => Ok(Value::string(s.trim())),
        ("toString", []) => Ok(Value::string(s)),
        ("contains", [v]) => Ok(Value::bool(s.contains(as_str(span, v)?))),
        ("startsWith", [v]) => Ok(Value::bool(s.starts_with(as_str(span, v)?))),
        ("endsWith", [v]) => Ok(Value::bool(s.ends_with(as_str(span, v)?))),
        ("concat", [v]) => Ok(Value::string(format!("{}{}", s, as_str(span, v)?))),
        ("indexOf", [v]) => {
            let needle = as_str(span, v)?;
            Ok(Value::int(
                s.find(needle).map(|i| i as i64).unwrap_or(-1),
            ))
        }
        ("charAt", [v]) => {
            let idx = as_int(span, v)?;
            s.chars()
                .nth(idx.max(0) as usize)
                .map(|c| Value::Char { span: span.clone(), value: c })
                .ok_or_else(|| {
                    SpannedError::new(
                        Error::Thrown(Arc::new(HostError::new(
                            EXCEPTION,
                            format!("String index out of range: {}", idx),
                        ))),
                        span.clone(),
                    )
                })
        }
        ("substring", [b]) => {
            let begin = as_int(span, b)?.max(0) as usize;
            Ok(Value::string(
                s.chars().skip(begin).collect::<String>(),
            ))
        }
        ("substring", [b, e]) => {
            let begin = as_int(span, b)?.max(0) as usize;
            let end = as_int(span, e)?.max(0) as usize;
            Ok(Value::string(
                s.chars()
                    .skip(begin)
                    .take(end.saturating_sub(begin))
                    .collect::<String>(),
            ))
        }
        ("replace", [a, b]) => Ok(Value::string(
            s.replace(as_str(span, a)?, as_str(span, b)?),
        )),
        _ => Err(unknown_member(span, STRING, method)),
    }
}

/// Constructor call, suppressed under `dry-run`.
pub fn construct(
    ctx: &Ctx,
    span: &Span,
    class: ClassId,
    args: &[Value],
) -> Result<Value, SpannedError> {
    check_method(ctx, span, class, "new")?;
    if ctx.opts.dry_run {
        return Ok(Value::nil());
    }
    match class {
        STRING => match args {
            [] => Ok(Value::string("")),
            [v] => Ok(Value::string(as_str(span, v)?)),
            _ => Err(arity_err(span, "String constructor")),
        },
        EXCEPTION | ARITHMETIC_EXCEPTION => match args {
            [] => Ok(Value::Error {
                span: span.clone(),
                value: Arc::new(HostError {
                    class,
                    message: None,
                    data: Map::new(),
                    cause: None,
                }),
            }),
            [v] => Ok(Value::Error {
                span: span.clone(),
                value: Arc::new(HostError::new(class, as_str(span, v)?)),
            }),
            _ => Err(arity_err(span, "Exception constructor")),
        },
        _ => Err(SpannedError::new(
            Error::Resolution(format!("No constructor for {}", class.name())),
            span.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclassing_is_transitive() {
        assert!(is_instance(EXCEPTION_INFO, EXCEPTION));
        assert!(is_instance(EXCEPTION_INFO, OBJECT));
        assert!(!is_instance(EXCEPTION, EXCEPTION_INFO));
        assert!(is_instance(STRING, STRING));
    }

    #[test]
    fn find_class_by_name() {
        assert_eq!(find_class("String"), Some(STRING));
        assert_eq!(find_class("ExceptionInfo"), Some(EXCEPTION_INFO));
        assert_eq!(find_class("Nope"), None);
    }

    #[test]
    fn allow_list_permits() {
        let mut list = ClassAllowList::none();
        assert!(!list.permits(STRING));
        list.allow(STRING);
        assert!(list.permits(STRING));
        assert!(!list.permits(LONG));
        assert!(ClassAllowList::all().permits(LONG));
    }

    #[test]
    fn runtime_class_of_values() {
        assert_eq!(class_of(&Value::string("x")), STRING);
        assert_eq!(class_of(&Value::int(1)), LONG);
        assert_eq!(class_of(&Value::nil()), OBJECT);
    }
}
