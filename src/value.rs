//! The runtime value model.
//!
//! Every variant carries the byte span of the form it was read from, so
//! diagnostics can point back into the source. Spans and metadata are never
//! part of equality or ordering: `(with-meta [1] {:a 1})` equals `[1]`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::analyzer::Expr;
use crate::collections::{List, Map, Set, Vector};
use crate::core::Var;
use crate::env::Ctx;
use crate::error::SpannedError;
use crate::host::{ClassId, HostError};
use crate::interner::{self, KeywId, NsId, SymId};
use crate::lazy::LazyShared;
use crate::reader::{synthetic_span, Span};

/// Metadata maps are ordinary value maps, typically keyword-keyed.
pub type Metadata = Map<Value, Value>;

/// A lexical frame: symbol to value.
pub type Bindings = im::HashMap<SymId, Value>;

/// Calling convention for native functions. Every native receives the
/// evaluation context, the span of the call site, and the evaluated
/// arguments.
pub type NativeImpl = fn(&Ctx, &Span, &[Value]) -> Result<Value, SpannedError>;

/// One `fn` arity: fixed parameters, an optional variadic rest parameter,
/// and the analyzed body.
#[derive(Debug)]
pub struct FnArity {
    pub params: Vec<SymId>,
    pub rest: Option<SymId>,
    pub body: Arc<[Expr]>,
}

/// The analyzed shape of a `fn` form, shared by every closure constructed
/// from it.
#[derive(Debug)]
pub struct FnDef {
    pub name: Option<SymId>,
    pub arities: Vec<FnArity>,
    pub variadic: Option<FnArity>,
}

impl FnDef {
    /// Selects the arity matching `argc`: an exact fixed arity first, then
    /// the variadic one if it can absorb the surplus.
    pub fn select_arity(&self, argc: usize) -> Option<&FnArity> {
        self.arities
            .iter()
            .find(|a| a.params.len() == argc)
            .or_else(|| {
                self.variadic.as_ref().filter(|a| argc >= a.params.len())
            })
    }
}

/// A user-defined function: its analyzed definition plus the lexical frame
/// captured at construction.
#[derive(Debug)]
pub struct Closure {
    pub def: Arc<FnDef>,
    pub captured: Bindings,
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil { span: Span },
    Bool { span: Span, value: bool },
    Int { span: Span, value: i64 },
    Float { span: Span, value: f64 },
    Char { span: Span, value: char },
    String { span: Span, value: Arc<str> },
    Symbol { span: Span, ns: Option<NsId>, name: SymId, meta: Option<Arc<Metadata>> },
    Keyword { span: Span, ns: Option<NsId>, name: KeywId },
    List { span: Span, value: Arc<List<Value>>, meta: Option<Arc<Metadata>> },
    Vector { span: Span, value: Vector<Value>, meta: Option<Arc<Metadata>> },
    Set { span: Span, value: Set<Value>, meta: Option<Arc<Metadata>> },
    Map { span: Span, value: Map<Value, Value>, meta: Option<Arc<Metadata>> },
    /// A lazy sequence: a shared memoizing producer plus the offset of this
    /// handle into it, so `rest` shares the realized prefix.
    Lazy { span: Span, seq: Arc<LazyShared>, offset: usize },
    Fn { span: Span, value: Arc<Closure>, meta: Option<Arc<Metadata>> },
    Native { span: Span, name: SymId, f: NativeImpl },
    Var { span: Span, value: Arc<Var> },
    /// A host class handle, produced by resolving a class-named symbol.
    Class { span: Span, value: ClassId },
    /// A host-error-compatible value: what `throw` raises and `catch` binds.
    Error { span: Span, value: Arc<HostError> },
    /// Internal trampoline marker carrying re-entry arguments.
    Recur { span: Span, args: Arc<Vec<Value>> },
}

impl Value {
    pub fn nil() -> Self {
        Value::Nil { span: synthetic_span() }
    }

    pub fn bool(value: bool) -> Self {
        Value::Bool { span: synthetic_span(), value }
    }

    pub fn int(value: i64) -> Self {
        Value::Int { span: synthetic_span(), value }
    }

    pub fn float(value: f64) -> Self {
        Value::Float { span: synthetic_span(), value }
    }

    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Value::String { span: synthetic_span(), value: value.into() }
    }

    pub fn symbol(ns: Option<NsId>, name: SymId) -> Self {
        Value::Symbol { span: synthetic_span(), ns, name, meta: None }
    }

    pub fn keyword(ns: Option<NsId>, name: KeywId) -> Self {
        Value::Keyword { span: synthetic_span(), ns, name }
    }

    pub fn list(value: List<Value>) -> Self {
        Value::List { span: synthetic_span(), value: Arc::new(value), meta: None }
    }

    pub fn vector(value: Vector<Value>) -> Self {
        Value::Vector { span: synthetic_span(), value, meta: None }
    }

    pub fn map(value: Map<Value, Value>) -> Self {
        Value::Map { span: synthetic_span(), value, meta: None }
    }

    pub fn var(value: Arc<Var>) -> Self {
        Value::Var { span: synthetic_span(), value }
    }

    pub fn span(&self) -> Span {
        match self {
            Value::Nil { span }
            | Value::Bool { span, .. }
            | Value::Int { span, .. }
            | Value::Float { span, .. }
            | Value::Char { span, .. }
            | Value::String { span, .. }
            | Value::Symbol { span, .. }
            | Value::Keyword { span, .. }
            | Value::List { span, .. }
            | Value::Vector { span, .. }
            | Value::Set { span, .. }
            | Value::Map { span, .. }
            | Value::Lazy { span, .. }
            | Value::Fn { span, .. }
            | Value::Native { span, .. }
            | Value::Var { span, .. }
            | Value::Class { span, .. }
            | Value::Error { span, .. }
            | Value::Recur { span, .. } => span.clone(),
        }
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(
            self,
            Value::Nil { .. } | Value::Bool { value: false, .. }
        )
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil { .. })
    }

    /// A short name for the value's kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Nil { .. } => "nil",
            Value::Bool { .. } => "boolean",
            Value::Int { .. } => "integer",
            Value::Float { .. } => "float",
            Value::Char { .. } => "character",
            Value::String { .. } => "string",
            Value::Symbol { .. } => "symbol",
            Value::Keyword { .. } => "keyword",
            Value::List { .. } => "list",
            Value::Vector { .. } => "vector",
            Value::Set { .. } => "set",
            Value::Map { .. } => "map",
            Value::Lazy { .. } => "lazy-seq",
            Value::Fn { .. } => "function",
            Value::Native { .. } => "function",
            Value::Var { .. } => "var",
            Value::Class { .. } => "class",
            Value::Error { .. } => "error",
            Value::Recur { .. } => "recur",
        }
    }

    pub fn meta(&self) -> Option<&Arc<Metadata>> {
        match self {
            Value::Symbol { meta, .. }
            | Value::List { meta, .. }
            | Value::Vector { meta, .. }
            | Value::Set { meta, .. }
            | Value::Map { meta, .. }
            | Value::Fn { meta, .. } => meta.as_ref(),
            _ => None,
        }
    }

    /// Returns the value with the given metadata attached, unchanged when
    /// the kind does not support metadata.
    pub fn with_meta(&self, new_meta: Option<Arc<Metadata>>) -> Value {
        let mut out = self.clone();
        match &mut out {
            Value::Symbol { meta, .. }
            | Value::List { meta, .. }
            | Value::Vector { meta, .. }
            | Value::Set { meta, .. }
            | Value::Map { meta, .. }
            | Value::Fn { meta, .. } => *meta = new_meta,
            _ => {}
        }
        out
    }

    pub fn with_span(&self, span: Span) -> Value {
        let mut out = self.clone();
        out.set_span(span);
        out
    }

    fn set_span(&mut self, new: Span) {
        match self {
            Value::Nil { span }
            | Value::Bool { span, .. }
            | Value::Int { span, .. }
            | Value::Float { span, .. }
            | Value::Char { span, .. }
            | Value::String { span, .. }
            | Value::Symbol { span, .. }
            | Value::Keyword { span, .. }
            | Value::List { span, .. }
            | Value::Vector { span, .. }
            | Value::Set { span, .. }
            | Value::Map { span, .. }
            | Value::Lazy { span, .. }
            | Value::Fn { span, .. }
            | Value::Native { span, .. }
            | Value::Var { span, .. }
            | Value::Class { span, .. }
            | Value::Error { span, .. }
            | Value::Recur { span, .. } => *span = new,
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Nil { .. } => 0,
            Value::Bool { .. } => 1,
            Value::Int { .. } => 2,
            Value::Float { .. } => 3,
            Value::Char { .. } => 4,
            Value::String { .. } => 5,
            Value::Symbol { .. } => 6,
            Value::Keyword { .. } => 7,
            Value::List { .. } => 8,
            Value::Vector { .. } => 9,
            Value::Set { .. } => 10,
            Value::Map { .. } => 11,
            Value::Lazy { .. } => 12,
            Value::Fn { .. } => 13,
            Value::Native { .. } => 14,
            Value::Var { .. } => 15,
            Value::Class { .. } => 16,
            Value::Error { .. } => 17,
            Value::Recur { .. } => 18,
        }
    }

    /// Renders the value the way the printer does, quoting strings and
    /// characters. `Display` renders strings raw.
    pub fn pr_str(&self) -> String {
        match self {
            Value::String { value, .. } => format!("{:?}", value.as_ref()),
            Value::Char { value, .. } => format!("\\{}", value),
            Value::List { value, .. } => {
                pr_seq(value.iter(), "(", ")", Value::pr_str)
            }
            Value::Vector { value, .. } => {
                pr_seq(value.iter(), "[", "]", Value::pr_str)
            }
            Value::Set { value, .. } => {
                pr_seq(value.iter(), "#{", "}", Value::pr_str)
            }
            Value::Map { value, .. } => {
                let pairs: Vec<String> = value
                    .iter()
                    .map(|(k, v)| format!("{} {}", k.pr_str(), v.pr_str()))
                    .collect();
                format!("{{{}}}", pairs.join(", "))
            }
            other => other.to_string(),
        }
    }
}

fn pr_seq<'a, I>(seq: I, start: &str, end: &str, f: fn(&Value) -> String) -> String
where
    I: Iterator<Item = &'a Value>,
{
    let strs: Vec<String> = seq.map(f).collect();
    format!("{}{}{}", start, strs.join(" "), end)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil { .. }, Value::Nil { .. }) => true,
            (Value::Bool { value: a, .. }, Value::Bool { value: b, .. }) => a == b,
            (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => a == b,
            (Value::Float { value: a, .. }, Value::Float { value: b, .. }) => {
                if a.is_nan() && b.is_nan() {
                    true
                } else {
                    a == b
                }
            }
            (Value::Char { value: a, .. }, Value::Char { value: b, .. }) => a == b,
            (Value::String { value: a, .. }, Value::String { value: b, .. }) => {
                a == b
            }
            (
                Value::Symbol { ns: na, name: a, .. },
                Value::Symbol { ns: nb, name: b, .. },
            ) => na == nb && a == b,
            (
                Value::Keyword { ns: na, name: a, .. },
                Value::Keyword { ns: nb, name: b, .. },
            ) => na == nb && a == b,
            (Value::List { value: a, .. }, Value::List { value: b, .. }) => a == b,
            (Value::Vector { value: a, .. }, Value::Vector { value: b, .. }) => {
                a == b
            }
            (Value::Set { value: a, .. }, Value::Set { value: b, .. }) => a == b,
            (Value::Map { value: a, .. }, Value::Map { value: b, .. }) => a == b,
            (
                Value::Lazy { seq: a, offset: oa, .. },
                Value::Lazy { seq: b, offset: ob, .. },
            ) => Arc::ptr_eq(a, b) && oa == ob,
            (Value::Fn { value: a, .. }, Value::Fn { value: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            (
                Value::Native { name: a, f: fa, .. },
                Value::Native { name: b, f: fb, .. },
            ) => a == b && fa == fb,
            (Value::Var { value: a, .. }, Value::Var { value: b, .. }) => {
                a.id == b.id
            }
            (Value::Class { value: a, .. }, Value::Class { value: b, .. }) => {
                a == b
            }
            (Value::Error { value: a, .. }, Value::Error { value: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool { value: a, .. }, Value::Bool { value: b, .. }) => {
                a.cmp(b)
            }
            (Value::Int { value: a, .. }, Value::Int { value: b, .. }) => a.cmp(b),
            (Value::Float { value: a, .. }, Value::Float { value: b, .. }) => {
                // NaN sorts below every other float
                if a.is_nan() && b.is_nan() {
                    Ordering::Equal
                } else if a.is_nan() {
                    Ordering::Less
                } else if b.is_nan() {
                    Ordering::Greater
                } else {
                    a.partial_cmp(b).unwrap_or(Ordering::Equal)
                }
            }
            (Value::Char { value: a, .. }, Value::Char { value: b, .. }) => {
                a.cmp(b)
            }
            (Value::String { value: a, .. }, Value::String { value: b, .. }) => {
                a.cmp(b)
            }
            (
                Value::Symbol { ns: na, name: a, .. },
                Value::Symbol { ns: nb, name: b, .. },
            ) => na.cmp(nb).then(a.cmp(b)),
            (
                Value::Keyword { ns: na, name: a, .. },
                Value::Keyword { ns: nb, name: b, .. },
            ) => na.cmp(nb).then(a.cmp(b)),
            (Value::List { value: a, .. }, Value::List { value: b, .. }) => {
                a.cmp(b)
            }
            (Value::Vector { value: a, .. }, Value::Vector { value: b, .. }) => {
                a.cmp(b)
            }
            (Value::Set { value: a, .. }, Value::Set { value: b, .. }) => a.cmp(b),
            (Value::Map { value: a, .. }, Value::Map { value: b, .. }) => a.cmp(b),
            (
                Value::Lazy { seq: a, offset: oa, .. },
                Value::Lazy { seq: b, offset: ob, .. },
            ) => (Arc::as_ptr(a) as usize, oa).cmp(&(Arc::as_ptr(b) as usize, ob)),
            (Value::Fn { value: a, .. }, Value::Fn { value: b, .. }) => {
                (Arc::as_ptr(a) as usize).cmp(&(Arc::as_ptr(b) as usize))
            }
            (Value::Native { name: a, .. }, Value::Native { name: b, .. }) => {
                a.cmp(b)
            }
            (Value::Var { value: a, .. }, Value::Var { value: b, .. }) => {
                a.id.cmp(&b.id)
            }
            (Value::Class { value: a, .. }, Value::Class { value: b, .. }) => {
                a.cmp(b)
            }
            (Value::Error { value: a, .. }, Value::Error { value: b, .. }) => {
                (Arc::as_ptr(a) as usize).cmp(&(Arc::as_ptr(b) as usize))
            }
            (a, b) => a.kind_rank().cmp(&b.kind_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nil { .. } => write!(f, "nil"),
            Value::Bool { value, .. } => write!(f, "{}", value),
            Value::Int { value, .. } => write!(f, "{}", value),
            Value::Float { value, .. } => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{:.1}", value)
                } else {
                    write!(f, "{}", value)
                }
            }
            Value::Char { value, .. } => write!(f, "{}", value),
            Value::String { value, .. } => write!(f, "{}", value),
            Value::Symbol { ns, name, .. } => match ns {
                Some(ns) => {
                    write!(f, "{}/{}", interner::ns_name(*ns), interner::sym_name(*name))
                }
                None => write!(f, "{}", interner::sym_name(*name)),
            },
            Value::Keyword { ns, name, .. } => match ns {
                Some(ns) => {
                    write!(f, ":{}/{}", interner::ns_name(*ns), interner::kw_name(*name))
                }
                None => write!(f, ":{}", interner::kw_name(*name)),
            },
            Value::List { value, .. } => {
                write!(f, "{}", pr_seq(value.iter(), "(", ")", Value::pr_str))
            }
            Value::Vector { value, .. } => {
                write!(f, "{}", pr_seq(value.iter(), "[", "]", Value::pr_str))
            }
            Value::Set { value, .. } => {
                write!(f, "{}", pr_seq(value.iter(), "#{", "}", Value::pr_str))
            }
            Value::Map { value, .. } => {
                let pairs: Vec<String> = value
                    .iter()
                    .map(|(k, v)| format!("{} {}", k.pr_str(), v.pr_str()))
                    .collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Value::Lazy { .. } => write!(f, "#<lazy-seq>"),
            Value::Fn { value, .. } => match value.def.name {
                Some(name) => write!(f, "#<fn {}>", interner::sym_name(name)),
                None => write!(f, "#<fn>"),
            },
            Value::Native { name, .. } => {
                write!(f, "#<native {}>", interner::sym_name(*name))
            }
            Value::Var { value, .. } => write!(
                f,
                "#'{}/{}",
                interner::ns_name(value.ns),
                interner::sym_name(value.sym)
            ),
            Value::Class { value, .. } => write!(f, "{}", value.name()),
            Value::Error { value, .. } => write!(f, "{}", value),
            Value::Recur { .. } => write!(f, "#<recur>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{List, Map, Vector};

    #[test]
    fn equality_ignores_metadata() {
        let kw = Value::keyword(None, interner::intern_kw("a"));
        let mut meta = Metadata::new();
        meta.insert(kw, Value::int(1));

        let plain = Value::vector(vec![Value::int(1)].into_iter().collect::<Vector<_>>());
        let tagged = plain.with_meta(Some(Arc::new(meta)));
        assert_eq!(plain, tagged);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::nil().is_truthy());
        assert!(!Value::bool(false).is_truthy());
        assert!(Value::bool(true).is_truthy());
        assert!(Value::int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn map_keys_are_value_equal() {
        let mut map: Map<Value, Value> = Map::new();
        map.insert(Value::int(1), Value::string("a"));
        map.insert(Value::int(1), Value::string("b"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::int(1)), Some(&Value::string("b")));
    }

    #[test]
    fn nan_equals_itself() {
        assert_eq!(Value::float(f64::NAN), Value::float(f64::NAN));
    }

    #[test]
    fn display_round_trip() {
        let list = Value::list(
            List::new().prepend(Value::int(2)).prepend(Value::int(1)),
        );
        assert_eq!(list.to_string(), "(1 2)");
        assert_eq!(Value::string("hi").pr_str(), "\"hi\"");
        assert_eq!(Value::string("hi").to_string(), "hi");
    }
}
