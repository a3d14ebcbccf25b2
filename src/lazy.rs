//! Lazy sequences: a pull-based engine behind a shared, memoizing handle.
//!
//! A `LazyShared` owns an engine producing elements one at a time and the
//! prefix realized so far. `Value::Lazy` handles pair the shared state with
//! an offset, so `rest` is O(1) and re-walking a sequence replays the
//! memoized prefix instead of re-running effects. The realize-max guard is
//! applied at force time, never at construction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::collections::{List, Vector};
use crate::env::Ctx;
use crate::error::{Error, SpannedError};
use crate::eval;
use crate::reader::Span;
use crate::value::Value;

/// A single-pass element producer. `step` returns `Ok(None)` at the end.
pub trait SeqEngine: Send {
    fn step(&mut self, ctx: &Ctx) -> Result<Option<Value>, SpannedError>;
}

struct LazyInner {
    // None once exhausted (or while a step is in flight).
    engine: Option<Box<dyn SeqEngine>>,
    realized: Vec<Value>,
}

pub struct LazyShared {
    inner: Mutex<LazyInner>,
}

impl std::fmt::Debug for LazyShared {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("LazyShared")
            .field("realized", &inner.realized.len())
            .field("exhausted", &inner.engine.is_none())
            .finish()
    }
}

impl LazyShared {
    pub fn new(engine: Box<dyn SeqEngine>) -> Self {
        Self {
            inner: Mutex::new(LazyInner { engine: Some(engine), realized: Vec::new() }),
        }
    }

    pub fn value(engine: Box<dyn SeqEngine>, span: Span) -> Value {
        Value::Lazy { span, seq: Arc::new(Self::new(engine)), offset: 0 }
    }

    /// Forces realization up to and including index `idx`, returning the
    /// element there, or `None` when the sequence ends first.
    pub fn get(
        &self,
        ctx: &Ctx,
        span: &Span,
        idx: usize,
    ) -> Result<Option<Value>, SpannedError> {
        loop {
            let mut inner = self.inner.lock().unwrap();
            if idx < inner.realized.len() {
                return Ok(inner.realized.get(idx).cloned());
            }
            let Some(mut engine) = inner.engine.take() else {
                return Ok(None);
            };
            if let Some(max) = ctx.opts.realize_max {
                if inner.realized.len() >= max {
                    inner.engine = Some(engine);
                    return Err(SpannedError::new(
                        Error::SizeExceeded(max),
                        span.clone(),
                    ));
                }
            }
            // The engine may re-enter the evaluator, so step without the
            // lock held.
            drop(inner);
            let stepped = engine.step(ctx);
            let mut inner = self.inner.lock().unwrap();
            match stepped {
                Err(e) => {
                    inner.engine = Some(engine);
                    return Err(e);
                }
                Ok(Some(v)) => {
                    inner.realized.push(v);
                    inner.engine = Some(engine);
                }
                Ok(None) => {}
            }
        }
    }

    /// Fully realizes the sequence starting at `offset`.
    pub fn realize_from(
        &self,
        ctx: &Ctx,
        span: &Span,
        offset: usize,
    ) -> Result<Vec<Value>, SpannedError> {
        let mut out = Vec::new();
        let mut idx = offset;
        while let Some(v) = self.get(ctx, span, idx)? {
            out.push(v);
            idx += 1;
        }
        Ok(out)
    }
}

//===----------------------------------------------------------------------===//
// Cursors
//===----------------------------------------------------------------------===//

/// A forward-only cursor over any seqable value, for engines consuming a
/// source collection.
pub enum SeqCursor {
    Empty,
    List(List<Value>),
    Vector(Vector<Value>, usize),
    Lazy(Arc<LazyShared>, usize),
    Items(VecDeque<Value>),
}

impl SeqCursor {
    /// Builds a cursor over a seqable value. Maps yield `[k v]` pairs.
    pub fn new(span: &Span, value: &Value) -> Result<SeqCursor, SpannedError> {
        Ok(match value {
            Value::Nil { .. } => SeqCursor::Empty,
            Value::List { value, .. } => SeqCursor::List((**value).clone()),
            Value::Vector { value, .. } => SeqCursor::Vector(value.clone(), 0),
            Value::Lazy { seq, offset, .. } => {
                SeqCursor::Lazy(seq.clone(), *offset)
            }
            Value::Set { value, .. } => {
                SeqCursor::Items(value.iter().cloned().collect())
            }
            Value::Map { value, .. } => SeqCursor::Items(
                value
                    .iter()
                    .map(|(k, v)| {
                        let mut pair = Vector::new();
                        pair.push_back(k.clone());
                        pair.push_back(v.clone());
                        Value::vector(pair)
                    })
                    .collect(),
            ),
            Value::String { value, .. } => SeqCursor::Items(
                value
                    .chars()
                    .map(|c| Value::Char { span: span.clone(), value: c })
                    .collect(),
            ),
            other => {
                return Err(SpannedError::new(
                    Error::Type(format!(
                        "Cannot create a sequence from {}",
                        other.kind_name()
                    )),
                    span.clone(),
                ))
            }
        })
    }

    pub fn next(
        &mut self,
        ctx: &Ctx,
        span: &Span,
    ) -> Result<Option<Value>, SpannedError> {
        match self {
            SeqCursor::Empty => Ok(None),
            SeqCursor::List(list) => match list.split_first() {
                Some((head, rest)) => {
                    let head = head.clone();
                    *list = rest;
                    Ok(Some(head))
                }
                None => Ok(None),
            },
            SeqCursor::Vector(vec, idx) => {
                let item = vec.get(*idx).cloned();
                if item.is_some() {
                    *idx += 1;
                }
                Ok(item)
            }
            SeqCursor::Lazy(seq, idx) => {
                let item = seq.get(ctx, span, *idx)?;
                if item.is_some() {
                    *idx += 1;
                }
                Ok(item)
            }
            SeqCursor::Items(items) => Ok(items.pop_front()),
        }
    }
}

//===----------------------------------------------------------------------===//
// Engines
//===----------------------------------------------------------------------===//

/// `(range)` / `(range end)` / `(range start end)` / `(range start end step)`.
pub struct RangeEngine {
    pub next: i64,
    pub end: Option<i64>,
    pub step: i64,
}

impl SeqEngine for RangeEngine {
    fn step(&mut self, _ctx: &Ctx) -> Result<Option<Value>, SpannedError> {
        if let Some(end) = self.end {
            let done = if self.step >= 0 { self.next >= end } else { self.next <= end };
            if done {
                return Ok(None);
            }
        }
        let value = self.next;
        self.next += self.step;
        Ok(Some(Value::int(value)))
    }
}

pub struct MapEngine {
    pub f: Value,
    pub source: SeqCursor,
    pub span: Span,
}

impl SeqEngine for MapEngine {
    fn step(&mut self, ctx: &Ctx) -> Result<Option<Value>, SpannedError> {
        match self.source.next(ctx, &self.span)? {
            Some(item) => {
                eval::call_value(ctx, &self.span, &self.f, &[item]).map(Some)
            }
            None => Ok(None),
        }
    }
}

pub struct FilterEngine {
    pub f: Value,
    pub source: SeqCursor,
    pub span: Span,
}

impl SeqEngine for FilterEngine {
    fn step(&mut self, ctx: &Ctx) -> Result<Option<Value>, SpannedError> {
        while let Some(item) = self.source.next(ctx, &self.span)? {
            let keep =
                eval::call_value(ctx, &self.span, &self.f, &[item.clone()])?;
            if keep.is_truthy() {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }
}

/// `mapcat`: maps `f` over the source and flattens each (seqable) result.
pub struct MapcatEngine {
    pub f: Value,
    pub source: SeqCursor,
    pub pending: Option<SeqCursor>,
    pub span: Span,
}

impl SeqEngine for MapcatEngine {
    fn step(&mut self, ctx: &Ctx) -> Result<Option<Value>, SpannedError> {
        loop {
            if let Some(pending) = &mut self.pending {
                if let Some(item) = pending.next(ctx, &self.span)? {
                    return Ok(Some(item));
                }
                self.pending = None;
            }
            match self.source.next(ctx, &self.span)? {
                Some(item) => {
                    let mapped =
                        eval::call_value(ctx, &self.span, &self.f, &[item])?;
                    self.pending = Some(SeqCursor::new(&self.span, &mapped)?);
                }
                None => return Ok(None),
            }
        }
    }
}

pub struct ConcatEngine {
    pub sources: VecDeque<SeqCursor>,
    pub span: Span,
}

impl SeqEngine for ConcatEngine {
    fn step(&mut self, ctx: &Ctx) -> Result<Option<Value>, SpannedError> {
        while let Some(front) = self.sources.front_mut() {
            if let Some(item) = front.next(ctx, &self.span)? {
                return Ok(Some(item));
            }
            self.sources.pop_front();
        }
        Ok(None)
    }
}

pub struct TakeEngine {
    pub remaining: usize,
    pub source: SeqCursor,
    pub span: Span,
}

impl SeqEngine for TakeEngine {
    fn step(&mut self, ctx: &Ctx) -> Result<Option<Value>, SpannedError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.source.next(ctx, &self.span)? {
            Some(item) => {
                self.remaining -= 1;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Ctx, CtxOpts, GlobalEnv};
    use crate::reader::synthetic_span;
    use std::sync::RwLock;

    fn test_ctx(realize_max: Option<usize>) -> Ctx {
        let env = Arc::new(RwLock::new(GlobalEnv::new()));
        let opts = CtxOpts { realize_max, ..CtxOpts::default() };
        Ctx::new(env, Arc::new(opts))
    }

    #[test]
    fn range_realizes_on_demand() {
        let ctx = test_ctx(None);
        let span = synthetic_span();
        let shared = LazyShared::new(Box::new(RangeEngine {
            next: 0,
            end: Some(3),
            step: 1,
        }));
        assert_eq!(shared.get(&ctx, &span, 1).unwrap(), Some(Value::int(1)));
        assert_eq!(shared.get(&ctx, &span, 0).unwrap(), Some(Value::int(0)));
        assert_eq!(shared.get(&ctx, &span, 3).unwrap(), None);
    }

    #[test]
    fn realize_max_trips_at_force_time() {
        let ctx = test_ctx(Some(2));
        let span = synthetic_span();
        // construction of an unbounded range is fine
        let shared = LazyShared::new(Box::new(RangeEngine {
            next: 0,
            end: None,
            step: 1,
        }));
        assert!(shared.get(&ctx, &span, 1).is_ok());
        let err = shared.get(&ctx, &span, 2).unwrap_err();
        assert!(matches!(err.error, Error::SizeExceeded(2)));
    }

    #[test]
    fn realize_from_offset() {
        let ctx = test_ctx(None);
        let span = synthetic_span();
        let shared = LazyShared::new(Box::new(RangeEngine {
            next: 0,
            end: Some(4),
            step: 1,
        }));
        let rest = shared.realize_from(&ctx, &span, 2).unwrap();
        assert_eq!(rest, vec![Value::int(2), Value::int(3)]);
    }
}
