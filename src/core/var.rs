//! Var cells: named, interior-mutable bindings living inside namespaces.
//!
//! A var's identity is its allocation-order id; rebinding the root never
//! changes identity, so `(def x 10) (def x 20)` updates one cell in place.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::core::bindings;
use crate::interner::{NsId, SymId};
use crate::value::{Metadata, Value};

static NEXT_VAR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Var {
    pub id: u64,
    pub ns: NsId,
    pub sym: SymId,
    // None is the unbound sentinel.
    root: RwLock<Option<Value>>,
    meta: RwLock<Option<Arc<Metadata>>>,
    is_macro: AtomicBool,
    dynamic: AtomicBool,
}

impl Var {
    pub fn unbound(ns: NsId, sym: SymId) -> Self {
        Self {
            id: NEXT_VAR_ID.fetch_add(1, Ordering::Relaxed),
            ns,
            sym,
            root: RwLock::new(None),
            meta: RwLock::new(None),
            is_macro: AtomicBool::new(false),
            dynamic: AtomicBool::new(false),
        }
    }

    pub fn with_root(ns: NsId, sym: SymId, value: Value) -> Self {
        let var = Self::unbound(ns, sym);
        var.bind_root(value);
        var
    }

    pub fn is_bound(&self) -> bool {
        self.root.read().unwrap().is_some() || bindings::has_binding(self.id)
    }

    /// The current value: the innermost dynamic binding when one is active,
    /// otherwise the root. `None` when unbound.
    pub fn deref(&self) -> Option<Value> {
        if let Some(v) = bindings::current(self.id) {
            return Some(v);
        }
        self.root.read().unwrap().clone()
    }

    pub fn bind_root(&self, value: Value) {
        *self.root.write().unwrap() = Some(value);
    }

    /// `set!` semantics: writes the active dynamic binding when present,
    /// otherwise replaces the root.
    pub fn set_val(&self, value: Value) {
        if !bindings::set_top(self.id, value.clone()) {
            self.bind_root(value);
        }
    }

    pub fn meta(&self) -> Option<Arc<Metadata>> {
        self.meta.read().unwrap().clone()
    }

    pub fn set_meta(&self, meta: Option<Arc<Metadata>>) {
        *self.meta.write().unwrap() = meta;
    }

    /// Merges new metadata entries over the existing map.
    pub fn alter_meta(&self, new_meta: &Metadata) {
        let mut guard = self.meta.write().unwrap();
        let mut merged = match guard.as_deref() {
            Some(existing) => existing.clone(),
            None => Metadata::new(),
        };
        for (k, v) in new_meta.iter() {
            merged.insert(k.clone(), v.clone());
        }
        *guard = Some(Arc::new(merged));
    }

    pub fn is_macro(&self) -> bool {
        self.is_macro.load(Ordering::Relaxed)
    }

    pub fn set_macro(&self, flag: bool) {
        self.is_macro.store(flag, Ordering::Relaxed);
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.load(Ordering::Relaxed)
    }

    pub fn set_dynamic(&self, flag: bool) {
        self.dynamic.store(flag, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner;

    fn test_var(name: &str) -> Var {
        Var::unbound(interner::intern_ns("var-test"), interner::intern_sym(name))
    }

    #[test]
    fn unbound_until_root_is_set() {
        let var = test_var("a");
        assert!(!var.is_bound());
        assert!(var.deref().is_none());
        var.bind_root(Value::int(1));
        assert!(var.is_bound());
        assert_eq!(var.deref(), Some(Value::int(1)));
    }

    #[test]
    fn rebinding_keeps_identity() {
        let var = test_var("b");
        let id = var.id;
        var.bind_root(Value::int(10));
        var.bind_root(Value::int(20));
        assert_eq!(var.id, id);
        assert_eq!(var.deref(), Some(Value::int(20)));
    }

    #[test]
    fn alter_meta_merges() {
        let var = test_var("c");
        let doc = Value::keyword(None, interner::intern_kw("doc"));
        let mut m1 = Metadata::new();
        m1.insert(doc.clone(), Value::string("one"));
        var.alter_meta(&m1);

        let other = Value::keyword(None, interner::intern_kw("other"));
        let mut m2 = Metadata::new();
        m2.insert(other.clone(), Value::int(2));
        var.alter_meta(&m2);

        let meta = var.meta().expect("meta");
        assert_eq!(meta.get(&doc), Some(&Value::string("one")));
        assert_eq!(meta.get(&other), Some(&Value::int(2)));
    }
}
