//! The dynamic binding stack: a thread-local LIFO of per-var overrides.
//!
//! `push` installs a set of bindings and returns a guard; dropping the guard
//! pops them, so every exit path (return, `?`, panic unwind) restores the
//! previous state.

use std::cell::RefCell;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::core::Var;
use crate::value::Value;

thread_local! {
    static STACK: RefCell<FxHashMap<u64, Vec<Value>>> =
        RefCell::new(FxHashMap::default());
}

/// The innermost binding for the var, if any.
pub fn current(var_id: u64) -> Option<Value> {
    STACK.with(|cell| {
        cell.borrow().get(&var_id).and_then(|stack| stack.last()).cloned()
    })
}

pub fn has_binding(var_id: u64) -> bool {
    STACK.with(|cell| {
        cell.borrow().get(&var_id).map(|s| !s.is_empty()).unwrap_or(false)
    })
}

/// Replaces the innermost binding. Returns false when no binding is active.
pub fn set_top(var_id: u64, value: Value) -> bool {
    STACK.with(|cell| {
        let mut map = cell.borrow_mut();
        match map.get_mut(&var_id).and_then(|s| s.last_mut()) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    })
}

/// Pushes a binding for each (var, value) pair. The returned guard pops them
/// in `Drop`.
pub fn push(pairs: &[(Arc<Var>, Value)]) -> BindingsGuard {
    STACK.with(|cell| {
        let mut map = cell.borrow_mut();
        for (var, value) in pairs {
            map.entry(var.id).or_default().push(value.clone());
        }
    });
    BindingsGuard { ids: pairs.iter().map(|(var, _)| var.id).collect() }
}

pub struct BindingsGuard {
    ids: Vec<u64>,
}

impl Drop for BindingsGuard {
    fn drop(&mut self) {
        STACK.with(|cell| {
            let mut map = cell.borrow_mut();
            for id in &self.ids {
                if let Some(stack) = map.get_mut(id) {
                    stack.pop();
                    if stack.is_empty() {
                        map.remove(id);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interner;

    fn test_var(name: &str) -> Arc<Var> {
        Arc::new(Var::with_root(
            interner::intern_ns("bindings-test"),
            interner::intern_sym(name),
            Value::int(0),
        ))
    }

    #[test]
    fn push_and_pop_restores_previous() {
        let var = test_var("a");
        assert_eq!(var.deref(), Some(Value::int(0)));
        {
            let _guard = push(&[(var.clone(), Value::int(1))]);
            assert_eq!(var.deref(), Some(Value::int(1)));
            {
                let _inner = push(&[(var.clone(), Value::int(2))]);
                assert_eq!(var.deref(), Some(Value::int(2)));
            }
            assert_eq!(var.deref(), Some(Value::int(1)));
        }
        assert_eq!(var.deref(), Some(Value::int(0)));
    }

    #[test]
    fn set_top_only_touches_active_binding() {
        let var = test_var("b");
        assert!(!set_top(var.id, Value::int(9)));
        let _guard = push(&[(var.clone(), Value::int(1))]);
        assert!(set_top(var.id, Value::int(9)));
        assert_eq!(var.deref(), Some(Value::int(9)));
    }
}
