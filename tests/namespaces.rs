//! Namespace, var and require semantics: in-ns, aliasing, refers, load
//! rollback and the loaded-library cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sable::env::LoadedLib;
use sable::interner;
use sable::options::EvalOptions;
use sable::reader::Source;
use sable::runtime::{Runtime, RuntimeRef};
use sable::value::Value;

fn eval(rt: &RuntimeRef, src: &str) -> Value {
    rt.eval_string(src, Source::Repl).unwrap_or_else(|diag| {
        panic!("failed to eval `{}`:\n{}", src, diag.format())
    })
}

fn eval_err(rt: &RuntimeRef, src: &str) -> sable::Diagnostic {
    match rt.eval_string(src, Source::Repl) {
        Ok(value) => panic!("expected `{}` to fail, got {}", src, value.pr_str()),
        Err(diag) => diag,
    }
}

fn assert_int(value: &Value, expected: i64) {
    match value {
        Value::Int { value: v, .. } => assert_eq!(*v, expected),
        other => panic!("expected Int({}), got {:?}", expected, other),
    }
}

/// A runtime whose load-fn serves the given libraries and counts loads.
fn runtime_with_libs(
    libs: Vec<(&str, &str)>,
) -> (RuntimeRef, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let libs: Vec<(String, String)> = libs
        .into_iter()
        .map(|(name, src)| (name.to_string(), src.to_string()))
        .collect();
    let opts = EvalOptions {
        load_fn: Some(Arc::new(move |name: &str| {
            libs.iter().find(|(lib, _)| lib == name).map(|(lib, src)| {
                counter.fetch_add(1, Ordering::SeqCst);
                LoadedLib {
                    file: Some(format!("{}.sbl", lib)),
                    source: src.clone(),
                }
            })
        })),
        ..EvalOptions::default()
    };
    (Runtime::with_options(opts), loads)
}

//===----------------------------------------------------------------------===//
// in-ns and def
//===----------------------------------------------------------------------===//

#[test]
fn in_ns_switches_and_returns_nil() {
    let rt = Runtime::new();
    assert_eq!(eval(&rt, "(in-ns 'scratch.ns)"), Value::nil());
    assert_int(&eval(&rt, "(do (def local 1) local)"), 1);
}

#[test]
fn namespaces_isolate_definitions() {
    let rt = Runtime::new();
    let value = eval(
        &rt,
        "(do (in-ns 'iso.one)
             (def x 1)
             (in-ns 'iso.two)
             (def x 2)
             x)",
    );
    assert_int(&value, 2);
    // qualified access reaches each namespace's own mapping
    assert_int(&eval(&rt, "iso.one/x"), 1);
    assert_int(&eval(&rt, "iso.two/x"), 2);
}

#[test]
fn new_namespaces_refer_the_core_library() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(do (in-ns 'fresh.ns) (inc 1))"), 2);
}

#[test]
fn def_with_ns_metadata_targets_that_namespace() {
    let rt = Runtime::new();
    eval(&rt, "(def ^{:ns target.ns} q 5)");
    assert_int(&eval(&rt, "target.ns/q"), 5);
}

#[test]
fn resolve_returns_var_or_nil() {
    let rt = Runtime::new();
    eval(&rt, "(def known 1)");
    match eval(&rt, "(resolve 'known)") {
        Value::Var { .. } => {}
        other => panic!("expected a var, got {:?}", other),
    }
    assert_eq!(eval(&rt, "(resolve 'unknown-thing)"), Value::nil());
}

//===----------------------------------------------------------------------===//
// require
//===----------------------------------------------------------------------===//

#[test]
fn require_with_alias_and_refer() {
    let (rt, loads) =
        runtime_with_libs(vec![("foo", "(ns foo) (defn g [] 7)")]);
    eval(&rt, "(require '[foo :as f :refer [g]])");
    assert_int(&eval(&rt, "(f/g)"), 7);
    assert_int(&eval(&rt, "(g)"), 7);
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    // a second require without :reload does not re-evaluate the source
    eval(&rt, "(require 'foo)");
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[test]
fn require_reload_re_evaluates() {
    let (rt, loads) = runtime_with_libs(vec![("foo", "(ns foo) (def v 1)")]);
    eval(&rt, "(require 'foo)");
    eval(&rt, "(require '[foo :reload])");
    assert_eq!(loads.load(Ordering::SeqCst), 2);
}

#[test]
fn require_unknown_library_fails() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(require 'ghost)");
    assert!(diag.message().contains("Could not require ghost."));
}

#[test]
fn refer_must_be_sequential() {
    let (rt, _) = runtime_with_libs(vec![("foo", "(ns foo) (def g 1)")]);
    let diag = eval_err(&rt, "(require '[foo :refer g])");
    assert!(diag
        .message()
        .contains(":refer value must be a sequential collection of symbols"));
}

#[test]
fn refer_unknown_symbol_fails() {
    let (rt, _) = runtime_with_libs(vec![("foo", "(ns foo) (def g 1)")]);
    let diag = eval_err(&rt, "(require '[foo :refer [h]])");
    assert!(diag.message().contains("h does not exist"));
}

#[test]
fn failed_load_rolls_back_the_namespace() {
    let (rt, _) =
        runtime_with_libs(vec![("bad", "(ns bad) (def ok 1) (boom)")]);
    let diag = eval_err(&rt, "(require 'bad)");
    assert!(diag.message().contains("Could not resolve symbol: boom"));

    // the half-loaded namespace was removed
    let env = rt.ctx().env.read().unwrap();
    assert!(!env.namespaces.contains_key(&interner::intern_ns("bad")));
}

#[test]
fn load_restores_the_current_namespace() {
    let (rt, _) = runtime_with_libs(vec![("lib.a", "(ns lib.a) (def v 1)")]);
    eval(&rt, "(in-ns 'caller.ns)");
    eval(&rt, "(require 'lib.a)");
    assert_eq!(
        rt.ctx().env.read().unwrap().current_ns,
        interner::intern_ns("caller.ns")
    );
}

#[test]
fn loading_binds_the_file_var() {
    let (rt, _) = runtime_with_libs(vec![(
        "whereami",
        "(ns whereami) (def loaded-from (deref (var sable.core/*file*)))",
    )]);
    eval(&rt, "(require 'whereami)");
    assert_eq!(
        eval(&rt, "whereami/loaded-from"),
        Value::string("whereami.sbl")
    );
}

#[test]
fn ns_macro_wires_requires() {
    let (rt, _) =
        runtime_with_libs(vec![("lib.util", "(ns lib.util) (defn helper [] 42)")]);
    eval(&rt, "(ns app.main (:require [lib.util :as u]))");
    assert_int(&eval(&rt, "(u/helper)"), 42);
}

#[test]
fn preloaded_namespaces_count_as_loaded() {
    let opts = EvalOptions {
        namespaces: vec![(
            "prebaked".to_string(),
            vec![("answer".to_string(), Value::int(41))],
        )],
        ..EvalOptions::default()
    };
    let rt = Runtime::with_options(opts);
    // no load-fn, but the namespace already exists
    eval(&rt, "(require '[prebaked :as p])");
    assert_int(&eval(&rt, "(inc p/answer)"), 42);
}

//===----------------------------------------------------------------------===//
// refer excludes
//===----------------------------------------------------------------------===//

#[test]
fn refer_exclude_unions_into_the_namespace() {
    let rt = Runtime::new();
    eval(&rt, "(refer 'sable.core :exclude '[map])");
    eval(&rt, "(refer 'sable.core :exclude '[filter])");

    let env = rt.ctx().env.read().unwrap();
    let user = env.namespace(interner::intern_ns("user")).expect("user ns");
    let core = interner::intern_ns("sable.core");
    assert!(user.is_excluded(core, interner::intern_sym("map")));
    assert!(user.is_excluded(core, interner::intern_sym("filter")));
    assert!(!user.is_excluded(core, interner::intern_sym("reduce")));
}
