//! Lazy sequence behavior: deferred effects, memoized prefixes, forcing
//! through deref, and the realize-max guard.

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

fn limited_runtime(realize_max: usize) -> RuntimeRef {
    Runtime::with_options(EvalOptions {
        realize_max: Some(realize_max),
        ..EvalOptions::default()
    })
}

//===----------------------------------------------------------------------===//
// Laziness and memoization
//===----------------------------------------------------------------------===//

#[test]
fn map_defers_effects_until_forced() {
    let rt = Runtime::new();
    eval(
        &rt,
        "(do (def hits [])
             (def s (map (fn [x] (do (def hits (conj hits x)) x)) [1 2 3])))",
    );
    // nothing realized yet
    assert_int(&eval(&rt, "(count hits)"), 0);
    // forcing the head runs exactly one step
    assert_int(&eval(&rt, "(first s)"), 1);
    assert_int(&eval(&rt, "(count hits)"), 1);
}

#[test]
fn realized_prefix_is_memoized() {
    let rt = Runtime::new();
    eval(
        &rt,
        "(do (def hits [])
             (def s (map (fn [x] (do (def hits (conj hits x)) x)) [1 2 3])))",
    );
    eval(&rt, "(first s)");
    eval(&rt, "(first s)");
    eval(&rt, "(first s)");
    assert_int(&eval(&rt, "(count hits)"), 1);
}

#[test]
fn rest_shares_the_producer() {
    let rt = Runtime::new();
    assert_int(
        &eval(&rt, "(let [s (map inc [1 2 3]) r (rest s)] (first r))"),
        3,
    );
}

#[test]
fn deref_forces_full_realization() {
    let rt = Runtime::new();
    assert_eq!(eval(&rt, "@(map inc [1 2])").to_string(), "(2 3)");
    eval(
        &rt,
        "(do (def hits [])
             (def s (map (fn [x] (do (def hits (conj hits x)) x)) [1 2 3])))",
    );
    eval(&rt, "@s");
    assert_int(&eval(&rt, "(count hits)"), 3);
}

#[test]
fn filter_and_take_compose_lazily() {
    let rt = Runtime::new();
    assert_eq!(
        eval(&rt, "(vec (take 3 (filter (fn [x] (zero? x)) (range 100))))")
            .to_string(),
        "[0]"
    );
    assert_eq!(
        eval(&rt, "(vec (take 4 (map (fn [x] (* x x)) (range))))").to_string(),
        "[0 1 4 9]"
    );
}

#[test]
fn concat_walks_sources_in_order() {
    let rt = Runtime::new();
    assert_eq!(eval(&rt, "(vec (concat [1] '(2 3) [4]))").to_string(), "[1 2 3 4]");
}

#[test]
fn reduce_consumes_lazy_sources() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(reduce + 0 (map inc [1 2 3]))"), 9);
    assert_int(&eval(&rt, "(reduce + (range 5))"), 10);
}

//===----------------------------------------------------------------------===//
// realize-max
//===----------------------------------------------------------------------===//

#[test]
fn unbounded_construction_is_fine_forcing_is_not() {
    let rt = limited_runtime(5);
    // constructing an infinite range is allowed
    eval(&rt, "(def everything (range))");
    // forcing past the limit aborts
    let diag = eval_err(&rt, "(vec everything)");
    assert!(diag
        .message()
        .contains("Maximum number of elements realized: 5"));
}

#[test]
fn takes_under_the_limit_pass() {
    let rt = limited_runtime(5);
    assert_eq!(eval(&rt, "(vec (take 3 (range)))").to_string(), "[0 1 2]");
}

#[test]
fn literal_collections_respect_the_limit() {
    let rt = limited_runtime(3);
    assert_eq!(eval(&rt, "[1 2 3]").to_string(), "[1 2 3]");
    let diag = eval_err(&rt, "[1 2 3 4]");
    assert!(diag
        .message()
        .contains("Maximum number of elements realized: 3"));
}

#[test]
fn count_of_an_oversized_lazy_seq_trips_the_guard() {
    let rt = limited_runtime(5);
    let diag = eval_err(&rt, "(count (range 10))");
    assert!(diag
        .message()
        .contains("Maximum number of elements realized: 5"));
}
