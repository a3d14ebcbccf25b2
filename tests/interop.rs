//! Host interop gateway tests: static fields and methods, instance methods,
//! constructors, the class allow-list and dry-run suppression.

use sable::options::{ClassSpec, EvalOptions};
use sable::reader::Source;
use sable::runtime::{Runtime, RuntimeRef};
use sable::value::Value;

fn rt_with(classes: ClassSpec) -> RuntimeRef {
    Runtime::with_options(EvalOptions { classes, ..EvalOptions::default() })
}

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

//===----------------------------------------------------------------------===//
// Allowed interop
//===----------------------------------------------------------------------===//

#[test]
fn instance_methods_on_strings() {
    let rt = rt_with(ClassSpec::AllowAll);
    assert_int(&eval(&rt, "(.length \"hi\")"), 2);
    assert_eq!(eval(&rt, "(.toUpperCase \"ab\")"), Value::string("AB"));
    assert_eq!(eval(&rt, "(.substring \"hello\" 1 3)"), Value::string("el"));
    assert_eq!(eval(&rt, "(.contains \"hello\" \"ell\")"), Value::bool(true));
    assert_int(&eval(&rt, "(.indexOf \"hello\" \"l\")"), 2);
    assert_int(&eval(&rt, "(.indexOf \"hello\" \"z\")"), -1);
}

#[test]
fn dot_special_form_spelling() {
    let rt = rt_with(ClassSpec::AllowAll);
    assert_int(&eval(&rt, "(. \"hi\" length)"), 2);
    assert_int(&eval(&rt, "(. \"hello\" (indexOf \"l\"))"), 2);
}

#[test]
fn static_fields_and_methods() {
    let rt = rt_with(ClassSpec::AllowAll);
    assert_eq!(eval(&rt, "Long/MAX_VALUE"), Value::int(i64::MAX));
    assert_int(&eval(&rt, "(Math/abs -3)"), 3);
    assert_eq!(eval(&rt, "(Math/sqrt 9)"), Value::float(3.0));
    assert_int(&eval(&rt, "(Long/parseLong \"42\")"), 42);
    match eval(&rt, "Math/PI") {
        Value::Float { value, .. } => {
            assert!((value - std::f64::consts::PI).abs() < f64::EPSILON)
        }
        other => panic!("expected a float, got {:?}", other),
    }
}

#[test]
fn constructors_build_host_values() {
    let rt = rt_with(ClassSpec::AllowAll);
    assert_eq!(
        eval(&rt, "(.getMessage (new Exception \"bad\"))"),
        Value::string("bad")
    );
    assert_eq!(eval(&rt, "(new String \"copy\")"), Value::string("copy"));
}

#[test]
fn constructed_errors_are_throwable() {
    let rt = rt_with(ClassSpec::AllowAll);
    let value = eval(
        &rt,
        "(try (throw (new Exception \"built\"))
              (catch Exception e (ex-message e)))",
    );
    assert_eq!(value, Value::string("built"));
}

#[test]
fn instance_and_class_predicates() {
    let rt = rt_with(ClassSpec::AllowAll);
    assert_eq!(eval(&rt, "(instance? String \"s\")"), Value::bool(true));
    assert_eq!(eval(&rt, "(instance? Long \"s\")"), Value::bool(false));
    assert_eq!(eval(&rt, "(instance? Object 1)"), Value::bool(true));
    assert_eq!(eval(&rt, "(class 1)").to_string(), "Long");
}

//===----------------------------------------------------------------------===//
// The allow-list
//===----------------------------------------------------------------------===//

#[test]
fn empty_allow_list_blocks_instance_methods() {
    let rt = rt_with(ClassSpec::Deny);
    let diag = eval_err(&rt, "(.length \"hi\")");
    assert_eq!(diag.message(), "Method length on String not allowed!");
    // the failure carries the call's source line
    let rendered = diag.format();
    assert!(rendered.contains("REPL:1:"), "{}", rendered);
}

#[test]
fn allow_list_is_per_class() {
    let rt = rt_with(ClassSpec::Allow(vec!["String".to_string()]));
    assert_int(&eval(&rt, "(.length \"hi\")"), 2);
    let diag = eval_err(&rt, "(Math/abs -3)");
    assert_eq!(diag.message(), "Method abs on Math not allowed!");
}

#[test]
fn tag_metadata_selects_the_policy_class() {
    let rt = rt_with(ClassSpec::Allow(vec!["String".to_string()]));
    assert_int(&eval(&rt, "(let [^String s \"hi\"] (.length s))"), 2);
}

#[test]
fn tag_takes_priority_over_the_runtime_class() {
    let rt = rt_with(ClassSpec::Allow(vec!["Long".to_string()]));
    // the runtime class (String) is blocked...
    let diag = eval_err(&rt, "(.length \"hi\")");
    assert!(diag.message().contains("not allowed!"));
    // ...but a :tag hint is consulted first
    assert_int(&eval(&rt, "(let [^Long s \"hi\"] (.length s))"), 2);
}

#[test]
fn constructors_respect_the_allow_list() {
    let rt = rt_with(ClassSpec::Deny);
    let diag = eval_err(&rt, "(new Exception \"x\")");
    assert!(diag.message().contains("not allowed!"));
}

//===----------------------------------------------------------------------===//
// dry-run
//===----------------------------------------------------------------------===//

fn dry_runtime() -> RuntimeRef {
    Runtime::with_options(EvalOptions {
        classes: ClassSpec::AllowAll,
        dry_run: true,
        ..EvalOptions::default()
    })
}

#[test]
fn dry_run_suppresses_calls_and_construction() {
    let rt = dry_runtime();
    assert_eq!(eval(&rt, "(.length \"hi\")"), Value::nil());
    assert_eq!(eval(&rt, "(new Exception \"x\")"), Value::nil());
    assert_eq!(eval(&rt, "(Math/abs -3)"), Value::nil());
}

#[test]
fn dry_run_still_reads_static_fields() {
    let rt = dry_runtime();
    assert_eq!(eval(&rt, "Long/MAX_VALUE"), Value::int(i64::MAX));
}
