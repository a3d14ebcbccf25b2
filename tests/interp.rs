//! End-to-end evaluator tests: literals, special forms, calls, the recur
//! trampoline and error propagation.

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

//===----------------------------------------------------------------------===//
// Self-evaluating forms
//===----------------------------------------------------------------------===//

#[test]
fn literals_self_evaluate() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "42"), 42);
    assert_eq!(eval(&rt, "2.5"), Value::float(2.5));
    assert_eq!(eval(&rt, "\"hi\""), Value::string("hi"));
    assert_eq!(eval(&rt, "true"), Value::bool(true));
    assert_eq!(eval(&rt, "nil"), Value::nil());
    assert_eq!(eval(&rt, ":kw").to_string(), ":kw");
}

#[test]
fn collection_literals_evaluate_elements_in_order() {
    let rt = Runtime::new();
    assert_eq!(eval(&rt, "[(+ 1 1) (+ 1 2)]").to_string(), "[2 3]");
    assert_eq!(eval(&rt, "{:a (inc 0)}").to_string(), "{:a 1}");
    assert_eq!(eval(&rt, "#{(inc 0)}").to_string(), "#{1}");
}

#[test]
fn quoted_forms_are_data() {
    let rt = Runtime::new();
    assert_eq!(eval(&rt, "'(1 2 3)").to_string(), "(1 2 3)");
    assert_eq!(eval(&rt, "'sym").to_string(), "sym");
}

//===----------------------------------------------------------------------===//
// Special forms
//===----------------------------------------------------------------------===//

#[test]
fn do_returns_last_and_empty_do_is_nil() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(do 1 2 3)"), 3);
    assert_eq!(eval(&rt, "(do)"), Value::nil());
}

#[test]
fn if_only_nil_and_false_are_falsy() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(if 0 1 2)"), 1);
    assert_int(&eval(&rt, "(if \"\" 1 2)"), 1);
    assert_int(&eval(&rt, "(if nil 1 2)"), 2);
    assert_int(&eval(&rt, "(if false 1 2)"), 2);
    assert_eq!(eval(&rt, "(if false 1)"), Value::nil());
}

#[test]
fn if_evaluates_exactly_one_branch() {
    let rt = Runtime::new();
    let value = eval(
        &rt,
        "(do (def hits [])
             (if true
               (def hits (conj hits :t))
               (def hits (conj hits :f)))
             hits)",
    );
    assert_eq!(value.to_string(), "[:t]");
}

#[test]
fn let_binds_sequentially() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(let [a 1 b (inc a)] (+ a b))"), 3);
}

#[test]
fn let_frames_are_local_to_the_body() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(do (let [a 1] a) a)");
    assert!(diag.message().contains("Could not resolve symbol: a"));
}

#[test]
fn and_or_short_circuit() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(and 1 2 3)"), 3);
    assert_eq!(eval(&rt, "(and 1 nil 3)"), Value::nil());
    assert_int(&eval(&rt, "(or nil false 7)"), 7);
    assert_eq!(eval(&rt, "(and)"), Value::bool(true));
    assert_eq!(eval(&rt, "(or)"), Value::nil());
    // the short circuit prevents later effects
    let value = eval(
        &rt,
        "(do (def effects [])
             (or 1 (def effects (conj effects :ran)))
             effects)",
    );
    assert_eq!(value.to_string(), "[]");
}

#[test]
fn case_matches_by_value() {
    let rt = Runtime::new();
    assert_eq!(eval(&rt, "(case 2 1 :a 2 :b :z)").to_string(), ":b");
    assert_eq!(eval(&rt, "(case 9 1 :a 2 :b :z)").to_string(), ":z");
}

#[test]
fn case_without_default_fails() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(case 3 1 :a 2 :b)");
    assert!(diag.message().contains("No matching clause: 3"));
}

//===----------------------------------------------------------------------===//
// def and vars
//===----------------------------------------------------------------------===//

#[test]
fn def_rebinds_in_place() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(do (def x 10) (def x 20) x)"), 20);
}

#[test]
fn def_keeps_var_identity_across_redefinition() {
    let rt = Runtime::new();
    let first = eval(&rt, "(def x 10)");
    let second = eval(&rt, "(def x 20)");
    match (first, second) {
        (Value::Var { value: a, .. }, Value::Var { value: b, .. }) => {
            assert_eq!(a.id, b.id);
            assert_eq!(b.deref(), Some(Value::int(20)));
        }
        other => panic!("expected two vars, got {:?}", other),
    }
}

#[test]
fn def_docstring_lands_in_meta() {
    let rt = Runtime::new();
    let value = eval(&rt, "(do (def d \"the docs\" 1) (get (meta (var d)) :doc))");
    assert_eq!(value, Value::string("the docs"));
}

#[test]
fn def_without_init_preserves_existing_value() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(do (def x 5) (def x) x)"), 5);
}

#[test]
fn set_on_non_var_fails() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(set! 1 2)");
    assert!(diag.message().contains("Cannot set"));
}

#[test]
fn dynamic_binding_scopes_and_set() {
    let rt = Runtime::new();
    assert_int(
        &eval(
            &rt,
            "(do (def ^:dynamic *depth* 1)
                 (binding [*depth* 2] (set! *depth* 3) *depth*))",
        ),
        3,
    );
    // the root is untouched after the binding exits
    assert_int(&eval(&rt, "*depth*"), 1);
}

#[test]
fn binding_requires_dynamic_vars() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(do (def plain 1) (binding [plain 2] plain))");
    assert!(diag.message().contains("non-dynamic"));
}

//===----------------------------------------------------------------------===//
// Functions and the trampoline
//===----------------------------------------------------------------------===//

#[test]
fn fn_recur_counts_up() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "((fn f [x] (if (< x 3) (recur (inc x)) x)) 0)"), 3);
}

#[test]
fn recur_does_not_grow_the_stack() {
    let rt = Runtime::new();
    assert_int(
        &eval(&rt, "((fn f [x] (if (< x 100000) (recur (inc x)) x)) 0)"),
        100_000,
    );
}

#[test]
fn loop_recur() {
    let rt = Runtime::new();
    assert_int(
        &eval(&rt, "(loop [i 0 acc 0] (if (< i 5) (recur (inc i) (+ acc i)) acc))"),
        10,
    );
}

#[test]
fn recur_outside_tail_position_is_rejected() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "((fn f [x] (inc (recur x))) 1)");
    assert!(diag.message().contains("tail position"));
}

#[test]
fn closures_capture_their_frame() {
    let rt = Runtime::new();
    assert_int(
        &eval(
            &rt,
            "(do (def make-adder (fn [n] (fn [m] (+ n m))))
                 ((make-adder 3) 4))",
        ),
        7,
    );
}

#[test]
fn multi_arity_and_variadic() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "((fn ([x] x) ([x y] (+ x y))) 5)"), 5);
    assert_int(&eval(&rt, "((fn ([x] x) ([x y] (+ x y))) 5 6)"), 11);
    assert_int(&eval(&rt, "((fn [x & more] (+ x (count more))) 1 2 3 4)"), 4);
    assert_eq!(eval(&rt, "((fn [x & more] more) 1)"), Value::nil());
}

#[test]
fn wrong_arity_reports_the_function() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "((fn one [x] x) 1 2)");
    assert!(diag.message().contains("Wrong number of args (2) passed to: one"));
}

#[test]
fn argument_effects_happen_left_to_right() {
    let rt = Runtime::new();
    let value = eval(
        &rt,
        "(do (def order [])
             (def note (fn [x] (do (def order (conj order x)) x)))
             (+ (note 1) (note 2) (note 3))
             order)",
    );
    assert_eq!(value.to_string(), "[1 2 3]");
}

#[test]
fn calling_a_non_callable_fails() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(1 2)");
    assert!(diag.message().contains("Cannot call 1 as a function"));
}

#[test]
fn keywords_maps_and_vectors_are_callable() {
    let rt = Runtime::new();
    assert_int(&eval(&rt, "(:a {:a 1})"), 1);
    assert_int(&eval(&rt, "(:missing {:a 1} 9)"), 9);
    assert_int(&eval(&rt, "({:a 1} :a)"), 1);
    assert_int(&eval(&rt, "([10 20 30] 1)"), 20);
}

//===----------------------------------------------------------------------===//
// try/throw
//===----------------------------------------------------------------------===//

#[test]
fn try_catch_finally_scenario() {
    let rt = Runtime::new();
    let value = eval(
        &rt,
        "(try (throw (ex-info \"x\" {}))
              (catch Exception e (ex-message e))
              (finally 42))",
    );
    assert_eq!(value, Value::string("x"));
}

#[test]
fn finally_runs_on_every_exit_path() {
    let rt = Runtime::new();
    // normal exit
    let value = eval(
        &rt,
        "(do (def runs [])
             (try 1 (finally (def runs (conj runs :ok))))
             (try (throw (ex-info \"b\" {}))
                  (catch Exception e nil)
                  (finally (def runs (conj runs :err))))
             runs)",
    );
    assert_eq!(value.to_string(), "[:ok :err]");
}

#[test]
fn first_matching_catch_wins_and_is_subclass_aware() {
    let rt = Runtime::new();
    let value = eval(
        &rt,
        "(try (throw (ex-info \"boom\" {}))
              (catch ArithmeticException e :math)
              (catch Exception e :general))",
    );
    assert_eq!(value.to_string(), ":general");
}

#[test]
fn uncaught_errors_propagate_with_message() {
    let rt = Runtime::new();
    let diag = eval_err(
        &rt,
        "(try (throw (ex-info \"deep\" {})) (catch ArithmeticException e :no))",
    );
    assert!(diag.message().contains("deep"));
}

#[test]
fn throw_requires_an_error_value() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(throw 1)");
    assert!(diag.message().contains("Cannot throw"));
}

#[test]
fn ex_data_round_trips() {
    let rt = Runtime::new();
    assert_int(
        &eval(
            &rt,
            "(try (throw (ex-info \"x\" {:code 7}))
                  (catch Exception e (get (ex-data e) :code)))",
        ),
        7,
    );
}

#[test]
fn division_by_zero_is_catchable_as_arithmetic() {
    let rt = Runtime::new();
    let value = eval(
        &rt,
        "(try (/ 1 0) (catch ArithmeticException e (ex-message e)))",
    );
    assert_eq!(value, Value::string("Divide by zero"));
}

//===----------------------------------------------------------------------===//
// Errors and diagnostics
//===----------------------------------------------------------------------===//

#[test]
fn unresolved_symbol_reports_name_and_location() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(inc nope)");
    assert!(diag.message().contains("Could not resolve symbol: nope"));
    let rendered = diag.format();
    assert!(rendered.contains("REPL:1:"), "{}", rendered);
}

#[test]
fn taking_a_macro_value_fails() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "when");
    assert!(diag.message().contains("Can't take value of a macro"));
}

#[test]
fn errors_point_at_the_failing_line() {
    let rt = Runtime::new();
    let diag = eval_err(&rt, "(+ 1 2)\n(boom)\n");
    assert_eq!(diag.location().0, 2);
}
