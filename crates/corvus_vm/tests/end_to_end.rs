//! The six end-to-end scenarios from §8 "Testable properties", run against
//! the public API surface (`corvus_vm::run`/`run_with_state`) rather than
//! crate-internal items.

use corvus_vm::{State, Value};

fn run(src: &str) -> Value {
    match corvus_vm::run(src) {
        Ok(v) => v,
        Err(e) => panic!("unexpected error: {e}"),
    }
}

#[test]
fn scenario_1_arithmetic_precedence() {
    assert_eq!(run("1 + 2 * 3"), Value::Int(7));
}

#[test]
fn scenario_2_while_loop_counts_to_five() {
    assert_eq!(run("var x = 0; while (x < 5) { x = x + 1; } x"), Value::Int(5));
}

#[test]
fn scenario_3_idx_capture_survives_return() {
    let src = "fn make() { var c = 0; fn inc() { c = c + 1; return c; } return inc; } \
               var f = make(); f(); f(); f()";
    assert_eq!(run(src), Value::Int(3));
}

#[test]
fn scenario_4_ref_capture_at_depth_two() {
    let src = r#"fn outer() { var x = "hi"; fn mid() { fn inner() { return x; } return inner(); } return mid(); } outer()"#;
    assert_eq!(run(src), Value::str("hi"));
}

#[test]
fn scenario_5_array_literal_and_index_assignment() {
    let mut state = State::new();
    corvus_vm::stdlib::register_builtins(&mut state);
    let result = corvus_vm::run_with_state(&mut state, "var a = {1, 2, 3}; a[1] = 42; a").unwrap();
    let Value::Array(r) = result else { panic!("expected array, got {result:?}") };
    assert_eq!(state.array(r), &vec![Value::Int(1), Value::Int(42), Value::Int(3)]);
}

#[test]
fn scenario_6_if_expression_equality() {
    assert_eq!(run(r#"if (1 == 1) { "y" } else { "n" }"#), Value::str("y"));
}
