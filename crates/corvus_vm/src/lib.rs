//! Bytecode compiler and stack VM for the corvus scripting language:
//! lexing and parsing are `corvus_lexer`/`corvus_parser`'s job, this crate
//! owns everything from `Program` onward (§3-§4).

pub mod chunk;
pub mod compiler;
pub mod diagnostics;
pub mod error;
pub mod heap;
pub mod opcode;
pub mod stdlib;
pub mod value;
pub mod valuemap;
pub mod vm;

pub use chunk::Prototype;
pub use error::{CompileError, CorvusError, CorvusResult, RuntimeError};
pub use value::Value;
pub use vm::State;

use std::rc::Rc;

use value::ClosureObj;

/// Compiles and runs `source` to completion, returning the value left on
/// top of the stack. Equivalent to the host driving the API surface of
/// §4.7 by hand: parse, compile, wrap the root prototype as a closure,
/// `call(0, 1)`, pop.
pub fn run(source: &str) -> CorvusResult<Value> {
    let mut state = State::new();
    stdlib::register_builtins(&mut state);
    run_with_state(&mut state, source)
}

/// Same as [`run`], but against a caller-supplied `State` so a host can
/// run several sources (or a REPL's successive lines) against one set of
/// globals and one heap.
pub fn run_with_state(state: &mut State, source: &str) -> CorvusResult<Value> {
    run_with_state_inner(state, source).map_err(|e| {
        log::error!("{e}");
        e
    })
}

fn run_with_state_inner(state: &mut State, source: &str) -> CorvusResult<Value> {
    let (program, lex_errors, parse_errors) = corvus_parser::parse(source);
    if let Some(e) = lex_errors.into_iter().next() {
        return Err(CorvusError::Lex(e));
    }
    if let Some(e) = parse_errors.into_iter().next() {
        return Err(CorvusError::Parse(e));
    }
    let proto = compiler::compile(&program)?;
    let closure = ClosureObj::Lang { proto: Rc::new(proto), upvalues: Vec::new() };
    state.push(Value::Closure(Rc::new(closure)));
    state.call(0, 1)?;
    Ok(state.pop()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(src: &str) -> Value {
        match run(src) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }

    fn r_err(src: &str) -> CorvusError {
        match run(src) {
            Err(e) => e,
            Ok(v) => panic!("expected error, got {v:?}"),
        }
    }

    // ── Arithmetic ──────────────────────────────────────────────────────
    #[test]
    fn int_add() {
        assert_eq!(r("1 + 2"), Value::Int(3));
    }
    #[test]
    fn precedence() {
        assert_eq!(r("1 + 2 * 3"), Value::Int(7));
    }
    #[test]
    fn float_promotion() {
        assert_eq!(r("1 + 2.5"), Value::Float(3.5));
    }
    #[test]
    fn division_by_zero() {
        assert!(matches!(r_err("1 / 0"), CorvusError::Runtime(RuntimeError::DivisionByZero)));
    }
    #[test]
    fn power() {
        assert_eq!(r("2 ** 10"), Value::Int(1024));
    }

    // ── Variables & scoping ─────────────────────────────────────────────
    #[test]
    fn var_reassign() {
        assert_eq!(r("var x = 1; x = 2; x"), Value::Int(2));
    }
    #[test]
    fn const_assign_is_compile_error() {
        assert!(matches!(r_err("const x = 1; x = 2;"), CorvusError::Compile(CompileError::AssignToConst { .. })));
    }
    #[test]
    fn redeclaration_is_compile_error() {
        assert!(matches!(r_err("var x = 1; var x = 2;"), CorvusError::Compile(CompileError::Redeclared { .. })));
    }
    #[test]
    fn block_scope_does_not_leak() {
        assert!(matches!(r_err("while (false) { var x = 1; } x"), CorvusError::Runtime(RuntimeError::UndefinedGlobal { .. })));
    }

    // ── Control flow ────────────────────────────────────────────────────
    #[test]
    fn while_loop() {
        assert_eq!(r("var x = 0; while (x < 5) { x = x + 1; } x"), Value::Int(5));
    }
    #[test]
    fn if_as_expression() {
        assert_eq!(r("var x = if (true) { 1 } else { 2 }; x"), Value::Int(1));
        assert_eq!(r("var x = if (false) { 1 } else { 2 }; x"), Value::Int(2));
    }
    #[test]
    fn if_with_locals_in_branch() {
        assert_eq!(r("if (true) { var a = 1; var b = 2; a + b } else { 0 }"), Value::Int(3));
    }

    // ── Functions, closures & upvalues ──────────────────────────────────
    #[test]
    fn empty_function_body_returns_null() {
        assert_eq!(r("fn nothing() {} nothing()"), Value::Null);
    }
    #[test]
    fn recursion() {
        let src = "fn fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); } fact(5)";
        assert_eq!(r(src), Value::Int(120));
    }
    #[test]
    fn closure_counter_idx_capture_and_heap_promotion() {
        let src = "fn make() { var c = 0; fn inc() { c = c + 1; return c; } return inc; } \
                   var f = make(); f(); f(); f()";
        assert_eq!(r(src), Value::Int(3));
    }
    #[test]
    fn sibling_closures_share_captured_local() {
        let src = "fn make() { var c = 0; fn inc() { c = c + 1; } fn get() { return c; } inc(); inc(); return get(); } make()";
        assert_eq!(r(src), Value::Int(2));
    }
    #[test]
    fn nested_closure_ref_capture() {
        let src = "fn outer() { var x = 10; fn middle() { fn inner() { return x; } return inner(); } return middle(); } outer()";
        assert_eq!(r(src), Value::Int(10));
    }

    // ── Arrays & maps ───────────────────────────────────────────────────
    #[test]
    fn array_index_read_and_write() {
        assert_eq!(r("var a = {1, 2, 3}; a[1] = 99; a[1]"), Value::Int(99));
    }
    #[test]
    fn array_index_out_of_bounds() {
        assert!(matches!(r_err("var a = {1}; a[5]"), CorvusError::Runtime(RuntimeError::IndexOutOfBounds { .. })));
    }
    #[test]
    fn map_field_read_and_write() {
        assert_eq!(r(r#"var m = {"x": 1}; m["x"] = 2; m["x"]"#), Value::Int(2));
    }

    // ── Classes (map-backed lowering) ───────────────────────────────────
    #[test]
    fn class_field_default_and_method() {
        let src = "class Counter { count = 0; fn bump() { self.count = self.count + 1; return self.count; } } \
                   var c = Counter(); c.bump(); c.bump()";
        assert_eq!(r(src), Value::Int(2));
    }

    // ── Built-ins ───────────────────────────────────────────────────────
    #[test]
    fn builtin_len_and_typeof() {
        assert_eq!(r("len({1, 2, 3})"), Value::Int(3));
        assert_eq!(r("typeof(42)"), Value::str("Int"));
    }
    #[test]
    fn builtin_assert_failure_is_runtime_error() {
        assert!(matches!(r_err("assert(false)"), CorvusError::Runtime(_)));
    }
}
