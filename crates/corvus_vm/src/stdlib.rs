//! The concrete built-in set (§4.7 "Built-in registration"). Out of scope
//! per §1 beyond its interface — each entry is a `NativeFn` registered
//! under its name via `State::register_native`, validated with the
//! typed-arg-check facility before it acts.

use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::State;

pub fn register_builtins(state: &mut State) {
    state.register_native("print", print);
    state.register_native("println", println_);
    state.register_native("input", input);
    state.register_native("len", len);
    state.register_native("str", str_);
    state.register_native("int", int);
    state.register_native("float", float);
    state.register_native("bool", bool_);
    state.register_native("typeof", typeof_);
    state.register_native("abs", abs);
    state.register_native("min", min);
    state.register_native("max", max);
    state.register_native("range", range);
    state.register_native("push", push);
    state.register_native("pop", pop);
    state.register_native("assert", assert_);
}

fn print(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    use std::io::Write;
    let text: Vec<String> = args.iter().map(|v| state.format_value(v)).collect();
    print!("{}", text.join(" "));
    std::io::stdout().flush().ok();
    Ok(Value::Null)
}

fn println_(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    let text: Vec<String> = args.iter().map(|v| state.format_value(v)).collect();
    println!("{}", text.join(" "));
    Ok(Value::Null)
}

fn input(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    use std::io::{self, Write};
    if let Some(prompt) = args.first() {
        print!("{}", state.format_value(prompt));
        io::stdout().flush().ok();
    }
    let mut line = String::new();
    io::stdin().read_line(&mut line).map_err(|e| state.error(e.to_string()))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Value::str(line))
}

fn len(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("len", args, 1)?;
    match &args[0] {
        Value::Array(a) => Ok(Value::Int(state.array(*a).len() as i64)),
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::Map(m) => Ok(Value::Int(state.map(*m).len() as i64)),
        other => Err(RuntimeError::ArgumentType {
            func: "len".into(),
            index: 0,
            expected: "Array, Str, or Map",
            got: other.type_name(),
        }),
    }
}

fn str_(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("str", args, 1)?;
    Ok(Value::str(state.format_value(&args[0])))
}

fn int(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("int", args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(f) => Ok(Value::Int(*f as i64)),
        Value::Bool(b) => Ok(Value::Int(*b as i64)),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RuntimeError::NumericConversion { raw: s.to_string() }),
        other => Err(RuntimeError::ArgumentType { func: "int".into(), index: 0, expected: "Int, Float, Bool, or Str", got: other.type_name() }),
    }
}

fn float(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("float", args, 1)?;
    match &args[0] {
        Value::Float(f) => Ok(Value::Float(*f)),
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| RuntimeError::NumericConversion { raw: s.to_string() }),
        other => {
            Err(RuntimeError::ArgumentType { func: "float".into(), index: 0, expected: "Int, Float, Bool, or Str", got: other.type_name() })
        }
    }
}

fn bool_(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("bool", args, 1)?;
    Ok(Value::Bool(args[0].is_truthy()))
}

fn typeof_(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("typeof", args, 1)?;
    Ok(Value::str(args[0].type_name()))
}

fn abs(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("abs", args, 1)?;
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(n.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(RuntimeError::ArgumentType { func: "abs".into(), index: 0, expected: "Int or Float", got: other.type_name() }),
    }
}

fn numeric_cmp_source<'a>(state: &'a State, func: &str, args: &'a [Value]) -> Result<Vec<Value>, RuntimeError> {
    if args.len() == 1 {
        if let Value::Array(a) = &args[0] {
            let items = state.array(*a).clone();
            if items.is_empty() {
                return Err(state.error(format!("{func}() of empty array")));
            }
            return Ok(items);
        }
    }
    if args.is_empty() {
        return Err(RuntimeError::ArityMismatch { func: func.to_string(), expected: 1, got: 0 });
    }
    Ok(args.to_vec())
}

fn as_numeric(func: &str, index: usize, v: &Value) -> Result<f64, RuntimeError> {
    v.as_float().ok_or_else(|| RuntimeError::ArgumentType { func: func.to_string(), index, expected: "Int or Float", got: v.type_name() })
}

fn min(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = numeric_cmp_source(state, "min", args)?;
    let mut best = items[0].clone();
    let mut best_n = as_numeric("min", 0, &best)?;
    for (i, v) in items.iter().enumerate().skip(1) {
        let n = as_numeric("min", i, v)?;
        if n < best_n {
            best_n = n;
            best = v.clone();
        }
    }
    Ok(best)
}

fn max(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    let items = numeric_cmp_source(state, "max", args)?;
    let mut best = items[0].clone();
    let mut best_n = as_numeric("max", 0, &best)?;
    for (i, v) in items.iter().enumerate().skip(1) {
        let n = as_numeric("max", i, v)?;
        if n > best_n {
            best_n = n;
            best = v.clone();
        }
    }
    Ok(best)
}

fn range(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    let (start, end, step) = match args {
        [Value::Int(e)] => (0, *e, 1),
        [Value::Int(s), Value::Int(e)] => (*s, *e, 1),
        [Value::Int(s), Value::Int(e), Value::Int(st)] => (*s, *e, *st),
        _ => return Err(state.error("range() expects 1-3 Int arguments")),
    };
    if step == 0 {
        return Err(state.error("range() step cannot be zero"));
    }
    let mut v = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        v.push(Value::Int(i));
        i += step;
    }
    Ok(Value::Array(state.alloc_array(v)))
}

fn push(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("push", args, 2)?;
    let arr = state.check_arg("push", args, 0, "Array", |v| matches!(v, Value::Array(_)))?.clone();
    let Value::Array(a) = arr else { unreachable!() };
    let val = args[1].clone();
    state.array_mut(a).push(val);
    Ok(Value::Null)
}

fn pop(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    state.check_arity("pop", args, 1)?;
    let arr = state.check_arg("pop", args, 0, "Array", |v| matches!(v, Value::Array(_)))?.clone();
    let Value::Array(a) = arr else { unreachable!() };
    state.array_mut(a).pop().ok_or_else(|| state.error("pop() on empty array"))
}

fn assert_(state: &mut State, args: &[Value]) -> Result<Value, RuntimeError> {
    if args.is_empty() {
        return Err(RuntimeError::ArityMismatch { func: "assert".into(), expected: 1, got: 0 });
    }
    if args[0].is_truthy() {
        return Ok(Value::Null);
    }
    let msg = args.get(1).map(|m| state.format_value(m)).unwrap_or_else(|| "assertion failed".to_string());
    Err(state.error(msg))
}
