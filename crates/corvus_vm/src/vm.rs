//! The stack machine: call frames, the dispatch loop, the collector trigger,
//! and the thin host-API surface builtins are written against (§4.4-§4.7).

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::chunk::Prototype;
use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::opcode::{self, CaptureKind, Op};
use crate::value::{ArrayRef, ClosureObj, MapRef, NativeFn, UpvalueCell, UpvalueState, Value};
use crate::valuemap::ValueMap;

/// Trigger the collector every this many allocations past the mark left by
/// the previous cycle (§4.6). Deliberately small so tests exercise it.
const GC_ALLOC_THRESHOLD: usize = 256;

const MAX_CALL_DEPTH: usize = 512;

struct CallFrame {
    proto: Rc<Prototype>,
    upvalues: Vec<UpvalueCell>,
    ip: usize,
    base: usize,
    /// Upvalue cells opened by closures created during this frame's
    /// execution, keyed by the absolute stack slot they alias. `Op::Cls`
    /// promotes the ones at or above its operand to heap storage.
    open_upvalues: Vec<(usize, UpvalueCell)>,
}

/// Runtime state: stack, call frames, globals, heap and collector
/// bookkeeping. This is the `State` handle native functions are given
/// (§4.7 "Host API surface").
pub struct State {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: ValueMap,
    heap: Heap,
    strays: crate::heap::Strays,
    allocs_since_gc: usize,
    pub max_stack: usize,
    stack_high_water: usize,
    /// Frames collected as a runtime error unwinds, innermost first
    /// (§6 "Error format"). Drained by the host via [`State::take_traceback`]
    /// once the error reaches it; built at the moment each frame's `Result`
    /// propagates out, not reconstructed afterward, since by then the frame
    /// bookkeeping it would need is already gone.
    traceback: Vec<String>,
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

impl State {
    pub fn new() -> Self {
        State {
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            globals: ValueMap::new(),
            heap: Heap::new(),
            strays: crate::heap::Strays::new(),
            allocs_since_gc: 0,
            max_stack: 64 * 1024,
            stack_high_water: 0,
            traceback: Vec::new(),
        }
    }

    // ---- Host API surface (§4.7) -----------------------------------

    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    /// Enforces `max_stack` and logs growth past the previous high-water
    /// mark. Called once per dispatched instruction rather than per `push`:
    /// no single instruction grows the stack by more than a handful of
    /// slots, so checking between instructions catches runaway recursion
    /// just as reliably as checking every push would.
    fn guard_stack(&mut self) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.max_stack {
            return Err(RuntimeError::StackOverflow { limit: self.max_stack });
        }
        if self.stack.len() > self.stack_high_water {
            self.stack_high_water = self.stack.len();
            if self.stack_high_water.is_power_of_two() {
                debug!("stack grew to {} slots", self.stack_high_water);
            }
        }
        Ok(())
    }

    /// Drains the traceback accumulated by the most recent unwind (§6).
    /// Empty if the last call succeeded or no error has been observed yet.
    pub fn take_traceback(&mut self) -> Vec<String> {
        std::mem::take(&mut self.traceback)
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    pub fn alloc_array(&mut self, values: Vec<Value>) -> ArrayRef {
        let idx = self.heap.alloc_array(values);
        self.note_alloc();
        ArrayRef(idx)
    }

    pub fn alloc_map(&mut self, map: ValueMap) -> MapRef {
        let idx = self.heap.alloc_map(map);
        self.note_alloc();
        MapRef(idx)
    }

    pub fn array(&self, r: ArrayRef) -> &Vec<Value> {
        self.heap.arrays.get(r.0)
    }

    pub fn array_mut(&mut self, r: ArrayRef) -> &mut Vec<Value> {
        self.heap.arrays.get_mut(r.0)
    }

    pub fn map(&self, r: MapRef) -> &ValueMap {
        self.heap.maps.get(r.0)
    }

    pub fn map_mut(&mut self, r: MapRef) -> &mut ValueMap {
        self.heap.maps.get_mut(r.0)
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.lookup(&Value::str(name)).cloned()
    }

    pub fn set_global(&mut self, name: &str, v: Value) {
        self.globals.insert(Value::str(name), v);
    }

    pub fn register_native(&mut self, name: &str, func: NativeFn) {
        let closure = Rc::new(ClosureObj::Host { name: Rc::from(name), func });
        self.set_global(name, Value::Closure(closure));
    }

    pub fn heap_object_count(&self) -> usize {
        self.heap.object_count()
    }

    pub fn stray_count(&self) -> usize {
        self.strays.len()
    }

    /// Typed arg check (§4.7): "this function takes N args".
    pub fn check_arity(&self, func: &str, args: &[Value], expected: usize) -> Result<(), RuntimeError> {
        if args.len() != expected {
            return Err(RuntimeError::ArityMismatch { func: func.to_string(), expected, got: args.len() });
        }
        Ok(())
    }

    /// Typed arg check (§4.7): "arg i must be type T", raising a runtime
    /// error on violation and otherwise returning the checked argument.
    pub fn check_arg<'a>(
        &self,
        func: &str,
        args: &'a [Value],
        index: usize,
        expected: &'static str,
        matches: impl Fn(&Value) -> bool,
    ) -> Result<&'a Value, RuntimeError> {
        let v = args.get(index).ok_or_else(|| RuntimeError::ArityMismatch {
            func: func.to_string(),
            expected: index + 1,
            got: args.len(),
        })?;
        if !matches(v) {
            return Err(RuntimeError::ArgumentType { func: func.to_string(), index, expected, got: v.type_name() });
        }
        Ok(v)
    }

    /// `error(msg)` (§4.7): raises a runtime error carrying `msg` verbatim.
    pub fn error(&self, msg: impl Into<String>) -> RuntimeError {
        RuntimeError::Custom(msg.into())
    }

    /// `errorf(fmt, ...)` (§4.7): same as `error`, for callers that already
    /// built the message with `format!`.
    pub fn errorf(&self, msg: std::fmt::Arguments<'_>) -> RuntimeError {
        RuntimeError::Custom(msg.to_string())
    }

    /// Renders a Value for `print`/`str`/tracebacks, recursing through heap
    /// containers (which `Value`'s own `Debug` can't do without a `Heap`).
    pub fn format_value(&self, v: &Value) -> String {
        match v {
            Value::Null => "null".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() { format!("{n:.1}") } else { n.to_string() }
            }
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Array(a) => {
                let items: Vec<String> = self.array(*a).iter().map(|v| self.format_value(v)).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Map(m) => {
                let items: Vec<String> =
                    self.map(*m).iter().map(|(k, v)| format!("{}: {}", self.format_value(k), self.format_value(v))).collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Closure(c) => format!("<fn {}>", c.name()),
        }
    }

    /// Calls whatever `Value::Closure` sits `nargs` below the top of the
    /// stack, consumes the callee and its arguments, and leaves exactly
    /// `nret` values behind. Used both by `Op::Call` and by native
    /// functions that call back into language closures.
    pub fn call(&mut self, nargs: usize, nret: usize) -> Result<(), RuntimeError> {
        if self.frames.is_empty() {
            self.traceback.clear();
        }
        if self.stack.len() < nargs + 1 {
            return Err(RuntimeError::StackUnderflow);
        }
        let fn_idx = self.stack.len() - nargs - 1;
        let callee = self.stack[fn_idx].clone();
        match callee {
            Value::Closure(c) => self.call_closure(c, fn_idx, nargs, nret),
            other => Err(RuntimeError::NotCallable { ty: other.type_name() }),
        }
    }

    fn call_closure(&mut self, closure: Rc<ClosureObj>, fn_idx: usize, nargs: usize, nret: usize) -> Result<(), RuntimeError> {
        match closure.as_ref() {
            ClosureObj::Host { func, name } => {
                let args: Vec<Value> = self.stack.split_off(fn_idx + 1);
                self.stack.truncate(fn_idx);
                let result = func(self, &args).map_err(|e| {
                    self.traceback.push(format!("-> in {name}"));
                    e
                })?;
                self.stack.push(result);
                self.pad_or_trim_returns(fn_idx, 1, nret);
                self.maybe_collect();
                Ok(())
            }
            ClosureObj::Lang { proto, upvalues } => {
                if proto.nparams as usize != nargs {
                    return Err(RuntimeError::ArityMismatch {
                        func: closure.name().to_string(),
                        expected: proto.nparams as usize,
                        got: nargs,
                    });
                }
                if self.frames.len() >= MAX_CALL_DEPTH {
                    return Err(RuntimeError::CallDepthExceeded { limit: MAX_CALL_DEPTH });
                }
                let base = fn_idx + 1;
                self.frames.push(CallFrame {
                    proto: proto.clone(),
                    upvalues: upvalues.clone(),
                    ip: 0,
                    base,
                    open_upvalues: Vec::new(),
                });
                let outcome = self.run_frame();
                if outcome.is_err() {
                    let frame = self.frames.last().unwrap();
                    let line = frame.proto.lines.get(frame.ip.saturating_sub(1)).copied().unwrap_or(0);
                    let name = frame.proto.name.as_deref().unwrap_or("<anonymous>").to_string();
                    self.traceback.push(format!("-> line {line}, in {name}"));
                }
                self.frames.pop();
                match outcome {
                    Ok(returned) => {
                        let n = returned.len();
                        self.stack.truncate(fn_idx);
                        self.stack.extend(returned);
                        self.pad_or_trim_returns(fn_idx, n, nret);
                        self.maybe_collect();
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn pad_or_trim_returns(&mut self, fn_idx: usize, produced: usize, wanted: usize) {
        match produced.cmp(&wanted) {
            std::cmp::Ordering::Greater => self.stack.truncate(fn_idx + wanted),
            std::cmp::Ordering::Less => {
                for _ in 0..(wanted - produced) {
                    self.stack.push(Value::Null);
                }
            }
            std::cmp::Ordering::Equal => {}
        }
    }

    fn note_alloc(&mut self) {
        self.allocs_since_gc += 1;
    }

    /// Runs a collection step if enough allocations have happened since the
    /// last one. Called after every top-level host call returns (§4.6).
    fn maybe_collect(&mut self) {
        if self.allocs_since_gc >= GC_ALLOC_THRESHOLD {
            self.collect_garbage();
        }
    }

    pub fn collect_garbage(&mut self) {
        let before = self.heap.object_count();
        debug!("gc cycle start: {before} live objects, {} strays", self.strays.len());
        let mut gray = Vec::new();
        for v in &self.stack {
            self.heap.mark_root(v, &mut gray);
        }
        for (k, v) in self.globals.iter() {
            self.heap.mark_root(k, &mut gray);
            self.heap.mark_root(v, &mut gray);
        }
        for frame in &self.frames {
            for cell in &frame.upvalues {
                if let UpvalueState::Closed(a) = &*cell.borrow() {
                    self.heap.mark_root(&Value::Array(*a), &mut gray);
                }
            }
        }
        self.heap.drain_gray(&mut gray);
        self.strays.sweep_and_mark(&mut self.heap, &mut gray);
        self.heap.drain_gray(&mut gray);
        self.heap.sweep();
        self.allocs_since_gc = 0;
        debug!("gc cycle end: {} live objects ({} collected)", self.heap.object_count(), before.saturating_sub(self.heap.object_count()));
    }

    // ---- Dispatch loop (§4.5) ---------------------------------------

    /// Executes the top frame until it returns, propagating any error with
    /// `?` up through the Rust call stack the recursive `call_closure`
    /// builds (§9 "exception handling reshaped around `Result`").
    fn run_frame(&mut self) -> Result<Vec<Value>, RuntimeError> {
        loop {
            let word = {
                let frame = self.frames.last().unwrap();
                if frame.ip >= frame.proto.code.len() {
                    return Ok(Vec::new());
                }
                frame.proto.code[frame.ip]
            };
            let raw_op = opcode::opcode(word);
            let op = Op::from_u8(raw_op).expect("corvus_vm: malformed opcode byte");
            self.frames.last_mut().unwrap().ip += 1;
            self.guard_stack()?;
            trace!("ip={} {:?} stack_depth={}", self.frames.last().unwrap().ip - 1, op, self.stack.len());

            match op {
                Op::Nop => {}
                Op::Pushsi => {
                    let e = opcode::decode_e_signed(word);
                    self.push(Value::Int(e as i64));
                }
                Op::Pushli => {
                    let i = opcode::decode_e(word) as usize;
                    let v = self.frames.last().unwrap().proto.ints[i];
                    self.push(Value::Int(v));
                }
                Op::Pushf => {
                    let i = opcode::decode_e(word) as usize;
                    let v = self.frames.last().unwrap().proto.floats[i];
                    self.push(Value::Float(v));
                }
                Op::Pushs => {
                    let i = opcode::decode_e(word) as usize;
                    let s = self.frames.last().unwrap().proto.strings[i].clone();
                    self.push(Value::str(s));
                }
                Op::Pushbool => {
                    let e = opcode::decode_e(word);
                    self.push(Value::Bool(e != 0));
                }
                Op::Pushnull => self.push(Value::Null),
                Op::Dup => {
                    let e = opcode::decode_e(word) as usize;
                    let base = self.frames.last().unwrap().base;
                    let v = self.stack[base + e].clone();
                    self.push(v);
                }
                Op::Pop => {
                    let e = opcode::decode_e(word) as usize;
                    let new_len = self.stack.len().saturating_sub(e);
                    self.stack.truncate(new_len);
                }
                Op::Cls => {
                    let e = opcode::decode_e(word) as usize;
                    let base = self.frames.last().unwrap().base;
                    self.close_upvalues_from(base + e);
                }
                Op::Getglobal => {
                    let i = opcode::decode_e(word) as usize;
                    let name = self.frames.last().unwrap().proto.strings[i].clone();
                    let v = self
                        .globals
                        .lookup(&Value::str(name.as_str()))
                        .cloned()
                        .ok_or(RuntimeError::UndefinedGlobal { name })?;
                    self.push(v);
                }
                Op::Setglobal => {
                    let i = opcode::decode_e(word) as usize;
                    let name = self.frames.last().unwrap().proto.strings[i].clone();
                    let v = self.pop()?;
                    self.globals.insert(Value::str(name), v);
                }
                Op::Getupval => {
                    let i = opcode::decode_e(word) as usize;
                    let cell = self.frames.last().unwrap().upvalues[i].clone();
                    let v = self.read_upvalue(&cell);
                    self.push(v);
                }
                Op::Setupval => {
                    let i = opcode::decode_e(word) as usize;
                    let cell = self.frames.last().unwrap().upvalues[i].clone();
                    let v = self.pop()?;
                    self.write_upvalue(&cell, v);
                }
                Op::Assign => {
                    let e = opcode::decode_e(word) as usize;
                    let base = self.frames.last().unwrap().base;
                    let v = self.pop()?;
                    self.stack[base + e] = v;
                }
                Op::Index => {
                    let index = self.pop()?;
                    let object = self.pop()?;
                    let v = self.index_get(&object, &index)?;
                    self.push(v);
                }
                Op::Set => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let object = self.pop()?;
                    self.index_set(&object, key, value)?;
                }
                Op::Newarr => {
                    let n = opcode::decode_e(word) as usize;
                    let start = self.stack.len() - n;
                    let values = self.stack.split_off(start);
                    let r = self.alloc_array(values);
                    self.push(Value::Array(r));
                }
                Op::Newmap => {
                    let n = opcode::decode_e(word) as usize;
                    let start = self.stack.len() - n * 2;
                    let flat = self.stack.split_off(start);
                    let mut map = ValueMap::new();
                    for pair in flat.chunks_exact(2) {
                        map.insert(pair[0].clone(), pair[1].clone());
                    }
                    let r = self.alloc_map(map);
                    self.push(Value::Map(r));
                }
                Op::Add => self.binary_arith("+", |a, b| a.wrapping_add(b), |a, b| a + b)?,
                Op::Sub => self.binary_arith("-", |a, b| a.wrapping_sub(b), |a, b| a - b)?,
                Op::Mul => self.binary_arith("*", |a, b| a.wrapping_mul(b), |a, b| a * b)?,
                Op::Div => self.binary_div()?,
                Op::Pow => self.binary_pow()?,
                Op::Eq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(values_eq(&a, &b)));
                }
                Op::Ne => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(!values_eq(&a, &b)));
                }
                Op::Lt => self.binary_cmp("<", |o| o == std::cmp::Ordering::Less)?,
                Op::Gt => self.binary_cmp(">", |o| o == std::cmp::Ordering::Greater)?,
                Op::Le => self.binary_cmp("<=", |o| o != std::cmp::Ordering::Greater)?,
                Op::Ge => self.binary_cmp(">=", |o| o != std::cmp::Ordering::Less)?,
                Op::Band => self.binary_int("&", |a, b| a & b)?,
                Op::Bor => self.binary_int("|", |a, b| a | b)?,
                Op::Bxor => self.binary_int("^", |a, b| a ^ b)?,
                Op::Blsh => self.binary_int("<<", |a, b| a.wrapping_shl(b as u32))?,
                Op::Brsh => self.binary_int(">>", |a, b| a.wrapping_shr(b as u32))?,
                Op::And => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a.is_truthy() && b.is_truthy()));
                }
                Op::Or => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a.is_truthy() || b.is_truthy()));
                }
                Op::Neg => {
                    let v = self.pop()?;
                    let r = match v {
                        Value::Int(n) => Value::Int(-n),
                        Value::Float(f) => Value::Float(-f),
                        other => return Err(RuntimeError::TypeError { op: "-", ty: other.type_name() }),
                    };
                    self.push(r);
                }
                Op::Not => {
                    let v = self.pop()?;
                    self.push(Value::Bool(!v.is_truthy()));
                }
                Op::Jmp => {
                    let dist = opcode::decode_e_signed(word) as i64;
                    let frame = self.frames.last_mut().unwrap();
                    frame.ip = (frame.ip as i64 + dist) as usize;
                }
                Op::Jmpback => {
                    let dist = opcode::decode_e_signed(word) as i64;
                    let frame = self.frames.last_mut().unwrap();
                    frame.ip = (frame.ip as i64 - dist) as usize;
                }
                Op::Jmpifnot => {
                    let dist = opcode::decode_e_signed(word) as i64;
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        let frame = self.frames.last_mut().unwrap();
                        frame.ip = (frame.ip as i64 + dist) as usize;
                    }
                }
                Op::Call => {
                    let (a, b, _c) = opcode::decode_abc(word);
                    self.call(a as usize, b as usize)?;
                }
                Op::Cl => {
                    let idx = opcode::decode_e(word) as usize;
                    let child = self.frames.last().unwrap().proto.children[idx].clone();
                    let n = child.nupvalues as usize;
                    let mut upvalues = Vec::with_capacity(n);
                    for _ in 0..n {
                        let cap_word = {
                            let frame = self.frames.last().unwrap();
                            frame.proto.code[frame.ip]
                        };
                        self.frames.last_mut().unwrap().ip += 1;
                        let (a, d) = opcode::decode_ad(cap_word);
                        let cell = match CaptureKind::from_u8(a) {
                            CaptureKind::Idx => {
                                let base = self.frames.last().unwrap().base;
                                self.open_upvalue(base + d as usize)
                            }
                            CaptureKind::Ref => self.frames.last().unwrap().upvalues[d as usize].clone(),
                        };
                        upvalues.push(cell);
                    }
                    let closure = Rc::new(ClosureObj::Lang { proto: child, upvalues: upvalues.clone() });
                    for cell in &upvalues {
                        self.strays.register_owner(cell, &closure);
                    }
                    self.push(Value::Closure(closure));
                }
                Op::Capture => {
                    unreachable!("corvus_vm: Capture words are consumed inline by Cl, never dispatched directly");
                }
                Op::Ret => {
                    let n = opcode::decode_e(word) as usize;
                    let base = self.frames.last().unwrap().base;
                    self.close_upvalues_from(base);
                    let start = self.stack.len() - n;
                    let values = self.stack.split_off(start);
                    return Ok(values);
                }
            }
        }
    }

    fn read_upvalue(&self, cell: &UpvalueCell) -> Value {
        let snapshot = cell.borrow().clone();
        match snapshot {
            UpvalueState::Open(idx) => self.stack[idx].clone(),
            UpvalueState::Closed(arr) => self.heap.arrays.get(arr.0)[0].clone(),
        }
    }

    fn write_upvalue(&mut self, cell: &UpvalueCell, v: Value) {
        let snapshot = cell.borrow().clone();
        match snapshot {
            UpvalueState::Open(idx) => self.stack[idx] = v,
            UpvalueState::Closed(arr) => self.heap.arrays.get_mut(arr.0)[0] = v,
        }
    }

    /// Returns the open upvalue cell aliasing absolute stack slot `idx`,
    /// creating and registering one on the current frame if none exists yet
    /// — so two sibling closures capturing the same local share one cell.
    fn open_upvalue(&mut self, idx: usize) -> UpvalueCell {
        let frame = self.frames.last_mut().unwrap();
        if let Some((_, cell)) = frame.open_upvalues.iter().find(|(i, _)| *i == idx) {
            return cell.clone();
        }
        let cell: UpvalueCell = Rc::new(RefCell::new(UpvalueState::Open(idx)));
        frame.open_upvalues.push((idx, cell.clone()));
        cell
    }

    /// Promotes every open upvalue whose slot is `>= floor` to heap
    /// storage (§4.5 "Return and escape"), for both `Op::Ret` (floor =
    /// frame base) and `Op::Cls` at block exit (floor = the block's
    /// first local going out of scope).
    fn close_upvalues_from(&mut self, floor: usize) {
        let frame = self.frames.last_mut().unwrap();
        let mut remaining = Vec::new();
        let mut to_close = Vec::new();
        for (idx, cell) in frame.open_upvalues.drain(..) {
            if idx >= floor {
                to_close.push((idx, cell));
            } else {
                remaining.push((idx, cell));
            }
        }
        frame.open_upvalues = remaining;
        for (idx, cell) in to_close {
            let value = self.stack[idx].clone();
            let array_idx = self.heap.alloc_array(vec![value]);
            self.note_alloc();
            self.strays.record_promotion(&cell, array_idx);
            *cell.borrow_mut() = UpvalueState::Closed(ArrayRef(array_idx));
        }
    }

    fn binary_arith(&mut self, op: &'static str, fi: fn(i64, i64) -> i64, ff: fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(fi(*x, *y)),
            (Value::Str(x), Value::Str(y)) if op == "+" => Value::str(format!("{x}{y}")),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => Value::Float(ff(x, y)),
                _ => return Err(RuntimeError::TypeMismatch { op, lhs: a.type_name(), rhs: b.type_name() }),
            },
        };
        self.push(r);
        Ok(())
    }

    fn binary_div(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = match (&a, &b) {
            (Value::Int(_), Value::Int(0)) => return Err(RuntimeError::DivisionByZero),
            (Value::Int(x), Value::Int(y)) => Value::Int(x / y),
            _ => match (a.as_float(), b.as_float()) {
                (Some(_), Some(y)) if y == 0.0 => return Err(RuntimeError::DivisionByZero),
                (Some(x), Some(y)) => Value::Float(x / y),
                _ => return Err(RuntimeError::TypeMismatch { op: "/", lhs: a.type_name(), rhs: b.type_name() }),
            },
        };
        self.push(r);
        Ok(())
    }

    fn binary_pow(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) if *y >= 0 => Value::Int(x.wrapping_pow(*y as u32)),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => Value::Float(x.powf(y)),
                _ => return Err(RuntimeError::TypeMismatch { op: "**", lhs: a.type_name(), rhs: b.type_name() }),
            },
        };
        self.push(r);
        Ok(())
    }

    fn binary_cmp(&mut self, op: &'static str, accept: fn(std::cmp::Ordering) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let ord = match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => x.as_ref().cmp(y.as_ref()),
            _ => match (a.as_float(), b.as_float()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).ok_or(RuntimeError::TypeMismatch { op, lhs: a.type_name(), rhs: b.type_name() })?,
                _ => return Err(RuntimeError::TypeMismatch { op, lhs: a.type_name(), rhs: b.type_name() }),
            },
        };
        self.push(Value::Bool(accept(ord)));
        Ok(())
    }

    fn binary_int(&mut self, op: &'static str, f: fn(i64, i64) -> i64) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => {
                self.push(Value::Int(f(*x, *y)));
                Ok(())
            }
            _ => Err(RuntimeError::TypeMismatch { op, lhs: a.type_name(), rhs: b.type_name() }),
        }
    }

    fn index_get(&mut self, object: &Value, index: &Value) -> Result<Value, RuntimeError> {
        match object {
            Value::Array(r) => {
                let arr = self.heap.arrays.get(r.0);
                let i = as_index(index)?;
                arr.get(i as usize).cloned().ok_or(RuntimeError::IndexOutOfBounds { index: i, len: arr.len() })
            }
            Value::Map(r) => Ok(self.heap.maps.get(r.0).lookup(index).cloned().unwrap_or(Value::Null)),
            Value::Str(s) => {
                let i = as_index(index)?;
                s.chars()
                    .nth(i as usize)
                    .map(|c| Value::str(c.to_string()))
                    .ok_or(RuntimeError::IndexOutOfBounds { index: i, len: s.chars().count() })
            }
            other => Err(RuntimeError::NotIndexable { ty: other.type_name() }),
        }
    }

    fn index_set(&mut self, object: &Value, key: Value, value: Value) -> Result<(), RuntimeError> {
        match object {
            Value::Array(r) => {
                let i = as_index(&key)?;
                let arr = self.heap.arrays.get_mut(r.0);
                let len = arr.len();
                let slot = arr.get_mut(i as usize).ok_or(RuntimeError::IndexOutOfBounds { index: i, len })?;
                *slot = value;
                Ok(())
            }
            Value::Map(r) => {
                self.heap.maps.get_mut(r.0).insert(key, value);
                Ok(())
            }
            other => Err(RuntimeError::NotIndexable { ty: other.type_name() }),
        }
    }
}

fn as_index(v: &Value) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(RuntimeError::ArgumentType { func: "index".into(), index: 0, expected: "Int", got: other.type_name() }),
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => a.as_float() == b.as_float(),
        _ => crate::valuemap::values_identical(a, b),
    }
}
