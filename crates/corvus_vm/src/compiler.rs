//! Single-pass compiler: walks the AST once, emitting bytecode directly
//! into a stack of `Builder`s (one per nested function), with no separate
//! resolution or lowering pass (§4.2).

use corvus_lexer::Span;
use corvus_parser::ast::*;

use crate::chunk::{Builder, Prototype};
use crate::error::CompileError;
use crate::opcode::{CaptureKind, Op};

const POOL_LIMIT: u32 = 0x00FF_FFFF;
const SMALL_INT_MIN: i64 = -(1 << 23);
const SMALL_INT_MAX: i64 = (1 << 23) - 1;

struct LocalVar {
    name: String,
    slot: u16,
    is_const: bool,
}

struct UpvalDesc {
    kind: CaptureKind,
    index: u16,
}

/// One nested function's compilation state: its code builder, the locals
/// currently in scope (by absolute frame-relative slot), and the capture
/// descriptors that will become this function's own upvalue list.
struct FnFrame {
    builder: Builder,
    locals: Vec<LocalVar>,
    /// Stack of `locals.len()` snapshots, one per open block, so a block
    /// exit can tell which locals it owns.
    block_starts: Vec<usize>,
    top: u16,
    upvalue_descs: Vec<UpvalDesc>,
    upvalue_names: Vec<String>,
}

impl FnFrame {
    fn new() -> Self {
        FnFrame {
            builder: Builder::new(),
            locals: Vec::new(),
            block_starts: Vec::new(),
            top: 0,
            upvalue_descs: Vec::new(),
            upvalue_names: Vec::new(),
        }
    }
}

pub struct Compiler {
    frames: Vec<FnFrame>,
}

/// Compiles a whole program into its root prototype. Mirrors a script's
/// REPL-like convention: the last top-level statement, if it is a bare
/// expression, is the script's result rather than a discarded value (§8
/// scenario 1 prints `7` for `1 + 2 * 3`, with nothing explicitly printing
/// it) — everything before it runs purely for effect, same as any other
/// block used in expression position.
pub fn compile(program: &Program) -> Result<Prototype, CompileError> {
    let mut c = Compiler { frames: vec![FnFrame::new()] };
    if let Some((last, rest)) = program.stmts.split_last() {
        c.compile_stmts_inline(rest)?;
        match &last.inner {
            StmtKind::Expr(e) => {
                c.compile_expr(e)?;
                c.emit(Op::Ret, 1, last.span.line as u32);
            }
            _ => {
                c.compile_stmt(last)?;
                c.emit(Op::Ret, 0, 0);
            }
        }
    } else {
        c.emit(Op::Ret, 0, 0);
    }
    let frame = c.frames.pop().unwrap();
    let nupvalues = frame.upvalue_descs.len() as u8;
    Ok(frame.builder.finish(Some("<script>".to_string()), 0, nupvalues))
}

impl Compiler {
    fn cur(&mut self) -> &mut FnFrame {
        self.frames.last_mut().unwrap()
    }

    fn emit(&mut self, op: Op, e: u32, line: u32) -> usize {
        self.cur().builder.emit_e(op, e, line)
    }

    fn add_string(&mut self, s: &str, span: &Span) -> Result<u32, CompileError> {
        let idx = self.cur().builder.add_string(s);
        if idx > POOL_LIMIT {
            return Err(CompileError::PoolOverflow { what: "strings".into(), count: idx as usize, span: span.clone() });
        }
        Ok(idx)
    }

    fn add_child(&mut self, proto: Prototype, span: &Span) -> Result<u32, CompileError> {
        let idx = self.cur().builder.add_child(proto);
        if idx > POOL_LIMIT {
            return Err(CompileError::PoolOverflow { what: "child prototypes".into(), count: idx as usize, span: span.clone() });
        }
        Ok(idx)
    }

    fn bump(&mut self, n: i32) {
        let f = self.cur();
        f.top = (f.top as i32 + n) as u16;
    }

    fn declare_local(&mut self, name: &str, is_const: bool) {
        let slot = self.cur().top - 1;
        self.cur().locals.push(LocalVar { name: name.to_string(), slot, is_const });
    }

    // ---- scope resolution (§4.2) -------------------------------------

    /// Resolves `name` against the locals of the *current* frame only.
    fn resolve_local(&self, frame_idx: usize, name: &str) -> Option<(u16, bool)> {
        self.frames[frame_idx].locals.iter().rev().find(|l| l.name == name).map(|l| (l.slot, l.is_const))
    }

    /// Classic upvalue-resolution recursion (§4.2): an IDX capture at the
    /// immediately enclosing frame, a chain of REF captures at every frame
    /// further out, one new descriptor per frame the name threads through.
    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u16> {
        if frame_idx == 0 {
            return None;
        }
        if let Some(pos) = self.frames[frame_idx].upvalue_names.iter().position(|n| n == name) {
            return Some(pos as u16);
        }
        if let Some((slot, _)) = self.resolve_local(frame_idx - 1, name) {
            let new_idx = self.frames[frame_idx].upvalue_descs.len() as u16;
            self.frames[frame_idx].upvalue_descs.push(UpvalDesc { kind: CaptureKind::Idx, index: slot });
            self.frames[frame_idx].upvalue_names.push(name.to_string());
            return Some(new_idx);
        }
        if let Some(parent_idx) = self.resolve_upvalue(frame_idx - 1, name) {
            let new_idx = self.frames[frame_idx].upvalue_descs.len() as u16;
            self.frames[frame_idx].upvalue_descs.push(UpvalDesc { kind: CaptureKind::Ref, index: parent_idx });
            self.frames[frame_idx].upvalue_names.push(name.to_string());
            return Some(new_idx);
        }
        None
    }

    // ---- statements ----------------------------------------------------

    fn compile_stmts_inline(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for s in stmts {
            self.compile_stmt(s)?;
        }
        Ok(())
    }

    /// Compiles a nested block: new scope, statements executed purely for
    /// effect (no value survives), scope torn down on exit.
    fn compile_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        let start = self.cur().locals.len();
        let start_slot = self.cur().top;
        self.cur().block_starts.push(start);
        self.compile_stmts_inline(stmts)?;
        self.end_block_stmt(start, start_slot, 0);
        Ok(())
    }

    fn end_block_stmt(&mut self, locals_start: usize, start_slot: u16, line: u32) {
        self.cur().block_starts.pop();
        let declared = self.cur().locals.len() - locals_start;
        self.cur().locals.truncate(locals_start);
        if declared > 0 {
            self.emit(Op::Cls, start_slot as u32, line);
            self.emit(Op::Pop, declared as u32, line);
            self.bump(-(declared as i32));
        }
    }

    /// Compiles a block used in expression position (`if`/`else` bodies):
    /// the last `Expr` statement's value survives; everything else is
    /// stack-neutral. See the module-level note on the "shift result down,
    /// pop the rest" trick this uses to preserve the tail value through
    /// scope teardown.
    fn compile_block_value(&mut self, stmts: &[Stmt], line: u32) -> Result<(), CompileError> {
        let start = self.cur().locals.len();
        let start_slot = self.cur().top;
        self.cur().block_starts.push(start);

        if let Some((last, rest)) = stmts.split_last() {
            self.compile_stmts_inline(rest)?;
            match &last.inner {
                StmtKind::Expr(e) => self.compile_expr(e)?,
                _ => {
                    self.compile_stmt(last)?;
                    self.emit(Op::Pushnull, 0, line);
                    self.bump(1);
                }
            }
        } else {
            self.emit(Op::Pushnull, 0, line);
            self.bump(1);
        }

        self.cur().block_starts.pop();
        let declared = self.cur().locals.len() - start;
        self.cur().locals.truncate(start);
        if declared > 0 {
            self.emit(Op::Cls, start_slot as u32, line);
            self.emit(Op::Assign, start_slot as u32, line);
            self.bump(-1);
            if declared > 1 {
                self.emit(Op::Pop, (declared - 1) as u32, line);
                self.bump(-((declared - 1) as i32));
            }
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        let line = stmt.span.line as u32;
        match &stmt.inner {
            StmtKind::VarDecl { kind, name, init, .. } => self.compile_var_decl(kind.clone(), name, init, &stmt.span, line),
            StmtKind::Assign { target, value } => self.compile_assign(target, value, line),
            StmtKind::While { condition, body } => self.compile_while(condition, body, line),
            StmtKind::Return(e) => {
                match e {
                    Some(expr) => {
                        self.compile_expr(expr)?;
                        self.emit(Op::Ret, 1, line);
                    }
                    None => {
                        self.emit(Op::Ret, 0, line);
                    }
                }
                Ok(())
            }
            StmtKind::Include(_) => Ok(()),
            StmtKind::FnDecl(decl) => self.compile_named_fn_decl(decl, line),
            StmtKind::ClassDecl { name, fields, methods } => self.compile_class(name, fields, methods, line),
            StmtKind::Expr(e) => {
                self.compile_expr(e)?;
                self.emit(Op::Pop, 1, line);
                self.bump(-1);
                Ok(())
            }
            StmtKind::Error => Ok(()),
        }
    }

    fn compile_var_decl(&mut self, kind: DeclKind, name: &str, init: &Option<Expr>, span: &Span, line: u32) -> Result<(), CompileError> {
        let start = *self.cur().block_starts.last().unwrap_or(&0);
        if self.frames.last().unwrap().locals[start..].iter().any(|l| l.name == name) {
            return Err(CompileError::Redeclared { name: name.to_string(), span: span.clone() });
        }

        if kind == DeclKind::Ref {
            let source_local = match init.as_ref().map(|e| &e.inner) {
                Some(ExprKind::Ident(src)) => self.resolve_local(self.frames.len() - 1, src),
                _ => None,
            };
            return match source_local {
                Some((slot, _)) => {
                    self.cur().locals.push(LocalVar { name: name.to_string(), slot, is_const: false });
                    Ok(())
                }
                None => Err(CompileError::UnresolvedIdentifier { name: name.to_string(), span: span.clone() }),
            };
        }

        match init {
            Some(e) => self.compile_expr(e)?,
            None => {
                self.emit(Op::Pushnull, 0, line);
                self.bump(1);
            }
        }
        self.declare_local(name, kind == DeclKind::Const);
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr, line: u32) -> Result<(), CompileError> {
        match &target.inner {
            ExprKind::Ident(name) => {
                let frame_idx = self.frames.len() - 1;
                if let Some((slot, is_const)) = self.resolve_local(frame_idx, name) {
                    if is_const {
                        return Err(CompileError::AssignToConst { name: name.clone(), span: target.span.clone() });
                    }
                    self.compile_expr(value)?;
                    self.emit(Op::Assign, slot as u32, line);
                    self.bump(-1);
                    return Ok(());
                }
                if let Some(idx) = self.resolve_upvalue(frame_idx, name) {
                    self.compile_expr(value)?;
                    self.emit(Op::Setupval, idx as u32, line);
                    self.bump(-1);
                    return Ok(());
                }
                let si = self.add_string(name, &target.span)?;
                self.compile_expr(value)?;
                self.emit(Op::Setglobal, si, line);
                self.bump(-1);
                Ok(())
            }
            ExprKind::Field { object, field } => {
                self.compile_expr(object)?;
                let si = self.add_string(field, &target.span)?;
                self.emit(Op::Pushs, si, line);
                self.bump(1);
                self.compile_expr(value)?;
                self.emit(Op::Set, 0, line);
                self.bump(-3);
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                self.emit(Op::Set, 0, line);
                self.bump(-3);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn compile_while(&mut self, condition: &Expr, body: &[Stmt], line: u32) -> Result<(), CompileError> {
        let loop_start = self.cur().builder.here();
        self.compile_expr(condition)?;
        let exit_patch = self.cur().builder.emit_jump_placeholder(line);
        self.bump(-1);
        self.compile_block(body)?;
        self.cur().builder.emit_jump_back(Op::Jmpback, loop_start, line);
        self.cur().builder.patch_jump(exit_patch, Op::Jmpifnot);
        Ok(())
    }

    fn compile_named_fn_decl(&mut self, decl: &FnDecl, line: u32) -> Result<(), CompileError> {
        let name = decl.name.clone().unwrap_or_default();
        let start = *self.cur().block_starts.last().unwrap_or(&0);
        if self.frames.last().unwrap().locals[start..].iter().any(|l| l.name == name) {
            return Err(CompileError::Redeclared { name, span: decl.span.clone() });
        }
        // Reserve the slot before compiling the body so a recursive call
        // inside the function resolves to this binding as an upvalue.
        self.emit(Op::Pushnull, 0, line);
        self.bump(1);
        self.declare_local(&name, true);
        let reserved_slot = self.cur().locals.last().unwrap().slot;

        self.compile_fn_literal(decl, line)?;
        self.emit(Op::Assign, reserved_slot as u32, line);
        self.bump(-1);
        Ok(())
    }

    fn compile_class(&mut self, name: &str, fields: &[FieldDecl], methods: &[FnDecl], line: u32) -> Result<(), CompileError> {
        self.frames.push(FnFrame::new());
        self.emit(Op::Newmap, 0, line);
        self.bump(1);
        self.declare_local("self", false);
        let self_slot = self.cur().locals.last().unwrap().slot;

        for f in fields {
            self.emit(Op::Dup, self_slot as u32, line);
            self.bump(1);
            let si = self.add_string(&f.name, &decl_span(&f.default))?;
            self.emit(Op::Pushs, si, line);
            self.bump(1);
            match &f.default {
                Some(e) => self.compile_expr(e)?,
                None => {
                    self.emit(Op::Pushnull, 0, line);
                    self.bump(1);
                }
            }
            self.emit(Op::Set, 0, line);
            self.bump(-3);
        }

        for m in methods {
            self.emit(Op::Dup, self_slot as u32, line);
            self.bump(1);
            let si = self.add_string(m.name.as_deref().unwrap_or(""), &m.span)?;
            self.emit(Op::Pushs, si, line);
            self.bump(1);
            self.compile_fn_literal(m, line)?;
            self.emit(Op::Set, 0, line);
            self.bump(-3);
        }

        self.emit(Op::Dup, self_slot as u32, line);
        self.bump(1);
        self.emit(Op::Ret, 1, line);

        let frame = self.frames.pop().unwrap();
        let nupvalues = frame.upvalue_descs.len() as u8;
        let ctor_name = format!("{name}.new");
        let proto = frame.builder.finish(Some(ctor_name), 0, nupvalues);
        let child_idx = self.add_child(proto, &dummy_span())?;
        self.emit(Op::Cl, child_idx, line);
        self.bump(1);
        for desc in &frame.upvalue_descs {
            self.cur().builder.emit_ad(Op::Capture, desc.kind as u8, desc.index, line);
        }

        let start = *self.cur().block_starts.last().unwrap_or(&0);
        if self.frames.last().unwrap().locals[start..].iter().any(|l| l.name == name) {
            return Err(CompileError::Redeclared { name: name.to_string(), span: dummy_span() });
        }
        self.declare_local(name, true);
        Ok(())
    }

    fn compile_fn_literal(&mut self, decl: &FnDecl, line: u32) -> Result<(), CompileError> {
        self.frames.push(FnFrame::new());
        // Op::Call leaves the nargs arguments already sitting at the new
        // frame's base..base+nparams when the callee starts running, so
        // params need slots and names bound to them, not any bytecode.
        for (i, p) in decl.params.iter().enumerate() {
            self.cur().top = i as u16 + 1;
            self.declare_local(&p.name, false);
        }

        self.compile_stmts_inline(&decl.body)?;
        self.ensure_trailing_return(line);

        let frame = self.frames.pop().unwrap();
        let nupvalues = frame.upvalue_descs.len() as u8;
        let proto = frame.builder.finish(decl.name.clone(), decl.params.len() as u8, nupvalues);
        let child_idx = self.add_child(proto, &decl.span)?;
        self.emit(Op::Cl, child_idx, line);
        self.bump(1);
        for desc in &frame.upvalue_descs {
            self.cur().builder.emit_ad(Op::Capture, desc.kind as u8, desc.index, line);
        }
        Ok(())
    }

    fn ensure_trailing_return(&mut self, line: u32) {
        let already_returns = self
            .cur()
            .builder
            .code
            .last()
            .map(|&w| crate::opcode::opcode(w) == Op::Ret as u8)
            .unwrap_or(false);
        if !already_returns {
            self.emit(Op::Ret, 0, line);
        }
    }

    // ---- expressions -----------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let line = expr.span.line as u32;
        match &expr.inner {
            ExprKind::Int(n) => self.compile_int(*n, line),
            ExprKind::Float(f) => {
                let idx = self.cur().builder.add_float(*f);
                self.emit(Op::Pushf, idx, line);
                self.bump(1);
            }
            ExprKind::Bool(b) => {
                self.emit(Op::Pushbool, *b as u32, line);
                self.bump(1);
            }
            ExprKind::Str(s) => {
                let idx = self.add_string(s, &expr.span)?;
                self.emit(Op::Pushs, idx, line);
                self.bump(1);
            }
            ExprKind::Null => {
                self.emit(Op::Pushnull, 0, line);
                self.bump(1);
            }
            ExprKind::Ident(name) => self.compile_ident_read(name, line),
            ExprKind::Array(items) => {
                for it in items {
                    self.compile_expr(it)?;
                }
                self.emit(Op::Newarr, items.len() as u32, line);
                self.bump(-(items.len() as i32) + 1);
            }
            ExprKind::Map(pairs) => {
                for (k, v) in pairs {
                    self.compile_expr(k)?;
                    self.compile_expr(v)?;
                }
                self.emit(Op::Newmap, pairs.len() as u32, line);
                self.bump(-(2 * pairs.len() as i32) + 1);
            }
            ExprKind::Unary { op, operand } => {
                self.compile_expr(operand)?;
                let opc = match op {
                    UnaryOp::Neg => Op::Neg,
                    UnaryOp::Not => Op::Not,
                };
                self.emit(opc, 0, line);
            }
            ExprKind::Binary { op, left, right } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binop_to_op(op), 0, line);
                self.bump(-1);
            }
            ExprKind::Call { callee, args } => {
                self.compile_expr(callee)?;
                for a in args {
                    self.compile_expr(a)?;
                }
                self.cur().builder.emit_abc(Op::Call, args.len() as u8, 1, 0, line);
                self.bump(-(args.len() as i32));
            }
            ExprKind::Field { object, field } => {
                self.compile_expr(object)?;
                let idx = self.add_string(field, &expr.span)?;
                self.emit(Op::Pushs, idx, line);
                self.bump(1);
                self.emit(Op::Index, 0, line);
                self.bump(-1);
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(Op::Index, 0, line);
                self.bump(-1);
            }
            ExprKind::Fn(decl) => self.compile_fn_literal(decl, line)?,
            ExprKind::If { condition, then_branch, else_branch } => {
                self.compile_expr(condition)?;
                let else_patch = self.cur().builder.emit_jump_placeholder(line);
                self.bump(-1);
                // Both arms are alternatives, not sequential code: each pushes
                // exactly one value onto the *same* starting depth, so the
                // compiler's static top must be rewound between them even
                // though only one arm's bytecode actually runs per call.
                let top_before_branches = self.cur().top;
                self.compile_block_value(then_branch, line)?;
                let end_patch = self.cur().builder.emit_jump_placeholder(line);
                self.cur().builder.patch_jump(else_patch, Op::Jmpifnot);
                self.cur().top = top_before_branches;
                match else_branch {
                    Some(stmts) => self.compile_block_value(stmts, line)?,
                    None => {
                        self.emit(Op::Pushnull, 0, line);
                        self.bump(1);
                    }
                }
                self.cur().builder.patch_jump(end_patch, Op::Jmp);
            }
            ExprKind::Error => {
                self.emit(Op::Pushnull, 0, line);
                self.bump(1);
            }
        }
        Ok(())
    }

    fn compile_int(&mut self, n: i64, line: u32) {
        if (SMALL_INT_MIN..=SMALL_INT_MAX).contains(&n) {
            let word = crate::opcode::encode_e_signed(Op::Pushsi, n as i32);
            self.cur().builder.emit(word, line);
        } else {
            let idx = self.cur().builder.add_int(n);
            self.emit(Op::Pushli, idx, line);
        }
        self.bump(1);
    }

    fn compile_ident_read(&mut self, name: &str, line: u32) {
        let frame_idx = self.frames.len() - 1;
        if let Some((slot, _)) = self.resolve_local(frame_idx, name) {
            self.emit(Op::Dup, slot as u32, line);
            self.bump(1);
            return;
        }
        if let Some(idx) = self.resolve_upvalue(frame_idx, name) {
            self.emit(Op::Getupval, idx as u32, line);
            self.bump(1);
            return;
        }
        // Falls through to a dynamic global lookup (RuntimeError::UndefinedGlobal
        // if nothing defines it by the time this runs) — the surface language
        // does not require globals to be declared before use.
        let idx = self.cur().builder.add_string(name);
        self.emit(Op::Getglobal, idx, line);
        self.bump(1);
    }
}

fn binop_to_op(op: &BinOp) -> Op {
    match op {
        BinOp::Add => Op::Add,
        BinOp::Sub => Op::Sub,
        BinOp::Mul => Op::Mul,
        BinOp::Div => Op::Div,
        BinOp::Pow => Op::Pow,
        BinOp::Eq => Op::Eq,
        BinOp::Ne => Op::Ne,
        BinOp::Lt => Op::Lt,
        BinOp::Le => Op::Le,
        BinOp::Gt => Op::Gt,
        BinOp::Ge => Op::Ge,
        BinOp::And => Op::And,
        BinOp::Or => Op::Or,
        BinOp::BitAnd => Op::Band,
        BinOp::BitOr => Op::Bor,
        BinOp::BitXor => Op::Bxor,
        BinOp::Shl => Op::Blsh,
        BinOp::Shr => Op::Brsh,
    }
}

fn dummy_span() -> Span {
    Span::new(0, 0, 0, 0)
}

fn decl_span(e: &Option<Expr>) -> Span {
    e.as_ref().map(|e| e.span.clone()).unwrap_or_else(dummy_span)
}
