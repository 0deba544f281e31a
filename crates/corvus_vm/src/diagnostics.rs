//! Renders the `FILE:LINE:COL: message:` format shared by lex, parse and
//! compile errors (§6 "Error format"), plus the runtime traceback built
//! from [`State::take_traceback`](crate::vm::State::take_traceback).
//!
//! Out of scope per §1 beyond this interface: the CLI decides when to call
//! it and where the rendered text goes. No ANSI styling is applied here —
//! that's explicitly excluded too.

use corvus_lexer::Span;

use crate::error::{CorvusError, RuntimeError};

/// Renders `err` against `path`/`source`, appending `traceback` (innermost
/// frame first) when `err` is a [`RuntimeError`] — the only variant that
/// carries one, since lex/parse/compile errors already pin a `Span`.
pub fn render(path: &str, source: &str, err: &CorvusError, traceback: &[String]) -> String {
    match err {
        CorvusError::Lex(e) => render_span(path, source, e.span(), &e.to_string()),
        CorvusError::Parse(e) => render_span(path, source, e.span(), &e.to_string()),
        CorvusError::Compile(e) => render_span(path, source, e.span(), &e.to_string()),
        CorvusError::Runtime(e) => render_runtime(path, e, traceback),
    }
}

fn render_span(path: &str, source: &str, span: &Span, message: &str) -> String {
    let mut out = format!("{path}:{}:{}: {message}:", span.line, span.column);
    if let Some(line_text) = source.lines().nth(span.line.saturating_sub(1)) {
        let col = span.column.saturating_sub(1);
        let underline_len = span.end.saturating_sub(span.start).max(1);
        out.push('\n');
        out.push_str(line_text);
        out.push('\n');
        out.push_str(&" ".repeat(col));
        out.push_str(&"^".repeat(underline_len));
    }
    out
}

fn render_runtime(path: &str, err: &RuntimeError, traceback: &[String]) -> String {
    let mut out = format!("{path}: {err}:");
    for frame in traceback {
        out.push('\n');
        out.push_str(frame);
    }
    out
}
