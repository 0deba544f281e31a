pub mod ast;
pub mod error;
pub mod parser;

pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use parser::Parser;

use corvus_lexer::tokenize as lex;

pub fn parse(source: &str) -> (Program, Vec<corvus_lexer::LexError>, Vec<ParseError>) {
    let (tokens, lex_errors) = lex(source);
    let mut parser = Parser::new(tokens);
    let program = parser.parse();
    (program, lex_errors, parser.errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let (program, lex_errors, parse_errors) = parse(src);
        assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
        assert!(parse_errors.is_empty(), "parse errors: {:?}", parse_errors);
        program
    }

    #[test]
    fn test_var_decl() {
        let p = parse_ok("var x = 1;");
        assert_eq!(p.stmts.len(), 1);
        match &p.stmts[0].inner {
            StmtKind::VarDecl { kind, name, init, .. } => {
                assert_eq!(*kind, DeclKind::Var);
                assert_eq!(name, "x");
                assert_eq!(init.as_ref().unwrap().inner, ExprKind::Int(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_const_and_ref_decl() {
        let p = parse_ok("const a = 1; ref b = a;");
        match &p.stmts[0].inner {
            StmtKind::VarDecl { kind, .. } => assert_eq!(*kind, DeclKind::Const),
            other => panic!("unexpected: {:?}", other),
        }
        match &p.stmts[1].inner {
            StmtKind::VarDecl { kind, .. } => assert_eq!(*kind, DeclKind::Ref),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_typed_var_decl() {
        let p = parse_ok("var x: int = 1;");
        match &p.stmts[0].inner {
            StmtKind::VarDecl { ty, .. } => {
                assert_eq!(ty.as_ref().unwrap().inner, TypeKind::Named("int".to_string()));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_assignment() {
        let p = parse_ok("x = 1;");
        match &p.stmts[0].inner {
            StmtKind::Assign { target, value } => {
                assert_eq!(target.inner, ExprKind::Ident("x".to_string()));
                assert_eq!(value.inner, ExprKind::Int(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_while_loop() {
        let p = parse_ok("while (x < 5) { x = x + 1 }");
        match &p.stmts[0].inner {
            StmtKind::While { body, .. } => assert_eq!(body.len(), 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fn_decl() {
        let p = parse_ok("fn add(a, b) { return a + b }");
        match &p.stmts[0].inner {
            StmtKind::FnDecl(decl) => {
                assert_eq!(decl.name.as_deref(), Some("add"));
                assert_eq!(decl.params.len(), 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_fn_with_ref_param() {
        let p = parse_ok("fn bump(ref n) { n = n + 1 }");
        match &p.stmts[0].inner {
            StmtKind::FnDecl(decl) => assert!(decl.params[0].by_ref),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_class_decl() {
        let p = parse_ok("class Point { x = 0; y = 0; fn sum() { return x + y } }");
        match &p.stmts[0].inner {
            StmtKind::ClassDecl { name, fields, methods } => {
                assert_eq!(name, "Point");
                assert_eq!(fields.len(), 2);
                assert_eq!(methods.len(), 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_include() {
        let p = parse_ok(r#"include "util.cv";"#);
        match &p.stmts[0].inner {
            StmtKind::Include(path) => assert_eq!(path, "util.cv"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_if_is_expression() {
        let p = parse_ok(r#"if (1 == 1) { "y" } else { "n" }"#);
        match &p.stmts[0].inner {
            StmtKind::Expr(e) => assert!(matches!(e.inner, ExprKind::If { .. })),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_if_else_if_chain() {
        let p = parse_ok("if (a) { 1 } else if (b) { 2 } else { 3 }");
        match &p.stmts[0].inner {
            StmtKind::Expr(e) => match &e.inner {
                ExprKind::If { else_branch, .. } => {
                    let branch = else_branch.as_ref().unwrap();
                    assert_eq!(branch.len(), 1);
                    assert!(matches!(branch[0].inner, StmtKind::Expr(_)));
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_array_literal() {
        let p = parse_ok("var a = {1, 2, 3};");
        match &p.stmts[0].inner {
            StmtKind::VarDecl { init, .. } => match &init.as_ref().unwrap().inner {
                ExprKind::Array(items) => {
                    assert_eq!(items.len(), 3);
                    assert_eq!(items[0].inner, ExprKind::Int(1));
                    assert_eq!(items[2].inner, ExprKind::Int(3));
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_empty_brace_is_array() {
        let p = parse_ok("var a = {};");
        match &p.stmts[0].inner {
            StmtKind::VarDecl { init, .. } => assert_eq!(init.as_ref().unwrap().inner, ExprKind::Array(vec![])),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_map_literal() {
        let p = parse_ok(r#"var m = {"a": 1, "b": 2};"#);
        match &p.stmts[0].inner {
            StmtKind::VarDecl { init, .. } => match &init.as_ref().unwrap().inner {
                ExprKind::Map(pairs) => assert_eq!(pairs.len(), 2),
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_call_field_index_chain() {
        let p = parse_ok("o.x[i](1);");
        match &p.stmts[0].inner {
            StmtKind::Expr(e) => assert!(matches!(e.inner, ExprKind::Call { .. })),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let p = parse_ok("1 + 2 * 3;");
        match &p.stmts[0].inner {
            StmtKind::Expr(e) => match &e.inner {
                ExprKind::Binary { op, right, .. } => {
                    assert_eq!(*op, BinOp::Add);
                    assert!(matches!(right.inner, ExprKind::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_power_right_associative() {
        let p = parse_ok("2 ** 3 ** 2;");
        match &p.stmts[0].inner {
            StmtKind::Expr(e) => match &e.inner {
                ExprKind::Binary { op, left, right } => {
                    assert_eq!(*op, BinOp::Pow);
                    assert!(matches!(left.inner, ExprKind::Int(2)));
                    assert!(matches!(right.inner, ExprKind::Binary { op: BinOp::Pow, .. }));
                }
                other => panic!("unexpected: {:?}", other),
            },
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unary_not_and_neg() {
        let p = parse_ok("!true; -1;");
        assert!(matches!(p.stmts[0].inner, StmtKind::Expr(_)));
        match &p.stmts[1].inner {
            StmtKind::Expr(e) => assert!(matches!(e.inner, ExprKind::Unary { op: UnaryOp::Neg, .. })),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_anonymous_fn_expr() {
        let p = parse_ok("var f = fn(x) { return x };");
        match &p.stmts[0].inner {
            StmtKind::VarDecl { init, .. } => assert!(matches!(init.as_ref().unwrap().inner, ExprKind::Fn(_))),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_closure_counter_scenario() {
        let src = r#"fn make() { var c = 0; fn inc() { c = c + 1; return c } return inc } var f = make(); f(); f(); f()"#;
        let p = parse_ok(src);
        assert_eq!(p.stmts.len(), 5);
    }

    #[test]
    fn test_parse_error_recovery() {
        let (_program, _lex_errors, parse_errors) = parse("var = ;");
        assert!(!parse_errors.is_empty());
    }
}
