use corvus_lexer::{Span, Token, TokenKind};
use crate::ast::*;
use crate::error::{ParseError, ParseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None = 0, Or = 1, And = 2, Compare = 3,
    BitOr = 4, BitXor = 5, BitAnd = 6, Shift = 7, Add = 8,
    Mul = 9, Unary = 10, Power = 11, Call = 12,
}

fn next_prec(p: Prec) -> Prec {
    match p {
        Prec::None => Prec::Or,
        Prec::Or => Prec::And,
        Prec::And => Prec::Compare,
        Prec::Compare => Prec::BitOr,
        Prec::BitOr => Prec::BitXor,
        Prec::BitXor => Prec::BitAnd,
        Prec::BitAnd => Prec::Shift,
        Prec::Shift => Prec::Add,
        Prec::Add => Prec::Mul,
        Prec::Mul => Prec::Unary,
        Prec::Unary => Prec::Power,
        Prec::Power => Prec::Call,
        Prec::Call => Prec::Call,
    }
}

fn infix_prec(tok: &TokenKind) -> Option<(Prec, bool)> {
    match tok {
        TokenKind::PipePipe => Some((Prec::Or, false)),
        TokenKind::AmpersandAmpersand => Some((Prec::And, false)),
        TokenKind::EqualEqual | TokenKind::BangEqual
        | TokenKind::Less | TokenKind::LessEqual
        | TokenKind::Greater | TokenKind::GreaterEqual => Some((Prec::Compare, false)),
        TokenKind::Pipe => Some((Prec::BitOr, false)),
        TokenKind::Caret => Some((Prec::BitXor, false)),
        TokenKind::Ampersand => Some((Prec::BitAnd, false)),
        TokenKind::LessLess | TokenKind::GreaterGreater => Some((Prec::Shift, false)),
        TokenKind::Plus | TokenKind::Minus => Some((Prec::Add, false)),
        TokenKind::Star | TokenKind::Slash => Some((Prec::Mul, false)),
        TokenKind::StarStar => Some((Prec::Power, true)),
        TokenKind::LParen | TokenKind::LBracket | TokenKind::Dot => Some((Prec::Call, false)),
        _ => None,
    }
}

fn bin_op(tok: &TokenKind) -> BinOp {
    match tok {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::StarStar => BinOp::Pow,
        TokenKind::EqualEqual => BinOp::Eq,
        TokenKind::BangEqual => BinOp::Ne,
        TokenKind::Less => BinOp::Lt,
        TokenKind::LessEqual => BinOp::Le,
        TokenKind::Greater => BinOp::Gt,
        TokenKind::GreaterEqual => BinOp::Ge,
        TokenKind::AmpersandAmpersand => BinOp::And,
        TokenKind::PipePipe => BinOp::Or,
        TokenKind::Ampersand => BinOp::BitAnd,
        TokenKind::Pipe => BinOp::BitOr,
        TokenKind::Caret => BinOp::BitXor,
        TokenKind::LessLess => BinOp::Shl,
        TokenKind::GreaterGreater => BinOp::Shr,
        other => unreachable!("not a binary operator: {:?}", other),
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    pub errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, errors: Vec::new() }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }
    fn peek_kind(&self) -> &TokenKind { &self.peek().kind }
    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 { self.pos += 1; }
        tok
    }
    fn current_span(&self) -> Span { self.peek().span.clone() }
    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }
    fn match_tok(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) { self.advance(); true } else { false }
    }
    fn expect(&mut self, kind: &TokenKind, label: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: label.to_string(),
                found: self.peek_kind().clone(),
                span: self.current_span(),
            })
        }
    }
    fn skip_semicolons(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Semicolon) { self.advance(); }
    }
    fn error_expr(&mut self, err: ParseError) -> Expr {
        let span = self.current_span();
        self.errors.push(err);
        while !matches!(self.peek_kind(), TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace) {
            self.advance();
        }
        Node::new(ExprKind::Error, span)
    }
    fn error_stmt(&mut self, err: ParseError) -> Stmt {
        let span = self.current_span();
        self.errors.push(err);
        while !matches!(self.peek_kind(), TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace) {
            self.advance();
        }
        self.skip_semicolons();
        Node::new(StmtKind::Error, span)
    }

    pub fn parse(&mut self) -> Program {
        let mut stmts = Vec::new();
        self.skip_semicolons();
        while !matches!(self.peek_kind(), TokenKind::Eof) {
            stmts.push(self.parse_stmt());
            self.skip_semicolons();
        }
        Program { stmts }
    }

    fn parse_stmt(&mut self) -> Stmt {
        match self.peek_kind().clone() {
            TokenKind::Var   => self.parse_var_decl(DeclKind::Var),
            TokenKind::Const => self.parse_var_decl(DeclKind::Const),
            TokenKind::Ref   => self.parse_var_decl(DeclKind::Ref),
            TokenKind::Fn    => self.parse_fn_stmt(),
            TokenKind::Class => self.parse_class(),
            TokenKind::While => self.parse_while(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Include => self.parse_include(),
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        self.skip_semicolons();
        while !self.check(&TokenKind::RBrace) && !matches!(self.peek_kind(), TokenKind::Eof) {
            stmts.push(self.parse_stmt());
            self.skip_semicolons();
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => { self.advance(); Ok(Node::new(TypeKind::Named(name), span)) }
            _ => Err(ParseError::InvalidType { span }),
        }
    }

    fn parse_var_decl(&mut self, kind: DeclKind) -> Stmt {
        let span = self.current_span();
        self.advance();
        let name = match self.peek_kind().clone() {
            TokenKind::Identifier(s) => { self.advance(); s }
            _ => return self.error_stmt(ParseError::UnexpectedToken {
                expected: "identifier".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
            }),
        };
        let ty = if self.match_tok(&TokenKind::Colon) {
            match self.parse_type() { Ok(t) => Some(t), Err(e) => return self.error_stmt(e) }
        } else { None };
        let init = if self.match_tok(&TokenKind::Equal) {
            Some(self.parse_expr(Prec::None))
        } else { None };
        self.skip_semicolons();
        Node::new(StmtKind::VarDecl { kind, name, ty, init }, span)
    }

    fn parse_params(&mut self) -> ParseResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let by_ref = self.match_tok(&TokenKind::Ref);
                let name = match self.peek_kind().clone() {
                    TokenKind::Identifier(s) => { self.advance(); s }
                    _ => return Err(ParseError::UnexpectedToken {
                        expected: "parameter name".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
                    }),
                };
                let ty = if self.match_tok(&TokenKind::Colon) { Some(self.parse_type()?) } else { None };
                params.push(Param { name, ty, by_ref });
                if !self.match_tok(&TokenKind::Comma) { break; }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_fn_decl(&mut self, name: Option<String>) -> ParseResult<FnDecl> {
        let span = self.current_span();
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(FnDecl { name, params, body, span })
    }

    fn parse_fn_stmt(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let name = match self.peek_kind().clone() {
            TokenKind::Identifier(s) => { self.advance(); s }
            _ => return self.error_stmt(ParseError::UnexpectedToken {
                expected: "function name".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
            }),
        };
        match self.parse_fn_decl(Some(name)) {
            Ok(decl) => Node::new(StmtKind::FnDecl(decl), span),
            Err(e) => self.error_stmt(e),
        }
    }

    fn parse_class(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let name = match self.peek_kind().clone() {
            TokenKind::Identifier(s) => { self.advance(); s }
            _ => return self.error_stmt(ParseError::UnexpectedToken {
                expected: "class name".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
            }),
        };
        if let Err(e) = self.expect(&TokenKind::LBrace, "'{'") { return self.error_stmt(e); }
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        self.skip_semicolons();
        while !self.check(&TokenKind::RBrace) && !matches!(self.peek_kind(), TokenKind::Eof) {
            if self.match_tok(&TokenKind::Fn) {
                let mname = match self.peek_kind().clone() {
                    TokenKind::Identifier(s) => { self.advance(); s }
                    _ => return self.error_stmt(ParseError::UnexpectedToken {
                        expected: "method name".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
                    }),
                };
                match self.parse_fn_decl(Some(mname)) {
                    Ok(decl) => methods.push(decl),
                    Err(e) => return self.error_stmt(e),
                }
            } else {
                let fname = match self.peek_kind().clone() {
                    TokenKind::Identifier(s) => { self.advance(); s }
                    _ => return self.error_stmt(ParseError::UnexpectedToken {
                        expected: "field declaration".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
                    }),
                };
                let ty = if self.match_tok(&TokenKind::Colon) {
                    match self.parse_type() { Ok(t) => Some(t), Err(e) => return self.error_stmt(e) }
                } else { None };
                let default = if self.match_tok(&TokenKind::Equal) { Some(self.parse_expr(Prec::None)) } else { None };
                fields.push(FieldDecl { name: fname, ty, default });
            }
            self.skip_semicolons();
        }
        if let Err(e) = self.expect(&TokenKind::RBrace, "'}'") { return self.error_stmt(e); }
        Node::new(StmtKind::ClassDecl { name, fields, methods }, span)
    }

    fn parse_while(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        if let Err(e) = self.expect(&TokenKind::LParen, "'('") { return self.error_stmt(e); }
        let condition = self.parse_expr(Prec::None);
        if let Err(e) = self.expect(&TokenKind::RParen, "')'") { return self.error_stmt(e); }
        let body = match self.parse_block() { Ok(b) => b, Err(e) => return self.error_stmt(e) };
        Node::new(StmtKind::While { condition, body }, span)
    }

    fn parse_return(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let value = if matches!(self.peek_kind(), TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof) {
            None
        } else {
            Some(self.parse_expr(Prec::None))
        };
        self.skip_semicolons();
        Node::new(StmtKind::Return(value), span)
    }

    fn parse_include(&mut self) -> Stmt {
        let span = self.current_span();
        self.advance();
        let path = match self.peek_kind().clone() {
            TokenKind::StringLiteral(s) => { self.advance(); s }
            _ => return self.error_stmt(ParseError::UnexpectedToken {
                expected: "string literal".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
            }),
        };
        self.skip_semicolons();
        Node::new(StmtKind::Include(path), span)
    }

    fn parse_if_expr(&mut self) -> Expr {
        let span = self.current_span();
        self.advance();
        if let Err(e) = self.expect(&TokenKind::LParen, "'('") { return self.error_expr(e); }
        let condition = self.parse_expr(Prec::None);
        if let Err(e) = self.expect(&TokenKind::RParen, "')'") { return self.error_expr(e); }
        let then_branch = match self.parse_block() { Ok(b) => b, Err(e) => return self.error_expr(e) };
        let else_branch = if self.match_tok(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                let inner = self.parse_if_expr();
                Some(vec![Node::new(StmtKind::Expr(inner.clone()), inner.span.clone())])
            } else {
                match self.parse_block() { Ok(b) => Some(b), Err(e) => return self.error_expr(e) }
            }
        } else { None };
        Node::new(ExprKind::If { condition: Box::new(condition), then_branch, else_branch }, span)
    }

    fn parse_expr_or_assign(&mut self) -> Stmt {
        let span = self.current_span();
        let expr = self.parse_expr(Prec::None);
        if self.match_tok(&TokenKind::Equal) {
            if !matches!(expr.inner, ExprKind::Ident(_) | ExprKind::Field { .. } | ExprKind::Index { .. }) {
                return self.error_stmt(ParseError::InvalidAssignTarget { span: expr.span.clone() });
            }
            let value = self.parse_expr(Prec::None);
            self.skip_semicolons();
            return Node::new(StmtKind::Assign { target: expr, value }, span);
        }
        self.skip_semicolons();
        Node::new(StmtKind::Expr(expr), span)
    }

    fn parse_expr(&mut self, min_prec: Prec) -> Expr {
        let mut left = self.parse_unary();
        loop {
            let (prec, right_assoc) = match infix_prec(self.peek_kind()) {
                Some(p) => p,
                None => break,
            };
            if prec < min_prec { break; }
            if prec == Prec::Call {
                left = self.parse_postfix_op(left);
                continue;
            }
            let op_tok = self.peek_kind().clone();
            let span = left.span.clone();
            self.advance();
            let next_min = if right_assoc { prec } else { next_prec(prec) };
            let right = self.parse_expr(next_min);
            left = Node::new(ExprKind::Binary { op: bin_op(&op_tok), left: Box::new(left), right: Box::new(right) }, span);
        }
        left
    }

    fn parse_unary(&mut self) -> Expr {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Minus => { self.advance(); let operand = self.parse_expr(Prec::Unary); Node::new(ExprKind::Unary { op: UnaryOp::Neg, operand: Box::new(operand) }, span) }
            TokenKind::Bang  => { self.advance(); let operand = self.parse_expr(Prec::Unary); Node::new(ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }, span) }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let primary = self.parse_primary();
        self.parse_postfix_op(primary)
    }

    fn parse_postfix_op(&mut self, mut expr: Expr) -> Expr {
        loop {
            match self.peek_kind().clone() {
                TokenKind::LParen => {
                    let span = expr.span.clone();
                    self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr(Prec::None));
                            if !self.match_tok(&TokenKind::Comma) { break; }
                        }
                    }
                    if let Err(e) = self.expect(&TokenKind::RParen, "')'") { return self.error_expr(e); }
                    expr = Node::new(ExprKind::Call { callee: Box::new(expr), args }, span);
                }
                TokenKind::LBracket => {
                    let span = expr.span.clone();
                    self.advance();
                    let index = self.parse_expr(Prec::None);
                    if let Err(e) = self.expect(&TokenKind::RBracket, "']'") { return self.error_expr(e); }
                    expr = Node::new(ExprKind::Index { object: Box::new(expr), index: Box::new(index) }, span);
                }
                TokenKind::Dot => {
                    let span = expr.span.clone();
                    self.advance();
                    let field = match self.peek_kind().clone() {
                        TokenKind::Identifier(s) => { self.advance(); s }
                        _ => return self.error_expr(ParseError::UnexpectedToken {
                            expected: "field name".to_string(), found: self.peek_kind().clone(), span: self.current_span(),
                        }),
                    };
                    expr = Node::new(ExprKind::Field { object: Box::new(expr), field }, span);
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_brace_literal(&mut self) -> Expr {
        let span = self.current_span();
        self.advance();
        if self.match_tok(&TokenKind::RBrace) {
            return Node::new(ExprKind::Array(Vec::new()), span);
        }
        let first = self.parse_expr(Prec::None);
        if self.match_tok(&TokenKind::Colon) {
            let mut pairs = vec![(first, self.parse_expr(Prec::None))];
            while self.match_tok(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) { break; }
                let k = self.parse_expr(Prec::None);
                if let Err(e) = self.expect(&TokenKind::Colon, "':'") { return self.error_expr(e); }
                let v = self.parse_expr(Prec::None);
                pairs.push((k, v));
            }
            if let Err(e) = self.expect(&TokenKind::RBrace, "'}'") { return self.error_expr(e); }
            Node::new(ExprKind::Map(pairs), span)
        } else {
            let mut items = vec![first];
            while self.match_tok(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) { break; }
                items.push(self.parse_expr(Prec::None));
            }
            if let Err(e) = self.expect(&TokenKind::RBrace, "'}'") { return self.error_expr(e); }
            Node::new(ExprKind::Array(items), span)
        }
    }

    fn parse_primary(&mut self) -> Expr {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::IntLiteral(n)    => { self.advance(); Node::new(ExprKind::Int(n), span) }
            TokenKind::FloatLiteral(n)  => { self.advance(); Node::new(ExprKind::Float(n), span) }
            TokenKind::StringLiteral(s) => { self.advance(); Node::new(ExprKind::Str(s), span) }
            TokenKind::BoolLiteral(b)   => { self.advance(); Node::new(ExprKind::Bool(b), span) }
            TokenKind::NullLiteral      => { self.advance(); Node::new(ExprKind::Null, span) }
            TokenKind::Identifier(name) => { self.advance(); Node::new(ExprKind::Ident(name), span) }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr(Prec::None);
                if let Err(e) = self.expect(&TokenKind::RParen, "')'") { return self.error_expr(e); }
                inner
            }
            TokenKind::LBrace => self.parse_brace_literal(),
            TokenKind::If => self.parse_if_expr(),
            TokenKind::Fn => {
                self.advance();
                match self.parse_fn_decl(None) {
                    Ok(decl) => Node::new(ExprKind::Fn(decl), span),
                    Err(e) => self.error_expr(e),
                }
            }
            _ => self.error_expr(ParseError::UnexpectedToken {
                expected: "expression".to_string(), found: self.peek_kind().clone(), span,
            }),
        }
    }
}
