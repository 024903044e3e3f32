//! Token stream → AST.
//!
//! Hand-written recursive descent with precedence climbing. The grammar:
//!
//! ```text
//! program   := func+
//! func      := 'func' SYMBOL '(' params? ')' '{' stmt* '}'
//! params    := SYMBOL (',' SYMBOL)*
//! stmt      := expr ';'
//!            | expr '=' expr ';'
//!            | 'if'   '(' expr ')' '{' stmt* '}'
//!            | 'else' 'if' '(' expr ')' '{' stmt* '}'
//!            | 'else' '{' stmt* '}'
//!            | 'while' '(' expr ')' '{' stmt* '}'
//!            | 'for'   '(' SYMBOL (',' SYMBOL)? 'in' expr ')' '{' stmt* '}'
//!            | 'for'   '(' SYMBOL 'in' expr '..' expr ')' '{' stmt* '}'
//!            | 'return' expr ';'
//!            | 'break' ';' | 'continue' ';'
//! ```
//!
//! Precedence, lowest to highest: `||`, `&&`, equality, relational,
//! additive, multiplicative, unary `-`, postfix. `else if` and `else` come
//! out as their own statement nodes; lowering stitches the chain together.

use crate::ast::{BinOp, Expr, Func, Param, Program, Span, Stmt};
use crate::error::SyntaxError;
use crate::lexer::{Token, TokenKind, tokenize};

/// Parse a whole source text into a [`Program`].
pub fn parse(source: &str) -> Result<Program, crate::error::Error> {
    let tokens = tokenize(source)?;
    let program = Parser::new(tokens).parse_program()?;
    Ok(program)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek2(&self) -> Option<&Token> {
        self.tokens.get(self.pos + 1)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| &t.kind == kind)
    }

    /// Consume the given token or fail with "expected X".
    fn expect(&mut self, kind: TokenKind) -> Result<Token, SyntaxError> {
        match self.peek() {
            Some(t) if t.kind == kind => Ok(self.advance().unwrap()),
            Some(t) => Err(SyntaxError {
                line: t.line,
                column: t.column,
                message: format!("expected {}, found {}", kind.describe(), t.kind.describe()),
            }),
            None => Err(self.eof_error(&format!("expected {}", kind.describe()))),
        }
    }

    fn expect_symbol(&mut self, what: &str) -> Result<(String, Span), SyntaxError> {
        match self.peek() {
            Some(Token { kind: TokenKind::Symbol(_), .. }) => {
                let t = self.advance().unwrap();
                let span = Span::point(t.line, t.column);
                match t.kind {
                    TokenKind::Symbol(name) => Ok((name, span)),
                    _ => unreachable!(),
                }
            }
            Some(t) => Err(SyntaxError {
                line: t.line,
                column: t.column,
                message: format!("expected {what}, found {}", t.kind.describe()),
            }),
            None => Err(self.eof_error(&format!("expected {what}"))),
        }
    }

    fn eof_error(&self, message: &str) -> SyntaxError {
        let (line, column) = self
            .tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        SyntaxError { line, column, message: format!("{message}, found end of input") }
    }

    fn here(&self) -> Span {
        self.peek()
            .map(|t| Span::point(t.line, t.column))
            .unwrap_or_else(|| {
                self.tokens
                    .last()
                    .map(|t| Span::point(t.line, t.column))
                    .unwrap_or_default()
            })
    }

    /// Span of the most recently consumed token.
    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| Span::point(t.line, t.column))
            .unwrap_or_default()
    }

    pub fn parse_program(&mut self) -> Result<Program, SyntaxError> {
        let mut funcs = Vec::new();
        while self.peek().is_some() {
            funcs.push(self.parse_func()?);
        }
        if funcs.is_empty() {
            return Err(self.eof_error("expected 'func'"));
        }
        Ok(Program { funcs })
    }

    fn parse_func(&mut self) -> Result<Func, SyntaxError> {
        let start = self.here();
        self.expect(TokenKind::Func)?;
        let (name, _) = self.expect_symbol("function name")?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let (pname, pspan) = self.expect_symbol("parameter name")?;
                params.push(Param { name: pname, span: pspan });
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        let span = start.to(self.prev_span());
        Ok(Func { name, params, body, span })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(self.eof_error("expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let start = self.here();
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::If) => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::If { cond, body, span: start.to(self.prev_span()) })
            }
            Some(TokenKind::Else) => {
                self.advance();
                if self.check(&TokenKind::If) {
                    self.advance();
                    self.expect(TokenKind::LParen)?;
                    let cond = self.parse_expr()?;
                    self.expect(TokenKind::RParen)?;
                    let body = self.parse_block()?;
                    Ok(Stmt::Elif { cond, body, span: start.to(self.prev_span()) })
                } else {
                    let body = self.parse_block()?;
                    Ok(Stmt::Else { body, span: start.to(self.prev_span()) })
                }
            }
            Some(TokenKind::While) => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body, span: start.to(self.prev_span()) })
            }
            Some(TokenKind::For) => self.parse_for(start),
            Some(TokenKind::Return) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Return { expr, span: start.to(self.prev_span()) })
            }
            Some(TokenKind::Break) => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Break { span: start.to(self.prev_span()) })
            }
            Some(TokenKind::Continue) => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Continue { span: start.to(self.prev_span()) })
            }
            Some(_) => {
                let expr = self.parse_expr()?;
                if self.check(&TokenKind::Assign) {
                    self.advance();
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::Semicolon)?;
                    Ok(Stmt::Assign { target: expr, value, span: start.to(self.prev_span()) })
                } else {
                    self.expect(TokenKind::Semicolon)?;
                    Ok(Stmt::Expr { expr, span: start.to(self.prev_span()) })
                }
            }
            None => Err(self.eof_error("expected statement")),
        }
    }

    fn parse_for(&mut self, start: Span) -> Result<Stmt, SyntaxError> {
        self.advance(); // 'for'
        self.expect(TokenKind::LParen)?;
        let (first, _) = self.expect_symbol("loop variable")?;

        if self.check(&TokenKind::Comma) {
            // for (k, v in container)
            self.advance();
            let (second, _) = self.expect_symbol("loop variable")?;
            self.expect(TokenKind::In)?;
            let container = self.parse_expr()?;
            if self.check(&TokenKind::DotDot) {
                let t = self.peek().unwrap();
                return Err(SyntaxError {
                    line: t.line,
                    column: t.column,
                    message: "range loop takes a single variable".to_string(),
                });
            }
            self.expect(TokenKind::RParen)?;
            let body = self.parse_block()?;
            return Ok(Stmt::ForKV {
                key: first,
                value: second,
                container,
                body,
                span: start.to(self.prev_span()),
            });
        }

        self.expect(TokenKind::In)?;
        let expr = self.parse_expr()?;
        if self.check(&TokenKind::DotDot) {
            self.advance();
            let to = self.parse_expr()?;
            self.expect(TokenKind::RParen)?;
            let body = self.parse_block()?;
            return Ok(Stmt::ForRange {
                var: first,
                from: expr,
                to,
                body,
                span: start.to(self.prev_span()),
            });
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::ForV { value: first, container: expr, body, span: start.to(self.prev_span()) })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_and()?;
        while self.check(&TokenKind::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Bin { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            self.advance();
            let rhs = self.parse_equality()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Bin { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::NotEq) => BinOp::Neq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::Lte) => BinOp::Lte,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::Gte) => BinOp::Gte,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            let span = lhs.span().to(rhs.span());
            lhs = Expr::Bin { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::Minus) {
            let start = self.here();
            self.advance();
            let operand = self.parse_unary()?;
            let span = start.to(operand.span());
            return Ok(Expr::Neg { operand: Box::new(operand), span });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_term()?;
        loop {
            match self.peek().map(|t| &t.kind) {
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let span = expr.span().to(self.prev_span());
                    expr = Expr::Subscript { base: Box::new(expr), index: Box::new(index), span };
                }
                Some(TokenKind::Dot) => {
                    self.advance();
                    let (field, fspan) = self.expect_symbol("field name")?;
                    let span = expr.span().to(fspan);
                    expr = Expr::Dot { base: Box::new(expr), field, span };
                }
                Some(TokenKind::LParen) => {
                    self.advance();
                    let args = self.parse_args(TokenKind::RParen)?;
                    let span = expr.span().to(self.prev_span());
                    expr = Expr::Call { callee: Box::new(expr), args, span };
                }
                Some(TokenKind::Arrow) => {
                    self.advance();
                    let (method, _) = self.expect_symbol("method name")?;
                    self.expect(TokenKind::LParen)?;
                    let args = self.parse_args(TokenKind::RParen)?;
                    let span = expr.span().to(self.prev_span());
                    expr = Expr::ThisCall { recv: Box::new(expr), method, args, span };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Comma-separated expressions up to (and including) the closer.
    fn parse_args(&mut self, closer: TokenKind) -> Result<Vec<Expr>, SyntaxError> {
        let mut args = Vec::new();
        if self.check(&closer) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(closer)?;
        Ok(args)
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.here();
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Int(value)) => {
                self.advance();
                Ok(Expr::Int { value, span: start })
            }
            Some(TokenKind::Float(value)) => {
                self.advance();
                Ok(Expr::Float { value, span: start })
            }
            Some(TokenKind::Str(value)) => {
                self.advance();
                Ok(Expr::Str { value, span: start })
            }
            Some(TokenKind::Symbol(name)) => {
                self.advance();
                Ok(Expr::Symbol { name, span: start })
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            Some(TokenKind::LBracket) => {
                self.advance();
                let items = self.parse_args(TokenKind::RBracket)?;
                Ok(Expr::ArrayLit { items, span: start.to(self.prev_span()) })
            }
            Some(TokenKind::LBrace) => {
                self.advance();
                let entries = self.parse_dict_body()?;
                Ok(Expr::DictLit { entries, span: start.to(self.prev_span()) })
            }
            Some(other) => {
                let t = self.peek().unwrap();
                Err(SyntaxError {
                    line: t.line,
                    column: t.column,
                    message: format!("expected expression, found {}", other.describe()),
                })
            }
            None => Err(self.eof_error("expected expression")),
        }
    }

    /// Dictionary entries after the opening brace. Keys are bare symbols or
    /// string literals.
    fn parse_dict_body(&mut self) -> Result<Vec<(String, Expr)>, SyntaxError> {
        let mut entries = Vec::new();
        if self.check(&TokenKind::RBrace) {
            self.advance();
            return Ok(entries);
        }
        loop {
            let key = match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Symbol(name)) => {
                    self.advance();
                    name
                }
                Some(TokenKind::Str(value)) => {
                    self.advance();
                    value
                }
                Some(other) => {
                    let t = self.peek().unwrap();
                    return Err(SyntaxError {
                        line: t.line,
                        column: t.column,
                        message: format!("expected dictionary key, found {}", other.describe()),
                    });
                }
                None => return Err(self.eof_error("expected dictionary key")),
            };
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            entries.push((key, value));
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(entries)
    }
}
