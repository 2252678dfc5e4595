//! Recursive-descent parser for the test script language
//!
//! Expression grammar is a precedence ladder:
//! assignment → conditional → logical-or/nullish → logical-and → equality →
//! relational → additive → multiplicative → unary → postfix → call/member →
//! primary.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{Keyword, Punct, Token, TokenKind};
use super::SyntaxError;

type PResult<T> = Result<T, SyntaxError>;

/// Parser state over a token stream ending in `Eof`
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Parse the entire token stream into a [`Program`]
    pub fn parse(mut self) -> PResult<Program> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.statement()?);
        }
        Ok(Program { body })
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check_punct(&self, p: Punct) -> bool {
        self.current().kind == TokenKind::Punct(p)
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.current().kind == TokenKind::Keyword(kw)
    }

    fn match_punct(&mut self, p: Punct) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct, what: &str) -> PResult<()> {
        if self.match_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        match &self.current().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.current();
        let found = match &token.kind {
            TokenKind::Ident(name) => format!("'{}'", name),
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Keyword(kw) => format!("'{}'", kw.as_str()),
            TokenKind::Punct(p) => format!("{:?}", p),
            TokenKind::Eof => "end of input".to_string(),
        };
        SyntaxError::new(format!("{}, found {}", message.into(), found), token.span)
    }

    fn is_contextual(&self, offset: usize, word: &str) -> bool {
        matches!(&self.peek_at(offset).kind, TokenKind::Ident(name) if name == word)
    }

    /// Automatic semicolon insertion: `;`, a line break, `}` or end of input
    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.match_punct(Punct::Semi)
            || self.check_punct(Punct::RBrace)
            || self.at_eof()
            || self.current().newline_before
        {
            Ok(())
        } else {
            Err(self.error("expected ';'"))
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self) -> PResult<Stmt> {
        match &self.current().kind {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            TokenKind::Punct(Punct::Semi) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Let) => self.declaration(DeclKind::Let),
            TokenKind::Keyword(Keyword::Const) => self.declaration(DeclKind::Const),
            TokenKind::Keyword(Keyword::Var) => self.declaration(DeclKind::Var),
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                self.function_declaration(false)
            }
            TokenKind::Ident(name)
                if name == "async"
                    && self.peek_at(1).kind == TokenKind::Keyword(Keyword::Function)
                    && !self.peek_at(1).newline_before =>
            {
                self.advance();
                self.advance();
                self.function_declaration(true)
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen, "'(' after while")?;
                let cond = self.expression()?;
                self.expect_punct(Punct::RParen, "')' after condition")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            TokenKind::Keyword(Keyword::For) => self.for_statement(),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.check_punct(Punct::Semi)
                    || self.check_punct(Punct::RBrace)
                    || self.at_eof()
                    || self.current().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                if self.current().newline_before {
                    return Err(self.error("illegal newline after throw"));
                }
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.error("expected '}'"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn declaration(&mut self, kind: DeclKind) -> PResult<Stmt> {
        self.advance();
        let bindings = self.binding_list(kind)?;
        self.consume_semicolon()?;
        Ok(Stmt::Decl { kind, bindings })
    }

    fn binding_list(&mut self, kind: DeclKind) -> PResult<Vec<(String, Option<Expr>)>> {
        let mut bindings = Vec::new();
        loop {
            let name = self.expect_ident("binding name")?;
            let init = if self.match_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else if kind == DeclKind::Const {
                return Err(self.error("missing initializer in const declaration"));
            } else {
                None
            };
            bindings.push((name, init));
            if !self.match_punct(Punct::Comma) {
                return Ok(bindings);
            }
        }
    }

    fn function_declaration(&mut self, is_async: bool) -> PResult<Stmt> {
        let name = self.expect_ident("function name")?;
        let def = self.function_rest(Some(name), is_async)?;
        Ok(Stmt::Function(def))
    }

    /// Parameter list and block body following `function name?`
    fn function_rest(&mut self, name: Option<String>, is_async: bool) -> PResult<Rc<FunctionDef>> {
        self.expect_punct(Punct::LParen, "'(' before parameters")?;
        let params = self.parameter_list()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body,
            is_async,
        }))
    }

    /// Identifiers up to and including the closing `)`
    fn parameter_list(&mut self) -> PResult<Vec<String>> {
        let mut params = Vec::new();
        while !self.match_punct(Punct::RParen) {
            params.push(self.expect_ident("parameter name")?);
            if !self.match_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, "')' after parameters")?;
                break;
            }
        }
        Ok(params)
    }

    fn if_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen, "'(' after if")?;
        let cond = self.expression()?;
        self.expect_punct(Punct::RParen, "')' after condition")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.match_keyword(Keyword::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen, "'(' after for")?;

        let decl_kind = match &self.current().kind {
            TokenKind::Keyword(Keyword::Let) => Some(DeclKind::Let),
            TokenKind::Keyword(Keyword::Const) => Some(DeclKind::Const),
            TokenKind::Keyword(Keyword::Var) => Some(DeclKind::Var),
            _ => None,
        };

        let init = match decl_kind {
            Some(kind) => {
                if matches!(self.peek_at(1).kind, TokenKind::Ident(_)) && self.is_contextual(2, "of") {
                    self.advance();
                    let name = self.expect_ident("binding name")?;
                    self.advance();
                    let iterable = self.expression()?;
                    self.expect_punct(Punct::RParen, "')' after for-of head")?;
                    let body = Box::new(self.statement()?);
                    return Ok(Stmt::ForOf {
                        kind,
                        name,
                        iterable,
                        body,
                    });
                }
                self.advance();
                let bindings = self.binding_list(kind)?;
                Some(Box::new(Stmt::Decl { kind, bindings }))
            }
            None if self.check_punct(Punct::Semi) => None,
            None => Some(Box::new(Stmt::Expr(self.expression()?))),
        };
        self.expect_punct(Punct::Semi, "';' after for initializer")?;

        let cond = if self.check_punct(Punct::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semi, "';' after for condition")?;

        let update = if self.check_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen, "')' after for clauses")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let block = self.block()?;

        let mut param = None;
        let handler = if self.match_keyword(Keyword::Catch) {
            if self.match_punct(Punct::LParen) {
                param = Some(self.expect_ident("catch binding")?);
                self.expect_punct(Punct::RParen, "')' after catch binding")?;
            }
            Some(self.block()?)
        } else {
            None
        };

        let finalizer = if self.match_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("expected catch or finally after try block"));
        }

        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }

        let target = self.conditional()?;

        let op = match &self.current().kind {
            TokenKind::Punct(Punct::Assign) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::Add,
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::Sub,
            TokenKind::Punct(Punct::StarAssign) => AssignOp::Mul,
            TokenKind::Punct(Punct::SlashAssign) => AssignOp::Div,
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Parse an arrow function if one starts here
    fn try_arrow(&mut self) -> PResult<Option<Expr>> {
        let mut offset = 0;
        let is_async = self.is_contextual(0, "async")
            && !self.peek_at(1).newline_before
            && matches!(
                self.peek_at(1).kind,
                TokenKind::Ident(_) | TokenKind::Punct(Punct::LParen)
            );
        if is_async {
            offset = 1;
        }

        let head = self.peek_at(offset).kind.clone();
        let params = match head {
            TokenKind::Ident(name) if self.peek_at(offset + 1).kind == TokenKind::Punct(Punct::Arrow) => {
                self.pos += offset + 2;
                vec![name]
            }
            TokenKind::Punct(Punct::LParen) if self.arrow_follows_parens(self.pos + offset) => {
                self.pos += offset + 1;
                let params = self.parameter_list()?;
                self.expect_punct(Punct::Arrow, "'=>'")?;
                params
            }
            _ => return Ok(None),
        };

        let body = if self.check_punct(Punct::LBrace) {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(self.assignment()?)
        };

        Ok(Some(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
            is_async,
        }))))
    }

    /// Whether the parenthesis at `open` closes right before `=>`
    fn arrow_follows_parens(&self, open: usize) -> bool {
        let mut depth = 0usize;
        let mut i = open;
        while i < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Punct(Punct::LParen) => depth += 1,
                TokenKind::Punct(Punct::RParen) => {
                    depth -= 1;
                    if depth == 0 {
                        return self
                            .tokens
                            .get(i + 1)
                            .is_some_and(|t| t.kind == TokenKind::Punct(Punct::Arrow));
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let cond = self.logical_or()?;
        if !self.match_punct(Punct::Question) {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(Punct::Colon, "':' in conditional expression")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional(
            Box::new(cond),
            Box::new(then),
            Box::new(otherwise),
        ))
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.logical_and()?;
        loop {
            let op = if self.match_punct(Punct::OrOr) {
                LogicalOp::Or
            } else if self.match_punct(Punct::QuestionQuestion) {
                LogicalOp::Nullish
            } else {
                return Ok(left);
            };
            let right = self.logical_and()?;
            left = Expr::Logical(op, Box::new(left), Box::new(right));
        }
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.equality()?;
        while self.match_punct(Punct::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut left = self.relational()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Punct(Punct::EqEqEq) => BinaryOp::StrictEq,
                TokenKind::Punct(Punct::NotEqEq) => BinaryOp::StrictNotEq,
                TokenKind::Punct(Punct::EqEq) => BinaryOp::LooseEq,
                TokenKind::Punct(Punct::NotEq) => BinaryOp::LooseNotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.relational()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn relational(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Punct(Punct::Lt) => BinaryOp::Lt,
                TokenKind::Punct(Punct::LtEq) => BinaryOp::LtEq,
                TokenKind::Punct(Punct::Gt) => BinaryOp::Gt,
                TokenKind::Punct(Punct::GtEq) => BinaryOp::GtEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Punct(Punct::Plus) => BinaryOp::Add,
                TokenKind::Punct(Punct::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Punct(Punct::Star) => BinaryOp::Mul,
                TokenKind::Punct(Punct::Slash) => BinaryOp::Div,
                TokenKind::Punct(Punct::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        let op = match self.current().kind {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }

        if self.match_keyword(Keyword::Await) {
            let operand = self.unary()?;
            return Ok(Expr::Await(Box::new(operand)));
        }

        let increment = match self.current().kind {
            TokenKind::Punct(Punct::PlusPlus) => Some(true),
            TokenKind::Punct(Punct::MinusMinus) => Some(false),
            _ => None,
        };
        if let Some(increment) = increment {
            self.advance();
            let target = self.unary()?;
            if !target.is_assignable() {
                return Err(self.error("invalid update target"));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let expr = self.call_member()?;
        if self.current().newline_before {
            return Ok(expr);
        }
        let increment = match self.current().kind {
            TokenKind::Punct(Punct::PlusPlus) => true,
            TokenKind::Punct(Punct::MinusMinus) => false,
            _ => return Ok(expr),
        };
        if !expr.is_assignable() {
            return Err(self.error("invalid update target"));
        }
        self.advance();
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.match_keyword(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };

        loop {
            if self.match_punct(Punct::Dot) {
                let name = self.property_name()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.match_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.match_punct(Punct::LParen) {
                let args = self.arguments()?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// `new Callee(args)`; the callee is a member chain without calls
    fn new_expression(&mut self) -> PResult<Expr> {
        let mut callee = self.primary()?;
        loop {
            if self.match_punct(Punct::Dot) {
                let name = self.property_name()?;
                callee = Expr::Member(Box::new(callee), name);
            } else if self.match_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                callee = Expr::Index(Box::new(callee), Box::new(index));
            } else {
                break;
            }
        }
        let args = if self.match_punct(Punct::LParen) {
            self.arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New(Box::new(callee), args))
    }

    /// Arguments up to and including the closing `)`
    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !self.match_punct(Punct::RParen) {
            args.push(self.assignment()?);
            if !self.match_punct(Punct::Comma) {
                self.expect_punct(Punct::RParen, "')' after arguments")?;
                break;
            }
        }
        Ok(args)
    }

    fn property_name(&mut self) -> PResult<String> {
        let name = match &self.current().kind {
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Keyword(kw) => kw.as_str().to_string(),
            _ => return Err(self.error("expected property name")),
        };
        self.advance();
        Ok(name)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Str(Rc::from(s)))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(Keyword::Undefined) => {
                self.advance();
                Ok(Expr::Undefined)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = match &self.current().kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Ok(Expr::Function(self.function_rest(name, false)?))
            }
            TokenKind::Ident(name)
                if name == "async"
                    && self.peek_at(1).kind == TokenKind::Keyword(Keyword::Function)
                    && !self.peek_at(1).newline_before =>
            {
                self.advance();
                self.advance();
                let name = match &self.current().kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Ok(Expr::Function(self.function_rest(name, true)?))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Ident(name))
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                self.advance();
                let mut elements = Vec::new();
                while !self.match_punct(Punct::RBracket) {
                    elements.push(self.assignment()?);
                    if !self.match_punct(Punct::Comma) {
                        self.expect_punct(Punct::RBracket, "']' after array elements")?;
                        break;
                    }
                }
                Ok(Expr::Array(elements))
            }
            TokenKind::Punct(Punct::LBrace) => self.object_literal(),
            _ => Err(self.error("expected expression")),
        }
    }

    fn object_literal(&mut self) -> PResult<Expr> {
        self.advance();
        let mut props = Vec::new();
        while !self.match_punct(Punct::RBrace) {
            let key_token = self.current().clone();
            let key = match &key_token.kind {
                TokenKind::Ident(name) => name.clone(),
                TokenKind::Str(s) => s.clone(),
                TokenKind::Number(n) => super::value::format_number(*n),
                TokenKind::Keyword(kw) => kw.as_str().to_string(),
                _ => return Err(self.error("expected property key")),
            };
            self.advance();

            let value = if self.match_punct(Punct::Colon) {
                self.assignment()?
            } else if self.check_punct(Punct::LParen) {
                Expr::Function(self.function_rest(Some(key.clone()), false)?)
            } else if matches!(key_token.kind, TokenKind::Ident(_)) {
                Expr::Ident(key.clone())
            } else {
                return Err(self.error("expected ':' after property key"));
            };
            props.push((key, value));

            if !self.match_punct(Punct::Comma) {
                self.expect_punct(Punct::RBrace, "'}' after object properties")?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::Lexer;

    fn parse(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(&tokens).parse().unwrap()
    }

    fn parse_err(source: &str) -> SyntaxError {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(&tokens).parse().unwrap_err()
    }

    #[test]
    fn test_describe_block_shape() {
        let program = parse("describe('Math', () => { test('adds', () => expect(1+1).toBe(2)) })");
        assert_eq!(program.body.len(), 1);
        let Stmt::Expr(Expr::Call(callee, args)) = &program.body[0] else {
            panic!("expected call statement");
        };
        assert!(matches!(callee.as_ref(), Expr::Ident(name) if name == "describe"));
        assert_eq!(args.len(), 2);
        let Expr::Function(def) = &args[1] else {
            panic!("expected arrow function");
        };
        assert!(def.params.is_empty());
        assert!(matches!(def.body, FunctionBody::Block(ref body) if body.len() == 1));
    }

    #[test]
    fn test_object_literal_keys() {
        let program = parse("let o = { a, 'b': 2, 3: 4, if: 5, m() { return 1 } }");
        assert_eq!(program.body.len(), 1);

        let err = parse_err("let o = { 'b' }");
        assert!(err.message.contains("expected ':' after property key"), "{}", err.message);
    }

    #[test]
    fn test_semicolon_insertion() {
        let program = parse("let a = 1\nlet b = 2\na + b");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_missing_separator_is_error() {
        let err = parse_err("let a = 1 let b = 2");
        assert!(err.message.contains("expected ';'"));
    }

    #[test]
    fn test_async_arrow_and_await() {
        let program = parse("const f = async (x) => { await sleep(x) }");
        let Stmt::Decl { bindings, .. } = &program.body[0] else {
            panic!("expected declaration");
        };
        let Some(Expr::Function(def)) = &bindings[0].1 else {
            panic!("expected function initializer");
        };
        assert!(def.is_async);
        assert_eq!(def.params, vec!["x".to_string()]);
    }

    #[test]
    fn test_parenthesized_expression_is_not_arrow() {
        let program = parse("(1 + 2) * 3");
        assert!(matches!(
            &program.body[0],
            Stmt::Expr(Expr::Binary(BinaryOp::Mul, _, _))
        ));
    }

    #[test]
    fn test_for_of_and_classic_for() {
        let program = parse("for (const x of xs) { total += x }\nfor (let i = 0; i < 3; i++) {}");
        assert!(matches!(&program.body[0], Stmt::ForOf { name, .. } if name == "x"));
        assert!(matches!(&program.body[1], Stmt::For { cond: Some(_), update: Some(_), .. }));
    }

    #[test]
    fn test_new_error_member_call() {
        let program = parse("throw new Error('bad input')");
        let Stmt::Throw(Expr::New(callee, args)) = &program.body[0] else {
            panic!("expected throw of new expression");
        };
        assert!(matches!(callee.as_ref(), Expr::Ident(name) if name == "Error"));
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_object_literal_key_order() {
        let program = parse("x = { a: 1, 'b': 2, c, d() { return 1 } }");
        let Stmt::Expr(Expr::Assign { value, .. }) = &program.body[0] else {
            panic!("expected assignment");
        };
        let Expr::Object(props) = value.as_ref() else {
            panic!("expected object literal");
        };
        let keys: Vec<_> = props.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_keyword_property_name() {
        let program = parse("expect(x).not.toBe(1); p.catch");
        assert_eq!(program.body.len(), 2);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_err("1 = 2");
        assert!(err.message.contains("invalid assignment target"));
    }

    #[test]
    fn test_unclosed_block_reports_position() {
        let err = parse_err("describe('x', () => {\n  test('y', () => {}\n");
        assert!(err.span.line >= 2);
    }
}
