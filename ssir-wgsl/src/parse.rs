//! Recursive-descent WGSL parser.
//!
//! The parser records every problem it meets with line/column and keeps
//! going, so a malformed source still yields a (partial) tree for downstream
//! best-effort tooling; lowering re-validates. Every token-consuming loop
//! checks that the cursor advanced and force-advances otherwise, which rules
//! out infinite loops on malformed input.
use crate::ast::*;
use crate::token::{tokenize, SyntaxError, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
    next_node: NodeId,
}

/// Parse a WGSL source string. Never fails; inspect
/// [`Program::had_error`] before trusting the tree.
pub fn parse(source: &str) -> Program {
    let (tokens, lex_errors) = tokenize(source);
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: lex_errors,
        next_node: 0,
    };
    let decls = parser.parse_program();
    Program {
        decls,
        errors: parser.errors,
        node_count: parser.next_node,
    }
}

impl Parser {
    // Cursor plumbing.

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }
    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|x| x.kind)
    }
    fn nth_kind(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + n).map(|x| x.kind)
    }
    fn span(&self) -> Span {
        match self.peek() {
            Some(token) => Span {
                line: token.line,
                col: token.col,
            },
            None => self
                .tokens
                .last()
                .map(|token| Span {
                    line: token.line,
                    col: token.col,
                })
                .unwrap_or(Span { line: 1, col: 1 }),
        }
    }
    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }
    fn accept(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            Some(token)
        } else {
            None
        }
    }
    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        match self.accept(kind) {
            Some(token) => Some(token),
            None => {
                self.error_here(format!("expected {}", what));
                None
            }
        }
    }
    fn error_here(&mut self, message: impl Into<String>) {
        let span = self.span();
        self.errors.push(SyntaxError {
            message: message.into(),
            line: span.line,
            col: span.col,
        });
    }
    fn alloc_node(&mut self) -> NodeId {
        let id = self.next_node;
        self.next_node += 1;
        id
    }

    /// Consume one `>` closing a type argument list. A `>>` token closes two
    /// nested lists: the first close rewrites it to a plain `>` in place.
    fn accept_close_angle(&mut self) -> bool {
        match self.peek_kind() {
            Some(TokenKind::Gt) => {
                self.pos += 1;
                true
            }
            Some(TokenKind::Shr) => {
                let token = &mut self.tokens[self.pos];
                token.kind = TokenKind::Gt;
                token.lexeme = ">".to_owned();
                token.col += 1;
                true
            }
            _ => false,
        }
    }

    // Top level.

    fn parse_program(&mut self) -> Vec<Decl> {
        let mut decls = Vec::new();
        while self.pos < self.tokens.len() {
            let start = self.pos;
            if let Some(decl) = self.parse_decl() {
                decls.push(decl);
            }
            if self.pos == start {
                self.error_here("unexpected token at top level");
                self.pos += 1;
            }
        }
        decls
    }

    fn parse_decl(&mut self) -> Option<Decl> {
        let attrs = self.parse_attrs();
        match self.peek_kind() {
            Some(TokenKind::KwStruct) => self.parse_struct_decl(),
            Some(TokenKind::KwVar) => self.parse_global_var_decl(attrs),
            Some(TokenKind::KwConst) => self.parse_const_decl(VarKind::Const),
            Some(TokenKind::KwOverride) => self.parse_const_decl(VarKind::Override),
            Some(TokenKind::KwFn) => self.parse_fn_decl(attrs),
            _ => None,
        }
    }

    fn parse_attrs(&mut self) -> Vec<Attribute> {
        let mut attrs = Vec::new();
        while self.check(TokenKind::At) {
            let span = self.span();
            self.pos += 1;
            let name = match self.expect(TokenKind::Ident, "attribute name") {
                Some(token) => token.lexeme,
                None => continue,
            };
            let mut args = Vec::new();
            if self.accept(TokenKind::LParen).is_some() {
                while !self.check(TokenKind::RParen) {
                    let start = self.pos;
                    if let Some(arg) = self.parse_expr() {
                        args.push(arg);
                    }
                    if self.accept(TokenKind::Comma).is_none() && !self.check(TokenKind::RParen) {
                        self.error_here("expected ',' or ')' in attribute arguments");
                    }
                    if self.pos == start {
                        self.pos += 1;
                    }
                }
                self.expect(TokenKind::RParen, "')'");
            }
            attrs.push(Attribute { name, args, span });
        }
        attrs
    }

    fn parse_struct_decl(&mut self) -> Option<Decl> {
        let span = self.span();
        self.expect(TokenKind::KwStruct, "'struct'")?;
        let name = self.expect(TokenKind::Ident, "struct name")?.lexeme;
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RBrace) && self.pos < self.tokens.len() {
            let start = self.pos;
            let attrs = self.parse_attrs();
            let field_span = self.span();
            if let Some(field_name) = self.expect(TokenKind::Ident, "field name") {
                self.expect(TokenKind::Colon, "':'");
                if let Some(ty) = self.parse_type() {
                    fields.push(StructField {
                        attrs,
                        name: field_name.lexeme,
                        ty,
                        span: field_span,
                    });
                }
            }
            self.accept(TokenKind::Comma);
            if self.pos == start {
                self.error_here("unexpected token in struct body");
                self.pos += 1;
            }
        }
        self.expect(TokenKind::RBrace, "'}'");
        Some(Decl::Struct(StructDecl { name, fields, span }))
    }

    fn parse_global_var_decl(&mut self, attrs: Vec<Attribute>) -> Option<Decl> {
        let span = self.span();
        self.expect(TokenKind::KwVar, "'var'")?;
        let mut qualifiers = Vec::new();
        if self.accept(TokenKind::Lt).is_some() {
            while let Some(token) = self.accept(TokenKind::Ident) {
                qualifiers.push(token.lexeme);
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
            if !self.accept_close_angle() {
                self.error_here("expected '>' after address space");
            }
        }
        let name = self.expect(TokenKind::Ident, "variable name")?.lexeme;
        let ty = if self.accept(TokenKind::Colon).is_some() {
            self.parse_type()
        } else {
            None
        };
        let init = if self.accept(TokenKind::Assign).is_some() {
            self.parse_expr()
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';'");
        Some(Decl::GlobalVar(GlobalVarDecl {
            attrs,
            qualifiers,
            name,
            ty,
            init,
            span,
        }))
    }

    fn parse_const_decl(&mut self, kind: VarKind) -> Option<Decl> {
        let span = self.span();
        self.pos += 1; // `const` or `override`.
        let name = self.expect(TokenKind::Ident, "constant name")?.lexeme;
        let ty = if self.accept(TokenKind::Colon).is_some() {
            self.parse_type()
        } else {
            None
        };
        let init = if self.accept(TokenKind::Assign).is_some() {
            self.parse_expr()
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';'");
        Some(Decl::Const(ConstDecl {
            kind,
            name,
            ty,
            init,
            span,
        }))
    }

    fn parse_fn_decl(&mut self, attrs: Vec<Attribute>) -> Option<Decl> {
        let span = self.span();
        self.expect(TokenKind::KwFn, "'fn'")?;
        let name = self.expect(TokenKind::Ident, "function name")?.lexeme;
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(TokenKind::RParen) && self.pos < self.tokens.len() {
            let start = self.pos;
            let param_attrs = self.parse_attrs();
            let param_span = self.span();
            if let Some(param_name) = self.expect(TokenKind::Ident, "parameter name") {
                self.expect(TokenKind::Colon, "':'");
                if let Some(ty) = self.parse_type() {
                    params.push(FnParam {
                        attrs: param_attrs,
                        name: param_name.lexeme,
                        ty,
                        span: param_span,
                    });
                }
            }
            if self.accept(TokenKind::Comma).is_none() && !self.check(TokenKind::RParen) {
                self.error_here("expected ',' or ')' in parameter list");
            }
            if self.pos == start {
                self.pos += 1;
            }
        }
        self.expect(TokenKind::RParen, "')'");
        let mut ret_attrs = Vec::new();
        let mut ret_ty = None;
        if self.accept(TokenKind::Arrow).is_some() {
            ret_attrs = self.parse_attrs();
            ret_ty = self.parse_type();
        }
        let body = self.parse_block()?;
        Some(Decl::Fn(FnDecl {
            attrs,
            name,
            params,
            ret_attrs,
            ret_ty,
            body,
            span,
        }))
    }

    // Types.

    fn parse_type(&mut self) -> Option<TypeExpr> {
        let span = self.span();
        let name = self.expect(TokenKind::Ident, "type name")?.lexeme;
        let mut ty_args = Vec::new();
        let mut expr_args = Vec::new();
        if self.accept(TokenKind::Lt).is_some() {
            loop {
                if self.accept_close_angle() {
                    break;
                }
                let start = self.pos;
                match self.peek_kind() {
                    Some(TokenKind::Ident) => {
                        if let Some(arg) = self.parse_type() {
                            ty_args.push(arg);
                        }
                    }
                    _ => {
                        // Array lengths and other constant expressions.
                        if let Some(arg) = self.parse_additive() {
                            expr_args.push(arg);
                        }
                    }
                }
                if self.accept(TokenKind::Comma).is_none() {
                    if !self.accept_close_angle() {
                        self.error_here("expected ',' or '>' in type arguments");
                    }
                    break;
                }
                if self.pos == start {
                    self.pos += 1;
                }
            }
        }
        Some(TypeExpr {
            name,
            ty_args,
            expr_args,
            span,
        })
    }

    /// Decide whether the `ident <` at the cursor opens a type argument list.
    /// Scans ahead for the matching `>`; the identifier is a constructor head
    /// iff the token right after it is `(`. The scan is bounded and only
    /// tolerates tokens that can appear inside type arguments.
    fn is_type_head(&self) -> bool {
        debug_assert_eq!(self.peek_kind(), Some(TokenKind::Ident));
        let mut depth = 0i32;
        let mut n = 1usize;
        loop {
            if n > 32 {
                return false;
            }
            let kind = match self.nth_kind(n) {
                Some(kind) => kind,
                None => return false,
            };
            match kind {
                TokenKind::Lt => depth += 1,
                TokenKind::Gt => depth -= 1,
                TokenKind::Shr => depth -= 2,
                TokenKind::Ident | TokenKind::Number | TokenKind::Comma => {}
                _ => return false,
            }
            n += 1;
            if depth <= 0 {
                break;
            }
        }
        self.nth_kind(n) == Some(TokenKind::LParen)
    }

    // Statements.

    fn parse_block(&mut self) -> Option<Vec<Stmt>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && self.pos < self.tokens.len() {
            let start = self.pos;
            if let Some(stmt) = self.parse_stmt() {
                stmts.push(stmt);
            }
            if self.pos == start {
                self.error_here("unexpected token in block");
                self.pos += 1;
            }
        }
        self.expect(TokenKind::RBrace, "'}'");
        Some(stmts)
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        match self.peek_kind()? {
            TokenKind::LBrace => self.parse_block().map(Stmt::Block),
            TokenKind::KwVar => self.parse_var_stmt(VarKind::Var),
            TokenKind::KwLet => self.parse_var_stmt(VarKind::Let),
            TokenKind::KwConst => self.parse_var_stmt(VarKind::Const),
            TokenKind::KwOverride => self.parse_var_stmt(VarKind::Override),
            TokenKind::KwReturn => {
                let span = self.span();
                self.pos += 1;
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    self.parse_expr()
                };
                self.expect(TokenKind::Semicolon, "';'");
                Some(Stmt::Return { value, span })
            }
            TokenKind::KwIf => self.parse_if_stmt(),
            TokenKind::KwWhile => {
                let span = self.span();
                self.pos += 1;
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                Some(Stmt::While { cond, body, span })
            }
            TokenKind::KwFor => self.parse_for_stmt(),
            TokenKind::Semicolon => {
                self.pos += 1;
                Some(Stmt::Block(Vec::new()))
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon, "';'");
                Some(Stmt::Expr(expr))
            }
        }
    }

    fn parse_var_stmt(&mut self, kind: VarKind) -> Option<Stmt> {
        let span = self.span();
        self.pos += 1;
        // Tolerate `var<function>` on locals; the qualifier adds nothing.
        if kind == VarKind::Var && self.accept(TokenKind::Lt).is_some() {
            while self.accept(TokenKind::Ident).is_some() {
                if self.accept(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.accept_close_angle();
        }
        let name = self.expect(TokenKind::Ident, "variable name")?.lexeme;
        let ty = if self.accept(TokenKind::Colon).is_some() {
            self.parse_type()
        } else {
            None
        };
        let init = if self.accept(TokenKind::Assign).is_some() {
            self.parse_expr()
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';'");
        Some(Stmt::Var {
            kind,
            name,
            ty,
            init,
            span,
        })
    }

    fn parse_if_stmt(&mut self) -> Option<Stmt> {
        let span = self.span();
        self.expect(TokenKind::KwIf, "'if'")?;
        let cond = self.parse_expr()?;
        let then = self.parse_block()?;
        let els = if self.accept(TokenKind::KwElse).is_some() {
            if self.check(TokenKind::KwIf) {
                self.parse_if_stmt().map(Box::new)
            } else {
                self.parse_block().map(|x| Box::new(Stmt::Block(x)))
            }
        } else {
            None
        };
        Some(Stmt::If {
            cond,
            then,
            els,
            span,
        })
    }

    fn parse_for_stmt(&mut self) -> Option<Stmt> {
        let span = self.span();
        self.expect(TokenKind::KwFor, "'for'")?;
        self.expect(TokenKind::LParen, "'('")?;
        let init = if self.check(TokenKind::Semicolon) {
            self.pos += 1;
            None
        } else {
            match self.peek_kind() {
                Some(TokenKind::KwVar) => self.parse_var_stmt(VarKind::Var).map(Box::new),
                Some(TokenKind::KwLet) => self.parse_var_stmt(VarKind::Let).map(Box::new),
                _ => {
                    let expr = self.parse_expr();
                    self.expect(TokenKind::Semicolon, "';'");
                    expr.map(|x| Box::new(Stmt::Expr(x)))
                }
            }
        };
        let cond = if self.check(TokenKind::Semicolon) {
            None
        } else {
            self.parse_expr()
        };
        self.expect(TokenKind::Semicolon, "';'");
        let cont = if self.check(TokenKind::RParen) {
            None
        } else {
            self.parse_expr()
        };
        self.expect(TokenKind::RParen, "')'");
        let body = self.parse_block()?;
        Some(Stmt::For {
            init,
            cond,
            cont,
            body,
            span,
        })
    }

    // Expressions, lowest precedence first.

    pub fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Option<Expr> {
        let span = self.span();
        let lhs = self.parse_ternary()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::PlusEq) => Some(BinOp::Add),
            Some(TokenKind::MinusEq) => Some(BinOp::Sub),
            Some(TokenKind::StarEq) => Some(BinOp::Mul),
            Some(TokenKind::SlashEq) => Some(BinOp::Div),
            Some(TokenKind::PercentEq) => Some(BinOp::Mod),
            Some(TokenKind::AmpEq) => Some(BinOp::BitAnd),
            Some(TokenKind::PipeEq) => Some(BinOp::BitOr),
            Some(TokenKind::CaretEq) => Some(BinOp::BitXor),
            _ => return Some(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_assign()?;
        Some(Expr::Assign {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            span,
        })
    }

    fn parse_ternary(&mut self) -> Option<Expr> {
        let span = self.span();
        let cond = self.parse_binary(0)?;
        if self.accept(TokenKind::Question).is_none() {
            return Some(cond);
        }
        let then = self.parse_ternary()?;
        self.expect(TokenKind::Colon, "':'")?;
        let els = self.parse_ternary()?;
        Some(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            els: Box::new(els),
            span,
        })
    }

    /// Left-associative binary operator ladder. `level` indexes
    /// [`BIN_LEVELS`] from loosest to tightest.
    fn parse_binary(&mut self, level: usize) -> Option<Expr> {
        const BIN_LEVELS: &[&[(TokenKind, BinOp)]] = &[
            &[(TokenKind::PipePipe, BinOp::LogicalOr)],
            &[(TokenKind::AmpAmp, BinOp::LogicalAnd)],
            &[(TokenKind::Pipe, BinOp::BitOr)],
            &[(TokenKind::Caret, BinOp::BitXor)],
            &[(TokenKind::Amp, BinOp::BitAnd)],
            &[(TokenKind::EqEq, BinOp::Eq), (TokenKind::Ne, BinOp::Ne)],
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::Le, BinOp::Le),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::Ge, BinOp::Ge),
            ],
            &[(TokenKind::Shl, BinOp::Shl), (TokenKind::Shr, BinOp::Shr)],
            &[(TokenKind::Plus, BinOp::Add), (TokenKind::Minus, BinOp::Sub)],
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Mod),
            ],
        ];
        if level == BIN_LEVELS.len() {
            return self.parse_unary();
        }
        let span = self.span();
        let mut lhs = self.parse_binary(level + 1)?;
        'outer: loop {
            for (kind, op) in BIN_LEVELS[level] {
                if self.check(*kind) {
                    self.pos += 1;
                    let rhs = self.parse_binary(level + 1)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        span,
                    };
                    continue 'outer;
                }
            }
            break;
        }
        Some(lhs)
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        // Additive level of the ladder; used where relational operators must
        // not be consumed, e.g. array lengths inside `<...>`.
        self.parse_binary(8)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let span = self.span();
        let op = match self.peek_kind()? {
            TokenKind::Plus => {
                // Unary plus is the identity.
                self.pos += 1;
                return self.parse_unary();
            }
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Bang => UnOp::Not,
            TokenKind::Tilde => UnOp::BitNot,
            TokenKind::PlusPlus => UnOp::Incr,
            TokenKind::MinusMinus => UnOp::Decr,
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        let expr = self.parse_unary()?;
        Some(Expr::Unary {
            op,
            expr: Box::new(expr),
            postfix: false,
            span,
        })
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            let span = self.span();
            match self.peek_kind() {
                Some(TokenKind::LParen) => {
                    self.pos += 1;
                    let mut args = Vec::new();
                    while !self.check(TokenKind::RParen) && self.pos < self.tokens.len() {
                        let start = self.pos;
                        if let Some(arg) = self.parse_expr() {
                            args.push(arg);
                        }
                        if self.accept(TokenKind::Comma).is_none() && !self.check(TokenKind::RParen)
                        {
                            self.error_here("expected ',' or ')' in arguments");
                        }
                        if self.pos == start {
                            self.pos += 1;
                        }
                    }
                    self.expect(TokenKind::RParen, "')'");
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        span,
                    };
                }
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket, "']'");
                    expr = Expr::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                        span,
                    };
                }
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    let member = self.expect(TokenKind::Ident, "member name")?.lexeme;
                    expr = Expr::Member {
                        base: Box::new(expr),
                        member,
                        span,
                    };
                }
                Some(TokenKind::PlusPlus) => {
                    self.pos += 1;
                    expr = Expr::Unary {
                        op: UnOp::Incr,
                        expr: Box::new(expr),
                        postfix: true,
                        span,
                    };
                }
                Some(TokenKind::MinusMinus) => {
                    self.pos += 1;
                    expr = Expr::Unary {
                        op: UnOp::Decr,
                        expr: Box::new(expr),
                        postfix: true,
                        span,
                    };
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let span = self.span();
        match self.peek_kind()? {
            TokenKind::LParen => {
                self.pos += 1;
                let expr = self.parse_expr();
                self.expect(TokenKind::RParen, "')'");
                expr
            }
            TokenKind::Number => {
                let token = self.tokens[self.pos].clone();
                self.pos += 1;
                let lit = LitExpr {
                    lexeme: token.lexeme,
                    span,
                };
                if token.is_float {
                    Some(Expr::FloatLit(lit))
                } else {
                    Some(Expr::IntLit(lit))
                }
            }
            TokenKind::Ident => {
                if self.nth_kind(1) == Some(TokenKind::Lt) && self.is_type_head() {
                    // Constructor head: the postfix-call rule wraps it into a
                    // call whose callee is a type node.
                    return self.parse_type().map(Expr::TypeHead);
                }
                let token = self.tokens[self.pos].clone();
                self.pos += 1;
                let node = self.alloc_node();
                Some(Expr::Ident(IdentExpr {
                    name: token.lexeme,
                    node,
                    span,
                }))
            }
            _ => {
                self.error_here("expected expression");
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_empty_source() {
        let prog = parse("");
        assert!(prog.decls.is_empty());
        assert!(!prog.had_error());
    }

    #[test]
    fn test_parse_struct() {
        let prog = parse(
            "struct VertexOutput {
                @builtin(position) pos: vec4<f32>,
                @location(0) color: vec3<f32>,
            }",
        );
        assert!(!prog.had_error(), "{:?}", prog.errors);
        match &prog.decls[0] {
            Decl::Struct(decl) => {
                assert_eq!(decl.name, "VertexOutput");
                assert_eq!(decl.fields.len(), 2);
                assert_eq!(decl.fields[0].attrs[0].name, "builtin");
                assert_eq!(decl.fields[0].attrs[0].ident_arg(), Some("position"));
                assert_eq!(decl.fields[1].attrs[0].int_arg(), Some(0));
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_var() {
        let prog = parse("@group(0) @binding(2) var<storage, read_write> data: array<f32>;");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        match &prog.decls[0] {
            Decl::GlobalVar(decl) => {
                assert_eq!(decl.qualifiers, vec!["storage", "read_write"]);
                assert_eq!(decl.attrs[0].int_arg(), Some(0));
                assert_eq!(decl.attrs[1].int_arg(), Some(2));
                let ty = decl.ty.as_ref().unwrap();
                assert_eq!(ty.name, "array");
                assert_eq!(ty.ty_args[0].name, "f32");
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn test_parse_sized_array() {
        let prog = parse("var<workgroup> tile: array<vec4<f32>, 64>;");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        match &prog.decls[0] {
            Decl::GlobalVar(decl) => {
                let ty = decl.ty.as_ref().unwrap();
                assert_eq!(ty.ty_args.len(), 1);
                assert_eq!(ty.expr_args.len(), 1);
                assert_eq!(ty.ty_args[0].name, "vec4");
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn test_constructor_head_disambiguation() {
        let prog = parse("fn f() { let v = vec4<f32>(1.0, 2.0, 3.0, 4.0); }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        let body = match &prog.decls[0] {
            Decl::Fn(decl) => &decl.body,
            other => panic!("unexpected decl: {:?}", other),
        };
        match &body[0] {
            Stmt::Var {
                init: Some(Expr::Call { callee, args, .. }),
                ..
            } => {
                assert!(matches!(&**callee, Expr::TypeHead(ty) if ty.name == "vec4"));
                assert_eq!(args.len(), 4);
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_less_than_is_not_a_constructor() {
        let prog = parse("fn f(a: i32, b: i32) -> i32 { return a < b; }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        let body = match &prog.decls[0] {
            Decl::Fn(decl) => &decl.body,
            other => panic!("unexpected decl: {:?}", other),
        };
        match &body[0] {
            Stmt::Return {
                value: Some(Expr::Binary { op, .. }),
                ..
            } => assert_eq!(*op, BinOp::Lt),
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_nested_angle_close() {
        let prog = parse("fn f() { let m = mat2x2<f32>(vec2<f32>(1.0, 0.0), vec2<f32>(0.0, 1.0)); }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
    }

    #[test]
    fn test_shift_token_closes_two_lists() {
        let prog = parse("var<private> m: array<vec4<f32>, 2>; fn f() { let x = 1 >> 2; }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        let prog = parse("@group(0) @binding(0) var<storage> v: array<vec2<f32>>;");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        match &prog.decls[0] {
            Decl::GlobalVar(decl) => {
                let ty = decl.ty.as_ref().unwrap();
                assert_eq!(ty.name, "array");
                assert_eq!(ty.ty_args[0].name, "vec2");
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_binds_tighter() {
        let prog = parse("fn f() { let x = 1 + 2 * 3; }");
        let body = match &prog.decls[0] {
            Decl::Fn(decl) => &decl.body,
            other => panic!("unexpected decl: {:?}", other),
        };
        match &body[0] {
            Stmt::Var {
                init: Some(Expr::Binary { op, rhs, .. }),
                ..
            } => {
                assert_eq!(*op, BinOp::Add);
                assert!(matches!(&**rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_compound_assignment_and_increment() {
        let prog = parse("fn f() { var i: i32 = 0; i += 2; i++; }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        let body = match &prog.decls[0] {
            Decl::Fn(decl) => &decl.body,
            other => panic!("unexpected decl: {:?}", other),
        };
        assert!(matches!(
            &body[1],
            Stmt::Expr(Expr::Assign {
                op: Some(BinOp::Add),
                ..
            })
        ));
        assert!(matches!(
            &body[2],
            Stmt::Expr(Expr::Unary {
                op: UnOp::Incr,
                postfix: true,
                ..
            })
        ));
    }

    #[test]
    fn test_for_desugar_source_shape() {
        let prog = parse("fn f() { for (var i: i32 = 0; i < 4; i++) { } }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        let body = match &prog.decls[0] {
            Decl::Fn(decl) => &decl.body,
            other => panic!("unexpected decl: {:?}", other),
        };
        match &body[0] {
            Stmt::For {
                init: Some(_),
                cond: Some(_),
                cont: Some(_),
                ..
            } => {}
            other => panic!("unexpected stmt: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_input_terminates() {
        // The progress guarantee turns garbage into errors, not hangs.
        let prog = parse("fn ] } ) struct {{{{ ;;; @@@@");
        assert!(prog.had_error());
    }

    #[test]
    fn test_partial_tree_on_error() {
        let prog = parse("fn ok() { } fn broken( { }");
        assert!(prog.had_error());
        assert!(prog.decls.iter().any(|x| x.name() == "ok"));
    }

    #[test]
    fn test_entry_attrs() {
        let prog = parse("@compute @workgroup_size(64) fn main() { }");
        assert!(!prog.had_error(), "{:?}", prog.errors);
        match &prog.decls[0] {
            Decl::Fn(decl) => {
                assert!(decl.attr("compute").is_some());
                assert_eq!(decl.attr("workgroup_size").unwrap().int_arg(), Some(64));
            }
            other => panic!("unexpected decl: {:?}", other),
        }
    }
}
