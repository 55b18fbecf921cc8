// parser.rs — Recursive-descent parser for SNEX source
//
// Builds arena nodes with precedence climbing for binary operators.
// Template-argument lists are disambiguated from less-than by speculative
// parsing: the token cursor is saved, a template argument list is
// attempted, and the attempt is kept only when the closing `>` is followed
// by a call. Parsing is fail-fast; the first error aborts the unit with a
// parse diagnostic.
//
// The same machinery parses inline snippet fragments for the wrap library:
// `$name` placeholders are substituted with clones of bound tree nodes.
//
// Preconditions: tokens come from `lexer::lex` over the same source string.
// Postconditions: every produced node has a span inside the source; parent
//   links are consistent.
// Failure modes: E0100 for lex errors, E0200 for syntax errors.
// Side effects: allocates into the caller's syntax tree.

use std::collections::HashMap;

use crate::ast::{
    AssignOp, BinaryOp, CallData, Callee, ConstArg, FunctionDef, GlobalDef, GlobalInit, Item,
    MemberVarDef, NodeId, ParamDef, ParsedUnit, Path, StatementKind, StructDef, SyntaxTree,
    TemplateArgSyntax, TemplateParamDef, TemplateParamKind, TemplateStructDef, TypeName, UnaryOp,
};
use crate::diag::{codes, Diagnostic};
use crate::lexer::{lex, Span, Token};

/// Parse a full compilation unit.
pub fn parse_unit(source: &str) -> Result<ParsedUnit, Diagnostic> {
    let mut tree = SyntaxTree::new();
    let items = {
        let bindings = HashMap::new();
        let mut p = Parser::new(source, &mut tree, &bindings)?;
        p.items()?
    };
    Ok(ParsedUnit { tree, items })
}

/// Parse a statement fragment into an existing tree. `$name` placeholders
/// are replaced with deep copies of the bound nodes.
pub fn parse_fragment(
    tree: &mut SyntaxTree,
    source: &str,
    bindings: &HashMap<String, NodeId>,
) -> Result<NodeId, Diagnostic> {
    let mut p = Parser::new(source, tree, bindings)?;
    let id = p.statement()?;
    p.expect_eof()?;
    Ok(id)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<(Token, Span)>,
    pos: usize,
    tree: &'a mut SyntaxTree,
    bindings: &'a HashMap<String, NodeId>,
}

impl<'a> Parser<'a> {
    fn new(
        src: &'a str,
        tree: &'a mut SyntaxTree,
        bindings: &'a HashMap<String, NodeId>,
    ) -> Result<Self, Diagnostic> {
        let result = lex(src);
        if let Some(e) = result.errors.first() {
            return Err(Diagnostic::error(codes::E0100, e.span, e.message.clone()));
        }
        Ok(Self {
            src,
            tokens: result.tokens,
            pos: 0,
            tree,
            bindings,
        })
    }

    // ── Cursor ──

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn cur_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, s)) => *s,
            None => {
                let end = self.src.len();
                Span { start: end, end }
            }
        }
    }

    fn advance(&mut self) -> Option<(Token, Span)> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, t: &Token) -> bool {
        if self.peek() == Some(t) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, t: &Token, what: &str) -> Result<Span, Diagnostic> {
        let span = self.cur_span();
        if self.eat(t) {
            Ok(span)
        } else {
            Err(self.err(span, format!("expected {what}")))
        }
    }

    fn save(&self) -> usize {
        self.pos
    }

    fn restore(&mut self, p: usize) {
        self.pos = p;
    }

    fn err(&self, span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(codes::E0200, span, message)
    }

    fn expect_eof(&self) -> Result<(), Diagnostic> {
        if self.pos < self.tokens.len() {
            return Err(self.err(self.cur_span(), "unexpected trailing input"));
        }
        Ok(())
    }

    fn ident(&mut self) -> Result<(String, Span), Diagnostic> {
        let span = self.cur_span();
        match self.peek() {
            Some(Token::Ident) => {
                self.pos += 1;
                Ok((self.src[span.start..span.end].to_string(), span))
            }
            _ => Err(self.err(span, "expected identifier")),
        }
    }

    // ── Items ──

    fn items(&mut self) -> Result<Vec<Item>, Diagnostic> {
        let mut items = Vec::new();
        while self.peek().is_some() {
            items.push(self.item()?);
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Item, Diagnostic> {
        match self.peek() {
            Some(Token::Template) => self.template_item(),
            Some(Token::Struct) => Ok(Item::Struct(self.struct_def()?)),
            _ => self.global_or_function(),
        }
    }

    fn template_item(&mut self) -> Result<Item, Diagnostic> {
        let start = self.cur_span();
        self.expect(&Token::Template, "`template`")?;
        let params = self.template_params()?;
        match self.peek() {
            Some(Token::Struct) => {
                let def = self.struct_def()?;
                let span = start.to(def.span);
                Ok(Item::TemplateStruct(TemplateStructDef { params, def, span }))
            }
            _ => {
                let ret = self.type_name()?;
                let (name, _) = self.ident()?;
                let mut def = self.function_rest(ret, name, start)?;
                def.template_params = params;
                Ok(Item::Function(def))
            }
        }
    }

    fn template_params(&mut self) -> Result<Vec<TemplateParamDef>, Diagnostic> {
        self.expect(&Token::Lt, "`<`")?;
        let mut params = Vec::new();
        loop {
            let kind = match self.peek() {
                Some(Token::Typename) => {
                    self.pos += 1;
                    TemplateParamKind::Type
                }
                Some(Token::Int) => {
                    self.pos += 1;
                    TemplateParamKind::Int
                }
                _ => {
                    return Err(self.err(self.cur_span(), "expected `typename` or `int` parameter"))
                }
            };
            let (name, _) = self.ident()?;
            params.push(TemplateParamDef { name, kind });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::Gt, "`>` after template parameters")?;
        Ok(params)
    }

    fn struct_def(&mut self) -> Result<StructDef, Diagnostic> {
        let start = self.expect(&Token::Struct, "`struct`")?;
        let (name, _) = self.ident()?;
        self.expect(&Token::LBrace, "`{` after struct name")?;

        let mut def = StructDef {
            name,
            vars: Vec::new(),
            funcs: Vec::new(),
            is_node: false,
            span: start,
        };
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.err(self.cur_span(), "unterminated struct body"));
            }
            // DECLARE_NODE(Name);
            if self.peek() == Some(&Token::Ident) {
                let span = self.cur_span();
                if &self.src[span.start..span.end] == "DECLARE_NODE" {
                    self.pos += 1;
                    self.expect(&Token::LParen, "`(`")?;
                    self.ident()?;
                    self.expect(&Token::RParen, "`)`")?;
                    self.expect(&Token::Semicolon, "`;`")?;
                    def.is_node = true;
                    continue;
                }
            }
            let template_params = if self.peek() == Some(&Token::Template) {
                self.pos += 1;
                self.template_params()?
            } else {
                Vec::new()
            };
            let member_start = self.cur_span();
            let ty = self.type_name()?;
            let (name, name_span) = self.ident()?;
            if self.peek() == Some(&Token::LParen) {
                let mut f = self.function_rest(ty, name, member_start)?;
                f.template_params = template_params;
                def.funcs.push(f);
            } else {
                if !template_params.is_empty() {
                    return Err(self.err(name_span, "only member functions may be templates"));
                }
                let (init, braced) = self.var_init()?;
                self.expect(&Token::Semicolon, "`;` after member")?;
                def.vars.push(MemberVarDef {
                    name,
                    ty,
                    init,
                    braced,
                    span: member_start,
                });
            }
        }
        self.eat(&Token::Semicolon);
        def.span = start.to(self.cur_span());
        Ok(def)
    }

    fn var_init(&mut self) -> Result<(Option<NodeId>, bool), Diagnostic> {
        if !self.eat(&Token::Assign) {
            return Ok((None, false));
        }
        if self.eat(&Token::LBrace) {
            let e = self.expression()?;
            self.expect(&Token::RBrace, "`}` after brace initializer")?;
            Ok((Some(e), true))
        } else {
            Ok((Some(self.expression()?), false))
        }
    }

    fn global_or_function(&mut self) -> Result<Item, Diagnostic> {
        let start = self.cur_span();
        let ty = self.type_name()?;
        let (name, _) = self.ident()?;
        if self.peek() == Some(&Token::LParen) {
            return Ok(Item::Function(self.function_rest(ty, name, start)?));
        }
        let init = if self.eat(&Token::Assign) {
            if self.eat(&Token::LBrace) {
                let mut elems = vec![self.expression()?];
                while self.eat(&Token::Comma) {
                    elems.push(self.expression()?);
                }
                self.expect(&Token::RBrace, "`}` after initializer list")?;
                GlobalInit::Braced(elems)
            } else {
                GlobalInit::Expr(self.expression()?)
            }
        } else {
            GlobalInit::None
        };
        let end = self.expect(&Token::Semicolon, "`;` after global definition")?;
        Ok(Item::Global(GlobalDef {
            name,
            ty,
            init,
            span: start.to(end),
        }))
    }

    fn function_rest(
        &mut self,
        ret: TypeName,
        name: String,
        start: Span,
    ) -> Result<FunctionDef, Diagnostic> {
        self.expect(&Token::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                let ty = self.type_name()?;
                let (pname, _) = self.ident()?;
                params.push(ParamDef { name: pname, ty });
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "`)` after parameters")?;
        let body = self.block()?;
        Ok(FunctionDef {
            name,
            ret,
            params,
            template_params: Vec::new(),
            body,
            span: start.to(self.tree.span(body)),
        })
    }

    // ── Types ──

    fn type_name(&mut self) -> Result<TypeName, Diagnostic> {
        let span = self.cur_span();
        match self.peek() {
            Some(Token::Void) => {
                self.pos += 1;
                Ok(TypeName::Void)
            }
            Some(Token::Int) => {
                self.pos += 1;
                Ok(TypeName::Int)
            }
            Some(Token::Float) => {
                self.pos += 1;
                Ok(TypeName::Float)
            }
            Some(Token::Double) => {
                self.pos += 1;
                Ok(TypeName::Double)
            }
            Some(Token::Block) => {
                self.pos += 1;
                Ok(TypeName::Block)
            }
            Some(Token::Event) => {
                self.pos += 1;
                Ok(TypeName::Event)
            }
            Some(Token::Span_) => {
                self.pos += 1;
                self.expect(&Token::Lt, "`<` after `span`")?;
                let elem = self.type_name()?;
                self.expect(&Token::Comma, "`,` in span type")?;
                let len = self.const_arg()?;
                self.expect(&Token::Gt, "`>` after span length")?;
                Ok(TypeName::Span(Box::new(elem), len))
            }
            Some(Token::Ident) => {
                let path = self.path()?;
                let args = if self.peek() == Some(&Token::Lt) {
                    self.pos += 1;
                    let args = self.template_args()?;
                    self.expect(&Token::Gt, "`>` after template arguments")?;
                    args
                } else {
                    Vec::new()
                };
                Ok(TypeName::Named(path, args))
            }
            _ => Err(self.err(span, "expected type")),
        }
    }

    fn path(&mut self) -> Result<Path, Diagnostic> {
        let (first, _) = self.ident()?;
        let mut parts = vec![first];
        while self.peek() == Some(&Token::DoubleColon) {
            self.pos += 1;
            let (next, _) = self.path_segment()?;
            parts.push(next);
        }
        Ok(Path(parts))
    }

    /// A path segment after `::`. Type keywords are valid segments here:
    /// the wrapper library names `wrap::event` with the event keyword.
    fn path_segment(&mut self) -> Result<(String, Span), Diagnostic> {
        let span = self.cur_span();
        match self.peek() {
            Some(Token::Ident | Token::Event | Token::Block | Token::Span_) => {
                self.pos += 1;
                Ok((self.src[span.start..span.end].to_string(), span))
            }
            _ => Err(self.err(span, "expected identifier")),
        }
    }

    fn const_arg(&mut self) -> Result<ConstArg, Diagnostic> {
        let span = self.cur_span();
        match self.peek().cloned() {
            Some(Token::IntLit(v)) => {
                self.pos += 1;
                Ok(ConstArg::Literal(v))
            }
            Some(Token::Ident) => {
                let (name, _) = self.ident()?;
                Ok(ConstArg::Name(name))
            }
            _ => Err(self.err(span, "expected constant template argument")),
        }
    }

    fn template_args(&mut self) -> Result<Vec<TemplateArgSyntax>, Diagnostic> {
        let mut args = Vec::new();
        loop {
            let arg = match self.peek().cloned() {
                Some(Token::IntLit(v)) => {
                    self.pos += 1;
                    TemplateArgSyntax::Const(ConstArg::Literal(v))
                }
                _ => TemplateArgSyntax::Type(self.type_name()?),
            };
            args.push(arg);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(args)
    }

    // ── Statements ──

    fn block(&mut self) -> Result<NodeId, Diagnostic> {
        let start = self.expect(&Token::LBrace, "`{`")?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.peek().is_none() {
                return Err(self.err(self.cur_span(), "unterminated block"));
            }
            stmts.push(self.statement()?);
        }
        Ok(self
            .tree
            .alloc(StatementKind::Block(stmts), start.to(self.cur_span())))
    }

    fn statement(&mut self) -> Result<NodeId, Diagnostic> {
        let start = self.cur_span();
        match self.peek() {
            Some(Token::LBrace) => self.block(),
            Some(Token::If) => {
                self.pos += 1;
                self.expect(&Token::LParen, "`(` after `if`")?;
                let cond = self.expression()?;
                self.expect(&Token::RParen, "`)` after condition")?;
                let then_body = self.statement()?;
                let else_body = if self.eat(&Token::Else) {
                    Some(self.statement()?)
                } else {
                    None
                };
                Ok(self.tree.alloc(
                    StatementKind::If {
                        cond,
                        then_body,
                        else_body,
                    },
                    start,
                ))
            }
            Some(Token::While) => {
                self.pos += 1;
                self.expect(&Token::LParen, "`(` after `while`")?;
                let cond = self.expression()?;
                self.expect(&Token::RParen, "`)` after condition")?;
                let body = self.statement()?;
                Ok(self.tree.alloc(StatementKind::Loop { cond, body }, start))
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = if self.peek() == Some(&Token::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(&Token::Semicolon, "`;` after return")?;
                Ok(self.tree.alloc(StatementKind::Return { value }, start))
            }
            _ => self.declaration_or_expression(),
        }
    }

    /// Disambiguate `float x = ...;` from an expression statement by
    /// speculatively parsing a type followed by an identifier.
    fn declaration_or_expression(&mut self) -> Result<NodeId, Diagnostic> {
        let start = self.cur_span();
        let mark = self.save();
        if let Ok(declared) = self.type_name() {
            if self.peek() == Some(&Token::Ident)
                && matches!(self.peek_at(1), Some(Token::Assign) | Some(Token::Semicolon))
            {
                let (name, _) = self.ident()?;
                let init = if self.eat(&Token::Assign) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(&Token::Semicolon, "`;` after declaration")?;
                return Ok(self.tree.alloc(
                    StatementKind::VarDecl {
                        name,
                        declared,
                        init,
                        target: None,
                    },
                    start,
                ));
            }
        }
        self.restore(mark);
        let e = self.expression()?;
        self.expect(&Token::Semicolon, "`;` after expression")?;
        Ok(e)
    }

    // ── Expressions ──

    fn expression(&mut self) -> Result<NodeId, Diagnostic> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<NodeId, Diagnostic> {
        let start = self.cur_span();
        let target = self.ternary()?;
        let op = match self.peek() {
            Some(Token::Assign) => AssignOp::Set,
            Some(Token::PlusAssign) => AssignOp::Add,
            Some(Token::MinusAssign) => AssignOp::Sub,
            Some(Token::StarAssign) => AssignOp::Mul,
            Some(Token::SlashAssign) => AssignOp::Div,
            _ => return Ok(target),
        };
        self.pos += 1;
        let value = self.assignment()?;
        Ok(self
            .tree
            .alloc(StatementKind::Assignment { op, target, value }, start))
    }

    fn ternary(&mut self) -> Result<NodeId, Diagnostic> {
        let start = self.cur_span();
        let cond = self.logical_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let if_true = self.expression()?;
        self.expect(&Token::Colon, "`:` in ternary")?;
        let if_false = self.ternary()?;
        Ok(self.tree.alloc(
            StatementKind::Ternary {
                cond,
                if_true,
                if_false,
            },
            start,
        ))
    }

    fn logical_or(&mut self) -> Result<NodeId, Diagnostic> {
        let mut lhs = self.logical_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.logical_and()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> Result<NodeId, Diagnostic> {
        let mut lhs = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality()?;
            lhs = self.binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<NodeId, Diagnostic> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.relational()?;
            lhs = self.binary(op, lhs, rhs);
        }
    }

    fn relational(&mut self) -> Result<NodeId, Diagnostic> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.additive()?;
            lhs = self.binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<NodeId, Diagnostic> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = self.binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<NodeId, Diagnostic> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = self.binary(op, lhs, rhs);
        }
    }

    fn binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        let span = self.tree.span(lhs).to(self.tree.span(rhs));
        self.tree.alloc(StatementKind::Binary { op, lhs, rhs }, span)
    }

    fn unary(&mut self) -> Result<NodeId, Diagnostic> {
        let start = self.cur_span();
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(self
                    .tree
                    .alloc(StatementKind::Unary { op: UnaryOp::Neg, operand }, start))
            }
            Some(Token::Not) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(self
                    .tree
                    .alloc(StatementKind::Unary { op: UnaryOp::Not, operand }, start))
            }
            // C cast: `(float)expr`
            Some(Token::LParen)
                if matches!(
                    self.peek_at(1),
                    Some(Token::Int) | Some(Token::Float) | Some(Token::Double)
                ) && self.peek_at(2) == Some(&Token::RParen) =>
            {
                self.pos += 1;
                let target = self.type_name()?;
                self.expect(&Token::RParen, "`)` after cast type")?;
                let operand = self.unary()?;
                Ok(self
                    .tree
                    .alloc(StatementKind::Cast { target, operand }, start))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<NodeId, Diagnostic> {
        let mut e = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let (name, span) = self.ident()?;
                    let template_args = self.speculate_template_args()?;
                    if self.peek() == Some(&Token::LParen) {
                        let args = self.call_args()?;
                        e = self.tree.alloc(
                            StatementKind::Call(CallData {
                                callee: Callee::Member(name),
                                object: Some(e),
                                args,
                                template_args,
                                resolved: None,
                            }),
                            span,
                        );
                    } else {
                        e = self.tree.alloc(
                            StatementKind::Member {
                                base: e,
                                name,
                                offset: None,
                            },
                            span,
                        );
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    let end = self.expect(&Token::RBracket, "`]` after index")?;
                    let span = self.tree.span(e).to(end);
                    e = self
                        .tree
                        .alloc(StatementKind::Subscript { base: e, index }, span);
                }
                Some(Token::LParen) => {
                    let span = self.tree.span(e);
                    let path = self.take_path(e)?;
                    let args = self.call_args()?;
                    e = self.tree.alloc(
                        StatementKind::Call(CallData {
                            callee: Callee::Path(path),
                            object: None,
                            args,
                            template_args: Vec::new(),
                            resolved: None,
                        }),
                        span,
                    );
                }
                Some(Token::Lt) if self.is_symbol_ref(e) => {
                    let template_args = self.speculate_template_args()?;
                    if template_args.is_empty() {
                        return Ok(e);
                    }
                    let span = self.tree.span(e);
                    let path = self.take_path(e)?;
                    let args = self.call_args()?;
                    e = self.tree.alloc(
                        StatementKind::Call(CallData {
                            callee: Callee::Path(path),
                            object: None,
                            args,
                            template_args,
                            resolved: None,
                        }),
                        span,
                    );
                }
                _ => return Ok(e),
            }
        }
    }

    fn is_symbol_ref(&self, e: NodeId) -> bool {
        matches!(self.tree.node(e).kind, StatementKind::SymbolRef { .. })
    }

    /// Attempt `<args>` at a call position. Keeps the parse only when the
    /// closing `>` is immediately followed by `(`; otherwise the cursor is
    /// restored and the `<` is treated as less-than.
    fn speculate_template_args(&mut self) -> Result<Vec<TemplateArgSyntax>, Diagnostic> {
        if self.peek() != Some(&Token::Lt) {
            return Ok(Vec::new());
        }
        let mark = self.save();
        self.pos += 1;
        let attempt = (|| -> Result<Vec<TemplateArgSyntax>, Diagnostic> {
            let args = self.template_args()?;
            self.expect(&Token::Gt, "`>`")?;
            Ok(args)
        })();
        match attempt {
            Ok(args) if self.peek() == Some(&Token::LParen) => Ok(args),
            _ => {
                self.restore(mark);
                Ok(Vec::new())
            }
        }
    }

    fn take_path(&mut self, e: NodeId) -> Result<Path, Diagnostic> {
        match &self.tree.node(e).kind {
            StatementKind::SymbolRef { path, .. } => Ok(path.clone()),
            _ => Err(self.err(self.tree.span(e), "expression is not callable")),
        }
    }

    fn call_args(&mut self) -> Result<Vec<NodeId>, Diagnostic> {
        self.expect(&Token::LParen, "`(`")?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(&Token::RParen, "`)` after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<NodeId, Diagnostic> {
        let span = self.cur_span();
        match self.peek().cloned() {
            Some(Token::IntLit(v)) => {
                self.pos += 1;
                Ok(self.tree.alloc(
                    StatementKind::Immediate(crate::types::ConstValue::Int(v)),
                    span,
                ))
            }
            Some(Token::FloatLit(v)) => {
                self.pos += 1;
                Ok(self.tree.alloc(
                    StatementKind::Immediate(crate::types::ConstValue::Float(v)),
                    span,
                ))
            }
            Some(Token::DoubleLit(v)) => {
                self.pos += 1;
                Ok(self.tree.alloc(
                    StatementKind::Immediate(crate::types::ConstValue::Double(v)),
                    span,
                ))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let e = self.expression()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(e)
            }
            Some(Token::Ident) => {
                let path = self.path()?;
                Ok(self
                    .tree
                    .alloc(StatementKind::SymbolRef { path, target: None }, span))
            }
            Some(Token::Dollar) => {
                self.pos += 1;
                let (name, nspan) = self.ident()?;
                match self.bindings.get(&name) {
                    Some(&bound) => Ok(self.tree.clone_subtree(bound)),
                    None => Err(self.err(nspan, format!("unknown fragment binding `${name}`"))),
                }
            }
            _ => Err(self.err(span, "expected expression")),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(src: &str) -> (SyntaxTree, NodeId) {
        let mut tree = SyntaxTree::new();
        let bindings = HashMap::new();
        let id = {
            let mut p = Parser::new(src, &mut tree, &bindings).unwrap();
            let e = p.expression().unwrap();
            p.expect_eof().unwrap();
            e
        };
        (tree, id)
    }

    #[test]
    fn precedence_mul_binds_tighter() {
        let (tree, e) = parse_expr("1 + 2 * 3");
        let StatementKind::Binary { op, rhs, .. } = &tree.node(e).kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Add);
        let StatementKind::Binary { op, .. } = &tree.node(*rhs).kind else {
            panic!("expected nested binary");
        };
        assert_eq!(*op, BinaryOp::Mul);
    }

    #[test]
    fn template_call_disambiguated_from_less_than() {
        // template call form
        let (tree, e) = parse_expr("setParameter<0>(1.0)");
        let StatementKind::Call(c) = &tree.node(e).kind else {
            panic!("expected call");
        };
        assert_eq!(c.template_args.len(), 1);

        // plain comparison chain stays relational
        let (tree, e) = parse_expr("a < b");
        assert!(matches!(
            tree.node(e).kind,
            StatementKind::Binary { op: BinaryOp::Lt, .. }
        ));
    }

    #[test]
    fn member_chain_and_subscript() {
        let (tree, e) = parse_expr("obj.getWrappedObject().f[2]");
        let StatementKind::Subscript { base, .. } = &tree.node(e).kind else {
            panic!("expected subscript");
        };
        let StatementKind::Member { name, base, .. } = &tree.node(*base).kind else {
            panic!("expected member");
        };
        assert_eq!(name, "f");
        assert!(matches!(tree.node(*base).kind, StatementKind::Call(_)));
    }

    #[test]
    fn cast_expression() {
        let (tree, e) = parse_expr("(float)x * 2.0f");
        let StatementKind::Binary { lhs, .. } = &tree.node(e).kind else {
            panic!("expected binary");
        };
        assert!(matches!(tree.node(*lhs).kind, StatementKind::Cast { .. }));
    }

    #[test]
    fn function_item() {
        let unit = parse_unit("int main(int input) { return input + 7; }").unwrap();
        assert_eq!(unit.items.len(), 1);
        let Item::Function(f) = &unit.items[0] else {
            panic!("expected function");
        };
        assert_eq!(f.name, "main");
        assert_eq!(f.params.len(), 1);
        assert!(matches!(
            unit.tree.node(f.body).kind,
            StatementKind::Block(_)
        ));
    }

    #[test]
    fn struct_with_declare_node_and_members() {
        let src = "struct Gain {\n\
                   DECLARE_NODE(Gain);\n\
                   float value = 0.5f;\n\
                   span<float, 19> table = { 182.0f };\n\
                   void process(block b) { }\n\
                   template <int P> void setParameter(double v) { value = (float)v; }\n\
                   };";
        let unit = parse_unit(src).unwrap();
        let Item::Struct(s) = &unit.items[0] else {
            panic!("expected struct");
        };
        assert!(s.is_node);
        assert_eq!(s.vars.len(), 2);
        assert!(s.vars[1].braced);
        assert_eq!(s.funcs.len(), 2);
        assert_eq!(s.funcs[1].template_params.len(), 1);
    }

    #[test]
    fn template_struct_and_global_with_template_type() {
        let src = "template <typename T, int N> struct holder { T obj; };\n\
                   wrap::fix<2, Gain> n;";
        let unit = parse_unit(src).unwrap();
        assert!(matches!(unit.items[0], Item::TemplateStruct(_)));
        let Item::Global(g) = &unit.items[1] else {
            panic!("expected global");
        };
        let TypeName::Named(path, args) = &g.ty else {
            panic!("expected named type");
        };
        assert_eq!(path.to_string(), "wrap::fix");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn type_keyword_as_path_segment() {
        // `event` is a keyword, but `wrap::event` must still name the wrapper
        let unit = parse_unit("wrap::event<wrap::fix<2, Gain>> n;").unwrap();
        let Item::Global(g) = &unit.items[0] else {
            panic!("expected global");
        };
        let TypeName::Named(path, args) = &g.ty else {
            panic!("expected named type");
        };
        assert_eq!(path.to_string(), "wrap::event");
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn fragment_bindings_substitute_clones() {
        let mut tree = SyntaxTree::new();
        let bound = tree.alloc(
            StatementKind::Immediate(crate::types::ConstValue::Int(8)),
            Span { start: 0, end: 0 },
        );
        let mut bindings = HashMap::new();
        bindings.insert("N".to_string(), bound);
        let frag = parse_fragment(&mut tree, "{ int i = 0; i += $N; }", &bindings).unwrap();
        let StatementKind::Block(stmts) = &tree.node(frag).kind else {
            panic!("expected block");
        };
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn unknown_binding_is_parse_error() {
        let mut tree = SyntaxTree::new();
        let bindings = HashMap::new();
        let err = parse_fragment(&mut tree, "{ return $missing; }", &bindings).unwrap_err();
        assert_eq!(err.code, Some(codes::E0200));
    }

    #[test]
    fn first_error_aborts() {
        let err = parse_unit("int main( { }").unwrap_err();
        assert_eq!(err.code, Some(codes::E0200));
    }

    #[test]
    fn while_and_if_statements() {
        let src = "int f(int n) {\n\
                   int acc = 0;\n\
                   int i = 0;\n\
                   while (i < n) { if (i % 2 == 0) acc += i; else acc -= 1; i += 1; }\n\
                   return acc;\n\
                   }";
        let unit = parse_unit(src).unwrap();
        let Item::Function(f) = &unit.items[0] else {
            panic!("expected function");
        };
        let StatementKind::Block(stmts) = &unit.tree.node(f.body).kind else {
            panic!("expected block");
        };
        assert_eq!(stmts.len(), 4);
        assert!(matches!(
            unit.tree.node(stmts[2]).kind,
            StatementKind::Loop { .. }
        ));
    }
}
