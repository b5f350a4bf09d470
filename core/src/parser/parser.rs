//! Recursive-descent parser.
//!
//! Expressions are built so that the compound evaluator's flat left-to-right
//! fold respects precedence: every precedence level that has an operator
//! becomes one compound, and tighter-binding sub-expressions are nested
//! compounds inside it.

use std::collections::BTreeMap;

use ecow::EcoString;
use hashbrown::HashSet;
use tracing::trace;

use crate::analyzer::fold::constant_value;
use crate::parser::ast::{Ast, Callee, ConstantRef, NodeId, NodeKind};
use crate::parser::error::ParseError;
use crate::parser::syntax::{BinaryOp, Span, Swizzle, UnaryOp};
use crate::parser::token::{IdentRef, Token, TokenKind};
use crate::parser::tokenizer::tokenize;
use crate::parser::variables::{VarId, VariableKind, VariableTable};
use crate::stdlib::functions;
use crate::vm::context::EngineContext;
use crate::vm::value::{MAX_LANES, Value, ValueType};

/// Deepest nesting of blocks and sub-expressions the parser accepts.
pub const MAX_DEPTH: usize = 128;

/// `validate <target> == <expected>;`
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub target: VarId,
    pub name: EcoString,
    pub expected: Value,
    /// Source text of the rule, for reports.
    pub text: EcoString,
    pub span: Span,
}

/// Result of parsing: the syntax tree and everything the declarations
/// contributed.
#[derive(Debug, Clone)]
pub struct ParsedScript {
    pub source: String,
    pub ast: Ast,
    pub variables: VariableTable,
    pub defines: BTreeMap<EcoString, EcoString>,
    pub rules: Vec<ValidationRule>,
}

/// Output of [`parse_tokens`].
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub ast: Ast,
    pub defines: BTreeMap<EcoString, EcoString>,
    pub rules: Vec<ValidationRule>,
}

/// Tokenizes and parses `source`.
pub fn parse(source: &str, context: &EngineContext) -> Result<ParsedScript, ParseError> {
    let mut variables = VariableTable::new();
    let tokens = tokenize(source, &mut variables, context)?;
    let output = parse_tokens(source, &tokens, &mut variables, context)?;
    Ok(ParsedScript {
        source: source.to_string(),
        ast: output.ast,
        variables,
        defines: output.defines,
        rules: output.rules,
    })
}

/// Parses a token stream produced by [`tokenize`] over the same table.
pub fn parse_tokens(
    source: &str,
    tokens: &[Token],
    variables: &mut VariableTable,
    context: &EngineContext,
) -> Result<ParseOutput, ParseError> {
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        ast: Ast::new(),
        variables,
        context,
        defines: BTreeMap::new(),
        rules: Vec::new(),
        known: HashSet::new(),
        depth: 0,
    };
    parser.program()?;
    trace!(nodes = parser.ast.len(), "Parsed program");
    Ok(ParseOutput {
        ast: parser.ast,
        defines: parser.defines,
        rules: parser.rules,
    })
}

type ParseResult<T> = Result<T, ParseError>;

const BINARY_LEVELS: [&[(TokenKind, BinaryOp)]; 5] = [
    &[(TokenKind::OrOr, BinaryOp::Or)],
    &[(TokenKind::AndAnd, BinaryOp::And)],
    &[
        (TokenKind::EqEq, BinaryOp::Eq),
        (TokenKind::NotEq, BinaryOp::Ne),
        (TokenKind::Lt, BinaryOp::Lt),
        (TokenKind::Le, BinaryOp::Le),
        (TokenKind::Gt, BinaryOp::Gt),
        (TokenKind::Ge, BinaryOp::Ge),
    ],
    &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
    &[
        (TokenKind::Star, BinaryOp::Mul),
        (TokenKind::Slash, BinaryOp::Div),
        (TokenKind::Percent, BinaryOp::Mod),
    ],
];

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
    ast: Ast,
    variables: &'a mut VariableTable,
    context: &'a EngineContext,
    defines: BTreeMap<EcoString, EcoString>,
    rules: Vec<ValidationRule>,
    /// Variables declared or assigned so far, in source order.
    known: HashSet<VarId>,
    depth: usize,
}

impl<'a> Parser<'a> {
    // === Token cursor ===

    fn peek(&self) -> &'a Token {
        let tokens: &'a [Token] = self.tokens;
        &tokens[self.pos.min(tokens.len().saturating_sub(1))]
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<&'a Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        ParseError::UnexpectedToken {
            expected: expected.into(),
            found: token.kind,
            span: token.span.clone(),
        }
    }

    /// End of the last consumed token.
    fn prev_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map(|t| t.span.end())
            .unwrap_or(0)
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.prev_end().max(start))
    }

    fn text(&self, token: &Token) -> EcoString {
        token.text(self.source).into()
    }

    fn integer(&self, token: &Token) -> ParseResult<usize> {
        match token.number {
            Some(x) if x >= 0.0 && x.fract() == 0.0 => Ok(x as usize),
            _ => Err(ParseError::InvalidNumber {
                text: self.text(token),
                span: token.span.clone(),
            }),
        }
    }

    /// Runs `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::MaxDepthExceeded {
                max_depth: MAX_DEPTH,
                span: self.peek().span.clone(),
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // === Statements ===

    fn program(&mut self) -> ParseResult<()> {
        let root = self.ast.root();
        while self.peek_kind() != TokenKind::Eof {
            self.statement(root)?;
        }
        let end = self.source.len();
        self.ast.node_mut(root).span = Span::new(0, end);
        Ok(())
    }

    fn statement(&mut self, parent: NodeId) -> ParseResult<()> {
        let node = match self.peek_kind() {
            TokenKind::Input => return self.declaration(VariableKind::Input),
            TokenKind::Output => return self.declaration(VariableKind::Output),
            TokenKind::InOut => return self.declaration(VariableKind::InOut),
            TokenKind::Define => return self.define(),
            TokenKind::Validate => return self.validate(),
            TokenKind::Semicolon => {
                self.advance();
                return Ok(());
            }
            TokenKind::If => self.if_statement()?,
            TokenKind::While => self.while_statement()?,
            TokenKind::For => self.for_statement()?,
            TokenKind::Switch => self.switch_statement()?,
            TokenKind::Yield => self.yield_statement()?,
            TokenKind::LBrace => self.block()?,
            TokenKind::Ident => {
                let node = self.assignment()?;
                self.expect(TokenKind::Semicolon, "';'")?;
                node
            }
            _ => return Err(self.unexpected("statement")),
        };
        self.ast.push_child(parent, node);
        Ok(())
    }

    fn declaration(&mut self, kind: VariableKind) -> ParseResult<()> {
        self.advance();
        let value_type = if self.eat(TokenKind::Id) {
            ValueType::Id
        } else {
            ValueType::Numeric
        };
        let name_token = self.expect(TokenKind::Ident, "variable name")?;
        let name = self.text(name_token);
        let id = match name_token.ident {
            Some(IdentRef::Variable(id))
                if self.variables.get(id).kind == VariableKind::Undeclared
                    && !self.known.contains(&id) =>
            {
                id
            }
            _ => {
                return Err(ParseError::DuplicateDeclaration {
                    name,
                    span: name_token.span.clone(),
                });
            }
        };

        let mut size = 1;
        if self.eat(TokenKind::LBracket) {
            let token = self.expect(TokenKind::Number, "vector size")?;
            size = self.integer(token)?;
            let valid = (1..=MAX_LANES).contains(&size) && (size == 1 || value_type == ValueType::Numeric);
            if !valid {
                return Err(ParseError::InvalidVectorSize {
                    size,
                    span: token.span.clone(),
                });
            }
            self.expect(TokenKind::RBracket, "']'")?;
        }
        let pinned_offset = if self.eat(TokenKind::At) {
            let token = self.expect(TokenKind::Number, "byte offset")?;
            Some(self.integer(token)?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon, "';'")?;

        self.variables.declare(id, kind);
        let var = self.variables.get_mut(id);
        var.vector_size = Some(size as u8);
        var.value_type = value_type;
        var.pinned_offset = pinned_offset;
        var.span = name_token.span.clone();
        self.known.insert(id);
        Ok(())
    }

    fn define(&mut self) -> ParseResult<()> {
        self.advance();
        let key = self.expect(TokenKind::Ident, "define name")?;
        self.expect(TokenKind::Assign, "'='")?;
        let negative = self.eat(TokenKind::Minus);
        let value = match self.peek_kind() {
            TokenKind::Number => self.advance(),
            TokenKind::Ident if !negative => self.advance(),
            _ => return Err(self.unexpected("number or identifier")),
        };
        self.expect(TokenKind::Semicolon, "';'")?;
        let mut text = EcoString::new();
        if negative {
            text.push('-');
        }
        text.push_str(value.text(self.source));
        self.defines.insert(self.text(key), text);
        Ok(())
    }

    fn validate(&mut self) -> ParseResult<()> {
        let start = self.advance().span.start();
        let target_token = self.expect(TokenKind::Ident, "variable name")?;
        let name = self.text(target_token);
        let target = match target_token.ident {
            Some(IdentRef::Variable(id)) => id,
            _ => {
                return Err(ParseError::NotAValue {
                    name,
                    span: target_token.span.clone(),
                });
            }
        };
        self.expect(TokenKind::EqEq, "'=='")?;
        let expr = self.expression()?;
        let expected = constant_value(&self.ast, expr, &self.context.constants, &*self.variables)
            .ok_or_else(|| ParseError::NotConstant {
                span: self.ast.node(expr).span.clone(),
            })?;
        let span = self.span_from(start);
        let text = EcoString::from(span.str_of(self.source));
        self.expect(TokenKind::Semicolon, "';'")?;
        self.rules.push(ValidationRule {
            target,
            name,
            expected,
            text,
            span,
        });
        Ok(())
    }

    /// `target[.swizzle] = expr`, without the trailing `;`.
    fn assignment(&mut self) -> ParseResult<NodeId> {
        let target_token = self.expect(TokenKind::Ident, "assignment target")?;
        let name = self.text(target_token);
        let span = target_token.span.clone();
        let target = match target_token.ident {
            Some(IdentRef::Variable(id)) => id,
            Some(IdentRef::Constant(_)) => {
                return Err(ParseError::AssignToConstant { name, span });
            }
            _ => return Err(ParseError::NotAValue { name, span }),
        };
        if self.variables.get(target).kind == VariableKind::Input {
            return Err(ParseError::AssignToInput { name, span });
        }
        let swizzle = self.swizzle_suffix()?;
        if swizzle.is_some() && !self.known.contains(&target) {
            return Err(ParseError::UnresolvedIdentifier { name, span });
        }
        self.expect(TokenKind::Assign, "'='")?;
        let value = self.expression()?;

        if self.variables.get(target).kind == VariableKind::Undeclared {
            self.variables.declare(target, VariableKind::Local);
            self.variables.get_mut(target).span = span.clone();
        }
        self.known.insert(target);

        let node = self.ast.add(
            NodeKind::Assignment { target, swizzle },
            self.span_from(span.start()),
        );
        self.ast.push_child(node, value);
        Ok(node)
    }

    fn block(&mut self) -> ParseResult<NodeId> {
        self.nested(Self::block_body)
    }

    fn block_body(&mut self) -> ParseResult<NodeId> {
        let start = self.expect(TokenKind::LBrace, "'{'")?.span.start();
        let block = self.ast.add(NodeKind::Block, Span::default());
        while !matches!(self.peek_kind(), TokenKind::RBrace | TokenKind::Eof) {
            self.statement(block)?;
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        self.ast.node_mut(block).span = self.span_from(start);
        Ok(block)
    }

    fn parenthesized_condition(&mut self) -> ParseResult<NodeId> {
        self.expect(TokenKind::LParen, "'('")?;
        let condition = self.expression()?;
        self.expect(TokenKind::RParen, "')'")?;
        Ok(condition)
    }

    fn if_statement(&mut self) -> ParseResult<NodeId> {
        let start = self.advance().span.start();
        let condition = self.parenthesized_condition()?;
        let then_block = self.block()?;
        let node = self.ast.add(NodeKind::If, Span::default());
        self.ast.push_child(node, condition);
        self.ast.push_child(node, then_block);
        if self.eat(TokenKind::Else) {
            let else_block = if self.peek_kind() == TokenKind::If {
                let nested_start = self.peek().span.start();
                let nested = self.nested(Self::if_statement)?;
                let block = self.ast.add(NodeKind::Block, self.span_from(nested_start));
                self.ast.push_child(block, nested);
                block
            } else {
                self.block()?
            };
            self.ast.push_child(node, else_block);
        }
        self.ast.node_mut(node).span = self.span_from(start);
        Ok(node)
    }

    fn while_statement(&mut self) -> ParseResult<NodeId> {
        let start = self.advance().span.start();
        let condition = self.parenthesized_condition()?;
        let body = self.block()?;
        let node = self.ast.add(NodeKind::While, self.span_from(start));
        self.ast.push_child(node, condition);
        self.ast.push_child(node, body);
        Ok(node)
    }

    fn for_statement(&mut self) -> ParseResult<NodeId> {
        let start = self.advance().span.start();
        let node = self.ast.add(NodeKind::For, Span::default());
        self.expect(TokenKind::LParen, "'('")?;
        if self.peek_kind() != TokenKind::Semicolon {
            let init = self.assignment()?;
            self.ast.push_dependency(node, init);
        }
        self.expect(TokenKind::Semicolon, "';'")?;
        let condition = self.expression()?;
        self.expect(TokenKind::Semicolon, "';'")?;
        let step = self.ast.add(NodeKind::Block, Span::default());
        if self.peek_kind() != TokenKind::RParen {
            let assignment = self.assignment()?;
            self.ast.node_mut(step).span = self.ast.node(assignment).span.clone();
            self.ast.push_child(step, assignment);
        }
        self.expect(TokenKind::RParen, "')'")?;
        let body = self.block()?;
        self.ast.push_child(node, condition);
        self.ast.push_child(node, body);
        self.ast.push_child(node, step);
        self.ast.node_mut(node).span = self.span_from(start);
        Ok(node)
    }

    fn switch_statement(&mut self) -> ParseResult<NodeId> {
        let start = self.advance().span.start();
        let subject = self.parenthesized_condition()?;
        let subject_span = self.ast.node(subject).span.clone();

        let temp = self.variables.add_hidden(subject_span.clone());
        self.known.insert(temp);
        let assign = self.ast.add(
            NodeKind::Assignment {
                target: temp,
                swizzle: None,
            },
            subject_span,
        );
        self.ast.push_child(assign, subject);
        let node = self.ast.add(NodeKind::Switch { subject: temp }, Span::default());
        self.ast.push_dependency(node, assign);

        self.expect(TokenKind::LBrace, "'{'")?;
        let mut seen_default = false;
        loop {
            let arm_start = self.peek().span.start();
            let arm = match self.peek_kind() {
                TokenKind::Case => {
                    self.advance();
                    let negative = self.eat(TokenKind::Minus);
                    let token = self.expect(TokenKind::Number, "case value")?;
                    let value = token.number.unwrap_or_default();
                    NodeKind::Case(if negative { -value } else { value })
                }
                TokenKind::Default if !seen_default => {
                    self.advance();
                    seen_default = true;
                    NodeKind::Default
                }
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                _ => return Err(self.unexpected("'case', 'default' or '}'")),
            };
            self.expect(TokenKind::Colon, "':'")?;
            let arm = self.ast.add(arm, Span::default());
            while !matches!(
                self.peek_kind(),
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::Eof
            ) {
                self.statement(arm)?;
            }
            self.ast.node_mut(arm).span = self.span_from(arm_start);
            self.ast.push_child(node, arm);
        }
        self.ast.node_mut(node).span = self.span_from(start);
        Ok(node)
    }

    fn yield_statement(&mut self) -> ParseResult<NodeId> {
        let start = self.advance().span.start();
        let mut frames = 1;
        if self.peek_kind() == TokenKind::Number {
            let token = self.advance();
            frames = self.integer(token)?;
            if !(1..=u8::MAX as usize).contains(&frames) {
                return Err(ParseError::InvalidNumber {
                    text: self.text(token),
                    span: token.span.clone(),
                });
            }
        }
        self.expect(TokenKind::Semicolon, "';'")?;
        Ok(self.ast.add(
            NodeKind::Yield {
                frames: frames as u8,
            },
            self.span_from(start),
        ))
    }

    // === Expressions ===

    fn expression(&mut self) -> ParseResult<NodeId> {
        self.nested(|parser| parser.binary(0))
    }

    fn binary_op(&self, level: usize) -> Option<BinaryOp> {
        let kind = self.peek_kind();
        BINARY_LEVELS[level]
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, op)| *op)
    }

    fn binary(&mut self, level: usize) -> ParseResult<NodeId> {
        if level == BINARY_LEVELS.len() {
            return self.unary();
        }
        let start = self.peek().span.start();
        let first = self.binary(level + 1)?;
        if self.binary_op(level).is_none() {
            return Ok(first);
        }
        let compound = self.ast.add(NodeKind::Compound, Span::default());
        self.ast.push_child(compound, first);
        while let Some(op) = self.binary_op(level) {
            let token = self.advance();
            let op_node = self.ast.add(NodeKind::Operator(op), token.span.clone());
            self.ast.push_child(compound, op_node);
            let rhs = self.binary(level + 1)?;
            self.ast.push_child(compound, rhs);
        }
        self.ast.node_mut(compound).span = self.span_from(start);
        Ok(compound)
    }

    fn unary(&mut self) -> ParseResult<NodeId> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.power(),
        };
        let token = self.advance();
        let start = token.span.start();
        let marker = self.ast.add(NodeKind::Unary(op), token.span.clone());
        let operand = self.nested(Self::unary)?;

        let compound = self.ast.add(NodeKind::Compound, Span::default());
        self.ast.push_child(compound, marker);
        let operand_node = self.ast.node(operand);
        let chained = operand_node.kind == NodeKind::Compound
            && operand_node.indexer.is_none()
            && operand_node
                .children
                .first()
                .is_some_and(|c| matches!(self.ast.kind(*c), NodeKind::Unary(_)));
        if chained {
            let children = self.ast.take_children(operand);
            for child in children {
                self.ast.push_child(compound, child);
            }
        } else {
            self.ast.push_child(compound, operand);
        }
        self.ast.node_mut(compound).span = self.span_from(start);
        Ok(compound)
    }

    fn power(&mut self) -> ParseResult<NodeId> {
        let start = self.peek().span.start();
        let base = self.postfix()?;
        if self.peek_kind() != TokenKind::Caret {
            return Ok(base);
        }
        let token = self.advance();
        let op = self.ast.add(NodeKind::Operator(BinaryOp::Pow), token.span.clone());
        let exponent = self.nested(Self::unary)?;
        let compound = self.ast.add(NodeKind::Compound, Span::default());
        self.ast.set_children(compound, [base, op, exponent]);
        self.ast.node_mut(compound).span = self.span_from(start);
        Ok(compound)
    }

    /// Parses a `.xyzw` / `[i]` suffix if one follows.
    fn swizzle_suffix(&mut self) -> ParseResult<Option<Swizzle>> {
        match self.peek_kind() {
            TokenKind::Swizzle => {
                let token = self.advance();
                let text = token.text(self.source);
                Swizzle::parse(&text[1..])
                    .map(Some)
                    .ok_or_else(|| ParseError::InvalidSwizzle {
                        text: text.into(),
                        span: token.span.clone(),
                    })
            }
            TokenKind::LBracket => {
                let start = self.advance().span.start();
                let token = self.expect(TokenKind::Number, "component index")?;
                let index = self.integer(token)?;
                self.expect(TokenKind::RBracket, "']'")?;
                let span = self.span_from(start);
                u8::try_from(index)
                    .ok()
                    .and_then(|i| Swizzle::from_components(&[i]))
                    .map(Some)
                    .ok_or_else(|| ParseError::InvalidSwizzle {
                        text: span.str_of(self.source).into(),
                        span,
                    })
            }
            _ => Ok(None),
        }
    }

    fn postfix(&mut self) -> ParseResult<NodeId> {
        let node = self.primary()?;
        let start = self.ast.node(node).span.start();
        while let Some(swizzle) = self.swizzle_suffix()? {
            let span = self.span_from(start);
            let combined = match self.ast.node(node).indexer {
                None => Some(swizzle),
                Some(inner) => inner.then(swizzle),
            };
            let combined = combined.ok_or_else(|| ParseError::InvalidSwizzle {
                text: span.str_of(self.source).into(),
                span: span.clone(),
            })?;
            let n = self.ast.node_mut(node);
            n.indexer = Some(combined);
            n.span = span;
        }
        Ok(node)
    }

    fn primary(&mut self) -> ParseResult<NodeId> {
        let token = self.peek();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                let value = token.number.unwrap_or_default();
                Ok(self.ast.add(NodeKind::Literal(value), token.span.clone()))
            }
            TokenKind::Ident => self.identifier(),
            TokenKind::LParen => self.parenthesized(),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn identifier(&mut self) -> ParseResult<NodeId> {
        let token = self.advance();
        let name = self.text(token);
        let span = token.span.clone();
        match token.ident {
            Some(IdentRef::Variable(id)) => {
                let callable = self.peek_kind() == TokenKind::LParen;
                if callable || !self.known.contains(&id) {
                    return Err(ParseError::UnresolvedIdentifier { name, span });
                }
                Ok(self.ast.add(NodeKind::Variable(id), span))
            }
            Some(IdentRef::Constant(index)) => Ok(self
                .ast
                .add(NodeKind::Constant(ConstantRef::Shared(index)), span)),
            Some(IdentRef::Builtin) => match functions::lookup(&name) {
                Some(function) => self.call(token, Callee::Builtin(function)),
                None => Err(ParseError::UnresolvedIdentifier { name, span }),
            },
            Some(IdentRef::External(id)) => self.call(token, Callee::External(id)),
            None => Err(ParseError::UnresolvedIdentifier { name, span }),
        }
    }

    fn call(&mut self, name_token: &Token, callee: Callee) -> ParseResult<NodeId> {
        let name = self.text(name_token);
        if self.peek_kind() != TokenKind::LParen {
            return Err(ParseError::NotAValue {
                name,
                span: name_token.span.clone(),
            });
        }
        self.advance();
        let node = self.ast.add(NodeKind::Function(callee), Span::default());
        let mut count = 0;
        if self.peek_kind() != TokenKind::RParen {
            loop {
                let arg = self.expression()?;
                self.ast.push_child(node, arg);
                count += 1;
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        let span = self.span_from(name_token.span.start());

        let (accepted, expected): (bool, EcoString) = match callee {
            Callee::Builtin(function) => (
                function.arity.accepts(count),
                function.arity.to_string().into(),
            ),
            Callee::External(id) => {
                let arity = self
                    .context
                    .functions
                    .get(id)
                    .map(|f| f.arity())
                    .unwrap_or_default();
                (arity == count, arity.to_string().into())
            }
        };
        if !accepted {
            return Err(ParseError::ArityMismatch {
                name,
                expected,
                found: count,
                span,
            });
        }
        self.ast.node_mut(node).span = span;
        Ok(node)
    }

    /// `(expr)` groups; `(a, b, ...)` builds a vector.
    fn parenthesized(&mut self) -> ParseResult<NodeId> {
        let start = self.advance().span.start();
        let first = self.expression()?;
        if self.eat(TokenKind::RParen) {
            return Ok(first);
        }
        let vector = self.ast.add(NodeKind::Compound, Span::default());
        self.ast.push_child(vector, first);
        while self.eat(TokenKind::Comma) {
            let element = self.expression()?;
            self.ast.push_child(vector, element);
        }
        self.expect(TokenKind::RParen, "',' or ')'")?;
        self.ast.node_mut(vector).span = self.span_from(start);
        Ok(vector)
    }
}
