//! Source text to token stream.

use logos::Logos;
use tracing::trace;

use crate::parser::error::ParseError;
use crate::parser::syntax::Span;
use crate::parser::token::{IdentRef, Token, TokenKind};
use crate::parser::variables::VariableTable;
use crate::stdlib::functions;
use crate::vm::context::EngineContext;

/// Rewrites a numeric literal into the form `f32::from_str` accepts.
///
/// Digit-group separators (`_`, `'`) are removed. When both `,` and `.` occur
/// the comma is taken as a thousands separator and dropped; a lone comma is a
/// locale decimal separator and becomes `.`. A trailing `f` is dropped.
pub fn normalize_numeric_literal(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_suffix(['f', 'F'])
        .unwrap_or(trimmed);
    let has_dot = trimmed.contains('.');
    trimmed
        .chars()
        .filter(|c| *c != '_' && *c != '\'')
        .filter_map(|c| match c {
            ',' if has_dot => None,
            ',' => Some('.'),
            c => Some(c),
        })
        .collect()
}

fn parse_number(text: &str, span: &Span) -> Result<f32, ParseError> {
    normalize_numeric_literal(text)
        .parse::<f32>()
        .ok()
        .filter(|x| x.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber {
            text: text.into(),
            span: span.clone(),
        })
}

/// Resolves an identifier: builtin function, external function, named
/// constant, and finally a variable interned on first sight.
fn resolve_ident(
    name: &str,
    span: &Span,
    variables: &mut VariableTable,
    context: &EngineContext,
) -> IdentRef {
    if functions::lookup(name).is_some() {
        IdentRef::Builtin
    } else if let Some(function) = context.functions.lookup(name) {
        IdentRef::External(function.id)
    } else if let Some(index) = context.constants.lookup_name(name) {
        IdentRef::Constant(index)
    } else {
        IdentRef::Variable(variables.intern(name, span.clone()))
    }
}

/// Tokenizes `source`, interning identifiers into `variables`. The returned
/// stream always ends with an [`TokenKind::Eof`] token.
pub fn tokenize(
    source: &str,
    variables: &mut VariableTable,
    context: &EngineContext,
) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::from(lexer.span());
        let kind = result.map_err(|()| ParseError::InvalidToken {
            text: lexer.slice().into(),
            span: span.clone(),
        })?;

        let mut token = Token {
            kind,
            span,
            number: None,
            ident: None,
        };
        match kind {
            TokenKind::Number => {
                token.number = Some(parse_number(lexer.slice(), &token.span)?);
            }
            TokenKind::Ident => {
                token.ident = Some(resolve_ident(
                    lexer.slice(),
                    &token.span,
                    variables,
                    context,
                ));
            }
            _ => {}
        }
        tokens.push(token);
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(source.len(), source.len()),
        number: None,
        ident: None,
    });
    trace!(count = tokens.len(), "Tokenized source");
    Ok(tokens)
}
