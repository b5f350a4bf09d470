//! Lexical and syntax errors.

use ecow::EcoString;

use crate::parser::syntax::Span;
use crate::parser::token::TokenKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid token '{text}'")]
    InvalidToken { text: EcoString, span: Span },

    #[error("invalid number '{text}'")]
    InvalidNumber { text: EcoString, span: Span },

    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: EcoString,
        found: TokenKind,
        span: Span,
    },

    #[error("unresolved identifier '{name}'")]
    UnresolvedIdentifier { name: EcoString, span: Span },

    #[error("'{name}' is already declared")]
    DuplicateDeclaration { name: EcoString, span: Span },

    #[error("'{name}' takes {expected} argument(s), found {found}")]
    ArityMismatch {
        name: EcoString,
        expected: EcoString,
        found: usize,
        span: Span,
    },

    #[error("invalid swizzle '{text}'")]
    InvalidSwizzle { text: EcoString, span: Span },

    #[error("vector size {size} is out of range (1 to 4)")]
    InvalidVectorSize { size: usize, span: Span },

    #[error("cannot assign to input '{name}'")]
    AssignToInput { name: EcoString, span: Span },

    #[error("'{name}' is a function and cannot be used as a value")]
    NotAValue { name: EcoString, span: Span },

    #[error("'{name}' is a constant and cannot be assigned")]
    AssignToConstant { name: EcoString, span: Span },

    #[error("expected a constant expression")]
    NotConstant { span: Span },

    #[error("nesting depth exceeds the maximum of {max_depth} levels")]
    MaxDepthExceeded { max_depth: usize, span: Span },
}

impl ParseError {
    pub fn span(&self) -> &Span {
        match self {
            ParseError::InvalidToken { span, .. }
            | ParseError::InvalidNumber { span, .. }
            | ParseError::UnexpectedToken { span, .. }
            | ParseError::UnresolvedIdentifier { span, .. }
            | ParseError::DuplicateDeclaration { span, .. }
            | ParseError::ArityMismatch { span, .. }
            | ParseError::InvalidSwizzle { span, .. }
            | ParseError::InvalidVectorSize { span, .. }
            | ParseError::AssignToInput { span, .. }
            | ParseError::NotAValue { span, .. }
            | ParseError::AssignToConstant { span, .. }
            | ParseError::NotConstant { span }
            | ParseError::MaxDepthExceeded { span, .. } => span,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            ParseError::InvalidToken { .. } => 1,
            ParseError::InvalidNumber { .. } => 2,
            ParseError::UnexpectedToken { .. } => 3,
            ParseError::UnresolvedIdentifier { .. } => 4,
            ParseError::DuplicateDeclaration { .. } => 5,
            ParseError::ArityMismatch { .. } => 6,
            ParseError::InvalidSwizzle { .. } => 7,
            ParseError::InvalidVectorSize { .. } => 8,
            ParseError::AssignToInput { .. } => 9,
            ParseError::NotAValue { .. } => 10,
            ParseError::AssignToConstant { .. } => 11,
            ParseError::NotConstant { .. } => 12,
            ParseError::MaxDepthExceeded { .. } => 13,
        }
    }
}
