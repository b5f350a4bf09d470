//! Front end: tokenizer, parser and the data they produce.

pub mod ast;
pub mod dump;
pub mod error;
pub mod parser;
pub mod syntax;
pub mod token;
pub mod tokenizer;
pub mod variables;

pub use ast::{Ast, NodeId, NodeKind};
pub use error::ParseError;
pub use parser::{ParsedScript, ValidationRule, parse};
pub use syntax::{BinaryOp, Position, Span, Swizzle, UnaryOp};
pub use variables::{VarId, Variable, VariableInfo, VariableKind, VariableMap, VariableTable};

#[cfg(test)]
mod parser_test;
