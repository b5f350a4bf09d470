//! Compiler and virtual machine for vexpr, a small vector expression
//! language evaluated over many independent instances at once.
//!
//! - [`parser`]: tokenizer, parser, AST and variable table
//! - [`analyzer`]: control-flow lowering, size inference, flattening, layout
//! - [`compiler`]: bytecode emission, optimization, jumps, packaging, validation
//! - [`vm`]: value model, bytecode format and the two interpreters
//! - [`stdlib`]: builtin functions, shared constants and the random source
//! - [`api`]: the engine and compiled scripts

pub mod analyzer;
pub mod api;
pub mod compiler;
pub mod parser;
pub mod stdlib;
pub mod vm;
