//! Back end of the compiler and the driver that runs every stage.
//!
//! This module turns the flattened AST into a package:
//!
//! - [`bytecode`] emits intermediate bytecode with symbolic labels
//! - [`optimizer`] applies peephole rewrites
//! - [`jumps`] resolves labels into relative offsets
//! - [`package`] sizes the stack and assembles the buffer
//! - [`validation`] re-runs the package and checks `validate` rules
//!
//! ## Design
//!
//! - One mutable [`pipeline::CompilationState`] is threaded through the stages
//! - Every stage either succeeds or fails the whole compilation
//! - Instructions carry their labels so removals never lose a jump target

pub mod bytecode;
pub mod disasm;
pub mod error;
pub mod ir;
pub mod jumps;
pub mod optimizer;
pub mod package;
pub mod pipeline;
pub mod validation;


pub use bytecode::BytecodeCompiler;
pub use error::CompileErrorKind;
pub use package::{Package, PackageHeader, PackageLayout, TargetAllocator};
pub use pipeline::{CompileFailure, Pipeline, StageId, compile, compile_parsed};
pub use validation::{ValidationError, ValidationReport};
