//! Middle end: the stages between parsing and bytecode generation.
//!
//! Each stage rewrites the arena in place. [`transform`] lowers control flow,
//! [`parameters`] infers shapes and checks the contract, [`flatten`] folds
//! and linearizes, [`cleanup`] lays out the data segment.

pub mod cleanup;
pub mod flatten;
pub mod fold;
pub mod parameters;
pub mod transform;

#[cfg(test)]
mod analyzer_test;
