//! Runtime errors and the closed status code set.
//!
//! The interpreters never panic on a malformed package: every failure is
//! returned as a [`VmError`], which maps onto a numeric [`Status`] hosts can
//! branch on.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::vm::value::ValueType;

/// Numeric outcome of an execution.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success = 0,
    Yield = 1,
    MaxIterationsExceeded = 2,
    StackTooSmall = 3,
    VectorSizeMismatch = 4,
    UnsupportedOpcodeAtRoot = 5,
    StackUnderflow = 6,
    TypeMismatch = 7,
    VectorOverflow = 8,
    UnknownFunction = 9,
    InvalidOperand = 10,
    NotSuspended = 11,
    DivergentBranch = 12,
    CodeOverrun = 13,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

/// How an execution that did not fail came to a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// A `Return` opcode (or the end of the code) was reached.
    Finished,
    /// A `yield` suspended execution; call `resume` to continue.
    Yielded,
}

impl Completion {
    pub fn status(self) -> Status {
        match self {
            Completion::Finished => Status::Success,
            Completion::Yielded => Status::Yield,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("iteration limit of {limit} backward jumps exceeded")]
    MaxIterationsExceeded { limit: u32 },

    #[error("stack too small: need {needed} slots, capacity is {capacity}")]
    StackTooSmall { needed: usize, capacity: usize },

    #[error("vector size mismatch: {left} vs {right} at code offset {offset}")]
    VectorSizeMismatch { left: u8, right: u8, offset: usize },

    #[error("opcode {opcode:#04x} is not allowed at root (code offset {offset})")]
    UnsupportedOpcodeAtRoot { opcode: u8, offset: usize },

    #[error("stack underflow at code offset {offset}")]
    StackUnderflow { offset: usize },

    #[error("type mismatch: expected {expected}, found {found} at code offset {offset}")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
        offset: usize,
    },

    #[error("vector grew past 4 components at code offset {offset}")]
    VectorOverflow { offset: usize },

    #[error("unknown external function id {id}")]
    UnknownFunction { id: u32 },

    #[error("invalid operand byte {byte:#04x} at code offset {offset}")]
    InvalidOperand { byte: u8, offset: usize },

    #[error("resume called on an interpreter that is not suspended")]
    NotSuspended,

    #[error("instance {instance} diverges from instance 0 on the branch at code offset {offset}")]
    DivergentBranch { instance: usize, offset: usize },

    #[error("code ended unexpectedly at offset {offset}")]
    CodeOverrun { offset: usize },
}

impl VmError {
    pub fn status(&self) -> Status {
        match self {
            VmError::MaxIterationsExceeded { .. } => Status::MaxIterationsExceeded,
            VmError::StackTooSmall { .. } => Status::StackTooSmall,
            VmError::VectorSizeMismatch { .. } => Status::VectorSizeMismatch,
            VmError::UnsupportedOpcodeAtRoot { .. } => Status::UnsupportedOpcodeAtRoot,
            VmError::StackUnderflow { .. } => Status::StackUnderflow,
            VmError::TypeMismatch { .. } => Status::TypeMismatch,
            VmError::VectorOverflow { .. } => Status::VectorOverflow,
            VmError::UnknownFunction { .. } => Status::UnknownFunction,
            VmError::InvalidOperand { .. } => Status::InvalidOperand,
            VmError::NotSuspended => Status::NotSuspended,
            VmError::DivergentBranch { .. } => Status::DivergentBranch,
            VmError::CodeOverrun { .. } => Status::CodeOverrun,
        }
    }

    /// Rewrites the code offset carried by the error. Kernels shared with the
    /// constant folder report offset 0; the interpreters fill in the real one.
    pub fn at(mut self, at: usize) -> Self {
        match &mut self {
            VmError::VectorSizeMismatch { offset, .. }
            | VmError::UnsupportedOpcodeAtRoot { offset, .. }
            | VmError::StackUnderflow { offset }
            | VmError::TypeMismatch { offset, .. }
            | VmError::VectorOverflow { offset }
            | VmError::InvalidOperand { offset, .. }
            | VmError::DivergentBranch { offset, .. }
            | VmError::CodeOverrun { offset } => *offset = at,
            VmError::MaxIterationsExceeded { .. }
            | VmError::StackTooSmall { .. }
            | VmError::UnknownFunction { .. }
            | VmError::NotSuspended => {}
        }
        self
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::Yield.code(), 1);
        assert_eq!(VmError::NotSuspended.status().code(), 11);
        assert_eq!(VmError::CodeOverrun { offset: 3 }.status().code(), 13);
        assert_eq!(
            VmError::DivergentBranch { instance: 2, offset: 0 }.status(),
            Status::DivergentBranch
        );
    }

    #[test]
    fn at_rewrites_offsets() {
        let err = VmError::VectorOverflow { offset: 0 }.at(17);
        assert_eq!(err, VmError::VectorOverflow { offset: 17 });
    }
}
