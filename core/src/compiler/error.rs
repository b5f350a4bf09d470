//! Compilation errors.
//!
//! Each pipeline stage fails with one [`CompileErrorKind`]; the pipeline
//! wraps it in a [`crate::compiler::CompileFailure`] that also names the
//! stage and carries the diagnostics and dumps gathered so far.

use ecow::EcoString;

use crate::api::error::Diagnostic;
use crate::parser::ast::LabelId;
use crate::parser::error::ParseError;
use crate::parser::syntax::Span;
use crate::vm::error::VmError;
use crate::vm::value::ValueType;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileErrorKind {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("vector sizes {left} and {right} do not match")]
    VectorSizeMismatch { left: u8, right: u8, span: Span },

    #[error("vector of {size} components is larger than 4")]
    VectorTooLarge { size: usize, span: Span },

    #[error("input '{name}' is pinned at offset {pinned} but lays out at offset {expected}")]
    MisalignedInput {
        name: EcoString,
        pinned: usize,
        expected: usize,
        span: Span,
    },

    #[error("output '{name}' is never assigned a value")]
    UndefinedOutput { name: EcoString, span: Span },

    #[error("inout '{name}' is never read; declare it as an output")]
    SuperfluousValue { name: EcoString, span: Span },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
        span: Span,
    },

    #[error("yield is disabled for this compilation")]
    YieldDisabled { span: Span },

    #[error("data segment needs {slots} slots, at most {limit} are addressable")]
    DataSegmentOverflow { slots: usize, limit: usize },

    #[error("jump to {label} spans {distance} bytes and cannot be encoded")]
    JumpOutOfRange { label: LabelId, distance: isize },

    #[error("jump to undefined label {0}")]
    UnresolvedLabel(LabelId),

    #[error("stack too small: execution reaches {high_water} slots, capacity is {capacity}")]
    StackTooSmall { high_water: usize, capacity: usize },

    #[error("invalid value '{value}' for define '{key}'")]
    InvalidDefine { key: EcoString, value: EcoString },

    #[error("execution failed: {0}")]
    Execution(VmError),

    #[error("{failed} validation rule(s) failed")]
    ValidationFailed { failed: usize },

    #[error("internal compiler error: {0}")]
    Internal(EcoString),
}

impl CompileErrorKind {
    pub fn span(&self) -> Option<&Span> {
        match self {
            CompileErrorKind::Parse(err) => Some(err.span()),
            CompileErrorKind::VectorSizeMismatch { span, .. }
            | CompileErrorKind::VectorTooLarge { span, .. }
            | CompileErrorKind::MisalignedInput { span, .. }
            | CompileErrorKind::UndefinedOutput { span, .. }
            | CompileErrorKind::SuperfluousValue { span, .. }
            | CompileErrorKind::TypeMismatch { span, .. }
            | CompileErrorKind::YieldDisabled { span } => Some(span),
            _ => None,
        }
    }

    /// Stable numeric code. Parse errors keep their own codes (below 20).
    pub fn code(&self) -> u16 {
        match self {
            CompileErrorKind::Parse(err) => err.code(),
            CompileErrorKind::VectorSizeMismatch { .. } => 20,
            CompileErrorKind::VectorTooLarge { .. } => 21,
            CompileErrorKind::MisalignedInput { .. } => 22,
            CompileErrorKind::UndefinedOutput { .. } => 23,
            CompileErrorKind::SuperfluousValue { .. } => 24,
            CompileErrorKind::TypeMismatch { .. } => 25,
            CompileErrorKind::YieldDisabled { .. } => 26,
            CompileErrorKind::DataSegmentOverflow { .. } => 27,
            CompileErrorKind::JumpOutOfRange { .. } => 28,
            CompileErrorKind::UnresolvedLabel(_) => 29,
            CompileErrorKind::StackTooSmall { .. } => 30,
            CompileErrorKind::InvalidDefine { .. } => 31,
            CompileErrorKind::Execution(_) => 32,
            CompileErrorKind::ValidationFailed { .. } => 33,
            CompileErrorKind::Internal(_) => 99,
        }
    }

    fn help(&self) -> Option<&'static str> {
        match self {
            CompileErrorKind::VectorSizeMismatch { .. } => {
                Some("operands must have the same size, or one of them must be a scalar")
            }
            CompileErrorKind::UndefinedOutput { .. } => {
                Some("assign the output from an expression that does not only read itself")
            }
            CompileErrorKind::StackTooSmall { .. } => {
                Some("raise the stack size with `define stack_size = N;`")
            }
            CompileErrorKind::DataSegmentOverflow { .. } => {
                Some("reduce the number of variables and distinct constants")
            }
            CompileErrorKind::YieldDisabled { .. } => Some("enable yield support in the options"),
            _ => None,
        }
    }

    pub fn to_diagnostic(&self, stage: &'static str) -> Diagnostic {
        let mut diagnostic = Diagnostic::error(self.to_string())
            .with_span(self.span().cloned())
            .with_stage(stage)
            .with_code(self.code());
        if let Some(help) = self.help() {
            diagnostic = diagnostic.with_help(help);
        }
        diagnostic
    }
}

impl From<VmError> for CompileErrorKind {
    fn from(err: VmError) -> Self {
        CompileErrorKind::Execution(err)
    }
}
