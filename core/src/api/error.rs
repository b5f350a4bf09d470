//! Diagnostics reported by compilation and validation.
//!
//! Every stage appends to one list of [`Diagnostic`]s. A failed compilation
//! carries the list up to and including the error; a successful one keeps
//! its warnings on the compiled script.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::Span;

/// A diagnostic message with an optional source location.
///
/// Maps cleanly to LSP diagnostics and to `ariadne` reports.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Primary diagnostic message.
    pub message: String,

    /// Source location of the issue, when it has one.
    pub span: Option<Span>,

    /// Pipeline stage that produced the diagnostic.
    pub stage: Option<&'static str>,

    /// Suggestions on how to fix the issue.
    pub help: Vec<String>,

    /// Numeric error code, for errors.
    pub code: Option<u16>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            span: None,
            stage: None,
            help: Vec::new(),
            code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    pub fn with_stage(mut self, stage: &'static str) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity)?;
        if let Some(code) = self.code {
            write!(f, "[E{:03}]", code)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(stage) = self.stage {
            write!(f, " ({})", stage)?;
        }
        Ok(())
    }
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Compilation cannot succeed.
    Error,
    /// Suspicious code that might be wrong.
    Warning,
    Info,
    /// Stage dumps, only present with tracing enabled.
    Trace,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
            Severity::Trace => write!(f, "trace"),
        }
    }
}
