//! vexpr - a small vector expression language for batched evaluation
//!
//! # Overview
//!
//! vexpr scripts read and write fixed-size float vectors (up to four
//! components) and opaque 32-bit ids. A script is compiled once into a
//! compact bytecode package and then run either for one instance at a time
//! or for many instances in lock-step (SSMD: single script, multiple data).
//! Typical uses are per-particle or per-entity rules evaluated by a host
//! application every frame.
//!
//! # Quick Start
//!
//! ```
//! use vexpr::{CallHandles, CompileOptions, Engine, Value};
//!
//! let engine = Engine::new(CompileOptions::default(), |_| {}).unwrap();
//! let script = engine
//!     .compile("input v[3]; output n; n = length(v);")
//!     .unwrap();
//!
//! let mut memory = script.create_memory();
//! script
//!     .set_input(&mut memory, "v", Value::vector(&[3.0, 4.0, 0.0]))
//!     .unwrap();
//! let mut interpreter = script.interpreter(engine.context());
//! interpreter
//!     .execute(&mut memory, &mut CallHandles::none())
//!     .unwrap();
//! assert_eq!(script.output(&memory, "n").unwrap(), Value::scalar(5.0));
//! ```
//!
//! # Errors
//!
//! A failed compilation returns a [`CompileFailure`] carrying every
//! diagnostic up to the failing stage. [`render_failure`] prints it with
//! source snippets.

mod error_renderer;

pub use error_renderer::{
    render_diagnostics, render_failure, render_failure_to, render_failure_to_string,
    render_failure_to_string_no_color,
};

// Re-export public API from vexpr_core
pub use vexpr_core::api::{
    CompileFailure, CompileOptions, CompiledScript, Diagnostic, Engine, EnvironmentBuilder,
    ExecutionOptions, ScriptError, Severity,
};
pub use vexpr_core::compiler::validation::{ValidationError, ValidationReport};
pub use vexpr_core::vm::context::RegistryError;
pub use vexpr_core::vm::{
    CallHandles, EngineContext, ExternalFunction, Interpreter, Memory, ParamSpec, SsmdBlock,
    SsmdInterpreter, Value, ValueType, VmError,
};

/// Any error a host can get from the vexpr API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] Box<CompileFailure>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Execution(#[from] VmError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<CompileFailure> for Error {
    fn from(failure: CompileFailure) -> Self {
        Error::Compile(Box::new(failure))
    }
}
