//! Bytecode execution: value model, encoding, memory and the two interpreters.

pub mod compound;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod memory;
pub mod metadata;
pub mod opcode;
pub mod operators;
pub mod ssmd;
pub mod value;

#[cfg(test)]
mod interpreter_test;

pub use context::{CallHandles, EngineContext, ExternalFunction, FunctionTable, ParamSpec};
pub use error::{Completion, Status, VmError, VmResult};
pub use interpreter::{ExecutionOptions, Interpreter};
pub use memory::Memory;
pub use opcode::{ExtendedOpcode, Opcode};
pub use ssmd::{SsmdBlock, SsmdInterpreter};
pub use value::{Value, ValueType};

/// Checked builds verify stack metadata on every pop and substitute a
/// sentinel on mismatch. On in debug builds and with the `checked` feature.
pub(crate) const CHECKED: bool = cfg!(any(debug_assertions, feature = "checked"));
