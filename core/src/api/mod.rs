//! Public API for the vexpr scripting language.
//!
//! This module provides the stable surface for compiling scripts and
//! running them:
//!
//! 1. **Engine**: owns the host environment and default options
//! 2. **CompiledScript**: package, initial data, variable layout, diagnostics
//! 3. **Interpreters**: single-instance or batched execution of a script
//!
//! # Example
//!
//! ```
//! use vexpr_core::api::{CompileOptions, Engine};
//! use vexpr_core::vm::{CallHandles, Value};
//!
//! let engine = Engine::new(CompileOptions::default(), |env| {
//!     env.constant("SCALE", 2.5);
//! })
//! .unwrap();
//!
//! let script = engine.compile("input x; output y; y = x * SCALE;").unwrap();
//!
//! // Four instances, one bytecode stream.
//! let mut block = script.ssmd_block(4);
//! for i in 0..4 {
//!     script.set_batch_input(&mut block, i, "x", Value::scalar(i as f32)).unwrap();
//! }
//! let mut interpreter = script.ssmd_interpreter(engine.context());
//! block.execute(&mut interpreter, &mut CallHandles::none()).unwrap();
//! assert_eq!(script.batch_output(&block, 3, "y").unwrap(), Value::scalar(7.5));
//! ```

pub mod engine;
pub mod environment;
pub mod error;
pub mod options;
pub mod script;

pub use engine::Engine;
pub use environment::EnvironmentBuilder;
pub use error::{Diagnostic, Severity};
pub use options::{CompileOptions, ExecutionOptions};
pub use script::{CompiledScript, ScriptError};

pub use crate::compiler::pipeline::{CompileFailure, compile, compile_parsed};
