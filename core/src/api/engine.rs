//! The vexpr compilation engine.

use super::{CompileOptions, CompiledScript, EnvironmentBuilder};
use crate::compiler::pipeline::{self, CompileFailure};
use crate::parser::error::ParseError;
use crate::parser::parser::{self as script_parser, ParsedScript};
use crate::vm::context::{EngineContext, RegistryError};

/// The vexpr compilation engine.
///
/// The engine owns:
/// - The host environment (external functions, shared constants, RNG)
/// - The default compile options
///
/// Compiled scripts do not borrow the engine; the interpreters borrow its
/// [`context`](Engine::context) while they run.
///
/// # Example
///
/// ```
/// use vexpr_core::api::{CompileOptions, Engine};
/// use vexpr_core::vm::Value;
///
/// let engine = Engine::new(CompileOptions::default(), |_env| {}).unwrap();
/// let script = engine
///     .compile("input v[3]; output n; n = length(v);")
///     .unwrap();
///
/// let mut memory = script.create_memory();
/// script.set_input(&mut memory, "v", Value::vector(&[3.0, 4.0, 0.0])).unwrap();
/// let mut interpreter = script.interpreter(engine.context());
/// interpreter.execute(&mut memory, &mut Default::default()).unwrap();
/// assert_eq!(script.output(&memory, "n").unwrap(), Value::scalar(5.0));
/// ```
pub struct Engine {
    context: EngineContext,
    options: CompileOptions,
}

impl Engine {
    /// Create a new engine with a custom environment.
    ///
    /// The initialization closure receives the environment builder; the
    /// first registration error, if any, is returned.
    pub fn new(
        options: CompileOptions,
        init: impl FnOnce(&mut EnvironmentBuilder),
    ) -> Result<Self, RegistryError> {
        let mut builder = EnvironmentBuilder::new();
        init(&mut builder);
        Ok(Self {
            context: builder.build()?,
            options,
        })
    }

    /// Wraps an existing context.
    pub fn with_context(context: EngineContext, options: CompileOptions) -> Self {
        Self { context, options }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Tokenizes and parses without running the later stages.
    pub fn parse(&self, source: &str) -> Result<ParsedScript, ParseError> {
        script_parser::parse(source, &self.context)
    }

    /// Compile a vexpr script with the engine's options.
    pub fn compile(&self, source: &str) -> Result<CompiledScript, CompileFailure> {
        pipeline::compile(source, &self.context, &self.options)
    }

    /// Compile with options other than the engine's.
    pub fn compile_with(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<CompiledScript, CompileFailure> {
        pipeline::compile(source, &self.context, options)
    }

    /// Runs the stages after parsing over a script from [`parse`](Self::parse).
    pub fn compile_parsed(&self, script: ParsedScript) -> Result<CompiledScript, CompileFailure> {
        pipeline::compile_parsed(script, &self.context, &self.options)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_context(EngineContext::default(), CompileOptions::default())
    }
}
