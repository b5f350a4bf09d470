//! Environment builder for registering host functions and constants.

use crate::stdlib::constants::ConstantTable;
use crate::stdlib::random::DEFAULT_SEED;
use crate::vm::context::{EngineContext, ExternalFunction, FunctionTable, RegistryError};

/// Builder for the [`EngineContext`] an engine compiles and runs against.
///
/// Registration errors are collected and reported by [`Engine::new`], so an
/// init closure can register everything without checking each call.
///
/// # Example
///
/// ```
/// use vexpr_core::api::{CompileOptions, Engine};
/// use vexpr_core::vm::{ExternalFunction, ParamSpec, Value};
///
/// let engine = Engine::new(CompileOptions::default(), |env| {
///     env.constant("GRAVITY", 9.81);
///     env.function(ExternalFunction::new(
///         1,
///         "health",
///         vec![ParamSpec::id()],
///         ParamSpec::numeric(1),
///         |_args, _handles| Value::scalar(100.0),
///     ));
/// })
/// .unwrap();
/// assert!(engine.context().functions.lookup("health").is_some());
/// ```
///
/// [`Engine::new`]: crate::api::Engine::new
pub struct EnvironmentBuilder {
    functions: FunctionTable,
    constants: ConstantTable,
    seed: u64,
    errors: Vec<RegistryError>,
}

impl EnvironmentBuilder {
    /// Starts from the builtin constant table and the default seed.
    pub fn new() -> Self {
        Self {
            functions: FunctionTable::new(),
            constants: ConstantTable::builtin(),
            seed: DEFAULT_SEED,
            errors: Vec::new(),
        }
    }

    /// Drops the builtin constants. Registered constants then start at
    /// index 0.
    pub fn without_builtin_constants(&mut self) -> &mut Self {
        self.constants = ConstantTable::empty();
        self
    }

    pub fn function(&mut self, function: ExternalFunction) -> &mut Self {
        if let Err(err) = self.functions.register(function) {
            self.errors.push(err);
        }
        self
    }

    /// Registers a named constant, usable in source and addressed through
    /// the shared constant table.
    pub fn constant(&mut self, name: &str, value: f32) -> &mut Self {
        if let Err(err) = self.constants.register(name, value) {
            self.errors.push(err.into());
        }
        self
    }

    /// Seed of the engine's random generator.
    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    /// Builds the context, or returns the first registration error.
    pub(crate) fn build(mut self) -> Result<EngineContext, RegistryError> {
        if !self.errors.is_empty() {
            return Err(self.errors.swap_remove(0));
        }
        Ok(EngineContext::new(self.functions, self.constants, self.seed))
    }
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::context::ParamSpec;
    use crate::vm::value::Value;

    fn constant_fn(id: u32, name: &str) -> ExternalFunction {
        ExternalFunction::new(id, name, vec![], ParamSpec::numeric(1), |_, _| {
            Value::scalar(1.0)
        })
    }

    #[test]
    fn first_registration_error_wins() {
        let mut env = EnvironmentBuilder::new();
        env.function(constant_fn(1, "a"))
            .function(constant_fn(1, "b"))
            .function(constant_fn(2, "a"));
        assert_eq!(env.build().unwrap_err(), RegistryError::DuplicateId(1));
    }

    #[test]
    fn named_constants_extend_the_builtin_table() {
        let builtin = ConstantTable::builtin().len();
        let mut env = EnvironmentBuilder::new();
        env.constant("GRAVITY", 9.81).seed(7);
        let context = env.build().unwrap();
        assert_eq!(context.constants.len(), builtin + 1);
        assert_eq!(context.constants.lookup_name("GRAVITY"), Some(builtin as u8));
    }
}
