//! The result of a successful compilation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::error::{Diagnostic, Severity};
use crate::api::options::ExecutionOptions;
use crate::compiler::package::{Package, PackageError, StackSizeSource};
use crate::compiler::pipeline::CompilationState;
use crate::compiler::validation::{
    RuleCheck, ValidationError, ValidationReport, check_rules, run_validation,
};
use crate::parser::variables::{VariableInfo, VariableKind, VariableMap};
use crate::vm::context::EngineContext;
use crate::vm::interpreter::Interpreter;
use crate::vm::memory::Memory;
use crate::vm::opcode::Opcode;
use crate::vm::ssmd::{SsmdBlock, SsmdInterpreter};
use crate::vm::value::{Value, ValueType};

/// Errors of the host-side helpers of [`CompiledScript`].
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script has no variable named '{0}'")]
    UnknownVariable(String),

    #[error("'{name}' is {kind}, not an input")]
    NotAnInput { name: String, kind: &'static str },

    #[error("'{name}' holds {expected_size} {expected_type} component(s), got {found_size} {found_type}")]
    Shape {
        name: String,
        expected_type: ValueType,
        expected_size: u8,
        found_type: ValueType,
        found_size: u8,
    },

    #[error("'{0}' has no value in this memory")]
    MissingValue(String),

    #[error("invalid script bytes: {0}")]
    Serialization(#[from] postcard::Error),

    #[error(transparent)]
    Package(#[from] PackageError),
}

/// A compiled script: the package, its initial data and the layout of its
/// variables, plus everything the compiler reported.
///
/// Persisted with [`to_bytes`](Self::to_bytes); the dumps and diagnostics are
/// not part of the persisted form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledScript {
    package: Package,
    data_image: Vec<u8>,
    variables: VariableMap,
    rules: Vec<RuleCheck>,
    stack_source: Option<StackSizeSource>,
    stack_high_water: Option<usize>,
    branch_free: bool,
    epsilon: f32,
    max_iterations: u32,
    #[serde(skip)]
    diagnostics: Vec<Diagnostic>,
    #[serde(skip)]
    validation: Option<ValidationReport>,
    #[serde(skip)]
    ast_dump: String,
    #[serde(skip)]
    disassembly: String,
}

impl CompiledScript {
    pub(crate) fn from_state(package: Package, state: CompilationState<'_>) -> Self {
        let rules = state
            .rules
            .iter()
            .map(|rule| RuleCheck::from_rule(rule, &state.variables))
            .collect();
        let branch_free = !state.ir.instructions.iter().any(|i| {
            matches!(
                i.opcode(),
                Some(Opcode::JumpIfZero | Opcode::JumpIfNotZero)
            )
        });
        let ast_dump = state.ast_dump();
        let disassembly = state.disassembly();
        Self {
            variables: state.variables.variable_map(),
            rules,
            branch_free,
            ast_dump,
            disassembly,
            data_image: state.data_image,
            stack_source: state.stack_source,
            stack_high_water: state.stack_high_water,
            epsilon: state.options.constant_epsilon,
            max_iterations: state.options.max_iterations,
            diagnostics: state.diagnostics,
            validation: state.validation,
            package,
        }
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    /// Initial contents of the data slots.
    pub fn data_image(&self) -> &[u8] {
        &self.data_image
    }

    pub fn variables(&self) -> &VariableMap {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.get(name)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Outcome of the validation stage, if it ran.
    pub fn validation(&self) -> Option<&ValidationReport> {
        self.validation.as_ref()
    }

    /// AST after the last analysis stage.
    pub fn ast_dump(&self) -> &str {
        &self.ast_dump
    }

    pub fn disassembly(&self) -> &str {
        &self.disassembly
    }

    pub fn stack_source(&self) -> Option<StackSizeSource> {
        self.stack_source
    }

    /// Deepest stack use seen by the measurement run.
    pub fn stack_high_water(&self) -> Option<usize> {
        self.stack_high_water
    }

    /// `true` when no conditional jump survived compilation, so a batch can
    /// never diverge.
    pub fn is_branch_free(&self) -> bool {
        self.branch_free
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_iterations: self.max_iterations,
            validation_mode: false,
        }
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Fresh memory for one instance.
    pub fn create_memory(&self) -> Memory {
        Memory::new(&self.package, &self.data_image)
    }

    /// Writes an input, broadcasting scalars to the declared size.
    pub fn set_input(&self, memory: &mut Memory, name: &str, value: Value) -> Result<(), ScriptError> {
        let info = self.input(name, &value)?;
        let value = value.broadcast(info.size);
        if !memory.write(info.slot(), &value) {
            return Err(ScriptError::MissingValue(name.to_string()));
        }
        Ok(())
    }

    /// Reads a named variable back out of an instance.
    pub fn output(&self, memory: &Memory, name: &str) -> Result<Value, ScriptError> {
        let info = self
            .variables
            .get(name)
            .ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))?;
        memory
            .read(info.slot())
            .ok_or_else(|| ScriptError::MissingValue(name.to_string()))
    }

    pub fn interpreter<'p>(&'p self, context: &'p EngineContext) -> Interpreter<'p> {
        Interpreter::new(&self.package, context, self.execution_options())
    }

    /// Storage for `count` instances, each starting from the data image.
    pub fn ssmd_block(&self, count: usize) -> SsmdBlock {
        SsmdBlock::new(&self.package, &self.data_image, count)
    }

    pub fn set_batch_input(
        &self,
        block: &mut SsmdBlock,
        instance: usize,
        name: &str,
        value: Value,
    ) -> Result<(), ScriptError> {
        let info = self.input(name, &value)?;
        if !block.write(instance, info.slot(), &value) {
            return Err(ScriptError::MissingValue(name.to_string()));
        }
        Ok(())
    }

    pub fn batch_output(&self, block: &SsmdBlock, instance: usize, name: &str) -> Result<Value, ScriptError> {
        let info = self
            .variables
            .get(name)
            .ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))?;
        block
            .read(instance, info.slot())
            .ok_or_else(|| ScriptError::MissingValue(name.to_string()))
    }

    pub fn ssmd_interpreter<'p>(&'p self, context: &'p EngineContext) -> SsmdInterpreter<'p> {
        SsmdInterpreter::new(&self.package, context, self.execution_options())
    }

    fn input(&self, name: &str, value: &Value) -> Result<&VariableInfo, ScriptError> {
        let info = self
            .variables
            .get(name)
            .ok_or_else(|| ScriptError::UnknownVariable(name.to_string()))?;
        if !info.kind.is_input() {
            return Err(ScriptError::NotAnInput {
                name: name.to_string(),
                kind: info.kind.keyword(),
            });
        }
        if info.value_type != value.ty || (value.size != info.size && value.size != 1) {
            return Err(ScriptError::Shape {
                name: name.to_string(),
                expected_type: info.value_type,
                expected_size: info.size,
                found_type: value.ty,
                found_size: value.size,
            });
        }
        Ok(info)
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Re-runs the script's `validate` rules with the given inputs in place
    /// of the declared defaults.
    pub fn validate_with(
        &self,
        context: &EngineContext,
        inputs: &[(&str, Value)],
    ) -> Result<ValidationReport, ValidationError> {
        let mut writes = Vec::with_capacity(inputs.len());
        for (name, value) in inputs {
            let info = self
                .variables
                .get(name)
                .filter(|v| v.kind.is_input())
                .ok_or_else(|| ValidationError::UnknownInput(name.to_string()))?;
            if info.value_type != value.ty || (value.size != info.size && value.size != 1) {
                return Err(ValidationError::InputShape {
                    name: name.to_string(),
                    expected_type: info.value_type,
                    expected_size: info.size,
                    found_type: value.ty,
                    found_size: value.size,
                });
            }
            writes.push((info.slot(), value.broadcast(info.size)));
        }
        let run = run_validation(
            &self.package,
            &self.data_image,
            context,
            self.max_iterations,
            &writes,
        )?;
        let report = check_rules(&self.rules, &run.memory, self.epsilon);
        debug!(
            rules = self.rules.len(),
            failed = report.failures().count(),
            "Validated with host inputs"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn to_bytes(&self) -> Result<Vec<u8>, ScriptError> {
        Ok(postcard::to_allocvec(self)?)
    }

    /// Restores a script written by [`to_bytes`](Self::to_bytes). The
    /// package header is checked against its buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ScriptError> {
        let script: CompiledScript = postcard::from_bytes(bytes)?;
        script.package.check()?;
        Ok(script)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.inputs()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.outputs()
    }

    /// Names of the locals visible in the layout. Hosts rarely need these.
    pub fn locals(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables
            .variables
            .iter()
            .filter(|v| v.kind == VariableKind::Local)
    }
}
