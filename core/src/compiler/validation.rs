//! Validation runs: executes a package in validation mode and checks the
//! script's `validate` rules against the resulting data.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::api::error::Diagnostic;
use crate::compiler::error::CompileErrorKind;
use crate::compiler::package::Package;
use crate::compiler::pipeline::CompilationState;
use crate::parser::variables::VariableTable;
use crate::parser::parser::ValidationRule;
use crate::vm::context::{CallHandles, EngineContext};
use crate::vm::error::{Completion, VmError};
use crate::vm::interpreter::{ExecutionOptions, Interpreter};
use crate::vm::memory::Memory;
use crate::vm::value::{Value, ValueType};

/// Memory after a validation run, and the deepest stack use it reached.
#[derive(Debug, Clone)]
pub struct ValidationRun {
    pub memory: Memory,
    pub high_water: usize,
}

/// Executes `package` once in validation mode: external calls return zero
/// and yields are resumed straight away. `inputs` are written, as
/// `(slot, value)` pairs, over the initial data image first.
pub fn run_validation(
    package: &Package,
    data_image: &[u8],
    context: &EngineContext,
    max_iterations: u32,
    inputs: &[(usize, Value)],
) -> Result<ValidationRun, VmError> {
    let mut memory = Memory::new(package, data_image);
    for (slot, value) in inputs {
        if !memory.write(*slot, value) {
            return Err(VmError::InvalidOperand {
                byte: *slot as u8,
                offset: 0,
            });
        }
    }
    let options = ExecutionOptions {
        max_iterations,
        validation_mode: true,
    };
    let mut interpreter = Interpreter::new(package, context, options);
    let mut handles = CallHandles::none();
    let mut completion = interpreter.execute(&mut memory, &mut handles)?;
    let mut resumes = 0usize;
    while completion == Completion::Yielded {
        resumes += 1;
        completion = interpreter.resume(&mut memory, &mut handles)?;
    }
    trace!(resumes, high_water = interpreter.high_water_mark(), "Validation run finished");
    Ok(ValidationRun {
        high_water: interpreter.high_water_mark(),
        memory,
    })
}

/// A rule as kept on a compiled script: the target's slot instead of its
/// variable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub name: String,
    pub text: String,
    /// `None` when the target ended up without storage.
    pub slot: Option<usize>,
    pub expected: Value,
}

impl RuleCheck {
    pub fn from_rule(rule: &ValidationRule, variables: &VariableTable) -> Self {
        Self {
            name: rule.name.to_string(),
            text: rule.text.to_string(),
            slot: variables.get(rule.target).slot(),
            expected: rule.expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub name: String,
    pub text: String,
    pub expected: Value,
    pub actual: Option<Value>,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub outcomes: Vec<RuleOutcome>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| !o.passed)
    }
}

/// Compares each rule's expected value with the memory after a run.
pub fn check_rules(rules: &[RuleCheck], memory: &Memory, epsilon: f32) -> ValidationReport {
    let outcomes = rules
        .iter()
        .map(|rule| {
            let actual = rule.slot.and_then(|slot| memory.read(slot));
            let passed = actual.is_some_and(|actual| matches(&rule.expected, &actual, epsilon));
            trace!(rule = %rule.text, ?actual, passed, "Checked rule");
            RuleOutcome {
                name: rule.name.clone(),
                text: rule.text.clone(),
                expected: rule.expected,
                actual,
                passed,
            }
        })
        .collect();
    ValidationReport { outcomes }
}

fn matches(expected: &Value, actual: &Value, epsilon: f32) -> bool {
    match (expected.ty, actual.ty) {
        (ValueType::Id, ValueType::Id) => expected.as_id() == actual.as_id(),
        (ValueType::Numeric, ValueType::Numeric) => expected.approx_eq(actual, epsilon),
        // An expected number checks an id by its numeric value.
        (ValueType::Numeric, ValueType::Id) => {
            expected.size == 1 && expected.lanes[0] == actual.as_id() as f32
        }
        (ValueType::Id, ValueType::Numeric) => false,
    }
}

/// Errors of a host-driven validation run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("'{0}' is not an input of this script")]
    UnknownInput(String),

    #[error("input '{name}' holds {expected_size} {expected_type} component(s), got {found_size} {found_type}")]
    InputShape {
        name: String,
        expected_type: ValueType,
        expected_size: u8,
        found_type: ValueType,
        found_size: u8,
    },

    #[error("validation run failed: {0}")]
    Execution(#[from] VmError),
}

/// The validation stage.
pub fn validate(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    if state.rules.is_empty() {
        state.validation = Some(ValidationReport::default());
        return Ok(());
    }
    let Some(package) = state.package.as_ref() else {
        return Err(CompileErrorKind::Internal("validation without a package".into()));
    };
    let options = state.options;
    let rules: Vec<RuleCheck> = state
        .rules
        .iter()
        .map(|r| RuleCheck::from_rule(r, &state.variables))
        .collect();

    let run = match run_validation(
        package,
        &state.data_image,
        state.context,
        options.max_iterations,
        &[],
    ) {
        Ok(run) => run,
        Err(err) if options.auto_validate => return Err(CompileErrorKind::Execution(err)),
        Err(err) => {
            state.warn(None, format!("validation run failed: {}", err));
            return Ok(());
        }
    };

    let report = check_rules(&rules, &run.memory, options.constant_epsilon);
    let failed = report.failures().count();
    debug!(rules = rules.len(), failed, "Checked validation rules");

    let failures: Vec<_> = report
        .outcomes
        .iter()
        .zip(&state.rules)
        .filter(|(outcome, _)| !outcome.passed)
        .map(|(outcome, rule)| {
            let actual = outcome
                .actual
                .map_or_else(|| "no value".to_string(), |v| v.to_string());
            let message = format!(
                "validation failed: `{}` expected {}, found {}",
                outcome.text, outcome.expected, actual
            );
            (message, rule.span.clone())
        })
        .collect();
    for (message, span) in failures {
        if options.auto_validate {
            state.diagnostics.push(
                Diagnostic::error(message)
                    .with_span(Some(span))
                    .with_stage("Validation"),
            );
        } else {
            state.warn(Some(span), message);
        }
    }
    state.validation = Some(report);
    if failed > 0 && options.auto_validate {
        return Err(CompileErrorKind::ValidationFailed { failed });
    }
    Ok(())
}
