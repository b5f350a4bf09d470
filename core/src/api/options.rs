//! Configuration options for compilation and execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compiler::package::{PackageLayout, TargetAllocator};

pub use crate::vm::interpreter::ExecutionOptions;

/// Configuration options for compilation.
///
/// Every switch has a default suited to embedding; hosts usually only touch
/// a handful of them.
///
/// # Example
///
/// ```
/// use vexpr_core::api::CompileOptions;
///
/// let options = CompileOptions {
///     auto_validate: true,
///     constant_epsilon: 0.001,
///     ..CompileOptions::default()
/// };
/// assert!(options.optimize);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Failing `validate` rules fail the compilation instead of producing
    /// warnings.
    pub auto_validate: bool,

    /// Run the bytecode optimizer.
    pub optimize: bool,

    /// Resolve constants that match an entry of the shared constant table to
    /// that entry instead of a data slot.
    pub use_builtin_constants: bool,

    /// Tolerance used when matching constants and checking validation rules.
    pub constant_epsilon: f32,

    /// Digits after the decimal point when printing constants.
    pub constant_print_precision: usize,

    /// Stack size in slots when neither a define nor measurement decides it.
    pub default_stack_size: usize,

    /// Measure stack usage with a validation run during packaging.
    pub auto_estimate_stack_size: bool,

    /// Copy stage progress into the returned diagnostics.
    pub verbose: bool,

    /// Also copy per-stage dumps into the diagnostics, and log the AST and
    /// partial bytecode when a stage fails.
    pub trace: bool,

    /// Add a summary of the package to the diagnostics.
    pub report: bool,

    /// Allow `yield` statements.
    pub yield_support: bool,

    /// Keep `dump(...)` calls; otherwise they are replaced by their argument.
    pub include_debug_functions: bool,

    pub layout: PackageLayout,

    pub allocator: TargetAllocator,

    /// Optimize segments between labels in parallel. Experimental.
    pub experimental_parallel: bool,

    /// Backward-jump limit for the validation and measurement runs.
    pub max_iterations: u32,

    /// Host defines. A script's own `define` of the same key wins.
    pub defines: BTreeMap<String, String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            auto_validate: false,
            optimize: true,
            use_builtin_constants: true,
            constant_epsilon: 1e-5,
            constant_print_precision: 6,
            default_stack_size: 16,
            auto_estimate_stack_size: true,
            verbose: false,
            trace: false,
            report: false,
            yield_support: true,
            include_debug_functions: false,
            layout: PackageLayout::Full,
            allocator: TargetAllocator::Pooled,
            experimental_parallel: false,
            max_iterations: 10_000,
            defines: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    /// Copy of these options producing a full (code + data) package.
    pub fn with_full_layout(&self) -> CompileOptions {
        CompileOptions {
            layout: PackageLayout::Full,
            ..self.clone()
        }
    }

    /// Adds a host define.
    pub fn define(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(key.into(), value.into());
        self
    }

    pub fn execution(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_iterations: self.max_iterations,
            validation_mode: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults_for_missing_fields() {
        let options: CompileOptions =
            serde_json::from_str(r#"{"optimize": false, "defines": {"stack_size": "32"}}"#)
                .unwrap();
        assert!(!options.optimize);
        assert!(options.use_builtin_constants);
        assert_eq!(options.defines.get("stack_size").map(String::as_str), Some("32"));
    }
}
