//! The compilation driver.
//!
//! A [`Pipeline`] is an ordered list of stages run over one mutable
//! [`CompilationState`]. The first failing stage stops the run; the failure
//! names the stage and keeps every diagnostic and dump gathered so far.
//!
//! ```text
//!  1 Tokenize           source -> tokens, identifiers interned
//!  2 Parse              tokens -> AST, defines, validation rules
//!  3 Transform          control flow -> conditions, jumps and labels
//!  4 ParameterAnalysis  sizes, types, input layout, output contract
//!  5 Flatten            constant folding, compound linearization
//!  6 Cleanup            usage recount, data layout
//!  7 Compile            AST -> intermediate bytecode
//!  8 Optimize           peephole rewrites (optional)
//!  9 ResolveJumps       labels -> relative offsets
//! 10 Package            stack sizing, package assembly
//! 11 Validation         re-run in validation mode, check rules
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use ecow::EcoString;
use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};

use crate::analyzer;
use crate::api::error::{Diagnostic, Severity};
use crate::api::options::CompileOptions;
use crate::api::script::CompiledScript;
use crate::compiler::bytecode;
use crate::compiler::disasm::{DisasmNames, disassemble, disassemble_ir};
use crate::compiler::error::CompileErrorKind;
use crate::compiler::ir::Ir;
use crate::compiler::jumps;
use crate::compiler::optimizer;
use crate::compiler::package::{self, Package, StackSizeSource};
use crate::compiler::validation::{self, ValidationReport};
use crate::parser::ast::Ast;
use crate::parser::dump::dump_ast;
use crate::parser::parser::{ParsedScript, ValidationRule, parse_tokens};
use crate::parser::syntax::Span;
use crate::parser::token::Token;
use crate::parser::tokenizer::tokenize;
use crate::parser::variables::VariableTable;
use crate::vm::context::EngineContext;

/// Everything the stages read and write.
pub struct CompilationState<'a> {
    pub source: String,
    pub options: &'a CompileOptions,
    pub context: &'a EngineContext,
    pub tokens: Vec<Token>,
    pub ast: Ast,
    pub variables: VariableTable,
    /// `define` statements of the script itself.
    pub script_defines: BTreeMap<EcoString, EcoString>,
    pub rules: Vec<ValidationRule>,
    pub ir: Ir,
    /// Deepest stack use the compiler can see without running the code.
    pub static_stack_slots: usize,
    pub code: Vec<u8>,
    pub data_metadata: Vec<u8>,
    pub data_image: Vec<u8>,
    pub package: Option<Package>,
    pub stack_high_water: Option<usize>,
    pub stack_source: Option<StackSizeSource>,
    pub validation: Option<ValidationReport>,
    pub diagnostics: Vec<Diagnostic>,
    stage: Option<&'static str>,
}

impl<'a> CompilationState<'a> {
    pub fn new(
        source: impl Into<String>,
        options: &'a CompileOptions,
        context: &'a EngineContext,
    ) -> Self {
        Self {
            source: source.into(),
            options,
            context,
            tokens: Vec::new(),
            ast: Ast::new(),
            variables: VariableTable::new(),
            script_defines: BTreeMap::new(),
            rules: Vec::new(),
            ir: Ir::new(),
            static_stack_slots: 0,
            code: Vec::new(),
            data_metadata: Vec::new(),
            data_image: Vec::new(),
            package: None,
            stack_high_water: None,
            stack_source: None,
            validation: None,
            diagnostics: Vec::new(),
            stage: None,
        }
    }

    /// State for a script that was parsed ahead of time.
    pub fn from_parsed(
        script: ParsedScript,
        options: &'a CompileOptions,
        context: &'a EngineContext,
    ) -> Self {
        let mut state = Self::new(script.source, options, context);
        state.ast = script.ast;
        state.variables = script.variables;
        state.script_defines = script.defines;
        state.rules = script.rules;
        state
    }

    /// Records a warning, attributed to the running stage.
    pub fn warn(&mut self, span: Option<Span>, message: String) {
        warn!(stage = self.stage, "{}", message);
        let mut diagnostic = Diagnostic::warning(message).with_span(span);
        if let Some(stage) = self.stage {
            diagnostic = diagnostic.with_stage(stage);
        }
        self.diagnostics.push(diagnostic);
    }

    fn note(&mut self, severity: Severity, message: String) {
        let mut diagnostic = Diagnostic::new(severity, message);
        if let Some(stage) = self.stage {
            diagnostic = diagnostic.with_stage(stage);
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn ast_dump(&self) -> String {
        dump_ast(&self.ast, &self.variables, self.context)
    }

    /// Disassembly of the resolved code when there is some, of the
    /// intermediate bytecode otherwise.
    pub fn disassembly(&self) -> String {
        let names = DisasmNames::new(
            &self.variables,
            &self.context.constants,
            &self.context.functions,
            self.options.constant_print_precision,
        );
        if self.code.is_empty() {
            disassemble_ir(&self.ir, &names)
        } else {
            disassemble(&self.code, &names)
        }
    }
}

pub trait Stage {
    fn name(&self) -> &'static str;
    fn run(&self, state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Tokenize,
    Parse,
    Transform,
    ParameterAnalysis,
    Flatten,
    Cleanup,
    Compile,
    Optimize,
    ResolveJumps,
    Package,
    Validation,
}

impl StageId {
    pub const ALL: [StageId; 11] = [
        StageId::Tokenize,
        StageId::Parse,
        StageId::Transform,
        StageId::ParameterAnalysis,
        StageId::Flatten,
        StageId::Cleanup,
        StageId::Compile,
        StageId::Optimize,
        StageId::ResolveJumps,
        StageId::Package,
        StageId::Validation,
    ];

    /// 1-based position in the full pipeline.
    pub fn number(self) -> usize {
        self as usize + 1
    }
}

impl Stage for StageId {
    fn name(&self) -> &'static str {
        match self {
            StageId::Tokenize => "Tokenize",
            StageId::Parse => "Parse",
            StageId::Transform => "Transform",
            StageId::ParameterAnalysis => "ParameterAnalysis",
            StageId::Flatten => "Flatten",
            StageId::Cleanup => "Cleanup",
            StageId::Compile => "Compile",
            StageId::Optimize => "Optimize",
            StageId::ResolveJumps => "ResolveJumps",
            StageId::Package => "Package",
            StageId::Validation => "Validation",
        }
    }

    fn run(&self, state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
        match self {
            StageId::Tokenize => {
                state.tokens = tokenize(&state.source, &mut state.variables, state.context)?;
                Ok(())
            }
            StageId::Parse => {
                let output =
                    parse_tokens(&state.source, &state.tokens, &mut state.variables, state.context)?;
                state.ast = output.ast;
                state.script_defines = output.defines;
                state.rules = output.rules;
                Ok(())
            }
            StageId::Transform => analyzer::transform::transform(state),
            StageId::ParameterAnalysis => analyzer::parameters::analyze(state),
            StageId::Flatten => analyzer::flatten::flatten(state),
            StageId::Cleanup => analyzer::cleanup::cleanup(state),
            StageId::Compile => bytecode::compile(state),
            StageId::Optimize => optimizer::optimize(state),
            StageId::ResolveJumps => jumps::resolve(state),
            StageId::Package => package::package(state),
            StageId::Validation => validation::validate(state),
        }
    }
}

/// A failed compilation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("stage {stage_index} ({stage_name}) failed: {error}")]
pub struct CompileFailure {
    /// 1-based number of the failing stage in the full pipeline.
    pub stage_index: usize,
    pub stage_name: &'static str,
    pub error: CompileErrorKind,
    /// Everything reported before and including the error.
    pub diagnostics: Vec<Diagnostic>,
    pub ast_dump: String,
    pub disassembly: String,
    /// The compiled source, for rendering spans.
    pub source_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: SmallVec<[StageId; 12]>,
}

impl Pipeline {
    /// Every stage, from source text. `Optimize` is left out when
    /// optimization is off.
    pub fn for_source(options: &CompileOptions) -> Self {
        Self {
            stages: StageId::ALL
                .into_iter()
                .filter(|s| *s != StageId::Optimize || options.optimize)
                .collect(),
        }
    }

    /// The stages after parsing.
    pub fn for_parsed(options: &CompileOptions) -> Self {
        let mut pipeline = Self::for_source(options);
        pipeline
            .stages
            .retain(|s| !matches!(s, StageId::Tokenize | StageId::Parse));
        pipeline
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    pub fn run(&self, state: &mut CompilationState<'_>) -> Result<(), CompileFailure> {
        for stage in &self.stages {
            let name = stage.name();
            state.stage = Some(name);
            let started = Instant::now();
            trace!(stage = name, "Running stage");
            if let Err(error) = stage.run(state) {
                return Err(fail(state, *stage, error));
            }
            let elapsed = started.elapsed();
            debug!(stage = name, ?elapsed, "Stage completed");
            if state.options.verbose {
                state.note(
                    Severity::Info,
                    format!("stage {} ({}) completed in {:?}", stage.number(), name, elapsed),
                );
            }
            if state.options.trace {
                let dump = match stage {
                    StageId::Compile | StageId::Optimize | StageId::ResolveJumps => {
                        state.disassembly()
                    }
                    StageId::Tokenize | StageId::Package | StageId::Validation => continue,
                    _ => state.ast_dump(),
                };
                state.note(Severity::Trace, format!("after {}:\n{}", name, dump));
            }
        }
        state.stage = None;
        Ok(())
    }
}

fn fail(
    state: &mut CompilationState<'_>,
    stage: StageId,
    error: CompileErrorKind,
) -> CompileFailure {
    let name = stage.name();
    let ast_dump = state.ast_dump();
    let disassembly = state.disassembly();
    if state.options.trace {
        info!(stage = name, "AST at failure:\n{}", ast_dump);
        info!(stage = name, "Bytecode at failure:\n{}", disassembly);
    }
    debug!(stage = name, %error, "Compilation failed");
    state.diagnostics.push(error.to_diagnostic(name));
    CompileFailure {
        stage_index: stage.number(),
        stage_name: name,
        error,
        diagnostics: std::mem::take(&mut state.diagnostics),
        ast_dump,
        disassembly,
        source_text: state.source.clone(),
    }
}

/// Compiles source text into a script.
pub fn compile(
    source: &str,
    context: &EngineContext,
    options: &CompileOptions,
) -> Result<CompiledScript, CompileFailure> {
    let mut state = CompilationState::new(source, options, context);
    Pipeline::for_source(options).run(&mut state)?;
    finish(state)
}

/// Compiles a script parsed ahead of time.
pub fn compile_parsed(
    script: ParsedScript,
    context: &EngineContext,
    options: &CompileOptions,
) -> Result<CompiledScript, CompileFailure> {
    let mut state = CompilationState::from_parsed(script, options, context);
    Pipeline::for_parsed(options).run(&mut state)?;
    finish(state)
}

fn finish(mut state: CompilationState<'_>) -> Result<CompiledScript, CompileFailure> {
    let Some(package) = state.package.take() else {
        let error = CompileErrorKind::Internal("pipeline finished without a package".into());
        return Err(fail(&mut state, StageId::Package, error));
    };
    if state.options.report {
        let h = package.header();
        let summary = format!(
            "package: {} bytes of code, {} data slots, {} stack slots ({:?}), {} of {} bytes used",
            h.code_size,
            h.data_slots,
            h.stack_slots,
            state.stack_source,
            h.used_size,
            h.total_size()
        );
        state.note(Severity::Info, summary);
    }
    Ok(CompiledScript::from_state(package, state))
}
