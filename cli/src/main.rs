use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use tracing::debug;
use vexpr::{
    CallHandles, CompileOptions, CompiledScript, Engine, Memory, render_diagnostics, render_failure,
};
use vexpr_core::vm::{Completion, VmError};

mod inputs;

use inputs::{Assignment, parse_assignment, parse_define};

/// vexpr - compile and run vector expression scripts
#[derive(Parser, Debug)]
#[command(name = "vexpr", version)]
#[command(about = "Compile, inspect and run vexpr scripts", long_about = None)]
struct Cli {
    #[command(flatten)]
    options: OptionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OptionArgs {
    /// JSON file with compile options; the flags below override it
    #[arg(long, global = true, value_name = "FILE")]
    options: Option<PathBuf>,

    /// Host define, as KEY=VALUE (repeatable)
    #[arg(short = 'D', long = "define", value_parser = parse_define, global = true)]
    defines: Vec<(String, String)>,

    /// Skip the bytecode optimizer
    #[arg(long, global = true)]
    no_optimize: bool,

    /// Fail compilation when a `validate` rule fails
    #[arg(long, global = true)]
    auto_validate: bool,

    /// Store every literal in a data slot
    #[arg(long, global = true)]
    no_builtin_constants: bool,

    /// Tolerance for constant matching and validation
    #[arg(long, global = true)]
    epsilon: Option<f32>,

    /// Backward-jump limit per execution
    #[arg(long, global = true)]
    max_iterations: Option<u32>,

    /// Keep `dump(...)` calls
    #[arg(long, global = true)]
    debug_functions: bool,

    /// Seed for `random()`
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Report stage progress
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Report stage dumps
    #[arg(long, global = true)]
    trace: bool,

    /// Report a package summary
    #[arg(long, global = true)]
    report: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script and report its diagnostics
    Compile {
        script: PathBuf,

        /// Write the compiled script to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a script, or a file written by `compile --output`
    Run {
        script: PathBuf,

        /// Input value, as NAME=VALUE (repeatable). Values are `2.5`,
        /// `1,2,3` or `#7`; in batch mode `1/2/3` gives one per instance.
        #[arg(short, long = "input", value_parser = parse_assignment)]
        inputs: Vec<Assignment>,

        /// Run this many instances in lock-step
        #[arg(long, default_value_t = 1)]
        batch: usize,
    },

    /// Print the bytecode listing
    Disasm { script: PathBuf },

    /// Print the AST after analysis
    Dump { script: PathBuf },
}

/// Compiled scripts written by `compile --output` use this extension.
const COMPILED_EXTENSION: &str = "vxb";

impl OptionArgs {
    fn compile_options(&self) -> Result<CompileOptions> {
        let mut options = match &self.options {
            Some(path) => {
                let text = std::fs::read_to_string(path).into_diagnostic()?;
                debug!(path = %path.display(), "Loaded compile options");
                serde_json::from_str(&text).into_diagnostic()?
            }
            None => CompileOptions::default(),
        };
        for (key, value) in &self.defines {
            options.defines.insert(key.clone(), value.clone());
        }
        options.optimize &= !self.no_optimize;
        options.auto_validate |= self.auto_validate;
        options.use_builtin_constants &= !self.no_builtin_constants;
        options.include_debug_functions |= self.debug_functions;
        options.verbose |= self.verbose;
        options.trace |= self.trace;
        options.report |= self.report;
        if let Some(epsilon) = self.epsilon {
            options.constant_epsilon = epsilon;
        }
        if let Some(max_iterations) = self.max_iterations {
            options.max_iterations = max_iterations;
        }
        Ok(options)
    }

    fn engine(&self) -> Result<Engine> {
        let seed = self.seed;
        Engine::new(self.compile_options()?, |env| {
            if let Some(seed) = seed {
                env.seed(seed);
            }
        })
        .into_diagnostic()
    }
}

/// Which listing a command prints, also for a failed compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listing {
    None,
    Ast,
    Bytecode,
}

/// Compiles `path`, printing diagnostics to stderr. Compiled files are
/// loaded instead.
fn load(engine: &Engine, path: &Path, listing: Listing) -> Result<CompiledScript> {
    if path.extension().is_some_and(|ext| ext == COMPILED_EXTENSION) {
        let bytes = std::fs::read(path).into_diagnostic()?;
        return CompiledScript::from_bytes(&bytes).into_diagnostic();
    }
    let source = std::fs::read_to_string(path).into_diagnostic()?;
    match engine.compile(&source) {
        Ok(script) => {
            let color = std::io::stderr().is_terminal();
            render_diagnostics(&source, script.diagnostics(), &mut std::io::stderr(), color)
                .into_diagnostic()?;
            Ok(script)
        }
        Err(failure) => {
            match listing {
                Listing::None => {}
                Listing::Ast => print!("{}", failure.ast_dump),
                Listing::Bytecode => print!("{}", failure.disassembly),
            }
            render_failure(&failure);
            Err(miette!("could not compile {}", path.display()))
        }
    }
}

fn print_listing(listing: &str) {
    if listing.is_empty() {
        eprintln!("note: compiled files carry no listings, pass the source instead");
    } else {
        print!("{}", listing);
    }
}

fn print_outputs(script: &CompiledScript, prefix: &str, read: impl Fn(usize) -> Option<vexpr::Value>) {
    for var in script.outputs() {
        match read(var.slot()) {
            Some(value) => println!("{}{} = {}", prefix, var.name, value),
            None => println!("{}{} = ?", prefix, var.name),
        }
    }
}

fn run_single(engine: &Engine, script: &CompiledScript, inputs: &[Assignment]) -> Result<(), VmError> {
    let mut memory: Memory = script.create_memory();
    for input in inputs {
        if let Err(err) = script.set_input(&mut memory, &input.name, input.value_for(0)) {
            eprintln!("warning: {}", err);
        }
    }
    let mut interpreter = script.interpreter(engine.context());
    let mut handles = CallHandles::none();
    let mut completion = interpreter.execute(&mut memory, &mut handles)?;
    while completion == Completion::Yielded {
        println!("-- yield");
        print_outputs(script, "", |slot| memory.read(slot));
        completion = interpreter.resume(&mut memory, &mut handles)?;
    }
    print_outputs(script, "", |slot| memory.read(slot));
    Ok(())
}

fn run_batch(
    engine: &Engine,
    script: &CompiledScript,
    inputs: &[Assignment],
    count: usize,
) -> Result<(), VmError> {
    let mut block = script.ssmd_block(count);
    for input in inputs {
        for instance in 0..count {
            if let Err(err) =
                script.set_batch_input(&mut block, instance, &input.name, input.value_for(instance))
            {
                eprintln!("warning: {}", err);
                break;
            }
        }
    }
    let mut interpreter = script.ssmd_interpreter(engine.context());
    let mut handles = CallHandles::none();
    let mut completion = block.execute(&mut interpreter, &mut handles)?;
    while completion == Completion::Yielded {
        completion = block.resume(&mut interpreter, &mut handles)?;
    }
    for instance in 0..count {
        print_outputs(script, &format!("[{}] ", instance), |slot| block.read(instance, slot));
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    use tracing_subscriber::{EnvFilter, fmt};

    // RUST_LOG controls the log level, WARN by default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .into_diagnostic()?;

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let engine = cli.options.engine()?;

    match &cli.command {
        Command::Compile { script, output } => {
            let compiled = load(&engine, script, Listing::None)?;
            let header = compiled.package().header();
            println!(
                "{}: {} bytes of code, {} data slots, {} stack slots",
                script.display(),
                header.code_size,
                header.data_slots,
                header.stack_slots
            );
            if let Some(report) = compiled.validation()
                && !report.outcomes.is_empty()
            {
                let failed = report.failures().count();
                let total = report.outcomes.len();
                println!("validation: {} of {} rule(s) passed", total - failed, total);
            }
            if let Some(path) = output {
                let bytes = compiled.to_bytes().into_diagnostic()?;
                std::fs::write(path, bytes).into_diagnostic()?;
                debug!(path = %path.display(), "Wrote compiled script");
            }
        }
        Command::Run {
            script,
            inputs,
            batch,
        } => {
            let compiled = load(&engine, script, Listing::None)?;
            let result = if *batch > 1 {
                run_batch(&engine, &compiled, inputs, *batch)
            } else {
                run_single(&engine, &compiled, inputs)
            };
            if let Err(err) = result {
                let status = err.status();
                eprintln!("error: {} [{}]", err, status);
                return Ok(ExitCode::from(status.code()));
            }
        }
        Command::Disasm { script } => {
            let compiled = load(&engine, script, Listing::Bytecode)?;
            print_listing(compiled.disassembly());
        }
        Command::Dump { script } => {
            let compiled = load(&engine, script, Listing::Ast)?;
            print_listing(compiled.ast_dump());
        }
    }

    Ok(ExitCode::SUCCESS)
}
