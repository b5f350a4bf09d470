#![allow(dead_code)]

use vexpr::{CallHandles, CompileOptions, CompiledScript, Engine, Memory, Value};
use vexpr_core::vm::Completion;

pub fn engine() -> Engine {
    init_logging();
    Engine::new(CompileOptions::default(), |_| {}).unwrap()
}

pub fn engine_with(options: CompileOptions) -> Engine {
    init_logging();
    Engine::new(options, |_| {}).unwrap()
}

/// Runs one instance to completion with the given inputs.
pub fn run(engine: &Engine, script: &CompiledScript, inputs: &[(&str, Value)]) -> Memory {
    let mut memory = script.create_memory();
    for (name, value) in inputs {
        script.set_input(&mut memory, name, *value).unwrap();
    }
    let mut interpreter = script.interpreter(engine.context());
    let completion = interpreter
        .execute(&mut memory, &mut CallHandles::none())
        .unwrap();
    assert_eq!(completion, Completion::Finished);
    memory
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}
