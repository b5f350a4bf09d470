use std::any::Any;

use pretty_assertions::assert_eq;

use crate::compiler::package::{Package, PackageLayout, PackageParts, TargetAllocator};
use crate::vm::context::{CallHandles, EngineContext, ExternalFunction, FunctionTable, ParamSpec};
use crate::vm::error::{Completion, Status, VmError};
use crate::vm::interpreter::{ExecutionOptions, Interpreter};
use crate::vm::memory::{Memory, write_lanes};
use crate::vm::metadata::{self, SlotMeta};
use crate::vm::opcode::{
    EXTENDED_PREFIX, ExtendedOpcode, Opcode, constant_byte, reduction_control, slot_byte,
};
use crate::vm::ssmd::{SsmdBlock, SsmdInterpreter};
use crate::vm::value::{Value, ValueType};

use Opcode::*;

// Builtin constant table indices used below.
const ONE: u8 = 1;
const TWO: u8 = 3;
const TEN: u8 = 8;

fn op(o: Opcode) -> u8 {
    o.byte()
}

fn slot(n: u8) -> u8 {
    slot_byte(n)
}

fn constant(index: u8) -> u8 {
    constant_byte(index)
}

/// Hand-assembles a package whose data slots hold `data`, laid out back to
/// back, and returns it with its initial data image.
fn assemble(code: &[u8], data: &[Value], stack_slots: usize) -> (Package, Vec<u8>) {
    let slots: usize = data.iter().map(|v| v.size as usize).sum();
    let mut meta = vec![0u8; slots];
    let mut image = vec![0u8; slots * 4];
    let mut at = 0;
    for value in data {
        metadata::write(&mut meta, at, SlotMeta::new(value.ty, value.size));
        assert!(write_lanes(&mut image, at, value));
        at += value.size as usize;
    }
    let package = Package::assemble(PackageParts {
        code,
        data_metadata: &meta,
        data_image: &image,
        stack_slots,
        layout: PackageLayout::Full,
        allocator: TargetAllocator::Exact,
    });
    (package, image)
}

fn run(code: &[u8], data: &[Value], stack_slots: usize) -> Result<Memory, VmError> {
    let (package, image) = assemble(code, data, stack_slots);
    let context = EngineContext::default();
    let mut memory = Memory::new(&package, &image);
    let mut interpreter = Interpreter::new(&package, &context, ExecutionOptions::default());
    let completion = interpreter.execute(&mut memory, &mut CallHandles::none())?;
    assert_eq!(completion, Completion::Finished);
    Ok(memory)
}

#[test]
fn compounds_fold_left_to_right() {
    // o = (a + b) * 10, with precedence already resolved by the compiler
    let code = [
        op(Assign),
        slot(2),
        slot(0),
        op(Add),
        slot(1),
        op(Mul),
        constant(TEN),
        op(End),
        op(Return),
    ];
    let memory = run(&code, &[Value::scalar(2.0), Value::scalar(3.0), Value::scalar(0.0)], 0).unwrap();
    assert_eq!(memory.read(2), Some(Value::scalar(50.0)));
}

#[test]
fn adjacent_values_build_a_vector() {
    let code = [op(Assign), slot(1), slot(0), constant(ONE), constant(TWO), op(End), op(Return)];
    let memory = run(&code, &[Value::scalar(7.0), Value::splat(0.0, 3)], 0).unwrap();
    assert_eq!(memory.read(1), Some(Value::vector(&[7.0, 1.0, 2.0])));
}

#[test]
fn scalars_broadcast_on_assignment() {
    let code = [op(Assign), slot(0), constant(TEN), op(End), op(Return)];
    let memory = run(&code, &[Value::splat(0.0, 4)], 0).unwrap();
    assert_eq!(memory.read(0), Some(Value::splat(10.0, 4)));
}

#[test]
fn swizzled_assignment_writes_selected_components() {
    // v.zx = (1, 2)
    let code = [
        op(AssignSwizzle),
        slot(0),
        2,
        0b00_10,
        constant(ONE),
        constant(TWO),
        op(End),
        op(Return),
    ];
    let memory = run(&code, &[Value::vector(&[5.0, 6.0, 7.0])], 0).unwrap();
    assert_eq!(memory.read(0), Some(Value::vector(&[2.0, 6.0, 1.0])));
}

#[test]
fn swizzled_reads_reorder_components() {
    let code = [
        op(Assign),
        slot(3),
        op(Swizzle),
        2,
        0b00_01,
        slot(0),
        op(End),
        op(Return),
    ];
    let memory = run(&code, &[Value::vector(&[1.0, 2.0, 3.0]), Value::splat(0.0, 2)], 0).unwrap();
    assert_eq!(memory.read(3), Some(Value::vector(&[2.0, 1.0])));
}

#[test]
fn pushed_values_are_popped_by_compounds() {
    // push a * 2; o = pop + a
    let meta = SlotMeta::numeric(1).encode();
    let code = [
        op(Push),
        slot(0),
        op(Mul),
        constant(TWO),
        op(End),
        op(Assign),
        slot(1),
        op(StackPop),
        meta,
        op(Add),
        slot(0),
        op(End),
        op(Return),
    ];
    let (package, image) = assemble(&code, &[Value::scalar(3.0), Value::scalar(0.0)], 2);
    let context = EngineContext::default();
    let mut memory = Memory::new(&package, &image);
    let mut interpreter = Interpreter::new(&package, &context, ExecutionOptions::default());
    interpreter.execute(&mut memory, &mut CallHandles::none()).unwrap();
    assert_eq!(memory.read(1), Some(Value::scalar(9.0)));
    assert_eq!(interpreter.high_water_mark(), 1);
    // Popping clears the stack metadata again.
    assert_eq!(metadata::read(&memory.metadata, 2), None);
}

#[test]
fn pushing_past_the_stack_fails() {
    let code = [op(Push), constant(ONE), op(End), op(Return)];
    let err = run(&code, &[Value::scalar(0.0)], 0).unwrap_err();
    assert_eq!(err, VmError::StackTooSmall { needed: 1, capacity: 0 });
    assert_eq!(err.status(), Status::StackTooSmall);
}

#[test]
fn vector_push_writes_metadata_at_both_ends() {
    let code = [op(Push), constant(ONE), constant(TWO), constant(TEN), op(End), op(Return)];
    let (package, image) = assemble(&code, &[Value::scalar(0.0)], 4);
    let context = EngineContext::default();
    let mut memory = Memory::new(&package, &image);
    let mut interpreter = Interpreter::new(&package, &context, ExecutionOptions::default());
    interpreter.execute(&mut memory, &mut CallHandles::none()).unwrap();
    let first = metadata::read(&memory.metadata, 1);
    let last = metadata::read(&memory.metadata, 3);
    assert_eq!(first, Some(SlotMeta::numeric(3)));
    assert_eq!(first, last);
}

#[test]
fn mismatched_pops_yield_a_sentinel_in_checked_builds() {
    if !crate::vm::CHECKED {
        return;
    }
    let code = [
        op(Push),
        constant(ONE),
        constant(TWO),
        op(End),
        op(Assign),
        slot(0),
        op(StackPop),
        SlotMeta::numeric(1).encode(),
        op(End),
        op(Return),
    ];
    let memory = run(&code, &[Value::scalar(0.0)], 2).unwrap();
    let value = memory.read(0).unwrap();
    assert!(value.lanes[0].is_nan());
}

#[test]
fn conditional_jumps_skip_forward() {
    let code = [
        op(Condition),
        slot(0),
        op(End),
        op(JumpIfZero),
        4,
        op(Assign),
        slot(1),
        constant(TEN),
        op(End),
        op(Return),
    ];
    let skipped = run(&code, &[Value::scalar(0.0), Value::scalar(-1.0)], 0).unwrap();
    assert_eq!(skipped.read(1), Some(Value::scalar(-1.0)));
    let taken = run(&code, &[Value::scalar(1.0), Value::scalar(-1.0)], 0).unwrap();
    assert_eq!(taken.read(1), Some(Value::scalar(10.0)));
}

/// `do { i = i + 1 } while (i < 10)`.
fn counting_loop() -> Vec<u8> {
    vec![
        op(Assign),
        slot(0),
        slot(0),
        op(Add),
        constant(ONE),
        op(End),
        op(Condition),
        slot(0),
        op(Lt),
        constant(TEN),
        op(End),
        op(JumpIfZero),
        2,
        op(JumpBack),
        15,
        op(Return),
    ]
}

#[test]
fn jump_back_repeats_until_the_condition_fails() {
    let code = counting_loop();
    let (package, image) = assemble(&code, &[Value::scalar(0.0)], 0);
    let context = EngineContext::default();
    let mut memory = Memory::new(&package, &image);
    let mut interpreter = Interpreter::new(&package, &context, ExecutionOptions::default());
    interpreter.execute(&mut memory, &mut CallHandles::none()).unwrap();
    assert_eq!(memory.read(0), Some(Value::scalar(10.0)));
    assert_eq!(interpreter.iterations(), 9);
}

#[test]
fn iteration_limit_stops_long_loops() {
    let code = counting_loop();
    let (package, image) = assemble(&code, &[Value::scalar(0.0)], 0);
    let context = EngineContext::default();
    let mut memory = Memory::new(&package, &image);
    let options = ExecutionOptions {
        max_iterations: 5,
        ..ExecutionOptions::default()
    };
    let mut interpreter = Interpreter::new(&package, &context, options);
    let err = interpreter
        .execute(&mut memory, &mut CallHandles::none())
        .unwrap_err();
    assert_eq!(err, VmError::MaxIterationsExceeded { limit: 5 });
}

#[test]
fn yield_suspends_for_the_requested_frames() {
    let code = [
        op(Assign),
        slot(0),
        constant(TEN),
        op(End),
        op(Yield),
        2,
        op(Assign),
        slot(0),
        slot(0),
        op(Add),
        constant(ONE),
        op(End),
        op(Return),
    ];
    let (package, image) = assemble(&code, &[Value::scalar(0.0)], 2);
    let context = EngineContext::default();
    let mut memory = Memory::new(&package, &image);
    let mut handles = CallHandles::none();
    let mut interpreter = Interpreter::new(&package, &context, ExecutionOptions::default());

    assert_eq!(interpreter.execute(&mut memory, &mut handles), Ok(Completion::Yielded));
    assert_eq!(memory.read(0), Some(Value::scalar(10.0)));
    assert_eq!(interpreter.resume(&mut memory, &mut handles), Ok(Completion::Yielded));
    assert_eq!(memory.read(0), Some(Value::scalar(10.0)));
    assert_eq!(interpreter.resume(&mut memory, &mut handles), Ok(Completion::Finished));
    assert_eq!(memory.read(0), Some(Value::scalar(11.0)));
    assert_eq!(interpreter.register(), Value::scalar(11.0));
    assert_eq!(
        interpreter.resume(&mut memory, &mut handles),
        Err(VmError::NotSuspended)
    );
}

#[test]
fn reductions_read_their_control_byte() {
    let code = [
        op(Assign),
        slot(3),
        op(AddAll),
        reduction_control(1, 1),
        slot(0),
        op(End),
        op(Return),
    ];
    let memory = run(&code, &[Value::vector(&[1.0, 2.0, 3.0]), Value::scalar(0.0)], 0).unwrap();
    assert_eq!(memory.read(3), Some(Value::scalar(6.0)));
}

fn call_code(id: u32) -> Vec<u8> {
    let mut code = vec![op(Assign), slot(1), EXTENDED_PREFIX, ExtendedOpcode::ExternalCall.byte()];
    code.extend(id.to_be_bytes());
    code.extend([slot(0), op(End), op(Return)]);
    code
}

fn counting_context() -> EngineContext {
    let mut functions = FunctionTable::new();
    functions
        .register(ExternalFunction::new(
            7,
            "double",
            vec![ParamSpec::numeric(1)],
            ParamSpec::numeric(1),
            |args, handles| {
                if let Some(calls) = handles.environment::<u32>() {
                    *calls += 1;
                }
                Value::scalar(args[0].lanes[0] * 2.0)
            },
        ))
        .unwrap();
    EngineContext {
        functions,
        ..EngineContext::default()
    }
}

#[test]
fn external_calls_receive_the_host_handles() {
    let code = call_code(7);
    let (package, image) = assemble(&code, &[Value::scalar(4.0), Value::scalar(0.0)], 0);
    let context = counting_context();
    let mut memory = Memory::new(&package, &image);
    let mut calls = 0u32;
    let mut handles = CallHandles::new(Some(&mut calls as &mut dyn Any), None);
    let mut interpreter = Interpreter::new(&package, &context, ExecutionOptions::default());
    interpreter.execute(&mut memory, &mut handles).unwrap();
    drop(handles);
    assert_eq!(memory.read(1), Some(Value::scalar(8.0)));
    assert_eq!(calls, 1);
}

#[test]
fn validation_mode_stubs_external_calls() {
    let code = call_code(7);
    let (package, image) = assemble(&code, &[Value::scalar(4.0), Value::scalar(-1.0)], 0);
    let context = counting_context();
    let mut memory = Memory::new(&package, &image);
    let options = ExecutionOptions {
        validation_mode: true,
        ..ExecutionOptions::default()
    };
    let mut interpreter = Interpreter::new(&package, &context, options);
    interpreter.execute(&mut memory, &mut CallHandles::none()).unwrap();
    assert_eq!(memory.read(1), Some(Value::zero(ValueType::Numeric, 1)));
}

#[test]
fn unknown_external_functions_fail() {
    let err = run(&call_code(99), &[Value::scalar(4.0), Value::scalar(0.0)], 0).unwrap_err();
    assert_eq!(err, VmError::UnknownFunction { id: 99 });
}

#[test]
fn operators_at_root_are_rejected() {
    let err = run(&[op(Add)], &[], 0).unwrap_err();
    assert_eq!(
        err,
        VmError::UnsupportedOpcodeAtRoot {
            opcode: 0x10,
            offset: 0
        }
    );
}

// ============================================================================
// Batched execution
// ============================================================================

#[test]
fn batch_runs_every_instance_in_lock_step() {
    // out = in * 2
    let code = [op(Assign), slot(1), slot(0), op(Mul), constant(TWO), op(End), op(Return)];
    let (package, image) = assemble(&code, &[Value::scalar(0.0), Value::scalar(0.0)], 0);
    let context = EngineContext::default();
    let mut block = SsmdBlock::new(&package, &image, 4);
    for i in 0..4 {
        assert!(block.write(i, 0, &Value::scalar(i as f32 + 1.0)));
    }
    let mut interpreter = SsmdInterpreter::new(&package, &context, ExecutionOptions::default());
    let completion = block.execute(&mut interpreter, &mut CallHandles::none()).unwrap();
    assert_eq!(completion, Completion::Finished);
    let out: Vec<f32> = (0..4).map(|i| block.read(i, 1).unwrap().lanes[0]).collect();
    assert_eq!(out, vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn batch_branches_must_agree() {
    let code = [
        op(Condition),
        slot(0),
        op(End),
        op(JumpIfZero),
        4,
        op(Assign),
        slot(1),
        constant(TEN),
        op(End),
        op(Return),
    ];
    let (package, image) = assemble(&code, &[Value::scalar(0.0), Value::scalar(0.0)], 0);
    let context = EngineContext::default();
    let mut interpreter = SsmdInterpreter::new(&package, &context, ExecutionOptions::default());

    let mut uniform = SsmdBlock::new(&package, &image, 3);
    for i in 0..3 {
        uniform.write(i, 0, &Value::scalar(1.0));
    }
    uniform.execute(&mut interpreter, &mut CallHandles::none()).unwrap();
    assert_eq!(uniform.read(2, 1), Some(Value::scalar(10.0)));

    let mut divergent = SsmdBlock::new(&package, &image, 3);
    divergent.write(1, 0, &Value::scalar(1.0));
    let err = divergent
        .execute(&mut interpreter, &mut CallHandles::none())
        .unwrap_err();
    assert!(matches!(err, VmError::DivergentBranch { instance: 1, offset: 3 }));
}

#[test]
fn batch_yield_resumes_all_instances() {
    let code = [
        op(Yield),
        1,
        op(Assign),
        slot(0),
        slot(0),
        op(Add),
        constant(ONE),
        op(End),
        op(Return),
    ];
    let (package, image) = assemble(&code, &[Value::scalar(0.0)], 2);
    let context = EngineContext::default();
    let mut block = SsmdBlock::new(&package, &image, 2);
    let mut interpreter = SsmdInterpreter::new(&package, &context, ExecutionOptions::default());
    let mut handles = CallHandles::none();
    assert_eq!(block.execute(&mut interpreter, &mut handles), Ok(Completion::Yielded));
    assert_eq!(block.resume(&mut interpreter, &mut handles), Ok(Completion::Finished));
    assert_eq!(block.read(0, 0), Some(Value::scalar(1.0)));
    assert_eq!(block.read(1, 0), Some(Value::scalar(1.0)));
}
