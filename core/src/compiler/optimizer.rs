//! Peephole optimizer over intermediate bytecode.
//!
//! Rewrites run until none applies. The local ones look at a single
//! instruction, or at two neighbours where the second carries no label, so
//! they never move a label:
//!
//! - `Push X End; Assign t Pop End` becomes `Assign t X End`
//! - `Neg Neg` and `Not Not` cancel
//! - `+ 0`, `- 0`, `* 1` and `/ 1` on a scalar constant disappear
//! - `Assign t t End` disappears
//!
//! The control-flow ones can, and use [`Ir::remove`] to hand labels on:
//!
//! - a `Condition` on a constant decides its conditional jump statically
//! - a `Jump` to the very next instruction disappears
//! - instructions after a `Jump`, up to the next label, are unreachable
//!
//! With `experimental_parallel` the local rewrites run concurrently over the
//! segments between labelled instructions.

use core::ops::Range;

use tracing::{debug, trace, warn};

use crate::compiler::error::CompileErrorKind;
use crate::compiler::ir::{Instruction, Ir, IrByte, Marker};
use crate::compiler::pipeline::CompilationState;
use crate::parser::variables::VariableTable;
use crate::stdlib::constants::ConstantTable;
use crate::vm::opcode::{Byte, Opcode, token_len};
use crate::vm::value::Value;

/// Upper bound on rewrite rounds; each round shrinks the program, so this is
/// never reached on sane input.
const MAX_ROUNDS: usize = 64;

/// Resolves constant tokens to their values.
#[derive(Clone, Copy)]
struct Constants<'a> {
    shared: &'a ConstantTable,
    variables: &'a VariableTable,
}

impl Constants<'_> {
    fn value(&self, byte: IrByte) -> Option<Value> {
        match Byte::decode(byte.value)? {
            Byte::Constant(index) => self.shared.get(index).map(Value::scalar),
            Byte::Slot(_) => match byte.marker {
                Some(Marker::Offset(var)) => self.variables.try_get(var)?.constant,
                _ => None,
            },
            _ => None,
        }
    }

    fn is_scalar(&self, byte: IrByte, expected: f32) -> bool {
        self.value(byte)
            .is_some_and(|v| v.size == 1 && v.lanes[0] == expected)
    }
}

pub fn optimize(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    let parallel = state.options.experimental_parallel;
    if parallel {
        warn!("Parallel optimization is experimental");
        if !cfg!(feature = "parallel") {
            state.warn(
                None,
                "parallel optimization requested but the `parallel` feature is disabled; \
                 optimizing sequentially"
                    .to_string(),
            );
        }
    }

    let constants = Constants {
        shared: &state.context.constants,
        variables: &state.variables,
    };
    let mut ir = std::mem::take(&mut state.ir);
    let before = ir.byte_len();
    let mut rounds = 0;
    loop {
        let local = if parallel {
            local_pass_segmented(&mut ir, constants)
        } else {
            local_pass(&mut ir.instructions, constants)
        };
        let global = control_flow_pass(&mut ir, constants);
        rounds += 1;
        trace!(round = rounds, local, global, "Optimizer round");
        if local + global == 0 || rounds == MAX_ROUNDS {
            break;
        }
    }
    debug!(
        rounds,
        before,
        after = ir.byte_len(),
        "Optimized bytecode"
    );
    state.ir = ir;
    Ok(())
}

// ============================================================================
// Local rewrites
// ============================================================================

/// Applies the local rewrites to a run of instructions. Returns the number
/// of rewrites made.
fn local_pass(instructions: &mut Vec<Instruction>, constants: Constants<'_>) -> usize {
    let mut changes = 0;
    let mut i = 0;
    while i < instructions.len() {
        if i + 1 < instructions.len() && merge_push(instructions, i) {
            changes += 1;
            continue;
        }
        if self_assignment(&instructions[i]) && instructions[i].labels.is_empty() {
            trace!(index = i, "Dropping self-assignment");
            instructions.remove(i);
            changes += 1;
            continue;
        }
        while simplify_compound(&mut instructions[i], constants) {
            changes += 1;
        }
        i += 1;
    }
    changes
}

#[cfg(feature = "parallel")]
fn local_pass_segmented(ir: &mut Ir, constants: Constants<'_>) -> usize {
    use rayon::prelude::*;

    let mut segments = split_segments(std::mem::take(&mut ir.instructions));
    let changes = segments
        .par_iter_mut()
        .map(|segment| local_pass(segment, constants))
        .sum();
    ir.instructions = segments.into_iter().flatten().collect();
    changes
}

#[cfg(not(feature = "parallel"))]
fn local_pass_segmented(ir: &mut Ir, constants: Constants<'_>) -> usize {
    local_pass(&mut ir.instructions, constants)
}

/// Splits before every labelled instruction.
#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
fn split_segments(instructions: Vec<Instruction>) -> Vec<Vec<Instruction>> {
    let mut segments: Vec<Vec<Instruction>> = Vec::new();
    for instruction in instructions {
        match segments.last_mut() {
            Some(segment) if instruction.labels.is_empty() => segment.push(instruction),
            _ => segments.push(vec![instruction]),
        }
    }
    segments
}

/// Token ranges of a compound.
fn tokens(raw: &[u8], range: Range<usize>) -> Option<Vec<Range<usize>>> {
    let mut out = Vec::new();
    let mut pos = range.start;
    while pos < range.end {
        let len = token_len(raw, pos)?;
        out.push(pos..pos + len);
        pos += len;
    }
    (pos == range.end).then_some(out)
}

fn is_binary(byte: u8) -> bool {
    Opcode::from_byte(byte).is_some_and(|op| op.as_binary().is_some())
}

/// `Push X End` followed by an unlabelled `Assign t Pop End`.
fn merge_push(instructions: &mut Vec<Instruction>, i: usize) -> bool {
    let (push, assign) = (&instructions[i], &instructions[i + 1]);
    if push.opcode() != Some(Opcode::Push) || !assign.labels.is_empty() {
        return false;
    }
    if !matches!(
        assign.opcode(),
        Some(Opcode::Assign | Opcode::AssignSwizzle)
    ) {
        return false;
    }
    let (Some(source), Some(target)) = (push.compound_range(), assign.compound_range()) else {
        return false;
    };
    if target.len() != 2 || assign.bytes[target.start].value != Opcode::StackPop.byte() {
        return false;
    }

    let mut merged = Instruction {
        bytes: assign.bytes[..target.start].iter().copied().collect(),
        labels: push.labels.clone(),
    };
    merged.bytes.extend(push.bytes[source].iter().copied());
    merged.push(Opcode::End.byte());
    trace!(index = i, "Merging push into assignment");
    instructions[i + 1] = merged;
    instructions.remove(i);
    true
}

/// `Assign t t End`.
fn self_assignment(instruction: &Instruction) -> bool {
    if instruction.opcode() != Some(Opcode::Assign) {
        return false;
    }
    match instruction.compound_range() {
        Some(range) if range.len() == 1 => {
            let target = instruction.bytes[1];
            let source = instruction.bytes[range.start];
            source.value == target.value
                && matches!(Byte::decode(source.value), Some(Byte::Slot(_)))
        }
        _ => false,
    }
}

/// Applies one compound rewrite, if any matches.
fn simplify_compound(instruction: &mut Instruction, constants: Constants<'_>) -> bool {
    let Some(range) = instruction.compound_range() else {
        return false;
    };
    let raw = instruction.raw();
    let Some(tokens) = tokens(&raw, range.clone()) else {
        return false;
    };

    for (k, token) in tokens.iter().enumerate() {
        let byte = raw[token.start];
        // Unary pairs.
        if matches!(Opcode::from_byte(byte), Some(Opcode::Neg | Opcode::Not))
            && let Some(next) = tokens.get(k + 1)
            && raw[next.start] == byte
        {
            trace!(op = ?Opcode::from_byte(byte), "Cancelling repeated unary");
            instruction.bytes.drain(token.start..next.end);
            return true;
        }

        // Identity operands.
        let identity = match Opcode::from_byte(byte) {
            Some(Opcode::Add | Opcode::Sub) => 0.0,
            Some(Opcode::Mul | Opcode::Div) => 1.0,
            _ => continue,
        };
        let Some(operand) = tokens.get(k + 1) else {
            continue;
        };
        let followed_by_operator = match tokens.get(k + 2) {
            Some(after) => is_binary(raw[after.start]),
            None => true,
        };
        if operand.len() == 1
            && followed_by_operator
            && constants.is_scalar(instruction.bytes[operand.start], identity)
        {
            trace!(op = ?Opcode::from_byte(byte), "Dropping identity operand");
            instruction.bytes.drain(token.start..operand.end);
            return true;
        }
    }
    false
}

// ============================================================================
// Control-flow rewrites
// ============================================================================

fn control_flow_pass(ir: &mut Ir, constants: Constants<'_>) -> usize {
    let mut changes = 0;
    let mut i = 0;
    while i < ir.len() {
        if constant_condition(ir, i, constants) {
            changes += 1;
            continue;
        }
        if ir.instructions[i].opcode() == Some(Opcode::Jump) {
            let target = ir.instructions[i].jump_target();
            let to_next = match ir.instructions.get(i + 1) {
                Some(next) => target.is_some_and(|l| next.labels.contains(&l)),
                None => false,
            };
            if to_next {
                trace!(index = i, "Dropping jump to the next instruction");
                ir.remove(i);
                changes += 1;
                continue;
            }
            while let Some(next) = ir.instructions.get(i + 1)
                && next.labels.is_empty()
                && next.opcode() != Some(Opcode::Return)
            {
                trace!(index = i + 1, "Dropping unreachable instruction");
                ir.remove(i + 1);
                changes += 1;
            }
        }
        i += 1;
    }
    changes
}

/// `Condition K End` on a constant, followed by an unlabelled conditional
/// jump: the jump becomes unconditional or goes away with the condition.
fn constant_condition(ir: &mut Ir, i: usize, constants: Constants<'_>) -> bool {
    let condition = &ir.instructions[i];
    if condition.opcode() != Some(Opcode::Condition) {
        return false;
    }
    let Some(range) = condition.compound_range() else {
        return false;
    };
    if range.len() != 1 {
        return false;
    }
    let Some(value) = constants.value(condition.bytes[range.start]) else {
        return false;
    };
    let Some(jump) = ir.instructions.get(i + 1) else {
        return false;
    };
    if !jump.labels.is_empty() {
        return false;
    }
    let taken = match jump.opcode() {
        Some(Opcode::JumpIfZero) => !value.is_true(),
        Some(Opcode::JumpIfNotZero) => value.is_true(),
        _ => return false,
    };

    if taken {
        trace!(index = i, "Constant condition: jump always taken");
        ir.instructions[i + 1].bytes[0] = IrByte::plain(Opcode::Jump.byte());
    } else {
        trace!(index = i, "Constant condition: jump never taken");
        ir.remove(i + 1);
    }
    ir.remove(i);
    true
}
