//! Jump resolution: replaces label markers with relative offsets and emits
//! the final code bytes.
//!
//! Offsets count from the byte after the offset byte. Forward jumps reach up
//! to 255 bytes. Backward jumps exist only unconditionally, as `JumpBack`.

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use crate::compiler::error::CompileErrorKind;
use crate::compiler::ir::{Instruction, Ir, Marker};
use crate::compiler::pipeline::CompilationState;
use crate::parser::ast::LabelId;
use crate::vm::opcode::Opcode;

pub fn resolve(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    if !state.ir.trailing_labels.is_empty() {
        let labels = std::mem::take(&mut state.ir.trailing_labels);
        let message = format!(
            "labels {} point past the end of the code; anchoring them on a Nop",
            labels
                .iter()
                .map(LabelId::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        warn!("{}", message);
        state.warn(None, message);
        let mut nop = Instruction::new(Opcode::Nop);
        nop.labels = labels;
        state.ir.instructions.push(nop);
    }
    state.code = resolve_ir(&state.ir)?;
    debug!(bytes = state.code.len(), "Resolved jumps");
    Ok(())
}

/// Encodes `ir` with every jump offset filled in.
pub fn resolve_ir(ir: &Ir) -> Result<Vec<u8>, CompileErrorKind> {
    let mut positions: HashMap<LabelId, usize> = HashMap::new();
    let mut pos = 0;
    for instruction in &ir.instructions {
        for &label in &instruction.labels {
            positions.insert(label, pos);
        }
        pos += instruction.len();
    }
    for &label in &ir.trailing_labels {
        positions.insert(label, pos);
    }

    let mut code = Vec::with_capacity(pos);
    for instruction in &ir.instructions {
        let start = code.len();
        code.extend(instruction.bytes.iter().map(|b| b.value));
        for (i, byte) in instruction.bytes.iter().enumerate() {
            let Some(Marker::Jump(label)) = byte.marker else {
                continue;
            };
            let target = *positions
                .get(&label)
                .ok_or(CompileErrorKind::UnresolvedLabel(label))?;
            let marker = start + i;
            let distance = target as isize - (marker as isize + 1);
            let opcode = instruction.opcode();
            let encoded = match distance {
                0..=255 => distance as u8,
                -255..=-1 if opcode == Some(Opcode::Jump) => {
                    code[start] = Opcode::JumpBack.byte();
                    (-distance) as u8
                }
                _ => return Err(CompileErrorKind::JumpOutOfRange { label, distance }),
            };
            trace!(%label, marker, target, distance, "Resolved jump");
            code[marker] = encoded;
        }
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::Severity;
    use crate::api::options::CompileOptions;
    use crate::compiler::ir::IrByte;
    use crate::vm::context::EngineContext;

    fn labelled(mut instruction: Instruction, label: u32) -> Instruction {
        instruction.labels.push(LabelId(label));
        instruction
    }

    fn ir(instructions: Vec<Instruction>) -> Ir {
        Ir {
            instructions,
            ..Ir::default()
        }
    }

    #[test]
    fn forward_offsets_count_from_the_next_byte() {
        let code = resolve_ir(&ir(vec![
            Instruction::jump(Opcode::JumpIfZero, LabelId(0)),
            Instruction::new(Opcode::Nop),
            labelled(Instruction::new(Opcode::Return), 0),
        ]))
        .unwrap();
        assert_eq!(code, vec![Opcode::JumpIfZero.byte(), 1, Opcode::Nop.byte(), 0]);
    }

    #[test]
    fn backward_jumps_become_jump_back() {
        let code = resolve_ir(&ir(vec![
            labelled(Instruction::new(Opcode::Nop), 0),
            Instruction::jump(Opcode::Jump, LabelId(0)),
            Instruction::new(Opcode::Return),
        ]))
        .unwrap();
        assert_eq!(code, vec![Opcode::Nop.byte(), Opcode::JumpBack.byte(), 3, 0]);
    }

    #[test]
    fn backward_conditional_jumps_are_rejected() {
        let err = resolve_ir(&ir(vec![
            labelled(Instruction::new(Opcode::Nop), 0),
            Instruction::jump(Opcode::JumpIfNotZero, LabelId(0)),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            CompileErrorKind::JumpOutOfRange {
                label: LabelId(0),
                distance: -3
            }
        );
    }

    #[test]
    fn long_jumps_are_rejected() {
        let mut filler = Instruction::new(Opcode::Nop);
        filler.bytes.extend((0..300).map(|_| IrByte::plain(Opcode::Nop.byte())));
        let err = resolve_ir(&ir(vec![
            Instruction::jump(Opcode::Jump, LabelId(0)),
            filler,
            labelled(Instruction::new(Opcode::Return), 0),
        ]))
        .unwrap_err();
        assert!(matches!(err, CompileErrorKind::JumpOutOfRange { distance: 301, .. }));
    }

    #[test]
    fn trailing_labels_are_anchored_on_a_nop() {
        let options = CompileOptions::default();
        let context = EngineContext::default();
        let mut state = CompilationState::new("", &options, &context);
        state.ir.instructions = vec![
            Instruction::jump(Opcode::Jump, LabelId(0)),
            Instruction::new(Opcode::Return),
        ];
        state.ir.trailing_labels.push(LabelId(0));

        resolve(&mut state).unwrap();

        assert_eq!(
            state.code,
            vec![Opcode::Jump.byte(), 1, Opcode::Return.byte(), Opcode::Nop.byte()]
        );
        assert!(state.ir.trailing_labels.is_empty());
        let warning = state.diagnostics.last().unwrap();
        assert_eq!(warning.severity, Severity::Warning);
        assert!(warning.message.contains("past the end"), "{}", warning.message);
    }

    #[test]
    fn missing_labels_are_reported() {
        let err = resolve_ir(&ir(vec![Instruction::jump(Opcode::Jump, LabelId(4))])).unwrap_err();
        assert_eq!(err, CompileErrorKind::UnresolvedLabel(LabelId(4)));
    }
}
