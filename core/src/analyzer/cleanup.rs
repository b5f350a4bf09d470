//! Cleanup: recounts variable usage after flattening and lays out the data
//! segment.
//!
//! ```text
//! | inputs (declaration order) | outputs | locals | constant slots |
//! ```
//!
//! Inputs keep the offsets given by parameter analysis. Locals and constant
//! slots nothing refers to any more get no slot.

use tracing::{debug, trace};

use crate::compiler::error::CompileErrorKind;
use crate::compiler::pipeline::CompilationState;
use crate::parser::ast::{ConstantRef, NodeKind};
use crate::parser::variables::{VarId, VariableKind, VariableTable};
use crate::vm::memory::SLOT_BYTES;
use crate::vm::opcode::MAX_DATA_SLOTS;

pub fn cleanup(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    recount(state);
    let variables = &mut state.variables;

    let mut offset = variables
        .inputs()
        .filter_map(|v| v.offset.map(|o| o + v.size() as usize * SLOT_BYTES))
        .max()
        .unwrap_or(0);
    for kind in [VariableKind::Output, VariableKind::Local, VariableKind::Constant] {
        let ids: Vec<VarId> = variables
            .iter()
            .filter(|v| v.kind == kind)
            .map(|v| v.id)
            .collect();
        for id in ids {
            let var = variables.get_mut(id);
            if kind != VariableKind::Output && var.refcount() == 0 {
                trace!(variable = %var.name, "Dropped unreferenced variable");
                var.offset = None;
                continue;
            }
            var.offset = Some(offset);
            offset += var.size() as usize * SLOT_BYTES;
        }
    }
    for var in variables.iter_mut() {
        if var.kind == VariableKind::Undeclared {
            var.offset = None;
        }
    }

    let slots = variables.data_slots();
    if slots > MAX_DATA_SLOTS {
        return Err(CompileErrorKind::DataSegmentOverflow {
            slots,
            limit: MAX_DATA_SLOTS,
        });
    }
    debug!(slots, "Laid out data segment");
    state.data_metadata = variables.data_metadata();
    state.data_image = variables.data_image();
    Ok(())
}

fn recount(state: &mut CompilationState<'_>) {
    let variables: &mut VariableTable = &mut state.variables;
    variables.reset_counts();
    state.ast.walk(state.ast.root(), &mut |_, node| match node.kind {
        NodeKind::Variable(var) | NodeKind::Constant(ConstantRef::Slot(var)) => {
            variables.get_mut(var).reads += 1;
        }
        NodeKind::Assignment { target, .. } => variables.get_mut(target).writes += 1,
        _ => {}
    });
}
