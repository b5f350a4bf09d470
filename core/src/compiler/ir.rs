//! Intermediate bytecode: root instructions whose bytes may still carry
//! symbolic markers.
//!
//! The compiler emits one [`Instruction`] per root opcode. Jump offsets are
//! placeholder bytes marked with the target label; slot bytes are marked
//! with the variable they address so the disassembler can name them. Labels
//! attach to the instruction they precede, which lets the optimizer delete
//! an instruction by handing its labels to the next one.

use core::ops::Range;

use smallvec::{SmallVec, smallvec};

use crate::parser::ast::LabelId;
use crate::parser::variables::VarId;
use crate::vm::opcode::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Placeholder for the relative offset to a label.
    Jump(LabelId),
    /// Slot byte of a variable or constant slot.
    Offset(VarId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrByte {
    pub value: u8,
    pub marker: Option<Marker>,
}

impl IrByte {
    pub fn plain(value: u8) -> Self {
        Self {
            value,
            marker: None,
        }
    }

    pub fn marked(value: u8, marker: Marker) -> Self {
        Self {
            value,
            marker: Some(marker),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub bytes: SmallVec<[IrByte; 8]>,
    /// Labels bound to the start of this instruction.
    pub labels: SmallVec<[LabelId; 2]>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            bytes: smallvec![IrByte::plain(opcode.byte())],
            labels: SmallVec::new(),
        }
    }

    pub fn jump(opcode: Opcode, label: LabelId) -> Self {
        Self {
            bytes: smallvec![
                IrByte::plain(opcode.byte()),
                IrByte::marked(0, Marker::Jump(label))
            ],
            labels: SmallVec::new(),
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.bytes.push(IrByte::plain(byte));
    }

    pub fn push_marked(&mut self, byte: u8, marker: Marker) {
        self.bytes.push(IrByte::marked(byte, marker));
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_byte(self.bytes.first()?.value)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn raw(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.value).collect()
    }

    /// Label a jump instruction targets.
    pub fn jump_target(&self) -> Option<LabelId> {
        self.bytes.iter().find_map(|b| match b.marker {
            Some(Marker::Jump(label)) => Some(label),
            _ => None,
        })
    }

    /// Bytes before the compound of an `Assign`, `AssignSwizzle`, `Push` or
    /// `Condition`.
    pub fn header_len(&self) -> Option<usize> {
        match self.opcode()? {
            Opcode::Assign => Some(2),
            Opcode::AssignSwizzle => Some(4),
            Opcode::Push | Opcode::Condition => Some(1),
            _ => None,
        }
    }

    /// Byte range of the compound tokens, `End` excluded.
    pub fn compound_range(&self) -> Option<Range<usize>> {
        let start = self.header_len()?;
        let end = self.len().checked_sub(1)?;
        (start <= end && self.bytes[end].value == Opcode::End.byte()).then_some(start..end)
    }
}

/// The instruction list of a program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ir {
    pub instructions: Vec<Instruction>,
    /// Labels left behind after the last instruction was removed.
    pub trailing_labels: SmallVec<[LabelId; 2]>,
}

impl Ir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Removes an instruction, moving its labels to the one that follows.
    pub fn remove(&mut self, index: usize) -> Instruction {
        let removed = self.instructions.remove(index);
        match self.instructions.get_mut(index) {
            Some(next) => {
                let mut labels = removed.labels.clone();
                labels.extend(next.labels.drain(..));
                next.labels = labels;
            }
            None => self.trailing_labels.extend(removed.labels.iter().copied()),
        }
        removed
    }

    /// Size in bytes of the encoded program.
    pub fn byte_len(&self) -> usize {
        self.instructions.iter().map(Instruction::len).sum()
    }

    /// Bytes with unresolved jump offsets left as zero.
    pub fn raw(&self) -> Vec<u8> {
        self.instructions
            .iter()
            .flat_map(|i| i.bytes.iter().map(|b| b.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_hands_labels_to_the_next_instruction() {
        let mut ir = Ir::new();
        let mut first = Instruction::new(Opcode::Nop);
        first.labels.push(LabelId(0));
        let mut second = Instruction::new(Opcode::Return);
        second.labels.push(LabelId(1));
        ir.instructions = vec![first, second];

        ir.remove(0);
        assert_eq!(ir.instructions[0].labels.as_slice(), &[LabelId(0), LabelId(1)]);
        ir.remove(0);
        assert_eq!(ir.trailing_labels.as_slice(), &[LabelId(0), LabelId(1)]);
    }

    #[test]
    fn compound_range_skips_the_header_and_end() {
        let mut assign = Instruction::new(Opcode::Assign);
        assign.push(0x80);
        assign.push(0x41);
        assign.push(Opcode::End.byte());
        assert_eq!(assign.compound_range(), Some(2..3));
        assert_eq!(Instruction::new(Opcode::Return).compound_range(), None);
    }
}
