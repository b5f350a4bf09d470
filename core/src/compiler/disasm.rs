//! Human-readable listings of code streams and intermediate bytecode.
//!
//! ```text
//! 0000  Push b * c
//! 0005  Assign o = a - pop[1]
//! 000C  Condition o > 1
//! 0010  JumpIfZero +4 -> 0016
//! ```
//!
//! Slots print as the variable they hold, shared constants by name or value.
//! A listing stops at the first byte it cannot decode and says so.

use core::fmt::Write;

use hashbrown::HashMap;

use crate::compiler::ir::{Instruction, Ir};
use crate::parser::variables::{VariableKind, VariableTable};
use crate::parser::syntax::Swizzle;
use crate::stdlib::constants::ConstantTable;
use crate::vm::context::FunctionTable;
use crate::vm::metadata::SlotMeta;
use crate::vm::opcode::{Byte, ExtendedOpcode, Opcode, split_reduction_control};
use crate::vm::value::{Value, ValueType};

/// Names used when printing operands.
pub struct DisasmNames<'a> {
    slots: HashMap<u8, String>,
    constants: &'a ConstantTable,
    functions: &'a FunctionTable,
    precision: usize,
}

impl<'a> DisasmNames<'a> {
    pub fn new(
        variables: &VariableTable,
        constants: &'a ConstantTable,
        functions: &'a FunctionTable,
        precision: usize,
    ) -> Self {
        let slots = variables
            .iter()
            .filter_map(|v| {
                let slot = u8::try_from(v.slot()?).ok()?;
                let name = match (v.kind, v.constant) {
                    (VariableKind::Constant, Some(value)) => format_value(&value, precision),
                    _ => v.name.to_string(),
                };
                Some((slot, name))
            })
            .collect();
        Self {
            slots,
            constants,
            functions,
            precision,
        }
    }

    fn slot(&self, slot: u8) -> String {
        self.slots
            .get(&slot)
            .cloned()
            .unwrap_or_else(|| format!("s{}", slot))
    }

    fn constant(&self, index: u8) -> String {
        match self.constants.entry(index) {
            Some(entry) => match &entry.name {
                Some(name) => name.to_string(),
                None => format_number(entry.value, self.precision),
            },
            None => format!("k{}", index),
        }
    }
}

/// Formats `x` with at most `precision` decimals, trailing zeros dropped.
pub fn format_number(x: f32, precision: usize) -> String {
    let text = format!("{:.*}", precision, x);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

pub fn format_value(value: &Value, precision: usize) -> String {
    match value.ty {
        ValueType::Id => format!("#{}", value.as_id()),
        ValueType::Numeric if value.size == 1 => format_number(value.lanes[0], precision),
        ValueType::Numeric => {
            let lanes: Vec<String> = value
                .as_slice()
                .iter()
                .map(|&x| format_number(x, precision))
                .collect();
            format!("({})", lanes.join(", "))
        }
    }
}

/// Lists a resolved code stream, one root instruction per line.
pub fn disassemble(code: &[u8], names: &DisasmNames<'_>) -> String {
    let mut out = String::new();
    let mut reader = Reader { code, pos: 0 };
    while reader.pos < code.len() {
        let start = reader.pos;
        let rendered = names.instruction(&mut reader, |offset, after| {
            let target = match offset {
                Offset::Forward(n) => after + n as usize,
                Offset::Backward(n) => after.wrapping_sub(n as usize),
            };
            format!("{} -> {:04X}", offset, target)
        });
        match rendered {
            Some(text) => {
                let _ = writeln!(out, "{:04X}  {}", start, text);
            }
            None => {
                let byte = code.get(start).copied().unwrap_or(0);
                let _ = writeln!(out, "{:04X}  ?? {:#04x} (listing stops)", start, byte);
                break;
            }
        }
    }
    out
}

/// Lists intermediate bytecode, with labels and symbolic jump targets.
pub fn disassemble_ir(ir: &Ir, names: &DisasmNames<'_>) -> String {
    let mut out = String::new();
    for instruction in &ir.instructions {
        for label in &instruction.labels {
            let _ = writeln!(out, "{}:", label);
        }
        let _ = writeln!(out, "      {}", names.ir_instruction(instruction));
    }
    for label in &ir.trailing_labels {
        let _ = writeln!(out, "{}:", label);
    }
    out
}

/// A decoded jump offset.
#[derive(Debug, Clone, Copy)]
enum Offset {
    Forward(u8),
    Backward(u8),
}

impl core::fmt::Display for Offset {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Offset::Forward(n) => write!(f, "+{}", n),
            Offset::Backward(n) => write!(f, "-{}", n),
        }
    }
}

struct Reader<'c> {
    code: &'c [u8],
    pos: usize,
}

impl Reader<'_> {
    fn next(&mut self) -> Option<u8> {
        let byte = *self.code.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }
}

impl DisasmNames<'_> {
    fn ir_instruction(&self, instruction: &Instruction) -> String {
        let raw = instruction.raw();
        let mut reader = Reader { code: &raw, pos: 0 };
        let target = instruction.jump_target();
        let rendered = self.instruction(&mut reader, |offset, _| match target {
            Some(label) => label.to_string(),
            None => offset.to_string(),
        });
        match rendered {
            Some(text) => text,
            None => format!("?? {:02X?}", raw),
        }
    }

    /// Renders the root instruction at the reader. `jump` formats a jump
    /// from its offset and the position following the offset byte.
    fn instruction(
        &self,
        r: &mut Reader<'_>,
        jump: impl Fn(Offset, usize) -> String,
    ) -> Option<String> {
        let Byte::Op(op) = Byte::decode(r.next()?)? else {
            return None;
        };
        Some(match op {
            Opcode::Return | Opcode::Nop => op.mnemonic().to_string(),
            Opcode::Assign => {
                let target = self.slot_operand(r.next()?)?;
                format!("Assign {} = {}", target, self.compound(r)?)
            }
            Opcode::AssignSwizzle => {
                let target = self.slot_operand(r.next()?)?;
                let swizzle = Swizzle {
                    count: r.next()?,
                    pattern: r.next()?,
                };
                format!("Assign {}{} = {}", target, swizzle, self.compound(r)?)
            }
            Opcode::Push => format!("Push {}", self.compound(r)?),
            Opcode::Condition => format!("Condition {}", self.compound(r)?),
            Opcode::Jump | Opcode::JumpIfZero | Opcode::JumpIfNotZero | Opcode::JumpBack => {
                let byte = r.next()?;
                let offset = if op == Opcode::JumpBack {
                    Offset::Backward(byte)
                } else {
                    Offset::Forward(byte)
                };
                format!("{} {}", op.mnemonic(), jump(offset, r.pos))
            }
            Opcode::Yield => format!("Yield {}", r.next()?),
            _ => return None,
        })
    }

    fn slot_operand(&self, byte: u8) -> Option<String> {
        match Byte::decode(byte)? {
            Byte::Slot(slot) => Some(self.slot(slot)),
            _ => None,
        }
    }

    fn compound(&self, r: &mut Reader<'_>) -> Option<String> {
        let mut parts: Vec<String> = Vec::new();
        let mut unary = String::new();
        loop {
            let byte = r.next()?;
            if let Some(Byte::Op(op)) = Byte::decode(byte) {
                if op == Opcode::End {
                    return Some(parts.join(" "));
                }
                if let Some(binary) = op.as_binary() {
                    parts.push(binary.symbol().to_string());
                    continue;
                }
                if let Some(u) = op.as_unary() {
                    unary.push_str(u.symbol());
                    continue;
                }
            }
            let value = self.value(byte, r)?;
            parts.push(format!("{}{}", std::mem::take(&mut unary), value));
        }
    }

    fn value(&self, byte: u8, r: &mut Reader<'_>) -> Option<String> {
        match Byte::decode(byte)? {
            Byte::Slot(slot) => Some(self.slot(slot)),
            Byte::Constant(index) => Some(self.constant(index)),
            Byte::Extended => {
                let ext = ExtendedOpcode::from_byte(r.next()?)?;
                if ext == ExtendedOpcode::ExternalCall {
                    let mut id = [0u8; 4];
                    for b in &mut id {
                        *b = r.next()?;
                    }
                    let id = u32::from_be_bytes(id);
                    let function = self.functions.get(id)?;
                    return self.call(function.name.as_str(), function.arity(), r);
                }
                self.call(ext.mnemonic(), ext.fixed_arity()?, r)
            }
            Byte::Op(Opcode::StackPop) => {
                let meta = SlotMeta::decode(r.next()?)?;
                Some(match meta.ty {
                    ValueType::Numeric => format!("pop[{}]", meta.size),
                    ValueType::Id => "pop[id]".to_string(),
                })
            }
            Byte::Op(Opcode::Swizzle) => {
                let swizzle = Swizzle {
                    count: r.next()?,
                    pattern: r.next()?,
                };
                let inner = r.next()?;
                Some(format!("{}{}", self.value(inner, r)?, swizzle))
            }
            Byte::Op(Opcode::Random) => {
                let count = r.next()? as usize;
                self.call(Opcode::Random.mnemonic(), count, r)
            }
            Byte::Op(op) if op.is_reduction() => {
                let (count, _) = split_reduction_control(r.next()?);
                self.call(op.mnemonic(), count, r)
            }
            Byte::Op(op) => self.call(op.mnemonic(), op.fixed_arity()?, r),
        }
    }

    fn call(&self, name: &str, arity: usize, r: &mut Reader<'_>) -> Option<String> {
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            let byte = r.next()?;
            args.push(self.value(byte, r)?);
        }
        Some(format!("{}({})", name, args.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::LabelId;
    use crate::parser::syntax::Span;
    use crate::vm::opcode::constant_byte;

    fn variables() -> VariableTable {
        let mut table = VariableTable::new();
        let a = table.intern("a", Span::default());
        table.declare(a, VariableKind::Input);
        table.get_mut(a).vector_size = Some(3);
        table.get_mut(a).offset = Some(0);
        let o = table.intern("o", Span::default());
        table.declare(o, VariableKind::Output);
        table.get_mut(o).vector_size = Some(1);
        table.get_mut(o).offset = Some(12);
        let k = table.add_constant(Value::scalar(0.125), Span::default());
        table.get_mut(k).offset = Some(16);
        table
    }

    #[test]
    fn lists_root_instructions_with_names() {
        let constants = ConstantTable::builtin();
        let functions = FunctionTable::new();
        let vars = variables();
        let names = DisasmNames::new(&vars, &constants, &functions, 3);
        let one = constant_byte(constants.find_value(1.0, 0.0).unwrap());
        let code = [
            Opcode::Assign.byte(),
            0x83,
            Opcode::Swizzle.byte(),
            1,
            0b01,
            0x80,
            Opcode::Add.byte(),
            one,
            Opcode::Mul.byte(),
            0x84,
            Opcode::End.byte(),
            Opcode::Condition.byte(),
            Opcode::Neg.byte(),
            Opcode::Length.byte(),
            0x80,
            Opcode::End.byte(),
            Opcode::JumpIfZero.byte(),
            1,
            Opcode::Nop.byte(),
            Opcode::Return.byte(),
        ];
        let listing = disassemble(&code, &names);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(
            lines,
            vec![
                "0000  Assign o = a.y + 1 * 0.125",
                "000B  Condition -length(a)",
                "0010  JumpIfZero +1 -> 0013",
                "0012  Nop",
                "0013  Return",
            ]
        );
    }

    #[test]
    fn ir_listings_show_labels() {
        let constants = ConstantTable::builtin();
        let functions = FunctionTable::new();
        let vars = variables();
        let names = DisasmNames::new(&vars, &constants, &functions, 3);
        let mut ret = Instruction::new(Opcode::Return);
        ret.labels.push(LabelId(2));
        let ir = Ir {
            instructions: vec![Instruction::jump(Opcode::Jump, LabelId(2)), ret],
            ..Ir::default()
        };
        assert_eq!(disassemble_ir(&ir, &names), "      Jump L2\nL2:\n      Return\n");
    }

    #[test]
    fn undecodable_bytes_stop_the_listing() {
        let constants = ConstantTable::builtin();
        let functions = FunctionTable::new();
        let vars = VariableTable::new();
        let names = DisasmNames::new(&vars, &constants, &functions, 3);
        let listing = disassemble(&[Opcode::Nop.byte(), 0x3E, 0x00], &names);
        assert_eq!(listing, "0000  Nop\n0001  ?? 0x3e (listing stops)\n");
    }

    #[test]
    fn numbers_drop_trailing_zeros() {
        assert_eq!(format_number(2.0, 4), "2");
        assert_eq!(format_number(0.126, 2), "0.13");
        assert_eq!(format_value(&Value::vector(&[1.0, 0.5]), 3), "(1, 0.5)");
    }
}
