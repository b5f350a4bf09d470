//! The variable table: every named value, compiler-introduced constant slot
//! and hidden temporary of a script, with its shape, usage counts and final
//! data layout.

use core::fmt;

use ecow::EcoString;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::parser::syntax::Span;
use crate::vm::memory::{SLOT_BYTES, write_lanes};
use crate::vm::metadata::{self, SlotMeta};
use crate::vm::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Interned on sight, not (yet) declared nor assigned.
    Undeclared,
    Input,
    Output,
    InOut,
    Local,
    /// Compiler-introduced slot holding a literal.
    Constant,
}

impl VariableKind {
    pub fn is_input(self) -> bool {
        matches!(self, VariableKind::Input | VariableKind::InOut)
    }

    pub fn is_output(self) -> bool {
        matches!(self, VariableKind::Output | VariableKind::InOut)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            VariableKind::Undeclared => "undeclared",
            VariableKind::Input => "input",
            VariableKind::Output => "output",
            VariableKind::InOut => "inout",
            VariableKind::Local => "local",
            VariableKind::Constant => "constant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub id: VarId,
    pub name: EcoString,
    pub kind: VariableKind,
    pub value_type: ValueType,
    /// Unknown until declared or inferred from a first assignment.
    pub vector_size: Option<u8>,
    pub reads: u32,
    pub writes: u32,
    /// Byte offset in the data segment, assigned by the layout stages.
    pub offset: Option<usize>,
    /// Offset requested with `@` in the declaration.
    pub pinned_offset: Option<usize>,
    /// Value of a compiler-introduced constant slot.
    pub constant: Option<Value>,
    /// Hidden temporaries (switch subjects) never show up in the variable map.
    pub hidden: bool,
    pub span: Span,
}

impl Variable {
    pub fn refcount(&self) -> u32 {
        self.reads + self.writes
    }

    pub fn size(&self) -> u8 {
        self.vector_size.unwrap_or(1)
    }

    pub fn slot(&self) -> Option<usize> {
        self.offset.map(|o| o / SLOT_BYTES)
    }

    pub fn meta(&self) -> SlotMeta {
        SlotMeta::new(self.value_type, self.size())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    vars: Vec<Variable>,
    by_name: HashMap<EcoString, VarId>,
    constants: HashMap<(u8, [u32; 4]), VarId>,
    /// Inputs in declaration order.
    input_order: Vec<VarId>,
    next_hidden: u32,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: EcoString, kind: VariableKind, span: Span) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable {
            id,
            name,
            kind,
            value_type: ValueType::Numeric,
            vector_size: None,
            reads: 0,
            writes: 0,
            offset: None,
            pinned_offset: None,
            constant: None,
            hidden: false,
            span,
        });
        id
    }

    /// Returns the id for `name`, creating an undeclared entry on first sight.
    pub fn intern(&mut self, name: &str, span: Span) -> VarId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let name = EcoString::from(name);
        let id = self.push(name.clone(), VariableKind::Undeclared, span);
        self.by_name.insert(name, id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    pub fn try_get(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Variable> {
        self.vars.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Marks `id` as declared with the given kind; records input order.
    pub fn declare(&mut self, id: VarId, kind: VariableKind) {
        self.vars[id.index()].kind = kind;
        if kind.is_input() {
            self.input_order.push(id);
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Variable> {
        self.input_order.iter().map(|id| self.get(*id))
    }

    /// Creates a hidden numeric temporary.
    pub fn add_hidden(&mut self, span: Span) -> VarId {
        let name = EcoString::from(format!("$t{}", self.next_hidden));
        self.next_hidden += 1;
        let id = self.push(name, VariableKind::Local, span);
        self.vars[id.index()].hidden = true;
        id
    }

    /// Returns the constant slot holding `value`, deduplicated by bits.
    pub fn add_constant(&mut self, value: Value, span: Span) -> VarId {
        let key = (value.size, value.lanes.map(f32::to_bits));
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.push(
            EcoString::from(format!("${}", value)),
            VariableKind::Constant,
            span,
        );
        let var = &mut self.vars[id.index()];
        var.vector_size = Some(value.size);
        var.value_type = value.ty;
        var.constant = Some(value);
        var.hidden = true;
        self.constants.insert(key, id);
        id
    }

    /// Resets usage counts before they are recounted.
    pub fn reset_counts(&mut self) {
        for var in &mut self.vars {
            var.reads = 0;
            var.writes = 0;
        }
    }

    /// Variables that occupy data slots, in slot order.
    pub fn laid_out(&self) -> impl Iterator<Item = &Variable> {
        let mut placed: Vec<&Variable> = self.vars.iter().filter(|v| v.offset.is_some()).collect();
        placed.sort_by_key(|v| v.offset);
        placed.into_iter()
    }

    /// Number of data slots in use.
    pub fn data_slots(&self) -> usize {
        self.vars
            .iter()
            .filter_map(|v| v.slot().map(|s| s + v.size() as usize))
            .max()
            .unwrap_or(0)
    }

    /// Initial metadata of the data slots.
    pub fn data_metadata(&self) -> Vec<u8> {
        let mut meta = vec![metadata::TAG_EMPTY; self.data_slots()];
        for var in self.laid_out() {
            if let Some(slot) = var.slot() {
                metadata::write(&mut meta, slot, var.meta());
            }
        }
        meta
    }

    /// Initial data bytes: zero everywhere except constant slots.
    pub fn data_image(&self) -> Vec<u8> {
        let mut image = vec![0u8; self.data_slots() * SLOT_BYTES];
        for var in self.laid_out() {
            if let (Some(slot), Some(value)) = (var.slot(), var.constant) {
                write_lanes(&mut image, slot, &value);
            }
        }
        image
    }

    /// Public description of the layout, for hosts.
    pub fn variable_map(&self) -> VariableMap {
        VariableMap {
            variables: self
                .laid_out()
                .filter(|v| !v.hidden)
                .map(|v| VariableInfo {
                    name: v.name.to_string(),
                    kind: v.kind,
                    value_type: v.value_type,
                    size: v.size(),
                    offset: v.offset.unwrap_or(0),
                })
                .collect(),
        }
    }
}

/// Layout entry of one named variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    pub name: String,
    pub kind: VariableKind,
    pub value_type: ValueType,
    pub size: u8,
    /// Byte offset in the data segment.
    pub offset: usize,
}

impl VariableInfo {
    pub fn slot(&self) -> usize {
        self.offset / SLOT_BYTES
    }
}

/// Offsets and shapes of the named variables of a compiled script.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariableMap {
    pub variables: Vec<VariableInfo>,
}

impl VariableMap {
    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.iter().filter(|v| v.kind.is_input())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &VariableInfo> {
        self.variables.iter().filter(|v| v.kind.is_output())
    }
}
