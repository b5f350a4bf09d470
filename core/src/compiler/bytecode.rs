//! Bytecode generation: turns the flattened statement list into
//! intermediate bytecode.
//!
//! Every root statement becomes one instruction, preceded by the `Push`
//! instructions of its hoisted operands. Labels are held back until the next
//! instruction is emitted and bound to it; whatever is left at the end goes
//! to the closing `Return`.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::compiler::error::CompileErrorKind;
use crate::compiler::ir::{Instruction, Ir, Marker};
use crate::compiler::pipeline::CompilationState;
use crate::parser::ast::{Ast, Callee, ConstantRef, JumpKind, LabelId, NodeId, NodeKind};
use crate::parser::variables::{VarId, VariableTable};
use crate::stdlib::functions::BuiltinCode;
use crate::vm::metadata::SlotMeta;
use crate::vm::opcode::{
    CONSTANT_COUNT, EXTENDED_PREFIX, ExtendedOpcode, MAX_DATA_SLOTS, Opcode, constant_byte,
    reduction_control, slot_byte,
};

/// Stack slots a `Yield` adds on top of the current depth: the register
/// (up to four lanes) and the frame counter.
const YIELD_STACK_SLOTS: usize = 5;

/// Emits intermediate bytecode for a flattened AST.
///
/// Tracks the stack depth statement by statement, which gives an upper bound
/// on stack use that holds without running the code.
pub struct BytecodeCompiler<'s> {
    ast: &'s Ast,
    variables: &'s VariableTable,

    /// Instructions emitted so far.
    ir: Ir,

    /// Labels waiting for the next instruction.
    pending: SmallVec<[LabelId; 2]>,

    /// Stack depth, in slots, before the current instruction.
    depth: usize,

    /// Deepest stack use seen.
    max_depth: usize,
}

pub fn compile(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    let mut compiler = BytecodeCompiler::new(&state.ast, &state.variables);
    for &statement in state.ast.children(state.ast.root()) {
        compiler.statement(statement)?;
    }
    let (ir, max_depth) = compiler.finish();
    debug!(
        instructions = ir.len(),
        bytes = ir.byte_len(),
        static_stack_slots = max_depth,
        "Generated bytecode"
    );
    state.ir = ir;
    state.static_stack_slots = max_depth;
    Ok(())
}

impl<'s> BytecodeCompiler<'s> {
    pub fn new(ast: &'s Ast, variables: &'s VariableTable) -> Self {
        Self {
            ast,
            variables,
            ir: Ir::new(),
            pending: SmallVec::new(),
            depth: 0,
            max_depth: 0,
        }
    }

    /// Closes the program with a `Return` and returns it with the static
    /// stack bound.
    pub fn finish(mut self) -> (Ir, usize) {
        self.emit(Instruction::new(Opcode::Return));
        (self.ir, self.max_depth)
    }

    fn emit(&mut self, mut instruction: Instruction) {
        instruction.labels.extend(self.pending.drain(..));
        trace!(bytes = ?instruction.raw(), labels = ?instruction.labels, "Emit");
        self.ir.instructions.push(instruction);
    }

    pub fn statement(&mut self, id: NodeId) -> Result<(), CompileErrorKind> {
        let node = self.ast.node(id);
        for &dep in &node.depends_on {
            self.push(dep)?;
        }

        match node.kind {
            NodeKind::Assignment { target, swizzle } => {
                let slot = self.slot_of(target)?;
                let mut instruction = match swizzle {
                    None => {
                        let mut i = Instruction::new(Opcode::Assign);
                        i.push_marked(slot, Marker::Offset(target));
                        i
                    }
                    Some(swizzle) => {
                        let mut i = Instruction::new(Opcode::AssignSwizzle);
                        i.push_marked(slot, Marker::Offset(target));
                        i.push(swizzle.count);
                        i.push(swizzle.pattern);
                        i
                    }
                };
                self.compound(self.value_child(id)?, &mut instruction)?;
                self.emit(instruction);
            }
            NodeKind::Condition => {
                let mut instruction = Instruction::new(Opcode::Condition);
                self.compound(self.value_child(id)?, &mut instruction)?;
                self.emit(instruction);
            }
            NodeKind::Jump { kind, label } => {
                let opcode = match kind {
                    JumpKind::Always => Opcode::Jump,
                    JumpKind::IfZero => Opcode::JumpIfZero,
                    JumpKind::IfNotZero => Opcode::JumpIfNotZero,
                };
                self.emit(Instruction::jump(opcode, label));
            }
            NodeKind::Label(label) => self.pending.push(label),
            NodeKind::Yield { frames } => {
                self.max_depth = self.max_depth.max(self.depth + YIELD_STACK_SLOTS);
                let mut instruction = Instruction::new(Opcode::Yield);
                instruction.push(frames);
                self.emit(instruction);
            }
            ref other => {
                return Err(CompileErrorKind::Internal(
                    format!("{} node at statement level", other.name()).into(),
                ));
            }
        }
        Ok(())
    }

    /// `Push <compound> End` for a hoisted operand, after its own
    /// dependencies.
    fn push(&mut self, id: NodeId) -> Result<(), CompileErrorKind> {
        let node = self.ast.node(id);
        for &dep in &node.depends_on {
            self.push(dep)?;
        }
        let mut instruction = Instruction::new(Opcode::Push);
        let compound = self.value_child(id)?;
        self.compound(compound, &mut instruction)?;
        self.emit(instruction);

        let size = self.ast.node(compound).value_size().unwrap_or(1) as usize;
        self.depth += size;
        self.max_depth = self.max_depth.max(self.depth);
        Ok(())
    }

    fn value_child(&self, id: NodeId) -> Result<NodeId, CompileErrorKind> {
        self.ast.child(id, 0).ok_or_else(|| {
            CompileErrorKind::Internal(format!("{} without a value", self.ast.kind(id).name()).into())
        })
    }

    /// Emits the tokens of a compound followed by `End`.
    fn compound(&mut self, id: NodeId, out: &mut Instruction) -> Result<(), CompileErrorKind> {
        let node = self.ast.node(id);
        if !matches!(node.kind, NodeKind::Compound) || node.indexer.is_some() {
            return Err(CompileErrorKind::Internal(
                format!("expected a bare compound, found {}", node.kind.name()).into(),
            ));
        }
        for &member in &node.children {
            match self.ast.kind(member) {
                NodeKind::Operator(op) => out.push(Opcode::from_binary(*op).byte()),
                NodeKind::Unary(op) => out.push(Opcode::from_unary(*op).byte()),
                _ => self.value(member, out)?,
            }
        }
        out.push(Opcode::End.byte());
        Ok(())
    }

    /// Emits one value token, with its swizzle prefix and call arguments.
    fn value(&mut self, id: NodeId, out: &mut Instruction) -> Result<(), CompileErrorKind> {
        let node = self.ast.node(id);
        if let Some(swizzle) = node.indexer {
            out.push(Opcode::Swizzle.byte());
            out.push(swizzle.count);
            out.push(swizzle.pattern);
        }

        match node.kind {
            NodeKind::Variable(var) | NodeKind::Constant(ConstantRef::Slot(var)) => {
                let slot = self.slot_of(var)?;
                out.push_marked(slot, Marker::Offset(var));
            }
            NodeKind::Constant(ConstantRef::Shared(index)) => {
                if index as usize >= CONSTANT_COUNT {
                    return Err(CompileErrorKind::Internal(
                        format!("shared constant index {} out of range", index).into(),
                    ));
                }
                out.push(constant_byte(index));
            }
            NodeKind::StackPop => {
                let size = node.vector_size.unwrap_or(1);
                out.push(Opcode::StackPop.byte());
                out.push(SlotMeta::new(node.value_type, size).encode());
                self.depth = self.depth.saturating_sub(size as usize);
            }
            NodeKind::Function(Callee::Builtin(function)) => {
                let args = &node.children;
                match function.code {
                    BuiltinCode::Base(op) => {
                        out.push(op.byte());
                        if op == Opcode::Random {
                            out.push(args.len() as u8);
                        } else if op.is_reduction() {
                            let size = node.vector_size.unwrap_or(1);
                            out.push(reduction_control(args.len(), size));
                        }
                    }
                    BuiltinCode::Extended(ext) => {
                        out.push(EXTENDED_PREFIX);
                        out.push(ext.byte());
                    }
                }
                for &arg in args {
                    self.value(arg, out)?;
                }
            }
            NodeKind::Function(Callee::External(function)) => {
                out.push(EXTENDED_PREFIX);
                out.push(ExtendedOpcode::ExternalCall.byte());
                for byte in function.to_be_bytes() {
                    out.push(byte);
                }
                for &arg in &node.children {
                    self.value(arg, out)?;
                }
            }
            ref other => {
                return Err(CompileErrorKind::Internal(
                    format!("{} cannot be encoded as a value token", other.name()).into(),
                ));
            }
        }
        Ok(())
    }

    fn slot_of(&self, var: VarId) -> Result<u8, CompileErrorKind> {
        let variable = self.variables.get(var);
        match variable.slot() {
            Some(slot) if slot < MAX_DATA_SLOTS => Ok(slot_byte(slot as u8)),
            Some(slot) => Err(CompileErrorKind::Internal(
                format!("'{}' lies at slot {}, past the addressable range", variable.name, slot)
                    .into(),
            )),
            None => Err(CompileErrorKind::Internal(
                format!("'{}' has no data offset", variable.name).into(),
            )),
        }
    }
}
