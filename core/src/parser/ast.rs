//! Arena-backed syntax tree.
//!
//! Nodes live in one `Vec` and refer to each other by [`NodeId`]. Every node
//! records its owner, so moving a subtree is an index update on both ends.
//! Removed nodes stay in the arena, detached, and are never visited again.

use core::fmt;

use smallvec::SmallVec;

use crate::parser::syntax::{BinaryOp, Span, Swizzle, UnaryOp};
use crate::parser::variables::VarId;
use crate::stdlib::functions::BuiltinFunction;
use crate::vm::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Symbolic jump target, resolved to a byte offset by the jump resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpKind {
    Always,
    IfZero,
    IfNotZero,
}

/// Where a resolved constant lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstantRef {
    /// Index into the engine's shared constant table.
    Shared(u8),
    /// Compiler-introduced data slot.
    Slot(VarId),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Callee {
    Builtin(&'static BuiltinFunction),
    External(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    /// `target[.swizzle] = <child>`
    Assignment {
        target: VarId,
        swizzle: Option<Swizzle>,
    },
    /// Flat left-to-right stream of values, operators and unary markers.
    Compound,
    Operator(BinaryOp),
    /// Applies to the value that follows it in its compound.
    Unary(UnaryOp),
    Variable(VarId),
    /// Literal not yet resolved to a constant.
    Literal(f32),
    Constant(ConstantRef),
    Function(Callee),
    /// children: condition, then-block, optional else-block
    If,
    /// children: condition, body
    While,
    /// children: condition, body, step block; init in `depends_on`
    For,
    /// children: case/default nodes; subject assignment in `depends_on`
    Switch { subject: VarId },
    /// children: statements
    Case(f32),
    Default,
    Block,
    /// Evaluates its child into the result register.
    Condition,
    Jump { kind: JumpKind, label: LabelId },
    Label(LabelId),
    Yield { frames: u8 },
    /// Evaluates its child onto the stack.
    Push,
    /// Placeholder for a value pushed earlier.
    StackPop,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root => "Root",
            NodeKind::Assignment { .. } => "Assignment",
            NodeKind::Compound => "Compound",
            NodeKind::Operator(_) => "Operator",
            NodeKind::Unary(_) => "Unary",
            NodeKind::Variable(_) => "Variable",
            NodeKind::Literal(_) => "Literal",
            NodeKind::Constant(_) => "Constant",
            NodeKind::Function(_) => "Function",
            NodeKind::If => "If",
            NodeKind::While => "While",
            NodeKind::For => "For",
            NodeKind::Switch { .. } => "Switch",
            NodeKind::Case(_) => "Case",
            NodeKind::Default => "Default",
            NodeKind::Block => "Block",
            NodeKind::Condition => "Condition",
            NodeKind::Jump { .. } => "Jump",
            NodeKind::Label(_) => "Label",
            NodeKind::Yield { .. } => "Yield",
            NodeKind::Push => "Push",
            NodeKind::StackPop => "StackPop",
        }
    }

    /// Operators and unary markers are the only compound members that do not
    /// produce a value.
    pub fn is_value(&self) -> bool {
        !matches!(
            self,
            NodeKind::Operator(_)
                | NodeKind::Unary(_)
                | NodeKind::Root
                | NodeKind::Assignment { .. }
                | NodeKind::If
                | NodeKind::While
                | NodeKind::For
                | NodeKind::Switch { .. }
                | NodeKind::Case(_)
                | NodeKind::Default
                | NodeKind::Block
                | NodeKind::Condition
                | NodeKind::Jump { .. }
                | NodeKind::Label(_)
                | NodeKind::Yield { .. }
                | NodeKind::Push
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: SmallVec<[NodeId; 4]>,
    /// Statements that must run, in order, before this node.
    pub depends_on: SmallVec<[NodeId; 2]>,
    pub indexer: Option<Swizzle>,
    /// `None` until parameter analysis.
    pub vector_size: Option<u8>,
    pub value_type: ValueType,
    /// Folded value, when every input is known at compile time.
    pub constant: Option<Value>,
    pub span: Span,
}

impl Node {
    pub fn is_vector(&self) -> bool {
        self.vector_size.is_some_and(|s| s > 1)
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    /// Size of the value the node produces, after its indexer.
    pub fn value_size(&self) -> Option<u8> {
        match self.indexer {
            Some(swizzle) => Some(swizzle.count),
            None => self.vector_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
    next_label: u32,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        let mut ast = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            next_label: 0,
        };
        ast.root = ast.add(NodeKind::Root, Span::default());
        ast
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn add(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            children: SmallVec::new(),
            depends_on: SmallVec::new(),
            indexer: None,
            vector_size: None,
            value_type: ValueType::Numeric,
            constant: None,
            span,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn child(&self, id: NodeId, i: usize) -> Option<NodeId> {
        self.nodes[id.index()].children.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn push_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    /// Records `dep` as a statement to run before `owner`.
    pub fn push_dependency(&mut self, owner: NodeId, dep: NodeId) {
        self.nodes[dep.index()].parent = Some(owner);
        self.nodes[owner.index()].depends_on.push(dep);
    }

    /// Replaces the children of `parent`, re-owning the new ones.
    pub fn set_children(&mut self, parent: NodeId, children: impl IntoIterator<Item = NodeId>) {
        let children: SmallVec<[NodeId; 4]> = children.into_iter().collect();
        for &child in &children {
            self.nodes[child.index()].parent = Some(parent);
        }
        self.nodes[parent.index()].children = children;
    }

    pub fn take_children(&mut self, parent: NodeId) -> SmallVec<[NodeId; 4]> {
        core::mem::take(&mut self.nodes[parent.index()].children)
    }

    pub fn take_dependencies(&mut self, owner: NodeId) -> SmallVec<[NodeId; 2]> {
        core::mem::take(&mut self.nodes[owner.index()].depends_on)
    }

    /// Puts `new` in the place `old` occupies among its parent's children.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        let Some(parent) = self.nodes[old.index()].parent else {
            return;
        };
        if let Some(slot) = self.nodes[parent.index()]
            .children
            .iter_mut()
            .find(|c| **c == old)
        {
            *slot = new;
        }
        self.nodes[new.index()].parent = Some(parent);
        self.nodes[old.index()].parent = None;
    }

    /// Pre-order walk of the subtree at `id`, dependencies before children.
    pub fn walk(&self, id: NodeId, visit: &mut impl FnMut(NodeId, &Node)) {
        let node = self.node(id);
        visit(id, node);
        for &dep in &node.depends_on {
            self.walk(dep, visit);
        }
        for &child in &node.children {
            self.walk(child, visit);
        }
    }

    /// Nodes reachable from the root.
    pub fn reachable(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.walk(self.root, &mut |id, _| out.push(id));
        out
    }

    /// Checks the owner links of the reachable tree.
    pub fn check_links(&self) -> bool {
        let mut ok = true;
        self.walk(self.root, &mut |id, node| {
            for &c in node.children.iter().chain(node.depends_on.iter()) {
                if self.node(c).parent != Some(id) {
                    ok = false;
                }
            }
        });
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_updates_both_links() {
        let mut ast = Ast::new();
        let compound = ast.add(NodeKind::Compound, Span::default());
        let a = ast.add(NodeKind::Literal(1.0), Span::default());
        let b = ast.add(NodeKind::Literal(2.0), Span::default());
        ast.push_child(ast.root(), compound);
        ast.push_child(compound, a);
        ast.replace(a, b);
        assert_eq!(ast.children(compound), &[b]);
        assert_eq!(ast.node(b).parent, Some(compound));
        assert_eq!(ast.node(a).parent, None);
        assert!(ast.check_links());
    }

    #[test]
    fn walk_visits_dependencies_first() {
        let mut ast = Ast::new();
        let stmt = ast.add(NodeKind::Condition, Span::default());
        let dep = ast.add(NodeKind::Push, Span::default());
        let value = ast.add(NodeKind::Literal(0.0), Span::default());
        ast.push_child(ast.root(), stmt);
        ast.push_dependency(stmt, dep);
        ast.push_child(stmt, value);
        assert_eq!(ast.reachable(), vec![ast.root(), stmt, dep, value]);
    }
}
