//! Lowers structured control flow into a flat statement list.
//!
//! After this stage the root's children are only assignments, conditions,
//! jumps, labels and yields:
//!
//! ```text
//! if (c) A else B      Condition c; JumpIfZero Lelse; A; Jump Lend; Lelse: B; Lend:
//! while (c) A          Ltop: Condition c; JumpIfZero Lend; A; Jump Ltop; Lend:
//! for (i; c; s) A      i; Ltop: Condition c; JumpIfZero Lend; A; s; Jump Ltop; Lend:
//! switch (x) ...       $t = x; per case: Condition $t == v; JumpIfZero Lnext;
//!                      body; Jump Lend; Lnext:  ... default body; Lend:
//! ```
//!
//! Statements recorded in a node's `depends_on` are emitted, in order, just
//! before the node itself.

use smallvec::smallvec;
use tracing::trace;

use crate::compiler::error::CompileErrorKind;
use crate::compiler::pipeline::CompilationState;
use crate::parser::ast::{Ast, JumpKind, LabelId, NodeId, NodeKind};
use crate::parser::syntax::{BinaryOp, Span};

pub fn transform(state: &mut CompilationState<'_>) -> Result<(), CompileErrorKind> {
    let ast = &mut state.ast;
    let root = ast.root();
    let statements = ast.take_children(root);
    let mut out = Vec::with_capacity(statements.len());
    for statement in statements {
        lower(ast, statement, &mut out);
    }
    trace!(statements = out.len(), "Lowered control flow");
    ast.set_children(root, out);
    Ok(())
}

fn lower(ast: &mut Ast, id: NodeId, out: &mut Vec<NodeId>) {
    for dep in ast.take_dependencies(id) {
        lower(ast, dep, out);
    }
    let span = ast.node(id).span.clone();
    match ast.kind(id).clone() {
        NodeKind::Block | NodeKind::Case(_) | NodeKind::Default => {
            for child in ast.take_children(id) {
                lower(ast, child, out);
            }
        }
        NodeKind::If => {
            let children = ast.take_children(id);
            let else_label = ast.new_label();
            condition(ast, children[0], else_label, out);
            lower(ast, children[1], out);
            match children.get(2) {
                Some(&otherwise) => {
                    let end = ast.new_label();
                    out.push(jump(ast, JumpKind::Always, end, &span));
                    out.push(label(ast, else_label, &span));
                    lower(ast, otherwise, out);
                    out.push(label(ast, end, &span));
                }
                None => out.push(label(ast, else_label, &span)),
            }
        }
        NodeKind::While => {
            let children = ast.take_children(id);
            looped(ast, children[0], &[children[1]], &span, out);
        }
        NodeKind::For => {
            let children = ast.take_children(id);
            looped(ast, children[0], &[children[1], children[2]], &span, out);
        }
        NodeKind::Switch { subject } => {
            let arms = ast.take_children(id);
            let end = ast.new_label();
            let mut default = None;
            for arm in arms {
                let value = match *ast.kind(arm) {
                    NodeKind::Case(value) => value,
                    _ => {
                        default = Some(arm);
                        continue;
                    }
                };
                let arm_span = ast.node(arm).span.clone();
                let next = ast.new_label();
                let test = ast.add(NodeKind::Compound, arm_span.clone());
                let lhs = ast.add(NodeKind::Variable(subject), span.clone());
                let op = ast.add(NodeKind::Operator(BinaryOp::Eq), arm_span.clone());
                let rhs = ast.add(NodeKind::Literal(value), arm_span.clone());
                ast.set_children(test, [lhs, op, rhs]);
                condition(ast, test, next, out);
                lower(ast, arm, out);
                out.push(jump(ast, JumpKind::Always, end, &arm_span));
                out.push(label(ast, next, &arm_span));
            }
            // The default arm runs when no case matched, wherever it appears.
            if let Some(arm) = default {
                lower(ast, arm, out);
            }
            out.push(label(ast, end, &span));
        }
        _ => out.push(id),
    }
}

/// `Ltop: Condition c; JumpIfZero Lend; body...; Jump Ltop; Lend:`
fn looped(ast: &mut Ast, test: NodeId, body: &[NodeId], span: &Span, out: &mut Vec<NodeId>) {
    let top = ast.new_label();
    let end = ast.new_label();
    out.push(label(ast, top, span));
    condition(ast, test, end, out);
    for &part in body {
        lower(ast, part, out);
    }
    out.push(jump(ast, JumpKind::Always, top, span));
    out.push(label(ast, end, span));
}

/// `Condition test; JumpIfZero target`
fn condition(ast: &mut Ast, test: NodeId, target: LabelId, out: &mut Vec<NodeId>) {
    let span = ast.node(test).span.clone();
    let node = ast.add(NodeKind::Condition, span.clone());
    ast.set_children(node, smallvec![test] as smallvec::SmallVec<[NodeId; 1]>);
    out.push(node);
    out.push(jump(ast, JumpKind::IfZero, target, &span));
}

fn jump(ast: &mut Ast, kind: JumpKind, label: LabelId, span: &Span) -> NodeId {
    ast.add(NodeKind::Jump { kind, label }, span.clone())
}

fn label(ast: &mut Ast, label: LabelId, span: &Span) -> NodeId {
    ast.add(NodeKind::Label(label), span.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::options::CompileOptions;
    use crate::parser::parser::parse;
    use crate::vm::context::EngineContext;

    fn lowered(source: &str) -> Vec<String> {
        let context = EngineContext::default();
        let options = CompileOptions::default();
        let script = parse(source, &context).unwrap();
        let mut state = CompilationState::from_parsed(script, &options, &context);
        transform(&mut state).unwrap();
        let ast = &state.ast;
        ast.children(ast.root())
            .iter()
            .map(|&id| match ast.kind(id) {
                NodeKind::Jump { kind, label } => format!("Jump {:?} {}", kind, label),
                NodeKind::Label(label) => format!("{}:", label),
                kind => kind.name().to_string(),
            })
            .collect()
    }

    #[test]
    fn if_else_becomes_condition_and_jumps() {
        assert_eq!(
            lowered("input a; output o; if (a) { o = 1; } else { o = 2; }"),
            [
                "Condition",
                "Jump IfZero L0",
                "Assignment",
                "Jump Always L1",
                "L0:",
                "Assignment",
                "L1:"
            ]
        );
    }

    #[test]
    fn for_emits_init_then_loop_with_step_after_body() {
        assert_eq!(
            lowered("input n; output o; o = 0; for (i = 0; i < n; i = i + 1) { o = o + i; }"),
            [
                "Assignment",
                "Assignment",
                "L0:",
                "Condition",
                "Jump IfZero L1",
                "Assignment",
                "Assignment",
                "Jump Always L0",
                "L1:"
            ]
        );
    }

    #[test]
    fn switch_tests_cases_in_order_and_runs_default_last() {
        let out = lowered(
            "input x; output o; switch (x) { default: o = 0; case 1: o = 1; case 2: o = 2; }",
        );
        assert_eq!(
            out,
            [
                "Assignment",
                "Condition",
                "Jump IfZero L1",
                "Assignment",
                "Jump Always L0",
                "L1:",
                "Condition",
                "Jump IfZero L2",
                "Assignment",
                "Jump Always L0",
                "L2:",
                "Assignment",
                "L0:"
            ]
        );
    }
}
