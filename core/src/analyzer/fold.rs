//! Compile-time evaluation of constant subtrees.
//!
//! Folding runs the interpreter's own operator kernels and compound folder,
//! so a folded value is bit-identical to what execution would produce.

use crate::parser::ast::{Ast, Callee, ConstantRef, NodeId, NodeKind};
use crate::parser::variables::VariableTable;
use crate::stdlib::constants::ConstantTable;
use crate::stdlib::functions::SizeRule;
use crate::stdlib::math::eval_builtin;
use crate::stdlib::random::Rng;
use crate::vm::compound::CompoundFolder;
use crate::vm::opcode::reduction_control;
use crate::vm::value::Value;

/// Value of the subtree at `id` when it only depends on literals, constants
/// and pure builtins. The node's indexer is applied.
pub fn constant_value(
    ast: &Ast,
    id: NodeId,
    constants: &ConstantTable,
    variables: &VariableTable,
) -> Option<Value> {
    let node = ast.node(id);
    if let Some(value) = node.constant {
        return Some(value);
    }
    let value = match &node.kind {
        NodeKind::Literal(x) => Value::scalar(*x),
        NodeKind::Constant(ConstantRef::Shared(index)) => Value::scalar(constants.get(*index)?),
        NodeKind::Constant(ConstantRef::Slot(var)) => variables.try_get(*var)?.constant?,
        NodeKind::Compound => {
            let mut folder = CompoundFolder::new();
            for &child in &node.children {
                match ast.kind(child) {
                    NodeKind::Operator(op) => folder.push_operator(*op).ok()?,
                    NodeKind::Unary(op) => folder.push_unary(*op).ok()?,
                    _ => folder
                        .push_value(constant_value(ast, child, constants, variables)?)
                        .ok()?,
                }
            }
            folder.finish().ok()?
        }
        NodeKind::Function(Callee::Builtin(function)) if function.pure => {
            let args = node
                .children
                .iter()
                .map(|&arg| constant_value(ast, arg, constants, variables))
                .collect::<Option<Vec<_>>>()?;
            let control = match function.size_rule {
                SizeRule::Fold | SizeRule::Reduction if function.arity.accepts(args.len()) => {
                    reduction_control(args.len(), function.result_size(&sizes(&args)))
                }
                _ => args.len() as u8,
            };
            eval_builtin(function.code, control, &args, &Rng::default()).ok()?
        }
        _ => return None,
    };
    match node.indexer {
        Some(swizzle) => value.swizzle(swizzle),
        None => Some(value),
    }
}

fn sizes(args: &[Value]) -> Vec<u8> {
    args.iter().map(|a| a.size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::syntax::{BinaryOp, Span, Swizzle, UnaryOp};
    use crate::stdlib::functions;

    fn leaf(ast: &mut Ast, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = ast.add(kind, Span::default());
        ast.push_child(parent, id);
        id
    }

    #[test]
    fn folds_compounds_with_the_runtime_folder() {
        let mut ast = Ast::new();
        let c = ast.add(NodeKind::Compound, Span::default());
        leaf(&mut ast, c, NodeKind::Unary(UnaryOp::Neg));
        leaf(&mut ast, c, NodeKind::Literal(2.0));
        leaf(&mut ast, c, NodeKind::Operator(BinaryOp::Add));
        leaf(&mut ast, c, NodeKind::Literal(5.0));
        let v = constant_value(&ast, c, &ConstantTable::builtin(), &VariableTable::new());
        assert_eq!(v, Some(Value::scalar(3.0)));
    }

    #[test]
    fn folds_pure_builtins_and_applies_indexers() {
        let mut ast = Ast::new();
        let call = ast.add(
            NodeKind::Function(Callee::Builtin(functions::lookup("abs").unwrap())),
            Span::default(),
        );
        let arg = leaf(&mut ast, call, NodeKind::Compound);
        leaf(&mut ast, arg, NodeKind::Literal(-1.0));
        leaf(&mut ast, arg, NodeKind::Literal(-2.0));
        ast.node_mut(call).indexer = Swizzle::parse("yx");
        let v = constant_value(&ast, call, &ConstantTable::builtin(), &VariableTable::new());
        assert_eq!(v, Some(Value::vector(&[2.0, 1.0])));
    }

    #[test]
    fn variables_and_impure_calls_do_not_fold() {
        let mut ast = Ast::new();
        let call = ast.add(
            NodeKind::Function(Callee::Builtin(functions::lookup("random").unwrap())),
            Span::default(),
        );
        let v = constant_value(&ast, call, &ConstantTable::builtin(), &VariableTable::new());
        assert_eq!(v, None);
    }
}
