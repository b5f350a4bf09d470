//! Indented text dump of a syntax tree, for traces and failure reports.

use core::fmt::Write;

use crate::parser::ast::{Ast, Callee, ConstantRef, JumpKind, NodeId, NodeKind};
use crate::parser::variables::VariableTable;
use crate::vm::context::EngineContext;

pub fn dump_ast(ast: &Ast, variables: &VariableTable, context: &EngineContext) -> String {
    let mut out = String::new();
    dump_node(ast, variables, context, ast.root(), 0, "", &mut out);
    out
}

fn var_name(variables: &VariableTable, id: crate::parser::variables::VarId) -> String {
    variables
        .try_get(id)
        .map(|v| v.name.to_string())
        .unwrap_or_else(|| id.to_string())
}

fn dump_node(
    ast: &Ast,
    variables: &VariableTable,
    context: &EngineContext,
    id: NodeId,
    depth: usize,
    prefix: &str,
    out: &mut String,
) {
    let node = ast.node(id);
    let _ = write!(out, "{:indent$}{}{}", "", prefix, node.kind.name(), indent = depth * 2);
    match &node.kind {
        NodeKind::Assignment { target, swizzle } => {
            let _ = write!(out, " {}", var_name(variables, *target));
            if let Some(s) = swizzle {
                let _ = write!(out, "{}", s);
            }
        }
        NodeKind::Operator(op) => {
            let _ = write!(out, " {}", op);
        }
        NodeKind::Unary(op) => {
            let _ = write!(out, " {}", op);
        }
        NodeKind::Variable(var) => {
            let _ = write!(out, " {}", var_name(variables, *var));
        }
        NodeKind::Literal(x) => {
            let _ = write!(out, " {}", x);
        }
        NodeKind::Constant(ConstantRef::Shared(index)) => {
            match context.constants.entry(*index) {
                Some(entry) => match &entry.name {
                    Some(name) => {
                        let _ = write!(out, " {} = {}", name, entry.value);
                    }
                    None => {
                        let _ = write!(out, " #{} = {}", index, entry.value);
                    }
                },
                None => {
                    let _ = write!(out, " #{}", index);
                }
            }
        }
        NodeKind::Constant(ConstantRef::Slot(var)) => {
            let _ = write!(out, " slot {}", var_name(variables, *var));
        }
        NodeKind::Function(Callee::Builtin(f)) => {
            let _ = write!(out, " {}", f.name);
        }
        NodeKind::Function(Callee::External(fid)) => match context.functions.get(*fid) {
            Some(f) => {
                let _ = write!(out, " {}", f.name);
            }
            None => {
                let _ = write!(out, " extern#{}", fid);
            }
        },
        NodeKind::Switch { subject } => {
            let _ = write!(out, " on {}", var_name(variables, *subject));
        }
        NodeKind::Case(x) => {
            let _ = write!(out, " {}", x);
        }
        NodeKind::Jump { kind, label } => {
            let kind = match kind {
                JumpKind::Always => "always",
                JumpKind::IfZero => "if zero",
                JumpKind::IfNotZero => "if not zero",
            };
            let _ = write!(out, " {} -> {}", kind, label);
        }
        NodeKind::Label(label) => {
            let _ = write!(out, " {}", label);
        }
        NodeKind::Yield { frames } => {
            let _ = write!(out, " {}", frames);
        }
        _ => {}
    }
    if let Some(indexer) = node.indexer {
        let _ = write!(out, " {}", indexer);
    }
    if let Some(size) = node.vector_size {
        let _ = write!(out, " [{}{}]", node.value_type, size);
    }
    if let Some(value) = node.constant {
        let _ = write!(out, " = {}", value);
    }
    out.push('\n');

    for &dep in &node.depends_on {
        dump_node(ast, variables, context, dep, depth + 1, "~ ", out);
    }
    for &child in &node.children {
        dump_node(ast, variables, context, child, depth + 1, "", out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parser::parse;

    #[test]
    fn dump_shows_structure_and_names() {
        let context = EngineContext::default();
        let script = parse("output a; a = 1 + PI;", &context).unwrap();
        let dump = dump_ast(&script.ast, &script.variables, &context);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "Root");
        assert_eq!(lines[1], "  Assignment a");
        assert_eq!(lines[2], "    Compound");
        assert_eq!(lines[3], "      Literal 1");
        assert_eq!(lines[4], "      Operator +");
        assert!(lines[5].starts_with("      Constant PI = 3.14"));
    }
}
