use indoc::indoc;
use pretty_assertions::assert_eq;

use super::dump::dump_ast;
use super::parser::{MAX_DEPTH, parse};
use super::*;
use crate::vm::context::EngineContext;
use crate::vm::value::{Value, ValueType};

fn dump(source: &str) -> String {
    let context = EngineContext::default();
    let script = parse(source, &context)
        .unwrap_or_else(|e| panic!("Parsing failed: {}\n{}", source, e));
    dump_ast(&script.ast, &script.variables, &context)
}

fn parse_err(source: &str) -> ParseError {
    parse(source, &EngineContext::default())
        .err()
        .unwrap_or_else(|| panic!("Expected a parse error: {}", source))
}

// Two sources parse to the same tree when they only differ by redundant
// parentheses.
fn same_tree(a: &str, b: &str) {
    assert_eq!(dump(a), dump(b), "\n{}\nvs\n{}", a, b);
}

#[test]
fn higher_precedence_levels_nest() {
    assert_eq!(
        dump("input a; input b; input c; output o; o = a + b * c;"),
        indoc! {"
            Root
              Assignment o
                Compound
                  Variable a
                  Operator +
                  Compound
                    Variable b
                    Operator *
                    Variable c
        "}
    );
}

#[test]
fn left_associative_levels_stay_flat() {
    same_tree(
        "input a; input b; input c; output o; o = a - b + c;",
        "input a; input b; input c; output o; o = (a - b + c);",
    );
    assert_eq!(
        dump("input a; input b; output o; o = a * b / 2;")
            .lines()
            .filter(|l| l.trim() == "Compound")
            .count(),
        1
    );
}

#[test]
fn unary_chains_collapse_into_one_compound() {
    assert_eq!(
        dump("input a; output o; o = --a;"),
        indoc! {"
            Root
              Assignment o
                Compound
                  Unary -
                  Unary -
                  Variable a
        "}
    );
}

#[test]
fn power_binds_tighter_than_unary_minus() {
    assert_eq!(
        dump("input a; output o; o = -a ^ 2;"),
        indoc! {"
            Root
              Assignment o
                Compound
                  Unary -
                  Compound
                    Variable a
                    Operator ^
                    Literal 2
        "}
    );
}

#[test]
fn parenthesised_lists_build_vectors() {
    assert_eq!(
        dump("output v[3]; v = (1, 2, 3);"),
        indoc! {"
            Root
              Assignment v
                Compound
                  Literal 1
                  Literal 2
                  Literal 3
        "}
    );
}

#[test]
fn swizzles_compose() {
    let out = dump("input a[4]; output o[2]; o = a.wzyx.xy;");
    assert!(out.contains("Variable a .wz"), "{}", out);
    let out = dump("input a[4]; output o; o = a[2];");
    assert!(out.contains("Variable a .z"), "{}", out);
}

#[test]
fn declarations_fill_the_variable_table() {
    let script = parse(
        "input x[3] @0; input id e; inout z; output o[2];",
        &EngineContext::default(),
    )
    .unwrap();
    let vars = &script.variables;
    let x = vars.get(vars.lookup("x").unwrap());
    assert_eq!(x.kind, VariableKind::Input);
    assert_eq!(x.vector_size, Some(3));
    assert_eq!(x.pinned_offset, Some(0));
    let e = vars.get(vars.lookup("e").unwrap());
    assert_eq!(e.value_type, ValueType::Id);
    assert_eq!(vars.get(vars.lookup("z").unwrap()).kind, VariableKind::InOut);
    let names: Vec<_> = vars.inputs().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["x", "e", "z"]);
}

#[test]
fn control_flow_statements_parse() {
    let out = dump(indoc! {"
        input n;
        output total;
        total = 0;
        for (i = 0; i < n; i = i + 1) {
            if (i % 2 == 0) { total = total + i; } else if (i > 5) { yield; } else { total = total - 1; }
        }
        while (total > 100) { total = total / 2; }
        switch (n) {
            case 1: total = 1;
            case -2: total = 2;
            default: total = 3;
        }
    "});
    for expected in ["For", "If", "While", "Switch on $t0", "Case -2", "Default", "Yield 1", "~ Assignment i"] {
        assert!(out.contains(expected), "missing {}:\n{}", expected, out);
    }
}

#[test]
fn defines_and_validation_rules_are_collected() {
    let script = parse(
        "define stack_size = 64; define mode = fast; output x; x = 5; validate x == 2 + 3;",
        &EngineContext::default(),
    )
    .unwrap();
    assert_eq!(script.defines.get("stack_size").map(|s| s.as_str()), Some("64"));
    assert_eq!(script.defines.get("mode").map(|s| s.as_str()), Some("fast"));
    assert_eq!(script.rules.len(), 1);
    let rule = &script.rules[0];
    assert_eq!(rule.name, "x");
    assert_eq!(rule.expected, Value::scalar(5.0));
    assert_eq!(rule.text, "validate x == 2 + 3");
}

#[test]
fn unresolved_identifiers_abort_with_position() {
    let err = parse_err("output o; o = a + 1;");
    assert_eq!(
        err,
        ParseError::UnresolvedIdentifier {
            name: "a".into(),
            span: Span::new(14, 15)
        }
    );
    // A local is only known after its first assignment.
    assert!(matches!(
        parse_err("t = t + 1;"),
        ParseError::UnresolvedIdentifier { .. }
    ));
    assert!(matches!(
        parse_err("output o; o = frobnicate(1);"),
        ParseError::UnresolvedIdentifier { .. }
    ));
}

#[test]
fn semantic_errors_in_the_parser() {
    assert!(matches!(
        parse_err("input a; a = 1;"),
        ParseError::AssignToInput { .. }
    ));
    assert!(matches!(parse_err("PI = 3;"), ParseError::AssignToConstant { .. }));
    assert!(matches!(
        parse_err("output o; o = sqrt;"),
        ParseError::NotAValue { .. }
    ));
    assert!(matches!(
        parse_err("output o; o = dot(1);"),
        ParseError::ArityMismatch { found: 1, .. }
    ));
    assert!(matches!(
        parse_err("input a; input a;"),
        ParseError::DuplicateDeclaration { .. }
    ));
    assert!(matches!(
        parse_err("input a[5];"),
        ParseError::InvalidVectorSize { size: 5, .. }
    ));
    assert!(matches!(
        parse_err("input a[2]; output o; o = a.xyzwx;"),
        ParseError::InvalidSwizzle { .. }
    ));
    assert!(matches!(
        parse_err("input a; output o; o = a; validate o == a;"),
        ParseError::NotConstant { .. }
    ));
}

#[test]
fn nesting_is_capped() {
    let deep = |n: usize| format!("output o; o = {}1{};", "(1 + ".repeat(n), ")".repeat(n));
    assert!(parse(&deep(100), &EngineContext::default()).is_ok());
    assert!(matches!(
        parse_err(&deep(2000)),
        ParseError::MaxDepthExceeded { max_depth: MAX_DEPTH, .. }
    ));

    let parens = format!("output o; o = {}1{};", "(".repeat(2000), ")".repeat(2000));
    let err = parse_err(&parens);
    assert_eq!(
        err.to_string(),
        format!("nesting depth exceeds the maximum of {} levels", MAX_DEPTH)
    );
    assert!(err.span().start() > 0);

    let negations = format!("output o; o = {}1;", "-".repeat(2000));
    assert!(matches!(parse_err(&negations), ParseError::MaxDepthExceeded { .. }));

    let powers = format!("output o; o = 1{};", "^1".repeat(2000));
    assert!(matches!(parse_err(&powers), ParseError::MaxDepthExceeded { .. }));

    let blocks = format!(
        "output o; o = 0; {}o = 1;{}",
        "if (o < 1) { ".repeat(2000),
        "}".repeat(2000)
    );
    assert!(matches!(parse_err(&blocks), ParseError::MaxDepthExceeded { .. }));

    let chain = format!(
        "output o; o = 0; if (o < 0) {{ o = 1; }}{}",
        " else if (o < 0) { o = 1; }".repeat(2000)
    );
    assert!(matches!(parse_err(&chain), ParseError::MaxDepthExceeded { .. }));
}

#[test]
fn syntax_errors_name_what_was_expected() {
    let err = parse_err("output o; o = (1, 2;");
    assert_eq!(err.to_string(), "expected ',' or ')', found ';'");
    let err = parse_err("output o; o = 1");
    assert_eq!(err.to_string(), "expected ';', found end of input");
}
