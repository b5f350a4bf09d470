mod common;

use common::{engine, engine_with, run};
use indoc::indoc;
use pretty_assertions::assert_eq;
use vexpr::{CompileOptions, CompiledScript, Value, ValueType};
use vexpr_core::compiler::CompileErrorKind;
use vexpr_core::compiler::validation::run_validation;
use vexpr_core::vm::metadata;

#[test]
fn vector_sizes_follow_the_widest_operand() {
    let script = engine()
        .compile(indoc! {"
            input v[3];
            input s;
            output o;
            scaled = v * s + 1;
            normal = cross(v, v);
            d = dot(v, v);
            widest = max(v, s);
            o = scaled.x + normal.y + d + widest.z;
        "})
        .unwrap();

    let size = |name: &str| script.variable(name).unwrap().size;
    assert_eq!(size("scaled"), 3);
    assert_eq!(size("normal"), 3);
    assert_eq!(size("d"), 1);
    assert_eq!(size("widest"), 3);
    assert_eq!(size("o"), 1);
}

#[test]
fn inputs_are_packed_back_to_back() {
    let script = engine()
        .compile(indoc! {"
            input a[2];
            input id e;
            input b[4];
            input c;
            output o;
            o = a.x + b.w + c;
            validate o == 0;
        "})
        .unwrap();

    let mut expected = 0;
    for input in script.inputs() {
        assert_eq!(input.offset, expected, "{}", input.name);
        expected += input.size as usize * 4;
    }
    assert_eq!(expected, (2 + 1 + 4 + 1) * 4);
}

#[test]
fn pinned_input_offsets_must_match_the_layout() {
    let ok = engine().compile("input a[2] @ 0; input b @ 8; output o; o = a.y + b;");
    assert!(ok.is_ok());

    let failure = engine()
        .compile("input a[2] @ 0; input b @ 4; output o; o = a.y + b;")
        .unwrap_err();
    assert_eq!(failure.stage_name, "ParameterAnalysis");
    assert!(matches!(
        failure.error,
        CompileErrorKind::MisalignedInput {
            pinned: 4,
            expected: 8,
            ..
        }
    ));
}

#[test]
fn every_output_must_be_defined() {
    let never_assigned = engine().compile("input a; output o; output p; o = a;");
    assert!(matches!(
        never_assigned.unwrap_err().error,
        CompileErrorKind::UndefinedOutput { .. }
    ));

    let read_and_written = engine().compile("inout t; t = t + 1;");
    assert!(read_and_written.is_ok());
}

#[test]
fn measured_stack_is_strictly_larger_than_the_high_water_mark() {
    let source = indoc! {"
        input a; input b; input c;
        output o;
        o = ((a + b) * (b + c)) / ((a - c) + 1);
    "};
    let measured = engine().compile(source).unwrap();
    let high_water = measured.stack_high_water().unwrap();
    assert!(high_water < measured.package().header().stack_slots);

    let exact = format!("define stack_size = {};\n{}", high_water, source);
    let failure = engine().compile(&exact).unwrap_err();
    assert!(matches!(failure.error, CompileErrorKind::StackTooSmall { .. }));

    let roomy = format!("define stack_size = {};\n{}", high_water + 1, source);
    assert!(engine().compile(&roomy).is_ok());
}

#[test]
fn metadata_matches_at_both_ends_of_every_variable() {
    let engine = engine();
    let script = engine
        .compile(indoc! {"
            input v[3];
            input id e;
            output o[4];
            o = (v * 2, 1);
        "})
        .unwrap();
    let memory = run(&engine, &script, &[("v", Value::vector(&[1.0, 2.0, 3.0]))]);

    for var in script.variables().variables.iter() {
        let first = var.slot();
        let last = first + var.size as usize - 1;
        for meta in [script.package().metadata(), memory.metadata.as_slice()] {
            let head = metadata::read(meta, first).unwrap();
            assert_eq!(head, metadata::read(meta, last).unwrap(), "{}", var.name);
            assert_eq!(head.size, var.size);
            assert_eq!(head.ty, var.value_type);
        }
    }
    assert_eq!(script.variable("e").unwrap().value_type, ValueType::Id);
}

fn outputs(script: &CompiledScript, memory: &vexpr::Memory) -> Vec<Value> {
    script
        .outputs()
        .map(|var| memory.read(var.slot()).unwrap())
        .collect()
}

#[test]
fn packaged_execution_matches_validation_runs() {
    let source = indoc! {"
        input p[3];
        input t;
        output pos[3];
        output speed;
        vel = (1, 0.5, -2) * t;
        if (t > 1) {
            vel = vel * 0.5;
        }
        pos = p + vel;
        speed = length(vel);
    "};
    let options = CompileOptions {
        constant_epsilon: 1e-4,
        ..CompileOptions::default()
    };
    let engine = engine_with(options.clone());
    let optimized = engine.compile(source).unwrap();
    let plain = engine
        .compile_with(
            source,
            &CompileOptions {
                optimize: false,
                ..options
            },
        )
        .unwrap();
    let restored = CompiledScript::from_bytes(&optimized.to_bytes().unwrap()).unwrap();

    for t in [0.0, 0.75, 2.5] {
        let inputs = [("p", Value::vector(&[1.0, 2.0, 3.0])), ("t", Value::scalar(t))];
        let executed = outputs(&optimized, &run(&engine, &optimized, &inputs));

        for script in [&plain, &restored] {
            let slots: Vec<_> = inputs
                .iter()
                .map(|(name, value)| (script.variable(name).unwrap().slot(), *value))
                .collect();
            let validated = run_validation(
                script.package(),
                script.data_image(),
                engine.context(),
                1_000,
                &slots,
            )
            .unwrap();
            let expected = outputs(script, &validated.memory);
            for (a, b) in executed.iter().zip(&expected) {
                assert!(a.approx_eq(b, 1e-4), "t = {}: {:?} vs {:?}", t, a, b);
            }
        }
    }
}
