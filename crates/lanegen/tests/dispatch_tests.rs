use lanegen::{
    NoopTracer,
    dispatch::{DispatchInput, emit_dispatch_units},
    parse::parse_unit,
    target,
    transform::transform,
};

const SRC: &str = "package simd\n\nfunc BaseFoo[T Floats](x []T) T {\n\ts := ReduceSum(Load(x[0:]))\n\treturn s\n}\n";

fn units_for(targets: &[&str]) -> indexmap::IndexMap<String, String> {
    let unit = parse_unit(SRC, "foo_base.go").expect("parses");
    let func = &unit.functions[0];
    let targets: Vec<&'static lanegen::target::Target> =
        targets.iter().map(|n| target::get(n).expect("catalog")).collect();
    let mut transformed = Vec::new();
    for &tgt in &targets {
        for elem in func.expansion() {
            transformed.push(transform(func, &unit, tgt, Some(elem), &mut NoopTracer).expect("transforms"));
        }
    }
    let input = DispatchInput {
        funcs: vec![func],
        transformed: &transformed,
    };
    emit_dispatch_units("simd", "example.com/hwy", "dispatch", &targets, &input)
}

#[test]
fn amd64_dispatch_declares_variables_and_checks_features_in_order() {
    let units = units_for(&["avx512", "fallback"]);
    let amd = units.get("dispatch_amd64.gen").expect("amd64 unit");
    assert!(amd.contains("//go:build amd64 && !purego"), "got:\n{amd}");
    assert!(amd.contains("var fooFloat32 func([]float32) float32"), "got:\n{amd}");
    assert!(amd.contains("var fooFloat64 func([]float64) float64"), "got:\n{amd}");
    assert!(amd.contains("if cpu.HasAVX512 {"), "got:\n{amd}");
    assert!(amd.contains("fooFloat32 = BaseFoo_f32_avx512"), "got:\n{amd}");
    assert!(amd.contains("fooFloat32 = BaseFoo_f32_fallback"), "fallback init assigns scalars, got:\n{amd}");
    let feature_at = amd.find("cpu.HasAVX512").expect("feature check");
    let fallback_at = amd.find("initFallback()").expect("fallback call");
    assert!(feature_at < fallback_at, "widest target is checked before the fallback");
}

#[test]
fn wider_targets_are_checked_first() {
    let units = units_for(&["avx2", "avx512", "fallback"]);
    let amd = units.get("dispatch_amd64.gen").expect("amd64 unit");
    let avx512_at = amd.find("cpu.HasAVX512").expect("avx512 check");
    let avx2_at = amd.find("cpu.HasAVX2").expect("avx2 check");
    assert!(avx512_at < avx2_at, "descending capability order regardless of selector order");
}

#[test]
fn generic_front_door_switches_on_the_first_slice_parameter() {
    let units = units_for(&["avx512", "fallback"]);
    let amd = units.get("dispatch_amd64.gen").expect("amd64 unit");
    assert!(amd.contains("func Foo[T Floats](x []T) T {"), "got:\n{amd}");
    assert!(amd.contains("switch v := any(x).(type) {"), "got:\n{amd}");
    assert!(amd.contains("case []float32:"), "got:\n{amd}");
    assert!(amd.contains("case []hwy.Float16:"), "every constraint expansion gets an arm, got:\n{amd}");
    assert!(amd.contains("panic(\"unreachable\")"), "got:\n{amd}");
}

#[test]
fn dispatcher_totality_over_the_constraint_expansion() {
    // One switch arm per concrete element type; every arm forwards to a
    // declared variable that some init routine assigns.
    let units = units_for(&["avx512", "fallback"]);
    let amd = units.get("dispatch_amd64.gen").expect("amd64 unit");
    for (elem_ty, var) in [
        ("[]hwy.Float16", "fooFloat16"),
        ("[]hwy.BFloat16", "fooBFloat16"),
        ("[]float32", "fooFloat32"),
        ("[]float64", "fooFloat64"),
    ] {
        assert!(amd.contains(&format!("case {elem_ty}:")), "missing arm for {elem_ty}:\n{amd}");
        assert!(amd.contains(&format!("var {var} func(")), "missing declaration for {var}:\n{amd}");
        assert!(
            amd.contains(&format!("{var} = BaseFoo")),
            "missing assignment for {var}:\n{amd}"
        );
    }
}

#[test]
fn portable_unit_covers_non_simd_platforms() {
    let units = units_for(&["avx512", "fallback"]);
    let portable = units.get("dispatch_fallback.gen").expect("portable unit");
    assert!(portable.contains("//go:build purego || (!amd64 && !arm64)"), "got:\n{portable}");
    assert!(portable.contains("initFallback()"), "got:\n{portable}");
    assert!(!portable.contains("cpu."), "no feature checks on portable builds, got:\n{portable}");
}

#[test]
fn arm64_targets_get_their_own_unit() {
    let units = units_for(&["sve2", "neon", "fallback"]);
    let arm = units.get("dispatch_arm64.gen").expect("arm64 unit");
    assert!(arm.contains("func initArm64() {"), "got:\n{arm}");
    let sve2_at = arm.find("cpu.HasSVE2").expect("sve2 check");
    let neon_at = arm.find("cpu.HasNEON").expect("neon check");
    assert!(sve2_at < neon_at, "sve2 outranks neon");
    assert!(!units.contains_key("dispatch_amd64.gen"), "no amd64 targets selected");
}
