use lanegen::{
    ErrorKind, NoopTracer,
    ast::{CallTarget, Expr},
    emit,
    ops::Op,
    parse::parse_unit,
    target,
    transform::transform,
    types::ElemType,
};

fn render(src: &str, target_name: &str, elem: ElemType) -> String {
    let unit = parse_unit(src, "t.go").expect("parses");
    let tgt = target::get(target_name).expect("catalog");
    let t = transform(&unit.functions[0], &unit, tgt, Some(elem), &mut NoopTracer).expect("transforms");
    emit::emit_unit(tgt, "simd", "example.com/hwy", &[t])
}

const S1: &str = "package simd\n\nfunc BaseAddVec[T Floats](v hwy.Vec[T], w hwy.Vec[T]) hwy.Vec[T] {\n\treturn Add(v, w)\n}\n";

#[test]
fn method_ops_rewrite_to_receiver_form() {
    let text = render(S1, "avx2", ElemType::F32);
    assert!(
        text.contains("func BaseAddVec_f32_avx2(v asm.Float32x8, w asm.Float32x8) asm.Float32x8"),
        "got:\n{text}"
    );
    assert!(text.contains("return v.Add(w)"), "got:\n{text}");
}

#[test]
fn emitted_call_sites_match_the_op_table() {
    // Reading back each call site yields an OpInfo consistent with the
    // target.
    let unit = parse_unit(S1, "t.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    let t = transform(&unit.functions[0], &unit, avx2, Some(ElemType::F32), &mut NoopTracer).expect("transforms");
    let info = avx2.op_info(Op::Add).expect("table entry");
    let mut checked = false;
    for stmt in &t.body {
        stmt.walk_exprs(&mut |e| {
            if let Expr::Call {
                target: CallTarget::Method { name, .. },
                ..
            } = e
            {
                assert_eq!(name, info.name);
                assert!(info.is_method);
                checked = true;
            }
        });
    }
    assert!(checked, "expected at least one rewritten call site");
}

#[test]
fn lane_count_literals_match_the_catalog() {
    let src = "package simd\n\nfunc BaseLanes[T Lanes]() int {\n\treturn NumLanes()\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    for tgt in target::TARGETS {
        for elem in unit.functions[0].expansion() {
            let t = transform(&unit.functions[0], &unit, tgt, Some(elem), &mut NoopTracer).expect("transforms");
            let text = emit::emit_unit(tgt, "simd", "example.com/hwy", &[t]);
            assert!(
                text.contains(&format!("return {}", tgt.lanes_for(elem))),
                "target {} elem {elem}: got\n{text}",
                tgt.name
            );
        }
    }
}

#[test]
fn in_place_ops_become_void_calls_with_address_argument() {
    let src = "package simd\n\nfunc BaseFma[T Floats](a hwy.Vec[T], b hwy.Vec[T], acc hwy.Vec[T]) hwy.Vec[T] {\n\tacc = MulAdd(a, b, acc)\n\treturn acc\n}\n";
    let text = render(src, "sve", ElemType::F32);
    assert!(text.contains("asm.MulAddToFloat32xN(a, b, &acc)"), "got:\n{text}");
    assert!(!text.contains("acc = asm.MulAddTo"), "accumulator assignment becomes a void call");
}

#[test]
fn abs_expands_inline_on_amd64_and_stays_native_on_arm64() {
    let src = "package simd\n\nfunc BaseAbs[T Floats](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Abs(v)\n}\n";
    let amd = render(src, "avx2", ElemType::F32);
    assert!(amd.contains("var BaseAbs_0_f32 = asm.BroadcastFloat32x8(0)"), "got:\n{amd}");
    assert!(amd.contains("return v.Max(BaseAbs_0_f32.Sub(v))"), "got:\n{amd}");
    let arm = render(src, "neon", ElemType::F32);
    assert!(arm.contains("return v.Abs()"), "got:\n{arm}");
}

#[test]
fn is_nan_expands_to_self_inequality() {
    let src = "package simd\n\nfunc BaseNan[T Floats](v hwy.Vec[T]) hwy.Mask[T] {\n\treturn IsNaN(v)\n}\n";
    let text = render(src, "avx2", ElemType::F32);
    assert!(text.contains("func BaseNan_f32_avx2(v asm.Float32x8) asm.Mask32x8"), "got:\n{text}");
    assert!(text.contains("return v.Ne(v)"), "got:\n{text}");
}

#[test]
fn mask_or_uses_the_method_form_when_both_flags_are_set() {
    let src = "package simd\n\nfunc BaseMaskJoin[T Floats](a hwy.Mask[T], b hwy.Mask[T]) hwy.Mask[T] {\n\treturn MaskOr(a, b)\n}\n";
    let text = render(src, "avx512", ElemType::F32);
    assert!(text.contains("return a.Or(b)"), "got:\n{text}");
}

#[test]
fn conditional_blocks_select_per_target_and_type() {
    let src = "package simd\n\nfunc BaseSel[T Floats](v hwy.Vec[T]) hwy.Vec[T] {\n\t//gen:if f32 && avx2\n\tw := Add(v, v)\n\t//gen:else\n\tw := Sqrt(v)\n\t//gen:endif\n\treturn w\n}\n";
    let amd = render(src, "avx2", ElemType::F32);
    assert!(amd.contains("w := v.Add(v)"), "got:\n{amd}");
    assert!(!amd.contains("Sqrt"), "else branch dropped, got:\n{amd}");
    let arm = render(src, "neon", ElemType::F32);
    assert!(arm.contains("w := v.Sqrt()"), "got:\n{arm}");
    assert!(!arm.contains("Add"), "if branch dropped, got:\n{arm}");
}

#[test]
fn contrib_helpers_get_element_and_target_suffixes() {
    let src = "package simd\n\nimport vec \"example.com/hwy/contrib/vec\"\n\nfunc BaseNorm[T Floats](x []T) T {\n\ts := vec.BaseSum(x)\n\treturn s\n}\n";
    let text = render(src, "avx2", ElemType::F32);
    assert!(text.contains("s := vec.BaseSum_f32_avx2(x)"), "got:\n{text}");
    assert!(text.contains("vec \"example.com/hwy/contrib/vec\""), "got:\n{text}");
}

#[test]
fn type_specific_constants_pick_the_matching_variant() {
    let src = "package simd\n\nvar expTable_f32 = 1\nvar expTable_f64 = 2\n\nfunc BaseLut[T Floats](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Mul(v, Set(expTable))\n}\n";
    let f32 = render(src, "avx2", ElemType::F32);
    assert!(f32.contains("asm.BroadcastFloat32x8(expTable_f32)"), "got:\n{f32}");
    let f64 = render(src, "avx2", ElemType::F64);
    assert!(f64.contains("asm.BroadcastFloat64x4(expTable_f64)"), "got:\n{f64}");
}

#[test]
fn get_exponent_on_integer_elements_is_unsupported() {
    let src = "package simd\n\nfunc BaseExp2[T Lanes](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn GetExponent(v)\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    let err = transform(&unit.functions[0], &unit, avx2, Some(ElemType::I32), &mut NoopTracer)
        .expect_err("integers have no exponent field");
    assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
    // Float instantiations of the same function still succeed.
    transform(&unit.functions[0], &unit, avx2, Some(ElemType::F32), &mut NoopTracer).expect("f32 works");
}

#[test]
fn vector_signatures_are_excluded_from_dispatch() {
    let unit = parse_unit(S1, "t.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    let t = transform(&unit.functions[0], &unit, avx2, Some(ElemType::F32), &mut NoopTracer).expect("transforms");
    assert!(!t.dispatchable, "opaque vector in the signature cannot unify behind one symbol");
}
