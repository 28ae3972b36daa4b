use lanegen::{NoopTracer, emit, parse::parse_unit, target, transform::transform, types::ElemType};

fn render(src: &str, target_name: &str, elem: ElemType) -> String {
    let unit = parse_unit(src, "t.go").expect("parses");
    let tgt = target::get(target_name).expect("catalog");
    let t = transform(&unit.functions[0], &unit, tgt, Some(elem), &mut NoopTracer).expect("transforms");
    emit::emit_unit(tgt, "simd", "example.com/hwy", &[t])
}

#[test]
fn compound_assignment_to_a_half_slice_expands() {
    let src = "package simd\n\nfunc BaseAccum[T Floats](out []T, xs []float32) {\n\tfor i := 0; i < len(out); i++ {\n\t\tx := xs[i]\n\t\tout[i] += x\n\t}\n}\n";
    let text = render(src, "neon", ElemType::F16);
    assert!(
        text.contains("out[i] = hwy.Float32ToFloat16(out[i].Float32() + x)"),
        "got:\n{text}"
    );
}

#[test]
fn half_reads_and_writes_wrap_exactly_once() {
    let src = "package simd\n\nfunc BaseAccum[T Floats](out []T, xs []float32) {\n\tfor i := 0; i < len(out); i++ {\n\t\tx := xs[i]\n\t\tout[i] += x\n\t}\n}\n";
    let text = render(src, "neon", ElemType::F16);
    assert_eq!(text.matches(".Float32()").count(), 1, "got:\n{text}");
    assert_eq!(text.matches("hwy.Float32ToFloat16(").count(), 1, "got:\n{text}");
}

#[test]
fn bfloat_uses_its_own_conversion() {
    let src = "package simd\n\nfunc BaseStore[T Floats](out []T, x float32) {\n\tout[0] = x\n}\n";
    let text = render(src, "neon", ElemType::Bf16);
    assert!(text.contains("out[0] = hwy.Float32ToBFloat16(x)"), "got:\n{text}");
}

#[test]
fn half_reductions_wrap_on_first_use_and_returns_convert_back() {
    let src = "package simd\n\nfunc BaseSum[T Floats](xs []T) T {\n\tn := len(xs)\n\tacc := Zero()\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tacc = Add(acc, Load(xs[i:]))\n\t}\n\ts := ReduceSum(acc)\n\treturn s\n}\n";
    let text = render(src, "neon", ElemType::F16);
    assert!(text.contains("s := acc.ReduceSum().Float32()"), "native halves wrap the reducer, got:\n{text}");
    assert!(text.contains("return hwy.Float32ToFloat16(s)"), "got:\n{text}");

    let promoted = render(src, "avx2", ElemType::F16);
    assert!(
        promoted.contains("s := acc.ReduceSum()"),
        "promoted registers already hold single precision, got:\n{promoted}"
    );
    assert!(!promoted.contains("ReduceSum().Float32()"), "got:\n{promoted}");
    assert!(promoted.contains("return hwy.Float32ToFloat16(s)"), "got:\n{promoted}");
}

#[test]
fn half_locals_are_retyped_to_single_precision() {
    let src = "package simd\n\nfunc BaseInit[T Floats](out []T) {\n\tvar seed T = T(0)\n\tout[0] = seed\n}\n";
    let text = render(src, "neon", ElemType::F16);
    assert!(text.contains("var seed float32"), "got:\n{text}");
    assert!(text.contains("out[0] = hwy.Float32ToFloat16(seed)"), "got:\n{text}");
}

#[test]
fn promoted_half_hoists_encode_the_bit_pattern() {
    let src = "package simd\n\nfunc BaseScale[T Floats](out []T, in []T) {\n\tn := len(in)\n\ty := Set(3.14)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tv := Load(in[i:])\n\t\tStore(out[i:], Mul(v, y))\n\t}\n}\n";
    let text = render(src, "avx2", ElemType::F16);
    assert!(
        text.contains("var BaseScale_3p14_f16 = asm.BroadcastUint16x16(uint16(hwy.Float32ToFloat16(3.14)))"),
        "got:\n{text}"
    );
}
