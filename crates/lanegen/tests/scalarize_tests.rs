use lanegen::{NoopTracer, emit, parse::parse_unit, target, transform::transform, types::ElemType};

fn render(src: &str, target_name: &str, elem: ElemType) -> String {
    let unit = parse_unit(src, "t.go").expect("parses");
    let tgt = target::get(target_name).expect("catalog");
    let t = transform(&unit.functions[0], &unit, tgt, Some(elem), &mut NoopTracer).expect("transforms");
    emit::emit_unit(tgt, "simd", "example.com/hwy", &[t])
}

const ADD_SLICES: &str = "package simd\n\nfunc BaseAddSlices[T Lanes](result []T, input []T, other []T) {\n\tn := len(input)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\ta := Load(input[i:])\n\t\tb := Load(other[i:])\n\t\tStore(result[i:], Add(a, b))\n\t}\n}\n";

#[test]
fn fallback_bodies_step_by_one_and_read_scalars() {
    let text = render(ADD_SLICES, "fallback", ElemType::F32);
    assert!(text.contains("for i := 0; i < n; i += 1 {"), "got:\n{text}");
    assert!(text.contains("a := input[i]"), "got:\n{text}");
    assert!(text.contains("b := other[i]"), "got:\n{text}");
    assert!(text.contains("result[i] = a + b"), "got:\n{text}");
    assert!(!text.contains("asm."), "no vector symbols survive scalarization, got:\n{text}");
}

#[test]
fn fallback_signature_uses_plain_element_slices() {
    let text = render(ADD_SLICES, "fallback", ElemType::F64);
    assert!(
        text.contains("func BaseAddSlices_f64_fallback(result []float64, input []float64, other []float64)"),
        "got:\n{text}"
    );
}

#[test]
fn reductions_collapse_to_their_identity() {
    let src = "package simd\n\nfunc BaseFirst[T Lanes](xs []T) T {\n\treturn ReduceSum(Load(xs[0:]))\n}\n";
    let text = render(src, "fallback", ElemType::F32);
    assert!(text.contains("return xs[0]"), "got:\n{text}");
}

#[test]
fn fused_multiply_add_expands_to_scalar_arithmetic() {
    let src = "package simd\n\nfunc BaseFmaSlice[T Lanes](out []T, a []T, b []T) {\n\tn := len(a)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tva := Load(a[i:])\n\t\tvb := Load(b[i:])\n\t\tvc := Load(out[i:])\n\t\tStore(out[i:], MulAdd(va, vb, vc))\n\t}\n}\n";
    let text = render(src, "fallback", ElemType::F32);
    assert!(text.contains("out[i] = va * vb + vc"), "got:\n{text}");
}

#[test]
fn std_math_helpers_convert_through_float64() {
    let src = "package simd\n\nfunc BaseRoot[T Floats](xs []T) T {\n\treturn Sqrt(xs[0])\n}\n";
    let f32 = render(src, "fallback", ElemType::F32);
    assert!(f32.contains("return float32(math.Sqrt(float64(xs[0])))"), "got:\n{f32}");
    assert!(f32.contains("import \"math\""), "got:\n{f32}");
    let f64 = render(src, "fallback", ElemType::F64);
    assert!(f64.contains("return math.Sqrt(xs[0])"), "got:\n{f64}");
}

#[test]
fn unscalarizable_ops_bail_out_to_the_generic_library() {
    let src = "package simd\n\nfunc BasePack[T Lanes](out []T, in []T, m hwy.Mask[T]) {\n\tStore(out[0:], Compress(Load(in[0:]), m))\n}\n";
    let text = render(src, "fallback", ElemType::F32);
    assert!(text.contains("fb.Compress("), "bail-out keeps the generic call shape, got:\n{text}");
    assert!(text.contains("fb \"example.com/hwy/fb\""), "got:\n{text}");
    assert!(text.contains("fb.Store("), "got:\n{text}");
}

#[test]
fn tail_loops_cover_the_remainder_scalarly() {
    let src = "package simd\n\nfunc BaseScale[T Floats](out []T, in []T) {\n\tn := len(in)\n\ty := Set(2.5)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tv := Load(in[i:])\n\t\tStore(out[i:], Mul(v, y))\n\t}\n}\n";
    let text = render(src, "avx2", ElemType::F32);
    assert!(text.contains("i := 0"), "iterator is hoisted out of the loop, got:\n{text}");
    assert!(text.contains("for ; i + 8 <= n; i += 8 {"), "main loop is bounded, got:\n{text}");
    assert!(text.contains("for ; i < n; i += 1 {"), "tail loop covers the remainder, got:\n{text}");
    assert!(text.contains("out[i] = v * 2.5"), "broadcast local becomes its literal, got:\n{text}");
}

#[test]
fn reduction_loops_keep_their_shape() {
    let src = "package simd\n\nfunc BaseSum[T Floats](xs []T) T {\n\tn := len(xs)\n\tacc := Zero()\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tacc = Add(acc, Load(xs[i:]))\n\t}\n\ts := ReduceSum(acc)\n\treturn s\n}\n";
    let text = render(src, "avx2", ElemType::F32);
    assert!(text.contains("for i := 0; i < n; i += 8 {"), "no tail restructuring, got:\n{text}");
    assert!(text.contains("acc = acc.Add(asm.LoadFloat32x8(xs[i:]))"), "got:\n{text}");
}
