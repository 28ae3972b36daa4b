use lanegen::{NoopTracer, emit, parse::parse_unit, target, transform::transform, types::ElemType};
use pretty_assertions::assert_eq;

const S1: &str = "package simd\n\nfunc BaseAddVec[T Floats](v hwy.Vec[T], w hwy.Vec[T]) hwy.Vec[T] {\n\treturn Add(v, w)\n}\n";

#[test]
fn minimal_elementwise_unit_matches_golden() {
    let unit = parse_unit(S1, "t.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    let t = transform(&unit.functions[0], &unit, avx2, Some(ElemType::F32), &mut NoopTracer).expect("transforms");
    let text = emit::emit_unit(avx2, "simd", "example.com/hwy", &[t]);
    let golden = "\
// Code generated by lanegen. DO NOT EDIT.

//go:build amd64 && !purego

package simd

import asm \"example.com/hwy/asm/avx2\"

func BaseAddVec_f32_avx2(v asm.Float32x8, w asm.Float32x8) asm.Float32x8 {
\treturn v.Add(w)
}
";
    if text != golden {
        let diff = similar::TextDiff::from_lines(golden, text.as_str());
        panic!("emitted unit drifted from golden:\n{}", diff.unified_diff());
    }
    assert_eq!(text, golden);
}

#[test]
fn hoisted_constants_precede_function_bodies() {
    let src = "package simd\n\nfunc BaseScale[T Floats](out []T, in []T) {\n\tn := len(in)\n\ty := Set(3.14)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tv := Load(in[i:])\n\t\tStore(out[i:], Mul(v, y))\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    let t = transform(&unit.functions[0], &unit, avx2, Some(ElemType::F32), &mut NoopTracer).expect("transforms");
    let text = emit::emit_unit(avx2, "simd", "example.com/hwy", &[t]);
    let decl_at = text.find("var BaseScale_3p14_f32 = asm.BroadcastFloat32x8(3.14)").expect("hoisted decl");
    let func_at = text.find("func BaseScale_f32_avx2").expect("function");
    assert!(decl_at < func_at, "hoists come before bodies:\n{text}");
    assert!(text.contains("y := BaseScale_3p14_f32"), "in-body reference:\n{text}");
}

#[test]
fn import_set_reflects_only_used_packages() {
    let src = "package simd\n\nfunc BaseSqrtAll[T Floats](out []T, in []T) {\n\tn := len(in)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tv := Load(in[i:])\n\t\tStore(out[i:], Sqrt(v))\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let avx2 = target::get("avx2").expect("catalog");
    let t = transform(&unit.functions[0], &unit, avx2, Some(ElemType::F32), &mut NoopTracer).expect("transforms");
    let text = emit::emit_unit(avx2, "simd", "example.com/hwy", &[t]);
    assert!(text.contains("\"math\""), "scalar tail keeps the math import:\n{text}");
    assert!(text.contains("asm \"example.com/hwy/asm/avx2\""), "got:\n{text}");
    assert!(!text.contains("contrib"), "no contrib packages were used:\n{text}");
}

#[test]
fn function_order_is_preserved() {
    let src = "package simd\n\nfunc BaseOne[T Floats](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Add(v, v)\n}\n\nfunc BaseTwo[T Floats](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Sub(v, v)\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let neon = target::get("neon").expect("catalog");
    let funcs: Vec<_> = unit
        .functions
        .iter()
        .map(|f| transform(f, &unit, neon, Some(ElemType::F32), &mut NoopTracer).expect("transforms"))
        .collect();
    let text = emit::emit_unit(neon, "simd", "example.com/hwy", &funcs);
    let one = text.find("BaseOne_f32_neon").expect("first function");
    let two = text.find("BaseTwo_f32_neon").expect("second function");
    assert!(one < two);
}

#[test]
fn unroll_hints_survive_as_loop_comments() {
    let src = "package simd\n\nfunc BaseCopy[T Lanes](out []T, in []T) {\n\tn := len(in)\n\t//gen:unroll 4\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tStore(out[i:], Load(in[i:]))\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let neon = target::get("neon").expect("catalog");
    let t = transform(&unit.functions[0], &unit, neon, Some(ElemType::F32), &mut NoopTracer).expect("transforms");
    let text = emit::emit_unit(neon, "simd", "example.com/hwy", &[t]);
    assert!(text.contains("//gen:unroll 4"), "got:\n{text}");
}
