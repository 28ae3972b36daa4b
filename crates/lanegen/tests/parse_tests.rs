use lanegen::{
    parse::{CallRef, parse_unit},
    types::ElemType,
};

const UNIT: &str = r#"package simd

import (
	"math"
	hwy "github.com/lanegen/hwy/hwy"
	_ "github.com/lanegen/hwy/internal/blank"
	vec "github.com/lanegen/hwy/contrib/vec"
)

var expTable_f32 = 1
var expTable_f64 = 2
var plainTable = 3

func helper(x int) int {
	return x
}

func (m Matrix) BaseRows() int {
	return 0
}

func BaseAddSlices[T Lanes](result []T, input []T, other []T) {
	n := len(input)
	//gen:unroll 4
	for i := 0; i < n; i += NumLanes() {
		a := Load(input[i:])
		b := Load(other[i:])
		Store(result[i:], Add(a, b))
	}
}

func BaseNothing(x int) int {
	return x
}
"#;

#[test]
fn imports_resolve_aliases_and_skip_blanks() {
    let unit = parse_unit(UNIT, "unit.go").expect("parses");
    assert_eq!(unit.imports.get("math").map(String::as_str), Some("math"));
    assert_eq!(
        unit.imports.get("hwy").map(String::as_str),
        Some("github.com/lanegen/hwy/hwy")
    );
    assert_eq!(
        unit.imports.get("vec").map(String::as_str),
        Some("github.com/lanegen/hwy/contrib/vec")
    );
    assert!(!unit.imports.values().any(|p| p.contains("blank")), "blank imports are skipped");
}

#[test]
fn type_suffixed_constants_register_under_base_name() {
    let unit = parse_unit(UNIT, "unit.go").expect("parses");
    let exp = unit.consts.get("expTable").expect("registered");
    assert_eq!(exp.variants, vec![ElemType::F32, ElemType::F64]);
    assert!(!unit.consts.contains_key("plainTable"), "unsuffixed names are not registered");
}

#[test]
fn only_base_functions_with_recognized_usage_are_admitted() {
    let unit = parse_unit(UNIT, "unit.go").expect("parses");
    let names: Vec<&str> = unit.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["BaseAddSlices"], "helpers, methods, and op-free functions drop out");
    // The full index still records every plain function.
    assert!(unit.all_funcs.iter().any(|n| n == "helper"));
    assert!(unit.all_funcs.iter().any(|n| n == "BaseNothing"));
}

#[test]
fn main_loop_detection_records_iterator_and_stride() {
    let unit = parse_unit(UNIT, "unit.go").expect("parses");
    let func = &unit.functions[0];
    let li = func.loop_info.as_ref().expect("loop detected");
    assert_eq!(li.var, "i");
    assert_eq!(li.stmt_index, 1);
    assert_eq!(func.unroll_hint, 4, "unroll directive binds to the following loop");
}

#[test]
fn calls_are_deduplicated() {
    let unit = parse_unit(UNIT, "unit.go").expect("parses");
    let calls = &unit.functions[0].calls;
    let loads = calls.iter().filter(|c| c.name == "Load").count();
    assert_eq!(loads, 1, "repeated references collapse to one record");
    assert!(calls.contains(&CallRef {
        pkg: None,
        name: "Add".to_owned()
    }));
    assert!(calls.contains(&CallRef {
        pkg: None,
        name: "NumLanes".to_owned()
    }));
}

#[test]
fn store_only_zeroing_loops_are_not_main_loops() {
    let src = "package simd\n\nfunc BaseZeroThenAdd[T Lanes](out []T, in []T) {\n\tn := len(out)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tout[i] = 0\n\t}\n\tfor i := 0; i < n; i += NumLanes() {\n\t\ta := Load(in[i:])\n\t\tStore(out[i:], Add(a, a))\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let li = unit.functions[0].loop_info.as_ref().expect("loop detected");
    assert_eq!(li.stmt_index, 2, "the zeroing loop is rejected, the second loop wins");
}

#[test]
fn generic_constraint_alone_admits_a_function() {
    let src = "package simd\n\nfunc BaseCopy[T Floats](out []T, in []T) {\n\tfor i := 0; i < len(in); i++ {\n\t\tout[i] = in[i]\n\t}\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    assert_eq!(unit.functions.len(), 1, "no ops, but the constraint still requires specialization");
}

#[test]
fn conditional_blocks_nest_and_unclosed_blocks_drop() {
    let src = "package simd\n\n//gen:if float\n//gen:if avx512\n//gen:endif\n//gen:endif\n//gen:if f32\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    assert_eq!(unit.blocks.len(), 2, "the trailing unclosed block is dropped");
    assert!(unit.blocks[0].if_line > unit.blocks[1].if_line, "inner block closes first");
}

#[test]
fn union_constraints_parse() {
    let src = "package simd\n\nfunc BaseMix[T SignedInts | UnsignedInts](v hwy.Vec[T]) hwy.Vec[T] {\n\treturn Add(v, v)\n}\n";
    let unit = parse_unit(src, "t.go").expect("parses");
    let expansion = unit.functions[0].expansion();
    assert_eq!(
        expansion,
        vec![ElemType::I32, ElemType::I64, ElemType::U32, ElemType::U64]
    );
}

#[test]
fn malformed_source_is_a_parse_error() {
    let err = parse_unit("package simd\n\nfunc Base(((\n", "t.go").expect_err("bad syntax");
    assert_eq!(err.kind(), lanegen::ErrorKind::ParseError);
}
