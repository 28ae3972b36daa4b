//! Dispatcher synthesis: per-architecture init routines and generic front
//! doors.
//!
//! For every dispatchable function and concrete element type a dispatch
//! variable is declared; the arch init routine assigns it in descending
//! capability order behind runtime CPU feature checks, falling back to the
//! scalar symbols. A generic front door per exported generic function
//! type-switches on its first slice parameter and forwards to the dispatch
//! variable; unreachable arms terminate.
//!
//! Functions whose signature mentions the opaque vector type are excluded:
//! their concrete vector types differ per target and cannot unify behind a
//! single symbol.

use std::fmt::Write;

use indexmap::IndexMap;

use crate::{
    emit::render_type,
    parse::ParsedFunc,
    target::{Arch, Target},
    transform::{TransformedFunc, symbol_name},
    types::{Constraint, ElemType, TypeExpr},
};

/// Everything the dispatcher needs to see: the admitted source functions and
/// all successfully transformed triples.
pub struct DispatchInput<'a> {
    pub funcs: Vec<&'a ParsedFunc>,
    pub transformed: &'a [TransformedFunc],
}

impl DispatchInput<'_> {
    fn dispatchable(&self) -> Vec<&ParsedFunc> {
        self.funcs
            .iter()
            .copied()
            .filter(|f| f.exported && !f.signature_mentions_vector())
            .collect()
    }

    /// The transformed instance backing a `(function, element)` pair,
    /// preferring the scalar fallback for its target-neutral signature.
    fn instance(&self, base: &str, elem: Option<ElemType>) -> Option<&TransformedFunc> {
        self.transformed
            .iter()
            .filter(|t| t.base_name == base && t.elem == elem)
            .min_by_key(|t| t.target.rank)
    }

    /// Whether the symbol for this triple was actually produced.
    fn has_symbol(&self, base: &str, elem: Option<ElemType>, target: &Target) -> bool {
        self.transformed
            .iter()
            .any(|t| t.base_name == base && t.elem == elem && std::ptr::eq(t.target, target))
    }
}

/// Emits all dispatch units: one per architecture with SIMD targets, plus a
/// portable unit for platforms where only the scalar fallback builds.
pub fn emit_dispatch_units(
    package: &str,
    module: &str,
    prefix: &str,
    targets: &[&'static Target],
    input: &DispatchInput<'_>,
) -> IndexMap<String, String> {
    let mut units = IndexMap::new();
    let has_fallback = targets.iter().any(|t| t.scalar);

    for arch in [Arch::Amd64, Arch::Arm64] {
        let mut arch_targets: Vec<&'static Target> =
            targets.iter().copied().filter(|t| t.arch == arch).collect();
        if arch_targets.is_empty() {
            continue;
        }
        arch_targets.sort_by(|a, b| b.rank.cmp(&a.rank));
        let unit = emit_arch_unit(package, module, arch, &arch_targets, has_fallback, input);
        units.insert(format!("{prefix}_{arch}.gen"), unit);
    }

    if has_fallback {
        let unit = emit_portable_unit(package, input);
        units.insert(format!("{prefix}_fallback.gen"), unit);
    }
    units
}

/// Element expansion of a function, `[None]` for non-generic functions.
fn elems_of(func: &ParsedFunc) -> Vec<Option<ElemType>> {
    let expansion = func.expansion();
    if expansion.is_empty() {
        vec![None]
    } else {
        expansion.into_iter().map(Some).collect()
    }
}

/// `BaseAddVec` -> `addVec`; the dispatch variable stem.
fn var_stem(base: &str) -> String {
    let trimmed = base.strip_prefix("Base").or_else(|| base.strip_prefix("base")).unwrap_or(base);
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(c) => format!("{}{}", c.to_lowercase(), chars.as_str()),
        None => trimmed.to_owned(),
    }
}

fn var_name(base: &str, elem: Option<ElemType>) -> String {
    match elem {
        Some(elem) => format!("{}{}", var_stem(base), elem.camel_name()),
        None => var_stem(base),
    }
}

/// `func([]float32, []float32) float32` — the dispatch variable's type.
fn fn_type(t: &TransformedFunc) -> String {
    let params = t.params.iter().map(|p| render_type(&p.ty)).collect::<Vec<_>>().join(", ");
    match t.returns.len() {
        0 => format!("func({params})"),
        1 => format!("func({params}) {}", render_type(&t.returns[0].ty)),
        _ => format!(
            "func({params}) ({})",
            t.returns.iter().map(|r| render_type(&r.ty)).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn write_header(out: &mut String, package: &str, build_tag: &str, needs_cpu: bool, module: &str) {
    let _ = writeln!(out, "// Code generated by lanegen. DO NOT EDIT.");
    let _ = writeln!(out);
    if !build_tag.is_empty() {
        let _ = writeln!(out, "//go:build {build_tag}");
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "package {package}");
    let _ = writeln!(out);
    if needs_cpu {
        let _ = writeln!(out, "import cpu \"{module}/internal/cpu\"");
        let _ = writeln!(out);
    }
}

/// Declares one dispatch variable per `(function, element)`.
fn write_vars(out: &mut String, input: &DispatchInput<'_>) {
    let mut any = false;
    for func in input.dispatchable() {
        for elem in elems_of(func) {
            let Some(instance) = input.instance(&func.name, elem) else {
                continue;
            };
            let _ = writeln!(out, "var {} {}", var_name(&func.name, elem), fn_type(instance));
            any = true;
        }
    }
    if any {
        let _ = writeln!(out);
    }
}

fn write_assignments(out: &mut String, input: &DispatchInput<'_>, target: &'static Target, indent: &str) {
    for func in input.dispatchable() {
        for elem in elems_of(func) {
            if input.has_symbol(&func.name, elem, target) {
                let _ = writeln!(
                    out,
                    "{indent}{} = {}",
                    var_name(&func.name, elem),
                    symbol_name(&func.name, elem, target)
                );
            }
        }
    }
}

fn arch_init_name(arch: Arch) -> String {
    let s = arch.as_str();
    let mut chars = s.chars();
    let head = chars.next().map(|c| c.to_uppercase().to_string()).unwrap_or_default();
    format!("init{head}{}", chars.as_str())
}

fn emit_arch_unit(
    package: &str,
    module: &str,
    arch: Arch,
    arch_targets: &[&'static Target],
    has_fallback: bool,
    input: &DispatchInput<'_>,
) -> String {
    let mut out = String::new();
    let build_tag = match arch {
        Arch::Amd64 => "amd64 && !purego",
        Arch::Arm64 => "arm64 && !purego",
        Arch::Any => "",
    };
    write_header(&mut out, package, build_tag, true, module);
    write_vars(&mut out, input);

    let init_name = arch_init_name(arch);
    let _ = writeln!(out, "func init() {{");
    let _ = writeln!(out, "\t{init_name}()");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "func {init_name}() {{");
    for target in arch_targets {
        let _ = writeln!(out, "\tif cpu.{} {{", target.feature);
        write_assignments(&mut out, input, target, "\t\t");
        let _ = writeln!(out, "\t\treturn");
        let _ = writeln!(out, "\t}}");
    }
    if has_fallback {
        let _ = writeln!(out, "\tinitFallback()");
    }
    let _ = writeln!(out, "}}");

    if has_fallback {
        let _ = writeln!(out);
        write_fallback_init(&mut out, input);
    }

    write_front_doors(&mut out, input);
    out
}

fn emit_portable_unit(package: &str, input: &DispatchInput<'_>) -> String {
    let mut out = String::new();
    write_header(&mut out, package, "purego || (!amd64 && !arm64)", false, "");
    write_vars(&mut out, input);
    let _ = writeln!(out, "func init() {{");
    let _ = writeln!(out, "\tinitFallback()");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    write_fallback_init(&mut out, input);
    write_front_doors(&mut out, input);
    out
}

fn write_fallback_init(out: &mut String, input: &DispatchInput<'_>) {
    let fallback = crate::target::get("fallback").expect("catalog always has the fallback");
    let _ = writeln!(out, "func initFallback() {{");
    write_assignments(out, input, fallback, "\t");
    let _ = writeln!(out, "}}");
}

/// The generic front door: switches on the runtime type of the first slice
/// parameter and forwards to the dispatch variable for that element type.
fn write_front_doors(out: &mut String, input: &DispatchInput<'_>) {
    for func in input.dispatchable() {
        let Some(tp) = func.type_params.first() else {
            continue;
        };
        let Some((switch_param_idx, _)) = func
            .params
            .iter()
            .enumerate()
            .find(|(_, p)| matches!(&p.ty, TypeExpr::Slice(inner) if matches!(**inner, TypeExpr::Param(_))))
        else {
            continue;
        };

        let public = func
            .name
            .strip_prefix("Base")
            .unwrap_or(&func.name)
            .to_owned();
        let params = func
            .params
            .iter()
            .map(|p| format!("{} {}", p.name, render_type(&p.ty)))
            .collect::<Vec<_>>()
            .join(", ");
        let returns = match func.returns.len() {
            0 => String::new(),
            1 => format!(" {}", render_type(&func.returns[0].ty)),
            _ => format!(
                " ({})",
                func.returns.iter().map(|r| render_type(&r.ty)).collect::<Vec<_>>().join(", ")
            ),
        };

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "func {public}[{} {}]({params}){returns} {{",
            tp.name,
            constraint_text(&tp.constraint)
        );
        let switch_param = &func.params[switch_param_idx];
        let _ = writeln!(out, "\tswitch v := any({}).(type) {{", switch_param.name);
        for elem in func.expansion() {
            let _ = writeln!(out, "\tcase []{}:", elem.scalar_name());
            let call_args = func
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| forward_arg(i == switch_param_idx, p, elem, &tp.name))
                .collect::<Vec<_>>()
                .join(", ");
            let call = format!("{}({call_args})", var_name(&func.name, Some(elem)));
            if func.returns.is_empty() {
                let _ = writeln!(out, "\t\t{call}");
                let _ = writeln!(out, "\t\treturn");
            } else {
                let _ = writeln!(out, "\t\treturn any({call}).({})", render_type(&func.returns[0].ty));
            }
        }
        let _ = writeln!(out, "\tdefault:");
        let _ = writeln!(out, "\t\tpanic(\"unreachable\")");
        let _ = writeln!(out, "\t}}");
        let _ = writeln!(out, "}}");
    }
}

/// Forwards one argument through the type switch, converting generically
/// typed values to the concrete element type.
fn forward_arg(is_switch_param: bool, p: &crate::parse::Param, elem: ElemType, tp_name: &str) -> String {
    if is_switch_param {
        return "v".to_owned();
    }
    match &p.ty {
        TypeExpr::Slice(inner) if matches!(&**inner, TypeExpr::Param(n) if n == tp_name) => {
            format!("any({}).([]{})", p.name, elem.scalar_name())
        }
        TypeExpr::Param(n) if n == tp_name => format!("any({}).({})", p.name, elem.scalar_name()),
        _ => p.name.clone(),
    }
}

fn constraint_text(c: &Constraint) -> String {
    match c {
        Constraint::Floats => "Floats".to_owned(),
        Constraint::SignedInts => "SignedInts".to_owned(),
        Constraint::UnsignedInts => "UnsignedInts".to_owned(),
        Constraint::Ints => "Ints".to_owned(),
        Constraint::Lanes => "Lanes".to_owned(),
        Constraint::Union(members) => members.iter().map(constraint_text).collect::<Vec<_>>().join(" | "),
    }
}

/// File name of a per-architecture dispatch unit.
pub fn dispatch_file_name(prefix: &str, arch: Arch) -> String {
    format!("{prefix}_{arch}.gen")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_names_follow_trimmed_camel_convention() {
        assert_eq!(var_name("BaseFoo", Some(ElemType::F32)), "fooFloat32");
        assert_eq!(var_name("BaseAddVec", Some(ElemType::F64)), "addVecFloat64");
        assert_eq!(var_name("BaseSum", None), "sum");
    }

    #[test]
    fn arch_init_names_are_capitalized() {
        assert_eq!(arch_init_name(Arch::Amd64), "initAmd64");
        assert_eq!(arch_init_name(Arch::Arm64), "initArm64");
    }
}
