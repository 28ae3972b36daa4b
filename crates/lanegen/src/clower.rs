//! C lowering: a subset of slice-processing functions emitted as C source
//! with target intrinsics, suitable for compilation into assembly.
//!
//! Only functions with a recognized vectorized loop whose body is built
//! from translatable ops are lowered; anything else is skipped silently.
//! The pipeline produces C source strings plus the thin wrapper unit; the
//! downstream assembler invocation is out of scope.

use std::fmt::Write;

use crate::{
    ast::{CallTarget, Expr, ExprLoc, Stmt},
    error::{GenError, GenResult},
    ops::Op,
    parse::ParsedFunc,
    target::{Arch, Target},
    types::ElemType,
};

/// Output of C lowering for one target.
#[derive(Debug, Clone)]
pub struct CLowering {
    /// The `.c` unit with one function per lowered `(function, element)`.
    pub c_source: String,
    /// The wrapper declarations unit (`c_wrappers_<target>_<arch>.gen`).
    pub wrappers: String,
    /// Symbols that were actually lowered.
    pub symbols: Vec<String>,
}

/// Per-(target, element) intrinsic spellings.
struct CIsa {
    vec_type: &'static str,
    scalar_type: &'static str,
    load: &'static str,
    store: &'static str,
    set1: &'static str,
    lanes: u32,
    /// op name -> intrinsic; the x86 FMA takes (a, b, c), the arm one
    /// (c, a, b).
    fma_acc_first: bool,
    ops: &'static [(Op, &'static str)],
}

fn isa_for(target: &Target, elem: ElemType) -> Option<CIsa> {
    match (target.name, elem) {
        ("avx2", ElemType::F32) => Some(CIsa {
            vec_type: "__m256",
            scalar_type: "float",
            load: "_mm256_loadu_ps",
            store: "_mm256_storeu_ps",
            set1: "_mm256_set1_ps",
            lanes: 8,
            fma_acc_first: false,
            ops: X86_F32_OPS,
        }),
        ("avx2", ElemType::F64) => Some(CIsa {
            vec_type: "__m256d",
            scalar_type: "double",
            load: "_mm256_loadu_pd",
            store: "_mm256_storeu_pd",
            set1: "_mm256_set1_pd",
            lanes: 4,
            fma_acc_first: false,
            ops: X86_F64_OPS,
        }),
        ("avx512", ElemType::F32) => Some(CIsa {
            vec_type: "__m512",
            scalar_type: "float",
            load: "_mm512_loadu_ps",
            store: "_mm512_storeu_ps",
            set1: "_mm512_set1_ps",
            lanes: 16,
            fma_acc_first: false,
            ops: X86_512_F32_OPS,
        }),
        ("avx512", ElemType::F64) => Some(CIsa {
            vec_type: "__m512d",
            scalar_type: "double",
            load: "_mm512_loadu_pd",
            store: "_mm512_storeu_pd",
            set1: "_mm512_set1_pd",
            lanes: 8,
            fma_acc_first: false,
            ops: X86_512_F64_OPS,
        }),
        ("neon", ElemType::F32) => Some(CIsa {
            vec_type: "float32x4_t",
            scalar_type: "float",
            load: "vld1q_f32",
            store: "vst1q_f32",
            set1: "vdupq_n_f32",
            lanes: 4,
            fma_acc_first: true,
            ops: NEON_F32_OPS,
        }),
        ("neon", ElemType::F64) => Some(CIsa {
            vec_type: "float64x2_t",
            scalar_type: "double",
            load: "vld1q_f64",
            store: "vst1q_f64",
            set1: "vdupq_n_f64",
            lanes: 2,
            fma_acc_first: true,
            ops: NEON_F64_OPS,
        }),
        _ => None,
    }
}

static X86_F32_OPS: &[(Op, &str)] = &[
    (Op::Add, "_mm256_add_ps"),
    (Op::Sub, "_mm256_sub_ps"),
    (Op::Mul, "_mm256_mul_ps"),
    (Op::Div, "_mm256_div_ps"),
    (Op::Min, "_mm256_min_ps"),
    (Op::Max, "_mm256_max_ps"),
    (Op::Sqrt, "_mm256_sqrt_ps"),
    (Op::MulAdd, "_mm256_fmadd_ps"),
];

static X86_F64_OPS: &[(Op, &str)] = &[
    (Op::Add, "_mm256_add_pd"),
    (Op::Sub, "_mm256_sub_pd"),
    (Op::Mul, "_mm256_mul_pd"),
    (Op::Div, "_mm256_div_pd"),
    (Op::Min, "_mm256_min_pd"),
    (Op::Max, "_mm256_max_pd"),
    (Op::Sqrt, "_mm256_sqrt_pd"),
    (Op::MulAdd, "_mm256_fmadd_pd"),
];

static X86_512_F32_OPS: &[(Op, &str)] = &[
    (Op::Add, "_mm512_add_ps"),
    (Op::Sub, "_mm512_sub_ps"),
    (Op::Mul, "_mm512_mul_ps"),
    (Op::Div, "_mm512_div_ps"),
    (Op::Min, "_mm512_min_ps"),
    (Op::Max, "_mm512_max_ps"),
    (Op::Sqrt, "_mm512_sqrt_ps"),
    (Op::MulAdd, "_mm512_fmadd_ps"),
];

static X86_512_F64_OPS: &[(Op, &str)] = &[
    (Op::Add, "_mm512_add_pd"),
    (Op::Sub, "_mm512_sub_pd"),
    (Op::Mul, "_mm512_mul_pd"),
    (Op::Div, "_mm512_div_pd"),
    (Op::Min, "_mm512_min_pd"),
    (Op::Max, "_mm512_max_pd"),
    (Op::Sqrt, "_mm512_sqrt_pd"),
    (Op::MulAdd, "_mm512_fmadd_pd"),
];

static NEON_F32_OPS: &[(Op, &str)] = &[
    (Op::Add, "vaddq_f32"),
    (Op::Sub, "vsubq_f32"),
    (Op::Mul, "vmulq_f32"),
    (Op::Div, "vdivq_f32"),
    (Op::Min, "vminq_f32"),
    (Op::Max, "vmaxq_f32"),
    (Op::Sqrt, "vsqrtq_f32"),
    (Op::MulAdd, "vfmaq_f32"),
];

static NEON_F64_OPS: &[(Op, &str)] = &[
    (Op::Add, "vaddq_f64"),
    (Op::Sub, "vsubq_f64"),
    (Op::Mul, "vmulq_f64"),
    (Op::Div, "vdivq_f64"),
    (Op::Min, "vminq_f64"),
    (Op::Max, "vmaxq_f64"),
    (Op::Sqrt, "vsqrtq_f64"),
    (Op::MulAdd, "vfmaq_f64"),
];

/// Whether C lowering supports a target at all.
pub fn supports_target(target: &Target) -> bool {
    matches!(target.name, "avx2" | "avx512" | "neon")
}

/// Lowers every eligible function to C for one target.
pub fn lower_unit(funcs: &[&ParsedFunc], target: &'static Target, package: &str) -> GenResult<CLowering> {
    if !supports_target(target) {
        return Err(GenError::config(format!(
            "C lowering is not available for target `{}`",
            target.name
        )));
    }
    let mut c_source = String::new();
    let header = match target.arch {
        Arch::Amd64 => "#include <immintrin.h>",
        Arch::Arm64 => "#include <arm_neon.h>",
        Arch::Any => "",
    };
    let _ = writeln!(c_source, "/* Code generated by lanegen. DO NOT EDIT. */");
    let _ = writeln!(c_source, "{header}");
    let _ = writeln!(c_source);

    let mut wrappers = String::new();
    let _ = writeln!(wrappers, "// Code generated by lanegen. DO NOT EDIT.");
    let _ = writeln!(wrappers);
    let _ = writeln!(wrappers, "//go:build {}", target.build_tag);
    let _ = writeln!(wrappers);
    let _ = writeln!(wrappers, "package {package}");
    let _ = writeln!(wrappers);

    let mut symbols = Vec::new();
    for func in funcs {
        if func.loop_info.is_none() {
            continue;
        }
        for elem in func.expansion() {
            let Some(isa) = isa_for(target, elem) else { continue };
            if let Some((c_fn, wrapper)) = lower_func(func, target, elem, &isa) {
                let _ = writeln!(c_source, "{c_fn}");
                let _ = writeln!(wrappers, "{wrapper}");
                symbols.push(format!("{}{}{}_c", func.name, elem.suffix(), target.suffix()));
            }
        }
    }
    Ok(CLowering {
        c_source,
        wrappers,
        symbols,
    })
}

/// Lowers one function at one element type; `None` means not translatable.
fn lower_func(func: &ParsedFunc, target: &Target, elem: ElemType, isa: &CIsa) -> Option<(String, String)> {
    let li = func.loop_info.as_ref()?;
    let Stmt::For { body, .. } = &func.body[li.stmt_index] else {
        return None;
    };

    // The store target is the only mutable pointer parameter.
    let mut written: Option<String> = None;
    for stmt in body.iter() {
        if let Stmt::Expr(e) = stmt
            && let Expr::Call { target: ct, args, .. } = &e.expr
            && ct.name() == "Store"
            && let Some(first) = args.first()
            && let Expr::SliceExpr { object, .. } = &first.expr
            && let Expr::Name(n) = &object.expr
        {
            written = Some(n.clone());
        }
    }
    let written = written?;

    let symbol = format!("{}{}{}_c", func.name, elem.suffix(), target.suffix());
    let mut params = Vec::new();
    let mut go_params = Vec::new();
    for p in &func.params {
        match &p.ty {
            crate::types::TypeExpr::Slice(_) => {
                let qual = if p.name == written { "" } else { "const " };
                params.push(format!("{qual}{} *{}", isa.scalar_type, p.name));
                go_params.push(format!("{} *{}", p.name, elem.scalar_name()));
            }
            _ => {
                params.push(format!("{} {}", isa.scalar_type, p.name));
                go_params.push(format!("{} {}", p.name, elem.scalar_name()));
            }
        }
    }
    params.push("long n".to_owned());
    go_params.push("n int64".to_owned());

    // Translate the loop body: vector main loop plus scalar remainder.
    let mut vec_lines = Vec::new();
    let mut scalar_lines = Vec::new();
    for stmt in body.iter() {
        match stmt {
            // `n := len(x)` style bookkeeping is supplied by the n param.
            Stmt::ShortDecl { value, .. }
                if matches!(&value.expr, Expr::Call { target, .. } if target.name() == "len") => {}
            Stmt::ShortDecl { name, value, .. } => {
                let vec = translate_vec(value, isa)?;
                let scalar = translate_scalar(value, isa)?;
                vec_lines.push(format!("{} {name} = {vec};", isa.vec_type));
                scalar_lines.push(format!("{} {name} = {scalar};", isa.scalar_type));
            }
            Stmt::Expr(e) => {
                let Expr::Call { target: ct, args, .. } = &e.expr else {
                    return None;
                };
                if ct.name() != "Store" || args.len() != 2 {
                    return None;
                }
                let dst = slice_base(&args[0])?;
                let vec = translate_vec(&args[1], isa)?;
                let scalar = translate_scalar(&args[1], isa)?;
                vec_lines.push(format!("{}({dst} + i, {vec});", isa.store));
                scalar_lines.push(format!("{dst}[i] = {scalar};"));
            }
            _ => return None,
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "void {symbol}({}) {{", params.join(", "));
    let _ = writeln!(out, "\tlong i = 0;");
    let _ = writeln!(out, "\tfor (; i + {} <= n; i += {}) {{", isa.lanes, isa.lanes);
    for line in &vec_lines {
        let _ = writeln!(out, "\t\t{line}");
    }
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "\tfor (; i < n; i++) {{");
    for line in &scalar_lines {
        let _ = writeln!(out, "\t\t{line}");
    }
    let _ = writeln!(out, "\t}}");
    let _ = writeln!(out, "}}");

    let mut wrapper = String::new();
    let _ = writeln!(wrapper, "//go:noescape");
    let _ = writeln!(wrapper, "func {symbol}({})", go_params.join(", "));
    Some((out, wrapper))
}

fn slice_base(expr: &ExprLoc) -> Option<String> {
    match &expr.expr {
        Expr::SliceExpr { object, .. } | Expr::Index { object, .. } => match &object.expr {
            Expr::Name(n) => Some(n.clone()),
            _ => None,
        },
        Expr::Name(n) => Some(n.clone()),
        _ => None,
    }
}

fn intrinsic(isa: &CIsa, op: Op) -> Option<&'static str> {
    isa.ops.iter().find(|(o, _)| *o == op).map(|(_, name)| *name)
}

/// Vector-register translation of an expression.
fn translate_vec(expr: &ExprLoc, isa: &CIsa) -> Option<String> {
    match &expr.expr {
        Expr::Name(n) => Some(n.clone()),
        Expr::Lit(lit) => Some(lit.render()),
        Expr::Paren(inner) => translate_vec(inner, isa).map(|s| format!("({s})")),
        Expr::Call { target, args, .. } => {
            let op = match target {
                CallTarget::Bare(name) => Op::recognize(name)?,
                CallTarget::Qualified { pkg, name } if pkg == "hwy" => Op::recognize(name)?,
                _ => return None,
            };
            match op {
                Op::Load => {
                    let base = slice_base(args.first()?)?;
                    Some(format!("{}({base} + i)", isa.load))
                }
                Op::Set => {
                    let lit = args.first()?;
                    translate_scalar(lit, isa).map(|s| format!("{}({s})", isa.set1))
                }
                Op::MulAdd => {
                    let name = intrinsic(isa, op)?;
                    let a = translate_vec(args.first()?, isa)?;
                    let b = translate_vec(args.get(1)?, isa)?;
                    let c = translate_vec(args.get(2)?, isa)?;
                    if isa.fma_acc_first {
                        Some(format!("{name}({c}, {a}, {b})"))
                    } else {
                        Some(format!("{name}({a}, {b}, {c})"))
                    }
                }
                _ => {
                    let name = intrinsic(isa, op)?;
                    let parts: Vec<String> =
                        args.iter().map(|a| translate_vec(a, isa)).collect::<Option<Vec<_>>>()?;
                    Some(format!("{name}({})", parts.join(", ")))
                }
            }
        }
        _ => None,
    }
}

/// Scalar translation of the same expression for the remainder loop.
fn translate_scalar(expr: &ExprLoc, isa: &CIsa) -> Option<String> {
    let single = isa.scalar_type == "float";
    match &expr.expr {
        Expr::Name(n) => Some(n.clone()),
        Expr::Lit(lit) => Some(lit.render()),
        Expr::Paren(inner) => translate_scalar(inner, isa).map(|s| format!("({s})")),
        Expr::Call { target, args, .. } => {
            let op = match target {
                CallTarget::Bare(name) => Op::recognize(name)?,
                CallTarget::Qualified { pkg, name } if pkg == "hwy" => Op::recognize(name)?,
                _ => return None,
            };
            let bin = |sym: &str| -> Option<String> {
                let a = translate_scalar(args.first()?, isa)?;
                let b = translate_scalar(args.get(1)?, isa)?;
                Some(format!("{a} {sym} {b}"))
            };
            match op {
                Op::Load => {
                    let base = slice_base(args.first()?)?;
                    Some(format!("{base}[i]"))
                }
                Op::Set => translate_scalar(args.first()?, isa),
                Op::Add => bin("+"),
                Op::Sub => bin("-"),
                Op::Mul => bin("*"),
                Op::Div => bin("/"),
                Op::Min => {
                    let a = translate_scalar(args.first()?, isa)?;
                    let b = translate_scalar(args.get(1)?, isa)?;
                    Some(format!("{}({a}, {b})", if single { "fminf" } else { "fmin" }))
                }
                Op::Max => {
                    let a = translate_scalar(args.first()?, isa)?;
                    let b = translate_scalar(args.get(1)?, isa)?;
                    Some(format!("{}({a}, {b})", if single { "fmaxf" } else { "fmax" }))
                }
                Op::Sqrt => {
                    let a = translate_scalar(args.first()?, isa)?;
                    Some(format!("{}({a})", if single { "sqrtf" } else { "sqrt" }))
                }
                Op::MulAdd => {
                    let a = translate_scalar(args.first()?, isa)?;
                    let b = translate_scalar(args.get(1)?, isa)?;
                    let c = translate_scalar(args.get(2)?, isa)?;
                    Some(format!("{}({a}, {b}, {c})", if single { "fmaf" } else { "fma" }))
                }
                _ => None,
            }
        }
        _ => None,
    }
}
