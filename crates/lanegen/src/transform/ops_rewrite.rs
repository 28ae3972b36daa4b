//! Op rewriting: abstract intrinsics become target symbols.
//!
//! Every call against the abstract op universe is rewritten through the
//! target's op table: method-form ops move their first argument into
//! receiver position, package-form ops get the target's package and a
//! type-tagged name, `special` entries expand inline, and in-place entries
//! turn accumulator assignments into void calls with an address-of argument.
//! Polymorphic helpers (contrib math, same-unit base calls) are renamed with
//! element and target suffixes so concrete symbols exist per backend.

use crate::{
    ast::{CallTarget, Expr, ExprLoc, Literal, Stmt, UnOp},
    error::{GenError, GenResult},
    ops::Op,
    parse::ParsedFunc,
    target::{OpInfo, OpPackage},
    transform::{Ctx, int_lit, method_call, qualified_call},
    types::ElemType,
};

/// Emitted alias for a contrib subpackage. The contrib math package cannot
/// shadow standard math in the same unit.
pub fn contrib_alias(sub: &str) -> &'static str {
    match sub {
        "math" => "hmath",
        "vec" => "vec",
        "matvec" => "matvec",
        "matmul" => "matmul",
        "algo" => "algo",
        "image" => "image",
        "bitpack" => "bitpack",
        "sort" => "sort",
        _ => "contrib",
    }
}

pub(crate) fn contrib_static(sub: &str) -> &'static str {
    match sub {
        "math" => "math",
        "vec" => "vec",
        "matvec" => "matvec",
        "matmul" => "matmul",
        "algo" => "algo",
        "image" => "image",
        "bitpack" => "bitpack",
        "sort" => "sort",
        _ => "contrib",
    }
}

pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) -> GenResult<()> {
    let func_name = func.name.clone();
    for stmt in &mut func.body {
        rewrite_stmt(stmt, ctx, &func_name)?;
    }
    Ok(())
}

fn rewrite_stmt(stmt: &mut Stmt, ctx: &mut Ctx<'_>, func_name: &str) -> GenResult<()> {
    // In-place variants first, while the statement still has assignment
    // shape: `acc = MulAdd(a, b, acc)` becomes `asm.MulAddTo<T>(a, b, &acc)`.
    if let Stmt::Assign { target, value, .. } = stmt
        && let Expr::Call { target: call_target, args, .. } = &value.expr
        && let Some(op) = recognized_op(call_target)
        && let Some(info) = ctx.target.op_info(op)
        && let Some(acc_idx) = info.in_place
        && args.get(acc_idx).is_some_and(|a| a.expr == target.expr)
    {
        let mut args = args.clone();
        args[acc_idx] = ExprLoc::synth(Expr::Unary {
            op: UnOp::Addr,
            operand: Box::new(target.clone()),
        });
        ctx.imports.asm = true;
        let call = qualified_call("asm", format!("{}{}", info.name, vec_tag(ctx)), args);
        *stmt = Stmt::Expr(call);
    }

    // Each expression tree is visited exactly once: compound statements
    // recurse per child statement, leaf statements walk their own exprs.
    match stmt {
        Stmt::If { cond, body, or_else, .. } => {
            rewrite_expr_tree(cond, ctx, func_name)?;
            for s in body.iter_mut().chain(or_else.iter_mut()) {
                rewrite_stmt(s, ctx, func_name)?;
            }
            Ok(())
        }
        Stmt::For {
            init, cond, post, body, ..
        } => {
            if let Some(init) = init {
                rewrite_stmt(init, ctx, func_name)?;
            }
            if let Some(cond) = cond {
                rewrite_expr_tree(cond, ctx, func_name)?;
            }
            if let Some(post) = post {
                rewrite_stmt(post, ctx, func_name)?;
            }
            for s in body {
                rewrite_stmt(s, ctx, func_name)?;
            }
            Ok(())
        }
        leaf => {
            let mut first_err: Option<GenError> = None;
            leaf.walk_exprs_mut(&mut |e| {
                if first_err.is_some() {
                    return;
                }
                if let Err(err) = rewrite_expr(e, ctx, func_name) {
                    first_err = Some(err);
                }
            });
            match first_err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}

fn rewrite_expr_tree(expr: &mut ExprLoc, ctx: &mut Ctx<'_>, func_name: &str) -> GenResult<()> {
    let mut first_err: Option<GenError> = None;
    expr.expr.walk_mut(&mut |e| {
        if first_err.is_some() {
            return;
        }
        if let Err(err) = rewrite_expr(e, ctx, func_name) {
            first_err = Some(err);
        }
    });
    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn recognized_op(target: &CallTarget) -> Option<Op> {
    match target {
        CallTarget::Bare(name) => Op::recognize(name),
        CallTarget::Qualified { pkg, name } if pkg == "hwy" => Op::recognize(name),
        _ => None,
    }
}

fn rewrite_expr(e: &mut Expr, ctx: &mut Ctx<'_>, func_name: &str) -> GenResult<()> {
    let Expr::Call { target, type_args, args } = e else {
        return Ok(());
    };

    if let Some(op) = recognized_op(target) {
        let Some(info) = ctx.target.op_info(op) else {
            return Err(GenError::unknown_op(op.into(), ctx.target.name, func_name));
        };
        if info.package == OpPackage::Special {
            *e = materialize(op, std::mem::take(args), ctx, func_name)?;
            return Ok(());
        }
        // When both the method flag and a package are set, the method form
        // wins for call syntax; the package still feeds import computation.
        if info.is_method {
            if info.package == OpPackage::Vector {
                ctx.imports.asm = true;
            }
            let mut rest = std::mem::take(args);
            if rest.is_empty() {
                return Err(GenError::unknown_op(op.into(), ctx.target.name, func_name));
            }
            let recv = rest.remove(0);
            *e = Expr::Call {
                target: CallTarget::Method {
                    recv: Box::new(recv),
                    name: info.name.to_owned(),
                },
                type_args: Vec::new(),
                args: rest,
            };
            return Ok(());
        }
        let (pkg, name) = package_symbol(&info, ctx);
        *target = CallTarget::Qualified { pkg, name };
        if info.package != OpPackage::Fallback {
            type_args.clear();
        }
        return Ok(());
    }

    // Not a recognized op: polymorphic helpers and scalar survivors.
    match target {
        CallTarget::Qualified { pkg, name } => {
            let alias = pkg.clone();
            match alias.as_str() {
                "math" => {
                    ctx.imports.stdmath = true;
                }
                "hwy" => {
                    ctx.imports.core = true;
                }
                "vec" | "matvec" | "matmul" | "algo" | "image" | "bitpack" | "sort" => {
                    let sub = contrib_static(&alias);
                    ctx.imports.add_contrib(sub);
                    *pkg = contrib_alias(sub).to_owned();
                    *name = format!("{name}{}{}", ctx.elem.suffix(), ctx.target.suffix());
                    type_args.clear();
                }
                _ => {}
            }
        }
        CallTarget::Bare(name) if name.starts_with("Base") || name.starts_with("base") => {
            *name = format!("{name}{}{}", ctx.elem.suffix(), ctx.target.suffix());
            type_args.clear();
        }
        _ => {}
    }
    Ok(())
}

/// Package and final symbol name for a non-method table entry.
fn package_symbol(info: &OpInfo, ctx: &mut Ctx<'_>) -> (String, String) {
    match info.package {
        OpPackage::Vector => {
            ctx.imports.asm = true;
            ("asm".to_owned(), format!("{}{}", info.name, vec_tag(ctx)))
        }
        OpPackage::Core => {
            ctx.imports.core = true;
            ("hwy".to_owned(), info.name.to_owned())
        }
        OpPackage::Contrib(sub) => {
            ctx.imports.add_contrib(sub);
            (
                contrib_alias(sub).to_owned(),
                format!("{}{}{}", info.name, ctx.elem.suffix(), ctx.target.suffix()),
            )
        }
        OpPackage::Fallback => {
            ctx.imports.fallback = true;
            ("fb".to_owned(), info.name.to_owned())
        }
        OpPackage::Special => unreachable!("special entries are materialized earlier"),
    }
}

/// Type tag appended to vector-package symbols, e.g. `Float32x8`.
fn vec_tag(ctx: &Ctx<'_>) -> String {
    ctx.target
        .vec_type(ctx.elem)
        .strip_prefix("asm.")
        .map(str::to_owned)
        .unwrap_or_else(|| ctx.target.vec_type(ctx.elem))
}

/// Integer-vector tag of the same shape, e.g. `Int32x8`.
fn int_tag(ctx: &Ctx<'_>) -> String {
    let bits = ctx.target.elem_size(ctx.elem) * 8;
    if ctx.target.scalable {
        format!("Int{bits}xN")
    } else {
        format!("Int{bits}x{}", ctx.target.lanes_for(ctx.elem))
    }
}

/// The element the lanes actually hold after promotion.
fn lane_elem(ctx: &Ctx<'_>) -> ElemType {
    if ctx.target.promoted_half && ctx.elem.is_half() {
        ElemType::F32
    } else {
        ctx.elem
    }
}

fn broadcast(ctx: &mut Ctx<'_>, value: ExprLoc) -> ExprLoc {
    ctx.imports.asm = true;
    let tag = vec_tag(ctx);
    qualified_call("asm", format!("Broadcast{tag}"), vec![value])
}

fn broadcast_int(ctx: &mut Ctx<'_>, value: i64) -> ExprLoc {
    ctx.imports.asm = true;
    let tag = int_tag(ctx);
    qualified_call("asm", format!("Broadcast{tag}"), vec![int_lit(value)])
}

/// `|x|` in whatever form the target supports.
fn abs_expr(ctx: &mut Ctx<'_>, x: ExprLoc) -> ExprLoc {
    match ctx.target.op_info(Op::Abs) {
        Some(info) if info.is_method => method_call(x, info.name, vec![]),
        _ => {
            // max(x, 0 - x)
            let zero = broadcast(ctx, int_lit(0));
            let neg = method_call(zero, "Sub", vec![x.clone()]);
            method_call(x, "Max", vec![neg])
        }
    }
}

/// Exponent/mantissa bit parameters per lane element.
fn float_bits(elem: ElemType) -> Option<(i64, i64, i64, i64, i64)> {
    // (exp shift, exp mask, exp bias, mantissa mask, one-bits)
    match elem {
        ElemType::F32 => Some((23, 0xFF, 127, 0x007F_FFFF, 0x3F80_0000)),
        ElemType::F64 => Some((52, 0x7FF, 1023, 0x000F_FFFF_FFFF_FFFF, 0x3FF0_0000_0000_0000)),
        ElemType::F16 => Some((10, 0x1F, 15, 0x03FF, 0x3C00)),
        ElemType::Bf16 => Some((7, 0xFF, 127, 0x007F, 0x3F80)),
        _ => None,
    }
}

/// Inline materializers for `special` op-table entries.
fn materialize(op: Op, mut args: Vec<ExprLoc>, ctx: &mut Ctx<'_>, func_name: &str) -> GenResult<Expr> {
    let target_name = ctx.target.name;
    let arg = move |args: &mut Vec<ExprLoc>| -> GenResult<ExprLoc> {
        if args.is_empty() {
            Err(GenError::unknown_op(op.into(), target_name, func_name))
        } else {
            Ok(args.remove(0))
        }
    };
    let lane = lane_elem(ctx);
    let expr = match op {
        Op::Zero => broadcast(ctx, int_lit(0)).expr,
        Op::NumLanes | Op::MaxLanes | Op::Lanes => Expr::Lit(Literal::Int(i64::from(ctx.target.lanes_for(ctx.elem)))),
        Op::Abs => {
            let x = arg(&mut args)?;
            abs_expr(ctx, x).expr
        }
        Op::IsNaN => {
            let x = arg(&mut args)?;
            method_call(x.clone(), "Ne", vec![x]).expr
        }
        Op::IsInf => {
            let x = arg(&mut args)?;
            ctx.imports.stdmath = true;
            let inf = qualified_call("math", "Inf", vec![int_lit(1)]);
            let inf_vec = broadcast(ctx, inf);
            let abs = abs_expr(ctx, x);
            method_call(abs, "Eq", vec![inf_vec]).expr
        }
        Op::GetExponent => {
            let x = arg(&mut args)?;
            let Some((shift, mask, bias, _, _)) = float_bits(lane) else {
                return Err(GenError::unsupported(format!(
                    "GetExponent on non-float element {lane}"
                ))
                .in_function(func_name)
                .for_target(ctx.target.name));
            };
            let bits = ctx.target.elem_size(ctx.elem) * 8;
            let cast = method_call(x, format!("BitCastToInt{bits}"), vec![]);
            let shifted = method_call(cast, "ShiftRight", vec![int_lit(shift)]);
            let masked = method_call(shifted, "And", vec![broadcast_int(ctx, mask)]);
            let biased = method_call(masked, "Sub", vec![broadcast_int(ctx, bias)]);
            method_call(biased, format!("ConvertToFloat{bits}"), vec![]).expr
        }
        Op::GetMantissa => {
            let x = arg(&mut args)?;
            let Some((_, _, _, mantissa, one_bits)) = float_bits(lane) else {
                return Err(GenError::unsupported(format!(
                    "GetMantissa on non-float element {lane}"
                ))
                .in_function(func_name)
                .for_target(ctx.target.name));
            };
            let bits = ctx.target.elem_size(ctx.elem) * 8;
            let cast = method_call(x, format!("BitCastToInt{bits}"), vec![]);
            let masked = method_call(cast, "And", vec![broadcast_int(ctx, mantissa)]);
            let ones = method_call(masked, "Or", vec![broadcast_int(ctx, one_bits)]);
            method_call(ones, format!("BitCastToFloat{bits}"), vec![]).expr
        }
        Op::MaskNot => {
            // XOR with an all-true mask.
            let m = arg(&mut args)?;
            ctx.imports.asm = true;
            let bits = ctx.target.elem_size(ctx.elem) * 8;
            let all = if ctx.target.scalable {
                qualified_call("asm", format!("PredAll{bits}"), vec![])
            } else {
                qualified_call(
                    "asm",
                    format!("MaskAll{bits}x{}", ctx.target.lanes_for(ctx.elem)),
                    vec![],
                )
            };
            method_call(m, "Xor", vec![all]).expr
        }
        other => {
            return Err(GenError::unknown_op(other.into(), ctx.target.name, func_name));
        }
    };
    Ok(expr)
}
