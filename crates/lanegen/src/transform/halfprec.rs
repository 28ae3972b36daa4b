//! Half-precision lowering.
//!
//! Half-precision scalars are library structs bit-aliased to a 16-bit
//! integer, so scalar arithmetic on them is invalid in the emitted language.
//! The pass retypes half locals to single precision, wraps half-slice
//! element reads in `.Float32()`, wraps half-slice element writes in the
//! matching `Float32To*` conversion, expands compound assignments, converts
//! half-returning reductions on first use, and materializes a conversion on
//! `return` when the returned expression has become float-typed. The
//! tracking sets on the transform context guarantee each read and write is
//! wrapped exactly once.

use crate::{
    ast::{CallTarget, Expr, ExprLoc, Stmt},
    parse::ParsedFunc,
    transform::{Ctx, qualified_call},
    types::{ElemType, TypeExpr},
};

pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) {
    let conv = if ctx.elem == ElemType::F16 {
        "Float32ToFloat16"
    } else {
        "Float32ToBFloat16"
    };
    let returns_half = func.returns.first().is_some_and(|r| is_half_scalar(&r.ty));

    let body = std::mem::take(&mut func.body);
    func.body = body.into_iter().map(|s| lower_stmt(s, ctx, conv, returns_half)).collect();
}

fn is_half_scalar(ty: &TypeExpr) -> bool {
    match ty {
        TypeExpr::Elem(e) => e.is_half(),
        TypeExpr::Named(n) => n == "hwy.Float16" || n == "hwy.BFloat16",
        _ => false,
    }
}

fn is_half_index(expr: &Expr, ctx: &Ctx<'_>) -> bool {
    matches!(expr, Expr::Index { object, .. }
        if matches!(&object.expr, Expr::Name(n) if ctx.half_slices.contains(n)))
}

/// `.Float32()` on a half-slice element read.
fn float32_read(index_expr: ExprLoc) -> ExprLoc {
    ExprLoc::new(
        index_expr.position,
        Expr::Call {
            target: CallTarget::Method {
                recv: Box::new(index_expr),
                name: "Float32".to_owned(),
            },
            type_args: Vec::new(),
            args: Vec::new(),
        },
    )
}

fn is_conv_call(expr: &Expr, conv: &str) -> bool {
    matches!(expr, Expr::Call { target: CallTarget::Qualified { pkg, name }, .. } if pkg == "hwy" && name == conv)
}

fn wrap_store(value: ExprLoc, ctx: &mut Ctx<'_>, conv: &str) -> ExprLoc {
    if is_conv_call(&value.expr, conv) {
        return value;
    }
    ctx.imports.core = true;
    let position = value.position;
    let mut call = qualified_call("hwy", conv, vec![value]);
    call.position = position;
    call
}

fn lower_stmt(stmt: Stmt, ctx: &mut Ctx<'_>, conv: &str, returns_half: bool) -> Stmt {
    match stmt {
        Stmt::VarDecl {
            name,
            ty,
            value,
            position,
        } => {
            let ty = ty.map(|ty| {
                if is_half_scalar(&ty) {
                    ctx.half_locals.insert(name.clone());
                    TypeExpr::Named("float32".to_owned())
                } else {
                    ty
                }
            });
            Stmt::VarDecl {
                name,
                ty,
                value: value.map(|v| wrap_reads(v, ctx, conv)),
                position,
            }
        }
        Stmt::ShortDecl { name, value, position } => {
            // Reductions over native half vectors return a half scalar;
            // wrap the value on first use and retype the binding.
            let value = if !ctx.target.promoted_half
                && is_reduce_call(&value.expr)
                && !ctx.half_reducers.contains(&name)
            {
                ctx.half_reducers.insert(name.clone());
                float32_read(wrap_reads(value, ctx, conv))
            } else {
                wrap_reads(value, ctx, conv)
            };
            Stmt::ShortDecl { name, value, position }
        }
        Stmt::Assign { target, value, position } => {
            if is_half_index(&target.expr, ctx) {
                let value = wrap_store(wrap_reads(value, ctx, conv), ctx, conv);
                Stmt::Assign { target, value, position }
            } else {
                Stmt::Assign {
                    target: wrap_reads(target, ctx, conv),
                    value: wrap_reads(value, ctx, conv),
                    position,
                }
            }
        }
        Stmt::OpAssign {
            target,
            op,
            value,
            position,
        } => {
            if is_half_index(&target.expr, ctx) {
                // out[i] op= x  ->  out[i] = Float32ToHalf(out[i].Float32() op x)
                let read = float32_read(target.clone());
                let rhs = wrap_reads(value, ctx, conv);
                let combined = ExprLoc::new(
                    position,
                    Expr::Binary {
                        op,
                        left: Box::new(read),
                        right: Box::new(rhs),
                    },
                );
                Stmt::Assign {
                    target,
                    value: wrap_store(combined, ctx, conv),
                    position,
                }
            } else {
                Stmt::OpAssign {
                    target: wrap_reads(target, ctx, conv),
                    op,
                    value: wrap_reads(value, ctx, conv),
                    position,
                }
            }
        }
        Stmt::If {
            cond,
            body,
            or_else,
            position,
        } => Stmt::If {
            cond: wrap_reads(cond, ctx, conv),
            body: body.into_iter().map(|s| lower_stmt(s, ctx, conv, returns_half)).collect(),
            or_else: or_else
                .into_iter()
                .map(|s| lower_stmt(s, ctx, conv, returns_half))
                .collect(),
            position,
        },
        Stmt::For {
            init,
            cond,
            post,
            body,
            position,
        } => Stmt::For {
            init: init.map(|s| Box::new(lower_stmt(*s, ctx, conv, returns_half))),
            cond: cond.map(|c| wrap_reads(c, ctx, conv)),
            post: post.map(|s| Box::new(lower_stmt(*s, ctx, conv, returns_half))),
            body: body.into_iter().map(|s| lower_stmt(s, ctx, conv, returns_half)).collect(),
            position,
        },
        Stmt::Return { value, position } => {
            let value = value.map(|v| {
                let v = wrap_reads(v, ctx, conv);
                if returns_half && !is_conv_call(&v.expr, conv) {
                    wrap_store(v, ctx, conv)
                } else {
                    v
                }
            });
            Stmt::Return { value, position }
        }
        other => other,
    }
}

fn is_reduce_call(expr: &Expr) -> bool {
    matches!(expr, Expr::Call { target: CallTarget::Method { name, .. }, .. } if name.starts_with("Reduce"))
}

/// Wraps half-slice element reads in `.Float32()`, rewrites conversions
/// naming the half type to `float32` conversions, and leaves already
/// wrapped reads alone.
fn wrap_reads(expr: ExprLoc, ctx: &mut Ctx<'_>, conv: &str) -> ExprLoc {
    let position = expr.position;
    let rebuilt = match expr.expr {
        // Already wrapped: `x[i].Float32()` stays as-is.
        Expr::Call {
            target: CallTarget::Method { recv, name },
            type_args,
            args,
        } if name == "Float32" && is_half_index(&recv.expr, ctx) => Expr::Call {
            target: CallTarget::Method { recv, name },
            type_args,
            args,
        },
        Expr::Index { object, index } => {
            let rebuilt = Expr::Index {
                object,
                index: Box::new(wrap_reads(*index, ctx, conv)),
            };
            if is_half_index(&rebuilt, ctx) {
                return float32_read(ExprLoc::new(position, rebuilt));
            }
            rebuilt
        }
        // A conversion naming the half type becomes a float32 conversion.
        Expr::Convert { ty, arg } if is_half_scalar(&ty) => Expr::Convert {
            ty: TypeExpr::Named("float32".to_owned()),
            arg: Box::new(wrap_reads(*arg, ctx, conv)),
        },
        Expr::Call {
            target: CallTarget::Qualified { pkg, name },
            args,
            ..
        } if pkg == "hwy" && (name == "Float16" || name == "BFloat16") && args.len() == 1 => {
            let arg = args.into_iter().next().expect("len checked");
            Expr::Convert {
                ty: TypeExpr::Named("float32".to_owned()),
                arg: Box::new(wrap_reads(arg, ctx, conv)),
            }
        }
        Expr::Call { target, type_args, args } => {
            let target = match target {
                CallTarget::Method { recv, name } => CallTarget::Method {
                    recv: Box::new(wrap_reads(*recv, ctx, conv)),
                    name,
                },
                other => other,
            };
            Expr::Call {
                target,
                type_args,
                args: args.into_iter().map(|a| wrap_reads(a, ctx, conv)).collect(),
            }
        }
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(wrap_reads(*left, ctx, conv)),
            right: Box::new(wrap_reads(*right, ctx, conv)),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(wrap_reads(*operand, ctx, conv)),
        },
        Expr::Paren(inner) => Expr::Paren(Box::new(wrap_reads(*inner, ctx, conv))),
        Expr::SliceExpr { object, low, high } => Expr::SliceExpr {
            // Slices feed vector loads; only the bounds are scalar reads.
            object,
            low: low.map(|l| Box::new(wrap_reads(*l, ctx, conv))),
            high: high.map(|h| Box::new(wrap_reads(*h, ctx, conv))),
        },
        Expr::Selector { object, field } => Expr::Selector {
            object: Box::new(wrap_reads(*object, ctx, conv)),
            field,
        },
        Expr::Make { ty, len } => Expr::Make {
            ty,
            len: Box::new(wrap_reads(*len, ctx, conv)),
        },
        Expr::Convert { ty, arg } => Expr::Convert {
            ty,
            arg: Box::new(wrap_reads(*arg, ctx, conv)),
        },
        other @ (Expr::Lit(_) | Expr::Name(_)) => other,
    };
    ExprLoc::new(position, rebuilt)
}
