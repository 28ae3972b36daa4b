//! Fallback scalarization: vector ops become scalar expressions.
//!
//! The scalarizer consults the static scalarization tables in [`crate::ops`]
//! and rewrites a generic body into one-element-at-a-time code: loads become
//! index reads, stores become index writes, reductions collapse to their
//! identity, and the vectorized loop steps by one. Any op outside the
//! tables triggers bail-out: the body is left generic and op rewriting
//! routes it through the generic fallback library instead.

use std::str::FromStr;

use crate::{
    ast::{BinOp, CallTarget, Expr, ExprLoc, Literal, Stmt},
    error::GenResult,
    ops::{Op, ScalarForm, scalar_form},
    parse::ParsedFunc,
    transform::{Ctx, ops_rewrite, qualified_call},
    types::ElemType,
};

/// Whole-function scalarization for the fallback target.
pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) -> GenResult<()> {
    match scalarize_stmts(&func.body, ctx) {
        Some(body) => {
            // Lane-strided loops already step by one here: the stride's
            // `NumLanes` call scalarized to the literal 1.
            func.body = body;
            Ok(())
        }
        None => {
            // Bail-out: keep the generic body and let op rewriting bind it
            // to the generic fallback library.
            ops_rewrite::run(func, ctx)
        }
    }
}

/// Scalarizes a statement list; `None` means bail-out.
pub(crate) fn scalarize_stmts(stmts: &[Stmt], ctx: &mut Ctx<'_>) -> Option<Vec<Stmt>> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        out.push(scalarize_stmt(stmt, ctx)?);
    }
    Some(out)
}

fn scalarize_stmt(stmt: &Stmt, ctx: &mut Ctx<'_>) -> Option<Stmt> {
    match stmt {
        // `Store(out[i:], v)` -> `out[i] = v`
        Stmt::Expr(expr) => {
            if let Expr::Call { target, args, .. } = &expr.expr
                && let Some(op) = call_op(target)
            {
                if op == Op::Store && args.len() == 2 {
                    let dst = slice_to_index(&args[0])?;
                    let value = scalarize_expr(&args[1], ctx)?;
                    return Some(Stmt::Assign {
                        target: dst,
                        value,
                        position: expr.position,
                    });
                }
                if op.is_memory() && op != Op::Load {
                    // Masked and compressing stores have no scalar form.
                    return None;
                }
            }
            Some(Stmt::Expr(scalarize_expr(expr, ctx)?))
        }
        Stmt::VarDecl {
            name,
            ty,
            value,
            position,
        } => Some(Stmt::VarDecl {
            name: name.clone(),
            ty: ty.clone(),
            value: match value {
                Some(v) => Some(scalarize_expr(v, ctx)?),
                None => None,
            },
            position: *position,
        }),
        Stmt::ShortDecl { name, value, position } => Some(Stmt::ShortDecl {
            name: name.clone(),
            value: scalarize_expr(value, ctx)?,
            position: *position,
        }),
        Stmt::Assign { target, value, position } => Some(Stmt::Assign {
            target: scalarize_expr(target, ctx)?,
            value: scalarize_expr(value, ctx)?,
            position: *position,
        }),
        Stmt::OpAssign {
            target,
            op,
            value,
            position,
        } => Some(Stmt::OpAssign {
            target: scalarize_expr(target, ctx)?,
            op: *op,
            value: scalarize_expr(value, ctx)?,
            position: *position,
        }),
        Stmt::If {
            cond,
            body,
            or_else,
            position,
        } => Some(Stmt::If {
            cond: scalarize_expr(cond, ctx)?,
            body: scalarize_stmts(body, ctx)?,
            or_else: scalarize_stmts(or_else, ctx)?,
            position: *position,
        }),
        Stmt::For {
            init,
            cond,
            post,
            body,
            position,
        } => Some(Stmt::For {
            init: match init {
                Some(s) => Some(Box::new(scalarize_stmt(s, ctx)?)),
                None => None,
            },
            cond: match cond {
                Some(c) => Some(scalarize_expr(c, ctx)?),
                None => None,
            },
            post: match post {
                Some(s) => Some(Box::new(scalarize_stmt(s, ctx)?)),
                None => None,
            },
            body: scalarize_stmts(body, ctx)?,
            position: *position,
        }),
        Stmt::Return { value, position } => Some(Stmt::Return {
            value: match value {
                Some(v) => Some(scalarize_expr(v, ctx)?),
                None => None,
            },
            position: *position,
        }),
        Stmt::Break { .. } | Stmt::Continue { .. } => Some(stmt.clone()),
    }
}

fn call_op(target: &CallTarget) -> Option<Op> {
    match target {
        CallTarget::Bare(name) => Op::recognize(name),
        CallTarget::Qualified { pkg, name } if pkg == "hwy" => Op::recognize(name),
        _ => None,
    }
}

fn scalarize_expr(expr: &ExprLoc, ctx: &mut Ctx<'_>) -> Option<ExprLoc> {
    let position = expr.position;
    let rebuilt = match &expr.expr {
        Expr::Call { target, args, type_args } => {
            if let Some(op) = call_op(target) {
                let args: Vec<ExprLoc> = args
                    .iter()
                    .map(|a| scalarize_expr(a, ctx))
                    .collect::<Option<Vec<_>>>()?;
                return scalar_call(op, args, position, ctx);
            }
            // Polymorphic helpers keep their call shape but get renamed the
            // same way the op rewriter renames them.
            let mut args2 = Vec::with_capacity(args.len());
            for a in args {
                args2.push(scalarize_expr(a, ctx)?);
            }
            match target {
                CallTarget::Qualified { pkg, name }
                    if matches!(pkg.as_str(), "vec" | "matvec" | "matmul" | "algo" | "image" | "bitpack" | "sort") =>
                {
                    let sub = ops_rewrite::contrib_static(pkg);
                    ctx.imports.add_contrib(sub);
                    Expr::Call {
                        target: CallTarget::Qualified {
                            pkg: ops_rewrite::contrib_alias(sub).to_owned(),
                            name: format!("{name}{}{}", ctx.elem.suffix(), ctx.target.suffix()),
                        },
                        type_args: Vec::new(),
                        args: args2,
                    }
                }
                CallTarget::Bare(name) if name.starts_with("Base") || name.starts_with("base") => Expr::Call {
                    target: CallTarget::Bare(format!("{name}{}{}", ctx.elem.suffix(), ctx.target.suffix())),
                    type_args: Vec::new(),
                    args: args2,
                },
                CallTarget::Method { recv, name } => Expr::Call {
                    target: CallTarget::Method {
                        recv: Box::new(scalarize_expr(recv, ctx)?),
                        name: name.clone(),
                    },
                    type_args: type_args.clone(),
                    args: args2,
                },
                other => Expr::Call {
                    target: other.clone(),
                    type_args: type_args.clone(),
                    args: args2,
                },
            }
        }
        Expr::Binary { op, left, right } => Expr::Binary {
            op: *op,
            left: Box::new(scalarize_expr(left, ctx)?),
            right: Box::new(scalarize_expr(right, ctx)?),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op: *op,
            operand: Box::new(scalarize_expr(operand, ctx)?),
        },
        Expr::Paren(inner) => Expr::Paren(Box::new(scalarize_expr(inner, ctx)?)),
        Expr::Index { object, index } => Expr::Index {
            object: Box::new(scalarize_expr(object, ctx)?),
            index: Box::new(scalarize_expr(index, ctx)?),
        },
        Expr::SliceExpr { object, low, high } => Expr::SliceExpr {
            object: Box::new(scalarize_expr(object, ctx)?),
            low: match low {
                Some(l) => Some(Box::new(scalarize_expr(l, ctx)?)),
                None => None,
            },
            high: match high {
                Some(h) => Some(Box::new(scalarize_expr(h, ctx)?)),
                None => None,
            },
        },
        Expr::Selector { object, field } => Expr::Selector {
            object: Box::new(scalarize_expr(object, ctx)?),
            field: field.clone(),
        },
        Expr::Make { ty, len } => Expr::Make {
            ty: ty.clone(),
            len: Box::new(scalarize_expr(len, ctx)?),
        },
        Expr::Convert { ty, arg } => Expr::Convert {
            ty: ty.clone(),
            arg: Box::new(scalarize_expr(arg, ctx)?),
        },
        Expr::Lit(_) | Expr::Name(_) => expr.expr.clone(),
    };
    Some(ExprLoc::new(position, rebuilt))
}

/// Rewrites one recognized op call into its scalar form, or bails.
fn scalar_call(op: Op, mut args: Vec<ExprLoc>, position: crate::ast::CodeRange, ctx: &mut Ctx<'_>) -> Option<ExprLoc> {
    let form = scalar_form(op)?;
    let expr = match form {
        ScalarForm::Infix(sym) => {
            if args.len() != 2 {
                return None;
            }
            let right = args.pop().expect("len checked");
            let left = args.pop().expect("len checked");
            Expr::Binary {
                op: BinOp::from_str(sym).expect("table symbols are valid operators"),
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        ScalarForm::Builtin(name) => Expr::Call {
            target: CallTarget::Bare(name.to_owned()),
            type_args: Vec::new(),
            args,
        },
        ScalarForm::StdMath(name) => {
            let arg = args.into_iter().next()?;
            return Some(std_math_call(name, arg, position, ctx));
        }
        ScalarForm::FusedMulAdd => {
            if args.len() != 3 {
                return None;
            }
            let c = args.pop().expect("len checked");
            let b = args.pop().expect("len checked");
            let a = args.pop().expect("len checked");
            Expr::Binary {
                op: BinOp::Add,
                left: Box::new(ExprLoc::new(
                    position,
                    Expr::Binary {
                        op: BinOp::Mul,
                        left: Box::new(a),
                        right: Box::new(b),
                    },
                )),
                right: Box::new(c),
            }
        }
        ScalarForm::Identity | ScalarForm::Value => {
            let arg = args.into_iter().next()?;
            if op == Op::Load {
                return slice_to_index(&arg);
            }
            return Some(arg);
        }
        ScalarForm::One => Expr::Lit(Literal::Int(1)),
        ScalarForm::ZeroLiteral => Expr::Lit(Literal::Int(0)),
    };
    Some(ExprLoc::new(position, expr))
}

/// `math.Sqrt` and friends operate on float64; narrower elements convert in
/// and back out.
fn std_math_call(name: &str, arg: ExprLoc, position: crate::ast::CodeRange, ctx: &mut Ctx<'_>) -> ExprLoc {
    ctx.imports.stdmath = true;
    if ctx.elem == ElemType::F64 {
        return ExprLoc::new(position, qualified_call("math", name, vec![arg]).expr);
    }
    let widened = ExprLoc::new(
        position,
        Expr::Convert {
            ty: crate::types::TypeExpr::Named("float64".to_owned()),
            arg: Box::new(arg),
        },
    );
    let call = qualified_call("math", name, vec![widened]);
    ExprLoc::new(
        position,
        Expr::Convert {
            ty: crate::types::TypeExpr::Named("float32".to_owned()),
            arg: Box::new(call),
        },
    )
}

/// `x[i:]` -> `x[i]`; a bare slice name means element zero is intended.
fn slice_to_index(expr: &ExprLoc) -> Option<ExprLoc> {
    match &expr.expr {
        Expr::SliceExpr { object, low, .. } => {
            let index = match low {
                Some(low) => (**low).clone(),
                None => ExprLoc::new(expr.position, Expr::Lit(Literal::Int(0))),
            };
            Some(ExprLoc::new(
                expr.position,
                Expr::Index {
                    object: object.clone(),
                    index: Box::new(index),
                },
            ))
        }
        _ => Some(expr.clone()),
    }
}

