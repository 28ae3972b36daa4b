//! Tail inlining: a scalar cleanup loop after the vectorized main loop.
//!
//! When a function's main loop strides by the lane count, the trip count may
//! not divide evenly. The pass restructures the loop so the iterator
//! survives it, bounds the main loop at `i + stride <= n`, and appends a
//! scalar remainder loop derived from the pristine generic body via the
//! scalarizer. If the body cannot be scalarized the loop is left untouched.

use crate::{
    ast::{BinOp, Expr, ExprLoc, Stmt},
    parse::ParsedFunc,
    transform::{Ctx, int_lit, scalarize},
};

pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) {
    if func.loop_info.is_none() {
        return;
    }
    let Some(generic_body) = ctx.generic_loop_body.clone() else {
        return;
    };
    // Reduction-style loops carry a vector accumulator across iterations; a
    // scalar remainder loop cannot continue that accumulation, so such
    // loops keep their original shape.
    let accumulates = generic_body.iter().any(|s| {
        matches!(s, Stmt::Assign { target, .. } | Stmt::OpAssign { target, .. }
            if matches!(target.expr, Expr::Name(_)))
    });
    if accumulates {
        return;
    }
    let Some(mut tail_body) = scalarize::scalarize_stmts(&generic_body, ctx) else {
        return;
    };
    // Vector-typed broadcast locals from the function scope become their
    // scalar literal inside the tail.
    if !ctx.broadcast_locals.is_empty() {
        let locals = ctx.broadcast_locals.clone();
        for stmt in &mut tail_body {
            stmt.walk_exprs_mut(&mut |e| {
                if let Expr::Name(n) = e
                    && let Some(lit) = locals.get(n.as_str())
                {
                    *e = Expr::Lit(lit.clone());
                }
            });
        }
    }

    // Conditional selection may have shifted statement indices; find the
    // main loop by shape instead.
    let loop_idx = func.body.iter().position(
        |s| matches!(s, Stmt::For { init, cond, post, .. } if init.is_some() && cond.is_some() && post.is_some()),
    );
    let Some(loop_idx) = loop_idx else { return };

    let Stmt::For {
        init, cond, post, position, ..
    } = &mut func.body[loop_idx]
    else {
        return;
    };
    let position = *position;

    // All guards first; the loop is only restructured once the whole tail
    // shape is known to work out.
    let iter_name = match init.as_deref() {
        Some(Stmt::ShortDecl { name, .. }) => name.clone(),
        Some(Stmt::Assign { target, .. }) => match &target.expr {
            Expr::Name(n) => n.clone(),
            _ => return,
        },
        _ => return,
    };
    let Some(tail_cond) = cond.clone() else { return };
    let stride = match post.as_deref() {
        Some(Stmt::OpAssign { op: BinOp::Add, value, .. }) => value.clone(),
        _ => return,
    };

    // Hoist `i := start` out of the loop so the tail sees the final index.
    let init_stmt = init.take().expect("checked above");

    // Original bound check becomes the tail condition; the main loop stops
    // while a full vector still fits.
    if let Some(cond_expr) = cond.as_mut()
        && let Expr::Binary { op, left, right } = &cond_expr.expr
        && matches!(op, BinOp::Lt | BinOp::Le)
    {
        let bounded = Expr::Binary {
            op: BinOp::Le,
            left: Box::new(ExprLoc::new(
                position,
                Expr::Binary {
                    op: BinOp::Add,
                    left: left.clone(),
                    right: Box::new(stride.clone()),
                },
            )),
            right: right.clone(),
        };
        cond_expr.expr = bounded;
    }

    let tail_loop = Stmt::For {
        init: None,
        cond: Some(tail_cond),
        post: Some(Box::new(Stmt::OpAssign {
            target: ExprLoc::new(position, Expr::Name(iter_name)),
            op: BinOp::Add,
            value: int_lit(1),
            position,
        })),
        body: tail_body,
        position,
    };

    func.body.insert(loop_idx, *init_stmt);
    func.body.insert(loop_idx + 2, tail_loop);
}
