//! Generic specialization and conditional-block selection.
//!
//! Specialization substitutes every type parameter with the concrete element
//! type across the signature and body, replaces the opaque vector/mask/
//! predicate types with the target's concrete types, and redirects
//! type-specific constant references to the matching variant. Conditional
//! selection then drops statements whose directive block evaluates false for
//! this `(target, element)` pair.

use ahash::AHashSet;

use crate::{
    ast::{Expr, Stmt},
    parse::ParsedFunc,
    target::Target,
    transform::Ctx,
    types::{ElemType, TypeExpr},
};

pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) {
    let params: Vec<String> = func.type_params.iter().map(|tp| tp.name.clone()).collect();
    let elem = ctx.elem;
    let target = ctx.target;
    let unit = ctx.unit;

    for p in func.params.iter_mut().chain(func.returns.iter_mut()) {
        p.ty = concretize_ty(&p.ty, &params, elem, target);
        if is_half_slice(&p.ty, elem) {
            ctx.half_slices.insert(p.name.clone());
        }
    }

    let mut half_slices = std::mem::take(&mut ctx.half_slices);
    for stmt in &mut func.body {
        retype_stmt(stmt, &params, elem, target);
        stmt.walk_exprs_mut(&mut |e| {
            if let Expr::Name(name) = e
                && let Some(c) = unit.consts.get(name.as_str())
                && c.variants.contains(&elem)
            {
                *name = format!("{name}{}", elem.suffix());
            }
        });
        record_half_slice_decls(stmt, elem, &mut half_slices);
    }
    ctx.half_slices = half_slices;
}

/// Applies type-parameter substitution and opaque-type replacement to every
/// type expression a statement carries, recursively.
fn retype_stmt(stmt: &mut Stmt, params: &[String], elem: ElemType, target: &Target) {
    if let Stmt::VarDecl { ty: Some(ty), .. } = stmt {
        *ty = concretize_ty(ty, params, elem, target);
    }
    stmt.walk_exprs_mut(&mut |e| match e {
        Expr::Make { ty, .. } | Expr::Convert { ty, .. } => *ty = concretize_ty(ty, params, elem, target),
        Expr::Call { type_args, .. } => {
            for ty in type_args {
                *ty = concretize_ty(ty, params, elem, target);
            }
        }
        _ => {}
    });
    match stmt {
        Stmt::If { body, or_else, .. } => {
            for s in body.iter_mut().chain(or_else) {
                retype_stmt(s, params, elem, target);
            }
        }
        Stmt::For { init, post, body, .. } => {
            if let Some(init) = init {
                retype_stmt(init, params, elem, target);
            }
            if let Some(post) = post {
                retype_stmt(post, params, elem, target);
            }
            for s in body {
                retype_stmt(s, params, elem, target);
            }
        }
        _ => {}
    }
}

fn concretize_ty(ty: &TypeExpr, params: &[String], elem: ElemType, target: &Target) -> TypeExpr {
    let mut ty = ty.clone();
    for p in params {
        ty = ty.substitute(p, elem);
    }
    replace_opaque(&ty, target)
}

/// Replaces `Vec`/`Mask`/`Pred` constructors with the target's concrete
/// types; everything else is rebuilt structurally.
fn replace_opaque(ty: &TypeExpr, target: &Target) -> TypeExpr {
    match ty {
        TypeExpr::Vec(inner) => TypeExpr::Named(target.vec_type(elem_of(inner))),
        TypeExpr::Mask(inner) | TypeExpr::Pred(inner) => TypeExpr::Named(target.mask_type(elem_of(inner))),
        TypeExpr::Slice(inner) => TypeExpr::Slice(Box::new(replace_opaque(inner, target))),
        TypeExpr::Pointer(inner) => TypeExpr::Pointer(Box::new(replace_opaque(inner, target))),
        TypeExpr::Generic { name, args } => TypeExpr::Generic {
            name: name.clone(),
            args: args.iter().map(|a| replace_opaque(a, target)).collect(),
        },
        TypeExpr::Func { params, ret } => TypeExpr::Func {
            params: params.iter().map(|p| replace_opaque(p, target)).collect(),
            ret: ret.as_ref().map(|r| Box::new(replace_opaque(r, target))),
        },
        TypeExpr::Param(_) | TypeExpr::Elem(_) | TypeExpr::Named(_) => ty.clone(),
    }
}

/// Element type carried by an opaque constructor's argument. A stray
/// unsubstituted parameter defaults to f64; admission rules keep that from
/// reaching emission.
fn elem_of(inner: &TypeExpr) -> ElemType {
    match inner {
        TypeExpr::Elem(e) => *e,
        _ => ElemType::F64,
    }
}

fn is_half_slice(ty: &TypeExpr, elem: ElemType) -> bool {
    elem.is_half()
        && matches!(ty, TypeExpr::Slice(inner) if match &**inner {
            TypeExpr::Elem(e) => e.is_half(),
            TypeExpr::Named(n) => n == "hwy.Float16" || n == "hwy.BFloat16",
            _ => false,
        })
}

fn record_half_slice_decls(stmt: &Stmt, elem: ElemType, half_slices: &mut AHashSet<String>) {
    if !elem.is_half() {
        return;
    }
    match stmt {
        Stmt::ShortDecl { name, value, .. } => {
            if let Expr::Make { ty, .. } = &value.expr
                && matches!(ty, TypeExpr::Slice(inner) if matches!(**inner, TypeExpr::Elem(e) if e.is_half()))
            {
                half_slices.insert(name.clone());
            }
        }
        Stmt::If { body, or_else, .. } => {
            for s in body.iter().chain(or_else) {
                record_half_slice_decls(s, elem, half_slices);
            }
        }
        Stmt::For { body, .. } => {
            for s in body {
                record_half_slice_decls(s, elem, half_slices);
            }
        }
        _ => {}
    }
}

/// Drops statements ruled out by conditional directive blocks for this
/// `(target, element)` pair, recursively.
pub(crate) fn select_conditionals(func: &mut ParsedFunc, ctx: &Ctx<'_>) {
    if ctx.unit.blocks.is_empty() {
        return;
    }
    retain_stmts(&mut func.body, ctx);
}

fn retain_stmts(stmts: &mut Vec<Stmt>, ctx: &Ctx<'_>) {
    stmts.retain(|stmt| {
        let line = stmt.position().start_line;
        !ctx.unit.blocks.iter().any(|b| b.drops_line(line, ctx.target, ctx.elem))
    });
    for stmt in stmts {
        match stmt {
            Stmt::If { body, or_else, .. } => {
                retain_stmts(body, ctx);
                retain_stmts(or_else, ctx);
            }
            Stmt::For { body, .. } => retain_stmts(body, ctx),
            _ => {}
        }
    }
}
