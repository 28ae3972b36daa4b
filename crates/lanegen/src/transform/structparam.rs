//! Struct-pointer parameter adaptation.
//!
//! A parameter of type `*Matrix[T]` cannot cross the specialization
//! boundary as-is; the accessor surface the body actually uses is
//! discovered by scanning it. Zero-argument methods become scalar fields of
//! long type, one-argument methods become a data pointer plus stride. The
//! parameter is replaced by the unified field set and every accessor call
//! is rewritten to field form.

use indexmap::IndexMap;

use crate::{
    ast::{BinOp, CallTarget, Expr, ExprLoc},
    parse::{Param, ParsedFunc},
    transform::Ctx,
    types::TypeExpr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accessor {
    /// Zero-arg method: a scalar field.
    Scalar,
    /// One-arg method: data pointer + stride addressing.
    Indexed,
}

pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) {
    let struct_params: Vec<(usize, String, TypeExpr)> = func
        .params
        .iter()
        .enumerate()
        .filter_map(|(i, p)| match &p.ty {
            TypeExpr::Pointer(inner) => match inner.as_ref() {
                TypeExpr::Generic { args, .. } => {
                    let elem_ty = args.first().cloned().unwrap_or(TypeExpr::Elem(ctx.elem));
                    Some((i, p.name.clone(), elem_ty))
                }
                _ => None,
            },
            _ => None,
        })
        .collect();
    if struct_params.is_empty() {
        return;
    }

    for (index, name, elem_ty) in struct_params.into_iter().rev() {
        // Discovery: which accessors does the body actually call?
        let mut accessors: IndexMap<String, Accessor> = IndexMap::new();
        for stmt in &func.body {
            stmt.walk_exprs(&mut |e| {
                if let Expr::Call { target: CallTarget::Method { recv, name: m }, args, .. } = e
                    && matches!(&recv.expr, Expr::Name(n) if *n == name)
                {
                    let kind = if args.is_empty() { Accessor::Scalar } else { Accessor::Indexed };
                    accessors.entry(m.clone()).or_insert(kind);
                }
            });
        }
        if accessors.is_empty() {
            continue;
        }
        let has_indexed = accessors.values().any(|a| *a == Accessor::Indexed);

        // Rewrite accessor calls to field form.
        let data_field = format!("{name}Data");
        let stride_field = format!("{name}Stride");
        for stmt in &mut func.body {
            stmt.walk_exprs_mut(&mut |e| {
                let Expr::Call { target: CallTarget::Method { recv, name: m }, args, .. } = e else {
                    return;
                };
                if !matches!(&recv.expr, Expr::Name(n) if *n == name) {
                    return;
                }
                let Some(kind) = accessors.get(m.as_str()) else { return };
                match kind {
                    Accessor::Scalar => {
                        *e = Expr::Name(format!("{name}{m}"));
                    }
                    Accessor::Indexed => {
                        if args.is_empty() {
                            return;
                        }
                        let idx = args.remove(0);
                        let offset = ExprLoc::new(
                            idx.position,
                            Expr::Binary {
                                op: BinOp::Mul,
                                left: Box::new(idx),
                                right: Box::new(ExprLoc::synth(Expr::Name(stride_field.clone()))),
                            },
                        );
                        *e = Expr::SliceExpr {
                            object: Box::new(ExprLoc::synth(Expr::Name(data_field.clone()))),
                            low: Some(Box::new(offset)),
                            high: None,
                        };
                    }
                }
            });
        }

        // Signature: replace the struct pointer with the unified field set.
        let mut fields = Vec::new();
        if has_indexed {
            fields.push(Param {
                name: data_field,
                ty: TypeExpr::Slice(Box::new(elem_ty.clone())),
            });
            fields.push(Param {
                name: stride_field,
                ty: TypeExpr::Named("int64".to_owned()),
            });
        }
        for (m, kind) in &accessors {
            if *kind == Accessor::Scalar {
                fields.push(Param {
                    name: format!("{name}{m}"),
                    ty: TypeExpr::Named("int64".to_owned()),
                });
            }
        }
        func.params.splice(index..=index, fields);
    }
}
