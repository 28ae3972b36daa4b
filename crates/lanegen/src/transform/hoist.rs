//! Broadcast hoisting: loop-invariant splat constructions become unit-scope
//! constants.
//!
//! Any `asm.Broadcast*(literal)` left after op rewriting is invariant across
//! the vectorized loop, so it is lifted to a declaration named after the
//! function and the literal value (`BaseScale_3p14_f32`) and the call site
//! becomes a plain reference. Running the pass again finds no remaining
//! literal broadcasts, so hoisting is idempotent.

use indexmap::IndexMap;

use crate::{
    ast::{Expr, Literal},
    emit::render_expr,
    parse::ParsedFunc,
    transform::{Ctx, HoistedConst},
};

pub(crate) fn run(func: &mut ParsedFunc, ctx: &mut Ctx<'_>) {
    let mut hoists: IndexMap<String, HoistedConst> = IndexMap::new();
    let func_name = func.name.clone();
    let elem = ctx.elem;
    let target = ctx.target;
    let mut needs_core = false;

    for stmt in &mut func.body {
        stmt.walk_exprs_mut(&mut |e| {
            let Expr::Call { target: ct, args, .. } = e else {
                return;
            };
            let crate::ast::CallTarget::Qualified { pkg, name } = ct else {
                return;
            };
            if pkg != "asm" || !name.starts_with("Broadcast") || args.len() != 1 {
                return;
            }
            let Expr::Lit(lit) = &args[0].expr else {
                return;
            };
            let tag = value_tag(lit);
            let const_name = format!("{func_name}_{tag}{}", elem.suffix());
            if !hoists.contains_key(&const_name) {
                let init = if target.promoted_half && elem.is_half() {
                    // Promoted-storage targets hoist the 16-bit pattern.
                    needs_core = true;
                    let conv = if elem == crate::types::ElemType::F16 {
                        "Float32ToFloat16"
                    } else {
                        "Float32ToBFloat16"
                    };
                    let lanes = target.vec_width_bytes / 2;
                    format!("asm.BroadcastUint16x{lanes}(uint16(hwy.{conv}({})))", lit.render())
                } else {
                    render_expr(&crate::ast::ExprLoc::synth(e.clone()))
                };
                hoists.insert(
                    const_name.clone(),
                    HoistedConst {
                        name: const_name.clone(),
                        init,
                    },
                );
            }
            *e = Expr::Name(const_name);
        });
    }

    if needs_core {
        ctx.imports.core = true;
    }
    for (_, hoist) in hoists {
        if !ctx.hoisted.iter().any(|h| h.name == hoist.name) {
            ctx.hoisted.push(hoist);
        }
    }
}

/// A literal's identifier-safe value tag: `3.14` -> `3p14`, `-1` -> `m1`.
fn value_tag(lit: &Literal) -> String {
    let raw = lit.render();
    raw.chars()
        .map(|c| match c {
            '.' => 'p',
            '-' => 'm',
            '+' => 'q',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use ahash::{AHashMap, AHashSet};

    use super::*;
    use crate::{
        parse,
        target,
        transform::{Ctx, ImportNeeds, ops_rewrite},
        types::ElemType,
    };

    const SRC: &str = "package simd\n\nfunc BaseScale[T Floats](out []T, in []T) {\n\tn := len(in)\n\ty := Set(3.14)\n\tz := Set(3.14)\n\tfor i := 0; i < n; i += NumLanes() {\n\t\tv := Load(in[i:])\n\t\tStore(out[i:], Mul(Mul(v, y), z))\n\t}\n}\n";

    fn ctx(unit: &parse::ParseResult) -> Ctx<'_> {
        Ctx {
            target: target::get("avx2").expect("catalog"),
            elem: ElemType::F32,
            func_name: "BaseScale".to_owned(),
            unit,
            imports: ImportNeeds::default(),
            hoisted: Vec::new(),
            half_slices: AHashSet::new(),
            half_locals: AHashSet::new(),
            half_reducers: AHashSet::new(),
            generic_loop_body: None,
            broadcast_locals: AHashMap::new(),
        }
    }

    #[test]
    fn hoisting_twice_adds_nothing() {
        let unit = parse::parse_unit(SRC, "t.go").expect("parses");
        let mut func = unit.functions[0].clone();
        let mut c = ctx(&unit);
        crate::transform::specialize::run(&mut func, &mut c);
        ops_rewrite::run(&mut func, &mut c).expect("rewrites");

        run(&mut func, &mut c);
        assert_eq!(c.hoisted.len(), 1, "same value hoists once");
        assert_eq!(c.hoisted[0].name, "BaseScale_3p14_f32");
        let body_after_first = func.body.clone();

        run(&mut func, &mut c);
        assert_eq!(c.hoisted.len(), 1, "second run adds no declarations");
        assert_eq!(func.body, body_after_first, "second run leaves the body unchanged");
    }
}
