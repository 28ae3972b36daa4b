//! The emitter: transformed ASTs become a per-target output unit.
//!
//! A unit carries a generated-file line, the target's build predicate, the
//! package clause, an import set computed from the ops the functions
//! actually use, the hoisted broadcast constants, and the function bodies in
//! their original order. Rendering uses `fmt::Write` onto a single string.

use std::fmt::Write;

use crate::{
    ast::{Expr, ExprLoc, Stmt},
    target::Target,
    transform::{ImportNeeds, TransformedFunc, ops_rewrite::contrib_alias},
    types::TypeExpr,
};

/// File name of a per-target unit: `<base>_<target>.gen`.
pub fn unit_file_name(base: &str, target: &Target) -> String {
    format!("{base}_{}.gen", target.name)
}

/// Renders one output unit for a target.
pub fn emit_unit(target: &Target, package: &str, module: &str, funcs: &[TransformedFunc]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// Code generated by lanegen. DO NOT EDIT.");
    let _ = writeln!(out);
    if !target.build_tag.is_empty() {
        let _ = writeln!(out, "//go:build {}", target.build_tag);
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "package {package}");
    let _ = writeln!(out);

    let mut needs = ImportNeeds::default();
    for f in funcs {
        needs.merge(&f.imports);
    }
    write_imports(&mut out, &needs, target, module);

    // Hoisted constants, first-use order, deduplicated across functions.
    let mut seen = Vec::new();
    for f in funcs {
        for h in &f.hoisted {
            if !seen.contains(&h.name) {
                let _ = writeln!(out, "var {} = {}", h.name, h.init);
                seen.push(h.name.clone());
            }
        }
    }
    if !seen.is_empty() {
        let _ = writeln!(out);
    }

    for (i, f) in funcs.iter().enumerate() {
        if i > 0 {
            let _ = writeln!(out);
        }
        write_func(&mut out, f);
    }
    out
}

fn write_imports(out: &mut String, needs: &ImportNeeds, target: &Target, module: &str) {
    let mut lines: Vec<String> = Vec::new();
    if needs.stdmath {
        lines.push("\"math\"".to_owned());
    }
    if needs.core {
        lines.push(format!("hwy \"{module}/hwy\""));
    }
    if needs.asm {
        lines.push(format!("asm \"{module}/asm/{}\"", target.asm_pkg()));
    }
    if needs.fallback {
        lines.push(format!("fb \"{module}/fb\""));
    }
    for sub in &needs.contrib {
        lines.push(format!("{} \"{module}/contrib/{sub}\"", contrib_alias(sub)));
    }
    match lines.len() {
        0 => {}
        1 => {
            let _ = writeln!(out, "import {}", lines[0]);
            let _ = writeln!(out);
        }
        _ => {
            let _ = writeln!(out, "import (");
            for line in lines {
                let _ = writeln!(out, "\t{line}");
            }
            let _ = writeln!(out, ")");
            let _ = writeln!(out);
        }
    }
}

fn write_func(out: &mut String, f: &TransformedFunc) {
    let params = f
        .params
        .iter()
        .map(|p| format!("{} {}", p.name, render_type(&p.ty)))
        .collect::<Vec<_>>()
        .join(", ");
    let returns = match f.returns.len() {
        0 => String::new(),
        1 => format!(" {}", render_type(&f.returns[0].ty)),
        _ => format!(
            " ({})",
            f.returns.iter().map(|r| render_type(&r.ty)).collect::<Vec<_>>().join(", ")
        ),
    };
    let _ = writeln!(out, "func {}({params}){returns} {{", f.name);
    let mut unroll = f.unroll_hint;
    for stmt in &f.body {
        write_stmt(out, stmt, 1, &mut unroll);
    }
    let _ = writeln!(out, "}}");
}

fn indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push('\t');
    }
}

fn write_stmt(out: &mut String, stmt: &Stmt, level: usize, unroll: &mut u32) {
    match stmt {
        Stmt::VarDecl { name, ty, value, .. } => {
            indent(out, level);
            match (ty, value) {
                (Some(ty), Some(value)) => {
                    let _ = writeln!(out, "var {name} {} = {}", render_type(ty), render_expr(value));
                }
                (Some(ty), None) => {
                    let _ = writeln!(out, "var {name} {}", render_type(ty));
                }
                (None, Some(value)) => {
                    let _ = writeln!(out, "var {name} = {}", render_expr(value));
                }
                (None, None) => {
                    let _ = writeln!(out, "var {name}");
                }
            }
        }
        Stmt::ShortDecl { name, value, .. } => {
            indent(out, level);
            let _ = writeln!(out, "{name} := {}", render_expr(value));
        }
        Stmt::Assign { target, value, .. } => {
            indent(out, level);
            let _ = writeln!(out, "{} = {}", render_expr(target), render_expr(value));
        }
        Stmt::OpAssign { target, op, value, .. } => {
            indent(out, level);
            let _ = writeln!(out, "{} {op}= {}", render_expr(target), render_expr(value));
        }
        Stmt::If { cond, body, or_else, .. } => {
            indent(out, level);
            let _ = writeln!(out, "if {} {{", render_expr(cond));
            for s in body {
                write_stmt(out, s, level + 1, unroll);
            }
            if or_else.is_empty() {
                indent(out, level);
                let _ = writeln!(out, "}}");
            } else {
                indent(out, level);
                let _ = writeln!(out, "}} else {{");
                for s in or_else {
                    write_stmt(out, s, level + 1, unroll);
                }
                indent(out, level);
                let _ = writeln!(out, "}}");
            }
        }
        Stmt::For {
            init, cond, post, body, ..
        } => {
            // The first emitted loop keeps the unroll hint as a comment so
            // downstream tooling sees it.
            if *unroll > 0 {
                indent(out, level);
                let _ = writeln!(out, "//gen:unroll {unroll}");
                *unroll = 0;
            }
            indent(out, level);
            match (init, cond, post) {
                (None, None, None) => {
                    let _ = writeln!(out, "for {{");
                }
                (None, Some(cond), None) => {
                    let _ = writeln!(out, "for {} {{", render_expr(cond));
                }
                _ => {
                    let init_s = init.as_ref().map(|s| render_simple_stmt(s)).unwrap_or_default();
                    let cond_s = cond.as_ref().map(render_expr).unwrap_or_default();
                    let post_s = post.as_ref().map(|s| render_simple_stmt(s)).unwrap_or_default();
                    let _ = writeln!(out, "for {init_s}; {cond_s}; {post_s} {{");
                }
            }
            for s in body {
                write_stmt(out, s, level + 1, unroll);
            }
            indent(out, level);
            let _ = writeln!(out, "}}");
        }
        Stmt::Return { value, .. } => {
            indent(out, level);
            match value {
                Some(value) => {
                    let _ = writeln!(out, "return {}", render_expr(value));
                }
                None => {
                    let _ = writeln!(out, "return");
                }
            }
        }
        Stmt::Expr(expr) => {
            indent(out, level);
            let _ = writeln!(out, "{}", render_expr(expr));
        }
        Stmt::Break { .. } => {
            indent(out, level);
            let _ = writeln!(out, "break");
        }
        Stmt::Continue { .. } => {
            indent(out, level);
            let _ = writeln!(out, "continue");
        }
    }
}

/// Single-line statement rendering for `for` clauses.
pub fn render_simple_stmt(stmt: &Stmt) -> String {
    match stmt {
        Stmt::ShortDecl { name, value, .. } => format!("{name} := {}", render_expr(value)),
        Stmt::Assign { target, value, .. } => format!("{} = {}", render_expr(target), render_expr(value)),
        Stmt::OpAssign { target, op, value, .. } => {
            format!("{} {op}= {}", render_expr(target), render_expr(value))
        }
        Stmt::Expr(expr) => render_expr(expr),
        _ => String::new(),
    }
}

/// Renders an expression in source syntax.
pub fn render_expr(expr: &ExprLoc) -> String {
    match &expr.expr {
        Expr::Lit(lit) => lit.render(),
        Expr::Name(name) => name.clone(),
        Expr::Selector { object, field } => format!("{}.{field}", render_expr(object)),
        Expr::Call { target, type_args, args } => {
            let callee = match target {
                crate::ast::CallTarget::Bare(name) => name.clone(),
                crate::ast::CallTarget::Qualified { pkg, name } => format!("{pkg}.{name}"),
                crate::ast::CallTarget::Method { recv, name } => format!("{}.{name}", render_expr(recv)),
            };
            let targs = if type_args.is_empty() {
                String::new()
            } else {
                format!(
                    "[{}]",
                    type_args.iter().map(render_type).collect::<Vec<_>>().join(", ")
                )
            };
            let args = args.iter().map(render_expr).collect::<Vec<_>>().join(", ");
            format!("{callee}{targs}({args})")
        }
        Expr::Index { object, index } => format!("{}[{}]", render_expr(object), render_expr(index)),
        Expr::SliceExpr { object, low, high } => {
            let low = low.as_ref().map(|l| render_expr(l)).unwrap_or_default();
            let high = high.as_ref().map(|h| render_expr(h)).unwrap_or_default();
            format!("{}[{low}:{high}]", render_expr(object))
        }
        Expr::Binary { op, left, right } => {
            format!("{} {op} {}", render_expr(left), render_expr(right))
        }
        Expr::Unary { op, operand } => format!("{op}{}", render_expr(operand)),
        Expr::Paren(inner) => format!("({})", render_expr(inner)),
        Expr::Make { ty, len } => format!("make({}, {})", render_type(ty), render_expr(len)),
        Expr::Convert { ty, arg } => format!("{}({})", render_type(ty), render_expr(arg)),
    }
}

/// Renders a type expression in source syntax.
pub fn render_type(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Vec(inner) => format!("hwy.Vec[{}]", render_type(inner)),
        TypeExpr::Mask(inner) => format!("hwy.Mask[{}]", render_type(inner)),
        TypeExpr::Pred(inner) => format!("hwy.Pred[{}]", render_type(inner)),
        TypeExpr::Slice(inner) => format!("[]{}", render_type(inner)),
        TypeExpr::Pointer(inner) => format!("*{}", render_type(inner)),
        TypeExpr::Generic { name, args } => {
            format!("{name}[{}]", args.iter().map(render_type).collect::<Vec<_>>().join(", "))
        }
        TypeExpr::Param(name) | TypeExpr::Named(name) => name.clone(),
        TypeExpr::Elem(elem) => elem.scalar_name().to_owned(),
        TypeExpr::Func { params, ret } => {
            let params = params.iter().map(render_type).collect::<Vec<_>>().join(", ");
            match ret {
                Some(ret) => format!("func({params}) {}", render_type(ret)),
                None => format!("func({params})"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CallTarget, Literal};

    #[test]
    fn method_chains_render_in_order() {
        let x = ExprLoc::synth(Expr::Name("x".to_owned()));
        let call = ExprLoc::synth(Expr::Call {
            target: CallTarget::Method {
                recv: Box::new(x),
                name: "Add".to_owned(),
            },
            type_args: vec![],
            args: vec![ExprLoc::synth(Expr::Name("y".to_owned()))],
        });
        assert_eq!(render_expr(&call), "x.Add(y)");
    }

    #[test]
    fn slice_expr_renders_open_bounds() {
        let e = ExprLoc::synth(Expr::SliceExpr {
            object: Box::new(ExprLoc::synth(Expr::Name("xs".to_owned()))),
            low: Some(Box::new(ExprLoc::synth(Expr::Name("i".to_owned())))),
            high: None,
        });
        assert_eq!(render_expr(&e), "xs[i:]");
    }

    #[test]
    fn float_literal_text_survives_rendering() {
        let e = ExprLoc::synth(Expr::Lit(Literal::Float {
            value: 3.14,
            text: "3.14".to_owned(),
        }));
        assert_eq!(render_expr(&e), "3.14");
    }
}
