//! The per-`(function, target, element type)` transformer.
//!
//! One call to [`transform`] runs the ordered pass list over a clone of the
//! parsed function: generic specialization, conditional-block selection, op
//! rewriting, broadcast hoisting, tail inlining, half-precision lowering,
//! fallback scalarization, and struct-pointer adaptation. The output is a
//! concrete function AST plus its hoisted constants and import needs.

pub mod halfprec;
pub mod hoist;
pub mod ops_rewrite;
pub mod scalarize;
pub mod specialize;
pub mod structparam;
pub mod tail;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    ast::{CallTarget, Expr, ExprLoc, Stmt},
    error::GenResult,
    parse::{Param, ParseResult, ParsedFunc},
    target::Target,
    tracer::GenTracer,
    types::ElemType,
};

/// A broadcast constant lifted to unit scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoistedConst {
    pub name: String,
    /// Rendered initializer, e.g. `asm.BroadcastFloat32x8(3.14)`.
    pub init: String,
}

/// Which packages the emitted unit must import for one function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportNeeds {
    /// Core library (`hwy`).
    pub core: bool,
    /// The per-target vector package (`asm/<target>`).
    pub asm: bool,
    /// Standard math, for scalar helpers that survive transformation.
    pub stdmath: bool,
    /// The generic scalar fallback library.
    pub fallback: bool,
    /// Contrib subpackages, sorted and deduplicated.
    pub contrib: Vec<&'static str>,
}

impl ImportNeeds {
    pub fn add_contrib(&mut self, sub: &'static str) {
        if let Err(pos) = self.contrib.binary_search(&sub) {
            self.contrib.insert(pos, sub);
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.core |= other.core;
        self.asm |= other.asm;
        self.stdmath |= other.stdmath;
        self.fallback |= other.fallback;
        for &sub in &other.contrib {
            self.add_contrib(sub);
        }
    }
}

/// A fully transformed function ready for emission.
#[derive(Debug, Clone)]
pub struct TransformedFunc {
    /// Specialized symbol, e.g. `BaseAddVec_f32_avx2`.
    pub name: String,
    pub base_name: String,
    pub target: &'static Target,
    /// `None` for functions without type parameters.
    pub elem: Option<ElemType>,
    pub params: Vec<Param>,
    pub returns: Vec<Param>,
    pub body: Vec<Stmt>,
    pub hoisted: Vec<HoistedConst>,
    pub imports: ImportNeeds,
    pub unroll_hint: u32,
    /// Excluded from dispatch when the signature mentions the opaque vector
    /// type (its concrete form differs per target).
    pub dispatchable: bool,
    pub exported: bool,
}

/// Mutable state threaded through the passes.
pub(crate) struct Ctx<'a> {
    pub target: &'static Target,
    pub elem: ElemType,
    pub func_name: String,
    pub unit: &'a ParseResult,
    pub imports: ImportNeeds,
    pub hoisted: Vec<HoistedConst>,
    /// Slices of half-precision elements, by name.
    pub half_slices: AHashSet<String>,
    /// Locals retyped from half to single precision.
    pub half_locals: AHashSet<String>,
    /// Reduction outputs already wrapped once.
    pub half_reducers: AHashSet<String>,
    /// Pristine copy of the main loop body, taken before op rewriting, used
    /// by tail synthesis and fallback scalarization.
    pub generic_loop_body: Option<Vec<Stmt>>,
    /// Function-level locals bound to broadcast constructions; the scalar
    /// tail substitutes their literal value.
    pub broadcast_locals: ahash::AHashMap<String, crate::ast::Literal>,
}

/// Computes the specialized symbol for a function on a target.
pub fn symbol_name(base: &str, elem: Option<ElemType>, target: &Target) -> String {
    match elem {
        Some(elem) => format!("{base}{}{}", elem.suffix(), target.suffix()),
        None => format!("{base}{}", target.suffix()),
    }
}

/// Runs the ordered pass list for one `(function, target, element)` triple.
///
/// `elem` is `None` for functions without type parameters; such functions
/// are still retyped and op-rewritten (their bodies may use concrete-typed
/// ops), with `f64` standing in wherever a pass needs an element type.
pub fn transform(
    func: &ParsedFunc,
    unit: &ParseResult,
    target: &'static Target,
    elem: Option<ElemType>,
    tracer: &mut dyn GenTracer,
) -> GenResult<TransformedFunc> {
    let effective_elem = elem.unwrap_or(ElemType::F64);
    let mut ctx = Ctx {
        target,
        elem: effective_elem,
        func_name: func.name.clone(),
        unit,
        imports: ImportNeeds::default(),
        hoisted: Vec::new(),
        half_slices: AHashSet::new(),
        half_locals: AHashSet::new(),
        half_reducers: AHashSet::new(),
        generic_loop_body: None,
        broadcast_locals: ahash::AHashMap::new(),
    };
    let mut work = func.clone();

    let pass = |name: &str, tracer: &mut dyn GenTracer| {
        tracer.on_pass(&work_name(func, elem, target), target.name, name);
    };

    specialize::run(&mut work, &mut ctx);
    pass("specialize", tracer);

    specialize::select_conditionals(&mut work, &ctx);
    pass("conditional-select", tracer);

    // Keep a pristine copy of the vectorized loop body before the ops are
    // renamed; tail synthesis and the fallback scalarizer both work from
    // generic ops. Conditional selection may have shifted statement
    // indices, so the loop is located by shape.
    if work.loop_info.is_some() {
        ctx.generic_loop_body = work.body.iter().find_map(|s| match s {
            Stmt::For {
                init: Some(_),
                cond: Some(_),
                post: Some(_),
                body,
                ..
            } => Some(body.clone()),
            _ => None,
        });
    }

    // Function-level broadcast bindings (`y := Set(3.14)`) are vector-typed;
    // the scalar tail needs their literal value instead.
    for stmt in &work.body {
        let (Stmt::ShortDecl { name, value, .. }
        | Stmt::VarDecl {
            name,
            value: Some(value),
            ..
        }) = stmt
        else {
            continue;
        };
        if let Expr::Call { target: ct, args, .. } = &value.expr {
            match ct.name() {
                "Set" if args.len() == 1 => {
                    if let Expr::Lit(lit) = &args[0].expr {
                        ctx.broadcast_locals.insert(name.clone(), lit.clone());
                    }
                }
                "Zero" => {
                    ctx.broadcast_locals.insert(name.clone(), crate::ast::Literal::Int(0));
                }
                _ => {}
            }
        }
    }

    if target.scalar {
        scalarize::run(&mut work, &mut ctx)?;
        pass("scalarize", tracer);
    } else {
        ops_rewrite::run(&mut work, &mut ctx)?;
        pass("op-rewrite", tracer);

        hoist::run(&mut work, &mut ctx);
        pass("hoist", tracer);

        tail::run(&mut work, &mut ctx);
        pass("tail", tracer);
    }

    if effective_elem.is_half() && elem.is_some() {
        halfprec::run(&mut work, &mut ctx);
        pass("half-lower", tracer);
    }

    structparam::run(&mut work, &mut ctx);
    pass("struct-param", tracer);

    let dispatchable = !func.signature_mentions_vector();
    Ok(TransformedFunc {
        name: symbol_name(&func.name, elem, target),
        base_name: func.name.clone(),
        target,
        elem,
        params: work.params,
        returns: work.returns,
        body: work.body,
        hoisted: ctx.hoisted,
        imports: ctx.imports,
        unroll_hint: func.unroll_hint,
        dispatchable,
        exported: func.exported,
    })
}

fn work_name(func: &ParsedFunc, elem: Option<ElemType>, target: &Target) -> String {
    symbol_name(&func.name, elem, target)
}

// ----------------------------------------------------------------------
// Shared expression builders for synthesized code
// ----------------------------------------------------------------------

pub(crate) fn name_expr(name: impl Into<String>) -> ExprLoc {
    ExprLoc::synth(Expr::Name(name.into()))
}

pub(crate) fn qualified_call(pkg: impl Into<String>, name: impl Into<String>, args: Vec<ExprLoc>) -> ExprLoc {
    ExprLoc::synth(Expr::Call {
        target: CallTarget::Qualified {
            pkg: pkg.into(),
            name: name.into(),
        },
        type_args: Vec::new(),
        args,
    })
}

pub(crate) fn method_call(recv: ExprLoc, name: impl Into<String>, args: Vec<ExprLoc>) -> ExprLoc {
    ExprLoc::synth(Expr::Call {
        target: CallTarget::Method {
            recv: Box::new(recv),
            name: name.into(),
        },
        type_args: Vec::new(),
        args,
    })
}

pub(crate) fn int_lit(v: i64) -> ExprLoc {
    ExprLoc::synth(Expr::Lit(crate::ast::Literal::Int(v)))
}
