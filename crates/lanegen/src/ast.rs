//! The typed statement/expression tree for base function bodies.
//!
//! The tree is an owned tagged sum, faithful to the source: the parser
//! builds it, every transformer pass rewrites it in place or by clone, and
//! the emitter prints it back out. Visiting is explicit throughout; nothing
//! here leans on a host-language parser.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::types::TypeExpr;

/// A source span in line/column terms (1-based lines).
///
/// Conditional directive blocks test statement containment by line, so the
/// range keeps both endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeRange {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl CodeRange {
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// A whole-line range, used by directive diagnostics.
    pub fn line(line: u32) -> Self {
        Self::new(line, 1, line, 1)
    }

    /// True when `line` falls inside this range.
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// A literal constant in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    /// Floats keep their source text so emitted code and hoisted-constant
    /// name tags reproduce the original spelling (`3.14`, not `3.140000`).
    Float {
        value: f64,
        text: String,
    },
    Str(String),
    Bool(bool),
}

impl Literal {
    /// Source rendering of the literal.
    ///
    /// Parsed floats reproduce their source spelling; synthesized floats
    /// fall back to the shortest round-trip form.
    pub fn render(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Float { value, text } => {
                if text.is_empty() {
                    ryu::Buffer::new().format(*value).to_owned()
                } else {
                    text.clone()
                }
            }
            Self::Str(s) => format!("{s:?}"),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Binary operators, in source spelling via strum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Rem,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum UnOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "^")]
    BitNot,
    #[strum(serialize = "&")]
    Addr,
    #[strum(serialize = "*")]
    Deref,
}

/// What a call resolves against syntactically.
///
/// The op rewriter keys off this split: bare calls are same-unit or core
/// intrinsics, qualified calls go through the import table, and method
/// calls are the post-rewrite form most targets use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallTarget {
    /// `Add(v, w)` — a bare identifier.
    Bare(String),
    /// `hwy.Add(v, w)` — qualified by an imported package alias.
    Qualified { pkg: String, name: String },
    /// `v.Add(w)` — a method on an arbitrary receiver expression.
    Method { recv: Box<ExprLoc>, name: String },
}

impl CallTarget {
    /// The unqualified op/function name.
    pub fn name(&self) -> &str {
        match self {
            Self::Bare(name) => name,
            Self::Qualified { name, .. } | Self::Method { name, .. } => name,
        }
    }
}

/// An expression with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprLoc {
    pub position: CodeRange,
    pub expr: Expr,
}

impl ExprLoc {
    pub fn new(position: CodeRange, expr: Expr) -> Self {
        Self { position, expr }
    }

    /// A position-less expression, for synthesized nodes.
    pub fn synth(expr: Expr) -> Self {
        Self {
            position: CodeRange::default(),
            expr,
        }
    }
}

/// An expression in a base function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Lit(Literal),
    Name(String),
    /// Field access without a call: `m.data`, `pkg.Table`.
    Selector { object: Box<ExprLoc>, field: String },
    /// Any call form, with optional explicit type arguments.
    Call {
        target: CallTarget,
        type_args: Vec<TypeExpr>,
        args: Vec<ExprLoc>,
    },
    Index {
        object: Box<ExprLoc>,
        index: Box<ExprLoc>,
    },
    /// Slice expression `x[low:high]`; either bound may be absent.
    SliceExpr {
        object: Box<ExprLoc>,
        low: Option<Box<ExprLoc>>,
        high: Option<Box<ExprLoc>>,
    },
    Binary {
        op: BinOp,
        left: Box<ExprLoc>,
        right: Box<ExprLoc>,
    },
    Unary {
        op: UnOp,
        operand: Box<ExprLoc>,
    },
    Paren(Box<ExprLoc>),
    /// `make([]T, n)` — the only builtin with a type operand we admit.
    Make { ty: TypeExpr, len: Box<ExprLoc> },
    /// A type conversion, e.g. `float32(x)` or `uint16(v)`.
    ///
    /// The parser produces this only for names it can read as types;
    /// anything else stays a `Call`.
    Convert { ty: TypeExpr, arg: Box<ExprLoc> },
}

impl Expr {
    /// Mutable postorder walk: children first, then the node itself, so a
    /// rewrite of the node sees already-rewritten children.
    pub fn walk_mut(&mut self, visit: &mut impl FnMut(&mut Expr)) {
        match self {
            Self::Lit(_) | Self::Name(_) => {}
            Self::Selector { object, .. } => object.expr.walk_mut(visit),
            Self::Call { target, args, .. } => {
                if let CallTarget::Method { recv, .. } = target {
                    recv.expr.walk_mut(visit);
                }
                for arg in args {
                    arg.expr.walk_mut(visit);
                }
            }
            Self::Index { object, index } => {
                object.expr.walk_mut(visit);
                index.expr.walk_mut(visit);
            }
            Self::SliceExpr { object, low, high } => {
                object.expr.walk_mut(visit);
                if let Some(low) = low {
                    low.expr.walk_mut(visit);
                }
                if let Some(high) = high {
                    high.expr.walk_mut(visit);
                }
            }
            Self::Binary { left, right, .. } => {
                left.expr.walk_mut(visit);
                right.expr.walk_mut(visit);
            }
            Self::Unary { operand, .. } => operand.expr.walk_mut(visit),
            Self::Paren(inner) => inner.expr.walk_mut(visit),
            Self::Make { len, .. } => len.expr.walk_mut(visit),
            Self::Convert { arg, .. } => arg.expr.walk_mut(visit),
        }
        visit(self);
    }

    /// Walks the expression tree, calling `visit` on every node (preorder).
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Self::Lit(_) | Self::Name(_) => {}
            Self::Selector { object, .. } => object.expr.walk(visit),
            Self::Call { target, args, .. } => {
                if let CallTarget::Method { recv, .. } = target {
                    recv.expr.walk(visit);
                }
                for arg in args {
                    arg.expr.walk(visit);
                }
            }
            Self::Index { object, index } => {
                object.expr.walk(visit);
                index.expr.walk(visit);
            }
            Self::SliceExpr { object, low, high } => {
                object.expr.walk(visit);
                if let Some(low) = low {
                    low.expr.walk(visit);
                }
                if let Some(high) = high {
                    high.expr.walk(visit);
                }
            }
            Self::Binary { left, right, .. } => {
                left.expr.walk(visit);
                right.expr.walk(visit);
            }
            Self::Unary { operand, .. } => operand.expr.walk(visit),
            Self::Paren(inner) => inner.expr.walk(visit),
            Self::Make { len, .. } => len.expr.walk(visit),
            Self::Convert { arg, .. } => arg.expr.walk(visit),
        }
    }
}

/// A statement in a base function body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `var x T` / `var x T = e`.
    VarDecl {
        name: String,
        ty: Option<TypeExpr>,
        value: Option<ExprLoc>,
        position: CodeRange,
    },
    /// `x := e` (single target).
    ShortDecl {
        name: String,
        value: ExprLoc,
        position: CodeRange,
    },
    Assign {
        target: ExprLoc,
        value: ExprLoc,
        position: CodeRange,
    },
    /// `x += e` and friends; `i++` is lowered here with a literal 1.
    OpAssign {
        target: ExprLoc,
        op: BinOp,
        value: ExprLoc,
        position: CodeRange,
    },
    If {
        cond: ExprLoc,
        body: Vec<Stmt>,
        or_else: Vec<Stmt>,
        position: CodeRange,
    },
    /// Three-clause `for init; cond; post { body }`; any clause may be absent.
    For {
        init: Option<Box<Stmt>>,
        cond: Option<ExprLoc>,
        post: Option<Box<Stmt>>,
        body: Vec<Stmt>,
        position: CodeRange,
    },
    Return {
        value: Option<ExprLoc>,
        position: CodeRange,
    },
    Expr(ExprLoc),
    Break { position: CodeRange },
    Continue { position: CodeRange },
}

impl Stmt {
    pub fn position(&self) -> CodeRange {
        match self {
            Self::VarDecl { position, .. }
            | Self::ShortDecl { position, .. }
            | Self::Assign { position, .. }
            | Self::OpAssign { position, .. }
            | Self::If { position, .. }
            | Self::For { position, .. }
            | Self::Return { position, .. }
            | Self::Break { position }
            | Self::Continue { position } => *position,
            Self::Expr(expr) => expr.position,
        }
    }

    /// Walks every expression in this statement (preorder, including
    /// nested statements).
    pub fn walk_exprs<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        match self {
            Self::VarDecl { value, .. } => {
                if let Some(value) = value {
                    value.expr.walk(visit);
                }
            }
            Self::ShortDecl { value, .. } => value.expr.walk(visit),
            Self::Assign { target, value, .. } | Self::OpAssign { target, value, .. } => {
                target.expr.walk(visit);
                value.expr.walk(visit);
            }
            Self::If { cond, body, or_else, .. } => {
                cond.expr.walk(visit);
                for stmt in body.iter().chain(or_else) {
                    stmt.walk_exprs(visit);
                }
            }
            Self::For {
                init, cond, post, body, ..
            } => {
                if let Some(init) = init {
                    init.walk_exprs(visit);
                }
                if let Some(cond) = cond {
                    cond.expr.walk(visit);
                }
                if let Some(post) = post {
                    post.walk_exprs(visit);
                }
                for stmt in body {
                    stmt.walk_exprs(visit);
                }
            }
            Self::Return { value, .. } => {
                if let Some(value) = value {
                    value.expr.walk(visit);
                }
            }
            Self::Expr(expr) => expr.expr.walk(visit),
            Self::Break { .. } | Self::Continue { .. } => {}
        }
    }

    /// Mutable variant of [`Stmt::walk_exprs`], postorder within each
    /// expression tree.
    pub fn walk_exprs_mut(&mut self, visit: &mut impl FnMut(&mut Expr)) {
        match self {
            Self::VarDecl { value, .. } => {
                if let Some(value) = value {
                    value.expr.walk_mut(visit);
                }
            }
            Self::ShortDecl { value, .. } => value.expr.walk_mut(visit),
            Self::Assign { target, value, .. } | Self::OpAssign { target, value, .. } => {
                target.expr.walk_mut(visit);
                value.expr.walk_mut(visit);
            }
            Self::If { cond, body, or_else, .. } => {
                cond.expr.walk_mut(visit);
                for stmt in body.iter_mut().chain(or_else) {
                    stmt.walk_exprs_mut(visit);
                }
            }
            Self::For {
                init, cond, post, body, ..
            } => {
                if let Some(init) = init {
                    init.walk_exprs_mut(visit);
                }
                if let Some(cond) = cond {
                    cond.expr.walk_mut(visit);
                }
                if let Some(post) = post {
                    post.walk_exprs_mut(visit);
                }
                for stmt in body {
                    stmt.walk_exprs_mut(visit);
                }
            }
            Self::Return { value, .. } => {
                if let Some(value) = value {
                    value.expr.walk_mut(visit);
                }
            }
            Self::Expr(expr) => expr.expr.walk_mut(visit),
            Self::Break { .. } | Self::Continue { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_visits_method_receivers() {
        let call = Expr::Call {
            target: CallTarget::Method {
                recv: Box::new(ExprLoc::synth(Expr::Name("v".to_owned()))),
                name: "Add".to_owned(),
            },
            type_args: vec![],
            args: vec![ExprLoc::synth(Expr::Name("w".to_owned()))],
        };
        let mut names = Vec::new();
        call.walk(&mut |e| {
            if let Expr::Name(n) = e {
                names.push(n.clone());
            }
        });
        assert_eq!(names, vec!["v".to_owned(), "w".to_owned()]);
    }

    #[test]
    fn float_literals_keep_source_text() {
        let lit = Literal::Float {
            value: 3.14,
            text: "3.14".to_owned(),
        };
        assert_eq!(lit.render(), "3.14");
    }
}
