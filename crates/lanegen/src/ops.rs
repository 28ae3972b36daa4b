//! The abstract op universe.
//!
//! Base functions call into a fixed library of vector intrinsics. Each op is
//! a variant here; target op tables map variants to concrete symbols, and
//! the fallback scalarizer consults the static scalarization tables at the
//! bottom of this module. Ops are matched by their exact source spelling via
//! the strum `EnumString` derive.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// An abstract vector op recognized in base function bodies.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    MulAdd,
    Sqrt,
    Abs,
    Neg,

    // Construction
    Zero,
    Set,
    Iota,

    // Memory
    Load,
    Store,
    MaskedLoad,
    MaskedStore,

    // Reductions
    ReduceSum,
    ReduceMin,
    ReduceMax,

    // Lane queries
    NumLanes,
    MaxLanes,
    Lanes,

    // Comparisons (vector -> mask)
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Masks
    MaskAnd,
    MaskOr,
    MaskNot,
    FirstN,
    IfThenElse,
    CountTrue,

    // Lane compression
    Compress,
    CompressStore,

    // Bit-level float inspection
    GetExponent,
    GetMantissa,
    IsInf,
    IsNaN,

    // Transcendentals (contrib math helpers)
    Exp,
    Log,
    Sigmoid,
    Tanh,

    // Half-precision conversions
    Float32ToFloat16,
    Float32ToBFloat16,
}

impl Op {
    /// Ops that read or write memory; the IR builder turns these into
    /// load/store nodes rather than elementwise nodes.
    pub fn is_memory(self) -> bool {
        matches!(self, Self::Load | Self::Store | Self::MaskedLoad | Self::MaskedStore | Self::CompressStore)
    }

    pub fn is_reduction(self) -> bool {
        matches!(self, Self::ReduceSum | Self::ReduceMin | Self::ReduceMax)
    }

    pub fn is_broadcast(self) -> bool {
        matches!(self, Self::Set | Self::Zero | Self::Iota)
    }

    pub fn is_lane_query(self) -> bool {
        matches!(self, Self::NumLanes | Self::MaxLanes | Self::Lanes)
    }

    /// Elementwise ops produce one output lane per input lane and carry no
    /// cross-lane dependence, which makes them fusable.
    pub fn is_elementwise(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Min
                | Self::Max
                | Self::MulAdd
                | Self::Sqrt
                | Self::Abs
                | Self::Neg
                | Self::Exp
                | Self::Log
                | Self::Sigmoid
                | Self::Tanh
        )
    }

    /// True for the whole recognized universe; used by the parser to decide
    /// whether a bare call is an op reference.
    pub fn recognize(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

/// Scalar spelling of an op in fallback-scalarized bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarForm {
    /// A binary infix operator, e.g. `Add` -> `a + b`.
    Infix(&'static str),
    /// A call to a language builtin, e.g. `Min` -> `min(a, b)`.
    Builtin(&'static str),
    /// A call into the standard math package, e.g. `Sqrt` -> `math.Sqrt(a)`.
    StdMath(&'static str),
    /// `MulAdd` -> `a*b + c`.
    FusedMulAdd,
    /// Reductions collapse to their single-lane identity argument.
    Identity,
    /// Lane queries become the literal `1`.
    One,
    /// Broadcasts of a value become the value itself.
    Value,
    /// Zero becomes a typed zero literal.
    ZeroLiteral,
}

/// Static scalarization table: ops the fallback scalarizer may rewrite.
///
/// Growing this table is the supported way to widen the scalarizable set;
/// the rewriter itself stays data-driven. Any op absent here is treated
/// conservatively as non-scalarizable and triggers bail-out.
pub const SCALARIZABLE: &[(Op, ScalarForm)] = &[
    (Op::Add, ScalarForm::Infix("+")),
    (Op::Sub, ScalarForm::Infix("-")),
    (Op::Mul, ScalarForm::Infix("*")),
    (Op::Div, ScalarForm::Infix("/")),
    (Op::Min, ScalarForm::Builtin("min")),
    (Op::Max, ScalarForm::Builtin("max")),
    (Op::MulAdd, ScalarForm::FusedMulAdd),
    (Op::Sqrt, ScalarForm::StdMath("Sqrt")),
    (Op::Abs, ScalarForm::StdMath("Abs")),
    (Op::Exp, ScalarForm::StdMath("Exp")),
    (Op::Log, ScalarForm::StdMath("Log")),
    (Op::ReduceSum, ScalarForm::Identity),
    (Op::ReduceMin, ScalarForm::Identity),
    (Op::ReduceMax, ScalarForm::Identity),
    (Op::NumLanes, ScalarForm::One),
    (Op::MaxLanes, ScalarForm::One),
    (Op::Lanes, ScalarForm::One),
    (Op::Set, ScalarForm::Value),
    (Op::Zero, ScalarForm::ZeroLiteral),
    (Op::Load, ScalarForm::Value),
    (Op::Store, ScalarForm::Value),
];

/// Looks up the scalar form for an op, if one is declared.
pub fn scalar_form(op: Op) -> Option<ScalarForm> {
    SCALARIZABLE.iter().find(|(o, _)| *o == op).map(|(_, form)| *form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_parse_by_source_spelling() {
        assert_eq!(Op::recognize("MulAdd"), Some(Op::MulAdd));
        assert_eq!(Op::recognize("ReduceSum"), Some(Op::ReduceSum));
        assert_eq!(Op::recognize("NotAnOp"), None);
    }

    #[test]
    fn masks_are_not_scalarizable() {
        assert_eq!(scalar_form(Op::MaskAnd), None);
        assert_eq!(scalar_form(Op::Compress), None);
        assert_eq!(scalar_form(Op::GetExponent), None);
    }

    #[test]
    fn categories_are_disjoint_for_core_ops() {
        for (op, _) in SCALARIZABLE {
            let cats = [op.is_memory(), op.is_reduction(), op.is_broadcast(), op.is_lane_query()];
            assert!(cats.iter().filter(|c| **c).count() <= 1, "{op} is in multiple categories");
        }
    }
}
