//! The target catalog: static descriptors for every backend.
//!
//! Everything here is data. Op tables map abstract ops to concrete symbol
//! records; the rewriter never branches on a target name, it only consults
//! the table, so an unknown op is uniformly a table miss.

use std::sync::LazyLock;

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    error::{GenError, GenResult},
    ops::Op,
    types::ElemType,
};

/// Host architecture a target belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
    /// The portable fallback builds everywhere.
    Any,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Which package a concrete op symbol lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpPackage {
    /// The per-target vector package (`asm/<target>`).
    Vector,
    /// The core library package (`hwy`).
    Core,
    /// A contrib subpackage by name (`contrib/<sub>`).
    Contrib(&'static str),
    /// No package: the transformer materializes the op inline.
    Special,
    /// The generic fallback library (`fb`).
    Fallback,
}

/// A target op-table entry.
///
/// When both `is_method` and a real `package` are set, the method form wins
/// for call syntax; the package is still consulted when the emitter computes
/// the unit's import set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpInfo {
    pub package: OpPackage,
    pub name: &'static str,
    pub is_method: bool,
    /// Accumulator argument index for in-place variants; the call becomes a
    /// void statement with that argument passed by address.
    pub in_place: Option<usize>,
    /// An op this entry supersedes when both appear adjacently.
    pub replaces: Option<Op>,
}

const fn method(name: &'static str) -> OpInfo {
    OpInfo {
        package: OpPackage::Vector,
        name,
        is_method: true,
        in_place: None,
        replaces: None,
    }
}

const fn vector_fn(name: &'static str) -> OpInfo {
    OpInfo {
        package: OpPackage::Vector,
        name,
        is_method: false,
        in_place: None,
        replaces: None,
    }
}

const fn core_fn(name: &'static str) -> OpInfo {
    OpInfo {
        package: OpPackage::Core,
        name,
        is_method: false,
        in_place: None,
        replaces: None,
    }
}

const fn contrib_fn(sub: &'static str, name: &'static str) -> OpInfo {
    OpInfo {
        package: OpPackage::Contrib(sub),
        name,
        is_method: false,
        in_place: None,
        replaces: None,
    }
}

const fn special() -> OpInfo {
    OpInfo {
        package: OpPackage::Special,
        name: "",
        is_method: false,
        in_place: None,
        replaces: None,
    }
}

const fn fallback_fn(name: &'static str) -> OpInfo {
    OpInfo {
        package: OpPackage::Fallback,
        name,
        is_method: false,
        in_place: None,
        replaces: None,
    }
}

/// A backend descriptor. All fields are static data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: &'static str,
    pub arch: Arch,
    /// Build predicate placed in emitted unit headers.
    pub build_tag: &'static str,
    /// Runtime CPU feature symbol checked by dispatch init routines.
    /// Empty for the fallback.
    pub feature: &'static str,
    /// Vector register width in bytes. Scalable targets record the 128-bit
    /// minimum vector length; the fallback records zero and reports one lane.
    pub vec_width_bytes: u32,
    /// Wide amd64 targets keep half-precision values promoted to
    /// single-precision in registers.
    pub promoted_half: bool,
    pub scalable: bool,
    pub scalar: bool,
    /// Descending-capability rank used by dispatch init ordering.
    pub rank: u32,
}

impl Target {
    /// Effective element size for lane math on this target.
    ///
    /// Half-precision counts as 4 bytes on promoted-storage targets because
    /// each half occupies a single-precision register lane there.
    pub fn elem_size(&self, elem: ElemType) -> u32 {
        if self.promoted_half && elem.is_half() { 4 } else { elem.size_bytes() }
    }

    /// Lane count for an element type; the scalar fallback is one lane.
    pub fn lanes_for(&self, elem: ElemType) -> u32 {
        if self.scalar {
            1
        } else {
            self.vec_width_bytes / self.elem_size(elem)
        }
    }

    /// Symbol suffix for specialized functions, e.g. `_avx2`.
    pub fn suffix(&self) -> String {
        format!("_{}", self.name)
    }

    /// The element type lanes actually hold (promotion applied).
    fn lane_elem(&self, elem: ElemType) -> ElemType {
        if self.promoted_half && elem.is_half() { ElemType::F32 } else { elem }
    }

    /// Concrete vector type name for an element type.
    pub fn vec_type(&self, elem: ElemType) -> String {
        if self.scalar {
            return elem.scalar_name().to_owned();
        }
        let lane = self.lane_elem(elem);
        if self.scalable {
            format!("asm.{}xN", lane.camel_name())
        } else {
            format!("asm.{}x{}", lane.camel_name(), self.lanes_for(elem))
        }
    }

    /// Concrete mask (or predicate) type name for an element type.
    pub fn mask_type(&self, elem: ElemType) -> String {
        if self.scalar {
            return "bool".to_owned();
        }
        let bits = self.elem_size(elem) * 8;
        if self.scalable {
            format!("asm.Pred{bits}")
        } else {
            format!("asm.Mask{bits}x{}", self.lanes_for(elem))
        }
    }

    /// Import path fragment of the per-target vector package.
    pub fn asm_pkg(&self) -> &'static str {
        self.name
    }

    /// Op-table lookup; `None` is an unknown op for this target.
    pub fn op_info(&self, op: Op) -> Option<OpInfo> {
        OP_TABLES.get(self.name).and_then(|table| table.get(&op)).copied()
    }
}

/// All known targets, widest-first within each architecture.
pub static TARGETS: &[Target] = &[
    Target {
        name: "avx512",
        arch: Arch::Amd64,
        build_tag: "amd64 && !purego",
        feature: "HasAVX512",
        vec_width_bytes: 64,
        promoted_half: true,
        scalable: false,
        scalar: false,
        rank: 3,
    },
    Target {
        name: "avx2",
        arch: Arch::Amd64,
        build_tag: "amd64 && !purego",
        feature: "HasAVX2",
        vec_width_bytes: 32,
        promoted_half: true,
        scalable: false,
        scalar: false,
        rank: 2,
    },
    Target {
        name: "neon",
        arch: Arch::Arm64,
        build_tag: "arm64 && !purego",
        feature: "HasNEON",
        vec_width_bytes: 16,
        promoted_half: false,
        scalable: false,
        scalar: false,
        rank: 1,
    },
    Target {
        name: "sve",
        arch: Arch::Arm64,
        build_tag: "arm64 && !purego",
        feature: "HasSVE",
        vec_width_bytes: 16,
        promoted_half: false,
        scalable: true,
        scalar: false,
        rank: 2,
    },
    Target {
        name: "sve2",
        arch: Arch::Arm64,
        build_tag: "arm64 && !purego",
        feature: "HasSVE2",
        vec_width_bytes: 16,
        promoted_half: false,
        scalable: true,
        scalar: false,
        rank: 3,
    },
    // The scalar fallback builds everywhere: every architecture's init
    // routine references its symbols when no SIMD feature is present.
    Target {
        name: "fallback",
        arch: Arch::Any,
        build_tag: "",
        feature: "",
        vec_width_bytes: 0,
        promoted_half: false,
        scalable: false,
        scalar: true,
        rank: 0,
    },
];

/// Names of all available targets, in catalog order.
pub fn available() -> Vec<&'static str> {
    TARGETS.iter().map(|t| t.name).collect()
}

/// Looks up a target by name.
pub fn get(name: &str) -> GenResult<&'static Target> {
    TARGETS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| GenError::config(format!("unknown target `{name}`; available: {}", available().join(", "))))
}

/// Rows shared by every SIMD-native backend. Per-target rows override by op.
fn simd_common_rows() -> Vec<(Op, OpInfo)> {
    vec![
        (Op::Add, method("Add")),
        (Op::Sub, method("Sub")),
        (Op::Mul, method("Mul")),
        (Op::Div, method("Div")),
        (Op::Min, method("Min")),
        (Op::Max, method("Max")),
        (Op::MulAdd, method("MulAdd")),
        (Op::Sqrt, method("Sqrt")),
        (Op::Neg, method("Neg")),
        (Op::Eq, method("Eq")),
        (Op::Ne, method("Ne")),
        (Op::Lt, method("Lt")),
        (Op::Le, method("Le")),
        (Op::Gt, method("Gt")),
        (Op::Ge, method("Ge")),
        (Op::ReduceSum, method("ReduceSum")),
        (Op::ReduceMin, method("ReduceMin")),
        (Op::ReduceMax, method("ReduceMax")),
        (Op::Set, vector_fn("Broadcast")),
        (Op::Iota, vector_fn("Iota")),
        (Op::Load, vector_fn("Load")),
        (Op::Store, vector_fn("Store")),
        (Op::MaskedLoad, vector_fn("MaskedLoad")),
        (Op::MaskedStore, vector_fn("MaskedStore")),
        (Op::FirstN, vector_fn("FirstN")),
        (Op::IfThenElse, method("Blend")),
        (Op::CountTrue, method("CountTrue")),
        (Op::Compress, vector_fn("Compress")),
        (
            Op::CompressStore,
            OpInfo {
                package: OpPackage::Vector,
                name: "CompressStore",
                is_method: false,
                in_place: None,
                replaces: Some(Op::Compress),
            },
        ),
        (Op::Exp, contrib_fn("math", "Exp")),
        (Op::Log, contrib_fn("math", "Log")),
        (Op::Sigmoid, contrib_fn("math", "Sigmoid")),
        (Op::Tanh, contrib_fn("math", "Tanh")),
        (Op::Float32ToFloat16, core_fn("Float32ToFloat16")),
        (Op::Float32ToBFloat16, core_fn("Float32ToBFloat16")),
        // Inline materializers shared by all SIMD backends.
        (Op::Zero, special()),
        (Op::GetExponent, special()),
        (Op::GetMantissa, special()),
        (Op::IsInf, special()),
        (Op::IsNaN, special()),
        (Op::NumLanes, special()),
        (Op::MaxLanes, special()),
        (Op::Lanes, special()),
    ]
}

/// amd64-specific rows: no native float abs, mask ops carry both a method
/// flag and a package (the method form wins for syntax).
fn amd64_rows() -> Vec<(Op, OpInfo)> {
    let mut rows = simd_common_rows();
    rows.extend([
        (Op::Abs, special()),
        (Op::MaskNot, special()),
        (
            Op::MaskAnd,
            OpInfo {
                package: OpPackage::Vector,
                name: "And",
                is_method: true,
                in_place: None,
                replaces: None,
            },
        ),
        (
            Op::MaskOr,
            OpInfo {
                package: OpPackage::Vector,
                name: "Or",
                is_method: true,
                in_place: None,
                replaces: None,
            },
        ),
    ]);
    rows
}

/// arm64 rows: native abs and mask negation, in-place accumulate on the
/// scalable backends.
fn arm64_rows(scalable: bool) -> Vec<(Op, OpInfo)> {
    let mut rows = simd_common_rows();
    rows.extend([
        (Op::Abs, method("Abs")),
        (Op::MaskNot, method("Not")),
        (Op::MaskAnd, method("And")),
        (Op::MaskOr, method("Or")),
    ]);
    if scalable {
        rows.push((
            Op::MulAdd,
            OpInfo {
                package: OpPackage::Vector,
                name: "MulAddTo",
                is_method: false,
                in_place: Some(2),
                replaces: None,
            },
        ));
    }
    rows
}

/// Fallback rows: every op routes to the generic scalar library; the
/// scalarizer replaces most of these before emission.
fn fallback_rows() -> Vec<(Op, OpInfo)> {
    use strum::IntoEnumIterator;
    Op::iter()
        .map(|op| {
            let info = match op {
                Op::NumLanes | Op::MaxLanes | Op::Lanes => special(),
                _ => fallback_fn(op.into()),
            };
            (op, info)
        })
        .collect()
}

static OP_TABLES: LazyLock<AHashMap<&'static str, IndexMap<Op, OpInfo>>> = LazyLock::new(|| {
    let mut tables = AHashMap::new();
    for target in TARGETS {
        let rows = match (target.arch, target.scalar) {
            (_, true) => fallback_rows(),
            (Arch::Amd64, _) => amd64_rows(),
            (Arch::Arm64, _) => arm64_rows(target.scalable),
            (Arch::Any, _) => fallback_rows(),
        };
        let mut table = IndexMap::new();
        for (op, info) in rows {
            table.insert(op, info);
        }
        tables.insert(target.name, table);
    }
    tables
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_counts_follow_width_and_element_size() {
        let avx512 = get("avx512").expect("catalog");
        assert_eq!(avx512.lanes_for(ElemType::F32), 16);
        assert_eq!(avx512.lanes_for(ElemType::F64), 8);
        let neon = get("neon").expect("catalog");
        assert_eq!(neon.lanes_for(ElemType::F32), 4);
    }

    #[test]
    fn promoted_half_occupies_four_bytes_on_amd64() {
        let avx2 = get("avx2").expect("catalog");
        assert_eq!(avx2.lanes_for(ElemType::F16), 8, "same as f32 lanes");
        assert_eq!(avx2.vec_type(ElemType::F16), "asm.Float32x8");
        let neon = get("neon").expect("catalog");
        assert_eq!(neon.lanes_for(ElemType::F16), 8, "native halves: 16/2");
        assert_eq!(neon.vec_type(ElemType::F16), "asm.Float16x8");
    }

    #[test]
    fn fallback_is_always_one_lane() {
        let fb = get("fallback").expect("catalog");
        for elem in ElemType::ALL {
            assert_eq!(fb.lanes_for(elem), 1);
        }
        assert_eq!(fb.vec_type(ElemType::F64), "float64");
    }

    #[test]
    fn every_simd_target_covers_the_core_universe() {
        for target in TARGETS {
            for op in [Op::Add, Op::Set, Op::Load, Op::Store, Op::ReduceSum, Op::NumLanes] {
                assert!(
                    target.op_info(op).is_some(),
                    "target {} is missing op {op}",
                    target.name
                );
            }
        }
    }

    #[test]
    fn amd64_mask_or_sets_method_and_package() {
        let avx512 = get("avx512").expect("catalog");
        let info = avx512.op_info(Op::MaskOr).expect("entry");
        assert!(info.is_method);
        assert_eq!(info.package, OpPackage::Vector, "package kept for import computation");
    }

    #[test]
    fn scalable_targets_use_min_vector_length() {
        let sve = get("sve").expect("catalog");
        assert_eq!(sve.lanes_for(ElemType::F64), 2);
        assert_eq!(sve.vec_type(ElemType::F64), "asm.Float64xN");
        assert_eq!(sve.mask_type(ElemType::F64), "asm.Pred64");
    }

    #[test]
    fn unknown_target_is_a_config_error() {
        let err = get("mmx").expect_err("not in catalog");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfiguration);
    }
}
