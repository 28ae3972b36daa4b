//! Element types, constraint families, and type expressions.
//!
//! The abstract vector API is generic over an element type drawn from eight
//! numeric kinds. Constraint families group those kinds the way the base
//! sources spell them (`Floats`, `SignedInts`, ...), and each family expands
//! to the concrete element list a specialization run iterates over.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// A concrete element type a vector lane can hold.
///
/// The serialized form matches the type-suffix convention used by
/// type-specific constants (`_f32`, `_bf16`, ...).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter, IntoStaticStr, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum ElemType {
    F16,
    Bf16,
    F32,
    F64,
    I32,
    I64,
    U32,
    U64,
}

impl ElemType {
    pub const ALL: [Self; 8] = [
        Self::F16,
        Self::Bf16,
        Self::F32,
        Self::F64,
        Self::I32,
        Self::I64,
        Self::U32,
        Self::U64,
    ];

    /// In-memory element size in bytes.
    ///
    /// This is the storage size; promoted-register targets override the
    /// effective size for lane math via the target catalog.
    pub fn size_bytes(self) -> u32 {
        match self {
            Self::F16 | Self::Bf16 => 2,
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        self.size_bytes() * 8
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::Bf16 | Self::F32 | Self::F64)
    }

    pub fn is_half(self) -> bool {
        matches!(self, Self::F16 | Self::Bf16)
    }

    pub fn is_signed_int(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    pub fn is_unsigned_int(self) -> bool {
        matches!(self, Self::U32 | Self::U64)
    }

    pub fn is_int(self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    /// The `_f32`-style suffix used on constants and specialized symbols.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::F16 => "_f16",
            Self::Bf16 => "_bf16",
            Self::F32 => "_f32",
            Self::F64 => "_f64",
            Self::I32 => "_i32",
            Self::I64 => "_i64",
            Self::U32 => "_u32",
            Self::U64 => "_u64",
        }
    }

    /// Scalar type name in the emitted source.
    ///
    /// Half-precision scalars are library structs bit-aliased to a 16-bit
    /// integer; everything else is a language primitive.
    pub fn scalar_name(self) -> &'static str {
        match self {
            Self::F16 => "hwy.Float16",
            Self::Bf16 => "hwy.BFloat16",
            Self::F32 => "float32",
            Self::F64 => "float64",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
        }
    }

    /// CamelCase name used in concrete vector type names and dispatch
    /// variable names (`Float32`, `Uint64`, ...).
    pub fn camel_name(self) -> &'static str {
        match self {
            Self::F16 => "Float16",
            Self::Bf16 => "BFloat16",
            Self::F32 => "Float32",
            Self::F64 => "Float64",
            Self::I32 => "Int32",
            Self::I64 => "Int64",
            Self::U32 => "Uint32",
            Self::U64 => "Uint64",
        }
    }

    /// Parses a trailing type suffix (`_f32`) off an identifier.
    ///
    /// Returns the trimmed base name and the element type when a recognized
    /// suffix is present.
    pub fn split_suffix(ident: &str) -> Option<(&str, Self)> {
        for elem in Self::ALL {
            if let Some(base) = ident.strip_suffix(elem.suffix())
                && !base.is_empty()
            {
                return Some((base, elem));
            }
        }
        None
    }
}

/// A constraint family bounding a type parameter.
///
/// Families mirror the constraint interfaces the base sources use. A union
/// (`Floats | SignedInts`) combines the expansions of its members in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constraint {
    /// Float family: f16, bf16, f32, f64.
    Floats,
    /// Signed integer family: i32, i64.
    SignedInts,
    /// Unsigned integer family: u32, u64.
    UnsignedInts,
    /// All integers, signed then unsigned.
    Ints,
    /// Any numeric element ("lanes" constraint).
    Lanes,
    /// Union of families; expansion preserves member order and dedups.
    Union(Vec<Constraint>),
}

impl Constraint {
    /// Parses a constraint expression such as `Floats` or
    /// `SignedInts | UnsignedInts`.
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split('|').map(str::trim).collect();
        let mut members = Vec::with_capacity(parts.len());
        for part in parts {
            let member = match part {
                "Floats" => Self::Floats,
                "SignedInts" => Self::SignedInts,
                "UnsignedInts" => Self::UnsignedInts,
                "Ints" => Self::Ints,
                "Lanes" => Self::Lanes,
                _ => return None,
            };
            members.push(member);
        }
        match members.len() {
            0 => None,
            1 => Some(members.pop().expect("len checked")),
            _ => Some(Self::Union(members)),
        }
    }

    /// Concrete element types this constraint admits, in expansion order.
    pub fn expansion(&self) -> Vec<ElemType> {
        let mut out = Vec::new();
        self.extend_expansion(&mut out);
        out
    }

    fn extend_expansion(&self, out: &mut Vec<ElemType>) {
        let push = |out: &mut Vec<ElemType>, elems: &[ElemType]| {
            for &e in elems {
                if !out.contains(&e) {
                    out.push(e);
                }
            }
        };
        match self {
            Self::Floats => push(out, &[ElemType::F16, ElemType::Bf16, ElemType::F32, ElemType::F64]),
            Self::SignedInts => push(out, &[ElemType::I32, ElemType::I64]),
            Self::UnsignedInts => push(out, &[ElemType::U32, ElemType::U64]),
            Self::Ints => {
                Self::SignedInts.extend_expansion(out);
                Self::UnsignedInts.extend_expansion(out);
            }
            Self::Lanes => push(out, &ElemType::ALL),
            Self::Union(members) => {
                for member in members {
                    member.extend_expansion(out);
                }
            }
        }
    }
}

/// A type expression as written in base source signatures and bodies.
///
/// The opaque `Vec`/`Mask`/`Pred` constructors are what the transformer
/// replaces with concrete target types; everything else passes through
/// (after type-parameter substitution).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeExpr {
    /// The opaque vector type `hwy.Vec[T]`.
    Vec(Box<TypeExpr>),
    /// The opaque mask type `hwy.Mask[T]`.
    Mask(Box<TypeExpr>),
    /// The opaque predicate type `hwy.Pred[T]` (scalable targets).
    Pred(Box<TypeExpr>),
    /// Slice type `[]T`.
    Slice(Box<TypeExpr>),
    /// Pointer type `*X`.
    Pointer(Box<TypeExpr>),
    /// A generic named type with arguments, e.g. `Matrix[T]`.
    Generic { name: String, args: Vec<TypeExpr> },
    /// A type parameter reference, e.g. `T`.
    Param(String),
    /// A concrete element type after specialization.
    Elem(ElemType),
    /// Any other named type (`int`, `bool`, `float32`, `hwy.Float16`, ...).
    Named(String),
    /// A function type, for higher-order base functions.
    Func {
        params: Vec<TypeExpr>,
        ret: Option<Box<TypeExpr>>,
    },
}

impl TypeExpr {
    /// True when the expression mentions the opaque vector type anywhere.
    ///
    /// Such signatures cannot sit behind a single dispatch variable because
    /// the concrete vector type differs per target.
    pub fn mentions_vector(&self) -> bool {
        match self {
            Self::Vec(_) | Self::Mask(_) | Self::Pred(_) => true,
            Self::Slice(inner) | Self::Pointer(inner) => inner.mentions_vector(),
            Self::Generic { args, .. } => args.iter().any(Self::mentions_vector),
            Self::Func { params, ret } => {
                params.iter().any(Self::mentions_vector) || ret.as_ref().is_some_and(|r| r.mentions_vector())
            }
            Self::Param(_) | Self::Elem(_) | Self::Named(_) => false,
        }
    }

    /// Substitutes a type parameter with a concrete element type.
    pub fn substitute(&self, param: &str, elem: ElemType) -> Self {
        match self {
            Self::Param(name) if name == param => Self::Elem(elem),
            Self::Param(_) | Self::Elem(_) | Self::Named(_) => self.clone(),
            Self::Vec(inner) => Self::Vec(Box::new(inner.substitute(param, elem))),
            Self::Mask(inner) => Self::Mask(Box::new(inner.substitute(param, elem))),
            Self::Pred(inner) => Self::Pred(Box::new(inner.substitute(param, elem))),
            Self::Slice(inner) => Self::Slice(Box::new(inner.substitute(param, elem))),
            Self::Pointer(inner) => Self::Pointer(Box::new(inner.substitute(param, elem))),
            Self::Generic { name, args } => Self::Generic {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(param, elem)).collect(),
            },
            Self::Func { params, ret } => Self::Func {
                params: params.iter().map(|p| p.substitute(param, elem)).collect(),
                ret: ret.as_ref().map(|r| Box::new(r.substitute(param, elem))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_expansion_covers_halves_first() {
        assert_eq!(
            Constraint::Floats.expansion(),
            vec![ElemType::F16, ElemType::Bf16, ElemType::F32, ElemType::F64]
        );
    }

    #[test]
    fn union_expansion_dedups() {
        let c = Constraint::parse("Floats | Lanes").expect("valid constraint");
        assert_eq!(c.expansion().len(), 8, "union with Lanes covers all numerics once");
    }

    #[test]
    fn suffix_split_trims_base_name() {
        assert_eq!(ElemType::split_suffix("expTable_f32"), Some(("expTable", ElemType::F32)));
        assert_eq!(ElemType::split_suffix("plain"), None);
        assert_eq!(ElemType::split_suffix("_f32"), None, "empty base names are not constants");
    }

    #[test]
    fn vector_mention_is_transitive() {
        let ty = TypeExpr::Slice(Box::new(TypeExpr::Vec(Box::new(TypeExpr::Param("T".to_owned())))));
        assert!(ty.mentions_vector());
        let plain = TypeExpr::Slice(Box::new(TypeExpr::Param("T".to_owned())));
        assert!(!plain.mentions_vector());
    }
}
