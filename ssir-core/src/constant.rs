//! Constant and specialization constant representations.
use half::f16;
use ordered_float::OrderedFloat;

use crate::ty::TypeId;

/// Identifier of a value in a module; see
/// [`Module::alloc_id`](crate::module::Module::alloc_id).
pub type Id = u32;

/// Specialization constant ID as exposed to graphics APIs. Not an SSIR id.
pub type SpecId = u32;

/// Constant payload. Floats are wrapped in `OrderedFloat` so payloads can
/// serve as dedup keys by bit pattern.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum ConstValue {
    Bool(bool),
    S32(i32),
    S64(i64),
    U32(u32),
    U64(u64),
    F16(OrderedFloat<f16>),
    F32(OrderedFloat<f32>),
    F64(OrderedFloat<f64>),
    /// Component constant ids, one per element or member.
    Composite(Vec<Id>),
    /// Zero value of the constant's type.
    Null,
}
impl From<bool> for ConstValue {
    fn from(x: bool) -> Self {
        Self::Bool(x)
    }
}
impl From<i32> for ConstValue {
    fn from(x: i32) -> Self {
        Self::S32(x)
    }
}
impl From<u32> for ConstValue {
    fn from(x: u32) -> Self {
        Self::U32(x)
    }
}
impl From<f32> for ConstValue {
    fn from(x: f32) -> Self {
        Self::F32(OrderedFloat(x))
    }
}
impl From<f16> for ConstValue {
    fn from(x: f16) -> Self {
        Self::F16(OrderedFloat(x))
    }
}
impl ConstValue {
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(x) => Some(*x),
            _ => None,
        }
    }
    pub fn to_s32(&self) -> Option<i32> {
        match self {
            Self::S32(x) => Some(*x),
            _ => None,
        }
    }
    pub fn to_u32(&self) -> Option<u32> {
        match self {
            Self::U32(x) => Some(*x),
            _ => None,
        }
    }
    pub fn to_f32(&self) -> Option<f32> {
        match self {
            Self::F32(x) => Some((*x).into()),
            _ => None,
        }
    }

    /// Lower words of the scalar payload as they appear in a SPIR-V
    /// `OpConstant`; one word for widths up to 32 bits, two words for 64-bit
    /// scalars. `None` for composites and nulls.
    pub fn words(&self) -> Option<Vec<u32>> {
        let words = match self {
            Self::Bool(_) | Self::Composite(_) | Self::Null => return None,
            Self::S32(x) => vec![*x as u32],
            Self::U32(x) => vec![*x],
            Self::F16(x) => vec![x.to_bits() as u32],
            Self::F32(x) => vec![x.to_bits()],
            Self::S64(x) => {
                let x = *x as u64;
                vec![x as u32, (x >> 32) as u32]
            }
            Self::U64(x) => vec![*x as u32, (*x >> 32) as u32],
            Self::F64(x) => {
                let x = x.to_bits();
                vec![x as u32, (x >> 32) as u32]
            }
        };
        Some(words)
    }
}

/// Constant or specialization constant record.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct Constant {
    /// Value id of the constant inside its module.
    pub id: Id,
    pub name: Option<String>,
    pub ty: TypeId,
    /// Defined value, or default value of a specialization constant.
    pub value: ConstValue,
    /// Set iff this is a specialization constant. Specialization constants
    /// are never deduplicated.
    pub spec_id: Option<SpecId>,
}
