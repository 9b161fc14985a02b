//! SSIR instruction set.
//!
//! An instruction owns its opcode, an optional SSA result id with its type,
//! the value operands in `args` and literal immediates in `extra`. Operand
//! conventions per opcode:
//!
//! - binary ops: `args = [lhs, rhs]`; unary ops: `args = [operand]`;
//! - `Construct`: `args` = components; `Splat`: `args = [scalar]`, the count
//!   comes from the result type;
//! - `Extract`/`Insert`: `args = [composite]` / `[object, composite]`,
//!   `extra` = literal index path; `Shuffle`: `args = [a, b]`, `extra` =
//!   component selectors; `ExtractDyn`/`InsertDyn` take the index as a value
//!   operand instead;
//! - `Load`: `args = [ptr]`; `Store`: `args = [ptr, value]`; `Access`:
//!   `args = [base_ptr, index...]`; `ArrayLen`: `args = [struct_ptr]`,
//!   `extra = [member]`;
//! - `Branch`: `args = [target]`; `BranchCond`: `args = [cond, then, else]`;
//!   `Switch`: `args = [selector, default, case...]`, `extra` = case
//!   literals, one per case target; `Phi`: `args = [value, pred]` pairs;
//!   `Return`: `args = [value]`; `SelectionMerge`: `args = [merge]`;
//!   `LoopMerge`: `args = [merge, continue]`;
//! - `Call`: `args = [callee, argument...]`; `Builtin`: `extra = [catalog
//!   id]`, `args` = arguments;
//! - `Convert`/`Bitcast`: `args = [value]`, the source type is recorded in
//!   the module's value-type map and the destination is the result type;
//! - texture ops: `args = [texture, (sampler), coord, ...]` with the
//!   variant-specific tail documented on [`Opcode`];
//! - `Barrier`: `extra = [kind]` per [`BarrierKind`]; `Atomic`: `extra =
//!   [op, scope, semantics]` per [`AtomicOp`], `args = [ptr, (value),
//!   (comparator)]`.
use num_derive::FromPrimitive;

use crate::constant::Id;
use crate::ty::TypeId;

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Opcode {
    // Arithmetic.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Rem,
    Neg,
    /// Any matrix-involved multiply; the emitter picks the SPIR-V opcode from
    /// the operand shapes.
    MatMul,
    MatTranspose,
    // Bitwise and shifts.
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    /// Shift right honoring the operand's signedness.
    Shr,
    /// Shift right always filling with zeros.
    ShrLogical,
    // Comparison.
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical.
    And,
    Or,
    Not,
    // Composite.
    Construct,
    Extract,
    Insert,
    Shuffle,
    Splat,
    ExtractDyn,
    InsertDyn,
    // Memory.
    Load,
    Store,
    Access,
    ArrayLen,
    // Control flow.
    Branch,
    BranchCond,
    Switch,
    Phi,
    Return,
    ReturnVoid,
    Unreachable,
    LoopMerge,
    SelectionMerge,
    Discard,
    // Calls.
    Call,
    Builtin,
    // Conversion.
    Convert,
    Bitcast,
    // Texture sampling. `args = [texture, sampler, coord]` plus, in order:
    // the depth reference for `Cmp` forms, the bias/lod/gradient pair for
    // the respective forms, and the constant offset for `Offset` forms.
    TexSample,
    TexSampleOffset,
    TexSampleBias,
    TexSampleBiasOffset,
    TexSampleLevel,
    TexSampleLevelOffset,
    TexSampleGrad,
    TexSampleGradOffset,
    TexSampleCmp,
    TexSampleCmpOffset,
    TexSampleCmpLevel,
    TexSampleCmpLevelOffset,
    // Texture gather. `args = [texture, sampler, coord, component]`, the
    // `Cmp` form takes a depth reference instead of a component.
    TexGather,
    TexGatherOffset,
    TexGatherCmp,
    // Texel addressing. `TexLoad`: `args = [texture, coord, (level|sample)]`;
    // `TexStore`: `args = [texture, coord, value]`.
    TexLoad,
    TexStore,
    // Texture queries. `TexSize`: `args = [texture, (level)]`.
    TexSize,
    TexQueryLod,
    TexQueryLevels,
    TexQuerySamples,
    // Synchronization.
    Barrier,
    Atomic,
}
impl Opcode {
    /// Every basic block ends in exactly one of these.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Branch
                | Opcode::BranchCond
                | Opcode::Switch
                | Opcode::Return
                | Opcode::ReturnVoid
                | Opcode::Unreachable
        )
    }
    pub fn is_merge(&self) -> bool {
        matches!(self, Opcode::LoopMerge | Opcode::SelectionMerge)
    }
    pub fn has_result(&self) -> bool {
        !matches!(
            self,
            Opcode::Store
                | Opcode::TexStore
                | Opcode::Branch
                | Opcode::BranchCond
                | Opcode::Switch
                | Opcode::Return
                | Opcode::ReturnVoid
                | Opcode::Unreachable
                | Opcode::LoopMerge
                | Opcode::SelectionMerge
                | Opcode::Discard
                | Opcode::Barrier
        )
    }
}

/// Memory scope of a [`Opcode::Barrier`].
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, FromPrimitive)]
#[repr(u32)]
pub enum BarrierKind {
    Workgroup = 0,
    Storage = 1,
    Texture = 2,
}

/// Read-modify-write operation of an [`Opcode::Atomic`].
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, FromPrimitive)]
#[repr(u32)]
pub enum AtomicOp {
    Load = 0,
    Store = 1,
    Add = 2,
    Sub = 3,
    Min = 4,
    Max = 5,
    And = 6,
    Or = 7,
    Xor = 8,
    Exchange = 9,
    CompareExchange = 10,
}

/// Catalog of intrinsic functions callable through [`Opcode::Builtin`]. The
/// emitter maps each entry to either a native SPIR-V opcode or a
/// GLSL.std.450 extended instruction, picking signed/unsigned/float variants
/// from the operand types.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, FromPrimitive)]
#[repr(u32)]
pub enum BuiltinFn {
    Abs = 0,
    Acos,
    Asin,
    Atan,
    Atan2,
    Ceil,
    Clamp,
    Cos,
    Cosh,
    Cross,
    Degrees,
    Determinant,
    Distance,
    Dot,
    Exp,
    Exp2,
    FaceForward,
    Floor,
    Fma,
    Fract,
    InverseSqrt,
    Length,
    Log,
    Log2,
    Max,
    Min,
    Mix,
    Normalize,
    Pow,
    Radians,
    Reflect,
    Refract,
    Round,
    Sign,
    Sin,
    Sinh,
    SmoothStep,
    Sqrt,
    Step,
    Tan,
    Tanh,
    Trunc,
    // Relational and derivative intrinsics with native SPIR-V opcodes.
    All,
    Any,
    Select,
    Dpdx,
    Dpdy,
    Fwidth,
    IsInf,
    IsNan,
    // Data packing.
    Pack4x8Snorm,
    Pack4x8Unorm,
    Pack2x16Snorm,
    Pack2x16Unorm,
    Pack2x16Float,
    Unpack4x8Snorm,
    Unpack4x8Unorm,
    Unpack2x16Snorm,
    Unpack2x16Unorm,
    Unpack2x16Float,
}
impl BuiltinFn {
    /// WGSL-surface name of the intrinsic.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Acos => "acos",
            Self::Asin => "asin",
            Self::Atan => "atan",
            Self::Atan2 => "atan2",
            Self::Ceil => "ceil",
            Self::Clamp => "clamp",
            Self::Cos => "cos",
            Self::Cosh => "cosh",
            Self::Cross => "cross",
            Self::Degrees => "degrees",
            Self::Determinant => "determinant",
            Self::Distance => "distance",
            Self::Dot => "dot",
            Self::Exp => "exp",
            Self::Exp2 => "exp2",
            Self::FaceForward => "faceForward",
            Self::Floor => "floor",
            Self::Fma => "fma",
            Self::Fract => "fract",
            Self::InverseSqrt => "inverseSqrt",
            Self::Length => "length",
            Self::Log => "log",
            Self::Log2 => "log2",
            Self::Max => "max",
            Self::Min => "min",
            Self::Mix => "mix",
            Self::Normalize => "normalize",
            Self::Pow => "pow",
            Self::Radians => "radians",
            Self::Reflect => "reflect",
            Self::Refract => "refract",
            Self::Round => "round",
            Self::Sign => "sign",
            Self::Sin => "sin",
            Self::Sinh => "sinh",
            Self::SmoothStep => "smoothstep",
            Self::Sqrt => "sqrt",
            Self::Step => "step",
            Self::Tan => "tan",
            Self::Tanh => "tanh",
            Self::Trunc => "trunc",
            Self::All => "all",
            Self::Any => "any",
            Self::Select => "select",
            Self::Dpdx => "dpdx",
            Self::Dpdy => "dpdy",
            Self::Fwidth => "fwidth",
            Self::IsInf => "isInf",
            Self::IsNan => "isNan",
            Self::Pack4x8Snorm => "pack4x8snorm",
            Self::Pack4x8Unorm => "pack4x8unorm",
            Self::Pack2x16Snorm => "pack2x16snorm",
            Self::Pack2x16Unorm => "pack2x16unorm",
            Self::Pack2x16Float => "pack2x16float",
            Self::Unpack4x8Snorm => "unpack4x8snorm",
            Self::Unpack4x8Unorm => "unpack4x8unorm",
            Self::Unpack2x16Snorm => "unpack2x16snorm",
            Self::Unpack2x16Unorm => "unpack2x16unorm",
            Self::Unpack2x16Float => "unpack2x16float",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let out = match name {
            "abs" => Self::Abs,
            "acos" => Self::Acos,
            "asin" => Self::Asin,
            "atan" => Self::Atan,
            "atan2" => Self::Atan2,
            "ceil" => Self::Ceil,
            "clamp" => Self::Clamp,
            "cos" => Self::Cos,
            "cosh" => Self::Cosh,
            "cross" => Self::Cross,
            "degrees" => Self::Degrees,
            "determinant" => Self::Determinant,
            "distance" => Self::Distance,
            "dot" => Self::Dot,
            "exp" => Self::Exp,
            "exp2" => Self::Exp2,
            "faceForward" => Self::FaceForward,
            "floor" => Self::Floor,
            "fma" => Self::Fma,
            "fract" => Self::Fract,
            "inverseSqrt" => Self::InverseSqrt,
            "length" => Self::Length,
            "log" => Self::Log,
            "log2" => Self::Log2,
            "max" => Self::Max,
            "min" => Self::Min,
            "mix" => Self::Mix,
            "normalize" => Self::Normalize,
            "pow" => Self::Pow,
            "radians" => Self::Radians,
            "reflect" => Self::Reflect,
            "refract" => Self::Refract,
            "round" => Self::Round,
            "sign" => Self::Sign,
            "sin" => Self::Sin,
            "sinh" => Self::Sinh,
            "smoothstep" => Self::SmoothStep,
            "sqrt" => Self::Sqrt,
            "step" => Self::Step,
            "tan" => Self::Tan,
            "tanh" => Self::Tanh,
            "trunc" => Self::Trunc,
            "all" => Self::All,
            "any" => Self::Any,
            "select" => Self::Select,
            "dpdx" => Self::Dpdx,
            "dpdy" => Self::Dpdy,
            "fwidth" => Self::Fwidth,
            "isInf" => Self::IsInf,
            "isNan" => Self::IsNan,
            "pack4x8snorm" => Self::Pack4x8Snorm,
            "pack4x8unorm" => Self::Pack4x8Unorm,
            "pack2x16snorm" => Self::Pack2x16Snorm,
            "pack2x16unorm" => Self::Pack2x16Unorm,
            "pack2x16float" => Self::Pack2x16Float,
            "unpack4x8snorm" => Self::Unpack4x8Snorm,
            "unpack4x8unorm" => Self::Unpack4x8Unorm,
            "unpack2x16snorm" => Self::Unpack2x16Snorm,
            "unpack2x16unorm" => Self::Unpack2x16Unorm,
            "unpack2x16float" => Self::Unpack2x16Float,
            _ => return None,
        };
        Some(out)
    }
}

/// A single SSIR instruction.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct Instr {
    pub op: Opcode,
    /// SSA result id, present iff the opcode produces a value.
    pub result: Option<Id>,
    /// Type of the result, present iff `result` is.
    pub ty: Option<TypeId>,
    /// Value operands: SSA values, pointers, block targets, callee ids.
    pub args: Vec<Id>,
    /// Literal immediates; layout depends on the opcode.
    pub extra: Vec<u32>,
}
impl Instr {
    pub fn new(op: Opcode) -> Self {
        Instr {
            op,
            result: None,
            ty: None,
            args: Vec::new(),
            extra: Vec::new(),
        }
    }
    pub fn with_result(op: Opcode, result: Id, ty: TypeId) -> Self {
        Instr {
            op,
            result: Some(result),
            ty: Some(ty),
            args: Vec::new(),
            extra: Vec::new(),
        }
    }
    pub fn arg(mut self, id: Id) -> Self {
        self.args.push(id);
        self
    }
    pub fn args(mut self, ids: &[Id]) -> Self {
        self.args.extend_from_slice(ids);
        self
    }
    pub fn imm(mut self, x: u32) -> Self {
        self.extra.push(x);
        self
    }
    pub fn imms(mut self, xs: &[u32]) -> Self {
        self.extra.extend_from_slice(xs);
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_terminator_classification() {
        assert!(Opcode::Branch.is_terminator());
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(!Opcode::SelectionMerge.is_terminator());
        assert!(!Opcode::Store.is_terminator());
    }

    #[test]
    fn test_builtin_fn_name_roundtrip() {
        use num_traits::FromPrimitive;
        for x in 0..=BuiltinFn::Unpack2x16Float as u32 {
            let f = BuiltinFn::from_u32(x).unwrap();
            assert_eq!(BuiltinFn::from_name(f.name()), Some(f));
        }
        assert_eq!(
            BuiltinFn::from_u32(BuiltinFn::Unpack2x16Float as u32 + 1),
            None
        );
    }
}
