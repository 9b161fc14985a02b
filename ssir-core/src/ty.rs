//! Structured representations of SSIR types.
//!
//! Compound types refer to their parts by [`TypeId`] into the owning module's
//! interned type table, so two structurally identical types always share one
//! id. Construct types through the `ty_*` helpers on
//! [`Module`](crate::module::Module) rather than interning by hand.
use std::fmt;

pub use spirv::{Dim, ImageFormat};

/// Index into a module's interned type table.
pub type TypeId = u32;

/// Scalar category of a texel fetched from a sampled texture.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ScalarKind {
    Float,
    Sint,
    Uint,
}
impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Float => f.write_str("f32"),
            Self::Sint => f.write_str("i32"),
            Self::Uint => f.write_str("u32"),
        }
    }
}

/// Address space of a pointer type.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    UniformConstant,
    Storage,
    Input,
    Output,
    PushConstant,
    PhysicalStorageBuffer,
}
impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Function => "function",
            Self::Private => "private",
            Self::Workgroup => "workgroup",
            Self::Uniform => "uniform",
            Self::UniformConstant => "uniform_constant",
            Self::Storage => "storage",
            Self::Input => "in",
            Self::Output => "out",
            Self::PushConstant => "push_constant",
            Self::PhysicalStorageBuffer => "physical_storage_buffer",
        };
        f.write_str(name)
    }
}

/// How a storage texture can be accessed.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}
impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read_write",
        };
        f.write_str(name)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum MatrixAxisOrder {
    ColumnMajor,
    RowMajor,
}
impl Default for MatrixAxisOrder {
    fn default() -> MatrixAxisOrder {
        MatrixAxisOrder::ColumnMajor
    }
}

/// Host-visible layout rule a struct was laid out with.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum LayoutRule {
    /// No explicit layout. Offsets are still assigned (natural alignment) but
    /// the struct is not meant to be host-visible.
    None,
    Std140,
    Std430,
    Scalar,
}
impl Default for LayoutRule {
    fn default() -> LayoutRule {
        LayoutRule::None
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct VectorType {
    /// Scalar element type.
    pub elem: TypeId,
    /// Number of scalar components, 2 to 4.
    pub count: u32,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct MatrixType {
    /// Column vector type.
    pub column: TypeId,
    /// Number of columns, 2 to 4.
    pub columns: u32,
    /// Number of rows, 2 to 4. Matches the column vector's component count.
    pub rows: u32,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct ArrayType {
    pub elem: TypeId,
    /// Number of elements. Sized arrays only; see [`RuntimeArrayType`].
    pub len: u32,
    /// Stride between elements in bytes. `None` for arrays without an
    /// explicit layout, e.g. arrays of descriptor resources.
    pub stride: Option<u32>,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct RuntimeArrayType {
    pub elem: TypeId,
    pub stride: Option<u32>,
}

/// Matrix layout of a struct member whose type is (or contains) a matrix.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct MatrixLayout {
    pub order: MatrixAxisOrder,
    /// Stride between columns (or rows, for row-major) in bytes.
    pub stride: u32,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct StructMember {
    pub name: Option<String>,
    pub ty: TypeId,
    /// Offset of this member from the beginning of the struct in bytes.
    pub offset: u32,
    /// Present iff the member type is or contains a matrix.
    pub matrix: Option<MatrixLayout>,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug, Default)]
pub struct StructType {
    pub name: Option<String>,
    pub members: Vec<StructMember>,
    pub layout: LayoutRule,
}
impl StructType {
    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(AsRef::as_ref)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct PointerType {
    pub pointee: TypeId,
    pub space: AddressSpace,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct TextureType {
    pub dim: Dim,
    /// Scalar type of a sampled texel.
    pub sampled: ScalarKind,
    pub arrayed: bool,
    pub multisampled: bool,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct TextureStorageType {
    pub dim: Dim,
    pub format: ImageFormat,
    pub access: AccessMode,
    pub arrayed: bool,
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct TextureDepthType {
    pub dim: Dim,
    pub arrayed: bool,
    pub multisampled: bool,
}

macro_rules! declr_ty_accessor {
    ([$e:ident] $($name:ident -> $ty:ident,)+) => {
        $(
            pub fn $name(&self) -> bool {
                match self {
                    $e::$ty { .. } => true,
                    _ => false
                }
            }
        )+
    }
}
macro_rules! declr_ty_downcast {
    ([$e:ident] $($name:ident -> $ty:ident($inner_ty:ident),)+) => {
        $(
            pub fn $name(&self) -> Option<&$inner_ty> {
                match self {
                    $e::$ty(x) => Some(x),
                    _ => None
                }
            }
        )+
    }
}

/// A SSIR type. Deduplicated by structural equality when interned in a
/// module, so comparing [`TypeId`]s is comparing types.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum Type {
    Void,
    Bool,
    /// Two's complement integer.
    Int { bits: u32, is_signed: bool },
    /// IEEE 754 floating-point number.
    Float { bits: u32 },
    Vector(VectorType),
    Matrix(MatrixType),
    /// Fixed-length array.
    Array(ArrayType),
    /// Array sized only at runtime; must be the last member of a storage
    /// buffer struct.
    RuntimeArray(RuntimeArrayType),
    Struct(StructType),
    Pointer(PointerType),
    Sampler,
    SamplerComparison,
    /// Sampled texture.
    Texture(TextureType),
    /// Storage texture with a concrete texel format.
    TextureStorage(TextureStorageType),
    /// Depth texture, sampled with comparison samplers.
    TextureDepth(TextureDepthType),
}
impl Type {
    declr_ty_accessor! {
        [Type]
        is_void -> Void,
        is_bool -> Bool,
        is_int -> Int,
        is_float -> Float,
        is_vector -> Vector,
        is_matrix -> Matrix,
        is_array -> Array,
        is_runtime_array -> RuntimeArray,
        is_struct -> Struct,
        is_pointer -> Pointer,
        is_sampler -> Sampler,
        is_sampler_comparison -> SamplerComparison,
        is_texture -> Texture,
        is_texture_storage -> TextureStorage,
        is_texture_depth -> TextureDepth,
    }
    declr_ty_downcast! {
        [Type]
        as_vector -> Vector(VectorType),
        as_matrix -> Matrix(MatrixType),
        as_array -> Array(ArrayType),
        as_runtime_array -> RuntimeArray(RuntimeArrayType),
        as_struct -> Struct(StructType),
        as_pointer -> Pointer(PointerType),
        as_texture -> Texture(TextureType),
        as_texture_storage -> TextureStorage(TextureStorageType),
        as_texture_depth -> TextureDepth(TextureDepthType),
    }

    /// Returns true for bool, integer and float types.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Bool | Type::Int { .. } | Type::Float { .. })
    }
    /// Returns true for signed integer types.
    pub fn is_signed_int(&self) -> bool {
        matches!(
            self,
            Type::Int {
                is_signed: true,
                ..
            }
        )
    }
    /// Returns true for unsigned integer types.
    pub fn is_unsigned_int(&self) -> bool {
        matches!(
            self,
            Type::Int {
                is_signed: false,
                ..
            }
        )
    }
}
