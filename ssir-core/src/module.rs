//! SSIR module structure: interned types, the constant pool, global
//! variables, functions with their basic blocks, and entry points.
use fnv::FnvHashMap as HashMap;

use crate::constant::{ConstValue, Constant, Id, SpecId};
use crate::instr::Instr;
use crate::ty::{
    AccessMode, AddressSpace, ArrayType, Dim, ImageFormat, MatrixType, PointerType,
    RuntimeArrayType, ScalarKind, StructType, TextureDepthType, TextureStorageType, TextureType,
    Type, TypeId, VectorType,
};

/// Pipeline stage an entry point executes in.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}
impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        };
        f.write_str(name)
    }
}

/// Module-scope variable. The type is always a pointer.
#[derive(Clone, Debug)]
pub struct GlobalVar {
    pub id: Id,
    pub name: Option<String>,
    /// Pointer type of the variable.
    pub ty: TypeId,
    pub space: AddressSpace,
    pub group: Option<u32>,
    pub binding: Option<u32>,
    pub location: Option<u32>,
    pub builtin: Option<spirv::BuiltIn>,
    /// Initializer constant id.
    pub init: Option<Id>,
}

#[derive(Clone, Debug)]
pub struct FunctionParam {
    pub id: Id,
    pub name: Option<String>,
    pub ty: TypeId,
}

/// Function-scope variable. The type is always a pointer in the `Function`
/// address space.
#[derive(Clone, Debug)]
pub struct LocalVar {
    pub id: Id,
    pub name: Option<String>,
    pub ty: TypeId,
    pub init: Option<Id>,
}

/// Basic block: ordered instructions ending in exactly one terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
    pub id: Id,
    pub instrs: Vec<Instr>,
}
impl Block {
    pub fn new(id: Id) -> Self {
        Block {
            id,
            instrs: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub id: Id,
    pub name: Option<String>,
    pub ret_ty: TypeId,
    pub params: Vec<FunctionParam>,
    pub locals: Vec<LocalVar>,
    /// Blocks in layout order; the first is the entry block.
    pub blocks: Vec<Block>,
}

/// A function invoked directly by the GPU runtime.
#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub stage: Stage,
    /// Id of the entry function. The function must return void.
    pub func: Id,
    /// Ids of the Input/Output globals forming the stage interface.
    pub interface: Vec<Id>,
    /// Compute only; all-ones otherwise.
    pub workgroup_size: [u32; 3],
    pub depth_replacing: bool,
    pub early_fragment_tests: bool,
    pub origin_upper_left: bool,
}
impl EntryPoint {
    pub fn new(name: impl Into<String>, stage: Stage, func: Id) -> Self {
        EntryPoint {
            name: name.into(),
            stage,
            func,
            interface: Vec::new(),
            workgroup_size: [1, 1, 1],
            depth_replacing: false,
            early_fragment_tests: false,
            origin_upper_left: stage == Stage::Fragment,
        }
    }
}

/// An SSIR module. Mutated during construction by a front end, then treated
/// as read-only by validation and the back ends.
#[derive(Debug)]
pub struct Module {
    types: Vec<Type>,
    ty_dedup: HashMap<Type, TypeId>,
    constants: Vec<Constant>,
    const_dedup: HashMap<(TypeId, ConstValue), Id>,
    const_idx: HashMap<Id, usize>,
    pub globals: Vec<GlobalVar>,
    global_idx: HashMap<Id, usize>,
    pub functions: Vec<Function>,
    func_idx: HashMap<Id, usize>,
    pub entry_points: Vec<EntryPoint>,
    next_id: Id,
    value_types: HashMap<Id, TypeId>,
}
impl Default for Module {
    fn default() -> Module {
        Module::new()
    }
}
impl Module {
    pub fn new() -> Self {
        Module {
            types: Vec::new(),
            ty_dedup: HashMap::default(),
            constants: Vec::new(),
            const_dedup: HashMap::default(),
            const_idx: HashMap::default(),
            globals: Vec::new(),
            global_idx: HashMap::default(),
            functions: Vec::new(),
            func_idx: HashMap::default(),
            entry_points: Vec::new(),
            // Value ids are dense from 1; 0 is reserved as "no id".
            next_id: 1,
            value_types: HashMap::default(),
        }
    }

    /// Mint a fresh value id. Ids are dense from 1; 0 is never a valid id.
    pub fn alloc_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
    /// One past the largest value id handed out so far.
    pub fn id_bound(&self) -> Id {
        self.next_id
    }

    /// Record the defining type of a value id. Ids defined through the
    /// `const_*`/`add_*` helpers are recorded automatically.
    pub fn define_value(&mut self, id: Id, ty: TypeId) {
        self.value_types.insert(id, ty);
    }
    /// Defining type of a value, if the id is defined at all.
    pub fn value_type(&self, id: Id) -> Option<TypeId> {
        self.value_types.get(&id).copied()
    }

    // Types.

    /// Intern a type, returning the id of the structurally identical type if
    /// one exists already.
    pub fn intern_ty(&mut self, ty: Type) -> TypeId {
        if let Some(id) = self.ty_dedup.get(&ty) {
            return *id;
        }
        let id = self.types.len() as TypeId;
        self.types.push(ty.clone());
        self.ty_dedup.insert(ty, id);
        id
    }
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id as usize]
    }
    pub fn tys(&self) -> &[Type] {
        &self.types
    }

    pub fn ty_void(&mut self) -> TypeId {
        self.intern_ty(Type::Void)
    }
    pub fn ty_bool(&mut self) -> TypeId {
        self.intern_ty(Type::Bool)
    }
    pub fn ty_int(&mut self, bits: u32, is_signed: bool) -> TypeId {
        self.intern_ty(Type::Int { bits, is_signed })
    }
    pub fn ty_i32(&mut self) -> TypeId {
        self.ty_int(32, true)
    }
    pub fn ty_u32(&mut self) -> TypeId {
        self.ty_int(32, false)
    }
    pub fn ty_float(&mut self, bits: u32) -> TypeId {
        self.intern_ty(Type::Float { bits })
    }
    pub fn ty_f16(&mut self) -> TypeId {
        self.ty_float(16)
    }
    pub fn ty_f32(&mut self) -> TypeId {
        self.ty_float(32)
    }
    pub fn ty_vec(&mut self, elem: TypeId, count: u32) -> TypeId {
        self.intern_ty(Type::Vector(VectorType { elem, count }))
    }
    pub fn ty_matrix(&mut self, column: TypeId, columns: u32, rows: u32) -> TypeId {
        self.intern_ty(Type::Matrix(MatrixType {
            column,
            columns,
            rows,
        }))
    }
    pub fn ty_array(&mut self, elem: TypeId, len: u32, stride: Option<u32>) -> TypeId {
        self.intern_ty(Type::Array(ArrayType { elem, len, stride }))
    }
    pub fn ty_runtime_array(&mut self, elem: TypeId, stride: Option<u32>) -> TypeId {
        self.intern_ty(Type::RuntimeArray(RuntimeArrayType { elem, stride }))
    }
    pub fn ty_struct(&mut self, struct_ty: StructType) -> TypeId {
        self.intern_ty(Type::Struct(struct_ty))
    }
    pub fn ty_ptr(&mut self, pointee: TypeId, space: AddressSpace) -> TypeId {
        self.intern_ty(Type::Pointer(PointerType { pointee, space }))
    }
    pub fn ty_sampler(&mut self) -> TypeId {
        self.intern_ty(Type::Sampler)
    }
    pub fn ty_sampler_comparison(&mut self) -> TypeId {
        self.intern_ty(Type::SamplerComparison)
    }
    pub fn ty_texture(
        &mut self,
        dim: Dim,
        sampled: ScalarKind,
        arrayed: bool,
        multisampled: bool,
    ) -> TypeId {
        self.intern_ty(Type::Texture(TextureType {
            dim,
            sampled,
            arrayed,
            multisampled,
        }))
    }
    pub fn ty_texture_storage(
        &mut self,
        dim: Dim,
        format: ImageFormat,
        access: AccessMode,
        arrayed: bool,
    ) -> TypeId {
        self.intern_ty(Type::TextureStorage(TextureStorageType {
            dim,
            format,
            access,
            arrayed,
        }))
    }
    pub fn ty_texture_depth(&mut self, dim: Dim, arrayed: bool, multisampled: bool) -> TypeId {
        self.intern_ty(Type::TextureDepth(TextureDepthType {
            dim,
            arrayed,
            multisampled,
        }))
    }

    /// Scalar element type of a scalar, vector or matrix type.
    pub fn scalar_elem(&self, ty: TypeId) -> Option<TypeId> {
        match self.ty(ty) {
            Type::Bool | Type::Int { .. } | Type::Float { .. } => Some(ty),
            Type::Vector(x) => Some(x.elem),
            Type::Matrix(x) => self.scalar_elem(x.column),
            _ => None,
        }
    }

    // Constants.

    /// Intern a constant, deduplicating by `(type, bit pattern)`. Composite
    /// values dedup by component ids.
    pub fn intern_const(&mut self, ty: TypeId, value: ConstValue) -> Id {
        let key = (ty, value.clone());
        if let Some(id) = self.const_dedup.get(&key) {
            return *id;
        }
        let id = self.alloc_id();
        self.const_dedup.insert(key, id);
        self.const_idx.insert(id, self.constants.len());
        self.constants.push(Constant {
            id,
            name: None,
            ty,
            value,
            spec_id: None,
        });
        self.define_value(id, ty);
        id
    }
    /// Register a specialization constant. Spec constants are identity-unique
    /// and never deduplicated.
    pub fn add_spec_const(
        &mut self,
        name: Option<String>,
        ty: TypeId,
        value: ConstValue,
        spec_id: SpecId,
    ) -> Id {
        let id = self.alloc_id();
        self.const_idx.insert(id, self.constants.len());
        self.constants.push(Constant {
            id,
            name,
            ty,
            value,
            spec_id: Some(spec_id),
        });
        self.define_value(id, ty);
        id
    }
    pub fn constant(&self, id: Id) -> Option<&Constant> {
        self.const_idx.get(&id).map(|x| &self.constants[*x])
    }
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn const_bool(&mut self, x: bool) -> Id {
        let ty = self.ty_bool();
        self.intern_const(ty, ConstValue::Bool(x))
    }
    pub fn const_i32(&mut self, x: i32) -> Id {
        let ty = self.ty_i32();
        self.intern_const(ty, ConstValue::S32(x))
    }
    pub fn const_u32(&mut self, x: u32) -> Id {
        let ty = self.ty_u32();
        self.intern_const(ty, ConstValue::U32(x))
    }
    pub fn const_f32(&mut self, x: f32) -> Id {
        let ty = self.ty_f32();
        self.intern_const(ty, ConstValue::from(x))
    }
    pub fn const_f16(&mut self, x: half::f16) -> Id {
        let ty = self.ty_f16();
        self.intern_const(ty, ConstValue::from(x))
    }
    pub fn const_composite(&mut self, ty: TypeId, components: Vec<Id>) -> Id {
        self.intern_const(ty, ConstValue::Composite(components))
    }
    pub fn const_null(&mut self, ty: TypeId) -> Id {
        self.intern_const(ty, ConstValue::Null)
    }

    // Globals and functions.

    pub fn add_global(&mut self, var: GlobalVar) -> Id {
        let id = var.id;
        self.define_value(id, var.ty);
        self.global_idx.insert(id, self.globals.len());
        self.globals.push(var);
        id
    }
    pub fn global(&self, id: Id) -> Option<&GlobalVar> {
        self.global_idx.get(&id).map(|x| &self.globals[*x])
    }

    pub fn add_function(&mut self, func: Function) -> Id {
        let id = func.id;
        self.func_idx.insert(id, self.functions.len());
        self.functions.push(func);
        id
    }
    pub fn function(&self, id: Id) -> Option<&Function> {
        self.func_idx.get(&id).map(|x| &self.functions[*x])
    }

    pub fn add_entry_point(&mut self, entry: EntryPoint) {
        self.entry_points.push(entry);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_type_dedup() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let a = m.ty_vec(f32_ty, 4);
        let b = m.ty_vec(f32_ty, 4);
        assert_eq!(a, b);
        let c = m.ty_vec(f32_ty, 3);
        assert_ne!(a, c);
    }

    #[test]
    fn test_const_dedup() {
        let mut m = Module::new();
        let a = m.const_f32(1.0);
        let b = m.const_f32(1.0);
        assert_eq!(a, b);
        let c = m.const_f32(2.0);
        assert_ne!(a, c);
        // -0.0 and 0.0 differ in bit pattern so they are distinct constants.
        let pos = m.const_f32(0.0);
        let neg = m.const_f32(-0.0);
        assert_ne!(pos, neg);
    }

    #[test]
    fn test_spec_consts_not_deduped() {
        let mut m = Module::new();
        let ty = m.ty_u32();
        let a = m.add_spec_const(Some("a".to_owned()), ty, ConstValue::U32(1), 0);
        let b = m.add_spec_const(Some("b".to_owned()), ty, ConstValue::U32(1), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_types_recorded() {
        let mut m = Module::new();
        let x = m.const_u32(42);
        assert_eq!(m.value_type(x), Some(m.ty_u32()));
    }
}
