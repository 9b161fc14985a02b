//! SSIR to SPIR-V emission.
//!
//! The emitter fills eleven ordered word buffers, one per SPIR-V module
//! section, then concatenates them after the five-word header. SSIR value
//! ids are mapped to SPIR-V ids lazily through a dense table; SSIR type ids
//! and synthesized helper types share one structural key map so no type is
//! ever declared twice.
//!
//! Malformed modules should be rejected by `ssir_core::validate` before
//! emission; inconsistencies discovered here are compiler bugs and panic.
use fnv::FnvHashMap as HashMap;
use fnv::FnvHashSet as HashSet;
use num_traits::FromPrimitive;
use spirv::{Capability, Decoration, ExecutionMode, ExecutionModel, GLOp, Op};

use ssir_core::constant::{ConstValue, Constant, Id};
use ssir_core::instr::{AtomicOp, BarrierKind, BuiltinFn, Instr, Opcode};
use ssir_core::module::{EntryPoint, Function, GlobalVar, Module, Stage};
use ssir_core::ty::{AddressSpace, MatrixAxisOrder, Type, TypeId};

use crate::builder::InstrBuilder;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Closed classification of emission failures. Same shape as the lowering
/// error set; `Internal` conditions panic instead of surfacing here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitErrorKind {
    InvalidInput,
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct EmitError {
    pub kind: EmitErrorKind,
    pub message: String,
}
impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let kind = match self.kind {
            EmitErrorKind::InvalidInput => "invalid input",
            EmitErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}
impl std::error::Error for EmitError {}

pub type Result<T> = std::result::Result<T, EmitError>;

fn invalid(message: impl Into<String>) -> EmitError {
    EmitError {
        kind: EmitErrorKind::InvalidInput,
        message: message.into(),
    }
}
fn unsupported(message: impl Into<String>) -> EmitError {
    EmitError {
        kind: EmitErrorKind::Unsupported,
        message: message.into(),
    }
}

#[derive(Debug, Clone)]
pub struct SpvOptions {
    /// Packed SPIR-V version word; `0x0001_0300` is SPIR-V 1.3.
    pub version: u32,
    pub debug_names: bool,
    pub line_info: bool,
}
impl Default for SpvOptions {
    fn default() -> Self {
        SpvOptions {
            version: 0x0001_0300,
            debug_names: true,
            line_info: false,
        }
    }
}

/// Structural identity of an emitted type. SSIR struct types are already
/// unique per module so they key by their SSIR id; everything else keys by
/// its SPIR-V operand tuple.
#[derive(PartialEq, Eq, Hash, Clone)]
enum TyKey {
    Void,
    Bool,
    Int { bits: u32, signed: bool },
    Float { bits: u32 },
    Vector { elem: u32, count: u32 },
    Matrix { column: u32, columns: u32 },
    // Stride participates in identity: equally shaped arrays with different
    // strides carry different decorations.
    Array { elem: u32, len: u32, stride: u32 },
    RuntimeArray { elem: u32, stride: u32 },
    Struct(TypeId),
    Pointer { space: u32, pointee: u32 },
    Sampler,
    Image {
        sampled_ty: u32,
        dim: u32,
        depth: u32,
        arrayed: u32,
        ms: u32,
        sampled: u32,
        format: u32,
    },
    SampledImage { image: u32 },
}

struct Emitter<'a> {
    m: &'a Module,
    opts: &'a SpvOptions,

    // The eleven module sections, concatenated in this order.
    sec_capabilities: Vec<u32>,
    sec_extensions: Vec<u32>,
    sec_ext_imports: Vec<u32>,
    sec_memory_model: Vec<u32>,
    sec_entry_points: Vec<u32>,
    sec_exec_modes: Vec<u32>,
    sec_debug_names: Vec<u32>,
    sec_annotations: Vec<u32>,
    sec_types_consts: Vec<u32>,
    sec_globals: Vec<u32>,
    sec_functions: Vec<u32>,

    next_id: u32,
    /// Lazy dense map from SSIR value id to SPIR-V id; 0 means unassigned.
    val_map: Vec<u32>,
    ty_keys: HashMap<TyKey, u32>,
    ty_map: HashMap<TypeId, u32>,
    /// Function-type dedup keyed on the signature.
    fn_ty_cache: HashMap<(u32, Vec<u32>), u32>,
    /// Shared scalar constants, module-declared and emitter-synthesized.
    scalar_consts: HashMap<(u32, u64), u32>,
    emitted_consts: HashSet<Id>,
    caps: HashSet<Capability>,
    glsl_set: u32,
    block_decorated: HashSet<u32>,
}

/// Emit a module as SPIR-V words.
pub fn emit_spirv(module: &Module, opts: &SpvOptions) -> Result<Vec<u32>> {
    let mut emitter = Emitter {
        m: module,
        opts,
        sec_capabilities: Vec::new(),
        sec_extensions: Vec::new(),
        sec_ext_imports: Vec::new(),
        sec_memory_model: Vec::new(),
        sec_entry_points: Vec::new(),
        sec_exec_modes: Vec::new(),
        sec_debug_names: Vec::new(),
        sec_annotations: Vec::new(),
        sec_types_consts: Vec::new(),
        sec_globals: Vec::new(),
        sec_functions: Vec::new(),
        next_id: 1,
        val_map: vec![0; module.id_bound() as usize],
        ty_keys: HashMap::default(),
        ty_map: HashMap::default(),
        fn_ty_cache: HashMap::default(),
        scalar_consts: HashMap::default(),
        emitted_consts: HashSet::default(),
        caps: HashSet::default(),
        glsl_set: 0,
        block_decorated: HashSet::default(),
    };
    emitter.run()
}

impl<'a> Emitter<'a> {
    fn run(&mut self) -> Result<Vec<u32>> {
        self.require_cap(Capability::Shader);
        InstrBuilder::new(Op::MemoryModel)
            .push(spirv::AddressingModel::Logical as u32)
            .push(spirv::MemoryModel::GLSL450 as u32)
            .write_into(&mut self.sec_memory_model);

        for constant in self.m.constants() {
            self.const_id(constant.id)?;
        }
        for global in self.m.globals.iter() {
            self.emit_global(global)?;
        }
        for func in self.m.functions.iter() {
            self.emit_function(func)?;
        }
        for entry in self.m.entry_points.iter() {
            self.emit_entry_point(entry)?;
        }

        let mut caps: Vec<u32> = self.caps.iter().map(|x| *x as u32).collect();
        caps.sort_unstable();
        for cap in caps {
            InstrBuilder::new(Op::Capability)
                .push(cap)
                .write_into(&mut self.sec_capabilities);
        }

        let mut out = vec![
            SPIRV_MAGIC,
            self.opts.version,
            0, // Generator.
            self.next_id,
            0, // Reserved schema word.
        ];
        out.extend_from_slice(&self.sec_capabilities);
        out.extend_from_slice(&self.sec_extensions);
        out.extend_from_slice(&self.sec_ext_imports);
        out.extend_from_slice(&self.sec_memory_model);
        out.extend_from_slice(&self.sec_entry_points);
        out.extend_from_slice(&self.sec_exec_modes);
        out.extend_from_slice(&self.sec_debug_names);
        out.extend_from_slice(&self.sec_annotations);
        out.extend_from_slice(&self.sec_types_consts);
        out.extend_from_slice(&self.sec_globals);
        out.extend_from_slice(&self.sec_functions);
        Ok(out)
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// SPIR-V id of an SSIR value, minted on first reference.
    fn val(&mut self, id: Id) -> u32 {
        let slot = &mut self.val_map[id as usize];
        if *slot == 0 {
            *slot = self.next_id;
            self.next_id += 1;
        }
        *slot
    }

    fn require_cap(&mut self, cap: Capability) {
        self.caps.insert(cap);
    }

    fn glsl_set(&mut self) -> u32 {
        if self.glsl_set == 0 {
            let id = self.alloc();
            InstrBuilder::new(Op::ExtInstImport)
                .push(id)
                .push_str("GLSL.std.450")
                .write_into(&mut self.sec_ext_imports);
            self.glsl_set = id;
        }
        self.glsl_set
    }

    // Types.

    fn key_id(&mut self, key: TyKey, emit: impl FnOnce(&mut Self, u32)) -> u32 {
        if let Some(id) = self.ty_keys.get(&key) {
            return *id;
        }
        let id = self.alloc();
        self.ty_keys.insert(key, id);
        emit(self, id);
        id
    }

    fn ty(&mut self, ty: TypeId) -> Result<u32> {
        if let Some(id) = self.ty_map.get(&ty) {
            return Ok(*id);
        }
        let id = self.emit_ty(ty)?;
        self.ty_map.insert(ty, id);
        Ok(id)
    }

    fn emit_ty(&mut self, ty: TypeId) -> Result<u32> {
        let id = match self.m.ty(ty).clone() {
            Type::Void => self.key_id(TyKey::Void, |e, id| {
                InstrBuilder::new(Op::TypeVoid)
                    .push(id)
                    .write_into(&mut e.sec_types_consts);
            }),
            Type::Bool => self.key_id(TyKey::Bool, |e, id| {
                InstrBuilder::new(Op::TypeBool)
                    .push(id)
                    .write_into(&mut e.sec_types_consts);
            }),
            Type::Int { bits, is_signed } => {
                match bits {
                    8 => self.require_cap(Capability::Int8),
                    16 => self.require_cap(Capability::Int16),
                    64 => self.require_cap(Capability::Int64),
                    _ => {}
                }
                self.int_ty(bits, is_signed)
            }
            Type::Float { bits } => {
                match bits {
                    16 => self.require_cap(Capability::Float16),
                    64 => self.require_cap(Capability::Float64),
                    _ => {}
                }
                self.key_id(TyKey::Float { bits }, |e, id| {
                    InstrBuilder::new(Op::TypeFloat)
                        .push(id)
                        .push(bits)
                        .write_into(&mut e.sec_types_consts);
                })
            }
            Type::Vector(x) => {
                let elem = self.ty(x.elem)?;
                self.vec_of(elem, x.count)
            }
            Type::Matrix(x) => {
                let column = self.ty(x.column)?;
                self.key_id(
                    TyKey::Matrix {
                        column,
                        columns: x.columns,
                    },
                    |e, id| {
                        InstrBuilder::new(Op::TypeMatrix)
                            .push(id)
                            .push(column)
                            .push(x.columns)
                            .write_into(&mut e.sec_types_consts);
                    },
                )
            }
            Type::Array(x) => {
                let elem = self.ty(x.elem)?;
                let len = self.scratch_u32(x.len);
                let key = TyKey::Array {
                    elem,
                    len,
                    stride: x.stride.unwrap_or(0),
                };
                let fresh = !self.ty_keys.contains_key(&key);
                let id = self.key_id(key, |e, id| {
                    InstrBuilder::new(Op::TypeArray)
                        .push(id)
                        .push(elem)
                        .push(len)
                        .write_into(&mut e.sec_types_consts);
                });
                if let (Some(stride), true) = (x.stride, fresh) {
                    InstrBuilder::new(Op::Decorate)
                        .push(id)
                        .push(Decoration::ArrayStride as u32)
                        .push(stride)
                        .write_into(&mut self.sec_annotations);
                }
                id
            }
            Type::RuntimeArray(x) => {
                let elem = self.ty(x.elem)?;
                let key = TyKey::RuntimeArray {
                    elem,
                    stride: x.stride.unwrap_or(0),
                };
                let fresh = !self.ty_keys.contains_key(&key);
                let id = self.key_id(key, |e, id| {
                    InstrBuilder::new(Op::TypeRuntimeArray)
                        .push(id)
                        .push(elem)
                        .write_into(&mut e.sec_types_consts);
                });
                if let (Some(stride), true) = (x.stride, fresh) {
                    InstrBuilder::new(Op::Decorate)
                        .push(id)
                        .push(Decoration::ArrayStride as u32)
                        .push(stride)
                        .write_into(&mut self.sec_annotations);
                }
                id
            }
            Type::Struct(x) => {
                let mut members = Vec::with_capacity(x.members.len());
                for member in x.members.iter() {
                    members.push(self.ty(member.ty)?);
                }
                let id = self.key_id(TyKey::Struct(ty), |e, id| {
                    InstrBuilder::new(Op::TypeStruct)
                        .push(id)
                        .push_list(&members)
                        .write_into(&mut e.sec_types_consts);
                });
                for (i, member) in x.members.iter().enumerate() {
                    InstrBuilder::new(Op::MemberDecorate)
                        .push(id)
                        .push(i as u32)
                        .push(Decoration::Offset as u32)
                        .push(member.offset)
                        .write_into(&mut self.sec_annotations);
                    if let Some(matrix) = member.matrix {
                        let major = match matrix.order {
                            MatrixAxisOrder::ColumnMajor => Decoration::ColMajor,
                            MatrixAxisOrder::RowMajor => Decoration::RowMajor,
                        };
                        InstrBuilder::new(Op::MemberDecorate)
                            .push(id)
                            .push(i as u32)
                            .push(major as u32)
                            .write_into(&mut self.sec_annotations);
                        InstrBuilder::new(Op::MemberDecorate)
                            .push(id)
                            .push(i as u32)
                            .push(Decoration::MatrixStride as u32)
                            .push(matrix.stride)
                            .write_into(&mut self.sec_annotations);
                    }
                }
                if self.opts.debug_names {
                    if let Some(name) = x.name() {
                        InstrBuilder::new(Op::Name)
                            .push(id)
                            .push_str(name)
                            .write_into(&mut self.sec_debug_names);
                    }
                    for (i, member) in x.members.iter().enumerate() {
                        if let Some(name) = &member.name {
                            InstrBuilder::new(Op::MemberName)
                                .push(id)
                                .push(i as u32)
                                .push_str(name)
                                .write_into(&mut self.sec_debug_names);
                        }
                    }
                }
                id
            }
            Type::Pointer(x) => {
                let pointee = self.ty(x.pointee)?;
                let space = storage_class(x.space) as u32;
                self.key_id(
                    TyKey::Pointer { space, pointee },
                    |e, id| {
                        InstrBuilder::new(Op::TypePointer)
                            .push(id)
                            .push(space)
                            .push(pointee)
                            .write_into(&mut e.sec_types_consts);
                    },
                )
            }
            Type::Sampler | Type::SamplerComparison => self.key_id(TyKey::Sampler, |e, id| {
                InstrBuilder::new(Op::TypeSampler)
                    .push(id)
                    .write_into(&mut e.sec_types_consts);
            }),
            Type::Texture(x) => {
                let scalar = match x.sampled {
                    ssir_core::ty::ScalarKind::Float => self.float32_ty(),
                    ssir_core::ty::ScalarKind::Sint => self.int_ty(32, true),
                    ssir_core::ty::ScalarKind::Uint => self.int_ty(32, false),
                };
                if x.dim == spirv::Dim::Dim1D {
                    self.require_cap(Capability::Sampled1D);
                }
                self.image_ty(scalar, x.dim as u32, 0, x.arrayed as u32, x.multisampled as u32, 1, spirv::ImageFormat::Unknown as u32)
            }
            Type::TextureDepth(x) => {
                let scalar = self.float32_ty();
                self.image_ty(scalar, x.dim as u32, 1, x.arrayed as u32, x.multisampled as u32, 1, spirv::ImageFormat::Unknown as u32)
            }
            Type::TextureStorage(x) => {
                let scalar = match format_scalar_is_int(x.format) {
                    Some(true) => self.int_ty(32, true),
                    Some(false) => self.int_ty(32, false),
                    None => self.float32_ty(),
                };
                if x.dim == spirv::Dim::Dim1D {
                    self.require_cap(Capability::Image1D);
                }
                self.image_ty(scalar, x.dim as u32, 0, x.arrayed as u32, 0, 2, x.format as u32)
            }
        };
        Ok(id)
    }

    fn int_ty(&mut self, bits: u32, signed: bool) -> u32 {
        self.key_id(TyKey::Int { bits, signed }, |e, id| {
            InstrBuilder::new(Op::TypeInt)
                .push(id)
                .push(bits)
                .push(signed as u32)
                .write_into(&mut e.sec_types_consts);
        })
    }
    fn float32_ty(&mut self) -> u32 {
        self.key_id(TyKey::Float { bits: 32 }, |e, id| {
            InstrBuilder::new(Op::TypeFloat)
                .push(id)
                .push(32)
                .write_into(&mut e.sec_types_consts);
        })
    }
    fn vec_of(&mut self, elem: u32, count: u32) -> u32 {
        self.key_id(TyKey::Vector { elem, count }, |e, id| {
            InstrBuilder::new(Op::TypeVector)
                .push(id)
                .push(elem)
                .push(count)
                .write_into(&mut e.sec_types_consts);
        })
    }
    #[allow(clippy::too_many_arguments)]
    fn image_ty(
        &mut self,
        sampled_ty: u32,
        dim: u32,
        depth: u32,
        arrayed: u32,
        ms: u32,
        sampled: u32,
        format: u32,
    ) -> u32 {
        self.key_id(
            TyKey::Image {
                sampled_ty,
                dim,
                depth,
                arrayed,
                ms,
                sampled,
                format,
            },
            |e, id| {
                InstrBuilder::new(Op::TypeImage)
                    .push(id)
                    .push(sampled_ty)
                    .push(dim)
                    .push(depth)
                    .push(arrayed)
                    .push(ms)
                    .push(sampled)
                    .push(format)
                    .write_into(&mut e.sec_types_consts);
            },
        )
    }
    fn sampled_image_ty(&mut self, image: u32) -> u32 {
        self.key_id(TyKey::SampledImage { image }, |e, id| {
            InstrBuilder::new(Op::TypeSampledImage)
                .push(id)
                .push(image)
                .write_into(&mut e.sec_types_consts);
        })
    }

    /// `OpTypeFunction` with an explicit signature cache.
    fn fn_ty(&mut self, ret: u32, params: &[u32]) -> u32 {
        let key = (ret, params.to_vec());
        if let Some(id) = self.fn_ty_cache.get(&key) {
            return *id;
        }
        let id = self.alloc();
        InstrBuilder::new(Op::TypeFunction)
            .push(id)
            .push(ret)
            .push_list(params)
            .write_into(&mut self.sec_types_consts);
        self.fn_ty_cache.insert(key, id);
        id
    }

    /// Unsigned twin of a signed scalar/vector type, for the wrapping
    /// arithmetic detour.
    fn unsigned_twin(&mut self, ty: TypeId) -> u32 {
        match self.m.ty(ty).clone() {
            Type::Int { bits, .. } => self.int_ty(bits, false),
            Type::Vector(x) => {
                let elem = match self.m.ty(x.elem) {
                    Type::Int { bits, .. } => *bits,
                    _ => panic!("unsigned twin of a non-integer vector"),
                };
                let elem = self.int_ty(elem, false);
                self.vec_of(elem, x.count)
            }
            _ => panic!("unsigned twin of a non-integer type"),
        }
    }

    // Constants.

    /// Scratch u32 constant used by array lengths, scopes and semantics.
    fn scratch_u32(&mut self, value: u32) -> u32 {
        let ty = self.int_ty(32, false);
        self.scalar_const(ty, value as u64, false)
    }
    fn scratch_f32(&mut self, value: f32) -> u32 {
        let ty = self.float32_ty();
        self.scalar_const(ty, value.to_bits() as u64, false)
    }
    fn scalar_const(&mut self, ty: u32, bits: u64, two_words: bool) -> u32 {
        if let Some(id) = self.scalar_consts.get(&(ty, bits)) {
            return *id;
        }
        let id = self.alloc();
        let words: &[u32] = if two_words {
            &[bits as u32, (bits >> 32) as u32]
        } else {
            &[bits as u32]
        };
        InstrBuilder::new(Op::Constant)
            .push(ty)
            .push(id)
            .push_list(words)
            .write_into(&mut self.sec_types_consts);
        self.scalar_consts.insert((ty, bits), id);
        id
    }

    fn const_id(&mut self, id: Id) -> Result<u32> {
        if self.emitted_consts.contains(&id) {
            return Ok(self.val(id));
        }
        let constant = self
            .m
            .constant(id)
            .unwrap_or_else(|| panic!("constant %{} is not in the pool", id));
        self.emitted_consts.insert(id);
        let spv_id = self.emit_constant(constant)?;
        self.val_map[id as usize] = spv_id;
        Ok(spv_id)
    }

    fn emit_constant(&mut self, constant: &Constant) -> Result<u32> {
        let ty = self.ty(constant.ty)?;
        let is_spec = constant.spec_id.is_some();

        let id = match &constant.value {
            ConstValue::Bool(x) => {
                let op = match (*x, is_spec) {
                    (true, false) => Op::ConstantTrue,
                    (false, false) => Op::ConstantFalse,
                    (true, true) => Op::SpecConstantTrue,
                    (false, true) => Op::SpecConstantFalse,
                };
                let id = self.alloc();
                InstrBuilder::new(op)
                    .push(ty)
                    .push(id)
                    .write_into(&mut self.sec_types_consts);
                id
            }
            ConstValue::Composite(components) => {
                // Components first so the composite never forward-references.
                let mut ids = Vec::with_capacity(components.len());
                for component in components {
                    ids.push(self.const_id(*component)?);
                }
                let op = if is_spec {
                    Op::SpecConstantComposite
                } else {
                    Op::ConstantComposite
                };
                let id = self.alloc();
                InstrBuilder::new(op)
                    .push(ty)
                    .push(id)
                    .push_list(&ids)
                    .write_into(&mut self.sec_types_consts);
                id
            }
            ConstValue::Null => {
                let id = self.alloc();
                InstrBuilder::new(Op::ConstantNull)
                    .push(ty)
                    .push(id)
                    .write_into(&mut self.sec_types_consts);
                id
            }
            value => {
                let words = value
                    .words()
                    .unwrap_or_else(|| panic!("scalar constant without a payload"));
                if is_spec {
                    let id = self.alloc();
                    InstrBuilder::new(Op::SpecConstant)
                        .push(ty)
                        .push(id)
                        .push_list(&words)
                        .write_into(&mut self.sec_types_consts);
                    id
                } else {
                    let bits = match words.len() {
                        1 => words[0] as u64,
                        _ => (words[0] as u64) | ((words[1] as u64) << 32),
                    };
                    self.scalar_const(ty, bits, words.len() == 2)
                }
            }
        };

        if let Some(spec_id) = constant.spec_id {
            InstrBuilder::new(Op::Decorate)
                .push(id)
                .push(Decoration::SpecId as u32)
                .push(spec_id)
                .write_into(&mut self.sec_annotations);
        }
        if self.opts.debug_names {
            if let Some(name) = &constant.name {
                InstrBuilder::new(Op::Name)
                    .push(id)
                    .push_str(name)
                    .write_into(&mut self.sec_debug_names);
            }
        }
        Ok(id)
    }

    // Globals.

    fn emit_global(&mut self, global: &GlobalVar) -> Result<()> {
        let ptr_ty = self.ty(global.ty)?;
        let id = self.val(global.id);
        let class = storage_class(global.space);

        let mut builder = InstrBuilder::new(Op::Variable)
            .push(ptr_ty)
            .push(id)
            .push(class as u32);
        if let Some(init) = global.init {
            let init = self.const_id(init)?;
            builder = builder.push(init);
        }
        builder.write_into(&mut self.sec_globals);

        // Buffer roots carry the Block decoration once per struct type.
        if matches!(global.space, AddressSpace::Uniform | AddressSpace::Storage) {
            let pointee = self
                .m
                .ty(global.ty)
                .as_pointer()
                .unwrap_or_else(|| panic!("global %{} is not pointer-typed", global.id))
                .pointee;
            if !self.m.ty(pointee).is_struct() {
                return Err(invalid(format!(
                    "buffer global %{} must point at a struct",
                    global.id
                )));
            }
            let struct_id = self.ty(pointee)?;
            if self.block_decorated.insert(struct_id) {
                InstrBuilder::new(Op::Decorate)
                    .push(struct_id)
                    .push(Decoration::Block as u32)
                    .write_into(&mut self.sec_annotations);
            }
        }

        if let (Some(group), Some(binding)) = (global.group, global.binding) {
            InstrBuilder::new(Op::Decorate)
                .push(id)
                .push(Decoration::DescriptorSet as u32)
                .push(group)
                .write_into(&mut self.sec_annotations);
            InstrBuilder::new(Op::Decorate)
                .push(id)
                .push(Decoration::Binding as u32)
                .push(binding)
                .write_into(&mut self.sec_annotations);
        }
        if let Some(location) = global.location {
            InstrBuilder::new(Op::Decorate)
                .push(id)
                .push(Decoration::Location as u32)
                .push(location)
                .write_into(&mut self.sec_annotations);
        }
        if let Some(builtin) = global.builtin {
            InstrBuilder::new(Op::Decorate)
                .push(id)
                .push(Decoration::BuiltIn as u32)
                .push(builtin as u32)
                .write_into(&mut self.sec_annotations);
        }
        if self.opts.debug_names {
            if let Some(name) = &global.name {
                InstrBuilder::new(Op::Name)
                    .push(id)
                    .push_str(name)
                    .write_into(&mut self.sec_debug_names);
            }
        }
        Ok(())
    }

    // Entry points.

    fn emit_entry_point(&mut self, entry: &EntryPoint) -> Result<()> {
        let exec_model = match entry.stage {
            Stage::Vertex => ExecutionModel::Vertex,
            Stage::Fragment => ExecutionModel::Fragment,
            Stage::Compute => ExecutionModel::GLCompute,
        };
        let func = self.val(entry.func);
        let mut builder = InstrBuilder::new(Op::EntryPoint)
            .push(exec_model as u32)
            .push(func)
            .push_str(&entry.name);
        for id in entry.interface.iter() {
            let var = self.val(*id);
            builder = builder.push(var);
        }
        builder.write_into(&mut self.sec_entry_points);

        match entry.stage {
            Stage::Fragment => {
                if entry.origin_upper_left {
                    InstrBuilder::new(Op::ExecutionMode)
                        .push(func)
                        .push(ExecutionMode::OriginUpperLeft as u32)
                        .write_into(&mut self.sec_exec_modes);
                }
                if entry.depth_replacing {
                    InstrBuilder::new(Op::ExecutionMode)
                        .push(func)
                        .push(ExecutionMode::DepthReplacing as u32)
                        .write_into(&mut self.sec_exec_modes);
                }
                if entry.early_fragment_tests {
                    InstrBuilder::new(Op::ExecutionMode)
                        .push(func)
                        .push(ExecutionMode::EarlyFragmentTests as u32)
                        .write_into(&mut self.sec_exec_modes);
                }
            }
            Stage::Compute => {
                let [x, y, z] = entry.workgroup_size;
                InstrBuilder::new(Op::ExecutionMode)
                    .push(func)
                    .push(ExecutionMode::LocalSize as u32)
                    .push(x)
                    .push(y)
                    .push(z)
                    .write_into(&mut self.sec_exec_modes);
            }
            Stage::Vertex => {}
        }
        Ok(())
    }

    // Functions.

    fn emit_function(&mut self, func: &Function) -> Result<()> {
        let ret = self.ty(func.ret_ty)?;
        let param_tys = func
            .params
            .iter()
            .map(|x| self.ty(x.ty))
            .collect::<Result<Vec<_>>>()?;
        let fn_ty = self.fn_ty(ret, &param_tys);
        let fn_id = self.val(func.id);

        InstrBuilder::new(Op::Function)
            .push(ret)
            .push(fn_id)
            .push(spirv::FunctionControl::NONE.bits())
            .push(fn_ty)
            .write_into(&mut self.sec_functions);
        for (param, ty) in func.params.iter().zip(param_tys.iter()) {
            let id = self.val(param.id);
            InstrBuilder::new(Op::FunctionParameter)
                .push(*ty)
                .push(id)
                .write_into(&mut self.sec_functions);
            if self.opts.debug_names {
                if let Some(name) = &param.name {
                    InstrBuilder::new(Op::Name)
                        .push(id)
                        .push_str(name)
                        .write_into(&mut self.sec_debug_names);
                }
            }
        }
        if self.opts.debug_names {
            if let Some(name) = &func.name {
                InstrBuilder::new(Op::Name)
                    .push(fn_id)
                    .push_str(name)
                    .write_into(&mut self.sec_debug_names);
            }
        }

        for (block_idx, block) in func.blocks.iter().enumerate() {
            let label = self.val(block.id);
            InstrBuilder::new(Op::Label)
                .push(label)
                .write_into(&mut self.sec_functions);
            if block_idx == 0 {
                // Function-scope variables live at the head of the entry
                // block.
                for local in func.locals.iter() {
                    let ptr_ty = self.ty(local.ty)?;
                    let id = self.val(local.id);
                    let mut builder = InstrBuilder::new(Op::Variable)
                        .push(ptr_ty)
                        .push(id)
                        .push(spirv::StorageClass::Function as u32);
                    if let Some(init) = local.init {
                        let init = self.const_id(init)?;
                        builder = builder.push(init);
                    }
                    builder.write_into(&mut self.sec_functions);
                    if self.opts.debug_names {
                        if let Some(name) = &local.name {
                            InstrBuilder::new(Op::Name)
                                .push(id)
                                .push_str(name)
                                .write_into(&mut self.sec_debug_names);
                        }
                    }
                }
            }
            for instr in block.instrs.iter() {
                self.emit_instr(instr)?;
            }
        }
        InstrBuilder::new(Op::FunctionEnd).write_into(&mut self.sec_functions);
        Ok(())
    }

    // Instruction dispatch helpers.

    fn val_ty(&self, id: Id) -> TypeId {
        self.m
            .value_type(id)
            .unwrap_or_else(|| panic!("value %{} has no recorded type", id))
    }

    fn scalar_class(&self, ty: TypeId) -> ScalarClass {
        let elem = match self.m.ty(ty) {
            Type::Vector(x) => x.elem,
            Type::Matrix(x) => match self.m.ty(x.column) {
                Type::Vector(v) => v.elem,
                _ => x.column,
            },
            _ => ty,
        };
        match self.m.ty(elem) {
            Type::Bool => ScalarClass::Bool,
            Type::Int {
                is_signed: true, ..
            } => ScalarClass::Signed,
            Type::Int { .. } => ScalarClass::Unsigned,
            Type::Float { .. } => ScalarClass::Float,
            _ => ScalarClass::Other,
        }
    }

    fn result_pair(&mut self, instr: &Instr) -> Result<(u32, u32)> {
        let ty = instr
            .ty
            .unwrap_or_else(|| panic!("{:?} without a result type", instr.op));
        let ty = self.ty(ty)?;
        let result = instr
            .result
            .unwrap_or_else(|| panic!("{:?} without a result id", instr.op));
        Ok((ty, self.val(result)))
    }

    fn simple(&mut self, op: Op, instr: &Instr) -> Result<()> {
        let (ty, result) = self.result_pair(instr)?;
        let mut builder = InstrBuilder::new(op).push(ty).push(result);
        for arg in instr.args.iter() {
            let arg = self.val(*arg);
            builder = builder.push(arg);
        }
        builder.write_into(&mut self.sec_functions);
        Ok(())
    }

    fn emit_instr(&mut self, instr: &Instr) -> Result<()> {
        match instr.op {
            Opcode::Add | Opcode::Sub | Opcode::Mul => self.emit_arith(instr),
            Opcode::Div => {
                let op = match self.scalar_class(self.val_ty(instr.args[0])) {
                    ScalarClass::Float => Op::FDiv,
                    ScalarClass::Signed => Op::SDiv,
                    ScalarClass::Unsigned => Op::UDiv,
                    _ => panic!("div on a non-numeric operand"),
                };
                self.simple(op, instr)
            }
            Opcode::Mod => {
                let op = match self.scalar_class(self.val_ty(instr.args[0])) {
                    ScalarClass::Float => Op::FMod,
                    ScalarClass::Signed => Op::SMod,
                    ScalarClass::Unsigned => Op::UMod,
                    _ => panic!("mod on a non-numeric operand"),
                };
                self.simple(op, instr)
            }
            Opcode::Rem => {
                let op = match self.scalar_class(self.val_ty(instr.args[0])) {
                    ScalarClass::Float => Op::FRem,
                    ScalarClass::Signed => Op::SRem,
                    ScalarClass::Unsigned => Op::UMod,
                    _ => panic!("rem on a non-numeric operand"),
                };
                self.simple(op, instr)
            }
            Opcode::Neg => {
                let op = match self.scalar_class(self.val_ty(instr.args[0])) {
                    ScalarClass::Float => Op::FNegate,
                    ScalarClass::Signed | ScalarClass::Unsigned => Op::SNegate,
                    _ => panic!("neg on a non-numeric operand"),
                };
                self.simple(op, instr)
            }
            Opcode::MatMul => self.emit_matmul(instr),
            Opcode::MatTranspose => self.simple(Op::Transpose, instr),
            Opcode::BitAnd => self.simple(Op::BitwiseAnd, instr),
            Opcode::BitOr => self.simple(Op::BitwiseOr, instr),
            Opcode::BitXor => self.simple(Op::BitwiseXor, instr),
            Opcode::BitNot => self.simple(Op::Not, instr),
            Opcode::Shl => self.simple(Op::ShiftLeftLogical, instr),
            Opcode::Shr => {
                let op = match self.scalar_class(self.val_ty(instr.args[0])) {
                    ScalarClass::Signed => Op::ShiftRightArithmetic,
                    _ => Op::ShiftRightLogical,
                };
                self.simple(op, instr)
            }
            Opcode::ShrLogical => self.simple(Op::ShiftRightLogical, instr),
            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                self.emit_compare(instr)
            }
            Opcode::And => self.simple(Op::LogicalAnd, instr),
            Opcode::Or => self.simple(Op::LogicalOr, instr),
            Opcode::Not => self.simple(Op::LogicalNot, instr),
            Opcode::Construct => self.simple(Op::CompositeConstruct, instr),
            Opcode::Splat => {
                let (ty, result) = self.result_pair(instr)?;
                let count = match self.m.ty(instr.ty.unwrap()) {
                    Type::Vector(x) => x.count,
                    _ => panic!("splat into a non-vector type"),
                };
                let scalar = self.val(instr.args[0]);
                let mut builder = InstrBuilder::new(Op::CompositeConstruct)
                    .push(ty)
                    .push(result);
                for _ in 0..count {
                    builder = builder.push(scalar);
                }
                builder.write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Extract => {
                let (ty, result) = self.result_pair(instr)?;
                let composite = self.val(instr.args[0]);
                InstrBuilder::new(Op::CompositeExtract)
                    .push(ty)
                    .push(result)
                    .push(composite)
                    .push_list(&instr.extra)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Insert => {
                let (ty, result) = self.result_pair(instr)?;
                let object = self.val(instr.args[0]);
                let composite = self.val(instr.args[1]);
                InstrBuilder::new(Op::CompositeInsert)
                    .push(ty)
                    .push(result)
                    .push(object)
                    .push(composite)
                    .push_list(&instr.extra)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Shuffle => {
                let (ty, result) = self.result_pair(instr)?;
                let a = self.val(instr.args[0]);
                let b = self.val(instr.args[1]);
                InstrBuilder::new(Op::VectorShuffle)
                    .push(ty)
                    .push(result)
                    .push(a)
                    .push(b)
                    .push_list(&instr.extra)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::ExtractDyn => self.simple(Op::VectorExtractDynamic, instr),
            Opcode::InsertDyn => self.simple(Op::VectorInsertDynamic, instr),
            Opcode::Load => self.simple(Op::Load, instr),
            Opcode::Store => {
                let ptr = self.val(instr.args[0]);
                let value = self.val(instr.args[1]);
                InstrBuilder::new(Op::Store)
                    .push(ptr)
                    .push(value)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Access => self.simple(Op::AccessChain, instr),
            Opcode::ArrayLen => {
                let (ty, result) = self.result_pair(instr)?;
                let ptr = self.val(instr.args[0]);
                InstrBuilder::new(Op::ArrayLength)
                    .push(ty)
                    .push(result)
                    .push(ptr)
                    .push(instr.extra[0])
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Branch => {
                let target = self.val(instr.args[0]);
                InstrBuilder::new(Op::Branch)
                    .push(target)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::BranchCond => {
                let cond = self.val(instr.args[0]);
                let then_blk = self.val(instr.args[1]);
                let else_blk = self.val(instr.args[2]);
                InstrBuilder::new(Op::BranchConditional)
                    .push(cond)
                    .push(then_blk)
                    .push(else_blk)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Switch => {
                let selector = self.val(instr.args[0]);
                let default = self.val(instr.args[1]);
                let mut builder = InstrBuilder::new(Op::Switch).push(selector).push(default);
                for (case, target) in instr.extra.iter().zip(instr.args[2..].iter()) {
                    let target = self.val(*target);
                    builder = builder.push(*case).push(target);
                }
                builder.write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Phi => {
                let (ty, result) = self.result_pair(instr)?;
                let mut builder = InstrBuilder::new(Op::Phi).push(ty).push(result);
                for pair in instr.args.chunks(2) {
                    let value = self.val(pair[0]);
                    let pred = self.val(pair[1]);
                    builder = builder.push(value).push(pred);
                }
                builder.write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Return => {
                let value = self.val(instr.args[0]);
                InstrBuilder::new(Op::ReturnValue)
                    .push(value)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::ReturnVoid => {
                InstrBuilder::new(Op::Return).write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Unreachable => {
                InstrBuilder::new(Op::Unreachable).write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::LoopMerge => {
                let merge = self.val(instr.args[0]);
                let cont = self.val(instr.args[1]);
                InstrBuilder::new(Op::LoopMerge)
                    .push(merge)
                    .push(cont)
                    .push(spirv::LoopControl::NONE.bits())
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::SelectionMerge => {
                let merge = self.val(instr.args[0]);
                InstrBuilder::new(Op::SelectionMerge)
                    .push(merge)
                    .push(spirv::SelectionControl::NONE.bits())
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Discard => {
                InstrBuilder::new(Op::Kill).write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Call => {
                let (ty, result) = self.result_pair(instr)?;
                let callee = self.val(instr.args[0]);
                let mut builder = InstrBuilder::new(Op::FunctionCall)
                    .push(ty)
                    .push(result)
                    .push(callee);
                for arg in instr.args[1..].iter() {
                    let arg = self.val(*arg);
                    builder = builder.push(arg);
                }
                builder.write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::Builtin => self.emit_builtin(instr),
            Opcode::Convert => self.emit_convert(instr),
            Opcode::Bitcast => self.simple(Op::Bitcast, instr),
            Opcode::TexSample
            | Opcode::TexSampleOffset
            | Opcode::TexSampleBias
            | Opcode::TexSampleBiasOffset
            | Opcode::TexSampleLevel
            | Opcode::TexSampleLevelOffset
            | Opcode::TexSampleGrad
            | Opcode::TexSampleGradOffset
            | Opcode::TexSampleCmp
            | Opcode::TexSampleCmpOffset
            | Opcode::TexSampleCmpLevel
            | Opcode::TexSampleCmpLevelOffset
            | Opcode::TexGather
            | Opcode::TexGatherOffset
            | Opcode::TexGatherCmp => self.emit_tex_sample(instr),
            Opcode::TexLoad => self.emit_tex_load(instr),
            Opcode::TexStore => {
                let tex = self.val(instr.args[0]);
                let coord = self.val(instr.args[1]);
                let value = self.val(instr.args[2]);
                InstrBuilder::new(Op::ImageWrite)
                    .push(tex)
                    .push(coord)
                    .push(value)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::TexSize => self.emit_tex_size(instr),
            Opcode::TexQueryLod => {
                self.require_cap(Capability::ImageQuery);
                let (ty, result) = self.result_pair(instr)?;
                let image_ty = self.ty(self.val_ty(instr.args[0]))?;
                let sampled_ty = self.sampled_image_ty(image_ty);
                let tex = self.val(instr.args[0]);
                let sampler = self.val(instr.args[1]);
                let coord = self.val(instr.args[2]);
                let sampled = self.alloc();
                InstrBuilder::new(Op::SampledImage)
                    .push(sampled_ty)
                    .push(sampled)
                    .push(tex)
                    .push(sampler)
                    .write_into(&mut self.sec_functions);
                InstrBuilder::new(Op::ImageQueryLod)
                    .push(ty)
                    .push(result)
                    .push(sampled)
                    .push(coord)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            Opcode::TexQueryLevels => {
                self.require_cap(Capability::ImageQuery);
                self.simple(Op::ImageQueryLevels, instr)
            }
            Opcode::TexQuerySamples => {
                self.require_cap(Capability::ImageQuery);
                self.simple(Op::ImageQuerySamples, instr)
            }
            Opcode::Barrier => self.emit_barrier(instr),
            Opcode::Atomic => self.emit_atomic(instr),
        }
    }

    /// Wrapping integer arithmetic detours signed operands through the
    /// unsigned type so SPIR-V validation never sees a signed overflow.
    fn emit_arith(&mut self, instr: &Instr) -> Result<()> {
        let operand_ty = self.val_ty(instr.args[0]);
        let class = self.scalar_class(operand_ty);
        let float_op = match instr.op {
            Opcode::Add => Op::FAdd,
            Opcode::Sub => Op::FSub,
            _ => Op::FMul,
        };
        let int_op = match instr.op {
            Opcode::Add => Op::IAdd,
            Opcode::Sub => Op::ISub,
            _ => Op::IMul,
        };
        match class {
            ScalarClass::Float => {
                if instr.op == Opcode::Mul {
                    // A float multiply with mixed shapes is vector * scalar.
                    let a_ty = self.m.ty(self.val_ty(instr.args[0])).clone();
                    let b_ty = self.m.ty(self.val_ty(instr.args[1])).clone();
                    if a_ty.is_vector() && b_ty.is_float() {
                        return self.simple(Op::VectorTimesScalar, instr);
                    }
                }
                self.simple(float_op, instr)
            }
            ScalarClass::Unsigned => self.simple(int_op, instr),
            ScalarClass::Signed => {
                let (ty, result) = self.result_pair(instr)?;
                let uty = self.unsigned_twin(operand_ty);
                let a = self.val(instr.args[0]);
                let b = self.val(instr.args[1]);
                let ua = self.alloc();
                InstrBuilder::new(Op::Bitcast)
                    .push(uty)
                    .push(ua)
                    .push(a)
                    .write_into(&mut self.sec_functions);
                let ub = self.alloc();
                InstrBuilder::new(Op::Bitcast)
                    .push(uty)
                    .push(ub)
                    .push(b)
                    .write_into(&mut self.sec_functions);
                let uresult = self.alloc();
                InstrBuilder::new(int_op)
                    .push(uty)
                    .push(uresult)
                    .push(ua)
                    .push(ub)
                    .write_into(&mut self.sec_functions);
                InstrBuilder::new(Op::Bitcast)
                    .push(ty)
                    .push(result)
                    .push(uresult)
                    .write_into(&mut self.sec_functions);
                Ok(())
            }
            _ => panic!("arithmetic on a non-numeric operand"),
        }
    }

    fn emit_matmul(&mut self, instr: &Instr) -> Result<()> {
        let a_ty = self.m.ty(self.val_ty(instr.args[0])).clone();
        let b_ty = self.m.ty(self.val_ty(instr.args[1])).clone();
        let (op, swap) = match (&a_ty, &b_ty) {
            (Type::Matrix(_), Type::Matrix(_)) => (Op::MatrixTimesMatrix, false),
            (Type::Matrix(_), Type::Vector(_)) => (Op::MatrixTimesVector, false),
            (Type::Vector(_), Type::Matrix(_)) => (Op::VectorTimesMatrix, false),
            (Type::Matrix(_), _) => (Op::MatrixTimesScalar, false),
            (_, Type::Matrix(_)) => (Op::MatrixTimesScalar, true),
            _ => panic!("matmul without a matrix operand"),
        };
        let (ty, result) = self.result_pair(instr)?;
        let mut a = self.val(instr.args[0]);
        let mut b = self.val(instr.args[1]);
        if swap {
            std::mem::swap(&mut a, &mut b);
        }
        InstrBuilder::new(op)
            .push(ty)
            .push(result)
            .push(a)
            .push(b)
            .write_into(&mut self.sec_functions);
        Ok(())
    }

    fn emit_compare(&mut self, instr: &Instr) -> Result<()> {
        use Opcode::*;
        let class = self.scalar_class(self.val_ty(instr.args[0]));
        let op = match (instr.op, class) {
            (Eq, ScalarClass::Bool) => Op::LogicalEqual,
            (Ne, ScalarClass::Bool) => Op::LogicalNotEqual,
            (Eq, ScalarClass::Float) => Op::FOrdEqual,
            (Ne, ScalarClass::Float) => Op::FOrdNotEqual,
            (Lt, ScalarClass::Float) => Op::FOrdLessThan,
            (Le, ScalarClass::Float) => Op::FOrdLessThanEqual,
            (Gt, ScalarClass::Float) => Op::FOrdGreaterThan,
            (Ge, ScalarClass::Float) => Op::FOrdGreaterThanEqual,
            (Eq, _) => Op::IEqual,
            (Ne, _) => Op::INotEqual,
            (Lt, ScalarClass::Signed) => Op::SLessThan,
            (Le, ScalarClass::Signed) => Op::SLessThanEqual,
            (Gt, ScalarClass::Signed) => Op::SGreaterThan,
            (Ge, ScalarClass::Signed) => Op::SGreaterThanEqual,
            (Lt, _) => Op::ULessThan,
            (Le, _) => Op::ULessThanEqual,
            (Gt, _) => Op::UGreaterThan,
            (Ge, _) => Op::UGreaterThanEqual,
            _ => unreachable!(),
        };
        self.simple(op, instr)
    }

    fn emit_convert(&mut self, instr: &Instr) -> Result<()> {
        let src = self.scalar_class(self.val_ty(instr.args[0]));
        let dst_ty = instr.ty.unwrap();
        let dst = self.scalar_class(dst_ty);
        let src_bits = self.scalar_bits(self.val_ty(instr.args[0]));
        let dst_bits = self.scalar_bits(dst_ty);
        let op = match (src, dst) {
            (ScalarClass::Float, ScalarClass::Float) => Op::FConvert,
            (ScalarClass::Float, ScalarClass::Signed) => Op::ConvertFToS,
            (ScalarClass::Float, ScalarClass::Unsigned) => Op::ConvertFToU,
            (ScalarClass::Signed, ScalarClass::Float) => Op::ConvertSToF,
            (ScalarClass::Unsigned, ScalarClass::Float) => Op::ConvertUToF,
            (ScalarClass::Signed, ScalarClass::Signed) => Op::SConvert,
            (ScalarClass::Unsigned, ScalarClass::Unsigned) => Op::UConvert,
            (ScalarClass::Signed, ScalarClass::Unsigned)
            | (ScalarClass::Unsigned, ScalarClass::Signed) => {
                if src_bits == dst_bits {
                    Op::Bitcast
                } else {
                    return Err(unsupported(
                        "conversion changing both width and signedness",
                    ));
                }
            }
            _ => return Err(unsupported("conversion involving bool")),
        };
        self.simple(op, instr)
    }

    fn scalar_bits(&self, ty: TypeId) -> u32 {
        let elem = match self.m.ty(ty) {
            Type::Vector(x) => x.elem,
            _ => ty,
        };
        match self.m.ty(elem) {
            Type::Int { bits, .. } | Type::Float { bits } => *bits,
            _ => 0,
        }
    }

    fn emit_builtin(&mut self, instr: &Instr) -> Result<()> {
        let f = instr
            .extra
            .first()
            .and_then(|x| BuiltinFn::from_u32(*x))
            .unwrap_or_else(|| panic!("builtin call without a catalog id"));

        // Native SPIR-V opcodes first.
        let native = match f {
            BuiltinFn::Dot => Some(Op::Dot),
            BuiltinFn::All => Some(Op::All),
            BuiltinFn::Any => Some(Op::Any),
            BuiltinFn::Select => Some(Op::Select),
            BuiltinFn::Dpdx => Some(Op::DPdx),
            BuiltinFn::Dpdy => Some(Op::DPdy),
            BuiltinFn::Fwidth => Some(Op::Fwidth),
            BuiltinFn::IsInf => Some(Op::IsInf),
            BuiltinFn::IsNan => Some(Op::IsNan),
            _ => None,
        };
        if let Some(op) = native {
            return self.simple(op, instr);
        }

        let class = self.scalar_class(self.val_ty(instr.args[0]));
        use BuiltinFn::*;
        let glop = match (f, class) {
            (Abs, ScalarClass::Float) => GLOp::FAbs,
            (Abs, _) => GLOp::SAbs,
            (Sign, ScalarClass::Float) => GLOp::FSign,
            (Sign, _) => GLOp::SSign,
            (Min, ScalarClass::Float) => GLOp::FMin,
            (Min, ScalarClass::Signed) => GLOp::SMin,
            (Min, _) => GLOp::UMin,
            (Max, ScalarClass::Float) => GLOp::FMax,
            (Max, ScalarClass::Signed) => GLOp::SMax,
            (Max, _) => GLOp::UMax,
            (Clamp, ScalarClass::Float) => GLOp::FClamp,
            (Clamp, ScalarClass::Signed) => GLOp::SClamp,
            (Clamp, _) => GLOp::UClamp,
            (Mix, _) => GLOp::FMix,
            (Acos, _) => GLOp::Acos,
            (Asin, _) => GLOp::Asin,
            (Atan, _) => GLOp::Atan,
            (Atan2, _) => GLOp::Atan2,
            (Ceil, _) => GLOp::Ceil,
            (Cos, _) => GLOp::Cos,
            (Cosh, _) => GLOp::Cosh,
            (Cross, _) => GLOp::Cross,
            (Degrees, _) => GLOp::Degrees,
            (Determinant, _) => GLOp::Determinant,
            (Distance, _) => GLOp::Distance,
            (Exp, _) => GLOp::Exp,
            (Exp2, _) => GLOp::Exp2,
            (FaceForward, _) => GLOp::FaceForward,
            (Floor, _) => GLOp::Floor,
            (Fma, _) => GLOp::Fma,
            (Fract, _) => GLOp::Fract,
            (InverseSqrt, _) => GLOp::InverseSqrt,
            (Length, _) => GLOp::Length,
            (Log, _) => GLOp::Log,
            (Log2, _) => GLOp::Log2,
            (Normalize, _) => GLOp::Normalize,
            (Pow, _) => GLOp::Pow,
            (Radians, _) => GLOp::Radians,
            (Reflect, _) => GLOp::Reflect,
            (Refract, _) => GLOp::Refract,
            (Round, _) => GLOp::RoundEven,
            (Sin, _) => GLOp::Sin,
            (Sinh, _) => GLOp::Sinh,
            (SmoothStep, _) => GLOp::SmoothStep,
            (Sqrt, _) => GLOp::Sqrt,
            (Step, _) => GLOp::Step,
            (Tan, _) => GLOp::Tan,
            (Tanh, _) => GLOp::Tanh,
            (Trunc, _) => GLOp::Trunc,
            (Pack4x8Snorm, _) => GLOp::PackSnorm4x8,
            (Pack4x8Unorm, _) => GLOp::PackUnorm4x8,
            (Pack2x16Snorm, _) => GLOp::PackSnorm2x16,
            (Pack2x16Unorm, _) => GLOp::PackUnorm2x16,
            (Pack2x16Float, _) => GLOp::PackHalf2x16,
            (Unpack4x8Snorm, _) => GLOp::UnpackSnorm4x8,
            (Unpack4x8Unorm, _) => GLOp::UnpackUnorm4x8,
            (Unpack2x16Snorm, _) => GLOp::UnpackSnorm2x16,
            (Unpack2x16Unorm, _) => GLOp::UnpackUnorm2x16,
            (Unpack2x16Float, _) => GLOp::UnpackHalf2x16,
            _ => {
                return Err(unsupported(format!(
                    "intrinsic {} has no SPIR-V mapping",
                    f.name()
                )))
            }
        };
        let set = self.glsl_set();
        let (ty, result) = self.result_pair(instr)?;
        let mut builder = InstrBuilder::new(Op::ExtInst)
            .push(ty)
            .push(result)
            .push(set)
            .push(glop as u32);
        for arg in instr.args.iter() {
            let arg = self.val(*arg);
            builder = builder.push(arg);
        }
        builder.write_into(&mut self.sec_functions);
        Ok(())
    }

    fn emit_tex_sample(&mut self, instr: &Instr) -> Result<()> {
        use spirv::ImageOperands;
        let (ty, result) = self.result_pair(instr)?;
        let image_ty = self.ty(self.val_ty(instr.args[0]))?;
        let sampled_ty = self.sampled_image_ty(image_ty);
        let tex = self.val(instr.args[0]);
        let sampler = self.val(instr.args[1]);
        let coord = self.val(instr.args[2]);

        let sampled = self.alloc();
        InstrBuilder::new(Op::SampledImage)
            .push(sampled_ty)
            .push(sampled)
            .push(tex)
            .push(sampler)
            .write_into(&mut self.sec_functions);

        // Per-variant layout of the argument tail after [tex, sampler,
        // coord]: dref, then bias/lod/gradients, then the constant offset.
        let tail = &instr.args[3..];
        let (op, has_dref, operand_kind, has_offset) = match instr.op {
            Opcode::TexSample => (Op::ImageSampleImplicitLod, false, TexOperand::None, false),
            Opcode::TexSampleOffset => (Op::ImageSampleImplicitLod, false, TexOperand::None, true),
            Opcode::TexSampleBias => (Op::ImageSampleImplicitLod, false, TexOperand::Bias, false),
            Opcode::TexSampleBiasOffset => {
                (Op::ImageSampleImplicitLod, false, TexOperand::Bias, true)
            }
            Opcode::TexSampleLevel => (Op::ImageSampleExplicitLod, false, TexOperand::Lod, false),
            Opcode::TexSampleLevelOffset => {
                (Op::ImageSampleExplicitLod, false, TexOperand::Lod, true)
            }
            Opcode::TexSampleGrad => (Op::ImageSampleExplicitLod, false, TexOperand::Grad, false),
            Opcode::TexSampleGradOffset => {
                (Op::ImageSampleExplicitLod, false, TexOperand::Grad, true)
            }
            Opcode::TexSampleCmp => (Op::ImageSampleDrefImplicitLod, true, TexOperand::None, false),
            Opcode::TexSampleCmpOffset => {
                (Op::ImageSampleDrefImplicitLod, true, TexOperand::None, true)
            }
            Opcode::TexSampleCmpLevel => {
                (Op::ImageSampleDrefExplicitLod, true, TexOperand::LodZero, false)
            }
            Opcode::TexSampleCmpLevelOffset => {
                (Op::ImageSampleDrefExplicitLod, true, TexOperand::LodZero, true)
            }
            Opcode::TexGather => (Op::ImageGather, false, TexOperand::Component, false),
            Opcode::TexGatherOffset => (Op::ImageGather, false, TexOperand::Component, true),
            Opcode::TexGatherCmp => (Op::ImageDrefGather, true, TexOperand::None, false),
            _ => unreachable!(),
        };

        let mut cursor = 0usize;
        let mut take = || {
            let id = tail.get(cursor).copied();
            cursor += 1;
            id
        };

        let mut builder = InstrBuilder::new(op).push(ty).push(result).push(sampled).push(coord);
        let mut mask = ImageOperands::NONE;
        let mut operand_words: Vec<u32> = Vec::new();

        if has_dref {
            let dref = match take() {
                Some(x) => self.val(x),
                None => panic!("depth comparison sample without a reference operand"),
            };
            builder = builder.push(dref);
        } else if matches!(instr.op, Opcode::TexGather | Opcode::TexGatherOffset) {
            // OpImageGather takes the component right after the coordinate.
            let component = match take() {
                Some(x) => self.val(x),
                None => self.scratch_u32(0),
            };
            builder = builder.push(component);
        }

        match operand_kind {
            TexOperand::None => {}
            TexOperand::Bias => {
                let bias = take().expect("bias sample without a bias operand");
                mask |= ImageOperands::BIAS;
                let bias = self.val(bias);
                operand_words.push(bias);
            }
            TexOperand::Lod => {
                let lod = take().expect("lod sample without a lod operand");
                mask |= ImageOperands::LOD;
                let lod = self.val(lod);
                operand_words.push(lod);
            }
            TexOperand::LodZero => {
                mask |= ImageOperands::LOD;
                let zero = self.scratch_f32(0.0);
                operand_words.push(zero);
            }
            TexOperand::Grad => {
                let ddx = take().expect("gradient sample without ddx");
                let ddy = take().expect("gradient sample without ddy");
                mask |= ImageOperands::GRAD;
                let ddx = self.val(ddx);
                let ddy = self.val(ddy);
                operand_words.push(ddx);
                operand_words.push(ddy);
            }
            TexOperand::Component => {}
        }
        if has_offset {
            let offset = take().expect("offset sample without an offset operand");
            mask |= ImageOperands::CONST_OFFSET;
            let offset = self.val(offset);
            operand_words.push(offset);
        }

        if !mask.is_empty() {
            builder = builder.push(mask.bits());
            builder = builder.push_list(&operand_words);
        }
        builder.write_into(&mut self.sec_functions);
        Ok(())
    }

    fn emit_tex_load(&mut self, instr: &Instr) -> Result<()> {
        use spirv::ImageOperands;
        let (ty, result) = self.result_pair(instr)?;
        let tex_ty = self.val_ty(instr.args[0]);
        let tex = self.val(instr.args[0]);
        let coord = self.val(instr.args[1]);
        match self.m.ty(tex_ty).clone() {
            Type::TextureStorage(_) => {
                InstrBuilder::new(Op::ImageRead)
                    .push(ty)
                    .push(result)
                    .push(tex)
                    .push(coord)
                    .write_into(&mut self.sec_functions);
            }
            Type::Texture(x) => {
                let mut builder = InstrBuilder::new(Op::ImageFetch)
                    .push(ty)
                    .push(result)
                    .push(tex)
                    .push(coord);
                if let Some(extra) = instr.args.get(2) {
                    let operand = if x.multisampled {
                        ImageOperands::SAMPLE
                    } else {
                        ImageOperands::LOD
                    };
                    let extra = self.val(*extra);
                    builder = builder.push(operand.bits()).push(extra);
                } else if !x.multisampled {
                    let zero = self.scratch_u32(0);
                    builder = builder.push(ImageOperands::LOD.bits()).push(zero);
                }
                builder.write_into(&mut self.sec_functions);
            }
            _ => return Err(invalid("textureLoad on a non-texture operand")),
        }
        Ok(())
    }

    fn emit_tex_size(&mut self, instr: &Instr) -> Result<()> {
        self.require_cap(Capability::ImageQuery);
        let (ty, result) = self.result_pair(instr)?;
        let tex_ty = self.val_ty(instr.args[0]);
        let tex = self.val(instr.args[0]);
        let needs_lod = matches!(
            self.m.ty(tex_ty),
            Type::Texture(x) if !x.multisampled
        ) || self.m.ty(tex_ty).is_texture_depth();
        if needs_lod {
            let lod = match instr.args.get(1) {
                Some(x) => self.val(*x),
                None => self.scratch_u32(0),
            };
            InstrBuilder::new(Op::ImageQuerySizeLod)
                .push(ty)
                .push(result)
                .push(tex)
                .push(lod)
                .write_into(&mut self.sec_functions);
        } else {
            InstrBuilder::new(Op::ImageQuerySize)
                .push(ty)
                .push(result)
                .push(tex)
                .write_into(&mut self.sec_functions);
        }
        Ok(())
    }

    fn emit_barrier(&mut self, instr: &Instr) -> Result<()> {
        const SCOPE_DEVICE: u32 = 1;
        const SCOPE_WORKGROUP: u32 = 2;
        const ACQUIRE_RELEASE: u32 = 0x8;
        const UNIFORM_MEMORY: u32 = 0x40;
        const WORKGROUP_MEMORY: u32 = 0x100;
        const IMAGE_MEMORY: u32 = 0x800;

        let kind = instr
            .extra
            .first()
            .and_then(|x| BarrierKind::from_u32(*x))
            .unwrap_or_else(|| panic!("barrier without a kind"));
        match kind {
            BarrierKind::Workgroup => {
                let exec = self.scratch_u32(SCOPE_WORKGROUP);
                let mem = self.scratch_u32(SCOPE_WORKGROUP);
                let semantics = self.scratch_u32(ACQUIRE_RELEASE | WORKGROUP_MEMORY);
                InstrBuilder::new(Op::ControlBarrier)
                    .push(exec)
                    .push(mem)
                    .push(semantics)
                    .write_into(&mut self.sec_functions);
            }
            BarrierKind::Storage => {
                let mem = self.scratch_u32(SCOPE_DEVICE);
                let semantics = self.scratch_u32(ACQUIRE_RELEASE | UNIFORM_MEMORY);
                InstrBuilder::new(Op::MemoryBarrier)
                    .push(mem)
                    .push(semantics)
                    .write_into(&mut self.sec_functions);
            }
            BarrierKind::Texture => {
                let mem = self.scratch_u32(SCOPE_DEVICE);
                let semantics = self.scratch_u32(ACQUIRE_RELEASE | IMAGE_MEMORY);
                InstrBuilder::new(Op::MemoryBarrier)
                    .push(mem)
                    .push(semantics)
                    .write_into(&mut self.sec_functions);
            }
        }
        Ok(())
    }

    fn emit_atomic(&mut self, instr: &Instr) -> Result<()> {
        let op = instr
            .extra
            .first()
            .and_then(|x| AtomicOp::from_u32(*x))
            .unwrap_or_else(|| panic!("atomic without an operation"));
        let scope = self.scratch_u32(instr.extra[1]);
        let semantics = self.scratch_u32(instr.extra[2]);
        let ptr = self.val(instr.args[0]);

        if op == AtomicOp::Store {
            let value = self.val(instr.args[1]);
            InstrBuilder::new(Op::AtomicStore)
                .push(ptr)
                .push(scope)
                .push(semantics)
                .push(value)
                .write_into(&mut self.sec_functions);
            return Ok(());
        }

        let (ty, result) = self.result_pair(instr)?;
        let class = self.scalar_class(instr.ty.unwrap());
        let spv_op = match op {
            AtomicOp::Load => Op::AtomicLoad,
            AtomicOp::Add => Op::AtomicIAdd,
            AtomicOp::Sub => Op::AtomicISub,
            AtomicOp::Min if class == ScalarClass::Signed => Op::AtomicSMin,
            AtomicOp::Min => Op::AtomicUMin,
            AtomicOp::Max if class == ScalarClass::Signed => Op::AtomicSMax,
            AtomicOp::Max => Op::AtomicUMax,
            AtomicOp::And => Op::AtomicAnd,
            AtomicOp::Or => Op::AtomicOr,
            AtomicOp::Xor => Op::AtomicXor,
            AtomicOp::Exchange => Op::AtomicExchange,
            AtomicOp::CompareExchange => Op::AtomicCompareExchange,
            AtomicOp::Store => unreachable!(),
        };

        let mut builder = InstrBuilder::new(spv_op)
            .push(ty)
            .push(result)
            .push(ptr)
            .push(scope)
            .push(semantics);
        match op {
            AtomicOp::Load => {}
            AtomicOp::CompareExchange => {
                // (value, comparator) in SSIR; SPIR-V wants the unequal
                // semantics between them.
                let value = self.val(instr.args[1]);
                let comparator = self.val(instr.args[2]);
                builder = builder.push(semantics).push(value).push(comparator);
            }
            _ => {
                let value = self.val(instr.args[1]);
                builder = builder.push(value);
            }
        }
        builder.write_into(&mut self.sec_functions);
        Ok(())
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum ScalarClass {
    Bool,
    Signed,
    Unsigned,
    Float,
    Other,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum TexOperand {
    None,
    Bias,
    Lod,
    LodZero,
    Grad,
    Component,
}

fn storage_class(space: AddressSpace) -> spirv::StorageClass {
    match space {
        AddressSpace::Function => spirv::StorageClass::Function,
        AddressSpace::Private => spirv::StorageClass::Private,
        AddressSpace::Workgroup => spirv::StorageClass::Workgroup,
        AddressSpace::Uniform => spirv::StorageClass::Uniform,
        AddressSpace::UniformConstant => spirv::StorageClass::UniformConstant,
        AddressSpace::Storage => spirv::StorageClass::StorageBuffer,
        AddressSpace::Input => spirv::StorageClass::Input,
        AddressSpace::Output => spirv::StorageClass::Output,
        AddressSpace::PushConstant => spirv::StorageClass::PushConstant,
        AddressSpace::PhysicalStorageBuffer => spirv::StorageClass::PhysicalStorageBuffer,
    }
}

/// Some(true) for signed-integer texel formats, Some(false) for unsigned,
/// None for float formats.
fn format_scalar_is_int(format: spirv::ImageFormat) -> Option<bool> {
    use spirv::ImageFormat::*;
    match format {
        R32i | Rg32i | Rgba32i | Rgba16i | Rgba8i => Some(true),
        R32ui | Rg32ui | Rgba32ui | Rgba16ui | Rgba8ui => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use ssir_core::module::{Block, EntryPoint, Function, GlobalVar};

    /// Iterate `(opcode, operand words)` pairs after the five-word header.
    fn instrs(words: &[u32]) -> Vec<(u32, Vec<u32>)> {
        let mut out = Vec::new();
        let mut cursor = 5;
        while cursor < words.len() {
            let head = words[cursor];
            let count = (head >> 16) as usize;
            assert!(count > 0, "zero-length instruction");
            out.push((head & 0xFFFF, words[cursor + 1..cursor + count].to_vec()));
            cursor += count;
        }
        out
    }

    fn count_op(words: &[u32], op: Op) -> usize {
        instrs(words).iter().filter(|x| x.0 == op as u32).count()
    }

    fn compute_module() -> Module {
        // fn main() { } @compute @workgroup_size(64)
        let mut m = Module::new();
        let void = m.ty_void();
        let fn_id = m.alloc_id();
        let block_id = m.alloc_id();
        let mut block = Block::new(block_id);
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        m.add_function(Function {
            id: fn_id,
            name: Some("main".to_owned()),
            ret_ty: void,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![block],
        });
        let mut entry = EntryPoint::new("main", Stage::Compute, fn_id);
        entry.workgroup_size = [64, 1, 1];
        m.add_entry_point(entry);
        m
    }

    #[test]
    fn test_header_shape() {
        let m = compute_module();
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[1], 0x0001_0300);
        assert_eq!(words[2], 0);
        assert_eq!(words[4], 0);
        // Every id operand stays under the declared bound.
        let bound = words[3];
        for (op, operands) in instrs(&words) {
            if op == Op::TypeVoid as u32 || op == Op::Label as u32 {
                assert!(operands[0] < bound);
            }
        }
    }

    #[test]
    fn test_compute_entry_has_local_size() {
        let m = compute_module();
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        let modes: Vec<_> = instrs(&words)
            .into_iter()
            .filter(|x| x.0 == Op::ExecutionMode as u32)
            .collect();
        assert_eq!(modes.len(), 1);
        assert_eq!(modes[0].1[1], ExecutionMode::LocalSize as u32);
        assert_eq!(&modes[0].1[2..], &[64, 1, 1]);
    }

    #[test]
    fn test_scalar_constant_roundtrip() {
        let mut m = compute_module();
        let values = [1.0f32, -2.5, 0.125, 3.402_823_5e38];
        let ids: Vec<_> = values.iter().map(|x| m.const_f32(*x)).collect();
        let _ = ids;
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        let consts: Vec<_> = instrs(&words)
            .into_iter()
            .filter(|x| x.0 == Op::Constant as u32)
            .map(|x| x.1[2])
            .collect();
        for value in values.iter() {
            assert!(
                consts.contains(&value.to_bits()),
                "missing bit pattern for {}",
                value
            );
        }
    }

    #[test]
    fn test_type_dedup_in_output() {
        // Two composites of the same vector type and a loose scalar: one
        // OpTypeFloat, one OpTypeVector in the output.
        let mut m = compute_module();
        let f32_ty = m.ty_f32();
        let vec2 = m.ty_vec(f32_ty, 2);
        let x = m.const_f32(1.0);
        let y = m.const_f32(2.0);
        let _ = m.const_composite(vec2, vec![x, y]);
        let _ = m.const_composite(vec2, vec![y, x]);
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        assert_eq!(count_op(&words, Op::TypeFloat), 1);
        assert_eq!(count_op(&words, Op::TypeVector), 1);
        assert_eq!(count_op(&words, Op::ConstantComposite), 2);
    }

    #[test]
    fn test_signed_add_detours_through_unsigned() {
        let mut m = Module::new();
        let void = m.ty_void();
        let i32_ty = m.ty_i32();
        let a = m.const_i32(7);
        let b = m.const_i32(35);
        let fn_id = m.alloc_id();
        let block_id = m.alloc_id();
        let result = m.alloc_id();
        m.define_value(result, i32_ty);
        let mut block = Block::new(block_id);
        block.instrs.push(Instr {
            op: Opcode::Add,
            result: Some(result),
            ty: Some(i32_ty),
            args: vec![a, b],
            extra: Vec::new(),
        });
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        m.add_function(Function {
            id: fn_id,
            name: None,
            ret_ty: void,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![block],
        });
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        assert_eq!(count_op(&words, Op::Bitcast), 3);
        assert_eq!(count_op(&words, Op::IAdd), 1);
        // The unsigned twin type is present exactly once.
        let int_types: Vec<_> = instrs(&words)
            .into_iter()
            .filter(|x| x.0 == Op::TypeInt as u32)
            .map(|x| (x.1[1], x.1[2]))
            .collect();
        assert!(int_types.contains(&(32, 1)));
        assert!(int_types.contains(&(32, 0)));
    }

    #[test]
    fn test_block_decoration_on_buffer_struct() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let ra = m.ty_runtime_array(f32_ty, Some(4));
        let wrapper = m.ty_struct(ssir_core::ty::StructType {
            name: None,
            members: vec![ssir_core::ty::StructMember {
                name: None,
                ty: ra,
                offset: 0,
                matrix: None,
            }],
            layout: ssir_core::ty::LayoutRule::Std430,
        });
        let ptr = m.ty_ptr(wrapper, AddressSpace::Storage);
        let var = m.alloc_id();
        m.add_global(GlobalVar {
            id: var,
            name: None,
            ty: ptr,
            space: AddressSpace::Storage,
            group: Some(0),
            binding: Some(0),
            location: None,
            builtin: None,
            init: None,
        });
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        let decorations: Vec<_> = instrs(&words)
            .into_iter()
            .filter(|x| x.0 == Op::Decorate as u32)
            .map(|x| x.1[1])
            .collect();
        assert!(decorations.contains(&(Decoration::Block as u32)));
        assert!(decorations.contains(&(Decoration::DescriptorSet as u32)));
        assert!(decorations.contains(&(Decoration::Binding as u32)));
        assert!(decorations.contains(&(Decoration::ArrayStride as u32)));
    }

    #[test]
    fn test_ext_inst_import_is_lazy() {
        let m = compute_module();
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        assert_eq!(count_op(&words, Op::ExtInstImport), 0);

        // A builtin call pulls the import in.
        let mut m = Module::new();
        let void = m.ty_void();
        let f32_ty = m.ty_f32();
        let x = m.const_f32(0.5);
        let fn_id = m.alloc_id();
        let block_id = m.alloc_id();
        let result = m.alloc_id();
        m.define_value(result, f32_ty);
        let mut block = Block::new(block_id);
        block.instrs.push(
            Instr::with_result(Opcode::Builtin, result, f32_ty)
                .arg(x)
                .imm(BuiltinFn::Sin as u32),
        );
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        m.add_function(Function {
            id: fn_id,
            name: None,
            ret_ty: void,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![block],
        });
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        assert_eq!(count_op(&words, Op::ExtInstImport), 1);
        let ext: Vec<_> = instrs(&words)
            .into_iter()
            .filter(|x| x.0 == Op::ExtInst as u32)
            .collect();
        assert_eq!(ext.len(), 1);
        assert_eq!(ext[0].1[3], GLOp::Sin as u32);
    }

    #[test]
    fn test_origin_upper_left_respects_flag() {
        let mut m = Module::new();
        let void = m.ty_void();
        let fn_id = m.alloc_id();
        let block_id = m.alloc_id();
        let mut block = Block::new(block_id);
        block.instrs.push(Instr::new(Opcode::ReturnVoid));
        m.add_function(Function {
            id: fn_id,
            name: Some("fs".to_owned()),
            ret_ty: void,
            params: Vec::new(),
            locals: Vec::new(),
            blocks: vec![block],
        });
        let mut entry = EntryPoint::new("fs", Stage::Fragment, fn_id);
        entry.origin_upper_left = false;
        m.add_entry_point(entry);
        let words = emit_spirv(&m, &SpvOptions::default()).unwrap();
        assert_eq!(count_op(&words, Op::ExecutionMode), 0);
    }
}
