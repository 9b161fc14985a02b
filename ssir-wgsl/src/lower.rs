//! WGSL to SSIR lowering.
//!
//! Builds a fresh [`Module`] from a parsed program and its resolver. The
//! lowering is strict about types: WGSL has no implicit conversions, so
//! mismatched operand types are reported instead of coerced. The only
//! adaptation performed is literal typing: an untyped literal adopts the type
//! the surrounding expression expects.
use fnv::FnvHashMap as HashMap;
use half::f16;

use ssir_core::constant::{ConstValue, Id};
use ssir_core::instr::{AtomicOp, BarrierKind, BuiltinFn, Instr, Opcode};
use ssir_core::layout;
use ssir_core::module::{
    Block, EntryPoint, Function, FunctionParam, GlobalVar, LocalVar, Module, Stage,
};
use ssir_core::spirv;
use ssir_core::ty::{
    AccessMode, AddressSpace, Dim, ImageFormat, LayoutRule, ScalarKind, StructType, Type, TypeId,
};

use crate::ast::*;
use crate::resolve::{Resolver, StageKind};

/// Closed classification of lowering failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerErrorKind {
    /// The AST is structurally broken; parse errors usually precede this.
    InvalidInput,
    /// A WGSL feature this compiler does not implement.
    Unsupported,
    /// An internal invariant was violated; this is a compiler bug.
    Internal,
}

#[derive(Debug, Clone)]
pub struct LowerError {
    pub kind: LowerErrorKind,
    pub message: String,
}
impl std::fmt::Display for LowerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let kind = match self.kind {
            LowerErrorKind::InvalidInput => "invalid input",
            LowerErrorKind::Unsupported => "unsupported",
            LowerErrorKind::Internal => "internal error",
        };
        write!(f, "{}: {}", kind, self.message)
    }
}
impl std::error::Error for LowerError {}

pub type Result<T> = std::result::Result<T, LowerError>;

fn invalid(message: impl Into<String>) -> LowerError {
    LowerError {
        kind: LowerErrorKind::InvalidInput,
        message: message.into(),
    }
}
fn unsupported(message: impl Into<String>) -> LowerError {
    LowerError {
        kind: LowerErrorKind::Unsupported,
        message: message.into(),
    }
}
fn internal(message: impl Into<String>) -> LowerError {
    LowerError {
        kind: LowerErrorKind::Internal,
        message: message.into(),
    }
}

/// Target environment the module is lowered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEnv {
    Vulkan1_1,
    Vulkan1_2,
    Vulkan1_3,
    WebGpu,
}

/// Buffer packing override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// std140 for uniform, std430 for storage.
    Default,
    Std430,
    Std140,
}

#[derive(Debug, Clone)]
pub struct LowerOptions {
    pub env: TargetEnv,
    pub packing: Packing,
    pub debug_names: bool,
    pub line_info: bool,
    /// Null-initialize function-scope `var`s without initializers.
    pub zero_initialize_vars: bool,
    pub relax_block_layout: bool,
    /// Allow `draw_index`-style builtins from SPV_KHR_shader_draw_parameters.
    pub draw_parameters: bool,
    /// Starting hint for the module's id allocator; 0 picks the default.
    pub id_bound_hint: u32,
}
impl Default for LowerOptions {
    fn default() -> Self {
        LowerOptions {
            env: TargetEnv::Vulkan1_1,
            packing: Packing::Default,
            debug_names: true,
            line_info: false,
            zero_initialize_vars: false,
            relax_block_layout: false,
            draw_parameters: false,
            id_bound_hint: 0,
        }
    }
}

#[derive(Clone, Copy)]
struct GlobalBinding {
    ptr: Id,
    /// Actual pointee, wrapper struct included.
    pointee: TypeId,
    /// Logical type as declared in WGSL.
    inner: TypeId,
    space: AddressSpace,
    /// Whether the declared type was wrapped in a block struct.
    wrapped: bool,
}

#[derive(Clone)]
struct FnSig {
    id: Id,
    ret: TypeId,
    params: Vec<TypeId>,
}

struct PlaceRef {
    base: Id,
    indices: Vec<Id>,
    pointee: TypeId,
    space: AddressSpace,
}

#[derive(Clone, Copy)]
enum Binding {
    /// Immutable `let`/parameter value.
    Value { ty: TypeId, id: Id },
    /// Addressable `var`.
    Ptr {
        pointee: TypeId,
        ptr: Id,
        space: AddressSpace,
    },
}

/// One store target synthesized for an entry-point output.
struct OutputTarget {
    global: Id,
    /// Member of the returned struct feeding this output; `None` stores the
    /// whole return value.
    member: Option<u32>,
    ty: TypeId,
}

struct FuncState {
    blocks: Vec<Block>,
    current: usize,
    locals: Vec<LocalVar>,
    scopes: Vec<HashMap<String, Binding>>,
    ret_ty: TypeId,
    /// Output globals of an entry function; empty for plain functions.
    outputs: Vec<OutputTarget>,
    is_entry: bool,
}
impl FuncState {
    fn terminated(&self) -> bool {
        self.blocks[self.current]
            .instrs
            .last()
            .map(|x| x.op.is_terminator())
            .unwrap_or(false)
    }
    fn current_id(&self) -> Id {
        self.blocks[self.current].id
    }
}

pub struct Lowerer<'a> {
    prog: &'a Program,
    resolver: &'a Resolver,
    opts: &'a LowerOptions,
    module: Module,
    globals: HashMap<String, GlobalBinding>,
    consts: HashMap<String, (TypeId, Id)>,
    struct_tys: HashMap<(String, LayoutRule), TypeId>,
    fn_sigs: HashMap<String, FnSig>,
    next_spec_id: u32,
}

/// Lower a resolved program into a fresh SSIR module.
pub fn lower(prog: &Program, resolver: &Resolver, opts: &LowerOptions) -> Result<Module> {
    let mut lowerer = Lowerer {
        prog,
        resolver,
        opts,
        module: Module::new(),
        globals: HashMap::default(),
        consts: HashMap::default(),
        struct_tys: HashMap::default(),
        fn_sigs: HashMap::default(),
        next_spec_id: 0,
    };
    lowerer.run()?;
    Ok(lowerer.module)
}

impl<'a> Lowerer<'a> {
    fn run(&mut self) -> Result<()> {
        let prog = self.prog;
        if prog.had_error() {
            let first = &prog.errors[0];
            return Err(invalid(format!(
                "source has parse errors: {} at {}:{}",
                first.message, first.line, first.col
            )));
        }
        // Module-scope constants and overrides first: array sizes and
        // workgroup sizes may refer to them.
        for decl in prog.decls.iter() {
            if let Decl::Const(x) = decl {
                self.lower_module_const(x)?;
            }
        }
        for decl in prog.decls.iter() {
            if let Decl::GlobalVar(x) = decl {
                self.lower_global_var(x)?;
            }
        }
        // Signatures before bodies so call order in the source is free.
        for decl in prog.decls.iter() {
            if let Decl::Fn(x) = decl {
                self.register_fn_sig(x)?;
            }
        }
        for (decl_idx, decl) in prog.decls.iter().enumerate() {
            if let Decl::Fn(x) = decl {
                self.lower_fn(decl_idx, x)?;
            }
        }
        Ok(())
    }

    // Types.

    fn scalar_ty_by_name(&mut self, name: &str) -> Option<TypeId> {
        let ty = match name {
            "f32" => self.module.ty_f32(),
            "f16" => self.module.ty_f16(),
            "i32" => self.module.ty_i32(),
            "u32" => self.module.ty_u32(),
            "bool" => self.module.ty_bool(),
            _ => return None,
        };
        Some(ty)
    }

    fn materialize_type(&mut self, ty: &TypeExpr, rule: LayoutRule) -> Result<TypeId> {
        if let Some(scalar) = self.scalar_ty_by_name(&ty.name) {
            return Ok(scalar);
        }
        match ty.name.as_str() {
            "vec2" | "vec3" | "vec4" => {
                let count = ty.name[3..].parse::<u32>().unwrap();
                let elem = match ty.ty_args.first() {
                    Some(arg) => self.materialize_type(arg, rule)?,
                    None => self.module.ty_f32(),
                };
                Ok(self.module.ty_vec(elem, count))
            }
            "mat2x2" | "mat2x3" | "mat2x4" | "mat3x2" | "mat3x3" | "mat3x4" | "mat4x2"
            | "mat4x3" | "mat4x4" => {
                let columns = ty.name[3..4].parse::<u32>().unwrap();
                let rows = ty.name[5..6].parse::<u32>().unwrap();
                let elem = match ty.ty_args.first() {
                    Some(arg) => self.materialize_type(arg, rule)?,
                    None => self.module.ty_f32(),
                };
                let column = self.module.ty_vec(elem, rows);
                Ok(self.module.ty_matrix(column, columns, rows))
            }
            "array" => {
                let elem_expr = ty
                    .ty_args
                    .first()
                    .ok_or_else(|| invalid("array type without an element type"))?;
                let elem = self.materialize_type(elem_expr, rule)?;
                let stride = match rule {
                    LayoutRule::None => None,
                    _ => layout::array_stride_of(&self.module, elem, rule),
                };
                let len = if let Some(len_expr) = ty.expr_args.first() {
                    Some(self.eval_const_index(len_expr)?)
                } else if let Some(len_name) = ty.ty_args.get(1) {
                    let (_, const_id) = *self
                        .consts
                        .get(&len_name.name)
                        .ok_or_else(|| invalid(format!("unknown array length: {}", len_name.name)))?;
                    let value = self
                        .module
                        .constant(const_id)
                        .and_then(|x| const_scalar_u64(&x.value))
                        .ok_or_else(|| invalid("array length is not an integer constant"))?;
                    Some(value as u32)
                } else {
                    None
                };
                match len {
                    Some(len) => Ok(self.module.ty_array(elem, len, stride)),
                    None => Ok(self.module.ty_runtime_array(elem, stride)),
                }
            }
            "atomic" => {
                // Best effort: the wrapper is transparent, the Atomic
                // instruction carries the synchronization semantics.
                let elem = ty
                    .ty_args
                    .first()
                    .ok_or_else(|| invalid("atomic type without an element type"))?;
                self.materialize_type(elem, rule)
            }
            "sampler" => Ok(self.module.ty_sampler()),
            "sampler_comparison" => Ok(self.module.ty_sampler_comparison()),
            "texture_1d" | "texture_2d" | "texture_3d" | "texture_cube" | "texture_2d_array"
            | "texture_cube_array" | "texture_multisampled_2d" => {
                let sampled = match ty.ty_args.first().map(|x| x.name.as_str()) {
                    Some("i32") => ScalarKind::Sint,
                    Some("u32") => ScalarKind::Uint,
                    _ => ScalarKind::Float,
                };
                let (dim, arrayed) = texture_dim(&ty.name)?;
                let multisampled = ty.name.contains("multisampled");
                Ok(self.module.ty_texture(dim, sampled, arrayed, multisampled))
            }
            "texture_depth_2d" | "texture_depth_cube" | "texture_depth_2d_array"
            | "texture_depth_cube_array" | "texture_depth_multisampled_2d" => {
                let (dim, arrayed) = texture_dim(&ty.name)?;
                let multisampled = ty.name.contains("multisampled");
                Ok(self.module.ty_texture_depth(dim, arrayed, multisampled))
            }
            "texture_storage_1d" | "texture_storage_2d" | "texture_storage_3d"
            | "texture_storage_2d_array" => {
                let format = ty
                    .ty_args
                    .first()
                    .and_then(|x| image_format(&x.name))
                    .ok_or_else(|| unsupported("unknown storage texture format"))?;
                let access = match ty.ty_args.get(1).map(|x| x.name.as_str()) {
                    Some("read") => AccessMode::Read,
                    Some("read_write") => AccessMode::ReadWrite,
                    _ => AccessMode::Write,
                };
                let (dim, arrayed) = texture_dim(&ty.name)?;
                Ok(self
                    .module
                    .ty_texture_storage(dim, format, access, arrayed))
            }
            "ptr" => Err(unsupported("pointer-typed values")),
            name => {
                // A user struct.
                if let Some((name, decl_idx)) = self
                    .prog
                    .decls
                    .iter()
                    .enumerate()
                    .find_map(|(i, d)| match d {
                        Decl::Struct(s) if s.name == name => Some((s.name.clone(), i)),
                        _ => None,
                    })
                {
                    self.materialize_struct(&name, decl_idx, rule)
                } else {
                    Err(invalid(format!("unknown type: {}", name)))
                }
            }
        }
    }

    fn materialize_struct(
        &mut self,
        name: &str,
        decl_idx: usize,
        rule: LayoutRule,
    ) -> Result<TypeId> {
        if let Some(id) = self.struct_tys.get(&(name.to_owned(), rule)) {
            return Ok(*id);
        }
        let decl = match &self.prog.decls[decl_idx] {
            Decl::Struct(x) => x.clone(),
            _ => return Err(internal("struct declaration index out of sync")),
        };
        let mut members = Vec::with_capacity(decl.fields.len());
        for field in decl.fields.iter() {
            let ty = self.materialize_type(&field.ty, rule)?;
            members.push((Some(field.name.clone()), ty));
        }
        let (members, _) = layout::lay_out_struct(&self.module, &members, rule)
            .map_err(|e| invalid(e.to_string()))?;
        let ty = self.module.ty_struct(StructType {
            name: Some(decl.name.clone()),
            members,
            layout: rule,
        });
        self.struct_tys.insert((name.to_owned(), rule), ty);
        Ok(ty)
    }

    // Constants.

    fn lower_module_const(&mut self, decl: &ConstDecl) -> Result<()> {
        let annotated = match &decl.ty {
            Some(ty) => Some(self.materialize_type(ty, LayoutRule::None)?),
            None => None,
        };
        match decl.kind {
            VarKind::Const => {
                let init = decl
                    .init
                    .as_ref()
                    .ok_or_else(|| invalid(format!("const {} without initializer", decl.name)))?;
                let (ty, id) = self.eval_const_expr(init, annotated)?;
                self.consts.insert(decl.name.clone(), (ty, id));
            }
            VarKind::Override => {
                let spec_id = self.next_spec_id;
                self.next_spec_id += 1;
                let (ty, value) = match &decl.init {
                    Some(init) => {
                        let (ty, id) = self.eval_const_expr(init, annotated)?;
                        let value = self
                            .module
                            .constant(id)
                            .map(|x| x.value.clone())
                            .ok_or_else(|| internal("override default vanished"))?;
                        (ty, value)
                    }
                    None => {
                        let ty = annotated.ok_or_else(|| {
                            invalid(format!("override {} needs a type or a default", decl.name))
                        })?;
                        (ty, zero_value(self.module.ty(ty))?)
                    }
                };
                let name = self.opts.debug_names.then(|| decl.name.clone());
                let id = self.module.add_spec_const(name, ty, value, spec_id);
                self.consts.insert(decl.name.clone(), (ty, id));
            }
            _ => return Err(invalid("module-scope var/let declaration kind")),
        }
        Ok(())
    }

    /// Evaluate a constant expression to an interned constant. Covers the
    /// forms module-scope constants are made of: literals, references to
    /// other constants, negation and integer arithmetic.
    fn eval_const_expr(&mut self, expr: &Expr, hint: Option<TypeId>) -> Result<(TypeId, Id)> {
        match expr {
            Expr::IntLit(lit) => {
                let value = lit
                    .parse()
                    .ok_or_else(|| invalid(format!("malformed integer literal: {}", lit.lexeme)))?;
                Ok(self.int_const(lit, value, hint))
            }
            Expr::FloatLit(lit) => {
                let value = lit
                    .parse_float()
                    .ok_or_else(|| invalid(format!("malformed float literal: {}", lit.lexeme)))?;
                Ok(self.float_const(lit, value, hint))
            }
            Expr::Ident(ident) => match ident.name.as_str() {
                "true" => {
                    let ty = self.module.ty_bool();
                    Ok((ty, self.module.const_bool(true)))
                }
                "false" => {
                    let ty = self.module.ty_bool();
                    Ok((ty, self.module.const_bool(false)))
                }
                name => self
                    .consts
                    .get(name)
                    .copied()
                    .ok_or_else(|| invalid(format!("{} is not a constant", name))),
            },
            Expr::Unary {
                op: UnOp::Neg,
                expr,
                ..
            } => {
                let (ty, id) = self.eval_const_expr(expr, hint)?;
                let value = self
                    .module
                    .constant(id)
                    .map(|x| x.value.clone())
                    .ok_or_else(|| internal("constant vanished during negation"))?;
                let negated = match value {
                    ConstValue::S32(x) => ConstValue::S32(-x),
                    ConstValue::F32(x) => ConstValue::from(-x.0),
                    ConstValue::F16(x) => ConstValue::from(-x.0),
                    _ => return Err(invalid("cannot negate this constant")),
                };
                Ok((ty, self.module.intern_const(ty, negated)))
            }
            Expr::Binary {
                op, lhs, rhs, ..
            } => {
                let (lty, lid) = self.eval_const_expr(lhs, hint)?;
                let (_, rid) = self.eval_const_expr(rhs, Some(lty))?;
                let lv = self.module.constant(lid).and_then(|x| const_scalar_u64(&x.value));
                let rv = self.module.constant(rid).and_then(|x| const_scalar_u64(&x.value));
                let (lv, rv) = match (lv, rv) {
                    (Some(l), Some(r)) => (l, r),
                    _ => return Err(invalid("constant arithmetic needs integer operands")),
                };
                let value = match op {
                    BinOp::Add => lv + rv,
                    BinOp::Sub => lv.wrapping_sub(rv),
                    BinOp::Mul => lv * rv,
                    BinOp::Div if rv != 0 => lv / rv,
                    _ => return Err(invalid("unsupported constant operator")),
                };
                let value = match self.module.ty(lty) {
                    Type::Int {
                        is_signed: true, ..
                    } => ConstValue::S32(value as i32),
                    _ => ConstValue::U32(value as u32),
                };
                Ok((lty, self.module.intern_const(lty, value)))
            }
            _ => Err(unsupported(format!(
                "{} in constant expression",
                expr.kind_name()
            ))),
        }
    }

    fn eval_const_index(&mut self, expr: &Expr) -> Result<u32> {
        let (_, id) = self.eval_const_expr(expr, None)?;
        self.module
            .constant(id)
            .and_then(|x| const_scalar_u64(&x.value))
            .map(|x| x as u32)
            .ok_or_else(|| invalid("expected an integer constant"))
    }

    fn int_const(&mut self, lit: &LitExpr, value: u64, hint: Option<TypeId>) -> (TypeId, Id) {
        // Suffixes win over the context hint.
        if lit.is_unsigned() {
            let ty = self.module.ty_u32();
            return (ty, self.module.const_u32(value as u32));
        }
        if lit.is_signed_suffixed() {
            let ty = self.module.ty_i32();
            return (ty, self.module.const_i32(value as i64 as i32));
        }
        if let Some(hint) = hint {
            match self.module.ty(hint).clone() {
                Type::Int {
                    bits: 32,
                    is_signed: false,
                } => return (hint, self.module.const_u32(value as u32)),
                Type::Float { bits: 32 } => return (hint, self.module.const_f32(value as f32)),
                Type::Float { bits: 16 } => {
                    return (hint, self.module.const_f16(f16::from_f64(value as f64)))
                }
                _ => {}
            }
        }
        let ty = self.module.ty_i32();
        (ty, self.module.const_i32(value as i32))
    }

    fn float_const(&mut self, lit: &LitExpr, value: f64, hint: Option<TypeId>) -> (TypeId, Id) {
        let half_hinted = matches!(
            hint.map(|x| self.module.ty(x).clone()),
            Some(Type::Float { bits: 16 })
        );
        if lit.is_half() || half_hinted {
            let ty = self.module.ty_f16();
            (ty, self.module.const_f16(f16::from_f64(value)))
        } else {
            let ty = self.module.ty_f32();
            (ty, self.module.const_f32(value as f32))
        }
    }

    // Globals.

    fn lower_global_var(&mut self, decl: &GlobalVarDecl) -> Result<()> {
        let ty_expr = decl
            .ty
            .as_ref()
            .ok_or_else(|| invalid(format!("global {} needs a type", decl.name)))?;
        let space = match decl.qualifiers.first().map(|x| x.as_str()) {
            Some("uniform") => AddressSpace::Uniform,
            Some("storage") => AddressSpace::Storage,
            Some("workgroup") => AddressSpace::Workgroup,
            Some("private") => AddressSpace::Private,
            Some("push_constant") => AddressSpace::PushConstant,
            Some(other) => return Err(invalid(format!("unknown address space: {}", other))),
            None => {
                if is_resource_type(&ty_expr.name) {
                    AddressSpace::UniformConstant
                } else {
                    AddressSpace::Private
                }
            }
        };
        let rule = match (space, self.opts.packing) {
            (AddressSpace::Uniform, Packing::Default) if self.opts.relax_block_layout => {
                LayoutRule::Std430
            }
            (AddressSpace::Uniform, Packing::Default) => LayoutRule::Std140,
            (AddressSpace::Storage, Packing::Default) => LayoutRule::Std430,
            (AddressSpace::Uniform, Packing::Std140)
            | (AddressSpace::Storage, Packing::Std140) => LayoutRule::Std140,
            (AddressSpace::Uniform, Packing::Std430)
            | (AddressSpace::Storage, Packing::Std430) => LayoutRule::Std430,
            _ => LayoutRule::None,
        };
        let inner = self.materialize_type(ty_expr, rule)?;

        // Buffer roots must be block structs; wrap bare types.
        let needs_wrap = matches!(space, AddressSpace::Uniform | AddressSpace::Storage)
            && !self.module.ty(inner).is_struct();
        let pointee = if needs_wrap {
            let (members, _) = layout::lay_out_struct(&self.module, &[(None, inner)], rule)
                .map_err(|e| invalid(e.to_string()))?;
            self.module.ty_struct(StructType {
                name: self
                    .opts
                    .debug_names
                    .then(|| format!("{}_block", decl.name)),
                members,
                layout: rule,
            })
        } else {
            inner
        };

        let ptr_ty = self.module.ty_ptr(pointee, space);
        let init = match &decl.init {
            Some(init) if space == AddressSpace::Private => {
                let (_, id) = self.eval_const_expr(init, Some(inner))?;
                Some(id)
            }
            Some(_) => {
                return Err(unsupported(
                    "initializers are only lowered for private globals",
                ))
            }
            None => None,
        };

        let mut group = None;
        let mut binding = None;
        for attr in decl.attrs.iter() {
            match attr.name.as_str() {
                "group" => group = attr.int_arg().map(|x| x as u32),
                "binding" => binding = attr.int_arg().map(|x| x as u32),
                _ => {}
            }
        }

        let id = self.module.alloc_id();
        self.module.add_global(GlobalVar {
            id,
            name: self.opts.debug_names.then(|| decl.name.clone()),
            ty: ptr_ty,
            space,
            group,
            binding,
            location: None,
            builtin: None,
            init,
        });
        self.globals.insert(
            decl.name.clone(),
            GlobalBinding {
                ptr: id,
                pointee,
                inner,
                space,
                wrapped: needs_wrap,
            },
        );
        Ok(())
    }

    // Functions.

    fn register_fn_sig(&mut self, decl: &FnDecl) -> Result<()> {
        let is_entry = self
            .resolver
            .entry_points
            .iter()
            .any(|x| x.name == decl.name);
        let ret = match (&decl.ret_ty, is_entry) {
            (_, true) | (None, _) => self.module.ty_void(),
            (Some(ty), false) => self.materialize_type(ty, LayoutRule::None)?,
        };
        let mut params = Vec::new();
        if !is_entry {
            for param in decl.params.iter() {
                params.push(self.materialize_type(&param.ty, LayoutRule::None)?);
            }
        }
        let id = self.module.alloc_id();
        self.fn_sigs
            .insert(decl.name.clone(), FnSig { id, ret, params });
        Ok(())
    }

    fn lower_fn(&mut self, decl_idx: usize, decl: &FnDecl) -> Result<()> {
        let sig = self
            .fn_sigs
            .get(&decl.name)
            .cloned()
            .ok_or_else(|| internal("function signature missing"))?;
        let entry_desc = self
            .resolver
            .entry_points
            .iter()
            .find(|x| x.decl == decl_idx)
            .map(|x| x.stage);
        let entry_block = self.module.alloc_id();
        let mut fs = FuncState {
            blocks: vec![Block::new(entry_block)],
            current: 0,
            locals: Vec::new(),
            scopes: vec![HashMap::default()],
            ret_ty: sig.ret,
            outputs: Vec::new(),
            is_entry: entry_desc.is_some(),
        };

        let mut params = Vec::new();
        let mut interface = Vec::new();
        let mut entry_meta = None;
        if let Some(stage) = entry_desc {
            let stage = match stage {
                StageKind::Vertex => Stage::Vertex,
                StageKind::Fragment => Stage::Fragment,
                StageKind::Compute => Stage::Compute,
                StageKind::Unknown => return Err(invalid("entry point with unknown stage")),
            };
            self.synthesize_entry_io(decl, stage, &mut fs, &mut interface)?;
            entry_meta = Some(stage);
        } else {
            for (param, ty) in decl.params.iter().zip(sig.params.iter()) {
                let id = self.module.alloc_id();
                self.module.define_value(id, *ty);
                params.push(FunctionParam {
                    id,
                    name: self.opts.debug_names.then(|| param.name.clone()),
                    ty: *ty,
                });
                fs.scopes
                    .last_mut()
                    .unwrap()
                    .insert(param.name.clone(), Binding::Value { ty: *ty, id });
            }
        }

        for stmt in decl.body.iter() {
            self.lower_stmt(&mut fs, stmt)?;
        }
        if !fs.terminated() {
            // A fully-returning if/else leaves behind an open merge block
            // that nothing reaches; close it with Unreachable. The same
            // applies to any function whose result only flows out through
            // `return`.
            let returns_nothing =
                self.module.ty(sig.ret).is_void() && !(fs.is_entry && !fs.outputs.is_empty());
            if returns_nothing {
                self.emit(&mut fs, Instr::new(Opcode::ReturnVoid));
            } else {
                self.emit(&mut fs, Instr::new(Opcode::Unreachable));
            }
        }

        let func = Function {
            id: sig.id,
            name: Some(decl.name.clone()),
            ret_ty: sig.ret,
            params,
            locals: fs.locals,
            blocks: fs.blocks,
        };
        self.module.add_function(func);

        if let Some(stage) = entry_meta {
            let mut entry = EntryPoint::new(decl.name.clone(), stage, sig.id);
            entry.interface = interface;
            if stage == Stage::Compute {
                entry.workgroup_size = self.workgroup_size(decl)?;
            }
            entry.depth_replacing = entry.interface.iter().any(|id| {
                self.module
                    .global(*id)
                    .map(|x| x.builtin == Some(spirv::BuiltIn::FragDepth))
                    .unwrap_or(false)
            });
            self.module.add_entry_point(entry);
        }
        Ok(())
    }

    fn workgroup_size(&mut self, decl: &FnDecl) -> Result<[u32; 3]> {
        let attr = decl
            .attr("workgroup_size")
            .ok_or_else(|| invalid(format!("compute entry {} needs @workgroup_size", decl.name)))?;
        let mut size = [1u32; 3];
        for (i, arg) in attr.args.iter().enumerate().take(3) {
            size[i] = self.eval_const_index(arg)?;
        }
        if size.iter().any(|x| *x == 0) {
            return Err(invalid("workgroup size dimensions must be non-zero"));
        }
        Ok(size)
    }

    /// Turn entry-point parameters and the return value into Input/Output
    /// globals, load the inputs at the head of the entry block, and record
    /// the output store targets for `return` to hit.
    fn synthesize_entry_io(
        &mut self,
        decl: &FnDecl,
        stage: Stage,
        fs: &mut FuncState,
        interface: &mut Vec<Id>,
    ) -> Result<()> {
        for param in decl.params.iter() {
            let struct_decl = self.prog.decls.iter().enumerate().find_map(|(i, d)| match d {
                Decl::Struct(s) if s.name == param.ty.name => Some(i),
                _ => None,
            });
            if let Some(decl_idx) = struct_decl {
                // Flatten a struct parameter into one input per field, then
                // reconstruct the struct value.
                let struct_ty = self.materialize_struct(&param.ty.name, decl_idx, LayoutRule::None)?;
                let fields = match &self.prog.decls[decl_idx] {
                    Decl::Struct(s) => s.fields.clone(),
                    _ => unreachable!(),
                };
                let mut components = Vec::new();
                for field in fields.iter() {
                    let field_ty = self.materialize_type(&field.ty, LayoutRule::None)?;
                    let global = self.add_io_global(
                        &field.name,
                        field_ty,
                        &field.attrs,
                        stage,
                        AddressSpace::Input,
                    )?;
                    interface.push(global);
                    let loaded = self.emit_value(
                        fs,
                        Opcode::Load,
                        field_ty,
                        Instr::new(Opcode::Load).arg(global),
                    );
                    components.push(loaded);
                }
                let value = self.emit_value(
                    fs,
                    Opcode::Construct,
                    struct_ty,
                    Instr::new(Opcode::Construct).args(&components),
                );
                fs.scopes.last_mut().unwrap().insert(
                    param.name.clone(),
                    Binding::Value {
                        ty: struct_ty,
                        id: value,
                    },
                );
            } else {
                let ty = self.materialize_type(&param.ty, LayoutRule::None)?;
                let global =
                    self.add_io_global(&param.name, ty, &param.attrs, stage, AddressSpace::Input)?;
                interface.push(global);
                let loaded =
                    self.emit_value(fs, Opcode::Load, ty, Instr::new(Opcode::Load).arg(global));
                fs.scopes.last_mut().unwrap().insert(
                    param.name.clone(),
                    Binding::Value { ty, id: loaded },
                );
            }
        }

        let ret_ty_expr = match &decl.ret_ty {
            Some(x) => x,
            None => return Ok(()),
        };
        let struct_decl = self.prog.decls.iter().enumerate().find_map(|(i, d)| match d {
            Decl::Struct(s) if s.name == ret_ty_expr.name => Some(i),
            _ => None,
        });
        if let Some(decl_idx) = struct_decl {
            let fields = match &self.prog.decls[decl_idx] {
                Decl::Struct(s) => s.fields.clone(),
                _ => unreachable!(),
            };
            for (member, field) in fields.iter().enumerate() {
                let field_ty = self.materialize_type(&field.ty, LayoutRule::None)?;
                let global = self.add_io_global(
                    &field.name,
                    field_ty,
                    &field.attrs,
                    stage,
                    AddressSpace::Output,
                )?;
                interface.push(global);
                fs.outputs.push(OutputTarget {
                    global,
                    member: Some(member as u32),
                    ty: field_ty,
                });
            }
        } else {
            let ty = self.materialize_type(ret_ty_expr, LayoutRule::None)?;
            let global =
                self.add_io_global(&decl.name, ty, &decl.ret_attrs, stage, AddressSpace::Output)?;
            interface.push(global);
            fs.outputs.push(OutputTarget {
                global,
                member: None,
                ty,
            });
        }
        Ok(())
    }

    fn add_io_global(
        &mut self,
        name: &str,
        ty: TypeId,
        attrs: &[Attribute],
        stage: Stage,
        space: AddressSpace,
    ) -> Result<Id> {
        let mut location = None;
        let mut builtin = None;
        for attr in attrs.iter() {
            match attr.name.as_str() {
                "location" => location = attr.int_arg().map(|x| x as u32),
                "builtin" => {
                    let payload = attr
                        .ident_arg()
                        .ok_or_else(|| invalid("@builtin needs a name"))?;
                    builtin = Some(map_builtin(payload, stage, space, self.opts.draw_parameters)?);
                }
                _ => {}
            }
        }
        if location.is_none() && builtin.is_none() {
            return Err(invalid(format!(
                "entry-point interface {} needs @location or @builtin",
                name
            )));
        }
        let ptr_ty = self.module.ty_ptr(ty, space);
        let id = self.module.alloc_id();
        self.module.add_global(GlobalVar {
            id,
            name: self.opts.debug_names.then(|| name.to_owned()),
            ty: ptr_ty,
            space,
            group: None,
            binding: None,
            location,
            builtin,
            init: None,
        });
        Ok(id)
    }

    // Statements.

    fn emit(&mut self, fs: &mut FuncState, instr: Instr) {
        if fs.terminated() {
            // Dead code after a terminator: open an unreachable block so the
            // remaining statements stay structurally valid.
            let id = self.module.alloc_id();
            fs.blocks.push(Block::new(id));
            fs.current = fs.blocks.len() - 1;
        }
        fs.blocks[fs.current].instrs.push(instr);
    }

    fn emit_value(&mut self, fs: &mut FuncState, op: Opcode, ty: TypeId, instr: Instr) -> Id {
        debug_assert_eq!(instr.op, op);
        let id = self.module.alloc_id();
        self.module.define_value(id, ty);
        let mut instr = instr;
        instr.result = Some(id);
        instr.ty = Some(ty);
        self.emit(fs, instr);
        id
    }

    fn push_block(&mut self, fs: &mut FuncState) -> Id {
        let id = self.module.alloc_id();
        fs.blocks.push(Block::new(id));
        id
    }
    fn select_block(&mut self, fs: &mut FuncState, id: Id) {
        let idx = fs
            .blocks
            .iter()
            .position(|x| x.id == id)
            .expect("selecting a block that was never pushed");
        fs.current = idx;
    }

    fn lower_stmt(&mut self, fs: &mut FuncState, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Block(stmts) => {
                fs.scopes.push(HashMap::default());
                for stmt in stmts {
                    self.lower_stmt(fs, stmt)?;
                }
                fs.scopes.pop();
                Ok(())
            }
            Stmt::Var {
                kind,
                name,
                ty,
                init,
                ..
            } => self.lower_var_stmt(fs, *kind, name, ty.as_ref(), init.as_ref()),
            Stmt::Return { value, .. } => self.lower_return(fs, value.as_ref()),
            Stmt::Expr(expr) => {
                self.lower_expr(fs, expr, None)?;
                Ok(())
            }
            Stmt::If {
                cond, then, els, ..
            } => self.lower_if(fs, cond, then, els.as_deref()),
            Stmt::While { cond, body, .. } => self.lower_while(fs, cond, body, None),
            Stmt::For {
                init,
                cond,
                cont,
                body,
                ..
            } => {
                // for(init; cond; cont) desugars to init + while(cond) with
                // the continue expression in the loop's continue block.
                fs.scopes.push(HashMap::default());
                if let Some(init) = init {
                    self.lower_stmt(fs, init)?;
                }
                let result = match cond {
                    Some(cond) => self.lower_while(fs, cond, body, cont.as_ref()),
                    None => {
                        let t = Expr::Ident(IdentExpr {
                            name: "true".to_owned(),
                            node: u32::MAX,
                            span: Span { line: 0, col: 0 },
                        });
                        self.lower_while(fs, &t, body, cont.as_ref())
                    }
                };
                fs.scopes.pop();
                result
            }
        }
    }

    fn lower_var_stmt(
        &mut self,
        fs: &mut FuncState,
        kind: VarKind,
        name: &str,
        ty: Option<&TypeExpr>,
        init: Option<&Expr>,
    ) -> Result<()> {
        let annotated = match ty {
            Some(ty) => Some(self.materialize_type(ty, LayoutRule::None)?),
            None => None,
        };
        match kind {
            VarKind::Var => {
                let init_val = match init {
                    Some(init) => Some(self.lower_expr(fs, init, annotated)?),
                    None => None,
                };
                let pointee = annotated
                    .or(init_val.map(|x| x.0))
                    .ok_or_else(|| invalid(format!("var {} needs a type or initializer", name)))?;
                let ptr_ty = self.module.ty_ptr(pointee, AddressSpace::Function);
                let ptr = self.module.alloc_id();
                self.module.define_value(ptr, ptr_ty);
                let zero_init = (init.is_none() && self.opts.zero_initialize_vars)
                    .then(|| self.module.const_null(pointee));
                fs.locals.push(LocalVar {
                    id: ptr,
                    name: self.opts.debug_names.then(|| name.to_owned()),
                    ty: ptr_ty,
                    init: zero_init,
                });
                if let Some((value_ty, value)) = init_val {
                    if value_ty != pointee {
                        return Err(invalid(format!(
                            "initializer type does not match var {}",
                            name
                        )));
                    }
                    self.emit(fs, Instr::new(Opcode::Store).args(&[ptr, value]));
                }
                fs.scopes.last_mut().unwrap().insert(
                    name.to_owned(),
                    Binding::Ptr {
                        pointee,
                        ptr,
                        space: AddressSpace::Function,
                    },
                );
            }
            VarKind::Let | VarKind::Const | VarKind::Override => {
                let init = init
                    .ok_or_else(|| invalid(format!("let {} needs an initializer", name)))?;
                let (value_ty, value) = self.lower_expr(fs, init, annotated)?;
                if let Some(annotated) = annotated {
                    if annotated != value_ty {
                        return Err(invalid(format!(
                            "initializer type does not match let {}",
                            name
                        )));
                    }
                }
                fs.scopes.last_mut().unwrap().insert(
                    name.to_owned(),
                    Binding::Value {
                        ty: value_ty,
                        id: value,
                    },
                );
            }
        }
        Ok(())
    }

    fn lower_return(&mut self, fs: &mut FuncState, value: Option<&Expr>) -> Result<()> {
        if fs.is_entry {
            if let Some(value) = value {
                let targets: Vec<(Id, Option<u32>, TypeId)> = fs
                    .outputs
                    .iter()
                    .map(|x| (x.global, x.member, x.ty))
                    .collect();
                let ret_hint = targets
                    .iter()
                    .find(|x| x.1.is_none())
                    .map(|x| x.2);
                let (_, value_id) = self.lower_expr(fs, value, ret_hint)?;
                for (global, member, ty) in targets {
                    let piece = match member {
                        Some(member) => self.emit_value(
                            fs,
                            Opcode::Extract,
                            ty,
                            Instr::new(Opcode::Extract).arg(value_id).imm(member),
                        ),
                        None => value_id,
                    };
                    self.emit(fs, Instr::new(Opcode::Store).args(&[global, piece]));
                }
            }
            self.emit(fs, Instr::new(Opcode::ReturnVoid));
            return Ok(());
        }
        match value {
            Some(value) => {
                let ret_ty = fs.ret_ty;
                let (value_ty, id) = self.lower_expr(fs, value, Some(ret_ty))?;
                if value_ty != ret_ty {
                    return Err(invalid("returned value type does not match the signature"));
                }
                self.emit(fs, Instr::new(Opcode::Return).arg(id));
            }
            None => self.emit(fs, Instr::new(Opcode::ReturnVoid)),
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        fs: &mut FuncState,
        cond: &Expr,
        then: &[Stmt],
        els: Option<&Stmt>,
    ) -> Result<()> {
        let (cond_ty, cond_id) = self.lower_expr(fs, cond, None)?;
        if !self.module.ty(cond_ty).is_bool() {
            return Err(invalid("if condition must be a bool"));
        }
        let then_blk = self.push_block(fs);
        let else_blk = els.map(|_| {
            let id = self.module.alloc_id();
            fs.blocks.push(Block::new(id));
            id
        });
        let merge_blk = self.push_block(fs);

        self.emit(fs, Instr::new(Opcode::SelectionMerge).arg(merge_blk));
        self.emit(
            fs,
            Instr::new(Opcode::BranchCond).args(&[
                cond_id,
                then_blk,
                else_blk.unwrap_or(merge_blk),
            ]),
        );

        self.select_block(fs, then_blk);
        fs.scopes.push(HashMap::default());
        for stmt in then {
            self.lower_stmt(fs, stmt)?;
        }
        fs.scopes.pop();
        if !fs.terminated() {
            self.emit(fs, Instr::new(Opcode::Branch).arg(merge_blk));
        }

        if let (Some(else_blk), Some(els)) = (else_blk, els) {
            self.select_block(fs, else_blk);
            self.lower_stmt(fs, els)?;
            if !fs.terminated() {
                self.emit(fs, Instr::new(Opcode::Branch).arg(merge_blk));
            }
        }

        self.select_block(fs, merge_blk);
        Ok(())
    }

    fn lower_while(
        &mut self,
        fs: &mut FuncState,
        cond: &Expr,
        body: &[Stmt],
        cont: Option<&Expr>,
    ) -> Result<()> {
        let header_blk = self.push_block(fs);
        let body_blk = self.push_block(fs);
        let continue_blk = self.push_block(fs);
        let merge_blk = self.push_block(fs);

        self.emit(fs, Instr::new(Opcode::Branch).arg(header_blk));

        // The condition re-evaluates in the header on every iteration.
        self.select_block(fs, header_blk);
        let (cond_ty, cond_id) = self.lower_expr(fs, cond, None)?;
        if !self.module.ty(cond_ty).is_bool() {
            return Err(invalid("loop condition must be a bool"));
        }
        self.emit(
            fs,
            Instr::new(Opcode::LoopMerge).args(&[merge_blk, continue_blk]),
        );
        self.emit(
            fs,
            Instr::new(Opcode::BranchCond).args(&[cond_id, body_blk, merge_blk]),
        );

        self.select_block(fs, body_blk);
        fs.scopes.push(HashMap::default());
        for stmt in body {
            self.lower_stmt(fs, stmt)?;
        }
        fs.scopes.pop();
        if !fs.terminated() {
            self.emit(fs, Instr::new(Opcode::Branch).arg(continue_blk));
        }

        self.select_block(fs, continue_blk);
        if let Some(cont) = cont {
            self.lower_expr(fs, cont, None)?;
        }
        self.emit(fs, Instr::new(Opcode::Branch).arg(header_blk));

        self.select_block(fs, merge_blk);
        Ok(())
    }

    // Places (lvalues).

    fn lookup_binding(&self, fs: &FuncState, name: &str) -> Option<Binding> {
        for scope in fs.scopes.iter().rev() {
            if let Some(binding) = scope.get(name) {
                return Some(*binding);
            }
        }
        None
    }

    /// Walk a place expression down to its root pointer, collecting the
    /// access-chain indices on the way. One chain per place, however deep.
    fn resolve_place(&mut self, fs: &mut FuncState, expr: &Expr) -> Result<PlaceRef> {
        match expr {
            Expr::Ident(ident) => {
                if let Some(binding) = self.lookup_binding(fs, &ident.name) {
                    return match binding {
                        Binding::Ptr {
                            pointee,
                            ptr,
                            space,
                        } => Ok(PlaceRef {
                            base: ptr,
                            indices: Vec::new(),
                            pointee,
                            space,
                        }),
                        Binding::Value { .. } => Err(invalid(format!(
                            "{} is immutable and cannot be assigned",
                            ident.name
                        ))),
                    };
                }
                let global = self
                    .globals
                    .get(&ident.name)
                    .copied()
                    .ok_or_else(|| invalid(format!("unknown variable: {}", ident.name)))?;
                let mut indices = Vec::new();
                if global.wrapped {
                    // Step through the synthesized block struct.
                    indices.push(self.module.const_u32(0));
                }
                Ok(PlaceRef {
                    base: global.ptr,
                    indices,
                    pointee: global.inner,
                    space: global.space,
                })
            }
            Expr::Index { base, index, .. } => {
                let mut place = self.resolve_place(fs, base)?;
                let u32_ty = self.module.ty_u32();
                let (_, index_id) = self.lower_expr(fs, index, Some(u32_ty))?;
                let elem = match self.module.ty(place.pointee) {
                    Type::Array(x) => x.elem,
                    Type::RuntimeArray(x) => x.elem,
                    Type::Vector(x) => x.elem,
                    Type::Matrix(x) => x.column,
                    _ => return Err(invalid("indexed expression is not indexable")),
                };
                place.indices.push(index_id);
                place.pointee = elem;
                Ok(place)
            }
            Expr::Member { base, member, .. } => {
                let mut place = self.resolve_place(fs, base)?;
                match self.module.ty(place.pointee).clone() {
                    Type::Struct(decl) => {
                        let member_idx = decl
                            .members
                            .iter()
                            .position(|x| x.name.as_deref() == Some(member.as_str()))
                            .ok_or_else(|| {
                                invalid(format!("struct has no member named {}", member))
                            })?;
                        place.pointee = decl.members[member_idx].ty;
                        let index = self.module.const_u32(member_idx as u32);
                        place.indices.push(index);
                        Ok(place)
                    }
                    Type::Vector(vec) => {
                        let lanes = swizzle_lanes(member)
                            .ok_or_else(|| invalid(format!("bad swizzle: {}", member)))?;
                        if lanes.len() != 1 {
                            return Err(unsupported("multi-component swizzle assignment"));
                        }
                        let index = self.module.const_u32(lanes[0]);
                        place.indices.push(index);
                        place.pointee = vec.elem;
                        Ok(place)
                    }
                    _ => Err(invalid("member access on a non-composite place")),
                }
            }
            _ => Err(invalid(format!(
                "{} is not an addressable place",
                expr.kind_name()
            ))),
        }
    }

    /// Lower an expression to a pointer. Returns (pointee type, pointer id,
    /// address space).
    fn lower_place(
        &mut self,
        fs: &mut FuncState,
        expr: &Expr,
    ) -> Result<(TypeId, Id, AddressSpace)> {
        let place = self.resolve_place(fs, expr)?;
        if place.indices.is_empty() {
            return Ok((place.pointee, place.base, place.space));
        }
        let ptr_ty = self.module.ty_ptr(place.pointee, place.space);
        let mut args = vec![place.base];
        args.extend(place.indices.iter().copied());
        let ptr = self.emit_value(
            fs,
            Opcode::Access,
            ptr_ty,
            Instr::new(Opcode::Access).args(&args),
        );
        Ok((place.pointee, ptr, place.space))
    }

    fn is_place(&self, fs: &FuncState, expr: &Expr) -> bool {
        match expr {
            Expr::Ident(ident) => match self.lookup_binding(fs, &ident.name) {
                Some(Binding::Ptr { .. }) => true,
                Some(Binding::Value { .. }) => false,
                None => self.globals.contains_key(&ident.name),
            },
            Expr::Index { base, .. } | Expr::Member { base, .. } => self.is_place(fs, base),
            _ => false,
        }
    }

    /// Pointee type [`lower_place`] would produce, without emitting anything.
    fn place_type(&self, fs: &FuncState, expr: &Expr) -> Option<TypeId> {
        match expr {
            Expr::Ident(ident) => match self.lookup_binding(fs, &ident.name) {
                Some(Binding::Ptr { pointee, .. }) => Some(pointee),
                Some(Binding::Value { .. }) => None,
                None => self.globals.get(&ident.name).map(|x| x.inner),
            },
            Expr::Index { base, .. } => {
                let base_ty = self.place_type(fs, base)?;
                match self.module.ty(base_ty) {
                    Type::Array(x) => Some(x.elem),
                    Type::RuntimeArray(x) => Some(x.elem),
                    Type::Vector(x) => Some(x.elem),
                    Type::Matrix(x) => Some(x.column),
                    _ => None,
                }
            }
            Expr::Member { base, member, .. } => {
                let base_ty = self.place_type(fs, base)?;
                match self.module.ty(base_ty) {
                    Type::Struct(decl) => decl
                        .members
                        .iter()
                        .find(|x| x.name.as_deref() == Some(member.as_str()))
                        .map(|x| x.ty),
                    Type::Vector(x) => {
                        let lanes = swizzle_lanes(member)?;
                        if lanes.len() == 1 {
                            Some(x.elem)
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    // Expressions.

    fn lower_expr(
        &mut self,
        fs: &mut FuncState,
        expr: &Expr,
        hint: Option<TypeId>,
    ) -> Result<(TypeId, Id)> {
        match expr {
            Expr::IntLit(lit) => {
                let value = lit
                    .parse()
                    .ok_or_else(|| invalid(format!("malformed integer literal: {}", lit.lexeme)))?;
                Ok(self.int_const(lit, value, hint))
            }
            Expr::FloatLit(lit) => {
                let value = lit
                    .parse_float()
                    .ok_or_else(|| invalid(format!("malformed float literal: {}", lit.lexeme)))?;
                Ok(self.float_const(lit, value, hint))
            }
            Expr::Ident(ident) => self.lower_ident(fs, ident),
            Expr::Binary {
                op, lhs, rhs, ..
            } => self.lower_binary(fs, *op, lhs, rhs),
            Expr::Assign { op, lhs, rhs, .. } => self.lower_assign(fs, *op, lhs, rhs),
            Expr::Unary {
                op,
                expr,
                postfix,
                ..
            } => self.lower_unary(fs, *op, expr, *postfix),
            Expr::Ternary {
                cond, then, els, ..
            } => self.lower_ternary(fs, cond, then, els, hint),
            Expr::Call { callee, args, .. } => self.lower_call(fs, callee, args, hint),
            Expr::Member { base, member, .. } => self.lower_member(fs, base, member),
            Expr::Index { base, index, .. } => self.lower_index(fs, base, index),
            Expr::TypeHead(ty) => Err(invalid(format!(
                "type {} used as a value outside a constructor",
                ty.name
            ))),
        }
    }

    fn lower_ident(&mut self, fs: &mut FuncState, ident: &IdentExpr) -> Result<(TypeId, Id)> {
        match ident.name.as_str() {
            "true" => {
                let ty = self.module.ty_bool();
                return Ok((ty, self.module.const_bool(true)));
            }
            "false" => {
                let ty = self.module.ty_bool();
                return Ok((ty, self.module.const_bool(false)));
            }
            _ => {}
        }
        if let Some(binding) = self.lookup_binding(fs, &ident.name) {
            return Ok(match binding {
                Binding::Value { ty, id } => (ty, id),
                Binding::Ptr { pointee, ptr, .. } => {
                    let id = self.emit_value(
                        fs,
                        Opcode::Load,
                        pointee,
                        Instr::new(Opcode::Load).arg(ptr),
                    );
                    (pointee, id)
                }
            });
        }
        if let Some((ty, id)) = self.consts.get(&ident.name).copied() {
            return Ok((ty, id));
        }
        if self.globals.contains_key(&ident.name) {
            let (pointee, ptr, _) = self.lower_place(fs, &Expr::Ident(ident.clone()))?;
            let id = self.emit_value(fs, Opcode::Load, pointee, Instr::new(Opcode::Load).arg(ptr));
            return Ok((pointee, id));
        }
        Err(invalid(format!("unknown identifier: {}", ident.name)))
    }

    fn lower_binary(
        &mut self,
        fs: &mut FuncState,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(TypeId, Id)> {
        if matches!(op, BinOp::LogicalAnd | BinOp::LogicalOr) {
            return self.lower_short_circuit(fs, op, lhs, rhs);
        }
        // Literal operands adopt the other side's type, so lower the
        // non-literal side first.
        let (lhs_first, (a_ty, a)) = if is_literal(lhs) && !is_literal(rhs) {
            (false, self.lower_expr(fs, rhs, None)?)
        } else {
            (true, self.lower_expr(fs, lhs, None)?)
        };
        let (b_ty, b) = if lhs_first {
            self.lower_expr(fs, rhs, Some(a_ty))?
        } else {
            self.lower_expr(fs, lhs, Some(a_ty))?
        };
        let ((a_ty, a), (b_ty, b)) = if lhs_first {
            ((a_ty, a), (b_ty, b))
        } else {
            ((b_ty, b), (a_ty, a))
        };
        self.lower_binary_values(fs, op, (a_ty, a), (b_ty, b))
    }

    fn lower_binary_values(
        &mut self,
        fs: &mut FuncState,
        op: BinOp,
        (a_ty, a): (TypeId, Id),
        (b_ty, b): (TypeId, Id),
    ) -> Result<(TypeId, Id)> {
        let a_is_matrix = self.module.ty(a_ty).is_matrix();
        let b_is_matrix = self.module.ty(b_ty).is_matrix();
        if op == BinOp::Mul && (a_is_matrix || b_is_matrix) {
            let ty = self.matmul_result_ty(a_ty, b_ty)?;
            let id = self.emit_value(fs, Opcode::MatMul, ty, Instr::new(Opcode::MatMul).args(&[a, b]));
            return Ok((ty, id));
        }
        // Vector-times-scalar float multiplies keep their shape and let the
        // emitter pick OpVectorTimesScalar; everything else is shape-unified
        // by splatting the scalar side.
        let (a_ty, a, b_ty, b) = if op == BinOp::Mul
            && self.module.ty(a_ty).is_vector()
            && self.module.ty(b_ty).is_float()
        {
            (a_ty, a, b_ty, b)
        } else if op == BinOp::Mul
            && self.module.ty(a_ty).is_float()
            && self.module.ty(b_ty).is_vector()
        {
            // Scalar-times-vector commutes to vector-times-scalar.
            (b_ty, b, a_ty, a)
        } else {
            let (a_ty, a, b_ty, b) = self.unify_shapes(fs, a_ty, a, b_ty, b)?;
            if a_ty != b_ty {
                return Err(invalid(format!(
                    "operand types of {} do not match",
                    op
                )));
            }
            (a_ty, a, b_ty, b)
        };
        let _ = b_ty;

        let elem = self
            .module
            .scalar_elem(a_ty)
            .ok_or_else(|| invalid(format!("operator {} needs numeric operands", op)))?;
        let elem_ty = self.module.ty(elem).clone();
        let opcode = match op {
            BinOp::Add => Opcode::Add,
            BinOp::Sub => Opcode::Sub,
            BinOp::Mul => Opcode::Mul,
            BinOp::Div => Opcode::Div,
            BinOp::Mod => Opcode::Rem,
            BinOp::BitAnd if elem_ty.is_bool() => Opcode::And,
            BinOp::BitOr if elem_ty.is_bool() => Opcode::Or,
            BinOp::BitAnd => Opcode::BitAnd,
            BinOp::BitOr => Opcode::BitOr,
            BinOp::BitXor => Opcode::BitXor,
            BinOp::Shl => Opcode::Shl,
            BinOp::Shr => Opcode::Shr,
            BinOp::Eq => Opcode::Eq,
            BinOp::Ne => Opcode::Ne,
            BinOp::Lt => Opcode::Lt,
            BinOp::Le => Opcode::Le,
            BinOp::Gt => Opcode::Gt,
            BinOp::Ge => Opcode::Ge,
            BinOp::LogicalAnd | BinOp::LogicalOr => unreachable!(),
        };
        let result_ty = if matches!(
            op,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        ) {
            let bool_ty = self.module.ty_bool();
            match self.module.ty(a_ty).clone() {
                Type::Vector(x) => self.module.ty_vec(bool_ty, x.count),
                _ => bool_ty,
            }
        } else {
            a_ty
        };
        let id = self.emit_value(fs, opcode, result_ty, Instr::new(opcode).args(&[a, b]));
        Ok((result_ty, id))
    }

    /// Splat the scalar side of a mixed scalar/vector pair.
    fn unify_shapes(
        &mut self,
        fs: &mut FuncState,
        a_ty: TypeId,
        a: Id,
        b_ty: TypeId,
        b: Id,
    ) -> Result<(TypeId, Id, TypeId, Id)> {
        if a_ty == b_ty {
            return Ok((a_ty, a, b_ty, b));
        }
        let a_vec = self.module.ty(a_ty).as_vector().cloned();
        let b_vec = self.module.ty(b_ty).as_vector().cloned();
        match (a_vec, b_vec) {
            (Some(vec), None) if vec.elem == b_ty => {
                let b = self.emit_value(fs, Opcode::Splat, a_ty, Instr::new(Opcode::Splat).arg(b));
                Ok((a_ty, a, a_ty, b))
            }
            (None, Some(vec)) if vec.elem == a_ty => {
                let a = self.emit_value(fs, Opcode::Splat, b_ty, Instr::new(Opcode::Splat).arg(a));
                Ok((b_ty, a, b_ty, b))
            }
            _ => Ok((a_ty, a, b_ty, b)),
        }
    }

    fn matmul_result_ty(&mut self, a_ty: TypeId, b_ty: TypeId) -> Result<TypeId> {
        let a = self.module.ty(a_ty).clone();
        let b = self.module.ty(b_ty).clone();
        match (a, b) {
            (Type::Matrix(ma), Type::Matrix(mb)) => {
                // (rows_a x cols_a) * (rows_b x cols_b) -> rows_a x cols_b.
                Ok(self.module.ty_matrix(ma.column, mb.columns, ma.rows))
            }
            (Type::Matrix(ma), Type::Vector(_)) => Ok(ma.column),
            (Type::Vector(_), Type::Matrix(mb)) => {
                let elem = self.module.scalar_elem(mb.column).unwrap();
                Ok(self.module.ty_vec(elem, mb.columns))
            }
            (Type::Matrix(_), _) => Ok(a_ty),
            (_, Type::Matrix(_)) => Ok(b_ty),
            _ => Err(internal("matmul without a matrix operand")),
        }
    }

    /// `&&` and `||` lower to control flow so the right-hand side only
    /// evaluates when it has to.
    fn lower_short_circuit(
        &mut self,
        fs: &mut FuncState,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(TypeId, Id)> {
        let bool_ty = self.module.ty_bool();
        let (lhs_ty, lhs_id) = self.lower_expr(fs, lhs, Some(bool_ty))?;
        if !self.module.ty(lhs_ty).is_bool() {
            return Err(invalid(format!("operands of {} must be bool", op)));
        }
        let head_blk = fs.current_id();
        let rhs_blk = self.push_block(fs);
        let merge_blk = self.push_block(fs);

        self.emit(fs, Instr::new(Opcode::SelectionMerge).arg(merge_blk));
        let (then_blk, else_blk) = match op {
            BinOp::LogicalAnd => (rhs_blk, merge_blk),
            _ => (merge_blk, rhs_blk),
        };
        self.emit(
            fs,
            Instr::new(Opcode::BranchCond).args(&[lhs_id, then_blk, else_blk]),
        );

        self.select_block(fs, rhs_blk);
        let (rhs_ty, rhs_id) = self.lower_expr(fs, rhs, Some(bool_ty))?;
        if !self.module.ty(rhs_ty).is_bool() {
            return Err(invalid(format!("operands of {} must be bool", op)));
        }
        let rhs_end_blk = fs.current_id();
        self.emit(fs, Instr::new(Opcode::Branch).arg(merge_blk));

        self.select_block(fs, merge_blk);
        let id = self.emit_value(
            fs,
            Opcode::Phi,
            bool_ty,
            Instr::new(Opcode::Phi).args(&[lhs_id, head_blk, rhs_id, rhs_end_blk]),
        );
        Ok((bool_ty, id))
    }

    fn lower_assign(
        &mut self,
        fs: &mut FuncState,
        op: Option<BinOp>,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(TypeId, Id)> {
        let (pointee, ptr, _) = self.lower_place(fs, lhs)?;
        let value = match op {
            None => {
                let (value_ty, value) = self.lower_expr(fs, rhs, Some(pointee))?;
                if value_ty != pointee {
                    return Err(invalid("assigned value type does not match the target"));
                }
                value
            }
            Some(op) => {
                let old = self.emit_value(
                    fs,
                    Opcode::Load,
                    pointee,
                    Instr::new(Opcode::Load).arg(ptr),
                );
                let (rhs_ty, rhs_id) = self.lower_expr(fs, rhs, Some(pointee))?;
                let (_, id) = self.lower_binary_values(fs, op, (pointee, old), (rhs_ty, rhs_id))?;
                id
            }
        };
        self.emit(fs, Instr::new(Opcode::Store).args(&[ptr, value]));
        Ok((pointee, value))
    }

    fn lower_unary(
        &mut self,
        fs: &mut FuncState,
        op: UnOp,
        expr: &Expr,
        postfix: bool,
    ) -> Result<(TypeId, Id)> {
        match op {
            UnOp::Neg => {
                let (ty, id) = self.lower_expr(fs, expr, None)?;
                let out = self.emit_value(fs, Opcode::Neg, ty, Instr::new(Opcode::Neg).arg(id));
                Ok((ty, out))
            }
            UnOp::Not => {
                let (ty, id) = self.lower_expr(fs, expr, None)?;
                if self.module.scalar_elem(ty).map(|x| !self.module.ty(x).is_bool()).unwrap_or(true)
                {
                    return Err(invalid("operand of ! must be a bool"));
                }
                let out = self.emit_value(fs, Opcode::Not, ty, Instr::new(Opcode::Not).arg(id));
                Ok((ty, out))
            }
            UnOp::BitNot => {
                let (ty, id) = self.lower_expr(fs, expr, None)?;
                let out =
                    self.emit_value(fs, Opcode::BitNot, ty, Instr::new(Opcode::BitNot).arg(id));
                Ok((ty, out))
            }
            UnOp::Incr | UnOp::Decr => {
                let (pointee, ptr, _) = self.lower_place(fs, expr)?;
                let old = self.emit_value(
                    fs,
                    Opcode::Load,
                    pointee,
                    Instr::new(Opcode::Load).arg(ptr),
                );
                let one = match self.module.ty(pointee).clone() {
                    Type::Int {
                        is_signed: true, ..
                    } => self.module.const_i32(1),
                    Type::Int { .. } => self.module.const_u32(1),
                    Type::Float { bits: 32 } => self.module.const_f32(1.0),
                    Type::Float { bits: 16 } => self.module.const_f16(f16::from_f32(1.0)),
                    _ => return Err(invalid("++/-- needs a scalar numeric place")),
                };
                let opcode = match op {
                    UnOp::Incr => Opcode::Add,
                    _ => Opcode::Sub,
                };
                let new = self.emit_value(
                    fs,
                    opcode,
                    pointee,
                    Instr::new(opcode).args(&[old, one]),
                );
                self.emit(fs, Instr::new(Opcode::Store).args(&[ptr, new]));
                Ok((pointee, if postfix { old } else { new }))
            }
        }
    }

    fn lower_ternary(
        &mut self,
        fs: &mut FuncState,
        cond: &Expr,
        then: &Expr,
        els: &Expr,
        hint: Option<TypeId>,
    ) -> Result<(TypeId, Id)> {
        let (cond_ty, cond_id) = self.lower_expr(fs, cond, None)?;
        if !self.module.ty(cond_ty).is_bool() {
            return Err(invalid("ternary condition must be a bool"));
        }
        let then_blk = self.push_block(fs);
        let else_blk = self.push_block(fs);
        let merge_blk = self.push_block(fs);
        self.emit(fs, Instr::new(Opcode::SelectionMerge).arg(merge_blk));
        self.emit(
            fs,
            Instr::new(Opcode::BranchCond).args(&[cond_id, then_blk, else_blk]),
        );

        self.select_block(fs, then_blk);
        let (then_ty, then_id) = self.lower_expr(fs, then, hint)?;
        let then_end = fs.current_id();
        self.emit(fs, Instr::new(Opcode::Branch).arg(merge_blk));

        self.select_block(fs, else_blk);
        let (else_ty, else_id) = self.lower_expr(fs, els, Some(then_ty))?;
        let else_end = fs.current_id();
        self.emit(fs, Instr::new(Opcode::Branch).arg(merge_blk));

        if then_ty != else_ty {
            return Err(invalid("ternary arms have different types"));
        }
        self.select_block(fs, merge_blk);
        let id = self.emit_value(
            fs,
            Opcode::Phi,
            then_ty,
            Instr::new(Opcode::Phi).args(&[then_id, then_end, else_id, else_end]),
        );
        Ok((then_ty, id))
    }

    fn lower_member(
        &mut self,
        fs: &mut FuncState,
        base: &Expr,
        member: &str,
    ) -> Result<(TypeId, Id)> {
        if self.is_place(fs, base) {
            // Through-memory path: vectors swizzle on the loaded value, the
            // rest goes through an access chain.
            let can_chain = self
                .place_type(fs, base)
                .map(|x| self.module.ty(x).is_struct())
                .unwrap_or(false);
            if can_chain {
                let place = self.lower_place(
                    fs,
                    &Expr::Member {
                        base: Box::new(base.clone()),
                        member: member.to_owned(),
                        span: base.span(),
                    },
                )?;
                let (pointee, ptr, _) = place;
                let id = self.emit_value(
                    fs,
                    Opcode::Load,
                    pointee,
                    Instr::new(Opcode::Load).arg(ptr),
                );
                return Ok((pointee, id));
            }
        }
        let (base_ty, base_id) = self.lower_expr(fs, base, None)?;
        match self.module.ty(base_ty).clone() {
            Type::Struct(decl) => {
                let member_idx = decl
                    .members
                    .iter()
                    .position(|x| x.name.as_deref() == Some(member))
                    .ok_or_else(|| invalid(format!("struct has no member named {}", member)))?;
                let member_ty = decl.members[member_idx].ty;
                let id = self.emit_value(
                    fs,
                    Opcode::Extract,
                    member_ty,
                    Instr::new(Opcode::Extract)
                        .arg(base_id)
                        .imm(member_idx as u32),
                );
                Ok((member_ty, id))
            }
            Type::Vector(vec) => {
                let lanes = swizzle_lanes(member)
                    .ok_or_else(|| invalid(format!("bad swizzle: {}", member)))?;
                if lanes.len() == 1 {
                    let id = self.emit_value(
                        fs,
                        Opcode::Extract,
                        vec.elem,
                        Instr::new(Opcode::Extract).arg(base_id).imm(lanes[0]),
                    );
                    Ok((vec.elem, id))
                } else {
                    let ty = self.module.ty_vec(vec.elem, lanes.len() as u32);
                    let id = self.emit_value(
                        fs,
                        Opcode::Shuffle,
                        ty,
                        Instr::new(Opcode::Shuffle)
                            .args(&[base_id, base_id])
                            .imms(&lanes),
                    );
                    Ok((ty, id))
                }
            }
            _ => Err(invalid("member access on a non-composite value")),
        }
    }

    fn lower_index(
        &mut self,
        fs: &mut FuncState,
        base: &Expr,
        index: &Expr,
    ) -> Result<(TypeId, Id)> {
        if self.is_place(fs, base) {
            let place = self.lower_place(
                fs,
                &Expr::Index {
                    base: Box::new(base.clone()),
                    index: Box::new(index.clone()),
                    span: base.span(),
                },
            )?;
            let (pointee, ptr, _) = place;
            let id = self.emit_value(
                fs,
                Opcode::Load,
                pointee,
                Instr::new(Opcode::Load).arg(ptr),
            );
            return Ok((pointee, id));
        }
        let (base_ty, base_id) = self.lower_expr(fs, base, None)?;
        let u32_ty = self.module.ty_u32();
        let (_, index_id) = self.lower_expr(fs, index, Some(u32_ty))?;
        match self.module.ty(base_ty).clone() {
            Type::Vector(vec) => {
                let id = self.emit_value(
                    fs,
                    Opcode::ExtractDyn,
                    vec.elem,
                    Instr::new(Opcode::ExtractDyn).args(&[base_id, index_id]),
                );
                Ok((vec.elem, id))
            }
            _ => Err(unsupported("dynamic indexing of a non-vector value")),
        }
    }
}

impl<'a> Lowerer<'a> {
    fn lower_call(
        &mut self,
        fs: &mut FuncState,
        callee: &Expr,
        args: &[Expr],
        hint: Option<TypeId>,
    ) -> Result<(TypeId, Id)> {
        match callee {
            Expr::TypeHead(ty) => {
                let ty = ty.clone();
                self.lower_construct(fs, &ty, args)
            }
            Expr::Ident(ident) => {
                let name = ident.name.clone();
                if self.fn_sigs.contains_key(&name) {
                    return self.lower_user_call(fs, &name, args);
                }
                if is_constructor_name(&name) || self.struct_decl_index(&name).is_some() {
                    let ty = TypeExpr {
                        name: name.clone(),
                        ty_args: Vec::new(),
                        expr_args: Vec::new(),
                        span: ident.span,
                    };
                    return self.lower_construct(fs, &ty, args);
                }
                if name.starts_with("texture") {
                    return self.lower_texture_call(fs, &name, args);
                }
                if let Some(kind) = barrier_kind(&name) {
                    self.emit(fs, Instr::new(Opcode::Barrier).imm(kind as u32));
                    let void = self.module.ty_void();
                    return Ok((void, 0));
                }
                if name.starts_with("atomic") {
                    return self.lower_atomic_call(fs, &name, args);
                }
                if name == "arrayLength" {
                    return self.lower_array_length(fs, args);
                }
                if name == "transpose" {
                    let (ty, id) = match args {
                        [arg] => self.lower_expr(fs, arg, None)?,
                        _ => return Err(invalid("transpose takes one argument")),
                    };
                    let mat = self
                        .module
                        .ty(ty)
                        .as_matrix()
                        .cloned()
                        .ok_or_else(|| invalid("transpose needs a matrix"))?;
                    let elem = self.module.scalar_elem(mat.column).unwrap();
                    let column = self.module.ty_vec(elem, mat.columns);
                    let out_ty = self.module.ty_matrix(column, mat.rows, mat.columns);
                    let out = self.emit_value(
                        fs,
                        Opcode::MatTranspose,
                        out_ty,
                        Instr::new(Opcode::MatTranspose).arg(id),
                    );
                    return Ok((out_ty, out));
                }
                if let Some(f) = BuiltinFn::from_name(&name) {
                    return self.lower_intrinsic(fs, f, args, hint);
                }
                Err(invalid(format!("unknown function: {}", name)))
            }
            _ => Err(invalid("callee is not callable")),
        }
    }

    fn struct_decl_index(&self, name: &str) -> Option<usize> {
        self.prog.decls.iter().position(|d| match d {
            Decl::Struct(s) => s.name == name,
            _ => false,
        })
    }

    fn lower_user_call(
        &mut self,
        fs: &mut FuncState,
        name: &str,
        args: &[Expr],
    ) -> Result<(TypeId, Id)> {
        let sig = self.fn_sigs.get(name).cloned().unwrap();
        if args.len() != sig.params.len() {
            return Err(invalid(format!(
                "{} takes {} arguments, {} given",
                name,
                sig.params.len(),
                args.len()
            )));
        }
        let mut call_args = vec![sig.id];
        for (arg, param_ty) in args.iter().zip(sig.params.iter()) {
            let (arg_ty, arg_id) = self.lower_expr(fs, arg, Some(*param_ty))?;
            if arg_ty != *param_ty {
                return Err(invalid(format!("argument type mismatch calling {}", name)));
            }
            call_args.push(arg_id);
        }
        let id = self.emit_value(
            fs,
            Opcode::Call,
            sig.ret,
            Instr::new(Opcode::Call).args(&call_args),
        );
        Ok((sig.ret, id))
    }

    fn lower_construct(
        &mut self,
        fs: &mut FuncState,
        ty_expr: &TypeExpr,
        args: &[Expr],
    ) -> Result<(TypeId, Id)> {
        // Scalar constructors are conversions.
        if let Some(target) = self.scalar_ty_by_name(&ty_expr.name) {
            if args.is_empty() {
                return Ok((target, self.module.const_null(target)));
            }
            if args.len() != 1 {
                return Err(invalid(format!("{} takes one argument", ty_expr.name)));
            }
            let (src_ty, src) = self.lower_expr(fs, &args[0], None)?;
            if src_ty == target {
                return Ok((target, src));
            }
            if self.module.ty(target).is_bool() || self.module.ty(src_ty).is_bool() {
                return Err(unsupported("conversions involving bool"));
            }
            let id = self.emit_value(
                fs,
                Opcode::Convert,
                target,
                Instr::new(Opcode::Convert).arg(src),
            );
            return Ok((target, id));
        }

        match ty_expr.name.as_str() {
            "vec2" | "vec3" | "vec4" => {
                let count = ty_expr.name[3..].parse::<u32>().unwrap();
                let mut elem = match ty_expr.ty_args.first() {
                    Some(arg) => Some(self.materialize_type(arg, LayoutRule::None)?),
                    None => None,
                };
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    let value = self.lower_expr(fs, arg, elem)?;
                    if elem.is_none() {
                        elem = self.module.scalar_elem(value.0);
                    }
                    lowered.push(value);
                }
                let elem = match elem {
                    Some(x) => x,
                    None => self.module.ty_f32(),
                };
                let vec_ty = self.module.ty_vec(elem, count);
                if lowered.is_empty() {
                    return Ok((vec_ty, self.module.const_null(vec_ty)));
                }
                if lowered.len() == 1 {
                    let (arg_ty, arg) = lowered[0];
                    if arg_ty == elem {
                        let id = self.emit_value(
                            fs,
                            Opcode::Splat,
                            vec_ty,
                            Instr::new(Opcode::Splat).arg(arg),
                        );
                        return Ok((vec_ty, id));
                    }
                    if let Type::Vector(src) = self.module.ty(arg_ty).clone() {
                        if src.count == count && src.elem != elem {
                            let id = self.emit_value(
                                fs,
                                Opcode::Convert,
                                vec_ty,
                                Instr::new(Opcode::Convert).arg(arg),
                            );
                            return Ok((vec_ty, id));
                        }
                        if src.count == count {
                            return Ok((vec_ty, arg));
                        }
                    }
                }
                let ids: Vec<Id> = lowered.iter().map(|x| x.1).collect();
                let id = self.emit_value(
                    fs,
                    Opcode::Construct,
                    vec_ty,
                    Instr::new(Opcode::Construct).args(&ids),
                );
                Ok((vec_ty, id))
            }
            "mat2x2" | "mat2x3" | "mat2x4" | "mat3x2" | "mat3x3" | "mat3x4" | "mat4x2"
            | "mat4x3" | "mat4x4" => {
                let ty = self.materialize_type(ty_expr, LayoutRule::None)?;
                if args.is_empty() {
                    return Ok((ty, self.module.const_null(ty)));
                }
                let column = self.module.ty(ty).as_matrix().unwrap().column;
                let mut ids = Vec::with_capacity(args.len());
                for arg in args {
                    let (_, id) = self.lower_expr(fs, arg, Some(column))?;
                    ids.push(id);
                }
                let id = self.emit_value(
                    fs,
                    Opcode::Construct,
                    ty,
                    Instr::new(Opcode::Construct).args(&ids),
                );
                Ok((ty, id))
            }
            "array" => {
                let elem = match ty_expr.ty_args.first() {
                    Some(arg) => Some(self.materialize_type(arg, LayoutRule::None)?),
                    None => None,
                };
                let mut lowered = Vec::with_capacity(args.len());
                let mut elem = elem;
                for arg in args {
                    let value = self.lower_expr(fs, arg, elem)?;
                    if elem.is_none() {
                        elem = Some(value.0);
                    }
                    lowered.push(value);
                }
                let elem =
                    elem.ok_or_else(|| invalid("cannot infer array constructor element type"))?;
                let ty = self.module.ty_array(elem, lowered.len() as u32, None);
                let ids: Vec<Id> = lowered.iter().map(|x| x.1).collect();
                let id = self.emit_value(
                    fs,
                    Opcode::Construct,
                    ty,
                    Instr::new(Opcode::Construct).args(&ids),
                );
                Ok((ty, id))
            }
            name => {
                let decl_idx = self
                    .struct_decl_index(name)
                    .ok_or_else(|| invalid(format!("unknown constructor: {}", name)))?;
                let ty = self.materialize_struct(name, decl_idx, LayoutRule::None)?;
                if args.is_empty() {
                    return Ok((ty, self.module.const_null(ty)));
                }
                let members: Vec<TypeId> = self
                    .module
                    .ty(ty)
                    .as_struct()
                    .unwrap()
                    .members
                    .iter()
                    .map(|x| x.ty)
                    .collect();
                if args.len() != members.len() {
                    return Err(invalid(format!(
                        "constructor of {} takes {} arguments",
                        name,
                        members.len()
                    )));
                }
                let mut ids = Vec::with_capacity(args.len());
                for (arg, member_ty) in args.iter().zip(members.iter()) {
                    let (arg_ty, id) = self.lower_expr(fs, arg, Some(*member_ty))?;
                    if arg_ty != *member_ty {
                        return Err(invalid(format!("member type mismatch constructing {}", name)));
                    }
                    ids.push(id);
                }
                let id = self.emit_value(
                    fs,
                    Opcode::Construct,
                    ty,
                    Instr::new(Opcode::Construct).args(&ids),
                );
                Ok((ty, id))
            }
        }
    }

    fn lower_intrinsic(
        &mut self,
        fs: &mut FuncState,
        f: BuiltinFn,
        args: &[Expr],
        hint: Option<TypeId>,
    ) -> Result<(TypeId, Id)> {
        let mut lowered: Vec<(TypeId, Id)> = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let arg_hint = if i == 0 {
                hint
            } else {
                Some(lowered[0].0)
            };
            lowered.push(self.lower_expr(fs, arg, arg_hint)?);
        }

        if f == BuiltinFn::Select {
            // WGSL order is (false_value, true_value, cond); SSIR keeps the
            // native (cond, true_value, false_value) order.
            if lowered.len() != 3 {
                return Err(invalid("select takes three arguments"));
            }
            let ty = lowered[1].0;
            let id = self.emit_value(
                fs,
                Opcode::Builtin,
                ty,
                Instr::new(Opcode::Builtin)
                    .args(&[lowered[2].1, lowered[1].1, lowered[0].1])
                    .imm(BuiltinFn::Select as u32),
            );
            return Ok((ty, id));
        }
        // Same-shape intrinsics tolerate scalar arguments against a vector
        // first operand by splatting, the way mixed arithmetic does.
        if let Some((first_ty, _)) = lowered.first().copied() {
            if self.module.ty(first_ty).is_vector() {
                for i in 1..lowered.len() {
                    let (arg_ty, arg_id) = lowered[i];
                    let elem = self.module.ty(first_ty).as_vector().unwrap().elem;
                    if arg_ty == elem {
                        let id = self.emit_value(
                            fs,
                            Opcode::Splat,
                            first_ty,
                            Instr::new(Opcode::Splat).arg(arg_id),
                        );
                        lowered[i] = (first_ty, id);
                    }
                }
            }
        }

        let first_ty = lowered
            .first()
            .map(|x| x.0)
            .ok_or_else(|| invalid(format!("{} takes at least one argument", f.name())))?;
        let result_ty = self.intrinsic_result_ty(f, first_ty)?;
        let ids: Vec<Id> = lowered.iter().map(|x| x.1).collect();
        let id = self.emit_value(
            fs,
            Opcode::Builtin,
            result_ty,
            Instr::new(Opcode::Builtin).args(&ids).imm(f as u32),
        );
        Ok((result_ty, id))
    }

    fn intrinsic_result_ty(&mut self, f: BuiltinFn, first_ty: TypeId) -> Result<TypeId> {
        use BuiltinFn::*;
        let ty = match f {
            Dot | Length | Distance | Determinant => self
                .module
                .scalar_elem(first_ty)
                .ok_or_else(|| invalid(format!("{} needs a vector argument", f.name())))?,
            All | Any => self.module.ty_bool(),
            IsInf | IsNan => {
                let bool_ty = self.module.ty_bool();
                match self.module.ty(first_ty).clone() {
                    Type::Vector(x) => self.module.ty_vec(bool_ty, x.count),
                    _ => bool_ty,
                }
            }
            Pack4x8Snorm | Pack4x8Unorm | Pack2x16Snorm | Pack2x16Unorm | Pack2x16Float => {
                self.module.ty_u32()
            }
            Unpack2x16Snorm | Unpack2x16Unorm | Unpack2x16Float => {
                let f32_ty = self.module.ty_f32();
                self.module.ty_vec(f32_ty, 2)
            }
            Unpack4x8Snorm | Unpack4x8Unorm => {
                let f32_ty = self.module.ty_f32();
                self.module.ty_vec(f32_ty, 4)
            }
            _ => first_ty,
        };
        Ok(ty)
    }

    fn lower_texture_call(
        &mut self,
        fs: &mut FuncState,
        name: &str,
        args: &[Expr],
    ) -> Result<(TypeId, Id)> {
        // textureGather leads with a component index; peel it off so every
        // call shape below starts with the texture.
        let (gather_component, args) = if name == "textureGather" && args.len() == 4 {
            (Some(&args[0]), &args[1..])
        } else {
            (None, args)
        };

        let mut lowered = Vec::with_capacity(args.len() + 1);
        for arg in args.iter() {
            lowered.push(self.lower_expr(fs, arg, None)?);
        }
        let (tex_ty, _) = *lowered
            .first()
            .ok_or_else(|| invalid(format!("{} needs a texture argument", name)))?;

        let sampled_scalar = match self.module.ty(tex_ty).clone() {
            Type::Texture(x) => match x.sampled {
                ScalarKind::Float => self.module.ty_f32(),
                ScalarKind::Sint => self.module.ty_i32(),
                ScalarKind::Uint => self.module.ty_u32(),
            },
            Type::TextureDepth(_) => self.module.ty_f32(),
            Type::TextureStorage(_) => self.module.ty_f32(),
            _ => return Err(invalid(format!("{} called on a non-texture", name))),
        };
        let texel_vec = self.module.ty_vec(sampled_scalar, 4);
        let is_depth = self.module.ty(tex_ty).is_texture_depth();

        let (op, result_ty) = match (name, args.len()) {
            ("textureSample", 3) => (Opcode::TexSample, texel_vec),
            ("textureSample", 4) => (Opcode::TexSampleOffset, texel_vec),
            ("textureSampleBias", 4) => (Opcode::TexSampleBias, texel_vec),
            ("textureSampleBias", 5) => (Opcode::TexSampleBiasOffset, texel_vec),
            ("textureSampleLevel", 4) => (Opcode::TexSampleLevel, texel_vec),
            ("textureSampleLevel", 5) => (Opcode::TexSampleLevelOffset, texel_vec),
            ("textureSampleGrad", 5) => (Opcode::TexSampleGrad, texel_vec),
            ("textureSampleGrad", 6) => (Opcode::TexSampleGradOffset, texel_vec),
            ("textureSampleCompare", 4) => (Opcode::TexSampleCmp, sampled_scalar),
            ("textureSampleCompare", 5) => (Opcode::TexSampleCmpOffset, sampled_scalar),
            ("textureSampleCompareLevel", 4) => (Opcode::TexSampleCmpLevel, sampled_scalar),
            ("textureSampleCompareLevel", 5) => (Opcode::TexSampleCmpLevelOffset, sampled_scalar),
            ("textureGather", 3) => (Opcode::TexGather, texel_vec),
            ("textureGather", 4) => (Opcode::TexGatherOffset, texel_vec),
            ("textureGatherCompare", 4) => (Opcode::TexGatherCmp, texel_vec),
            ("textureLoad", 2) | ("textureLoad", 3) => (Opcode::TexLoad, texel_vec),
            ("textureStore", 3) => (Opcode::TexStore, texel_vec),
            ("textureDimensions", 1) | ("textureDimensions", 2) => {
                let u32_ty = self.module.ty_u32();
                let dim = match self.module.ty(tex_ty).clone() {
                    Type::Texture(x) => x.dim,
                    Type::TextureDepth(x) => x.dim,
                    Type::TextureStorage(x) => x.dim,
                    _ => Dim::Dim2D,
                };
                let size_ty = match dim {
                    Dim::Dim1D => u32_ty,
                    Dim::Dim3D => self.module.ty_vec(u32_ty, 3),
                    _ => self.module.ty_vec(u32_ty, 2),
                };
                (Opcode::TexSize, size_ty)
            }
            ("textureNumLevels", 1) => (Opcode::TexQueryLevels, self.module.ty_u32()),
            ("textureNumSamples", 1) => (Opcode::TexQuerySamples, self.module.ty_u32()),
            _ => {
                return Err(invalid(format!(
                    "{} with {} arguments is not a texture builtin",
                    name,
                    args.len()
                )))
            }
        };
        if op == Opcode::TexStore {
            let ids: Vec<Id> = lowered.iter().map(|x| x.1).collect();
            self.emit(fs, Instr::new(op).args(&ids));
            let void = self.module.ty_void();
            return Ok((void, 0));
        }

        let mut ids: Vec<Id> = lowered.iter().map(|x| x.1).collect();
        if let Some(component) = gather_component {
            let u32_ty = self.module.ty_u32();
            let (_, component) = self.lower_expr(fs, component, Some(u32_ty))?;
            ids.push(component);
        }
        let id = self.emit_value(fs, op, result_ty, Instr::new(op).args(&ids));
        // The image instruction always yields four texels; a plain sample of
        // a depth texture is the first one.
        if is_depth && matches!(op, Opcode::TexSample | Opcode::TexSampleLevel) {
            let out = self.emit_value(
                fs,
                Opcode::Extract,
                sampled_scalar,
                Instr::new(Opcode::Extract).arg(id).imm(0),
            );
            return Ok((sampled_scalar, out));
        }
        Ok((result_ty, id))
    }

    fn lower_atomic_call(
        &mut self,
        fs: &mut FuncState,
        name: &str,
        args: &[Expr],
    ) -> Result<(TypeId, Id)> {
        let op = match name {
            "atomicLoad" => AtomicOp::Load,
            "atomicStore" => AtomicOp::Store,
            "atomicAdd" => AtomicOp::Add,
            "atomicSub" => AtomicOp::Sub,
            "atomicMin" => AtomicOp::Min,
            "atomicMax" => AtomicOp::Max,
            "atomicAnd" => AtomicOp::And,
            "atomicOr" => AtomicOp::Or,
            "atomicXor" => AtomicOp::Xor,
            "atomicExchange" => AtomicOp::Exchange,
            "atomicCompareExchangeWeak" => AtomicOp::CompareExchange,
            _ => return Err(invalid(format!("unknown atomic builtin: {}", name))),
        };
        let place = args
            .first()
            .ok_or_else(|| invalid(format!("{} needs a destination", name)))?;
        let (pointee, ptr, space) = self.lower_place(fs, place)?;

        // Downstream validators want explicit AcquireRelease on RMW atomics;
        // the memory flag tracks the pointee's address space.
        const ACQUIRE_RELEASE: u32 = 0x8;
        const UNIFORM_MEMORY: u32 = 0x40;
        const WORKGROUP_MEMORY: u32 = 0x100;
        const SCOPE_DEVICE: u32 = 1;
        const SCOPE_WORKGROUP: u32 = 2;
        let (scope, semantics) = match space {
            AddressSpace::Workgroup => (SCOPE_WORKGROUP, ACQUIRE_RELEASE | WORKGROUP_MEMORY),
            _ => (SCOPE_DEVICE, ACQUIRE_RELEASE | UNIFORM_MEMORY),
        };

        let mut ids = vec![ptr];
        for arg in &args[1..] {
            let (arg_ty, id) = self.lower_expr(fs, arg, Some(pointee))?;
            if arg_ty != pointee {
                return Err(invalid(format!("operand type mismatch in {}", name)));
            }
            ids.push(id);
        }
        // WGSL passes (ptr, comparator, value); the instruction wants the
        // value before the comparator.
        if op == AtomicOp::CompareExchange && ids.len() == 3 {
            ids.swap(1, 2);
        }
        let instr = Instr::new(Opcode::Atomic)
            .args(&ids)
            .imms(&[op as u32, scope, semantics]);
        if op == AtomicOp::Store {
            self.emit(fs, instr);
            let void = self.module.ty_void();
            Ok((void, 0))
        } else {
            let id = self.emit_value(fs, Opcode::Atomic, pointee, instr);
            Ok((pointee, id))
        }
    }

    fn lower_array_length(&mut self, fs: &mut FuncState, args: &[Expr]) -> Result<(TypeId, Id)> {
        let arg = match args {
            [arg] => arg,
            _ => return Err(invalid("arrayLength takes one argument")),
        };
        let u32_ty = self.module.ty_u32();
        match arg {
            Expr::Ident(ident) => {
                let global = self
                    .globals
                    .get(&ident.name)
                    .copied()
                    .ok_or_else(|| invalid("arrayLength needs a storage buffer array"))?;
                if !global.wrapped || !self.module.ty(global.inner).is_runtime_array() {
                    return Err(invalid("arrayLength needs a runtime-sized array"));
                }
                let id = self.emit_value(
                    fs,
                    Opcode::ArrayLen,
                    u32_ty,
                    Instr::new(Opcode::ArrayLen).arg(global.ptr).imm(0),
                );
                Ok((u32_ty, id))
            }
            Expr::Member { base, member, .. } => {
                let base_name = match &**base {
                    Expr::Ident(x) => &x.name,
                    _ => return Err(unsupported("arrayLength of a nested expression")),
                };
                let global = self
                    .globals
                    .get(base_name)
                    .copied()
                    .ok_or_else(|| invalid("arrayLength needs a storage buffer array"))?;
                let member_idx = self
                    .module
                    .ty(global.pointee)
                    .as_struct()
                    .and_then(|x| {
                        x.members
                            .iter()
                            .position(|m| m.name.as_deref() == Some(member.as_str()))
                    })
                    .ok_or_else(|| invalid("arrayLength member does not exist"))?;
                let id = self.emit_value(
                    fs,
                    Opcode::ArrayLen,
                    u32_ty,
                    Instr::new(Opcode::ArrayLen)
                        .arg(global.ptr)
                        .imm(member_idx as u32),
                );
                Ok((u32_ty, id))
            }
            _ => Err(unsupported("arrayLength of a nested expression")),
        }
    }
}

// Free helpers.

fn is_constructor_name(name: &str) -> bool {
    matches!(
        name,
        "vec2"
            | "vec3"
            | "vec4"
            | "mat2x2"
            | "mat2x3"
            | "mat2x4"
            | "mat3x2"
            | "mat3x3"
            | "mat3x4"
            | "mat4x2"
            | "mat4x3"
            | "mat4x4"
            | "array"
            | "f32"
            | "f16"
            | "i32"
            | "u32"
            | "bool"
    )
}

fn barrier_kind(name: &str) -> Option<BarrierKind> {
    let kind = match name {
        "workgroupBarrier" => BarrierKind::Workgroup,
        "storageBarrier" => BarrierKind::Storage,
        "textureBarrier" => BarrierKind::Texture,
        _ => return None,
    };
    Some(kind)
}

fn is_literal(expr: &Expr) -> bool {
    matches!(expr, Expr::IntLit(_) | Expr::FloatLit(_))
        || matches!(expr, Expr::Unary { op: UnOp::Neg, expr, .. } if is_literal(expr))
}

fn const_scalar_u64(value: &ConstValue) -> Option<u64> {
    match value {
        ConstValue::S32(x) => Some(*x as u64),
        ConstValue::U32(x) => Some(*x as u64),
        ConstValue::S64(x) => Some(*x as u64),
        ConstValue::U64(x) => Some(*x),
        _ => None,
    }
}

fn zero_value(ty: &Type) -> Result<ConstValue> {
    let value = match ty {
        Type::Bool => ConstValue::Bool(false),
        Type::Int {
            is_signed: true, ..
        } => ConstValue::S32(0),
        Type::Int { .. } => ConstValue::U32(0),
        Type::Float { bits: 16 } => ConstValue::from(f16::from_f32(0.0)),
        Type::Float { .. } => ConstValue::from(0.0f32),
        _ => return Err(unsupported("override of a non-scalar type")),
    };
    Ok(value)
}

fn is_resource_type(name: &str) -> bool {
    name.starts_with("texture_") || name == "sampler" || name == "sampler_comparison"
}

fn texture_dim(name: &str) -> Result<(Dim, bool)> {
    let arrayed = name.ends_with("_array");
    let dim = if name.contains("1d") {
        Dim::Dim1D
    } else if name.contains("3d") {
        Dim::Dim3D
    } else if name.contains("cube") {
        Dim::DimCube
    } else {
        Dim::Dim2D
    };
    Ok((dim, arrayed))
}

fn image_format(name: &str) -> Option<ImageFormat> {
    let format = match name {
        "rgba8unorm" => ImageFormat::Rgba8,
        "rgba8snorm" => ImageFormat::Rgba8Snorm,
        "rgba8uint" => ImageFormat::Rgba8ui,
        "rgba8sint" => ImageFormat::Rgba8i,
        "rgba16uint" => ImageFormat::Rgba16ui,
        "rgba16sint" => ImageFormat::Rgba16i,
        "rgba16float" => ImageFormat::Rgba16f,
        "r32uint" => ImageFormat::R32ui,
        "r32sint" => ImageFormat::R32i,
        "r32float" => ImageFormat::R32f,
        "rg32uint" => ImageFormat::Rg32ui,
        "rg32sint" => ImageFormat::Rg32i,
        "rg32float" => ImageFormat::Rg32f,
        "rgba32uint" => ImageFormat::Rgba32ui,
        "rgba32sint" => ImageFormat::Rgba32i,
        "rgba32float" => ImageFormat::Rgba32f,
        _ => return None,
    };
    Some(format)
}

fn swizzle_lanes(member: &str) -> Option<Vec<u32>> {
    if member.len() > 4 {
        return None;
    }
    member
        .chars()
        .map(|c| match c {
            'x' | 'r' => Some(0),
            'y' | 'g' => Some(1),
            'z' | 'b' => Some(2),
            'w' | 'a' => Some(3),
            _ => None,
        })
        .collect()
}

fn map_builtin(
    name: &str,
    stage: Stage,
    space: AddressSpace,
    draw_parameters: bool,
) -> Result<spirv::BuiltIn> {
    let is_output = space == AddressSpace::Output;
    let builtin = match (name, stage, is_output) {
        ("position", Stage::Vertex, true) => spirv::BuiltIn::Position,
        ("position", Stage::Fragment, false) => spirv::BuiltIn::FragCoord,
        ("vertex_index", Stage::Vertex, false) => spirv::BuiltIn::VertexIndex,
        ("instance_index", Stage::Vertex, false) => spirv::BuiltIn::InstanceIndex,
        ("draw_index", Stage::Vertex, false) if draw_parameters => spirv::BuiltIn::DrawIndex,
        ("front_facing", Stage::Fragment, false) => spirv::BuiltIn::FrontFacing,
        ("frag_depth", Stage::Fragment, true) => spirv::BuiltIn::FragDepth,
        ("sample_index", Stage::Fragment, false) => spirv::BuiltIn::SampleId,
        ("sample_mask", Stage::Fragment, _) => spirv::BuiltIn::SampleMask,
        ("global_invocation_id", Stage::Compute, false) => spirv::BuiltIn::GlobalInvocationId,
        ("local_invocation_id", Stage::Compute, false) => spirv::BuiltIn::LocalInvocationId,
        ("local_invocation_index", Stage::Compute, false) => spirv::BuiltIn::LocalInvocationIndex,
        ("workgroup_id", Stage::Compute, false) => spirv::BuiltIn::WorkgroupId,
        ("num_workgroups", Stage::Compute, false) => spirv::BuiltIn::NumWorkgroups,
        _ => {
            return Err(invalid(format!(
                "@builtin({}) is not valid as a {} {}",
                name,
                stage,
                if is_output { "output" } else { "input" }
            )))
        }
    };
    Ok(builtin)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parse::parse;
    use crate::resolve::resolve;

    fn lower_src(src: &str) -> Module {
        let prog = parse(src);
        assert!(!prog.had_error(), "parse errors: {:?}", prog.errors);
        let resolver = resolve(&prog);
        lower(&prog, &resolver, &LowerOptions::default()).unwrap()
    }

    fn func<'m>(m: &'m Module, name: &str) -> &'m Function {
        m.functions
            .iter()
            .find(|x| x.name.as_deref() == Some(name))
            .unwrap()
    }

    fn opcodes(func: &Function) -> Vec<Opcode> {
        func.blocks
            .iter()
            .flat_map(|b| b.instrs.iter().map(|i| i.op))
            .collect()
    }

    #[test]
    fn test_compute_doubler() {
        let m = lower_src(
            "@group(0) @binding(0) var<storage, read_write> data: array<f32>;
            @compute @workgroup_size(64)
            fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
                data[gid.x] = data[gid.x] * 2.0;
            }",
        );
        assert_eq!(m.entry_points.len(), 1);
        let entry = &m.entry_points[0];
        assert_eq!(entry.stage, Stage::Compute);
        assert_eq!(entry.workgroup_size, [64, 1, 1]);

        // The storage global wraps the runtime array in a block struct.
        let data = m
            .globals
            .iter()
            .find(|x| x.name.as_deref() == Some("data"))
            .unwrap();
        assert_eq!(data.space, AddressSpace::Storage);
        assert_eq!((data.group, data.binding), (Some(0), Some(0)));
        let pointee = m.ty(data.ty).as_pointer().unwrap().pointee;
        let wrapper = m.ty(pointee).as_struct().unwrap();
        assert!(m.ty(wrapper.members[0].ty).is_runtime_array());

        let main = func(&m, "main");
        assert_eq!(main.blocks.len(), 1);
        let ops = opcodes(main);
        assert!(ops.contains(&Opcode::Access));
        assert!(ops.contains(&Opcode::Load));
        assert!(ops.contains(&Opcode::Mul));
        assert!(ops.contains(&Opcode::Store));
        assert_eq!(*ops.last().unwrap(), Opcode::ReturnVoid);

        // The interface carries only Input/Output globals.
        for id in entry.interface.iter() {
            let global = m.global(*id).unwrap();
            assert!(matches!(
                global.space,
                AddressSpace::Input | AddressSpace::Output
            ));
        }
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_vertex_fragment_pair() {
        let m = lower_src(
            "struct VertexOutput {
                @builtin(position) pos: vec4<f32>,
                @location(0) color: vec3<f32>,
            }
            @vertex
            fn vs_main(@builtin(vertex_index) idx: u32) -> VertexOutput {
                var out: VertexOutput;
                out.pos = vec4<f32>(0.0, 0.0, 0.0, 1.0);
                out.color = vec3<f32>(1.0, 0.0, 0.0);
                return out;
            }
            @fragment
            fn fs_main(@location(0) color: vec3<f32>) -> @location(0) vec4<f32> {
                return vec4<f32>(color, 1.0);
            }",
        );
        assert_eq!(m.entry_points.len(), 2);
        assert_eq!(m.entry_points[0].stage, Stage::Vertex);
        assert_eq!(m.entry_points[1].stage, Stage::Fragment);

        let vs = &m.entry_points[0];
        let builtins: Vec<_> = vs
            .interface
            .iter()
            .filter_map(|id| m.global(*id).and_then(|x| x.builtin))
            .collect();
        assert!(builtins.contains(&spirv::BuiltIn::Position));
        assert!(builtins.contains(&spirv::BuiltIn::VertexIndex));

        let fs_entry = &m.entry_points[1];
        let out = fs_entry
            .interface
            .iter()
            .filter_map(|id| m.global(*id))
            .find(|x| x.space == AddressSpace::Output)
            .unwrap();
        assert_eq!(out.location, Some(0));
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_constructor_lowers_to_construct_with_dedup() {
        let m = lower_src("fn f() -> vec4<f32> { return vec4<f32>(1.0, 1.0, 3.0, 4.0); }");
        let f = func(&m, "f");
        let construct = f.blocks[0]
            .instrs
            .iter()
            .find(|x| x.op == Opcode::Construct)
            .unwrap();
        assert_eq!(construct.args.len(), 4);
        // Equal literals share one constant id.
        assert_eq!(construct.args[0], construct.args[1]);
        assert_ne!(construct.args[0], construct.args[2]);
    }

    #[test]
    fn test_short_circuit_and_produces_phi() {
        let m = lower_src(
            "fn f(a: bool, b: bool) -> bool {
                return a && b;
            }",
        );
        let f = func(&m, "f");
        let ops = opcodes(f);
        assert!(ops.contains(&Opcode::SelectionMerge));
        assert!(ops.contains(&Opcode::BranchCond));
        assert!(ops.contains(&Opcode::Phi));
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_if_else_structured_flow() {
        let m = lower_src(
            "fn f(x: f32) -> f32 {
                var y: f32 = 0.0;
                if x > 0.0 {
                    y = 1.0;
                } else {
                    y = 2.0;
                }
                return y;
            }",
        );
        let f = func(&m, "f");
        assert_eq!(f.blocks.len(), 4);
        let ops = opcodes(f);
        assert!(ops.contains(&Opcode::SelectionMerge));
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_while_loop_merge() {
        let m = lower_src(
            "fn f() {
                var i: i32 = 0;
                while i < 4 {
                    i = i + 1;
                }
            }",
        );
        let f = func(&m, "f");
        let ops = opcodes(f);
        assert!(ops.contains(&Opcode::LoopMerge));
        // Header, body, continue and merge on top of the entry block.
        assert_eq!(f.blocks.len(), 5);
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_for_desugars_to_while() {
        let m = lower_src(
            "fn f() -> i32 {
                var acc: i32 = 0;
                for (var i: i32 = 0; i < 4; i++) {
                    acc += i;
                }
                return acc;
            }",
        );
        let f = func(&m, "f");
        let ops = opcodes(f);
        assert!(ops.contains(&Opcode::LoopMerge));
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_override_becomes_spec_constant() {
        let m = lower_src(
            "override scale: f32 = 2.0;
            override bias: f32;
            fn f() -> f32 { return scale + bias; }",
        );
        let spec_ids: Vec<_> = m
            .constants()
            .iter()
            .filter_map(|x| x.spec_id)
            .collect();
        assert_eq!(spec_ids, vec![0, 1]);
    }

    #[test]
    fn test_transitive_uniform_reaches_module() {
        let m = lower_src(
            "@group(0) @binding(0) var<uniform> u: f32;
            fn use_u() -> f32 { return u; }
            fn middle() -> f32 { return use_u(); }
            @vertex fn main_vs() -> @builtin(position) vec4<f32> {
                let x = middle();
                return vec4<f32>(x, 0.0, 0.0, 1.0);
            }",
        );
        // The uniform exists and the call chain lowers to Call instructions.
        assert!(m
            .globals
            .iter()
            .any(|x| x.space == AddressSpace::Uniform));
        let main = func(&m, "main_vs");
        assert!(opcodes(main).contains(&Opcode::Call));
        assert!(ssir_core::validate(&m).is_empty());
    }

    #[test]
    fn test_uniform_struct_std140_offsets() {
        let m = lower_src(
            "struct Params {
                dir: vec3<f32>,
                strength: f32,
                transform: mat4x4<f32>,
            }
            @group(0) @binding(0) var<uniform> params: Params;
            fn f() -> f32 { return params.strength; }",
        );
        let params = m
            .globals
            .iter()
            .find(|x| x.name.as_deref() == Some("params"))
            .unwrap();
        let pointee = m.ty(params.ty).as_pointer().unwrap().pointee;
        let members = &m.ty(pointee).as_struct().unwrap().members;
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 12);
        assert_eq!(members[2].offset, 16);
        assert_eq!(members[2].matrix.unwrap().stride, 16);
    }

    #[test]
    fn test_swizzles() {
        let m = lower_src(
            "fn f(v: vec4<f32>) -> vec2<f32> {
                let x = v.x;
                return v.xy;
            }",
        );
        let f = func(&m, "f");
        let ops = opcodes(f);
        assert!(ops.contains(&Opcode::Extract));
        assert!(ops.contains(&Opcode::Shuffle));
    }

    #[test]
    fn test_intrinsic_call() {
        let m = lower_src("fn f(a: vec3<f32>, b: vec3<f32>) -> f32 { return dot(a, b); }");
        let f = func(&m, "f");
        let builtin = f.blocks[0]
            .instrs
            .iter()
            .find(|x| x.op == Opcode::Builtin)
            .unwrap();
        assert_eq!(builtin.extra[0], BuiltinFn::Dot as u32);
        // dot yields the scalar element type.
        let m2 = &m;
        assert!(m2.ty(builtin.ty.unwrap()).is_float());
    }

    #[test]
    fn test_mat_vec_multiply_is_matmul() {
        let m = lower_src(
            "fn f(m: mat4x4<f32>, v: vec4<f32>) -> vec4<f32> { return m * v; }",
        );
        let f = func(&m, "f");
        assert!(opcodes(f).contains(&Opcode::MatMul));
    }

    #[test]
    fn test_parse_errors_fail_lowering() {
        let prog = parse("fn broken( {");
        let resolver = resolve(&prog);
        let err = lower(&prog, &resolver, &LowerOptions::default()).unwrap_err();
        assert_eq!(err.kind, LowerErrorKind::InvalidInput);
    }

    #[test]
    fn test_type_mismatch_reported() {
        let prog = parse("fn f(a: u32, b: i32) -> u32 { return a + b; }");
        let resolver = resolve(&prog);
        let err = lower(&prog, &resolver, &LowerOptions::default()).unwrap_err();
        assert_eq!(err.kind, LowerErrorKind::InvalidInput);
    }

    #[test]
    fn test_workgroup_var_and_barrier() {
        let m = lower_src(
            "var<workgroup> tile: array<f32, 64>;
            @compute @workgroup_size(64)
            fn main(@builtin(local_invocation_index) i: u32) {
                tile[i] = 1.0;
                workgroupBarrier();
            }",
        );
        let main = func(&m, "main");
        let barrier = main.blocks[0]
            .instrs
            .iter()
            .find(|x| x.op == Opcode::Barrier)
            .unwrap();
        assert_eq!(barrier.extra[0], BarrierKind::Workgroup as u32);
        assert!(m
            .globals
            .iter()
            .any(|x| x.space == AddressSpace::Workgroup));
    }

    #[test]
    fn test_texture_sample_shape() {
        let m = lower_src(
            "@group(0) @binding(0) var tex: texture_2d<f32>;
            @group(0) @binding(1) var samp: sampler;
            @fragment
            fn fs(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
                return textureSample(tex, samp, uv);
            }",
        );
        let fs = func(&m, "fs");
        let sample = fs.blocks[0]
            .instrs
            .iter()
            .find(|x| x.op == Opcode::TexSample)
            .unwrap();
        assert_eq!(sample.args.len(), 3);
        let texel = m.ty(sample.ty.unwrap()).as_vector().unwrap();
        assert_eq!(texel.count, 4);
    }
}
