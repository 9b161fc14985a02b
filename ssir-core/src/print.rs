//! Human-readable rendering of SSIR modules.
//!
//! The output is line-oriented and stable so tests can match against it. It
//! is a debugging surface, not a parseable interchange format.
use std::fmt::Write;

use num_traits::FromPrimitive;

use crate::constant::{ConstValue, Id};
use crate::instr::{AtomicOp, BarrierKind, BuiltinFn, Instr, Opcode};
use crate::module::{Function, Module};
use crate::ty::{Dim, Type, TypeId};

/// Render a type the way WGSL-side code would spell it.
pub fn ty_to_string(m: &Module, ty: TypeId) -> String {
    match m.ty(ty) {
        Type::Void => "void".to_owned(),
        Type::Bool => "bool".to_owned(),
        Type::Int { bits, is_signed } => match is_signed {
            true => format!("i{}", bits),
            false => format!("u{}", bits),
        },
        Type::Float { bits } => format!("f{}", bits),
        Type::Vector(x) => format!("vec{}<{}>", x.count, ty_to_string(m, x.elem)),
        Type::Matrix(x) => {
            let elem = m.ty(x.column).as_vector().map(|v| v.elem).unwrap_or(x.column);
            format!("mat{}x{}<{}>", x.columns, x.rows, ty_to_string(m, elem))
        }
        Type::Array(x) => format!("array<{}, {}>", ty_to_string(m, x.elem), x.len),
        Type::RuntimeArray(x) => format!("array<{}>", ty_to_string(m, x.elem)),
        Type::Struct(x) => match x.name() {
            Some(name) => name.to_owned(),
            None => {
                let members = x
                    .members
                    .iter()
                    .map(|member| ty_to_string(m, member.ty))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("struct {{ {} }}", members)
            }
        },
        Type::Pointer(x) => format!("ptr<{}, {}>", x.space, ty_to_string(m, x.pointee)),
        Type::Sampler => "sampler".to_owned(),
        Type::SamplerComparison => "sampler_comparison".to_owned(),
        Type::Texture(x) => format!(
            "texture_{}{}<{}>",
            dim_suffix(x.dim),
            if x.arrayed { "_array" } else { "" },
            x.sampled
        ),
        Type::TextureStorage(x) => format!(
            "texture_storage_{}{}<{:?}, {}>",
            dim_suffix(x.dim),
            if x.arrayed { "_array" } else { "" },
            x.format,
            x.access
        ),
        Type::TextureDepth(x) => format!(
            "texture_depth_{}{}",
            dim_suffix(x.dim),
            if x.arrayed { "_array" } else { "" }
        ),
    }
}

fn dim_suffix(dim: Dim) -> &'static str {
    match dim {
        Dim::Dim1D => "1d",
        Dim::Dim2D => "2d",
        Dim::Dim3D => "3d",
        Dim::DimCube => "cube",
        _ => "2d",
    }
}

fn const_to_string(m: &Module, id: Id) -> String {
    let constant = match m.constant(id) {
        Some(x) => x,
        None => return format!("%{}", id),
    };
    match &constant.value {
        ConstValue::Bool(x) => x.to_string(),
        ConstValue::S32(x) => x.to_string(),
        ConstValue::S64(x) => x.to_string(),
        ConstValue::U32(x) => format!("{}u", x),
        ConstValue::U64(x) => format!("{}u", x),
        ConstValue::F16(x) => format!("{}h", x),
        ConstValue::F32(x) => format!("{:?}", x.0),
        ConstValue::F64(x) => format!("{:?}", x.0),
        ConstValue::Composite(components) => {
            let inner = components
                .iter()
                .map(|x| format!("%{}", x))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{{ {} }}", inner)
        }
        ConstValue::Null => "null".to_owned(),
    }
}

fn opcode_name(op: Opcode) -> String {
    // Debug names are CamelCase; the printed form is lowercase with dots.
    format!("{:?}", op).to_lowercase()
}

fn instr_to_string(m: &Module, instr: &Instr) -> String {
    let mut out = String::new();
    if let (Some(result), Some(ty)) = (instr.result, instr.ty) {
        write!(out, "%{} : {} = ", result, ty_to_string(m, ty)).unwrap();
    }
    out.push_str(&opcode_name(instr.op));
    match instr.op {
        Opcode::Builtin => {
            let name = instr
                .extra
                .first()
                .and_then(|x| BuiltinFn::from_u32(*x))
                .map(|x| x.name())
                .unwrap_or("?");
            write!(out, ".{}", name).unwrap();
        }
        Opcode::Barrier => {
            let kind = instr.extra.first().and_then(|x| BarrierKind::from_u32(*x));
            write!(out, ".{:?}", kind.unwrap_or(BarrierKind::Workgroup)).unwrap();
        }
        Opcode::Atomic => {
            let op = instr.extra.first().and_then(|x| AtomicOp::from_u32(*x));
            write!(out, ".{:?}", op.unwrap_or(AtomicOp::Load)).unwrap();
        }
        _ => {}
    }
    for arg in instr.args.iter() {
        write!(out, " %{}", arg).unwrap();
    }
    if !instr.extra.is_empty() && !matches!(instr.op, Opcode::Builtin | Opcode::Barrier) {
        let extra = instr
            .extra
            .iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(out, " [{}]", extra).unwrap();
    }
    out
}

fn print_function(m: &Module, func: &Function, out: &mut String) {
    let name = func.name.as_deref().unwrap_or("<anonymous>");
    write!(
        out,
        "fn %{} {}(",
        func.id,
        name,
    )
    .unwrap();
    for (i, param) in func.params.iter().enumerate() {
        if i != 0 {
            out.push_str(", ");
        }
        write!(out, "%{}: {}", param.id, ty_to_string(m, param.ty)).unwrap();
    }
    writeln!(out, ") -> {} {{", ty_to_string(m, func.ret_ty)).unwrap();
    for local in func.locals.iter() {
        write!(out, "  local %{}: {}", local.id, ty_to_string(m, local.ty)).unwrap();
        match local.init {
            Some(init) => writeln!(out, " = {}", const_to_string(m, init)).unwrap(),
            None => out.push('\n'),
        }
    }
    for block in func.blocks.iter() {
        writeln!(out, "  block %{}:", block.id).unwrap();
        for instr in block.instrs.iter() {
            writeln!(out, "    {}", instr_to_string(m, instr)).unwrap();
        }
    }
    out.push_str("}\n");
}

/// Render a whole module.
pub fn module_to_string(m: &Module) -> String {
    let mut out = String::new();
    out.push_str("; SSIR\n");

    for constant in m.constants() {
        write!(
            out,
            "const %{}: {} = {}",
            constant.id,
            ty_to_string(m, constant.ty),
            const_to_string(m, constant.id)
        )
        .unwrap();
        match constant.spec_id {
            Some(spec_id) => writeln!(out, " spec({})", spec_id).unwrap(),
            None => out.push('\n'),
        }
    }

    for global in m.globals.iter() {
        write!(out, "global %{}: {}", global.id, ty_to_string(m, global.ty)).unwrap();
        if let Some(name) = &global.name {
            write!(out, " \"{}\"", name).unwrap();
        }
        if let (Some(group), Some(binding)) = (global.group, global.binding) {
            write!(out, " @group({}) @binding({})", group, binding).unwrap();
        }
        if let Some(location) = global.location {
            write!(out, " @location({})", location).unwrap();
        }
        if let Some(builtin) = global.builtin {
            write!(out, " @builtin({:?})", builtin).unwrap();
        }
        out.push('\n');
    }

    for func in m.functions.iter() {
        print_function(m, func, &mut out);
    }

    for entry in m.entry_points.iter() {
        write!(
            out,
            "entry {} \"{}\" fn=%{}",
            entry.stage, entry.name, entry.func
        )
        .unwrap();
        if entry.stage == crate::module::Stage::Compute {
            let [x, y, z] = entry.workgroup_size;
            write!(out, " workgroup_size({}, {}, {})", x, y, z).unwrap();
        }
        let interface = entry
            .interface
            .iter()
            .map(|x| format!("%{}", x))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, " interface=[{}]", interface).unwrap();
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ty::AddressSpace;

    #[test]
    fn test_ty_to_string() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let vec4 = m.ty_vec(f32_ty, 4);
        let mat4 = m.ty_matrix(vec4, 4, 4);
        let ptr = m.ty_ptr(vec4, AddressSpace::Storage);
        assert_eq!(ty_to_string(&m, vec4), "vec4<f32>");
        assert_eq!(ty_to_string(&m, mat4), "mat4x4<f32>");
        assert_eq!(ty_to_string(&m, ptr), "ptr<storage, vec4<f32>>");
    }

    #[test]
    fn test_module_print_contains_constants() {
        let mut m = Module::new();
        let c = m.const_f32(2.5);
        let text = module_to_string(&m);
        assert!(text.contains(&format!("const %{}: f32 = 2.5", c)));
    }
}
