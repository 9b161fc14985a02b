//! std140 / std430 memory layout computation.
//!
//! Sizes and alignments are in bytes. Types without an in-memory
//! representation (textures, samplers, pointers, void) report `None`.
use anyhow::{bail, Result};

use crate::module::Module;
use crate::ty::{LayoutRule, MatrixAxisOrder, MatrixLayout, StructMember, Type, TypeId};

fn round_up(x: u32, align: u32) -> u32 {
    (x + align - 1) / align * align
}

/// Alignment of a type under a layout rule.
pub fn align_of(m: &Module, ty: TypeId, rule: LayoutRule) -> Option<u32> {
    let align = match m.ty(ty) {
        Type::Bool => 4,
        Type::Int { bits, .. } | Type::Float { bits } => bits / 8,
        Type::Vector(x) => {
            let elem = align_of(m, x.elem, rule)?;
            match rule {
                // Scalar block layout packs vectors to their element.
                LayoutRule::Scalar => elem,
                // vec3 aligns like vec4.
                _ if x.count == 2 => 2 * elem,
                _ => 4 * elem,
            }
        }
        Type::Matrix(x) => matrix_stride_of(m, x.column, rule)?,
        Type::Array(x) => {
            let elem = align_of(m, x.elem, rule)?;
            match rule {
                LayoutRule::Std140 => round_up(elem, 16),
                _ => elem,
            }
        }
        Type::RuntimeArray(x) => {
            let elem = align_of(m, x.elem, rule)?;
            match rule {
                LayoutRule::Std140 => round_up(elem, 16),
                _ => elem,
            }
        }
        Type::Struct(x) => {
            let mut align = 1;
            for member in x.members.iter() {
                align = align.max(align_of(m, member.ty, rule)?);
            }
            match rule {
                LayoutRule::Std140 => round_up(align, 16),
                _ => align,
            }
        }
        _ => return None,
    };
    Some(align)
}

/// Size of a type under a layout rule. Runtime arrays are unsized.
pub fn size_of(m: &Module, ty: TypeId, rule: LayoutRule) -> Option<u32> {
    let size = match m.ty(ty) {
        Type::Bool => 4,
        Type::Int { bits, .. } | Type::Float { bits } => bits / 8,
        Type::Vector(x) => x.count * size_of(m, x.elem, rule)?,
        Type::Matrix(x) => x.columns * matrix_stride_of(m, x.column, rule)?,
        Type::Array(x) => {
            let stride = x.stride.or(array_stride_of(m, x.elem, rule))?;
            x.len * stride
        }
        Type::RuntimeArray(_) => return None,
        Type::Struct(x) => {
            let last = x.members.last()?;
            let end = last.offset + size_of(m, last.ty, rule).unwrap_or(0);
            round_up(end, align_of(m, ty, rule)?)
        }
        _ => return None,
    };
    Some(size)
}

/// Stride between elements of an array of `elem`.
pub fn array_stride_of(m: &Module, elem: TypeId, rule: LayoutRule) -> Option<u32> {
    let stride = round_up(size_of(m, elem, rule)?, align_of(m, elem, rule)?);
    match rule {
        LayoutRule::Std140 => Some(round_up(stride, 16)),
        _ => Some(stride),
    }
}

/// Stride between columns of a matrix with the given column vector type.
/// Never less than 16 under std140.
pub fn matrix_stride_of(m: &Module, column: TypeId, rule: LayoutRule) -> Option<u32> {
    let stride = round_up(size_of(m, column, rule)?, align_of(m, column, rule)?);
    match rule {
        LayoutRule::Std140 => Some(round_up(stride, 16)),
        _ => Some(stride),
    }
}

fn member_matrix_layout(m: &Module, ty: TypeId, rule: LayoutRule) -> Option<MatrixLayout> {
    match m.ty(ty) {
        Type::Matrix(x) => Some(MatrixLayout {
            order: MatrixAxisOrder::ColumnMajor,
            stride: matrix_stride_of(m, x.column, rule)?,
        }),
        Type::Array(x) => member_matrix_layout(m, x.elem, rule),
        Type::RuntimeArray(x) => member_matrix_layout(m, x.elem, rule),
        _ => None,
    }
}

/// Assign member offsets under `rule`. Returns the laid-out members and the
/// struct end offset (offset of the last member plus its size; the padded
/// struct size is derived by [`size_of`]). A runtime array is only legal as
/// the last member.
pub fn lay_out_struct(
    m: &Module,
    members: &[(Option<String>, TypeId)],
    rule: LayoutRule,
) -> Result<(Vec<StructMember>, u32)> {
    let mut out = Vec::with_capacity(members.len());
    let mut cursor = 0u32;
    for (i, (name, ty)) in members.iter().enumerate() {
        let align = align_of(m, *ty, rule)
            .ok_or_else(|| anyhow::anyhow!("member type has no in-memory layout"))?;
        let offset = round_up(cursor, align);
        out.push(StructMember {
            name: name.clone(),
            ty: *ty,
            offset,
            matrix: member_matrix_layout(m, *ty, rule),
        });
        match size_of(m, *ty, rule) {
            Some(size) => cursor = offset + size,
            None => {
                if i + 1 != members.len() {
                    bail!("unsized member must be the last member of a struct");
                }
                cursor = offset;
            }
        }
    }
    Ok((out, cursor))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ty::LayoutRule::{Std140, Std430};

    #[test]
    fn test_scalar_and_vector_layout() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let vec2 = m.ty_vec(f32_ty, 2);
        let vec3 = m.ty_vec(f32_ty, 3);
        let vec4 = m.ty_vec(f32_ty, 4);
        assert_eq!(size_of(&m, f32_ty, Std430), Some(4));
        assert_eq!(align_of(&m, vec2, Std430), Some(8));
        assert_eq!(size_of(&m, vec3, Std430), Some(12));
        assert_eq!(align_of(&m, vec3, Std430), Some(16));
        assert_eq!(align_of(&m, vec4, Std140), Some(16));
    }

    #[test]
    fn test_array_stride() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        assert_eq!(array_stride_of(&m, f32_ty, Std430), Some(4));
        assert_eq!(array_stride_of(&m, f32_ty, Std140), Some(16));
        let vec3 = m.ty_vec(f32_ty, 3);
        assert_eq!(array_stride_of(&m, vec3, Std430), Some(16));
    }

    #[test]
    fn test_uniform_struct_offsets() {
        // { vec3<f32>, f32, mat4x4<f32> } under std140.
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let vec3 = m.ty_vec(f32_ty, 3);
        let vec4 = m.ty_vec(f32_ty, 4);
        let mat4 = m.ty_matrix(vec4, 4, 4);
        let (members, _) =
            lay_out_struct(&m, &[(None, vec3), (None, f32_ty), (None, mat4)], Std140).unwrap();
        assert_eq!(members[0].offset, 0);
        assert_eq!(members[1].offset, 12);
        assert_eq!(members[2].offset, 16);
        let matrix = members[2].matrix.unwrap();
        assert_eq!(matrix.stride, 16);
        assert_eq!(matrix.order, MatrixAxisOrder::ColumnMajor);
    }

    #[test]
    fn test_mat2_stride_differs_by_rule() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let vec2 = m.ty_vec(f32_ty, 2);
        assert_eq!(matrix_stride_of(&m, vec2, Std430), Some(8));
        assert_eq!(matrix_stride_of(&m, vec2, Std140), Some(16));
    }

    #[test]
    fn test_runtime_array_tail() {
        let mut m = Module::new();
        let f32_ty = m.ty_f32();
        let ra = m.ty_runtime_array(f32_ty, Some(4));
        let (members, end) = lay_out_struct(&m, &[(None, ra)], Std430).unwrap();
        assert_eq!(members[0].offset, 0);
        assert_eq!(end, 0);
        let err = lay_out_struct(&m, &[(None, ra), (None, f32_ty)], Std430);
        assert!(err.is_err());
    }
}
