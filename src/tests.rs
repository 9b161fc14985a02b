//! End-to-end pipeline tests over emitted SPIR-V words.
use pretty_assertions::assert_eq;
use ssir_core::spirv;
use ssir_core::spirv::{Decoration, ExecutionMode, ExecutionModel, Op, StorageClass};

use crate::{compile, parse, resolve, ssir_to_string, CompileOptions, LowerOptions};

const MAGIC: u32 = 0x0723_0203;

/// Decode `(opcode, operand words)` pairs after the header.
fn instrs(words: &[u32]) -> Vec<(u32, Vec<u32>)> {
    assert_eq!(words[0], MAGIC);
    let mut out = Vec::new();
    let mut cursor = 5;
    while cursor < words.len() {
        let head = words[cursor];
        let count = (head >> 16) as usize;
        assert!(count > 0, "zero-length instruction at word {}", cursor);
        assert!(cursor + count <= words.len(), "truncated instruction");
        out.push((head & 0xFFFF, words[cursor + 1..cursor + count].to_vec()));
        cursor += count;
    }
    out
}

fn ops_of(words: &[u32], op: Op) -> Vec<Vec<u32>> {
    instrs(words)
        .into_iter()
        .filter(|x| x.0 == op as u32)
        .map(|x| x.1)
        .collect()
}

fn compile_ok(source: &str) -> Vec<u32> {
    compile(source, &CompileOptions::default()).unwrap()
}

#[test]
fn test_empty_source_is_an_empty_program() {
    let prog = parse("");
    assert!(prog.decls.is_empty());
    assert!(!prog.had_error());
}

#[test]
fn test_compute_doubler_end_to_end() {
    let words = compile_ok(
        "@group(0) @binding(0) var<storage, read_write> data: array<f32>;
        @compute @workgroup_size(64)
        fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
            data[gid.x] = data[gid.x] * 2.0;
        }",
    );
    assert_eq!(words[0], MAGIC);
    assert_eq!(words[1], 0x0001_0300);

    // One compute entry point running at 64x1x1.
    let entries = ops_of(&words, Op::EntryPoint);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0][0], ExecutionModel::GLCompute as u32);
    let modes = ops_of(&words, Op::ExecutionMode);
    assert!(modes
        .iter()
        .any(|x| x[1] == ExecutionMode::LocalSize as u32 && x[2..] == [64, 1, 1]));

    // The buffer struct wrapping the runtime array carries Block.
    assert_eq!(ops_of(&words, Op::TypeRuntimeArray).len(), 1);
    let decorations = ops_of(&words, Op::Decorate);
    assert!(decorations
        .iter()
        .any(|x| x[1] == Decoration::Block as u32));

    // The body is an access chain, a load, a multiply and a store.
    assert!(!ops_of(&words, Op::AccessChain).is_empty());
    assert!(!ops_of(&words, Op::Load).is_empty());
    assert_eq!(ops_of(&words, Op::FMul).len(), 1);
    assert_eq!(ops_of(&words, Op::Store).len(), 1);
    assert_eq!(ops_of(&words, Op::Return).len(), 1);
}

#[test]
fn test_id_bound_covers_every_id() {
    let words = compile_ok(
        "@vertex fn vs() -> @builtin(position) vec4<f32> {
            return vec4<f32>(0.0, 0.0, 0.0, 1.0);
        }",
    );
    let bound = words[3];
    // Result ids of type and value declarations all stay under the bound.
    for (op, operands) in instrs(&words) {
        let result_idx = if op == Op::TypeVoid as u32
            || op == Op::TypeFloat as u32
            || op == Op::TypeVector as u32
            || op == Op::Label as u32
        {
            Some(0)
        } else if op == Op::Constant as u32 || op == Op::Variable as u32 {
            Some(1)
        } else {
            None
        };
        if let Some(idx) = result_idx {
            assert!(operands[idx] < bound, "id {} >= bound {}", operands[idx], bound);
        }
    }
}

#[test]
fn test_vertex_fragment_pair_end_to_end() {
    let words = compile_ok(
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
    let entries = ops_of(&words, Op::EntryPoint);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0][0], ExecutionModel::Vertex as u32);
    assert_eq!(entries[1][0], ExecutionModel::Fragment as u32);

    // Fragment entries default to upper-left origin.
    let modes = ops_of(&words, Op::ExecutionMode);
    assert!(modes
        .iter()
        .any(|x| x[1] == ExecutionMode::OriginUpperLeft as u32));

    // The vertex position output is decorated BuiltIn Position.
    let decorations = ops_of(&words, Op::Decorate);
    assert!(decorations.iter().any(|x| {
        x[1] == Decoration::BuiltIn as u32 && x[2] == spirv::BuiltIn::Position as u32
    }));
    assert!(decorations
        .iter()
        .any(|x| x[1] == Decoration::Location as u32 && x[2] == 0));
}

#[test]
fn test_entry_interface_is_only_io_variables() {
    let words = compile_ok(
        "@group(0) @binding(0) var<uniform> scale: f32;
        @fragment
        fn fs(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
            return vec4<f32>(uv * scale, 0.0, 1.0);
        }",
    );
    // Map OpVariable result id -> storage class.
    let mut classes = std::collections::HashMap::new();
    for var in ops_of(&words, Op::Variable) {
        classes.insert(var[1], var[2]);
    }
    let entries = ops_of(&words, Op::EntryPoint);
    // Interface ids follow the null-terminated name (one word for "fs").
    let interface = &entries[0][3..];
    assert!(!interface.is_empty());
    for id in interface {
        let class = classes[id];
        assert!(
            class == StorageClass::Input as u32 || class == StorageClass::Output as u32,
            "interface id {} has storage class {}",
            id,
            class
        );
    }
    // The uniform is emitted but stays out of the interface.
    assert!(classes
        .values()
        .any(|x| *x == StorageClass::Uniform as u32));
}

#[test]
fn test_transitive_uniform_in_entry_binding_set() {
    let prog = parse(
        "@group(0) @binding(0) var<uniform> u: f32;
        fn use_u() -> f32 { return u; }
        fn middle() -> f32 { return use_u(); }
        @vertex fn main_vs() -> @builtin(position) vec4<f32> {
            return vec4<f32>(middle(), 0.0, 0.0, 1.0);
        }",
    );
    let resolver = resolve(&prog);
    assert_eq!(resolver.entry_points.len(), 1);
    let bindings = resolver.used_bindings(0);
    assert_eq!(bindings.len(), 1);
    assert_eq!(resolver.symbol(bindings[0]).unwrap().name, "u");
}

#[test]
fn test_constructor_lowers_to_composite_construct() {
    let words = compile_ok(
        "@vertex fn vs() -> @builtin(position) vec4<f32> {
            let v = vec4<f32>(1.0, 2.0, 3.0, 4.0);
            return v;
        }",
    );
    let constructs = ops_of(&words, Op::CompositeConstruct);
    assert_eq!(constructs.len(), 1);
    assert_eq!(constructs[0].len(), 6);
    // Four distinct scalar constants feed it.
    let components: std::collections::HashSet<_> =
        constructs[0][2..].iter().copied().collect();
    assert_eq!(components.len(), 4);

    let f32_consts: Vec<u32> = ops_of(&words, Op::Constant)
        .into_iter()
        .map(|x| x[2])
        .collect();
    for expected in [1.0f32, 2.0, 3.0, 4.0] {
        assert!(f32_consts.contains(&expected.to_bits()));
    }
}

#[test]
fn test_equal_constants_are_shared() {
    let words = compile_ok(
        "@vertex fn vs() -> @builtin(position) vec4<f32> {
            return vec4<f32>(1.0, 1.0, 1.0, 1.0);
        }",
    );
    let one = 1.0f32.to_bits();
    let ones = ops_of(&words, Op::Constant)
        .into_iter()
        .filter(|x| x[2] == one)
        .count();
    assert_eq!(ones, 1);
}

#[test]
fn test_signed_add_avoids_signed_overflow() {
    let words = compile_ok(
        "fn add(a: i32, b: i32) -> i32 {
            let x: i32 = a + b;
            return x;
        }",
    );
    // Both operands bitcast to u32, one OpIAdd, result bitcast back.
    assert_eq!(ops_of(&words, Op::Bitcast).len(), 3);
    assert_eq!(ops_of(&words, Op::IAdd).len(), 1);
    assert!(ops_of(&words, Op::FAdd).is_empty());
}

#[test]
fn test_uniform_struct_layout_decorations() {
    let words = compile_ok(
        "struct Params {
            dir: vec3<f32>,
            strength: f32,
            transform: mat4x4<f32>,
        }
        @group(0) @binding(0) var<uniform> params: Params;
        fn probe() -> f32 { return params.strength; }",
    );
    let member_decorations = ops_of(&words, Op::MemberDecorate);
    let offsets: Vec<(u32, u32)> = member_decorations
        .iter()
        .filter(|x| x[2] == Decoration::Offset as u32)
        .map(|x| (x[1], x[3]))
        .collect();
    assert!(offsets.contains(&(0, 0)));
    assert!(offsets.contains(&(1, 12)));
    assert!(offsets.contains(&(2, 16)));
    assert!(member_decorations
        .iter()
        .any(|x| x[2] == Decoration::MatrixStride as u32 && x[3] == 16));
    assert!(member_decorations
        .iter()
        .any(|x| x[2] == Decoration::ColMajor as u32));
    assert!(ops_of(&words, Op::Decorate)
        .iter()
        .any(|x| x[1] == Decoration::Block as u32));
}

#[test]
fn test_void_function_ends_with_op_return() {
    let words = compile_ok("fn noop() { }");
    let ops: Vec<u32> = instrs(&words).into_iter().map(|x| x.0).collect();
    let ret = ops.iter().position(|x| *x == Op::Return as u32).unwrap();
    assert_eq!(ops[ret + 1], Op::FunctionEnd as u32);
}

#[test]
fn test_unused_binding_still_emitted() {
    let words = compile_ok(
        "@group(0) @binding(0) var<uniform> unused: f32;
        @compute @workgroup_size(1)
        fn main() { }",
    );
    let vars = ops_of(&words, Op::Variable);
    assert!(vars
        .iter()
        .any(|x| x[2] == StorageClass::Uniform as u32));
    // It never enters the entry interface.
    let entries = ops_of(&words, Op::EntryPoint);
    assert_eq!(entries[0].len(), 4, "interface must be empty");
}

#[test]
fn test_spec_constants_decorated_with_spec_id() {
    let words = compile_ok(
        "override scale: f32 = 2.0;
        fn f() -> f32 { return scale; }",
    );
    assert_eq!(ops_of(&words, Op::SpecConstant).len(), 1);
    assert!(ops_of(&words, Op::Decorate)
        .iter()
        .any(|x| x[1] == Decoration::SpecId as u32 && x[2] == 0));
}

#[test]
fn test_loop_emits_loop_merge() {
    let words = compile_ok(
        "fn sum(n: i32) -> i32 {
            var acc: i32 = 0;
            for (var i: i32 = 0; i < n; i++) {
                acc += i;
            }
            return acc;
        }",
    );
    assert_eq!(ops_of(&words, Op::LoopMerge).len(), 1);
    assert!(!ops_of(&words, Op::BranchConditional).is_empty());
}

#[test]
fn test_short_circuit_preserves_evaluation_order() {
    let words = compile_ok(
        "fn guard(i: i32, n: i32) -> bool {
            return i < n && i >= 0;
        }",
    );
    // No OpLogicalAnd: the right-hand side must sit behind a branch.
    assert!(ops_of(&words, Op::LogicalAnd).is_empty());
    assert_eq!(ops_of(&words, Op::SelectionMerge).len(), 1);
    assert_eq!(ops_of(&words, Op::Phi).len(), 1);
}

#[test]
fn test_custom_spirv_version() {
    let mut opts = CompileOptions::default();
    opts.spv.version = 0x0001_0500;
    let words = compile("fn f() { }", &opts).unwrap();
    assert_eq!(words[1], 0x0001_0500);
}

#[test]
fn test_pretty_printer_output() {
    let prog = parse(
        "@group(0) @binding(0) var<storage, read_write> data: array<f32>;
        @compute @workgroup_size(8)
        fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
            data[gid.x] = 0.0;
        }",
    );
    let resolver = resolve(&prog);
    let module =
        crate::lower(&prog, &resolver, &LowerOptions::default()).unwrap();
    let text = ssir_to_string(&module);
    assert!(text.starts_with("; SSIR\n"));
    assert!(text.contains("entry compute \"main\""));
    assert!(text.contains("ptr<storage"));
    assert!(text.contains("store"));
}

#[test]
fn test_parse_failure_surfaces_position() {
    let err = compile("fn broken( {", &CompileOptions::default()).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("1:"), "position missing in: {}", text);
}
