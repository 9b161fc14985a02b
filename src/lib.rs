//! # ssirc: a WGSL to SPIR-V shader compiler.
//!
//! The canonical pipeline is WGSL source -> AST -> resolver -> SSIR ->
//! SPIR-V words, with SSIR as the hub every front end produces and every
//! back end consumes:
//!
//! ```ignore
//! let spv = ssirc::compile(
//!     r#"
//!     @group(0) @binding(0) var<storage, read_write> data: array<f32>;
//!     @compute @workgroup_size(64)
//!     fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
//!         data[gid.x] = data[gid.x] * 2.0;
//!     }
//!     "#,
//!     &ssirc::CompileOptions::default(),
//! )?;
//! // `spv` is a `Vec<u32>` ready for `vkCreateShaderModule`.
//! ```
//!
//! Each stage is also exposed on its own — [`parse`], [`resolve`],
//! [`lower`], [`emit_spirv`] — for tooling that wants the intermediate
//! artifacts, and [`ssir_to_string`] renders the IR for inspection.
#[cfg(test)]
mod tests;

pub use ssir_core;
pub use ssir_core::{module_to_string as ssir_to_string, validate, Module, ValidationError};
pub use ssir_spv::{emit_spirv, words_to_bytes, EmitError, SpvOptions};
pub use ssir_wgsl::{
    lower, parse, resolve, LowerError, LowerOptions, Packing, Program, Resolver, SyntaxError,
    TargetEnv,
};

use std::fmt;

/// Options for the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub lower: LowerOptions,
    pub spv: SpvOptions,
}

/// Failure of any pipeline stage, with the stage's own diagnostics.
#[derive(Debug)]
pub enum CompileError {
    Parse(Vec<SyntaxError>),
    Resolve(Vec<SyntaxError>),
    Lower(LowerError),
    Validate(Vec<ValidationError>),
    Emit(EmitError),
}
impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileError::Parse(errors) | CompileError::Resolve(errors) => {
                let first = &errors[0];
                write!(
                    f,
                    "{} at {}:{} ({} more)",
                    first.message,
                    first.line,
                    first.col,
                    errors.len() - 1
                )
            }
            CompileError::Lower(x) => x.fmt(f),
            CompileError::Validate(errors) => {
                write!(f, "module failed validation: {}", errors[0])
            }
            CompileError::Emit(x) => x.fmt(f),
        }
    }
}
impl std::error::Error for CompileError {}

/// Run the whole pipeline: parse, resolve, lower, validate, emit.
pub fn compile(source: &str, opts: &CompileOptions) -> Result<Vec<u32>, CompileError> {
    let prog = parse(source);
    if prog.had_error() {
        return Err(CompileError::Parse(prog.errors));
    }
    let resolver = resolve(&prog);
    if !resolver.errors.is_empty() {
        return Err(CompileError::Resolve(resolver.errors));
    }
    let module = lower(&prog, &resolver, &opts.lower).map_err(CompileError::Lower)?;
    let violations = validate(&module);
    if !violations.is_empty() {
        return Err(CompileError::Validate(violations));
    }
    emit_spirv(&module, &opts.spv).map_err(CompileError::Emit)
}
