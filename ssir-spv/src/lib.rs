//! SPIR-V back end for SSIR.
pub mod builder;
pub mod emit;

pub use builder::InstrBuilder;
pub use emit::{emit_spirv, EmitError, EmitErrorKind, SpvOptions, SPIRV_MAGIC};

/// Reinterpret emitted words as little-endian bytes for file output.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    if cfg!(target_endian = "little") {
        bytemuck::cast_slice(words).to_owned()
    } else {
        words.iter().flat_map(|x| x.to_le_bytes()).collect()
    }
}
