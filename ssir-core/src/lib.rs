pub use spirv;

pub mod constant;
pub mod instr;
pub mod layout;
pub mod module;
pub mod print;
pub mod ty;
pub mod validate;

/// Error infrastructure.
pub mod error {
    pub use anyhow::{anyhow, Error, Result};
}

pub use constant::{ConstValue, Constant, Id, SpecId};
pub use instr::{AtomicOp, BarrierKind, BuiltinFn, Instr, Opcode};
pub use module::{Block, EntryPoint, Function, GlobalVar, Module, Stage};
pub use print::module_to_string;
pub use ty::{AddressSpace, Type, TypeId};
pub use validate::{validate, ValidationError, ValidationErrorCode};
