//! WGSL front end for SSIR.
//!
//! The pipeline is `parse` -> `resolve` -> `lower`: the parser builds an
//! owned AST and never fails outright, the resolver maps identifiers to
//! symbols and derives entry-point metadata, and the lowering produces an
//! [`ssir_core::Module`] ready for validation and emission.
pub mod ast;
pub mod lower;
pub mod parse;
pub mod resolve;
pub mod token;

pub use ast::Program;
pub use lower::{lower, LowerError, LowerErrorKind, LowerOptions, Packing, TargetEnv};
pub use parse::parse;
pub use resolve::{resolve, Resolver, StageKind, SymbolKind, SYM_UNRESOLVED};
pub use token::SyntaxError;
