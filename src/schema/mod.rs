//! Schema subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigStore rows
//!     → builder.rs (select `default`, fallback, key checks)
//!     → compiler.rs (SchemaCompiler: parse via sdl.rs, validate bindings)
//!     → BuiltSchema { CompiledSchema, data source configs }
//!     → reload controller (connect, swap)
//! ```

pub mod builder;
pub mod compiler;
pub mod error;
pub mod sdl;

pub use builder::{BuiltSchema, SchemaBuilder, FALLBACK_SDL};
pub use compiler::{CompileInput, CompiledSchema, OperationKind, SchemaCompiler, SdlCompiler};
pub use error::{BuildError, ConfigError, ParseError};
