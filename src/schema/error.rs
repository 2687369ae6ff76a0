//! Schema build error taxonomy.

use thiserror::Error;

use crate::store::StoreError;

/// Structurally invalid configuration rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Named schema definitions exist but none is called `default`.
    #[error("{} schema definitions exist ({}) but none is named 'default'", .names.len(), .names.join(", "))]
    MissingDefaultSchema { names: Vec<String> },

    /// More than one definition claims the `default` name.
    #[error("schema definition 'default' is defined {0} times")]
    DuplicateDefaultSchema(usize),

    /// Two data source rows share a key.
    #[error("data source key '{0}' is defined more than once")]
    DuplicateDataSource(String),
}

/// Schema text or bindings rejected by the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Lexical or grammatical error in schema text.
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Well-formed text that does not describe a usable schema.
    #[error("{0}")]
    Invalid(String),
}

impl ParseError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Any failure of [`SchemaBuilder::build`](crate::schema::SchemaBuilder::build).
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
