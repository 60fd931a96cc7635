//! Error types for model building, cascades and code generation

use thiserror::Error;

/// Errors that can occur while resolving, assembling or driving models
#[derive(Debug, Error)]
pub enum ModelError {
    // ─────────────────────────────────────────────────────────────────────────
    // Parameter Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// A parameter name has no entry in the parameter catalog
    #[error("Unknown parameter '{name}' (referenced by {context})")]
    UnknownParameter { name: String, context: String },

    /// A data type declaration could not be parsed
    #[error("Invalid data type declaration '{0}'")]
    InvalidDataType(String),

    /// Duplicate parameter name inside one function
    #[error("Duplicate parameter '{name}' in function '{function}'")]
    DuplicateParameter { name: String, function: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Definition Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// No code body could be found through the inline, file and base chain
    #[error("No code definition found for '{0}' (no inline code, adjacent file or base template)")]
    MissingDefinition(String),

    /// Dependency or inheritance resolution found a cycle
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// A component is not known to the component library
    #[error("{kind} '{name}' not found in component library")]
    ComponentNotFound { kind: String, name: String },

    /// No result-map hook is registered under the given name
    #[error("No result map hook registered as '{0}'")]
    UnknownHook(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Composition Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid model expression
    #[error("Invalid model expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    /// Two compartments in one composite model use the same alias
    #[error("Compartment alias '{0}' is used more than once")]
    DuplicateCompartment(String),

    /// A derived map or a kernel variable would reuse an existing name
    #[error("Name '{0}' is already in use")]
    NameCollision(String),

    /// A result map does not have the expected layout
    #[error("Invalid map '{name}': {message}")]
    InvalidMap { name: String, message: String },

    /// A result map does not have the expected number of voxels
    #[error("Map '{name}' has {actual} voxels, expected {expected}")]
    ShapeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Cascade Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// `get_next` was called on a cascade without remaining models
    #[error("Cascade '{0}' has no next model; check has_next() before calling get_next()")]
    CascadeExhausted(String),

    /// The results of a previous model were not handed to the cascade
    #[error("No results available for model '{0}'")]
    MissingResults(String),

    /// A result key referenced by an init, fix or modifier is missing
    #[error("Result key '{key}' not found (needed by {context})")]
    MissingResultKey { key: String, context: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Problem Data Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The model was used before problem data was set
    #[error("No problem data set on model '{0}'")]
    MissingProblemData(String),

    /// The acquisition protocol is malformed or insufficient
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and Template Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse a JSON template
    #[error("Failed to parse template: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Failed to read a CSV table
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File system error while loading components
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },

    /// Error returned by the external optimizer
    #[error("Optimizer failed: {0}")]
    Optimizer(#[from] anyhow::Error),
}

impl ModelError {
    /// Create an unknown parameter error
    pub fn unknown_parameter(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnknownParameter {
            name: name.into(),
            context: context.into(),
        }
    }

    /// Create a component not found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ComponentNotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid expression error
    pub fn invalid_expr(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Create a missing result key error
    pub fn missing_key(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingResultKey {
            key: key.into(),
            context: context.into(),
        }
    }

    /// Create an I/O error for the given path
    pub fn io(path: impl AsRef<std::path::Path>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}
