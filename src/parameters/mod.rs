//! Parameter descriptors and the named parameter catalog
//!
//! Function templates list their parameters either as names, resolved through a
//! [`ParameterCatalog`], or as inline [`ParameterDescriptor`]s.
//!
//! ```ignore
//! use diffmodel::parameters::{ParameterCatalog, ParameterSpec};
//!
//! let catalog = ParameterCatalog::builtin();
//! let params = catalog.resolve(&["g".into(), "b".into(), "d".into()], "Ball")?;
//! assert_eq!(params[0].data_type().name(), "mot_float_type4");
//! ```

mod catalog;
mod data_type;

pub use catalog::ParameterCatalog;
pub use data_type::{DataType, MOT_FLOAT_TYPE};

use serde::{Deserialize, Serialize};

/// How a parameter gets its value in a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "lowercase")]
pub enum ParameterKind {
    /// Optimized by the fitting routine
    Free {
        init_value: f64,
        lower_bound: f64,
        upper_bound: f64,
    },
    /// Read from a protocol column per volume
    Protocol,
    /// Constant value supplied with the problem data
    Static { value: f64 },
    /// Plain function argument of a library function
    Library,
}

impl Default for ParameterKind {
    fn default() -> Self {
        Self::Library
    }
}

/// A typed parameter of a kernel function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDescriptor {
    name: String,
    #[serde(rename = "type", default)]
    data_type: DataType,
    #[serde(default)]
    kind: ParameterKind,
}

impl ParameterDescriptor {
    /// Create a new parameter descriptor
    pub fn new(name: impl Into<String>, data_type: DataType, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            data_type,
            kind,
        }
    }

    /// A scalar library parameter
    pub fn library(name: impl Into<String>) -> Self {
        Self::new(name, DataType::scalar(), ParameterKind::Library)
    }

    /// A scalar free parameter with the given initial value and bounds
    pub fn free(name: impl Into<String>, init_value: f64, lower_bound: f64, upper_bound: f64) -> Self {
        Self::new(
            name,
            DataType::scalar(),
            ParameterKind::Free {
                init_value,
                lower_bound,
                upper_bound,
            },
        )
    }

    /// A protocol parameter
    pub fn protocol(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, ParameterKind::Protocol)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    pub fn is_free(&self) -> bool {
        matches!(self.kind, ParameterKind::Free { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, ParameterKind::Protocol)
    }

    /// Render this parameter as it appears in a function signature
    pub fn declaration(&self) -> String {
        self.data_type.declare(&self.name)
    }
}

/// A parameter entry in a template: a catalog name or an inline descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterSpec {
    Named(String),
    Descriptor(ParameterDescriptor),
}

impl From<&str> for ParameterSpec {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ParameterSpec {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<ParameterDescriptor> for ParameterSpec {
    fn from(descriptor: ParameterDescriptor) -> Self {
        Self::Descriptor(descriptor)
    }
}
