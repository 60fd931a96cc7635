//! Kernel functions: library functions and compartment models
//!
//! A [`KernelFunction`] is the resolved, immutable form of a
//! [`FunctionTemplate`]. It owns its parameter descriptors and holds its
//! dependencies as shared, already built functions.

mod builder;
mod prior;
pub mod sources;
mod template;

pub use builder::FunctionBuilder;
pub use prior::PriorDefinition;
pub use sources::{EmbeddedSource, FileSystemSource, SourceChain, SourceLoader};
pub use template::{DependencySpec, FunctionTemplate, InitHook};

use std::sync::Arc;

use crate::codegen::function_signature;
use crate::compartments::ExtraResultMaps;
use crate::parameters::ParameterDescriptor;

/// The role of a kernel function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    /// Reusable helper function
    Library,
    /// Signal generating compartment model
    Compartment,
}

impl FunctionKind {
    /// Prefix of the include guard macro
    pub fn guard_prefix(&self) -> &'static str {
        match self {
            Self::Library => "LIBRARY_FUNCTION",
            Self::Compartment => "DMRICM",
        }
    }
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Library => write!(f, "library function"),
            Self::Compartment => write!(f, "compartment model"),
        }
    }
}

/// Where the code of a function came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeDefinition {
    /// A function body, wrapped in the function's own signature
    Inline(String),
    /// A complete definition loaded from a file
    Verbatim(String),
}

/// Where the header of a function came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDefinition {
    /// Declared header text
    Verbatim(String),
    /// Forward declaration generated from the signature
    Generated,
}

/// A resolved kernel function
#[derive(Debug, Clone)]
pub struct KernelFunction {
    kind: FunctionKind,
    name: String,
    function_name: String,
    description: String,
    return_type: String,
    parameters: Vec<ParameterDescriptor>,
    code: CodeDefinition,
    header: HeaderDefinition,
    dependencies: Vec<Arc<KernelFunction>>,
    prior: Option<PriorDefinition>,
    result_maps: Option<Arc<dyn ExtraResultMaps>>,
}

impl KernelFunction {
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// The component name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the function in the kernel
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn dependencies(&self) -> &[Arc<KernelFunction>] {
        &self.dependencies
    }

    pub fn prior(&self) -> Option<&PriorDefinition> {
        self.prior.as_ref()
    }

    pub fn result_maps_hook(&self) -> Option<&Arc<dyn ExtraResultMaps>> {
        self.result_maps.as_ref()
    }

    pub fn code_definition(&self) -> &CodeDefinition {
        &self.code
    }

    pub fn header_definition(&self) -> &HeaderDefinition {
        &self.header
    }

    /// The function signature, without trailing semicolon or body
    pub fn signature(&self) -> String {
        function_signature(&self.return_type, &self.function_name, &self.parameters)
    }

    /// The function definition (signature and body, or the loaded file)
    pub fn definition(&self) -> String {
        match &self.code {
            CodeDefinition::Inline(body) => format!("{}{{\n{}\n}}", self.signature(), body),
            CodeDefinition::Verbatim(code) => code.clone(),
        }
    }

    /// The function header
    pub fn header(&self) -> String {
        match &self.header {
            HeaderDefinition::Verbatim(header) => header.clone(),
            HeaderDefinition::Generated => format!("{};", self.signature()),
        }
    }

    /// Name of the include guard macro wrapping this function
    pub fn guard_name(&self) -> String {
        format!("{}_{}_CL", self.kind.guard_prefix(), self.function_name)
    }

    /// Replace the prior of this function
    pub fn set_prior(&mut self, prior: Option<PriorDefinition>) {
        self.prior = prior;
    }

    /// Replace the description of this function
    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }
}
