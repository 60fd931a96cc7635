//! Declarative function templates
//!
//! The same template type describes library functions and compartment models.
//! Templates are plain data: they are read from JSON or assembled in code, and
//! turned into [`KernelFunction`]s by the component library.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::functions::{KernelFunction, PriorDefinition};
use crate::parameters::{ParameterSpec, MOT_FLOAT_TYPE};

/// A dependency of a function: a library function name or a built function
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Resolved as a library function by name
    Named(String),
    /// An already built function, used as is
    #[serde(skip)]
    Resolved(Arc<KernelFunction>),
}

impl From<&str> for DependencySpec {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<Arc<KernelFunction>> for DependencySpec {
    fn from(function: Arc<KernelFunction>) -> Self {
        Self::Resolved(function)
    }
}

/// Hook called on every freshly built function
#[derive(Clone)]
pub struct InitHook(Arc<dyn Fn(&mut KernelFunction) + Send + Sync>);

impl InitHook {
    pub fn new(hook: impl Fn(&mut KernelFunction) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, function: &mut KernelFunction) {
        (self.0)(function)
    }
}

impl fmt::Debug for InitHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InitHook")
    }
}

/// Template of a library function or compartment model
///
/// # Example
///
/// ```ignore
/// let template: FunctionTemplate = serde_json::from_str(r#"{
///     "name": "Ball",
///     "function_name": "cmBall",
///     "parameters": ["b", "d"],
///     "code": "return exp(-d * b);"
/// }"#)?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionTemplate {
    /// Component name, unique per component kind
    pub name: String,

    /// Name of the function in the kernel (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Return type (defaults to `mot_float_type`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,

    /// Parameter list; inherited from the base template when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ParameterSpec>>,

    /// Functions used by this function; inherited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<DependencySpec>>,

    /// Inline function body, wrapped in the generated signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Inline header, used verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Name of the template this one inherits from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Compartment prior
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<PriorDefinition>,

    /// Name of a registered result map hook (compartments only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_result_maps: Option<String>,

    /// Location of the template; adjacent `.cl` and `.h` files are looked up here
    #[serde(skip)]
    pub source_path: Option<PathBuf>,

    #[serde(skip)]
    pub init: Option<InitHook>,
}

impl FunctionTemplate {
    /// Create an empty template
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a template from JSON
    pub fn from_str(json: &str) -> Result<Self, crate::error::ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn function_name(mut self, function_name: impl Into<String>) -> Self {
        self.function_name = Some(function_name.into());
        self
    }

    pub fn return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }

    pub fn parameter(mut self, parameter: impl Into<ParameterSpec>) -> Self {
        self.parameters
            .get_or_insert_with(Vec::new)
            .push(parameter.into());
        self
    }

    pub fn dependency(mut self, dependency: impl Into<DependencySpec>) -> Self {
        self.dependencies
            .get_or_insert_with(Vec::new)
            .push(dependency.into());
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    pub fn prior(mut self, prior: PriorDefinition) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn extra_result_maps(mut self, hook: impl Into<String>) -> Self {
        self.extra_result_maps = Some(hook.into());
        self
    }

    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    pub fn init(mut self, hook: impl Fn(&mut KernelFunction) + Send + Sync + 'static) -> Self {
        self.init = Some(InitHook::new(hook));
        self
    }

    /// The kernel function name, defaulting to the template name
    pub fn kernel_name(&self) -> &str {
        self.function_name.as_deref().unwrap_or(&self.name)
    }

    pub fn path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Names of the dependencies that still need to be resolved
    pub fn named_dependencies(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .flatten()
            .filter_map(|d| match d {
                DependencySpec::Named(name) => Some(name.as_str()),
                DependencySpec::Resolved(_) => None,
            })
            .collect()
    }

    /// Fill the fields this template leaves open from its base
    ///
    /// The kernel function name, inline code and header are never inherited:
    /// the name defaults to this template's own name and code is resolved
    /// along the whole inheritance chain.
    pub fn inherit_from(&self, base: &FunctionTemplate) -> FunctionTemplate {
        FunctionTemplate {
            name: self.name.clone(),
            function_name: self.function_name.clone(),
            description: self
                .description
                .clone()
                .or_else(|| base.description.clone()),
            return_type: self
                .return_type
                .clone()
                .or_else(|| base.return_type.clone()),
            parameters: self.parameters.clone().or_else(|| base.parameters.clone()),
            dependencies: self
                .dependencies
                .clone()
                .or_else(|| base.dependencies.clone()),
            code: self.code.clone(),
            header: self.header.clone(),
            extends: self.extends.clone(),
            prior: self.prior.clone().or_else(|| base.prior.clone()),
            extra_result_maps: self
                .extra_result_maps
                .clone()
                .or_else(|| base.extra_result_maps.clone()),
            source_path: self.source_path.clone(),
            init: self.init.clone().or_else(|| base.init.clone()),
        }
    }

    pub(crate) fn resolved_return_type(&self) -> &str {
        self.return_type.as_deref().unwrap_or(MOT_FLOAT_TYPE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template() {
        let template = FunctionTemplate::from_str(
            r#"{
            "name": "Stick",
            "function_name": "cmStick",
            "parameters": ["g", "b", "d", "theta", "phi"],
            "dependencies": ["SphericalToCartesian"],
            "extra_result_maps": "vector"
        }"#,
        )
        .unwrap();
        assert_eq!(template.kernel_name(), "cmStick");
        assert_eq!(template.named_dependencies(), vec!["SphericalToCartesian"]);
        assert!(template.code.is_none());
    }

    #[test]
    fn test_kernel_name_defaults_to_name() {
        let template = FunctionTemplate::new("Ball");
        assert_eq!(template.kernel_name(), "Ball");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = FunctionTemplate::from_str(r#"{ "name": "Ball", "codes": "" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_inherit_from() {
        let base = FunctionTemplate::new("Tensor")
            .function_name("cmTensor")
            .parameter("d")
            .code("return d;")
            .extra_result_maps("tensor");
        let derived = FunctionTemplate::new("TensorExVivo").extends("Tensor");

        let merged = derived.inherit_from(&base);
        assert_eq!(merged.kernel_name(), "TensorExVivo");
        assert_eq!(merged.parameters.as_ref().map(|p| p.len()), Some(1));
        assert_eq!(merged.extra_result_maps.as_deref(), Some("tensor"));
        assert!(merged.code.is_none());
    }
}
