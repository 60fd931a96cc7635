use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;

use crate::error::ModelError;
use crate::parameters::{ParameterDescriptor, ParameterSpec};

const BUILTIN_PARAMETERS: &str = include_str!("builtin.json");

lazy_static! {
    static ref BUILTIN_CATALOG: ParameterCatalog = {
        let mut catalog = ParameterCatalog::new();
        match serde_json::from_str::<Vec<ParameterDescriptor>>(BUILTIN_PARAMETERS) {
            Ok(params) => params.into_iter().for_each(|p| catalog.add(p)),
            Err(e) => tracing::warn!("Failed to parse built-in parameters: {}", e),
        }
        catalog
    };
}

/// A registry of named parameter definitions
#[derive(Debug, Clone, Default)]
pub struct ParameterCatalog {
    parameters: HashMap<String, ParameterDescriptor>,
}

impl ParameterCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self {
            parameters: HashMap::new(),
        }
    }

    /// Create a catalog with the standard diffusion MRI parameters
    pub fn builtin() -> Self {
        BUILTIN_CATALOG.clone()
    }

    /// Load all parameter definition files (`*.json`) from a directory
    ///
    /// Each file holds a single definition or an array of definitions.
    pub fn load_dir(&mut self, path: &Path) -> Result<(), ModelError> {
        let entries = std::fs::read_dir(path).map_err(|e| ModelError::io(path, e))?;
        for entry in entries {
            let file_path = entry.map_err(|e| ModelError::io(path, e))?.path();
            if file_path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let content =
                std::fs::read_to_string(&file_path).map_err(|e| ModelError::io(&file_path, e))?;
            let value: serde_json::Value = serde_json::from_str(&content)?;
            let parsed = if value.is_array() {
                serde_json::from_value::<Vec<ParameterDescriptor>>(value)
            } else {
                serde_json::from_value::<ParameterDescriptor>(value).map(|p| vec![p])
            };
            match parsed {
                Ok(params) => params.into_iter().for_each(|p| self.add(p)),
                Err(e) => {
                    tracing::warn!("Skipping parameter file {}: {}", file_path.display(), e);
                }
            }
        }
        Ok(())
    }

    /// Add or replace a parameter definition
    pub fn add(&mut self, parameter: ParameterDescriptor) {
        self.parameters
            .insert(parameter.name().to_string(), parameter);
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    /// All parameter names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parameters.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Resolve a template's parameter list into owned descriptors
    ///
    /// Order is preserved. Named entries are instantiated from the catalog and
    /// inline descriptors are copied, so no two functions ever share a descriptor.
    pub fn resolve(
        &self,
        specs: &[ParameterSpec],
        context: &str,
    ) -> Result<Vec<ParameterDescriptor>, ModelError> {
        specs
            .iter()
            .map(|spec| match spec {
                ParameterSpec::Named(name) => self
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ModelError::unknown_parameter(name, context)),
                ParameterSpec::Descriptor(descriptor) => Ok(descriptor.clone()),
            })
            .collect()
    }
}
