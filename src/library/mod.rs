//! Component Library
//!
//! Registry of the named components models are built from:
//! - library functions, shared helper functions of compartments
//! - compartment models
//! - composite models
//! - cascade models
//!
//! Every component is a declarative template. Templates can extend a template
//! of the same kind through their `extends` field. The built-in components are
//! compiled into the crate; more can be loaded from a directory with the
//! layout
//!
//! ```text
//! components/
//! ├── parameters/
//! ├── library_functions/
//! ├── compartment_models/
//! ├── composite_models/
//! └── cascade_models/
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use diffmodel::library::ComponentLibrary;
//!
//! let library = ComponentLibrary::builtin();
//! let model = library.build_composite("BallStick_r1")?;
//! let cascade = library.build_cascade("BallStick_r1 (Cascade)")?;
//! ```

mod resolve;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::cascade::CascadeTemplate;
use crate::compartments::{ExtraResultMaps, HookRegistry};
use crate::composite::CompositeModelTemplate;
use crate::error::ModelError;
use crate::functions::{EmbeddedSource, FileSystemSource, FunctionTemplate, SourceChain};
use crate::parameters::ParameterCatalog;

// Embed built-in components at compile time
mod embedded {
    macro_rules! component {
        ($path:literal) => {
            ($path, include_str!(concat!("components/", $path)))
        };
    }

    pub const LIBRARY_FUNCTIONS: &[(&str, &str)] = &[
        component!("library_functions/SphericalToCartesian.json"),
        component!("library_functions/RotateOrthogonalVector.json"),
        component!("library_functions/CerfDawson.json"),
    ];

    pub const COMPARTMENT_MODELS: &[(&str, &str)] = &[
        component!("compartment_models/S0.json"),
        component!("compartment_models/Weight.json"),
        component!("compartment_models/Ball.json"),
        component!("compartment_models/Stick.json"),
        component!("compartment_models/Zeppelin.json"),
        component!("compartment_models/Tensor.json"),
        component!("compartment_models/ExpT1DecTM.json"),
        component!("compartment_models/ExpT2Dec.json"),
        component!("compartment_models/ExpT1DecIR.json"),
    ];

    pub const COMPOSITE_MODELS: &[(&str, &str)] = &[
        component!("composite_models/S0.json"),
        component!("composite_models/BallStick_r1.json"),
        component!("composite_models/BallStick_r1-ExVivo.json"),
        component!("composite_models/Tensor.json"),
        component!("composite_models/S0-T2.json"),
        component!("composite_models/S0-T1-MI-EPI.json"),
    ];

    pub const CASCADE_MODELS: &[(&str, &str)] = &[
        component!("cascade_models/BallStick_r1.json"),
        component!("cascade_models/BallStick_r1-Tensor.json"),
        component!("cascade_models/Tensor.json"),
        component!("cascade_models/S0-T2.json"),
        component!("cascade_models/S0-T1-MI-EPI.json"),
    ];

    /// Code and header files next to the templates above
    pub const SOURCES: &[(&str, &str)] = &[
        component!("library_functions/CerfDawson.cl"),
        component!("compartment_models/Stick.cl"),
        component!("compartment_models/Stick.h"),
    ];
}

/// Sub directories of a component directory, one per component kind
const PARAMETERS_DIR: &str = "parameters";
const LIBRARY_FUNCTIONS_DIR: &str = "library_functions";
const COMPARTMENT_MODELS_DIR: &str = "compartment_models";
const COMPOSITE_MODELS_DIR: &str = "composite_models";
const CASCADE_MODELS_DIR: &str = "cascade_models";

/// A registry of component templates
#[derive(Debug, Clone)]
pub struct ComponentLibrary {
    catalog: ParameterCatalog,
    library_functions: HashMap<String, FunctionTemplate>,
    compartments: HashMap<String, FunctionTemplate>,
    composites: HashMap<String, CompositeModelTemplate>,
    cascades: HashMap<String, CascadeTemplate>,
    sources: SourceChain,
    reads_files: bool,
    hooks: HookRegistry,
}

impl ComponentLibrary {
    /// Create a library without components
    ///
    /// The built-in parameter catalog and result map hooks are available, so
    /// components added later can refer to them.
    pub fn new() -> Self {
        Self {
            catalog: ParameterCatalog::builtin(),
            library_functions: HashMap::new(),
            compartments: HashMap::new(),
            composites: HashMap::new(),
            cascades: HashMap::new(),
            sources: SourceChain::new(),
            reads_files: false,
            hooks: HookRegistry::builtin(),
        }
    }

    /// Create a library with all built-in components
    pub fn builtin() -> Self {
        let mut library = Self::new();

        let mut sources = EmbeddedSource::new();
        for (path, content) in embedded::SOURCES {
            sources.insert(*path, *content);
        }
        library.sources.push(Arc::new(sources));

        for (path, json) in embedded::LIBRARY_FUNCTIONS {
            if let Some(template) = parsed(path, FunctionTemplate::from_str(json)) {
                library.add_library_function(template.source_path(*path));
            }
        }
        for (path, json) in embedded::COMPARTMENT_MODELS {
            if let Some(template) = parsed(path, FunctionTemplate::from_str(json)) {
                library.add_compartment(template.source_path(*path));
            }
        }
        for (path, json) in embedded::COMPOSITE_MODELS {
            if let Some(template) = parsed(path, CompositeModelTemplate::from_str(json)) {
                library.add_composite(template);
            }
        }
        for (path, json) in embedded::CASCADE_MODELS {
            if let Some(template) = parsed(path, CascadeTemplate::from_str(json)) {
                library.add_cascade(template);
            }
        }

        library
    }

    /// Load components from a directory
    pub fn from_dir(path: &Path) -> Result<Self, ModelError> {
        let mut library = Self::new();
        library.load_dir(path)?;
        Ok(library)
    }

    /// Load components from a directory into this library
    ///
    /// Sub directories are searched recursively for `.json` templates. Missing
    /// sub directories are skipped; files that do not parse are logged and
    /// skipped. Components replace loaded components of the same name.
    pub fn load_dir(&mut self, path: &Path) -> Result<(), ModelError> {
        if !path.is_dir() {
            return Err(ModelError::io(path, "directory not found"));
        }

        let parameters = path.join(PARAMETERS_DIR);
        if parameters.is_dir() {
            self.catalog.load_dir(&parameters)?;
        }

        for (file, template) in
            load_templates::<FunctionTemplate>(&path.join(LIBRARY_FUNCTIONS_DIR))?
        {
            self.add_library_function(template.source_path(file));
        }
        for (file, template) in
            load_templates::<FunctionTemplate>(&path.join(COMPARTMENT_MODELS_DIR))?
        {
            self.add_compartment(template.source_path(file));
        }
        for (_, template) in
            load_templates::<CompositeModelTemplate>(&path.join(COMPOSITE_MODELS_DIR))?
        {
            self.add_composite(template);
        }
        for (_, template) in load_templates::<CascadeTemplate>(&path.join(CASCADE_MODELS_DIR))? {
            self.add_cascade(template);
        }

        if !self.reads_files {
            self.sources.push(Arc::new(FileSystemSource::new()));
            self.reads_files = true;
        }
        tracing::debug!(
            "Loaded components from {}: {} library functions, {} compartments, {} composite models, {} cascades",
            path.display(),
            self.library_functions.len(),
            self.compartments.len(),
            self.composites.len(),
            self.cascades.len()
        );
        Ok(())
    }

    pub fn add_library_function(&mut self, template: FunctionTemplate) {
        self.library_functions.insert(template.name.clone(), template);
    }

    pub fn add_compartment(&mut self, template: FunctionTemplate) {
        self.compartments.insert(template.name.clone(), template);
    }

    pub fn add_composite(&mut self, template: CompositeModelTemplate) {
        self.composites.insert(template.name.clone(), template);
    }

    pub fn add_cascade(&mut self, template: CascadeTemplate) {
        self.cascades.insert(template.name.clone(), template);
    }

    /// Register a result map hook for compartments to refer to
    pub fn register_hook(&mut self, name: impl Into<String>, hook: Arc<dyn ExtraResultMaps>) {
        self.hooks.register(name, hook);
    }

    pub fn catalog(&self) -> &ParameterCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut ParameterCatalog {
        &mut self.catalog
    }

    pub fn library_function(&self, name: &str) -> Option<&FunctionTemplate> {
        self.library_functions.get(name)
    }

    pub fn compartment(&self, name: &str) -> Option<&FunctionTemplate> {
        self.compartments.get(name)
    }

    pub fn composite(&self, name: &str) -> Option<&CompositeModelTemplate> {
        self.composites.get(name)
    }

    pub fn cascade(&self, name: &str) -> Option<&CascadeTemplate> {
        self.cascades.get(name)
    }

    /// Names of all library functions, sorted
    pub fn library_function_names(&self) -> Vec<&str> {
        sorted_keys(&self.library_functions)
    }

    /// Names of all compartment models, sorted
    pub fn compartment_names(&self) -> Vec<&str> {
        sorted_keys(&self.compartments)
    }

    /// Names of all composite models, sorted
    pub fn composite_names(&self) -> Vec<&str> {
        sorted_keys(&self.composites)
    }

    /// Names of all cascade models, sorted
    pub fn cascade_names(&self) -> Vec<&str> {
        sorted_keys(&self.cascades)
    }
}

impl Default for ComponentLibrary {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut names: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    names.sort();
    names
}

/// Every template below `dir`, with the file it was read from
fn load_templates<T: DeserializeOwned>(dir: &Path) -> Result<Vec<(PathBuf, T)>, ModelError> {
    let mut templates = Vec::new();
    if dir.is_dir() {
        load_dir_recursive(dir, &mut templates)?;
    }
    Ok(templates)
}

fn load_dir_recursive<T: DeserializeOwned>(
    path: &Path,
    templates: &mut Vec<(PathBuf, T)>,
) -> Result<(), ModelError> {
    let mut entries = std::fs::read_dir(path)
        .map_err(|e| ModelError::io(path, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ModelError::io(path, e))?;
    entries.sort();

    for file_path in entries {
        if file_path.is_dir() {
            load_dir_recursive(&file_path, templates)?;
        } else if file_path.extension().is_some_and(|ext| ext == "json") {
            let content =
                std::fs::read_to_string(&file_path).map_err(|e| ModelError::io(&file_path, e))?;

            match serde_json::from_str::<T>(&content) {
                Ok(template) => templates.push((file_path, template)),
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", file_path.display(), e);
                }
            }
        }
    }

    Ok(())
}

/// A parsed built-in component; parse failures are logged and skipped
fn parsed<T>(path: &str, result: Result<T, ModelError>) -> Option<T> {
    match result {
        Ok(template) => Some(template),
        Err(e) => {
            tracing::warn!("Failed to parse built-in component {}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_components() {
        let library = ComponentLibrary::builtin();
        assert_eq!(
            library.library_function_names(),
            vec!["CerfDawson", "RotateOrthogonalVector", "SphericalToCartesian"]
        );
        assert_eq!(library.compartment_names().len(), embedded::COMPARTMENT_MODELS.len());
        assert_eq!(library.composite_names().len(), embedded::COMPOSITE_MODELS.len());
        assert_eq!(library.cascade_names().len(), embedded::CASCADE_MODELS.len());
        assert!(library.compartment("Stick").is_some());
        assert!(library.cascade("BallStick_r1 (Cascade)").is_some());
    }

    #[test]
    fn test_embedded_components_parse() {
        for (path, json) in embedded::LIBRARY_FUNCTIONS.iter().chain(embedded::COMPARTMENT_MODELS) {
            assert!(FunctionTemplate::from_str(json).is_ok(), "{} does not parse", path);
        }
        for (path, json) in embedded::COMPOSITE_MODELS {
            assert!(CompositeModelTemplate::from_str(json).is_ok(), "{} does not parse", path);
        }
        for (path, json) in embedded::CASCADE_MODELS {
            assert!(CascadeTemplate::from_str(json).is_ok(), "{} does not parse", path);
        }
        assert_eq!(parsed::<()>("broken.json", Err(ModelError::MissingDefinition("x".into()))), None);
    }

    #[test]
    fn test_new_is_empty_but_has_catalog() {
        let library = ComponentLibrary::new();
        assert!(library.compartment_names().is_empty());
        assert!(library.catalog().contains("s0"));
    }

    #[test]
    fn test_from_dir() {
        let dir = std::env::temp_dir().join(format!("diffmodel_library_{}", std::process::id()));
        let compartments = dir.join("compartment_models").join("nested");
        std::fs::create_dir_all(&compartments).unwrap();
        std::fs::create_dir_all(dir.join("parameters")).unwrap();
        std::fs::write(
            dir.join("parameters").join("custom.json"),
            r#"[{ "name": "kappa2", "kind": { "category": "free", "init_value": 1.0, "lower_bound": 0.0, "upper_bound": 10.0 } }]"#,
        )
        .unwrap();
        std::fs::write(
            compartments.join("Custom.json"),
            r#"{ "name": "Custom", "parameters": ["b", "kappa2"] }"#,
        )
        .unwrap();
        std::fs::write(
            compartments.join("Custom.cl"),
            "mot_float_type Custom(const mot_float_type b, const mot_float_type kappa2){ return b * kappa2; }",
        )
        .unwrap();
        std::fs::write(compartments.join("Broken.json"), "{ not json").unwrap();

        let mut library = ComponentLibrary::from_dir(&dir).unwrap();
        assert_eq!(library.compartment_names(), vec!["Custom"]);
        let custom = library.build_compartment("Custom").unwrap();
        assert!(custom.definition().contains("return b * kappa2;"));

        // loading again reuses the file system loader
        library.load_dir(&dir).unwrap();
        assert_eq!(library.sources.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_from_missing_dir() {
        let result = ComponentLibrary::from_dir(Path::new("/nonexistent/components"));
        assert!(matches!(result, Err(ModelError::Io { .. })));
    }
}
