//! Lookup of code and header files next to a template
//!
//! A template's adjacent files share its directory and base name: the template
//! `compartment_models/Stick.json` has its code in `compartment_models/Stick.cl`
//! and its header in `compartment_models/Stick.h`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// Extension of adjacent kernel code files
pub const CODE_EXTENSION: &str = "cl";
/// Extension of adjacent header files
pub const HEADER_EXTENSION: &str = "h";

/// Resolves the contents of a file adjacent to a template
pub trait SourceLoader: Send + Sync + std::fmt::Debug {
    /// Return the contents of `<template stem>.<extension>`, if that file exists
    fn adjacent(&self, template_path: &Path, extension: &str) -> Option<String>;
}

/// Path of the file next to `template_path` with the given extension
pub fn adjacent_path(template_path: &Path, extension: &str) -> PathBuf {
    template_path.with_extension(extension)
}

/// Reads adjacent files from disk, each path at most once
#[derive(Debug, Default)]
pub struct FileSystemSource {
    cache: DashMap<PathBuf, Option<String>>,
}

impl FileSystemSource {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }
}

impl SourceLoader for FileSystemSource {
    fn adjacent(&self, template_path: &Path, extension: &str) -> Option<String> {
        let path = adjacent_path(template_path, extension);
        if let Some(cached) = self.cache.get(&path) {
            return cached.clone();
        }

        let content = if path.is_file() {
            match std::fs::read_to_string(&path) {
                Ok(content) => Some(content),
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    None
                }
            }
        } else {
            None
        };
        self.cache.insert(path, content.clone());
        content
    }
}

/// In-memory files, used for the components compiled into the crate
#[derive(Debug, Default, Clone)]
pub struct EmbeddedSource {
    files: HashMap<PathBuf, String>,
}

impl EmbeddedSource {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
        }
    }

    /// Register the contents of a file under a virtual path
    pub fn insert(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

impl SourceLoader for EmbeddedSource {
    fn adjacent(&self, template_path: &Path, extension: &str) -> Option<String> {
        self.files
            .get(&adjacent_path(template_path, extension))
            .cloned()
    }
}

/// Several loaders queried in order; the first hit wins
#[derive(Debug, Default, Clone)]
pub struct SourceChain {
    loaders: Vec<Arc<dyn SourceLoader>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query `loader` after the loaders already in the chain
    pub fn push(&mut self, loader: Arc<dyn SourceLoader>) {
        self.loaders.push(loader);
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl SourceLoader for SourceChain {
    fn adjacent(&self, template_path: &Path, extension: &str) -> Option<String> {
        self.loaders
            .iter()
            .find_map(|loader| loader.adjacent(template_path, extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_lookup() {
        let mut source = EmbeddedSource::new();
        source.insert("compartment_models/Stick.cl", "double cmStick() { return 1; }");
        let template = Path::new("compartment_models/Stick.json");
        assert!(source.adjacent(template, CODE_EXTENSION).is_some());
        assert!(source.adjacent(template, HEADER_EXTENSION).is_none());
    }

    #[test]
    fn test_file_system_lookup() {
        let dir = std::env::temp_dir().join(format!("diffmodel_sources_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let template = dir.join("Ball.json");
        std::fs::write(dir.join("Ball.h"), "mot_float_type cmBall();").unwrap();

        let source = FileSystemSource::new();
        assert_eq!(
            source.adjacent(&template, HEADER_EXTENSION).as_deref(),
            Some("mot_float_type cmBall();")
        );
        assert_eq!(source.adjacent(&template, CODE_EXTENSION), None);

        // served from the cache after the file is gone
        std::fs::remove_dir_all(&dir).unwrap();
        assert!(source.adjacent(&template, HEADER_EXTENSION).is_some());
    }

    #[test]
    fn test_chain_first_hit_wins() {
        let mut builtin = EmbeddedSource::new();
        builtin.insert("Stick.cl", "builtin");
        let mut user = EmbeddedSource::new();
        user.insert("Stick.cl", "user");
        user.insert("Stick.h", "user header");

        let mut chain = SourceChain::new();
        chain.push(Arc::new(builtin));
        chain.push(Arc::new(user));
        let template = Path::new("Stick.json");
        assert_eq!(chain.adjacent(template, CODE_EXTENSION).as_deref(), Some("builtin"));
        assert_eq!(
            chain.adjacent(template, HEADER_EXTENSION).as_deref(),
            Some("user header")
        );
    }
}
