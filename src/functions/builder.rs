use std::collections::HashSet;
use std::sync::Arc;

use crate::compartments::ExtraResultMaps;
use crate::error::ModelError;
use crate::functions::sources::{SourceLoader, CODE_EXTENSION, HEADER_EXTENSION};
use crate::functions::{CodeDefinition, FunctionKind, FunctionTemplate, HeaderDefinition, KernelFunction};
use crate::parameters::ParameterCatalog;

/// Turns a template into a [`KernelFunction`]
///
/// Code is resolved along the inheritance chain, nearest template first. For
/// every template in the chain, an inline `code` body wins over an adjacent
/// `.cl` file; the first template that supplies either defines the code.
/// Headers follow the same order with a generated forward declaration as last
/// resort.
pub struct FunctionBuilder<'a> {
    catalog: &'a ParameterCatalog,
    sources: &'a dyn SourceLoader,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(catalog: &'a ParameterCatalog, sources: &'a dyn SourceLoader) -> Self {
        Self { catalog, sources }
    }

    /// Build a function from its (inheritance merged) template
    ///
    /// `bases` are the raw base templates, nearest first. `dependencies` must
    /// already be built, in declaration order.
    pub fn build(
        &self,
        kind: FunctionKind,
        template: &FunctionTemplate,
        bases: &[&FunctionTemplate],
        dependencies: Vec<Arc<KernelFunction>>,
        result_maps: Option<Arc<dyn ExtraResultMaps>>,
    ) -> Result<KernelFunction, ModelError> {
        let parameters = self
            .catalog
            .resolve(template.parameters.as_deref().unwrap_or_default(), &template.name)?;

        let mut seen = HashSet::new();
        for param in &parameters {
            if !seen.insert(param.name()) {
                return Err(ModelError::DuplicateParameter {
                    name: param.name().to_string(),
                    function: template.name.clone(),
                });
            }
        }

        if let Some(prior) = &template.prior {
            for name in prior.parameters() {
                if !parameters.iter().any(|p| p.name() == name) {
                    return Err(ModelError::unknown_parameter(
                        name,
                        format!("prior '{}' of '{}'", prior.function_name(), template.name),
                    ));
                }
            }
        }

        let chain: Vec<&FunctionTemplate> = std::iter::once(template)
            .chain(bases.iter().copied())
            .collect();

        let mut function = KernelFunction {
            kind,
            name: template.name.clone(),
            function_name: template.kernel_name().to_string(),
            description: template.description.clone().unwrap_or_default(),
            return_type: template.resolved_return_type().to_string(),
            parameters,
            code: self.resolve_code(&chain)?,
            header: self.resolve_header(&chain),
            dependencies,
            prior: template.prior.clone(),
            result_maps,
        };

        if let Some(init) = &template.init {
            init.call(&mut function);
        }

        tracing::debug!(
            "Built {} '{}' ({} dependencies)",
            function.kind,
            function.name,
            function.dependencies.len()
        );
        Ok(function)
    }

    fn resolve_code(&self, chain: &[&FunctionTemplate]) -> Result<CodeDefinition, ModelError> {
        for template in chain {
            if let Some(code) = &template.code {
                return Ok(CodeDefinition::Inline(code.clone()));
            }
            if let Some(code) = template
                .path()
                .and_then(|path| self.sources.adjacent(path, CODE_EXTENSION))
            {
                return Ok(CodeDefinition::Verbatim(code));
            }
        }
        Err(ModelError::MissingDefinition(chain[0].name.clone()))
    }

    fn resolve_header(&self, chain: &[&FunctionTemplate]) -> HeaderDefinition {
        for template in chain {
            if let Some(header) = &template.header {
                return HeaderDefinition::Verbatim(header.clone());
            }
            if let Some(header) = template
                .path()
                .and_then(|path| self.sources.adjacent(path, HEADER_EXTENSION))
            {
                return HeaderDefinition::Verbatim(header);
            }
        }
        HeaderDefinition::Generated
    }
}
