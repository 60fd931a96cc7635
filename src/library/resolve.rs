//! Building models from library templates

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use crate::cascade::{CascadeEntry, CascadeModel, CascadeTemplate};
use crate::composite::{CompositeModel, CompositeModelTemplate};
use crate::error::ModelError;
use crate::functions::{DependencySpec, FunctionBuilder, FunctionKind, FunctionTemplate, KernelFunction};
use crate::library::ComponentLibrary;

/// An inheritance resolved function template with its raw base templates
struct Resolved<'l> {
    template: FunctionTemplate,
    bases: Vec<&'l FunctionTemplate>,
}

/// Follow `extends` from `name`, returning the chain nearest first
fn inheritance_chain<'l, T>(
    templates: &'l HashMap<String, T>,
    kind: &str,
    name: &str,
    extends: impl Fn(&T) -> Option<&str>,
) -> Result<Vec<&'l T>, ModelError> {
    let mut names: Vec<&str> = Vec::new();
    let mut chain = Vec::new();
    let mut current = name;
    loop {
        if names.contains(&current) {
            return Err(ModelError::CircularDependency(format!(
                "{} -> {}",
                names.join(" -> "),
                current
            )));
        }
        let (key, template) = templates
            .get_key_value(current)
            .ok_or_else(|| ModelError::not_found(kind, current))?;
        names.push(key.as_str());
        chain.push(template);
        match extends(template) {
            Some(base) => current = base,
            None => return Ok(chain),
        }
    }
}

impl ComponentLibrary {
    fn resolve_function(
        &self,
        kind: FunctionKind,
        name: &str,
    ) -> Result<Resolved<'_>, ModelError> {
        let (templates, label) = match kind {
            FunctionKind::Library => (&self.library_functions, "Library function"),
            FunctionKind::Compartment => (&self.compartments, "Compartment model"),
        };
        let chain = inheritance_chain(templates, label, name, |t| t.extends.as_deref())?;

        let mut merged = chain[chain.len() - 1].clone();
        for template in chain.iter().rev().skip(1) {
            merged = template.inherit_from(&merged);
        }
        merged.extends = None;

        Ok(Resolved {
            template: merged,
            bases: chain[1..].to_vec(),
        })
    }

    /// Order in which the library functions reachable from `roots` are built
    ///
    /// The transitive closure of named dependencies is collected into an
    /// explicit graph, which is then sorted with Kahn's algorithm. Functions
    /// without pending dependencies are taken in name order, so the result is
    /// deterministic.
    fn dependency_order(
        &self,
        roots: &[&str],
    ) -> Result<Vec<(String, Resolved<'_>)>, ModelError> {
        let mut resolved: BTreeMap<String, Resolved<'_>> = BTreeMap::new();
        let mut pending: Vec<String> = roots.iter().map(|r| r.to_string()).collect();
        while let Some(name) = pending.pop() {
            if resolved.contains_key(&name) {
                continue;
            }
            let function = self.resolve_function(FunctionKind::Library, &name)?;
            pending.extend(
                function
                    .template
                    .named_dependencies()
                    .into_iter()
                    .map(str::to_string),
            );
            resolved.insert(name, function);
        }

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, function) in &resolved {
            let dependencies: BTreeSet<&str> =
                function.template.named_dependencies().into_iter().collect();
            in_degree.insert(name.as_str(), dependencies.len());
            for dependency in dependencies {
                dependents.entry(dependency).or_default().push(name.as_str());
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(resolved.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_string());
            let mut ready = Vec::new();
            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(*dependent);
                    }
                }
            }
            ready.sort();
            queue.extend(ready);
        }

        if order.len() < resolved.len() {
            let cycle: Vec<&str> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&name, _)| name)
                .collect();
            return Err(ModelError::CircularDependency(format!(
                "between library functions {}",
                cycle.join(", ")
            )));
        }
        tracing::debug!("Library function build order: {}", order.join(", "));

        let mut ordered = Vec::with_capacity(order.len());
        for name in order {
            if let Some(function) = resolved.remove(&name) {
                ordered.push((name, function));
            }
        }
        Ok(ordered)
    }

    /// Build the library functions reachable from `roots`
    ///
    /// Returns a fresh arena: a function shared by several others is built
    /// once and referenced by all of them.
    fn build_dependencies(
        &self,
        roots: &[&str],
    ) -> Result<HashMap<String, Arc<KernelFunction>>, ModelError> {
        let builder = FunctionBuilder::new(&self.catalog, &self.sources);
        let mut arena: HashMap<String, Arc<KernelFunction>> = HashMap::new();
        for (name, function) in self.dependency_order(roots)? {
            let dependencies = collect_dependencies(&function.template, &arena)?;
            let built = builder.build(
                FunctionKind::Library,
                &function.template,
                &function.bases,
                dependencies,
                None,
            )?;
            arena.insert(name, Arc::new(built));
        }
        Ok(arena)
    }

    /// Build a library function with all its dependencies
    pub fn build_library_function(&self, name: &str) -> Result<Arc<KernelFunction>, ModelError> {
        let mut arena = self.build_dependencies(&[name])?;
        arena
            .remove(name)
            .ok_or_else(|| ModelError::not_found("Library function", name))
    }

    /// Build a fresh compartment function with all its dependencies
    pub fn build_compartment(&self, name: &str) -> Result<KernelFunction, ModelError> {
        let function = self.resolve_function(FunctionKind::Compartment, name)?;
        let arena = self.build_dependencies(&function.template.named_dependencies())?;
        let dependencies = collect_dependencies(&function.template, &arena)?;
        let hook = function
            .template
            .extra_result_maps
            .as_deref()
            .map(|hook| self.hooks.get(hook))
            .transpose()?;

        FunctionBuilder::new(&self.catalog, &self.sources).build(
            FunctionKind::Compartment,
            &function.template,
            &function.bases,
            dependencies,
            hook,
        )
    }

    /// The composite model template with its inheritance chain merged
    pub fn resolve_composite(&self, name: &str) -> Result<CompositeModelTemplate, ModelError> {
        let chain = inheritance_chain(&self.composites, "Composite model", name, |t| {
            t.extends.as_deref()
        })?;
        let mut merged = chain[chain.len() - 1].clone();
        for template in chain.iter().rev().skip(1) {
            merged = template.inherit_from(&merged);
        }
        merged.extends = None;
        Ok(merged)
    }

    /// Build a composite model, every compartment instance fresh
    pub fn build_composite(&self, name: &str) -> Result<CompositeModel, ModelError> {
        let template = self.resolve_composite(name)?;
        CompositeModel::build(&template, |compartment| {
            self.build_compartment(compartment).map(Arc::new)
        })
    }

    /// Build a cascade model
    ///
    /// Members name a composite model or, failing that, another cascade.
    /// A cascade that contains itself fails with
    /// [`ModelError::CircularDependency`].
    pub fn build_cascade(&self, name: &str) -> Result<CascadeModel, ModelError> {
        self.build_cascade_with_chain(name, &mut Vec::new())
    }

    fn build_cascade_with_chain(
        &self,
        name: &str,
        chain: &mut Vec<String>,
    ) -> Result<CascadeModel, ModelError> {
        if chain.iter().any(|c| c == name) {
            return Err(ModelError::CircularDependency(format!(
                "{} -> {}",
                chain.join(" -> "),
                name
            )));
        }
        let template = self
            .cascades
            .get(name)
            .ok_or_else(|| ModelError::not_found("Cascade model", name))?;

        chain.push(name.to_string());
        let mut entries = Vec::with_capacity(template.models.len());
        for member in &template.models {
            let entry = if self.composites.contains_key(member.model()) {
                let mut model = self.build_composite(member.model())?;
                model.set_name(member.name());
                CascadeEntry::Leaf(model)
            } else if self.cascades.contains_key(member.model()) {
                let mut cascade = self.build_cascade_with_chain(member.model(), chain)?;
                cascade.set_name(member.name());
                CascadeEntry::Nested(cascade)
            } else {
                return Err(ModelError::not_found("Composite or cascade model", member.model()));
            };
            entries.push(entry);
        }
        chain.pop();

        warn_unknown_members(template, &entries);
        Ok(CascadeModel::new(template.name.clone(), entries)
            .with_description(template.description.clone().unwrap_or_default())
            .with_inits(template.inits.clone())
            .with_fixes(template.fixes.clone()))
    }

    /// Build a composite model, or a cascade when no composite has this name
    pub fn build_model(&self, name: &str) -> Result<CascadeEntry, ModelError> {
        if self.composites.contains_key(name) {
            self.build_composite(name).map(CascadeEntry::Leaf)
        } else if self.cascades.contains_key(name) {
            self.build_cascade(name).map(CascadeEntry::Nested)
        } else {
            Err(ModelError::not_found("Composite or cascade model", name))
        }
    }
}

/// The built dependencies of `template`, in declaration order
fn collect_dependencies(
    template: &FunctionTemplate,
    arena: &HashMap<String, Arc<KernelFunction>>,
) -> Result<Vec<Arc<KernelFunction>>, ModelError> {
    template
        .dependencies
        .iter()
        .flatten()
        .map(|dependency| match dependency {
            DependencySpec::Named(name) => arena
                .get(name)
                .cloned()
                .ok_or_else(|| ModelError::not_found("Library function", name)),
            DependencySpec::Resolved(function) => Ok(function.clone()),
        })
        .collect()
}

fn warn_unknown_members(template: &CascadeTemplate, entries: &[CascadeEntry]) {
    for member in template.inits.keys().chain(template.fixes.keys()) {
        if !entries.iter().any(|e| e.name() == member) {
            tracing::warn!(
                "Cascade '{}': inits or fixes given for '{}', which is not a member",
                template.name,
                member
            );
        }
    }
}
