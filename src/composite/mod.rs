//! Composite models
//!
//! A composite model combines compartment instances through a
//! [`ModelExpression`]. Every compartment instance is known by its alias and
//! contributes its own parameters as `<alias>.<parameter>`, so two compartments
//! with a parameter `d` give two independent model parameters. Protocol
//! parameters are shared by name between all compartments.

mod expression;
mod modifiers;
mod template;
mod values;
mod volume_selection;

pub use expression::{ModelExpression, Operator};
pub use modifiers::{ArithOp, MapExpression, ModifierAction, ModifierFn, PostOptimizationModifier};
pub use template::CompositeModelTemplate;
pub use values::{DeferredValue, ParameterValue, TemplateValue};
pub use volume_selection::VolumeSelection;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayD};

use crate::codegen::{kernel_identifier, CodegenOptions, CompositeCodeGenerator};
use crate::error::ModelError;
use crate::functions::KernelFunction;
use crate::optimize::OptimizationInput;
use crate::parameters::{ParameterDescriptor, ParameterKind};
use crate::protocol::{ProblemData, Protocol, ProtocolProblem};
use crate::results::{insert_new, num_voxels, ResultMaps};

/// One use of a compartment in a composite model
#[derive(Debug, Clone)]
pub struct CompartmentInstance {
    alias: String,
    function: Arc<KernelFunction>,
}

impl CompartmentInstance {
    pub fn new(alias: impl Into<String>, function: Arc<KernelFunction>) -> Self {
        Self {
            alias: alias.into(),
            function,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn function(&self) -> &Arc<KernelFunction> {
        &self.function
    }
}

/// A non-protocol parameter of a composite model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameter {
    compartment: String,
    descriptor: ParameterDescriptor,
}

impl ModelParameter {
    /// Alias of the owning compartment
    pub fn compartment(&self) -> &str {
        &self.compartment
    }

    pub fn descriptor(&self) -> &ParameterDescriptor {
        &self.descriptor
    }

    /// Unqualified parameter name
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// `<compartment>.<parameter>`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.compartment, self.descriptor.name())
    }

    /// Name of the variable holding this parameter in generated code
    pub fn variable_name(&self) -> String {
        kernel_identifier(&format!("{}_{}", self.compartment, self.descriptor.name()))
    }

    fn default_value(&self) -> f64 {
        match self.descriptor.kind() {
            ParameterKind::Free { init_value, .. } => *init_value,
            ParameterKind::Static { value } => *value,
            ParameterKind::Protocol | ParameterKind::Library => 0.0,
        }
    }

    fn default_bounds(&self) -> (f64, f64) {
        match self.descriptor.kind() {
            ParameterKind::Free {
                lower_bound,
                upper_bound,
                ..
            } => (*lower_bound, *upper_bound),
            _ => (f64::NEG_INFINITY, f64::INFINITY),
        }
    }
}

/// A fittable model assembled from compartments
#[derive(Debug, Clone)]
pub struct CompositeModel {
    name: String,
    description: String,
    expression: ModelExpression,
    compartments: Vec<CompartmentInstance>,
    parameters: Vec<ModelParameter>,
    protocol_parameters: Vec<ParameterDescriptor>,
    fixes: BTreeMap<String, ParameterValue>,
    inits: BTreeMap<String, ParameterValue>,
    lower_bounds: BTreeMap<String, f64>,
    upper_bounds: BTreeMap<String, f64>,
    volume_selection: Option<VolumeSelection>,
    modifiers: Vec<PostOptimizationModifier>,
    problem_data: Option<Arc<ProblemData>>,
    gradient_deviations: Option<Arc<ArrayD<f64>>>,
    options: CodegenOptions,
}

impl CompositeModel {
    /// Assemble a model from a (inheritance resolved) template
    ///
    /// `compartment` builds a fresh compartment function for a compartment
    /// name; it is called once per compartment instance in the expression.
    pub fn build(
        template: &CompositeModelTemplate,
        mut compartment: impl FnMut(&str) -> Result<Arc<KernelFunction>, ModelError>,
    ) -> Result<Self, ModelError> {
        let source = template
            .model_expression
            .as_deref()
            .ok_or_else(|| ModelError::MissingDefinition(template.name.clone()))?;
        let expression = ModelExpression::parse(source)?;

        let mut compartments = Vec::new();
        let mut aliases = HashSet::new();
        for (name, alias) in expression.compartments() {
            if !aliases.insert(alias.to_string()) {
                return Err(ModelError::DuplicateCompartment(alias.to_string()));
            }
            compartments.push(CompartmentInstance::new(alias, compartment(name)?));
        }

        let mut parameters = Vec::new();
        let mut protocol_parameters: Vec<ParameterDescriptor> = Vec::new();
        for instance in &compartments {
            for descriptor in instance.function.parameters() {
                if descriptor.is_protocol() {
                    if !protocol_parameters.iter().any(|p| p.name() == descriptor.name()) {
                        protocol_parameters.push(descriptor.clone());
                    }
                } else {
                    parameters.push(ModelParameter {
                        compartment: instance.alias.clone(),
                        descriptor: descriptor.clone(),
                    });
                }
            }
        }

        let mut variables: HashSet<String> = protocol_parameters
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        for parameter in &parameters {
            let variable = parameter.variable_name();
            if !variables.insert(variable.clone()) {
                return Err(ModelError::NameCollision(variable));
            }
        }

        let fixes = parameters
            .iter()
            .filter_map(|p| match p.descriptor.kind() {
                ParameterKind::Static { value } => {
                    Some((p.qualified_name(), ParameterValue::Scalar(*value)))
                }
                _ => None,
            })
            .collect();

        let mut model = Self {
            name: template.name.clone(),
            description: template.description.clone().unwrap_or_default(),
            expression,
            compartments,
            parameters,
            protocol_parameters,
            fixes,
            inits: BTreeMap::new(),
            lower_bounds: BTreeMap::new(),
            upper_bounds: BTreeMap::new(),
            volume_selection: template.volume_selection.clone(),
            modifiers: Vec::new(),
            problem_data: None,
            gradient_deviations: None,
            options: CodegenOptions::default(),
        };

        for (name, value) in &template.fixes {
            model.fix(name, value.evaluate())?;
        }
        for (name, value) in &template.inits {
            model.init(name, value.evaluate())?;
        }
        for (name, value) in &template.lower_bounds {
            model.check_parameter(name)?;
            model.lower_bounds.insert(name.clone(), *value);
        }
        for (name, value) in &template.upper_bounds {
            model.check_parameter(name)?;
            model.upper_bounds.insert(name.clone(), *value);
        }
        for modifier in &template.post_optimization_modifiers {
            modifier.validate()?;
            model.modifiers.push(modifier.clone());
        }

        tracing::debug!(
            "Assembled composite model '{}' ({} compartments, {} parameters)",
            model.name,
            model.compartments.len(),
            model.parameters.len()
        );
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename this model, as done for renamed cascade members
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn expression(&self) -> &ModelExpression {
        &self.expression
    }

    pub fn compartments(&self) -> &[CompartmentInstance] {
        &self.compartments
    }

    pub fn compartment(&self, alias: &str) -> Option<&CompartmentInstance> {
        self.compartments.iter().find(|c| c.alias == alias)
    }

    /// All non-protocol parameters, in compartment order
    pub fn parameters(&self) -> &[ModelParameter] {
        &self.parameters
    }

    /// Look up a parameter by its qualified name
    pub fn parameter(&self, qualified_name: &str) -> Option<&ModelParameter> {
        self.parameters
            .iter()
            .find(|p| p.qualified_name() == qualified_name)
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.qualified_name()).collect()
    }

    /// Protocol parameters, one per distinct name
    pub fn protocol_parameters(&self) -> &[ParameterDescriptor] {
        &self.protocol_parameters
    }

    pub fn modifiers(&self) -> &[PostOptimizationModifier] {
        &self.modifiers
    }

    pub fn volume_selection(&self) -> Option<&VolumeSelection> {
        self.volume_selection.as_ref()
    }

    /// Identifier used for the generated kernel functions of this model
    pub fn kernel_name(&self) -> String {
        kernel_identifier(&self.name)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol and problem data
    // ─────────────────────────────────────────────────────────────────────────

    /// Names of the protocol columns this model reads
    pub fn required_protocol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .protocol_parameters
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        if self.volume_selection.is_some() && !names.iter().any(|n| n == "b") {
            names.push("b".to_string());
        }
        names
    }

    /// Problems with `protocol`, or with the protocol of the problem data
    pub fn protocol_problems(&self, protocol: Option<&Protocol>) -> Vec<ProtocolProblem> {
        let protocol = protocol.or_else(|| self.problem_data.as_ref().map(|d| d.protocol()));
        let Some(protocol) = protocol else {
            return vec![ProtocolProblem::NoProtocol];
        };
        self.required_protocol_names()
            .into_iter()
            .filter(|name| !protocol.has_parameter(name))
            .map(ProtocolProblem::MissingColumn)
            .collect()
    }

    pub fn is_protocol_sufficient(&self, protocol: Option<&Protocol>) -> bool {
        self.protocol_problems(protocol).is_empty()
    }

    pub fn set_problem_data(&mut self, problem_data: Arc<ProblemData>) {
        self.problem_data = Some(problem_data);
    }

    pub fn problem_data(&self) -> Option<&Arc<ProblemData>> {
        self.problem_data.as_ref()
    }

    /// Per-voxel gradient deviations, leading dimension the voxels
    pub fn set_gradient_deviations(&mut self, gradient_deviations: Option<Arc<ArrayD<f64>>>) {
        self.gradient_deviations = gradient_deviations;
    }

    pub fn gradient_deviations(&self) -> Option<&Arc<ArrayD<f64>>> {
        self.gradient_deviations.as_ref()
    }

    pub fn set_double_precision(&mut self, double_precision: bool) {
        self.options.double_precision = double_precision;
    }

    pub fn double_precision(&self) -> bool {
        self.options.double_precision
    }

    pub fn codegen_options(&self) -> CodegenOptions {
        self.options
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fixes, inits and bounds
    // ─────────────────────────────────────────────────────────────────────────

    fn check_parameter(&self, name: &str) -> Result<(), ModelError> {
        if self.parameter(name).is_none() {
            return Err(ModelError::unknown_parameter(name, &self.name));
        }
        Ok(())
    }

    /// Fix a parameter to a value; it is no longer optimized
    pub fn fix(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<(), ModelError> {
        self.check_parameter(name)?;
        self.fixes.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Release a fixed parameter
    pub fn unfix(&mut self, name: &str) -> Result<(), ModelError> {
        self.check_parameter(name)?;
        self.fixes.remove(name);
        Ok(())
    }

    /// Set the starting point of a parameter
    pub fn init(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<(), ModelError> {
        self.check_parameter(name)?;
        self.inits.insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn is_fixed(&self, name: &str) -> bool {
        self.fixes.contains_key(name)
    }

    pub fn fixed_value(&self, name: &str) -> Option<&ParameterValue> {
        self.fixes.get(name)
    }

    /// The starting point of a parameter: its init, or the catalog default
    pub fn initial_value(&self, name: &str) -> Result<ParameterValue, ModelError> {
        if let Some(value) = self.inits.get(name) {
            return Ok(value.clone());
        }
        self.parameter(name)
            .map(|p| ParameterValue::Scalar(p.default_value()))
            .ok_or_else(|| ModelError::unknown_parameter(name, &self.name))
    }

    pub fn lower_bound(&self, name: &str) -> Result<f64, ModelError> {
        let parameter = self
            .parameter(name)
            .ok_or_else(|| ModelError::unknown_parameter(name, &self.name))?;
        Ok(self
            .lower_bounds
            .get(name)
            .copied()
            .unwrap_or(parameter.default_bounds().0))
    }

    pub fn upper_bound(&self, name: &str) -> Result<f64, ModelError> {
        let parameter = self
            .parameter(name)
            .ok_or_else(|| ModelError::unknown_parameter(name, &self.name))?;
        Ok(self
            .upper_bounds
            .get(name)
            .copied()
            .unwrap_or(parameter.default_bounds().1))
    }

    /// Parameters that are optimized
    pub fn free_parameters(&self) -> Vec<&ModelParameter> {
        self.parameters
            .iter()
            .filter(|p| !self.is_fixed(&p.qualified_name()))
            .collect()
    }

    /// Parameters with a fixed value
    pub fn fixed_parameters(&self) -> Vec<&ModelParameter> {
        self.parameters
            .iter()
            .filter(|p| self.is_fixed(&p.qualified_name()))
            .collect()
    }

    /// Initialize every free parameter from a same-named result map
    pub fn init_from_results(&mut self, results: &ResultMaps) -> Result<(), ModelError> {
        let names: Vec<String> = self
            .free_parameters()
            .iter()
            .map(|p| p.qualified_name())
            .collect();
        for name in names {
            if let Some(map) = results.get(&name) {
                let value = ParameterValue::from_map(&name, map)?;
                self.inits.insert(name, value);
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Optimization
    // ─────────────────────────────────────────────────────────────────────────

    /// Indices of the volumes used for fitting
    pub fn volume_indices(&self) -> Result<Vec<usize>, ModelError> {
        let data = self
            .problem_data
            .as_ref()
            .ok_or_else(|| ModelError::MissingProblemData(self.name.clone()))?;
        match &self.volume_selection {
            Some(selection) => selection.select(data.protocol()),
            None => Ok((0..data.protocol().num_volumes()).collect()),
        }
    }

    /// Everything the optimizer needs: kernel source and data buffers
    pub fn optimization_input(&self) -> Result<OptimizationInput, ModelError> {
        let data = self
            .problem_data
            .as_ref()
            .ok_or_else(|| ModelError::MissingProblemData(self.name.clone()))?;
        let problems = self.protocol_problems(Some(data.protocol()));
        if !problems.is_empty() {
            return Err(ModelError::ProtocolError(format!(
                "protocol insufficient for model '{}': {}",
                self.name,
                problems
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let num_voxels = data.num_voxels();
        if let Some(grad_dev) = &self.gradient_deviations {
            let actual = grad_dev.shape().first().copied().unwrap_or(0);
            if actual != num_voxels {
                return Err(ModelError::ShapeMismatch {
                    name: "gradient_deviations".to_string(),
                    expected: num_voxels,
                    actual,
                });
            }
        }

        let free = self.free_parameters();
        let mut initial_values = Array2::zeros((num_voxels, free.len()));
        let mut lower_bounds = Array1::zeros(free.len());
        let mut upper_bounds = Array1::zeros(free.len());
        for (i, parameter) in free.iter().enumerate() {
            let name = parameter.qualified_name();
            initial_values
                .column_mut(i)
                .assign(&self.initial_value(&name)?.broadcast(&name, num_voxels)?);
            lower_bounds[i] = self.lower_bound(&name)?;
            upper_bounds[i] = self.upper_bound(&name)?;
        }

        let fixed = self.fixed_parameters();
        let mut fixed_values = Array2::zeros((num_voxels, fixed.len()));
        for (i, parameter) in fixed.iter().enumerate() {
            let name = parameter.qualified_name();
            if let Some(value) = self.fixed_value(&name) {
                fixed_values
                    .column_mut(i)
                    .assign(&value.broadcast(&name, num_voxels)?);
            }
        }

        let volume_indices = self.volume_indices()?;
        let selected = data.protocol().select_volumes(&volume_indices);
        let mut protocol = BTreeMap::new();
        for descriptor in &self.protocol_parameters {
            protocol.insert(
                descriptor.name().to_string(),
                selected.parameter_values(descriptor.name())?,
            );
        }

        let generator = CompositeCodeGenerator::new(self);
        Ok(OptimizationInput {
            model_name: self.name.clone(),
            kernel_source: generator.generate(),
            evaluate_function: generator.evaluate_function_name(),
            prior_function: generator.prior_function_name(),
            parameter_names: free.iter().map(|p| p.qualified_name()).collect(),
            initial_values,
            lower_bounds,
            upper_bounds,
            fixed_names: fixed.iter().map(|p| p.qualified_name()).collect(),
            fixed_values,
            protocol,
            observations: data.signals().select(ndarray::Axis(1), &volume_indices),
            volume_indices,
            gradient_deviations: self.gradient_deviations.clone(),
            double_precision: self.options.double_precision,
        })
    }

    /// Complete the raw optimizer output
    ///
    /// Adds the fixed parameter maps, then the derived maps of every
    /// compartment hook, then every post-optimization modifier in declaration
    /// order. A derived map never overwrites an existing key.
    pub fn finalize_results(&self, mut results: ResultMaps) -> Result<ResultMaps, ModelError> {
        let n = self
            .problem_data
            .as_ref()
            .map(|d| d.num_voxels())
            .or_else(|| num_voxels(&results))
            .unwrap_or(1);

        for parameter in self.fixed_parameters() {
            let name = parameter.qualified_name();
            if results.contains_key(&name) {
                continue;
            }
            if let Some(value) = self.fixed_value(&name) {
                results.insert(name.clone(), value.broadcast(&name, n)?.into_dyn());
            }
        }

        for instance in &self.compartments {
            if let Some(hook) = instance.function.result_maps_hook() {
                let extra = hook.extra_result_maps(&instance.alias, &results)?;
                for (key, map) in extra {
                    insert_new(&mut results, key, map)?;
                }
            }
        }

        for modifier in &self.modifiers {
            let map = modifier.apply(&results)?;
            insert_new(&mut results, modifier.name.clone(), map)?;
        }

        Ok(results)
    }
}
