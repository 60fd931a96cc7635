//! Hand-off to the numerical optimizer
//!
//! The optimizer is an external collaborator. It receives an
//! [`OptimizationInput`] (generated kernel source plus parameter and data
//! buffers) and returns one map per free parameter. The functions in this
//! module drive composite models and cascades through it.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayD};

use crate::cascade::{CascadeEntry, CascadeModel};
use crate::composite::CompositeModel;
use crate::error::ModelError;
use crate::results::{ModelResults, ResultMaps};

/// Everything an optimizer needs to fit one composite model
#[derive(Debug, Clone)]
pub struct OptimizationInput {
    pub model_name: String,
    /// Complete kernel source, see [`crate::codegen::CompositeCodeGenerator`]
    pub kernel_source: String,
    /// Name of the model function in `kernel_source`
    pub evaluate_function: String,
    /// Name of the aggregate prior in `kernel_source`
    pub prior_function: String,
    /// Qualified names of the free parameters, the columns of `initial_values`
    pub parameter_names: Vec<String>,
    /// Starting point per voxel, `(voxels, free parameters)`
    pub initial_values: Array2<f64>,
    pub lower_bounds: Array1<f64>,
    pub upper_bounds: Array1<f64>,
    pub fixed_names: Vec<String>,
    /// `(voxels, fixed parameters)`
    pub fixed_values: Array2<f64>,
    /// Protocol parameter buffers over the selected volumes
    pub protocol: BTreeMap<String, ArrayD<f64>>,
    /// Signals over the selected volumes, `(voxels, volumes)`
    pub observations: Array2<f64>,
    pub volume_indices: Vec<usize>,
    pub gradient_deviations: Option<Arc<ArrayD<f64>>>,
    pub double_precision: bool,
}

impl OptimizationInput {
    pub fn num_voxels(&self) -> usize {
        self.observations.nrows()
    }

    pub fn num_parameters(&self) -> usize {
        self.parameter_names.len()
    }

    /// Result maps holding the starting point, one map per free parameter
    pub fn initial_results(&self) -> ResultMaps {
        self.parameter_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), self.initial_values.column(i).to_owned().into_dyn()))
            .collect()
    }
}

/// A numerical optimizer
///
/// Implementations compile `kernel_source`, minimize the model error per voxel
/// and return one map per name in `parameter_names`, each with `num_voxels`
/// rows.
pub trait Optimizer {
    fn minimize(&self, input: &OptimizationInput) -> anyhow::Result<ResultMaps>;
}

/// Returns the starting point unchanged
///
/// Useful to inspect what a model or cascade hands to the optimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitialValues;

impl Optimizer for InitialValues {
    fn minimize(&self, input: &OptimizationInput) -> anyhow::Result<ResultMaps> {
        Ok(input.initial_results())
    }
}

/// Fit a composite model
///
/// The raw optimizer output is completed with the fixed parameters, the
/// compartment result maps and the post-optimization modifiers.
pub fn fit_composite(
    model: &CompositeModel,
    optimizer: &dyn Optimizer,
) -> Result<ResultMaps, ModelError> {
    let input = model.optimization_input()?;
    tracing::info!(
        "Fitting '{}': {} voxels, {} free parameters, {} volumes",
        input.model_name,
        input.num_voxels(),
        input.num_parameters(),
        input.volume_indices.len()
    );

    let results = optimizer.minimize(&input)?;
    for name in &input.parameter_names {
        if !results.contains_key(name) {
            return Err(ModelError::missing_key(name, "optimizer output"));
        }
    }
    model.finalize_results(results)
}

/// Fit every model of a cascade in order
///
/// The results of each stage are stored under its name. A nested cascade is
/// fitted completely; its results are those of its last member.
pub fn fit_cascade(
    cascade: &mut CascadeModel,
    optimizer: &dyn Optimizer,
) -> Result<ModelResults, ModelError> {
    cascade.reset();
    let mut results = ModelResults::new();

    while cascade.has_next() {
        let entry = cascade.get_next(&results)?;
        let name = entry.name().to_string();
        let stage = match entry {
            CascadeEntry::Leaf(model) => fit_composite(model, optimizer)?,
            CascadeEntry::Nested(inner) => {
                let mut inner_results = fit_cascade(inner, optimizer)?;
                let last = inner
                    .entries()
                    .last()
                    .map(|e| e.name().to_string())
                    .ok_or_else(|| ModelError::MissingResults(inner.name().to_string()))?;
                inner_results
                    .remove(&last)
                    .ok_or(ModelError::MissingResults(last))?
            }
        };
        tracing::info!("Cascade '{}': finished '{}'", cascade.name(), name);
        results.insert(name, stage);
    }

    Ok(results)
}
