//! Compartment model hooks
//!
//! Compartments can compute derived maps after fitting, for example the
//! eigen system of a tensor. A hook is looked up by name when a compartment
//! template is built and stored on the resulting [`KernelFunction`].
//!
//! [`KernelFunction`]: crate::functions::KernelFunction

mod tensor;

pub use tensor::{eigen_ranking, fractional_anisotropy, spherical_to_cartesian, TensorMaps};

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use ndarray::Array2;

use crate::error::ModelError;
use crate::results::{insert_new, voxel_vector, ResultMaps};

/// Derived maps computed from the fitted maps of one compartment
pub trait ExtraResultMaps: Send + Sync + Debug {
    /// Compute derived maps for `compartment`
    ///
    /// Input keys are `<compartment>.<parameter>` with one value per voxel.
    /// Returned keys are fully qualified and have the voxels as leading
    /// dimension.
    fn extra_result_maps(
        &self,
        compartment: &str,
        results: &ResultMaps,
    ) -> Result<ResultMaps, ModelError>;
}

/// The principal direction (`vec0`) of a compartment with `theta` and `phi`
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorMaps;

impl ExtraResultMaps for VectorMaps {
    fn extra_result_maps(
        &self,
        compartment: &str,
        results: &ResultMaps,
    ) -> Result<ResultMaps, ModelError> {
        let theta = voxel_vector(results, &format!("{}.theta", compartment), compartment)?;
        let phi = voxel_vector(results, &format!("{}.phi", compartment), compartment)?;
        if phi.len() != theta.len() {
            return Err(ModelError::ShapeMismatch {
                name: format!("{}.phi", compartment),
                expected: theta.len(),
                actual: phi.len(),
            });
        }

        let mut vectors = Array2::zeros((theta.len(), 3));
        for (i, mut row) in vectors.rows_mut().into_iter().enumerate() {
            let v = spherical_to_cartesian(theta[i], phi[i]);
            row.assign(&ndarray::arr1(&[v.x, v.y, v.z]));
        }

        let mut maps = ResultMaps::new();
        insert_new(&mut maps, format!("{}.vec0", compartment), vectors.into_dyn())?;
        Ok(maps)
    }
}

/// Named result map hooks available to compartment templates
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: HashMap<String, Arc<dyn ExtraResultMaps>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: HashMap::new(),
        }
    }

    /// Registry with the `tensor` and `vector` hooks
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("tensor", Arc::new(TensorMaps));
        registry.register("vector", Arc::new(VectorMaps));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, hook: Arc<dyn ExtraResultMaps>) {
        self.hooks.insert(name.into(), hook);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ExtraResultMaps>, ModelError> {
        self.hooks
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownHook(name.to_string()))
    }
}
