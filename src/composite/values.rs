use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayD, Ix1};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Value of a fixed or initialized parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// One value for all voxels
    Scalar(f64),
    /// One value per voxel
    Map(Array1<f64>),
}

impl ParameterValue {
    /// Use a result map as a per-voxel value
    pub fn from_map(key: &str, map: &ArrayD<f64>) -> Result<Self, ModelError> {
        map.clone()
            .into_dimensionality::<Ix1>()
            .map(Self::Map)
            .map_err(|_| ModelError::InvalidMap {
                name: key.to_string(),
                message: format!("expected one value per voxel, got shape {:?}", map.shape()),
            })
    }

    /// The value for each of `num_voxels` voxels
    pub fn broadcast(&self, name: &str, num_voxels: usize) -> Result<Array1<f64>, ModelError> {
        match self {
            Self::Scalar(value) => Ok(Array1::from_elem(num_voxels, *value)),
            Self::Map(values) if values.len() == num_voxels => Ok(values.clone()),
            Self::Map(values) => Err(ModelError::ShapeMismatch {
                name: name.to_string(),
                expected: num_voxels,
                actual: values.len(),
            }),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<Array1<f64>> for ParameterValue {
    fn from(values: Array1<f64>) -> Self {
        Self::Map(values)
    }
}

/// A value computed when the model is built
#[derive(Clone)]
pub struct DeferredValue(Arc<dyn Fn() -> f64 + Send + Sync>);

impl DeferredValue {
    pub fn new(function: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(function))
    }

    pub fn evaluate(&self) -> f64 {
        (self.0)()
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredValue")
    }
}

/// A fix or init in a composite model template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateValue {
    Scalar(f64),
    #[serde(skip)]
    Deferred(DeferredValue),
}

impl TemplateValue {
    pub fn evaluate(&self) -> ParameterValue {
        match self {
            Self::Scalar(value) => ParameterValue::Scalar(*value),
            Self::Deferred(deferred) => ParameterValue::Scalar(deferred.evaluate()),
        }
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}
