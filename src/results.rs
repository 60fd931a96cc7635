//! Per-voxel result maps
//!
//! Results are keyed by fully qualified names (`<compartment>.<parameter>`,
//! or a bare name for derived maps). Every map has the number of voxels as
//! its leading dimension.

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array1, ArrayD, ArrayView1, Ix1};

use crate::error::ModelError;

/// Result maps of one model, keyed by qualified name
pub type ResultMaps = BTreeMap<String, ArrayD<f64>>;

/// Result maps of several models, keyed by model name
pub type ModelResults = HashMap<String, ResultMaps>;

/// A per-voxel map viewed as a vector
pub fn voxel_vector<'a>(
    maps: &'a ResultMaps,
    key: &str,
    context: &str,
) -> Result<ArrayView1<'a, f64>, ModelError> {
    let map = maps
        .get(key)
        .ok_or_else(|| ModelError::missing_key(key, context))?;
    map.view()
        .into_dimensionality::<Ix1>()
        .map_err(|_| ModelError::InvalidMap {
            name: key.to_string(),
            message: format!("expected one value per voxel, got shape {:?}", map.shape()),
        })
}

/// Number of voxels of the maps (leading dimension of the first map)
pub fn num_voxels(maps: &ResultMaps) -> Option<usize> {
    maps.values().next().and_then(|m| m.shape().first().copied())
}

/// Insert a map, failing if the key is already present
pub fn insert_new(
    maps: &mut ResultMaps,
    key: impl Into<String>,
    map: ArrayD<f64>,
) -> Result<(), ModelError> {
    let key = key.into();
    if maps.contains_key(&key) {
        return Err(ModelError::NameCollision(key));
    }
    maps.insert(key, map);
    Ok(())
}

/// Insert a per-voxel vector
pub fn insert_vector(
    maps: &mut ResultMaps,
    key: impl Into<String>,
    values: Array1<f64>,
) -> Result<(), ModelError> {
    insert_new(maps, key, values.into_dyn())
}
