//! Eigen system of the diffusion tensor compartment

use std::cmp::Ordering;
use std::f64::consts::FRAC_PI_2;

use nalgebra::Vector3;
use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;

use crate::compartments::ExtraResultMaps;
use crate::error::ModelError;
use crate::results::{insert_new, insert_vector, voxel_vector, ResultMaps};

/// Convert an inclination/azimuth pair to a unit vector
pub fn spherical_to_cartesian(theta: f64, phi: f64) -> Vector3<f64> {
    Vector3::new(
        theta.sin() * phi.cos(),
        theta.sin() * phi.sin(),
        theta.cos(),
    )
}

/// Rotate `vector` around the unit `axis` by `psi` radians (Rodrigues)
fn rotate_around(axis: &Vector3<f64>, vector: &Vector3<f64>, psi: f64) -> Vector3<f64> {
    vector * psi.cos() + axis.cross(vector) * psi.sin() + axis * axis.dot(vector) * (1.0 - psi.cos())
}

/// The three eigen vectors of a tensor given by its orientation angles
pub fn eigen_vectors(theta: f64, phi: f64, psi: f64) -> [Vector3<f64>; 3] {
    let v0 = spherical_to_cartesian(theta, phi);
    let v1 = rotate_around(&v0, &spherical_to_cartesian(theta + FRAC_PI_2, phi), psi);
    let v2 = v0.cross(&v1);
    [v0, v1, v2]
}

/// Indices of `values` ordered from largest to smallest
///
/// The sort is stable: equal values keep their original index order, so
/// `[2.0, 1.0, 1.0]` ranks as `[0, 1, 2]`. NaN sorts last.
pub fn eigen_ranking(values: &[f64; 3]) -> [usize; 3] {
    let mut ranking = [0, 1, 2];
    ranking.sort_by(|&a, &b| match (values[a].is_nan(), values[b].is_nan()) {
        (false, false) => values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal),
        (a_nan, b_nan) => a_nan.cmp(&b_nan),
    });
    ranking
}

/// Fractional anisotropy of three eigen values
pub fn fractional_anisotropy(l: &[f64; 3]) -> f64 {
    let denominator = (l[0] * l[0] + l[1] * l[1] + l[2] * l[2]).sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    let numerator =
        ((l[0] - l[1]).powi(2) + (l[1] - l[2]).powi(2) + (l[2] - l[0]).powi(2)).sqrt();
    (0.5f64).sqrt() * numerator / denominator
}

struct VoxelEigen {
    vectors: [Vector3<f64>; 3],
    ranking: [usize; 3],
    sorted: [f64; 3],
    fa: f64,
    md: f64,
}

/// Derived maps of a tensor compartment
///
/// Needs `d`, `dperp0`, `dperp1`, `theta`, `phi` and `psi`. Produces the eigen
/// vectors `vec0..2` (and their components `vecI_J`), the eigen values
/// `eigval0..2` in descending order, `eigen_ranking`, `FA`, `MD`, the axial
/// diffusivity `AD` (largest eigen value) and the radial diffusivity `RD`
/// (mean of the other two).
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorMaps;

impl ExtraResultMaps for TensorMaps {
    fn extra_result_maps(
        &self,
        compartment: &str,
        results: &ResultMaps,
    ) -> Result<ResultMaps, ModelError> {
        let get = |param: &str| voxel_vector(results, &format!("{}.{}", compartment, param), compartment);
        let d = get("d")?;
        let dperp0 = get("dperp0")?;
        let dperp1 = get("dperp1")?;
        let theta = get("theta")?;
        let phi = get("phi")?;
        let psi = get("psi")?;

        let n = d.len();
        for (name, len) in [
            ("dperp0", dperp0.len()),
            ("dperp1", dperp1.len()),
            ("theta", theta.len()),
            ("phi", phi.len()),
            ("psi", psi.len()),
        ] {
            if len != n {
                return Err(ModelError::ShapeMismatch {
                    name: format!("{}.{}", compartment, name),
                    expected: n,
                    actual: len,
                });
            }
        }

        let voxels: Vec<VoxelEigen> = (0..n)
            .into_par_iter()
            .map(|i| {
                let values = [d[i], dperp0[i], dperp1[i]];
                let ranking = eigen_ranking(&values);
                VoxelEigen {
                    vectors: eigen_vectors(theta[i], phi[i], psi[i]),
                    ranking,
                    sorted: ranking.map(|r| values[r]),
                    fa: fractional_anisotropy(&values),
                    md: values.iter().sum::<f64>() / 3.0,
                }
            })
            .collect();

        let mut vectors = Array3::<f64>::zeros((n, 3, 3));
        let mut ranking = Array2::<f64>::zeros((n, 3));
        let mut sorted = Array2::<f64>::zeros((n, 3));
        for (i, voxel) in voxels.iter().enumerate() {
            for ind in 0..3 {
                ranking[[i, ind]] = voxel.ranking[ind] as f64;
                sorted[[i, ind]] = voxel.sorted[ind];
                for dim in 0..3 {
                    vectors[[i, ind, dim]] = voxel.vectors[ind][dim];
                }
            }
        }

        let key = |suffix: &str| format!("{}.{}", compartment, suffix);
        let mut maps = ResultMaps::new();
        insert_new(&mut maps, key("eigen_ranking"), ranking.into_dyn())?;
        insert_vector(&mut maps, key("FA"), voxels.iter().map(|v| v.fa).collect())?;
        insert_vector(&mut maps, key("MD"), voxels.iter().map(|v| v.md).collect())?;
        insert_vector(&mut maps, key("AD"), sorted.column(0).to_owned())?;
        insert_vector(
            &mut maps,
            key("RD"),
            (&sorted.column(1) + &sorted.column(2)) / 2.0,
        )?;

        for ind in 0..3 {
            let vector = vectors.index_axis(ndarray::Axis(1), ind);
            insert_new(&mut maps, key(&format!("vec{}", ind)), vector.to_owned().into_dyn())?;
            for dim in 0..3 {
                let component: Array1<f64> = vector.column(dim).to_owned();
                insert_vector(&mut maps, key(&format!("vec{}_{}", ind, dim)), component)?;
            }
            insert_vector(
                &mut maps,
                key(&format!("eigval{}", ind)),
                sorted.column(ind).to_owned(),
            )?;
        }

        Ok(maps)
    }
}
