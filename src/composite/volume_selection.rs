use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::protocol::Protocol;

fn default_unweighted_threshold() -> f64 {
    25e6
}

fn default_true() -> bool {
    true
}

/// Which acquired volumes take part in a fit
///
/// Volumes with a b-value at or below `unweighted_threshold` count as
/// unweighted. Weighted volumes can further be restricted to a b-value window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSelection {
    #[serde(default = "default_unweighted_threshold")]
    pub unweighted_threshold: f64,
    #[serde(default = "default_true")]
    pub use_unweighted: bool,
    #[serde(default = "default_true")]
    pub use_weighted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_b: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_b: Option<f64>,
}

impl Default for VolumeSelection {
    fn default() -> Self {
        Self {
            unweighted_threshold: default_unweighted_threshold(),
            use_unweighted: true,
            use_weighted: true,
            min_b: None,
            max_b: None,
        }
    }
}

impl VolumeSelection {
    /// Keep unweighted volumes and weighted volumes with `min_b <= b <= max_b`
    pub fn b_window(min_b: f64, max_b: f64) -> Self {
        Self {
            min_b: Some(min_b),
            max_b: Some(max_b),
            ..Default::default()
        }
    }

    /// Indices of the selected volumes, in protocol order
    pub fn select(&self, protocol: &Protocol) -> Result<Vec<usize>, ModelError> {
        let b = protocol.column("b")?;
        Ok(b.iter()
            .enumerate()
            .filter(|&(_, &b)| {
                if b <= self.unweighted_threshold {
                    return self.use_unweighted;
                }
                self.use_weighted
                    && self.min_b.is_none_or(|min| b >= min)
                    && self.max_b.is_none_or(|max| b <= max)
            })
            .map(|(i, _)| i)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn protocol() -> Protocol {
        Protocol::new()
            .with_column("b", arr1(&[0.0, 1e9, 2e9, 3e9, 1e6]))
            .unwrap()
    }

    #[test]
    fn test_default_keeps_all() {
        assert_eq!(VolumeSelection::default().select(&protocol()).unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_b_window() {
        let selection = VolumeSelection::b_window(0.5e9, 2.5e9);
        assert_eq!(selection.select(&protocol()).unwrap(), vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_weighted_only() {
        let selection = VolumeSelection {
            use_unweighted: false,
            ..Default::default()
        };
        assert_eq!(selection.select(&protocol()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_requires_b() {
        let protocol = Protocol::new().with_column("TE", arr1(&[0.05])).unwrap();
        assert!(VolumeSelection::default().select(&protocol).is_err());
    }

    #[test]
    fn test_from_json() {
        let selection: VolumeSelection = serde_json::from_str(r#"{ "max_b": 1.5e9 }"#).unwrap();
        assert_eq!(selection.unweighted_threshold, 25e6);
        assert_eq!(selection.max_b, Some(1.5e9));
    }
}
