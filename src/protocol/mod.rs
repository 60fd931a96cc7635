//! Acquisition protocol and problem data
//!
//! A [`Protocol`] holds one value per acquired volume for every named column
//! (`b`, `G`, `Delta`, `TE`, ...). Models bind their protocol parameters to
//! these columns. The gradient vector `g` is assembled from the `gx`, `gy` and
//! `gz` columns, and `b` can be derived from `G`, `Delta` and `delta`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayD, Axis};

use crate::error::ModelError;

/// Gyromagnetic ratio of hydrogen in rad s^-1 T^-1
pub const GAMMA_H: f64 = 267.5987e6;

/// Columns of the acquisition protocol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Protocol {
    columns: BTreeMap<String, Array1<f64>>,
    num_volumes: usize,
}

impl Protocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a protocol table
    ///
    /// The first line holds the column names and may start with `#`. Values are
    /// separated by commas, tabs or spaces; further lines starting with `#` are
    /// ignored.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::io(path, e))?;
        Self::from_csv_str(&content)
    }

    /// Parse a protocol table from a string, see [`Protocol::from_csv`]
    pub fn from_csv_str(content: &str) -> Result<Self, ModelError> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| ModelError::ProtocolError("empty protocol".to_string()))?;
        let header = header.trim().trim_start_matches('#');

        let normalized: String = std::iter::once(header)
            .chain(lines)
            .map(|line| {
                if line.contains(',') {
                    line.to_string()
                } else {
                    line.split_whitespace().collect::<Vec<_>>().join(",")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(normalized.as_bytes());

        let names: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); names.len()];

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            for (col, field) in record.iter().enumerate() {
                let value = field.parse::<f64>().map_err(|_| {
                    ModelError::ProtocolError(format!(
                        "invalid value '{}' in column '{}' on row {}",
                        field,
                        names.get(col).map(|s| s.as_str()).unwrap_or("?"),
                        row + 1
                    ))
                })?;
                values[col].push(value);
            }
        }

        let mut protocol = Self::new();
        for (name, column) in names.into_iter().zip(values) {
            protocol = protocol.with_column(name, Array1::from(column))?;
        }
        Ok(protocol)
    }

    /// Add or replace a column
    ///
    /// All columns must have the same number of volumes.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Array1<f64>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let replaces_only_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if !self.columns.is_empty() && !replaces_only_column && values.len() != self.num_volumes {
            return Err(ModelError::ShapeMismatch {
                name,
                expected: self.num_volumes,
                actual: values.len(),
            });
        }
        self.num_volumes = values.len();
        self.columns.insert(name, values);
        Ok(self)
    }

    pub fn num_volumes(&self) -> usize {
        self.num_volumes
    }

    /// Whether the protocol holds the raw column `name`
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Names of the raw columns, sorted
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|k| k.as_str()).collect()
    }

    /// The values of a column, derived where possible
    pub fn column(&self, name: &str) -> Result<Array1<f64>, ModelError> {
        if let Some(column) = self.columns.get(name) {
            return Ok(column.clone());
        }
        match name {
            "b" if self.has_columns(&["G", "Delta", "delta"]) => {
                let g = &self.columns["G"];
                let big_delta = &self.columns["Delta"];
                let delta = &self.columns["delta"];
                Ok(ndarray::Zip::from(g)
                    .and(big_delta)
                    .and(delta)
                    .map_collect(|&g, &big_delta, &delta| {
                        (GAMMA_H * g * delta).powi(2) * (big_delta - delta / 3.0)
                    }))
            }
            _ => Err(ModelError::ProtocolError(format!(
                "protocol has no column '{}'",
                name
            ))),
        }
    }

    /// Whether a value for the protocol parameter `name` can be provided
    pub fn has_parameter(&self, name: &str) -> bool {
        match name {
            "g" => self.has_column("g") || self.has_columns(&["gx", "gy", "gz"]),
            "b" => self.has_column("b") || self.has_columns(&["G", "Delta", "delta"]),
            _ => self.has_column(name),
        }
    }

    /// Values of a protocol parameter, volumes first
    ///
    /// `g` yields a `(volumes, 3)` array of gradient directions, every other
    /// parameter a vector.
    pub fn parameter_values(&self, name: &str) -> Result<ArrayD<f64>, ModelError> {
        if name == "g" && !self.has_column("g") {
            let mut g = Array2::zeros((self.num_volumes, 3));
            for (i, axis) in ["gx", "gy", "gz"].iter().enumerate() {
                g.column_mut(i).assign(&self.column(axis)?);
            }
            return Ok(g.into_dyn());
        }
        Ok(self.column(name)?.into_dyn())
    }

    /// A protocol with only the given volumes
    pub fn select_volumes(&self, indices: &[usize]) -> Protocol {
        Protocol {
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.select(Axis(0), indices)))
                .collect(),
            num_volumes: indices.len(),
        }
    }

    fn has_columns(&self, names: &[&str]) -> bool {
        names.iter().all(|n| self.has_column(n))
    }
}

/// Why a protocol cannot be used with a model
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolProblem {
    /// Neither a protocol was given nor problem data set
    NoProtocol,
    /// A required protocol parameter is not available
    MissingColumn(String),
}

impl std::fmt::Display for ProtocolProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoProtocol => write!(f, "no protocol available"),
            Self::MissingColumn(name) => write!(f, "missing protocol column '{}'", name),
        }
    }
}

/// Protocol and measured signals handed to a model
#[derive(Debug, Clone)]
pub struct ProblemData {
    protocol: Protocol,
    signals: Array2<f64>,
}

impl ProblemData {
    /// Combine a protocol with signals of shape `(voxels, volumes)`
    pub fn new(protocol: Protocol, signals: Array2<f64>) -> Result<Self, ModelError> {
        if signals.ncols() != protocol.num_volumes() {
            return Err(ModelError::ShapeMismatch {
                name: "signals".to_string(),
                expected: protocol.num_volumes(),
                actual: signals.ncols(),
            });
        }
        Ok(Self { protocol, signals })
    }

    /// Wrap for sharing between the models of a cascade
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    pub fn signals(&self) -> &Array2<f64> {
        &self.signals
    }

    pub fn num_voxels(&self) -> usize {
        self.signals.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    const PROTOCOL: &str = "#gx,gy,gz,b,TE\n\
        0,0,0,0,0.05\n\
        1,0,0,1e9,0.05\n\
        # comment line\n\
        0,1,0,3e9,0.05\n";

    #[test]
    fn test_from_csv_str() {
        let protocol = Protocol::from_csv_str(PROTOCOL).unwrap();
        assert_eq!(protocol.num_volumes(), 3);
        assert_eq!(protocol.column_names(), vec!["TE", "b", "gx", "gy", "gz"]);
        assert_eq!(protocol.column("b").unwrap(), arr1(&[0.0, 1e9, 3e9]));
    }

    #[test]
    fn test_whitespace_separated() {
        let protocol = Protocol::from_csv_str("b   TE\n0\t0.05\n1e9 0.05\n").unwrap();
        assert_eq!(protocol.num_volumes(), 2);
        assert!(protocol.has_column("TE"));
    }

    #[test]
    fn test_gradient_vector() {
        let protocol = Protocol::from_csv_str(PROTOCOL).unwrap();
        assert!(protocol.has_parameter("g"));
        let g = protocol.parameter_values("g").unwrap();
        assert_eq!(g.shape(), &[3, 3]);
        assert_eq!(g[[2, 1]], 1.0);
    }

    #[test]
    fn test_derived_b() {
        let protocol = Protocol::new()
            .with_column("G", arr1(&[0.04]))
            .unwrap()
            .with_column("Delta", arr1(&[0.03]))
            .unwrap()
            .with_column("delta", arr1(&[0.01]))
            .unwrap();
        assert!(protocol.has_parameter("b"));
        let expected = (GAMMA_H * 0.04 * 0.01f64).powi(2) * (0.03 - 0.01 / 3.0);
        assert_relative_eq!(protocol.column("b").unwrap()[0], expected);
    }

    #[test]
    fn test_column_length_mismatch() {
        let result = Protocol::new()
            .with_column("b", arr1(&[0.0, 1.0]))
            .unwrap()
            .with_column("TE", arr1(&[0.05]));
        assert!(matches!(result, Err(ModelError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_problem_data_shape() {
        let protocol = Protocol::from_csv_str(PROTOCOL).unwrap();
        assert!(ProblemData::new(protocol.clone(), Array2::zeros((4, 3))).is_ok());
        assert!(ProblemData::new(protocol, Array2::zeros((4, 2))).is_err());
    }

    #[test]
    fn test_select_volumes() {
        let protocol = Protocol::from_csv_str(PROTOCOL).unwrap();
        let selected = protocol.select_volumes(&[0, 2]);
        assert_eq!(selected.num_volumes(), 2);
        assert_eq!(selected.column("b").unwrap(), arr1(&[0.0, 3e9]));
    }
}
