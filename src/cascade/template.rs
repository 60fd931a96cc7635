use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::composite::ParameterValue;
use crate::error::ModelError;
use crate::results::{ModelResults, ResultMaps};

type ComputeFn =
    dyn Fn(&ResultMaps, &ModelResults) -> Result<ParameterValue, ModelError> + Send + Sync;

/// Computes a value from the results of the previous model and the results of
/// every model before it, keyed by model name
#[derive(Clone)]
pub struct ComputedValue(Arc<ComputeFn>);

impl ComputedValue {
    pub fn new(
        function: impl Fn(&ResultMaps, &ModelResults) -> Result<ParameterValue, ModelError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self(Arc::new(function))
    }
}

impl fmt::Debug for ComputedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ComputedValue")
    }
}

/// An init or fix applied to a cascade member before it runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CascadeValue {
    /// A constant
    Literal(f64),
    /// A key in the result map of the previous model
    ResultKey(String),
    /// A key in the result map of any model that already ran
    ///
    /// In JSON `{ "model": "S0", "key": "S0.s0" }`.
    ModelKey { model: String, key: String },
    /// A function of the previous results and the full result history
    #[serde(skip)]
    Computed(ComputedValue),
}

impl CascadeValue {
    pub fn computed(
        function: impl Fn(&ResultMaps, &ModelResults) -> Result<ParameterValue, ModelError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::Computed(ComputedValue::new(function))
    }

    pub fn model_key(model: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ModelKey {
            model: model.into(),
            key: key.into(),
        }
    }

    /// Resolve against the results of the previous model and the history
    ///
    /// For the first model of a cascade `previous` is empty.
    pub fn resolve(
        &self,
        previous: &ResultMaps,
        history: &ModelResults,
    ) -> Result<ParameterValue, ModelError> {
        match self {
            Self::Literal(value) => Ok(ParameterValue::Scalar(*value)),
            Self::ResultKey(key) => {
                let map = previous
                    .get(key)
                    .ok_or_else(|| ModelError::missing_key(key, "cascade init/fix"))?;
                ParameterValue::from_map(key, map)
            }
            Self::ModelKey { model, key } => {
                let map = history
                    .get(model)
                    .ok_or_else(|| ModelError::MissingResults(model.clone()))?
                    .get(key)
                    .ok_or_else(|| ModelError::missing_key(key, format!("cascade init/fix from '{}'", model)))?;
                ParameterValue::from_map(key, map)
            }
            Self::Computed(function) => (function.0)(previous, history),
        }
    }
}

impl From<f64> for CascadeValue {
    fn from(value: f64) -> Self {
        Self::Literal(value)
    }
}

impl From<&str> for CascadeValue {
    fn from(key: &str) -> Self {
        Self::ResultKey(key.to_string())
    }
}

/// A cascade member: a model name, optionally run under a new name
///
/// In JSON either `"S0"` or `["S0T1_MI_EPI", "S0T1_MI_EPI_fixed_eff"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CascadeMember {
    Model(String),
    Renamed(String, String),
}

impl CascadeMember {
    /// Name of the model or cascade to build
    pub fn model(&self) -> &str {
        match self {
            Self::Model(name) | Self::Renamed(name, _) => name,
        }
    }

    /// Name of the member within the cascade
    pub fn name(&self) -> &str {
        match self {
            Self::Model(name) | Self::Renamed(_, name) => name,
        }
    }
}

impl From<&str> for CascadeMember {
    fn from(name: &str) -> Self {
        Self::Model(name.to_string())
    }
}

/// Inits or fixes per member name, then per parameter
pub type CascadeAssignments = BTreeMap<String, BTreeMap<String, CascadeValue>>;

/// Template of a cascade
///
/// ```json
/// {
///     "name": "S0T1_MI_EPI",
///     "models": ["S0", ["S0T1_MI_EPI", "S0T1_MI_EPI_fixed_eff"], "S0T1_MI_EPI"],
///     "fixes": { "S0T1_MI_EPI_fixed_eff": { "ExpT1DecIR.Efficiency": 1 } }
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CascadeTemplate {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub models: Vec<CascadeMember>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inits: CascadeAssignments,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fixes: CascadeAssignments,
}

impl CascadeTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_str(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn model(mut self, member: impl Into<CascadeMember>) -> Self {
        self.models.push(member.into());
        self
    }

    pub fn renamed(mut self, model: impl Into<String>, name: impl Into<String>) -> Self {
        self.models
            .push(CascadeMember::Renamed(model.into(), name.into()));
        self
    }

    pub fn init(
        mut self,
        member: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<CascadeValue>,
    ) -> Self {
        self.inits
            .entry(member.into())
            .or_default()
            .insert(parameter.into(), value.into());
        self
    }

    pub fn fix(
        mut self,
        member: impl Into<String>,
        parameter: impl Into<String>,
        value: impl Into<CascadeValue>,
    ) -> Self {
        self.fixes
            .entry(member.into())
            .or_default()
            .insert(parameter.into(), value.into());
        self
    }
}
