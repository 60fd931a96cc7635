use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::composite::{DeferredValue, PostOptimizationModifier, TemplateValue, VolumeSelection};
use crate::error::ModelError;
use crate::results::ResultMaps;

/// Template of a composite model
///
/// # Example
///
/// ```ignore
/// let template: CompositeModelTemplate = serde_json::from_str(r#"{
///     "name": "BallStick_r1",
///     "model_expression": "S0 * ((Weight(w_ball) * Ball) + (Weight(w_stick0) * Stick(Stick0)))",
///     "fixes": { "Ball.d": 3.0e-9 },
///     "post_optimization_modifiers": [
///         { "name": "FS", "expression": "1 - w_ball.w" }
///     ]
/// }"#)?;
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositeModelTemplate {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Inherited from the base template when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_expression: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fixes: BTreeMap<String, TemplateValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inits: BTreeMap<String, TemplateValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lower_bounds: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub upper_bounds: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_selection: Option<VolumeSelection>,

    /// Applied in declaration order after fitting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_optimization_modifiers: Vec<PostOptimizationModifier>,
}

impl CompositeModelTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn from_str(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn model_expression(mut self, expression: impl Into<String>) -> Self {
        self.model_expression = Some(expression.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    pub fn fix(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fixes.insert(name.into(), TemplateValue::Scalar(value));
        self
    }

    /// Fix a parameter to a value computed when the model is built
    pub fn fix_with(
        mut self,
        name: impl Into<String>,
        value: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.fixes
            .insert(name.into(), TemplateValue::Deferred(DeferredValue::new(value)));
        self
    }

    pub fn init(mut self, name: impl Into<String>, value: f64) -> Self {
        self.inits.insert(name.into(), TemplateValue::Scalar(value));
        self
    }

    pub fn lower_bound(mut self, name: impl Into<String>, value: f64) -> Self {
        self.lower_bounds.insert(name.into(), value);
        self
    }

    pub fn upper_bound(mut self, name: impl Into<String>, value: f64) -> Self {
        self.upper_bounds.insert(name.into(), value);
        self
    }

    pub fn volume_selection(mut self, selection: VolumeSelection) -> Self {
        self.volume_selection = Some(selection);
        self
    }

    pub fn modifier(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.post_optimization_modifiers
            .push(PostOptimizationModifier::expression(name, expression));
        self
    }

    pub fn modifier_fn(
        mut self,
        name: impl Into<String>,
        function: impl Fn(&ResultMaps) -> Result<ndarray::ArrayD<f64>, ModelError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.post_optimization_modifiers
            .push(PostOptimizationModifier::function(name, function));
        self
    }

    /// Merge with a base template, this template's values taking precedence
    ///
    /// Fixes, inits and bounds are merged per key. Modifiers of the base run
    /// before the modifiers of this template.
    pub fn inherit_from(&self, base: &CompositeModelTemplate) -> CompositeModelTemplate {
        let merge = |base: &BTreeMap<String, TemplateValue>, derived: &BTreeMap<String, TemplateValue>| {
            let mut merged = base.clone();
            merged.extend(derived.iter().map(|(k, v)| (k.clone(), v.clone())));
            merged
        };
        let merge_bounds = |base: &BTreeMap<String, f64>, derived: &BTreeMap<String, f64>| {
            let mut merged = base.clone();
            merged.extend(derived.iter().map(|(k, v)| (k.clone(), *v)));
            merged
        };

        CompositeModelTemplate {
            name: self.name.clone(),
            description: self
                .description
                .clone()
                .or_else(|| base.description.clone()),
            model_expression: self
                .model_expression
                .clone()
                .or_else(|| base.model_expression.clone()),
            extends: None,
            fixes: merge(&base.fixes, &self.fixes),
            inits: merge(&base.inits, &self.inits),
            lower_bounds: merge_bounds(&base.lower_bounds, &self.lower_bounds),
            upper_bounds: merge_bounds(&base.upper_bounds, &self.upper_bounds),
            volume_selection: self
                .volume_selection
                .clone()
                .or_else(|| base.volume_selection.clone()),
            post_optimization_modifiers: base
                .post_optimization_modifiers
                .iter()
                .chain(&self.post_optimization_modifiers)
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template() {
        let template = CompositeModelTemplate::from_str(
            r#"{
            "name": "Tensor",
            "model_expression": "S0 * Tensor",
            "inits": { "Tensor.d": 1.7e-9 },
            "volume_selection": { "max_b": 1.5e9 }
        }"#,
        )
        .unwrap();
        assert_eq!(template.model_expression.as_deref(), Some("S0 * Tensor"));
        assert!(matches!(template.inits["Tensor.d"], TemplateValue::Scalar(v) if v == 1.7e-9));
        assert!(template.fixes.is_empty());
    }

    #[test]
    fn test_inherit_from() {
        let base = CompositeModelTemplate::new("BallStick_r1")
            .model_expression("S0 * Stick")
            .fix("Ball.d", 3.0e-9)
            .init("Stick.d", 1.0e-9)
            .modifier("FS", "1 - w_ball.w");
        let derived = CompositeModelTemplate::new("BallStick_r1-ExVivo")
            .extends("BallStick_r1")
            .fix("Ball.d", 2.0e-9)
            .modifier("FS2", "2 * FS");

        let merged = derived.inherit_from(&base);
        assert_eq!(merged.name, "BallStick_r1-ExVivo");
        assert_eq!(merged.model_expression.as_deref(), Some("S0 * Stick"));
        assert!(matches!(merged.fixes["Ball.d"], TemplateValue::Scalar(v) if v == 2.0e-9));
        assert!(merged.inits.contains_key("Stick.d"));
        let names: Vec<&str> = merged
            .post_optimization_modifiers
            .iter()
            .map(|m| m.name.as_str())
            .collect();
        assert_eq!(names, vec!["FS", "FS2"]);
    }
}
