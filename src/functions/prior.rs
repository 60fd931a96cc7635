use serde::{Deserialize, Serialize};

use crate::parameters::MOT_FLOAT_TYPE;

/// An additional constraint function evaluated on a compartment's parameters
///
/// The generated function has the signature
/// `mot_float_type <function_name>(const mot_float_type p1, ...)` with the
/// parameters in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriorDefinition {
    body: String,
    parameters: Vec<String>,
    function_name: String,
}

impl PriorDefinition {
    pub fn new(
        body: impl Into<String>,
        parameters: Vec<String>,
        function_name: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            parameters,
            function_name: function_name.into(),
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Names of the compartment parameters this prior takes, in call order
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Render the prior as a kernel function
    pub fn prior_function(&self) -> String {
        let parameters = self
            .parameters
            .iter()
            .map(|p| format!("const {} {}", MOT_FLOAT_TYPE, p))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{ret} {name}({parameters}){{\n    {body}\n}}",
            ret = MOT_FLOAT_TYPE,
            name = self.function_name,
            parameters = parameters,
            body = self.body.trim(),
        )
    }
}
