pub mod cascade;
pub mod codegen;
pub mod compartments;
pub mod composite;
pub mod error;
pub mod functions;
pub mod library;
pub mod optimize;
pub mod parameters;
pub mod protocol;
pub mod results;

pub use crate::cascade::{CascadeEntry, CascadeModel, CascadeState, CascadeTemplate, CascadeValue};
pub use crate::codegen::{CodeGenerator, CodegenOptions, CompositeCodeGenerator};
pub use crate::compartments::{ExtraResultMaps, HookRegistry};
pub use crate::composite::{CompositeModel, CompositeModelTemplate, ParameterValue, VolumeSelection};
pub use crate::functions::{FunctionKind, FunctionTemplate, KernelFunction, PriorDefinition};
pub use crate::library::ComponentLibrary;
pub use crate::optimize::{fit_cascade, fit_composite, OptimizationInput, Optimizer};
pub use crate::parameters::{DataType, ParameterCatalog, ParameterDescriptor, ParameterKind};
pub use crate::protocol::{ProblemData, Protocol};
pub use crate::results::{ModelResults, ResultMaps};
pub use error::ModelError;

pub mod prelude {
    pub mod functions {
        pub use crate::functions::{
            DependencySpec, EmbeddedSource, FileSystemSource, FunctionBuilder, FunctionKind,
            FunctionTemplate, KernelFunction, PriorDefinition, SourceChain, SourceLoader,
        };
    }
    pub mod models {
        pub use crate::cascade::{
            CascadeEntry, CascadeMember, CascadeModel, CascadeState, CascadeTemplate,
            CascadeValue,
        };
        pub use crate::composite::{
            CompositeModel, CompositeModelTemplate, ModelExpression, ParameterValue,
            PostOptimizationModifier, TemplateValue, VolumeSelection,
        };
    }

    pub use crate::codegen::{CodeGenerator, CodegenOptions};
    pub use crate::error::ModelError;
    pub use crate::library::ComponentLibrary;
    pub use crate::optimize::{fit_cascade, fit_composite, InitialValues, OptimizationInput, Optimizer};
    pub use crate::protocol::{ProblemData, Protocol};
    pub use crate::results::{ModelResults, ResultMaps};

    /// Build [`crate::cascade::CascadeAssignments`] for one member
    ///
    /// ```ignore
    /// let inits = cascade_values! {
    ///     "BallStick_r1" => { "Stick0.theta" => "Tensor.theta", "Ball.d" => 3e-9 },
    /// };
    /// ```
    #[macro_export]
    macro_rules! cascade_values {
        ($($member:expr => { $($parameter:expr => $value:expr),* $(,)? }),* $(,)?) => {{
            let mut assignments = $crate::cascade::CascadeAssignments::new();
            $(
                #[allow(unused_variables)]
                let values = assignments.entry($member.to_string()).or_default();
                $(
                    values.insert(
                        $parameter.to_string(),
                        $crate::cascade::CascadeValue::from($value),
                    );
                )*
            )*
            assignments
        }};
    }
}

#[cfg(test)]
mod tests {
    use crate::cascade::CascadeValue;
    use crate::cascade_values;

    #[test]
    fn test_cascade_values_macro() {
        let inits = cascade_values! {
            "BallStick_r1" => { "Stick0.theta" => "Tensor.theta", "Ball.d" => 3e-9 },
            "S0" => {},
        };
        assert_eq!(inits.len(), 2);
        assert!(matches!(
            inits["BallStick_r1"]["Ball.d"],
            CascadeValue::Literal(v) if v == 3e-9
        ));
        assert!(inits["S0"].is_empty());
    }
}
