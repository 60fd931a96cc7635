use std::collections::HashSet;

use crate::codegen::{function_signature, include_guard, CodeGenerator};
use crate::composite::CompositeModel;
use crate::parameters::{DataType, ParameterDescriptor, ParameterKind, MOT_FLOAT_TYPE};

/// Kernel source of a composite model
///
/// The generated source consists of, in order:
///
/// 1. the `mot_float_type` definitions for the selected precision
/// 2. the data struct of the model (protocol columns and fixed values)
/// 3. every compartment with its dependencies, each emitted once
/// 4. the compartment priors
/// 5. `<model>_evaluate`, the model signal for one observation
/// 6. `<model>_prior`, the product of all compartment priors
pub struct CompositeCodeGenerator<'m> {
    model: &'m CompositeModel,
    kernel_name: String,
}

impl<'m> CompositeCodeGenerator<'m> {
    pub fn new(model: &'m CompositeModel) -> Self {
        Self {
            model,
            kernel_name: model.kernel_name(),
        }
    }

    pub fn data_struct_name(&self) -> String {
        format!("{}_data", self.kernel_name)
    }

    pub fn evaluate_function_name(&self) -> String {
        format!("{}_evaluate", self.kernel_name)
    }

    pub fn prior_function_name(&self) -> String {
        format!("{}_prior", self.kernel_name)
    }

    pub fn generate(&self) -> String {
        let compartments = CodeGenerator::new()
            .generate_all(self.model.compartments().iter().map(|c| c.function().as_ref()));

        let mut blocks = vec![
            self.model.codegen_options().preamble(),
            self.data_struct(),
            compartments,
        ];
        blocks.extend(self.compartment_priors());
        blocks.push(self.evaluate_function());
        blocks.push(self.prior_function());
        blocks.retain(|b| !b.is_empty());
        blocks.join("\n\n")
    }

    fn data_struct(&self) -> String {
        let mut fields = Vec::new();
        for parameter in self.model.protocol_parameters() {
            fields.push(format!(
                "    global {}* protocol_{};",
                parameter.data_type().name(),
                parameter.name()
            ));
        }
        for parameter in self.model.fixed_parameters() {
            fields.push(format!(
                "    {} fixed_{};",
                MOT_FLOAT_TYPE,
                parameter.variable_name()
            ));
        }
        format!(
            "typedef struct {{\n{}\n}} {};",
            fields.join("\n"),
            self.data_struct_name()
        )
    }

    fn compartment_priors(&self) -> Vec<String> {
        let mut emitted = HashSet::new();
        self.model
            .compartments()
            .iter()
            .filter_map(|c| c.function().prior())
            .filter(|prior| emitted.insert(prior.function_name().to_string()))
            .map(|prior| {
                include_guard(
                    &format!("PRIOR_{}_CL", prior.function_name()),
                    &prior.prior_function(),
                )
            })
            .collect()
    }

    fn data_parameter(&self) -> ParameterDescriptor {
        ParameterDescriptor::new(
            "data",
            DataType::new(format!("{}*", self.data_struct_name())).with_address_space("global"),
            ParameterKind::Library,
        )
    }

    fn x_parameter() -> ParameterDescriptor {
        ParameterDescriptor::new(
            "x",
            DataType::new(format!("{}*", MOT_FLOAT_TYPE))
                .with_pre_qualifier("const")
                .with_post_qualifier("const"),
            ParameterKind::Library,
        )
    }

    /// Variable declarations for every free and fixed parameter
    fn parameter_bindings(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (i, parameter) in self.model.free_parameters().iter().enumerate() {
            lines.push(format!(
                "    const {} {} = x[{}];",
                MOT_FLOAT_TYPE,
                parameter.variable_name(),
                i
            ));
        }
        for parameter in self.model.fixed_parameters() {
            lines.push(format!(
                "    const {ty} {var} = data->fixed_{var};",
                ty = MOT_FLOAT_TYPE,
                var = parameter.variable_name()
            ));
        }
        lines
    }

    /// The call of the compartment known as `alias`
    fn compartment_call(&self, alias: &str) -> String {
        let Some(instance) = self.model.compartment(alias) else {
            return alias.to_string();
        };
        let function = instance.function();
        let arguments = function
            .parameters()
            .iter()
            .map(|p| self.argument(alias, p.name()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", function.function_name(), arguments)
    }

    fn evaluate_function(&self) -> String {
        let signature = function_signature(
            MOT_FLOAT_TYPE,
            &self.evaluate_function_name(),
            &[
                self.data_parameter(),
                Self::x_parameter(),
                ParameterDescriptor::new(
                    "observation_index",
                    DataType::new("uint").with_pre_qualifier("const"),
                    ParameterKind::Library,
                ),
            ],
        );

        let mut body = Vec::new();
        for parameter in self.model.protocol_parameters() {
            body.push(format!(
                "    const {ty} {name} = data->protocol_{name}[observation_index];",
                ty = parameter.data_type().name(),
                name = parameter.name()
            ));
        }
        body.extend(self.parameter_bindings());
        let expression = self
            .model
            .expression()
            .render(&mut |alias: &str| self.compartment_call(alias));
        body.push(format!("    return {};", expression));

        format!("{}{{\n{}\n}}", signature, body.join("\n"))
    }

    /// The variable holding parameter `name` of the compartment known as `alias`
    fn argument(&self, alias: &str, name: &str) -> String {
        let is_protocol = self
            .model
            .compartment(alias)
            .and_then(|c| c.function().parameters().iter().find(|p| p.name() == name))
            .is_some_and(|p| p.is_protocol());
        if is_protocol {
            name.to_string()
        } else {
            crate::codegen::kernel_identifier(&format!("{}_{}", alias, name))
        }
    }

    fn prior_function(&self) -> String {
        let signature = function_signature(
            MOT_FLOAT_TYPE,
            &self.prior_function_name(),
            &[self.data_parameter(), Self::x_parameter()],
        );

        let priors: Vec<_> = self
            .model
            .compartments()
            .iter()
            .filter_map(|c| c.function().prior().map(|prior| (c.alias(), prior)))
            .collect();
        if priors.is_empty() {
            return format!("{}{{\n    return 1;\n}}", signature);
        }

        // protocol values are not per observation here; the first volume is used
        let mut body = Vec::new();
        for parameter in self.model.protocol_parameters() {
            let used = priors.iter().any(|(alias, prior)| {
                prior.parameters().iter().any(|p| p == parameter.name())
                    && self.argument(alias, parameter.name()) == parameter.name()
            });
            if used {
                body.push(format!(
                    "    const {ty} {name} = data->protocol_{name}[0];",
                    ty = parameter.data_type().name(),
                    name = parameter.name()
                ));
            }
        }
        body.extend(self.parameter_bindings());

        let calls: Vec<String> = priors
            .iter()
            .map(|(alias, prior)| {
                let arguments = prior
                    .parameters()
                    .iter()
                    .map(|p| self.argument(alias, p))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({})", prior.function_name(), arguments)
            })
            .collect();
        body.push(format!("    return {};", calls.join(" * ")));
        format!("{}{{\n{}\n}}", signature, body.join("\n"))
    }
}
