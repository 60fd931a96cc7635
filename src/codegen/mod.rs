//! Kernel source generation
//!
//! The generator walks a resolved function graph and emits every unique
//! function (identified by its kernel name) exactly once, dependencies first.
//! Every emission is wrapped in an include guard unique to the kernel name, so
//! concatenating the output of several generators is still valid source.

mod composite;

pub use composite::CompositeCodeGenerator;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::composite::CompositeModel;
use crate::functions::KernelFunction;
use crate::parameters::ParameterDescriptor;

/// Options for generated kernel source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodegenOptions {
    /// Use `double` instead of `float` for `mot_float_type`
    #[serde(default)]
    pub double_precision: bool,
}

impl CodegenOptions {
    /// Type definitions for the `mot_float_type` family
    pub fn preamble(&self) -> String {
        let base = if self.double_precision { "double" } else { "float" };
        let mut lines = vec![
            "#ifndef MOT_FLOAT_TYPE_DEFINED".to_string(),
            "#define MOT_FLOAT_TYPE_DEFINED".to_string(),
            format!("typedef {} mot_float_type;", base),
        ];
        for width in [2, 4, 8, 16] {
            lines.push(format!("typedef {}{} mot_float_type{};", base, width, width));
        }
        lines.push("#endif // MOT_FLOAT_TYPE_DEFINED".to_string());
        lines.join("\n")
    }
}

/// Render a function signature
///
/// Each parameter is rendered as `[address space] [qualifiers] type [post
/// qualifier] name`; parameters are joined by a comma and a newline.
pub fn function_signature(
    return_type: &str,
    function_name: &str,
    parameters: &[ParameterDescriptor],
) -> String {
    let parameters = parameters
        .iter()
        .map(|p| p.declaration())
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{} {}({})", return_type, function_name, parameters)
}

/// Turn a model or compartment name into a valid kernel identifier
///
/// Every character that is not alphanumeric or `_` becomes `_`, and a leading
/// digit is prefixed with `_`.
pub fn kernel_identifier(name: &str) -> String {
    let mut identifier: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if identifier.starts_with(|c: char| c.is_ascii_digit()) {
        identifier.insert(0, '_');
    }
    identifier
}

/// Wrap code in an include guard
pub fn include_guard(guard: &str, code: &str) -> String {
    format!(
        "#ifndef {guard}\n#define {guard}\n{code}\n#endif // {guard}",
        guard = guard,
        code = code.trim_end()
    )
}

/// Generator for function definitions and headers
#[derive(Debug, Default)]
pub struct CodeGenerator;

impl CodeGenerator {
    pub fn new() -> Self {
        Self
    }

    /// All functions of the graph rooted at `root`, dependencies first
    ///
    /// Each kernel name occurs once. The traversal is an iterative post-order
    /// walk; a function reached again while its own subtree is still being
    /// visited is not revisited.
    pub fn emission_order<'f>(&self, root: &'f KernelFunction) -> Vec<&'f KernelFunction> {
        let mut order: Vec<&KernelFunction> = Vec::new();
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&KernelFunction, bool)> = vec![(root, false)];

        while let Some((function, expanded)) = stack.pop() {
            let name = function.function_name();
            if emitted.contains(name) {
                continue;
            }
            if expanded {
                in_progress.remove(name);
                emitted.insert(name);
                order.push(function);
                continue;
            }
            if !in_progress.insert(name) {
                continue;
            }
            stack.push((function, true));
            for dependency in function.dependencies().iter().rev() {
                let dep_name = dependency.function_name();
                if !emitted.contains(dep_name) && !in_progress.contains(dep_name) {
                    stack.push((dependency.as_ref(), false));
                }
            }
        }
        order
    }

    /// The guarded definitions of `root` and all its dependencies
    pub fn generate(&self, root: &KernelFunction) -> String {
        self.generate_all(std::iter::once(root))
    }

    /// The guarded definitions of several roots, sharing one deduplication pass
    pub fn generate_all<'f>(&self, roots: impl IntoIterator<Item = &'f KernelFunction>) -> String {
        let mut emitted: HashSet<String> = HashSet::new();
        let mut blocks = Vec::new();
        for root in roots {
            for function in self.emission_order(root) {
                if emitted.insert(function.function_name().to_string()) {
                    blocks.push(include_guard(&function.guard_name(), &function.definition()));
                }
            }
        }
        blocks.join("\n\n")
    }

    /// The complete kernel source of a composite model
    pub fn generate_composite(&self, model: &CompositeModel) -> String {
        CompositeCodeGenerator::new(model).generate()
    }

    /// Forward declarations of `root` and all its dependencies
    pub fn generate_headers(&self, root: &KernelFunction) -> String {
        self.emission_order(root)
            .into_iter()
            .map(|f| include_guard(&format!("{}_H", f.guard_name()), &f.header()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
