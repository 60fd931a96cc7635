//! Cascade models
//!
//! A cascade runs its models one after another. Before a model runs, it is
//! prepared with the results of the model that ran before it and the results
//! of all earlier models: free parameters are initialized from same-named
//! result maps of the previous model, after which the inits and fixes declared
//! for that model are applied.
//!
//! The cascade is a small state machine over a cursor:
//!
//! | cursor      | state       | `has_next` |
//! |-------------|-------------|------------|
//! | `0`         | not started | `N > 0`    |
//! | `0 < c < N` | in progress | `true`     |
//! | `N`         | complete    | `false`    |
//!
//! Only [`CascadeModel::get_next`] advances the cursor and only
//! [`CascadeModel::reset`] moves it back to zero.

mod template;

pub use template::{CascadeAssignments, CascadeMember, CascadeTemplate, CascadeValue, ComputedValue};

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::ArrayD;

use crate::composite::CompositeModel;
use crate::error::ModelError;
use crate::protocol::{ProblemData, Protocol, ProtocolProblem};
use crate::results::{ModelResults, ResultMaps};

/// A member of a cascade
#[derive(Debug, Clone)]
pub enum CascadeEntry {
    Leaf(CompositeModel),
    Nested(CascadeModel),
}

impl CascadeEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Leaf(model) => model.name(),
            Self::Nested(cascade) => cascade.name(),
        }
    }

    pub fn required_protocol_names(&self) -> Vec<String> {
        match self {
            Self::Leaf(model) => model.required_protocol_names(),
            Self::Nested(cascade) => cascade.required_protocol_names(),
        }
    }

    pub fn protocol_problems(&self, protocol: Option<&Protocol>) -> Vec<ProtocolProblem> {
        match self {
            Self::Leaf(model) => model.protocol_problems(protocol),
            Self::Nested(cascade) => cascade.protocol_problems(protocol),
        }
    }

    pub fn is_protocol_sufficient(&self, protocol: Option<&Protocol>) -> bool {
        self.protocol_problems(protocol).is_empty()
    }

    pub fn set_problem_data(&mut self, problem_data: Arc<ProblemData>) {
        match self {
            Self::Leaf(model) => model.set_problem_data(problem_data),
            Self::Nested(cascade) => cascade.set_problem_data(problem_data),
        }
    }

    pub fn set_gradient_deviations(&mut self, gradient_deviations: Option<Arc<ArrayD<f64>>>) {
        match self {
            Self::Leaf(model) => model.set_gradient_deviations(gradient_deviations),
            Self::Nested(cascade) => cascade.set_gradient_deviations(gradient_deviations),
        }
    }

    pub fn set_double_precision(&mut self, double_precision: bool) {
        match self {
            Self::Leaf(model) => model.set_double_precision(double_precision),
            Self::Nested(cascade) => cascade.set_double_precision(double_precision),
        }
    }
}

/// Position of a cascade in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeState {
    NotStarted,
    InProgress,
    Complete,
}

/// A sequence of models fitted one after another
#[derive(Debug, Clone)]
pub struct CascadeModel {
    name: String,
    description: String,
    entries: Vec<CascadeEntry>,
    cursor: usize,
    inits: CascadeAssignments,
    fixes: CascadeAssignments,
    double_precision: bool,
}

impl CascadeModel {
    pub fn new(name: impl Into<String>, entries: Vec<CascadeEntry>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            entries,
            cursor: 0,
            inits: BTreeMap::new(),
            fixes: BTreeMap::new(),
            double_precision: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare inits per member name, applied when that member becomes next
    pub fn with_inits(mut self, inits: CascadeAssignments) -> Self {
        self.inits = inits;
        self
    }

    /// Declare fixes per member name, applied when that member becomes next
    pub fn with_fixes(mut self, fixes: CascadeAssignments) -> Self {
        self.fixes = fixes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename, used when the cascade is a renamed member of another cascade
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CascadeEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn state(&self) -> CascadeState {
        if self.cursor == self.entries.len() {
            CascadeState::Complete
        } else if self.cursor == 0 {
            CascadeState::NotStarted
        } else {
            CascadeState::InProgress
        }
    }

    pub fn has_next(&self) -> bool {
        self.cursor != self.entries.len()
    }

    /// Move the cursor back to the first model
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// The next model, prepared with the results of the models before it
    ///
    /// `previous_results` holds the results of every model that already ran,
    /// keyed by model name. For every model but the first, the result map of
    /// the model directly before it must be present. The first model is
    /// prepared against an empty result map, so only literal and computed
    /// inits and fixes apply to it.
    ///
    /// Calling this on a complete cascade is a contract violation: it returns
    /// [`ModelError::CascadeExhausted`]. Check [`CascadeModel::has_next`] first.
    pub fn get_next(
        &mut self,
        previous_results: &ModelResults,
    ) -> Result<&mut CascadeEntry, ModelError> {
        if !self.has_next() {
            return Err(ModelError::CascadeExhausted(self.name.clone()));
        }

        let position = self.cursor;
        let first = ResultMaps::new();
        let previous = match position {
            0 => &first,
            _ => {
                let previous_name = self.entries[position - 1].name().to_string();
                previous_results
                    .get(&previous_name)
                    .ok_or(ModelError::MissingResults(previous_name))?
            }
        };
        self.prepare_entry(position, previous, previous_results)?;

        self.cursor += 1;
        tracing::debug!(
            "Cascade '{}': model {}/{} is '{}'",
            self.name,
            self.cursor,
            self.entries.len(),
            self.entries[position].name()
        );
        Ok(&mut self.entries[position])
    }

    fn prepare_entry(
        &mut self,
        position: usize,
        previous: &ResultMaps,
        history: &ModelResults,
    ) -> Result<(), ModelError> {
        let inits = &self.inits;
        let fixes = &self.fixes;
        match &mut self.entries[position] {
            CascadeEntry::Leaf(model) => {
                model.init_from_results(previous)?;
                if let Some(values) = inits.get(model.name()) {
                    for (parameter, value) in values {
                        let value = value.resolve(previous, history)?;
                        model.init(parameter, value)?;
                    }
                }
                if let Some(values) = fixes.get(model.name()) {
                    for (parameter, value) in values {
                        let value = value.resolve(previous, history)?;
                        model.fix(parameter, value)?;
                    }
                }
            }
            CascadeEntry::Nested(cascade) => {
                if inits.contains_key(cascade.name()) || fixes.contains_key(cascade.name()) {
                    tracing::warn!(
                        "Cascade '{}': inits and fixes for nested cascade '{}' are ignored",
                        self.name,
                        cascade.name()
                    );
                }
            }
        }
        Ok(())
    }

    /// The member with the given name
    pub fn get_model(&self, name: &str) -> Option<&CascadeEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn get_model_mut(&mut self, name: &str) -> Option<&mut CascadeEntry> {
        self.entries.iter_mut().find(|e| e.name() == name)
    }

    /// Member names in execution order
    pub fn get_model_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    /// Union of the protocol names of all members, first occurrence order
    pub fn required_protocol_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for entry in &self.entries {
            for name in entry.required_protocol_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Union of the protocol problems of all members
    pub fn protocol_problems(&self, protocol: Option<&Protocol>) -> Vec<ProtocolProblem> {
        let mut problems: Vec<ProtocolProblem> = Vec::new();
        for entry in &self.entries {
            for problem in entry.protocol_problems(protocol) {
                if !problems.contains(&problem) {
                    problems.push(problem);
                }
            }
        }
        problems
    }

    /// Whether every member can be fitted with the protocol
    pub fn is_protocol_sufficient(&self, protocol: Option<&Protocol>) -> bool {
        self.entries
            .iter()
            .all(|e| e.is_protocol_sufficient(protocol))
    }

    pub fn set_problem_data(&mut self, problem_data: Arc<ProblemData>) {
        for entry in &mut self.entries {
            entry.set_problem_data(problem_data.clone());
        }
    }

    pub fn set_gradient_deviations(&mut self, gradient_deviations: Option<Arc<ArrayD<f64>>>) {
        for entry in &mut self.entries {
            entry.set_gradient_deviations(gradient_deviations.clone());
        }
    }

    pub fn set_double_precision(&mut self, double_precision: bool) {
        self.double_precision = double_precision;
        for entry in &mut self.entries {
            entry.set_double_precision(double_precision);
        }
    }

    pub fn double_precision(&self) -> bool {
        self.double_precision
    }
}
