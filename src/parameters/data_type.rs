//! Kernel data type declarations
//!
//! A [`DataType`] captures a parameter type as it appears in a kernel signature,
//! for example `global const mot_float_type* const`. The declaration is split in
//! its address space qualifier, the qualifiers in front of the type, the type
//! name itself and one optional qualifier after the type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// The floating point type used throughout generated kernels
pub const MOT_FLOAT_TYPE: &str = "mot_float_type";

const ADDRESS_SPACES: &[&str] = &[
    "global",
    "__global",
    "local",
    "__local",
    "constant",
    "__constant",
    "private",
    "__private",
];

const TYPE_QUALIFIERS: &[&str] = &["const", "volatile", "restrict"];

/// A kernel data type with its qualifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DataType {
    name: String,
    pre_qualifiers: Vec<String>,
    address_space: Option<String>,
    post_qualifier: Option<String>,
}

impl DataType {
    /// Create an unqualified data type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre_qualifiers: Vec::new(),
            address_space: None,
            post_qualifier: None,
        }
    }

    /// The scalar floating point type (`mot_float_type`)
    pub fn scalar() -> Self {
        Self::new(MOT_FLOAT_TYPE)
    }

    /// Add a qualifier in front of the type name
    pub fn with_pre_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.pre_qualifiers.push(qualifier.into());
        self
    }

    /// Set the address space qualifier
    pub fn with_address_space(mut self, address_space: impl Into<String>) -> Self {
        self.address_space = Some(address_space.into());
        self
    }

    /// Set the qualifier following the type name
    pub fn with_post_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.post_qualifier = Some(qualifier.into());
        self
    }

    /// The bare type name, e.g. `mot_float_type4` or `mot_float_type*`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pre_qualifiers(&self) -> &[String] {
        &self.pre_qualifiers
    }

    pub fn address_space(&self) -> Option<&str> {
        self.address_space.as_deref()
    }

    pub fn post_qualifier(&self) -> Option<&str> {
        self.post_qualifier.as_deref()
    }

    /// Check if this is a pointer type
    pub fn is_pointer(&self) -> bool {
        self.name.ends_with('*')
    }

    /// Check if this is a vector type (e.g. `mot_float_type4`)
    pub fn is_vector(&self) -> bool {
        !self.is_pointer()
            && self
                .name
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_digit())
    }

    /// Render the type followed by a variable name
    ///
    /// Ordering: address space, pre-type qualifiers (declaration order), type,
    /// post-type qualifier, name.
    pub fn declare(&self, variable: &str) -> String {
        format!("{} {}", self, variable)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<&str> = Vec::with_capacity(self.pre_qualifiers.len() + 3);
        if let Some(space) = &self.address_space {
            parts.push(space);
        }
        parts.extend(self.pre_qualifiers.iter().map(|q| q.as_str()));
        parts.push(&self.name);
        if let Some(post) = &self.post_qualifier {
            parts.push(post);
        }
        write!(f, "{}", parts.join(" "))
    }
}

impl FromStr for DataType {
    type Err = ModelError;

    fn from_str(declaration: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidDataType(declaration.to_string());

        let mut tokens = declaration.split_whitespace().peekable();
        let mut address_space = None;
        let mut pre_qualifiers = Vec::new();

        while let Some(token) = tokens.peek() {
            if ADDRESS_SPACES.contains(token) {
                if address_space.is_some() || !pre_qualifiers.is_empty() {
                    return Err(invalid());
                }
                address_space = Some(token.to_string());
            } else if TYPE_QUALIFIERS.contains(token) {
                pre_qualifiers.push(token.to_string());
            } else {
                break;
            }
            tokens.next();
        }

        let name = tokens.next().ok_or_else(invalid)?;
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '*')
        {
            return Err(invalid());
        }

        let rest: Vec<&str> = tokens.collect();
        let post_qualifier = if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        };

        Ok(Self {
            name: name.to_string(),
            pre_qualifiers,
            address_space,
            post_qualifier,
        })
    }
}

impl TryFrom<String> for DataType {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

impl Default for DataType {
    fn default() -> Self {
        Self::scalar()
    }
}
