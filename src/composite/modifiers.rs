//! Post-optimization modifiers
//!
//! A modifier derives one new map from the results of a fit. Declarative
//! modifiers are small arithmetic expressions over result keys, for example
//! `1 - w_ball.w`; modifiers built in code can be arbitrary functions.

use std::fmt;
use std::sync::Arc;

use ndarray::{Array1, ArrayD};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::results::{num_voxels, ResultMaps};

/// Function computing a derived map from the current results
#[derive(Clone)]
pub struct ModifierFn(Arc<dyn Fn(&ResultMaps) -> Result<ArrayD<f64>, ModelError> + Send + Sync>);

impl ModifierFn {
    pub fn new(
        function: impl Fn(&ResultMaps) -> Result<ArrayD<f64>, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(function))
    }

    pub fn call(&self, results: &ResultMaps) -> Result<ArrayD<f64>, ModelError> {
        (self.0)(results)
    }
}

impl fmt::Debug for ModifierFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModifierFn")
    }
}

/// How a modifier computes its map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModifierAction {
    /// Arithmetic over result keys and numbers
    Expression(String),
    #[serde(skip)]
    Function(ModifierFn),
}

/// A named derived map
///
/// ```json
/// { "name": "FS", "expression": "1 - w_ball.w" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostOptimizationModifier {
    pub name: String,
    #[serde(rename = "expression")]
    pub action: ModifierAction,
}

impl PostOptimizationModifier {
    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: ModifierAction::Expression(expression.into()),
        }
    }

    pub fn function(
        name: impl Into<String>,
        function: impl Fn(&ResultMaps) -> Result<ArrayD<f64>, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action: ModifierAction::Function(ModifierFn::new(function)),
        }
    }

    /// Check that a declarative expression parses
    pub fn validate(&self) -> Result<(), ModelError> {
        if let ModifierAction::Expression(expression) = &self.action {
            MapExpression::parse(expression)?;
        }
        Ok(())
    }

    /// Compute the derived map
    pub fn apply(&self, results: &ResultMaps) -> Result<ArrayD<f64>, ModelError> {
        match &self.action {
            ModifierAction::Expression(expression) => {
                MapExpression::parse(expression)?.evaluate(results)
            }
            ModifierAction::Function(function) => function.call(results),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arithmetic over result maps
// ─────────────────────────────────────────────────────────────────────────────

/// Operator of a [`MapExpression`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }
}

/// Arithmetic expression over result keys
#[derive(Debug, Clone, PartialEq)]
pub enum MapExpression {
    Number(f64),
    Map(String),
    Neg(Box<MapExpression>),
    Binary(ArithOp, Box<MapExpression>, Box<MapExpression>),
}

#[derive(Debug, Clone, PartialEq)]
enum MapToken {
    Number(f64),
    Key(String),
    Op(ArithOp),
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<MapToken>, ModelError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(MapToken::Open);
                i += 1;
            }
            ')' => {
                tokens.push(MapToken::Close);
                i += 1;
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(MapToken::Op(match c {
                    '+' => ArithOp::Add,
                    '-' => ArithOp::Sub,
                    '*' => ArithOp::Mul,
                    _ => ArithOp::Div,
                }));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i];
                    let exponent_sign =
                        (c == '+' || c == '-') && matches!(chars[i - 1], 'e' | 'E');
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    ModelError::invalid_expr(expression, format!("invalid number '{}'", literal))
                })?;
                tokens.push(MapToken::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.')) {
                    i += 1;
                }
                tokens.push(MapToken::Key(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ModelError::invalid_expr(
                    expression,
                    format!("unexpected character '{}'", other),
                ))
            }
        }
    }
    Ok(tokens)
}

struct MapParser<'a> {
    expression: &'a str,
    tokens: Vec<MapToken>,
    pos: usize,
}

impl MapParser<'_> {
    fn peek_op(&self, ops: &[ArithOp]) -> Option<ArithOp> {
        match self.tokens.get(self.pos) {
            Some(MapToken::Op(op)) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn sum(&mut self) -> Result<MapExpression, ModelError> {
        let mut left = self.product()?;
        while let Some(op) = self.peek_op(&[ArithOp::Add, ArithOp::Sub]) {
            self.pos += 1;
            let right = self.product()?;
            left = MapExpression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<MapExpression, ModelError> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek_op(&[ArithOp::Mul, ArithOp::Div]) {
            self.pos += 1;
            let right = self.unary()?;
            left = MapExpression::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<MapExpression, ModelError> {
        if self.peek_op(&[ArithOp::Sub]).is_some() {
            self.pos += 1;
            return Ok(MapExpression::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<MapExpression, ModelError> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        match token {
            Some(MapToken::Number(value)) => Ok(MapExpression::Number(value)),
            Some(MapToken::Key(key)) => Ok(MapExpression::Map(key)),
            Some(MapToken::Open) => {
                let inner = self.sum()?;
                match self.tokens.get(self.pos) {
                    Some(MapToken::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(ModelError::invalid_expr(self.expression, "missing ')'")),
                }
            }
            Some(other) => Err(ModelError::invalid_expr(
                self.expression,
                format!("unexpected token {:?}", other),
            )),
            None => Err(ModelError::invalid_expr(self.expression, "unexpected end")),
        }
    }
}

enum Value {
    Scalar(f64),
    Array(ArrayD<f64>),
}

impl MapExpression {
    pub fn parse(expression: &str) -> Result<Self, ModelError> {
        let mut parser = MapParser {
            expression,
            tokens: tokenize(expression)?,
            pos: 0,
        };
        let parsed = parser.sum()?;
        if parser.pos < parser.tokens.len() {
            return Err(ModelError::invalid_expr(expression, "unexpected trailing input"));
        }
        Ok(parsed)
    }

    /// Result keys referenced by this expression
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Number(_) => Vec::new(),
            Self::Map(key) => vec![key.as_str()],
            Self::Neg(inner) => inner.keys(),
            Self::Binary(_, left, right) => {
                let mut keys = left.keys();
                keys.extend(right.keys());
                keys
            }
        }
    }

    /// Evaluate element-wise over the result maps
    ///
    /// A constant expression yields one value per voxel.
    pub fn evaluate(&self, results: &ResultMaps) -> Result<ArrayD<f64>, ModelError> {
        match self.value(results)? {
            Value::Array(array) => Ok(array),
            Value::Scalar(value) => {
                let n = num_voxels(results).unwrap_or(1);
                Ok(Array1::from_elem(n, value).into_dyn())
            }
        }
    }

    fn value(&self, results: &ResultMaps) -> Result<Value, ModelError> {
        Ok(match self {
            Self::Number(value) => Value::Scalar(*value),
            Self::Map(key) => Value::Array(
                results
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ModelError::missing_key(key, "post-optimization modifier"))?,
            ),
            Self::Neg(inner) => match inner.value(results)? {
                Value::Scalar(v) => Value::Scalar(-v),
                Value::Array(a) => Value::Array(a.mapv(|v| -v)),
            },
            Self::Binary(op, left, right) => {
                match (left.value(results)?, right.value(results)?) {
                    (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(op.apply(a, b)),
                    (Value::Array(a), Value::Scalar(b)) => Value::Array(a.mapv(|v| op.apply(v, b))),
                    (Value::Scalar(a), Value::Array(b)) => Value::Array(b.mapv(|v| op.apply(a, v))),
                    (Value::Array(mut a), Value::Array(b)) => {
                        if a.shape() != b.shape() {
                            return Err(ModelError::InvalidMap {
                                name: format!("{:?}", self.keys()),
                                message: format!(
                                    "cannot combine maps of shape {:?} and {:?}",
                                    a.shape(),
                                    b.shape()
                                ),
                            });
                        }
                        a.zip_mut_with(&b, |x, &y| *x = op.apply(*x, y));
                        Value::Array(a)
                    }
                }
            }
        })
    }
}
