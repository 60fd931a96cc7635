//! Model expressions
//!
//! A model expression combines compartments with `+`, `*` and `/`:
//!
//! ```text
//! expr   := term ('+' term)*
//! term   := factor (('*' | '/') factor)*
//! factor := '(' expr ')' | Name [ '(' Alias ')' ]
//! ```
//!
//! `Weight(w_ball)` refers to the compartment `Weight` under the alias
//! `w_ball`; without an alias a compartment is known by its own name.

use std::fmt;

use crate::error::ModelError;

/// Binary operator of a model expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Mul,
    Div,
}

impl Operator {
    pub fn symbol(&self) -> char {
        match self {
            Self::Add => '+',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }
}

/// Parsed model expression
#[derive(Debug, Clone, PartialEq)]
pub enum ModelExpression {
    /// A compartment reference
    Compartment { name: String, alias: String },
    /// Two sub-expressions joined by an operator
    Binary {
        op: Operator,
        left: Box<ModelExpression>,
        right: Box<ModelExpression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Open,
    Close,
    Op(Operator),
}

fn tokenize(expression: &str) -> Result<Vec<Token>, ModelError> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            '+' => {
                tokens.push(Token::Op(Operator::Add));
                chars.next();
            }
            '*' => {
                tokens.push(Token::Op(Operator::Mul));
                chars.next();
            }
            '/' => {
                tokens.push(Token::Op(Operator::Div));
                chars.next();
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            other => {
                return Err(ModelError::invalid_expr(
                    expression,
                    format!("unexpected character '{}' at position {}", other, pos),
                ))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ModelError {
        ModelError::invalid_expr(self.expression.trim(), message)
    }

    fn expr(&mut self) -> Result<ModelExpression, ModelError> {
        let mut left = self.term()?;
        while let Some(Token::Op(Operator::Add)) = self.peek() {
            self.next();
            let right = self.term()?;
            left = ModelExpression::Binary {
                op: Operator::Add,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<ModelExpression, ModelError> {
        let mut left = self.factor()?;
        while let Some(Token::Op(op @ (Operator::Mul | Operator::Div))) = self.peek() {
            let op = *op;
            self.next();
            let right = self.factor()?;
            left = ModelExpression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<ModelExpression, ModelError> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(Token::Name(name)) => {
                let alias = if let Some(Token::Open) = self.peek() {
                    self.next();
                    let alias = match self.next() {
                        Some(Token::Name(alias)) => alias,
                        _ => return Err(self.error(format!("expected an alias after '{}('", name))),
                    };
                    if self.next() != Some(Token::Close) {
                        return Err(self.error(format!("expected ')' after alias '{}'", alias)));
                    }
                    alias
                } else {
                    name.clone()
                };
                Ok(ModelExpression::Compartment { name, alias })
            }
            Some(token) => Err(self.error(format!("unexpected token {:?}", token))),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

impl ModelExpression {
    /// Parse a model expression
    pub fn parse(expression: &str) -> Result<Self, ModelError> {
        let mut parser = Parser {
            expression,
            tokens: tokenize(expression)?,
            pos: 0,
        };
        let parsed = parser.expr()?;
        if parser.pos < parser.tokens.len() {
            return Err(parser.error(format!(
                "unexpected trailing token {:?}",
                parser.tokens[parser.pos]
            )));
        }
        Ok(parsed)
    }

    /// The `(name, alias)` pairs of all compartments, left to right
    pub fn compartments(&self) -> Vec<(&str, &str)> {
        let mut found = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Compartment { name, alias } => found.push((name.as_str(), alias.as_str())),
                Self::Binary { left, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        found
    }

    /// Render the expression, replacing every compartment by `call(alias)`
    ///
    /// Binary nodes are parenthesized.
    pub fn render(&self, call: &mut impl FnMut(&str) -> String) -> String {
        match self {
            Self::Compartment { alias, .. } => call(alias),
            Self::Binary { op, left, right } => {
                let left = left.render(call);
                let right = right.render(call);
                format!("({} {} {})", left, op.symbol(), right)
            }
        }
    }
}

impl fmt::Display for ModelExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.render(&mut |alias: &str| alias.to_string());
        write!(f, "{}", rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_sum() {
        let expression = ModelExpression::parse(
            "S0 * ( (Weight(w_ball) * Ball) +\n (Weight(w_stick0) * Stick(Stick0)) )",
        )
        .unwrap();
        assert_eq!(
            expression.compartments(),
            vec![
                ("S0", "S0"),
                ("Weight", "w_ball"),
                ("Ball", "Ball"),
                ("Weight", "w_stick0"),
                ("Stick", "Stick0"),
            ]
        );
        assert_eq!(
            expression.to_string(),
            "(S0 * ((w_ball * Ball) + (w_stick0 * Stick0)))"
        );
    }

    #[test]
    fn test_precedence() {
        let expression = ModelExpression::parse("A + B * C / D").unwrap();
        match expression {
            ModelExpression::Binary {
                op: Operator::Add,
                right,
                ..
            } => assert!(matches!(*right, ModelExpression::Binary { op: Operator::Div, .. })),
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn test_invalid_expressions() {
        for invalid in ["", "S0 *", "(S0 * Ball", "S0 Ball", "Weight()", "S0 - Ball", "S0)"] {
            assert!(
                matches!(
                    ModelExpression::parse(invalid),
                    Err(ModelError::InvalidExpression { .. })
                ),
                "expected '{}' to be rejected",
                invalid
            );
        }
    }
}
