//! Reverse-polish evaluator shared by metric post-calculation and triggers.
//!
//! A program is a flat token list. Operator tokens pop two operands (the
//! second popped is the left-hand side) and push the result; every other
//! token is a float literal. Empty tokens are skipped.

use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RpnError {
    #[error("RPN: operator '{0}' needs two operands")]
    StackUnderflow(Operator),

    #[error("RPN: invalid token '{0}'")]
    InvalidToken(String),

    #[error("RPN: {0} values left on the stack")]
    Unbalanced(usize),
}

/// Binary operators, named after Python's `operator` module as used in
/// datasource files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    And,
    Or,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Self::Add),
            "sub" => Ok(Self::Sub),
            "mul" => Ok(Self::Mul),
            "div" | "truediv" => Ok(Self::Div),
            "floordiv" => Ok(Self::FloorDiv),
            "mod" => Ok(Self::Mod),
            "pow" => Ok(Self::Pow),
            "lt" => Ok(Self::Lt),
            "le" => Ok(Self::Le),
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "gt" => Ok(Self::Gt),
            "ge" => Ok(Self::Ge),
            "and" | "and_" => Ok(Self::And),
            "or" | "or_" => Ok(Self::Or),
            _ => Err(format!("unknown RPN operator: {s}")),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::FloorDiv => "floordiv",
            Self::Mod => "mod",
            Self::Pow => "pow",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::And => "and",
            Self::Or => "or",
        };
        f.write_str(s)
    }
}

fn truth(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}

impl Operator {
    /// Applies the operator as `x <op> y`. Division by zero yields an
    /// infinite or NaN value rather than an error.
    pub fn apply(self, x: f64, y: f64) -> f64 {
        match self {
            Self::Add => x + y,
            Self::Sub => x - y,
            Self::Mul => x * y,
            Self::Div => x / y,
            Self::FloorDiv => (x / y).floor(),
            Self::Mod => x - y * (x / y).floor(),
            Self::Pow => x.powf(y),
            Self::Lt => truth(x < y),
            Self::Le => truth(x <= y),
            Self::Eq => truth(x == y),
            Self::Ne => truth(x != y),
            Self::Gt => truth(x > y),
            Self::Ge => truth(x >= y),
            Self::And => truth(x != 0.0 && y != 0.0),
            Self::Or => truth(x != 0.0 || y != 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Empty,
    Number(f64),
    Op(Operator),
}

impl FromStr for Token {
    type Err = RpnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "None" {
            return Ok(Token::Empty);
        }
        if let Ok(op) = s.parse::<Operator>() {
            return Ok(Token::Op(op));
        }
        s.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| RpnError::InvalidToken(s.to_string()))
    }
}

impl From<f64> for Token {
    fn from(v: f64) -> Self {
        Token::Number(v)
    }
}

/// Parses a whole program, rejecting unknown tokens up front.
pub fn parse_program<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Token>, RpnError> {
    tokens.iter().map(|t| t.as_ref().parse()).collect()
}

/// Evaluates a token list. Returns `None` for an empty program.
///
/// # Examples
///
/// ```
/// use snmpboost_common::rpn::{evaluate, parse_program};
///
/// let program = parse_program(&["2", "3", "add", "4", "mul"]).unwrap();
/// assert_eq!(evaluate(&program).unwrap(), Some(20.0));
///
/// let program = parse_program(&["10", "3", "sub"]).unwrap();
/// assert_eq!(evaluate(&program).unwrap(), Some(7.0));
///
/// let program = parse_program(&["5", "3", "gt"]).unwrap();
/// assert_eq!(evaluate(&program).unwrap(), Some(1.0));
/// ```
pub fn evaluate(tokens: &[Token]) -> Result<Option<f64>, RpnError> {
    let mut stack: Vec<f64> = Vec::with_capacity(tokens.len());
    for token in tokens {
        match *token {
            Token::Empty => {}
            Token::Number(v) => stack.push(v),
            Token::Op(op) => {
                let y = stack.pop().ok_or(RpnError::StackUnderflow(op))?;
                let x = stack.pop().ok_or(RpnError::StackUnderflow(op))?;
                stack.push(op.apply(x, y));
            }
        }
    }
    if stack.len() > 1 {
        return Err(RpnError::Unbalanced(stack.len()));
    }
    Ok(stack.pop())
}

/// Evaluates `[value] ++ program`, the form used by metric post-calculation.
pub fn apply_calc(value: f64, program: &[Token]) -> Result<Option<f64>, RpnError> {
    let mut tokens = Vec::with_capacity(program.len() + 1);
    tokens.push(Token::Number(value));
    tokens.extend_from_slice(program);
    evaluate(&tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(tokens: &[&str]) -> Result<Option<f64>, RpnError> {
        evaluate(&parse_program(tokens)?)
    }

    #[test]
    fn second_popped_operand_is_left_hand_side() {
        assert_eq!(eval(&["10", "4", "div"]).unwrap(), Some(2.5));
        assert_eq!(eval(&["2", "10", "pow"]).unwrap(), Some(1024.0));
        assert_eq!(eval(&["3", "5", "lt"]).unwrap(), Some(1.0));
    }

    #[test]
    fn empty_tokens_are_skipped() {
        assert_eq!(eval(&["", "1", "None", "2", "add"]).unwrap(), Some(3.0));
        assert_eq!(eval(&[]).unwrap(), None);
    }

    #[test]
    fn leftover_operands_are_an_error() {
        assert_eq!(eval(&["1", "2"]), Err(RpnError::Unbalanced(2)));
    }

    #[test]
    fn missing_operand_is_an_error() {
        assert_eq!(eval(&["1", "add"]), Err(RpnError::StackUnderflow(Operator::Add)));
    }

    #[test]
    fn unknown_literal_is_rejected_at_parse_time() {
        assert_eq!(
            parse_program(&["1", "frobnicate"]),
            Err(RpnError::InvalidToken("frobnicate".into()))
        );
    }

    #[test]
    fn calc_prepends_value() {
        let program = parse_program(&["8", "mul"]).unwrap();
        assert_eq!(apply_calc(2.5, &program).unwrap(), Some(20.0));
    }

    #[test]
    fn python_aliases_are_accepted() {
        assert_eq!(eval(&["1", "0", "or_"]).unwrap(), Some(1.0));
        assert_eq!(eval(&["1", "0", "and_"]).unwrap(), Some(0.0));
        assert_eq!(eval(&["7", "2", "truediv"]).unwrap(), Some(3.5));
        assert_eq!(eval(&["7", "2", "floordiv"]).unwrap(), Some(3.0));
    }
}
