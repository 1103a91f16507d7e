//! Parser for composite function expressions such as
//!
//! ```text
//! ((((powerlaw{1} + (sin{2} * 3.0)) + (sin{2} * 25.0)) - (powerlaw{1} * 16.0)) + (sin{2} ** 3.0))
//! ```
//!
//! The grammar is fixed: `name{index}` leaves, numbers, parentheses and the
//! operators `+ - *- * / ** abs of`. Anything else is rejected before any
//! function is built, so expression text read from an untrusted model file can
//! only ever produce a composite of registered functions.

use crate::composite::{self, Operand, Operation, COMPOSITE_NAME};
use crate::error::{FunctionError, Result};
use crate::function::Function;
use crate::registry;
use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

/// Bounds applied to expression text before any function is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseLimits {
    /// Tallest accepted syntax tree. Parentheses and every applied operator,
    /// chained ones included, count one level.
    pub max_depth: usize,
    /// Longest accepted expression, in bytes.
    pub max_length: usize,
    /// Most operators in one expression.
    pub max_operators: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_length: 64 * 1024,
            max_operators: 1024,
        }
    }
}

/// Syntax tree of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// A `name{index}` leaf: every leaf with the same name and index denotes
    /// the same function instance.
    Function { name: String, index: u32 },
    Unary(Operation, Box<Expr>),
    Binary(Box<Expr>, Operation, Box<Expr>),
}

impl Expr {
    fn leaves<'a>(&'a self, found: &mut Vec<(&'a str, u32)>) {
        match self {
            Expr::Number(_) => {}
            Expr::Function { name, index } => {
                if !found.contains(&(name.as_str(), *index)) {
                    found.push((name.as_str(), *index));
                }
            }
            Expr::Unary(_, operand) => operand.leaves(found),
            Expr::Binary(left, _, right) => {
                left.leaves(found);
                right.leaves(found);
            }
        }
    }
}

/// Builds a live function from an expression, with the default limits.
pub fn parse_function_expression(input: &str) -> Result<Function> {
    parse_function_expression_with(input, &ParseLimits::default())
}

pub fn parse_function_expression_with(input: &str, limits: &ParseLimits) -> Result<Function> {
    let expr = parse_with(input, limits)?;

    let mut leaves = Vec::new();
    expr.leaves(&mut leaves);
    if leaves.is_empty() {
        return Err(FunctionError::design(format!(
            "no known function in function specification {input}"
        )));
    }

    let mut instances = IndexMap::new();
    for (name, index) in leaves {
        if name == COMPOSITE_NAME {
            return Err(FunctionError::design(format!(
                "{name}{{{index}}} in expression {input} does not name a primitive function"
            )));
        }
        let class = registry::get_function_class(name)?;
        instances.insert((name.to_string(), index), class.instantiate());
    }
    debug!(
        "parsed {input} into {} distinct function(s)",
        instances.len()
    );

    let builder = Builder { instances };
    match builder.build(&expr)? {
        Operand::Function(function) => Ok(function),
        Operand::Scalar(_) => Err(FunctionError::design(format!(
            "expression {input} does not describe a function"
        ))),
    }
}

/// Parses expression text into a syntax tree, with the default limits.
pub fn parse(input: &str) -> Result<Expr> {
    parse_with(input, &ParseLimits::default())
}

pub fn parse_with(input: &str, limits: &ParseLimits) -> Result<Expr> {
    if input.len() > limits.max_length {
        return Err(FunctionError::design(format!(
            "expression of {} bytes exceeds the limit of {}",
            input.len(),
            limits.max_length
        )));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        operators: 0,
        limits: *limits,
    };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        return Err(FunctionError::design(format!(
            "unexpected {token:?} after the end of the expression"
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Function { name: String, index: u32 },
    Plus,
    Minus,
    Star,
    Slash,
    DoubleStar,
    /// `*-`: unary negation.
    Negate,
    Abs,
    Of,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut number = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign = (d == '+' || d == '-') && number.ends_with(|ch| ch == 'e' || ch == 'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    number.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = number.parse().map_err(|_| {
                FunctionError::design(format!("malformed number {number} in expression"))
            })?;
            tokens.push(Token::Number(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            match ident.as_str() {
                "abs" => tokens.push(Token::Abs),
                "of" => tokens.push(Token::Of),
                _ => {
                    let index = function_index(&ident, &mut chars)?;
                    tokens.push(Token::Function { name: ident, index });
                }
            }
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => match chars.peek() {
                    Some('*') => {
                        chars.next();
                        Token::DoubleStar
                    }
                    Some('-') => {
                        chars.next();
                        Token::Negate
                    }
                    _ => Token::Star,
                },
                '/' => Token::Slash,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => {
                    return Err(FunctionError::design(format!(
                        "unexpected character {other:?} in expression"
                    )))
                }
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// Reads the `{index}` following a function name. A name without an index is
/// not part of the grammar.
fn function_index(
    name: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<u32> {
    let unrecognized = || {
        FunctionError::design(format!(
            "{name} is not a function token; expected {name}{{<index>}}"
        ))
    };
    if chars.next_if_eq(&'{').is_none() {
        return Err(unrecognized());
    }
    let mut digits = String::new();
    while let Some(d) = chars.next_if(char::is_ascii_digit) {
        digits.push(d);
    }
    if chars.next_if_eq(&'}').is_none() {
        return Err(unrecognized());
    }
    match digits.parse::<u32>() {
        Ok(index) if index > 0 => Ok(index),
        _ => Err(FunctionError::design(format!(
            "function token {name}{{{digits}}} needs a positive index"
        ))),
    }
}

/// Recursive descent, loosest binding first:
/// sums, products, prefix operators, `**` (right associative), `of`
/// (right associative), then leaves and parenthesized groups.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    operators: usize,
    limits: ParseLimits,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(FunctionError::design(format!(
                "expression is nested deeper than {} levels",
                self.limits.max_depth
            )));
        }
        Ok(())
    }

    /// Counts an applied operator; it also adds one level to the tree.
    fn apply_operator(&mut self) -> Result<()> {
        self.operators += 1;
        if self.operators > self.limits.max_operators {
            return Err(FunctionError::design(format!(
                "expression has more than {} operators",
                self.limits.max_operators
            )));
        }
        self.descend()
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor_op()?;
        let mut chained = 0;

        while let Some(token) = self.peek() {
            let operation = match token {
                Token::Plus => Operation::Add,
                Token::Minus => Operation::Subtract,
                _ => break,
            };
            self.consume();
            self.apply_operator()?;
            chained += 1;
            let right = self.parse_factor_op()?;
            left = Expr::Binary(Box::new(left), operation, Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_factor_op(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        let mut chained = 0;

        while let Some(token) = self.peek() {
            let (operation, negated) = match token {
                Token::Star => (Operation::Multiply, false),
                Token::Slash => (Operation::Divide, false),
                // `a *- b` reads as `a * (-b)`.
                Token::Negate => (Operation::Multiply, true),
                _ => break,
            };
            self.consume();
            self.apply_operator()?;
            chained += 1;
            let mut right = self.parse_unary()?;
            if negated {
                right = negate(right);
            }
            left = Expr::Binary(Box::new(left), operation, Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let operation = match self.peek() {
            Some(Token::Negate) => Some(Operation::Negate),
            Some(Token::Abs) => Some(Operation::Abs),
            Some(Token::Minus) => None,
            _ => return self.parse_power(),
        };
        self.consume();
        self.apply_operator()?;
        let operand = self.parse_unary()?;
        self.depth -= 1;
        Ok(match operation {
            Some(operation) => Expr::Unary(operation, Box::new(operand)),
            None => negate(operand),
        })
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_composition()?;
        if let Some(Token::DoubleStar) = self.peek() {
            self.consume();
            self.apply_operator()?;
            let exponent = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(Box::new(base), Operation::Power, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_composition(&mut self) -> Result<Expr> {
        let outer = self.parse_primary()?;
        if let Some(Token::Of) = self.peek() {
            self.consume();
            self.apply_operator()?;
            let inner = self.parse_composition()?;
            self.depth -= 1;
            return Ok(Expr::Binary(Box::new(outer), Operation::Compose, Box::new(inner)));
        }
        Ok(outer)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Function { name, index }) => Ok(Expr::Function { name, index }),
            Some(Token::LParen) => {
                self.descend()?;
                let expr = self.parse_expression()?;
                self.depth -= 1;
                if let Some(Token::RParen) = self.consume() {
                    Ok(expr)
                } else {
                    Err(FunctionError::design("expected ')' in expression"))
                }
            }
            Some(token) => Err(FunctionError::design(format!(
                "unexpected {token:?} in expression"
            ))),
            None => Err(FunctionError::design("unexpected end of expression")),
        }
    }
}

/// `-n` for a number literal, `(*- e)` otherwise.
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Number(n) => Expr::Number(-n),
        other => Expr::Unary(Operation::Negate, Box::new(other)),
    }
}

/// Turns a syntax tree into a function, through the same operations a caller
/// would use.
struct Builder {
    instances: IndexMap<(String, u32), Function>,
}

impl Builder {
    fn build(&self, expr: &Expr) -> Result<Operand> {
        match expr {
            Expr::Number(n) => Ok(Operand::Scalar(*n)),
            Expr::Function { name, index } => self
                .instances
                .get(&(name.clone(), *index))
                .cloned()
                .map(Operand::Function)
                .ok_or_else(|| FunctionError::design(format!("{name}{{{index}}} was not instantiated"))),
            Expr::Unary(operation, operand) => match self.build(operand)? {
                Operand::Function(function) => Ok(Operand::Function(composite::apply(
                    *operation, &function,
                )?)),
                Operand::Scalar(_) => Err(FunctionError::design(format!(
                    "{} needs a function operand",
                    operation.symbol()
                ))),
            },
            Expr::Binary(left, operation, right) => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                Ok(Operand::Function(composite::combine(*operation, left, right)?))
            }
        }
    }
}
