//! Pratt parser producing the evaluation tree.

use std::collections::HashSet;

use serde_json::Value;

use super::functions::Function;
use super::lexer::{Spanned, Token};
use crate::expression::{ExpressionError, Result};

/// Deepest expression nesting accepted at compile time. Operator chains count
/// one level per operator.
pub(super) const MAX_NESTING_DEPTH: usize = 64;

const CHAIN_BINDING_POWER: u8 = 40;
const BIND_BINDING_POWER: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub(super) enum Node {
    Literal(Value),
    /// Current context item.
    Context,
    /// Root input document (`$$`).
    Root,
    Field(String),
    /// A bound `$name`.
    Variable(String),
    /// A built-in referenced without calling it, e.g. the right side of `~>`.
    Builtin(Function),
    Path(Vec<Node>),
    Filter(Box<Node>, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Negate(Box<Node>),
    Condition(Box<Node>, Box<Node>, Option<Box<Node>>),
    Array(Vec<Node>),
    Object(Vec<(Node, Node)>),
    /// `(a; b; c)`: evaluates in a new scope, yields the last value.
    Block(Vec<Node>),
    /// `$name := value`
    Bind(String, Box<Node>),
    Lambda {
        params: Vec<String>,
        body: Box<Node>,
    },
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
        position: usize,
    },
}

pub(super) fn parse(tokens: Vec<Spanned>) -> Result<Node> {
    let mut parser = Parser {
        tokens,
        index: 0,
        depth: 0,
        bound: HashSet::new(),
    };
    let node = parser.expression(0)?;
    match parser.peek() {
        Token::End => {}
        other => {
            return Err(ExpressionError::compile(
                parser.position(),
                format!("unexpected {}", describe(other)),
            ))
        }
    }
    check_calls(&node)?;
    Ok(node)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    depth: usize,
    /// Every `$name` bound so far, by `:=` or as a lambda parameter.
    bound: HashSet<String>,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.index.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Spanned {
        let current = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        current
    }

    fn expect(&mut self, op: &'static str) -> Result<()> {
        match self.peek() {
            Token::Op(found) if *found == op => {
                self.advance();
                Ok(())
            }
            other => Err(ExpressionError::compile(
                self.position(),
                format!("expected '{}' but found {}", op, describe(other)),
            )),
        }
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Token::Op(found) if *found == op)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ExpressionError::compile(
                self.position(),
                format!("expression nested deeper than {} levels", MAX_NESTING_DEPTH),
            ));
        }
        Ok(())
    }

    fn expression(&mut self, rbp: u8) -> Result<Node> {
        self.enter()?;
        let mut levels = 1;
        let mut left = self.prefix()?;
        while rbp < infix_binding_power(self.peek()) {
            // Path steps are flattened and do not deepen the tree.
            if !self.at_op(".") {
                self.enter()?;
                levels += 1;
            }
            left = self.infix(left)?;
        }
        self.depth -= levels;
        Ok(left)
    }

    fn prefix(&mut self) -> Result<Node> {
        let Spanned { token, position } = self.advance();
        match token {
            Token::Number(n) => Ok(Node::Literal(number_literal(n))),
            Token::Str(s) => Ok(Node::Literal(Value::String(s))),
            Token::Name(name) if name == "function" && self.at_op("(") => self.lambda(),
            Token::Name(name) => Ok(match name.as_str() {
                "true" => Node::Literal(Value::Bool(true)),
                "false" => Node::Literal(Value::Bool(false)),
                "null" => Node::Literal(Value::Null),
                _ => Node::Field(name),
            }),
            Token::Variable(name) if name.is_empty() => Ok(Node::Context),
            Token::Variable(name) if name == "$" => Ok(Node::Root),
            Token::Variable(name) => self.variable(name, position),
            Token::Op("-") => Ok(Node::Negate(Box::new(self.expression(70)?))),
            Token::Op("(") => self.block(),
            Token::Op("[") => {
                let items = self.list("]")?;
                Ok(Node::Array(items))
            }
            Token::Op("{") => self.object(),
            other => Err(ExpressionError::compile(
                position,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn infix(&mut self, left: Node) -> Result<Node> {
        let Spanned { token, position } = self.advance();
        match token {
            Token::Op(".") => {
                let step = self.expression(75)?;
                Ok(match left {
                    Node::Path(mut steps) => {
                        steps.push(step);
                        Node::Path(steps)
                    }
                    other => Node::Path(vec![other, step]),
                })
            }
            Token::Op("[") => {
                if self.at_op("]") {
                    return Err(ExpressionError::compile(
                        self.position(),
                        "empty predicate is not supported",
                    ));
                }
                let predicate = self.expression(0)?;
                self.expect("]")?;
                Ok(Node::Filter(Box::new(left), Box::new(predicate)))
            }
            Token::Op("?") => {
                let then = self.expression(0)?;
                let otherwise = if self.at_op(":") {
                    self.advance();
                    Some(Box::new(self.expression(0)?))
                } else {
                    None
                };
                Ok(Node::Condition(Box::new(left), Box::new(then), otherwise))
            }
            Token::Op(":=") => {
                let Node::Variable(name) = left else {
                    return Err(ExpressionError::compile(
                        position,
                        "left side of ':=' must be a variable",
                    ));
                };
                let value = self.expression(BIND_BINDING_POWER - 1)?;
                Ok(Node::Bind(name, Box::new(value)))
            }
            Token::Op("~>") => self.chain(left, position),
            Token::Op("(") => Err(ExpressionError::compile(
                position,
                "only named functions can be invoked",
            )),
            ref other => {
                let op = binary_op(other).ok_or_else(|| {
                    ExpressionError::compile(position, format!("unexpected {}", describe(other)))
                })?;
                let right = self.expression(infix_binding_power(other))?;
                Ok(Node::Binary(op, Box::new(left), Box::new(right)))
            }
        }
    }

    fn variable(&mut self, name: String, position: usize) -> Result<Node> {
        if self.at_op(":=") {
            self.bound.insert(name.clone());
            return Ok(Node::Variable(name));
        }

        let callee = if self.bound.contains(&name) {
            Node::Variable(name)
        } else if let Some(function) = Function::lookup(&name) {
            Node::Builtin(function)
        } else if self.at_op("(") {
            return Err(ExpressionError::compile(
                position,
                format!("unknown function ${}", name),
            ));
        } else {
            return Err(ExpressionError::compile(
                position,
                format!("variable ${} is not bound", name),
            ));
        };

        if !self.at_op("(") {
            return Ok(callee);
        }
        self.advance();
        let args = self.list(")")?;
        Ok(Node::Call {
            callee: Box::new(callee),
            args,
            position,
        })
    }

    /// `value ~> $f(args)` is `$f(value, args)`.
    fn chain(&mut self, left: Node, position: usize) -> Result<Node> {
        match self.expression(CHAIN_BINDING_POWER)? {
            Node::Call {
                callee,
                mut args,
                position,
            } => {
                args.insert(0, left);
                Ok(Node::Call {
                    callee,
                    args,
                    position,
                })
            }
            callee @ (Node::Builtin(_) | Node::Variable(_) | Node::Lambda { .. }) => {
                Ok(Node::Call {
                    callee: Box::new(callee),
                    args: vec![left],
                    position,
                })
            }
            _ => Err(ExpressionError::compile(
                position,
                "right side of '~>' must be a function",
            )),
        }
    }

    /// `function($a, $b) { body }`
    fn lambda(&mut self) -> Result<Node> {
        self.expect("(")?;
        let mut params = Vec::new();
        if self.at_op(")") {
            self.advance();
        } else {
            loop {
                let Spanned { token, position } = self.advance();
                match token {
                    Token::Variable(name) if !name.is_empty() && name != "$" => {
                        self.bound.insert(name.clone());
                        params.push(name);
                    }
                    other => {
                        return Err(ExpressionError::compile(
                            position,
                            format!("expected a parameter but found {}", describe(&other)),
                        ))
                    }
                }
                if self.at_op(",") {
                    self.advance();
                    continue;
                }
                self.expect(")")?;
                break;
            }
        }

        self.expect("{")?;
        let body = self.expression(0)?;
        self.expect("}")?;
        Ok(Node::Lambda {
            params,
            body: Box::new(body),
        })
    }

    /// Parenthesised expression or `;`-separated block.
    fn block(&mut self) -> Result<Node> {
        let mut items = Vec::new();
        while !self.at_op(")") {
            items.push(self.expression(0)?);
            if !self.at_op(";") {
                break;
            }
            self.advance();
        }
        self.expect(")")?;

        if items.len() == 1 && !matches!(items[0], Node::Bind(..)) {
            return Ok(items.remove(0));
        }
        Ok(Node::Block(items))
    }

    fn list(&mut self, close: &'static str) -> Result<Vec<Node>> {
        let mut items = Vec::new();
        if self.at_op(close) {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.at_op(",") {
                self.advance();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn object(&mut self) -> Result<Node> {
        let mut entries = Vec::new();
        if self.at_op("}") {
            self.advance();
            return Ok(Node::Object(entries));
        }
        loop {
            let key = self.expression(0)?;
            self.expect(":")?;
            let value = self.expression(0)?;
            entries.push((key, value));
            if self.at_op(",") {
                self.advance();
                continue;
            }
            self.expect("}")?;
            return Ok(Node::Object(entries));
        }
    }
}

/// Built-in argument counts are checked once `~>` has supplied its operand.
fn check_calls(node: &Node) -> Result<()> {
    match node {
        Node::Call {
            callee,
            args,
            position,
        } => {
            if let Node::Builtin(function) = callee.as_ref() {
                check_arity(*function, args.len(), *position)?;
            }
            check_calls(callee)?;
            args.iter().try_for_each(check_calls)
        }
        Node::Path(items) | Node::Array(items) | Node::Block(items) => {
            items.iter().try_for_each(check_calls)
        }
        Node::Filter(a, b) | Node::Binary(_, a, b) => {
            check_calls(a)?;
            check_calls(b)
        }
        Node::Negate(inner) | Node::Bind(_, inner) | Node::Lambda { body: inner, .. } => {
            check_calls(inner)
        }
        Node::Condition(condition, then, otherwise) => {
            check_calls(condition)?;
            check_calls(then)?;
            otherwise.as_deref().map_or(Ok(()), check_calls)
        }
        Node::Object(entries) => entries.iter().try_for_each(|(key, value)| {
            check_calls(key)?;
            check_calls(value)
        }),
        Node::Literal(_)
        | Node::Context
        | Node::Root
        | Node::Field(_)
        | Node::Variable(_)
        | Node::Builtin(_) => Ok(()),
    }
}

fn check_arity(function: Function, count: usize, position: usize) -> Result<()> {
    let (min, max) = function.arity();
    if count >= min && count <= max {
        return Ok(());
    }
    Err(ExpressionError::compile(
        position,
        format!(
            "${} expects {} argument(s), got {}",
            function.name(),
            if min == max {
                min.to_string()
            } else {
                format!("{}-{}", min, max)
            },
            count
        ),
    ))
}

fn infix_binding_power(token: &Token) -> u8 {
    match token {
        Token::Op("[") | Token::Op("(") => 80,
        Token::Op(".") => 75,
        Token::Op("*") | Token::Op("/") | Token::Op("%") => 60,
        Token::Op("+") | Token::Op("-") | Token::Op("&") => 50,
        Token::Op("=")
        | Token::Op("!=")
        | Token::Op("<")
        | Token::Op("<=")
        | Token::Op(">")
        | Token::Op(">=") => 40,
        Token::Op("~>") => CHAIN_BINDING_POWER,
        Token::Name(name) if name == "and" => 30,
        Token::Name(name) if name == "or" => 25,
        Token::Op("?") => 20,
        Token::Op(":=") => BIND_BINDING_POWER,
        _ => 0,
    }
}

fn binary_op(token: &Token) -> Option<BinaryOp> {
    Some(match token {
        Token::Op("+") => BinaryOp::Add,
        Token::Op("-") => BinaryOp::Subtract,
        Token::Op("*") => BinaryOp::Multiply,
        Token::Op("/") => BinaryOp::Divide,
        Token::Op("%") => BinaryOp::Modulo,
        Token::Op("&") => BinaryOp::Concat,
        Token::Op("=") => BinaryOp::Equal,
        Token::Op("!=") => BinaryOp::NotEqual,
        Token::Op("<") => BinaryOp::Less,
        Token::Op("<=") => BinaryOp::LessEqual,
        Token::Op(">") => BinaryOp::Greater,
        Token::Op(">=") => BinaryOp::GreaterEqual,
        Token::Name(name) if name == "and" => BinaryOp::And,
        Token::Name(name) if name == "or" => BinaryOp::Or,
        _ => return None,
    })
}

fn number_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Str(s) => format!("string \"{}\"", s),
        Token::Name(n) => format!("name '{}'", n),
        Token::Variable(v) => format!("variable ${}", v),
        Token::Op(op) => format!("'{}'", op),
        Token::End => "end of expression".to_string(),
    }
}
