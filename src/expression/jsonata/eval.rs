//! Tree-walking evaluator.
//!
//! `None` models JSONata's `undefined`: missing fields propagate through
//! paths and arithmetic instead of failing.
//!
//! Variables live in scope frames. A block or lambda call gets a child frame
//! which is cleared when it ends; lambdas capture their defining frame, so
//! clearing is what releases them.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Value};

use super::functions::Function;
use super::parser::{BinaryOp, Node};
use crate::expression::{ExpressionError, Result};

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Deepest evaluation nesting, lambda calls included.
pub(super) const MAX_EVAL_DEPTH: usize = 160;

/// Evaluate a parsed expression against an input document.
pub(super) fn evaluate(node: &Node, input: &Value) -> Result<Option<Value>> {
    let evaluator = Evaluator {
        root: input,
        depth: Cell::new(0),
    };
    let frame = Frame::root();
    let result = evaluator.eval(node, Some(input), &frame);
    frame.clear();
    result
}

#[derive(Clone)]
enum Binding<'a> {
    Value(Option<Value>),
    Function(Callable<'a>),
}

#[derive(Clone)]
enum Callable<'a> {
    Builtin(Function),
    Lambda {
        params: &'a [String],
        body: &'a Node,
        scope: Rc<Frame<'a>>,
    },
}

struct Frame<'a> {
    parent: Option<Rc<Frame<'a>>>,
    bindings: RefCell<HashMap<String, Binding<'a>>>,
}

impl<'a> Frame<'a> {
    fn root() -> Rc<Self> {
        Rc::new(Self {
            parent: None,
            bindings: RefCell::new(HashMap::new()),
        })
    }

    fn child(parent: &Rc<Self>) -> Rc<Self> {
        Rc::new(Self {
            parent: Some(parent.clone()),
            bindings: RefCell::new(HashMap::new()),
        })
    }

    fn lookup(&self, name: &str) -> Option<Binding<'a>> {
        if let Some(binding) = self.bindings.borrow().get(name) {
            return Some(binding.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    fn bind(&self, name: &str, binding: Binding<'a>) {
        self.bindings.borrow_mut().insert(name.to_string(), binding);
    }

    fn clear(&self) {
        self.bindings.borrow_mut().clear();
    }
}

struct Evaluator<'a> {
    root: &'a Value,
    depth: Cell<usize>,
}

impl<'a> Evaluator<'a> {
    fn eval(
        &self,
        node: &'a Node,
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        let depth = self.depth.get() + 1;
        if depth > MAX_EVAL_DEPTH {
            return Err(ExpressionError::evaluate(format!(
                "evaluation nested deeper than {} levels",
                MAX_EVAL_DEPTH
            )));
        }
        self.depth.set(depth);
        let result = self.eval_node(node, context, scope);
        self.depth.set(depth - 1);
        result
    }

    fn eval_node(
        &self,
        node: &'a Node,
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        match node {
            Node::Literal(value) => Ok(Some(value.clone())),
            Node::Context => Ok(context.cloned()),
            Node::Root => Ok(Some(self.root.clone())),
            Node::Field(name) => Ok(context.and_then(|c| field(c, name))),
            Node::Variable(name) => Ok(match scope.lookup(name) {
                Some(Binding::Value(value)) => value,
                _ => None,
            }),
            Node::Builtin(_) | Node::Lambda { .. } => Ok(None),
            Node::Path(steps) => self.path(steps, context, scope),
            Node::Filter(base, predicate) => self.filter(base, predicate, context, scope),
            Node::Binary(op, left, right) => self.binary(*op, left, right, context, scope),
            Node::Negate(operand) => match self.eval(operand, context, scope)? {
                None => Ok(None),
                Some(Value::Number(n)) => number_value(-n.as_f64().unwrap_or_default()).map(Some),
                Some(_) => Err(ExpressionError::evaluate(
                    "cannot negate a non-numeric value",
                )),
            },
            Node::Condition(condition, then, otherwise) => {
                if truthy(self.eval(condition, context, scope)?.as_ref()) {
                    self.eval(then, context, scope)
                } else {
                    match otherwise {
                        Some(node) => self.eval(node, context, scope),
                        None => Ok(None),
                    }
                }
            }
            Node::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(value) = self.eval(item, context, scope)? {
                        values.push(value);
                    }
                }
                Ok(Some(Value::Array(values)))
            }
            Node::Object(entries) => self.object(entries, context, scope),
            Node::Block(items) => {
                let frame = Frame::child(scope);
                let result = self.sequence(items, context, &frame);
                frame.clear();
                result
            }
            Node::Bind(name, value) => match self.callable(value, scope) {
                Some(callable) => {
                    scope.bind(name, Binding::Function(callable));
                    Ok(None)
                }
                None => {
                    let value = self.eval(value, context, scope)?;
                    scope.bind(name, Binding::Value(value.clone()));
                    Ok(value)
                }
            },
            Node::Call { callee, args, .. } => {
                if let Node::Builtin(function) = callee.as_ref() {
                    if function.is_higher_order() {
                        return self.higher_order(*function, args, context, scope);
                    }
                }
                let callable = self
                    .callable(callee, scope)
                    .ok_or_else(|| ExpressionError::evaluate("attempted to invoke a non-function"))?;
                let args = self.arguments(args, context, scope)?;
                self.invoke(&callable, args, context)
            }
        }
    }

    fn sequence(
        &self,
        items: &'a [Node],
        context: Option<&Value>,
        frame: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        let mut last = None;
        for item in items {
            last = self.eval(item, context, frame)?;
        }
        Ok(last)
    }

    fn object(
        &self,
        entries: &'a [(Node, Node)],
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        let mut map = Map::new();
        for (key, value) in entries {
            let key = match self.eval(key, context, scope)? {
                Some(Value::String(s)) => s,
                _ => {
                    return Err(ExpressionError::evaluate(
                        "object key must evaluate to a string",
                    ))
                }
            };
            if let Some(value) = self.eval(value, context, scope)? {
                map.insert(key, value);
            }
        }
        Ok(Some(Value::Object(map)))
    }

    /// Resolve a node in function position.
    fn callable(&self, node: &'a Node, scope: &Rc<Frame<'a>>) -> Option<Callable<'a>> {
        match node {
            Node::Builtin(function) => Some(Callable::Builtin(*function)),
            Node::Lambda { params, body } => Some(Callable::Lambda {
                params,
                body,
                scope: scope.clone(),
            }),
            Node::Variable(name) => match scope.lookup(name) {
                Some(Binding::Function(callable)) => Some(callable),
                _ => None,
            },
            _ => None,
        }
    }

    fn arguments(
        &self,
        args: &'a [Node],
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Vec<Binding<'a>>> {
        args.iter()
            .map(|arg| match self.callable(arg, scope) {
                Some(callable) => Ok(Binding::Function(callable)),
                None => self.eval(arg, context, scope).map(Binding::Value),
            })
            .collect()
    }

    fn invoke(
        &self,
        callable: &Callable<'a>,
        args: Vec<Binding<'a>>,
        context: Option<&Value>,
    ) -> Result<Option<Value>> {
        match callable {
            Callable::Builtin(function) => function.apply(
                args.into_iter()
                    .map(|arg| match arg {
                        Binding::Value(value) => value,
                        Binding::Function(_) => None,
                    })
                    .collect(),
            ),
            Callable::Lambda {
                params,
                body,
                scope,
            } => {
                let frame = Frame::child(scope);
                let mut args = args.into_iter();
                for param in params.iter() {
                    frame.bind(param, args.next().unwrap_or(Binding::Value(None)));
                }
                let result = self.eval(*body, context, &frame);
                frame.clear();
                result
            }
        }
    }

    /// `$map`, `$filter` and `$reduce`.
    fn higher_order(
        &self,
        function: Function,
        args: &'a [Node],
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        let mut args = self.arguments(args, context, scope)?.into_iter();
        let input = match args.next() {
            Some(Binding::Value(value)) => value,
            _ => None,
        };
        let Some(Binding::Function(callback)) = args.next() else {
            return Err(ExpressionError::evaluate(format!(
                "${} expects a function as its second argument",
                function.name()
            )));
        };
        let initial = match args.next() {
            Some(Binding::Value(value)) => value,
            _ => None,
        };

        let items = match input {
            None => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
        };

        match function {
            Function::Map => {
                let mut results = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let args = callback_args(&callback, item, index, &items);
                    if let Some(value) = self.invoke(&callback, args, context)? {
                        results.push(value);
                    }
                }
                Ok(sequence(results))
            }
            Function::Filter => {
                let mut kept = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let args = callback_args(&callback, item, index, &items);
                    if truthy(self.invoke(&callback, args, context)?.as_ref()) {
                        kept.push(item.clone());
                    }
                }
                Ok(sequence(kept))
            }
            _ => {
                let mut remaining = items.iter().enumerate();
                let mut accumulator = match initial {
                    Some(value) => Some(value),
                    None => remaining.next().map(|(_, item)| item.clone()),
                };
                for (index, item) in remaining {
                    let args = vec![
                        Binding::Value(accumulator),
                        Binding::Value(Some(item.clone())),
                        Binding::Value(Some(Value::from(index))),
                    ];
                    accumulator = self.invoke(&callback, args, context)?;
                }
                Ok(accumulator)
            }
        }
    }

    fn path(
        &self,
        steps: &'a [Node],
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        let Some((first, rest)) = steps.split_first() else {
            return Ok(None);
        };

        let mut current = self.eval(first, context, scope)?;
        for step in rest {
            current = match current {
                None => return Ok(None),
                Some(Value::Array(items)) => {
                    let mut results = Vec::new();
                    for item in &items {
                        match self.eval(step, Some(item), scope)? {
                            Some(Value::Array(inner)) => results.extend(inner),
                            Some(other) => results.push(other),
                            None => {}
                        }
                    }
                    sequence(results)
                }
                Some(value) => self.eval(step, Some(&value), scope)?,
            };
        }
        Ok(current)
    }

    fn filter(
        &self,
        base: &'a Node,
        predicate: &'a Node,
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        let items = match self.eval(base, context, scope)? {
            None => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
        };
        let len = items.len() as i64;

        let mut selected = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let keep = match self.eval(predicate, Some(&item), scope)? {
                Some(Value::Number(n)) => {
                    let mut wanted = n.as_f64().unwrap_or_default().floor() as i64;
                    if wanted < 0 {
                        wanted = wanted.saturating_add(len);
                    }
                    wanted == index as i64
                }
                other => truthy(other.as_ref()),
            };
            if keep {
                selected.push(item);
            }
        }
        Ok(sequence(selected))
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: &'a Node,
        right: &'a Node,
        context: Option<&Value>,
        scope: &Rc<Frame<'a>>,
    ) -> Result<Option<Value>> {
        match op {
            BinaryOp::And => {
                let result = truthy(self.eval(left, context, scope)?.as_ref())
                    && truthy(self.eval(right, context, scope)?.as_ref());
                return Ok(Some(Value::Bool(result)));
            }
            BinaryOp::Or => {
                let result = truthy(self.eval(left, context, scope)?.as_ref())
                    || truthy(self.eval(right, context, scope)?.as_ref());
                return Ok(Some(Value::Bool(result)));
            }
            _ => {}
        }

        let lhs = self.eval(left, context, scope)?;
        let rhs = self.eval(right, context, scope)?;
        apply_binary(op, lhs, rhs)
    }
}

/// Lambdas receive `(value, index, array)`; built-ins just the value.
fn callback_args<'a>(
    callback: &Callable<'a>,
    item: &Value,
    index: usize,
    items: &[Value],
) -> Vec<Binding<'a>> {
    let mut args = vec![Binding::Value(Some(item.clone()))];
    if let Callable::Lambda { params, .. } = callback {
        if params.len() > 1 {
            args.push(Binding::Value(Some(Value::from(index))));
        }
        if params.len() > 2 {
            args.push(Binding::Value(Some(Value::Array(items.to_vec()))));
        }
    }
    args
}

fn apply_binary(op: BinaryOp, lhs: Option<Value>, rhs: Option<Value>) -> Result<Option<Value>> {
    match op {
        BinaryOp::Concat => {
            let mut text = lhs.as_ref().map(stringify).unwrap_or_default();
            text.push_str(&rhs.as_ref().map(stringify).unwrap_or_default());
            Ok(Some(Value::String(text)))
        }
        BinaryOp::Equal | BinaryOp::NotEqual => {
            let equal = match (&lhs, &rhs) {
                (Some(a), Some(b)) => values_equal(a, b),
                _ => return Ok(Some(Value::Bool(false))),
            };
            Ok(Some(Value::Bool(equal == (op == BinaryOp::Equal))))
        }
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let (Some(a), Some(b)) = (&lhs, &rhs) else {
                return Ok(Some(Value::Bool(false)));
            };
            let ordering = compare(a, b)?;
            let result = match op {
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::LessEqual => ordering != Ordering::Greater,
                BinaryOp::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Some(Value::Bool(result)))
        }
        _ => {
            let (Some(a), Some(b)) = (lhs, rhs) else {
                return Ok(None);
            };
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return Err(ExpressionError::evaluate(format!(
                    "arithmetic operands must be numbers, got {} and {}",
                    type_name(&a),
                    type_name(&b)
                )));
            };
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Subtract => x - y,
                BinaryOp::Multiply => x * y,
                BinaryOp::Divide => x / y,
                _ => x % y,
            };
            number_value(result).map(Some)
        }
    }
}

fn field(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(items) => {
            let mut results = Vec::new();
            for item in items {
                match field(item, name) {
                    Some(Value::Array(inner)) => results.extend(inner),
                    Some(other) => results.push(other),
                    None => {}
                }
            }
            sequence(results)
        }
        _ => None,
    }
}

fn compare(a: &Value, b: &Value) -> Result<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .ok_or_else(|| ExpressionError::evaluate("numbers are not comparable")),
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(ExpressionError::evaluate(format!(
            "cannot compare {} with {}",
            type_name(a),
            type_name(b)
        ))),
    }
}

pub(super) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Collapse a result sequence: empty is undefined, one item is unwrapped.
fn sequence(mut items: Vec<Value>) -> Option<Value> {
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => Some(Value::Array(items)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// JSONata boolean casting.
pub(super) fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => items.iter().any(|item| truthy(Some(item))),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

pub(super) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert an arithmetic result into a JSON number, keeping integral values integral.
pub(super) fn number_value(n: f64) -> Result<Value> {
    if !n.is_finite() {
        return Err(ExpressionError::evaluate(
            "number out of range (division by zero or overflow)",
        ));
    }
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Ok(Value::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::evaluate("number out of range"))
}
