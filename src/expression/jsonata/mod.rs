//! JSONata expression engine (subset).
//!
//! Supports the constructs used by per-topic reshaping transforms:
//!
//! - Context and root: `$`, `$$`
//! - Paths over objects and arrays: `order.items.price`, `` `field name` ``
//! - Predicates and indexes: `items[price > 10]`, `items[0]`, `items[-1]`
//! - Arithmetic `+ - * / %`, concatenation `&`, comparisons, `and` / `or`
//! - Conditionals `cond ? a : b`
//! - Object and array constructors: `{"total": $sum(items.price)}`, `[a, b]`
//! - Variables and blocks: `($rate := 2; amount * $rate)`
//! - Lambdas: `function($v) { $v * 2 }`, passed to `$map`/`$filter`/`$reduce`
//!   or bound and invoked
//! - Function chaining: `name ~> $trim() ~> $uppercase()`
//! - Built-ins: `$string $number $boolean $not $exists $count $sum $max $min
//!   $average $length $uppercase $lowercase $substring $join $keys $round
//!   $abs $floor $ceil $trim $contains $split $replace $merge $append
//!   $reverse $distinct $now $map $filter $reduce`
//!
//! Regular expressions and the date/time formatting functions are not
//! supported. Unknown functions fail at compile time. Nesting is bounded at
//! compile time and at evaluation time, so a pathological expression fails
//! with an error instead of exhausting the stack.

use std::sync::Arc;

use serde_json::Value;

use super::{CompiledExpression, ExpressionEngine, Result};

mod eval;
mod functions;
mod lexer;
mod parser;

/// Compiles JSONata text into reusable expressions.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonataEngine;

impl JsonataEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compile without erasing the concrete type.
    pub fn compile_expression(&self, source: &str) -> Result<JsonataExpression> {
        let tokens = lexer::tokenize(source)?;
        let root = parser::parse(tokens)?;
        Ok(JsonataExpression {
            source: source.to_string(),
            root,
        })
    }
}

impl ExpressionEngine for JsonataEngine {
    fn name(&self) -> &'static str {
        "jsonata"
    }

    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>> {
        Ok(Arc::new(self.compile_expression(source)?))
    }
}

/// A parsed JSONata expression.
#[derive(Debug, Clone)]
pub struct JsonataExpression {
    source: String,
    root: parser::Node,
}

impl JsonataExpression {
    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl CompiledExpression for JsonataExpression {
    fn evaluate(&self, input: &Value) -> Result<Value> {
        let result = eval::evaluate(&self.root, input)?;
        Ok(result.unwrap_or(Value::Null))
    }
}
