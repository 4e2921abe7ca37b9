//! Built-in function library.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::eval::{number_value, stringify, truthy, values_equal};
use crate::expression::{ExpressionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Function {
    String,
    Number,
    Boolean,
    Not,
    Exists,
    Count,
    Sum,
    Max,
    Min,
    Average,
    Length,
    Uppercase,
    Lowercase,
    Substring,
    Join,
    Keys,
    Round,
    Abs,
    Floor,
    Ceil,
    Trim,
    Contains,
    Split,
    Replace,
    Merge,
    Append,
    Reverse,
    Distinct,
    Now,
    Map,
    Filter,
    Reduce,
}

impl Function {
    pub(super) fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "string" => Self::String,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            "not" => Self::Not,
            "exists" => Self::Exists,
            "count" => Self::Count,
            "sum" => Self::Sum,
            "max" => Self::Max,
            "min" => Self::Min,
            "average" => Self::Average,
            "length" => Self::Length,
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "substring" => Self::Substring,
            "join" => Self::Join,
            "keys" => Self::Keys,
            "round" => Self::Round,
            "abs" => Self::Abs,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "trim" => Self::Trim,
            "contains" => Self::Contains,
            "split" => Self::Split,
            "replace" => Self::Replace,
            "merge" => Self::Merge,
            "append" => Self::Append,
            "reverse" => Self::Reverse,
            "distinct" => Self::Distinct,
            "now" => Self::Now,
            "map" => Self::Map,
            "filter" => Self::Filter,
            "reduce" => Self::Reduce,
            _ => return None,
        })
    }

    /// Inclusive (min, max) argument count.
    pub(super) fn arity(self) -> (usize, usize) {
        match self {
            Self::Substring | Self::Split | Self::Reduce => (2, 3),
            Self::Join | Self::Round => (1, 2),
            Self::Replace => (3, 4),
            Self::Contains | Self::Append | Self::Map | Self::Filter => (2, 2),
            Self::Now => (0, 0),
            _ => (1, 1),
        }
    }

    /// Takes a function argument; evaluated by the evaluator, not [`Self::apply`].
    pub(super) fn is_higher_order(self) -> bool {
        matches!(self, Self::Map | Self::Filter | Self::Reduce)
    }

    pub(super) fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Not => "not",
            Self::Exists => "exists",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Average => "average",
            Self::Length => "length",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Substring => "substring",
            Self::Join => "join",
            Self::Keys => "keys",
            Self::Round => "round",
            Self::Abs => "abs",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Trim => "trim",
            Self::Contains => "contains",
            Self::Split => "split",
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Append => "append",
            Self::Reverse => "reverse",
            Self::Distinct => "distinct",
            Self::Now => "now",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Reduce => "reduce",
        }
    }

    pub(super) fn apply(self, args: Vec<Option<Value>>) -> Result<Option<Value>> {
        let mut args = args.into_iter();
        let first = args.next().flatten();
        let second = args.next().flatten();
        let third = args.next().flatten();
        let fourth = args.next().flatten();

        match self {
            Self::String => Ok(first.map(|v| Value::String(stringify(&v)))),
            Self::Number => first.map(|v| self.to_number(v)).transpose(),
            Self::Boolean => Ok(first.map(|v| Value::Bool(truthy(Some(&v))))),
            Self::Not => Ok(first.map(|v| Value::Bool(!truthy(Some(&v))))),
            Self::Exists => Ok(Some(Value::Bool(first.is_some()))),
            Self::Count => Ok(Some(Value::from(match first {
                None => 0,
                Some(Value::Array(items)) => items.len(),
                Some(_) => 1,
            }))),
            Self::Sum => match first {
                None => Ok(None),
                Some(v) => {
                    let numbers = self.numbers(v)?;
                    number_value(numbers.iter().sum()).map(Some)
                }
            },
            Self::Max | Self::Min | Self::Average => {
                let Some(v) = first else { return Ok(None) };
                let numbers = self.numbers(v)?;
                if numbers.is_empty() {
                    return Ok(None);
                }
                let result = match self {
                    Self::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    Self::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                    _ => numbers.iter().sum::<f64>() / numbers.len() as f64,
                };
                number_value(result).map(Some)
            }
            Self::Length => match first {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(Value::from(s.chars().count()))),
                Some(_) => Err(self.type_error("a string")),
            },
            Self::Uppercase | Self::Lowercase => match first {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(Value::String(if self == Self::Uppercase {
                    s.to_uppercase()
                } else {
                    s.to_lowercase()
                }))),
                Some(_) => Err(self.type_error("a string")),
            },
            Self::Substring => {
                let Some(value) = first else { return Ok(None) };
                let Value::String(text) = value else {
                    return Err(self.type_error("a string"));
                };
                let start = self.integer(second)?;
                let length = third.map(|v| self.integer(Some(v))).transpose()?;
                Ok(Some(Value::String(substring(&text, start, length))))
            }
            Self::Join => {
                let Some(value) = first else { return Ok(None) };
                let separator = match second {
                    None => String::new(),
                    Some(Value::String(s)) => s,
                    Some(_) => return Err(self.type_error("a string separator")),
                };
                let parts = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                let strings = parts
                    .into_iter()
                    .map(|part| match part {
                        Value::String(s) => Ok(s),
                        _ => Err(self.type_error("an array of strings")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Value::String(strings.join(&separator))))
            }
            Self::Keys => Ok(match first {
                Some(Value::Object(map)) => keys_of(&map),
                Some(Value::Array(items)) => {
                    let mut merged = Map::new();
                    for item in items {
                        if let Value::Object(map) = item {
                            merged.extend(map);
                        }
                    }
                    keys_of(&merged)
                }
                _ => None,
            }),
            Self::Round => {
                let Some(value) = first else { return Ok(None) };
                let n = value.as_f64().ok_or_else(|| self.type_error("a number"))?;
                let precision = second
                    .map(|v| self.integer(Some(v)))
                    .transpose()?
                    .unwrap_or(0);
                let factor = 10f64.powi(precision as i32);
                number_value((n * factor).round_ties_even() / factor).map(Some)
            }
            Self::Abs | Self::Floor | Self::Ceil => {
                let Some(value) = first else { return Ok(None) };
                let n = value.as_f64().ok_or_else(|| self.type_error("a number"))?;
                let result = match self {
                    Self::Abs => n.abs(),
                    Self::Floor => n.floor(),
                    _ => n.ceil(),
                };
                number_value(result).map(Some)
            }
            Self::Trim => match first {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(Value::String(
                    s.split_whitespace().collect::<Vec<_>>().join(" "),
                ))),
                Some(_) => Err(self.type_error("a string")),
            },
            Self::Contains => {
                let Some(value) = first else { return Ok(None) };
                let text = self.string(value)?;
                let pattern = self.string_argument(second)?;
                Ok(Some(Value::Bool(text.contains(&pattern))))
            }
            Self::Split => {
                let Some(value) = first else { return Ok(None) };
                let text = self.string(value)?;
                let separator = self.string_argument(second)?;
                let limit = self.limit(third)?;
                let parts: Vec<Value> = if separator.is_empty() {
                    text.chars().map(|c| Value::String(c.to_string())).collect()
                } else {
                    text.split(separator.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect()
                };
                Ok(Some(Value::Array(
                    parts.into_iter().take(limit.unwrap_or(usize::MAX)).collect(),
                )))
            }
            Self::Replace => {
                let Some(value) = first else { return Ok(None) };
                let text = self.string(value)?;
                let pattern = self.string_argument(second)?;
                if pattern.is_empty() {
                    return Err(ExpressionError::evaluate(
                        "$replace pattern must not be empty",
                    ));
                }
                let replacement = self.string_argument(third)?;
                Ok(Some(Value::String(match self.limit(fourth)? {
                    Some(limit) => text.replacen(&pattern, &replacement, limit),
                    None => text.replace(&pattern, &replacement),
                })))
            }
            Self::Merge => {
                let Some(value) = first else { return Ok(None) };
                let objects = match value {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                let mut merged = Map::new();
                for object in objects {
                    match object {
                        Value::Object(map) => merged.extend(map),
                        _ => return Err(self.type_error("an array of objects")),
                    }
                }
                Ok(Some(Value::Object(merged)))
            }
            Self::Append => Ok(match (first, second) {
                (None, other) | (other, None) => other,
                (Some(a), Some(b)) => {
                    let mut items = into_items(a);
                    items.extend(into_items(b));
                    Some(Value::Array(items))
                }
            }),
            Self::Reverse => Ok(first.map(|value| {
                let mut items = into_items(value);
                items.reverse();
                Value::Array(items)
            })),
            Self::Distinct => Ok(first.map(|value| match value {
                Value::Array(items) => {
                    let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items {
                        if !unique.iter().any(|seen| values_equal(seen, &item)) {
                            unique.push(item);
                        }
                    }
                    Value::Array(unique)
                }
                other => other,
            })),
            Self::Now => Ok(Some(Value::String(
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            ))),
            Self::Map | Self::Filter | Self::Reduce => Err(ExpressionError::evaluate(format!(
                "${} must be called directly with a function argument",
                self.name()
            ))),
        }
    }

    fn to_number(self, value: Value) -> Result<Value> {
        match value {
            Value::Number(_) => Ok(value),
            Value::Bool(b) => Ok(Value::from(u8::from(b))),
            Value::String(s) => {
                let parsed = s.trim().parse::<f64>().map_err(|_| {
                    ExpressionError::evaluate(format!(
                        "unable to cast string \"{}\" to a number",
                        s
                    ))
                })?;
                number_value(parsed)
            }
            _ => Err(self.type_error("a number, string or boolean")),
        }
    }

    fn numbers(self, value: Value) -> Result<Vec<f64>> {
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        items
            .iter()
            .map(|item| item.as_f64().ok_or_else(|| self.type_error("an array of numbers")))
            .collect()
    }

    fn integer(self, value: Option<Value>) -> Result<i64> {
        value
            .as_ref()
            .and_then(Value::as_f64)
            .map(|n| n.floor() as i64)
            .ok_or_else(|| self.type_error("a numeric argument"))
    }

    fn string(self, value: Value) -> Result<String> {
        match value {
            Value::String(s) => Ok(s),
            _ => Err(self.type_error("a string")),
        }
    }

    fn string_argument(self, value: Option<Value>) -> Result<String> {
        value
            .ok_or_else(|| self.type_error("a string argument"))
            .and_then(|v| self.string(v))
    }

    /// Optional non-negative count argument.
    fn limit(self, value: Option<Value>) -> Result<Option<usize>> {
        match value {
            None => Ok(None),
            Some(v) => match v.as_f64() {
                Some(n) if n >= 0.0 => Ok(Some(n.floor() as usize)),
                _ => Err(self.type_error("a non-negative limit")),
            },
        }
    }

    fn type_error(self, expected: &str) -> ExpressionError {
        ExpressionError::evaluate(format!("${} expects {}", self.name(), expected))
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn keys_of(map: &Map<String, Value>) -> Option<Value> {
    if map.is_empty() {
        return None;
    }
    Some(Value::Array(
        map.keys().map(|k| Value::String(k.clone())).collect(),
    ))
}

fn substring(text: &str, start: i64, length: Option<i64>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let begin = if start < 0 {
        len.saturating_add(start).max(0)
    } else {
        start.min(len)
    };
    let end = match length {
        Some(l) if l <= 0 => begin,
        Some(l) => begin.saturating_add(l).min(len),
        None => len,
    };
    chars[begin as usize..end.max(begin) as usize].iter().collect()
}
