//! Tokenizer for the JSONata subset.

use crate::expression::{ExpressionError, Result};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Token {
    Number(f64),
    Str(String),
    /// Field name, keyword (`and`, `or`, `true`, ...) or backtick-quoted name.
    Name(String),
    /// `$` is `""`, `$$` is `"$"`, `$name` is `"name"`.
    Variable(String),
    Op(&'static str),
    End,
}

#[derive(Debug, Clone)]
pub(super) struct Spanned {
    pub token: Token,
    pub position: usize,
}

const OPERATORS: &[&str] = &[
    "!=", "<=", ">=", "~>", ":=", ".", "[", "]", "(", ")", "{", "}", ",", ";", ":", "?", "+", "-",
    "*", "/", "%", "&", "=", "<", ">",
];

pub(super) fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '/' && matches!(chars.get(i + 1), Some((_, '*'))) {
            i = skip_comment(&chars, i)?;
            continue;
        }

        if c.is_ascii_digit() {
            let (number, next) = read_number(&chars, i, source)?;
            tokens.push(Spanned {
                token: Token::Number(number),
                position,
            });
            i = next;
            continue;
        }

        if c == '"' || c == '\'' {
            let (text, next) = read_string(&chars, i)?;
            tokens.push(Spanned {
                token: Token::Str(text),
                position,
            });
            i = next;
            continue;
        }

        if c == '`' {
            let end = chars[i + 1..]
                .iter()
                .position(|(_, ch)| *ch == '`')
                .map(|offset| i + 1 + offset)
                .ok_or_else(|| ExpressionError::compile(position, "unterminated quoted name"))?;
            let name: String = chars[i + 1..end].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned {
                token: Token::Name(name),
                position,
            });
            i = end + 1;
            continue;
        }

        if c == '$' {
            let mut next = i + 1;
            let name = if matches!(chars.get(next), Some((_, '$'))) {
                next += 1;
                "$".to_string()
            } else {
                let start = next;
                while next < chars.len() && is_name_char(chars[next].1) {
                    next += 1;
                }
                chars[start..next].iter().map(|(_, ch)| ch).collect()
            };
            tokens.push(Spanned {
                token: Token::Variable(name),
                position,
            });
            i = next;
            continue;
        }

        if is_name_start(c) {
            let start = i;
            while i < chars.len() && is_name_char(chars[i].1) {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned {
                token: Token::Name(name),
                position,
            });
            continue;
        }

        let rest = &source[position..];
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .ok_or_else(|| {
                ExpressionError::compile(position, format!("unexpected character '{}'", c))
            })?;
        tokens.push(Spanned {
            token: Token::Op(*op),
            position,
        });
        i += op.chars().count();
    }

    tokens.push(Spanned {
        token: Token::End,
        position: source.len(),
    });
    Ok(tokens)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn skip_comment(chars: &[(usize, char)], start: usize) -> Result<usize> {
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i].1 == '*' && chars[i + 1].1 == '/' {
            return Ok(i + 2);
        }
        i += 1;
    }
    Err(ExpressionError::compile(chars[start].0, "unterminated comment"))
}

fn read_number(chars: &[(usize, char)], start: usize, source: &str) -> Result<(f64, usize)> {
    let mut i = start;
    let digits = |i: &mut usize| {
        while *i < chars.len() && chars[*i].1.is_ascii_digit() {
            *i += 1;
        }
    };

    digits(&mut i);
    if i + 1 < chars.len() && chars[i].1 == '.' && chars[i + 1].1.is_ascii_digit() {
        i += 1;
        digits(&mut i);
    }
    if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j].1, '+' | '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].1.is_ascii_digit() {
            i = j;
            digits(&mut i);
        }
    }

    let begin = chars[start].0;
    let end = chars.get(i).map(|(p, _)| *p).unwrap_or(source.len());
    source[begin..end]
        .parse::<f64>()
        .map(|n| (n, i))
        .map_err(|e| ExpressionError::compile(begin, format!("invalid number: {}", e)))
}

fn read_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize)> {
    let (position, quote) = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((text, i + 1));
        }
        if c == '\\' {
            i += 1;
            let escaped = chars
                .get(i)
                .map(|(_, ch)| *ch)
                .ok_or_else(|| ExpressionError::compile(position, "unterminated string"))?;
            match escaped {
                '"' | '\'' | '\\' | '/' => text.push(escaped),
                'b' => text.push('\u{0008}'),
                'f' => text.push('\u{000C}'),
                'n' => text.push('\n'),
                'r' => text.push('\r'),
                't' => text.push('\t'),
                'u' => {
                    let hex: String = chars
                        .get(i + 1..i + 5)
                        .map(|s| s.iter().map(|(_, ch)| ch).collect())
                        .unwrap_or_default();
                    let decoded = u32::from_str_radix(&hex, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or_else(|| {
                            ExpressionError::compile(chars[i].0, "invalid unicode escape")
                        })?;
                    text.push(decoded);
                    i += 4;
                }
                other => {
                    return Err(ExpressionError::compile(
                        chars[i].0,
                        format!("unsupported escape sequence '\\{}'", other),
                    ))
                }
            }
            i += 1;
            continue;
        }
        text.push(c);
        i += 1;
    }

    Err(ExpressionError::compile(position, "unterminated string"))
}
