//! Command encoding and reply decoding.
//!
//! A command is the operation name followed by its arguments, joined with
//! commas: `GetTrace,1,0,-1,0.0e0,1.0e0,0.0e0,0.0e0`. A reply is a comma
//! separated list of fields, or free text for a handful of operations. The
//! peer answers `BAD COMMAND` to anything it cannot execute; that sentinel is
//! checked before any other parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Reply the peer sends for a command it rejected.
pub const BAD_COMMAND: &str = "BAD COMMAND";

/// One command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    /// Sent in scientific notation with 20 significant digits.
    Float(f64),
    /// Sent verbatim. Must not contain a comma.
    Str(String),
    /// Sent wrapped in double quotes, so commas are allowed.
    Quoted(String),
}

impl Arg {
    pub fn quoted(text: impl Into<String>) -> Self {
        Arg::Quoted(text.into())
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(i64::from(v))
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Arg::Int(i64::from(v))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Int(i64::from(v))
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        match v {
            Value::Int(i) => Arg::Int(i),
            Value::Float(f) => Arg::Float(f),
            Value::Str(s) => Arg::Str(s),
        }
    }
}

/// One decoded reply field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// How a single reply field is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Integer; a float literal is accepted and truncated toward zero.
    Int,
    Float,
    /// Kept as text (surrounding whitespace removed).
    Str,
    /// Type inferred with [`regress_literal`].
    Literal,
}

/// Expected layout of an operation's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// The whole reply is one string; commas are not split.
    Text,
    /// Exactly these fields, in order.
    Fields(&'static [FieldType]),
    /// These fields first, then any number of fields of the second type.
    Leading(&'static [FieldType], FieldType),
    /// Any number of fields of one type.
    Repeated(FieldType),
    /// Any number of fields, each type inferred.
    Literals,
    /// The reply carries no data.
    Discard,
}

/// Decoded reply: the fields of one answer, in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    command: String,
    values: Vec<Value>,
}

impl Reply {
    pub fn new(command: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            values,
        }
    }

    /// Operation this reply answers.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Field `index` as an integer.
    pub fn int(&self, index: usize) -> Result<i64, LinkError> {
        self.field(index)?
            .as_i64()
            .ok_or_else(|| self.error(format!("field {} is not an integer", index)))
    }

    /// Field `index` as a float. Integer fields widen.
    pub fn float(&self, index: usize) -> Result<f64, LinkError> {
        self.field(index)?
            .as_f64()
            .ok_or_else(|| self.error(format!("field {} is not a number", index)))
    }

    /// Field `index` as text.
    pub fn text(&self, index: usize) -> Result<&str, LinkError> {
        self.field(index)?
            .as_str()
            .ok_or_else(|| self.error(format!("field {} is not text", index)))
    }

    fn field(&self, index: usize) -> Result<&Value, LinkError> {
        self.values.get(index).ok_or_else(|| {
            self.error(format!(
                "field {} requested but reply has {} fields",
                index,
                self.values.len()
            ))
        })
    }

    fn error(&self, reason: String) -> LinkError {
        let reply = self
            .values
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(",");
        LinkError::Decode {
            command: self.command.clone(),
            reply,
            reason,
        }
    }
}

/// Build the wire form of a command.
///
/// # Errors
///
/// [`LinkError::InvalidArgument`] if the name is empty, anything contains a
/// CR, LF or NUL, a `Str` argument or the name contains a comma, a `Quoted`
/// argument contains a double quote, or a float is not finite.
pub fn encode_command(name: &str, args: &[Arg]) -> Result<String, LinkError> {
    if name.is_empty() {
        return Err(LinkError::InvalidArgument(
            "command name is empty".to_string(),
        ));
    }
    check_text(name, "command name")?;
    if name.contains(',') {
        return Err(LinkError::InvalidArgument(format!(
            "command name contains a comma: {:?}",
            name
        )));
    }

    let mut command = String::from(name);
    for (index, arg) in args.iter().enumerate() {
        command.push(',');
        match arg {
            Arg::Int(v) => command.push_str(&v.to_string()),
            Arg::Float(v) => command.push_str(&encode_float(*v, index)?),
            Arg::Str(s) => {
                check_text(s, "argument")?;
                if s.contains(',') {
                    return Err(LinkError::InvalidArgument(format!(
                        "argument {} contains a comma; send it as Arg::Quoted: {:?}",
                        index, s
                    )));
                }
                command.push_str(s);
            }
            Arg::Quoted(s) => {
                check_text(s, "argument")?;
                if s.contains('"') {
                    return Err(LinkError::InvalidArgument(format!(
                        "quoted argument {} contains a double quote: {:?}",
                        index, s
                    )));
                }
                command.push('"');
                command.push_str(s);
                command.push('"');
            }
        }
    }
    Ok(command)
}

fn encode_float(value: f64, index: usize) -> Result<String, LinkError> {
    if !value.is_finite() {
        return Err(LinkError::InvalidArgument(format!(
            "argument {} is not a finite number: {}",
            index, value
        )));
    }
    Ok(format!("{:.19e}", value))
}

fn check_text(text: &str, what: &str) -> Result<(), LinkError> {
    if text.contains(['\r', '\n', '\0']) {
        return Err(LinkError::InvalidArgument(format!(
            "{} contains a line break or NUL: {:?}",
            what, text
        )));
    }
    Ok(())
}

/// Decode the raw reply to `command` according to `shape`.
///
/// Trailing whitespace (including the peer's `\r\n`) is removed first. A
/// reply equal to [`BAD_COMMAND`] becomes [`LinkError::RemoteRejected`]
/// whatever the shape.
pub fn decode_reply(command: &str, shape: &ReplyShape, raw: &str) -> Result<Reply, LinkError> {
    let text = raw.trim_end();
    if text == BAD_COMMAND {
        return Err(LinkError::RemoteRejected {
            command: command.to_string(),
        });
    }

    let decode_error = |reason: String| LinkError::Decode {
        command: command.to_string(),
        reply: text.to_string(),
        reason,
    };

    let values = match shape {
        ReplyShape::Discard => Vec::new(),
        ReplyShape::Text => vec![Value::Str(text.to_string())],
        ReplyShape::Fields(types) => {
            let fields = split_fields(text);
            if fields.len() != types.len() {
                return Err(decode_error(format!(
                    "expected {} fields, got {}",
                    types.len(),
                    fields.len()
                )));
            }
            coerce_all(fields.iter().copied().zip(types.iter().copied()), &decode_error)?
        }
        ReplyShape::Leading(head, tail) => {
            let fields = split_fields(text);
            if fields.len() < head.len() {
                return Err(decode_error(format!(
                    "expected at least {} fields, got {}",
                    head.len(),
                    fields.len()
                )));
            }
            let types = head
                .iter()
                .copied()
                .chain(std::iter::repeat(*tail))
                .take(fields.len());
            coerce_all(fields.iter().copied().zip(types), &decode_error)?
        }
        ReplyShape::Repeated(ty) => {
            let fields = split_fields(text);
            coerce_all(fields.iter().copied().zip(std::iter::repeat(*ty)), &decode_error)?
        }
        ReplyShape::Literals => split_fields(text)
            .into_iter()
            .map(regress_literal)
            .collect(),
    };

    Ok(Reply::new(command, values))
}

fn split_fields(text: &str) -> Vec<&str> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    text.split(',').map(str::trim).collect()
}

fn coerce_all<'a, I, E>(fields: I, decode_error: &E) -> Result<Vec<Value>, LinkError>
where
    I: Iterator<Item = (&'a str, FieldType)>,
    E: Fn(String) -> LinkError,
{
    fields
        .enumerate()
        .map(|(index, (field, ty))| {
            coerce(field, ty)
                .ok_or_else(|| decode_error(format!("field {} ({:?}) is not {:?}", index, field, ty)))
        })
        .collect()
}

fn coerce(field: &str, ty: FieldType) -> Option<Value> {
    match ty {
        FieldType::Int => parse_int(field).map(Value::Int),
        FieldType::Float => field.parse::<f64>().ok().map(Value::Float),
        FieldType::Str => Some(Value::Str(field.to_string())),
        FieldType::Literal => Some(regress_literal(field)),
    }
}

fn parse_int(field: &str) -> Option<i64> {
    if let Ok(v) = field.parse::<i64>() {
        return Some(v);
    }
    let v = field.parse::<f64>().ok()?.trunc();
    if v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Infer the type of a reply field from its text.
///
/// Text that parses as a number becomes `Float` when it contains `.`, `e` or
/// `E` and `Int` otherwise; integers too large for `i64` stay `Float`.
/// Anything else is returned as `Str`.
pub fn regress_literal(field: &str) -> Value {
    let field = field.trim();
    match field.parse::<f64>() {
        Ok(float) => {
            if field.contains(['.', 'e', 'E']) {
                Value::Float(float)
            } else if !float.is_finite() {
                // "nan", "inf" and "infinity" are words, not numbers.
                Value::Str(field.to_string())
            } else {
                field
                    .parse::<i64>()
                    .map(Value::Int)
                    .unwrap_or(Value::Float(float))
            }
        }
        Err(_) => Value::Str(field.to_string()),
    }
}
