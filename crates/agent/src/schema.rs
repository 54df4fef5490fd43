use std::fmt;

use parley_core::ToolArguments;
use serde_json::{json, Number, Value};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<ParamKind>),
    Object,
    Enum(Vec<String>),
}

impl ParamKind {
    pub fn array_of(item: ParamKind) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn one_of<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(options.into_iter().map(Into::into).collect())
    }

    fn json_schema(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Number => json!({"type": "number"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(item) => json!({"type": "array", "items": item.json_schema()}),
            Self::Object => json!({"type": "object"}),
            Self::Enum(options) => json!({"type": "string", "enum": options}),
        }
    }

    /// Accepts `value` as this kind, converting where the intent is unambiguous.
    fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::String, Value::Number(number)) => Some(Value::String(number.to_string())),
            (Self::String, Value::Bool(flag)) => Some(Value::String(flag.to_string())),
            (Self::Number, Value::Number(number)) => {
                number.as_f64().filter(|float| float.is_finite()).map(|_| value.clone())
            }
            (Self::Number, Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (Self::Integer, Value::Number(number)) => number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|float| float.fract() == 0.0 && float.abs() < i64::MAX as f64)
                        .map(|float| float as i64)
                })
                .map(Value::from),
            (Self::Integer, Value::String(text)) => {
                text.trim().parse::<i64>().ok().map(Value::from)
            }
            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::Boolean, Value::String(text)) => match text.trim().to_ascii_lowercase().as_str()
            {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            (Self::Object, Value::Object(_)) => Some(value.clone()),
            (Self::Enum(options), Value::String(text)) => options
                .iter()
                .find(|option| option.eq_ignore_ascii_case(text.trim()))
                .map(|option| Value::String(option.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Number => f.write_str("number"),
            Self::Integer => f.write_str("integer"),
            Self::Boolean => f.write_str("boolean"),
            Self::Array(item) => write!(f, "array of {item}"),
            Self::Object => f.write_str("object"),
            Self::Enum(options) => write!(f, "one of {}", options.join("|")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("missing required parameter `{0}`")]
    Missing(String),
    #[error("parameter `{name}` expected {expected}, got {found}")]
    Invalid { name: String, expected: String, found: String },
    #[error("unexpected parameter `{0}`")]
    Unexpected(String),
}

/// A tool's name, description and parameter schema as advertised to the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), parameters: Vec::new() }
    }

    pub fn required(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        kind: ParamKind,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParameterSpec {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        });
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|parameter| parameter.name == name)
    }

    /// Function-calling schema understood by the common provider APIs.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for parameter in &self.parameters {
            let mut schema = parameter.kind.json_schema();
            if let Value::Object(fields) = &mut schema {
                fields.insert(
                    "description".to_owned(),
                    Value::String(parameter.description.clone()),
                );
            }
            properties.insert(parameter.name.clone(), schema);
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|parameter| parameter.required)
            .map(|parameter| parameter.name.as_str())
            .collect();

        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                },
            },
        })
    }

    /// Checks `arguments` against the schema and returns the coerced arguments.
    /// Null optional values are dropped. Every problem is reported, not just the first.
    pub fn validate(&self, arguments: &ToolArguments) -> Result<ToolArguments, Vec<ArgumentError>> {
        let mut errors = Vec::new();
        let mut validated = ToolArguments::new();

        for name in arguments.keys() {
            if self.parameter(name).is_none() {
                errors.push(ArgumentError::Unexpected(name.clone()));
            }
        }

        for parameter in &self.parameters {
            match arguments.get(&parameter.name) {
                None | Some(Value::Null) => {
                    if parameter.required {
                        errors.push(ArgumentError::Missing(parameter.name.clone()));
                    }
                }
                Some(value) => match coerce_named(&parameter.kind, &parameter.name, value) {
                    Ok(coerced) => {
                        validated.insert(parameter.name.clone(), coerced);
                    }
                    Err(error) => errors.push(error),
                },
            }
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(errors)
        }
    }
}

fn coerce_named(kind: &ParamKind, name: &str, value: &Value) -> Result<Value, ArgumentError> {
    if let (ParamKind::Array(item), Value::Array(values)) = (kind, value) {
        return values
            .iter()
            .enumerate()
            .map(|(index, element)| coerce_named(item, &format!("{name}[{index}]"), element))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    kind.coerce(value).ok_or_else(|| ArgumentError::Invalid {
        name: name.to_owned(),
        expected: kind.to_string(),
        found: describe(value),
    })
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(flag) => format!("boolean {flag}"),
        Value::Number(number) => format!("number {number}"),
        Value::String(text) if text.chars().count() > 40 => "a long string".to_owned(),
        Value::String(text) => format!("string {text:?}"),
        Value::Array(_) => "array".to_owned(),
        Value::Object(_) => "object".to_owned(),
    }
}
