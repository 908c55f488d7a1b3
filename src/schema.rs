//! Output schemas and the registry that resolves schema references.
//!
//! A schema validates a node's structured output and, where the shape is
//! close enough, coerces it: numeric strings become numbers, scalars become
//! strings, absent optional fields get their defaults. Two flavours exist:
//!
//! - [`FieldSchema`]: a declarative field list, built in code or deserialized.
//! - [`TypedSchema`]: any `serde` type; a value conforms when it deserializes.

use crate::error::SchemaError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A named shape that structured output must satisfy.
pub trait OutputSchema: Send + Sync {
    /// Human-readable schema name, used in logs.
    fn name(&self) -> &str;

    /// Validate `value`, returning it unchanged when it already conforms or
    /// a coerced copy when it can be made to. `Err` carries the violation.
    fn coerce(&self, value: Value) -> Result<Value, String>;
}

/// Type of a [`Field`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<FieldType>),
    Object,
    Any,
}

impl FieldType {
    pub fn array_of(item: FieldType) -> Self {
        FieldType::Array(Box::new(item))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Array(item) => write!(f, "array of {}", item),
            FieldType::Object => write!(f, "object"),
            FieldType::Any => write!(f, "any"),
        }
    }
}

/// One field of a [`FieldSchema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Value inserted when an optional field is absent.
    #[serde(default)]
    pub default: Option<Value>,
    /// Inclusive lower bound for numeric fields.
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric fields.
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Field {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            min: None,
            max: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType, default: Value) -> Self {
        Self {
            default: Some(default),
            required: false,
            ..Self::required(name, ty)
        }
    }

    /// Constrain a numeric field to `[min, max]`.
    pub fn between(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Declarative object schema.
///
/// Fields not listed are kept as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

impl OutputSchema for FieldSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn coerce(&self, value: Value) -> Result<Value, String> {
        let mut object = match value {
            Value::Object(map) => map,
            other => return Err(format!("expected an object, got {}", type_name(&other))),
        };

        let mut changed = false;
        for field in &self.fields {
            let slot = object.get_mut(&field.name).filter(|v| !v.is_null());
            let Some(slot) = slot else {
                if let Some(default) = &field.default {
                    object.insert(field.name.clone(), default.clone());
                    changed = true;
                } else if field.required {
                    return Err(format!("missing required field '{}'", field.name));
                }
                continue;
            };

            let current = slot.take();
            let coerced = coerce_value(&field.ty, current.clone())
                .map_err(|e| format!("field '{}': {}", field.name, e))?;
            check_bounds(field, &coerced)?;
            changed |= coerced != current;
            *slot = coerced;
        }

        // conforming input keeps its key order
        if changed {
            object = reorder(object, &self.fields);
        }
        Ok(Value::Object(object))
    }
}

/// Put declared fields first, in declaration order, then the rest.
fn reorder(mut object: Map<String, Value>, fields: &[Field]) -> Map<String, Value> {
    let mut ordered = Map::with_capacity(object.len());
    for field in fields {
        if let Some(v) = object.remove(&field.name) {
            ordered.insert(field.name.clone(), v);
        }
    }
    ordered.extend(object);
    ordered
}

fn check_bounds(field: &Field, value: &Value) -> Result<(), String> {
    let Some(n) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = field.min {
        if n < min {
            return Err(format!("field '{}' must be >= {}, got {}", field.name, min, n));
        }
    }
    if let Some(max) = field.max {
        if n > max {
            return Err(format!("field '{}' must be <= {}, got {}", field.name, max, n));
        }
    }
    Ok(())
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

fn mismatch(expected: &FieldType, got: &Value) -> String {
    format!("expected {}, got {} {}", expected, type_name(got), got)
}

/// Coerce a single value into `ty`.
fn coerce_value(ty: &FieldType, value: Value) -> Result<Value, String> {
    match (ty, value) {
        (FieldType::Any, v) => Ok(v),

        (FieldType::String, v @ Value::String(_)) => Ok(v),
        (FieldType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (FieldType::Number, v @ Value::Number(_)) => Ok(v),
        (FieldType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch(ty, &Value::String(s))),

        (FieldType::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                return Ok(Value::Number(n));
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::Number(Number::from(f as i64)))
                }
                _ => Err(mismatch(ty, &Value::Number(n))),
            }
        }
        (FieldType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(|i| Value::Number(Number::from(i)))
            .map_err(|_| mismatch(ty, &Value::String(s))),

        (FieldType::Boolean, v @ Value::Bool(_)) => Ok(v),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(mismatch(ty, &Value::String(s))),
        },

        (FieldType::Array(item), Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| coerce_value(item, v).map_err(|e| format!("item {}: {}", i, e)))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),

        (FieldType::Object, v @ Value::Object(_)) => Ok(v),

        (ty, other) => Err(mismatch(ty, &other)),
    }
}

/// Schema backed by a `serde` type.
///
/// A value conforms when it deserializes into `T`; the returned value is the
/// re-serialized `T`, so serde defaults and renames apply.
pub struct TypedSchema<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> OutputSchema for TypedSchema<T>
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn coerce(&self, value: Value) -> Result<Value, String> {
        let typed: T = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        let normalized = serde_json::to_value(typed).map_err(|e| e.to_string())?;
        if normalized == value {
            Ok(value)
        } else {
            Ok(normalized)
        }
    }
}

/// Resolves schema references to schemas.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<dyn OutputSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema under `reference`, replacing any previous entry.
    pub fn register(
        &mut self,
        reference: impl Into<String>,
        schema: impl OutputSchema + 'static,
    ) -> &mut Self {
        self.schemas.insert(reference.into(), Arc::new(schema));
        self
    }

    /// Register a [`TypedSchema`] for `T` under `reference`.
    pub fn register_type<T>(&mut self, reference: impl Into<String>) -> &mut Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let reference = reference.into();
        let schema = TypedSchema::<T>::new(reference.clone());
        self.register(reference, schema)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, reference: impl Into<String>, schema: impl OutputSchema + 'static) -> Self {
        self.register(reference, schema);
        self
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.schemas.contains_key(reference)
    }

    pub fn resolve(&self, reference: &str) -> Result<Arc<dyn OutputSchema>, SchemaError> {
        self.schemas
            .get(reference)
            .cloned()
            .ok_or_else(|| SchemaError::Unresolvable {
                reference: reference.to_string(),
            })
    }

    /// Resolve `reference` and coerce `value` against it.
    pub fn validate(&self, reference: &str, value: Value) -> Result<Value, SchemaError> {
        let schema = self.resolve(reference)?;
        schema.coerce(value).map_err(|violation| SchemaError::Invalid {
            reference: reference.to_string(),
            violation,
        })
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.schemas.keys().collect();
        names.sort();
        f.debug_struct("SchemaRegistry").field("schemas", &names).finish()
    }
}
