//! Output coercion: turning a node's raw result into its declared type.
//!
//! An [`OutputCoercer`] is built once per node from its [`OutputFormat`],
//! with any schema reference already resolved, and applied to every result
//! the node produces.
//!
//! | format   | LLM text                                | tool value                     |
//! |----------|-----------------------------------------|--------------------------------|
//! | `raw`    | string, unchanged                       | unchanged                      |
//! | `json`   | strict parse, failure is an error       | strings parsed, others as-is   |
//! | `schema` | strict parse, then best-effort extract, | strings parsed when possible,  |
//! |          | then validated against the schema       | then validated                 |

use crate::config::OutputFormat;
use crate::error::{Result, SchemaError};
use crate::parsing::{extract_structured, snippet};
use crate::schema::{OutputSchema, SchemaRegistry};
use crate::PipelineError;
use serde_json::Value;
use std::sync::Arc;

/// Length of response excerpts quoted in error messages.
const EXCERPT_CHARS: usize = 200;

/// Applies a node's output format to its results.
#[derive(Clone)]
pub struct OutputCoercer {
    format: OutputFormat,
    schema: Option<Arc<dyn OutputSchema>>,
}

impl OutputCoercer {
    /// Build a coercer, resolving the schema reference of
    /// [`OutputFormat::Schema`] against `schemas`.
    pub fn new(format: &OutputFormat, schemas: &SchemaRegistry) -> std::result::Result<Self, SchemaError> {
        let schema = match format {
            OutputFormat::Schema(reference) => Some(schemas.resolve(reference)?),
            OutputFormat::Raw | OutputFormat::Json => None,
        };
        Ok(Self {
            format: format.clone(),
            schema,
        })
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    /// Coerce the text an LLM produced.
    pub fn coerce_text(&self, text: &str) -> Result<Value> {
        match &self.format {
            OutputFormat::Raw => Ok(Value::String(text.to_string())),
            OutputFormat::Json => serde_json::from_str(text.trim()).map_err(|e| {
                PipelineError::Other(format!(
                    "response is not valid structured data ({}): {}",
                    e,
                    snippet(text, EXCERPT_CHARS)
                ))
            }),
            OutputFormat::Schema(reference) => {
                let parsed = serde_json::from_str::<Value>(text.trim())
                    .ok()
                    .or_else(|| extract_structured(text))
                    .ok_or_else(|| SchemaError::Invalid {
                        reference: reference.clone(),
                        violation: format!(
                            "response contains no structured data: {}",
                            snippet(text, EXCERPT_CHARS)
                        ),
                    })?;
                self.validate(reference, parsed)
            }
        }
    }

    /// Coerce the value a tool returned.
    pub fn coerce_value(&self, value: Value) -> Result<Value> {
        match &self.format {
            OutputFormat::Raw => Ok(value),
            OutputFormat::Json => match value {
                Value::String(s) => serde_json::from_str(s.trim()).map_err(|e| {
                    PipelineError::Other(format!(
                        "tool result is not valid structured data ({}): {}",
                        e,
                        snippet(&s, EXCERPT_CHARS)
                    ))
                }),
                other => Ok(other),
            },
            OutputFormat::Schema(reference) => {
                let value = match value {
                    Value::String(s) => serde_json::from_str(s.trim()).unwrap_or(Value::String(s)),
                    other => other,
                };
                self.validate(reference, value)
            }
        }
    }

    fn validate(&self, reference: &str, value: Value) -> Result<Value> {
        let schema = self.schema.as_ref().ok_or_else(|| SchemaError::Unresolvable {
            reference: reference.to_string(),
        })?;
        schema.coerce(value).map_err(|violation| {
            SchemaError::Invalid {
                reference: reference.to_string(),
                violation,
            }
            .into()
        })
    }
}

impl std::fmt::Debug for OutputCoercer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputCoercer")
            .field("format", &self.format)
            .field("schema", &self.schema.as_ref().map(|s| s.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldSchema, FieldType};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new().with(
            "joke",
            FieldSchema::new("JokeOutput")
                .field(Field::required("setup", FieldType::String))
                .field(Field::required("punchline", FieldType::String)),
        )
    }

    fn coercer(format: OutputFormat) -> OutputCoercer {
        OutputCoercer::new(&format, &registry()).unwrap()
    }

    #[test]
    fn raw_passes_text_through() {
        assert_eq!(
            coercer(OutputFormat::Raw).coerce_text("  hello ").unwrap(),
            json!("  hello ")
        );
    }

    #[test]
    fn json_is_strict() {
        let c = coercer(OutputFormat::Json);
        assert_eq!(c.coerce_text(" {\"a\": 1} ").unwrap(), json!({"a": 1}));

        let err = c.coerce_text("This is a mock response from the LLM.").unwrap_err();
        assert!(err.to_string().contains("not valid structured data"));
        assert!(err.schema_error().is_none());

        // no fence stripping in json mode
        assert!(c.coerce_text("```json\n{}\n```").is_err());
    }

    #[test]
    fn schema_falls_back_to_extraction() {
        let c = coercer(OutputFormat::Schema("joke".into()));
        let text = "Here you go:\n```json\n{\"setup\": \"S\", \"punchline\": \"P\"}\n```";
        assert_eq!(
            c.coerce_text(text).unwrap(),
            json!({"setup": "S", "punchline": "P"})
        );
    }

    #[test]
    fn schema_violation_is_invalid() {
        let c = coercer(OutputFormat::Schema("joke".into()));
        let err = c.coerce_text("{\"punchline\": \"P\"}").unwrap_err();
        assert!(matches!(
            err.schema_error(),
            Some(SchemaError::Invalid { violation, .. }) if violation.contains("setup")
        ));

        let err = c.coerce_text("no structure here").unwrap_err();
        assert!(matches!(err.schema_error(), Some(SchemaError::Invalid { .. })));
    }

    #[test]
    fn unknown_schema_fails_at_construction() {
        let err = OutputCoercer::new(&OutputFormat::Schema("nope".into()), &registry()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::Unresolvable {
                reference: "nope".into()
            }
        );
    }

    #[test]
    fn tool_values() {
        assert_eq!(
            coercer(OutputFormat::Json).coerce_value(json!("[1, 2]")).unwrap(),
            json!([1, 2])
        );
        assert_eq!(
            coercer(OutputFormat::Json).coerce_value(json!({"k": 1})).unwrap(),
            json!({"k": 1})
        );
        assert!(coercer(OutputFormat::Json).coerce_value(json!("nope")).is_err());
        assert_eq!(
            coercer(OutputFormat::Schema("joke".into()))
                .coerce_value(json!("{\"setup\": \"S\", \"punchline\": \"P\"}"))
                .unwrap(),
            json!({"setup": "S", "punchline": "P"})
        );
    }
}
