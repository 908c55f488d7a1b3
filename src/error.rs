use thiserror::Error;

/// Errors produced while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed or inconsistent pipeline/node definition. Raised at build time.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A node's processing failed. Always attributable to exactly one node.
    #[error("Node '{node_id}' failed: {cause}")]
    Node {
        node_id: String,
        #[source]
        cause: Box<PipelineError>,
    },

    /// Output validation against a schema failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// A prompt template could not be resolved or rendered.
    #[error("Prompt template '{template}' could not be rendered: {message}")]
    Prompt { template: String, message: String },

    /// A tool reference could not be resolved at build time.
    #[error("Tool '{reference}' could not be resolved: {message}")]
    Tool { reference: String, message: String },

    /// The checkpoint store failed to load or save state.
    #[error("Checkpoint store failed: {0}")]
    Checkpoint(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// HTTP error with status code and response body.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was cancelled via the cancellation flag.
    #[error("Pipeline was cancelled")]
    Cancelled,

    /// Catch-all for other errors, including tool runtime failures.
    #[error("{0}")]
    Other(String),
}

/// Schema resolution and validation failures.
///
/// Resolution (the reference names no known schema) and validation (the value
/// does not conform) are separate variants so callers can tell them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema '{reference}' could not be resolved")]
    Unresolvable { reference: String },

    #[error("Output does not match schema '{reference}': {violation}")]
    Invalid { reference: String, violation: String },
}

impl PipelineError {
    /// Wrap a failure as a [`PipelineError::Node`] for `node_id`.
    ///
    /// An error that is already attributed to a node is returned unchanged.
    pub fn in_node(node_id: impl Into<String>, cause: PipelineError) -> Self {
        match cause {
            PipelineError::Node { .. } => cause,
            other => PipelineError::Node {
                node_id: node_id.into(),
                cause: Box::new(other),
            },
        }
    }

    /// The id of the node this error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            PipelineError::Node { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// The innermost error, looking through node attribution.
    pub fn root_cause(&self) -> &PipelineError {
        match self {
            PipelineError::Node { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// The schema error at the root of this error, if any.
    pub fn schema_error(&self) -> Option<&SchemaError> {
        match self.root_cause() {
            PipelineError::Schema(e) => Some(e),
            _ => None,
        }
    }

    /// Whether this is a build-time configuration error.
    pub fn is_config(&self) -> bool {
        matches!(self, PipelineError::Config(_))
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_node_wraps_once() {
        let err = PipelineError::in_node("gen", PipelineError::Other("boom".into()));
        let again = PipelineError::in_node("outer", err);
        assert_eq!(again.node_id(), Some("gen"));
        assert!(matches!(again.root_cause(), PipelineError::Other(m) if m == "boom"));
    }

    #[test]
    fn schema_error_seen_through_node() {
        let err = PipelineError::in_node(
            "gen",
            SchemaError::Invalid {
                reference: "joke".into(),
                violation: "missing required field 'setup'".into(),
            }
            .into(),
        );
        assert!(matches!(
            err.schema_error(),
            Some(SchemaError::Invalid { reference, .. }) if reference == "joke"
        ));
        assert!(err.to_string().contains("Node 'gen' failed"));
    }

    #[test]
    fn anyhow_converts_to_other() {
        let err: PipelineError = anyhow::anyhow!("tool exploded").into();
        assert!(matches!(err, PipelineError::Other(ref m) if m.contains("tool exploded")));
    }
}
