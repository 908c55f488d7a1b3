//! Pipeline and node descriptors.
//!
//! Configuration arrives as loosely-typed records ([`PipelineConfig`],
//! [`NodeConfig`]) straight from JSON or YAML. [`Pipeline::from_config`]
//! validates them into the immutable, strongly-typed [`Pipeline`] /
//! [`NodeSpec`] pair the engine runs. Code-first callers can skip the
//! loose layer entirely with [`Pipeline::builder`].

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default sampling temperature for LLM nodes.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

// ---------------------------------------------------------------------------
// Loose configuration records
// ---------------------------------------------------------------------------

/// A pipeline definition as it appears in a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    pub nodes: Vec<NodeConfig>,
    /// Output mapping template: result name → template referencing node ids.
    #[serde(default)]
    pub output: Option<Map<String, Value>>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// A single node as it appears in a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// System prompt template sent ahead of the user prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub output: Option<OutputConfig>,
    /// Extra context names: alias → source node id.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// The `output` block of a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(rename = "type", default)]
    pub kind: OutputKind,
    #[serde(default)]
    pub schema: Option<String>,
}

/// How a node's raw result is coerced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Raw,
    Json,
    #[serde(alias = "pydantic")]
    Schema,
}

/// Declared pipeline input. Informational only; the engine does not enforce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Typed view of the free-form `settings` block.
///
/// `max_retries` and `cache_enabled` are carried as metadata only: the engine
/// never retries a node and never caches outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| PipelineError::Config(format!("Error parsing config: {}", e)))
    }

    /// Parse a YAML configuration document.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| PipelineError::Config(format!("Error parsing config: {}", e)))
    }

    /// Load a configuration file, picking the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Error loading config: {}", e)))?;

        match ext.as_str() {
            "json" => Self::from_json_str(&text),
            #[cfg(feature = "yaml")]
            "yaml" | "yml" => Self::from_yaml_str(&text),
            #[cfg(not(feature = "yaml"))]
            "yaml" | "yml" => Err(PipelineError::Config(
                "YAML configs require the `yaml` feature".to_string(),
            )),
            other => Err(PipelineError::Config(format!(
                "Unsupported config file format: .{}",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Validated descriptors
// ---------------------------------------------------------------------------

/// How a node's result is coerced, with the schema reference resolved into
/// the variant that needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Raw,
    Json,
    Schema(String),
}

/// Kind-specific part of a [`NodeSpec`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Llm {
        model: String,
        prompt_template: String,
        temperature: f64,
        system_prompt: Option<String>,
        max_tokens: Option<u32>,
    },
    Tool {
        tool: String,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Llm { .. } => "llm",
            NodeKind::Tool { .. } => "tool",
        }
    }
}

/// Immutable, validated node descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub role: String,
    pub kind: NodeKind,
    pub output: OutputFormat,
    pub aliases: BTreeMap<String, String>,
}

impl NodeSpec {
    /// An LLM node with the default temperature and raw output.
    pub fn llm(
        id: impl Into<String>,
        model: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: String::new(),
            kind: NodeKind::Llm {
                model: model.into(),
                prompt_template: prompt_template.into(),
                temperature: DEFAULT_TEMPERATURE,
                system_prompt: None,
                max_tokens: None,
            },
            output: OutputFormat::Raw,
            aliases: BTreeMap::new(),
        }
    }

    /// A tool node with raw output.
    pub fn tool(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: String::new(),
            kind: NodeKind::Tool { tool: tool.into() },
            output: OutputFormat::Raw,
            aliases: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Set the temperature. No effect on tool nodes.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        if let NodeKind::Llm {
            ref mut temperature,
            ..
        } = self.kind
        {
            *temperature = temp;
        }
        self
    }

    /// Template for the system prompt. No effect on tool nodes.
    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        if let NodeKind::Llm {
            ref mut system_prompt,
            ..
        } = self.kind
        {
            *system_prompt = Some(template.into());
        }
        self
    }

    /// Cap the completion length. No effect on tool nodes.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        if let NodeKind::Llm {
            ref mut max_tokens,
            ..
        } = self.kind
        {
            *max_tokens = Some(max);
        }
        self
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    /// Shorthand for `with_output(OutputFormat::Json)`.
    pub fn expecting_json(self) -> Self {
        self.with_output(OutputFormat::Json)
    }

    /// Shorthand for `with_output(OutputFormat::Schema(reference))`.
    pub fn expecting_schema(self, reference: impl Into<String>) -> Self {
        self.with_output(OutputFormat::Schema(reference.into()))
    }

    /// Expose the output of `source` under `alias` in this node's context.
    pub fn with_alias(mut self, alias: impl Into<String>, source: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), source.into());
        self
    }

    /// Validate a loose [`NodeConfig`] into a spec.
    pub fn from_config(config: NodeConfig) -> Result<Self> {
        let id = config.id;
        if id.trim().is_empty() {
            return Err(PipelineError::Config("Node id must not be empty".to_string()));
        }

        let kind = match config.kind.as_str() {
            "llm" => {
                let model = non_empty(config.model).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "Node {} is of type 'llm' but has no model specified",
                        id
                    ))
                })?;
                let prompt_template = non_empty(config.prompt_template).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "Node {} is of type 'llm' but has no prompt_template specified",
                        id
                    ))
                })?;
                NodeKind::Llm {
                    model,
                    prompt_template,
                    temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
                    system_prompt: non_empty(config.system_prompt),
                    max_tokens: config.max_tokens,
                }
            }
            "tool" => {
                let tool = non_empty(config.tool).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "Node {} is of type 'tool' but has no tool specified",
                        id
                    ))
                })?;
                NodeKind::Tool { tool }
            }
            other => {
                return Err(PipelineError::Config(format!(
                    "Node {} has unknown type: {}",
                    id, other
                )))
            }
        };

        let output = match config.output.unwrap_or_default() {
            OutputConfig {
                kind: OutputKind::Raw,
                ..
            } => OutputFormat::Raw,
            OutputConfig {
                kind: OutputKind::Json,
                ..
            } => OutputFormat::Json,
            OutputConfig {
                kind: OutputKind::Schema,
                schema,
            } => OutputFormat::Schema(non_empty(schema).ok_or_else(|| {
                PipelineError::Config(format!(
                    "Node {} has output type 'schema' but no schema specified",
                    id
                ))
            })?),
        };

        Ok(Self {
            id,
            role: config.role,
            kind,
            output,
            aliases: config.aliases,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::Config("Node id must not be empty".to_string()));
        }
        match &self.kind {
            NodeKind::Llm {
                model,
                prompt_template,
                ..
            } => {
                if model.trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "Node {} is of type 'llm' but has no model specified",
                        self.id
                    )));
                }
                if prompt_template.trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "Node {} is of type 'llm' but has no prompt_template specified",
                        self.id
                    )));
                }
            }
            NodeKind::Tool { tool } => {
                if tool.trim().is_empty() {
                    return Err(PipelineError::Config(format!(
                        "Node {} is of type 'tool' but has no tool specified",
                        self.id
                    )));
                }
            }
        }
        if let OutputFormat::Schema(reference) = &self.output {
            if reference.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "Node {} has output type 'schema' but no schema specified",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A validated, immutable pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub settings: Settings,
    pub inputs: Vec<InputSpec>,
    pub nodes: Vec<NodeSpec>,
    pub output: Option<Map<String, Value>>,
}

impl Pipeline {
    /// Start a code-first pipeline definition.
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Validate a loaded configuration.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let nodes = config
            .nodes
            .into_iter()
            .map(NodeSpec::from_config)
            .collect::<Result<Vec<_>>>()?;

        let pipeline = Self {
            name: config.name,
            version: config.version,
            description: config.description,
            settings: config.settings,
            inputs: config.inputs,
            nodes,
            output: config.output,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(PipelineConfig::load(path)?)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Node ids in execution order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(PipelineError::Config(format!(
                "Pipeline '{}' must have at least one node",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(node.id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "Duplicate node id: {}",
                    node.id
                )));
            }
        }

        for node in &self.nodes {
            for (alias, source) in &node.aliases {
                if !seen.contains(source.as_str()) {
                    return Err(PipelineError::Config(format!(
                        "Node {} aliases '{}' to unknown node '{}'",
                        node.id, alias, source
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builder for code-first pipelines.
pub struct PipelineBuilder {
    name: String,
    version: String,
    description: Option<String>,
    settings: Settings,
    inputs: Vec<InputSpec>,
    nodes: Vec<NodeSpec>,
    output: Option<Map<String, Value>>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            settings: Settings::default(),
            inputs: Vec::new(),
            nodes: Vec::new(),
            output: None,
        }
    }

    /// Append a node. Nodes run in the order they are added.
    pub fn node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Declare an input (metadata only).
    pub fn input(mut self, name: impl Into<String>, required: bool) -> Self {
        self.inputs.push(InputSpec {
            name: name.into(),
            kind: Some("string".to_string()),
            description: None,
            required,
        });
        self
    }

    /// Add an entry to the output mapping template.
    pub fn output(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.output
            .get_or_insert_with(Map::new)
            .insert(name.into(), Value::String(template.into()));
        self
    }

    /// Build the pipeline, validating every node.
    pub fn build(self) -> Result<Pipeline> {
        let pipeline = Pipeline {
            name: self.name,
            version: self.version,
            description: self.description,
            settings: self.settings,
            inputs: self.inputs,
            nodes: self.nodes,
            output: self.output,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }
}
