//! # Agent Pipeline
//!
//! Declarative pipelines of LLM and tool nodes, run in order against an
//! accumulating context, with typed outputs and per-thread state.
//!
//! A pipeline is a list of nodes described in JSON/YAML (or built in code).
//! Each node either renders a prompt and calls a language model, or calls a
//! registered tool. Every node sees the caller's inputs plus the outputs of
//! the nodes before it, and its own result is coerced to the declared type:
//! raw text, parsed JSON, or a value validated against a named schema.
//!
//! ## Core Concepts
//!
//! - **[`Pipeline`]** / **[`NodeSpec`]**: validated, immutable descriptors.
//! - **[`Engine`]**: binds nodes to backends and tools, then runs them with
//!   [`Engine::run`] or step by step with [`Engine::stream`].
//! - **[`ExecCtx`]**: HTTP client, provider endpoints, backend override,
//!   cancellation and event handler shared by all nodes.
//! - **[`SchemaRegistry`]** / **[`ToolRegistry`]**: resolve the schema and
//!   tool references a configuration names.
//! - **[`CheckpointStore`]**: holds each thread's [`ExecutionState`] so a
//!   second run on the same thread continues the conversation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use agent_pipeline::{Engine, Pipeline, NodeSpec};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agent_pipeline::logging::init("info");
//!
//!     let pipeline = Pipeline::builder("jokes")
//!         .node(NodeSpec::llm("joke", "gpt-4o-mini", "Tell a joke about {{ topic }}"))
//!         .node(NodeSpec::llm("critique", "gpt-4o-mini", "Critique this joke: {{ joke }}"))
//!         .node(NodeSpec::tool("log", "file_logger"))
//!         .build()?;
//!
//!     let engine = Engine::new(pipeline)?;
//!     let inputs = json!({"user_input": "Tell me a joke", "topic": "cats"});
//!     let result = engine.run(inputs.as_object().cloned().unwrap_or_default(), "thread-1").await?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod graph;
pub mod logging;
pub mod node;
pub mod output;
pub mod parsing;
pub mod prompt;
pub mod schema;
pub mod state;
pub mod tool;

pub use backend::{
    AnthropicBackend, Backend, LlmRequest, LlmResponse, MockBackend, OllamaBackend, OpenAiBackend,
    Provider,
};
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use config::{NodeKind, NodeSpec, OutputFormat, Pipeline, PipelineBuilder, PipelineConfig, Settings};
pub use engine::{Engine, EngineBuilder};
pub use error::{PipelineError, Result, SchemaError};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use graph::{Graph, Step};
pub use node::Node;
pub use output::OutputCoercer;
pub use prompt::{JinjaResolver, TemplateResolver};
pub use schema::{Field, FieldSchema, FieldType, OutputSchema, SchemaRegistry, TypedSchema};
pub use state::{ExecutionState, Message, RunStatus};
pub use tool::{FileLogger, FnTool, Tool, ToolRegistry};
