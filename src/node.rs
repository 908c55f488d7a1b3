//! Runtime nodes.
//!
//! A [`Node`] is bound 1:1 to a [`NodeSpec`] at build time, owning its
//! backend or tool handle and its output coercer. Processing a node never
//! mutates the context it is given and always yields a single-entry map
//! `{node_id: output}`; every failure is attributed to the node via
//! [`PipelineError::Node`].

use crate::backend::{Backend, LlmRequest};
use crate::config::{NodeKind, NodeSpec};
use crate::error::Result;
use crate::exec_ctx::ExecCtx;
use crate::output::OutputCoercer;
use crate::prompt::TemplateResolver;
use crate::schema::SchemaRegistry;
use crate::tool::{Tool, ToolRegistry};
use crate::PipelineError;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Everything a node needs from its surroundings at build time.
pub struct NodeDeps<'a> {
    pub ctx: &'a ExecCtx,
    pub tools: &'a ToolRegistry,
    pub schemas: &'a SchemaRegistry,
    pub templates: Arc<dyn TemplateResolver>,
}

/// A node that renders a prompt and asks a language model.
pub struct LlmNode {
    id: String,
    model: String,
    prompt_template: String,
    system_prompt: Option<String>,
    temperature: f64,
    max_tokens: Option<u32>,
    backend: Arc<dyn Backend>,
    templates: Arc<dyn TemplateResolver>,
    coercer: OutputCoercer,
}

impl LlmNode {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn run(&self, ctx: &ExecCtx, context: &Map<String, Value>) -> Result<Value> {
        let mut request = LlmRequest::new(
            &self.model,
            self.templates.render(&self.prompt_template, context)?,
            self.temperature,
        );
        if let Some(template) = &self.system_prompt {
            request.system_prompt = Some(self.templates.render(template, context)?);
        }
        request.max_tokens = self.max_tokens;

        tracing::debug!(
            node = %self.id,
            backend = self.backend.name(),
            model = %self.model,
            prompt_chars = request.prompt.len(),
            "invoking LLM"
        );
        let response = self.backend.complete(&ctx.client, &request).await?;
        tracing::debug!(
            node = %self.id,
            status = response.status,
            response_chars = response.text.len(),
            usage = ?response.metadata.as_ref().and_then(|m| m.get("usage")),
            "LLM responded"
        );

        self.coercer.coerce_text(&response.text)
    }
}

/// A node that calls a registered tool with its context.
pub struct ToolNode {
    id: String,
    reference: String,
    tool: Arc<dyn Tool>,
    coercer: OutputCoercer,
}

impl ToolNode {
    pub fn reference(&self) -> &str {
        &self.reference
    }

    async fn run(&self, context: &Map<String, Value>) -> Result<Value> {
        tracing::debug!(node = %self.id, tool = %self.reference, "invoking tool");
        let value = self.tool.call(context).await?;
        self.coercer.coerce_value(value)
    }
}

/// A runtime node: the closed set of node kinds.
pub enum Node {
    Llm(LlmNode),
    Tool(ToolNode),
}

impl Node {
    /// Bind `spec` to its backend or tool and resolve its output schema.
    ///
    /// Fails with [`PipelineError::Tool`] for an unknown tool reference,
    /// [`PipelineError::Schema`] for an unknown schema reference, and
    /// [`PipelineError::Config`] when strict mode rejects the model.
    pub fn build(spec: &NodeSpec, deps: &NodeDeps<'_>) -> Result<Self> {
        let coercer = OutputCoercer::new(&spec.output, deps.schemas)?;

        let node = match &spec.kind {
            NodeKind::Llm {
                model,
                prompt_template,
                temperature,
                system_prompt,
                max_tokens,
            } => Node::Llm(LlmNode {
                id: spec.id.clone(),
                model: model.clone(),
                prompt_template: prompt_template.clone(),
                system_prompt: system_prompt.clone(),
                temperature: *temperature,
                max_tokens: *max_tokens,
                backend: deps.ctx.backend_for(&spec.id, model)?,
                templates: deps.templates.clone(),
                coercer,
            }),
            NodeKind::Tool { tool } => Node::Tool(ToolNode {
                id: spec.id.clone(),
                reference: tool.clone(),
                tool: deps.tools.resolve(tool)?,
                coercer,
            }),
        };
        Ok(node)
    }

    pub fn id(&self) -> &str {
        match self {
            Node::Llm(n) => &n.id,
            Node::Tool(n) => &n.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Llm(_) => "llm",
            Node::Tool(_) => "tool",
        }
    }

    /// Run the node against `context`, returning `{id: output}`.
    pub async fn process(
        &self,
        ctx: &ExecCtx,
        context: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let result = match ctx.check_cancelled() {
            Err(e) => Err(e),
            Ok(()) => match self {
                Node::Llm(node) => node.run(ctx, context).await,
                Node::Tool(node) => node.run(context).await,
            },
        };

        match result {
            Ok(output) => {
                let mut out = Map::with_capacity(1);
                out.insert(self.id().to_string(), output);
                Ok(out)
            }
            Err(e) => Err(PipelineError::in_node(self.id(), e)),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Llm(n) => f
                .debug_struct("LlmNode")
                .field("id", &n.id)
                .field("model", &n.model)
                .field("backend", &n.backend.name())
                .field("coercer", &n.coercer)
                .finish(),
            Node::Tool(n) => f
                .debug_struct("ToolNode")
                .field("id", &n.id)
                .field("tool", &n.reference)
                .field("coercer", &n.coercer)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, STUB_RESPONSE};
    use crate::error::SchemaError;
    use crate::prompt::JinjaResolver;
    use crate::schema::{Field, FieldSchema, FieldType};
    use crate::tool::FnTool;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ctx_with(mock: Arc<MockBackend>) -> ExecCtx {
        ExecCtx::builder().backend(mock).build().unwrap()
    }

    fn build(
        spec: &NodeSpec,
        ctx: &ExecCtx,
        tools: &ToolRegistry,
        schemas: &SchemaRegistry,
    ) -> Result<Node> {
        let deps = NodeDeps {
            ctx,
            tools,
            schemas,
            templates: Arc::new(JinjaResolver::new()),
        };
        Node::build(spec, &deps)
    }

    fn context() -> Map<String, Value> {
        json!({"user_input": "hi", "topic": "owls"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn llm_node_renders_prompt_and_returns_single_key() {
        let mock = Arc::new(MockBackend::fixed("a joke"));
        let ctx = ctx_with(mock.clone());
        let spec = NodeSpec::llm("gen", "gpt-4o-mini", "Joke about {{ topic }}");
        let node = build(&spec, &ctx, &ToolRegistry::new(), &SchemaRegistry::new()).unwrap();

        let before = context();
        let out = node.process(&ctx, &before).await.unwrap();
        assert_eq!(out, json!({"gen": "a joke"}).as_object().cloned().unwrap());
        assert_eq!(mock.prompts(), vec!["Joke about owls"]);
        assert_eq!(before, context());
    }

    #[tokio::test]
    async fn system_prompt_and_token_cap_reach_backend() {
        let mock = Arc::new(MockBackend::fixed("meh"));
        let ctx = ctx_with(mock.clone());
        let spec = NodeSpec::llm("critic", "claude-3-haiku", "Critique: {{ user_input }}")
            .with_role("Critic")
            .with_system_prompt("You review jokes about {{ topic }}.")
            .with_temperature(0.2)
            .with_max_tokens(300);
        let node = build(&spec, &ctx, &ToolRegistry::new(), &SchemaRegistry::new()).unwrap();
        node.process(&ctx, &context()).await.unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "claude-3-haiku");
        assert_eq!(requests[0].prompt, "Critique: hi");
        assert_eq!(
            requests[0].system_prompt.as_deref(),
            Some("You review jokes about owls.")
        );
        assert_eq!(requests[0].temperature, 0.2);
        assert_eq!(requests[0].max_tokens, Some(300));

        let plain = build(
            &NodeSpec::llm("gen", "gpt-4o", "x").with_role("Comedian"),
            &ctx,
            &ToolRegistry::new(),
            &SchemaRegistry::new(),
        )
        .unwrap();
        plain.process(&ctx, &context()).await.unwrap();
        assert_eq!(mock.requests()[1].system_prompt, None);
        assert_eq!(mock.requests()[1].max_tokens, None);
    }

    #[tokio::test]
    async fn unknown_model_falls_back_to_stub() {
        let ctx = ExecCtx::builder().build().unwrap();
        let spec = NodeSpec::llm("gen", "some-local-model", "{{ user_input }}");
        let node = build(&spec, &ctx, &ToolRegistry::new(), &SchemaRegistry::new()).unwrap();
        assert!(matches!(&node, Node::Llm(n) if n.backend_name() == "mock"));

        let out = node.process(&ctx, &context()).await.unwrap();
        assert_eq!(out["gen"], STUB_RESPONSE);
    }

    #[tokio::test]
    async fn json_output_failure_names_node() {
        let ctx = ctx_with(Arc::new(MockBackend::stub()));
        let spec = NodeSpec::llm("gen", "gpt-4o", "x").expecting_json();
        let node = build(&spec, &ctx, &ToolRegistry::new(), &SchemaRegistry::new()).unwrap();

        let err = node.process(&ctx, &context()).await.unwrap_err();
        assert_eq!(err.node_id(), Some("gen"));
        assert!(err.to_string().contains("not valid structured data"));
    }

    #[tokio::test]
    async fn schema_output_validates() {
        let schemas = SchemaRegistry::new().with(
            "joke",
            FieldSchema::new("JokeOutput").field(Field::required("setup", FieldType::String)),
        );
        let ctx = ctx_with(Arc::new(MockBackend::fixed(r#"{"punchline": "P"}"#)));
        let spec = NodeSpec::llm("gen", "gpt-4o", "x").expecting_schema("joke");
        let node = build(&spec, &ctx, &ToolRegistry::new(), &schemas).unwrap();

        let err = node.process(&ctx, &context()).await.unwrap_err();
        assert_eq!(err.node_id(), Some("gen"));
        assert!(matches!(err.schema_error(), Some(SchemaError::Invalid { .. })));
    }

    #[tokio::test]
    async fn prompt_error_is_wrapped() {
        let ctx = ctx_with(Arc::new(MockBackend::stub()));
        let spec = NodeSpec::llm("gen", "gpt-4o", "{% for %}");
        let node = build(&spec, &ctx, &ToolRegistry::new(), &SchemaRegistry::new()).unwrap();

        let err = node.process(&ctx, &context()).await.unwrap_err();
        assert!(matches!(err.root_cause(), PipelineError::Prompt { .. }));
    }

    #[tokio::test]
    async fn tool_node_passes_context() {
        let tools = ToolRegistry::new().with(
            "echo_topic",
            FnTool(|ctx: &Map<String, Value>| Ok(ctx["topic"].clone())),
        );
        let ctx = ExecCtx::builder().build().unwrap();
        let node = build(
            &NodeSpec::tool("t", "echo_topic"),
            &ctx,
            &tools,
            &SchemaRegistry::new(),
        )
        .unwrap();

        let out = node.process(&ctx, &context()).await.unwrap();
        assert_eq!(out["t"], "owls");
        assert_eq!(node.kind(), "tool");
    }

    #[tokio::test]
    async fn tool_failure_is_node_error() {
        let tools = ToolRegistry::new().with(
            "boom",
            FnTool(|_: &Map<String, Value>| Err(anyhow::anyhow!("disk on fire"))),
        );
        let ctx = ExecCtx::builder().build().unwrap();
        let node = build(
            &NodeSpec::tool("t", "boom"),
            &ctx,
            &tools,
            &SchemaRegistry::new(),
        )
        .unwrap();

        let err = node.process(&ctx, &context()).await.unwrap_err();
        assert_eq!(err.node_id(), Some("t"));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[test]
    fn unresolvable_references_fail_build() {
        let ctx = ExecCtx::builder().build().unwrap();
        let err = build(
            &NodeSpec::tool("t", "missing"),
            &ctx,
            &ToolRegistry::new(),
            &SchemaRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Tool { .. }));

        let err = build(
            &NodeSpec::llm("g", "gpt-4o", "x").expecting_schema("nope"),
            &ctx,
            &ToolRegistry::new(),
            &SchemaRegistry::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.schema_error(),
            Some(SchemaError::Unresolvable { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let flag = Arc::new(AtomicBool::new(true));
        let ctx = ExecCtx::builder()
            .backend(Arc::new(MockBackend::stub()))
            .cancellation(flag.clone())
            .build()
            .unwrap();
        let node = build(
            &NodeSpec::llm("gen", "gpt-4o", "x"),
            &ctx,
            &ToolRegistry::new(),
            &SchemaRegistry::new(),
        )
        .unwrap();

        let err = node.process(&ctx, &context()).await.unwrap_err();
        assert!(matches!(err.root_cause(), PipelineError::Cancelled));
        flag.store(false, Ordering::Relaxed);
        assert!(node.process(&ctx, &context()).await.is_ok());
    }
}
