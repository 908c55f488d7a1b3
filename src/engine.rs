//! Pipeline execution engine.
//!
//! [`Engine`] owns the runtime nodes of one [`Pipeline`], the lazily built
//! [`Graph`] over them, and a [`CheckpointStore`] holding per-thread
//! [`ExecutionState`]. A run walks the graph strictly in order:
//!
//! ```text
//! load state ─► Start ─► node₀ ─► node₁ ─► … ─► End ─► mark completed
//!                          │        │
//!                       save     save          (failure: mark failed, save, stop)
//! ```
//!
//! Runs on one thread id continue that thread: an interrupted run with the
//! same inputs resumes after its last completed node, anything else starts
//! a new turn. Different thread ids never share state.

use crate::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::config::Pipeline;
use crate::context::assemble;
use crate::error::Result;
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::graph::{Graph, Step};
use crate::node::{Node, NodeDeps};
use crate::prompt::{JinjaResolver, TemplateResolver};
use crate::schema::SchemaRegistry;
use crate::state::{ExecutionState, RunStatus};
use crate::tool::ToolRegistry;
use futures::Stream;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::Instrument;

/// Runs a pipeline against per-thread state.
pub struct Engine {
    pipeline: Pipeline,
    nodes: Vec<Node>,
    graph: OnceLock<Graph>,
    ctx: Arc<ExecCtx>,
    templates: Arc<dyn TemplateResolver>,
    store: Arc<dyn CheckpointStore>,
}

/// One run in progress.
struct Run {
    thread_id: String,
    state: ExecutionState,
    step: Step,
    /// Snapshots handed out so far.
    emitted: usize,
    finished: bool,
}

impl Engine {
    /// Build an engine with default collaborators: provider settings from
    /// the environment, the built-in tools, no schemas, the Jinja template
    /// resolver and an in-memory checkpoint store.
    pub fn new(pipeline: Pipeline) -> Result<Self> {
        Self::builder(pipeline).build()
    }

    /// Load a configuration file and build an engine with defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Pipeline::load(path)?)
    }

    pub fn builder(pipeline: Pipeline) -> EngineBuilder {
        EngineBuilder {
            pipeline,
            ctx: None,
            tools: None,
            schemas: SchemaRegistry::new(),
            templates: None,
            store: None,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn context(&self) -> &ExecCtx {
        &self.ctx
    }

    /// The execution graph, built on first use.
    pub fn graph(&self) -> &Graph {
        self.graph.get_or_init(|| {
            let graph = Graph::build(&self.pipeline);
            tracing::debug!(pipeline = %self.pipeline.name, %graph, "built execution graph");
            graph
        })
    }

    /// Run every node to completion on `thread_id`.
    ///
    /// Returns node id → output for every node, in pipeline order. Inputs
    /// and the message log are not part of the result; see
    /// [`checkpoint`](Self::checkpoint) for the full state.
    pub async fn run(
        &self,
        inputs: Map<String, Value>,
        thread_id: impl Into<String>,
    ) -> Result<Map<String, Value>> {
        let thread_id = thread_id.into();
        let span = tracing::info_span!("pipeline_run", pipeline = %self.pipeline.name, thread = %thread_id);
        async move {
            let mut run = self.prepare(inputs, thread_id).await?;
            while self.advance(&mut run).await?.is_some() {}
            Ok(run.state.outputs)
        }
        .instrument(span)
        .await
    }

    /// Run step by step, yielding a snapshot of all outputs known so far
    /// after each node completes.
    ///
    /// The stream is finite and cannot be restarted. On failure it yields
    /// the error after every earlier snapshot and then ends. Its last `Ok`
    /// item equals what [`run`](Self::run) would have returned.
    pub fn stream(
        &self,
        inputs: Map<String, Value>,
        thread_id: impl Into<String>,
    ) -> impl Stream<Item = Result<Map<String, Value>>> + Send + '_ {
        enum Phase {
            Pending(Map<String, Value>, String),
            Running(Box<Run>),
            Done,
        }

        let start = Phase::Pending(inputs, thread_id.into());
        futures::stream::unfold(start, move |phase| async move {
            let mut run = match phase {
                Phase::Pending(inputs, thread_id) => match self.prepare(inputs, thread_id).await {
                    Ok(run) => Box::new(run),
                    Err(e) => return Some((Err(e), Phase::Done)),
                },
                Phase::Running(run) => run,
                Phase::Done => return None,
            };
            match self.advance(&mut run).await {
                Ok(Some(snapshot)) => Some((Ok(snapshot), Phase::Running(run))),
                Ok(None) => None,
                Err(e) => Some((Err(e), Phase::Done)),
            }
        })
    }

    /// The stored state of `thread_id`, if any.
    pub async fn checkpoint(&self, thread_id: &str) -> Result<Option<ExecutionState>> {
        self.store.load(thread_id).await
    }

    /// Evaluate the pipeline's `output` mapping against a run result.
    ///
    /// A template that is exactly `{{ node_id }}` yields that node's
    /// structured output; other string templates render to text with the
    /// result as variables; non-string entries are copied as-is. Without an
    /// output mapping the result is returned unchanged.
    pub fn render_output(&self, result: &Map<String, Value>) -> Result<Map<String, Value>> {
        let Some(mapping) = &self.pipeline.output else {
            return Ok(result.clone());
        };

        let mut rendered = Map::with_capacity(mapping.len());
        for (name, template) in mapping {
            let value = match template {
                Value::String(text) => match single_reference(text) {
                    Some(id) if result.contains_key(id) => result[id].clone(),
                    _ => Value::String(self.templates.render(text, result)?),
                },
                other => other.clone(),
            };
            rendered.insert(name.clone(), value);
        }
        Ok(rendered)
    }

    /// Load or create the thread's state for a run with `inputs`.
    async fn prepare(&self, inputs: Map<String, Value>, thread_id: String) -> Result<Run> {
        let graph = self.graph();

        let state = match self.store.load(&thread_id).await? {
            None => {
                tracing::debug!(thread = %thread_id, "new thread");
                ExecutionState::new(inputs)
            }
            Some(mut state) if state.can_resume(&inputs) => {
                tracing::info!(
                    thread = %thread_id,
                    completed = state.outputs.len(),
                    total = graph.len(),
                    "resuming interrupted run"
                );
                state.mark(RunStatus::Running);
                state
            }
            Some(mut state) => {
                state.begin_turn(inputs);
                tracing::debug!(thread = %thread_id, turn = state.turn, "continuing thread");
                state
            }
        };

        let run = Run {
            thread_id,
            state,
            step: Step::Start,
            emitted: 0,
            finished: false,
        };
        self.save(&run).await?;
        Ok(run)
    }

    /// Execute the next pending node. Returns the snapshot after it
    /// completed, or `None` once the run is over.
    async fn advance(&self, run: &mut Run) -> Result<Option<Map<String, Value>>> {
        if run.finished {
            return Ok(None);
        }
        let graph = self.graph();

        loop {
            let Step::Node(index) = graph.next(run.step) else {
                return self.finish(run).await;
            };
            run.step = Step::Node(index);

            let node = &self.nodes[index];
            if run.state.has_output(node.id()) {
                tracing::debug!(node = node.id(), "already completed; skipping");
                continue;
            }

            let spec = &self.pipeline.nodes[index];
            let context = assemble(&run.state.inputs, &run.state.outputs, &spec.aliases);

            tracing::info!(node = node.id(), kind = node.kind(), "node started");
            self.ctx.emit(Event::NodeStart {
                node_id: node.id().to_string(),
                kind: node.kind(),
            });

            return match node.process(&self.ctx, &context).await {
                Ok(output) => {
                    for (id, value) in output {
                        run.state.record(&id, value);
                    }
                    tracing::info!(node = node.id(), "node completed");
                    self.ctx.emit(Event::NodeEnd {
                        node_id: node.id().to_string(),
                        ok: true,
                    });
                    self.save(run).await?;
                    run.emitted += 1;
                    Ok(Some(run.state.outputs.clone()))
                }
                Err(err) => {
                    tracing::error!(node = node.id(), error = %err, "node failed");
                    self.ctx.emit(Event::NodeEnd {
                        node_id: node.id().to_string(),
                        ok: false,
                    });
                    run.finished = true;
                    run.state.mark(RunStatus::Failed);
                    if let Err(save_err) = self.save(run).await {
                        tracing::warn!(error = %save_err, "could not checkpoint failed run");
                    }
                    Err(err)
                }
            };
        }
    }

    async fn finish(&self, run: &mut Run) -> Result<Option<Map<String, Value>>> {
        run.finished = true;
        run.step = Step::End;
        run.state.mark(RunStatus::Completed);
        self.save(run).await?;
        tracing::info!(
            thread = %run.thread_id,
            turn = run.state.turn,
            nodes = run.state.outputs.len(),
            "run completed"
        );

        // A resumed run with nothing left to do still reports its outputs once.
        if run.emitted == 0 && !run.state.outputs.is_empty() {
            run.emitted += 1;
            return Ok(Some(run.state.outputs.clone()));
        }
        Ok(None)
    }

    async fn save(&self, run: &Run) -> Result<()> {
        self.store.save(&run.thread_id, &run.state).await?;
        tracing::debug!(
            thread = %run.thread_id,
            completed = run.state.outputs.len(),
            status = ?run.state.status,
            "checkpoint saved"
        );
        self.ctx.emit(Event::SnapshotSaved {
            thread_id: run.thread_id.clone(),
            completed: run.state.outputs.len(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("pipeline", &self.pipeline.name)
            .field("nodes", &self.nodes)
            .field("ctx", &self.ctx)
            .finish()
    }
}

/// The node id in a template of the form `{{ node_id }}`, if that is all
/// the template contains.
fn single_reference(template: &str) -> Option<&str> {
    let inner = template
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();
    let is_ident = !inner.is_empty() && inner.chars().all(|c| c.is_alphanumeric() || c == '_');
    is_ident.then_some(inner)
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    pipeline: Pipeline,
    ctx: Option<ExecCtx>,
    tools: Option<ToolRegistry>,
    schemas: SchemaRegistry,
    templates: Option<Arc<dyn TemplateResolver>>,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl EngineBuilder {
    /// Execution context. Default: `ExecCtx::builder().from_env()`.
    pub fn context(mut self, ctx: ExecCtx) -> Self {
        self.ctx = Some(ctx);
        self
    }

    /// Tool registry. Default: [`ToolRegistry::with_builtins`].
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Template resolver. Default: [`JinjaResolver`].
    pub fn templates(mut self, templates: Arc<dyn TemplateResolver>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Checkpoint store. Default: [`MemoryCheckpointStore`].
    pub fn store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bind every node. Fails before anything runs if a node cannot be
    /// bound.
    pub fn build(self) -> Result<Engine> {
        let ctx = match self.ctx {
            Some(ctx) => ctx,
            None => ExecCtx::builder().from_env().build()?,
        };
        let tools = self.tools.unwrap_or_else(ToolRegistry::with_builtins);
        let templates = self
            .templates
            .unwrap_or_else(|| Arc::new(JinjaResolver::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));

        let settings = &self.pipeline.settings;
        if settings.max_retries.is_some() || settings.cache_enabled.is_some() {
            tracing::debug!(
                max_retries = ?settings.max_retries,
                cache_enabled = ?settings.cache_enabled,
                "retry and cache settings are recorded but not acted on"
            );
        }

        let deps = NodeDeps {
            ctx: &ctx,
            tools: &tools,
            schemas: &self.schemas,
            templates: templates.clone(),
        };
        let nodes = self
            .pipeline
            .nodes
            .iter()
            .map(|spec| Node::build(spec, &deps))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            pipeline = %self.pipeline.name,
            version = %self.pipeline.version,
            nodes = nodes.len(),
            "engine built"
        );

        Ok(Engine {
            pipeline: self.pipeline,
            nodes,
            graph: OnceLock::new(),
            ctx: Arc::new(ctx),
            templates,
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::config::NodeSpec;
    use crate::tool::FnTool;
    use futures::StreamExt;
    use serde_json::json;

    fn inputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn engine(pipeline: Pipeline, responses: Vec<&str>) -> Engine {
        let mock = MockBackend::new(responses.into_iter().map(String::from).collect());
        Engine::builder(pipeline)
            .context(ExecCtx::builder().backend(Arc::new(mock)).build().unwrap())
            .tools(ToolRegistry::new().with(
                "count",
                FnTool(|ctx: &Map<String, Value>| Ok(json!(ctx.len()))),
            ))
            .build()
            .unwrap()
    }

    fn two_step() -> Pipeline {
        Pipeline::builder("two")
            .node(NodeSpec::llm("gen", "gpt-4o", "{{ user_input }}"))
            .node(NodeSpec::tool("count", "count"))
            .output("joke", "{{ gen }}")
            .output("summary", "{{ gen }} ({{ count }} keys)")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn run_returns_node_outputs_only() {
        let engine = engine(two_step(), vec!["ha"]);
        let out = engine.run(inputs(json!({"user_input": "hi"})), "t").await.unwrap();
        // count sees user_input + gen
        assert_eq!(out, inputs(json!({"gen": "ha", "count": 2})));
    }

    #[tokio::test]
    async fn stream_matches_run() {
        let engine = engine(two_step(), vec!["ha"]);
        let snapshots: Vec<_> = engine
            .stream(inputs(json!({"user_input": "hi"})), "s")
            .collect()
            .await;
        assert_eq!(snapshots.len(), 2);
        let first = snapshots[0].as_ref().unwrap();
        assert_eq!(first, &inputs(json!({"gen": "ha"})));

        let run = engine.run(inputs(json!({"user_input": "hi"})), "r").await.unwrap();
        assert_eq!(snapshots[1].as_ref().unwrap(), &run);
    }

    #[tokio::test]
    async fn render_output_keeps_structure_for_single_reference() {
        let engine = engine(two_step(), vec!["ha"]);
        let result = engine.run(inputs(json!({"user_input": "hi"})), "t").await.unwrap();
        let rendered = engine.render_output(&result).unwrap();
        assert_eq!(rendered["joke"], "ha");
        assert_eq!(rendered["summary"], "ha (2 keys)");
    }

    #[test]
    fn single_reference_detection() {
        assert_eq!(single_reference("{{ joke_generator }}"), Some("joke_generator"));
        assert_eq!(single_reference(" {{x}} "), Some("x"));
        assert_eq!(single_reference("{{ a }} and {{ b }}"), None);
        assert_eq!(single_reference("{{ a.b }}"), None);
        assert_eq!(single_reference("plain"), None);
    }

    #[tokio::test]
    async fn graph_is_built_lazily_once() {
        let engine = engine(two_step(), vec!["ha"]);
        assert!(engine.graph.get().is_none());
        let first = engine.graph() as *const Graph;
        let second = engine.graph() as *const Graph;
        assert_eq!(first, second);
        assert_eq!(engine.graph().len(), 2);
    }

    #[tokio::test]
    async fn stream_over_finished_but_unclosed_run_reports_outputs_once() {
        let mock = Arc::new(MockBackend::fixed("fresh"));
        let store = Arc::new(MemoryCheckpointStore::new());
        let engine = Engine::builder(two_step())
            .context(ExecCtx::builder().backend(mock.clone()).build().unwrap())
            .tools(ToolRegistry::new().with(
                "count",
                FnTool(|_: &Map<String, Value>| Ok(json!(-1))),
            ))
            .store(store.clone())
            .build()
            .unwrap();

        // every node finished, but the run stopped before it was marked completed
        let args = inputs(json!({"user_input": "hi"}));
        let mut interrupted = ExecutionState::new(args.clone());
        interrupted.record("gen", json!("ha"));
        interrupted.record("count", json!(2));
        store.save("t", &interrupted).await.unwrap();

        let snapshots: Vec<_> = engine.stream(args, "t").collect().await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(
            snapshots[0].as_ref().unwrap(),
            &inputs(json!({"gen": "ha", "count": 2}))
        );
        assert!(mock.prompts().is_empty());

        let state = engine.checkpoint("t").await.unwrap().unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.turn, 1);
    }
}
