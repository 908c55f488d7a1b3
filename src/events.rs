//! Event system for node lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe pipeline execution.
//! The engine emits events when nodes start and finish and when state is
//! checkpointed. Users can implement [`EventHandler`] to receive these
//! events for progress tracking or UIs; `tracing` covers plain logging.

use std::sync::Arc;

/// Events emitted while building and running a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A node has started executing.
    NodeStart {
        /// Id of the node.
        node_id: String,
        /// Node kind (`"llm"` or `"tool"`).
        kind: &'static str,
    },
    /// A node has finished executing.
    NodeEnd {
        /// Id of the node.
        node_id: String,
        /// Whether execution succeeded.
        ok: bool,
    },
    /// An LLM node was bound to the stub backend because no provider
    /// recognized its model name.
    StubBackend {
        node_id: String,
        model: String,
    },
    /// Execution state for a thread was written to the checkpoint store.
    SnapshotSaved {
        thread_id: String,
        /// Number of nodes completed so far in this run.
        completed: usize,
    },
}

/// Handler for pipeline lifecycle events.
///
/// This is entirely optional -- pipelines work without an event handler.
///
/// # Example
///
/// ```
/// use agent_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::NodeStart { node_id, .. } => println!("[start] {}", node_id),
///             Event::NodeEnd { node_id, ok } => println!("[end] {} ok={}", node_id, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the engine emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use agent_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::StubBackend { node_id, model } = event {
///         eprintln!("{} runs on the stub ({})", node_id, model);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
