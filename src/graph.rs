//! Sequential execution graph.
//!
//! [`Graph`] wires a pipeline's nodes into a single chain,
//! `Start → n₀ → n₁ → … → End`, in configuration order. There is no
//! branching: every step has exactly one successor.

use crate::config::Pipeline;
use std::fmt;

/// A position in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Start,
    /// Index into the pipeline's node list.
    Node(usize),
    End,
}

/// A linear chain over a pipeline's nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    order: Vec<String>,
}

impl Graph {
    /// Build the chain for `pipeline`. Pure: the same pipeline always
    /// yields an equal graph.
    pub fn build(pipeline: &Pipeline) -> Self {
        Self {
            order: pipeline.node_ids().map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node id at a step, if the step is a node.
    pub fn node_id(&self, step: Step) -> Option<&str> {
        match step {
            Step::Node(i) => self.order.get(i).map(String::as_str),
            Step::Start | Step::End => None,
        }
    }

    /// The single successor of `step`. `End` is its own successor.
    pub fn next(&self, step: Step) -> Step {
        let candidate = match step {
            Step::Start => 0,
            Step::Node(i) => i + 1,
            Step::End => return Step::End,
        };
        if candidate < self.order.len() {
            Step::Node(candidate)
        } else {
            Step::End
        }
    }

    /// All edges, from `Start` to `End`.
    pub fn edges(&self) -> Vec<(Step, Step)> {
        let mut edges = Vec::with_capacity(self.order.len() + 1);
        let mut step = Step::Start;
        while step != Step::End {
            let next = self.next(step);
            edges.push((step, next));
            step = next;
        }
        edges
    }

    /// Node steps in execution order.
    pub fn nodes(&self) -> impl Iterator<Item = (Step, &str)> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, id)| (Step::Node(i), id.as_str()))
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "START")?;
        for id in &self.order {
            write!(f, " -> {}", id)?;
        }
        write!(f, " -> END")
    }
}
