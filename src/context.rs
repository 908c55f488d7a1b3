//! Context assembly: what a node sees when it runs.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Build the mapping passed to a node.
///
/// Caller inputs first, then one entry per completed node keyed by its id
/// (a node output shadows an input of the same name), then the node's
/// aliases for every source that has produced output. Inputs are never
/// mutated; the result is a fresh map.
pub fn assemble(
    inputs: &Map<String, Value>,
    outputs: &Map<String, Value>,
    aliases: &BTreeMap<String, String>,
) -> Map<String, Value> {
    let mut context = inputs.clone();
    for (node_id, output) in outputs {
        context.insert(node_id.clone(), output.clone());
    }
    for (alias, source) in aliases {
        if let Some(output) = outputs.get(source) {
            context.insert(alias.clone(), output.clone());
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn merges_inputs_and_outputs() {
        let ctx = assemble(
            &map(json!({"topic": "t"})),
            &map(json!({"A": "x"})),
            &BTreeMap::new(),
        );
        assert_eq!(ctx, map(json!({"topic": "t", "A": "x"})));
    }

    #[test]
    fn aliases_only_for_completed_sources() {
        let aliases: BTreeMap<_, _> = [
            ("novel_1".to_string(), "novel_creator".to_string()),
            ("novel_2".to_string(), "novel_combiner".to_string()),
        ]
        .into_iter()
        .collect();

        let ctx = assemble(
            &Map::new(),
            &map(json!({"novel_creator": {"title": "T"}})),
            &aliases,
        );
        assert_eq!(ctx["novel_1"], json!({"title": "T"}));
        assert!(!ctx.contains_key("novel_2"));
    }

    #[test]
    fn output_shadows_input_of_same_name() {
        let ctx = assemble(
            &map(json!({"draft": "input"})),
            &map(json!({"draft": "node"})),
            &BTreeMap::new(),
        );
        assert_eq!(ctx["draft"], "node");
    }

    #[test]
    fn deterministic() {
        let inputs = map(json!({"b": 1, "a": 2}));
        let outputs = map(json!({"n2": 3, "n1": 4}));
        let first = assemble(&inputs, &outputs, &BTreeMap::new());
        let second = assemble(&inputs, &outputs, &BTreeMap::new());
        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            second.keys().collect::<Vec<_>>()
        );
    }
}
