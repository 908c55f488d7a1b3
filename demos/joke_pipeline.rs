//! Example: a joke generator, critic and logger pipeline.
//!
//! Runs against canned responses unless `OPENAI_API_KEY` is set, in which
//! case the nodes call the real API.
//!
//! Run with: `cargo run --example joke_pipeline -- "programming"`

use agent_pipeline::backend::MockBackend;
use agent_pipeline::{Engine, ExecCtx, NodeSpec, Pipeline, SchemaRegistry, TypedSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct JokeOutput {
    setup: String,
    punchline: String,
    humor_rating: f64,
    #[serde(default)]
    tags: Vec<String>,
}

const CANNED_JOKE: &str = r#"Here you go:
```json
{"setup": "Why do programmers prefer dark mode?",
 "punchline": "Because light attracts bugs.",
 "humor_rating": 7,
 "tags": ["programming", "pun"]}
```"#;

const CANNED_CRITIQUE: &str =
    "A tidy pun with a familiar shape. Strength: short setup. Improve: surprise the reader.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    agent_pipeline::logging::init("info");

    let topic = std::env::args().nth(1).unwrap_or_else(|| "programming".to_string());

    let pipeline = Pipeline::builder("Joke Generator Pipeline")
        .description("Generates a joke, critiques it, and logs the exchange")
        .input("topic", true)
        .node(
            NodeSpec::llm(
                "joke_generator",
                "gpt-4o-mini",
                "Tell me a joke about {{ topic }}. Reply with JSON containing \
                 setup, punchline, humor_rating (0-10) and tags.",
            )
            .with_role("Comedian")
            .with_temperature(0.9)
            .expecting_schema("JokeOutput"),
        )
        .node(
            NodeSpec::llm(
                "joke_critic",
                "gpt-4o-mini",
                "Critique this joke.\nSetup: {{ joke_generator.setup }}\n\
                 Punchline: {{ joke_generator.punchline }}",
            )
            .with_role("Critic")
            .with_system_prompt("You are a sharp but fair comedy critic. Answer in two sentences.")
            .with_temperature(0.3)
            .with_max_tokens(200),
        )
        .node(NodeSpec::tool("logger", "file_logger"))
        .output("joke", "{{ joke_generator }}")
        .output("critique", "{{ joke_critic }}")
        .build()?;

    let ctx = if std::env::var("OPENAI_API_KEY").is_ok() {
        ExecCtx::builder().from_env().build()?
    } else {
        let mock = MockBackend::new(vec![CANNED_JOKE.into(), CANNED_CRITIQUE.into()]);
        ExecCtx::builder().backend(Arc::new(mock)).build()?
    };

    let engine = Engine::builder(pipeline)
        .context(ctx)
        .schemas(SchemaRegistry::new().with("JokeOutput", TypedSchema::<JokeOutput>::new("JokeOutput")))
        .build()?;
    println!("Graph: {}", engine.graph());

    let mut inputs = Map::new();
    inputs.insert("user_input".into(), json!(format!("Tell me a joke about {topic}")));
    inputs.insert("topic".into(), Value::String(topic));

    let result = engine.run(inputs, "joke-demo").await?;
    let output = engine.render_output(&result)?;

    let joke: JokeOutput = serde_json::from_value(output["joke"].clone())?;
    println!("{}\n  {}", joke.setup, joke.punchline);
    println!("Rating: {}/10  Tags: {}", joke.humor_rating, joke.tags.join(", "));
    println!("Critique: {}", output["critique"].as_str().unwrap_or_default());
    println!("Logged to: {}", result["logger"]["log_file"]);

    Ok(())
}
