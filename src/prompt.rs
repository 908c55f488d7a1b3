//! Prompt template resolution.
//!
//! A [`TemplateResolver`] turns a template reference plus a variable mapping
//! into prompt text. [`JinjaResolver`] is the default: references naming an
//! existing file are loaded from disk, anything else is rendered inline.

use crate::error::Result;
use crate::parsing::snippet;
use crate::PipelineError;
use minijinja::Environment;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Resolves a template reference against variables.
pub trait TemplateResolver: Send + Sync {
    /// Render `template` with `vars`. Failures are [`PipelineError::Prompt`].
    fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String>;
}

/// Jinja-syntax resolver backed by `minijinja`.
///
/// A reference is looked up, in order, as a path (absolute or relative to
/// the working directory), as a path relative to the templates directory,
/// and finally treated as the template source itself. Undefined variables
/// render as empty strings.
///
/// # Example
///
/// ```
/// use agent_pipeline::prompt::{JinjaResolver, TemplateResolver};
/// use serde_json::{json, Map};
///
/// let vars: Map<_, _> = json!({"topic": "cats"}).as_object().unwrap().clone();
/// let text = JinjaResolver::new().render("Tell me a joke about {{ topic }}", &vars).unwrap();
/// assert_eq!(text, "Tell me a joke about cats");
/// ```
#[derive(Debug, Clone, Default)]
pub struct JinjaResolver {
    templates_dir: Option<PathBuf>,
}

impl JinjaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also look for template files under `dir`.
    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.templates_dir = Some(dir.into());
        self
    }

    /// Find the file a reference names, if any.
    fn locate(&self, reference: &str) -> Option<PathBuf> {
        // Template sources routinely span lines; paths don't.
        if reference.contains('\n') || reference.contains("{{") || reference.contains("{%") {
            return None;
        }
        let direct = Path::new(reference);
        if direct.is_file() {
            return Some(direct.to_path_buf());
        }
        self.templates_dir
            .as_ref()
            .map(|dir| dir.join(reference))
            .filter(|p| p.is_file())
    }

    fn load_source(&self, reference: &str) -> Result<String> {
        match self.locate(reference) {
            Some(path) => std::fs::read_to_string(&path).map_err(|e| PipelineError::Prompt {
                template: snippet(reference, 80),
                message: format!("cannot read {}: {}", path.display(), e),
            }),
            None => Ok(reference.to_string()),
        }
    }
}

impl TemplateResolver for JinjaResolver {
    fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String> {
        let source = self.load_source(template)?;
        let prompt_error = |e: minijinja::Error| PipelineError::Prompt {
            template: snippet(template, 80),
            message: format!("{:#}", e),
        };

        let mut env = Environment::new();
        env.add_template("prompt", &source).map_err(prompt_error)?;
        let tmpl = env.get_template("prompt").map_err(prompt_error)?;
        tmpl.render(minijinja::Value::from_serialize(vars))
            .map_err(prompt_error)
    }
}
