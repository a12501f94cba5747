//! Generation prompt rendering.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::DataFormat;
use crate::io::generator::GenerationRequest;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .expect("generate template should be valid");
        Self { env }
    }

    pub fn render_generate(&self, input: &GenerationRequest<'_>) -> Result<String> {
        let format = DataFormat::from_path(input.input_filename);
        let template = self.env.get_template("generate")?;
        let rendered = template.render(context! {
            task => input.task.trim(),
            input_filename => input.input_filename,
            data_path => input.data_path,
            reader => format.reader(),
            label => format.label(),
            feedback => input.feedback.map(|feedback| context! {
                error => feedback.error.trim(),
                code => feedback.code.trim(),
            }),
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
