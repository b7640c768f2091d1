use crate::definition::{Pipeline, PipelineTemplate};
use handlebars::{no_escape, Handlebars, RenderError};
use kiln_utils::{ObjectTraversal, ObjectWalker};

/// Renders `{{source}}`, `{{native}}`, `{{generated}}`, `{{jobs}}` and `{{pipeline}}`
/// in every string of a pipeline. Unknown variables are errors.
pub struct TemplateReplace<'a> {
    engine: Handlebars<'a>,
    vars: PipelineTemplate,
}

impl TemplateReplace<'_> {
    pub fn new(vars: PipelineTemplate) -> Self {
        let mut engine = Handlebars::new();
        engine.set_strict_mode(true);
        engine.register_escape_fn(no_escape);

        TemplateReplace { engine, vars }
    }
}

impl ObjectWalker for TemplateReplace<'_> {
    type Error = RenderError;

    fn enter_string(&mut self, value: &mut String) -> Result<(), RenderError> {
        if value.contains("{{") {
            *value = self.engine.render_template(value, &self.vars)?;
        }

        Ok(())
    }
}

pub fn expand_pipeline(pipeline: &mut Pipeline, jobs: usize) -> Result<(), RenderError> {
    let mut walker = TemplateReplace::new(pipeline.template_vars(jobs));
    pipeline.traverse(&mut walker)
}
