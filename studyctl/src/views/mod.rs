//! Server-rendered pages.
//!
//! Handlers never touch the template engine directly: they ask the [`TemplateRenderer`] held in
//! the application state for a named page.

use crate::errors::Error;
use minijinja::Environment;
use serde_json::Value;
use tracing::{error, instrument};

pub const ICON_PAGE: &str = "icon.html";

/// Renders a named page with a JSON context.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, context: Value) -> Result<String, Error>;
}

/// Renderer backed by `minijinja`, with templates compiled into the binary.
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl MiniJinjaRenderer {
    pub fn new() -> Result<Self, Error> {
        let mut env = Environment::new();
        env.add_template(ICON_PAGE, include_str!("../../templates/icon.html"))
            .map_err(|e| {
                error!(error = %e, "Failed to compile template");
                Error::Internal {
                    operation: format!("compile template {ICON_PAGE}"),
                }
            })?;
        Ok(Self { env })
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    #[instrument(skip(self, context))]
    fn render(&self, name: &str, context: Value) -> Result<String, Error> {
        let render_error = |e: minijinja::Error| {
            error!(error = %e, "Failed to render template");
            Error::Internal {
                operation: format!("render template {name}"),
            }
        };
        let template = self.env.get_template(name).map_err(render_error)?;
        template.render(context).map_err(render_error)
    }
}
