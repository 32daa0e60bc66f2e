//! Notification payload rendering.
//!
//! Templates are JSON text with `{{alert}}` and `{{badge}}` placeholders.
//! The alert is substituted as an escaped JSON string body, the badge as a
//! bare number.

use thiserror::Error;

const ALERT_PLACEHOLDER: &str = "{{alert}}";
const BADGE_PLACEHOLDER: &str = "{{badge}}";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template is missing the {0} placeholder")]
    MissingPlaceholder(&'static str),

    #[error("rendered payload is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Payload template with alert and badge slots
#[derive(Debug, Clone)]
pub struct PayloadTemplate {
    template: String,
}

impl PayloadTemplate {
    /// Create a template, checking that it renders to valid JSON.
    pub fn new(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = Self {
            template: template.into(),
        };

        for placeholder in [ALERT_PLACEHOLDER, BADGE_PLACEHOLDER] {
            if !template.template.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder(placeholder));
            }
        }

        template.render("", 0)?;
        Ok(template)
    }

    /// Render the payload bytes for an alert text and badge count
    pub fn render(&self, alert: &str, badge: u32) -> Result<Vec<u8>, TemplateError> {
        let rendered = self
            .template
            .replace(ALERT_PLACEHOLDER, &escape_json_string(alert))
            .replace(BADGE_PLACEHOLDER, &badge.to_string());

        serde_json::from_str::<serde_json::Value>(&rendered)
            .map_err(|e| TemplateError::InvalidJson(e.to_string()))?;

        Ok(rendered.into_bytes())
    }
}

/// Escape text for use inside a JSON string literal
fn escape_json_string(text: &str) -> String {
    let quoted = serde_json::Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
