//! Template Renderer - Personalizes campaign subject and body per contact

use mailramp_storage::models::Contact;
use regex::{Captures, Regex};

/// Replaces `{{first_name}}`, `{{last_name}}` and `{{email}}` placeholders.
///
/// Whitespace inside the braces is tolerated. Missing contact fields render
/// as empty strings; unknown placeholders are left untouched.
pub struct TemplateRenderer {
    placeholder: Regex,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
                .expect("placeholder pattern is valid"),
        }
    }

    /// Render a template for one contact
    pub fn render(&self, template: &str, contact: &Contact) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures<'_>| {
                match &caps[1] {
                    "first_name" => contact.first_name.clone().unwrap_or_default(),
                    "last_name" => contact.last_name.clone().unwrap_or_default(),
                    "email" => contact.email.clone(),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
