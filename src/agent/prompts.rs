//! Prompt templates

use chrono::Utc;
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{Error, Result};

/// A prompt template using Handlebars syntax
pub struct PromptTemplate {
    /// Template name
    name: String,
    /// Handlebars registry
    registry: Handlebars<'static>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();
        // Prompts are plain text, not HTML
        registry.register_escape_fn(handlebars::no_escape);

        registry
            .register_template_string(&name, template)
            .map_err(|e| Error::Internal(format!("Invalid template: {}", e)))?;

        Ok(PromptTemplate { name, registry })
    }

    /// Render the template with given data
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        self.registry
            .render(&self.name, data)
            .map_err(|e| Error::Internal(format!("Template render error: {}", e)))
    }
}

/// Values available to the prompt templates
#[derive(Debug, Clone, Serialize)]
pub struct PromptContext {
    /// Today's date, `YYYY-MM-DD`
    pub date: String,
    /// Tool rounds allowed in this turn
    pub max_tool_calls: u32,
}

impl PromptContext {
    /// Context for a turn allowing `max_tool_calls` rounds
    pub fn new(max_tool_calls: u32) -> Self {
        PromptContext {
            date: Utc::now().format("%Y-%m-%d").to_string(),
            max_tool_calls,
        }
    }
}

/// Default system prompt for the search assistant
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant with access to a web search tool. Today is {{date}}.

1. Decide what kind of question you were asked:
   - If it is common knowledge or something you already know, answer directly without searching.
   - If it involves recent events, live data or anything you are unsure about, use the search tool.

2. When you search:
   - After every search, judge whether the information is enough to answer the question.
   - If it is, stop searching and give the complete answer right away.
   - If it is not, search again for the missing parts. You may search at most {{max_tool_calls}} times.
   - Call the `terminate` tool when you have gathered enough and want to stop searching.

3. When you answer:
   - Use everything you collected to give an accurate, complete and well-organised answer.
   - Cite the sources you relied on.
   - If the search results were insufficient, say so honestly and share what you do know."#;

/// Sent after a tool round when another round is still allowed
pub const EVALUATION_PROMPT: &str = "Based on the search results so far, evaluate:
1. Is the information enough to answer the user's question?
2. If it is, give the complete answer now.
3. If it is not, search again for what is missing.";

/// Sent before the final tool-less call
pub const FINAL_ANSWER_PROMPT: &str = "You have finished searching. Using all of the information gathered above, give the user a complete and accurate answer now.";

/// Render a system prompt template (the configured one or the default)
pub fn render_system_prompt(template: Option<&str>, context: &PromptContext) -> Result<String> {
    PromptTemplate::new("system", template.unwrap_or(DEFAULT_SYSTEM_PROMPT))?.render(context)
}

/// System prompt for a turn
///
/// A caller-supplied prompt is used verbatim; only the configured or
/// built-in prompt is rendered as a template.
pub fn system_prompt(
    caller: Option<&str>,
    configured: Option<&str>,
    context: &PromptContext,
) -> Result<String> {
    match caller {
        Some(text) => Ok(text.to_string()),
        None => render_system_prompt(configured, context),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_default_prompt() {
        let context = PromptContext {
            date: "2026-01-02".to_string(),
            max_tool_calls: 4,
        };
        let prompt = render_system_prompt(None, &context).unwrap();

        assert!(prompt.contains("Today is 2026-01-02."));
        assert!(prompt.contains("at most 4 times"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn configured_template_is_rendered() {
        let prompt = system_prompt(None, Some("Be brief & exact. ({{max_tool_calls}})"), &PromptContext::new(2)).unwrap();
        assert_eq!(prompt, "Be brief & exact. (2)");
    }

    #[test]
    fn caller_prompt_is_verbatim() {
        let context = PromptContext::new(2);
        for text in [r#"Reply as JSON like {{"a": 1}}"#, "Hi {{name}}", "{{#if}}"] {
            assert_eq!(system_prompt(Some(text), Some("ignored"), &context).unwrap(), text);
        }
    }

    #[test]
    fn invalid_template_is_an_error() {
        assert!(PromptTemplate::new("broken", "{{#if}}").is_err());
    }

    #[test]
    fn template_renders_arbitrary_data() {
        let template = PromptTemplate::new("greet", "Hello {{name}}").unwrap();
        assert_eq!(template.render(&json!({"name": "world"})).unwrap(), "Hello world");
    }
}
