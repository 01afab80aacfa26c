mod client;
pub(crate) mod types;

pub use types::Usage;

use tracing::debug;

use crate::error::{AiError, Result};
use crate::pricing::cost_usd;
use crate::schema::StructuredOutput;

use client::ClaudeClient;
use types::*;

const STRUCTURED_TOOL: &str = "structured_response";

// =============================================================================
// Extraction
// =============================================================================

/// A structured response plus everything needed to account for the call.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub value: T,
    /// The tool input exactly as returned, before deserialization.
    pub raw: serde_json::Value,
    /// Model that served the request (the dated snapshot when the API reports one).
    pub model: String,
    pub usage: Usage,
    pub cost_usd: f64,
}

// =============================================================================
// Claude
// =============================================================================

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    base_url: Option<String>,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 2048,
            temperature: 0.7,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn client(&self) -> Result<ClaudeClient> {
        ClaudeClient::new(&self.api_key, self.base_url.as_deref())
    }

    /// Force a single tool call whose input is `T`, and report usage and cost.
    ///
    /// If the model answers in plain text instead, a fenced or bare JSON body
    /// is accepted as the structured value.
    pub async fn extract<T: StructuredOutput>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<Extraction<T>> {
        let mut request = MessagesRequest::forced(
            &self.model,
            system_prompt,
            user_prompt,
            ToolSpec {
                name: STRUCTURED_TOOL.to_string(),
                description: format!("Return the {} as structured data.", T::type_name()),
                input_schema: T::tool_schema(),
            },
        );
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;

        let response = self.client()?.messages(&request).await?;
        let model = response.model.clone().unwrap_or_else(|| self.model.clone());
        let cost = cost_usd(&model, &response.usage);

        debug!(
            model = %model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            cost_usd = cost,
            "Claude extraction complete"
        );

        let raw = match response.tool_input(STRUCTURED_TOOL) {
            Some(input) => input.clone(),
            None => {
                let text = response.first_text().ok_or_else(|| {
                    AiError::NoOutput(response.stop_reason.clone().unwrap_or_default())
                })?;
                serde_json::from_str(strip_fences(text))?
            }
        };

        let value = serde_json::from_value(raw.clone())
            .map_err(|e| AiError::Parse(format!("{}: {e}", T::type_name())))?;

        Ok(Extraction {
            value,
            raw,
            model,
            usage: response.usage,
            cost_usd: cost,
        })
    }
}

fn strip_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_new() {
        let ai = Claude::new("sk-ant-test", "claude-haiku-4-5-20251001");
        assert_eq!(ai.model(), "claude-haiku-4-5-20251001");
        assert_eq!(ai.api_key, "sk-ant-test");
        assert_eq!(ai.max_tokens, 2048);
    }

    #[test]
    fn test_builder_overrides() {
        let ai = Claude::new("k", "m")
            .with_base_url("http://localhost:9999")
            .with_max_tokens(512)
            .with_temperature(0.2);
        assert_eq!(ai.base_url.as_deref(), Some("http://localhost:9999"));
        assert_eq!(ai.max_tokens, 512);
        assert_eq!(ai.temperature, 0.2);
    }

    #[test]
    fn strip_fences_handles_json_blocks() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }
}
