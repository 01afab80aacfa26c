//! Wire shapes for the Anthropic Messages API, limited to what structured
//! extraction needs: one user turn, one forced tool, usage accounting.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Turn {
    pub role: &'static str,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ToolChoice {
    Tool { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Turn>,
    pub temperature: f32,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
}

impl MessagesRequest {
    /// A request that must answer by calling `tool`.
    pub fn forced(
        model: &str,
        system: impl Into<String>,
        user: impl Into<String>,
        tool: ToolSpec,
    ) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: 2048,
            system: system.into(),
            messages: vec![Turn::user(user)],
            temperature: 0.7,
            tool_choice: ToolChoice::Tool {
                name: tool.name.clone(),
            },
            tools: vec![tool],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Block {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagesResponse {
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<Block>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl MessagesResponse {
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            Block::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn tool_input(&self, tool: &str) -> Option<&serde_json::Value> {
        self.content.iter().find_map(|block| match block {
            Block::ToolUse { name, input } if name == tool => Some(input),
            _ => None,
        })
    }
}

/// Token usage reported by the Messages API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
