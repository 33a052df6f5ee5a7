use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

// ===================================================================
// Shared Enums
// ===================================================================

/// How a session was started (used by SessionStart).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    Startup,
    Resume,
    Clear,
    Compact,
    Other(String),
}

impl SessionSource {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "startup" => Self::Startup,
            "resume" => Self::Resume,
            "clear" => Self::Clear,
            "compact" => Self::Compact,
            other => Self::Other(other.to_string()),
        }
    }
}

// ===================================================================
// Hook Input (received via stdin, snake_case JSON)
// ===================================================================

/// Raw hook payload as the host writes it.
///
/// Every field is optional: the host does not send the same set for every
/// event, and `hook_event_name` is not reliable enough to tag on, so the
/// payload is decoded flat and classified by shape in [`Event::classify`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

// ===================================================================
// Classified events
// ===================================================================

/// The payload of a tool call, shared by PreToolUse and PostToolUse.
#[derive(Debug, Clone, Default)]
pub struct ToolEvent {
    pub tool_name: String,
    /// Keys iterate in lexicographic order (serde_json's default map).
    pub tool_input: Map<String, Value>,
    pub tool_response: ToolResponse,
    pub transcript_path: Option<PathBuf>,
    pub tool_use_id: Option<String>,
}

/// `tool_response` is either plain text or an object of named fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolResponse {
    #[default]
    Missing,
    Text(String),
    Fields(Map<String, Value>),
}

/// Key used when a plain-text tool response is treated as a field map.
pub const TOOL_RESPONSE_KEY: &str = "tool_response";

impl ToolResponse {
    fn from_value(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::String(s)) => Self::Text(s),
            Some(Value::Object(map)) => Self::Fields(map),
            Some(other) => Self::Text(other.to_string()),
        }
    }

    /// View the response as a field map. Plain text becomes a single
    /// `tool_response` field.
    pub fn into_fields(self) -> Map<String, Value> {
        match self {
            Self::Missing => Map::new(),
            Self::Text(s) => {
                let mut map = Map::new();
                map.insert(TOOL_RESPONSE_KEY.to_string(), Value::String(s));
                map
            }
            Self::Fields(map) => map,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PromptEvent {
    pub prompt: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionStartEvent {
    pub source: SessionSource,
    pub session_id: Option<String>,
}

/// A hook event after shape-based classification.
#[derive(Debug, Clone)]
pub enum Event {
    PreToolUse(ToolEvent),
    PostToolUse(ToolEvent),
    UserPromptSubmit(PromptEvent),
    SessionStart(SessionStartEvent),
}

impl Event {
    /// Classify a raw payload. The first test that holds wins:
    /// `prompt` → UserPromptSubmit, `source` → SessionStart,
    /// `tool_response` (or an explicit PostToolUse name) → PostToolUse,
    /// anything else → PreToolUse.
    pub fn classify(input: HookInput) -> Self {
        if let Some(prompt) = input.prompt {
            return Self::UserPromptSubmit(PromptEvent {
                prompt,
                session_id: input.session_id,
            });
        }
        if let Some(source) = input.source {
            return Self::SessionStart(SessionStartEvent {
                source: SessionSource::parse(&source),
                session_id: input.session_id,
            });
        }
        let is_post = input.tool_response.is_some()
            || input.hook_event_name.as_deref() == Some("PostToolUse");

        let tool = ToolEvent {
            tool_name: input.tool_name.unwrap_or_default(),
            tool_input: match input.tool_input {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            },
            tool_response: ToolResponse::from_value(input.tool_response),
            transcript_path: input
                .transcript_path
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            tool_use_id: input.tool_use_id.filter(|id| !id.is_empty()),
        };
        if is_post {
            Self::PostToolUse(tool)
        } else {
            Self::PreToolUse(tool)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PreToolUse(_) => "PreToolUse",
            Self::PostToolUse(_) => "PostToolUse",
            Self::UserPromptSubmit(_) => "UserPromptSubmit",
            Self::SessionStart(_) => "SessionStart",
        }
    }
}

// ===================================================================
// Hook Output Types (written to stdout as JSON, camelCase)
// ===================================================================

/// Top-level JSON hook output.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Set to `"block"` to prevent the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,

    /// Explanation shown when `decision` is `"block"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Event-specific output fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

/// Event-specific output, tagged by `hookEventName`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "hookEventName")]
pub enum HookSpecificOutput {
    SessionStart(AdditionalContext),
    UserPromptSubmit(AdditionalContext),
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalContext {
    pub additional_context: String,
}

/// What a handler decided. Rendered to stdout by [`Response::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Allow, print nothing.
    Allow,
    /// Advisory text printed as-is.
    Message(String),
    /// Context injected through `hookSpecificOutput`.
    SessionContext(String),
    PromptContext(String),
    /// `{"decision":"block","reason":...}`
    Block(String),
}

impl Response {
    /// Serialize for stdout. `None` means print nothing.
    pub fn render(&self) -> Result<Option<String>, serde_json::Error> {
        let output = match self {
            Self::Allow => return Ok(None),
            Self::Message(msg) if msg.is_empty() => return Ok(None),
            Self::Message(msg) => return Ok(Some(msg.clone())),
            Self::SessionContext(text) => HookOutput {
                hook_specific_output: Some(HookSpecificOutput::SessionStart(AdditionalContext {
                    additional_context: text.clone(),
                })),
                ..Default::default()
            },
            Self::PromptContext(text) => HookOutput {
                hook_specific_output: Some(HookSpecificOutput::UserPromptSubmit(
                    AdditionalContext {
                        additional_context: text.clone(),
                    },
                )),
                ..Default::default()
            },
            Self::Block(reason) => HookOutput {
                decision: Some("block".into()),
                reason: Some(reason.clone()),
                ..Default::default()
            },
        };
        serde_json::to_string(&output).map(Some)
    }
}
