//! Wire protocol types for both sides of the relay.
//!
//! - **Client side**: inbound `{"message": "..."}` frames and the outbound
//!   [`ServerMessage`] shapes (`status`, `setupComplete`, `response`, `error`).
//! - **Upstream side**: the Live API `setup` and `clientContent` frames sent
//!   to the model, and [`UpstreamEvent`], the sum type every inbound model
//!   frame is decoded into exactly once at the transport boundary.

use serde::{Deserialize, Serialize};

use crate::error::ClientProtocolError;

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

/// Outgoing frame to the client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// `{"status": "connected"}` once the upstream socket is open.
    Status { status: String },
    /// `{"setupComplete": {}}` once the upstream acknowledged setup.
    SetupComplete {
        #[serde(rename = "setupComplete")]
        setup_complete: EmptyObject,
    },
    /// `{"response": "...", "isFinal": true?}` for a completed model turn.
    Response {
        response: String,
        #[serde(rename = "isFinal", default, skip_serializing_if = "Option::is_none")]
        is_final: Option<bool>,
    },
    /// `{"error": "..."}`.
    Error { error: String },
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::Status {
            status: "connected".to_string(),
        }
    }

    pub fn setup_complete() -> Self {
        ServerMessage::SetupComplete {
            setup_complete: EmptyObject {},
        }
    }

    pub fn response(text: impl Into<String>) -> Self {
        ServerMessage::Response {
            response: text.into(),
            is_final: None,
        }
    }

    pub fn final_artifact(code: impl Into<String>) -> Self {
        ServerMessage::Response {
            response: code.into(),
            is_final: Some(true),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    /// Whether this is an `{error}` frame.
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }
}

/// Extract the user text from a raw client frame.
///
/// Accepts `{"message": "<non-blank string>"}`. A `null` or empty `message`
/// counts as missing; a non-string one is rejected; whitespace-only text is
/// rejected as empty. The returned text is passed on untrimmed.
pub fn parse_client_message(raw: &str) -> Result<String, ClientProtocolError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ClientProtocolError::InvalidJson(e.to_string()))?;

    let message = match value.get("message") {
        None | Some(serde_json::Value::Null) => return Err(ClientProtocolError::MissingMessage),
        Some(serde_json::Value::String(s)) if s.is_empty() => {
            return Err(ClientProtocolError::MissingMessage);
        }
        Some(serde_json::Value::String(s)) => s,
        Some(_) => return Err(ClientProtocolError::NotAString),
    };

    if message.trim().is_empty() {
        return Err(ClientProtocolError::EmptyMessage);
    }

    Ok(message.clone())
}

// ---------------------------------------------------------------------------
// Upstream side: outbound
// ---------------------------------------------------------------------------

/// Inline binary payload inside a content part (audio, images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One content part. Only text parts matter to the relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    /// The text of a pure, non-empty text part; `None` for data parts.
    pub fn text_content(&self) -> Option<&str> {
        if self.inline_data.is_some() {
            return None;
        }
        self.text.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: SystemInstruction,
}

/// `{"setup": {...}}`, the first frame on a new upstream connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupMessage {
    pub setup: LiveSetup,
}

impl SetupMessage {
    /// Text-only setup for `model` with the given system instruction.
    pub fn text_only(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            setup: LiveSetup {
                model: model.into(),
                generation_config: GenerationConfig {
                    response_modalities: "text".to_string(),
                },
                system_instruction: SystemInstruction {
                    parts: vec![Part::text(system_prompt)],
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// `{"clientContent": {...}}`, one submitted user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContentMessage {
    pub client_content: ClientContent,
}

impl ClientContentMessage {
    /// A complete single-part user turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            client_content: ClientContent {
                turns: vec![Content {
                    role: "user".to_string(),
                    parts: vec![Part::text(text)],
                }],
                turn_complete: true,
            },
        }
    }

    /// Concatenated text of every part, for logging and assertions.
    pub fn text(&self) -> String {
        self.client_content
            .turns
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

/// A frame the relay sends upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamRequest {
    Setup(SetupMessage),
    Turn(ClientContentMessage),
}

impl UpstreamRequest {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            UpstreamRequest::Setup(setup) => serde_json::to_string(setup),
            UpstreamRequest::Turn(turn) => serde_json::to_string(turn),
        }
    }
}

// ---------------------------------------------------------------------------
// Upstream side: inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ModelTurnWire {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContentWire {
    model_turn: Option<ModelTurnWire>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
}

/// A decoded inbound frame from the upstream model.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The model acknowledged the setup frame.
    SetupComplete,
    /// Partial or final model output. A frame may carry parts, the
    /// turn-complete flag, or both.
    ModelTurn {
        parts: Vec<Part>,
        turn_complete: bool,
        interrupted: bool,
    },
    /// Any other well-formed frame (tool calls, usage metadata, ...).
    Unrecognized(serde_json::Value),
}

impl UpstreamEvent {
    /// Decode a raw JSON frame. Fails only on malformed JSON or a
    /// `serverContent` payload of the wrong shape.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        if value.get("setupComplete").is_some() {
            return Ok(UpstreamEvent::SetupComplete);
        }

        if let Some(content) = value.get("serverContent") {
            let content: ServerContentWire = serde_json::from_value(content.clone())?;
            return Ok(UpstreamEvent::ModelTurn {
                parts: content.model_turn.map(|t| t.parts).unwrap_or_default(),
                turn_complete: content.turn_complete,
                interrupted: content.interrupted,
            });
        }

        Ok(UpstreamEvent::Unrecognized(value))
    }
}
