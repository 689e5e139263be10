//! Plugin generator conversation handlers for the REST API.
//!
//! Every operation is scoped to the authenticated principal; a conversation
//! id belonging to someone else behaves exactly like an unknown one.

use std::time::Instant;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use plugforge_types::chat::{ChatHistoryView, ConversationSummary, Sender};

use crate::http::error::AppError;
use crate::http::extractors::auth::Authenticated;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePluginGeneratorRequest {
    #[serde(default)]
    pub plugin_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePluginGeneratorResponse {
    pub message: String,
    pub plugin_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    pub plugin_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMessageRequest {
    #[serde(default)]
    pub plugin_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePluginRequest {
    #[serde(default)]
    pub plugin_id: String,
    #[serde(default)]
    pub generated_plugin: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn require<'a>(value: &'a str, field: &str) -> Result<&'a str, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("\"{field}\" is required")));
    }
    Ok(trimmed)
}

/// POST /api/v1/plugin/plugin-generator - Create a conversation.
pub async fn create_plugin_generator(
    State(state): State<AppState>,
    Authenticated(owner): Authenticated,
    Json(body): Json<CreatePluginGeneratorRequest>,
) -> Result<Json<ApiResponse<CreatePluginGeneratorResponse>>, AppError> {
    let start = Instant::now();
    let plugin_name = require(&body.plugin_name, "pluginName")?;

    let plugin_id = state.conversations.create(&owner, plugin_name).await?;

    Ok(Json(ApiResponse::timed(
        CreatePluginGeneratorResponse {
            message: "Plugin generator session created successfully".to_string(),
            plugin_id,
        },
        start,
    )))
}

/// GET /api/v1/plugin/plugin-generator/chat-history?plugin_id=
pub async fn get_chat_history(
    State(state): State<AppState>,
    Authenticated(owner): Authenticated,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<Json<ApiResponse<ChatHistoryView>>, AppError> {
    let start = Instant::now();
    let plugin_id = require(query.plugin_id.as_deref().unwrap_or_default(), "pluginId")?;

    let view = state.conversations.chat_history(&owner, plugin_id).await?;

    Ok(Json(ApiResponse::timed(view, start)))
}

/// POST /api/v1/plugin/plugin-generator/message - Append a chat turn.
pub async fn save_message(
    State(state): State<AppState>,
    Authenticated(owner): Authenticated,
    Json(body): Json<SaveMessageRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, AppError> {
    let start = Instant::now();
    let plugin_id = require(&body.plugin_id, "pluginId")?;
    if body.content.trim().is_empty() {
        return Err(AppError::Validation("\"content\" is required".to_string()));
    }
    let sender: Sender = body.sender.parse().map_err(AppError::Validation)?;

    state
        .conversations
        .append_message(&owner, plugin_id, &body.content, sender)
        .await?;

    Ok(Json(ApiResponse::timed(
        MessageResponse {
            message: "Message saved successfully".to_string(),
        },
        start,
    )))
}

/// POST /api/v1/plugin/plugin-generator/save-plugin - Store the final plugin.
pub async fn save_plugin(
    State(state): State<AppState>,
    Authenticated(owner): Authenticated,
    Json(body): Json<SavePluginRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, AppError> {
    let start = Instant::now();
    let plugin_id = require(&body.plugin_id, "pluginId")?;
    require(&body.generated_plugin, "generatedPlugin")?;

    state
        .conversations
        .save_plugin(&owner, plugin_id, &body.generated_plugin)
        .await?;

    Ok(Json(ApiResponse::timed(
        MessageResponse {
            message: "Generated plugin saved successfully".to_string(),
        },
        start,
    )))
}

/// GET /api/v1/plugin/plugin-generators - List the caller's conversations.
pub async fn list_plugin_generators(
    State(state): State<AppState>,
    Authenticated(owner): Authenticated,
) -> Result<Json<ApiResponse<Vec<ConversationSummary>>>, AppError> {
    let start = Instant::now();
    let summaries = state.conversations.list(&owner).await?;
    Ok(Json(ApiResponse::timed(summaries, start)))
}
