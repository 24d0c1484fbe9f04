//! HTTP API endpoints.
//!
//! Thin wrappers around the content oracle and the LLM providers for
//! clients that want prompts without joining a session.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::llm::GenerateRequest;
use crate::state::AppState;
use crate::types::GameKind;

/// Response for a freshly generated Spy prompt pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpyPromptResponse {
    pub base_prompt: String,
    pub imposter_prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub response: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Generate a base/imposter prompt pair.
///
/// GET /api/spy-prompt
pub async fn spy_prompt(State(state): State<Arc<AppState>>) -> Response {
    match state.oracle.challenge(GameKind::Spy).await {
        Ok(challenge) => match challenge.imposter_prompt {
            Some(imposter_prompt) => Json(SpyPromptResponse {
                base_prompt: challenge.base_prompt,
                imposter_prompt,
            })
            .into_response(),
            None => {
                tracing::error!("Oracle returned a Spy challenge without imposter prompt");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate prompts.")
            }
        },
        Err(e) => {
            tracing::error!("Spy prompt generation failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate prompts.")
        }
    }
}

/// Forward a free-form prompt to the first available provider.
///
/// POST /api/prompt
pub async fn prompt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PromptRequest>,
) -> Response {
    if request.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Prompt cannot be empty.");
    }
    if state.llm.providers.is_empty() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "No LLM providers configured.");
    }

    let generate = GenerateRequest::new(request.prompt, &state.llm_config);
    match state.llm.generate(generate).await {
        Ok((provider, response)) => {
            tracing::debug!("Prompt answered by {}", provider);
            Json(PromptResponse {
                response: response.text,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Prompt request failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch response.")
        }
    }
}

/// Routes under `/api`
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/spy-prompt", get(spy_prompt))
        .route("/api/prompt", post(prompt))
}
