use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use pubsub_api::{Message, NewMessage};

use super::{ApiError, AppState};

// ═══════════════════════════════════════════════════════════════
//  REST: POST /publish
// ═══════════════════════════════════════════════════════════════

/// Body is parsed by hand so every malformed payload maps to 400.
pub(crate) async fn handle_publish(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Message>, ApiError> {
    let candidate: NewMessage = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid message: {e}")))?;
    let message = state.broker.publish(candidate).await?;
    Ok(Json(message))
}

// ═══════════════════════════════════════════════════════════════
//  REST: GET /topics
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_topics(
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(state.broker.topics())
}
