use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use topic_engine::Session;

use super::{ApiError, AppState};

// ═══════════════════════════════════════════════════════════════
//  SSE: GET /subscribe?topic=X
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct SubscribeParams {
    topic: Option<String>,
}

/// Replay then live frames, one `data: <message json>` event each.
///
/// The session lives inside the response stream: when the peer goes away
/// the server drops the stream and the session unregisters. Shutdown ends
/// the stream through the cancellation token.
pub(crate) async fn handle_subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> Result<Response, ApiError> {
    let topic = params.topic.unwrap_or_default();
    let session = state.broker.subscribe(&topic).await?;
    tracing::info!(topic = %session.topic(), replay = session.replay_len(), "subscriber attached");

    let events = session_events(session).take_until(state.shutdown.clone().cancelled_owned());
    let sse = Sse::new(events);
    let response = match state.settings.keep_alive {
        Some(interval) => sse.keep_alive(KeepAlive::new().interval(interval)).into_response(),
        None => sse.into_response(),
    };
    Ok(response)
}

fn session_events(session: Session) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(session, |mut session| async move {
        loop {
            let Some(message) = session.next().await else {
                return None;
            };
            match Event::default().json_data(&message) {
                Ok(event) => return Some((Ok::<_, Infallible>(event), session)),
                Err(e) => {
                    tracing::warn!(topic = %message.topic, id = message.id, error = %e, "skipping unencodable message");
                }
            }
        }
    })
}
