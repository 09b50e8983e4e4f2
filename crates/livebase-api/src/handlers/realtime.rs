//! Realtime endpoints: the SSE stream and subscription updates.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use validator::Validate;

use livebase_core::error::AppError;
use livebase_core::result::AppResult;
use livebase_core::types::ClientId;
use livebase_realtime::Message;

use crate::dto::request::SetSubscriptionsRequest;
use crate::extractors::CallerIdentity;
use crate::state::AppState;

/// GET /api/realtime
///
/// Opens the event stream. The first event is `PB_CONNECT` carrying the
/// client id to use with `POST /api/realtime`. Every event has the client
/// id as its SSE id and the matched subscription as its name.
pub async fn connect(
    State(state): State<AppState>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let session = state.realtime.connect().await?;
    let client_id = session.client().id();

    let (outbound, inbox) = mpsc::channel::<Message>(state.config.realtime.mailbox_size.max(1));
    let engine = state.realtime.clone();
    tokio::spawn(async move {
        engine.serve(session, outbound).await;
    });

    debug!(client_id = %client_id, "SSE stream opened");

    let id = client_id.to_string();
    let stream = ReceiverStream::new(inbox).map(move |message| {
        Ok(Event::default()
            .id(id.as_str())
            .event(message.name.as_str())
            .data(message.data_str()))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /api/realtime
///
/// Replaces the subscription set of a connected client.
pub async fn set_subscriptions(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(body): Json<SetSubscriptionsRequest>,
) -> AppResult<StatusCode> {
    body.validate()
        .map_err(|e| AppError::validation(format!("Invalid request: {e}")))?;

    let client_id: ClientId = body
        .client_id
        .parse()
        .map_err(|_| AppError::not_found(format!("Client {} not found", body.client_id)))?;

    state
        .realtime
        .set_subscriptions(client_id, caller, &body.subscriptions)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
