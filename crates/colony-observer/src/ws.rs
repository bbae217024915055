//! `WebSocket` handler for the live notification stream.
//!
//! Clients connect to `GET /ws/notifications` and receive every committed
//! notification as a JSON text frame, optionally filtered with
//! `?kind=drug_delivered,tumor_cell_killed`. The subscription is taken
//! before the upgrade completes, so nothing committed after the handshake
//! is missed.
//!
//! A client that falls behind receives a `{"lagged": n, "resume_after": seq}`
//! frame and should re-sync with `GET /api/notifications?since=seq`, then
//! keep reading the stream.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use colony_ledger::{FeedError, LedgerStore, Subscription};
use colony_types::NotificationKind;
use tracing::{debug, warn};

use crate::error::ObserverError;
use crate::state::AppState;

/// Query parameters for `GET /ws/notifications`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct StreamQuery {
    /// Comma-separated notification kinds. Absent means every kind.
    pub kind: Option<String>,
}

/// Parse a comma-separated kind filter. Blank segments are ignored.
///
/// # Errors
///
/// Returns [`ObserverError::InvalidInput`] naming the first unknown kind.
pub fn parse_kinds(raw: &str) -> Result<Vec<NotificationKind>, ObserverError> {
    raw.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| NotificationKind::from_str(segment).map_err(ObserverError::InvalidInput))
        .collect()
}

/// Upgrade an HTTP request to a `WebSocket` streaming notifications.
///
/// # Route
///
/// `GET /ws/notifications?kind=...`
pub async fn ws_notifications<S: LedgerStore>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let subscription = match query.kind.as_deref() {
        Some(raw) => state.ledger.subscribe_kinds(parse_kinds(raw)?),
        None => state.ledger.subscribe(),
    };
    Ok(ws.on_upgrade(move |socket| stream(socket, subscription)))
}

/// Forward notifications to the socket until either side goes away.
async fn stream(mut socket: WebSocket, mut subscription: Subscription) {
    debug!("Notification stream client connected");
    let mut last_sent: u64 = 0;

    loop {
        tokio::select! {
            result = subscription.recv() => {
                let frame = match result {
                    Ok(record) => {
                        last_sent = record.sequence;
                        match serde_json::to_string(&record) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to serialize notification: {e}");
                                continue;
                            }
                        }
                    }
                    Err(FeedError::Lagged(skipped)) => {
                        warn!(skipped, resume_after = last_sent, "Notification stream client lagged");
                        serde_json::json!({ "lagged": skipped, "resume_after": last_sent }).to_string()
                    }
                    Err(FeedError::Closed) => {
                        debug!("Notification feed closed, shutting down WebSocket");
                        return;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    debug!("Notification stream client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Notification stream client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    // Clients have nothing to say on this channel.
                    _ => {}
                }
            }
        }
    }
}
