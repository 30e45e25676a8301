//! `GET /sessions/{id}/events?stream=1`: SSE framing per the wire spec —
//! an `event: ready` frame first, then `data: <event-json>` per appended
//! event, with a `:heartbeat` comment every 15 seconds so proxies don't
//! time the connection out.

use crate::error::ApiError;
use crate::AppState;
use aex_core::SessionId;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

pub async fn event_stream(
    state: Arc<AppState>,
    session_id: SessionId,
    from_seq: u64,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if state.sse_clients.load(Ordering::SeqCst) >= state.config.max_sse_clients {
        return Err(ApiError::backpressure("too many concurrent SSE subscribers"));
    }

    let mut subscription = state
        .event_store
        .subscribe(&session_id, from_seq)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    state.sse_clients.fetch_add(1, Ordering::SeqCst);

    let (tx, rx) = mpsc::channel::<Result<SseEvent, Infallible>>(32);
    let ready = SseEvent::default()
        .event("ready")
        .data(serde_json::json!({ "session_id": session_id.as_str() }).to_string());

    let sse_clients = Arc::clone(&state.sse_clients);
    let close_on_backpressure = state.config.close_on_backpressure;
    let backpressure_drops = Arc::clone(&state.sse_backpressure_drops);
    tokio::spawn(async move {
        let _guard = SseClientGuard { counter: sse_clients };
        if tx.send(Ok(ready)).await.is_err() {
            return;
        }
        while let Some(event) = subscription.next_event().await {
            let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            let frame = Ok(SseEvent::default().data(data));
            if close_on_backpressure {
                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        backpressure_drops.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            } else if tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(15)).text("heartbeat"),
    ))
}

struct SseClientGuard {
    counter: Arc<std::sync::atomic::AtomicUsize>,
}

impl Drop for SseClientGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
