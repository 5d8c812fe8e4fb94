//! Per-connection WebSocket plumbing.
//!
//! Each connection gets one read unit (this function) and one write unit
//! (the spawned sender task draining the hub mailbox). Inbound frames are
//! throttled by a sliding one-minute window.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::mpsc;

use crate::frames::{ClientFrame, ServerFrame};
use crate::hub::EventHub;

#[derive(Debug, Clone, Copy)]
pub struct SocketConfig {
    pub rate_limit_per_minute: u32,
}

async fn sender_main(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sender.send(Message::Text(frame.into())).await {
            tracing::debug!(error = %e, "failed to send frame, closing writer");
            break;
        }
    }
}

/// Handle one upgraded WebSocket connection until the peer goes away.
pub async fn serve_socket(
    socket: WebSocket,
    hub: EventHub,
    user: Option<String>,
    ip: Option<IpAddr>,
    config: SocketConfig,
) {
    let (sender, mut receiver) = socket.split();
    let (id, rx) = match hub.register(user, ip).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting websocket connection");
            return;
        }
    };
    tokio::spawn(sender_main(sender, rx));

    let mut window: VecDeque<Instant> = VecDeque::new();
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if rate_limited(&mut window, config.rate_limit_per_minute) {
                    send_frame(
                        &hub,
                        id,
                        &ServerFrame::Error {
                            message: "rate limit exceeded".into(),
                        },
                    )
                    .await;
                    continue;
                }
                match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => handle_frame(&hub, id, frame).await,
                    Err(e) => {
                        send_frame(
                            &hub,
                            id,
                            &ServerFrame::Error {
                                message: format!("invalid frame: {}", e),
                            },
                        )
                        .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                send_frame(
                    &hub,
                    id,
                    &ServerFrame::Error {
                        message: "binary frames are not supported".into(),
                    },
                )
                .await;
            }
            // Protocol-level pings are answered by the library
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::debug!(error = %e, "websocket error");
                break;
            }
        }
    }

    hub.unregister(id).await;
}

async fn handle_frame(hub: &EventHub, id: uuid::Uuid, frame: ClientFrame) {
    match frame {
        ClientFrame::Ping { id: ping_id } => {
            send_frame(hub, id, &ServerFrame::Pong { id: ping_id }).await;
        }
        ClientFrame::Subscribe {
            resource_type,
            resource_id,
        } => {
            hub.subscribe(id, resource_type.clone(), resource_id.clone())
                .await;
            send_frame(
                hub,
                id,
                &ServerFrame::Subscribed {
                    resource_type,
                    resource_id,
                },
            )
            .await;
        }
        ClientFrame::Unsubscribe {
            resource_type,
            resource_id,
        } => {
            hub.unsubscribe(id, &resource_type, &resource_id).await;
            send_frame(
                hub,
                id,
                &ServerFrame::Unsubscribed {
                    resource_type,
                    resource_id,
                },
            )
            .await;
        }
        ClientFrame::SetFilters { filters } => {
            let count = filters.len();
            hub.set_filters(id, filters).await;
            send_frame(hub, id, &ServerFrame::FiltersSet { count }).await;
        }
    }
}

async fn send_frame(hub: &EventHub, id: uuid::Uuid, frame: &ServerFrame) {
    match serde_json::to_string(frame) {
        Ok(text) => hub.send_to(id, text).await,
        Err(e) => tracing::error!(error = %e, "failed to serialize server frame"),
    }
}

fn rate_limited(window: &mut VecDeque<Instant>, limit: u32) -> bool {
    let now = Instant::now();
    while let Some(front) = window.front() {
        if now.duration_since(*front) > Duration::from_secs(60) {
            window.pop_front();
        } else {
            break;
        }
    }
    if window.len() as u32 >= limit {
        return true;
    }
    window.push_back(now);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_window() {
        let mut window = VecDeque::new();
        for _ in 0..5 {
            assert!(!rate_limited(&mut window, 5));
        }
        assert!(rate_limited(&mut window, 5));
    }
}
