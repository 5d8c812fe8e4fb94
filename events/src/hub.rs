//! The in-process event hub.
//!
//! Clients hold a bounded mailbox; broadcast walks the client set under a
//! read lock and enqueues without blocking. A full mailbox drops that
//! delivery and logs, so a slow UI never backs up a core operation.
//! Registration changes (connect, disconnect, subscription edits) take the
//! write half.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use stevedore_model::Event;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::frames::EventFilter;

/// Bounded per-client mailbox depth.
const MAILBOX_DEPTH: usize = 256;

/// Subscription key; `"*"` in either position matches anything.
pub const MATCH_ANY: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("too many connections for user {0}")]
    TooManyUserConnections(String),

    #[error("too many connections from {0}")]
    TooManyIpConnections(IpAddr),
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_per_user: u32,
    pub max_per_ip: u32,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_per_user: 16,
            max_per_ip: 32,
        }
    }
}

struct ClientHandle {
    tx: mpsc::Sender<String>,
    subscriptions: HashSet<(String, String)>,
    filters: Vec<EventFilter>,
    user: Option<String>,
    ip: Option<IpAddr>,
}

impl ClientHandle {
    fn admits(&self, event: &Event) -> bool {
        let subscribed = self.subscriptions.iter().any(|(rt, rid)| {
            (rt == MATCH_ANY || *rt == event.resource_type)
                && (rid == MATCH_ANY || *rid == event.resource_id)
        });
        subscribed || self.filters.iter().any(|f| f.admits(event))
    }
}

#[derive(Clone)]
pub struct EventHub {
    clients: Arc<RwLock<HashMap<Uuid, ClientHandle>>>,
    limits: ConnectionLimits,
}

impl EventHub {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    /// Admit a new client, enforcing the per-user and per-ip caps, and hand
    /// back its id plus the receive half of its mailbox.
    pub async fn register(
        &self,
        user: Option<String>,
        ip: Option<IpAddr>,
    ) -> Result<(Uuid, mpsc::Receiver<String>), HubError> {
        let mut clients = self.clients.write().await;
        if let Some(user) = &user {
            let count = clients
                .values()
                .filter(|c| c.user.as_deref() == Some(user.as_str()))
                .count();
            if count as u32 >= self.limits.max_per_user {
                return Err(HubError::TooManyUserConnections(user.clone()));
            }
        }
        if let Some(ip) = ip {
            let count = clients.values().filter(|c| c.ip == Some(ip)).count();
            if count as u32 >= self.limits.max_per_ip {
                return Err(HubError::TooManyIpConnections(ip));
            }
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        clients.insert(
            id,
            ClientHandle {
                tx,
                subscriptions: HashSet::new(),
                filters: Vec::new(),
                user,
                ip,
            },
        );
        tracing::debug!(client = %id, total = clients.len(), "websocket client registered");
        Ok((id, rx))
    }

    pub async fn unregister(&self, id: Uuid) {
        let mut clients = self.clients.write().await;
        clients.remove(&id);
        tracing::debug!(client = %id, total = clients.len(), "websocket client removed");
    }

    pub async fn subscribe(&self, id: Uuid, resource_type: String, resource_id: String) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.subscriptions.insert((resource_type, resource_id));
        }
    }

    pub async fn unsubscribe(&self, id: Uuid, resource_type: &str, resource_id: &str) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client
                .subscriptions
                .remove(&(resource_type.to_string(), resource_id.to_string()));
        }
    }

    pub async fn set_filters(&self, id: Uuid, filters: Vec<EventFilter>) {
        if let Some(client) = self.clients.write().await.get_mut(&id) {
            client.filters = filters;
        }
    }

    /// Reply to a single client, bypassing subscription matching.
    /// Used for control confirmations.
    pub async fn send_to(&self, id: Uuid, frame: String) {
        if let Some(client) = self.clients.read().await.get(&id)
            && client.tx.try_send(frame).is_err()
        {
            tracing::warn!(client = %id, "mailbox full, dropping control frame");
        }
    }

    /// Fan an event out to every client whose subscriptions or filters
    /// admit it. Per-client delivery is FIFO; cross-client order is not
    /// guaranteed.
    pub async fn publish(&self, event: &Event) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event");
                return;
            }
        };
        let clients = self.clients.read().await;
        for (id, client) in clients.iter() {
            if !client.admits(event) {
                continue;
            }
            if client.tx.try_send(frame.clone()).is_err() {
                tracing::warn!(client = %id, event = %event.event_type, "mailbox full, dropping event");
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> EventHub {
        EventHub::new(ConnectionLimits::default())
    }

    #[tokio::test]
    async fn test_subscription_wildcards() {
        let hub = hub();
        let (id, mut rx) = hub.register(None, None).await.unwrap();
        hub.subscribe(id, "task".into(), MATCH_ANY.into()).await;

        hub.publish(&Event::new("task_update", "task", "abc", None))
            .await;
        hub.publish(&Event::new("service_update", "service", "web", None))
            .await;

        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("task_update"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_filters_are_ored_across_records() {
        let hub = hub();
        let (id, mut rx) = hub.register(None, None).await.unwrap();
        hub.set_filters(
            id,
            vec![
                EventFilter {
                    event_types: vec!["task_update".into()],
                    ..Default::default()
                },
                EventFilter {
                    event_types: vec!["log_entry".into()],
                    ..Default::default()
                },
            ],
        )
        .await;

        hub.publish(&Event::new("log_entry", "task", "abc", None))
            .await;
        assert!(rx.try_recv().is_ok());

        hub.publish(&Event::new("metric_update", "cluster", "default", None))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unmatched_client_receives_nothing() {
        let hub = hub();
        let (_id, mut rx) = hub.register(None, None).await.unwrap();
        hub.publish(&Event::new("task_update", "task", "abc", None))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_user_connection_cap() {
        let hub = EventHub::new(ConnectionLimits {
            max_per_user: 1,
            max_per_ip: 32,
        });
        let _first = hub.register(Some("alice".into()), None).await.unwrap();
        assert!(matches!(
            hub.register(Some("alice".into()), None).await,
            Err(HubError::TooManyUserConnections(_))
        ));
        // A different user is unaffected
        assert!(hub.register(Some("bob".into()), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_delivery() {
        let hub = hub();
        let (id, mut rx) = hub.register(None, None).await.unwrap();
        hub.subscribe(id, MATCH_ANY.into(), MATCH_ANY.into()).await;
        for _ in 0..(MAILBOX_DEPTH + 10) {
            hub.publish(&Event::new("task_update", "task", "abc", None))
                .await;
        }
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, MAILBOX_DEPTH);
    }
}
