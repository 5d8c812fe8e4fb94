//! WebSocket wire frames.
//!
//! Control frames are camelCase-tagged; server event frames reuse the
//! [`stevedore_model::Event`] shape whose `type` is the event name
//! (`task_update`, `log_entry`, ...).

use serde::{Deserialize, Serialize};

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        id: Option<String>,
    },

    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "resourceType")]
        resource_type: String,
        #[serde(rename = "resourceId")]
        resource_id: String,
    },

    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "resourceType")]
        resource_type: String,
        #[serde(rename = "resourceId")]
        resource_id: String,
    },

    #[serde(rename = "setFilters")]
    SetFilters { filters: Vec<EventFilter> },
}

/// Control frames the server sends back. Event frames are serialized
/// straight from [`stevedore_model::Event`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "pong")]
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    #[serde(rename = "subscribed")]
    Subscribed {
        #[serde(rename = "resourceType")]
        resource_type: String,
        #[serde(rename = "resourceId")]
        resource_id: String,
    },

    #[serde(rename = "unsubscribed")]
    Unsubscribed {
        #[serde(rename = "resourceType")]
        resource_type: String,
        #[serde(rename = "resourceId")]
        resource_id: String,
    },

    #[serde(rename = "filtersSet")]
    FiltersSet { count: usize },

    #[serde(rename = "error")]
    Error { message: String },
}

/// One filter record. Fields are ANDed; records are ORed by the hub.
/// An absent or empty list matches anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub resource_types: Vec<String>,
    #[serde(default)]
    pub resource_ids: Vec<String>,
}

impl EventFilter {
    pub fn admits(&self, event: &stevedore_model::Event) -> bool {
        let any = |list: &[String], value: &str| list.is_empty() || list.iter().any(|v| v == value);
        any(&self.event_types, &event.event_type)
            && any(&self.resource_types, &event.resource_type)
            && any(&self.resource_ids, &event.resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_model::Event;

    fn task_update() -> Event {
        Event::new("task_update", "task", "abc123", None)
    }

    #[test]
    fn test_empty_filter_admits_everything() {
        assert!(EventFilter::default().admits(&task_update()));
    }

    #[test]
    fn test_fields_are_anded() {
        let filter = EventFilter {
            event_types: vec!["task_update".into()],
            resource_types: vec!["service".into()],
            resource_ids: vec![],
        };
        assert!(!filter.admits(&task_update()));
    }

    #[test]
    fn test_client_frame_decodes() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"subscribe","resourceType":"task","resourceId":"*"}"#,
        )
        .unwrap();
        assert!(matches!(frame, ClientFrame::Subscribe { .. }));

        let frame: ClientFrame = serde_json::from_str(
            r#"{"type":"setFilters","filters":[{"eventTypes":["task_update"]}]}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::SetFilters { filters } => {
                assert_eq!(filters.len(), 1);
                assert_eq!(filters[0].event_types, vec!["task_update"]);
            }
            _ => panic!("wrong variant"),
        }
    }
}
