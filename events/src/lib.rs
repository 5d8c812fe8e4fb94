//! Event fabric: an in-process WebSocket hub with per-client subscriptions
//! and event filters. Every state-changing core operation publishes here;
//! UI consumers connect through the gateway's `/ws` route.

pub mod frames;
pub mod hub;
pub mod origin;
pub mod socket;

pub use frames::{ClientFrame, EventFilter, ServerFrame};
pub use hub::{ConnectionLimits, EventHub, HubError, MATCH_ANY};
pub use origin::OriginPolicy;
pub use socket::{SocketConfig, serve_socket};
