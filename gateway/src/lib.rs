//! Single HTTP entry point: protocol adapters, request dispatcher, reverse
//! proxy, health endpoints, and the WebSocket upgrade into the event hub.

pub mod args;
pub mod dispatch;
pub mod ecs_wire;
pub mod elbv2_wire;
pub mod health;
pub mod proxy;
pub mod query;
pub mod sd_wire;
pub mod server;
pub mod state;
pub mod ws;
pub mod xml;
