//! ELBv2 CRUD over the stores. Responses are rendered to XML by the
//! gateway's query-protocol adapter.

pub mod api;
pub mod core;
pub mod error;

pub use core::Elbv2;
pub use error::{ElbError, Result};
