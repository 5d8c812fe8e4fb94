//! Typed stores over the canonical model.
//!
//! Two backends: [`memory::MemoryStorage`] (tests and test mode) and
//! [`postgres::PostgresStorage`]. Everything above this crate talks to the
//! [`Storage`] trait; which backend is live is a deployment choice.

pub mod cursor;
pub mod error;
pub mod filter;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{Result, StoreError};
pub use filter::*;
pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use traits::*;
