//! Batch store: SQLite-backed record of batches and their items.
//!
//! - `model`: row decoding and insert shapes.
//! - `repo`: SQL-only functions; every item status write is guarded on the
//!   expected prior status.
//!
//! Callers import from `listing_batch::db` directly.

pub mod model;
pub mod repo;

pub use model::NewItemRow;
pub use repo::*;
