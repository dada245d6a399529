pub mod database;
pub mod error;
pub mod queue;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use queue::{EntryState, QueueEntry, QueueRepo};
