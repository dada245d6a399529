pub mod config;
pub mod context;
pub mod errors;
pub mod ids;
pub mod payload;
pub mod records;

pub use config::RelayConfig;
pub use context::SessionContext;
pub use errors::{SchemaError, SendError};
pub use ids::EntryId;
pub use payload::{Header, OutboundPayload, SchemaOutcome};
pub use records::RawRecord;
