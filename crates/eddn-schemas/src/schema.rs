use eddn_core::{RawRecord, SchemaError, SchemaOutcome, SessionContext};
use eddn_sender::Sender;

/// One relay unit: owns a set of record type tags and turns matching
/// records into redacted, augmented payloads for its versioned destination.
///
/// Contract for every implementation:
/// - check applicability first (tag plus required context), returning an
///   unhandled outcome rather than guessing when context is missing;
/// - verify any location or identity fields on the record against the
///   session context before trusting them;
/// - strip the type's personal fields from the outgoing copy, always;
/// - augment idempotently from context so the payload is self-describing;
/// - update context (designated types only) before submitting, on the
///   dispatch thread, so later records observe the new state;
/// - report failures as values. Nothing here unwinds into the dispatcher.
pub trait Schema: Send + Sync {
    /// Destination schema name, e.g. "journal".
    fn name(&self) -> &'static str;

    /// Destination schema version.
    fn version(&self) -> u32 {
        1
    }

    /// Record type tags this schema owns. The registry enforces that no
    /// two schemas claim the same tag.
    fn owned_tags(&self) -> &'static [&'static str];

    /// Apply the schema to one record. A true outcome means the payload
    /// was accepted into the sender's pipeline, not that it was delivered.
    fn apply(
        &self,
        record: &RawRecord,
        ctx: &mut SessionContext,
        sender: &Sender,
    ) -> Result<SchemaOutcome, SchemaError>;
}
