use eddn_core::{OutboundPayload, RawRecord, SchemaError, SchemaOutcome, SessionContext};
use eddn_sender::Sender;

use crate::schema::Schema;
use crate::transform;

/// Relays codex discoveries. No personal data to remove; the record just
/// has to agree with where the session actually is before it is vouched
/// for and augmented.
pub struct CodexEntrySchema;

impl Schema for CodexEntrySchema {
    fn name(&self) -> &'static str {
        "codexentry"
    }

    fn owned_tags(&self) -> &'static [&'static str] {
        &["CodexEntry"]
    }

    fn apply(
        &self,
        record: &RawRecord,
        ctx: &mut SessionContext,
        sender: &Sender,
    ) -> Result<SchemaOutcome, SchemaError> {
        ctx.require_version()?;
        ctx.require_location()?;
        ctx.confirm_location(&record.fields)?;

        let mut message = record.fields.clone();
        transform::strip_localised_map(&mut message);
        ctx.augment_location(&mut message);
        ctx.augment_version(&mut message);

        sender
            .submit(OutboundPayload::new(
                self.name(),
                self.version(),
                ctx.is_beta(),
                message,
            ))
            .map_err(|e| SchemaError::Submit(e.to_string()))?;
        Ok(SchemaOutcome::handled())
    }
}
