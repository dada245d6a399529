use eddn_core::{OutboundPayload, RawRecord, SchemaError, SchemaOutcome, SessionContext};
use eddn_sender::Sender;

use crate::schema::Schema;
use crate::transform;

/// Player-chosen identity fields occasionally written onto donation
/// records. They identify the human operator and never leave the machine.
const DENY: &[&str] = &["Commander", "FID"];

/// Relays material donation reports: what was donated, how much, and
/// where, with the donor's identity stripped.
pub struct ScientificResearchSchema;

impl Schema for ScientificResearchSchema {
    fn name(&self) -> &'static str {
        "scientificresearch"
    }

    fn owned_tags(&self) -> &'static [&'static str] {
        &["ScientificResearch"]
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

        if record.get_str("Name").is_none() {
            return Err(SchemaError::Transform("missing material name".into()));
        }

        let mut message = record.fields.clone();
        transform::strip_keys(&mut message, DENY);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::test_support::{record, test_sender};

    fn settled_context() -> SessionContext {
        let mut ctx = SessionContext::new();
        ctx.update_game_version("4.0.0.100", "r294054/r0");
        ctx.update_location("Deciat", 6681123623626, [122.625, -0.8125, -47.28125]);
        ctx
    }

    fn donation_line() -> &'static str {
        r#"{"timestamp":"2026-08-06T12:10:00Z","event":"ScientificResearch","MarketID":128666762,"Name":"nickel","Category":"Raw","Count":5,"Commander":"Jameson"}"#
    }

    #[test]
    fn donation_relays_material_without_identity() {
        let (sender, repo) = test_sender();
        let mut ctx = settled_context();

        let outcome = ScientificResearchSchema
            .apply(&record(donation_line()), &mut ctx, &sender)
            .unwrap();
        assert!(outcome.handled);

        let entries = repo.list().unwrap();
        assert_eq!(entries.len(), 1);
        let body = serde_json::to_string(&entries[0].body).unwrap();
        assert!(body.contains("nickel"));
        assert!(!body.contains("Jameson"));

        let message = &entries[0].body["message"];
        assert_eq!(message["Count"], 5);
        assert_eq!(message["StarSystem"], "Deciat");
    }

    #[test]
    fn redaction_is_total_over_synthetic_identity_fixture() {
        let (sender, repo) = test_sender();
        let mut ctx = settled_context();

        let fixture = record(
            r#"{"timestamp":"2026-08-06T12:10:00Z","event":"ScientificResearch","MarketID":1,"Name":"iron","Count":2,"Commander":"Ethel McCoy","FID":"F99999"}"#,
        );
        ScientificResearchSchema.apply(&fixture, &mut ctx, &sender).unwrap();

        let body = serde_json::to_string(&repo.list().unwrap()[0].body).unwrap();
        assert!(!body.contains("Ethel McCoy"));
        assert!(!body.contains("F99999"));
        assert!(body.contains("iron"));
    }

    #[test]
    fn unsettled_context_blocks_relay() {
        let (sender, repo) = test_sender();
        let mut ctx = SessionContext::new();

        let err = ScientificResearchSchema
            .apply(&record(donation_line()), &mut ctx, &sender)
            .unwrap_err();
        assert!(matches!(err, SchemaError::ContextNotReady));
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn missing_material_name_is_transform_error() {
        let (sender, _repo) = test_sender();
        let mut ctx = settled_context();

        let bad = record(
            r#"{"timestamp":"2026-08-06T12:10:00Z","event":"ScientificResearch","Count":5}"#,
        );
        let err = ScientificResearchSchema.apply(&bad, &mut ctx, &sender).unwrap_err();
        assert!(matches!(err, SchemaError::Transform(_)));
    }
}
