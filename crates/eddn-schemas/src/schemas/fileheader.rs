use eddn_core::{RawRecord, SchemaError, SchemaOutcome, SessionContext};
use eddn_sender::Sender;

use crate::schema::Schema;

/// Session bookkeeping. Owns the version and identity half of the context
/// and never submits anything: a Fileheader marks a session boundary (new
/// login or game restart), LoadGame and Commander fill in who is playing
/// and on which client build.
pub struct FileheaderSchema;

impl Schema for FileheaderSchema {
    fn name(&self) -> &'static str {
        "fileheader"
    }

    fn owned_tags(&self) -> &'static [&'static str] {
        &["Fileheader", "LoadGame", "Commander"]
    }

    fn apply(
        &self,
        record: &RawRecord,
        ctx: &mut SessionContext,
        _sender: &Sender,
    ) -> Result<SchemaOutcome, SchemaError> {
        match record.event.as_str() {
            "Fileheader" => {
                // New journal file means new session; stale location or
                // identity must not leak across the boundary.
                ctx.reset();
                let version = record
                    .get_str("gameversion")
                    .ok_or_else(|| SchemaError::Transform("missing gameversion".into()))?;
                let build = record.get_str("build").unwrap_or_default();
                ctx.update_game_version(version, build);
                Ok(SchemaOutcome::handled())
            }
            "LoadGame" => {
                if let Some(commander) = record.get_str("Commander") {
                    ctx.update_commander(commander);
                }
                if let Some(version) = record.get_str("gameversion") {
                    ctx.update_game_version(version, record.get_str("build").unwrap_or_default());
                }
                ctx.update_flags(record.get_bool("Odyssey"), record.get_bool("Horizons"));
                Ok(SchemaOutcome::handled())
            }
            "Commander" => {
                let name = record
                    .get_str("Name")
                    .ok_or_else(|| SchemaError::Transform("missing commander name".into()))?;
                ctx.update_commander(name);
                Ok(SchemaOutcome::handled())
            }
            _ => Ok(SchemaOutcome::skipped("unowned tag")),
        }
    }
}
