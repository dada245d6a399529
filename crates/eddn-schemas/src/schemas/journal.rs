use eddn_core::{OutboundPayload, RawRecord, SchemaError, SchemaOutcome, SessionContext};
use eddn_sender::Sender;

use crate::schema::Schema;
use crate::transform;

/// Journal state the player would not want broadcast: fines, fuel levels,
/// surface coordinates and the like say more about the person at the stick
/// than about the galaxy.
const DENY: &[&str] = &[
    "ActiveFine",
    "CockpitBreach",
    "BoostUsed",
    "FuelLevel",
    "FuelUsed",
    "JumpDist",
    "Latitude",
    "Longitude",
    "Wanted",
];

/// Relays the location-bearing journal events and owns the location half
/// of the session context. Jump and location records are authoritative for
/// where the session is; a docking record merely has to agree with them.
pub struct JournalSchema;

impl Schema for JournalSchema {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn owned_tags(&self) -> &'static [&'static str] {
        &["Location", "FSDJump", "Docked", "CarrierJump"]
    }

    fn apply(
        &self,
        record: &RawRecord,
        ctx: &mut SessionContext,
        sender: &Sender,
    ) -> Result<SchemaOutcome, SchemaError> {
        ctx.require_version()?;

        match record.event.as_str() {
            "Location" | "FSDJump" | "CarrierJump" => {
                let system = record
                    .get_str("StarSystem")
                    .ok_or_else(|| SchemaError::Transform("missing StarSystem".into()))?;
                let address = record
                    .get_u64("SystemAddress")
                    .ok_or_else(|| SchemaError::Transform("missing SystemAddress".into()))?;
                let pos = record
                    .get_pos("StarPos")
                    .ok_or_else(|| SchemaError::Transform("missing StarPos".into()))?;
                ctx.update_location(system, address, pos);
                ctx.update_station(record.get_str("StationName"));
            }
            "Docked" => {
                ctx.require_location()?;
                ctx.confirm_location(&record.fields)?;
                ctx.update_station(record.get_str("StationName"));
            }
            _ => return Ok(SchemaOutcome::skipped("unowned tag")),
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
