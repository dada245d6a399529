use serde_json::{Map, Number, Value};

use crate::errors::SchemaError;

/// Accumulated session state: last-known location, game version and
/// commander identity. One instance per game session, written only by the
/// ingestion task through the named update operations below, so a record
/// always observes exactly the state left by the records before it.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    system_name: Option<String>,
    system_address: Option<u64>,
    star_pos: Option<[f64; 3]>,
    station_name: Option<String>,
    game_version: Option<String>,
    game_build: Option<String>,
    commander: Option<String>,
    is_beta: bool,
    odyssey: Option<bool>,
    horizons: Option<bool>,
}

/// Tolerance when comparing reported star positions against tracked ones.
/// Journal positions are quantized to 1/32 Ly, so anything tighter than
/// that produces false mismatches.
const POS_EPSILON: f64 = 1.0 / 32.0;

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything. Called on a session boundary (new login or game
    /// restart) so state from the previous session never leaks forward.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update_location(&mut self, system: &str, address: u64, pos: [f64; 3]) {
        self.system_name = Some(system.to_string());
        self.system_address = Some(address);
        self.star_pos = Some(pos);
    }

    pub fn update_station(&mut self, station: Option<&str>) {
        self.station_name = station.map(str::to_string);
    }

    pub fn update_game_version(&mut self, version: &str, build: &str) {
        self.game_version = Some(version.to_string());
        self.game_build = Some(build.to_string());
        self.is_beta = version.to_ascii_lowercase().contains("beta");
    }

    pub fn update_commander(&mut self, name: &str) {
        self.commander = Some(name.to_string());
    }

    pub fn update_flags(&mut self, odyssey: Option<bool>, horizons: Option<bool>) {
        if odyssey.is_some() {
            self.odyssey = odyssey;
        }
        if horizons.is_some() {
            self.horizons = horizons;
        }
    }

    pub fn system_name(&self) -> Option<&str> {
        self.system_name.as_deref()
    }

    pub fn system_address(&self) -> Option<u64> {
        self.system_address
    }

    pub fn star_pos(&self) -> Option<[f64; 3]> {
        self.star_pos
    }

    pub fn station_name(&self) -> Option<&str> {
        self.station_name.as_deref()
    }

    pub fn game_version(&self) -> Option<&str> {
        self.game_version.as_deref()
    }

    pub fn commander(&self) -> Option<&str> {
        self.commander.as_deref()
    }

    pub fn is_beta(&self) -> bool {
        self.is_beta
    }

    /// A relayable location means name, address and position are all known.
    pub fn has_location(&self) -> bool {
        self.system_name.is_some() && self.system_address.is_some() && self.star_pos.is_some()
    }

    pub fn has_version(&self) -> bool {
        self.game_version.is_some()
    }

    pub fn require_version(&self) -> Result<(), SchemaError> {
        if self.has_version() {
            Ok(())
        } else {
            Err(SchemaError::ContextNotReady)
        }
    }

    pub fn require_location(&self) -> Result<(), SchemaError> {
        if self.has_location() {
            Ok(())
        } else {
            Err(SchemaError::ContextNotReady)
        }
    }

    /// Verify that any location fields the record carries agree with the
    /// tracked state. Disagreement means the stream and our state have
    /// diverged; the record is skipped rather than relayed with a location
    /// we cannot vouch for.
    pub fn confirm_location(&self, fields: &Map<String, Value>) -> Result<(), SchemaError> {
        if let (Some(reported), Some(tracked)) = (
            fields.get("StarSystem").and_then(Value::as_str),
            self.system_name.as_deref(),
        ) {
            if reported != tracked {
                return Err(SchemaError::ConsistencyMismatch { field: "StarSystem" });
            }
        }
        if let (Some(reported), Some(tracked)) = (
            fields.get("System").and_then(Value::as_str),
            self.system_name.as_deref(),
        ) {
            // Codex records carry the name under "System" instead.
            if reported != tracked {
                return Err(SchemaError::ConsistencyMismatch { field: "System" });
            }
        }
        if let (Some(reported), Some(tracked)) = (
            fields.get("SystemAddress").and_then(Value::as_u64),
            self.system_address,
        ) {
            if reported != tracked {
                return Err(SchemaError::ConsistencyMismatch { field: "SystemAddress" });
            }
        }
        if let (Some(reported), Some(tracked)) = (pos_from(fields.get("StarPos")), self.star_pos) {
            let agrees = reported
                .iter()
                .zip(tracked.iter())
                .all(|(a, b)| (a - b).abs() <= POS_EPSILON);
            if !agrees {
                return Err(SchemaError::ConsistencyMismatch { field: "StarPos" });
            }
        }
        Ok(())
    }

    /// Attach the tracked location to an outgoing message. Only missing
    /// keys are inserted, so applying this twice changes nothing.
    pub fn augment_location(&self, message: &mut Map<String, Value>) {
        if let Some(name) = &self.system_name {
            insert_missing(message, "StarSystem", Value::String(name.clone()));
        }
        if let Some(address) = self.system_address {
            insert_missing(message, "SystemAddress", Value::Number(address.into()));
        }
        if let Some(pos) = self.star_pos {
            insert_missing(message, "StarPos", pos_value(pos));
        }
    }

    /// Attach the tracked client version to an outgoing message so the
    /// relayed payload is self-describing. Idempotent, same as above.
    pub fn augment_version(&self, message: &mut Map<String, Value>) {
        if let Some(version) = &self.game_version {
            insert_missing(message, "gameversion", Value::String(version.clone()));
        }
        if let Some(build) = &self.game_build {
            insert_missing(message, "gamebuild", Value::String(build.clone()));
        }
        if let Some(odyssey) = self.odyssey {
            insert_missing(message, "odyssey", Value::Bool(odyssey));
        }
        if let Some(horizons) = self.horizons {
            insert_missing(message, "horizons", Value::Bool(horizons));
        }
    }

    /// Loggable summary with personal data elided. The commander name is
    /// reported only as present or absent.
    pub fn redacted(&self) -> String {
        format!(
            "system={} version={} commander={} beta={}",
            self.system_name.as_deref().unwrap_or("?"),
            self.game_version.as_deref().unwrap_or("?"),
            if self.commander.is_some() { "<set>" } else { "<unset>" },
            self.is_beta,
        )
    }
}

fn insert_missing(message: &mut Map<String, Value>, key: &str, value: Value) {
    if !message.contains_key(key) {
        message.insert(key.to_string(), value);
    }
}

fn pos_from(value: Option<&Value>) -> Option<[f64; 3]> {
    let arr = value?.as_array()?;
    if arr.len() != 3 {
        return None;
    }
    Some([arr[0].as_f64()?, arr[1].as_f64()?, arr[2].as_f64()?])
}

fn pos_value(pos: [f64; 3]) -> Value {
    Value::Array(
        pos.iter()
            .map(|c| Number::from_f64(*c).map_or(Value::Null, Value::Number))
            .collect(),
    )
}
