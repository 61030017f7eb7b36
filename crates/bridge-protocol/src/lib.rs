//! bridge-protocol: wire types shared by every transport.
//!
//! Everything here is a plain serde type with no I/O of its own. The binary
//! telemetry/command framing lives in `bridge-core::codec`; this crate only
//! covers the JSON-facing shapes: the broadcast payload, the command record
//! clients send back, and the layout descriptor non-native readers use to
//! find fields in the shared snapshot region.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Variable catalog
// ---------------------------------------------------------------------------

/// Coarse classification of a canonical variable, carried in the layout
/// descriptor so non-native readers can group fields without parsing names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableGroup {
    Aircraft,
    Controls,
    Engine,
    Navigation,
    Autopilot,
    Environment,
    Communication,
    Warnings,
    Command,
    Misc,
}

/// One entry in the layout descriptor's `variables` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutVariable {
    pub index: u32,
    pub name: String,
    pub group: VariableGroup,
    pub offset: u32,
}

/// The machine-readable shared-memory layout document written at startup so
/// non-native readers can locate fields without recompiling against this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    pub layout_version: u32,
    pub array_base_offset: u32,
    pub stride_bytes: u32,
    pub count: u32,
    pub variables: Vec<LayoutVariable>,
}

// ---------------------------------------------------------------------------
// Command record (client -> server, over TCP command port or WebSocket)
// ---------------------------------------------------------------------------

/// The JSON shape accepted from clients on the command port and the
/// WebSocket channel: `{"variable":"Controls.Throttle","value":0.75}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub variable: String,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Broadcast payload (server -> clients, over TCP data port and WebSocket)
// ---------------------------------------------------------------------------

pub const SCHEMA_NAME: &str = "aerofly-bridge-telemetry";
pub const SCHEMA_VERSION: u32 = 1;

/// The canonical telemetry payload. `variables` preserves catalog index
/// order on the wire, which is why it is a `VariableMap` rather than a
/// `BTreeMap` (alphabetical) or a `HashMap` (unspecified order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub schema: String,
    pub schema_version: u32,
    pub timestamp: u64,
    pub timestamp_unit: String,
    pub data_valid: u32,
    pub update_counter: u32,
    pub broadcast_rate_hz: f64,
    pub variables: VariableMap,
}

/// An insertion-ordered string -> f64 map that serializes as a JSON object
/// with keys in insertion order, and deserializes preserving the order keys
/// were encountered on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableMap(Vec<(String, f64)>);

impl VariableMap {
    pub fn with_capacity(cap: usize) -> Self {
        Self(Vec::with_capacity(cap))
    }

    pub fn push(&mut self, name: impl Into<String>, value: f64) {
        self.0.push((name.into(), value));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| *v)
    }
}

impl Serialize for VariableMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for VariableMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;
        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = VariableMap;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a JSON object mapping canonical variable names to numbers")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, f64>()? {
                    entries.push((k, v));
                }
                Ok(VariableMap(entries))
            }
        }
        deserializer.deserialize_map(Visitor)
    }
}

impl FromIterator<(String, f64)> for VariableMap {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Frozen v1 error codes surfaced to clients in protocol-level diagnostics.
/// Not wire types in their own right, but strings referenced by multiple
/// transports so a typo in one doesn't silently diverge from the others.
pub mod error_codes {
    pub const UNKNOWN_VARIABLE: &str = "UNKNOWN_VARIABLE";
    pub const MALFORMED_COMMAND: &str = "MALFORMED_COMMAND";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_map_round_trips_preserving_order() {
        let mut vars = VariableMap::with_capacity(3);
        vars.push("Aircraft.Altitude", 1066.8);
        vars.push("Aircraft.Pitch", 2.5);
        vars.push("Aircraft.Bank", -1.0);

        let json = serde_json::to_string(&vars).expect("serialize");
        // Index order must survive serialization, not be resorted alphabetically.
        let alt_idx = json.find("Aircraft.Altitude").unwrap();
        let pitch_idx = json.find("Aircraft.Pitch").unwrap();
        let bank_idx = json.find("Aircraft.Bank").unwrap();
        assert!(alt_idx < pitch_idx);
        assert!(pitch_idx < bank_idx);

        let back: VariableMap = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, vars);
    }

    #[test]
    fn broadcast_payload_has_exact_top_level_fields() {
        let payload = BroadcastPayload {
            schema: SCHEMA_NAME.to_owned(),
            schema_version: SCHEMA_VERSION,
            timestamp: 123,
            timestamp_unit: "microseconds".to_owned(),
            data_valid: 1,
            update_counter: 7,
            broadcast_rate_hz: 50.0,
            variables: VariableMap::default(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "broadcast_rate_hz",
                "data_valid",
                "schema",
                "schema_version",
                "timestamp",
                "timestamp_unit",
                "update_counter",
                "variables",
            ]
        );
    }

    #[test]
    fn command_record_parses_minimal_shape() {
        let cmd: CommandRecord =
            serde_json::from_str(r#"{"variable":"Controls.Throttle","value":0.75}"#).unwrap();
        assert_eq!(cmd.variable, "Controls.Throttle");
        assert_eq!(cmd.value, 0.75);
    }
}
