//! Sensor snapshots as returned by the deCONZ REST API.
//!
//! `GET /api/<key>/sensors` answers with a JSON object keyed by sensor id.
//! Every field of `state` and `config` is optional on the wire; an absent
//! field and an explicit `null` both decode to the field's zero value, so a
//! snapshot always carries the complete field set regardless of sensor type.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;

/// Decode `null` the same way as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One sensor's state and configuration for a single poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Gateway-assigned identifier, taken from the key of the sensors object.
    #[serde(skip)]
    pub id: String,

    /// User-assigned display name.
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,

    /// Type tag, e.g. `ZHATemperature`.
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub sensor_type: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub etag: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub manufacturername: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub modelid: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub swversion: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub uniqueid: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub state: SensorState,

    #[serde(default, deserialize_with = "null_as_default")]
    pub config: SensorConfig,
}

/// Union of the state fields of every supported sensor type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorState {
    #[serde(default, deserialize_with = "null_as_default")]
    pub airquality: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub airqualityppb: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alarm: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub angle: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buttonevent: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub carbonmonoxide: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub consumption: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dark: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub daylight: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errorcode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub eventduration: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fanmode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fire: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub floortemperature: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gesture: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub heating: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub humidity: i64,
    #[serde(default)]
    pub lastset: Timestamp,
    #[serde(default)]
    pub lastupdated: Timestamp,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lightlevel: i64,
    #[serde(default)]
    pub localtime: Timestamp,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lowbattery: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lux: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mountingmodeactive: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub on: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub open: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub orientation: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub power: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub presence: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pressure: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tampered: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub temperature: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tiltangle: i64,
    #[serde(default)]
    pub utc: Timestamp,
    #[serde(default, deserialize_with = "null_as_default")]
    pub valve: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub vibration: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub vibrationstrength: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub voltage: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub water: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub windowopen: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub x: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub y: i64,
}

/// Sensor configuration block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub battery: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub configured: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub enrolled: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub offset: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub on: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reachable: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sunriseoffset: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sunsetoffset: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub temperature: i64,
}

/// A sensor entry that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSensor {
    /// Sensor id as it appeared in the response.
    pub id: String,
    /// Decoder message.
    pub reason: String,
}

/// Result of decoding a full sensors response.
#[derive(Debug, Clone, Default)]
pub struct SensorList {
    /// Successfully decoded sensors, ordered by id.
    pub sensors: Vec<SensorSnapshot>,
    /// Entries skipped because they did not match the expected shape.
    pub rejected: Vec<RejectedSensor>,
}

impl SensorSnapshot {
    /// Decode a single sensor object and attach its id.
    pub fn from_value(id: impl Into<String>, value: serde_json::Value) -> Result<Self> {
        let mut sensor: SensorSnapshot = serde_json::from_value(value)?;
        sensor.id = id.into();
        Ok(sensor)
    }
}

/// Decode the body of `GET /api/<key>/sensors`.
///
/// The body must be a JSON object; anything else is an error for the whole
/// cycle. Individual entries that fail to decode are collected in
/// [`SensorList::rejected`] instead of failing the rest.
pub fn decode_sensors(body: &[u8]) -> Result<SensorList> {
    let raw: serde_json::Value = serde_json::from_slice(body)?;
    let serde_json::Value::Object(entries) = raw else {
        return Err(Error::Payload(format!(
            "expected an object of sensors, got {}",
            json_kind(&raw)
        )));
    };

    // Ordered by id so every cycle publishes in the same order.
    let entries: BTreeMap<String, serde_json::Value> = entries.into_iter().collect();

    let mut list = SensorList::default();
    for (id, value) in entries {
        match SensorSnapshot::from_value(id.clone(), value) {
            Ok(sensor) => list.sensors.push(sensor),
            Err(e) => list.rejected.push(RejectedSensor {
                id,
                reason: e.to_string(),
            }),
        }
    }

    Ok(list)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
