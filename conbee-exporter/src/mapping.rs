//! Mapping from deCONZ sensor snapshots to Prometheus measurements and labels.
//!
//! Each supported sensor type has a fixed [`SensorRule`] in a static table.
//! A rule names exactly which state fields become numeric measurements and
//! which become string labels, so every sensor of a given type always yields
//! the same measurement names and the same label keys. The gauge registry
//! relies on that: a gauge's label keys may never change once registered.

use std::collections::BTreeMap;

use conbee_common::{SensorSnapshot, SensorState};

/// Measurement name to value, for one sensor.
pub type MeasurementSet = BTreeMap<String, f64>;

/// Label name to value, for one sensor.
pub type LabelSet = BTreeMap<String, String>;

/// Label carrying the sensor's display name.
pub const NAME_LABEL: &str = "Name";

/// Label carrying the sensor's type tag.
pub const TYPE_LABEL: &str = "Type";

/// Encode a binary condition as a gauge value.
pub fn encode_bool(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Render an array-valued field as a bracketed element list, e.g. `[1, -2, 90]`.
pub fn format_list(values: &[i64]) -> String {
    format!("{:?}", values)
}

/// A numeric field extracted from the sensor state.
#[derive(Clone, Copy)]
pub struct Measurement {
    pub name: &'static str,
    read: fn(&SensorState) -> f64,
}

impl Measurement {
    const fn new(name: &'static str, read: fn(&SensorState) -> f64) -> Self {
        Self { name, read }
    }

    /// Read this measurement from a state bag.
    pub fn read(&self, state: &SensorState) -> f64 {
        (self.read)(state)
    }
}

/// A descriptive field rendered as a label value.
#[derive(Clone, Copy)]
pub struct Label {
    pub name: &'static str,
    render: fn(&SensorState) -> String,
}

impl Label {
    const fn new(name: &'static str, render: fn(&SensorState) -> String) -> Self {
        Self { name, render }
    }

    /// Render this label from a state bag.
    pub fn render(&self, state: &SensorState) -> String {
        (self.render)(state)
    }
}

/// Field-extraction rule for one sensor type.
pub struct SensorRule {
    /// deCONZ type tag, e.g. `ZHATemperature`.
    pub type_tag: &'static str,
    pub measurements: &'static [Measurement],
    pub labels: &'static [Label],
}

impl SensorRule {
    /// Names of the measurements this rule produces.
    pub fn measurement_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.measurements.iter().map(|m| m.name)
    }

    /// Names of the labels this rule produces, excluding `Name` and `Type`.
    pub fn label_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.labels.iter().map(|l| l.name)
    }
}

const LAST_UPDATED: Label = Label::new("Lastupdated", |s| s.lastupdated.to_string());
const LOW_BATTERY: Measurement = Measurement::new("Lowbattery", |s| encode_bool(s.lowbattery));
const TAMPERED: Measurement = Measurement::new("Tampered", |s| encode_bool(s.tampered));

static RULES: &[SensorRule] = &[
    SensorRule {
        type_tag: "ZHAAirQuality",
        measurements: &[Measurement::new("Airqualityppb", |s| {
            s.airqualityppb as f64
        })],
        labels: &[Label::new("Airquality", |s| s.airquality.clone())],
    },
    SensorRule {
        type_tag: "ZHAAlarm",
        measurements: &[
            Measurement::new("Alarm", |s| encode_bool(s.alarm)),
            LOW_BATTERY,
            TAMPERED,
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHACarbonMonoxide",
        measurements: &[
            Measurement::new("Carbonmonoxide", |s| encode_bool(s.carbonmonoxide)),
            LOW_BATTERY,
            TAMPERED,
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAConsumption",
        measurements: &[
            Measurement::new("Consumption", |s| s.consumption as f64),
            Measurement::new("Power", |s| s.power as f64),
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAFire",
        measurements: &[
            Measurement::new("Fire", |s| encode_bool(s.fire)),
            LOW_BATTERY,
            TAMPERED,
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAHumidity",
        measurements: &[Measurement::new("Humidity", |s| s.humidity as f64)],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHALightLevel",
        measurements: &[
            Measurement::new("Lux", |s| s.lux as f64),
            Measurement::new("Lightlevel", |s| s.lightlevel as f64),
            Measurement::new("Dark", |s| encode_bool(s.dark)),
            Measurement::new("Daylight", |s| encode_bool(s.daylight)),
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAOpenClose",
        measurements: &[
            LOW_BATTERY,
            Measurement::new("Open", |s| encode_bool(s.open)),
            TAMPERED,
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAPower",
        measurements: &[
            Measurement::new("Current", |s| s.current as f64),
            Measurement::new("Power", |s| s.power as f64),
            Measurement::new("Voltage", |s| s.voltage as f64),
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAPresence",
        measurements: &[
            LOW_BATTERY,
            Measurement::new("Presence", |s| encode_bool(s.presence)),
            TAMPERED,
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAPressure",
        measurements: &[Measurement::new("Pressure", |s| s.pressure as f64)],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHASwitch",
        measurements: &[
            Measurement::new("Buttonevent", |s| s.buttonevent as f64),
            Measurement::new("Gesture", |s| s.gesture as f64),
            Measurement::new("Eventduration", |s| s.eventduration as f64),
            Measurement::new("X", |s| s.x as f64),
            Measurement::new("Y", |s| s.y as f64),
            Measurement::new("Angle", |s| s.angle as f64),
        ],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHATemperature",
        measurements: &[Measurement::new("Temperature", |s| s.temperature as f64)],
        labels: &[LAST_UPDATED],
    },
    SensorRule {
        type_tag: "ZHAThermostat",
        measurements: &[
            Measurement::new("On", |s| encode_bool(s.on)),
            Measurement::new("Floortemperature", |s| s.floortemperature as f64),
            Measurement::new("Heating", |s| encode_bool(s.heating)),
            Measurement::new("Mountingmodeactive", |s| {
                encode_bool(s.mountingmodeactive)
            }),
            Measurement::new("Temperature", |s| s.temperature as f64),
            Measurement::new("Valve", |s| s.valve as f64),
        ],
        labels: &[
            Label::new("Errorcode", |s| s.errorcode.clone()),
            Label::new("Fanmode", |s| s.fanmode.clone()),
            LAST_UPDATED,
            Label::new("Windowopen", |s| s.windowopen.clone()),
        ],
    },
    SensorRule {
        type_tag: "ZHATime",
        measurements: &[],
        labels: &[
            Label::new("Lastset", |s| s.lastset.to_string()),
            LAST_UPDATED,
            Label::new("Localtime", |s| s.localtime.to_string()),
            Label::new("Utc", |s| s.utc.to_string()),
        ],
    },
    SensorRule {
        type_tag: "ZHAVibration",
        measurements: &[
            Measurement::new("Vibration", |s| encode_bool(s.vibration)),
            Measurement::new("Tiltangle", |s| s.tiltangle as f64),
            Measurement::new("Vibrationstrength", |s| s.vibrationstrength as f64),
        ],
        labels: &[
            LAST_UPDATED,
            Label::new("Orientation", |s| format_list(&s.orientation)),
        ],
    },
    SensorRule {
        type_tag: "ZHAWater",
        measurements: &[
            Measurement::new("Water", |s| encode_bool(s.water)),
            LOW_BATTERY,
            TAMPERED,
        ],
        labels: &[LAST_UPDATED],
    },
];

/// Look up the rule for a type tag.
pub fn rule_for(type_tag: &str) -> Option<&'static SensorRule> {
    RULES.iter().find(|rule| rule.type_tag == type_tag)
}

/// Every type tag with a mapping rule.
pub fn known_types() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|rule| rule.type_tag)
}

/// Measurements and labels derived from one sensor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReadings {
    pub measurements: MeasurementSet,
    pub labels: LabelSet,
}

impl SensorReadings {
    /// True when the sensor type had no rule.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty() && self.labels.is_empty()
    }
}

/// Apply the type-specific rule to a state bag.
///
/// Produces only the type-specific fields; see [`map_sensor`] for the full
/// label set. An unknown type tag yields empty sets.
pub fn map_state(type_tag: &str, state: &SensorState) -> SensorReadings {
    let Some(rule) = rule_for(type_tag) else {
        return SensorReadings::default();
    };

    let measurements = rule
        .measurements
        .iter()
        .map(|m| (m.name.to_string(), m.read(state)))
        .collect();

    let labels = rule
        .labels
        .iter()
        .map(|l| (l.name.to_string(), l.render(state)))
        .collect();

    SensorReadings {
        measurements,
        labels,
    }
}

/// Map a sensor snapshot to measurements and labels, including `Name` and `Type`.
pub fn map_sensor(sensor: &SensorSnapshot) -> SensorReadings {
    let mut readings = map_state(&sensor.sensor_type, &sensor.state);
    if readings.is_empty() {
        return readings;
    }

    readings
        .labels
        .insert(NAME_LABEL.to_string(), sensor.name.clone());
    readings
        .labels
        .insert(TYPE_LABEL.to_string(), sensor.sensor_type.clone());
    readings
}

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid
/// characters become underscores, runs of underscores collapse, and a
/// leading digit is prefixed with an underscore.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == ':' {
            result.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`; names starting with `__`
/// are reserved and get a `z` prefix.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}

/// Build the exposed gauge name from namespace, subsystem (sensor id) and measurement.
///
/// Format: `{namespace}_{subsystem}_{name}`, empty parts skipped.
pub fn build_metric_name(namespace: &str, subsystem: &str, name: &str) -> String {
    let joined = [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_");
    sanitize_metric_name(&joined)
}
