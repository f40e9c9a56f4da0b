//! Integration tests for conbee-common library.

use conbee_common::{
    Error, LogFormat, LoggingConfig, SensorSnapshot, Timestamp, decode_sensors, parse_config,
};
use serde::Deserialize;

/// A trimmed capture of a real gateway with a mix of sensor types.
const GATEWAY_RESPONSE: &str = r#"{
    "1": {
        "config": { "configured": true, "on": true, "sunriseoffset": 30, "sunsetoffset": -30 },
        "etag": "bd5ee6b4f9ab8c1bd5e4f3a2b1c0d9e8",
        "manufacturername": "Philips",
        "modelid": "PHDL00",
        "name": "Daylight",
        "state": { "dark": true, "daylight": false, "lastupdated": "2023-03-12T18:03:41", "status": 230 },
        "swversion": "1.0",
        "type": "Daylight",
        "uniqueid": "00:21:2e:ff:ff:01:23:45-01"
    },
    "2": {
        "config": { "battery": 100, "offset": 0, "on": true, "reachable": true },
        "ep": 1,
        "etag": "0b3fd9b4e0d2d64d4e0d1b4f7a1c0e2d",
        "lastseen": "2023-03-12T18:10Z",
        "manufacturername": "LUMI",
        "modelid": "lumi.weather",
        "name": "Bathroom",
        "state": { "lastupdated": "2023-03-12T18:09:58.123", "temperature": 2287 },
        "swversion": "20191205",
        "type": "ZHATemperature",
        "uniqueid": "00:15:8d:00:04:5d:2e:11-01-0402"
    },
    "3": {
        "config": { "battery": 100, "offset": 0, "on": true, "reachable": true },
        "name": "Bathroom",
        "state": { "humidity": 6512, "lastupdated": "2023-03-12T18:09:58.125" },
        "type": "ZHAHumidity",
        "uniqueid": "00:15:8d:00:04:5d:2e:11-01-0405"
    },
    "4": {
        "config": { "battery": 87, "on": true, "reachable": true, "temperature": 2100 },
        "name": "Garage tilt",
        "state": {
            "lastupdated": "none",
            "orientation": [1, -2, 90],
            "tiltangle": 47,
            "vibration": true,
            "vibrationstrength": 80
        },
        "type": "ZHAVibration"
    },
    "5": {
        "config": null,
        "name": "Hall switch",
        "state": { "buttonevent": null, "lastupdated": null },
        "type": "ZHASwitch"
    },
    "6": "not a sensor"
}"#;

#[test]
fn test_decode_realistic_response() {
    let list = decode_sensors(GATEWAY_RESPONSE.as_bytes()).expect("decode failed");

    let ids: Vec<&str> = list.sensors.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

    assert_eq!(list.rejected.len(), 1);
    assert_eq!(list.rejected[0].id, "6");
}

#[test]
fn test_decoded_fields() {
    let list = decode_sensors(GATEWAY_RESPONSE.as_bytes()).unwrap();
    let by_id = |id: &str| -> &SensorSnapshot {
        list.sensors.iter().find(|s| s.id == id).unwrap()
    };

    let temperature = by_id("2");
    assert_eq!(temperature.name, "Bathroom");
    assert_eq!(temperature.sensor_type, "ZHATemperature");
    assert_eq!(temperature.manufacturername, "LUMI");
    assert_eq!(temperature.state.temperature, 2287);
    assert_eq!(temperature.config.battery, 100);
    assert!(temperature.config.reachable);
    assert_eq!(
        temperature.state.lastupdated.to_string(),
        "2023-03-12T18:09:58.123"
    );

    let vibration = by_id("4");
    assert_eq!(vibration.state.orientation, vec![1, -2, 90]);
    assert_eq!(vibration.state.vibrationstrength, 80);
    assert!(vibration.state.vibration);
    assert!(!vibration.state.lastupdated.is_set());
    assert_eq!(vibration.config.temperature, 2100);

    let daylight = by_id("1");
    assert!(daylight.state.dark);
    assert_eq!(daylight.config.sunsetoffset, -30);
}

#[test]
fn test_nulls_decode_as_zero_values() {
    let list = decode_sensors(GATEWAY_RESPONSE.as_bytes()).unwrap();
    let switch = list.sensors.iter().find(|s| s.id == "5").unwrap();

    assert_eq!(switch.state.buttonevent, 0);
    assert_eq!(switch.state.lastupdated, Timestamp::UNSET);
    assert_eq!(switch.config.battery, 0);
    assert!(!switch.config.reachable);
}

#[test]
fn test_non_object_response_fails_whole_cycle() {
    let err = decode_sensors(br#"[{"error":{"type":1}}]"#).unwrap_err();
    assert!(matches!(err, Error::Payload(_)));
    assert!(err.to_string().contains("an array"));

    assert!(matches!(decode_sensors(b"{ broken"), Err(Error::Json(_))));
}

#[test]
fn test_timestamp_round_trip_through_json() {
    let list = decode_sensors(GATEWAY_RESPONSE.as_bytes()).unwrap();
    let sensor = list.sensors.iter().find(|s| s.id == "3").unwrap();

    let encoded = serde_json::to_value(&sensor.state).unwrap();
    assert_eq!(encoded["lastupdated"], "2023-03-12T18:09:58.125");
    assert_eq!(encoded["lastset"], "none");
}

#[test]
fn test_logging_config_in_json5() {
    #[derive(Deserialize)]
    struct Wrapper {
        logging: LoggingConfig,
    }

    let wrapper: Wrapper = parse_config(
        r#"{
            // comments are allowed
            logging: { level: "debug", format: "json" },
        }"#,
    )
    .unwrap();

    assert_eq!(wrapper.logging.level, "debug");
    assert_eq!(wrapper.logging.format, LogFormat::Json);
}
