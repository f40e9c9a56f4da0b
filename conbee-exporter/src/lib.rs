//! Prometheus metrics exporter for deCONZ/ConBee sensors.
//!
//! This crate polls a deCONZ gateway's sensor API, maps every supported
//! sensor type onto a fixed set of gauges and labels, and exposes them via an
//! HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ deCONZ gateway  │────>│     Poller      │────>│  GaugeRegistry  │────>│   HTTP Server   │
//! │ (/api/<key>/..) │     │ (map + publish) │     │    (gauges)     │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! CONBEE_API_KEY=0123456789 conbee-exporter --conbee-uri 192.168.1.20:80
//! ```
//!
//! Without `--conbee-uri` the gateway is located through the Phoscon
//! discovery service. See [`config::ExporterConfig`] for the optional
//! configuration file.

pub mod config;
pub mod gateway;
pub mod http;
pub mod mapping;
pub mod poller;
pub mod registry;

pub use config::ExporterConfig;
pub use gateway::{GatewayClient, GatewayError};
pub use http::HttpServer;
pub use mapping::{SensorReadings, encode_bool, map_sensor, map_state};
pub use poller::{SensorFilter, SensorPoller};
pub use registry::{GaugeRegistry, SharedRegistry};
