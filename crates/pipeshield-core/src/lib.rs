//! Core types for pipeshield.
//!
//! This crate holds the configuration model, the duration codec used by the
//! config file, and the gate-state model shared by the decision store, the
//! reconciler, and the admission webhook. It has no I/O of its own.

pub mod config;
pub mod duration;
pub mod error;
pub mod gate;

pub use config::{Config, HttpClientConfig, PrometheusConfig, StrategySpec};
pub use duration::Duration;
pub use error::ConfigError;
pub use gate::{GateState, StoredGate, GATE_KEY};
