//! Hardware-independent core library for dht-node
//!
//! This crate contains all platform-agnostic logic of the single-wire
//! humidity/temperature sensor node: the DHT11 pulse decoder, the telemetry
//! publisher, WiFi link supervision, the HTTP control surface, the node's
//! own log ring and the cooperative runtime loop tying them together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the host runner and tests).
//! Every hardware or network concern is reached through a small trait so the
//! firmware and the host runner plug in their own implementations.

#![no_std]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod error;
pub mod logging;
pub mod platform;
pub mod runtime;
pub mod sensors;
#[cfg(any(test, feature = "simulation"))]
pub mod simulation;
pub mod telemetry;

#[doc(hidden)]
pub use log as __log;
