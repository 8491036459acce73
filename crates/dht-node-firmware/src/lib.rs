//! ESP32-S3 adapters for the dht-node core.
//!
//! Each module implements one of the core's collaborator traits on top of
//! esp-hal, esp-radio and embassy-net. `bin/main.rs` wires them together.

#![no_std]

extern crate alloc;

pub mod board;
pub mod config;
pub mod dht_line;
pub mod listener;
pub mod log_store;
pub mod mqtt;
pub mod pins;
pub mod socket;
pub mod wifi;
