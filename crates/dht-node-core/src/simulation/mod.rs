//! Virtual collaborators
//!
//! Everything the core talks to through a trait has a scripted stand-in here:
//! a DHT11 on a virtual single-wire bus, a WiFi link, a listening socket and
//! a broker. Each stand-in hands out a cheap probe sharing its state, so a
//! test can keep observing it after the real component took ownership.
//! The host runner uses the simulated sensor as its data source.

mod board;
mod dht11;
mod network;

pub use board::{InstantDelay, RecordingPin, ResetRequested, VirtualClock};
pub use dht11::{SimulatedClock, SimulatedDelay, SimulatedDht11, SimulatedLine};
pub use network::{
    BrokerProbe, ListenerProbe, RecordingBroker, ScriptedClient, ScriptedListener, SimulatedLink,
    SimulatedFault,
};
