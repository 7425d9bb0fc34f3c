//! Hübner C-WAVE tunable laser control
//!
//! Client for the C-WAVE's line-based TCP protocol, plus a simulated device
//! for tests and bench work without hardware.
//!
//! - [`transport`]: TCP link with stale-input flushing and reply parsing
//! - [`codec`]: typed commands, fixed-point conversion, payload decoding
//! - [`device`]: the [`CWave`] facade
//! - [`sim`]: [`SimulatedCwave`], a loopback server speaking the protocol

pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod sim;
pub mod transport;
pub mod types;

pub use codec::{Command, Decode, Frame};
pub use config::ClientConfig;
pub use device::{CWave, SIGNATURE_PREFIX};
pub use error::{CwaveError, CwaveResult};
pub use sim::SimulatedCwave;
pub use transport::{Connection, Link, DEFAULT_PORT};
pub use types::{
    Condition, ExtRampMode, Log, MappingChannel, PiezoChannel, PiezoMode, ShutterChannel,
    StatusBit, StatusBits, StepperChannel, TemperatureChannel,
};
