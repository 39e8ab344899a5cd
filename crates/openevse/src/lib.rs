//! High-level client for OpenEVSE charging controllers.
//!
//! This crate sits on top of the RAPI dispatcher in `rapi-io` and gives the
//! controller's commands typed Rust signatures. It provides:
//!
//! - **Command builders** ([`commands`]) -- construct RAPI commands for state
//!   control, settings, clock, limits and metering, and parse the replies
//!   into typed values.
//! - **Controller handle** ([`evse`]) -- [`Evse`], one async method per
//!   operation, plus state-change subscriptions and the reset handshake.
//! - **Builder** ([`builder`]) -- fluent builder for constructing [`Evse`]
//!   instances with stock-firmware defaults.
//!
//! # Radix conventions
//!
//! The firmware mixes number bases: the state in `FE`/`FD`/`FS` replies,
//! the settings flags word and the fault counters are hexadecimal, while the
//! `GS` state and everything else are decimal. The parsers in [`commands`]
//! take care of this.
//!
//! # Example
//!
//! ```
//! use openevse::commands::{cmd_set_current_capacity, parse_state_reply};
//! use rapi_core::{EvseState, Outcome, Reply};
//!
//! let cmd = cmd_set_current_capacity(32);
//! assert_eq!(cmd.to_string(), "SC 32");
//!
//! let reply = Reply {
//!     outcome: Outcome::Ok,
//!     params: vec!["3".into(), "120".into()],
//! };
//! let (state, elapsed) = parse_state_reply(&reply).unwrap();
//! assert_eq!(state, EvseState::Charging);
//! assert_eq!(elapsed.as_secs(), 120);
//! ```

pub mod builder;
pub mod commands;
pub mod evse;

pub use builder::EvseBuilder;
pub use commands::{
    CapacityRange, ChargeTimer, EnergyUsage, FaultCounters, Flags, LcdColor, LcdType,
    Measurement, MeterCalibration, SafetyCheck, ServiceLevel, Session, Settings, StatusAction,
    Temperatures, Version,
};
pub use evse::Evse;

pub use rapi_core::{ChecksumMode, Command, Error, EvseState, Notification, Reply, Result};
pub use rapi_io::{SendPolicy, Subscription, SubscriptionId};
