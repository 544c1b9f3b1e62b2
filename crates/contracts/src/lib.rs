//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Timestamps are seconds since the Unix epoch (f64)
//! - Node clock and Host clock are distinct types: [`NodeTime`] / [`HostTime`]
//! - The only bridge between them is [`ClockOffset::correct`]

mod blueprint;
mod error;
mod position_source;
mod run;
mod sample;
mod sink;
mod time;
mod wire;

pub use blueprint::*;
pub use error::*;
pub use position_source::PositionSource;
pub use run::*;
pub use sample::*;
pub use sink::*;
pub use time::*;
pub use wire::*;
