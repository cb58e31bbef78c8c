//! Signed transport to a remote beacon
//!
//! A logical [`command::Command`] is sealed into an [`envelope::Envelope`]
//! (base64 JSON payload plus RSA signature), carried by one of the
//! [`transport::Transport`] strategies and the HTTP answer is turned into a
//! typed result by [`response::classify`].

pub mod client;
pub mod command;
pub mod envelope;
pub mod response;
pub mod transport;

pub use client::{Beacon, BeaconClient};
pub use command::{Command, Script};
pub use response::{HealthReport, ResponseBody};
