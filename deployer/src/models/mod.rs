//! Domain records

pub mod server;
pub mod step;
