//! Beacon Deployer Library
//!
//! Signed deployments to remote beacon agents: key management, the beacon
//! wire protocol, archive assembly and a resumable step chain executor.

pub mod archive;
pub mod authn;
pub mod beacon;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod storage;
pub mod utils;
