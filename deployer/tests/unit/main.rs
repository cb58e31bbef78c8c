//! Integration tests for the beacon deployer

mod common;
mod test_executor;
mod test_keypair;
mod test_status;
