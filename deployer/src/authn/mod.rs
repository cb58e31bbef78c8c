//! Key material and request signing

pub mod keypair;
