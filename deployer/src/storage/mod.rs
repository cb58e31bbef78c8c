//! Local storage for settings, server records and deploy runs

pub mod layout;
pub mod servers;
pub mod settings;

pub use layout::StorageLayout;
pub use settings::{PathSettings, Settings, TransportSettings};
