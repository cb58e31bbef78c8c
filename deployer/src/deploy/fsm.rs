//! Finite State Machine for target server status

use serde::{Deserialize, Serialize};

use crate::beacon::response::HealthReport;

/// Server lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Beacon could not be reached, or has never been probed
    #[default]
    Unreachable,

    /// Beacon answers but no application is installed
    Ready,

    /// Application installed and its environment file found
    Active,

    /// Application installed without an environment file
    Legacy,
}

impl ServerStatus {
    /// Title-cased label
    pub fn label(&self) -> &'static str {
        match self {
            ServerStatus::Unreachable => "Unreachable",
            ServerStatus::Ready => "Ready",
            ServerStatus::Active => "Active",
            ServerStatus::Legacy => "Legacy",
        }
    }

    /// Status implied by a probe outcome.
    ///
    /// The probe fully determines the next status; the previous one plays
    /// no part.
    pub fn from_probe(event: &ProbeEvent) -> ServerStatus {
        match event {
            ProbeEvent::Failed(_) => ServerStatus::Unreachable,
            ProbeEvent::Answered(report) => match (report.app_installed, report.env_found) {
                (false, _) => ServerStatus::Ready,
                (true, false) => ServerStatus::Legacy,
                (true, true) => ServerStatus::Active,
            },
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of a health probe
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    /// The beacon answered `healthCheck`
    Answered(HealthReport),

    /// Network or protocol failure
    Failed(String),
}
