//! Deployment module

pub mod executor;
pub mod fsm;
pub mod run;

pub use executor::{StepExecutor, StepFailure, StepOutcome, StepReport};
pub use fsm::{ProbeEvent, ServerStatus};
pub use run::DeployRun;
