//! fimon-service: the scan orchestrator, its loop and the operator commands.

pub mod baseline_cli;
pub mod logging;
pub mod monitor;
pub mod security_cli;
