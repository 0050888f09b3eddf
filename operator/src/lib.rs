/// Expose all controller components used by main
pub mod controller;
pub use crate::controller::*;
pub mod apis;

pub mod backup_controller;
pub mod defaults;
pub mod pgcluster;
pub mod scheduledbackup_controller;
pub mod secret;
pub mod service;
pub mod tls;

mod metrics;
pub use metrics::Metrics;

pub use documentdb_common::{telemetry, Config, Error, Result};
