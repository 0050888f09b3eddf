//! Shared types and helpers used by the `operator`, `sidecar-injector`, and
//! `wal-receiver` binaries: the downstream CRD wire types, replication
//! context resolution, service-name derivation, and the ambient
//! logging/error/config stack all three processes share.

pub mod certmanager;
pub mod cnpg;
pub mod config;
pub mod errors;
pub mod naming;
pub mod quantity;
pub mod replication;
pub mod telemetry;

pub use config::Config;
pub use errors::{Error, Result};
pub use naming::{generate_service_name, REPLICATION_ROLE_LABEL};
pub use quantity::is_storage_shrink;
pub use replication::{CrossCloudNetworkingStrategy, ReplicationContext, ReplicationError, ReplicationState};
