use std::env;

/// Process-wide configuration, sourced from the environment once at
/// start-up. No other global mutable state exists besides this, the
/// Kubernetes client, and the scheme registry.
#[derive(Clone, Debug)]
pub struct Config {
    pub enable_backup: bool,
    pub default_backup_retention_days: i64,
    pub reconcile_requeue_seconds: u64,
    pub dependency_not_ready_requeue_seconds: u64,
    pub gateway_default_image: String,
    pub gateway_port: u16,
    pub wal_pvc_default_size: String,
    pub wal_directory_default: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_backup: from_env_default("ENABLE_BACKUP", "true").parse().unwrap_or(true),
            default_backup_retention_days: from_env_default("DEFAULT_BACKUP_RETENTION_DAYS", "30")
                .parse()
                .unwrap_or(30),
            reconcile_requeue_seconds: from_env_default("RECONCILE_REQUEUE_SECONDS", "60")
                .parse()
                .unwrap_or(60),
            dependency_not_ready_requeue_seconds: from_env_default(
                "DEPENDENCY_NOT_READY_REQUEUE_SECONDS",
                "10",
            )
            .parse()
            .unwrap_or(10),
            gateway_default_image: from_env_default(
                "GATEWAY_DEFAULT_IMAGE",
                "ghcr.io/microsoft/documentdb/documentdb-gateway:latest",
            ),
            gateway_port: from_env_default("GATEWAY_PORT", "10260").parse().unwrap_or(10260),
            wal_pvc_default_size: from_env_default("WAL_PVC_DEFAULT_SIZE", "10Gi"),
            wal_directory_default: from_env_default(
                "WAL_DIRECTORY_DEFAULT",
                "/var/lib/postgresql/wal",
            ),
        }
    }
}

fn from_env_default(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_owned())
}
