//! Wire types for the delegate PG-Operator's `Cluster` and `Backup` CRDs.
//! This operator never runs a PostgreSQL cluster itself; it produces these
//! objects and lets the PG-Operator converge them, the same delegation
//! pattern the teacher uses for its own downstream CloudNativePG objects.
//! (The PG-Operator's own `ScheduledBackup` kind has no counterpart here:
//! cron evaluation happens in this operator's `ScheduledBackup` controller,
//! which emits this crate's `Backup` objects directly.)

pub mod backups;
pub mod clusters;

pub use backups::{Backup, BackupCluster, BackupMethod, BackupSpec, BackupStatus};
pub use clusters::{
    Cluster, ClusterBootstrap, ClusterBootstrapInitDb, ClusterBootstrapRecovery,
    ClusterExternalClusters, ClusterExternalClustersPassword, ClusterPlugin,
    ClusterPostgresConfiguration, ClusterReplicaConfiguration, ClusterSpec, ClusterStatus,
    ClusterStorageConfiguration,
};
