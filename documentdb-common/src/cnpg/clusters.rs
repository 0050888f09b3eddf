//! Hand-curated subset of the PG-Operator's `Cluster` API object, covering
//! only the fields this operator actually reads or writes. Field names and
//! nesting mirror the upstream wire format bit-for-bit rather than this
//! crate's own naming conventions, since bit-level compatibility with the
//! external PG-Operator is a hard requirement. A full mirror would be
//! machine-generated from the PG-Operator's CRD (the way
//! `cloudnativepg::clusters` is produced by `kopium` upstream); here we
//! hand-author only the surface this operator touches.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "postgresql.cnpg.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters"
)]
#[kube(namespaced)]
#[kube(status = "ClusterStatus")]
pub struct ClusterSpec {
    pub instances: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "imageName")]
    pub image_name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "storageConfiguration"
    )]
    pub storage_configuration: Option<ClusterStorageConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<ClusterBootstrap>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "postgresConfiguration"
    )]
    pub postgres_configuration: Option<ClusterPostgresConfiguration>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "externalClusters"
    )]
    pub external_clusters: Option<Vec<ClusterExternalClusters>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<ClusterPlugin>>,
    /// Names of downstream clusters that should be treated as streaming
    /// replicas of this cluster, beyond what CNPG discovers natively; this
    /// operator uses it to list fleet members and the WAL-receiver sink.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "standbyNames")]
    pub standby_names: Option<Vec<String>>,
    /// Set when this cluster is the demoted (or not-yet-promoted) side of a
    /// fleet failover: designates it a replica of `source`, an entry in
    /// `external_clusters` pointing at the current fleet primary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<ClusterReplicaConfiguration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterReplicaConfiguration {
    pub enabled: bool,
    pub source: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterStorageConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "storageClass")]
    pub storage_class: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterBootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "initDB")]
    pub init_db: Option<ClusterBootstrapInitDb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<ClusterBootstrapRecovery>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterBootstrapInitDb {
    /// Arbitrary SQL statements run immediately after cluster creation,
    /// used here to create the DocumentDB extension, roles, and required
    /// shared libraries (citus, pg_cron, pg_documentdb_core, pg_documentdb).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "postInitSQL"
    )]
    pub post_init_sql: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterBootstrapRecovery {
    pub source: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterExternalClusters {
    pub name: String,
    /// Connection string of the form
    /// `host=<service> dbname=postgres user=streaming_replica sslmode=verify-full`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "connectionParameters"
    )]
    pub connection_parameters: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<ClusterExternalClustersPassword>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterExternalClustersPassword {
    pub name: String,
    pub key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterPostgresConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
    /// Shared-preload libraries beyond what the PG-Operator adds on its
    /// own (citus, pg_cron, pg_documentdb_core, pg_documentdb).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "additionalLibraries"
    )]
    pub additional_libraries: Option<Vec<String>>,
    /// `pg_hba.conf` entries permitting internal replication between
    /// fleet members, appended ahead of the PG-Operator's own generated
    /// rules.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "pgHBA")]
    pub pg_hba: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterPlugin {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "targetPrimary"
    )]
    pub target_primary: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "currentPrimary"
    )]
    pub current_primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "writeService")]
    pub write_service: Option<String>,
}
