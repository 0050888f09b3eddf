use documentdb_common::CrossCloudNetworkingStrategy;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::defaults;

/// Generates the `DocumentDB` Kubernetes wrapper struct from
/// `DocumentDBSpec`/`DocumentDBStatus`, the resource reconciled into a
/// downstream PG cluster, its credentials, replication topology, TLS, and
/// exposed service.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "DocumentDB",
    group = "db.microsoft.com",
    version = "preview",
    namespaced,
    shortname = "ddb"
)]
#[kube(status = "DocumentDBStatus")]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.status"}"#)]
#[kube(printcolumn = r#"{"name":"Connection String","type":"string","jsonPath":".status.connectionString"}"#)]
#[allow(non_snake_case)]
pub struct DocumentDBSpec {
    /// Number of nodes in the PostgreSQL cluster. Capped at 1 for this
    /// release; multi-node support is tracked for a future version.
    #[serde(default = "defaults::default_node_count")]
    pub nodeCount: i32,

    #[serde(default = "defaults::default_instances_per_node")]
    pub instancesPerNode: i32,

    #[serde(default)]
    pub storage: DocumentDBStorage,

    pub documentDBImage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gatewayImage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentialsSecretName: Option<String>,

    #[serde(default)]
    pub expose: ExposeSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,

    #[serde(default = "defaults::default_log_level")]
    pub logLevel: String,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusterReplication: Option<ClusterReplicationSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecarInjectorPluginName: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walReplicaPluginName: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[allow(non_snake_case)]
pub struct DocumentDBStorage {
    #[serde(default = "defaults::default_pvc_size")]
    pub pvcSize: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storageClass: Option<String>,
}

impl Default for DocumentDBStorage {
    fn default() -> Self {
        Self {
            pvcSize: defaults::default_pvc_size(),
            storageClass: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ServiceType {
    LoadBalancer,
    ClusterIP,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct ExposeSpec {
    #[serde(default = "default_service_type_enum")]
    pub serviceType: ServiceType,
}

fn default_service_type_enum() -> ServiceType {
    ServiceType::ClusterIP
}

impl Default for ExposeSpec {
    fn default() -> Self {
        Self {
            serviceType: ServiceType::ClusterIP,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Eks,
    Aks,
    Gke,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[allow(non_snake_case)]
pub struct Timeouts {
    #[serde(default = "defaults::default_stop_delay_seconds")]
    pub stopDelaySeconds: i64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stopDelaySeconds: defaults::default_stop_delay_seconds(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct TlsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayTlsSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[serde(tag = "mode")]
#[allow(non_snake_case)]
pub enum GatewayTlsSpec {
    Disabled,
    SelfSigned {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dnsNames: Option<Vec<String>>,
    },
    CertManager {
        issuerRef: IssuerRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dnsNames: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secretName: Option<String>,
    },
    Provided {
        secretName: String,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct IssuerRef {
    pub name: String,
    #[serde(default = "defaults::default_issuer_kind")]
    pub kind: String,
    #[serde(default = "defaults::default_issuer_group")]
    pub group: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct ClusterReplicationSpec {
    pub primary: String,
    pub clusterList: Vec<ClusterListEntry>,
    #[serde(default)]
    pub crossCloudNetworkingStrategy: CrossCloudNetworkingStrategy,
    #[serde(default = "defaults::default_high_availability")]
    pub highAvailability: bool,
    /// Legacy boolean form, kept for backward compatibility with clusters
    /// created before `crossCloudNetworkingStrategy` existed; treated as
    /// `AzureFleet` when true and otherwise ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enableFleetForCrossCloud: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[allow(non_snake_case)]
pub struct ClusterListEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environmentOverride: Option<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storageClassOverride: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct BackupConfig {
    #[serde(default = "defaults::default_backup_retention_days")]
    pub retentionDays: i64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            retentionDays: defaults::default_backup_retention_days(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct BootstrapSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoverySpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct RecoverySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct DocumentDBStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectionString: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targetPrimary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localPrimary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsStatus>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct TlsStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secretName: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
