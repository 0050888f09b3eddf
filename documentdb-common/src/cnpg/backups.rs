use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "postgresql.cnpg.io",
    version = "v1",
    kind = "Backup",
    plural = "backups"
)]
#[kube(namespaced)]
#[kube(status = "BackupStatus")]
pub struct BackupSpec {
    pub cluster: BackupCluster,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<BackupMethod>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct BackupCluster {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum BackupMethod {
    BarmanObjectStore,
    VolumeSnapshot,
}

impl Default for BackupMethod {
    fn default() -> Self {
        BackupMethod::VolumeSnapshot
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct BackupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "startedAt")]
    pub started_at: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "stoppedAt"
    )]
    pub stopped_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "error")]
    pub error: Option<String>,
}

impl BackupStatus {
    pub fn is_completed(&self) -> bool {
        self.phase.as_deref() == Some("completed")
    }

    pub fn is_failed(&self) -> bool {
        self.phase.as_deref() == Some("failed")
    }
}
