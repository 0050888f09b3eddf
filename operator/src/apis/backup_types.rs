use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A one-shot snapshot request for a `DocumentDB` cluster. Mirrored onto a
/// PG-Operator `Backup` object (`VolumeSnapshot` method) and kept in sync by
/// the backup controller; never executes the backup itself.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "Backup",
    group = "db.microsoft.com",
    version = "preview",
    namespaced,
    shortname = "ddbbackup"
)]
#[kube(status = "BackupStatus")]
#[kube(printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster.name"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Started","type":"string","jsonPath":".status.startedAt"}"#)]
#[kube(printcolumn = r#"{"name":"Stopped","type":"string","jsonPath":".status.stoppedAt"}"#)]
#[kube(printcolumn = r#"{"name":"Expired","type":"string","jsonPath":".status.expiredAt"}"#)]
#[kube(printcolumn = r#"{"name":"Message","type":"string","jsonPath":".status.message"}"#)]
#[allow(non_snake_case)]
pub struct BackupSpec {
    pub cluster: BackupClusterRef,

    /// Overrides `DocumentDB.spec.backup.retentionDays` for this one backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retentionDays: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct BackupClusterRef {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackupPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[allow(non_snake_case)]
pub struct BackupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BackupPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startedAt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stoppedAt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiredAt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase,
            Some(BackupPhase::Completed) | Some(BackupPhase::Failed) | Some(BackupPhase::Skipped)
        )
    }
}
