use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A cron-driven `Backup` factory for a `DocumentDB` cluster.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "ScheduledBackup",
    group = "db.microsoft.com",
    version = "preview",
    namespaced,
    shortname = "ddbsbk"
)]
#[kube(status = "ScheduledBackupStatus")]
#[kube(printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.cluster.name"}"#)]
#[kube(printcolumn = r#"{"name":"Schedule","type":"string","jsonPath":".spec.schedule"}"#)]
#[kube(printcolumn = r#"{"name":"Retention Days","type":"integer","jsonPath":".spec.retentionDays"}"#)]
#[kube(printcolumn = r#"{"name":"Suspend","type":"boolean","jsonPath":".spec.suspend"}"#)]
#[kube(printcolumn = r#"{"name":"Last Scheduled","type":"string","jsonPath":".status.lastScheduledTime"}"#)]
#[allow(non_snake_case)]
pub struct ScheduledBackupSpec {
    pub cluster: super::backup_types::BackupClusterRef,

    /// Standard 5-field cron expression, evaluated in UTC.
    pub schedule: String,

    #[serde(default)]
    pub suspend: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retentionDays: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[allow(non_snake_case)]
pub struct ScheduledBackupStatus {
    /// Creation timestamp of the most recent `Backup` this schedule created,
    /// used as the `after` anchor for the next cron evaluation — never the
    /// wall-clock time the controller last ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastScheduledTime: Option<String>,

    /// Next time the cron schedule is due; recomputed on every reconcile so
    /// it stays visible even while `suspend` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nextScheduledTime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastBackupName: Option<String>,
}
