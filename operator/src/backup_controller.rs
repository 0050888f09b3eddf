//! Backup controller (§4.5): mirrors a `Backup` onto a PG-Operator
//! `Backup`, tracks phase/timestamps, computes expiry, and deletes expired
//! records.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::StreamExt;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    runtime::{
        controller::{Action, Controller},
        finalizer::Event as Finalizer,
        watcher::Config as WatcherConfig,
    },
    Resource,
};
use serde_json::json;
use tokio::time::Duration;
use tracing::*;

use documentdb_common::cnpg;

use crate::{
    apis::{
        backup_types::{Backup, BackupPhase, BackupStatus},
        documentdb_types::DocumentDB,
    },
    controller::Context,
    Config, Error, Result,
};

pub static BACKUP_FINALIZER: &str = "backups.db.microsoft.com";
const DEFAULT_RETENTION_DAYS: i64 = 30;

fn retention_days(backup: &Backup, cluster: Option<&DocumentDB>) -> i64 {
    backup
        .spec
        .retentionDays
        .or_else(|| cluster.and_then(|c| c.spec.backup.as_ref().map(|b| b.retentionDays)))
        .unwrap_or(DEFAULT_RETENTION_DAYS)
}

/// `expiredAt = (stoppedAt ?? creationTimestamp) + retentionDays*24h`.
fn compute_expiry(
    stopped_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    retention_days: i64,
) -> DateTime<Utc> {
    (stopped_at.unwrap_or(created_at)) + ChronoDuration::hours(retention_days * 24)
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

#[instrument(skip(ctx, backup), fields(trace_id))]
async fn reconcile(backup: Arc<Backup>, ctx: Arc<Context>) -> Result<Action> {
    let ns = backup.namespace().unwrap();
    let backups: Api<Backup> = Api::namespaced(ctx.client.clone(), &ns);

    kube::runtime::finalizer::finalizer(&backups, BACKUP_FINALIZER, backup, |event| async {
        match event {
            Finalizer::Apply(backup) => match reconcile_apply(&backup, ctx.clone()).await {
                Ok(action) => Ok(action),
                Err(action) => Ok(action),
            },
            Finalizer::Cleanup(_backup) => Ok(Action::await_change()),
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

/// §8 invariant 2: every `Backup` — whether hand-created by a user or
/// minted by a `ScheduledBackup` — carries an owner reference back to its
/// `DocumentDB`, so deleting the cluster cascades to its backups. Patches
/// only when the reference is missing, since a merge patch on
/// `ownerReferences` replaces the whole array rather than appending to it.
async fn ensure_documentdb_owner_ref(
    backups: &Api<Backup>,
    backup: &Backup,
    ddb: &DocumentDB,
) -> Result<(), Action> {
    let ddb_oref = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");
    let existing = backup.owner_references();
    if existing.iter().any(|o| o.uid == ddb_oref.uid) {
        return Ok(());
    }

    let mut orefs: Vec<_> = existing.to_vec();
    orefs.push(ddb_oref);

    let name = backup.name_any();
    let patch = json!({ "metadata": { "ownerReferences": orefs } });
    backups
        .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            error!("failed to set DocumentDB owner reference on backup {name}: {e}");
            Action::requeue(Duration::from_secs(30))
        })?;
    Ok(())
}

async fn reconcile_apply(backup: &Backup, ctx: Arc<Context>) -> Result<Action, Action> {
    let cfg = Config::default();
    let ns = backup.namespace().unwrap();
    let name = backup.name_any();
    let client = ctx.client.clone();
    let backups: Api<Backup> = Api::namespaced(client.clone(), &ns);

    let ddbs: Api<DocumentDB> = Api::namespaced(client.clone(), &ns);
    let cluster = ddbs.get_opt(&backup.spec.cluster.name).await.map_err(|e| {
        error!("failed to fetch DocumentDB {} for backup {name}: {e}", backup.spec.cluster.name);
        Action::requeue(Duration::from_secs(30))
    })?;

    // §3: a `Backup` is deleted when its `DocumentDB` is deleted, whether
    // the `Backup` was hand-created by a user or minted by a
    // `ScheduledBackup` (whose own owner reference is non-controlling, see
    // scheduledbackup_controller.rs) — ensure the controlling owner
    // reference is present regardless of how this `Backup` came to exist.
    if let Some(ddb) = &cluster {
        ensure_documentdb_owner_ref(&backups, backup, ddb).await?;
    }

    let status = backup.status.clone().unwrap_or_default();
    if status.is_terminal() {
        let created_at = backup
            .meta()
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        let stopped_at = status.stoppedAt.as_deref().and_then(parse_rfc3339);
        let retention = retention_days(backup, cluster.as_ref());
        let expired_at = status
            .expiredAt
            .as_deref()
            .and_then(parse_rfc3339)
            .unwrap_or_else(|| compute_expiry(stopped_at, created_at, retention));

        if Utc::now() >= expired_at {
            debug!("backup {name} expired at {expired_at}, deleting");
            backups.delete(&name, &Default::default()).await.map_err(|e| {
                error!("failed to delete expired backup {name}: {e}");
                Action::requeue(Duration::from_secs(30))
            })?;
            return Ok(Action::await_change());
        }
        return Ok(Action::requeue(Duration::from_secs(cfg.reconcile_requeue_seconds)));
    }

    // Skip duplicate backups on a cluster that is currently a replica.
    if let Some(ddb) = &cluster {
        let self_name = ddb.resolve_self_name(&ctx).await.unwrap_or_else(|_| ddb.name_any());
        if let Ok(repl) = ddb.resolve_replication_context(&self_name) {
            if !repl.is_primary() {
                patch_backup_status(&backups, &name, |s| {
                    s.phase = Some(BackupPhase::Skipped);
                    s.message = Some(format!(
                        "cluster '{}' is a replica; primary performs the backup",
                        backup.spec.cluster.name
                    ));
                })
                .await?;
                return Ok(Action::await_change());
            }
        }
    }

    let pg_backups: Api<cnpg::Backup> = Api::namespaced(client.clone(), &ns);
    let oref = backup.controller_owner_ref(&()).expect("Backup has apiVersion/kind");
    let desired = cnpg::Backup {
        metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns.clone()),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: cnpg::BackupSpec {
            cluster: cnpg::BackupCluster {
                name: backup.spec.cluster.name.clone(),
            },
            method: Some(cnpg::BackupMethod::VolumeSnapshot),
        },
        status: Default::default(),
    };

    let pp = PatchParams::apply("documentdb-operator").force();
    pg_backups
        .patch(&name, &pp, &Patch::Apply(&desired))
        .await
        .map_err(|e| {
            error!("failed to apply PG-operator backup {name}: {e}");
            Action::requeue(Duration::from_secs(10))
        })?;

    let observed = pg_backups.get_opt(&name).await.map_err(|e| {
        error!("failed to read back PG-operator backup {name}: {e}");
        Action::requeue(Duration::from_secs(10))
    })?;

    if let Some(pg_backup) = observed {
        let pg_status = pg_backup.status.unwrap_or_default();
        let phase = match pg_status.phase.as_deref() {
            Some("completed") => BackupPhase::Completed,
            Some("failed") => BackupPhase::Failed,
            Some("running") => BackupPhase::Running,
            _ => BackupPhase::Pending,
        };
        let created_at = backup
            .meta()
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        let retention = retention_days(backup, cluster.as_ref());
        let expired_at = if matches!(phase, BackupPhase::Completed | BackupPhase::Failed) {
            let stopped_at = pg_status.stopped_at.as_deref().and_then(parse_rfc3339);
            Some(compute_expiry(stopped_at, created_at, retention))
        } else {
            None
        };

        patch_backup_status(&backups, &name, |s| {
            s.phase = Some(phase);
            s.startedAt = pg_status.started_at.clone();
            s.stoppedAt = pg_status.stopped_at.clone();
            s.message = pg_status.error.clone();
            s.expiredAt = expired_at.map(|d| d.to_rfc3339());
        })
        .await?;
    }

    Ok(Action::requeue(Duration::from_secs(cfg.dependency_not_ready_requeue_seconds)))
}

async fn patch_backup_status(
    backups: &Api<Backup>,
    name: &str,
    mutate: impl FnOnce(&mut BackupStatus),
) -> Result<(), Action> {
    let mut status = BackupStatus::default();
    mutate(&mut status);
    let patch = json!({ "status": status });
    backups
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            error!("failed to patch backup status for {name}: {e}");
            Action::requeue(Duration::from_secs(10))
        })?;
    Ok(())
}

fn error_policy(_backup: Arc<Backup>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("backup reconcile failed: {:?}", error);
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let backups = Api::<Backup>::all(client);
    Controller::new(backups, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_exactly_retention_days_after_stopped() {
        let stopped = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let created = stopped - ChronoDuration::hours(1);
        let expiry = compute_expiry(Some(stopped), created, 2);
        assert_eq!(expiry, stopped + ChronoDuration::hours(48));
    }

    #[test]
    fn expiry_falls_back_to_creation_timestamp_when_not_stopped() {
        let created = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let expiry = compute_expiry(None, created, 30);
        assert_eq!(expiry, created + ChronoDuration::hours(30 * 24));
    }
}
