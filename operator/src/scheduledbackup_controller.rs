//! ScheduledBackup controller (§4.6): evaluates a cron schedule and mints a
//! `Backup` when due, enforcing at-most-one-concurrent-backup-per-schedule.

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::stream::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
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

use crate::{
    apis::{
        backup_types::{Backup, BackupClusterRef, BackupPhase, BackupSpec},
        scheduledbackup_types::{ScheduledBackup, ScheduledBackupStatus},
    },
    controller::Context,
    Config, Error, Result,
};

pub static SCHEDULEDBACKUP_FINALIZER: &str = "scheduledbackups.db.microsoft.com";
const SCHEDULE_LABEL: &str = "db.microsoft.com/scheduledbackup";

/// The spec's 5-field crontab is translated to the 6-field (with seconds)
/// syntax the `cron` crate requires by pinning seconds to zero.
fn parse_schedule(expr: &str) -> std::result::Result<Schedule, cron::error::Error> {
    Schedule::from_str(&format!("0 {expr}"))
}

#[instrument(skip(ctx, sb), fields(trace_id))]
async fn reconcile(sb: Arc<ScheduledBackup>, ctx: Arc<Context>) -> Result<Action> {
    let ns = sb.namespace().unwrap();
    let sbs: Api<ScheduledBackup> = Api::namespaced(ctx.client.clone(), &ns);

    kube::runtime::finalizer::finalizer(&sbs, SCHEDULEDBACKUP_FINALIZER, sb, |event| async {
        match event {
            Finalizer::Apply(sb) => match reconcile_apply(&sb, ctx.clone()).await {
                Ok(action) => Ok(action),
                Err(action) => Ok(action),
            },
            Finalizer::Cleanup(_sb) => Ok(Action::await_change()),
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn reconcile_apply(sb: &ScheduledBackup, ctx: Arc<Context>) -> Result<Action, Action> {
    let cfg = Config::default();
    let ns = sb.namespace().unwrap();
    let name = sb.name_any();
    let client = ctx.client.clone();
    let sbs: Api<ScheduledBackup> = Api::namespaced(client.clone(), &ns);
    let backups: Api<Backup> = Api::namespaced(client.clone(), &ns);

    let schedule = parse_schedule(&sb.spec.schedule).map_err(|e| {
        warn!("scheduledbackup {name} has an invalid cron schedule '{}': {e}", sb.spec.schedule);
        Action::requeue(Duration::from_secs(cfg.reconcile_requeue_seconds))
    })?;

    let lp = ListParams::default().labels(&format!("{SCHEDULE_LABEL}={name}"));
    let owned = backups.list(&lp).await.map_err(|e| {
        error!("failed to list backups for scheduledbackup {name}: {e}");
        Action::requeue(Duration::from_secs(30))
    })?;

    let running = owned.iter().any(|b| {
        !b.status
            .as_ref()
            .map(|s| matches!(s.phase, Some(BackupPhase::Completed) | Some(BackupPhase::Failed) | Some(BackupPhase::Skipped)))
            .unwrap_or(false)
    });

    let last_backup_time = owned
        .iter()
        .filter_map(|b| b.meta().creation_timestamp.as_ref().map(|t| t.0))
        .max();

    let status = sb.status.clone().unwrap_or_default();
    let anchor = catch_up_anchor(last_backup_time, status.lastScheduledTime.as_deref(), Utc::now());

    let next = schedule.after(&anchor).next().unwrap_or_else(Utc::now);

    if sb.spec.suspend {
        patch_status(&sbs, &name, |s| {
            s.nextScheduledTime = Some(next.to_rfc3339());
        })
        .await?;
        return Ok(Action::requeue(Duration::from_secs(cfg.reconcile_requeue_seconds)));
    }

    if running {
        debug!("scheduledbackup {name} has a backup in flight, deferring");
        patch_status(&sbs, &name, |s| {
            s.nextScheduledTime = Some(next.to_rfc3339());
        })
        .await?;
        return Ok(Action::requeue(Duration::from_secs(30)));
    }

    if Utc::now() >= next {
        let backup_name = format!("{name}-{}", Utc::now().format("%Y%m%d-%H%M%S"));
        // Non-controlling: the backup controller sets the `DocumentDB` as
        // the controlling owner on its next reconcile (a Backup can only
        // have one `controller: true` owner), so this stays a secondary
        // reference for lineage back to the schedule that minted it.
        let mut oref = sb.controller_owner_ref(&()).expect("ScheduledBackup has apiVersion/kind");
        oref.controller = Some(false);
        oref.block_owner_deletion = Some(false);
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(SCHEDULE_LABEL.to_string(), name.clone());

        let backup = Backup {
            metadata: ObjectMeta {
                name: Some(backup_name.clone()),
                namespace: Some(ns.clone()),
                owner_references: Some(vec![oref]),
                labels: Some(labels),
                ..Default::default()
            },
            spec: BackupSpec {
                cluster: BackupClusterRef {
                    name: sb.spec.cluster.name.clone(),
                },
                retentionDays: sb.spec.retentionDays,
            },
            status: None,
        };

        let pp = PatchParams::apply("documentdb-operator").force();
        backups.patch(&backup_name, &pp, &Patch::Apply(&backup)).await.map_err(|e| {
            error!("failed to create backup {backup_name} for scheduledbackup {name}: {e}");
            Action::requeue(Duration::from_secs(30))
        })?;

        let after_creation = schedule.after(&Utc::now()).next().unwrap_or(next);
        patch_status(&sbs, &name, |s| {
            s.lastScheduledTime = Some(Utc::now().to_rfc3339());
            s.nextScheduledTime = Some(after_creation.to_rfc3339());
            s.lastBackupName = Some(backup_name.clone());
        })
        .await?;
        info!("scheduledbackup {name} created backup {backup_name}");
    } else {
        patch_status(&sbs, &name, |s| {
            s.nextScheduledTime = Some(next.to_rfc3339());
        })
        .await?;
    }

    Ok(Action::requeue(Duration::from_secs(cfg.reconcile_requeue_seconds)))
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
}

/// The point the cron schedule is next evaluated from: the most recent
/// owned `Backup`'s creation time takes priority (it reflects what actually
/// ran), falling back to the status's own `lastScheduledTime` for a
/// ScheduledBackup that's never produced a Backup yet, and finally `now`
/// for a brand-new ScheduledBackup. This is what lets a ScheduledBackup
/// catch up on missed runs after the operator was down rather than resetting
/// its schedule to "starting now".
fn catch_up_anchor(
    last_backup_time: Option<DateTime<Utc>>,
    last_scheduled_time: Option<&str>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    last_backup_time
        .or_else(|| last_scheduled_time.and_then(parse_rfc3339))
        .unwrap_or(now)
}

async fn patch_status(
    sbs: &Api<ScheduledBackup>,
    name: &str,
    mutate: impl FnOnce(&mut ScheduledBackupStatus),
) -> Result<(), Action> {
    let mut status = ScheduledBackupStatus::default();
    mutate(&mut status);
    let patch = json!({ "status": status });
    sbs.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            error!("failed to patch scheduledbackup status for {name}: {e}");
            Action::requeue(Duration::from_secs(10))
        })?;
    Ok(())
}

fn error_policy(_sb: Arc<ScheduledBackup>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("scheduledbackup reconcile failed: {:?}", error);
    Action::requeue(Duration::from_secs(5 * 60))
}

pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let sbs = Api::<ScheduledBackup>::all(client);
    Controller::new(sbs, WatcherConfig::default().any_semantic())
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
    fn parses_standard_5_field_expression() {
        assert!(parse_schedule("*/5 * * * *").is_ok());
    }

    #[test]
    fn rejects_garbage_expression() {
        assert!(parse_schedule("not a schedule").is_err());
    }

    #[test]
    fn next_occurrence_is_strictly_after_anchor() {
        let schedule = parse_schedule("0 0 * * *").unwrap();
        let anchor = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let next = schedule.after(&anchor).next().unwrap();
        assert!(next > anchor);
    }

    #[test]
    fn catch_up_anchor_prefers_last_backup_over_status() {
        let last_backup = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2026-01-03T00:00:00Z").unwrap().with_timezone(&Utc);
        let anchor = catch_up_anchor(Some(last_backup), Some("2026-01-02T00:00:00Z"), now);
        assert_eq!(anchor, last_backup);
    }

    #[test]
    fn catch_up_anchor_falls_back_to_status_when_no_backup_exists_yet() {
        let last_scheduled = "2026-01-02T00:00:00Z";
        let now = DateTime::parse_from_rfc3339("2026-01-03T00:00:00Z").unwrap().with_timezone(&Utc);
        let anchor = catch_up_anchor(None, Some(last_scheduled), now);
        assert_eq!(anchor, parse_rfc3339(last_scheduled).unwrap());
    }

    #[test]
    fn catch_up_anchor_falls_back_to_now_for_a_brand_new_scheduledbackup() {
        let now = DateTime::parse_from_rfc3339("2026-01-03T00:00:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(catch_up_anchor(None, None, now), now);
    }
}
