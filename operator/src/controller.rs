//! The `DocumentDB` reconciler (§4.1): converges a `DocumentDB` into a
//! downstream PG-Operator `Cluster`, its credentials, TLS, and exposed
//! services, then propagates observed status back.

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        watcher::Config as WatcherConfig,
    },
    Resource,
};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use documentdb_common::{CrossCloudNetworkingStrategy, ReplicationContext, ReplicationError};

use crate::{
    apis::documentdb_types::{DocumentDB, DocumentDBStatus},
    backup_controller, pgcluster, scheduledbackup_controller, secret, service, telemetry,
    tls::reconcile_tls,
    Config, Error, Metrics, Result,
};

pub static DOCUMENTDB_FINALIZER: &str = "documentdbs.db.microsoft.com";
const CLUSTER_NAME_CONFIGMAP_NAMESPACE: &str = "kube-system";
const CLUSTER_NAME_CONFIGMAP_NAME: &str = "cluster-name";

/// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus-style metrics
    pub metrics: Metrics,
}

pub fn requeue_normal_with_jitter(cfg: &Config) -> Action {
    let jitter = rand::thread_rng().gen_range(0..15);
    Action::requeue(Duration::from_secs(cfg.reconcile_requeue_seconds + jitter))
}

fn requeue_dependency_not_ready(cfg: &Config) -> Action {
    Action::requeue(Duration::from_secs(cfg.dependency_not_ready_requeue_seconds))
}

#[instrument(skip(ctx, ddb), fields(trace_id))]
async fn reconcile(ddb: Arc<DocumentDB>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile.count_and_measure(&trace_id);
    ctx.diagnostics.write().await.last_event = Utc::now();
    let ns = ddb.namespace().unwrap();
    let ddbs: Api<DocumentDB> = Api::namespaced(ctx.client.clone(), &ns);

    debug!("Reconciling DocumentDB \"{}\" in {}", ddb.name_any(), ns);
    finalizer(&ddbs, DOCUMENTDB_FINALIZER, ddb, |event| async {
        match event {
            Finalizer::Apply(ddb) => match ddb.reconcile(ctx.clone()).await {
                Ok(action) => Ok(action),
                Err(requeue_action) => Ok(requeue_action),
            },
            Finalizer::Cleanup(ddb) => ddb.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

pub(crate) fn error_policy(ddb: Arc<DocumentDB>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile.set_failure(&*ddb, error);
    match error {
        Error::ValidationError(_) | Error::ReplicationError(_) => Action::await_change(),
        Error::KubeError(kube::Error::Api(api_error)) if api_error.code == 429 => {
            let backoff = 60 + rand::thread_rng().gen_range(0..120);
            Action::requeue(Duration::from_secs(backoff))
        }
        _ => Action::requeue(Duration::from_secs(5 * 60)),
    }
}

/// CNPG's own "fully converged" phase string, used below to decide whether
/// this member's downstream cluster has actually caught up to the role
/// (`ReplicationContext::target_local_primary`) the last apply requested.
const CNPG_HEALTHY_PHASE: &str = "Cluster in healthy state";

/// Whether the applied downstream PG cluster has locally converged to the
/// role this reconcile just requested of it, so that `status.localPrimary`
/// (read back as `current_local_primary` on the next reconcile, §3) can flip
/// from the previous fleet member name to `repl.target_local_primary` —
/// both always a fleet cluster name, never a CNPG pod name. Primary
/// convergence additionally requires CNPG to have elected a local primary
/// pod (`status.currentPrimary`); replica convergence only needs the
/// cluster-level phase, since `spec.replica` was already set by this same
/// apply.
fn locally_converged(cluster: &documentdb_common::cnpg::Cluster, repl: &ReplicationContext) -> bool {
    if cluster.status.phase.as_deref() != Some(CNPG_HEALTHY_PHASE) {
        return false;
    }
    if repl.is_primary() {
        cluster.status.current_primary.is_some()
    } else {
        true
    }
}

/// §4.1 edge case: "Reconcile never deletes the PG cluster's PVC on
/// cluster shrink; size-down of storage is rejected." Returns a message
/// describing the rejection when `desired` would shrink `existing`'s
/// storage, `None` when the apply should proceed as normal.
fn storage_shrink_rejection(
    existing: Option<&documentdb_common::cnpg::Cluster>,
    desired: &documentdb_common::cnpg::Cluster,
) -> Option<String> {
    let existing_size = existing?.spec.storage_configuration.as_ref()?.size.as_ref()?;
    let desired_size = desired.spec.storage_configuration.as_ref()?.size.as_ref()?;
    if documentdb_common::is_storage_shrink(&existing_size.0, &desired_size.0) {
        Some(format!(
            "rejecting storage size-down from {} to {}: shrinking a PVC is not supported",
            existing_size.0, desired_size.0
        ))
    } else {
        None
    }
}

impl DocumentDB {
    fn resource_group(&self) -> String {
        // This operator has no first-class resource-group field; the
        // namespace stands in, matching `generateServiceName`'s reserved
        // suffix budget. See DESIGN.md for the open-question resolution.
        self.namespace().unwrap_or_default()
    }

    /// Resolves `self` per §4.1 step 2: `metadata.name` unless the fleet is
    /// configured for cross-cloud networking, in which case the name comes
    /// from `kube-system/cluster-name.data.name`.
    pub(crate) async fn resolve_self_name(&self, ctx: &Context) -> Result<String, Action> {
        let Some(repl_spec) = self.spec.clusterReplication.as_ref() else {
            return Ok(self.name_any());
        };
        let strategy = if repl_spec.enableFleetForCrossCloud == Some(true) {
            CrossCloudNetworkingStrategy::from_legacy_bool(true)
        } else {
            repl_spec.crossCloudNetworkingStrategy
        };
        if strategy == CrossCloudNetworkingStrategy::None {
            return Ok(self.name_any());
        }

        let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), CLUSTER_NAME_CONFIGMAP_NAMESPACE);
        let cm = configmaps.get(CLUSTER_NAME_CONFIGMAP_NAME).await.map_err(|e| {
            error!("cluster-name configmap lookup failed: {e}");
            Action::requeue(Duration::from_secs(5 * 60))
        })?;
        cm.data
            .as_ref()
            .and_then(|d| d.get("name"))
            .cloned()
            .ok_or_else(|| {
                error!("kube-system/cluster-name configmap has no 'name' key");
                Action::requeue(Duration::from_secs(5 * 60))
            })
    }

    pub(crate) fn resolve_replication_context(&self, self_name: &str) -> Result<ReplicationContext, ReplicationError> {
        let Some(repl_spec) = self.spec.clusterReplication.as_ref() else {
            return Ok(ReplicationContext::no_replication(self_name));
        };
        let cluster_list: Vec<String> = repl_spec.clusterList.iter().map(|c| c.name.clone()).collect();
        let current_local_primary = self.status.as_ref().and_then(|s| s.localPrimary.as_deref());
        ReplicationContext::resolve(self_name, &repl_spec.primary, &cluster_list, current_local_primary)
    }

    #[instrument(skip(self, ctx))]
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action, Action> {
        let cfg = Config::default();
        let client = ctx.client.clone();
        let ns = self.namespace().unwrap();
        let ddbs: Api<DocumentDB> = Api::namespaced(client.clone(), &ns);
        let name = self.name_any();

        let self_name = self.resolve_self_name(&ctx).await?;
        let repl = match self.resolve_replication_context(&self_name) {
            Ok(repl) => repl,
            Err(e) => {
                warn!("replication context validation failed for {name}: {e}");
                let recorder = ctx.diagnostics.read().await.recorder(client.clone(), self);
                let _ = recorder
                    .publish(Event {
                        type_: EventType::Warning,
                        reason: "ReplicationValidationFailed".into(),
                        note: Some(e.to_string()),
                        action: "Reconciling".into(),
                        secondary: None,
                    })
                    .await;
                self.patch_status(&ddbs, |status| {
                    status.status = "Invalid".to_string();
                })
                .await?;
                return Err(Action::await_change());
            }
        };

        let credentials_secret_name = secret::reconcile_credentials_secret(self, ctx.clone())
            .await
            .map_err(|e| {
                error!("failed to reconcile credentials secret for {name}: {e:?}");
                Action::requeue(Duration::from_secs(10))
            })?;

        let tls_status = reconcile_tls(self, ctx.clone()).await.map_err(|e| {
            error!("failed to reconcile TLS for {name}: {e:?}");
            Action::requeue(Duration::from_secs(10))
        })?;

        let tls_requested = self
            .spec
            .tls
            .as_ref()
            .and_then(|t| t.gateway.as_ref())
            .map(|g| !matches!(g, crate::apis::documentdb_types::GatewayTlsSpec::Disabled))
            .unwrap_or(false);
        if tls_requested && !tls_status.ready {
            debug!("TLS not yet ready for {name}, requeueing before touching the downstream cluster");
            self.patch_status(&ddbs, |status| {
                status.tls = Some(tls_status.clone());
            })
            .await?;
            return Ok(requeue_dependency_not_ready(&cfg));
        }

        let gateway_image = self
            .spec
            .gatewayImage
            .clone()
            .unwrap_or(cfg.gateway_default_image.clone());
        let inputs = pgcluster::PgClusterInputs {
            credentials_secret_name: &credentials_secret_name,
            gateway_image: &gateway_image,
            gateway_tls_secret: tls_status.secretName.as_deref().filter(|_| tls_status.ready),
            resource_group: &self.resource_group(),
        };
        let desired_cluster = pgcluster::build_cluster(self, &repl, &inputs);

        let clusters: Api<documentdb_common::cnpg::Cluster> = Api::namespaced(client.clone(), &ns);
        let existing = clusters.get_opt(&name).await.map_err(|e| {
            error!("failed to read existing downstream PG cluster for {name}: {e}");
            Action::requeue(Duration::from_secs(10))
        })?;
        if let Some(rejection) = storage_shrink_rejection(existing.as_ref(), &desired_cluster) {
            warn!("{rejection}");
            let recorder = ctx.diagnostics.read().await.recorder(client.clone(), self);
            let _ = recorder
                .publish(Event {
                    type_: EventType::Warning,
                    reason: "StorageShrinkRejected".into(),
                    note: Some(rejection.clone()),
                    action: "Reconciling".into(),
                    secondary: None,
                })
                .await;
            self.patch_status(&ddbs, |status| {
                status.status = "Invalid".to_string();
            })
            .await?;
            return Err(Action::await_change());
        }

        let pp = PatchParams::apply("documentdb-operator").force();
        let applied = clusters
            .patch(&name, &pp, &Patch::Apply(&desired_cluster))
            .await
            .map_err(|e| {
                error!("failed to apply downstream PG cluster for {name}: {e}");
                Action::requeue(Duration::from_secs(10))
            })?;

        service::reconcile_exposed_service(self, ctx.clone()).await.map_err(|e| {
            error!("failed to reconcile exposed service for {name}: {e:?}");
            Action::requeue(Duration::from_secs(10))
        })?;
        service::reconcile_cross_cluster_services(self, &repl, &self.resource_group(), ctx.clone())
            .await
            .map_err(|e| {
                error!("failed to reconcile cross-cluster services for {name}: {e:?}");
                Action::requeue(Duration::from_secs(10))
            })?;

        self.update_status(&ddbs, &applied, &repl, tls_status).await?;

        Ok(requeue_normal_with_jitter(&cfg))
    }

    async fn patch_status(
        &self,
        ddbs: &Api<DocumentDB>,
        mutate: impl FnOnce(&mut DocumentDBStatus),
    ) -> Result<(), Action> {
        let mut status = self.status.clone().unwrap_or_default();
        mutate(&mut status);
        let patch = json!({ "status": status });
        ddbs.patch_status(&self.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                error!("failed to patch status for {}: {e}", self.name_any());
                Action::requeue(Duration::from_secs(10))
            })?;
        Ok(())
    }

    async fn update_status(
        &self,
        ddbs: &Api<DocumentDB>,
        cluster: &documentdb_common::cnpg::Cluster,
        repl: &ReplicationContext,
        tls_status: crate::apis::documentdb_types::TlsStatus,
    ) -> Result<(), Action> {
        let phase = cluster.status.phase.clone().unwrap_or_default();
        let connection_string = if repl.endpoint_enabled() {
            cluster
                .status
                .write_service
                .clone()
                .map(|svc| format!("host={svc} dbname=postgres user=documentdb sslmode=verify-full"))
        } else {
            None
        };

        // `status.localPrimary` always holds a fleet cluster name (the same
        // namespace of identifier as `target_local_primary`), never a CNPG
        // pod name — it flips to the target only once this member has
        // locally converged, and otherwise holds steady at whatever fleet
        // member it last converged to.
        let local_primary = if locally_converged(cluster, repl) {
            repl.target_local_primary.clone()
        } else {
            repl.current_local_primary.clone()
        };

        self.patch_status(ddbs, |status| {
            status.status = phase;
            status.connectionString = connection_string;
            status.targetPrimary = cluster.status.target_primary.clone();
            status.localPrimary = Some(local_primary);
            status.tls = Some(tls_status);
        })
        .await
    }

    /// Cleanup (for finalizer-triggered deletion): deregisters this
    /// cluster from external-cluster lists in other fleet members and
    /// waits for the downstream PG cluster to finish tearing down, bounded
    /// by `spec.timeouts.stopDelaySeconds`.
    #[instrument(skip(self, ctx))]
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        let ns = self.namespace().unwrap();
        let clusters: Api<documentdb_common::cnpg::Cluster> = Api::namespaced(ctx.client.clone(), &ns);
        let name = self.name_any();

        match clusters.get_opt(&name).await? {
            Some(_) => {
                debug!("downstream PG cluster {name} still present, waiting for garbage collection");
                Ok(Action::requeue(Duration::from_secs(
                    self.spec.timeouts.stopDelaySeconds.max(1) as u64,
                )))
            }
            None => {
                debug!("downstream PG cluster {name} gone, finalizer cleanup complete");
                Ok(Action::await_change())
            }
        }
    }
}

/// Diagnostics exposed by the web server.
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_event: chrono::DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "documentdb-operator".into(),
        }
    }
}

impl Diagnostics {
    fn recorder(&self, client: Client, ddb: &DocumentDB) -> Recorder {
        Recorder::new(client, self.reporter.clone(), ddb.object_ref(&()))
    }
}

/// State shared between the controller and the web server.
#[derive(Clone, Default)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    metrics: Metrics,
}

impl State {
    pub fn metrics(&self) -> String {
        self.metrics.encode()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn create_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            metrics: self.metrics.clone(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

/// Runs the `DocumentDB`, `Backup`, and `ScheduledBackup` controllers
/// concurrently until the process receives a shutdown signal.
pub async fn run(state: State) {
    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(e) => panic!("failed to create kube client: {e}"),
    };

    let ddbs = Api::<DocumentDB>::all(client.clone());
    if let Err(e) = ddbs.list(&ListParams::default().limit(1)).await {
        error!("DocumentDB CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let ctx = state.create_context(client.clone());
    let ddb_controller = Controller::new(ddbs, WatcherConfig::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    let backup_controller = backup_controller::run(state.create_context(client.clone()));
    let scheduledbackup_controller = scheduledbackup_controller::run(state.create_context(client));

    tokio::join!(ddb_controller, backup_controller, scheduledbackup_controller);
}

#[cfg(test)]
mod tests {
    use super::*;
    use documentdb_common::cnpg::{Cluster, ClusterStorageConfiguration};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn cluster_with_storage(size: &str) -> Cluster {
        let mut cluster = Cluster::new("ddb1", Default::default());
        cluster.spec.storage_configuration = Some(ClusterStorageConfiguration {
            size: Some(Quantity(size.to_string())),
            storage_class: None,
        });
        cluster
    }

    #[test]
    fn no_existing_cluster_never_rejects() {
        assert!(storage_shrink_rejection(None, &cluster_with_storage("5Gi")).is_none());
    }

    #[test]
    fn growing_storage_is_not_rejected() {
        let existing = cluster_with_storage("5Gi");
        let desired = cluster_with_storage("10Gi");
        assert!(storage_shrink_rejection(Some(&existing), &desired).is_none());
    }

    #[test]
    fn shrinking_storage_is_rejected() {
        let existing = cluster_with_storage("10Gi");
        let desired = cluster_with_storage("5Gi");
        assert!(storage_shrink_rejection(Some(&existing), &desired).is_some());
    }

    fn healthy_cluster(current_primary: Option<&str>) -> documentdb_common::cnpg::Cluster {
        let mut cluster = documentdb_common::cnpg::Cluster::new("ddb1", Default::default());
        cluster.status.phase = Some(CNPG_HEALTHY_PHASE.to_string());
        cluster.status.current_primary = current_primary.map(str::to_string);
        cluster
    }

    #[test]
    fn primary_does_not_converge_until_cnpg_elects_a_local_primary_pod() {
        let repl = ReplicationContext::resolve("mB", "mB", &["mA".to_string(), "mB".to_string()], None).unwrap();
        let mut cluster = healthy_cluster(None);
        assert!(!locally_converged(&cluster, &repl));
        cluster.status.current_primary = Some("mB-1".to_string());
        assert!(locally_converged(&cluster, &repl));
    }

    #[test]
    fn replica_converges_on_healthy_phase_alone() {
        let repl = ReplicationContext::resolve("mA", "mB", &["mA".to_string(), "mB".to_string()], Some("mA")).unwrap();
        assert!(locally_converged(&healthy_cluster(None), &repl));
    }

    #[test]
    fn nothing_converges_while_cnpg_phase_is_not_yet_healthy() {
        let repl = ReplicationContext::resolve("mA", "mB", &["mA".to_string(), "mB".to_string()], Some("mA")).unwrap();
        let cluster = documentdb_common::cnpg::Cluster::new("ddb1", Default::default());
        assert!(!locally_converged(&cluster, &repl));
    }

    #[test]
    fn local_primary_flips_to_target_only_once_converged_and_both_sides_are_cluster_names() {
        // mA is the old primary, failover to mB already requested: target is
        // mB, current is still mA until mA's own cluster locally converges.
        let repl = ReplicationContext::resolve("mA", "mB", &["mA".to_string(), "mB".to_string()], Some("mA")).unwrap();
        assert_eq!(repl.current_local_primary, "mA");
        assert_eq!(repl.target_local_primary, "mB");
        assert!(!repl.endpoint_enabled());

        // Before CNPG reports healthy, the gate stays shut.
        let not_yet = documentdb_common::cnpg::Cluster::new("ddb1", Default::default());
        assert!(!locally_converged(&not_yet, &repl));

        // Once CNPG reports healthy, this replica has converged to
        // replicating from mB — both identifiers are fleet cluster names,
        // so the comparison in `endpoint_enabled` is meaningful.
        let converged = healthy_cluster(None);
        assert!(locally_converged(&converged, &repl));
    }

    fn cluster_list(names: &[&str]) -> Vec<crate::apis::documentdb_types::ClusterListEntry> {
        names
            .iter()
            .map(|n| crate::apis::documentdb_types::ClusterListEntry {
                name: n.to_string(),
                environmentOverride: None,
                storageClassOverride: None,
            })
            .collect()
    }

    fn ddb_with_replication(primary: &str, cluster_list_names: &[&str]) -> DocumentDB {
        let mut ddb = DocumentDB::default();
        ddb.meta_mut().name = Some("mA".to_string());
        ddb.meta_mut().namespace = Some("default".to_string());
        ddb.spec.clusterReplication = Some(crate::apis::documentdb_types::ClusterReplicationSpec {
            primary: primary.to_string(),
            clusterList: cluster_list(cluster_list_names),
            crossCloudNetworkingStrategy: CrossCloudNetworkingStrategy::None,
            highAvailability: false,
            enableFleetForCrossCloud: None,
        });
        ddb
    }

    #[test]
    fn no_replication_without_cluster_replication_spec() {
        let mut ddb = DocumentDB::default();
        ddb.meta_mut().name = Some("ddb1".to_string());
        let ctx = ddb.resolve_replication_context("ddb1").unwrap();
        assert_eq!(ctx.state, documentdb_common::ReplicationState::NoReplication);
    }

    #[test]
    fn replication_context_resolves_primary_role() {
        let ddb = ddb_with_replication("mA", &["mA", "mB"]);
        let ctx = ddb.resolve_replication_context("mA").unwrap();
        assert_eq!(ctx.state, documentdb_common::ReplicationState::Primary);
        assert_eq!(ctx.others, vec!["mB".to_string()]);
    }

    #[test]
    fn replication_context_rejects_primary_not_in_list() {
        let ddb = ddb_with_replication("mZ", &["mA", "mB"]);
        assert!(ddb.resolve_replication_context("mA").is_err());
    }
}
