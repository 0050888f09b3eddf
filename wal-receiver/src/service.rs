use documentdb_common::{cnpg::Cluster, Config, REPLICATION_ROLE_LABEL};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use plugin_proto::{
    plugin_service_server::PluginService, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse,
    GetPluginMetadataRequest, GetPluginMetadataResponse, LifecycleHookRequest, LifecycleHookResponse,
    MutateClusterRequest, MutateClusterResponse, ProbeRequest, ProbeResponse, ReconcilerHookRequest,
    ReconcilerHookResponse, ValidateClusterChangeRequest, ValidateClusterCreateRequest,
    ValidateClusterResponse,
};
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::resources::{build_deployment, build_pvc, validate, WalReceiverParameters};

pub const PLUGIN_NAME: &str = "documentdb-wal-receiver";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");
const PLUGIN_PARAMETER_NAME: &str = "documentdb-wal-receiver.documentdb.io";

pub struct WalReceiverPlugin {
    client: Client,
}

impl WalReceiverPlugin {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn parameters(cluster: &Cluster) -> Result<WalReceiverParameters, Status> {
        let Some(raw) = cluster
            .spec
            .plugins
            .as_ref()
            .into_iter()
            .flatten()
            .find(|p| p.name == PLUGIN_PARAMETER_NAME)
            .and_then(|p| p.parameters.clone())
        else {
            return Ok(WalReceiverParameters::default());
        };
        let value = serde_json::to_value(raw).map_err(|e| Status::internal(e.to_string()))?;
        serde_json::from_value(value).map_err(|e| Status::invalid_argument(format!("invalid wal-receiver parameters: {e}")))
    }

    async fn reconcile_side_resources(&self, cluster: &Cluster) -> Result<(), Status> {
        if !is_fleet_primary(cluster) {
            debug!(cluster = %cluster.name_any(), "cluster is a replication replica, skipping wal-receiver reconcile");
            return Ok(());
        }
        if cluster.status.target_primary.is_none() || cluster.status.current_primary.is_none() {
            debug!(cluster = %cluster.name_any(), "no primary elected yet, skipping wal-receiver reconcile");
            return Ok(());
        }

        let params = Self::parameters(cluster)?;
        validate(&params).map_err(Status::failed_precondition)?;

        let cfg = Config::default();
        let ns = cluster.namespace().unwrap_or_default();
        let pvcs: Api<k8s_openapi::api::core::v1::PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &ns);
        let deployments: Api<k8s_openapi::api::apps::v1::Deployment> = Api::namespaced(self.client.clone(), &ns);
        let pp = PatchParams::apply(PLUGIN_NAME).force();

        let pvc = build_pvc(cluster, &params, &cfg);
        let pvc_name = pvc.metadata.name.clone().unwrap_or_default();
        pvcs.patch(&pvc_name, &pp, &Patch::Apply(&pvc))
            .await
            .map_err(|e| Status::internal(format!("failed to apply wal-receiver PVC: {e}")))?;

        let deployment = build_deployment(cluster, &params, &cfg);
        let deployment_name = deployment.metadata.name.clone().unwrap_or_default();
        deployments
            .patch(&deployment_name, &pp, &Patch::Apply(&deployment))
            .await
            .map_err(|e| Status::internal(format!("failed to apply wal-receiver deployment: {e}")))?;

        debug!(cluster = %cluster.name_any(), %deployment_name, "reconciled wal-receiver side resources");
        Ok(())
    }
}

fn decode_cluster(bytes: &[u8]) -> Result<Cluster, Status> {
    serde_json::from_slice(bytes).map_err(|e| Status::invalid_argument(format!("invalid cluster: {e}")))
}

/// Whether this cluster is the fleet's write primary, per the
/// `documentdb.microsoft.com/replication-role` label the DocumentDB
/// reconciler stamps on every downstream Cluster it produces. A cluster
/// with no such label predates fleet replication and is treated as primary
/// (single-cluster deployments never set it).
fn is_fleet_primary(cluster: &Cluster) -> bool {
    cluster
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(REPLICATION_ROLE_LABEL))
        .map(|role| role != "replica")
        .unwrap_or(true)
}

#[tonic::async_trait]
impl PluginService for WalReceiverPlugin {
    async fn get_plugin_metadata(
        &self,
        _request: Request<GetPluginMetadataRequest>,
    ) -> Result<Response<GetPluginMetadataResponse>, Status> {
        Ok(Response::new(GetPluginMetadataResponse {
            name: PLUGIN_NAME.to_string(),
            version: PLUGIN_VERSION.to_string(),
            display_name: "DocumentDB WAL Receiver".to_string(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec!["PostReconcile".to_string()],
        }))
    }

    async fn probe(&self, _request: Request<ProbeRequest>) -> Result<Response<ProbeResponse>, Status> {
        Ok(Response::new(ProbeResponse { ready: true }))
    }

    async fn validate_cluster_create(
        &self,
        request: Request<ValidateClusterCreateRequest>,
    ) -> Result<Response<ValidateClusterResponse>, Status> {
        let req = request.into_inner();
        let cluster = decode_cluster(&req.cluster_json)?;
        let errors = match Self::parameters(&cluster).and_then(|p| validate(&p).map_err(Status::invalid_argument)) {
            Ok(()) => vec![],
            Err(e) => vec![e.message().to_string()],
        };
        let valid = errors.is_empty();
        Ok(Response::new(ValidateClusterResponse {
            valid,
            errors,
            warnings: vec![],
        }))
    }

    async fn validate_cluster_change(
        &self,
        request: Request<ValidateClusterChangeRequest>,
    ) -> Result<Response<ValidateClusterResponse>, Status> {
        let req = request.into_inner();
        let cluster = decode_cluster(&req.new_cluster_json)?;
        let errors = match Self::parameters(&cluster).and_then(|p| validate(&p).map_err(Status::invalid_argument)) {
            Ok(()) => vec![],
            Err(e) => vec![e.message().to_string()],
        };
        let valid = errors.is_empty();
        Ok(Response::new(ValidateClusterResponse {
            valid,
            errors,
            warnings: vec![],
        }))
    }

    async fn mutate_cluster(
        &self,
        _request: Request<MutateClusterRequest>,
    ) -> Result<Response<MutateClusterResponse>, Status> {
        Ok(Response::new(MutateClusterResponse {
            json_patch: b"[]".to_vec(),
        }))
    }

    async fn lifecycle_hook(
        &self,
        _request: Request<LifecycleHookRequest>,
    ) -> Result<Response<LifecycleHookResponse>, Status> {
        Ok(Response::new(LifecycleHookResponse {
            json_patch: b"[]".to_vec(),
        }))
    }

    async fn pre_reconcile(
        &self,
        _request: Request<ReconcilerHookRequest>,
    ) -> Result<Response<ReconcilerHookResponse>, Status> {
        Ok(Response::new(ReconcilerHookResponse { requeue: false }))
    }

    async fn post_reconcile(
        &self,
        request: Request<ReconcilerHookRequest>,
    ) -> Result<Response<ReconcilerHookResponse>, Status> {
        let req = request.into_inner();
        let cluster = decode_cluster(&req.cluster_json)?;
        if let Err(e) = self.reconcile_side_resources(&cluster).await {
            warn!(cluster = %cluster.name_any(), error = %e, "wal-receiver reconcile failed");
            return Ok(Response::new(ReconcilerHookResponse { requeue: true }));
        }
        Ok(Response::new(ReconcilerHookResponse { requeue: false }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cluster_with_role(role: Option<&str>) -> Cluster {
        let mut cluster = Cluster::new("pg1", Default::default());
        if let Some(role) = role {
            let mut labels = BTreeMap::new();
            labels.insert(REPLICATION_ROLE_LABEL.to_string(), role.to_string());
            cluster.meta_mut().labels = Some(labels);
        }
        cluster
    }

    #[test]
    fn replica_labelled_cluster_is_not_fleet_primary() {
        assert!(!is_fleet_primary(&cluster_with_role(Some("replica"))));
    }

    #[test]
    fn primary_labelled_cluster_is_fleet_primary() {
        assert!(is_fleet_primary(&cluster_with_role(Some("primary"))));
    }

    #[test]
    fn unlabelled_cluster_defaults_to_primary() {
        assert!(is_fleet_primary(&cluster_with_role(None)));
    }
}
