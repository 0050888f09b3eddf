use documentdb_common::cnpg::Cluster;
use k8s_openapi::api::core::v1::Pod;
use plugin_proto::{
    plugin_service_server::PluginService, GetPluginCapabilitiesRequest, GetPluginCapabilitiesResponse,
    GetPluginMetadataRequest, GetPluginMetadataResponse, LifecycleHookRequest, LifecycleHookResponse,
    MutateClusterRequest, MutateClusterResponse, PodOperation, ProbeRequest, ProbeResponse,
    ReconcilerHookRequest, ReconcilerHookResponse, ValidateClusterChangeRequest, ValidateClusterCreateRequest,
    ValidateClusterResponse,
};
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::patch::{mutate_pod, GatewayParameters};

pub const PLUGIN_NAME: &str = "documentdb-sidecar-injector.documentdb.io";
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default)]
pub struct GatewayInjectorPlugin;

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, Status> {
    serde_json::from_slice(bytes).map_err(|e| Status::invalid_argument(format!("invalid {what}: {e}")))
}

#[tonic::async_trait]
impl PluginService for GatewayInjectorPlugin {
    async fn get_plugin_metadata(
        &self,
        _request: Request<GetPluginMetadataRequest>,
    ) -> Result<Response<GetPluginMetadataResponse>, Status> {
        Ok(Response::new(GetPluginMetadataResponse {
            name: PLUGIN_NAME.to_string(),
            version: PLUGIN_VERSION.to_string(),
            display_name: "DocumentDB Gateway Sidecar Injector".to_string(),
        }))
    }

    async fn get_plugin_capabilities(
        &self,
        _request: Request<GetPluginCapabilitiesRequest>,
    ) -> Result<Response<GetPluginCapabilitiesResponse>, Status> {
        Ok(Response::new(GetPluginCapabilitiesResponse {
            capabilities: vec!["MutateCluster".to_string(), "LifecycleHook".to_string()],
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
        let _cluster: Cluster = decode(&req.cluster_json, "cluster")?;
        Ok(Response::new(ValidateClusterResponse {
            valid: true,
            errors: vec![],
            warnings: vec![],
        }))
    }

    async fn validate_cluster_change(
        &self,
        request: Request<ValidateClusterChangeRequest>,
    ) -> Result<Response<ValidateClusterResponse>, Status> {
        let req = request.into_inner();
        let _old: Cluster = decode(&req.old_cluster_json, "old cluster")?;
        let _new: Cluster = decode(&req.new_cluster_json, "new cluster")?;
        Ok(Response::new(ValidateClusterResponse {
            valid: true,
            errors: vec![],
            warnings: vec![],
        }))
    }

    async fn mutate_cluster(
        &self,
        request: Request<MutateClusterRequest>,
    ) -> Result<Response<MutateClusterResponse>, Status> {
        let req = request.into_inner();
        let _cluster: Cluster = decode(&req.cluster_json, "cluster")?;
        // This plugin only mutates Pods via LifecycleHook; the Cluster
        // object itself needs no changes.
        Ok(Response::new(MutateClusterResponse {
            json_patch: b"[]".to_vec(),
        }))
    }

    async fn lifecycle_hook(
        &self,
        request: Request<LifecycleHookRequest>,
    ) -> Result<Response<LifecycleHookResponse>, Status> {
        let req = request.into_inner();
        let cluster: Cluster = decode(&req.cluster_json, "cluster")?;
        let pod: Pod = decode(&req.pod_json, "pod")?;

        if req.operation == PodOperation::PodOperationUnspecified as i32 {
            warn!("lifecycle hook called with unspecified pod operation");
        }

        let cluster_name = cluster.metadata.name.clone().unwrap_or_default();
        let namespace = cluster.metadata.namespace.clone().unwrap_or_default();
        let params: GatewayParameters = cluster
            .spec
            .plugins
            .as_ref()
            .into_iter()
            .flatten()
            .find(|p| p.name == PLUGIN_NAME)
            .and_then(|p| p.parameters.clone())
            .map(|params| serde_json::to_value(params).and_then(serde_json::from_value))
            .transpose()
            .map_err(|e| Status::invalid_argument(format!("invalid plugin parameters: {e}")))?
            .ok_or_else(|| Status::failed_precondition("no documentdb-sidecar-injector plugin parameters on cluster"))?;

        let patch = mutate_pod(&cluster, &cluster_name, &namespace, &pod, &params);
        debug!(pod = %pod.metadata.name.clone().unwrap_or_default(), "computed gateway sidecar patch");

        Ok(Response::new(LifecycleHookResponse {
            json_patch: serde_json::to_vec(&patch).expect("json patch always serializes"),
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
        _request: Request<ReconcilerHookRequest>,
    ) -> Result<Response<ReconcilerHookResponse>, Status> {
        Ok(Response::new(ReconcilerHookResponse { requeue: false }))
    }
}
