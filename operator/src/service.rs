//! Exposed client-facing Service and the cross-cluster stub Services used
//! by replicating fleets (§4.1 steps 7-8).

use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{
    api::core::v1::{Service, ServiceSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use tracing::debug;

use documentdb_common::{generate_service_name, ReplicationContext};

use crate::{
    apis::documentdb_types::{DocumentDB, Environment, ServiceType},
    controller::Context,
    Error,
};

const SERVICE_PREFIX: &str = "documentdb-service-";
const GATEWAY_PORT: i32 = 10260;

pub fn exposed_service_name(ddb_name: &str) -> String {
    format!("{SERVICE_PREFIX}{ddb_name}")
}

/// Reconciles the client-facing Service, annotated per cloud `environment`
/// when `expose.serviceType == LoadBalancer`.
pub async fn reconcile_exposed_service(ddb: &DocumentDB, ctx: Arc<Context>) -> Result<(), Error> {
    let ns = ddb.namespace().expect("DocumentDB is namespaced");
    let name = exposed_service_name(&ddb.name_any());
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let oref = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");

    let mut selector = BTreeMap::new();
    selector.insert("cnpg.io/cluster".to_string(), ddb.name_any());
    selector.insert("cnpg.io/podRole".to_string(), "instance".to_string());

    let (service_type, annotations) = match ddb.spec.expose.serviceType {
        ServiceType::LoadBalancer => (
            "LoadBalancer".to_string(),
            load_balancer_annotations(ddb.spec.environment),
        ),
        ServiceType::ClusterIP => ("ClusterIP".to_string(), None),
    };

    let service = Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns),
            owner_references: Some(vec![oref]),
            annotations,
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type),
            selector: Some(selector),
            ports: Some(vec![k8s_openapi::api::core::v1::ServicePort {
                name: Some("documentdb".to_string()),
                port: GATEWAY_PORT,
                target_port: Some(IntOrString::Int(GATEWAY_PORT)),
                ..Default::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    };

    let pp = PatchParams::apply("documentdb-operator").force();
    services
        .patch(&name, &pp, &Patch::Apply(&service))
        .await
        .map_err(Error::KubeError)?;
    debug!(service = %name, "reconciled exposed service");
    Ok(())
}

fn load_balancer_annotations(environment: Option<Environment>) -> Option<BTreeMap<String, String>> {
    let mut annotations = BTreeMap::new();
    match environment? {
        Environment::Eks => {
            annotations.insert(
                "service.beta.kubernetes.io/aws-load-balancer-type".to_string(),
                "nlb".to_string(),
            );
            annotations.insert(
                "service.beta.kubernetes.io/aws-load-balancer-scheme".to_string(),
                "internet-facing".to_string(),
            );
        }
        Environment::Aks => {
            annotations.insert(
                "service.beta.kubernetes.io/azure-load-balancer-internal".to_string(),
                "false".to_string(),
            );
        }
        Environment::Gke => {
            annotations.insert("cloud.google.com/l4-rbs".to_string(), "enabled".to_string());
        }
    }
    Some(annotations)
}

/// Reconciles one outgoing stub Service per remote fleet member, named
/// deterministically via [`generate_service_name`] so every member can
/// rebuild the same name on restart without persisting it.
pub async fn reconcile_cross_cluster_services(
    ddb: &DocumentDB,
    repl: &ReplicationContext,
    resource_group: &str,
    ctx: Arc<Context>,
) -> Result<(), Error> {
    if repl.others.is_empty() {
        return Ok(());
    }
    let ns = ddb.namespace().expect("DocumentDB is namespaced");
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let oref = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");
    let pp = PatchParams::apply("documentdb-operator").force();

    for other in &repl.others {
        let name = generate_service_name(&repl.self_name, other, resource_group);
        let service = Service {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(ns.clone()),
                owner_references: Some(vec![oref.clone()]),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ExternalName".to_string()),
                external_name: Some(format!("{other}.{resource_group}.svc.cluster.local")),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };
        services
            .patch(&name, &pp, &Patch::Apply(&service))
            .await
            .map_err(Error::KubeError)?;
        debug!(service = %name, remote = %other, "reconciled cross-cluster stub service");
    }
    Ok(())
}
