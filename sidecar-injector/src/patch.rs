//! Gateway sidecar construction and deterministic Pod mutation.

use documentdb_common::cnpg::Cluster;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, Pod, SecretKeySelector, SecretVolumeSource,
    SecurityContext, Volume, VolumeMount,
};
use serde::{Deserialize, Serialize};

pub const GATEWAY_CONTAINER_NAME: &str = "documentdb-gateway";
pub const GATEWAY_PORT: i32 = 10260;
const TLS_VOLUME_NAME: &str = "documentdb-gateway-tls";

/// Plugin parameters the DocumentDB reconciler attaches to the downstream
/// cluster's plugin reference (`ClusterPlugin.parameters`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[allow(non_snake_case)]
pub struct GatewayParameters {
    pub gatewayImage: String,
    pub credentialSecretName: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gatewayTLSSecret: Option<String>,
}

fn otel_endpoint(cluster_name: &str, namespace: &str) -> String {
    format!("http://{cluster_name}-collector.{namespace}.svc.cluster.local:4317")
}

fn should_create_user(pod: &Pod, cluster: &Cluster) -> bool {
    let is_replica = pod
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get("replication_cluster_type"))
        .map(|v| v == "replica")
        .unwrap_or(false);
    let is_target_primary = cluster.status.target_primary.is_some()
        && cluster.status.target_primary == pod.metadata.name;
    !is_replica && is_target_primary
}

fn tls_secret(params: &GatewayParameters) -> Option<&str> {
    params.gatewayTLSSecret.as_deref().filter(|s| !s.is_empty())
}

pub fn build_gateway_container(cluster: &Cluster, cluster_name: &str, namespace: &str, pod: &Pod, params: &GatewayParameters) -> Container {
    let create_user = should_create_user(pod, cluster);
    let mut args = vec![
        "--start-pg".to_string(),
        "false".to_string(),
        "--pg-port".to_string(),
        "5432".to_string(),
        "--create-user".to_string(),
        create_user.to_string(),
    ];

    let mut env = vec![
        EnvVar {
            name: "OTEL_EXPORTER_OTLP_ENDPOINT".to_string(),
            value: Some(otel_endpoint(cluster_name, namespace)),
            ..Default::default()
        },
        secret_env_var("USERNAME", &params.credentialSecretName, "username"),
        secret_env_var("PASSWORD", &params.credentialSecretName, "password"),
    ];

    let mut volume_mounts = Vec::new();

    if tls_secret(params).is_some() {
        env.push(EnvVar {
            name: "TLS_CERT_DIR".to_string(),
            value: Some("/tls".to_string()),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "CERT_PATH".to_string(),
            value: Some("/tls/tls.crt".to_string()),
            ..Default::default()
        });
        env.push(EnvVar {
            name: "KEY_FILE".to_string(),
            value: Some("/tls/tls.key".to_string()),
            ..Default::default()
        });
        args.push("--cert-path".to_string());
        args.push("/tls/tls.crt".to_string());
        args.push("--key-file".to_string());
        args.push("/tls/tls.key".to_string());
        volume_mounts.push(VolumeMount {
            name: TLS_VOLUME_NAME.to_string(),
            mount_path: "/tls".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    Container {
        name: GATEWAY_CONTAINER_NAME.to_string(),
        image: Some(params.gatewayImage.clone()),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(vec![ContainerPort {
            container_port: GATEWAY_PORT,
            name: Some("gateway".to_string()),
            ..Default::default()
        }]),
        args: Some(args),
        env: Some(env),
        security_context: Some(SecurityContext {
            run_as_user: Some(1000),
            run_as_group: Some(1000),
            ..Default::default()
        }),
        volume_mounts: if volume_mounts.is_empty() { None } else { Some(volume_mounts) },
        ..Default::default()
    }
}

fn secret_env_var(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret_name.to_string()),
                key: key.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn gateway_tls_volume(tls_secret: &str) -> Volume {
    Volume {
        name: TLS_VOLUME_NAME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(tls_secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Injects the gateway container (and TLS volume, if requested) into `pod`
/// and returns the RFC 6902 patch between the original and mutated object.
/// Deterministic for identical inputs: field construction never depends on
/// map/hash iteration order, and `json_patch::diff` walks both documents in
/// a fixed key order.
pub fn mutate_pod(cluster: &Cluster, cluster_name: &str, namespace: &str, pod: &Pod, params: &GatewayParameters) -> json_patch::Patch {
    let mut mutated = pod.clone();
    let container = build_gateway_container(cluster, cluster_name, namespace, pod, params);
    let spec = mutated.spec.get_or_insert_with(Default::default);
    spec.containers.push(container);

    if let Some(secret) = tls_secret(params) {
        spec.volumes.get_or_insert_with(Vec::new).push(gateway_tls_volume(secret));
    }

    let before = serde_json::to_value(pod).expect("Pod always serializes");
    let after = serde_json::to_value(&mutated).expect("Pod always serializes");
    json_patch::diff(&before, &after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn params(tls: Option<&str>) -> GatewayParameters {
        GatewayParameters {
            gatewayImage: "documentdb/gateway:1.0".to_string(),
            credentialSecretName: "my-ddb-connection".to_string(),
            gatewayTLSSecret: tls.map(str::to_string),
        }
    }

    fn cluster_with_primary(name: &str) -> Cluster {
        let mut cluster = Cluster::new("cluster1", Default::default());
        cluster.status.target_primary = Some(name.to_string());
        cluster
    }

    fn pod_named(name: &str, role: Option<&str>) -> Pod {
        let mut labels = BTreeMap::new();
        if let Some(role) = role {
            labels.insert("replication_cluster_type".to_string(), role.to_string());
        }
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn enables_create_user_for_the_target_primary_pod() {
        let cluster = cluster_with_primary("cluster1-1");
        let pod = pod_named("cluster1-1", None);
        let container = build_gateway_container(&cluster, "cluster1", "default", &pod, &params(None));
        assert!(container.args.unwrap().contains(&"true".to_string()));
    }

    #[test]
    fn disables_create_user_for_a_replica_labelled_pod() {
        let cluster = cluster_with_primary("cluster1-1");
        let pod = pod_named("cluster1-1", Some("replica"));
        let container = build_gateway_container(&cluster, "cluster1", "default", &pod, &params(None));
        assert!(container.args.unwrap().contains(&"false".to_string()));
    }

    #[test]
    fn disables_create_user_for_a_non_primary_pod() {
        let cluster = cluster_with_primary("cluster1-1");
        let pod = pod_named("cluster1-2", None);
        let container = build_gateway_container(&cluster, "cluster1", "default", &pod, &params(None));
        assert!(container.args.unwrap().contains(&"false".to_string()));
    }

    #[test]
    fn omits_tls_args_when_no_tls_secret_configured() {
        let cluster = cluster_with_primary("cluster1-1");
        let pod = pod_named("cluster1-1", None);
        let container = build_gateway_container(&cluster, "cluster1", "default", &pod, &params(None));
        let args = container.args.unwrap();
        assert!(!args.iter().any(|a| a == "--cert-path"));
        assert!(container.volume_mounts.is_none());
    }

    #[test]
    fn includes_tls_args_and_mount_when_tls_secret_configured() {
        let cluster = cluster_with_primary("cluster1-1");
        let pod = pod_named("cluster1-1", None);
        let container = build_gateway_container(&cluster, "cluster1", "default", &pod, &params(Some("gw-tls")));
        let args = container.args.unwrap();
        assert!(args.iter().any(|a| a == "--cert-path"));
        assert!(args.iter().any(|a| a == "/tls/tls.crt"));
        assert_eq!(container.volume_mounts.unwrap().len(), 1);
    }

    #[test]
    fn mutation_is_deterministic_across_repeated_calls() {
        let cluster = cluster_with_primary("cluster1-1");
        let pod = pod_named("cluster1-1", None);
        let p = params(Some("gw-tls"));
        let first = mutate_pod(&cluster, "cluster1", "default", &pod, &p);
        let second = mutate_pod(&cluster, "cluster1", "default", &pod, &p);
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
    }
}
