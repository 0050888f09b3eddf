//! PVC + Deployment builders for the standalone `pg_receivewal` sink kept
//! alongside a primary PG-Operator cluster.

use documentdb_common::{cnpg::Cluster, Config};
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSecurityContext,
            PodSpec, PodTemplateSpec, ResourceRequirements, SecretVolumeSource, Volume, VolumeMount,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta},
    },
};
use kube::{Resource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CA_MOUNT_PATH: &str = "/var/lib/postgresql/rootcert";
const CERT_MOUNT_PATH: &str = "/var/lib/postgresql/cert";
const DEFAULT_SLOT_NAME: &str = "wal_replica";

/// Overrides for the values spec.md defaults from the cluster's own image
/// and write-service; all optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[allow(non_snake_case)]
pub struct WalReceiverParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicationHost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronous: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walDirectory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walPVCSize: Option<String>,
}

pub fn deployment_name(cluster_name: &str) -> String {
    format!("{cluster_name}-wal-receiver")
}

/// Validates `synchronous` and `walPVCSize` per spec.md's accepted values,
/// returning a human-readable error for an invalid parameter set.
pub fn validate(params: &WalReceiverParameters) -> Result<(), String> {
    if let Some(s) = &params.synchronous {
        if s != "active" && s != "inactive" {
            return Err(format!("synchronous must be 'active' or 'inactive', got '{s}'"));
        }
    }
    if let Some(size) = &params.walPVCSize {
        if !is_valid_quantity(size) {
            return Err(format!("walPVCSize '{size}' is not a valid quantity"));
        }
    }
    Ok(())
}

/// Kubernetes resource quantities are a decimal/binary number followed by an
/// optional suffix (`Ki`, `Mi`, `Gi`, `Ti`, `m`, ...); this checks the shape
/// without pulling in a full quantity parser.
fn is_valid_quantity(s: &str) -> bool {
    let (number, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+') {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    if number.is_empty() || number.parse::<f64>().is_err() {
        return false;
    }
    matches!(
        suffix,
        "" | "n" | "u" | "m" | "k" | "M" | "G" | "T" | "P" | "E" | "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei"
    )
}

/// §4.4.5: `sslmode=verify-full` needs its certs spelled out explicitly —
/// libpq otherwise falls back to `~/.postgresql/`, which doesn't exist in
/// this container, and the CA/replication-cert volumes mounted alongside
/// this command would go unused.
fn connection_string(host: &str) -> String {
    format!(
        "host={host} dbname=postgres user=streaming_replica sslmode=verify-full \
         sslrootcert={CA_MOUNT_PATH}/ca.crt sslcert={CERT_MOUNT_PATH}/tls.crt sslkey={CERT_MOUNT_PATH}/tls.key"
    )
}

pub fn build_pvc(cluster: &Cluster, params: &WalReceiverParameters, cfg: &Config) -> PersistentVolumeClaim {
    let name = deployment_name(&cluster.name_any());
    let size = params.walPVCSize.clone().unwrap_or_else(|| cfg.wal_pvc_default_size.clone());
    let oref = cluster.controller_owner_ref(&()).expect("Cluster has apiVersion/kind");

    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(size));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            owner_references: Some(vec![oref]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_deployment(cluster: &Cluster, params: &WalReceiverParameters, cfg: &Config) -> Deployment {
    let name = deployment_name(&cluster.name_any());
    let oref = cluster.controller_owner_ref(&()).expect("Cluster has apiVersion/kind");
    let image = params
        .image
        .clone()
        .or_else(|| cluster.spec.image_name.clone())
        .unwrap_or_else(|| cfg.gateway_default_image.clone());
    let host = params
        .replicationHost
        .clone()
        .or_else(|| cluster.status.write_service.clone())
        .unwrap_or_default();
    let wal_directory = params.walDirectory.clone().unwrap_or_else(|| cfg.wal_directory_default.clone());
    let synchronous = params.synchronous.as_deref().unwrap_or("inactive") == "active";

    let conn = connection_string(&host);

    let create_slot_command = format!(
        "pg_receivewal --slot {DEFAULT_SLOT_NAME} --create-slot --if-not-exists --directory {wal_directory} --dbname \"{conn}\""
    );
    let mut stream_command = format!(
        "pg_receivewal --slot {DEFAULT_SLOT_NAME} --compress 0 --directory {wal_directory} --dbname \"{conn}\""
    );
    if synchronous {
        stream_command.push_str(" --synchronous");
    }
    stream_command.push_str(" --verbose");
    let shell_command = format!("{create_slot_command} && {stream_command}");

    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), name.clone());

    let volume_mounts = vec![
        VolumeMount {
            name: "wal-data".to_string(),
            mount_path: wal_directory.clone(),
            ..Default::default()
        },
        VolumeMount {
            name: "ca-cert".to_string(),
            mount_path: CA_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
        VolumeMount {
            name: "replication-cert".to_string(),
            mount_path: CERT_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        },
    ];

    let volumes = vec![
        Volume {
            name: "wal-data".to_string(),
            persistent_volume_claim: Some(k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource {
                claim_name: name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "ca-cert".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(format!("{}-ca", cluster.name_any())),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "replication-cert".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(format!("{}-replication", cluster.name_any())),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    let container = Container {
        name: "wal-receiver".to_string(),
        image: Some(image),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), shell_command]),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: cluster.namespace(),
            owner_references: Some(vec![oref]),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    restart_policy: Some("Always".to_string()),
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(105),
                        run_as_group: Some(103),
                        fs_group: Some(103),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Cluster {
        let mut c = Cluster::new("pg1", Default::default());
        c.meta_mut().namespace = Some("default".to_string());
        c.status.write_service = Some("pg1-rw".to_string());
        c
    }

    #[test]
    fn rejects_invalid_synchronous_value() {
        let params = WalReceiverParameters {
            synchronous: Some("sometimes".to_string()),
            ..Default::default()
        };
        assert!(validate(&params).is_err());
    }

    #[test]
    fn rejects_unparseable_pvc_size() {
        let params = WalReceiverParameters {
            walPVCSize: Some("not-a-quantity".to_string()),
            ..Default::default()
        };
        assert!(validate(&params).is_err());
    }

    #[test]
    fn accepts_defaults() {
        assert!(validate(&WalReceiverParameters::default()).is_ok());
    }

    #[test]
    fn deployment_name_suffixes_cluster_name() {
        assert_eq!(deployment_name("pg1"), "pg1-wal-receiver");
    }

    #[test]
    fn pvc_defaults_to_config_size_when_unset() {
        let cfg = Config::default();
        let pvc = build_pvc(&cluster(), &WalReceiverParameters::default(), &cfg);
        let size = pvc.spec.unwrap().resources.unwrap().requests.unwrap()["storage"].clone();
        assert_eq!(size, Quantity(cfg.wal_pvc_default_size));
    }

    #[test]
    fn deployment_falls_back_to_cluster_write_service() {
        let cfg = Config::default();
        let deployment = build_deployment(&cluster(), &WalReceiverParameters::default(), &cfg);
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        let command = container.command.as_ref().unwrap().last().unwrap();
        assert!(command.contains("host=pg1-rw"));
    }

    #[test]
    fn connection_string_points_at_the_mounted_verify_full_certs() {
        let conn = connection_string("pg1-rw");
        assert!(conn.contains("sslmode=verify-full"));
        assert!(conn.contains(&format!("sslrootcert={CA_MOUNT_PATH}/ca.crt")));
        assert!(conn.contains(&format!("sslcert={CERT_MOUNT_PATH}/tls.crt")));
        assert!(conn.contains(&format!("sslkey={CERT_MOUNT_PATH}/tls.key")));
    }
}
