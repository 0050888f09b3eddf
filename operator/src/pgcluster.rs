//! Computes the downstream PG-Operator `Cluster` spec for a `DocumentDB`.
//!
//! Mirrors the teacher's `cnpg_cluster_from_cdb`: one pure function building
//! the full object from the CR plus whatever sub-reconcilers have already
//! resolved (replication context, TLS readiness, credentials secret name).

use documentdb_common::cnpg::{
    Cluster, ClusterBootstrap, ClusterBootstrapInitDb, ClusterBootstrapRecovery,
    ClusterExternalClusters, ClusterExternalClustersPassword, ClusterPlugin,
    ClusterPostgresConfiguration, ClusterReplicaConfiguration, ClusterSpec, ClusterStorageConfiguration,
};
use documentdb_common::{generate_service_name, ReplicationContext};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::apis::documentdb_types::DocumentDB;

const DEFAULT_SIDECAR_INJECTOR_PLUGIN: &str = "documentdb-sidecar-injector.documentdb.io";
const DEFAULT_WAL_RECEIVER_PLUGIN: &str = "documentdb-wal-receiver.documentdb.io";

/// `DocumentDB.spec.storage.pvcSize` in a CNPG external cluster's
/// `connectionParameters.sslmode` is always `verify-full`; every internal
/// fleet hop authenticates with a certificate, never a password alone.
const EXTERNAL_CLUSTER_SSLMODE: &str = "verify-full";

pub struct PgClusterInputs<'a> {
    pub credentials_secret_name: &'a str,
    pub gateway_image: &'a str,
    pub gateway_tls_secret: Option<&'a str>,
    /// Stands in for the `resource-group` suffix `generateServiceName`
    /// reserves space for; this operator has no first-class resource-group
    /// field, so the namespace is used (see DESIGN.md open question).
    pub resource_group: &'a str,
}

pub fn build_cluster(ddb: &DocumentDB, repl: &ReplicationContext, inputs: &PgClusterInputs<'_>) -> Cluster {
    let name = ddb.name_any();
    let namespace = ddb.namespace().expect("DocumentDB is namespaced");
    let owner_reference = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");

    let bootstrap = Some(match ddb.spec.bootstrap.as_ref().and_then(|b| b.recovery.as_ref()) {
        Some(recovery) => ClusterBootstrap {
            init_db: None,
            recovery: Some(ClusterBootstrapRecovery {
                source: recovery.backup.clone(),
            }),
        },
        None => ClusterBootstrap {
            init_db: Some(ClusterBootstrapInitDb {
                post_init_sql: Some(post_init_sql()),
            }),
            recovery: None,
        },
    });

    let storage_configuration = Some(ClusterStorageConfiguration {
        size: Some(ddb.spec.storage.pvcSize.clone()),
        storage_class: ddb.spec.storage.storageClass.clone(),
    });

    let postgres_configuration = Some(ClusterPostgresConfiguration {
        parameters: None,
        additional_libraries: Some(additional_libraries()),
        pg_hba: pg_hba_entries(repl),
    });

    let external_clusters = external_clusters(&name, repl, inputs);
    let replica_configuration = replica_configuration(repl);

    let mut labels = BTreeMap::new();
    labels.insert(
        documentdb_common::REPLICATION_ROLE_LABEL.to_string(),
        if repl.is_primary() { "primary" } else { "replica" }.to_string(),
    );

    Cluster {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace),
            owner_references: Some(vec![owner_reference]),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: ClusterSpec {
            instances: ddb.spec.instancesPerNode as i64,
            image_name: Some(ddb.spec.documentDBImage.clone()),
            storage_configuration,
            bootstrap,
            postgres_configuration,
            external_clusters,
            plugins: Some(plugins(ddb, inputs)),
            standby_names: Some(repl.standby_names()),
            replica: replica_configuration,
        },
        status: Default::default(),
    }
}

fn post_init_sql() -> Vec<String> {
    vec![
        "CREATE EXTENSION IF NOT EXISTS citus;".to_string(),
        "CREATE EXTENSION IF NOT EXISTS pg_cron;".to_string(),
        "CREATE EXTENSION IF NOT EXISTS documentdb_core;".to_string(),
        "CREATE EXTENSION IF NOT EXISTS documentdb;".to_string(),
    ]
}

fn additional_libraries() -> Vec<String> {
    vec![
        "citus".to_string(),
        "pg_cron".to_string(),
        "pg_documentdb_core".to_string(),
        "pg_documentdb".to_string(),
    ]
}

fn pg_hba_entries(repl: &ReplicationContext) -> Option<Vec<String>> {
    if !repl.is_replicating() {
        return None;
    }
    Some(vec!["host replication streaming_replica all scram-sha-256".to_string()])
}

fn external_clusters(
    self_name: &str,
    repl: &ReplicationContext,
    inputs: &PgClusterInputs<'_>,
) -> Option<Vec<ClusterExternalClusters>> {
    if repl.others.is_empty() {
        return None;
    }
    Some(
        repl.others
            .iter()
            .map(|other| {
                let service = generate_service_name(self_name, other, inputs.resource_group);
                let mut params = BTreeMap::new();
                params.insert("host".to_string(), service);
                params.insert("dbname".to_string(), "postgres".to_string());
                params.insert("user".to_string(), "streaming_replica".to_string());
                params.insert("sslmode".to_string(), EXTERNAL_CLUSTER_SSLMODE.to_string());
                ClusterExternalClusters {
                    name: other.clone(),
                    connection_parameters: Some(params),
                    password: Some(ClusterExternalClustersPassword {
                        name: inputs.credentials_secret_name.to_string(),
                        key: "password".to_string(),
                    }),
                }
            })
            .collect(),
    )
}

/// Demotes this cluster to a CNPG replica cluster sourced from the fleet's
/// current target primary, implementing the "old primary rewrites itself as
/// a replica referencing the new primary" half of the failover window
/// (§4.1 Failover semantics). `source` names an entry this same reconcile
/// is about to write into `external_clusters`, so the two must stay paired.
fn replica_configuration(repl: &ReplicationContext) -> Option<ClusterReplicaConfiguration> {
    if repl.is_primary() {
        return None;
    }
    Some(ClusterReplicaConfiguration {
        enabled: true,
        source: repl.target_local_primary.clone(),
    })
}

fn plugins(ddb: &DocumentDB, inputs: &PgClusterInputs<'_>) -> Vec<ClusterPlugin> {
    let mut sidecar_params = BTreeMap::new();
    sidecar_params.insert("gatewayImage".to_string(), inputs.gateway_image.to_string());
    sidecar_params.insert(
        "credentialSecretName".to_string(),
        inputs.credentials_secret_name.to_string(),
    );
    if let Some(secret) = inputs.gateway_tls_secret {
        sidecar_params.insert("gatewayTLSSecret".to_string(), secret.to_string());
    }

    let wal_params = BTreeMap::new();

    vec![
        ClusterPlugin {
            name: ddb
                .spec
                .sidecarInjectorPluginName
                .clone()
                .unwrap_or_else(|| DEFAULT_SIDECAR_INJECTOR_PLUGIN.to_string()),
            parameters: Some(sidecar_params),
        },
        ClusterPlugin {
            name: ddb
                .spec
                .walReplicaPluginName
                .clone()
                .unwrap_or_else(|| DEFAULT_WAL_RECEIVER_PLUGIN.to_string()),
            parameters: Some(wal_params),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_cluster_gets_no_replica_configuration() {
        let repl = ReplicationContext::resolve("mA", "mA", &["mA".to_string(), "mB".to_string()], None).unwrap();
        assert!(replica_configuration(&repl).is_none());
    }

    #[test]
    fn replica_cluster_sources_from_the_target_primary() {
        let repl = ReplicationContext::resolve("mB", "mA", &["mA".to_string(), "mB".to_string()], None).unwrap();
        let replica = replica_configuration(&repl).unwrap();
        assert!(replica.enabled);
        assert_eq!(replica.source, "mA");
    }

    #[test]
    fn demoted_primary_sources_from_the_new_target_primary_mid_failover() {
        // mA was primary, failover to mB is in flight: mA's current_local_primary
        // is still itself but the target has already moved to mB.
        let repl = ReplicationContext::resolve("mA", "mB", &["mA".to_string(), "mB".to_string()], Some("mA")).unwrap();
        assert!(!repl.endpoint_enabled());
        let replica = replica_configuration(&repl).unwrap();
        assert_eq!(replica.source, "mB");
    }

    #[test]
    fn replica_cluster_is_labelled_for_plugin_consumption() {
        let repl = ReplicationContext::resolve(
            "mB",
            "mA",
            &["mA".to_string(), "mB".to_string()],
            None,
        )
        .unwrap();
        let inputs = PgClusterInputs {
            credentials_secret_name: "mB-connection",
            gateway_image: "img:latest",
            gateway_tls_secret: None,
            resource_group: "rg",
        };
        let mut ddb = DocumentDB::default();
        ddb.meta_mut().name = Some("mB".to_string());
        ddb.meta_mut().namespace = Some("default".to_string());
        ddb.spec.documentDBImage = "img:16".to_string();
        let cluster = build_cluster(&ddb, &repl, &inputs);
        assert_eq!(
            cluster.metadata.labels.unwrap().get(documentdb_common::REPLICATION_ROLE_LABEL),
            Some(&"replica".to_string())
        );
    }

    #[test]
    fn no_remote_clusters_means_no_external_clusters() {
        let repl = ReplicationContext::no_replication("ddb1");
        let inputs = PgClusterInputs {
            credentials_secret_name: "ddb1-connection",
            gateway_image: "img:latest",
            gateway_tls_secret: None,
            resource_group: "default",
        };
        assert!(external_clusters("ddb1", &repl, &inputs).is_none());
    }

    #[test]
    fn remote_clusters_get_verify_full_sslmode() {
        let repl = ReplicationContext::resolve(
            "mA",
            "mA",
            &["mA".to_string(), "mB".to_string()],
            None,
        )
        .unwrap();
        let inputs = PgClusterInputs {
            credentials_secret_name: "mA-connection",
            gateway_image: "img:latest",
            gateway_tls_secret: None,
            resource_group: "rg",
        };
        let clusters = external_clusters("mA", &repl, &inputs).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(
            clusters[0].connection_parameters.as_ref().unwrap().get("sslmode"),
            Some(&EXTERNAL_CLUSTER_SSLMODE.to_string())
        );
    }
}
