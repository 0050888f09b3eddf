// Include the #[ignore] macro on slow tests.
// That way, 'cargo test' does not run them by default.
// To run just these tests, use 'cargo test -- --ignored'
// To run all tests, use 'cargo test -- --include-ignored'
//
// https://doc.rust-lang.org/book/ch11-02-running-tests.html
//
// These tests assume there is already a Kubernetes cluster running with a
// configured context, and that the DocumentDB CRDs and the operator itself
// are already installed. They exercise the operator as a black box against
// a live API server rather than re-testing reconcile logic covered by the
// crate's unit tests.

#[cfg(test)]
mod test {
    use k8s_openapi::{
        api::core::v1::{Namespace, Secret},
        apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use documentdb_common::cnpg::Cluster;
    use kube::{
        api::{DeleteParams, PostParams},
        runtime::wait::{await_condition, conditions, Condition},
        Api, Client, Config,
    };
    use operator::apis::documentdb_types::DocumentDB;
    use rand::Rng;
    use std::time::Duration;

    const API_VERSION: &str = "db.microsoft.com/preview";
    const TIMEOUT_SECONDS_CLUSTER_PRESENT: u64 = 300;
    const TIMEOUT_SECONDS_SECRET_PRESENT: u64 = 60;
    const TIMEOUT_SECONDS_NS_DELETED: u64 = 60;

    async fn kube_client() -> Client {
        let kube_config = Config::infer()
            .await
            .expect("Please configure your Kubernetes context.");
        let client = Client::try_from(kube_config).expect("Failed to initialize Kubernetes client");

        let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            await_condition(crds, "documentdbs.db.microsoft.com", conditions::is_crd_established()),
        )
        .await
        .expect("Custom Resource Definition for DocumentDB was not found.");

        client
    }

    fn wait_for_secret() -> impl Condition<Secret> {
        |obj: Option<&Secret>| {
            obj.and_then(|s| s.type_.as_deref()).map(|t| t == "Opaque").unwrap_or(false)
        }
    }

    fn wait_for_cluster_primary() -> impl Condition<Cluster> {
        |obj: Option<&Cluster>| {
            obj.and_then(|c| c.status.current_primary.as_ref()).is_some()
        }
    }

    async fn create_namespace(client: Client, name: &str) {
        let namespaces: Api<Namespace> = Api::all(client);
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        let _ = namespaces.create(&PostParams::default(), &namespace).await;
    }

    async fn delete_namespace(client: Client, name: &str) {
        let namespaces: Api<Namespace> = Api::all(client);
        let _ = namespaces.delete(name, &DeleteParams::default()).await;
        let _ = tokio::time::timeout(
            Duration::from_secs(TIMEOUT_SECONDS_NS_DELETED),
            await_condition(namespaces, name, conditions::is_deleted("")),
        )
        .await;
    }

    fn random_name(prefix: &str) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{prefix}-{suffix}")
    }

    // Creates a minimal single-node DocumentDB and waits for the operator to
    // converge a downstream PG-Operator Cluster and a credentials Secret.
    // Do your best to keep these names unique; Rust runs same-named tests
    // concurrently, which causes cross-talk between clusters sharing a name.
    #[tokio::test]
    #[ignore]
    async fn test_create_minimal_documentdb() {
        let client = kube_client().await;
        let namespace = random_name("documentdb-test");
        create_namespace(client.clone(), &namespace).await;

        let name = random_name("ddb");
        let ddbs: Api<DocumentDB> = Api::namespaced(client.clone(), &namespace);

        let ddb_json = serde_json::json!({
            "apiVersion": API_VERSION,
            "kind": "DocumentDB",
            "metadata": { "name": name },
            "spec": {
                "nodeCount": 1,
                "instancesPerNode": 1,
                "documentDBImage": "ghcr.io/documentdb/documentdb-local:16",
            }
        });
        let ddb: DocumentDB = serde_json::from_value(ddb_json).unwrap();
        ddbs.create(&PostParams::default(), &ddb).await.expect("failed to create DocumentDB");

        let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
        let secret_name = format!("{name}-connection");
        tokio::time::timeout(
            Duration::from_secs(TIMEOUT_SECONDS_SECRET_PRESENT),
            await_condition(secrets, &secret_name, wait_for_secret()),
        )
        .await
        .unwrap_or_else(|_| panic!("credentials secret {secret_name} was never created"));

        let clusters: Api<Cluster> = Api::namespaced(client.clone(), &namespace);
        tokio::time::timeout(
            Duration::from_secs(TIMEOUT_SECONDS_CLUSTER_PRESENT),
            await_condition(clusters, &name, wait_for_cluster_primary()),
        )
        .await
        .unwrap_or_else(|_| panic!("downstream cluster {name} never elected a primary"));

        ddbs.delete(&name, &DeleteParams::default()).await.expect("failed to delete DocumentDB");
        delete_namespace(client, &namespace).await;
    }

    // Exercises the cross-cluster replication path: two DocumentDBs in the
    // same namespace, one naming the other as its replication peer, and
    // confirms the operator wires an externalCluster entry for the primary.
    #[tokio::test]
    #[ignore]
    async fn test_replication_pair_creates_external_cluster() {
        let client = kube_client().await;
        let namespace = random_name("documentdb-repl-test");
        create_namespace(client.clone(), &namespace).await;

        let primary_name = random_name("ddb-primary");
        let replica_name = random_name("ddb-replica");
        let ddbs: Api<DocumentDB> = Api::namespaced(client.clone(), &namespace);

        let cluster_list = vec![primary_name.clone(), replica_name.clone()];
        for (name, local_primary) in [(&primary_name, &primary_name), (&replica_name, &primary_name)] {
            let ddb_json = serde_json::json!({
                "apiVersion": API_VERSION,
                "kind": "DocumentDB",
                "metadata": { "name": name },
                "spec": {
                    "nodeCount": 1,
                    "instancesPerNode": 1,
                    "documentDBImage": "ghcr.io/documentdb/documentdb-local:16",
                    "clusterReplication": {
                        "clusterList": cluster_list.iter().map(|n| serde_json::json!({"name": n})).collect::<Vec<_>>(),
                        "primary": local_primary,
                    }
                }
            });
            let ddb: DocumentDB = serde_json::from_value(ddb_json).unwrap();
            ddbs.create(&PostParams::default(), &ddb).await.expect("failed to create DocumentDB");
        }

        let clusters: Api<Cluster> = Api::namespaced(client.clone(), &namespace);
        let replica_cluster = tokio::time::timeout(
            Duration::from_secs(TIMEOUT_SECONDS_CLUSTER_PRESENT),
            await_condition(
                clusters,
                &replica_name,
                |obj: Option<&Cluster>| obj.and_then(|c| c.spec.external_clusters.as_ref()).is_some(),
            ),
        )
        .await
        .unwrap_or_else(|_| panic!("replica cluster {replica_name} never got an externalCluster entry"))
        .expect("cluster object missing after condition matched");

        let external = replica_cluster.spec.external_clusters.as_ref().unwrap();
        assert!(
            external.iter().any(|ec| ec.name == primary_name),
            "expected an externalCluster entry named {primary_name}"
        );

        for name in [&primary_name, &replica_name] {
            let _ = ddbs.delete(name, &DeleteParams::default()).await;
        }
        delete_namespace(client, &namespace).await;
    }

    // Confirms that deleting a DocumentDB removes the owned downstream
    // Cluster via garbage collection, not via the operator's own finalizer
    // teardown path (which only handles cross-cluster service cleanup).
    #[tokio::test]
    #[ignore]
    async fn test_delete_documentdb_garbage_collects_cluster() {
        let client = kube_client().await;
        let namespace = random_name("documentdb-gc-test");
        create_namespace(client.clone(), &namespace).await;

        let name = random_name("ddb-gc");
        let ddbs: Api<DocumentDB> = Api::namespaced(client.clone(), &namespace);
        let ddb_json = serde_json::json!({
            "apiVersion": API_VERSION,
            "kind": "DocumentDB",
            "metadata": { "name": name },
            "spec": {
                "nodeCount": 1,
                "instancesPerNode": 1,
                "documentDBImage": "ghcr.io/documentdb/documentdb-local:16",
            }
        });
        let ddb: DocumentDB = serde_json::from_value(ddb_json).unwrap();
        ddbs.create(&PostParams::default(), &ddb).await.expect("failed to create DocumentDB");

        let clusters: Api<Cluster> = Api::namespaced(client.clone(), &namespace);
        tokio::time::timeout(
            Duration::from_secs(TIMEOUT_SECONDS_CLUSTER_PRESENT),
            await_condition(clusters.clone(), &name, conditions::is_crd_established()),
        )
        .await
        .ok();

        ddbs.delete(&name, &DeleteParams::default()).await.expect("failed to delete DocumentDB");
        tokio::time::timeout(Duration::from_secs(60), await_condition(clusters, &name, conditions::is_deleted("")))
            .await
            .unwrap_or_else(|_| panic!("downstream cluster {name} was not garbage collected"));

        delete_namespace(client, &namespace).await;
    }
}
