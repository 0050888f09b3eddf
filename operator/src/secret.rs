//! `DocumentDB` credentials secret: created once with a random
//! username/password pair, then left alone on every subsequent reconcile
//! (§4.1 step 3 — "if present, leave it").

use std::{collections::BTreeMap, sync::Arc};

use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString};
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use passwords::PasswordGenerator;
use rand::{distributions::Alphanumeric, Rng};
use tracing::debug;

use crate::{apis::documentdb_types::DocumentDB, controller::Context, Error};

const DEFAULT_USERNAME: &str = "documentdb";

/// `<ddb-name>-connection`, matching the secret name the sidecar-injector
/// plugin and the downstream PG cluster are wired to via plugin parameters.
pub fn default_secret_name(ddb_name: &str) -> String {
    format!("{ddb_name}-connection")
}

pub async fn reconcile_credentials_secret(ddb: &DocumentDB, ctx: Arc<Context>) -> Result<String, Error> {
    let ns = ddb.namespace().expect("DocumentDB is namespaced");
    let name = ddb
        .spec
        .credentialsSecretName
        .clone()
        .unwrap_or_else(|| default_secret_name(&ddb.name_any()));
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);

    if secrets.get_opt(&name).await.map_err(Error::KubeError)?.is_some() {
        debug!(secret = %name, "credentials secret already exists, leaving as-is");
        return Ok(name);
    }

    let username = random_username();
    let password = generate_password();
    let mut data = BTreeMap::new();
    data.insert("username".to_string(), b64_encode(&username));
    data.insert("password".to_string(), b64_encode(&password));

    let oref = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..Secret::default()
    };

    let pp = PatchParams::apply("documentdb-operator").force();
    secrets
        .patch(&name, &pp, &Patch::Apply(&secret))
        .await
        .map_err(Error::KubeError)?;
    debug!(secret = %name, "created credentials secret");
    Ok(name)
}

fn random_username() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{DEFAULT_USERNAME}_{suffix}")
}

fn generate_password() -> String {
    let pg = PasswordGenerator {
        length: 20,
        numbers: true,
        lowercase_letters: true,
        uppercase_letters: true,
        symbols: false,
        spaces: false,
        exclude_similar_characters: true,
        strict: true,
    };
    pg.generate_one().expect("password generator never fails with a valid config")
}

fn b64_encode(s: &str) -> ByteString {
    ByteString(s.as_bytes().to_vec())
}
