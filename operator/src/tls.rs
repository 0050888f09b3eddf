//! Gateway TLS sub-reconciler: dispatches on `DocumentDBSpec.tls.gateway`'s
//! tagged `mode` variant and always writes `status.tls` before returning.

use documentdb_common::certmanager::{
    Certificate, CertificateSpec, Issuer, IssuerSpec, ObjectReference,
};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Patch, PatchParams},
    Api, Resource, ResourceExt,
};
use std::sync::Arc;
use tracing::debug;

use crate::apis::documentdb_types::{DocumentDB, GatewayTlsSpec, TlsStatus};
use crate::controller::Context;
use crate::Error;

const SELF_SIGNED_ISSUER_SUFFIX: &str = "-selfsigned-issuer";
const GATEWAY_CERT_SUFFIX: &str = "-gateway-cert";
const GATEWAY_CERT_SECRET_SUFFIX: &str = "-gateway-cert-tls";

/// Service name the gateway certificate's DNS names must always include,
/// matching the exposed-service name computed in `service.rs`.
fn gateway_service_dns_name(ddb_name: &str) -> String {
    format!("documentdb-service-{ddb_name}")
}

pub async fn reconcile_tls(ddb: &DocumentDB, ctx: Arc<Context>) -> Result<TlsStatus, Error> {
    let Some(tls) = ddb.spec.tls.as_ref() else {
        return Ok(TlsStatus::default());
    };
    let Some(gateway) = tls.gateway.as_ref() else {
        return Ok(TlsStatus::default());
    };

    match gateway {
        GatewayTlsSpec::Disabled => Ok(TlsStatus::default()),
        GatewayTlsSpec::Provided { secretName } => reconcile_provided(ddb, ctx, secretName).await,
        GatewayTlsSpec::CertManager {
            issuerRef,
            dnsNames,
            secretName,
        } => {
            reconcile_cert_manager(
                ddb,
                ctx,
                &issuerRef.name,
                &issuerRef.kind,
                &issuerRef.group,
                dnsNames.as_deref(),
                secretName.as_deref(),
            )
            .await
        }
        GatewayTlsSpec::SelfSigned { dnsNames } => {
            reconcile_self_signed(ddb, ctx, dnsNames.as_deref()).await
        }
    }
}

async fn reconcile_provided(
    ddb: &DocumentDB,
    ctx: Arc<Context>,
    secret_name: &str,
) -> Result<TlsStatus, Error> {
    let ns = ddb.namespace().expect("DocumentDB is namespaced");
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &ns);

    match secrets.get_opt(secret_name).await.map_err(Error::KubeError)? {
        Some(secret) => {
            let data = secret.data.unwrap_or_default();
            if data.contains_key("tls.crt") && data.contains_key("tls.key") {
                Ok(TlsStatus {
                    ready: true,
                    secretName: Some(secret_name.to_string()),
                    message: None,
                })
            } else {
                Ok(TlsStatus {
                    ready: false,
                    secretName: None,
                    message: Some(format!("secret '{secret_name}' is missing tls.crt or tls.key")),
                })
            }
        }
        None => Ok(TlsStatus {
            ready: false,
            secretName: None,
            message: Some(format!("secret '{secret_name}' not found")),
        }),
    }
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_cert_manager(
    ddb: &DocumentDB,
    ctx: Arc<Context>,
    issuer_name: &str,
    issuer_kind: &str,
    issuer_group: &str,
    extra_dns_names: Option<&[String]>,
    requested_secret_name: Option<&str>,
) -> Result<TlsStatus, Error> {
    let ns = ddb.namespace().expect("DocumentDB is namespaced");
    let name = ddb.name_any();
    let cert_name = format!("{name}{GATEWAY_CERT_SUFFIX}");
    let secret_name = requested_secret_name
        .map(str::to_string)
        .unwrap_or_else(|| format!("{name}{GATEWAY_CERT_SECRET_SUFFIX}"));

    let mut dns_names = vec![gateway_service_dns_name(&name)];
    if let Some(extra) = extra_dns_names {
        for n in extra {
            if !dns_names.contains(n) {
                dns_names.push(n.clone());
            }
        }
    }

    let certificates: Api<Certificate> = Api::namespaced(ctx.client.clone(), &ns);
    let oref = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");

    let certificate = Certificate {
        metadata: ObjectMeta {
            name: Some(cert_name.clone()),
            namespace: Some(ns.clone()),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        spec: CertificateSpec {
            secret_name: secret_name.clone(),
            dns_names,
            issuer_ref: ObjectReference {
                name: issuer_name.to_string(),
                kind: Some(issuer_kind.to_string()),
                group: Some(issuer_group.to_string()),
            },
            duration: None,
        },
        status: None,
    };

    let pp = PatchParams::apply("documentdb-operator").force();
    certificates
        .patch(&cert_name, &pp, &Patch::Apply(&certificate))
        .await
        .map_err(Error::KubeError)?;

    match certificates.get_opt(&cert_name).await.map_err(Error::KubeError)? {
        Some(current) if current.status.as_ref().map(|s| s.is_ready()).unwrap_or(false) => {
            Ok(TlsStatus {
                ready: true,
                secretName: Some(secret_name),
                message: None,
            })
        }
        _ => {
            debug!("gateway certificate {} not yet ready", cert_name);
            Ok(TlsStatus {
                ready: false,
                secretName: None,
                message: Some(format!("certificate '{cert_name}' is not ready")),
            })
        }
    }
}

async fn reconcile_self_signed(
    ddb: &DocumentDB,
    ctx: Arc<Context>,
    extra_dns_names: Option<&[String]>,
) -> Result<TlsStatus, Error> {
    let ns = ddb.namespace().expect("DocumentDB is namespaced");
    let name = ddb.name_any();
    let issuer_name = format!("{name}{SELF_SIGNED_ISSUER_SUFFIX}");
    let oref = ddb.controller_owner_ref(&()).expect("DocumentDB has apiVersion/kind");

    let issuers: Api<Issuer> = Api::namespaced(ctx.client.clone(), &ns);
    let issuer = Issuer {
        metadata: ObjectMeta {
            name: Some(issuer_name.clone()),
            namespace: Some(ns.clone()),
            owner_references: Some(vec![oref]),
            ..ObjectMeta::default()
        },
        spec: IssuerSpec {
            self_signed: Some(serde_json::json!({})),
            ca: None,
        },
    };
    let pp = PatchParams::apply("documentdb-operator").force();
    issuers
        .patch(&issuer_name, &pp, &Patch::Apply(&issuer))
        .await
        .map_err(Error::KubeError)?;

    reconcile_cert_manager(ddb, ctx, &issuer_name, "Issuer", "cert-manager.io", extra_dns_names, None).await
}
