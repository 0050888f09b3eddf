//! Cross-cluster replication context.
//!
//! This is derived fresh on every reconcile from `DocumentDBSpec.cluster_replication`
//! and the cluster-name discovery source — never persisted, never cached
//! across reconciles, so restarts reconstruct identical state from the API
//! server alone.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The role this cluster plays in the fleet, resolved for the current
/// reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationState {
    NoReplication,
    Primary,
    Replica,
}

/// Cross-cluster networking strategy, resolved from either the enumerated
/// `crossCloudNetworkingStrategy` field or the legacy `enableFleetForCrossCloud`
/// boolean (treated as `AzureFleet` when true).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, JsonSchema)]
pub enum CrossCloudNetworkingStrategy {
    AzureFleet,
    Istio,
    #[default]
    None,
}

impl CrossCloudNetworkingStrategy {
    pub fn from_legacy_bool(enable_fleet_for_cross_cloud: bool) -> Self {
        if enable_fleet_for_cross_cloud {
            CrossCloudNetworkingStrategy::AzureFleet
        } else {
            CrossCloudNetworkingStrategy::None
        }
    }
}

/// A fully-resolved replication context for a single reconcile pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationContext {
    pub self_name: String,
    pub others: Vec<String>,
    pub primary_region: String,
    pub state: ReplicationState,
    pub current_local_primary: String,
    pub target_local_primary: String,
}

/// Error resolving replication context: surfaced as a validation error (no
/// retry until the offending spec field changes).
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("primary cluster '{primary}' is not present in clusterList {cluster_list:?}")]
    PrimaryNotInClusterList {
        primary: String,
        cluster_list: Vec<String>,
    },
    #[error("self cluster name '{self_name}' is not present in clusterList {cluster_list:?}")]
    SelfNotInClusterList {
        self_name: String,
        cluster_list: Vec<String>,
    },
}

impl ReplicationContext {
    /// Builds a replication context for a single-cluster (non-replicating)
    /// DocumentDB — used whenever `clusterReplication` is absent.
    pub fn no_replication(self_name: impl Into<String>) -> Self {
        let self_name = self_name.into();
        ReplicationContext {
            current_local_primary: self_name.clone(),
            target_local_primary: self_name.clone(),
            primary_region: self_name.clone(),
            self_name,
            others: Vec::new(),
            state: ReplicationState::NoReplication,
        }
    }

    /// Resolves a replication context from the raw spec fields. `self_name`
    /// must already be resolved (either `metadata.name` or the fleet
    /// cluster-name discovered from `kube-system/cluster-name`).
    pub fn resolve(
        self_name: impl Into<String>,
        primary: &str,
        cluster_list: &[String],
        current_local_primary: Option<&str>,
    ) -> Result<Self, ReplicationError> {
        let self_name = self_name.into();

        if !cluster_list.contains(&primary.to_string()) {
            return Err(ReplicationError::PrimaryNotInClusterList {
                primary: primary.to_string(),
                cluster_list: cluster_list.to_vec(),
            });
        }
        if !cluster_list.contains(&self_name) {
            return Err(ReplicationError::SelfNotInClusterList {
                self_name,
                cluster_list: cluster_list.to_vec(),
            });
        }

        let others: Vec<String> = cluster_list
            .iter()
            .filter(|c| **c != self_name)
            .cloned()
            .collect();

        if others.is_empty() {
            // clusterList == [self] regardless of `primary`: NoReplication.
            return Ok(Self::no_replication(self_name));
        }

        let state = if primary == self_name {
            ReplicationState::Primary
        } else {
            ReplicationState::Replica
        };

        let current_local_primary = current_local_primary.unwrap_or(primary).to_string();

        Ok(ReplicationContext {
            self_name,
            others,
            primary_region: primary.to_string(),
            state,
            current_local_primary,
            target_local_primary: primary.to_string(),
        })
    }

    pub fn is_primary(&self) -> bool {
        matches!(
            self.state,
            ReplicationState::Primary | ReplicationState::NoReplication
        )
    }

    pub fn is_replicating(&self) -> bool {
        matches!(
            self.state,
            ReplicationState::Primary | ReplicationState::Replica
        )
    }

    /// Gates whether a connection string should be published during a
    /// failover window: disabled while this cluster's current local primary
    /// has not yet caught up to the target.
    pub fn endpoint_enabled(&self) -> bool {
        self.state == ReplicationState::NoReplication
            || self.current_local_primary == self.target_local_primary
    }

    /// `standbyNames` for the downstream PG cluster spec: every other
    /// cluster in the fleet, plus the local WAL-streaming sink.
    pub fn standby_names(&self) -> Vec<String> {
        let mut names = self.others.clone();
        names.push("pg_receivewal".to_string());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn self_only_cluster_list_is_no_replication() {
        let ctx = ReplicationContext::resolve("mA", "mA", &names(&["mA"]), None).unwrap();
        assert_eq!(ctx.state, ReplicationState::NoReplication);
        assert!(ctx.is_primary());
        assert!(ctx.endpoint_enabled());
    }

    #[test]
    fn others_equals_cluster_list_minus_self() {
        let ctx = ReplicationContext::resolve("mA", "mA", &names(&["mA", "mB", "mC"]), None).unwrap();
        assert_eq!(ctx.others, names(&["mB", "mC"]));
        assert_eq!(ctx.state, ReplicationState::Primary);
    }

    #[test]
    fn state_is_replica_when_primary_is_elsewhere() {
        let ctx = ReplicationContext::resolve("mB", "mA", &names(&["mA", "mB"]), None).unwrap();
        assert_eq!(ctx.state, ReplicationState::Replica);
        assert!(!ctx.is_primary());
        assert!(ctx.is_replicating());
    }

    #[test]
    fn primary_not_in_cluster_list_is_an_error() {
        let err = ReplicationContext::resolve("mA", "mZ", &names(&["mA", "mB"]), None).unwrap_err();
        assert!(matches!(err, ReplicationError::PrimaryNotInClusterList { .. }));
    }

    #[test]
    fn endpoint_disabled_during_failover_window() {
        let mut ctx = ReplicationContext::resolve("mA", "mB", &names(&["mA", "mB"]), Some("mA")).unwrap();
        // mA is the old primary: target is mB, current is still mA.
        assert!(!ctx.endpoint_enabled());
        ctx.current_local_primary = "mB".to_string();
        assert!(ctx.endpoint_enabled());
    }

    #[test]
    fn standby_names_appends_wal_receiver_sink() {
        let ctx = ReplicationContext::resolve("mA", "mA", &names(&["mA", "mB", "mC"]), None).unwrap();
        assert_eq!(ctx.standby_names(), names(&["mB", "mC", "pg_receivewal"]));
    }

    #[test]
    fn legacy_bool_maps_to_azure_fleet() {
        assert_eq!(
            CrossCloudNetworkingStrategy::from_legacy_bool(true),
            CrossCloudNetworkingStrategy::AzureFleet
        );
        assert_eq!(
            CrossCloudNetworkingStrategy::from_legacy_bool(false),
            CrossCloudNetworkingStrategy::None
        );
    }
}
