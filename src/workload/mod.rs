//! Resource builders for Zookeeper ensembles
//!
//! Pure functions from a resolved [`EnsembleConfig`] to the child resources
//! each node needs:
//! - [`build_deployment`]: a single-replica Deployment running the node
//! - [`build_service`]: the Service that exposes the node's three ports
//!
//! Output is deterministic: the same config always yields structurally equal
//! objects, which is what lets the diff engine treat any difference as drift.

mod deployment;
mod service;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::ensemble::EnsembleConfig;

pub use deployment::build_deployment;
pub use service::build_service;

/// Label selecting a node's pods; its value is the node name
pub const SELECTOR_LABEL: &str = "serviceName";

/// Label recording which Zookeeper object a child belongs to
pub const ENSEMBLE_LABEL: &str = "apps.handpay.cn/zookeeper";

/// Standard managed-by label key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`] on every child
pub const MANAGED_BY: &str = "zookeeper-operator";

/// Port name for the follower (quorum) port
pub const FOLLOWER_PORT_NAME: &str = "flower-port";

/// Port name for the leader election port
pub const ELECTION_PORT_NAME: &str = "leader-port";

/// Identity of the Zookeeper object the children are built for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildContext {
    /// Namespace of the Zookeeper object; children live in the same namespace
    pub namespace: String,
    /// Name of the Zookeeper object
    pub ensemble: String,
}

impl BuildContext {
    /// Create a build context for the given Zookeeper object
    pub fn new(namespace: impl Into<String>, ensemble: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ensemble: ensemble.into(),
        }
    }

    /// Label selector matching every child of this ensemble
    pub fn ensemble_selector(&self) -> String {
        format!("{}={}", ENSEMBLE_LABEL, self.ensemble)
    }

    fn child_metadata(&self, node_name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(node_name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(BTreeMap::from([
                (ENSEMBLE_LABEL.to_string(), self.ensemble.clone()),
                (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
            ])),
            ..Default::default()
        }
    }
}

/// Pod labels (and selector) for a node
pub fn node_labels(node_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SELECTOR_LABEL.to_string(), node_name.to_string())])
}

/// Build one Deployment per node, in spec order
pub fn build_deployments(config: &EnsembleConfig, ctx: &BuildContext) -> Vec<Deployment> {
    config
        .nodes
        .iter()
        .map(|node| build_deployment(config, node, ctx))
        .collect()
}

/// Build one Service per node, in spec order
pub fn build_services(config: &EnsembleConfig, ctx: &BuildContext) -> Vec<Service> {
    config
        .nodes
        .iter()
        .map(|node| build_service(node, ctx))
        .collect()
}
