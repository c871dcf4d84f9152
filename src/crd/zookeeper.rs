//! Zookeeper Custom Resource Definition
//!
//! A Zookeeper object describes a whole ensemble as an ordered list of named
//! nodes. Each node becomes one Deployment and one Service, both named after
//! the node. Field names on the wire match the schema that existing clusters
//! already store, which is why a few of them are not camelCase.

use std::collections::{BTreeMap, BTreeSet};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::validate_node_name;

/// How a node's Service is exposed
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceType {
    /// Reachable from inside the cluster only
    #[default]
    ClusterIP,
    /// Exposed on a port of every node
    NodePort,
    /// Exposed through a cloud load balancer
    LoadBalancer,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClusterIP => write!(f, "ClusterIP"),
            Self::NodePort => write!(f, "NodePort"),
            Self::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

/// One ensemble member
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ZookeeperNode {
    /// Node name; also the name of the node's Deployment and Service
    pub name: String,

    /// Client port (0 means the default client port)
    #[serde(default)]
    pub port: i32,

    /// Zookeeper server id written to the node's `myid`
    pub myid: u32,

    /// Service exposure mode (defaults to ClusterIP)
    #[serde(
        rename = "ServiceType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_type: Option<ServiceType>,

    /// Follower (quorum) port (0 means the default follower port)
    #[serde(rename = "flowerPort", default)]
    pub flower_port: i32,

    /// Leader election port (0 means the default election port)
    #[serde(rename = "leaderPort", default)]
    pub leader_port: i32,
}

/// Specification for a Zookeeper ensemble
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.handpay.cn",
    version = "v1",
    kind = "Zookeeper",
    plural = "zookeepers",
    shortname = "zk",
    namespaced,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.image"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ZookeeperSpec {
    /// Container image for every node
    pub image: String,

    /// Ensemble members, in order
    #[serde(rename = "nodeList")]
    pub node_list: Vec<ZookeeperNode>,

    /// Log directory inside the container
    #[serde(rename = "logDir", default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Data directory inside the container
    #[serde(rename = "dataDir", default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Host directory backing the log volume
    #[serde(
        rename = "nodeLogDir",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_log_dir: Option<String>,

    /// Host directory backing the data volume
    #[serde(
        rename = "nodeDataDir",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_data_dir: Option<String>,

    /// CPU limit per node (e.g. "1000m")
    #[serde(rename = "CPU", default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    /// Memory limit per node (e.g. "2G")
    #[serde(rename = "Memory", default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ZookeeperSpec {
    /// Validate the ensemble specification
    ///
    /// Node names are resource identity, so they must be unique and usable as
    /// both object names and port names. Duplicate `myid` values are not
    /// rejected here; see [`ZookeeperSpec::duplicate_myids`].
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.image.trim().is_empty() {
            return Err(crate::Error::validation("image must not be empty"));
        }

        let mut seen = BTreeSet::new();
        for node in &self.node_list {
            validate_node_name(&node.name).map_err(crate::Error::validation)?;
            if !seen.insert(node.name.as_str()) {
                return Err(crate::Error::validation(format!(
                    "duplicate node name '{}' in nodeList",
                    node.name
                )));
            }
        }

        Ok(())
    }

    /// `myid` values claimed by more than one node, with the claiming nodes
    pub fn duplicate_myids(&self) -> BTreeMap<u32, Vec<String>> {
        let mut by_id: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for node in &self.node_list {
            by_id.entry(node.myid).or_default().push(node.name.clone());
        }
        by_id.retain(|_, names| names.len() > 1);
        by_id
    }
}
