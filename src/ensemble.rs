//! Default filling for Zookeeper specs
//!
//! Every optional field of a [`ZookeeperSpec`] is resolved here, once, into a
//! fully populated [`EnsembleConfig`]. The resource builders only ever see
//! resolved values and never check for unset fields themselves.

use tracing::warn;

use crate::crd::{ServiceType, ZookeeperNode, ZookeeperSpec};
use crate::Error;

/// Default log directory inside the container
pub const DEFAULT_LOG_DIR: &str = "/logs";
/// Default data directory inside the container
pub const DEFAULT_DATA_DIR: &str = "/data";
/// Default host directory backing the log volume
pub const DEFAULT_NODE_LOG_DIR: &str = "/opt/logs";
/// Default host directory backing the data volume
pub const DEFAULT_NODE_DATA_DIR: &str = "/opt/data";
/// Default CPU limit per node
pub const DEFAULT_CPU_LIMIT: &str = "1000m";
/// Default memory limit per node
pub const DEFAULT_MEMORY_LIMIT: &str = "2G";
/// Default client port
pub const DEFAULT_CLIENT_PORT: i32 = 2181;
/// Default follower (quorum) port
pub const DEFAULT_FOLLOWER_PORT: i32 = 2888;
/// Default leader election port
pub const DEFAULT_ELECTION_PORT: i32 = 3888;

/// A node with every port and exposure setting resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedNode {
    /// Node name
    pub name: String,
    /// Zookeeper server id
    pub myid: u32,
    /// Client port
    pub client_port: i32,
    /// Follower (quorum) port
    pub follower_port: i32,
    /// Leader election port
    pub election_port: i32,
    /// Service exposure mode
    pub service_type: ServiceType,
}

impl ResolvedNode {
    fn resolve(node: &ZookeeperNode) -> Self {
        Self {
            name: node.name.clone(),
            myid: node.myid,
            client_port: port_or(node.port, DEFAULT_CLIENT_PORT),
            follower_port: port_or(node.flower_port, DEFAULT_FOLLOWER_PORT),
            election_port: port_or(node.leader_port, DEFAULT_ELECTION_PORT),
            service_type: node.service_type.unwrap_or_default(),
        }
    }
}

/// A validated ensemble with every default applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnsembleConfig {
    /// Container image for every node
    pub image: String,
    /// Nodes in spec order
    pub nodes: Vec<ResolvedNode>,
    /// Log directory inside the container
    pub log_dir: String,
    /// Data directory inside the container
    pub data_dir: String,
    /// Host directory backing the log volume
    pub node_log_dir: String,
    /// Host directory backing the data volume
    pub node_data_dir: String,
    /// CPU limit per node
    pub cpu_limit: String,
    /// Memory limit per node
    pub memory_limit: String,
}

impl EnsembleConfig {
    /// Validate `spec` and fill in every default
    ///
    /// Duplicate `myid` values are logged and passed through unchanged.
    pub fn resolve(spec: &ZookeeperSpec) -> Result<Self, Error> {
        spec.validate()?;

        for (myid, nodes) in spec.duplicate_myids() {
            warn!(myid, nodes = ?nodes, "multiple nodes share a myid");
        }

        Ok(Self {
            image: spec.image.clone(),
            nodes: spec.node_list.iter().map(ResolvedNode::resolve).collect(),
            log_dir: string_or(&spec.log_dir, DEFAULT_LOG_DIR),
            data_dir: string_or(&spec.data_dir, DEFAULT_DATA_DIR),
            node_log_dir: string_or(&spec.node_log_dir, DEFAULT_NODE_LOG_DIR),
            node_data_dir: string_or(&spec.node_data_dir, DEFAULT_NODE_DATA_DIR),
            cpu_limit: string_or(&spec.cpu, DEFAULT_CPU_LIMIT),
            memory_limit: string_or(&spec.memory, DEFAULT_MEMORY_LIMIT),
        })
    }

    /// Node names in spec order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }
}

fn port_or(port: i32, default: i32) -> i32 {
    if port > 0 {
        port
    } else {
        default
    }
}

// Empty strings count as unset, same as a missing field.
fn string_or(value: &Option<String>, default: &str) -> String {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}
