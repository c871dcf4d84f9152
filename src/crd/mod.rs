//! Custom Resource Definitions for the Zookeeper operator

mod zookeeper;

pub use zookeeper::{ServiceType, Zookeeper, ZookeeperNode, ZookeeperSpec};

use kube::CustomResourceExt;

use crate::Error;

/// Render the Zookeeper CustomResourceDefinition as YAML
pub fn crd_manifest() -> Result<String, Error> {
    serde_yaml::to_string(&Zookeeper::crd())
        .map_err(|e| Error::serialization(format!("failed to serialize CRD: {}", e)))
}

/// Maximum length of a node name
///
/// Node names double as container and service port names, which Kubernetes
/// caps at 15 characters.
pub const MAX_NODE_NAME_LEN: usize = 15;

/// Validate a node name.
///
/// Rules:
/// - Must not be empty or longer than [`MAX_NODE_NAME_LEN`]
/// - Must start with a lowercase letter
/// - May contain lowercase letters, digits, and hyphens
/// - Must not end with a hyphen or contain two hyphens in a row
pub(crate) fn validate_node_name(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("node name cannot be empty".to_string());
    }

    if s.len() > MAX_NODE_NAME_LEN {
        return Err(format!(
            "node name '{}' is longer than {} characters",
            s, MAX_NODE_NAME_LEN
        ));
    }

    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return Err(format!("node name must start with lowercase letter: {}", s)),
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return Err(format!(
                "node name must be lowercase alphanumeric with hyphens: {}",
                s
            ));
        }
    }

    if s.ends_with('-') {
        return Err(format!("node name cannot end with hyphen: {}", s));
    }

    // Node names double as port names, which forbid consecutive hyphens.
    if s.contains("--") {
        return Err(format!("node name cannot contain consecutive hyphens: {}", s));
    }

    Ok(())
}
