//! Deployment builder for a single ensemble node

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector,
    PodSpec, PodTemplateSpec, ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use super::{node_labels, BuildContext, ELECTION_PORT_NAME, FOLLOWER_PORT_NAME};
use crate::ensemble::{EnsembleConfig, ResolvedNode};

const LOG_VOLUME: &str = "logdir";
const DATA_VOLUME: &str = "datadir";

/// Build the Deployment for `node`
///
/// Logs and data are written to host paths, partitioned per namespace and
/// node so that several ensembles can share a host:
/// `<nodeLogDir>/<namespace>/<node>/<pod>` and `<nodeDataDir>/<namespace>/<node>`.
pub fn build_deployment(
    config: &EnsembleConfig,
    node: &ResolvedNode,
    ctx: &BuildContext,
) -> Deployment {
    let labels = node_labels(&node.name);

    let container = Container {
        name: node.name.clone(),
        image: Some(config.image.clone()),
        ports: Some(container_ports(node)),
        env: Some(node_env(config, node)),
        volume_mounts: Some(volume_mounts(config, node)),
        security_context: Some(SecurityContext {
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        resources: Some(resource_limits(config)),
        ..Default::default()
    };

    Deployment {
        metadata: ctx.child_metadata(&node.name),
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
                    volumes: Some(vec![
                        host_volume(LOG_VOLUME, &config.node_log_dir),
                        host_volume(DATA_VOLUME, &config.node_data_dir),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_ports(node: &ResolvedNode) -> Vec<ContainerPort> {
    vec![
        tcp_port(&node.name, node.client_port),
        tcp_port(FOLLOWER_PORT_NAME, node.follower_port),
        tcp_port(ELECTION_PORT_NAME, node.election_port),
    ]
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Environment consumed by the image's entrypoint to render `zoo.cfg`
///
/// `node1..nodeN` carry every member's name (and so its Service DNS name)
/// in spec order, which is how each node learns the full server list.
fn node_env(config: &EnsembleConfig, node: &ResolvedNode) -> Vec<EnvVar> {
    let mut env = vec![
        literal_env("LANG", "en_US.UTF-8"),
        pod_field_env("POD_NAME", "name"),
        pod_field_env("POD_NAMESPACE", "namespace"),
        literal_env("Myid", node.myid.to_string()),
        literal_env("Port", node.client_port.to_string()),
        literal_env("FlowerPort", node.follower_port.to_string()),
        literal_env("LeaderPort", node.election_port.to_string()),
        literal_env("NodeCount", config.nodes.len().to_string()),
    ];

    env.extend(
        config
            .node_names()
            .enumerate()
            .map(|(i, name)| literal_env(format!("node{}", i + 1), name)),
    );

    env
}

fn literal_env(name: impl Into<String>, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn pod_field_env(name: &str, field: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: format!("metadata.{}", field),
            }),
            ..Default::default()
        }),
    }
}

fn host_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some("DirectoryOrCreate".to_string()),
        }),
        ..Default::default()
    }
}

fn volume_mounts(config: &EnsembleConfig, node: &ResolvedNode) -> Vec<VolumeMount> {
    vec![
        VolumeMount {
            name: LOG_VOLUME.to_string(),
            mount_path: config.log_dir.clone(),
            sub_path_expr: Some(format!("$(POD_NAMESPACE)/{}/$(POD_NAME)", node.name)),
            ..Default::default()
        },
        VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: config.data_dir.clone(),
            sub_path_expr: Some(format!("$(POD_NAMESPACE)/{}", node.name)),
            ..Default::default()
        },
    ]
}

fn resource_limits(config: &EnsembleConfig) -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(config.cpu_limit.clone())),
            ("memory".to_string(), Quantity(config.memory_limit.clone())),
        ])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("0".to_string())),
            ("memory".to_string(), Quantity("0".to_string())),
        ])),
        ..Default::default()
    }
}
