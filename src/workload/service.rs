//! Service builder for a single ensemble node

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{node_labels, BuildContext, ELECTION_PORT_NAME, FOLLOWER_PORT_NAME};
use crate::crd::ServiceType;
use crate::ensemble::ResolvedNode;

/// `clusterIP` value requesting a headless Service
pub const HEADLESS_CLUSTER_IP: &str = "None";

/// Build the Service for `node`
///
/// ClusterIP nodes get a headless Service so the node name resolves straight
/// to the pod. NodePort and LoadBalancer nodes leave `clusterIP` unset for the
/// API server to allocate, since those types cannot be headless.
pub fn build_service(node: &ResolvedNode, ctx: &BuildContext) -> Service {
    let cluster_ip = match node.service_type {
        ServiceType::ClusterIP => Some(HEADLESS_CLUSTER_IP.to_string()),
        ServiceType::NodePort | ServiceType::LoadBalancer => None,
    };

    Service {
        metadata: ctx.child_metadata(&node.name),
        spec: Some(ServiceSpec {
            selector: Some(node_labels(&node.name)),
            type_: Some(node.service_type.to_string()),
            cluster_ip,
            ports: Some(vec![
                tcp_port(&node.name, node.client_port),
                tcp_port(FOLLOWER_PORT_NAME, node.follower_port),
                tcp_port(ELECTION_PORT_NAME, node.election_port),
            ]),
            session_affinity: Some("ClientIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn tcp_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}
