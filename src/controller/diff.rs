//! Selective comparison of desired and live child resources
//!
//! The API server fills in defaults, status, and bookkeeping metadata on
//! everything it stores, so a desired object never equals its live copy.
//! Each kind instead declares the fields this controller owns as a table of
//! [`FieldRule`]s, and an object counts as drifted only when one of those
//! rules reports a difference. Anything not in a table is ignored.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// One significant field of a resource kind
pub struct FieldRule<T> {
    /// Field path used in logs
    pub name: &'static str,
    /// Whether `desired` and `live` disagree on this field
    pub differs: fn(desired: &T, live: &T) -> bool,
}

/// Kinds whose drift is judged by a fixed table of fields
pub trait SignificantFields: Sized + 'static {
    /// Fields that trigger an update when they differ
    fn field_rules() -> &'static [FieldRule<Self>];
}

/// Names of the significant fields that differ between `desired` and `live`
pub fn changed_fields<T: SignificantFields>(desired: &T, live: &T) -> Vec<&'static str> {
    T::field_rules()
        .iter()
        .filter(|rule| (rule.differs)(desired, live))
        .map(|rule| rule.name)
        .collect()
}

/// Whether any significant field differs
pub fn is_changed<T: SignificantFields>(desired: &T, live: &T) -> bool {
    T::field_rules()
        .iter()
        .any(|rule| (rule.differs)(desired, live))
}

/// Whether a label the controller sets is absent or different on `live`
///
/// Extra labels on the live object are not drift.
fn labels_missing(desired: &ObjectMeta, live: &ObjectMeta) -> bool {
    let live_labels = live.labels.as_ref();
    desired
        .labels
        .iter()
        .flatten()
        .any(|(k, v)| live_labels.and_then(|l| l.get(k)) != Some(v))
}

// Deployments: only the first container and the pod volumes are compared.

fn pod_spec(d: &Deployment) -> Option<&PodSpec> {
    d.spec.as_ref()?.template.spec.as_ref()
}

fn first_container(d: &Deployment) -> Option<&Container> {
    pod_spec(d)?.containers.first()
}

static DEPLOYMENT_RULES: [FieldRule<Deployment>; 6] = [
    FieldRule {
        name: "spec.template.spec.volumes",
        differs: |desired, live| {
            pod_spec(desired).and_then(|p| p.volumes.as_ref())
                != pod_spec(live).and_then(|p| p.volumes.as_ref())
        },
    },
    FieldRule {
        name: "spec.template.spec.containers[0].volumeMounts",
        differs: |desired, live| {
            first_container(desired).and_then(|c| c.volume_mounts.as_ref())
                != first_container(live).and_then(|c| c.volume_mounts.as_ref())
        },
    },
    FieldRule {
        name: "spec.template.spec.containers[0].env",
        differs: |desired, live| {
            first_container(desired).and_then(|c| c.env.as_ref())
                != first_container(live).and_then(|c| c.env.as_ref())
        },
    },
    FieldRule {
        name: "spec.template.spec.containers[0].image",
        differs: |desired, live| {
            first_container(desired).and_then(|c| c.image.as_ref())
                != first_container(live).and_then(|c| c.image.as_ref())
        },
    },
    FieldRule {
        name: "spec.template.spec.containers[0].ports",
        differs: |desired, live| {
            first_container(desired).and_then(|c| c.ports.as_ref())
                != first_container(live).and_then(|c| c.ports.as_ref())
        },
    },
    FieldRule {
        name: "metadata.labels",
        differs: |desired, live| labels_missing(&desired.metadata, &live.metadata),
    },
];

impl SignificantFields for Deployment {
    fn field_rules() -> &'static [FieldRule<Self>] {
        &DEPLOYMENT_RULES
    }
}

// Services

fn service_spec(s: &Service) -> Option<&ServiceSpec> {
    s.spec.as_ref()
}

/// The parts of a port this controller sets; `nodePort` is store-assigned.
fn port_identity(p: &ServicePort) -> (Option<&str>, i32, Option<&IntOrString>, Option<&str>) {
    (
        p.name.as_deref(),
        p.port,
        p.target_port.as_ref(),
        p.protocol.as_deref(),
    )
}

fn ports_of(s: &Service) -> Vec<(Option<&str>, i32, Option<&IntOrString>, Option<&str>)> {
    service_spec(s)
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| ports.iter().map(port_identity).collect())
        .unwrap_or_default()
}

static SERVICE_RULES: [FieldRule<Service>; 5] = [
    // Only compared when the desired object asks for a specific address;
    // otherwise the store's allocation is accepted.
    FieldRule {
        name: "spec.clusterIP",
        differs: |desired, live| {
            match service_spec(desired).and_then(|s| s.cluster_ip.as_deref()) {
                Some(wanted) => service_spec(live).and_then(|s| s.cluster_ip.as_deref()) != Some(wanted),
                None => false,
            }
        },
    },
    FieldRule {
        name: "spec.selector",
        differs: |desired, live| {
            service_spec(desired).and_then(|s| s.selector.as_ref())
                != service_spec(live).and_then(|s| s.selector.as_ref())
        },
    },
    FieldRule {
        name: "spec.type",
        differs: |desired, live| {
            service_spec(desired).and_then(|s| s.type_.as_deref())
                != service_spec(live).and_then(|s| s.type_.as_deref())
        },
    },
    FieldRule {
        name: "spec.ports",
        differs: |desired, live| ports_of(desired) != ports_of(live),
    },
    FieldRule {
        name: "metadata.labels",
        differs: |desired, live| labels_missing(&desired.metadata, &live.metadata),
    },
];

impl SignificantFields for Service {
    fn field_rules() -> &'static [FieldRule<Self>] {
        &SERVICE_RULES
    }
}
