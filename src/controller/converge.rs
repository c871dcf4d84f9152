//! Create-or-update of child resources
//!
//! [`converge`] is generic over [`ChildResource`], which binds a kind to its
//! diff table and to the matching [`KubeClient`] methods. Deployments and
//! Services run through the same code path.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use super::client::KubeClient;
use super::diff::{changed_fields, SignificantFields};
use super::ownership::attach_ownership_link;
use crate::Error;

/// A kind of object the controller creates for each ensemble node
#[async_trait]
pub trait ChildResource:
    SignificantFields + Resource<DynamicType = ()> + Clone + Send + Sync
{
    /// Kind name used in logs
    const KIND: &'static str;

    /// Merge `desired` onto `live` for a replace call
    ///
    /// The result carries live metadata (including `resourceVersion`) with
    /// the desired labels laid over it, and desired spec with any
    /// store-assigned spec fields kept from `live`.
    fn adopt_live(desired: Self, live: Self) -> Self;

    /// Fetch by name
    async fn fetch(kube: &dyn KubeClient, namespace: &str, name: &str)
        -> Result<Option<Self>, Error>;

    /// Create
    async fn create(kube: &dyn KubeClient, obj: &Self) -> Result<(), Error>;

    /// Replace
    async fn replace(kube: &dyn KubeClient, obj: &Self) -> Result<(), Error>;

    /// List by label selector
    async fn list(
        kube: &dyn KubeClient,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Self>, Error>;

    /// Delete by name
    async fn delete(kube: &dyn KubeClient, namespace: &str, name: &str) -> Result<(), Error>;
}

#[async_trait]
impl ChildResource for Deployment {
    const KIND: &'static str = "Deployment";

    fn adopt_live(desired: Self, mut live: Self) -> Self {
        merge_labels(&desired.metadata, &mut live.metadata);
        live.spec = desired.spec;
        live
    }

    async fn fetch(
        kube: &dyn KubeClient,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Self>, Error> {
        kube.get_deployment(namespace, name).await
    }

    async fn create(kube: &dyn KubeClient, obj: &Self) -> Result<(), Error> {
        kube.create_deployment(obj).await
    }

    async fn replace(kube: &dyn KubeClient, obj: &Self) -> Result<(), Error> {
        kube.replace_deployment(obj).await
    }

    async fn list(
        kube: &dyn KubeClient,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Self>, Error> {
        kube.list_deployments(namespace, label_selector).await
    }

    async fn delete(kube: &dyn KubeClient, namespace: &str, name: &str) -> Result<(), Error> {
        kube.delete_deployment(namespace, name).await
    }
}

#[async_trait]
impl ChildResource for Service {
    const KIND: &'static str = "Service";

    /// Keeps the live address allocation and IP family settings. Node ports
    /// are kept only while the desired type still exposes them.
    fn adopt_live(desired: Self, mut live: Self) -> Self {
        merge_labels(&desired.metadata, &mut live.metadata);
        let mut spec = desired.spec.unwrap_or_default();

        if let Some(current) = live.spec.take() {
            spec.cluster_ip = current.cluster_ip;
            spec.cluster_ips = current.cluster_ips;
            spec.ip_families = current.ip_families;
            spec.ip_family_policy = current.ip_family_policy;

            let node_ports = matches!(
                spec.type_.as_deref(),
                Some("NodePort") | Some("LoadBalancer")
            );
            if spec.type_.as_deref() == Some("LoadBalancer") {
                spec.health_check_node_port = current.health_check_node_port;
            }
            let live_ports = current.ports.unwrap_or_default();
            for port in spec.ports.iter_mut().flatten() {
                if node_ports && port.node_port.is_none() {
                    port.node_port = live_ports
                        .iter()
                        .find(|p| p.name == port.name)
                        .and_then(|p| p.node_port);
                }
            }
        }

        live.spec = Some(spec);
        live
    }

    async fn fetch(
        kube: &dyn KubeClient,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Self>, Error> {
        kube.get_service(namespace, name).await
    }

    async fn create(kube: &dyn KubeClient, obj: &Self) -> Result<(), Error> {
        kube.create_service(obj).await
    }

    async fn replace(kube: &dyn KubeClient, obj: &Self) -> Result<(), Error> {
        kube.replace_service(obj).await
    }

    async fn list(
        kube: &dyn KubeClient,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Self>, Error> {
        kube.list_services(namespace, label_selector).await
    }

    async fn delete(kube: &dyn KubeClient, namespace: &str, name: &str) -> Result<(), Error> {
        kube.delete_service(namespace, name).await
    }
}

/// Lay the desired labels over the live ones, keeping labels set by others
fn merge_labels(desired: &ObjectMeta, live: &mut ObjectMeta) {
    if let Some(labels) = &desired.labels {
        live.labels
            .get_or_insert_with(Default::default)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Counts of what a converge pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConvergeReport {
    /// Objects that did not exist and were created
    pub created: usize,
    /// Objects whose significant fields had drifted and were replaced
    pub updated: usize,
    /// Objects already matching their desired state
    pub unchanged: usize,
}

/// Make every object in `desired` exist and match on its significant fields
///
/// Each object gets `owner` as its controller before it is written.
/// Processing stops at the first store error, leaving later objects for the
/// next pass.
pub async fn converge<K: ChildResource>(
    kube: &dyn KubeClient,
    owner: &OwnerReference,
    desired: Vec<K>,
) -> Result<ConvergeReport, Error> {
    let mut report = ConvergeReport::default();

    for mut obj in desired {
        attach_ownership_link(obj.meta_mut(), owner);
        let name = obj.name_any();
        let namespace = obj.namespace().ok_or_else(|| {
            Error::missing_metadata(format!("{} {} has no namespace", K::KIND, name))
        })?;

        match K::fetch(kube, &namespace, &name).await? {
            None => {
                info!(kind = K::KIND, %name, "creating");
                K::create(kube, &obj).await?;
                report.created += 1;
            }
            Some(live) => {
                let changed = changed_fields(&obj, &live);
                if changed.is_empty() {
                    debug!(kind = K::KIND, %name, "up to date");
                    report.unchanged += 1;
                    continue;
                }

                let mut merged = K::adopt_live(obj, live.clone());
                attach_ownership_link(merged.meta_mut(), owner);

                // Drift confined to store-managed fields cannot be written.
                let applicable = changed_fields(&merged, &live);
                if applicable.is_empty() {
                    warn!(
                        kind = K::KIND,
                        %name,
                        fields = ?changed,
                        "drift is on immutable fields; delete the object to apply it"
                    );
                    report.unchanged += 1;
                    continue;
                }

                info!(kind = K::KIND, %name, fields = ?applicable, "updating");
                K::replace(kube, &merged).await?;
                report.updated += 1;
            }
        }
    }

    Ok(report)
}
