//! Kubernetes access used by the Zookeeper controller
//!
//! Everything the reconciler reads from or writes to the cluster goes
//! through [`KubeClient`], so the whole reconcile pass can run against a
//! mock or an in-memory store in tests.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::crd::Zookeeper;
use crate::Error;

/// Trait abstracting Kubernetes client operations for Zookeeper ensembles
///
/// Writes use replace semantics: the object passed in must carry the
/// `resourceVersion` it was read at, and a stale version surfaces as a
/// conflict error rather than silently overwriting a concurrent change.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a Zookeeper object, `None` if it does not exist
    async fn get_zookeeper(&self, namespace: &str, name: &str)
        -> Result<Option<Zookeeper>, Error>;

    /// Persist a Zookeeper object's metadata and spec, returning the stored object
    async fn replace_zookeeper(&self, zookeeper: &Zookeeper) -> Result<Zookeeper, Error>;

    /// Fetch a Deployment, `None` if it does not exist
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Replace an existing Deployment
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// List Deployments in `namespace` matching `label_selector`
    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, Error>;

    /// Delete a Deployment; deleting one that is already gone succeeds
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch a Service, `None` if it does not exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<(), Error>;

    /// Replace an existing Service
    async fn replace_service(&self, service: &Service) -> Result<(), Error>;

    /// List Services in `namespace` matching `label_selector`
    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, Error>;

    /// Delete a Service; deleting one that is already gone succeeds
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: NamespacedObject,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: NamespacedObject,
    {
        let namespace = namespace_of(obj)?;
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await?;
        Ok(())
    }

    async fn replace<K>(&self, obj: &K) -> Result<K, Error>
    where
        K: NamespacedObject,
    {
        let namespace = namespace_of(obj)?;
        let name = obj.name_any();
        Ok(self
            .api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn list<K>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, Error>
    where
        K: NamespacedObject,
    {
        let params = ListParams::default().labels(label_selector);
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: NamespacedObject,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Bounds shared by every namespaced object the client reads and writes
trait NamespacedObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
{
}

impl<K> NamespacedObject for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
{
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.namespace().ok_or_else(|| {
        Error::missing_metadata(format!(
            "{} {} has no namespace",
            std::any::type_name::<K>(),
            obj.name_any()
        ))
    })
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_zookeeper(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Zookeeper>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn replace_zookeeper(&self, zookeeper: &Zookeeper) -> Result<Zookeeper, Error> {
        self.replace(zookeeper).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.create(deployment).await
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.replace(deployment).await.map(|_| ())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, Error> {
        self.list(namespace, label_selector).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Deployment>(namespace, name).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        self.get_opt(namespace, name).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        self.create(service).await
    }

    async fn replace_service(&self, service: &Service) -> Result<(), Error> {
        self.replace(service).await.map(|_| ())
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, Error> {
        self.list(namespace, label_selector).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.delete::<Service>(namespace, name).await
    }
}
