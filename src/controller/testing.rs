//! In-memory object store for controller tests
//!
//! [`FakeKube`] behaves like the parts of the API server the controller
//! relies on: it assigns uids and resource versions, rejects replaces made
//! from a stale read with 409, allocates Service addresses, and deletes a
//! Zookeeper once it is marked for deletion and has no finalizers left.
//! Every write is recorded so tests can assert on exactly what was mutated.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;

use super::client::KubeClient;
use crate::crd::Zookeeper;
use crate::Error;

type Key = (String, String);

/// Kind of store write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    ReplaceZookeeper,
    CreateDeployment,
    ReplaceDeployment,
    DeleteDeployment,
    CreateService,
    ReplaceService,
    DeleteService,
}

/// One recorded write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub op: Op,
    pub name: String,
}

#[derive(Default)]
struct State {
    zookeepers: BTreeMap<Key, Zookeeper>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    next_id: u64,
    mutations: Vec<Mutation>,
    failures: Vec<(Op, u16)>,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn stamp_new(&mut self, meta: &mut ObjectMeta) {
        let id = self.next();
        meta.uid = Some(format!("uid-{}", id));
        meta.resource_version = Some(id.to_string());
        meta.creation_timestamp = Some(now());
    }

    fn take_failure(&mut self, op: Op) -> Result<(), Error> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(i) => {
                let (_, code) = self.failures.remove(i);
                Err(api_error(code, "Injected"))
            }
            None => Ok(()),
        }
    }

    fn record(&mut self, op: Op, name: &str) {
        self.mutations.push(Mutation {
            op,
            name: name.to_string(),
        });
    }
}

fn now() -> Time {
    Time(k8s_openapi::chrono::Utc::now())
}

/// Build an API error response like the one the API server returns
pub fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}

fn key_of(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn matches_selector(meta: &ObjectMeta, namespace: &str, selector: &str) -> bool {
    if meta.namespace.as_deref() != Some(namespace) {
        return false;
    }
    let labels = meta.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

/// Reject a write made from a stale read
fn check_version(incoming: &ObjectMeta, stored: &ObjectMeta) -> Result<(), Error> {
    if incoming.resource_version != stored.resource_version {
        return Err(api_error(409, "Conflict"));
    }
    Ok(())
}

/// Reject metadata naming more than one controller
fn check_single_controller(meta: &ObjectMeta) -> Result<(), Error> {
    let controllers = meta
        .owner_references
        .iter()
        .flatten()
        .filter(|r| r.controller == Some(true))
        .count();
    if controllers > 1 {
        return Err(api_error(422, "Invalid"));
    }
    Ok(())
}

/// Fill in node ports for types that expose them, and reject node ports on
/// types that do not
fn allocate_node_ports(spec: &mut ServiceSpec, id: u64) -> Result<(), Error> {
    if matches!(spec.type_.as_deref(), Some("NodePort") | Some("LoadBalancer")) {
        for (i, port) in spec.ports.iter_mut().flatten().enumerate() {
            port.node_port
                .get_or_insert(30000 + (id as i32 % 1000) * 3 + i as i32);
        }
    } else if spec.ports.iter().flatten().any(|p| p.node_port.is_some()) {
        return Err(api_error(422, "Invalid"));
    }
    Ok(())
}

/// In-memory [`KubeClient`]
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<State>,
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake store lock")
    }

    /// Store a Zookeeper as if a user had created it; returns the stored copy
    pub fn insert_zookeeper(&self, mut zk: Zookeeper) -> Zookeeper {
        let mut state = self.lock();
        state.stamp_new(&mut zk.metadata);
        state.zookeepers.insert(key_of(&zk.metadata), zk.clone());
        zk
    }

    /// Simulate a user deleting the Zookeeper
    ///
    /// With finalizers present the object only gets a deletion timestamp.
    pub fn request_deletion(&self, namespace: &str, name: &str) {
        let mut state = self.lock();
        let k = key(namespace, name);
        let remove = match state.zookeepers.get_mut(&k) {
            Some(zk) if zk.finalizers().is_empty() => true,
            Some(zk) => {
                zk.metadata.deletion_timestamp = Some(now());
                false
            }
            None => false,
        };
        if remove {
            state.zookeepers.remove(&k);
        }
    }

    /// Store a Service directly, bypassing mutation tracking
    pub fn seed_service(&self, mut s: Service) {
        let mut state = self.lock();
        state.stamp_new(&mut s.metadata);
        state.services.insert(key_of(&s.metadata), s);
    }

    /// Edit a stored Deployment in place, as another writer would
    pub fn edit_deployment(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Deployment)) {
        let mut state = self.lock();
        let id = state.next();
        if let Some(d) = state.deployments.get_mut(&key(namespace, name)) {
            f(d);
            d.metadata.resource_version = Some(id.to_string());
        }
    }

    /// Edit a stored Service in place, as another writer would
    pub fn edit_service(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Service)) {
        let mut state = self.lock();
        let id = state.next();
        if let Some(s) = state.services.get_mut(&key(namespace, name)) {
            f(s);
            s.metadata.resource_version = Some(id.to_string());
        }
    }

    pub fn zookeeper(&self, namespace: &str, name: &str) -> Option<Zookeeper> {
        self.lock().zookeepers.get(&key(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(&key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&key(namespace, name)).cloned()
    }

    pub fn deployment_names(&self) -> Vec<String> {
        self.lock().deployments.keys().map(|(_, n)| n.clone()).collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.lock().services.keys().map(|(_, n)| n.clone()).collect()
    }

    /// Writes recorded since the last [`FakeKube::clear_mutations`]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn mutation_count(&self, op: Op) -> usize {
        self.lock().mutations.iter().filter(|m| m.op == op).count()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Make the next `op` fail with an API error carrying `code`
    pub fn fail_next(&self, op: Op, code: u16) {
        self.lock().failures.push((op, code));
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_zookeeper(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Zookeeper>, Error> {
        Ok(self.zookeeper(namespace, name))
    }

    async fn replace_zookeeper(&self, zookeeper: &Zookeeper) -> Result<Zookeeper, Error> {
        let mut state = self.lock();
        state.take_failure(Op::ReplaceZookeeper)?;
        let k = key_of(&zookeeper.metadata);
        let stored = state
            .zookeepers
            .get(&k)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        check_version(&zookeeper.metadata, &stored.metadata)?;
        check_single_controller(&zookeeper.metadata)?;

        let mut next = zookeeper.clone();
        next.metadata.uid = stored.metadata.uid.clone();
        next.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        next.metadata.resource_version = Some(state.next().to_string());
        state.record(Op::ReplaceZookeeper, &k.1);

        if next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty() {
            state.zookeepers.remove(&k);
        } else {
            state.zookeepers.insert(k, next.clone());
        }
        Ok(next)
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.deployment(namespace, name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        let mut state = self.lock();
        state.take_failure(Op::CreateDeployment)?;
        let k = key_of(&deployment.metadata);
        if state.deployments.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut d = deployment.clone();
        state.stamp_new(&mut d.metadata);
        state.record(Op::CreateDeployment, &k.1);
        state.deployments.insert(k, d);
        Ok(())
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        let mut state = self.lock();
        state.take_failure(Op::ReplaceDeployment)?;
        let k = key_of(&deployment.metadata);
        let stored = state
            .deployments
            .get(&k)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        check_version(&deployment.metadata, &stored.metadata)?;

        let mut next = deployment.clone();
        next.metadata.uid = stored.metadata.uid.clone();
        next.status = stored.status.clone();
        next.metadata.resource_version = Some(state.next().to_string());
        state.record(Op::ReplaceDeployment, &k.1);
        state.deployments.insert(k, next);
        Ok(())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>, Error> {
        Ok(self
            .lock()
            .deployments
            .values()
            .filter(|d| matches_selector(&d.metadata, namespace, label_selector))
            .cloned()
            .collect())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        state.take_failure(Op::DeleteDeployment)?;
        if state.deployments.remove(&key(namespace, name)).is_some() {
            state.record(Op::DeleteDeployment, name);
        }
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        Ok(self.service(namespace, name))
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        let mut state = self.lock();
        state.take_failure(Op::CreateService)?;
        let k = key_of(&service.metadata);
        if state.services.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut s = service.clone();
        state.stamp_new(&mut s.metadata);

        let id = state.next();
        let spec = s.spec.get_or_insert_with(Default::default);
        if spec.cluster_ip.is_none() {
            let ip = format!("10.96.0.{}", id % 250);
            spec.cluster_ip = Some(ip.clone());
            spec.cluster_ips = Some(vec![ip]);
        }
        allocate_node_ports(spec, id)?;

        state.record(Op::CreateService, &k.1);
        state.services.insert(k, s);
        Ok(())
    }

    async fn replace_service(&self, service: &Service) -> Result<(), Error> {
        let mut state = self.lock();
        state.take_failure(Op::ReplaceService)?;
        let k = key_of(&service.metadata);
        let stored = state
            .services
            .get(&k)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        check_version(&service.metadata, &stored.metadata)?;

        let stored_ip = stored.spec.as_ref().and_then(|s| s.cluster_ip.clone());
        let incoming_ip = service.spec.as_ref().and_then(|s| s.cluster_ip.clone());
        if stored_ip.is_some() && incoming_ip != stored_ip {
            return Err(api_error(422, "Invalid"));
        }

        let mut next = service.clone();
        next.metadata.uid = stored.metadata.uid.clone();
        let id = state.next();
        next.metadata.resource_version = Some(id.to_string());
        allocate_node_ports(next.spec.get_or_insert_with(Default::default), id)?;
        state.record(Op::ReplaceService, &k.1);
        state.services.insert(k, next);
        Ok(())
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Service>, Error> {
        Ok(self
            .lock()
            .services
            .values()
            .filter(|s| matches_selector(&s.metadata, namespace, label_selector))
            .cloned()
            .collect())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        state.take_failure(Op::DeleteService)?;
        if state.services.remove(&key(namespace, name)).is_some() {
            state.record(Op::DeleteService, name);
        }
        Ok(())
    }
}
