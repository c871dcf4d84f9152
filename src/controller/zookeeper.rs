//! Zookeeper controller implementation
//!
//! One reconcile pass for a Zookeeper object:
//! 1. fetch it; a missing object is a no-op
//! 2. settle its lifecycle metadata, or finish deletion and stop
//! 3. resolve the spec and build one Deployment and Service per node
//! 4. converge Services, then Deployments
//! 5. delete children of nodes that were removed from the spec
//!
//! Every pass recomputes the full desired state, so reprocessing an object
//! after a partial failure is always safe.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::client::{KubeClient, KubeClientImpl};
use super::converge::{converge, ConvergeReport};
use super::lifecycle::{ensure_lifecycle, ExternalResources, LifecycleOutcome, NoExternalResources};
use super::ownership::owner_reference;
use super::prune::prune_removed;
use crate::crd::Zookeeper;
use crate::ensemble::EnsembleConfig;
use crate::workload::{build_deployments, build_services, BuildContext};
use crate::Error;

/// Default delay before a failed reconcile is retried
pub const DEFAULT_ERROR_REQUEUE: Duration = Duration::from_secs(15);

/// Tunables for the controller loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Delay before retrying an object whose reconcile failed with a
    /// retryable error
    pub error_requeue: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            error_requeue: DEFAULT_ERROR_REQUEUE,
        }
    }
}

/// Controller context shared by every reconcile call
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Cleanup hook run before a Zookeeper object is allowed to go away
    pub external: Arc<dyn ExternalResources>,
    /// Loop tunables
    pub settings: ControllerSettings,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a new controller context with the given Kubernetes client
    ///
    /// Equivalent to `Context::builder(client).build()`.
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Create a context for testing with custom clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, external: Arc<dyn ExternalResources>) -> Self {
        Self {
            kube,
            external,
            settings: ControllerSettings::default(),
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    external: Option<Arc<dyn ExternalResources>>,
    settings: ControllerSettings,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            external: None,
            settings: ControllerSettings::default(),
        }
    }

    /// Set the loop tunables
    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the external cleanup hook
    pub fn external_resources(mut self, external: Arc<dyn ExternalResources>) -> Self {
        self.external = Some(external);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            external: self
                .external
                .unwrap_or_else(|| Arc::new(NoExternalResources)),
            settings: self.settings,
        }
    }
}

/// What a reconcile pass did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object no longer exists
    NotFound,
    /// Deletion cleanup ran and the finalizer was removed
    Finalized,
    /// The object is being deleted and holds none of our finalizer
    Terminating,
    /// Children were converged
    Converged {
        /// Service convergence counts
        services: ConvergeReport,
        /// Deployment convergence counts
        deployments: ConvergeReport,
        /// Children deleted because their node left the spec
        pruned: usize,
    },
}

/// Run one reconcile pass for the Zookeeper object `namespace/name`
///
/// The object is always read fresh from the store rather than trusted from
/// the watch cache, since lifecycle writes need its latest resourceVersion.
pub async fn reconcile_zookeeper(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<ReconcileOutcome, Error> {
    let kube = ctx.kube.as_ref();

    let Some(zookeeper) = kube.get_zookeeper(namespace, name).await? else {
        debug!("zookeeper not found; nothing to do");
        return Ok(ReconcileOutcome::NotFound);
    };

    let zookeeper = match ensure_lifecycle(kube, ctx.external.as_ref(), zookeeper).await? {
        LifecycleOutcome::Active(zk) => *zk,
        LifecycleOutcome::Finalized => return Ok(ReconcileOutcome::Finalized),
        LifecycleOutcome::Terminating => return Ok(ReconcileOutcome::Terminating),
    };

    let config = EnsembleConfig::resolve(&zookeeper.spec)?;
    let build = BuildContext::new(namespace, name);
    let owner = owner_reference(&zookeeper)?;

    let services = converge(kube, &owner, build_services(&config, &build)).await?;
    let deployments = converge(kube, &owner, build_deployments(&config, &build)).await?;

    let keep: BTreeSet<String> = config.node_names().map(str::to_string).collect();
    let pruned = prune_removed::<Deployment>(kube, &build, &owner.uid, &keep).await?
        + prune_removed::<Service>(kube, &build, &owner.uid, &keep).await?;

    info!(
        nodes = config.nodes.len(),
        services_created = services.created,
        services_updated = services.updated,
        deployments_created = deployments.created,
        deployments_updated = deployments.updated,
        pruned,
        "ensemble converged"
    );

    Ok(ReconcileOutcome::Converged {
        services,
        deployments,
        pruned,
    })
}

/// Reconcile a Zookeeper object
///
/// Entry point for the kube-runtime controller. Children are watched
/// through `owns`, so a successful pass waits for the next change instead of
/// polling.
#[instrument(skip(zookeeper, ctx), fields(zookeeper = %zookeeper.name_any()))]
pub async fn reconcile(zookeeper: Arc<Zookeeper>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = zookeeper.name_any();
    let namespace = zookeeper.namespace().ok_or_else(|| {
        Error::missing_metadata(format!("Zookeeper {} has no namespace", name))
    })?;

    let outcome = reconcile_zookeeper(&ctx, &namespace, &name).await?;
    debug!(?outcome, "reconcile finished");

    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Store and cleanup errors requeue after the configured delay. Anything
/// else needs the object to be edited first, so it waits for a change.
pub fn error_policy(zookeeper: Arc<Zookeeper>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            %error,
            zookeeper = %zookeeper.name_any(),
            conflict = error.is_conflict(),
            "reconciliation failed; will retry"
        );
        Action::requeue(ctx.settings.error_requeue)
    } else {
        error!(
            %error,
            zookeeper = %zookeeper.name_any(),
            "reconciliation failed; waiting for spec change"
        );
        Action::await_change()
    }
}
