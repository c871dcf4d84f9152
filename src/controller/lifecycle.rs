//! Finalizer and self-ownership handling for Zookeeper objects
//!
//! Before any children are converged, a Zookeeper object must carry:
//! 1. a controller reference: an ownership link pointing at itself, or one
//!    already placed by another controller
//! 2. the [`FINALIZER`] marker, so deletion waits for external cleanup
//!
//! Each is added with its own replace call, and each call uses the object
//! returned by the previous one, so no write is made from a stale read.
//!
//! Once the object is marked for deletion, [`ExternalResources::release`]
//! runs and the marker is removed. Failed cleanup keeps the marker and is
//! retried on the next pass.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::client::KubeClient;
use super::ownership::{attach_ownership_link, controller_link, owner_reference};
use crate::crd::Zookeeper;
use crate::Error;

/// Finalizer placed on every Zookeeper object
pub const FINALIZER: &str = "Finalizer.handpay.cn";

/// Cleanup of anything an ensemble holds outside the cluster
///
/// Called once per deletion attempt while the finalizer is present. Must be
/// idempotent: a failure leaves the finalizer in place and the call is
/// repeated on the next pass.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExternalResources: Send + Sync {
    /// Release external state held for `zookeeper`
    async fn release(&self, zookeeper: &Zookeeper) -> Result<(), Error>;
}

/// Ensembles own nothing outside the cluster; children are garbage
/// collected through their owner references.
pub struct NoExternalResources;

#[async_trait]
impl ExternalResources for NoExternalResources {
    async fn release(&self, _zookeeper: &Zookeeper) -> Result<(), Error> {
        Ok(())
    }
}

/// Where a Zookeeper object stands in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Live, without any controller reference
    Unlinked,
    /// Live and linked, without the finalizer
    Unprotected,
    /// Live, linked, and finalized: ready for convergence
    Active,
    /// Marked for deletion with the finalizer still present
    Finalizing,
    /// Marked for deletion with no finalizer of ours left
    Terminating,
}

impl LifecycleState {
    /// Classify `zookeeper`
    pub fn observe(zookeeper: &Zookeeper) -> Self {
        let finalized = has_finalizer(zookeeper);

        if zookeeper.metadata.deletion_timestamp.is_some() {
            return if finalized {
                Self::Finalizing
            } else {
                Self::Terminating
            };
        }

        // Any controller counts: a second one would be rejected by the store.
        let linked = controller_link(&zookeeper.metadata).is_some();

        match (linked, finalized) {
            (false, _) => Self::Unlinked,
            (true, false) => Self::Unprotected,
            (true, true) => Self::Active,
        }
    }
}

/// Result of bringing a Zookeeper object's lifecycle metadata up to date
#[derive(Clone, Debug)]
pub enum LifecycleOutcome {
    /// Object is live and ready; carries the latest stored copy
    Active(Box<Zookeeper>),
    /// Cleanup ran and the finalizer was removed
    Finalized,
    /// Object is being deleted and none of our finalizer remains
    Terminating,
}

fn has_finalizer(zookeeper: &Zookeeper) -> bool {
    zookeeper.finalizers().iter().any(|f| f == FINALIZER)
}

/// Bring `zookeeper` to the Active state, or finish its deletion
pub async fn ensure_lifecycle(
    kube: &dyn KubeClient,
    external: &dyn ExternalResources,
    zookeeper: Zookeeper,
) -> Result<LifecycleOutcome, Error> {
    let state = LifecycleState::observe(&zookeeper);
    debug!(?state, "observed lifecycle state");

    match state {
        LifecycleState::Finalizing => finalize(kube, external, zookeeper).await,
        LifecycleState::Terminating => Ok(LifecycleOutcome::Terminating),
        LifecycleState::Unlinked | LifecycleState::Unprotected | LifecycleState::Active => {
            let zookeeper = ensure_ownership_link(kube, zookeeper).await?;
            let zookeeper = ensure_finalizer(kube, zookeeper).await?;
            Ok(LifecycleOutcome::Active(Box::new(zookeeper)))
        }
    }
}

async fn ensure_ownership_link(
    kube: &dyn KubeClient,
    mut zookeeper: Zookeeper,
) -> Result<Zookeeper, Error> {
    let link = owner_reference(&zookeeper)?;
    if let Some(existing) = controller_link(&zookeeper.metadata) {
        if existing.uid != link.uid {
            debug!(
                controller = %existing.name,
                kind = %existing.kind,
                "already controlled by another object; not adding ownership link"
            );
        }
        return Ok(zookeeper);
    }

    attach_ownership_link(&mut zookeeper.metadata, &link);
    let stored = kube.replace_zookeeper(&zookeeper).await?;
    info!("added ownership link");
    Ok(stored)
}

async fn ensure_finalizer(
    kube: &dyn KubeClient,
    mut zookeeper: Zookeeper,
) -> Result<Zookeeper, Error> {
    if has_finalizer(&zookeeper) {
        return Ok(zookeeper);
    }

    zookeeper.finalizers_mut().push(FINALIZER.to_string());
    let stored = kube.replace_zookeeper(&zookeeper).await?;
    info!(finalizer = FINALIZER, "added finalizer");
    Ok(stored)
}

async fn finalize(
    kube: &dyn KubeClient,
    external: &dyn ExternalResources,
    mut zookeeper: Zookeeper,
) -> Result<LifecycleOutcome, Error> {
    info!("releasing external resources before deletion");
    external.release(&zookeeper).await.map_err(|e| match e {
        Error::Cleanup(msg) => Error::Cleanup(msg),
        other => Error::cleanup(other.to_string()),
    })?;

    zookeeper.finalizers_mut().retain(|f| f != FINALIZER);
    kube.replace_zookeeper(&zookeeper).await?;
    info!(finalizer = FINALIZER, "removed finalizer");
    Ok(LifecycleOutcome::Finalized)
}
