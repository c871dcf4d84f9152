//! Controller for Zookeeper ensembles
//!
//! This module contains the reconciliation logic for the Zookeeper custom
//! resource. Each pass follows the observe-diff-act pattern: read the object,
//! compute the desired children, compare on owned fields only, and write the
//! difference.

mod client;
mod converge;
mod diff;
mod lifecycle;
mod ownership;
mod prune;
#[cfg(test)]
mod testing;
mod zookeeper;

pub use client::{KubeClient, KubeClientImpl};
pub use converge::{converge, ChildResource, ConvergeReport};
pub use diff::{changed_fields, is_changed, FieldRule, SignificantFields};
pub use lifecycle::{
    ensure_lifecycle, ExternalResources, LifecycleOutcome, LifecycleState, NoExternalResources,
    FINALIZER,
};
pub use ownership::{
    attach_ownership_link, controller_link, has_ownership_link, owner_reference, ownership_link,
};
pub use prune::prune_removed;
pub use zookeeper::{
    error_policy, reconcile, reconcile_zookeeper, Context, ContextBuilder, ControllerSettings,
    ReconcileOutcome, DEFAULT_ERROR_REQUEUE,
};
