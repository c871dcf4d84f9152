//! Removal of children for nodes no longer in the spec
//!
//! Children are found by the ensemble label and deleted only when their
//! controller reference points at the current Zookeeper object, so objects
//! created by hand with a matching label are never touched.

use std::collections::BTreeSet;

use kube::ResourceExt;
use tracing::{debug, info};

use super::client::KubeClient;
use super::converge::ChildResource;
use super::ownership::has_ownership_link;
use crate::workload::BuildContext;
use crate::Error;

/// Delete `K` children of the ensemble whose names are not in `keep`
///
/// Returns the number of objects deleted.
pub async fn prune_removed<K: ChildResource>(
    kube: &dyn KubeClient,
    ctx: &BuildContext,
    owner_uid: &str,
    keep: &BTreeSet<String>,
) -> Result<usize, Error> {
    let children = K::list(kube, &ctx.namespace, &ctx.ensemble_selector()).await?;
    let mut pruned = 0;

    for child in children {
        let name = child.name_any();
        if keep.contains(&name) {
            continue;
        }
        if !has_ownership_link(child.meta(), owner_uid) {
            debug!(kind = K::KIND, %name, "labelled child not owned by this ensemble; skipping");
            continue;
        }

        info!(kind = K::KIND, %name, "deleting child of removed node");
        K::delete(kube, &ctx.namespace, &name).await?;
        pruned += 1;
    }

    Ok(pruned)
}
