//! Ownership links between a Zookeeper object and the objects it controls
//!
//! An ownership link is a controller `OwnerReference` whose uid is the
//! owner's uid. Presence is always answered by [`ownership_link`], never by
//! checking whether `ownerReferences` happens to be empty.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::Zookeeper;
use crate::Error;

/// Build the controller reference pointing at `zookeeper`
pub fn owner_reference(zookeeper: &Zookeeper) -> Result<OwnerReference, Error> {
    zookeeper.controller_owner_ref(&()).ok_or_else(|| {
        Error::missing_metadata(format!(
            "Zookeeper {} has no uid; cannot build owner reference",
            zookeeper.name_any()
        ))
    })
}

/// The controller reference to `owner_uid` on `meta`, if any
pub fn ownership_link<'a>(meta: &'a ObjectMeta, owner_uid: &str) -> Option<&'a OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.uid == owner_uid && r.controller == Some(true))
}

/// Whether `meta` carries a controller reference to `owner_uid`
pub fn has_ownership_link(meta: &ObjectMeta, owner_uid: &str) -> bool {
    ownership_link(meta, owner_uid).is_some()
}

/// The controller reference on `meta`, whoever it points at
pub fn controller_link(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Attach `link` to `meta` unless a controller reference is already present
///
/// Returns true when the link was added. An object can have only one
/// controller, so a reference to some other controller is left alone.
pub fn attach_ownership_link(meta: &mut ObjectMeta, link: &OwnerReference) -> bool {
    if controller_link(meta).is_some() {
        return false;
    }
    meta.owner_references
        .get_or_insert_with(Vec::new)
        .push(link.clone());
    true
}
