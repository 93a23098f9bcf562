//! Controller owner references: the link that makes the store cascade-delete dependents.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("object is already controlled by {kind} {name}")]
pub struct AlreadyOwned {
    pub kind: String,
    pub name: String,
}

/// Owner reference naming `owner` as controller (`controller=true, blockOwnerDeletion=true`).
/// `None` when the owner has not been persisted yet (no uid).
pub fn controller_ref<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner
        .controller_owner_ref(&())
        .map(|r| OwnerReference { block_owner_deletion: Some(true), ..r })
}

pub fn is_controlled_by(meta: &ObjectMeta, owner: &OwnerReference) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| r.uid == owner.uid && r.controller == Some(true) && r.block_owner_deletion == Some(true))
}

/// Make `owner` the controller of `meta`. Returns whether `meta` changed.
///
/// A stale reference to the same owner (matching uid) is replaced; a different controller is an error.
pub fn set_controller_ref(meta: &mut ObjectMeta, owner: OwnerReference) -> Result<bool, AlreadyOwned> {
    if is_controlled_by(meta, &owner) {
        return Ok(false);
    }
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = refs.iter().find(|r| r.controller == Some(true) && r.uid != owner.uid) {
        return Err(AlreadyOwned { kind: other.kind.clone(), name: other.name.clone() });
    }
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner);
    Ok(true)
}
