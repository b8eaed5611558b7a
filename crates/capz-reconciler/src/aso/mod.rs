//! Declarative reconciler
//!
//! Resource kinds handled by Azure Service Operator are reconciled by
//! writing a child custom resource and reading back its `Ready` condition.
//! Ownership is tracked with the owned-by-cluster label; the operator's
//! reconcile-policy annotation decides whether it converges the resource
//! in Azure.

mod client;
mod reconciler;

use kube::api::{ApiResource, DynamicObject};

use capz_common::Result;

use crate::tags::TagsGetterSetter;

pub use client::{ChildResourceClient, KubeChildResourceClient};
pub use reconciler::{AsoReconciler, READY_CONDITION, REASON_AZURE_RESOURCE_NOT_FOUND, REASON_RECONCILING};

#[cfg(test)]
pub use client::MockChildResourceClient;

/// Describes one child resource a declarative service reconciles
pub trait AsoResourceSpec: Send + Sync {
    /// Group, version and kind of the child resource
    fn api_resource(&self) -> ApiResource;

    /// The child with only its name and namespace set
    fn resource_ref(&self) -> DynamicObject;

    /// Desired child, built from the existing one if there is one
    ///
    /// `Ok(None)` leaves the existing child as it is, or creates the bare
    /// [`resource_ref`](Self::resource_ref) when there is none.
    fn parameters(&self, existing: Option<&DynamicObject>) -> Result<Option<DynamicObject>>;

    /// Tag access when the kind carries Azure tags
    fn tags(&self) -> Option<&dyn TagsGetterSetter> {
        None
    }
}
