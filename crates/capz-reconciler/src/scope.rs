//! Capabilities the reconcilers need from the owner of a resource
//!
//! Scopes wrap an owning custom resource (cluster, machine, machine pool)
//! and expose its status and configuration through these traits. Methods
//! take `&self`; implementations keep the status behind a lock so services
//! running under the same scope can record progress while holding shared
//! references.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use capz_common::crd::{Future, FutureType};
use capz_common::tags::Tags;
use capz_common::Error;

/// Storage for in-flight long-running operations
pub trait FutureScope: Send + Sync {
    /// The in-flight operation for a resource, if it has one of `types`
    fn get_long_running_operation_state(
        &self,
        name: &str,
        service_name: &str,
        types: &[FutureType],
    ) -> Option<Future>;

    /// Record an in-flight operation, replacing any for the same resource
    fn set_long_running_operation_state(&self, future: Future);

    /// Forget the in-flight operation for a resource
    fn delete_long_running_operation_state(&self, name: &str, service_name: &str);
}

/// Writers for per-service conditions
pub trait ConditionScope: Send + Sync {
    /// Record the outcome of a create or update
    fn update_put_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>);

    /// Record the outcome of a patch
    fn update_patch_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>);

    /// Record the outcome of a delete
    fn update_delete_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>);
}

/// Time limits for reconcile work
pub trait TimeoutScope: Send + Sync {
    /// Upper bound on waiting for a single Azure operation
    fn default_azure_call_timeout(&self) -> Duration;

    /// Upper bound on one service's reconcile or delete
    fn default_service_reconcile_timeout(&self) -> Duration;

    /// Requeue delay for in-progress work
    fn default_requeue_after(&self) -> Duration;

    /// Delay between polls of a long-running operation
    fn default_poll_interval(&self) -> Duration;
}

/// Identity of the workload cluster a resource belongs to
pub trait ClusterDescriber: Send + Sync {
    /// Name of the cluster
    fn cluster_name(&self) -> &str;

    /// Namespace of the cluster's custom resources
    fn namespace(&self) -> &str;

    /// Azure subscription
    fn subscription_id(&self) -> &str;

    /// Cluster resource group
    fn resource_group(&self) -> &str;

    /// Azure region
    fn location(&self) -> &str;

    /// Tags added to every resource the cluster owns
    fn additional_tags(&self) -> Tags;
}

/// Everything [`AsyncReconciler`](crate::AsyncReconciler) needs
pub trait AsyncReconcileScope: FutureScope + TimeoutScope {}

impl<T: FutureScope + TimeoutScope + ?Sized> AsyncReconcileScope for T {}

/// Everything [`AsoReconciler`](crate::AsoReconciler) needs
pub trait AsoScope: ClusterDescriber + TimeoutScope {
    /// Owner reference set on every child resource
    fn aso_owner(&self) -> OwnerReference;
}
