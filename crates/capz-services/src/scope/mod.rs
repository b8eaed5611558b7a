//! Scopes: one per owning object, handed to services for a single pass
//!
//! A scope wraps the owner's spec, its async status and the cluster it
//! belongs to. Status lives behind a lock so services sharing the scope
//! record futures and conditions through `&self`; [`StatusWriter`] persists
//! it when the pass ends.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::Client;
use parking_lot::RwLock;
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use capz_common::config::TimeoutConfig;
use capz_common::crd::{AsyncStatus, Condition, Future, FutureType};
use capz_common::tags::Tags;
use capz_common::{Error, Result, FIELD_MANAGER};
use capz_reconciler::{ClusterDescriber, ConditionScope, FutureScope, TimeoutScope};

/// Implement the engine's scope traits by delegating to a `state` field
macro_rules! delegate_scope {
    ($scope:ty) => {
        impl ::capz_reconciler::FutureScope for $scope {
            fn get_long_running_operation_state(
                &self,
                name: &str,
                service_name: &str,
                types: &[::capz_common::crd::FutureType],
            ) -> Option<::capz_common::crd::Future> {
                ::capz_reconciler::FutureScope::get_long_running_operation_state(
                    &self.state,
                    name,
                    service_name,
                    types,
                )
            }

            fn set_long_running_operation_state(&self, future: ::capz_common::crd::Future) {
                ::capz_reconciler::FutureScope::set_long_running_operation_state(&self.state, future)
            }

            fn delete_long_running_operation_state(&self, name: &str, service_name: &str) {
                ::capz_reconciler::FutureScope::delete_long_running_operation_state(
                    &self.state,
                    name,
                    service_name,
                )
            }
        }

        impl ::capz_reconciler::ConditionScope for $scope {
            fn update_put_status(
                &self,
                condition_type: &str,
                service_name: &str,
                err: Option<&::capz_common::Error>,
            ) {
                ::capz_reconciler::ConditionScope::update_put_status(
                    &self.state,
                    condition_type,
                    service_name,
                    err,
                )
            }

            fn update_patch_status(
                &self,
                condition_type: &str,
                service_name: &str,
                err: Option<&::capz_common::Error>,
            ) {
                ::capz_reconciler::ConditionScope::update_patch_status(
                    &self.state,
                    condition_type,
                    service_name,
                    err,
                )
            }

            fn update_delete_status(
                &self,
                condition_type: &str,
                service_name: &str,
                err: Option<&::capz_common::Error>,
            ) {
                ::capz_reconciler::ConditionScope::update_delete_status(
                    &self.state,
                    condition_type,
                    service_name,
                    err,
                )
            }
        }

        impl ::capz_reconciler::TimeoutScope for $scope {
            fn default_azure_call_timeout(&self) -> ::std::time::Duration {
                ::capz_reconciler::TimeoutScope::default_azure_call_timeout(&self.state)
            }

            fn default_service_reconcile_timeout(&self) -> ::std::time::Duration {
                ::capz_reconciler::TimeoutScope::default_service_reconcile_timeout(&self.state)
            }

            fn default_requeue_after(&self) -> ::std::time::Duration {
                ::capz_reconciler::TimeoutScope::default_requeue_after(&self.state)
            }

            fn default_poll_interval(&self) -> ::std::time::Duration {
                ::capz_reconciler::TimeoutScope::default_poll_interval(&self.state)
            }
        }

        impl ::capz_reconciler::ClusterDescriber for $scope {
            fn cluster_name(&self) -> &str {
                ::capz_reconciler::ClusterDescriber::cluster_name(&self.state)
            }

            fn namespace(&self) -> &str {
                ::capz_reconciler::ClusterDescriber::namespace(&self.state)
            }

            fn subscription_id(&self) -> &str {
                ::capz_reconciler::ClusterDescriber::subscription_id(&self.state)
            }

            fn resource_group(&self) -> &str {
                ::capz_reconciler::ClusterDescriber::resource_group(&self.state)
            }

            fn location(&self) -> &str {
                ::capz_reconciler::ClusterDescriber::location(&self.state)
            }

            fn additional_tags(&self) -> ::capz_common::tags::Tags {
                ::capz_reconciler::ClusterDescriber::additional_tags(&self.state)
            }
        }
    };
}

mod cluster;
mod machine;
mod machinepool;
mod managed;

pub use cluster::{
    ClusterScope, ClusterScopeParams, ServicePrincipal, LAST_APPLIED_SECURITY_RULES_ANNOTATION,
};
pub use machine::{MachineScope, MachineScopeParams};
pub use machinepool::{MachinePoolScope, MachinePoolScopeParams};
pub use managed::{ManagedMachinePoolScope, ManagedMachinePoolScopeParams};

// =============================================================================
// Shared state
// =============================================================================

/// Identity of the cluster an object belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    /// Cluster name
    pub name: String,
    /// Namespace of the cluster objects
    pub namespace: String,
    /// Azure subscription
    pub subscription_id: String,
    /// Resource group holding the cluster's resources
    pub resource_group: String,
    /// Azure region
    pub location: String,
    /// Tags every resource of the cluster carries
    pub additional_tags: Tags,
}

/// Status, timeouts and identity shared by every scope kind
#[derive(Debug)]
pub struct ScopeState {
    cluster: ClusterInfo,
    timeouts: TimeoutConfig,
    owner: OwnerReference,
    status: RwLock<AsyncStatus>,
}

impl ScopeState {
    /// State of `owner`, starting from its persisted status
    pub fn new(
        cluster: ClusterInfo,
        timeouts: TimeoutConfig,
        owner: OwnerReference,
        status: AsyncStatus,
    ) -> Self {
        Self {
            cluster,
            timeouts,
            owner,
            status: RwLock::new(status),
        }
    }

    /// Cluster identity
    pub fn cluster(&self) -> &ClusterInfo {
        &self.cluster
    }

    /// Object whose status this is
    pub fn owner(&self) -> &OwnerReference {
        &self.owner
    }

    /// Snapshot of the status
    pub fn status(&self) -> AsyncStatus {
        self.status.read().clone()
    }

    /// Current value of a condition
    pub fn condition(&self, type_: &str) -> Option<Condition> {
        self.status.read().get_condition(type_).cloned()
    }

    /// Write the status back to the owner
    pub async fn persist(&self, writer: &dyn StatusWriter) -> Result<()> {
        let status = self.status();
        writer
            .patch_status(&self.owner, &self.cluster.namespace, &status)
            .await
            .map_err(|e| e.wrap(format!("failed to patch status of {}", self.owner.name)))
    }
}

impl FutureScope for ScopeState {
    fn get_long_running_operation_state(
        &self,
        name: &str,
        service_name: &str,
        types: &[FutureType],
    ) -> Option<Future> {
        self.status
            .read()
            .get_future_of(service_name, name, types)
            .cloned()
    }

    fn set_long_running_operation_state(&self, future: Future) {
        self.status.write().set_future(future);
    }

    fn delete_long_running_operation_state(&self, name: &str, service_name: &str) {
        self.status.write().delete_future(service_name, name);
    }
}

impl ConditionScope for ScopeState {
    fn update_put_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        self.status
            .write()
            .update_put_status(condition_type, service_name, err);
    }

    fn update_patch_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        self.status
            .write()
            .update_patch_status(condition_type, service_name, err);
    }

    fn update_delete_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        self.status
            .write()
            .update_delete_status(condition_type, service_name, err);
    }
}

impl TimeoutScope for ScopeState {
    fn default_azure_call_timeout(&self) -> Duration {
        self.timeouts.azure_call
    }

    fn default_service_reconcile_timeout(&self) -> Duration {
        self.timeouts.service_reconcile
    }

    fn default_requeue_after(&self) -> Duration {
        self.timeouts.requeue_after
    }

    fn default_poll_interval(&self) -> Duration {
        self.timeouts.poll_interval
    }
}

impl ClusterDescriber for ScopeState {
    fn cluster_name(&self) -> &str {
        &self.cluster.name
    }

    fn namespace(&self) -> &str {
        &self.cluster.namespace
    }

    fn subscription_id(&self) -> &str {
        &self.cluster.subscription_id
    }

    fn resource_group(&self) -> &str {
        &self.cluster.resource_group
    }

    fn location(&self) -> &str {
        &self.cluster.location
    }

    fn additional_tags(&self) -> Tags {
        self.cluster.additional_tags.clone()
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Writes scope state back to the owning object
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the owner's conditions and in-flight operations
    async fn patch_status(
        &self,
        owner: &OwnerReference,
        namespace: &str,
        status: &AsyncStatus,
    ) -> Result<()>;

    /// Merge annotations into the owner's metadata
    async fn patch_annotations(
        &self,
        owner: &OwnerReference,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// [`StatusWriter`] backed by the Kubernetes API
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a writer using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, owner: &OwnerReference, namespace: &str) -> Api<DynamicObject> {
        let (group, version) = owner
            .api_version
            .split_once('/')
            .unwrap_or(("", owner.api_version.as_str()));
        let gvk = GroupVersionKind::gvk(group, version, &owner.kind);
        Api::namespaced_with(self.client.clone(), namespace, &ApiResource::from_gvk(&gvk))
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(
        &self,
        owner: &OwnerReference,
        namespace: &str,
        status: &AsyncStatus,
    ) -> Result<()> {
        // Merge patches replace lists, so empty lists clear stale entries.
        let patch = json!({
            "status": {
                "conditions": status.conditions,
                "longRunningOperationStates": status.long_running_operation_states,
            }
        });
        debug!(kind = %owner.kind, name = %owner.name, "patching status");
        self.api(owner, namespace)
            .patch_status(
                &owner.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn patch_annotations(
        &self,
        owner: &OwnerReference,
        namespace: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.api(owner, namespace)
            .patch(
                &owner.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Owner reference for an object of the infrastructure API group
pub fn infrastructure_owner(kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "infrastructure.cluster.x-k8s.io/v1beta1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use capz_common::crd::{ConditionStatus, RESOURCE_GROUP_READY_CONDITION};
    use mockall::predicate::always;

    pub(crate) fn cluster_info() -> ClusterInfo {
        ClusterInfo {
            name: "my-cluster".to_string(),
            namespace: "default".to_string(),
            subscription_id: "sub".to_string(),
            resource_group: "rg1".to_string(),
            location: "eastus".to_string(),
            additional_tags: Tags::new(),
        }
    }

    fn state() -> ScopeState {
        ScopeState::new(
            cluster_info(),
            TimeoutConfig::default(),
            infrastructure_owner("AzureCluster", "my-cluster", "uid-1"),
            AsyncStatus::default(),
        )
    }

    #[test]
    fn test_futures_are_keyed_by_service_and_name() {
        let state = state();
        state.set_long_running_operation_state(Future {
            type_: FutureType::Create,
            service_name: "group".to_string(),
            name: "rg1".to_string(),
            resource_group: "rg1".to_string(),
            data: "e30".to_string(),
        });

        assert!(state
            .get_long_running_operation_state("rg1", "group", FutureType::PUT_TYPES)
            .is_some());
        assert!(state
            .get_long_running_operation_state("rg1", "group", FutureType::DELETE_TYPES)
            .is_none());

        state.delete_long_running_operation_state("rg1", "group");
        assert!(state.status().long_running_operation_states.is_empty());
    }

    #[tokio::test]
    async fn test_persist_writes_current_status() {
        let state = state();
        state.update_put_status(RESOURCE_GROUP_READY_CONDITION, "group", None);

        let mut writer = MockStatusWriter::new();
        writer
            .expect_patch_status()
            .withf(|owner, ns, status| {
                owner.name == "my-cluster"
                    && ns == "default"
                    && status.conditions[0].status == ConditionStatus::True
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        state.persist(&writer).await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_failure_names_the_owner() {
        let state = state();
        let mut writer = MockStatusWriter::new();
        writer
            .expect_patch_status()
            .with(always(), always(), always())
            .returning(|_, _, _| Err(Error::internal("conflict")));

        let err = state.persist(&writer).await.unwrap_err();
        assert!(err.to_string().contains("my-cluster"));
    }
}
