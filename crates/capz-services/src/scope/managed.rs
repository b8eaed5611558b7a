//! Scope of a managed (AKS) machine pool

use std::sync::Arc;

use parking_lot::RwLock;

use capz_common::config::TimeoutConfig;
use capz_common::crd::{AsyncStatus, AzureManagedMachinePoolSpec, Condition, ProvisioningState};
use capz_common::Result;

use super::{infrastructure_owner, ClusterInfo, ScopeState, StatusWriter};
use crate::agentpools::AgentPoolSpec;

const KIND: &str = "AzureManagedMachinePool";

/// Inputs to [`ManagedMachinePoolScope::new`]
pub struct ManagedMachinePoolScopeParams {
    /// Cluster the pool belongs to; its name is the managed cluster name
    pub cluster: ClusterInfo,
    /// AzureManagedMachinePool name
    pub name: String,
    /// UID of the AzureManagedMachinePool
    pub uid: String,
    /// Desired node count from the owning MachinePool
    pub replicas: i32,
    /// Desired state
    pub spec: AzureManagedMachinePoolSpec,
    /// Persisted status
    pub status: AsyncStatus,
    /// Effective timeouts
    pub timeouts: TimeoutConfig,
    /// Writes status back when the pass ends
    pub writer: Arc<dyn StatusWriter>,
}

#[derive(Clone, Debug, Default)]
struct ObservedPool {
    count: Option<i32>,
    state: ProvisioningState,
}

/// Scope of one AzureManagedMachinePool for one pass
pub struct ManagedMachinePoolScope {
    state: ScopeState,
    name: String,
    replicas: i32,
    spec: AzureManagedMachinePoolSpec,
    observed: RwLock<Option<ObservedPool>>,
    writer: Arc<dyn StatusWriter>,
}

delegate_scope!(ManagedMachinePoolScope);

impl ManagedMachinePoolScope {
    /// Scope for the pool in `params`
    pub fn new(params: ManagedMachinePoolScopeParams) -> Self {
        let owner = infrastructure_owner(KIND, &params.name, &params.uid);
        Self {
            state: ScopeState::new(params.cluster, params.timeouts, owner, params.status),
            name: params.name,
            replicas: params.replicas,
            spec: params.spec,
            observed: RwLock::new(None),
            writer: params.writer,
        }
    }

    /// Name of the agent pool: the declared name, else the object name
    pub fn pool_name(&self) -> &str {
        self.spec.name.as_deref().unwrap_or(&self.name)
    }

    /// The pool's agent pool
    pub fn agent_pool_spec(&self) -> AgentPoolSpec {
        let c = self.state.cluster();
        let mut additional_tags = c.additional_tags.clone();
        additional_tags.extend(self.spec.additional_tags.clone());
        AgentPoolSpec {
            name: self.pool_name().to_string(),
            resource_group: c.resource_group.clone(),
            subscription_id: c.subscription_id.clone(),
            cluster_name: c.name.clone(),
            replicas: self.replicas,
            mode: self.spec.mode,
            sku: self.spec.sku.clone(),
            os_disk_size_gb: self.spec.os_disk_size_gb,
            availability_zones: self.spec.availability_zones.clone(),
            node_labels: self.spec.node_labels.clone(),
            taints: self.spec.taints.clone(),
            scaling: self.spec.scaling.clone(),
            max_pods: self.spec.max_pods,
            additional_tags,
        }
    }

    /// Record the agent pool's node count and provisioning state
    pub fn set_agent_pool_status(&self, count: Option<i32>, state: ProvisioningState) {
        *self.observed.write() = Some(ObservedPool { count, state });
    }

    /// Node count of the agent pool as last observed
    pub fn observed_count(&self) -> Option<i32> {
        self.observed.read().as_ref().and_then(|o| o.count)
    }

    /// Provisioning state of the agent pool as last observed
    pub fn observed_state(&self) -> Option<ProvisioningState> {
        self.observed.read().as_ref().map(|o| o.state.clone())
    }

    /// Snapshot of the status
    pub fn status(&self) -> AsyncStatus {
        self.state.status()
    }

    /// Current value of a condition
    pub fn condition(&self, type_: &str) -> Option<Condition> {
        self.state.condition(type_)
    }

    /// Persist status
    pub async fn close(&self) -> Result<()> {
        self.state.persist(self.writer.as_ref()).await
    }
}
