//! Scope of a single Azure machine

use std::sync::Arc;

use parking_lot::RwLock;

use capz_common::config::TimeoutConfig;
use capz_common::crd::{AsyncStatus, AzureMachineSpec, Condition, ProvisioningState};
use capz_common::Result;

use super::{infrastructure_owner, ClusterInfo, ScopeState, StatusWriter};
use crate::virtualmachines::VmSpec;

const KIND: &str = "AzureMachine";

/// Inputs to [`MachineScope::new`]
pub struct MachineScopeParams {
    /// Cluster the machine belongs to
    pub cluster: ClusterInfo,
    /// AzureMachine name, also the VM name
    pub name: String,
    /// UID of the AzureMachine
    pub uid: String,
    /// Role tag value (`control-plane` or `node`)
    pub role: String,
    /// Desired state
    pub spec: AzureMachineSpec,
    /// Persisted status
    pub status: AsyncStatus,
    /// Effective timeouts
    pub timeouts: TimeoutConfig,
    /// Writes status back when the pass ends
    pub writer: Arc<dyn StatusWriter>,
}

/// Scope of one AzureMachine for one pass
pub struct MachineScope {
    state: ScopeState,
    name: String,
    role: String,
    spec: AzureMachineSpec,
    provider_id: RwLock<Option<String>>,
    vm_state: RwLock<Option<ProvisioningState>>,
    writer: Arc<dyn StatusWriter>,
}

delegate_scope!(MachineScope);

impl MachineScope {
    /// Scope for the machine in `params`
    pub fn new(params: MachineScopeParams) -> Self {
        let owner = infrastructure_owner(KIND, &params.name, &params.uid);
        let provider_id = params.spec.provider_id.clone();
        Self {
            state: ScopeState::new(params.cluster, params.timeouts, owner, params.status),
            name: params.name,
            role: params.role,
            spec: params.spec,
            provider_id: RwLock::new(provider_id),
            vm_state: RwLock::new(None),
            writer: params.writer,
        }
    }

    /// The machine's virtual machine
    pub fn vm_spec(&self) -> VmSpec {
        let c = self.state.cluster();
        let mut additional_tags = c.additional_tags.clone();
        additional_tags.extend(self.spec.additional_tags.clone());
        VmSpec {
            name: self.name.clone(),
            resource_group: c.resource_group.clone(),
            subscription_id: c.subscription_id.clone(),
            location: c.location.clone(),
            role: self.role.clone(),
            size: self.spec.vm_size.clone(),
            image: self.spec.image.clone(),
            os_disk: self.spec.os_disk.clone(),
            ssh_public_key: self.spec.ssh_public_key.clone(),
            zone: self.spec.failure_domain.clone(),
            nic_names: vec![format!("{}-nic", self.name)],
            cluster_name: c.name.clone(),
            additional_tags,
        }
    }

    /// Provider ID of the VM, once known
    pub fn provider_id(&self) -> Option<String> {
        self.provider_id.read().clone()
    }

    /// Record the VM's provider ID
    pub fn set_provider_id(&self, provider_id: String) {
        *self.provider_id.write() = Some(provider_id);
    }

    /// Provisioning state of the VM as last observed
    pub fn vm_state(&self) -> Option<ProvisioningState> {
        self.vm_state.read().clone()
    }

    /// Record the VM's provisioning state
    pub fn set_vm_state(&self, state: ProvisioningState) {
        *self.vm_state.write() = Some(state);
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
