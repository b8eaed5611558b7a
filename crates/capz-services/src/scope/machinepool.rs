//! Scope of an Azure machine pool backed by a scale set

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use capz_common::config::TimeoutConfig;
use capz_common::crd::{
    AsyncStatus, AzureMachinePoolInstance, AzureMachinePoolSpec, Condition, ProvisioningState,
    SCALE_SET_MODEL_UPDATED_CONDITION,
};
use capz_common::{Error, Result, DELETE_MACHINE_ANNOTATION};
use capz_machinepool::RollingUpdateStrategy;
use capz_reconciler::{ConditionScope, TimeoutScope};

use super::{infrastructure_owner, ClusterInfo, ScopeState, StatusWriter};
use crate::scalesets::{ScaleSetSpec, SERVICE_NAME};

const KIND: &str = "AzureMachinePool";

/// Inputs to [`MachinePoolScope::new`]
pub struct MachinePoolScopeParams {
    /// Cluster the pool belongs to
    pub cluster: ClusterInfo,
    /// AzureMachinePool name, also the scale set name
    pub name: String,
    /// UID of the AzureMachinePool
    pub uid: String,
    /// Desired instance count from the owning MachinePool
    pub replicas: i32,
    /// Desired state
    pub spec: AzureMachinePoolSpec,
    /// Virtual network of the node subnet
    pub vnet_name: String,
    /// Resource group of the virtual network
    pub vnet_resource_group: String,
    /// Node subnet
    pub subnet_name: String,
    /// Persisted status
    pub status: AsyncStatus,
    /// Effective timeouts
    pub timeouts: TimeoutConfig,
    /// Writes status back when the pass ends
    pub writer: Arc<dyn StatusWriter>,
}

/// Scope of one AzureMachinePool for one pass
pub struct MachinePoolScope {
    state: ScopeState,
    name: String,
    replicas: i32,
    spec: AzureMachinePoolSpec,
    vnet_name: String,
    vnet_resource_group: String,
    subnet_name: String,
    instances: RwLock<HashMap<String, AzureMachinePoolInstance>>,
    provisioning_state: RwLock<Option<ProvisioningState>>,
    observed_capacity: RwLock<Option<i64>>,
    writer: Arc<dyn StatusWriter>,
}

delegate_scope!(MachinePoolScope);

impl MachinePoolScope {
    /// Scope for the pool in `params`
    pub fn new(params: MachinePoolScopeParams) -> Self {
        let owner = infrastructure_owner(KIND, &params.name, &params.uid);
        Self {
            state: ScopeState::new(params.cluster, params.timeouts, owner, params.status),
            name: params.name,
            replicas: params.replicas,
            spec: params.spec,
            vnet_name: params.vnet_name,
            vnet_resource_group: params.vnet_resource_group,
            subnet_name: params.subnet_name,
            instances: RwLock::new(HashMap::new()),
            provisioning_state: RwLock::new(None),
            observed_capacity: RwLock::new(None),
            writer: params.writer,
        }
    }

    /// Desired instance count
    pub fn replicas(&self) -> i32 {
        self.replicas
    }

    /// Instance count the scale set is sized to
    ///
    /// While known members still run an old model the pool surges above
    /// `replicas` so replacements come up before stale members are deleted.
    pub fn capacity(&self) -> Result<i64> {
        let stale = self
            .instances
            .read()
            .values()
            .any(|i| !i.latest_model_applied && !i.delete_requested);
        if !stale {
            return Ok(i64::from(self.replicas));
        }
        let surge = RollingUpdateStrategy::from(&self.spec.strategy).surge(self.replicas)?;
        Ok(i64::from(self.replicas) + i64::from(surge.max(0)))
    }

    /// The pool's scale set
    pub fn scale_set_spec(&self) -> Result<ScaleSetSpec> {
        let c = self.state.cluster();
        let template = &self.spec.template;
        let location = if self.spec.location.is_empty() {
            c.location.clone()
        } else {
            self.spec.location.clone()
        };
        let mut additional_tags = c.additional_tags.clone();
        additional_tags.extend(self.spec.additional_tags.clone());
        Ok(ScaleSetSpec {
            name: self.name.clone(),
            resource_group: c.resource_group.clone(),
            subscription_id: c.subscription_id.clone(),
            location,
            size: template.vm_size.clone(),
            capacity: self.capacity()?,
            image: template.image.clone(),
            os_disk: template.os_disk.clone(),
            ssh_public_key: template.ssh_public_key.clone(),
            vnet_name: self.vnet_name.clone(),
            vnet_resource_group: self.vnet_resource_group.clone(),
            subnet_name: self.subnet_name.clone(),
            cluster_name: c.name.clone(),
            additional_tags,
        })
    }

    /// Replace the known members, keyed by provider ID
    pub fn set_instances(&self, instances: Vec<AzureMachinePoolInstance>) {
        let mut known = self.instances.write();
        let requested: Vec<String> = known
            .values()
            .filter(|i| i.delete_requested)
            .map(|i| i.provider_id.clone())
            .collect();
        *known = instances
            .into_iter()
            .map(|mut i| {
                i.delete_requested |= requested.contains(&i.provider_id);
                (i.provider_id.clone(), i)
            })
            .collect();
    }

    /// Known members
    pub fn instances(&self) -> Vec<AzureMachinePoolInstance> {
        let mut all: Vec<_> = self.instances.read().values().cloned().collect();
        all.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        all
    }

    /// Provider IDs of the members, sorted
    pub fn provider_ids(&self) -> Vec<String> {
        self.instances().into_iter().map(|i| i.provider_id).collect()
    }

    /// Members the rolling update strategy deletes this pass
    pub fn machines_to_delete(&self) -> Result<Vec<AzureMachinePoolInstance>> {
        let strategy = RollingUpdateStrategy::from(&self.spec.strategy);
        strategy.select_machines_to_delete(self.replicas, &self.instances.read())
    }

    /// Flag a member whose delete was started
    pub fn mark_delete_requested(&self, provider_id: &str) {
        if let Some(instance) = self.instances.write().get_mut(provider_id) {
            instance.delete_requested = true;
        }
    }

    /// Flag members whose owning machine carries the delete-machine annotation
    pub fn honor_delete_annotations<'a>(
        &self,
        machines: impl IntoIterator<Item = (&'a str, &'a BTreeMap<String, String>)>,
    ) {
        for (provider_id, annotations) in machines {
            if annotations.contains_key(DELETE_MACHINE_ANNOTATION) {
                self.mark_delete_requested(provider_id);
            }
        }
    }

    /// Record whether every member runs the latest scale set model
    pub fn record_model_status(&self) {
        let outdated = self
            .instances
            .read()
            .values()
            .filter(|i| !i.latest_model_applied && !i.delete_requested)
            .count();
        let err = (outdated > 0).then(|| {
            Error::transient(
                format!("{outdated} instances are not running the latest model"),
                self.default_requeue_after(),
            )
        });
        self.update_put_status(SCALE_SET_MODEL_UPDATED_CONDITION, SERVICE_NAME, err.as_ref());
    }

    /// Provisioning state of the scale set as last observed
    pub fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.provisioning_state.read().clone()
    }

    /// Record the scale set's provisioning state
    pub fn set_provisioning_state(&self, state: ProvisioningState) {
        *self.provisioning_state.write() = Some(state);
    }

    /// Capacity of the scale set as last observed
    pub fn observed_capacity(&self) -> Option<i64> {
        *self.observed_capacity.read()
    }

    /// Record the scale set's capacity
    pub fn set_observed_capacity(&self, capacity: i64) {
        *self.observed_capacity.write() = Some(capacity);
    }

    /// Snapshot of the status
    pub fn status(&self) -> AsyncStatus {
        self.state.status()
    }

    /// Current value of a condition
    pub fn condition(&self, type_: &str) -> Option<Condition> {
        self.state.condition(type_)
    }

    /// How long to wait before the next pass while members converge
    pub fn requeue_after(&self) -> Duration {
        self.default_requeue_after()
    }

    /// Persist status
    pub async fn close(&self) -> Result<()> {
        self.state.persist(self.writer.as_ref()).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scope::tests::cluster_info;
    use crate::scope::MockStatusWriter;
    use capz_common::crd::{ConditionStatus, Image};
    use chrono::{DateTime, Utc};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    pub(crate) fn instance(id: &str, created: &str, latest: bool) -> AzureMachinePoolInstance {
        AzureMachinePoolInstance {
            provider_id: format!("azure:///vmss/pool0/{id}"),
            instance_id: id.to_string(),
            name: format!("pool0{id:0>6}"),
            creation_timestamp: created.parse::<DateTime<Utc>>().unwrap(),
            ready: true,
            provisioning_state: ProvisioningState::Succeeded,
            latest_model_applied: latest,
            delete_requested: false,
        }
    }

    pub(crate) fn scope(replicas: i32) -> MachinePoolScope {
        MachinePoolScope::new(MachinePoolScopeParams {
            cluster: cluster_info(),
            name: "pool0".to_string(),
            uid: "uid-3".to_string(),
            replicas,
            spec: AzureMachinePoolSpec {
                template: capz_common::crd::AzureMachinePoolMachineTemplate {
                    vm_size: "Standard_D2s_v3".to_string(),
                    image: Some(Image::default()),
                    ..Default::default()
                },
                ..Default::default()
            },
            vnet_name: "vnet1".to_string(),
            vnet_resource_group: "rg1".to_string(),
            subnet_name: "node-subnet".to_string(),
            status: AsyncStatus::default(),
            timeouts: TimeoutConfig::default(),
            writer: Arc::new(MockStatusWriter::new()),
        })
    }

    #[test]
    fn test_scale_set_spec_uses_cluster_location_by_default() {
        let spec = scope(3).scale_set_spec().unwrap();
        assert_eq!(spec.location, "eastus");
        assert_eq!(spec.capacity, 3);
    }

    #[test]
    fn test_stale_members_surge_capacity() {
        let scope = scope(4);
        scope.set_instances(vec![
            instance("0", "2024-01-01T00:00:00Z", false),
            instance("1", "2024-01-02T00:00:00Z", false),
            instance("2", "2024-01-03T00:00:00Z", true),
            instance("3", "2024-01-04T00:00:00Z", true),
        ]);
        assert_eq!(scope.capacity().unwrap(), 5);

        scope.set_instances(vec![
            instance("2", "2024-01-03T00:00:00Z", true),
            instance("3", "2024-01-04T00:00:00Z", true),
            instance("4", "2024-01-05T00:00:00Z", true),
            instance("5", "2024-01-06T00:00:00Z", true),
        ]);
        assert_eq!(scope.capacity().unwrap(), 4);
    }

    #[test]
    fn test_invalid_surge_fails_scale_set_spec() {
        let mut scope = scope(4);
        scope.spec.strategy.rolling_update = Some(capz_common::crd::MachineRollingUpdateDeployment {
            max_surge: Some(IntOrString::String("lots".to_string())),
            ..Default::default()
        });
        scope.set_instances(vec![instance("0", "2024-01-01T00:00:00Z", false)]);

        assert!(scope.scale_set_spec().is_err());
    }

    #[test]
    fn test_delete_requests_survive_a_refresh() {
        let scope = scope(1);
        scope.set_instances(vec![
            instance("0", "2024-01-01T00:00:00Z", true),
            instance("1", "2024-01-02T00:00:00Z", true),
        ]);
        scope.mark_delete_requested("azure:///vmss/pool0/0");

        scope.set_instances(vec![
            instance("0", "2024-01-01T00:00:00Z", true),
            instance("1", "2024-01-02T00:00:00Z", true),
        ]);

        assert!(scope.instances()[0].delete_requested);
        assert!(!scope.instances()[1].delete_requested);
    }

    #[test]
    fn test_annotated_machine_is_deleted_first() {
        let scope = scope(2);
        scope.set_instances(vec![
            instance("0", "2024-01-01T00:00:00Z", true),
            instance("1", "2024-01-02T00:00:00Z", true),
            instance("2", "2024-01-03T00:00:00Z", true),
        ]);
        let annotated = BTreeMap::from([(DELETE_MACHINE_ANNOTATION.to_string(), String::new())]);
        let plain = BTreeMap::new();

        scope.honor_delete_annotations([
            ("azure:///vmss/pool0/2", &annotated),
            ("azure:///vmss/pool0/0", &plain),
        ]);

        let victims = scope.machines_to_delete().unwrap();
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].instance_id, "2");
    }

    #[test]
    fn test_outdated_members_mark_model_not_updated() {
        let scope = scope(2);
        scope.set_instances(vec![
            instance("0", "2024-01-01T00:00:00Z", false),
            instance("1", "2024-01-02T00:00:00Z", true),
        ]);

        scope.record_model_status();

        let condition = scope.condition(SCALE_SET_MODEL_UPDATED_CONDITION).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(condition.message.contains("1 instances"));
    }
}
