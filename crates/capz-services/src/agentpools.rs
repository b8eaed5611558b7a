//! Agent pools of managed (AKS) clusters
//!
//! Updates start from the pool as it exists so fields capz does not manage
//! (power state, upgrade settings, anything newer than this API version)
//! are sent back untouched. Node labels under `kubernetes.azure.com/` are
//! owned by AKS and survive every update.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use capz_azure::resource_id::child_resource_id;
use capz_common::crd::{
    ManagedMachinePoolScaling, NodePoolMode, ProvisioningState, AGENT_POOLS_READY_CONDITION,
};
use capz_common::tags::{build_cluster_tags, BuildParams, ResourceLifecycle, Tags};
use capz_common::{Error, Result, DEFAULT_REQUEUE_AFTER};
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec, ServiceHooks};

use crate::converters::{map_to_tags, AzureTags};
use crate::scope::ManagedMachinePoolScope;
use crate::CONTAINER_SERVICE_PROVIDER;

/// Service name of agent pools
pub const SERVICE_NAME: &str = "agentpools";

/// API version of managed cluster resources
pub const API_VERSION: &str = "2023-08-01";

/// Label prefix reserved for AKS
pub const AKS_LABEL_PREFIX: &str = "kubernetes.azure.com/";

/// Agent pool as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPool {
    /// ARM ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Pool properties
    #[serde(default)]
    pub properties: AgentPoolProperties,
}

/// Properties of an agent pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolProperties {
    /// Node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i32>,
    /// Node size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_size: Option<String>,
    /// OS disk size in GB
    #[serde(default, rename = "osDiskSizeGB", skip_serializing_if = "Option::is_none")]
    pub os_disk_size_gb: Option<i32>,
    /// Availability zones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zones: Option<Vec<String>>,
    /// `System` or `User`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Kubernetes labels of every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_labels: Option<BTreeMap<String, String>>,
    /// Kubernetes taints of every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_taints: Option<Vec<String>>,
    /// Whether the cluster autoscaler sizes the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_auto_scaling: Option<bool>,
    /// Autoscaler lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_count: Option<i32>,
    /// Autoscaler upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<i32>,
    /// Pods per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,
    /// Tags of the pool's resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<AzureTags>,
    /// Running or stopped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<Value>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    /// Fields this client does not model
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Desired agent pool
#[derive(Clone, Debug, PartialEq)]
pub struct AgentPoolSpec {
    /// Pool name
    pub name: String,
    /// Resource group of the managed cluster
    pub resource_group: String,
    /// Subscription holding the managed cluster
    pub subscription_id: String,
    /// Managed cluster the pool belongs to
    pub cluster_name: String,
    /// Desired node count
    pub replicas: i32,
    /// System or user pool
    pub mode: NodePoolMode,
    /// Node size
    pub sku: String,
    /// OS disk size in GB
    pub os_disk_size_gb: Option<i32>,
    /// Availability zones
    pub availability_zones: Vec<String>,
    /// Node labels
    pub node_labels: BTreeMap<String, String>,
    /// Node taints
    pub taints: Vec<String>,
    /// Autoscaler bounds; none means a fixed size
    pub scaling: Option<ManagedMachinePoolScaling>,
    /// Pods per node
    pub max_pods: Option<i32>,
    /// User tags
    pub additional_tags: Tags,
}

impl AgentPoolSpec {
    fn autoscaling(&self) -> Option<&ManagedMachinePoolScaling> {
        // A pool scaled to zero cannot autoscale.
        self.scaling.as_ref().filter(|_| self.replicas > 0)
    }

    fn tags(&self) -> Option<AzureTags> {
        map_to_tags(&build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: None,
            role: None,
            additional: &self.additional_tags,
        }))
    }

    /// Apply the mutable fields onto `props`
    fn apply_mutable(&self, props: &mut AgentPoolProperties) {
        match self.autoscaling() {
            Some(scaling) => {
                props.enable_auto_scaling = Some(true);
                props.min_count = Some(scaling.min_size);
                props.max_count = Some(scaling.max_size);
                // The autoscaler owns the count.
                if props.count.is_none() {
                    props.count = Some(self.replicas);
                }
            }
            None => {
                props.enable_auto_scaling = Some(false);
                props.min_count = None;
                props.max_count = None;
                props.count = Some(self.replicas);
            }
        }

        let mut labels: BTreeMap<String, String> = props
            .node_labels
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter(|(k, _)| k.starts_with(AKS_LABEL_PREFIX))
            .collect();
        labels.extend(self.node_labels.clone());
        props.node_labels = (!labels.is_empty()).then_some(labels);
        props.node_taints = (!self.taints.is_empty()).then(|| self.taints.clone());
        props.tags = self.tags();
    }
}

fn mode_name(mode: NodePoolMode) -> &'static str {
    match mode {
        NodePoolMode::System => "System",
        NodePoolMode::User => "User",
    }
}

impl ResourceSpec for AgentPoolSpec {
    type Resource = AgentPool;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> Option<&str> {
        Some(&self.cluster_name)
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: child_resource_id(
                &self.subscription_id,
                &self.resource_group,
                CONTAINER_SERVICE_PROVIDER,
                "managedClusters",
                &self.cluster_name,
                "agentPools",
                &self.name,
            ),
            api_version: API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&AgentPool>) -> Result<Option<AgentPool>> {
        let Some(existing) = existing else {
            let mut properties = AgentPoolProperties {
                vm_size: Some(self.sku.clone()),
                os_disk_size_gb: self.os_disk_size_gb,
                availability_zones: (!self.availability_zones.is_empty())
                    .then(|| self.availability_zones.clone()),
                mode: Some(mode_name(self.mode).to_string()),
                max_pods: self.max_pods,
                ..Default::default()
            };
            self.apply_mutable(&mut properties);
            return Ok(Some(AgentPool {
                properties,
                ..Default::default()
            }));
        };

        let state: ProvisioningState = existing
            .properties
            .provisioning_state
            .as_deref()
            .unwrap_or("Succeeded")
            .parse()
            .unwrap_or_default();
        if !state.is_terminal() {
            return Err(Error::transient(
                format!("agent pool {} is not in terminal state: {state}", self.name),
                DEFAULT_REQUEUE_AFTER,
            ));
        }

        let mut current = existing.clone();
        current.properties.provisioning_state = None;
        let mut desired = current.clone();
        self.apply_mutable(&mut desired.properties);
        if desired == current {
            return Ok(None);
        }
        Ok(Some(desired))
    }
}

/// Records node count and state of the pool on the managed pool scope
struct ObserveAgentPool;

impl ServiceHooks<ManagedMachinePoolScope, AgentPool> for ObserveAgentPool {
    fn post_create_or_update(
        &self,
        scope: &ManagedMachinePoolScope,
        result: Result<Option<AgentPool>>,
    ) -> Result<()> {
        if let Ok(Some(pool)) = &result {
            let state = pool
                .properties
                .provisioning_state
                .as_deref()
                .map(|s| s.parse().unwrap_or_default())
                .unwrap_or_default();
            scope.set_agent_pool_status(pool.properties.count, state);
        }
        result.map(|_| ())
    }
}

/// Agent pool service of a managed machine pool
pub fn service(
    scope: Arc<ManagedMachinePoolScope>,
    reconciler: Arc<dyn Reconciler<AgentPoolSpec, ManagedMachinePoolScope>>,
) -> AsyncService<AgentPoolSpec, ManagedMachinePoolScope> {
    let specs = vec![scope.agent_pool_spec()];
    AsyncService::new(SERVICE_NAME, AGENT_POOLS_READY_CONDITION, scope, reconciler, specs)
        .with_hooks(ObserveAgentPool)
}
