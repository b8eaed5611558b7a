//! Declarative description of an Azure machine pool backed by a scale set

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::machine::{Image, OsDisk};
use super::types::ProvisioningState;

/// Desired state of an Azure machine pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolSpec {
    /// Azure region
    pub location: String,

    /// Template for every instance in the pool
    pub template: AzureMachinePoolMachineTemplate,

    /// Tags added to the scale set on top of the cluster tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// How instances are replaced when the model changes
    #[serde(default)]
    pub strategy: AzureMachinePoolDeploymentStrategy,
}

/// Template applied to each scale set instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolMachineTemplate {
    /// VM size
    pub vm_size: String,

    /// OS image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Base64 encoded SSH public key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_public_key: String,
}

/// Deployment strategy type
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeploymentStrategyType {
    /// Replace instances a few at a time
    #[default]
    RollingUpdate,
}

/// Deployment strategy of a machine pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolDeploymentStrategy {
    /// Strategy type
    #[serde(default, rename = "type")]
    pub type_: DeploymentStrategyType,

    /// Rolling update parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolling_update: Option<MachineRollingUpdateDeployment>,
}

/// Order in which instances are chosen for deletion
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Oldest creation timestamp first
    #[default]
    Oldest,
    /// Newest creation timestamp first
    Newest,
    /// Random order
    Random,
}

/// Rolling update parameters
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineRollingUpdateDeployment {
    /// Instances that may be unavailable during the update (int or percent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,

    /// Instances that may be created above the desired count (int or percent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surge: Option<IntOrString>,

    /// Deletion order
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

/// Observed member of a machine pool
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePoolInstance {
    /// Provider ID (azure:///subscriptions/...)
    #[serde(rename = "providerID")]
    pub provider_id: String,

    /// Scale set instance ID
    #[serde(default)]
    pub instance_id: String,

    /// Instance (computer) name
    #[serde(default)]
    pub name: String,

    /// When the instance was created
    pub creation_timestamp: DateTime<Utc>,

    /// Whether the node backing the instance is ready
    #[serde(default)]
    pub ready: bool,

    /// Azure provisioning state
    #[serde(default)]
    pub provisioning_state: ProvisioningState,

    /// Whether the instance runs the latest scale set model
    #[serde(default)]
    pub latest_model_applied: bool,

    /// Whether the owning machine carries the delete-machine annotation
    #[serde(default)]
    pub delete_requested: bool,
}
