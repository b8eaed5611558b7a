//! Declarative description of a managed Kubernetes agent pool

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Agent pool mode
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum NodePoolMode {
    /// Hosts critical system pods
    System,
    /// Hosts workloads
    #[default]
    User,
}

/// Desired state of a managed agent pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureManagedMachinePoolSpec {
    /// Agent pool name in Azure, defaults to the object name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// System or User
    #[serde(default)]
    pub mode: NodePoolMode,

    /// VM size of the nodes
    pub sku: String,

    /// OS disk size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk_size_gb: Option<i32>,

    /// Availability zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_zones: Vec<String>,

    /// Kubernetes labels applied to every node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,

    /// Taints applied to every node (key=value:Effect)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<String>,

    /// Autoscaler bounds; absent means autoscaling is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ManagedMachinePoolScaling>,

    /// Maximum pods per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods: Option<i32>,

    /// Tags added to the agent pool on top of the cluster tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,
}

/// Autoscaler bounds of an agent pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedMachinePoolScaling {
    /// Minimum node count
    pub min_size: i32,
    /// Maximum node count
    pub max_size: i32,
}
