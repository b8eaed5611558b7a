//! Declarative description of an Azure cluster's shared infrastructure
//!
//! These are the values a cluster scope reads to build its per-service
//! specs: resource group, virtual network, subnets with their security
//! groups and NAT gateways, and an optional bastion host.

use std::collections::BTreeMap;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::TimeoutConfig;

/// Desired state of an Azure cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterSpec {
    /// Subscription that holds every cluster resource
    pub subscription_id: String,

    /// Resource group for cluster resources
    pub resource_group: String,

    /// Azure region
    pub location: String,

    /// Tags added to every resource the cluster creates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// Networking configuration
    #[serde(default)]
    pub network_spec: NetworkSpec,

    /// Optional bastion host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion_spec: Option<BastionSpec>,

    /// Cloud environment name (e.g. AzurePublicCloud)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_environment: Option<String>,

    /// Identity used to authenticate against Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityRef>,

    /// Per-cluster overrides of the engine timeouts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconcile_timeouts: Option<ReconcileTimeouts>,
}

impl AzureClusterSpec {
    /// Validate the fields the engine relies on
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.subscription_id.is_empty() {
            return Err(crate::Error::validation_for_field(
                "spec.subscriptionID",
                "subscription ID cannot be empty",
            ));
        }
        if self.resource_group.is_empty() {
            return Err(crate::Error::validation_for_field(
                "spec.resourceGroup",
                "resource group cannot be empty",
            ));
        }
        if self.location.is_empty() {
            return Err(crate::Error::validation_for_field(
                "spec.location",
                "location cannot be empty",
            ));
        }
        Ok(())
    }

    /// Timeouts for this cluster: per-cluster overrides over the base config
    pub fn timeouts(&self, base: &TimeoutConfig) -> TimeoutConfig {
        match &self.reconcile_timeouts {
            Some(overrides) => overrides.apply(base),
            None => base.clone(),
        }
    }
}

/// Per-cluster overrides of engine timeouts, in seconds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileTimeouts {
    /// Override of the single Azure call timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_call_timeout_seconds: Option<u64>,

    /// Override of the per-service reconcile timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_reconcile_timeout_seconds: Option<u64>,

    /// Override of the requeue delay for in-flight operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requeue_after_seconds: Option<u64>,
}

impl ReconcileTimeouts {
    fn apply(&self, base: &TimeoutConfig) -> TimeoutConfig {
        let mut out = base.clone();
        if let Some(s) = self.azure_call_timeout_seconds {
            out.azure_call = Duration::from_secs(s);
        }
        if let Some(s) = self.service_reconcile_timeout_seconds {
            out.service_reconcile = Duration::from_secs(s);
        }
        if let Some(s) = self.requeue_after_seconds {
            out.requeue_after = Duration::from_secs(s);
        }
        out
    }
}

/// Reference to the identity object holding Azure credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    /// Name of the identity
    pub name: String,
    /// Namespace of the identity
    #[serde(default)]
    pub namespace: String,
}

/// Virtual network and subnets of the cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Virtual network
    #[serde(default)]
    pub vnet: VnetSpec,

    /// Subnets in the virtual network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,
}

/// Virtual network configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    /// Resource group of the vnet, defaults to the cluster resource group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Name of the vnet
    pub name: String,

    /// Address prefixes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,

    /// ARM ID, populated once the vnet exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tags observed on the vnet
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Role of a subnet in the cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetRole {
    /// Control plane nodes
    ControlPlane,
    /// Worker nodes
    #[default]
    Node,
    /// Azure Bastion
    Bastion,
    /// Shared by every role
    Cluster,
}

impl std::fmt::Display for SubnetRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Node => write!(f, "node"),
            Self::Bastion => write!(f, "bastion"),
            Self::Cluster => write!(f, "cluster"),
        }
    }
}

/// Subnet configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Role of the subnet
    #[serde(default)]
    pub role: SubnetRole,

    /// Name of the subnet
    pub name: String,

    /// Address prefixes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,

    /// Security group attached to the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group: Option<SecurityGroupSpec>,

    /// NAT gateway attached to the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<NatGatewaySpec>,

    /// Route table attached to the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<String>,

    /// Service endpoints enabled on the subnet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<String>,
}

/// Network security group configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupSpec {
    /// Name of the security group
    pub name: String,

    /// Rules declared on the security group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_rules: Vec<SecurityRule>,

    /// Tags observed on the security group
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Protocol matched by a security rule
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SecurityGroupProtocol {
    /// Any protocol
    #[default]
    #[serde(rename = "*")]
    All,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

/// Direction matched by a security rule
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SecurityRuleDirection {
    /// Traffic into the subnet
    #[default]
    Inbound,
    /// Traffic out of the subnet
    Outbound,
}

/// Action taken by a security rule
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SecurityRuleAction {
    /// Allow matching traffic
    #[default]
    Allow,
    /// Deny matching traffic
    Deny,
}

/// A single network security rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Unique name within the security group
    pub name: String,

    /// Free-form description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Protocol to match
    #[serde(default)]
    pub protocol: SecurityGroupProtocol,

    /// Direction to match
    #[serde(default)]
    pub direction: SecurityRuleDirection,

    /// Priority, lower is evaluated first
    #[serde(default)]
    pub priority: i32,

    /// Source CIDR or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Source port or range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ports: Option<String>,

    /// Destination CIDR or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Destination port or range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ports: Option<String>,

    /// Allow or deny
    #[serde(default)]
    pub action: SecurityRuleAction,
}

/// NAT gateway configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewaySpec {
    /// Name of the NAT gateway
    pub name: String,

    /// Public IP of the NAT gateway
    #[serde(default)]
    pub nat_gateway_ip: PublicIpSpec,
}

/// Public IP configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpSpec {
    /// Name of the public IP
    pub name: String,

    /// Optional DNS label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

/// Bastion configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionSpec {
    /// Azure Bastion host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_bastion: Option<AzureBastion>,
}

/// Azure Bastion host configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureBastion {
    /// Name of the bastion host
    pub name: String,

    /// Subnet the bastion lives in
    pub subnet: SubnetSpec,

    /// Public IP of the bastion
    pub public_ip: PublicIpSpec,

    /// SKU (Basic or Standard)
    #[serde(default = "default_bastion_sku")]
    pub sku: String,

    /// Enable native client tunneling (Standard SKU only)
    #[serde(default)]
    pub enable_tunneling: bool,
}

fn default_bastion_sku() -> String {
    "Basic".to_string()
}
