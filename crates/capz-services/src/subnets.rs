//! Subnets of the cluster's virtual network
//!
//! Subnets have no tags of their own: they are managed exactly when their
//! virtual network is. In a network the user brought, existing subnets are
//! only read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use capz_azure::resource_id::{child_resource_id, resource_id};
use capz_common::crd::SUBNETS_READY_CONDITION;
use capz_common::{Error, Result};
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec};

use crate::converters::SubResource;
use crate::scope::ClusterScope;
use crate::{NETWORK_API_VERSION, NETWORK_PROVIDER};

/// Service name of subnets
pub const SERVICE_NAME: &str = "subnets";

/// Subnet as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// ARM ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Subnet properties
    #[serde(default)]
    pub properties: SubnetProperties,
}

/// Properties of a subnet
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetProperties {
    /// Single CIDR block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_prefix: Option<String>,
    /// CIDR blocks when there are several
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_prefixes: Vec<String>,
    /// Attached security group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_security_group: Option<SubResource>,
    /// Attached NAT gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<SubResource>,
    /// Attached route table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<SubResource>,
    /// Service endpoints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<ServiceEndpoint>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

impl SubnetProperties {
    /// CIDR blocks, whichever field carries them
    pub fn cidr_blocks(&self) -> Vec<String> {
        match &self.address_prefix {
            Some(prefix) if self.address_prefixes.is_empty() => vec![prefix.clone()],
            _ => self.address_prefixes.clone(),
        }
    }
}

/// Service endpoint of a subnet
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoint {
    /// Service, e.g. `Microsoft.Storage`
    pub service: String,
}

/// Desired subnet
#[derive(Clone, Debug, PartialEq)]
pub struct SubnetSpec {
    /// Subnet name
    pub name: String,
    /// Virtual network holding the subnet
    pub vnet_name: String,
    /// Resource group of the virtual network
    pub resource_group: String,
    /// Subscription holding the network
    pub subscription_id: String,
    /// CIDR blocks
    pub cidr_blocks: Vec<String>,
    /// Security group to attach
    pub security_group: Option<String>,
    /// NAT gateway to attach
    pub nat_gateway: Option<String>,
    /// Route table to attach
    pub route_table: Option<String>,
    /// Service endpoints
    pub service_endpoints: Vec<String>,
    /// Whether capz owns the virtual network
    pub vnet_managed: bool,
}

impl SubnetSpec {
    fn network_id(&self, resource_type: &str, name: &str) -> String {
        resource_id(
            &self.subscription_id,
            &self.resource_group,
            NETWORK_PROVIDER,
            resource_type,
            name,
        )
    }

    fn desired(&self) -> SubnetProperties {
        let (address_prefix, address_prefixes) = match self.cidr_blocks.as_slice() {
            [single] => (Some(single.clone()), Vec::new()),
            many => (None, many.to_vec()),
        };
        SubnetProperties {
            address_prefix,
            address_prefixes,
            network_security_group: self
                .security_group
                .as_ref()
                .map(|n| SubResource::new(self.network_id("networkSecurityGroups", n))),
            nat_gateway: self
                .nat_gateway
                .as_ref()
                .map(|n| SubResource::new(self.network_id("natGateways", n))),
            route_table: self
                .route_table
                .as_ref()
                .map(|n| SubResource::new(self.network_id("routeTables", n))),
            service_endpoints: self
                .service_endpoints
                .iter()
                .map(|s| ServiceEndpoint { service: s.clone() })
                .collect(),
            provisioning_state: None,
        }
    }
}

fn same_ref(a: &Option<SubResource>, b: &Option<SubResource>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.refers_to(&b.id),
        (None, None) => true,
        _ => false,
    }
}

fn up_to_date(existing: &SubnetProperties, desired: &SubnetProperties) -> bool {
    existing.cidr_blocks() == desired.cidr_blocks()
        && same_ref(&existing.network_security_group, &desired.network_security_group)
        && same_ref(&existing.nat_gateway, &desired.nat_gateway)
        && same_ref(&existing.route_table, &desired.route_table)
        && existing.service_endpoints == desired.service_endpoints
}

impl ResourceSpec for SubnetSpec {
    type Resource = Subnet;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> Option<&str> {
        Some(&self.vnet_name)
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: child_resource_id(
                &self.subscription_id,
                &self.resource_group,
                NETWORK_PROVIDER,
                "virtualNetworks",
                &self.vnet_name,
                "subnets",
                &self.name,
            ),
            api_version: NETWORK_API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&Subnet>) -> Result<Option<Subnet>> {
        match existing {
            Some(_) if !self.vnet_managed => Ok(None),
            None if !self.vnet_managed => Err(Error::terminal(
                "SubnetNotFound",
                format!(
                    "subnet {} does not exist in unmanaged virtual network {}",
                    self.name, self.vnet_name
                ),
            )),
            Some(existing) if up_to_date(&existing.properties, &self.desired()) => Ok(None),
            Some(existing) => Ok(Some(Subnet {
                properties: self.desired(),
                ..existing.clone()
            })),
            None => Ok(Some(Subnet {
                properties: self.desired(),
                ..Default::default()
            })),
        }
    }

    fn is_managed(&self, _existing: &Subnet) -> bool {
        self.vnet_managed
    }
}

/// Subnet service of a cluster
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<SubnetSpec, ClusterScope>>,
) -> AsyncService<SubnetSpec, ClusterScope> {
    let specs = scope.subnet_specs();
    AsyncService::new(SERVICE_NAME, SUBNETS_READY_CONDITION, scope, reconciler, specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SubnetSpec {
        SubnetSpec {
            name: "node-subnet".to_string(),
            vnet_name: "vnet1".to_string(),
            resource_group: "rg1".to_string(),
            subscription_id: "sub".to_string(),
            cidr_blocks: vec!["10.1.0.0/16".to_string()],
            security_group: Some("node-nsg".to_string()),
            nat_gateway: None,
            route_table: None,
            service_endpoints: Vec::new(),
            vnet_managed: true,
        }
    }

    #[test]
    fn test_new_subnet_references_its_security_group() {
        let subnet = spec().parameters(None).unwrap().unwrap();
        assert_eq!(subnet.properties.address_prefix.as_deref(), Some("10.1.0.0/16"));
        assert!(subnet
            .properties
            .network_security_group
            .unwrap()
            .id
            .ends_with("/networkSecurityGroups/node-nsg"));
    }

    #[test]
    fn test_matching_subnet_is_not_rewritten() {
        let mut existing = spec().parameters(None).unwrap().unwrap();
        existing.id = Some("/subscriptions/sub/.../subnets/node-subnet".to_string());
        existing.properties.provisioning_state = Some("Succeeded".to_string());
        // ARM may return IDs in a different case.
        if let Some(nsg) = existing.properties.network_security_group.as_mut() {
            nsg.id = nsg.id.to_lowercase();
        }

        assert!(spec().parameters(Some(&existing)).unwrap().is_none());
    }

    #[test]
    fn test_new_nat_gateway_updates_subnet() {
        let existing = spec().parameters(None).unwrap().unwrap();
        let mut wanted = spec();
        wanted.nat_gateway = Some("node-natgw".to_string());

        let updated = wanted.parameters(Some(&existing)).unwrap().unwrap();
        assert!(updated.properties.nat_gateway.is_some());
    }

    /// Story: subnets of a user's network are read, never written
    #[test]
    fn story_unmanaged_network_subnets_are_left_alone() {
        let mut byo = spec();
        byo.vnet_managed = false;
        let existing = Subnet::default();

        assert!(byo.parameters(Some(&existing)).unwrap().is_none());
        assert!(!byo.is_managed(&existing));

        let err = byo.parameters(None).unwrap_err();
        assert!(err.is_terminal());
    }
}
