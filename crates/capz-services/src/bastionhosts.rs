//! Azure Bastion hosts
//!
//! An optional bastion host sits in its own subnet with its own public IP.
//! It is created once and never updated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use capz_azure::resource_id::{child_resource_id, resource_id};
use capz_common::crd::BASTION_HOST_READY_CONDITION;
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags, BASTION_ROLE,
};
use capz_common::Result;
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec};

use crate::converters::{map_to_tags, tags_to_map, AzureTags, Sku, SubResource};
use crate::scope::ClusterScope;
use crate::{NETWORK_API_VERSION, NETWORK_PROVIDER};

/// Service name of bastion hosts
pub const SERVICE_NAME: &str = "bastionhosts";

/// Bastion host as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionHost {
    /// ARM ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Azure region
    #[serde(default)]
    pub location: String,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<AzureTags>,
    /// SKU
    #[serde(default)]
    pub sku: Sku,
    /// Host properties
    #[serde(default)]
    pub properties: BastionHostProperties,
}

/// Properties of a bastion host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionHostProperties {
    /// DNS name label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
    /// Native client tunneling (Standard SKU only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_tunneling: Option<bool>,
    /// IP configurations
    #[serde(default)]
    pub ip_configurations: Vec<BastionIpConfiguration>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// IP configuration of a bastion host
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionIpConfiguration {
    /// Configuration name
    pub name: String,
    /// Configuration properties
    pub properties: BastionIpConfigurationProperties,
}

/// Subnet and public IP of a bastion IP configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionIpConfigurationProperties {
    /// Bastion subnet
    pub subnet: SubResource,
    /// Public IP
    pub public_ip_address: SubResource,
    /// Private IP allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_allocation_method: Option<String>,
}

/// Desired bastion host
#[derive(Clone, Debug, PartialEq)]
pub struct BastionSpec {
    /// Host name
    pub name: String,
    /// Resource group of the host
    pub resource_group: String,
    /// Subscription holding the host
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Virtual network of the bastion subnet
    pub vnet_name: String,
    /// Resource group of the virtual network
    pub vnet_resource_group: String,
    /// Bastion subnet
    pub subnet_name: String,
    /// Public IP of the host
    pub public_ip_name: String,
    /// SKU name
    pub sku: String,
    /// Native client tunneling
    pub enable_tunneling: bool,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl ResourceSpec for BastionSpec {
    type Resource = BastionHost;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: resource_id(
                &self.subscription_id,
                &self.resource_group,
                NETWORK_PROVIDER,
                "bastionHosts",
                &self.name,
            ),
            api_version: NETWORK_API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&BastionHost>) -> Result<Option<BastionHost>> {
        if existing.is_some() {
            return Ok(None);
        }
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(BASTION_ROLE),
            additional: &self.additional_tags,
        });
        let subnet_id = child_resource_id(
            &self.subscription_id,
            &self.vnet_resource_group,
            NETWORK_PROVIDER,
            "virtualNetworks",
            &self.vnet_name,
            "subnets",
            &self.subnet_name,
        );
        let public_ip_id = resource_id(
            &self.subscription_id,
            &self.resource_group,
            NETWORK_PROVIDER,
            "publicIPAddresses",
            &self.public_ip_name,
        );
        Ok(Some(BastionHost {
            location: self.location.clone(),
            tags: map_to_tags(&tags),
            sku: Sku::named(&self.sku),
            properties: BastionHostProperties {
                dns_name: Some(format!("{}-bastion", self.name)),
                enable_tunneling: self.enable_tunneling.then_some(true),
                ip_configurations: vec![BastionIpConfiguration {
                    name: format!("{}-bastionIP", self.name),
                    properties: BastionIpConfigurationProperties {
                        subnet: SubResource::new(subnet_id),
                        public_ip_address: SubResource::new(public_ip_id),
                        private_ip_allocation_method: Some("Dynamic".to_string()),
                    },
                }],
                provisioning_state: None,
            },
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &BastionHost) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// Bastion host service of a cluster; no specs when no bastion is declared
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<BastionSpec, ClusterScope>>,
) -> AsyncService<BastionSpec, ClusterScope> {
    let specs = scope.bastion_spec().into_iter().collect();
    AsyncService::new(SERVICE_NAME, BASTION_HOST_READY_CONDITION, scope, reconciler, specs)
}
