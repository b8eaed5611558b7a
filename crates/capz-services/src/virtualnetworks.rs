//! Virtual networks
//!
//! A virtual network capz created is tagged as owned and never updated
//! afterwards. One that already exists without the tag was brought by the
//! user: it is read so the cluster learns its ID and address space, and is
//! never modified or deleted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use capz_azure::resource_id::resource_id;
use capz_common::crd::VNET_READY_CONDITION;
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags, COMMON_ROLE,
};
use capz_common::Result;
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec, ServiceHooks};

use crate::converters::{map_to_tags, tags_to_map, AzureTags};
use crate::scope::ClusterScope;
use crate::{NETWORK_API_VERSION, NETWORK_PROVIDER};

/// Service name of virtual networks
pub const SERVICE_NAME: &str = "virtualnetwork";

/// Virtual network as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetwork {
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
    /// Network properties
    #[serde(default)]
    pub properties: VirtualNetworkProperties,
}

/// Properties of a virtual network
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkProperties {
    /// Address space
    #[serde(default)]
    pub address_space: AddressSpace,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// CIDR blocks of a virtual network
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpace {
    /// CIDR blocks
    #[serde(default)]
    pub address_prefixes: Vec<String>,
}

/// Desired virtual network
#[derive(Clone, Debug, PartialEq)]
pub struct VNetSpec {
    /// Network name
    pub name: String,
    /// Resource group of the network
    pub resource_group: String,
    /// Subscription holding the network
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Address space
    pub cidr_blocks: Vec<String>,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl ResourceSpec for VNetSpec {
    type Resource = VirtualNetwork;

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
                "virtualNetworks",
                &self.name,
            ),
            api_version: NETWORK_API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&VirtualNetwork>) -> Result<Option<VirtualNetwork>> {
        if existing.is_some() {
            return Ok(None);
        }
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(COMMON_ROLE),
            additional: &self.additional_tags,
        });
        Ok(Some(VirtualNetwork {
            location: self.location.clone(),
            tags: map_to_tags(&tags),
            properties: VirtualNetworkProperties {
                address_space: AddressSpace {
                    address_prefixes: self.cidr_blocks.clone(),
                },
                provisioning_state: None,
            },
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &VirtualNetwork) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// Records the observed network on the cluster scope
struct ObserveVnet;

impl ServiceHooks<ClusterScope, VirtualNetwork> for ObserveVnet {
    fn post_create_or_update(
        &self,
        scope: &ClusterScope,
        result: Result<Option<VirtualNetwork>>,
    ) -> Result<()> {
        if let Ok(Some(vnet)) = &result {
            debug!(id = ?vnet.id, "observed virtual network");
            scope.observe_vnet(
                vnet.id.clone().unwrap_or_default(),
                tags_to_map(vnet.tags.as_ref()),
                vnet.properties.address_space.address_prefixes.clone(),
            );
        }
        result.map(|_| ())
    }
}

/// Virtual network service of a cluster
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<VNetSpec, ClusterScope>>,
) -> AsyncService<VNetSpec, ClusterScope> {
    let specs = vec![scope.vnet_spec()];
    AsyncService::new(SERVICE_NAME, VNET_READY_CONDITION, scope, reconciler, specs)
        .with_hooks(ObserveVnet)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VNetSpec {
        VNetSpec {
            name: "vnet1".to_string(),
            resource_group: "rg1".to_string(),
            subscription_id: "sub".to_string(),
            location: "eastus".to_string(),
            cidr_blocks: vec!["10.0.0.0/8".to_string()],
            cluster_name: "my-cluster".to_string(),
            additional_tags: Tags::new(),
        }
    }

    #[test]
    fn test_new_network_carries_address_space() {
        let vnet = spec().parameters(None).unwrap().unwrap();
        assert_eq!(vnet.properties.address_space.address_prefixes, ["10.0.0.0/8"]);
        assert!(spec().is_managed(&vnet));
    }

    #[test]
    fn test_existing_network_is_read_only() {
        let byo = VirtualNetwork {
            location: "eastus".to_string(),
            ..Default::default()
        };
        assert!(spec().parameters(Some(&byo)).unwrap().is_none());
        assert!(!spec().is_managed(&byo));
    }

    #[test]
    fn test_resource_ref_targets_network_provider() {
        assert_eq!(
            spec().resource_ref().id,
            "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1"
        );
    }
}
