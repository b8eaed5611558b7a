//! NAT gateways for outbound traffic of node subnets
//!
//! A gateway is updated only to move it onto its declared public IP. In a
//! virtual network the user brought, gateways are never written.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use capz_azure::resource_id::resource_id;
use capz_common::crd::NAT_GATEWAYS_READY_CONDITION;
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags, NODE_ROLE,
};
use capz_common::Result;
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec};

use crate::converters::{map_to_tags, tags_to_map, AzureTags, Sku, SubResource};
use crate::scope::ClusterScope;
use crate::{NETWORK_API_VERSION, NETWORK_PROVIDER};

/// Service name of NAT gateways
pub const SERVICE_NAME: &str = "natgateways";

/// NAT gateway as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NatGateway {
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
    /// Gateway properties
    #[serde(default)]
    pub properties: NatGatewayProperties,
}

/// Properties of a NAT gateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewayProperties {
    /// Public IPs used for outbound traffic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_ip_addresses: Vec<SubResource>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// Desired NAT gateway
#[derive(Clone, Debug, PartialEq)]
pub struct NatGatewaySpec {
    /// Gateway name
    pub name: String,
    /// Resource group of the gateway
    pub resource_group: String,
    /// Subscription holding the gateway
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Public IP the gateway uses
    pub public_ip_name: String,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
    /// Whether capz owns the virtual network
    pub vnet_managed: bool,
}

impl NatGatewaySpec {
    fn public_ip_id(&self) -> String {
        resource_id(
            &self.subscription_id,
            &self.resource_group,
            NETWORK_PROVIDER,
            "publicIPAddresses",
            &self.public_ip_name,
        )
    }

    fn uses_declared_ip(&self, existing: &NatGateway) -> bool {
        let want = self.public_ip_id();
        matches!(
            existing.properties.public_ip_addresses.as_slice(),
            [ip] if ip.refers_to(&want)
        )
    }
}

impl ResourceSpec for NatGatewaySpec {
    type Resource = NatGateway;

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
                "natGateways",
                &self.name,
            ),
            api_version: NETWORK_API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&NatGateway>) -> Result<Option<NatGateway>> {
        if let Some(existing) = existing {
            if !self.vnet_managed || self.uses_declared_ip(existing) {
                return Ok(None);
            }
        }
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(NODE_ROLE),
            additional: &self.additional_tags,
        });
        Ok(Some(NatGateway {
            location: self.location.clone(),
            tags: map_to_tags(&tags),
            sku: Sku::named("Standard"),
            properties: NatGatewayProperties {
                public_ip_addresses: vec![SubResource::new(self.public_ip_id())],
                provisioning_state: None,
            },
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &NatGateway) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// NAT gateway service of a cluster
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<NatGatewaySpec, ClusterScope>>,
) -> AsyncService<NatGatewaySpec, ClusterScope> {
    let specs = scope.nat_gateway_specs();
    AsyncService::new(SERVICE_NAME, NAT_GATEWAYS_READY_CONDITION, scope, reconciler, specs)
}
