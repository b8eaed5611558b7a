//! Public IP addresses
//!
//! Static Standard-SKU addresses for the API server load balancer, NAT
//! gateways and the bastion host. An address is created once and never
//! updated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use capz_azure::resource_id::resource_id;
use capz_common::crd::PUBLIC_IPS_READY_CONDITION;
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags,
};
use capz_common::Result;
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec};

use crate::converters::{map_to_tags, tags_to_map, AzureTags, Sku};
use crate::scope::ClusterScope;
use crate::{NETWORK_API_VERSION, NETWORK_PROVIDER};

/// Service name of public IPs
pub const SERVICE_NAME: &str = "publicips";

/// Public IP address as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddress {
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
    /// Address properties
    #[serde(default)]
    pub properties: PublicIpProperties,
}

/// Properties of a public IP address
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpProperties {
    /// `Static` or `Dynamic`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_allocation_method: Option<String>,
    /// `IPv4` or `IPv6`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip_address_version: Option<String>,
    /// DNS name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_settings: Option<DnsSettings>,
    /// Allocated address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// DNS settings of a public IP
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DnsSettings {
    /// First label of the FQDN
    pub domain_name_label: String,
    /// Full DNS name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
}

/// Desired public IP address
#[derive(Clone, Debug, PartialEq)]
pub struct PublicIpSpec {
    /// Address name
    pub name: String,
    /// Resource group of the address
    pub resource_group: String,
    /// Subscription holding the address
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Full DNS name, if any
    pub dns_name: Option<String>,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl ResourceSpec for PublicIpSpec {
    type Resource = PublicIpAddress;

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
                "publicIPAddresses",
                &self.name,
            ),
            api_version: NETWORK_API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&PublicIpAddress>) -> Result<Option<PublicIpAddress>> {
        if existing.is_some() {
            return Ok(None);
        }
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: None,
            additional: &self.additional_tags,
        });
        let dns_settings = self.dns_name.as_ref().map(|fqdn| DnsSettings {
            domain_name_label: fqdn.split('.').next().unwrap_or_default().to_string(),
            fqdn: Some(fqdn.clone()),
        });
        Ok(Some(PublicIpAddress {
            location: self.location.clone(),
            tags: map_to_tags(&tags),
            sku: Sku::named("Standard"),
            properties: PublicIpProperties {
                public_ip_allocation_method: Some("Static".to_string()),
                public_ip_address_version: Some("IPv4".to_string()),
                dns_settings,
                ..Default::default()
            },
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &PublicIpAddress) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// Public IP service of a cluster
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<PublicIpSpec, ClusterScope>>,
) -> AsyncService<PublicIpSpec, ClusterScope> {
    let specs = scope.public_ip_specs();
    AsyncService::new(SERVICE_NAME, PUBLIC_IPS_READY_CONDITION, scope, reconciler, specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_label_is_first_fqdn_segment() {
        let spec = PublicIpSpec {
            name: "pip-apiserver".to_string(),
            resource_group: "rg1".to_string(),
            subscription_id: "sub".to_string(),
            location: "eastus".to_string(),
            dns_name: Some("my-cluster-abc.eastus.cloudapp.azure.com".to_string()),
            cluster_name: "my-cluster".to_string(),
            additional_tags: Tags::new(),
        };

        let ip = spec.parameters(None).unwrap().unwrap();
        let dns = ip.properties.dns_settings.unwrap();
        assert_eq!(dns.domain_name_label, "my-cluster-abc");
        assert_eq!(ip.sku.name.as_deref(), Some("Standard"));
        assert_eq!(
            ip.properties.public_ip_allocation_method.as_deref(),
            Some("Static")
        );
    }
}
