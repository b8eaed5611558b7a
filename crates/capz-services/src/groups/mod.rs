//! Resource groups
//!
//! The cluster's resource group is created once and never updated. A
//! group that does not carry the cluster-owned tag was brought by the user
//! and is never deleted. [`aso`] reconciles the same group through a child
//! custom resource instead of ARM.

pub mod aso;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use capz_azure::resource_id::resource_group_id;
use capz_common::crd::RESOURCE_GROUP_READY_CONDITION;
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags, COMMON_ROLE,
};
use capz_common::Result;
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec};

use crate::converters::{map_to_tags, tags_to_map, AzureTags};
use crate::scope::ClusterScope;

/// Service name of resource groups
pub const SERVICE_NAME: &str = "group";

/// API version of resource groups
pub const API_VERSION: &str = "2021-04-01";

/// Resource group as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
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
    /// Read-only properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<ResourceGroupProperties>,
}

/// Properties of a resource group
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupProperties {
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// Desired resource group
#[derive(Clone, Debug, PartialEq)]
pub struct GroupSpec {
    /// Group name
    pub name: String,
    /// Azure region
    pub location: String,
    /// Subscription holding the group
    pub subscription_id: String,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl GroupSpec {
    fn tags(&self) -> Tags {
        build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(COMMON_ROLE),
            additional: &self.additional_tags,
        })
    }
}

impl ResourceSpec for GroupSpec {
    type Resource = ResourceGroup;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.name
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: resource_group_id(&self.subscription_id, &self.name),
            api_version: API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&ResourceGroup>) -> Result<Option<ResourceGroup>> {
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(ResourceGroup {
            location: self.location.clone(),
            tags: map_to_tags(&self.tags()),
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &ResourceGroup) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// Resource group service of a cluster
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<GroupSpec, ClusterScope>>,
) -> AsyncService<GroupSpec, ClusterScope> {
    let specs = vec![scope.group_spec()];
    AsyncService::new(SERVICE_NAME, RESOURCE_GROUP_READY_CONDITION, scope, reconciler, specs)
}
