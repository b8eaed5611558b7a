//! Resource groups reconciled through Azure Service Operator

use std::sync::Arc;

use kube::api::{ApiResource, DynamicObject};
use serde_json::json;

use capz_common::crd::RESOURCE_GROUP_READY_CONDITION;
use capz_common::tags::{build_cluster_tags, BuildParams, ResourceLifecycle, Tags, COMMON_ROLE};
use capz_common::Result;
use capz_reconciler::{AsoReconciler, AsoResourceSpec, AsoService, TagsGetterSetter};

use super::SERVICE_NAME;
use crate::scope::ClusterScope;

/// API group of Azure Service Operator resource groups
pub const GROUP: &str = "resources.azure.com";

/// API version of Azure Service Operator resource groups
pub const VERSION: &str = "v1api20200601";

/// Child resource kind
pub fn api_resource() -> ApiResource {
    ApiResource {
        group: GROUP.to_string(),
        version: VERSION.to_string(),
        api_version: format!("{GROUP}/{VERSION}"),
        kind: "ResourceGroup".to_string(),
        plural: "resourcegroups".to_string(),
    }
}

/// Desired resource group child resource
#[derive(Clone, Debug, PartialEq)]
pub struct AsoGroupSpec {
    /// Group name, in Azure and on the child
    pub name: String,
    /// Namespace of the child
    pub namespace: String,
    /// Azure region
    pub location: String,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl AsoResourceSpec for AsoGroupSpec {
    fn api_resource(&self) -> ApiResource {
        api_resource()
    }

    fn resource_ref(&self) -> DynamicObject {
        DynamicObject::new(&self.name, &api_resource()).within(&self.namespace)
    }

    fn parameters(&self, existing: Option<&DynamicObject>) -> Result<Option<DynamicObject>> {
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(self.resource_ref().data(json!({
            "spec": {
                "azureName": self.name,
                "location": self.location,
                "tags": self.desired_tags(),
            }
        }))))
    }

    fn tags(&self) -> Option<&dyn TagsGetterSetter> {
        Some(self)
    }
}

impl TagsGetterSetter for AsoGroupSpec {
    fn desired_tags(&self) -> Tags {
        build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(COMMON_ROLE),
            additional: &Tags::new(),
        })
    }

    fn additional_tags(&self) -> Tags {
        self.additional_tags.clone()
    }
}

/// Resource group service of a cluster, through Azure Service Operator
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: AsoReconciler,
) -> AsoService<AsoGroupSpec, ClusterScope> {
    let specs = vec![scope.aso_group_spec()];
    AsoService::new(SERVICE_NAME, RESOURCE_GROUP_READY_CONDITION, scope, reconciler, specs)
}
