//! Virtual machine scale sets backing machine pools
//!
//! Scale sets are updated with PATCH so only capacity, size and image
//! changes are sent. A scale set still running an operation is left alone
//! until ARM reports a terminal state. Scale-in is driven separately by
//! [`scale_in`], which deletes the instances the pool's rolling update
//! strategy selects.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use capz_azure::resource_id::{child_resource_id, resource_id};
use capz_azure::ArmClient;
use capz_common::crd::{Image, OsDisk, ProvisioningState, SCALE_SET_RUNNING_CONDITION};
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags, NODE_ROLE,
};
use capz_common::{Error, Result, DEFAULT_REQUEUE_AFTER};
use capz_reconciler::{
    AsyncService, Reconciler, ResourceRef, ResourceSpec, ServiceHooks, UpdateMethod,
};

use crate::converters::{
    map_to_tags, scale_set_vm_to_instance, tags_to_map, AzureTags, Sku, SubResource,
};
use crate::scope::MachinePoolScope;
use crate::virtualmachines::{
    image_reference, linux_configuration, storage_profile, ImageReference, OsProfile,
    StorageProfile, ADMIN_USERNAME, API_VERSION,
};
use crate::{COMPUTE_PROVIDER, NETWORK_PROVIDER};

/// Service name of scale sets
pub const SERVICE_NAME: &str = "scaleset";

/// Scale set as ARM returns it; every field is optional so it doubles as a PATCH body
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineScaleSet {
    /// ARM ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Azure region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<AzureTags>,
    /// Size and capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<Sku>,
    /// Availability zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// Scale set properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<ScaleSetProperties>,
}

impl VirtualMachineScaleSet {
    fn provisioning_state(&self) -> Option<ProvisioningState> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
            .map(|s| s.parse().unwrap_or_default())
    }

    fn image_reference(&self) -> Option<&ImageReference> {
        self.properties
            .as_ref()
            .and_then(|p| p.virtual_machine_profile.as_ref())
            .and_then(|p| p.storage_profile.as_ref())
            .and_then(|s| s.image_reference.as_ref())
    }
}

/// Properties of a scale set
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetProperties {
    /// How model changes reach instances
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_policy: Option<UpgradePolicy>,
    /// Whether ARM creates extra instances while scaling out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overprovision: Option<bool>,
    /// Instance model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_machine_profile: Option<ScaleSetVmProfile>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// Upgrade policy of a scale set
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePolicy {
    /// `Manual`, `Automatic` or `Rolling`
    pub mode: String,
}

/// Model every instance of a scale set is built from
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetVmProfile {
    /// Admin account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    /// Image and disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_profile: Option<StorageProfile>,
    /// Network interfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<ScaleSetNetworkProfile>,
}

/// Network interfaces of every instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetNetworkProfile {
    /// Interface configurations
    #[serde(default)]
    pub network_interface_configurations: Vec<NicConfiguration>,
}

/// Network interface configuration of a scale set
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NicConfiguration {
    /// Configuration name
    pub name: String,
    /// Configuration properties
    pub properties: NicConfigurationProperties,
}

/// Properties of a scale set network interface
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NicConfigurationProperties {
    /// Whether this is the primary interface
    #[serde(default)]
    pub primary: bool,
    /// IP configurations
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
}

/// IP configuration of a scale set network interface
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    /// Configuration name
    pub name: String,
    /// Configuration properties
    pub properties: IpConfigurationProperties,
}

/// Subnet of a scale set IP configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    /// Subnet
    pub subnet: SubResource,
}

/// Instance of a scale set as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetVm {
    /// ARM ID
    #[serde(default)]
    pub id: String,
    /// Instance ID within the scale set
    #[serde(default)]
    pub instance_id: String,
    /// Name, `<scale set>_<instance id>`
    #[serde(default)]
    pub name: String,
    /// Instance properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<ScaleSetVmProperties>,
}

/// Properties of a scale set instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetVmProperties {
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    /// Whether the instance runs the current model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_model_applied: Option<bool>,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created: Option<DateTime<Utc>>,
    /// Host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<ScaleSetVmOsProfile>,
}

/// Host name of a scale set instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSetVmOsProfile {
    /// Host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
}

#[derive(Deserialize)]
struct ScaleSetVmList {
    #[serde(default)]
    value: Vec<ScaleSetVm>,
}

/// Desired scale set
#[derive(Clone, Debug, PartialEq)]
pub struct ScaleSetSpec {
    /// Scale set name
    pub name: String,
    /// Resource group of the scale set
    pub resource_group: String,
    /// Subscription holding the scale set
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Instance size
    pub size: String,
    /// Desired instance count
    pub capacity: i64,
    /// Image, required to create
    pub image: Option<Image>,
    /// OS disk
    pub os_disk: OsDisk,
    /// Authorized SSH key
    pub ssh_public_key: String,
    /// Virtual network of the node subnet
    pub vnet_name: String,
    /// Resource group of the virtual network
    pub vnet_resource_group: String,
    /// Node subnet
    pub subnet_name: String,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl ScaleSetSpec {
    fn id(&self) -> String {
        resource_id(
            &self.subscription_id,
            &self.resource_group,
            COMPUTE_PROVIDER,
            "virtualMachineScaleSets",
            &self.name,
        )
    }

    fn create(&self) -> Result<VirtualMachineScaleSet> {
        let image = self.image.as_ref().ok_or_else(|| {
            Error::validation_for_field(
                "spec.template.image",
                format!("no image for scale set {}", self.name),
            )
        })?;
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(NODE_ROLE),
            additional: &self.additional_tags,
        });
        let subnet = child_resource_id(
            &self.subscription_id,
            &self.vnet_resource_group,
            NETWORK_PROVIDER,
            "virtualNetworks",
            &self.vnet_name,
            "subnets",
            &self.subnet_name,
        );
        Ok(VirtualMachineScaleSet {
            location: Some(self.location.clone()),
            tags: map_to_tags(&tags),
            sku: Some(Sku {
                name: Some(self.size.clone()),
                capacity: Some(self.capacity),
            }),
            properties: Some(ScaleSetProperties {
                upgrade_policy: Some(UpgradePolicy {
                    mode: "Manual".to_string(),
                }),
                overprovision: Some(false),
                virtual_machine_profile: Some(ScaleSetVmProfile {
                    os_profile: Some(OsProfile {
                        computer_name_prefix: Some(self.name.clone()),
                        admin_username: Some(ADMIN_USERNAME.to_string()),
                        linux_configuration: Some(linux_configuration(&self.ssh_public_key)),
                        ..Default::default()
                    }),
                    storage_profile: Some(storage_profile(image, &self.os_disk)),
                    network_profile: Some(ScaleSetNetworkProfile {
                        network_interface_configurations: vec![NicConfiguration {
                            name: format!("{}-nic", self.name),
                            properties: NicConfigurationProperties {
                                primary: true,
                                ip_configurations: vec![IpConfiguration {
                                    name: format!("{}-ipconfig", self.name),
                                    properties: IpConfigurationProperties {
                                        subnet: SubResource::new(subnet),
                                    },
                                }],
                            },
                        }],
                    }),
                }),
                provisioning_state: None,
            }),
            ..Default::default()
        })
    }

    /// Smallest PATCH bringing `existing` to the desired capacity, size and image
    fn patch(&self, existing: &VirtualMachineScaleSet) -> Option<VirtualMachineScaleSet> {
        let mut patch = VirtualMachineScaleSet::default();
        let mut changed = false;

        let sku = existing.sku.clone().unwrap_or_default();
        if sku.capacity != Some(self.capacity) || sku.name.as_deref() != Some(self.size.as_str()) {
            patch.sku = Some(Sku {
                name: Some(self.size.clone()),
                capacity: Some(self.capacity),
            });
            changed = true;
        }

        let want = self.image.as_ref().map(image_reference);
        if want.is_some() && want.as_ref() != existing.image_reference() {
            patch.properties = Some(ScaleSetProperties {
                virtual_machine_profile: Some(ScaleSetVmProfile {
                    storage_profile: Some(StorageProfile {
                        image_reference: want,
                        os_disk: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
            changed = true;
        }

        changed.then_some(patch)
    }
}

impl ResourceSpec for ScaleSetSpec {
    type Resource = VirtualMachineScaleSet;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: self.id(),
            api_version: API_VERSION,
        }
    }

    fn parameters(
        &self,
        existing: Option<&VirtualMachineScaleSet>,
    ) -> Result<Option<VirtualMachineScaleSet>> {
        let Some(existing) = existing else {
            return self.create().map(Some);
        };
        if let Some(state) = existing.provisioning_state() {
            if !state.is_terminal() {
                return Err(Error::transient(
                    format!("scale set {} is not in terminal state: {state}", self.name),
                    DEFAULT_REQUEUE_AFTER,
                ));
            }
        }
        Ok(self.patch(existing))
    }

    fn is_managed(&self, existing: &VirtualMachineScaleSet) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }

    fn update_method(&self) -> UpdateMethod {
        UpdateMethod::Patch
    }
}

/// Records the state and size of the scale set on the pool scope
struct ObserveScaleSet;

impl ServiceHooks<MachinePoolScope, VirtualMachineScaleSet> for ObserveScaleSet {
    fn post_create_or_update(
        &self,
        scope: &MachinePoolScope,
        result: Result<Option<VirtualMachineScaleSet>>,
    ) -> Result<()> {
        if let Ok(Some(vmss)) = &result {
            if let Some(state) = vmss.provisioning_state() {
                scope.set_provisioning_state(state);
            }
            if let Some(capacity) = vmss.sku.as_ref().and_then(|s| s.capacity) {
                scope.set_observed_capacity(capacity);
            }
        }
        result.map(|_| ())
    }
}

/// Scale set service of a machine pool
///
/// Build it after [`scale_in`] has listed the members so the scale set is
/// sized for any surge the rolling update needs.
pub fn service(
    scope: Arc<MachinePoolScope>,
    reconciler: Arc<dyn Reconciler<ScaleSetSpec, MachinePoolScope>>,
) -> Result<AsyncService<ScaleSetSpec, MachinePoolScope>> {
    let specs = vec![scope.scale_set_spec()?];
    Ok(
        AsyncService::new(SERVICE_NAME, SCALE_SET_RUNNING_CONDITION, scope, reconciler, specs)
            .with_hooks(ObserveScaleSet),
    )
}

/// Current instances of the scale set
pub async fn list_instances(
    client: &dyn ArmClient,
    spec: &ScaleSetSpec,
) -> Result<Vec<ScaleSetVm>> {
    let id = format!("{}/virtualMachines", spec.id());
    let body = client
        .get(&id, API_VERSION)
        .await
        .map_err(|e| e.wrap(format!("failed to list instances of scale set {}", spec.name)))?;
    let list: ScaleSetVmList = serde_json::from_value(body)
        .map_err(|e| Error::unmarshal("scale set instance list", e.to_string()))?;
    Ok(list.value)
}

/// Refresh the pool's members and delete the ones its strategy selects
///
/// Deletes are started, not awaited; the deleted members disappear from a
/// later listing. Returns the number of deletes started.
pub async fn scale_in(client: &dyn ArmClient, scope: &MachinePoolScope) -> Result<usize> {
    let spec = scope.scale_set_spec()?;
    let vms = list_instances(client, &spec).await?;
    scope.set_instances(vms.iter().map(scale_set_vm_to_instance).collect());

    let victims = scope.machines_to_delete()?;
    for victim in &victims {
        let id = format!("{}/virtualMachines/{}", spec.id(), victim.instance_id);
        info!(scale_set = %spec.name, instance = %victim.instance_id, "deleting scale set instance");
        client
            .begin_delete(&id, API_VERSION)
            .await
            .map_err(|e| e.wrap(format!("failed to delete instance {}", victim.instance_id)))?;
        scope.mark_delete_requested(&victim.provider_id);
    }
    scope.record_model_status();
    Ok(victims.len())
}
