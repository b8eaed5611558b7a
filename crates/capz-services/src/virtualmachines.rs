//! Virtual machines backing single machines
//!
//! A VM is immutable once created: changes to a machine's spec are rolled
//! out by replacing the machine, so an existing VM is only read to learn
//! its provider ID and state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use capz_azure::resource_id::{provider_id, resource_id};
use capz_common::crd::{Image, OsDisk, ProvisioningState, VM_RUNNING_CONDITION};
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags,
};
use capz_common::{Error, Result};
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec, ServiceHooks};

use crate::converters::{map_to_tags, tags_to_map, AzureTags, SubResource};
use crate::scope::MachineScope;
use crate::{COMPUTE_PROVIDER, NETWORK_PROVIDER};

/// Service name of virtual machines
pub const SERVICE_NAME: &str = "virtualmachine";

/// API version of compute resources
pub const API_VERSION: &str = "2023-09-01";

/// Admin user created on every VM
pub const ADMIN_USERNAME: &str = "capi";

/// Virtual machine as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
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
    /// Availability zones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    /// VM properties
    #[serde(default)]
    pub properties: VirtualMachineProperties,
}

/// Properties of a virtual machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    /// Size
    #[serde(default)]
    pub hardware_profile: HardwareProfile,
    /// Image and disks
    #[serde(default)]
    pub storage_profile: StorageProfile,
    /// Admin account and SSH keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    /// Network interfaces
    #[serde(default)]
    pub network_profile: NetworkProfile,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// VM size
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    /// Size, e.g. `Standard_D2s_v3`
    #[serde(default)]
    pub vm_size: String,
}

/// Image and OS disk of a VM or scale set model
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    /// Image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<ImageReference>,
    /// OS disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk: Option<AzureOsDisk>,
}

/// Marketplace or gallery image
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    /// Image ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    /// SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    /// Version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// OS disk as ARM describes it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureOsDisk {
    /// `Linux` or `Windows`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    /// Size in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i32>,
    /// How the disk is created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_option: Option<String>,
    /// Managed disk settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDisk>,
}

/// Managed disk settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDisk {
    /// Storage account type, e.g. `Premium_LRS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<String>,
}

/// Admin account of a VM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    /// Host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    /// Host name prefix, for scale sets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name_prefix: Option<String>,
    /// Admin user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_username: Option<String>,
    /// Linux settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_configuration: Option<LinuxConfiguration>,
}

/// Linux settings of a VM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinuxConfiguration {
    /// Whether password login is disabled
    #[serde(default)]
    pub disable_password_authentication: bool,
    /// Authorized SSH keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshConfiguration>,
}

/// SSH keys of a VM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    /// Public keys
    #[serde(default)]
    pub public_keys: Vec<SshPublicKey>,
}

/// Authorized SSH key
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    /// Path of the authorized_keys file
    pub path: String,
    /// Key material
    pub key_data: String,
}

/// Network interfaces of a VM
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    /// Interfaces
    #[serde(default)]
    pub network_interfaces: Vec<SubResource>,
}

/// Image reference for a capz image
pub fn image_reference(image: &Image) -> ImageReference {
    ImageReference {
        id: image.id.clone(),
        publisher: image.publisher.clone(),
        offer: image.offer.clone(),
        sku: image.sku.clone(),
        version: image.version.clone(),
    }
}

/// Storage profile for an image and OS disk
pub fn storage_profile(image: &Image, os_disk: &OsDisk) -> StorageProfile {
    StorageProfile {
        image_reference: Some(image_reference(image)),
        os_disk: Some(AzureOsDisk {
            os_type: Some(os_disk.os_type.clone()),
            disk_size_gb: Some(os_disk.disk_size_gb),
            create_option: Some("FromImage".to_string()),
            managed_disk: os_disk.storage_account_type.as_ref().map(|t| ManagedDisk {
                storage_account_type: Some(t.clone()),
            }),
        }),
    }
}

/// Linux admin profile authorizing `ssh_public_key`
pub fn linux_configuration(ssh_public_key: &str) -> LinuxConfiguration {
    LinuxConfiguration {
        disable_password_authentication: true,
        ssh: Some(SshConfiguration {
            public_keys: vec![SshPublicKey {
                path: format!("/home/{ADMIN_USERNAME}/.ssh/authorized_keys"),
                key_data: ssh_public_key.to_string(),
            }],
        }),
    }
}

/// Desired virtual machine
#[derive(Clone, Debug, PartialEq)]
pub struct VmSpec {
    /// VM name
    pub name: String,
    /// Resource group of the VM
    pub resource_group: String,
    /// Subscription holding the VM
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Role tag value (`control-plane` or `node`)
    pub role: String,
    /// Size
    pub size: String,
    /// Image, required to create
    pub image: Option<Image>,
    /// OS disk
    pub os_disk: OsDisk,
    /// Authorized SSH key
    pub ssh_public_key: String,
    /// Availability zone
    pub zone: Option<String>,
    /// Network interfaces, in order
    pub nic_names: Vec<String>,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl ResourceSpec for VmSpec {
    type Resource = VirtualMachine;

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
                COMPUTE_PROVIDER,
                "virtualMachines",
                &self.name,
            ),
            api_version: API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&VirtualMachine>) -> Result<Option<VirtualMachine>> {
        if existing.is_some() {
            return Ok(None);
        }
        let image = self.image.as_ref().ok_or_else(|| {
            Error::validation_for_field("spec.image", format!("no image for VM {}", self.name))
        })?;
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: Some(&self.role),
            additional: &self.additional_tags,
        });
        let network_interfaces = self
            .nic_names
            .iter()
            .map(|nic| {
                SubResource::new(resource_id(
                    &self.subscription_id,
                    &self.resource_group,
                    NETWORK_PROVIDER,
                    "networkInterfaces",
                    nic,
                ))
            })
            .collect();
        Ok(Some(VirtualMachine {
            location: self.location.clone(),
            tags: map_to_tags(&tags),
            zones: self.zone.iter().cloned().collect(),
            properties: VirtualMachineProperties {
                hardware_profile: HardwareProfile {
                    vm_size: self.size.clone(),
                },
                storage_profile: storage_profile(image, &self.os_disk),
                os_profile: Some(OsProfile {
                    computer_name: Some(self.name.clone()),
                    admin_username: Some(ADMIN_USERNAME.to_string()),
                    linux_configuration: Some(linux_configuration(&self.ssh_public_key)),
                    ..Default::default()
                }),
                network_profile: NetworkProfile { network_interfaces },
                provisioning_state: None,
            },
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &VirtualMachine) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// Records the provider ID and state of the VM on the machine scope
struct ObserveVm;

impl ServiceHooks<MachineScope, VirtualMachine> for ObserveVm {
    fn post_create_or_update(
        &self,
        scope: &MachineScope,
        result: Result<Option<VirtualMachine>>,
    ) -> Result<()> {
        if let Ok(Some(vm)) = &result {
            if let Some(id) = &vm.id {
                scope.set_provider_id(provider_id(id));
            }
            let state = vm
                .properties
                .provisioning_state
                .as_deref()
                .map(|s| s.parse::<ProvisioningState>().unwrap_or_default())
                .unwrap_or_default();
            scope.set_vm_state(state);
        }
        result.map(|_| ())
    }
}

/// Virtual machine service of a machine
pub fn service(
    scope: Arc<MachineScope>,
    reconciler: Arc<dyn Reconciler<VmSpec, MachineScope>>,
) -> AsyncService<VmSpec, MachineScope> {
    let specs = vec![scope.vm_spec()];
    AsyncService::new(SERVICE_NAME, VM_RUNNING_CONDITION, scope, reconciler, specs)
        .with_hooks(ObserveVm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capz_common::tags::CONTROL_PLANE_ROLE;

    fn spec() -> VmSpec {
        VmSpec {
            name: "my-cluster-control-plane-abcde".to_string(),
            resource_group: "rg1".to_string(),
            subscription_id: "sub".to_string(),
            location: "eastus".to_string(),
            role: CONTROL_PLANE_ROLE.to_string(),
            size: "Standard_D2s_v3".to_string(),
            image: Some(Image {
                publisher: Some("cncf-upstream".to_string()),
                offer: Some("capi".to_string()),
                sku: Some("ubuntu-2204-gen1".to_string()),
                version: Some("latest".to_string()),
                ..Default::default()
            }),
            os_disk: OsDisk::default(),
            ssh_public_key: "ssh-rsa AAAA".to_string(),
            zone: Some("1".to_string()),
            nic_names: vec!["my-cluster-control-plane-abcde-nic".to_string()],
            cluster_name: "my-cluster".to_string(),
            additional_tags: Tags::new(),
        }
    }

    #[test]
    fn test_new_vm_is_fully_described() {
        let vm = spec().parameters(None).unwrap().unwrap();
        let props = &vm.properties;

        assert_eq!(vm.zones, ["1"]);
        assert_eq!(props.hardware_profile.vm_size, "Standard_D2s_v3");
        assert_eq!(
            props.storage_profile.image_reference.as_ref().unwrap().offer.as_deref(),
            Some("capi")
        );
        assert!(props.network_profile.network_interfaces[0]
            .id
            .ends_with("/networkInterfaces/my-cluster-control-plane-abcde-nic"));
        let os = props.os_profile.as_ref().unwrap();
        assert_eq!(
            os.linux_configuration.as_ref().unwrap().ssh.as_ref().unwrap().public_keys[0].key_data,
            "ssh-rsa AAAA"
        );
    }

    #[test]
    fn test_missing_image_is_terminal() {
        let mut no_image = spec();
        no_image.image = None;
        assert!(no_image.parameters(None).unwrap_err().is_terminal());
    }

    #[test]
    fn test_existing_vm_is_immutable() {
        let existing = spec().parameters(None).unwrap().unwrap();
        assert!(spec().parameters(Some(&existing)).unwrap().is_none());
    }
}
