//! Declarative description of a single Azure virtual machine

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of an Azure virtual machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachineSpec {
    /// VM size (e.g. Standard_D2s_v3)
    pub vm_size: String,

    /// OS image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// OS disk
    #[serde(default)]
    pub os_disk: OsDisk,

    /// Base64 encoded SSH public key for the admin user
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_public_key: String,

    /// Availability zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,

    /// Tags added to the VM on top of the cluster tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_tags: BTreeMap<String, String>,

    /// Provider ID, set once the VM exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// OS image reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Full ARM ID of a custom image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Marketplace publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// Marketplace offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,

    /// Marketplace SKU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Marketplace version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// OS disk configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    /// Linux or Windows
    #[serde(default = "default_os_type")]
    pub os_type: String,

    /// Size in GiB
    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: i32,

    /// Managed disk storage account type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_type: Option<String>,
}

impl Default for OsDisk {
    fn default() -> Self {
        Self {
            os_type: default_os_type(),
            disk_size_gb: default_disk_size_gb(),
            storage_account_type: None,
        }
    }
}

fn default_os_type() -> String {
    "Linux".to_string()
}

fn default_disk_size_gb() -> i32 {
    128
}
