//! Azure cloud environments

use capz_common::{Error, Result};

/// Endpoints of one Azure cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudEnvironment {
    /// Environment name as written in cluster specs
    pub name: &'static str,
    /// Azure Resource Manager endpoint, without trailing slash
    pub resource_manager_endpoint: &'static str,
    /// Entra ID authority host, without trailing slash
    pub authority_host: &'static str,
    /// OAuth2 scope for Resource Manager tokens
    pub token_scope: &'static str,
}

/// Azure public cloud
pub const AZURE_PUBLIC_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzurePublicCloud",
    resource_manager_endpoint: "https://management.azure.com",
    authority_host: "https://login.microsoftonline.com",
    token_scope: "https://management.azure.com/.default",
};

/// Azure China cloud
pub const AZURE_CHINA_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureChinaCloud",
    resource_manager_endpoint: "https://management.chinacloudapi.cn",
    authority_host: "https://login.chinacloudapi.cn",
    token_scope: "https://management.chinacloudapi.cn/.default",
};

/// Azure US Government cloud
pub const AZURE_US_GOVERNMENT_CLOUD: CloudEnvironment = CloudEnvironment {
    name: "AzureUSGovernmentCloud",
    resource_manager_endpoint: "https://management.usgovcloudapi.net",
    authority_host: "https://login.microsoftonline.us",
    token_scope: "https://management.usgovcloudapi.net/.default",
};

impl CloudEnvironment {
    /// Resolve an environment by name; empty or absent means the public cloud
    pub fn from_name(name: Option<&str>) -> Result<&'static CloudEnvironment> {
        let name = name.map(str::trim).unwrap_or_default();
        if name.is_empty() {
            return Ok(&AZURE_PUBLIC_CLOUD);
        }
        [&AZURE_PUBLIC_CLOUD, &AZURE_CHINA_CLOUD, &AZURE_US_GOVERNMENT_CLOUD]
            .into_iter()
            .find(|env| env.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                Error::validation_for_field(
                    "spec.azureEnvironment",
                    format!(
                        "unknown Azure environment {name}, expected one of: AzurePublicCloud, AzureChinaCloud, AzureUSGovernmentCloud"
                    ),
                )
            })
    }
}
